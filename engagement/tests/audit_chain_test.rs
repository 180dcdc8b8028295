//! Tamper detection, restart continuity and monthly rotation.

use std::fs;
use std::path::Path;

use chrono::{TimeZone, Utc};
use engagement::audit::{
    file_name_for, verify_dir, verify_file, AuditChain, AuditEntry, BreakKind, EventFilter,
};
use serde_json::json;

const KEY: &[u8] = b"test-chain-key";

fn write_entries(dir: &Path, n: usize) -> std::path::PathBuf {
    let chain = AuditChain::open(dir, KEY).unwrap();
    let at = Utc.with_ymd_and_hms(2026, 5, 1, 12, 0, 0).unwrap();
    for i in 0..n {
        chain
            .append_at(at, "message_exchanged", json!({"index": i, "text": "hello"}))
            .unwrap();
    }
    dir.join(file_name_for(at))
}

fn rewrite_entry(path: &Path, index: usize, edit: impl Fn(&mut AuditEntry)) {
    let content = fs::read_to_string(path).unwrap();
    let mut lines: Vec<String> = content.lines().map(str::to_string).collect();
    let mut entry: AuditEntry = serde_json::from_str(&lines[index]).unwrap();
    edit(&mut entry);
    lines[index] = serde_json::to_string(&entry).unwrap();
    fs::write(path, lines.join("\n") + "\n").unwrap();
}

#[test]
fn test_untampered_chain_verifies() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_entries(dir.path(), 5);
    let report = verify_file(&path, KEY).unwrap();
    assert!(report.valid);
    assert_eq!(report.entries_checked, 5);
    assert!(verify_dir(dir.path(), KEY).unwrap().valid);
}

fn tamper_data(e: &mut AuditEntry) {
    e.data["text"] = json!("changed");
}

fn tamper_event_type(e: &mut AuditEntry) {
    e.event_type = "other".into();
}

fn tamper_timestamp(e: &mut AuditEntry) {
    e.timestamp = "2020-01-01T00:00:00.000000Z".into();
}

fn tamper_entry_hash(e: &mut AuditEntry) {
    e.entry_hash = "0".repeat(64);
}

fn tamper_chain_hash(e: &mut AuditEntry) {
    e.chain_hash = "f".repeat(64);
}

fn tamper_previous_hash(e: &mut AuditEntry) {
    e.previous_hash = Some("a".repeat(64));
}

#[test]
fn test_each_field_tamper_detected_at_position() {
    type Edit = fn(&mut AuditEntry);
    let cases: [(&str, Edit, BreakKind); 6] = [
        ("data", tamper_data, BreakKind::EntryHashMismatch),
        ("event_type", tamper_event_type, BreakKind::EntryHashMismatch),
        ("timestamp", tamper_timestamp, BreakKind::EntryHashMismatch),
        ("entry_hash", tamper_entry_hash, BreakKind::EntryHashMismatch),
        ("chain_hash", tamper_chain_hash, BreakKind::ChainHashMismatch),
        ("previous_hash", tamper_previous_hash, BreakKind::LinkageMismatch),
    ];

    for (field, edit, kind) in cases {
        for k in 1..4 {
            let dir = tempfile::tempdir().unwrap();
            let path = write_entries(dir.path(), 5);
            rewrite_entry(&path, k, edit);

            let report = verify_dir(dir.path(), KEY).unwrap();
            let failure = report.failure.unwrap_or_else(|| panic!("{field} at {k} undetected"));
            assert_eq!(failure.position, k as u64, "{field} at {k}");
            assert_eq!(failure.kind, kind, "{field} at {k}");
            assert_eq!(failure.line, k + 1);
        }
    }
}

#[test]
fn test_deleted_entry_detected() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_entries(dir.path(), 4);
    let content = fs::read_to_string(&path).unwrap();
    let kept: Vec<&str> = content
        .lines()
        .enumerate()
        .filter(|(i, _)| *i != 2)
        .map(|(_, l)| l)
        .collect();
    fs::write(&path, kept.join("\n") + "\n").unwrap();

    let failure = verify_dir(dir.path(), KEY).unwrap().failure.unwrap();
    assert!(failure.position >= 2);
    assert_eq!(failure.kind, BreakKind::LinkageMismatch);
}

#[test]
fn test_restart_resumes_from_last_chain_hash() {
    let dir = tempfile::tempdir().unwrap();
    let first_head = {
        let chain = AuditChain::open(dir.path(), KEY).unwrap();
        chain.append("session_created", json!({"id": "a"})).unwrap();
        chain.head().unwrap()
    };

    let chain = AuditChain::open(dir.path(), KEY).unwrap();
    chain.append("session_created", json!({"id": "b"})).unwrap();
    let entries = chain.events(&EventFilter::default()).unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[1].previous_hash.as_deref(), Some(first_head.as_str()));
    assert!(chain.verify().unwrap().valid);
}

#[test]
fn test_rotation_keeps_chain_continuous() {
    let dir = tempfile::tempdir().unwrap();
    let chain = AuditChain::open(dir.path(), KEY).unwrap();
    let april = Utc.with_ymd_and_hms(2026, 4, 30, 23, 59, 59).unwrap();
    let may = Utc.with_ymd_and_hms(2026, 5, 1, 0, 0, 1).unwrap();
    chain.append_at(april, "a", json!({})).unwrap();
    chain.append_at(april, "b", json!({})).unwrap();
    chain.append_at(may, "c", json!({})).unwrap();

    assert!(dir.path().join("audit_202604.log").exists());
    assert!(dir.path().join("audit_202605.log").exists());

    let report = verify_dir(dir.path(), KEY).unwrap();
    assert!(report.valid);
    assert_eq!(report.files_checked, 2);
    assert_eq!(report.entries_checked, 3);
    assert_eq!(report.head, chain.head());

    // The May file alone still verifies: its first link points into April.
    assert!(verify_file(&dir.path().join("audit_202605.log"), KEY).unwrap().valid);

    // Reopening picks up the head from the newest month.
    let reopened = AuditChain::open(dir.path(), KEY).unwrap();
    assert_eq!(reopened.head(), chain.head());
}
