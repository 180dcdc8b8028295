//! Single-writer append and chain-head recovery.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;
use tracing::{debug, error, info};

use super::hash::{chain_hash, entry_hash};
use super::verify::{self, VerifyReport};
use super::{event, file_name_for, io_err, is_audit_file_name, AuditEntry, AuditError, AuditResult};

/// Query over logged events.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub event_type: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    /// Most recent `limit` matches.
    pub limit: Option<usize>,
}

struct WriterState {
    head: Option<String>,
    current: Option<(String, File)>,
    appended: u64,
}

/// The audit log writer. One per log directory per process.
///
/// All appends go through one `Mutex`; the critical section is a single
/// buffered line write plus `sync_data`, with no network or await inside.
pub struct AuditChain {
    dir: PathBuf,
    key: Vec<u8>,
    state: Mutex<WriterState>,
}

impl std::fmt::Debug for AuditChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditChain")
            .field("dir", &self.dir)
            .field("head", &self.head())
            .finish()
    }
}

impl AuditChain {
    /// Open (or create) the log directory and recover the chain head from
    /// the most recent log file.
    pub fn open(dir: impl Into<PathBuf>, key: impl AsRef<[u8]>) -> AuditResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(io_err(&dir))?;
        let head = recover_head(&dir)?;
        info!(dir = %dir.display(), head = ?head, "Audit chain opened");
        Ok(Self {
            dir,
            key: key.as_ref().to_vec(),
            state: Mutex::new(WriterState {
                head,
                current: None,
                appended: 0,
            }),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `chain_hash` of the last durable entry.
    pub fn head(&self) -> Option<String> {
        self.lock_state().head.clone()
    }

    /// Entries appended by this process.
    pub fn appended(&self) -> u64 {
        self.lock_state().appended
    }

    /// Append an event stamped now. Returns the new entry's `entry_hash`.
    pub fn append(&self, event_type: &str, data: Value) -> AuditResult<String> {
        self.append_at(Utc::now(), event_type, data)
    }

    /// Append an event with an explicit timestamp.
    ///
    /// The file is chosen by the timestamp's month. The in-memory head only
    /// advances once the line is written and synced.
    pub fn append_at(&self, at: DateTime<Utc>, event_type: &str, data: Value) -> AuditResult<String> {
        let mut state = self.lock_state();

        let timestamp = at.to_rfc3339_opts(SecondsFormat::Micros, true);
        let previous_hash = state.head.clone();
        let entry_hash = entry_hash(&timestamp, event_type, &data, previous_hash.as_deref());
        let chain_hash = chain_hash(&self.key, &entry_hash, previous_hash.as_deref())?;
        let entry = AuditEntry {
            timestamp,
            event_type: event_type.to_string(),
            data,
            previous_hash,
            entry_hash: entry_hash.clone(),
            chain_hash: chain_hash.clone(),
        };
        let mut line = serde_json::to_string(&entry)?;
        line.push('\n');

        let name = file_name_for(at);
        let path = self.dir.join(&name);
        let needs_open = !matches!(&state.current, Some((open, _)) if *open == name);
        if needs_open {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .map_err(io_err(&path))?;
            debug!(file = %path.display(), "Audit log file opened");
            state.current = Some((name, file));
        }
        let Some((_, file)) = state.current.as_mut() else {
            return Err(AuditError::Io {
                path,
                source: std::io::Error::other("audit file handle missing"),
            });
        };

        let written = file
            .write_all(line.as_bytes())
            .and_then(|_| file.flush())
            .and_then(|_| file.sync_data());
        if let Err(source) = written {
            error!(file = %path.display(), event_type, error = %source, "Audit append failed");
            // Reopen on the next append in case the handle is unusable.
            state.current = None;
            return Err(AuditError::Io { path, source });
        }

        state.head = Some(chain_hash);
        state.appended += 1;
        Ok(entry_hash)
    }

    /// Verify every log file in this chain's directory.
    pub fn verify(&self) -> AuditResult<VerifyReport> {
        verify::verify_dir(&self.dir, &self.key)
    }

    /// Logged events matching `filter`, oldest first.
    pub fn events(&self, filter: &EventFilter) -> AuditResult<Vec<AuditEntry>> {
        let mut matched = Vec::new();
        for path in log_files(&self.dir)? {
            let file = File::open(&path).map_err(io_err(&path))?;
            for line in BufReader::new(file).lines() {
                let line = line.map_err(io_err(&path))?;
                if line.trim().is_empty() {
                    continue;
                }
                let Ok(entry) = serde_json::from_str::<AuditEntry>(&line) else {
                    continue;
                };
                if filter
                    .event_type
                    .as_deref()
                    .is_some_and(|t| t != entry.event_type)
                {
                    continue;
                }
                if filter.since.is_some() || filter.until.is_some() {
                    let Some(at) = entry.parsed_timestamp() else {
                        continue;
                    };
                    if filter.since.is_some_and(|s| at < s) || filter.until.is_some_and(|u| at > u) {
                        continue;
                    }
                }
                matched.push(entry);
            }
        }
        if let Some(limit) = filter.limit {
            let skip = matched.len().saturating_sub(limit);
            matched.drain(..skip);
        }
        Ok(matched)
    }

    /// Record shutdown. The chain stays usable; a reopen continues it.
    pub fn close(&self) -> AuditResult<String> {
        let appended = self.appended();
        self.append(
            event::SYSTEM_SHUTDOWN,
            serde_json::json!({ "entries_this_run": appended + 1 }),
        )
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, WriterState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Audit log files in `dir`, oldest month first.
pub(crate) fn log_files(dir: &Path) -> AuditResult<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)
        .map_err(io_err(dir))?
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(is_audit_file_name)
        })
        .collect();
    files.sort();
    Ok(files)
}

fn recover_head(dir: &Path) -> AuditResult<Option<String>> {
    // Walk back past empty files (e.g. created then never written).
    for path in log_files(dir)?.into_iter().rev() {
        let file = File::open(&path).map_err(io_err(&path))?;
        let mut last: Option<(usize, String)> = None;
        for (index, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(io_err(&path))?;
            if !line.trim().is_empty() {
                last = Some((index + 1, line));
            }
        }
        let Some((line_no, line)) = last else {
            continue;
        };
        let entry: AuditEntry =
            serde_json::from_str(&line).map_err(|e| AuditError::CorruptTail {
                path: path.clone(),
                line: line_no,
                message: e.to_string(),
            })?;
        return Ok(Some(entry.chain_hash));
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_append_links_entries() {
        let dir = tempfile::tempdir().unwrap();
        let chain = AuditChain::open(dir.path(), "k").unwrap();
        assert!(chain.head().is_none());

        let first = chain.append("session_created", json!({"id": "a"})).unwrap();
        let head_after_first = chain.head().unwrap();
        assert_eq!(head_after_first, first, "first chain hash equals entry hash");

        chain.append("message_exchanged", json!({"n": 1})).unwrap();
        let entries = chain.events(&EventFilter::default()).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].previous_hash.as_deref(), Some(head_after_first.as_str()));
        assert!(chain.verify().unwrap().valid);
    }

    #[test]
    fn test_reopen_continues_chain() {
        let dir = tempfile::tempdir().unwrap();
        let head = {
            let chain = AuditChain::open(dir.path(), "k").unwrap();
            chain.append("a", json!({})).unwrap();
            chain.append("b", json!({})).unwrap();
            chain.head()
        };
        let reopened = AuditChain::open(dir.path(), "k").unwrap();
        assert_eq!(reopened.head(), head);
        reopened.append("c", json!({})).unwrap();
        let report = reopened.verify().unwrap();
        assert!(report.valid);
        assert_eq!(report.entries_checked, 3);
    }

    #[test]
    fn test_corrupt_tail_fails_open() {
        let dir = tempfile::tempdir().unwrap();
        let name = file_name_for(Utc::now());
        fs::write(dir.path().join(name), "{not json\n").unwrap();
        let err = AuditChain::open(dir.path(), "k").unwrap_err();
        assert!(matches!(err, AuditError::CorruptTail { line: 1, .. }));
    }

    #[test]
    fn test_events_filter_and_limit() {
        let dir = tempfile::tempdir().unwrap();
        let chain = AuditChain::open(dir.path(), "k").unwrap();
        let jan = Utc.with_ymd_and_hms(2026, 1, 10, 0, 0, 0).unwrap();
        let feb = Utc.with_ymd_and_hms(2026, 2, 10, 0, 0, 0).unwrap();
        chain.append_at(jan, "x", json!({"i": 1})).unwrap();
        chain.append_at(jan, "y", json!({"i": 2})).unwrap();
        chain.append_at(feb, "x", json!({"i": 3})).unwrap();

        let xs = chain
            .events(&EventFilter {
                event_type: Some("x".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(xs.len(), 2);

        let since_feb = chain
            .events(&EventFilter {
                since: Some(feb),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(since_feb.len(), 1);
        assert_eq!(since_feb[0].data["i"], 3);

        let last = chain
            .events(&EventFilter {
                limit: Some(1),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(last[0].data["i"], 3);
    }

    #[test]
    fn test_close_logs_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let chain = AuditChain::open(dir.path(), "k").unwrap();
        chain.close().unwrap();
        let entries = chain.events(&EventFilter::default()).unwrap();
        assert_eq!(entries[0].event_type, event::SYSTEM_SHUTDOWN);
    }
}
