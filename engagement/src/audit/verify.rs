//! Chain replay and tamper detection.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::chain::log_files;
use super::hash::{chain_hash, entry_hash};
use super::{io_err, AuditEntry, AuditResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakKind {
    /// Line is not a valid entry.
    Unparseable,
    /// `previous_hash` does not match the preceding entry's `chain_hash`.
    LinkageMismatch,
    /// Stored `entry_hash` does not match the entry's content.
    EntryHashMismatch,
    /// Stored `chain_hash` does not match the keyed recomputation.
    ChainHashMismatch,
}

/// First point where the chain fails to verify.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainBreak {
    pub file: PathBuf,
    /// Zero-based entry index across everything verified in this run.
    pub position: u64,
    /// One-based line number within `file`.
    pub line: usize,
    pub kind: BreakKind,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerifyReport {
    pub valid: bool,
    pub entries_checked: u64,
    pub files_checked: usize,
    /// `chain_hash` of the last verified entry.
    pub head: Option<String>,
    pub failure: Option<ChainBreak>,
}

/// What the next entry's `previous_hash` must be.
enum Expect {
    /// Standalone file: its first entry may continue an unseen predecessor.
    Anything,
    Exactly(Option<String>),
}

struct Replay<'a> {
    key: &'a [u8],
    expect: Expect,
    position: u64,
    files: usize,
}

impl Replay<'_> {
    fn file(&mut self, path: &Path) -> AuditResult<Option<ChainBreak>> {
        self.files += 1;
        let file = File::open(path).map_err(io_err(path))?;
        for (index, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(io_err(path))?;
            if line.trim().is_empty() {
                continue;
            }
            let fail = |kind: BreakKind, detail: String| ChainBreak {
                file: path.to_path_buf(),
                position: self.position,
                line: index + 1,
                kind,
                detail,
            };

            let entry: AuditEntry = match serde_json::from_str(&line) {
                Ok(e) => e,
                Err(e) => return Ok(Some(fail(BreakKind::Unparseable, e.to_string()))),
            };

            if let Expect::Exactly(expected) = &self.expect {
                if *expected != entry.previous_hash {
                    return Ok(Some(fail(
                        BreakKind::LinkageMismatch,
                        format!(
                            "previous_hash {:?} does not follow {:?}",
                            entry.previous_hash, expected
                        ),
                    )));
                }
            }

            let recomputed = entry_hash(
                &entry.timestamp,
                &entry.event_type,
                &entry.data,
                entry.previous_hash.as_deref(),
            );
            if recomputed != entry.entry_hash {
                return Ok(Some(fail(
                    BreakKind::EntryHashMismatch,
                    format!("stored {} recomputed {}", entry.entry_hash, recomputed),
                )));
            }

            let chained = chain_hash(self.key, &recomputed, entry.previous_hash.as_deref())?;
            if chained != entry.chain_hash {
                return Ok(Some(fail(
                    BreakKind::ChainHashMismatch,
                    format!("stored {} recomputed {}", entry.chain_hash, chained),
                )));
            }

            self.expect = Expect::Exactly(Some(entry.chain_hash));
            self.position += 1;
        }
        Ok(None)
    }

    fn report(self, failure: Option<ChainBreak>) -> VerifyReport {
        let head = match (&failure, self.expect) {
            (None, Expect::Exactly(head)) => head,
            _ => None,
        };
        VerifyReport {
            valid: failure.is_none(),
            entries_checked: self.position,
            files_checked: self.files,
            head,
            failure,
        }
    }
}

/// Verify one log file on its own.
///
/// The first entry's `previous_hash` is taken as given, since it may point
/// into an earlier month's file.
pub fn verify_file(path: &Path, key: &[u8]) -> AuditResult<VerifyReport> {
    let mut replay = Replay {
        key,
        expect: Expect::Anything,
        position: 0,
        files: 0,
    };
    let failure = replay.file(path)?;
    let report = replay.report(failure);
    log_report(&report);
    Ok(report)
}

/// Verify every monthly log in `dir` as one continuous chain.
pub fn verify_dir(dir: &Path, key: &[u8]) -> AuditResult<VerifyReport> {
    let mut replay = Replay {
        key,
        expect: Expect::Exactly(None),
        position: 0,
        files: 0,
    };
    let mut failure = None;
    for path in log_files(dir)? {
        failure = replay.file(&path)?;
        if failure.is_some() {
            break;
        }
    }
    let report = replay.report(failure);
    log_report(&report);
    Ok(report)
}

fn log_report(report: &VerifyReport) {
    match &report.failure {
        None => info!(
            entries = report.entries_checked,
            files = report.files_checked,
            "Audit chain verified"
        ),
        Some(b) => warn!(
            file = %b.file.display(),
            position = b.position,
            line = b.line,
            kind = ?b.kind,
            "Audit chain verification failed"
        ),
    }
}
