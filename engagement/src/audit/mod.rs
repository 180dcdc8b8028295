//! Tamper-evident audit chain.
//!
//! Append-only NDJSON, one entry per line, rotated monthly
//! (`audit_YYYYMM.log`). Each entry commits to its own content
//! (`entry_hash`) and, through a keyed hash, to every entry before it
//! (`chain_hash`). The chain continues across rotated files and across
//! process restarts.
//!
//! Verification replays the chain and reports the first position where the
//! recomputed hashes or linkage disagree. It never repairs anything.

pub mod chain;
pub mod hash;
pub mod verify;

pub use chain::{AuditChain, EventFilter};
pub use verify::{verify_dir, verify_file, BreakKind, ChainBreak, VerifyReport};

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default HMAC key for chain hashes when none is configured.
pub const DEFAULT_CHAIN_KEY: &str = "decoy-audit-chain-v1";

/// Event type names written by the engagement runtime.
pub mod event {
    pub const SESSION_CREATED: &str = "session_created";
    pub const CONSTITUTIONAL_CHECK: &str = "constitutional_check";
    pub const ROUTING_DECISION: &str = "routing_decision";
    pub const REASONING_FALLBACK: &str = "reasoning_fallback";
    pub const PHASE_TRANSITION: &str = "phase_transition";
    pub const INTELLIGENCE_EXTRACTED: &str = "intelligence_extracted";
    pub const MESSAGE_EXCHANGED: &str = "message_exchanged";
    pub const SESSION_TERMINATED: &str = "session_terminated";
    pub const SESSION_ARCHIVED: &str = "session_archived";
    pub const SYSTEM_SHUTDOWN: &str = "system_shutdown";
}

#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    #[error("audit I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("audit serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("unreadable audit tail in {path} line {line}: {message}")]
    CorruptTail {
        path: PathBuf,
        line: usize,
        message: String,
    },

    #[error("invalid audit chain key")]
    InvalidKey,
}

pub type AuditResult<T> = Result<T, AuditError>;

pub(crate) fn io_err(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> AuditError {
    let path = path.into();
    move |source| AuditError::Io { path, source }
}

/// One line of the audit log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// RFC 3339, microsecond precision, UTC.
    pub timestamp: String,
    pub event_type: String,
    pub data: serde_json::Value,
    /// `chain_hash` of the preceding entry; `None` only for the first entry ever.
    pub previous_hash: Option<String>,
    pub entry_hash: String,
    pub chain_hash: String,
}

impl AuditEntry {
    pub fn parsed_timestamp(&self) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(&self.timestamp)
            .ok()
            .map(|t| t.with_timezone(&Utc))
    }
}

/// Log file name for the month containing `at`.
pub fn file_name_for(at: DateTime<Utc>) -> String {
    format!("audit_{}.log", at.format("%Y%m"))
}

pub(crate) fn is_audit_file_name(name: &str) -> bool {
    name.len() == "audit_YYYYMM.log".len()
        && name.starts_with("audit_")
        && name.ends_with(".log")
        && name[6..12].bytes().all(|b| b.is_ascii_digit())
}
