//! Intelligence extraction: indicators, tactics and conversation profiling.
//!
//! [`ExtractionEngine`] owns the process-wide dedup set: an indicator that
//! has been reported once, in any conversation, is silently dropped after.
//! Callers invoke it only while the state machine says extraction is active.

pub mod classifier;
pub mod iocs;
pub mod signals;
pub mod tactics;

pub use classifier::{OrganizationLevel, ScamCategory, TacticClassifier, TacticProfile};
pub use iocs::{ExtractedIoc, IocKind};
pub use signals::{ExchangeSignals, LanguageHint, Sentiment};
pub use tactics::{TacticCategory, TacticMatch};

use std::collections::HashSet;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Everything one extraction pass over a message produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionResult {
    /// Indicators not seen before in this process.
    pub iocs: Vec<ExtractedIoc>,
    pub tactics: Vec<TacticMatch>,
    pub signals: ExchangeSignals,
}

#[derive(Debug, Default)]
pub struct ExtractionEngine {
    seen: Mutex<HashSet<String>>,
}

impl ExtractionEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// New indicators in `text`, attributed to `conversation_id`.
    ///
    /// Check-and-insert against the dedup set is atomic per indicator.
    pub fn extract_iocs(&self, text: &str, conversation_id: &str) -> Vec<ExtractedIoc> {
        let candidates = iocs::scan(text, conversation_id);
        let total = candidates.len();
        let fresh: Vec<ExtractedIoc> = {
            let mut seen = self.seen.lock().unwrap_or_else(|e| e.into_inner());
            candidates
                .into_iter()
                .filter(|ioc| seen.insert(ioc.dedup_key.clone()))
                .collect()
        };

        if !fresh.is_empty() {
            info!(
                conversation_id,
                new = fresh.len(),
                duplicates = total - fresh.len(),
                kinds = ?fresh.iter().map(|i| i.kind.as_str()).collect::<Vec<_>>(),
                "Extracted indicators"
            );
        } else if total > 0 {
            debug!(conversation_id, duplicates = total, "Only known indicators in message");
        }
        fresh
    }

    pub fn extract_tactics(&self, text: &str) -> Vec<TacticMatch> {
        tactics::detect(text)
    }

    /// Indicators, tactics and signals for one inbound message.
    pub fn extract(&self, text: &str, conversation_id: &str) -> ExtractionResult {
        ExtractionResult {
            iocs: self.extract_iocs(text, conversation_id),
            tactics: self.extract_tactics(text),
            signals: signals::analyze(text),
        }
    }

    /// Distinct indicators seen over the engine's lifetime.
    pub fn seen_count(&self) -> usize {
        self.seen.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dedup_across_conversations() {
        let engine = ExtractionEngine::new();
        let first = engine.extract_iocs("call 9876543210", "conv-a");
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].source_conversation, "conv-a");
        let second = engine.extract_iocs("my number is +919876543210", "conv-b");
        assert!(second.is_empty());
        assert_eq!(engine.seen_count(), 1);
    }

    #[test]
    fn test_extract_bundles_tactics_and_signals() {
        let engine = ExtractionEngine::new();
        let result = engine.extract("Police will arrest you. Pay to scam@ybl immediately", "c");
        assert_eq!(result.iocs.len(), 1);
        assert_eq!(result.iocs[0].kind, IocKind::Upi);
        assert!(result.tactics.iter().any(|t| t.tactic == "police_threat"));
        assert_eq!(result.signals.sentiment, Sentiment::Threatening);
    }
}
