//! Phase policy: proposes the next phase from per-message analysis.
//!
//! Pure and deterministic. The state machine still has the final word:
//! a proposal the table or ceiling rejects is simply not applied.

use serde::{Deserialize, Serialize};

use super::Phase;
use crate::patterns::{MessageAnalysis, PatternCategory};

/// Thresholds for phase advancement.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Minimum financial-pattern confidence treated as a payment request.
    pub payment_request_confidence: f64,
    /// Minimum confidence for a match to count as a scam signal.
    pub signal_confidence: f64,
    /// Benign inbound messages before initial contact turns into rapport.
    pub trust_after_messages: u32,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            payment_request_confidence: 0.6,
            signal_confidence: 0.5,
            trust_after_messages: 2,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PhasePolicy {
    config: PolicyConfig,
}

impl PhasePolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: PolicyConfig) -> Self {
        Self { config }
    }

    /// Proposal after an inbound message has been analysed.
    ///
    /// `messages_seen` counts inbound messages including this one.
    pub fn after_message(
        &self,
        current: Phase,
        analysis: &MessageAnalysis,
        messages_seen: u32,
    ) -> Option<(Phase, String)> {
        let signals = self.scam_signals(analysis);
        let payment = self.payment_request(analysis);

        match current {
            Phase::Idle => Some((Phase::InitialContact, "inbound contact".to_string())),
            Phase::InitialContact if !signals.is_empty() => Some((
                Phase::SuspicionArousal,
                format!("scam signals: {}", signals.join(", ")),
            )),
            Phase::InitialContact if messages_seen >= self.config.trust_after_messages => Some((
                Phase::TrustBuilding,
                format!("{messages_seen} benign messages"),
            )),
            Phase::TrustBuilding if payment => Some((
                Phase::Extraction,
                "payment details requested".to_string(),
            )),
            Phase::TrustBuilding if !signals.is_empty() => Some((
                Phase::SuspicionArousal,
                format!("scam signals: {}", signals.join(", ")),
            )),
            Phase::SuspicionArousal if payment => Some((
                Phase::Extraction,
                "payment details requested".to_string(),
            )),
            Phase::SuspicionArousal if analysis.matches.is_empty() => {
                Some((Phase::TrustBuilding, "no scam signals".to_string()))
            }
            _ => None,
        }
    }

    /// Proposal after an extraction pass produced `new_iocs` fresh indicators.
    pub fn after_extraction(&self, current: Phase, new_iocs: usize) -> Option<(Phase, String)> {
        if new_iocs == 0 {
            return None;
        }
        match current {
            Phase::SuspicionArousal | Phase::Extraction => Some((
                Phase::Extraction,
                format!("{new_iocs} new indicators"),
            )),
            _ => None,
        }
    }

    fn scam_signals(&self, analysis: &MessageAnalysis) -> Vec<String> {
        let mut names: Vec<String> = analysis
            .matches
            .iter()
            .filter(|m| m.confidence >= self.config.signal_confidence)
            .filter(|m| m.category.is_scam_signal())
            .map(|m| m.pattern_name.clone())
            .collect();
        names.dedup();
        names
    }

    fn payment_request(&self, analysis: &MessageAnalysis) -> bool {
        analysis.matches.iter().any(|m| {
            m.category == PatternCategory::Financial
                && m.confidence >= self.config.payment_request_confidence
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patterns::PatternMatcher;

    fn analyze(text: &str) -> MessageAnalysis {
        PatternMatcher::new().analyze_message(text)
    }

    #[test]
    fn test_idle_moves_to_initial_contact() {
        let policy = PhasePolicy::new();
        let (next, _) = policy
            .after_message(Phase::Idle, &analyze("hello"), 1)
            .unwrap();
        assert_eq!(next, Phase::InitialContact);
    }

    #[test]
    fn test_signals_raise_suspicion() {
        let policy = PhasePolicy::new();
        let analysis = analyze("Your account will be suspended, contact the police immediately");
        let (next, reason) = policy
            .after_message(Phase::InitialContact, &analysis, 1)
            .unwrap();
        assert_eq!(next, Phase::SuspicionArousal);
        assert!(reason.starts_with("scam signals"));
    }

    #[test]
    fn test_benign_contact_builds_trust_after_threshold() {
        let policy = PhasePolicy::new();
        let benign = analyze("Good morning, how is your day going?");
        assert!(policy.after_message(Phase::InitialContact, &benign, 1).is_none());
        let (next, _) = policy
            .after_message(Phase::InitialContact, &benign, 2)
            .unwrap();
        assert_eq!(next, Phase::TrustBuilding);
    }

    #[test]
    fn test_payment_request_moves_to_extraction() {
        let policy = PhasePolicy::new();
        let analysis = analyze("Please send the payment by gift card today");
        let (next, _) = policy
            .after_message(Phase::TrustBuilding, &analysis, 4)
            .unwrap();
        assert_eq!(next, Phase::Extraction);
    }

    #[test]
    fn test_extraction_only_reenters_on_new_indicators() {
        let policy = PhasePolicy::new();
        assert!(policy.after_extraction(Phase::Extraction, 0).is_none());
        let (next, _) = policy.after_extraction(Phase::Extraction, 2).unwrap();
        assert_eq!(next, Phase::Extraction);
        assert!(policy.after_extraction(Phase::TrustBuilding, 2).is_none());
    }
}
