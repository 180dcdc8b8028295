//! Conversation phases: the engagement lifecycle of a single conversation.
//!
//! ```text
//! Idle ──► InitialContact ──► TrustBuilding ◄──► SuspicionArousal
//!                │                  │                  │
//!                │                  └──► Extraction ◄──┘
//!                │                          │  ▲
//!                │                          └──┘ (re-entry)
//!                └───────────► Termination ◄── (any non-idle phase)
//! ```
//!
//! The transition table is fixed. [`machine::ConversationStateMachine`]
//! enforces it together with a per-conversation transition ceiling, and
//! [`policy::PhasePolicy`] proposes the next phase from message analysis.

pub mod machine;
pub mod policy;

pub use machine::{
    ConversationContext, ConversationStateMachine, HookError, LifecycleEvent, MachineSnapshot,
    PhaseHook, TransitionRecord, DEFAULT_MAX_TRANSITIONS,
};
pub use policy::{PhasePolicy, PolicyConfig};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Conversational phase of an engagement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Session created, no inbound contact handled yet.
    Idle,
    /// First exchanges with the contacting party.
    InitialContact,
    /// Persona is building rapport.
    TrustBuilding,
    /// Scam signals observed; persona plays along cautiously.
    SuspicionArousal,
    /// Actively steering the conversation toward payment and contact details.
    Extraction,
    /// Engagement over. Absorbing.
    Termination,
}

impl Phase {
    /// All phases in lifecycle order.
    pub fn all() -> &'static [Phase] {
        &[
            Phase::Idle,
            Phase::InitialContact,
            Phase::TrustBuilding,
            Phase::SuspicionArousal,
            Phase::Extraction,
            Phase::Termination,
        ]
    }

    /// Legal successors according to the fixed transition table.
    pub fn successors(self) -> &'static [Phase] {
        use Phase::*;
        match self {
            Idle => &[InitialContact],
            InitialContact => &[TrustBuilding, SuspicionArousal, Termination],
            TrustBuilding => &[SuspicionArousal, Extraction, Termination],
            SuspicionArousal => &[TrustBuilding, Extraction, Termination],
            Extraction => &[Extraction, Termination],
            Termination => &[],
        }
    }

    /// Whether `target` is listed in this phase's successors.
    pub fn allows(self, target: Phase) -> bool {
        self.successors().contains(&target)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Termination)
    }

    /// Phases during which intelligence extraction runs.
    pub fn is_extracting(self) -> bool {
        matches!(self, Phase::SuspicionArousal | Phase::Extraction)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::InitialContact => write!(f, "initial_contact"),
            Self::TrustBuilding => write!(f, "trust_building"),
            Self::SuspicionArousal => write!(f, "suspicion_arousal"),
            Self::Extraction => write!(f, "extraction"),
            Self::Termination => write!(f, "termination"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_termination_has_no_successors() {
        assert!(Phase::Termination.successors().is_empty());
        assert!(Phase::Termination.is_terminal());
    }

    #[test]
    fn test_idle_only_reaches_initial_contact() {
        for &target in Phase::all() {
            assert_eq!(Phase::Idle.allows(target), target == Phase::InitialContact);
        }
    }

    #[test]
    fn test_extraction_reenters_itself() {
        assert!(Phase::Extraction.allows(Phase::Extraction));
        assert!(!Phase::Extraction.allows(Phase::TrustBuilding));
    }

    #[test]
    fn test_extracting_phases() {
        let extracting: Vec<Phase> = Phase::all()
            .iter()
            .copied()
            .filter(|p| p.is_extracting())
            .collect();
        assert_eq!(extracting, vec![Phase::SuspicionArousal, Phase::Extraction]);
    }

    #[test]
    fn test_display_matches_serde() {
        let json = serde_json::to_string(&Phase::SuspicionArousal).unwrap();
        assert_eq!(json, format!("\"{}\"", Phase::SuspicionArousal));
    }
}
