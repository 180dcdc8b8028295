//! Engagement core for a decoy conversational agent.
//!
//! Everything here is deterministic: no network, no model calls.
//!
//! - [`phase`]: conversation phases, the transition table, the per-conversation
//!   state machine with lifecycle hooks, and the phase policy
//! - [`patterns`]: regex classifier for inbound messages and the fast responder
//! - [`router`]: fast-vs-escalate routing under latency budgets, plus the
//!   circuit breaker used for reasoning backends
//! - [`extraction`]: indicator extraction with process-wide dedup, tactic
//!   detection, scam profiling
//! - [`guard`]: constitutional gates on source, input, output and conversation state
//! - [`audit`]: hash-chained, keyed, monthly-rotated audit log with verification
//! - [`persona`]: the persona facts the core needs

#![allow(clippy::uninlined_format_args)]

pub mod audit;
pub mod extraction;
pub mod guard;
pub mod patterns;
pub mod persona;
pub mod phase;
pub mod router;

pub use audit::{AuditChain, AuditEntry, AuditError, AuditResult, VerifyReport};
pub use extraction::{ExtractedIoc, ExtractionEngine, ExtractionResult, IocKind, TacticMatch};
pub use guard::{
    CheckStage, ComplianceStatus, ConstitutionalCheck, ConstitutionalGuard, GuardConfig,
    GuardError, GuardReport, Severity, ViolationCategory,
};
pub use patterns::{FastReply, FastResponder, MessageAnalysis, PatternCategory, PatternMatch, PatternMatcher};
pub use persona::PersonaProfile;
pub use phase::{ConversationContext, ConversationStateMachine, LifecycleEvent, Phase, PhasePolicy};
pub use router::{BrainRouter, RouterConfig, RoutingDecision, Strategy};
