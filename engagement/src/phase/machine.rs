//! Per-conversation state machine with a transition ceiling and lifecycle hooks.
//!
//! Every successful transition is recorded, resets the phase entry timestamp
//! and fires `OnExit(prior)` then `OnEnter(target)` hooks in registration
//! order. Rejected transitions return `false`; they are not errors.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use super::Phase;

/// Transitions allowed per conversation before only `Termination` is accepted.
pub const DEFAULT_MAX_TRANSITIONS: u32 = 20;

/// Lifecycle event a hook is registered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "event", content = "phase")]
pub enum LifecycleEvent {
    OnEnter(Phase),
    OnExit(Phase),
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OnEnter(p) => write!(f, "on_enter({p})"),
            Self::OnExit(p) => write!(f, "on_exit({p})"),
        }
    }
}

/// Error raised by a lifecycle hook. Logged, never propagated.
#[derive(Debug, Clone, thiserror::Error)]
#[error("hook failed: {0}")]
pub struct HookError(pub String);

impl HookError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Callback fired on phase entry or exit.
pub type PhaseHook = Box<dyn Fn(&ConversationContext) -> Result<(), HookError> + Send + Sync>;

/// A single recorded phase transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: Phase,
    pub to: Phase,
    pub reason: String,
    pub at: DateTime<Utc>,
}

/// Conversation state owned by one state machine.
///
/// Only the owning [`ConversationStateMachine`] mutates it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationContext {
    conversation_id: String,
    current_phase: Phase,
    previous_phases: Vec<Phase>,
    phase_entered_at: DateTime<Utc>,
    started_at: DateTime<Utc>,
    metadata: HashMap<String, serde_json::Value>,
    extraction_data: HashMap<String, serde_json::Value>,
}

impl ConversationContext {
    fn new(conversation_id: String) -> Self {
        let now = Utc::now();
        Self {
            conversation_id,
            current_phase: Phase::Idle,
            previous_phases: Vec::new(),
            phase_entered_at: now,
            started_at: now,
            metadata: HashMap::new(),
            extraction_data: HashMap::new(),
        }
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub fn current_phase(&self) -> Phase {
        self.current_phase
    }

    /// Phases left, oldest first.
    pub fn previous_phases(&self) -> &[Phase] {
        &self.previous_phases
    }

    pub fn phase_entered_at(&self) -> DateTime<Utc> {
        self.phase_entered_at
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn metadata(&self) -> &HashMap<String, serde_json::Value> {
        &self.metadata
    }

    pub fn extraction_data(&self) -> &HashMap<String, serde_json::Value> {
        &self.extraction_data
    }

    /// Number of accumulated extraction facts.
    ///
    /// Array values count per element, every other non-null value counts once.
    pub fn extraction_fact_count(&self) -> usize {
        self.extraction_data
            .values()
            .map(|v| match v {
                serde_json::Value::Null => 0,
                serde_json::Value::Array(items) => items.len(),
                _ => 1,
            })
            .sum()
    }

    /// Seconds since the conversation started, measured at `now`.
    pub fn duration_secs_at(&self, now: DateTime<Utc>) -> i64 {
        (now - self.started_at).num_seconds().max(0)
    }
}

/// Serializable view of a machine for reports and status endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MachineSnapshot {
    pub conversation_id: String,
    pub current_phase: Phase,
    pub previous_phases: Vec<Phase>,
    pub transition_count: u32,
    pub time_in_phase_secs: i64,
    pub metadata: HashMap<String, serde_json::Value>,
    pub extraction_data: HashMap<String, serde_json::Value>,
}

/// Phase state machine for one conversation.
pub struct ConversationStateMachine {
    context: ConversationContext,
    transition_count: u32,
    max_transitions: u32,
    history: Vec<TransitionRecord>,
    hooks: HashMap<LifecycleEvent, Vec<PhaseHook>>,
}

impl fmt::Debug for ConversationStateMachine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversationStateMachine")
            .field("context", &self.context)
            .field("transition_count", &self.transition_count)
            .field("max_transitions", &self.max_transitions)
            .field("hooks", &self.hooks.values().map(Vec::len).sum::<usize>())
            .finish()
    }
}

impl ConversationStateMachine {
    pub fn new(conversation_id: impl Into<String>) -> Self {
        Self::with_max_transitions(conversation_id, DEFAULT_MAX_TRANSITIONS)
    }

    pub fn with_max_transitions(conversation_id: impl Into<String>, max_transitions: u32) -> Self {
        Self {
            context: ConversationContext::new(conversation_id.into()),
            transition_count: 0,
            max_transitions,
            history: Vec::new(),
            hooks: HashMap::new(),
        }
    }

    pub fn context(&self) -> &ConversationContext {
        &self.context
    }

    pub fn current_phase(&self) -> Phase {
        self.context.current_phase
    }

    pub fn is_terminal(&self) -> bool {
        self.context.current_phase.is_terminal()
    }

    /// Whether intelligence extraction should run in the current phase.
    pub fn should_extract(&self) -> bool {
        self.context.current_phase.is_extracting()
    }

    pub fn transition_count(&self) -> u32 {
        self.transition_count
    }

    pub fn max_transitions(&self) -> u32 {
        self.max_transitions
    }

    pub fn history(&self) -> &[TransitionRecord] {
        &self.history
    }

    /// Whether a transition to `target` would be accepted right now.
    pub fn can_transition(&self, target: Phase) -> bool {
        let current = self.context.current_phase;
        if current.is_terminal() {
            return false;
        }
        if self.transition_count >= self.max_transitions {
            return target == Phase::Termination;
        }
        current.allows(target)
    }

    /// Attempt a transition. Returns `false` and changes nothing when illegal.
    pub fn transition(&mut self, target: Phase, reason: &str) -> bool {
        if !self.can_transition(target) {
            debug!(
                conversation_id = %self.context.conversation_id,
                from = %self.context.current_phase,
                to = %target,
                transition_count = self.transition_count,
                "Transition rejected"
            );
            return false;
        }
        self.apply(target, reason);
        true
    }

    /// Move to `Termination` from any non-terminal phase, bypassing the table.
    ///
    /// Returns `false` when already terminal.
    pub fn force_terminate(&mut self, reason: &str) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.apply(Phase::Termination, &format!("forced: {reason}"));
        true
    }

    /// Register a hook; hooks for the same event fire in registration order.
    pub fn register_hook(&mut self, event: LifecycleEvent, hook: PhaseHook) {
        self.hooks.entry(event).or_default().push(hook);
    }

    pub fn set_metadata(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.context.metadata.insert(key.into(), value);
    }

    /// Merge an extraction fact. Arrays are appended to existing arrays;
    /// anything else replaces the previous value.
    pub fn record_extraction(&mut self, key: impl Into<String>, value: serde_json::Value) {
        use serde_json::Value;
        let key = key.into();
        match (self.context.extraction_data.get_mut(&key), value) {
            (Some(Value::Array(existing)), Value::Array(new_items)) => existing.extend(new_items),
            (_, value) => {
                self.context.extraction_data.insert(key, value);
            }
        }
    }

    pub fn snapshot(&self) -> MachineSnapshot {
        MachineSnapshot {
            conversation_id: self.context.conversation_id.clone(),
            current_phase: self.context.current_phase,
            previous_phases: self.context.previous_phases.clone(),
            transition_count: self.transition_count,
            time_in_phase_secs: (Utc::now() - self.context.phase_entered_at)
                .num_seconds()
                .max(0),
            metadata: self.context.metadata.clone(),
            extraction_data: self.context.extraction_data.clone(),
        }
    }

    fn apply(&mut self, target: Phase, reason: &str) {
        let from = self.context.current_phase;
        self.run_hooks(LifecycleEvent::OnExit(from));

        let now = Utc::now();
        self.context.previous_phases.push(from);
        self.context.current_phase = target;
        self.context.phase_entered_at = now;
        self.transition_count += 1;
        self.history.push(TransitionRecord {
            from,
            to: target,
            reason: reason.to_string(),
            at: now,
        });

        self.run_hooks(LifecycleEvent::OnEnter(target));

        info!(
            conversation_id = %self.context.conversation_id,
            from = %from,
            to = %target,
            reason,
            transition_count = self.transition_count,
            "Phase transition"
        );
    }

    fn run_hooks(&self, event: LifecycleEvent) {
        let Some(hooks) = self.hooks.get(&event) else {
            return;
        };
        for (index, hook) in hooks.iter().enumerate() {
            if let Err(e) = hook(&self.context) {
                error!(
                    conversation_id = %self.context.conversation_id,
                    event = %event,
                    hook_index = index,
                    error = %e,
                    "Lifecycle hook failed"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn machine_in(phase_path: &[Phase]) -> ConversationStateMachine {
        let mut m = ConversationStateMachine::new("conv-1");
        for &p in phase_path {
            assert!(m.transition(p, "setup"), "setup transition to {p} failed");
        }
        m
    }

    #[test]
    fn test_new_machine_starts_idle() {
        let m = ConversationStateMachine::new("conv-1");
        assert_eq!(m.current_phase(), Phase::Idle);
        assert_eq!(m.transition_count(), 0);
        assert!(!m.should_extract());
    }

    #[test]
    fn test_legal_transition_records_history() {
        let mut m = ConversationStateMachine::new("conv-1");
        assert!(m.transition(Phase::InitialContact, "first message"));
        assert_eq!(m.current_phase(), Phase::InitialContact);
        assert_eq!(m.context().previous_phases(), &[Phase::Idle]);
        assert_eq!(m.history().len(), 1);
        assert_eq!(m.history()[0].reason, "first message");
    }

    #[test]
    fn test_illegal_transition_changes_nothing() {
        let mut m = machine_in(&[Phase::InitialContact]);
        let entered = m.context().phase_entered_at();
        assert!(!m.transition(Phase::Extraction, "skip ahead"));
        assert_eq!(m.current_phase(), Phase::InitialContact);
        assert_eq!(m.transition_count(), 1);
        assert_eq!(m.context().phase_entered_at(), entered);
    }

    #[test]
    fn test_ceiling_allows_only_termination() {
        let mut m = ConversationStateMachine::with_max_transitions("conv-1", 3);
        assert!(m.transition(Phase::InitialContact, "a"));
        assert!(m.transition(Phase::TrustBuilding, "b"));
        assert!(m.transition(Phase::Extraction, "c"));
        assert!(!m.can_transition(Phase::Extraction));
        assert!(!m.transition(Phase::Extraction, "again"));
        assert!(m.transition(Phase::Termination, "done"));
        assert!(m.is_terminal());
    }

    #[test]
    fn test_terminal_rejects_everything() {
        let mut m = machine_in(&[Phase::InitialContact, Phase::Termination]);
        for &p in Phase::all() {
            assert!(!m.transition(p, "after end"));
        }
        assert!(!m.force_terminate("again"));
    }

    #[test]
    fn test_force_terminate_from_idle() {
        let mut m = ConversationStateMachine::new("conv-1");
        assert!(m.force_terminate("operator request"));
        assert_eq!(m.current_phase(), Phase::Termination);
        assert!(m.history()[0].reason.contains("operator request"));
    }

    #[test]
    fn test_hooks_fire_exit_then_enter_in_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut m = machine_in(&[Phase::InitialContact]);

        for label in ["exit-1", "exit-2"] {
            let log = Arc::clone(&log);
            m.register_hook(
                LifecycleEvent::OnExit(Phase::InitialContact),
                Box::new(move |_| {
                    log.lock().unwrap().push(label);
                    Ok(())
                }),
            );
        }
        let enter_log = Arc::clone(&log);
        m.register_hook(
            LifecycleEvent::OnEnter(Phase::SuspicionArousal),
            Box::new(move |ctx| {
                assert_eq!(ctx.current_phase(), Phase::SuspicionArousal);
                enter_log.lock().unwrap().push("enter");
                Ok(())
            }),
        );

        assert!(m.transition(Phase::SuspicionArousal, "signals"));
        assert_eq!(*log.lock().unwrap(), vec!["exit-1", "exit-2", "enter"]);
    }

    #[test]
    fn test_failing_hook_does_not_abort_transition() {
        let mut m = machine_in(&[Phase::InitialContact]);
        m.register_hook(
            LifecycleEvent::OnEnter(Phase::TrustBuilding),
            Box::new(|_| Err(HookError::new("boom"))),
        );
        assert!(m.transition(Phase::TrustBuilding, "rapport"));
        assert_eq!(m.current_phase(), Phase::TrustBuilding);
    }

    #[test]
    fn test_record_extraction_appends_arrays() {
        let mut m = ConversationStateMachine::new("conv-1");
        m.record_extraction("iocs", serde_json::json!(["a"]));
        m.record_extraction("iocs", serde_json::json!(["b", "c"]));
        m.record_extraction("scam_type", serde_json::json!("lottery"));
        assert_eq!(m.context().extraction_fact_count(), 4);
    }

    #[test]
    fn test_snapshot_reflects_state() {
        let m = machine_in(&[Phase::InitialContact, Phase::SuspicionArousal]);
        let snap = m.snapshot();
        assert_eq!(snap.current_phase, Phase::SuspicionArousal);
        assert_eq!(snap.transition_count, 2);
        assert_eq!(
            snap.previous_phases,
            vec![Phase::Idle, Phase::InitialContact]
        );
    }
}
