use std::collections::{HashSet, VecDeque};

use chrono::{DateTime, Utc};
use engagement::extraction::{ExtractedIoc, TacticMatch};
use engagement::phase::{ConversationStateMachine, LifecycleEvent, Phase};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::personas::PersonaDescriptor;
use crate::reasoning::Exchange;

/// One decoy conversation. Lives behind a `tokio::sync::Mutex` in the engine.
pub struct Session {
    pub(crate) id: String,
    pub(crate) source: String,
    pub(crate) persona: PersonaDescriptor,
    pub(crate) machine: ConversationStateMachine,
    pub(crate) history: VecDeque<Exchange>,
    history_limit: usize,
    /// Every inbound message, for end-of-conversation classification.
    pub(crate) inbound: Vec<String>,
    pub(crate) iocs: Vec<ExtractedIoc>,
    pub(crate) tactics: Vec<TacticMatch>,
    pub(crate) messages: u32,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) last_activity: DateTime<Utc>,
}

impl Session {
    pub(crate) fn new(
        id: String,
        source: &str,
        persona: PersonaDescriptor,
        history_limit: usize,
    ) -> Self {
        let mut machine = ConversationStateMachine::new(id.clone());
        let hook_id = id.clone();
        machine.register_hook(
            LifecycleEvent::OnEnter(Phase::Extraction),
            Box::new(move |ctx| {
                if ctx.previous_phases().last() != Some(&Phase::Extraction) {
                    info!(conversation_id = %hook_id, "Conversation entered extraction");
                }
                Ok(())
            }),
        );

        let now = Utc::now();
        Self {
            id,
            source: source.to_string(),
            persona,
            machine,
            history: VecDeque::with_capacity(history_limit),
            history_limit: history_limit.max(1),
            inbound: Vec::new(),
            iocs: Vec::new(),
            tactics: Vec::new(),
            messages: 0,
            created_at: now,
            last_activity: now,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn phase(&self) -> Phase {
        self.machine.current_phase()
    }

    pub(crate) fn push_exchange(&mut self, inbound: &str, outbound: &str) {
        if self.history.len() == self.history_limit {
            self.history.pop_front();
        }
        self.history.push_back(Exchange {
            inbound: inbound.to_string(),
            outbound: outbound.to_string(),
        });
    }

    /// Keep tactic matches whose name this session has not recorded yet.
    pub(crate) fn new_tactics(&self, found: Vec<TacticMatch>) -> Vec<TacticMatch> {
        let known: HashSet<&str> = self.tactics.iter().map(|t| t.tactic.as_str()).collect();
        found
            .into_iter()
            .filter(|t| !known.contains(t.tactic.as_str()))
            .collect()
    }

    pub(crate) fn idle_secs_at(&self, now: DateTime<Utc>) -> i64 {
        (now - self.last_activity).num_seconds().max(0)
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            conversation_id: self.id.clone(),
            source: self.source.clone(),
            persona: self.persona.id.clone(),
            phase: self.phase(),
            messages: self.messages,
            transitions: self.machine.transition_count(),
            iocs: self.iocs.len(),
            tactics: self.tactics.len(),
            terminal: self.machine.is_terminal(),
            created_at: self.created_at,
            last_activity: self.last_activity,
        }
    }
}

/// Operator view of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub conversation_id: String,
    pub source: String,
    pub persona: String,
    pub phase: Phase,
    pub messages: u32,
    pub transitions: u32,
    pub iocs: usize,
    pub tactics: usize,
    pub terminal: bool,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::personas::PersonaRegistry;

    fn session(limit: usize) -> Session {
        let registry = PersonaRegistry::default();
        let persona = registry.default_persona().unwrap().clone();
        Session::new("conv-1".into(), "incoming_sms", persona, limit)
    }

    #[test]
    fn test_history_is_capped() {
        let mut s = session(3);
        for i in 0..5 {
            s.push_exchange(&format!("in {i}"), &format!("out {i}"));
        }
        assert_eq!(s.history.len(), 3);
        assert_eq!(s.history.front().unwrap().inbound, "in 2");
    }

    #[test]
    fn test_new_tactics_filters_known_names() {
        let mut s = session(10);
        let tactic = |name: &str| TacticMatch {
            tactic: name.into(),
            category: engagement::extraction::TacticCategory::Urgency,
            confidence: 0.8,
            indicators: vec!["now".into()],
        };
        s.tactics.push(tactic("time_pressure"));
        let fresh = s.new_tactics(vec![tactic("time_pressure"), tactic("fear_of_loss")]);
        assert_eq!(fresh.len(), 1);
        assert_eq!(fresh[0].tactic, "fear_of_loss");
    }

    #[test]
    fn test_info_reflects_machine() {
        let mut s = session(10);
        assert!(s.machine.transition(Phase::InitialContact, "inbound"));
        let info = s.info();
        assert_eq!(info.phase, Phase::InitialContact);
        assert_eq!(info.transitions, 1);
        assert_eq!(info.persona, "elderly_coimbatore");
        assert!(!info.terminal);
    }
}
