//! Prompt assembly for escalated replies.

use std::collections::VecDeque;
use std::fmt::Write as _;

use engagement::phase::Phase;
use engagement::router::extraction_goals;
use serde::{Deserialize, Serialize};

use crate::personas::PersonaDescriptor;

/// Exchanges included in a prompt.
pub const PROMPT_EXCHANGES: usize = 5;

/// One inbound message and the reply sent to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exchange {
    pub inbound: String,
    pub outbound: String,
}

/// Builds the user prompt for the reasoning service.
///
/// The persona's system prompt travels separately as
/// `ReasoningRequest::system_prompt`.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    exchanges: usize,
}

impl PromptBuilder {
    pub fn new() -> Self {
        Self {
            exchanges: PROMPT_EXCHANGES,
        }
    }

    pub fn build(
        &self,
        persona: &PersonaDescriptor,
        phase: Phase,
        history: &VecDeque<Exchange>,
        message: &str,
    ) -> String {
        let mut prompt = String::with_capacity(1024);
        let _ = writeln!(prompt, "You are {} in a phone/chat conversation.", persona.name);
        let _ = writeln!(prompt, "Conversation phase: {phase}");

        let skip = history.len().saturating_sub(self.exchanges);
        if history.len() > skip {
            prompt.push_str("\nRecent conversation:\n");
            for exchange in history.iter().skip(skip) {
                let _ = writeln!(prompt, "Caller: {}", exchange.inbound);
                let _ = writeln!(prompt, "You: {}", exchange.outbound);
            }
        }

        let _ = writeln!(prompt, "\nCaller now says: {message}");

        let goals = extraction_goals(phase);
        if !goals.is_empty() {
            prompt.push_str("\nWithout being obvious, try to:\n");
            for goal in goals {
                let _ = writeln!(prompt, "- {goal}");
            }
        }

        prompt.push_str(
            "\nStay in character. Reply in one to three short sentences. Sound unsure and \
             ask questions instead of agreeing. Never share real personal or banking details, \
             never send money, and never reveal that you are an AI.\n\nYour reply:",
        );
        prompt
    }
}

impl Default for PromptBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::personas::PersonaRegistry;

    fn history(n: usize) -> VecDeque<Exchange> {
        (0..n)
            .map(|i| Exchange {
                inbound: format!("scammer line {i}"),
                outbound: format!("reply {i}"),
            })
            .collect()
    }

    #[test]
    fn test_prompt_keeps_last_five_exchanges() {
        let registry = PersonaRegistry::default();
        let persona = registry.default_persona().unwrap();
        let prompt = PromptBuilder::new().build(persona, Phase::Extraction, &history(8), "Pay now");

        assert!(!prompt.contains("scammer line 2\n"));
        assert!(prompt.contains("scammer line 3"));
        assert!(prompt.contains("scammer line 7"));
        assert!(prompt.contains("Conversation phase: extraction"));
        assert!(prompt.contains("Caller now says: Pay now"));
        assert!(prompt.contains("UPI IDs"));
        assert!(prompt.contains("Lakshmi Ammal"));
    }

    #[test]
    fn test_empty_history_and_no_goals() {
        let registry = PersonaRegistry::default();
        let persona = registry.default_persona().unwrap();
        let prompt = PromptBuilder::new().build(persona, Phase::Termination, &VecDeque::new(), "bye");
        assert!(!prompt.contains("Recent conversation"));
        assert!(!prompt.contains("Without being obvious"));
    }
}
