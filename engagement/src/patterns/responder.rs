//! Fast-path responder: canned, persona-flavoured replies keyed by the top
//! pattern category. No model call; selection is deterministic per seed.

use serde::{Deserialize, Serialize};

use super::{MessageAnalysis, PatternCategory, SuggestedAction};
use crate::persona::PersonaProfile;

/// Reply substituted when a generated response fails the output check.
pub const SAFE_GENERIC_REPLY: &str =
    "I'm not sure I understand. Could you explain that differently?";

/// Replies used when the reasoning path times out or fails.
pub const FALLBACK_REPLIES: &[&str] = &[
    "Sorry, I didn't catch that. Could you say it again?",
    "My connection is a bit slow today. Can you repeat that?",
    "I'm not sure I follow. Can you explain it another way?",
    "One moment please, I'm trying to understand.",
];

const GENERIC: &[&str] = &[
    "Hello? Who is this speaking?",
    "Yes, I am listening. Please go on.",
    "Sorry, can you say that again?",
];

fn templates(category: PatternCategory) -> &'static [&'static str] {
    match category {
        PatternCategory::PressureTactic => &[
            "Oh my, this sounds very urgent. What exactly do I need to do?",
            "Please give me a moment, I am getting confused. Can you explain again slowly?",
            "I want to fix this quickly. Who should I talk to?",
        ],
        PatternCategory::Threat => &[
            "Oh no, I don't want any trouble with the police. What should I do?",
            "Please, I am an honest person. How do I sort this out?",
            "I am so scared now. Can you tell me your name and which office you are from?",
        ],
        PatternCategory::Financial => &[
            "How much do I need to pay? Where should I send it?",
            "I don't use those apps much. Can you give me the exact details again?",
            "Which number or ID should I send the money to?",
        ],
        PatternCategory::Technical => &[
            "I am not good with computers. What do I need to click?",
            "My grandson usually helps me with this. Can you guide me step by step?",
            "What is the name of this program again? Can you spell it for me?",
        ],
        PatternCategory::Phishing => &[
            "What details do you need from me to verify?",
            "Is this about my bank? Which branch are you calling from?",
        ],
        PatternCategory::Lottery => &[
            "Really? I won something? How do I collect it?",
            "That is wonderful news! What do I need to do to receive the money?",
            "I never win anything! Who is sending the prize?",
        ],
        PatternCategory::Romance => &[
            "That is very sweet of you to say. Tell me more about yourself.",
            "Where did you say you live?",
        ],
        PatternCategory::Impersonation => &[
            "Oh, you are from {company}? What seems to be the problem?",
            "I did not know {company} would call me directly. How can I help?",
        ],
    }
}

/// A fast-path reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FastReply {
    pub text: String,
    /// Confidence of the pattern that selected the template; 0.5 for generic replies.
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<PatternCategory>,
    pub action: SuggestedAction,
}

#[derive(Debug, Clone, Default)]
pub struct FastResponder;

impl FastResponder {
    pub fn new() -> Self {
        Self
    }

    /// Pick a canned reply for an analysed message.
    ///
    /// `seed` makes selection reproducible (callers pass the message text).
    pub fn respond(
        &self,
        analysis: &MessageAnalysis,
        profile: Option<&PersonaProfile>,
        seed: &str,
    ) -> FastReply {
        let reply = match analysis.top() {
            Some(top) => {
                let company = analysis
                    .matches
                    .iter()
                    .find(|m| m.category == PatternCategory::Impersonation)
                    .and_then(|m| m.captured.as_deref())
                    .unwrap_or("the company");
                let template = pick(templates(top.category), seed);
                FastReply {
                    text: template.replace("{company}", company),
                    confidence: top.confidence,
                    pattern: Some(top.pattern_name.clone()),
                    category: Some(top.category),
                    action: top.suggested_action,
                }
            }
            None => FastReply {
                text: pick(GENERIC, seed).to_string(),
                confidence: 0.5,
                pattern: None,
                category: None,
                action: SuggestedAction::ContinueConversation,
            },
        };

        match profile {
            Some(p) if p.hesitates() => FastReply {
                text: add_hesitation(&reply.text),
                ..reply
            },
            _ => reply,
        }
    }

    /// Canned reply for a failed or timed-out reasoning call.
    pub fn fallback(&self, seed: &str) -> &'static str {
        pick(FALLBACK_REPLIES, seed)
    }
}

fn pick<'a>(options: &'a [&'a str], seed: &str) -> &'a str {
    let digest = blake3::hash(seed.as_bytes());
    let mut first = [0u8; 8];
    first.copy_from_slice(&digest.as_bytes()[..8]);
    let index = (u64::from_le_bytes(first) % options.len() as u64) as usize;
    options[index]
}

fn add_hesitation(text: &str) -> String {
    match text.find(['.', '?', '!']) {
        Some(i) if text[i..].starts_with('.') => format!("{}...{}", &text[..i], &text[i + 1..]),
        _ => format!("Umm... {text}"),
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
    fn test_reply_follows_top_category() {
        let reply = FastResponder::new().respond(&analyze("Install anydesk now"), None, "seed");
        assert_eq!(reply.category, Some(PatternCategory::Technical));
        assert!(templates(PatternCategory::Technical).contains(&reply.text.as_str()));
    }

    #[test]
    fn test_selection_is_deterministic() {
        let responder = FastResponder::new();
        let analysis = analyze("You won the lottery");
        let a = responder.respond(&analysis, None, "same seed");
        let b = responder.respond(&analysis, None, "same seed");
        assert_eq!(a, b);
    }

    #[test]
    fn test_company_placeholder_is_filled() {
        let analysis = analyze("Amazon customer care here about your order");
        let reply = FastResponder::new().respond(&analysis, None, "x");
        assert!(reply.text.contains("Amazon"));
        assert!(!reply.text.contains("{company}"));
    }

    #[test]
    fn test_generic_reply_without_matches() {
        let reply = FastResponder::new().respond(&analyze("hello there"), None, "x");
        assert!(reply.pattern.is_none());
        assert_eq!(reply.confidence, 0.5);
        assert!(GENERIC.contains(&reply.text.as_str()));
    }

    #[test]
    fn test_elderly_persona_hesitates() {
        let profile = PersonaProfile {
            age: 70,
            ..Default::default()
        };
        assert_eq!(
            add_hesitation("I am not sure. Tell me more."),
            "I am not sure... Tell me more."
        );
        let reply = FastResponder::new().respond(&analyze("hello there"), Some(&profile), "x");
        assert!(reply.text.contains("..."));
    }

    #[test]
    fn test_fallback_is_canned() {
        let text = FastResponder::new().fallback("anything");
        assert!(FALLBACK_REPLIES.contains(&text));
    }
}
