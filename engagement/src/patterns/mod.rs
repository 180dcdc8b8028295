//! Pattern matcher: fast, deterministic classification of inbound messages.
//!
//! A static registry of named regexes, each tagged with a scam category and
//! an a-priori confidence. One pass over a message yields a
//! [`MessageAnalysis`] that routing, the fast responder and phase policy
//! all share.

pub mod responder;

pub use responder::{FastReply, FastResponder, FALLBACK_REPLIES, SAFE_GENERIC_REPLY};

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Scam category a pattern belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternCategory {
    PressureTactic,
    Threat,
    Financial,
    Technical,
    Phishing,
    Lottery,
    Romance,
    Impersonation,
}

impl PatternCategory {
    /// Weight applied to a match's confidence when scoring urgency.
    pub fn urgency_weight(self) -> f64 {
        match self {
            Self::Threat => 1.0,
            Self::Financial => 0.9,
            Self::PressureTactic => 0.8,
            Self::Technical => 0.7,
            Self::Phishing => 0.6,
            Self::Impersonation => 0.6,
            Self::Lottery => 0.5,
            Self::Romance => 0.3,
        }
    }

    /// Whether a match of this category moves a conversation toward suspicion.
    pub fn is_scam_signal(self) -> bool {
        !matches!(self, Self::Romance)
    }

    /// What the persona should steer toward after this kind of message.
    pub fn suggested_action(self) -> SuggestedAction {
        match self {
            Self::Financial => SuggestedAction::ExtractPaymentDetails,
            Self::Technical => SuggestedAction::GatherRemoteAccessInfo,
            Self::Threat => SuggestedAction::DocumentThreatLanguage,
            Self::PressureTactic => SuggestedAction::DelayAndExtract,
            Self::Lottery => SuggestedAction::ConfirmPrizeStructure,
            Self::Romance => SuggestedAction::BuildTrustExtractBackground,
            Self::Phishing | Self::Impersonation => SuggestedAction::ContinueConversation,
        }
    }
}

impl fmt::Display for PatternCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PressureTactic => write!(f, "pressure_tactic"),
            Self::Threat => write!(f, "threat"),
            Self::Financial => write!(f, "financial"),
            Self::Technical => write!(f, "technical"),
            Self::Phishing => write!(f, "phishing"),
            Self::Lottery => write!(f, "lottery"),
            Self::Romance => write!(f, "romance"),
            Self::Impersonation => write!(f, "impersonation"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestedAction {
    ExtractPaymentDetails,
    GatherRemoteAccessInfo,
    DocumentThreatLanguage,
    DelayAndExtract,
    ConfirmPrizeStructure,
    BuildTrustExtractBackground,
    ContinueConversation,
}

/// A single fired pattern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternMatch {
    pub pattern_name: String,
    pub confidence: f64,
    pub matched_text: String,
    pub category: PatternCategory,
    pub suggested_action: SuggestedAction,
    /// First capture group, when the pattern defines one (e.g. an impersonated company).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub captured: Option<String>,
}

/// Classification of one inbound message, computed once and shared.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageAnalysis {
    /// Fired patterns, highest confidence first.
    pub matches: Vec<PatternMatch>,
    /// max(confidence × category weight) over all matches, in [0, 1].
    pub urgency: f64,
    pub word_count: usize,
}

impl MessageAnalysis {
    pub fn top(&self) -> Option<&PatternMatch> {
        self.matches.first()
    }

    pub fn has_category(&self, category: PatternCategory) -> bool {
        self.matches.iter().any(|m| m.category == category)
    }

    pub fn pattern_names(&self) -> Vec<&str> {
        self.matches.iter().map(|m| m.pattern_name.as_str()).collect()
    }
}

struct PatternDef {
    name: &'static str,
    regex: &'static str,
    confidence: f64,
    category: PatternCategory,
}

const PATTERN_DEFS: &[PatternDef] = &[
    PatternDef {
        name: "urgent_action",
        regex: r"(?i)\b(urgent|urgently|immediate|act now|limited time|expires?|deadline|hurry|asap|emergency|right now|within \d+ (?:hours?|minutes?))\b",
        confidence: 0.7,
        category: PatternCategory::PressureTactic,
    },
    PatternDef {
        name: "threat_legal",
        regex: r"(?i)\b(police|arrest(?:ed)?|legal action|court|lawsuit|jail|prison|warrant|fir|case filed|cyber cell)\b",
        confidence: 0.8,
        category: PatternCategory::Threat,
    },
    PatternDef {
        name: "threat_financial",
        regex: r"(?i)\b(suspend(?:ed)?|block(?:ed)?|frozen|freeze|deactivat(?:e|ed)|lose (?:all )?your money)\b",
        confidence: 0.75,
        category: PatternCategory::Threat,
    },
    PatternDef {
        name: "request_payment",
        regex: r"(?i)\b(pay|payment|send money|transfer|wire|deposit|fee|fine|penalty|dues)\b",
        confidence: 0.6,
        category: PatternCategory::Financial,
    },
    PatternDef {
        name: "request_giftcard",
        regex: r"(?i)\b(gift ?cards?|google play cards?|itunes cards?|amazon cards?|steam cards?|vouchers?)\b",
        confidence: 0.9,
        category: PatternCategory::Financial,
    },
    PatternDef {
        name: "request_crypto",
        regex: r"(?i)\b(bitcoin|btc|crypto(?:currency)?|ethereum|usdt|wallet address)\b",
        confidence: 0.85,
        category: PatternCategory::Financial,
    },
    PatternDef {
        name: "request_bank_info",
        regex: r"(?i)\b(account number|ifsc|cvv|pin|otp|card number|net ?banking password|login details)\b",
        confidence: 0.95,
        category: PatternCategory::Financial,
    },
    PatternDef {
        name: "request_upi",
        regex: r"(?i)\b(upi|paytm|phonepe|gpay|google pay|bhim)\b",
        confidence: 0.85,
        category: PatternCategory::Financial,
    },
    PatternDef {
        name: "remote_access",
        regex: r"(?i)\b(anydesk|teamviewer|remote access|quick ?support|screen shar(?:e|ing)|ultraviewer|connect to your (?:computer|phone))\b",
        confidence: 0.9,
        category: PatternCategory::Technical,
    },
    PatternDef {
        name: "software_install",
        regex: r"(?i)\b(download|install|apk|click (?:on )?(?:the|this) link|open the link)\b",
        confidence: 0.6,
        category: PatternCategory::Technical,
    },
    PatternDef {
        name: "verify_identity",
        regex: r"(?i)\b(verify|verification|confirm your (?:identity|details)|kyc|aadhaar|pan card)\b",
        confidence: 0.5,
        category: PatternCategory::Phishing,
    },
    PatternDef {
        name: "prize_win",
        regex: r"(?i)\b(won|winner|prize|lottery|jackpot|inheritance|million|crore|lakh|reward|lucky draw|selected)\b",
        confidence: 0.8,
        category: PatternCategory::Lottery,
    },
    PatternDef {
        name: "romance_signal",
        regex: r"(?i)\b(darling|sweetheart|my love|lonely|soulmate|marry me|beautiful)\b",
        confidence: 0.4,
        category: PatternCategory::Romance,
    },
    PatternDef {
        name: "tech_support_claim",
        regex: r"(?i)\b(microsoft|windows|apple|google|amazon|bank|sbi|hdfc|icici|rbi|trai) (?:support|technical|security|team|department|customer care)\b",
        confidence: 0.6,
        category: PatternCategory::Impersonation,
    },
    PatternDef {
        name: "virus_warning",
        regex: r"(?i)\b(virus|malware|hacked|infected|compromised|security alert|trojan)\b",
        confidence: 0.7,
        category: PatternCategory::Technical,
    },
];

struct CompiledPattern {
    def: &'static PatternDef,
    regex: Regex,
}

static REGISTRY: LazyLock<Vec<CompiledPattern>> = LazyLock::new(|| {
    PATTERN_DEFS
        .iter()
        .map(|def| CompiledPattern {
            def,
            regex: Regex::new(def.regex).expect("pattern registry regex should compile"),
        })
        .collect()
});

/// Names of every registered pattern, in registry order.
pub fn pattern_names() -> Vec<&'static str> {
    PATTERN_DEFS.iter().map(|d| d.name).collect()
}

/// Regex-registry classifier.
#[derive(Debug, Clone)]
pub struct PatternMatcher {
    /// Distinct patterns required before the multi-indicator boost applies.
    pub boost_min_matches: usize,
    /// Confidence added to every match when the boost applies (capped at 1.0).
    pub boost: f64,
}

impl Default for PatternMatcher {
    fn default() -> Self {
        Self {
            boost_min_matches: 3,
            boost: 0.1,
        }
    }
}

impl PatternMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every fired pattern, highest confidence first.
    ///
    /// Each pattern reports at most once (its first occurrence). When
    /// `boost_min_matches` or more patterns fire, each gains `boost`.
    pub fn analyze(&self, message: &str) -> Vec<PatternMatch> {
        let mut matches: Vec<PatternMatch> = REGISTRY
            .iter()
            .filter_map(|p| {
                let caps = p.regex.captures(message)?;
                let whole = caps.get(0)?;
                Some(PatternMatch {
                    pattern_name: p.def.name.to_string(),
                    confidence: p.def.confidence,
                    matched_text: whole.as_str().to_string(),
                    category: p.def.category,
                    suggested_action: p.def.category.suggested_action(),
                    captured: caps.get(1).map(|c| c.as_str().to_string()),
                })
            })
            .collect();

        if matches.len() >= self.boost_min_matches {
            for m in &mut matches {
                m.confidence = (m.confidence + self.boost).min(1.0);
            }
        }

        // Stable sort keeps registry order among equal confidences.
        matches.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        matches
    }

    /// Urgency score in [0, 1] for a set of matches.
    pub fn urgency(matches: &[PatternMatch]) -> f64 {
        matches
            .iter()
            .map(|m| m.confidence * m.category.urgency_weight())
            .fold(0.0_f64, f64::max)
            .clamp(0.0, 1.0)
    }

    /// Full per-message classification: matches, urgency and word count.
    pub fn analyze_message(&self, message: &str) -> MessageAnalysis {
        let matches = self.analyze(message);
        let urgency = Self::urgency(&matches);
        MessageAnalysis {
            matches,
            urgency,
            word_count: message.split_whitespace().count(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_compiles() {
        assert_eq!(REGISTRY.len(), PATTERN_DEFS.len());
        assert!(pattern_names().contains(&"request_upi"));
    }

    #[test]
    fn test_benign_message_has_no_matches() {
        let analysis = PatternMatcher::new().analyze_message("Good morning, how are you today?");
        assert!(analysis.matches.is_empty());
        assert_eq!(analysis.urgency, 0.0);
        assert_eq!(analysis.word_count, 6);
    }

    #[test]
    fn test_single_match_keeps_base_confidence() {
        let matches = PatternMatcher::new().analyze("Please install AnyDesk");
        let names: Vec<_> = matches.iter().map(|m| m.pattern_name.as_str()).collect();
        assert_eq!(names, vec!["remote_access", "software_install"]);
        assert_eq!(matches[0].confidence, 0.9);
        assert_eq!(matches[0].suggested_action, SuggestedAction::GatherRemoteAccessInfo);
    }

    #[test]
    fn test_three_indicators_boost_and_sort() {
        let matches = PatternMatcher::new()
            .analyze("You have won ₹5 crore! Send ₹10,000 processing fee to UPI prizewinner@upi");
        let names: Vec<_> = matches.iter().map(|m| m.pattern_name.as_str()).collect();
        assert_eq!(names, vec!["request_upi", "prize_win", "request_payment"]);
        assert!((matches[0].confidence - 0.95).abs() < 1e-9);
        assert!((matches[2].confidence - 0.7).abs() < 1e-9);
    }

    #[test]
    fn test_urgency_uses_category_weight() {
        let analysis = PatternMatcher::new()
            .analyze_message("You have won ₹5 crore! Send ₹10,000 processing fee to UPI prizewinner@upi");
        assert!((analysis.urgency - 0.855).abs() < 1e-9);
        assert!(analysis.has_category(PatternCategory::Lottery));
    }

    #[test]
    fn test_impersonated_company_is_captured() {
        let matches = PatternMatcher::new().analyze("This is Microsoft support calling about your PC");
        let claim = matches
            .iter()
            .find(|m| m.pattern_name == "tech_support_claim")
            .unwrap();
        assert_eq!(claim.captured.as_deref(), Some("Microsoft"));
    }

    #[test]
    fn test_word_boundaries_respected() {
        // "pinch" must not fire request_bank_info via "pin".
        let matches = PatternMatcher::new().analyze("Add a pinch of salt");
        assert!(matches.is_empty());
    }
}
