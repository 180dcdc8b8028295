//! Manipulation-tactic keyword groups.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TacticCategory {
    Urgency,
    AuthorityAbuse,
    SocialEngineering,
}

impl TacticCategory {
    pub fn confidence(self) -> f64 {
        match self {
            Self::Urgency => 0.8,
            Self::AuthorityAbuse => 0.85,
            Self::SocialEngineering => 0.75,
        }
    }
}

impl fmt::Display for TacticCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Urgency => write!(f, "urgency"),
            Self::AuthorityAbuse => write!(f, "authority_abuse"),
            Self::SocialEngineering => write!(f, "social_engineering"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TacticMatch {
    pub tactic: String,
    pub category: TacticCategory,
    pub confidence: f64,
    /// Distinct keywords that fired, lower-cased, in order of appearance.
    pub indicators: Vec<String>,
}

struct TacticDef {
    name: &'static str,
    category: TacticCategory,
    keywords: &'static [&'static str],
}

const TACTIC_DEFS: &[TacticDef] = &[
    TacticDef {
        name: "immediate_action",
        category: TacticCategory::Urgency,
        keywords: &["immediately", "right now", "urgent", "asap", "hurry", "quickly"],
    },
    TacticDef {
        name: "time_pressure",
        category: TacticCategory::Urgency,
        keywords: &[
            "within 24 hours",
            "today only",
            "expires today",
            "last chance",
            "deadline",
            "before midnight",
        ],
    },
    TacticDef {
        name: "scarcity",
        category: TacticCategory::Urgency,
        keywords: &["limited offer", "only few left", "exclusive", "one time", "special offer"],
    },
    TacticDef {
        name: "government_impersonation",
        category: TacticCategory::AuthorityAbuse,
        keywords: &["government", "income tax", "rbi", "trai", "customs", "ministry", "cbi"],
    },
    TacticDef {
        name: "bank_impersonation",
        category: TacticCategory::AuthorityAbuse,
        keywords: &[
            "bank manager",
            "bank official",
            "kyc",
            "account verification",
            "sbi",
            "hdfc",
            "icici",
        ],
    },
    TacticDef {
        name: "police_threat",
        category: TacticCategory::AuthorityAbuse,
        keywords: &["police", "arrest", "legal action", "court", "fir", "warrant", "case filed"],
    },
    TacticDef {
        name: "trust_building",
        category: TacticCategory::SocialEngineering,
        keywords: &["trust me", "believe me", "honest", "genuine", "guaranteed", "guarantee"],
    },
    TacticDef {
        name: "relationship_exploit",
        category: TacticCategory::SocialEngineering,
        keywords: &["dear", "friend", "family", "son", "daughter", "beta", "brother", "sister"],
    },
    TacticDef {
        name: "reciprocity",
        category: TacticCategory::SocialEngineering,
        keywords: &["help you", "favor", "favour", "gift", "bonus", "free", "reward"],
    },
];

static TACTIC_REGISTRY: LazyLock<Vec<(&'static TacticDef, Regex)>> = LazyLock::new(|| {
    TACTIC_DEFS
        .iter()
        .map(|def| {
            let alternation = def
                .keywords
                .iter()
                .map(|k| regex::escape(k))
                .collect::<Vec<_>>()
                .join("|");
            let regex = Regex::new(&format!(r"(?i)\b(?:{alternation})\b"))
                .expect("tactic keyword regex should compile");
            (def, regex)
        })
        .collect()
});

/// Every tactic with at least one keyword hit in `text`.
pub fn detect(text: &str) -> Vec<TacticMatch> {
    TACTIC_REGISTRY
        .iter()
        .filter_map(|(def, regex)| {
            let mut indicators: Vec<String> = Vec::new();
            for m in regex.find_iter(text) {
                let hit = m.as_str().to_lowercase();
                if !indicators.contains(&hit) {
                    indicators.push(hit);
                }
            }
            (!indicators.is_empty()).then(|| TacticMatch {
                tactic: def.name.to_string(),
                category: def.category,
                confidence: def.category.confidence(),
                indicators,
            })
        })
        .collect()
}
