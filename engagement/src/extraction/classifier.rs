//! Scam-type profiling over a whole conversation.
//!
//! Keyword evidence picks the primary and secondary scam categories; the
//! extracted indicators and tactics estimate how sophisticated and how
//! organized the actor is.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::iocs::{ExtractedIoc, IocKind};
use super::tactics::{TacticCategory, TacticMatch};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScamCategory {
    TechSupport,
    Phishing,
    Investment,
    Romance,
    Lottery,
    Extortion,
    Unknown,
}

impl ScamCategory {
    const SCORED: [ScamCategory; 6] = [
        ScamCategory::TechSupport,
        ScamCategory::Phishing,
        ScamCategory::Investment,
        ScamCategory::Romance,
        ScamCategory::Lottery,
        ScamCategory::Extortion,
    ];

    fn keywords(self) -> &'static [&'static str] {
        match self {
            Self::TechSupport => &[
                "virus", "computer", "microsoft", "windows", "anydesk", "teamviewer", "remote",
                "refund", "technician",
            ],
            Self::Phishing => &[
                "verify", "kyc", "otp", "password", "login", "link", "update", "account",
            ],
            Self::Investment => &[
                "invest", "returns", "profit", "trading", "crypto", "bitcoin", "scheme", "double",
            ],
            Self::Romance => &["love", "darling", "marry", "lonely", "dear", "sweetheart", "visa"],
            Self::Lottery => &[
                "won", "winner", "prize", "lottery", "crore", "lakh", "jackpot", "lucky",
                "processing",
            ],
            Self::Extortion => &[
                "arrest", "police", "warrant", "court", "jail", "case", "customs", "parcel",
            ],
            Self::Unknown => &[],
        }
    }

    /// Advice for people targeted by this kind of scam.
    pub fn mitigation_advice(self) -> &'static [&'static str] {
        match self {
            Self::TechSupport => &[
                "Never install remote access software at a caller's request",
                "Real software vendors do not make unsolicited support calls",
                "Disconnect the device from the network if access was granted",
            ],
            Self::Phishing => &[
                "Never share OTPs, PINs or passwords with anyone",
                "Check links against the bank's official domain",
                "Report the message to the bank's fraud line",
            ],
            Self::Investment => &[
                "Guaranteed high returns are a warning sign",
                "Check the firm's registration with the market regulator",
                "Do not move funds to wallets supplied by strangers",
            ],
            Self::Romance => &[
                "Never send money to someone you have not met in person",
                "Reverse-search profile photos",
                "Be wary of sudden emergencies that need money",
            ],
            Self::Lottery => &[
                "You cannot win a lottery you never entered",
                "Legitimate prizes never require a fee up front",
                "Block and report the sender",
            ],
            Self::Extortion => &[
                "Police and courts do not demand payment over the phone",
                "Verify claims by calling the agency's published number",
                "Report the threat to the cyber crime helpline",
            ],
            Self::Unknown => &["Do not share personal or financial details with unknown callers"],
        }
    }
}

impl fmt::Display for ScamCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TechSupport => write!(f, "tech_support"),
            Self::Phishing => write!(f, "phishing"),
            Self::Investment => write!(f, "investment"),
            Self::Romance => write!(f, "romance"),
            Self::Lottery => write!(f, "lottery"),
            Self::Extortion => write!(f, "extortion"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrganizationLevel {
    Individual,
    SmallGroup,
    Organized,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TacticProfile {
    pub primary: ScamCategory,
    pub secondary: Vec<ScamCategory>,
    /// Share of keyword evidence backing the primary category.
    pub confidence: f64,
    pub key_indicators: Vec<String>,
    /// 1 (crude) to 10 (highly sophisticated).
    pub sophistication: u8,
    pub organization: OrganizationLevel,
}

impl TacticProfile {
    pub fn mitigation_advice(&self) -> &'static [&'static str] {
        self.primary.mitigation_advice()
    }
}

#[derive(Debug, Clone, Default)]
pub struct TacticClassifier;

impl TacticClassifier {
    pub fn new() -> Self {
        Self
    }

    /// Profile a conversation from its inbound messages and extraction results.
    pub fn classify(
        &self,
        messages: &[String],
        iocs: &[ExtractedIoc],
        tactics: &[TacticMatch],
    ) -> TacticProfile {
        let words: Vec<String> = messages
            .iter()
            .flat_map(|m| m.split_whitespace())
            .map(|w| {
                w.trim_matches(|c: char| !c.is_alphanumeric())
                    .to_lowercase()
            })
            .filter(|w| !w.is_empty())
            .collect();

        let mut scored: Vec<(ScamCategory, usize, Vec<String>)> = ScamCategory::SCORED
            .iter()
            .map(|&cat| {
                let hits: Vec<String> = cat
                    .keywords()
                    .iter()
                    .filter(|k| words.iter().any(|w| w == *k))
                    .map(|k| k.to_string())
                    .collect();
                let score = words
                    .iter()
                    .filter(|w| cat.keywords().contains(&w.as_str()))
                    .count();
                (cat, score, hits)
            })
            .filter(|(_, score, _)| *score > 0)
            .collect();
        scored.sort_by(|a, b| b.1.cmp(&a.1));

        let total: usize = scored.iter().map(|(_, s, _)| s).sum();
        let (primary, confidence, key_indicators) = match scored.first() {
            Some((cat, score, hits)) => (*cat, *score as f64 / total as f64, hits.clone()),
            None => (ScamCategory::Unknown, 0.0, Vec::new()),
        };
        let secondary = scored.iter().skip(1).take(2).map(|(c, _, _)| *c).collect();

        TacticProfile {
            primary,
            secondary,
            confidence,
            key_indicators,
            sophistication: sophistication(messages.len(), iocs, tactics),
            organization: organization(iocs),
        }
    }
}

fn sophistication(message_count: usize, iocs: &[ExtractedIoc], tactics: &[TacticMatch]) -> u8 {
    let ioc_kinds: HashSet<IocKind> = iocs.iter().map(|i| i.kind).collect();
    let tactic_categories: HashSet<TacticCategory> = tactics.iter().map(|t| t.category).collect();

    let mut score: i32 = 3;
    score += (ioc_kinds.len() as i32 - 1).clamp(0, 3);
    score += tactic_categories.len() as i32 - 1;
    if tactic_categories.contains(&TacticCategory::AuthorityAbuse) {
        score += 1;
    }
    if message_count > 10 {
        score += 1;
    }
    score.clamp(1, 10) as u8
}

fn organization(iocs: &[ExtractedIoc]) -> OrganizationLevel {
    let contact_points = iocs.iter().filter(|i| i.kind.is_contact_point()).count();
    let has_crypto = iocs
        .iter()
        .any(|i| matches!(i.kind, IocKind::CryptoBtc | IocKind::CryptoEth));
    let has_bank = iocs
        .iter()
        .any(|i| matches!(i.kind, IocKind::BankAccount | IocKind::Ifsc));

    if contact_points >= 4 || (has_crypto && has_bank) {
        OrganizationLevel::Organized
    } else if contact_points >= 2 {
        OrganizationLevel::SmallGroup
    } else {
        OrganizationLevel::Individual
    }
}
