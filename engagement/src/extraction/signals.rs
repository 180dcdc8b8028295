//! Coarse per-message signals: language hint, sentiment, complexity.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LanguageHint {
    #[serde(rename = "en")]
    English,
    #[serde(rename = "ta")]
    Tamil,
    #[serde(rename = "ta-en")]
    TamilEnglish,
    #[serde(rename = "hi")]
    Hindi,
    #[serde(rename = "hi-en")]
    HindiEnglish,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sentiment {
    Threatening,
    Negative,
    Positive,
    Neutral,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeSignals {
    pub language: LanguageHint,
    pub sentiment: Sentiment,
    pub word_count: usize,
    pub sentence_count: usize,
    pub avg_word_len: f64,
}

const TAMIL_MARKERS: &[&str] = &["enna", "sollunga", "vanakkam", "romba", "illa", "seri", "paarunga"];
const HINDI_MARKERS: &[&str] = &["kya", "hai", "aap", "nahi", "jaldi", "bhai", "haan", "karo"];
const THREAT_WORDS: &[&str] = &["arrest", "police", "jail", "legal", "court", "warrant", "punish"];
const NEGATIVE_WORDS: &[&str] = &["problem", "issue", "suspended", "blocked", "fraud", "error", "virus"];
const POSITIVE_WORDS: &[&str] = &["congratulations", "won", "lucky", "prize", "happy", "winner", "reward"];

pub fn analyze(text: &str) -> ExchangeSignals {
    let words: Vec<String> = text
        .split_whitespace()
        .map(|w| {
            w.trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase()
        })
        .filter(|w| !w.is_empty())
        .collect();
    let has = |list: &[&str]| words.iter().any(|w| list.contains(&w.as_str()));

    let sentiment = if has(THREAT_WORDS) {
        Sentiment::Threatening
    } else if has(NEGATIVE_WORDS) {
        Sentiment::Negative
    } else if has(POSITIVE_WORDS) {
        Sentiment::Positive
    } else {
        Sentiment::Neutral
    };

    let total_len: usize = words.iter().map(|w| w.chars().count()).sum();
    ExchangeSignals {
        language: detect_language(text, &words),
        sentiment,
        word_count: words.len(),
        sentence_count: text
            .split(['.', '!', '?'])
            .filter(|s| !s.trim().is_empty())
            .count(),
        avg_word_len: if words.is_empty() {
            0.0
        } else {
            total_len as f64 / words.len() as f64
        },
    }
}

fn detect_language(text: &str, words: &[String]) -> LanguageHint {
    let tamil_script = text.chars().any(|c| ('\u{0B80}'..='\u{0BFF}').contains(&c));
    let devanagari = text.chars().any(|c| ('\u{0900}'..='\u{097F}').contains(&c));
    let latin = text.chars().any(|c| c.is_ascii_alphabetic());

    if tamil_script {
        return if latin { LanguageHint::TamilEnglish } else { LanguageHint::Tamil };
    }
    if devanagari {
        return if latin { LanguageHint::HindiEnglish } else { LanguageHint::Hindi };
    }
    if words.iter().any(|w| TAMIL_MARKERS.contains(&w.as_str())) {
        return LanguageHint::TamilEnglish;
    }
    if words.iter().any(|w| HINDI_MARKERS.contains(&w.as_str())) {
        return LanguageHint::HindiEnglish;
    }
    LanguageHint::English
}
