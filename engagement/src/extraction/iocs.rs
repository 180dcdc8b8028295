//! Indicator-of-compromise patterns and normalization.
//!
//! Patterns run in precedence order. A byte span claimed by an earlier
//! pattern is never reported again by a later one, so a phone number is not
//! also a bank account and an email is not also a UPI handle.

use std::fmt;
use std::ops::Range;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IocKind {
    Phone,
    Email,
    /// Payment handle (`name@bank`).
    Upi,
    Url,
    /// Bank branch routing code.
    Ifsc,
    BankAccount,
    CryptoBtc,
    CryptoEth,
    Ip,
}

impl IocKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Phone => "phone",
            Self::Email => "email",
            Self::Upi => "upi",
            Self::Url => "url",
            Self::Ifsc => "ifsc",
            Self::BankAccount => "bank_account",
            Self::CryptoBtc => "crypto_btc",
            Self::CryptoEth => "crypto_eth",
            Self::Ip => "ip",
        }
    }

    /// Whether the indicator is a way to reach or pay the actor.
    pub fn is_contact_point(self) -> bool {
        matches!(self, Self::Phone | Self::Email | Self::Upi | Self::Url)
    }
}

impl fmt::Display for IocKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A normalized, attributed indicator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedIoc {
    pub kind: IocKind,
    pub value: String,
    pub confidence: f64,
    /// Surrounding text, at most ~80 characters.
    pub context: String,
    pub source_conversation: String,
    pub first_seen: DateTime<Utc>,
    /// Hex BLAKE3 of kind and lower-cased value.
    pub dedup_key: String,
}

struct IocDef {
    name: &'static str,
    kind: IocKind,
    regex: &'static str,
    confidence: f64,
}

const IOC_DEFS: &[IocDef] = &[
    IocDef {
        name: "url",
        kind: IocKind::Url,
        regex: r#"(?i)https?://[^\s<>"{}|\\^`\[\]]+"#,
        confidence: 0.9,
    },
    IocDef {
        name: "email",
        kind: IocKind::Email,
        regex: r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b",
        confidence: 0.95,
    },
    IocDef {
        name: "upi",
        kind: IocKind::Upi,
        regex: r"\b[A-Za-z0-9._-]{2,}@[A-Za-z]{3,}\b",
        confidence: 0.85,
    },
    IocDef {
        name: "phone_india",
        kind: IocKind::Phone,
        regex: r"(?:\+91[\s-]?|\b0|\b)[6-9]\d{9}\b",
        confidence: 0.9,
    },
    IocDef {
        name: "phone_international",
        kind: IocKind::Phone,
        regex: r"\+\d{1,3}[\s-]?\d{6,12}\b",
        confidence: 0.8,
    },
    IocDef {
        name: "ifsc",
        kind: IocKind::Ifsc,
        regex: r"\b[A-Z]{4}0[A-Z0-9]{6}\b",
        confidence: 0.95,
    },
    IocDef {
        name: "crypto_btc",
        kind: IocKind::CryptoBtc,
        regex: r"\b(?:[13][a-km-zA-HJ-NP-Z1-9]{25,34}|bc1[a-z0-9]{39,59})\b",
        confidence: 0.95,
    },
    IocDef {
        name: "crypto_eth",
        kind: IocKind::CryptoEth,
        regex: r"\b0x[a-fA-F0-9]{40}\b",
        confidence: 0.95,
    },
    IocDef {
        name: "ip",
        kind: IocKind::Ip,
        regex: r"\b(?:\d{1,3}\.){3}\d{1,3}\b",
        confidence: 0.8,
    },
    IocDef {
        name: "bank_account",
        kind: IocKind::BankAccount,
        regex: r"\b\d{9,18}\b",
        confidence: 0.6,
    },
];

static IOC_REGISTRY: LazyLock<Vec<(&'static IocDef, Regex)>> = LazyLock::new(|| {
    IOC_DEFS
        .iter()
        .map(|def| {
            (
                def,
                Regex::new(def.regex).expect("IOC registry regex should compile"),
            )
        })
        .collect()
});

/// Pattern names in precedence order.
pub fn ioc_pattern_names() -> Vec<&'static str> {
    IOC_DEFS.iter().map(|d| d.name).collect()
}

/// Dedup key for an indicator: hex BLAKE3 of `kind \0 lowercase(value)`.
pub fn dedup_key(kind: IocKind, value: &str) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(kind.as_str().as_bytes());
    hasher.update(&[0]);
    hasher.update(value.to_lowercase().as_bytes());
    hasher.finalize().to_hex().to_string()
}

/// Every indicator in `text`, normalized, without cross-call dedup.
///
/// The same value repeated in one text is reported once.
pub fn scan(text: &str, conversation_id: &str) -> Vec<ExtractedIoc> {
    let now = Utc::now();
    let mut claimed: Vec<Range<usize>> = Vec::new();
    let mut found: Vec<ExtractedIoc> = Vec::new();

    for (def, regex) in IOC_REGISTRY.iter() {
        for m in regex.find_iter(text) {
            let span = m.range();
            if claimed.iter().any(|c| c.start < span.end && span.start < c.end) {
                continue;
            }
            let Some(value) = normalize(def.kind, m.as_str()) else {
                continue;
            };
            claimed.push(span.clone());

            let key = dedup_key(def.kind, &value);
            if found.iter().any(|f| f.dedup_key == key) {
                continue;
            }
            found.push(ExtractedIoc {
                kind: def.kind,
                value,
                confidence: def.confidence,
                context: context_window(text, span),
                source_conversation: conversation_id.to_string(),
                first_seen: now,
                dedup_key: key,
            });
        }
    }
    found
}

/// Canonical form of a raw match, or `None` when it fails validation.
pub fn normalize(kind: IocKind, raw: &str) -> Option<String> {
    match kind {
        IocKind::Phone => normalize_phone(raw),
        IocKind::Url => normalize_url(raw),
        IocKind::Ip => normalize_ip(raw),
        IocKind::Email => Some(raw.to_lowercase()),
        IocKind::Upi => (raw.len() > 5).then(|| raw.to_lowercase()),
        IocKind::CryptoEth => Some(raw.to_lowercase()),
        IocKind::Ifsc | IocKind::BankAccount | IocKind::CryptoBtc => Some(raw.to_string()),
    }
}

fn normalize_phone(raw: &str) -> Option<String> {
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
    let plus = raw.trim_start().starts_with('+');
    match digits.len() {
        10 if matches!(digits.as_bytes()[0], b'6'..=b'9') => Some(format!("+91{digits}")),
        11 if digits.starts_with('0') => Some(format!("+91{}", &digits[1..])),
        12 if digits.starts_with("91") => Some(format!("+{digits}")),
        8..=15 if plus => Some(format!("+{digits}")),
        _ => None,
    }
}

fn normalize_url(raw: &str) -> Option<String> {
    let trimmed = raw.trim_end_matches(['.', ',', ';', ':', '!', '?', ')', '\'']);
    let lowered = trimmed.to_lowercase();
    let rest = lowered
        .strip_prefix("https://")
        .or_else(|| lowered.strip_prefix("http://"))?;
    let authority = rest.split(['/', '?', '#']).next().unwrap_or_default();
    let host_port = authority.rsplit('@').next().unwrap_or_default();
    let host = host_port.split(':').next().unwrap_or_default();
    if host.is_empty() || !(host.contains('.') || host == "localhost") {
        return None;
    }
    Some(lowered)
}

fn normalize_ip(raw: &str) -> Option<String> {
    let octets: Vec<u8> = raw
        .split('.')
        .map(str::parse::<u8>)
        .collect::<Result<_, _>>()
        .ok()?;
    (octets.len() == 4).then(|| raw.to_string())
}

fn context_window(text: &str, span: Range<usize>) -> String {
    const RADIUS: usize = 40;
    let start = text[..span.start]
        .char_indices()
        .rev()
        .nth(RADIUS - 1)
        .map(|(i, _)| i)
        .unwrap_or(0);
    let end = text[span.end..]
        .char_indices()
        .nth(RADIUS)
        .map(|(i, _)| span.end + i)
        .unwrap_or(text.len());
    text[start..end].trim().to_string()
}
