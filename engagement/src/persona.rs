//! Persona profile: the few persona facts the core needs.
//!
//! Persona wording lives with the runtime's registry. The core only uses
//! the profile to parameterize output checks and fast-path templates.

use serde::{Deserialize, Serialize};

/// Technical jargon a low-sophistication persona would not use.
pub const TECH_JARGON: &[&str] = &[
    "api",
    "json",
    "python",
    "docker",
    "kubernetes",
    "algorithm",
    "database",
    "server",
    "backend",
    "llm",
];

/// Sophistication below which [`TECH_JARGON`] is off-limits.
pub const JARGON_SOPHISTICATION_LIMIT: u8 = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersonaProfile {
    pub age: u32,
    /// 1 (never touched a computer) to 10 (engineer).
    pub tech_sophistication: u8,
    /// Words this persona would not know or use.
    pub vocabulary_gaps: Vec<String>,
}

impl Default for PersonaProfile {
    fn default() -> Self {
        Self {
            age: 40,
            tech_sophistication: 3,
            vocabulary_gaps: Vec::new(),
        }
    }
}

impl PersonaProfile {
    /// Older personas hesitate in fast-path replies.
    pub fn hesitates(&self) -> bool {
        self.age > 65
    }

    /// Every term the persona must not say, lower-cased.
    pub fn forbidden_terms(&self) -> Vec<String> {
        let mut terms: Vec<String> = self
            .vocabulary_gaps
            .iter()
            .map(|t| t.trim().to_lowercase())
            .filter(|t| !t.is_empty())
            .collect();
        if self.tech_sophistication < JARGON_SOPHISTICATION_LIMIT {
            terms.extend(TECH_JARGON.iter().map(|t| t.to_string()));
        }
        terms.sort();
        terms.dedup();
        terms
    }
}
