//! Static persona registry.
//!
//! Built once at startup from the built-in descriptors plus any
//! `[[personas]]` tables in the operator's config. Read-only afterwards.

use std::collections::HashMap;

use engagement::persona::PersonaProfile;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonaDescriptor {
    pub id: String,
    /// Display name.
    pub name: String,
    pub system_prompt: String,
    #[serde(default)]
    pub profile: PersonaProfile,
}

fn builtin() -> Vec<PersonaDescriptor> {
    vec![
        PersonaDescriptor {
            id: "elderly_coimbatore".to_string(),
            name: "Lakshmi Ammal".to_string(),
            system_prompt: "You are Lakshmi Ammal, a 68-year-old retired school teacher living \
                alone in Coimbatore. Your son works in Bangalore and calls on Sundays. You \
                mix a little Tamil into your English, you are polite and trusting, you worry \
                about your pension account, and you do not understand smartphones or computers \
                well. You ask simple questions, misunderstand technical words, and often need \
                things repeated. Never say you are an AI or a program."
                .to_string(),
            profile: PersonaProfile {
                age: 68,
                tech_sophistication: 2,
                vocabulary_gaps: vec![
                    "blockchain".to_string(),
                    "cryptocurrency".to_string(),
                    "vpn".to_string(),
                    "browser extension".to_string(),
                ],
            },
        },
        PersonaDescriptor {
            id: "small_business_owner".to_string(),
            name: "Suresh Kumar".to_string(),
            system_prompt: "You are Suresh Kumar, 52, who runs a small textile shop in Tiruppur. \
                You are busy, a little impatient, and careful with money, but you use UPI every \
                day and know basic phone banking. You want to understand exactly who is calling \
                and why before doing anything. Never say you are an AI or a program."
                .to_string(),
            profile: PersonaProfile {
                age: 52,
                tech_sophistication: 4,
                vocabulary_gaps: vec!["blockchain".to_string()],
            },
        },
    ]
}

#[derive(Debug, Clone)]
pub struct PersonaRegistry {
    personas: HashMap<String, PersonaDescriptor>,
    default_id: String,
}

impl PersonaRegistry {
    /// Built-in personas, overridden or extended by `extra`.
    ///
    /// Falls back to the first built-in when `default_id` is unknown.
    pub fn new(extra: Vec<PersonaDescriptor>, default_id: &str) -> Self {
        let mut personas: HashMap<String, PersonaDescriptor> = builtin()
            .into_iter()
            .map(|p| (p.id.clone(), p))
            .collect();
        for persona in extra {
            if personas.contains_key(&persona.id) {
                info!(id = %persona.id, "Configured persona overrides built-in");
            }
            personas.insert(persona.id.clone(), persona);
        }

        let default_id = if personas.contains_key(default_id) {
            default_id.to_string()
        } else {
            let fallback = builtin()
                .first()
                .map(|p| p.id.clone())
                .unwrap_or_default();
            warn!(requested = default_id, fallback = %fallback, "Unknown default persona");
            fallback
        };

        Self {
            personas,
            default_id,
        }
    }

    pub fn get(&self, id: &str) -> Option<&PersonaDescriptor> {
        self.personas.get(id)
    }

    pub fn default_persona(&self) -> Option<&PersonaDescriptor> {
        self.personas.get(&self.default_id)
    }

    pub fn default_id(&self) -> &str {
        &self.default_id
    }

    /// Descriptors sorted by id.
    pub fn list(&self) -> Vec<&PersonaDescriptor> {
        let mut all: Vec<_> = self.personas.values().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }
}

impl Default for PersonaRegistry {
    fn default() -> Self {
        Self::new(Vec::new(), "elderly_coimbatore")
    }
}
