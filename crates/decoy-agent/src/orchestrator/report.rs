use chrono::{DateTime, Utc};
use engagement::extraction::{
    ExtractedIoc, OrganizationLevel, ScamCategory, TacticClassifier, TacticMatch,
};
use engagement::guard::GuardReport;
use engagement::phase::Phase;
use serde::{Deserialize, Serialize};

use super::session::Session;
use crate::storage::StorageStats;

/// Per-conversation intelligence summary for operators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntelligenceReport {
    pub conversation_id: String,
    pub source: String,
    pub persona: String,
    pub phase: Phase,
    pub messages: u32,
    pub duration_secs: i64,
    pub scam_type: ScamCategory,
    pub secondary_types: Vec<ScamCategory>,
    pub confidence: f64,
    pub sophistication: u8,
    pub organization: OrganizationLevel,
    pub key_indicators: Vec<String>,
    pub iocs: Vec<ExtractedIoc>,
    pub tactics: Vec<TacticMatch>,
    pub recommended_actions: Vec<String>,
    pub generated_at: DateTime<Utc>,
}

impl IntelligenceReport {
    pub(crate) fn build(session: &Session, classifier: &TacticClassifier) -> Self {
        let profile = classifier.classify(&session.inbound, &session.iocs, &session.tactics);
        let now = Utc::now();
        Self {
            conversation_id: session.id.clone(),
            source: session.source.clone(),
            persona: session.persona.id.clone(),
            phase: session.phase(),
            messages: session.messages,
            duration_secs: session.machine.context().duration_secs_at(now),
            scam_type: profile.primary,
            secondary_types: profile.secondary.clone(),
            confidence: profile.confidence,
            sophistication: profile.sophistication,
            organization: profile.organization,
            key_indicators: profile.key_indicators.clone(),
            iocs: session.iocs.clone(),
            tactics: session.tactics.clone(),
            recommended_actions: profile
                .mitigation_advice()
                .iter()
                .map(|s| s.to_string())
                .collect(),
            generated_at: now,
        }
    }
}

/// Engine-wide health snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemStatus {
    pub active_sessions: usize,
    pub total_sessions: usize,
    pub uptime_secs: u64,
    pub indicators_seen: usize,
    pub reasoning_backend: String,
    pub audit_head: Option<String>,
    pub audit_entries_appended: u64,
    pub storage: StorageStats,
    pub guard: GuardReport,
}
