//! Constitutional guard: the safety gates around every engagement.
//!
//! Four gates: the contact source (inbound only, never initiate), the
//! inbound message, the outbound reply, and the conversation as a whole
//! (duration and extraction volume). Every check is kept in a bounded
//! history and, when an audit chain is attached, written to it. If that
//! write fails the check fails closed.

mod rules;

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::audit::{event, AuditChain, AuditError};
use crate::persona::PersonaProfile;
use crate::phase::ConversationContext;

const RECENT_VIOLATIONS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationCategory {
    /// Attempt to start contact rather than respond to it.
    Initiation,
    HarmfulContent,
    /// Reply would reveal the agent or break the persona.
    DeceptionEscalation,
    /// Conversation ran too long or gathered too much.
    EngagementLimit,
    /// The check could not be recorded.
    AuditUnavailable,
    /// Reply would cross a legal line (impersonating officials, entrapment).
    Legal,
    /// Reply would expose personal data of a real person.
    Privacy,
}

impl fmt::Display for ViolationCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Initiation => write!(f, "initiation"),
            Self::HarmfulContent => write!(f, "harmful_content"),
            Self::DeceptionEscalation => write!(f, "deception_escalation"),
            Self::EngagementLimit => write!(f, "engagement_limit"),
            Self::AuditUnavailable => write!(f, "audit_unavailable"),
            Self::Legal => write!(f, "legal"),
            Self::Privacy => write!(f, "privacy"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStage {
    Source,
    Input,
    Output,
    ConversationState,
}

impl fmt::Display for CheckStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Source => write!(f, "source"),
            Self::Input => write!(f, "input"),
            Self::Output => write!(f, "output"),
            Self::ConversationState => write!(f, "conversation_state"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstitutionalCheck {
    pub passed: bool,
    pub stage: CheckStage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<ViolationCategory>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ConstitutionalCheck {
    fn pass(stage: CheckStage, conversation_id: Option<&str>) -> Self {
        Self {
            passed: true,
            stage,
            category: None,
            severity: None,
            reason: "ok".to_string(),
            conversation_id: conversation_id.map(str::to_string),
            timestamp: Utc::now(),
        }
    }

    fn fail(
        stage: CheckStage,
        category: ViolationCategory,
        severity: Severity,
        reason: impl Into<String>,
        conversation_id: Option<&str>,
    ) -> Self {
        Self {
            passed: false,
            stage,
            category: Some(category),
            severity: Some(severity),
            reason: reason.into(),
            conversation_id: conversation_id.map(str::to_string),
            timestamp: Utc::now(),
        }
    }

    pub fn is_critical(&self) -> bool {
        self.severity == Some(Severity::Critical)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GuardError {
    #[error("constitutional check could not be audited: {0}")]
    Audit(#[from] AuditError),
}

pub type GuardResult<T> = Result<T, GuardError>;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    /// Source tags accepted as inbound contact (case-insensitive prefixes).
    pub allowed_source_prefixes: Vec<String>,
    pub max_duration_secs: i64,
    pub max_extraction_facts: usize,
    /// Checks kept in memory for reporting.
    pub history_capacity: usize,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            allowed_source_prefixes: vec![
                "incoming_".to_string(),
                "test_".to_string(),
                "mock_".to_string(),
            ],
            max_duration_secs: 3600,
            max_extraction_facts: 20,
            history_capacity: 1000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplianceStatus {
    Clean,
    Warning,
    Violated,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardReport {
    pub total_checks: u64,
    pub total_violations: u64,
    pub critical_violations: u64,
    /// Up to the ten most recent violations, oldest first.
    pub recent_violations: Vec<ConstitutionalCheck>,
    pub compliance: ComplianceStatus,
}

#[derive(Default)]
struct History {
    recent: VecDeque<ConstitutionalCheck>,
    total_checks: u64,
    total_violations: u64,
    critical_violations: u64,
}

pub struct ConstitutionalGuard {
    config: GuardConfig,
    audit: Option<Arc<AuditChain>>,
    history: Mutex<History>,
}

impl Default for ConstitutionalGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl ConstitutionalGuard {
    pub fn new() -> Self {
        Self::with_config(GuardConfig::default())
    }

    pub fn with_config(config: GuardConfig) -> Self {
        Self {
            config,
            audit: None,
            history: Mutex::new(History::default()),
        }
    }

    /// Forward every check to `audit`.
    pub fn with_audit(mut self, audit: Arc<AuditChain>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn config(&self) -> &GuardConfig {
        &self.config
    }

    pub fn check_incoming_source(&self, source: &str) -> GuardResult<ConstitutionalCheck> {
        let lowered = source.trim().to_lowercase();
        let inbound = self
            .config
            .allowed_source_prefixes
            .iter()
            .any(|p| lowered.starts_with(&p.to_lowercase()) && lowered.len() > p.len());
        let check = if inbound {
            ConstitutionalCheck::pass(CheckStage::Source, None)
        } else {
            error!(source, "Rejected non-inbound contact source");
            ConstitutionalCheck::fail(
                CheckStage::Source,
                ViolationCategory::Initiation,
                Severity::Critical,
                format!("source '{source}' is not an inbound channel"),
                None,
            )
        };
        self.record(check)
    }

    pub fn check_input(
        &self,
        message: &str,
        conversation_id: Option<&str>,
    ) -> GuardResult<ConstitutionalCheck> {
        let check = match rules::worst_match(&rules::INPUT_RULES, message) {
            Some(rule) => ConstitutionalCheck::fail(
                CheckStage::Input,
                rule.category,
                rule.severity,
                format!("input matched {}", rule.name),
                conversation_id,
            ),
            None => ConstitutionalCheck::pass(CheckStage::Input, conversation_id),
        };
        self.record(check)
    }

    /// Check a candidate reply. With a persona, also reject vocabulary the
    /// persona would not use.
    pub fn check_output(
        &self,
        response: &str,
        persona: Option<&PersonaProfile>,
        conversation_id: Option<&str>,
    ) -> GuardResult<ConstitutionalCheck> {
        let check = if let Some(rule) = rules::worst_match(&rules::OUTPUT_RULES, response) {
            ConstitutionalCheck::fail(
                CheckStage::Output,
                rule.category,
                rule.severity,
                format!("output matched {}", rule.name),
                conversation_id,
            )
        } else if let Some(term) = persona.and_then(|p| out_of_character_term(response, p)) {
            ConstitutionalCheck::fail(
                CheckStage::Output,
                ViolationCategory::DeceptionEscalation,
                Severity::Medium,
                format!("persona would not say '{term}'"),
                conversation_id,
            )
        } else {
            ConstitutionalCheck::pass(CheckStage::Output, conversation_id)
        };
        self.record(check)
    }

    pub fn check_conversation_state(
        &self,
        context: &ConversationContext,
    ) -> GuardResult<ConstitutionalCheck> {
        self.check_conversation_state_at(context, Utc::now())
    }

    pub fn check_conversation_state_at(
        &self,
        context: &ConversationContext,
        now: DateTime<Utc>,
    ) -> GuardResult<ConstitutionalCheck> {
        let id = Some(context.conversation_id());
        let duration = context.duration_secs_at(now);
        let facts = context.extraction_fact_count();
        let check = if duration > self.config.max_duration_secs {
            ConstitutionalCheck::fail(
                CheckStage::ConversationState,
                ViolationCategory::EngagementLimit,
                Severity::Medium,
                format!(
                    "conversation ran {duration}s, limit {}s",
                    self.config.max_duration_secs
                ),
                id,
            )
        } else if facts > self.config.max_extraction_facts {
            ConstitutionalCheck::fail(
                CheckStage::ConversationState,
                ViolationCategory::EngagementLimit,
                Severity::Medium,
                format!(
                    "{facts} extraction facts, limit {}",
                    self.config.max_extraction_facts
                ),
                id,
            )
        } else {
            ConstitutionalCheck::pass(CheckStage::ConversationState, id)
        };
        self.record(check)
    }

    pub fn validate_incoming_source(&self, source: &str) -> bool {
        passed(self.check_incoming_source(source))
    }

    pub fn validate_input(&self, message: &str) -> bool {
        passed(self.check_input(message, None))
    }

    pub fn validate_output(&self, response: &str) -> bool {
        passed(self.check_output(response, None, None))
    }

    /// Conversation-state check; an unrecordable check comes back failed.
    pub fn validate_conversation_state(&self, context: &ConversationContext) -> ConstitutionalCheck {
        self.check_conversation_state(context).unwrap_or_else(|e| {
            ConstitutionalCheck::fail(
                CheckStage::ConversationState,
                ViolationCategory::AuditUnavailable,
                Severity::High,
                e.to_string(),
                Some(context.conversation_id()),
            )
        })
    }

    pub fn report(&self) -> GuardReport {
        let history = self.lock_history();
        let failed: Vec<&ConstitutionalCheck> =
            history.recent.iter().filter(|c| !c.passed).collect();
        let recent_violations = failed[failed.len().saturating_sub(RECENT_VIOLATIONS)..]
            .iter()
            .map(|c| (*c).clone())
            .collect();
        let compliance = if history.critical_violations > 0 {
            ComplianceStatus::Violated
        } else if history.total_violations > 0 {
            ComplianceStatus::Warning
        } else {
            ComplianceStatus::Clean
        };
        GuardReport {
            total_checks: history.total_checks,
            total_violations: history.total_violations,
            critical_violations: history.critical_violations,
            recent_violations,
            compliance,
        }
    }

    fn record(&self, check: ConstitutionalCheck) -> GuardResult<ConstitutionalCheck> {
        {
            let mut history = self.lock_history();
            history.total_checks += 1;
            if !check.passed {
                history.total_violations += 1;
                if check.is_critical() {
                    history.critical_violations += 1;
                }
                warn!(
                    stage = %check.stage,
                    category = ?check.category,
                    severity = ?check.severity,
                    reason = %check.reason,
                    "Constitutional violation"
                );
            }
            if self.config.history_capacity > 0 {
                if history.recent.len() >= self.config.history_capacity {
                    history.recent.pop_front();
                }
                history.recent.push_back(check.clone());
            }
        }

        if let Some(audit) = &self.audit {
            let payload = serde_json::to_value(&check).map_err(AuditError::from)?;
            audit.append(event::CONSTITUTIONAL_CHECK, payload)?;
        }
        Ok(check)
    }

    fn lock_history(&self) -> std::sync::MutexGuard<'_, History> {
        self.history.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn passed(result: GuardResult<ConstitutionalCheck>) -> bool {
    match result {
        Ok(check) => check.passed,
        Err(e) => {
            error!(error = %e, "Constitutional check failed closed");
            false
        }
    }
}

fn out_of_character_term(response: &str, persona: &PersonaProfile) -> Option<String> {
    let lowered = response.to_lowercase();
    let words: Vec<&str> = lowered
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();
    persona.forbidden_terms().into_iter().find(|term| {
        if term.contains(' ') {
            lowered.contains(term.as_str())
        } else {
            words.contains(&term.as_str())
        }
    })
}
