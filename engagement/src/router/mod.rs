//! Brain router: fast canned reply or escalation to the reasoning path.
//!
//! Decision order (first hit wins):
//! 1. Active extraction phase (`SuspicionArousal`, `Extraction`) → escalate
//! 2. Urgency above threshold → escalate
//! 3. Long message → escalate
//! 4. Otherwise → fast
//!
//! After the fast responder runs, [`BrainRouter::upgrade`] may still promote
//! a fast decision whose reply confidence is high enough.

pub mod circuit_breaker;

pub use circuit_breaker::{CircuitBreaker, CircuitState, FallbackLadder};

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::patterns::{MessageAnalysis, PatternMatcher};
use crate::phase::{ConversationContext, Phase};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Canned pattern-matched reply, near-zero latency.
    Fast,
    /// Reasoning service call under a latency budget.
    Escalate,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fast => write!(f, "fast"),
            Self::Escalate => write!(f, "escalate"),
        }
    }
}

/// Which rule produced a decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "rule")]
pub enum RouteTrigger {
    ActiveExtractionPhase { phase: Phase },
    HighUrgency { score: f64 },
    ComplexMessage { words: usize },
    SimpleMessage,
    HighConfidenceUpgrade { confidence: f64 },
}

impl fmt::Display for RouteTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ActiveExtractionPhase { phase } => write!(f, "Active extraction phase ({phase})"),
            Self::HighUrgency { score } => write!(f, "High urgency score: {score:.2}"),
            Self::ComplexMessage { words } => write!(f, "Complex message: {words} words"),
            Self::SimpleMessage => write!(f, "Simple pattern-matched response"),
            Self::HighConfidenceUpgrade { confidence } => {
                write!(f, "Upgraded from fast path: reply confidence {confidence:.2}")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub strategy: Strategy,
    pub confidence: f64,
    pub reason: String,
    /// Advisory; the orchestrator uses it as the reasoning timeout.
    pub latency_budget_ms: u64,
    pub trigger: RouteTrigger,
}

impl RoutingDecision {
    fn new(strategy: Strategy, confidence: f64, latency_budget_ms: u64, trigger: RouteTrigger) -> Self {
        Self {
            strategy,
            confidence,
            reason: trigger.to_string(),
            latency_budget_ms,
            trigger,
        }
    }

    pub fn is_escalate(&self) -> bool {
        self.strategy == Strategy::Escalate
    }
}

/// Thresholds and latency budgets for routing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Urgency strictly above this escalates.
    pub urgency_threshold: f64,
    /// Word count strictly above this escalates.
    pub complexity_words: usize,
    /// Fast reply confidence strictly above this upgrades to escalate.
    pub upgrade_confidence: f64,
    pub extraction_budget_ms: u64,
    pub urgency_budget_ms: u64,
    pub complexity_budget_ms: u64,
    pub upgrade_budget_ms: u64,
    pub fast_budget_ms: u64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            urgency_threshold: 0.7,
            complexity_words: 50,
            upgrade_confidence: 0.8,
            extraction_budget_ms: 5000,
            urgency_budget_ms: 4000,
            complexity_budget_ms: 4000,
            upgrade_budget_ms: 5000,
            fast_budget_ms: 100,
        }
    }
}

pub struct BrainRouter {
    matcher: Arc<PatternMatcher>,
    config: RouterConfig,
}

impl BrainRouter {
    pub fn new(matcher: Arc<PatternMatcher>) -> Self {
        Self::with_config(matcher, RouterConfig::default())
    }

    pub fn with_config(matcher: Arc<PatternMatcher>, config: RouterConfig) -> Self {
        Self { matcher, config }
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Classify `message` and decide. Prefer [`Self::decide_analyzed`] when an
    /// analysis for the message already exists.
    pub fn decide(&self, message: &str, context: &ConversationContext) -> RoutingDecision {
        let analysis = self.matcher.analyze_message(message);
        self.decide_analyzed(&analysis, context.current_phase())
    }

    pub fn decide_analyzed(&self, analysis: &MessageAnalysis, phase: Phase) -> RoutingDecision {
        let c = &self.config;
        let decision = if phase.is_extracting() {
            RoutingDecision::new(
                Strategy::Escalate,
                0.9,
                c.extraction_budget_ms,
                RouteTrigger::ActiveExtractionPhase { phase },
            )
        } else if analysis.urgency > c.urgency_threshold {
            RoutingDecision::new(
                Strategy::Escalate,
                analysis.urgency,
                c.urgency_budget_ms,
                RouteTrigger::HighUrgency {
                    score: analysis.urgency,
                },
            )
        } else if analysis.word_count > c.complexity_words {
            RoutingDecision::new(
                Strategy::Escalate,
                0.6,
                c.complexity_budget_ms,
                RouteTrigger::ComplexMessage {
                    words: analysis.word_count,
                },
            )
        } else {
            RoutingDecision::new(Strategy::Fast, 0.8, c.fast_budget_ms, RouteTrigger::SimpleMessage)
        };

        debug!(
            strategy = %decision.strategy,
            reason = %decision.reason,
            budget_ms = decision.latency_budget_ms,
            "Routing decision"
        );
        decision
    }

    /// Promote a fast decision when the fast reply's confidence is high.
    ///
    /// Escalate decisions and low-confidence replies pass through unchanged.
    pub fn upgrade(&self, decision: RoutingDecision, reply_confidence: f64) -> RoutingDecision {
        if decision.strategy == Strategy::Fast && reply_confidence > self.config.upgrade_confidence {
            RoutingDecision::new(
                Strategy::Escalate,
                0.9,
                self.config.upgrade_budget_ms,
                RouteTrigger::HighConfidenceUpgrade {
                    confidence: reply_confidence,
                },
            )
        } else {
            decision
        }
    }
}

/// Intelligence the persona should steer toward in a phase.
pub fn extraction_goals(phase: Phase) -> &'static [&'static str] {
    match phase {
        Phase::Idle | Phase::InitialContact => &[
            "Learn the caller's name and the organization they claim",
            "Find out how they got this number",
        ],
        Phase::TrustBuilding => &[
            "Learn their location and working hours",
            "Ask who else works with them",
        ],
        Phase::SuspicionArousal => &[
            "Ask for an official callback number",
            "Ask for an employee ID or reference number",
            "Ask which website or app they want used",
        ],
        Phase::Extraction => &[
            "Get the exact payment method and amount",
            "Get account numbers, UPI IDs or wallet addresses",
            "Get phone numbers and email addresses to send proof to",
        ],
        Phase::Termination => &[],
    }
}
