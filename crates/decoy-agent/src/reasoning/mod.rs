//! Reasoning service: the slow, generative reply path.
//!
//! The orchestrator only sees [`ReasoningService`]. Concrete backends speak
//! Ollama or OpenAI-compatible HTTP; [`FailoverReasoner`] walks several of
//! them behind a circuit breaker.

pub mod failover;
pub mod ollama;
pub mod openai;
pub mod prompt;

pub use failover::FailoverReasoner;
pub use ollama::OllamaBackend;
pub use openai::OpenAiCompatBackend;
pub use prompt::{Exchange, PromptBuilder};

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::{Provider, ReasoningConfig};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasoningRequest {
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    /// Per-call budget; backends also apply it to their HTTP request.
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasoningResponse {
    pub text: String,
    pub model: String,
    /// Which backend answered.
    pub backend: String,
    pub latency_ms: u64,
    #[serde(default)]
    pub tokens: Option<u32>,
}

#[derive(Debug, thiserror::Error)]
pub enum ReasoningError {
    #[error("backend {backend} unavailable: {message}")]
    Unavailable { backend: String, message: String },

    #[error("backend {backend} returned HTTP {status}")]
    Status { backend: String, status: u16 },

    #[error("backend {backend} returned an unusable response: {message}")]
    InvalidResponse { backend: String, message: String },

    #[error("reasoning call exceeded {budget_ms} ms")]
    Timeout { budget_ms: u64 },

    #[error("no reasoning backend available")]
    NoBackend,

    #[error("reasoning call cancelled")]
    Cancelled,
}

/// Generative reply backend.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ReasoningService: Send + Sync {
    async fn generate(&self, request: &ReasoningRequest) -> Result<ReasoningResponse, ReasoningError>;

    fn name(&self) -> &str;
}

/// Build the configured backend chain.
pub fn from_config(config: &ReasoningConfig) -> Result<Arc<dyn ReasoningService>, ReasoningError> {
    let backends: Vec<Arc<dyn ReasoningService>> = config
        .endpoints
        .iter()
        .map(|endpoint| -> Result<Arc<dyn ReasoningService>, ReasoningError> {
            Ok(match endpoint.provider {
                Provider::Ollama => Arc::new(OllamaBackend::new(endpoint, config)?),
                Provider::OpenaiCompatible => Arc::new(OpenAiCompatBackend::new(endpoint, config)?),
            })
        })
        .collect::<Result<_, _>>()?;

    if backends.is_empty() {
        return Err(ReasoningError::NoBackend);
    }
    Ok(Arc::new(FailoverReasoner::new(
        backends,
        config.circuit_failure_threshold,
        config.circuit_cooldown_secs,
    )))
}

/// Shared HTTP client construction for backends.
pub(crate) fn http_client(name: &str, timeout: Duration) -> Result<reqwest::Client, ReasoningError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| ReasoningError::Unavailable {
            backend: name.to_string(),
            message: e.to_string(),
        })
}

pub(crate) fn transport_error(name: &str, err: reqwest::Error, budget: Duration) -> ReasoningError {
    if err.is_timeout() {
        ReasoningError::Timeout {
            budget_ms: budget.as_millis() as u64,
        }
    } else {
        ReasoningError::Unavailable {
            backend: name.to_string(),
            message: err.to_string(),
        }
    }
}
