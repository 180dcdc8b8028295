use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use engagement::router::{CircuitBreaker, FallbackLadder};
use tokio::time::Instant;
use tracing::{info, warn};

use super::{ReasoningError, ReasoningRequest, ReasoningResponse, ReasoningService};

/// Tries backends in configured order, skipping any whose circuit is open.
pub struct FailoverReasoner {
    backends: Vec<Arc<dyn ReasoningService>>,
    ladder: FallbackLadder,
    breaker: Mutex<CircuitBreaker>,
}

impl FailoverReasoner {
    pub fn new(
        backends: Vec<Arc<dyn ReasoningService>>,
        failure_threshold: u32,
        cooldown_secs: u64,
    ) -> Self {
        let ladder = FallbackLadder::new(backends.iter().map(|b| b.name().to_string()).collect());
        Self {
            backends,
            ladder,
            breaker: Mutex::new(CircuitBreaker::new(failure_threshold, cooldown_secs)),
        }
    }

    fn candidates(&self) -> Vec<Arc<dyn ReasoningService>> {
        let breaker = self.breaker.lock().unwrap_or_else(|e| e.into_inner());
        self.ladder
            .available(&breaker)
            .filter_map(|name| self.backends.iter().find(|b| b.name() == name).cloned())
            .collect()
    }

    fn record(&self, backend: &str, ok: bool) {
        self.breaker
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .record(backend, ok);
    }

    /// Consecutive failures recorded against `backend`.
    pub fn failure_count(&self, backend: &str) -> u32 {
        self.breaker
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .failure_count(backend)
    }
}

#[async_trait]
impl ReasoningService for FailoverReasoner {
    /// Each attempt gets an equal share of what is left of `request.timeout`,
    /// so a hanging backend is abandoned and counted as a failure in time for
    /// the next one to answer.
    async fn generate(&self, request: &ReasoningRequest) -> Result<ReasoningResponse, ReasoningError> {
        let candidates = self.candidates();
        if candidates.is_empty() {
            warn!("All reasoning circuits open");
            return Err(ReasoningError::NoBackend);
        }

        let deadline = Instant::now() + request.timeout;
        let mut last_err = ReasoningError::NoBackend;
        for (attempt, backend) in candidates.iter().enumerate() {
            let left = candidates.len() - attempt;
            let slice = deadline.saturating_duration_since(Instant::now()) / left as u32;
            let attempt_request = ReasoningRequest {
                timeout: slice,
                ..request.clone()
            };

            let outcome = tokio::time::timeout(slice, backend.generate(&attempt_request))
                .await
                .unwrap_or_else(|_| {
                    Err(ReasoningError::Timeout {
                        budget_ms: slice.as_millis() as u64,
                    })
                });
            match outcome {
                Ok(response) => {
                    self.record(backend.name(), true);
                    if attempt > 0 {
                        info!(backend = backend.name(), attempt, "Reasoning served by fallback backend");
                    }
                    return Ok(response);
                }
                Err(e) => {
                    warn!(backend = backend.name(), error = %e, "Reasoning backend failed");
                    self.record(backend.name(), false);
                    last_err = e;
                }
            }
        }
        Err(last_err)
    }

    fn name(&self) -> &str {
        "failover"
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::reasoning::MockReasoningService;

    fn request() -> ReasoningRequest {
        ReasoningRequest {
            prompt: "hello".into(),
            system_prompt: None,
            timeout: Duration::from_secs(1),
        }
    }

    fn failing(name: &'static str) -> MockReasoningService {
        let mut mock = MockReasoningService::new();
        mock.expect_name().return_const(name.to_string());
        mock.expect_generate().returning(move |_| {
            Err(ReasoningError::Unavailable {
                backend: name.to_string(),
                message: "connection refused".into(),
            })
        });
        mock
    }

    fn answering(name: &'static str) -> MockReasoningService {
        let mut mock = MockReasoningService::new();
        mock.expect_name().return_const(name.to_string());
        mock.expect_generate().returning(move |_| {
            Ok(ReasoningResponse {
                text: "Which bank is this?".into(),
                model: "m".into(),
                backend: name.to_string(),
                latency_ms: 5,
                tokens: Some(6),
            })
        });
        mock
    }

    #[tokio::test]
    async fn test_falls_through_to_second_backend() {
        let reasoner = FailoverReasoner::new(
            vec![Arc::new(failing("primary")), Arc::new(answering("secondary"))],
            3,
            60,
        );
        let response = reasoner.generate(&request()).await.unwrap();
        assert_eq!(response.backend, "secondary");
        assert_eq!(reasoner.failure_count("primary"), 1);
        assert_eq!(reasoner.failure_count("secondary"), 0);
    }

    struct Hanging;

    #[async_trait]
    impl ReasoningService for Hanging {
        async fn generate(&self, _request: &ReasoningRequest) -> Result<ReasoningResponse, ReasoningError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Err(ReasoningError::NoBackend)
        }

        fn name(&self) -> &str {
            "primary"
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_backend_times_out_and_trips() {
        let backends: Vec<Arc<dyn ReasoningService>> =
            vec![Arc::new(Hanging), Arc::new(answering("secondary"))];
        let reasoner = FailoverReasoner::new(backends, 2, 3600);
        let budgeted = ReasoningRequest {
            timeout: Duration::from_millis(4000),
            ..request()
        };

        for _ in 0..5 {
            let response = tokio::time::timeout(budgeted.timeout, reasoner.generate(&budgeted))
                .await
                .expect("the secondary answers inside the caller's budget")
                .unwrap();
            assert_eq!(response.backend, "secondary");
        }
        // Two timeouts trip the primary; later calls skip it.
        assert_eq!(reasoner.failure_count("primary"), 2);
    }

    #[tokio::test]
    async fn test_open_circuit_skips_backend() {
        let reasoner = FailoverReasoner::new(vec![Arc::new(failing("primary"))], 2, 9999);
        assert!(reasoner.generate(&request()).await.is_err());
        assert!(reasoner.generate(&request()).await.is_err());
        let err = reasoner.generate(&request()).await.unwrap_err();
        assert!(matches!(err, ReasoningError::NoBackend));
        assert_eq!(reasoner.failure_count("primary"), 2);
    }
}
