use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{
    http_client, transport_error, ReasoningError, ReasoningRequest, ReasoningResponse,
    ReasoningService,
};
use crate::config::{EndpointConfig, ReasoningConfig};

#[derive(Serialize)]
struct GenerateOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
    #[serde(default)]
    eval_count: Option<u32>,
}

/// Ollama `/api/generate` backend.
pub struct OllamaBackend {
    name: String,
    client: reqwest::Client,
    base_url: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
    max_timeout: Duration,
}

impl OllamaBackend {
    pub fn new(endpoint: &EndpointConfig, config: &ReasoningConfig) -> Result<Self, ReasoningError> {
        Ok(Self {
            name: endpoint.name.clone(),
            client: http_client(&endpoint.name, config.request_timeout())?,
            base_url: endpoint.url.trim_end_matches('/').to_string(),
            model: endpoint.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            max_timeout: config.request_timeout(),
        })
    }
}

#[async_trait]
impl ReasoningService for OllamaBackend {
    async fn generate(&self, request: &ReasoningRequest) -> Result<ReasoningResponse, ReasoningError> {
        let budget = request.timeout.min(self.max_timeout);
        let body = GenerateRequest {
            model: &self.model,
            prompt: &request.prompt,
            system: request.system_prompt.as_deref(),
            stream: false,
            options: GenerateOptions {
                temperature: self.temperature,
                num_predict: self.max_tokens,
            },
        };

        let started = Instant::now();
        let response = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .timeout(budget)
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(&self.name, e, budget))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ReasoningError::Status {
                backend: self.name.clone(),
                status: status.as_u16(),
            });
        }

        let parsed: GenerateResponse = response.json().await.map_err(|e| {
            ReasoningError::InvalidResponse {
                backend: self.name.clone(),
                message: e.to_string(),
            }
        })?;
        let text = parsed.response.trim().to_string();
        if text.is_empty() {
            return Err(ReasoningError::InvalidResponse {
                backend: self.name.clone(),
                message: "empty response".to_string(),
            });
        }

        let latency_ms = started.elapsed().as_millis() as u64;
        debug!(backend = %self.name, model = %self.model, latency_ms, "Ollama generation complete");
        Ok(ReasoningResponse {
            text,
            model: self.model.clone(),
            backend: self.name.clone(),
            latency_ms,
            tokens: parsed.eval_count,
        })
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_body_shape() {
        let body = GenerateRequest {
            model: "llama3.1:8b",
            prompt: "hi",
            system: Some("persona"),
            stream: false,
            options: GenerateOptions {
                temperature: 0.8,
                num_predict: 150,
            },
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["stream"], false);
        assert_eq!(json["options"]["num_predict"], 150);
        assert_eq!(json["system"], "persona");
    }

    #[test]
    fn test_response_parses_without_eval_count() {
        let parsed: GenerateResponse = serde_json::from_str(r#"{"response":" Hello "}"#).unwrap();
        assert_eq!(parsed.response.trim(), "Hello");
        assert!(parsed.eval_count.is_none());
    }

    #[tokio::test]
    async fn test_unreachable_server_is_unavailable() {
        let endpoint = EndpointConfig {
            name: "local".into(),
            provider: crate::config::Provider::Ollama,
            url: "http://127.0.0.1:9".into(),
            model: "m".into(),
            api_key: None,
        };
        let backend = OllamaBackend::new(&endpoint, &ReasoningConfig::default()).unwrap();
        let err = backend
            .generate(&ReasoningRequest {
                prompt: "hi".into(),
                system_prompt: None,
                timeout: Duration::from_secs(2),
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ReasoningError::Unavailable { .. } | ReasoningError::Timeout { .. }
        ));
    }
}
