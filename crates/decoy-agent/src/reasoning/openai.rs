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
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    #[serde(default)]
    completion_tokens: Option<u32>,
}

/// `/chat/completions` backend for llama.cpp, vLLM and hosted APIs.
pub struct OpenAiCompatBackend {
    name: String,
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
    temperature: f32,
    max_tokens: u32,
    max_timeout: Duration,
}

impl OpenAiCompatBackend {
    pub fn new(endpoint: &EndpointConfig, config: &ReasoningConfig) -> Result<Self, ReasoningError> {
        Ok(Self {
            name: endpoint.name.clone(),
            client: http_client(&endpoint.name, config.request_timeout())?,
            base_url: endpoint.url.trim_end_matches('/').to_string(),
            model: endpoint.model.clone(),
            api_key: endpoint.api_key.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            max_timeout: config.request_timeout(),
        })
    }

    fn body<'a>(&'a self, request: &'a ReasoningRequest) -> ChatRequest<'a> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = request.system_prompt.as_deref() {
            messages.push(ChatMessage {
                role: "system",
                content: system,
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: &request.prompt,
        });
        ChatRequest {
            model: &self.model,
            messages,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }
}

#[async_trait]
impl ReasoningService for OpenAiCompatBackend {
    async fn generate(&self, request: &ReasoningRequest) -> Result<ReasoningResponse, ReasoningError> {
        let budget = request.timeout.min(self.max_timeout);
        let mut builder = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .timeout(budget)
            .json(&self.body(request));
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let started = Instant::now();
        let response = builder
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

        let parsed: ChatResponse =
            response
                .json()
                .await
                .map_err(|e| ReasoningError::InvalidResponse {
                    backend: self.name.clone(),
                    message: e.to_string(),
                })?;

        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ReasoningError::InvalidResponse {
                backend: self.name.clone(),
                message: "no completion content".to_string(),
            })?;

        let latency_ms = started.elapsed().as_millis() as u64;
        debug!(backend = %self.name, model = %self.model, latency_ms, "Chat completion complete");
        Ok(ReasoningResponse {
            text,
            model: self.model.clone(),
            backend: self.name.clone(),
            latency_ms,
            tokens: parsed.usage.and_then(|u| u.completion_tokens),
        })
    }

    fn name(&self) -> &str {
        &self.name
    }
}
