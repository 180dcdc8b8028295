use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use engagement::audit::DEFAULT_CHAIN_KEY;
use engagement::guard::GuardConfig;
use engagement::phase::PolicyConfig;
use engagement::router::RouterConfig;
use serde::Deserialize;

use crate::personas::PersonaDescriptor;

const ENV_REASONING_URL: &str = "DECOY_REASONING_URL";
const ENV_REASONING_MODEL: &str = "DECOY_REASONING_MODEL";
const ENV_REASONING_PROVIDER: &str = "DECOY_REASONING_PROVIDER";
const ENV_REASONING_API_KEY: &str = "DECOY_REASONING_API_KEY";
const ENV_AUDIT_DIR: &str = "DECOY_AUDIT_DIR";
const ENV_AUDIT_KEY: &str = "DECOY_AUDIT_KEY";
const ENV_STORE_PATH: &str = "DECOY_STORE_PATH";
const ENV_STORE_KEY: &str = "DECOY_STORE_KEY";

const DEFAULT_REASONING_URL: &str = "http://localhost:11434";
const DEFAULT_REASONING_MODEL: &str = "llama3.1:8b";
const DEFAULT_AUDIT_DIR: &str = "logs/audit";
const DEFAULT_PERSONA: &str = "elderly_coimbatore";

/// Wire protocol of a reasoning endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    /// Ollama `/api/generate`.
    Ollama,
    /// Any `/chat/completions` server (llama.cpp, vLLM, hosted APIs).
    OpenaiCompatible,
}

impl Provider {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "ollama" => Some(Self::Ollama),
            "openai" | "openai_compatible" | "openai-compatible" => Some(Self::OpenaiCompatible),
            _ => None,
        }
    }
}

/// One reasoning endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct EndpointConfig {
    pub name: String,
    pub provider: Provider,
    pub url: String,
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReasoningConfig {
    /// Tried in order; a backend with an open circuit is skipped.
    pub endpoints: Vec<EndpointConfig>,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Upper bound on any single call, whatever the routing budget says.
    pub request_timeout_secs: u64,
    pub circuit_failure_threshold: u32,
    pub circuit_cooldown_secs: u64,
    /// Exchanges kept per conversation; the prompt uses the most recent five.
    pub history_limit: usize,
}

impl Default for ReasoningConfig {
    fn default() -> Self {
        let provider = env::var(ENV_REASONING_PROVIDER)
            .ok()
            .and_then(|p| Provider::parse(&p))
            .unwrap_or(Provider::Ollama);
        Self {
            endpoints: vec![EndpointConfig {
                name: "primary".to_string(),
                provider,
                url: env::var(ENV_REASONING_URL).unwrap_or_else(|_| DEFAULT_REASONING_URL.into()),
                model: env::var(ENV_REASONING_MODEL)
                    .unwrap_or_else(|_| DEFAULT_REASONING_MODEL.into()),
                api_key: env::var(ENV_REASONING_API_KEY).ok(),
            }],
            temperature: 0.8,
            max_tokens: 150,
            request_timeout_secs: 30,
            circuit_failure_threshold: 3,
            circuit_cooldown_secs: 60,
            history_limit: 10,
        }
    }
}

impl ReasoningConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    pub dir: PathBuf,
    /// HMAC key for chain hashes.
    pub chain_key: String,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            dir: env::var(ENV_AUDIT_DIR)
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_AUDIT_DIR)),
            chain_key: env::var(ENV_AUDIT_KEY).unwrap_or_else(|_| DEFAULT_CHAIN_KEY.into()),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// JSONL file the store appends to. `None` keeps blobs in memory only.
    pub path: Option<PathBuf>,
    /// Hex-encoded 32-byte AES-256-GCM key. Generated per run when absent.
    pub encryption_key: Option<String>,
    pub request_timeout_ms: u64,
    pub queue_depth: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: env::var(ENV_STORE_PATH).ok().map(PathBuf::from),
            encryption_key: env::var(ENV_STORE_KEY).ok(),
            request_timeout_ms: 2000,
            queue_depth: 256,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub max_messages: u32,
    pub max_duration_secs: i64,
    /// Sessions idle this long are archived by cleanup.
    pub idle_timeout_secs: i64,
    /// How long a message waits for its conversation's lock.
    pub lock_timeout_ms: u64,
    /// Raw turns older than this are pruned from storage by cleanup.
    pub turn_retention_secs: i64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_messages: 100,
            max_duration_secs: 3600,
            idle_timeout_secs: 7200,
            lock_timeout_ms: 10_000,
            turn_retention_secs: 86_400,
        }
    }
}

/// Top-level agent configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub default_persona: String,
    pub reasoning: ReasoningConfig,
    pub router: RouterConfig,
    pub policy: PolicyConfig,
    pub guard: GuardConfig,
    pub audit: AuditConfig,
    pub storage: StorageConfig,
    pub session: SessionConfig,
    /// Extra personas, added to the built-in ones.
    pub personas: Vec<PersonaDescriptor>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            default_persona: DEFAULT_PERSONA.to_string(),
            reasoning: ReasoningConfig::default(),
            router: RouterConfig::default(),
            policy: PolicyConfig::default(),
            guard: GuardConfig::default(),
            audit: AuditConfig::default(),
            storage: StorageConfig::default(),
            session: SessionConfig::default(),
            personas: Vec::new(),
        }
    }
}

impl AgentConfig {
    /// Load from a TOML file, or defaults when `path` is `None`.
    ///
    /// `DECOY_*` environment variables override whatever the file sets.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("reading config {}", path.display()))?;
                Self::from_toml(&text)
                    .with_context(|| format!("parsing config {}", path.display()))?
            }
            None => Self::default(),
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    fn apply_env(&mut self) {
        if let Some(primary) = self.reasoning.endpoints.first_mut() {
            if let Ok(url) = env::var(ENV_REASONING_URL) {
                primary.url = url;
            }
            if let Ok(model) = env::var(ENV_REASONING_MODEL) {
                primary.model = model;
            }
            if let Some(provider) = env::var(ENV_REASONING_PROVIDER)
                .ok()
                .and_then(|p| Provider::parse(&p))
            {
                primary.provider = provider;
            }
            if let Ok(key) = env::var(ENV_REASONING_API_KEY) {
                primary.api_key = Some(key);
            }
        }
        if let Ok(dir) = env::var(ENV_AUDIT_DIR) {
            self.audit.dir = PathBuf::from(dir);
        }
        if let Ok(key) = env::var(ENV_AUDIT_KEY) {
            self.audit.chain_key = key;
        }
        if let Ok(path) = env::var(ENV_STORE_PATH) {
            self.storage.path = Some(PathBuf::from(path));
        }
        if let Ok(key) = env::var(ENV_STORE_KEY) {
            self.storage.encryption_key = Some(key);
        }
    }

    fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            !self.reasoning.endpoints.is_empty(),
            "reasoning.endpoints must list at least one endpoint"
        );
        anyhow::ensure!(
            self.session.max_messages > 0,
            "session.max_messages must be positive"
        );
        if let Some(key) = &self.storage.encryption_key {
            let bytes = hex::decode(key.trim()).context("storage.encryption_key is not hex")?;
            anyhow::ensure!(bytes.len() == 32, "storage.encryption_key must be 32 bytes");
        }
        Ok(())
    }
}
