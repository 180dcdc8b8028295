//! Session orchestration: one inbound message through guard checks, routing,
//! reply generation, phase policy, extraction and audit.
//!
//! The engine owns every component explicitly; nothing here is global.
//! Sessions sit behind their own `tokio::sync::Mutex`, so messages for one
//! conversation are processed strictly one at a time while different
//! conversations proceed in parallel.

mod report;
mod session;

pub use report::{IntelligenceReport, SystemStatus};
pub use session::{Session, SessionInfo};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context as _;
use chrono::{DateTime, Utc};
use engagement::audit::{event, AuditChain, AuditError};
use engagement::extraction::{ExtractionEngine, TacticClassifier};
use engagement::guard::{ConstitutionalGuard, GuardError};
use engagement::patterns::{FastResponder, PatternMatcher, SAFE_GENERIC_REPLY};
use engagement::phase::{Phase, PhasePolicy, PolicyConfig};
use engagement::router::{BrainRouter, RouterConfig, RoutingDecision, Strategy};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::{Mutex, MutexGuard, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{AgentConfig, SessionConfig};
use crate::personas::PersonaRegistry;
use crate::reasoning::{self, PromptBuilder, ReasoningError, ReasoningRequest, ReasoningService};
use crate::storage::{BlobKind, NewBlob, StorageError, StorageSink, StoreHandle};

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("source '{channel}' rejected: {reason}")]
    SourceRejected { channel: String, reason: String },

    #[error("message rejected: {reason}")]
    InputRejected { reason: String },

    #[error("unknown persona '{0}'")]
    UnknownPersona(String),

    #[error("no session '{0}'")]
    SessionNotFound(String),

    #[error("session '{0}' is busy")]
    SessionBusy(String),

    #[error("session '{0}' has ended")]
    SessionEnded(String),

    #[error("engine is shutting down")]
    ShuttingDown,

    #[error(transparent)]
    Guard(#[from] GuardError),

    #[error("audit: {0}")]
    Audit(#[from] AuditError),

    #[error("storage: {0}")]
    Storage(#[from] StorageError),

    #[error("serialization: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl EngineError {
    /// What a transport may show the other party. Never an internal detail.
    pub fn public_reply(&self) -> &'static str {
        match self {
            Self::SessionBusy(_) => "One moment please, I am still reading your last message.",
            Self::SessionEnded(_) | Self::ShuttingDown => "Sorry, I have to go now. Goodbye.",
            _ => SAFE_GENERIC_REPLY,
        }
    }
}

/// Reply to one inbound message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineReply {
    pub conversation_id: String,
    pub response: String,
    /// Phase after this message was processed.
    pub phase: Phase,
    pub strategy: Strategy,
    pub confidence: f64,
    pub reason: String,
    /// Reasoning failed or timed out and a canned reply was used.
    pub fallback: bool,
    /// The generated reply failed the output check and was replaced.
    pub substituted: bool,
    pub new_iocs: usize,
    pub terminated: bool,
    pub processing_ms: u64,
}

/// Everything the engine is built from.
pub struct EngineParts {
    pub session: SessionConfig,
    pub router: RouterConfig,
    pub policy: PolicyConfig,
    /// Ceiling on any reasoning call, whatever the routing budget.
    pub request_timeout: Duration,
    pub history_limit: usize,
    pub audit: Arc<AuditChain>,
    pub guard: Arc<ConstitutionalGuard>,
    pub reasoner: Arc<dyn ReasoningService>,
    pub storage: Arc<dyn StorageSink>,
    pub personas: PersonaRegistry,
}

impl EngineParts {
    /// Default settings and built-in personas around the given services.
    pub fn new(
        audit: Arc<AuditChain>,
        guard: Arc<ConstitutionalGuard>,
        reasoner: Arc<dyn ReasoningService>,
        storage: Arc<dyn StorageSink>,
    ) -> Self {
        Self {
            session: SessionConfig::default(),
            router: RouterConfig::default(),
            policy: PolicyConfig::default(),
            request_timeout: Duration::from_secs(30),
            history_limit: 10,
            audit,
            guard,
            reasoner,
            storage,
            personas: PersonaRegistry::default(),
        }
    }
}

type SessionMap = HashMap<String, Arc<Mutex<Session>>>;

pub struct Engine {
    settings: SessionConfig,
    request_timeout: Duration,
    history_limit: usize,
    matcher: Arc<PatternMatcher>,
    router: BrainRouter,
    responder: FastResponder,
    policy: PhasePolicy,
    extractor: ExtractionEngine,
    classifier: TacticClassifier,
    prompts: PromptBuilder,
    audit: Arc<AuditChain>,
    guard: Arc<ConstitutionalGuard>,
    reasoner: Arc<dyn ReasoningService>,
    storage: Arc<dyn StorageSink>,
    personas: PersonaRegistry,
    sessions: RwLock<SessionMap>,
    cancel: CancellationToken,
    started: Instant,
}

impl Engine {
    pub fn new(parts: EngineParts) -> Self {
        let matcher = Arc::new(PatternMatcher::new());
        Self {
            settings: parts.session,
            request_timeout: parts.request_timeout,
            history_limit: parts.history_limit,
            router: BrainRouter::with_config(Arc::clone(&matcher), parts.router),
            matcher,
            responder: FastResponder::new(),
            policy: PhasePolicy::with_config(parts.policy),
            extractor: ExtractionEngine::new(),
            classifier: TacticClassifier::new(),
            prompts: PromptBuilder::new(),
            audit: parts.audit,
            guard: parts.guard,
            reasoner: parts.reasoner,
            storage: parts.storage,
            personas: parts.personas,
            sessions: RwLock::new(HashMap::new()),
            cancel: CancellationToken::new(),
            started: Instant::now(),
        }
    }

    /// Open the audit chain, spawn storage and build reasoning backends from config.
    pub async fn from_config(config: &AgentConfig) -> anyhow::Result<Self> {
        let audit = Arc::new(
            AuditChain::open(config.audit.dir.clone(), config.audit.chain_key.as_bytes())
                .with_context(|| {
                    format!("opening audit chain in {}", config.audit.dir.display())
                })?,
        );
        let guard = Arc::new(
            ConstitutionalGuard::with_config(config.guard.clone()).with_audit(Arc::clone(&audit)),
        );
        let reasoner =
            reasoning::from_config(&config.reasoning).context("building reasoning backends")?;
        let storage: Arc<dyn StorageSink> = Arc::new(
            StoreHandle::spawn(&config.storage)
                .await
                .context("starting storage")?,
        );

        info!(
            audit_dir = %config.audit.dir.display(),
            endpoints = config.reasoning.endpoints.len(),
            persistent_store = config.storage.path.is_some(),
            "Engine components ready"
        );

        Ok(Self::new(EngineParts {
            session: config.session.clone(),
            router: config.router.clone(),
            policy: config.policy.clone(),
            request_timeout: config.reasoning.request_timeout(),
            history_limit: config.reasoning.history_limit,
            audit,
            guard,
            reasoner,
            storage,
            personas: PersonaRegistry::new(config.personas.clone(), &config.default_persona),
        }))
    }

    pub fn personas(&self) -> &PersonaRegistry {
        &self.personas
    }

    pub fn audit(&self) -> &Arc<AuditChain> {
        &self.audit
    }

    pub fn guard(&self) -> &Arc<ConstitutionalGuard> {
        &self.guard
    }

    /// Cancelling this token aborts in-flight reasoning calls and refuses new work.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Start a conversation for inbound contact from `source`.
    ///
    /// Sources without an inbound prefix are refused: the agent never
    /// initiates contact.
    pub async fn create_session(
        &self,
        source: &str,
        persona: Option<&str>,
    ) -> Result<SessionInfo, EngineError> {
        self.ensure_running()?;
        let check = self.guard.check_incoming_source(source)?;
        if !check.passed {
            return Err(EngineError::SourceRejected {
                channel: source.to_string(),
                reason: check.reason,
            });
        }

        let persona = match persona {
            Some(id) => self.personas.get(id),
            None => self.personas.default_persona(),
        }
        .cloned()
        .ok_or_else(|| {
            EngineError::UnknownPersona(persona.unwrap_or(self.personas.default_id()).to_string())
        })?;

        let id = uuid::Uuid::new_v4().to_string();
        let mut session = Session::new(id.clone(), source, persona, self.history_limit);
        session.machine.set_metadata("source", json!(source));
        session
            .machine
            .set_metadata("persona", json!(session.persona.id));

        self.audit.append(
            event::SESSION_CREATED,
            json!({
                "conversation_id": id,
                "source": source,
                "persona": session.persona.id,
            }),
        )?;
        self.transition(&mut session, Phase::InitialContact, "inbound contact")?;

        let info = session.info();
        self.sessions
            .write()
            .await
            .insert(id.clone(), Arc::new(Mutex::new(session)));
        info!(conversation_id = %id, source, persona = %info.persona, "Session created");
        Ok(info)
    }

    /// Process one inbound message and produce the persona's reply.
    pub async fn handle_message(
        &self,
        conversation_id: &str,
        message: &str,
    ) -> Result<EngineReply, EngineError> {
        self.ensure_running()?;
        let started = Instant::now();
        let handle = self.session_handle(conversation_id).await?;
        let mut session = self.lock_session(conversation_id, &handle).await?;
        if session.machine.is_terminal() {
            return Err(EngineError::SessionEnded(conversation_id.to_string()));
        }

        let input = self.guard.check_input(message, Some(conversation_id))?;
        if !input.passed && input.is_critical() {
            warn!(conversation_id, reason = %input.reason, "Inbound message rejected");
            return Err(EngineError::InputRejected {
                reason: input.reason,
            });
        }

        session.messages += 1;
        session.last_activity = Utc::now();
        session.inbound.push(message.to_string());
        let turn = session.messages;
        let phase = session.phase();

        // One classification per message, shared by routing, the fast reply and the phase policy.
        let analysis = self.matcher.analyze_message(message);
        let fast = self
            .responder
            .respond(&analysis, Some(&session.persona.profile), message);
        let decision = self
            .router
            .upgrade(self.router.decide_analyzed(&analysis, phase), fast.confidence);
        self.audit.append(
            event::ROUTING_DECISION,
            json!({
                "conversation_id": conversation_id,
                "turn": turn,
                "phase": phase,
                "strategy": decision.strategy,
                "confidence": decision.confidence,
                "reason": decision.reason,
                "latency_budget_ms": decision.latency_budget_ms,
                "trigger": decision.trigger,
                "patterns": analysis.pattern_names(),
                "urgency": analysis.urgency,
            }),
        )?;

        let (mut response, fallback) = if decision.is_escalate() {
            self.reason(&session, message, &decision).await?
        } else {
            (fast.text, false)
        };

        let output =
            self.guard
                .check_output(&response, Some(&session.persona.profile), Some(conversation_id))?;
        let substituted = !output.passed;
        if substituted {
            warn!(conversation_id, reason = %output.reason, "Reply blocked; substituting safe reply");
            response = SAFE_GENERIC_REPLY.to_string();
        }

        self.store_turn(conversation_id, turn, "inbound", message).await?;
        self.store_turn(conversation_id, turn, "outbound", &response).await?;
        session.push_exchange(message, &response);

        if let Some((target, reason)) =
            self.policy
                .after_message(session.phase(), &analysis, session.messages)
        {
            self.transition(&mut session, target, &reason)?;
        }

        let mut new_iocs = 0;
        if session.machine.should_extract() {
            new_iocs = self.extract(&mut session, message).await?;
            if let Some((target, reason)) = self.policy.after_extraction(session.phase(), new_iocs) {
                self.transition(&mut session, target, &reason)?;
            }
        }

        let state = self.guard.validate_conversation_state(session.machine.context());
        if !state.passed {
            self.terminate(&mut session, &state.reason)?;
        } else if session.messages >= self.settings.max_messages {
            self.terminate(&mut session, "message limit reached")?;
        } else if session.machine.context().duration_secs_at(Utc::now())
            > self.settings.max_duration_secs
        {
            self.terminate(&mut session, "duration limit reached")?;
        }

        let processing_ms = started.elapsed().as_millis() as u64;
        let terminated = session.machine.is_terminal();
        self.audit.append(
            event::MESSAGE_EXCHANGED,
            json!({
                "conversation_id": conversation_id,
                "turn": turn,
                "phase": session.phase(),
                "strategy": decision.strategy,
                "fallback": fallback,
                "substituted": substituted,
                "new_iocs": new_iocs,
                "processing_ms": processing_ms,
            }),
        )?;

        info!(
            conversation_id,
            turn,
            phase = %session.phase(),
            strategy = %decision.strategy,
            fallback,
            new_iocs,
            processing_ms,
            "Message handled"
        );

        Ok(EngineReply {
            conversation_id: conversation_id.to_string(),
            response,
            phase: session.phase(),
            strategy: decision.strategy,
            confidence: decision.confidence,
            reason: decision.reason,
            fallback,
            substituted,
            new_iocs,
            terminated,
            processing_ms,
        })
    }

    /// Terminate a conversation and store its intelligence report.
    pub async fn end_session(
        &self,
        conversation_id: &str,
        reason: &str,
    ) -> Result<IntelligenceReport, EngineError> {
        let handle = self.session_handle(conversation_id).await?;
        let mut session = self.lock_session(conversation_id, &handle).await?;
        self.terminate(&mut session, reason)?;

        let report = IntelligenceReport::build(&session, &self.classifier);
        self.storage
            .append(
                NewBlob::new(conversation_id, BlobKind::Report, serde_json::to_value(&report)?)
                    .encrypted(),
            )
            .await?;
        Ok(report)
    }

    pub async fn session_info(&self, conversation_id: &str) -> Result<SessionInfo, EngineError> {
        let handle = self.session_handle(conversation_id).await?;
        let session = self.lock_session(conversation_id, &handle).await?;
        Ok(session.info())
    }

    pub async fn report(&self, conversation_id: &str) -> Result<IntelligenceReport, EngineError> {
        let handle = self.session_handle(conversation_id).await?;
        let session = self.lock_session(conversation_id, &handle).await?;
        Ok(IntelligenceReport::build(&session, &self.classifier))
    }

    /// Snapshot of every session not busy with a message right now.
    pub async fn list_sessions(&self) -> Vec<SessionInfo> {
        let mut infos = Vec::new();
        for (id, handle) in self.handles().await {
            match handle.try_lock() {
                Ok(session) => infos.push(session.info()),
                Err(_) => debug!(conversation_id = %id, "Session busy; left out of listing"),
            }
        }
        infos.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        infos
    }

    pub async fn status(&self) -> Result<SystemStatus, EngineError> {
        let handles = self.handles().await;
        let total_sessions = handles.len();
        // A session busy with a message is active by definition.
        let active_sessions = handles
            .iter()
            .filter(|(_, h)| h.try_lock().map_or(true, |s| !s.machine.is_terminal()))
            .count();

        Ok(SystemStatus {
            active_sessions,
            total_sessions,
            uptime_secs: self.started.elapsed().as_secs(),
            indicators_seen: self.extractor.seen_count(),
            reasoning_backend: self.reasoner.name().to_string(),
            audit_head: self.audit.head(),
            audit_entries_appended: self.audit.appended(),
            storage: self.storage.stats().await?,
            guard: self.guard.report(),
        })
    }

    pub async fn cleanup_idle(&self) -> Result<usize, EngineError> {
        self.cleanup_idle_at(Utc::now()).await
    }

    /// Archive sessions that are terminal or idle past the configured timeout,
    /// then prune raw turns older than the retention window.
    ///
    /// Busy sessions are skipped. Returns how many were archived.
    pub async fn cleanup_idle_at(&self, now: DateTime<Utc>) -> Result<usize, EngineError> {
        let mut archived = Vec::new();
        for (id, handle) in self.handles().await {
            let Ok(mut session) = handle.try_lock() else {
                continue;
            };
            let idle_secs = session.idle_secs_at(now);
            if !session.machine.is_terminal() && idle_secs <= self.settings.idle_timeout_secs {
                continue;
            }
            self.terminate(&mut session, "idle timeout")?;

            let report = IntelligenceReport::build(&session, &self.classifier);
            self.storage
                .append(
                    NewBlob::new(id.as_str(), BlobKind::LongTerm, serde_json::to_value(&report)?)
                        .encrypted(),
                )
                .await?;
            self.audit.append(
                event::SESSION_ARCHIVED,
                json!({
                    "conversation_id": id,
                    "idle_secs": idle_secs,
                    "messages": session.messages,
                    "iocs": session.iocs.len(),
                }),
            )?;
            archived.push(id);
        }

        if !archived.is_empty() {
            let mut sessions = self.sessions.write().await;
            for id in &archived {
                sessions.remove(id);
            }
            info!(count = archived.len(), "Archived sessions");
        }

        let cutoff = now - chrono::Duration::seconds(self.settings.turn_retention_secs);
        self.storage.prune(BlobKind::ShortTerm, cutoff).await?;
        Ok(archived.len())
    }

    /// Stop accepting work, abort in-flight reasoning and close the audit chain.
    ///
    /// Returns the final chain head.
    pub fn shutdown(&self) -> Result<Option<String>, EngineError> {
        self.cancel.cancel();
        self.audit.close()?;
        let head = self.audit.head();
        info!(head = ?head, "Engine shut down");
        Ok(head)
    }

    fn ensure_running(&self) -> Result<(), EngineError> {
        if self.cancel.is_cancelled() {
            Err(EngineError::ShuttingDown)
        } else {
            Ok(())
        }
    }

    async fn handles(&self) -> Vec<(String, Arc<Mutex<Session>>)> {
        self.sessions
            .read()
            .await
            .iter()
            .map(|(id, h)| (id.clone(), Arc::clone(h)))
            .collect()
    }

    async fn session_handle(&self, conversation_id: &str) -> Result<Arc<Mutex<Session>>, EngineError> {
        self.sessions
            .read()
            .await
            .get(conversation_id)
            .cloned()
            .ok_or_else(|| EngineError::SessionNotFound(conversation_id.to_string()))
    }

    async fn lock_session<'a>(
        &self,
        conversation_id: &str,
        handle: &'a Arc<Mutex<Session>>,
    ) -> Result<MutexGuard<'a, Session>, EngineError> {
        let wait = Duration::from_millis(self.settings.lock_timeout_ms);
        tokio::time::timeout(wait, handle.lock()).await.map_err(|_| {
            warn!(conversation_id, wait_ms = self.settings.lock_timeout_ms, "Session lock wait expired");
            EngineError::SessionBusy(conversation_id.to_string())
        })
    }

    /// Apply a transition and audit it. Rejected transitions are not errors.
    fn transition(&self, session: &mut Session, target: Phase, reason: &str) -> Result<bool, EngineError> {
        let from = session.phase();
        if !session.machine.transition(target, reason) {
            return Ok(false);
        }
        self.audit.append(
            event::PHASE_TRANSITION,
            json!({
                "conversation_id": session.id,
                "from": from,
                "to": target,
                "reason": reason,
                "transition_count": session.machine.transition_count(),
            }),
        )?;
        Ok(true)
    }

    fn terminate(&self, session: &mut Session, reason: &str) -> Result<bool, EngineError> {
        let from = session.phase();
        if !session.machine.force_terminate(reason) {
            return Ok(false);
        }
        info!(conversation_id = %session.id, from = %from, reason, "Session terminated");
        self.audit.append(
            event::SESSION_TERMINATED,
            json!({
                "conversation_id": session.id,
                "from": from,
                "reason": reason,
                "messages": session.messages,
                "iocs": session.iocs.len(),
            }),
        )?;
        Ok(true)
    }

    /// Escalated reply. Any reasoning failure degrades to a canned fallback.
    async fn reason(
        &self,
        session: &Session,
        message: &str,
        decision: &RoutingDecision,
    ) -> Result<(String, bool), EngineError> {
        let budget = Duration::from_millis(decision.latency_budget_ms).min(self.request_timeout);
        let budget_ms = budget.as_millis() as u64;
        let request = ReasoningRequest {
            prompt: self
                .prompts
                .build(&session.persona, session.phase(), &session.history, message),
            system_prompt: Some(session.persona.system_prompt.clone()),
            timeout: budget,
        };

        let outcome = tokio::select! {
            _ = self.cancel.cancelled() => Err(ReasoningError::Cancelled),
            result = tokio::time::timeout(budget, self.reasoner.generate(&request)) => {
                result.unwrap_or(Err(ReasoningError::Timeout { budget_ms }))
            }
        };

        match outcome {
            Ok(response) => {
                debug!(
                    conversation_id = %session.id,
                    backend = %response.backend,
                    latency_ms = response.latency_ms,
                    "Reasoning reply"
                );
                Ok((response.text, false))
            }
            Err(e) => {
                warn!(conversation_id = %session.id, error = %e, budget_ms, "Reasoning failed; using fallback");
                self.audit.append(
                    event::REASONING_FALLBACK,
                    json!({
                        "conversation_id": session.id,
                        "backend": self.reasoner.name(),
                        "error": e.to_string(),
                        "budget_ms": budget_ms,
                    }),
                )?;
                Ok((self.responder.fallback(message).to_string(), true))
            }
        }
    }

    /// Run extraction on an inbound message; returns the number of new indicators.
    async fn extract(&self, session: &mut Session, message: &str) -> Result<usize, EngineError> {
        let result = self.extractor.extract(message, &session.id);
        let tactics = session.new_tactics(result.tactics);
        session
            .machine
            .set_metadata("language", json!(result.signals.language));
        session
            .machine
            .set_metadata("sentiment", json!(result.signals.sentiment));

        if result.iocs.is_empty() && tactics.is_empty() {
            return Ok(0);
        }

        for ioc in &result.iocs {
            self.storage
                .append(
                    NewBlob::new(session.id.as_str(), BlobKind::ExtractedIoc, serde_json::to_value(ioc)?)
                        .encrypted(),
                )
                .await?;
        }

        if !result.iocs.is_empty() {
            session.machine.record_extraction(
                "iocs",
                json!(result
                    .iocs
                    .iter()
                    .map(|i| format!("{}:{}", i.kind.as_str(), i.value))
                    .collect::<Vec<_>>()),
            );
        }
        if !tactics.is_empty() {
            session.machine.record_extraction(
                "tactics",
                json!(tactics.iter().map(|t| t.tactic.as_str()).collect::<Vec<_>>()),
            );
        }

        self.audit.append(
            event::INTELLIGENCE_EXTRACTED,
            json!({
                "conversation_id": session.id,
                "iocs": result
                    .iocs
                    .iter()
                    .map(|i| json!({ "kind": i.kind, "value": i.value, "confidence": i.confidence }))
                    .collect::<Vec<_>>(),
                "tactics": tactics.iter().map(|t| t.tactic.as_str()).collect::<Vec<_>>(),
                "language": result.signals.language,
                "sentiment": result.signals.sentiment,
            }),
        )?;

        let count = result.iocs.len();
        session.iocs.extend(result.iocs);
        session.tactics.extend(tactics);
        Ok(count)
    }

    async fn store_turn(
        &self,
        conversation_id: &str,
        turn: u32,
        direction: &str,
        text: &str,
    ) -> Result<(), EngineError> {
        self.storage
            .append(NewBlob::new(
                conversation_id,
                BlobKind::ShortTerm,
                json!({ "turn": turn, "direction": direction, "text": text }),
            ))
            .await?;
        Ok(())
    }
}
