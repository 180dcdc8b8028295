//! End-to-end engine scenarios against a stub reasoning backend.
//!
//! Everything runs in-process: a temp audit directory, an in-memory store
//! and a scripted reasoner. No network, no model.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use decoy_agent::config::StorageConfig;
use decoy_agent::orchestrator::{Engine, EngineError, EngineParts};
use decoy_agent::reasoning::{ReasoningError, ReasoningRequest, ReasoningResponse, ReasoningService};
use decoy_agent::simulation::Script;
use decoy_agent::storage::StoreHandle;
use engagement::audit::{event, verify_dir, AuditChain, EventFilter};
use engagement::extraction::IocKind;
use engagement::guard::ConstitutionalGuard;
use engagement::patterns::FALLBACK_REPLIES;
use engagement::phase::Phase;
use engagement::router::Strategy;

const AUDIT_KEY: &[u8] = b"scenario-key";
const LOTTERY: &str = "You have won ₹5 crore! Send ₹10,000 processing fee to UPI prizewinner@upi";

// ── Stub reasoner ─────────────────────────────────────────────────────────────

struct StubReasoner {
    reply: &'static str,
    delay: Duration,
    fail: bool,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl StubReasoner {
    fn replying(reply: &'static str) -> Self {
        Self {
            reply,
            delay: Duration::ZERO,
            fail: false,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    fn slow(reply: &'static str, delay: Duration) -> Self {
        Self {
            delay,
            ..Self::replying(reply)
        }
    }

    fn failing() -> Self {
        Self {
            fail: true,
            ..Self::replying("")
        }
    }
}

#[async_trait]
impl ReasoningService for StubReasoner {
    async fn generate(&self, request: &ReasoningRequest) -> Result<ReasoningResponse, ReasoningError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        assert!(request.system_prompt.is_some());
        if self.fail {
            return Err(ReasoningError::Unavailable {
                backend: "stub".into(),
                message: "connection refused".into(),
            });
        }
        Ok(ReasoningResponse {
            text: self.reply.to_string(),
            model: "stub-model".into(),
            backend: "stub".into(),
            latency_ms: self.delay.as_millis() as u64,
            tokens: Some(12),
        })
    }

    fn name(&self) -> &str {
        "stub"
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

async fn build_engine(
    dir: &Path,
    reasoner: Arc<StubReasoner>,
    tweak: impl FnOnce(&mut EngineParts),
) -> Engine {
    let audit = Arc::new(AuditChain::open(dir.join("audit"), AUDIT_KEY).unwrap());
    let guard = Arc::new(ConstitutionalGuard::new().with_audit(Arc::clone(&audit)));
    let storage = StoreHandle::spawn(&StorageConfig {
        path: Some(dir.join("store.jsonl")),
        encryption_key: Some("11".repeat(32)),
        request_timeout_ms: 2000,
        queue_depth: 64,
    })
    .await
    .unwrap();

    let mut parts = EngineParts::new(audit, guard, reasoner, Arc::new(storage));
    tweak(&mut parts);
    Engine::new(parts)
}

fn events_of(engine: &Engine, event_type: &str) -> usize {
    engine
        .audit()
        .events(&EventFilter {
            event_type: Some(event_type.to_string()),
            ..Default::default()
        })
        .unwrap()
        .len()
}

// ── Scenarios ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_lottery_message_escalates_and_extracts_upi() {
    let dir = tempfile::tempdir().unwrap();
    let reasoner = Arc::new(StubReasoner::replying(
        "Oh my, five crore? Where should I send the fee, which number is this?",
    ));
    let engine = build_engine(dir.path(), Arc::clone(&reasoner), |_| {}).await;

    let session = engine.create_session("incoming_sms", None).await.unwrap();
    assert_eq!(session.phase, Phase::InitialContact);

    let reply = engine
        .handle_message(&session.conversation_id, LOTTERY)
        .await
        .unwrap();

    assert_eq!(reply.strategy, Strategy::Escalate);
    assert!(reply.reason.starts_with("High urgency score"), "{}", reply.reason);
    assert!(reply.confidence > 0.7);
    assert!(!reply.fallback);
    assert!(!reply.substituted);
    assert_eq!(reply.new_iocs, 1);
    assert_eq!(reply.phase, Phase::Extraction);
    assert_eq!(reasoner.calls.load(Ordering::SeqCst), 1);

    let report = engine.report(&session.conversation_id).await.unwrap();
    assert_eq!(report.iocs.len(), 1);
    assert_eq!(report.iocs[0].kind, IocKind::Upi);
    assert_eq!(report.iocs[0].value, "prizewinner@upi");

    // Input and output both passed.
    assert_eq!(engine.guard().report().total_violations, 0);

    for event_type in [
        event::SESSION_CREATED,
        event::ROUTING_DECISION,
        event::INTELLIGENCE_EXTRACTED,
        event::MESSAGE_EXCHANGED,
    ] {
        assert_eq!(events_of(&engine, event_type), 1, "{event_type}");
    }
    // create → initial_contact, → suspicion_arousal, → extraction
    assert_eq!(events_of(&engine, event::PHASE_TRANSITION), 3);
    assert!(events_of(&engine, event::CONSTITUTIONAL_CHECK) >= 4);

    let verified = engine.audit().verify().unwrap();
    assert!(verified.valid, "{:?}", verified.failure);
}

#[tokio::test]
async fn test_outbound_source_never_gets_a_session() {
    let dir = tempfile::tempdir().unwrap();
    let engine = build_engine(dir.path(), Arc::new(StubReasoner::replying("ok")), |_| {}).await;

    let err = engine.create_session("outbound_call", None).await.unwrap_err();
    assert!(matches!(err, EngineError::SourceRejected { .. }));
    assert!(engine.list_sessions().await.is_empty());

    let report = engine.guard().report();
    assert_eq!(report.critical_violations, 1);
    assert_eq!(events_of(&engine, event::SESSION_CREATED), 0);
    assert_eq!(events_of(&engine, event::CONSTITUTIONAL_CHECK), 1);
}

#[tokio::test]
async fn test_slow_reasoner_falls_back_within_budget() {
    let dir = tempfile::tempdir().unwrap();
    let reasoner = Arc::new(StubReasoner::slow("too late", Duration::from_secs(5)));
    let engine = build_engine(dir.path(), reasoner, |parts| {
        parts.router.urgency_budget_ms = 50;
    })
    .await;
    let session = engine.create_session("incoming_sms", None).await.unwrap();

    let started = Instant::now();
    let reply = engine
        .handle_message(&session.conversation_id, LOTTERY)
        .await
        .unwrap();

    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(reply.fallback);
    assert!(FALLBACK_REPLIES.contains(&reply.response.as_str()));
    // The conversation still advances as it would on the fast path.
    assert_eq!(reply.phase, Phase::Extraction);
    assert_eq!(events_of(&engine, event::REASONING_FALLBACK), 1);
}

#[tokio::test]
async fn test_backend_error_falls_back() {
    let dir = tempfile::tempdir().unwrap();
    let engine = build_engine(dir.path(), Arc::new(StubReasoner::failing()), |_| {}).await;
    let session = engine.create_session("incoming_call", None).await.unwrap();

    let reply = engine
        .handle_message(
            &session.conversation_id,
            "Police will arrest you today, pay the fine urgently",
        )
        .await
        .unwrap();
    assert!(reply.fallback);
    assert!(FALLBACK_REPLIES.contains(&reply.response.as_str()));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_messages_on_one_session_are_serialized() {
    let dir = tempfile::tempdir().unwrap();
    let reasoner = Arc::new(StubReasoner::slow(
        "Please wait, I am looking for my glasses.",
        Duration::from_millis(100),
    ));
    let engine = Arc::new(build_engine(dir.path(), Arc::clone(&reasoner), |_| {}).await);
    let session = engine.create_session("incoming_call", None).await.unwrap();

    let handles: Vec<_> = (0..4)
        .map(|i| {
            let engine = Arc::clone(&engine);
            let id = session.conversation_id.clone();
            tokio::spawn(async move {
                engine
                    .handle_message(&id, &format!("Pay the fine urgently or police will arrest you ({i})"))
                    .await
            })
        })
        .collect();

    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(reasoner.calls.load(Ordering::SeqCst), 4);
    assert_eq!(reasoner.max_in_flight.load(Ordering::SeqCst), 1);
    let info = engine.session_info(&session.conversation_id).await.unwrap();
    assert_eq!(info.messages, 4);
    assert!(engine.audit().verify().unwrap().valid);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_busy_session_times_out_waiting_for_lock() {
    let dir = tempfile::tempdir().unwrap();
    let reasoner = Arc::new(StubReasoner::slow("Hmm?", Duration::from_millis(800)));
    let engine = Arc::new(
        build_engine(dir.path(), reasoner, |parts| {
            parts.session.lock_timeout_ms = 50;
        })
        .await,
    );
    let session = engine.create_session("incoming_call", None).await.unwrap();

    let first = {
        let engine = Arc::clone(&engine);
        let id = session.conversation_id.clone();
        tokio::spawn(async move { engine.handle_message(&id, LOTTERY).await })
    };
    tokio::time::sleep(Duration::from_millis(200)).await;

    let err = engine
        .handle_message(&session.conversation_id, "hello?")
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::SessionBusy(_)));
    assert!(!err.public_reply().is_empty());

    first.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_message_cap_terminates_session() {
    let dir = tempfile::tempdir().unwrap();
    let engine = build_engine(dir.path(), Arc::new(StubReasoner::replying("ok")), |parts| {
        parts.session.max_messages = 3;
    })
    .await;
    let session = engine.create_session("incoming_chat", None).await.unwrap();
    let id = session.conversation_id;

    for expected_terminated in [false, false, true] {
        let reply = engine.handle_message(&id, "hello").await.unwrap();
        assert_eq!(reply.terminated, expected_terminated);
    }
    assert_eq!(engine.session_info(&id).await.unwrap().phase, Phase::Termination);

    let err = engine.handle_message(&id, "hello").await.unwrap_err();
    assert!(matches!(err, EngineError::SessionEnded(_)));
    assert_eq!(events_of(&engine, event::SESSION_TERMINATED), 1);
}

#[tokio::test]
async fn test_scripted_bank_fraud_run_verifies() {
    let dir = tempfile::tempdir().unwrap();
    let engine = build_engine(
        dir.path(),
        Arc::new(StubReasoner::replying("Which branch is this? Give me the number to call back.")),
        |_| {},
    )
    .await;
    let script = Script::BankFraud;
    let session = engine.create_session(script.source(), None).await.unwrap();

    for turn in 0..script.lines().len() {
        engine
            .handle_message(&session.conversation_id, script.line(turn))
            .await
            .unwrap();
    }

    let report = engine
        .end_session(&session.conversation_id, "script finished")
        .await
        .unwrap();
    let kinds: Vec<IocKind> = report.iocs.iter().map(|i| i.kind).collect();
    assert!(kinds.contains(&IocKind::Url));
    assert!(kinds.contains(&IocKind::Phone));
    assert!(!report.recommended_actions.is_empty());
    assert_eq!(report.phase, Phase::Termination);

    let status = engine.status().await.unwrap();
    assert_eq!(status.active_sessions, 0);
    assert!(status.storage.by_kind["extracted_ioc"] >= 2);
    assert_eq!(status.storage.by_kind["report"], 1);

    engine.shutdown().unwrap();
    let verified = verify_dir(&dir.path().join("audit"), AUDIT_KEY).unwrap();
    assert!(verified.valid, "{:?}", verified.failure);
    assert_eq!(verified.entries_checked, engine.audit().appended());

    // A restarted chain continues from the recovered head.
    let reopened = AuditChain::open(dir.path().join("audit"), AUDIT_KEY).unwrap();
    assert_eq!(reopened.head(), engine.audit().head());
}
