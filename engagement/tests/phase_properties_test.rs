//! Exhaustive checks of the phase table, ceiling and terminal behaviour.

use engagement::phase::{ConversationStateMachine, LifecycleEvent, Phase};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Shortest legal path from Idle to `target`.
fn path_to(target: Phase) -> Vec<Phase> {
    use Phase::*;
    match target {
        Idle => vec![],
        InitialContact => vec![InitialContact],
        TrustBuilding => vec![InitialContact, TrustBuilding],
        SuspicionArousal => vec![InitialContact, SuspicionArousal],
        Extraction => vec![InitialContact, TrustBuilding, Extraction],
        Termination => vec![InitialContact, Termination],
    }
}

fn machine_at(phase: Phase) -> ConversationStateMachine {
    let mut m = ConversationStateMachine::new("prop");
    for p in path_to(phase) {
        assert!(m.transition(p, "setup"));
    }
    m
}

#[test]
fn test_every_pair_matches_table() {
    for &from in Phase::all() {
        for &to in Phase::all() {
            let mut m = machine_at(from);
            let before = m.transition_count();
            let accepted = m.transition(to, "random walk");
            assert_eq!(accepted, from.allows(to), "{from} -> {to}");
            if accepted {
                assert_eq!(m.current_phase(), to);
                assert_eq!(m.transition_count(), before + 1);
            } else {
                assert_eq!(m.current_phase(), from);
                assert_eq!(m.transition_count(), before);
            }
        }
    }
}

#[test]
fn test_ceiling_then_only_termination() {
    let mut m = ConversationStateMachine::new("ceiling");
    assert!(m.transition(Phase::InitialContact, "a"));
    assert!(m.transition(Phase::TrustBuilding, "b"));
    assert!(m.transition(Phase::Extraction, "c"));
    while m.transition_count() < m.max_transitions() {
        assert!(m.transition(Phase::Extraction, "re-enter"));
    }
    assert_eq!(m.transition_count(), 20);

    for &p in Phase::all() {
        assert_eq!(m.can_transition(p), p == Phase::Termination, "{p}");
    }
    assert!(m.transition(Phase::Termination, "ceiling"));
    for &p in Phase::all() {
        assert!(!m.transition(p, "after"));
    }
}

#[test]
fn test_should_extract_tracks_phase() {
    for &p in Phase::all() {
        assert_eq!(
            machine_at(p).should_extract(),
            matches!(p, Phase::SuspicionArousal | Phase::Extraction)
        );
    }
}

#[test]
fn test_reentry_fires_hooks_each_time() {
    let mut m = machine_at(Phase::Extraction);
    let entered = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&entered);
    m.register_hook(
        LifecycleEvent::OnEnter(Phase::Extraction),
        Box::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }),
    );
    assert!(m.transition(Phase::Extraction, "new indicators"));
    assert!(m.transition(Phase::Extraction, "more indicators"));
    assert_eq!(entered.load(Ordering::SeqCst), 2);
}
