//! Integration tests for termination arbitration.
//!
//! Validates exactly-once finalization under racing signals, the
//! priority rule for simultaneous signals, and the countdown backstop.

use std::time::Duration;

use tokio::time::Instant;

use interview_session::models::session::{EndReason, SessionState};
use interview_session::models::signal::{SignalSource, TerminationSignal};
use interview_session::orchestrator::coordinator::SIMULTANEOUS_WINDOW;
use interview_session::orchestrator::SessionRegistry;

use super::test_helpers::{settings_without_presence, Fixture};

#[tokio::test(start_paused = true)]
async fn simultaneous_completion_beats_time_expiry() {
    let fixture = Fixture::new();
    let controller = fixture.start(9, &settings_without_presence()).await;
    controller.report_progress(8).expect("progress");

    let at = Instant::now();
    assert!(controller.submit(TerminationSignal {
        reason: EndReason::TimeExpired,
        source: SignalSource::Countdown,
        raised_at: at,
    }));
    assert!(controller.submit(TerminationSignal {
        reason: EndReason::AllQuestionsCompleted,
        source: SignalSource::Progress,
        raised_at: at,
    }));

    let outcome = controller.wait_finalized().await.expect("finalized");
    assert_eq!(outcome.end_reason, EndReason::AllQuestionsCompleted);
    assert_eq!(outcome.state, SessionState::Completed);
    assert_eq!(outcome.accepted_source, SignalSource::Progress);
    assert_eq!(fixture.store.final_writes(), 1);
}

#[tokio::test(start_paused = true)]
async fn simultaneous_voluntary_end_beats_client_lost() {
    let fixture = Fixture::new();
    let controller = fixture.start(9, &settings_without_presence()).await;

    let at = Instant::now();
    controller.submit(TerminationSignal {
        reason: EndReason::ClientLost,
        source: SignalSource::Presence,
        raised_at: at,
    });
    controller.submit(TerminationSignal {
        reason: EndReason::VoluntaryEnd,
        source: SignalSource::Caller,
        raised_at: at + SIMULTANEOUS_WINDOW / 2,
    });

    let outcome = controller.wait_finalized().await.expect("finalized");
    assert_eq!(outcome.end_reason, EndReason::VoluntaryEnd);
}

#[tokio::test(start_paused = true)]
async fn signal_queued_late_inside_window_still_counts() {
    let fixture = Fixture::new();
    let controller = fixture.start(9, &settings_without_presence()).await;

    controller.client_departed();
    // Let the coordinator take the first signal before the second arrives.
    tokio::time::sleep(SIMULTANEOUS_WINDOW / 5).await;
    assert_eq!(controller.current_state(), SessionState::InProgress);
    controller.request_end(EndReason::VoluntaryEnd);

    let outcome = controller.wait_finalized().await.expect("finalized");
    assert_eq!(outcome.end_reason, EndReason::VoluntaryEnd);
    assert_eq!(outcome.accepted_source, SignalSource::Caller);
    assert_eq!(fixture.store.final_writes(), 1);
}

#[tokio::test(start_paused = true)]
async fn earlier_signal_wins_outside_window() {
    let fixture = Fixture::new();
    let controller = fixture.start(9, &settings_without_presence()).await;

    let at = Instant::now();
    controller.submit(TerminationSignal {
        reason: EndReason::ClientLost,
        source: SignalSource::Presence,
        raised_at: at,
    });
    controller.submit(TerminationSignal {
        reason: EndReason::AllQuestionsCompleted,
        source: SignalSource::Progress,
        raised_at: at + Duration::from_millis(500),
    });

    let outcome = controller.wait_finalized().await.expect("finalized");
    assert_eq!(outcome.end_reason, EndReason::ClientLost);
    assert_eq!(outcome.state, SessionState::Abandoned);
}

#[tokio::test(start_paused = true)]
async fn signals_after_finalization_are_ignored() {
    let fixture = Fixture::new();
    let controller = fixture.start(9, &settings_without_presence()).await;

    controller.request_end(EndReason::VoluntaryEnd);
    let outcome = controller.wait_finalized().await.expect("finalized");

    assert!(!controller.submit(TerminationSignal::now(
        EndReason::AllQuestionsCompleted,
        SignalSource::Progress,
    )));
    controller.request_end(EndReason::ClientLost);

    // Let the countdown deadline pass as well.
    tokio::time::sleep(Duration::from_secs(3000)).await;

    assert_eq!(controller.outcome(), Some(outcome));
    assert_eq!(controller.current_state(), SessionState::Abandoned);
    assert_eq!(fixture.store.final_writes(), 1);
    assert_eq!(fixture.resources.releases(), 1);
    let stored = fixture.store.get(controller.id()).expect("stored");
    assert_eq!(stored.end_reason, Some(EndReason::VoluntaryEnd));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_end_requests_finalize_exactly_once() {
    for _ in 0..20 {
        let fixture = Fixture::new();
        let controller = fixture.start(9, &settings_without_presence()).await;

        let reasons = [
            EndReason::VoluntaryEnd,
            EndReason::ClientLost,
            EndReason::TimeExpired,
            EndReason::AllQuestionsCompleted,
        ];
        let mut tasks = Vec::new();
        for i in 0..16 {
            let controller = controller.clone();
            let reason = reasons[i % reasons.len()];
            tasks.push(tokio::spawn(async move {
                controller.request_end(reason);
                if i % 3 == 0 {
                    let _ = controller.report_progress(1);
                }
            }));
        }
        for task in tasks {
            task.await.expect("task");
        }

        let outcome = tokio::time::timeout(Duration::from_secs(5), controller.wait_finalized())
            .await
            .expect("finalization should complete")
            .expect("finalized");

        assert!(outcome.state.is_terminal());
        assert_eq!(fixture.store.final_writes(), 1);
        assert_eq!(fixture.resources.releases(), 1);

        let stored = fixture.store.get(controller.id()).expect("stored");
        assert_eq!(stored.end_reason, Some(outcome.end_reason));
        assert_eq!(stored.state, outcome.state);
    }
}

#[tokio::test(start_paused = true)]
async fn countdown_backstop_without_any_other_signal() {
    let fixture = Fixture::new();
    let controller = fixture.start(9, &settings_without_presence()).await;

    let started = Instant::now();
    let outcome = controller.wait_finalized().await.expect("finalized");

    assert_eq!(outcome.end_reason, EndReason::TimeExpired);
    assert_eq!(outcome.state, SessionState::TimedOut);
    assert!(started.elapsed() >= Duration::from_secs(2400));
    assert!(started.elapsed() < Duration::from_secs(2401));
}

#[tokio::test(start_paused = true)]
async fn time_expiry_after_last_answer_is_completed() {
    let fixture = Fixture::new();
    let controller = fixture.start(2, &settings_without_presence()).await;

    // The countdown fired well before the last answer was reported, but
    // the coordinator has not frozen the counters yet.
    controller.submit(TerminationSignal {
        reason: EndReason::TimeExpired,
        source: SignalSource::Countdown,
        raised_at: Instant::now() - Duration::from_secs(1),
    });
    controller.report_progress(2).expect("progress");

    let outcome = controller.wait_finalized().await.expect("finalized");
    assert_eq!(outcome.end_reason, EndReason::TimeExpired);
    assert_eq!(outcome.answered_questions, 2);
    assert_eq!(outcome.state, SessionState::Completed);
}

#[tokio::test(start_paused = true)]
async fn registry_shutdown_ends_live_sessions() {
    let fixture = Fixture::new();
    let registry = SessionRegistry::default();
    let first = fixture.start(9, &settings_without_presence()).await;
    let second = fixture.start(9, &settings_without_presence()).await;
    registry.insert(first.clone()).await;
    registry.insert(second.clone()).await;
    assert_eq!(registry.len().await, 2);

    let finalized = registry.shutdown(Duration::from_secs(5)).await;
    assert_eq!(finalized, 2);
    assert!(registry.is_empty().await);

    for controller in [first, second] {
        let outcome = controller.outcome().expect("finalized");
        assert_eq!(outcome.end_reason, EndReason::ClientLost);
        assert_eq!(outcome.accepted_source, SignalSource::Shutdown);
    }
}

#[tokio::test(start_paused = true)]
async fn registry_drops_finalized_sessions() {
    let fixture = Fixture::new();
    let registry = SessionRegistry::default();
    let controller = fixture.start(1, &settings_without_presence()).await;
    let id = controller.id().to_owned();
    registry.insert(controller.clone()).await;

    controller.report_progress(1).expect("progress");
    controller.wait_finalized().await.expect("finalized");

    for _ in 0..10 {
        if registry.get(&id).await.is_none() {
            break;
        }
        tokio::task::yield_now().await;
    }
    assert!(registry.get(&id).await.is_none());
}
