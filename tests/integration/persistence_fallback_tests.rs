//! Integration tests for finalization when the durable store misbehaves.
//!
//! The session must still reach a terminal state, release its resources
//! and hand a crash-path beacon to the sink. A failed release and a record
//! finalized by another writer are covered here too.

use std::sync::Arc;

use interview_session::beacon::BeaconSink;
use interview_session::models::session::{EndReason, SessionState};
use interview_session::orchestrator::{Collaborators, SessionController, SessionResources};
use interview_session::persistence::store::SessionStore;

use super::test_helpers::{
    settings_without_presence, start_request, BrokenResources, CountingResources, FailingStore,
    Failure, Fixture, RecordingBeacon,
};

struct Harness {
    store: Arc<FailingStore>,
    beacon: Arc<RecordingBeacon>,
    resources: Arc<CountingResources>,
}

impl Harness {
    fn new(failure: Failure) -> Self {
        Self {
            store: Arc::new(FailingStore::new(failure)),
            beacon: Arc::new(RecordingBeacon::default()),
            resources: Arc::new(CountingResources::default()),
        }
    }

    async fn start(&self, primary: usize) -> SessionController {
        let collaborators = Collaborators::new(Arc::clone(&self.store) as Arc<dyn SessionStore>)
            .with_beacon(Arc::clone(&self.beacon) as Arc<dyn BeaconSink>)
            .with_resources(Arc::clone(&self.resources) as Arc<dyn SessionResources>);
        SessionController::start(
            start_request(primary),
            &settings_without_presence(),
            collaborators,
        )
        .await
        .expect("start")
    }
}

#[tokio::test(start_paused = true)]
async fn failed_final_write_falls_back_to_beacon() {
    let harness = Harness::new(Failure::Error);
    let controller = harness.start(9).await;
    controller.report_progress(3).expect("progress");

    controller.request_end(EndReason::VoluntaryEnd);
    let outcome = controller.wait_finalized().await.expect("finalized");

    assert!(!outcome.persisted);
    assert_eq!(outcome.state, SessionState::Abandoned);
    assert_eq!(controller.current_state(), SessionState::Abandoned);
    assert_eq!(harness.store.final_attempts(), 2, "bounded retries");

    let sent = harness.beacon.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].session_id, controller.id());
    assert_eq!(sent[0].reason, EndReason::VoluntaryEnd);
    assert_eq!(sent[0].answered_questions, 3);
    assert_eq!(sent[0].total_questions, 9);

    assert_eq!(harness.resources.releases(), 1);
}

#[tokio::test(start_paused = true)]
async fn hanging_final_write_times_out() {
    let harness = Harness::new(Failure::Hang);
    let controller = harness.start(9).await;

    controller.client_departed();
    let outcome = controller.wait_finalized().await.expect("finalized");

    assert!(!outcome.persisted);
    assert_eq!(outcome.end_reason, EndReason::ClientLost);
    assert_eq!(harness.store.final_attempts(), 2);
    assert_eq!(harness.beacon.sent().len(), 1);
    assert_eq!(harness.resources.releases(), 1);
}

#[tokio::test(start_paused = true)]
async fn later_signals_do_not_resend_beacon() {
    let harness = Harness::new(Failure::Error);
    let controller = harness.start(9).await;

    controller.request_end(EndReason::VoluntaryEnd);
    controller.wait_finalized().await.expect("finalized");
    controller.request_end(EndReason::ClientLost);
    controller.client_departed();
    tokio::task::yield_now().await;

    assert_eq!(harness.beacon.sent().len(), 1);
    assert_eq!(harness.resources.releases(), 1);
}

#[tokio::test(start_paused = true)]
async fn failed_release_keeps_session_terminal() {
    let fixture = Fixture::new();
    let broken = Arc::new(BrokenResources::default());
    let collaborators = fixture
        .collaborators()
        .with_resources(Arc::clone(&broken) as Arc<dyn SessionResources>);
    let controller = SessionController::start(
        start_request(9),
        &settings_without_presence(),
        collaborators,
    )
    .await
    .expect("start");

    controller.request_end(EndReason::VoluntaryEnd);
    let outcome = controller.wait_finalized().await.expect("finalized");

    assert!(outcome.state.is_terminal());
    assert!(outcome.persisted);
    assert_eq!(controller.current_state(), SessionState::Abandoned);
    assert_eq!(fixture.store.final_writes(), 1);
    assert!(fixture.beacon.sent().is_empty());

    drop(controller);
    tokio::task::yield_now().await;
    assert_eq!(broken.attempts(), 1, "release is attempted exactly once");
}

#[tokio::test(start_paused = true)]
async fn record_finalized_elsewhere_is_adopted() {
    let fixture = Fixture::new();
    let controller = fixture.start(9, &settings_without_presence()).await;
    controller.report_progress(3).expect("progress");

    fixture
        .store
        .finalize_elsewhere(controller.id(), EndReason::ClientLost, 42);
    controller.request_end(EndReason::VoluntaryEnd);
    let outcome = controller.wait_finalized().await.expect("finalized");

    assert!(outcome.persisted);
    assert_eq!(outcome.end_reason, EndReason::ClientLost);
    assert_eq!(outcome.state, SessionState::Abandoned);
    assert_eq!(outcome.elapsed_seconds, 42);
    assert_eq!(fixture.store.final_writes(), 0);
    assert!(fixture.beacon.sent().is_empty());
    assert_eq!(fixture.resources.releases(), 1);

    let snapshot = controller.snapshot();
    let stored = fixture.store.get(controller.id()).expect("stored");
    assert_eq!(snapshot.end_reason, stored.end_reason);
    assert_eq!(snapshot.elapsed_seconds, stored.elapsed_seconds);
}
