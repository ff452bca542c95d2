//! Unit tests for presence detection.
//!
//! Validates silence detection, heartbeat reset, the page-closing notice,
//! and that nothing is raised once the session has left `InProgress`.

use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use interview_session::models::session::{EndReason, SessionState};
use interview_session::models::signal::{SignalSource, TerminationSignal};
use interview_session::orchestrator::presence_monitor::PresenceMonitor;
use interview_session::orchestrator::{PresenceSettings, SignalSender};

struct Harness {
    monitor: PresenceMonitor,
    rx: mpsc::Receiver<TerminationSignal>,
    state_tx: watch::Sender<SessionState>,
    ct: CancellationToken,
}

/// Monitor expecting a heartbeat every 15 s and tolerating 3 misses.
fn test_monitor() -> Harness {
    let ct = CancellationToken::new();
    let (tx, rx) = mpsc::channel(16);
    let (state_tx, state_rx) = watch::channel(SessionState::InProgress);
    let monitor = PresenceMonitor::new(
        "s1".to_owned(),
        PresenceSettings {
            interval: Duration::from_secs(15),
            missed_heartbeats: 3,
        },
        SignalSender::new("s1", tx),
        state_rx,
        ct.clone(),
    );
    Harness {
        monitor,
        rx,
        state_tx,
        ct,
    }
}

#[tokio::test(start_paused = true)]
async fn silence_raises_client_lost() {
    let Harness {
        monitor,
        mut rx,
        state_tx: _state_tx,
        ct: _ct,
    } = test_monitor();
    let handle = monitor.spawn();

    let signal = tokio::time::timeout(Duration::from_secs(60), rx.recv())
        .await
        .expect("presence loss should be detected")
        .expect("channel open");

    assert_eq!(signal.reason, EndReason::ClientLost);
    assert_eq!(signal.source, SignalSource::Presence);
    drop(handle);
}

#[tokio::test(start_paused = true)]
async fn heartbeats_keep_session_alive() {
    let Harness {
        monitor,
        mut rx,
        state_tx: _state_tx,
        ct: _ct,
    } = test_monitor();
    let handle = monitor.spawn();

    for _ in 0..10 {
        tokio::time::sleep(Duration::from_secs(10)).await;
        handle.heartbeat();
    }

    assert!(rx.try_recv().is_err(), "regular heartbeats must not raise");
}

#[tokio::test(start_paused = true)]
async fn departure_notice_raises_immediately() {
    let Harness {
        monitor,
        mut rx,
        state_tx: _state_tx,
        ct: _ct,
    } = test_monitor();
    let handle = monitor.spawn();

    handle.client_departed();
    let signal = tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("departure should raise at once")
        .expect("channel open");
    assert_eq!(signal.reason, EndReason::ClientLost);
}

#[tokio::test(start_paused = true)]
async fn raises_at_most_once() {
    let Harness {
        monitor,
        mut rx,
        state_tx: _state_tx,
        ct: _ct,
    } = test_monitor();
    let handle = monitor.spawn();

    handle.client_departed();
    let _first = rx.recv().await.expect("first raise");

    handle.client_departed();
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert!(rx.try_recv().is_err(), "monitor must raise only once");
}

#[tokio::test(start_paused = true)]
async fn nothing_raised_after_session_left_in_progress() {
    let Harness {
        monitor,
        mut rx,
        state_tx,
        ct: _ct,
    } = test_monitor();
    let handle = monitor.spawn();

    state_tx.send_replace(SessionState::Finalizing);
    handle.client_departed();
    tokio::time::sleep(Duration::from_secs(120)).await;

    assert!(rx.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn cancellation_stops_monitor() {
    let Harness {
        monitor,
        mut rx,
        state_tx: _state_tx,
        ct,
    } = test_monitor();
    let handle = monitor.spawn();

    ct.cancel();
    tokio::time::sleep(Duration::from_secs(120)).await;

    assert!(rx.try_recv().is_err());
    drop(handle);
}

#[tokio::test(start_paused = true)]
async fn dropping_handle_stops_monitor() {
    let Harness {
        monitor,
        mut rx,
        state_tx: _state_tx,
        ct,
    } = test_monitor();
    let handle = monitor.spawn();
    drop(handle);

    assert!(ct.is_cancelled());
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert!(rx.try_recv().is_err());
}
