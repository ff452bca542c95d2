//! Integration tests for the session HTTP API.
//!
//! Each test serves the router on an ephemeral port and drives it with
//! `reqwest`, the way a browser client and a dashboard would.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use interview_session::http::{serve_on, AppState};
use interview_session::models::session::{EndReason, Session, SessionRefs, SessionState};
use interview_session::persistence::session_repo::SessionRepo;

use super::test_helpers::{test_app_state, test_config};

struct Server {
    base: String,
    state: Arc<AppState>,
    ct: CancellationToken,
    client: reqwest::Client,
}

impl Drop for Server {
    fn drop(&mut self) {
        self.ct.cancel();
    }
}

async fn spawn_server() -> Server {
    let state = test_app_state(test_config()).await;
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral");
    let addr = listener.local_addr().expect("local addr");

    let ct = CancellationToken::new();
    let server_state = Arc::clone(&state);
    let server_ct = ct.clone();
    tokio::spawn(async move {
        let _ = serve_on(listener, server_state, server_ct).await;
    });

    Server {
        base: format!("http://{addr}"),
        state,
        ct,
        client: reqwest::Client::new(),
    }
}

impl Server {
    async fn post(&self, path: &str, body: &Value) -> reqwest::Response {
        self.client
            .post(format!("{}{path}", self.base))
            .json(body)
            .send()
            .await
            .expect("request")
    }

    async fn get(&self, path: &str) -> reqwest::Response {
        self.client
            .get(format!("{}{path}", self.base))
            .send()
            .await
            .expect("request")
    }

    async fn start(&self, primary: usize) -> Value {
        let questions: Vec<String> = (1..=primary).map(|i| format!("Question {i}")).collect();
        let resp = self
            .post(
                "/sessions",
                &json!({
                    "participant_ref": "applicant-1",
                    "job_ref": "job-1",
                    "org_ref": "org-1",
                    "primary_questions": questions,
                }),
            )
            .await;
        assert_eq!(resp.status(), reqwest::StatusCode::CREATED);
        resp.json().await.expect("start body")
    }

    /// Poll until the stored record for `id` is no longer live.
    async fn wait_ended(&self, id: &str) -> Value {
        for _ in 0..100 {
            let view: Value = self
                .get(&format!("/sessions/{id}"))
                .await
                .json()
                .await
                .expect("view");
            if view["live"] == json!(false) {
                return view;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("session {id} never finalized");
    }
}

#[tokio::test]
async fn health_returns_ok() {
    let server = spawn_server().await;
    let resp = server.get("/health").await;
    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    assert_eq!(resp.text().await.expect("body"), "ok");
}

#[tokio::test]
async fn start_merges_configured_secondary_questions() {
    let server = spawn_server().await;
    let body = server.start(4).await;

    assert!(body["session_id"].as_str().is_some());
    assert_eq!(body["max_duration_seconds"], json!(600));
    let questions = body["questions"].as_array().expect("questions");
    assert_eq!(questions.len(), 5);
    assert_eq!(questions[4]["text"], json!("What motivates you?"));
    assert_eq!(questions[4]["source_set"], json!("secondary"));
}

#[tokio::test]
async fn live_session_view_reports_progress() {
    let server = spawn_server().await;
    let id = server.start(4).await["session_id"]
        .as_str()
        .expect("id")
        .to_owned();

    let resp = server
        .post(&format!("/sessions/{id}/progress"), &json!({ "answered_delta": 2 }))
        .await;
    assert_eq!(resp.status(), reqwest::StatusCode::OK);

    let view: Value = server
        .get(&format!("/sessions/{id}"))
        .await
        .json()
        .await
        .expect("view");
    assert_eq!(view["state"], json!("in_progress"));
    assert_eq!(view["answered_questions"], json!(2));
    assert_eq!(view["total_questions"], json!(5));
    assert_eq!(view["live"], json!(true));
    assert!(view["remaining_seconds"].as_u64().expect("remaining") <= 600);
    assert_eq!(view["status"], Value::Null);
}

#[tokio::test]
async fn negative_progress_is_unprocessable() {
    let server = spawn_server().await;
    let id = server.start(3).await["session_id"]
        .as_str()
        .expect("id")
        .to_owned();

    let resp = server
        .post(&format!("/sessions/{id}/progress"), &json!({ "answered_delta": -1 }))
        .await;
    assert_eq!(resp.status(), reqwest::StatusCode::UNPROCESSABLE_ENTITY);
    let body: Value = resp.json().await.expect("error body");
    assert!(body["error"]
        .as_str()
        .expect("message")
        .starts_with("invalid progress"));
}

#[tokio::test]
async fn explicit_end_finalizes_and_persists() {
    let server = spawn_server().await;
    let id = server.start(3).await["session_id"]
        .as_str()
        .expect("id")
        .to_owned();

    let resp = server.post(&format!("/sessions/{id}/end"), &json!({})).await;
    assert_eq!(resp.status(), reqwest::StatusCode::ACCEPTED);

    let view = server.wait_ended(&id).await;
    assert_eq!(view["state"], json!("abandoned"));
    assert_eq!(view["end_reason"], json!("voluntary_end"));
    assert_eq!(view["status"], json!("abandoned"));

    // Repeated end calls after finalization are no-ops.
    let again = server.post(&format!("/sessions/{id}/end"), &json!({})).await;
    assert_eq!(again.status(), reqwest::StatusCode::ACCEPTED);
    let ack: Value = again.json().await.expect("ack");
    assert_eq!(ack["state"], json!("abandoned"));

    let progress = server
        .post(&format!("/sessions/{id}/progress"), &json!({ "answered_delta": 1 }))
        .await;
    assert_eq!(progress.status(), reqwest::StatusCode::OK);
    let view: Value = progress.json().await.expect("view");
    assert_eq!(view["answered_questions"], json!(0));
}

#[tokio::test]
async fn answering_everything_completes_over_http() {
    let server = spawn_server().await;
    let id = server.start(1).await["session_id"]
        .as_str()
        .expect("id")
        .to_owned();

    // One primary plus one configured secondary question.
    server
        .post(&format!("/sessions/{id}/progress"), &json!({ "answered_delta": 2 }))
        .await;

    let view = server.wait_ended(&id).await;
    assert_eq!(view["state"], json!("completed"));
    assert_eq!(view["end_reason"], json!("all_questions_completed"));
    assert_eq!(view["status"], json!("completed"));
}

#[tokio::test]
async fn departed_notice_abandons_session() {
    let server = spawn_server().await;
    let id = server.start(3).await["session_id"]
        .as_str()
        .expect("id")
        .to_owned();

    let heartbeat = server
        .post(&format!("/sessions/{id}/heartbeat"), &json!({}))
        .await;
    assert_eq!(heartbeat.status(), reqwest::StatusCode::NO_CONTENT);

    let resp = server
        .post(&format!("/sessions/{id}/departed"), &json!({}))
        .await;
    assert_eq!(resp.status(), reqwest::StatusCode::ACCEPTED);

    let view = server.wait_ended(&id).await;
    assert_eq!(view["end_reason"], json!("client_lost"));
}

#[tokio::test]
async fn unknown_session_is_not_found() {
    let server = spawn_server().await;
    assert_eq!(
        server.get("/sessions/missing").await.status(),
        reqwest::StatusCode::NOT_FOUND
    );
    assert_eq!(
        server
            .post("/sessions/missing/end", &json!({}))
            .await
            .status(),
        reqwest::StatusCode::NOT_FOUND
    );
}

#[tokio::test]
async fn participant_listing_shows_derived_status() {
    let server = spawn_server().await;
    let id = server.start(2).await["session_id"]
        .as_str()
        .expect("id")
        .to_owned();
    server.post(&format!("/sessions/{id}/end"), &json!({})).await;
    server.wait_ended(&id).await;
    server.start(2).await;

    let list: Value = server
        .get("/participants/applicant-1/sessions")
        .await
        .json()
        .await
        .expect("list");
    let sessions = list.as_array().expect("array");
    assert_eq!(sessions.len(), 2);
    assert!(sessions
        .iter()
        .any(|s| s["status"] == json!("abandoned") && s["id"] == json!(id)));
}

/// Stored `in_progress` record, started `started_secs_ago`, with no live
/// controller behind it.
async fn orphan(state: &AppState, started_secs_ago: i64) -> Session {
    let mut session = Session::new(
        SessionRefs {
            participant_ref: "applicant-9".into(),
            job_ref: "job-1".into(),
            org_ref: "org-1".into(),
        },
        5,
    );
    session.begin(Utc::now() - chrono::Duration::seconds(started_secs_ago));
    SessionRepo::new(Arc::clone(&state.db))
        .create(&session, &[])
        .await
        .expect("create orphan");
    session
}

#[tokio::test]
async fn beacon_closes_orphaned_session() {
    let server = spawn_server().await;
    let session = orphan(&server.state, 120).await;

    let resp = server
        .client
        .post(format!("{}/beacon", server.base))
        .header("content-type", "text/plain")
        .body(
            json!({
                "session_id": session.id,
                "participant_ref": "applicant-9",
                "reason": "client_lost",
                "elapsed_seconds": 75,
                "total_questions": 5,
                "answered_questions": 2,
            })
            .to_string(),
        )
        .send()
        .await
        .expect("beacon");
    assert_eq!(resp.status(), reqwest::StatusCode::ACCEPTED);

    let stored = SessionRepo::new(Arc::clone(&server.state.db))
        .get_by_id(&session.id)
        .await
        .expect("fetch")
        .expect("exists");
    assert_eq!(stored.end_reason, Some(EndReason::ClientLost));
    assert_eq!(stored.answered_questions, 2);
    assert_eq!(stored.elapsed_seconds, 75);
}

#[tokio::test]
async fn beacon_with_wrong_participant_is_ignored() {
    let server = spawn_server().await;
    let session = orphan(&server.state, 120).await;

    let resp = server
        .post(
            "/beacon",
            &json!({
                "session_id": session.id,
                "participant_ref": "someone-else",
                "reason": "voluntary_end",
                "elapsed_seconds": 10,
                "total_questions": 5,
                "answered_questions": 0,
            }),
        )
        .await;
    assert_eq!(resp.status(), reqwest::StatusCode::ACCEPTED);

    let stored = SessionRepo::new(Arc::clone(&server.state.db))
        .get_by_id(&session.id)
        .await
        .expect("fetch")
        .expect("exists");
    assert!(stored.end_reason.is_none());
}

#[tokio::test]
async fn malformed_beacon_is_accepted_and_dropped() {
    let server = spawn_server().await;
    let resp = server
        .client
        .post(format!("{}/beacon", server.base))
        .body("not json")
        .send()
        .await
        .expect("beacon");
    assert_eq!(resp.status(), reqwest::StatusCode::ACCEPTED);
}

#[tokio::test]
async fn beacon_for_live_session_ends_it_as_client_lost() {
    let server = spawn_server().await;
    let id = server.start(8).await["session_id"]
        .as_str()
        .expect("id")
        .to_owned();

    // Whatever reason the client claims, a live session only learns that
    // the client is gone.
    let resp = server
        .post(
            "/beacon",
            &json!({
                "session_id": id,
                "participant_ref": "applicant-1",
                "reason": "all_questions_completed",
                "elapsed_seconds": 5,
                "total_questions": 9,
                "answered_questions": 9,
            }),
        )
        .await;
    assert_eq!(resp.status(), reqwest::StatusCode::ACCEPTED);

    let view = server.wait_ended(&id).await;
    assert_eq!(view["end_reason"], json!("client_lost"));
    assert_eq!(view["state"], json!("abandoned"));
    assert_eq!(view["status"], json!("abandoned"));
    assert_eq!(view["answered_questions"], json!(0));
}

async fn post_orphan_beacon(server: &Server, session: &Session, reason: &str, answered: u32) {
    let resp = server
        .post(
            "/beacon",
            &json!({
                "session_id": session.id,
                "participant_ref": "applicant-9",
                "reason": reason,
                "elapsed_seconds": 30,
                "total_questions": 5,
                "answered_questions": answered,
            }),
        )
        .await;
    assert_eq!(resp.status(), reqwest::StatusCode::ACCEPTED);
}

#[tokio::test]
async fn beacon_cannot_complete_unanswered_stored_session() {
    let server = spawn_server().await;
    let session = orphan(&server.state, 60).await;

    post_orphan_beacon(&server, &session, "all_questions_completed", 2).await;

    let stored = SessionRepo::new(Arc::clone(&server.state.db))
        .get_by_id(&session.id)
        .await
        .expect("fetch")
        .expect("exists");
    assert_eq!(stored.end_reason, Some(EndReason::VoluntaryEnd));
    assert_eq!(stored.state, SessionState::Abandoned);
    assert_eq!(stored.answered_questions, 2);
}

#[tokio::test]
async fn early_time_expired_beacon_is_recorded_as_client_lost() {
    let server = spawn_server().await;
    let session = orphan(&server.state, 20).await;

    post_orphan_beacon(&server, &session, "time_expired", 1).await;

    let stored = SessionRepo::new(Arc::clone(&server.state.db))
        .get_by_id(&session.id)
        .await
        .expect("fetch")
        .expect("exists");
    assert_eq!(stored.end_reason, Some(EndReason::ClientLost));
    assert_eq!(stored.state, SessionState::Abandoned);
    assert!(stored.elapsed_seconds <= 21, "elapsed capped at server clock");
}

#[tokio::test]
async fn time_expired_beacon_after_limit_is_honoured() {
    let server = spawn_server().await;
    // The test config limits sessions to 600 s.
    let session = orphan(&server.state, 700).await;

    post_orphan_beacon(&server, &session, "time_expired", 1).await;

    let stored = SessionRepo::new(Arc::clone(&server.state.db))
        .get_by_id(&session.id)
        .await
        .expect("fetch")
        .expect("exists");
    assert_eq!(stored.end_reason, Some(EndReason::TimeExpired));
    assert_eq!(stored.state, SessionState::TimedOut);
    assert_eq!(stored.elapsed_seconds, 30);
}
