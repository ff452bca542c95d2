#![forbid(unsafe_code)]

//! `interview-session-ctl`: local CLI companion for `interview-session`.
//!
//! Sends JSON requests to the session API over HTTP and prints the
//! response. Intended for operators poking at a running server.

use std::time::Duration;

use clap::{Parser, Subcommand};
use serde_json::{json, Value};

#[derive(Debug, Parser)]
#[command(
    name = "interview-session-ctl",
    about = "Local CLI for interview-session server",
    version,
    long_about = None
)]
struct Cli {
    /// Base URL of the session API.
    #[arg(long, default_value = "http://127.0.0.1:8080")]
    server: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start a session.
    Start {
        /// Participant reference.
        #[arg(long)]
        participant: String,
        /// Job reference.
        #[arg(long)]
        job: String,
        /// Organisation reference.
        #[arg(long)]
        org: String,
        /// Job-specific question (repeatable).
        #[arg(long = "question")]
        questions: Vec<String>,
        /// Supplementary question (repeatable); server default when omitted.
        #[arg(long = "secondary")]
        secondary: Vec<String>,
    },

    /// Report newly answered questions.
    Progress {
        /// Session ID.
        id: String,
        /// Number of newly answered questions.
        #[arg(default_value_t = 1, allow_negative_numbers = true)]
        delta: i64,
    },

    /// End a session at the participant's request.
    End {
        /// Session ID.
        id: String,
    },

    /// Send one heartbeat.
    Heartbeat {
        /// Session ID.
        id: String,
    },

    /// Show a session, or every session of a participant.
    Status {
        /// Session ID.
        id: Option<String>,
        /// Participant reference to list instead.
        #[arg(long, conflicts_with = "id")]
        participant: Option<String>,
    },

    /// Deliver a crash-path beacon, as a closing browser tab would.
    Beacon {
        /// Session ID.
        id: String,
        /// Participant reference recorded on the session.
        #[arg(long)]
        participant: String,
        /// End reason (`client_lost`, `voluntary_end`, ...).
        #[arg(long, default_value = "client_lost")]
        reason: String,
        /// Elapsed seconds observed by the client.
        #[arg(long, default_value_t = 0)]
        elapsed: u64,
        /// Answered questions observed by the client.
        #[arg(long, default_value_t = 0)]
        answered: u32,
        /// Question total observed by the client.
        #[arg(long, default_value_t = 0)]
        total: u32,
    },
}

/// One HTTP call derived from a subcommand.
enum Call {
    Get(String),
    Post(String, Value),
}

impl Command {
    fn into_call(self) -> Call {
        match self {
            Self::Start {
                participant,
                job,
                org,
                questions,
                secondary,
            } => {
                let mut body = json!({
                    "participant_ref": participant,
                    "job_ref": job,
                    "org_ref": org,
                    "primary_questions": questions,
                });
                if !secondary.is_empty() {
                    body["secondary_questions"] = json!(secondary);
                }
                Call::Post("/sessions".into(), body)
            }
            Self::Progress { id, delta } => Call::Post(
                format!("/sessions/{id}/progress"),
                json!({ "answered_delta": delta }),
            ),
            Self::End { id } => Call::Post(format!("/sessions/{id}/end"), json!({})),
            Self::Heartbeat { id } => Call::Post(format!("/sessions/{id}/heartbeat"), json!({})),
            Self::Status {
                participant: Some(participant),
                ..
            } => Call::Get(format!("/participants/{participant}/sessions")),
            Self::Status { id, .. } => Call::Get(format!("/sessions/{}", id.unwrap_or_default())),
            Self::Beacon {
                id,
                participant,
                reason,
                elapsed,
                answered,
                total,
            } => Call::Post(
                "/beacon".into(),
                json!({
                    "session_id": id,
                    "participant_ref": participant,
                    "reason": reason,
                    "elapsed_seconds": elapsed,
                    "answered_questions": answered,
                    "total_questions": total,
                }),
            ),
        }
    }
}

fn main() {
    let args = Cli::parse();
    let base = args.server.trim_end_matches('/').to_owned();
    let call = args.command.into_call();

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("Failed to start runtime: {err}");
            std::process::exit(1);
        }
    };

    match runtime.block_on(send(&base, call)) {
        Ok((status, body)) if status.is_success() => {
            if body.is_null() {
                println!("OK");
            } else {
                println!("{}", serde_json::to_string_pretty(&body).unwrap_or_default());
            }
        }
        Ok((status, body)) => {
            let err_msg = body
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("unknown error");
            eprintln!("Error ({status}): {err_msg}");
            std::process::exit(1);
        }
        Err(err) => {
            eprintln!("Failed to reach server: {err}");
            eprintln!("Is interview-session running at '{base}'?");
            std::process::exit(1);
        }
    }
}

/// Send `call` and return the status plus the JSON body (`null` when empty).
async fn send(
    base: &str,
    call: Call,
) -> std::result::Result<(reqwest::StatusCode, Value), Box<dyn std::error::Error>> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()?;

    let request = match call {
        Call::Get(path) => client.get(format!("{base}{path}")),
        Call::Post(path, body) => client.post(format!("{base}{path}")).json(&body),
    };

    let response = request.send().await?;
    let status = response.status();
    let text = response.text().await?;
    let body = if text.trim().is_empty() {
        Value::Null
    } else {
        serde_json::from_str(&text).unwrap_or(Value::String(text))
    };
    Ok((status, body))
}
