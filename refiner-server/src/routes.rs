//! HTTP route handlers for sessions and server settings.

use axum::Router;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use bytes::Bytes;
use refiner::dispatch::StopOutcome;
use refiner::session::request::{
    ProtocolError, parse_body, parse_junit_version, parse_open_request, parse_stop_request,
};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::state::AppState;
use crate::stream;

const NDJSON: &str = "application/x-ndjson";

/// Build the router with all routes bound to `state`.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/session", post(open_session))
        .route("/session/stop", post(stop_session))
        .route("/junitVersion", post(set_junit_version))
        .route("/sessions", get(list_sessions))
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

/// POST /session - open a session and stream its progress.
async fn open_session(State(state): State<AppState>, body: Bytes) -> Response {
    let request = match parse_body(&body).and_then(|payload| parse_open_request(&payload)) {
        Ok(request) => request,
        Err(err) => return bad_request("session", &err),
    };

    let session_id = request.session_id.clone();
    let (writer, body) = stream::channel();
    match state.dispatcher.open_session(request, writer) {
        Ok(_detached) => {
            info!(session_id = %session_id, "session opened");
            (
                [
                    (header::CONTENT_TYPE, NDJSON),
                    (header::CACHE_CONTROL, "no-cache"),
                ],
                body,
            )
                .into_response()
        }
        Err(err) => {
            error!(session_id = %session_id, err = %format!("{err:#}"), "failed to open session");
            (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response()
        }
    }
}

/// POST /session/stop - ask a running session to wind down.
async fn stop_session(State(state): State<AppState>, body: Bytes) -> Response {
    let session_id = match parse_body(&body).and_then(|payload| parse_stop_request(&payload)) {
        Ok(id) => id,
        Err(err) => return bad_request("stop", &err),
    };
    match state.dispatcher.stop_session(&session_id) {
        StopOutcome::Stopping => (StatusCode::OK, "Stopping").into_response(),
        StopOutcome::NotFound => (StatusCode::NOT_FOUND, "Session Not Found").into_response(),
    }
}

/// POST /junitVersion - set the version used by sessions opened later.
async fn set_junit_version(State(state): State<AppState>, body: Bytes) -> Response {
    match parse_body(&body).and_then(|payload| parse_junit_version(&payload)) {
        Ok(version) => {
            state.dispatcher.set_junit_version(version);
            (StatusCode::OK, "Success").into_response()
        }
        Err(err) => bad_request("junitVersion", &err),
    }
}

#[derive(Serialize)]
struct SessionsResponse {
    sessions: Vec<String>,
}

/// GET /sessions - ids of sessions currently running.
async fn list_sessions(State(state): State<AppState>) -> Json<SessionsResponse> {
    Json(SessionsResponse {
        sessions: state.dispatcher.active_sessions(),
    })
}

fn bad_request(route: &str, err: &ProtocolError) -> Response {
    warn!(route, err = %err, "rejected request");
    (StatusCode::BAD_REQUEST, format!("Bad Request: {err}")).into_response()
}
