//! Session control API.
//!
//! `/api/start`, `/api/stop` and `/api/reset` answer `ok` or `error: <msg>`;
//! `/api/status` reports the session as JSON.

use super::{respond, AppState, APPLICATION_JSON, TEXT_PLAIN};
use crate::{audit, metrics};
use gueststack_agent::{EventCounters, SamplingSession, SessionError, SessionStatus};
use hyper::{Body, Method, Response, StatusCode};
use serde::Serialize;
use tracing::warn;

/// A session control operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlOp {
    Start,
    Stop,
    Reset,
}

impl ControlOp {
    pub fn from_path(path: &str) -> Option<Self> {
        match path {
            "/api/start" => Some(ControlOp::Start),
            "/api/stop" => Some(ControlOp::Stop),
            "/api/reset" => Some(ControlOp::Reset),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ControlOp::Start => "start",
            ControlOp::Stop => "stop",
            ControlOp::Reset => "reset",
        }
    }

    pub async fn apply(&self, session: &SamplingSession) -> Result<(), SessionError> {
        match self {
            ControlOp::Start => session.start().await,
            ControlOp::Stop => session.stop().await,
            ControlOp::Reset => session.reset().await,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub hostname: String,
    pub status: SessionStatus,
    /// `None` when the counters cannot be read
    pub counters: Option<EventCounters>,
    pub relevant_ranges: Vec<String>,
    pub stack_buffers: usize,
}

impl StatusReport {
    pub async fn collect(state: &AppState) -> Self {
        let session = &state.session;
        let counters = match session.read_counters().await {
            Ok(counters) => Some(counters),
            Err(e) => {
                warn!("Reading event counters failed: {}", e);
                None
            }
        };

        Self {
            hostname: state.hostname.clone(),
            status: session.status(),
            counters,
            relevant_ranges: session.relevant_ranges().iter().map(|r| r.to_string()).collect(),
            stack_buffers: session.control_files().stacks.len(),
        }
    }
}

pub async fn handle_api(method: &Method, path: &str, state: &AppState) -> Response<Body> {
    if path == "/api/status" {
        return match serde_json::to_string(&StatusReport::collect(state).await) {
            Ok(body) => respond(StatusCode::OK, APPLICATION_JSON, body),
            Err(e) => respond(StatusCode::INTERNAL_SERVER_ERROR, TEXT_PLAIN, format!("error: {}", e)),
        };
    }

    let Some(op) = ControlOp::from_path(path) else {
        return respond(StatusCode::NOT_FOUND, TEXT_PLAIN, format!("illegal path {}", path));
    };

    if *method != Method::GET && *method != Method::POST {
        return respond(
            StatusCode::METHOD_NOT_ALLOWED,
            TEXT_PLAIN,
            format!("method {} not allowed", method),
        );
    }

    match op.apply(&state.session).await {
        Ok(()) => {
            metrics::record_control(op.name(), true);
            audit::control_request(op.name(), None);
            respond(StatusCode::OK, TEXT_PLAIN, "ok")
        }
        Err(e) => {
            let message = e.to_string();
            metrics::record_control(op.name(), false);
            audit::control_request(op.name(), Some(&message));
            respond(
                StatusCode::INTERNAL_SERVER_ERROR,
                TEXT_PLAIN,
                format!("error: {}", message),
            )
        }
    }
}
