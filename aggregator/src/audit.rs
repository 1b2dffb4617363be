//! Audit logging for session control.
//!
//! Events are emitted via `tracing` with a dedicated target so they can be
//! filtered and formatted separately from operational logs.

use tracing::{info, warn};

const AUDIT_TARGET: &str = "gueststack::audit";

/// Log a start/stop/reset request and its outcome.
pub fn control_request(op: &str, error: Option<&str>) {
    match error {
        None => info!(
            target: AUDIT_TARGET,
            event = "session_control",
            op = %op,
            result = "ok",
        ),
        Some(reason) => warn!(
            target: AUDIT_TARGET,
            event = "session_control",
            op = %op,
            result = "error",
            reason = %reason,
        ),
    }
}

/// Log a request for captured stacks.
pub fn stacks_served(path: &str, relevant: usize, total: usize) {
    info!(
        target: AUDIT_TARGET,
        event = "stacks_served",
        path = %path,
        relevant = relevant,
        total = total,
    );
}
