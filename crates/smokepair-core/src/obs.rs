//! Structured lifecycle events for comparison runs.
//!
//! - Run-scoped tracing span via [`run_span`]
//! - `emit_*` functions for run, lane and server lifecycle events
//!
//! Events are emitted at `info!` level (`warn!` for cleanup failures) with an
//! `event` field so JSON log consumers can filter on it.

use tracing::{info, warn};

use crate::lane::Lane;

/// Run-scoped span carrying `run_id` and `identifier`.
///
/// ```ignore
/// runner.run_inner().instrument(run_span("6f1c...", "rails")).await
/// // every event inside carries run_id and identifier
/// ```
pub fn run_span(run_id: &str, identifier: &str) -> tracing::Span {
    tracing::info_span!("smokepair.run", run_id = %run_id, identifier = %identifier)
}

/// Emit event: run started.
pub fn emit_run_started(run_id: &str, identifier: &str, mode: &str, server: bool) {
    info!(
        event = "run.started",
        run_id = %run_id,
        identifier = %identifier,
        mode = %mode,
        server = server,
    );
}

/// Emit event: one lane finished its smoke run.
pub fn emit_lane_finished(lane: Lane, success: bool, elapsed_secs: f64) {
    info!(
        event = "lane.finished",
        lane = %lane,
        success = success,
        elapsed_secs = elapsed_secs,
    );
}

/// Emit event: a lane's server accepted a connection.
pub fn emit_server_ready(lane: Lane, port: u16) {
    info!(event = "server.ready", lane = %lane, port = port);
}

/// Emit event: a lane's server was stopped.
pub fn emit_server_stopped(lane: Lane, port: u16) {
    info!(event = "server.stopped", lane = %lane, port = port);
}

/// Emit event: run finished with the classification and duration.
pub fn emit_run_finished(run_id: &str, classification: &str, duration_ms: u64) {
    info!(
        event = "run.finished",
        run_id = %run_id,
        result = %classification,
        duration_ms = duration_ms,
    );
}

/// Emit event: a cleanup step failed (warning level).
pub fn emit_cleanup_failed(step: &str, error: &dyn std::fmt::Display) {
    warn!(event = "cleanup.failed", step = %step, error = %error);
}
