//! Plain-text statistics endpoints.

use crate::state::AppState;
use crate::stats::{SIZE_BUCKETS_MB, format_bytes};
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use std::fmt::Write;

const TEXT_PLAIN: &str = "text/plain; charset=utf-8";

/// GET /stat
pub async fn get_stat(State(state): State<AppState>) -> impl IntoResponse {
    ([(header::CONTENT_TYPE, TEXT_PLAIN)], render_stat(&state))
}

/// HEAD /stat, for liveness probes.
pub async fn head_stat() -> StatusCode {
    StatusCode::OK
}

/// GET /stat/active
pub async fn get_stat_active(State(state): State<AppState>) -> impl IntoResponse {
    let mut out = String::new();
    for (path, count) in state.stats.active_transfers() {
        let _ = writeln!(out, "{count} {path}");
    }
    ([(header::CONTENT_TYPE, TEXT_PLAIN)], out)
}

/// Render the `/stat` report.
pub fn render_stat(state: &AppState) -> String {
    let snap = state.stats.snapshot();
    let registry = &state.registry;

    let mut out = String::new();
    let _ = writeln!(out, "Available paths: {}", registry.count_available());
    let _ = writeln!(out, "Busy paths: {}", registry.count_busy());
    let _ = writeln!(out, "Purged paths: {}", registry.count_purged());
    let _ = writeln!(out, "Fast hits: {}", snap.fast_hits);
    let _ = writeln!(out, "Checked hits: {}", snap.checked_hits);
    let _ = writeln!(out, "Passes: {}", snap.passes);
    let _ = writeln!(out, "Stores: {}", snap.stores);
    let _ = writeln!(out, "Active transfers: {}", snap.active_transfers);
    out.push('\n');
    let _ = writeln!(out, "Bytes fetched: {}", format_bytes(snap.bytes_fetched));
    let _ = writeln!(out, "Bytes sent: {}", format_bytes(snap.bytes_sent));
    out.push('\n');
    out.push_str("Size dist\n=========\n");
    for (lower, count) in SIZE_BUCKETS_MB.iter().zip(snap.size_dist) {
        let _ = writeln!(out, "{lower} MB {count}");
    }
    out
}
