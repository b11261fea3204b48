//! Administrative endpoints.
//!
//! All routes here sit behind the source-address allow-list. Listings are
//! plain text, one entry per line, so they pipe straight into shell tools.

use crate::error::{ApiError, ApiResult};
use crate::metrics;
use crate::state::AppState;
use axum::extract::{Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use larder_core::CacheKey;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt::Write;

const TEXT_PLAIN: &str = "text/plain; charset=utf-8";

#[derive(Debug, Deserialize)]
pub struct PathQuery {
    pub path: Option<String>,
}

impl PathQuery {
    /// The requested path, or a validation error naming `action`.
    fn require(&self, action: &str) -> ApiResult<&str> {
        let path = self
            .path
            .as_deref()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| ApiError::Validation(format!("missing path to {action}")))?;
        if !path.starts_with('/') {
            return Err(ApiError::Validation(format!(
                "path must start with '/': {path}"
            )));
        }
        Ok(path)
    }
}

#[derive(Debug, Deserialize)]
pub struct AccessTimesQuery {
    pub limit: Option<usize>,
}

fn text(body: String) -> Response {
    ([(header::CONTENT_TYPE, TEXT_PLAIN)], body).into_response()
}

/// GET /admin/list/paths
pub async fn list_paths(State(state): State<AppState>) -> Response {
    let mut out = String::new();
    for key in state.registry.available_keys() {
        let _ = writeln!(out, "{}", key.path());
    }
    text(out)
}

/// GET /admin/list/access-times
///
/// `unix_seconds path` per line, least recently accessed first.
pub async fn list_access_times(
    State(state): State<AppState>,
    Query(query): Query<AccessTimesQuery>,
) -> Response {
    let limit = query.limit.unwrap_or(usize::MAX);
    let mut out = String::new();
    for entry in state.registry.recency().iter().take(limit) {
        let _ = writeln!(out, "{} {}", entry.unix_seconds(), entry.path);
    }
    text(out)
}

/// GET /admin/list/fnames
///
/// `storage_location path` per available path.
pub async fn list_fnames(State(state): State<AppState>) -> Response {
    let mut out = String::new();
    for key in state.registry.available_keys() {
        let _ = writeln!(out, "{} {}", key.storage_path(), key.path());
    }
    text(out)
}

/// GET /admin/list/disk
///
/// Every cache file on disk, flagged `available` when the registry
/// tracks it and `orphan` otherwise.
pub async fn list_disk(State(state): State<AppState>) -> ApiResult<Response> {
    let locations = state.registry.storage().list().await?;

    let mut entries: Vec<(&'static str, String)> = Vec::with_capacity(locations.len());
    for location in locations {
        match CacheKey::from_storage_path(&location) {
            Ok(key) => {
                let status = if state.registry.is_available(&key) {
                    "available"
                } else {
                    "orphan"
                };
                entries.push((status, key.path().to_string()));
            }
            Err(e) => {
                tracing::debug!(location = %location, error = %e, "Skipping foreign file in cache directory");
            }
        }
    }
    entries.sort_by(|a, b| a.1.cmp(&b.1));

    let mut out = String::new();
    for (status, path) in entries {
        let _ = writeln!(out, "{status} {path}");
    }
    Ok(text(out))
}

/// GET /admin/path-headers?path=P
pub async fn path_headers(
    State(state): State<AppState>,
    Query(query): Query<PathQuery>,
) -> ApiResult<Response> {
    let path = query.require("stat")?;
    let headers = state
        .registry
        .get_available(&CacheKey::encode(path))
        .ok_or_else(|| ApiError::NotFound(format!("path is not available: {path}")))?;

    let mut map: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (name, value) in &headers {
        map.entry(name.as_str().to_string())
            .or_default()
            .push(String::from_utf8_lossy(value.as_bytes()).into_owned());
    }

    let body = serde_json::to_string_pretty(&map)
        .map_err(|e| ApiError::Internal(format!("failed to encode headers: {e}")))?;
    Ok(([(header::CONTENT_TYPE, "application/json")], body).into_response())
}

/// POST /admin/delete-path?path=P
///
/// Removes the cached copy and all state for P. Refused while P is being
/// written.
pub async fn delete_path(
    State(state): State<AppState>,
    Query(query): Query<PathQuery>,
) -> ApiResult<Response> {
    let path = query.require("delete")?;
    let key = CacheKey::encode(path);

    if let Err(e) = state.registry.delete(&key).await {
        tracing::info!(path = %path, error = %e, "Delete failed");
        return Err(e.into());
    }

    metrics::DELETES.inc();
    tracing::info!(path = %path, "Deleted");
    Ok(StatusCode::OK.into_response())
}

/// GET /admin/available-size
///
/// Sum of `Content-Length` over every available path, in bytes.
pub async fn available_size(State(state): State<AppState>) -> Response {
    text(format!("{}\n", state.registry.tracked_size()))
}
