//! Cached content endpoints: `GET /<path>` and the `DELETE /<path>` purge.

use crate::access::client_addr;
use crate::error::{ApiError, ApiResult};
use crate::metrics;
use crate::state::AppState;
use axum::extract::{Request, State};
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use larder_core::CacheKey;
use std::net::SocketAddr;

/// Catch-all for every path no other route claims.
pub async fn cache_fallback(State(state): State<AppState>, req: Request) -> ApiResult<Response> {
    // Request is not Sync, so nothing borrowed from it may cross an await
    let client = client_addr(&req);
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let query = req.uri().query().map(str::to_string);

    match method {
        Method::GET if path == "/" => Ok(StatusCode::OK.into_response()),
        Method::GET => {
            state
                .resolver
                .resolve(&path, query.as_deref(), client)
                .await
        }
        Method::DELETE => purge(&state, &path, client),
        other => Err(ApiError::MethodNotAllowed(other.to_string())),
    }
}

/// Force the next GET of `path` to bypass any cached copy.
fn purge(state: &AppState, path: &str, client: Option<SocketAddr>) -> ApiResult<Response> {
    state.admin_access.authorize(client)?;

    state.registry.mark_purge_pending(&CacheKey::encode(path));
    metrics::PURGES.inc();
    tracing::info!(path = %path, client = ?client, "Purge pending");

    Ok(StatusCode::OK.into_response())
}
