//! Route configuration.

use crate::access::require_admin;
use crate::handlers;
use crate::metrics::metrics_handler;
use crate::state::AppState;
use crate::trace::trace_middleware;
use axum::Router;
use axum::middleware;
use axum::routing::{get, post};
use tower_http::trace::TraceLayer;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let stat_routes = Router::new()
        .route("/stat", get(handlers::get_stat).head(handlers::head_stat))
        .route("/stat/active", get(handlers::get_stat_active));

    // Admin endpoints (all require an allow-listed source address)
    let admin_routes = Router::new()
        .route("/admin/list/paths", get(handlers::list_paths))
        .route("/admin/list/access-times", get(handlers::list_access_times))
        .route("/admin/list/fnames", get(handlers::list_fnames))
        .route("/admin/list/disk", get(handlers::list_disk))
        .route("/admin/path-headers", get(handlers::path_headers))
        .route("/admin/delete-path", post(handlers::delete_path))
        .route("/admin/available-size", get(handlers::available_size))
        .route_layer(middleware::from_fn_with_state(
            state.admin_access.clone(),
            require_admin,
        ));

    let mut router = Router::new()
        .merge(stat_routes)
        .merge(admin_routes)
        // Everything else is cached content
        .fallback(handlers::cache_fallback);

    // Conditionally add metrics endpoint based on config.
    // When enabled, restrict it at the network level.
    if state.config.server.metrics_enabled {
        router = router.route("/metrics", get(metrics_handler));
    }

    router
        .layer(middleware::from_fn(trace_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
