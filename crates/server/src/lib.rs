//! HTTP server for the larder caching proxy.
//!
//! This crate provides:
//! - The cache registry and access recency tracker
//! - The origin gateway (plain or signed requests)
//! - Per-request strategy resolution and streaming
//! - Stat, admin and purge endpoints

pub mod access;
pub mod cache;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod origin;
pub mod resolver;
pub mod routes;
pub mod state;
pub mod stats;
pub mod trace;

pub use error::ApiError;
pub use routes::create_router;
pub use state::AppState;
pub use trace::TraceId;
