//! Prometheus metrics for the larder server.
//!
//! Exposes counters for each serving strategy, transfer volumes and
//! in-flight transfers. Labels never carry request paths.
//!
//! The `/metrics` endpoint is unauthenticated to allow scraping. Restrict
//! it at the network level if aggregate traffic volumes are sensitive.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{
    self, Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::sync::{LazyLock, Once};

/// Global Prometheus registry for all metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

// Strategy metrics
pub static FAST_HITS: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "larder_fast_hits_total",
        "Requests served from disk using in-memory metadata",
    )
    .expect("metric creation failed")
});

pub static CHECKED_HITS: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "larder_checked_hits_total",
        "Requests served from disk after verifying the size against the origin",
    )
    .expect("metric creation failed")
});

pub static PASSES: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "larder_passes_total",
        "Requests streamed from the origin without touching the cache",
    )
    .expect("metric creation failed")
});

pub static STORES: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "larder_stores_total",
        "Fetch-and-store transfers started",
    )
    .expect("metric creation failed")
});

pub static STORE_ABORTS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "larder_store_aborts_total",
            "Fetch-and-store transfers that did not commit, by reason",
        ),
        &["reason"],
    )
    .expect("metric creation failed")
});

pub static PURGES: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new("larder_purges_total", "Purge requests accepted")
        .expect("metric creation failed")
});

pub static DELETES: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new("larder_deletes_total", "Cached paths deleted by admin request")
        .expect("metric creation failed")
});

pub static ORIGIN_ERRORS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "larder_origin_errors_total",
            "Origin requests that failed, by method and kind",
        ),
        &["method", "kind"],
    )
    .expect("metric creation failed")
});

// Transfer metrics
pub static BYTES_FETCHED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "larder_bytes_fetched_total",
        "Bytes read from the origin",
    )
    .expect("metric creation failed")
});

pub static BYTES_SENT: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new("larder_bytes_sent_total", "Bytes sent to clients")
        .expect("metric creation failed")
});

pub static ACTIVE_TRANSFERS: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new(
        "larder_active_transfers",
        "Response bodies currently streaming",
    )
    .expect("metric creation failed")
});

pub static TRANSFER_SIZE: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "larder_transfer_size_bytes",
            "Size of completed transfers",
        )
        .buckets(vec![
            1_048_576.0,
            10_485_760.0,
            20_971_520.0,
            31_457_280.0,
            52_428_800.0,
            104_857_600.0,
            209_715_200.0,
            524_288_000.0,
            786_432_000.0,
        ]),
    )
    .expect("metric creation failed")
});

static REGISTER_ONCE: Once = Once::new();

/// Register all metrics with the global registry.
///
/// Idempotent, so tests and embedders can call it freely.
pub fn register_metrics() {
    REGISTER_ONCE.call_once(|| {
        REGISTRY
            .register(Box::new(FAST_HITS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(CHECKED_HITS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(PASSES.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(STORES.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(STORE_ABORTS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(PURGES.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(DELETES.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(ORIGIN_ERRORS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(BYTES_FETCHED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(BYTES_SENT.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(ACTIVE_TRANSFERS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(TRANSFER_SIZE.clone()))
            .expect("metric registration failed");
    });
}

/// Handler for GET /metrics.
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = Vec::new();
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            format!("Failed to encode metrics: {e}").into_bytes(),
        ),
    }
}

/// Record a fetch-and-store that ended without committing.
pub fn record_store_abort(reason: &str) {
    STORE_ABORTS.with_label_values(&[reason]).inc();
}

/// Record a failed origin request.
pub fn record_origin_error(method: &str, kind: &str) {
    ORIGIN_ERRORS.with_label_values(&[method, kind]).inc();
}
