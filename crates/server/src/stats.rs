//! Per-instance counters behind the `/stat` endpoints.
//!
//! Every update is mirrored into the global Prometheus metrics, so the
//! plain-text report and the scrape endpoint never disagree.

use crate::metrics;
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Lower bounds, in MiB, of the transfer size distribution buckets.
pub const SIZE_BUCKETS_MB: [u64; 10] = [0, 1, 10, 20, 30, 50, 100, 200, 500, 750];

#[derive(Default)]
pub struct ServerStats {
    fast_hits: AtomicU64,
    checked_hits: AtomicU64,
    passes: AtomicU64,
    stores: AtomicU64,
    bytes_fetched: AtomicU64,
    bytes_sent: AtomicU64,
    active: DashMap<String, i64>,
    size_dist: [AtomicU64; SIZE_BUCKETS_MB.len()],
}

/// Point-in-time copy of the counters.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub fast_hits: u64,
    pub checked_hits: u64,
    pub passes: u64,
    pub stores: u64,
    pub bytes_fetched: u64,
    pub bytes_sent: u64,
    pub active_transfers: usize,
    pub size_dist: [u64; SIZE_BUCKETS_MB.len()],
}

impl ServerStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_fast_hit(&self) {
        self.fast_hits.fetch_add(1, Ordering::Relaxed);
        metrics::FAST_HITS.inc();
    }

    pub fn record_checked_hit(&self) {
        self.checked_hits.fetch_add(1, Ordering::Relaxed);
        metrics::CHECKED_HITS.inc();
    }

    pub fn record_pass(&self) {
        self.passes.fetch_add(1, Ordering::Relaxed);
        metrics::PASSES.inc();
    }

    pub fn record_store(&self) {
        self.stores.fetch_add(1, Ordering::Relaxed);
        metrics::STORES.inc();
    }

    fn add_bytes_fetched(&self, n: u64) {
        self.bytes_fetched.fetch_add(n, Ordering::Relaxed);
        metrics::BYTES_FETCHED.inc_by(n);
    }

    fn add_bytes_sent(&self, n: u64) {
        self.bytes_sent.fetch_add(n, Ordering::Relaxed);
        metrics::BYTES_SENT.inc_by(n);
    }

    fn record_size(&self, bytes: u64) {
        let mb = bytes / (1024 * 1024);
        if let Some(idx) = SIZE_BUCKETS_MB.iter().rposition(|&lower| mb >= lower) {
            self.size_dist[idx].fetch_add(1, Ordering::Relaxed);
        }
        metrics::TRANSFER_SIZE.observe(bytes as f64);
    }

    /// Start accounting for a response body that is about to stream.
    pub fn begin_transfer(
        self: &Arc<Self>,
        path: &str,
        from_origin: bool,
        client: Option<SocketAddr>,
    ) -> Transfer {
        *self.active.entry(path.to_string()).or_insert(0) += 1;
        metrics::ACTIVE_TRANSFERS.inc();
        Transfer {
            stats: Arc::clone(self),
            path: path.to_string(),
            client,
            from_origin,
            started: Instant::now(),
            bytes: 0,
            completed: false,
        }
    }

    fn end_transfer(&self, path: &str) {
        if let Some(mut count) = self.active.get_mut(path) {
            *count -= 1;
        }
        self.active.remove_if(path, |_, count| *count <= 0);
        metrics::ACTIVE_TRANSFERS.dec();
    }

    /// In-flight transfers per path, busiest first.
    pub fn active_transfers(&self) -> Vec<(String, i64)> {
        let mut active: Vec<(String, i64)> = self
            .active
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect();
        active.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        active
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            fast_hits: self.fast_hits.load(Ordering::Relaxed),
            checked_hits: self.checked_hits.load(Ordering::Relaxed),
            passes: self.passes.load(Ordering::Relaxed),
            stores: self.stores.load(Ordering::Relaxed),
            bytes_fetched: self.bytes_fetched.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            active_transfers: self.active.len(),
            size_dist: std::array::from_fn(|i| self.size_dist[i].load(Ordering::Relaxed)),
        }
    }
}

/// Accounting handle for one streaming response body.
///
/// Dropping it without calling [`Transfer::complete`] counts the transfer
/// as aborted; the active-path entry is released either way.
pub struct Transfer {
    stats: Arc<ServerStats>,
    path: String,
    client: Option<SocketAddr>,
    from_origin: bool,
    started: Instant,
    bytes: u64,
    completed: bool,
}

impl Transfer {
    /// Account for a chunk handed to the client.
    pub fn sent(&mut self, n: usize) {
        let n = n as u64;
        self.bytes += n;
        self.stats.add_bytes_sent(n);
        if self.from_origin {
            self.stats.add_bytes_fetched(n);
        }
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    /// Mark the body as fully delivered.
    pub fn complete(mut self) {
        self.completed = true;
        self.stats.record_size(self.bytes);

        let elapsed = self.started.elapsed();
        tracing::info!(
            path = %self.path,
            bytes = self.bytes,
            kbps = throughput_kbps(self.bytes, elapsed.as_secs_f64()),
            client = ?self.client,
            "Transferred"
        );
    }
}

impl Drop for Transfer {
    fn drop(&mut self) {
        if !self.completed {
            tracing::info!(
                path = %self.path,
                bytes = self.bytes,
                client = ?self.client,
                "Transfer aborted"
            );
        }
        self.stats.end_transfer(&self.path);
    }
}

fn throughput_kbps(bytes: u64, secs: f64) -> u64 {
    if secs <= 0.0 {
        return 0;
    }
    (bytes as f64 / secs / 1024.0) as u64
}

/// Human readable byte count using SI units ("1.5 MB", "82 kB").
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 7] = ["B", "kB", "MB", "GB", "TB", "PB", "EB"];
    if bytes < 1000 {
        return format!("{bytes} B");
    }

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1000.0 && unit < UNITS.len() - 1 {
        value /= 1000.0;
        unit += 1;
    }

    if value < 10.0 {
        format!("{value:.1} {}", UNITS[unit])
    } else {
        format!("{value:.0} {}", UNITS[unit])
    }
}
