//! Per-request cache strategy.
//!
//! Every inbound GET is resolved to exactly one of four strategies:
//! fast hit, checked hit, passthrough or fetch-and-store. Decisions only
//! touch registry maps; bodies are streamed afterwards without any lock
//! held.

use crate::cache::{BusyClaim, CacheRegistry};
use crate::cache::registry::content_length;
use crate::error::ApiResult;
use crate::metrics;
use crate::origin::{OriginGateway, OriginResponse, filter_headers};
use crate::stats::ServerStats;
use axum::body::Body;
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use bytes::Bytes;
use futures::StreamExt;
use larder_core::CacheKey;
use larder_storage::StreamingUpload;
use std::net::SocketAddr;
use std::sync::Arc;
use time::OffsetDateTime;

enum Strategy {
    /// Metadata is in memory; serve the file.
    FastHit(HeaderMap),
    /// The file on disk matched the origin's HEAD; serve it.
    CheckedHit(HeaderMap),
    /// Another writer owns the key; stream straight from the origin.
    Passthrough,
    /// This request owns the key and populates it.
    FetchAndStore {
        claim: BusyClaim,
        purge_pending: bool,
    },
}

#[derive(Clone, Copy)]
enum HitKind {
    Fast,
    Checked,
}

pub struct RequestResolver {
    registry: Arc<CacheRegistry>,
    origin: Arc<OriginGateway>,
    stats: Arc<ServerStats>,
}

impl RequestResolver {
    pub fn new(
        registry: Arc<CacheRegistry>,
        origin: Arc<OriginGateway>,
        stats: Arc<ServerStats>,
    ) -> Self {
        Self {
            registry,
            origin,
            stats,
        }
    }

    /// Serve `GET path?query`.
    pub async fn resolve(
        &self,
        path: &str,
        query: Option<&str>,
        client: Option<SocketAddr>,
    ) -> ApiResult<Response> {
        let key = CacheKey::encode(path);

        match self.decide(&key, path).await {
            Strategy::FastHit(headers) => {
                self.serve_cached(key, path, query, headers, HitKind::Fast, client)
                    .await
            }
            Strategy::CheckedHit(headers) => {
                self.serve_cached(key, path, query, headers, HitKind::Checked, client)
                    .await
            }
            Strategy::Passthrough => self.passthrough(path, query, client).await,
            Strategy::FetchAndStore {
                claim,
                purge_pending,
            } => {
                self.fetch_and_store(claim, purge_pending, path, query, client)
                    .await
            }
        }
    }

    async fn decide(&self, key: &CacheKey, path: &str) -> Strategy {
        if self.registry.is_purge_pending(key) {
            tracing::debug!(path = %path, "Purge pending, bypassing cached copy");
        } else {
            if let Some(headers) = self.registry.get_available(key) {
                return Strategy::FastHit(headers);
            }
            if let Some(headers) = self.verify_disk_copy(key, path).await {
                return Strategy::CheckedHit(headers);
            }
        }

        if self.registry.is_busy(key) {
            return Strategy::Passthrough;
        }

        match self.registry.claim(key) {
            Some(claim) => {
                let purge_pending = self.registry.is_purge_pending(key);
                Strategy::FetchAndStore {
                    claim,
                    purge_pending,
                }
            }
            None => Strategy::Passthrough,
        }
    }

    /// Trust a file the registry has no metadata for, if the origin agrees
    /// on its exact length. Mismatched files are left on disk.
    async fn verify_disk_copy(&self, key: &CacheKey, path: &str) -> Option<HeaderMap> {
        let size = match self.registry.probe_disk_size(key).await {
            Ok(Some(size)) if size > 0 => size,
            Ok(_) => return None,
            Err(e) => {
                tracing::warn!(path = %path, error = %e, "Failed to stat cached file");
                return None;
            }
        };

        let headers = match self.origin.probe(path).await {
            Ok(headers) => headers,
            Err(e) => {
                tracing::info!(path = %path, error = %e, "HEAD failed, not trusting cached copy");
                return None;
            }
        };

        let origin_size = content_length(&headers);
        if origin_size != Some(size) {
            tracing::info!(
                path = %path,
                disk_size = size,
                origin_size = ?origin_size,
                "Cached copy does not match origin"
            );
            return None;
        }

        self.registry.mark_available(key, headers.clone());
        Some(headers)
    }

    async fn serve_cached(
        &self,
        key: CacheKey,
        path: &str,
        query: Option<&str>,
        headers: HeaderMap,
        kind: HitKind,
        client: Option<SocketAddr>,
    ) -> ApiResult<Response> {
        if self.origin.signer().is_some()
            && let Err(e) = larder_signer::verify_expiry(query, OffsetDateTime::now_utc())
        {
            tracing::debug!(path = %path, error = %e, "Signed URL check failed, passing through");
            return self.passthrough(path, query, client).await;
        }

        let (meta, mut file) = match self.registry.storage().get_stream(&key.storage_path()).await {
            Ok(opened) => opened,
            Err(e) if e.is_not_found() => {
                tracing::warn!(path = %path, "Cached file vanished, forgetting it");
                self.registry.forget(&key);
                return self.passthrough(path, query, client).await;
            }
            Err(e) => return Err(e.into()),
        };

        // A store can rename a new file over the key between the metadata
        // lookup and the open; never replay headers for a different file.
        if let Some(len) = content_length(&headers)
            && len != meta.size
        {
            tracing::info!(
                path = %path,
                expected = len,
                disk_size = meta.size,
                "Cached copy changed underneath, passing through"
            );
            if !self.registry.is_busy(&key) {
                self.registry.forget(&key);
            }
            return self.passthrough(path, query, client).await;
        }

        match kind {
            HitKind::Fast => {
                tracing::debug!(path = %path, "Fast hit");
                self.stats.record_fast_hit();
            }
            HitKind::Checked => {
                tracing::info!(path = %path, "Checked hit");
                self.stats.record_checked_hit();
            }
        }

        let registry = Arc::clone(&self.registry);
        let mut transfer = self.stats.begin_transfer(path, false, client);
        let body = async_stream::stream! {
            while let Some(chunk) = file.next().await {
                match chunk {
                    Ok(bytes) => {
                        transfer.sent(bytes.len());
                        yield Ok::<Bytes, std::io::Error>(bytes);
                    }
                    Err(e) => {
                        tracing::error!(path = %key.path(), error = %e, "Cache read failed mid-transfer");
                        yield Err(std::io::Error::other(e.to_string()));
                        return;
                    }
                }
            }
            registry.touch(&key);
            transfer.complete();
        };

        Ok(build_response(StatusCode::OK, headers, Body::from_stream(body)))
    }

    async fn passthrough(
        &self,
        path: &str,
        query: Option<&str>,
        client: Option<SocketAddr>,
    ) -> ApiResult<Response> {
        tracing::debug!(path = %path, "Pass");
        self.stats.record_pass();
        let response = self.origin.fetch(path, query).await?;
        Ok(self.relay(path, response, client))
    }

    /// Stream an origin response to the client untouched, apart from
    /// header filtering.
    fn relay(&self, path: &str, response: OriginResponse, client: Option<SocketAddr>) -> Response {
        let OriginResponse {
            status,
            headers,
            body: mut upstream,
        } = response;
        let headers = filter_headers(&headers);
        let mut transfer = self.stats.begin_transfer(path, true, client);
        let path = path.to_string();

        let body = async_stream::stream! {
            while let Some(chunk) = upstream.next().await {
                match chunk {
                    Ok(bytes) => {
                        transfer.sent(bytes.len());
                        yield Ok::<Bytes, std::io::Error>(bytes);
                    }
                    Err(e) => {
                        tracing::warn!(path = %path, error = %e, "Origin failed mid-transfer");
                        yield Err(std::io::Error::other(e));
                        return;
                    }
                }
            }
            transfer.complete();
        };

        build_response(status, headers, Body::from_stream(body))
    }

    /// Tee the origin body into the cache and to the client.
    ///
    /// Each chunk goes to disk first, then to the client. A disk failure
    /// abandons the cached copy but keeps the client stream going. An
    /// origin failure ends both. The claim lives inside the body stream,
    /// so a client disconnect drops the upload and releases the key.
    async fn fetch_and_store(
        &self,
        claim: BusyClaim,
        purge_pending: bool,
        path: &str,
        query: Option<&str>,
        client: Option<SocketAddr>,
    ) -> ApiResult<Response> {
        let response = self.origin.fetch(path, query).await?;
        if response.status != StatusCode::OK {
            tracing::info!(path = %path, status = %response.status, "Origin returned non-200, not caching");
            drop(claim);
            return Ok(self.relay(path, response, client));
        }

        let key = claim.key().clone();
        let upload = match self.registry.storage().put_stream(&key.storage_path()).await {
            Ok(upload) => upload,
            Err(e) => {
                tracing::warn!(path = %path, error = %e, "Failed to open cache file, not caching");
                metrics::record_store_abort("open");
                drop(claim);
                return Ok(self.relay(path, response, client));
            }
        };

        tracing::info!(path = %path, "Storing");
        self.stats.record_store();

        let OriginResponse {
            status,
            headers,
            body: mut upstream,
        } = response;
        let headers = filter_headers(&headers);
        let expected_len = content_length(&headers);
        let stored_headers = headers.clone();
        let registry = Arc::clone(&self.registry);
        let mut transfer = self.stats.begin_transfer(path, true, client);

        let body = async_stream::stream! {
            let _claim = claim;
            let mut upload = Some(upload);

            while let Some(chunk) = upstream.next().await {
                let bytes = match chunk {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        tracing::warn!(path = %key.path(), error = %e, "Origin failed mid-transfer, aborted writing cache");
                        metrics::record_store_abort("origin");
                        if let Some(upload) = upload.take() {
                            discard(upload, key.path()).await;
                        }
                        yield Err::<Bytes, std::io::Error>(std::io::Error::other(e));
                        return;
                    }
                };

                if let Some(mut writer) = upload.take() {
                    match writer.write(bytes.clone()).await {
                        Ok(()) => upload = Some(writer),
                        Err(e) => {
                            tracing::warn!(path = %key.path(), error = %e, "Cache write failed, continuing without caching");
                            metrics::record_store_abort("disk");
                            discard(writer, key.path()).await;
                        }
                    }
                }

                transfer.sent(bytes.len());
                yield Ok::<Bytes, std::io::Error>(bytes);
            }

            if let Some(upload) = upload {
                let written = upload.bytes_written();
                if !body_complete(expected_len, written) {
                    tracing::warn!(
                        path = %key.path(),
                        expected = ?expected_len,
                        written,
                        "Origin body length mismatch, discarding cached copy"
                    );
                    metrics::record_store_abort("length");
                    discard(upload, key.path()).await;
                } else {
                    match upload.finish().await {
                        Ok(size) => {
                            registry.mark_available(&key, stored_headers);
                            if purge_pending {
                                registry.clear_purge_pending(&key);
                            }
                            tracing::info!(path = %key.path(), bytes = size, "Cache stored");
                        }
                        Err(e) => {
                            tracing::warn!(path = %key.path(), error = %e, "Failed to commit cache file");
                            metrics::record_store_abort("commit");
                        }
                    }
                }
            }

            transfer.complete();
        };

        Ok(build_response(status, headers, Body::from_stream(body)))
    }
}

/// Whether a stored body may be committed: every byte the origin
/// announced arrived. Without a `Content-Length` any complete body counts.
fn body_complete(expected_len: Option<u64>, written: u64) -> bool {
    expected_len.is_none_or(|len| len == written)
}

async fn discard(upload: Box<dyn StreamingUpload>, path: &str) {
    if let Err(e) = upload.abort().await {
        tracing::warn!(path = %path, error = %e, "Failed to discard partial cache file");
    }
}

fn build_response(status: StatusCode, headers: HeaderMap, body: Body) -> Response {
    let mut response = Response::new(body);
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}
