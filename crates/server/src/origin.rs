//! Origin content store client.

use crate::metrics;
use axum::http::{HeaderMap, HeaderName, StatusCode, header};
use bytes::Bytes;
use futures::Stream;
use larder_core::config::OriginConfig;
use larder_signer::{SignerError, UrlSigner};
use std::pin::Pin;
use std::sync::Arc;

/// Headers never replayed to clients nor stored as cached metadata.
///
/// Identity headers of the origin plus the hop-by-hop set, which only
/// describes the origin connection.
const FILTERED_HEADERS: [HeaderName; 10] = [
    header::ACCEPT_RANGES,
    header::SERVER,
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

#[derive(Debug, thiserror::Error)]
pub enum OriginError {
    #[error("origin unavailable: {0}")]
    Unavailable(#[source] reqwest::Error),

    #[error("origin rejected request with status {0}")]
    Rejected(StatusCode),

    #[error("invalid origin URL: {0}")]
    InvalidUrl(String),

    #[error("failed to sign origin request: {0}")]
    Signing(#[from] SignerError),

    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

/// Body of an origin response, read lazily with backpressure.
pub type OriginBody = Pin<Box<dyn Stream<Item = Result<Bytes, reqwest::Error>> + Send>>;

pub struct OriginResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: OriginBody,
}

impl std::fmt::Debug for OriginResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OriginResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

pub struct OriginGateway {
    client: reqwest::Client,
    base_url: String,
    signer: Option<Arc<UrlSigner>>,
}

impl OriginGateway {
    pub fn new(config: &OriginConfig, signer: Option<Arc<UrlSigner>>) -> Result<Self, OriginError> {
        config.validate().map_err(OriginError::InvalidUrl)?;
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .connect_timeout(config.connect_timeout())
            .build()
            .map_err(OriginError::Client)?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            signer,
        })
    }

    pub fn signer(&self) -> Option<&Arc<UrlSigner>> {
        self.signer.as_ref()
    }

    fn url_for(&self, path_and_query: &str) -> Result<reqwest::Url, OriginError> {
        let raw = format!("{}{}", self.base_url, path_and_query);
        reqwest::Url::parse(&raw).map_err(|e| OriginError::InvalidUrl(format!("{raw}: {e}")))
    }

    /// Signed location for `path`, or `None` when signing does not apply.
    ///
    /// Paths that do not split into a bucket and an object name go out
    /// unsigned. Any other signing failure fails the request.
    fn signed_path(&self, method: &str, path: &str) -> Result<Option<String>, OriginError> {
        let Some(signer) = &self.signer else {
            return Ok(None);
        };
        match signer.sign_path(method, path) {
            Ok(signed) => Ok(Some(signed)),
            Err(SignerError::InvalidPath(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// GET `path` from the origin.
    ///
    /// The client's query string is forwarded untouched. Without one, and
    /// with a signer configured, the request is signed here instead.
    pub async fn fetch(&self, path: &str, query: Option<&str>) -> Result<OriginResponse, OriginError> {
        let target = match query {
            Some(q) => format!("{path}?{q}"),
            None => self
                .signed_path("GET", path)?
                .unwrap_or_else(|| path.to_string()),
        };
        let url = self.url_for(&target)?;

        tracing::debug!(path = %path, "Remote GET");
        let response = self.client.get(url).send().await.map_err(|e| {
            metrics::record_origin_error("GET", "transport");
            OriginError::Unavailable(e)
        })?;

        Ok(OriginResponse {
            status: response.status(),
            headers: response.headers().clone(),
            body: Box::pin(response.bytes_stream()),
        })
    }

    /// HEAD `path` and return the filtered headers.
    ///
    /// Any status other than 200 is a rejection.
    pub async fn probe(&self, path: &str) -> Result<HeaderMap, OriginError> {
        let target = self
            .signed_path("HEAD", path)?
            .unwrap_or_else(|| path.to_string());
        let url = self.url_for(&target)?;

        tracing::debug!(path = %path, "Remote HEAD");
        let response = self.client.head(url).send().await.map_err(|e| {
            metrics::record_origin_error("HEAD", "transport");
            OriginError::Unavailable(e)
        })?;

        let status = response.status();
        if status != StatusCode::OK {
            metrics::record_origin_error("HEAD", "status");
            return Err(OriginError::Rejected(status));
        }

        Ok(filter_headers(response.headers()))
    }
}

/// Copy `headers` without the filtered set, or anything the origin
/// listed in its own `Connection` header.
pub fn filter_headers(headers: &HeaderMap) -> HeaderMap {
    let connection_listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    let mut filtered = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        if FILTERED_HEADERS.contains(name) || connection_listed.contains(name) {
            continue;
        }
        filtered.append(name.clone(), value.clone());
    }
    filtered
}
