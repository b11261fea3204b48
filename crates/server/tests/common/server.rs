//! Server test utilities.

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{HeaderMap, Method, Request, StatusCode};
use bytes::Bytes;
use larder_core::config::AppConfig;
use larder_server::{AppState, create_router};
use larder_signer::UrlSigner;
use larder_storage::{FilesystemBackend, ObjectStore};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

/// Address used for requests that should pass the admin allow-list.
#[allow(dead_code)]
pub const ADMIN_CLIENT: &str = "127.0.0.1:40000";

/// Address outside the default allow-list.
#[allow(dead_code)]
pub const OUTSIDE_CLIENT: &str = "10.9.8.7:40000";

/// A test server wrapper with all dependencies.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub struct TestServer {
    pub router: axum::Router,
    pub state: AppState,
    storage_path: PathBuf,
    _temp_dir: TempDir,
}

/// A fully buffered response.
#[allow(dead_code)]
pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

#[allow(dead_code)]
impl TestResponse {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

#[allow(dead_code)]
impl TestServer {
    /// Create a new test server with temporary storage in front of `origin_url`.
    pub async fn new(origin_url: &str) -> Self {
        Self::build(origin_url, None, |store| store).await
    }

    /// Same as [`TestServer::new`], with signed-URL mode enabled.
    pub async fn with_signer(origin_url: &str, signer: UrlSigner) -> Self {
        Self::build(origin_url, Some(signer), |store| store).await
    }

    /// Same as [`TestServer::new`], with the filesystem store passed
    /// through `wrap` before the server sees it.
    pub async fn with_store(
        origin_url: &str,
        wrap: impl FnOnce(Arc<dyn ObjectStore>) -> Arc<dyn ObjectStore>,
    ) -> Self {
        Self::build(origin_url, None, wrap).await
    }

    async fn build(
        origin_url: &str,
        signer: Option<UrlSigner>,
        wrap: impl FnOnce(Arc<dyn ObjectStore>) -> Arc<dyn ObjectStore>,
    ) -> Self {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
        let storage_path = temp_dir.path().join("cache");
        let storage: Arc<dyn ObjectStore> = Arc::new(
            FilesystemBackend::new(&storage_path)
                .await
                .expect("Failed to create storage backend"),
        );
        let storage = wrap(storage);

        let mut config = AppConfig::for_testing();
        config.origin.base_url = origin_url.to_string();
        config.storage.path = storage_path.clone();

        let state = AppState::new(config, storage, signer).expect("Failed to build state");
        let router = create_router(state.clone());

        Self {
            router,
            state,
            storage_path,
            _temp_dir: temp_dir,
        }
    }

    /// Location of the cache directory.
    pub fn storage_path(&self) -> &PathBuf {
        &self.storage_path
    }

    /// Send a request from `client` and return the response unbuffered.
    pub async fn send(&self, method: Method, uri: &str, client: &str) -> axum::response::Response {
        let addr: SocketAddr = client.parse().expect("invalid client address");
        let mut request = Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap();
        request.extensions_mut().insert(ConnectInfo(addr));
        self.router.clone().oneshot(request).await.unwrap()
    }

    /// Send a request from `client` and buffer the whole body.
    pub async fn request(&self, method: Method, uri: &str, client: &str) -> TestResponse {
        collect(self.send(method, uri, client).await).await
    }

    pub async fn get(&self, uri: &str) -> TestResponse {
        self.request(Method::GET, uri, ADMIN_CLIENT).await
    }
}

/// Buffer a streaming response.
#[allow(dead_code)]
pub async fn collect(response: axum::response::Response) -> TestResponse {
    let status = response.status();
    let headers = response.headers().clone();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    TestResponse {
        status,
        headers,
        body,
    }
}
