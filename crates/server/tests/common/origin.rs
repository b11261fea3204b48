//! A real HTTP origin for the gateway to talk to.

use axum::Router;
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{HeaderValue, Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::Semaphore;

struct OriginState {
    objects: Mutex<HashMap<String, Bytes>>,
    gated: Mutex<HashSet<String>>,
    gate: Arc<Semaphore>,
    gets: AtomicUsize,
    heads: AtomicUsize,
    queries: Mutex<Vec<Option<String>>>,
}

/// Origin bound to an ephemeral localhost port.
///
/// Serves GET and HEAD for the objects it holds, 404 for everything else.
/// Responses carry `Server` and `Accept-Ranges` so filtering is visible.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub struct TestOrigin {
    pub url: String,
    state: Arc<OriginState>,
    _handle: tokio::task::JoinHandle<()>,
}

#[allow(dead_code)]
impl TestOrigin {
    pub async fn start() -> Self {
        let state = Arc::new(OriginState {
            objects: Mutex::new(HashMap::new()),
            gated: Mutex::new(HashSet::new()),
            gate: Arc::new(Semaphore::new(0)),
            gets: AtomicUsize::new(0),
            heads: AtomicUsize::new(0),
            queries: Mutex::new(Vec::new()),
        });
        let app = Router::new()
            .fallback(serve_object)
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind test origin");
        let addr = listener.local_addr().expect("Failed to read origin address");
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.expect("test origin failed");
        });

        Self {
            url: format!("http://{addr}"),
            state,
            _handle: handle,
        }
    }

    pub fn put(&self, path: &str, data: impl Into<Bytes>) {
        self.state
            .objects
            .lock()
            .unwrap()
            .insert(path.to_string(), data.into());
    }

    /// Hold GET bodies for `path` after their first four bytes until
    /// [`TestOrigin::release`] hands out a permit.
    pub fn gate(&self, path: &str) {
        self.state.gated.lock().unwrap().insert(path.to_string());
    }

    pub fn release(&self, responses: usize) {
        self.state.gate.add_permits(responses);
    }

    pub fn gets(&self) -> usize {
        self.state.gets.load(Ordering::SeqCst)
    }

    pub fn heads(&self) -> usize {
        self.state.heads.load(Ordering::SeqCst)
    }

    /// Query strings of every GET and HEAD, in arrival order.
    pub fn queries(&self) -> Vec<Option<String>> {
        self.state.queries.lock().unwrap().clone()
    }
}

async fn serve_object(State(state): State<Arc<OriginState>>, req: Request) -> Response {
    let path = req.uri().path().to_string();
    state
        .queries
        .lock()
        .unwrap()
        .push(req.uri().query().map(str::to_string));

    if req.method() == Method::HEAD {
        state.heads.fetch_add(1, Ordering::SeqCst);
    } else {
        state.gets.fetch_add(1, Ordering::SeqCst);
    }

    let Some(data) = state.objects.lock().unwrap().get(&path).cloned() else {
        return (StatusCode::NOT_FOUND, "no such object").into_response();
    };

    let gated = req.method() == Method::GET && state.gated.lock().unwrap().contains(&path);
    let body = if gated {
        let gate = Arc::clone(&state.gate);
        let split = data.len().min(4);
        let (head, tail) = (data.slice(..split), data.slice(split..));
        Body::from_stream(async_stream::stream! {
            yield Ok::<Bytes, std::io::Error>(head);
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
            yield Ok(tail);
        })
    } else {
        Body::from(data.clone())
    };

    let mut response = Response::new(body);
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(data.len()));
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("image/png"));
    headers.insert(header::SERVER, HeaderValue::from_static("TestOrigin"));
    headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    response
}

/// Origin that promises `Content-Length: declared` on every response,
/// sends only `body`, then closes the connection.
#[allow(dead_code)]
pub async fn start_truncating_origin(declared: usize, body: &'static [u8]) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind truncating origin");
    let addr = listener.local_addr().expect("Failed to read origin address");

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut request = Vec::new();
                let mut buf = [0u8; 1024];
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => request.extend_from_slice(&buf[..n]),
                    }
                }
                let head = format!(
                    "HTTP/1.1 200 OK\r\nContent-Length: {declared}\r\nContent-Type: image/png\r\n\r\n"
                );
                let _ = socket.write_all(head.as_bytes()).await;
                let _ = socket.write_all(body).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    format!("http://{addr}")
}
