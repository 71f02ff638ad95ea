//! Fixtures shared by unit tests: a scripted HTTP server and recording hooks.

use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;

use crate::hooks::LifecycleHooks;
use crate::http::ApiError;

/// One canned response.
#[derive(Debug, Clone)]
pub struct Reply {
    status: u16,
    body: String,
    delay: Option<Duration>,
    hang: bool,
}

impl Reply {
    pub fn json(status: u16, body: &str) -> Self {
        Self {
            status,
            body: body.to_string(),
            delay: None,
            hang: false,
        }
    }

    /// Never answers; the client has to give up on its own.
    pub fn hang() -> Self {
        Self {
            hang: true,
            ..Self::json(200, "")
        }
    }

    pub fn after(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub query: Option<String>,
    headers: HashMap<String, String>,
    pub body: String,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

struct Rule {
    path: String,
    authorization: Option<String>,
    replies: VecDeque<Reply>,
}

#[derive(Default)]
struct ServerState {
    rules: Vec<Rule>,
    requests: Vec<RecordedRequest>,
}

type SharedState = Arc<Mutex<ServerState>>;

/// HTTP server answering from per-path scripts, in order.
///
/// The last reply of a script repeats forever. Unscripted paths get a 404.
pub struct ScriptedServer {
    url: String,
    state: SharedState,
}

impl ScriptedServer {
    pub async fn start() -> Self {
        let state = SharedState::default();
        let app = Router::new()
            .fallback(handle)
            .with_state(Arc::clone(&state));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { url, state }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn script(&self, path: &str, replies: Vec<Reply>) {
        self.add_rule(path, None, replies);
    }

    /// Like [`script`](Self::script) but only for requests carrying this exact
    /// `Authorization` value.
    pub fn script_for_auth(&self, path: &str, authorization: &str, replies: Vec<Reply>) {
        self.add_rule(path, Some(authorization.to_string()), replies);
    }

    fn add_rule(&self, path: &str, authorization: Option<String>, replies: Vec<Reply>) {
        assert!(!replies.is_empty(), "a script needs at least one reply");
        self.state.lock().unwrap().rules.push(Rule {
            path: path.to_string(),
            authorization,
            replies: replies.into(),
        });
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.lock().unwrap().requests.clone()
    }

    pub fn requests_to(&self, path: &str) -> Vec<RecordedRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.path == path)
            .collect()
    }

    pub fn hits(&self, path: &str) -> usize {
        self.requests_to(path).len()
    }
}

async fn handle(
    State(state): State<SharedState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let recorded = RecordedRequest {
        method: method.to_string(),
        path: uri.path().to_string(),
        query: uri.query().map(str::to_string),
        headers: headers
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    value.to_str().unwrap_or_default().to_string(),
                )
            })
            .collect(),
        body: String::from_utf8_lossy(&body).into_owned(),
    };

    let reply = {
        let mut state = state.lock().unwrap();
        state.requests.push(recorded.clone());
        let authorization = recorded.header("authorization");
        state
            .rules
            .iter_mut()
            .find(|rule| {
                rule.path == recorded.path
                    && rule
                        .authorization
                        .as_deref()
                        .is_none_or(|expected| Some(expected) == authorization)
            })
            .and_then(|rule| {
                if rule.replies.len() > 1 {
                    rule.replies.pop_front()
                } else {
                    rule.replies.front().cloned()
                }
            })
    };

    let Some(reply) = reply else {
        return (StatusCode::NOT_FOUND, "no scripted reply").into_response();
    };

    if reply.hang {
        std::future::pending::<()>().await;
    }
    if let Some(delay) = reply.delay {
        tokio::time::sleep(delay).await;
    }

    (
        StatusCode::from_u16(reply.status).unwrap(),
        [(header::CONTENT_TYPE, "application/json")],
        reply.body,
    )
        .into_response()
}

/// Counts lifecycle callbacks.
#[derive(Default)]
pub struct RecordingHooks {
    unauthorized: AtomicUsize,
    errors: Mutex<Vec<ApiError>>,
}

impl RecordingHooks {
    pub fn unauthorized_count(&self) -> usize {
        self.unauthorized.load(Ordering::SeqCst)
    }

    pub fn error_count(&self) -> usize {
        self.errors.lock().unwrap().len()
    }

    pub fn errors(&self) -> Vec<ApiError> {
        self.errors.lock().unwrap().clone()
    }
}

impl LifecycleHooks for RecordingHooks {
    fn on_unauthorized(&self) {
        self.unauthorized.fetch_add(1, Ordering::SeqCst);
    }

    fn on_error(&self, error: &ApiError) {
        self.errors.lock().unwrap().push(error.clone());
    }
}
