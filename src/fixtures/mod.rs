//! Deterministic fixtures: a scripted transport and record builders.

use crate::api::client::ApiClient;
use crate::api::errors::{ApiError, Result};
use crate::api::transport::{ApiRequest, ApiResponse, Transport};
use crate::config::ApiConfig;
use crate::domain::{Rating, Reply, Review};
use crate::session::headers::HeaderBuilder;
use crate::session::store::{MemorySessionStore, Session};
use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::Notify;

#[derive(Clone)]
struct Scripted {
    status: StatusCode,
    body: String,
    gate: Option<Arc<Notify>>,
}

type RouteKey = (Method, String);

/// In-memory transport answering by (method, path) from queued responses.
///
/// Each route pops its queue in order; the final response repeats. Every
/// request is recorded for assertions.
#[derive(Default)]
pub struct ScriptedTransport {
    routes: Mutex<HashMap<RouteKey, VecDeque<Scripted>>>,
    requests: Mutex<Vec<ApiRequest>>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn respond(&self, method: Method, path: &str, status: u16, body: serde_json::Value) {
        self.push(method, path, status, body.to_string(), None);
    }

    /// Queues a response with an empty body.
    pub fn respond_empty(&self, method: Method, path: &str, status: u16) {
        self.push(method, path, status, String::new(), None);
    }

    /// Queues a response that is held until the returned gate is notified.
    pub fn respond_gated(
        &self,
        method: Method,
        path: &str,
        status: u16,
        body: serde_json::Value,
    ) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.push(method, path, status, body.to_string(), Some(gate.clone()));
        gate
    }

    pub fn requests(&self) -> Vec<ApiRequest> {
        lock(&self.requests).clone()
    }

    pub fn requests_to(&self, method: &Method, path: &str) -> Vec<ApiRequest> {
        lock(&self.requests)
            .iter()
            .filter(|request| request.method == *method && request.path == path)
            .cloned()
            .collect()
    }

    pub fn calls(&self, method: &Method, path: &str) -> usize {
        self.requests_to(method, path).len()
    }

    fn push(&self, method: Method, path: &str, status: u16, body: String, gate: Option<Arc<Notify>>) {
        let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        lock(&self.routes)
            .entry((method, path.to_owned()))
            .or_default()
            .push_back(Scripted { status, body, gate });
    }

    fn next_for(&self, method: &Method, path: &str) -> Option<Scripted> {
        let mut routes = lock(&self.routes);
        let queue = routes.get_mut(&(method.clone(), path.to_owned()))?;
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse> {
        let scripted = self.next_for(&request.method, &request.path);
        let route = format!("{} {}", request.method, request.path);
        lock(&self.requests).push(request);

        let Some(scripted) = scripted else {
            return Err(ApiError::Network(format!("no scripted response for {route}")));
        };
        if let Some(gate) = &scripted.gate {
            gate.notified().await;
        }

        Ok(ApiResponse {
            status: scripted.status,
            body: scripted.body,
        })
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Config used by scripted clients: page size 2 keeps paging tests short.
pub fn scripted_config() -> ApiConfig {
    ApiConfig {
        page_size: 2,
        ..ApiConfig::default()
    }
}

/// Client over `transport` with `session` preloaded in a memory store.
pub fn scripted_client(
    transport: &Arc<ScriptedTransport>,
    session: Session,
) -> (ApiClient, Arc<MemorySessionStore>) {
    let store = Arc::new(MemorySessionStore::new(session));
    let transport: Arc<dyn Transport> = transport.clone();
    let client = ApiClient::with_transport(transport, store.clone(), &scripted_config());
    (client, store)
}

/// Header builder over `transport` with `session` preloaded.
pub fn scripted_session(
    transport: &Arc<ScriptedTransport>,
    session: Session,
) -> (HeaderBuilder, Arc<MemorySessionStore>) {
    let (client, store) = scripted_client(transport, session);
    (HeaderBuilder::new(client.validator().clone()), store)
}

pub fn review(id: u64, author: &str) -> Review {
    Review {
        id,
        prof_id: 1,
        author_username: author.to_owned(),
        module_code: "CS2030".to_owned(),
        module_name: "Programming Methodology II".to_owned(),
        text: format!("review {id}"),
        rating: Rating::new(4.0).expect("4.0 is a valid rating"),
        created_at: "2025-03-01T08:00:00Z".to_owned(),
        likes_count: 0,
        is_liked: false,
        reply_count: 0,
        can_edit: false,
    }
}

pub fn reply(id: u64, review_id: u64, author: &str) -> Reply {
    Reply {
        id,
        review_id,
        author_username: author.to_owned(),
        text: format!("reply {id}"),
        created_at: "2025-03-02T08:00:00Z".to_owned(),
        likes_count: 0,
        is_liked: false,
        can_edit: false,
        addressed_to: None,
    }
}

/// JSON for a review as the server sends it.
pub fn review_json(id: u64, author: &str, reply_count: u32) -> serde_json::Value {
    serde_json::json!({
        "id": id,
        "prof_id": 1,
        "username": author,
        "module_code": "CS2030",
        "module_name": "Programming Methodology II",
        "text": format!("review {id}"),
        "rating": 4.0,
        "created_at": "2025-03-01T08:00:00Z",
        "likes_count": 0,
        "is_liked": false,
        "reply_count": reply_count,
    })
}

/// JSON for a reply as the server sends it.
pub fn reply_json(id: u64, author: &str) -> serde_json::Value {
    serde_json::json!({
        "id": id,
        "username": author,
        "text": format!("reply {id}"),
        "created_at": "2025-03-02T08:00:00Z",
        "likes_count": 0,
        "is_liked": false,
    })
}

/// A `{results, next}` page body.
pub fn page_json(results: Vec<serde_json::Value>, has_next: bool) -> serde_json::Value {
    let next = has_next.then(|| "https://api.example.test/next".to_owned());
    serde_json::json!({ "results": results, "next": next })
}
