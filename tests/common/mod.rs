#![allow(dead_code)]

use async_trait::async_trait;
use reqwest::Method;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;

use staffdesk::api::model::{ApiRequest, ApiResponse};
use staffdesk::api::Transport;
use staffdesk::session::MemoryTokenStore;
use staffdesk::{ApiClient, ApiError, AuthSession};

#[derive(Debug, Clone)]
pub enum Scripted {
    Reply(u16, Value),
    /// No response at all.
    Fail(String),
}

/// Transport double answering from per-route queues. The last response queued
/// for a route repeats; unscripted routes answer `404`.
#[derive(Clone, Default)]
pub struct ScriptedTransport {
    routes: Arc<Mutex<HashMap<(String, String), VecDeque<Scripted>>>>,
    calls: Arc<Mutex<Vec<ApiRequest>>>,
}

impl ScriptedTransport {
    pub async fn reply(&self, method: Method, path: &str, status: u16, body: Value) {
        self.push(method, path, Scripted::Reply(status, body)).await;
    }

    pub async fn fail(&self, method: Method, path: &str, message: &str) {
        self.push(method, path, Scripted::Fail(message.to_string()))
            .await;
    }

    /// Drop anything still queued for the route and answer with this from now on.
    pub async fn replace(&self, method: Method, path: &str, status: u16, body: Value) {
        let mut routes = self.routes.lock().await;
        let queue = routes
            .entry((method.to_string(), path.to_string()))
            .or_default();
        queue.clear();
        queue.push_back(Scripted::Reply(status, body));
    }

    async fn push(&self, method: Method, path: &str, scripted: Scripted) {
        self.routes
            .lock()
            .await
            .entry((method.to_string(), path.to_string()))
            .or_default()
            .push_back(scripted);
    }

    pub async fn calls(&self) -> Vec<ApiRequest> {
        self.calls.lock().await.clone()
    }

    pub async fn count(&self, method: Method, path: &str) -> usize {
        self.calls
            .lock()
            .await
            .iter()
            .filter(|c| c.method == method && c.path == path)
            .count()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
        let key = (request.method.to_string(), request.path.clone());
        self.calls.lock().await.push(request);
        let next = {
            let mut routes = self.routes.lock().await;
            match routes.get_mut(&key) {
                Some(queue) if queue.len() > 1 => queue.pop_front(),
                Some(queue) => queue.front().cloned(),
                None => None,
            }
        };
        match next {
            Some(Scripted::Reply(status, body)) => Ok(ApiResponse::new(status, body)),
            Some(Scripted::Fail(message)) => Err(ApiError::Transport(message)),
            None => Ok(ApiResponse::new(
                404,
                serde_json::json!({ "detail": "Not found." }),
            )),
        }
    }
}

pub fn signed_in_session() -> AuthSession {
    AuthSession::new(Arc::new(MemoryTokenStore::with_token("test-token")))
}

pub fn client(transport: &ScriptedTransport) -> ApiClient {
    client_with(transport, signed_in_session())
}

pub fn client_with(transport: &ScriptedTransport, session: AuthSession) -> ApiClient {
    ApiClient::new(Arc::new(transport.clone()), session, "ru")
}
