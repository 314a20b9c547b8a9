/*!
Backend Memfault simulé pour tester sans réseau

Implémente `ApiTransport` : enregistre chaque requête sortante et répond à partir
de files scriptées par (méthode, chemin). Sans réponse scriptée : 200 et body vide.
*/

use async_trait::async_trait;
use bridge_kernel::api_client::Method;
use bridge_kernel::{ApiRequest, ApiResponse, ApiTransport, TransportError};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use tracing::info;

#[derive(Debug, Clone)]
enum Reply {
    Respond(ApiResponse),
    Fail(String),
}

type RouteKey = (Method, String);

/// Chemin sans query string, utilisé comme clé de route.
fn route_of(path: &str) -> &str {
    path.split_once('?').map(|(route, _)| route).unwrap_or(path)
}

#[derive(Default)]
pub struct MockBackend {
    requests: Mutex<Vec<ApiRequest>>,
    replies: Mutex<HashMap<RouteKey, VecDeque<Reply>>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ajoute une réponse à la file de la route; consommée dans l'ordre d'arrivée.
    pub fn respond(&self, method: Method, path: &str, response: ApiResponse) -> &Self {
        self.replies
            .lock()
            .entry((method, path.to_string()))
            .or_default()
            .push_back(Reply::Respond(response));
        self
    }

    /// Simule une erreur transport (DNS, TLS...) sur le prochain appel de la route.
    pub fn fail(&self, method: Method, path: &str, reason: &str) -> &Self {
        self.replies
            .lock()
            .entry((method, path.to_string()))
            .or_default()
            .push_back(Reply::Fail(reason.to_string()));
        self
    }

    pub fn requests(&self) -> Vec<ApiRequest> {
        self.requests.lock().clone()
    }

    /// Requêtes reçues sur une route (query string ignorée).
    pub fn requests_to(&self, method: Method, path: &str) -> Vec<ApiRequest> {
        self.requests
            .lock()
            .iter()
            .filter(|r| r.method == method && route_of(&r.path) == path)
            .cloned()
            .collect()
    }

    pub fn count(&self, method: Method, path: &str) -> usize {
        self.requests_to(method, path).len()
    }

    /// Nombre de réponses scriptées jamais consommées.
    pub fn pending_replies(&self) -> usize {
        self.replies.lock().values().map(VecDeque::len).sum()
    }

    pub fn clear(&self) {
        self.requests.lock().clear();
        self.replies.lock().clear();
    }
}

#[async_trait]
impl ApiTransport for MockBackend {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, TransportError> {
        let key = (request.method.clone(), route_of(&request.path).to_string());
        info!(method = %request.method, path = %request.path, "📤 [MOCK] request");
        self.requests.lock().push(request);

        let reply = self.replies.lock().get_mut(&key).and_then(VecDeque::pop_front);
        match reply {
            Some(Reply::Respond(response)) => Ok(response),
            Some(Reply::Fail(reason)) => Err(TransportError::Invalid(reason)),
            None => Ok(ApiResponse { status: 200, ..Default::default() }),
        }
    }
}
