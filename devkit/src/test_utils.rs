/*!
Test Harness pour le pipeline de dispatch

Facilite l'écriture de tests de bout en bout avec:
- Un `DispatchHandler` réel branché sur le `MockBackend`
- Des expectations sur le nombre de requêtes par route
- Des assertions sur les bodies JSON envoyés à Memfault
*/

use crate::mock_backend::MockBackend;
use anyhow::Result;
use bridge_kernel::api_client::Method;
use bridge_kernel::health::{BridgeHealth, HealthTracker};
use bridge_kernel::{ApiRequest, DispatchHandler, DispatchOutcome, MemfaultConfig, MessageBatch};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

pub const ORGANIZATION: &str = "acme";
pub const PROJECT: &str = "tracker";
pub const AUTH_TOKEN: &str = "test-token";
pub const PROJECT_KEY: &str = "test-project-key";

/// Logging des tests, capturé par le test runner. Idempotent.
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("bridge_kernel=debug,bridge_devkit=info")),
        )
        .with_test_writer()
        .try_init();
}

pub fn test_config() -> MemfaultConfig {
    MemfaultConfig {
        organization: ORGANIZATION.into(),
        project: PROJECT.into(),
        auth_token: AUTH_TOKEN.into(),
        project_key: PROJECT_KEY.into(),
        ..MemfaultConfig::default()
    }
}

#[derive(Debug)]
struct Expectation {
    method: Method,
    path: String,
    expected_count: usize,
}

/// Harness de test complet pour le dispatch
pub struct TestHarness {
    pub backend: Arc<MockBackend>,
    pub dispatcher: DispatchHandler,
    pub health: HealthTracker,
    expectations: Vec<Expectation>,
}

impl TestHarness {
    pub fn new() -> Result<Self> {
        init_test_logging();

        let backend = Arc::new(MockBackend::new());
        let dispatcher = DispatchHandler::from_config(backend.clone(), &test_config())?;
        Ok(Self {
            backend,
            dispatcher,
            health: HealthTracker::new(),
            expectations: Vec::new(),
        })
    }

    pub fn chunks_path(device: &str) -> String {
        format!("/api/v0/chunks/{device}")
    }

    pub fn device_path(device: &str) -> String {
        format!("/api/v0/organizations/{ORGANIZATION}/projects/{PROJECT}/devices/{device}")
    }

    pub fn software_types_path() -> String {
        format!("/api/v0/organizations/{ORGANIZATION}/projects/{PROJECT}/software_types")
    }

    pub fn hardware_versions_path() -> String {
        format!("/api/v0/organizations/{ORGANIZATION}/projects/{PROJECT}/hardware_versions")
    }

    /// Dispatch un batch comme le ferait l'ingress, health tracker compris.
    pub async fn dispatch(&self, batch: &MessageBatch) -> Result<DispatchOutcome> {
        let result = self.dispatcher.dispatch(batch).await;
        self.health.record(&result);
        let outcome = result?;
        info!(?outcome, "🧪 batch dispatched");
        Ok(outcome)
    }

    /// Ajoute une expectation: on s'attend à N requêtes sur une route
    pub fn expect_requests(&mut self, method: Method, path: &str, count: usize) -> &mut Self {
        self.expectations.push(Expectation {
            method,
            path: path.to_string(),
            expected_count: count,
        });
        self
    }

    /// Vérifie toutes les expectations configurées
    pub fn verify_expectations(&self) -> Result<()> {
        for expectation in &self.expectations {
            let actual = self.backend.count(expectation.method.clone(), &expectation.path);
            if actual != expectation.expected_count {
                anyhow::bail!(
                    "Expectation failed for {} {}: expected {} requests, got {}",
                    expectation.method,
                    expectation.path,
                    expectation.expected_count,
                    actual
                );
            }
        }
        info!("✅ {} expectations verified", self.expectations.len());
        Ok(())
    }

    /// Toutes les requêtes reçues, dans l'ordre.
    pub fn sent(&self) -> Vec<ApiRequest> {
        self.backend.requests()
    }

    /// Body JSON de la dernière requête sur une route.
    pub fn last_json_body(&self, method: Method, path: &str) -> Result<Option<Value>> {
        let Some(request) = self.backend.requests_to(method, path).pop() else {
            return Ok(None);
        };
        match request.body {
            Some(payload) => Ok(Some(serde_json::from_slice(payload.as_bytes())?)),
            None => Ok(None),
        }
    }

    /// Assert que la dernière requête de la route porte exactement ce body texte.
    pub fn assert_raw_body(&self, method: Method, path: &str, expected: &str) -> Result<()> {
        let Some(request) = self.backend.requests_to(method.clone(), path).pop() else {
            anyhow::bail!("No request sent to {method} {path}");
        };
        let actual = request.body.as_ref().map(|p| p.as_bytes()).unwrap_or_default();
        if actual != expected.as_bytes() {
            anyhow::bail!(
                "Body mismatch on {method} {path}: expected {expected}, got {}",
                String::from_utf8_lossy(actual)
            );
        }
        Ok(())
    }

    pub fn health(&self) -> BridgeHealth {
        self.health.get_health()
    }

    /// Stats sur les requêtes collectées
    pub fn get_stats(&self) -> TestStats {
        let requests = self.backend.requests();
        let mut route_counts = HashMap::new();
        for request in &requests {
            *route_counts
                .entry(format!("{} {}", request.method, request.path))
                .or_insert(0) += 1;
        }
        TestStats { total_requests: requests.len(), route_counts }
    }

    /// Reset le harness pour un nouveau scénario
    pub fn reset(&mut self) {
        self.backend.clear();
        self.expectations.clear();
    }
}

#[derive(Debug)]
pub struct TestStats {
    pub total_requests: usize,
    pub route_counts: HashMap<String, usize>,
}
