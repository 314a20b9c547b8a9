/**
 * INGRESS HTTP - Réception des batches du hub via REST
 *
 * RÔLE :
 * L'hôte (function app, relais Event Hub...) poste chaque batch du hub sur `/ingest`
 * sous forme d'enveloppe JSON; le batch est passé tel quel au dispatcher.
 *
 * ROUTES :
 * - GET  /health         : liveness, toujours accessible
 * - GET  /system/health  : compteurs du bridge
 * - POST /ingest         : enveloppe batch → dispatcher (202 + outcome)
 *
 * SÉCURITÉ :
 * - Header x-api-key obligatoire sur toutes routes sauf /health
 * - Sans clé configurée (BRIDGE_API_KEY), l'accès est refusé
 */

use crate::dispatch::{DispatchError, DispatchHandler, DispatchOutcome};
use crate::health::{BridgeHealth, HealthTracker};
use crate::models::{BatchEnvelope, EnvelopeError};
use axum::body::Bytes;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use std::sync::Arc;
use tracing::{error, warn};

#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<DispatchHandler>,
    pub health: HealthTracker,
    pub api_key: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum IngressError {
    #[error(transparent)]
    Envelope(#[from] EnvelopeError),
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

impl IntoResponse for IngressError {
    fn into_response(self) -> Response {
        let status = match &self {
            IngressError::Envelope(_) => StatusCode::BAD_REQUEST,
            IngressError::Dispatch(_) => StatusCode::BAD_GATEWAY,
        };
        (status, Json(serde_json::json!({ "ok": false, "error": self.to_string() }))).into_response()
    }
}

async fn require_api_key(State(app): State<AppState>, req: Request, next: Next) -> Result<Response, StatusCode> {
    // Health check toujours accessible
    if req.uri().path() == "/health" {
        return Ok(next.run(req).await);
    }

    let Some(expected) = app.api_key.as_deref().filter(|k| !k.is_empty()) else {
        error!("SECURITY: BRIDGE_API_KEY not set - API access denied");
        return Err(StatusCode::UNAUTHORIZED);
    };

    let ok = req
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .map(|v| v == expected)
        .unwrap_or(false);

    if !ok {
        warn!(path = %req.uri().path(), "unauthorized request");
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(next.run(req).await)
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/system/health", get(get_system_health))
        .route("/ingest", post(ingest))
        .layer(middleware::from_fn_with_state(app_state.clone(), require_api_key))
        .with_state(app_state)
}

// GET /system/health
async fn get_system_health(State(app): State<AppState>) -> Json<BridgeHealth> {
    Json(app.health.get_health())
}

// POST /ingest (une invocation du dispatcher par batch)
async fn ingest(
    State(app): State<AppState>,
    body: Bytes,
) -> Result<(StatusCode, Json<DispatchOutcome>), IngressError> {
    let batch = BatchEnvelope::from_slice(&body)?.into_batch()?;
    let result = app.dispatcher.dispatch(&batch).await;
    app.health.record(&result);
    Ok((StatusCode::ACCEPTED, Json(result?)))
}
