/**
 * MEMFAULT BRIDGE - Point d'entrée du service
 *
 * RÔLE : Charge la config (secrets résolus une seule fois), construit le dispatcher
 * puis démarre les ingress : HTTP toujours, MQTT si configuré.
 */

use anyhow::{Context, Result};
use bridge_kernel::config::load_config;
use bridge_kernel::health::HealthTracker;
use bridge_kernel::http::{build_router, AppState};
use bridge_kernel::{mqtt, DispatchHandler, HttpsTransport};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // Charger les variables d'environnement depuis .env (si présent)
    dotenvy::dotenv().ok();

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("bridge_kernel=info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let cfg = load_config().await.context("failed to load bridge config")?;

    let transport = Arc::new(HttpsTransport::new());
    let dispatcher = Arc::new(
        DispatchHandler::from_config(transport, &cfg.memfault).context("invalid Memfault endpoints")?,
    );
    let health = HealthTracker::new();

    if let Some(mqtt_conf) = cfg.mqtt.clone() {
        mqtt::spawn_mqtt_listener(mqtt_conf, dispatcher.clone(), health.clone());
    }

    let app = build_router(AppState {
        dispatcher,
        health,
        api_key: cfg.http.api_key.clone(),
    });

    let listener = TcpListener::bind(cfg.http.bind.as_str())
        .await
        .with_context(|| format!("failed to bind {}", cfg.http.bind))?;
    info!(
        addr = %cfg.http.bind,
        organization = %cfg.memfault.organization,
        project = %cfg.memfault.project,
        "bridge listening"
    );
    axum::serve(listener, app).await.context("http server failed")?;
    Ok(())
}
