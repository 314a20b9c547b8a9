//! Ingress MQTT optionnel : chaque publish sur le topic configuré est une enveloppe batch.

use crate::config::MqttConf;
use crate::dispatch::{DispatchError, DispatchHandler, DispatchOutcome};
use crate::health::HealthTracker;
use crate::models::{BatchEnvelope, EnvelopeError};
use rumqttc::{AsyncClient, Event, EventLoop, Incoming, MqttOptions, QoS};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{self, JoinHandle};
use tracing::{debug, error, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum MqttIngressError {
    #[error(transparent)]
    Envelope(#[from] EnvelopeError),
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

pub fn create_mqtt_client(conf: &MqttConf) -> (AsyncClient, EventLoop) {
    let mut opts = MqttOptions::new(&conf.client_id, &conf.host, conf.port);
    opts.set_keep_alive(Duration::from_secs(15));
    opts.set_clean_session(true);
    AsyncClient::new(opts, 10)
}

/// Décode un publish et le passe au dispatcher.
pub async fn handle_publish(
    dispatcher: &DispatchHandler,
    health: &HealthTracker,
    payload: &[u8],
) -> Result<DispatchOutcome, MqttIngressError> {
    let batch = BatchEnvelope::from_slice(payload)?.into_batch()?;
    let result = dispatcher.dispatch(&batch).await;
    health.record(&result);
    Ok(result?)
}

pub fn spawn_mqtt_listener(
    conf: MqttConf,
    dispatcher: Arc<DispatchHandler>,
    health: HealthTracker,
) -> JoinHandle<()> {
    task::spawn(async move {
        let (client, mut eventloop) = create_mqtt_client(&conf);
        health.mark_mqtt_connecting();
        info!(host = %conf.host, port = conf.port, topic = %conf.topic, "mqtt ingress starting");

        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    // clean session : on se réabonne à chaque (re)connexion
                    if let Err(e) = client.try_subscribe(conf.topic.as_str(), QoS::AtLeastOnce) {
                        error!("subscribe MQTT failed: {e:?}");
                    } else {
                        health.mark_mqtt_connected();
                    }
                }
                Ok(Event::Incoming(Incoming::Publish(p))) if p.topic == conf.topic => {
                    debug!(bytes = p.payload.len(), "batch received");
                    let dispatcher = dispatcher.clone();
                    let health = health.clone();
                    // une invocation par batch, sans bloquer la boucle MQTT
                    task::spawn(async move {
                        match handle_publish(&dispatcher, &health, &p.payload).await {
                            Ok(outcome) => debug!(?outcome, "batch dispatched"),
                            Err(MqttIngressError::Envelope(e)) => warn!("invalid batch envelope: {e}"),
                            Err(e) => error!("batch dispatch failed: {e}"),
                        }
                    });
                }
                Ok(_) => {}
                Err(e) => {
                    error!("MQTT erreur: {e:?}");
                    health.increment_reconnects();
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
            }
        }
    })
}
