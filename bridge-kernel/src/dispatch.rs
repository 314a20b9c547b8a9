/**
 * DISPATCH - Routage des batches du hub vers l'API Memfault
 *
 * RÔLE :
 * Point d'entrée unique pour chaque batch livré par le hub. Classe le batch d'après
 * les propriétés du PREMIER message puis appelle le bon composant.
 *
 * FONCTIONNEMENT :
 * - binding property `memfault` présente      → chunks (tous les messages, en parallèle)
 * - `iothub-message-schema` = twinChangeNotification → mise à jour device (premier message seul)
 * - sinon                                       → log + drop
 *
 * RÉCUPÉRATION :
 * Si Memfault répond "HardwareVersion with name `x` not found" (code 1003) au PATCH device,
 * on crée le hardware version puis on renvoie le PATCH une seule fois.
 *
 * ERREURS :
 * Seules les erreurs transport (et l'échec de la récupération) remontent à l'hôte;
 * les réponses non-200 de Memfault sont loggées puis absorbées.
 */

use crate::api_client::{ApiResponse, ApiTransport, TransportError};
use crate::chunks::ChunkForwarder;
use crate::config::{ConfigError, MemfaultConfig};
use crate::device_info::{DeviceInfoUpdater, DeviceUpdatePayload};
use crate::hardware_version::{HardwareVersionProvisioner, ProvisionError};
use crate::models::{
    DeviceId, InboundMessage, MessageBatch, CONNECTION_DEVICE_ID_PROPERTY, DEVICE_ID_PROPERTY,
    MEMFAULT_PROPERTY, MESSAGE_SCHEMA_PROPERTY, TWIN_CHANGE_NOTIFICATION,
};
use crate::twin::TwinUpdate;
use futures::future::join_all;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, LazyLock};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Code d'erreur Memfault pour une ressource référencée inexistante.
pub const UNKNOWN_RESOURCE_ERROR_CODE: i64 = 1003;

static UNKNOWN_HARDWARE_VERSION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"HardwareVersion with name `[^`]+` not found").expect("static regex is valid")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    Chunks,
    Twin,
    Unroutable,
}

/// Résultat d'une invocation, pour les logs, le health tracker et les tests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DispatchOutcome {
    Chunks {
        forwarded: usize,
        skipped_empty: usize,
        rejected: usize,
    },
    DeviceUpdated,
    HardwareVersionProvisioned { hardware_version: String },
    UpdateRejected { status: u16 },
    NothingToUpdate,
    InvalidTwin,
    MissingDeviceId,
    EmptyBatch,
    Unroutable,
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("hardware version provisioning failed: {0}")]
    Provision(#[from] ProvisionError),
    #[error("device {device} update still rejected after provisioning hardware version (status {status})")]
    RetryRejected { device: String, status: u16 },
}

/// Body d'erreur Memfault : `{"error":{"code":1003,"message":"..."}}`.
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: Option<ErrorInfo>,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorInfo {
    #[serde(default)]
    code: Option<i64>,
    #[serde(default)]
    message: Option<String>,
}

/// Classe un batch d'après les binding properties du premier message.
pub fn classify(batch: &MessageBatch) -> Route {
    let Some(first) = batch.first() else {
        return Route::Unroutable;
    };
    if first.properties.contains(MEMFAULT_PROPERTY) {
        return Route::Chunks;
    }
    if first.properties.get_str(MESSAGE_SCHEMA_PROPERTY) == Some(TWIN_CHANGE_NOTIFICATION) {
        return Route::Twin;
    }
    Route::Unroutable
}

/// Vrai si la réponse Memfault signale un hardware version inconnu.
///
/// Un body qui n'est pas du JSON exploitable est une erreur de parsing, pas un signal.
pub fn is_unknown_hardware_version(body: &str) -> Result<bool, serde_json::Error> {
    let parsed: ErrorBody = serde_json::from_str(body)?;
    Ok(parsed
        .error
        .map(|e| {
            e.code == Some(UNKNOWN_RESOURCE_ERROR_CODE)
                && UNKNOWN_HARDWARE_VERSION.is_match(e.message.as_deref().unwrap_or_default())
        })
        .unwrap_or(false))
}

/// Device id du twin : binding `deviceId`, sinon system `iothub-connection-device-id`.
fn twin_device_id(message: &InboundMessage) -> Option<DeviceId> {
    message
        .properties
        .get_str(DEVICE_ID_PROPERTY)
        .and_then(DeviceId::new)
        .or_else(|| connection_device_id(message))
}

fn connection_device_id(message: &InboundMessage) -> Option<DeviceId> {
    message
        .system_properties
        .get_str(CONNECTION_DEVICE_ID_PROPERTY)
        .and_then(DeviceId::new)
}

/// Handler sans état entre invocations : chaque batch est traité indépendamment.
#[derive(Clone)]
pub struct DispatchHandler {
    chunks: ChunkForwarder,
    devices: DeviceInfoUpdater,
    hardware_versions: HardwareVersionProvisioner,
}

impl DispatchHandler {
    pub fn new(
        chunks: ChunkForwarder,
        devices: DeviceInfoUpdater,
        hardware_versions: HardwareVersionProvisioner,
    ) -> Self {
        Self { chunks, devices, hardware_versions }
    }

    /// Construit les trois composants sur un même transport.
    pub fn from_config(
        transport: Arc<dyn ApiTransport>,
        cfg: &MemfaultConfig,
    ) -> Result<Self, ConfigError> {
        Ok(Self::new(
            ChunkForwarder::new(transport.clone(), cfg)?,
            DeviceInfoUpdater::new(transport.clone(), cfg)?,
            HardwareVersionProvisioner::new(transport, cfg)?,
        ))
    }

    #[instrument(skip_all, fields(invocation_id = %Uuid::new_v4(), messages = batch.len()))]
    pub async fn dispatch(&self, batch: &MessageBatch) -> Result<DispatchOutcome, DispatchError> {
        if batch.is_empty() {
            info!("no messages in batch");
            return Ok(DispatchOutcome::EmptyBatch);
        }

        let route = classify(batch);
        debug!(?route, "batch classified");
        match route {
            Route::Chunks => self.publish_chunks(batch).await,
            Route::Twin => self.publish_device_info(batch).await,
            Route::Unroutable => {
                let props = batch.first().map(|m| &m.properties);
                info!(?props, "unmatched request");
                Ok(DispatchOutcome::Unroutable)
            }
        }
    }

    /// Publie chaque chunk non vide du batch; un échec n'annule pas les autres.
    async fn publish_chunks(&self, batch: &MessageBatch) -> Result<DispatchOutcome, DispatchError> {
        let Some(device) = batch.first().and_then(connection_device_id) else {
            error!("device ID not defined");
            return Ok(DispatchOutcome::MissingDeviceId);
        };

        let mut skipped_empty = 0;
        let mut forwards = Vec::with_capacity(batch.len());
        for message in &batch.messages {
            if message.body.is_empty() {
                warn!(device_id = %device, "chunk is empty");
                skipped_empty += 1;
                continue;
            }
            debug!(device_id = %device, chunk_len = message.body.len(), "queueing chunk");
            forwards.push(self.chunks.forward(&device, &message.body));
        }

        let mut forwarded = 0;
        let mut rejected = 0;
        let mut first_error = None;
        for result in join_all(forwards).await {
            match result {
                Ok(res) if res.is_success() => forwarded += 1,
                Ok(res) => {
                    warn!(device_id = %device, status = res.status, body = %res.body, "chunk rejected");
                    rejected += 1;
                }
                Err(e) => {
                    error!(device_id = %device, "chunk forward failed: {e}");
                    first_error.get_or_insert(e);
                }
            }
        }
        if let Some(e) = first_error {
            return Err(e.into());
        }

        info!(device_id = %device, forwarded, skipped_empty, rejected, "chunks published");
        Ok(DispatchOutcome::Chunks { forwarded, skipped_empty, rejected })
    }

    /// Traite le premier message du batch comme notification de changement du twin.
    async fn publish_device_info(&self, batch: &MessageBatch) -> Result<DispatchOutcome, DispatchError> {
        let Some(message) = batch.first() else {
            info!("no update found");
            return Ok(DispatchOutcome::EmptyBatch);
        };
        if batch.len() > 1 {
            debug!(dropped = batch.len() - 1, "only the first twin update of a batch is handled");
        }

        let update = match TwinUpdate::from_slice(&message.body) {
            Ok(update) => update,
            Err(e) => {
                warn!("twin update is not valid JSON: {e}");
                return Ok(DispatchOutcome::InvalidTwin);
            }
        };

        let patch = DeviceUpdatePayload {
            nickname: update.nickname().map(str::to_string),
            hardware_version: update.hardware_version().map(str::to_string),
            ..Default::default()
        };
        if patch.is_empty() {
            info!(?update, "not updating nickname or hardware_version");
            return Ok(DispatchOutcome::NothingToUpdate);
        }

        let Some(device) = twin_device_id(message) else {
            error!("device ID not defined");
            return Ok(DispatchOutcome::MissingDeviceId);
        };

        info!(device_id = %device, nickname = ?patch.nickname, hardware_version = ?patch.hardware_version, "updating device");
        let res = self.devices.update(&device, &patch).await?;
        if res.status == 200 {
            return Ok(DispatchOutcome::DeviceUpdated);
        }

        let Some(hardware_version) = patch.hardware_version.as_deref() else {
            warn!(device_id = %device, status = res.status, body = %res.body, "device update rejected");
            return Ok(DispatchOutcome::UpdateRejected { status: res.status });
        };
        if !self.needs_hardware_version(&res) {
            warn!(device_id = %device, status = res.status, body = %res.body, "device update rejected");
            return Ok(DispatchOutcome::UpdateRejected { status: res.status });
        }

        self.provision_and_retry(&device, hardware_version, &patch).await
    }

    fn needs_hardware_version(&self, res: &ApiResponse) -> bool {
        if !res.is_json() || res.content_length() == 0 {
            return false;
        }
        match is_unknown_hardware_version(&res.body) {
            Ok(signal) => signal,
            Err(e) => {
                debug!(body = %res.body, "failed to parse response body as JSON: {e}");
                false
            }
        }
    }

    async fn provision_and_retry(
        &self,
        device: &DeviceId,
        hardware_version: &str,
        patch: &DeviceUpdatePayload,
    ) -> Result<DispatchOutcome, DispatchError> {
        info!(device_id = %device, hardware_version, "hardware version unknown, provisioning");
        let created = self.hardware_versions.ensure_hardware_version(hardware_version).await?;
        if !created.is_success() {
            warn!(hardware_version, status = created.status, body = %created.body, "hardware version creation rejected");
        }

        let retry = self.devices.update(device, patch).await?;
        if retry.status != 200 {
            error!(device_id = %device, status = retry.status, body = %retry.body, "device update failed after provisioning");
            return Err(DispatchError::RetryRejected {
                device: device.to_string(),
                status: retry.status,
            });
        }

        info!(device_id = %device, hardware_version, "device updated after provisioning");
        Ok(DispatchOutcome::HardwareVersionProvisioned {
            hardware_version: hardware_version.to_string(),
        })
    }
}
