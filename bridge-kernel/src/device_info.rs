//! Partial device metadata updates (`PATCH .../devices/{device}`).

use crate::api_client::{basic_auth, ApiRequest, ApiResponse, ApiTransport, Payload, TransportError, Method};
use crate::config::{ConfigError, Endpoint, MemfaultConfig};
use crate::models::DeviceId;
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

/// Champs device acceptés par Memfault; seuls les champs présents sont envoyés.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeviceUpdatePayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nickname: Option<String>, // ex: "INTERNAL-1234"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hardware_version: Option<String>, // ex: "evt"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cohort: Option<String>, // ex: "internal"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>, // ex: "Kitchen Smart Sink"
}

impl DeviceUpdatePayload {
    pub fn is_empty(&self) -> bool {
        self.nickname.is_none()
            && self.hardware_version.is_none()
            && self.cohort.is_none()
            && self.description.is_none()
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[derive(Clone)]
pub struct DeviceInfoUpdater {
    transport: Arc<dyn ApiTransport>,
    endpoint: Endpoint,
    organization: String,
    project: String,
    authorization: String,
}

impl DeviceInfoUpdater {
    pub fn new(transport: Arc<dyn ApiTransport>, cfg: &MemfaultConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            transport,
            endpoint: cfg.api()?,
            organization: cfg.organization.clone(),
            project: cfg.project.clone(),
            authorization: basic_auth(&cfg.auth_token),
        })
    }

    pub async fn update(
        &self,
        device: &DeviceId,
        patch: &DeviceUpdatePayload,
    ) -> Result<ApiResponse, TransportError> {
        let payload = patch
            .to_json()
            .map_err(|e| TransportError::Invalid(format!("device patch: {e}")))?;
        debug!(device_id = %device, payload = %payload, "updating device info");

        let request = ApiRequest::new(
            Method::PATCH,
            self.endpoint.host.clone(),
            self.endpoint.port,
            self.endpoint.path(&format!(
                "/api/v0/organizations/{}/projects/{}/devices/{}",
                self.organization,
                self.project,
                device.path_segment()
            )),
        )
        .header("Content-Type", "application/json; charset=utf-8")
        .header("Authorization", self.authorization.clone())
        .body(Payload::Text(payload));

        self.transport.send(request).await
    }
}
