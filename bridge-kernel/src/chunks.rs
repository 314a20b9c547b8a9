//! Forwarding of Memfault diagnostic chunks to the chunks ingestion API.

use crate::api_client::{ApiRequest, ApiResponse, ApiTransport, Payload, TransportError, Method};
use crate::config::{ConfigError, Endpoint, MemfaultConfig};
use crate::models::DeviceId;
use std::sync::Arc;
use tracing::debug;

#[derive(Clone)]
pub struct ChunkForwarder {
    transport: Arc<dyn ApiTransport>,
    endpoint: Endpoint,
    project_key: String,
}

impl ChunkForwarder {
    pub fn new(transport: Arc<dyn ApiTransport>, cfg: &MemfaultConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            transport,
            endpoint: cfg.chunks()?,
            project_key: cfg.project_key.clone(),
        })
    }

    /// POST un chunk non vide vers `/api/v0/chunks/{device}`.
    ///
    /// Le caller filtre les chunks vides; la réponse est retournée telle quelle.
    pub async fn forward(&self, device: &DeviceId, chunk: &[u8]) -> Result<ApiResponse, TransportError> {
        debug!(device_id = %device, chunk_len = chunk.len(), "forwarding chunk");
        let request = ApiRequest::new(
            Method::POST,
            self.endpoint.host.clone(),
            self.endpoint.port,
            self.endpoint.path(&format!("/api/v0/chunks/{}", device.path_segment())),
        )
        .header("Content-Type", "application/octet-stream")
        .header("Memfault-Project-Key", self.project_key.clone())
        .body(Payload::Binary(chunk.to_vec()));

        self.transport.send(request).await
    }
}
