//! Auto-provisioning of Memfault hardware versions.
//!
//! A device can only be tagged with a hardware version that exists. Creating one
//! needs a primary software type, taken from the first entry of the project's
//! software type listing.

use crate::api_client::{basic_auth, ApiRequest, ApiResponse, ApiTransport, Payload, TransportError, Method};
use crate::config::{ConfigError, Endpoint, MemfaultConfig};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info};

pub const SOFTWARE_TYPES_PER_PAGE: u32 = 5000;

#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("failed to fetch software_types (status {status}): {source}")]
    InvalidListing {
        status: u16,
        #[source]
        source: serde_json::Error,
    },
    #[error("no software type available to reference from hardware version `{0}`")]
    NoSoftwareType(String),
}

/// Page de `GET .../software_types`; seuls les champs utilisés sont décodés.
#[derive(Debug, Deserialize)]
pub struct SoftwareTypeListing {
    pub data: Vec<SoftwareType>,
}

#[derive(Debug, Deserialize)]
pub struct SoftwareType {
    pub name: String, // ex: 'asset_tracker_v2'
}

#[derive(Debug, Serialize)]
struct NewHardwareVersion<'a> {
    name: &'a str,
    primary_software_type: &'a str,
}

#[derive(Clone)]
pub struct HardwareVersionProvisioner {
    transport: Arc<dyn ApiTransport>,
    endpoint: Endpoint,
    project_path: String,
    authorization: String,
}

impl HardwareVersionProvisioner {
    pub fn new(transport: Arc<dyn ApiTransport>, cfg: &MemfaultConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            transport,
            endpoint: cfg.api()?,
            project_path: format!(
                "/api/v0/organizations/{}/projects/{}",
                cfg.organization, cfg.project
            ),
            authorization: basic_auth(&cfg.auth_token),
        })
    }

    /// Crée le hardware version `hardware_version`, rattaché au premier software type listé.
    pub async fn ensure_hardware_version(
        &self,
        hardware_version: &str,
    ) -> Result<ApiResponse, ProvisionError> {
        let software_type = self.primary_software_type(hardware_version).await?;
        info!(hardware_version, software_type = %software_type, "creating hardware version");

        let payload = serde_json::to_string(&NewHardwareVersion {
            name: hardware_version,
            primary_software_type: &software_type,
        })
        .map_err(|e| TransportError::Invalid(format!("hardware version payload: {e}")))?;

        let request = ApiRequest::new(
            Method::POST,
            self.endpoint.host.clone(),
            self.endpoint.port,
            self.endpoint.path(&format!("{}/hardware_versions", self.project_path)),
        )
        .header("Content-Type", "application/json; charset=utf-8")
        .header("Authorization", self.authorization.clone())
        .body(Payload::Text(payload));

        Ok(self.transport.send(request).await?)
    }

    async fn primary_software_type(&self, hardware_version: &str) -> Result<String, ProvisionError> {
        let request = ApiRequest::new(
            Method::GET,
            self.endpoint.host.clone(),
            self.endpoint.port,
            self.endpoint.path(&format!(
                "{}/software_types?page=1&per_page={}",
                self.project_path, SOFTWARE_TYPES_PER_PAGE
            )),
        )
        .header("Authorization", self.authorization.clone());

        let res = self.transport.send(request).await?;
        let listing: SoftwareTypeListing = serde_json::from_str(&res.body).map_err(|source| {
            error!(status = res.status, "failed to fetch software_types: {source}");
            ProvisionError::InvalidListing { status: res.status, source }
        })?;
        debug!(count = listing.data.len(), "software_types listed");

        listing
            .data
            .into_iter()
            .next()
            .map(|st| st.name)
            .ok_or_else(|| ProvisionError::NoSoftwareType(hardware_version.to_string()))
    }
}
