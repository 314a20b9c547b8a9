//! Configuration du bridge : fichier YAML + surcharges par variables d'environnement.
//!
//! Les secrets (auth token, project key) sont résolus une seule fois au démarrage
//! puis injectés dans chaque composant via `MemfaultConfig`.

use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs;
use tracing::{info, warn};

pub const DEFAULT_API_ENDPOINT: &str = "https://api.memfault.com";
pub const DEFAULT_CHUNKS_ENDPOINT: &str = "https://chunks.memfault.com";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("missing required setting: {0}")]
    Missing(&'static str),
    #[error("invalid endpoint {url}: {reason}")]
    InvalidEndpoint { url: String, reason: String },
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct BridgeConfig {
    pub memfault: MemfaultConfig,
    pub http: HttpConf,
    pub mqtt: Option<MqttConf>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct MemfaultConfig {
    pub api_endpoint: String,
    pub chunks_endpoint: String,
    pub organization: String,
    pub project: String,
    #[serde(skip_serializing)] // jamais écrit sur disque
    pub auth_token: String,
    #[serde(skip_serializing)]
    pub project_key: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct HttpConf {
    pub bind: String,
    pub api_key: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MqttConf {
    pub host: String,
    pub port: u16,
    #[serde(default = "default_client_id")]
    pub client_id: String,
    #[serde(default = "default_topic")]
    pub topic: String,
}

fn default_client_id() -> String {
    "memfault-bridge".into()
}

fn default_topic() -> String {
    "bridge/batches@v1".into()
}

impl Default for MemfaultConfig {
    fn default() -> Self {
        Self {
            api_endpoint: DEFAULT_API_ENDPOINT.into(),
            chunks_endpoint: DEFAULT_CHUNKS_ENDPOINT.into(),
            organization: String::new(),
            project: String::new(),
            auth_token: String::new(),
            project_key: String::new(),
        }
    }
}

impl Default for HttpConf {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".into(),
            api_key: None,
        }
    }
}

/// Host, port et préfixe de chemin d'un endpoint Memfault.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub base_path: String,
}

impl Endpoint {
    /// Parse une URL `https://host[:port][/base]`; les `/` finaux du chemin sont retirés.
    pub fn parse(url: &str) -> Result<Self, ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidEndpoint {
            url: url.to_string(),
            reason: reason.to_string(),
        };
        let parsed = Url::parse(url).map_err(|e| invalid(&e.to_string()))?;
        if parsed.scheme() != "https" {
            return Err(invalid("scheme must be https"));
        }
        let host = parsed.host_str().ok_or_else(|| invalid("no host"))?.to_string();
        let port = parsed.port().unwrap_or(443);
        let base_path = parsed.path().trim_end_matches('/').to_string();
        Ok(Self { host, port, base_path })
    }

    pub fn path(&self, suffix: &str) -> String {
        format!("{}{}", self.base_path, suffix)
    }
}

impl MemfaultConfig {
    /// Applique les surcharges d'environnement (noms des secrets du key vault d'origine).
    pub fn apply_env(&mut self) {
        apply_env_var(&mut self.project_key, "MEMFAULT_PROJECT_KEY");
        apply_env_var(&mut self.organization, "MEMFAULT_ORGANIZATION");
        apply_env_var(&mut self.project, "MEMFAULT_PROJECT");
        apply_env_var(&mut self.auth_token, "MEMFAULT_AUTH_TOKEN");
        apply_env_var(&mut self.api_endpoint, "MEMFAULT_API_ENDPOINT");
        apply_env_var(&mut self.chunks_endpoint, "MEMFAULT_CHUNKS_ENDPOINT");
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.organization.is_empty() {
            return Err(ConfigError::Missing("memfault.organization"));
        }
        if self.project.is_empty() {
            return Err(ConfigError::Missing("memfault.project"));
        }
        if self.auth_token.is_empty() {
            return Err(ConfigError::Missing("memfault.auth_token"));
        }
        if self.project_key.is_empty() {
            return Err(ConfigError::Missing("memfault.project_key"));
        }
        self.api()?;
        self.chunks()?;
        Ok(())
    }

    pub fn api(&self) -> Result<Endpoint, ConfigError> {
        Endpoint::parse(&self.api_endpoint)
    }

    pub fn chunks(&self) -> Result<Endpoint, ConfigError> {
        Endpoint::parse(&self.chunks_endpoint)
    }
}

fn apply_env_var(target: &mut String, name: &str) {
    if let Ok(value) = std::env::var(name) {
        if !value.trim().is_empty() {
            *target = value;
        }
    }
}

/// Charge la config depuis `BRIDGE_CONFIG` (défaut `bridge.yaml`), puis l'environnement.
pub async fn load_config() -> Result<BridgeConfig, ConfigError> {
    let path = std::env::var("BRIDGE_CONFIG").unwrap_or_else(|_| "bridge.yaml".into());
    let mut cfg = load_config_from(&path).await?;
    cfg.memfault.apply_env();
    if let Ok(key) = std::env::var("BRIDGE_API_KEY") {
        cfg.http.api_key = Some(key);
    }
    cfg.memfault.validate()?;
    Ok(cfg)
}

pub async fn load_config_from(path: &str) -> Result<BridgeConfig, ConfigError> {
    if !Path::new(path).exists() {
        warn!(path, "no config file, using defaults");
        return Ok(BridgeConfig::default());
    }
    let txt = fs::read_to_string(path).await.map_err(|source| ConfigError::Read {
        path: path.to_string(),
        source,
    })?;
    if txt.trim().is_empty() {
        return Ok(BridgeConfig::default());
    }
    let cfg: BridgeConfig = serde_yaml::from_str(&txt)?;
    info!(path, "config loaded");
    Ok(cfg)
}
