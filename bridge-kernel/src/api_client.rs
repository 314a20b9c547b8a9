/**
 * API CLIENT - Primitive requête/réponse vers l'API Memfault
 *
 * RÔLE :
 * Une requête HTTPS = une réponse entièrement bufferisée (status + headers + body texte).
 * Aucune relance, aucun parsing du body, un status non-2xx n'est PAS une erreur ici :
 * c'est à l'appelant d'interpréter la réponse.
 *
 * FONCTIONNEMENT :
 * - `ApiTransport` = seam async injectée dans chaque composant (chunks, devices, hardware versions)
 * - `HttpsTransport` = implémentation reqwest/rustls utilisée en production
 * - Seules les erreurs transport (DNS, connexion, TLS) remontent via `TransportError`
 */

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::collections::HashMap;
use tracing::debug;

pub use reqwest::Method;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("request to {host}{path} failed: {source}")]
    Request {
        host: String,
        path: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("invalid request: {0}")]
    Invalid(String),
}

/// Corps d'une requête sortante : JSON texte ou octets bruts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Text(String),
    Binary(Vec<u8>),
}

impl Payload {
    pub fn len(&self) -> usize {
        match self {
            Payload::Text(s) => s.len(),
            Payload::Binary(b) => b.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Payload::Text(s) => s.as_bytes(),
            Payload::Binary(b) => b,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub host: String,
    pub port: u16,
    /// Chemin complet, query string incluse.
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Payload>,
}

impl ApiRequest {
    pub fn new(method: Method, host: impl Into<String>, port: u16, path: impl Into<String>) -> Self {
        Self {
            method,
            host: host.into(),
            port,
            path: path.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Ajoute le body et le `Content-Length` correspondant.
    pub fn body(mut self, payload: Payload) -> Self {
        self.headers.push(("Content-Length".into(), payload.len().to_string()));
        self.body = Some(payload);
        self
    }

    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .rev()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone, Default)]
pub struct ApiResponse {
    pub status: u16,
    /// Noms de headers en minuscules.
    pub headers: HashMap<String, String>,
    pub body: String,
}

impl ApiResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_json(&self) -> bool {
        self.header("content-type")
            .map(|ct| ct.contains("application/json"))
            .unwrap_or(false)
    }

    /// `Content-Length` annoncé par le serveur, 0 si absent ou illisible.
    pub fn content_length(&self) -> u64 {
        self.header("content-length")
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(0)
    }
}

/// Seam réseau partagée par tous les appels sortants.
#[async_trait]
pub trait ApiTransport: Send + Sync {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, TransportError>;
}

/// Transport de production : HTTPS via reqwest (rustls), sans timeout propre.
#[derive(Clone, Default)]
pub struct HttpsTransport {
    client: reqwest::Client,
}

impl HttpsTransport {
    pub fn new() -> Self {
        Self { client: reqwest::Client::new() }
    }
}

#[async_trait]
impl ApiTransport for HttpsTransport {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, TransportError> {
        debug!(
            method = %request.method,
            host = %request.host,
            path = %request.path,
            payload_len = request.body.as_ref().map(Payload::len).unwrap_or(0),
            "api request"
        );

        let url = format!("https://{}:{}{}", request.host, request.port, request.path);
        let mut builder = self.client.request(request.method.clone(), &url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(payload) = request.body {
            builder = builder.body(payload.as_bytes().to_vec());
        }

        let wrap = |source| TransportError::Request {
            host: request.host.clone(),
            path: request.path.clone(),
            source,
        };
        let res = builder.send().await.map_err(wrap)?;
        let status = res.status().as_u16();
        let headers = lower_case_headers(
            res.headers()
                .iter()
                .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_string(), v.to_string()))),
        );
        let body = res.text().await.map_err(wrap)?;

        debug!(status, ?headers, body = %body, "api response");
        Ok(ApiResponse { status, headers, body })
    }
}

/// Normalise les noms de headers en minuscules; un doublon ultérieur écrase le précédent.
pub fn lower_case_headers<I, K, V>(headers: I) -> HashMap<String, String>
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: Into<String>,
{
    headers
        .into_iter()
        .map(|(k, v)| (k.as_ref().to_ascii_lowercase(), v.into()))
        .collect()
}

/// `Authorization: Basic base64(":" + token)` (username vide).
pub fn basic_auth(token: &str) -> String {
    format!("Basic {}", STANDARD.encode(format!(":{token}")))
}
