/*!
Builders de batches hub et de réponses Memfault

Construit des batches conformes à ce que le hub livre (binding + system properties)
et les réponses API typiques (succès, erreur 1003, listing de software types).
*/

use bridge_kernel::api_client::lower_case_headers;
use bridge_kernel::models::{
    CONNECTION_DEVICE_ID_PROPERTY, DEVICE_ID_PROPERTY, MEMFAULT_PROPERTY, MESSAGE_SCHEMA_PROPERTY,
    TWIN_CHANGE_NOTIFICATION,
};
use bridge_kernel::{ApiResponse, InboundMessage, MessageBatch, Properties};
use chrono::Utc;
use serde_json::{json, Value};

const ENQUEUED_TIME_PROPERTY: &str = "iothub-enqueuedtime";

/// System properties posées par le hub pour un device connecté.
pub fn system_properties(device: &str) -> Properties {
    Properties::new()
        .with(CONNECTION_DEVICE_ID_PROPERTY, device)
        .with(ENQUEUED_TIME_PROPERTY, Utc::now().to_rfc3339())
}

/// Body d'une notification twin; les champs `None` sont absents du JSON.
pub fn twin_body(nickname: Option<&str>, board_version: Option<&str>) -> Value {
    let mut body = json!({ "version": 2 });
    if let Some(name) = nickname {
        body["tags"] = json!({ "name": name });
    }
    if let Some(brd) = board_version {
        body["properties"] = json!({ "reported": { "dev": { "v": { "brdV": brd } } } });
    }
    body
}

#[derive(Debug, Default)]
pub struct BatchBuilder {
    messages: Vec<InboundMessage>,
}

impl BatchBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Message de chunk : binding property `memfault` + device id de connexion.
    pub fn chunk(mut self, device: &str, body: &[u8]) -> Self {
        self.messages.push(InboundMessage {
            body: body.to_vec(),
            properties: Properties::new().with(MEMFAULT_PROPERTY, ""),
            system_properties: system_properties(device),
        });
        self
    }

    pub fn twin(mut self, device: &str, body: &Value) -> Self {
        self.messages.push(InboundMessage {
            body: body.to_string().into_bytes(),
            properties: Properties::new().with(MESSAGE_SCHEMA_PROPERTY, TWIN_CHANGE_NOTIFICATION),
            system_properties: system_properties(device),
        });
        self
    }

    /// Twin dont le device id vient de la binding property `deviceId`.
    pub fn twin_with_binding_id(mut self, binding: &str, connection: Option<&str>, body: &Value) -> Self {
        self.messages.push(InboundMessage {
            body: body.to_string().into_bytes(),
            properties: Properties::new()
                .with(MESSAGE_SCHEMA_PROPERTY, TWIN_CHANGE_NOTIFICATION)
                .with(DEVICE_ID_PROPERTY, binding),
            system_properties: connection.map(system_properties).unwrap_or_default(),
        });
        self
    }

    /// Message de télémétrie ordinaire, ni chunk ni twin.
    pub fn telemetry(mut self, device: &str, body: &[u8]) -> Self {
        self.messages.push(InboundMessage {
            body: body.to_vec(),
            properties: Properties::new().with("temperature-alert", "false"),
            system_properties: system_properties(device),
        });
        self
    }

    pub fn message(mut self, message: InboundMessage) -> Self {
        self.messages.push(message);
        self
    }

    pub fn build(self) -> MessageBatch {
        MessageBatch::new(self.messages)
    }
}

/// Réponses Memfault prêtes à scripter dans le `MockBackend`.
pub struct Responses;

impl Responses {
    pub fn status(status: u16) -> ApiResponse {
        ApiResponse { status, ..Default::default() }
    }

    /// Réponse JSON avec `content-type` et `content-length` cohérents.
    pub fn json(status: u16, body: &Value) -> ApiResponse {
        let body = body.to_string();
        ApiResponse {
            status,
            headers: lower_case_headers(vec![
                ("Content-Type", "application/json".to_string()),
                ("Content-Length", body.len().to_string()),
            ]),
            body,
        }
    }

    /// Réponse JSON sans header `Content-Length` (transfert chunked).
    pub fn json_without_length(status: u16, body: &Value) -> ApiResponse {
        let mut response = Self::json(status, body);
        response.headers.remove("content-length");
        response
    }

    pub fn error(status: u16, code: i64, message: &str) -> ApiResponse {
        Self::json(status, &json!({ "error": { "code": code, "message": message } }))
    }

    pub fn unknown_hardware_version(name: &str) -> ApiResponse {
        Self::error(422, 1003, &format!("HardwareVersion with name `{name}` not found"))
    }

    pub fn software_types(names: &[&str]) -> ApiResponse {
        let data: Vec<Value> = names
            .iter()
            .map(|name| json!({ "name": name, "archived": false }))
            .collect();
        let total = data.len();
        Self::json(
            200,
            &json!({
                "data": data,
                "paging": { "page": 1, "per_page": 5000, "total_count": total }
            }),
        )
    }
}
