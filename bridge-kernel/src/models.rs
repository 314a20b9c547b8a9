use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;

/// Clé de binding property qui marque un message de chunks Memfault.
pub const MEMFAULT_PROPERTY: &str = "memfault";
pub const MESSAGE_SCHEMA_PROPERTY: &str = "iothub-message-schema";
pub const TWIN_CHANGE_NOTIFICATION: &str = "twinChangeNotification";
pub const DEVICE_ID_PROPERTY: &str = "deviceId";
pub const CONNECTION_DEVICE_ID_PROPERTY: &str = "iothub-connection-device-id";

/// Propriétés clé/valeur attachées à un message (binding ou system).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Properties(HashMap<String, Value>);

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Valeur texte d'une propriété; les valeurs non-string sont ignorées.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Properties {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Option<Self> {
        let id = id.into();
        if id.is_empty() {
            None
        } else {
            Some(Self(id))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Id encodé pour un segment de chemin d'URL (`#`, `?`, `%`, `/`...).
    pub fn path_segment(&self) -> Cow<'_, str> {
        urlencoding::encode(&self.0)
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct InboundMessage {
    pub body: Vec<u8>,
    pub properties: Properties,
    pub system_properties: Properties,
}

/// Batch livré par le hub; seul le premier message pilote le routage.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageBatch {
    pub messages: Vec<InboundMessage>,
}

impl MessageBatch {
    pub fn new(messages: Vec<InboundMessage>) -> Self {
        Self { messages }
    }

    pub fn first(&self) -> Option<&InboundMessage> {
        self.messages.first()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }
}

/// Enveloppe JSON d'un batch sur les ingress HTTP/MQTT (body en base64).
#[derive(Debug, Serialize, Deserialize)]
pub struct BatchEnvelope {
    pub messages: Vec<MessageEnvelope>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessageEnvelope {
    pub body: String,
    #[serde(default)]
    pub properties: Properties,
    #[serde(default)]
    pub system_properties: Properties,
}

#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    #[error("invalid batch JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("message {index}: body is not base64: {source}")]
    Body {
        index: usize,
        #[source]
        source: base64::DecodeError,
    },
}

impl BatchEnvelope {
    pub fn from_slice(payload: &[u8]) -> Result<Self, EnvelopeError> {
        Ok(serde_json::from_slice(payload)?)
    }

    pub fn into_batch(self) -> Result<MessageBatch, EnvelopeError> {
        let messages = self
            .messages
            .into_iter()
            .enumerate()
            .map(|(index, m)| {
                let body = STANDARD
                    .decode(m.body.as_bytes())
                    .map_err(|source| EnvelopeError::Body { index, source })?;
                Ok(InboundMessage {
                    body,
                    properties: m.properties,
                    system_properties: m.system_properties,
                })
            })
            .collect::<Result<Vec<_>, EnvelopeError>>()?;
        Ok(MessageBatch { messages })
    }
}

impl From<&MessageBatch> for BatchEnvelope {
    fn from(batch: &MessageBatch) -> Self {
        Self {
            messages: batch
                .messages
                .iter()
                .map(|m| MessageEnvelope {
                    body: STANDARD.encode(&m.body),
                    properties: m.properties.clone(),
                    system_properties: m.system_properties.clone(),
                })
                .collect(),
        }
    }
}
