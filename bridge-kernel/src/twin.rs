//! Typed decode of device twin change notifications.
//!
//! Only the fields the bridge forwards are modelled; everything else in the
//! twin document is ignored.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// Champ optionnel toléré : un type inattendu compte comme absent.
fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).ok())
}

#[derive(Debug, Default, Deserialize)]
pub struct TwinUpdate {
    #[serde(default, deserialize_with = "lenient")]
    pub tags: Option<TwinTags>,
    #[serde(default, deserialize_with = "lenient")]
    pub properties: Option<TwinProperties>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TwinTags {
    #[serde(default, deserialize_with = "lenient")]
    pub name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TwinProperties {
    #[serde(default, deserialize_with = "lenient")]
    pub reported: Option<ReportedState>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ReportedState {
    #[serde(default, deserialize_with = "lenient")]
    pub dev: Option<DeviceInfo>,
}

/// `dev` block reported by the firmware.
#[derive(Debug, Default, Deserialize)]
pub struct DeviceInfo {
    #[serde(default, deserialize_with = "lenient")]
    pub v: Option<DeviceVitals>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DeviceVitals {
    /// Board version
    #[serde(default, rename = "brdV", deserialize_with = "lenient")]
    pub board_version: Option<String>,
}

impl TwinUpdate {
    pub fn from_slice(payload: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(payload)
    }

    /// `tags.name`
    pub fn nickname(&self) -> Option<&str> {
        self.tags.as_ref()?.name.as_deref()
    }

    /// `properties.reported.dev.v.brdV`
    pub fn hardware_version(&self) -> Option<&str> {
        self.properties
            .as_ref()?
            .reported
            .as_ref()?
            .dev
            .as_ref()?
            .v
            .as_ref()?
            .board_version
            .as_deref()
    }
}
