//! Memfault bridge kernel.
//!
//! Routes IoT hub message batches to the Memfault API:
//! - diagnostic chunks are forwarded to the chunks ingestion endpoint
//! - twin change notifications update the device nickname / hardware version,
//!   provisioning a missing hardware version and retrying once when needed

pub mod api_client;
pub mod chunks;
pub mod config;
pub mod device_info;
pub mod dispatch;
pub mod hardware_version;
pub mod health;
pub mod http;
pub mod models;
pub mod mqtt;
pub mod twin;

pub use api_client::{ApiRequest, ApiResponse, ApiTransport, HttpsTransport, Payload, TransportError};
pub use config::{BridgeConfig, MemfaultConfig};
pub use dispatch::{DispatchError, DispatchHandler, DispatchOutcome, Route};
pub use models::{DeviceId, InboundMessage, MessageBatch, Properties};
