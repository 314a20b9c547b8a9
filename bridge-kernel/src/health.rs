use crate::dispatch::{DispatchError, DispatchOutcome};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

#[derive(Debug, Serialize, Deserialize)]
pub struct BridgeHealth {
    pub uptime_seconds: u64,
    pub started_at: String,
    pub batches_handled: u64,
    pub chunks_forwarded: u64,
    pub chunks_rejected: u64,
    pub devices_updated: u64,
    pub hardware_versions_provisioned: u64,
    pub dropped: u64,
    pub failures: u64,
    pub mqtt_status: String,
    pub mqtt_reconnects: u32,
}

#[derive(Default)]
struct Counters {
    batches_handled: AtomicU64,
    chunks_forwarded: AtomicU64,
    chunks_rejected: AtomicU64,
    devices_updated: AtomicU64,
    hardware_versions_provisioned: AtomicU64,
    dropped: AtomicU64,
    failures: AtomicU64,
    mqtt_reconnects: AtomicU32,
}

/// Compteurs d'observabilité partagés par les ingress; n'influence jamais le routage.
#[derive(Clone)]
pub struct HealthTracker {
    start_time: Instant,
    started_at: OffsetDateTime,
    counters: Arc<Counters>,
    mqtt_status: Arc<Mutex<String>>,
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthTracker {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            started_at: OffsetDateTime::now_utc(),
            counters: Arc::new(Counters::default()),
            mqtt_status: Arc::new(Mutex::new("disabled".to_string())),
        }
    }

    pub fn mark_mqtt_connecting(&self) {
        *self.mqtt_status.lock() = "connecting".to_string();
    }

    pub fn mark_mqtt_connected(&self) {
        *self.mqtt_status.lock() = "connected".to_string();
    }

    pub fn increment_reconnects(&self) {
        self.counters.mqtt_reconnects.fetch_add(1, Ordering::Relaxed);
        *self.mqtt_status.lock() = "reconnecting".to_string();
    }

    /// Comptabilise le résultat d'une invocation du dispatcher.
    pub fn record(&self, result: &Result<DispatchOutcome, DispatchError>) {
        let c = &self.counters;
        c.batches_handled.fetch_add(1, Ordering::Relaxed);
        match result {
            Ok(DispatchOutcome::Chunks { forwarded, rejected, .. }) => {
                c.chunks_forwarded.fetch_add(*forwarded as u64, Ordering::Relaxed);
                c.chunks_rejected.fetch_add(*rejected as u64, Ordering::Relaxed);
            }
            Ok(DispatchOutcome::DeviceUpdated) => {
                c.devices_updated.fetch_add(1, Ordering::Relaxed);
            }
            Ok(DispatchOutcome::HardwareVersionProvisioned { .. }) => {
                c.hardware_versions_provisioned.fetch_add(1, Ordering::Relaxed);
                c.devices_updated.fetch_add(1, Ordering::Relaxed);
            }
            Ok(_) => {
                c.dropped.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => {
                c.failures.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn get_health(&self) -> BridgeHealth {
        let c = &self.counters;
        BridgeHealth {
            uptime_seconds: self.start_time.elapsed().as_secs(),
            started_at: self.started_at.format(&Rfc3339).unwrap_or_default(),
            batches_handled: c.batches_handled.load(Ordering::Relaxed),
            chunks_forwarded: c.chunks_forwarded.load(Ordering::Relaxed),
            chunks_rejected: c.chunks_rejected.load(Ordering::Relaxed),
            devices_updated: c.devices_updated.load(Ordering::Relaxed),
            hardware_versions_provisioned: c.hardware_versions_provisioned.load(Ordering::Relaxed),
            dropped: c.dropped.load(Ordering::Relaxed),
            failures: c.failures.load(Ordering::Relaxed),
            mqtt_status: self.mqtt_status.lock().clone(),
            mqtt_reconnects: c.mqtt_reconnects.load(Ordering::Relaxed),
        }
    }
}
