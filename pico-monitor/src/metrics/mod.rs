//! Metric snapshot published once per loop iteration
//!
//! Provides:
//! - The fixed-shape [`MetricSnapshot`] record and its flat JSON layout
//! - The [`SensorReader`] contract and its sysfs/sysinfo implementation
//! - The rolling publish success-rate estimator

pub mod rate;
mod system;

pub use rate::SuccessRate;
pub use system::SystemSensors;

use crate::error::SnapshotError;
use crate::link::LinkMetrics;
use serde::{Serialize, Serializer};

/// Round to two decimals, the precision the collector stores
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Complete snapshot; every field is always present
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricSnapshot {
    #[serde(flatten)]
    pub environment: EnvironmentMetrics,
    #[serde(flatten)]
    pub memory: MemoryMetrics,
    #[serde(flatten)]
    pub connectivity: ConnectivityMetrics,
    #[serde(flatten)]
    pub delivery: DeliveryMetrics,
    #[serde(flatten)]
    pub identity: IdentityMetrics,
}

/// Onboard sensor readings
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnvironmentMetrics {
    pub temperature_celsius: f64,
    pub vsys_voltage: f64,
    pub cpu_frequency_hz: u64,
    pub uptime_seconds: u64,
}

/// Allocator statistics
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemoryMetrics {
    #[serde(rename = "memory_free_bytes")]
    pub free_bytes: u64,
    #[serde(rename = "memory_allocated_bytes")]
    pub allocated_bytes: u64,
    #[serde(rename = "memory_total_bytes")]
    pub total_bytes: u64,
    #[serde(rename = "memory_usage_percent")]
    pub usage_percent: f64,
}

/// Link state as seen by this iteration
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectivityMetrics {
    #[serde(rename = "wifi_connected", serialize_with = "as_flag")]
    pub link_associated: bool,
    #[serde(rename = "wifi_status")]
    pub status_code: i32,
    #[serde(rename = "wifi_rssi_dbm")]
    pub rssi_dbm: i32,
    #[serde(rename = "wifi_mac")]
    pub mac: String,
    #[serde(rename = "wifi_ip")]
    pub ip: String,
    #[serde(rename = "wifi_reconnect_count")]
    pub reconnect_count: u32,
}

/// Publish health
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeliveryMetrics {
    #[serde(rename = "publish_error_count")]
    pub consecutive_errors: u32,
    #[serde(rename = "publish_success_rate")]
    pub success_rate_percent: f64,
}

/// Device identity
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IdentityMetrics {
    #[serde(rename = "sys_unique_id")]
    pub unique_id: String,
    #[serde(rename = "sys_version")]
    pub version: String,
}

/// Orchestrator-owned inputs folded into a snapshot
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectivityReadout {
    pub link: LinkMetrics,
    pub reconnect_count: u32,
    pub consecutive_publish_errors: u32,
    pub success_rate_percent: f64,
}

/// Stateless read of hardware and runtime counters
pub trait SensorReader {
    /// Build one snapshot.
    ///
    /// Individual readings fall back to sentinels; only whole-snapshot
    /// failures (allocation) are reported as errors.
    fn snapshot(&mut self, connectivity: ConnectivityReadout)
        -> Result<MetricSnapshot, SnapshotError>;

    /// Release cached memory; returns the available headroom in bytes
    fn reclaim(&mut self) -> u64;
}

impl MemoryMetrics {
    /// Derive total and usage from free/allocated counts
    pub fn from_counts(free_bytes: u64, allocated_bytes: u64) -> Self {
        let total_bytes = free_bytes.saturating_add(allocated_bytes);
        let usage_percent = if total_bytes > 0 {
            round2(allocated_bytes as f64 / total_bytes as f64 * 100.0)
        } else {
            0.0
        };

        Self {
            free_bytes,
            allocated_bytes,
            total_bytes,
            usage_percent,
        }
    }
}

impl ConnectivityMetrics {
    pub fn from_readout(readout: &ConnectivityReadout) -> Result<Self, SnapshotError> {
        Ok(Self {
            link_associated: readout.link.associated,
            status_code: readout.link.status.code(),
            rssi_dbm: readout.link.rssi_dbm,
            mac: owned(&readout.link.mac)?,
            ip: owned(&readout.link.ip)?,
            reconnect_count: readout.reconnect_count,
        })
    }
}

impl DeliveryMetrics {
    pub fn from_readout(readout: &ConnectivityReadout) -> Self {
        Self {
            consecutive_errors: readout.consecutive_publish_errors,
            success_rate_percent: round2(readout.success_rate_percent),
        }
    }
}

impl MetricSnapshot {
    /// Assemble a snapshot from sensor groups and the orchestrator readout
    pub fn assemble(
        environment: EnvironmentMetrics,
        memory: MemoryMetrics,
        identity: &IdentityMetrics,
        readout: &ConnectivityReadout,
    ) -> Result<Self, SnapshotError> {
        Ok(Self {
            environment,
            memory,
            connectivity: ConnectivityMetrics::from_readout(readout)?,
            delivery: DeliveryMetrics::from_readout(readout),
            identity: IdentityMetrics {
                unique_id: owned(&identity.unique_id)?,
                version: owned(&identity.version)?,
            },
        })
    }
}

/// Copy a string with a fallible allocation
pub(crate) fn owned(value: &str) -> Result<String, SnapshotError> {
    let mut out = String::new();
    out.try_reserve_exact(value.len())
        .map_err(|e| SnapshotError::Exhausted(e.to_string()))?;
    out.push_str(value);
    Ok(out)
}

fn as_flag<S: Serializer>(value: &bool, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u8(u8::from(*value))
}
