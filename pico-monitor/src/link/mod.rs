//! Link-layer association (Wi-Fi station)
//!
//! The link manager only knows how to join, probe and describe the link.
//! Whether and when to retry is decided by the orchestrator.

mod wireless;

pub use wireless::WirelessLink;

use crate::error::LinkError;
use serde::Serialize;

/// RSSI reported while the link is down
pub const RSSI_SENTINEL_DBM: i32 = -100;
/// Hardware identity reported while the link is down
pub const MAC_SENTINEL: &str = "disconnected";
/// Address reported while the link is down
pub const IP_SENTINEL: &str = "0.0.0.0";

/// Station status codes, numbered the way the collector dashboards expect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LinkStatus {
    Idle,
    Connecting,
    NoIp,
    GotIp,
    Failed,
    NoApFound,
    BadAuth,
}

impl LinkStatus {
    pub fn code(self) -> i32 {
        match self {
            LinkStatus::Idle => 0,
            LinkStatus::Connecting => 1,
            LinkStatus::NoIp => 2,
            LinkStatus::GotIp => 3,
            LinkStatus::Failed => -1,
            LinkStatus::NoApFound => -2,
            LinkStatus::BadAuth => -3,
        }
    }

    /// Status to remember after a failed association attempt
    pub fn from_error(err: &LinkError) -> Self {
        match err {
            LinkError::NoApFound(_) => LinkStatus::NoApFound,
            LinkError::BadAuth => LinkStatus::BadAuth,
            _ => LinkStatus::Failed,
        }
    }
}

/// Signal and identity readout of the link
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LinkMetrics {
    pub associated: bool,
    pub status: LinkStatus,
    pub rssi_dbm: i32,
    pub mac: String,
    pub ip: String,
}

impl LinkMetrics {
    /// Sentinel readout for a link that is not associated
    pub fn disconnected(status: LinkStatus) -> Self {
        Self {
            associated: false,
            status,
            rssi_dbm: RSSI_SENTINEL_DBM,
            mac: MAC_SENTINEL.to_string(),
            ip: IP_SENTINEL.to_string(),
        }
    }
}

/// Link-layer association lifecycle
#[allow(async_fn_in_trait)]
pub trait LinkManager {
    /// Join the configured network.
    ///
    /// Blocks until associated or until the implementation's timeout fires.
    /// On failure the link must be left disassociated so that
    /// [`LinkManager::is_associated`] stays truthful.
    async fn associate(&mut self) -> Result<(), LinkError>;

    /// Whether the link currently carries traffic
    fn is_associated(&self) -> bool;

    /// Never fails; sentinel values when not associated
    fn signal_metrics(&self) -> LinkMetrics;
}
