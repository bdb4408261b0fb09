//! Interface discovery and device identification
//!
//! This module handles:
//! - Network interface classification (Wireless > Ethernet > Other)
//! - Station interface selection when none is configured
//! - Device unique id and firmware version for the snapshot identity fields

use anyhow::{Context, Result};
use std::path::Path;
use tracing::{debug, info, warn};

/// Identity reported when nothing better can be found
pub const UNKNOWN_IDENTITY: &str = "unknown";

const NET_CLASS_DIR: &str = "/sys/class/net";
const MACHINE_ID_PATHS: &[&str] = &["/etc/machine-id", "/var/lib/dbus/machine-id"];

/// Interface type classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterfaceType {
    Wireless,
    Ethernet,
    Loopback,
    Other,
}

/// Stable identity of this device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub unique_id: String,
    pub version: String,
}

impl DeviceIdentity {
    /// Discover the device id and firmware version once at startup
    pub fn discover() -> Self {
        let unique_id = Self::machine_id()
            .or_else(|| primary_mac().map(|mac| mac.replace(':', "")))
            .unwrap_or_else(|| {
                warn!("No machine id or MAC available, identity is unknown");
                UNKNOWN_IDENTITY.to_string()
            });

        let version = sysinfo::System::kernel_version()
            .unwrap_or_else(|| UNKNOWN_IDENTITY.to_string());

        info!("Device identity: id={}, version={}", unique_id, version);
        Self { unique_id, version }
    }

    fn machine_id() -> Option<String> {
        MACHINE_ID_PATHS.iter().find_map(|path| {
            let id = std::fs::read_to_string(path).ok()?;
            let id = id.trim();
            (!id.is_empty()).then(|| id.to_string())
        })
    }
}

/// Classify interface type based on name patterns
pub fn classify_interface(name: &str) -> InterfaceType {
    let name_lower = name.to_lowercase();

    if name_lower == "lo" || name_lower.starts_with("lo:") {
        return InterfaceType::Loopback;
    }

    if name_lower.starts_with("wl") || name_lower.contains("wifi") {
        return InterfaceType::Wireless;
    }

    if name_lower.starts_with("eth") || name_lower.starts_with("en") {
        return InterfaceType::Ethernet;
    }

    InterfaceType::Other
}

/// Pick the station interface among the given names
///
/// Wireless interfaces win; names are compared in sorted order so the
/// choice is stable across boots.
pub fn select_station_interface<'a, I>(names: I) -> Option<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut wireless: Vec<&str> = names
        .into_iter()
        .filter(|name| classify_interface(name) == InterfaceType::Wireless)
        .collect();
    wireless.sort_unstable();
    wireless.first().map(|name| name.to_string())
}

/// Find the station interface on this host
pub fn discover_station_interface() -> Result<String> {
    discover_station_interface_in(Path::new(NET_CLASS_DIR))
}

/// Find the station interface among the entries of a sysfs `net` class dir
pub fn discover_station_interface_in(net_class_dir: &Path) -> Result<String> {
    let names = list_interfaces(net_class_dir)?;
    let selected = select_station_interface(names.iter().map(String::as_str))
        .ok_or_else(|| anyhow::anyhow!("No wireless interface found among {:?}", names))?;

    info!("Selected station interface: {}", selected);
    Ok(selected)
}

/// MAC of the first non-loopback interface, preferring wireless
fn primary_mac() -> Option<String> {
    let mut names = list_interfaces(Path::new(NET_CLASS_DIR)).ok()?;
    names.sort_by_key(|name| match classify_interface(name) {
        InterfaceType::Wireless => 0,
        InterfaceType::Ethernet => 1,
        InterfaceType::Other => 2,
        InterfaceType::Loopback => 3,
    });

    names
        .iter()
        .filter(|name| classify_interface(name) != InterfaceType::Loopback)
        .find_map(|name| match mac_address::mac_address_by_name(name) {
            Ok(Some(mac)) => Some(mac.to_string().to_lowercase()),
            Ok(None) => None,
            Err(e) => {
                debug!("Error getting MAC for {}: {}", name, e);
                None
            }
        })
}

fn list_interfaces(dir: &Path) -> Result<Vec<String>> {
    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to enumerate {}", dir.display()))?;

    Ok(entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| entry.file_name().into_string().ok())
        .collect())
}
