//! Wi-Fi station link driven through NetworkManager
//!
//! Association goes through `nmcli`; state probes read sysfs/procfs
//! directly so they stay cheap enough to call every iteration.

use super::{LinkManager, LinkMetrics, LinkStatus};
use crate::config::LinkConfig;
use crate::discovery;
use crate::error::LinkError;
use if_addrs::IfAddr;
use std::path::PathBuf;
use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::process::Command as AsyncCommand;
use tracing::{debug, info, warn};

const NET_CLASS_DIR: &str = "/sys/class/net";
const PROC_WIRELESS: &str = "/proc/net/wireless";
const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Wi-Fi station interface
pub struct WirelessLink {
    ssid: String,
    password: Option<String>,
    /// Resolved on the first association when not configured
    interface: Option<String>,
    timeout: Duration,
    last_status: LinkStatus,
    net_class_dir: PathBuf,
    proc_wireless: PathBuf,
}

impl WirelessLink {
    /// Build from config; an unset interface is discovered when joining
    pub fn new(config: &LinkConfig) -> Self {
        let interface = config.interface.clone().filter(|name| !name.is_empty());

        Self {
            ssid: config.ssid.clone(),
            password: config.password.clone(),
            interface,
            timeout: Duration::from_secs(config.connect_timeout_secs),
            last_status: LinkStatus::Idle,
            net_class_dir: PathBuf::from(NET_CLASS_DIR),
            proc_wireless: PathBuf::from(PROC_WIRELESS),
        }
    }

    /// Read probes from alternate sysfs/procfs roots
    pub fn with_probe_paths(mut self, net_class_dir: PathBuf, proc_wireless: PathBuf) -> Self {
        self.net_class_dir = net_class_dir;
        self.proc_wireless = proc_wireless;
        self
    }

    /// Station interface, once configured or discovered
    pub fn interface(&self) -> Option<&str> {
        self.interface.as_deref()
    }

    fn resolve_interface(&mut self) -> Result<String, LinkError> {
        if let Some(name) = &self.interface {
            return Ok(name.clone());
        }
        let name = discovery::discover_station_interface_in(&self.net_class_dir)
            .map_err(|e| LinkError::Driver(e.to_string()))?;
        self.interface = Some(name.clone());
        Ok(name)
    }

    fn operstate_up(&self) -> bool {
        let Some(interface) = &self.interface else {
            return false;
        };
        let path = self.net_class_dir.join(interface).join("operstate");
        std::fs::read_to_string(path)
            .map(|state| state.trim() == "up")
            .unwrap_or(false)
    }

    fn ipv4_address(&self) -> Option<String> {
        let interface = self.interface.as_deref()?;
        let addrs = if_addrs::get_if_addrs().ok()?;
        addrs
            .into_iter()
            .filter(|addr| addr.name == interface)
            .find_map(|addr| match addr.addr {
                IfAddr::V4(v4) => Some(v4.ip.to_string()),
                IfAddr::V6(_) => None,
            })
    }

    fn rssi_dbm(&self) -> Option<i32> {
        let interface = self.interface.as_deref()?;
        let content = std::fs::read_to_string(&self.proc_wireless).ok()?;
        parse_proc_wireless(&content, interface)
    }

    fn hardware_address(&self, interface: &str) -> String {
        match mac_address::mac_address_by_name(interface) {
            Ok(Some(mac)) => mac.to_string().to_lowercase(),
            Ok(None) => discovery::UNKNOWN_IDENTITY.to_string(),
            Err(e) => {
                debug!("Error getting MAC for {}: {}", interface, e);
                discovery::UNKNOWN_IDENTITY.to_string()
            }
        }
    }

    async fn nmcli(&self, args: &[&str], timeout: Duration) -> Result<Output, LinkError> {
        let output = tokio::time::timeout(
            timeout,
            AsyncCommand::new("nmcli")
                .args(args)
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .output(),
        )
        .await
        .map_err(|_| LinkError::Timeout(timeout.as_secs()))??;

        Ok(output)
    }

    /// Leave the interface disassociated after a failed attempt
    async fn disconnect(&self, interface: &str) {
        let args = ["device", "disconnect", interface];
        match self.nmcli(&args, DISCONNECT_TIMEOUT).await {
            Ok(output) if output.status.success() => debug!("{} disconnected", interface),
            Ok(output) => debug!(
                "Disconnect of {} reported: {}",
                interface,
                String::from_utf8_lossy(&output.stderr).trim()
            ),
            Err(e) => warn!("Failed to disconnect {}: {}", interface, e),
        }
    }

    async fn try_associate(&self, interface: &str) -> Result<(), LinkError> {
        let wait = self.timeout.as_secs().to_string();
        let mut args = vec![
            "--wait",
            wait.as_str(),
            "device",
            "wifi",
            "connect",
            self.ssid.as_str(),
        ];
        if let Some(password) = &self.password {
            args.extend_from_slice(&["password", password.as_str()]);
        }
        args.extend_from_slice(&["ifname", interface]);

        // nmcli's own --wait plus a little slack for process startup
        let output = self.nmcli(&args, self.timeout + Duration::from_secs(2)).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(classify_nmcli_failure(&stderr, &self.ssid));
        }

        if !self.is_associated() {
            return Err(LinkError::Driver(format!(
                "{} reported connected without an IPv4 address",
                interface
            )));
        }
        Ok(())
    }
}

impl LinkManager for WirelessLink {
    async fn associate(&mut self) -> Result<(), LinkError> {
        let interface = match self.resolve_interface() {
            Ok(interface) => interface,
            Err(e) => {
                self.last_status = LinkStatus::Failed;
                return Err(e);
            }
        };

        info!("Associating {} with '{}'", interface, self.ssid);
        self.last_status = LinkStatus::Connecting;

        match self.try_associate(&interface).await {
            Ok(()) => {
                self.last_status = LinkStatus::GotIp;
                Ok(())
            }
            Err(e) => {
                self.last_status = LinkStatus::from_error(&e);
                self.disconnect(&interface).await;
                Err(e)
            }
        }
    }

    fn is_associated(&self) -> bool {
        self.operstate_up() && self.ipv4_address().is_some()
    }

    fn signal_metrics(&self) -> LinkMetrics {
        if !self.operstate_up() {
            let status = match self.last_status {
                // Association was lost since the last successful join
                LinkStatus::GotIp | LinkStatus::Connecting => LinkStatus::Idle,
                other => other,
            };
            return LinkMetrics::disconnected(status);
        }

        let (Some(interface), Some(ip)) = (self.interface.as_deref(), self.ipv4_address()) else {
            return LinkMetrics::disconnected(LinkStatus::NoIp);
        };

        LinkMetrics {
            associated: true,
            status: LinkStatus::GotIp,
            rssi_dbm: self.rssi_dbm().unwrap_or(super::RSSI_SENTINEL_DBM),
            mac: self.hardware_address(interface),
            ip,
        }
    }
}

/// Signal level (dBm) of `interface` from `/proc/net/wireless` content
fn parse_proc_wireless(content: &str, interface: &str) -> Option<i32> {
    let prefix = format!("{}:", interface);
    content.lines().find_map(|line| {
        let rest = line.trim_start().strip_prefix(&prefix)?;
        // status, link quality, signal level, noise, ...
        let level = rest.split_whitespace().nth(2)?;
        let level: f32 = level.trim_end_matches('.').parse().ok()?;
        Some(level.round() as i32)
    })
}

/// Map nmcli's stderr to a link error
fn classify_nmcli_failure(stderr: &str, ssid: &str) -> LinkError {
    let lower = stderr.to_lowercase();

    if lower.contains("no network with ssid") {
        LinkError::NoApFound(ssid.to_string())
    } else if lower.contains("secrets were required")
        || lower.contains("802-11-wireless-security")
        || lower.contains("authentication")
    {
        LinkError::BadAuth
    } else if lower.contains("timeout") {
        LinkError::Driver(format!("activation timed out: {}", stderr.trim()))
    } else {
        LinkError::Driver(stderr.trim().to_string())
    }
}
