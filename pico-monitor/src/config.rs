//! Configuration management with secure credential storage
//!
//! Handles:
//! - Wi-Fi station settings (password kept out of the file)
//! - MQTT broker, identity and topic
//! - Publish cadence and recovery constants
//! - Restart escalation mode

use crate::orchestrator::{
    FAILURE_THRESHOLD, FAULT_BACKOFF, FAULT_ESCALATION_LIMIT, LINK_RETRY_BACKOFF,
    PUBLISH_INTERVAL, SESSION_RESET_BACKOFF, SESSION_RETRY_BACKOFF,
};
use anyhow::{bail, Context, Result};
use keyring::Entry;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Environment variable overriding the config file location
pub const CONFIG_PATH_ENV: &str = "PICO_MONITOR_CONFIG";
/// Environment variable carrying the Wi-Fi password
pub const WIFI_PASSWORD_ENV: &str = "PICO_MONITOR_WIFI_PASSWORD";

const KEYRING_SERVICE: &str = "pico-monitor";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub link: LinkConfig,
    pub mqtt: MqttConfig,
    pub telemetry: TelemetryConfig,
    pub recovery: RecoveryConfig,
    pub restart: RestartConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    pub ssid: String,
    /// Station interface; discovered when unset
    pub interface: Option<String>,
    pub connect_timeout_secs: u64,
    pub store_credentials: bool,
    #[serde(skip)] // Never serialize passwords
    pub password: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub broker_host: String,
    pub broker_port: u16,
    pub client_id: Option<String>,
    pub topic: String,
    pub keep_alive_secs: u16,
    pub handshake_timeout_secs: u64,
    /// 0 = fire and forget, 1 = wait for PUBACK
    pub qos: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub publish_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    pub link_retry_backoff_secs: u64,
    pub session_retry_backoff_secs: u64,
    pub session_reset_backoff_secs: u64,
    pub fault_backoff_secs: u64,
    pub failure_threshold: u32,
    pub fault_escalation_limit: u32,
    pub success_window: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RestartConfig {
    pub mode: RestartMode,
    pub cooldown_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RestartMode {
    /// Re-exec the agent binary from a cold state
    Process,
    /// Reboot the whole device
    Device,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            ssid: String::new(),
            interface: None,
            connect_timeout_secs: 20,
            store_credentials: false,
            password: None,
        }
    }
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            broker_host: "127.0.0.1".to_string(),
            broker_port: 1883,
            client_id: None,
            topic: "pico/metrics".to_string(),
            keep_alive_secs: 60,
            handshake_timeout_secs: 10,
            qos: 0,
        }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            publish_interval_secs: PUBLISH_INTERVAL.as_secs(),
        }
    }
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            link_retry_backoff_secs: LINK_RETRY_BACKOFF.as_secs(),
            session_retry_backoff_secs: SESSION_RETRY_BACKOFF.as_secs(),
            session_reset_backoff_secs: SESSION_RESET_BACKOFF.as_secs(),
            fault_backoff_secs: FAULT_BACKOFF.as_secs(),
            failure_threshold: FAILURE_THRESHOLD,
            fault_escalation_limit: FAULT_ESCALATION_LIMIT,
            success_window: crate::metrics::rate::DEFAULT_WINDOW,
        }
    }
}

impl Default for RestartConfig {
    fn default() -> Self {
        Self {
            mode: RestartMode::Process,
            cooldown_secs: 15,
        }
    }
}

impl MqttConfig {
    /// Configured client id, or one derived from the hostname
    pub fn effective_client_id(&self) -> String {
        if let Some(id) = self.client_id.as_ref().filter(|id| !id.is_empty()) {
            return id.clone();
        }
        match hostname::get() {
            Ok(name) if !name.is_empty() => format!("pico-monitor-{}", name.to_string_lossy()),
            _ => format!("pico-monitor-{}", &uuid::Uuid::new_v4().simple().to_string()[..8]),
        }
    }
}

impl AgentConfig {
    /// Load config from the default location, falling back to defaults
    pub async fn load() -> Result<Self> {
        let config_path = Self::config_file_path()?;

        let mut config = if config_path.exists() {
            Self::load_from(&config_path).await?
        } else {
            warn!("No config at {}, using defaults", config_path.display());
            Self::default()
        };

        config.resolve_password();
        Ok(config)
    }

    /// Parse a config file without touching credentials
    pub async fn load_from(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: AgentConfig = toml::from_str(&content)
            .with_context(|| format!("Invalid config in {}", path.display()))?;
        debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Save config to the default location
    pub async fn save(&self) -> Result<()> {
        let config_path = Self::config_file_path()?;
        self.save_to(&config_path).await?;

        if self.link.store_credentials {
            if let Some(password) = &self.link.password {
                self.save_password(password)?;
            }
        }

        Ok(())
    }

    /// Write the config file (without sensitive data)
    pub async fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let content = toml::to_string_pretty(self)?;
        tokio::fs::write(path, content).await?;
        Ok(())
    }

    /// Config path: `$PICO_MONITOR_CONFIG` or the OS config dir
    pub fn config_file_path() -> Result<PathBuf> {
        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            return Ok(PathBuf::from(path));
        }

        let mut path = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;

        path.push("pico-monitor");
        path.push("config.toml");
        Ok(path)
    }

    /// Check if this is first-time setup
    pub fn is_first_time_setup() -> bool {
        Self::config_file_path()
            .map(|p| !p.exists())
            .unwrap_or(true)
    }

    /// Reject values the loop cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.link.ssid.trim().is_empty() {
            bail!("link.ssid is empty; run `pico-monitor setup`");
        }
        if self.mqtt.topic.trim().is_empty() {
            bail!("mqtt.topic is empty");
        }
        if self.mqtt.qos > 1 {
            bail!("mqtt.qos must be 0 or 1, got {}", self.mqtt.qos);
        }
        if self.telemetry.publish_interval_secs == 0 {
            bail!("telemetry.publish_interval_secs must be positive");
        }
        // The MQTT event loop is only polled while publishing, so the broker
        // must tolerate one full interval of silence.
        if u64::from(self.mqtt.keep_alive_secs) <= self.telemetry.publish_interval_secs {
            bail!(
                "mqtt.keep_alive_secs ({}) must exceed telemetry.publish_interval_secs ({})",
                self.mqtt.keep_alive_secs,
                self.telemetry.publish_interval_secs
            );
        }
        if self.mqtt.keep_alive_secs < 5 {
            bail!("mqtt.keep_alive_secs must be at least 5");
        }
        if self.recovery.failure_threshold == 0 {
            bail!("recovery.failure_threshold must be positive");
        }
        if self.recovery.fault_escalation_limit == 0 {
            bail!("recovery.fault_escalation_limit must be positive");
        }
        if self.recovery.success_window == 0 {
            bail!("recovery.success_window must be positive");
        }
        Ok(())
    }

    /// Password from the environment first, then the OS keyring
    fn resolve_password(&mut self) {
        if let Ok(password) = std::env::var(WIFI_PASSWORD_ENV) {
            self.link.password = Some(password);
            return;
        }
        if self.link.store_credentials {
            match self.load_password() {
                Ok(password) => self.link.password = Some(password),
                Err(e) => warn!("No stored Wi-Fi password for '{}': {}", self.link.ssid, e),
            }
        }
    }

    fn keyring_entry(&self) -> Result<Entry> {
        let user = format!("wifi-{}", self.link.ssid);
        Entry::new(KEYRING_SERVICE, &user).map_err(Into::into)
    }

    fn load_password(&self) -> Result<String> {
        self.keyring_entry()?.get_password().map_err(Into::into)
    }

    fn save_password(&self, password: &str) -> Result<()> {
        self.keyring_entry()?.set_password(password).map_err(Into::into)
    }
}
