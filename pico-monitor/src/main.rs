//! Pico Monitor agent entry point
//!
//! - `pico-monitor`        run the telemetry loop under the supervisor
//! - `pico-monitor setup`  interactive first-time configuration
//! - `pico-monitor check`  print one snapshot as JSON, no network traffic

mod wizard;

use anyhow::{bail, Context, Result};
use pico_monitor::config::AgentConfig;
use pico_monitor::discovery::DeviceIdentity;
use pico_monitor::link::{LinkManager, WirelessLink};
use pico_monitor::metrics::{ConnectivityReadout, SensorReader, SystemSensors};
use pico_monitor::orchestrator::{RecoveryPolicy, TelemetryOrchestrator};
use pico_monitor::session::MqttSession;
use pico_monitor::supervisor::{Supervisor, SystemRestarter};
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use wizard::SetupWizard;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("pico_monitor=info")),
        )
        .init();

    match std::env::args().nth(1).as_deref() {
        None | Some("run") => run_agent().await,
        Some("setup") => SetupWizard::run().await,
        Some("check") => check().await,
        Some(other) => bail!("Unknown command '{}' (expected: run, setup, check)", other),
    }
}

async fn run_agent() -> Result<()> {
    info!("Pico monitor starting...");

    if AgentConfig::is_first_time_setup() {
        warn!("No configuration file yet; run `pico-monitor setup` to create one");
    }
    let config = AgentConfig::load().await.context("Failed to load configuration")?;
    config.validate()?;

    let link = WirelessLink::new(&config.link);
    let session = MqttSession::new(&config.mqtt);
    let sensors = SystemSensors::new(DeviceIdentity::discover());
    info!(
        "Publishing to {}:{} topic '{}' as {} via {}",
        config.mqtt.broker_host,
        config.mqtt.broker_port,
        config.mqtt.topic,
        session.client_id(),
        link.interface().unwrap_or("auto-detected interface")
    );

    let orchestrator =
        TelemetryOrchestrator::new(link, session, sensors, RecoveryPolicy::from_config(&config));
    let supervisor = Supervisor::new(
        orchestrator,
        SystemRestarter::new(config.restart.mode),
        Duration::from_secs(config.restart.cooldown_secs),
    );

    supervisor.run().await.context("Restart failed")
}

async fn check() -> Result<()> {
    let config = AgentConfig::load().await.context("Failed to load configuration")?;

    let link = WirelessLink::new(&config.link).signal_metrics();

    let mut sensors = SystemSensors::new(DeviceIdentity::discover());
    let snapshot = sensors.snapshot(ConnectivityReadout {
        link,
        reconnect_count: 0,
        consecutive_publish_errors: 0,
        success_rate_percent: 100.0,
    })?;

    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    Ok(())
}
