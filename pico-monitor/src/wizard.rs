//! Interactive CLI setup wizard for first-time configuration
//!
//! Walks through Wi-Fi credentials, MQTT broker and topic, publish
//! cadence and restart mode, then writes the config file (and the
//! password to the OS keyring when asked to).

use anyhow::{Context, Result};
use pico_monitor::config::{AgentConfig, LinkConfig, MqttConfig, RestartMode, TelemetryConfig};
use pico_monitor::discovery::{self, DeviceIdentity};
use std::io::{self, Write};
use std::net::ToSocketAddrs;
use std::time::Duration;

pub struct SetupWizard;

impl SetupWizard {
    /// Run the interactive setup wizard
    pub async fn run() -> Result<()> {
        println!();
        println!("======================================");
        println!("   PICO MONITOR CONFIGURATION WIZARD");
        println!("======================================");
        println!();

        Self::display_device_info();

        let mut config = AgentConfig::default();
        config.link = Self::configure_link()?;
        config.mqtt = Self::configure_mqtt()?;
        config.telemetry = Self::configure_telemetry()?;
        config.restart.mode = Self::configure_restart()?;

        Self::display_summary(&config)?;

        if let Err(e) = config.validate() {
            println!("Configuration is not usable: {}", e);
            return Ok(());
        }

        if Self::prompt_yes_no("Save this configuration?", true)? {
            config.save().await.context("Failed to save configuration")?;

            println!();
            println!("Configuration saved to {}", AgentConfig::config_file_path()?.display());
            println!("The agent is now ready to start.");
            println!();
        } else {
            println!("Configuration cancelled.");
        }

        Ok(())
    }

    fn display_device_info() {
        println!("DEVICE INFORMATION");
        println!("────────────────────────────────────────");

        let identity = DeviceIdentity::discover();
        println!("Unique ID: {}", identity.unique_id);
        println!("Firmware:  {}", identity.version);
        match discovery::discover_station_interface() {
            Ok(interface) => println!("Wi-Fi:     {}", interface),
            Err(e) => println!("Wi-Fi:     not found ({})", e),
        }
        println!();
    }

    fn configure_link() -> Result<LinkConfig> {
        println!("WI-FI");
        println!("────────────────────────────────────────");

        let ssid = Self::prompt_required("Network SSID")?;
        let password = Self::prompt_password("Network password (empty for an open network)")?;
        let interface = Self::prompt_optional("Station interface (leave empty to auto-detect)")?;
        let connect_timeout_secs = Self::prompt_with_default_parse("Join timeout (seconds)", "20")?;

        let store_credentials = password.is_some()
            && Self::prompt_yes_no("Store the password in the OS keyring?", true)?;
        if password.is_some() && !store_credentials {
            println!(
                "Set {} before starting the agent.",
                pico_monitor::config::WIFI_PASSWORD_ENV
            );
        }
        println!();

        Ok(LinkConfig {
            ssid,
            interface,
            connect_timeout_secs,
            store_credentials,
            password,
        })
    }

    fn configure_mqtt() -> Result<MqttConfig> {
        println!("MQTT");
        println!("────────────────────────────────────────");

        let defaults = MqttConfig::default();
        let broker_host = Self::prompt_with_default("Broker host", &defaults.broker_host)?;
        let broker_port: u16 =
            Self::prompt_with_default_parse("Broker port", &defaults.broker_port.to_string())?;
        let client_id = Self::prompt_optional("Client ID (leave empty for hostname-based)")?;
        let topic = Self::prompt_with_default("Topic", &defaults.topic)?;

        println!("Testing broker reachability...");
        if Self::test_broker(&broker_host, broker_port) {
            println!("Broker reachable.");
        } else {
            println!("Broker unreachable right now; the configuration will be saved anyway.");
        }
        println!();

        Ok(MqttConfig {
            broker_host,
            broker_port,
            client_id,
            topic,
            ..defaults
        })
    }

    fn configure_telemetry() -> Result<TelemetryConfig> {
        let defaults = TelemetryConfig::default();
        let publish_interval_secs = Self::prompt_with_default_parse(
            "Publish interval (seconds)",
            &defaults.publish_interval_secs.to_string(),
        )?;
        Ok(TelemetryConfig {
            publish_interval_secs,
        })
    }

    fn configure_restart() -> Result<RestartMode> {
        let device = Self::prompt_yes_no(
            "Reboot the whole device on fatal errors (instead of restarting the agent)?",
            false,
        )?;
        println!();
        Ok(if device {
            RestartMode::Device
        } else {
            RestartMode::Process
        })
    }

    fn display_summary(config: &AgentConfig) -> Result<()> {
        println!("SUMMARY");
        println!("────────────────────────────────────────");
        println!(
            "Wi-Fi:     {} ({})",
            config.link.ssid,
            config.link.interface.as_deref().unwrap_or("auto-detect")
        );
        println!("Broker:    {}:{}", config.mqtt.broker_host, config.mqtt.broker_port);
        println!("Client ID: {}", config.mqtt.effective_client_id());
        println!("Topic:     {}", config.mqtt.topic);
        println!("Interval:  {}s", config.telemetry.publish_interval_secs);
        println!("Restart:   {:?}", config.restart.mode);
        println!();
        Ok(())
    }

    fn test_broker(host: &str, port: u16) -> bool {
        let Ok(mut addrs) = (host, port).to_socket_addrs() else {
            return false;
        };
        addrs.any(|addr| {
            std::net::TcpStream::connect_timeout(&addr, Duration::from_secs(5)).is_ok()
        })
    }

    fn read_line() -> Result<String> {
        io::stdout().flush()?;
        let mut input = String::new();
        io::stdin().read_line(&mut input)?;
        Ok(input.trim().to_string())
    }

    fn prompt_with_default(prompt: &str, default: &str) -> Result<String> {
        print!("{} [{}]: ", prompt, default);
        let input = Self::read_line()?;

        if input.is_empty() {
            Ok(default.to_string())
        } else {
            Ok(input)
        }
    }

    fn prompt_with_default_parse<T: std::str::FromStr>(prompt: &str, default: &str) -> Result<T>
    where
        T::Err: std::fmt::Display,
    {
        loop {
            let input = Self::prompt_with_default(prompt, default)?;
            match input.parse::<T>() {
                Ok(value) => return Ok(value),
                Err(e) => println!("Invalid input: {}. Please try again.", e),
            }
        }
    }

    fn prompt_required(prompt: &str) -> Result<String> {
        loop {
            print!("{}: ", prompt);
            let input = Self::read_line()?;
            if !input.is_empty() {
                return Ok(input);
            }
            println!("A value is required.");
        }
    }

    fn prompt_optional(prompt: &str) -> Result<Option<String>> {
        print!("{}: ", prompt);
        let input = Self::read_line()?;
        Ok((!input.is_empty()).then_some(input))
    }

    fn prompt_yes_no(prompt: &str, default: bool) -> Result<bool> {
        let default_str = if default { "Y/n" } else { "y/N" };

        loop {
            print!("{} [{}]: ", prompt, default_str);
            let input = Self::read_line()?.to_lowercase();

            match input.as_str() {
                "" => return Ok(default),
                "y" | "yes" => return Ok(true),
                "n" | "no" => return Ok(false),
                _ => println!("Please enter 'y' or 'n'."),
            }
        }
    }

    fn prompt_password(prompt: &str) -> Result<Option<String>> {
        println!("WARNING: password input will be visible on screen.");
        Self::prompt_optional(prompt)
    }
}
