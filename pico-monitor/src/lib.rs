//! Pico Monitor - resident telemetry agent for a single Wi-Fi device
//!
//! The agent samples onboard sensors and link state, then publishes one
//! flat JSON snapshot per tick to an MQTT collector:
//! - Link layer: Wi-Fi station association ([`link`])
//! - Session layer: MQTT connect/publish ([`session`])
//! - Sensors: temperature, supply voltage, clock, memory, identity ([`metrics`])
//! - Recovery loop: layered repair and escalation ([`orchestrator`], [`supervisor`])

pub mod config;
pub mod discovery;
pub mod error;
pub mod link;
pub mod metrics;
pub mod orchestrator;
pub mod session;
pub mod supervisor;

pub use config::AgentConfig;
pub use error::{FatalError, LinkError, SessionError, SnapshotError};
pub use link::{LinkManager, LinkMetrics, LinkStatus};
pub use metrics::{ConnectivityReadout, MetricSnapshot, SensorReader};
pub use orchestrator::{ConnectivityState, Phase, RecoveryPolicy, StepOutcome, TelemetryOrchestrator};
pub use session::SessionPublisher;
pub use supervisor::{Restarter, Supervisor};
