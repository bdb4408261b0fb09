/*!
Test harness for the telemetry loop

Provides:
- A shared, ordered log of collaborator calls
- A recording restarter for the supervisor
- A harness that wires fakes to an orchestrator under the default policy
*/

use crate::link_stub::FakeLink;
use crate::sensor_stub::FakeSensors;
use crate::session_stub::FakeSession;
use anyhow::Result;
use pico_monitor::orchestrator::{RecoveryPolicy, TelemetryOrchestrator};
use pico_monitor::supervisor::{Restarter, Supervisor};
use pico_monitor::FatalError;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// One collaborator call, with the layer state observed when it happened
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Associate,
    Open { link_up: bool },
    Publish { link_up: bool, session_open: bool },
    Close,
}

#[derive(Clone, Default)]
pub struct CallLog {
    calls: Arc<Mutex<Vec<Call>>>,
}

impl CallLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, predicate: impl Fn(&Call) -> bool) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| predicate(c)).count()
    }

    pub fn clear(&self) {
        self.calls.lock().unwrap().clear();
    }
}

/// Records restart requests instead of carrying them out
#[derive(Clone, Default)]
pub struct FakeRestarter {
    reasons: Arc<Mutex<Vec<FatalError>>>,
}

impl FakeRestarter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reasons(&self) -> Vec<FatalError> {
        self.reasons.lock().unwrap().clone()
    }
}

impl Restarter for FakeRestarter {
    async fn restart(&mut self, reason: &FatalError) -> Result<()> {
        log::warn!("🔄 [FAKE] Restart requested: {}", reason);
        self.reasons.lock().unwrap().push(reason.clone());
        Ok(())
    }
}

pub type FakeOrchestrator = TelemetryOrchestrator<FakeLink, FakeSession, FakeSensors>;
pub type FakeSupervisor = Supervisor<FakeLink, FakeSession, FakeSensors, FakeRestarter>;

/// Fakes sharing one call log; clones of them stay usable after the
/// orchestrator takes ownership
pub struct TestHarness {
    pub calls: CallLog,
    pub link: FakeLink,
    pub session: FakeSession,
    pub sensors: FakeSensors,
    pub restarter: FakeRestarter,
    pub policy: RecoveryPolicy,
}

impl TestHarness {
    /// Link starts down
    pub fn new() -> Self {
        env_logger::try_init().ok();

        let calls = CallLog::new();
        let link = FakeLink::new(calls.clone());
        let session = FakeSession::new(link.clone(), calls.clone());

        Self {
            calls,
            link,
            session,
            sensors: FakeSensors::new(),
            restarter: FakeRestarter::new(),
            policy: RecoveryPolicy::default(),
        }
    }

    pub fn orchestrator(&self) -> FakeOrchestrator {
        TelemetryOrchestrator::new(
            self.link.clone(),
            self.session.clone(),
            self.sensors.clone(),
            self.policy.clone(),
        )
    }

    /// Orchestrator after a successful setup; the call log starts empty
    pub async fn connected(&self) -> FakeOrchestrator {
        let mut orchestrator = self.orchestrator();
        if let Err(e) = orchestrator.setup().await {
            panic!("setup against fakes failed: {}", e);
        }
        self.calls.clear();
        orchestrator
    }

    pub fn supervisor(&self, cooldown: Duration) -> FakeSupervisor {
        Supervisor::new(self.orchestrator(), self.restarter.clone(), cooldown)
    }

    /// Read a top-level field of the last delivered payload
    pub fn last_field(&self, field: &str) -> Option<serde_json::Value> {
        self.session
            .last_payload_json()
            .and_then(|payload| payload.get(field).cloned())
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
