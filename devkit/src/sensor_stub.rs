/*!
Fake sensor reader with fixed readings and scripted failures
*/

use pico_monitor::metrics::{
    ConnectivityReadout, EnvironmentMetrics, IdentityMetrics, MemoryMetrics, MetricSnapshot,
    SensorReader,
};
use pico_monitor::SnapshotError;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

pub const FAKE_UNIQUE_ID: &str = "e6614103e7";
pub const FAKE_VERSION: &str = "6.1.21-v8+";
pub const FAKE_HEADROOM_BYTES: u64 = 96 * 1024;

/// What the next snapshot call does
#[derive(Debug, Clone, PartialEq)]
pub enum SensorScript {
    Read,
    Exhausted,
    Unexpected(String),
    Panic(String),
}

#[derive(Default)]
struct SensorState {
    script: VecDeque<SensorScript>,
    readouts: Vec<ConnectivityReadout>,
    reclaims: u32,
}

#[derive(Clone, Default)]
pub struct FakeSensors {
    state: Arc<Mutex<SensorState>>,
}

impl FakeSensors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, step: SensorScript) -> &Self {
        self.state.lock().unwrap().script.push_back(step);
        self
    }

    pub fn reclaims(&self) -> u32 {
        self.state.lock().unwrap().reclaims
    }

    /// Readouts handed over by the orchestrator, one per snapshot call
    pub fn readouts(&self) -> Vec<ConnectivityReadout> {
        self.state.lock().unwrap().readouts.clone()
    }

    pub fn snapshot_calls(&self) -> usize {
        self.state.lock().unwrap().readouts.len()
    }
}

impl SensorReader for FakeSensors {
    fn snapshot(
        &mut self,
        connectivity: ConnectivityReadout,
    ) -> Result<MetricSnapshot, SnapshotError> {
        let step = {
            let mut state = self.state.lock().unwrap();
            state.readouts.push(connectivity.clone());
            state.script.pop_front().unwrap_or(SensorScript::Read)
        };

        match step {
            SensorScript::Read => MetricSnapshot::assemble(
                EnvironmentMetrics {
                    temperature_celsius: 27.45,
                    vsys_voltage: 4.98,
                    cpu_frequency_hz: 125_000_000,
                    uptime_seconds: 3_600,
                },
                MemoryMetrics::from_counts(150_000, 50_000),
                &IdentityMetrics {
                    unique_id: FAKE_UNIQUE_ID.to_string(),
                    version: FAKE_VERSION.to_string(),
                },
                &connectivity,
            ),
            SensorScript::Exhausted => Err(SnapshotError::Exhausted(
                "memory allocation failed, allocating 1024 bytes".to_string(),
            )),
            SensorScript::Unexpected(detail) => Err(SnapshotError::Unexpected(detail)),
            SensorScript::Panic(message) => panic!("{}", message),
        }
    }

    fn reclaim(&mut self) -> u64 {
        self.state.lock().unwrap().reclaims += 1;
        log::info!("🧹 [FAKE] Reclaim pass");
        FAKE_HEADROOM_BYTES
    }
}
