//! Sensor reader backed by sysfs and `sysinfo`

use super::{
    round2, ConnectivityReadout, EnvironmentMetrics, IdentityMetrics, MemoryMetrics,
    MetricSnapshot, SensorReader,
};
use crate::discovery::DeviceIdentity;
use crate::error::SnapshotError;
use std::path::{Path, PathBuf};
use std::time::Instant;
use sysinfo::{CpuRefreshKind, RefreshKind, System};
use tracing::debug;

const THERMAL_ZONE: &str = "/sys/class/thermal/thermal_zone0/temp";
const POWER_SUPPLY_DIR: &str = "/sys/class/power_supply";
const HWMON_DIR: &str = "/sys/class/hwmon";

/// A sysfs file holding a voltage in some sub-unit of volts
#[derive(Debug, Clone, PartialEq)]
pub struct VoltageSource {
    pub path: PathBuf,
    /// Multiplier turning the raw integer into volts
    pub scale: f64,
}

impl VoltageSource {
    /// `voltage_now` of a power supply (µV), else hwmon `in0_input` (mV)
    pub fn discover() -> Option<Self> {
        first_match(Path::new(POWER_SUPPLY_DIR), "voltage_now")
            .map(|path| Self { path, scale: 1e-6 })
            .or_else(|| {
                first_match(Path::new(HWMON_DIR), "in0_input").map(|path| Self { path, scale: 1e-3 })
            })
    }
}

/// Host sensor reader
pub struct SystemSensors {
    system: System,
    started: Instant,
    identity: IdentityMetrics,
    thermal_path: PathBuf,
    voltage: Option<VoltageSource>,
}

impl SystemSensors {
    pub fn new(identity: DeviceIdentity) -> Self {
        Self {
            system: Self::fresh_system(),
            started: Instant::now(),
            identity: IdentityMetrics {
                unique_id: identity.unique_id,
                version: identity.version,
            },
            thermal_path: PathBuf::from(THERMAL_ZONE),
            voltage: VoltageSource::discover(),
        }
    }

    /// Read temperature and voltage from explicit files
    pub fn with_sources(mut self, thermal_path: PathBuf, voltage: Option<VoltageSource>) -> Self {
        self.thermal_path = thermal_path;
        self.voltage = voltage;
        self
    }

    fn fresh_system() -> System {
        System::new_with_specifics(RefreshKind::new().with_cpu(CpuRefreshKind::new()))
    }

    /// Processor temperature in °C, 0.0 when unreadable
    fn temperature(&self) -> f64 {
        match read_integer(&self.thermal_path) {
            Some(millidegrees) => round2(millidegrees as f64 / 1000.0),
            None => {
                debug!("No temperature at {}", self.thermal_path.display());
                0.0
            }
        }
    }

    /// Supply voltage in V, 0.0 when unreadable
    fn supply_voltage(&self) -> f64 {
        self.voltage
            .as_ref()
            .and_then(|source| read_integer(&source.path).map(|raw| raw as f64 * source.scale))
            .map(round2)
            .unwrap_or(0.0)
    }

    fn cpu_frequency_hz(&mut self) -> u64 {
        self.system
            .refresh_cpu_specifics(CpuRefreshKind::new().with_frequency());
        self.system
            .cpus()
            .first()
            .map(|cpu| cpu.frequency() * 1_000_000)
            .unwrap_or(0)
    }

    fn memory(&mut self) -> MemoryMetrics {
        self.system.refresh_memory();
        let total = self.system.total_memory();
        let free = self.system.available_memory().min(total);
        MemoryMetrics::from_counts(free, total - free)
    }
}

impl SensorReader for SystemSensors {
    fn snapshot(
        &mut self,
        connectivity: ConnectivityReadout,
    ) -> Result<MetricSnapshot, SnapshotError> {
        let environment = EnvironmentMetrics {
            temperature_celsius: self.temperature(),
            vsys_voltage: self.supply_voltage(),
            cpu_frequency_hz: self.cpu_frequency_hz(),
            uptime_seconds: self.started.elapsed().as_secs(),
        };
        let memory = self.memory();

        MetricSnapshot::assemble(environment, memory, &self.identity, &connectivity)
    }

    fn reclaim(&mut self) -> u64 {
        // Dropping the cached System releases its per-CPU and process tables
        self.system = Self::fresh_system();
        self.identity.unique_id.shrink_to_fit();
        self.identity.version.shrink_to_fit();

        self.system.refresh_memory();
        self.system.available_memory()
    }
}

fn read_integer(path: &Path) -> Option<i64> {
    std::fs::read_to_string(path).ok()?.trim().parse().ok()
}

/// First `<dir>/<entry>/<file>` that exists, in sorted entry order
fn first_match(dir: &Path, file: &str) -> Option<PathBuf> {
    let mut candidates: Vec<PathBuf> = std::fs::read_dir(dir)
        .ok()?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path().join(file))
        .filter(|path| path.exists())
        .collect();
    candidates.sort();
    candidates.into_iter().next()
}
