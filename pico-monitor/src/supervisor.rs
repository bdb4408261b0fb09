//! Process boundary: setup, loop, and the restart escalation tier
//!
//! Everything below this level recovers in place. What reaches the
//! supervisor (setup failure, persistent exhaustion, a panic escaping the
//! loop) is answered with a cool-down followed by a restart.

use crate::config::RestartMode;
use crate::error::FatalError;
use crate::link::LinkManager;
use crate::metrics::SensorReader;
use crate::orchestrator::TelemetryOrchestrator;
use crate::session::SessionPublisher;
use anyhow::{anyhow, Context, Result};
use futures::FutureExt;
use std::any::Any;
use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use tokio::process::Command as AsyncCommand;
use tracing::{error, info, warn};

/// Pause before restarting, so a crash loop cannot spin hot
pub const RESTART_COOLDOWN: Duration = Duration::from_secs(15);

/// Last-resort remediation
#[allow(async_fn_in_trait)]
pub trait Restarter {
    /// Restart from a cold state. Returns only if the restart could not
    /// be carried out, or was handed to something that completes later.
    async fn restart(&mut self, reason: &FatalError) -> Result<()>;
}

/// Restarter selected by [`RestartMode`]
pub struct SystemRestarter {
    mode: RestartMode,
}

impl SystemRestarter {
    pub fn new(mode: RestartMode) -> Self {
        Self { mode }
    }

    /// Replace this process image with a fresh copy of the agent
    fn reexec() -> Result<()> {
        let exe = std::env::current_exe().context("Failed to locate agent binary")?;
        let path = CString::new(exe.as_os_str().as_bytes())?;
        let args = std::env::args_os()
            .map(|arg| CString::new(arg.as_bytes()))
            .collect::<Result<Vec<_>, _>>()?;

        info!("Re-executing {}", exe.display());
        let never = nix::unistd::execv(&path, &args).context("Failed to re-exec agent")?;
        match never {}
    }

    async fn reboot() -> Result<()> {
        let output = AsyncCommand::new("sudo")
            .args(["reboot"])
            .output()
            .await
            .context("Failed to execute reboot command")?;

        if output.status.success() {
            info!("Reboot initiated");
            Ok(())
        } else {
            Err(anyhow!(
                "Reboot failed: {}",
                String::from_utf8_lossy(&output.stderr)
            ))
        }
    }
}

impl Restarter for SystemRestarter {
    async fn restart(&mut self, reason: &FatalError) -> Result<()> {
        warn!("Restarting ({:?}) after: {}", self.mode, reason);
        match self.mode {
            RestartMode::Process => Self::reexec(),
            RestartMode::Device => Self::reboot().await,
        }
    }
}

/// Owns the orchestrator and maps fatal outcomes to a restart
pub struct Supervisor<L, S, R, X> {
    orchestrator: TelemetryOrchestrator<L, S, R>,
    restarter: X,
    cooldown: Duration,
}

impl<L, S, R, X> Supervisor<L, S, R, X>
where
    L: LinkManager,
    S: SessionPublisher,
    R: SensorReader,
    X: Restarter,
{
    pub fn new(orchestrator: TelemetryOrchestrator<L, S, R>, restarter: X, cooldown: Duration) -> Self {
        Self {
            orchestrator,
            restarter,
            cooldown,
        }
    }

    pub fn orchestrator(&self) -> &TelemetryOrchestrator<L, S, R> {
        &self.orchestrator
    }

    /// Setup then loop; returns whatever ended the loop.
    ///
    /// A panic anywhere in setup or the loop comes back as
    /// [`FatalError::Escaped`].
    pub async fn drive(&mut self) -> FatalError {
        let orchestrator = &mut self.orchestrator;
        let supervised = async move {
            if let Err(fatal) = orchestrator.setup().await {
                error!("Init failed!");
                return fatal;
            }
            info!("System ready!");
            orchestrator.run().await
        };

        match AssertUnwindSafe(supervised).catch_unwind().await {
            Ok(fatal) => fatal,
            Err(payload) => FatalError::Escaped(panic_message(payload.as_ref())),
        }
    }

    /// Drive, cool down, restart
    pub async fn run(mut self) -> Result<()> {
        let fatal = self.drive().await;
        error!("Critical error: {}", fatal);

        warn!("Restart requested; cooling down for {:?}", self.cooldown);
        tokio::time::sleep(self.cooldown).await;

        self.restarter.restart(&fatal).await
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_message() {
        let boxed: Box<dyn Any + Send> = Box::new("sensor bus wedged");
        assert_eq!(panic_message(boxed.as_ref()), "sensor bus wedged");

        let owned: Box<dyn Any + Send> = Box::new(String::from("index out of range"));
        assert_eq!(panic_message(owned.as_ref()), "index out of range");

        let other: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(other.as_ref()), "non-string panic payload");
    }
}
