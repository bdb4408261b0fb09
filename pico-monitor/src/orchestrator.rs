//! Connectivity-resilient telemetry loop
//!
//! The orchestrator owns the only mutable state of the agent
//! ([`ConnectivityState`] plus the success-rate window) and drives the
//! collaborators strictly in layer order: link, then session, then work.
//!
//! Remediation tiers, cheapest first:
//! 1. per-call retry after a fixed backoff (link join, session open, publish)
//! 2. forced session reset after `failure_threshold` consecutive publish errors
//! 3. restart, once [`TelemetryOrchestrator::run`] hands a [`FatalError`]
//!    to the supervisor

use crate::config::AgentConfig;
use crate::error::{FatalError, SessionError, SnapshotError};
use crate::link::LinkManager;
use crate::metrics::{ConnectivityReadout, SensorReader, SuccessRate};
use crate::session::SessionPublisher;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Sleep between successful (or tolerated) work cycles
pub const PUBLISH_INTERVAL: Duration = Duration::from_secs(10);
/// Sleep after a failed association
pub const LINK_RETRY_BACKOFF: Duration = Duration::from_secs(10);
/// Sleep after a failed session open
pub const SESSION_RETRY_BACKOFF: Duration = Duration::from_secs(10);
/// Sleep after a forced session reset
pub const SESSION_RESET_BACKOFF: Duration = Duration::from_secs(5);
/// Sleep after a reclamation pass
pub const FAULT_BACKOFF: Duration = Duration::from_secs(5);
/// Consecutive publish errors that force a session reset
pub const FAILURE_THRESHOLD: u32 = 3;
/// Back-to-back exhaustion faults that escalate to a restart
pub const FAULT_ESCALATION_LIMIT: u32 = 2;

/// Backoffs and thresholds of the loop
#[derive(Debug, Clone, PartialEq)]
pub struct RecoveryPolicy {
    pub publish_interval: Duration,
    pub link_retry_backoff: Duration,
    pub session_retry_backoff: Duration,
    pub session_reset_backoff: Duration,
    pub fault_backoff: Duration,
    pub failure_threshold: u32,
    pub fault_escalation_limit: u32,
    pub success_window: usize,
}

impl Default for RecoveryPolicy {
    fn default() -> Self {
        Self {
            publish_interval: PUBLISH_INTERVAL,
            link_retry_backoff: LINK_RETRY_BACKOFF,
            session_retry_backoff: SESSION_RETRY_BACKOFF,
            session_reset_backoff: SESSION_RESET_BACKOFF,
            fault_backoff: FAULT_BACKOFF,
            failure_threshold: FAILURE_THRESHOLD,
            fault_escalation_limit: FAULT_ESCALATION_LIMIT,
            success_window: crate::metrics::rate::DEFAULT_WINDOW,
        }
    }
}

impl RecoveryPolicy {
    pub fn from_config(config: &AgentConfig) -> Self {
        let recovery = &config.recovery;
        Self {
            publish_interval: Duration::from_secs(config.telemetry.publish_interval_secs),
            link_retry_backoff: Duration::from_secs(recovery.link_retry_backoff_secs),
            session_retry_backoff: Duration::from_secs(recovery.session_retry_backoff_secs),
            session_reset_backoff: Duration::from_secs(recovery.session_reset_backoff_secs),
            fault_backoff: Duration::from_secs(recovery.fault_backoff_secs),
            failure_threshold: recovery.failure_threshold.max(1),
            fault_escalation_limit: recovery.fault_escalation_limit.max(1),
            success_window: recovery.success_window,
        }
    }
}

/// Connection bookkeeping; lives exactly as long as the process
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectivityState {
    pub link_associated: bool,
    pub session_open: bool,
    /// Successful re-associations inside the loop (setup not counted)
    pub reconnect_count: u32,
    /// Reset only by a successful publish
    pub consecutive_publish_errors: u32,
}

/// Where the loop stands, derived from [`ConnectivityState`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    LinkDown,
    SessionDown,
    Operational,
    /// Operational while the error counter sits at or above the threshold
    Degraded,
    /// The last iteration ran a reclamation pass
    Faulted,
}

/// Result of one iteration
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// Association succeeded; the session is repaired on the next step
    LinkRepaired,
    LinkRetry,
    SessionOpened,
    SessionRetry,
    Published,
    PublishFailed { consecutive_errors: u32 },
    /// Threshold reached and the session was force-closed
    SessionReset { consecutive_errors: u32 },
    /// Unexpected error in the work cycle; session force-closed
    CycleFailed { consecutive_errors: u32 },
    /// Resource exhaustion handled by a reclamation pass
    Faulted { headroom_bytes: u64 },
    Fatal(FatalError),
}

impl StepOutcome {
    /// Sleep that follows this outcome
    pub fn delay(&self, policy: &RecoveryPolicy) -> Duration {
        match self {
            StepOutcome::LinkRepaired | StepOutcome::SessionOpened | StepOutcome::Fatal(_) => {
                Duration::ZERO
            }
            StepOutcome::LinkRetry => policy.link_retry_backoff,
            StepOutcome::SessionRetry => policy.session_retry_backoff,
            StepOutcome::Published | StepOutcome::PublishFailed { .. } => policy.publish_interval,
            StepOutcome::SessionReset { .. } | StepOutcome::CycleFailed { .. } => {
                policy.session_reset_backoff
            }
            StepOutcome::Faulted { .. } => policy.fault_backoff,
        }
    }

    /// Whether this iteration ran a reclamation pass
    fn is_fault(&self) -> bool {
        matches!(self, StepOutcome::Faulted { .. } | StepOutcome::Fatal(_))
    }
}

/// The telemetry loop and its remediation policy
pub struct TelemetryOrchestrator<L, S, R> {
    link: L,
    session: S,
    sensors: R,
    policy: RecoveryPolicy,
    state: ConnectivityState,
    success_rate: SuccessRate,
    consecutive_faults: u32,
    faulted: bool,
}

impl<L, S, R> TelemetryOrchestrator<L, S, R>
where
    L: LinkManager,
    S: SessionPublisher,
    R: SensorReader,
{
    pub fn new(link: L, session: S, sensors: R, policy: RecoveryPolicy) -> Self {
        Self {
            link,
            session,
            sensors,
            success_rate: SuccessRate::new(policy.success_window),
            policy,
            state: ConnectivityState::default(),
            consecutive_faults: 0,
            faulted: false,
        }
    }

    pub fn state(&self) -> &ConnectivityState {
        &self.state
    }

    pub fn policy(&self) -> &RecoveryPolicy {
        &self.policy
    }

    pub fn success_rate(&self) -> f64 {
        self.success_rate.percent()
    }

    pub fn phase(&self) -> Phase {
        if self.faulted {
            Phase::Faulted
        } else if !self.state.link_associated {
            Phase::LinkDown
        } else if !self.state.session_open {
            Phase::SessionDown
        } else if self.state.consecutive_publish_errors >= self.policy.failure_threshold {
            Phase::Degraded
        } else {
            Phase::Operational
        }
    }

    /// First bring-up: one association and one session open, no retries
    pub async fn setup(&mut self) -> Result<(), FatalError> {
        info!("Setting up link and session...");

        if !self.link.is_associated() {
            if let Err(e) = self.link.associate().await {
                error!("Initial association failed: {}", e);
                return Err(FatalError::Setup(format!("link: {}", e)));
            }
        }
        self.state.link_associated = true;

        if let Err(e) = self.session.open().await {
            error!("Initial session open failed: {}", e);
            return Err(FatalError::Setup(format!("session: {}", e)));
        }
        self.state.session_open = true;

        Ok(())
    }

    /// Loop until an escalation asks for a restart
    pub async fn run(&mut self) -> FatalError {
        info!(
            "Entering telemetry loop (publish every {:?})",
            self.policy.publish_interval
        );

        loop {
            let outcome = self.step().await;
            if let StepOutcome::Fatal(fatal) = outcome {
                return fatal;
            }

            let delay = outcome.delay(&self.policy);
            if !delay.is_zero() {
                debug!("Sleeping {:?} after {:?}", delay, outcome);
                tokio::time::sleep(delay).await;
            }
        }
    }

    /// Run one iteration without sleeping
    pub async fn step(&mut self) -> StepOutcome {
        self.faulted = false;

        let outcome = self.iterate().await;
        if !outcome.is_fault() {
            self.consecutive_faults = 0;
        }
        outcome
    }

    async fn iterate(&mut self) -> StepOutcome {
        self.state.link_associated = self.link.is_associated();
        if !self.state.link_associated {
            return self.repair_link().await;
        }

        self.state.session_open = self.session.is_open();
        if !self.state.session_open {
            return self.repair_session().await;
        }

        self.work_cycle().await
    }

    async fn repair_link(&mut self) -> StepOutcome {
        if self.session.is_open() {
            warn!("Link lost under an open session, dropping the session");
            self.session.close().await;
        }
        self.state.session_open = false;

        info!("Reconnecting WiFi...");
        match self.link.associate().await {
            Ok(()) => {
                self.state.link_associated = true;
                self.state.reconnect_count = self.state.reconnect_count.saturating_add(1);
                info!(
                    reconnects = self.state.reconnect_count,
                    "Link associated, session repair next"
                );
                StepOutcome::LinkRepaired
            }
            Err(e) => {
                self.state.link_associated = false;
                warn!(
                    "Association failed: {}; retrying in {:?}",
                    e, self.policy.link_retry_backoff
                );
                StepOutcome::LinkRetry
            }
        }
    }

    async fn repair_session(&mut self) -> StepOutcome {
        info!("Reconnecting MQTT...");
        match self.session.open().await {
            Ok(()) => {
                self.state.session_open = true;
                info!("Session open, resuming publishing");
                StepOutcome::SessionOpened
            }
            Err(e) => {
                self.state.session_open = false;
                warn!(
                    "Session open failed: {}; retrying in {:?}",
                    e, self.policy.session_retry_backoff
                );
                StepOutcome::SessionRetry
            }
        }
    }

    async fn work_cycle(&mut self) -> StepOutcome {
        let readout = self.readout();
        let snapshot = match self.sensors.snapshot(readout) {
            Ok(snapshot) => snapshot,
            Err(SnapshotError::Exhausted(detail)) => return self.fault(detail),
            Err(SnapshotError::Unexpected(detail)) => return self.cycle_failed(detail).await,
        };
        debug!("Metrics: {:?}", snapshot);

        match self.session.publish(snapshot).await {
            Ok(()) => {
                self.state.consecutive_publish_errors = 0;
                self.success_rate.record(true);
                debug!(
                    success_rate = self.success_rate.percent(),
                    "Snapshot published"
                );
                StepOutcome::Published
            }
            Err(SessionError::Exhausted(detail)) => self.fault(detail),
            Err(SessionError::Encode(e)) => self.cycle_failed(e.to_string()).await,
            Err(e) => self.publish_failed(e).await,
        }
    }

    async fn publish_failed(&mut self, err: SessionError) -> StepOutcome {
        let errors = self.record_failure();
        self.state.session_open = self.session.is_open();

        if errors % self.policy.failure_threshold == 0 {
            warn!(
                consecutive_errors = errors,
                "Publish failed: {}; threshold reached, forcing session reset", err
            );
            self.force_close().await;
            StepOutcome::SessionReset {
                consecutive_errors: errors,
            }
        } else {
            warn!(
                consecutive_errors = errors,
                "Publish failed: {}; retrying next tick", err
            );
            StepOutcome::PublishFailed {
                consecutive_errors: errors,
            }
        }
    }

    async fn cycle_failed(&mut self, detail: String) -> StepOutcome {
        let errors = self.record_failure();
        warn!(
            consecutive_errors = errors,
            "Error: {}; resetting session", detail
        );
        self.force_close().await;
        StepOutcome::CycleFailed {
            consecutive_errors: errors,
        }
    }

    /// Reclaim, or escalate once `fault_escalation_limit` faults ran back to back.
    ///
    /// Any other outcome in between (a retry included) ends the streak.
    fn fault(&mut self, detail: String) -> StepOutcome {
        self.consecutive_faults += 1;
        let headroom_bytes = self.sensors.reclaim();
        warn!(
            "Resource exhaustion: {}; reclaimed memory, {} bytes available",
            detail, headroom_bytes
        );

        if self.consecutive_faults >= self.policy.fault_escalation_limit {
            error!(
                "Exhaustion persisted across {} reclamation passes",
                self.consecutive_faults
            );
            return StepOutcome::Fatal(FatalError::ResourceExhausted(detail));
        }

        self.faulted = true;
        StepOutcome::Faulted { headroom_bytes }
    }

    fn record_failure(&mut self) -> u32 {
        self.state.consecutive_publish_errors =
            self.state.consecutive_publish_errors.saturating_add(1);
        self.success_rate.record(false);
        self.state.consecutive_publish_errors
    }

    async fn force_close(&mut self) {
        self.session.close().await;
        self.state.session_open = false;
    }

    fn readout(&self) -> ConnectivityReadout {
        ConnectivityReadout {
            link: self.link.signal_metrics(),
            reconnect_count: self.state.reconnect_count,
            consecutive_publish_errors: self.state.consecutive_publish_errors,
            success_rate_percent: self.success_rate.percent(),
        }
    }
}
