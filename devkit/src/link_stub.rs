/*!
Fake station link

Association results are scripted; every clone shares the same state, so a
test keeps one handle while the orchestrator owns another and can drop the
link under it at any point.
*/

use crate::test_utils::{Call, CallLog};
use pico_monitor::link::{LinkManager, LinkMetrics, LinkStatus};
use pico_monitor::LinkError;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

pub const FAKE_MAC: &str = "28:cd:c1:0a:1b:2c";
pub const FAKE_IP: &str = "192.168.4.17";
pub const FAKE_RSSI_DBM: i32 = -58;

#[derive(Default)]
struct LinkState {
    associated: bool,
    status: Option<LinkStatus>,
    script: VecDeque<Result<(), LinkError>>,
    panic_next: Option<String>,
    attempts: u32,
}

#[derive(Clone)]
pub struct FakeLink {
    state: Arc<Mutex<LinkState>>,
    calls: CallLog,
}

impl FakeLink {
    /// A link that starts disassociated; unscripted joins succeed
    pub fn new(calls: CallLog) -> Self {
        Self {
            state: Arc::new(Mutex::new(LinkState::default())),
            calls,
        }
    }

    /// A link that is already up
    pub fn up(calls: CallLog) -> Self {
        let link = Self::new(calls);
        link.restore();
        link
    }

    /// Queue the result of the next association attempt
    pub fn script(&self, result: Result<(), LinkError>) -> &Self {
        self.state.lock().unwrap().script.push_back(result);
        self
    }

    /// Make the next `count` association attempts time out
    pub fn fail_next(&self, count: usize) -> &Self {
        for _ in 0..count {
            self.script(Err(LinkError::Timeout(20)));
        }
        self
    }

    /// Make the next association attempt panic, as a wedged driver binding would
    pub fn panic_next(&self, message: &str) -> &Self {
        self.state.lock().unwrap().panic_next = Some(message.to_string());
        self
    }

    /// Lose the access point
    pub fn drop_link(&self) {
        let mut state = self.state.lock().unwrap();
        state.associated = false;
        state.status = Some(LinkStatus::Idle);
        log::info!("📉 [FAKE] Link dropped");
    }

    /// Come back without an association attempt
    pub fn restore(&self) {
        let mut state = self.state.lock().unwrap();
        state.associated = true;
        state.status = Some(LinkStatus::GotIp);
    }

    pub fn is_up(&self) -> bool {
        self.state.lock().unwrap().associated
    }

    pub fn attempts(&self) -> u32 {
        self.state.lock().unwrap().attempts
    }
}

impl LinkManager for FakeLink {
    async fn associate(&mut self) -> Result<(), LinkError> {
        self.calls.record(Call::Associate);

        let panic_message = self.state.lock().unwrap().panic_next.take();
        if let Some(message) = panic_message {
            panic!("{}", message);
        }

        let mut state = self.state.lock().unwrap();
        state.attempts += 1;
        let result = state.script.pop_front().unwrap_or(Ok(()));
        match &result {
            Ok(()) => {
                state.associated = true;
                state.status = Some(LinkStatus::GotIp);
            }
            Err(e) => {
                state.associated = false;
                state.status = Some(LinkStatus::from_error(e));
            }
        }
        log::info!("📶 [FAKE] Associate #{}: {:?}", state.attempts, result);
        result
    }

    fn is_associated(&self) -> bool {
        self.is_up()
    }

    fn signal_metrics(&self) -> LinkMetrics {
        let state = self.state.lock().unwrap();
        if !state.associated {
            return LinkMetrics::disconnected(state.status.unwrap_or(LinkStatus::Idle));
        }
        LinkMetrics {
            associated: true,
            status: LinkStatus::GotIp,
            rssi_dbm: FAKE_RSSI_DBM,
            mac: FAKE_MAC.to_string(),
            ip: FAKE_IP.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pico_monitor::link::{IP_SENTINEL, RSSI_SENTINEL_DBM};

    #[tokio::test]
    async fn test_scripted_association() {
        let calls = CallLog::new();
        let mut link = FakeLink::new(calls.clone());
        link.fail_next(1).script(Err(LinkError::BadAuth));

        assert!(link.associate().await.is_err());
        assert!(matches!(link.associate().await, Err(LinkError::BadAuth)));
        assert_eq!(link.signal_metrics().status, LinkStatus::BadAuth);

        assert!(link.associate().await.is_ok());
        assert!(link.is_associated());
        assert_eq!(link.attempts(), 3);
        assert_eq!(calls.count(|c| matches!(c, Call::Associate)), 3);
    }

    #[test]
    fn test_metrics_follow_association() {
        let link = FakeLink::up(CallLog::new());
        assert_eq!(link.signal_metrics().rssi_dbm, FAKE_RSSI_DBM);

        let handle = link.clone();
        handle.drop_link();
        let metrics = link.signal_metrics();
        assert!(!metrics.associated);
        assert_eq!(metrics.rssi_dbm, RSSI_SENTINEL_DBM);
        assert_eq!(metrics.ip, IP_SENTINEL);
    }
}
