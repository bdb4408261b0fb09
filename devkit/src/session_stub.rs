/*!
Fake pub/sub session

Behaves like a broker session riding on a [`FakeLink`]: it refuses to open
while the link is down, loses itself on transport errors (or on any failed
publish after [`FakeSession::drop_on_any_failure`]), and keeps every
delivered snapshot for assertions.
*/

use crate::link_stub::FakeLink;
use crate::test_utils::{Call, CallLog};
use pico_monitor::metrics::MetricSnapshot;
use pico_monitor::session::SessionPublisher;
use pico_monitor::SessionError;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct SessionState {
    open: bool,
    open_script: VecDeque<Result<(), SessionError>>,
    publish_script: VecDeque<Result<(), SessionError>>,
    published: Vec<MetricSnapshot>,
    close_calls: u32,
    drop_on_any_failure: bool,
}

#[derive(Clone)]
pub struct FakeSession {
    state: Arc<Mutex<SessionState>>,
    link: FakeLink,
    calls: CallLog,
}

impl FakeSession {
    pub fn new(link: FakeLink, calls: CallLog) -> Self {
        Self {
            state: Arc::new(Mutex::new(SessionState::default())),
            link,
            calls,
        }
    }

    /// Queue the result of the next open that reaches the broker
    pub fn script_open(&self, result: Result<(), SessionError>) -> &Self {
        self.state.lock().unwrap().open_script.push_back(result);
        self
    }

    /// Queue the result of the next publish on an open session
    pub fn script_publish(&self, result: Result<(), SessionError>) -> &Self {
        self.state.lock().unwrap().publish_script.push_back(result);
        self
    }

    /// Lose the session on every failed publish, the way `MqttSession`
    /// does, instead of only on transport errors
    pub fn drop_on_any_failure(&self) -> &Self {
        self.state.lock().unwrap().drop_on_any_failure = true;
        self
    }

    /// Broker side hang-up, invisible to the orchestrator until it looks
    pub fn hang_up(&self) {
        self.state.lock().unwrap().open = false;
    }

    pub fn published(&self) -> Vec<MetricSnapshot> {
        self.state.lock().unwrap().published.clone()
    }

    /// Last delivered snapshot as the collector would parse it
    pub fn last_payload_json(&self) -> Option<Value> {
        let state = self.state.lock().unwrap();
        state
            .published
            .last()
            .and_then(|snapshot| serde_json::to_value(snapshot).ok())
    }

    pub fn close_calls(&self) -> u32 {
        self.state.lock().unwrap().close_calls
    }
}

impl SessionPublisher for FakeSession {
    async fn open(&mut self) -> Result<(), SessionError> {
        let link_up = self.link.is_up();
        self.calls.record(Call::Open { link_up });

        let mut state = self.state.lock().unwrap();
        if !link_up {
            state.open = false;
            return Err(SessionError::LinkDown);
        }

        let result = state.open_script.pop_front().unwrap_or(Ok(()));
        state.open = result.is_ok();
        log::info!("🔌 [FAKE] Open: {:?}", result);
        result
    }

    fn is_open(&self) -> bool {
        self.state.lock().unwrap().open
    }

    async fn publish(&mut self, snapshot: MetricSnapshot) -> Result<(), SessionError> {
        let link_up = self.link.is_up();
        let mut state = self.state.lock().unwrap();
        self.calls.record(Call::Publish {
            link_up,
            session_open: state.open,
        });

        if !state.open {
            return Err(SessionError::NotOpen);
        }
        if !link_up {
            state.open = false;
            return Err(SessionError::Transport("network unreachable".to_string()));
        }

        let result = state.publish_script.pop_front().unwrap_or(Ok(()));
        match &result {
            Ok(()) => state.published.push(snapshot),
            Err(SessionError::Transport(_)) => state.open = false,
            Err(_) if state.drop_on_any_failure => state.open = false,
            Err(_) => {}
        }
        log::info!("📤 [FAKE] Publish: {:?}", result);
        result
    }

    async fn close(&mut self) {
        self.calls.record(Call::Close);
        let mut state = self.state.lock().unwrap();
        state.close_calls += 1;
        state.open = false;
    }
}
