//! Pub/sub session over an established link
//!
//! A session is opened, used for single best-effort publishes and closed.
//! It never retries on its own.

mod mqtt;

pub use mqtt::MqttSession;

use crate::error::SessionError;
use crate::metrics::MetricSnapshot;

/// Pub/sub session lifecycle
#[allow(async_fn_in_trait)]
pub trait SessionPublisher {
    /// Handshake with the broker over an already associated link
    async fn open(&mut self) -> Result<(), SessionError>;

    fn is_open(&self) -> bool;

    /// Send exactly one message.
    ///
    /// On a transport failure the session must report closed afterwards.
    async fn publish(&mut self, snapshot: MetricSnapshot) -> Result<(), SessionError>;

    /// Tear down the session; safe to call when already closed
    async fn close(&mut self);
}
