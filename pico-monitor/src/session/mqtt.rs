//! MQTT session on `rumqttc`
//!
//! The event loop is polled inline by each call instead of on a spawned
//! task, so the session only makes progress while the orchestrator is
//! waiting on it.

use super::SessionPublisher;
use crate::config::MqttConfig;
use crate::error::SessionError;
use crate::metrics::MetricSnapshot;
use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, Incoming, MqttOptions,
    Outgoing, QoS,
};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info};

/// Bytes reserved up front for one encoded snapshot
const PAYLOAD_RESERVE: usize = 1024;
const CLOSE_FLUSH_TIMEOUT: Duration = Duration::from_secs(1);
const REQUEST_CHANNEL_CAPACITY: usize = 10;

struct Connection {
    client: AsyncClient,
    eventloop: EventLoop,
}

/// MQTT publisher for one fixed topic
pub struct MqttSession {
    client_id: String,
    broker_host: String,
    broker_port: u16,
    topic: String,
    qos: QoS,
    keep_alive: Duration,
    call_timeout: Duration,
    connection: Option<Connection>,
}

impl MqttSession {
    pub fn new(config: &MqttConfig) -> Self {
        Self {
            client_id: config.effective_client_id(),
            broker_host: config.broker_host.clone(),
            broker_port: config.broker_port,
            topic: config.topic.clone(),
            qos: if config.qos == 0 { QoS::AtMostOnce } else { QoS::AtLeastOnce },
            keep_alive: Duration::from_secs(config.keep_alive_secs.into()),
            call_timeout: Duration::from_secs(config.handshake_timeout_secs),
            connection: None,
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }
}

impl SessionPublisher for MqttSession {
    async fn open(&mut self) -> Result<(), SessionError> {
        self.close().await;

        let mut options = MqttOptions::new(&self.client_id, &self.broker_host, self.broker_port);
        options.set_keep_alive(self.keep_alive);
        options.set_clean_session(true);

        let (client, mut eventloop) = AsyncClient::new(options, REQUEST_CHANNEL_CAPACITY);

        match timeout(self.call_timeout, await_connack(&mut eventloop)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(SessionError::Timeout(self.call_timeout.as_secs())),
        }

        info!(
            "MQTT session open to {}:{} as {}",
            self.broker_host, self.broker_port, self.client_id
        );
        self.connection = Some(Connection { client, eventloop });
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.connection.is_some()
    }

    async fn publish(&mut self, snapshot: MetricSnapshot) -> Result<(), SessionError> {
        let Some(connection) = self.connection.as_mut() else {
            return Err(SessionError::NotOpen);
        };

        let payload = encode(&snapshot)?;
        let size = payload.len();
        let topic = self.topic.as_str();
        let qos = self.qos;

        let delivery = async {
            connection
                .client
                .try_publish(topic, qos, false, payload)
                .map_err(|e| SessionError::Transport(e.to_string()))?;
            await_delivery(&mut connection.eventloop, qos).await
        };

        let result = match timeout(self.call_timeout, delivery).await {
            Ok(result) => result,
            Err(_) => Err(SessionError::Timeout(self.call_timeout.as_secs())),
        };

        match result {
            Ok(()) => {
                debug!("Published {} bytes to {}", size, topic);
                Ok(())
            }
            Err(e) => {
                // A failed delivery leaves the connection in an unknown state
                self.connection = None;
                Err(e)
            }
        }
    }

    async fn close(&mut self) {
        let Some(mut connection) = self.connection.take() else {
            return;
        };

        if connection.client.try_disconnect().is_ok() {
            let _ = timeout(CLOSE_FLUSH_TIMEOUT, connection.eventloop.poll()).await;
        }
        debug!("MQTT session closed");
    }
}

/// JSON-encode a snapshot into a fallibly reserved buffer
pub(crate) fn encode(snapshot: &MetricSnapshot) -> Result<Vec<u8>, SessionError> {
    let mut buffer = Vec::new();
    buffer
        .try_reserve(PAYLOAD_RESERVE)
        .map_err(|e| SessionError::Exhausted(e.to_string()))?;
    serde_json::to_writer(&mut buffer, snapshot)?;
    Ok(buffer)
}

async fn await_connack(eventloop: &mut EventLoop) -> Result<(), SessionError> {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Incoming::ConnAck(ack))) => {
                return match ack.code {
                    ConnectReturnCode::Success => Ok(()),
                    code => Err(SessionError::Refused(format!("{:?}", code))),
                };
            }
            Ok(_) => {}
            Err(ConnectionError::ConnectionRefused(code)) => {
                return Err(SessionError::Refused(format!("{:?}", code)));
            }
            Err(e) => return Err(SessionError::Transport(e.to_string())),
        }
    }
}

/// Poll until the broker acknowledged (QoS 1) or the packet left (QoS 0)
async fn await_delivery(eventloop: &mut EventLoop, qos: QoS) -> Result<(), SessionError> {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Incoming::PubAck(_))) if qos == QoS::AtLeastOnce => return Ok(()),
            Ok(Event::Outgoing(Outgoing::Publish(_))) if qos == QoS::AtMostOnce => return Ok(()),
            Ok(Event::Incoming(Incoming::Disconnect)) => {
                return Err(SessionError::Transport("broker sent DISCONNECT".to_string()));
            }
            Ok(_) => {}
            Err(e) => return Err(SessionError::Transport(e.to_string())),
        }
    }
}
