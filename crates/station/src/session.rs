//! Messaging session: the narrow pub/sub interface the supervisor drives, and
//! its `rumqttc` implementation.
//!
//! A session is owned by exactly one supervisor cycle.  Any error from
//! `check_messages` means the session is dead and must be torn down.

use std::time::Duration;

use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use thiserror::Error;
use tokio::time::timeout;
use tracing::debug;

use crate::config::MqttSettings;

/// How long to wait for the broker's CONNACK.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Broker-level keep-alive, independent of the application ping.
const MQTT_KEEP_ALIVE: Duration = Duration::from_secs(30);

/// Idle time after which `check_messages` decides nothing more is buffered.
const POLL_BUDGET: Duration = Duration::from_millis(10);

/// Upper bound on messages drained per `check_messages` call.
const MAX_BATCH: usize = 16;

const DISCONNECT_FLUSH: Duration = Duration::from_millis(500);

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("mqtt client error: {0}")]
    Client(#[from] rumqttc::ClientError),
    #[error("mqtt connection error: {0}")]
    Connection(#[from] rumqttc::ConnectionError),
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),
    #[error("broker closed the session")]
    Closed,
}

/// An inbound publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inbound {
    pub topic: String,
    pub payload: Vec<u8>,
}

#[allow(async_fn_in_trait)]
pub trait Session {
    async fn subscribe(&mut self, topic: &str) -> Result<(), TransportError>;
    async fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), TransportError>;
    /// Non-blocking: return whatever inbound messages are already buffered.
    async fn check_messages(&mut self) -> Result<Vec<Inbound>, TransportError>;
    async fn disconnect(&mut self) -> Result<(), TransportError>;
}

/// Opens sessions against a broker.
#[allow(async_fn_in_trait)]
pub trait Connector {
    type Session: Session;

    async fn connect(&mut self, settings: &MqttSettings) -> Result<Self::Session, TransportError>;
}

// ---------------------------------------------------------------------------
// rumqttc implementation
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MqttConnector;

pub struct MqttSession {
    client: AsyncClient,
    eventloop: EventLoop,
}

impl Connector for MqttConnector {
    type Session = MqttSession;

    async fn connect(&mut self, settings: &MqttSettings) -> Result<MqttSession, TransportError> {
        let mut options = MqttOptions::new(&settings.client_id, &settings.server, settings.port);
        options.set_keep_alive(MQTT_KEEP_ALIVE);
        options.set_clean_session(true);
        if let Some(user) = &settings.user {
            options.set_credentials(user, settings.password.as_deref().unwrap_or_default());
        }

        let (client, mut eventloop) = AsyncClient::new(options, 20);

        let connack = async {
            loop {
                if let Event::Incoming(Packet::ConnAck(ack)) = eventloop.poll().await? {
                    debug!(code = ?ack.code, "connack received");
                    return Ok::<_, TransportError>(());
                }
            }
        };
        timeout(CONNECT_TIMEOUT, connack)
            .await
            .map_err(|_| TransportError::Timeout("connack"))??;

        Ok(MqttSession { client, eventloop })
    }
}

impl Session for MqttSession {
    async fn subscribe(&mut self, topic: &str) -> Result<(), TransportError> {
        self.client.subscribe(topic, QoS::AtMostOnce).await?;
        Ok(())
    }

    async fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), TransportError> {
        self.client
            .publish(topic, QoS::AtMostOnce, false, payload.to_vec())
            .await?;
        Ok(())
    }

    async fn check_messages(&mut self) -> Result<Vec<Inbound>, TransportError> {
        let mut inbound = Vec::new();

        // Each poll drives one network event (incoming packet, queued outgoing
        // request, or keep-alive).  Stop once the loop has been idle for the
        // poll budget.
        while inbound.len() < MAX_BATCH {
            match timeout(POLL_BUDGET, self.eventloop.poll()).await {
                Err(_) => break,
                Ok(Ok(Event::Incoming(Packet::Publish(p)))) => inbound.push(Inbound {
                    topic: p.topic.clone(),
                    payload: p.payload.to_vec(),
                }),
                Ok(Ok(Event::Incoming(Packet::Disconnect))) => return Err(TransportError::Closed),
                Ok(Ok(_)) => {}
                Ok(Err(e)) => return Err(e.into()),
            }
        }

        Ok(inbound)
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        self.client.disconnect().await?;
        // Drive the event loop so the DISCONNECT packet actually goes out.
        match timeout(DISCONNECT_FLUSH, self.eventloop.poll()).await {
            Ok(Err(e)) => debug!("event loop closed during disconnect: {e}"),
            Ok(Ok(_)) | Err(_) => {}
        }
        Ok(())
    }
}

// ===========================================================================
// Tests
// ===========================================================================
