use serde::Serialize;

use crate::relay::IoError;

// ---------------------------------------------------------------------------
// Topics
// ---------------------------------------------------------------------------

pub(crate) const SIREN_TOPIC: &str = "api/water_tank/siren";
pub(crate) const PUMP_TOPIC: &str = "api/water_tank/pump";
pub(crate) const STATUS_TOPIC: &str = "api/water_tank/status";

/// Everything the station subscribes to.
pub(crate) const INBOUND_TOPICS: [&str; 3] = [SIREN_TOPIC, PUMP_TOPIC, STATUS_TOPIC];

pub(crate) const SIREN_NOTIFICATION_TOPIC: &str = "api/notification/siren";
pub(crate) const PUMP_NOTIFICATION_TOPIC: &str = "api/notification/pump";
pub(crate) const STATUS_NOTIFICATION_TOPIC: &str = "api/notification/water_tank/status";
pub(crate) const PING_TOPIC: &str = "api/ping";
pub(crate) const PING_PAYLOAD: &[u8] = b"ping";

// ---------------------------------------------------------------------------
// Inbound commands
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Command {
    Siren,
    Pump,
    StatusRequest,
    Unknown,
}

/// Map an inbound topic to a command.  Payloads carry no information; any
/// message on a command topic is a trigger.
pub(crate) fn decode_topic(topic: &str) -> Command {
    match topic {
        SIREN_TOPIC => Command::Siren,
        PUMP_TOPIC => Command::Pump,
        STATUS_TOPIC => Command::StatusRequest,
        _ => Command::Unknown,
    }
}

// ---------------------------------------------------------------------------
// Outbound payloads
// ---------------------------------------------------------------------------

/// `{"data": "..."}` acknowledgement published after a relay toggle.
#[derive(Debug, Serialize)]
pub(crate) struct Notification {
    pub(crate) data: String,
}

/// Tri-state label for a digital line in the status report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub(crate) enum LineState {
    #[serde(rename = "attivo")]
    Active,
    #[serde(rename = "disattivo")]
    Inactive,
    #[serde(rename = "sconosciuto")]
    Unknown,
}

impl From<Result<bool, IoError>> for LineState {
    fn from(read: Result<bool, IoError>) -> Self {
        match read {
            Ok(true) => Self::Active,
            Ok(false) => Self::Inactive,
            Err(_) => Self::Unknown,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct StatusMsg {
    pub(crate) alarm_status: LineState,
    pub(crate) pump_status: LineState,
    pub(crate) pump_relay: LineState,
    pub(crate) siren_relay: LineState,
    /// Amps, formatted as a plain number ("0", "4.87").
    pub(crate) current: String,
}

/// A message ready to hand to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Outbound {
    pub(crate) topic: &'static str,
    pub(crate) payload: Vec<u8>,
}

impl Outbound {
    pub(crate) fn ping() -> Self {
        Self {
            topic: PING_TOPIC,
            payload: PING_PAYLOAD.to_vec(),
        }
    }

    pub(crate) fn json<T: Serialize>(topic: &'static str, body: &T) -> serde_json::Result<Self> {
        Ok(Self {
            topic,
            payload: serde_json::to_vec(body)?,
        })
    }
}

// ===========================================================================
// Tests
// ===========================================================================
