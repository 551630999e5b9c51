//! Command dispatch and status reporting.
//!
//! The controller owns the relay board, the current probe, and all control
//! state.  It never touches the transport: every operation returns the
//! [`Outbound`] message it wants published and the supervisor delivers it.
//! A relay toggle therefore stands even when its notification is lost.

use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::mqtt::{
    decode_topic, Command, LineState, Notification, Outbound, StatusMsg,
    PUMP_NOTIFICATION_TOPIC, SIREN_NOTIFICATION_TOPIC, STATUS_NOTIFICATION_TOPIC,
};
use crate::relay::{DigitalIo, IoError, Line};
use crate::sensor::CurrentProbe;
use crate::state::{Actuator, ControllerState};

pub struct Controller<B, P> {
    board: B,
    probe: P,
    frequency_hz: f64,
    state: ControllerState,
}

impl<B: DigitalIo, P: CurrentProbe> Controller<B, P> {
    pub fn new(board: B, probe: P, frequency_hz: f64, now: Instant) -> Self {
        Self {
            board,
            probe,
            frequency_hz,
            state: ControllerState::new(now),
        }
    }

    pub fn state(&self) -> &ControllerState {
        &self.state
    }

    #[cfg(test)]
    pub(crate) fn board_mut(&mut self) -> &mut B {
        &mut self.board
    }

    // -----------------------------------------------------------------------
    // Inbound
    // -----------------------------------------------------------------------

    /// Handle one inbound message.  Returns the notification to publish, if
    /// any.  Unknown topics and debounced repeats are dropped silently.
    pub fn dispatch(&mut self, topic: &str, now: Instant) -> Option<Outbound> {
        match decode_topic(topic) {
            Command::Siren => self.command(Actuator::Siren, now),
            Command::Pump => self.command(Actuator::Pump, now),
            Command::StatusRequest => {
                self.state.status.open(now);
                debug!(end = ?self.state.status.end_time(), "status window opened");
                None
            }
            Command::Unknown => None,
        }
    }

    fn command(&mut self, actuator: Actuator, now: Instant) -> Option<Outbound> {
        if !self.state.debounce.can_execute(actuator, now) {
            debug!(
                actuator = actuator.name(),
                last = ?self.state.debounce.last_accepted(&actuator),
                "debounced"
            );
            return None;
        }

        let on = match self.toggle(actuator) {
            Ok(on) => on,
            Err(e) => {
                error!(actuator = actuator.name(), "toggle failed: {e}");
                return None;
            }
        };
        info!(actuator = actuator.name(), on, "relay toggled");

        let (topic, data) = match (actuator, on) {
            (Actuator::Siren, true) => (SIREN_NOTIFICATION_TOPIC, "Sirena abilitata"),
            (Actuator::Siren, false) => (SIREN_NOTIFICATION_TOPIC, "Sirena disabilitata"),
            (Actuator::Pump, true) => (PUMP_NOTIFICATION_TOPIC, "Pompa attivata"),
            (Actuator::Pump, false) => (PUMP_NOTIFICATION_TOPIC, "Pompa disattivata"),
        };
        let body = Notification {
            data: format!("{data}: Eseguito con successo"),
        };

        match Outbound::json(topic, &body) {
            Ok(out) => Some(out),
            Err(e) => {
                error!(topic, "failed to encode notification: {e}");
                None
            }
        }
    }

    /// Invert a relay.  Returns the new state.
    fn toggle(&mut self, actuator: Actuator) -> Result<bool, IoError> {
        let line = actuator.relay();
        let on = !self.board.read(line)?;
        self.board.write(line, on)?;
        Ok(on)
    }

    // -----------------------------------------------------------------------
    // Status
    // -----------------------------------------------------------------------

    /// Read every line plus one current window.  Lines that cannot be read
    /// are reported as unknown; a failed current reading is reported as 0.
    pub fn snapshot(&mut self) -> StatusMsg {
        let mut label = |line: Line| {
            let read = self.board.read(line);
            if let Err(e) = &read {
                debug!(?line, "status read failed: {e}");
            }
            LineState::from(read)
        };

        let alarm_status = label(Line::AlarmStatus);
        let pump_status = label(Line::PumpStatus);
        let pump_relay = label(Line::PumpRelay);
        let siren_relay = label(Line::SirenRelay);

        let amps = self.probe.measure_rms(self.frequency_hz).unwrap_or_else(|e| {
            warn!("current reading failed, reporting 0: {e}");
            0.0
        });

        StatusMsg {
            alarm_status,
            pump_status,
            pump_relay,
            siren_relay,
            current: amps.to_string(),
        }
    }

    /// The status report for this tick, if the window is open and a second
    /// has passed since the last one.
    pub fn poll_status(&mut self, now: Instant) -> Option<Outbound> {
        if !self.state.status_due(now) {
            return None;
        }
        let msg = self.snapshot();
        match Outbound::json(STATUS_NOTIFICATION_TOPIC, &msg) {
            Ok(out) => Some(out),
            Err(e) => {
                error!("failed to encode status: {e}");
                None
            }
        }
    }

    pub fn poll_keepalive(&mut self, now: Instant) -> Option<Outbound> {
        self.state.keepalive_due(now).then(Outbound::ping)
    }

    pub fn set_wifi_indicator(&mut self, on: bool) {
        if let Err(e) = self.board.write(Line::WifiLed, on) {
            warn!("wifi indicator: {e}");
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
