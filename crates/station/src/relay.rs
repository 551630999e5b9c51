//! Relay outputs and status inputs.  The `gpio` feature gates the real rppal
//! driver; [`MockBoard`] keeps line state in memory for simulation and tests.

#![cfg_attr(feature = "gpio", allow(dead_code))]

use std::cell::Cell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use thiserror::Error;
use tracing::info;

#[cfg(feature = "gpio")]
use rppal::gpio::{Gpio, InputPin, OutputPin};

#[cfg(feature = "gpio")]
use crate::config::PinConfig;

// ---------------------------------------------------------------------------
// Logical lines
// ---------------------------------------------------------------------------

/// The digital lines the station drives or senses, by role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Line {
    PumpRelay,
    SirenRelay,
    /// Contactor feedback: is the pump actually energised.
    PumpStatus,
    /// Contactor feedback: is the siren actually sounding.
    AlarmStatus,
    WifiLed,
}

impl Line {
    pub const ALL: [Line; 5] = [
        Line::PumpRelay,
        Line::SirenRelay,
        Line::PumpStatus,
        Line::AlarmStatus,
        Line::WifiLed,
    ];

    pub fn is_output(self) -> bool {
        !matches!(self, Line::PumpStatus | Line::AlarmStatus)
    }
}

#[derive(Debug, Error)]
pub enum IoError {
    #[error("{0:?} is an input line")]
    NotAnOutput(Line),
    #[error("{line:?} unavailable: {reason}")]
    Unavailable { line: Line, reason: String },
}

/// Binary read/write access to the station's digital lines.
pub trait DigitalIo {
    fn read(&mut self, line: Line) -> Result<bool, IoError>;
    fn write(&mut self, line: Line, on: bool) -> Result<(), IoError>;
}

// ---------------------------------------------------------------------------
// Real GPIO board (requires rppal and Raspberry Pi hardware)
// ---------------------------------------------------------------------------
#[cfg(feature = "gpio")]
pub struct GpioBoard {
    pump_relay: OutputPin,
    siren_relay: OutputPin,
    wifi_led: OutputPin,
    pump_status: InputPin,
    alarm_status: InputPin,
    active_low: bool, // many relay boards are active-low
}

#[cfg(feature = "gpio")]
impl GpioBoard {
    pub fn new(pins: &PinConfig) -> anyhow::Result<Self> {
        let gpio = Gpio::new()?;
        let active_low = pins.relay_active_low;

        // Fail-safe: relays come up OFF.
        let relay = |pin: u8| -> anyhow::Result<OutputPin> {
            let p = gpio.get(pin)?;
            Ok(if active_low {
                p.into_output_high()
            } else {
                p.into_output_low()
            })
        };

        let board = Self {
            pump_relay: relay(pins.pump_relay)?,
            siren_relay: relay(pins.siren_relay)?,
            wifi_led: gpio.get(pins.wifi_led)?.into_output_low(),
            pump_status: gpio.get(pins.pump_status)?.into_input(),
            alarm_status: gpio.get(pins.alarm_status)?.into_input(),
            active_low,
        };

        info!(?pins, "gpio board initialised, relays off");
        Ok(board)
    }

    fn relay_mut(&mut self, line: Line) -> Option<&mut OutputPin> {
        match line {
            Line::PumpRelay => Some(&mut self.pump_relay),
            Line::SirenRelay => Some(&mut self.siren_relay),
            _ => None,
        }
    }
}

#[cfg(feature = "gpio")]
impl DigitalIo for GpioBoard {
    fn read(&mut self, line: Line) -> Result<bool, IoError> {
        Ok(match line {
            // active-low relay: LOW = ON
            Line::PumpRelay => self.pump_relay.is_set_high() != self.active_low,
            Line::SirenRelay => self.siren_relay.is_set_high() != self.active_low,
            Line::WifiLed => self.wifi_led.is_set_high(),
            Line::PumpStatus => self.pump_status.is_high(),
            Line::AlarmStatus => self.alarm_status.is_high(),
        })
    }

    fn write(&mut self, line: Line, on: bool) -> Result<(), IoError> {
        if line == Line::WifiLed {
            if on {
                self.wifi_led.set_high();
            } else {
                self.wifi_led.set_low();
            }
            return Ok(());
        }

        let active_low = self.active_low;
        let pin = self.relay_mut(line).ok_or(IoError::NotAnOutput(line))?;
        // Drive HIGH exactly when `on` differs from the polarity.
        if on != active_low {
            pin.set_high();
        } else {
            pin.set_low();
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// In-memory board (simulation and tests)
// ---------------------------------------------------------------------------

/// Line states held in memory.  Status inputs mirror their relays, as the
/// contactor feedback would on a healthy station.
pub struct MockBoard {
    outputs: HashMap<Line, bool>,
    faulty: HashSet<Line>,
    pump_load: Rc<Cell<bool>>,
}

impl Default for MockBoard {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBoard {
    pub fn new() -> Self {
        let outputs = Line::ALL
            .into_iter()
            .filter(|l| l.is_output())
            .map(|l| (l, false))
            .collect();
        info!("[mock-gpio] board initialised (no hardware), relays off");
        Self {
            outputs,
            faulty: HashSet::new(),
            pump_load: Rc::new(Cell::new(false)),
        }
    }

    /// Shared flag that follows the pump relay, for the current simulator.
    pub fn pump_load(&self) -> Rc<Cell<bool>> {
        Rc::clone(&self.pump_load)
    }

    /// Make every read and write of `line` fail.
    pub fn fail_line(&mut self, line: Line) {
        self.faulty.insert(line);
    }

    fn source_of(line: Line) -> Line {
        match line {
            Line::PumpStatus => Line::PumpRelay,
            Line::AlarmStatus => Line::SirenRelay,
            other => other,
        }
    }

    fn check(&self, line: Line) -> Result<(), IoError> {
        if self.faulty.contains(&line) {
            return Err(IoError::Unavailable {
                line,
                reason: "injected fault".into(),
            });
        }
        Ok(())
    }
}

impl DigitalIo for MockBoard {
    fn read(&mut self, line: Line) -> Result<bool, IoError> {
        self.check(line)?;
        Ok(self.outputs[&Self::source_of(line)])
    }

    fn write(&mut self, line: Line, on: bool) -> Result<(), IoError> {
        self.check(line)?;
        if !line.is_output() {
            return Err(IoError::NotAnOutput(line));
        }
        self.outputs.insert(line, on);
        if line == Line::PumpRelay {
            self.pump_load.set(on);
        }
        tracing::debug!(?line, on, "[mock-gpio] line set");
        Ok(())
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_board_starts_all_off() {
        let mut board = MockBoard::new();
        for line in Line::ALL {
            assert!(!board.read(line).unwrap(), "{line:?} should start off");
        }
    }

    #[test]
    fn mock_board_set_on_and_off() {
        let mut board = MockBoard::new();
        board.write(Line::SirenRelay, true).unwrap();
        assert!(board.read(Line::SirenRelay).unwrap());
        board.write(Line::SirenRelay, false).unwrap();
        assert!(!board.read(Line::SirenRelay).unwrap());
    }

    #[test]
    fn status_inputs_mirror_relays() {
        let mut board = MockBoard::new();
        board.write(Line::PumpRelay, true).unwrap();
        assert!(board.read(Line::PumpStatus).unwrap());
        assert!(!board.read(Line::AlarmStatus).unwrap());

        board.write(Line::SirenRelay, true).unwrap();
        assert!(board.read(Line::AlarmStatus).unwrap());
    }

    #[test]
    fn writing_an_input_is_rejected() {
        let mut board = MockBoard::new();
        assert!(matches!(
            board.write(Line::PumpStatus, true),
            Err(IoError::NotAnOutput(Line::PumpStatus))
        ));
    }

    #[test]
    fn pump_load_follows_pump_relay() {
        let mut board = MockBoard::new();
        let load = board.pump_load();
        board.write(Line::PumpRelay, true).unwrap();
        assert!(load.get());
        board.write(Line::SirenRelay, true).unwrap();
        board.write(Line::PumpRelay, false).unwrap();
        assert!(!load.get());
    }

    #[test]
    fn injected_fault_fails_reads_and_writes() {
        let mut board = MockBoard::new();
        board.fail_line(Line::AlarmStatus);
        board.fail_line(Line::PumpRelay);
        assert!(board.read(Line::AlarmStatus).is_err());
        assert!(board.write(Line::PumpRelay, true).is_err());
        // Other lines unaffected.
        assert!(board.read(Line::SirenRelay).is_ok());
    }
}
