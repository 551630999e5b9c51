//! MCP3208 12-bit SPI ADC driver for the current-sensor input.
//!
//! Single-ended reads, 3.3 V reference, so raw counts span `0..=4095` and map
//! directly onto the current sensor's conversion constants.  The command
//! encoding is pure and always compiled; the `rppal` driver is gated behind
//! the `gpio` feature.

#![cfg_attr(not(feature = "gpio"), allow(dead_code))]

#[cfg(feature = "gpio")]
use rppal::spi::{Bus, Mode, SlaveSelect, Spi};

#[cfg(feature = "gpio")]
use crate::sensor::{AnalogInput, SensorError};

// ── Command encoding ────────────────────────────────────────────────────────
//
// A conversion is one 3-byte full-duplex transfer:
//
//   TX: 0000 01SD  D1D0xx xxxx  xxxx xxxx
//       (S = start bit, single/diff bit, D2..D0 = channel)
//   RX: xxxx xxxx  xxx0 B11..B8  B7..B0

/// Start bit + single-ended mode.
const CMD_START_SINGLE: u8 = 0b0000_0110;

/// Maximum valid MCP3208 channel index (0–7 for single-ended).
pub const MAX_CHANNEL: u8 = 7;

/// SPI clock; the MCP3208 is rated for 1 MHz at 2.7 V.
#[cfg(feature = "gpio")]
const SPI_CLOCK_HZ: u32 = 1_000_000;

/// Build the TX frame for a single-ended conversion on `channel`.
fn command_for_channel(channel: u8) -> [u8; 3] {
    [
        CMD_START_SINGLE | (channel >> 2),
        (channel & 0b11) << 6,
        0x00,
    ]
}

/// Extract the 12-bit result from an RX frame.
fn decode_response(rx: [u8; 3]) -> u16 {
    (u16::from(rx[1] & 0x0F) << 8) | u16::from(rx[2])
}

// ── Driver ──────────────────────────────────────────────────────────────────

/// MCP3208 on SPI0/CE0, reading one fixed channel.
#[cfg(feature = "gpio")]
pub struct Mcp3208 {
    spi: Spi,
    channel: u8,
}

#[cfg(feature = "gpio")]
impl Mcp3208 {
    pub fn new(channel: u8) -> anyhow::Result<Self> {
        anyhow::ensure!(
            channel <= MAX_CHANNEL,
            "MCP3208 channel {channel} out of range (0–{MAX_CHANNEL})"
        );

        let spi = Spi::new(Bus::Spi0, SlaveSelect::Ss0, SPI_CLOCK_HZ, Mode::Mode0)?;

        tracing::info!(channel, clock_hz = SPI_CLOCK_HZ, "mcp3208 initialised");

        Ok(Self { spi, channel })
    }
}

#[cfg(feature = "gpio")]
impl AnalogInput for Mcp3208 {
    fn read_raw(&mut self) -> Result<u16, SensorError> {
        let tx = command_for_channel(self.channel);
        let mut rx = [0u8; 3];
        self.spi
            .transfer(&mut rx, &tx)
            .map_err(|e| SensorError::Read(e.to_string()))?;
        Ok(decode_response(rx))
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
