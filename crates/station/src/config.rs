//! TOML config loading and validation: Wi-Fi and broker credentials, pin
//! assignments, and current-sensor parameters.  Loaded once at startup.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashSet;

use crate::adc::MAX_CHANNEL;
use crate::sensor::{DEFAULT_FREQUENCY_HZ, DEFAULT_SENSITIVITY};

// ---------------------------------------------------------------------------
// Config file structures
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct Config {
    pub wifi: WifiSettings,
    pub mqtt: MqttSettings,
    #[serde(default)]
    pub pins: PinConfig,
    #[serde(default)]
    pub sensor: SensorSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WifiSettings {
    pub ssid: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MqttSettings {
    pub server: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    pub client_id: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

/// BCM pin numbers for each logical line, plus the ADC channel of the
/// current sensor.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PinConfig {
    pub pump_relay: u8,
    pub siren_relay: u8,
    pub pump_status: u8,
    pub alarm_status: u8,
    pub wifi_led: u8,
    pub adc_channel: u8,
    /// Many common relay boards are active-low.  If yours is active-high,
    /// set false.
    pub relay_active_low: bool,
}

impl Default for PinConfig {
    fn default() -> Self {
        Self {
            pump_relay: 18,
            siren_relay: 19,
            pump_status: 16,
            alarm_status: 17,
            wifi_led: 27,
            adc_channel: 0,
            relay_active_low: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SensorSettings {
    /// Amps per ADC-volt.
    pub sensitivity: f64,
    pub frequency_hz: f64,
}

impl Default for SensorSettings {
    fn default() -> Self {
        Self {
            sensitivity: DEFAULT_SENSITIVITY,
            frequency_hz: DEFAULT_FREQUENCY_HZ,
        }
    }
}

fn default_mqtt_port() -> u16 {
    1883
}

// ---------------------------------------------------------------------------
// GPIO whitelist
// ---------------------------------------------------------------------------

/// BCM GPIO pins available on the Raspberry Pi 40-pin header for general
/// use. GPIO 0-1 are reserved for the ID EEPROM and must never be used.
/// GPIO 28+ are not exposed on the standard header.
const VALID_GPIO_PINS: std::ops::RangeInclusive<u8> = 2..=27;

/// SPI0 pins claimed by the MCP3208 (CE0, MISO, MOSI, SCLK).
const SPI0_PINS: [u8; 4] = [8, 9, 10, 11];

// ---------------------------------------------------------------------------
// Environment overrides
// ---------------------------------------------------------------------------

impl Config {
    /// Apply `MQTT_HOST`, `MQTT_PORT`, `MQTT_PASSWORD` and `WIFI_PASSWORD`
    /// overrides.  Secrets can then stay out of the file.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(host) = lookup("MQTT_HOST") {
            self.mqtt.server = host;
        }
        if let Some(port) = lookup("MQTT_PORT").and_then(|s| s.parse().ok()) {
            self.mqtt.port = port;
        }
        if let Some(pw) = lookup("MQTT_PASSWORD") {
            self.mqtt.password = Some(pw);
        }
        if let Some(pw) = lookup("WIFI_PASSWORD") {
            self.wifi.password = pw;
        }
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl Config {
    /// Validate all config entries. Returns `Ok(())` or an error describing
    /// every violation found (not just the first one).
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        self.validate_network(&mut errors);
        self.validate_pins(&mut errors);
        self.validate_sensor(&mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            bail!(
                "config validation failed ({} error{}):\n  - {}",
                errors.len(),
                if errors.len() == 1 { "" } else { "s" },
                errors.join("\n  - ")
            );
        }
    }

    fn validate_network(&self, errors: &mut Vec<String>) {
        if self.wifi.ssid.trim().is_empty() {
            errors.push("wifi: ssid is empty".into());
        }
        if self.mqtt.server.trim().is_empty() {
            errors.push("mqtt: server is empty".into());
        }
        if self.mqtt.port == 0 {
            errors.push("mqtt: port must be non-zero".into());
        }
        if self.mqtt.client_id.trim().is_empty() {
            errors.push("mqtt: client_id is empty".into());
        }
        if self.mqtt.password.is_some() && self.mqtt.user.is_none() {
            errors.push("mqtt: password set without user".into());
        }
    }

    fn validate_pins(&self, errors: &mut Vec<String>) {
        let p = &self.pins;
        let mut seen: HashSet<u8> = HashSet::new();

        for (role, pin) in [
            ("pump_relay", p.pump_relay),
            ("siren_relay", p.siren_relay),
            ("pump_status", p.pump_status),
            ("alarm_status", p.alarm_status),
            ("wifi_led", p.wifi_led),
        ] {
            if !VALID_GPIO_PINS.contains(&pin) {
                errors.push(format!(
                    "pins: {role} {pin} is not a valid BCM GPIO pin (allowed: 2-27)"
                ));
            } else if SPI0_PINS.contains(&pin) {
                errors.push(format!("pins: {role} {pin} is reserved for the SPI0 ADC"));
            } else if !seen.insert(pin) {
                errors.push(format!("pins: {role} {pin} is already used by another line"));
            }
        }

        if p.adc_channel > MAX_CHANNEL {
            errors.push(format!(
                "pins: adc_channel {} out of MCP3208 range [0, {MAX_CHANNEL}]",
                p.adc_channel
            ));
        }
    }

    fn validate_sensor(&self, errors: &mut Vec<String>) {
        let s = &self.sensor;
        if !(s.sensitivity.is_finite() && s.sensitivity > 0.0) {
            errors.push(format!(
                "sensor: sensitivity must be positive, got {}",
                s.sensitivity
            ));
        }
        if !(s.frequency_hz.is_finite() && s.frequency_hz > 0.0) {
            errors.push(format!(
                "sensor: frequency_hz must be positive, got {}",
                s.frequency_hz
            ));
        }
    }
}

// ---------------------------------------------------------------------------
// Load
// ---------------------------------------------------------------------------

/// Read, parse, apply environment overrides, and validate a TOML config file.
pub fn load(path: &str) -> Result<Config> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("failed to read config: {path}"))?;
    let mut config: Config =
        toml::from_str(&contents).with_context(|| format!("failed to parse config: {path}"))?;
    config.apply_overrides(|key| std::env::var(key).ok());
    config
        .validate()
        .with_context(|| format!("invalid config: {path}"))?;

    tracing::info!(
        server = %config.mqtt.server,
        port = config.mqtt.port,
        client_id = %config.mqtt.client_id,
        "config loaded"
    );

    Ok(config)
}

// ===========================================================================
// Tests
// ===========================================================================
