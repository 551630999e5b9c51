mod adc;
mod config;
mod controller;
mod debounce;
mod mqtt;
mod network;
mod relay;
mod sensor;
mod session;
#[cfg(feature = "sim")]
mod sim;
mod state;
mod supervisor;

#[cfg(not(any(feature = "sim", feature = "gpio")))]
compile_error!("enable the `sim` or `gpio` feature to pick a hardware backend");

use anyhow::Result;
use std::env;
use tokio::time::Instant;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use controller::Controller;
use network::HostNetwork;
use sensor::{AnalogInput, CurrentSensor, MonotonicClock};
use session::MqttConnector;
use supervisor::Supervisor;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // ── Logging ─────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // ── Config file ─────────────────────────────────────────────────
    let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| "station.toml".to_string());
    let cfg = config::load(&config_path)?;

    // ── Hardware ────────────────────────────────────────────────────
    // Relays are driven off as the board comes up.
    #[cfg(feature = "gpio")]
    let (board, adc) = (
        relay::GpioBoard::new(&cfg.pins)?,
        adc::Mcp3208::new(cfg.pins.adc_channel)?,
    );

    #[cfg(all(feature = "sim", not(feature = "gpio")))]
    let (board, adc) = {
        let scenario = sim::Scenario::from_str_lossy(
            &env::var("SIM_SCENARIO").unwrap_or_default(),
        );
        tracing::info!(%scenario, "running with simulated hardware");
        let board = relay::MockBoard::new();
        let adc = sim::SimulatedCurrent::new(scenario, board.pump_load());
        (board, adc)
    };

    let probe = calibrated_sensor(adc, cfg.sensor.sensitivity);

    // ── Control loop ────────────────────────────────────────────────
    let controller = Controller::new(board, probe, cfg.sensor.frequency_hz, Instant::now());
    let network = HostNetwork::new(&cfg.mqtt.server, cfg.mqtt.port);

    Supervisor::new(network, MqttConnector, controller, cfg.wifi, cfg.mqtt)
        .run()
        .await;

    Ok(())
}

/// Build the current sensor and take its zero point.  Blocks for about a
/// second.  A failed calibration keeps the default zero point.
fn calibrated_sensor<A: AnalogInput>(adc: A, sensitivity: f64) -> CurrentSensor<A> {
    let mut sensor = CurrentSensor::new(adc, MonotonicClock::default(), sensitivity);
    if let Err(e) = sensor.calibrate() {
        warn!(
            zero_point = sensor.zero_point(),
            "calibration failed, using default zero point: {e}"
        );
    }
    sensor
}
