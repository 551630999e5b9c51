//! AC current measurement from a hall-effect current sensor (ACS712 class).
//!
//! The sensor output rides on a DC offset (the "zero point") and swings
//! around it proportionally to the instantaneous line current.  We estimate
//! the RMS current by sampling the 12-bit ADC as fast as possible for a fixed
//! window, accumulating squared deviations from the zero point.
//!
//! `measure_rms` is the one intentionally blocking call in the station: it
//! busy-polls the ADC until a deadline on a monotonic millisecond clock
//! passes.  Nothing else runs while a window is open.

use std::time::Instant;

use thiserror::Error;
use tracing::{debug, info};

// ── ADC / sensor constants ──────────────────────────────────────────────────

/// Full-scale count of the 12-bit ADC.
pub const ADC_FULL_SCALE: f64 = 4095.0;
/// ADC reference voltage.
pub const V_REF: f64 = 3.3;
/// Zero point used until the first calibration.
pub const DEFAULT_ZERO_POINT: f64 = 512.0;
/// Amps per ADC-volt for the 30 A sensor variant as wired on the station.
pub const DEFAULT_SENSITIVITY: f64 = 0.117;
/// Mains line frequency.
pub const DEFAULT_FREQUENCY_HZ: f64 = 50.0;

const CALIBRATION_SAMPLES: u32 = 1000;
const CALIBRATION_SPACING_MS: u64 = 1;

/// Readings below this are sensor noise, not load.
const NOISE_FLOOR_AMPS: f64 = 0.5;

// ── Errors ──────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum SensorError {
    #[error("adc read failed: {0}")]
    Read(String),
    #[error("line frequency must be positive, got {0}")]
    InvalidFrequency(f64),
    #[error("measurement window closed before any sample was taken")]
    NoSamples,
}

// ── Collaborators ───────────────────────────────────────────────────────────

/// A single-channel analog input returning raw counts in `0..=4095`.
pub trait AnalogInput {
    fn read_raw(&mut self) -> Result<u16, SensorError>;
}

/// Monotonic millisecond clock plus a blocking delay.
pub trait Clock {
    fn now_ms(&self) -> u64;
    fn delay_ms(&self, ms: u64);
}

/// Wall-clock implementation backed by `std::time::Instant`.
pub struct MonotonicClock {
    origin: Instant,
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Clock for MonotonicClock {
    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }

    fn delay_ms(&self, ms: u64) {
        std::thread::sleep(std::time::Duration::from_millis(ms));
    }
}

/// Anything that can produce an RMS current reading in amps.
///
/// The controller depends on this rather than on [`CurrentSensor`] directly so
/// the status path can be exercised without an ADC.
pub trait CurrentProbe {
    fn measure_rms(&mut self, frequency_hz: f64) -> Result<f64, SensorError>;
}

// ── Sample window ───────────────────────────────────────────────────────────

#[derive(Default)]
struct SampleWindow {
    sum_squares: f64,
    count: u32,
}

impl SampleWindow {
    fn push(&mut self, deviation: f64) {
        self.sum_squares += deviation * deviation;
        self.count += 1;
    }

    fn rms(&self) -> Option<f64> {
        (self.count > 0).then(|| (self.sum_squares / f64::from(self.count)).sqrt())
    }
}

/// Convert an RMS value in ADC counts to amps, applying the noise floor and
/// rounding to two decimals.
pub fn counts_to_amps(rms_counts: f64, sensitivity: f64) -> f64 {
    let amps = rms_counts / ADC_FULL_SCALE * V_REF / sensitivity;
    if amps < NOISE_FLOOR_AMPS {
        0.0
    } else {
        (amps * 100.0).round() / 100.0
    }
}

// ── Sensor ──────────────────────────────────────────────────────────────────

pub struct CurrentSensor<A, C = MonotonicClock> {
    adc: A,
    clock: C,
    zero_point: f64,
    sensitivity: f64,
}

impl<A: AnalogInput, C: Clock> CurrentSensor<A, C> {
    pub fn new(adc: A, clock: C, sensitivity: f64) -> Self {
        Self {
            adc,
            clock,
            zero_point: DEFAULT_ZERO_POINT,
            sensitivity,
        }
    }

    pub fn zero_point(&self) -> f64 {
        self.zero_point
    }

    /// Establish the zero-current baseline.  The line must be unloaded.
    ///
    /// Takes 1000 samples 1 ms apart (about one second) and stores their
    /// mean.  On a read error the previous zero point is kept.
    pub fn calibrate(&mut self) -> Result<f64, SensorError> {
        let mut acc = 0.0;
        for _ in 0..CALIBRATION_SAMPLES {
            acc += f64::from(self.adc.read_raw()?);
            self.clock.delay_ms(CALIBRATION_SPACING_MS);
        }
        self.zero_point = acc / f64::from(CALIBRATION_SAMPLES);

        info!(zero_point = self.zero_point, "current sensor calibrated");
        Ok(self.zero_point)
    }

    /// Sample for one window and return the RMS current in amps.
    ///
    /// The window is `100 / frequency_hz` ticks of 100 ms, counted from the
    /// tick the call starts in, so at 50 Hz it lasts between 100 and 200 ms.
    pub fn measure_rms(&mut self, frequency_hz: f64) -> Result<f64, SensorError> {
        if !frequency_hz.is_finite() || frequency_hz <= 0.0 {
            return Err(SensorError::InvalidFrequency(frequency_hz));
        }

        let period = 100.0 / frequency_hz;
        let start_tick = self.clock.now_ms() / 100;
        let mut window = SampleWindow::default();

        while (self.clock.now_ms() as f64 / 100.0) - (start_tick as f64) < period {
            let raw = self.adc.read_raw()?;
            window.push(f64::from(raw) - self.zero_point);
        }

        let rms_counts = window.rms().ok_or(SensorError::NoSamples)?;
        debug!(samples = window.count, rms_counts, "rms window closed");

        Ok(counts_to_amps(rms_counts, self.sensitivity))
    }
}

impl<A: AnalogInput, C: Clock> CurrentProbe for CurrentSensor<A, C> {
    fn measure_rms(&mut self, frequency_hz: f64) -> Result<f64, SensorError> {
        CurrentSensor::measure_rms(self, frequency_hz)
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::f64::consts::PI;
    use std::rc::Rc;

    /// Simulated clock shared between the sensor and the fake ADC.
    #[derive(Clone, Default)]
    struct FakeClock {
        now: Rc<Cell<u64>>,
    }

    impl FakeClock {
        fn at(ms: u64) -> Self {
            let clock = Self::default();
            clock.now.set(ms);
            clock
        }
    }

    impl Clock for FakeClock {
        fn now_ms(&self) -> u64 {
            self.now.get()
        }

        fn delay_ms(&self, ms: u64) {
            self.now.set(self.now.get() + ms);
        }
    }

    /// ADC whose conversion takes 1 ms and returns `signal(t_ms)`.
    struct SignalAdc<F> {
        clock: FakeClock,
        signal: F,
        reads: Rc<Cell<u32>>,
    }

    impl<F: FnMut(u64) -> u16> SignalAdc<F> {
        fn new(clock: &FakeClock, signal: F) -> Self {
            Self {
                clock: clock.clone(),
                signal,
                reads: Rc::default(),
            }
        }
    }

    impl<F: FnMut(u64) -> u16> AnalogInput for SignalAdc<F> {
        fn read_raw(&mut self) -> Result<u16, SensorError> {
            let t = self.clock.now_ms();
            self.clock.delay_ms(1);
            self.reads.set(self.reads.get() + 1);
            Ok((self.signal)(t))
        }
    }

    struct BrokenAdc;

    impl AnalogInput for BrokenAdc {
        fn read_raw(&mut self) -> Result<u16, SensorError> {
            Err(SensorError::Read("spi bus fault".into()))
        }
    }

    /// Clock that jumps far ahead after the first reading.
    struct JumpClock {
        calls: Cell<u32>,
    }

    impl Clock for JumpClock {
        fn now_ms(&self) -> u64 {
            let n = self.calls.get();
            self.calls.set(n + 1);
            if n == 0 {
                0
            } else {
                10_000
            }
        }

        fn delay_ms(&self, _ms: u64) {}
    }

    fn sine(mid: f64, peak: f64) -> impl FnMut(u64) -> u16 {
        move |t| {
            let phase = 2.0 * PI * DEFAULT_FREQUENCY_HZ * t as f64 / 1000.0;
            (mid + peak * phase.sin()).round() as u16
        }
    }

    // -- Calibration ----------------------------------------------------------

    #[test]
    fn calibrate_stores_mean_of_samples() {
        let clock = FakeClock::default();
        let adc = SignalAdc::new(&clock, |t| if (t / 2) % 2 == 0 { 2040 } else { 2060 });
        let mut sensor = CurrentSensor::new(adc, clock.clone(), DEFAULT_SENSITIVITY);

        let zero = sensor.calibrate().unwrap();
        assert!((zero - 2050.0).abs() < 1e-9, "zero={zero}");
        assert_eq!(sensor.zero_point(), zero);
    }

    #[test]
    fn calibrate_takes_a_thousand_spaced_samples() {
        let clock = FakeClock::default();
        let adc = SignalAdc::new(&clock, |_| 2048);
        let reads = Rc::clone(&adc.reads);
        let mut sensor = CurrentSensor::new(adc, clock.clone(), DEFAULT_SENSITIVITY);

        sensor.calibrate().unwrap();
        assert_eq!(reads.get(), 1000);
        // 1 ms conversion + 1 ms spacing per sample.
        assert_eq!(clock.now_ms(), 2000);
    }

    #[test]
    fn calibrate_read_error_keeps_previous_zero() {
        let mut sensor = CurrentSensor::new(BrokenAdc, FakeClock::default(), DEFAULT_SENSITIVITY);
        assert!(matches!(sensor.calibrate(), Err(SensorError::Read(_))));
        assert_eq!(sensor.zero_point(), DEFAULT_ZERO_POINT);
    }

    // -- RMS measurement ------------------------------------------------------

    #[test]
    fn constant_stream_at_zero_point_reads_zero() {
        let clock = FakeClock::default();
        let adc = SignalAdc::new(&clock, |_| 512);
        let mut sensor = CurrentSensor::new(adc, clock, DEFAULT_SENSITIVITY);

        assert_eq!(sensor.measure_rms(50.0).unwrap(), 0.0);
    }

    #[test]
    fn small_ripple_is_below_noise_floor() {
        let clock = FakeClock::default();
        let adc = SignalAdc::new(&clock, sine(512.0, 20.0));
        let mut sensor = CurrentSensor::new(adc, clock, DEFAULT_SENSITIVITY);

        assert_eq!(sensor.measure_rms(50.0).unwrap(), 0.0);
    }

    #[test]
    fn sinusoid_reads_peak_over_root_two() {
        let peak = 1000.0;
        let clock = FakeClock::default();
        let adc = SignalAdc::new(&clock, sine(2048.0, peak));
        let mut sensor = CurrentSensor::new(adc, clock.clone(), DEFAULT_SENSITIVITY);

        // Whole cycles during calibration, so the mean lands on mid-scale.
        let zero = sensor.calibrate().unwrap();
        assert!((zero - 2048.0).abs() < 1.0, "zero={zero}");

        let amps = sensor.measure_rms(50.0).unwrap();
        let expected = peak / 2f64.sqrt() / ADC_FULL_SCALE * V_REF / DEFAULT_SENSITIVITY;
        let err = (amps - expected).abs() / expected;
        assert!(err < 0.05, "amps={amps} expected={expected:.3} err={err:.4}");
    }

    #[test]
    fn reading_is_rounded_to_two_decimals() {
        let clock = FakeClock::default();
        let adc = SignalAdc::new(&clock, sine(2048.0, 1000.0));
        let mut sensor = CurrentSensor::new(adc, clock, DEFAULT_SENSITIVITY);
        sensor.calibrate().unwrap();

        let amps = sensor.measure_rms(50.0).unwrap();
        assert!(((amps * 100.0).round() - amps * 100.0).abs() < 1e-6, "amps={amps}");
    }

    #[test]
    fn window_spans_period_in_hundred_ms_ticks() {
        let clock = FakeClock::default();
        let adc = SignalAdc::new(&clock, |_| 512);
        let reads = Rc::clone(&adc.reads);
        let mut sensor = CurrentSensor::new(adc, clock, DEFAULT_SENSITIVITY);

        sensor.measure_rms(50.0).unwrap();
        assert_eq!(reads.get(), 200);

        reads.set(0);
        sensor.measure_rms(100.0).unwrap();
        assert_eq!(reads.get(), 100);
    }

    #[test]
    fn window_start_is_truncated_to_tick() {
        // Starting 50 ms into a tick shortens the window by those 50 ms.
        let clock = FakeClock::at(150);
        let adc = SignalAdc::new(&clock, |_| 512);
        let reads = Rc::clone(&adc.reads);
        let mut sensor = CurrentSensor::new(adc, clock, DEFAULT_SENSITIVITY);

        sensor.measure_rms(50.0).unwrap();
        assert_eq!(reads.get(), 150);
    }

    #[test]
    fn empty_window_is_an_error_not_a_fault() {
        let clock = JumpClock { calls: Cell::new(0) };
        let mut sensor = CurrentSensor::new(BrokenAdc, clock, DEFAULT_SENSITIVITY);
        assert!(matches!(sensor.measure_rms(50.0), Err(SensorError::NoSamples)));
    }

    #[test]
    fn non_positive_frequency_rejected() {
        let clock = FakeClock::default();
        let adc = SignalAdc::new(&clock, |_| 512);
        let mut sensor = CurrentSensor::new(adc, clock, DEFAULT_SENSITIVITY);

        assert!(matches!(
            sensor.measure_rms(0.0),
            Err(SensorError::InvalidFrequency(_))
        ));
        assert!(matches!(
            sensor.measure_rms(-50.0),
            Err(SensorError::InvalidFrequency(_))
        ));
        assert!(matches!(
            sensor.measure_rms(f64::NAN),
            Err(SensorError::InvalidFrequency(_))
        ));
    }

    #[test]
    fn read_error_aborts_window() {
        let mut sensor = CurrentSensor::new(BrokenAdc, FakeClock::default(), DEFAULT_SENSITIVITY);
        assert!(matches!(sensor.measure_rms(50.0), Err(SensorError::Read(_))));
    }

    // -- Conversion -----------------------------------------------------------

    #[test]
    fn counts_to_amps_applies_noise_floor() {
        // 0.5 A corresponds to ~72.6 counts at the default sensitivity.
        assert_eq!(counts_to_amps(70.0, DEFAULT_SENSITIVITY), 0.0);
        assert!(counts_to_amps(75.0, DEFAULT_SENSITIVITY) >= 0.5);
    }

    #[test]
    fn counts_to_amps_scales_with_sensitivity() {
        let a = counts_to_amps(1000.0, 0.117);
        let b = counts_to_amps(1000.0, 0.234);
        assert!((a / b - 2.0).abs() < 0.01, "a={a} b={b}");
    }
}
