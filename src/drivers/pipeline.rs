use std::time::Duration;
use serde::{Deserialize, Serialize};
use crate::drivers::buffer::CalibratedSignal;
use crate::drivers::fft::{analyze, expected_bin, SpectralMetrics, DEFAULT_HARMONICS};
use crate::drivers::limits::{LimitSpec, Metric};
use crate::drivers::source::DeviceSession;
use crate::drivers::units::Encoding;
use crate::drivers::verdict::{run_checks, TestRunResult};
use crate::drivers::window::WindowKind;
use crate::drivers::ProdTestError;
/// How one acquisition is taken and interpreted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AcquisitionPlan {
    pub buffer_size: usize,
    pub sample_rate_hz: f64,
    pub vref: f64,
    pub bits: u32,
    pub encoding: Encoding,
    #[serde(default)]
    pub window: WindowKind,
    #[serde(default = "default_harmonics")]
    pub harmonics: usize,
    #[serde(default = "default_timeout_ms")]
    pub acquire_timeout_ms: u64,
}
fn default_harmonics() -> usize {
    DEFAULT_HARMONICS
}
fn default_timeout_ms() -> u64 {
    5000
}
impl Default for AcquisitionPlan {
    fn default() -> Self {
        // CN0579: AD7768-4, 24-bit two's complement, 4 MSPS (32 MHz / 8)
        Self {
            buffer_size: 256_000,
            sample_rate_hz: 4_000_000.0,
            vref: 5.0,
            bits: 24,
            encoding: Encoding::Bipolar,
            window: WindowKind::BlackmanHarris92,
            harmonics: DEFAULT_HARMONICS,
            acquire_timeout_ms: default_timeout_ms(),
        }
    }
}
impl AcquisitionPlan {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }
    /// Frequency-bin limit pinned to where a tone at `freq_hz` must land.
    pub fn expected_bin_limit(&self, freq_hz: f64) -> LimitSpec {
        let bin = expected_bin(freq_hz, self.sample_rate_hz, self.buffer_size) as f64;
        LimitSpec::between(Metric::FundamentalBin, bin, bin)
    }
}
/// Acquire → calibrate → analyze → check, for one channel of one board.
pub struct ChannelPipeline<'a, D: DeviceSession + ?Sized> {
    device: &'a mut D,
    plan: &'a AcquisitionPlan,
}
impl<'a, D: DeviceSession + ?Sized> ChannelPipeline<'a, D> {
    pub fn new(device: &'a mut D, plan: &'a AcquisitionPlan) -> Self {
        Self { device, plan }
    }
    pub fn acquire_signal(&mut self) -> Result<CalibratedSignal, ProdTestError> {
        let buffer = self.device.acquire(
            self.plan.buffer_size,
            self.plan.sample_rate_hz,
            self.plan.timeout(),
        )?;
        log::debug!(
            "acquired {} codes ({:.4} s)",
            buffer.len(),
            buffer.duration_seconds()
        );
        Ok(buffer.calibrate(self.plan.bits, self.plan.encoding))
    }
    /// Runs one measurement and appends its failures to `result`.
    ///
    /// Device errors abort with `Err`. A signal that cannot be analysed is a
    /// board defect: it is recorded as a failure and `Ok(None)` is returned.
    pub fn measure(
        &mut self,
        test_label: &str,
        stimulus_freq_hz: f64,
        limits: &[LimitSpec],
        result: &mut TestRunResult,
    ) -> Result<Option<SpectralMetrics>, ProdTestError> {
        let signal = self.acquire_signal()?;
        let metrics = match analyze(&signal, self.plan.window, self.plan.harmonics) {
            Ok(metrics) => metrics,
            Err(err) if err.is_analysis() => {
                result.record_error(test_label, "Spectrum", &err);
                return Ok(None);
            }
            Err(err) => return Err(err),
        };
        let mut specs = Vec::with_capacity(limits.len() + 1);
        specs.push(self.plan.expected_bin_limit(stimulus_freq_hz));
        specs.extend_from_slice(limits);
        result.absorb(run_checks(result.serial_number(), test_label, &metrics, &specs));
        Ok(Some(metrics))
    }
}
#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;
    use crate::drivers::source::{
        BenchState, SimulatedDevice, SimulatedStimulus, StimulusGuard, StimulusSettings,
    };
    fn plan() -> AcquisitionPlan {
        AcquisitionPlan {
            buffer_size: 8192,
            sample_rate_hz: 819_200.0,
            ..AcquisitionPlan::default()
        }
    }
    fn limits() -> Vec<LimitSpec> {
        vec![
            LimitSpec::greater_than(Metric::Snr, 43.0),
            LimitSpec::less_than(Metric::Thd, -45.0),
            LimitSpec::greater_than(Metric::Sinad, 42.0),
        ]
    }
    #[test]
    fn clean_channel_passes() {
        let bench = Rc::new(RefCell::new(BenchState::default()));
        let mut stimulus = SimulatedStimulus::new(bench.clone());
        let mut device = SimulatedDevice::new(bench, 5.0, 24, Encoding::Bipolar);
        device.noise_rms = 1e-4;
        let settings = StimulusSettings {
            freq_hz: 1000.0,
            amplitude: 4.5,
            offset: 0.0,
            phase_deg: 0.0,
        };
        let plan = plan();
        let mut result = TestRunResult::new("2022051000");
        let _stim = StimulusGuard::start(&mut stimulus, &settings).unwrap();
        let metrics = ChannelPipeline::new(&mut device, &plan)
            .measure("FS test ch0", settings.freq_hz, &limits(), &mut result)
            .unwrap()
            .unwrap();
        assert_eq!(metrics.fundamental_bin, 10);
        assert!((metrics.fundamental_amplitude - 4.5).abs() < 0.01);
        assert!(result.overall_pass(), "{:?}", result.failures());
    }
    #[test]
    fn distorted_channel_fails_every_affected_limit() {
        let bench = Rc::new(RefCell::new(BenchState::default()));
        let mut stimulus = SimulatedStimulus::new(bench.clone());
        let mut device = SimulatedDevice::new(bench, 5.0, 24, Encoding::Bipolar);
        device.third_harmonic = 0.01;
        device.noise_rms = 0.05;
        let settings = StimulusSettings {
            freq_hz: 1000.0,
            amplitude: 2.0,
            offset: 0.0,
            phase_deg: 0.0,
        };
        let plan = plan();
        let mut result = TestRunResult::new("2022051000");
        let _stim = StimulusGuard::start(&mut stimulus, &settings).unwrap();
        ChannelPipeline::new(&mut device, &plan)
            .measure("FS test ch1", settings.freq_hz, &limits(), &mut result)
            .unwrap();
        let names: Vec<&str> = result.failures().iter().map(|f| f.metric_name.as_str()).collect();
        assert_eq!(names, vec!["SNR", "THD", "SINAD"]);
    }
    #[test]
    fn silent_channel_is_recorded_not_raised() {
        let bench = Rc::new(RefCell::new(BenchState::default()));
        let mut device = SimulatedDevice::new(bench, 5.0, 24, Encoding::Bipolar);
        let plan = plan();
        let mut result = TestRunResult::new("2022051000");
        let metrics = ChannelPipeline::new(&mut device, &plan)
            .measure("FS test ch2", 1000.0, &limits(), &mut result)
            .unwrap();
        assert!(metrics.is_none());
        assert_eq!(result.failures().len(), 1);
        assert_eq!(result.failures()[0].metric_name, "Spectrum");
    }
    #[test]
    fn device_errors_propagate() {
        let bench = Rc::new(RefCell::new(BenchState::default()));
        let mut device = SimulatedDevice::new(bench, 5.0, 24, Encoding::Bipolar);
        device.faults.timeout = true;
        let plan = plan();
        let mut result = TestRunResult::new("2022051000");
        let err = ChannelPipeline::new(&mut device, &plan)
            .measure("FS test ch3", 1000.0, &limits(), &mut result)
            .unwrap_err();
        assert!(matches!(err, ProdTestError::AcquisitionTimeout { timeout_ms: 5000 }));
        assert!(result.overall_pass());
    }
    #[test]
    fn expected_bin_follows_plan() {
        let plan = AcquisitionPlan {
            buffer_size: 256_000,
            sample_rate_hz: 10_000_000.0,
            ..AcquisitionPlan::default()
        };
        assert_eq!(
            plan.expected_bin_limit(20_000.0),
            LimitSpec::between(Metric::FundamentalBin, 512.0, 512.0)
        );
    }
}
