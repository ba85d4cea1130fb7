use std::cell::RefCell;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::rc::Rc;
use std::time::Duration;
use rand::Rng;
use serde::{Deserialize, Serialize};
use crate::drivers::buffer::AcquisitionBuffer;
use crate::drivers::siggen;
use crate::drivers::units::Encoding;
use crate::drivers::ProdTestError;
/// Value written to a vendor attribute.
#[derive(Clone, Debug, PartialEq)]
pub enum ConfigValue {
    Bool(bool),
    Int(i64),
    Text(String),
}
impl fmt::Display for ConfigValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigValue::Bool(v) => write!(f, "{}", u8::from(*v)),
            ConfigValue::Int(v) => write!(f, "{v}"),
            ConfigValue::Text(v) => f.write_str(v),
        }
    }
}
/// Acquisition and configuration surface of the board under test.
pub trait DeviceSession {
    /// Routes the next acquisitions to ADC channel `channel`.
    fn select_channel(&mut self, _channel: usize) -> Result<(), ProdTestError> {
        Ok(())
    }
    /// Blocks until `buffer_size` codes are captured or `timeout` elapses.
    fn acquire(
        &mut self,
        buffer_size: usize,
        sample_rate_hz: f64,
        timeout: Duration,
    ) -> Result<AcquisitionBuffer, ProdTestError>;
    fn set_config(&mut self, key: &str, value: &ConfigValue) -> Result<(), ProdTestError>;
    /// Reads a numeric attribute such as a supply monitor.
    fn read_value(&mut self, key: &str) -> Result<f64, ProdTestError>;
}
/// Reference waveform requested from the signal source.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct StimulusSettings {
    pub freq_hz: f64,
    /// Peak amplitude in volts.
    pub amplitude: f64,
    pub offset: f64,
    /// Phase of the second (differential) output in degrees.
    pub phase_deg: f64,
}
impl Default for StimulusSettings {
    fn default() -> Self {
        Self {
            freq_hz: 1000.0,
            amplitude: 5.0,
            offset: 0.0,
            phase_deg: 0.0,
        }
    }
}
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StimulusHandle(pub u32);
/// Reference signal source plus its DC voltmeter.
pub trait StimulusController {
    fn generate(&mut self, settings: &StimulusSettings) -> Result<StimulusHandle, ProdTestError>;
    fn stop(&mut self, handle: StimulusHandle) -> Result<(), ProdTestError>;
    /// DC level presented to the board input, in volts.
    fn measure_dc(&mut self) -> Result<f64, ProdTestError>;
}
/// Maps a channel index to its vendor attribute, e.g. `voltage{}/raw` →
/// `voltage2/raw`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelMap {
    pub template: String,
    pub channels: usize,
}
impl ChannelMap {
    pub fn new(template: impl Into<String>, channels: usize) -> Self {
        Self {
            template: template.into(),
            channels,
        }
    }
    pub fn key(&self, channel: usize) -> Result<String, ProdTestError> {
        if channel >= self.channels {
            return Err(ProdTestError::Configuration(format!(
                "channel {channel} out of range (board has {})",
                self.channels
            )));
        }
        Ok(self.template.replace("{}", &channel.to_string()))
    }
}
/// Keeps the stimulus running while alive; stops it on every exit path.
pub struct StimulusGuard<'a, S: StimulusController + ?Sized> {
    stimulus: &'a mut S,
    handle: Option<StimulusHandle>,
}
impl<'a, S: StimulusController + ?Sized> StimulusGuard<'a, S> {
    pub fn start(stimulus: &'a mut S, settings: &StimulusSettings) -> Result<Self, ProdTestError> {
        let handle = stimulus.generate(settings)?;
        log::info!(
            "stimulus {} on: {} Hz, {} V peak, {} V offset",
            handle.0,
            settings.freq_hz,
            settings.amplitude,
            settings.offset
        );
        Ok(Self {
            stimulus,
            handle: Some(handle),
        })
    }
    pub fn measure_dc(&mut self) -> Result<f64, ProdTestError> {
        self.stimulus.measure_dc()
    }
    /// Stops the stimulus now and reports the outcome.
    pub fn finish(mut self) -> Result<(), ProdTestError> {
        match self.handle.take() {
            Some(handle) => self.stimulus.stop(handle),
            None => Ok(()),
        }
    }
}
impl<S: StimulusController + ?Sized> Drop for StimulusGuard<'_, S> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            if let Err(err) = self.stimulus.stop(handle) {
                log::error!("failed to stop stimulus: {err}");
            }
        }
    }
}
/// Channel with its current source enabled. Dropping the guard zeroes the
/// level-shift DAC and switches the current source off again.
pub struct ChannelGuard<'a, D: DeviceSession + ?Sized> {
    device: &'a mut D,
    current_source_key: String,
    shift_key: String,
}
impl<'a, D: DeviceSession + ?Sized> ChannelGuard<'a, D> {
    pub fn enable(
        device: &'a mut D,
        current_source: &ChannelMap,
        shift_dac: &ChannelMap,
        channel: usize,
    ) -> Result<Self, ProdTestError> {
        let current_source_key = current_source.key(channel)?;
        let shift_key = shift_dac.key(channel)?;
        device.select_channel(channel)?;
        device.set_config(&current_source_key, &ConfigValue::Bool(true))?;
        log::info!("{current_source_key} on");
        Ok(Self {
            device,
            current_source_key,
            shift_key,
        })
    }
    pub fn set_shift_code(&mut self, code: i64) -> Result<(), ProdTestError> {
        let key = self.shift_key.clone();
        self.device.set_config(&key, &ConfigValue::Int(code))
    }
}
impl<D: DeviceSession + ?Sized> Deref for ChannelGuard<'_, D> {
    type Target = D;
    fn deref(&self) -> &D {
        self.device
    }
}
impl<D: DeviceSession + ?Sized> DerefMut for ChannelGuard<'_, D> {
    fn deref_mut(&mut self) -> &mut D {
        self.device
    }
}
impl<D: DeviceSession + ?Sized> Drop for ChannelGuard<'_, D> {
    fn drop(&mut self) {
        if let Err(err) = self.device.set_config(&self.shift_key, &ConfigValue::Int(0)) {
            log::error!("failed to zero {}: {err}", self.shift_key);
        }
        if let Err(err) = self
            .device
            .set_config(&self.current_source_key, &ConfigValue::Bool(false))
        {
            log::error!("failed to switch off {}: {err}", self.current_source_key);
        }
    }
}
/// One cyclic buffer played by the simulated generator at `rate`.
#[derive(Clone, Debug, PartialEq)]
pub struct GeneratorOutput {
    pub rate: f64,
    pub samples: Vec<f64>,
}
impl GeneratorOutput {
    /// Output voltage `t` seconds after the start, linearly interpolated
    /// between buffer points.
    pub fn at(&self, t: f64) -> f64 {
        let len = self.samples.len();
        if len == 0 {
            return 0.0;
        }
        let pos = (t * self.rate).rem_euclid(len as f64);
        let i = (pos.floor() as usize).min(len - 1);
        let frac = pos - i as f64;
        let a = self.samples[i];
        let b = self.samples[(i + 1) % len];
        a + (b - a) * frac
    }
}
/// Bench state shared between the simulated generator and the simulated
/// board: what the generator drives is what the board digitises.
#[derive(Debug)]
pub struct BenchState {
    pub tone: Option<StimulusSettings>,
    /// Waveform the generator is playing while `tone` is set.
    pub output: Option<GeneratorOutput>,
    pub dc_input: f64,
    /// Board input path gain, set by the FS/attenuated switch.
    pub input_gain: f64,
}
impl Default for BenchState {
    fn default() -> Self {
        Self {
            tone: None,
            output: None,
            dc_input: 0.0,
            input_gain: 1.0,
        }
    }
}
pub type SharedBench = Rc<RefCell<BenchState>>;
/// Failure injection for the simulator.
#[derive(Clone, Debug, Default)]
pub struct SimulatedFaults {
    pub unavailable: bool,
    pub timeout: bool,
    pub rejected_keys: HashSet<String>,
    /// Channels whose input path is open: they digitise no tone.
    pub dead_channels: HashSet<usize>,
}
/// In-memory board for tests and dry runs.
///
/// Acquisitions digitise whatever tone the bench is driving, scaled by
/// `gain`, with uniform noise of `noise_rms` volts and an optional
/// third harmonic.
pub struct SimulatedDevice {
    bench: SharedBench,
    pub vref: f64,
    pub bits: u32,
    pub encoding: Encoding,
    pub gain: f64,
    pub noise_rms: f64,
    pub third_harmonic: f64,
    pub dc_offset: f64,
    pub faults: SimulatedFaults,
    selected: usize,
    attributes: BTreeMap<String, ConfigValue>,
    monitors: BTreeMap<String, f64>,
    history: Vec<(String, ConfigValue)>,
}
impl SimulatedDevice {
    pub fn new(bench: SharedBench, vref: f64, bits: u32, encoding: Encoding) -> Self {
        Self {
            bench,
            vref,
            bits,
            encoding,
            gain: 1.0,
            noise_rms: 0.0,
            third_harmonic: 0.0,
            dc_offset: 0.0,
            faults: SimulatedFaults::default(),
            selected: 0,
            attributes: BTreeMap::new(),
            monitors: BTreeMap::new(),
            history: Vec::new(),
        }
    }
    pub fn with_monitor(mut self, key: impl Into<String>, value: f64) -> Self {
        self.monitors.insert(key.into(), value);
        self
    }
    #[cfg(test)]
    pub fn attribute(&self, key: &str) -> Option<&ConfigValue> {
        self.attributes.get(key)
    }
    /// Every `set_config` call in order.
    #[cfg(test)]
    pub fn history(&self) -> &[(String, ConfigValue)] {
        &self.history
    }
}
impl DeviceSession for SimulatedDevice {
    fn select_channel(&mut self, channel: usize) -> Result<(), ProdTestError> {
        self.selected = channel;
        Ok(())
    }
    fn acquire(
        &mut self,
        buffer_size: usize,
        sample_rate_hz: f64,
        timeout: Duration,
    ) -> Result<AcquisitionBuffer, ProdTestError> {
        if self.faults.unavailable {
            return Err(ProdTestError::DeviceUnavailable("simulated board detached".into()));
        }
        if self.faults.timeout {
            return Err(ProdTestError::AcquisitionTimeout {
                timeout_ms: timeout.as_millis() as u64,
            });
        }
        let (tone, output, input_gain) = {
            let bench = self.bench.borrow();
            (bench.tone, bench.output.clone(), bench.input_gain)
        };
        // an open input path reads back a flat, noiseless level
        let dead = self.faults.dead_channels.contains(&self.selected);
        let tone = tone.zip(output).filter(|_| !dead);
        let gain = self.gain * input_gain;
        let (min_code, max_code) = self.encoding.code_range(self.bits);
        let full_scale = self.encoding.full_scale(self.bits);
        let mut rng = rand::thread_rng();
        // uniform noise on [-a, a] has rms a / sqrt(3)
        let noise_span = if dead { 0.0 } else { self.noise_rms * 3f64.sqrt() };
        let codes = (0..buffer_size)
            .map(|i| {
                let t = i as f64 / sample_rate_hz;
                let mut volts = self.dc_offset;
                if let Some((tone, output)) = &tone {
                    let phase = 2.0 * std::f64::consts::PI * tone.freq_hz * t;
                    volts += gain * output.at(t);
                    volts += gain * self.third_harmonic * tone.amplitude * (3.0 * phase).sin();
                }
                if noise_span > 0.0 {
                    volts += rng.gen_range(-noise_span..=noise_span);
                }
                ((volts * full_scale / self.vref).round() as i64).clamp(min_code, max_code)
            })
            .collect();
        Ok(AcquisitionBuffer::new(codes, sample_rate_hz, self.vref))
    }
    fn set_config(&mut self, key: &str, value: &ConfigValue) -> Result<(), ProdTestError> {
        if self.faults.unavailable {
            return Err(ProdTestError::DeviceUnavailable("simulated board detached".into()));
        }
        if self.faults.rejected_keys.contains(key) {
            return Err(ProdTestError::UnsupportedConfig {
                key: key.to_string(),
                value: value.to_string(),
            });
        }
        self.history.push((key.to_string(), value.clone()));
        self.attributes.insert(key.to_string(), value.clone());
        Ok(())
    }
    fn read_value(&mut self, key: &str) -> Result<f64, ProdTestError> {
        if let Some(v) = self.monitors.get(key) {
            return Ok(*v);
        }
        match self.attributes.get(key) {
            Some(ConfigValue::Int(v)) => Ok(*v as f64),
            Some(ConfigValue::Bool(v)) => Ok(f64::from(u8::from(*v))),
            _ => Err(ProdTestError::UnsupportedConfig {
                key: key.to_string(),
                value: "<read>".into(),
            }),
        }
    }
}
/// Signal generator driving the shared bench.
pub struct SimulatedStimulus {
    bench: SharedBench,
    next_handle: u32,
    active: Option<StimulusHandle>,
    pub available: bool,
    /// Count of `generate` calls, for teardown checks.
    pub started: usize,
    pub stopped: usize,
}
impl SimulatedStimulus {
    pub fn new(bench: SharedBench) -> Self {
        Self {
            bench,
            next_handle: 1,
            active: None,
            available: true,
            started: 0,
            stopped: 0,
        }
    }
    #[cfg(test)]
    pub fn is_running(&self) -> bool {
        self.active.is_some()
    }
}
impl StimulusController for SimulatedStimulus {
    fn generate(&mut self, settings: &StimulusSettings) -> Result<StimulusHandle, ProdTestError> {
        if !self.available {
            return Err(ProdTestError::DeviceUnavailable("no signal generator connected".into()));
        }
        let Some((rate, buffer)) = siggen::sine_buffer(
            settings.freq_hz,
            settings.amplitude,
            settings.offset,
            settings.phase_deg,
        ) else {
            return Err(ProdTestError::Range {
                value: settings.freq_hz,
                reason: "frequency not reachable by the generator".into(),
            });
        };
        log::debug!("generator buffer: {} samples at {rate} Sps", buffer.len());
        let handle = StimulusHandle(self.next_handle);
        self.next_handle += 1;
        self.active = Some(handle);
        self.started += 1;
        let mut bench = self.bench.borrow_mut();
        bench.tone = Some(*settings);
        bench.output = Some(GeneratorOutput {
            rate,
            samples: buffer,
        });
        Ok(handle)
    }
    fn stop(&mut self, handle: StimulusHandle) -> Result<(), ProdTestError> {
        if self.active == Some(handle) {
            self.active = None;
            self.stopped += 1;
            let mut bench = self.bench.borrow_mut();
            bench.tone = None;
            bench.output = None;
        }
        Ok(())
    }
    fn measure_dc(&mut self) -> Result<f64, ProdTestError> {
        if !self.available {
            return Err(ProdTestError::DeviceUnavailable("no voltmeter connected".into()));
        }
        Ok(self.bench.borrow().dc_input)
    }
}
