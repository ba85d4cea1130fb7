// src/config.rs
use std::path::{Path, PathBuf};
use serde::{Deserialize, Serialize};
use crate::drivers::limits::{Comparison, LimitSpec, Metric};
use crate::drivers::pipeline::AcquisitionPlan;
use crate::drivers::siggen;
use crate::drivers::source::{ChannelMap, StimulusSettings};
use crate::drivers::units::{to_physical, ChannelScale, Encoding, ShiftTransfer};
use crate::drivers::ProdTestError;
use crate::types::TestMode;
/// Environment variable naming a JSON profile to load instead of the default.
pub const PROFILE_ENV: &str = "PRODTEST_PROFILE";
/// Limits applied while the board's input switch is in `mode`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModeLimits {
    pub mode: TestMode,
    pub limits: Vec<LimitSpec>,
}
/// Named supply/temperature monitor with its accepted window.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MonitorLimit {
    pub name: String,
    pub key: String,
    #[serde(default)]
    pub unit: String,
    pub lo: f64,
    pub hi: f64,
    /// Set when `key` reads a raw ADC code rather than a scaled value.
    #[serde(default)]
    pub raw: Option<ChannelScale>,
}
impl MonitorLimit {
    /// Converts what the device returned for `key` to the monitored unit.
    pub fn physical(&self, reading: f64) -> f64 {
        match &self.raw {
            Some(scale) => to_physical(reading.round() as i64, scale.adc_lsb, scale),
            None => reading,
        }
    }
    pub fn comparison(&self) -> Comparison {
        Comparison::Between {
            lo: self.lo,
            hi: self.hi,
        }
    }
}
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DacSettings {
    pub vref: f64,
    pub bits: u32,
    pub encoding: Encoding,
}
impl Default for DacSettings {
    fn default() -> Self {
        Self {
            vref: 5.0,
            bits: 16,
            encoding: Encoding::Unipolar,
        }
    }
}
/// Vendor attribute written once when the session opens (gain, filter,
/// power mode).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConfigEntry {
    pub key: String,
    pub value: String,
}
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FruSettings {
    pub tool: String,
    pub image: PathBuf,
    pub eeprom: PathBuf,
}
impl Default for FruSettings {
    fn default() -> Self {
        Self {
            tool: "fru-dump".into(),
            image: PathBuf::from("CN0579FRU.bin"),
            eeprom: PathBuf::from("/sys/devices/soc0/fpga-axi@0/41620000.i2c/i2c-1/1-0050/eeprom"),
        }
    }
}
/// Everything that differs from one board type to the next.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoardProfile {
    pub board: String,
    /// IIO device name of the ADC on hardware contexts.
    pub device_name: String,
    pub channels: usize,
    pub acquisition: AcquisitionPlan,
    pub stimulus: StimulusSettings,
    /// Accepted DC level at the board input before measuring.
    pub dc_input_lo: f64,
    pub dc_input_hi: f64,
    pub shift: ShiftTransfer,
    pub shift_dac: DacSettings,
    pub current_source: ChannelMap,
    pub shift_channel: ChannelMap,
    pub modes: Vec<ModeLimits>,
    #[serde(default)]
    pub monitors: Vec<MonitorLimit>,
    #[serde(default)]
    pub device_config: Vec<ConfigEntry>,
    /// Pause after switching sources or DAC levels.
    #[serde(default)]
    pub settle_ms: u64,
    #[serde(default)]
    pub fru: FruSettings,
    pub report_dir: PathBuf,
}
impl Default for BoardProfile {
    fn default() -> Self {
        Self::cn0579()
    }
}
impl BoardProfile {
    /// CN0579 four-channel IEPE/CbM board.
    pub fn cn0579() -> Self {
        Self {
            board: "CN0579".into(),
            device_name: "ad7768-4".into(),
            channels: 4,
            acquisition: AcquisitionPlan::default(),
            stimulus: StimulusSettings::default(),
            dc_input_lo: 10.7,
            dc_input_hi: 11.3,
            shift: ShiftTransfer::default(),
            shift_dac: DacSettings::default(),
            current_source: ChannelMap::new("cn0579_control:voltage{}/raw", 4),
            shift_channel: ChannelMap::new("ad5696:voltage{}/raw", 4),
            modes: vec![
                ModeLimits {
                    mode: TestMode::FullScale,
                    limits: vec![
                        LimitSpec::between(Metric::DcOffset, -0.1, 0.1),
                        LimitSpec::between(Metric::FundamentalAmplitude, 4.8, 5.1),
                        LimitSpec::greater_than(Metric::Snr, 43.0),
                        LimitSpec::less_than(Metric::Thd, -45.0),
                        LimitSpec::greater_than(Metric::Sinad, 42.0),
                    ],
                },
                ModeLimits {
                    mode: TestMode::Attenuated,
                    limits: vec![
                        LimitSpec::between(Metric::DcOffset, -0.1, 0.1),
                        LimitSpec::between(Metric::FundamentalAmplitude, 1.15, 1.35),
                        LimitSpec::greater_than(Metric::Snr, 40.0),
                        LimitSpec::less_than(Metric::Thd, -50.0),
                        LimitSpec::greater_than(Metric::Sinad, 39.0),
                    ],
                },
            ],
            monitors: Vec::new(),
            device_config: Vec::new(),
            settle_ms: 2000,
            fru: FruSettings::default(),
            report_dir: PathBuf::from("results"),
        }
    }
    pub fn from_json(text: &str) -> Result<Self, ProdTestError> {
        let profile: BoardProfile = serde_json::from_str(text)?;
        profile.validate()?;
        Ok(profile)
    }
    pub fn load(path: &Path) -> Result<Self, ProdTestError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }
    /// Profile named by `PRODTEST_PROFILE`, or the built-in default.
    pub fn from_env() -> Result<Self, ProdTestError> {
        match std::env::var_os(PROFILE_ENV) {
            Some(path) => {
                log::info!("loading profile {}", Path::new(&path).display());
                Self::load(Path::new(&path))
            }
            None => {
                let profile = Self::default();
                profile.validate()?;
                Ok(profile)
            }
        }
    }
    pub fn validate(&self) -> Result<(), ProdTestError> {
        let plan = &self.acquisition;
        if self.channels == 0 {
            return Err(ProdTestError::Profile("board must have at least one channel".into()));
        }
        if !(plan.sample_rate_hz.is_finite() && plan.sample_rate_hz > 0.0) {
            return Err(ProdTestError::Profile("sample rate must be greater than zero".into()));
        }
        if !(1..=32).contains(&plan.bits) || !(1..=32).contains(&self.shift_dac.bits) {
            return Err(ProdTestError::Profile("resolution must be between 1 and 32 bits".into()));
        }
        if plan.buffer_size < 2 * plan.window.min_len() {
            return Err(ProdTestError::Profile(format!(
                "buffer size {} too small for the {:?} window",
                plan.buffer_size, plan.window
            )));
        }
        let freq = self.stimulus.freq_hz;
        if !(freq > 0.0 && freq < plan.sample_rate_hz / 2.0) {
            return Err(ProdTestError::Profile(format!(
                "stimulus {freq} Hz must lie below half the {} Hz sample rate",
                plan.sample_rate_hz
            )));
        }
        if siggen::optimal_sample_rate(freq).is_none() {
            return Err(ProdTestError::Profile(format!(
                "stimulus {freq} Hz is beyond the signal generator"
            )));
        }
        if self.dc_input_lo > self.dc_input_hi {
            return Err(ProdTestError::Profile("DC input window is inverted".into()));
        }
        for map in [&self.current_source, &self.shift_channel] {
            if map.channels < self.channels || !map.template.contains("{}") {
                return Err(ProdTestError::Profile(format!(
                    "attribute template {:?} does not cover {} channels",
                    map.template, self.channels
                )));
            }
        }
        if self.modes.is_empty() {
            return Err(ProdTestError::Profile("no test modes configured".into()));
        }
        for (i, mode) in self.modes.iter().enumerate() {
            if mode.limits.is_empty() {
                return Err(ProdTestError::Profile(format!("{} has no limits", mode.mode)));
            }
            for other in &self.modes[i + 1..] {
                if other.mode == mode.mode {
                    return Err(ProdTestError::Profile(format!(
                        "{} configured twice",
                        mode.mode
                    )));
                }
                if other.limits == mode.limits {
                    return Err(ProdTestError::Profile(format!(
                        "{} and {} share an identical limit set; each mode needs its own",
                        mode.mode, other.mode
                    )));
                }
            }
        }
        Ok(())
    }
}
#[cfg(test)]
mod tests {
    use super::*;
    #[test]
    fn default_profile_is_valid() {
        let profile = BoardProfile::default();
        profile.validate().unwrap();
        assert_eq!(profile.modes[0].mode, TestMode::FullScale);
        assert_eq!(profile.modes[0].limits.len(), 5);
        assert_ne!(profile.modes[0].limits, profile.modes[1].limits);
    }
    #[test]
    fn stimulus_must_be_measurable_and_reachable() {
        let mut profile = BoardProfile::default();
        profile.stimulus.freq_hz = 2_500_000.0;
        let err = profile.validate().unwrap_err();
        assert!(err.to_string().contains("half the"), "{err}");
        profile.acquisition.sample_rate_hz = 256_000_000.0;
        profile.stimulus.freq_hz = 50_000_000.0;
        let err = profile.validate().unwrap_err();
        assert!(err.to_string().contains("beyond the signal generator"), "{err}");
        profile.stimulus.freq_hz = 0.0;
        assert!(matches!(profile.validate(), Err(ProdTestError::Profile(_))));
    }
    #[test]
    fn identical_mode_limits_are_rejected() {
        let mut profile = BoardProfile::default();
        profile.modes[1].limits = profile.modes[0].limits.clone();
        let err = profile.validate().unwrap_err();
        assert!(err.to_string().contains("identical limit set"), "{err}");
    }
    #[test]
    fn duplicate_mode_is_rejected() {
        let mut profile = BoardProfile::default();
        profile.modes[1].mode = TestMode::FullScale;
        assert!(matches!(profile.validate(), Err(ProdTestError::Profile(_))));
    }
    #[test]
    fn json_round_trip_keeps_profile() {
        let profile = BoardProfile::default();
        let text = serde_json::to_string_pretty(&profile).unwrap();
        let loaded = BoardProfile::from_json(&text).unwrap();
        assert_eq!(loaded, profile);
    }
    #[test]
    fn json_profile_gets_defaults() {
        let mut value = serde_json::to_value(BoardProfile::default()).unwrap();
        let obj = value.as_object_mut().unwrap();
        obj.remove("monitors");
        obj.remove("settle_ms");
        obj.remove("fru");
        let loaded = BoardProfile::from_json(&value.to_string()).unwrap();
        assert_eq!(loaded.settle_ms, 0);
        assert!(loaded.monitors.is_empty());
        assert_eq!(loaded.fru.tool, "fru-dump");
    }
    #[test]
    fn raw_monitor_is_scaled() {
        let temp: MonitorLimit = serde_json::from_str(
            r#"{"name":"Board temperature","key":"voltage3/raw","unit":" C","lo":0,"hi":70,
                "raw":{"adc_lsb":0.5,"scale":0.1}}"#,
        )
        .unwrap();
        assert!((temp.physical(500.0) - 25.0).abs() < 1e-12);
        let plain = MonitorLimit { raw: None, ..temp };
        assert_eq!(plain.physical(3.3), 3.3);
    }
    #[test]
    fn malformed_json_is_a_profile_error() {
        assert!(matches!(
            BoardProfile::from_json("{\"board\": 3}"),
            Err(ProdTestError::Profile(_))
        ));
    }
}
