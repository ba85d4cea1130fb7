use std::fmt;
use serde::{Deserialize, Serialize};
use crate::drivers::fft::SpectralMetrics;
/// Measured quantity a limit applies to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    FundamentalBin,
    FundamentalAmplitude,
    NoiseFloor,
    Snr,
    Thd,
    Sinad,
    Enob,
    Sfdr,
    DcOffset,
}
impl Metric {
    pub fn name(self) -> &'static str {
        match self {
            Metric::FundamentalBin => "Frequency bin",
            Metric::FundamentalAmplitude => "Fundamental amplitude",
            Metric::NoiseFloor => "Noise floor",
            Metric::Snr => "SNR",
            Metric::Thd => "THD",
            Metric::Sinad => "SINAD",
            Metric::Enob => "ENOB",
            Metric::Sfdr => "SFDR",
            Metric::DcOffset => "DC offset",
        }
    }
    pub fn unit(self) -> &'static str {
        match self {
            Metric::FundamentalBin => "",
            Metric::FundamentalAmplitude | Metric::NoiseFloor | Metric::DcOffset => " V",
            Metric::Snr | Metric::Thd | Metric::Sinad | Metric::Sfdr => " dB",
            Metric::Enob => " bits",
        }
    }
    pub fn read(self, metrics: &SpectralMetrics) -> f64 {
        match self {
            Metric::FundamentalBin => metrics.fundamental_bin as f64,
            Metric::FundamentalAmplitude => metrics.fundamental_amplitude,
            Metric::NoiseFloor => metrics.noise_floor,
            Metric::Snr => metrics.snr,
            Metric::Thd => metrics.thd,
            Metric::Sinad => metrics.sinad,
            Metric::Enob => metrics.enob,
            Metric::Sfdr => metrics.sfdr,
            Metric::DcOffset => metrics.dc_offset,
        }
    }
}
impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
/// Pass condition of a limit.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    /// Passes when strictly greater than the bound.
    GreaterThan(f64),
    /// Passes when strictly less than the bound.
    LessThan(f64),
    /// Passes inside `[lo, hi]`, bounds included.
    Between { lo: f64, hi: f64 },
}
impl Comparison {
    pub fn passes(&self, measured: f64) -> bool {
        // written so that NaN never passes
        match *self {
            Comparison::GreaterThan(bound) => measured > bound,
            Comparison::LessThan(bound) => measured < bound,
            Comparison::Between { lo, hi } => lo <= measured && measured <= hi,
        }
    }
}
impl fmt::Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Comparison::GreaterThan(bound) => write!(f, "> {bound}"),
            Comparison::LessThan(bound) => write!(f, "< {bound}"),
            Comparison::Between { lo, hi } => write!(f, "in [{lo}, {hi}]"),
        }
    }
}
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LimitSpec {
    pub metric: Metric,
    pub comparison: Comparison,
}
impl LimitSpec {
    pub fn new(metric: Metric, comparison: Comparison) -> Self {
        Self { metric, comparison }
    }
    pub fn greater_than(metric: Metric, bound: f64) -> Self {
        Self::new(metric, Comparison::GreaterThan(bound))
    }
    pub fn less_than(metric: Metric, bound: f64) -> Self {
        Self::new(metric, Comparison::LessThan(bound))
    }
    pub fn between(metric: Metric, lo: f64, hi: f64) -> Self {
        Self::new(metric, Comparison::Between { lo, hi })
    }
}
/// One violated limit.
#[derive(Clone, Debug, PartialEq)]
pub struct FailureRecord {
    pub test_label: String,
    pub metric_name: String,
    pub measured_value: f64,
    /// `None` when the measurement could not be taken at all.
    pub limit: Option<Comparison>,
    pub message: String,
}
impl fmt::Display for FailureRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}
/// Compares one measurement against its limit. `None` means pass.
pub fn check(
    test_label: &str,
    metric_name: &str,
    measured: f64,
    spec: &LimitSpec,
) -> Option<FailureRecord> {
    check_against(test_label, metric_name, measured, spec.comparison, spec.metric.unit())
}
/// Same as [`check`] for quantities outside [`Metric`], such as supply
/// monitors. `unit` is appended to the numbers in the message.
pub fn check_against(
    test_label: &str,
    metric_name: &str,
    measured: f64,
    comparison: Comparison,
    unit: &str,
) -> Option<FailureRecord> {
    if comparison.passes(measured) {
        return None;
    }
    Some(FailureRecord {
        test_label: test_label.to_string(),
        metric_name: metric_name.to_string(),
        measured_value: measured,
        limit: Some(comparison),
        message: format!(
            "{test_label} failed {metric_name}: measured {measured:.4}{unit}, expected {comparison}{unit}"
        ),
    })
}
#[cfg(test)]
mod tests {
    use super::*;
    #[test]
    fn greater_than_limit() {
        let spec = LimitSpec::greater_than(Metric::Snr, 43.0);
        assert_eq!(check("FS test", "SNR", 50.0, &spec), None);
        let failure = check("FS test", "SNR", 40.0, &spec).unwrap();
        assert_eq!(failure.measured_value, 40.0);
        assert_eq!(failure.metric_name, "SNR");
        assert_eq!(failure.limit, Some(Comparison::GreaterThan(43.0)));
        // the bound itself fails
        assert!(check("FS test", "SNR", 43.0, &spec).is_some());
    }
    #[test]
    fn less_than_limit() {
        let spec = LimitSpec::less_than(Metric::Thd, -45.0);
        assert!(check("FS test", "THD", -60.0, &spec).is_none());
        assert!(check("FS test", "THD", -45.0, &spec).is_some());
        assert!(check("FS test", "THD", f64::NEG_INFINITY, &spec).is_none());
    }
    #[test]
    fn between_is_inclusive() {
        let spec = LimitSpec::between(Metric::DcOffset, -0.1, 0.1);
        assert!(check("ch0", "DC offset", -0.1, &spec).is_none());
        assert!(check("ch0", "DC offset", 0.1, &spec).is_none());
        assert!(check("ch0", "DC offset", 0.1001, &spec).is_some());
    }
    #[test]
    fn monitor_message_carries_unit() {
        let failure = check_against(
            "Monitor",
            "3.3V supply",
            3.5,
            Comparison::Between { lo: 3.15, hi: 3.45 },
            " V",
        )
        .unwrap();
        assert_eq!(
            failure.message,
            "Monitor failed 3.3V supply: measured 3.5000 V, expected in [3.15, 3.45] V"
        );
    }
    #[test]
    fn nan_never_passes() {
        for spec in [
            LimitSpec::greater_than(Metric::Sinad, 0.0),
            LimitSpec::less_than(Metric::Thd, 0.0),
            LimitSpec::between(Metric::Enob, 0.0, 30.0),
        ] {
            assert!(check("ch0", spec.metric.name(), f64::NAN, &spec).is_some());
        }
    }
    #[test]
    fn limit_spec_deserializes_from_profile_json() {
        let spec: LimitSpec =
            serde_json::from_str(r#"{"metric":"sinad","comparison":{"greater_than":42.0}}"#)
                .unwrap();
        assert_eq!(spec, LimitSpec::greater_than(Metric::Sinad, 42.0));
        let spec: LimitSpec = serde_json::from_str(
            r#"{"metric":"dc_offset","comparison":{"between":{"lo":-0.1,"hi":0.1}}}"#,
        )
        .unwrap();
        assert_eq!(spec, LimitSpec::between(Metric::DcOffset, -0.1, 0.1));
    }
}
