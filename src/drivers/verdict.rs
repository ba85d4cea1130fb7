use crate::drivers::fft::SpectralMetrics;
use crate::drivers::limits::{check, FailureRecord, LimitSpec};
use crate::drivers::ProdTestError;
/// Accumulated verdict for one board.
///
/// Failures are kept in detection order and are never removed; the board
/// passes only while the list is empty.
#[derive(Clone, Debug, PartialEq)]
pub struct TestRunResult {
    serial_number: String,
    failures: Vec<FailureRecord>,
}
impl TestRunResult {
    pub fn new(serial_number: impl Into<String>) -> Self {
        Self {
            serial_number: serial_number.into(),
            failures: Vec::new(),
        }
    }
    pub fn serial_number(&self) -> &str {
        &self.serial_number
    }
    pub fn failures(&self) -> &[FailureRecord] {
        &self.failures
    }
    pub fn overall_pass(&self) -> bool {
        self.failures.is_empty()
    }
    /// Appends a check outcome; passes are ignored. Returns whether it failed.
    pub fn record(&mut self, outcome: Option<FailureRecord>) -> bool {
        match outcome {
            Some(failure) => {
                log::warn!("{failure}");
                self.failures.push(failure);
                true
            }
            None => false,
        }
    }
    /// Records a malformed measurement (e.g. a degenerate spectrum) as a
    /// failure of `metric_name`.
    pub fn record_error(&mut self, test_label: &str, metric_name: &str, err: &ProdTestError) {
        self.record(Some(FailureRecord {
            test_label: test_label.to_string(),
            metric_name: metric_name.to_string(),
            measured_value: f64::NAN,
            limit: None,
            message: format!("{test_label} failed {metric_name}: {err}"),
        }));
    }
    /// Appends every failure of `other` after the ones already recorded.
    pub fn absorb(&mut self, other: TestRunResult) {
        self.failures.extend(other.failures);
    }
    /// Evaluates all `specs` against `metrics`, appending every violation.
    /// Returns the failures added by this call.
    pub fn run_checks(
        &mut self,
        test_label: &str,
        metrics: &SpectralMetrics,
        specs: &[LimitSpec],
    ) -> &[FailureRecord] {
        let start = self.failures.len();
        for spec in specs {
            let measured = spec.metric.read(metrics);
            self.record(check(test_label, spec.metric.name(), measured, spec));
        }
        &self.failures[start..]
    }
}
/// Fresh verdict for one set of metrics. Every limit is evaluated even after
/// a failure so the result lists every violation.
pub fn run_checks(
    serial_number: &str,
    test_label: &str,
    metrics: &SpectralMetrics,
    specs: &[LimitSpec],
) -> TestRunResult {
    let mut result = TestRunResult::new(serial_number);
    result.run_checks(test_label, metrics, specs);
    result
}
#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::limits::Metric;
    fn metrics() -> SpectralMetrics {
        SpectralMetrics {
            fundamental_bin: 64,
            fundamental_freq_hz: 1000.0,
            fundamental_amplitude: 4.9,
            noise_floor: 1e-6,
            snr: 40.0,
            thd: -30.0,
            sinad: 39.0,
            enob: 6.2,
            sfdr: 35.0,
            dc_offset: 0.02,
        }
    }
    fn specs() -> Vec<LimitSpec> {
        vec![
            LimitSpec::greater_than(Metric::Snr, 43.0),
            LimitSpec::less_than(Metric::Thd, -45.0),
            LimitSpec::greater_than(Metric::Sinad, 42.0),
            LimitSpec::between(Metric::DcOffset, -0.1, 0.1),
        ]
    }
    #[test]
    fn every_violation_is_reported_in_order() {
        let result = run_checks("2022051000", "FS test ch0", &metrics(), &specs());
        assert!(!result.overall_pass());
        let names: Vec<&str> = result
            .failures()
            .iter()
            .map(|f| f.metric_name.as_str())
            .collect();
        assert_eq!(names, vec!["SNR", "THD", "SINAD"]);
        assert_eq!(result.serial_number(), "2022051000");
    }
    #[test]
    fn run_checks_is_idempotent() {
        let first = run_checks("2022051000", "FS test ch0", &metrics(), &specs());
        let second = run_checks("2022051000", "FS test ch0", &metrics(), &specs());
        assert_eq!(first, second);
    }
    #[test]
    fn passing_metrics_leave_result_clean() {
        let mut good = metrics();
        good.snr = 60.0;
        good.thd = -70.0;
        good.sinad = 59.0;
        let result = run_checks("2022051000", "FS test ch0", &good, &specs());
        assert!(result.overall_pass());
        assert!(result.failures().is_empty());
    }
    #[test]
    fn results_accumulate_across_channels() {
        let mut session = TestRunResult::new("2022051000");
        session.absorb(run_checks("2022051000", "ch0", &metrics(), &specs()));
        let added = session.run_checks("ch1", &metrics(), &specs()).len();
        assert_eq!(added, 3);
        session.record_error(
            "ch2",
            "Spectrum",
            &ProdTestError::DegenerateSignal("flat".into()),
        );
        assert_eq!(session.failures().len(), 7);
        assert_eq!(session.failures()[6].test_label, "ch2");
        assert!(session.failures()[6].message.contains("degenerate"));
    }
}
