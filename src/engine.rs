// src/engine.rs
use std::thread;
use std::time::Duration;
use chrono::NaiveDateTime;
use crate::config::{BoardProfile, ModeLimits};
use crate::drivers::limits::{check_against, Comparison};
use crate::drivers::pipeline::ChannelPipeline;
use crate::drivers::source::{
    ChannelGuard, ConfigValue, DeviceSession, StimulusController, StimulusGuard,
};
use crate::drivers::units::{shift_voltage, to_digital_code};
use crate::drivers::ProdTestError;
use crate::operator::Operator;
use crate::report::{ChannelReport, MonitorReading, RunReport};
use crate::types::SerialNumber;
/// Runs the full test of one board against one profile.
pub struct Sequencer<'a, D, S, O>
where
    D: DeviceSession + ?Sized,
    S: StimulusController + ?Sized,
    O: Operator + ?Sized,
{
    profile: &'a BoardProfile,
    device: &'a mut D,
    stimulus: &'a mut S,
    operator: &'a mut O,
}
impl<'a, D, S, O> Sequencer<'a, D, S, O>
where
    D: DeviceSession + ?Sized,
    S: StimulusController + ?Sized,
    O: Operator + ?Sized,
{
    pub fn new(
        profile: &'a BoardProfile,
        device: &'a mut D,
        stimulus: &'a mut S,
        operator: &'a mut O,
    ) -> Self {
        Self {
            profile,
            device,
            stimulus,
            operator,
        }
    }
    /// Measures every channel in every mode.
    ///
    /// Limit violations land in the returned report. Device errors and an
    /// operator quit abort with `Err`; channel and stimulus state is restored
    /// on the way out.
    pub fn run(
        &mut self,
        serial: &SerialNumber,
        started: NaiveDateTime,
    ) -> Result<RunReport, ProdTestError> {
        let profile = self.profile;
        let mut report = RunReport::new(&profile.board, serial.as_str(), started);
        log::info!("testing {} {serial}", profile.board);
        self.configure()?;
        self.read_monitors(&mut report)?;
        for channel in 0..profile.channels {
            for mode in &profile.modes {
                if !self.operator.confirm_mode(channel, mode.mode)? {
                    log::warn!("operator quit before channel {channel}");
                    return Err(ProdTestError::Aborted);
                }
                let entry = self.test_channel(channel, mode, &mut report)?;
                report.channels.push(entry);
            }
        }
        let failures = report.result.failures();
        if failures.is_empty() {
            self.operator.notify("All tests passed.");
        } else {
            self.operator
                .notify(&format!("{} test(s) failed:", failures.len()));
            for failure in failures {
                self.operator.notify(&format!("  {failure}"));
            }
        }
        Ok(report)
    }
    fn configure(&mut self) -> Result<(), ProdTestError> {
        let profile = self.profile;
        for entry in &profile.device_config {
            log::debug!("{} = {}", entry.key, entry.value);
            self.device
                .set_config(&entry.key, &ConfigValue::Text(entry.value.clone()))?;
        }
        Ok(())
    }
    fn read_monitors(&mut self, report: &mut RunReport) -> Result<(), ProdTestError> {
        let profile = self.profile;
        for monitor in &profile.monitors {
            let value = monitor.physical(self.device.read_value(&monitor.key)?);
            let failed = report.result.record(check_against(
                "Monitor",
                &monitor.name,
                value,
                monitor.comparison(),
                &monitor.unit,
            ));
            if failed {
                self.announce_latest(report);
            }
            report.monitors.push(MonitorReading {
                name: monitor.name.clone(),
                value,
                unit: monitor.unit.clone(),
            });
        }
        Ok(())
    }
    fn test_channel(
        &mut self,
        channel: usize,
        mode: &ModeLimits,
        report: &mut RunReport,
    ) -> Result<ChannelReport, ProdTestError> {
        let profile = self.profile;
        let label = format!("{} ch{channel}", mode.mode.label());
        let mut entry = ChannelReport::new(channel, mode.mode);
        let before = report.result.failures().len();
        let mut chan = ChannelGuard::enable(
            &mut *self.device,
            &profile.current_source,
            &profile.shift_channel,
            channel,
        )?;
        let mut stim = StimulusGuard::start(&mut *self.stimulus, &profile.stimulus)?;
        settle(profile.settle_ms);
        let dc = stim.measure_dc()?;
        entry.dc_input = Some(dc);
        let dc_window = Comparison::Between {
            lo: profile.dc_input_lo,
            hi: profile.dc_input_hi,
        };
        let dc_failed = report
            .result
            .record(check_against(&label, "DC input", dc, dc_window, " V"));
        if !dc_failed {
            let volts = shift_voltage(dc, profile.shift);
            let dac = &profile.shift_dac;
            match to_digital_code(volts, dac.vref, dac.bits, dac.encoding) {
                Ok(code) => {
                    entry.shift_voltage = Some(volts);
                    entry.dac_code = Some(code);
                    log::info!("{label}: DC {dc:.4} V, shift {volts:.4} V, DAC code {code}");
                    chan.set_shift_code(code)?;
                    settle(profile.settle_ms);
                    entry.metrics = ChannelPipeline::new(&mut *chan, &profile.acquisition).measure(
                        &label,
                        profile.stimulus.freq_hz,
                        &mode.limits,
                        &mut report.result,
                    )?;
                }
                Err(err) if err.is_analysis() => {
                    report.result.record_error(&label, "Shift DAC", &err);
                }
                Err(err) => return Err(err),
            }
        }
        stim.finish()?;
        drop(chan);
        for failure in &report.result.failures()[before..] {
            self.operator.notify(&format!("FAIL: {failure}"));
        }
        Ok(entry)
    }
    fn announce_latest(&mut self, report: &RunReport) {
        if let Some(failure) = report.result.failures().last() {
            self.operator.notify(&format!("FAIL: {failure}"));
        }
    }
}
fn settle(ms: u64) {
    if ms > 0 {
        thread::sleep(Duration::from_millis(ms));
    }
}
