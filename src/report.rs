// src/report.rs
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use chrono::NaiveDateTime;
use crate::drivers::fft::SpectralMetrics;
use crate::drivers::verdict::TestRunResult;
use crate::drivers::ProdTestError;
use crate::types::TestMode;
const ASCTIME: &str = "%a %b %e %H:%M:%S %Y";
#[derive(Clone, Debug, PartialEq)]
pub struct MonitorReading {
    pub name: String,
    pub value: f64,
    pub unit: String,
}
/// What was seen on one channel in one switch position.
#[derive(Clone, Debug, PartialEq)]
pub struct ChannelReport {
    pub channel: usize,
    pub mode: TestMode,
    pub dc_input: Option<f64>,
    pub shift_voltage: Option<f64>,
    pub dac_code: Option<i64>,
    pub metrics: Option<SpectralMetrics>,
}
impl ChannelReport {
    pub fn new(channel: usize, mode: TestMode) -> Self {
        Self {
            channel,
            mode,
            dc_input: None,
            shift_voltage: None,
            dac_code: None,
            metrics: None,
        }
    }
}
/// Everything one board run produced.
#[derive(Clone, Debug)]
pub struct RunReport {
    pub board: String,
    pub started: NaiveDateTime,
    pub monitors: Vec<MonitorReading>,
    pub channels: Vec<ChannelReport>,
    pub result: TestRunResult,
}
impl RunReport {
    pub fn new(board: impl Into<String>, serial: &str, started: NaiveDateTime) -> Self {
        Self {
            board: board.into(),
            started,
            monitors: Vec::new(),
            channels: Vec::new(),
            result: TestRunResult::new(serial),
        }
    }
    pub fn verdict(&self) -> &'static str {
        if self.result.overall_pass() {
            "PASS"
        } else {
            "FAIL"
        }
    }
    /// `<BOARD>_<serial>_<asctime>.txt`, safe for FAT file systems.
    pub fn file_name(&self) -> String {
        format!(
            "{}_{}_{}.txt",
            self.board,
            self.result.serial_number(),
            self.started.format(ASCTIME)
        )
        .replace(':', "-")
    }
}
/// Writes a plain-text report.
pub struct ReportWriter<W: Write> {
    writer: BufWriter<W>,
}
impl ReportWriter<File> {
    /// Creates the report file under `dir`, creating `dir` if needed.
    pub fn create(dir: &Path, report: &RunReport) -> Result<(Self, PathBuf), ProdTestError> {
        fs::create_dir_all(dir)?;
        let path = dir.join(report.file_name());
        let file = File::create(&path)?;
        Ok((Self::new(file), path))
    }
}
impl<W: Write> ReportWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            writer: BufWriter::new(inner),
        }
    }
    pub fn write(&mut self, report: &RunReport) -> Result<(), ProdTestError> {
        let w = &mut self.writer;
        writeln!(w, "{} production test", report.board)?;
        writeln!(w, "Serial number: {}", report.result.serial_number())?;
        writeln!(w, "Started: {}", report.started.format(ASCTIME))?;
        writeln!(w)?;
        if !report.monitors.is_empty() {
            writeln!(w, "Monitors:")?;
            for m in &report.monitors {
                writeln!(w, "  {}: {:.4}{}", m.name, m.value, m.unit)?;
            }
            writeln!(w)?;
        }
        for ch in &report.channels {
            writeln!(w, "Channel {} ({}):", ch.channel, ch.mode)?;
            if let Some(dc) = ch.dc_input {
                writeln!(w, "  DC input: {dc:.4} V")?;
            }
            if let (Some(v), Some(code)) = (ch.shift_voltage, ch.dac_code) {
                writeln!(w, "  Shift voltage: {v:.4} V (DAC code {code})")?;
            }
            match &ch.metrics {
                Some(m) => {
                    writeln!(
                        w,
                        "  Fundamental: bin {} ({:.2} Hz), {:.4} V",
                        m.fundamental_bin, m.fundamental_freq_hz, m.fundamental_amplitude
                    )?;
                    writeln!(w, "  DC offset: {:.6} V", m.dc_offset)?;
                    writeln!(w, "  Noise floor: {:.3e} V", m.noise_floor)?;
                    writeln!(
                        w,
                        "  SNR {:.2} dB, THD {:.2} dB, SINAD {:.2} dB, SFDR {:.2} dB, ENOB {:.2} bits",
                        m.snr, m.thd, m.sinad, m.sfdr, m.enob
                    )?;
                }
                None => writeln!(w, "  not measured")?,
            }
        }
        writeln!(w)?;
        let failures = report.result.failures();
        if failures.is_empty() {
            writeln!(w, "No failures.")?;
        } else {
            writeln!(w, "Failures ({}):", failures.len())?;
            for f in failures {
                writeln!(w, "  {f}")?;
            }
        }
        writeln!(w)?;
        writeln!(w, "{}", report.verdict())?;
        w.flush()?;
        Ok(())
    }
    #[cfg(test)]
    pub fn into_inner(self) -> Result<W, ProdTestError> {
        self.writer
            .into_inner()
            .map_err(|e| ProdTestError::Io(e.into_error()))
    }
}
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use crate::drivers::limits::{check, LimitSpec, Metric};
    fn started() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2022, 5, 10)
            .unwrap()
            .and_hms_opt(9, 5, 7)
            .unwrap()
    }
    fn metrics() -> SpectralMetrics {
        SpectralMetrics {
            fundamental_bin: 64,
            fundamental_freq_hz: 1000.0,
            fundamental_amplitude: 4.9,
            noise_floor: 1e-6,
            snr: 60.0,
            thd: -70.0,
            sinad: 59.9,
            enob: 9.66,
            sfdr: 72.0,
            dc_offset: 0.001,
        }
    }
    #[test]
    fn file_name_has_no_colons() {
        let report = RunReport::new("CN0579", "2022051000", started());
        let name = report.file_name();
        assert_eq!(name, "CN0579_2022051000_Tue May 10 09-05-07 2022.txt");
        assert!(!name.contains(':'));
    }
    #[test]
    fn passing_report_ends_with_pass() {
        let mut report = RunReport::new("CN0579", "2022051000", started());
        report.monitors.push(MonitorReading {
            name: "5V supply".into(),
            value: 5.01,
            unit: " V".into(),
        });
        let mut ch = ChannelReport::new(0, TestMode::FullScale);
        ch.dc_input = Some(11.0);
        ch.shift_voltage = Some(4.2);
        ch.dac_code = Some(55_050);
        ch.metrics = Some(metrics());
        report.channels.push(ch);
        let mut writer = ReportWriter::new(Vec::new());
        writer.write(&report).unwrap();
        let text = String::from_utf8(writer.into_inner().unwrap()).unwrap();
        assert!(text.contains("Serial number: 2022051000"));
        assert!(text.contains("5V supply: 5.0100 V"));
        assert!(text.contains("DAC code 55050"));
        assert!(text.contains("SNR 60.00 dB"));
        assert!(text.contains("No failures."));
        assert_eq!(text.lines().last(), Some("PASS"));
    }
    #[test]
    fn failing_report_lists_failures() {
        let mut report = RunReport::new("CN0579", "2022051000", started());
        report.channels.push(ChannelReport::new(2, TestMode::Attenuated));
        let spec = LimitSpec::greater_than(Metric::Snr, 43.0);
        report.result.record(check("FS test ch2", "SNR", 12.0, &spec));
        let mut writer = ReportWriter::new(Vec::new());
        writer.write(&report).unwrap();
        let text = String::from_utf8(writer.into_inner().unwrap()).unwrap();
        assert!(text.contains("Channel 2 (Attenuated test):\n  not measured"));
        assert!(text.contains("Failures (1):"));
        assert!(text.contains("FS test ch2 failed SNR"));
        assert_eq!(text.lines().last(), Some("FAIL"));
    }
    #[test]
    fn report_file_is_created_in_directory() {
        let dir = std::env::temp_dir().join(format!("prodtest-report-{}", std::process::id()));
        let report = RunReport::new("CN0579", "2022051000", started());
        let (mut writer, path) = ReportWriter::create(&dir, &report).unwrap();
        writer.write(&report).unwrap();
        drop(writer);
        let text = fs::read_to_string(&path).unwrap();
        assert!(text.ends_with("PASS\n"));
        fs::remove_dir_all(&dir).unwrap();
    }
}
