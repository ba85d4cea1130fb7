// src/fru.rs
use std::path::PathBuf;
use std::process::Command;
use chrono::{DateTime, TimeZone, Utc};
use crate::config::FruSettings;
use crate::drivers::ProdTestError;
use crate::types::SerialNumber;
/// FRU manufacturing dates count minutes from this day (IPMI epoch).
const FRU_EPOCH: (i32, u32, u32) = (1996, 1, 1);
/// Minutes between the FRU epoch and `now`, rounded to the nearest minute.
pub fn manufacturing_minutes(now: DateTime<Utc>) -> i64 {
    let (y, m, d) = FRU_EPOCH;
    Utc.with_ymd_and_hms(y, m, d, 0, 0, 0)
        .single()
        .map(|epoch| ((now - epoch).num_seconds() as f64 / 60.0).round() as i64)
        .unwrap_or_default()
}
/// Programs the board identity EEPROM.
pub trait FruWriter {
    fn write(&mut self, serial: &SerialNumber, minutes: i64) -> Result<(), ProdTestError>;
}
/// Shells out to `fru-dump`.
pub struct FruDump {
    tool: String,
    image: PathBuf,
    eeprom: PathBuf,
}
impl FruDump {
    pub fn new(settings: &FruSettings) -> Self {
        Self {
            tool: settings.tool.clone(),
            image: settings.image.clone(),
            eeprom: settings.eeprom.clone(),
        }
    }
    fn args(&self, serial: &SerialNumber, minutes: i64) -> Vec<String> {
        vec![
            "-i".into(),
            self.image.display().to_string(),
            "-s".into(),
            serial.to_string(),
            "-d".into(),
            minutes.to_string(),
            "-o".into(),
            self.eeprom.display().to_string(),
        ]
    }
}
impl FruWriter for FruDump {
    fn write(&mut self, serial: &SerialNumber, minutes: i64) -> Result<(), ProdTestError> {
        let args = self.args(serial, minutes);
        log::info!("{} {}", self.tool, args.join(" "));
        let output = Command::new(&self.tool)
            .args(&args)
            .output()
            .map_err(|e| ProdTestError::EepromWrite(format!("cannot run {}: {e}", self.tool)))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ProdTestError::EepromWrite(format!(
                "{} exited with {}: {}",
                self.tool,
                output.status,
                stderr.trim()
            )));
        }
        Ok(())
    }
}
/// Records writes instead of touching hardware.
#[derive(Default)]
pub struct SimulatedFru {
    pub fail: bool,
    pub written: Vec<(String, i64)>,
}
impl FruWriter for SimulatedFru {
    fn write(&mut self, serial: &SerialNumber, minutes: i64) -> Result<(), ProdTestError> {
        if self.fail {
            return Err(ProdTestError::EepromWrite("simulated EEPROM not responding".into()));
        }
        self.written.push((serial.to_string(), minutes));
        Ok(())
    }
}
