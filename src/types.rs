// src/types.rs
use std::fmt;
use clap::Parser;
use serde::{Deserialize, Serialize};
pub const DEFAULT_ENDPOINT: &str = "ip:analog.local";
// Where the board lives
#[derive(PartialEq, Clone, Copy, Debug)]
pub enum ConnectionMode {
    Simulation,
    Hardware,
}
impl ConnectionMode {
    pub fn for_endpoint(endpoint: &str) -> Self {
        if endpoint.starts_with("sim:") {
            ConnectionMode::Simulation
        } else {
            ConnectionMode::Hardware
        }
    }
}
/// Input path setting of the board under test. Each mode carries its own
/// limit set.
#[derive(PartialEq, Eq, Clone, Copy, Debug, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestMode {
    FullScale,
    Attenuated,
}
impl TestMode {
    pub fn label(self) -> &'static str {
        match self {
            TestMode::FullScale => "FS test",
            TestMode::Attenuated => "Attenuated test",
        }
    }
    pub fn switch_position(self) -> &'static str {
        match self {
            TestMode::FullScale => "FS",
            TestMode::Attenuated => "attenuated",
        }
    }
}
impl fmt::Display for TestMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
/// Ten decimal digits, e.g. `2022051000`.
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct SerialNumber(String);
impl SerialNumber {
    pub fn parse(raw: &str) -> Result<Self, String> {
        if raw.len() == 10 && raw.bytes().all(|b| b.is_ascii_digit()) {
            Ok(Self(raw.to_string()))
        } else {
            Err(format!("incorrect serial number {raw:?}: must be 10 digits"))
        }
    }
    pub fn as_str(&self) -> &str {
        &self.0
    }
}
impl fmt::Display for SerialNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
#[derive(Parser, PartialEq, Clone, Debug)]
#[command(name = "prodtest")]
#[command(about = "Production test: program the FRU, measure every channel, write a PASS/FAIL report")]
pub struct Invocation {
    /// 10-digit board serial number, e.g. 2022051000
    #[arg(value_parser = SerialNumber::parse)]
    pub serial: SerialNumber,
    /// Device context URI (sim: for the simulated bench)
    #[arg(default_value = DEFAULT_ENDPOINT)]
    pub endpoint: String,
}
impl Invocation {
    pub fn mode(&self) -> ConnectionMode {
        ConnectionMode::for_endpoint(&self.endpoint)
    }
}
// What the operator wants after a run
#[derive(PartialEq, Clone, Copy, Debug)]
pub enum OperatorChoice {
    Shutdown,
    Repeat,
    Quit,
}
impl OperatorChoice {
    /// `s` shuts down, `q` quits, anything else repeats.
    pub fn parse(input: &str) -> Self {
        match input.trim() {
            "s" => OperatorChoice::Shutdown,
            "q" => OperatorChoice::Quit,
            _ => OperatorChoice::Repeat,
        }
    }
}
#[cfg(test)]
mod tests {
    use super::*;
    #[test]
    fn serial_number_must_be_ten_digits() {
        assert_eq!(SerialNumber::parse("2022051000").unwrap().as_str(), "2022051000");
        for bad in ["abc", "12345", "20220510001", "202205100a", "", " 022051000"] {
            assert!(SerialNumber::parse(bad).is_err(), "{bad:?} accepted");
        }
    }
    #[test]
    fn invocation_defaults_endpoint() {
        let inv = Invocation::try_parse_from(["prodtest", "2022051000"]).unwrap();
        assert_eq!(inv.serial.as_str(), "2022051000");
        assert_eq!(inv.endpoint, DEFAULT_ENDPOINT);
        assert_eq!(inv.mode(), ConnectionMode::Hardware);
        let inv = Invocation::try_parse_from(["prodtest", "2022051000", "sim:"]).unwrap();
        assert_eq!(inv.mode(), ConnectionMode::Simulation);
    }
    #[test]
    fn usage_errors_exit_with_2() {
        for args in [
            vec!["prodtest"],
            vec!["prodtest", "abc"],
            vec!["prodtest", "2022051000", "ip:x", "extra"],
        ] {
            let err = Invocation::try_parse_from(&args).unwrap_err();
            assert_eq!(err.exit_code(), 2, "{args:?}");
        }
        let bad_serial = Invocation::try_parse_from(["prodtest", "12345"]).unwrap_err();
        assert!(bad_serial.to_string().contains("must be 10 digits"));
    }
    #[test]
    fn operator_choice_defaults_to_repeat() {
        assert_eq!(OperatorChoice::parse("s\n"), OperatorChoice::Shutdown);
        assert_eq!(OperatorChoice::parse("q"), OperatorChoice::Quit);
        assert_eq!(OperatorChoice::parse("a"), OperatorChoice::Repeat);
        assert_eq!(OperatorChoice::parse("anything"), OperatorChoice::Repeat);
    }
}
