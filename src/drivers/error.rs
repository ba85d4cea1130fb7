use thiserror::Error;
#[derive(Debug, Error)]
pub enum ProdTestError {
    #[error("device unavailable: {0}")]
    DeviceUnavailable(String),
    #[error("acquisition timed out after {timeout_ms} ms")]
    AcquisitionTimeout { timeout_ms: u64 },
    #[error("unsupported configuration {key} = {value}")]
    UnsupportedConfig { key: String, value: String },
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("value {value} out of range: {reason}")]
    Range { value: f64, reason: String },
    #[error("insufficient samples: need at least {needed}, got {actual}")]
    InsufficientSamples { needed: usize, actual: usize },
    #[error("degenerate signal: {0}")]
    DegenerateSignal(String),
    #[error("EEPROM write failed: {0}")]
    EepromWrite(String),
    #[error("test aborted by operator")]
    Aborted,
    #[error("invalid profile: {0}")]
    Profile(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
impl ProdTestError {
    /// Errors that describe the measured signal rather than the tooling.
    /// These are recorded as test failures instead of aborting the run.
    pub fn is_analysis(&self) -> bool {
        matches!(
            self,
            ProdTestError::Range { .. }
                | ProdTestError::InsufficientSamples { .. }
                | ProdTestError::DegenerateSignal(_)
        )
    }
    /// Errors that end the current run but leave the bench fit for another
    /// attempt.
    pub fn is_retryable(&self) -> bool {
        self.is_analysis()
            || matches!(
                self,
                ProdTestError::DeviceUnavailable(_)
                    | ProdTestError::AcquisitionTimeout { .. }
                    | ProdTestError::UnsupportedConfig { .. }
                    | ProdTestError::Configuration(_)
            )
    }
}
impl From<serde_json::Error> for ProdTestError {
    fn from(value: serde_json::Error) -> Self {
        ProdTestError::Profile(value.to_string())
    }
}
