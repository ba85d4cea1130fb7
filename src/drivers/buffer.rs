use crate::drivers::units::{to_voltage, Encoding};
/// Raw ADC codes from a single acquisition.
#[derive(Clone, Debug, PartialEq)]
pub struct AcquisitionBuffer {
    codes: Vec<i64>,
    sample_rate_hz: f64,
    vref: f64,
}
impl AcquisitionBuffer {
    pub fn new(codes: Vec<i64>, sample_rate_hz: f64, vref: f64) -> Self {
        Self {
            codes,
            sample_rate_hz,
            vref,
        }
    }
    #[cfg(test)]
    pub fn codes(&self) -> &[i64] {
        &self.codes
    }
    pub fn len(&self) -> usize {
        self.codes.len()
    }
    pub fn duration_seconds(&self) -> f64 {
        if self.sample_rate_hz > 0.0 {
            self.codes.len() as f64 / self.sample_rate_hz
        } else {
            0.0
        }
    }
    /// Converts every code to volts with the device's encoding.
    pub fn calibrate(&self, bits: u32, encoding: Encoding) -> CalibratedSignal {
        CalibratedSignal {
            sample_rate_hz: self.sample_rate_hz,
            samples: self
                .codes
                .iter()
                .map(|&code| to_voltage(code, self.vref, bits, encoding))
                .collect(),
        }
    }
}
/// Acquisition converted to volts.
#[derive(Clone, Debug, PartialEq)]
pub struct CalibratedSignal {
    pub sample_rate_hz: f64,
    pub samples: Vec<f64>,
}
impl CalibratedSignal {
    #[cfg(test)]
    pub fn new(samples: Vec<f64>, sample_rate_hz: f64) -> Self {
        Self {
            sample_rate_hz,
            samples,
        }
    }
    pub fn mean(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.samples.iter().sum::<f64>() / self.samples.len() as f64
    }
    pub fn bin_width_hz(&self) -> f64 {
        self.sample_rate_hz / self.samples.len().max(1) as f64
    }
}
