//! Conversions between raw converter codes and physical units.
//!
//! ADC side:
//! - `voltage = code * vref / full_scale`
//! - full_scale is `2^(bits-1)` for bipolar (two's complement) output and
//!   `2^bits` for straight-binary unipolar output. The encoding has to match
//!   what the converter actually produces; a 24-bit bipolar part divides by
//!   `2^23`, not `2^24`.
//!
//! DAC side:
//! - `code = round(voltage * full_scale / vref)`, clamped to the code range.
//!
//! Monitor channels (temperature, current, supply rails) are a voltage
//! reading multiplied by a per-channel scale factor.
use serde::{Deserialize, Serialize};
use crate::drivers::ProdTestError;
/// Output encoding of a converter.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Encoding {
    Bipolar,
    Unipolar,
}
impl Encoding {
    pub fn full_scale(self, bits: u32) -> f64 {
        match self {
            Encoding::Bipolar => 2f64.powi(bits as i32 - 1),
            Encoding::Unipolar => 2f64.powi(bits as i32),
        }
    }
    /// Inclusive code range representable at `bits` resolution.
    pub fn code_range(self, bits: u32) -> (i64, i64) {
        match self {
            Encoding::Bipolar => {
                let half = 1i64 << (bits - 1);
                (-half, half - 1)
            }
            Encoding::Unipolar => (0, (1i64 << bits) - 1),
        }
    }
}
/// Converts a raw ADC code to volts.
pub fn to_voltage(code: i64, vref: f64, bits: u32, encoding: Encoding) -> f64 {
    code as f64 * vref / encoding.full_scale(bits)
}
/// Converts a voltage setpoint to the nearest DAC code.
///
/// Voltages inside the nominal span (`[-vref, vref]` bipolar, `[0, vref]`
/// unipolar) always succeed; the top of the span rounds one code past the
/// maximum and is clamped. Anything outside the span is a `Range` error.
pub fn to_digital_code(
    voltage: f64,
    vref: f64,
    bits: u32,
    encoding: Encoding,
) -> Result<i64, ProdTestError> {
    if !(1..=32).contains(&bits) {
        return Err(ProdTestError::Range {
            value: bits as f64,
            reason: "resolution must be between 1 and 32 bits".into(),
        });
    }
    if !(vref.is_finite() && vref > 0.0) {
        return Err(ProdTestError::Range {
            value: vref,
            reason: "reference voltage must be positive".into(),
        });
    }
    let lower = match encoding {
        Encoding::Bipolar => -vref,
        Encoding::Unipolar => 0.0,
    };
    if !voltage.is_finite() || voltage < lower || voltage > vref {
        return Err(ProdTestError::Range {
            value: voltage,
            reason: format!("outside converter span [{lower}, {vref}] V"),
        });
    }
    let (min_code, max_code) = encoding.code_range(bits);
    let code = (voltage * encoding.full_scale(bits) / vref).round() as i64;
    Ok(code.clamp(min_code, max_code))
}
/// Monitor input read as a raw code. `scale` is the per-channel factor,
/// e.g. degrees C per mV or amps per mV.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChannelScale {
    pub adc_lsb: f64,
    pub scale: f64,
}
/// Physical value of a monitor channel: `code * adc_lsb * scale`.
pub fn to_physical(code: i64, adc_lsb: f64, scale: &ChannelScale) -> f64 {
    code as f64 * adc_lsb * scale.scale
}
/// Level-shift network in front of the ADC driver. The shift voltage the DAC
/// must produce for a given DC input is `(dc * gain + offset) / divisor`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ShiftTransfer {
    pub gain: f64,
    pub offset: f64,
    pub divisor: f64,
}
impl Default for ShiftTransfer {
    fn default() -> Self {
        Self {
            gain: 0.3,
            offset: 2.5,
            divisor: 1.3,
        }
    }
}
pub fn shift_voltage(dc_input: f64, transfer: ShiftTransfer) -> f64 {
    (dc_input * transfer.gain + transfer.offset) / transfer.divisor
}
