use rustfft::{num_complex::Complex64, FftPlanner};
use crate::drivers::buffer::CalibratedSignal;
use crate::drivers::window::WindowKind;
use crate::drivers::ProdTestError;
/// Harmonics 2..=5 are counted as distortion unless configured otherwise.
pub const DEFAULT_HARMONICS: usize = 5;
/// Tones below this (relative to the DC level) are rounding residue from the
/// mean subtraction, not signal.
const MIN_TONE_AMPLITUDE: f64 = 1e-12;
/// Dynamic-performance figures of one acquisition.
///
/// Amplitudes are in volts (peak), ratios in dB. `fundamental_bin` is the
/// integer FFT bin with the largest magnitude; `fundamental_freq_hz` refines
/// it by parabolic interpolation over the neighbouring bins.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SpectralMetrics {
    pub fundamental_bin: usize,
    pub fundamental_freq_hz: f64,
    pub fundamental_amplitude: f64,
    pub noise_floor: f64,
    pub snr: f64,
    pub thd: f64,
    pub sinad: f64,
    pub enob: f64,
    pub sfdr: f64,
    pub dc_offset: f64,
}
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Owner {
    Free,
    Dc,
    Fundamental,
    Harmonic,
}
/// Windowed-FFT analyzer for single-tone test signals.
#[derive(Clone, Copy, Debug)]
pub struct SpectrumAnalyzer {
    window: WindowKind,
    harmonics: usize,
}
impl Default for SpectrumAnalyzer {
    fn default() -> Self {
        Self::new(WindowKind::default())
    }
}
impl SpectrumAnalyzer {
    pub fn new(window: WindowKind) -> Self {
        Self {
            window,
            harmonics: DEFAULT_HARMONICS,
        }
    }
    pub fn with_harmonics(mut self, harmonics: usize) -> Self {
        self.harmonics = harmonics.max(1);
        self
    }
    /// Fails with `InsufficientSamples` below two window lengths and with
    /// `DegenerateSignal` when nothing but DC is present. A spectrum without
    /// measurable noise or distortion reports infinite SNR / SINAD / SFDR and
    /// `-inf` THD.
    pub fn analyze(&self, signal: &CalibratedSignal) -> Result<SpectralMetrics, ProdTestError> {
        let n = signal.samples.len();
        let needed = 2 * self.window.min_len();
        if n < needed {
            return Err(ProdTestError::InsufficientSamples { needed, actual: n });
        }
        if !(signal.sample_rate_hz.is_finite() && signal.sample_rate_hz > 0.0) {
            return Err(ProdTestError::Range {
                value: signal.sample_rate_hz,
                reason: "sample rate must be greater than zero".into(),
            });
        }
        let dc_offset = signal.mean();
        let coeffs = self.window.coefficients(n);
        let coherent_gain: f64 = coeffs.iter().sum();
        let energy_gain: f64 = coeffs.iter().map(|w| w * w).sum();
        let mut buffer: Vec<Complex64> = signal
            .samples
            .iter()
            .zip(&coeffs)
            .map(|(v, w)| Complex64::new((v - dc_offset) * w, 0.0))
            .collect();
        let mut planner = FftPlanner::<f64>::new();
        planner.plan_fft_forward(n).process(&mut buffer);
        let half = n / 2;
        let power: Vec<f64> = buffer.iter().take(half + 1).map(|c| c.norm_sqr()).collect();
        let magnitude: Vec<f64> = buffer
            .iter()
            .take(half + 1)
            .map(|c| 2.0 * c.norm() / coherent_gain)
            .collect();
        let lobe = self.window.lobe_half_width();
        let (fund_bin, fund_peak) = (lobe + 1..=half)
            .map(|k| (k, magnitude[k]))
            .fold((0, 0.0f64), |best, cur| if cur.1 > best.1 { cur } else { best });
        if fund_bin == 0
            || !fund_peak.is_finite()
            || fund_peak <= MIN_TONE_AMPLITUDE * (1.0 + dc_offset.abs())
        {
            return Err(ProdTestError::DegenerateSignal(
                "no tone above DC in spectrum".into(),
            ));
        }
        let mut owner = vec![Owner::Free; half + 1];
        for slot in owner.iter_mut().take(lobe + 1) {
            *slot = Owner::Dc;
        }
        for k in lobe_bins(fund_bin, lobe, half) {
            owner[k] = Owner::Fundamental;
        }
        for h in 2..=self.harmonics {
            let center = alias_bin(h * fund_bin, n);
            for k in lobe_bins(center, lobe, half) {
                if owner[k] == Owner::Free {
                    owner[k] = Owner::Harmonic;
                }
            }
        }
        let sum_of = |kind: Owner| -> f64 {
            owner
                .iter()
                .zip(&power)
                .filter(|(o, _)| **o == kind)
                .map(|(_, p)| *p)
                .sum()
        };
        let fundamental_power = sum_of(Owner::Fundamental);
        let harmonic_power = sum_of(Owner::Harmonic);
        let free_count = owner.iter().filter(|o| **o == Owner::Free).count();
        // free bins stand in for the noise hidden under the excluded lobes
        let noise_power = if free_count == 0 {
            0.0
        } else {
            sum_of(Owner::Free) * half as f64 / free_count as f64
        };
        if !(fundamental_power > 0.0) {
            return Err(ProdTestError::DegenerateSignal(
                "fundamental carries no power".into(),
            ));
        }
        let mut free_magnitudes: Vec<f64> = owner
            .iter()
            .zip(&magnitude)
            .filter(|(o, _)| **o == Owner::Free)
            .map(|(_, m)| *m)
            .collect();
        let noise_floor = median(&mut free_magnitudes);
        let largest_spur = owner
            .iter()
            .zip(&magnitude)
            .filter(|(o, _)| matches!(o, Owner::Free | Owner::Harmonic))
            .map(|(_, m)| *m)
            .fold(0.0f64, f64::max);
        let snr = ratio_db(fundamental_power, noise_power);
        let thd = ratio_db(harmonic_power, fundamental_power);
        let sinad = ratio_db(fundamental_power, noise_power + harmonic_power);
        let enob = (sinad - 1.76) / 6.02;
        let sfdr = 20.0 * (fund_peak / largest_spur).log10();
        let fundamental_amplitude = 2.0 * (fundamental_power / (n as f64 * energy_gain)).sqrt();
        let offset = parabolic_offset(&magnitude, fund_bin);
        let fundamental_freq_hz = (fund_bin as f64 + offset) * signal.bin_width_hz();
        log::debug!(
            "fundamental bin {fund_bin} ({fundamental_freq_hz:.3} Hz): amp {fundamental_amplitude:.6} V, snr {snr:.2} dB, thd {thd:.2} dB, sinad {sinad:.2} dB"
        );
        Ok(SpectralMetrics {
            fundamental_bin: fund_bin,
            fundamental_freq_hz,
            fundamental_amplitude,
            noise_floor,
            snr,
            thd,
            sinad,
            enob,
            sfdr,
            dc_offset,
        })
    }
}
/// One-shot analysis counting harmonics `2..=harmonics` as distortion.
pub fn analyze(
    signal: &CalibratedSignal,
    window: WindowKind,
    harmonics: usize,
) -> Result<SpectralMetrics, ProdTestError> {
    SpectrumAnalyzer::new(window)
        .with_harmonics(harmonics)
        .analyze(signal)
}
/// Bin expected for a coherently-sampled tone: `floor(freq / (fs / n))`.
pub fn expected_bin(freq_hz: f64, sample_rate_hz: f64, n: usize) -> usize {
    (freq_hz / (sample_rate_hz / n as f64)).floor() as usize
}
fn lobe_bins(center: usize, lobe: usize, half: usize) -> std::ops::RangeInclusive<usize> {
    center.saturating_sub(lobe)..=(center + lobe).min(half)
}
/// Folds a bin index into the first Nyquist zone.
fn alias_bin(bin: usize, n: usize) -> usize {
    let folded = bin % n;
    if folded > n / 2 {
        n - folded
    } else {
        folded
    }
}
fn ratio_db(num: f64, den: f64) -> f64 {
    10.0 * (num / den).log10()
}
fn median(values: &mut [f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}
fn parabolic_offset(magnitude: &[f64], bin: usize) -> f64 {
    if bin == 0 || bin + 1 >= magnitude.len() {
        return 0.0;
    }
    let (a, b, c) = (magnitude[bin - 1], magnitude[bin], magnitude[bin + 1]);
    if a <= 0.0 || b <= 0.0 || c <= 0.0 {
        return 0.0;
    }
    let (a, b, c) = (a.ln(), b.ln(), c.ln());
    let denom = a - 2.0 * b + c;
    if denom.abs() < f64::EPSILON {
        0.0
    } else {
        (0.5 * (a - c) / denom).clamp(-0.5, 0.5)
    }
}
#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::units::{to_digital_code, to_voltage, Encoding};
    use std::f64::consts::PI;
    fn tone(n: usize, sample_rate_hz: f64, freq_hz: f64, amplitude: f64) -> CalibratedSignal {
        let samples = (0..n)
            .map(|i| amplitude * (2.0 * PI * freq_hz * i as f64 / sample_rate_hz).sin())
            .collect();
        CalibratedSignal::new(samples, sample_rate_hz)
    }
    #[test]
    fn pure_tone_has_no_measurable_noise_or_distortion() {
        let fs = 1_024_000.0;
        let signal = tone(4096, fs, 100.0 * fs / 4096.0, 1.0);
        let metrics = analyze(&signal, WindowKind::BlackmanHarris92, DEFAULT_HARMONICS).unwrap();
        assert_eq!(metrics.fundamental_bin, 100);
        assert!((metrics.fundamental_amplitude - 1.0).abs() < 1e-6);
        assert!((metrics.fundamental_freq_hz - 25_000.0).abs() < 1e-3);
        assert!(metrics.snr > 150.0, "snr {}", metrics.snr);
        assert!(metrics.sinad > 150.0);
        assert!(metrics.thd < -150.0, "thd {}", metrics.thd);
        assert!(metrics.sfdr > 150.0);
        assert!(metrics.enob > 24.0);
        assert!(metrics.dc_offset.abs() < 1e-9);
    }
    #[test]
    fn quantized_tone_reports_converter_resolution() {
        let bits = 16;
        let vref = 1.0;
        let n = 8192;
        let fs = 819_200.0;
        let ideal = tone(n, fs, 401.0 * fs / n as f64, 0.999 * vref);
        let quantized: Vec<f64> = ideal
            .samples
            .iter()
            .map(|&v| {
                let code = to_digital_code(v, vref, bits, Encoding::Bipolar).unwrap();
                to_voltage(code, vref, bits, Encoding::Bipolar)
            })
            .collect();
        let signal = CalibratedSignal::new(quantized, fs);
        let metrics = analyze(&signal, WindowKind::BlackmanHarris92, DEFAULT_HARMONICS).unwrap();
        let ideal_enob = (bits as f64 * 6.02 + 1.76) / 6.02;
        assert!(
            (metrics.enob - ideal_enob).abs() < 0.35,
            "enob {} expected about {}",
            metrics.enob,
            ideal_enob
        );
        assert!(metrics.snr > 95.0 && metrics.snr < 101.0, "snr {}", metrics.snr);
    }
    #[test]
    fn harmonic_distortion_is_measured() {
        let fs = 1_000_000.0;
        let n = 4096;
        let f0 = 50.0 * fs / n as f64;
        let samples = (0..n)
            .map(|i| {
                let t = i as f64 / fs;
                (2.0 * PI * f0 * t).sin() + 0.01 * (2.0 * PI * 3.0 * f0 * t).sin()
            })
            .collect();
        let signal = CalibratedSignal::new(samples, fs);
        let metrics = analyze(&signal, WindowKind::BlackmanHarris92, DEFAULT_HARMONICS).unwrap();
        assert!((metrics.thd + 40.0).abs() < 0.1, "thd {}", metrics.thd);
        assert!((metrics.sfdr - 40.0).abs() < 0.1, "sfdr {}", metrics.sfdr);
        assert!((metrics.sinad - 40.0).abs() < 0.1);
    }
    #[test]
    fn zero_signal_is_degenerate() {
        let signal = CalibratedSignal::new(vec![0.0; 1024], 48_000.0);
        assert!(matches!(
            analyze(&signal, WindowKind::BlackmanHarris92, DEFAULT_HARMONICS),
            Err(ProdTestError::DegenerateSignal(_))
        ));
        let dc_only = CalibratedSignal::new(vec![0.7; 1024], 48_000.0);
        assert!(matches!(
            analyze(&dc_only, WindowKind::Hann, DEFAULT_HARMONICS),
            Err(ProdTestError::DegenerateSignal(_))
        ));
    }
    #[test]
    fn short_signal_is_rejected() {
        let signal = tone(12, 1000.0, 100.0, 1.0);
        assert!(matches!(
            analyze(&signal, WindowKind::BlackmanHarris92, DEFAULT_HARMONICS),
            Err(ProdTestError::InsufficientSamples { needed: 20, actual: 12 })
        ));
    }
    #[test]
    fn twenty_khz_at_ten_msps_lands_on_expected_bin() {
        let n = 256_000;
        let fs = 10_000_000.0;
        let signal = tone(n, fs, 20_000.0, 0.5);
        let metrics = analyze(&signal, WindowKind::BlackmanHarris92, DEFAULT_HARMONICS).unwrap();
        let expected = expected_bin(20_000.0, fs, n);
        assert_eq!(expected, 512);
        assert_eq!(metrics.fundamental_bin, expected);
    }
    #[test]
    fn dc_offset_is_reported_and_removed() {
        let fs = 100_000.0;
        let mut signal = tone(2048, fs, 64.0 * fs / 2048.0, 0.25);
        for v in signal.samples.iter_mut() {
            *v += 1.5;
        }
        let metrics = analyze(&signal, WindowKind::Hann, DEFAULT_HARMONICS).unwrap();
        assert!((metrics.dc_offset - 1.5).abs() < 1e-9);
        assert_eq!(metrics.fundamental_bin, 64);
        assert!((metrics.fundamental_amplitude - 0.25).abs() < 1e-6);
    }
}
