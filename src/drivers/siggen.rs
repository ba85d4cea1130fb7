//! Sine buffer synthesis for a cyclic-buffer signal generator (ADALM2000
//! style): pick the lowest output rate that still gives enough points per
//! period, then size the buffer to hold a whole number of periods.
use std::f64::consts::PI;
/// Output rates the generator supports, lowest first.
pub const AVAILABLE_SAMPLE_RATES: [f64; 6] = [750.0, 7_500.0, 75_000.0, 750_000.0, 7_500_000.0, 75_000_000.0];
pub const MIN_POINTS_PER_PERIOD: f64 = 10.0;
pub const MAX_BUFFER_SIZE: usize = 256_000;
const MIN_BUFFER_SIZE: usize = 1024;
fn max_rate() -> f64 {
    AVAILABLE_SAMPLE_RATES[AVAILABLE_SAMPLE_RATES.len() - 1]
}
/// Smallest multiple of `ratio` (within the buffer limit) closest to a whole
/// number of samples.
fn best_ratio(ratio: f64) -> f64 {
    let max_it = (MAX_BUFFER_SIZE as f64 / ratio) as usize;
    let mut best = ratio;
    let mut best_fract = 1.0;
    for i in 1..max_it {
        let candidate = i as f64 * ratio;
        let fract = candidate.fract();
        if fract < best_fract {
            best_fract = fract;
            best = candidate;
        }
        if fract == 0.0 {
            break;
        }
    }
    best
}
/// Buffer length for `freq` at `rate`, or `None` when the rate is unusable.
pub fn samples_count(rate: f64, freq: f64) -> Option<usize> {
    if !(freq > 0.0 && rate > 0.0) {
        return None;
    }
    let ratio = rate / freq;
    if ratio < MIN_POINTS_PER_PERIOD && rate < max_rate() {
        return None;
    }
    if ratio < 2.0 {
        return None;
    }
    let mut size = best_ratio(ratio) as usize;
    while size & 0x03 != 0 {
        size <<= 1;
    }
    while size < MIN_BUFFER_SIZE {
        size <<= 1;
    }
    Some(size)
}
pub fn optimal_sample_rate(freq: f64) -> Option<f64> {
    AVAILABLE_SAMPLE_RATES
        .iter()
        .copied()
        .find(|&rate| samples_count(rate, freq).is_some())
}
/// Returns the output rate and one cyclic buffer of
/// `offset + amplitude * sin(2π (i + phase) / period)`.
pub fn sine_buffer(freq: f64, amplitude: f64, offset: f64, phase_deg: f64) -> Option<(f64, Vec<f64>)> {
    let rate = optimal_sample_rate(freq)?;
    let count = samples_count(rate, freq)?;
    let samples_per_period = rate / freq;
    let phase_in_samples = phase_deg / 360.0 * samples_per_period;
    let buffer = (0..count)
        .map(|i| offset + amplitude * ((i as f64 + phase_in_samples) / samples_per_period * 2.0 * PI).sin())
        .collect();
    Some((rate, buffer))
}
