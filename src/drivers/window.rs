use std::f64::consts::PI;
use serde::{Deserialize, Serialize};
/// Weighting applied to a sample block before the FFT.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowKind {
    Rectangular,
    Hann,
    /// 4-term Blackman-Harris, 92 dB sidelobes.
    #[default]
    BlackmanHarris92,
}
const BH92: [f64; 4] = [0.35875, 0.48829, 0.14128, 0.01168];
impl WindowKind {
    /// Half-width of the main lobe in bins. Bins closer than this to a tone
    /// belong to that tone.
    pub fn lobe_half_width(self) -> usize {
        match self {
            WindowKind::Rectangular => 1,
            WindowKind::Hann => 2,
            WindowKind::BlackmanHarris92 => 4,
        }
    }
    /// Shortest block the window is meaningful for.
    pub fn min_len(self) -> usize {
        2 * self.lobe_half_width() + 2
    }
    /// Periodic (DFT-even) coefficients of length `n`.
    pub fn coefficients(self, n: usize) -> Vec<f64> {
        let n_f = n as f64;
        (0..n)
            .map(|i| {
                let x = 2.0 * PI * i as f64 / n_f;
                match self {
                    WindowKind::Rectangular => 1.0,
                    WindowKind::Hann => 0.5 - 0.5 * x.cos(),
                    WindowKind::BlackmanHarris92 => {
                        BH92[0] - BH92[1] * x.cos() + BH92[2] * (2.0 * x).cos()
                            - BH92[3] * (3.0 * x).cos()
                    }
                }
            })
            .collect()
    }
}
