//! Shift-invariant similarity metrics for motif kernels and activation traces.
//!
//! All comparators share one formula: L2-normalise both operands, align the
//! second onto the first at the lag of peak cross-correlation, and report
//! `1 - ||â - b̂||²`. Identical patterns (up to scale and shift) score 1,
//! orthogonal ones -1, and anything with a zero operand scores 0.
//!
//! When compiled with the `simd` feature, dot products use SIMD kernels.

use super::array::Matrix;
use super::spectral::{cross_correlate, peak_lag, shift_zero_fill};

/// Which axes of a motif participate in a comparison.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Metric {
    /// Full `[channel][lag]` kernel, aligned in time
    SpatioTemporal,
    /// Per-channel profile (kernel averaged over lags), no alignment
    Spatial,
    /// Activation trace, aligned in time
    Temporal,
}

/// Similarity computation for kernels and traces.
pub struct Similarity;

impl Similarity {
    /// Spatio-temporal similarity of two `[channel][lag]` kernels.
    pub fn spatiotemporal(a: &Matrix, b: &Matrix) -> f64 {
        assert_eq!(
            (a.rows(), a.cols()),
            (b.rows(), b.cols()),
            "Dimension mismatch in spatiotemporal similarity"
        );
        let na = Self::norm(a.data());
        let nb = Self::norm(b.data());
        if na < 1e-10 || nb < 1e-10 {
            return 0.0;
        }

        let window = a.cols();
        let mut xcorr = vec![0.0; 2 * window - 1];
        for c in 0..a.rows() {
            for (acc, v) in xcorr.iter_mut().zip(cross_correlate(a.row(c), b.row(c))) {
                *acc += v;
            }
        }
        let lag = peak_lag(&xcorr, window);

        let mut sq = 0.0;
        for c in 0..a.rows() {
            let shifted = shift_zero_fill(b.row(c), lag);
            sq += a
                .row(c)
                .iter()
                .zip(shifted.iter())
                .map(|(x, y)| {
                    let d = x / na - y / nb;
                    d * d
                })
                .sum::<f64>();
        }
        1.0 - sq
    }

    /// Spatial similarity: compares the per-channel profiles obtained by
    /// averaging each kernel over its lags. Ignores temporal alignment.
    pub fn spatial(a: &Matrix, b: &Matrix) -> f64 {
        assert_eq!(a.rows(), b.rows(), "Dimension mismatch in spatial similarity");
        let pa = Self::channel_profile(a);
        let pb = Self::channel_profile(b);
        Self::aligned(&pa, &pb, 0)
    }

    /// Temporal similarity of two activation traces.
    ///
    /// Invariant to shifts but not to time reversal.
    pub fn temporal(a: &[f64], b: &[f64]) -> f64 {
        assert_eq!(a.len(), b.len(), "Dimension mismatch in temporal similarity");
        if a.is_empty() {
            return 0.0;
        }
        let lag = peak_lag(&cross_correlate(a, b), b.len());
        Self::aligned(a, b, lag)
    }

    /// Dispatch on a [`Metric`]. `Temporal` compares the first rows.
    pub fn compute(a: &Matrix, b: &Matrix, metric: Metric) -> f64 {
        match metric {
            Metric::SpatioTemporal => Self::spatiotemporal(a, b),
            Metric::Spatial => Self::spatial(a, b),
            Metric::Temporal => Self::temporal(a.row(0), b.row(0)),
        }
    }

    /// Mean of each channel row.
    pub fn channel_profile(kernel: &Matrix) -> Vec<f64> {
        let cols = kernel.cols().max(1) as f64;
        (0..kernel.rows())
            .map(|c| kernel.row(c).iter().sum::<f64>() / cols)
            .collect()
    }

    /// Mean of each lag column (the temporal marginal).
    pub fn lag_profile(kernel: &Matrix) -> Vec<f64> {
        let rows = kernel.rows().max(1) as f64;
        (0..kernel.cols())
            .map(|l| (0..kernel.rows()).map(|c| kernel[(c, l)]).sum::<f64>() / rows)
            .collect()
    }

    fn aligned(a: &[f64], b: &[f64], lag: isize) -> f64 {
        let na = Self::norm(a);
        let nb = Self::norm(b);
        if na < 1e-10 || nb < 1e-10 {
            return 0.0;
        }
        let shifted = shift_zero_fill(b, lag);
        let sq: f64 = a
            .iter()
            .zip(shifted.iter())
            .map(|(x, y)| {
                let d = x / na - y / nb;
                d * d
            })
            .sum();
        1.0 - sq
    }

    /// L2 norm.
    pub fn norm(v: &[f64]) -> f64 {
        Self::dot(v, v).max(0.0).sqrt()
    }

    /// Raw dot product.
    #[cfg(feature = "simd")]
    pub fn dot(a: &[f64], b: &[f64]) -> f64 {
        use simsimd::SpatialSimilarity;
        f64::dot(a, b).unwrap_or_else(|| Self::dot_raw(a, b))
    }

    #[cfg(not(feature = "simd"))]
    pub fn dot(a: &[f64], b: &[f64]) -> f64 {
        Self::dot_raw(a, b)
    }

    #[allow(dead_code)]
    fn dot_raw(a: &[f64], b: &[f64]) -> f64 {
        assert_eq!(a.len(), b.len(), "Dimension mismatch in dot product");
        a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decaying_event(len: usize, onset: usize, tau: f64) -> Vec<f64> {
        (0..len)
            .map(|t| {
                if t >= onset {
                    (-((t - onset) as f64) / tau).exp()
                } else {
                    0.0
                }
            })
            .collect()
    }

    fn kernel_with_sequence(channels: usize, window: usize, shift: usize) -> Matrix {
        let mut m = Matrix::zeros(channels, window);
        for c in 0..channels {
            m[(c, (2 * c + shift) % window)] = 1.0 + c as f64;
        }
        m
    }

    #[test]
    fn test_identical_kernels_score_one() {
        let k = kernel_with_sequence(4, 12, 1);
        assert!((Similarity::spatiotemporal(&k, &k) - 1.0).abs() < 1e-9);
        assert!((Similarity::spatial(&k, &k) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_scale_and_shift_invariance() {
        let a = kernel_with_sequence(3, 16, 0);
        let mut b = Matrix::zeros(3, 16);
        for c in 0..3 {
            let row = shift_zero_fill(a.row(c), 3);
            for (l, v) in row.iter().enumerate() {
                b[(c, l)] = 5.0 * v;
            }
        }
        let sim = Similarity::spatiotemporal(&a, &b);
        assert!((sim - 1.0).abs() < 1e-9, "shifted, rescaled copy gave {}", sim);
    }

    #[test]
    fn test_scrambled_channels_score_lower() {
        let a = kernel_with_sequence(4, 16, 0);
        let mut b = a.clone();
        // reverse the channel order of the sequence
        for c in 0..4 {
            b.row_mut(c).copy_from_slice(a.row(3 - c));
        }
        assert!(Similarity::spatiotemporal(&a, &b) < 0.9);
    }

    #[test]
    fn test_temporal_not_reversal_invariant() {
        let a = decaying_event(200, 20, 8.0);
        let reversed: Vec<f64> = a.iter().rev().copied().collect();
        let same = Similarity::temporal(&a, &a);
        let rev = Similarity::temporal(&a, &reversed);
        assert!((same - 1.0).abs() < 1e-9);
        assert!(rev < 0.6, "time-reversed trace should not match, got {}", rev);
    }

    #[test]
    fn test_zero_operand_is_zero() {
        let a = vec![0.0; 10];
        let b: Vec<f64> = (0..10).map(|v| v as f64).collect();
        assert_eq!(Similarity::temporal(&a, &b), 0.0);
    }
}
