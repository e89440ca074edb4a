//! Convolutional reconstruction and its adjoints.
//!
//! Lag `l` of a kernel sits `l - window/2` samples away from the activation
//! that triggers it, so an impulse in `H[k][τ]` paints the motif centred on
//! `τ`. Samples that fall outside `[0, T)` are dropped (zero padding).

use super::array::{Matrix, Tensor3};

/// Signed offset of lag `l` relative to the trigger sample.
#[inline]
fn lag_offset(l: usize, window: usize) -> isize {
    l as isize - (window / 2) as isize
}

/// Full reconstruction `X̂[c][t] = Σ_k Σ_l W[c][k][l] · H[k][t - (l - half)]`.
pub fn reconstruct(w: &Tensor3, h: &Matrix) -> Matrix {
    let [channels, rank, window] = w.dims();
    assert_eq!(h.rows(), rank, "Activation rows must equal kernel rank");
    let samples = h.cols();
    let mut out = Matrix::zeros(channels, samples);
    for k in 0..rank {
        accumulate_motif(w, k, h.row(k), &mut out, window);
    }
    out
}

/// Reconstruction from a single motif and an arbitrary trace.
pub fn reconstruct_motif(w: &Tensor3, k: usize, trace: &[f64]) -> Matrix {
    let [channels, _, window] = w.dims();
    let mut out = Matrix::zeros(channels, trace.len());
    accumulate_motif(w, k, trace, &mut out, window);
    out
}

/// Reconstruction from a standalone `[channel][lag]` kernel.
pub fn reconstruct_kernel(kernel: &Matrix, trace: &[f64]) -> Matrix {
    let (channels, window) = (kernel.rows(), kernel.cols());
    let samples = trace.len();
    let mut out = Matrix::zeros(channels, samples);
    for (tau, &a) in trace.iter().enumerate() {
        if a == 0.0 {
            continue;
        }
        for l in 0..window {
            let t = tau as isize + lag_offset(l, window);
            if t < 0 || t >= samples as isize {
                continue;
            }
            for c in 0..channels {
                out[(c, t as usize)] += kernel[(c, l)] * a;
            }
        }
    }
    out
}

fn accumulate_motif(w: &Tensor3, k: usize, trace: &[f64], out: &mut Matrix, window: usize) {
    let channels = out.rows();
    let samples = out.cols();
    for (tau, &a) in trace.iter().enumerate() {
        if a == 0.0 {
            continue;
        }
        for l in 0..window {
            let t = tau as isize + lag_offset(l, window);
            if t < 0 || t >= samples as isize {
                continue;
            }
            let t = t as usize;
            for c in 0..channels {
                out[(c, t)] += w[(c, k, l)] * a;
            }
        }
    }
}

/// Adjoint with respect to `H`: `out[k][τ] = Σ_c Σ_l W[c][k][l] · G[c][τ + l - half]`.
pub fn correlate_kernels(w: &Tensor3, g: &Matrix) -> Matrix {
    let [channels, rank, window] = w.dims();
    assert_eq!(g.rows(), channels, "Gradient rows must equal channel count");
    let samples = g.cols();
    let mut out = Matrix::zeros(rank, samples);
    for k in 0..rank {
        for tau in 0..samples {
            let mut acc = 0.0;
            for l in 0..window {
                let t = tau as isize + lag_offset(l, window);
                if t < 0 || t >= samples as isize {
                    continue;
                }
                let t = t as usize;
                for c in 0..channels {
                    acc += w[(c, k, l)] * g[(c, t)];
                }
            }
            out[(k, tau)] = acc;
        }
    }
    out
}

/// Adjoint with respect to `W`: `out[c][k][l] = Σ_τ H[k][τ] · G[c][τ + l - half]`.
pub fn correlate_activations(h: &Matrix, g: &Matrix, window: usize) -> Tensor3 {
    let rank = h.rows();
    let channels = g.rows();
    let samples = g.cols();
    assert_eq!(h.cols(), samples, "Activation length must equal signal length");
    let mut out = Tensor3::zeros(channels, rank, window);
    for k in 0..rank {
        let trace = h.row(k);
        for l in 0..window {
            let shift = lag_offset(l, window);
            let lo = (-shift).max(0) as usize;
            let hi = (samples as isize - shift).clamp(0, samples as isize) as usize;
            for c in 0..channels {
                let g_row = g.row(c);
                let mut acc = 0.0;
                for tau in lo..hi {
                    acc += trace[tau] * g_row[(tau as isize + shift) as usize];
                }
                out[(c, k, l)] = acc;
            }
        }
    }
    out
}

/// Centred box smoothing along time with half-width `radius`
/// (window length `2 * radius + 1`).
pub fn smooth_time(m: &Matrix, radius: usize) -> Matrix {
    let cols = m.cols();
    let mut out = Matrix::zeros(m.rows(), cols);
    for r in 0..m.rows() {
        let row = m.row(r);
        let mut prefix = vec![0.0; cols + 1];
        for t in 0..cols {
            prefix[t + 1] = prefix[t] + row[t];
        }
        let dst = out.row_mut(r);
        for (t, d) in dst.iter_mut().enumerate() {
            let lo = t.saturating_sub(radius);
            let hi = (t + radius + 1).min(cols);
            *d = prefix[hi] - prefix[lo];
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dot(a: &[f64], b: &[f64]) -> f64 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    fn lcg(state: &mut u64) -> f64 {
        *state = state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        ((*state >> 33) as f64) / (u32::MAX as f64)
    }

    #[test]
    fn test_impulse_paints_centred_kernel() {
        let mut w = Tensor3::zeros(1, 1, 5);
        for l in 0..5 {
            w[(0, 0, l)] = (l + 1) as f64;
        }
        let mut h = Matrix::zeros(1, 11);
        h[(0, 5)] = 1.0;
        let x = reconstruct(&w, &h);
        // half = 2: lags 0..5 land on t = 3..8
        assert_eq!(&x.row(0)[3..8], &[1.0, 2.0, 3.0, 4.0, 5.0]);
        assert_eq!(x[(0, 2)], 0.0);
        assert_eq!(x[(0, 8)], 0.0);
    }

    #[test]
    fn test_adjoints_match_forward() {
        // <conv(W, H), G> must equal <H, corr_W(G)> and <W, corr_H(G)>
        let (c, k, l, t) = (3, 2, 4, 17);
        let mut s = 7u64;
        let mut w = Tensor3::zeros(c, k, l);
        w.data_mut().iter_mut().for_each(|v| *v = lcg(&mut s));
        let mut h = Matrix::zeros(k, t);
        h.data_mut().iter_mut().for_each(|v| *v = lcg(&mut s));
        let mut g = Matrix::zeros(c, t);
        g.data_mut().iter_mut().for_each(|v| *v = lcg(&mut s));

        let lhs = dot(reconstruct(&w, &h).data(), g.data());
        let via_h = dot(h.data(), correlate_kernels(&w, &g).data());
        let via_w = dot(w.data(), correlate_activations(&h, &g, l).data());

        assert!((lhs - via_h).abs() < 1e-9, "{} vs {}", lhs, via_h);
        assert!((lhs - via_w).abs() < 1e-9, "{} vs {}", lhs, via_w);
    }

    #[test]
    fn test_reconstruct_kernel_matches_motif_path() {
        let mut w = Tensor3::zeros(2, 2, 3);
        let mut s = 11u64;
        w.data_mut().iter_mut().for_each(|v| *v = lcg(&mut s));
        let trace: Vec<f64> = (0..9).map(|_| lcg(&mut s)).collect();

        let a = reconstruct_motif(&w, 1, &trace);
        let b = reconstruct_kernel(&w.slice_mid(1), &trace);
        for (x, y) in a.data().iter().zip(b.data()) {
            assert!((x - y).abs() < 1e-12);
        }
    }

    #[test]
    fn test_smooth_time_box() {
        let m = Matrix::from_rows(&[vec![0.0, 0.0, 1.0, 0.0, 0.0]]);
        let s = smooth_time(&m, 1);
        assert_eq!(s.row(0), &[0.0, 1.0, 1.0, 1.0, 0.0]);
    }
}
