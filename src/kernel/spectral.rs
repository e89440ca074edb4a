//! Frequency-domain helpers: FFT cross-correlation, shifts and a periodogram
//! noise estimate.

use rustfft::num_complex::Complex;
use rustfft::FftPlanner;

/// Full linear cross-correlation of `a` with `b`, computed as the FFT
/// convolution of `a` with time-reversed `b`.
///
/// Entry `i` corresponds to lag `i - (b.len() - 1)`: the score of aligning
/// `b` shifted right by that lag against `a`.
pub fn cross_correlate(a: &[f64], b: &[f64]) -> Vec<f64> {
    if a.is_empty() || b.is_empty() {
        return Vec::new();
    }
    let out_len = a.len() + b.len() - 1;
    let n = out_len.next_power_of_two();

    let mut fa: Vec<Complex<f64>> = a.iter().map(|&v| Complex::new(v, 0.0)).collect();
    fa.resize(n, Complex::new(0.0, 0.0));
    let mut fb: Vec<Complex<f64>> = b.iter().rev().map(|&v| Complex::new(v, 0.0)).collect();
    fb.resize(n, Complex::new(0.0, 0.0));

    let mut planner = FftPlanner::<f64>::new();
    let forward = planner.plan_fft_forward(n);
    let inverse = planner.plan_fft_inverse(n);
    forward.process(&mut fa);
    forward.process(&mut fb);
    for (x, y) in fa.iter_mut().zip(fb.iter()) {
        *x *= *y;
    }
    inverse.process(&mut fa);

    // rustfft does not normalise the inverse transform
    let scale = 1.0 / n as f64;
    fa.iter().take(out_len).map(|c| c.re * scale).collect()
}

/// Lag of the correlation peak for a correlation of `b` (length `b_len`)
/// against some reference. Returns 0 for an empty or non-finite correlation.
pub fn peak_lag(xcorr: &[f64], b_len: usize) -> isize {
    let mut best = None;
    for (i, &v) in xcorr.iter().enumerate() {
        if !v.is_finite() {
            continue;
        }
        match best {
            Some((_, bv)) if bv >= v => {}
            _ => best = Some((i, v)),
        }
    }
    match best {
        Some((i, _)) => i as isize - (b_len as isize - 1),
        None => 0,
    }
}

/// Shift right by `lag` (negative = left), filling vacated samples with zero.
pub fn shift_zero_fill(v: &[f64], lag: isize) -> Vec<f64> {
    let n = v.len() as isize;
    (0..n)
        .map(|t| {
            let src = t - lag;
            if src >= 0 && src < n {
                v[src as usize]
            } else {
                0.0
            }
        })
        .collect()
}

/// Circular shift right by `k` samples (negative = left).
pub fn roll(v: &[f64], k: isize) -> Vec<f64> {
    let n = v.len();
    if n == 0 {
        return Vec::new();
    }
    let k = k.rem_euclid(n as isize) as usize;
    let mut out = vec![0.0; n];
    for (t, &x) in v.iter().enumerate() {
        out[(t + k) % n] = x;
    }
    out
}

/// Linear energy centre of mass `Σ t·v² / Σ v²`, or `None` for a trace
/// without energy.
pub fn energy_center(v: &[f64]) -> Option<f64> {
    let (mut moment, mut energy) = (0.0, 0.0);
    for (t, &x) in v.iter().enumerate() {
        moment += t as f64 * x * x;
        energy += x * x;
    }
    if energy.is_finite() && energy > 0.0 {
        Some(moment / energy)
    } else {
        None
    }
}

/// Noise standard deviation from the upper half of the periodogram
/// (normalised frequencies 0.25–0.5), where slow event kinetics contribute
/// little power.
pub fn noise_std(trace: &[f64]) -> f64 {
    let n = trace.len();
    if n < 4 {
        return 0.0;
    }
    let mut buf: Vec<Complex<f64>> = trace.iter().map(|&v| Complex::new(v, 0.0)).collect();
    let mut planner = FftPlanner::<f64>::new();
    planner.plan_fft_forward(n).process(&mut buf);

    let lo = n / 4;
    let hi = n / 2;
    if hi <= lo {
        return 0.0;
    }
    let mean_power: f64 =
        buf[lo..=hi].iter().map(|c| c.norm_sqr()).sum::<f64>() / (hi - lo + 1) as f64;
    (mean_power / n as f64).sqrt()
}
