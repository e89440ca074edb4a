//! Beta-divergence family used as the reconstruction loss.
//!
//! `beta = 2` is squared error, `beta = 1` generalized Kullback-Leibler,
//! `beta = 0` Itakura-Saito. Rows whose weight is `false` (bad channels) are
//! excluded from both the loss and its gradient.

use super::array::Matrix;

/// Floor applied to reconstructions and ratios to avoid division by zero.
pub const EPS: f64 = 1e-12;

/// `D_beta(x | y)` for a single element.
#[inline]
pub fn beta_divergence(x: f64, y: f64, beta: f64) -> f64 {
    let y = y.max(EPS);
    if beta == 2.0 {
        0.5 * (x - y) * (x - y)
    } else if beta == 1.0 {
        if x <= 0.0 {
            y
        } else {
            x * (x / y).ln() - x + y
        }
    } else if beta == 0.0 {
        let x = x.max(EPS);
        x / y - (x / y).ln() - 1.0
    } else {
        (x.powf(beta) + (beta - 1.0) * y.powf(beta) - beta * x * y.powf(beta - 1.0))
            / (beta * (beta - 1.0))
    }
}

/// Summed divergence between `x` and its reconstruction `y` over valid rows.
pub fn loss(x: &Matrix, y: &Matrix, beta: f64, valid: &[bool]) -> f64 {
    assert_eq!((x.rows(), x.cols()), (y.rows(), y.cols()), "Shape mismatch in loss");
    let mut total = 0.0;
    for r in 0..x.rows() {
        if !valid[r] {
            continue;
        }
        total += x
            .row(r)
            .iter()
            .zip(y.row(r))
            .map(|(&a, &b)| beta_divergence(a, b, beta))
            .sum::<f64>();
    }
    total
}

/// Split `∂D/∂y = y^(β-1) - x·y^(β-2)` into its positive and negative parts.
///
/// Returns `(positive, negative)`; invalid rows are zero in both.
pub fn gradient_parts(x: &Matrix, y: &Matrix, beta: f64, valid: &[bool]) -> (Matrix, Matrix) {
    let mut pos = Matrix::zeros(x.rows(), x.cols());
    let mut neg = Matrix::zeros(x.rows(), x.cols());
    for r in 0..x.rows() {
        if !valid[r] {
            continue;
        }
        let (xr, yr) = (x.row(r), y.row(r));
        let pr = pos.row_mut(r);
        for (t, p) in pr.iter_mut().enumerate() {
            *p = power(yr[t].max(EPS), beta - 1.0);
        }
        let nr = neg.row_mut(r);
        for (t, n) in nr.iter_mut().enumerate() {
            *n = xr[t] * power(yr[t].max(EPS), beta - 2.0);
        }
    }
    (pos, neg)
}

/// Exponent that guarantees monotone descent of multiplicative updates
/// for a given `beta` (Févotte & Idier, 2011).
pub fn mu_exponent(beta: f64) -> f64 {
    if beta < 1.0 {
        1.0 / (2.0 - beta)
    } else if beta > 2.0 {
        1.0 / (beta - 1.0)
    } else {
        1.0
    }
}

#[inline]
fn power(v: f64, e: f64) -> f64 {
    if e == 0.0 {
        1.0
    } else if e == 1.0 {
        v
    } else if e == -1.0 {
        1.0 / v
    } else {
        v.powf(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_divergences_vanish_on_equality() {
        for beta in [0.0, 0.5, 1.0, 1.5, 2.0, 3.0] {
            let d = beta_divergence(0.7, 0.7, beta);
            assert!(d.abs() < 1e-12, "beta={} gave {}", beta, d);
        }
    }

    #[test]
    fn test_divergences_positive_off_diagonal() {
        for beta in [0.0, 1.0, 2.0, 2.5] {
            assert!(beta_divergence(1.0, 2.0, beta) > 0.0);
            assert!(beta_divergence(2.0, 1.0, beta) > 0.0);
        }
    }

    #[test]
    fn test_squared_error_at_beta_two() {
        assert!((beta_divergence(3.0, 1.0, 2.0) - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_invalid_rows_ignored() {
        let x = Matrix::from_rows(&[vec![1.0, 2.0], vec![100.0, 100.0]]);
        let y = Matrix::from_rows(&[vec![1.0, 2.0], vec![0.0, 0.0]]);
        assert!(loss(&x, &y, 2.0, &[true, false]).abs() < 1e-12);
        let (pos, neg) = gradient_parts(&x, &y, 2.0, &[true, false]);
        assert_eq!(pos.row(1), &[0.0, 0.0]);
        assert_eq!(neg.row(1), &[0.0, 0.0]);
        assert_eq!(neg.row(0), &[1.0, 2.0]);
    }
}
