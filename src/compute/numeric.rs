//! Shared numerics for curve scoring.
//!
//! Savitzky-Golay smoothing/differentiation, Pearson correlation, trapezoid
//! integration and significant-figure rounding. These are the primitives the
//! score plugins build their descriptors and runtime comparisons from.

/// Error raised when a numeric fit cannot be performed.
///
/// Score plugins recover from this by substituting their advertised
/// failure output; it never aborts an evaluation.
#[derive(Debug, thiserror::Error)]
pub enum FitError {
    #[error("data too short for fitting: {len} samples, need at least {need}")]
    TooShort { len: usize, need: usize },
    #[error("smoothing window {window} is invalid for polynomial order {order}")]
    InvalidWindow { window: usize, order: usize },
    #[error("normal equations are singular")]
    Singular,
    #[error("curve is degenerate (constant or empty)")]
    Degenerate,
}

/// Solve a small dense linear system `a * x = b` in place.
///
/// Gaussian elimination with partial pivoting. Sized for the tiny systems
/// that come out of polynomial fitting (order + 1 unknowns).
pub fn solve_linear(a: &mut [Vec<f64>], b: &mut [f64]) -> Result<(), FitError> {
    let n = b.len();

    for col in 0..n {
        // Pivot
        let mut pivot = col;
        for row in (col + 1)..n {
            if a[row][col].abs() > a[pivot][col].abs() {
                pivot = row;
            }
        }
        if a[pivot][col].abs() < 1e-14 {
            return Err(FitError::Singular);
        }
        a.swap(col, pivot);
        b.swap(col, pivot);

        for row in (col + 1)..n {
            let factor = a[row][col] / a[col][col];
            for k in col..n {
                a[row][k] -= factor * a[col][k];
            }
            b[row] -= factor * b[col];
        }
    }

    for col in (0..n).rev() {
        let mut sum = b[col];
        for k in (col + 1)..n {
            sum -= a[col][k] * b[k];
        }
        b[col] = sum / a[col][col];
    }

    Ok(())
}

/// Convolution weights for a Savitzky-Golay filter.
///
/// `deriv = 0` smooths, `deriv = 1` estimates the first derivative assuming
/// sample spacing `delta`.
pub fn savgol_coeffs(
    window: usize,
    order: usize,
    deriv: usize,
    delta: f64,
) -> Result<Vec<f64>, FitError> {
    if window % 2 == 0 || window <= order || deriv > order {
        return Err(FitError::InvalidWindow { window, order });
    }

    let half = (window / 2) as isize;
    let m = order + 1;

    // Normal equations G = A^T A for the Vandermonde matrix over [-half, half].
    let mut g = vec![vec![0.0f64; m]; m];
    for j in -half..=half {
        let x = j as f64;
        let mut powers = vec![0.0f64; m];
        let mut p = 1.0;
        for item in powers.iter_mut() {
            *item = p;
            p *= x;
        }
        for (r, pr) in powers.iter().enumerate() {
            for (c, pc) in powers.iter().enumerate() {
                g[r][c] += pr * pc;
            }
        }
    }

    // Row `deriv` of (A^T A)^-1 gives the fit coefficient the derivative
    // estimate is built from.
    let mut rhs = vec![0.0f64; m];
    rhs[deriv] = 1.0;
    solve_linear(&mut g, &mut rhs)?;

    let mut factorial = 1.0f64;
    for k in 1..=deriv {
        factorial *= k as f64;
    }
    let scale = factorial / delta.powi(deriv as i32);

    let mut weights = Vec::with_capacity(window);
    for j in -half..=half {
        let x = j as f64;
        let mut w = 0.0;
        let mut p = 1.0;
        for coeff in rhs.iter() {
            w += coeff * p;
            p *= x;
        }
        weights.push(w * scale);
    }

    Ok(weights)
}

/// Apply a Savitzky-Golay filter with reflected edges.
pub fn savgol_filter(
    values: &[f64],
    window: usize,
    order: usize,
    deriv: usize,
    delta: f64,
) -> Result<Vec<f64>, FitError> {
    if values.len() < window {
        return Err(FitError::TooShort {
            len: values.len(),
            need: window,
        });
    }

    let weights = savgol_coeffs(window, order, deriv, delta)?;
    let half = window / 2;
    let n = values.len();

    let mut out = vec![0.0f64; n];
    for (i, slot) in out.iter_mut().enumerate() {
        let mut acc = 0.0;
        for (j, w) in weights.iter().enumerate() {
            let idx = i as isize + j as isize - half as isize;
            // Reflect at the boundaries
            let idx = if idx < 0 {
                (-idx) as usize
            } else if idx as usize >= n {
                2 * (n - 1) - idx as usize
            } else {
                idx as usize
            };
            acc += w * values[idx];
        }
        *slot = acc;
    }

    Ok(out)
}

/// Smoothing window sized to 10% of the feature length, forced odd.
pub fn smoothing_window(len: usize) -> usize {
    let mut window = len / 10;
    if window % 2 == 0 {
        window += 1;
    }
    window.max(5)
}

/// Smooth a curve with the default cubic Savitzky-Golay filter.
pub fn smooth(values: &[f64]) -> Result<Vec<f64>, FitError> {
    savgol_filter(values, smoothing_window(values.len()), 3, 0, 1.0)
}

/// First derivative of a smoothed curve with respect to time.
///
/// Assumes approximately uniform sampling; the mean spacing of `times`
/// is used as the step.
pub fn smooth_derivative(times: &[f64], values: &[f64]) -> Result<Vec<f64>, FitError> {
    if times.len() != values.len() || times.len() < 2 {
        return Err(FitError::TooShort {
            len: times.len(),
            need: 2,
        });
    }
    let delta = (times[times.len() - 1] - times[0]) / (times.len() - 1) as f64;
    if delta <= 0.0 {
        return Err(FitError::Degenerate);
    }
    let smoothed = smooth(values)?;
    savgol_filter(&smoothed, smoothing_window(values.len()), 3, 1, delta)
}

/// Trapezoid integral of `values` over `times`.
pub fn trapz(times: &[f64], values: &[f64]) -> f64 {
    let n = times.len().min(values.len());
    let mut area = 0.0;
    for i in 1..n {
        area += (times[i] - times[i - 1]) * (values[i] + values[i - 1]) * 0.5;
    }
    area
}

/// Sum of squared differences.
pub fn sse(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// Pearson correlation coefficient. NaN when either input is constant.
pub fn pearson(a: &[f64], b: &[f64]) -> f64 {
    let n = a.len().min(b.len());
    if n < 2 {
        return f64::NAN;
    }

    let mean_a: f64 = a[..n].iter().sum::<f64>() / n as f64;
    let mean_b: f64 = b[..n].iter().sum::<f64>() / n as f64;

    let mut cov = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for i in 0..n {
        let da = a[i] - mean_a;
        let db = b[i] - mean_b;
        cov += da * db;
        var_a += da * da;
        var_b += db * db;
    }

    cov / (var_a.sqrt() * var_b.sqrt())
}

/// Map a correlation coefficient onto the [0, 1] objective scale.
///
/// Below 0.5 the correlation is remapped linearly so weakly correlated
/// curves still produce a usable gradient toward better shapes.
pub fn pear_corr(cr: f64) -> f64 {
    if cr.is_nan() {
        return 0.0;
    }
    let out = if cr < 0.5 { cr / 3.0 + 1.0 / 3.0 } else { cr };
    out.clamp(0.0, 1.0)
}

/// Geometric-mean style reduction of an objective vector.
///
/// All components non-negative: the n-th root of the product. Any negative
/// component (SSE goals): the negated root of the absolute product, so worse
/// stays worse under sorting.
pub fn product_root(scores: &[f64]) -> f64 {
    if scores.is_empty() {
        return 0.0;
    }
    let n = scores.len() as f64;
    if scores.iter().all(|&s| s >= 0.0) {
        scores
            .iter()
            .product::<f64>()
            .powf(1.0 / n)
    } else {
        -scores
            .iter()
            .map(|s| s.abs())
            .product::<f64>()
            .powf(1.0 / n)
    }
}

/// Round to `figures` significant figures.
pub fn round_sig_figs(value: f64, figures: i32) -> f64 {
    if value == 0.0 || !value.is_finite() {
        return value;
    }
    let magnitude = value.abs().log10().floor() as i32;
    let power = figures - 1 - magnitude;
    let scale = 10f64.powi(power);
    (value * scale).round() / scale
}

/// Round a whole vector to `figures` significant figures.
pub fn round_all(values: &mut [f64], figures: i32) {
    for v in values.iter_mut() {
        *v = round_sig_figs(*v, figures);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_solve_linear() {
        let mut a = vec![vec![2.0, 1.0], vec![1.0, 3.0]];
        let mut b = vec![5.0, 10.0];
        solve_linear(&mut a, &mut b).unwrap();
        assert!((b[0] - 1.0).abs() < 1e-12);
        assert!((b[1] - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_savgol_preserves_polynomial() {
        // A cubic is reproduced exactly by a cubic filter.
        let values: Vec<f64> = (0..50)
            .map(|i| {
                let x = i as f64 * 0.1;
                0.5 * x * x * x - x + 2.0
            })
            .collect();
        let smoothed = savgol_filter(&values, 7, 3, 0, 1.0).unwrap();
        for (raw, sm) in values.iter().zip(&smoothed).skip(3).take(40) {
            assert!((raw - sm).abs() < 1e-9);
        }
    }

    #[test]
    fn test_savgol_derivative_of_line() {
        let values: Vec<f64> = (0..40).map(|i| 3.0 * i as f64 + 1.0).collect();
        let deriv = savgol_filter(&values, 5, 2, 1, 1.0).unwrap();
        for d in deriv.iter().skip(2).take(35) {
            assert!((d - 3.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_savgol_rejects_bad_window() {
        let values = vec![1.0; 20];
        assert!(savgol_filter(&values, 4, 3, 0, 1.0).is_err());
        assert!(savgol_filter(&values, 3, 3, 0, 1.0).is_err());
        assert!(savgol_filter(&values[..3], 5, 3, 0, 1.0).is_err());
    }

    #[test]
    fn test_pearson_identity() {
        let a = vec![1.0, 2.0, 3.0, 4.0];
        assert!((pearson(&a, &a) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_pearson_constant_is_nan() {
        let a = vec![1.0, 2.0, 3.0];
        let b = vec![5.0, 5.0, 5.0];
        assert!(pearson(&a, &b).is_nan());
        assert_eq!(pear_corr(pearson(&a, &b)), 0.0);
    }

    #[test]
    fn test_pear_corr_mapping() {
        assert_eq!(pear_corr(1.0), 1.0);
        assert!((pear_corr(0.5) - 0.5).abs() < 1e-12);
        // Below 0.5 the linear remap applies
        assert!((pear_corr(0.2) - (0.2 / 3.0 + 1.0 / 3.0)).abs() < 1e-12);
        assert_eq!(pear_corr(-1.0), 0.0);
    }

    #[test]
    fn test_trapz() {
        let times = vec![0.0, 1.0, 2.0];
        let values = vec![0.0, 1.0, 0.0];
        assert!((trapz(&times, &values) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_product_root() {
        assert!((product_root(&[1.0, 1.0, 1.0]) - 1.0).abs() < 1e-12);
        assert!((product_root(&[4.0, 1.0]) - 2.0).abs() < 1e-12);
        assert!(product_root(&[0.5, -2.0]) < 0.0);
    }

    #[test]
    fn test_round_sig_figs() {
        assert!((round_sig_figs(123.456, 3) - 123.0).abs() < 1e-9);
        assert!((round_sig_figs(0.0012345, 2) - 0.0012).abs() < 1e-12);
        assert_eq!(round_sig_figs(0.0, 3), 0.0);
    }
}
