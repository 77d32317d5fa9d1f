//! FFT cross-correlation for curve time alignment.
//!
//! The "cross" score variants compare a simulated curve to the experimental
//! one after sliding it along the time axis to the best-matching offset. The
//! offset itself is scored through a time transform, so a curve with the right
//! shape but the wrong retention time still earns partial credit.

use num_complex::Complex;
use rustfft::FftPlanner;

/// Full linear cross-correlation of two equal-length real signals.
///
/// Output index `lag + (n - 1)` holds the correlation at shift `lag`
/// (negative lags first, zero lag in the middle).
pub fn cross_correlate(a: &[f64], b: &[f64]) -> Vec<f64> {
    let n = a.len().min(b.len());
    let size = (2 * n - 1).next_power_of_two();

    let mut fa: Vec<Complex<f64>> = a[..n]
        .iter()
        .map(|&x| Complex::new(x, 0.0))
        .chain(std::iter::repeat(Complex::new(0.0, 0.0)))
        .take(size)
        .collect();
    let mut fb: Vec<Complex<f64>> = b[..n]
        .iter()
        .map(|&x| Complex::new(x, 0.0))
        .chain(std::iter::repeat(Complex::new(0.0, 0.0)))
        .take(size)
        .collect();

    let mut planner = FftPlanner::new();
    let fft = planner.plan_fft_forward(size);
    fft.process(&mut fa);
    fft.process(&mut fb);

    // corr(a, b) = ifft(fft(a) * conj(fft(b)))
    for (x, y) in fa.iter_mut().zip(fb.iter()) {
        *x *= y.conj();
    }

    let ifft = planner.plan_fft_inverse(size);
    ifft.process(&mut fa);

    let scale = 1.0 / size as f64;
    let mut out = Vec::with_capacity(2 * n - 1);
    // Negative lags live at the tail of the circular buffer.
    for lag in -(n as isize - 1)..0 {
        out.push(fa[(size as isize + lag) as usize].re * scale);
    }
    for lag in 0..n {
        out.push(fa[lag].re * scale);
    }
    out
}

/// Time offset that best aligns `sim` with `exp`.
///
/// Positive offset means the simulated curve arrives late. Returns the offset
/// in time units derived from the mean sample spacing of `times`.
pub fn best_time_offset(times: &[f64], sim: &[f64], exp: &[f64]) -> f64 {
    let n = times.len().min(sim.len()).min(exp.len());
    if n < 2 {
        return 0.0;
    }

    let corr = cross_correlate(&sim[..n], &exp[..n]);
    let best = corr
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
        .map(|(i, _)| i as isize)
        .unwrap_or(n as isize - 1);

    let lag = best - (n as isize - 1);
    let dt = (times[n - 1] - times[0]) / (n - 1) as f64;
    lag as f64 * dt
}

/// Pearson correlation after shifting `sim` onto `exp` by its best offset.
///
/// Returns (correlation, time offset). The correlation is computed on the
/// overlapping samples only.
pub fn pearson_aligned(times: &[f64], sim: &[f64], exp: &[f64]) -> (f64, f64) {
    let n = times.len().min(sim.len()).min(exp.len());
    if n < 2 {
        return (f64::NAN, 0.0);
    }

    let offset = best_time_offset(times, sim, exp);
    let dt = (times[n - 1] - times[0]) / (n - 1) as f64;
    let lag = (offset / dt).round() as isize;

    let (sim_slice, exp_slice) = if lag >= 0 {
        let lag = (lag as usize).min(n - 2);
        (&sim[lag..n], &exp[..n - lag])
    } else {
        let lag = ((-lag) as usize).min(n - 2);
        (&sim[..n - lag], &exp[lag..n])
    };

    (super::numeric::pearson(sim_slice, exp_slice), offset)
}
