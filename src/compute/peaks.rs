//! Peak and plateau detection on elution curves.

/// A detected extremum as a (time, value) pair.
pub type Peak = (f64, f64);

/// Detect local maxima and minima.
///
/// `delta` is the minimum excursion a candidate must stand out by before it
/// counts as a peak; this suppresses detector noise riding on the curve.
pub fn peakdetect(times: &[f64], values: &[f64], delta: f64) -> (Vec<Peak>, Vec<Peak>) {
    let mut highs = Vec::new();
    let mut lows = Vec::new();

    let mut max_value = f64::NEG_INFINITY;
    let mut min_value = f64::INFINITY;
    let mut max_pos = 0.0f64;
    let mut min_pos = 0.0f64;
    let mut looking_for_max = true;

    for (&t, &v) in times.iter().zip(values.iter()) {
        if v > max_value {
            max_value = v;
            max_pos = t;
        }
        if v < min_value {
            min_value = v;
            min_pos = t;
        }

        if looking_for_max {
            if v < max_value - delta {
                highs.push((max_pos, max_value));
                min_value = v;
                min_pos = t;
                looking_for_max = false;
            }
        } else if v > min_value + delta {
            lows.push((min_pos, min_value));
            max_value = v;
            max_pos = t;
            looking_for_max = true;
        }
    }

    (highs, lows)
}

/// The extremum with the largest magnitude, or (0, 0) when none was found.
pub fn find_extreme(peaks: &[Peak]) -> Peak {
    peaks
        .iter()
        .copied()
        .max_by(|a, b| a.1.abs().partial_cmp(&b.1.abs()).unwrap())
        .unwrap_or((0.0, 0.0))
}

/// Largest high and low peak of a curve.
pub fn find_peak(times: &[f64], values: &[f64]) -> (Peak, Peak) {
    let spread = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max)
        - values.iter().cloned().fold(f64::INFINITY, f64::min);
    let delta = (spread / 1000.0).max(f64::EPSILON);
    let (highs, lows) = peakdetect(times, values, delta);
    (find_extreme(&highs), find_extreme(&lows))
}

/// Start and end of the breakthrough plateau.
///
/// The plateau is where the curve sits above 99.9% of its maximum. Returns
/// ((start_time, max), (end_time, max)), or None when the curve never rises
/// above zero.
pub fn find_breakthrough(times: &[f64], values: &[f64]) -> Option<(Peak, Peak)> {
    let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    if !(max > 0.0) {
        return None;
    }

    let threshold = 0.999 * max;
    let mut first = None;
    let mut last = None;
    for (&t, &v) in times.iter().zip(values.iter()) {
        if v > threshold {
            if first.is_none() {
                first = Some(t);
            }
            last = Some(t);
        }
    }

    Some(((first?, max), (last?, max)))
}
