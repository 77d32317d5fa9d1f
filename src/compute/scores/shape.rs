//! Shape similarity with time alignment and derivative comparison.
//!
//! Scores the value curve, the retention-time offset found by
//! cross-correlation, and the derivative curve. The decay variant tightens
//! the time transform to a tenth of a column volume.

use super::{FeatureTarget, RunError, ScoreOutput, TimeTransform};
use crate::compute::sim::SimulationOutput;
use crate::compute::{align, numeric, numeric::FitError, peaks};

/// Precomputed state for the shape plugin.
#[derive(Debug, Clone)]
pub struct ShapeDescriptor {
    /// Largest experimental peak (time, value) over the selection.
    pub peak: peaks::Peak,
    /// Transform scoring the cross-correlation offset.
    pub time_transform: TimeTransform,
    /// Derivative of the smoothed experimental curve.
    pub exp_derivative: Vec<f64>,
}

pub fn setup(
    selected_times: &[f64],
    selected_values: &[f64],
    time_scale: f64,
) -> Result<ShapeDescriptor, FitError> {
    let (peak, _) = peaks::find_peak(selected_times, selected_values);
    let exp_derivative = numeric::smooth_derivative(selected_times, selected_values)?;

    Ok(ShapeDescriptor {
        peak,
        time_transform: TimeTransform::from_diff(time_scale),
        exp_derivative,
    })
}

pub fn run(
    output: &SimulationOutput,
    feature: &FeatureTarget,
    desc: &ShapeDescriptor,
) -> Result<ScoreOutput, RunError> {
    let sim_values = feature.selected_solution(output)?;
    let exp_values = &feature.selected_values;
    let times = &feature.selected_times;

    let (raw, offset) = align::pearson_aligned(times, &sim_values, exp_values);
    let similarity = numeric::pear_corr(raw);
    let time_score = desc.time_transform.score(offset.abs());

    let sim_derivative = numeric::smooth_derivative(times, &sim_values)?;
    let derivative_similarity =
        numeric::pear_corr(numeric::pearson(&sim_derivative, &desc.exp_derivative));

    let scores = vec![similarity, time_score, derivative_similarity];
    let sse = numeric::sse(&sim_values, exp_values);
    let diff: Vec<f64> = sim_values
        .iter()
        .zip(exp_values.iter())
        .map(|(s, e)| s - e)
        .collect();

    Ok(ScoreOutput {
        minimize: scores.iter().map(|s| 1.0 - s).collect(),
        scores,
        sse,
        samples: sim_values.len(),
        sim_times: times.clone(),
        exp_values: exp_values.clone(),
        sim_values,
        diff,
    })
}
