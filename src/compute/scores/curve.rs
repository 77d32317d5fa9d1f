//! Whole-curve correlation score.

use super::{FeatureTarget, RunError, ScoreOutput};
use crate::compute::numeric::{self, FitError};
use crate::compute::sim::SimulationOutput;

/// Precomputed state for the curve plugin.
#[derive(Debug, Clone)]
pub struct CurveDescriptor {
    /// Smoothed experimental values over the selection.
    pub smooth_values: Vec<f64>,
    pub peak_max: f64,
}

pub fn setup(selected_values: &[f64]) -> Result<CurveDescriptor, FitError> {
    let smooth_values = numeric::smooth(selected_values)?;
    let peak_max = selected_values
        .iter()
        .cloned()
        .fold(f64::NEG_INFINITY, f64::max);

    Ok(CurveDescriptor {
        smooth_values,
        peak_max,
    })
}

pub fn run(
    output: &SimulationOutput,
    feature: &FeatureTarget,
    desc: &CurveDescriptor,
) -> Result<ScoreOutput, RunError> {
    let sim_values = feature.selected_solution(output)?;
    let exp_values = &feature.selected_values;

    let similarity = numeric::pear_corr(numeric::pearson(&sim_values, &desc.smooth_values));
    let sse = numeric::sse(&sim_values, exp_values);
    let diff: Vec<f64> = sim_values
        .iter()
        .zip(exp_values.iter())
        .map(|(s, e)| s - e)
        .collect();

    Ok(ScoreOutput {
        scores: vec![similarity],
        sse,
        samples: sim_values.len(),
        sim_times: feature.selected_times.clone(),
        exp_values: exp_values.clone(),
        sim_values,
        minimize: vec![1.0 - similarity],
        diff,
    })
}
