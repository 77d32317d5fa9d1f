//! Raw and logarithmic sum-of-squared-errors scores.
//!
//! Unlike the similarity plugins these are unbounded: the single objective
//! is the negated error so that larger is still better under maximization.

use super::{FeatureTarget, RunError, ScoreOutput};
use crate::compute::numeric;
use crate::compute::sim::SimulationOutput;
use crate::schema::ScoreKind;

pub fn run(
    kind: ScoreKind,
    output: &SimulationOutput,
    feature: &FeatureTarget,
) -> Result<ScoreOutput, RunError> {
    let sim_values = feature.selected_solution(output)?;
    let exp_values = &feature.selected_values;

    let (sim_cmp, exp_cmp): (Vec<f64>, Vec<f64>) = match kind {
        ScoreKind::Sse => (sim_values.clone(), exp_values.clone()),
        // Values at or below the solver tolerance are noise; clamp before
        // taking logs so zeros do not blow up the error.
        ScoreKind::LogSse => (
            sim_values
                .iter()
                .map(|v| v.max(feature.abstol).ln())
                .collect(),
            exp_values
                .iter()
                .map(|v| v.max(feature.abstol).ln())
                .collect(),
        ),
        _ => unreachable!("non-SSE kind dispatched to SSE plugin"),
    };

    let error = numeric::sse(&sim_cmp, &exp_cmp);
    let diff: Vec<f64> = sim_cmp
        .iter()
        .zip(exp_cmp.iter())
        .map(|(s, e)| s - e)
        .collect();

    Ok(ScoreOutput {
        scores: vec![-error],
        sse: error,
        samples: sim_values.len(),
        sim_times: feature.selected_times.clone(),
        exp_values: exp_values.clone(),
        sim_values,
        minimize: vec![error],
        diff,
    })
}
