//! Breakthrough-curve score.
//!
//! Pins the start and end of the plateau where the curve holds above 99.9%
//! of its maximum, plus the plateau height and the overall curve shape.

use super::{FeatureTarget, RunError, ScoreOutput, TimeTransform, ValueTransform};
use crate::compute::sim::SimulationOutput;
use crate::compute::{numeric, numeric::FitError, peaks};

/// Precomputed state for the breakthrough plugin.
#[derive(Debug, Clone)]
pub struct BreakthroughDescriptor {
    pub start_time: TimeTransform,
    pub end_time: TimeTransform,
    pub value: ValueTransform,
    /// Smoothed experimental values over the selection.
    pub smooth_values: Vec<f64>,
}

pub fn setup(
    selected_times: &[f64],
    selected_values: &[f64],
    cv_time: f64,
    abstol: f64,
) -> Result<BreakthroughDescriptor, FitError> {
    let ((start, max), (end, _)) =
        peaks::find_breakthrough(selected_times, selected_values).ok_or(FitError::Degenerate)?;
    let smooth_values = numeric::smooth(selected_values)?;

    Ok(BreakthroughDescriptor {
        start_time: TimeTransform::new(cv_time, start),
        end_time: TimeTransform::new(cv_time, end),
        value: ValueTransform::new(max, abstol),
        smooth_values,
    })
}

pub fn run(
    output: &SimulationOutput,
    feature: &FeatureTarget,
    desc: &BreakthroughDescriptor,
) -> Result<ScoreOutput, RunError> {
    let sim_values = feature.selected_solution(output)?;
    let exp_values = &feature.selected_values;
    let times = &feature.selected_times;

    let ((sim_start, sim_max), (sim_end, _)) =
        peaks::find_breakthrough(times, &sim_values).ok_or(FitError::Degenerate)?;

    let similarity = numeric::pear_corr(numeric::pearson(&sim_values, &desc.smooth_values));
    let scores = vec![
        similarity,
        desc.start_time.score(sim_start),
        desc.end_time.score(sim_end),
        desc.value.score(sim_max),
    ];

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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::scores::Descriptor;
    use crate::schema::ScoreKind;
    use std::collections::HashMap;

    fn breakthrough_curve(times: &[f64], onset: f64) -> Vec<f64> {
        times
            .iter()
            .map(|&t| 1.0 / (1.0 + (-(t - onset)).exp()))
            .collect()
    }

    fn build() -> (Vec<f64>, FeatureTarget, BreakthroughDescriptor) {
        let times: Vec<f64> = (0..300).map(|i| i as f64 * 0.5).collect();
        let values = breakthrough_curve(&times, 30.0);
        let desc = setup(&times, &values, 10.0, 1e-8).unwrap();
        let feature = FeatureTarget {
            name: "bt".to_string(),
            kind: ScoreKind::Breakthrough,
            outputs: vec!["outlet".to_string()],
            selected: vec![true; times.len()],
            selected_times: times.clone(),
            selected_values: values.clone(),
            times: times.clone(),
            values,
            cv_time: 10.0,
            abstol: 1e-8,
            fractions: Vec::new(),
            descriptor: Descriptor::Breakthrough(desc.clone()),
        };
        (times, feature, desc)
    }

    fn sim_output(times: &[f64], values: Vec<f64>) -> SimulationOutput {
        let mut series = HashMap::new();
        series.insert("outlet".to_string(), values);
        SimulationOutput {
            times: times.to_vec(),
            series,
        }
    }

    #[test]
    fn test_identity_scores_high() {
        let (times, feature, desc) = build();
        let out = run(&sim_output(&times, feature.values.clone()), &feature, &desc).unwrap();
        assert_eq!(out.scores.len(), 4);
        for score in &out.scores {
            assert!(*score > 0.9, "{:?}", out.scores);
        }
    }

    #[test]
    fn test_late_breakthrough_loses_time_scores() {
        let (times, feature, desc) = build();
        let late = breakthrough_curve(&times, 60.0);
        let out = run(&sim_output(&times, late), &feature, &desc).unwrap();
        assert!(out.scores[1] < 0.5, "{:?}", out.scores);
    }

    #[test]
    fn test_flat_sim_is_fit_failure() {
        let (times, feature, desc) = build();
        let flat = vec![0.0; times.len()];
        assert!(matches!(
            run(&sim_output(&times, flat), &feature, &desc),
            Err(RunError::Fit(_))
        ));
    }
}
