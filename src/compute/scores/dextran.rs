//! Dextran front-detection scores.
//!
//! Dextran pulses carry their information in the rising front of the peak;
//! everything after the steepest slope is dominated by column-end effects.
//! Setup narrows the selection window to end at the maximum positive slope
//! and zeroes the curve outside a front band, so scoring compares fronts
//! only. The hybrid variant additionally pins the front top and the 5%
//! elbow in both time and value.

use super::{FeatureTarget, RunError, ScoreOutput, TimeTransform, ValueTransform};
use crate::compute::sim::SimulationOutput;
use crate::compute::{align, numeric, numeric::FitError};
use crate::schema::ScoreKind;

/// Precomputed state for the dextran plugins.
#[derive(Debug, Clone)]
pub struct DextranDescriptor {
    /// Time of the steepest positive slope; the selection is narrowed to
    /// end here.
    pub max_time: f64,
    /// Curve value at the steepest slope.
    pub max_value: f64,
    /// Experimental front, zeroed outside the [0.5%, 100%] band of
    /// `max_value`, over the narrowed selection.
    pub exp_data_zero: Vec<f64>,
    pub offset_time: TimeTransform,
    pub value: ValueTransform,
    /// Scores the absolute time of the 5% elbow.
    pub lower_time: TimeTransform,
    pub lower_value: ValueTransform,
}

fn first_at_least(values: &[f64], threshold: f64) -> usize {
    values
        .iter()
        .position(|&v| v >= threshold)
        .unwrap_or(0)
}

pub fn setup(
    selected_times: &[f64],
    selected_values: &[f64],
    cv_time: f64,
    abstol: f64,
) -> Result<DextranDescriptor, FitError> {
    let derivative = numeric::smooth_derivative(selected_times, selected_values)?;

    let max_index = derivative
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
        .map(|(i, _)| i)
        .ok_or(FitError::Degenerate)?;
    let max_time = selected_times[max_index];
    let max_value = selected_values[max_index];
    if max_value <= 0.0 {
        return Err(FitError::Degenerate);
    }

    let lower_index = first_at_least(selected_values, 0.05 * max_value);
    let min_index = first_at_least(selected_values, 5e-3 * max_value);

    // Front over the narrowed window only
    let mut exp_data_zero = vec![0.0f64; max_index + 1];
    if min_index < max_index {
        exp_data_zero[min_index..max_index]
            .copy_from_slice(&selected_values[min_index..max_index]);
    }

    Ok(DextranDescriptor {
        max_time,
        max_value,
        exp_data_zero,
        offset_time: TimeTransform::from_diff(cv_time / 10.0),
        value: ValueTransform::new(max_value, abstol),
        lower_time: TimeTransform::new(cv_time / 10.0, selected_times[lower_index]),
        lower_value: ValueTransform::new(selected_values[lower_index], abstol),
    })
}

pub fn run(
    kind: ScoreKind,
    output: &SimulationOutput,
    feature: &FeatureTarget,
    desc: &DextranDescriptor,
) -> Result<ScoreOutput, RunError> {
    // Selection was narrowed to the front window during target setup.
    let sim_values = feature.selected_solution(output)?;
    let times = &feature.selected_times;

    if sim_values.len() != desc.exp_data_zero.len() {
        return Err(RunError::Malformed(format!(
            "front window mismatch for {}",
            feature.name
        )));
    }

    let min_index = first_at_least(&sim_values, 5e-3 * desc.max_value);
    let top_index = first_at_least(&sim_values, desc.max_value);
    let top_index = if top_index > min_index {
        top_index
    } else {
        sim_values.len()
    };

    let mut sim_data_zero = vec![0.0f64; sim_values.len()];
    sim_data_zero[min_index..top_index.min(sim_values.len())]
        .copy_from_slice(&sim_values[min_index..top_index.min(sim_values.len())]);

    let (front_raw, diff_time) = align::pearson_aligned(times, &sim_data_zero, &desc.exp_data_zero);
    let front = numeric::pear_corr(front_raw);

    let sim_derivative = numeric::smooth_derivative(times, &sim_data_zero)?;
    let exp_derivative = numeric::smooth_derivative(times, &desc.exp_data_zero)?;
    let derivative = numeric::pear_corr(numeric::pearson(&sim_derivative, &exp_derivative));

    let scores = match kind {
        ScoreKind::Dextran => vec![front, derivative, desc.offset_time.score(diff_time.abs())],
        ScoreKind::DextranHybrid => {
            let lower_index = first_at_least(&sim_values, 0.05 * desc.max_value);
            let top = sim_data_zero
                .iter()
                .cloned()
                .fold(f64::NEG_INFINITY, f64::max);
            vec![
                front,
                derivative,
                desc.offset_time.score(diff_time.abs()),
                desc.value.score(top),
                desc.lower_time.score(times[lower_index]),
                desc.lower_value.score(sim_values[lower_index]),
            ]
        }
        _ => unreachable!("non-dextran kind dispatched to dextran plugin"),
    };

    let sse = numeric::sse(&sim_data_zero, &desc.exp_data_zero);
    let diff: Vec<f64> = sim_data_zero
        .iter()
        .zip(desc.exp_data_zero.iter())
        .map(|(s, e)| s - e)
        .collect();

    Ok(ScoreOutput {
        minimize: scores.iter().map(|s| 1.0 - s).collect(),
        scores,
        sse,
        samples: sim_values.len(),
        sim_times: times.clone(),
        sim_values: sim_data_zero,
        exp_values: desc.exp_data_zero.clone(),
        diff,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::scores::Descriptor;
    use std::collections::HashMap;

    /// Sigmoid front typical of a dextran pulse.
    fn front(times: &[f64], center: f64) -> Vec<f64> {
        times
            .iter()
            .map(|t| 1.0 / (1.0 + (-(t - center) / 2.0).exp()))
            .collect()
    }

    fn build() -> (Vec<f64>, FeatureTarget, DextranDescriptor) {
        let times: Vec<f64> = (0..400).map(|i| i as f64 * 0.25).collect();
        let values = front(&times, 50.0);
        let desc = setup(&times, &values, 10.0, 1e-8).unwrap();

        // Narrow the selection the way target setup does.
        let selected: Vec<bool> = times.iter().map(|&t| t <= desc.max_time).collect();
        let selected_times: Vec<f64> = times
            .iter()
            .zip(&selected)
            .filter(|(_, s)| **s)
            .map(|(t, _)| *t)
            .collect();
        let selected_values: Vec<f64> = values
            .iter()
            .zip(&selected)
            .filter(|(_, s)| **s)
            .map(|(v, _)| *v)
            .collect();

        let feature = FeatureTarget {
            name: "dex".to_string(),
            kind: ScoreKind::Dextran,
            outputs: vec!["outlet".to_string()],
            selected,
            selected_times,
            selected_values,
            times: times.clone(),
            values: values.clone(),
            cv_time: 10.0,
            abstol: 1e-8,
            fractions: Vec::new(),
            descriptor: Descriptor::Dextran(desc.clone()),
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
    fn test_setup_narrows_at_steepest_slope() {
        let (_, _, desc) = build();
        assert!((desc.max_time - 50.0).abs() < 1.0, "{}", desc.max_time);
        assert!(desc.max_value > 0.4 && desc.max_value < 0.6);
    }

    #[test]
    fn test_identity_front_scores_high() {
        let (times, feature, desc) = build();
        let out = run(
            ScoreKind::Dextran,
            &sim_output(&times, feature.values.clone()),
            &feature,
            &desc,
        )
        .unwrap();
        assert_eq!(out.scores.len(), 3);
        assert!(out.scores[0] > 0.95, "{:?}", out.scores);
        assert!(out.scores[2] > 0.95, "{:?}", out.scores);
    }

    #[test]
    fn test_hybrid_has_six_scores() {
        let (times, mut feature, desc) = build();
        feature.kind = ScoreKind::DextranHybrid;
        let out = run(
            ScoreKind::DextranHybrid,
            &sim_output(&times, feature.values.clone()),
            &feature,
            &desc,
        )
        .unwrap();
        assert_eq!(out.scores.len(), 6);
    }

    #[test]
    fn test_flat_curve_fails_setup() {
        let times: Vec<f64> = (0..100).map(|i| i as f64).collect();
        let values = vec![0.0; 100];
        assert!(setup(&times, &values, 10.0, 1e-8).is_err());
    }
}
