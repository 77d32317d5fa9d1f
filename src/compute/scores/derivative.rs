//! Derivative-peak similarity family.
//!
//! All four variants compare the first derivative of the smoothed curves.
//! The plain variant pins the high and low derivative peaks in both time and
//! value; the hybrid and cross variants collapse the two time goals into a
//! single cross-correlation offset; the cross-alt variant keeps only the
//! aligned similarity and the offset.

use super::{FeatureTarget, RunError, ScoreOutput, TimeTransform, ValueTransform};
use crate::compute::sim::SimulationOutput;
use crate::compute::{align, numeric, numeric::FitError, peaks};
use crate::schema::ScoreKind;

/// Precomputed state shared by the derivative variants.
#[derive(Debug, Clone)]
pub struct DerivativeDescriptor {
    /// Derivative of the smoothed experimental curve.
    pub exp_derivative: Vec<f64>,
    /// Largest positive derivative peak (time, value).
    pub peak_high: peaks::Peak,
    /// Largest negative derivative peak (time, value).
    pub peak_low: peaks::Peak,
    /// Scores the high-peak time (plain variant).
    pub time_high: TimeTransform,
    /// Scores the low-peak time (plain variant).
    pub time_low: TimeTransform,
    /// Scores the cross-correlation offset (hybrid/cross variants).
    pub time_offset: TimeTransform,
    pub value_high: ValueTransform,
    pub value_low: ValueTransform,
}

pub fn setup(
    selected_times: &[f64],
    selected_values: &[f64],
    cv_time: f64,
    abstol: f64,
) -> Result<DerivativeDescriptor, FitError> {
    let exp_derivative = numeric::smooth_derivative(selected_times, selected_values)?;
    let (peak_high, peak_low) = peaks::find_peak(selected_times, &exp_derivative);

    Ok(DerivativeDescriptor {
        time_high: TimeTransform::new(cv_time, peak_high.0),
        time_low: TimeTransform::new(cv_time, peak_low.0),
        time_offset: TimeTransform::from_diff(cv_time),
        value_high: ValueTransform::new(peak_high.1, abstol),
        value_low: ValueTransform::new(peak_low.1, abstol),
        exp_derivative,
        peak_high,
        peak_low,
    })
}

pub fn run(
    kind: ScoreKind,
    output: &SimulationOutput,
    feature: &FeatureTarget,
    desc: &DerivativeDescriptor,
) -> Result<ScoreOutput, RunError> {
    let sim_values = feature.selected_solution(output)?;
    let exp_values = &feature.selected_values;
    let times = &feature.selected_times;

    let sim_derivative = numeric::smooth_derivative(times, &sim_values)?;
    let (sim_high, sim_low) = peaks::find_peak(times, &sim_derivative);

    let scores = match kind {
        ScoreKind::DerivativeSimilarity => {
            let similarity =
                numeric::pear_corr(numeric::pearson(&sim_derivative, &desc.exp_derivative));
            vec![
                similarity,
                desc.value_high.score(sim_high.1),
                desc.time_high.score(sim_high.0),
                desc.value_low.score(sim_low.1),
                desc.time_low.score(sim_low.0),
            ]
        }
        ScoreKind::DerivativeSimilarityHybrid => {
            let similarity =
                numeric::pear_corr(numeric::pearson(&sim_derivative, &desc.exp_derivative));
            let offset = align::best_time_offset(times, &sim_derivative, &desc.exp_derivative);
            vec![
                similarity,
                desc.time_offset.score(offset.abs()),
                desc.value_high.score(sim_high.1),
                desc.value_low.score(sim_low.1),
            ]
        }
        ScoreKind::DerivativeSimilarityCross => {
            let (raw, offset) =
                align::pearson_aligned(times, &sim_derivative, &desc.exp_derivative);
            vec![
                numeric::pear_corr(raw),
                desc.time_offset.score(offset.abs()),
                desc.value_high.score(sim_high.1),
                desc.value_low.score(sim_low.1),
            ]
        }
        ScoreKind::DerivativeSimilarityCrossAlt => {
            let (raw, offset) =
                align::pearson_aligned(times, &sim_derivative, &desc.exp_derivative);
            vec![numeric::pear_corr(raw), desc.time_offset.score(offset.abs())]
        }
        _ => unreachable!("non-derivative kind dispatched to derivative plugin"),
    };

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
    use std::collections::HashMap;

    fn gaussian(times: &[f64], center: f64) -> Vec<f64> {
        times
            .iter()
            .map(|t| (-(t - center) * (t - center) / 32.0).exp())
            .collect()
    }

    fn build(kind: ScoreKind) -> (Vec<f64>, FeatureTarget, DerivativeDescriptor) {
        let times: Vec<f64> = (0..400).map(|i| i as f64 * 0.25).collect();
        let values = gaussian(&times, 50.0);
        let desc = setup(&times, &values, 10.0, 1e-8).unwrap();
        let feature = FeatureTarget {
            name: "deriv".to_string(),
            kind,
            outputs: vec!["outlet".to_string()],
            selected: vec![true; times.len()],
            selected_times: times.clone(),
            selected_values: values.clone(),
            times: times.clone(),
            values,
            cv_time: 10.0,
            abstol: 1e-8,
            fractions: Vec::new(),
            descriptor: Descriptor::Derivative(desc.clone()),
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
    fn test_setup_finds_inflection_peaks() {
        let (_, _, desc) = build(ScoreKind::DerivativeSimilarity);
        // Rising inflection before the peak, falling after.
        assert!(desc.peak_high.0 < 50.0);
        assert!(desc.peak_low.0 > 50.0);
        assert!(desc.peak_high.1 > 0.0);
        assert!(desc.peak_low.1 < 0.0);
    }

    #[test]
    fn test_identity_scores_high_all_variants() {
        for kind in [
            ScoreKind::DerivativeSimilarity,
            ScoreKind::DerivativeSimilarityHybrid,
            ScoreKind::DerivativeSimilarityCross,
            ScoreKind::DerivativeSimilarityCrossAlt,
        ] {
            let (times, feature, desc) = build(kind);
            let out = run(
                kind,
                &sim_output(&times, feature.values.clone()),
                &feature,
                &desc,
            )
            .unwrap();
            for score in &out.scores {
                assert!(*score > 0.9, "{kind:?}: scores = {:?}", out.scores);
            }
        }
    }

    #[test]
    fn test_score_count_matches_variant() {
        let cases = [
            (ScoreKind::DerivativeSimilarity, 5),
            (ScoreKind::DerivativeSimilarityHybrid, 4),
            (ScoreKind::DerivativeSimilarityCross, 4),
            (ScoreKind::DerivativeSimilarityCrossAlt, 2),
        ];
        for (kind, expected) in cases {
            let (times, feature, desc) = build(kind);
            let out = run(
                kind,
                &sim_output(&times, feature.values.clone()),
                &feature,
                &desc,
            )
            .unwrap();
            assert_eq!(out.scores.len(), expected, "{kind:?}");
        }
    }

    #[test]
    fn test_short_curve_fit_failure() {
        let (_, feature, desc) = build(ScoreKind::DerivativeSimilarity);
        let times = vec![0.0, 1.0, 2.0];
        let mut short = feature.clone();
        short.selected_times = times.clone();
        short.selected_values = vec![0.0, 1.0, 0.0];
        short.times = times.clone();
        short.selected = vec![true; 3];

        let result = run(
            ScoreKind::DerivativeSimilarity,
            &sim_output(&times, vec![0.0, 1.0, 0.0]),
            &short,
            &desc,
        );
        assert!(matches!(result, Err(RunError::Fit(_))));
    }
}
