//! Fractionation score.
//!
//! Compares collected fraction masses: each fraction names a component
//! series and a time window; the simulated mass is the trapezoid integral of
//! that series over the window, scored against the measured amount.

use super::{FeatureTarget, RunError, ScoreOutput, ValueTransform};
use crate::compute::numeric::{self, FitError};
use crate::compute::sim::SimulationOutput;
use crate::schema::FractionSpec;

/// Precomputed state for the fractionation plugin.
#[derive(Debug, Clone)]
pub struct FractionationDescriptor {
    /// One value transform per fraction, in configuration order.
    pub transforms: Vec<ValueTransform>,
}

pub fn setup(
    fractions: &[FractionSpec],
    abstol: f64,
) -> Result<FractionationDescriptor, FitError> {
    if fractions.is_empty() {
        return Err(FitError::Degenerate);
    }
    Ok(FractionationDescriptor {
        transforms: fractions
            .iter()
            .map(|f| ValueTransform::new(f.value, abstol))
            .collect(),
    })
}

pub fn run(
    output: &SimulationOutput,
    feature: &FeatureTarget,
    desc: &FractionationDescriptor,
) -> Result<ScoreOutput, RunError> {
    let mut scores = Vec::with_capacity(feature.fractions.len());
    let mut sim_values = Vec::with_capacity(feature.fractions.len());
    let mut exp_values = Vec::with_capacity(feature.fractions.len());
    let mut sim_times = Vec::with_capacity(feature.fractions.len());
    let mut sse = 0.0;

    for (fraction, transform) in feature.fractions.iter().zip(&desc.transforms) {
        let series = output.series.get(&fraction.component).ok_or_else(|| {
            RunError::Malformed(format!("missing component {}", fraction.component))
        })?;
        if series.len() != output.times.len() {
            return Err(RunError::Malformed(format!(
                "component {} has wrong shape",
                fraction.component
            )));
        }

        let window: Vec<(f64, f64)> = output
            .times
            .iter()
            .zip(series.iter())
            .filter(|(t, _)| **t >= fraction.start && **t <= fraction.stop)
            .map(|(t, v)| (*t, *v))
            .collect();
        let times: Vec<f64> = window.iter().map(|(t, _)| *t).collect();
        let values: Vec<f64> = window.iter().map(|(_, v)| *v).collect();

        let mass = numeric::trapz(&times, &values);
        scores.push(transform.score(mass));
        sse += (mass - fraction.value) * (mass - fraction.value);
        sim_values.push(mass);
        exp_values.push(fraction.value);
        sim_times.push((fraction.start + fraction.stop) / 2.0);
    }

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
        sim_times,
        sim_values,
        exp_values,
        diff,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::scores::Descriptor;
    use crate::schema::ScoreKind;
    use std::collections::HashMap;

    fn build(fractions: Vec<FractionSpec>) -> (FeatureTarget, FractionationDescriptor) {
        let times: Vec<f64> = (0..100).map(|i| i as f64).collect();
        let desc = setup(&fractions, 1e-8).unwrap();
        let feature = FeatureTarget {
            name: "frac".to_string(),
            kind: ScoreKind::Fractionation,
            outputs: Vec::new(),
            selected: vec![true; times.len()],
            selected_times: times.clone(),
            selected_values: vec![0.0; times.len()],
            times,
            values: Vec::new(),
            cv_time: 10.0,
            abstol: 1e-8,
            fractions,
            descriptor: Descriptor::Fractionation(desc.clone()),
        };
        (feature, desc)
    }

    #[test]
    fn test_matching_mass_scores_one() {
        // Constant 1.0 over [10, 20] integrates to 10.
        let fractions = vec![FractionSpec {
            component: "comp_a".to_string(),
            start: 10.0,
            stop: 20.0,
            value: 10.0,
        }];
        let (feature, desc) = build(fractions);

        let mut series = HashMap::new();
        series.insert("comp_a".to_string(), vec![1.0; 100]);
        let output = SimulationOutput {
            times: (0..100).map(|i| i as f64).collect(),
            series,
        };

        let out = run(&output, &feature, &desc).unwrap();
        assert_eq!(out.scores.len(), 1);
        assert!(out.scores[0] > 0.99, "{:?}", out.scores);
        assert!(out.sse < 1e-9);
    }

    #[test]
    fn test_wrong_mass_scores_low() {
        let fractions = vec![FractionSpec {
            component: "comp_a".to_string(),
            start: 10.0,
            stop: 20.0,
            value: 100.0,
        }];
        let (feature, desc) = build(fractions);

        let mut series = HashMap::new();
        series.insert("comp_a".to_string(), vec![1.0; 100]);
        let output = SimulationOutput {
            times: (0..100).map(|i| i as f64).collect(),
            series,
        };

        let out = run(&output, &feature, &desc).unwrap();
        assert!(out.scores[0] < 0.1, "{:?}", out.scores);
    }

    #[test]
    fn test_missing_component_is_malformed() {
        let fractions = vec![FractionSpec {
            component: "nope".to_string(),
            start: 0.0,
            stop: 10.0,
            value: 1.0,
        }];
        let (feature, desc) = build(fractions);

        let output = SimulationOutput {
            times: (0..100).map(|i| i as f64).collect(),
            series: HashMap::new(),
        };
        assert!(matches!(
            run(&output, &feature, &desc),
            Err(RunError::Malformed(_))
        ));
    }
}
