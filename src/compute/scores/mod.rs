//! Score plugins: curve comparison strategies.
//!
//! One module per comparison family, dispatched exhaustively over
//! [`ScoreKind`]. Every plugin splits its work into `setup` (once per
//! configuration: smoothing parameters, peak locations, decay transforms)
//! and `run` (every evaluation: pure function of the simulated curve and the
//! precomputed descriptor).
//!
//! `run` reports numeric-fit failures as a typed error; the evaluator
//! substitutes the plugin's advertised failure output and keeps going.

mod breakthrough;
mod curve;
mod derivative;
mod dextran;
mod fractionation;
mod shape;
mod sse;

use crate::compute::numeric::FitError;
use crate::compute::sim::SimulationOutput;
use crate::schema::{FeatureSpec, FractionSpec, ScoreKind};

pub use breakthrough::BreakthroughDescriptor;
pub use curve::CurveDescriptor;
pub use derivative::DerivativeDescriptor;
pub use dextran::DextranDescriptor;
pub use fractionation::FractionationDescriptor;
pub use shape::ShapeDescriptor;

/// Errors out of a plugin `run`.
///
/// `Malformed` aborts the whole evaluation (the simulator produced an
/// unusable curve); `Fit` degrades to the plugin's failure output.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("simulation output unusable: {0}")]
    Malformed(String),
    #[error(transparent)]
    Fit(#[from] FitError),
}

/// Result of scoring one feature against one simulated curve.
#[derive(Debug, Clone)]
pub struct ScoreOutput {
    /// Objective scores in header order.
    pub scores: Vec<f64>,
    /// Sum of squared errors over the selected samples.
    pub sse: f64,
    /// Number of samples compared.
    pub samples: usize,
    /// Selected simulation times (shared grid with the experiment).
    pub sim_times: Vec<f64>,
    /// Selected simulated values.
    pub sim_values: Vec<f64>,
    /// Selected experimental values.
    pub exp_values: Vec<f64>,
    /// Per-score minimization transforms (1 - score for similarity goals).
    pub minimize: Vec<f64>,
    /// Per-sample residuals for gradient-vector mode.
    pub diff: Vec<f64>,
}

/// Bounded decay transform over a time difference.
///
/// Scores `exp(-ln 2 * |dt| / scale)`: 1 at zero offset, 0.5 one scale unit
/// away, decaying smoothly toward 0.
#[derive(Debug, Clone)]
pub struct TimeTransform {
    scale: f64,
    reference: f64,
}

impl TimeTransform {
    /// Transform that scores an absolute time against a reference time.
    pub fn new(scale: f64, reference: f64) -> Self {
        Self {
            scale: scale.max(f64::MIN_POSITIVE),
            reference,
        }
    }

    /// Transform whose input is already a time difference.
    pub fn from_diff(scale: f64) -> Self {
        Self::new(scale, 0.0)
    }

    pub fn score(&self, x: f64) -> f64 {
        let dt = (x - self.reference).abs();
        (-std::f64::consts::LN_2 * dt / self.scale).exp()
    }
}

/// Bounded decay transform over a value difference.
///
/// Relative deviation is scored as `exp(-ln 2 * |dv|/ref / slope)`; the
/// reference is floored at the simulator's absolute tolerance so noise-level
/// peaks cannot produce spurious precision demands.
#[derive(Debug, Clone)]
pub struct ValueTransform {
    reference: f64,
    slope: f64,
}

impl ValueTransform {
    pub fn new(reference: f64, abstol: f64) -> Self {
        Self::with_slope(reference, abstol, 0.1)
    }

    pub fn with_slope(reference: f64, abstol: f64, slope: f64) -> Self {
        Self {
            reference: reference.abs().max(abstol).max(f64::MIN_POSITIVE),
            slope,
        }
    }

    pub fn score(&self, x: f64) -> f64 {
        let dv = (x - self.reference).abs() / self.reference;
        (-std::f64::consts::LN_2 * dv / self.slope).exp()
    }
}

/// Plugin-specific precomputed artifacts, one variant per family.
#[derive(Debug, Clone)]
pub enum Descriptor {
    Curve(CurveDescriptor),
    Shape(ShapeDescriptor),
    Derivative(DerivativeDescriptor),
    Dextran(DextranDescriptor),
    Breakthrough(BreakthroughDescriptor),
    Fractionation(FractionationDescriptor),
    Sse,
}

/// Per-feature target state: expected curve, selection and descriptor.
///
/// Built once at configuration setup and read by every evaluation. The only
/// later mutation is adaptive smoothing refinement through
/// [`FeatureTarget::refine_smoothing`].
#[derive(Debug, Clone)]
pub struct FeatureTarget {
    pub name: String,
    pub kind: ScoreKind,
    /// Output series compared against the data (summed when several).
    pub outputs: Vec<String>,
    /// Full experimental time grid.
    pub times: Vec<f64>,
    /// Full experimental values.
    pub values: Vec<f64>,
    /// Selection mask over the time grid, bounded by [start, stop].
    pub selected: Vec<bool>,
    /// Cached selected times.
    pub selected_times: Vec<f64>,
    /// Cached selected values.
    pub selected_values: Vec<f64>,
    /// Characteristic residence time of the experiment's column.
    pub cv_time: f64,
    /// Simulator absolute tolerance.
    pub abstol: f64,
    /// Fractions for the fractionation plugin.
    pub fractions: Vec<FractionSpec>,
    pub descriptor: Descriptor,
}

impl FeatureTarget {
    /// Selected slice of the simulated solution for this feature.
    ///
    /// The simulator solves on the experimental time grid, so the selection
    /// mask applies to both curves. A missing series or a grid mismatch is a
    /// malformed simulation.
    pub fn selected_solution(&self, output: &SimulationOutput) -> Result<Vec<f64>, RunError> {
        let solution = output
            .solution(&self.outputs)
            .ok_or_else(|| RunError::Malformed(format!("missing output for {}", self.name)))?;
        if solution.len() != self.times.len() {
            return Err(RunError::Malformed(format!(
                "solution length {} != time grid {} for {}",
                solution.len(),
                self.times.len(),
                self.name
            )));
        }
        Ok(self
            .selected
            .iter()
            .zip(solution.iter())
            .filter(|(sel, _)| **sel)
            .map(|(_, v)| *v)
            .collect())
    }

    /// Number of objective scores this feature produces.
    pub fn score_count(&self) -> usize {
        score_count_of(self.kind, self.fractions.len())
    }

    /// Refine adaptive smoothing descriptors from newly observed data.
    ///
    /// Non-adaptive plugins ignore this.
    pub fn refine_smoothing(&mut self) -> Result<(), FitError> {
        if !adaptive(self.kind) {
            return Ok(());
        }
        let descriptor = setup_descriptor(
            self.kind,
            &self.fractions,
            &self.selected_times,
            &self.selected_values,
            self.cv_time,
            self.abstol,
        )?;
        self.descriptor = descriptor;
        Ok(())
    }
}

/// Unique plugin identifier; matches the `type` strings in configuration.
pub fn name(kind: ScoreKind) -> &'static str {
    match kind {
        ScoreKind::Curve => "curve",
        ScoreKind::Shape => "shape",
        ScoreKind::ShapeDecay => "shape_decay",
        ScoreKind::DerivativeSimilarity => "derivative_similarity",
        ScoreKind::DerivativeSimilarityHybrid => "derivative_similarity_hybrid",
        ScoreKind::DerivativeSimilarityCross => "derivative_similarity_cross",
        ScoreKind::DerivativeSimilarityCrossAlt => "derivative_similarity_cross_alt",
        ScoreKind::Dextran => "dextran",
        ScoreKind::DextranHybrid => "dextran_hybrid",
        ScoreKind::Breakthrough => "breakthrough",
        ScoreKind::Fractionation => "fractionation",
        ScoreKind::Sse => "sse",
        ScoreKind::LogSse => "log_sse",
    }
}

/// Sentinel score used to fill objectives when evaluation fails.
pub fn bad_score(kind: ScoreKind) -> f64 {
    match kind {
        ScoreKind::Sse | ScoreKind::LogSse => -f64::MAX,
        _ => 0.0,
    }
}

/// Whether a plugin's descriptors may be recomputed as better data arrives.
pub fn adaptive(kind: ScoreKind) -> bool {
    !matches!(
        kind,
        ScoreKind::Breakthrough | ScoreKind::Fractionation | ScoreKind::Sse | ScoreKind::LogSse
    )
}

/// Number of objective scores a feature of this kind produces.
pub fn score_count_of(kind: ScoreKind, fractions: usize) -> usize {
    match kind {
        ScoreKind::Curve => 1,
        ScoreKind::Shape | ScoreKind::ShapeDecay => 3,
        ScoreKind::DerivativeSimilarity => 5,
        ScoreKind::DerivativeSimilarityHybrid | ScoreKind::DerivativeSimilarityCross => 4,
        ScoreKind::DerivativeSimilarityCrossAlt => 2,
        ScoreKind::Dextran => 3,
        ScoreKind::DextranHybrid => 6,
        ScoreKind::Breakthrough => 4,
        ScoreKind::Fractionation => fractions,
        ScoreKind::Sse | ScoreKind::LogSse => 1,
    }
}

/// CSV header names for one feature, in score order.
///
/// Called exactly once per feature at configuration time; the objective
/// vector is sized from the result.
pub fn headers(kind: ScoreKind, experiment: &str, feature: &FeatureSpec) -> Vec<String> {
    let name = format!("{}_{}", experiment, feature.name);
    match kind {
        ScoreKind::Curve => vec![format!("{name}_Similarity")],
        ScoreKind::Shape | ScoreKind::ShapeDecay => vec![
            format!("{name}_Similarity"),
            format!("{name}_Time"),
            format!("{name}_Derivative_Similarity"),
        ],
        ScoreKind::DerivativeSimilarity => vec![
            format!("{name}_Derivative_Similarity"),
            format!("{name}_High_Value"),
            format!("{name}_High_Time"),
            format!("{name}_Low_Value"),
            format!("{name}_Low_Time"),
        ],
        ScoreKind::DerivativeSimilarityHybrid => vec![
            format!("{name}_Derivative_Similarity_Hybrid"),
            format!("{name}_Time"),
            format!("{name}_High_Value"),
            format!("{name}_Low_Value"),
        ],
        ScoreKind::DerivativeSimilarityCross => vec![
            format!("{name}_Derivative_Similarity_Cross"),
            format!("{name}_Time"),
            format!("{name}_High_Value"),
            format!("{name}_Low_Value"),
        ],
        ScoreKind::DerivativeSimilarityCrossAlt => vec![
            format!("{name}_Derivative_Similarity_Cross_Alt"),
            format!("{name}_Time"),
        ],
        ScoreKind::Dextran => vec![
            format!("{name}_Front_Similarity"),
            format!("{name}_Derivative_Similarity"),
            format!("{name}_Time"),
        ],
        ScoreKind::DextranHybrid => vec![
            format!("{name}_Front_Similarity"),
            format!("{name}_Derivative_Similarity"),
            format!("{name}_Time"),
            format!("{name}_Value"),
            format!("{name}_10P_Time"),
            format!("{name}_10P_Value"),
        ],
        ScoreKind::Breakthrough => vec![
            format!("{name}_Similarity"),
            format!("{name}_Start_Time"),
            format!("{name}_End_Time"),
            format!("{name}_Value"),
        ],
        ScoreKind::Fractionation => (0..feature.fractions.len())
            .map(|i| format!("{name}_Fraction_{i}"))
            .collect(),
        ScoreKind::Sse => vec![format!("{name}_SSE")],
        ScoreKind::LogSse => vec![format!("{name}_LogSSE")],
    }
}

/// Build the once-per-configuration descriptor for a feature.
pub fn setup_descriptor(
    kind: ScoreKind,
    fractions: &[FractionSpec],
    selected_times: &[f64],
    selected_values: &[f64],
    cv_time: f64,
    abstol: f64,
) -> Result<Descriptor, FitError> {
    match kind {
        ScoreKind::Curve => curve::setup(selected_values).map(Descriptor::Curve),
        ScoreKind::Shape => {
            shape::setup(selected_times, selected_values, cv_time).map(Descriptor::Shape)
        }
        ScoreKind::ShapeDecay => {
            shape::setup(selected_times, selected_values, cv_time / 10.0).map(Descriptor::Shape)
        }
        ScoreKind::DerivativeSimilarity
        | ScoreKind::DerivativeSimilarityHybrid
        | ScoreKind::DerivativeSimilarityCross
        | ScoreKind::DerivativeSimilarityCrossAlt => {
            derivative::setup(selected_times, selected_values, cv_time, abstol)
                .map(Descriptor::Derivative)
        }
        ScoreKind::Dextran | ScoreKind::DextranHybrid => {
            dextran::setup(selected_times, selected_values, cv_time, abstol)
                .map(Descriptor::Dextran)
        }
        ScoreKind::Breakthrough => {
            breakthrough::setup(selected_times, selected_values, cv_time, abstol)
                .map(Descriptor::Breakthrough)
        }
        ScoreKind::Fractionation => {
            fractionation::setup(fractions, abstol).map(Descriptor::Fractionation)
        }
        ScoreKind::Sse | ScoreKind::LogSse => Ok(Descriptor::Sse),
    }
}

/// Score one simulated curve against one feature.
pub fn run(
    kind: ScoreKind,
    output: &SimulationOutput,
    feature: &FeatureTarget,
) -> Result<ScoreOutput, RunError> {
    match (kind, &feature.descriptor) {
        (ScoreKind::Curve, Descriptor::Curve(desc)) => curve::run(output, feature, desc),
        (ScoreKind::Shape | ScoreKind::ShapeDecay, Descriptor::Shape(desc)) => {
            shape::run(output, feature, desc)
        }
        (
            ScoreKind::DerivativeSimilarity
            | ScoreKind::DerivativeSimilarityHybrid
            | ScoreKind::DerivativeSimilarityCross
            | ScoreKind::DerivativeSimilarityCrossAlt,
            Descriptor::Derivative(desc),
        ) => derivative::run(kind, output, feature, desc),
        (ScoreKind::Dextran | ScoreKind::DextranHybrid, Descriptor::Dextran(desc)) => {
            dextran::run(kind, output, feature, desc)
        }
        (ScoreKind::Breakthrough, Descriptor::Breakthrough(desc)) => {
            breakthrough::run(output, feature, desc)
        }
        (ScoreKind::Fractionation, Descriptor::Fractionation(desc)) => {
            fractionation::run(output, feature, desc)
        }
        (ScoreKind::Sse | ScoreKind::LogSse, Descriptor::Sse) => sse::run(kind, output, feature),
        _ => Err(RunError::Malformed(format!(
            "descriptor mismatch for feature {}",
            feature.name
        ))),
    }
}

/// The advertised failure output for a feature of this kind.
///
/// Substituted when `run` reports a numeric-fit failure.
pub fn failure_output(kind: ScoreKind, count: usize) -> ScoreOutput {
    ScoreOutput {
        scores: vec![bad_score(kind); count],
        sse: 1e6,
        samples: 1,
        sim_times: vec![0.0],
        sim_values: vec![0.0],
        exp_values: vec![1e6],
        minimize: vec![1.0; count],
        diff: vec![1e6],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feature_spec(kind: ScoreKind, fractions: usize) -> FeatureSpec {
        FeatureSpec {
            name: "feat".to_string(),
            kind,
            start: 0.0,
            stop: 100.0,
            data: None,
            output: None,
            fractions: (0..fractions)
                .map(|i| FractionSpec {
                    component: format!("comp_{i}"),
                    start: i as f64,
                    stop: i as f64 + 1.0,
                    value: 1.0,
                })
                .collect(),
        }
    }

    #[test]
    fn test_headers_match_score_count_for_all_kinds() {
        let kinds = [
            ScoreKind::Curve,
            ScoreKind::Shape,
            ScoreKind::ShapeDecay,
            ScoreKind::DerivativeSimilarity,
            ScoreKind::DerivativeSimilarityHybrid,
            ScoreKind::DerivativeSimilarityCross,
            ScoreKind::DerivativeSimilarityCrossAlt,
            ScoreKind::Dextran,
            ScoreKind::DextranHybrid,
            ScoreKind::Breakthrough,
            ScoreKind::Fractionation,
            ScoreKind::Sse,
            ScoreKind::LogSse,
        ];
        for kind in kinds {
            let spec = feature_spec(kind, 3);
            assert_eq!(
                headers(kind, "exp", &spec).len(),
                score_count_of(kind, spec.fractions.len()),
                "{kind:?}"
            );
        }
    }

    #[test]
    fn test_name_round_trips_through_serde() {
        for kind in [ScoreKind::Curve, ScoreKind::DextranHybrid, ScoreKind::LogSse] {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", name(kind)));
        }
    }

    #[test]
    fn test_time_transform_decay() {
        let transform = TimeTransform::new(10.0, 50.0);
        assert!((transform.score(50.0) - 1.0).abs() < 1e-12);
        assert!((transform.score(60.0) - 0.5).abs() < 1e-12);
        assert!(transform.score(90.0) < transform.score(60.0));
    }

    #[test]
    fn test_value_transform_floors_at_abstol() {
        // Reference of zero is floored at abstol, not a division by zero.
        let transform = ValueTransform::new(0.0, 1e-8);
        assert!(transform.score(0.0).is_finite());
        assert!((transform.score(1e-8) - 1.0).abs() < 1e-12);

        let transform = ValueTransform::new(2.0, 1e-8);
        assert!((transform.score(2.0) - 1.0).abs() < 1e-12);
        // Half credit at a 10% relative deviation.
        assert!((transform.score(2.2) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_failure_output_shape() {
        let out = failure_output(ScoreKind::Shape, 3);
        assert_eq!(out.scores, vec![0.0, 0.0, 0.0]);
        assert_eq!(out.minimize, vec![1.0, 1.0, 1.0]);
        assert_eq!(out.sse, 1e6);
    }

    #[test]
    fn test_sse_bad_score_is_floor() {
        assert_eq!(bad_score(ScoreKind::Sse), -f64::MAX);
        assert_eq!(bad_score(ScoreKind::Curve), 0.0);
    }
}
