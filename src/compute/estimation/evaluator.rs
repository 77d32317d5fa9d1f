//! Objective evaluation: candidate vector in, objective vector out.
//!
//! One evaluation runs every configured experiment, scores every feature
//! through its plugin, and reduces the flat objective vector to the five
//! meta scores. A failed simulation anywhere aborts the whole evaluation
//! and yields the worst-score sentinel: objectives are only comparable when
//! computed over the full experiment set.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::compute::numeric;
use crate::compute::scores::{self, RunError};
use crate::compute::sim::{SimulationRunner, SimulatorBackend};
use crate::schema::{Assignment, ConfigError, MatchConfig};

use super::target::{ExperimentTarget, TargetStore};

/// Shared, immutable evaluation state: configuration, targets, bounds and
/// derived headers.
///
/// Every evaluator, refiner and orchestrator call takes an explicit handle
/// to this; there is no process-global configuration.
#[derive(Debug)]
pub struct EvalContext {
    pub config: MatchConfig,
    pub target: TargetStore,
    /// Lower bounds in transformed space.
    pub min_value: Vec<f64>,
    /// Upper bounds in transformed space.
    pub max_value: Vec<f64>,
    /// Objective column names, in score order.
    pub objective_headers: Vec<String>,
    /// Full CSV header row.
    pub headers: Vec<String>,
    /// Number of objective goals.
    pub num_goals: usize,
    /// Sentinel objective vector for failed evaluations.
    pub worst: Vec<f64>,
}

impl EvalContext {
    pub fn new(config: MatchConfig, target: TargetStore) -> Self {
        let (min_value, max_value) = config.bounds();

        // Headers are derived once, in the same deterministic order the
        // objectives are accumulated in.
        let mut objective_headers = Vec::new();
        let mut worst = Vec::new();
        for (experiment, exp_target) in config.experiments.iter().zip(&target.experiments) {
            for (feature, feat_target) in experiment.features.iter().zip(&exp_target.features) {
                let columns = scores::headers(feature.kind, &experiment.name, feature);
                worst.extend(std::iter::repeat_n(
                    scores::bad_score(feature.kind),
                    columns.len(),
                ));
                objective_headers.extend(columns);
            }
        }
        let num_goals = objective_headers.len();

        let mut headers = vec!["Time".to_string(), "Name".to_string()];
        headers.extend(config.parameter_headers());
        headers.extend(objective_headers.iter().cloned());
        headers.extend(
            ["Product Root Score", "Min Score", "Mean Score", "Norm", "SSE"]
                .map(String::from),
        );

        Self {
            config,
            target,
            min_value,
            max_value,
            objective_headers,
            headers,
            num_goals,
            worst,
        }
    }

    /// Clip a candidate into the bound box.
    pub fn clip(&self, individual: &[f64]) -> Vec<f64> {
        individual
            .iter()
            .zip(self.min_value.iter().zip(&self.max_value))
            .map(|(&x, (&lo, &hi))| x.clamp(lo, hi))
            .collect()
    }

    /// Decode a transformed candidate into template assignments plus the
    /// decoded physical values for CSV emission.
    pub fn decode(&self, individual: &[f64]) -> (Vec<Assignment>, Vec<f64>) {
        let mut assignments = Vec::new();
        let mut values = Vec::new();
        let mut offset = 0;
        for parameter in &self.config.parameters {
            let count = parameter.variable_count();
            let (mut a, v) = parameter.decode(&individual[offset..offset + count]);
            assignments.append(&mut a);
            values.extend(v);
            offset += count;
        }
        (assignments, values)
    }
}

/// The five meta reductions of an objective vector.
pub fn meta_scores(objectives: &[f64], error: f64) -> [f64; 5] {
    let n = objectives.len().max(1) as f64;
    let min = objectives.iter().cloned().fold(f64::INFINITY, f64::min);
    let mean = objectives.iter().sum::<f64>() / n;
    let norm = objectives.iter().map(|s| s * s).sum::<f64>().sqrt() / n.sqrt();
    [numeric::product_root(objectives), min, mean, norm, -error]
}

/// Result of evaluating one candidate.
#[derive(Debug, Clone)]
pub struct Evaluation {
    /// Flat objective vector in header order; the sentinel worst vector
    /// when any experiment failed.
    pub objectives: Vec<f64>,
    /// Product-root, min, mean, norm, negated SSE.
    pub meta: [f64; 5],
    /// Cumulative squared error.
    pub error: f64,
    /// CSV row fragment (tag, generation, decoded values, scores); empty on
    /// failure.
    pub csv_row: Vec<String>,
    /// Per-experiment curves and scores; None on failure.
    pub experiments: Option<Vec<ExperimentResult>>,
}

impl Evaluation {
    pub fn failed(&self) -> bool {
        self.experiments.is_none()
    }

    /// Product-root reduction, the scalar the gradient filter keys on.
    pub fn product_score(&self) -> f64 {
        self.meta[0]
    }
}

/// Scores and curves from one experiment of one evaluation.
#[derive(Debug, Clone)]
pub struct ExperimentResult {
    pub name: String,
    pub scores: Vec<f64>,
    pub error: f64,
    /// Per-feature selected simulation times.
    pub sim_times: Vec<Vec<f64>>,
    /// Per-feature selected simulated values.
    pub sim_values: Vec<Vec<f64>>,
    /// Per-feature selected experimental values.
    pub exp_values: Vec<Vec<f64>>,
    /// Per-score minimization transforms.
    pub minimize: Vec<f64>,
    /// Per-sample residuals for gradient-vector mode.
    pub diff: Vec<f64>,
}

/// Evaluates candidates against the full experiment set.
pub struct ObjectiveEvaluator<'a> {
    ctx: &'a EvalContext,
    backend: &'a dyn SimulatorBackend,
}

impl<'a> ObjectiveEvaluator<'a> {
    pub fn new(ctx: &'a EvalContext, backend: &'a dyn SimulatorBackend) -> Self {
        Self { ctx, backend }
    }

    /// Evaluate one candidate.
    ///
    /// `tag` labels the CSV row ('EVO' or 'GRAD').
    pub fn evaluate(&self, individual: &[f64], tag: &str) -> Evaluation {
        let clipped = self.ctx.clip(individual);
        let (assignments, decoded) = self.ctx.decode(&clipped);

        let mut results = Vec::with_capacity(self.ctx.target.experiments.len());
        for experiment in &self.ctx.target.experiments {
            match self.run_experiment(experiment, &assignments) {
                Ok(result) => results.push(result),
                Err(e) => {
                    log::info!(
                        "evaluation failed on experiment {}: {e}",
                        experiment.name
                    );
                    return self.worst();
                }
            }
        }

        let mut objectives: Vec<f64> = results.iter().flat_map(|r| r.scores.clone()).collect();
        let error: f64 = results.iter().map(|r| r.error).sum();

        if let Some(figures) = self.ctx.config.round_scores {
            numeric::round_all(&mut objectives, figures);
        }

        let mut meta = meta_scores(&objectives, error);
        if let Some(figures) = self.ctx.config.round_scores {
            numeric::round_all(&mut meta, figures);
        }

        let mut csv_row = vec![tag.to_string(), "NA".to_string()];
        csv_row.extend(decoded.iter().map(|v| format_sig(*v)));
        csv_row.extend(objectives.iter().map(|v| format_sig(*v)));
        csv_row.extend(meta.iter().map(|v| format_sig(*v)));

        Evaluation {
            objectives,
            meta,
            error,
            csv_row,
            experiments: Some(results),
        }
    }

    /// Residual vector for the gradient stage, without rounding.
    ///
    /// Returns the per-score minimization transforms, or the raw per-sample
    /// residuals when gradient-vector mode is enabled. Any simulation
    /// failure is an error here, not a sentinel: the local solver must not
    /// see a fabricated point.
    pub fn residuals(&self, individual: &[f64]) -> Result<Vec<f64>, super::GradientError> {
        let clipped = self.ctx.clip(individual);
        let (assignments, _) = self.ctx.decode(&clipped);
        let grad_vector = self
            .ctx
            .target
            .grad_vector_enabled(&self.ctx.config);

        let mut residuals = Vec::new();
        for experiment in &self.ctx.target.experiments {
            let result = self
                .run_experiment(experiment, &assignments)
                .map_err(|e| match e {
                    EvaluationFailure::Simulation(e) => super::GradientError::Simulation(e),
                    EvaluationFailure::Malformed(reason) => {
                        super::GradientError::Degenerate(reason)
                    }
                })?;
            if grad_vector {
                residuals.extend(result.diff);
            } else {
                residuals.extend(result.minimize);
            }
        }
        Ok(residuals)
    }

    fn worst(&self) -> Evaluation {
        Evaluation {
            objectives: self.ctx.worst.clone(),
            meta: meta_scores(&self.ctx.worst, f64::MAX),
            error: f64::MAX,
            csv_row: Vec::new(),
            experiments: None,
        }
    }

    fn run_experiment(
        &self,
        experiment: &ExperimentTarget,
        assignments: &[Assignment],
    ) -> Result<ExperimentResult, EvaluationFailure> {
        let runner = SimulationRunner::new(self.backend);
        let output = runner.run(&experiment.template, assignments, experiment.timeout())?;

        let mut result = ExperimentResult {
            name: experiment.name.clone(),
            scores: Vec::new(),
            error: 0.0,
            sim_times: Vec::new(),
            sim_values: Vec::new(),
            exp_values: Vec::new(),
            minimize: Vec::new(),
            diff: Vec::new(),
        };

        for feature in &experiment.features {
            let scored = match scores::run(feature.kind, &output, feature) {
                Ok(scored) => scored,
                Err(RunError::Fit(e)) => {
                    // Numeric fit failed on this feature only; substitute
                    // the plugin's advertised failure output and move on.
                    log::debug!(
                        "{} fit failure on {}/{}: {e}",
                        scores::name(feature.kind),
                        experiment.name,
                        feature.name
                    );
                    scores::failure_output(feature.kind, feature.score_count())
                }
                Err(RunError::Malformed(reason)) => {
                    return Err(EvaluationFailure::Malformed(reason));
                }
            };

            result.scores.extend(scored.scores);
            result.error += scored.sse;
            result.sim_times.push(scored.sim_times);
            result.sim_values.push(scored.sim_values);
            result.exp_values.push(scored.exp_values);
            result.minimize.extend(scored.minimize);
            result.diff.extend(scored.diff);
        }

        Ok(result)
    }
}

#[derive(Debug, thiserror::Error)]
enum EvaluationFailure {
    #[error(transparent)]
    Simulation(#[from] crate::compute::sim::SimulationError),
    #[error("malformed output: {0}")]
    Malformed(String),
}

/// Format a value at five significant figures for CSV emission.
pub fn format_sig(value: f64) -> String {
    format!("{}", numeric::round_sig_figs(value, 5))
}

/// Per-worker memoized setup cache, keyed by configuration path.
///
/// A worker that sees the same configuration again reuses the built context
/// instead of repeating the expensive template/target construction.
#[derive(Default)]
pub struct SessionCache {
    inner: Mutex<HashMap<PathBuf, Arc<EvalContext>>>,
}

impl SessionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch the context for a configuration path, building it on first use.
    pub fn get_or_init<F>(&self, path: &Path, build: F) -> Result<Arc<EvalContext>, ConfigError>
    where
        F: FnOnce() -> Result<EvalContext, ConfigError>,
    {
        let mut inner = self.inner.lock().expect("session cache poisoned");
        if let Some(ctx) = inner.get(path) {
            return Ok(Arc::clone(ctx));
        }
        let ctx = Arc::new(build()?);
        inner.insert(path.to_path_buf(), Arc::clone(&ctx));
        Ok(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_meta_scores_shape() {
        let meta = meta_scores(&[1.0, 1.0, 1.0, 1.0], 2.5);
        assert!((meta[0] - 1.0).abs() < 1e-12);
        assert!((meta[1] - 1.0).abs() < 1e-12);
        assert!((meta[2] - 1.0).abs() < 1e-12);
        assert!((meta[3] - 1.0).abs() < 1e-12);
        assert_eq!(meta[4], -2.5);
    }

    #[test]
    fn test_meta_norm_normalized() {
        // Norm of [0.5, 0.5] is 0.5 * sqrt(2); divided by sqrt(2) -> 0.5
        let meta = meta_scores(&[0.5, 0.5], 0.0);
        assert!((meta[3] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_format_sig() {
        assert_eq!(format_sig(123456.0), "123460");
        assert_eq!(format_sig(0.000123456), "0.00012346");
    }

    fn empty_context() -> EvalContext {
        use crate::schema::{SearchSettings, SimulatorSettings};
        use std::path::PathBuf;

        let config = MatchConfig {
            simulator: SimulatorSettings {
                command: PathBuf::from("sim"),
                args: Vec::new(),
            },
            output_dir: PathBuf::from("out"),
            search: SearchSettings {
                method: "generational".to_string(),
                population: 2,
                generations: 1,
                stagnation_limit: None,
                target_score: None,
                rng_seed: None,
                crossover_rate: 0.9,
                mutation_rate: 0.25,
                mutation_strength: 0.1,
            },
            parameters: Vec::new(),
            experiments: Vec::new(),
            round_scores: None,
            grad_vector: false,
            seeds: Vec::new(),
        };
        let target = TargetStore {
            experiments: Vec::new(),
            sensitivities_ok: true,
        };
        EvalContext::new(config, target)
    }

    #[test]
    fn test_session_cache_builds_once() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let cache = SessionCache::new();
        let builds = AtomicUsize::new(0);
        let path = Path::new("config.json");

        for _ in 0..3 {
            let ctx = cache
                .get_or_init(path, || {
                    builds.fetch_add(1, Ordering::Relaxed);
                    Ok(empty_context())
                })
                .unwrap();
            assert_eq!(ctx.num_goals, 0);
        }
        assert_eq!(builds.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_session_cache_does_not_cache_failures() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let cache = SessionCache::new();
        let builds = AtomicUsize::new(0);
        let path = Path::new("broken.json");

        for _ in 0..3 {
            let result = cache.get_or_init(path, || {
                builds.fetch_add(1, Ordering::Relaxed);
                Err(ConfigError::NoParameters)
            });
            assert!(result.is_err());
        }
        assert_eq!(builds.load(Ordering::Relaxed), 3);
    }
}
