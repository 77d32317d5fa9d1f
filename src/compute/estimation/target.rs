//! Target store: per-experiment precomputed expected curves and
//! plugin descriptors.
//!
//! Built once from the experimental data and the simulator templates, then
//! shared read-only with every evaluation. The only later mutation is the
//! warm-up derived timeout and adaptive smoothing refinement.

use std::path::Path;
use std::time::Duration;

use crate::compute::scores::{self, FeatureTarget};
use crate::compute::sim::{SimulatorBackend, Template};
use crate::schema::{ConfigError, ExperimentSpec, MatchConfig, ScoreKind};

/// Default per-simulation timeout when neither the configuration nor a
/// warm-up run supplies one.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1800);

/// Precomputed state for one experiment.
#[derive(Debug, Clone)]
pub struct ExperimentTarget {
    pub name: String,
    pub template: Template,
    /// Per-simulation timeout; absent until configured or warm-up derived.
    pub timeout: Option<Duration>,
    /// Characteristic residence time of the column.
    pub cv_time: f64,
    /// Experiment-level measured times.
    pub times: Vec<f64>,
    /// Experiment-level measured values.
    pub values: Vec<f64>,
    pub features: Vec<FeatureTarget>,
}

impl ExperimentTarget {
    pub fn timeout(&self) -> Duration {
        self.timeout.unwrap_or(DEFAULT_TIMEOUT)
    }
}

/// All experiment targets plus run-level precompute.
#[derive(Debug, Clone)]
pub struct TargetStore {
    /// Experiments in configuration order.
    pub experiments: Vec<ExperimentTarget>,
    /// Whether every parameter carries the metadata gradient-vector
    /// sensitivity mode needs.
    pub sensitivities_ok: bool,
}

impl TargetStore {
    /// Build the store from configuration, data files and templates.
    ///
    /// Any failure here is fatal: it aborts the run before a single
    /// candidate simulation is attempted.
    pub fn build(
        config: &MatchConfig,
        backend: &dyn SimulatorBackend,
    ) -> Result<Self, ConfigError> {
        let mut experiments = Vec::with_capacity(config.experiments.len());
        for experiment in &config.experiments {
            experiments.push(build_experiment(experiment, backend)?);
        }

        let sensitivities_ok = config.sensitivities_ok();
        if config.grad_vector && !sensitivities_ok {
            log::warn!(
                "parameter sensitivity metadata incomplete; gradient-vector mode disabled"
            );
        }

        Ok(Self {
            experiments,
            sensitivities_ok,
        })
    }

    /// Whether gradient-vector mode is actually usable.
    pub fn grad_vector_enabled(&self, config: &MatchConfig) -> bool {
        config.grad_vector && self.sensitivities_ok
    }

    /// Refine adaptive plugin descriptors across all features.
    pub fn refine_smoothing(&mut self) {
        for experiment in &mut self.experiments {
            for feature in &mut experiment.features {
                if let Err(e) = feature.refine_smoothing() {
                    log::debug!(
                        "smoothing refinement skipped for {}/{}: {e}",
                        experiment.name,
                        feature.name
                    );
                }
            }
        }
    }
}

fn build_experiment(
    spec: &ExperimentSpec,
    backend: &dyn SimulatorBackend,
) -> Result<ExperimentTarget, ConfigError> {
    let template = backend
        .load_template(&spec.template, &spec.name)
        .map_err(|e| ConfigError::BadTemplate {
            experiment: spec.name.clone(),
            reason: e.to_string(),
        })?;

    let cv_time = template.geometry.residence_time();

    let (times, values) = match &spec.data {
        Some(path) => read_series(path)?,
        None => (Vec::new(), Vec::new()),
    };

    let mut features = Vec::with_capacity(spec.features.len());
    for feature in &spec.features {
        let (feat_times, feat_values) = match &feature.data {
            Some(path) => read_series(path)?,
            None if !times.is_empty() => (times.clone(), values.clone()),
            None if feature.kind == ScoreKind::Fractionation => {
                // Fractionation needs no reference curve, only fractions.
                (Vec::new(), Vec::new())
            }
            None => {
                return Err(ConfigError::MissingData {
                    experiment: spec.name.clone(),
                });
            }
        };

        features.push(build_feature(
            spec, feature, feat_times, feat_values, cv_time, &template,
        )?);
    }

    Ok(ExperimentTarget {
        name: spec.name.clone(),
        timeout: spec.timeout.map(Duration::from_secs_f64),
        template,
        cv_time,
        times,
        values,
        features,
    })
}

fn build_feature(
    experiment: &ExperimentSpec,
    spec: &crate::schema::FeatureSpec,
    times: Vec<f64>,
    values: Vec<f64>,
    cv_time: f64,
    template: &Template,
) -> Result<FeatureTarget, ConfigError> {
    let mut selected: Vec<bool> = times
        .iter()
        .map(|&t| t >= spec.start && t <= spec.stop)
        .collect();
    let mut selected_times: Vec<f64> = select(&times, &selected);
    let mut selected_values: Vec<f64> = select(&values, &selected);

    let descriptor = scores::setup_descriptor(
        spec.kind,
        &spec.fractions,
        &selected_times,
        &selected_values,
        cv_time,
        template.abstol,
    )
    .map_err(|e| ConfigError::FeatureSetup {
        experiment: experiment.name.clone(),
        feature: spec.name.clone(),
        reason: e.to_string(),
    })?;

    // Dextran scoring only looks at the rising front; narrow the selection
    // to end at the steepest slope found during setup.
    if let scores::Descriptor::Dextran(desc) = &descriptor {
        let max_time = desc.max_time;
        for (sel, &t) in selected.iter_mut().zip(times.iter()) {
            *sel = *sel && t <= max_time;
        }
        selected_times = select(&times, &selected);
        selected_values = select(&values, &selected);
    }

    Ok(FeatureTarget {
        name: spec.name.clone(),
        kind: spec.kind,
        outputs: spec.outputs(experiment).to_vec(),
        times,
        values,
        selected,
        selected_times,
        selected_values,
        cv_time,
        abstol: template.abstol,
        fractions: spec.fractions.clone(),
        descriptor,
    })
}

fn select(values: &[f64], mask: &[bool]) -> Vec<f64> {
    values
        .iter()
        .zip(mask.iter())
        .filter(|(_, sel)| **sel)
        .map(|(v, _)| *v)
        .collect()
}

/// Read a two-column (time, value) CSV.
fn read_series(path: &Path) -> Result<(Vec<f64>, Vec<f64>), ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|e| ConfigError::BadData {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    let mut times = Vec::new();
    let mut values = Vec::new();
    for (lineno, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let mut fields = line.split(',');
        let parse = |field: Option<&str>| -> Result<f64, ConfigError> {
            field
                .map(str::trim)
                .and_then(|f| f.parse().ok())
                .ok_or_else(|| ConfigError::BadData {
                    path: path.to_path_buf(),
                    reason: format!("line {}", lineno + 1),
                })
        };
        times.push(parse(fields.next())?);
        values.push(parse(fields.next())?);
    }

    if times.len() < 2 {
        return Err(ConfigError::BadData {
            path: path.to_path_buf(),
            reason: "fewer than two samples".to_string(),
        });
    }

    Ok((times, values))
}
