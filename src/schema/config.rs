//! Configuration types for a parameter estimation run.
//!
//! The configuration is an opaque JSON document to everything outside this
//! module; the engine only reads it through the typed structs here. A fatal
//! validation error aborts the run before any simulation is attempted.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Top-level configuration for one estimation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchConfig {
    /// Simulator executable and fixed arguments.
    pub simulator: SimulatorSettings,
    /// Directory for CSV results and archives.
    pub output_dir: PathBuf,
    /// Search strategy and population settings.
    pub search: SearchSettings,
    /// Decision-variable definitions.
    pub parameters: Vec<ParameterSpec>,
    /// Experiments to fit against.
    pub experiments: Vec<ExperimentSpec>,
    /// Round objectives and meta scores to this many significant figures.
    #[serde(default)]
    pub round_scores: Option<i32>,
    /// Use raw per-sample residuals in the gradient stage instead of
    /// 1 - score transforms.
    #[serde(default)]
    pub grad_vector: bool,
    /// Starting guesses in physical space, injected into the first
    /// population after log transformation.
    #[serde(default)]
    pub seeds: Vec<Vec<f64>>,
}

/// External simulator invocation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatorSettings {
    /// Path to the simulator executable.
    pub command: PathBuf,
    /// Extra arguments passed before the template/scratch paths.
    #[serde(default)]
    pub args: Vec<String>,
}

/// Search strategy and population settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchSettings {
    /// Strategy name, resolved against the strategy registry.
    #[serde(default = "default_method")]
    pub method: String,
    /// Population size per generation.
    pub population: usize,
    /// Generation budget.
    pub generations: usize,
    /// Stop after this many generations without meta-front progress.
    #[serde(default)]
    pub stagnation_limit: Option<usize>,
    /// Stop once the best product-root score reaches this value.
    #[serde(default)]
    pub target_score: Option<f64>,
    /// RNG seed; random when absent.
    #[serde(default)]
    pub rng_seed: Option<u64>,
    /// Probability of crossover per offspring.
    #[serde(default = "default_crossover_rate")]
    pub crossover_rate: f64,
    /// Per-coordinate mutation probability.
    #[serde(default = "default_mutation_rate")]
    pub mutation_rate: f64,
    /// Mutation spread as a fraction of the coordinate range.
    #[serde(default = "default_mutation_strength")]
    pub mutation_strength: f64,
}

fn default_method() -> String {
    "generational".to_string()
}

fn default_crossover_rate() -> f64 {
    0.9
}

fn default_mutation_rate() -> f64 {
    0.25
}

fn default_mutation_strength() -> f64 {
    0.1
}

/// One decision-variable definition.
///
/// `log` contributes a single log-transformed coordinate. `keq` contributes
/// two: the adsorption rate and the equilibrium ratio, decoded jointly so
/// `ka / kd` equals the exponential of the second coordinate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "transform", rename_all = "snake_case")]
pub enum ParameterSpec {
    Log {
        /// Slash-separated location of the value inside the template.
        location: String,
        /// Component the value belongs to; absent for scalar parameters.
        #[serde(default)]
        component: Option<i32>,
        /// Index within the located array; absent for scalars.
        #[serde(default)]
        index: Option<usize>,
        /// Lower bound in physical space.
        min: f64,
        /// Upper bound in physical space.
        max: f64,
    },
    Keq {
        /// Location of the adsorption rate.
        ka_location: String,
        /// Location of the desorption rate.
        kd_location: String,
        /// Component both rates belong to.
        #[serde(default)]
        component: Option<i32>,
        /// Index within the located arrays.
        index: usize,
        /// Adsorption rate bounds in physical space.
        min_ka: f64,
        max_ka: f64,
        /// Equilibrium ratio bounds in physical space.
        min_keq: f64,
        max_keq: f64,
    },
}

/// A decoded physical value destined for one template location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    pub location: String,
    pub index: Option<usize>,
    pub value: f64,
}

impl ParameterSpec {
    /// Number of decision variables this parameter contributes.
    pub fn variable_count(&self) -> usize {
        match self {
            ParameterSpec::Log { .. } => 1,
            ParameterSpec::Keq { .. } => 2,
        }
    }

    /// Append log-space bounds for this parameter's coordinates.
    pub fn push_bounds(&self, min_out: &mut Vec<f64>, max_out: &mut Vec<f64>) {
        match self {
            ParameterSpec::Log { min, max, .. } => {
                min_out.push(min.ln());
                max_out.push(max.ln());
            }
            ParameterSpec::Keq {
                min_ka,
                max_ka,
                min_keq,
                max_keq,
                ..
            } => {
                min_out.push(min_ka.ln());
                max_out.push(max_ka.ln());
                min_out.push(min_keq.ln());
                max_out.push(max_keq.ln());
            }
        }
    }

    /// Append CSV headers for this parameter's decoded values.
    pub fn push_headers(&self, out: &mut Vec<String>) {
        match self {
            ParameterSpec::Log {
                location,
                component,
                index,
                ..
            } => {
                let name = short_name(location);
                out.push(format!(
                    "{} Comp:{} Index:{}",
                    name,
                    component_label(*component),
                    index.map_or_else(|| "None".to_string(), |i| i.to_string())
                ));
            }
            ParameterSpec::Keq {
                ka_location,
                kd_location,
                component,
                index,
                ..
            } => {
                let ka = short_name(ka_location);
                let kd = short_name(kd_location);
                let comp = component_label(*component);
                out.push(format!("{ka} Comp:{comp} Index:{index}"));
                out.push(format!("{kd} Comp:{comp} Index:{index}"));
                out.push(format!("{ka}/{kd} Comp:{comp} Index:{index}"));
            }
        }
    }

    /// Decode this parameter's slice of a transformed individual.
    ///
    /// Returns the template assignments plus the decoded values for CSV
    /// emission (paired parameters additionally report their ratio).
    pub fn decode(&self, coords: &[f64]) -> (Vec<Assignment>, Vec<f64>) {
        match self {
            ParameterSpec::Log {
                location, index, ..
            } => {
                let value = coords[0].exp();
                (
                    vec![Assignment {
                        location: location.clone(),
                        index: *index,
                        value,
                    }],
                    vec![value],
                )
            }
            ParameterSpec::Keq {
                ka_location,
                kd_location,
                index,
                ..
            } => {
                let ka = coords[0].exp();
                let kd = coords[0].exp() / coords[1].exp();
                (
                    vec![
                        Assignment {
                            location: ka_location.clone(),
                            index: Some(*index),
                            value: ka,
                        },
                        Assignment {
                            location: kd_location.clone(),
                            index: Some(*index),
                            value: kd,
                        },
                    ],
                    vec![ka, kd, ka / kd],
                )
            }
        }
    }

    /// Whether this parameter carries the metadata sensitivity-based
    /// gradient mode needs (a component and a parseable unit index).
    pub fn sensitivity_ok(&self) -> bool {
        match self {
            ParameterSpec::Log {
                component,
                location,
                ..
            } => component.is_some() && unit_index(location).is_some(),
            ParameterSpec::Keq {
                component,
                ka_location,
                ..
            } => component.is_some() && unit_index(ka_location).is_some(),
        }
    }

    fn bounds_valid(&self) -> bool {
        match self {
            ParameterSpec::Log { min, max, .. } => *min > 0.0 && min < max,
            ParameterSpec::Keq {
                min_ka,
                max_ka,
                min_keq,
                max_keq,
                ..
            } => *min_ka > 0.0 && min_ka < max_ka && *min_keq > 0.0 && min_keq < max_keq,
        }
    }
}

fn short_name(location: &str) -> &str {
    location.rsplit('/').next().unwrap_or(location)
}

fn component_label(component: Option<i32>) -> String {
    component.map_or_else(|| "None".to_string(), |c| c.to_string())
}

/// Parse the unit index out of a location like `/input/model/unit_001/...`.
pub fn unit_index(location: &str) -> Option<usize> {
    location
        .split('/')
        .find(|seg| seg.starts_with("unit_"))
        .and_then(|seg| seg.trim_start_matches("unit_").parse().ok())
}

/// One experiment: a simulator template plus measured data and features.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentSpec {
    /// Unique experiment name.
    pub name: String,
    /// Simulator template file.
    pub template: PathBuf,
    /// Two-column CSV of measured (time, value); features may override.
    #[serde(default)]
    pub data: Option<PathBuf>,
    /// Simulation timeout in seconds; derived from a warm-up run when absent.
    #[serde(default)]
    pub timeout: Option<f64>,
    /// Output series compared against the data (summed when several).
    #[serde(default)]
    pub output: Vec<String>,
    /// Scored features.
    pub features: Vec<FeatureSpec>,
}

/// One scored feature within an experiment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureSpec {
    /// Unique feature name within the experiment.
    pub name: String,
    /// Score plugin handling this feature.
    #[serde(rename = "type")]
    pub kind: ScoreKind,
    /// Selection window start time.
    pub start: f64,
    /// Selection window stop time.
    pub stop: f64,
    /// Feature-specific measured data; falls back to the experiment's.
    #[serde(default)]
    pub data: Option<PathBuf>,
    /// Output series for this feature; falls back to the experiment's.
    #[serde(default)]
    pub output: Option<Vec<String>>,
    /// Collected fractions, required by the fractionation plugin.
    #[serde(default)]
    pub fractions: Vec<FractionSpec>,
}

impl FeatureSpec {
    /// Output series this feature compares against.
    pub fn outputs<'a>(&'a self, experiment: &'a ExperimentSpec) -> &'a [String] {
        self.output.as_deref().unwrap_or(&experiment.output)
    }
}

/// One collected fraction: a component series integrated over a time window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FractionSpec {
    /// Output series the fraction was collected from.
    pub component: String,
    /// Collection window start.
    pub start: f64,
    /// Collection window stop.
    pub stop: f64,
    /// Measured amount in the fraction.
    pub value: f64,
}

/// Curve comparison strategies.
///
/// One closed variant per score plugin; dispatch over this enum is
/// exhaustive, so adding a plugin without wiring its setup/run/headers
/// fails to compile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreKind {
    Curve,
    Shape,
    ShapeDecay,
    DerivativeSimilarity,
    DerivativeSimilarityHybrid,
    DerivativeSimilarityCross,
    DerivativeSimilarityCrossAlt,
    Dextran,
    DextranHybrid,
    Breakthrough,
    Fractionation,
    Sse,
    LogSse,
}

impl MatchConfig {
    /// Load and parse a configuration file.
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: MatchConfig =
            serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(config)
    }

    /// Total number of decision variables.
    pub fn variable_count(&self) -> usize {
        self.parameters.iter().map(|p| p.variable_count()).sum()
    }

    /// Log-space bound vectors (min, max) over all decision variables.
    pub fn bounds(&self) -> (Vec<f64>, Vec<f64>) {
        let mut min = Vec::new();
        let mut max = Vec::new();
        for parameter in &self.parameters {
            parameter.push_bounds(&mut min, &mut max);
        }
        (min, max)
    }

    /// CSV headers for the decoded parameter values.
    pub fn parameter_headers(&self) -> Vec<String> {
        let mut out = Vec::new();
        for parameter in &self.parameters {
            parameter.push_headers(&mut out);
        }
        out
    }

    /// Whether every parameter carries sensitivity metadata.
    pub fn sensitivities_ok(&self) -> bool {
        self.parameters.iter().all(|p| p.sensitivity_ok())
    }

    /// Validate configuration parameters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.parameters.is_empty() {
            return Err(ConfigError::NoParameters);
        }
        if self.experiments.is_empty() {
            return Err(ConfigError::NoExperiments);
        }
        if self.search.population < 2 {
            return Err(ConfigError::PopulationTooSmall);
        }
        if self.search.generations == 0 {
            return Err(ConfigError::NoGenerations);
        }

        for (i, parameter) in self.parameters.iter().enumerate() {
            if !parameter.bounds_valid() {
                return Err(ConfigError::InvalidBounds { parameter: i });
            }
        }

        let variables = self.variable_count();
        for seed in &self.seeds {
            if seed.len() != variables {
                return Err(ConfigError::SeedLength {
                    expected: variables,
                    found: seed.len(),
                });
            }
            if seed.iter().any(|&v| v <= 0.0) {
                return Err(ConfigError::SeedNotPositive);
            }
        }

        for experiment in &self.experiments {
            if experiment.features.is_empty() {
                return Err(ConfigError::NoFeatures {
                    experiment: experiment.name.clone(),
                });
            }
            for feature in &experiment.features {
                if feature.start >= feature.stop {
                    return Err(ConfigError::InvalidWindow {
                        experiment: experiment.name.clone(),
                        feature: feature.name.clone(),
                    });
                }
                if feature.kind == ScoreKind::Fractionation && feature.fractions.is_empty() {
                    return Err(ConfigError::NoFractions {
                        experiment: experiment.name.clone(),
                        feature: feature.name.clone(),
                    });
                }
                if feature.outputs(experiment).is_empty()
                    && feature.kind != ScoreKind::Fractionation
                {
                    return Err(ConfigError::NoOutputs {
                        experiment: experiment.name.clone(),
                        feature: feature.name.clone(),
                    });
                }
            }
        }

        Ok(())
    }
}

/// Configuration validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read configuration {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("cannot parse configuration {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("no parameters defined")]
    NoParameters,
    #[error("no experiments defined")]
    NoExperiments,
    #[error("population size must be at least 2")]
    PopulationTooSmall,
    #[error("generation budget must be positive")]
    NoGenerations,
    #[error("parameter {parameter} has invalid bounds (must be positive and min < max)")]
    InvalidBounds { parameter: usize },
    #[error("seed length {found} does not match {expected} decision variables")]
    SeedLength { expected: usize, found: usize },
    #[error("seed values must be positive (physical space)")]
    SeedNotPositive,
    #[error("experiment {experiment} has no features")]
    NoFeatures { experiment: String },
    #[error("feature {feature} of experiment {experiment} has start >= stop")]
    InvalidWindow { experiment: String, feature: String },
    #[error("fractionation feature {feature} of experiment {experiment} lists no fractions")]
    NoFractions { experiment: String, feature: String },
    #[error("feature {feature} of experiment {experiment} names no output series")]
    NoOutputs { experiment: String, feature: String },
    #[error("unknown search method {0}")]
    UnknownSearchMethod(String),
    #[error("cannot read experiment data {path}: {reason}")]
    BadData { path: PathBuf, reason: String },
    #[error("experiment {experiment} has no data source")]
    MissingData { experiment: String },
    #[error("template for experiment {experiment} failed to load: {reason}")]
    BadTemplate { experiment: String, reason: String },
    #[error("feature {feature} of experiment {experiment} failed setup: {reason}")]
    FeatureSetup {
        experiment: String,
        feature: String,
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_config() -> MatchConfig {
        MatchConfig {
            simulator: SimulatorSettings {
                command: PathBuf::from("sim"),
                args: Vec::new(),
            },
            output_dir: PathBuf::from("out"),
            search: SearchSettings {
                method: "generational".to_string(),
                population: 8,
                generations: 4,
                stagnation_limit: None,
                target_score: None,
                rng_seed: Some(1),
                crossover_rate: 0.9,
                mutation_rate: 0.25,
                mutation_strength: 0.1,
            },
            parameters: vec![ParameterSpec::Log {
                location: "/input/model/unit_001/col_dispersion".to_string(),
                component: Some(-1),
                index: None,
                min: 1e-10,
                max: 1e-6,
            }],
            experiments: vec![ExperimentSpec {
                name: "main".to_string(),
                template: PathBuf::from("template.json"),
                data: Some(PathBuf::from("data.csv")),
                timeout: Some(30.0),
                output: vec!["outlet_000".to_string()],
                features: vec![FeatureSpec {
                    name: "peak".to_string(),
                    kind: ScoreKind::Curve,
                    start: 0.0,
                    stop: 100.0,
                    data: None,
                    output: None,
                    fractions: Vec::new(),
                }],
            }],
            round_scores: None,
            grad_vector: false,
            seeds: Vec::new(),
        }
    }

    #[test]
    fn test_minimal_validates() {
        assert!(minimal_config().validate().is_ok());
    }

    #[test]
    fn test_keq_decode_joint() {
        let spec = ParameterSpec::Keq {
            ka_location: "/input/model/unit_001/adsorption/ka".to_string(),
            kd_location: "/input/model/unit_001/adsorption/kd".to_string(),
            component: Some(1),
            index: 0,
            min_ka: 1e-3,
            max_ka: 1e3,
            min_keq: 1e-2,
            max_keq: 1e2,
        };

        // ka = e^2, keq = e^1 => kd = e^2 / e^1 = e
        let (assignments, values) = spec.decode(&[2.0, 1.0]);
        assert_eq!(assignments.len(), 2);
        assert!((assignments[0].value - 2.0f64.exp()).abs() < 1e-12);
        assert!((assignments[1].value - 1.0f64.exp()).abs() < 1e-12);
        // ratio equals exp of the second coordinate
        assert!((values[2] - 1.0f64.exp()).abs() < 1e-12);
    }

    #[test]
    fn test_bounds_are_log_space() {
        let config = minimal_config();
        let (min, max) = config.bounds();
        assert_eq!(min.len(), 1);
        assert!((min[0] - 1e-10f64.ln()).abs() < 1e-12);
        assert!((max[0] - 1e-6f64.ln()).abs() < 1e-12);
    }

    #[test]
    fn test_invalid_window_rejected() {
        let mut config = minimal_config();
        config.experiments[0].features[0].stop = 0.0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidWindow { .. })
        ));
    }

    #[test]
    fn test_seed_length_checked() {
        let mut config = minimal_config();
        config.seeds = vec![vec![1.0, 2.0]];
        assert!(matches!(
            config.validate(),
            Err(ConfigError::SeedLength { .. })
        ));
    }

    #[test]
    fn test_score_kind_from_json() {
        let kind: ScoreKind = serde_json::from_str("\"derivative_similarity_cross\"").unwrap();
        assert_eq!(kind, ScoreKind::DerivativeSimilarityCross);
    }

    #[test]
    fn test_unit_index() {
        assert_eq!(unit_index("/input/model/unit_001/adsorption/ka"), Some(1));
        assert_eq!(unit_index("/input/solver/sections"), None);
    }
}
