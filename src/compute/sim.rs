//! External simulator contract and invocation.
//!
//! The simulator is a black box consumed through a file-based run/load
//! contract: a prepared job is written to a scratch file, the simulator
//! process rewrites it with named time-series outputs, and the result is
//! loaded back. A missing or wrong-shape output series is treated the same
//! as an explicit failure.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::schema::Assignment;

/// Column geometry carried by a simulator template.
///
/// Used to derive the characteristic residence time that scales the
/// time-difference scoring transforms.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnGeometry {
    pub length: f64,
    #[serde(default = "one")]
    pub velocity: f64,
    #[serde(default = "one")]
    pub cross_section_area: f64,
    #[serde(default = "one")]
    pub porosity: f64,
    /// Total volumetric flow into the column.
    #[serde(default)]
    pub flow: f64,
}

fn one() -> f64 {
    1.0
}

impl ColumnGeometry {
    /// Characteristic residence time (one column volume).
    ///
    /// Based on superficial velocity; when the template carries no real
    /// cross-section the velocity form is used directly.
    pub fn residence_time(&self) -> f64 {
        if self.cross_section_area == 1.0 && self.velocity.abs() != 1.0 {
            self.length / self.velocity
        } else if self.flow > 0.0 {
            (self.cross_section_area * self.length) / self.flow
        } else {
            self.length / self.velocity
        }
    }
}

/// A loaded simulator template.
#[derive(Debug, Clone)]
pub struct Template {
    pub name: String,
    pub path: PathBuf,
    pub geometry: ColumnGeometry,
    /// Absolute tolerance of the simulator's time integrator.
    pub abstol: f64,
}

#[derive(Debug, Deserialize)]
struct TemplateFile {
    geometry: ColumnGeometry,
    #[serde(default = "default_abstol")]
    abstol: f64,
}

fn default_abstol() -> f64 {
    1e-8
}

/// Job description handed to the simulator process.
#[derive(Debug, Serialize)]
struct SimulationJob<'a> {
    template: &'a Path,
    assignments: &'a [Assignment],
}

/// Named time-series outputs loaded back from the simulator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SimulationOutput {
    pub times: Vec<f64>,
    pub series: HashMap<String, Vec<f64>>,
}

impl SimulationOutput {
    /// Sum of the named output series, aligned with `times`.
    ///
    /// None when any series is missing or has the wrong length — the
    /// evaluator treats that as a failed simulation.
    pub fn solution(&self, outputs: &[String]) -> Option<Vec<f64>> {
        let mut sum = vec![0.0f64; self.times.len()];
        for name in outputs {
            let series = self.series.get(name)?;
            if series.len() != self.times.len() {
                return None;
            }
            for (acc, v) in sum.iter_mut().zip(series.iter()) {
                *acc += v;
            }
        }
        Some(sum)
    }
}

/// Simulation failures. Recovered locally as a sentinel result by the
/// evaluator; never raised to the search loop.
#[derive(Debug, thiserror::Error)]
pub enum SimulationError {
    #[error("simulation exceeded timeout of {0:.1}s")]
    Timeout(f64),
    #[error("simulator exited with status {0}")]
    Failed(i32),
    #[error("simulator output malformed: {0}")]
    Malformed(String),
    #[error("io error during simulation: {0}")]
    Io(#[from] std::io::Error),
}

/// The run/load contract an external simulator integration implements.
pub trait SimulatorBackend: Send + Sync {
    /// Load a template file and its metadata.
    fn load_template(&self, path: &Path, name: &str) -> Result<Template, SimulationError>;

    /// Run one simulation against `scratch` and load the outputs back.
    fn execute(
        &self,
        template: &Template,
        assignments: &[Assignment],
        scratch: &Path,
        timeout: Duration,
    ) -> Result<SimulationOutput, SimulationError>;
}

/// Runs simulations with a private scratch file per invocation.
///
/// The scratch file is a `NamedTempFile`, so it is deleted on every exit
/// path: success, failure and timeout alike.
pub struct SimulationRunner<'a> {
    backend: &'a dyn SimulatorBackend,
}

impl<'a> SimulationRunner<'a> {
    pub fn new(backend: &'a dyn SimulatorBackend) -> Self {
        Self { backend }
    }

    /// Run one simulation.
    pub fn run(
        &self,
        template: &Template,
        assignments: &[Assignment],
        timeout: Duration,
    ) -> Result<SimulationOutput, SimulationError> {
        let scratch = tempfile::Builder::new()
            .prefix("chromafit_")
            .suffix(".json")
            .tempfile()?;

        let output = self
            .backend
            .execute(template, assignments, scratch.path(), timeout)?;

        if output.times.is_empty() {
            return Err(SimulationError::Malformed("empty solution times".into()));
        }

        Ok(output)
    }
}

/// Subprocess simulator backend.
///
/// Writes the job JSON to the scratch path, invokes
/// `command [args..] <scratch>`, and loads the rewritten scratch file as the
/// result.
pub struct ProcessBackend {
    command: PathBuf,
    args: Vec<String>,
}

impl ProcessBackend {
    pub fn new(command: PathBuf, args: Vec<String>) -> Self {
        Self { command, args }
    }
}

impl SimulatorBackend for ProcessBackend {
    fn load_template(&self, path: &Path, name: &str) -> Result<Template, SimulationError> {
        let text = std::fs::read_to_string(path)?;
        let file: TemplateFile = serde_json::from_str(&text)
            .map_err(|e| SimulationError::Malformed(format!("template {}: {e}", path.display())))?;

        Ok(Template {
            name: name.to_string(),
            path: path.to_path_buf(),
            geometry: file.geometry,
            abstol: file.abstol,
        })
    }

    fn execute(
        &self,
        template: &Template,
        assignments: &[Assignment],
        scratch: &Path,
        timeout: Duration,
    ) -> Result<SimulationOutput, SimulationError> {
        let job = SimulationJob {
            template: &template.path,
            assignments,
        };
        std::fs::write(
            scratch,
            serde_json::to_string(&job)
                .map_err(|e| SimulationError::Malformed(e.to_string()))?,
        )?;

        let mut child = Command::new(&self.command)
            .args(&self.args)
            .arg(scratch)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;

        let started = Instant::now();
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if started.elapsed() >= timeout {
                child.kill()?;
                child.wait()?;
                return Err(SimulationError::Timeout(timeout.as_secs_f64()));
            }
            std::thread::sleep(Duration::from_millis(20));
        };

        if !status.success() {
            return Err(SimulationError::Failed(status.code().unwrap_or(-1)));
        }

        let text = std::fs::read_to_string(scratch)?;
        serde_json::from_str(&text)
            .map_err(|e| SimulationError::Malformed(format!("result: {e}")))
    }
}
