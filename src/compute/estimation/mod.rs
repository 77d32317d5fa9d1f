//! Estimation engine: evaluation, archival, refinement and search.
//!
//! # Overview
//!
//! The engine turns a candidate parameter vector into a vector of bounded
//! similarity objectives plus a scalar error, and searches parameter space
//! with a hybrid global + local optimizer:
//!
//! - **Target Store** (`target`): per-experiment expected curves and plugin
//!   descriptors, precomputed once per configuration
//! - **Objective Evaluator** (`evaluator`): one candidate in, objectives and
//!   meta scores out, with abort-all failure semantics
//! - **Pareto Archives** (`pareto`): non-dominated, deduplicated fronts over
//!   raw objectives and meta scores
//! - **Gradient Refiner** (`gradient`): bounded local least-squares polish
//!   of gradient-worthy candidates
//! - **Search Orchestrator** (`search`): the generational loop tying the
//!   stages together under one budget and shared archives
//! - **Run Log** (`runlog`): CSV emission for accepted evaluations
//!
//! # Example
//!
//! ```rust,no_run
//! use chromafit::compute::estimation::SearchOrchestrator;
//! use chromafit::compute::parallel::RayonMap;
//! use chromafit::compute::sim::ProcessBackend;
//! use chromafit::schema::MatchConfig;
//!
//! let config = MatchConfig::from_path("match.json".as_ref()).unwrap();
//! let backend = ProcessBackend::new(
//!     config.simulator.command.clone(),
//!     config.simulator.args.clone(),
//! );
//!
//! let mut orchestrator = SearchOrchestrator::new(config, &backend, RayonMap).unwrap();
//! let result = orchestrator.run().unwrap();
//! println!("meta front holds {} candidates", result.meta_front.len());
//! ```

mod evaluator;
mod gradient;
mod pareto;
mod runlog;
mod search;
mod target;

pub use evaluator::{
    EvalContext, Evaluation, ExperimentResult, ObjectiveEvaluator, SessionCache, format_sig,
    meta_scores,
};
pub use gradient::{GradientError, GradientRefiner, OVERLAP_CUTOFF, Refined, overlap_ratio};
pub use pareto::{FrontEntry, ParetoFront, SIMILARITY_TOLERANCE, dominates, save_name, similar};
pub use runlog::RunLog;
pub use search::{
    IndividualRng, SearchError, SearchOrchestrator, SearchPhase, SearchResult, StopReason,
    Strategy,
};
pub use target::{DEFAULT_TIMEOUT, ExperimentTarget, TargetStore};
