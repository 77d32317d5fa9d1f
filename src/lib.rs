//! chromafit - Chromatography column parameter estimation.
//!
//! Estimates unknown physical parameters of a chromatography column model by
//! running a black-box simulator repeatedly, comparing its output curves
//! against experimental measurements, and searching parameter space with a
//! hybrid multi-objective evolutionary + gradient optimizer.
//!
//! # Architecture
//!
//! The crate is split into two main modules:
//!
//! - `schema`: Configuration types (parameters, experiments, features)
//! - `compute`: Numerics, score plugins, the simulator contract and the
//!   estimation engine
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
//!
//! for entry in result.meta_front.entries() {
//!     println!("{}: {:?}", entry.save_name, entry.objectives);
//! }
//! ```

pub mod compute;
pub mod schema;

// Re-export commonly used types
pub use compute::estimation::{SearchOrchestrator, SearchResult};
pub use compute::sim::{ProcessBackend, SimulatorBackend};
pub use schema::MatchConfig;
