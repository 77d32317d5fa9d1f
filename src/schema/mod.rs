//! Schema module - Configuration types for parameter estimation runs.

mod config;

pub use config::*;
