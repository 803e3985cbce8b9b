//! Convoy - deployment execution engine
//!
//! Resolves a component dependency graph into waves, materializes each
//! component's sources from a deduplicated content-addressable store into
//! an isolated workspace, and runs components with bounded parallelism.

pub mod audit;
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod executor;
pub mod graph;
pub mod store;
pub mod workspace;

pub use engine::{Engine, EngineOptions};
pub use error::{ConvoyError, ConvoyResult};
