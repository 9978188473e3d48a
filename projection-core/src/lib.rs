//! Projection Core
//!
//! This crate provides an incremental stage-dependency scheduler for
//! projection pipelines (filter, sort, group, render, ...). It implements:
//!
//! - Stage graph declaration, validation and cycle detection
//! - Deterministic topological scheduling
//! - Downstream expansion of changed stages
//! - Revision-based dirty tracking that tolerates blocked and failed stages
//!
//! The engine performs no I/O and never runs stages itself. Callers declare a
//! graph, report changes, and supply an executor closure per recompute pass.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `graph`: Declarations, the resolver, and stage expansion
//! - `engine`: Per-pipeline revision tracking and recompute passes
//! - `config`: JSON-loadable engine configuration
//! - `error`: Error types shared by all of the above
//!
//! # Example
//!
//! ```rust
//! use projection_core::{ProjectionEngine, RecomputeOptions, StageGraph};
//!
//! let graph = StageGraph::new()
//!     .stage("filter", [])
//!     .stage("sort", ["filter"])
//!     .stage("group", ["sort"]);
//! let mut engine = ProjectionEngine::new(&graph, "filter")?;
//!
//! // The user changed the sort column.
//! engine.request_stages(&["sort"])?;
//!
//! // Group data is still loading, so hold it back this pass.
//! let options = RecomputeOptions::blocking(["group"]);
//! let result = engine
//!     .recompute_with(|_stage, should_recompute| should_recompute, &options)?
//!     .expect("stages were requested");
//!
//! assert_eq!(result.recomputed_stages, vec!["sort"]);
//! assert_eq!(engine.stale_stages(), vec!["group"]);
//! # Ok::<(), projection_core::ProjectionError<&str>>(())
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod graph;
mod stage;

pub use config::{ConfigError, EngineConfig};
pub use engine::{
    ProjectionEngine, RecomputeOptions, RecomputeResult, RequestOptions, StageRevisions,
};
pub use error::{DefinitionError, ErrorKind, ProjectionError, Result};
pub use graph::{
    expand_stages, prepare_graph, resolve_graph, GraphRef, PreparedStageGraph, StageGraph,
    StageNode,
};
pub use stage::{Stage, StageId};
