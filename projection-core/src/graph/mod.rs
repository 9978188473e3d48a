//! Stage Graph
//!
//! This module turns a declared set of stages into the structure the engine
//! schedules against.
//!
//! # Overview
//!
//! A stage graph is a directed acyclic graph where:
//!
//! - Nodes are stages, named by any [`Stage`](crate::Stage) key
//! - Edges are dependencies: if B depends on A, A must run before B
//!
//! A [`StageGraph`] is the raw declaration. [`resolve_graph`] validates it and
//! produces a [`PreparedStageGraph`] holding the topological order and the
//! downstream closure of every stage. [`expand_stages`] answers "what has to
//! re-run if these stages changed".
//!
//! # Design Decisions
//!
//! 1. Stages get dense IDs during resolution, so adjacency and closures are
//!    plain vectors indexed by ID.
//!
//! 2. Closures are computed once at resolution time. Requests are then a
//!    lookup plus a union, never a traversal.
//!
//! 3. The topological order breaks ties by declaration order, so it is a pure
//!    function of the edges and the declaration.

mod declaration;
mod expand;
mod resolver;

pub use declaration::{StageGraph, StageNode};
pub use expand::{expand_stages, GraphRef};
pub use resolver::{prepare_graph, resolve_graph, PreparedStageGraph};

pub(crate) use expand::{affected_ids, expand_prepared};
