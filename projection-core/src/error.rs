//! Error types.
//!
//! Every failure here is a hard, call-time error: a malformed declaration,
//! an unknown stage, or a cycle. A stage that cannot finish its work is not
//! an error at all; it stays stale and is retried on a later recompute.

use thiserror::Error;

use crate::stage::Stage;

/// Result alias used throughout the crate.
pub type Result<T, S> = std::result::Result<T, ProjectionError<S>>;

/// Coarse classification of a [`ProjectionError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The declaration itself is malformed.
    GraphDefinition,
    /// The dependency relation contains a cycle.
    Cycle,
    /// Topological ordering failed to cover every stage.
    TopologyInternal,
    /// The refresh entry stage is not declared.
    RefreshEntryStage,
    /// A call referenced a stage outside the graph.
    UnknownStage,
}

/// Structural problems with a stage declaration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DefinitionError<S: Stage> {
    /// The declaration has no stages.
    #[error("stage graph declares no stages")]
    EmptyGraph,

    /// More stages than a [`StageId`](crate::StageId) can address.
    #[error("stage graph declares {count} stages, more than can be indexed")]
    TooManyStages { count: usize },

    /// The same stage key was declared twice.
    #[error("stage `{stage}` is declared more than once")]
    DuplicateStage { stage: S },

    /// A node depends on a stage that is not declared.
    #[error("stage `{stage}` depends on undeclared stage `{dependency}`")]
    UnknownDependency { stage: S, dependency: S },

    /// A node lists the same dependency twice.
    #[error("stage `{stage}` lists dependency `{dependency}` more than once")]
    DuplicateDependency { stage: S, dependency: S },
}

/// Errors produced while resolving a graph or driving an engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProjectionError<S: Stage> {
    #[error("invalid stage graph: {0}")]
    GraphDefinition(#[from] DefinitionError<S>),

    /// `path` starts and ends with the same stage.
    #[error("stage graph contains a cycle: {}", join_path(.path))]
    Cycle { path: Vec<S> },

    #[error("topological order covered {ordered} of {declared} stages")]
    TopologyInternal { ordered: usize, declared: usize },

    #[error("refresh entry stage `{0}` is not declared in the graph")]
    RefreshEntryStage(S),

    #[error("unknown stage `{0}`")]
    UnknownStage(S),
}

impl<S: Stage> ProjectionError<S> {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::GraphDefinition(_) => ErrorKind::GraphDefinition,
            Self::Cycle { .. } => ErrorKind::Cycle,
            Self::TopologyInternal { .. } => ErrorKind::TopologyInternal,
            Self::RefreshEntryStage(_) => ErrorKind::RefreshEntryStage,
            Self::UnknownStage(_) => ErrorKind::UnknownStage,
        }
    }
}

fn join_path<S: Stage>(path: &[S]) -> String {
    path.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" -> ")
}
