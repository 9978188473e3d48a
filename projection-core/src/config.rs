//! Engine Configuration
//!
//! A serializable description of an engine: the stage declaration plus the
//! refresh entry stage. Lets a pipeline be declared in a JSON file rather
//! than in code.
//!
//! ```json
//! {
//!     "refreshEntryStage": "filter",
//!     "nodes": {
//!         "filter": {},
//!         "sort": { "dependsOn": ["filter"] },
//!         "group": { "dependsOn": ["sort"] }
//!     }
//! }
//! ```

use std::io::Read;

use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::error::Category;
use thiserror::Error;

use crate::engine::ProjectionEngine;
use crate::error::{ErrorKind, ProjectionError, Result};
use crate::graph::{StageGraph, StageNode};
use crate::stage::Stage;

/// Errors from loading an engine configuration.
#[derive(Debug, Error)]
pub enum ConfigError<S: Stage> {
    #[error("failed to parse engine config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error(transparent)]
    Projection(#[from] ProjectionError<S>),
}

impl<S: Stage> ConfigError<S> {
    /// Classify the failure.
    ///
    /// Well-formed JSON with the wrong shape (a node that is not an object,
    /// a `dependsOn` that is not an array, a missing field) is a malformed
    /// declaration. Broken JSON syntax and I/O failures have no kind.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Parse(err) => match err.classify() {
                Category::Data => Some(ErrorKind::GraphDefinition),
                Category::Syntax | Category::Eof | Category::Io => None,
            },
            Self::Projection(err) => Some(err.kind()),
        }
    }
}

/// Declaration and refresh entry for one engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    from = "ConfigRepr<S>",
    into = "ConfigRepr<S>",
    bound(
        serialize = "S: Stage + Serialize",
        deserialize = "S: Stage + Deserialize<'de>"
    )
)]
pub struct EngineConfig<S> {
    /// Entry stage of [`ProjectionEngine::request_refresh_pass`].
    pub refresh_entry_stage: S,

    pub graph: StageGraph<S>,
}

impl<S: Stage> EngineConfig<S> {
    pub fn new(graph: StageGraph<S>, refresh_entry_stage: S) -> Self {
        Self {
            refresh_entry_stage,
            graph,
        }
    }

    /// Build an engine from this configuration.
    pub fn build(&self) -> Result<ProjectionEngine<S>, S> {
        ProjectionEngine::new(&self.graph, self.refresh_entry_stage.clone())
    }
}

/// Wire shape of [`EngineConfig`]: the graph's `nodes` inline, next to the
/// entry stage. Non-string keys survive because the map is typed here.
#[derive(Serialize, Deserialize)]
#[serde(
    rename_all = "camelCase",
    bound(
        serialize = "S: Stage + Serialize",
        deserialize = "S: Stage + Deserialize<'de>"
    )
)]
struct ConfigRepr<S> {
    refresh_entry_stage: S,
    nodes: IndexMap<S, StageNode<S>>,
}

impl<S: Stage> From<ConfigRepr<S>> for EngineConfig<S> {
    fn from(repr: ConfigRepr<S>) -> Self {
        Self::new(repr.nodes.into(), repr.refresh_entry_stage)
    }
}

impl<S: Stage> From<EngineConfig<S>> for ConfigRepr<S> {
    fn from(config: EngineConfig<S>) -> Self {
        Self {
            refresh_entry_stage: config.refresh_entry_stage,
            nodes: config.graph.into_nodes(),
        }
    }
}

impl<S: Stage + DeserializeOwned> EngineConfig<S> {
    /// Parse a configuration from JSON.
    pub fn from_json(json: &str) -> std::result::Result<Self, ConfigError<S>> {
        Ok(serde_json::from_str(json)?)
    }

    /// Parse a configuration from a JSON reader.
    pub fn from_reader<R: Read>(reader: R) -> std::result::Result<Self, ConfigError<S>> {
        Ok(serde_json::from_reader(reader)?)
    }

    /// Parse and build in one step.
    pub fn engine_from_json(
        json: &str,
    ) -> std::result::Result<ProjectionEngine<S>, ConfigError<S>> {
        Ok(Self::from_json(json)?.build()?)
    }
}
