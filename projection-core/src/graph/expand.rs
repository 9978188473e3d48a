//! Stage Expansion
//!
//! Expands a set of changed stages into every stage that has to re-run.

use std::sync::Arc;

use indexmap::IndexSet;

use super::declaration::StageGraph;
use super::resolver::{resolve_graph, PreparedStageGraph};
use crate::error::Result;
use crate::stage::{Stage, StageId};

/// Either a raw declaration or an already prepared graph.
///
/// Passing a prepared graph skips resolution, which is what hot call sites
/// should do.
#[derive(Debug, Clone, Copy)]
pub enum GraphRef<'a, S> {
    Raw(&'a StageGraph<S>),
    Prepared(&'a PreparedStageGraph<S>),
}

impl<'a, S> From<&'a StageGraph<S>> for GraphRef<'a, S> {
    fn from(graph: &'a StageGraph<S>) -> Self {
        Self::Raw(graph)
    }
}

impl<'a, S> From<&'a PreparedStageGraph<S>> for GraphRef<'a, S> {
    fn from(graph: &'a PreparedStageGraph<S>) -> Self {
        Self::Prepared(graph)
    }
}

impl<'a, S> From<&'a Arc<PreparedStageGraph<S>>> for GraphRef<'a, S> {
    fn from(graph: &'a Arc<PreparedStageGraph<S>>) -> Self {
        Self::Prepared(graph.as_ref())
    }
}

/// All stages affected by a change to any of `requested`.
///
/// The result contains each requested stage and everything downstream of it,
/// once, in topological order.
pub fn expand_stages<'a, S, G>(requested: &[S], graph: G) -> Result<IndexSet<S>, S>
where
    S: Stage,
    G: Into<GraphRef<'a, S>>,
{
    match graph.into() {
        GraphRef::Prepared(prepared) => expand_prepared(requested, prepared),
        GraphRef::Raw(raw) => {
            let prepared = resolve_graph(raw, None)?;
            expand_prepared(requested, &prepared)
        }
    }
}

pub(crate) fn expand_prepared<S: Stage>(
    requested: &[S],
    graph: &PreparedStageGraph<S>,
) -> Result<IndexSet<S>, S> {
    let ids = requested
        .iter()
        .map(|stage| graph.require(stage))
        .collect::<Result<Vec<_>, S>>()?;

    Ok(affected_ids(graph, &ids)
        .into_iter()
        .map(|id| graph.stage_at(id).clone())
        .collect())
}

/// Union of the downstream closures of `ids`, each stage once, in topological order.
pub(crate) fn affected_ids<S: Stage>(
    graph: &PreparedStageGraph<S>,
    ids: &[StageId],
) -> Vec<StageId> {
    let mut seen = vec![false; graph.len()];
    let mut affected = Vec::new();
    for &id in ids {
        for &reached in graph.downstream_ids(id) {
            if !seen[reached.index()] {
                seen[reached.index()] = true;
                affected.push(reached);
            }
        }
    }

    // `seen` is indexed by ID; walking the global order yields topological output.
    if ids.len() > 1 {
        affected = graph
            .order_ids()
            .iter()
            .copied()
            .filter(|id| seen[id.index()])
            .collect();
    }
    affected
}
