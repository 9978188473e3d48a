//! Graph Resolver
//!
//! Turns a raw [`StageGraph`] declaration into a [`PreparedStageGraph`]:
//! validated, cycle-checked, topologically ordered, with the downstream
//! closure of every stage materialized up front.
//!
//! # Algorithm
//!
//! 1. Validate the declaration (non-empty, unique stages, known and unique
//!    dependencies, known refresh entry).
//! 2. Depth-first search with three marks to reject cycles, reporting the
//!    offending path.
//! 3. Kahn's algorithm where the ready set always yields the stage declared
//!    earliest. The resulting order depends only on the edges and the
//!    declaration order.
//! 4. Walk the order sink-to-source, unioning each stage with the closures
//!    of its dependents.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::Arc;

use indexmap::IndexSet;
use smallvec::SmallVec;
use tracing::debug;

use super::declaration::StageGraph;
use crate::error::{DefinitionError, ProjectionError, Result};
use crate::stage::{Stage, StageId};

type Adjacency = SmallVec<[StageId; 4]>;

/// DFS mark for cycle detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    OnStack,
    Done,
}

/// A validated, immutable stage graph.
///
/// Built once by [`resolve_graph`] and then shared read-only, typically
/// behind an [`Arc`] via [`prepare_graph`], by any number of engines.
#[derive(Debug, Clone)]
pub struct PreparedStageGraph<S> {
    /// Stages in declaration order. The index of a stage is its [`StageId`].
    stages: IndexSet<S>,

    /// Declared dependencies per stage, in declaration order.
    dependencies: Vec<Adjacency>,

    /// Reverse adjacency per stage, sorted by topological position.
    dependents: Vec<Adjacency>,

    /// Topological order, dependencies before dependents.
    stage_order: Vec<StageId>,

    /// `positions[id]` is the index of `id` in `stage_order`.
    positions: Vec<usize>,

    /// The stage itself plus everything downstream of it, in topological order.
    downstream: Vec<Vec<StageId>>,

    edge_count: usize,
}

impl<S: Stage> PreparedStageGraph<S> {
    /// Number of stages.
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Number of dependency edges.
    pub fn edge_count(&self) -> usize {
        self.edge_count
    }

    pub fn contains(&self, stage: &S) -> bool {
        self.stages.contains(stage)
    }

    /// The dense ID of a stage, if declared.
    pub fn id_of(&self, stage: &S) -> Option<StageId> {
        self.stages.get_index_of(stage).map(StageId::from_index)
    }

    /// The stage with the given ID, if issued by this graph.
    pub fn stage(&self, id: StageId) -> Option<&S> {
        self.stages.get_index(id.index())
    }

    /// Stages in declaration order.
    pub fn declaration_order(&self) -> impl ExactSizeIterator<Item = &S> + '_ {
        self.stages.iter()
    }

    /// Stages in topological order.
    pub fn stage_order(&self) -> impl ExactSizeIterator<Item = &S> + '_ {
        self.stage_order.iter().map(move |&id| self.stage_at(id))
    }

    /// Position of a stage in [`stage_order`](Self::stage_order).
    pub fn position(&self, stage: &S) -> Option<usize> {
        self.id_of(stage).map(|id| self.positions[id.index()])
    }

    /// Direct dependencies of `stage`, in declaration order.
    pub fn dependencies(&self, stage: &S) -> Result<impl Iterator<Item = &S> + '_, S> {
        let id = self.require(stage)?;
        Ok(self.dependencies[id.index()]
            .iter()
            .map(move |&dep| self.stage_at(dep)))
    }

    /// Direct dependents of `stage`, in topological order.
    pub fn dependents(&self, stage: &S) -> Result<impl Iterator<Item = &S> + '_, S> {
        let id = self.require(stage)?;
        Ok(self.dependents[id.index()]
            .iter()
            .map(move |&dep| self.stage_at(dep)))
    }

    /// `stage` and every stage transitively depending on it, in topological order.
    pub fn downstream(&self, stage: &S) -> Result<impl Iterator<Item = &S> + '_, S> {
        let id = self.require(stage)?;
        Ok(self
            .downstream_ids(id)
            .iter()
            .map(move |&dep| self.stage_at(dep)))
    }

    pub(crate) fn require(&self, stage: &S) -> Result<StageId, S> {
        self.id_of(stage)
            .ok_or_else(|| ProjectionError::UnknownStage(stage.clone()))
    }

    pub(crate) fn stage_at(&self, id: StageId) -> &S {
        &self.stages[id.index()]
    }

    pub(crate) fn order_ids(&self) -> &[StageId] {
        &self.stage_order
    }

    pub(crate) fn downstream_ids(&self, id: StageId) -> &[StageId] {
        &self.downstream[id.index()]
    }
}

/// Validate and resolve a stage declaration.
///
/// When `refresh_entry_stage` is given it must be one of the declared stages.
pub fn resolve_graph<S: Stage>(
    graph: &StageGraph<S>,
    refresh_entry_stage: Option<&S>,
) -> Result<PreparedStageGraph<S>, S> {
    if graph.is_empty() {
        return Err(DefinitionError::EmptyGraph.into());
    }
    check_stage_count(graph.len())?;

    let mut stages = IndexSet::with_capacity(graph.len());
    for (stage, _) in graph.iter() {
        if !stages.insert(stage.clone()) {
            return Err(DefinitionError::DuplicateStage {
                stage: stage.clone(),
            }
            .into());
        }
    }

    let mut dependencies = Vec::with_capacity(stages.len());
    let mut edge_count = 0;
    for (stage, node) in graph.iter() {
        let mut deps = Adjacency::new();
        for dependency in &node.depends_on {
            let Some(index) = stages.get_index_of(dependency) else {
                return Err(DefinitionError::UnknownDependency {
                    stage: stage.clone(),
                    dependency: dependency.clone(),
                }
                .into());
            };
            let id = StageId::from_index(index);
            if deps.contains(&id) {
                return Err(DefinitionError::DuplicateDependency {
                    stage: stage.clone(),
                    dependency: dependency.clone(),
                }
                .into());
            }
            deps.push(id);
        }
        edge_count += deps.len();
        dependencies.push(deps);
    }

    if let Some(entry) = refresh_entry_stage {
        if !stages.contains(entry) {
            return Err(ProjectionError::RefreshEntryStage(entry.clone()));
        }
    }

    detect_cycle(&stages, &dependencies)?;

    let mut dependents = vec![Adjacency::new(); stages.len()];
    for (index, deps) in dependencies.iter().enumerate() {
        for dep in deps {
            dependents[dep.index()].push(StageId::from_index(index));
        }
    }

    let stage_order = topological_order(&dependencies, &dependents);
    if stage_order.len() != stages.len() {
        return Err(ProjectionError::TopologyInternal {
            ordered: stage_order.len(),
            declared: stages.len(),
        });
    }

    let mut positions = vec![0; stages.len()];
    for (position, id) in stage_order.iter().enumerate() {
        positions[id.index()] = position;
    }
    for list in &mut dependents {
        list.sort_by_key(|id| positions[id.index()]);
    }

    let downstream = downstream_closures(&stage_order, &positions, &dependents);

    debug!(
        stages = stages.len(),
        edges = edge_count,
        "resolved stage graph"
    );

    Ok(PreparedStageGraph {
        stages,
        dependencies,
        dependents,
        stage_order,
        positions,
        downstream,
        edge_count,
    })
}

fn check_stage_count<S: Stage>(count: usize) -> Result<(), S> {
    // The last index must fit; IDs are issued for 0..count.
    match StageId::try_from_index(count.saturating_sub(1)) {
        Some(_) => Ok(()),
        None => Err(DefinitionError::TooManyStages { count }.into()),
    }
}

/// Resolve a declaration into a shareable prepared graph.
pub fn prepare_graph<S: Stage>(graph: &StageGraph<S>) -> Result<Arc<PreparedStageGraph<S>>, S> {
    resolve_graph(graph, None).map(Arc::new)
}

/// Reject cycles, reporting the path from the first repeated stage back to itself.
fn detect_cycle<S: Stage>(stages: &IndexSet<S>, dependencies: &[Adjacency]) -> Result<(), S> {
    let mut marks = vec![Mark::Unvisited; stages.len()];
    // (stage, next dependency to visit); doubles as the current DFS path.
    let mut stack: Vec<(StageId, usize)> = Vec::new();

    for root in 0..stages.len() {
        if marks[root] != Mark::Unvisited {
            continue;
        }
        marks[root] = Mark::OnStack;
        stack.push((StageId::from_index(root), 0));

        while let Some(frame) = stack.last_mut() {
            let (id, cursor) = *frame;
            frame.1 += 1;

            let Some(&dep) = dependencies[id.index()].get(cursor) else {
                marks[id.index()] = Mark::Done;
                stack.pop();
                continue;
            };

            match marks[dep.index()] {
                Mark::Done => {}
                Mark::Unvisited => {
                    marks[dep.index()] = Mark::OnStack;
                    stack.push((dep, 0));
                }
                Mark::OnStack => {
                    let start = stack
                        .iter()
                        .position(|&(on_path, _)| on_path == dep)
                        .unwrap_or(0);
                    let mut path: Vec<S> = stack[start..]
                        .iter()
                        .map(|&(on_path, _)| stages[on_path.index()].clone())
                        .collect();
                    path.push(stages[dep.index()].clone());
                    return Err(ProjectionError::Cycle { path });
                }
            }
        }
    }

    Ok(())
}

/// Kahn's algorithm; among ready stages the earliest declared goes first.
///
/// `StageId`s are declaration indices, so a min-heap over IDs keeps the
/// ready queue sorted by declaration order.
fn topological_order(dependencies: &[Adjacency], dependents: &[Adjacency]) -> Vec<StageId> {
    let mut indegree: Vec<usize> = dependencies.iter().map(|deps| deps.len()).collect();
    let mut ready: BinaryHeap<Reverse<StageId>> = indegree
        .iter()
        .enumerate()
        .filter(|(_, &degree)| degree == 0)
        .map(|(index, _)| Reverse(StageId::from_index(index)))
        .collect();

    let mut order = Vec::with_capacity(dependencies.len());
    while let Some(Reverse(id)) = ready.pop() {
        order.push(id);
        for &dependent in &dependents[id.index()] {
            let degree = &mut indegree[dependent.index()];
            *degree -= 1;
            if *degree == 0 {
                ready.push(Reverse(dependent));
            }
        }
    }

    order
}

fn downstream_closures(
    stage_order: &[StageId],
    positions: &[usize],
    dependents: &[Adjacency],
) -> Vec<Vec<StageId>> {
    let mut downstream: Vec<Vec<StageId>> = vec![Vec::new(); stage_order.len()];
    // Last position that claimed each stage; avoids clearing a seen-set per stage.
    let mut claimed = vec![usize::MAX; stage_order.len()];

    for (position, &id) in stage_order.iter().enumerate().rev() {
        let mut closure = vec![id];
        claimed[id.index()] = position;

        for dependent in &dependents[id.index()] {
            for &reached in &downstream[dependent.index()] {
                if claimed[reached.index()] != position {
                    claimed[reached.index()] = position;
                    closure.push(reached);
                }
            }
        }

        closure.sort_by_key(|reached| positions[reached.index()]);
        downstream[id.index()] = closure;
    }

    downstream
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn chain() -> StageGraph<&'static str> {
        StageGraph::new()
            .stage("filter", [])
            .stage("sort", ["filter"])
            .stage("group", ["sort"])
    }

    fn order(graph: &PreparedStageGraph<&'static str>) -> Vec<&'static str> {
        graph.stage_order().copied().collect()
    }

    #[test]
    fn resolves_chain() {
        let graph = resolve_graph(&chain(), Some(&"filter")).unwrap();

        assert_eq!(order(&graph), vec!["filter", "sort", "group"]);
        assert_eq!(graph.len(), 3);
        assert_eq!(graph.edge_count(), 2);
        assert_eq!(
            graph.downstream(&"sort").unwrap().copied().collect::<Vec<_>>(),
            vec!["sort", "group"]
        );
        assert_eq!(
            graph.dependents(&"filter").unwrap().copied().collect::<Vec<_>>(),
            vec!["sort"]
        );
    }

    #[test]
    fn order_ignores_declaration_order_when_edges_constrain_it() {
        let graph = StageGraph::new()
            .stage("sort", ["filter"])
            .stage("group", ["sort"])
            .stage("filter", []);
        let prepared = resolve_graph(&graph, None).unwrap();

        assert_eq!(order(&prepared), vec!["filter", "sort", "group"]);
        assert_eq!(
            prepared.declaration_order().copied().collect::<Vec<_>>(),
            vec!["sort", "group", "filter"]
        );
    }

    #[test]
    fn ties_break_by_declaration_order() {
        // "b" and "c" both become ready once "a" is done.
        let graph = StageGraph::new()
            .stage("c", ["a"])
            .stage("a", [])
            .stage("b", ["a"])
            .stage("d", ["b", "c"]);
        let prepared = resolve_graph(&graph, None).unwrap();

        assert_eq!(order(&prepared), vec!["a", "c", "b", "d"]);
        assert_eq!(
            prepared.dependents(&"a").unwrap().copied().collect::<Vec<_>>(),
            vec!["c", "b"]
        );
    }

    #[test]
    fn diamond_closure_is_ordered_and_deduplicated() {
        let graph = StageGraph::new()
            .stage("source", [])
            .stage("left", ["source"])
            .stage("right", ["source"])
            .stage("join", ["left", "right"]);
        let prepared = resolve_graph(&graph, None).unwrap();

        assert_eq!(
            prepared.downstream(&"source").unwrap().copied().collect::<Vec<_>>(),
            vec!["source", "left", "right", "join"]
        );
        assert_eq!(
            prepared.downstream(&"join").unwrap().copied().collect::<Vec<_>>(),
            vec!["join"]
        );
    }

    #[test]
    fn rejects_empty_graph() {
        let err = resolve_graph(&StageGraph::<&str>::new(), None).unwrap_err();
        assert_eq!(err, ProjectionError::from(DefinitionError::EmptyGraph));
    }

    #[test]
    fn rejects_duplicate_stage() {
        let graph = StageGraph::new().stage("filter", []).stage("filter", []);
        let err = resolve_graph(&graph, None).unwrap_err();
        assert_eq!(
            err,
            ProjectionError::from(DefinitionError::DuplicateStage { stage: "filter" })
        );
    }

    #[test]
    fn rejects_unknown_dependency() {
        let graph = StageGraph::new().stage("sort", ["filter"]);
        let err = resolve_graph(&graph, None).unwrap_err();
        assert_eq!(
            err,
            ProjectionError::from(DefinitionError::UnknownDependency {
                stage: "sort",
                dependency: "filter"
            })
        );
    }

    #[test]
    fn rejects_duplicate_dependency() {
        let graph = StageGraph::new()
            .stage("filter", [])
            .stage("sort", ["filter", "filter"]);
        let err = resolve_graph(&graph, None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::GraphDefinition);
    }

    #[test]
    fn rejects_unknown_refresh_entry() {
        let err = resolve_graph(&chain(), Some(&"render")).unwrap_err();
        assert_eq!(err, ProjectionError::RefreshEntryStage("render"));
    }

    #[test]
    fn reports_cycle_path() {
        let graph = StageGraph::new()
            .stage("filter", ["group"])
            .stage("sort", ["filter"])
            .stage("group", ["sort"]);
        let err = resolve_graph(&graph, None).unwrap_err();

        assert_eq!(
            err,
            ProjectionError::Cycle {
                path: vec!["filter", "group", "sort", "filter"]
            }
        );
    }

    #[test]
    fn cycle_path_starts_at_repeated_stage() {
        let graph = StageGraph::new()
            .stage("entry", ["a"])
            .stage("a", ["b"])
            .stage("b", ["a"]);
        let err = resolve_graph(&graph, None).unwrap_err();

        assert_eq!(
            err,
            ProjectionError::Cycle {
                path: vec!["a", "b", "a"]
            }
        );
    }

    #[test]
    fn self_dependency_is_a_cycle() {
        let graph = StageGraph::new().stage("sort", ["sort"]);
        let err = resolve_graph(&graph, None).unwrap_err();
        assert_eq!(
            err,
            ProjectionError::Cycle {
                path: vec!["sort", "sort"]
            }
        );
    }

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn stage_count_must_fit_stage_ids() {
        let limit = u32::MAX as usize + 1;
        assert_eq!(check_stage_count::<&str>(limit), Ok(()));
        assert_eq!(
            check_stage_count::<&str>(limit + 1),
            Err(ProjectionError::from(DefinitionError::TooManyStages {
                count: limit + 1
            }))
        );
    }

    #[test]
    fn prepared_graph_is_shareable() {
        let prepared = prepare_graph(&chain()).unwrap();
        let other = Arc::clone(&prepared);
        assert_eq!(other.position(&"group"), Some(2));
        assert_eq!(prepared.id_of(&"sort").map(|id| id.raw()), Some(1));
        assert_eq!(prepared.stage(StageId::from_index(0)), Some(&"filter"));
    }
}
