//! Projection Engine
//!
//! The engine is the stateful half of the crate. It owns the revision table
//! for one projection pipeline and drives recompute passes over a shared,
//! immutable [`PreparedStageGraph`].
//!
//! # How It Works
//!
//! 1. The caller reports changed inputs with
//!    [`request_stages`](ProjectionEngine::request_stages). Every stage
//!    downstream of a requested stage gets one revision bump per call and is
//!    scheduled.
//!
//! 2. Once per flush the caller runs
//!    [`recompute`](ProjectionEngine::recompute) with an executor closure.
//!    Scheduled stages are visited in topological order, so a dependency
//!    always runs before its dependents within a pass.
//!
//! 3. A stage that was blocked, or whose executor reported no work done,
//!    stays stale and is scheduled again for the next pass. Nothing is
//!    retried until the caller asks.
//!
//! # Re-entrancy
//!
//! Every mutating method takes `&mut self` and the executor is borrowed for
//! the duration of the pass, so an executor cannot call back into the engine
//! that is running it.

mod revision;

use std::sync::Arc;

use indexmap::IndexSet;
use serde::Serialize;
use tracing::{debug, trace};

use crate::error::{ProjectionError, Result};
use crate::graph::{
    affected_ids, expand_prepared, resolve_graph, PreparedStageGraph, StageGraph,
};
use crate::stage::{Stage, StageId};

pub use revision::StageRevisions;
use revision::RevisionTable;

/// Options for [`ProjectionEngine::request_stages_with`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestOptions {
    /// Bump requested revisions. When false the stages are only scheduled.
    pub track_requested: bool,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            track_requested: true,
        }
    }
}

impl RequestOptions {
    /// Schedule without recording a new revision.
    pub fn untracked() -> Self {
        Self {
            track_requested: false,
        }
    }
}

/// Options for [`ProjectionEngine::recompute_with`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecomputeOptions<S> {
    /// Stages to skip this pass. They stay stale.
    pub blocked_stages: Vec<S>,
}

impl<S> Default for RecomputeOptions<S> {
    fn default() -> Self {
        Self {
            blocked_stages: Vec::new(),
        }
    }
}

impl<S> RecomputeOptions<S> {
    pub fn blocking<I>(stages: I) -> Self
    where
        I: IntoIterator<Item = S>,
    {
        Self {
            blocked_stages: stages.into_iter().collect(),
        }
    }
}

/// Summary of one recompute pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecomputeResult<S> {
    /// Whether at least one stage actually recomputed.
    pub had_actual_recompute: bool,

    /// Stages that recomputed, in topological order.
    pub recomputed_stages: Vec<S>,

    /// The blocked stages as passed in.
    pub blocked_stages: Vec<S>,
}

/// Dirty-tracking scheduler for one projection pipeline.
#[derive(Debug, Clone)]
pub struct ProjectionEngine<S> {
    graph: Arc<PreparedStageGraph<S>>,
    refresh_entry: StageId,
    revisions: RevisionTable,
}

impl<S: Stage> ProjectionEngine<S> {
    /// Resolve `graph` and create an engine over it.
    pub fn new(graph: &StageGraph<S>, refresh_entry_stage: S) -> Result<Self, S> {
        let prepared = resolve_graph(graph, Some(&refresh_entry_stage))?;
        Self::from_prepared(Arc::new(prepared), refresh_entry_stage)
    }

    /// Create an engine over an already prepared graph.
    pub fn from_prepared(
        graph: Arc<PreparedStageGraph<S>>,
        refresh_entry_stage: S,
    ) -> Result<Self, S> {
        let refresh_entry = graph
            .id_of(&refresh_entry_stage)
            .ok_or(ProjectionError::RefreshEntryStage(refresh_entry_stage))?;
        let revisions = RevisionTable::new(graph.len());

        Ok(Self {
            graph,
            refresh_entry,
            revisions,
        })
    }

    /// The shared prepared graph.
    pub fn graph(&self) -> &Arc<PreparedStageGraph<S>> {
        &self.graph
    }

    pub fn refresh_entry_stage(&self) -> &S {
        self.graph.stage_at(self.refresh_entry)
    }

    /// Stages in topological order.
    pub fn stage_order(&self) -> impl ExactSizeIterator<Item = &S> + '_ {
        self.graph.stage_order()
    }

    /// Mark `stages` and everything downstream of them as changed.
    pub fn request_stages(&mut self, stages: &[S]) -> Result<(), S> {
        self.request_stages_with(stages, RequestOptions::default())
    }

    /// Like [`request_stages`](Self::request_stages), with options.
    ///
    /// A stage reachable from several requested stages is bumped once.
    /// Nothing is modified if any stage is unknown.
    pub fn request_stages_with(
        &mut self,
        stages: &[S],
        options: RequestOptions,
    ) -> Result<(), S> {
        if stages.is_empty() {
            return Ok(());
        }

        let ids = self.resolve_ids(stages)?;
        self.request_ids(&ids, options);
        Ok(())
    }

    /// Schedule the refresh entry stage and everything downstream of it
    /// without bumping any revision.
    pub fn request_refresh_pass(&mut self) {
        let entry = self.refresh_entry;
        self.request_ids(&[entry], RequestOptions::untracked());
    }

    /// Whether the next recompute has anything to do.
    pub fn has_dirty_stages(&self) -> bool {
        self.revisions.has_dirty()
    }

    /// Run a recompute pass with no blocked stages.
    pub fn recompute<F>(&mut self, execute: F) -> Result<Option<RecomputeResult<S>>, S>
    where
        F: FnMut(&S, bool) -> bool,
    {
        self.recompute_with(execute, &RecomputeOptions::default())
    }

    /// Run a recompute pass.
    ///
    /// `execute(stage, should_recompute)` is called once per scheduled stage in
    /// topological order and returns whether the stage actually recomputed.
    /// Returns `None` when nothing was scheduled.
    pub fn recompute_with<F>(
        &mut self,
        mut execute: F,
        options: &RecomputeOptions<S>,
    ) -> Result<Option<RecomputeResult<S>>, S>
    where
        F: FnMut(&S, bool) -> bool,
    {
        if !self.revisions.has_dirty() {
            return Ok(None);
        }

        let mut blocked = vec![false; self.graph.len()];
        for id in self.resolve_ids(&options.blocked_stages)? {
            blocked[id.index()] = true;
        }

        let mut carried = vec![false; self.graph.len()];
        let mut recomputed_stages = Vec::new();
        let mut visited = 0usize;

        for &id in self.graph.order_ids() {
            if !self.revisions.is_dirty(id) {
                continue;
            }
            visited += 1;

            let stage = self.graph.stage_at(id);
            let should_recompute = !blocked[id.index()];
            let did_recompute = execute(stage, should_recompute);
            trace!(stage = %stage, should_recompute, did_recompute, "executed stage");

            if should_recompute && did_recompute {
                self.revisions.mark_computed(id);
                recomputed_stages.push(stage.clone());
            }

            if self.revisions.is_stale(id) && !(should_recompute && did_recompute) {
                carried[id.index()] = true;
            }
        }

        self.revisions.replace_dirty(carried);

        debug!(
            visited,
            recomputed = recomputed_stages.len(),
            blocked = options.blocked_stages.len(),
            "recompute pass finished"
        );

        Ok(Some(RecomputeResult {
            had_actual_recompute: !recomputed_stages.is_empty(),
            recomputed_stages,
            blocked_stages: options.blocked_stages.clone(),
        }))
    }

    /// Request `stage`, then run a recompute pass.
    pub fn recompute_from_stage<F>(
        &mut self,
        stage: &S,
        execute: F,
        options: &RecomputeOptions<S>,
    ) -> Result<Option<RecomputeResult<S>>, S>
    where
        F: FnMut(&S, bool) -> bool,
    {
        self.request_stages(std::slice::from_ref(stage))?;
        self.recompute_with(execute, options)
    }

    /// Stages whose requested revision is ahead of their computed revision,
    /// in topological order.
    pub fn stale_stages(&self) -> Vec<S> {
        self.collect_where(|revisions, id| revisions.is_stale(id))
    }

    /// Stages scheduled for the next pass, in topological order.
    pub fn dirty_stages(&self) -> Vec<S> {
        self.collect_where(|revisions, id| revisions.is_dirty(id))
    }

    pub fn is_stale(&self, stage: &S) -> Result<bool, S> {
        let id = self.graph.require(stage)?;
        Ok(self.revisions.is_stale(id))
    }

    pub fn is_dirty(&self, stage: &S) -> Result<bool, S> {
        let id = self.graph.require(stage)?;
        Ok(self.revisions.is_dirty(id))
    }

    /// Current revision counters of `stage`.
    pub fn revisions(&self, stage: &S) -> Result<StageRevisions, S> {
        let id = self.graph.require(stage)?;
        Ok(self.revisions.get(id))
    }

    /// [`expand_stages`](crate::graph::expand_stages) over this engine's graph.
    pub fn expand_stages(&self, stages: &[S]) -> Result<IndexSet<S>, S> {
        expand_prepared(stages, &self.graph)
    }

    fn resolve_ids(&self, stages: &[S]) -> Result<Vec<StageId>, S> {
        stages.iter().map(|stage| self.graph.require(stage)).collect()
    }

    fn request_ids(&mut self, ids: &[StageId], options: RequestOptions) {
        for id in affected_ids(&self.graph, ids) {
            trace!(
                stage = %self.graph.stage_at(id),
                track_requested = options.track_requested,
                "requested stage"
            );
            self.revisions.request(id, options.track_requested);
        }
    }

    fn collect_where<P>(&self, predicate: P) -> Vec<S>
    where
        P: Fn(&RevisionTable, StageId) -> bool,
    {
        self.graph
            .order_ids()
            .iter()
            .filter(|&&id| predicate(&self.revisions, id))
            .map(|&id| self.graph.stage_at(id).clone())
            .collect()
    }
}
