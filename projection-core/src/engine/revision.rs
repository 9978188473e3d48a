//! Revision Tracking
//!
//! Per-stage bookkeeping for the engine. Each stage carries a pair of
//! revision counters and a dirty flag, stored in vectors indexed by
//! [`StageId`] so every declared stage has exactly one entry.
//!
//! # States
//!
//! A stage is **stale** when its requested revision is ahead of its computed
//! revision. That is the ground truth for "needs work".
//!
//! A stage is **dirty** when it is scheduled for the next recompute pass.
//! Dirty is normally the same as stale; a refresh pass can also schedule
//! clean stages without bumping their revisions.

use serde::Serialize;

use crate::stage::StageId;

/// Revision counters of one stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StageRevisions {
    /// Bumped once per request that reaches the stage.
    pub requested: u64,

    /// The requested revision as of the last successful recompute.
    pub computed: u64,
}

impl StageRevisions {
    /// Whether a request has not been satisfied yet.
    pub fn is_stale(&self) -> bool {
        self.requested > self.computed
    }
}

#[derive(Debug, Clone)]
pub(crate) struct RevisionTable {
    revisions: Vec<StageRevisions>,
    dirty: Vec<bool>,
    dirty_count: usize,
}

impl RevisionTable {
    pub(crate) fn new(stage_count: usize) -> Self {
        Self {
            revisions: vec![StageRevisions::default(); stage_count],
            dirty: vec![false; stage_count],
            dirty_count: 0,
        }
    }

    pub(crate) fn get(&self, id: StageId) -> StageRevisions {
        self.revisions[id.index()]
    }

    pub(crate) fn is_stale(&self, id: StageId) -> bool {
        self.revisions[id.index()].is_stale()
    }

    pub(crate) fn is_dirty(&self, id: StageId) -> bool {
        self.dirty[id.index()]
    }

    pub(crate) fn has_dirty(&self) -> bool {
        self.dirty_count > 0
    }

    /// Schedule a stage, optionally recording a new requested revision.
    pub(crate) fn request(&mut self, id: StageId, track_requested: bool) {
        if track_requested {
            self.revisions[id.index()].requested += 1;
        }
        self.mark_dirty(id);
    }

    /// Record that the stage caught up with its latest request.
    pub(crate) fn mark_computed(&mut self, id: StageId) {
        let revisions = &mut self.revisions[id.index()];
        revisions.computed = revisions.requested;
    }

    /// Replace the dirty set with `carried`.
    pub(crate) fn replace_dirty(&mut self, carried: Vec<bool>) {
        debug_assert_eq!(carried.len(), self.dirty.len());
        self.dirty_count = carried.iter().filter(|&&dirty| dirty).count();
        self.dirty = carried;
    }

    fn mark_dirty(&mut self, id: StageId) {
        let slot = &mut self.dirty[id.index()];
        if !*slot {
            *slot = true;
            self.dirty_count += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_makes_stage_stale_and_dirty() {
        let mut table = RevisionTable::new(2);
        let id = StageId::from_index(1);

        table.request(id, true);

        assert!(table.is_stale(id));
        assert!(table.is_dirty(id));
        assert!(table.has_dirty());
        assert_eq!(
            table.get(id),
            StageRevisions {
                requested: 1,
                computed: 0
            }
        );
    }

    #[test]
    fn untracked_request_only_schedules() {
        let mut table = RevisionTable::new(1);
        let id = StageId::from_index(0);

        table.request(id, false);
        table.request(id, false);

        assert!(!table.is_stale(id));
        assert!(table.is_dirty(id));
    }

    #[test]
    fn mark_computed_catches_up() {
        let mut table = RevisionTable::new(1);
        let id = StageId::from_index(0);

        table.request(id, true);
        table.request(id, true);
        table.mark_computed(id);

        assert_eq!(table.get(id).computed, 2);
        assert!(!table.is_stale(id));
    }

    #[test]
    fn replace_dirty_recounts() {
        let mut table = RevisionTable::new(3);
        table.request(StageId::from_index(0), true);
        table.request(StageId::from_index(2), true);

        table.replace_dirty(vec![false, false, true]);
        assert!(table.has_dirty());
        assert!(!table.is_dirty(StageId::from_index(0)));

        table.replace_dirty(vec![false; 3]);
        assert!(!table.has_dirty());
    }
}
