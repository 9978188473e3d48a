//! Stage identifiers.
//!
//! A stage is whatever key the caller uses to name a unit of work in the
//! graph. Internally every declared stage is also assigned a dense
//! [`StageId`], so per-stage state lives in plain vectors rather than maps.

use std::fmt::{Debug, Display};
use std::hash::Hash;

/// Bound for caller-supplied stage keys.
///
/// Blanket-implemented, so `&'static str`, `String` and any enum deriving the
/// usual traits (plus `Display`) can be used directly.
pub trait Stage: Clone + Eq + Hash + Ord + Debug + Display + 'static {}

impl<T> Stage for T where T: Clone + Eq + Hash + Ord + Debug + Display + 'static {}

/// Dense index of a stage inside a resolved graph.
///
/// Assigned in declaration order, so the first declared stage is `StageId(0)`.
/// Only meaningful together with the graph that issued it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StageId(u32);

impl StageId {
    /// `None` if `index` does not fit in a `u32`.
    pub(crate) fn try_from_index(index: usize) -> Option<Self> {
        u32::try_from(index).ok().map(Self)
    }

    /// Callers must have checked the stage count with
    /// [`try_from_index`](Self::try_from_index) first.
    pub(crate) fn from_index(index: usize) -> Self {
        debug_assert!(
            u32::try_from(index).is_ok(),
            "stage index {index} overflows u32"
        );
        Self(index as u32)
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u32 {
        self.0
    }

    /// The ID as a vector index.
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_stage<S: Stage>(_: &S) {}

    #[test]
    fn common_key_types_are_stages() {
        assert_stage(&"filter");
        assert_stage(&String::from("sort"));
        assert_stage(&7u8);
    }

    #[test]
    fn ids_round_trip_through_index() {
        let id = StageId::from_index(3);
        assert_eq!(id.raw(), 3);
        assert_eq!(id.index(), 3);
        assert!(StageId::from_index(1) < id);
    }

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn indices_beyond_u32_are_rejected() {
        let last = u32::MAX as usize;
        assert_eq!(
            StageId::try_from_index(last).map(|id| id.raw()),
            Some(u32::MAX)
        );
        assert_eq!(StageId::try_from_index(last + 1), None);
    }
}
