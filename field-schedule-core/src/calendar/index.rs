//! Interval indexing for per-field slot sets.
//!
//! Half-open intervals `[start, stop)` throughout. The index keeps spans in
//! a `BTreeSet` ordered by `(start, stop, slot)` and answers overlap
//! queries by scanning the prefix of spans starting before the query stop;
//! per-field slot sets are small enough that this beats maintaining an
//! augmented tree.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::SlotId;

/// A time span associated with a slot id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SlotSpan {
  pub start: DateTime<Utc>,
  pub stop: DateTime<Utc>,
  pub slot: SlotId,
}

impl SlotSpan {
  /// True iff this span overlaps the half-open range `[start, stop)`.
  pub fn overlap(&self, start: DateTime<Utc>, stop: DateTime<Utc>) -> bool {
    self.start < stop && self.stop > start
  }
}

/// Sorted span set with overlap queries.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SlotIndex {
  spans: BTreeSet<SlotSpan>,
}

impl SlotIndex {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn insert(&mut self, span: SlotSpan) {
    self.spans.insert(span);
  }

  pub fn remove(&mut self, span: &SlotSpan) -> bool {
    self.spans.remove(span)
  }

  pub fn len(&self) -> usize {
    self.spans.len()
  }

  pub fn is_empty(&self) -> bool {
    self.spans.is_empty()
  }

  /// Iterate spans overlapping `[start, stop)` in `(start, stop, slot)`
  /// order. Spans starting at or after `stop` are pruned by the ordered
  /// range; the remaining prefix is filtered by the overlap predicate.
  pub fn find(
    &self,
    start: DateTime<Utc>,
    stop: DateTime<Utc>,
  ) -> impl Iterator<Item = &SlotSpan> {
    let cut = SlotSpan {
      start: stop,
      stop: DateTime::<Utc>::MIN_UTC,
      slot: 0,
    };
    self
      .spans
      .range(..cut)
      .filter(move |span| span.overlap(start, stop))
  }

  /// True iff any span overlaps `[start, stop)`. Degenerate queries
  /// (`start >= stop`) overlap nothing.
  pub fn has_overlap(&self, start: DateTime<Utc>, stop: DateTime<Utc>) -> bool {
    if start >= stop {
      return false;
    }
    self.find(start, stop).next().is_some()
  }

  /// Like [`SlotIndex::has_overlap`] but ignoring spans of `slot`, used
  /// when validating a move of that slot.
  pub fn has_overlap_excluding(
    &self,
    start: DateTime<Utc>,
    stop: DateTime<Utc>,
    slot: SlotId,
  ) -> bool {
    if start >= stop {
      return false;
    }
    self.find(start, stop).any(|span| span.slot != slot)
  }
}
