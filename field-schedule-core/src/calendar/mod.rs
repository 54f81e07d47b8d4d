//! Time-slot calendar algebra.
//!
//! A [`FieldCalendar`] owns the slot set of a single field and enforces the
//! non-overlap invariant through every mutation: insert, move/resize,
//! transactional batch copy, batch delete. Instants are half-open
//! `[start, end)`; zero-duration intervals are rejected; id ranges for
//! batch operations are inclusive on both ends and select by presence.

pub mod index;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{FieldId, ReservationTypeId, SlotId, TimeSlot};
use index::{SlotIndex, SlotSpan};

/// True iff the half-open intervals `[a_start, a_end)` and
/// `[b_start, b_end)` share any instant.
pub fn overlaps(
  a_start: DateTime<Utc>,
  a_end: DateTime<Utc>,
  b_start: DateTime<Utc>,
  b_end: DateTime<Utc>,
) -> bool {
  a_start < b_end && b_start < a_end
}

/// Errors raised by calendar mutations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CalendarError {
  /// The interval overlaps an existing slot on the same field.
  #[error("Time range overlaps an existing slot")]
  Overlap,

  /// The interval has zero duration.
  #[error("Time range has zero duration")]
  ZeroDuration,

  /// The interval ends before it starts.
  #[error("End time is before start time")]
  EndBeforeStart,

  /// The referenced slot id is not present on this field.
  #[error("Slot not found")]
  SlotNotFound,

  /// A slot with this id already exists on this field.
  #[error("Duplicate slot id")]
  DuplicateSlotId,
}

fn check_range(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<(), CalendarError> {
  if end < start {
    return Err(CalendarError::EndBeforeStart);
  }
  if end == start {
    return Err(CalendarError::ZeroDuration);
  }
  Ok(())
}

/// The slot set of one field, with an interval index enforcing
/// non-overlap.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldCalendar {
  field_id: FieldId,
  slots: BTreeMap<SlotId, TimeSlot>,
  index: SlotIndex,
}

impl FieldCalendar {
  pub fn new(field_id: FieldId) -> Self {
    Self {
      field_id,
      slots: BTreeMap::new(),
      index: SlotIndex::new(),
    }
  }

  /// Rebuild a calendar from persisted slots, validating each as it is
  /// inserted. Slots for other fields are rejected as not found.
  pub fn from_slots(
    field_id: FieldId,
    slots: impl IntoIterator<Item = TimeSlot>,
  ) -> Result<Self, CalendarError> {
    let mut calendar = Self::new(field_id);
    for slot in slots {
      if slot.field_id != field_id {
        return Err(CalendarError::SlotNotFound);
      }
      calendar.insert(slot.id, slot.start, slot.end, slot.reservation_type_id)?;
    }
    Ok(calendar)
  }

  pub fn field_id(&self) -> FieldId {
    self.field_id
  }

  pub fn len(&self) -> usize {
    self.slots.len()
  }

  pub fn is_empty(&self) -> bool {
    self.slots.is_empty()
  }

  pub fn get(&self, id: SlotId) -> Option<&TimeSlot> {
    self.slots.get(&id)
  }

  /// Slots in ascending id order.
  pub fn slots(&self) -> impl Iterator<Item = &TimeSlot> {
    self.slots.values()
  }

  /// Slots overlapping the window `[start, end)`.
  pub fn slots_in(
    &self,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
  ) -> impl Iterator<Item = &TimeSlot> {
    self
      .index
      .find(start, end)
      .filter_map(|span| self.slots.get(&span.slot))
  }

  /// Insert a new slot. Fails with `Overlap` against any existing slot on
  /// this field, leaving the calendar unchanged.
  pub fn insert(
    &mut self,
    id: SlotId,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    reservation_type_id: ReservationTypeId,
  ) -> Result<(), CalendarError> {
    check_range(start, end)?;
    if self.slots.contains_key(&id) {
      return Err(CalendarError::DuplicateSlotId);
    }
    if self.index.has_overlap(start, end) {
      return Err(CalendarError::Overlap);
    }
    self.index.insert(SlotSpan {
      start,
      stop: end,
      slot: id,
    });
    self.slots.insert(
      id,
      TimeSlot {
        id,
        field_id: self.field_id,
        reservation_type_id,
        start,
        end,
      },
    );
    Ok(())
  }

  /// Move or resize a slot. The new interval is checked against every
  /// *other* slot on the field; on failure the slot keeps its original
  /// interval.
  pub fn move_slot(
    &mut self,
    id: SlotId,
    new_start: DateTime<Utc>,
    new_end: DateTime<Utc>,
  ) -> Result<(), CalendarError> {
    check_range(new_start, new_end)?;
    let slot = self.slots.get(&id).ok_or(CalendarError::SlotNotFound)?;
    if self.index.has_overlap_excluding(new_start, new_end, id) {
      return Err(CalendarError::Overlap);
    }
    let old = SlotSpan {
      start: slot.start,
      stop: slot.end,
      slot: id,
    };
    self.index.remove(&old);
    self.index.insert(SlotSpan {
      start: new_start,
      stop: new_end,
      slot: id,
    });
    let slot = self.slots.get_mut(&id).ok_or(CalendarError::SlotNotFound)?;
    slot.start = new_start;
    slot.end = new_end;
    Ok(())
  }

  /// Delete a slot, returning it.
  pub fn delete(&mut self, id: SlotId) -> Result<TimeSlot, CalendarError> {
    let slot = self.slots.remove(&id).ok_or(CalendarError::SlotNotFound)?;
    self.index.remove(&SlotSpan {
      start: slot.start,
      stop: slot.end,
      slot: id,
    });
    Ok(slot)
  }

  /// Copy every slot whose id lies in `first_id..=last_id` (selected by
  /// presence; ids need not be contiguous), shifted so the lowest-id slot
  /// of the selection lands on `dst_start`. Reservation types are
  /// preserved. Either all copies are inserted or, on the first conflict,
  /// none are (`Overlap`). New ids come from `alloc`.
  ///
  /// Returns the ids of the inserted copies, in source-id order. An empty
  /// selection inserts nothing.
  pub fn batch_copy(
    &mut self,
    first_id: SlotId,
    last_id: SlotId,
    dst_start: DateTime<Utc>,
    alloc: &mut dyn FnMut() -> SlotId,
  ) -> Result<Vec<SlotId>, CalendarError> {
    let selection: Vec<TimeSlot> = self
      .slots
      .range(first_id..=last_id)
      .map(|(_, slot)| slot.clone())
      .collect();
    let Some(anchor) = selection.first() else {
      return Ok(Vec::new());
    };
    let delta = dst_start - anchor.start;

    // Validate every shifted copy before touching the calendar. Copies
    // cannot overlap each other (sources do not and the shift is rigid),
    // so checking against the current index is sufficient.
    for slot in &selection {
      let start = slot.start + delta;
      let end = slot.end + delta;
      check_range(start, end)?;
      if self.index.has_overlap(start, end) {
        return Err(CalendarError::Overlap);
      }
    }

    let mut inserted = Vec::with_capacity(selection.len());
    for slot in &selection {
      let id = alloc();
      self.insert(id, slot.start + delta, slot.end + delta, slot.reservation_type_id)?;
      inserted.push(id);
    }
    Ok(inserted)
  }

  /// Delete every slot whose id lies in `first_id..=last_id`, returning
  /// the removed slots in id order.
  pub fn batch_delete(&mut self, first_id: SlotId, last_id: SlotId) -> Vec<TimeSlot> {
    let ids: Vec<SlotId> = self.slots.range(first_id..=last_id).map(|(id, _)| *id).collect();
    let mut removed = Vec::with_capacity(ids.len());
    for id in ids {
      if let Ok(slot) = self.delete(id) {
        removed.push(slot);
      }
    }
    removed
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::{Duration, TimeZone};

  fn t(hour: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 4, 6, 9, 0, 0).unwrap() + Duration::hours(hour)
  }

  fn calendar_with(slots: &[(SlotId, i64, i64)]) -> FieldCalendar {
    let mut cal = FieldCalendar::new(1);
    for &(id, start, end) in slots {
      cal.insert(id, t(start), t(end), 10).unwrap();
    }
    cal
  }

  #[test]
  fn insert_rejects_bad_ranges_and_overlaps() {
    let mut cal = FieldCalendar::new(1);
    assert_eq!(
      cal.insert(1, t(2), t(1), 10),
      Err(CalendarError::EndBeforeStart)
    );
    assert_eq!(cal.insert(1, t(1), t(1), 10), Err(CalendarError::ZeroDuration));

    cal.insert(1, t(0), t(2), 10).unwrap();
    assert_eq!(cal.insert(2, t(1), t(3), 10), Err(CalendarError::Overlap));
    assert_eq!(cal.insert(1, t(4), t(5), 10), Err(CalendarError::DuplicateSlotId));
    // adjacent is fine: intervals are half-open
    cal.insert(3, t(2), t(4), 10).unwrap();
    assert_eq!(cal.len(), 2);
  }

  #[test]
  fn move_checks_only_other_slots() {
    let mut cal = calendar_with(&[(1, 0, 2), (2, 4, 6)]);

    // shifting within its own original span is allowed
    cal.move_slot(1, t(1), t(3)).unwrap();
    assert_eq!(cal.get(1).unwrap().start, t(1));

    // colliding with the other slot is not
    assert_eq!(cal.move_slot(1, t(5), t(7)), Err(CalendarError::Overlap));
    assert_eq!(cal.get(1).unwrap().start, t(1));

    assert_eq!(cal.move_slot(9, t(0), t(1)), Err(CalendarError::SlotNotFound));
  }

  #[test]
  fn move_round_trip_restores_state() {
    let mut cal = calendar_with(&[(1, 0, 2), (2, 4, 6)]);
    let before = cal.clone();

    cal.move_slot(1, t(2), t(4)).unwrap();
    cal.move_slot(1, t(0), t(2)).unwrap();

    assert_eq!(
      cal.slots().collect::<Vec<_>>(),
      before.slots().collect::<Vec<_>>()
    );
  }

  #[test]
  fn batch_copy_shifts_by_anchor_offset() {
    let mut cal = calendar_with(&[(1, 0, 1), (2, 1, 2), (4, 3, 4)]);
    let mut next = 100u64;
    let mut alloc = || {
      next += 1;
      next
    };

    // range [1..=4] selects ids 1, 2 and 4 (3 is absent)
    let new_ids = cal.batch_copy(1, 4, t(24), &mut alloc).unwrap();
    assert_eq!(new_ids.len(), 3);
    assert_eq!(cal.len(), 6);
    assert_eq!(cal.get(new_ids[0]).unwrap().start, t(24));
    assert_eq!(cal.get(new_ids[1]).unwrap().start, t(25));
    assert_eq!(cal.get(new_ids[2]).unwrap().start, t(27));
    // reservation type preserved
    assert_eq!(cal.get(new_ids[2]).unwrap().reservation_type_id, 10);
  }

  #[test]
  fn batch_copy_is_transactional_on_overlap() {
    let mut cal = calendar_with(&[(1, 0, 1), (2, 2, 3), (3, 42, 43)]);
    let before = cal.clone();
    let mut next = 100u64;
    let mut alloc = || {
      next += 1;
      next
    };

    // shifting slots 1 and 2 by +40h makes the second copy land on slot 3
    let res = cal.batch_copy(1, 2, t(40), &mut alloc);
    assert_eq!(res, Err(CalendarError::Overlap));
    assert_eq!(
      cal.slots().collect::<Vec<_>>(),
      before.slots().collect::<Vec<_>>()
    );
  }

  #[test]
  fn batch_copy_then_batch_delete_round_trips() {
    let mut cal = calendar_with(&[(1, 0, 1), (2, 2, 3)]);
    let before = cal.clone();
    let mut next = 100u64;
    let mut alloc = || {
      next += 1;
      next
    };

    let new_ids = cal.batch_copy(1, 2, t(24 * 7), &mut alloc).unwrap();
    assert_eq!(cal.len(), 4);
    let removed = cal.batch_delete(new_ids[0], new_ids[new_ids.len() - 1]);
    assert_eq!(removed.len(), new_ids.len());
    assert_eq!(
      cal.slots().collect::<Vec<_>>(),
      before.slots().collect::<Vec<_>>()
    );
  }

  #[test]
  fn batch_copy_empty_selection_is_noop() {
    let mut cal = calendar_with(&[(10, 0, 1)]);
    let mut alloc = || 999;
    assert_eq!(cal.batch_copy(1, 5, t(10), &mut alloc).unwrap(), Vec::<SlotId>::new());
    assert_eq!(cal.len(), 1);
  }

  #[test]
  fn window_query_returns_overlapping_slots() {
    let cal = calendar_with(&[(1, 0, 2), (2, 2, 4), (3, 4, 6)]);
    let ids: Vec<SlotId> = cal.slots_in(t(1), t(5)).map(|s| s.id).collect();
    assert_eq!(ids, vec![1, 2, 3]);
    let ids: Vec<SlotId> = cal.slots_in(t(2), t(4)).map(|s| s.id).collect();
    assert_eq!(ids, vec![2]);
  }
}
