//! Entity model shared by every layer of the application.
//!
//! Entities carry small integer ids so they map 1:1 onto the wire schema;
//! committed schedules use a `Uuid` because they are minted client-side at
//! persist time. All time instants are UTC and all intervals are half-open
//! `[start, end)`.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub type RegionId = u32;
pub type FieldId = u32;
pub type GroupId = u32;
pub type TeamId = u32;
pub type ReservationTypeId = u32;
pub type TargetId = u32;
pub type ConflictId = u32;
pub type SlotId = u64;
/// Identifier of a committed schedule.
pub type ScheduleId = Uuid;

/// Lower bound for per-field concurrency of a reservation type.
pub const MIN_GAMES_PER_FIELD_TYPE: u8 = 1;
/// Upper bound for per-field concurrency of a reservation type.
pub const MAX_GAMES_PER_FIELD_TYPE: u8 = 8;
/// Maximum length (in characters) of any user-facing entity name.
pub const MAX_NAME_LEN: usize = 64;

/// Errors raised by entity-level validation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
  /// The name is empty after trimming.
  #[error("Name must not be empty")]
  EmptyName,

  /// The name exceeds [`MAX_NAME_LEN`] characters.
  #[error("Name is too long: {len} characters")]
  NameTooLong { len: usize },

  /// A concurrency value lies outside the permitted bounds.
  #[error("Concurrency {0} is outside {MIN_GAMES_PER_FIELD_TYPE}..={MAX_GAMES_PER_FIELD_TYPE}")]
  ConcurrencyOutOfRange(u8),
}

/// Trim and validate a user-supplied name, returning the stored form.
pub fn validate_name(raw: &str) -> Result<String, ValidationError> {
  let trimmed = raw.trim();
  if trimmed.is_empty() {
    return Err(ValidationError::EmptyName);
  }
  let len = trimmed.chars().count();
  if len > MAX_NAME_LEN {
    return Err(ValidationError::NameTooLong { len });
  }
  Ok(trimmed.to_string())
}

/// Validate a concurrency value against the global bounds.
pub fn validate_concurrency(value: u8) -> Result<u8, ValidationError> {
  if !(MIN_GAMES_PER_FIELD_TYPE..=MAX_GAMES_PER_FIELD_TYPE).contains(&value) {
    return Err(ValidationError::ConcurrencyOutOfRange(value));
  }
  Ok(value)
}

/// A geographic region owning fields and teams.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
  pub id: RegionId,
  pub title: String,
}

/// A playing field inside a region.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
  pub id: FieldId,
  pub name: String,
  pub region_id: RegionId,
}

/// A label teams can be tagged with (age bracket, division, ...).
///
/// Names are normalized to lowercase on input and are unique
/// case-insensitively. `usage` counts how many teams carry the tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamGroup {
  pub id: GroupId,
  pub name: String,
  pub usage: u32,
}

/// A team, owned by a region and tagged with zero or more groups.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Team {
  pub id: TeamId,
  pub name: String,
  pub region_id: RegionId,
  pub group_ids: BTreeSet<GroupId>,
}

/// A classification of field usage carrying a default per-field
/// concurrency and a practice-vs-match flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationType {
  pub id: ReservationTypeId,
  pub name: String,
  pub color: String,
  pub default_concurrency: u8,
  pub is_practice: bool,
  pub description: Option<String>,
}

/// A per-field concurrency override for one reservation type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConcurrencyOverride {
  pub field_id: FieldId,
  pub reservation_type_id: ReservationTypeId,
  pub concurrency: u8,
}

/// A bookable interval on a field, classified by reservation type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSlot {
  pub id: SlotId,
  pub field_id: FieldId,
  pub reservation_type_id: ReservationTypeId,
  pub start: DateTime<Utc>,
  pub end: DateTime<Utc>,
}

/// A subset of teams defined by a required group set plus an optional
/// reservation-type filter. The engine generates one schedule per target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
  pub id: TargetId,
  pub group_ids: BTreeSet<GroupId>,
  pub reservation_type_id: Option<ReservationTypeId>,
}

/// Teams within one region that share a coach and therefore must not
/// occupy overlapping lanes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoachConflict {
  pub id: ConflictId,
  pub region_id: RegionId,
  pub coach_name: Option<String>,
  pub team_ids: BTreeSet<TeamId>,
}

/// What a reservation books: a match between two teams, or a single-team
/// practice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Booking {
  Match { home: TeamId, away: TeamId },
  Practice { team: TeamId },
}

impl Booking {
  /// Teams occupied by this booking (one or two).
  pub fn teams(&self) -> impl Iterator<Item = TeamId> {
    let (a, b) = match *self {
      Booking::Match { home, away } => (home, Some(away)),
      Booking::Practice { team } => (team, None),
    };
    std::iter::once(a).chain(b)
  }
}

/// A scheduled interval on a field together with its booking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
  pub field_id: FieldId,
  pub start: DateTime<Utc>,
  pub end: DateTime<Utc>,
  pub booking: Booking,
}

/// A committed schedule: the atomic result of one successful scheduling
/// run, editable afterwards only through swap/move/delete of individual
/// reservations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
  pub id: ScheduleId,
  pub name: String,
  pub created: DateTime<Utc>,
  pub last_edited: DateTime<Utc>,
  pub reservations: Vec<Reservation>,
}

/// Resolved per-field concurrency lookup: override if present, else the
/// reservation type's default.
#[derive(Debug, Clone, Default)]
pub struct ConcurrencyTable {
  defaults: HashMap<ReservationTypeId, u8>,
  overrides: HashMap<(FieldId, ReservationTypeId), u8>,
}

impl ConcurrencyTable {
  pub fn new(types: &[ReservationType], overrides: &[ConcurrencyOverride]) -> Self {
    let defaults = types
      .iter()
      .map(|t| (t.id, t.default_concurrency))
      .collect();
    let overrides = overrides
      .iter()
      .map(|o| ((o.field_id, o.reservation_type_id), o.concurrency))
      .collect();
    Self {
      defaults,
      overrides,
    }
  }

  /// Lane capacity of `field` for slots of `rtype`. Unknown types fall
  /// back to the minimum so a stale reference never inflates supply.
  pub fn capacity(&self, field: FieldId, rtype: ReservationTypeId) -> u8 {
    self
      .overrides
      .get(&(field, rtype))
      .or_else(|| self.defaults.get(&rtype))
      .copied()
      .unwrap_or(MIN_GAMES_PER_FIELD_TYPE)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn validate_name_trims_and_bounds() {
    assert_eq!(validate_name("  Lions  ").unwrap(), "Lions");
    assert_eq!(validate_name("   "), Err(ValidationError::EmptyName));
    assert_eq!(validate_name(""), Err(ValidationError::EmptyName));

    let long = "x".repeat(MAX_NAME_LEN);
    assert_eq!(validate_name(&long).unwrap(), long);
    let too_long = "x".repeat(MAX_NAME_LEN + 1);
    assert_eq!(
      validate_name(&too_long),
      Err(ValidationError::NameTooLong {
        len: MAX_NAME_LEN + 1
      })
    );
  }

  #[test]
  fn validate_concurrency_bounds() {
    assert!(validate_concurrency(0).is_err());
    assert_eq!(validate_concurrency(1).unwrap(), 1);
    assert_eq!(validate_concurrency(8).unwrap(), 8);
    assert!(validate_concurrency(9).is_err());
  }

  #[test]
  fn capacity_prefers_override_then_default() {
    let types = vec![ReservationType {
      id: 7,
      name: "U12".into(),
      color: "#00aa55".into(),
      default_concurrency: 2,
      is_practice: false,
      description: None,
    }];
    let overrides = vec![ConcurrencyOverride {
      field_id: 3,
      reservation_type_id: 7,
      concurrency: 4,
    }];
    let table = ConcurrencyTable::new(&types, &overrides);

    assert_eq!(table.capacity(3, 7), 4);
    assert_eq!(table.capacity(9, 7), 2);
    // unknown reservation type falls back to the minimum
    assert_eq!(table.capacity(3, 99), MIN_GAMES_PER_FIELD_TYPE);
  }

  #[test]
  fn booking_teams_iteration() {
    let m = Booking::Match { home: 1, away: 2 };
    assert_eq!(m.teams().collect::<Vec<_>>(), vec![1, 2]);
    let p = Booking::Practice { team: 5 };
    assert_eq!(p.teams().collect::<Vec<_>>(), vec![5]);
  }
}
