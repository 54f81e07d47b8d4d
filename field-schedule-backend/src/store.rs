//! The entity store: a sled-backed facade over every persisted entity.
//!
//! Each profile owns an isolated set of trees (`{profile}:{kind}`); the
//! profile registry lives in a root tree so the active profile and the
//! profile list survive restart. Records are bincode-encoded; keys are
//! big-endian ids so iteration yields id order. Every mutation flushes, as
//! schedule data is small and durability beats write throughput here.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use sled::Db;
use thiserror::Error;

use field_schedule_core::calendar::{CalendarError, FieldCalendar, overlaps};
use field_schedule_core::model::{
  CoachConflict, ConcurrencyOverride, ConcurrencyTable, ConflictId, Field, FieldId, GroupId,
  Region, RegionId, ReservationType, ReservationTypeId, Schedule, ScheduleId, SlotId, Target,
  TargetId, Team, TeamGroup, TeamId, TimeSlot, ValidationError, validate_concurrency,
  validate_name,
};

use crate::profile::{DEFAULT_PROFILE, ProfileError, validate_profile_name};

#[derive(Debug, Error)]
pub enum StoreError {
  #[error("Storage error: {0}")]
  Sled(#[from] sled::Error),

  #[error("Encoding error: {0}")]
  Encode(#[from] bincode::error::EncodeError),

  #[error("Decoding error: {0}")]
  Decode(#[from] bincode::error::DecodeError),

  #[error(transparent)]
  Validation(#[from] ValidationError),

  #[error(transparent)]
  Calendar(#[from] CalendarError),

  #[error(transparent)]
  Profile(#[from] ProfileError),

  #[error("Region {0} not found")]
  RegionNotFound(RegionId),

  #[error("Region {0} still owns fields or teams")]
  RegionNotEmpty(RegionId),

  #[error("Field {0} not found")]
  FieldNotFound(FieldId),

  #[error("Group {0} not found")]
  GroupNotFound(GroupId),

  #[error("Group name {0:?} already exists")]
  DuplicateGroupName(String),

  #[error("Group {0} is still used by teams")]
  GroupInUse(GroupId),

  #[error("Team {0} not found")]
  TeamNotFound(TeamId),

  #[error("Reservation type {0} not found")]
  ReservationTypeNotFound(ReservationTypeId),

  #[error("Reservation type {0} is still referenced")]
  ReservationTypeInUse(ReservationTypeId),

  #[error("Time slot {0} not found")]
  SlotNotFound(SlotId),

  #[error("Target {0} not found")]
  TargetNotFound(TargetId),

  #[error("Coach conflict {0} not found")]
  ConflictNotFound(ConflictId),

  #[error("A coach conflict needs at least two teams")]
  ConflictTooSmall,

  #[error("Coach conflict teams must belong to the conflict's region")]
  ConflictTeamOutsideRegion,

  #[error("Schedule {0} not found")]
  ScheduleNotFound(ScheduleId),

  #[error("Reservation index {0} is out of bounds")]
  ReservationOutOfBounds(usize),

  #[error("No time slot backs the requested interval")]
  NoBackingSlot,

  #[error("The backing slot is already at capacity")]
  SlotAtCapacity,
}

/// The read surface the scheduling layers depend on, plus the one
/// mutation they perform (committing a finished schedule). Editor-side
/// mutations are inherent to [`SledStore`].
pub trait EntityStore {
  fn regions(&self) -> Result<Vec<Region>, StoreError>;
  fn teams_of_region(&self, region: RegionId) -> Result<Vec<Team>, StoreError>;
  fn fields_of_region(&self, region: RegionId) -> Result<Vec<Field>, StoreError>;
  /// Slots of a field, optionally bounded by a half-open window.
  fn slots_of_field(
    &self,
    field: FieldId,
    window: Option<(DateTime<Utc>, DateTime<Utc>)>,
  ) -> Result<Vec<TimeSlot>, StoreError>;
  fn reservation_type(
    &self,
    id: ReservationTypeId,
  ) -> Result<Option<ReservationType>, StoreError>;
  fn reservation_types(&self) -> Result<Vec<ReservationType>, StoreError>;
  fn overrides_of_field(&self, field: FieldId) -> Result<Vec<ConcurrencyOverride>, StoreError>;
  fn groups(&self) -> Result<Vec<TeamGroup>, StoreError>;
  fn targets(&self) -> Result<Vec<Target>, StoreError>;
  fn coach_conflicts_of_region(&self, region: RegionId)
  -> Result<Vec<CoachConflict>, StoreError>;
  fn insert_schedule(&self, schedule: &Schedule) -> Result<(), StoreError>;
}

const T_REGIONS: &str = "regions";
const T_FIELDS: &str = "fields";
const T_GROUPS: &str = "groups";
const T_TEAMS: &str = "teams";
const T_RTYPES: &str = "rtypes";
const T_OVERRIDES: &str = "overrides";
const T_SLOTS: &str = "slots";
const T_TARGETS: &str = "targets";
const T_CONFLICTS: &str = "conflicts";
const T_SCHEDULES: &str = "schedules";
const T_META: &str = "meta";

const PROFILE_TREES: &[&str] = &[
  T_REGIONS, T_FIELDS, T_GROUPS, T_TEAMS, T_RTYPES, T_OVERRIDES, T_SLOTS, T_TARGETS,
  T_CONFLICTS, T_SCHEDULES, T_META,
];

const REGISTRY_TREE: &str = "profiles";
const REGISTRY_LIST: &str = "list";
const REGISTRY_ACTIVE: &str = "active";

fn enc<T: Serialize>(value: &T) -> Result<Vec<u8>, StoreError> {
  Ok(bincode::serde::encode_to_vec(value, bincode::config::standard())?)
}

fn dec<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StoreError> {
  let (value, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())?;
  Ok(value)
}

fn override_key(field: FieldId, rtype: ReservationTypeId) -> [u8; 8] {
  let mut key = [0u8; 8];
  key[..4].copy_from_slice(&field.to_be_bytes());
  key[4..].copy_from_slice(&rtype.to_be_bytes());
  key
}

pub struct SledStore {
  db: Db,
  profile: String,
}

impl SledStore {
  /// Open a store at `path`, or a temporary in-memory one when `None`.
  /// The profile registry is created on first open.
  pub fn open(path: Option<std::path::PathBuf>) -> Result<Self, StoreError> {
    let db = if let Some(p) = path {
      if let Some(parent) = p.parent() {
        std::fs::create_dir_all(parent).map_err(sled::Error::Io)?;
      }
      sled::Config::default().path(p).open()?
    } else {
      sled::Config::default().temporary(true).open()?
    };

    let registry = db.open_tree(REGISTRY_TREE)?;
    if registry.get(REGISTRY_LIST)?.is_none() {
      registry.insert(REGISTRY_LIST, enc(&vec![DEFAULT_PROFILE.to_string()])?)?;
      registry.insert(REGISTRY_ACTIVE, enc(&DEFAULT_PROFILE.to_string())?)?;
    }
    let active: String = match registry.get(REGISTRY_ACTIVE)? {
      Some(bytes) => dec(&bytes)?,
      None => DEFAULT_PROFILE.to_string(),
    };

    Ok(Self { db, profile: active })
  }

  // ── profiles ──────────────────────────────────────────────────────

  pub fn active_profile(&self) -> &str {
    &self.profile
  }

  pub fn profiles(&self) -> Result<Vec<String>, StoreError> {
    let registry = self.db.open_tree(REGISTRY_TREE)?;
    match registry.get(REGISTRY_LIST)? {
      Some(bytes) => dec(&bytes),
      None => Ok(vec![DEFAULT_PROFILE.to_string()]),
    }
  }

  fn save_profiles(&self, list: &[String]) -> Result<(), StoreError> {
    let registry = self.db.open_tree(REGISTRY_TREE)?;
    registry.insert(REGISTRY_LIST, enc(&list.to_vec())?)?;
    self.db.flush()?;
    Ok(())
  }

  pub fn create_profile(&self, name: &str) -> Result<(), StoreError> {
    validate_profile_name(name)?;
    let mut list = self.profiles()?;
    if list.iter().any(|p| p == name) {
      return Err(ProfileError::DuplicateProfile(name.to_string()).into());
    }
    list.push(name.to_string());
    self.save_profiles(&list)
  }

  pub fn rename_profile(&mut self, old: &str, new: &str) -> Result<(), StoreError> {
    if old == DEFAULT_PROFILE {
      return Err(ProfileError::ProtectedProfile(old.to_string()).into());
    }
    validate_profile_name(new)?;
    let mut list = self.profiles()?;
    if !list.iter().any(|p| p == old) {
      return Err(ProfileError::UnknownProfile(old.to_string()).into());
    }
    if list.iter().any(|p| p == new) {
      return Err(ProfileError::DuplicateProfile(new.to_string()).into());
    }

    // move every tree under the new namespace
    for kind in PROFILE_TREES {
      let src = self.db.open_tree(format!("{old}:{kind}"))?;
      let dst = self.db.open_tree(format!("{new}:{kind}"))?;
      for item in src.iter() {
        let (k, v) = item?;
        dst.insert(k, v)?;
      }
      self.db.drop_tree(format!("{old}:{kind}"))?;
    }

    for p in &mut list {
      if p == old {
        *p = new.to_string();
      }
    }
    self.save_profiles(&list)?;
    if self.profile == old {
      self.profile = new.to_string();
      let registry = self.db.open_tree(REGISTRY_TREE)?;
      registry.insert(REGISTRY_ACTIVE, enc(&self.profile)?)?;
      self.db.flush()?;
    }
    Ok(())
  }

  pub fn delete_profile(&self, name: &str) -> Result<(), StoreError> {
    if name == DEFAULT_PROFILE || name == self.profile {
      return Err(ProfileError::ProtectedProfile(name.to_string()).into());
    }
    let mut list = self.profiles()?;
    if !list.iter().any(|p| p == name) {
      return Err(ProfileError::UnknownProfile(name.to_string()).into());
    }
    for kind in PROFILE_TREES {
      self.db.drop_tree(format!("{name}:{kind}"))?;
    }
    list.retain(|p| p != name);
    self.save_profiles(&list)
  }

  /// Switch the active profile; the whole logical store swaps with it.
  pub fn set_active_profile(&mut self, name: &str) -> Result<(), StoreError> {
    let list = self.profiles()?;
    if !list.iter().any(|p| p == name) {
      return Err(ProfileError::UnknownProfile(name.to_string()).into());
    }
    self.profile = name.to_string();
    let registry = self.db.open_tree(REGISTRY_TREE)?;
    registry.insert(REGISTRY_ACTIVE, enc(&self.profile)?)?;
    self.db.flush()?;
    Ok(())
  }

  /// Dev-only destructive reset: wipe every tree of the active profile.
  /// Callers gate this behind `HAS_DB_RESET_BUTTON`.
  pub fn reset_profile(&self) -> Result<(), StoreError> {
    for kind in PROFILE_TREES {
      self.db.drop_tree(format!("{}:{kind}", self.profile))?;
    }
    self.db.flush()?;
    Ok(())
  }

  // ── low-level helpers ─────────────────────────────────────────────

  fn tree(&self, kind: &str) -> Result<sled::Tree, StoreError> {
    Ok(self.db.open_tree(format!("{}:{kind}", self.profile))?)
  }

  fn load_all<T: DeserializeOwned>(&self, kind: &str) -> Result<Vec<T>, StoreError> {
    let mut out = Vec::new();
    for item in self.tree(kind)?.iter() {
      let (_, v) = item?;
      out.push(dec(&v)?);
    }
    Ok(out)
  }

  fn put<T: Serialize>(
    &self,
    kind: &str,
    key: impl AsRef<[u8]>,
    value: &T,
  ) -> Result<(), StoreError> {
    self.tree(kind)?.insert(key.as_ref(), enc(value)?)?;
    self.db.flush()?;
    Ok(())
  }

  fn get_one<T: DeserializeOwned>(
    &self,
    kind: &str,
    key: impl AsRef<[u8]>,
  ) -> Result<Option<T>, StoreError> {
    match self.tree(kind)?.get(key.as_ref())? {
      Some(bytes) => Ok(Some(dec(&bytes)?)),
      None => Ok(None),
    }
  }

  fn del(&self, kind: &str, key: impl AsRef<[u8]>) -> Result<bool, StoreError> {
    let removed = self.tree(kind)?.remove(key.as_ref())?.is_some();
    self.db.flush()?;
    Ok(removed)
  }

  fn next_id32(&self, kind: &str) -> Result<u32, StoreError> {
    let meta = self.tree(T_META)?;
    let key = format!("next:{kind}");
    let next = match meta.get(&key)? {
      Some(bytes) => dec::<u32>(&bytes)?,
      None => 1,
    };
    meta.insert(key.as_bytes(), enc(&(next + 1))?)?;
    Ok(next)
  }

  fn peek_slot_counter(&self) -> Result<u64, StoreError> {
    let meta = self.tree(T_META)?;
    match meta.get("next:slots")? {
      Some(bytes) => dec(&bytes),
      None => Ok(1),
    }
  }

  fn store_slot_counter(&self, next: u64) -> Result<(), StoreError> {
    let meta = self.tree(T_META)?;
    meta.insert("next:slots", enc(&next)?)?;
    Ok(())
  }

  fn next_slot_id(&self) -> Result<SlotId, StoreError> {
    let next = self.peek_slot_counter()?;
    self.store_slot_counter(next + 1)?;
    Ok(next)
  }

  // ── regions ───────────────────────────────────────────────────────

  pub fn region(&self, id: RegionId) -> Result<Option<Region>, StoreError> {
    self.get_one(T_REGIONS, id.to_be_bytes())
  }

  pub fn create_region(&self, title: &str) -> Result<Region, StoreError> {
    let title = validate_name(title)?;
    let region = Region {
      id: self.next_id32(T_REGIONS)?,
      title,
    };
    self.put(T_REGIONS, region.id.to_be_bytes(), &region)?;
    Ok(region)
  }

  pub fn update_region(&self, id: RegionId, title: &str) -> Result<Region, StoreError> {
    let mut region = self.region(id)?.ok_or(StoreError::RegionNotFound(id))?;
    region.title = validate_name(title)?;
    self.put(T_REGIONS, id.to_be_bytes(), &region)?;
    Ok(region)
  }

  pub fn delete_region(&self, id: RegionId) -> Result<(), StoreError> {
    if self.region(id)?.is_none() {
      return Err(StoreError::RegionNotFound(id));
    }
    if !self.fields_of_region(id)?.is_empty() || !self.teams_of_region(id)?.is_empty() {
      return Err(StoreError::RegionNotEmpty(id));
    }
    // conflicts of an empty region are stale by definition
    for conflict in self.coach_conflicts_of_region(id)? {
      self.del(T_CONFLICTS, conflict.id.to_be_bytes())?;
    }
    self.del(T_REGIONS, id.to_be_bytes())?;
    Ok(())
  }

  // ── fields ────────────────────────────────────────────────────────

  pub fn field(&self, id: FieldId) -> Result<Option<Field>, StoreError> {
    self.get_one(T_FIELDS, id.to_be_bytes())
  }

  pub fn fields(&self) -> Result<Vec<Field>, StoreError> {
    self.load_all(T_FIELDS)
  }

  pub fn create_field(&self, region_id: RegionId, name: &str) -> Result<Field, StoreError> {
    if self.region(region_id)?.is_none() {
      return Err(StoreError::RegionNotFound(region_id));
    }
    let field = Field {
      id: self.next_id32(T_FIELDS)?,
      name: validate_name(name)?,
      region_id,
    };
    self.put(T_FIELDS, field.id.to_be_bytes(), &field)?;
    Ok(field)
  }

  pub fn rename_field(&self, id: FieldId, name: &str) -> Result<Field, StoreError> {
    let mut field = self.field(id)?.ok_or(StoreError::FieldNotFound(id))?;
    field.name = validate_name(name)?;
    self.put(T_FIELDS, id.to_be_bytes(), &field)?;
    Ok(field)
  }

  /// Delete a field together with its slots and overrides.
  pub fn delete_field(&self, id: FieldId) -> Result<(), StoreError> {
    if self.field(id)?.is_none() {
      return Err(StoreError::FieldNotFound(id));
    }
    for slot in self.slots_of_field(id, None)? {
      self.del(T_SLOTS, slot.id.to_be_bytes())?;
    }
    for o in self.overrides_of_field(id)? {
      self.del(T_OVERRIDES, override_key(o.field_id, o.reservation_type_id))?;
    }
    self.del(T_FIELDS, id.to_be_bytes())?;
    Ok(())
  }

  // ── groups ────────────────────────────────────────────────────────

  pub fn group(&self, id: GroupId) -> Result<Option<TeamGroup>, StoreError> {
    self.get_one(T_GROUPS, id.to_be_bytes())
  }

  /// Create a group. Names are normalized to lowercase and must be
  /// unique case-insensitively.
  pub fn create_group(&self, name: &str) -> Result<TeamGroup, StoreError> {
    let name = validate_name(name)?.to_lowercase();
    if self.groups()?.iter().any(|g| g.name == name) {
      return Err(StoreError::DuplicateGroupName(name));
    }
    let group = TeamGroup {
      id: self.next_id32(T_GROUPS)?,
      name,
      usage: 0,
    };
    self.put(T_GROUPS, group.id.to_be_bytes(), &group)?;
    Ok(group)
  }

  pub fn rename_group(&self, id: GroupId, name: &str) -> Result<TeamGroup, StoreError> {
    let name = validate_name(name)?.to_lowercase();
    let mut group = self.group(id)?.ok_or(StoreError::GroupNotFound(id))?;
    if self.groups()?.iter().any(|g| g.name == name && g.id != id) {
      return Err(StoreError::DuplicateGroupName(name));
    }
    group.name = name;
    self.put(T_GROUPS, id.to_be_bytes(), &group)?;
    Ok(group)
  }

  pub fn delete_group(&self, id: GroupId) -> Result<(), StoreError> {
    let group = self.group(id)?.ok_or(StoreError::GroupNotFound(id))?;
    if group.usage > 0 {
      return Err(StoreError::GroupInUse(id));
    }
    self.del(T_GROUPS, id.to_be_bytes())?;
    Ok(())
  }

  fn bump_group_usage(&self, id: GroupId, delta: i64) -> Result<(), StoreError> {
    let mut group = self.group(id)?.ok_or(StoreError::GroupNotFound(id))?;
    group.usage = (i64::from(group.usage) + delta).max(0) as u32;
    self.put(T_GROUPS, id.to_be_bytes(), &group)
  }

  // ── teams ─────────────────────────────────────────────────────────

  pub fn team(&self, id: TeamId) -> Result<Option<Team>, StoreError> {
    self.get_one(T_TEAMS, id.to_be_bytes())
  }

  pub fn teams(&self) -> Result<Vec<Team>, StoreError> {
    self.load_all(T_TEAMS)
  }

  pub fn create_team(
    &self,
    region_id: RegionId,
    name: &str,
    group_ids: BTreeSet<GroupId>,
  ) -> Result<Team, StoreError> {
    if self.region(region_id)?.is_none() {
      return Err(StoreError::RegionNotFound(region_id));
    }
    for &gid in &group_ids {
      if self.group(gid)?.is_none() {
        return Err(StoreError::GroupNotFound(gid));
      }
    }
    let team = Team {
      id: self.next_id32(T_TEAMS)?,
      name: validate_name(name)?,
      region_id,
      group_ids,
    };
    self.put(T_TEAMS, team.id.to_be_bytes(), &team)?;
    for &gid in &team.group_ids {
      self.bump_group_usage(gid, 1)?;
    }
    Ok(team)
  }

  pub fn rename_team(&self, id: TeamId, name: &str) -> Result<Team, StoreError> {
    let mut team = self.team(id)?.ok_or(StoreError::TeamNotFound(id))?;
    team.name = validate_name(name)?;
    self.put(T_TEAMS, id.to_be_bytes(), &team)?;
    Ok(team)
  }

  pub fn set_team_groups(
    &self,
    id: TeamId,
    group_ids: BTreeSet<GroupId>,
  ) -> Result<Team, StoreError> {
    let mut team = self.team(id)?.ok_or(StoreError::TeamNotFound(id))?;
    for &gid in &group_ids {
      if self.group(gid)?.is_none() {
        return Err(StoreError::GroupNotFound(gid));
      }
    }
    for &gid in team.group_ids.difference(&group_ids) {
      self.bump_group_usage(gid, -1)?;
    }
    let added: Vec<GroupId> = group_ids.difference(&team.group_ids).copied().collect();
    for gid in added {
      self.bump_group_usage(gid, 1)?;
    }
    team.group_ids = group_ids;
    self.put(T_TEAMS, id.to_be_bytes(), &team)?;
    Ok(team)
  }

  /// Delete a team: group usage drops, and coach conflicts shed the
  /// member (a conflict that falls below two teams is deleted).
  pub fn delete_team(&self, id: TeamId) -> Result<(), StoreError> {
    let team = self.team(id)?.ok_or(StoreError::TeamNotFound(id))?;
    for &gid in &team.group_ids {
      self.bump_group_usage(gid, -1)?;
    }
    for mut conflict in self.coach_conflicts()? {
      if conflict.team_ids.remove(&id) {
        if conflict.team_ids.len() < 2 {
          self.del(T_CONFLICTS, conflict.id.to_be_bytes())?;
        } else {
          self.put(T_CONFLICTS, conflict.id.to_be_bytes(), &conflict)?;
        }
      }
    }
    self.del(T_TEAMS, id.to_be_bytes())?;
    Ok(())
  }

  // ── reservation types ─────────────────────────────────────────────

  pub fn create_reservation_type(
    &self,
    name: &str,
    color: &str,
    default_concurrency: u8,
    is_practice: bool,
    description: Option<String>,
  ) -> Result<ReservationType, StoreError> {
    let rtype = ReservationType {
      id: self.next_id32(T_RTYPES)?,
      name: validate_name(name)?,
      color: color.to_string(),
      default_concurrency: validate_concurrency(default_concurrency)?,
      is_practice,
      description,
    };
    self.put(T_RTYPES, rtype.id.to_be_bytes(), &rtype)?;
    Ok(rtype)
  }

  pub fn update_reservation_type(&self, rtype: ReservationType) -> Result<(), StoreError> {
    if self.reservation_type(rtype.id)?.is_none() {
      return Err(StoreError::ReservationTypeNotFound(rtype.id));
    }
    validate_name(&rtype.name)?;
    validate_concurrency(rtype.default_concurrency)?;
    self.put(T_RTYPES, rtype.id.to_be_bytes(), &rtype)
  }

  /// Delete a reservation type unless slots, targets or overrides still
  /// reference it.
  pub fn delete_reservation_type(&self, id: ReservationTypeId) -> Result<(), StoreError> {
    if self.reservation_type(id)?.is_none() {
      return Err(StoreError::ReservationTypeNotFound(id));
    }
    let slot_refs = self
      .time_slots()?
      .iter()
      .any(|s| s.reservation_type_id == id);
    let target_refs = self
      .targets()?
      .iter()
      .any(|t| t.reservation_type_id == Some(id));
    let override_refs = self
      .overrides()?
      .iter()
      .any(|o| o.reservation_type_id == id);
    if slot_refs || target_refs || override_refs {
      return Err(StoreError::ReservationTypeInUse(id));
    }
    self.del(T_RTYPES, id.to_be_bytes())?;
    Ok(())
  }

  // ── concurrency overrides ─────────────────────────────────────────

  pub fn overrides(&self) -> Result<Vec<ConcurrencyOverride>, StoreError> {
    self.load_all(T_OVERRIDES)
  }

  pub fn set_concurrency_override(
    &self,
    field_id: FieldId,
    reservation_type_id: ReservationTypeId,
    concurrency: u8,
  ) -> Result<(), StoreError> {
    if self.field(field_id)?.is_none() {
      return Err(StoreError::FieldNotFound(field_id));
    }
    if self.reservation_type(reservation_type_id)?.is_none() {
      return Err(StoreError::ReservationTypeNotFound(reservation_type_id));
    }
    let value = ConcurrencyOverride {
      field_id,
      reservation_type_id,
      concurrency: validate_concurrency(concurrency)?,
    };
    self.put(T_OVERRIDES, override_key(field_id, reservation_type_id), &value)
  }

  pub fn clear_concurrency_override(
    &self,
    field_id: FieldId,
    reservation_type_id: ReservationTypeId,
  ) -> Result<(), StoreError> {
    self.del(T_OVERRIDES, override_key(field_id, reservation_type_id))?;
    Ok(())
  }

  /// Concurrency lookup table over the whole profile.
  pub fn concurrency_table(&self) -> Result<ConcurrencyTable, StoreError> {
    Ok(ConcurrencyTable::new(
      &self.reservation_types()?,
      &self.overrides()?,
    ))
  }

  // ── time slots ────────────────────────────────────────────────────

  pub fn time_slots(&self) -> Result<Vec<TimeSlot>, StoreError> {
    self.load_all(T_SLOTS)
  }

  fn field_calendar(&self, field_id: FieldId) -> Result<FieldCalendar, StoreError> {
    Ok(FieldCalendar::from_slots(
      field_id,
      self.slots_of_field(field_id, None)?,
    )?)
  }

  /// Insert a slot, enforcing the per-field non-overlap invariant.
  pub fn create_time_slot(
    &self,
    field_id: FieldId,
    reservation_type_id: ReservationTypeId,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
  ) -> Result<TimeSlot, StoreError> {
    if self.field(field_id)?.is_none() {
      return Err(StoreError::FieldNotFound(field_id));
    }
    if self.reservation_type(reservation_type_id)?.is_none() {
      return Err(StoreError::ReservationTypeNotFound(reservation_type_id));
    }
    let mut calendar = self.field_calendar(field_id)?;
    let id = self.next_slot_id()?;
    calendar.insert(id, start, end, reservation_type_id)?;
    let slot = calendar
      .get(id)
      .cloned()
      .ok_or(StoreError::SlotNotFound(id))?;
    self.put(T_SLOTS, id.to_be_bytes(), &slot)?;
    Ok(slot)
  }

  /// Move or resize a slot; `Overlap` leaves the store untouched.
  pub fn move_time_slot(
    &self,
    id: SlotId,
    new_start: DateTime<Utc>,
    new_end: DateTime<Utc>,
  ) -> Result<TimeSlot, StoreError> {
    let slot: TimeSlot = self
      .get_one(T_SLOTS, id.to_be_bytes())?
      .ok_or(StoreError::SlotNotFound(id))?;
    let mut calendar = self.field_calendar(slot.field_id)?;
    calendar.move_slot(id, new_start, new_end)?;
    let moved = calendar
      .get(id)
      .cloned()
      .ok_or(StoreError::SlotNotFound(id))?;
    self.put(T_SLOTS, id.to_be_bytes(), &moved)?;
    Ok(moved)
  }

  pub fn delete_time_slot(&self, id: SlotId) -> Result<(), StoreError> {
    if !self.del(T_SLOTS, id.to_be_bytes())? {
      return Err(StoreError::SlotNotFound(id));
    }
    Ok(())
  }

  /// Transactional batched copy on one field: either every shifted copy
  /// is persisted or none is.
  pub fn batch_copy_slots(
    &self,
    field_id: FieldId,
    first_id: SlotId,
    last_id: SlotId,
    dst_start: DateTime<Utc>,
  ) -> Result<Vec<TimeSlot>, StoreError> {
    let mut calendar = self.field_calendar(field_id)?;
    let mut next = self.peek_slot_counter()?;
    let mut alloc = || {
      let id = next;
      next += 1;
      id
    };
    let new_ids = calendar.batch_copy(first_id, last_id, dst_start, &mut alloc)?;
    self.store_slot_counter(next)?;

    let mut created = Vec::with_capacity(new_ids.len());
    for id in new_ids {
      let slot = calendar
        .get(id)
        .cloned()
        .ok_or(StoreError::SlotNotFound(id))?;
      self.put(T_SLOTS, id.to_be_bytes(), &slot)?;
      created.push(slot);
    }
    Ok(created)
  }

  /// Delete every slot of `field_id` whose id lies in the inclusive
  /// range, returning how many were removed.
  pub fn batch_delete_slots(
    &self,
    field_id: FieldId,
    first_id: SlotId,
    last_id: SlotId,
  ) -> Result<usize, StoreError> {
    let mut calendar = self.field_calendar(field_id)?;
    let removed = calendar.batch_delete(first_id, last_id);
    for slot in &removed {
      self.del(T_SLOTS, slot.id.to_be_bytes())?;
    }
    Ok(removed.len())
  }

  // ── targets ───────────────────────────────────────────────────────

  pub fn create_target(
    &self,
    group_ids: BTreeSet<GroupId>,
    reservation_type_id: Option<ReservationTypeId>,
  ) -> Result<Target, StoreError> {
    for &gid in &group_ids {
      if self.group(gid)?.is_none() {
        return Err(StoreError::GroupNotFound(gid));
      }
    }
    if let Some(rt) = reservation_type_id {
      if self.reservation_type(rt)?.is_none() {
        return Err(StoreError::ReservationTypeNotFound(rt));
      }
    }
    let target = Target {
      id: self.next_id32(T_TARGETS)?,
      group_ids,
      reservation_type_id,
    };
    self.put(T_TARGETS, target.id.to_be_bytes(), &target)?;
    Ok(target)
  }

  pub fn update_target(&self, target: Target) -> Result<(), StoreError> {
    if self.get_one::<Target>(T_TARGETS, target.id.to_be_bytes())?.is_none() {
      return Err(StoreError::TargetNotFound(target.id));
    }
    for &gid in &target.group_ids {
      if self.group(gid)?.is_none() {
        return Err(StoreError::GroupNotFound(gid));
      }
    }
    self.put(T_TARGETS, target.id.to_be_bytes(), &target)
  }

  pub fn delete_target(&self, id: TargetId) -> Result<(), StoreError> {
    if !self.del(T_TARGETS, id.to_be_bytes())? {
      return Err(StoreError::TargetNotFound(id));
    }
    Ok(())
  }

  // ── coach conflicts ───────────────────────────────────────────────

  pub fn coach_conflicts(&self) -> Result<Vec<CoachConflict>, StoreError> {
    self.load_all(T_CONFLICTS)
  }

  fn validate_conflict_teams(
    &self,
    region_id: RegionId,
    team_ids: &BTreeSet<TeamId>,
  ) -> Result<(), StoreError> {
    if team_ids.len() < 2 {
      return Err(StoreError::ConflictTooSmall);
    }
    for &tid in team_ids {
      let team = self.team(tid)?.ok_or(StoreError::TeamNotFound(tid))?;
      if team.region_id != region_id {
        return Err(StoreError::ConflictTeamOutsideRegion);
      }
    }
    Ok(())
  }

  pub fn create_coach_conflict(
    &self,
    region_id: RegionId,
    coach_name: Option<String>,
    team_ids: BTreeSet<TeamId>,
  ) -> Result<CoachConflict, StoreError> {
    if self.region(region_id)?.is_none() {
      return Err(StoreError::RegionNotFound(region_id));
    }
    self.validate_conflict_teams(region_id, &team_ids)?;
    let conflict = CoachConflict {
      id: self.next_id32(T_CONFLICTS)?,
      region_id,
      coach_name,
      team_ids,
    };
    self.put(T_CONFLICTS, conflict.id.to_be_bytes(), &conflict)?;
    Ok(conflict)
  }

  pub fn update_coach_conflict(&self, conflict: CoachConflict) -> Result<(), StoreError> {
    if self
      .get_one::<CoachConflict>(T_CONFLICTS, conflict.id.to_be_bytes())?
      .is_none()
    {
      return Err(StoreError::ConflictNotFound(conflict.id));
    }
    self.validate_conflict_teams(conflict.region_id, &conflict.team_ids)?;
    self.put(T_CONFLICTS, conflict.id.to_be_bytes(), &conflict)
  }

  pub fn delete_coach_conflict(&self, id: ConflictId) -> Result<(), StoreError> {
    if !self.del(T_CONFLICTS, id.to_be_bytes())? {
      return Err(StoreError::ConflictNotFound(id));
    }
    Ok(())
  }

  // ── schedules ─────────────────────────────────────────────────────

  pub fn schedules(&self) -> Result<Vec<Schedule>, StoreError> {
    self.load_all(T_SCHEDULES)
  }

  pub fn schedule(&self, id: ScheduleId) -> Result<Option<Schedule>, StoreError> {
    self.get_one(T_SCHEDULES, id.as_bytes())
  }

  pub fn delete_schedule(&self, id: ScheduleId) -> Result<(), StoreError> {
    if !self.del(T_SCHEDULES, id.as_bytes())? {
      return Err(StoreError::ScheduleNotFound(id));
    }
    Ok(())
  }

  fn save_schedule(&self, mut schedule: Schedule) -> Result<Schedule, StoreError> {
    schedule.last_edited = Utc::now();
    self.put(T_SCHEDULES, *schedule.id.as_bytes(), &schedule)?;
    Ok(schedule)
  }

  /// Move a reservation to another backed interval. The destination must
  /// be an existing slot on the field, and the slot must still have lane
  /// capacity left for this schedule.
  pub fn move_reservation(
    &self,
    schedule_id: ScheduleId,
    index: usize,
    field_id: FieldId,
    new_start: DateTime<Utc>,
    new_end: DateTime<Utc>,
  ) -> Result<Schedule, StoreError> {
    let mut schedule = self
      .schedule(schedule_id)?
      .ok_or(StoreError::ScheduleNotFound(schedule_id))?;
    if index >= schedule.reservations.len() {
      return Err(StoreError::ReservationOutOfBounds(index));
    }

    let backing = self
      .slots_of_field(field_id, None)?
      .into_iter()
      .find(|slot| slot.start == new_start && slot.end == new_end)
      .ok_or(StoreError::NoBackingSlot)?;
    let capacity = self
      .concurrency_table()?
      .capacity(field_id, backing.reservation_type_id);
    let occupied = schedule
      .reservations
      .iter()
      .enumerate()
      .filter(|&(i, r)| {
        i != index && r.field_id == field_id && overlaps(r.start, r.end, new_start, new_end)
      })
      .count();
    if occupied >= usize::from(capacity) {
      return Err(StoreError::SlotAtCapacity);
    }

    let reservation = &mut schedule.reservations[index];
    reservation.field_id = field_id;
    reservation.start = new_start;
    reservation.end = new_end;
    self.save_schedule(schedule)
  }

  /// Swap the bookings of two reservations, leaving their intervals in
  /// place.
  pub fn swap_reservations(
    &self,
    schedule_id: ScheduleId,
    a: usize,
    b: usize,
  ) -> Result<Schedule, StoreError> {
    let mut schedule = self
      .schedule(schedule_id)?
      .ok_or(StoreError::ScheduleNotFound(schedule_id))?;
    let len = schedule.reservations.len();
    if a >= len {
      return Err(StoreError::ReservationOutOfBounds(a));
    }
    if b >= len {
      return Err(StoreError::ReservationOutOfBounds(b));
    }
    if a != b {
      let booking_a = schedule.reservations[a].booking;
      schedule.reservations[a].booking = schedule.reservations[b].booking;
      schedule.reservations[b].booking = booking_a;
    }
    self.save_schedule(schedule)
  }

  pub fn delete_reservation(
    &self,
    schedule_id: ScheduleId,
    index: usize,
  ) -> Result<Schedule, StoreError> {
    let mut schedule = self
      .schedule(schedule_id)?
      .ok_or(StoreError::ScheduleNotFound(schedule_id))?;
    if index >= schedule.reservations.len() {
      return Err(StoreError::ReservationOutOfBounds(index));
    }
    schedule.reservations.remove(index);
    self.save_schedule(schedule)
  }
}

impl EntityStore for SledStore {
  fn regions(&self) -> Result<Vec<Region>, StoreError> {
    self.load_all(T_REGIONS)
  }

  fn teams_of_region(&self, region: RegionId) -> Result<Vec<Team>, StoreError> {
    Ok(
      self
        .teams()?
        .into_iter()
        .filter(|t| t.region_id == region)
        .collect(),
    )
  }

  fn fields_of_region(&self, region: RegionId) -> Result<Vec<Field>, StoreError> {
    Ok(
      self
        .fields()?
        .into_iter()
        .filter(|f| f.region_id == region)
        .collect(),
    )
  }

  fn slots_of_field(
    &self,
    field: FieldId,
    window: Option<(DateTime<Utc>, DateTime<Utc>)>,
  ) -> Result<Vec<TimeSlot>, StoreError> {
    Ok(
      self
        .time_slots()?
        .into_iter()
        .filter(|s| s.field_id == field)
        .filter(|s| match window {
          Some((from, to)) => overlaps(s.start, s.end, from, to),
          None => true,
        })
        .collect(),
    )
  }

  fn reservation_type(
    &self,
    id: ReservationTypeId,
  ) -> Result<Option<ReservationType>, StoreError> {
    self.get_one(T_RTYPES, id.to_be_bytes())
  }

  fn reservation_types(&self) -> Result<Vec<ReservationType>, StoreError> {
    self.load_all(T_RTYPES)
  }

  fn overrides_of_field(&self, field: FieldId) -> Result<Vec<ConcurrencyOverride>, StoreError> {
    Ok(
      self
        .overrides()?
        .into_iter()
        .filter(|o| o.field_id == field)
        .collect(),
    )
  }

  fn groups(&self) -> Result<Vec<TeamGroup>, StoreError> {
    self.load_all(T_GROUPS)
  }

  fn targets(&self) -> Result<Vec<Target>, StoreError> {
    self.load_all(T_TARGETS)
  }

  fn coach_conflicts_of_region(
    &self,
    region: RegionId,
  ) -> Result<Vec<CoachConflict>, StoreError> {
    Ok(
      self
        .coach_conflicts()?
        .into_iter()
        .filter(|c| c.region_id == region)
        .collect(),
    )
  }

  /// Committing a schedule is a single keyed insert, so the whole run is
  /// visible atomically or not at all.
  fn insert_schedule(&self, schedule: &Schedule) -> Result<(), StoreError> {
    self.put(T_SCHEDULES, *schedule.id.as_bytes(), schedule)
  }
}
