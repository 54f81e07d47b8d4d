//! Pre-schedule feasibility analysis.
//!
//! Before anything is sent to the scheduling engine, the analyzer computes
//! supply and demand per target, flags misconfigurations (duplicate, empty
//! and impossible targets) and reports regional breakdowns. Soft errors
//! never abort the analysis; they are carried inside the report for the
//! orchestrator to act on.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use typed_builder::TypedBuilder;

use crate::model::{
  ConcurrencyTable, Field, GroupId, RegionId, ReservationType, ReservationTypeId, Target,
  TargetId, Team, TimeSlot,
};

/// Hard analyzer failures. Everything configuration-shaped is soft and
/// lives in the report instead.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AnalyzerError {
  /// `matches_to_play` must lie in 1..=7.
  #[error("Matches to play must lie in 1..=7, got {0}")]
  MatchesOutOfRange(u8),
}

/// Analyzer configuration.
///
/// ```rust,ignore
/// let cfg = AnalyzerConfig::builder().matches_to_play(2).interregional(true).build();
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, TypedBuilder)]
pub struct AnalyzerConfig {
  /// How many times each eligible pair plays (1..=7).
  pub matches_to_play: u8,
  /// When true, pairs may cross region boundaries.
  #[builder(default)]
  pub interregional: bool,
  /// Match demand already claimed by an earlier season phase; subtracted
  /// from the total supply of this one.
  #[builder(default)]
  pub supply_consumed: u64,
}

/// Borrowed view of the entities the analyzer reads.
#[derive(Debug, Clone, Copy)]
pub struct AnalyzerSnapshot<'a> {
  pub targets: &'a [Target],
  pub teams: &'a [Team],
  pub fields: &'a [Field],
  pub slots: &'a [TimeSlot],
  pub reservation_types: &'a [ReservationType],
  pub concurrency: &'a ConcurrencyTable,
}

/// A match count, kept whole in interregional mode or broken down per
/// region otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Count {
  Interregional(u64),
  Regional(BTreeMap<RegionId, u64>),
}

impl Count {
  /// Sum across all components.
  pub fn total(&self) -> u64 {
    match self {
      Count::Interregional(n) => *n,
      Count::Regional(map) => map.values().sum(),
    }
  }

  /// Component-wise `self >= required`: the supply-account predicate.
  pub fn covers(&self, required: &Count) -> bool {
    match (self, required) {
      (Count::Interregional(sup), Count::Interregional(req)) => sup >= req,
      (Count::Regional(sup), Count::Regional(req)) => req
        .iter()
        .all(|(region, need)| sup.get(region).copied().unwrap_or(0) >= *need),
      _ => false,
    }
  }
}

/// Required/supplied accounting for one target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetMatchCount {
  pub target_id: TargetId,
  pub required: Count,
  pub supplied: Count,
}

impl TargetMatchCount {
  /// True iff supply covers demand component-wise.
  pub fn accounted_for(&self) -> bool {
    self.supplied.covers(&self.required)
  }
}

/// Targets sharing an identity tuple (group set, practice character).
///
/// Targets that differ only in the `is_practice` flag of their filter are
/// *not* duplicates of each other; they land in distinct entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateEntry {
  pub group_ids: BTreeSet<GroupId>,
  pub is_practice: bool,
  pub used_by: Vec<TargetId>,
}

/// The analyzer's verdict on the current configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreScheduleReport {
  pub target_duplicates: Vec<DuplicateEntry>,
  pub target_has_duplicates: Vec<TargetId>,
  pub target_match_count: Vec<TargetMatchCount>,
  pub empty_targets: Vec<TargetId>,
  pub impossible_targets: Vec<TargetId>,
  pub total_matches_required: u64,
  pub total_matches_supplied: u64,
  pub interregional: bool,
}

impl PreScheduleReport {
  /// Targets whose supply does not cover their demand.
  pub fn undersupplied_targets(&self) -> Vec<TargetId> {
    self
      .target_match_count
      .iter()
      .filter(|entry| !entry.accounted_for())
      .map(|entry| entry.target_id)
      .collect()
  }

  /// True iff any condition holds that must abort scheduling: duplicate
  /// targets, impossible targets, or undersupplied targets. Empty targets
  /// are merely skipped.
  pub fn has_blocking_errors(&self) -> bool {
    !self.target_has_duplicates.is_empty()
      || !self.impossible_targets.is_empty()
      || !self.undersupplied_targets().is_empty()
  }

  /// True iff `target` can be handed to the payload builder.
  pub fn is_schedulable(&self, target: TargetId) -> bool {
    !self.empty_targets.contains(&target) && !self.impossible_targets.contains(&target)
  }
}

fn pairs_of(n: u64) -> u64 {
  n * n.saturating_sub(1) / 2
}

/// E(T): teams whose group set is a superset of the target's group set.
pub fn eligible_teams<'a>(target: &Target, teams: &'a [Team]) -> Vec<&'a Team> {
  teams
    .iter()
    .filter(|team| target.group_ids.is_subset(&team.group_ids))
    .collect()
}

/// Run the feasibility analysis.
pub fn analyze(
  config: &AnalyzerConfig,
  snapshot: &AnalyzerSnapshot<'_>,
) -> Result<PreScheduleReport, AnalyzerError> {
  if !(1..=7).contains(&config.matches_to_play) {
    return Err(AnalyzerError::MatchesOutOfRange(config.matches_to_play));
  }
  let matches = u64::from(config.matches_to_play);

  let types_by_id: HashMap<ReservationTypeId, &ReservationType> = snapshot
    .reservation_types
    .iter()
    .map(|t| (t.id, t))
    .collect();
  let field_region: HashMap<_, _> = snapshot
    .fields
    .iter()
    .map(|f| (f.id, f.region_id))
    .collect();

  let mut duplicates: BTreeMap<(BTreeSet<GroupId>, bool), Vec<TargetId>> = BTreeMap::new();
  let mut empty_targets = Vec::new();
  let mut impossible_targets = Vec::new();
  let mut target_match_count = Vec::new();

  for target in snapshot.targets {
    if target.group_ids.is_empty() {
      empty_targets.push(target.id);
      continue;
    }

    let is_practice = target
      .reservation_type_id
      .and_then(|id| types_by_id.get(&id))
      .is_some_and(|t| t.is_practice);
    duplicates
      .entry((target.group_ids.clone(), is_practice))
      .or_default()
      .push(target.id);

    let eligible = eligible_teams(target, snapshot.teams);
    let mut per_region: BTreeMap<RegionId, u64> = BTreeMap::new();
    for team in &eligible {
      *per_region.entry(team.region_id).or_default() += 1;
    }

    let required = if config.interregional {
      let n = eligible.len() as u64;
      Count::Interregional(if is_practice { n * matches } else { pairs_of(n) * matches })
    } else {
      Count::Regional(
        per_region
          .iter()
          .map(|(&region, &n)| {
            (region, if is_practice { n * matches } else { pairs_of(n) * matches })
          })
          .collect(),
      )
    };

    // a match needs two eligible teams; a practice books a single team
    let feasible_floor = if is_practice { 1 } else { 2 };
    let impossible = if config.interregional {
      (eligible.len() as u64) < feasible_floor
    } else {
      per_region.values().all(|&n| n < feasible_floor)
    };
    if impossible {
      impossible_targets.push(target.id);
    }

    // sup(T): matching slots weighted by lane capacity, restricted to
    // fields of regions that hold eligible teams in regional mode.
    let mut supplied_per_region: BTreeMap<RegionId, u64> = BTreeMap::new();
    let mut supplied_total = 0u64;
    for slot in snapshot.slots {
      if let Some(filter) = target.reservation_type_id {
        if slot.reservation_type_id != filter {
          continue;
        }
      }
      let Some(&region) = field_region.get(&slot.field_id) else {
        continue;
      };
      let lanes = u64::from(
        snapshot
          .concurrency
          .capacity(slot.field_id, slot.reservation_type_id),
      );
      if config.interregional {
        supplied_total += lanes;
      } else {
        if !per_region.contains_key(&region) {
          continue;
        }
        *supplied_per_region.entry(region).or_default() += lanes;
      }
    }
    let supplied = if config.interregional {
      Count::Interregional(supplied_total)
    } else {
      Count::Regional(supplied_per_region)
    };

    target_match_count.push(TargetMatchCount {
      target_id: target.id,
      required,
      supplied,
    });
  }

  let target_duplicates: Vec<DuplicateEntry> = duplicates
    .into_iter()
    .filter(|(_, used_by)| used_by.len() > 1)
    .map(|((group_ids, is_practice), used_by)| DuplicateEntry {
      group_ids,
      is_practice,
      used_by,
    })
    .collect();
  let target_has_duplicates: Vec<TargetId> = target_duplicates
    .iter()
    .flat_map(|entry| entry.used_by.iter().copied())
    .collect();

  let total_matches_required = target_match_count
    .iter()
    .map(|entry| entry.required.total())
    .sum();
  let total_matches_supplied: u64 = target_match_count
    .iter()
    .map(|entry| entry.supplied.total())
    .sum::<u64>()
    .saturating_sub(config.supply_consumed);

  Ok(PreScheduleReport {
    target_duplicates,
    target_has_duplicates,
    target_match_count,
    empty_targets,
    impossible_targets,
    total_matches_required,
    total_matches_supplied,
    interregional: config.interregional,
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::ConcurrencyOverride;
  use chrono::{DateTime, Duration, TimeZone, Utc};

  fn t(hour: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 5, 2, 8, 0, 0).unwrap() + Duration::hours(hour)
  }

  fn team(id: u32, region: u32, groups: &[u32]) -> Team {
    Team {
      id,
      name: format!("team-{id}"),
      region_id: region,
      group_ids: groups.iter().copied().collect(),
    }
  }

  fn rtype(id: u32, concurrency: u8, is_practice: bool) -> ReservationType {
    ReservationType {
      id,
      name: format!("type-{id}"),
      color: "#336699".into(),
      default_concurrency: concurrency,
      is_practice,
      description: None,
    }
  }

  fn slot(id: u64, field: u32, rtype: u32, start: i64, hours: i64) -> TimeSlot {
    TimeSlot {
      id,
      field_id: field,
      reservation_type_id: rtype,
      start: t(start),
      end: t(start + hours),
    }
  }

  fn field(id: u32, region: u32) -> Field {
    Field {
      id,
      name: format!("field-{id}"),
      region_id: region,
    }
  }

  struct Fixture {
    targets: Vec<Target>,
    teams: Vec<Team>,
    fields: Vec<Field>,
    slots: Vec<TimeSlot>,
    types: Vec<ReservationType>,
    overrides: Vec<ConcurrencyOverride>,
  }

  impl Fixture {
    fn analyze(&self, config: &AnalyzerConfig) -> PreScheduleReport {
      let table = ConcurrencyTable::new(&self.types, &self.overrides);
      analyze(
        config,
        &AnalyzerSnapshot {
          targets: &self.targets,
          teams: &self.teams,
          fields: &self.fields,
          slots: &self.slots,
          reservation_types: &self.types,
          concurrency: &table,
        },
      )
      .unwrap()
    }
  }

  fn target(id: u32, groups: &[u32], rtype: Option<u32>) -> Target {
    Target {
      id,
      group_ids: groups.iter().copied().collect(),
      reservation_type_id: rtype,
    }
  }

  #[test]
  fn rejects_out_of_range_match_count() {
    let cfg = AnalyzerConfig::builder().matches_to_play(0).build();
    let table = ConcurrencyTable::default();
    let snapshot = AnalyzerSnapshot {
      targets: &[],
      teams: &[],
      fields: &[],
      slots: &[],
      reservation_types: &[],
      concurrency: &table,
    };
    assert_eq!(
      analyze(&cfg, &snapshot),
      Err(AnalyzerError::MatchesOutOfRange(0))
    );
  }

  // One region, four teams in one group, two slots: 6 required, 2
  // supplied, undersupplied.
  #[test]
  fn undersupplied_single_region() {
    let fx = Fixture {
      targets: vec![target(1, &[1], Some(10))],
      teams: vec![
        team(1, 1, &[1]),
        team(2, 1, &[1]),
        team(3, 1, &[1]),
        team(4, 1, &[1]),
      ],
      fields: vec![field(1, 1)],
      slots: vec![slot(1, 1, 10, 0, 2), slot(2, 1, 10, 2, 2)],
      types: vec![rtype(10, 1, false)],
      overrides: vec![],
    };
    let report = fx.analyze(&AnalyzerConfig::builder().matches_to_play(1).build());

    assert_eq!(report.total_matches_required, 6);
    assert_eq!(report.total_matches_supplied, 2);
    assert_eq!(report.undersupplied_targets(), vec![1]);
    assert!(report.has_blocking_errors());
    let entry = &report.target_match_count[0];
    assert_eq!(
      entry.required,
      Count::Regional([(1, 6)].into_iter().collect())
    );
    assert!(!entry.accounted_for());
  }

  // Two regions, three teams each, regional mode, two matches per pair:
  // 2 * (C(3,2) + C(3,2)) = 12.
  #[test]
  fn regional_breakdown_sums_per_region() {
    let fx = Fixture {
      targets: vec![target(1, &[1], None)],
      teams: vec![
        team(1, 1, &[1]),
        team(2, 1, &[1]),
        team(3, 1, &[1]),
        team(4, 2, &[1]),
        team(5, 2, &[1]),
        team(6, 2, &[1]),
      ],
      fields: vec![field(1, 1), field(2, 2)],
      slots: (0..12)
        .map(|i| slot(i as u64 + 1, 1 + (i % 2) as u32, 10, (i as i64) * 2, 2))
        .collect(),
      types: vec![rtype(10, 1, false)],
      overrides: vec![],
    };
    let report = fx.analyze(&AnalyzerConfig::builder().matches_to_play(2).build());

    assert_eq!(report.total_matches_required, 12);
    let entry = &report.target_match_count[0];
    assert_eq!(
      entry.required,
      Count::Regional([(1, 6), (2, 6)].into_iter().collect())
    );
    assert_eq!(
      entry.supplied,
      Count::Regional([(1, 6), (2, 6)].into_iter().collect())
    );
    assert!(entry.accounted_for());
    assert!(!report.has_blocking_errors());
  }

  #[test]
  fn interregional_pools_teams_and_supply() {
    let fx = Fixture {
      targets: vec![target(1, &[1], None)],
      teams: vec![team(1, 1, &[1]), team(2, 2, &[1])],
      fields: vec![field(1, 1), field(2, 2)],
      slots: vec![slot(1, 1, 10, 0, 2), slot(2, 2, 10, 0, 2)],
      types: vec![rtype(10, 2, false)],
      overrides: vec![],
    };
    let report = fx.analyze(
      &AnalyzerConfig::builder()
        .matches_to_play(1)
        .interregional(true)
        .build(),
    );

    let entry = &report.target_match_count[0];
    // one cross-region pair; each slot carries two lanes
    assert_eq!(entry.required, Count::Interregional(1));
    assert_eq!(entry.supplied, Count::Interregional(4));
    assert!(entry.accounted_for());
  }

  #[test]
  fn duplicate_identity_ignores_type_but_honors_practice_flag() {
    let fx = Fixture {
      targets: vec![
        // same groups, both match-character types: duplicates even
        // though the type ids differ
        target(1, &[1, 2], Some(10)),
        target(2, &[2, 1], Some(11)),
        // same groups but practice character: independent
        target(3, &[1, 2], Some(12)),
      ],
      teams: vec![team(1, 1, &[1, 2]), team(2, 1, &[1, 2])],
      fields: vec![field(1, 1)],
      slots: vec![slot(1, 1, 10, 0, 2)],
      types: vec![rtype(10, 1, false), rtype(11, 1, false), rtype(12, 1, true)],
      overrides: vec![],
    };
    let report = fx.analyze(&AnalyzerConfig::builder().matches_to_play(1).build());

    assert_eq!(report.target_duplicates.len(), 1);
    let dup = &report.target_duplicates[0];
    assert_eq!(dup.used_by, vec![1, 2]);
    assert!(!dup.is_practice);
    assert_eq!(report.target_has_duplicates, vec![1, 2]);
    assert!(report.has_blocking_errors());
  }

  #[test]
  fn empty_and_impossible_targets_are_reported() {
    let fx = Fixture {
      targets: vec![
        target(1, &[], None),
        target(2, &[9], None), // one eligible team only
      ],
      teams: vec![team(1, 1, &[9])],
      fields: vec![field(1, 1)],
      slots: vec![],
      types: vec![],
      overrides: vec![],
    };
    let report = fx.analyze(&AnalyzerConfig::builder().matches_to_play(1).build());

    assert_eq!(report.empty_targets, vec![1]);
    assert_eq!(report.impossible_targets, vec![2]);
    assert!(!report.is_schedulable(1));
    assert!(!report.is_schedulable(2));
    // empty targets are skipped entirely, so only target 2 is counted
    assert_eq!(report.target_match_count.len(), 1);
  }

  #[test]
  fn regional_target_with_singleton_regions_is_impossible() {
    // two regions with one eligible team each: fine interregionally,
    // impossible regionally
    let fx = Fixture {
      targets: vec![target(1, &[1], None)],
      teams: vec![team(1, 1, &[1]), team(2, 2, &[1])],
      fields: vec![field(1, 1), field(2, 2)],
      slots: vec![slot(1, 1, 10, 0, 2)],
      types: vec![rtype(10, 1, false)],
      overrides: vec![],
    };
    let regional = fx.analyze(&AnalyzerConfig::builder().matches_to_play(1).build());
    assert_eq!(regional.impossible_targets, vec![1]);

    let inter = fx.analyze(
      &AnalyzerConfig::builder()
        .matches_to_play(1)
        .interregional(true)
        .build(),
    );
    assert!(inter.impossible_targets.is_empty());
  }

  #[test]
  fn practice_target_is_feasible_with_a_single_team() {
    let fx = Fixture {
      targets: vec![target(1, &[1], Some(12))],
      teams: vec![team(1, 1, &[1])],
      fields: vec![field(1, 1)],
      slots: vec![slot(1, 1, 12, 0, 1)],
      types: vec![rtype(12, 1, true)],
      overrides: vec![],
    };
    let report = fx.analyze(&AnalyzerConfig::builder().matches_to_play(1).build());
    assert!(report.impossible_targets.is_empty());

    // with no eligible team at all it is impossible
    let empty = Fixture {
      teams: vec![],
      ..fx
    };
    let report = empty.analyze(&AnalyzerConfig::builder().matches_to_play(1).build());
    assert_eq!(report.impossible_targets, vec![1]);
  }

  #[test]
  fn practice_targets_require_one_slot_per_team_per_round() {
    let fx = Fixture {
      targets: vec![target(1, &[1], Some(12))],
      teams: (1..=5).map(|id| team(id, 1, &[1])).collect(),
      fields: vec![field(1, 1)],
      slots: (0..5).map(|i| slot(i as u64 + 1, 1, 12, i as i64, 1)).collect(),
      types: vec![rtype(12, 1, true)],
      overrides: vec![],
    };
    let report = fx.analyze(&AnalyzerConfig::builder().matches_to_play(3).build());

    let entry = &report.target_match_count[0];
    assert_eq!(entry.required, Count::Regional([(1, 15)].into_iter().collect()));
    assert_eq!(entry.supplied, Count::Regional([(1, 5)].into_iter().collect()));
    assert!(!entry.accounted_for());
  }

  #[test]
  fn totals_are_sums_of_per_target_totals() {
    let fx = Fixture {
      targets: vec![target(1, &[1], None), target(2, &[2], None)],
      teams: vec![
        team(1, 1, &[1]),
        team(2, 1, &[1]),
        team(3, 1, &[2]),
        team(4, 1, &[2]),
        team(5, 1, &[2]),
      ],
      fields: vec![field(1, 1)],
      slots: (0..4).map(|i| slot(i as u64 + 1, 1, 10, (i as i64) * 2, 2)).collect(),
      types: vec![rtype(10, 2, false)],
      overrides: vec![],
    };
    let report = fx.analyze(&AnalyzerConfig::builder().matches_to_play(1).build());

    let req_sum: u64 = report
      .target_match_count
      .iter()
      .map(|e| e.required.total())
      .sum();
    let sup_sum: u64 = report
      .target_match_count
      .iter()
      .map(|e| e.supplied.total())
      .sum();
    assert_eq!(report.total_matches_required, req_sum);
    assert_eq!(report.total_matches_supplied, sup_sum);
  }

  #[test]
  fn follow_up_phase_subtracts_consumed_supply() {
    let fx = Fixture {
      targets: vec![target(1, &[1], None)],
      teams: vec![team(1, 1, &[1]), team(2, 1, &[1])],
      fields: vec![field(1, 1)],
      slots: (0..6).map(|i| slot(i as u64 + 1, 1, 10, (i as i64) * 2, 2)).collect(),
      types: vec![rtype(10, 1, false)],
      overrides: vec![],
    };
    let first = fx.analyze(&AnalyzerConfig::builder().matches_to_play(1).build());
    assert_eq!(first.total_matches_supplied, 6);

    let second = fx.analyze(
      &AnalyzerConfig::builder()
        .matches_to_play(1)
        .supply_consumed(first.total_matches_required)
        .build(),
    );
    assert_eq!(second.total_matches_supplied, 6 - first.total_matches_required);
  }
}
