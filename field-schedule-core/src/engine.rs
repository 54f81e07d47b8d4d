//! The scheduling engine.
//!
//! Consumes one [`EngineInput`] at a time and produces an [`EngineOutput`]
//! with concrete reservations. The algorithm is a deterministic greedy
//! assignment: pairs are enumerated per team collection and shuffled with a
//! seed derived from the input id (one shuffle per collection, so repeated
//! collections behave as rounds and repeats spread out), lanes are expanded
//! from slot capacities and walked in (start, field, lane) order, and each
//! lane takes the first pairing that violates no busy or coach-conflict
//! constraint.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::calendar::overlaps;
use crate::model::{Booking, ConflictId, FieldId, RegionId, Reservation, TeamId};

/// A set of mutually playable teams. Regional scheduling sends one
/// collection per region; interregional scheduling sends a single pooled
/// collection. A collection repeated N times yields each of its pairings
/// N times.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamCollection {
  pub teams: Vec<TeamId>,
}

/// A bookable interval with its lane capacity already resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineSlot {
  pub start: DateTime<Utc>,
  pub end: DateTime<Utc>,
  pub concurrency: u8,
}

/// A field together with its usable slots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineField {
  pub field_id: FieldId,
  pub slots: Vec<EngineSlot>,
}

/// A coach-conflict group: these teams must never occupy overlapping
/// lanes in distinct reservations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConflict {
  pub conflict_id: ConflictId,
  pub region_id: RegionId,
  pub teams: Vec<TeamId>,
}

/// One unit of scheduling work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineInput {
  pub unique_id: u32,
  pub team_groups: Vec<TeamCollection>,
  pub fields: Vec<EngineField>,
  pub coach_conflicts: Vec<EngineConflict>,
  pub is_practice: bool,
}

/// The engine's answer for one input. `unplaced` counts pairings that ran
/// out of lanes; they are omitted from `reservations` and surfaced as a
/// diagnostic, never emitted as reservations without a booking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineOutput {
  pub unique_id: u32,
  pub reservations: Vec<Reservation>,
  pub unplaced: u32,
}

/// Why an input was rejected outright.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MalformedReason {
  /// A team appears more than once inside one collection.
  #[error("team {0} appears twice in a collection")]
  DuplicateTeam(TeamId),

  /// A slot ends at or before its start.
  #[error("slot ends at or before its start")]
  InvalidSlotRange,
}

/// Engine failures. Malformed inputs abort the offending input only; the
/// surrounding stream stays open.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EngineError {
  #[error("Malformed input {unique_id}: {reason}")]
  MalformedInput { unique_id: u32, reason: MalformedReason },
}

/// splitmix64 of the input id: a stable, well-mixed shuffle seed.
fn seed_for(unique_id: u32) -> u64 {
  let mut z = u64::from(unique_id).wrapping_add(0x9E37_79B9_7F4A_7C15);
  z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
  z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
  z ^ (z >> 31)
}

#[derive(Debug, Clone, Copy)]
struct Pairing {
  a: TeamId,
  b: Option<TeamId>,
}

#[derive(Debug, Clone, Copy)]
struct Lane {
  field_id: FieldId,
  start: DateTime<Utc>,
  end: DateTime<Utc>,
  lane: u8,
}

fn validate(input: &EngineInput) -> Result<(), EngineError> {
  for collection in &input.team_groups {
    let mut seen = HashSet::with_capacity(collection.teams.len());
    for &team in &collection.teams {
      if !seen.insert(team) {
        return Err(EngineError::MalformedInput {
          unique_id: input.unique_id,
          reason: MalformedReason::DuplicateTeam(team),
        });
      }
    }
  }
  for field in &input.fields {
    for slot in &field.slots {
      if slot.end <= slot.start {
        return Err(EngineError::MalformedInput {
          unique_id: input.unique_id,
          reason: MalformedReason::InvalidSlotRange,
        });
      }
    }
  }
  Ok(())
}

/// Enumerate pairings collection by collection, shuffling each block so a
/// repeated collection contributes one spread-out round per repetition.
fn enumerate_pairings(input: &EngineInput, rng: &mut StdRng) -> Vec<Pairing> {
  let mut pairings = Vec::new();
  for collection in &input.team_groups {
    let mut block = Vec::new();
    if input.is_practice {
      for &team in &collection.teams {
        block.push(Pairing { a: team, b: None });
      }
    } else {
      for (i, &a) in collection.teams.iter().enumerate() {
        for &b in &collection.teams[i + 1..] {
          block.push(Pairing { a, b: Some(b) });
        }
      }
    }
    block.shuffle(rng);
    pairings.extend(block);
  }
  pairings
}

/// Expand slots into reservation lanes ordered by slot start, then field
/// id, then lane index.
fn expand_lanes(input: &EngineInput) -> Vec<Lane> {
  let mut lanes = Vec::new();
  for field in &input.fields {
    for slot in &field.slots {
      for lane in 0..slot.concurrency {
        lanes.push(Lane {
          field_id: field.field_id,
          start: slot.start,
          end: slot.end,
          lane,
        });
      }
    }
  }
  lanes.sort_by_key(|l| (l.start, l.field_id, l.lane));
  lanes
}

/// Run the engine over one input.
///
/// Identical inputs produce identical outputs: the only source of
/// nondeterminism would be iteration order, and every ordered structure
/// here is either explicitly sorted or seeded from the input id.
pub fn run(input: &EngineInput) -> Result<EngineOutput, EngineError> {
  validate(input)?;

  let mut rng = StdRng::seed_from_u64(seed_for(input.unique_id));
  let pairings = enumerate_pairings(input, &mut rng);
  let lanes = expand_lanes(input);

  // team -> indices of the conflict groups it belongs to
  let mut conflict_groups: HashMap<TeamId, Vec<usize>> = HashMap::new();
  for (idx, conflict) in input.coach_conflicts.iter().enumerate() {
    for &team in &conflict.teams {
      conflict_groups.entry(team).or_default().push(idx);
    }
  }

  let mut team_busy: HashMap<TeamId, Vec<(DateTime<Utc>, DateTime<Utc>)>> = HashMap::new();
  let mut group_busy: Vec<Vec<(DateTime<Utc>, DateTime<Utc>)>> =
    vec![Vec::new(); input.coach_conflicts.len()];
  let mut home_count: HashMap<TeamId, u32> = HashMap::new();
  let mut placed = vec![false; pairings.len()];
  let mut reservations = Vec::new();

  fn fits(
    team: TeamId,
    lane: &Lane,
    team_busy: &HashMap<TeamId, Vec<(DateTime<Utc>, DateTime<Utc>)>>,
    group_busy: &[Vec<(DateTime<Utc>, DateTime<Utc>)>],
    conflict_groups: &HashMap<TeamId, Vec<usize>>,
  ) -> bool {
    if let Some(busy) = team_busy.get(&team) {
      if busy.iter().any(|&(s, e)| overlaps(s, e, lane.start, lane.end)) {
        return false;
      }
    }
    if let Some(groups) = conflict_groups.get(&team) {
      for &g in groups {
        if group_busy[g]
          .iter()
          .any(|&(s, e)| overlaps(s, e, lane.start, lane.end))
        {
          return false;
        }
      }
    }
    true
  }

  for lane in &lanes {
    let Some(idx) = (0..pairings.len()).find(|&i| {
      if placed[i] {
        return false;
      }
      let pairing = pairings[i];
      let a_ok = fits(pairing.a, lane, &team_busy, &group_busy, &conflict_groups);
      let b_ok = pairing
        .b
        .is_none_or(|b| fits(b, lane, &team_busy, &group_busy, &conflict_groups));
      a_ok && b_ok
    }) else {
      continue;
    };
    placed[idx] = true;
    let pairing = pairings[idx];

    let booking = match pairing.b {
      None => Booking::Practice { team: pairing.a },
      Some(b) => {
        let ha = home_count.get(&pairing.a).copied().unwrap_or(0);
        let hb = home_count.get(&b).copied().unwrap_or(0);
        let (home, away) = if ha < hb {
          (pairing.a, b)
        } else if hb < ha {
          (b, pairing.a)
        } else if pairing.a < b {
          (pairing.a, b)
        } else {
          (b, pairing.a)
        };
        *home_count.entry(home).or_default() += 1;
        Booking::Match { home, away }
      }
    };

    for team in booking.teams() {
      team_busy
        .entry(team)
        .or_default()
        .push((lane.start, lane.end));
      if let Some(groups) = conflict_groups.get(&team) {
        for &g in groups {
          group_busy[g].push((lane.start, lane.end));
        }
      }
    }
    reservations.push(Reservation {
      field_id: lane.field_id,
      start: lane.start,
      end: lane.end,
      booking,
    });

    if placed.iter().all(|&p| p) {
      break;
    }
  }

  // pairings must never leak out as empty reservations; the shortfall is
  // reported as a count instead
  let unplaced = placed.iter().filter(|&&p| !p).count() as u32;

  Ok(EngineOutput {
    unique_id: input.unique_id,
    reservations,
    unplaced,
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::{Duration, TimeZone};

  fn t(hour: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 9, 5, 8, 0, 0).unwrap() + Duration::hours(hour)
  }

  fn slot(start: i64, hours: i64, concurrency: u8) -> EngineSlot {
    EngineSlot {
      start: t(start),
      end: t(start + hours),
      concurrency,
    }
  }

  fn collection(teams: &[TeamId]) -> TeamCollection {
    TeamCollection {
      teams: teams.to_vec(),
    }
  }

  fn unordered(booking: &Booking) -> (TeamId, TeamId) {
    match *booking {
      Booking::Match { home, away } => (home.min(away), home.max(away)),
      Booking::Practice { team } => (team, team),
    }
  }

  /// Highest number of simultaneously running reservations on `field`.
  fn max_concurrent(reservations: &[Reservation], field: FieldId) -> usize {
    let on_field: Vec<_> = reservations.iter().filter(|r| r.field_id == field).collect();
    on_field
      .iter()
      .map(|r| {
        on_field
          .iter()
          .filter(|o| overlaps(r.start, r.end, o.start, o.end))
          .count()
      })
      .max()
      .unwrap_or(0)
  }

  #[test]
  fn rejects_duplicate_team_in_collection() {
    let input = EngineInput {
      unique_id: 1,
      team_groups: vec![collection(&[1, 2, 1])],
      fields: vec![],
      coach_conflicts: vec![],
      is_practice: false,
    };
    assert_eq!(
      run(&input),
      Err(EngineError::MalformedInput {
        unique_id: 1,
        reason: MalformedReason::DuplicateTeam(1),
      })
    );
  }

  #[test]
  fn rejects_inverted_slot() {
    let input = EngineInput {
      unique_id: 2,
      team_groups: vec![collection(&[1, 2])],
      fields: vec![EngineField {
        field_id: 1,
        slots: vec![EngineSlot {
          start: t(1),
          end: t(1),
          concurrency: 1,
        }],
      }],
      coach_conflicts: vec![],
      is_practice: false,
    };
    assert_eq!(
      run(&input),
      Err(EngineError::MalformedInput {
        unique_id: 2,
        reason: MalformedReason::InvalidSlotRange,
      })
    );
  }

  // Four teams, one round: every pair exactly once given enough lanes.
  #[test]
  fn full_round_robin_places_every_pair_once() {
    let input = EngineInput {
      unique_id: 7,
      team_groups: vec![collection(&[1, 2, 3, 4])],
      fields: vec![EngineField {
        field_id: 1,
        slots: (0..6).map(|i| slot(i * 2, 2, 1)).collect(),
      }],
      coach_conflicts: vec![],
      is_practice: false,
    };
    let output = run(&input).unwrap();

    assert_eq!(output.unplaced, 0);
    assert_eq!(output.reservations.len(), 6);
    let mut pairs: Vec<_> = output
      .reservations
      .iter()
      .map(|r| unordered(&r.booking))
      .collect();
    pairs.sort_unstable();
    assert_eq!(pairs, vec![(1, 2), (1, 3), (1, 4), (2, 3), (2, 4), (3, 4)]);
  }

  // Two regions of three teams, two rounds each: 12 reservations, none
  // crossing regions.
  #[test]
  fn regional_collections_never_mix() {
    let region_a = [1, 2, 3];
    let region_b = [4, 5, 6];
    let input = EngineInput {
      unique_id: 11,
      team_groups: vec![
        collection(&region_a),
        collection(&region_b),
        collection(&region_a),
        collection(&region_b),
      ],
      fields: vec![EngineField {
        field_id: 1,
        slots: (0..12).map(|i| slot(i * 2, 2, 1)).collect(),
      }],
      coach_conflicts: vec![],
      is_practice: false,
    };
    let output = run(&input).unwrap();

    assert_eq!(output.unplaced, 0);
    assert_eq!(output.reservations.len(), 12);
    for r in &output.reservations {
      let (a, b) = unordered(&r.booking);
      assert_eq!(
        region_a.contains(&a),
        region_a.contains(&b),
        "match {a} vs {b} crosses regions"
      );
    }
  }

  // Coach conflict serializes the two teams even when lanes overlap.
  #[test]
  fn coach_conflict_blocks_overlapping_lanes() {
    let input = EngineInput {
      unique_id: 13,
      team_groups: vec![collection(&[1, 2, 3, 4]), collection(&[1, 2, 3, 4])],
      fields: vec![EngineField {
        field_id: 1,
        slots: (0..8).map(|i| slot(i * 2, 2, 2)).collect(),
      }],
      coach_conflicts: vec![EngineConflict {
        conflict_id: 1,
        region_id: 1,
        teams: vec![1, 2],
      }],
      is_practice: false,
    };
    let output = run(&input).unwrap();

    for r1 in &output.reservations {
      for r2 in &output.reservations {
        if std::ptr::eq(r1, r2) || !overlaps(r1.start, r1.end, r2.start, r2.end) {
          continue;
        }
        let t1: Vec<_> = r1.booking.teams().collect();
        let t2: Vec<_> = r2.booking.teams().collect();
        assert!(
          !(t1.contains(&1) && t2.contains(&2)) && !(t1.contains(&2) && t2.contains(&1)),
          "conflicted teams 1 and 2 overlap: {r1:?} / {r2:?}"
        );
      }
    }
  }

  // Practice rounds: five teams, three rounds, five lanes. One practice
  // per team lands; the remaining two rounds are reported unplaced.
  #[test]
  fn practice_rounds_cover_each_team_before_repeating() {
    let teams = [1, 2, 3, 4, 5];
    let input = EngineInput {
      unique_id: 17,
      team_groups: vec![collection(&teams), collection(&teams), collection(&teams)],
      fields: vec![EngineField {
        field_id: 1,
        slots: (0..5).map(|i| slot(i, 1, 1)).collect(),
      }],
      coach_conflicts: vec![],
      is_practice: true,
    };
    let output = run(&input).unwrap();

    assert_eq!(output.reservations.len(), 5);
    assert_eq!(output.unplaced, 10);
    let mut practiced: Vec<_> = output
      .reservations
      .iter()
      .map(|r| match r.booking {
        Booking::Practice { team } => team,
        Booking::Match { .. } => panic!("practice input produced a match"),
      })
      .collect();
    practiced.sort_unstable();
    assert_eq!(practiced, teams.to_vec());
  }

  #[test]
  fn capacity_bounds_concurrent_reservations() {
    let input = EngineInput {
      unique_id: 19,
      team_groups: vec![collection(&[1, 2, 3, 4, 5, 6, 7, 8])],
      fields: vec![EngineField {
        field_id: 1,
        slots: (0..4).map(|i| slot(i * 2, 2, 2)).collect(),
      }],
      coach_conflicts: vec![],
      is_practice: false,
    };
    let output = run(&input).unwrap();

    assert!(max_concurrent(&output.reservations, 1) <= 2);
    // no team plays twice in overlapping lanes
    for r1 in &output.reservations {
      for r2 in &output.reservations {
        if std::ptr::eq(r1, r2) || !overlaps(r1.start, r1.end, r2.start, r2.end) {
          continue;
        }
        for team in r1.booking.teams() {
          assert!(
            r2.booking.teams().all(|o| o != team),
            "team {team} double-booked"
          );
        }
      }
    }
  }

  #[test]
  fn home_assignment_alternates_per_team() {
    // the same pair twice: each side is home exactly once
    let input = EngineInput {
      unique_id: 23,
      team_groups: vec![collection(&[1, 2]), collection(&[1, 2])],
      fields: vec![EngineField {
        field_id: 1,
        slots: vec![slot(0, 2, 1), slot(2, 2, 1)],
      }],
      coach_conflicts: vec![],
      is_practice: false,
    };
    let output = run(&input).unwrap();

    let homes: Vec<_> = output
      .reservations
      .iter()
      .map(|r| match r.booking {
        Booking::Match { home, .. } => home,
        Booking::Practice { .. } => unreachable!(),
      })
      .collect();
    assert_eq!(homes.len(), 2);
    assert!(homes.contains(&1) && homes.contains(&2));
    // equal counts break toward the smaller id
    assert_eq!(homes[0], 1);
  }

  #[test]
  fn identical_inputs_produce_identical_outputs() {
    let input = EngineInput {
      unique_id: 29,
      team_groups: vec![collection(&[1, 2, 3, 4, 5])],
      fields: vec![EngineField {
        field_id: 1,
        slots: (0..10).map(|i| slot(i * 2, 2, 1)).collect(),
      }],
      coach_conflicts: vec![],
      is_practice: false,
    };
    assert_eq!(run(&input).unwrap(), run(&input).unwrap());
  }

  #[test]
  fn infeasible_inputs_report_unplaced_pairs() {
    let input = EngineInput {
      unique_id: 31,
      team_groups: vec![collection(&[1, 2, 3, 4])],
      fields: vec![EngineField {
        field_id: 1,
        slots: vec![slot(0, 2, 1), slot(2, 2, 1)],
      }],
      coach_conflicts: vec![],
      is_practice: false,
    };
    let output = run(&input).unwrap();

    assert_eq!(output.reservations.len(), 2);
    assert_eq!(output.unplaced, 4);
  }
}
