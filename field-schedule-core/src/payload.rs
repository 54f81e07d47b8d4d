//! Payload construction: from a validated configuration to engine inputs.
//!
//! One [`EngineInput`] is emitted per schedulable target and season phase.
//! The wire schema carries no matches-per-pair field, so multiplicity is
//! encoded by repeating each team collection `matches_to_play` times; the
//! engine enumerates every unordered pair once per repetition. A follow-up
//! phase passes the slot claims of the earlier one so shared field pools
//! are not double-booked.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::analyzer::{AnalyzerConfig, PreScheduleReport, eligible_teams};
use crate::engine::{EngineConflict, EngineField, EngineInput, EngineSlot, TeamCollection};
use crate::model::{
  CoachConflict, ConcurrencyTable, Field, FieldId, ReservationType, Target, TargetId, Team,
  TimeSlot,
};

/// The season phase a payload belongs to. Phases are independent
/// scheduling passes over the same field pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SeasonPhase {
  Normal,
  Post,
}

/// A slot claimed by an earlier phase, identified by its field and start
/// instant (a field holds at most one slot per start).
pub type SlotClaim = (FieldId, DateTime<Utc>);

/// Borrowed view of everything the builder reads.
#[derive(Debug, Clone, Copy)]
pub struct PayloadContext<'a> {
  pub report: &'a PreScheduleReport,
  pub targets: &'a [Target],
  pub teams: &'a [Team],
  pub fields: &'a [Field],
  pub slots: &'a [TimeSlot],
  pub reservation_types: &'a [ReservationType],
  pub concurrency: &'a ConcurrencyTable,
  pub coach_conflicts: &'a [CoachConflict],
}

/// An engine input annotated with its origin, so diagnostics can be
/// attributed back to a target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuiltPayload {
  pub target_id: TargetId,
  pub phase: SeasonPhase,
  pub input: EngineInput,
}

/// Build the engine inputs for one phase. `first_unique_id` seeds the
/// sequential id assignment so two phases on one stream never collide.
pub fn build_payloads(
  config: &AnalyzerConfig,
  ctx: &PayloadContext<'_>,
  phase: SeasonPhase,
  claimed: &HashSet<SlotClaim>,
  first_unique_id: u32,
) -> Vec<BuiltPayload> {
  let mut payloads = Vec::new();
  let mut unique_id = first_unique_id;

  for target in ctx.targets {
    if !ctx.report.is_schedulable(target.id) {
      continue;
    }

    let is_practice = target
      .reservation_type_id
      .and_then(|id| ctx.reservation_types.iter().find(|t| t.id == id))
      .is_some_and(|t| t.is_practice);
    let eligible = eligible_teams(target, ctx.teams);
    let eligible_ids: HashSet<_> = eligible.iter().map(|t| t.id).collect();

    // One collection per region, or one pooled collection; repeated once
    // per round.
    let mut collections: Vec<TeamCollection> = Vec::new();
    if config.interregional {
      let mut teams: Vec<_> = eligible.iter().map(|t| t.id).collect();
      teams.sort_unstable();
      if !teams.is_empty() {
        collections.push(TeamCollection { teams });
      }
    } else {
      let mut regions: Vec<_> = eligible.iter().map(|t| t.region_id).collect();
      regions.sort_unstable();
      regions.dedup();
      // a match needs two eligible teams; a practice books a single team
      let floor = if is_practice { 1 } else { 2 };
      for region in regions {
        let mut teams: Vec<_> = eligible
          .iter()
          .filter(|t| t.region_id == region)
          .map(|t| t.id)
          .collect();
        teams.sort_unstable();
        if teams.len() >= floor {
          collections.push(TeamCollection { teams });
        }
      }
    }
    let team_groups: Vec<TeamCollection> = (0..config.matches_to_play)
      .flat_map(|_| collections.iter().cloned())
      .collect();

    // Fields carrying at least one usable, unclaimed slot under the
    // target's reservation-type filter.
    let mut fields: Vec<EngineField> = Vec::new();
    for field in ctx.fields {
      let slots: Vec<EngineSlot> = ctx
        .slots
        .iter()
        .filter(|slot| slot.field_id == field.id)
        .filter(|slot| {
          target
            .reservation_type_id
            .is_none_or(|filter| slot.reservation_type_id == filter)
        })
        .filter(|slot| !claimed.contains(&(slot.field_id, slot.start)))
        .map(|slot| EngineSlot {
          start: slot.start,
          end: slot.end,
          concurrency: ctx.concurrency.capacity(field.id, slot.reservation_type_id),
        })
        .collect();
      if !slots.is_empty() {
        fields.push(EngineField {
          field_id: field.id,
          slots,
        });
      }
    }

    // Conflicts apply only when every member is eligible for this target.
    let coach_conflicts: Vec<EngineConflict> = ctx
      .coach_conflicts
      .iter()
      .filter(|c| c.team_ids.iter().all(|id| eligible_ids.contains(id)))
      .map(|c| EngineConflict {
        conflict_id: c.id,
        region_id: c.region_id,
        teams: c.team_ids.iter().copied().collect(),
      })
      .collect();

    payloads.push(BuiltPayload {
      target_id: target.id,
      phase,
      input: EngineInput {
        unique_id,
        team_groups,
        fields,
        coach_conflicts,
        is_practice,
      },
    });
    unique_id += 1;
  }

  payloads
}

/// Slot claims made by a set of reservations, for feeding the next phase.
pub fn claims_of<'a>(
  reservations: impl IntoIterator<Item = &'a crate::model::Reservation>,
) -> HashSet<SlotClaim> {
  reservations
    .into_iter()
    .map(|r| (r.field_id, r.start))
    .collect()
}
