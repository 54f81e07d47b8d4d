//! End-to-end scheduling runs.
//!
//! One run per user action: analyze, abort on blocking configuration
//! errors, build payloads, exchange them over the stream (post-season as
//! a second pass on the same call, consuming the slots the first pass
//! claimed), and commit the result as a single schedule. The cooldown
//! between runs is enforced here, client-side, as the service contract
//! requires.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use field_schedule_core::analyzer::{
  self, AnalyzerConfig, AnalyzerError, AnalyzerSnapshot, PreScheduleReport,
};
use field_schedule_core::model::{
  CoachConflict, ConcurrencyTable, Field, Reservation, Schedule, Team, TimeSlot,
  ValidationError, validate_name,
};
use field_schedule_core::payload::{
  BuiltPayload, PayloadContext, SeasonPhase, SlotClaim, build_payloads, claims_of,
};
use field_schedule_proto::convert::reservations_from_output;
use field_schedule_proto::{ScheduledInput, WireError};

use crate::client::{ClientError, StreamClient, StreamOutcome};
use crate::store::{EntityStore, StoreError};

/// The transport a run schedules through. `StreamClient` is the real
/// one; tests plug in a loopback.
#[async_trait]
pub trait ScheduleStream {
  async fn exchange(&mut self, inputs: Vec<ScheduledInput>)
  -> Result<StreamOutcome, ClientError>;
}

#[async_trait]
impl ScheduleStream for StreamClient {
  async fn exchange(
    &mut self,
    inputs: Vec<ScheduledInput>,
  ) -> Result<StreamOutcome, ClientError> {
    StreamClient::exchange(self, inputs).await
  }
}

#[derive(Debug, Clone)]
pub struct RunOptions {
  pub name: String,
  pub matches_to_play: u8,
  pub interregional: bool,
  pub include_post_phase: bool,
}

#[derive(Debug, Error)]
pub enum OrchestratorError {
  #[error("Scheduling is cooling down; retry in {0:?}")]
  Cooldown(Duration),

  #[error(transparent)]
  Analyzer(#[from] AnalyzerError),

  #[error(transparent)]
  Validation(#[from] ValidationError),

  /// Duplicate, impossible or undersupplied targets block scheduling;
  /// the full report rides along for display.
  #[error("Pre-schedule analysis found blocking configuration errors")]
  BlockedByReport(Box<PreScheduleReport>),

  #[error(transparent)]
  Store(#[from] StoreError),

  #[error(transparent)]
  Client(#[from] ClientError),

  #[error(transparent)]
  Wire(#[from] WireError),

  #[error("The service answered no output for input {0}")]
  MissingOutput(u32),
}

/// What a successful run produced.
#[derive(Debug)]
pub struct RunSummary {
  pub schedule: Schedule,
  pub report: PreScheduleReport,
  /// Pairings the engine could not place, summed across phases.
  pub unplaced: u32,
}

pub struct Orchestrator<S, C> {
  store: S,
  stream: C,
  cooldown: Duration,
  last_run: Option<Instant>,
}

impl<S: EntityStore, C: ScheduleStream> Orchestrator<S, C> {
  pub fn new(store: S, stream: C, cooldown: Duration) -> Self {
    Self {
      store,
      stream,
      cooldown,
      last_run: None,
    }
  }

  pub fn store(&self) -> &S {
    &self.store
  }

  pub async fn run(&mut self, options: &RunOptions) -> Result<RunSummary, OrchestratorError> {
    if let Some(last) = self.last_run {
      let since = last.elapsed();
      if since < self.cooldown {
        return Err(OrchestratorError::Cooldown(self.cooldown - since));
      }
    }
    let name = validate_name(&options.name)?;

    // one consistent snapshot through the facade
    let regions = self.store.regions()?;
    let mut teams: Vec<Team> = Vec::new();
    let mut fields: Vec<Field> = Vec::new();
    let mut conflicts: Vec<CoachConflict> = Vec::new();
    for region in &regions {
      teams.extend(self.store.teams_of_region(region.id)?);
      fields.extend(self.store.fields_of_region(region.id)?);
      conflicts.extend(self.store.coach_conflicts_of_region(region.id)?);
    }
    let mut slots: Vec<TimeSlot> = Vec::new();
    let mut overrides = Vec::new();
    for field in &fields {
      slots.extend(self.store.slots_of_field(field.id, None)?);
      overrides.extend(self.store.overrides_of_field(field.id)?);
    }
    let reservation_types = self.store.reservation_types()?;
    let targets = self.store.targets()?;
    let table = ConcurrencyTable::new(&reservation_types, &overrides);

    let config = AnalyzerConfig::builder()
      .matches_to_play(options.matches_to_play)
      .interregional(options.interregional)
      .build();
    let report = analyzer::analyze(
      &config,
      &AnalyzerSnapshot {
        targets: &targets,
        teams: &teams,
        fields: &fields,
        slots: &slots,
        reservation_types: &reservation_types,
        concurrency: &table,
      },
    )?;
    if report.has_blocking_errors() {
      return Err(OrchestratorError::BlockedByReport(Box::new(report)));
    }

    let ctx = PayloadContext {
      report: &report,
      targets: &targets,
      teams: &teams,
      fields: &fields,
      slots: &slots,
      reservation_types: &reservation_types,
      concurrency: &table,
      coach_conflicts: &conflicts,
    };
    let normal = build_payloads(&config, &ctx, SeasonPhase::Normal, &HashSet::new(), 1);
    let (mut reservations, mut unplaced) = run_phase(&mut self.stream, &normal).await?;

    if options.include_post_phase {
      let claimed: HashSet<SlotClaim> = claims_of(&reservations);
      let next_id = normal.len() as u32 + 1;
      let post = build_payloads(&config, &ctx, SeasonPhase::Post, &claimed, next_id);
      let (post_reservations, post_unplaced) = run_phase(&mut self.stream, &post).await?;
      reservations.extend(post_reservations);
      unplaced += post_unplaced;
    }

    let now = Utc::now();
    let schedule = Schedule {
      id: Uuid::now_v7(),
      name,
      created: now,
      last_edited: now,
      reservations,
    };
    self.store.insert_schedule(&schedule)?;
    self.last_run = Some(Instant::now());

    if unplaced > 0 {
      warn!(unplaced, schedule = %schedule.id, "schedule committed with unplaced pairings");
    } else {
      info!(schedule = %schedule.id, reservations = schedule.reservations.len(), "schedule committed");
    }
    Ok(RunSummary {
      schedule,
      report,
      unplaced,
    })
  }
}

async fn run_phase<C: ScheduleStream>(
  stream: &mut C,
  payloads: &[BuiltPayload],
) -> Result<(Vec<Reservation>, u32), OrchestratorError> {
  if payloads.is_empty() {
    return Ok((Vec::new(), 0));
  }
  let inputs: Vec<ScheduledInput> = payloads.iter().map(|p| (&p.input).into()).collect();
  let outcome = stream.exchange(inputs).await?;

  let mut reservations = Vec::new();
  for payload in payloads {
    let id = payload.input.unique_id;
    if let Some(output) = outcome.outputs.get(&id) {
      reservations.extend(reservations_from_output(output)?);
    } else if outcome.errors.iter().any(|e| e.unique_id == id) {
      // the service rejected this input; its target simply yields no
      // reservations in this run
      warn!(unique_id = id, target = payload.target_id, "input rejected by the service");
    } else {
      return Err(OrchestratorError::MissingOutput(id));
    }
  }
  let unplaced = outcome.warnings.iter().map(|w| w.unplaced).sum();
  Ok((reservations, unplaced))
}
