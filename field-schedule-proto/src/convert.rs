//! Conversions between the core domain types and the wire schema.
//!
//! The wire carries instants as milliseconds since the Unix epoch; the
//! domain uses `DateTime<Utc>`. Inbound conversions are fallible because a
//! peer can send arbitrary integers.

use chrono::{DateTime, Utc};
use field_schedule_core::engine::{
  EngineConflict, EngineField, EngineInput, EngineOutput, EngineSlot, TeamCollection,
};
use field_schedule_core::model::{Booking, Reservation as CoreReservation};

use crate::{
  CoachConflict, Field, PlayableTeamCollection, Reservation, ScheduledInput, ScheduledOutput,
  Team, TimeSlot, WireError, reservation,
};

fn to_millis(instant: DateTime<Utc>) -> i64 {
  instant.timestamp_millis()
}

fn from_millis(millis: i64) -> Result<DateTime<Utc>, WireError> {
  DateTime::from_timestamp_millis(millis).ok_or(WireError::BadTimestamp)
}

impl From<&EngineInput> for ScheduledInput {
  fn from(input: &EngineInput) -> Self {
    ScheduledInput {
      unique_id: input.unique_id,
      team_groups: input
        .team_groups
        .iter()
        .map(|collection| PlayableTeamCollection {
          teams: collection
            .teams
            .iter()
            .map(|&id| Team { unique_id: id })
            .collect(),
        })
        .collect(),
      fields: input
        .fields
        .iter()
        .map(|field| Field {
          unique_id: field.field_id,
          time_slots: field
            .slots
            .iter()
            .map(|slot| TimeSlot {
              start: to_millis(slot.start),
              end: to_millis(slot.end),
              concurrency: u32::from(slot.concurrency),
            })
            .collect(),
        })
        .collect(),
      coach_conflicts: input
        .coach_conflicts
        .iter()
        .map(|conflict| CoachConflict {
          unique_id: conflict.conflict_id,
          region_id: conflict.region_id,
          teams: conflict
            .teams
            .iter()
            .map(|&id| Team { unique_id: id })
            .collect(),
        })
        .collect(),
      is_practice: input.is_practice,
    }
  }
}

impl TryFrom<ScheduledInput> for EngineInput {
  type Error = WireError;

  fn try_from(input: ScheduledInput) -> Result<Self, WireError> {
    let mut fields = Vec::with_capacity(input.fields.len());
    for field in input.fields {
      let mut slots = Vec::with_capacity(field.time_slots.len());
      for slot in field.time_slots {
        slots.push(EngineSlot {
          start: from_millis(slot.start)?,
          end: from_millis(slot.end)?,
          // lane capacity is bounded far below u8::MAX; saturate rather
          // than reject so a sloppy peer degrades instead of failing
          concurrency: slot.concurrency.min(u32::from(u8::MAX)) as u8,
        });
      }
      fields.push(EngineField {
        field_id: field.unique_id,
        slots,
      });
    }
    Ok(EngineInput {
      unique_id: input.unique_id,
      team_groups: input
        .team_groups
        .into_iter()
        .map(|collection| TeamCollection {
          teams: collection.teams.into_iter().map(|t| t.unique_id).collect(),
        })
        .collect(),
      fields,
      coach_conflicts: input
        .coach_conflicts
        .into_iter()
        .map(|conflict| EngineConflict {
          conflict_id: conflict.unique_id,
          region_id: conflict.region_id,
          teams: conflict.teams.into_iter().map(|t| t.unique_id).collect(),
        })
        .collect(),
      is_practice: input.is_practice,
    })
  }
}

impl From<&EngineOutput> for ScheduledOutput {
  fn from(output: &EngineOutput) -> Self {
    ScheduledOutput {
      unique_id: output.unique_id,
      time_slots: output
        .reservations
        .iter()
        .map(|r| {
          let (home, away) = match r.booking {
            Booking::Match { home, away } => (home, away),
            // a practice is its team playing "itself"
            Booking::Practice { team } => (team, team),
          };
          Reservation {
            field: Some(Field {
              unique_id: r.field_id,
              time_slots: Vec::new(),
            }),
            start: to_millis(r.start),
            end: to_millis(r.end),
            booking: Some(reservation::Booked {
              home_team: Some(Team { unique_id: home }),
              away_team: Some(Team { unique_id: away }),
            }),
          }
        })
        .collect(),
    }
  }
}

/// Decode the reservations of a wire output back into domain values.
pub fn reservations_from_output(
  output: &ScheduledOutput,
) -> Result<Vec<CoreReservation>, WireError> {
  let mut reservations = Vec::with_capacity(output.time_slots.len());
  for slot in &output.time_slots {
    let field = slot.field.as_ref().ok_or(WireError::MissingMessage("field"))?;
    let booked = slot
      .booking
      .as_ref()
      .ok_or(WireError::MissingMessage("booking"))?;
    let home = booked
      .home_team
      .ok_or(WireError::MissingMessage("home team"))?
      .unique_id;
    let away = booked
      .away_team
      .ok_or(WireError::MissingMessage("away team"))?
      .unique_id;
    let booking = if home == away {
      Booking::Practice { team: home }
    } else {
      Booking::Match { home, away }
    };
    reservations.push(CoreReservation {
      field_id: field.unique_id,
      start: from_millis(slot.start)?,
      end: from_millis(slot.end)?,
      booking,
    });
  }
  Ok(reservations)
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::TimeZone;

  fn sample_input() -> EngineInput {
    let base = Utc.with_ymd_and_hms(2026, 6, 13, 10, 0, 0).unwrap();
    EngineInput {
      unique_id: 12,
      team_groups: vec![TeamCollection { teams: vec![1, 2, 3] }],
      fields: vec![EngineField {
        field_id: 4,
        slots: vec![EngineSlot {
          start: base,
          end: base + chrono::Duration::hours(2),
          concurrency: 2,
        }],
      }],
      coach_conflicts: vec![EngineConflict {
        conflict_id: 7,
        region_id: 1,
        teams: vec![1, 2],
      }],
      is_practice: false,
    }
  }

  #[test]
  fn engine_input_survives_the_wire() {
    let input = sample_input();
    let wire: ScheduledInput = (&input).into();
    let back = EngineInput::try_from(wire).unwrap();
    assert_eq!(back, input);
  }

  #[test]
  fn bad_timestamp_is_rejected() {
    let mut wire: ScheduledInput = (&sample_input()).into();
    wire.fields[0].time_slots[0].start = i64::MAX;
    assert!(matches!(
      EngineInput::try_from(wire),
      Err(WireError::BadTimestamp)
    ));
  }

  #[test]
  fn practice_bookings_collapse_to_one_team() {
    let base = Utc.with_ymd_and_hms(2026, 6, 13, 10, 0, 0).unwrap();
    let output = EngineOutput {
      unique_id: 5,
      reservations: vec![
        CoreReservation {
          field_id: 1,
          start: base,
          end: base + chrono::Duration::hours(1),
          booking: Booking::Practice { team: 9 },
        },
        CoreReservation {
          field_id: 1,
          start: base + chrono::Duration::hours(1),
          end: base + chrono::Duration::hours(2),
          booking: Booking::Match { home: 1, away: 2 },
        },
      ],
      unplaced: 0,
    };

    let wire: ScheduledOutput = (&output).into();
    let booked = wire.time_slots[0].booking.unwrap();
    assert_eq!(booked.home_team.unwrap().unique_id, 9);
    assert_eq!(booked.away_team.unwrap().unique_id, 9);

    let back = reservations_from_output(&wire).unwrap();
    assert_eq!(back, output.reservations);
  }

  #[test]
  fn missing_booking_is_an_error() {
    let output = ScheduledOutput {
      unique_id: 1,
      time_slots: vec![Reservation {
        field: Some(Field {
          unique_id: 1,
          time_slots: Vec::new(),
        }),
        start: 0,
        end: 1000,
        booking: None,
      }],
    };
    assert!(matches!(
      reservations_from_output(&output),
      Err(WireError::MissingMessage("booking"))
    ));
  }
}
