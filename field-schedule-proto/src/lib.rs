//! Wire schema for the scheduling service.
//!
//! Message shapes and field tags are fixed: peers built against other
//! revisions of this schema must keep interoperating. Scheduling messages
//! travel inside a thin envelope (`ClientFrame`/`ServerFrame`) which also
//! carries authentication, health checks and status reporting; framing is
//! in [`wire`], conversions to and from the core domain types are in
//! [`convert`].

pub mod convert;
pub mod wire;

use thiserror::Error;

/// Hard cap on a single frame body.
pub const MAX_FRAME_LEN: usize = 8 * 1024 * 1024;

/// Errors raised by the codec and the core↔wire conversions.
#[derive(Debug, Error)]
pub enum WireError {
  /// The frame body exceeds [`MAX_FRAME_LEN`].
  #[error("Frame exceeds {MAX_FRAME_LEN} bytes")]
  FrameTooLarge,

  /// The buffer ends before the frame does.
  #[error("Frame is truncated")]
  Truncated,

  /// The body is not a valid message.
  #[error("Malformed message: {0}")]
  Decode(#[from] prost::DecodeError),

  /// A millisecond timestamp does not map onto a valid instant.
  #[error("Timestamp out of range")]
  BadTimestamp,

  /// A required sub-message is absent.
  #[error("Message is missing its {0}")]
  MissingMessage(&'static str),
}

// ── Scheduling messages (tags fixed) ────────────────────────────────

#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct Team {
  #[prost(uint32, tag = "1")]
  pub unique_id: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PlayableTeamCollection {
  #[prost(message, repeated, tag = "1")]
  pub teams: Vec<Team>,
}

/// Instants are milliseconds since the Unix epoch; `concurrency` is the
/// resolved lane capacity of this slot.
#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct TimeSlot {
  #[prost(int64, tag = "1")]
  pub start: i64,
  #[prost(int64, tag = "2")]
  pub end: i64,
  #[prost(uint32, tag = "3")]
  pub concurrency: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Field {
  #[prost(uint32, tag = "1")]
  pub unique_id: u32,
  #[prost(message, repeated, tag = "2")]
  pub time_slots: Vec<TimeSlot>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CoachConflict {
  #[prost(uint32, tag = "1")]
  pub unique_id: u32,
  #[prost(uint32, tag = "2")]
  pub region_id: u32,
  #[prost(message, repeated, tag = "3")]
  pub teams: Vec<Team>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ScheduledInput {
  #[prost(uint32, tag = "1")]
  pub unique_id: u32,
  #[prost(message, repeated, tag = "2")]
  pub team_groups: Vec<PlayableTeamCollection>,
  #[prost(message, repeated, tag = "3")]
  pub fields: Vec<Field>,
  #[prost(message, repeated, tag = "4")]
  pub coach_conflicts: Vec<CoachConflict>,
  #[prost(bool, tag = "5")]
  pub is_practice: bool,
}

/// A practice is encoded as a booking whose home and away team coincide.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Reservation {
  #[prost(message, optional, tag = "1")]
  pub field: Option<Field>,
  #[prost(int64, tag = "2")]
  pub start: i64,
  #[prost(int64, tag = "3")]
  pub end: i64,
  #[prost(message, optional, tag = "4")]
  pub booking: Option<reservation::Booked>,
}

pub mod reservation {
  #[derive(Clone, Copy, PartialEq, ::prost::Message)]
  pub struct Booked {
    #[prost(message, optional, tag = "1")]
    pub home_team: Option<super::Team>,
    #[prost(message, optional, tag = "2")]
    pub away_team: Option<super::Team>,
  }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ScheduledOutput {
  #[prost(uint32, tag = "1")]
  pub unique_id: u32,
  #[prost(message, repeated, tag = "2")]
  pub time_slots: Vec<Reservation>,
}

// ── Envelope ────────────────────────────────────────────────────────

/// First client frame of every call: carries the bearer token.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Hello {
  #[prost(string, tag = "1")]
  pub bearer_token: String,
  #[prost(string, tag = "2")]
  pub client_name: String,
}

/// Successful handshake; echoes the authenticated subject.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct HelloAck {
  #[prost(string, tag = "1")]
  pub subject: String,
}

#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct HealthCheckRequest {}

#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct HealthCheckResponse {
  #[prost(enumeration = "ServingStatus", tag = "1")]
  pub status: i32,
}

/// The client is done sending inputs; the server flushes and closes.
#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct Complete {}

/// Status reporting, both for per-input errors (the stream stays open)
/// and for terminal conditions. `unplaced` carries the unplaced-pairs
/// diagnostic accompanying a partial output (`code == Ok`).
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StatusFrame {
  #[prost(enumeration = "StatusCode", tag = "1")]
  pub code: i32,
  #[prost(string, tag = "2")]
  pub message: String,
  #[prost(uint32, tag = "3")]
  pub unique_id: u32,
  #[prost(uint32, tag = "4")]
  pub unplaced: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ClientFrame {
  #[prost(oneof = "client_frame::Payload", tags = "1, 2, 3, 4")]
  pub payload: Option<client_frame::Payload>,
}

pub mod client_frame {
  #[derive(Clone, PartialEq, ::prost::Oneof)]
  pub enum Payload {
    #[prost(message, tag = "1")]
    Hello(super::Hello),
    #[prost(message, tag = "2")]
    Input(super::ScheduledInput),
    #[prost(message, tag = "3")]
    Health(super::HealthCheckRequest),
    #[prost(message, tag = "4")]
    Complete(super::Complete),
  }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ServerFrame {
  #[prost(oneof = "server_frame::Payload", tags = "1, 2, 3, 4")]
  pub payload: Option<server_frame::Payload>,
}

pub mod server_frame {
  #[derive(Clone, PartialEq, ::prost::Oneof)]
  pub enum Payload {
    #[prost(message, tag = "1")]
    HelloAck(super::HelloAck),
    #[prost(message, tag = "2")]
    Output(super::ScheduledOutput),
    #[prost(message, tag = "3")]
    Health(super::HealthCheckResponse),
    #[prost(message, tag = "4")]
    Status(super::StatusFrame),
  }
}

impl ClientFrame {
  pub fn hello(bearer_token: impl Into<String>, client_name: impl Into<String>) -> Self {
    Self {
      payload: Some(client_frame::Payload::Hello(Hello {
        bearer_token: bearer_token.into(),
        client_name: client_name.into(),
      })),
    }
  }

  pub fn input(input: ScheduledInput) -> Self {
    Self {
      payload: Some(client_frame::Payload::Input(input)),
    }
  }

  pub fn health() -> Self {
    Self {
      payload: Some(client_frame::Payload::Health(HealthCheckRequest {})),
    }
  }

  pub fn complete() -> Self {
    Self {
      payload: Some(client_frame::Payload::Complete(Complete {})),
    }
  }
}

impl ServerFrame {
  pub fn hello_ack(subject: impl Into<String>) -> Self {
    Self {
      payload: Some(server_frame::Payload::HelloAck(HelloAck {
        subject: subject.into(),
      })),
    }
  }

  pub fn output(output: ScheduledOutput) -> Self {
    Self {
      payload: Some(server_frame::Payload::Output(output)),
    }
  }

  pub fn health(status: ServingStatus) -> Self {
    Self {
      payload: Some(server_frame::Payload::Health(HealthCheckResponse {
        status: status as i32,
      })),
    }
  }

  pub fn status(code: StatusCode, message: impl Into<String>) -> Self {
    Self {
      payload: Some(server_frame::Payload::Status(StatusFrame {
        code: code as i32,
        message: message.into(),
        unique_id: 0,
        unplaced: 0,
      })),
    }
  }

  pub fn input_status(code: StatusCode, unique_id: u32, message: impl Into<String>) -> Self {
    Self {
      payload: Some(server_frame::Payload::Status(StatusFrame {
        code: code as i32,
        message: message.into(),
        unique_id,
        unplaced: 0,
      })),
    }
  }

  pub fn unplaced_warning(unique_id: u32, unplaced: u32) -> Self {
    Self {
      payload: Some(server_frame::Payload::Status(StatusFrame {
        code: StatusCode::Ok as i32,
        message: format!("{unplaced} pairings could not be placed"),
        unique_id,
        unplaced,
      })),
    }
  }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum StatusCode {
  Ok = 0,
  Unauthenticated = 1,
  PermissionDenied = 2,
  ResourceExhausted = 3,
  DeadlineExceeded = 4,
  InvalidArgument = 5,
  Internal = 6,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum ServingStatus {
  Unknown = 0,
  Serving = 1,
  NotServing = 2,
}
