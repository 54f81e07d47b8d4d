//! Client side of the scheduling stream.
//!
//! Dials the service, authenticates with a bearer token, pumps
//! `ScheduledInput` frames in and collects outputs keyed by `unique_id`.
//! The contractual cooldown between schedule calls is enforced by the
//! orchestrator, which owns the call cadence.

use std::collections::{BTreeMap, HashSet};
use std::io;
use std::time::Duration;

use prost::Message;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use field_schedule_proto::wire::{HEADER_LEN, body_len, encode_frame};
use field_schedule_proto::{
  ClientFrame, ScheduledInput, ScheduledOutput, ServerFrame, ServingStatus, StatusCode,
  StatusFrame, WireError, server_frame,
};

/// Budget for one health probe round trip.
pub const HEALTH_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum ClientError {
  #[error(transparent)]
  Io(#[from] io::Error),

  #[error(transparent)]
  Wire(#[from] WireError),

  #[error("Server rejected the call ({code:?}): {message}")]
  Rejected { code: StatusCode, message: String },

  #[error("Server closed the stream before answering every input")]
  ServerClosed,

  #[error("Unexpected frame from the server")]
  UnexpectedFrame,

  #[error("Health probe timed out")]
  ProbeTimeout,
}

/// Everything one exchange produced: outputs by input id, unplaced-pair
/// warnings, and per-input error statuses.
#[derive(Debug, Default)]
pub struct StreamOutcome {
  pub outputs: BTreeMap<u32, ScheduledOutput>,
  pub warnings: Vec<StatusFrame>,
  pub errors: Vec<StatusFrame>,
}

pub struct StreamClient {
  stream: TcpStream,
}

impl StreamClient {
  /// Dial `addr` (`host:port`, optional scheme prefix tolerated).
  pub async fn connect(addr: &str) -> io::Result<Self> {
    let trimmed = addr
      .strip_prefix("grpc://")
      .or_else(|| addr.strip_prefix("https://"))
      .or_else(|| addr.strip_prefix("http://"))
      .unwrap_or(addr);
    Ok(Self {
      stream: TcpStream::connect(trimmed).await?,
    })
  }

  async fn send(&mut self, frame: &ClientFrame) -> Result<(), ClientError> {
    let bytes = encode_frame(frame)?;
    self.stream.write_all(&bytes).await?;
    Ok(())
  }

  async fn recv(&mut self) -> Result<Option<ServerFrame>, ClientError> {
    let mut header = [0u8; HEADER_LEN];
    match self.stream.read_exact(&mut header).await {
      Ok(_) => {}
      Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
      Err(err) => return Err(err.into()),
    }
    let len = body_len(header)?;
    let mut body = vec![0u8; len];
    self.stream.read_exact(&mut body).await?;
    Ok(Some(ServerFrame::decode(body.as_slice()).map_err(WireError::from)?))
  }

  fn status_code(status: &StatusFrame) -> StatusCode {
    StatusCode::try_from(status.code).unwrap_or(StatusCode::Internal)
  }

  /// Authenticate; returns the subject the server accounted the call to.
  pub async fn handshake(
    &mut self,
    bearer_token: &str,
    client_name: &str,
  ) -> Result<String, ClientError> {
    self
      .send(&ClientFrame::hello(bearer_token, client_name))
      .await?;
    match self.recv().await? {
      Some(ServerFrame {
        payload: Some(server_frame::Payload::HelloAck(ack)),
      }) => Ok(ack.subject),
      Some(ServerFrame {
        payload: Some(server_frame::Payload::Status(status)),
      }) => Err(ClientError::Rejected {
        code: Self::status_code(&status),
        message: status.message,
      }),
      Some(_) => Err(ClientError::UnexpectedFrame),
      None => Err(ClientError::ServerClosed),
    }
  }

  /// Application-layer health probe with the 2-second budget.
  pub async fn health(&mut self) -> Result<ServingStatus, ClientError> {
    self.send(&ClientFrame::health()).await?;
    let frame = timeout(HEALTH_PROBE_TIMEOUT, self.recv())
      .await
      .map_err(|_| ClientError::ProbeTimeout)??;
    match frame {
      Some(ServerFrame {
        payload: Some(server_frame::Payload::Health(health)),
      }) => Ok(ServingStatus::try_from(health.status).unwrap_or(ServingStatus::Unknown)),
      Some(_) => Err(ClientError::UnexpectedFrame),
      None => Err(ClientError::ServerClosed),
    }
  }

  /// Send a batch of inputs and read until each is answered by an
  /// output or an error status. Outputs for distinct ids may arrive as
  /// soon as computed; warnings ride alongside and resolve nothing.
  pub async fn exchange(
    &mut self,
    inputs: Vec<ScheduledInput>,
  ) -> Result<StreamOutcome, ClientError> {
    let mut pending: HashSet<u32> = inputs.iter().map(|i| i.unique_id).collect();
    for input in inputs {
      self.send(&ClientFrame::input(input)).await?;
    }

    let mut outcome = StreamOutcome::default();
    while !pending.is_empty() {
      match self.recv().await? {
        Some(ServerFrame {
          payload: Some(server_frame::Payload::Output(output)),
        }) => {
          pending.remove(&output.unique_id);
          outcome.outputs.insert(output.unique_id, output);
        }
        Some(ServerFrame {
          payload: Some(server_frame::Payload::Status(status)),
        }) => {
          let code = Self::status_code(&status);
          if status.unique_id == 0 {
            // terminal stream-level status
            return Err(ClientError::Rejected {
              code,
              message: status.message,
            });
          }
          if code == StatusCode::Ok {
            outcome.warnings.push(status);
          } else {
            pending.remove(&status.unique_id);
            outcome.errors.push(status);
          }
        }
        Some(_) => return Err(ClientError::UnexpectedFrame),
        None => return Err(ClientError::ServerClosed),
      }
    }
    Ok(outcome)
  }

  /// Signal completion and close the write half.
  pub async fn finish(mut self) -> Result<(), ClientError> {
    self.send(&ClientFrame::complete()).await?;
    self.stream.shutdown().await?;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use field_schedule_proto::{Field, PlayableTeamCollection, Team, TimeSlot};
  use field_schedule_server::auth::StaticKeyVerifier;
  use field_schedule_server::config::ServerConfig;
  use field_schedule_server::service::SchedulerService;
  use field_schedule_server::usage::LogUsageSink;
  use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
  use serde::Serialize;
  use std::sync::Arc;

  const SECRET: &[u8] = b"client-test-secret";
  const ISSUER: &str = "https://auth.example.com";

  #[derive(Serialize)]
  struct TestClaims {
    sub: String,
    iss: String,
    exp: i64,
  }

  fn token(sub: &str) -> String {
    let claims = TestClaims {
      sub: sub.to_string(),
      iss: ISSUER.to_string(),
      exp: chrono::Utc::now().timestamp() + 600,
    };
    encode(
      &Header::new(Algorithm::HS256),
      &claims,
      &EncodingKey::from_secret(SECRET),
    )
    .unwrap()
  }

  async fn spawn_server() -> String {
    let config = ServerConfig {
      bind_addr: "127.0.0.1:0".parse().unwrap(),
      auth_server_url: ISSUER.to_string(),
      audiences: Vec::new(),
      usage_hook_url: None,
      schedule_creation_delay: Duration::ZERO,
      tls: None,
      idle_timeout: Duration::from_secs(5),
      stream_deadline: Duration::from_secs(60),
    };
    let verifier = Arc::new(StaticKeyVerifier::hs256(SECRET, ISSUER, &[]));
    let service = Arc::new(SchedulerService::new(verifier, Arc::new(LogUsageSink), &config));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    tokio::spawn(async move {
      let _ = service.serve(listener, None).await;
    });
    addr
  }

  fn input(unique_id: u32) -> ScheduledInput {
    ScheduledInput {
      unique_id,
      team_groups: vec![PlayableTeamCollection {
        teams: vec![Team { unique_id: 1 }, Team { unique_id: 2 }],
      }],
      fields: vec![Field {
        unique_id: 1,
        time_slots: vec![TimeSlot {
          start: 1_760_000_000_000,
          end: 1_760_007_200_000,
          concurrency: 1,
        }],
      }],
      coach_conflicts: vec![],
      is_practice: false,
    }
  }

  #[tokio::test]
  async fn connects_schedules_and_finishes() {
    let addr = spawn_server().await;
    let mut client = StreamClient::connect(&addr).await.unwrap();

    let subject = client.handshake(&token("coach"), "backend").await.unwrap();
    assert_eq!(subject, "coach");

    let outcome = client.exchange(vec![input(1), input(2)]).await.unwrap();
    assert_eq!(outcome.outputs.len(), 2);
    assert!(outcome.errors.is_empty());
    assert_eq!(outcome.outputs[&1].time_slots.len(), 1);

    client.finish().await.unwrap();
  }

  #[tokio::test]
  async fn health_probe_reports_serving() {
    let addr = spawn_server().await;
    let mut client = StreamClient::connect(&addr).await.unwrap();
    assert_eq!(client.health().await.unwrap(), ServingStatus::Serving);
  }

  #[tokio::test]
  async fn bad_token_surfaces_rejection() {
    let addr = spawn_server().await;
    let mut client = StreamClient::connect(&addr).await.unwrap();

    let err = client.handshake("not-a-jwt", "backend").await.unwrap_err();
    match err {
      ClientError::Rejected { code, .. } => assert_eq!(code, StatusCode::Unauthenticated),
      other => panic!("expected rejection, got {other:?}"),
    }
  }
}
