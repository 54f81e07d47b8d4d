//! The bidirectional scheduling stream.
//!
//! One tokio task per connection. A connection must authenticate with a
//! `Hello` frame before sending inputs; health checks are answered at any
//! point. Inputs are processed sequentially, so outputs leave in input
//! order; a malformed input is answered with a status frame and the
//! stream stays open. The engine runs inline: the work is CPU-bound and
//! small, and each task owns its request state exclusively.

use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use prost::Message;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::time::timeout;
use tracing::{info, warn};

use field_schedule_core::engine::{self, EngineError, EngineInput};
use field_schedule_proto::wire::{HEADER_LEN, body_len, encode_frame};
use field_schedule_proto::{
  ClientFrame, ServerFrame, ServingStatus, StatusCode, WireError, client_frame,
};

use crate::auth::TokenVerifier;
use crate::config::ServerConfig;
use crate::usage::UsageSink;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
  #[error(transparent)]
  Io(#[from] io::Error),

  #[error(transparent)]
  Wire(#[from] WireError),
}

pub struct SchedulerService {
  verifier: Arc<dyn TokenVerifier>,
  usage: Arc<dyn UsageSink>,
  min_gap: Duration,
  idle_timeout: Duration,
  stream_deadline: Duration,
  last_call: DashMap<String, Instant>,
}

impl SchedulerService {
  pub fn new(
    verifier: Arc<dyn TokenVerifier>,
    usage: Arc<dyn UsageSink>,
    config: &ServerConfig,
  ) -> Self {
    Self {
      verifier,
      usage,
      min_gap: config.schedule_creation_delay,
      idle_timeout: config.idle_timeout,
      stream_deadline: config.stream_deadline,
      last_call: DashMap::new(),
    }
  }

  /// Accept loop: one task per connection, TLS first when configured.
  pub async fn serve(
    self: Arc<Self>,
    listener: TcpListener,
    tls: Option<tokio_rustls::TlsAcceptor>,
  ) -> io::Result<()> {
    info!(addr = %listener.local_addr()?, "scheduler listening");
    loop {
      let (stream, peer) = listener.accept().await?;
      let service = Arc::clone(&self);
      let tls = tls.clone();
      tokio::spawn(async move {
        let result = match tls {
          Some(acceptor) => match acceptor.accept(stream).await {
            Ok(tls_stream) => service.handle_connection(tls_stream).await,
            Err(err) => {
              warn!(%peer, %err, "TLS handshake failed");
              return;
            }
          },
          None => service.handle_connection(stream).await,
        };
        if let Err(err) = result {
          warn!(%peer, %err, "connection handler failed");
        }
      });
    }
  }

  /// Drive one stream to completion. Generic over the transport so tests
  /// can feed it an in-memory duplex pipe.
  pub async fn handle_connection<S>(&self, stream: S) -> Result<(), ServiceError>
  where
    S: AsyncRead + AsyncWrite + Unpin,
  {
    let (mut reader, mut writer) = tokio::io::split(stream);
    let deadline = tokio::time::Instant::now() + self.stream_deadline;
    let mut subject: Option<String> = None;

    loop {
      let inbound = match tokio::time::timeout_at(
        deadline,
        timeout(self.idle_timeout, read_client_frame(&mut reader)),
      )
      .await
      {
        Err(_) => {
          let status = ServerFrame::status(StatusCode::DeadlineExceeded, "stream deadline elapsed");
          write_frame(&mut writer, &status).await?;
          break;
        }
        Ok(Err(_)) => {
          let status = ServerFrame::status(StatusCode::DeadlineExceeded, "stream idle timeout");
          write_frame(&mut writer, &status).await?;
          break;
        }
        Ok(Ok(result)) => result?,
      };
      let Some(frame) = inbound else {
        // peer closed; nothing in flight survives
        break;
      };
      let Some(payload) = frame.payload else {
        continue;
      };

      match payload {
        client_frame::Payload::Health(_) => {
          write_frame(&mut writer, &ServerFrame::health(ServingStatus::Serving)).await?;
        }

        client_frame::Payload::Hello(hello) => {
          if subject.is_some() {
            let status = ServerFrame::status(StatusCode::InvalidArgument, "duplicate hello");
            write_frame(&mut writer, &status).await?;
            break;
          }
          let claims = match self.verifier.verify(&hello.bearer_token).await {
            Ok(claims) => claims,
            Err(err) => {
              warn!(%err, "authentication failed");
              let status = ServerFrame::status(StatusCode::Unauthenticated, err.to_string());
              write_frame(&mut writer, &status).await?;
              break;
            }
          };

          // billing first, then admission control
          if let Err(err) = self.usage.record(&claims.sub).await {
            warn!(%err, subject = %claims.sub, "usage hook failed");
          }
          // the map guard must drop before the awaits below
          let limited = self
            .last_call
            .get(&claims.sub)
            .is_some_and(|last| last.elapsed() < self.min_gap);
          if limited {
            let status = ServerFrame::status(
              StatusCode::ResourceExhausted,
              "schedule calls are rate limited per subject",
            );
            write_frame(&mut writer, &status).await?;
            break;
          }
          self.last_call.insert(claims.sub.clone(), Instant::now());

          info!(subject = %claims.sub, client = %hello.client_name, "stream authenticated");
          write_frame(&mut writer, &ServerFrame::hello_ack(&claims.sub)).await?;
          subject = Some(claims.sub);
        }

        client_frame::Payload::Input(input) => {
          if subject.is_none() {
            let status =
              ServerFrame::status(StatusCode::Unauthenticated, "hello required before inputs");
            write_frame(&mut writer, &status).await?;
            break;
          }
          let unique_id = input.unique_id;
          let engine_input = match EngineInput::try_from(input) {
            Ok(engine_input) => engine_input,
            Err(err) => {
              let status =
                ServerFrame::input_status(StatusCode::InvalidArgument, unique_id, err.to_string());
              write_frame(&mut writer, &status).await?;
              continue;
            }
          };
          match engine::run(&engine_input) {
            Ok(output) => {
              if output.unplaced > 0 {
                let warning = ServerFrame::unplaced_warning(unique_id, output.unplaced);
                write_frame(&mut writer, &warning).await?;
              }
              write_frame(&mut writer, &ServerFrame::output((&output).into())).await?;
            }
            Err(err @ EngineError::MalformedInput { .. }) => {
              let status =
                ServerFrame::input_status(StatusCode::InvalidArgument, unique_id, err.to_string());
              write_frame(&mut writer, &status).await?;
            }
          }
        }

        client_frame::Payload::Complete(_) => break,
      }
    }

    let _ = writer.shutdown().await;
    Ok(())
  }
}

async fn read_client_frame<R>(reader: &mut R) -> Result<Option<ClientFrame>, ServiceError>
where
  R: AsyncRead + Unpin,
{
  let mut header = [0u8; HEADER_LEN];
  match reader.read_exact(&mut header).await {
    Ok(_) => {}
    Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
    Err(err) => return Err(err.into()),
  }
  let len = body_len(header).map_err(WireError::from)?;
  let mut body = vec![0u8; len];
  reader.read_exact(&mut body).await?;
  let frame = ClientFrame::decode(body.as_slice()).map_err(WireError::from)?;
  Ok(Some(frame))
}

async fn write_frame<W>(writer: &mut W, frame: &ServerFrame) -> Result<(), ServiceError>
where
  W: AsyncWrite + Unpin,
{
  let bytes = encode_frame(frame).map_err(WireError::from)?;
  writer.write_all(&bytes).await?;
  Ok(())
}
