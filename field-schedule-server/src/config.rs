//! Environment-driven server configuration.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Default client cooldown / per-subject rate-limit gap, in milliseconds.
pub const DEFAULT_SCHEDULE_CREATION_DELAY_MS: u64 = 30_000;
/// Idle budget between stream messages.
pub const STREAM_IDLE_TIMEOUT: Duration = Duration::from_secs(120);
/// Total budget for one stream.
pub const STREAM_DEADLINE: Duration = Duration::from_secs(15 * 60);

#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("Missing required environment variable {0}")]
  Missing(&'static str),

  #[error("Invalid value for {name}: {value:?}")]
  Invalid { name: &'static str, value: String },
}

/// TLS material; both paths must be set or neither.
#[derive(Debug, Clone)]
pub struct TlsPaths {
  pub cert: PathBuf,
  pub key: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
  /// Address the listener binds (from `SCHEDULER_SERVER_URL`).
  pub bind_addr: SocketAddr,
  /// Issuer base URL; JWKS is fetched from its well-known path.
  pub auth_server_url: String,
  /// Accepted `aud` values, one per `PUBLIC_*_CLIENT_ID` variable.
  pub audiences: Vec<String>,
  /// Optional usage-counter endpoint; absent means log-only metering.
  pub usage_hook_url: Option<String>,
  /// Minimum gap between schedule calls per subject.
  pub schedule_creation_delay: Duration,
  pub tls: Option<TlsPaths>,
  pub idle_timeout: Duration,
  pub stream_deadline: Duration,
}

impl ServerConfig {
  pub fn from_env() -> Result<Self, ConfigError> {
    let vars: BTreeMap<String, String> = std::env::vars().collect();
    Self::from_vars(&vars)
  }

  /// Parse from an explicit variable map (tests inject one).
  pub fn from_vars(vars: &BTreeMap<String, String>) -> Result<Self, ConfigError> {
    let raw_addr = vars
      .get("SCHEDULER_SERVER_URL")
      .ok_or(ConfigError::Missing("SCHEDULER_SERVER_URL"))?;
    let bind_addr = parse_endpoint(raw_addr).ok_or_else(|| ConfigError::Invalid {
      name: "SCHEDULER_SERVER_URL",
      value: raw_addr.clone(),
    })?;

    let auth_server_url = vars
      .get("AUTH_SERVER_URL")
      .ok_or(ConfigError::Missing("AUTH_SERVER_URL"))?
      .trim_end_matches('/')
      .to_string();

    let audiences: Vec<String> = vars
      .iter()
      .filter(|(key, _)| key.starts_with("PUBLIC_") && key.ends_with("_CLIENT_ID"))
      .map(|(_, value)| value.clone())
      .collect();

    let schedule_creation_delay = match vars.get("SCHEDULE_CREATION_DELAY") {
      Some(raw) => {
        let ms: u64 = raw.parse().map_err(|_| ConfigError::Invalid {
          name: "SCHEDULE_CREATION_DELAY",
          value: raw.clone(),
        })?;
        Duration::from_millis(ms)
      }
      None => Duration::from_millis(DEFAULT_SCHEDULE_CREATION_DELAY_MS),
    };

    let tls = match (
      vars.get("FIELD_SCHEDULE_TLS_CERT"),
      vars.get("FIELD_SCHEDULE_TLS_KEY"),
    ) {
      (Some(cert), Some(key)) => Some(TlsPaths {
        cert: PathBuf::from(cert),
        key: PathBuf::from(key),
      }),
      (None, None) => None,
      (Some(_), None) => return Err(ConfigError::Missing("FIELD_SCHEDULE_TLS_KEY")),
      (None, Some(_)) => return Err(ConfigError::Missing("FIELD_SCHEDULE_TLS_CERT")),
    };

    Ok(Self {
      bind_addr,
      auth_server_url,
      audiences,
      usage_hook_url: vars.get("USAGE_HOOK_URL").cloned(),
      schedule_creation_delay,
      tls,
      idle_timeout: STREAM_IDLE_TIMEOUT,
      stream_deadline: STREAM_DEADLINE,
    })
  }
}

/// Accept `host:port` with an optional scheme prefix.
fn parse_endpoint(raw: &str) -> Option<SocketAddr> {
  let trimmed = raw
    .strip_prefix("grpc://")
    .or_else(|| raw.strip_prefix("https://"))
    .or_else(|| raw.strip_prefix("http://"))
    .unwrap_or(raw);
  trimmed.parse().ok()
}
