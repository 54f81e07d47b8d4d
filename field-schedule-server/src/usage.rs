//! Best-effort usage metering.
//!
//! The sink is invoked once per authenticated call, keyed by the token
//! subject. Failures are logged and never surfaced to the caller.

use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum UsageError {
  #[error("Usage hook request failed: {0}")]
  Http(#[from] reqwest::Error),
}

#[async_trait]
pub trait UsageSink: Send + Sync {
  async fn record(&self, subject: &str) -> Result<(), UsageError>;
}

/// Posts `{"subject": ...}` to the configured counter endpoint.
pub struct HttpUsageSink {
  client: reqwest::Client,
  url: String,
}

impl HttpUsageSink {
  pub fn new(url: impl Into<String>) -> Self {
    Self {
      client: reqwest::Client::new(),
      url: url.into(),
    }
  }
}

#[async_trait]
impl UsageSink for HttpUsageSink {
  async fn record(&self, subject: &str) -> Result<(), UsageError> {
    self
      .client
      .post(&self.url)
      .json(&serde_json::json!({ "subject": subject }))
      .send()
      .await?
      .error_for_status()?;
    Ok(())
  }
}

/// Fallback sink when no hook endpoint is configured.
pub struct LogUsageSink;

#[async_trait]
impl UsageSink for LogUsageSink {
  async fn record(&self, subject: &str) -> Result<(), UsageError> {
    info!(subject, "schedule call");
    Ok(())
  }
}
