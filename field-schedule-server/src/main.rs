use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tracing::{error, info};

use field_schedule_server::auth::Authenticator;
use field_schedule_server::config::{ServerConfig, TlsPaths};
use field_schedule_server::service::SchedulerService;
use field_schedule_server::usage::{HttpUsageSink, LogUsageSink, UsageSink};

#[tokio::main]
async fn main() -> ExitCode {
  tracing_subscriber::fmt()
    .with_env_filter(
      tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
    )
    .init();

  // exit code 1: configuration error
  let config = match ServerConfig::from_env() {
    Ok(config) => config,
    Err(err) => {
      error!(%err, "invalid configuration");
      return ExitCode::from(1);
    }
  };

  // exit code 2: TLS or bind failure
  let tls = match config.tls.as_ref().map(load_tls).transpose() {
    Ok(tls) => tls,
    Err(err) => {
      error!(%err, "failed to load TLS material");
      return ExitCode::from(2);
    }
  };
  let listener = match TcpListener::bind(config.bind_addr).await {
    Ok(listener) => listener,
    Err(err) => {
      error!(%err, addr = %config.bind_addr, "failed to bind");
      return ExitCode::from(2);
    }
  };

  let verifier = Arc::new(Authenticator::new(
    config.auth_server_url.clone(),
    config.audiences.clone(),
  ));
  let usage: Arc<dyn UsageSink> = match &config.usage_hook_url {
    Some(url) => Arc::new(HttpUsageSink::new(url.clone())),
    None => Arc::new(LogUsageSink),
  };
  let service = Arc::new(SchedulerService::new(verifier, usage, &config));

  tokio::select! {
    result = service.serve(listener, tls) => {
      if let Err(err) = result {
        error!(%err, "accept loop failed");
        return ExitCode::from(2);
      }
    }
    _ = tokio::signal::ctrl_c() => {
      info!("shutdown requested");
    }
  }
  ExitCode::SUCCESS
}

fn load_tls(paths: &TlsPaths) -> Result<TlsAcceptor> {
  let cert_pem = std::fs::read(&paths.cert)
    .with_context(|| format!("reading certificate {}", paths.cert.display()))?;
  let key_pem =
    std::fs::read(&paths.key).with_context(|| format!("reading key {}", paths.key.display()))?;

  let certs = rustls_pemfile::certs(&mut cert_pem.as_slice())
    .collect::<std::result::Result<Vec<_>, _>>()
    .context("parsing certificate chain")?;
  let key = rustls_pemfile::private_key(&mut key_pem.as_slice())
    .context("parsing private key")?
    .context("no private key found")?;

  let config = rustls::ServerConfig::builder()
    .with_no_client_auth()
    .with_single_cert(certs, key)
    .context("building TLS configuration")?;
  Ok(TlsAcceptor::from(Arc::new(config)))
}
