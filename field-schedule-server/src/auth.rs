//! Bearer-token validation against the configured issuer.
//!
//! The issuer's JWKS is cached in a read-mostly lock and refreshed at most
//! once per [`KEY_CACHE_TTL`]; replacement is atomic, so in-flight calls
//! keep the key set they started with. Validation failures are final —
//! they are never retried server-side.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use jsonwebtoken::jwk::{Jwk, JwkSet};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, decode_header};
use parking_lot::RwLock;
use serde::Deserialize;
use thiserror::Error;

/// Issuer keys are refreshed after at most this long.
pub const KEY_CACHE_TTL: Duration = Duration::from_secs(3600);

#[derive(Debug, Error)]
pub enum AuthError {
  #[error("Bearer token is missing")]
  MissingToken,

  #[error("Token rejected: {0}")]
  Invalid(#[from] jsonwebtoken::errors::Error),

  #[error("Token references a key the issuer does not publish")]
  UnknownKey,

  #[error("Failed to fetch issuer keys: {0}")]
  KeyFetch(#[from] reqwest::Error),
}

/// The claims the service cares about. `iss`, `aud` and `exp` are checked
/// by the validator; `sub` becomes the billing key.
#[derive(Debug, Clone, Deserialize)]
pub struct Claims {
  pub sub: String,
  pub exp: i64,
}

/// Anything that can turn a bearer token into validated claims.
#[async_trait]
pub trait TokenVerifier: Send + Sync {
  async fn verify(&self, token: &str) -> Result<Claims, AuthError>;
}

struct CachedKeys {
  keys: JwkSet,
  fetched: Instant,
}

/// JWKS-backed verifier.
pub struct Authenticator {
  issuer: String,
  audiences: Vec<String>,
  http: reqwest::Client,
  cache: RwLock<Option<Arc<CachedKeys>>>,
}

impl Authenticator {
  pub fn new(issuer: impl Into<String>, audiences: Vec<String>) -> Self {
    Self {
      issuer: issuer.into(),
      audiences,
      http: reqwest::Client::new(),
      cache: RwLock::new(None),
    }
  }

  fn validation(&self, alg: Algorithm) -> Validation {
    let mut validation = Validation::new(alg);
    validation.set_issuer(&[&self.issuer]);
    if self.audiences.is_empty() {
      validation.validate_aud = false;
    } else {
      validation.set_audience(&self.audiences);
    }
    validation
  }

  async fn keys(&self) -> Result<Arc<CachedKeys>, AuthError> {
    if let Some(cached) = self.cache.read().clone() {
      if cached.fetched.elapsed() < KEY_CACHE_TTL {
        return Ok(cached);
      }
    }
    let url = format!("{}/.well-known/jwks.json", self.issuer.trim_end_matches('/'));
    let keys: JwkSet = self
      .http
      .get(&url)
      .send()
      .await?
      .error_for_status()?
      .json()
      .await?;
    let fresh = Arc::new(CachedKeys {
      keys,
      fetched: Instant::now(),
    });
    *self.cache.write() = Some(Arc::clone(&fresh));
    Ok(fresh)
  }

  fn find_key<'a>(set: &'a JwkSet, kid: Option<&str>) -> Option<&'a Jwk> {
    match kid {
      Some(kid) => set.find(kid),
      None => set.keys.first(),
    }
  }
}

#[async_trait]
impl TokenVerifier for Authenticator {
  async fn verify(&self, token: &str) -> Result<Claims, AuthError> {
    if token.is_empty() {
      return Err(AuthError::MissingToken);
    }
    let header = decode_header(token)?;
    let cached = self.keys().await?;
    let jwk =
      Self::find_key(&cached.keys, header.kid.as_deref()).ok_or(AuthError::UnknownKey)?;
    let key = DecodingKey::from_jwk(jwk)?;
    let data = decode::<Claims>(token, &key, &self.validation(header.alg))?;
    Ok(data.claims)
  }
}

/// Shared-secret verifier for development setups and tests, where no
/// JWKS issuer is reachable.
pub struct StaticKeyVerifier {
  key: DecodingKey,
  validation: Validation,
}

impl StaticKeyVerifier {
  pub fn hs256(secret: &[u8], issuer: &str, audiences: &[String]) -> Self {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_issuer(&[issuer]);
    if audiences.is_empty() {
      validation.validate_aud = false;
    } else {
      validation.set_audience(audiences);
    }
    Self {
      key: DecodingKey::from_secret(secret),
      validation,
    }
  }
}

#[async_trait]
impl TokenVerifier for StaticKeyVerifier {
  async fn verify(&self, token: &str) -> Result<Claims, AuthError> {
    if token.is_empty() {
      return Err(AuthError::MissingToken);
    }
    let data = decode::<Claims>(token, &self.key, &self.validation)?;
    Ok(data.claims)
  }
}
