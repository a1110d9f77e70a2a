//! RS256 token validation against the issuer's published key set.
//!
//! # Responsibilities
//! - Derive issuer and JWKS URLs from the configured tenant domain
//! - Fetch and cache signing keys (5 minute TTL)
//! - Verify signature, issuer, audience, and expiry with clock skew tolerance
//!
//! # Design Decisions
//! - Keys are fetched on first use, not at startup
//! - An unknown `kid` forces a refresh in case the issuer rotated keys, but
//!   no more than once per [`FORCED_REFRESH_COOLDOWN`]
//! - Fetches happen under the cache's write lock, so concurrent misses
//!   share one request

use std::time::Duration;

use async_trait::async_trait;
use jsonwebtoken::{decode, decode_header, jwk::JwkSet, Algorithm, DecodingKey, Validation};
use tokio::sync::RwLock;
use tokio::time::Instant;
use url::Url;

use crate::config::Auth0Config;
use crate::error::BuildError;
use crate::security::token::{TokenError, TokenValidator, ValidatedClaims};

pub const JWKS_CACHE_TTL: Duration = Duration::from_secs(5 * 60);

/// Minimum age of the cached key set before an unknown `kid` may refetch it.
pub const FORCED_REFRESH_COOLDOWN: Duration = Duration::from_secs(30);

/// Seconds of clock skew tolerated on `exp`/`nbf`.
pub const ALLOWED_CLOCK_SKEW_SECS: u64 = 60;

/// Where signing keys come from.
#[async_trait]
pub trait KeySource: Send + Sync {
    async fn fetch(&self) -> Result<JwkSet, TokenError>;
}

/// Fetches the key set from the issuer's JWKS endpoint.
pub struct HttpKeySource {
    url: Url,
    http: reqwest::Client,
}

impl HttpKeySource {
    pub fn new(url: Url) -> Result<Self, BuildError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| BuildError::Authenticator(e.to_string()))?;
        Ok(Self { url, http })
    }
}

#[async_trait]
impl KeySource for HttpKeySource {
    async fn fetch(&self) -> Result<JwkSet, TokenError> {
        self.http
            .get(self.url.clone())
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|e| TokenError::KeySource(e.to_string()))?
            .json()
            .await
            .map_err(|e| TokenError::KeySource(e.to_string()))
    }
}

struct CachedKeys {
    keys: JwkSet,
    fetched_at: Instant,
}

pub struct JwksTokenValidator {
    issuer: String,
    audience: String,
    jwks_url: Url,
    source: Box<dyn KeySource>,
    cache: RwLock<Option<CachedKeys>>,
}

impl JwksTokenValidator {
    pub fn new(config: &Auth0Config) -> Result<Self, BuildError> {
        let (issuer, jwks_url) = endpoints(config)?;
        let source = HttpKeySource::new(jwks_url.clone())?;
        Ok(Self::assemble(config, issuer, jwks_url, Box::new(source)))
    }

    /// Validator reading keys from `source` instead of the JWKS endpoint.
    pub fn with_key_source(
        config: &Auth0Config,
        source: Box<dyn KeySource>,
    ) -> Result<Self, BuildError> {
        let (issuer, jwks_url) = endpoints(config)?;
        Ok(Self::assemble(config, issuer, jwks_url, source))
    }

    fn assemble(config: &Auth0Config, issuer: Url, jwks_url: Url, source: Box<dyn KeySource>) -> Self {
        tracing::debug!(issuer = %issuer, jwks = %jwks_url, "Token validator configured");
        Self {
            issuer: issuer.to_string(),
            audience: config.audience.clone(),
            jwks_url,
            source,
            cache: RwLock::new(None),
        }
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn jwks_url(&self) -> &Url {
        &self.jwks_url
    }

    /// Cached keys, refetched once older than the TTL. With `refresh`, the
    /// cooldown replaces the TTL.
    async fn keys(&self, refresh: bool) -> Result<JwkSet, TokenError> {
        if !refresh {
            let cache = self.cache.read().await;
            if let Some(cached) = cache.as_ref() {
                if cached.fetched_at.elapsed() < JWKS_CACHE_TTL {
                    return Ok(cached.keys.clone());
                }
            }
        }

        let max_age = if refresh {
            FORCED_REFRESH_COOLDOWN
        } else {
            JWKS_CACHE_TTL
        };

        let mut cache = self.cache.write().await;
        // another request may have refreshed while this one waited
        if let Some(cached) = cache.as_ref() {
            if cached.fetched_at.elapsed() < max_age {
                return Ok(cached.keys.clone());
            }
        }

        let keys = self.source.fetch().await?;
        tracing::debug!(count = keys.keys.len(), forced = refresh, "Signing keys refreshed");

        *cache = Some(CachedKeys {
            keys: keys.clone(),
            fetched_at: Instant::now(),
        });
        Ok(keys)
    }

    fn validation(&self) -> Validation {
        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_issuer(&[self.issuer.as_str()]);
        validation.set_audience(&[self.audience.as_str()]);
        validation.leeway = ALLOWED_CLOCK_SKEW_SECS;
        validation
    }
}

/// Issuer and JWKS URLs for the tenant, rejecting unusable settings.
fn endpoints(config: &Auth0Config) -> Result<(Url, Url), BuildError> {
    let issuer = Url::parse(&format!("https://{}/", config.domain))
        .map_err(|e| BuildError::Authenticator(format!("failed to parse the issuer url: {}", e)))?;
    if issuer.host_str().map_or(true, str::is_empty) {
        return Err(BuildError::Authenticator(format!(
            "issuer url '{}' has no host",
            issuer
        )));
    }
    if config.audience.trim().is_empty() {
        return Err(BuildError::Authenticator("audience is required".to_string()));
    }

    let jwks_url = issuer
        .join(".well-known/jwks.json")
        .map_err(|e| BuildError::Authenticator(e.to_string()))?;
    Ok((issuer, jwks_url))
}

#[async_trait]
impl TokenValidator for JwksTokenValidator {
    async fn validate(&self, token: &str) -> Result<ValidatedClaims, TokenError> {
        let header = decode_header(token).map_err(|e| TokenError::Invalid(e.to_string()))?;
        if header.alg != Algorithm::RS256 {
            return Err(TokenError::Invalid(format!(
                "unexpected signing algorithm {:?}",
                header.alg
            )));
        }

        let mut keys = self.keys(false).await?;
        if find_key(&keys, header.kid.as_deref()).is_none() {
            keys = self.keys(true).await?;
        }
        let jwk = find_key(&keys, header.kid.as_deref())
            .ok_or_else(|| TokenError::UnknownKey(header.kid.clone()))?;

        let key = DecodingKey::from_jwk(jwk).map_err(|e| TokenError::Invalid(e.to_string()))?;
        let data = decode::<serde_json::Value>(token, &key, &self.validation())
            .map_err(|e| TokenError::Invalid(e.to_string()))?;

        Ok(ValidatedClaims::from_payload(data.claims))
    }
}

fn find_key<'a>(keys: &'a JwkSet, kid: Option<&str>) -> Option<&'a jsonwebtoken::jwk::Jwk> {
    match kid {
        Some(kid) => keys.find(kid),
        None => keys.keys.first(),
    }
}
