//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files; keys
//! use the camelCase spelling of the config file.

use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    /// Listener and logging settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Issuer/audience used by the shared token authenticator.
    #[serde(default)]
    pub auth0: Auth0Config,

    /// Ordered route definitions.
    pub subrouters: Vec<RouteSpec>,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub address: String,

    /// Deadline for reading request headers and the request body.
    #[serde(with = "duration_str")]
    pub read_timeout: Duration,

    /// Deadline for producing the response head.
    #[serde(with = "duration_str")]
    pub write_timeout: Duration,

    /// How long a kept-alive connection may sit idle between requests.
    #[serde(with = "duration_str")]
    pub idle_timeout: Duration,

    /// Upper bound for the request head buffer.
    pub max_header_bytes: usize,

    /// `local` selects human-readable logs, anything else JSON.
    pub release_stage: String,

    /// Enables the call-log pipeline stage.
    pub log_calls: bool,

    /// Default log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Prometheus exporter bind address; no exporter when unset.
    pub metrics_address: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: "0.0.0.0:80".to_string(),
            read_timeout: Duration::from_secs(15),
            write_timeout: Duration::from_secs(15),
            idle_timeout: Duration::from_secs(15),
            max_header_bytes: 1_048_576,
            release_stage: "local".to_string(),
            log_calls: false,
            log_level: "info".to_string(),
            metrics_address: None,
        }
    }
}

/// Token issuer configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Auth0Config {
    /// Tenant domain; the issuer is `https://{domain}/`.
    pub domain: String,

    /// Expected `aud` claim.
    pub audience: String,
}

impl Default for Auth0Config {
    fn default() -> Self {
        Self {
            domain: "your-auth0-tenant.eu.auth0.com".to_string(),
            audience: "https://your-auth0-api.yourdomain.io".to_string(),
        }
    }
}

/// One configured mapping from a path prefix to an upstream target.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RouteSpec {
    /// Route identifier for logging/metrics.
    pub name: String,

    /// Upstream base URL. Parsed when the gateway is built, not when loaded.
    #[serde(rename = "targetURL")]
    pub target_url: String,

    /// Path prefix to dispatch on.
    #[serde(rename = "prefix")]
    pub path_prefix: String,

    /// Remove the matched prefix before forwarding.
    #[serde(default)]
    pub strip_prefix: bool,

    #[serde(default, rename = "authorizationConfig")]
    pub authorization: Option<AuthorizationPolicy>,

    #[serde(default)]
    pub rate_limit: Option<RateLimitPolicy>,

    #[serde(default, rename = "corsConfig")]
    pub cors: Option<CorsPolicy>,

    /// Gzip responses.
    #[serde(default, rename = "gzip")]
    pub compress: bool,
}

impl RouteSpec {
    /// A route with no policies attached.
    pub fn new(
        name: impl Into<String>,
        target_url: impl Into<String>,
        path_prefix: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            target_url: target_url.into(),
            path_prefix: path_prefix.into(),
            strip_prefix: false,
            authorization: None,
            rate_limit: None,
            cors: None,
            compress: false,
        }
    }
}

/// Token requirement for a route. An empty scope list still requires a token.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct AuthorizationPolicy {
    pub required_scopes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RateLimitPolicy {
    /// Requests allowed per window.
    #[serde(rename = "maxRequests")]
    pub limit: u64,

    /// Window length.
    #[serde(rename = "expiration", with = "duration_str")]
    pub period: Duration,

    /// Key clients by `X-Forwarded-For`/`X-Real-IP` instead of the peer address.
    #[serde(default, rename = "trustForwardHeader")]
    pub trust_forwarded_header: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct CorsPolicy {
    pub allowed_origins: Vec<String>,
    pub allowed_methods: Vec<String>,
    pub allowed_headers: Vec<String>,
    pub exposed_headers: Vec<String>,
    pub allow_credentials: bool,
    #[serde(rename = "maxAge")]
    pub max_age_seconds: u64,
    /// Accepted for compatibility; preflights are always answered by the gateway.
    pub options_passthrough: bool,
    /// Log evaluated preflights at debug level.
    pub debug: bool,
}

/// Humantime-formatted durations ("15s", "1m30s", "250ms").
mod duration_str {
    use super::*;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(raw.trim()).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"
server:
  address: "127.0.0.1:8088"
  readTimeout: 5s
  writeTimeout: 10s
  idleTimeout: 1m
  logCalls: true
  releaseStage: production
auth0:
  domain: tenant.eu.auth0.com
  audience: https://api.example.io
subrouters:
  - name: Users API
    targetURL: http://localhost:9000/api
    prefix: /users
    stripPrefix: true
    gzip: true
    authorizationConfig:
      requiredScopes: ["read:all", "write:users"]
    rateLimit:
      maxRequests: 5
      expiration: 1s
      trustForwardHeader: true
    corsConfig:
      allowedOrigins: ["*"]
      allowedMethods: ["GET"]
      allowCredentials: true
      maxAge: 86400
  - name: Public
    targetURL: http://localhost:9001
    prefix: /
"#;

    #[test]
    fn parses_full_document() {
        let config: GatewayConfig = serde_yaml::from_str(FULL).unwrap();

        assert_eq!(config.server.address, "127.0.0.1:8088");
        assert_eq!(config.server.read_timeout, Duration::from_secs(5));
        assert_eq!(config.server.idle_timeout, Duration::from_secs(60));
        assert_eq!(config.server.max_header_bytes, 1_048_576);
        assert!(config.server.log_calls);
        assert_eq!(config.auth0.domain, "tenant.eu.auth0.com");

        let users = &config.subrouters[0];
        assert_eq!(users.path_prefix, "/users");
        assert!(users.strip_prefix);
        assert!(users.compress);
        assert_eq!(
            users.authorization.as_ref().unwrap().required_scopes,
            vec!["read:all".to_string(), "write:users".to_string()]
        );
        let rate = users.rate_limit.as_ref().unwrap();
        assert_eq!(rate.limit, 5);
        assert_eq!(rate.period, Duration::from_secs(1));
        assert!(rate.trust_forwarded_header);
        let cors = users.cors.as_ref().unwrap();
        assert_eq!(cors.max_age_seconds, 86400);
        assert!(cors.allowed_headers.is_empty());

        let public = &config.subrouters[1];
        assert!(!public.strip_prefix);
        assert!(public.authorization.is_none());
        assert!(public.rate_limit.is_none());
        assert!(public.cors.is_none());
    }

    #[test]
    fn empty_authorization_block_means_token_only() {
        let yaml = r#"
subrouters:
  - name: a
    targetURL: http://localhost
    prefix: /a
    authorizationConfig: {}
"#;
        let config: GatewayConfig = serde_yaml::from_str(yaml).unwrap();
        let policy = config.subrouters[0].authorization.as_ref().unwrap();
        assert!(policy.required_scopes.is_empty());
    }

    #[test]
    fn missing_required_route_key_is_rejected() {
        let yaml = r#"
subrouters:
  - name: a
    prefix: /a
"#;
        assert!(serde_yaml::from_str::<GatewayConfig>(yaml).is_err());
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let yaml = r#"
server:
  adress: ":80"
subrouters: []
"#;
        assert!(serde_yaml::from_str::<GatewayConfig>(yaml).is_err());
    }

    #[test]
    fn rate_limit_requires_window() {
        let yaml = r#"
subrouters:
  - name: a
    targetURL: http://localhost
    prefix: /a
    rateLimit:
      maxRequests: 3
"#;
        assert!(serde_yaml::from_str::<GatewayConfig>(yaml).is_err());
    }
}
