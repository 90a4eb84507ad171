//! Client configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// Backend address used when `FOLIO_API_BASE` is unset.
pub const DEFAULT_API_BASE: &str = "http://localhost:8000";

/// Storage key of the persisted session record.
pub const SESSION_STORAGE_KEY: &str = "auth:session";

/// Storage key of the persisted FAR customer record.
pub const FAR_CUSTOMER_STORAGE_KEY: &str = "auth:far_customer";

/// Default number of cached query responses kept.
pub const DEFAULT_CACHE_CAPACITY: usize = 256;

/// Paths of the auth endpoints, relative to the API base.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthEndpoints {
    pub login: String,
    pub register: String,
    pub refresh: String,
    pub me: String,
    pub google: String,
    pub apple: String,
    pub far_customer_login: String,
}

impl Default for AuthEndpoints {
    fn default() -> Self {
        Self {
            login: "/api/auth/login".into(),
            register: "/api/auth/register".into(),
            refresh: "/api/auth/refresh".into(),
            me: "/api/auth/me".into(),
            google: "/api/auth/google".into(),
            apple: "/api/auth/apple".into(),
            far_customer_login: "/api/auth/far-customer-login".into(),
        }
    }
}

/// Configuration shared by the transport, session manager and query cache.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Backend base URL (no trailing slash needed).
    pub api_base: String,
    /// Auth endpoint paths.
    pub endpoints: AuthEndpoints,
    /// Storage key for the session record.
    pub session_key: String,
    /// Storage key for the FAR customer record.
    pub far_customer_key: String,
    /// Per-request timeout; `None` inherits the HTTP stack's default.
    pub request_timeout: Option<Duration>,
    /// Maximum number of cached query responses.
    pub cache_capacity: usize,
    /// Maximum age of a cached query response.
    pub cache_ttl: Option<Duration>,
    /// Accept auth responses without a nested `user` object, treating the
    /// whole body as the profile.
    pub accept_bare_user: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.into(),
            endpoints: AuthEndpoints::default(),
            session_key: SESSION_STORAGE_KEY.into(),
            far_customer_key: FAR_CUSTOMER_STORAGE_KEY.into(),
            request_timeout: None,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            cache_ttl: None,
            accept_bare_user: true,
        }
    }
}

impl ClientConfig {
    /// Load from the process environment.
    ///
    /// # Errors
    /// Returns error if a numeric variable cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary variable lookup.
    ///
    /// Recognised keys: `FOLIO_API_BASE`, `FOLIO_REQUEST_TIMEOUT_SECS`,
    /// `FOLIO_CACHE_CAPACITY`, `FOLIO_CACHE_TTL_SECS`, `FOLIO_STRICT_AUTH_PAYLOAD`.
    ///
    /// # Errors
    /// Returns error if a numeric or boolean variable cannot be parsed.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(base) = lookup("FOLIO_API_BASE").filter(|b| !b.trim().is_empty()) {
            config.api_base = base.trim().to_string();
        }
        if let Some(secs) = parse_u64(&lookup, "FOLIO_REQUEST_TIMEOUT_SECS")? {
            config.request_timeout = Some(Duration::from_secs(secs));
        }
        if let Some(capacity) = parse_u64(&lookup, "FOLIO_CACHE_CAPACITY")? {
            config.cache_capacity = usize::try_from(capacity).map_err(|_| ConfigError::Invalid {
                key: "FOLIO_CACHE_CAPACITY",
                value: capacity.to_string(),
            })?;
        }
        if let Some(secs) = parse_u64(&lookup, "FOLIO_CACHE_TTL_SECS")? {
            config.cache_ttl = Some(Duration::from_secs(secs));
        }
        if let Some(raw) = lookup("FOLIO_STRICT_AUTH_PAYLOAD") {
            let strict = match raw.trim() {
                "1" | "true" | "yes" => true,
                "0" | "false" | "no" | "" => false,
                _ => {
                    return Err(ConfigError::Invalid {
                        key: "FOLIO_STRICT_AUTH_PAYLOAD",
                        value: raw,
                    });
                }
            };
            config.accept_bare_user = !strict;
        }

        Ok(config)
    }

    /// Override the API base.
    #[must_use]
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    /// Override the request timeout.
    #[must_use]
    pub const fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Override the cache bounds.
    #[must_use]
    pub const fn with_cache(mut self, capacity: usize, ttl: Option<Duration>) -> Self {
        self.cache_capacity = capacity;
        self.cache_ttl = ttl;
        self
    }

    /// Reject auth responses that lack a nested `user` object.
    #[must_use]
    pub const fn strict_auth_payload(mut self) -> Self {
        self.accept_bare_user = false;
        self
    }
}

fn parse_u64<F>(lookup: &F, key: &'static str) -> Result<Option<u64>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|raw| {
            raw.trim()
                .parse::<u64>()
                .map_err(|_| ConfigError::Invalid { key, value: raw })
        })
        .transpose()
}
