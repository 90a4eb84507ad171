//! Client error taxonomy.

use serde_json::Value;
use thiserror::Error;

/// Fallback message when the backend gives no `detail` or `message`.
pub const GENERIC_FAILURE: &str = "Request failed";

/// Errors surfaced by transports and the session layer.
///
/// `Clone` so a single in-flight refresh can hand the same result to every
/// waiting caller.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ClientError {
    /// Network failure; no HTTP status is available.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Non-2xx HTTP response.
    #[error("{message}")]
    Api {
        status: u16,
        message: String,
        payload: Option<Value>,
    },

    /// An authenticated operation was attempted without an access token.
    #[error("Not authenticated")]
    NotAuthenticated,

    /// A refresh was attempted without a refresh token.
    #[error("No refresh token available")]
    MissingRefreshToken,

    /// The caller aborted the request.
    #[error("Request cancelled")]
    Cancelled,

    /// An auth response lacked required fields.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl ClientError {
    /// Build an `Api` error from a status and the (possibly absent) parsed body.
    ///
    /// The message is the payload's `detail`, then `message`, then
    /// [`GENERIC_FAILURE`].
    #[must_use]
    pub fn from_response(status: u16, payload: Option<Value>) -> Self {
        let message = payload
            .as_ref()
            .and_then(|p| text_field(p, "detail").or_else(|| text_field(p, "message")))
            .unwrap_or(GENERIC_FAILURE)
            .to_string();

        Self::Api {
            status,
            message,
            payload,
        }
    }

    /// HTTP status, for `Api` errors.
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// True for an HTTP 401.
    #[must_use]
    pub const fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Api { status: 401, .. })
    }
}

fn text_field<'a>(payload: &'a Value, name: &str) -> Option<&'a str> {
    payload
        .get(name)
        .and_then(Value::as_str)
        .filter(|m| !m.is_empty())
}

/// Invalid configuration value.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },
}
