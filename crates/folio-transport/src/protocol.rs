//! Wire types for the auth endpoints.

use folio_core::{ClientError, FarCustomerSession, Session};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

/// Body of `POST /api/auth/login`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

impl LoginRequest {
    /// Create a login body.
    #[must_use]
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }

    /// JSON body.
    #[must_use]
    pub fn to_body(&self) -> Value {
        json!({ "email": self.email, "password": self.password })
    }
}

/// Body of `POST /api/auth/register`.
///
/// Fields beyond the known ones go in `extra` and are sent at top level.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl RegisterRequest {
    /// Create a registration body.
    #[must_use]
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
            ..Self::default()
        }
    }

    /// Set the display name.
    #[must_use]
    pub fn full_name(mut self, full_name: impl Into<String>) -> Self {
        self.full_name = Some(full_name.into());
        self
    }

    /// JSON body. Known fields win over same-named `extra` entries.
    #[must_use]
    pub fn to_body(&self) -> Value {
        let mut body = self.extra.clone();
        body.insert("email".into(), Value::String(self.email.clone()));
        body.insert("password".into(), Value::String(self.password.clone()));
        if let Some(ref name) = self.full_name {
            body.insert("full_name".into(), Value::String(name.clone()));
        }
        Value::Object(body)
    }
}

/// Identity provider for social login.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SocialProvider {
    Google,
    Apple,
}

impl std::fmt::Display for SocialProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Google => "google",
            Self::Apple => "apple",
        })
    }
}

/// Body of `POST /api/auth/{google,apple}`: the provider-issued ID token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SocialLoginRequest {
    pub credential: String,
}

impl SocialLoginRequest {
    /// JSON body.
    #[must_use]
    pub fn to_body(&self) -> Value {
        json!({ "credential": self.credential })
    }
}

/// Body of `POST /api/auth/refresh`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

impl RefreshRequest {
    /// JSON body.
    #[must_use]
    pub fn to_body(&self) -> Value {
        json!({ "refresh_token": self.refresh_token })
    }
}

/// Body of `POST /api/auth/far-customer-login`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FarCustomerLoginRequest {
    pub customer_id: String,
}

impl FarCustomerLoginRequest {
    /// JSON body.
    #[must_use]
    pub fn to_body(&self) -> Value {
        json!({ "customer_id": self.customer_id })
    }
}

/// Token mode the backend stamps on FAR customer tokens.
pub const FAR_CUSTOMER_MODE: &str = "far_customer";

/// Parse a FAR customer token response:
/// `{"access_token", "token_type", "mode", "customer_id"}`.
///
/// `requested` stands in for a missing `customer_id`.
///
/// # Errors
/// `InvalidResponse` if `access_token` is missing or `mode` names anything
/// other than FAR customer mode.
pub fn parse_far_customer(
    body: &Value,
    requested: &str,
) -> Result<FarCustomerSession, ClientError> {
    let access_token = string_field(body, "access_token")
        .ok_or_else(|| ClientError::InvalidResponse("missing access_token".into()))?;
    if let Some(mode) = string_field(body, "mode").filter(|m| m != FAR_CUSTOMER_MODE) {
        return Err(ClientError::InvalidResponse(format!("unexpected token mode {mode}")));
    }
    let customer_id = string_field(body, "customer_id").unwrap_or_else(|| requested.to_string());
    Ok(FarCustomerSession::new(access_token, customer_id))
}

/// Where the profile was found in a token response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserShape {
    /// `{"user": {...}, "access_token": ..., ...}`
    Nested,
    /// No usable `user` field; the whole body stands in for the profile.
    Bare,
}

/// A parsed token response (`login`, `register`, social login, `refresh`).
#[derive(Debug, Clone, PartialEq)]
pub struct AuthPayload {
    pub user: Value,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub shape: UserShape,
}

impl AuthPayload {
    /// Parse a token response.
    ///
    /// A non-null `user` field is the profile. Otherwise the whole body is
    /// taken as the profile when `accept_bare_user` is set, and rejected
    /// when it is not.
    ///
    /// # Errors
    /// `InvalidResponse` if the body is not an object, `access_token` is
    /// missing, or a bare body is not accepted.
    pub fn parse(body: Value, accept_bare_user: bool) -> Result<Self, ClientError> {
        if !body.is_object() {
            return Err(ClientError::InvalidResponse(
                "token response is not a JSON object".into(),
            ));
        }

        let access_token = string_field(&body, "access_token")
            .ok_or_else(|| ClientError::InvalidResponse("missing access_token".into()))?;
        let refresh_token = string_field(&body, "refresh_token");

        let (user, shape) = match body.get("user") {
            Some(user) if !user.is_null() => (user.clone(), UserShape::Nested),
            _ if accept_bare_user => (body, UserShape::Bare),
            _ => {
                return Err(ClientError::InvalidResponse(
                    "token response has no user object".into(),
                ));
            }
        };

        Ok(Self {
            user,
            access_token,
            refresh_token,
            shape,
        })
    }

    /// Turn into a session. `fallback_refresh` is used when the response
    /// carries no `refresh_token` (refresh responses may omit it).
    ///
    /// # Errors
    /// `InvalidResponse` if no refresh token is available either way.
    pub fn into_session(self, fallback_refresh: Option<String>) -> Result<Session, ClientError> {
        let refresh_token = self
            .refresh_token
            .or(fallback_refresh)
            .ok_or_else(|| ClientError::InvalidResponse("missing refresh_token".into()))?;
        Ok(Session::new(self.user, self.access_token, refresh_token))
    }
}

fn string_field(body: &Value, key: &str) -> Option<String> {
    body.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}
