//! Session state and its observable snapshot.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The client's authentication state: user profile plus token pair.
///
/// Serialized as `{"user": ..., "accessToken": ..., "refreshToken": ...}`,
/// which is also the persisted record format.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// Opaque user profile.
    #[serde(default)]
    pub user: Option<Value>,
    /// Short-lived bearer credential.
    #[serde(default)]
    pub access_token: Option<String>,
    /// Longer-lived credential used to obtain a new access token.
    #[serde(default)]
    pub refresh_token: Option<String>,
}

impl Session {
    /// Create a fully populated session.
    #[must_use]
    pub fn new(user: Value, access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            user: Some(user),
            access_token: Some(access_token.into()),
            refresh_token: Some(refresh_token.into()),
        }
    }

    /// True iff both `user` and `access_token` are set.
    #[must_use]
    pub const fn is_authenticated(&self) -> bool {
        self.user.is_some() && self.access_token.is_some()
    }

    /// True iff both tokens are set (the bar for restoring a persisted record).
    #[must_use]
    pub const fn has_token_pair(&self) -> bool {
        self.access_token.is_some() && self.refresh_token.is_some()
    }

    /// True when nothing is held.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.user.is_none() && self.access_token.is_none() && self.refresh_token.is_none()
    }
}

/// Session of a FAR customer signed in by customer ID.
///
/// Holds only an access token: there is no user profile and no refresh
/// token, so it is never validated against `/me` nor refreshed. Persisted
/// as `{"accessToken": ..., "customerId": ...}` under its own key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FarCustomerSession {
    pub access_token: String,
    pub customer_id: String,
}

impl FarCustomerSession {
    #[must_use]
    pub fn new(access_token: impl Into<String>, customer_id: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            customer_id: customer_id.into(),
        }
    }
}

/// Lifecycle state of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthState {
    /// No usable session.
    #[default]
    Unauthenticated,
    /// A persisted session is being validated at startup.
    Restoring,
    /// A validated session is held.
    Authenticated,
    /// Authenticated, with a token refresh in flight.
    Refreshing,
}

impl std::fmt::Display for AuthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Unauthenticated => "unauthenticated",
            Self::Restoring => "restoring",
            Self::Authenticated => "authenticated",
            Self::Refreshing => "refreshing",
        };
        f.write_str(name)
    }
}

/// What observers (route guards, UI) see of the session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub session: Session,
    pub state: AuthState,
    /// True only until startup restore has finished.
    pub loading: bool,
    /// FAR customer mode, held alongside (not instead of) the app session.
    pub far_customer: Option<FarCustomerSession>,
}

impl SessionSnapshot {
    /// The snapshot at process start: empty, not yet restored.
    #[must_use]
    pub fn initial() -> Self {
        Self {
            session: Session::default(),
            state: AuthState::Unauthenticated,
            loading: true,
            far_customer: None,
        }
    }

    /// See [`Session::is_authenticated`].
    #[must_use]
    pub const fn is_authenticated(&self) -> bool {
        self.session.is_authenticated()
    }

    #[must_use]
    pub const fn is_far_customer(&self) -> bool {
        self.far_customer.is_some()
    }
}

impl Default for SessionSnapshot {
    fn default() -> Self {
        Self::initial()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_persisted_format_uses_camel_case() {
        let session = Session::new(json!({"id": 1, "email": "a@b.com"}), "AT1", "RT1");
        let value = serde_json::to_value(&session).unwrap();
        assert_eq!(
            value,
            json!({
                "user": {"id": 1, "email": "a@b.com"},
                "accessToken": "AT1",
                "refreshToken": "RT1"
            })
        );
    }

    #[test]
    fn test_empty_session_serializes_nulls() {
        let value = serde_json::to_value(Session::default()).unwrap();
        assert_eq!(
            value,
            json!({"user": null, "accessToken": null, "refreshToken": null})
        );
    }

    #[test]
    fn test_partial_record_deserializes() {
        let session: Session = serde_json::from_str(r#"{"accessToken": "AT1"}"#).unwrap();
        assert!(!session.has_token_pair());
        assert!(!session.is_authenticated());
        assert!(!session.is_empty());
    }

    #[test]
    fn test_authenticated_requires_user_and_access_token() {
        let mut session = Session::new(json!({"id": 1}), "AT1", "RT1");
        assert!(session.is_authenticated());
        session.user = None;
        assert!(!session.is_authenticated());
    }

    #[test]
    fn test_initial_snapshot_is_loading() {
        let snapshot = SessionSnapshot::initial();
        assert!(snapshot.loading);
        assert_eq!(snapshot.state, AuthState::Unauthenticated);
        assert!(!snapshot.is_authenticated());
        assert!(!snapshot.is_far_customer());
    }

    #[test]
    fn test_far_customer_record_format() {
        let far = FarCustomerSession::new("FAR1", "C-100");
        assert_eq!(
            serde_json::to_value(&far).unwrap(),
            json!({"accessToken": "FAR1", "customerId": "C-100"})
        );
        let partial = serde_json::from_str::<FarCustomerSession>(r#"{"customerId": "C-100"}"#);
        assert!(partial.is_err());
    }
}
