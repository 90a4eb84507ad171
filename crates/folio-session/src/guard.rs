//! Access gate for protected views.

use folio_core::SessionSnapshot;
use tokio::sync::watch;

/// Where unauthenticated visitors are sent.
pub const DEFAULT_LOGIN_PATH: &str = "/login";

/// Outcome of guarding a protected location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardDecision {
    /// Session restore still running; show a placeholder.
    Loading,
    /// Send the visitor to `to`, remembering `from` for after sign-in.
    Redirect { to: String, from: String },
    /// Render the protected content.
    Allow,
}

/// Decides whether a protected location may be shown.
#[derive(Debug, Clone)]
pub struct RouteGuard {
    login_path: String,
}

impl Default for RouteGuard {
    fn default() -> Self {
        Self::new(DEFAULT_LOGIN_PATH)
    }
}

impl RouteGuard {
    #[must_use]
    pub fn new(login_path: impl Into<String>) -> Self {
        Self {
            login_path: login_path.into(),
        }
    }

    #[must_use]
    pub fn login_path(&self) -> &str {
        &self.login_path
    }

    /// Decide for the current state. Never redirects while loading.
    #[must_use]
    pub fn decide(&self, snapshot: &SessionSnapshot, requested: &str) -> GuardDecision {
        if snapshot.loading {
            GuardDecision::Loading
        } else if snapshot.is_authenticated() {
            GuardDecision::Allow
        } else {
            GuardDecision::Redirect {
                to: self.login_path.clone(),
                from: requested.to_string(),
            }
        }
    }

    /// Wait for the startup restore to finish, then decide.
    pub async fn resolve(
        &self,
        session: &mut watch::Receiver<SessionSnapshot>,
        requested: &str,
    ) -> GuardDecision {
        let restored = session
            .wait_for(|s| !s.loading)
            .await
            .map(|current| current.clone());
        // Sender gone: decide on the last published state.
        let snapshot = match restored {
            Ok(snapshot) => snapshot,
            Err(_) => session.borrow().clone(),
        };
        tracing::debug!(requested, authenticated = snapshot.is_authenticated(), "route guard resolved");
        self.decide(&snapshot, requested)
    }
}
