//! Session manager: sign-in flows, token refresh and authenticated calls.

use std::sync::Arc;

use folio_core::{
    ApiRequest, AuthEndpoints, AuthState, ClientConfig, ClientError, FarCustomerSession,
    KeyValueStore, Session, SessionSnapshot, Transport,
};
use folio_transport::{
    AuthPayload, FarCustomerLoginRequest, LoginRequest, RefreshRequest, RegisterRequest,
    SocialLoginRequest, SocialProvider, UserShape, parse_far_customer,
};
use futures::future::{BoxFuture, FutureExt, Shared};
use serde_json::Value;
use tokio::sync::{Mutex, watch};

use crate::{
    authenticated::{AuthenticatedTransport, FarCustomerTransport},
    store::SessionStore,
};

/// A refresh in progress, awaited by every caller that needs it.
type RefreshFlight = Shared<BoxFuture<'static, Result<Session, ClientError>>>;

struct Inner<T, S> {
    transport: T,
    store: SessionStore<S>,
    endpoints: AuthEndpoints,
    accept_bare_user: bool,
    refresh_flight: Mutex<Option<RefreshFlight>>,
}

/// Owner of the session lifecycle.
///
/// Cheap to clone; clones share the same session.
pub struct SessionManager<T, S> {
    inner: Arc<Inner<T, S>>,
}

impl<T, S> Clone for SessionManager<T, S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T, S> SessionManager<T, S>
where
    T: Transport + 'static,
    S: KeyValueStore + 'static,
{
    /// Create a manager. The session starts empty and loading; call
    /// [`SessionManager::restore`] once at startup.
    pub fn new(transport: T, storage: S, config: &ClientConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                transport,
                store: SessionStore::new(storage, config.session_key.clone())
                    .with_far_customer_key(config.far_customer_key.clone()),
                endpoints: config.endpoints.clone(),
                accept_bare_user: config.accept_bare_user,
                refresh_flight: Mutex::new(None),
            }),
        }
    }

    /// The underlying session store.
    #[must_use]
    pub fn store(&self) -> &SessionStore<S> {
        &self.inner.store
    }

    /// The unauthenticated transport.
    #[must_use]
    pub fn transport(&self) -> &T {
        &self.inner.transport
    }

    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        self.inner.store.snapshot()
    }

    #[must_use]
    pub fn session(&self) -> Session {
        self.inner.store.session()
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.inner.store.is_authenticated()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.inner.store.subscribe()
    }

    /// A [`Transport`] that sends every request through
    /// [`SessionManager::authenticated_request`].
    #[must_use]
    pub fn authenticated_transport(&self) -> AuthenticatedTransport<T, S> {
        AuthenticatedTransport::new(self.clone())
    }

    /// A [`Transport`] that sends every request through
    /// [`SessionManager::far_customer_request`].
    #[must_use]
    pub fn far_customer_transport(&self) -> FarCustomerTransport<T, S> {
        FarCustomerTransport::new(self.clone())
    }

    /// Sign in with email and password.
    ///
    /// # Errors
    /// The backend's rejection (its `detail` as message), a transport
    /// failure, or `InvalidResponse` for a malformed token response. The
    /// session is left untouched on error.
    pub async fn login(&self, email: &str, password: &str) -> Result<Session, ClientError> {
        let body = LoginRequest::new(email, password).to_body();
        self.sign_in(&self.inner.endpoints.login, body, "password").await
    }

    /// Create an account and sign in.
    ///
    /// # Errors
    /// Same as [`SessionManager::login`].
    pub async fn register(&self, request: RegisterRequest) -> Result<Session, ClientError> {
        self.sign_in(&self.inner.endpoints.register, request.to_body(), "register")
            .await
    }

    /// Sign in with an identity-provider credential.
    ///
    /// # Errors
    /// Same as [`SessionManager::login`].
    pub async fn login_with_provider(
        &self,
        provider: SocialProvider,
        credential: &str,
    ) -> Result<Session, ClientError> {
        let path = match provider {
            SocialProvider::Google => &self.inner.endpoints.google,
            SocialProvider::Apple => &self.inner.endpoints.apple,
        };
        let body = SocialLoginRequest {
            credential: credential.to_string(),
        }
        .to_body();
        self.sign_in(path, body, provider_label(provider)).await
    }

    /// Forget the session, and any FAR customer session, locally. No
    /// network call; never fails.
    pub async fn logout(&self) {
        self.inner.store.clear().await;
        self.inner.store.set_far_customer(None).await;
        tracing::info!("signed out");
    }

    /// Sign in as a FAR customer by customer ID.
    ///
    /// The resulting session holds only an access token and is kept apart
    /// from the app session, which is left untouched.
    ///
    /// # Errors
    /// The backend's rejection (`Invalid Customer ID` for an unknown ID), a
    /// transport failure, or `InvalidResponse` for a malformed token
    /// response. Any previous FAR customer session is kept on error.
    pub async fn far_customer_login(
        &self,
        customer_id: &str,
    ) -> Result<FarCustomerSession, ClientError> {
        let body = FarCustomerLoginRequest {
            customer_id: customer_id.to_string(),
        }
        .to_body();
        let response = self
            .inner
            .transport
            .send(ApiRequest::post(&self.inner.endpoints.far_customer_login).json(body))
            .await
            .inspect_err(|e| tracing::info!(error = %e, "FAR customer sign-in rejected"))?;

        let far = parse_far_customer(&response, customer_id)?;
        self.inner.store.set_far_customer(Some(far.clone())).await;
        tracing::info!(customer_id = %far.customer_id, "signed in as FAR customer");

        Ok(far)
    }

    /// Leave FAR customer mode, keeping the app session.
    pub async fn far_customer_logout(&self) {
        self.inner.store.set_far_customer(None).await;
        tracing::info!("left FAR customer mode");
    }

    #[must_use]
    pub fn far_customer_session(&self) -> Option<FarCustomerSession> {
        self.inner.store.far_customer()
    }

    #[must_use]
    pub fn is_far_customer(&self) -> bool {
        self.inner.store.far_customer().is_some()
    }

    /// Send `request` with the FAR customer token.
    ///
    /// There is nothing to refresh in this mode: a 401 is returned as is.
    ///
    /// # Errors
    /// `NotAuthenticated` without sending anything when not in FAR customer
    /// mode, otherwise whatever the request returns.
    pub async fn far_customer_request(&self, request: ApiRequest) -> Result<Value, ClientError> {
        let far = self
            .inner
            .store
            .far_customer()
            .ok_or(ClientError::NotAuthenticated)?;
        self.inner
            .transport
            .send(request.bearer(far.access_token))
            .await
    }

    /// Exchange the refresh token for a new token pair.
    ///
    /// Concurrent callers share one refresh call. The call runs as its own
    /// task, so it completes and settles the state even if every caller
    /// gives up waiting. A response without a `refresh_token` keeps the
    /// current one.
    ///
    /// # Errors
    /// `MissingRefreshToken` when no session is held, `NotAuthenticated` if
    /// the session changed while the refresh was in flight, otherwise the
    /// refresh call's error. The session is kept on failure.
    pub async fn refresh(&self) -> Result<Session, ClientError> {
        let refresh_token = self
            .inner
            .store
            .refresh_token()
            .ok_or(ClientError::MissingRefreshToken)?;

        let flight = {
            let mut slot = self.inner.refresh_flight.lock().await;
            if let Some(pending) = slot.as_ref() {
                tracing::debug!("joining in-flight token refresh");
                pending.clone()
            } else {
                let inner = Arc::clone(&self.inner);
                let task = tokio::spawn(async move {
                    let result = run_refresh(&inner, refresh_token).await;
                    // Later refreshes start a new call.
                    inner.refresh_flight.lock().await.take();
                    result
                });
                let flight = async move {
                    task.await.unwrap_or_else(|e| {
                        Err(ClientError::Transport(format!("token refresh aborted: {e}")))
                    })
                }
                .boxed()
                .shared();
                *slot = Some(flight.clone());
                flight
            }
        };

        flight.await
    }

    /// Send `request` with the current access token.
    ///
    /// On a 401 the token is refreshed once and the request retried once.
    /// If another caller already rotated the token, the retry uses it
    /// without refreshing again.
    ///
    /// # Errors
    /// `NotAuthenticated` without sending anything when no token is held.
    /// The original 401 when no refresh is possible or the refresh fails.
    /// Otherwise whatever the (retried) request returns.
    pub async fn authenticated_request(&self, request: ApiRequest) -> Result<Value, ClientError> {
        let store = &self.inner.store;
        let token = store.access_token().ok_or(ClientError::NotAuthenticated)?;
        let path = request.path.clone();

        let original = match self
            .inner
            .transport
            .send(request.clone().bearer(token.clone()))
            .await
        {
            Err(e) if e.is_unauthorized() => e,
            other => return other,
        };

        if store.refresh_token().is_none() {
            return Err(original);
        }

        let retry_token = match store.access_token() {
            Some(current) if current != token => {
                tracing::debug!(%path, "token already rotated, retrying");
                current
            }
            _ => match self.refresh().await {
                Ok(session) => match session.access_token {
                    Some(token) => token,
                    None => return Err(original),
                },
                Err(e) => {
                    tracing::warn!(%path, error = %e, "refresh after 401 failed");
                    return Err(original);
                }
            },
        };

        self.inner.transport.send(request.bearer(retry_token)).await
    }

    /// Restore the persisted session and validate it against the backend.
    ///
    /// A valid session is merged with the fresh profile. An expired access
    /// token gets one refresh. Anything else signs out. A persisted FAR
    /// customer session is taken as is. Clears the loading flag when done,
    /// whatever the outcome.
    pub async fn restore(&self) -> SessionSnapshot {
        let store = &self.inner.store;

        if let Some(far) = store.load_far_customer().await {
            tracing::debug!(customer_id = %far.customer_id, "restored FAR customer session");
            store.set_far_customer(Some(far)).await;
        }

        match store.load_persisted().await {
            Some(session) => {
                store.replace(session.clone(), AuthState::Restoring).await;
                self.validate(session).await;
            }
            None => tracing::debug!("no persisted session"),
        }

        store.finish_loading();
        store.snapshot()
    }

    async fn validate(&self, session: Session) {
        let Some(token) = session.access_token.clone() else {
            self.logout().await;
            return;
        };

        let me = ApiRequest::get(&self.inner.endpoints.me).bearer(token);
        match self.inner.transport.send(me).await {
            Ok(profile) => {
                let user = merge_profile(session.user.clone(), profile);
                let validated = Session {
                    user: Some(user),
                    ..session
                };
                self.inner
                    .store
                    .replace(validated, AuthState::Authenticated)
                    .await;
                tracing::info!("restored session");
            }
            Err(e) if e.is_unauthorized() => match self.refresh().await {
                Ok(_) => tracing::info!("restored session after token refresh"),
                Err(e) => {
                    tracing::warn!(error = %e, "persisted session could not be refreshed");
                    self.logout().await;
                }
            },
            Err(e) => {
                tracing::warn!(error = %e, "persisted session could not be validated");
                self.logout().await;
            }
        }
    }

    async fn sign_in(
        &self,
        path: &str,
        body: Value,
        method: &'static str,
    ) -> Result<Session, ClientError> {
        let response = self
            .inner
            .transport
            .send(ApiRequest::post(path).json(body))
            .await
            .inspect_err(|e| tracing::info!(method, error = %e, "sign-in rejected"))?;

        let payload = AuthPayload::parse(response, self.inner.accept_bare_user)?;
        if payload.shape == UserShape::Bare {
            tracing::debug!(method, "token response has no user object, using body as profile");
        }
        let session = payload.into_session(None)?;

        self.inner
            .store
            .replace(session.clone(), AuthState::Authenticated)
            .await;
        tracing::info!(method, "signed in");

        Ok(session)
    }
}

async fn run_refresh<T, S>(inner: &Inner<T, S>, refresh_token: String) -> Result<Session, ClientError>
where
    T: Transport,
    S: KeyValueStore,
{
    // During restore the state stays Restoring until validation decides.
    let restoring = inner.store.snapshot().state == AuthState::Restoring;
    let settle = || {
        if !restoring {
            inner.store.settle();
        }
    };
    if !restoring {
        inner.store.set_state(AuthState::Refreshing);
    }

    let request = ApiRequest::post(&inner.endpoints.refresh).json(
        RefreshRequest {
            refresh_token: refresh_token.clone(),
        }
        .to_body(),
    );
    let result = inner
        .transport
        .send(request)
        .await
        .and_then(|body| AuthPayload::parse(body, inner.accept_bare_user))
        .and_then(|payload| payload.into_session(Some(refresh_token.clone())));

    let session = match result {
        Ok(session) => session,
        Err(e) => {
            settle();
            return Err(e);
        }
    };

    let applied = inner
        .store
        .replace_if(
            |current| current.refresh_token.as_deref() == Some(refresh_token.as_str()),
            session.clone(),
            AuthState::Authenticated,
        )
        .await;
    if !applied {
        tracing::debug!("session changed during refresh, discarding new tokens");
        settle();
        return Err(ClientError::NotAuthenticated);
    }

    tracing::info!("access token refreshed");
    Ok(session)
}

/// Overlay the fresh profile on the stored one.
fn merge_profile(stored: Option<Value>, fresh: Value) -> Value {
    match (stored, fresh) {
        (Some(Value::Object(mut base)), Value::Object(update)) => {
            base.extend(update);
            Value::Object(base)
        }
        (Some(stored), Value::Null) => stored,
        (_, fresh) => fresh,
    }
}

const fn provider_label(provider: SocialProvider) -> &'static str {
    match provider {
        SocialProvider::Google => "google",
        SocialProvider::Apple => "apple",
    }
}
