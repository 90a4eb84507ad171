//! Observable, write-through session state.
//!
//! The current [`SessionSnapshot`] is published on a `watch` channel so any
//! number of observers see every transition. Each transition that changes
//! the session is persisted to the [`KeyValueStore`] before the call returns.
//! The FAR customer record lives under a key of its own.

use folio_core::{
    AuthState, FAR_CUSTOMER_STORAGE_KEY, FarCustomerSession, KeyValueStore, Session,
    SessionSnapshot,
};
use tokio::sync::{Mutex, watch};
use tokio_stream::wrappers::WatchStream;

/// Holder of the single current session.
pub struct SessionStore<S> {
    storage: S,
    key: String,
    far_key: String,
    state: watch::Sender<SessionSnapshot>,
    /// Held across publish + persist so storage sees transitions in order.
    write_lock: Mutex<()>,
}

impl<S: KeyValueStore> SessionStore<S> {
    /// Create an empty store persisting under `key`. Starts in the loading
    /// state until the startup restore finishes.
    pub fn new(storage: S, key: impl Into<String>) -> Self {
        let (state, _) = watch::channel(SessionSnapshot::initial());
        Self {
            storage,
            key: key.into(),
            far_key: FAR_CUSTOMER_STORAGE_KEY.into(),
            state,
            write_lock: Mutex::new(()),
        }
    }

    /// Persist the FAR customer record under `key` instead of the default.
    #[must_use]
    pub fn with_far_customer_key(mut self, key: impl Into<String>) -> Self {
        self.far_key = key.into();
        self
    }

    /// Current state.
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        self.state.borrow().clone()
    }

    /// Current session.
    #[must_use]
    pub fn session(&self) -> Session {
        self.state.borrow().session.clone()
    }

    #[must_use]
    pub fn access_token(&self) -> Option<String> {
        self.state.borrow().session.access_token.clone()
    }

    #[must_use]
    pub fn refresh_token(&self) -> Option<String> {
        self.state.borrow().session.refresh_token.clone()
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.state.borrow().is_authenticated()
    }

    #[must_use]
    pub fn far_customer(&self) -> Option<FarCustomerSession> {
        self.state.borrow().far_customer.clone()
    }

    /// True until the startup restore has finished.
    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.state.borrow().loading
    }

    /// Observe state transitions.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.state.subscribe()
    }

    /// State transitions as a stream, starting with the current value.
    #[must_use]
    pub fn changes(&self) -> WatchStream<SessionSnapshot> {
        WatchStream::new(self.state.subscribe())
    }

    /// Storage key of the persisted record.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Storage key of the persisted FAR customer record.
    #[must_use]
    pub fn far_customer_key(&self) -> &str {
        &self.far_key
    }

    /// Replace the whole session and persist it.
    pub(crate) async fn replace(&self, session: Session, state: AuthState) {
        self.commit(|snapshot| {
            snapshot.session = session;
            snapshot.state = state;
        })
        .await;
    }

    /// Replace the session only if `current` still holds; returns whether
    /// the replacement happened.
    pub(crate) async fn replace_if<F>(&self, current: F, session: Session, state: AuthState) -> bool
    where
        F: FnOnce(&Session) -> bool,
    {
        let _guard = self.write_lock.lock().await;
        let applied = self.state.send_if_modified(|snapshot| {
            if !current(&snapshot.session) {
                return false;
            }
            snapshot.session = session;
            snapshot.state = state;
            true
        });
        if applied {
            let session = self.session();
            self.persist(&session).await;
        }
        applied
    }

    /// Drop the session and its persisted record.
    pub(crate) async fn clear(&self) {
        self.commit(|snapshot| {
            snapshot.session = Session::default();
            snapshot.state = AuthState::Unauthenticated;
        })
        .await;
    }

    /// Enter or leave FAR customer mode. The app session is not touched.
    pub(crate) async fn set_far_customer(&self, far: Option<FarCustomerSession>) {
        let _guard = self.write_lock.lock().await;
        self.state.send_modify(|snapshot| snapshot.far_customer.clone_from(&far));

        let key = self.far_key.as_str();
        let Some(far) = far else {
            self.discard(key).await;
            return;
        };
        match serde_json::to_string(&far) {
            Ok(serialized) => {
                if let Err(e) = self.storage.set(key, serialized).await {
                    tracing::warn!(key, error = %e, "failed to persist FAR customer session");
                }
            }
            Err(e) => tracing::warn!(key, error = %e, "failed to serialize FAR customer session"),
        }
    }

    /// Change the lifecycle state without touching the session.
    pub(crate) fn set_state(&self, state: AuthState) {
        self.state.send_if_modified(|snapshot| {
            let changed = snapshot.state != state;
            snapshot.state = state;
            changed
        });
    }

    /// Return to the resting state implied by the session contents.
    pub(crate) fn settle(&self) {
        self.state.send_if_modified(|snapshot| {
            let resting = if snapshot.session.is_authenticated() {
                AuthState::Authenticated
            } else {
                AuthState::Unauthenticated
            };
            let changed = snapshot.state != resting;
            snapshot.state = resting;
            changed
        });
    }

    /// Mark the startup restore as done.
    pub(crate) fn finish_loading(&self) {
        self.state.send_if_modified(|snapshot| {
            let changed = snapshot.loading;
            snapshot.loading = false;
            changed
        });
    }

    /// Read the persisted record.
    ///
    /// A record missing either token, or one that cannot be parsed, is
    /// discarded and treated as absent.
    pub async fn load_persisted(&self) -> Option<Session> {
        let raw = match self.storage.get(&self.key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(key = %self.key, error = %e, "failed to read persisted session");
                return None;
            }
        };

        match serde_json::from_str::<Session>(&raw) {
            Ok(session) if session.has_token_pair() => Some(session),
            Ok(_) => {
                tracing::info!(key = %self.key, "discarding persisted session without token pair");
                self.discard(&self.key).await;
                None
            }
            Err(e) => {
                tracing::warn!(key = %self.key, error = %e, "corrupted persisted session, discarding");
                self.discard(&self.key).await;
                None
            }
        }
    }

    /// Read the persisted FAR customer record; an unreadable one or one
    /// with an empty token is discarded.
    pub async fn load_far_customer(&self) -> Option<FarCustomerSession> {
        let key = self.far_key.as_str();
        let raw = match self.storage.get(key).await {
            Ok(raw) => raw?,
            Err(e) => {
                tracing::warn!(key, error = %e, "failed to read FAR customer session");
                return None;
            }
        };

        match serde_json::from_str::<FarCustomerSession>(&raw) {
            Ok(far) if !far.access_token.is_empty() => Some(far),
            Ok(_) => {
                self.discard(key).await;
                None
            }
            Err(e) => {
                tracing::warn!(key, error = %e, "corrupted FAR customer session, discarding");
                self.discard(key).await;
                None
            }
        }
    }

    async fn commit<F>(&self, apply: F)
    where
        F: FnOnce(&mut SessionSnapshot),
    {
        let _guard = self.write_lock.lock().await;
        self.state.send_modify(apply);
        let session = self.session();
        self.persist(&session).await;
    }

    /// Persistence failures are logged; in-memory state stays authoritative.
    async fn persist(&self, session: &Session) {
        if session.is_empty() {
            self.discard(&self.key).await;
            return;
        }

        let serialized = match serde_json::to_string(session) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(key = %self.key, error = %e, "failed to serialize session");
                return;
            }
        };
        if let Err(e) = self.storage.set(&self.key, serialized).await {
            tracing::warn!(key = %self.key, error = %e, "failed to persist session");
        }
    }

    async fn discard(&self, key: &str) {
        if let Err(e) = self.storage.remove(key).await {
            tracing::warn!(key, error = %e, "failed to remove persisted record");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use folio_core::{SESSION_STORAGE_KEY, StorageError};
    use serde_json::json;
    use tokio_stream::StreamExt;

    use super::*;
    use crate::storage::MemoryStore;

    fn store() -> (SessionStore<Arc<MemoryStore>>, Arc<MemoryStore>) {
        let backing = Arc::new(MemoryStore::new());
        (SessionStore::new(Arc::clone(&backing), SESSION_STORAGE_KEY), backing)
    }

    fn sample() -> Session {
        Session::new(json!({"id": 1, "email": "a@b.com"}), "AT1", "RT1")
    }

    #[tokio::test]
    async fn test_starts_empty_and_loading() {
        let (store, _) = store();
        let snapshot = store.snapshot();
        assert!(snapshot.loading);
        assert!(snapshot.session.is_empty());
        assert_eq!(snapshot.state, AuthState::Unauthenticated);
        assert!(!store.is_authenticated());
    }

    #[tokio::test]
    async fn test_replace_writes_through() {
        let (store, backing) = store();
        store.replace(sample(), AuthState::Authenticated).await;

        let raw = backing.get(SESSION_STORAGE_KEY).await.unwrap().unwrap();
        let persisted: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(
            persisted,
            json!({
                "user": {"id": 1, "email": "a@b.com"},
                "accessToken": "AT1",
                "refreshToken": "RT1"
            })
        );
        assert_eq!(store.load_persisted().await, Some(sample()));
    }

    #[tokio::test]
    async fn test_clear_removes_record() {
        let (store, backing) = store();
        store.replace(sample(), AuthState::Authenticated).await;
        store.clear().await;

        assert!(store.session().is_empty());
        assert_eq!(store.snapshot().state, AuthState::Unauthenticated);
        assert!(backing.get(SESSION_STORAGE_KEY).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_partial_record_discarded() {
        let (store, backing) = store();
        backing
            .set(SESSION_STORAGE_KEY, r#"{"user":{"id":1},"accessToken":"AT1"}"#.into())
            .await
            .unwrap();

        assert!(store.load_persisted().await.is_none());
        assert!(backing.get(SESSION_STORAGE_KEY).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_corrupted_record_discarded() {
        let (store, backing) = store();
        backing.set(SESSION_STORAGE_KEY, "{oops".into()).await.unwrap();

        assert!(store.load_persisted().await.is_none());
        assert!(backing.is_empty());
    }

    #[tokio::test]
    async fn test_replace_if_guards_on_current_session() {
        let (store, _) = store();
        store.replace(sample(), AuthState::Authenticated).await;

        let rotated = Session::new(json!({"id": 1}), "AT2", "RT2");
        let stale = store
            .replace_if(
                |s| s.refresh_token.as_deref() == Some("RT0"),
                rotated.clone(),
                AuthState::Authenticated,
            )
            .await;
        assert!(!stale);
        assert_eq!(store.access_token().as_deref(), Some("AT1"));

        let fresh = store
            .replace_if(
                |s| s.refresh_token.as_deref() == Some("RT1"),
                rotated,
                AuthState::Authenticated,
            )
            .await;
        assert!(fresh);
        assert_eq!(store.access_token().as_deref(), Some("AT2"));
    }

    #[tokio::test]
    async fn test_observers_see_transitions() {
        let (store, _) = store();
        let mut changes = store.changes();

        let first = changes.next().await.unwrap();
        assert!(first.loading);

        store.finish_loading();
        let second = changes.next().await.unwrap();
        assert!(!second.loading);

        store.replace(sample(), AuthState::Authenticated).await;
        let third = changes.next().await.unwrap();
        assert!(third.is_authenticated());
    }

    struct BrokenStore;

    #[async_trait::async_trait]
    impl KeyValueStore for BrokenStore {
        async fn get(&self, _key: &str) -> Result<Option<String>, StorageError> {
            Err(StorageError::Internal("disk on fire".into()))
        }

        async fn set(&self, _key: &str, _value: String) -> Result<(), StorageError> {
            Err(StorageError::Internal("disk on fire".into()))
        }

        async fn remove(&self, _key: &str) -> Result<(), StorageError> {
            Err(StorageError::Internal("disk on fire".into()))
        }

        async fn keys(&self, _prefix: &str) -> Result<Vec<String>, StorageError> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_storage_failures_do_not_block_transitions() {
        let store = SessionStore::new(BrokenStore, SESSION_STORAGE_KEY);

        store.replace(sample(), AuthState::Authenticated).await;
        assert!(store.is_authenticated());

        store.clear().await;
        assert!(store.session().is_empty());
        assert!(store.load_persisted().await.is_none());
    }

    #[tokio::test]
    async fn test_far_customer_record_is_separate() {
        let (store, backing) = store();
        store.replace(sample(), AuthState::Authenticated).await;

        store
            .set_far_customer(Some(FarCustomerSession::new("FAR1", "C-100")))
            .await;
        assert!(store.snapshot().is_far_customer());
        assert!(store.is_authenticated());
        let raw = backing.get(FAR_CUSTOMER_STORAGE_KEY).await.unwrap().unwrap();
        assert_eq!(
            serde_json::from_str::<serde_json::Value>(&raw).unwrap(),
            json!({"accessToken": "FAR1", "customerId": "C-100"})
        );
        assert_eq!(
            store.load_far_customer().await,
            Some(FarCustomerSession::new("FAR1", "C-100"))
        );

        store.set_far_customer(None).await;
        assert!(store.far_customer().is_none());
        assert!(backing.get(FAR_CUSTOMER_STORAGE_KEY).await.unwrap().is_none());
        assert!(backing.get(SESSION_STORAGE_KEY).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_corrupted_far_customer_record_discarded() {
        let (store, backing) = store();
        backing
            .set(FAR_CUSTOMER_STORAGE_KEY, r#"{"customerId":"C-100"}"#.into())
            .await
            .unwrap();

        assert!(store.load_far_customer().await.is_none());
        assert!(backing.is_empty());
    }

    #[tokio::test]
    async fn test_settle_follows_session() {
        let (store, _) = store();
        store.replace(sample(), AuthState::Authenticated).await;
        store.set_state(AuthState::Refreshing);
        store.settle();
        assert_eq!(store.snapshot().state, AuthState::Authenticated);

        store.clear().await;
        store.set_state(AuthState::Refreshing);
        store.settle();
        assert_eq!(store.snapshot().state, AuthState::Unauthenticated);
    }
}
