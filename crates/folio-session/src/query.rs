//! Cached queries: stale-while-revalidate over [`QueryCache`].
//!
//! A [`QueryHandle`] is one consumer's view of a query. Each
//! [`QueryHandle::fetch`] shows any cached result straight away, then asks
//! the backend and publishes the fresh result, unless a newer fetch on the
//! same handle has started meanwhile.

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use folio_core::{ApiRequest, ClientError, KeyValueStore, QueryCache, Transport, cache_key};
use serde_json::Value;
use tokio::{sync::watch, task::JoinHandle};
use tokio_stream::wrappers::WatchStream;

/// What a consumer renders.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryState {
    /// Last known result: cached or fresh.
    pub data: Option<Value>,
    /// True while fetching with nothing cached to show.
    pub loading: bool,
    /// Failure of the latest fetch; earlier data is kept alongside it.
    pub error: Option<ClientError>,
}

struct QueryInner<T, S> {
    transport: T,
    cache: QueryCache<S>,
}

/// Shared transport and cache for any number of query handles.
pub struct QueryClient<T, S> {
    inner: Arc<QueryInner<T, S>>,
}

impl<T, S> Clone for QueryClient<T, S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T, S> QueryClient<T, S>
where
    T: Transport + 'static,
    S: KeyValueStore + 'static,
{
    #[must_use]
    pub fn new(transport: T, cache: QueryCache<S>) -> Self {
        Self {
            inner: Arc::new(QueryInner { transport, cache }),
        }
    }

    #[must_use]
    pub fn cache(&self) -> &QueryCache<S> {
        &self.inner.cache
    }

    /// A fresh handle with empty state.
    #[must_use]
    pub fn handle(&self) -> QueryHandle<T, S> {
        let (state, _) = watch::channel(QueryState::default());
        QueryHandle {
            client: self.clone(),
            generation: Arc::new(AtomicU64::new(0)),
            state: Arc::new(state),
        }
    }
}

/// One consumer's query state.
pub struct QueryHandle<T, S> {
    client: QueryClient<T, S>,
    /// Bumped by every fetch; responses from older fetches are not shown.
    generation: Arc<AtomicU64>,
    state: Arc<watch::Sender<QueryState>>,
}

impl<T, S> Clone for QueryHandle<T, S> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            generation: Arc::clone(&self.generation),
            state: Arc::clone(&self.state),
        }
    }
}

impl<T, S> QueryHandle<T, S>
where
    T: Transport + 'static,
    S: KeyValueStore + 'static,
{
    #[must_use]
    pub fn state(&self) -> QueryState {
        self.state.borrow().clone()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<QueryState> {
        self.state.subscribe()
    }

    /// State changes as a stream, starting with the current value.
    #[must_use]
    pub fn updates(&self) -> WatchStream<QueryState> {
        WatchStream::new(self.state.subscribe())
    }

    /// Fetch `endpoint` with `payload` and return the resulting state.
    ///
    /// Every successful response is cached, even one that arrives after a
    /// newer fetch has superseded it.
    pub async fn fetch(&self, endpoint: &str, payload: &Value) -> QueryState {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let key = cache_key(endpoint, payload);
        let cache = &self.client.inner.cache;

        let cached = cache.get(&key).await;
        let loading = cached.is_none();
        self.publish(generation, |state| {
            if let Some(entry) = cached {
                state.data = Some(entry.data);
            }
            state.loading = loading;
            state.error = None;
        });

        let request = ApiRequest::post(endpoint).json(payload.clone());
        match self.client.inner.transport.send(request).await {
            Ok(data) => {
                cache.put(&key, data.clone()).await;
                let shown = self.publish(generation, |state| {
                    state.data = Some(data);
                    state.loading = false;
                    state.error = None;
                });
                if !shown {
                    tracing::debug!(endpoint, "query superseded, response cached only");
                }
            }
            Err(e) => {
                tracing::warn!(endpoint, error = %e, "query failed");
                self.publish(generation, |state| {
                    state.loading = false;
                    state.error = Some(e);
                });
            }
        }

        self.state()
    }

    /// Run [`QueryHandle::fetch`] in the background.
    pub fn spawn_fetch(&self, endpoint: impl Into<String>, payload: Value) -> JoinHandle<QueryState> {
        let handle = self.clone();
        let endpoint = endpoint.into();
        tokio::spawn(async move { handle.fetch(&endpoint, &payload).await })
    }

    /// Apply `update` if `generation` is still the latest fetch.
    fn publish<F>(&self, generation: u64, update: F) -> bool
    where
        F: FnOnce(&mut QueryState),
    {
        self.state.send_if_modified(|state| {
            if self.generation.load(Ordering::SeqCst) != generation {
                return false;
            }
            update(state);
            true
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::{
        storage::MemoryStore,
        testing::{FakeBackend, unauthorized},
    };

    type TestClient = QueryClient<Arc<FakeBackend>, Arc<MemoryStore>>;

    fn client(backend: &Arc<FakeBackend>) -> TestClient {
        let cache = QueryCache::new(Arc::new(MemoryStore::new()), 16, None);
        QueryClient::new(Arc::clone(backend), cache)
    }

    fn metrics_backend() -> Arc<FakeBackend> {
        FakeBackend::new(|request| match request.path.as_str() {
            "/api/far/metrics" => Ok(json!({"customers": 42})),
            "/api/far/segments" => Ok(json!({"segments": ["retail"]})),
            _ => Err(unauthorized()),
        })
    }

    #[tokio::test]
    async fn test_fetch_posts_payload_and_caches() {
        let backend = metrics_backend();
        let client = client(&backend);
        let handle = client.handle();

        let state = handle.fetch("/api/far/metrics", &json!({"segment": "retail"})).await;

        assert_eq!(
            state,
            QueryState {
                data: Some(json!({"customers": 42})),
                loading: false,
                error: None,
            }
        );
        let calls = backend.calls();
        let call = &calls[0];
        assert_eq!(call.method, folio_core::Method::Post);
        assert_eq!(call.body, Some(json!({"segment": "retail"})));

        let key = cache_key("/api/far/metrics", &json!({"segment": "retail"}));
        assert_eq!(client.cache().get(&key).await.unwrap().data, json!({"customers": 42}));
    }

    #[tokio::test]
    async fn test_first_fetch_shows_loading() {
        let backend = metrics_backend();
        let gate = backend.gate("/api/far/metrics");
        let handle = client(&backend).handle();
        let mut rx = handle.subscribe();

        let pending = handle.spawn_fetch("/api/far/metrics", json!({}));
        rx.changed().await.unwrap();
        {
            let state = rx.borrow_and_update();
            assert!(state.loading);
            assert!(state.data.is_none());
        }

        gate.notify_one();
        let state = pending.await.unwrap();
        assert!(!state.loading);
        assert_eq!(state.data, Some(json!({"customers": 42})));
    }

    #[tokio::test]
    async fn test_cache_hit_shows_data_without_loading() {
        let backend = metrics_backend();
        let client = client(&backend);
        client.handle().fetch("/api/far/metrics", &json!({})).await;

        // A second consumer of the same query.
        let gate = backend.gate("/api/far/metrics");
        let handle = client.handle();
        let mut rx = handle.subscribe();
        let pending = handle.spawn_fetch("/api/far/metrics", json!({}));

        rx.changed().await.unwrap();
        {
            let state = rx.borrow_and_update();
            assert!(!state.loading);
            assert_eq!(state.data, Some(json!({"customers": 42})));
        }

        gate.notify_one();
        pending.await.unwrap();
        assert_eq!(backend.calls_to("/api/far/metrics"), 2);
    }

    #[tokio::test]
    async fn test_failure_keeps_previous_data() {
        let backend = FakeBackend::new(|request| {
            if request.body == Some(json!({"fail": true})) {
                Err(ClientError::from_response(500, None))
            } else {
                Ok(json!({"customers": 42}))
            }
        });
        let handle = client(&backend).handle();
        handle.fetch("/api/far/metrics", &json!({})).await;

        let state = handle.fetch("/api/far/metrics", &json!({"fail": true})).await;

        assert!(!state.loading);
        assert_eq!(state.data, Some(json!({"customers": 42})));
        assert_eq!(state.error.unwrap().to_string(), "Request failed");
    }

    #[tokio::test]
    async fn test_superseded_response_is_cached_not_shown() {
        let backend = metrics_backend();
        let client = client(&backend);
        let gate = backend.gate("/api/far/metrics");
        let handle = client.handle();

        let stale = handle.spawn_fetch("/api/far/metrics", json!({}));
        while backend.calls_to("/api/far/metrics") == 0 {
            tokio::task::yield_now().await;
        }

        let current = handle.fetch("/api/far/segments", &json!({})).await;
        assert_eq!(current.data, Some(json!({"segments": ["retail"]})));

        gate.notify_one();
        stale.await.unwrap();

        assert_eq!(handle.state().data, Some(json!({"segments": ["retail"]})));
        let stale_key = cache_key("/api/far/metrics", &json!({}));
        assert_eq!(
            client.cache().get(&stale_key).await.unwrap().data,
            json!({"customers": 42})
        );
    }

    #[tokio::test]
    async fn test_handles_are_independent() {
        let backend = metrics_backend();
        let client = client(&backend);
        let first = client.handle();
        let second = client.handle();

        first.fetch("/api/far/metrics", &json!({})).await;

        assert!(first.state().data.is_some());
        assert_eq!(second.state(), QueryState::default());
    }
}
