//! Transport decorators attaching the session's bearer token.

use async_trait::async_trait;
use folio_core::{ApiRequest, ClientError, KeyValueStore, Transport};
use serde_json::Value;

use crate::manager::SessionManager;

/// Sends every request through [`SessionManager::authenticated_request`],
/// so anything written against [`Transport`] gets refresh-and-retry.
pub struct AuthenticatedTransport<T, S> {
    manager: SessionManager<T, S>,
}

impl<T, S> AuthenticatedTransport<T, S> {
    #[must_use]
    pub const fn new(manager: SessionManager<T, S>) -> Self {
        Self { manager }
    }

    #[must_use]
    pub const fn manager(&self) -> &SessionManager<T, S> {
        &self.manager
    }
}

impl<T, S> Clone for AuthenticatedTransport<T, S> {
    fn clone(&self) -> Self {
        Self {
            manager: self.manager.clone(),
        }
    }
}

#[async_trait]
impl<T, S> Transport for AuthenticatedTransport<T, S>
where
    T: Transport + 'static,
    S: KeyValueStore + 'static,
{
    async fn send(&self, request: ApiRequest) -> Result<Value, ClientError> {
        self.manager.authenticated_request(request).await
    }
}

/// Sends every request through [`SessionManager::far_customer_request`].
pub struct FarCustomerTransport<T, S> {
    manager: SessionManager<T, S>,
}

impl<T, S> FarCustomerTransport<T, S> {
    #[must_use]
    pub const fn new(manager: SessionManager<T, S>) -> Self {
        Self { manager }
    }
}

impl<T, S> Clone for FarCustomerTransport<T, S> {
    fn clone(&self) -> Self {
        Self {
            manager: self.manager.clone(),
        }
    }
}

#[async_trait]
impl<T, S> Transport for FarCustomerTransport<T, S>
where
    T: Transport + 'static,
    S: KeyValueStore + 'static,
{
    async fn send(&self, request: ApiRequest) -> Result<Value, ClientError> {
        self.manager.far_customer_request(request).await
    }
}
