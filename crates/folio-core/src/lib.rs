//! Core abstractions for the Folio session client.
//!
//! This crate provides the fundamental building blocks:
//! - `Session` / `SessionSnapshot` - Authentication state and its lifecycle
//! - `FarCustomerSession` - Access-token-only FAR customer mode
//! - `ApiRequest` - Transport-agnostic request description
//! - `Transport` / `KeyValueStore` - Traits for HTTP and durable storage
//! - `QueryCache` - Bounded response cache keyed by endpoint + payload
//! - `ClientConfig` - Backend location and client tuning

pub mod cache;
pub mod config;
pub mod error;
pub mod session;
pub mod traits;

pub use cache::{CacheEntry, QueryCache, cache_key};
pub use config::{
    AuthEndpoints, ClientConfig, DEFAULT_API_BASE, FAR_CUSTOMER_STORAGE_KEY, SESSION_STORAGE_KEY,
};
pub use error::{ClientError, ConfigError};
pub use session::{AuthState, FarCustomerSession, Session, SessionSnapshot};
pub use traits::{ApiRequest, KeyValueStore, Method, StorageError, Transport};
