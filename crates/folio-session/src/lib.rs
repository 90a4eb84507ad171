//! Session lifecycle and data access for the Folio dashboard.
//!
//! Provides:
//! - `SessionManager` - Sign-in flows (app and FAR customer), token refresh
//!   and authenticated calls
//! - `SessionStore` - Observable, persisted session state
//! - `RouteGuard` - Access decisions for protected views
//! - `QueryClient` - Cached, stale-while-revalidate queries
//! - Storage implementations (memory, JSON file)

pub mod authenticated;
pub mod guard;
pub mod manager;
pub mod query;
pub mod storage;
pub mod store;

#[cfg(test)]
mod testing;

pub use authenticated::{AuthenticatedTransport, FarCustomerTransport};
pub use guard::{DEFAULT_LOGIN_PATH, GuardDecision, RouteGuard};
pub use manager::SessionManager;
pub use query::{QueryClient, QueryHandle, QueryState};
pub use store::SessionStore;
