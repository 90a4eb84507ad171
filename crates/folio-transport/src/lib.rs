//! Transport layer for the Folio backend.
//!
//! Provides:
//! - `HttpClient` - reqwest-backed [`Transport`](folio_core::Transport)
//! - Wire types for the auth endpoints and the token-response parser

pub mod http;
pub mod protocol;

pub use http::HttpClient;
pub use protocol::{
    AuthPayload, FAR_CUSTOMER_MODE, FarCustomerLoginRequest, LoginRequest, RefreshRequest,
    RegisterRequest, SocialLoginRequest, SocialProvider, UserShape, parse_far_customer,
};
