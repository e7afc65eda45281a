//! OAuth 2.0 authorization server embedded in the gateway.
//!
//! Protocol logic lives in [`OAuthService`] and only talks to the
//! [`Storage`](crate::storage::Storage) port; [`handlers`] adapts it to HTTP.
//!
//! ## Supported Standards
//! - RFC 7591: Dynamic Client Registration
//! - RFC 6749: Authorization Code Grant
//! - RFC 7636: PKCE (S256, optional)

pub mod handlers;
pub mod redirect;
pub mod secrets;
mod service;

pub use redirect::RedirectPolicy;
pub use service::{
    AuthorizeRequest, DEFAULT_SCOPE, Identity, IssuedToken, OAuthService, RegisteredClient,
    TokenRequest,
};
