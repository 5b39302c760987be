//! OAuth2 client & token authority.
//!
//! Issues, validates and revokes OAuth clients and access tokens whose owner
//! is any kind of principal, identified by a `(kind, id)` pair.

pub mod api_token;
pub mod authority;
pub mod clock;
pub mod config;
pub mod errors;
pub mod models;
pub mod secret;
pub mod store;

pub use authority::CredentialAuthority;
pub use errors::{AuthorityError, Result};
