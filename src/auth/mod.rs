//! Identity for upgrade requests.
//!
//! Credential validation belongs to the auth service; the gateway only
//! turns an already-issued token into an `Identity` through an
//! `IdentityResolver`.

mod claims;
mod identity;
mod jwt;

pub use claims::Claims;
pub use identity::{Credentials, Identity, IdentityResolver};
pub use jwt::JwtIdentityResolver;
