//! Feed authentication
//!
//! Acquires the short-lived token that authorizes a feed connection and
//! classifies acquisition failures so the connection layer can pick a backoff.

mod token;
mod types;

pub use token::{TokenAcquirer, TokenConfig, TokenSource};
pub use types::{AuthError, AuthErrorKind, BackoffClass, Token};
