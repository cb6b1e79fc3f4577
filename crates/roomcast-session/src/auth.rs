//! Authentication hook for resolving who a client is.
//!
//! Roomcast doesn't implement authentication itself: token issuance and
//! validation (JWT, an auth API, ...) belong to your auth provider.
//!
//! Instead, Roomcast defines the [`Authenticator`] trait: a single async
//! method that takes the bearer token from the connect URL and returns an
//! [`Identity`] or an error. The lifecycle controller calls it before the
//! connection is registered into any room.

use std::collections::HashMap;
use std::future::Future;

use serde::Deserialize;

use crate::SessionError;

/// A resolved user.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Identity {
    /// Stable unique key (user id), used for membership checks.
    pub key: String,
    /// Display name attached to every event this user produces.
    pub name: String,
}

impl Identity {
    /// Creates an identity from a key and a display name.
    pub fn new(key: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            name: name.into(),
        }
    }
}

/// Validates a client's bearer token and returns their identity.
///
/// # Trait bounds
///
/// - `Send + Sync` → the authenticator is shared by every connection task.
/// - `'static` → it lives as long as the server.
///
/// # Example
///
/// ```rust
/// use roomcast_session::{Authenticator, Identity, SessionError};
///
/// /// Accepts any non-empty token and uses it as both key and name.
/// /// Only for development: never use this in production!
/// struct TrustingAuthenticator;
///
/// impl Authenticator for TrustingAuthenticator {
///     async fn authenticate(&self, token: &str) -> Result<Identity, SessionError> {
///         if token.is_empty() {
///             return Err(SessionError::AuthFailed("empty token".into()));
///         }
///         Ok(Identity::new(token, token))
///     }
/// }
/// ```
pub trait Authenticator: Send + Sync + 'static {
    /// Validates the given token and returns the user's identity.
    ///
    /// # Returns
    /// - `Ok(Identity)`: authentication succeeded
    /// - `Err(SessionError::AuthFailed)`: token is missing/invalid/expired
    fn authenticate(
        &self,
        token: &str,
    ) -> impl Future<Output = Result<Identity, SessionError>> + Send;
}

/// An [`Authenticator`] backed by a fixed token → identity table.
///
/// Useful for development, demos and tests; the table is usually filled
/// from the `[[tokens]]` section of the server config.
#[derive(Debug, Clone, Default)]
pub struct TokenTable {
    tokens: HashMap<String, Identity>,
}

impl TokenTable {
    /// Creates an empty table (every token is rejected).
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces the identity for `token`.
    pub fn insert(&mut self, token: impl Into<String>, identity: Identity) {
        self.tokens.insert(token.into(), identity);
    }

    /// Builder-style [`insert`](Self::insert).
    pub fn with(mut self, token: impl Into<String>, identity: Identity) -> Self {
        self.insert(token, identity);
        self
    }

    /// Number of known tokens.
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// Returns `true` if no token is known.
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

impl Authenticator for TokenTable {
    async fn authenticate(&self, token: &str) -> Result<Identity, SessionError> {
        if token.is_empty() {
            return Err(SessionError::AuthFailed("missing token".into()));
        }
        self.tokens
            .get(token)
            .cloned()
            .ok_or_else(|| SessionError::AuthFailed("unknown token".into()))
    }
}

impl FromIterator<(String, Identity)> for TokenTable {
    fn from_iter<I: IntoIterator<Item = (String, Identity)>>(iter: I) -> Self {
        Self {
            tokens: iter.into_iter().collect(),
        }
    }
}
