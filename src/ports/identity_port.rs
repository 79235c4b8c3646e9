//! Caller identity port trait.

use crate::domain::algorithm::UserId;
use crate::domain::error::StratlabError;

/// Turns a bearer credential into a verified user key.
pub trait IdentityPort: Send + Sync {
    /// Fails with [`StratlabError::Unauthorized`] for unknown or malformed tokens.
    fn verify(&self, token: &str) -> Result<UserId, StratlabError>;
}
