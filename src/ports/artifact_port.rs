//! Model artifact port trait.

use std::path::PathBuf;

use uuid::Uuid;

use crate::domain::algorithm::Period;
use crate::domain::error::StratlabError;

/// Identity of one trained model artifact.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArtifactKey {
    pub algorithm: Uuid,
    pub version: Uuid,
    pub instrument: String,
    pub period: Period,
}

pub trait ModelArtifactPort: Send + Sync {
    /// Where the artifact for `key` lives. The file need not exist yet.
    fn path_for(&self, key: &ArtifactKey) -> Result<PathBuf, StratlabError>;

    /// Delete the artifact for `key`. Removing a missing artifact is not an error.
    fn remove(&self, key: &ArtifactKey) -> Result<(), StratlabError>;
}
