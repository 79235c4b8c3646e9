//! Per-version mutual exclusion.

use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use uuid::Uuid;

/// One mutex per version id, created on first use.
///
/// The mutexes are not reentrant: code that already holds a version's
/// lock must not ask for it again.
#[derive(Debug, Clone, Default)]
pub struct VersionLocks {
    inner: Arc<DashMap<Uuid, Arc<Mutex<()>>>>,
}

impl VersionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock_for(&self, version: Uuid) -> Arc<Mutex<()>> {
        self.inner
            .entry(version)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}
