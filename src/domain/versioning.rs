//! Version store operations: validated drafts and the create/replace rule.
//!
//! Saving with no version id always creates a version. Saving with an id
//! replaces that version when the algorithm already has it, and creates a
//! version carrying the given id otherwise, so clients may pre-generate
//! ids. [`resolve_write`] decides the branch before anything is written.

use serde::Deserialize;
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

use crate::domain::algorithm::{AlgoKind, Algorithm, AlgorithmVersion};
use crate::domain::error::StratlabError;
use crate::domain::feature_config::FeatureConfig;
use crate::domain::management::RiskManagement;
use crate::domain::services::Services;

/// Unvalidated save request as received from a client.
#[derive(Debug, Clone, Deserialize)]
pub struct VersionPayload {
    pub features: Value,
    pub management: Value,
    #[serde(default)]
    pub nodes: Option<Value>,
}

/// Save request that passed validation for a particular algorithm kind.
#[derive(Debug, Clone, PartialEq)]
pub struct VersionDraft {
    pub features: FeatureConfig,
    pub management: RiskManagement,
    pub nodes: Option<Value>,
}

impl VersionPayload {
    pub fn validate(&self, kind: AlgoKind) -> Result<VersionDraft, StratlabError> {
        let features = FeatureConfig::validate(kind, &self.features)?;
        let management = RiskManagement::from_value(&self.management)?;
        let nodes = self.nodes.clone().filter(|n| !n.is_null());
        Ok(VersionDraft {
            features,
            management,
            nodes,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionWrite {
    Create { id: Uuid },
    Replace { id: Uuid },
}

impl VersionWrite {
    pub fn id(&self) -> Uuid {
        match self {
            VersionWrite::Create { id } | VersionWrite::Replace { id } => *id,
        }
    }
}

pub fn resolve_write(algorithm: &Algorithm, requested: Option<Uuid>) -> VersionWrite {
    match requested {
        None => VersionWrite::Create { id: Uuid::new_v4() },
        Some(id) if algorithm.version(id).is_some() => VersionWrite::Replace { id },
        Some(id) => VersionWrite::Create { id },
    }
}

/// Validate `payload` against the algorithm's kind and store it.
///
/// A caller-supplied id is locked before the create/replace decision, so
/// concurrent saves of one id and an in-flight train or backtest of that
/// version run one after another.
pub fn save_version(
    services: &Services,
    algorithm_id: Uuid,
    version_id: Option<Uuid>,
    payload: &VersionPayload,
) -> Result<AlgorithmVersion, StratlabError> {
    let lock = version_id.map(|id| services.locks.lock_for(id));
    let _guard = lock
        .as_ref()
        .map(|lock| lock.lock().unwrap_or_else(|p| p.into_inner()));

    let algorithm = services
        .store
        .get_algorithm(algorithm_id)?
        .ok_or(StratlabError::AlgorithmNotFound { id: algorithm_id })?;
    let draft = payload.validate(algorithm.kind)?;

    match resolve_write(&algorithm, version_id) {
        VersionWrite::Create { id } => {
            let version = services.store.append_version(algorithm_id, id, &draft)?;
            info!(algorithm = %algorithm_id, version = %id, "version created");
            Ok(version)
        }
        VersionWrite::Replace { id } => {
            let version = services.store.replace_version(algorithm_id, id, &draft)?;
            info!(algorithm = %algorithm_id, version = %id, "version replaced");
            Ok(version)
        }
    }
}
