//! Training orchestration.
//!
//! [`train_version`] is the standalone entry point and holds the
//! version's lock for the whole run. [`retrain`] is the shared core that
//! the backtest path calls while it already holds the lock.

use std::path::PathBuf;
use std::time::Instant;

use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::algorithm::{AlgoKind, Algorithm, AlgorithmVersion, Period};
use crate::domain::dispatch::Stage;
use crate::domain::error::StratlabError;
use crate::domain::feature_config::FeatureConfig;
use crate::domain::services::Services;
use crate::ports::artifact_port::ArtifactKey;
use crate::ports::engine_port::TrainingJob;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrainingRequest {
    pub algorithm_id: Uuid,
    pub version_id: Uuid,
    pub period: Period,
}

#[derive(Debug, Clone)]
pub struct TrainingOutcome {
    /// The version as committed, carrying the trained features.
    pub version: AlgorithmVersion,
    pub artifact_path: PathBuf,
}

pub fn train_version(
    services: &Services,
    request: &TrainingRequest,
    on_stage: &dyn Fn(Stage),
) -> Result<TrainingOutcome, StratlabError> {
    let started = Instant::now();
    info!(
        algorithm = %request.algorithm_id,
        version = %request.version_id,
        period = %request.period,
        "training requested"
    );

    let lock = services.locks.lock_for(request.version_id);
    let _guard = lock.lock().unwrap_or_else(|p| p.into_inner());

    let result = services
        .store
        .get_algorithm(request.algorithm_id)
        .and_then(|found| {
            found.ok_or(StratlabError::AlgorithmNotFound {
                id: request.algorithm_id,
            })
        })
        .and_then(|algorithm| {
            let version = algorithm.require_version(request.version_id)?;
            retrain(services, &algorithm, version, request.period, on_stage)
        });

    let elapsed_ms = started.elapsed().as_millis() as u64;
    match &result {
        Ok(_) => info!(
            algorithm = %request.algorithm_id,
            version = %request.version_id,
            elapsed_ms,
            "training succeeded"
        ),
        Err(e) => warn!(
            algorithm = %request.algorithm_id,
            version = %request.version_id,
            elapsed_ms,
            error = %e,
            "training failed"
        ),
    }
    result
}

/// Retrain `version` and write the trained features back to it.
///
/// The caller must hold the version's lock. Only the feature
/// configuration is rewritten; management and nodes are left alone.
pub fn retrain(
    services: &Services,
    algorithm: &Algorithm,
    version: &AlgorithmVersion,
    period: Period,
    on_stage: &dyn Fn(Stage),
) -> Result<TrainingOutcome, StratlabError> {
    let features = match (&algorithm.kind, &version.features) {
        (AlgoKind::Ml, FeatureConfig::Ml(f)) => f.clone(),
        _ => {
            return Err(StratlabError::ConfigurationMismatch {
                operation: "train",
                kind: algorithm.kind,
            });
        }
    };

    let key = ArtifactKey {
        algorithm: algorithm.id,
        version: version.id,
        instrument: algorithm.instrument.clone(),
        period,
    };
    let artifact_path = services.artifacts.path_for(&key)?;
    services.artifacts.remove(&key)?;

    on_stage(Stage::Training);
    info!(
        algorithm = %algorithm.id,
        version = %version.id,
        instrument = %algorithm.instrument,
        period = %period,
        groups = ?features.enabled_groups(),
        "training running"
    );

    let job = TrainingJob {
        instrument: algorithm.instrument.clone(),
        period,
        features,
        artifact_path: artifact_path.clone(),
    };
    let trained = services.trainer.train(&job)?;

    match services
        .store
        .update_features(algorithm.id, version.id, &trained)
    {
        Ok(version) => Ok(TrainingOutcome {
            version,
            artifact_path,
        }),
        Err(e) if e.is_not_found() => {
            if let Err(cleanup) = services.artifacts.remove(&key) {
                warn!(path = %artifact_path.display(), error = %cleanup, "failed to discard artifact");
            }
            Err(e)
        }
        Err(e) => {
            warn!(path = %artifact_path.display(), "training commit failed, artifact kept");
            Err(e)
        }
    }
}
