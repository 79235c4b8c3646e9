//! Collaborators shared by the orchestration functions.

use std::sync::Arc;

use crate::domain::backtest::EngineSettings;
use crate::domain::locks::VersionLocks;
use crate::ports::artifact_port::ModelArtifactPort;
use crate::ports::engine_port::{BacktestEngine, TrainingEngine};
use crate::ports::report_port::ReportStore;
use crate::ports::store_port::AlgorithmStore;

#[derive(Clone)]
pub struct Services {
    pub store: Arc<dyn AlgorithmStore>,
    pub trainer: Arc<dyn TrainingEngine>,
    pub simulator: Arc<dyn BacktestEngine>,
    pub artifacts: Arc<dyn ModelArtifactPort>,
    pub reports: Arc<dyn ReportStore>,
    pub settings: EngineSettings,
    pub locks: VersionLocks,
}
