//! Training and simulation engine port traits.

use std::path::PathBuf;

use crate::domain::algorithm::Period;
use crate::domain::condition::ConditionNode;
use crate::domain::error::StratlabError;
use crate::domain::features::MlFeatures;
use crate::domain::management::RiskManagement;
use crate::domain::normalize::RawStats;

#[derive(Debug, Clone)]
pub struct TrainingJob {
    pub instrument: String,
    pub period: Period,
    pub features: MlFeatures,
    pub artifact_path: PathBuf,
}

pub trait TrainingEngine: Send + Sync {
    /// Fit a model at `job.artifact_path` and return the trained configuration.
    fn train(&self, job: &TrainingJob) -> Result<MlFeatures, StratlabError>;
}

/// What the simulation trades on.
#[derive(Debug, Clone)]
pub enum SimulationInput {
    Model {
        artifact_path: PathBuf,
        features: MlFeatures,
    },
    ConditionTree(Vec<ConditionNode>),
}

impl SimulationInput {
    /// Strategy name understood by the engine.
    pub fn model_name(&self) -> &'static str {
        match self {
            SimulationInput::Model { .. } => "ml_model",
            SimulationInput::ConditionTree(_) => "if_model",
        }
    }
}

#[derive(Debug, Clone)]
pub struct SimulationJob {
    pub input: SimulationInput,
    pub instrument: String,
    pub period: Period,
    pub trading_fee: f64,
    pub lookback: u32,
    pub balance: f64,
    pub leverage: f64,
    pub management: RiskManagement,
}

#[derive(Debug, Clone)]
pub struct SimulationOutput {
    pub stats: RawStats,
    /// Rendered report, typically HTML.
    pub report: Vec<u8>,
}

pub trait BacktestEngine: Send + Sync {
    fn simulate(&self, job: &SimulationJob) -> Result<SimulationOutput, StratlabError>;
}
