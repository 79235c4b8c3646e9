//! Backtest orchestration.
//!
//! ML algorithms are always retrained before simulation so that the stored
//! result matches the configuration that produced it. Rule-based
//! algorithms go straight to the simulator. A row is written only after
//! the simulation succeeded, its statistics normalized and its report
//! stored.

use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::algorithm::{AlgoKind, Algorithm, AlgorithmVersion, Period, ReportPointer};
use crate::domain::condition::ConditionNode;
use crate::domain::dispatch::Stage;
use crate::domain::error::StratlabError;
use crate::domain::feature_config::FeatureConfig;
use crate::domain::normalize::{BacktestStats, normalize};
use crate::domain::services::Services;
use crate::domain::training::retrain;
use crate::ports::engine_port::{SimulationInput, SimulationJob};

/// Engine-wide simulation parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineSettings {
    pub trading_fee: f64,
    pub lookback: u32,
    pub leverage: f64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            trading_fee: 0.1,
            lookback: 6,
            leverage: 2.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BacktestRequest {
    pub algorithm_id: Uuid,
    pub version_id: Uuid,
    pub period: Period,
}

#[derive(Debug, Clone, Serialize)]
pub struct BacktestOutcome {
    pub backtest_id: i64,
    pub graph_url: ReportPointer,
    pub data: BacktestStats,
}

/// Report name for a run started at `started`.
pub fn report_name(algorithm: Uuid, version: Uuid, started: DateTime<Utc>) -> String {
    format!(
        "{algorithm}_{version}_{}.html",
        started.format("%Y%m%dT%H%M%S%.6fZ")
    )
}

pub fn run_backtest(
    services: &Services,
    request: &BacktestRequest,
    on_stage: &dyn Fn(Stage),
) -> Result<BacktestOutcome, StratlabError> {
    let started_at = Utc::now();
    let started = Instant::now();
    info!(
        algorithm = %request.algorithm_id,
        version = %request.version_id,
        period = %request.period,
        "backtest requested"
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
            simulate_version(services, &algorithm, version, request.period, started_at, on_stage)
        });

    let elapsed_ms = started.elapsed().as_millis() as u64;
    match &result {
        Ok(outcome) => info!(
            algorithm = %request.algorithm_id,
            version = %request.version_id,
            backtest = outcome.backtest_id,
            trades = outcome.data.trades,
            elapsed_ms,
            "backtest succeeded"
        ),
        Err(e) => warn!(
            algorithm = %request.algorithm_id,
            version = %request.version_id,
            elapsed_ms,
            error = %e,
            "backtest failed"
        ),
    }
    result
}

fn simulate_version(
    services: &Services,
    algorithm: &Algorithm,
    version: &AlgorithmVersion,
    period: Period,
    started_at: DateTime<Utc>,
    on_stage: &dyn Fn(Stage),
) -> Result<BacktestOutcome, StratlabError> {
    let input = match (algorithm.kind, &version.features) {
        (AlgoKind::Ml, FeatureConfig::Ml(_)) => {
            let trained = retrain(services, algorithm, version, period, on_stage)?;
            let features = trained
                .version
                .features
                .as_ml()
                .cloned()
                .ok_or(StratlabError::ConfigurationMismatch {
                    operation: "backtest",
                    kind: algorithm.kind,
                })?;
            SimulationInput::Model {
                artifact_path: trained.artifact_path,
                features,
            }
        }
        (AlgoKind::RuleBased, FeatureConfig::Rules(nodes)) => {
            SimulationInput::ConditionTree(nodes.clone())
        }
        _ => {
            return Err(StratlabError::ConfigurationMismatch {
                operation: "backtest",
                kind: algorithm.kind,
            });
        }
    };

    on_stage(Stage::Simulating);
    let conditions: usize = match &input {
        SimulationInput::ConditionTree(nodes) => {
            nodes.iter().map(ConditionNode::leaf_count).sum()
        }
        SimulationInput::Model { .. } => 0,
    };
    info!(
        algorithm = %algorithm.id,
        version = %version.id,
        model = input.model_name(),
        conditions,
        "simulation running"
    );

    let settings = services.settings;
    let job = SimulationJob {
        input,
        instrument: algorithm.instrument.clone(),
        period,
        trading_fee: settings.trading_fee,
        lookback: settings.lookback,
        balance: version.management.balance,
        leverage: settings.leverage,
        management: version.management.clone(),
    };
    let output = services.simulator.simulate(&job)?;
    let stats = normalize(&output.stats)?;

    let name = report_name(algorithm.id, version.id, started_at);
    let graph_url = services.reports.write(&name, &output.report)?;

    let row = services
        .store
        .insert_backtest(algorithm.id, version.id, &stats, &graph_url)
        .inspect_err(|_| warn!(report = %graph_url, "backtest commit failed, report kept"))?;

    Ok(BacktestOutcome {
        backtest_id: row.id,
        graph_url: row.graph_url,
        data: row.data,
    })
}
