#![allow(dead_code)]

use serde_json::{Value, json};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use stratlab::adapters::file_config_adapter::FileConfigAdapter;
use stratlab::adapters::sqlite_adapter::SqliteStore;
use stratlab::domain::algorithm::{
    AlgoKind, Algorithm, AlgorithmBacktest, AlgorithmSummary, AlgorithmVersion, NewAlgorithm,
    ReportPointer, UserId,
};
use stratlab::domain::backtest::EngineSettings;
use stratlab::domain::catalog;
use stratlab::domain::error::StratlabError;
use stratlab::domain::features::MlFeatures;
use stratlab::domain::locks::VersionLocks;
use stratlab::domain::normalize::{BacktestStats, raw_stats_from_json};
use stratlab::domain::services::Services;
use stratlab::domain::versioning::{VersionDraft, VersionPayload};
use stratlab::ports::store_port::AlgorithmStore;
use uuid::Uuid;
use stratlab::ports::artifact_port::{ArtifactKey, ModelArtifactPort};
use stratlab::ports::engine_port::{
    BacktestEngine, SimulationJob, SimulationOutput, TrainingEngine, TrainingJob,
};
use stratlab::ports::report_port::ReportStore;

/// Trainer that records its jobs and stamps a fixed threshold on the result.
pub struct RecordingTrainer {
    pub jobs: Mutex<Vec<TrainingJob>>,
    pub threshold: f64,
    pub failure: Option<String>,
}

impl RecordingTrainer {
    pub fn new() -> Self {
        Self {
            jobs: Mutex::new(Vec::new()),
            threshold: 0.62,
            failure: None,
        }
    }

    pub fn failing(reason: &str) -> Self {
        Self {
            failure: Some(reason.to_string()),
            ..Self::new()
        }
    }

    pub fn calls(&self) -> usize {
        self.jobs.lock().unwrap().len()
    }
}

impl TrainingEngine for RecordingTrainer {
    fn train(&self, job: &TrainingJob) -> Result<MlFeatures, StratlabError> {
        self.jobs.lock().unwrap().push(job.clone());
        if let Some(reason) = &self.failure {
            return Err(StratlabError::Engine {
                stage: "train",
                reason: reason.clone(),
            });
        }
        let mut trained = job.features.clone();
        trained.threshold = Some(self.threshold);
        Ok(trained)
    }
}

/// Simulator answering every job with the same engine table.
pub struct ScriptedSimulator {
    pub jobs: Mutex<Vec<SimulationJob>>,
    pub table: Value,
    pub failure: Option<String>,
}

impl ScriptedSimulator {
    pub fn new() -> Self {
        Self {
            jobs: Mutex::new(Vec::new()),
            table: engine_table(),
            failure: None,
        }
    }

    pub fn failing(reason: &str) -> Self {
        Self {
            failure: Some(reason.to_string()),
            ..Self::new()
        }
    }

    pub fn with_table(table: Value) -> Self {
        Self {
            table,
            ..Self::new()
        }
    }

    pub fn calls(&self) -> usize {
        self.jobs.lock().unwrap().len()
    }

    pub fn last_job(&self) -> Option<SimulationJob> {
        self.jobs.lock().unwrap().last().cloned()
    }
}

impl BacktestEngine for ScriptedSimulator {
    fn simulate(&self, job: &SimulationJob) -> Result<SimulationOutput, StratlabError> {
        self.jobs.lock().unwrap().push(job.clone());
        if let Some(reason) = &self.failure {
            return Err(StratlabError::Engine {
                stage: "backtest",
                reason: reason.clone(),
            });
        }
        let table = self.table.as_object().cloned().unwrap_or_default();
        Ok(SimulationOutput {
            stats: raw_stats_from_json(&table)?,
            report: b"<html><body>equity</body></html>".to_vec(),
        })
    }
}

/// Simulator that signals each call and holds it until released.
pub struct GatedSimulator {
    inner: ScriptedSimulator,
    entered: Mutex<Sender<()>>,
    release: Mutex<Receiver<()>>,
}

impl GatedSimulator {
    /// The simulator, a receiver that fires when a call starts, and the
    /// sender that lets one call finish.
    pub fn new() -> (Self, Receiver<()>, Sender<()>) {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let simulator = Self {
            inner: ScriptedSimulator::new(),
            entered: Mutex::new(entered_tx),
            release: Mutex::new(release_rx),
        };
        (simulator, entered_rx, release_tx)
    }
}

impl BacktestEngine for GatedSimulator {
    fn simulate(&self, job: &SimulationJob) -> Result<SimulationOutput, StratlabError> {
        let _ = self.entered.lock().unwrap().send(());
        let _ = self.release.lock().unwrap().recv();
        self.inner.simulate(job)
    }
}

/// SQLite store whose feature writeback or backtest insert can be made to fail.
pub struct FaultyStore {
    pub inner: Arc<SqliteStore>,
    pub lose_version_on_update: bool,
    pub fail_backtest_insert: bool,
}

impl FaultyStore {
    pub fn new(inner: Arc<SqliteStore>) -> Self {
        Self {
            inner,
            lose_version_on_update: false,
            fail_backtest_insert: false,
        }
    }
}

impl AlgorithmStore for FaultyStore {
    fn user_exists(&self, user: UserId) -> Result<bool, StratlabError> {
        self.inner.user_exists(user)
    }

    fn create_algorithm(
        &self,
        owner: UserId,
        algorithm: &NewAlgorithm,
    ) -> Result<Algorithm, StratlabError> {
        self.inner.create_algorithm(owner, algorithm)
    }

    fn get_algorithm(&self, id: Uuid) -> Result<Option<Algorithm>, StratlabError> {
        self.inner.get_algorithm(id)
    }

    fn list_algorithms(&self, owner: UserId) -> Result<Vec<Algorithm>, StratlabError> {
        self.inner.list_algorithms(owner)
    }

    fn search_algorithms(&self) -> Result<Vec<AlgorithmSummary>, StratlabError> {
        self.inner.search_algorithms()
    }

    fn append_version(
        &self,
        algorithm_id: Uuid,
        version_id: Uuid,
        draft: &VersionDraft,
    ) -> Result<AlgorithmVersion, StratlabError> {
        self.inner.append_version(algorithm_id, version_id, draft)
    }

    fn replace_version(
        &self,
        algorithm_id: Uuid,
        version_id: Uuid,
        draft: &VersionDraft,
    ) -> Result<AlgorithmVersion, StratlabError> {
        self.inner.replace_version(algorithm_id, version_id, draft)
    }

    fn update_features(
        &self,
        algorithm_id: Uuid,
        version_id: Uuid,
        features: &MlFeatures,
    ) -> Result<AlgorithmVersion, StratlabError> {
        if self.lose_version_on_update {
            return Err(StratlabError::VersionNotFound {
                algorithm: algorithm_id,
                version: version_id,
            });
        }
        self.inner.update_features(algorithm_id, version_id, features)
    }

    fn insert_backtest(
        &self,
        algorithm_id: Uuid,
        version_id: Uuid,
        stats: &BacktestStats,
        graph_url: &ReportPointer,
    ) -> Result<AlgorithmBacktest, StratlabError> {
        if self.fail_backtest_insert {
            return Err(StratlabError::Persistence {
                reason: "disk I/O error".into(),
            });
        }
        self.inner
            .insert_backtest(algorithm_id, version_id, stats, graph_url)
    }

    fn list_backtests(
        &self,
        algorithm_id: Uuid,
        version_id: Uuid,
    ) -> Result<Vec<AlgorithmBacktest>, StratlabError> {
        self.inner.list_backtests(algorithm_id, version_id)
    }
}

/// Report store kept in memory, addressed under `/backtests`.
#[derive(Default)]
pub struct MemoryReportStore {
    pub reports: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryReportStore {
    pub fn count(&self) -> usize {
        self.reports.lock().unwrap().len()
    }
}

impl ReportStore for MemoryReportStore {
    fn write(&self, name: &str, bytes: &[u8]) -> Result<ReportPointer, StratlabError> {
        let mut reports = self.reports.lock().unwrap();
        if reports.contains_key(name) {
            return Err(StratlabError::Persistence {
                reason: format!("report {name} already exists"),
            });
        }
        reports.insert(name.to_string(), bytes.to_vec());
        Ok(ReportPointer(format!("/backtests/{name}")))
    }

    fn resolve(&self, pointer: &ReportPointer) -> Option<PathBuf> {
        let name = pointer.as_str().strip_prefix("/backtests/")?;
        self.reports
            .lock()
            .unwrap()
            .contains_key(name)
            .then(|| PathBuf::from(name))
    }
}

/// Artifact store that only computes paths and counts removals.
#[derive(Default)]
pub struct RecordingArtifacts {
    pub removed: AtomicUsize,
}

impl ModelArtifactPort for RecordingArtifacts {
    fn path_for(&self, key: &ArtifactKey) -> Result<PathBuf, StratlabError> {
        Ok(PathBuf::from(format!(
            "/models/{}/{}/{}_{}.model",
            key.algorithm, key.version, key.instrument, key.period
        )))
    }

    fn remove(&self, _key: &ArtifactKey) -> Result<(), StratlabError> {
        self.removed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Services wired to in-memory collaborators, with one registered user.
pub struct Harness {
    pub services: Services,
    pub store: Arc<SqliteStore>,
    pub trainer: Arc<RecordingTrainer>,
    pub simulator: Arc<ScriptedSimulator>,
    pub reports: Arc<MemoryReportStore>,
    pub artifacts: Arc<RecordingArtifacts>,
    pub user: UserId,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_engines(RecordingTrainer::new(), ScriptedSimulator::new())
    }

    pub fn with_engines(trainer: RecordingTrainer, simulator: ScriptedSimulator) -> Self {
        Self::assemble(SqliteStore::in_memory().unwrap(), trainer, simulator)
    }

    /// Harness over a SQLite file in `dir` with a pool of `pool_size`.
    pub fn file_backed(dir: &Path, pool_size: u32) -> Self {
        let ini = format!(
            "[sqlite]\npath = {}\npool_size = {pool_size}\n",
            dir.join("stratlab.db").display()
        );
        let config = FileConfigAdapter::from_string(&ini).unwrap();
        Self::assemble(
            SqliteStore::from_config(&config).unwrap(),
            RecordingTrainer::new(),
            ScriptedSimulator::new(),
        )
    }

    fn assemble(store: SqliteStore, trainer: RecordingTrainer, simulator: ScriptedSimulator) -> Self {
        let store = Arc::new(store);
        store.initialize_schema().unwrap();
        let user = store.add_user("trader@example.com").unwrap();

        let trainer = Arc::new(trainer);
        let simulator = Arc::new(simulator);
        let reports = Arc::new(MemoryReportStore::default());
        let artifacts = Arc::new(RecordingArtifacts::default());
        let services = Services {
            store: store.clone(),
            trainer: trainer.clone(),
            simulator: simulator.clone(),
            artifacts: artifacts.clone(),
            reports: reports.clone(),
            settings: EngineSettings::default(),
            locks: VersionLocks::new(),
        };
        Self {
            services,
            store,
            trainer,
            simulator,
            reports,
            artifacts,
            user,
        }
    }

    pub fn create(&self, kind: AlgoKind, instrument: &str) -> Algorithm {
        catalog::create_algorithm(self.store.as_ref(), self.user, kind, "strategy", instrument)
            .unwrap()
    }

    pub fn reload(&self, algorithm: &Algorithm) -> Algorithm {
        catalog::get_algorithm(self.store.as_ref(), algorithm.id).unwrap()
    }
}

pub fn ml_features() -> Value {
    json!({
        "lags": {"features": ["open", "close", "target"], "period": [1, 2, 3]},
        "cma": {"features": ["open", "close", "volume"]},
        "sma": {"features": ["open", "close", "volume"], "period": [2, 3, 4]},
        "ema": {"features": ["open", "close", "volume"], "period": [2, 3, 4, 10]},
        "green_candles_ratio": {"period": [2]},
        "red_candles_ratio": {"period": [2]},
        "rsi": false,
        "macd": false,
        "bollinger": false,
        "time_features": {
            "month": true, "week": true, "day_of_month": true,
            "day_of_week": true, "hour": true, "minute": true
        },
        "model": "lightgbm"
    })
}

pub fn two_node_and() -> Value {
    json!([{
        "type": "and",
        "blocks": [
            {"type": "if", "feature": "anomaly", "condition": "high", "param": "value"},
            {"type": "if", "feature": "anomal_rsi", "param": {"period": 14, "value": 70}}
        ]
    }])
}

pub fn management() -> Value {
    json!({
        "balance": 100000.0,
        "max_balance_for_trading": 50000.0,
        "min_balance_for_trading": 1000.0,
        "part_of_balance_for_buy": 0.25,
        "sell_all": true
    })
}

pub fn payload(features: Value) -> VersionPayload {
    serde_json::from_value(json!({
        "features": features,
        "management": management(),
        "nodes": {"layout": [{"id": 1, "x": 10, "y": 20}]}
    }))
    .unwrap()
}

pub fn engine_table() -> Value {
    json!({
        "Start": "2023-01-02 10:00:00",
        "End": "2023-03-31 18:39:00",
        "Duration": "88 days 08:39:00",
        "Exposure Time [%]": 41.25,
        "Equity Final [$]": 103250.0,
        "Equity Peak [$]": 104100.5,
        "Return [%]": 3.25,
        "Buy & Hold Return [%]": -1.8,
        "Return (Ann.) [%]": 14.1,
        "Volatility (Ann.) [%]": 9.7,
        "Sharpe Ratio": "NaN",
        "Sortino Ratio": 1.4,
        "Calmar Ratio": 2.2,
        "Max. Drawdown [%]": -4.1,
        "Avg. Drawdown [%]": -0.6,
        "Max. Drawdown Duration": "12 days 03:00:00",
        "Avg. Drawdown Duration": "1 days 02:30:15",
        "# Trades": 422.0,
        "Win Rate [%]": 55.0,
        "Best Trade [%]": 2.4,
        "Worst Trade [%]": -1.9,
        "Avg. Trade [%]": 0.01,
        "Max. Trade Duration": "0 days 05:00:00",
        "Avg. Trade Duration": "0 days 00:41:00",
        "Profit Factor": 1.3,
        "Expectancy [%]": 0.02,
        "SQN": 1.1,
        "_strategy": "MlModel"
    })
}
