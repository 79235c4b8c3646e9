//! Inline and detached execution of training and backtest runs.
//!
//! Both paths call the same orchestration functions; detached runs are
//! additionally tracked in a [`JobRegistry`] that callers can poll.
//! Finished jobs stay pollable for the registry's retention window and
//! are swept when a new job is registered.

use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, error};
use uuid::Uuid;

use crate::domain::backtest::{self, BacktestOutcome, BacktestRequest};
use crate::domain::error::StratlabError;
use crate::domain::services::Services;
use crate::domain::training::{self, TrainingOutcome, TrainingRequest};

/// Running stage reported by the orchestration functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Training,
    Simulating,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Train,
    Backtest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Requested,
    Running,
    Succeeded,
    Failed,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Failed)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JobStatus {
    pub id: Uuid,
    pub kind: JobKind,
    pub algorithm_id: Uuid,
    pub version_id: Uuid,
    pub state: JobState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<Stage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

/// How long a finished job stays pollable by default.
pub const DEFAULT_JOB_RETENTION_SECS: i64 = 3600;

#[derive(Debug, Clone)]
pub struct JobRegistry {
    jobs: Arc<DashMap<Uuid, JobStatus>>,
    retention: TimeDelta,
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::with_retention(TimeDelta::seconds(DEFAULT_JOB_RETENTION_SECS))
    }
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retention(retention: TimeDelta) -> Self {
        Self {
            jobs: Arc::new(DashMap::new()),
            retention,
        }
    }

    pub fn register(&self, kind: JobKind, algorithm_id: Uuid, version_id: Uuid) -> Uuid {
        self.sweep();
        let id = Uuid::new_v4();
        self.jobs.insert(
            id,
            JobStatus {
                id,
                kind,
                algorithm_id,
                version_id,
                state: JobState::Requested,
                stage: None,
                message: None,
                started_at: None,
                updated_at: Utc::now(),
            },
        );
        id
    }

    pub fn get(&self, id: Uuid) -> Option<JobStatus> {
        self.jobs.get(&id).map(|entry| entry.value().clone())
    }

    /// Drop finished jobs whose last update is older than the retention.
    fn sweep(&self) {
        let cutoff = Utc::now() - self.retention;
        let before = self.jobs.len();
        self.jobs
            .retain(|_, job| !job.state.is_terminal() || job.updated_at > cutoff);
        let evicted = before.saturating_sub(self.jobs.len());
        if evicted > 0 {
            debug!(evicted, "finished jobs evicted");
        }
    }

    fn start(&self, id: Uuid) {
        if let Some(mut job) = self.jobs.get_mut(&id) {
            let now = Utc::now();
            job.state = JobState::Running;
            job.started_at = Some(now);
            job.updated_at = now;
        }
    }

    fn running(&self, id: Uuid, stage: Stage) {
        if let Some(mut job) = self.jobs.get_mut(&id) {
            job.state = JobState::Running;
            job.stage = Some(stage);
            job.updated_at = Utc::now();
        }
    }

    fn finish(&self, id: Uuid, outcome: Result<(), &StratlabError>) {
        if let Some(mut job) = self.jobs.get_mut(&id) {
            match outcome {
                Ok(()) => job.state = JobState::Succeeded,
                Err(e) => {
                    job.state = JobState::Failed;
                    job.message = Some(e.to_string());
                }
            }
            job.updated_at = Utc::now();
        }
    }
}

/// Runs orchestration on the blocking pool of a tokio runtime.
#[derive(Clone)]
pub struct Dispatcher {
    services: Arc<Services>,
    jobs: JobRegistry,
    runtime: Handle,
}

impl Dispatcher {
    pub fn new(services: Arc<Services>, runtime: Handle) -> Self {
        Self {
            services,
            jobs: JobRegistry::new(),
            runtime,
        }
    }

    /// Build a dispatcher on the runtime the caller is running in.
    pub fn current(services: Arc<Services>) -> Result<Self, StratlabError> {
        let runtime = Handle::try_current().map_err(|e| StratlabError::Dispatch {
            reason: e.to_string(),
        })?;
        Ok(Self::new(services, runtime))
    }

    pub fn with_jobs(mut self, jobs: JobRegistry) -> Self {
        self.jobs = jobs;
        self
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    pub fn jobs(&self) -> &JobRegistry {
        &self.jobs
    }

    /// Run `work` on the blocking pool and wait for it.
    pub async fn run_blocking<T, F>(&self, work: F) -> Result<T, StratlabError>
    where
        T: Send + 'static,
        F: FnOnce(&Services) -> Result<T, StratlabError> + Send + 'static,
    {
        let services = self.services.clone();
        self.runtime
            .spawn_blocking(move || work(services.as_ref()))
            .await
            .map_err(join_failed)?
    }

    pub async fn train_inline(
        &self,
        request: TrainingRequest,
    ) -> Result<TrainingOutcome, StratlabError> {
        self.run_blocking(move |services| {
            training::train_version(services, &request, &|_: Stage| {})
        })
        .await
    }

    pub async fn backtest_inline(
        &self,
        request: BacktestRequest,
    ) -> Result<BacktestOutcome, StratlabError> {
        self.run_blocking(move |services| {
            backtest::run_backtest(services, &request, &|_: Stage| {})
        })
        .await
    }

    /// Start training in the background and return its job id.
    pub fn train_detached(&self, request: TrainingRequest) -> (Uuid, JoinHandle<()>) {
        self.detached(
            JobKind::Train,
            request.algorithm_id,
            request.version_id,
            move |services, on_stage| {
                training::train_version(services, &request, on_stage).map(|_| ())
            },
        )
    }

    /// Start a backtest in the background and return its job id.
    pub fn backtest_detached(&self, request: BacktestRequest) -> (Uuid, JoinHandle<()>) {
        self.detached(
            JobKind::Backtest,
            request.algorithm_id,
            request.version_id,
            move |services, on_stage| {
                backtest::run_backtest(services, &request, on_stage).map(|_| ())
            },
        )
    }

    fn detached<F>(
        &self,
        kind: JobKind,
        algorithm_id: Uuid,
        version_id: Uuid,
        work: F,
    ) -> (Uuid, JoinHandle<()>)
    where
        F: FnOnce(&Services, &dyn Fn(Stage)) -> Result<(), StratlabError> + Send + 'static,
    {
        let job_id = self.jobs.register(kind, algorithm_id, version_id);
        let services = self.services.clone();
        let jobs = self.jobs.clone();
        debug!(job = %job_id, ?kind, "job queued");

        let handle = self.runtime.spawn_blocking(move || {
            jobs.start(job_id);
            let on_stage: &dyn Fn(Stage) = &|stage| jobs.running(job_id, stage);
            let result = work(services.as_ref(), on_stage);
            if let Err(e) = &result {
                error!(job = %job_id, ?kind, error = %e, "detached job failed");
            }
            jobs.finish(job_id, result.as_ref().map(|_| ()));
        });
        (job_id, handle)
    }
}

fn join_failed(e: tokio::task::JoinError) -> StratlabError {
    StratlabError::Dispatch {
        reason: e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_tracks_lifecycle() {
        let registry = JobRegistry::new();
        let id = registry.register(JobKind::Train, Uuid::nil(), Uuid::nil());
        assert_eq!(registry.get(id).unwrap().state, JobState::Requested);

        registry.start(id);
        let job = registry.get(id).unwrap();
        assert_eq!(job.state, JobState::Running);
        assert!(job.stage.is_none());
        assert!(job.started_at.is_some());

        registry.running(id, Stage::Training);
        let job = registry.get(id).unwrap();
        assert_eq!(job.state, JobState::Running);
        assert_eq!(job.stage, Some(Stage::Training));

        let err = StratlabError::Engine {
            stage: "train",
            reason: "not enough candles".into(),
        };
        registry.finish(id, Err(&err));
        let job = registry.get(id).unwrap();
        assert_eq!(job.state, JobState::Failed);
        assert!(job.message.unwrap().contains("not enough candles"));
    }

    #[test]
    fn unknown_job_is_none() {
        assert!(JobRegistry::new().get(Uuid::new_v4()).is_none());
    }

    #[test]
    fn status_serializes_lowercase() {
        let registry = JobRegistry::new();
        let id = registry.register(JobKind::Backtest, Uuid::nil(), Uuid::nil());
        registry.running(id, Stage::Simulating);
        let json = serde_json::to_value(registry.get(id).unwrap()).unwrap();
        assert_eq!(json["kind"], "backtest");
        assert_eq!(json["state"], "running");
        assert_eq!(json["stage"], "simulating");
        assert!(json.get("message").is_none());
    }

    #[test]
    fn register_evicts_expired_finished_jobs() {
        let registry = JobRegistry::with_retention(TimeDelta::zero());
        let done = registry.register(JobKind::Train, Uuid::nil(), Uuid::nil());
        registry.finish(done, Ok(()));
        let busy = registry.register(JobKind::Backtest, Uuid::nil(), Uuid::nil());
        registry.start(busy);
        let queued = registry.register(JobKind::Train, Uuid::nil(), Uuid::nil());

        let fresh = registry.register(JobKind::Train, Uuid::nil(), Uuid::nil());
        assert!(registry.get(done).is_none());
        assert_eq!(registry.get(busy).unwrap().state, JobState::Running);
        assert_eq!(registry.get(queued).unwrap().state, JobState::Requested);
        assert!(registry.get(fresh).is_some());
    }

    #[test]
    fn finished_jobs_within_retention_stay_pollable() {
        let registry = JobRegistry::with_retention(TimeDelta::hours(1));
        let done = registry.register(JobKind::Train, Uuid::nil(), Uuid::nil());
        registry.finish(done, Ok(()));
        registry.register(JobKind::Train, Uuid::nil(), Uuid::nil());
        assert_eq!(registry.get(done).unwrap().state, JobState::Succeeded);
    }
}
