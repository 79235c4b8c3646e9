//! HTTP request handlers for web adapter.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use crate::domain::algorithm::{
    AlgoKind, Algorithm, AlgorithmBacktest, AlgorithmSummary, AlgorithmVersion, Period,
};
use crate::domain::backtest::{BacktestOutcome, BacktestRequest};
use crate::domain::catalog;
use crate::domain::dispatch::JobStatus;
use crate::domain::error::StratlabError;
use crate::domain::training::TrainingRequest;
use crate::domain::versioning::{self, VersionPayload};

use super::{AppState, CurrentUser, WebError};

type VersionPath = Path<(String, Uuid, String)>;
type RunPath = Path<(String, Uuid, Uuid, String)>;

#[derive(Debug, Deserialize)]
pub struct CreateAlgorithm {
    pub name: String,
    pub sec_id: String,
}

fn parse_kind(raw: &str) -> Result<AlgoKind, WebError> {
    Ok(raw.parse::<AlgoKind>()?)
}

fn parse_period(raw: &str) -> Result<Period, WebError> {
    Ok(raw.parse::<Period>()?)
}

/// `new` asks for a fresh version id; anything else must be a UUID.
fn parse_version(raw: &str) -> Result<Option<Uuid>, WebError> {
    if raw == "new" {
        return Ok(None);
    }
    Uuid::parse_str(raw)
        .map(Some)
        .map_err(|e| StratlabError::validation("version_id", e.to_string()).into())
}

pub async fn list_algorithms(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<Vec<Algorithm>>, WebError> {
    let algorithms = state
        .dispatcher
        .run_blocking(move |services| catalog::list_algorithms(services.store.as_ref(), user))
        .await?;
    Ok(Json(algorithms))
}

pub async fn create_algorithm(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(kind): Path<String>,
    Json(body): Json<CreateAlgorithm>,
) -> Result<Json<Algorithm>, WebError> {
    let kind = parse_kind(&kind)?;
    let algorithm = state
        .dispatcher
        .run_blocking(move |services| {
            catalog::create_algorithm(
                services.store.as_ref(),
                user,
                kind,
                &body.name,
                &body.sec_id,
            )
        })
        .await?;
    Ok(Json(algorithm))
}

pub async fn get_algorithm(
    State(state): State<Arc<AppState>>,
    CurrentUser(_user): CurrentUser,
    Path((kind, id)): Path<(String, Uuid)>,
) -> Result<Json<Algorithm>, WebError> {
    let kind = parse_kind(&kind)?;
    let algorithm = state
        .dispatcher
        .run_blocking(move |services| {
            catalog::get_algorithm_of_kind(services.store.as_ref(), id, kind)
        })
        .await?;
    Ok(Json(algorithm))
}

pub async fn save_version(
    State(state): State<Arc<AppState>>,
    CurrentUser(_user): CurrentUser,
    Path((kind, id, version)): VersionPath,
    Json(payload): Json<VersionPayload>,
) -> Result<Json<AlgorithmVersion>, WebError> {
    let kind = parse_kind(&kind)?;
    let version = parse_version(&version)?;
    let saved = state
        .dispatcher
        .run_blocking(move |services| {
            catalog::get_algorithm_of_kind(services.store.as_ref(), id, kind)?;
            versioning::save_version(services, id, version, &payload)
        })
        .await?;
    Ok(Json(saved))
}

/// Queue a training run and answer before it finishes.
pub async fn train(
    State(state): State<Arc<AppState>>,
    CurrentUser(_user): CurrentUser,
    Path((kind, id, version, period)): RunPath,
) -> Result<impl IntoResponse, WebError> {
    let kind = parse_kind(&kind)?;
    let period = parse_period(&period)?;
    state
        .dispatcher
        .run_blocking(move |services| {
            let algorithm = catalog::get_algorithm_of_kind(services.store.as_ref(), id, kind)?;
            algorithm.require_version(version)?;
            if algorithm.kind != AlgoKind::Ml {
                return Err(StratlabError::ConfigurationMismatch {
                    operation: "train",
                    kind: algorithm.kind,
                });
            }
            Ok(())
        })
        .await?;

    let (job_id, _) = state.dispatcher.train_detached(TrainingRequest {
        algorithm_id: id,
        version_id: version,
        period,
    });
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "job_id": job_id, "state": "requested" })),
    ))
}

pub async fn backtest(
    State(state): State<Arc<AppState>>,
    CurrentUser(_user): CurrentUser,
    Path((kind, id, version, period)): RunPath,
) -> Result<Json<BacktestOutcome>, WebError> {
    let kind = parse_kind(&kind)?;
    let period = parse_period(&period)?;
    state
        .dispatcher
        .run_blocking(move |services| {
            catalog::get_algorithm_of_kind(services.store.as_ref(), id, kind).map(|_| ())
        })
        .await?;

    let outcome = state
        .dispatcher
        .backtest_inline(BacktestRequest {
            algorithm_id: id,
            version_id: version,
            period,
        })
        .await?;
    Ok(Json(outcome))
}

pub async fn list_backtests(
    State(state): State<Arc<AppState>>,
    CurrentUser(_user): CurrentUser,
    Path((kind, id, version)): Path<(String, Uuid, Uuid)>,
) -> Result<Json<Vec<AlgorithmBacktest>>, WebError> {
    let kind = parse_kind(&kind)?;
    let backtests = state
        .dispatcher
        .run_blocking(move |services| {
            let store = services.store.as_ref();
            catalog::get_algorithm_of_kind(store, id, kind)?;
            catalog::list_backtests(store, id, version)
        })
        .await?;
    Ok(Json(backtests))
}

pub async fn market_search(
    State(state): State<Arc<AppState>>,
    CurrentUser(_user): CurrentUser,
) -> Result<Json<Vec<AlgorithmSummary>>, WebError> {
    let found = state
        .dispatcher
        .run_blocking(|services| catalog::search_algorithms(services.store.as_ref()))
        .await?;
    Ok(Json(found))
}

pub async fn job_status(
    State(state): State<Arc<AppState>>,
    CurrentUser(_user): CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<Json<JobStatus>, WebError> {
    state
        .dispatcher
        .jobs()
        .get(id)
        .map(Json)
        .ok_or_else(|| WebError::not_found(format!("job {id} not found")))
}

pub async fn not_found() -> WebError {
    WebError::not_found("not found")
}
