#![cfg(feature = "web")]
//! Web API integration tests.
//!
//! Tests cover:
//! - Bearer token identity
//! - Catalogue and version endpoints with kind-checked paths
//! - Inline backtests and detached training with job polling
//! - Error status mapping

mod common;

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use stratlab::adapters::static_identity::StaticTokenIdentity;
use stratlab::adapters::web::{AppState, build_router};
use stratlab::domain::algorithm::AlgoKind;
use stratlab::domain::dispatch::Dispatcher;
use tempfile::TempDir;
use tower::ServiceExt;

use common::*;

const TOKEN: &str = "test-token";

struct TestApp {
    router: Router,
    harness: Harness,
    _reports: TempDir,
}

fn create_test_app(harness: Harness) -> TestApp {
    let reports = TempDir::new().unwrap();
    let identity = StaticTokenIdentity::new(HashMap::from([(TOKEN.to_string(), harness.user)]));
    let state = AppState {
        dispatcher: Dispatcher::current(Arc::new(harness.services.clone())).unwrap(),
        identity: Arc::new(identity),
        reports_dir: reports.path().to_path_buf(),
        reports_url_prefix: "/backtests".to_string(),
    };
    TestApp {
        router: build_router(state),
        harness,
        _reports: reports,
    }
}

async fn send(app: &TestApp, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {TOKEN}"));
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = app.router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

fn version_body(features: Value) -> Value {
    json!({ "features": features, "management": management() })
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn requests_without_token_are_rejected() {
    let app = create_test_app(Harness::new());
    let response = app
        .router
        .clone()
        .oneshot(Request::builder().uri("/algo/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        response.headers().get(header::WWW_AUTHENTICATE).unwrap(),
        "Bearer"
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unknown_token_is_rejected() {
    let app = create_test_app(Harness::new());
    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/algo/")
                .header(header::AUTHORIZATION, "Bearer nope")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn create_then_list_and_fetch() {
    let app = create_test_app(Harness::new());
    let (status, created) = send(
        &app,
        "POST",
        "/algo/ml/create",
        Some(json!({"name": "momentum", "sec_id": "SBER"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(created["sec_id"], "SBER");
    let id = created["uuid"].as_str().unwrap().to_string();

    let (status, listed) = send(&app, "GET", "/algo/", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed.as_array().unwrap().len(), 1);

    let (status, fetched) = send(&app, "GET", &format!("/algo/ml/d/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["name"], "momentum");

    let (status, _) = send(&app, "GET", &format!("/algo/algo/d/{id}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unknown_kind_segment_is_unprocessable() {
    let app = create_test_app(Harness::new());
    let (status, body) = send(
        &app,
        "POST",
        "/algo/neural/create",
        Some(json!({"name": "x", "sec_id": "SBER"})),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["detail"].as_str().unwrap().contains("neural"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn save_new_then_replace() {
    let app = create_test_app(Harness::new());
    let algorithm = app.harness.create(AlgoKind::Ml, "SBER");

    let uri = format!("/algo/ml/d/{}/new", algorithm.id);
    let (status, saved) = send(&app, "POST", &uri, Some(version_body(ml_features()))).await;
    assert_eq!(status, StatusCode::OK);
    let version = saved["uuid"].as_str().unwrap().to_string();

    let mut changed = ml_features();
    changed["ema"] = json!(false);
    let uri = format!("/algo/ml/d/{}/{version}", algorithm.id);
    let (status, replaced) = send(&app, "POST", &uri, Some(version_body(changed))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(replaced["uuid"], version.as_str());
    assert_eq!(replaced["features"]["ema"], json!(false));
    assert_eq!(app.harness.reload(&algorithm).versions.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn wrong_shape_is_unprocessable() {
    let app = create_test_app(Harness::new());
    let algorithm = app.harness.create(AlgoKind::RuleBased, "GAZP");
    let uri = format!("/algo/algo/d/{}/new", algorithm.id);
    let (status, body) = send(&app, "POST", &uri, Some(version_body(ml_features()))).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["detail"].as_str().unwrap().contains("rule-based"));
    assert!(app.harness.reload(&algorithm).versions.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn backtest_runs_inline_and_is_listed() {
    let app = create_test_app(Harness::new());
    let algorithm = app.harness.create(AlgoKind::RuleBased, "GAZP");
    let uri = format!("/algo/algo/d/{}/new", algorithm.id);
    let (_, saved) = send(&app, "POST", &uri, Some(version_body(two_node_and()))).await;
    let version = saved["uuid"].as_str().unwrap().to_string();

    let uri = format!("/algo/algo/d/{}/{version}/backtest/1m", algorithm.id);
    let (status, outcome) = send(&app, "POST", &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(outcome["data"]["trades"], json!(422));
    assert!(
        outcome["graph_url"]
            .as_str()
            .unwrap()
            .starts_with("/backtests/")
    );

    let uri = format!("/algo/algo/d/{}/{version}/backtests", algorithm.id);
    let (status, listed) = send(&app, "GET", &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed.as_array().unwrap().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn engine_failure_is_bad_gateway() {
    let app = create_test_app(Harness::with_engines(
        RecordingTrainer::new(),
        ScriptedSimulator::failing("not enough candles"),
    ));
    let algorithm = app.harness.create(AlgoKind::RuleBased, "GAZP");
    let uri = format!("/algo/algo/d/{}/new", algorithm.id);
    let (_, saved) = send(&app, "POST", &uri, Some(version_body(two_node_and()))).await;
    let version = saved["uuid"].as_str().unwrap().to_string();

    let uri = format!("/algo/algo/d/{}/{version}/backtest/5m", algorithm.id);
    let (status, body) = send(&app, "POST", &uri, None).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert!(body["detail"].as_str().unwrap().contains("not enough candles"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unknown_period_is_unprocessable() {
    let app = create_test_app(Harness::new());
    let algorithm = app.harness.create(AlgoKind::RuleBased, "GAZP");
    let uri = format!(
        "/algo/algo/d/{}/{}/backtest/2h",
        algorithm.id,
        uuid::Uuid::new_v4()
    );
    let (status, _) = send(&app, "POST", &uri, None).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn training_rule_based_is_conflict() {
    let app = create_test_app(Harness::new());
    let algorithm = app.harness.create(AlgoKind::RuleBased, "GAZP");
    let uri = format!("/algo/algo/d/{}/new", algorithm.id);
    let (_, saved) = send(&app, "POST", &uri, Some(version_body(two_node_and()))).await;
    let version = saved["uuid"].as_str().unwrap().to_string();

    let uri = format!("/algo/algo/d/{}/{version}/train/1m", algorithm.id);
    let (status, _) = send(&app, "POST", &uri, None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(app.harness.trainer.calls(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn training_is_detached_and_pollable() {
    let app = create_test_app(Harness::new());
    let algorithm = app.harness.create(AlgoKind::Ml, "SBER");
    let uri = format!("/algo/ml/d/{}/new", algorithm.id);
    let (_, saved) = send(&app, "POST", &uri, Some(version_body(ml_features()))).await;
    let version = saved["uuid"].as_str().unwrap().to_string();

    let uri = format!("/algo/ml/d/{}/{version}/train/1m", algorithm.id);
    let (status, accepted) = send(&app, "POST", &uri, None).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let job = accepted["job_id"].as_str().unwrap().to_string();

    let mut state = Value::Null;
    for _ in 0..100 {
        let (status, polled) = send(&app, "GET", &format!("/jobs/{job}"), None).await;
        assert_eq!(status, StatusCode::OK);
        state = polled["state"].clone();
        if state == "succeeded" || state == "failed" {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(state, "succeeded");
    assert_eq!(app.harness.trainer.calls(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unknown_job_is_not_found() {
    let app = create_test_app(Harness::new());
    let uri = format!("/jobs/{}", uuid::Uuid::new_v4());
    let (status, _) = send(&app, "GET", &uri, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn market_search_lists_every_algorithm() {
    let app = create_test_app(Harness::new());
    app.harness.create(AlgoKind::Ml, "SBER");
    app.harness.create(AlgoKind::RuleBased, "GAZP");

    let (status, found) = send(&app, "POST", "/market/search", None).await;
    assert_eq!(status, StatusCode::OK);
    let found = found.as_array().unwrap();
    assert_eq!(found.len(), 2);
    assert!(found.iter().any(|s| s["sec_id"] == "GAZP"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unknown_route_is_not_found() {
    let app = create_test_app(Harness::new());
    let (status, body) = send(&app, "GET", "/nowhere", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["detail"], "not found");
}
