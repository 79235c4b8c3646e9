//! Web server adapter.
//!
//! JSON API over the catalogue, version store and orchestration, plus
//! static serving of rendered backtest reports.

mod error;
mod extract;
mod handlers;

pub use error::WebError;
pub use extract::CurrentUser;
pub use handlers::*;

use axum::{
    Router,
    routing::{get, post},
};
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::services::ServeDir;

use crate::domain::dispatch::Dispatcher;
use crate::ports::identity_port::IdentityPort;

pub struct AppState {
    pub dispatcher: Dispatcher,
    pub identity: Arc<dyn IdentityPort>,
    pub reports_dir: PathBuf,
    pub reports_url_prefix: String,
}

pub fn build_router(state: AppState) -> Router {
    let reports = ServeDir::new(&state.reports_dir);
    let prefix = match state.reports_url_prefix.trim_end_matches('/') {
        "" => "/backtests".to_string(),
        p if p.starts_with('/') => p.to_string(),
        p => format!("/{p}"),
    };

    Router::new()
        .route("/algo/", get(handlers::list_algorithms))
        .route("/algo/{kind}/create", post(handlers::create_algorithm))
        .route("/algo/{kind}/d/{id}", get(handlers::get_algorithm))
        .route("/algo/{kind}/d/{id}/{version}", post(handlers::save_version))
        .route(
            "/algo/{kind}/d/{id}/{version}/train/{period}",
            post(handlers::train),
        )
        .route(
            "/algo/{kind}/d/{id}/{version}/backtest/{period}",
            post(handlers::backtest),
        )
        .route(
            "/algo/{kind}/d/{id}/{version}/backtests",
            get(handlers::list_backtests),
        )
        .route("/market/search", post(handlers::market_search))
        .route("/jobs/{id}", get(handlers::job_status))
        .nest_service(&prefix, reports)
        .fallback(handlers::not_found)
        .with_state(Arc::new(state))
}
