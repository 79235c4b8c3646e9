//! CLI definition and dispatch.

use clap::{Parser, Subcommand};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::adapters::command_engine::CommandEngine;
use crate::adapters::file_config_adapter::FileConfigAdapter;
use crate::adapters::fs_storage::{FsArtifactStore, FsReportStore};
use crate::adapters::sqlite_adapter::SqliteStore;
use crate::domain::algorithm::{AlgoKind, Period, UserId};
use crate::domain::backtest::{self, BacktestRequest};
use crate::domain::catalog;
use crate::domain::config_validation::{build_engine_settings, validate_service_config};
use crate::domain::dispatch::Stage;
use crate::domain::error::StratlabError;
use crate::domain::locks::VersionLocks;
use crate::domain::services::Services;
use crate::domain::training::{self, TrainingRequest};
use crate::domain::versioning::{self, VersionPayload};
use crate::logging::{LogFormat, init_logging};

#[derive(Parser, Debug)]
#[command(name = "stratlab", about = "Algorithm versioning and backtest orchestration")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create the database schema
    InitDb {
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Register a user and print its numeric id
    AddUser {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(long)]
        email: String,
    },
    /// Create an algorithm owned by a user
    Create {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(long)]
        user: UserId,
        /// `ml` or `algo`
        #[arg(long)]
        kind: AlgoKind,
        #[arg(long)]
        name: String,
        #[arg(long)]
        sec_id: String,
    },
    /// Save a version from a JSON file with features, management and nodes
    SaveVersion {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(long)]
        algorithm: Uuid,
        /// Omit to create a new version
        #[arg(long)]
        version: Option<Uuid>,
        #[arg(short, long)]
        file: PathBuf,
    },
    /// Retrain an ML version and store the trained features
    Train {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(long)]
        algorithm: Uuid,
        #[arg(long)]
        version: Uuid,
        #[arg(long, default_value = "1m")]
        period: Period,
    },
    /// Run a backtest and store its result
    Backtest {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(long)]
        algorithm: Uuid,
        #[arg(long)]
        version: Uuid,
        #[arg(long, default_value = "1m")]
        period: Period,
    },
    /// Print an algorithm, or a version's backtests with --version
    Show {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(long)]
        algorithm: Uuid,
        #[arg(long)]
        version: Option<Uuid>,
    },
    /// Start the web server
    Serve {
        #[arg(short, long)]
        config: PathBuf,
    },
}

pub fn run(cli: Cli) -> ExitCode {
    match cli.command {
        Command::InitDb { config } => run_init_db(&config),
        Command::AddUser { config, email } => run_add_user(&config, &email),
        Command::Create {
            config,
            user,
            kind,
            name,
            sec_id,
        } => run_create(&config, user, kind, &name, &sec_id),
        Command::SaveVersion {
            config,
            algorithm,
            version,
            file,
        } => run_save_version(&config, algorithm, version, &file),
        Command::Train {
            config,
            algorithm,
            version,
            period,
        } => run_train(&config, algorithm, version, period),
        Command::Backtest {
            config,
            algorithm,
            version,
            period,
        } => run_backtest(&config, algorithm, version, period),
        Command::Show {
            config,
            algorithm,
            version,
        } => run_show(&config, algorithm, version),
        Command::Serve { config } => run_serve(&config),
    }
}

/// Load, validate and apply logging settings from the config file.
pub fn load_config(path: &Path) -> Result<FileConfigAdapter, ExitCode> {
    let config = FileConfigAdapter::from_file(path).map_err(|e| fail(&e))?;
    validate_service_config(&config).map_err(|e| fail(&e))?;
    let format = LogFormat::from_config(&config).map_err(|e| fail(&e))?;
    init_logging(format);
    info!(path = %path.display(), "config loaded");
    Ok(config)
}

fn fail(err: &StratlabError) -> ExitCode {
    eprintln!("error: {err}");
    ExitCode::from(err)
}

fn open_store(config: &FileConfigAdapter) -> Result<SqliteStore, ExitCode> {
    SqliteStore::from_config(config).map_err(|e| fail(&e))
}

fn build_services(config: &FileConfigAdapter) -> Result<Services, ExitCode> {
    let store = open_store(config)?;
    let settings = build_engine_settings(config).map_err(|e| fail(&e))?;
    let engine = Arc::new(CommandEngine::from_config(config).map_err(|e| fail(&e))?);
    Ok(Services {
        store: Arc::new(store),
        trainer: engine.clone(),
        simulator: engine,
        artifacts: Arc::new(FsArtifactStore::from_config(config)),
        reports: Arc::new(FsReportStore::from_config(config)),
        settings,
        locks: VersionLocks::new(),
    })
}

fn print_json<T: Serialize>(value: &T) -> ExitCode {
    match serde_json::to_string_pretty(value) {
        Ok(text) => {
            println!("{text}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("error: cannot encode output: {e}");
            ExitCode::from(1)
        }
    }
}

fn report_stage(stage: Stage) {
    match stage {
        Stage::Training => eprintln!("Training model..."),
        Stage::Simulating => eprintln!("Running simulation..."),
    }
}

fn run_init_db(config_path: &Path) -> ExitCode {
    let config = match load_config(config_path) {
        Ok(c) => c,
        Err(code) => return code,
    };
    let store = match open_store(&config) {
        Ok(s) => s,
        Err(code) => return code,
    };
    match store.initialize_schema() {
        Ok(()) => {
            eprintln!("Schema ready");
            ExitCode::SUCCESS
        }
        Err(e) => fail(&e),
    }
}

fn run_add_user(config_path: &Path, email: &str) -> ExitCode {
    let config = match load_config(config_path) {
        Ok(c) => c,
        Err(code) => return code,
    };
    let store = match open_store(&config) {
        Ok(s) => s,
        Err(code) => return code,
    };
    match store.add_user(email) {
        Ok(id) => {
            println!("{id}");
            ExitCode::SUCCESS
        }
        Err(e) => fail(&e),
    }
}

fn run_create(
    config_path: &Path,
    user: UserId,
    kind: AlgoKind,
    name: &str,
    sec_id: &str,
) -> ExitCode {
    let config = match load_config(config_path) {
        Ok(c) => c,
        Err(code) => return code,
    };
    let store = match open_store(&config) {
        Ok(s) => s,
        Err(code) => return code,
    };
    match catalog::create_algorithm(&store, user, kind, name, sec_id) {
        Ok(algorithm) => print_json(&algorithm),
        Err(e) => fail(&e),
    }
}

fn run_save_version(
    config_path: &Path,
    algorithm: Uuid,
    version: Option<Uuid>,
    file: &Path,
) -> ExitCode {
    let config = match load_config(config_path) {
        Ok(c) => c,
        Err(code) => return code,
    };
    let services = match build_services(&config) {
        Ok(s) => s,
        Err(code) => return code,
    };

    let payload: VersionPayload = match fs::read_to_string(file)
        .map_err(StratlabError::from)
        .and_then(|text| {
            serde_json::from_str(&text)
                .map_err(|e| StratlabError::validation("payload", e.to_string()))
        }) {
        Ok(p) => p,
        Err(e) => return fail(&e),
    };

    match versioning::save_version(&services, algorithm, version, &payload) {
        Ok(saved) => print_json(&saved),
        Err(e) => fail(&e),
    }
}

fn run_train(config_path: &Path, algorithm: Uuid, version: Uuid, period: Period) -> ExitCode {
    let config = match load_config(config_path) {
        Ok(c) => c,
        Err(code) => return code,
    };
    let services = match build_services(&config) {
        Ok(s) => s,
        Err(code) => return code,
    };

    let request = TrainingRequest {
        algorithm_id: algorithm,
        version_id: version,
        period,
    };
    match training::train_version(&services, &request, &report_stage) {
        Ok(outcome) => {
            eprintln!("Model written to {}", outcome.artifact_path.display());
            print_json(&outcome.version)
        }
        Err(e) => fail(&e),
    }
}

fn run_backtest(config_path: &Path, algorithm: Uuid, version: Uuid, period: Period) -> ExitCode {
    let config = match load_config(config_path) {
        Ok(c) => c,
        Err(code) => return code,
    };
    let services = match build_services(&config) {
        Ok(s) => s,
        Err(code) => return code,
    };

    let request = BacktestRequest {
        algorithm_id: algorithm,
        version_id: version,
        period,
    };
    match backtest::run_backtest(&services, &request, &report_stage) {
        Ok(outcome) => {
            eprintln!("Report: {}", outcome.graph_url.as_str());
            print_json(&outcome)
        }
        Err(e) => fail(&e),
    }
}

fn run_show(config_path: &Path, algorithm: Uuid, version: Option<Uuid>) -> ExitCode {
    let config = match load_config(config_path) {
        Ok(c) => c,
        Err(code) => return code,
    };
    let store = match open_store(&config) {
        Ok(s) => s,
        Err(code) => return code,
    };

    let shown = match version {
        Some(version) => catalog::list_backtests(&store, algorithm, version)
            .map(|backtests| print_json(&backtests)),
        None => catalog::get_algorithm(&store, algorithm).map(|found| print_json(&found)),
    };
    shown.unwrap_or_else(|e| fail(&e))
}

fn run_serve(config_path: &Path) -> ExitCode {
    #[cfg(feature = "web")]
    {
        use crate::adapters::static_identity::StaticTokenIdentity;
        use crate::adapters::web::{AppState, build_router};
        use crate::domain::dispatch::{DEFAULT_JOB_RETENTION_SECS, Dispatcher, JobRegistry};
        use crate::ports::config_port::ConfigPort;
        use std::net::SocketAddr;

        let config = match load_config(config_path) {
            Ok(c) => c,
            Err(code) => return code,
        };
        let services = match build_services(&config) {
            Ok(s) => s,
            Err(code) => return code,
        };
        let identity = match StaticTokenIdentity::from_config(&config) {
            Ok(i) => i,
            Err(e) => return fail(&e),
        };
        if identity.is_empty() {
            tracing::warn!("no [auth] tokens configured; every request will be rejected");
        } else {
            info!(tokens = identity.len(), "bearer tokens loaded");
        }
        let retention_secs =
            config.get_int("web", "job_retention_secs", DEFAULT_JOB_RETENTION_SECS);
        if retention_secs < 0 {
            return fail(&StratlabError::ConfigInvalid {
                section: "web".into(),
                key: "job_retention_secs".into(),
                reason: "must not be negative".into(),
            });
        }
        let jobs = JobRegistry::with_retention(chrono::TimeDelta::seconds(retention_secs));

        let listen = config.get_string_or("web", "listen", "127.0.0.1:3000");
        let addr: SocketAddr = match listen.parse() {
            Ok(a) => a,
            Err(e) => {
                return fail(&StratlabError::ConfigInvalid {
                    section: "web".into(),
                    key: "listen".into(),
                    reason: format!("{e}"),
                });
            }
        };
        let reports = FsReportStore::from_config(&config);

        let runtime = match tokio::runtime::Runtime::new() {
            Ok(r) => r,
            Err(e) => return fail(&StratlabError::from(e)),
        };
        let served = runtime.block_on(async {
            let dispatcher = Dispatcher::current(Arc::new(services))?.with_jobs(jobs);
            let state = AppState {
                dispatcher,
                identity: Arc::new(identity),
                reports_dir: reports.root().to_path_buf(),
                reports_url_prefix: reports.url_prefix().to_string(),
            };
            let router = build_router(state);

            let listener = tokio::net::TcpListener::bind(addr).await?;
            info!(%addr, "web server listening");
            axum::serve(listener, router).await?;
            Ok::<(), StratlabError>(())
        });

        match served {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => fail(&e),
        }
    }

    #[cfg(not(feature = "web"))]
    {
        let _ = config_path;
        eprintln!("error: web feature is required for serve");
        ExitCode::from(1)
    }
}
