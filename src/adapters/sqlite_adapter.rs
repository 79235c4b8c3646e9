//! SQLite algorithm store.
//!
//! Feature configurations, management parameters, node layouts and
//! backtest statistics are stored as JSON text. Versions and backtests
//! are returned in insertion order (by row id).
//!
//! Every write runs in an IMMEDIATE transaction and every pooled
//! connection carries a busy timeout, so writers on different connections
//! queue for the database lock rather than failing with `SQLITE_BUSY`.

use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, OptionalExtension, Transaction, TransactionBehavior, params};
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::domain::algorithm::{
    AlgoKind, Algorithm, AlgorithmBacktest, AlgorithmSummary, AlgorithmVersion, NewAlgorithm,
    ReportPointer, UserId,
};
use crate::domain::error::StratlabError;
use crate::domain::feature_config::FeatureConfig;
use crate::domain::features::MlFeatures;
use crate::domain::management::RiskManagement;
use crate::domain::normalize::BacktestStats;
use crate::domain::versioning::VersionDraft;
use crate::ports::config_port::ConfigPort;
use crate::ports::store_port::AlgorithmStore;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    email TEXT NOT NULL UNIQUE,
    created_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS algorithms (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    uuid TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL,
    sec_id TEXT NOT NULL,
    algo_type TEXT NOT NULL CHECK (algo_type IN ('ml', 'algo')),
    created_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS user_algorithms (
    user_id INTEGER NOT NULL REFERENCES users(id),
    algorithm_id INTEGER NOT NULL REFERENCES algorithms(id),
    PRIMARY KEY (user_id, algorithm_id)
);
CREATE TABLE IF NOT EXISTS algorithm_versions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    uuid TEXT NOT NULL UNIQUE,
    algorithm_id INTEGER NOT NULL REFERENCES algorithms(id),
    features TEXT NOT NULL,
    management TEXT NOT NULL,
    nodes TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_versions_algorithm ON algorithm_versions(algorithm_id);
CREATE TABLE IF NOT EXISTS algorithm_backtests (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    version_id INTEGER NOT NULL REFERENCES algorithm_versions(id),
    data TEXT NOT NULL,
    graph_url TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_backtests_version ON algorithm_backtests(version_id);
";

type VersionRow = (String, String, String, Option<String>, String, String);

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

pub struct SqliteStore {
    pool: Pool<SqliteConnectionManager>,
}

impl SqliteStore {
    pub fn from_config(config: &dyn ConfigPort) -> Result<Self, StratlabError> {
        let db_path =
            config
                .get_string("sqlite", "path")
                .ok_or_else(|| StratlabError::ConfigMissing {
                    section: "sqlite".into(),
                    key: "path".into(),
                })?;

        let pool_size = config.get_int("sqlite", "pool_size", 4).max(1) as u32;
        Self::build(SqliteConnectionManager::file(&db_path), pool_size)
    }

    /// Single-connection in-memory database.
    pub fn in_memory() -> Result<Self, StratlabError> {
        Self::build(SqliteConnectionManager::memory(), 1)
    }

    fn build(manager: SqliteConnectionManager, size: u32) -> Result<Self, StratlabError> {
        let manager = manager.with_init(|c| {
            c.busy_timeout(BUSY_TIMEOUT)?;
            c.execute_batch("PRAGMA foreign_keys = ON;")
        });
        let pool = Pool::builder()
            .max_size(size)
            .build(manager)
            .map_err(|e: r2d2::Error| StratlabError::Database {
                reason: e.to_string(),
            })?;

        Ok(Self { pool })
    }

    fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>, StratlabError> {
        self.pool
            .get()
            .map_err(|e: r2d2::Error| StratlabError::Database {
                reason: e.to_string(),
            })
    }

    pub fn initialize_schema(&self) -> Result<(), StratlabError> {
        self.conn()?.execute_batch(SCHEMA).map_err(query_err)
    }

    /// Register a user and return the numeric key handed to the identity layer.
    pub fn add_user(&self, email: &str) -> Result<UserId, StratlabError> {
        let email = email.trim();
        if email.is_empty() {
            return Err(StratlabError::validation("email", "must not be empty"));
        }
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO users (email, created_at) VALUES (?1, ?2)",
            params![email, timestamp(Utc::now())],
        )
        .map_err(write_err)?;
        Ok(conn.last_insert_rowid())
    }
}

fn query_err(e: rusqlite::Error) -> StratlabError {
    StratlabError::DatabaseQuery {
        reason: e.to_string(),
    }
}

fn write_err(e: rusqlite::Error) -> StratlabError {
    StratlabError::Persistence {
        reason: e.to_string(),
    }
}

/// Start a write that holds the database write lock from its first statement.
fn begin_write(conn: &mut Connection) -> Result<Transaction<'_>, StratlabError> {
    conn.transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(write_err)
}

fn corrupt(what: &str, reason: impl std::fmt::Display) -> StratlabError {
    StratlabError::DatabaseQuery {
        reason: format!("stored {what} is unreadable: {reason}"),
    }
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, StratlabError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| corrupt("timestamp", e))
}

fn parse_uuid(raw: &str) -> Result<Uuid, StratlabError> {
    Uuid::parse_str(raw).map_err(|e| corrupt("uuid", e))
}

fn to_json<T: Serialize>(value: &T) -> Result<String, StratlabError> {
    serde_json::to_string(value).map_err(|e| StratlabError::Persistence {
        reason: e.to_string(),
    })
}

fn parse_kind(raw: &str) -> Result<AlgoKind, StratlabError> {
    raw.parse().map_err(|_| corrupt("algo_type", raw))
}

fn algorithm_exists(conn: &Connection, id: Uuid) -> Result<bool, StratlabError> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM algorithms WHERE uuid = ?1)",
        params![id.to_string()],
        |r| r.get(0),
    )
    .map_err(query_err)
}

fn load_algorithm(conn: &Connection, id: Uuid) -> Result<Option<Algorithm>, StratlabError> {
    let row = conn
        .query_row(
            "SELECT id, name, sec_id, algo_type FROM algorithms WHERE uuid = ?1",
            params![id.to_string()],
            |r| {
                Ok((
                    r.get::<_, i64>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                    r.get::<_, String>(3)?,
                ))
            },
        )
        .optional()
        .map_err(query_err)?;

    let Some((row_id, name, instrument, kind)) = row else {
        return Ok(None);
    };
    let kind = parse_kind(&kind)?;
    let versions = load_versions(conn, row_id, kind)?;

    Ok(Some(Algorithm {
        id,
        name,
        instrument,
        kind,
        versions,
    }))
}

fn load_versions(
    conn: &Connection,
    algorithm_row: i64,
    kind: AlgoKind,
) -> Result<Vec<AlgorithmVersion>, StratlabError> {
    let mut stmt = conn
        .prepare(
            "SELECT uuid, features, management, nodes, created_at, updated_at
             FROM algorithm_versions WHERE algorithm_id = ?1 ORDER BY id",
        )
        .map_err(query_err)?;

    let rows = stmt
        .query_map(params![algorithm_row], read_version_row)
        .map_err(query_err)?
        .collect::<Result<Vec<VersionRow>, _>>()
        .map_err(query_err)?;

    rows.into_iter().map(|row| decode_version(kind, row)).collect()
}

fn load_version(
    conn: &Connection,
    version_row: i64,
    kind: AlgoKind,
) -> Result<AlgorithmVersion, StratlabError> {
    let row = conn
        .query_row(
            "SELECT uuid, features, management, nodes, created_at, updated_at
             FROM algorithm_versions WHERE id = ?1",
            params![version_row],
            read_version_row,
        )
        .map_err(query_err)?;
    decode_version(kind, row)
}

fn read_version_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<VersionRow> {
    Ok((
        r.get(0)?,
        r.get(1)?,
        r.get(2)?,
        r.get(3)?,
        r.get(4)?,
        r.get(5)?,
    ))
}

fn decode_version(kind: AlgoKind, row: VersionRow) -> Result<AlgorithmVersion, StratlabError> {
    let (id, features, management, nodes, created_at, updated_at) = row;

    let features: Value = serde_json::from_str(&features).map_err(|e| corrupt("features", e))?;
    let features =
        FeatureConfig::validate(kind, &features).map_err(|e| corrupt("features", e))?;
    let management: RiskManagement =
        serde_json::from_str(&management).map_err(|e| corrupt("management", e))?;
    let nodes = nodes
        .map(|n| serde_json::from_str::<Value>(&n))
        .transpose()
        .map_err(|e| corrupt("nodes", e))?;

    Ok(AlgorithmVersion {
        id: parse_uuid(&id)?,
        features,
        management,
        nodes,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

/// Row id and kind of a version, or the matching not-found error.
fn locate_version(
    conn: &Connection,
    algorithm_id: Uuid,
    version_id: Uuid,
) -> Result<(i64, AlgoKind), StratlabError> {
    let found = conn
        .query_row(
            "SELECT v.id, a.algo_type FROM algorithm_versions v
             JOIN algorithms a ON a.id = v.algorithm_id
             WHERE a.uuid = ?1 AND v.uuid = ?2",
            params![algorithm_id.to_string(), version_id.to_string()],
            |r| Ok((r.get::<_, i64>(0)?, r.get::<_, String>(1)?)),
        )
        .optional()
        .map_err(query_err)?;

    match found {
        Some((row, kind)) => Ok((row, parse_kind(&kind)?)),
        None if algorithm_exists(conn, algorithm_id)? => Err(StratlabError::VersionNotFound {
            algorithm: algorithm_id,
            version: version_id,
        }),
        None => Err(StratlabError::AlgorithmNotFound { id: algorithm_id }),
    }
}

impl AlgorithmStore for SqliteStore {
    fn user_exists(&self, user: UserId) -> Result<bool, StratlabError> {
        self.conn()?
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM users WHERE id = ?1)",
                params![user],
                |r| r.get(0),
            )
            .map_err(query_err)
    }

    fn create_algorithm(
        &self,
        owner: UserId,
        algorithm: &NewAlgorithm,
    ) -> Result<Algorithm, StratlabError> {
        let mut conn = self.conn()?;
        let tx = begin_write(&mut conn)?;

        let owner_exists: bool = tx
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM users WHERE id = ?1)",
                params![owner],
                |r| r.get(0),
            )
            .map_err(query_err)?;
        if !owner_exists {
            return Err(StratlabError::UserNotFound { id: owner });
        }

        tx.execute(
            "INSERT INTO algorithms (uuid, name, sec_id, algo_type, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                algorithm.id.to_string(),
                algorithm.name,
                algorithm.instrument,
                algorithm.kind.as_str(),
                timestamp(Utc::now())
            ],
        )
        .map_err(write_err)?;
        let row_id = tx.last_insert_rowid();

        tx.execute(
            "INSERT INTO user_algorithms (user_id, algorithm_id) VALUES (?1, ?2)",
            params![owner, row_id],
        )
        .map_err(write_err)?;

        tx.commit().map_err(write_err)?;

        Ok(Algorithm {
            id: algorithm.id,
            name: algorithm.name.clone(),
            instrument: algorithm.instrument.clone(),
            kind: algorithm.kind,
            versions: Vec::new(),
        })
    }

    fn get_algorithm(&self, id: Uuid) -> Result<Option<Algorithm>, StratlabError> {
        let conn = self.conn()?;
        load_algorithm(&conn, id)
    }

    fn list_algorithms(&self, owner: UserId) -> Result<Vec<Algorithm>, StratlabError> {
        let conn = self.conn()?;
        let ids = {
            let mut stmt = conn
                .prepare(
                    "SELECT a.uuid FROM algorithms a
                     JOIN user_algorithms ua ON ua.algorithm_id = a.id
                     WHERE ua.user_id = ?1 ORDER BY a.id",
                )
                .map_err(query_err)?;
            stmt.query_map(params![owner], |r| r.get::<_, String>(0))
                .map_err(query_err)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(query_err)?
        };

        let mut algorithms = Vec::with_capacity(ids.len());
        for raw in ids {
            let id = parse_uuid(&raw)?;
            if let Some(algorithm) = load_algorithm(&conn, id)? {
                algorithms.push(algorithm);
            }
        }
        Ok(algorithms)
    }

    fn search_algorithms(&self) -> Result<Vec<AlgorithmSummary>, StratlabError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT uuid, name, sec_id, algo_type FROM algorithms ORDER BY id")
            .map_err(query_err)?;
        let rows = stmt
            .query_map([], |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                    r.get::<_, String>(3)?,
                ))
            })
            .map_err(query_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(query_err)?;

        rows.into_iter()
            .map(|(id, name, instrument, kind)| {
                Ok(AlgorithmSummary {
                    id: parse_uuid(&id)?,
                    name,
                    instrument,
                    kind: parse_kind(&kind)?,
                })
            })
            .collect()
    }

    fn append_version(
        &self,
        algorithm_id: Uuid,
        version_id: Uuid,
        draft: &VersionDraft,
    ) -> Result<AlgorithmVersion, StratlabError> {
        let mut conn = self.conn()?;
        let tx = begin_write(&mut conn)?;

        let algorithm = tx
            .query_row(
                "SELECT id, algo_type FROM algorithms WHERE uuid = ?1",
                params![algorithm_id.to_string()],
                |r| Ok((r.get::<_, i64>(0)?, r.get::<_, String>(1)?)),
            )
            .optional()
            .map_err(query_err)?;
        let Some((algorithm_row, kind)) = algorithm else {
            return Err(StratlabError::AlgorithmNotFound { id: algorithm_id });
        };
        let kind = parse_kind(&kind)?;
        if kind != draft.features.kind() {
            return Err(StratlabError::WrongShape {
                kind,
                expected: match kind {
                    AlgoKind::Ml => "a feature object",
                    AlgoKind::RuleBased => "a list of condition nodes",
                },
            });
        }

        let owner: Option<i64> = tx
            .query_row(
                "SELECT algorithm_id FROM algorithm_versions WHERE uuid = ?1",
                params![version_id.to_string()],
                |r| r.get(0),
            )
            .optional()
            .map_err(query_err)?;
        match owner {
            Some(row) if row == algorithm_row => {
                return Err(StratlabError::validation(
                    "version_id",
                    format!("{version_id} already exists in this algorithm"),
                ));
            }
            Some(_) => {
                return Err(StratlabError::validation(
                    "version_id",
                    format!("{version_id} belongs to another algorithm"),
                ));
            }
            None => {}
        }

        let now = timestamp(Utc::now());
        tx.execute(
            "INSERT INTO algorithm_versions
                (uuid, algorithm_id, features, management, nodes, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
            params![
                version_id.to_string(),
                algorithm_row,
                draft.features.to_value().to_string(),
                to_json(&draft.management)?,
                draft.nodes.as_ref().map(Value::to_string),
                now
            ],
        )
        .map_err(write_err)?;
        let version = load_version(&tx, tx.last_insert_rowid(), kind)?;

        tx.commit().map_err(write_err)?;
        Ok(version)
    }

    fn replace_version(
        &self,
        algorithm_id: Uuid,
        version_id: Uuid,
        draft: &VersionDraft,
    ) -> Result<AlgorithmVersion, StratlabError> {
        let mut conn = self.conn()?;
        let tx = begin_write(&mut conn)?;

        let (row, kind) = locate_version(&tx, algorithm_id, version_id)?;
        tx.execute(
            "UPDATE algorithm_versions
             SET features = ?1, management = ?2, nodes = ?3, updated_at = ?4
             WHERE id = ?5",
            params![
                draft.features.to_value().to_string(),
                to_json(&draft.management)?,
                draft.nodes.as_ref().map(Value::to_string),
                timestamp(Utc::now()),
                row
            ],
        )
        .map_err(write_err)?;
        let version = load_version(&tx, row, kind)?;

        tx.commit().map_err(write_err)?;
        Ok(version)
    }

    fn update_features(
        &self,
        algorithm_id: Uuid,
        version_id: Uuid,
        features: &MlFeatures,
    ) -> Result<AlgorithmVersion, StratlabError> {
        let mut conn = self.conn()?;
        let tx = begin_write(&mut conn)?;

        let (row, kind) = locate_version(&tx, algorithm_id, version_id)?;
        if kind != AlgoKind::Ml {
            return Err(StratlabError::ConfigurationMismatch {
                operation: "train",
                kind,
            });
        }
        tx.execute(
            "UPDATE algorithm_versions SET features = ?1, updated_at = ?2 WHERE id = ?3",
            params![features.to_value().to_string(), timestamp(Utc::now()), row],
        )
        .map_err(write_err)?;
        let version = load_version(&tx, row, kind)?;

        tx.commit().map_err(write_err)?;
        Ok(version)
    }

    fn insert_backtest(
        &self,
        algorithm_id: Uuid,
        version_id: Uuid,
        stats: &BacktestStats,
        graph_url: &ReportPointer,
    ) -> Result<AlgorithmBacktest, StratlabError> {
        let mut conn = self.conn()?;
        let tx = begin_write(&mut conn)?;

        let (row, _) = locate_version(&tx, algorithm_id, version_id)?;
        let created_at = Utc::now();
        tx.execute(
            "INSERT INTO algorithm_backtests (version_id, data, graph_url, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![row, to_json(stats)?, graph_url.as_str(), timestamp(created_at)],
        )
        .map_err(write_err)?;
        let id = tx.last_insert_rowid();

        tx.commit().map_err(write_err)?;
        Ok(AlgorithmBacktest {
            id,
            version_id,
            data: stats.clone(),
            graph_url: graph_url.clone(),
            created_at,
        })
    }

    fn list_backtests(
        &self,
        algorithm_id: Uuid,
        version_id: Uuid,
    ) -> Result<Vec<AlgorithmBacktest>, StratlabError> {
        let conn = self.conn()?;
        let (row, _) = locate_version(&conn, algorithm_id, version_id)?;

        let mut stmt = conn
            .prepare(
                "SELECT id, data, graph_url, created_at FROM algorithm_backtests
                 WHERE version_id = ?1 ORDER BY id",
            )
            .map_err(query_err)?;
        let rows = stmt
            .query_map(params![row], |r| {
                Ok((
                    r.get::<_, i64>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                    r.get::<_, String>(3)?,
                ))
            })
            .map_err(query_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(query_err)?;

        rows.into_iter()
            .map(|(id, data, graph_url, created_at)| {
                Ok(AlgorithmBacktest {
                    id,
                    version_id,
                    data: serde_json::from_str(&data).map_err(|e| corrupt("statistics", e))?,
                    graph_url: ReportPointer(graph_url),
                    created_at: parse_timestamp(&created_at)?,
                })
            })
            .collect()
    }
}
