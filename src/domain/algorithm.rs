//! Algorithm, version and backtest entities.
//!
//! An [`Algorithm`] owns an ordered list of [`AlgorithmVersion`]s; each
//! version owns the [`AlgorithmBacktest`] rows produced from it. External
//! identifiers are UUIDs, storage keys never leave the store adapter.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::error::StratlabError;
use crate::domain::feature_config::FeatureConfig;
use crate::domain::management::RiskManagement;
use crate::domain::normalize::BacktestStats;

/// Numeric user key handed out by the identity provider.
pub type UserId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AlgoKind {
    #[serde(rename = "ml")]
    Ml,
    #[serde(rename = "algo")]
    RuleBased,
}

impl AlgoKind {
    /// Wire and storage tag.
    pub fn as_str(&self) -> &'static str {
        match self {
            AlgoKind::Ml => "ml",
            AlgoKind::RuleBased => "algo",
        }
    }
}

impl fmt::Display for AlgoKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlgoKind::Ml => write!(f, "ml"),
            AlgoKind::RuleBased => write!(f, "rule-based"),
        }
    }
}

impl FromStr for AlgoKind {
    type Err = StratlabError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "ml" => Ok(AlgoKind::Ml),
            "algo" | "rule-based" | "rule_based" => Ok(AlgoKind::RuleBased),
            other => Err(StratlabError::validation(
                "algo_type",
                format!("unknown algorithm kind '{other}' (expected ml or algo)"),
            )),
        }
    }
}

/// Candle sampling period used for training and simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Period {
    #[serde(rename = "1m")]
    OneMinute,
    #[serde(rename = "5m")]
    FiveMinutes,
    #[serde(rename = "10m")]
    TenMinutes,
    #[serde(rename = "30m")]
    ThirtyMinutes,
    #[serde(rename = "60m")]
    Hour,
}

impl Period {
    pub fn as_str(&self) -> &'static str {
        match self {
            Period::OneMinute => "1m",
            Period::FiveMinutes => "5m",
            Period::TenMinutes => "10m",
            Period::ThirtyMinutes => "30m",
            Period::Hour => "60m",
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Period {
    type Err = StratlabError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "1m" => Ok(Period::OneMinute),
            "5m" => Ok(Period::FiveMinutes),
            "10m" => Ok(Period::TenMinutes),
            "30m" => Ok(Period::ThirtyMinutes),
            "60m" => Ok(Period::Hour),
            other => Err(StratlabError::validation(
                "period",
                format!("unknown period '{other}' (expected 1m, 5m, 10m, 30m or 60m)"),
            )),
        }
    }
}

/// Resolvable reference to a rendered report artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReportPointer(pub String);

impl ReportPointer {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ReportPointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Fields supplied when an algorithm is created.
#[derive(Debug, Clone)]
pub struct NewAlgorithm {
    pub id: Uuid,
    pub name: String,
    pub instrument: String,
    pub kind: AlgoKind,
}

#[derive(Debug, Clone, Serialize)]
pub struct Algorithm {
    #[serde(rename = "uuid")]
    pub id: Uuid,
    pub name: String,
    #[serde(rename = "sec_id")]
    pub instrument: String,
    #[serde(rename = "algo_type")]
    pub kind: AlgoKind,
    pub versions: Vec<AlgorithmVersion>,
}

impl Algorithm {
    pub fn version(&self, id: Uuid) -> Option<&AlgorithmVersion> {
        self.versions.iter().find(|v| v.id == id)
    }

    /// Look a version up, failing with a version-level not-found error.
    pub fn require_version(&self, id: Uuid) -> Result<&AlgorithmVersion, StratlabError> {
        self.version(id).ok_or(StratlabError::VersionNotFound {
            algorithm: self.id,
            version: id,
        })
    }

    pub fn summary(&self) -> AlgorithmSummary {
        AlgorithmSummary {
            id: self.id,
            name: self.name.clone(),
            instrument: self.instrument.clone(),
            kind: self.kind,
        }
    }
}

/// Catalogue entry without versions, used by market search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AlgorithmSummary {
    #[serde(rename = "uuid")]
    pub id: Uuid,
    pub name: String,
    #[serde(rename = "sec_id")]
    pub instrument: String,
    #[serde(rename = "algo_type")]
    pub kind: AlgoKind,
}

#[derive(Debug, Clone, Serialize)]
pub struct AlgorithmVersion {
    #[serde(rename = "uuid")]
    pub id: Uuid,
    pub features: FeatureConfig,
    pub management: RiskManagement,
    pub nodes: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AlgorithmBacktest {
    pub id: i64,
    pub version_id: Uuid,
    pub data: BacktestStats,
    pub graph_url: ReportPointer,
    pub created_at: DateTime<Utc>,
}
