//! Algorithm persistence port trait.

use uuid::Uuid;

use crate::domain::algorithm::{
    Algorithm, AlgorithmBacktest, AlgorithmSummary, AlgorithmVersion, NewAlgorithm, ReportPointer,
    UserId,
};
use crate::domain::error::StratlabError;
use crate::domain::features::MlFeatures;
use crate::domain::normalize::BacktestStats;
use crate::domain::versioning::VersionDraft;

/// Transactional store for algorithms, their versions and backtest rows.
///
/// Lookups that find nothing return `Ok(None)`; write failures are
/// reported as [`StratlabError::Persistence`] so they stay distinct from
/// not-found and engine errors.
pub trait AlgorithmStore: Send + Sync {
    fn user_exists(&self, user: UserId) -> Result<bool, StratlabError>;

    /// Insert the algorithm and link it to `owner` in one transaction.
    fn create_algorithm(
        &self,
        owner: UserId,
        algorithm: &NewAlgorithm,
    ) -> Result<Algorithm, StratlabError>;

    /// Algorithm with its versions in creation order.
    fn get_algorithm(&self, id: Uuid) -> Result<Option<Algorithm>, StratlabError>;

    fn list_algorithms(&self, owner: UserId) -> Result<Vec<Algorithm>, StratlabError>;

    fn search_algorithms(&self) -> Result<Vec<AlgorithmSummary>, StratlabError>;

    /// Append a new version tagged with `version_id`.
    fn append_version(
        &self,
        algorithm_id: Uuid,
        version_id: Uuid,
        draft: &VersionDraft,
    ) -> Result<AlgorithmVersion, StratlabError>;

    /// Overwrite features, management and nodes of an existing version.
    fn replace_version(
        &self,
        algorithm_id: Uuid,
        version_id: Uuid,
        draft: &VersionDraft,
    ) -> Result<AlgorithmVersion, StratlabError>;

    /// Overwrite only the feature configuration of a version.
    fn update_features(
        &self,
        algorithm_id: Uuid,
        version_id: Uuid,
        features: &MlFeatures,
    ) -> Result<AlgorithmVersion, StratlabError>;

    /// Persist one backtest row; statistics and pointer land together.
    fn insert_backtest(
        &self,
        algorithm_id: Uuid,
        version_id: Uuid,
        stats: &BacktestStats,
        graph_url: &ReportPointer,
    ) -> Result<AlgorithmBacktest, StratlabError>;

    fn list_backtests(
        &self,
        algorithm_id: Uuid,
        version_id: Uuid,
    ) -> Result<Vec<AlgorithmBacktest>, StratlabError>;
}
