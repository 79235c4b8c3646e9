//! Algorithm catalogue: creation, listing, lookup and market search.

use tracing::info;
use uuid::Uuid;

use crate::domain::algorithm::{
    AlgoKind, Algorithm, AlgorithmBacktest, AlgorithmSummary, NewAlgorithm, UserId,
};
use crate::domain::error::StratlabError;
use crate::ports::store_port::AlgorithmStore;

const MAX_INSTRUMENT_LEN: usize = 10;

pub fn create_algorithm(
    store: &dyn AlgorithmStore,
    owner: UserId,
    kind: AlgoKind,
    name: &str,
    instrument: &str,
) -> Result<Algorithm, StratlabError> {
    if !store.user_exists(owner)? {
        return Err(StratlabError::Unauthorized);
    }

    let name = name.trim();
    let instrument = instrument.trim();
    if name.is_empty() {
        return Err(StratlabError::validation("name", "must not be empty"));
    }
    if instrument.is_empty() {
        return Err(StratlabError::validation("sec_id", "must not be empty"));
    }
    if instrument.chars().count() > MAX_INSTRUMENT_LEN {
        return Err(StratlabError::validation(
            "sec_id",
            format!("must be at most {MAX_INSTRUMENT_LEN} characters"),
        ));
    }

    let new = NewAlgorithm {
        id: Uuid::new_v4(),
        name: name.to_string(),
        instrument: instrument.to_string(),
        kind,
    };
    let algorithm = store.create_algorithm(owner, &new)?;
    info!(algorithm = %algorithm.id, owner, kind = %kind, instrument = %algorithm.instrument, "algorithm created");
    Ok(algorithm)
}

pub fn list_algorithms(
    store: &dyn AlgorithmStore,
    owner: UserId,
) -> Result<Vec<Algorithm>, StratlabError> {
    store.list_algorithms(owner)
}

pub fn get_algorithm(store: &dyn AlgorithmStore, id: Uuid) -> Result<Algorithm, StratlabError> {
    store
        .get_algorithm(id)?
        .ok_or(StratlabError::AlgorithmNotFound { id })
}

/// Like [`get_algorithm`], but also checks the kind named by the caller.
pub fn get_algorithm_of_kind(
    store: &dyn AlgorithmStore,
    id: Uuid,
    kind: AlgoKind,
) -> Result<Algorithm, StratlabError> {
    let algorithm = get_algorithm(store, id)?;
    if algorithm.kind != kind {
        return Err(StratlabError::AlgorithmNotFound { id });
    }
    Ok(algorithm)
}

pub fn search_algorithms(
    store: &dyn AlgorithmStore,
) -> Result<Vec<AlgorithmSummary>, StratlabError> {
    store.search_algorithms()
}

pub fn list_backtests(
    store: &dyn AlgorithmStore,
    algorithm_id: Uuid,
    version_id: Uuid,
) -> Result<Vec<AlgorithmBacktest>, StratlabError> {
    get_algorithm(store, algorithm_id)?.require_version(version_id)?;
    store.list_backtests(algorithm_id, version_id)
}
