//! Domain error types.

use crate::domain::algorithm::AlgoKind;
use uuid::Uuid;

/// Coarse grouping of errors, shared by the CLI exit codes and the web
/// status mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Validation,
    NotFound,
    Unauthorized,
    Mismatch,
    Engine,
    Persistence,
    Store,
    Config,
    Internal,
}

/// Top-level error type for stratlab.
#[derive(Debug, thiserror::Error)]
pub enum StratlabError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("wrong feature shape for {kind} algorithm: expected {expected}")]
    WrongShape { kind: AlgoKind, expected: &'static str },

    #[error("algorithm {id} not found")]
    AlgorithmNotFound { id: Uuid },

    #[error("version {version} not found in algorithm {algorithm}")]
    VersionNotFound { algorithm: Uuid, version: Uuid },

    #[error("user {id} not found")]
    UserNotFound { id: i64 },

    #[error("could not validate credentials")]
    Unauthorized,

    #[error("cannot {operation} a {kind} algorithm")]
    ConfigurationMismatch {
        operation: &'static str,
        kind: AlgoKind,
    },

    #[error("{stage} engine failed: {reason}")]
    Engine { stage: &'static str, reason: String },

    #[error("failed to persist result: {reason}")]
    Persistence { reason: String },

    #[error("database error: {reason}")]
    Database { reason: String },

    #[error("database query error: {reason}")]
    DatabaseQuery { reason: String },

    #[error("config parse error in {file}: {reason}")]
    ConfigParse { file: String, reason: String },

    #[error("missing config key [{section}] {key}")]
    ConfigMissing { section: String, key: String },

    #[error("invalid config value [{section}] {key}: {reason}")]
    ConfigInvalid {
        section: String,
        key: String,
        reason: String,
    },

    #[error("background task failed: {reason}")]
    Dispatch { reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl StratlabError {
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            StratlabError::Validation { .. } | StratlabError::WrongShape { .. } => {
                ErrorCategory::Validation
            }
            StratlabError::AlgorithmNotFound { .. }
            | StratlabError::VersionNotFound { .. }
            | StratlabError::UserNotFound { .. } => ErrorCategory::NotFound,
            StratlabError::Unauthorized => ErrorCategory::Unauthorized,
            StratlabError::ConfigurationMismatch { .. } => ErrorCategory::Mismatch,
            StratlabError::Engine { .. } => ErrorCategory::Engine,
            StratlabError::Persistence { .. } => ErrorCategory::Persistence,
            StratlabError::Database { .. } | StratlabError::DatabaseQuery { .. } => {
                ErrorCategory::Store
            }
            StratlabError::ConfigParse { .. }
            | StratlabError::ConfigMissing { .. }
            | StratlabError::ConfigInvalid { .. } => ErrorCategory::Config,
            StratlabError::Dispatch { .. } | StratlabError::Io(_) => ErrorCategory::Internal,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.category() == ErrorCategory::NotFound
    }
}

impl From<&StratlabError> for std::process::ExitCode {
    fn from(err: &StratlabError) -> Self {
        let code: u8 = match err.category() {
            ErrorCategory::Internal => 1,
            ErrorCategory::Config => 2,
            ErrorCategory::Store | ErrorCategory::Persistence => 3,
            ErrorCategory::Validation | ErrorCategory::Mismatch => 4,
            ErrorCategory::Engine => 5,
            ErrorCategory::NotFound => 6,
            ErrorCategory::Unauthorized => 7,
        };
        std::process::ExitCode::from(code)
    }
}
