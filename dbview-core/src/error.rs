//! Error types for DBView operations

use std::fmt;
use thiserror::Error;

/// Which side of the open window an access fell on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LivePhase {
    /// The view has not been opened yet.
    TooEarly,
    /// The view has already been closed.
    TooLate,
}

impl fmt::Display for LivePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LivePhase::TooEarly => write!(f, "before DbView has been opened"),
            LivePhase::TooLate => write!(f, "after DbView has been closed"),
        }
    }
}

/// An operation touched a view (or one of its handles) outside its open window.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{subject} is being accessed {phase}")]
pub struct NotLiveError {
    /// What was being accessed, e.g. `Handle<parent>` or `DbView::load`.
    pub subject: String,
    pub phase: LivePhase,
}

impl NotLiveError {
    pub fn new(subject: impl Into<String>, phase: LivePhase) -> Self {
        Self {
            subject: subject.into(),
            phase,
        }
    }

    /// True if the view was never opened.
    pub fn is_too_early(&self) -> bool {
        self.phase == LivePhase::TooEarly
    }

    /// True if the view has already been closed.
    pub fn is_too_late(&self) -> bool {
        self.phase == LivePhase::TooLate
    }
}

/// Lifecycle transition errors that are not plain liveness violations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LifecycleError {
    #[error("DbView is already open")]
    AlreadyOpen,
}

/// Storage layer errors, surfaced verbatim from a data store adapter.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Row not found: {entity} with identity {identity}")]
    NotFound { entity: String, identity: String },

    #[error("Unknown entity type: {entity}")]
    UnknownEntity { entity: String },

    #[error("Unknown field {field} on {entity}")]
    UnknownField { entity: String, field: String },

    #[error("Store unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Transaction failed: {reason}")]
    TransactionFailed { reason: String },

    #[error("Serialization failed: {reason}")]
    Serialization { reason: String },

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

/// Errors mapping between domain values and rows.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MappingError {
    #[error("Row for {entity} is missing key column {column}")]
    MissingKeyColumn { entity: String, column: String },

    #[error("Invalid key value in column {column}: {value}")]
    InvalidKey { column: String, value: String },

    #[error("Entity {entity} did not serialize to an object")]
    NotAnObject { entity: String },

    #[error("Field {field} targets {expected}, not {requested}")]
    TargetMismatch {
        field: String,
        expected: String,
        requested: String,
    },

    #[error("Field {field} is {declared}-valued")]
    CardinalityMismatch { field: String, declared: String },

    #[error("Failed to decode {entity}: {reason}")]
    Decode { entity: String, reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("An origin store is required unless mode is OFFLINE (mode is {mode})")]
    OriginRequired { mode: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all DBView errors.
#[derive(Debug, Clone, Error)]
pub enum ViewError {
    #[error(transparent)]
    NotLive(#[from] NotLiveError),

    #[error("Lifecycle error: {0}")]
    Lifecycle(#[from] LifecycleError),

    #[error("Cannot load {what}; offline and it is not cached")]
    IsOffline { what: String },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Mapping error: {0}")]
    Mapping(#[from] MappingError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl ViewError {
    pub fn is_not_live(&self) -> bool {
        matches!(self, ViewError::NotLive(_))
    }

    pub fn is_offline(&self) -> bool {
        matches!(self, ViewError::IsOffline { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ViewError::Storage(StorageError::NotFound { .. }))
    }
}

/// Result type alias for DBView operations.
pub type ViewResult<T> = Result<T, ViewError>;

// =============================================================================
// TESTS
// =============================================================================
