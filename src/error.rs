//! Error taxonomy for the engine.
//!
//! Every fallible operation returns [`Result<T>`]. The variants map onto the
//! failure classes callers branch on: lookups that found nothing or too much,
//! edges read before they were loaded, database constraint violations,
//! pre-flight validation failures and context cancellation.

use std::error::Error as StdError;
use std::sync::Arc;

/// Shared, clonable cause attached to driver-level errors.
pub type Cause = Arc<dyn StdError + Send + Sync>;

/// Engine error type
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// A single-row lookup matched nothing
    #[error("entgraph: {label} not found")]
    NotFound { label: String },

    /// An `only` lookup matched more than one row
    #[error("entgraph: {label} not singular")]
    NotSingular { label: String },

    /// An edge was read on an entity that was not eager-loaded with it
    #[error("entgraph: edge \"{edge}\" was not loaded")]
    NotLoaded { edge: String },

    /// The database rejected a write (unique, foreign key, not null, check)
    #[error("entgraph: constraint failed: {message}")]
    Constraint {
        message: String,
        #[source]
        cause: Cause,
    },

    /// A field, edge or builder input failed pre-flight validation
    #[error("entgraph: validator failed for \"{name}\": {reason}")]
    Validation { name: String, reason: String },

    /// The context was cancelled by its owner
    #[error("entgraph: context canceled")]
    Cancelled,

    /// The context deadline passed before the operation finished
    #[error("entgraph: context deadline exceeded")]
    DeadlineExceeded,

    /// A batched edge load returned a row that no parent asked for
    #[error("entgraph: inconsistent load of edge \"{edge}\": {message}")]
    Inconsistent { edge: String, message: String },

    /// The transaction was already committed or rolled back
    #[error("entgraph: transaction has already been committed or rolled back")]
    TxClosed,

    /// The active dialect cannot express the requested statement
    #[error("entgraph: {feature} is not supported by the {dialect} dialect")]
    Unsupported { dialect: String, feature: String },

    /// A driver failure that is not a constraint violation
    #[error("entgraph: driver error: {message}")]
    Driver {
        message: String,
        #[source]
        cause: Option<Cause>,
    },

    /// A column value could not be converted into the requested type
    #[error("entgraph: scan error: {0}")]
    Scan(String),

    /// Anything else
    #[error("entgraph: {0}")]
    Other(String),
}

/// Engine result alias
pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub fn not_found(label: impl Into<String>) -> Self {
        Error::NotFound { label: label.into() }
    }

    pub fn not_singular(label: impl Into<String>) -> Self {
        Error::NotSingular { label: label.into() }
    }

    pub fn not_loaded(edge: impl Into<String>) -> Self {
        Error::NotLoaded { edge: edge.into() }
    }

    pub fn validation(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Validation {
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub fn constraint<E>(message: impl Into<String>, cause: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Error::Constraint {
            message: message.into(),
            cause: Arc::new(cause),
        }
    }

    pub fn driver<E>(cause: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Error::Driver {
            message: cause.to_string(),
            cause: Some(Arc::new(cause)),
        }
    }

    pub fn driver_msg(message: impl Into<String>) -> Self {
        Error::Driver {
            message: message.into(),
            cause: None,
        }
    }

    pub fn inconsistent(edge: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Inconsistent {
            edge: edge.into(),
            message: message.into(),
        }
    }

    pub fn unsupported(dialect: impl std::fmt::Display, feature: impl Into<String>) -> Self {
        Error::Unsupported {
            dialect: dialect.to_string(),
            feature: feature.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }

    pub fn is_not_singular(&self) -> bool {
        matches!(self, Error::NotSingular { .. })
    }

    pub fn is_not_loaded(&self) -> bool {
        matches!(self, Error::NotLoaded { .. })
    }

    pub fn is_constraint(&self) -> bool {
        matches!(self, Error::Constraint { .. })
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Error::Validation { .. })
    }

    /// Cancellation or deadline expiry
    pub fn is_context(&self) -> bool {
        matches!(self, Error::Cancelled | Error::DeadlineExceeded)
    }
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Error::Other(format!("configuration: {err}"))
    }
}
