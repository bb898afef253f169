//! Error types for fleethub.
//!
//! Errors fall into two groups: the session taxonomy surfaced by the
//! synchronizer (configuration, authentication, data setup, fetch and write
//! failures) and the lower-level storage, configuration and I/O errors those
//! wrap.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for fleethub operations.
#[derive(Error, Debug)]
pub enum Error {
    // === Session Errors ===
    /// The backend configuration is missing, empty or malformed.
    #[error("invalid backend configuration: {message}")]
    ConfigInvalid {
        /// Description of what is wrong with the configuration.
        message: String,
    },

    /// Neither the token nor the anonymous sign-in path produced an identity.
    #[error("authentication failed: {message}")]
    AuthFailure {
        /// Description of what went wrong.
        message: String,
    },

    /// The empty-check or the fixture batch write failed.
    #[error("failed to set up fleet data: {message}")]
    DataSetup {
        /// Description of what went wrong.
        message: String,
    },

    /// The live subscription reported an error.
    #[error("failed to fetch fleet data: {message}")]
    Fetch {
        /// Description of what went wrong.
        message: String,
    },

    /// A field-merge update was rejected.
    #[error("failed to update {document}: {message}")]
    Write {
        /// Path of the document being written.
        document: String,
        /// Description of what went wrong.
        message: String,
    },

    // === Document Errors ===
    /// The addressed document does not exist.
    #[error("document not found: {path}")]
    DocumentNotFound {
        /// Full document path.
        path: String,
    },

    /// A form field failed local validation.
    #[error("{field}: {message}")]
    Validation {
        /// Name of the offending form field.
        field: &'static str,
        /// Description of the validation failure.
        message: String,
    },

    // === Storage Errors ===
    /// Failed to open or create the database.
    #[error("failed to open database at {path}: {source}")]
    DatabaseOpen {
        /// Path to the database file.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: rusqlite::Error,
    },

    /// A database query failed.
    #[error("database query failed: {0}")]
    DatabaseQuery(#[from] rusqlite::Error),

    /// Failed to run database migrations.
    #[error("database migration failed: {message}")]
    DatabaseMigration {
        /// Description of what went wrong.
        message: String,
    },

    // === Configuration Errors ===
    /// Failed to load configuration.
    #[error("failed to load configuration: {0}")]
    ConfigLoad(Box<figment::Error>),

    /// Configuration validation failed.
    #[error("invalid configuration: {message}")]
    ConfigValidation {
        /// Description of the validation failure.
        message: String,
    },

    // === I/O Errors ===
    /// File system operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to create a required directory.
    #[error("failed to create directory {path}: {source}")]
    DirectoryCreate {
        /// Path that couldn't be created.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    // === Serialization Errors ===
    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Generic Errors ===
    /// An internal error occurred (bug).
    #[error("internal error: {0}")]
    Internal(String),
}

/// A specialized Result type for fleethub operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Self::ConfigLoad(Box::new(err))
    }
}

impl Error {
    /// Create a new invalid-configuration error.
    #[must_use]
    pub fn config_invalid(message: impl Into<String>) -> Self {
        Self::ConfigInvalid {
            message: message.into(),
        }
    }

    /// Create a new authentication error.
    #[must_use]
    pub fn auth(message: impl Into<String>) -> Self {
        Self::AuthFailure {
            message: message.into(),
        }
    }

    /// Create a new data setup error.
    #[must_use]
    pub fn data_setup(message: impl Into<String>) -> Self {
        Self::DataSetup {
            message: message.into(),
        }
    }

    /// Create a new fetch error.
    #[must_use]
    pub fn fetch(message: impl Into<String>) -> Self {
        Self::Fetch {
            message: message.into(),
        }
    }

    /// Create a new write error for the given document path.
    #[must_use]
    pub fn write(document: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Write {
            document: document.into(),
            message: message.into(),
        }
    }

    /// Create a new validation error for a form field.
    #[must_use]
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        Self::Validation {
            field,
            message: message.into(),
        }
    }

    /// Create a new internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Check if this error halts the inventory listing.
    ///
    /// Read-path failures block all functionality and are surfaced as a
    /// full-page message; authentication and write failures are not.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::ConfigInvalid { .. } | Self::DataSetup { .. } | Self::Fetch { .. }
        )
    }

    /// Check if this error is a local form validation failure.
    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation { .. })
    }
}
