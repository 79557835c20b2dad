//! Error types for migration operations.

use thiserror::Error;

/// Migration-specific errors.
///
/// Messages never contain credential-bearing URLs: anything derived from git
/// output or a clone URL is redacted before it is stored here.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// Failed to authenticate with the source or target platform.
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Repository or resource not found on a platform.
    #[error("Repository not found: {0}")]
    RepositoryNotFound(String),

    /// API request returned an unexpected status.
    #[error("API request failed with status {status}: {message}")]
    ApiError {
        /// HTTP status code.
        status: u16,
        /// Response body or description.
        message: String,
    },

    /// Network error.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The target root organization has not been provisioned.
    #[error("Root organization {0} does not exist on the target platform")]
    RootOrganizationMissing(String),

    /// A sub-organization path is already taken by a repository.
    #[error("Sub-organization {0} conflicts with an existing repository")]
    SubGroupConflict(String),

    /// A git subprocess failed.
    #[error("git {operation} failed: {output}")]
    GitCommand {
        /// Short name of the operation (clone, push, lfs push, ...).
        operation: String,
        /// Redacted combined stdout/stderr.
        output: String,
    },

    /// The target rejected a push because of its file-size policy.
    #[error("Push rejected by target size limit: {0}")]
    SizeLimitExceeded(String),

    /// Unsupported feature.
    #[error("Unsupported feature: {0}")]
    UnsupportedFeature(String),

    /// The run was interrupted by a signal.
    #[error("Migration interrupted")]
    Interrupted,

    /// Generic I/O error.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON parsing error.
    #[error("JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// HTTP client error.
    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    /// Configuration source error.
    #[error("Configuration error: {0}")]
    ConfigError(#[from] config::ConfigError),
}

impl MigrationError {
    /// Build an [`MigrationError::ApiError`] from a status and body.
    pub fn api(status: reqwest::StatusCode, message: impl Into<String>) -> Self {
        Self::ApiError {
            status: status.as_u16(),
            message: message.into(),
        }
    }
}

/// Result type for migration operations.
pub type Result<T> = std::result::Result<T, MigrationError>;
