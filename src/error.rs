use crate::bugs::UrlTemplateError;
use crate::normalizer::NormalizationError;
use crate::signature::PatternError;
use thiserror::Error;

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    /// Not found errors
    #[error("Not found: {0}")]
    NotFound(String),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Storage backend errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// Crash could not be normalized into a comparable trace
    #[error("Normalization error: {0}")]
    Normalization(#[from] NormalizationError),

    /// Signature pattern could not be parsed
    #[error("Signature pattern error: {0}")]
    Pattern(#[from] PatternError),

    /// Bug tracker URL template could not be applied
    #[error("Bug URL template error: {0}")]
    UrlTemplate(#[from] UrlTemplateError),

    /// Bucket still referenced by crashes
    #[error("Bucket {bucket_id} still has {member_count} assigned crashes")]
    BucketInUse { bucket_id: u64, member_count: u64 },

    /// Invalid state transition
    #[error("Invalid state transition: {0}")]
    InvalidStateTransition(String),

    /// Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Get error code string
    pub fn error_code(&self) -> &str {
        match self {
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::Configuration(_) => "CONFIGURATION_ERROR",
            AppError::Io(_) => "IO_ERROR",
            AppError::Serialization(_) => "SERIALIZATION_ERROR",
            AppError::Storage(_) => "STORAGE_ERROR",
            AppError::Normalization(_) => "NORMALIZATION_ERROR",
            AppError::Pattern(_) => "PATTERN_ERROR",
            AppError::UrlTemplate(_) => "URL_TEMPLATE_ERROR",
            AppError::BucketInUse { .. } => "BUCKET_IN_USE",
            AppError::InvalidStateTransition(_) => "INVALID_STATE_TRANSITION",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether the caller can recover by degrading (manual triage, no link, ...)
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            AppError::Normalization(_) | AppError::UrlTemplate(_) | AppError::NotFound(_)
        )
    }
}

/// Conversion from serde_json::Error
impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

/// Conversion from bincode::Error
impl From<bincode::Error> for AppError {
    fn from(err: bincode::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

/// Conversion from sled::Error
impl From<sled::Error> for AppError {
    fn from(err: sled::Error) -> Self {
        AppError::Storage(err.to_string())
    }
}

/// Conversion from validator::ValidationErrors
impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::Validation(err.to_string())
    }
}

/// Conversion from config::ConfigError
impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Configuration(err.to_string())
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            AppError::NotFound("test".to_string()).error_code(),
            "NOT_FOUND"
        );
        assert_eq!(
            AppError::Normalization(NormalizationError::MissingTrace).error_code(),
            "NORMALIZATION_ERROR"
        );
        assert_eq!(
            AppError::BucketInUse {
                bucket_id: 3,
                member_count: 2
            }
            .error_code(),
            "BUCKET_IN_USE"
        );
    }

    #[test]
    fn test_recoverable_errors() {
        assert!(AppError::Normalization(NormalizationError::NoUsableFrames).is_recoverable());
        assert!(AppError::UrlTemplate(UrlTemplateError::MissingPlaceholder).is_recoverable());
        assert!(!AppError::Internal("boom".to_string()).is_recoverable());
    }

    #[test]
    fn test_bucket_in_use_message() {
        let err = AppError::BucketInUse {
            bucket_id: 7,
            member_count: 12,
        };
        assert_eq!(err.to_string(), "Bucket 7 still has 12 assigned crashes");
    }
}
