use crate::{data::MergeError, session::SessionError};
use serde::{Deserialize, Serialize};

/// Stable classification of engine failures, suitable for JSON output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    InvalidName,
    TypeConflict,
    UpdatesDisabled,
    NotFound,
    Protected,
    Execution,
    Cancelled,
    SessionCompatibility,
    InvalidInput,
    Io,
    Internal,
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Invalid name '{name}': {reason}")]
    InvalidName { name: String, reason: String },

    #[error("'{name}' is already a {existing} and can not be replaced by a {incoming}")]
    TypeConflict {
        name: String,
        existing: crate::data::DataKind,
        incoming: crate::data::DataKind,
    },

    #[error("Updates are not allowed at this time")]
    UpdatesDisabled,

    #[error("Unknown data object '{0}'")]
    NotFound(String),

    #[error("{0}")]
    Protected(String),

    #[error(transparent)]
    Merge(#[from] MergeError),

    #[error("{0}")]
    Execution(String),

    #[error("Aborted!")]
    Cancelled,

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("{0}")]
    InvalidInput(String),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{0}")]
    Internal(String),
}

impl EngineError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidName { .. } => ErrorCode::InvalidName,
            Self::TypeConflict { .. } | Self::Merge(_) => ErrorCode::TypeConflict,
            Self::UpdatesDisabled => ErrorCode::UpdatesDisabled,
            Self::NotFound(_) => ErrorCode::NotFound,
            Self::Protected(_) => ErrorCode::Protected,
            Self::Execution(_) => ErrorCode::Execution,
            Self::Cancelled => ErrorCode::Cancelled,
            Self::Session(e) if e.is_compatibility() => ErrorCode::SessionCompatibility,
            Self::Session(_) | Self::InvalidInput(_) => ErrorCode::InvalidInput,
            Self::Io { .. } => ErrorCode::Io,
            Self::Internal(_) => ErrorCode::Internal,
        }
    }

    /// Validation failures raised synchronously by the registry.
    pub fn is_validation(&self) -> bool {
        matches!(
            self.code(),
            ErrorCode::InvalidName
                | ErrorCode::TypeConflict
                | ErrorCode::UpdatesDisabled
                | ErrorCode::Protected
        )
    }

    /// Only execution failures are candidates for the client's retry policy.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Execution(_))
    }

    pub fn invalid_name(name: &str, reason: impl Into<String>) -> Self {
        Self::InvalidName {
            name: name.to_string(),
            reason: reason.into(),
        }
    }

    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::DataKind;

    #[test]
    fn test_codes_and_retry_classification() {
        let conflict = EngineError::TypeConflict {
            name: "X".to_string(),
            existing: DataKind::Motif,
            incoming: DataKind::Module,
        };
        assert_eq!(conflict.code(), ErrorCode::TypeConflict);
        assert!(conflict.is_validation());
        assert!(!conflict.is_retryable());
        assert_eq!(
            conflict.to_string(),
            "'X' is already a Motif and can not be replaced by a Module"
        );

        let exec = EngineError::Execution("boom".to_string());
        assert!(exec.is_retryable());
        assert!(!exec.is_validation());
        assert!(!EngineError::Cancelled.is_retryable());
        assert_eq!(EngineError::Cancelled.code(), ErrorCode::Cancelled);
    }

    #[test]
    fn test_session_compatibility_code() {
        let err: EngineError = SessionError::NeedsNewerVersion {
            found: 3,
            supported: 2,
        }
        .into();
        assert_eq!(err.code(), ErrorCode::SessionCompatibility);
        let err: EngineError = SessionError::Truncated("display settings").into();
        assert_eq!(err.code(), ErrorCode::InvalidInput);
    }
}
