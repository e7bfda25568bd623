//! Error taxonomy for the toolbox core

use std::path::PathBuf;

/// Failure raised by an execution strategy.
///
/// Always intercepted by the executor and folded into a failure envelope.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StrategyError {
    #[error("execution timed out")]
    Timeout,
    #[error("permission denied")]
    PermissionDenied,
    #[error("not supported on this platform")]
    NotSupported,
    #[error("{0}")]
    Unknown(String),
}

impl StrategyError {
    /// Short machine-readable code used in failure envelopes
    pub fn code(&self) -> &'static str {
        match self {
            StrategyError::Timeout => "timeout",
            StrategyError::PermissionDenied => "permission_denied",
            StrategyError::NotSupported => "not_supported",
            StrategyError::Unknown(_) => "unknown",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ToolboxError {
    #[error("invalid tool '{tool_id}': {reason}")]
    Validation { tool_id: String, reason: String },

    #[error("tool already registered: {0}")]
    DuplicateTool(String),

    #[error("tool not found: {0}")]
    NotFound(String),

    #[error("tool is not monitorable: {0}")]
    NotMonitorable(String),

    #[error("invalid store key: {0}")]
    InvalidKey(String),

    #[error("i/o error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed document {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Strategy(#[from] StrategyError),
}

impl ToolboxError {
    pub(crate) fn validation(tool_id: &str, reason: impl Into<String>) -> Self {
        ToolboxError::Validation {
            tool_id: tool_id.to_string(),
            reason: reason.into(),
        }
    }

    /// Short machine-readable code used in failure envelopes
    pub fn code(&self) -> &'static str {
        match self {
            ToolboxError::Validation { .. } => "validation",
            ToolboxError::DuplicateTool(_) => "duplicate_tool",
            ToolboxError::NotFound(_) => "not_found",
            ToolboxError::NotMonitorable(_) => "not_monitorable",
            ToolboxError::InvalidKey(_) => "invalid_key",
            ToolboxError::Io { .. } => "io",
            ToolboxError::Parse { .. } => "parse",
            ToolboxError::Strategy(e) => e.code(),
        }
    }

    /// True when the underlying file simply does not exist yet
    pub fn is_missing_file(&self) -> bool {
        matches!(
            self,
            ToolboxError::Io { source, .. } if source.kind() == std::io::ErrorKind::NotFound
        )
    }
}

pub type Result<T> = std::result::Result<T, ToolboxError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_error_codes() {
        assert_eq!(StrategyError::Timeout.code(), "timeout");
        assert_eq!(StrategyError::Unknown("boom".into()).code(), "unknown");
        assert_eq!(StrategyError::Unknown("boom".into()).to_string(), "boom");
    }

    #[test]
    fn test_strategy_error_converts_transparently() {
        let err: ToolboxError = StrategyError::PermissionDenied.into();
        assert_eq!(err.code(), "permission_denied");
        assert_eq!(err.to_string(), "permission denied");
    }

    #[test]
    fn test_missing_file_detection() {
        let err = ToolboxError::Io {
            path: PathBuf::from("/nope"),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        };
        assert!(err.is_missing_file());
        assert!(!ToolboxError::NotFound("x".into()).is_missing_file());
    }
}
