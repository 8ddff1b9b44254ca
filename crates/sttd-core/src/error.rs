use crate::types::SessionState;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("environment variable not found: {0}")]
    EnvVarNotFound(String),
}

/// Fixed outcome set an engine callback may return.
///
/// Engines cannot signal arbitrary failures: everything without a dedicated
/// mapping in [`SttError::from_engine`] collapses to `OperationFailed`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("invalid parameter")]
    InvalidParameter,

    #[error("language not supported by engine: {0}")]
    InvalidLanguage(String),

    #[error("network unavailable")]
    NetworkDown,

    #[error("permission denied by engine")]
    PermissionDenied,

    #[error("feature not supported by engine")]
    NotSupported,

    #[error("engine failure: {0}")]
    Failed(String),
}

/// Error taxonomy of the client/daemon protocol.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SttError {
    /// Operation not legal in the handle's current state. No side effect.
    #[error("operation not permitted in state {current}")]
    InvalidState { current: SessionState },

    #[error("engine not available: {0}")]
    EngineNotAvailable(String),

    /// The recorder is held by another session. Requests are not queued.
    #[error("recorder is busy")]
    RecorderBusy,

    #[error("operation failed: {0}")]
    OperationFailed(String),

    #[error("language not supported: {0}")]
    InvalidLanguage(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),
}

impl SttError {
    pub fn invalid_state(current: SessionState) -> Self {
        SttError::InvalidState { current }
    }

    /// Normalize an engine outcome onto the protocol taxonomy.
    pub fn from_engine(err: EngineError) -> Self {
        match err {
            EngineError::InvalidLanguage(lang) => SttError::InvalidLanguage(lang),
            EngineError::PermissionDenied => {
                SttError::PermissionDenied("rejected by engine".to_string())
            }
            other => SttError::OperationFailed(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_engine_maps_language() {
        let err = SttError::from_engine(EngineError::InvalidLanguage("xx-XX".to_string()));
        assert_eq!(err, SttError::InvalidLanguage("xx-XX".to_string()));
    }

    #[test]
    fn test_from_engine_maps_permission() {
        let err = SttError::from_engine(EngineError::PermissionDenied);
        assert!(matches!(err, SttError::PermissionDenied(_)));
    }

    #[test]
    fn test_from_engine_normalizes_rest_to_operation_failed() {
        for e in [
            EngineError::InvalidParameter,
            EngineError::NetworkDown,
            EngineError::NotSupported,
            EngineError::Failed("boom".to_string()),
        ] {
            assert!(matches!(SttError::from_engine(e), SttError::OperationFailed(_)));
        }
    }

    #[test]
    fn test_invalid_state_message_names_state() {
        let err = SttError::invalid_state(SessionState::Recording);
        assert!(err.to_string().contains("Recording"));
    }
}
