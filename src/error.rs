//! Error handling for the gain-staging engine
//!
//! Control-context failures are returned synchronously through [`EngineError`].
//! Conditions that originate in the render context (underruns, busy units,
//! dropped events) never surface here directly; they are counted by the
//! renderer and delivered through `Engine::poll_events`.

use thiserror::Error;

use crate::chain::UnitId;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Main error type for engine operations
#[derive(Error, Debug)]
pub enum EngineError {
    // Parameter Errors
    #[error("Invalid parameter '{key}' = {value} on {target}: {reason}")]
    InvalidParameter {
        /// Unit id, or `master` for the master trims
        target: String,
        key: String,
        value: f32,
        reason: String,
    },

    // Chain Errors
    #[error("Chain is full: maximum of {max_units} units reached")]
    CapacityExceeded { max_units: usize },

    #[error("Topology rebuild failed, previous topology kept: {reason}")]
    TopologyRebuildFailed { reason: String },

    #[error("Unit not found: {id}")]
    UnitNotFound { id: UnitId },

    // Render Errors (reported, never raised from the render context)
    #[error("Render deadline missed {count} time(s)")]
    UnderrunDetected { count: u64 },

    // Metering Errors
    #[error("Unknown metering point: {name}")]
    UnknownMeteringPoint { name: String },

    // Configuration Errors
    #[error("Invalid engine configuration: {reason}")]
    InvalidConfig { reason: String },

    // Audio file errors (CLI collaborator)
    #[error("Audio file error: {path}")]
    AudioFile {
        path: String,
        #[source]
        source: hound::Error,
    },

    // I/O Errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization Errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EngineError {
    /// Get the error code for this error type
    pub fn error_code(&self) -> &'static str {
        match self {
            EngineError::InvalidParameter { .. } => "INVALID_PARAMETER",
            EngineError::CapacityExceeded { .. } => "CAPACITY_EXCEEDED",
            EngineError::TopologyRebuildFailed { .. } => "TOPOLOGY_REBUILD_FAILED",
            EngineError::UnitNotFound { .. } => "UNIT_NOT_FOUND",
            EngineError::UnderrunDetected { .. } => "UNDERRUN_DETECTED",
            EngineError::UnknownMeteringPoint { .. } => "UNKNOWN_METERING_POINT",
            EngineError::InvalidConfig { .. } => "INVALID_CONFIG",
            EngineError::AudioFile { .. } => "AUDIO_FILE_ERROR",
            EngineError::Io(_) => "IO_ERROR",
            EngineError::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }

    /// Check if this error leaves the engine fully usable
    ///
    /// Every control-plane rejection is recoverable: the previous chain state
    /// stays authoritative. Only configuration and file errors require the
    /// caller to change its inputs before retrying.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            EngineError::InvalidParameter { .. }
                | EngineError::CapacityExceeded { .. }
                | EngineError::TopologyRebuildFailed { .. }
                | EngineError::UnitNotFound { .. }
                | EngineError::UnderrunDetected { .. }
                | EngineError::UnknownMeteringPoint { .. }
        )
    }

    /// Returns a suggested recovery action for this error
    pub fn recovery_hint(&self) -> &'static str {
        match self {
            EngineError::InvalidParameter { .. } => {
                "Use a value inside the range the unit declares for this key"
            }
            EngineError::CapacityExceeded { .. } => {
                "Disconnect a unit or raise max_units in the engine configuration"
            }
            EngineError::TopologyRebuildFailed { .. } => {
                "The previous chain is still playing; check the unit's reported gain trim"
            }
            EngineError::UnitNotFound { .. } => "Refresh the unit list from Engine::descriptors",
            EngineError::UnderrunDetected { .. } => {
                "Increase the block size or reduce the number of active units"
            }
            EngineError::UnknownMeteringPoint { .. } => {
                "Use input, preProcess, postProcess, masterLimiter, output or unit:<id>"
            }
            EngineError::InvalidConfig { .. } => "Fix the configuration file and reload",
            EngineError::AudioFile { .. } => "Check that the file exists and is a valid WAV file",
            _ => "Check the error details and try again",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let err = EngineError::CapacityExceeded { max_units: 4 };
        assert_eq!(err.error_code(), "CAPACITY_EXCEEDED");
        assert!(err.to_string().contains("4 units"));
    }

    #[test]
    fn test_control_errors_are_recoverable() {
        let err = EngineError::TopologyRebuildFailed {
            reason: "non-finite compensation".to_string(),
        };
        assert!(err.is_recoverable());
        assert!(!err.recovery_hint().is_empty());

        let err = EngineError::InvalidConfig {
            reason: "sample_rate is zero".to_string(),
        };
        assert!(!err.is_recoverable());
    }
}
