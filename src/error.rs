//! Error types for the blockstore operator
//!
//! Provides structured error types for the placement scheduler, the
//! provisioning state machine, the device control layer, and the LVM backend.

use std::time::Duration;
use thiserror::Error;

use crate::crd::{VolumeError, VolumeErrorCode};

/// Unified error type for the operator
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // =========================================================================
    // Kubernetes Errors
    // =========================================================================
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("Resource not found: {kind}/{name}")]
    ResourceNotFound { kind: String, name: String },

    // =========================================================================
    // Placement Errors
    // =========================================================================
    #[error("No suitable node for volume {volume}: requested {requested} bytes")]
    NoSuitableNode { volume: String, requested: u64 },

    #[error("Invalid volume group pattern {pattern:?}: {reason}")]
    InvalidVgPattern { pattern: String, reason: String },

    #[error("No volume group matches pattern {pattern:?} with capacity {requested} bytes")]
    NoSuitableVolumeGroup { pattern: String, requested: u64 },

    // =========================================================================
    // Device Control Errors
    // =========================================================================
    #[error("Device command failed: {0}")]
    DeviceCommand(String),

    #[error("Unexpected device command output: {0}")]
    DeviceOutput(String),

    #[error("Access rules incomplete for target {target}: {applied}/{total} initiators set")]
    AclIncomplete {
        target: String,
        applied: usize,
        total: usize,
    },

    // =========================================================================
    // LVM Backend Errors
    // =========================================================================
    #[error("lvm command {program} failed: {output}")]
    LvmCommand { program: String, output: String },

    #[error("Device path missing: {path}")]
    DevicePathMissing { path: String },

    // =========================================================================
    // Wait/Cancellation Errors
    // =========================================================================
    #[error("Operation canceled while waiting for {0}")]
    Canceled(String),

    // =========================================================================
    // Parse Errors
    // =========================================================================
    #[error("Inventory report parse error: {0}")]
    ReportParse(String),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    // =========================================================================
    // IO Errors
    // =========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Action to take on error during reconciliation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
    /// Requeue after specific duration
    RequeueAfter(Duration),
    /// Don't requeue, wait for changes
    NoRequeue,
}

impl Error {
    /// Determine what action to take for this error
    pub fn action(&self) -> ErrorAction {
        match self {
            // Transient cluster or device trouble, retry soon
            Error::Kube(_) | Error::DeviceCommand(_) | Error::LvmCommand { .. } => {
                ErrorAction::RequeueAfter(Duration::from_secs(30))
            }

            // Partially applied access rules converge on retry
            Error::AclIncomplete { .. } => ErrorAction::RequeueAfter(Duration::from_secs(10)),

            // Placement exhaustion is surfaced to the caller, never retried here
            Error::NoSuitableNode { .. } | Error::NoSuitableVolumeGroup { .. } => {
                ErrorAction::NoRequeue
            }

            // Configuration/validation errors need operator intervention
            Error::Configuration(_) | Error::InvalidVgPattern { .. } => ErrorAction::NoRequeue,

            // The backing device will not reappear without operator action
            Error::DevicePathMissing { .. } => ErrorAction::NoRequeue,

            Error::Canceled(_) => ErrorAction::NoRequeue,

            _ => ErrorAction::RequeueAfter(Duration::from_secs(30)),
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        !matches!(self.action(), ErrorAction::NoRequeue)
    }

    /// Classify a provisioning failure into the error code persisted on the
    /// volume object. The administrative tools expose no structured error
    /// channel, so this matches on the captured output text.
    pub fn to_volume_error(&self) -> VolumeError {
        let message = self.to_string();
        let code = match self {
            Error::LvmCommand { output, .. }
                if output.to_lowercase().contains("insufficient free space") =>
            {
                VolumeErrorCode::InsufficientCapacity
            }
            Error::NoSuitableVolumeGroup { .. } => VolumeErrorCode::InsufficientCapacity,
            _ => VolumeErrorCode::Internal,
        };
        VolumeError { code, message }
    }
}

/// Result type alias for the operator
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_actions() {
        let err = Error::NoSuitableNode {
            volume: "vol-1".into(),
            requested: 1 << 30,
        };
        assert_eq!(err.action(), ErrorAction::NoRequeue);
        assert!(!err.is_retryable());

        let err = Error::DeviceCommand("session busy".into());
        assert_eq!(err.action(), ErrorAction::RequeueAfter(Duration::from_secs(30)));
        assert!(err.is_retryable());

        let err = Error::AclIncomplete {
            target: "iqn.2024-01.blockstore:volume.v".into(),
            applied: 1,
            total: 3,
        };
        assert_eq!(err.action(), ErrorAction::RequeueAfter(Duration::from_secs(10)));
    }

    #[test]
    fn test_volume_error_classification() {
        let err = Error::LvmCommand {
            program: "lvcreate".into(),
            output: "Volume group \"data1\" has insufficient free space (10 extents): 250 required."
                .into(),
        };
        assert_eq!(
            err.to_volume_error().code,
            VolumeErrorCode::InsufficientCapacity
        );

        let err = Error::LvmCommand {
            program: "lvcreate".into(),
            output: "device-mapper: create ioctl failed".into(),
        };
        assert_eq!(err.to_volume_error().code, VolumeErrorCode::Internal);

        let err = Error::Internal("boom".into());
        assert_eq!(err.to_volume_error().code, VolumeErrorCode::Internal);
    }
}
