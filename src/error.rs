// src/error.rs
//! Error types for the trip recorder

use crate::permission::{PermissionScope, PermissionState};
use std::fmt;

pub type Result<T> = std::result::Result<T, TripError>;

#[derive(Debug)]
pub enum TripError {
    Io(std::io::Error),
    Serial(tokio_serial::Error),
    Json(serde_json::Error),
    Sql(rusqlite::Error),
    Connection(String),
    Parse(String),
    /// Location permission is missing for the requested kind of tracking
    PermissionDenied {
        scope: PermissionScope,
        state: PermissionState,
    },
    /// Neither fix source could be activated
    SourceUnavailable(String),
    Storage(String),
    Serialization(String),
    /// Finalization was asked to reduce an empty fix sequence
    EmptyTrip,
    /// The operation needs a buffered trip and there is none
    NoTrip,
    TripNotFound(i64),
    Export(String),
    Other(String),
}

impl TripError {
    /// Errors the user can fix themselves (grant a permission, retry later).
    pub fn is_user_actionable(&self) -> bool {
        matches!(self, TripError::PermissionDenied { .. })
    }
}

impl fmt::Display for TripError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TripError::Io(e) => write!(f, "IO error: {}", e),
            TripError::Serial(e) => write!(f, "Serial error: {}", e),
            TripError::Json(e) => write!(f, "JSON error: {}", e),
            TripError::Sql(e) => write!(f, "Database error: {}", e),
            TripError::Connection(msg) => write!(f, "Connection error: {}", msg),
            TripError::Parse(msg) => write!(f, "Parse error: {}", msg),
            TripError::PermissionDenied { scope, state } => {
                write!(f, "{} location permission is {}", scope, state)
            }
            TripError::SourceUnavailable(msg) => write!(f, "No fix source available: {}", msg),
            TripError::Storage(msg) => write!(f, "Storage error: {}", msg),
            TripError::Serialization(msg) => write!(f, "Serialization error: {}", msg),
            TripError::EmptyTrip => write!(f, "Trip has no recorded fixes"),
            TripError::NoTrip => write!(f, "No trip in progress"),
            TripError::TripNotFound(id) => write!(f, "Trip {} not found", id),
            TripError::Export(msg) => write!(f, "Export failed: {}", msg),
            TripError::Other(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl std::error::Error for TripError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TripError::Io(e) => Some(e),
            TripError::Serial(e) => Some(e),
            TripError::Json(e) => Some(e),
            TripError::Sql(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for TripError {
    fn from(error: std::io::Error) -> Self {
        TripError::Io(error)
    }
}

impl From<tokio_serial::Error> for TripError {
    fn from(error: tokio_serial::Error) -> Self {
        TripError::Serial(error)
    }
}

impl From<serde_json::Error> for TripError {
    fn from(error: serde_json::Error) -> Self {
        TripError::Json(error)
    }
}

impl From<rusqlite::Error> for TripError {
    fn from(error: rusqlite::Error) -> Self {
        TripError::Sql(error)
    }
}

impl From<anyhow::Error> for TripError {
    fn from(error: anyhow::Error) -> Self {
        TripError::Other(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permission_error_display() {
        let err = TripError::PermissionDenied {
            scope: PermissionScope::Background,
            state: PermissionState::Blocked,
        };
        assert_eq!(err.to_string(), "Background location permission is blocked");
        assert!(err.is_user_actionable());
    }

    #[test]
    fn test_storage_error_not_actionable() {
        let err = TripError::Storage("disk full".to_string());
        assert!(!err.is_user_actionable());
        assert!(err.to_string().contains("disk full"));
    }
}
