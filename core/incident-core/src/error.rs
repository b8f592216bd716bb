//! Error types for incident-core operations.
//!
//! `SyncError` is what the engine surfaces to a UI. `ApiError` is the raw
//! transport-level failure; the engine normalizes it into the `SyncError`
//! kind that matches the operation (fetch, update, delete).

use std::path::PathBuf;

// ═══════════════════════════════════════════════════════════════════════════════
// Transport Error (API client level)
// ═══════════════════════════════════════════════════════════════════════════════

/// Failure of a single HTTP exchange with the incident API.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    #[error("Network error: {0}")]
    Transport(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Malformed response body: {0}")]
    Decode(String),
}

// ═══════════════════════════════════════════════════════════════════════════════
// Engine Error (surfaced to the UI layer)
// ═══════════════════════════════════════════════════════════════════════════════

/// Which part of the screen an error belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorRegion {
    /// Incident list (base query).
    List,
    /// Detail drawer (single incident, related incidents, single update).
    Drawer,
    /// Bulk action bar.
    BulkActions,
    /// Non-blocking connectivity banner.
    Connectivity,
    /// Recovered locally; logged only.
    Silent,
}

/// All errors that can occur in the sync engine.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    // ─────────────────────────────────────────────────────────────────────
    // Query Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Failed to fetch {target}: {source}")]
    FetchFailed {
        target: FetchTarget,
        #[source]
        source: ApiError,
    },

    // ─────────────────────────────────────────────────────────────────────
    // Mutation Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Failed to update incident {id}: {source}")]
    UpdateFailed {
        id: String,
        scope: MutationScope,
        #[source]
        source: ApiError,
    },

    #[error("Failed to delete incident {id}: {source}")]
    DeleteFailed {
        id: String,
        #[source]
        source: ApiError,
    },

    #[error("Incident {0} already has a mutation in flight")]
    MutationInFlight(String),

    // ─────────────────────────────────────────────────────────────────────
    // Stream Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Incident stream disconnected: {0}")]
    StreamDisconnected(String),

    #[error("Malformed stream event: {0}")]
    MalformedStreamEvent(String),

    // ─────────────────────────────────────────────────────────────────────
    // Persistence Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Persistence write failed: {path}: {details}")]
    PersistenceWriteFailed { path: PathBuf, details: String },

    #[error("Configuration file malformed: {path}: {details}")]
    ConfigMalformed { path: PathBuf, details: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FetchTarget {
    Incidents,
    Incident,
    Related,
}

impl std::fmt::Display for FetchTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            FetchTarget::Incidents => "incidents",
            FetchTarget::Incident => "incident",
            FetchTarget::Related => "related incidents",
        })
    }
}

/// Whether an update came from the drawer or the bulk bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MutationScope {
    Single,
    Bulk,
}

impl SyncError {
    pub fn region(&self) -> ErrorRegion {
        match self {
            SyncError::FetchFailed {
                target: FetchTarget::Incidents,
                ..
            } => ErrorRegion::List,
            SyncError::FetchFailed { .. } => ErrorRegion::Drawer,
            SyncError::UpdateFailed {
                scope: MutationScope::Single,
                ..
            } => ErrorRegion::Drawer,
            SyncError::UpdateFailed { .. }
            | SyncError::DeleteFailed { .. }
            | SyncError::MutationInFlight(_) => ErrorRegion::BulkActions,
            SyncError::StreamDisconnected(_) => ErrorRegion::Connectivity,
            SyncError::MalformedStreamEvent(_)
            | SyncError::PersistenceWriteFailed { .. }
            | SyncError::ConfigMalformed { .. } => ErrorRegion::Silent,
        }
    }

    /// Silent errors are logged and recovered where they happen.
    pub fn is_user_facing(&self) -> bool {
        self.region() != ErrorRegion::Silent
    }
}

/// Convenience type alias for Results using SyncError.
pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recovered_errors_are_not_user_facing() {
        assert!(!SyncError::MalformedStreamEvent("bad".into()).is_user_facing());
        assert!(!SyncError::PersistenceWriteFailed {
            path: PathBuf::from("/tmp/x"),
            details: "quota".into(),
        }
        .is_user_facing());
        assert!(SyncError::StreamDisconnected("eof".into()).is_user_facing());
    }

    #[test]
    fn errors_are_scoped_to_their_region() {
        let list = SyncError::FetchFailed {
            target: FetchTarget::Incidents,
            source: ApiError::Transport("timeout".into()),
        };
        assert_eq!(list.region(), ErrorRegion::List);

        let related = SyncError::FetchFailed {
            target: FetchTarget::Related,
            source: ApiError::NotFound("x".into()),
        };
        assert_eq!(related.region(), ErrorRegion::Drawer);

        let bulk = SyncError::UpdateFailed {
            id: "a".into(),
            scope: MutationScope::Bulk,
            source: ApiError::Status {
                status: 500,
                message: "boom".into(),
            },
        };
        assert_eq!(bulk.region(), ErrorRegion::BulkActions);
        assert_eq!(
            bulk.to_string(),
            "Failed to update incident a: HTTP 500: boom"
        );
    }
}
