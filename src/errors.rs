//! Typed error hierarchy for the progress engine.
//!
//! Five top-level enums cover the subsystems:
//! - `ChannelError`: push channel transport failures
//! - `SnapshotError`: persisted snapshot retrieval failures
//! - `ConfigError`: configuration loading and validation
//! - `RecordingError`: reading a recorded event log for offline replay
//! - `SessionError`: refused session transitions (carried as state, never raised)

use thiserror::Error;

/// Errors from the push channel transport.
///
/// These never escape the bridge as a failed stream item: the bridge closes
/// and records the message in its `ChannelState`.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("Failed to connect to {url}: {source}")]
    Connect {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Channel endpoint {url} returned status {status}")]
    Status { url: String, status: u16 },

    #[error("Channel body error: {0}")]
    Body(String),

    #[error("Channel cancelled")]
    Cancelled,
}

/// Errors from fetching or decoding a persisted snapshot.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("Snapshot request failed: {0}")]
    Request(#[source] reqwest::Error),

    #[error("Snapshot endpoint returned status {status}")]
    Status { status: u16 },

    #[error("Failed to decode snapshot: {0}")]
    Decode(#[source] serde_json::Error),
}

/// Errors from configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {source}")]
    Read {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file at {path}: {source}")]
    Parse {
        path: std::path::PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Failed to write config file at {path}: {source}")]
    Write {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Errors from reading a recorded event log.
#[derive(Debug, Error)]
pub enum RecordingError {
    #[error("Failed to read recording at {path}: {source}")]
    Read {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid event on line {line}: {source}")]
    Line {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}

/// Reasons a session transition was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("A persisted snapshot is loaded for {key}; start a rerun before connecting")]
    SnapshotLoaded { key: String },

    #[error("A live channel is attached to {key}")]
    LiveChannelActive { key: String },

    #[error("A rerun is in flight for {key}")]
    RerunInFlight { key: String },

    #[error("No session exists for {key}")]
    UnknownSession { key: String },

    #[error("No snapshot stored for {key}")]
    SnapshotMissing { key: String },

    #[error("Snapshot fetch failed for {key}: {message}")]
    SnapshotUnavailable { key: String, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_error_status_carries_code() {
        let err = ChannelError::Status {
            url: "http://localhost/stream".to_string(),
            status: 502,
        };
        match &err {
            ChannelError::Status { status, .. } => assert_eq!(*status, 502),
            _ => panic!("Expected Status variant"),
        }
        assert!(err.to_string().contains("502"));
    }

    #[test]
    fn config_error_read_carries_path() {
        use std::path::PathBuf;
        let path = PathBuf::from("/project/.agentmd/progress.toml");
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "access denied");
        let err = ConfigError::Read {
            path: path.clone(),
            source: io_err,
        };
        match &err {
            ConfigError::Read { path: p, source: s } => {
                assert_eq!(p, &path);
                assert_eq!(s.kind(), std::io::ErrorKind::PermissionDenied);
            }
            _ => panic!("Expected Read"),
        }
    }

    #[test]
    fn session_error_names_the_scope() {
        let err = SessionError::SnapshotLoaded {
            key: "acme/widgets".to_string(),
        };
        assert!(err.to_string().contains("acme/widgets"));
        assert_ne!(
            err,
            SessionError::LiveChannelActive {
                key: "acme/widgets".to_string()
            }
        );
    }

    #[test]
    fn all_error_types_implement_std_error_trait() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&ChannelError::Cancelled);
        assert_std_error(&SnapshotError::Status { status: 404 });
        assert_std_error(&ConfigError::Invalid("x".into()));
        assert_std_error(&SessionError::UnknownSession { key: "a/b".into() });
    }
}
