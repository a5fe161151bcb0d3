//! Persistence of the last run's parameters.
//!
//! One global "last run" slot: a versioned JSON snapshot written when a
//! transmit run starts and read back by `last_session`. Anything that
//! prevents loading (missing file, parse failure, version mismatch) means
//! the resume path falls back to the documented defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::dispatch::Target;

/// Well-known session snapshot file, relative to the working directory.
pub const SESSION_FILE: &str = "last_session.json";

/// Current snapshot schema version.
pub const SESSION_VERSION: u32 = 1;

/// Default lock file path used when no session exists.
pub const DEFAULT_LOCK_PATH: &str = "mycluster.lock";

/// Errors that can occur in the session store.
#[derive(Debug, Error)]
pub enum SessionError {
    /// No prior run has been persisted.
    #[error("no saved session")]
    NotFound,

    /// The snapshot file could not be read or written.
    #[error("session i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// The snapshot is not valid JSON for the current schema.
    #[error("session parse error: {0}")]
    Json(#[from] serde_json::Error),

    /// The snapshot was written by an incompatible schema version.
    #[error("unsupported session version {0}")]
    Version(u32),
}

/// Snapshot of the parameters that reproduce a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub version: u32,
    pub target: Target,
    pub lock_path: PathBuf,
}

impl Session {
    pub fn new(target: Target, lock_path: impl Into<PathBuf>) -> Self {
        Self {
            version: SESSION_VERSION,
            target,
            lock_path: lock_path.into(),
        }
    }

    /// Durably serialize this session to `path`.
    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<(), SessionError> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), json)?;
        tracing::debug!(path = %path.as_ref().display(), "Session saved");
        Ok(())
    }

    /// Load the session persisted at `path`.
    ///
    /// # Errors
    /// `NotFound` if the file does not exist, `Version` if the snapshot
    /// schema is not the current one.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, SessionError> {
        let content = match std::fs::read_to_string(path.as_ref()) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(SessionError::NotFound)
            }
            Err(e) => return Err(e.into()),
        };
        let session: Self = serde_json::from_str(&content)?;
        if session.version != SESSION_VERSION {
            return Err(SessionError::Version(session.version));
        }
        Ok(session)
    }
}

impl Default for Session {
    /// The parameters `last_session` assumes when no prior run exists.
    fn default() -> Self {
        Self::new(Target::Screen, DEFAULT_LOCK_PATH)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SESSION_FILE);

        let session = Session::new(Target::Mqtt, "/var/run/cluster-a.lock");
        session.save_to(&path).unwrap();

        let loaded = Session::load_from(&path).unwrap();
        assert_eq!(loaded, session);
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = Session::load_from(dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, SessionError::NotFound));
    }

    #[test]
    fn test_version_mismatch_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SESSION_FILE);
        std::fs::write(
            &path,
            r#"{"version": 99, "target": "screen", "lock_path": "x.lock"}"#,
        )
        .unwrap();

        let err = Session::load_from(&path).unwrap_err();
        assert!(matches!(err, SessionError::Version(99)));
    }

    #[test]
    fn test_garbage_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SESSION_FILE);
        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(
            Session::load_from(&path),
            Err(SessionError::Json(_))
        ));
    }

    #[test]
    fn test_defaults_match_transmit_defaults() {
        let session = Session::default();
        assert_eq!(session.target, Target::Screen);
        assert_eq!(session.lock_path, PathBuf::from("mycluster.lock"));
        assert_eq!(session.version, SESSION_VERSION);
    }
}
