//! Error taxonomy of the agent
//!
//! Collaborator errors stay local to one loop iteration; only
//! [`FatalError`] ever reaches the process boundary.

use thiserror::Error;

/// Link-layer association failures
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("association timed out after {0}s")]
    Timeout(u64),

    #[error("access point '{0}' not found")]
    NoApFound(String),

    #[error("authentication rejected by access point")]
    BadAuth,

    #[error("wireless driver error: {0}")]
    Driver(String),

    #[error("failed to run link tooling: {0}")]
    Io(#[from] std::io::Error),
}

/// Pub/sub session failures
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("link is not associated")]
    LinkDown,

    #[error("session is not open")]
    NotOpen,

    #[error("broker did not answer within {0}s")]
    Timeout(u64),

    #[error("broker refused the session: {0}")]
    Refused(String),

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("failed to encode snapshot: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("out of memory while building payload: {0}")]
    Exhausted(String),
}

/// Failures while assembling a metric snapshot
///
/// Individual sensor readings never fail (they fall back to sentinels),
/// so only whole-snapshot conditions are represented here.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("out of memory while building snapshot: {0}")]
    Exhausted(String),

    #[error("unexpected snapshot failure: {0}")]
    Unexpected(String),
}

/// Conditions that end the telemetry loop and call for a restart
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FatalError {
    #[error("setup failed: {0}")]
    Setup(String),

    #[error("resource exhaustion persisted after reclamation: {0}")]
    ResourceExhausted(String),

    #[error("unrecoverable error escaped the telemetry loop: {0}")]
    Escaped(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_messages_name_the_tier() {
        let setup = FatalError::Setup("link: access point 'lab' not found".into());
        assert!(setup.to_string().starts_with("setup failed"));

        let escaped = FatalError::Escaped("boom".into());
        assert!(escaped.to_string().contains("escaped"));
    }

    #[test]
    fn test_encode_error_converts() {
        let bad = serde_json::from_str::<u32>("nope").unwrap_err();
        let err: SessionError = bad.into();
        assert!(matches!(err, SessionError::Encode(_)));
    }
}
