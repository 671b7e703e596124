//! Error types for the Tower services.
//!
//! [`TowerError`] is the closed set of failures a caller can observe. Each
//! variant maps to a status code and a machine-readable error code. Storage
//! and other internal failures are logged where they are converted and reach
//! the caller only as an opaque `internal_error`.

use thiserror::Error;
use tower_trust_core::{ChainError, CoreError, EventVerifyError, IntegrityError, ValidationError};
use tower_trust_store::StoreError;

use crate::commit::CommitError;

/// Errors that can occur during Tower operations.
#[derive(Debug, Error)]
pub enum TowerError {
    /// Malformed input. The caller must fix it.
    #[error("{}({})", .0.code(), .0.reason())]
    Validation(#[from] ValidationError),

    /// Root or signature mismatch. Never auto-corrected.
    #[error("{0}")]
    Integrity(#[from] IntegrityError),

    /// Unknown receipt, key or event.
    #[error("{what} not found: {id}")]
    NotFound { what: &'static str, id: String },

    /// A nonce or event signature was already recorded and is unexpired.
    #[error("replay detected: {nonce}")]
    Replay { nonce: String },

    /// The stored state changed underneath the writer, or the requested
    /// transition is illegal from the current state.
    #[error("conflict: {0}")]
    Conflict(String),

    /// A signed event failed verification.
    #[error("event rejected: {0}")]
    Event(#[from] EventVerifyError),

    /// A chain of signed events failed verification.
    #[error("event chain rejected: {0}")]
    Chain(#[from] ChainError),

    /// A ledger commit aborted at one of its stages.
    #[error(transparent)]
    Commit(#[from] CommitError),

    /// Storage or other internal failure. The inner text stays server-side.
    #[error("internal error: {0}")]
    Internal(String),
}

impl TowerError {
    pub fn not_found(what: &'static str, id: impl Into<String>) -> Self {
        TowerError::NotFound {
            what,
            id: id.into(),
        }
    }

    /// HTTP-equivalent status code.
    pub fn status_code(&self) -> u16 {
        match self {
            TowerError::Validation(_) | TowerError::Integrity(_) => 400,
            TowerError::Event(_) | TowerError::Chain(_) => 401,
            TowerError::NotFound { .. } => 404,
            TowerError::Replay { .. } | TowerError::Conflict(_) => 409,
            TowerError::Commit(_) => 422,
            TowerError::Internal(_) => 500,
        }
    }

    /// Machine-readable error code.
    pub fn error_code(&self) -> &'static str {
        match self {
            TowerError::Validation(e) => e.code(),
            TowerError::Integrity(e) => e.code(),
            TowerError::NotFound { .. } => "not_found",
            TowerError::Replay { .. } => "replay",
            TowerError::Conflict(_) => "conflict",
            TowerError::Event(_) => "event_rejected",
            TowerError::Chain(_) => "chain_rejected",
            TowerError::Commit(_) => "commit_failed",
            TowerError::Internal(_) => "internal_error",
        }
    }

    /// Reason code within the error family, where one exists.
    pub fn reason(&self) -> Option<&'static str> {
        match self {
            TowerError::Validation(e) => Some(e.reason()),
            _ => None,
        }
    }

    /// Message safe to hand to a remote caller.
    pub fn public_message(&self) -> String {
        match self {
            TowerError::Internal(_) => "internal error".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<StoreError> for TowerError {
    fn from(e: StoreError) -> Self {
        tracing::error!(error = %e, "storage failure");
        TowerError::Internal(e.to_string())
    }
}

impl From<CoreError> for TowerError {
    fn from(e: CoreError) -> Self {
        match e {
            CoreError::ImmutableEvent(id) => {
                TowerError::Conflict(format!("ledger event {} is committed", id))
            }
            CoreError::KeyRevoked(kid) => TowerError::Conflict(format!("key {} is revoked", kid)),
            other => {
                tracing::error!(error = %other, "core computation failed");
                TowerError::Internal(other.to_string())
            }
        }
    }
}

/// Result type for Tower operations.
pub type Result<T> = std::result::Result<T, TowerError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commit::CommitStage;

    #[test]
    fn test_validation_codes() {
        let err = TowerError::from(ValidationError::MissingRoot);
        assert_eq!(err.status_code(), 400);
        assert_eq!(err.error_code(), "invalid_manifest");
        assert_eq!(err.reason(), Some("missing_root"));
        assert_eq!(err.public_message(), "invalid_manifest(missing_root)");
    }

    #[test]
    fn test_root_mismatch_maps_to_400() {
        let err = TowerError::from(IntegrityError::RootMismatch {
            expected: "a".into(),
            computed: "b".into(),
        });
        assert_eq!(err.status_code(), 400);
        assert_eq!(err.error_code(), "root_mismatch");
    }

    #[test]
    fn test_internal_is_opaque() {
        let err = TowerError::from(StoreError::InvalidData("/var/lib/tower/tower.db".into()));
        assert_eq!(err.status_code(), 500);
        assert_eq!(err.error_code(), "internal_error");
        assert!(!err.public_message().contains("/var/lib"));
    }

    #[test]
    fn test_status_table() {
        assert_eq!(TowerError::not_found("receipt", "x").status_code(), 404);
        assert_eq!(TowerError::Replay { nonce: "n".into() }.status_code(), 409);
        assert_eq!(TowerError::Conflict("c".into()).status_code(), 409);
        let commit = TowerError::from(CommitError::new(CommitStage::Seal, "no key"));
        assert_eq!(commit.status_code(), 422);
        assert_eq!(commit.error_code(), "commit_failed");
    }

    #[test]
    fn test_immutable_event_is_conflict() {
        let err = TowerError::from(CoreError::ImmutableEvent("evt_1".into()));
        assert_eq!(err.error_code(), "conflict");
    }
}
