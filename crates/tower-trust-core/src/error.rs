//! Error types for Tower trust core.

use thiserror::Error;

/// Core errors raised by pure computations.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("cannot compute Merkle root from an empty hash set")]
    EmptyMerkleInput,

    #[error("invalid hex: {0}")]
    InvalidHex(String),

    #[error("canonicalization failed: {0}")]
    Canonicalization(String),

    #[error("signing key {0} is revoked")]
    KeyRevoked(String),

    #[error("ledger event {0} is committed and cannot be modified")]
    ImmutableEvent(String),
}

/// Malformed client input. Always surfaced as a 4xx-equivalent.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("invalid manifest: missing or malformed files")]
    MissingFiles,

    #[error("invalid manifest: missing or malformed merkle root")]
    MissingRoot,

    #[error("invalid manifest: missing signature or kid")]
    MissingSignature,

    #[error("invalid digest: missing required fields")]
    DigestMissingFields,

    #[error("invalid digest: date must be in YYYY-MM-DD format")]
    DigestDateFormat,

    #[error("invalid digest: recordCount must be a non-negative integer")]
    DigestRecordCount,

    #[error("invalid receipt id: {0}")]
    MalformedReceiptId(String),

    #[error("rotation days out of range: {0}")]
    RotationDays(i64),
}

impl ValidationError {
    /// Machine-readable error family.
    pub fn code(&self) -> &'static str {
        match self {
            ValidationError::MissingFiles
            | ValidationError::MissingRoot
            | ValidationError::MissingSignature => "invalid_manifest",
            ValidationError::DigestMissingFields
            | ValidationError::DigestDateFormat
            | ValidationError::DigestRecordCount => "invalid_digest",
            ValidationError::MalformedReceiptId(_) => "invalid_receipt_id",
            ValidationError::RotationDays(_) => "invalid_key_policy",
        }
    }

    /// Machine-readable reason within the family.
    pub fn reason(&self) -> &'static str {
        match self {
            ValidationError::MissingFiles => "missing_files",
            ValidationError::MissingRoot => "missing_root",
            ValidationError::MissingSignature => "missing_signature",
            ValidationError::DigestMissingFields => "missing_fields",
            ValidationError::DigestDateFormat => "date_format",
            ValidationError::DigestRecordCount => "record_count",
            ValidationError::MalformedReceiptId(_) => "malformed",
            ValidationError::RotationDays(_) => "rotation_days",
        }
    }
}

/// Integrity failures. Never silently accepted or auto-corrected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IntegrityError {
    #[error("merkle root mismatch: expected {expected}, computed {computed}")]
    RootMismatch { expected: String, computed: String },

    #[error("signature mismatch")]
    SignatureMismatch,

    #[error("seal mismatch on ledger event {event_id}: {detail}")]
    SealMismatch { event_id: String, detail: String },
}

impl IntegrityError {
    /// Machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            IntegrityError::RootMismatch { .. } => "root_mismatch",
            IntegrityError::SignatureMismatch => "signature_mismatch",
            IntegrityError::SealMismatch { .. } => "seal_mismatch",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manifest_reason_codes() {
        assert_eq!(ValidationError::MissingFiles.code(), "invalid_manifest");
        assert_eq!(ValidationError::MissingFiles.reason(), "missing_files");
        assert_eq!(ValidationError::MissingRoot.reason(), "missing_root");
        assert_eq!(ValidationError::MissingSignature.reason(), "missing_signature");
    }

    #[test]
    fn test_digest_reason_codes() {
        assert_eq!(ValidationError::DigestDateFormat.code(), "invalid_digest");
        assert_eq!(ValidationError::DigestDateFormat.reason(), "date_format");
        assert_eq!(ValidationError::DigestRecordCount.reason(), "record_count");
    }

    #[test]
    fn test_root_mismatch_display_carries_both_roots() {
        let err = IntegrityError::RootMismatch {
            expected: "aa".into(),
            computed: "bb".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("aa") && msg.contains("bb"));
        assert_eq!(err.code(), "root_mismatch");
    }
}
