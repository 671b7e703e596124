//! Strong type definitions for Tower trust.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ValidationError;

/// Receipt identifier: `rcpt_{unix_ms}_{16 hex}`.
///
/// Collision resistant but not content derived. Uploading the same manifest
/// twice yields two distinct receipts.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReceiptId(String);

impl ReceiptId {
    /// Generate a fresh id stamped with `now` (Unix ms).
    pub fn generate(now: i64) -> Self {
        use rand::RngCore;
        let mut suffix = [0u8; 8];
        rand::thread_rng().fill_bytes(&mut suffix);
        Self(format!("rcpt_{}_{}", now, hex::encode(suffix)))
    }

    /// Accept a caller-supplied id for lookup.
    ///
    /// Only emptiness is rejected; unknown ids are a lookup concern.
    pub fn parse(s: &str) -> Result<Self, ValidationError> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(ValidationError::MalformedReceiptId(s.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ReceiptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ReceiptId({})", self.0)
    }
}

impl fmt::Display for ReceiptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ReceiptId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for ReceiptId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Receipt lifecycle: `pending -> received -> {verified | rejected}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReceiptStatus {
    Pending,
    Received,
    Verified,
    Rejected,
}

impl ReceiptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReceiptStatus::Pending => "pending",
            ReceiptStatus::Received => "received",
            ReceiptStatus::Verified => "verified",
            ReceiptStatus::Rejected => "rejected",
        }
    }

    /// Whether `self -> to` is a legal transition.
    pub fn can_transition(&self, to: ReceiptStatus) -> bool {
        matches!(
            (self, to),
            (ReceiptStatus::Pending, ReceiptStatus::Received)
                | (ReceiptStatus::Received, ReceiptStatus::Verified)
                | (ReceiptStatus::Received, ReceiptStatus::Rejected)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ReceiptStatus::Verified | ReceiptStatus::Rejected)
    }
}

impl fmt::Display for ReceiptStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReceiptStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ReceiptStatus::Pending),
            "received" => Ok(ReceiptStatus::Received),
            "verified" => Ok(ReceiptStatus::Verified),
            "rejected" => Ok(ReceiptStatus::Rejected),
            other => Err(format!("unknown receipt status: {}", other)),
        }
    }
}
