//! Daily audit digests.
//!
//! An audit mirror submits one digest per day. The Tower checks its shape,
//! hashes its canonical form without `signature`, and signs the same bytes.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::crypto::{Blake3Hash, KeyedSignature};
use crate::error::ValidationError;

/// Wire body: `{ "digest": { ... } }`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DigestRequest {
    #[serde(default)]
    pub digest: Option<RawDigest>,
}

/// Untrusted digest as received.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawDigest {
    #[serde(default)]
    pub date: Option<Value>,
    #[serde(default)]
    pub merkle_root: Option<Value>,
    #[serde(default)]
    pub record_count: Option<Value>,
    #[serde(default)]
    pub signature: Option<Value>,
}

/// A well-formed daily digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyDigest {
    pub date: String,
    pub merkle_root: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl DigestRequest {
    pub fn validate(&self) -> Result<DailyDigest, ValidationError> {
        match &self.digest {
            Some(raw) => raw.validate(),
            None => Err(ValidationError::DigestMissingFields),
        }
    }
}

impl RawDigest {
    /// Check required fields, then the date, then the optional record count.
    pub fn validate(&self) -> Result<DailyDigest, ValidationError> {
        let date = non_empty(self.date.as_ref()).ok_or(ValidationError::DigestMissingFields)?;
        let merkle_root =
            non_empty(self.merkle_root.as_ref()).ok_or(ValidationError::DigestMissingFields)?;

        if !is_calendar_date(date) {
            return Err(ValidationError::DigestDateFormat);
        }

        let record_count = match &self.record_count {
            None | Some(Value::Null) => None,
            Some(value) => Some(value.as_u64().ok_or(ValidationError::DigestRecordCount)?),
        };

        Ok(DailyDigest {
            date: date.to_string(),
            merkle_root: merkle_root.to_string(),
            record_count,
            signature: non_empty(self.signature.as_ref()).map(str::to_string),
        })
    }
}

fn non_empty(value: Option<&Value>) -> Option<&str> {
    value.and_then(Value::as_str).filter(|s| !s.is_empty())
}

/// Exactly `YYYY-MM-DD` and a real calendar date.
fn is_calendar_date(s: &str) -> bool {
    let shape_ok = s.len() == 10
        && s.bytes().enumerate().all(|(i, b)| match i {
            4 | 7 => b == b'-',
            _ => b.is_ascii_digit(),
        });
    shape_ok && NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok()
}

/// Result of verifying a daily digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DigestVerification {
    pub verified: bool,
    pub digest_hash: Blake3Hash,
    pub tower_signature: KeyedSignature,
    pub tower_kid: String,
    pub verified_at: i64,
    pub digest: DigestSummary,
}

/// The digest fields echoed back to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DigestSummary {
    pub date: String,
    pub merkle_root: String,
    pub record_count: Option<u64>,
}

impl DailyDigest {
    pub fn summary(&self) -> DigestSummary {
        DigestSummary {
            date: self.date.clone(),
            merkle_root: self.merkle_root.clone(),
            record_count: self.record_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(v: Value) -> RawDigest {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn test_valid_digest() {
        let d = raw(json!({"date": "2025-10-23", "merkleRoot": "ab", "recordCount": 1234}))
            .validate()
            .unwrap();
        assert_eq!(d.record_count, Some(1234));
        assert_eq!(d.signature, None);
    }

    #[test]
    fn test_missing_fields() {
        let err = raw(json!({"date": "2025-10-23"})).validate().unwrap_err();
        assert_eq!(err, ValidationError::DigestMissingFields);
        let err = raw(json!({"merkleRoot": "ab"})).validate().unwrap_err();
        assert_eq!(err.reason(), "missing_fields");
    }

    #[test]
    fn test_bad_dates() {
        for date in ["2025-1-23", "23-10-2025", "2025-02-30", "2025/10/23", "2025-10-23T00:00"] {
            let err = raw(json!({"date": date, "merkleRoot": "ab"})).validate().unwrap_err();
            assert_eq!(err, ValidationError::DigestDateFormat, "date {}", date);
        }
    }

    #[test]
    fn test_record_count_must_be_non_negative_integer() {
        for count in [json!("1234"), json!(-1), json!(12.5), json!(true), json!({"n": 1})] {
            let err = raw(json!({"date": "2024-01-01", "merkleRoot": "abc", "recordCount": count}))
                .validate()
                .unwrap_err();
            assert_eq!(err, ValidationError::DigestRecordCount, "count {}", count);
            assert_eq!(err.code(), "invalid_digest");
        }

        let zero = raw(json!({"date": "2024-01-01", "merkleRoot": "abc", "recordCount": 0}))
            .validate()
            .unwrap();
        assert_eq!(zero.record_count, Some(0));

        let null = raw(json!({"date": "2024-01-01", "merkleRoot": "abc", "recordCount": null}))
            .validate()
            .unwrap();
        assert_eq!(null.record_count, None);
    }

    #[test]
    fn test_leap_day_accepted() {
        assert!(raw(json!({"date": "2024-02-29", "merkleRoot": "ab"})).validate().is_ok());
    }
}
