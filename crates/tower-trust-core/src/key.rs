//! Signing keys and rotation policy.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::crypto::SecretKey;
use crate::error::ValidationError;
use crate::time::MILLIS_PER_DAY;

/// Algorithm label recorded with every key.
pub const KEY_ALGORITHM: &str = "BLAKE3-KEYED";

/// Default rotation horizon for new keys.
pub const DEFAULT_ROTATION_DAYS: i64 = 90;

/// Longest rotation horizon a key may be issued with.
pub const MAX_ROTATION_DAYS: i64 = 3_650;

/// Reject rotation horizons outside `0..=MAX_ROTATION_DAYS`.
pub fn check_rotation_days(days: i64) -> Result<i64, ValidationError> {
    if (0..=MAX_ROTATION_DAYS).contains(&days) {
        Ok(days)
    } else {
        Err(ValidationError::RotationDays(days))
    }
}

/// Lifecycle state of a signing key.
///
/// Keys only ever move `Active -> Rotated` or `* -> Revoked`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyStatus {
    Active,
    Rotated,
    Revoked,
}

impl KeyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyStatus::Active => "active",
            KeyStatus::Rotated => "rotated",
            KeyStatus::Revoked => "revoked",
        }
    }
}

impl fmt::Display for KeyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KeyStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(KeyStatus::Active),
            "rotated" => Ok(KeyStatus::Rotated),
            "revoked" => Ok(KeyStatus::Revoked),
            other => Err(format!("unknown key status: {}", other)),
        }
    }
}

/// Which party a key signs for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyScope {
    Factory,
    #[default]
    Tower,
    Federation,
}

impl KeyScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyScope::Factory => "factory",
            KeyScope::Tower => "tower",
            KeyScope::Federation => "federation",
        }
    }
}

impl FromStr for KeyScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "factory" => Ok(KeyScope::Factory),
            "tower" => Ok(KeyScope::Tower),
            "federation" => Ok(KeyScope::Federation),
            other => Err(format!("unknown key scope: {}", other)),
        }
    }
}

/// What a key is used for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyUsage {
    #[default]
    Signing,
    Verification,
}

impl KeyUsage {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyUsage::Signing => "signing",
            KeyUsage::Verification => "verification",
        }
    }
}

impl FromStr for KeyUsage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "signing" => Ok(KeyUsage::Signing),
            "verification" => Ok(KeyUsage::Verification),
            other => Err(format!("unknown key usage: {}", other)),
        }
    }
}

/// A keyed-hash signing key with its schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigningKey {
    pub kid: String,
    pub algorithm: String,
    pub material: SecretKey,
    pub created_at: i64,
    /// Fixed at creation. Rotation creates a new key instead.
    pub rotates_at: i64,
    pub rotated_at: Option<i64>,
    pub status: KeyStatus,
    pub scope: KeyScope,
    pub usage: KeyUsage,
}

impl SigningKey {
    /// Create a fresh active key with random material.
    pub fn generate(kid: impl Into<String>, rotation_days: i64, now: i64) -> Self {
        Self::from_material(kid, SecretKey::generate(), rotation_days, now)
    }

    /// Create an active key around existing material.
    ///
    /// The rotation horizon saturates instead of overflowing; callers taking
    /// `rotation_days` from outside should run [`check_rotation_days`] first.
    pub fn from_material(
        kid: impl Into<String>,
        material: SecretKey,
        rotation_days: i64,
        now: i64,
    ) -> Self {
        Self {
            kid: kid.into(),
            algorithm: KEY_ALGORITHM.to_string(),
            material,
            created_at: now,
            rotates_at: now.saturating_add(rotation_days.saturating_mul(MILLIS_PER_DAY)),
            rotated_at: None,
            status: KeyStatus::Active,
            scope: KeyScope::default(),
            usage: KeyUsage::default(),
        }
    }

    pub fn with_scope(mut self, scope: KeyScope) -> Self {
        self.scope = scope;
        self
    }

    pub fn with_usage(mut self, usage: KeyUsage) -> Self {
        self.usage = usage;
        self
    }

    /// Generate a collision-resistant key id.
    pub fn new_kid(now: i64) -> String {
        use rand::RngCore;
        let mut suffix = [0u8; 4];
        rand::thread_rng().fill_bytes(&mut suffix);
        format!("tower-key-{}-{}", now, hex::encode(suffix))
    }

    pub fn is_revoked(&self) -> bool {
        self.status == KeyStatus::Revoked
    }

    /// Evaluate this key's rotation schedule at `now`.
    pub fn rotation_status(&self, now: i64, policy: &RotationPolicy) -> RotationStatus {
        let due = now >= self.rotates_at;
        let days_until_rotation = self.rotates_at.saturating_sub(now).div_euclid(MILLIS_PER_DAY);
        let urgency = if due {
            Urgency::Overdue
        } else if days_until_rotation <= policy.critical_days {
            Urgency::Critical
        } else if days_until_rotation <= policy.warning_days {
            Urgency::Warning
        } else {
            Urgency::Ok
        };

        RotationStatus {
            kid: self.kid.clone(),
            due,
            days_until_rotation,
            urgency,
        }
    }

    /// Public view of this key, without material.
    pub fn metadata(&self) -> KeyMetadata {
        KeyMetadata {
            kid: self.kid.clone(),
            algorithm: self.algorithm.clone(),
            created_at: self.created_at,
            rotates_at: self.rotates_at,
            rotated_at: self.rotated_at,
            status: self.status,
            scope: self.scope,
            usage: self.usage,
        }
    }
}

/// Key metadata safe to expose on any surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyMetadata {
    pub kid: String,
    pub algorithm: String,
    pub created_at: i64,
    pub rotates_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rotated_at: Option<i64>,
    pub status: KeyStatus,
    #[serde(default)]
    pub scope: KeyScope,
    #[serde(default)]
    pub usage: KeyUsage,
}

/// Thresholds for rotation urgency, in whole days before `rotates_at`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RotationPolicy {
    pub warning_days: i64,
    pub critical_days: i64,
}

impl Default for RotationPolicy {
    fn default() -> Self {
        Self {
            warning_days: 7,
            critical_days: 2,
        }
    }
}

/// How pressing a rotation is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Urgency {
    Ok,
    Warning,
    Critical,
    Overdue,
}

impl Urgency {
    /// Whether this urgency should raise panic mode.
    pub fn is_alarming(&self) -> bool {
        matches!(self, Urgency::Critical | Urgency::Overdue)
    }
}

/// Rotation schedule evaluation for one key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RotationStatus {
    pub kid: String,
    pub due: bool,
    pub days_until_rotation: i64,
    pub urgency: Urgency,
}
