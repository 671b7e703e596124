//! Keyed-hash signing over canonical JSON.
//!
//! A signature is `blake3::keyed_hash(key, canonical_json(payload))`, rendered
//! as hex. Verification always compares in constant time.

use serde::{Deserialize, Serialize};

use crate::canonical::canonical_json;
use crate::crypto::KeyedSignature;
use crate::error::CoreError;
use crate::key::SigningKey;

/// Sign the canonical form of `payload`.
pub fn sign<T: Serialize + ?Sized>(
    payload: &T,
    key: &SigningKey,
) -> Result<KeyedSignature, CoreError> {
    if key.is_revoked() {
        return Err(CoreError::KeyRevoked(key.kid.clone()));
    }
    let canonical = canonical_json(payload)?;
    Ok(key.material.keyed_hash(canonical.as_bytes()))
}

/// Verify a hex signature over `payload`.
///
/// Returns `false` for revoked keys, malformed signatures and mismatches.
pub fn verify<T: Serialize + ?Sized>(payload: &T, signature: &str, key: &SigningKey) -> bool {
    if key.is_revoked() {
        return false;
    }
    let Ok(presented) = KeyedSignature::from_hex(signature) else {
        return false;
    };
    match sign(payload, key) {
        Ok(expected) => expected.ct_matches(&presented),
        Err(_) => false,
    }
}

/// The Tower's signature placed alongside an external party's.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoSignature {
    pub external_signature: String,
    pub tower_signature: KeyedSignature,
    pub tower_kid: String,
    pub signed_at: i64,
}

/// Add the Tower's signature next to `external_signature`.
///
/// The external signature is carried through untouched and never checked.
pub fn co_sign<T: Serialize + ?Sized>(
    payload: &T,
    external_signature: &str,
    tower_key: &SigningKey,
    now: i64,
) -> Result<CoSignature, CoreError> {
    Ok(CoSignature {
        external_signature: external_signature.to_string(),
        tower_signature: sign(payload, tower_key)?,
        tower_kid: tower_key.kid.clone(),
        signed_at: now,
    })
}
