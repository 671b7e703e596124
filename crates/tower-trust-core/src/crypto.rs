//! Cryptographic primitives for Tower trust.
//!
//! Wraps Blake3 hashing and Blake3 keyed hashing with strong types.
//! Every value that crosses an external boundary is rendered as lowercase hex.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use subtle::ConstantTimeEq;

use crate::error::CoreError;

/// Context string for stretching operator-supplied secrets into key material.
pub const SECRET_DERIVE_CONTEXT: &str = "tower-trust 2024-01 signing secret";

/// A 32-byte Blake3 hash.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Blake3Hash(pub [u8; 32]);

impl Blake3Hash {
    /// Compute the Blake3 hash of the given data.
    pub fn hash(data: &[u8]) -> Self {
        Self(*blake3::hash(data).as_bytes())
    }

    /// Hash the concatenation `left || right`.
    pub fn combine(left: &Blake3Hash, right: &Blake3Hash) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&left.0);
        hasher.update(&right.0);
        Self(*hasher.finalize().as_bytes())
    }

    /// Create from raw bytes.
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes.
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Convert to hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from hex string (either case).
    pub fn from_hex(s: &str) -> Result<Self, CoreError> {
        decode_32(s).map(Self)
    }

    /// The zero hash (sentinel value).
    pub const ZERO: Self = Self([0u8; 32]);
}

impl fmt::Debug for Blake3Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Blake3({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for Blake3Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl AsRef<[u8]> for Blake3Hash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<[u8; 32]> for Blake3Hash {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl Serialize for Blake3Hash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Blake3Hash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Secret key material for keyed hashing.
///
/// Never printed, never serialized to an API surface. Stores persist the raw
/// bytes explicitly via [`SecretKey::expose`].
#[derive(Clone, PartialEq, Eq)]
pub struct SecretKey([u8; 32]);

impl SecretKey {
    /// Generate fresh random key material.
    pub fn generate() -> Self {
        use rand::RngCore;
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Create from raw bytes.
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Stretch an operator-supplied secret of any length into key material.
    pub fn derive_from_secret(secret: &str) -> Self {
        Self(blake3::derive_key(SECRET_DERIVE_CONTEXT, secret.as_bytes()))
    }

    /// Raw key bytes. Only storage adapters should need this.
    pub fn expose(&self) -> &[u8; 32] {
        &self.0
    }

    /// Keyed Blake3 over `message`.
    pub fn keyed_hash(&self, message: &[u8]) -> KeyedSignature {
        KeyedSignature(*blake3::keyed_hash(&self.0, message).as_bytes())
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretKey(<redacted>)")
    }
}

/// A 32-byte keyed-hash signature.
#[derive(Clone, Copy, Eq)]
pub struct KeyedSignature(pub [u8; 32]);

impl KeyedSignature {
    /// Create from raw bytes.
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes.
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Convert to hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from hex string.
    pub fn from_hex(s: &str) -> Result<Self, CoreError> {
        decode_32(s).map(Self)
    }

    /// Constant-time equality.
    pub fn ct_matches(&self, other: &KeyedSignature) -> bool {
        bool::from(self.0.ct_eq(&other.0))
    }
}

/// Equality on signatures is always constant-time.
impl PartialEq for KeyedSignature {
    fn eq(&self, other: &Self) -> bool {
        self.ct_matches(other)
    }
}

impl fmt::Debug for KeyedSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyedSig({}...)", &self.to_hex()[..16])
    }
}

impl fmt::Display for KeyedSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for KeyedSignature {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for KeyedSignature {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

fn decode_32(s: &str) -> Result<[u8; 32], CoreError> {
    let bytes = hex::decode(s).map_err(|e| CoreError::InvalidHex(e.to_string()))?;
    bytes
        .try_into()
        .map_err(|b: Vec<u8>| CoreError::InvalidHex(format!("expected 32 bytes, got {}", b.len())))
}
