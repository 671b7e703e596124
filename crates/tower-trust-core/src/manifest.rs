//! Factory manifests.
//!
//! A manifest lists the files of a build with their content hashes, the
//! Merkle root the factory claims for them, and the factory's signature and
//! key id. [`RawManifest`] is the untrusted wire shape; [`RawManifest::validate`]
//! turns it into a well-formed [`Manifest`] or a [`ValidationError`] carrying
//! the reason code.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::crypto::Blake3Hash;
use crate::error::{CoreError, ValidationError};
use crate::merkle;

/// Manifest version assumed when the factory omits one.
pub const DEFAULT_MANIFEST_VERSION: &str = "v1.0";

/// One file of a manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEntry {
    pub path: String,
    #[serde(alias = "sha256")]
    pub content_hash: Blake3Hash,
}

/// A validated, immutable manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub version: String,
    pub files: Vec<FileEntry>,
    pub merkle_root: Blake3Hash,
    pub signature: String,
    pub kid: String,
}

/// A manifest with the factory signature removed.
///
/// This is the form that is hashed into the manifest hash and co-signed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnsignedManifest {
    pub version: String,
    pub files: Vec<FileEntry>,
    pub merkle_root: Blake3Hash,
    pub kid: String,
}

impl Manifest {
    /// Content hashes of every file, in listed order.
    pub fn file_hashes(&self) -> Vec<Blake3Hash> {
        self.files.iter().map(|f| f.content_hash).collect()
    }

    /// Independently recompute the Merkle root over the file hashes.
    pub fn echo_root(&self) -> Result<Blake3Hash, CoreError> {
        merkle::compute_root(&self.file_hashes())
    }

    /// Manifest hash: Blake3 over canonical JSON without `signature`.
    pub fn digest(&self) -> Result<Blake3Hash, CoreError> {
        merkle::manifest_digest(self)
    }

    pub fn unsigned(&self) -> UnsignedManifest {
        UnsignedManifest {
            version: self.version.clone(),
            files: self.files.clone(),
            merkle_root: self.merkle_root,
            kid: self.kid.clone(),
        }
    }
}

/// Upload body: `{ "manifest": { ... } }`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UploadRequest {
    #[serde(default)]
    pub manifest: Option<RawManifest>,
}

/// Untrusted manifest exactly as received.
///
/// Every field is loosely typed so that a wrong type surfaces as a reason
/// code rather than a deserialization failure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawManifest {
    #[serde(default)]
    pub version: Option<Value>,
    #[serde(default)]
    pub files: Option<Value>,
    #[serde(default)]
    pub merkle_root: Option<Value>,
    #[serde(default)]
    pub signature: Option<Value>,
    #[serde(default)]
    pub kid: Option<Value>,
}

impl UploadRequest {
    /// Validate the wrapped manifest.
    pub fn validate(&self) -> Result<Manifest, ValidationError> {
        match &self.manifest {
            Some(raw) => raw.validate(),
            None => Err(ValidationError::MissingFiles),
        }
    }
}

impl RawManifest {
    /// Validate in order: files, root, signature and kid.
    pub fn validate(&self) -> Result<Manifest, ValidationError> {
        let files = parse_files(self.files.as_ref())?;

        let merkle_root = self
            .merkle_root
            .as_ref()
            .and_then(Value::as_str)
            .and_then(|s| Blake3Hash::from_hex(s).ok())
            .ok_or(ValidationError::MissingRoot)?;

        let signature =
            non_empty_str(self.signature.as_ref()).ok_or(ValidationError::MissingSignature)?;
        let kid = non_empty_str(self.kid.as_ref()).ok_or(ValidationError::MissingSignature)?;

        let version = non_empty_str(self.version.as_ref())
            .unwrap_or(DEFAULT_MANIFEST_VERSION)
            .to_string();

        Ok(Manifest {
            version,
            files,
            merkle_root,
            signature: signature.to_string(),
            kid: kid.to_string(),
        })
    }
}

fn non_empty_str(value: Option<&Value>) -> Option<&str> {
    value.and_then(Value::as_str).filter(|s| !s.is_empty())
}

fn parse_files(value: Option<&Value>) -> Result<Vec<FileEntry>, ValidationError> {
    let entries = value
        .and_then(Value::as_array)
        .filter(|a| !a.is_empty())
        .ok_or(ValidationError::MissingFiles)?;

    entries
        .iter()
        .map(|entry| {
            let path = non_empty_str(entry.get("path")).ok_or(ValidationError::MissingFiles)?;
            let hash = entry
                .get("contentHash")
                .or_else(|| entry.get("sha256"))
                .and_then(Value::as_str)
                .and_then(|s| Blake3Hash::from_hex(s).ok())
                .ok_or(ValidationError::MissingFiles)?;
            Ok(FileEntry {
                path: path.to_string(),
                content_hash: hash,
            })
        })
        .collect()
}
