//! Deterministic Merkle roots over content hashes.
//!
//! Leaves are sorted by raw bytes before the tree is built, so the root does
//! not depend on the order in which a caller lists its files. Adjacent nodes
//! are combined as `blake3(left || right)` over the raw 32-byte digests, not
//! over their hex text. When a level has an odd count the trailing node is
//! promoted unchanged to the next level.
//!
//! Roots sealed with a different pair encoding (for example SHA-256 over
//! concatenated hex strings) never match here and are reported as a root
//! mismatch.

use serde::{Deserialize, Serialize};

use crate::canonical::canonical_json_without;
use crate::crypto::Blake3Hash;
use crate::error::CoreError;

/// Label of the pair encoding used by [`compute_root`] and [`verify_proof`].
pub const MERKLE_ALGORITHM: &str = "BLAKE3-RAW-PAIR";

/// Which side of the running hash a sibling sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Left,
    Right,
}

/// One step of an inclusion proof.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofStep {
    pub hash: Blake3Hash,
    pub side: Side,
}

/// Compute the Merkle root of a non-empty set of hashes.
pub fn compute_root(hashes: &[Blake3Hash]) -> Result<Blake3Hash, CoreError> {
    if hashes.is_empty() {
        return Err(CoreError::EmptyMerkleInput);
    }

    let mut level = hashes.to_vec();
    level.sort();

    while level.len() > 1 {
        level = next_level(&level);
    }

    Ok(level[0])
}

fn next_level(level: &[Blake3Hash]) -> Vec<Blake3Hash> {
    level
        .chunks(2)
        .map(|pair| match pair {
            [left, right] => Blake3Hash::combine(left, right),
            [odd] => *odd,
            _ => unreachable!("chunks(2) yields one or two elements"),
        })
        .collect()
}

/// Fold `leaf` up `path` and compare against `expected_root`.
pub fn verify_proof(leaf: &Blake3Hash, path: &[ProofStep], expected_root: &Blake3Hash) -> bool {
    let computed = path.iter().fold(*leaf, |current, step| match step.side {
        Side::Left => Blake3Hash::combine(&step.hash, &current),
        Side::Right => Blake3Hash::combine(&current, &step.hash),
    });
    computed == *expected_root
}

/// Build the inclusion proof for `leaf` within `hashes`.
///
/// Returns `None` if the leaf is not in the set. Levels where the leaf's
/// ancestor is promoted contribute no step.
pub fn build_proof(hashes: &[Blake3Hash], leaf: &Blake3Hash) -> Option<Vec<ProofStep>> {
    let mut level = hashes.to_vec();
    level.sort();
    let mut index = level.iter().position(|h| h == leaf)?;
    let mut path = Vec::new();

    while level.len() > 1 {
        if index % 2 == 1 {
            path.push(ProofStep {
                hash: level[index - 1],
                side: Side::Left,
            });
        } else if index + 1 < level.len() {
            path.push(ProofStep {
                hash: level[index + 1],
                side: Side::Right,
            });
        }
        level = next_level(&level);
        index /= 2;
    }

    Some(path)
}

/// Content identity of a manifest: Blake3 over its canonical JSON with the
/// `signature` field excluded.
pub fn manifest_digest<T: Serialize + ?Sized>(manifest: &T) -> Result<Blake3Hash, CoreError> {
    let canonical = canonical_json_without(manifest, "signature")?;
    Ok(Blake3Hash::hash(canonical.as_bytes()))
}
