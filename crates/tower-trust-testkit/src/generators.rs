//! Proptest generators for property-based testing.

use proptest::prelude::*;
use serde_json::{json, Value};

use tower_trust_core::Blake3Hash;

use crate::fixtures::ManifestBuilder;

/// Generate a random Blake3Hash.
pub fn blake3_hash() -> impl Strategy<Value = Blake3Hash> {
    any::<[u8; 32]>().prop_map(Blake3Hash)
}

/// Generate a non-empty set of hashes.
pub fn hash_set(max_len: usize) -> impl Strategy<Value = Vec<Blake3Hash>> {
    prop::collection::vec(blake3_hash(), 1..=max_len.max(1))
}

/// Generate a relative file path.
pub fn file_path() -> impl Strategy<Value = String> {
    "[a-z]{1,8}(/[a-z0-9_]{1,12}){0,3}\\.[a-z]{2,4}".prop_map(String::from)
}

/// Generate the files of a manifest.
pub fn file_entries(max_len: usize) -> impl Strategy<Value = Vec<(String, Blake3Hash)>> {
    prop::collection::vec((file_path(), blake3_hash()), 1..=max_len.max(1))
}

/// Generate a manifest builder with a correct root.
pub fn manifest(max_files: usize) -> impl Strategy<Value = ManifestBuilder> {
    file_entries(max_files).prop_map(|files| {
        files
            .into_iter()
            .fold(ManifestBuilder::new(), |b, (path, hash)| b.file_hash(&path, hash))
    })
}

/// Generate a hex nonce like the ones clients send.
pub fn nonce() -> impl Strategy<Value = String> {
    any::<[u8; 16]>().prop_map(hex::encode)
}

/// Generate a small JSON event payload.
pub fn payload() -> impl Strategy<Value = Value> {
    (
        "[a-z_]{1,12}",
        any::<i64>(),
        any::<bool>(),
        prop::option::of("[ -~]{0,24}"),
    )
        .prop_map(|(kind, n, flag, note)| {
            json!({
                "kind": kind,
                "n": n,
                "flag": flag,
                "note": note,
            })
        })
}

/// Generate a valid `YYYY-MM-DD` date.
pub fn calendar_date() -> impl Strategy<Value = String> {
    (2000u32..=2099, 1u32..=12, 1u32..=28)
        .prop_map(|(y, m, d)| format!("{:04}-{:02}-{:02}", y, m, d))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tower_trust_core::{canonical_hash, compute_root, DigestRequest};

    proptest! {
        #[test]
        fn test_root_ignores_file_order(mut hashes in hash_set(16)) {
            let forward = compute_root(&hashes).unwrap();
            hashes.reverse();
            prop_assert_eq!(forward, compute_root(&hashes).unwrap());
        }

        #[test]
        fn test_generated_manifests_validate(builder in manifest(8)) {
            let manifest = builder.build().validate().unwrap();
            prop_assert_eq!(manifest.echo_root().unwrap(), manifest.merkle_root);
        }

        #[test]
        fn test_wrong_root_never_echoes(builder in manifest(8), wrong in blake3_hash()) {
            prop_assume!(wrong != builder.correct_root());
            let manifest = builder.root(wrong).build().validate().unwrap();
            prop_assert_ne!(manifest.echo_root().unwrap(), manifest.merkle_root);
        }

        #[test]
        fn test_canonical_hash_deterministic(p in payload()) {
            let round_tripped: Value = serde_json::from_str(&p.to_string()).unwrap();
            prop_assert_eq!(canonical_hash(&p).unwrap(), canonical_hash(&round_tripped).unwrap());
        }

        #[test]
        fn test_generated_dates_accepted(date in calendar_date()) {
            let request: DigestRequest = serde_json::from_value(json!({
                "digest": {"date": date, "merkleRoot": "ab"}
            })).unwrap();
            prop_assert!(request.validate().is_ok());
        }
    }
}
