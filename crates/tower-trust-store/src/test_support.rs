//! Shared fixtures for backend tests.

use tower_trust_core::manifest::FileEntry;
use tower_trust_core::signing::co_sign;
use tower_trust_core::{
    Blake3Hash, EventPayload, GovernanceGate, LedgerEvent, LedgerEventStatus, Manifest, ReceiptId,
    SigningKey, TowerReceipt,
};

/// A `received` receipt with the given id and upload time.
pub fn receipt(id: &str, uploaded_at: i64) -> TowerReceipt {
    let files = vec![
        FileEntry {
            path: "bin/app".into(),
            content_hash: Blake3Hash::hash(b"app"),
        },
        FileEntry {
            path: "etc/app.toml".into(),
            content_hash: Blake3Hash::hash(b"config"),
        },
    ];
    let hashes: Vec<Blake3Hash> = files.iter().map(|f| f.content_hash).collect();
    let root = tower_trust_core::compute_root(&hashes).unwrap();
    let manifest = Manifest {
        version: "v1.0".into(),
        files,
        merkle_root: root,
        signature: "factory-sig".into(),
        kid: "factory-1".into(),
    };

    let key = SigningKey::generate("tower-test", 90, 0);
    let co = co_sign(&manifest.unsigned(), &manifest.signature, &key, uploaded_at).unwrap();

    TowerReceipt::received(
        ReceiptId::from(id.to_string()),
        &manifest,
        root,
        manifest.digest().unwrap(),
        co,
        uploaded_at,
    )
    .unwrap()
}

/// A committed ledger event with one passing gate.
pub fn committed_event(now: i64) -> LedgerEvent {
    let payload = EventPayload {
        action: "sync".into(),
        resource_type: "batch".into(),
        resource_id: "b1".into(),
        data: serde_json::json!({"n": 1}),
        metadata: Default::default(),
    };
    let mut event = LedgerEvent::new("federation.batch_sync", "svc", "acme", payload, "c1", now)
        .with_gate(GovernanceGate::passed("G19", "Ledger", now));
    event.status = LedgerEventStatus::Committed;
    event.committed_at = Some(now);
    event
}
