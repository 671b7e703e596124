//! Test fixtures and helpers.
//!
//! Common setup code for integration tests. Every fixture runs on a
//! [`ManualClock`] pinned at [`FIXED_NOW`] so expiry and rotation windows can
//! be stepped deterministically.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use tower_trust::{LedgerExecutor, NoopExecutor, Tower, TowerConfig};
use tower_trust_core::{
    compute_root, Blake3Hash, DigestRequest, EventPayload, GovernanceGate, LedgerEvent,
    ManualClock, UploadRequest,
};
use tower_trust_store::{MemoryStore, SqliteStore, TowerStore};

/// 2023-11-14T22:13:20Z.
pub const FIXED_NOW: i64 = 1_700_000_000_000;

/// A Tower with a manual clock.
pub struct TowerFixture<S> {
    pub tower: Tower<S>,
    pub clock: Arc<ManualClock>,
}

impl TowerFixture<MemoryStore> {
    /// In-memory Tower with a fresh 90-day signing key.
    pub async fn new() -> Self {
        Self::with_config(TowerConfig::default()).await
    }

    /// In-memory Tower with a fresh 90-day signing key.
    pub async fn with_config(config: TowerConfig) -> Self {
        let fixture = Self::without_key(MemoryStore::new(), config, Arc::new(NoopExecutor));
        fixture.install_key(90).await;
        fixture
    }

    /// In-memory Tower whose ledger commits run through `executor`.
    pub async fn with_executor(executor: Arc<dyn LedgerExecutor>) -> Self {
        let fixture = Self::without_key(MemoryStore::new(), TowerConfig::default(), executor);
        fixture.install_key(90).await;
        fixture
    }
}

impl TowerFixture<SqliteStore> {
    /// Tower over a SQLite file. Installs no key, so reopening an existing
    /// file sees exactly what was persisted.
    pub fn sqlite(path: impl AsRef<Path>, clock: Arc<ManualClock>) -> Self {
        let store = SqliteStore::open(path).unwrap();
        let tower = Tower::with_clock(store, TowerConfig::default(), clock.clone());
        Self { tower, clock }
    }
}

impl<S: TowerStore + 'static> TowerFixture<S> {
    /// A Tower over `store` with no signing key installed.
    pub fn without_key(store: S, config: TowerConfig, executor: Arc<dyn LedgerExecutor>) -> Self {
        let clock = Arc::new(ManualClock::new(FIXED_NOW));
        let tower = Tower::with_executor(store, config, clock.clone(), executor);
        Self { tower, clock }
    }

    /// Generate and activate a key valid for `rotation_days`.
    pub async fn install_key(&self, rotation_days: i64) -> String {
        self.tower.keys().generate_key(rotation_days).await.unwrap().kid
    }
}

/// Builds upload bodies from file contents.
#[derive(Debug, Clone)]
pub struct ManifestBuilder {
    version: Option<String>,
    files: Vec<(String, Blake3Hash)>,
    root: Option<Blake3Hash>,
    signature: String,
    kid: String,
}

impl ManifestBuilder {
    pub fn new() -> Self {
        Self {
            version: Some("v1.0".to_string()),
            files: Vec::new(),
            root: None,
            signature: "factory-signature".to_string(),
            kid: "factory-key-1".to_string(),
        }
    }

    /// Add a file whose content hash is Blake3 of `contents`.
    pub fn file(self, path: &str, contents: &[u8]) -> Self {
        self.file_hash(path, Blake3Hash::hash(contents))
    }

    pub fn file_hash(mut self, path: &str, hash: Blake3Hash) -> Self {
        self.files.push((path.to_string(), hash));
        self
    }

    /// Claim `root` instead of the correct Merkle root.
    pub fn root(mut self, root: Blake3Hash) -> Self {
        self.root = Some(root);
        self
    }

    pub fn kid(mut self, kid: &str) -> Self {
        self.kid = kid.to_string();
        self
    }

    pub fn signature(mut self, signature: &str) -> Self {
        self.signature = signature.to_string();
        self
    }

    /// Omit `version` so the default is applied.
    pub fn without_version(mut self) -> Self {
        self.version = None;
        self
    }

    /// The correct Merkle root over the files added so far.
    pub fn correct_root(&self) -> Blake3Hash {
        let hashes: Vec<Blake3Hash> = self.files.iter().map(|(_, h)| *h).collect();
        compute_root(&hashes).unwrap()
    }

    /// The manifest as wire JSON.
    pub fn to_json(&self) -> Value {
        let root = self.root.unwrap_or_else(|| self.correct_root());
        let files: Vec<Value> = self
            .files
            .iter()
            .map(|(path, hash)| json!({"path": path, "contentHash": hash.to_hex()}))
            .collect();

        let mut manifest = json!({
            "files": files,
            "merkleRoot": root.to_hex(),
            "signature": self.signature,
            "kid": self.kid,
        });
        if let Some(version) = &self.version {
            manifest["version"] = Value::String(version.clone());
        }
        json!({ "manifest": manifest })
    }

    pub fn build(&self) -> UploadRequest {
        serde_json::from_value(self.to_json()).unwrap()
    }
}

impl Default for ManifestBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// The two-file manifest most tests upload.
pub fn sample_manifest() -> ManifestBuilder {
    ManifestBuilder::new()
        .file("bin/tower-agent", b"agent binary")
        .file("etc/agent.toml", b"[agent]\nmode = \"edge\"\n")
}

/// A daily digest body.
pub fn digest_request(date: &str, merkle_root: &str) -> DigestRequest {
    serde_json::from_value(json!({
        "digest": {
            "date": date,
            "merkleRoot": merkle_root,
            "recordCount": 42,
            "signature": "mirror-signature",
        }
    }))
    .unwrap()
}

/// A pending ledger event for `tenant_id` with one passing gate.
pub fn ledger_event(tenant_id: &str, now: i64) -> LedgerEvent {
    let payload = EventPayload {
        action: "sync".to_string(),
        resource_type: "batch".to_string(),
        resource_id: "batch-001".to_string(),
        data: json!({"records": 12}),
        metadata: Map::new(),
    };
    LedgerEvent::new(
        "federation.batch_sync",
        "svc-federation",
        tenant_id,
        payload,
        "corr-001",
        now,
    )
    .with_gate(GovernanceGate::passed("G19", "Ledger integrity", now))
}

/// Executor that always returns the same result.
pub struct StaticExecutor(pub Value);

#[async_trait]
impl LedgerExecutor for StaticExecutor {
    async fn execute(&self, _event: &LedgerEvent) -> Result<Value, String> {
        Ok(self.0.clone())
    }
}

/// Executor that always fails with the same reason.
pub struct FailingExecutor(pub String);

#[async_trait]
impl LedgerExecutor for FailingExecutor {
    async fn execute(&self, _event: &LedgerEvent) -> Result<Value, String> {
        Err(self.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tower_trust_core::ValidationError;

    #[test]
    fn test_builder_produces_valid_manifest() {
        let builder = sample_manifest();
        let manifest = builder.build().validate().unwrap();
        assert_eq!(manifest.files.len(), 2);
        assert_eq!(manifest.merkle_root, builder.correct_root());
        assert_eq!(manifest.echo_root().unwrap(), manifest.merkle_root);
    }

    #[test]
    fn test_builder_without_files() {
        let err = ManifestBuilder::new()
            .root(Blake3Hash::hash(b"x"))
            .build()
            .validate()
            .unwrap_err();
        assert_eq!(err, ValidationError::MissingFiles);
    }

    #[test]
    fn test_default_version_applied() {
        let manifest = sample_manifest().without_version().build().validate().unwrap();
        assert_eq!(manifest.version, "v1.0");
    }

    #[tokio::test]
    async fn test_fixture_has_active_key() {
        let fixture = TowerFixture::new().await;
        let key = fixture.tower.keys().get_active_key().await.unwrap();
        assert_eq!(key.created_at, FIXED_NOW);
    }

    #[tokio::test]
    async fn test_executors() {
        let event = ledger_event("tower", FIXED_NOW);
        let ok = StaticExecutor(json!({"ok": true}));
        assert_eq!(ok.execute(&event).await.unwrap(), json!({"ok": true}));
        let bad = FailingExecutor("downstream unavailable".into());
        assert_eq!(
            bad.execute(&event).await.unwrap_err(),
            "downstream unavailable"
        );
    }
}
