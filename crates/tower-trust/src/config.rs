//! Tower configuration.

use std::time::Duration;

use tower_trust_core::event::VerifyOptions;
use tower_trust_core::key::DEFAULT_ROTATION_DAYS;
use tower_trust_core::RotationPolicy;

/// Configuration for a Tower instance.
#[derive(Debug, Clone)]
pub struct TowerConfig {
    /// Node id stamped on events signed by this Tower.
    pub node_id: String,
    /// Tenant whose ledger this Tower commits to.
    pub tenant_id: String,
    /// Kid of the degraded-mode key derived from `fallback_secret`.
    pub fallback_key_id: String,
    /// Secret for degraded-mode signing when the registry is empty.
    pub fallback_secret: Option<String>,
    /// Horizon for newly generated keys.
    pub rotation_days: i64,
    pub rotation_policy: RotationPolicy,
    /// Default lifetime of a recorded nonce.
    pub nonce_ttl: Duration,
    /// Minimum spacing between opportunistic nonce prunes.
    pub prune_interval: Duration,
    pub event_max_age: Duration,
    pub event_future_skew: Duration,
    /// When set, only events from these nodes are accepted.
    pub allowed_nodes: Option<Vec<String>>,
    /// Number of recent receipts the health snapshot looks at.
    pub health_window: usize,
    /// Error rate above which panic mode engages.
    pub panic_error_rate: f64,
    pub maintenance_interval: Duration,
    /// Rotate automatically when the maintenance tick finds the key due.
    pub auto_rotate: bool,
}

impl Default for TowerConfig {
    fn default() -> Self {
        Self {
            node_id: "tower-local".to_string(),
            tenant_id: "tower".to_string(),
            fallback_key_id: "tower-key-001".to_string(),
            fallback_secret: None,
            rotation_days: DEFAULT_ROTATION_DAYS,
            rotation_policy: RotationPolicy::default(),
            nonce_ttl: Duration::from_secs(300),
            prune_interval: Duration::from_secs(60),
            event_max_age: Duration::from_secs(300),
            event_future_skew: Duration::from_secs(60),
            allowed_nodes: None,
            health_window: 100,
            panic_error_rate: 0.10,
            maintenance_interval: Duration::from_secs(60),
            auto_rotate: false,
        }
    }
}

impl TowerConfig {
    /// Defaults overridden by `TOWER_NODE_ID`, `TOWER_TENANT_ID`,
    /// `TOWER_KEY_ID` and `TOWER_SIGNING_SECRET`.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        let set = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(v) = set("TOWER_NODE_ID") {
            config.node_id = v;
        }
        if let Some(v) = set("TOWER_TENANT_ID") {
            config.tenant_id = v;
        }
        if let Some(v) = set("TOWER_KEY_ID") {
            config.fallback_key_id = v;
        }
        config.fallback_secret = set("TOWER_SIGNING_SECRET");
        config
    }

    pub fn with_node_id(mut self, node_id: impl Into<String>) -> Self {
        self.node_id = node_id.into();
        self
    }

    pub fn with_tenant_id(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = tenant_id.into();
        self
    }

    pub fn with_fallback_secret(mut self, secret: impl Into<String>) -> Self {
        self.fallback_secret = Some(secret.into());
        self
    }

    pub fn with_rotation_days(mut self, days: i64) -> Self {
        self.rotation_days = days;
        self
    }

    pub fn with_rotation_policy(mut self, policy: RotationPolicy) -> Self {
        self.rotation_policy = policy;
        self
    }

    pub fn with_nonce_ttl(mut self, ttl: Duration) -> Self {
        self.nonce_ttl = ttl;
        self
    }

    pub fn with_prune_interval(mut self, interval: Duration) -> Self {
        self.prune_interval = interval;
        self
    }

    pub fn with_event_max_age(mut self, max_age: Duration) -> Self {
        self.event_max_age = max_age;
        self
    }

    pub fn with_allowed_nodes(mut self, nodes: Vec<String>) -> Self {
        self.allowed_nodes = Some(nodes);
        self
    }

    pub fn with_health_window(mut self, window: usize) -> Self {
        self.health_window = window;
        self
    }

    pub fn with_panic_error_rate(mut self, rate: f64) -> Self {
        self.panic_error_rate = rate;
        self
    }

    pub fn with_maintenance_interval(mut self, interval: Duration) -> Self {
        self.maintenance_interval = interval;
        self
    }

    pub fn with_auto_rotate(mut self, auto_rotate: bool) -> Self {
        self.auto_rotate = auto_rotate;
        self
    }

    /// Event verification options derived from this config.
    pub fn verify_options(&self) -> VerifyOptions {
        VerifyOptions {
            max_age_ms: duration_ms(self.event_max_age),
            future_skew_ms: duration_ms(self.event_future_skew),
            allowed_nodes: self.allowed_nodes.clone(),
        }
    }
}

/// Milliseconds in `d`, saturating.
pub(crate) fn duration_ms(d: Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}
