pub mod cache;
pub mod evaluator;
pub mod reconciler;
pub mod store;

pub use cache::{MokaUsageCache, UsageCache};
pub use evaluator::{EntitlementEvaluator, EvaluatorConfig};
pub use reconciler::Reconciler;
pub use store::{MemoryUsageStore, RedisUsageStore, UsageStore};

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::catalog::{Feature, Limit};
use crate::window::ResetPeriod;

/// Durable consumption counter for one (user, feature) pair within the
/// current window. Created lazily on first consumption; mutated only through
/// the store's conditional increment and window reset operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub user_id: String,
    pub feature: Feature,
    pub count: u32,
    pub window_start: DateTime<Utc>,
    /// Cadence in force when the record was last written. Kept alongside the
    /// count so records written under an older policy remain interpretable.
    pub reset_period: ResetPeriod,
}

/// Device-local snapshot of a [`UsageRecord`]. Never authoritative.
#[derive(Debug, Clone)]
pub struct CachedUsage {
    pub record: UsageRecord,
    pub fetched_at: Instant,
}

impl CachedUsage {
    pub fn new(record: UsageRecord) -> Self {
        Self {
            record,
            fetched_at: Instant::now(),
        }
    }

    /// Check if the cached snapshot is still fresh
    pub fn is_fresh(&self, ttl: std::time::Duration) -> bool {
        self.fetched_at.elapsed() < ttl
    }
}

/// Read-only access decision returned by `evaluate`. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntitlementDecision {
    pub allowed: bool,
    pub remaining: Limit,
    pub limit: Limit,
    pub reset_at: Option<DateTime<Utc>>,
    /// True when the decision was made from a possibly-stale cached counter
    /// because the durable store could not be reached.
    pub stale: bool,
}

impl EntitlementDecision {
    pub fn unlimited() -> Self {
        Self {
            allowed: true,
            remaining: Limit::Unlimited,
            limit: Limit::Unlimited,
            reset_at: None,
            stale: false,
        }
    }
}

/// Result of a `consume` attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConsumeDecision {
    pub accepted: bool,
    pub remaining: Limit,
    pub reset_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ConsumeDecision {
    pub fn accepted_unlimited() -> Self {
        Self {
            accepted: true,
            remaining: Limit::Unlimited,
            reset_at: None,
            reason: None,
        }
    }

    pub fn denied(remaining: Limit, reset_at: Option<DateTime<Utc>>, reason: &str) -> Self {
        Self {
            accepted: false,
            remaining,
            reset_at,
            reason: Some(reason.to_string()),
        }
    }
}

/// Metrics for entitlement evaluation
#[derive(Debug, Default)]
pub struct EntitlementMetrics {
    pub cache_hits: AtomicU64,
    pub cache_misses: AtomicU64,
    pub store_errors: AtomicU64,
    pub oracle_errors: AtomicU64,
    pub allowed: AtomicU64,
    pub denied: AtomicU64,
    pub window_resets: AtomicU64,
}

impl EntitlementMetrics {
    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_store_error(&self) {
        self.store_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_oracle_error(&self) {
        self.oracle_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_allowed(&self) {
        self.allowed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_denied(&self) {
        self.denied.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_window_reset(&self) {
        self.window_resets.fetch_add(1, Ordering::Relaxed);
    }
}
