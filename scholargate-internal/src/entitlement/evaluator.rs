//! The entitlement evaluator: decides whether a user may invoke a gated
//! feature right now, and meters consumption against the durable quota.
//!
//! `evaluate` is read-only and tolerates briefly-stale counters (it exists to
//! render indicators, not to gate). `consume` always round-trips to the
//! durable store and relies on its atomic conditional increment, so two
//! devices racing on the last quota unit can never both win.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::catalog::{Feature, FeatureCatalog, Limit};
use crate::entitlement::{
    ConsumeDecision, EntitlementDecision, EntitlementMetrics, Reconciler, UsageCache, UsageRecord,
    UsageStore,
};
use crate::error::Error;
use crate::subscription::{SubscriptionOracle, Tier};
use crate::window;

/// Configuration for the entitlement evaluator
#[derive(Debug, Clone)]
pub struct EvaluatorConfig {
    /// How long a cached usage snapshot may serve read-only checks
    pub cache_ttl: Duration,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(30),
        }
    }
}

/// What we know about current usage when deciding.
enum UsageView {
    Known {
        count: u32,
        window_start: Option<DateTime<Utc>>,
        stale: bool,
    },
    Unavailable,
}

pub struct EntitlementEvaluator {
    catalog: Arc<FeatureCatalog>,
    store: Arc<dyn UsageStore>,
    cache: Arc<dyn UsageCache>,
    oracle: Arc<dyn SubscriptionOracle>,
    reconciler: Reconciler,
    config: EvaluatorConfig,
    metrics: Arc<EntitlementMetrics>,
}

impl EntitlementEvaluator {
    pub fn new(
        catalog: Arc<FeatureCatalog>,
        store: Arc<dyn UsageStore>,
        cache: Arc<dyn UsageCache>,
        oracle: Arc<dyn SubscriptionOracle>,
        config: EvaluatorConfig,
    ) -> Self {
        let reconciler = Reconciler::new(Arc::clone(&cache));
        Self {
            catalog,
            store,
            cache,
            oracle,
            reconciler,
            config,
            metrics: Arc::new(EntitlementMetrics::default()),
        }
    }

    pub fn metrics(&self) -> &EntitlementMetrics {
        &self.metrics
    }

    /// Read-only access check for rendering indicators and upgrade prompts.
    pub async fn evaluate(
        &self,
        user_id: &str,
        feature: Feature,
    ) -> Result<EntitlementDecision, Error> {
        let policy = self.catalog.policy_for(feature);
        let tier = self.resolve_tier(user_id).await;
        let limit = policy.limit_for(tier);

        // Unlimited tiers need no counter at all
        if limit.is_unlimited() {
            self.metrics.record_allowed();
            return Ok(EntitlementDecision::unlimited());
        }

        let now = Utc::now();
        let decision = match self.current_usage(user_id, feature).await {
            UsageView::Known {
                count,
                window_start,
                stale,
            } => {
                // An elapsed window counts as zero here; the durable reset is
                // performed lazily by `consume` so that read-only checks
                // never amplify into writes.
                let (effective_count, reset_at) = match window_start {
                    Some(ws) if window::needs_reset(now, ws, policy.reset_period) => {
                        (0, window::next_window_start(now, policy.reset_period))
                    }
                    Some(ws) => (count, window::next_window_start(ws, policy.reset_period)),
                    None => (0, window::next_window_start(now, policy.reset_period)),
                };
                EntitlementDecision {
                    allowed: limit.permits(effective_count),
                    remaining: limit.remaining_after(effective_count),
                    limit,
                    reset_at,
                    stale,
                }
            }
            UsageView::Unavailable => {
                // No durable read and nothing cached. Gating decisions fail
                // closed; explicitly marked low-risk features may fail open.
                EntitlementDecision {
                    allowed: policy.fail_open,
                    remaining: if policy.fail_open {
                        limit
                    } else {
                        Limit::Finite(0)
                    },
                    limit,
                    reset_at: None,
                    stale: true,
                }
            }
        };

        if decision.allowed {
            self.metrics.record_allowed();
        } else {
            self.metrics.record_denied();
        }
        Ok(decision)
    }

    /// Meter one use of a gated feature. Must be called at most once per
    /// attempted use, immediately before performing the action.
    pub async fn consume(
        &self,
        user_id: &str,
        feature: Feature,
    ) -> Result<ConsumeDecision, Error> {
        let policy = self.catalog.policy_for(feature);
        let tier = self.resolve_tier(user_id).await;
        let limit = policy.limit_for(tier);

        if limit.is_unlimited() {
            self.metrics.record_allowed();
            return Ok(ConsumeDecision::accepted_unlimited());
        }
        if limit == Limit::Finite(0) {
            self.metrics.record_denied();
            return Ok(ConsumeDecision::denied(
                Limit::Finite(0),
                None,
                "feature is not available on the current plan",
            ));
        }

        let now = Utc::now();
        let record = match self.store.read(user_id, feature).await {
            Ok(record) => record,
            Err(_) => {
                self.metrics.record_store_error();
                self.cache.invalidate(user_id, feature).await;
                return Ok(Self::denied_store_unavailable());
            }
        };

        let mut window_start = record.as_ref().map_or(now, |r| r.window_start);
        if let Some(record) = &record {
            if window::needs_reset(now, record.window_start, policy.reset_period) {
                match self
                    .store
                    .reset_window(user_id, feature, now, policy.reset_period)
                    .await
                {
                    Ok(_) => {
                        self.metrics.record_window_reset();
                        self.cache.invalidate(user_id, feature).await;
                        window_start = now;
                        debug!(
                            user_id = user_id,
                            feature = %feature,
                            "Opened a fresh usage window"
                        );
                    }
                    Err(_) => {
                        self.metrics.record_store_error();
                        return Ok(Self::denied_store_unavailable());
                    }
                }
            }
        }

        match self
            .store
            .conditional_increment(user_id, feature, limit, policy.reset_period, window_start)
            .await
        {
            Ok(outcome) if outcome.accepted => {
                self.metrics.record_allowed();
                self.cache
                    .put(UsageRecord {
                        user_id: user_id.to_string(),
                        feature,
                        count: outcome.new_count,
                        window_start,
                        reset_period: policy.reset_period,
                    })
                    .await;
                Ok(ConsumeDecision {
                    accepted: true,
                    remaining: limit.remaining_after(outcome.new_count),
                    reset_at: window::next_window_start(window_start, policy.reset_period),
                    reason: None,
                })
            }
            Ok(_) => {
                // Already at the ceiling; the cached snapshot is still correct
                self.metrics.record_denied();
                Ok(ConsumeDecision::denied(
                    Limit::Finite(0),
                    window::next_window_start(window_start, policy.reset_period),
                    "quota exhausted for the current window",
                ))
            }
            Err(_) => {
                self.metrics.record_store_error();
                // Outcome unknown: drop the cached counter so callers that
                // re-evaluate before retrying see the durable truth.
                self.cache.invalidate(user_id, feature).await;
                Ok(Self::denied_store_unavailable())
            }
        }
    }

    /// Diagnostic read of the durable record, bypassing the cache.
    pub async fn get_usage(
        &self,
        user_id: &str,
        feature: Feature,
    ) -> Result<Option<UsageRecord>, Error> {
        self.store.read(user_id, feature).await
    }

    /// Resolve the user's tier, falling back to free on any oracle failure so
    /// a billing outage can never grant paid capability.
    async fn resolve_tier(&self, user_id: &str) -> Tier {
        match self.oracle.current_tier(user_id).await {
            Ok(tier) => tier,
            Err(_) => {
                self.metrics.record_oracle_error();
                Tier::Free
            }
        }
    }

    async fn current_usage(&self, user_id: &str, feature: Feature) -> UsageView {
        let cached = self.cache.get(user_id, feature).await;
        if let Some(cached) = &cached {
            if cached.is_fresh(self.config.cache_ttl) {
                self.metrics.record_cache_hit();
                return UsageView::Known {
                    count: cached.record.count,
                    window_start: Some(cached.record.window_start),
                    stale: false,
                };
            }
        }

        self.metrics.record_cache_miss();
        match self.store.read(user_id, feature).await {
            Ok(Some(durable)) => {
                let view = UsageView::Known {
                    count: durable.count,
                    window_start: Some(durable.window_start),
                    stale: false,
                };
                self.reconciler.absorb(cached.as_ref(), durable).await;
                view
            }
            Ok(None) => UsageView::Known {
                count: 0,
                window_start: None,
                stale: false,
            },
            Err(_) => {
                self.metrics.record_store_error();
                match cached {
                    // Expired but present: better than nothing when the store
                    // is down, reported as stale
                    Some(cached) => UsageView::Known {
                        count: cached.record.count,
                        window_start: Some(cached.record.window_start),
                        stale: true,
                    },
                    None => UsageView::Unavailable,
                }
            }
        }
    }

    fn denied_store_unavailable() -> ConsumeDecision {
        ConsumeDecision::denied(Limit::Finite(0), None, "usage store unavailable")
    }
}
