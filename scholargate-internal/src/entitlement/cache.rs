//! Device-local usage cache.
//!
//! A cheap mirror of the durable store consulted on read-only checks so that
//! rendering a "3 of 5 left" indicator does not cost a storage round trip.
//! Never consulted as the sole basis for a `consume` decision.

use std::time::Duration;

use async_trait::async_trait;
use moka::future::Cache;

use crate::catalog::Feature;
use crate::entitlement::{CachedUsage, UsageRecord};

#[async_trait]
pub trait UsageCache: Send + Sync {
    async fn get(&self, user_id: &str, feature: Feature) -> Option<CachedUsage>;
    async fn put(&self, record: UsageRecord);
    async fn invalidate(&self, user_id: &str, feature: Feature);
}

fn cache_key(user_id: &str, feature: Feature) -> String {
    format!("{user_id}:{feature}")
}

pub struct MokaUsageCache {
    cache: Cache<String, CachedUsage>,
}

impl MokaUsageCache {
    pub fn new(max_capacity: u64, ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_capacity)
            .time_to_live(ttl)
            .build();
        Self { cache }
    }

    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }
}

#[async_trait]
impl UsageCache for MokaUsageCache {
    async fn get(&self, user_id: &str, feature: Feature) -> Option<CachedUsage> {
        self.cache.get(&cache_key(user_id, feature)).await
    }

    async fn put(&self, record: UsageRecord) {
        let key = cache_key(&record.user_id, record.feature);
        self.cache.insert(key, CachedUsage::new(record)).await;
    }

    async fn invalidate(&self, user_id: &str, feature: Feature) {
        self.cache.remove(&cache_key(user_id, feature)).await;
    }
}
