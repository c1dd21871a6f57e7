//! Utilities for wiring the gateway's application state.

use std::sync::Arc;

use axum::extract::State;

use crate::catalog::FeatureCatalog;
use crate::config_parser::Config;
use crate::entitlement::{
    EntitlementEvaluator, EvaluatorConfig, MemoryUsageStore, MokaUsageCache, Reconciler,
    RedisUsageStore, UsageCache, UsageStore,
};
use crate::error::Error;
use crate::redis_client::RedisClient;
use crate::subscription::{MemorySubscriptionOracle, RedisSubscriptionOracle, SubscriptionOracle};

#[derive(Clone)]
pub struct AppStateData {
    pub config: Arc<Config>,
    pub evaluator: Arc<EntitlementEvaluator>,
}

pub type AppState = State<AppStateData>;

impl AppStateData {
    /// Build the application state: catalog, cache, store, oracle, evaluator.
    ///
    /// With `[redis]` configured, counters live in Redis and are shared by
    /// every instance, and a reset listener keeps local caches convergent.
    /// Without it the service runs single-instance with in-process counters
    /// that do not survive restarts.
    pub async fn new(config: Arc<Config>) -> Result<Self, Error> {
        let catalog = Arc::new(FeatureCatalog::new(&config.features)?);
        let cache: Arc<MokaUsageCache> = Arc::new(MokaUsageCache::new(
            config.entitlement.max_cache_size,
            config.entitlement.cache_ttl(),
        ));

        let (store, oracle): (Arc<dyn UsageStore>, Arc<dyn SubscriptionOracle>) =
            match &config.redis {
                Some(redis_config) => {
                    let redis = Arc::new(RedisClient::new(&redis_config.url).await?);
                    let store = Arc::new(RedisUsageStore::new(
                        Arc::clone(&redis),
                        config.entitlement.store_timeout(),
                    ));
                    let oracle = Arc::new(RedisSubscriptionOracle::new(
                        Arc::clone(&redis),
                        config.entitlement.oracle_timeout(),
                    ));
                    Reconciler::start_reset_listener(
                        redis,
                        Arc::clone(&cache) as Arc<dyn UsageCache>,
                    );
                    tracing::info!("Usage store: redis");
                    (store, oracle)
                }
                None => {
                    tracing::warn!(
                        "No [redis] configuration provided; using in-process usage counters. \
                         They are not shared across instances and do not survive restarts."
                    );
                    (
                        Arc::new(MemoryUsageStore::new()),
                        Arc::new(MemorySubscriptionOracle::new()),
                    )
                }
            };

        let evaluator = Arc::new(EntitlementEvaluator::new(
            catalog,
            store,
            cache,
            oracle,
            EvaluatorConfig {
                cache_ttl: config.entitlement.cache_ttl(),
            },
        ));

        Ok(Self { config, evaluator })
    }
}
