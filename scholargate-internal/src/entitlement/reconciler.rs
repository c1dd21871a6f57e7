//! Keeps the device-local cache convergent with the durable store.
//!
//! The durable record always wins: on any divergence the cached snapshot is
//! overwritten wholesale, never merged. A pub/sub listener additionally drops
//! cached counters when another gateway instance resets a window, so an
//! upgrade prompt on one device disappears promptly on the others.

use std::sync::Arc;

use futures::StreamExt;
use serde::Deserialize;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::catalog::Feature;
use crate::entitlement::store::USAGE_RESETS_CHANNEL;
use crate::entitlement::{CachedUsage, UsageCache, UsageRecord};
use crate::error::{Error, ErrorDetails};
use crate::redis_client::RedisClient;

pub struct Reconciler {
    cache: Arc<dyn UsageCache>,
}

#[derive(Debug, Deserialize)]
struct ResetSignal {
    user_id: String,
    feature: Feature,
}

impl Reconciler {
    pub fn new(cache: Arc<dyn UsageCache>) -> Self {
        Self { cache }
    }

    /// Whether a cached snapshot disagrees with the durable record.
    pub fn diverges(cached: &CachedUsage, durable: &UsageRecord) -> bool {
        cached.record.window_start != durable.window_start
            || cached.record.count != durable.count
            || cached.record.reset_period != durable.reset_period
    }

    /// Absorb a freshly-read durable record into the cache.
    pub async fn absorb(&self, cached: Option<&CachedUsage>, durable: UsageRecord) {
        if let Some(cached) = cached {
            if Self::diverges(cached, &durable) {
                debug!(
                    user_id = durable.user_id,
                    feature = %durable.feature,
                    cached_count = cached.record.count,
                    durable_count = durable.count,
                    "Cached usage diverged from store; overwriting"
                );
            }
        }
        self.cache.put(durable).await;
    }

    /// Listen for window-reset signals from other instances and drop the
    /// corresponding cache entries. Reconnects on stream end or error.
    pub fn start_reset_listener(
        redis: Arc<RedisClient>,
        cache: Arc<dyn UsageCache>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                match Self::run_reset_listener(&redis, &cache).await {
                    Ok(()) => {
                        warn!("Usage reset listener stream ended, reconnecting in 5 seconds");
                    }
                    Err(e) => {
                        warn!("Usage reset listener error: {e}, retrying in 5 seconds");
                    }
                }
                tokio::time::sleep(std::time::Duration::from_secs(5)).await;
            }
        })
    }

    async fn run_reset_listener(
        redis: &RedisClient,
        cache: &Arc<dyn UsageCache>,
    ) -> Result<(), Error> {
        let mut pubsub = redis.get_pubsub().await.map_err(|e| {
            Error::new(ErrorDetails::StoreUnavailable {
                message: format!("Failed to get Redis pub/sub connection: {e}"),
            })
        })?;

        pubsub.subscribe(USAGE_RESETS_CHANNEL).await.map_err(|e| {
            Error::new(ErrorDetails::StoreUnavailable {
                message: format!("Failed to subscribe to usage resets: {e}"),
            })
        })?;

        debug!("Listening for usage reset signals on {USAGE_RESETS_CHANNEL}");

        let mut stream = pubsub.on_message();
        while let Some(msg) = stream.next().await {
            let payload: String = match msg.get_payload() {
                Ok(p) => p,
                Err(e) => {
                    warn!("Failed to decode usage reset message: {e}");
                    continue;
                }
            };

            match serde_json::from_str::<ResetSignal>(&payload) {
                Ok(signal) => {
                    cache.invalidate(&signal.user_id, signal.feature).await;
                    debug!(
                        user_id = signal.user_id,
                        feature = %signal.feature,
                        "Invalidated cached usage after remote window reset"
                    );
                }
                Err(e) => {
                    warn!("Malformed usage reset signal `{payload}`: {e}");
                }
            }
        }

        Ok(())
    }
}
