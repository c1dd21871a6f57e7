//! Subscription tier oracle.
//!
//! Tier state is owned by the billing service, which mirrors it into Redis as
//! it processes provider webhooks. This module only consumes that mirror; on
//! any failure the caller falls back to the free tier, so a billing outage can
//! never grant paid capability.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use tokio::time::timeout;

use crate::error::{Error, ErrorDetails};
use crate::redis_client::RedisClient;

const TIER_KEY_PREFIX: &str = "subscription_tier:";

/// Subscription level of a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Free,
    Paid,
}

#[async_trait]
pub trait SubscriptionOracle: Send + Sync {
    async fn current_tier(&self, user_id: &str) -> Result<Tier, Error>;
}

/// Billing mirror record, written by the webhook handlers.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct TierRecord {
    tier: Tier,
    #[serde(default)]
    status: Option<String>,
}

impl TierRecord {
    /// A paid record only counts while the underlying subscription is live.
    fn effective_tier(&self) -> Tier {
        match (&self.tier, self.status.as_deref()) {
            (Tier::Paid, None | Some("active") | Some("trialing")) => Tier::Paid,
            _ => Tier::Free,
        }
    }
}

/// Oracle backed by the webhook-maintained Redis mirror.
pub struct RedisSubscriptionOracle {
    redis: Arc<RedisClient>,
    op_timeout: Duration,
}

impl RedisSubscriptionOracle {
    pub fn new(redis: Arc<RedisClient>, op_timeout: Duration) -> Self {
        Self { redis, op_timeout }
    }
}

#[async_trait]
impl SubscriptionOracle for RedisSubscriptionOracle {
    async fn current_tier(&self, user_id: &str) -> Result<Tier, Error> {
        let mut conn = self.redis.get_connection();
        let key = format!("{TIER_KEY_PREFIX}{user_id}");

        let result = timeout(self.op_timeout, conn.get::<_, Option<String>>(&key)).await;

        match result {
            Ok(Ok(Some(data))) => match serde_json::from_str::<TierRecord>(&data) {
                Ok(record) => Ok(record.effective_tier()),
                Err(e) => Err(Error::new(ErrorDetails::OracleUnavailable {
                    message: format!("Malformed tier record for user {user_id}: {e}"),
                })),
            },
            // No mirror record: the user has never subscribed
            Ok(Ok(None)) => Ok(Tier::Free),
            Ok(Err(e)) => Err(Error::new(ErrorDetails::OracleUnavailable {
                message: format!("Redis error: {e}"),
            })),
            Err(_) => Err(Error::new(ErrorDetails::OracleUnavailable {
                message: format!("Timed out after {}ms", self.op_timeout.as_millis()),
            })),
        }
    }
}

/// In-process oracle for single-instance deployments and tests.
#[derive(Debug, Default)]
pub struct MemorySubscriptionOracle {
    tiers: DashMap<String, Tier>,
}

impl MemorySubscriptionOracle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_tier(&self, user_id: &str, tier: Tier) {
        self.tiers.insert(user_id.to_string(), tier);
    }
}

#[async_trait]
impl SubscriptionOracle for MemorySubscriptionOracle {
    async fn current_tier(&self, user_id: &str) -> Result<Tier, Error> {
        Ok(self
            .tiers
            .get(user_id)
            .map(|entry| *entry.value())
            .unwrap_or(Tier::Free))
    }
}
