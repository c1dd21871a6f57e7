//! Durable usage counters.
//!
//! The store is the source of truth for consumption, shared by every gateway
//! instance and every device of a user. The one operation that must be atomic
//! at the storage layer is [`UsageStore::conditional_increment`]: two callers
//! racing past an application-level "read, compare, write" sequence could both
//! observe `count = limit - 1` and overshoot the quota, so the
//! compare-and-increment always executes as a single storage-side primitive.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use redis::{AsyncCommands, Script};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::catalog::{Feature, Limit};
use crate::entitlement::UsageRecord;
use crate::error::{Error, ErrorDetails};
use crate::redis_client::RedisClient;
use crate::window::ResetPeriod;

pub const USAGE_KEY_PREFIX: &str = "usage:";
pub const USAGE_RESETS_CHANNEL: &str = "scholargate:usage_resets";

/// Result of a conditional increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IncrementOutcome {
    pub accepted: bool,
    pub new_count: u32,
}

#[async_trait]
pub trait UsageStore: Send + Sync {
    /// Fetch the durable record, if one exists.
    async fn read(&self, user_id: &str, feature: Feature) -> Result<Option<UsageRecord>, Error>;

    /// Atomically increment the counter by one iff it is below `ceiling`
    /// (always, for an unlimited ceiling). Creates the record on first use
    /// with the given `window_start` and `reset_period`.
    async fn conditional_increment(
        &self,
        user_id: &str,
        feature: Feature,
        ceiling: Limit,
        reset_period: ResetPeriod,
        window_start: DateTime<Utc>,
    ) -> Result<IncrementOutcome, Error>;

    /// Zero the counter and open a new window, refreshing the stored cadence.
    async fn reset_window(
        &self,
        user_id: &str,
        feature: Feature,
        new_window_start: DateTime<Utc>,
        reset_period: ResetPeriod,
    ) -> Result<UsageRecord, Error>;
}

fn usage_key(user_id: &str, feature: Feature) -> String {
    format!("{USAGE_KEY_PREFIX}{user_id}:{feature}")
}

/// Redis-backed durable store.
///
/// Records are hashes keyed `usage:{user_id}:{feature}` with fields `count`,
/// `window_start` (RFC 3339) and `reset_period`. The conditional increment is
/// a Lua script, which Redis executes atomically.
pub struct RedisUsageStore {
    redis: Arc<RedisClient>,
    op_timeout: Duration,
    increment_script: Script,
}

impl RedisUsageStore {
    pub fn new(redis: Arc<RedisClient>, op_timeout: Duration) -> Self {
        let increment_script = Script::new(
            r"
            local count = tonumber(redis.call('HGET', KEYS[1], 'count') or '0')
            local limit = tonumber(ARGV[1])
            if limit >= 0 and count >= limit then
                return {0, count}
            end
            count = redis.call('HINCRBY', KEYS[1], 'count', 1)
            if redis.call('HSETNX', KEYS[1], 'window_start', ARGV[2]) == 1 then
                redis.call('HSET', KEYS[1], 'reset_period', ARGV[3])
            end
            return {1, count}
            ",
        );

        Self {
            redis,
            op_timeout,
            increment_script,
        }
    }

    fn parse_record(
        user_id: &str,
        feature: Feature,
        fields: HashMap<String, String>,
    ) -> Result<UsageRecord, Error> {
        let count = fields
            .get("count")
            .and_then(|v| v.parse::<u32>().ok())
            .ok_or_else(|| {
                Error::new(ErrorDetails::Serialization {
                    message: format!("Malformed count in usage record for {user_id}/{feature}"),
                })
            })?;
        let window_start = fields
            .get("window_start")
            .and_then(|v| DateTime::parse_from_rfc3339(v).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .ok_or_else(|| {
                Error::new(ErrorDetails::Serialization {
                    message: format!(
                        "Malformed window_start in usage record for {user_id}/{feature}"
                    ),
                })
            })?;
        let reset_period = fields
            .get("reset_period")
            .and_then(|v| v.parse::<ResetPeriod>().ok())
            .ok_or_else(|| {
                Error::new(ErrorDetails::Serialization {
                    message: format!(
                        "Malformed reset_period in usage record for {user_id}/{feature}"
                    ),
                })
            })?;

        Ok(UsageRecord {
            user_id: user_id.to_string(),
            feature,
            count,
            window_start,
            reset_period,
        })
    }
}

#[async_trait]
impl UsageStore for RedisUsageStore {
    async fn read(&self, user_id: &str, feature: Feature) -> Result<Option<UsageRecord>, Error> {
        let mut conn = self.redis.get_connection();
        let key = usage_key(user_id, feature);

        let result = timeout(
            self.op_timeout,
            conn.hgetall::<_, HashMap<String, String>>(&key),
        )
        .await;

        match result {
            Ok(Ok(fields)) if fields.is_empty() => Ok(None),
            Ok(Ok(fields)) => Self::parse_record(user_id, feature, fields).map(Some),
            Ok(Err(e)) => Err(Error::new(ErrorDetails::StoreUnavailable {
                message: format!("Redis error reading {key}: {e}"),
            })),
            Err(_) => Err(Error::new(ErrorDetails::StoreTimeout {
                operation: "read".to_string(),
            })),
        }
    }

    async fn conditional_increment(
        &self,
        user_id: &str,
        feature: Feature,
        ceiling: Limit,
        reset_period: ResetPeriod,
        window_start: DateTime<Utc>,
    ) -> Result<IncrementOutcome, Error> {
        let mut conn = self.redis.get_connection();
        let key = usage_key(user_id, feature);
        // -1 encodes an unconditional increment
        let limit_arg: i64 = ceiling.as_ceiling().map_or(-1, i64::from);

        let result: Result<Result<Vec<i64>, redis::RedisError>, _> = timeout(
            self.op_timeout,
            self.increment_script
                .key(&key)
                .arg(limit_arg)
                .arg(window_start.to_rfc3339())
                .arg(reset_period.to_string())
                .invoke_async(&mut conn),
        )
        .await;

        match result {
            Ok(Ok(values)) => {
                if values.len() != 2 {
                    return Err(Error::new(ErrorDetails::StoreUnavailable {
                        message: format!(
                            "Unexpected increment script response for {key}: {values:?}"
                        ),
                    }));
                }
                let accepted = values[0] == 1;
                let new_count = u32::try_from(values[1]).unwrap_or(u32::MAX);
                debug!(
                    user_id = user_id,
                    feature = %feature,
                    accepted = accepted,
                    count = new_count,
                    "Conditional increment"
                );
                Ok(IncrementOutcome { accepted, new_count })
            }
            Ok(Err(e)) => Err(Error::new(ErrorDetails::StoreUnavailable {
                message: format!("Redis error incrementing {key}: {e}"),
            })),
            Err(_) => Err(Error::new(ErrorDetails::StoreTimeout {
                operation: "conditional_increment".to_string(),
            })),
        }
    }

    async fn reset_window(
        &self,
        user_id: &str,
        feature: Feature,
        new_window_start: DateTime<Utc>,
        reset_period: ResetPeriod,
    ) -> Result<UsageRecord, Error> {
        let mut conn = self.redis.get_connection();
        let key = usage_key(user_id, feature);
        let record = UsageRecord {
            user_id: user_id.to_string(),
            feature,
            count: 0,
            window_start: new_window_start,
            reset_period,
        };

        // A single HSET is atomic; concurrent resets converge on count = 0
        let fields = [
            ("count", "0".to_string()),
            ("window_start", new_window_start.to_rfc3339()),
            ("reset_period", reset_period.to_string()),
        ];
        let write = conn.hset_multiple::<_, _, _, ()>(&key, &fields);

        match timeout(self.op_timeout, write).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                return Err(Error::new(ErrorDetails::StoreUnavailable {
                    message: format!("Redis error resetting {key}: {e}"),
                }))
            }
            Err(_) => {
                return Err(Error::new(ErrorDetails::StoreTimeout {
                    operation: "reset_window".to_string(),
                }))
            }
        }

        // Tell other instances to drop their cached snapshot of this counter.
        // Best effort: a missed signal only extends staleness to the cache TTL.
        let payload = serde_json::json!({"user_id": user_id, "feature": feature}).to_string();
        if let Ok(Err(e)) = timeout(
            self.op_timeout,
            conn.publish::<_, _, i64>(USAGE_RESETS_CHANNEL, &payload),
        )
        .await
        {
            warn!("Failed to publish usage reset signal for {key}: {e}");
        }

        Ok(record)
    }
}

/// In-process store for single-instance deployments and tests. Counters do
/// not survive restarts. Per-key atomicity comes from holding the DashMap
/// entry lock across the compare and the increment.
#[derive(Debug, Default)]
pub struct MemoryUsageStore {
    records: DashMap<(String, Feature), UsageRecord>,
}

impl MemoryUsageStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UsageStore for MemoryUsageStore {
    async fn read(&self, user_id: &str, feature: Feature) -> Result<Option<UsageRecord>, Error> {
        Ok(self
            .records
            .get(&(user_id.to_string(), feature))
            .map(|entry| entry.value().clone()))
    }

    async fn conditional_increment(
        &self,
        user_id: &str,
        feature: Feature,
        ceiling: Limit,
        reset_period: ResetPeriod,
        window_start: DateTime<Utc>,
    ) -> Result<IncrementOutcome, Error> {
        let mut entry = self
            .records
            .entry((user_id.to_string(), feature))
            .or_insert_with(|| UsageRecord {
                user_id: user_id.to_string(),
                feature,
                count: 0,
                window_start,
                reset_period,
            });
        let record = entry.value_mut();

        if ceiling.permits(record.count) {
            record.count += 1;
            Ok(IncrementOutcome {
                accepted: true,
                new_count: record.count,
            })
        } else {
            Ok(IncrementOutcome {
                accepted: false,
                new_count: record.count,
            })
        }
    }

    async fn reset_window(
        &self,
        user_id: &str,
        feature: Feature,
        new_window_start: DateTime<Utc>,
        reset_period: ResetPeriod,
    ) -> Result<UsageRecord, Error> {
        let mut entry = self
            .records
            .entry((user_id.to_string(), feature))
            .or_insert_with(|| UsageRecord {
                user_id: user_id.to_string(),
                feature,
                count: 0,
                window_start: new_window_start,
                reset_period,
            });
        let record = entry.value_mut();
        record.count = 0;
        record.window_start = new_window_start;
        record.reset_period = reset_period;
        Ok(record.clone())
    }
}
