//! Tests against a live Redis at localhost:6379.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::Utc;
use futures::future::join_all;

use scholargate_internal::catalog::{Feature, Limit};
use scholargate_internal::entitlement::{RedisUsageStore, UsageStore};
use scholargate_internal::redis_client::RedisClient;
use scholargate_internal::window::ResetPeriod;

const REDIS_URL: &str = "redis://localhost:6379";

async fn store() -> RedisUsageStore {
    let redis = Arc::new(RedisClient::new(REDIS_URL).await.unwrap());
    RedisUsageStore::new(redis, Duration::from_millis(500))
}

fn unique_user(prefix: &str) -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    format!("{prefix}-{nanos}")
}

#[tokio::test]
async fn test_redis_lazy_creation_and_read() {
    let store = store().await;
    let user = unique_user("e2e-read");

    assert!(store
        .read(&user, Feature::AiRecommendations)
        .await
        .unwrap()
        .is_none());

    let now = Utc::now();
    let outcome = store
        .conditional_increment(
            &user,
            Feature::AiRecommendations,
            Limit::Finite(5),
            ResetPeriod::Monthly,
            now,
        )
        .await
        .unwrap();
    assert!(outcome.accepted);
    assert_eq!(outcome.new_count, 1);

    let record = store
        .read(&user, Feature::AiRecommendations)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.count, 1);
    assert_eq!(record.reset_period, ResetPeriod::Monthly);
    // RFC 3339 round trip preserves the instant
    assert_eq!(record.window_start.timestamp(), now.timestamp());
}

#[tokio::test]
async fn test_redis_ceiling_is_enforced() {
    let store = store().await;
    let user = unique_user("e2e-ceiling");
    let now = Utc::now();

    for _ in 0..3 {
        let outcome = store
            .conditional_increment(
                &user,
                Feature::EssayAssistance,
                Limit::Finite(3),
                ResetPeriod::Monthly,
                now,
            )
            .await
            .unwrap();
        assert!(outcome.accepted);
    }

    let rejected = store
        .conditional_increment(
            &user,
            Feature::EssayAssistance,
            Limit::Finite(3),
            ResetPeriod::Monthly,
            now,
        )
        .await
        .unwrap();
    assert!(!rejected.accepted);
    assert_eq!(rejected.new_count, 3);
}

#[tokio::test]
async fn test_redis_concurrent_increments_never_overshoot() {
    let store = Arc::new(store().await);
    let user = Arc::new(unique_user("e2e-race"));
    let now = Utc::now();
    let limit = 5u32;

    let tasks = (0..20).map(|_| {
        let store = Arc::clone(&store);
        let user = Arc::clone(&user);
        tokio::spawn(async move {
            store
                .conditional_increment(
                    &user,
                    Feature::AiRecommendations,
                    Limit::Finite(limit),
                    ResetPeriod::Monthly,
                    now,
                )
                .await
                .unwrap()
        })
    });

    let outcomes = join_all(tasks).await;
    let accepted = outcomes
        .iter()
        .filter(|r| r.as_ref().unwrap().accepted)
        .count();
    assert_eq!(accepted as u32, limit);

    let record = store
        .read(&user, Feature::AiRecommendations)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.count, limit);
}

#[tokio::test]
async fn test_redis_reset_window_round_trip() {
    let store = store().await;
    let user = unique_user("e2e-reset");
    let then = Utc::now() - chrono::Duration::days(40);

    for _ in 0..4 {
        store
            .conditional_increment(
                &user,
                Feature::ProfileInsights,
                Limit::Finite(10),
                ResetPeriod::Daily,
                then,
            )
            .await
            .unwrap();
    }

    let new_start = Utc::now();
    let record = store
        .reset_window(&user, Feature::ProfileInsights, new_start, ResetPeriod::Daily)
        .await
        .unwrap();
    assert_eq!(record.count, 0);

    let read_back = store
        .read(&user, Feature::ProfileInsights)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(read_back.count, 0);
    assert_eq!(read_back.window_start.timestamp(), new_start.timestamp());
    assert_eq!(read_back.reset_period, ResetPeriod::Daily);
}
