use serde_json::{json, Value};

use crate::common::{start_gateway, url};

const DEFAULT_CONFIG: &str = r#"
[gateway]
bind_address = "127.0.0.1:0"
"#;

#[tokio::test]
async fn test_status_and_health() {
    let addr = start_gateway(DEFAULT_CONFIG).await;
    let client = reqwest::Client::new();

    let status: Value = client
        .get(url(addr, "/status"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["name"], "scholargate");
    assert!(status["version"].is_string());

    let health = client.get(url(addr, "/health")).send().await.unwrap();
    assert!(health.status().is_success());
}

#[tokio::test]
async fn test_evaluate_free_tier_defaults() {
    let addr = start_gateway(DEFAULT_CONFIG).await;
    let client = reqwest::Client::new();

    let decision: Value = client
        .post(url(addr, "/v1/entitlements/evaluate"))
        .json(&json!({"user_id": "student-1", "feature": "ai_recommendations"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(decision["allowed"], true);
    assert_eq!(decision["remaining"], 5);
    assert_eq!(decision["limit"], 5);
    assert_eq!(decision["stale"], false);
    assert!(decision["reset_at"].is_string());
}

#[tokio::test]
async fn test_consume_until_exhaustion() {
    let config = r#"
[features.essay_assistance]
free_limit = 2
"#;
    let addr = start_gateway(config).await;
    let client = reqwest::Client::new();
    let body = json!({"user_id": "student-2", "feature": "essay_assistance"});

    for _ in 0..2 {
        let decision: Value = client
            .post(url(addr, "/v1/entitlements/consume"))
            .json(&body)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(decision["accepted"], true);
    }

    let rejected: Value = client
        .post(url(addr, "/v1/entitlements/consume"))
        .json(&body)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(rejected["accepted"], false);
    assert_eq!(rejected["remaining"], 0);
    assert_eq!(rejected["reason"], "quota exhausted for the current window");

    // The read-only check agrees
    let evaluated: Value = client
        .post(url(addr, "/v1/entitlements/evaluate"))
        .json(&body)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(evaluated["allowed"], false);
    assert_eq!(evaluated["remaining"], 0);
}

#[tokio::test]
async fn test_usage_diagnostic_endpoint() {
    let addr = start_gateway(DEFAULT_CONFIG).await;
    let client = reqwest::Client::new();

    // No record before the first consumption
    let missing = client
        .get(url(addr, "/v1/usage/student-3/saved_scholarships"))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), reqwest::StatusCode::NOT_FOUND);

    client
        .post(url(addr, "/v1/entitlements/consume"))
        .json(&json!({"user_id": "student-3", "feature": "saved_scholarships"}))
        .send()
        .await
        .unwrap();

    let record: Value = client
        .get(url(addr, "/v1/usage/student-3/saved_scholarships"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(record["user_id"], "student-3");
    assert_eq!(record["feature"], "saved_scholarships");
    assert_eq!(record["count"], 1);
    assert_eq!(record["reset_period"], "never");
    assert!(record["window_start"].is_string());
}

#[tokio::test]
async fn test_unknown_feature_is_an_error() {
    let addr = start_gateway(DEFAULT_CONFIG).await;
    let client = reqwest::Client::new();

    let response = client
        .post(url(addr, "/v1/entitlements/evaluate"))
        .json(&json!({"user_id": "student-4", "feature": "time_travel"}))
        .send()
        .await
        .unwrap();
    assert_eq!(
        response.status(),
        reqwest::StatusCode::INTERNAL_SERVER_ERROR
    );
    let body: Value = response.json().await.unwrap();
    assert!(body["error"]
        .as_str()
        .unwrap()
        .contains("Unknown feature `time_travel`"));
}

#[tokio::test]
async fn test_empty_user_id_is_rejected() {
    let addr = start_gateway(DEFAULT_CONFIG).await;
    let client = reqwest::Client::new();

    let response = client
        .post(url(addr, "/v1/entitlements/consume"))
        .json(&json!({"user_id": "", "feature": "ai_recommendations"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_malformed_body_is_rejected() {
    let addr = start_gateway(DEFAULT_CONFIG).await;
    let client = reqwest::Client::new();

    let response = client
        .post(url(addr, "/v1/entitlements/evaluate"))
        .json(&json!({"user_id": "student-5"}))
        .send()
        .await
        .unwrap();
    assert!(response.status().is_client_error());
}

#[tokio::test]
async fn test_unknown_route_returns_404() {
    let addr = start_gateway(DEFAULT_CONFIG).await;
    let client = reqwest::Client::new();

    let response = client
        .get(url(addr, "/v1/nope"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_quota_is_per_user_and_per_feature() {
    let config = r#"
[features.profile_insights]
free_limit = 1
"#;
    let addr = start_gateway(config).await;
    let client = reqwest::Client::new();

    let consume = |user: &'static str, feature: &'static str| {
        let client = client.clone();
        async move {
            let decision: Value = client
                .post(url(addr, "/v1/entitlements/consume"))
                .json(&json!({"user_id": user, "feature": feature}))
                .send()
                .await
                .unwrap()
                .json()
                .await
                .unwrap();
            decision["accepted"] == Value::Bool(true)
        }
    };

    assert!(consume("student-6", "profile_insights").await);
    assert!(!consume("student-6", "profile_insights").await);
    // A different user is unaffected
    assert!(consume("student-7", "profile_insights").await);
    // As is a different feature for the same user
    assert!(consume("student-6", "deadline_reminders").await);
}
