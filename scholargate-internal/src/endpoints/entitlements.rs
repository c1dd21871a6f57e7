//! Entitlement API handlers.
//!
//! The platform's API routes call `evaluate` to render remaining-quota
//! indicators and upgrade prompts, and `consume` immediately before
//! performing a gated action. Consumers must check `accepted` — a gated
//! action performed after a rejected consume is unmetered.

use axum::extract::{Path, State};
use axum::response::Json;
use metrics::counter;
use serde::Deserialize;

use crate::catalog::Feature;
use crate::entitlement::{ConsumeDecision, EntitlementDecision, UsageRecord};
use crate::error::{Error, ErrorDetails};
use crate::gateway_util::AppState;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EntitlementParams {
    pub user_id: String,
    pub feature: String,
}

fn parse_feature(name: &str) -> Result<Feature, Error> {
    name.parse::<Feature>().map_err(|_| {
        Error::new(ErrorDetails::UnknownFeature {
            name: name.to_string(),
        })
    })
}

fn validate_user_id(user_id: &str) -> Result<(), Error> {
    if user_id.is_empty() {
        return Err(Error::new(ErrorDetails::InvalidRequest {
            message: "user_id must not be empty".to_string(),
        }));
    }
    Ok(())
}

pub async fn evaluate_handler(
    State(app_state): AppState,
    Json(params): Json<EntitlementParams>,
) -> Result<Json<EntitlementDecision>, Error> {
    validate_user_id(&params.user_id)?;
    let feature = parse_feature(&params.feature)?;

    let decision = app_state
        .evaluator
        .evaluate(&params.user_id, feature)
        .await?;

    counter!(
        "entitlement_evaluations_total",
        "feature" => params.feature.clone(),
        "allowed" => if decision.allowed { "true" } else { "false" }
    )
    .increment(1);

    Ok(Json(decision))
}

pub async fn consume_handler(
    State(app_state): AppState,
    Json(params): Json<EntitlementParams>,
) -> Result<Json<ConsumeDecision>, Error> {
    validate_user_id(&params.user_id)?;
    let feature = parse_feature(&params.feature)?;

    let decision = app_state
        .evaluator
        .consume(&params.user_id, feature)
        .await?;

    counter!(
        "entitlement_consumptions_total",
        "feature" => params.feature.clone(),
        "accepted" => if decision.accepted { "true" } else { "false" }
    )
    .increment(1);

    Ok(Json(decision))
}

pub async fn get_usage_handler(
    State(app_state): AppState,
    Path((user_id, feature_name)): Path<(String, String)>,
) -> Result<Json<UsageRecord>, Error> {
    validate_user_id(&user_id)?;
    let feature = parse_feature(&feature_name)?;

    match app_state.evaluator.get_usage(&user_id, feature).await? {
        Some(record) => Ok(Json(record)),
        None => Err(Error::new(ErrorDetails::UsageNotFound {
            user_id,
            feature: feature_name,
        })),
    }
}
