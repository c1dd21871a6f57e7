use axum::response::{IntoResponse, Json};
use serde_json::json;

pub const SCHOLARGATE_VERSION: &str = env!("CARGO_PKG_VERSION");

pub async fn status_handler() -> impl IntoResponse {
    Json(json!({
        "name": "scholargate",
        "version": SCHOLARGATE_VERSION,
    }))
}

pub async fn health_handler() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}
