use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;

use scholargate_internal::config_parser::Config;
use scholargate_internal::endpoints;
use scholargate_internal::gateway_util::AppStateData;

/// Serve a gateway with the given config on an ephemeral port.
pub async fn start_gateway(config_toml: &str) -> SocketAddr {
    let config = Arc::new(Config::load_from_str(config_toml).unwrap());
    let app_state = AppStateData::new(config).await.unwrap();

    let router = Router::new()
        .route(
            "/v1/entitlements/evaluate",
            post(endpoints::entitlements::evaluate_handler),
        )
        .route(
            "/v1/entitlements/consume",
            post(endpoints::entitlements::consume_handler),
        )
        .route(
            "/v1/usage/{user_id}/{feature}",
            get(endpoints::entitlements::get_usage_handler),
        )
        .route("/status", get(endpoints::status::status_handler))
        .route("/health", get(endpoints::status::health_handler))
        .fallback(endpoints::fallback::handle_404)
        .with_state(app_state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

pub fn url(addr: SocketAddr, path: &str) -> String {
    format!("http://{addr}{path}")
}
