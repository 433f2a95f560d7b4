use axum::{
    Router,
    routing::{get, post},
};
use http::{HeaderName, Method, header::CONTENT_TYPE};
use tower_http::cors::{Any, CorsLayer};

use crate::handlers;
use crate::session::{ACCOUNT_ID_HEADER, SUBSCRIPTION_TIER_HEADER};
use crate::state::AppState;

/// Router の構築
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(handlers::health_check))
        // 利用枠
        .route("/api/usage", get(handlers::get_usage))
        .route("/api/usage/consume", post(handlers::consume_usage))
        // パスワードリセット
        .route(
            "/api/password/reset-request",
            post(handlers::request_password_reset),
        )
        .route("/api/password/reset", post(handlers::reset_password))
        .layer(cors_layer())
        .with_state(state)
}

fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([
            CONTENT_TYPE,
            HeaderName::from_static(ACCOUNT_ID_HEADER),
            HeaderName::from_static(SUBSCRIPTION_TIER_HEADER),
        ])
}
