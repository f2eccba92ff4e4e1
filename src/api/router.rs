use std::sync::Arc;
use std::time::Duration;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use super::handlers;
use super::ApiState;

pub fn create_router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/api/transfer/report", post(handlers::report_transfer))
        .route("/api/quota", get(handlers::list_quotas))
        .route("/api/quota/limits", post(handlers::set_limit))
        .route("/api/quota/thresholds", post(handlers::set_thresholds))
        .route("/api/quota/:account_id", get(handlers::get_quota))
        .route("/api/quota/:account_id/reset", post(handlers::reset_quota))
        .route(
            "/api/activity/counters",
            post(handlers::upsert_activity_counter),
        )
        .route("/api/jobs/aggregation/run", post(handlers::run_aggregation))
        .route("/health", get(handlers::health_check))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
}
