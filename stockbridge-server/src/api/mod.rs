//! HTTP surface: health, webhook ingestion, and worker-facing internal
//! triggers.

mod health;
mod internal;
mod webhook;

use axum::Router;
use axum::routing::{get, post};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Path the shop delivers webhooks to.
pub const WEBHOOK_PATH: &str = "/webhooks/shop";

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route(WEBHOOK_PATH, post(webhook::receive_shop_webhook))
        .route("/internal/products/{id}/sync", post(internal::sync_product))
        .route(
            "/internal/stores/{id}/webhooks",
            post(internal::register_webhooks),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
