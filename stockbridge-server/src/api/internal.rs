//! Worker-facing trigger endpoints, guarded by a shared service token.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde_json::json;
use subtle::ConstantTimeEq;
use tracing::{error, warn};

use crate::services::{product_sync, webhook_registration};
use crate::state::AppState;

const HDR_SERVICE_TOKEN: &str = "x-service-token";

/// Topics registered when the caller does not name any.
const DEFAULT_TOPICS: [&str; 2] = ["order.created", "order.updated"];

fn token_matches(expected: &str, provided: &str) -> bool {
    expected.as_bytes().ct_eq(provided.as_bytes()).into()
}

fn authorize(state: &AppState, headers: &HeaderMap) -> Result<(), StatusCode> {
    let provided = headers
        .get(HDR_SERVICE_TOKEN)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if token_matches(&state.service_token, provided) {
        Ok(())
    } else {
        warn!("internal request with missing or bad service token");
        Err(StatusCode::UNAUTHORIZED)
    }
}

pub async fn sync_product(
    State(state): State<AppState>,
    Path(product_id): Path<i64>,
    headers: HeaderMap,
) -> Response {
    if let Err(status) = authorize(&state, &headers) {
        return status.into_response();
    }

    match product_sync::sync_product_to_remote(&state.pool, &state.master_key, product_id).await {
        Ok(external_product_id) => Json(json!({
            "product_id": product_id,
            "external_product_id": external_product_id,
        }))
        .into_response(),
        Err(e) => {
            error!(product_id, error = %e, "product sync failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct RegisterRequest {
    #[serde(default)]
    pub delivery_url: Option<String>,
    #[serde(default)]
    pub topics: Option<Vec<String>>,
}

pub async fn register_webhooks(
    State(state): State<AppState>,
    Path(store_id): Path<i64>,
    headers: HeaderMap,
    body: Option<Json<RegisterRequest>>,
) -> Response {
    if let Err(status) = authorize(&state, &headers) {
        return status.into_response();
    }
    let req = body.map(|Json(r)| r).unwrap_or_default();

    let Some(delivery_url) = req.delivery_url.or_else(|| state.webhook_delivery_url.clone())
    else {
        return (
            StatusCode::BAD_REQUEST,
            "delivery_url required (no WEBHOOK_DELIVERY_URL configured)",
        )
            .into_response();
    };

    let topics = req
        .topics
        .unwrap_or_else(|| DEFAULT_TOPICS.iter().map(|t| t.to_string()).collect());
    let topic_refs: Vec<&str> = topics.iter().map(String::as_str).collect();

    match webhook_registration::register_webhooks(
        &state.pool,
        &state.master_key,
        &state.bus,
        store_id,
        &delivery_url,
        &topic_refs,
    )
    .await
    {
        Ok(summary) => Json(summary).into_response(),
        Err(e) => {
            error!(store_id, error = %e, "webhook registration failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_compare_requires_exact_match() {
        assert!(token_matches("secret-token", "secret-token"));
        assert!(!token_matches("secret-token", "secret-tokeX"));
        assert!(!token_matches("secret-token", "secret-toke"));
        assert!(!token_matches("secret-token", ""));
    }
}
