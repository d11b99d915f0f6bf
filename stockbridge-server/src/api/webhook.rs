//! Shop webhook ingestion.
//!
//! Verification runs over the raw request bytes exactly as delivered; the
//! body is never re-parsed or re-serialized before the HMAC check.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::{error, info, warn};

use super::WEBHOOK_PATH;
use crate::db;
use crate::db::webhooks::StoreWebhook;
use crate::events::{RK_WEBHOOK_RECEIVED, SubscriptionRef, WebhookReceived};
use crate::state::AppState;

/// Shop-assigned subscription id, echoed on every delivery.
const HDR_WEBHOOK_ID: &str = "webhook-id";
/// Base64 HMAC-SHA256 of the raw body.
const HDR_SIGNATURE: &str = "signature";
/// Optional topic override; the stored subscription topic otherwise.
const HDR_TOPIC: &str = "topic";

pub async fn receive_shop_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    let subscription = match resolve_subscription(&state, &headers).await {
        Ok(Some(row)) => row,
        Ok(None) => {
            warn!("webhook delivery matched no subscription");
            return StatusCode::NOT_FOUND;
        }
        Err(e) => {
            error!(error = %e, "subscription lookup failed");
            return StatusCode::INTERNAL_SERVER_ERROR;
        }
    };

    let secret = match state.master_key.decrypt_str(&subscription.secret_encrypted) {
        Ok(s) => s,
        Err(e) => {
            error!(subscription_id = subscription.id, error = %e, "webhook secret decrypt failed");
            return StatusCode::INTERNAL_SERVER_ERROR;
        }
    };

    let Some(signature) = headers.get(HDR_SIGNATURE).and_then(|v| v.to_str().ok()) else {
        warn!(subscription_id = subscription.id, "delivery missing signature header");
        return StatusCode::UNAUTHORIZED;
    };
    if !verify_signature(&secret, &body, signature) {
        warn!(subscription_id = subscription.id, "webhook signature mismatch");
        return StatusCode::UNAUTHORIZED;
    }

    // Non-JSON bodies are carried through as a string payload.
    let payload = serde_json::from_slice(&body)
        .unwrap_or_else(|_| serde_json::Value::String(String::from_utf8_lossy(&body).into_owned()));

    let topic = headers
        .get(HDR_TOPIC)
        .and_then(|v| v.to_str().ok())
        .filter(|t| !t.is_empty())
        .unwrap_or(&subscription.topic)
        .to_string();

    let envelope = WebhookReceived::new(
        SubscriptionRef {
            id: subscription.id,
            external_webhook_id: subscription.external_webhook_id.clone(),
            topic: subscription.topic.clone(),
            delivery_url: subscription.delivery_url.clone(),
        },
        topic,
        payload,
    );

    // The delivery is already verified; a broker outage must not make the
    // shop re-send it with the same outcome forever.
    if let Err(e) = state.bus.publish(RK_WEBHOOK_RECEIVED, &envelope).await {
        warn!(subscription_id = subscription.id, error = %e, "envelope publish failed");
    }

    if let Err(e) = db::webhooks::touch_delivered(&state.pool, subscription.id).await {
        warn!(subscription_id = subscription.id, error = %e, "last_delivered_at update failed");
    }

    info!(
        subscription_id = subscription.id,
        topic = %subscription.topic,
        bytes = body.len(),
        "webhook accepted"
    );
    StatusCode::OK
}

/// Shop-assigned id header first; otherwise match the URL this delivery
/// was addressed to against registered delivery URLs.
async fn resolve_subscription(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<Option<StoreWebhook>, sqlx::Error> {
    if let Some(id) = headers.get(HDR_WEBHOOK_ID).and_then(|v| v.to_str().ok())
        && !id.is_empty()
        && let Some(row) = db::webhooks::find_by_external_id(&state.pool, id).await?
    {
        return Ok(Some(row));
    }

    let candidates = public_url_candidates(headers, WEBHOOK_PATH);
    if candidates.is_empty() {
        return Ok(None);
    }
    db::webhooks::find_by_delivery_urls(&state.pool, &candidates).await
}

/// Reconstruct the public URL of this request behind a proxy. Host and
/// path must match a registered delivery URL exactly; only the scheme is
/// allowed to differ, so both variants are returned.
fn public_url_candidates(headers: &HeaderMap, path: &str) -> Vec<String> {
    let Some(host) = headers.get("host").and_then(|v| v.to_str().ok()) else {
        return Vec::new();
    };
    let proto = headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("https");
    let other = if proto == "https" { "http" } else { "https" };
    vec![
        format!("{proto}://{host}{path}"),
        format!("{other}://{host}{path}"),
    ]
}

/// Constant-time check of `base64(hmac_sha256(secret, body))`.
fn verify_signature(secret: &str, body: &[u8], signature_b64: &str) -> bool {
    let Ok(expected) = base64::engine::general_purpose::STANDARD.decode(signature_b64.trim())
    else {
        return false;
    };
    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(secret: &str, body: &[u8]) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes())
    }

    #[test]
    fn accepts_valid_signature() {
        let body = br#"{"id":501,"total":"59.98"}"#;
        let sig = sign("wh-secret", body);
        assert!(verify_signature("wh-secret", body, &sig));
    }

    #[test]
    fn rejects_tampered_body_and_wrong_secret() {
        let body = br#"{"id":501}"#;
        let sig = sign("wh-secret", body);
        assert!(!verify_signature("wh-secret", br#"{"id":502}"#, &sig));
        assert!(!verify_signature("other-secret", body, &sig));
    }

    #[test]
    fn rejects_garbage_signature() {
        assert!(!verify_signature("wh-secret", b"body", "!!not base64!!"));
        assert!(!verify_signature("wh-secret", b"body", ""));
    }

    #[test]
    fn url_candidates_cover_both_schemes() {
        let mut headers = HeaderMap::new();
        headers.insert("host", "bridge.example.com".parse().unwrap());
        headers.insert("x-forwarded-proto", "https".parse().unwrap());

        let candidates = public_url_candidates(&headers, "/webhooks/shop");
        assert_eq!(
            candidates,
            vec![
                "https://bridge.example.com/webhooks/shop".to_string(),
                "http://bridge.example.com/webhooks/shop".to_string(),
            ]
        );
    }

    #[test]
    fn url_candidates_empty_without_host() {
        assert!(public_url_candidates(&HeaderMap::new(), "/webhooks/shop").is_empty());
    }
}
