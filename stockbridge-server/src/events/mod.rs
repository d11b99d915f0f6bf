//! Internal event pipeline: broker topology, event envelopes, the bus
//! client, and the order reconciliation consumer.

pub mod bus;
pub mod order_consumer;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Durable topic exchange owned by this service.
pub const EXCHANGE_NAME: &str = "stockbridge.events";

/// Routing key for normalized inbound shop webhooks.
pub const RK_WEBHOOK_RECEIVED: &str = "webhook.received";
/// Routing key announcing a newly connected shop store.
pub const RK_STORE_CONNECTED: &str = "store.connected";

/// Durable queue for the order reconciliation worker.
pub const ORDERS_QUEUE: &str = "worker.orders";

/// Source-system tag; half of the order idempotency key.
pub const SOURCE_SHOP: &str = "shop";

/// Identity of the webhook subscription an inbound delivery matched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionRef {
    pub id: i64,
    pub external_webhook_id: String,
    pub topic: String,
    pub delivery_url: String,
}

/// Normalized internal envelope republished for every verified webhook.
///
/// `topic` is the shop-side topic (e.g. `order.created`); consumers
/// dispatch on it and decode `payload` per topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookReceived {
    pub event: String,
    pub version: u32,
    pub timestamp: DateTime<Utc>,
    pub subscription: SubscriptionRef,
    pub topic: String,
    pub payload: serde_json::Value,
}

impl WebhookReceived {
    pub fn new(
        subscription: SubscriptionRef,
        topic: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            event: RK_WEBHOOK_RECEIVED.to_string(),
            version: 1,
            timestamp: Utc::now(),
            subscription,
            topic: topic.into(),
            payload,
        }
    }
}

/// Fired after webhook registration completes for a store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConnected {
    pub event: String,
    pub version: u32,
    pub timestamp: DateTime<Utc>,
    pub store_id: i64,
    pub tenant_id: i64,
    pub site_url: String,
}

impl StoreConnected {
    pub fn new(store_id: i64, tenant_id: i64, site_url: String) -> Self {
        Self {
            event: RK_STORE_CONNECTED.to_string(),
            version: 1,
            timestamp: Utc::now(),
            store_id,
            tenant_id,
            site_url,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn webhook_envelope_wire_shape() {
        let envelope = WebhookReceived::new(
            SubscriptionRef {
                id: 9,
                external_webhook_id: "41".to_string(),
                topic: "order.created".to_string(),
                delivery_url: "https://bridge.example.com/webhooks/shop".to_string(),
            },
            "order.created",
            serde_json::json!({"id": 501}),
        );

        let value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(value["event"], "webhook.received");
        assert_eq!(value["version"], 1);
        assert_eq!(value["subscription"]["id"], 9);
        assert_eq!(value["subscription"]["external_webhook_id"], "41");
        assert_eq!(value["topic"], "order.created");
        assert_eq!(value["payload"]["id"], 501);
        assert!(value["timestamp"].is_string());

        let back: WebhookReceived = serde_json::from_value(value).unwrap();
        assert_eq!(back.subscription.id, 9);
        assert_eq!(back.payload["id"], 501);
    }
}
