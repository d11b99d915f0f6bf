//! Consumer on `worker.orders`: reconciles order webhooks into the
//! database.
//!
//! Ack/drop rules: malformed envelopes, unhandled topics, unprocessable
//! order payloads, and unresolvable tenants are acknowledged with a log
//! line (redelivery cannot fix them). Only database failures during
//! reconciliation return `Err`, so the message is nacked and redelivered.

use std::sync::Arc;

use futures::future::BoxFuture;
use sqlx::PgPool;
use tracing::{debug, warn};

use super::bus::{EventBus, EventHandler, HandlerError};
use super::{ORDERS_QUEUE, RK_WEBHOOK_RECEIVED, WebhookReceived};
use crate::services::order_service;

pub struct OrderConsumer {
    pool: PgPool,
}

impl OrderConsumer {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Bind the consumer to the orders queue. Called once at startup; the
    /// bus keeps the registration alive across reconnects.
    pub async fn register(bus: &EventBus, pool: PgPool) {
        bus.consume(ORDERS_QUEUE, RK_WEBHOOK_RECEIVED, Arc::new(Self::new(pool)))
            .await;
    }

    async fn process(&self, body: &[u8]) -> Result<(), HandlerError> {
        let envelope: WebhookReceived = match serde_json::from_slice(body) {
            Ok(e) => e,
            Err(e) => {
                warn!(error = %e, "malformed webhook envelope dropped");
                return Ok(());
            }
        };

        match envelope.topic.as_str() {
            "order.created" | "order.updated" => {}
            other => {
                debug!(topic = other, "ignoring unhandled topic");
                return Ok(());
            }
        }

        // Normalize before touching the database: a payload that cannot
        // parse now never will, so nacking it would loop forever.
        let fields = match order_service::OrderFields::from_payload(&envelope.payload) {
            Ok(f) => f,
            Err(e) => {
                warn!(
                    subscription_id = envelope.subscription.id,
                    topic = %envelope.topic,
                    error = %e,
                    "unprocessable order payload dropped"
                );
                return Ok(());
            }
        };

        let Some(tenant_id) =
            crate::db::webhooks::tenant_for(&self.pool, envelope.subscription.id).await?
        else {
            warn!(
                subscription_id = envelope.subscription.id,
                topic = %envelope.topic,
                "cannot resolve tenant for subscription, dropping"
            );
            return Ok(());
        };

        let outcome = order_service::reconcile(&self.pool, tenant_id, &fields).await?;
        debug!(tenant_id, topic = %envelope.topic, ?outcome, "order reconciled");
        Ok(())
    }
}

impl EventHandler for OrderConsumer {
    fn handle<'a>(&'a self, body: &'a [u8]) -> BoxFuture<'a, Result<(), HandlerError>> {
        Box::pin(self.process(body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::SubscriptionRef;
    use serde_json::json;
    use sqlx::postgres::PgPoolOptions;
    use std::time::Duration;

    // No database behind this pool; tests below only exercise paths that
    // must not touch it, or that must surface its failure as retryable.
    fn lazy_pool() -> PgPool {
        PgPoolOptions::new()
            .acquire_timeout(Duration::from_millis(200))
            .connect_lazy("postgres://nobody@127.0.0.1:1/none")
            .expect("lazy pool")
    }

    fn envelope_with(topic: &str, payload: serde_json::Value) -> Vec<u8> {
        let env = WebhookReceived::new(
            SubscriptionRef {
                id: 9,
                external_webhook_id: "41".to_string(),
                topic: topic.to_string(),
                delivery_url: "https://bridge.example.com/webhooks/shop".to_string(),
            },
            topic,
            payload,
        );
        serde_json::to_vec(&env).unwrap()
    }

    fn envelope(topic: &str) -> Vec<u8> {
        envelope_with(topic, json!({"id": 501}))
    }

    #[tokio::test]
    async fn malformed_body_is_dropped_not_retried() {
        let consumer = OrderConsumer::new(lazy_pool());
        assert!(consumer.process(b"{not json").await.is_ok());
        assert!(consumer.process(b"{\"event\": \"other\"}").await.is_ok());
    }

    #[tokio::test]
    async fn unhandled_topic_is_dropped_without_db_access() {
        let consumer = OrderConsumer::new(lazy_pool());
        // Would error if it reached the (unreachable) database.
        assert!(consumer.process(&envelope("product.updated")).await.is_ok());
    }

    #[tokio::test]
    async fn unparsable_order_payload_is_dropped_without_db_access() {
        let consumer = OrderConsumer::new(lazy_pool());
        // A non-JSON webhook body arrives as a string payload; it can
        // never reconcile, so it must be acked instead of requeued.
        let raw = envelope_with("order.created", json!("raw unparsable body"));
        assert!(consumer.process(&raw).await.is_ok());

        let no_id = envelope_with("order.updated", json!({"status": "processing"}));
        assert!(consumer.process(&no_id).await.is_ok());
    }

    #[tokio::test]
    async fn db_failure_on_order_topic_is_retryable() {
        let consumer = OrderConsumer::new(lazy_pool());
        assert!(consumer.process(&envelope("order.created")).await.is_err());
    }
}
