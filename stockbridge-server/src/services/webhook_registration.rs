//! Idempotent webhook registration: ensure the shop delivers the wanted
//! topics to our ingestion endpoint, one subscription row per
//! (store, topic).

use rand::Rng;
use rand::distributions::Alphanumeric;
use sqlx::PgPool;
use tracing::{info, warn};

use super::BoxError;
use crate::crypto::MasterKey;
use crate::db;
use crate::events::bus::EventBus;
use crate::events::{RK_STORE_CONNECTED, StoreConnected};
use crate::shop::ShopClient;

#[derive(Debug, Default, serde::Serialize)]
pub struct RegistrationSummary {
    pub created: u32,
    pub skipped: u32,
}

fn generate_secret() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(32)
        .map(char::from)
        .collect()
}

/// Ensure one shop webhook per (topic, delivery URL) on the store.
///
/// Topics already registered for this exact delivery URL are skipped;
/// the same topic pointed elsewhere gets a fresh subscription. Rows left
/// without an external id by an earlier failed run are retried with their
/// stored secret, so the shop never ends up with two subscriptions for
/// the same registration. On any change, a best-effort `store.connected`
/// event is published.
pub async fn register_webhooks(
    pool: &PgPool,
    master_key: &MasterKey,
    bus: &EventBus,
    store_id: i64,
    delivery_url: &str,
    topics: &[&str],
) -> Result<RegistrationSummary, BoxError> {
    let store = db::stores::find_by_id(pool, store_id)
        .await?
        .ok_or_else(|| format!("store {store_id} not found"))?;
    if !store.is_active {
        return Err(format!("store {store_id} is not active").into());
    }

    let consumer_key = master_key.decrypt_str(&store.consumer_key_encrypted)?;
    let consumer_secret = master_key.decrypt_str(&store.consumer_secret_encrypted)?;
    let client = ShopClient::new(&store.site_url, consumer_key, consumer_secret, store.verify_ssl)?;

    let mut summary = RegistrationSummary::default();

    for &topic in topics {
        let existing =
            db::webhooks::find_by_store_topic_url(pool, store_id, topic, delivery_url).await?;

        let (webhook_id, secret) = match existing {
            Some(row) if !row.external_webhook_id.is_empty() => {
                summary.skipped += 1;
                continue;
            }
            // Row exists but the shop-side registration never completed.
            Some(row) => {
                let secret = master_key.decrypt_str(&row.secret_encrypted)?;
                (row.id, secret)
            }
            None => {
                let secret = generate_secret();
                let id = db::webhooks::insert(
                    pool,
                    store_id,
                    topic,
                    delivery_url,
                    &master_key.encrypt_str(&secret)?,
                )
                .await?;
                (id, secret)
            }
        };

        let name = format!("StockBridge {topic}");
        let external_id = client
            .create_webhook(&name, topic, delivery_url, &secret)
            .await?;
        db::webhooks::set_external_id(pool, webhook_id, &external_id).await?;

        info!(store_id, topic, external_id = %external_id, "webhook registered");
        summary.created += 1;
    }

    if summary.created > 0 {
        let event = StoreConnected::new(store.id, store.tenant_id, store.site_url.clone());
        if let Err(e) = bus.publish(RK_STORE_CONNECTED, &event).await {
            warn!(store_id, error = %e, "store.connected publish failed");
        }
    }

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secrets_are_long_random_alphanumeric() {
        let a = generate_secret();
        let b = generate_secret();
        assert_eq!(a.len(), 32);
        assert_ne!(a, b);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
    }
}
