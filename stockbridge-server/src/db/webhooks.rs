use sqlx::PgPool;

/// A webhook subscription registered on a remote shop. `secret_encrypted`
/// is an AES-GCM blob; decrypt it with the master key before verifying
/// signatures.
#[derive(Debug, sqlx::FromRow)]
pub struct StoreWebhook {
    pub id: i64,
    pub store_id: i64,
    pub external_webhook_id: String,
    pub topic: String,
    pub delivery_url: String,
    pub secret_encrypted: String,
    pub is_active: bool,
}

const COLUMNS: &str =
    "id, store_id, external_webhook_id, topic, delivery_url, secret_encrypted, is_active";

/// Primary lookup path: the remote shop echoes the webhook id it assigned
/// at registration time in a delivery header.
pub async fn find_by_external_id(
    pool: &PgPool,
    external_webhook_id: &str,
) -> Result<Option<StoreWebhook>, sqlx::Error> {
    sqlx::query_as::<_, StoreWebhook>(&format!(
        "SELECT {COLUMNS} FROM store_webhooks
            WHERE external_webhook_id = $1 AND is_active"
    ))
    .bind(external_webhook_id)
    .fetch_optional(pool)
    .await
}

/// Fallback lookup by delivery URL. Callers pass every URL form the
/// delivery could have been addressed to (http and https variants).
pub async fn find_by_delivery_urls(
    pool: &PgPool,
    urls: &[String],
) -> Result<Option<StoreWebhook>, sqlx::Error> {
    sqlx::query_as::<_, StoreWebhook>(&format!(
        "SELECT {COLUMNS} FROM store_webhooks
            WHERE delivery_url = ANY($1) AND is_active
            ORDER BY id LIMIT 1"
    ))
    .bind(urls)
    .fetch_optional(pool)
    .await
}

/// Registration identity: one subscription per (store, topic, delivery
/// URL). The same topic pointed at a different URL is a distinct
/// subscription, not a duplicate.
pub async fn find_by_store_topic_url(
    pool: &PgPool,
    store_id: i64,
    topic: &str,
    delivery_url: &str,
) -> Result<Option<StoreWebhook>, sqlx::Error> {
    sqlx::query_as::<_, StoreWebhook>(&format!(
        "SELECT {COLUMNS} FROM store_webhooks
            WHERE store_id = $1 AND topic = $2 AND delivery_url = $3"
    ))
    .bind(store_id)
    .bind(topic)
    .bind(delivery_url)
    .fetch_optional(pool)
    .await
}

/// Tenant owning the store a subscription belongs to.
pub async fn tenant_for(pool: &PgPool, webhook_id: i64) -> Result<Option<i64>, sqlx::Error> {
    let row: Option<(i64,)> = sqlx::query_as(
        "SELECT s.tenant_id FROM store_webhooks w
            JOIN stores s ON s.id = w.store_id
            WHERE w.id = $1",
    )
    .bind(webhook_id)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(|r| r.0))
}

pub async fn insert(
    pool: &PgPool,
    store_id: i64,
    topic: &str,
    delivery_url: &str,
    secret_encrypted: &str,
) -> Result<i64, sqlx::Error> {
    let (id,): (i64,) = sqlx::query_as(
        "INSERT INTO store_webhooks (store_id, topic, delivery_url, secret_encrypted)
            VALUES ($1, $2, $3, $4)
            RETURNING id",
    )
    .bind(store_id)
    .bind(topic)
    .bind(delivery_url)
    .bind(secret_encrypted)
    .fetch_one(pool)
    .await?;
    Ok(id)
}

/// Record the id the remote shop assigned once registration succeeds.
pub async fn set_external_id(
    pool: &PgPool,
    id: i64,
    external_webhook_id: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE store_webhooks SET external_webhook_id = $1 WHERE id = $2")
        .bind(external_webhook_id)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn touch_delivered(pool: &PgPool, id: i64) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE store_webhooks SET last_delivered_at = now() WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Requires PostgreSQL with the migrations applied.
#[cfg(test)]
mod pg_tests {
    use super::*;

    async fn pool() -> PgPool {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
        PgPool::connect(&url).await.expect("connect")
    }

    async fn seed_store(pool: &PgPool) -> i64 {
        let (tenant_id,): (i64,) =
            sqlx::query_as("INSERT INTO tenants (name) VALUES ('t') RETURNING id")
                .fetch_one(pool)
                .await
                .unwrap();
        let (store_id,): (i64,) = sqlx::query_as(
            "INSERT INTO stores (tenant_id, name, site_url,
                consumer_key_encrypted, consumer_secret_encrypted)
                VALUES ($1, 's', 'https://shop.example.com', 'ck', 'cs')
                RETURNING id",
        )
        .bind(tenant_id)
        .fetch_one(pool)
        .await
        .unwrap();
        store_id
    }

    #[tokio::test]
    #[ignore = "Requires PostgreSQL"]
    async fn same_topic_different_url_is_a_distinct_subscription() {
        let pool = pool().await;
        let store_id = seed_store(&pool).await;
        let url_a = "https://a.example.com/webhooks/shop";
        let url_b = "https://b.example.com/webhooks/shop";

        let id = insert(&pool, store_id, "order.created", url_a, "enc").await.unwrap();

        let hit = find_by_store_topic_url(&pool, store_id, "order.created", url_a)
            .await
            .unwrap();
        assert_eq!(hit.map(|w| w.id), Some(id));

        // The same topic pointed at another URL must not be mistaken for
        // an existing registration.
        let miss = find_by_store_topic_url(&pool, store_id, "order.created", url_b)
            .await
            .unwrap();
        assert!(miss.is_none());
    }
}
