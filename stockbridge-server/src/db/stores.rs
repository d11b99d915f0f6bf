use sqlx::PgPool;

#[derive(Debug, sqlx::FromRow)]
pub struct Store {
    pub id: i64,
    pub tenant_id: i64,
    pub name: String,
    pub site_url: String,
    pub consumer_key_encrypted: String,
    pub consumer_secret_encrypted: String,
    pub verify_ssl: bool,
    pub is_active: bool,
}

pub async fn find_by_id(pool: &PgPool, id: i64) -> Result<Option<Store>, sqlx::Error> {
    sqlx::query_as::<_, Store>(
        "SELECT id, tenant_id, name, site_url, consumer_key_encrypted,
            consumer_secret_encrypted, verify_ssl, is_active
            FROM stores WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await
}

/// The store product pushes go to. One active store per tenant is the
/// operating assumption; the oldest wins if there are several.
pub async fn find_active_for_tenant(
    pool: &PgPool,
    tenant_id: i64,
) -> Result<Option<Store>, sqlx::Error> {
    sqlx::query_as::<_, Store>(
        "SELECT id, tenant_id, name, site_url, consumer_key_encrypted,
            consumer_secret_encrypted, verify_ssl, is_active
            FROM stores
            WHERE tenant_id = $1 AND is_active
            ORDER BY id LIMIT 1",
    )
    .bind(tenant_id)
    .fetch_optional(pool)
    .await
}

pub async fn touch_last_synced(pool: &PgPool, id: i64) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE stores SET last_synced_at = now() WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}
