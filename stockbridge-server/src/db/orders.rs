use serde_json::Value;
use sqlx::PgPool;
use sqlx::postgres::PgExecutor;
use uuid::Uuid;

/// Normalized order fields written on both insert and update.
pub struct OrderWrite<'a> {
    pub tenant_id: i64,
    pub external_id: &'a str,
    pub source: &'a str,
    pub status: &'a str,
    pub currency: &'a str,
    pub total: f64,
    pub customer_name: &'a str,
    pub customer_email: &'a str,
    pub billing: &'a Value,
    pub shipping: &'a Value,
    pub line_items: &'a Value,
    pub raw: &'a Value,
}

pub async fn find_id(
    pool: &PgPool,
    external_id: &str,
    source: &str,
) -> Result<Option<Uuid>, sqlx::Error> {
    let row: Option<(Uuid,)> =
        sqlx::query_as("SELECT id FROM orders WHERE external_id = $1 AND source = $2")
            .bind(external_id)
            .bind(source)
            .fetch_optional(pool)
            .await?;
    Ok(row.map(|r| r.0))
}

/// Insert a new order. Returns `None` when another writer already holds
/// (external_id, source); callers fall through to the update path.
pub async fn insert<'e>(
    executor: impl PgExecutor<'e>,
    order: &OrderWrite<'_>,
) -> Result<Option<Uuid>, sqlx::Error> {
    let row: Option<(Uuid,)> = sqlx::query_as(
        "INSERT INTO orders (tenant_id, external_id, source, status, currency, total,
            customer_name, customer_email, billing, shipping, line_items, raw)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (external_id, source) DO NOTHING
            RETURNING id",
    )
    .bind(order.tenant_id)
    .bind(order.external_id)
    .bind(order.source)
    .bind(order.status)
    .bind(order.currency)
    .bind(order.total)
    .bind(order.customer_name)
    .bind(order.customer_email)
    .bind(order.billing)
    .bind(order.shipping)
    .bind(order.line_items)
    .bind(order.raw)
    .fetch_optional(executor)
    .await?;
    Ok(row.map(|r| r.0))
}

/// Last-write-wins refresh of an existing order.
pub async fn update(pool: &PgPool, order: &OrderWrite<'_>) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE orders SET status = $3, currency = $4, total = $5,
            customer_name = $6, customer_email = $7, billing = $8,
            shipping = $9, line_items = $10, raw = $11, updated_at = now()
            WHERE external_id = $1 AND source = $2",
    )
    .bind(order.external_id)
    .bind(order.source)
    .bind(order.status)
    .bind(order.currency)
    .bind(order.total)
    .bind(order.customer_name)
    .bind(order.customer_email)
    .bind(order.billing)
    .bind(order.shipping)
    .bind(order.line_items)
    .bind(order.raw)
    .execute(pool)
    .await?;
    Ok(())
}
