use sqlx::PgPool;
use sqlx::postgres::PgExecutor;

#[derive(Debug, sqlx::FromRow)]
pub struct Product {
    pub id: i64,
    pub tenant_id: i64,
    pub name: String,
    pub sku: String,
    pub description: String,
    pub short_description: String,
    pub regular_price: f64,
    pub sale_price: Option<f64>,
    pub manage_stock: bool,
    pub stock_quantity: i64,
}

pub async fn find_by_id(pool: &PgPool, id: i64) -> Result<Option<Product>, sqlx::Error> {
    sqlx::query_as::<_, Product>(
        "SELECT id, tenant_id, name, sku, description, short_description,
            regular_price, sale_price, manage_stock, stock_quantity
            FROM products WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await
}

/// Resolve a shop product id to the local product id via the mapping table.
pub async fn find_id_by_external(
    pool: &PgPool,
    external_product_id: i64,
) -> Result<Option<i64>, sqlx::Error> {
    let row: Option<(i64,)> = sqlx::query_as(
        "SELECT product_id FROM product_mappings WHERE external_product_id = $1",
    )
    .bind(external_product_id)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(|r| r.0))
}

pub async fn external_id_for(
    pool: &PgPool,
    product_id: i64,
) -> Result<Option<i64>, sqlx::Error> {
    let row: Option<(Option<i64>,)> = sqlx::query_as(
        "SELECT external_product_id FROM product_mappings WHERE product_id = $1",
    )
    .bind(product_id)
    .fetch_optional(pool)
    .await?;
    Ok(row.and_then(|r| r.0))
}

pub async fn upsert_mapping(
    pool: &PgPool,
    product_id: i64,
    external_product_id: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO product_mappings (product_id, external_product_id, last_published_at)
            VALUES ($1, $2, now())
            ON CONFLICT (product_id) DO UPDATE SET
                external_product_id = $2, last_published_at = now()",
    )
    .bind(product_id)
    .bind(external_product_id)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn deduct_stock<'e>(
    executor: impl PgExecutor<'e>,
    product_id: i64,
    qty: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE products SET stock_quantity = stock_quantity - $2 WHERE id = $1")
        .bind(product_id)
        .bind(qty)
        .execute(executor)
        .await?;
    Ok(())
}

/// Append a row to the stock movement ledger.
pub async fn insert_movement<'e>(
    executor: impl PgExecutor<'e>,
    product_id: i64,
    change_qty: i64,
    reason: &str,
    reference: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO inventory_movements (product_id, change_qty, reason, reference)
            VALUES ($1, $2, $3, $4)",
    )
    .bind(product_id)
    .bind(change_qty)
    .bind(reason)
    .bind(reference)
    .execute(executor)
    .await?;
    Ok(())
}
