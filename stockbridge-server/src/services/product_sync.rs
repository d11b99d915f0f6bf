//! Push a local product to the tenant's shop catalog, creating or
//! updating the remote product and recording the mapping.

use serde_json::{Value, json};
use sqlx::PgPool;
use tracing::info;

use super::BoxError;
use crate::crypto::MasterKey;
use crate::db;
use crate::db::products::Product;
use crate::shop::ShopClient;

/// Shop-side product representation. Money amounts go over the wire as
/// strings with two decimals.
pub fn build_payload(product: &Product) -> Value {
    let mut payload = json!({
        "name": product.name,
        "type": "simple",
        "sku": product.sku,
        "description": product.description,
        "short_description": product.short_description,
        "regular_price": format!("{:.2}", product.regular_price),
        "manage_stock": product.manage_stock,
        "stock_quantity": product.stock_quantity,
    });
    if let Some(sale) = product.sale_price {
        payload["sale_price"] = Value::String(format!("{sale:.2}"));
    }
    payload
}

/// Create or update the product on the tenant's active store. Returns the
/// shop-side product id.
pub async fn sync_product_to_remote(
    pool: &PgPool,
    master_key: &MasterKey,
    product_id: i64,
) -> Result<i64, BoxError> {
    let product = db::products::find_by_id(pool, product_id)
        .await?
        .ok_or_else(|| format!("product {product_id} not found"))?;

    let store = db::stores::find_active_for_tenant(pool, product.tenant_id)
        .await?
        .ok_or_else(|| format!("tenant {} has no active store", product.tenant_id))?;

    let consumer_key = master_key.decrypt_str(&store.consumer_key_encrypted)?;
    let consumer_secret = master_key.decrypt_str(&store.consumer_secret_encrypted)?;
    let client = ShopClient::new(&store.site_url, consumer_key, consumer_secret, store.verify_ssl)?;

    let payload = build_payload(&product);
    let external_product_id = match db::products::external_id_for(pool, product_id).await? {
        Some(external_id) => {
            client.update_product(external_id, &payload).await?;
            external_id
        }
        None => client.create_product(&payload).await?,
    };

    db::products::upsert_mapping(pool, product_id, external_product_id).await?;
    db::stores::touch_last_synced(pool, store.id).await?;

    info!(
        product_id,
        external_product_id,
        store_id = store.id,
        "product synced to shop"
    );
    Ok(external_product_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn product() -> Product {
        Product {
            id: 7,
            tenant_id: 1,
            name: "Widget".to_string(),
            sku: "WID-7".to_string(),
            description: "A widget.".to_string(),
            short_description: "Widget".to_string(),
            regular_price: 19.9,
            sale_price: None,
            manage_stock: true,
            stock_quantity: 10,
        }
    }

    #[test]
    fn payload_formats_prices_as_strings() {
        let payload = build_payload(&product());
        assert_eq!(payload["regular_price"], "19.90");
        assert_eq!(payload["stock_quantity"], 10);
        assert_eq!(payload["manage_stock"], true);
        assert!(payload.get("sale_price").is_none());
    }

    #[test]
    fn payload_includes_sale_price_when_set() {
        let mut p = product();
        p.sale_price = Some(15.0);
        assert_eq!(build_payload(&p)["sale_price"], "15.00");
    }
}
