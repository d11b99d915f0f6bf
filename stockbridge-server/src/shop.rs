//! REST client for the remote shop platform (WooCommerce-compatible API).
//!
//! One client per store, built from the store's decrypted consumer
//! key/secret. Stores behind self-signed certificates set
//! `verify_ssl = false`, which maps to accepting invalid certs here.

use std::time::Duration;

use serde_json::Value;
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum ShopError {
    #[error("shop request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("shop returned {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("shop response missing field `{0}`")]
    MissingField(&'static str),
}

pub struct ShopClient {
    http: reqwest::Client,
    base: String,
    consumer_key: String,
    consumer_secret: String,
}

impl ShopClient {
    pub fn new(
        site_url: &str,
        consumer_key: String,
        consumer_secret: String,
        verify_ssl: bool,
    ) -> Result<Self, ShopError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .danger_accept_invalid_certs(!verify_ssl)
            .build()?;
        Ok(Self {
            http,
            base: format!("{}/wp-json/wc/v3", site_url.trim_end_matches('/')),
            consumer_key,
            consumer_secret,
        })
    }

    async fn send(&self, req: reqwest::RequestBuilder) -> Result<Value, ShopError> {
        let resp = req
            .basic_auth(&self.consumer_key, Some(&self.consumer_secret))
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ShopError::Status { status, body });
        }
        Ok(resp.json().await?)
    }

    /// Create a product on the shop; returns the id the shop assigned.
    pub async fn create_product(&self, payload: &Value) -> Result<i64, ShopError> {
        let url = format!("{}/products", self.base);
        debug!(%url, "creating shop product");
        let body = self.send(self.http.post(&url).json(payload)).await?;
        body["id"]
            .as_i64()
            .ok_or(ShopError::MissingField("id"))
    }

    /// Update an existing shop product in place.
    pub async fn update_product(
        &self,
        external_product_id: i64,
        payload: &Value,
    ) -> Result<(), ShopError> {
        let url = format!("{}/products/{external_product_id}", self.base);
        debug!(%url, "updating shop product");
        self.send(self.http.put(&url).json(payload)).await?;
        Ok(())
    }

    /// Register a webhook subscription; returns the shop-assigned id.
    pub async fn create_webhook(
        &self,
        name: &str,
        topic: &str,
        delivery_url: &str,
        secret: &str,
    ) -> Result<String, ShopError> {
        let url = format!("{}/webhooks", self.base);
        debug!(%url, topic, "registering shop webhook");
        let body = self
            .send(self.http.post(&url).json(&serde_json::json!({
                "name": name,
                "topic": topic,
                "delivery_url": delivery_url,
                "secret": secret,
            })))
            .await?;

        // Woo returns the id as a number.
        match &body["id"] {
            Value::Number(n) => Ok(n.to_string()),
            Value::String(s) => Ok(s.clone()),
            _ => Err(ShopError::MissingField("id")),
        }
    }
}
