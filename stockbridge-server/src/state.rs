//! Shared application state.

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::info;

use crate::config::Config;
use crate::crypto::MasterKey;
use crate::events::bus::EventBus;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub bus: EventBus,
    pub master_key: MasterKey,
    pub service_token: String,
    pub webhook_delivery_url: Option<String>,
}

impl AppState {
    /// Connect to PostgreSQL, run migrations, and build the (not yet
    /// connected) bus client.
    pub async fn new(config: &Config) -> Result<Self, Box<dyn std::error::Error>> {
        let master_key = MasterKey::from_base64(&config.master_key_b64)?;

        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(&config.database_url)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        info!("database connected, migrations applied");

        let bus = EventBus::new(config.amqp_url.clone(), config.reconnect_wait);

        Ok(Self {
            pool,
            bus,
            master_key,
            service_token: config.service_token.clone(),
            webhook_delivery_url: config.webhook_delivery_url.clone(),
        })
    }
}
