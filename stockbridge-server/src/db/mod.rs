//! Database access, one module per table group. Functions take the pool
//! (or an executor when callers need a transaction) and return
//! `sqlx::Error` for the service layer to wrap.

pub mod orders;
pub mod products;
pub mod stores;
pub mod webhooks;
