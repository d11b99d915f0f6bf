//! Business logic between the HTTP/bus edges and the database.

pub mod order_service;
pub mod product_sync;
pub mod webhook_registration;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;
