pub mod config;
pub mod db;
pub mod error;
pub mod idempotency;
pub mod models;
pub mod observability;

pub use error::{IdempotencyError, Result};
