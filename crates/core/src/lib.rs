//! # Socket Gateway Core
//!
//! Shared building blocks for the socket gateway: configuration loading,
//! the unified error type, health primitives and retry utilities.
//!
//! ## Modules
//!
//! - `config`: Configuration loading and validation
//! - `error`: Error types and handling
//! - `health`: Health status and counter snapshots
//! - `retry`: Exponential backoff retry utilities

pub mod config;
pub mod error;
pub mod health;
pub mod retry;

pub use config::{load_dotenv, ConfigLoader, GatewayConfig, RedisConfig, ServiceConfig};
pub use error::GatewayError;
pub use health::{GatewaySnapshot, HealthStatus};
pub use retry::{retry_with_backoff, RetryPolicy};

/// Result type alias using the gateway error
pub type Result<T> = std::result::Result<T, GatewayError>;
