//! Configuration loading for the socket gateway services
//!
//! Provides a unified configuration loading system with environment variable
//! parsing, validation, and .env file support. All configuration uses the
//! `SOCKET_GATEWAY_` prefix for environment variables, with common unprefixed
//! fallbacks (`REDIS_URL`, `HOST`, `PORT`, `RUST_LOG`).
//!
//! Override hierarchy: defaults < .env < environment.

use crate::error::GatewayError;
use std::time::Duration;
use url::Url;

/// Configuration loader trait
///
/// Standardized methods for loading and validating configuration from
/// environment variables.
pub trait ConfigLoader: Sized {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigurationError` if required variables are missing or
    /// cannot be parsed.
    fn from_env() -> Result<Self, GatewayError>;

    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigurationError` if any validation check fails.
    fn validate(&self) -> Result<(), GatewayError>;
}

/// Redis broker configuration
///
/// # Environment Variables
///
/// - `SOCKET_GATEWAY_REDIS_URL` (falls back to `REDIS_URL`, default
///   `redis://localhost:6379/0`)
/// - `SOCKET_GATEWAY_REDIS_CONNECTION_TIMEOUT` (seconds, default: 10)
/// - `SOCKET_GATEWAY_REDIS_RESPONSE_TIMEOUT` (seconds, default: 5)
#[derive(Debug, Clone)]
pub struct RedisConfig {
    /// Redis connection URL
    pub url: String,
    /// Connection timeout duration
    pub connection_timeout: Duration,
    /// Response timeout duration
    pub response_timeout: Duration,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379/0".to_string(),
            connection_timeout: Duration::from_secs(10),
            response_timeout: Duration::from_secs(5),
        }
    }
}

impl ConfigLoader for RedisConfig {
    fn from_env() -> Result<Self, GatewayError> {
        let url = std::env::var("SOCKET_GATEWAY_REDIS_URL")
            .or_else(|_| std::env::var("REDIS_URL"))
            .unwrap_or_else(|_| RedisConfig::default().url);

        let connection_timeout_secs =
            parse_env_var("SOCKET_GATEWAY_REDIS_CONNECTION_TIMEOUT", 10u64)?;
        let response_timeout_secs = parse_env_var("SOCKET_GATEWAY_REDIS_RESPONSE_TIMEOUT", 5u64)?;

        Ok(Self {
            url,
            connection_timeout: Duration::from_secs(connection_timeout_secs),
            response_timeout: Duration::from_secs(response_timeout_secs),
        })
    }

    fn validate(&self) -> Result<(), GatewayError> {
        Url::parse(&self.url).map_err(|e| GatewayError::ConfigurationError {
            message: format!("Invalid REDIS_URL: {}", e),
            key: Some("SOCKET_GATEWAY_REDIS_URL".to_string()),
        })?;

        if self.connection_timeout.as_secs() == 0 {
            return Err(GatewayError::ConfigurationError {
                message: "connection_timeout must be greater than 0 seconds".to_string(),
                key: Some("SOCKET_GATEWAY_REDIS_CONNECTION_TIMEOUT".to_string()),
            });
        }

        if self.response_timeout.as_secs() == 0 {
            return Err(GatewayError::ConfigurationError {
                message: "response_timeout must be greater than 0 seconds".to_string(),
                key: Some("SOCKET_GATEWAY_REDIS_RESPONSE_TIMEOUT".to_string()),
            });
        }

        Ok(())
    }
}

/// HTTP service configuration
///
/// # Environment Variables
///
/// - `SOCKET_GATEWAY_SERVICE_HOST` (falls back to `HOST`, default "0.0.0.0")
/// - `SOCKET_GATEWAY_SERVICE_PORT` (falls back to `PORT`, default: 8084)
/// - `SOCKET_GATEWAY_SERVICE_LOG_LEVEL` (falls back to `RUST_LOG`, default "info")
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Service bind host
    pub host: String,
    /// Service bind port
    pub port: u16,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8084,
            log_level: "info".to_string(),
        }
    }
}

impl ConfigLoader for ServiceConfig {
    fn from_env() -> Result<Self, GatewayError> {
        let host = std::env::var("SOCKET_GATEWAY_SERVICE_HOST")
            .or_else(|_| std::env::var("HOST"))
            .unwrap_or_else(|_| ServiceConfig::default().host);

        let port = parse_env_var_with_fallback(
            "SOCKET_GATEWAY_SERVICE_PORT",
            "PORT",
            ServiceConfig::default().port,
        )?;

        let log_level = std::env::var("SOCKET_GATEWAY_SERVICE_LOG_LEVEL")
            .or_else(|_| std::env::var("RUST_LOG"))
            .unwrap_or_else(|_| ServiceConfig::default().log_level);

        Ok(Self {
            host,
            port,
            log_level,
        })
    }

    fn validate(&self) -> Result<(), GatewayError> {
        if self.port == 0 {
            return Err(GatewayError::ConfigurationError {
                message: "port must be greater than 0".to_string(),
                key: Some("SOCKET_GATEWAY_SERVICE_PORT".to_string()),
            });
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(GatewayError::ConfigurationError {
                message: format!(
                    "Invalid log_level '{}'. Must be one of: {}",
                    self.log_level,
                    valid_log_levels.join(", ")
                ),
                key: Some("SOCKET_GATEWAY_SERVICE_LOG_LEVEL".to_string()),
            });
        }

        Ok(())
    }
}

/// Cluster routing configuration
///
/// # Environment Variables
///
/// - `SOCKET_GATEWAY_REQUEST_TIMEOUT_MS`: bound on query/ack collection
///   windows (default: 5000)
/// - `SOCKET_GATEWAY_CHANNEL_PREFIX`: broker channel namespacing, keeps
///   unrelated deployments from colliding on a shared broker
///   (default: "socket-gateway")
/// - `SOCKET_GATEWAY_MAX_PAYLOAD_BYTES`: hard cap on a single message or
///   frame, oversize payloads are rejected at the transport boundary
///   (default: 1 MiB)
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// How long a cluster query waits for per-process answers
    pub request_timeout: Duration,
    /// Broker channel key prefix
    pub channel_prefix: String,
    /// Maximum size of a single message or frame
    pub max_payload_bytes: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_millis(5000),
            channel_prefix: "socket-gateway".to_string(),
            max_payload_bytes: 1024 * 1024,
        }
    }
}

impl ConfigLoader for GatewayConfig {
    fn from_env() -> Result<Self, GatewayError> {
        let request_timeout_ms = parse_env_var("SOCKET_GATEWAY_REQUEST_TIMEOUT_MS", 5000u64)?;

        let channel_prefix = std::env::var("SOCKET_GATEWAY_CHANNEL_PREFIX")
            .unwrap_or_else(|_| GatewayConfig::default().channel_prefix);

        let max_payload_bytes = parse_env_var(
            "SOCKET_GATEWAY_MAX_PAYLOAD_BYTES",
            GatewayConfig::default().max_payload_bytes,
        )?;

        Ok(Self {
            request_timeout: Duration::from_millis(request_timeout_ms),
            channel_prefix,
            max_payload_bytes,
        })
    }

    fn validate(&self) -> Result<(), GatewayError> {
        if self.request_timeout.as_millis() == 0 {
            return Err(GatewayError::ConfigurationError {
                message: "request_timeout must be greater than 0 ms".to_string(),
                key: Some("SOCKET_GATEWAY_REQUEST_TIMEOUT_MS".to_string()),
            });
        }

        if self.channel_prefix.is_empty() {
            return Err(GatewayError::ConfigurationError {
                message: "channel_prefix must not be empty".to_string(),
                key: Some("SOCKET_GATEWAY_CHANNEL_PREFIX".to_string()),
            });
        }

        if self.channel_prefix.contains('#') {
            return Err(GatewayError::ConfigurationError {
                message: "channel_prefix must not contain '#'".to_string(),
                key: Some("SOCKET_GATEWAY_CHANNEL_PREFIX".to_string()),
            });
        }

        if self.max_payload_bytes == 0 {
            return Err(GatewayError::ConfigurationError {
                message: "max_payload_bytes must be greater than 0".to_string(),
                key: Some("SOCKET_GATEWAY_MAX_PAYLOAD_BYTES".to_string()),
            });
        }

        Ok(())
    }
}

/// Helper to parse an environment variable with a default value.
///
/// # Errors
///
/// Returns a `ConfigurationError` if the value is set but cannot be parsed.
fn parse_env_var<T>(key: &str, default: T) -> Result<T, GatewayError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    std::env::var(key)
        .ok()
        .map(|v| {
            v.parse::<T>()
                .map_err(|e| GatewayError::ConfigurationError {
                    message: format!("Failed to parse {}: {}", key, e),
                    key: Some(key.to_string()),
                })
        })
        .unwrap_or(Ok(default))
}

/// Like `parse_env_var`, but consults an unprefixed fallback variable when
/// the primary one is unset.
///
/// # Errors
///
/// Returns a `ConfigurationError` if the consulted value cannot be parsed.
fn parse_env_var_with_fallback<T>(key: &str, fallback: &str, default: T) -> Result<T, GatewayError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let (name, raw) = match std::env::var(key) {
        Ok(value) => (key, Some(value)),
        Err(_) => (fallback, std::env::var(fallback).ok()),
    };

    match raw {
        Some(value) => value
            .parse::<T>()
            .map_err(|e| GatewayError::ConfigurationError {
                message: format!("Failed to parse {}: {}", name, e),
                key: Some(name.to_string()),
            }),
        None => Ok(default),
    }
}

/// Load a .env file if present.
///
/// Does not fail when the file is absent.
pub fn load_dotenv() {
    if let Err(e) = dotenvy::dotenv() {
        if !e.to_string().contains("not found") {
            eprintln!("Warning: Failed to load .env file: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    fn set_test_env(key: &str, value: &str) {
        env::set_var(key, value);
    }

    fn clear_test_env(key: &str) {
        env::remove_var(key);
    }

    #[test]
    fn test_redis_config_default() {
        let config = RedisConfig::default();
        assert_eq!(config.url, "redis://localhost:6379/0");
        assert_eq!(config.connection_timeout, Duration::from_secs(10));
        assert_eq!(config.response_timeout, Duration::from_secs(5));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_redis_config_from_env() {
        set_test_env("SOCKET_GATEWAY_REDIS_URL", "redis://broker:6379/1");

        let config = RedisConfig::from_env().unwrap();
        assert_eq!(config.url, "redis://broker:6379/1");

        clear_test_env("SOCKET_GATEWAY_REDIS_URL");
    }

    #[test]
    fn test_redis_config_validation_invalid_url() {
        let config = RedisConfig {
            url: "not-a-valid-url".to_string(),
            ..RedisConfig::default()
        };

        let result = config.validate();
        assert!(result.is_err());
        assert!(matches!(
            result.unwrap_err(),
            GatewayError::ConfigurationError { .. }
        ));
    }

    #[test]
    fn test_service_config_default() {
        let config = ServiceConfig::default();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 8084);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_service_config_validation_invalid_log_level() {
        let config = ServiceConfig {
            log_level: "loud".to_string(),
            ..ServiceConfig::default()
        };

        let result = config.validate();
        assert!(result.is_err());
        match result.unwrap_err() {
            GatewayError::ConfigurationError { message, .. } => {
                assert!(message.contains("Invalid log_level"));
            }
            _ => panic!("Expected ConfigurationError"),
        }
    }

    #[test]
    fn test_service_config_validation_zero_port() {
        let config = ServiceConfig {
            port: 0,
            ..ServiceConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_gateway_config_default() {
        let config = GatewayConfig::default();
        assert_eq!(config.request_timeout, Duration::from_millis(5000));
        assert_eq!(config.channel_prefix, "socket-gateway");
        assert_eq!(config.max_payload_bytes, 1024 * 1024);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_gateway_config_from_env() {
        set_test_env("SOCKET_GATEWAY_REQUEST_TIMEOUT_MS", "250");
        set_test_env("SOCKET_GATEWAY_CHANNEL_PREFIX", "staging-gw");

        let config = GatewayConfig::from_env().unwrap();
        assert_eq!(config.request_timeout, Duration::from_millis(250));
        assert_eq!(config.channel_prefix, "staging-gw");

        clear_test_env("SOCKET_GATEWAY_REQUEST_TIMEOUT_MS");
        clear_test_env("SOCKET_GATEWAY_CHANNEL_PREFIX");
    }

    #[test]
    fn test_gateway_config_validation_prefix_with_separator() {
        let config = GatewayConfig {
            channel_prefix: "bad#prefix".to_string(),
            ..GatewayConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_gateway_config_validation_zero_payload_cap() {
        let config = GatewayConfig {
            max_payload_bytes: 0,
            ..GatewayConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_service_config_port_falls_back_to_unprefixed_var() {
        // Both vars live in process-global state, so the fallback and the
        // precedence check run in a single test.
        clear_test_env("SOCKET_GATEWAY_SERVICE_PORT");
        set_test_env("PORT", "9091");

        let config = ServiceConfig::from_env().unwrap();
        assert_eq!(config.port, 9091);

        set_test_env("SOCKET_GATEWAY_SERVICE_PORT", "9100");

        let config = ServiceConfig::from_env().unwrap();
        assert_eq!(config.port, 9100);

        clear_test_env("SOCKET_GATEWAY_SERVICE_PORT");
        clear_test_env("PORT");
    }

    #[test]
    fn test_parse_env_var_with_default() {
        let result: u32 = parse_env_var("SOCKET_GATEWAY_NON_EXISTENT_VAR", 42).unwrap();
        assert_eq!(result, 42);
    }

    #[test]
    fn test_parse_env_var_invalid_value() {
        set_test_env("SOCKET_GATEWAY_TEST_INVALID_VAR", "not-a-number");
        let result: Result<u32, _> = parse_env_var("SOCKET_GATEWAY_TEST_INVALID_VAR", 42);
        assert!(result.is_err());
        clear_test_env("SOCKET_GATEWAY_TEST_INVALID_VAR");
    }
}
