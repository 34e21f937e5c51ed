//! Error types shared across the socket gateway

/// Convenience alias used throughout the gateway crates.
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Unified error type for the gateway core.
///
/// Connection-scoped variants (`AuthMissing`, `PayloadTooLarge`,
/// `TransportTeardown`) are handled by closing the offending connection.
/// Broker-scoped variants degrade capability and are logged centrally;
/// none of them terminate the process.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("No authentication material present in handshake")]
    AuthMissing,

    #[error("Broker unavailable: {0}")]
    BrokerUnavailable(String),

    #[error("Query collection window elapsed")]
    QueryTimeout,

    #[error("Transport teardown failed: {0}")]
    TransportTeardown(String),

    #[error("Payload of {size} bytes exceeds limit of {limit} bytes")]
    PayloadTooLarge { size: usize, limit: usize },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {message}")]
    ConfigurationError {
        message: String,
        key: Option<String>,
    },
}

impl GatewayError {
    /// True when the error affects a single connection rather than the
    /// broker or the process.
    pub fn is_connection_scoped(&self) -> bool {
        matches!(
            self,
            GatewayError::AuthMissing
                | GatewayError::PayloadTooLarge { .. }
                | GatewayError::TransportTeardown(_)
        )
    }
}
