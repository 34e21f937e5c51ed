//! Publish/subscribe broker abstraction
//!
//! The broker fans byte payloads out to every process subscribed to a
//! channel. Delivery is at-most-once per physical receipt and the broker
//! may duplicate messages; consumers treat duplicates as idempotent no-ops.
//!
//! The Redis implementation keeps two separate broker connections, one for
//! publishing and one for subscribing. A single connection cannot publish
//! while blocked waiting for subscription callbacks without starving one
//! side, so the split is a hard requirement, not a style choice.

pub mod memory;
pub mod redis;

use async_trait::async_trait;
use socket_gateway_core::error::GatewayError;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

pub use memory::MemoryBroker;
pub use redis::RedisPubSub;

/// Handler invoked once per received payload on a subscribed channel.
pub type MessageHandler = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// Thin abstraction over the pub/sub broker.
#[async_trait]
pub trait PubSubChannel: Send + Sync {
    /// Publish a payload to a channel.
    ///
    /// # Errors
    ///
    /// `GatewayError::BrokerUnavailable` when the broker cannot be reached.
    async fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<(), GatewayError>;

    /// Register a handler for a channel. Handlers persist for the life of
    /// the broker client and survive reconnects.
    async fn subscribe(&self, channel: &str, handler: MessageHandler)
        -> Result<(), GatewayError>;

    /// Whether the broker link is currently up.
    fn is_connected(&self) -> bool;
}

/// Broker-side counters feeding the health snapshot.
#[derive(Debug, Default)]
pub struct BrokerStats {
    errors: AtomicU64,
    connected: AtomicBool,
}

impl BrokerStats {
    pub fn new() -> Self {
        Self {
            errors: AtomicU64::new(0),
            connected: AtomicBool::new(false),
        }
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Relaxed);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }
}
