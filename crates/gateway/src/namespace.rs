//! Routing namespaces
//!
//! A namespace is a fixed top-level routing domain separating unrelated
//! traffic. The gateway supports exactly two: `default` for general events
//! and `room` for room-scoped events. Cross-namespace broadcast is never
//! permitted; each namespace has its own broker channels.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Namespace {
    Default,
    Room,
}

impl Namespace {
    pub fn as_str(&self) -> &'static str {
        match self {
            Namespace::Default => "default",
            Namespace::Room => "room",
        }
    }

    /// Broker channel carrying broadcast/join/leave traffic for this
    /// namespace.
    pub fn broadcast_channel(&self, prefix: &str) -> String {
        format!("{}#{}#", prefix, self.as_str())
    }

    /// Broker channel carrying cluster query requests for this namespace.
    pub fn request_channel(&self, prefix: &str) -> String {
        format!("{}-request#{}#", prefix, self.as_str())
    }

    /// Broker channel carrying cluster query responses for this namespace.
    pub fn response_channel(&self, prefix: &str) -> String {
        format!("{}-response#{}#", prefix, self.as_str())
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Namespace {
    type Err = UnknownNamespace;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "default" => Ok(Namespace::Default),
            "room" => Ok(Namespace::Room),
            other => Err(UnknownNamespace(other.to_string())),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Unknown namespace: {0}")]
pub struct UnknownNamespace(pub String);
