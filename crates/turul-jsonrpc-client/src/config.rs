//! Configuration types for the JSON-RPC client

use serde::{Deserialize, Serialize};
use std::time::Duration;
use turul_jsonrpc_connector::DispatcherConfig;
use turul_jsonrpc_connector::config::duration_serde;

/// Main client configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ClientConfig {
    /// Client identification information
    pub client_info: ClientInfo,

    /// Outgoing request id generation
    pub request_ids: RequestIdConfig,

    /// Session id propagation
    pub session: SessionConfig,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// Connection pool configuration
    pub pool: PoolConfig,

    /// Dispatch of server-initiated requests
    pub dispatcher: DispatcherConfig,
}

/// Client identification information
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientInfo {
    pub name: String,
    pub version: String,
}

/// Request id generation. Ids are a monotonically increasing counter; with a
/// prefix they are sent as `"{prefix}{n}"` strings instead of integers.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RequestIdConfig {
    pub prefix: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Name of the params member the session id is injected under once
    /// assigned
    pub session_id_param: String,

    /// Whether to inject the session id into outgoing params at all
    pub inject_session_id: bool,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Whether to log outgoing requests at debug level
    pub log_requests: bool,

    /// Whether to log incoming responses at debug level
    pub log_responses: bool,
}

/// Connection pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Maximum number of connections checked out at once
    pub max_size: usize,

    /// How long `acquire` waits for a free slot
    #[serde(with = "duration_serde")]
    pub acquire_timeout: Duration,
}

impl Default for ClientInfo {
    fn default() -> Self {
        Self {
            name: "turul-jsonrpc-client".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session_id_param: "sessionId".to_string(),
            inject_session_id: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_requests: true,
            log_responses: true,
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: 8,
            acquire_timeout: Duration::from_secs(30),
        }
    }
}
