//! # JSON-RPC 2.0 Client
//!
//! Client side of the connector: outgoing requests correlated with their
//! responses, continuations, session id propagation, reconnection and a
//! scoped connection pool.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use turul_jsonrpc_client::JsonRpcClient;
//! use turul_jsonrpc_connector::ChannelTransport;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let (local, _server_end) = ChannelTransport::pair();
//!     let client = Arc::new(
//!         JsonRpcClient::builder()
//!             .with_transport(local.transport)
//!             .build()?,
//!     );
//!     client.spawn_inbound_loop(local.incoming);
//!     client.connect().await;
//!
//!     let echoed: serde_json::Value = client
//!         .send_request("echo", Some(serde_json::json!({"v": 1})))
//!         .await?;
//!     println!("{}", echoed);
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod config;
pub mod continuation;
pub mod pending;
pub mod pool;
pub mod prelude;
pub mod sender;

pub use client::{JsonRpcClient, JsonRpcClientBuilder};
pub use config::{
    ClientConfig, ClientInfo, LoggingConfig, PoolConfig, RequestIdConfig, SessionConfig,
};
pub use continuation::Continuation;
pub use pending::{PendingCallRegistry, Waiter};
pub use pool::{ConnectionFactory, ConnectionPool, PoolError, PooledConnection};
pub use sender::JsonRpcRequestSender;

/// Result type for client operations
pub type ClientResult<T> = turul_jsonrpc_connector::ConnectorResult<T>;
