//! # JSON-RPC Client Prelude
//!
//! ```rust
//! use turul_jsonrpc_client::prelude::*;
//! ```

pub use crate::client::{JsonRpcClient, JsonRpcClientBuilder};
pub use crate::config::ClientConfig;
pub use crate::continuation::Continuation;
pub use crate::pool::{ConnectionFactory, ConnectionPool, PoolError, PooledConnection};
pub use crate::ClientResult;

pub use turul_jsonrpc_connector::prelude::*;
