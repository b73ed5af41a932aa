//! # JSON-RPC Connector Prelude
//!
//! ```rust
//! use turul_jsonrpc_connector::prelude::*;
//! ```

pub use crate::config::DispatcherConfig;
pub use crate::dispatch::JsonRpcHandlerManager;
pub use crate::error::{
    ConnectorResult, HandlerError, JsonRpcConnectorError, JsonRpcErrorObject, ToJsonRpcError,
    TransportError,
};
pub use crate::handler::{JsonRpcHandler, ParamsShape};
pub use crate::message::JsonRpcMessage;
pub use crate::per_session::PerSessionJsonRpcHandler;
pub use crate::request::JsonRpcRequest;
pub use crate::response::JsonRpcResponse;
pub use crate::server::JsonRpcServer;
pub use crate::session::Session;
pub use crate::transaction::Transaction;
pub use crate::transport::{ChannelTransport, ResponseSender, SharedTransport, Transport};
pub use crate::types::RequestId;

pub use crate::error_codes::*;
