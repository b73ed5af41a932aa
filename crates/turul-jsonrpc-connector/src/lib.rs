//! # JSON-RPC 2.0 Connector
//!
//! Transport-agnostic JSON-RPC 2.0 plumbing shared by both ends of a
//! connection: the message model, sessions, transactions, and dispatch of
//! inbound requests to a single bound handler.
//!
//! ## Features
//! - Requests, notifications and responses with result/error exclusivity
//! - Exactly one response per request with an id, none for notifications
//! - Asynchronous transactions answered after the handler returns
//! - Handlers declare the shape their params are decoded into
//! - Lifecycle callbacks serialized per session, failures funneled to
//!   `handle_uncaught_exception`
//! - Sessions that survive reconnection over a new transport

pub mod config;
pub mod dispatch;
pub mod error;
pub mod handler;
mod lifecycle;
pub mod message;
pub mod per_session;
pub mod prelude;
pub mod request;
pub mod response;
pub mod server;
pub mod session;
pub mod transaction;
pub mod transport;
pub mod types;

// Re-export main types
pub use config::DispatcherConfig;
pub use dispatch::JsonRpcHandlerManager;
pub use error::{
    ConnectorResult, HandlerError, JsonRpcConnectorError, JsonRpcErrorCode, JsonRpcErrorObject,
    ToJsonRpcError, TransportError,
};
pub use handler::{JsonRpcHandler, ParamsShape};
pub use message::{JsonRpcMessage, parse_message};
pub use per_session::PerSessionJsonRpcHandler;
pub use request::JsonRpcRequest;
pub use response::{JsonRpcResponse, ResponsePayload};
pub use server::JsonRpcServer;
pub use session::{Session, SessionKey, SessionRegistry};
pub use transaction::Transaction;
pub use transport::{
    ChannelEndpoint, ChannelTransport, ExchangeResponseSender, ResponseSender,
    SessionResponseSender, SharedTransport, Transport, TransportResponseSender,
};
pub use types::{JsonRpcVersion, RequestId};

/// JSON-RPC 2.0 version constant
pub const JSONRPC_VERSION: &str = "2.0";

/// JSON-RPC 2.0 error codes
pub mod error_codes {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;

    // Server error range: -32099 to -32000
    pub const SERVER_ERROR_START: i64 = -32099;
    pub const SERVER_ERROR_END: i64 = -32000;

    /// An asynchronous transaction was not answered in time, or its last
    /// handle was dropped unanswered
    pub const ASYNC_RESPONSE_TIMEOUT: i64 = -32001;
    /// The connection carrying a pending request went away
    pub const CONNECTION_LOST: i64 = -32002;
}
