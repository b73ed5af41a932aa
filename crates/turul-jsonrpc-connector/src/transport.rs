//! Transport capability consumed by the connector.
//!
//! Establishing connections is the transport layer's job; the connector only
//! needs to hand it encoded messages and a place to write a single response.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::error::TransportError;
use crate::response::JsonRpcResponse;
use crate::session::Session;

/// An open duplex channel carrying encoded JSON-RPC messages
#[async_trait]
pub trait Transport: Send + Sync {
    /// Hand an encoded message to the transport
    async fn send(&self, message: String) -> Result<(), TransportError>;

    /// Close the underlying channel
    async fn close(&self) -> Result<(), TransportError> {
        Ok(())
    }

    fn is_open(&self) -> bool {
        true
    }

    /// Short name for logging
    fn transport_type(&self) -> &'static str {
        "custom"
    }
}

/// Type alias for a shared transport
pub type SharedTransport = Arc<dyn Transport>;

/// Whether two handles point at the same transport instance
pub fn same_transport(a: &SharedTransport, b: &SharedTransport) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

/// Where a transaction writes its single response
#[async_trait]
pub trait ResponseSender: Send + Sync {
    async fn send_response(&self, response: JsonRpcResponse) -> Result<(), TransportError>;
}

/// Response sink writing to a duplex transport
pub struct TransportResponseSender {
    transport: SharedTransport,
}

impl TransportResponseSender {
    pub fn new(transport: SharedTransport) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl ResponseSender for TransportResponseSender {
    async fn send_response(&self, response: JsonRpcResponse) -> Result<(), TransportError> {
        let encoded =
            serde_json::to_string(&response).map_err(|e| TransportError::Encode(e.to_string()))?;
        self.transport.send(encoded).await
    }
}

/// Response sink writing to whatever transport the session is bound to when
/// the response is ready, so answers follow a reconnect
pub struct SessionResponseSender {
    session: Session,
}

impl SessionResponseSender {
    pub fn new(session: Session) -> Self {
        Self { session }
    }
}

#[async_trait]
impl ResponseSender for SessionResponseSender {
    async fn send_response(&self, response: JsonRpcResponse) -> Result<(), TransportError> {
        let transport = self.session.transport().ok_or(TransportError::NotConnected)?;
        TransportResponseSender::new(transport)
            .send_response(response)
            .await
    }
}

/// Response sink for one HTTP request/response exchange. The first response
/// is delivered to the paired receiver; anything after that is refused.
pub struct ExchangeResponseSender {
    slot: Mutex<Option<oneshot::Sender<JsonRpcResponse>>>,
}

impl ExchangeResponseSender {
    pub fn new() -> (Self, oneshot::Receiver<JsonRpcResponse>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                slot: Mutex::new(Some(tx)),
            },
            rx,
        )
    }
}

#[async_trait]
impl ResponseSender for ExchangeResponseSender {
    async fn send_response(&self, response: JsonRpcResponse) -> Result<(), TransportError> {
        let tx = self.slot.lock().take().ok_or(TransportError::Closed)?;
        tx.send(response).map_err(|_| TransportError::Closed)
    }
}

/// In-process duplex transport over an unbounded tokio channel. Closing
/// it ends the peer's incoming stream.
#[derive(Debug)]
pub struct ChannelTransport {
    outgoing: Mutex<Option<mpsc::UnboundedSender<String>>>,
}

/// One side of a [`ChannelTransport::pair`]
#[derive(Debug)]
pub struct ChannelEndpoint {
    pub transport: Arc<ChannelTransport>,
    pub incoming: mpsc::UnboundedReceiver<String>,
}

impl ChannelTransport {
    pub fn new(outgoing: mpsc::UnboundedSender<String>) -> Self {
        Self {
            outgoing: Mutex::new(Some(outgoing)),
        }
    }

    /// Two connected endpoints: what one side sends, the other receives
    pub fn pair() -> (ChannelEndpoint, ChannelEndpoint) {
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();

        (
            ChannelEndpoint {
                transport: Arc::new(ChannelTransport::new(b_tx)),
                incoming: a_rx,
            },
            ChannelEndpoint {
                transport: Arc::new(ChannelTransport::new(a_tx)),
                incoming: b_rx,
            },
        )
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn send(&self, message: String) -> Result<(), TransportError> {
        let outgoing = self.outgoing.lock();
        let tx = outgoing.as_ref().ok_or(TransportError::Closed)?;
        debug!(message = %message, "channel transport send");
        tx.send(message).map_err(|_| TransportError::Closed)
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.outgoing.lock().take();
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.outgoing
            .lock()
            .as_ref()
            .is_some_and(|tx| !tx.is_closed())
    }

    fn transport_type(&self) -> &'static str {
        "channel"
    }
}
