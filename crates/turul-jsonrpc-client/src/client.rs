//! Main JSON-RPC client implementation

use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use turul_jsonrpc_connector::{
    ConnectorResult, JsonRpcConnectorError, JsonRpcHandler, JsonRpcHandlerManager, JsonRpcMessage,
    RequestId, ResponseSender, Session, SessionResponseSender, SharedTransport,
};

use crate::config::ClientConfig;
use crate::continuation::Continuation;
use crate::pending::PendingCallRegistry;
use crate::sender::JsonRpcRequestSender;

/// JSON-RPC client over one duplex transport.
///
/// Outgoing calls are correlated with responses through the pending-call
/// registry. Requests and notifications initiated by the server are
/// dispatched to the server-request handler, if one is set.
pub struct JsonRpcClient {
    session: Session,
    sender: Arc<JsonRpcRequestSender>,
    pending: Arc<PendingCallRegistry>,
    server_handler: Arc<JsonRpcHandlerManager>,
    config: ClientConfig,
}

impl JsonRpcClient {
    /// Create a client bound to `transport`
    pub fn new(transport: SharedTransport, config: ClientConfig) -> Self {
        let session = Session::with_transport(transport);
        let pending = Arc::new(PendingCallRegistry::new());
        let sender = Arc::new(JsonRpcRequestSender::new(
            session.clone(),
            pending.clone(),
            config.clone(),
        ));

        Self {
            session,
            sender,
            pending,
            server_handler: Arc::new(JsonRpcHandlerManager::with_config(config.dispatcher.clone())),
            config,
        }
    }

    pub fn builder() -> JsonRpcClientBuilder {
        JsonRpcClientBuilder::new()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn sender(&self) -> &Arc<JsonRpcRequestSender> {
        &self.sender
    }

    /// Number of requests still waiting for a response
    pub fn pending_requests(&self) -> usize {
        self.pending.len()
    }

    /// Handle requests and notifications the server sends to this client
    pub fn set_server_request_handler<H: JsonRpcHandler>(&self, handler: H) {
        self.server_handler.set_handler(handler);
    }

    /// Announce the connection to the server-request handler
    pub async fn connect(&self) {
        info!(
            client = %self.config.client_info.name,
            version = %self.config.client_info.version,
            "JSON-RPC client connected"
        );
        self.server_handler
            .after_connection_established(&self.session)
            .await;
    }

    /// Assign the session id allocated by the server. Outgoing params carry
    /// it from the next message on.
    pub fn set_session_id(&self, id: impl Into<String>) -> ConnectorResult<()> {
        self.sender.set_session_id(id)
    }

    pub fn session_id(&self) -> Option<String> {
        self.sender.session_id()
    }

    pub async fn send_request<P, R>(&self, method: &str, params: Option<P>) -> ConnectorResult<R>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        self.sender.send_request(method, params).await
    }

    pub async fn send_request_value(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> ConnectorResult<Value> {
        self.sender.send_request_value(method, params).await
    }

    pub async fn send_request_no_params<R: DeserializeOwned>(
        &self,
        method: &str,
    ) -> ConnectorResult<R> {
        self.sender.send_request_no_params(method).await
    }

    pub fn send_request_with_continuation<P, R, C>(
        &self,
        method: &str,
        params: Option<P>,
        continuation: C,
    ) -> Option<RequestId>
    where
        P: Serialize,
        R: DeserializeOwned + 'static,
        C: Continuation<R>,
    {
        self.sender
            .send_request_with_continuation(method, params, continuation)
    }

    pub async fn send_notification<P: Serialize>(
        &self,
        method: &str,
        params: Option<P>,
    ) -> ConnectorResult<()> {
        self.sender.send_notification(method, params).await
    }

    /// Inbound path: one raw message from the transport. Responses resolve
    /// pending calls (running continuations on this task); server requests
    /// are dispatched as independent tasks.
    pub async fn handle_incoming(&self, text: &str) {
        match JsonRpcMessage::parse(text) {
            Ok(JsonRpcMessage::Response(response)) => {
                if self.config.logging.log_responses {
                    debug!(
                        request_id = ?response.id,
                        is_error = response.is_error(),
                        "Response received"
                    );
                }
                self.pending.resolve(response);
            }
            Ok(JsonRpcMessage::Request(request)) => {
                if !self.server_handler.has_handler() {
                    debug!(method = %request.method, "No server request handler set");
                }
                let sink: Arc<dyn ResponseSender> =
                    Arc::new(SessionResponseSender::new(self.session.clone()));
                self.server_handler
                    .spawn_request(self.session.clone(), request, sink);
            }
            Err(e) => {
                warn!(error = %e, "Malformed message from server");
                if let Some(id) = e.request_id().cloned() {
                    self.pending.fail(&id, e);
                }
            }
        }
    }

    /// The transport went away: every pending call fails with
    /// `ConnectionLost` and the server-request handler is told.
    pub async fn connection_lost(&self, reason: &str) {
        let cancelled = self.pending.cancel_all(reason);
        info!(reason = %reason, cancelled = cancelled, "Connection lost");
        self.notify_closed(reason).await;
    }

    async fn notify_closed(&self, reason: &str) {
        self.server_handler
            .after_connection_closed(&self.session, reason)
            .await;
    }

    /// Continue the same session over a new transport
    pub async fn reconnect(&self, transport: SharedTransport) -> ConnectorResult<()> {
        if self.session.is_closed() {
            return Err(JsonRpcConnectorError::SessionClosed);
        }
        if self.session.rebind(transport) {
            info!(session_id = ?self.session.id(), "Client reconnected");
        }
        self.server_handler
            .after_connection_established(&self.session)
            .await;
        Ok(())
    }

    /// Feed messages from `incoming` to [`JsonRpcClient::handle_incoming`]
    /// until the channel ends, then report the connection as lost
    pub fn spawn_inbound_loop(
        self: &Arc<Self>,
        mut incoming: mpsc::UnboundedReceiver<String>,
    ) -> JoinHandle<()> {
        let client = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(message) = incoming.recv().await {
                client.handle_incoming(&message).await;
            }
            client.connection_lost("transport closed").await;
        })
    }

    /// Close the client. Pending calls fail with `ConnectionLost`; calls
    /// made once closing has begun fail with `SessionClosed`.
    pub async fn close(&self) -> ConnectorResult<()> {
        info!(session_id = ?self.session.id(), "Closing JSON-RPC client");
        let closed = self.session.close().await;
        let cancelled = self.pending.cancel_all("client closed");
        debug!(cancelled = cancelled, "Pending requests cancelled on close");
        self.notify_closed("client closed").await;
        closed
    }
}

impl std::fmt::Debug for JsonRpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonRpcClient")
            .field("session", &self.session)
            .field("pending", &self.pending.len())
            .finish()
    }
}

/// Builder for creating JSON-RPC clients
pub struct JsonRpcClientBuilder {
    transport: Option<SharedTransport>,
    config: Option<ClientConfig>,
    session_id: Option<String>,
}

impl JsonRpcClientBuilder {
    pub fn new() -> Self {
        Self {
            transport: None,
            config: None,
            session_id: None,
        }
    }

    pub fn with_transport(mut self, transport: SharedTransport) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn with_config(mut self, config: ClientConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Start with a session id already known, e.g. when resuming
    pub fn with_session_id(mut self, id: impl Into<String>) -> Self {
        self.session_id = Some(id.into());
        self
    }

    pub fn build(self) -> ConnectorResult<JsonRpcClient> {
        let transport = self.transport.ok_or_else(|| {
            JsonRpcConnectorError::Configuration(
                "Transport must be set before building client".to_string(),
            )
        })?;
        let client = JsonRpcClient::new(transport, self.config.unwrap_or_default());
        if let Some(id) = self.session_id {
            client.set_session_id(id)?;
        }
        Ok(client)
    }
}

impl Default for JsonRpcClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::time::Duration;
    use turul_jsonrpc_connector::{
        ChannelEndpoint, ChannelTransport, HandlerError, JsonRpcRequest, Transaction,
    };

    fn client() -> (Arc<JsonRpcClient>, ChannelEndpoint) {
        let (local, remote) = ChannelTransport::pair();
        let client = JsonRpcClient::builder()
            .with_transport(local.transport)
            .build()
            .unwrap();
        (Arc::new(client), remote)
    }

    async fn next_json(endpoint: &mut ChannelEndpoint) -> Value {
        serde_json::from_str(&endpoint.incoming.recv().await.unwrap()).unwrap()
    }

    #[test]
    fn test_builder_requires_transport() {
        assert!(matches!(
            JsonRpcClient::builder().build(),
            Err(JsonRpcConnectorError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn test_call_resolved_by_inbound_response() {
        let (client, mut remote) = client();
        let call = {
            let client = client.clone();
            tokio::spawn(async move {
                client
                    .send_request_value("echo", Some(json!({"v": 1})))
                    .await
            })
        };

        let request = next_json(&mut remote).await;
        let reply = json!({"jsonrpc": "2.0", "id": request["id"], "result": request["params"]});
        client.handle_incoming(&reply.to_string()).await;

        assert_eq!(call.await.unwrap().unwrap(), json!({"v": 1}));
        assert_eq!(client.pending_requests(), 0);
    }

    #[tokio::test]
    async fn test_connection_lost_fails_pending_calls() {
        let (client, mut remote) = client();
        let first = {
            let client = client.clone();
            tokio::spawn(async move { client.send_request_value("a", None).await })
        };
        next_json(&mut remote).await;
        let second = {
            let client = client.clone();
            tokio::spawn(async move { client.send_request_value("b", None).await })
        };
        next_json(&mut remote).await;
        assert_eq!(client.pending_requests(), 2);

        client.connection_lost("socket reset").await;

        assert!(first.await.unwrap().unwrap_err().is_connection_lost());
        assert!(second.await.unwrap().unwrap_err().is_connection_lost());
        assert_eq!(client.pending_requests(), 0);
    }

    #[tokio::test]
    async fn test_malformed_response_fails_its_call() {
        let (client, mut remote) = client();
        let call = {
            let client = client.clone();
            tokio::spawn(async move { client.send_request_value("a", None).await })
        };
        let request = next_json(&mut remote).await;

        let broken = json!({
            "jsonrpc": "2.0",
            "id": request["id"],
            "result": 1,
            "error": {"code": 1, "message": "x"}
        });
        client.handle_incoming(&broken.to_string()).await;

        assert!(matches!(
            call.await.unwrap(),
            Err(JsonRpcConnectorError::MalformedMessage { .. })
        ));
    }

    #[derive(Default)]
    struct Events {
        seen: Mutex<Vec<String>>,
    }

    struct EventHandler(Arc<Events>);

    #[async_trait]
    impl JsonRpcHandler for EventHandler {
        type Params = Value;
        type Error = HandlerError;

        async fn handle_request(
            &self,
            transaction: &Transaction,
            request: JsonRpcRequest<Value>,
        ) -> Result<(), HandlerError> {
            self.0.seen.lock().push(request.method.clone());
            if request.method == "ping" {
                transaction.send_response("pong").await?;
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_server_requests_reach_the_handler() {
        let (client, mut remote) = client();
        let events = Arc::new(Events::default());
        client.set_server_request_handler(EventHandler(events.clone()));
        client.connect().await;

        client
            .handle_incoming(
                r#"{"jsonrpc":"2.0","method":"onEvent","params":{"type":"EndOfStream"}}"#,
            )
            .await;
        client
            .handle_incoming(r#"{"jsonrpc":"2.0","id":"s1","method":"ping"}"#)
            .await;

        let reply = next_json(&mut remote).await;
        assert_eq!(reply["id"], "s1");
        assert_eq!(reply["result"], "pong");
        assert_eq!(*events.seen.lock(), vec!["onEvent".to_string(), "ping".to_string()]);
    }

    #[tokio::test]
    async fn test_reconnect_keeps_session_identity() {
        let (client, _old_remote) = client();
        client.set_session_id("abc").unwrap();
        let key = client.session().key();

        let (local, mut remote) = ChannelTransport::pair();
        client.reconnect(local.transport).await.unwrap();
        assert_eq!(client.session().key(), key);

        client.send_notification::<Value>("hello", None).await.unwrap();
        let message = next_json(&mut remote).await;
        assert_eq!(message["params"]["sessionId"], "abc");
    }

    #[tokio::test]
    async fn test_inbound_loop_reports_connection_loss() {
        let (local, mut remote) = ChannelTransport::pair();
        let client = Arc::new(
            JsonRpcClient::builder()
                .with_transport(local.transport)
                .build()
                .unwrap(),
        );
        let inbound = client.spawn_inbound_loop(local.incoming);

        let (tx, rx) = tokio::sync::oneshot::channel();
        client.send_request_with_continuation::<Value, Value, _>(
            "wait",
            None,
            move |r: ConnectorResult<Value>| {
                let _ = tx.send(r);
            },
        );

        next_json(&mut remote).await;
        drop(remote);
        inbound.await.unwrap();

        assert!(rx.await.unwrap().unwrap_err().is_connection_lost());
    }

    #[tokio::test]
    async fn test_close_is_final() {
        let (client, _remote) = client();
        client.close().await.unwrap();

        assert!(client.session().is_closed());
        assert!(matches!(
            client.send_request_value("late", None).await,
            Err(JsonRpcConnectorError::SessionClosed)
        ));
        let (local, _peer) = ChannelTransport::pair();
        assert!(client.reconnect(local.transport).await.is_err());
    }

    struct SlowGoodbye;

    #[async_trait]
    impl JsonRpcHandler for SlowGoodbye {
        type Params = Value;
        type Error = HandlerError;

        async fn handle_request(
            &self,
            _transaction: &Transaction,
            _request: JsonRpcRequest<Value>,
        ) -> Result<(), HandlerError> {
            Ok(())
        }

        async fn after_connection_closed(
            &self,
            _session: &Session,
            _reason: &str,
        ) -> Result<(), HandlerError> {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_call_during_close_does_not_hang() {
        let (client, _remote) = client();
        client.set_server_request_handler(SlowGoodbye);
        client.connect().await;

        let closing = {
            let client = client.clone();
            tokio::spawn(async move { client.close().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        let late = tokio::time::timeout(
            Duration::from_secs(1),
            client.send_request_value("late", None),
        )
        .await
        .expect("call during close completes");
        assert!(matches!(late, Err(JsonRpcConnectorError::SessionClosed)));

        closing.await.unwrap().unwrap();
        assert_eq!(client.pending_requests(), 0);
    }
}
