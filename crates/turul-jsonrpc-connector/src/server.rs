//! Server-side connector: sessions, inbound routing and the HTTP exchange
//! variant of the transport.

use std::sync::Arc;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::DispatcherConfig;
use crate::dispatch::JsonRpcHandlerManager;
use crate::error::{ConnectorResult, JsonRpcConnectorError, JsonRpcErrorObject, ToJsonRpcError};
use crate::handler::JsonRpcHandler;
use crate::message::JsonRpcMessage;
use crate::response::JsonRpcResponse;
use crate::session::{Session, SessionRegistry};
use crate::transport::{
    ExchangeResponseSender, ResponseSender, SessionResponseSender, SharedTransport,
};

/// JSON-RPC server bound to one handler
pub struct JsonRpcServer {
    manager: Arc<JsonRpcHandlerManager>,
    sessions: SessionRegistry,
}

impl JsonRpcServer {
    pub fn new<H: JsonRpcHandler>(handler: H) -> Self {
        Self::with_config(handler, DispatcherConfig::default())
    }

    pub fn with_config<H: JsonRpcHandler>(handler: H, config: DispatcherConfig) -> Self {
        let manager = JsonRpcHandlerManager::with_config(config);
        manager.set_handler(handler);
        Self::from_manager(Arc::new(manager))
    }

    pub fn from_manager(manager: Arc<JsonRpcHandlerManager>) -> Self {
        Self {
            manager,
            sessions: SessionRegistry::new(),
        }
    }

    pub fn manager(&self) -> &Arc<JsonRpcHandlerManager> {
        &self.manager
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    fn new_session(
        &self,
        id: String,
        transport: Option<SharedTransport>,
    ) -> ConnectorResult<Session> {
        let session = match transport {
            Some(transport) => Session::with_transport(transport),
            None => Session::new(),
        };
        session.assign_id(id)?;
        self.sessions.insert(session.clone())?;
        Ok(session)
    }

    /// A peer connected over `transport`. Creates its session and notifies
    /// the handler.
    pub async fn connection_established(
        &self,
        transport: SharedTransport,
    ) -> ConnectorResult<Session> {
        let session = self.new_session(Uuid::now_v7().to_string(), Some(transport))?;
        self.manager.after_connection_established(&session).await;
        Ok(session)
    }

    /// A peer came back over a new transport, presenting the id of its
    /// previous session. The session keeps its identity; an id the server
    /// no longer knows starts a fresh session under that id.
    pub async fn reconnect(
        &self,
        session_id: &str,
        transport: SharedTransport,
    ) -> ConnectorResult<Session> {
        let session = match self.sessions.get(session_id) {
            Some(session) if !session.is_closed() => {
                session.rebind(transport);
                info!(session_id = %session_id, "Session reconnected");
                session
            }
            _ => {
                debug!(session_id = %session_id, "Unknown session on reconnect; creating it");
                self.new_session(session_id.to_string(), Some(transport))?
            }
        };
        self.manager.after_connection_established(&session).await;
        Ok(session)
    }

    /// Route one inbound message. Requests are dispatched as independent
    /// tasks; malformed input is answered here and never reaches the
    /// handler.
    pub async fn handle_message(&self, session: &Session, text: &str) -> ConnectorResult<()> {
        let sink: Arc<dyn ResponseSender> = Arc::new(SessionResponseSender::new(session.clone()));

        match JsonRpcMessage::parse(text) {
            Ok(JsonRpcMessage::Request(request)) => {
                self.manager.spawn_request(session.clone(), request, sink);
                Ok(())
            }
            Ok(JsonRpcMessage::Response(response)) => {
                warn!(
                    session_id = ?session.id(),
                    request_id = ?response.id,
                    "Server received a response; discarding"
                );
                Ok(())
            }
            Err(e) => {
                warn!(session_id = ?session.id(), error = %e, "Rejecting malformed message");
                sink.send_response(malformed_response(&e)).await?;
                Ok(())
            }
        }
    }

    /// The transport backing `session` went away. The session stays
    /// registered so the peer can reconnect.
    pub async fn connection_closed(&self, session: &Session, reason: &str) {
        self.manager.after_connection_closed(session, reason).await;
    }

    /// End a session for good
    pub async fn close_session(&self, session: &Session, reason: &str) -> ConnectorResult<()> {
        self.manager.after_connection_closed(session, reason).await;
        if let Some(id) = session.id() {
            self.sessions.remove(&id);
        }
        session.close().await
    }

    /// One HTTP request/response exchange. Returns the session the exchange
    /// ran in and the encoded response body, which is `None` for
    /// notifications and stray responses.
    pub async fn handle_http_exchange(
        &self,
        session_id: Option<&str>,
        body: &str,
    ) -> ConnectorResult<(Session, Option<String>)> {
        let session = match session_id.and_then(|id| self.sessions.get(id)) {
            Some(session) if !session.is_closed() => session,
            _ => {
                let id = Uuid::now_v7().to_string();
                debug!(session_id = %id, requested = ?session_id, "Starting HTTP session");
                let session = self.new_session(id, None)?;
                self.manager.after_connection_established(&session).await;
                session
            }
        };

        let request = match JsonRpcMessage::parse(body) {
            Ok(JsonRpcMessage::Request(request)) => request,
            Ok(JsonRpcMessage::Response(response)) => {
                warn!(request_id = ?response.id, "HTTP exchange carried a response; discarding");
                return Ok((session, None));
            }
            Err(e) => {
                let encoded = serde_json::to_string(&malformed_response(&e))?;
                return Ok((session, Some(encoded)));
            }
        };

        let request_id = request.id.clone();
        let (sink, response) = ExchangeResponseSender::new();
        self.manager
            .handle_request(&session, request, Arc::new(sink))
            .await?;

        let Some(request_id) = request_id else {
            return Ok((session, None));
        };

        let response = match response.await {
            Ok(response) => response,
            Err(_) => JsonRpcResponse::error(
                Some(request_id),
                JsonRpcErrorObject::internal_error(Some(
                    "Transaction completed without response".to_string(),
                )),
            ),
        };
        Ok((session, Some(serde_json::to_string(&response)?)))
    }

    /// Close every session, notifying the handler for each
    pub async fn close(&self) {
        for id in self.sessions.ids() {
            if let Some(session) = self.sessions.get(&id) {
                self.manager.after_connection_closed(&session, "server shutdown").await;
            }
        }
        self.sessions.close_all().await;
    }
}

fn malformed_response(error: &JsonRpcConnectorError) -> JsonRpcResponse {
    JsonRpcResponse::error(error.request_id().cloned(), error.to_error_object())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HandlerError;
    use async_trait::async_trait;
    use crate::request::JsonRpcRequest;
    use crate::transaction::Transaction;
    use crate::transport::ChannelTransport;
    use serde_json::{Value, json};
    use std::time::Duration;

    struct EchoHandler;

    #[async_trait]
    impl JsonRpcHandler for EchoHandler {
        type Params = Value;
        type Error = HandlerError;

        async fn handle_request(
            &self,
            transaction: &Transaction,
            request: JsonRpcRequest<Value>,
        ) -> Result<(), HandlerError> {
            match request.method.as_str() {
                "echo" => {
                    transaction.send_response(request.params).await?;
                }
                "later" => {
                    transaction.mark_async();
                    let tx = transaction.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(Duration::from_millis(500)).await;
                        let _ = tx.send_response("done").await;
                    });
                }
                "whoami" => {
                    transaction.send_response(transaction.session().id()).await?;
                }
                _ => {}
            }
            Ok(())
        }
    }

    async fn next_json(endpoint: &mut crate::transport::ChannelEndpoint) -> Value {
        serde_json::from_str(&endpoint.incoming.recv().await.unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_echo_over_duplex_transport() {
        let server = JsonRpcServer::new(EchoHandler);
        let (server_end, mut client_end) = ChannelTransport::pair();

        let session = server.connection_established(server_end.transport).await.unwrap();
        assert!(session.id().is_some());
        assert_eq!(server.sessions().len(), 1);

        server
            .handle_message(
                &session,
                r#"{"jsonrpc":"2.0","id":7,"method":"echo","params":{"v":1}}"#,
            )
            .await
            .unwrap();

        let response = next_json(&mut client_end).await;
        assert_eq!(response, json!({"jsonrpc": "2.0", "id": 7, "result": {"v": 1}}));
    }

    #[tokio::test]
    async fn test_malformed_messages_are_answered_without_dispatch() {
        let server = JsonRpcServer::new(EchoHandler);
        let (server_end, mut client_end) = ChannelTransport::pair();
        let session = server.connection_established(server_end.transport).await.unwrap();

        server.handle_message(&session, "{not json").await.unwrap();
        let response = next_json(&mut client_end).await;
        assert_eq!(response["id"], Value::Null);
        assert_eq!(response["error"]["code"], -32700);

        server.handle_message(&session, r#"{"id":3,"params":[]}"#).await.unwrap();
        let response = next_json(&mut client_end).await;
        assert_eq!(response["id"], 3);
        assert_eq!(response["error"]["code"], -32600);
    }

    #[tokio::test]
    async fn test_responses_at_the_server_are_discarded() {
        let server = JsonRpcServer::new(EchoHandler);
        let (server_end, mut client_end) = ChannelTransport::pair();
        let session = server.connection_established(server_end.transport).await.unwrap();

        server
            .handle_message(&session, r#"{"jsonrpc":"2.0","id":1,"result":true}"#)
            .await
            .unwrap();
        assert!(client_end.incoming.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_reconnect_keeps_identity_and_redirects_responses() {
        let server = JsonRpcServer::new(EchoHandler);
        let (first_server, _first_client) = ChannelTransport::pair();
        let session = server.connection_established(first_server.transport).await.unwrap();
        let id = session.id().unwrap();

        server.connection_closed(&session, "network drop").await;

        let (second_server, mut second_client) = ChannelTransport::pair();
        let resumed = server.reconnect(&id, second_server.transport).await.unwrap();
        assert!(resumed.same_session(&session));

        server
            .handle_message(&resumed, r#"{"jsonrpc":"2.0","id":2,"method":"whoami"}"#)
            .await
            .unwrap();
        let response = next_json(&mut second_client).await;
        assert_eq!(response["result"], json!(id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_http_exchange_waits_for_async_response() {
        let server = JsonRpcServer::new(EchoHandler);

        let (session, body) = server
            .handle_http_exchange(None, r#"{"jsonrpc":"2.0","id":9,"method":"later"}"#)
            .await
            .unwrap();
        let response: Value = serde_json::from_str(&body.unwrap()).unwrap();
        assert_eq!(response, json!({"jsonrpc": "2.0", "id": 9, "result": "done"}));

        let id = session.id().unwrap();
        let (again, body) = server
            .handle_http_exchange(Some(&id), r#"{"jsonrpc":"2.0","method":"echo","params":[1]}"#)
            .await
            .unwrap();
        assert!(again.same_session(&session));
        assert!(body.is_none());

        let (_, body) = server
            .handle_http_exchange(Some(&id), r#"{"jsonrpc":"2.0","id":10,"method":"silent"}"#)
            .await
            .unwrap();
        let response: Value = serde_json::from_str(&body.unwrap()).unwrap();
        assert_eq!(response["result"], Value::Null);
    }

    #[tokio::test]
    async fn test_http_exchange_unknown_session_starts_a_new_one() {
        let server = JsonRpcServer::new(EchoHandler);
        let (session, _) = server
            .handle_http_exchange(Some("stale"), r#"{"jsonrpc":"2.0","id":1,"method":"echo"}"#)
            .await
            .unwrap();
        assert_ne!(session.id().as_deref(), Some("stale"));
        assert_eq!(server.sessions().len(), 1);
    }

    #[tokio::test]
    async fn test_close_session_and_shutdown() {
        let server = JsonRpcServer::new(EchoHandler);
        let (a, _a_peer) = ChannelTransport::pair();
        let (b, _b_peer) = ChannelTransport::pair();
        let first = server.connection_established(a.transport).await.unwrap();
        let second = server.connection_established(b.transport).await.unwrap();

        server.close_session(&first, "kicked").await.unwrap();
        assert!(first.is_closed());
        assert_eq!(server.sessions().len(), 1);

        server.close().await;
        assert!(second.is_closed());
        assert!(server.sessions().is_empty());
    }
}
