//! Shared harness for the integration tests: a server and its peer wired
//! together over an in-memory duplex transport.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use turul_jsonrpc_client::{ClientConfig, JsonRpcClient};
use turul_jsonrpc_connector::{
    ChannelTransport, HandlerError, JsonRpcConnectorError, JsonRpcHandler, JsonRpcRequest,
    JsonRpcServer, Session, SharedTransport, Transaction, Transport,
};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Pump messages arriving at the server end into the server until the peer
/// goes away
pub fn spawn_server_loop(
    server: Arc<JsonRpcServer>,
    session: Session,
    mut incoming: mpsc::UnboundedReceiver<String>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(message) = incoming.recv().await {
            if let Err(e) = server.handle_message(&session, &message).await {
                tracing::warn!(error = %e, "Server failed to handle message");
            }
        }
        server.connection_closed(&session, "peer went away").await;
    })
}

/// A `JsonRpcClient` talking to a `JsonRpcServer`
pub struct Loopback {
    pub server: Arc<JsonRpcServer>,
    pub client: Arc<JsonRpcClient>,
    /// The server's view of the connection
    pub session: Session,
    pub client_inbound: JoinHandle<()>,
    pub server_inbound: JoinHandle<()>,
}

impl Loopback {
    pub async fn connect<H: JsonRpcHandler>(handler: H) -> Self {
        Self::connect_with(Arc::new(JsonRpcServer::new(handler)), ClientConfig::default()).await
    }

    pub async fn connect_with(server: Arc<JsonRpcServer>, config: ClientConfig) -> Self {
        let (server_end, client_end) = ChannelTransport::pair();
        let transport: SharedTransport = server_end.transport;
        let session = server
            .connection_established(transport)
            .await
            .expect("server session");
        let server_inbound =
            spawn_server_loop(server.clone(), session.clone(), server_end.incoming);

        let client = Arc::new(
            JsonRpcClient::builder()
                .with_transport(client_end.transport)
                .with_config(config)
                .build()
                .expect("client"),
        );
        let client_inbound = client.spawn_inbound_loop(client_end.incoming);
        client.connect().await;

        Self {
            server,
            client,
            session,
            client_inbound,
            server_inbound,
        }
    }

    /// Adopt the id the server allocated for this connection
    pub fn adopt_server_session_id(&self) {
        self.client
            .set_session_id(self.session.id().expect("assigned id"))
            .expect("session id");
    }

    /// Cut the connection from the server side
    pub async fn sever(self) -> Arc<JsonRpcClient> {
        self.server
            .close_session(&self.session, "severed")
            .await
            .expect("close session");
        self.client_inbound.await.expect("client inbound loop");
        self.client
    }
}

/// Raw access to the client end: send text, read text
pub struct RawPeer {
    pub server: Arc<JsonRpcServer>,
    pub session: Session,
    pub transport: SharedTransport,
    pub incoming: mpsc::UnboundedReceiver<String>,
}

impl RawPeer {
    pub async fn connect<H: JsonRpcHandler>(handler: H) -> Self {
        let server = Arc::new(JsonRpcServer::new(handler));
        let (server_end, client_end) = ChannelTransport::pair();
        let session = server
            .connection_established(server_end.transport)
            .await
            .expect("server session");
        spawn_server_loop(server.clone(), session.clone(), server_end.incoming);

        Self {
            server,
            session,
            transport: client_end.transport,
            incoming: client_end.incoming,
        }
    }

    pub async fn send(&self, message: Value) {
        self.transport
            .send(message.to_string())
            .await
            .expect("send to server");
    }

    pub async fn recv(&mut self) -> Value {
        let text = self.incoming.recv().await.expect("server reply");
        serde_json::from_str(&text).expect("reply is JSON")
    }

    /// Next message, if one arrives within `window`
    pub async fn recv_within(&mut self, window: Duration) -> Option<Value> {
        match tokio::time::timeout(window, self.incoming.recv()).await {
            Ok(Some(text)) => Some(serde_json::from_str(&text).expect("reply is JSON")),
            _ => None,
        }
    }
}

/// What a [`ScenarioHandler`] observed
#[derive(Default)]
pub struct Observed {
    pub methods: Mutex<Vec<String>>,
    pub uncaught: Mutex<Vec<String>>,
    pub established: Mutex<Vec<Option<String>>>,
    pub closed: Mutex<Vec<String>>,
}

/// Handler covering the behaviours the scenarios exercise:
/// - `echo` answers with its params
/// - `ping` fails
/// - `later` answers "done" after 500ms
/// - `hold` never answers
/// - `whoami` answers with the session id
/// - anything else returns without responding
pub struct ScenarioHandler {
    pub observed: Arc<Observed>,
    held: Mutex<Vec<Transaction>>,
}

impl ScenarioHandler {
    pub fn new() -> (Self, Arc<Observed>) {
        let observed = Arc::new(Observed::default());
        (
            Self {
                observed: observed.clone(),
                held: Mutex::new(Vec::new()),
            },
            observed,
        )
    }
}

#[async_trait]
impl JsonRpcHandler for ScenarioHandler {
    type Params = Value;
    type Error = HandlerError;

    async fn handle_request(
        &self,
        transaction: &Transaction,
        request: JsonRpcRequest<Value>,
    ) -> Result<(), HandlerError> {
        self.observed.methods.lock().push(request.method.clone());

        match request.method.as_str() {
            "echo" => {
                transaction.send_response(request.params.unwrap_or(Value::Null)).await?;
            }
            "ping" => return Err(HandlerError::message("ping is not supported")),
            "later" => {
                transaction.mark_async();
                let tx = transaction.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(500)).await;
                    let _ = tx.send_response("done").await;
                });
            }
            "hold" => {
                transaction.mark_async();
                self.held.lock().push(transaction.clone());
            }
            "whoami" => {
                transaction.send_response(json!(transaction.session().id())).await?;
            }
            _ => {}
        }
        Ok(())
    }

    async fn after_connection_established(&self, session: &Session) -> Result<(), HandlerError> {
        self.observed.established.lock().push(session.id());
        Ok(())
    }

    async fn after_connection_closed(
        &self,
        _session: &Session,
        reason: &str,
    ) -> Result<(), HandlerError> {
        self.observed.closed.lock().push(reason.to_string());
        Ok(())
    }

    async fn handle_uncaught_exception(&self, _session: &Session, error: &JsonRpcConnectorError) {
        self.observed.uncaught.lock().push(error.to_string());
    }
}

/// Poll `condition` until it holds or `limit` passes
pub async fn wait_until(limit: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
