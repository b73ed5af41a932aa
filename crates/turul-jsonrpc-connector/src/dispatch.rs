//! Routing of inbound requests to the bound handler.
//!
//! For every request with an id exactly one response is produced: either the
//! handler's own, an error built from the handler's failure, or an implicit
//! empty result once a non-asynchronous handler returns. Notifications are
//! never answered.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use parking_lot::RwLock;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::config::DispatcherConfig;
use crate::error::{ConnectorResult, JsonRpcConnectorError, JsonRpcErrorObject, ToJsonRpcError};
use crate::handler::{ErasedHandler, HandlerBinding, JsonRpcHandler, ParamsShape};
use crate::lifecycle;
use crate::request::JsonRpcRequest;
use crate::response::JsonRpcResponse;
use crate::session::Session;
use crate::transaction::Transaction;
use crate::transport::ResponseSender;

/// Dispatcher holding the single handler bound to a connector
pub struct JsonRpcHandlerManager {
    handler: RwLock<Option<Arc<dyn ErasedHandler>>>,
    config: DispatcherConfig,
}

impl JsonRpcHandlerManager {
    /// Create a manager with no handler bound
    pub fn new() -> Self {
        Self::with_config(DispatcherConfig::default())
    }

    pub fn with_config(config: DispatcherConfig) -> Self {
        Self {
            handler: RwLock::new(None),
            config,
        }
    }

    /// Create a manager bound to `handler`
    pub fn with_handler<H: JsonRpcHandler>(handler: H) -> Self {
        let manager = Self::new();
        manager.set_handler(handler);
        manager
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Bind (or replace) the handler
    pub fn set_handler<H: JsonRpcHandler>(&self, handler: H) {
        self.set_shared_handler(Arc::new(handler));
    }

    pub fn set_shared_handler<H: JsonRpcHandler>(&self, handler: Arc<H>) {
        debug!(params = %handler.params_shape(), "Binding JSON-RPC handler");
        *self.handler.write() = Some(Arc::new(HandlerBinding::new(handler)));
    }

    pub fn has_handler(&self) -> bool {
        self.handler.read().is_some()
    }

    /// Params shape declared by the bound handler
    pub fn params_shape(&self) -> Option<ParamsShape> {
        self.handler.read().as_ref().map(|h| h.params_shape())
    }

    fn current_handler(&self) -> Option<Arc<dyn ErasedHandler>> {
        self.handler.read().clone()
    }

    /// Run one request to completion as an independent unit of work
    pub fn spawn_request(
        self: &Arc<Self>,
        session: Session,
        request: JsonRpcRequest,
        sink: Arc<dyn ResponseSender>,
    ) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let request_id = request.id.clone();
            if let Err(e) = manager.handle_request(&session, request, sink).await {
                error!(
                    session_id = ?session.id(),
                    request_id = ?request_id,
                    error = %e,
                    "Failed to deliver response"
                );
            }
        })
    }

    /// Dispatch one request and make sure it is answered (or, for a
    /// notification, not answered). Returns an error only when writing the
    /// response to the sink failed.
    pub async fn handle_request(
        &self,
        session: &Session,
        request: JsonRpcRequest<Value>,
        sink: Arc<dyn ResponseSender>,
    ) -> ConnectorResult<()> {
        let request_id = request.id.clone();
        let method = request.method.clone();

        let Some(handler) = self.current_handler() else {
            warn!(method = %method, "No handler bound; request cannot be processed");
            if let Some(id) = request_id {
                sink.send_response(JsonRpcResponse::error(
                    Some(id),
                    JsonRpcErrorObject::method_not_found(&method),
                ))
                .await?;
            }
            return Ok(());
        };

        debug!(
            session_id = ?session.id(),
            request_id = ?request_id,
            method = %method,
            "Dispatching request"
        );

        let transaction = Transaction::new(
            session.clone(),
            request_id,
            method.clone(),
            sink,
            self.config.respond_on_leaked_transaction,
        );

        let outcome = AssertUnwindSafe(handler.handle_request(&transaction, request))
            .catch_unwind()
            .await;

        let failure = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e),
            Err(payload) => Some(lifecycle::panic_failure(payload.as_ref())),
        };

        match failure {
            Some(failure) => self.fail(handler.as_ref(), &transaction, failure).await,
            None => self.complete(&transaction).await,
        }
    }

    async fn fail(
        &self,
        handler: &dyn ErasedHandler,
        transaction: &Transaction,
        failure: JsonRpcConnectorError,
    ) -> ConnectorResult<()> {
        error!(
            request_id = ?transaction.request_id(),
            method = %transaction.method(),
            error = %failure,
            "Exception while processing request"
        );

        if transaction.is_notification() {
            if !matches!(failure, JsonRpcConnectorError::ParamShapeMismatch { .. }) {
                lifecycle::report_uncaught(handler, transaction.session(), failure).await;
            }
            return Ok(());
        }

        transaction
            .send_error_if_unanswered(failure.to_error_object())
            .await?;
        Ok(())
    }

    async fn complete(&self, transaction: &Transaction) -> ConnectorResult<()> {
        if transaction.is_notification() || transaction.is_responded() {
            return Ok(());
        }

        if transaction.is_async() {
            if let Some(timeout) = self.config.async_response_timeout {
                transaction.arm_watchdog(timeout);
            }
            return Ok(());
        }

        transaction.send_empty_if_unanswered().await?;
        Ok(())
    }

    /// Notify the handler that a connection was established for `session`
    pub async fn after_connection_established(&self, session: &Session) {
        if let Some(handler) = self.current_handler() {
            lifecycle::connection_established(handler.as_ref(), session).await;
        }
    }

    /// Notify the handler that the connection backing `session` closed
    pub async fn after_connection_closed(&self, session: &Session, reason: &str) {
        if let Some(handler) = self.current_handler() {
            lifecycle::connection_closed(handler.as_ref(), session, reason).await;
        }
    }

    /// Report a failure that cannot travel in a response
    pub async fn report_uncaught(&self, session: &Session, failure: JsonRpcConnectorError) {
        match self.current_handler() {
            Some(handler) => lifecycle::report_uncaught(handler.as_ref(), session, failure).await,
            None => warn!(session_id = ?session.id(), error = %failure, "Uncaught failure"),
        }
    }
}

impl Default for JsonRpcHandlerManager {
    fn default() -> Self {
        Self::new()
    }
}
