use std::any::type_name;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::warn;

use crate::error::{ConnectorResult, JsonRpcConnectorError, ToJsonRpcError};
use crate::request::JsonRpcRequest;
use crate::session::Session;
use crate::transaction::Transaction;

/// Descriptor of the shape a handler wants its params decoded into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ParamsShape {
    type_name: &'static str,
}

impl ParamsShape {
    pub fn of<T: ?Sized>() -> Self {
        Self {
            type_name: type_name::<T>(),
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }
}

impl std::fmt::Display for ParamsShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.type_name)
    }
}

/// Business logic bound to a connector.
///
/// `Params` declares the shape incoming params are decoded into before
/// `handle_request` sees them; use `serde_json::Value` to receive them raw.
/// Returning without responding (and without calling
/// [`Transaction::mark_async`]) makes the dispatcher answer with an empty
/// result.
#[async_trait]
pub trait JsonRpcHandler: Send + Sync + 'static {
    type Params: DeserializeOwned + Send + 'static;

    /// Domain error; the dispatcher converts it to a JSON-RPC error object
    type Error: ToJsonRpcError;

    async fn handle_request(
        &self,
        transaction: &Transaction,
        request: JsonRpcRequest<Self::Params>,
    ) -> Result<(), Self::Error>;

    async fn after_connection_established(&self, session: &Session) -> Result<(), Self::Error> {
        let _ = session;
        Ok(())
    }

    async fn after_connection_closed(
        &self,
        session: &Session,
        reason: &str,
    ) -> Result<(), Self::Error> {
        let _ = (session, reason);
        Ok(())
    }

    /// Receives failures that have no response to travel in: lifecycle
    /// callback errors and failed notifications
    async fn handle_uncaught_exception(&self, session: &Session, error: &JsonRpcConnectorError) {
        warn!(session_id = ?session.id(), error = %error, "Uncaught exception in handler");
    }

    fn params_shape(&self) -> ParamsShape {
        ParamsShape::of::<Self::Params>()
    }
}

/// Object-safe view of a bound handler, with params decoding and error
/// conversion already applied
#[async_trait]
pub(crate) trait ErasedHandler: Send + Sync {
    fn params_shape(&self) -> ParamsShape;

    async fn handle_request(
        &self,
        transaction: &Transaction,
        request: JsonRpcRequest<Value>,
    ) -> ConnectorResult<()>;

    async fn after_connection_established(&self, session: &Session) -> ConnectorResult<()>;

    async fn after_connection_closed(&self, session: &Session, reason: &str)
    -> ConnectorResult<()>;

    async fn handle_uncaught_exception(&self, session: &Session, error: &JsonRpcConnectorError);
}

pub(crate) struct HandlerBinding<H> {
    handler: Arc<H>,
}

impl<H: JsonRpcHandler> HandlerBinding<H> {
    pub(crate) fn new(handler: Arc<H>) -> Self {
        Self { handler }
    }
}

fn handler_failure<E: ToJsonRpcError>(error: E) -> JsonRpcConnectorError {
    JsonRpcConnectorError::HandlerFailure(error.to_error_object())
}

#[async_trait]
impl<H: JsonRpcHandler> ErasedHandler for HandlerBinding<H> {
    fn params_shape(&self) -> ParamsShape {
        self.handler.params_shape()
    }

    async fn handle_request(
        &self,
        transaction: &Transaction,
        request: JsonRpcRequest<Value>,
    ) -> ConnectorResult<()> {
        let method = request.method.clone();
        let typed = request.into_typed::<H::Params>().map_err(|e| {
            JsonRpcConnectorError::ParamShapeMismatch {
                method,
                expected: self.params_shape().type_name(),
                reason: e.to_string(),
            }
        })?;

        self.handler
            .handle_request(transaction, typed)
            .await
            .map_err(handler_failure)
    }

    async fn after_connection_established(&self, session: &Session) -> ConnectorResult<()> {
        self.handler
            .after_connection_established(session)
            .await
            .map_err(handler_failure)
    }

    async fn after_connection_closed(
        &self,
        session: &Session,
        reason: &str,
    ) -> ConnectorResult<()> {
        self.handler
            .after_connection_closed(session, reason)
            .await
            .map_err(handler_failure)
    }

    async fn handle_uncaught_exception(&self, session: &Session, error: &JsonRpcConnectorError) {
        self.handler.handle_uncaught_exception(session, error).await
    }
}
