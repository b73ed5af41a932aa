//! One handler instance per session behind a single bound handler.
//!
//! The dispatcher sees one [`JsonRpcHandler`]; each session gets its own
//! instance from the factory, created on first use and dropped when the
//! session's connection closes.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::error::JsonRpcConnectorError;
use crate::handler::{JsonRpcHandler, ParamsShape};
use crate::request::JsonRpcRequest;
use crate::session::{Session, SessionKey};
use crate::transaction::Transaction;

type HandlerFactory<H> = Box<dyn Fn(&Session) -> H + Send + Sync>;

pub struct PerSessionJsonRpcHandler<H: JsonRpcHandler> {
    factory: HandlerFactory<H>,
    handlers: RwLock<HashMap<SessionKey, Arc<H>>>,
    /// Params shape declared by the instances the factory builds
    shape: ParamsShape,
}

impl<H: JsonRpcHandler> PerSessionJsonRpcHandler<H> {
    /// Wrap `factory`. One instance is built up front, against a detached
    /// session, to learn the params shape the instances declare.
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn(&Session) -> H + Send + Sync + 'static,
    {
        let shape = factory(&Session::new()).params_shape();
        Self {
            factory: Box::new(factory),
            handlers: RwLock::new(HashMap::new()),
            shape,
        }
    }

    /// Handler instance for `session`, created on first use
    pub fn handler_for(&self, session: &Session) -> Arc<H> {
        if let Some(handler) = self.handlers.read().get(&session.key()) {
            return handler.clone();
        }

        self.handlers
            .write()
            .entry(session.key())
            .or_insert_with(|| {
                debug!(session = %session.key(), "Creating per-session handler");
                Arc::new((self.factory)(session))
            })
            .clone()
    }

    /// Number of sessions that currently own a handler instance
    pub fn active_sessions(&self) -> usize {
        self.handlers.read().len()
    }

    fn existing(&self, session: &Session) -> Option<Arc<H>> {
        self.handlers.read().get(&session.key()).cloned()
    }
}

#[async_trait]
impl<H: JsonRpcHandler> JsonRpcHandler for PerSessionJsonRpcHandler<H> {
    type Params = H::Params;
    type Error = H::Error;

    async fn handle_request(
        &self,
        transaction: &Transaction,
        request: JsonRpcRequest<H::Params>,
    ) -> Result<(), H::Error> {
        let session = transaction.session();
        let handler = if session.is_closed() {
            match self.existing(session) {
                Some(handler) => handler,
                None => {
                    debug!(
                        session = %session.key(),
                        method = %request.method,
                        "Session closed; request not handled"
                    );
                    return Ok(());
                }
            }
        } else {
            self.handler_for(session)
        };
        handler.handle_request(transaction, request).await
    }

    async fn after_connection_established(&self, session: &Session) -> Result<(), H::Error> {
        let handler = self.handler_for(session);
        handler.after_connection_established(session).await
    }

    async fn after_connection_closed(
        &self,
        session: &Session,
        reason: &str,
    ) -> Result<(), H::Error> {
        let Some(handler) = self.handlers.write().remove(&session.key()) else {
            return Ok(());
        };
        debug!(session = %session.key(), "Releasing per-session handler");
        handler.after_connection_closed(session, reason).await
    }

    async fn handle_uncaught_exception(&self, session: &Session, error: &JsonRpcConnectorError) {
        match self.existing(session) {
            Some(handler) => handler.handle_uncaught_exception(session, error).await,
            None => warn!(
                session_id = ?session.id(),
                error = %error,
                "Uncaught exception after session handler was released"
            ),
        }
    }

    fn params_shape(&self) -> ParamsShape {
        self.shape
    }
}
