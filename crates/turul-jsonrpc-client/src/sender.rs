//! Outgoing requests and notifications.
//!
//! Both request styles register with the [`PendingCallRegistry`] before the
//! message is handed to the transport, so a reply can never overtake its
//! registration.

use std::any::type_name;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use parking_lot::RwLock;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::debug;
use turul_jsonrpc_connector::{
    ConnectorResult, JsonRpcConnectorError, JsonRpcRequest, RequestId, Session, SharedTransport,
    TransportError,
};

use crate::config::ClientConfig;
use crate::continuation::{self, Continuation};
use crate::pending::{PendingCallRegistry, Waiter};

pub struct JsonRpcRequestSender {
    session: Session,
    pending: Arc<PendingCallRegistry>,
    next_id: AtomicI64,
    config: ClientConfig,
    /// Session id attached to outgoing params; updated together with the
    /// session's own id
    session_id: RwLock<Option<String>>,
}

impl JsonRpcRequestSender {
    pub fn new(session: Session, pending: Arc<PendingCallRegistry>, config: ClientConfig) -> Self {
        let session_id = RwLock::new(session.id());
        Self {
            session,
            pending,
            next_id: AtomicI64::new(1),
            config,
            session_id,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn session_id(&self) -> Option<String> {
        self.session_id.read().clone()
    }

    /// Assign the session id. The sender and the session change together;
    /// no outgoing message observes one without the other.
    pub fn set_session_id(&self, id: impl Into<String>) -> ConnectorResult<()> {
        let id = id.into();
        let mut slot = self.session_id.write();
        self.session.assign_id(id.clone())?;
        debug!(session_id = %id, "Session id set");
        *slot = Some(id);
        Ok(())
    }

    fn next_request_id(&self) -> RequestId {
        let n = self.next_id.fetch_add(1, Ordering::Relaxed);
        match &self.config.request_ids.prefix {
            Some(prefix) => RequestId::String(format!("{}{}", prefix, n)),
            None => RequestId::Number(n),
        }
    }

    /// Attach the session id to object params, or make an object to carry
    /// it when there are no params. Other shapes are sent untouched.
    fn with_session_id(&self, params: Option<Value>) -> Option<Value> {
        if !self.config.session.inject_session_id {
            return params;
        }
        let guard = self.session_id.read();
        let Some(session_id) = guard.as_ref() else {
            return params;
        };
        let key = &self.config.session.session_id_param;

        match params {
            None => {
                let mut object = Map::new();
                object.insert(key.clone(), Value::String(session_id.clone()));
                Some(Value::Object(object))
            }
            Some(Value::Object(mut object)) => {
                object
                    .entry(key.clone())
                    .or_insert_with(|| Value::String(session_id.clone()));
                Some(Value::Object(object))
            }
            other => other,
        }
    }

    fn encode<P: Serialize>(
        &self,
        id: Option<RequestId>,
        method: &str,
        params: Option<P>,
    ) -> ConnectorResult<String> {
        let params = params.map(serde_json::to_value).transpose()?;
        let request = JsonRpcRequest::new(id, method, self.with_session_id(params));
        if self.config.logging.log_requests {
            debug!(request_id = ?request.id, method = %method, "Sending request");
        }
        Ok(serde_json::to_string(&request)?)
    }

    fn transport(&self) -> ConnectorResult<SharedTransport> {
        if self.session.is_closed() {
            return Err(JsonRpcConnectorError::SessionClosed);
        }
        self.session
            .transport()
            .ok_or(JsonRpcConnectorError::TransportFailure(TransportError::NotConnected))
    }

    /// Send a request and wait for its result, decoded into `R`
    pub async fn send_request<P, R>(&self, method: &str, params: Option<P>) -> ConnectorResult<R>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let (id, value) = self.call(method, params, type_name::<R>()).await?;
        decode_result(id, value)
    }

    /// Send a request and wait for its raw result
    pub async fn send_request_value(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> ConnectorResult<Value> {
        let (_, value) = self.call(method, params, type_name::<Value>()).await?;
        Ok(value)
    }

    pub async fn send_request_no_params<R: DeserializeOwned>(
        &self,
        method: &str,
    ) -> ConnectorResult<R> {
        self.send_request::<Value, R>(method, None).await
    }

    async fn call<P: Serialize>(
        &self,
        method: &str,
        params: Option<P>,
        expected: &'static str,
    ) -> ConnectorResult<(RequestId, Value)> {
        let transport = self.transport()?;
        let id = self.next_request_id();
        let message = self.encode(Some(id.clone()), method, params)?;

        let (tx, rx) = oneshot::channel();
        self.pending
            .register(id.clone(), method, expected, Waiter::Blocking(tx))?;
        let registration = Registration::new(&self.pending, id.clone());

        // A close that raced the registration has already drained the registry
        if self.session.is_closed() {
            return Err(JsonRpcConnectorError::SessionClosed);
        }
        transport.send(message).await?;

        let outcome = rx.await;
        registration.disarm();
        let value = outcome.map_err(|_| {
            JsonRpcConnectorError::ConnectionLost("pending request dropped".to_string())
        })??;
        if self.config.logging.log_responses {
            debug!(request_id = %id, method = %method, "Received result");
        }
        Ok((id, value))
    }

    /// Send a request without waiting. `continuation` runs exactly once,
    /// with the decoded result, the peer's error, or the failure that
    /// prevented the call. Returns the id the request was sent under.
    ///
    /// The send itself is spawned, so this must be called from within a
    /// Tokio runtime. Outside one the continuation receives a
    /// `Configuration` error and `None` is returned.
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
        let continuation: Box<dyn Continuation<R>> = Box::new(continuation);

        let prepared = Handle::try_current()
            .map_err(|e| {
                JsonRpcConnectorError::Configuration(format!(
                    "continuation requests need a Tokio runtime: {}",
                    e
                ))
            })
            .and_then(|runtime| {
                let transport = self.transport()?;
                let id = self.next_request_id();
                let message = self.encode(Some(id.clone()), method, params)?;
                Ok((runtime, transport, id, message))
            });
        let (runtime, transport, id, message) = match prepared {
            Ok(prepared) => prepared,
            Err(e) => {
                continuation::complete(continuation, Err(e));
                return None;
            }
        };

        let result_id = id.clone();
        let completion = Box::new(move |outcome: ConnectorResult<Value>| {
            continuation::complete(
                continuation,
                outcome.and_then(|v| decode_result(result_id, v)),
            );
        });
        if self
            .pending
            .register(id.clone(), method, type_name::<R>(), Waiter::Continuation(completion))
            .is_err()
        {
            return None;
        }
        if self.session.is_closed() {
            self.pending.fail(&id, JsonRpcConnectorError::SessionClosed);
            return None;
        }

        let pending = self.pending.clone();
        let sent_id = id.clone();
        runtime.spawn(async move {
            if let Err(e) = transport.send(message).await {
                pending.fail(&sent_id, e.into());
            }
        });
        Some(id)
    }

    /// Fire a notification. Success means the transport accepted it, not that
    /// the peer processed it.
    pub async fn send_notification<P: Serialize>(
        &self,
        method: &str,
        params: Option<P>,
    ) -> ConnectorResult<()> {
        let transport = self.transport()?;
        let message = self.encode(None, method, params)?;
        transport.send(message).await?;
        Ok(())
    }

    pub fn pending(&self) -> &Arc<PendingCallRegistry> {
        &self.pending
    }
}

/// Removes a blocking call's registry entry when the caller stops waiting
/// before the outcome arrives
struct Registration<'a> {
    pending: &'a PendingCallRegistry,
    id: Option<RequestId>,
}

impl<'a> Registration<'a> {
    fn new(pending: &'a PendingCallRegistry, id: RequestId) -> Self {
        Self {
            pending,
            id: Some(id),
        }
    }

    fn disarm(mut self) {
        self.id = None;
    }
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        if let Some(id) = self.id.take() {
            if self.pending.remove(&id) {
                debug!(request_id = %id, "Caller stopped waiting; pending entry removed");
            }
        }
    }
}

fn decode_result<R: DeserializeOwned>(id: RequestId, value: Value) -> ConnectorResult<R> {
    serde_json::from_value(value).map_err(|e| JsonRpcConnectorError::ResultShapeMismatch {
        id,
        expected: type_name::<R>(),
        reason: e.to_string(),
    })
}
