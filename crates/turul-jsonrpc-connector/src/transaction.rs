//! Server-side context of one inbound request.
//!
//! A transaction answers its request at most once. Requests without an id
//! are never answered. A handler that wants to answer after returning calls
//! [`Transaction::mark_async`] and keeps a clone of the transaction.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::Notify;
use tracing::{debug, error, warn};

use crate::error::{ConnectorResult, JsonRpcErrorObject};
use crate::error_codes;
use crate::response::{JsonRpcResponse, ResponsePayload};
use crate::session::Session;
use crate::transport::ResponseSender;
use crate::types::RequestId;

struct TransactionInner {
    session: Session,
    request_id: Option<RequestId>,
    method: String,
    sink: Arc<dyn ResponseSender>,
    responded: AtomicBool,
    is_async: AtomicBool,
    respond_on_leak: bool,
    completed: Arc<Notify>,
}

/// Handle to an inbound request's response slot. Clones share the slot.
#[derive(Clone)]
pub struct Transaction {
    inner: Arc<TransactionInner>,
}

impl Transaction {
    pub(crate) fn new(
        session: Session,
        request_id: Option<RequestId>,
        method: String,
        sink: Arc<dyn ResponseSender>,
        respond_on_leak: bool,
    ) -> Self {
        Self {
            inner: Arc::new(TransactionInner {
                session,
                request_id,
                method,
                sink,
                responded: AtomicBool::new(false),
                is_async: AtomicBool::new(false),
                respond_on_leak,
                completed: Arc::new(Notify::new()),
            }),
        }
    }

    pub fn session(&self) -> &Session {
        &self.inner.session
    }

    pub fn request_id(&self) -> Option<&RequestId> {
        self.inner.request_id.as_ref()
    }

    pub fn method(&self) -> &str {
        &self.inner.method
    }

    pub fn is_notification(&self) -> bool {
        self.inner.request_id.is_none()
    }

    /// Announce that the response will be sent after the handler returns.
    /// Suppresses the dispatcher's implicit empty response.
    pub fn mark_async(&self) {
        self.inner.is_async.store(true, Ordering::Release);
    }

    pub fn is_async(&self) -> bool {
        self.inner.is_async.load(Ordering::Acquire)
    }

    pub fn is_responded(&self) -> bool {
        self.inner.responded.load(Ordering::Acquire)
    }

    /// Send a success response. Returns `Ok(true)` if this call produced the
    /// response, `Ok(false)` if the request is a notification or was already
    /// answered (in which case nothing is sent).
    pub async fn send_response<R: Serialize>(&self, result: R) -> ConnectorResult<bool> {
        let value = serde_json::to_value(result)?;
        self.respond(ResponsePayload::Result(value), true).await
    }

    /// Send an error response, same contract as [`Transaction::send_response`]
    pub async fn send_error(&self, error: JsonRpcErrorObject) -> ConnectorResult<bool> {
        self.respond(ResponsePayload::Error(error), true).await
    }

    /// Send an error response built from a failure, keeping its source chain
    pub async fn send_failure(
        &self,
        failure: &(dyn std::error::Error + 'static),
    ) -> ConnectorResult<bool> {
        self.send_error(JsonRpcErrorObject::from_failure(failure))
            .await
    }

    /// Answer with `result: null` unless something was sent already
    pub(crate) async fn send_empty_if_unanswered(&self) -> ConnectorResult<bool> {
        self.respond(ResponsePayload::Result(Value::Null), false)
            .await
    }

    pub(crate) async fn send_error_if_unanswered(
        &self,
        error: JsonRpcErrorObject,
    ) -> ConnectorResult<bool> {
        self.respond(ResponsePayload::Error(error), false).await
    }

    async fn respond(&self, payload: ResponsePayload, explicit: bool) -> ConnectorResult<bool> {
        let Some(id) = self.inner.request_id.clone() else {
            debug!(method = %self.inner.method, "Notification: response discarded");
            return Ok(false);
        };

        if self
            .inner
            .responded
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            if explicit {
                warn!(
                    request_id = %id,
                    method = %self.inner.method,
                    "Transaction already responded; ignoring second response"
                );
            }
            return Ok(false);
        }
        self.inner.completed.notify_one();

        self.inner
            .sink
            .send_response(JsonRpcResponse::new(Some(id), payload))
            .await?;
        Ok(true)
    }

    /// Answer with a timeout error if still unanswered after `timeout`.
    /// The watchdog does not keep the transaction alive.
    pub(crate) fn arm_watchdog(&self, timeout: Duration) {
        let weak = Arc::downgrade(&self.inner);
        let completed = self.inner.completed.clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = completed.notified() => {}
                _ = tokio::time::sleep(timeout) => {
                    let Some(inner) = weak.upgrade() else { return };
                    let tx = Transaction { inner };
                    if tx.is_responded() {
                        return;
                    }
                    warn!(
                        request_id = ?tx.request_id(),
                        method = %tx.method(),
                        timeout_ms = timeout.as_millis() as u64,
                        "Asynchronous transaction not answered in time"
                    );
                    let error = JsonRpcErrorObject::server_error(
                        error_codes::ASYNC_RESPONSE_TIMEOUT,
                        "Asynchronous transaction timed out",
                        None,
                    );
                    if let Err(e) = tx.send_error_if_unanswered(error).await {
                        error!(error = %e, "Failed to send timeout response");
                    }
                }
            }
        });
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("request_id", &self.inner.request_id)
            .field("method", &self.inner.method)
            .field("is_async", &self.is_async())
            .field("responded", &self.is_responded())
            .finish()
    }
}

impl Drop for TransactionInner {
    fn drop(&mut self) {
        self.completed.notify_one();

        if !self.respond_on_leak
            || !self.is_async.load(Ordering::Acquire)
            || self.responded.load(Ordering::Acquire)
        {
            return;
        }
        let Some(id) = self.request_id.clone() else {
            return;
        };

        warn!(
            request_id = %id,
            method = %self.method,
            "Asynchronous transaction dropped without response"
        );

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            error!(request_id = %id, "No runtime available to answer dropped transaction");
            return;
        };
        let sink = self.sink.clone();
        handle.spawn(async move {
            let response = JsonRpcResponse::error(
                Some(id),
                JsonRpcErrorObject::server_error(
                    error_codes::ASYNC_RESPONSE_TIMEOUT,
                    "Transaction dropped without response",
                    None,
                ),
            );
            if let Err(e) = sink.send_response(response).await {
                error!(error = %e, "Failed to answer dropped transaction");
            }
        });
    }
}
