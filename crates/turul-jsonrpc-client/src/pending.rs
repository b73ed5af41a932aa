//! Correlation of outgoing requests with their responses.
//!
//! Every request is registered here before it is handed to the transport.
//! The inbound path resolves entries by id; losing the connection fails all
//! of them. Waiters are always completed outside the registry lock.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::time::Instant;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, error, warn};
use turul_jsonrpc_connector::{ConnectorResult, JsonRpcConnectorError, JsonRpcResponse, RequestId};

pub(crate) type Completion = Box<dyn FnOnce(ConnectorResult<Value>) + Send>;

/// How the caller of a pending request wants to learn its outcome
pub enum Waiter {
    /// A caller suspended until the outcome arrives
    Blocking(oneshot::Sender<ConnectorResult<Value>>),
    /// A callback run by whoever delivers the outcome
    Continuation(Completion),
}

impl Waiter {
    fn complete(self, id: &RequestId, outcome: ConnectorResult<Value>) {
        match self {
            Waiter::Blocking(tx) => {
                if tx.send(outcome).is_err() {
                    debug!(request_id = %id, "Caller stopped waiting; outcome dropped");
                }
            }
            Waiter::Continuation(callback) => {
                if catch_unwind(AssertUnwindSafe(|| callback(outcome))).is_err() {
                    error!(request_id = %id, "Continuation panicked");
                }
            }
        }
    }
}

impl std::fmt::Debug for Waiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Waiter::Blocking(_) => f.write_str("Blocking"),
            Waiter::Continuation(_) => f.write_str("Continuation"),
        }
    }
}

struct PendingCall {
    method: String,
    /// Type name of the result shape the caller decodes into
    expected: &'static str,
    waiter: Waiter,
    registered_at: Instant,
}

#[derive(Default)]
pub struct PendingCallRegistry {
    calls: Mutex<HashMap<RequestId, PendingCall>>,
}

impl PendingCallRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `waiter` under `id`. An id that is already pending is refused
    /// and the new waiter is completed with `DuplicateId`.
    pub fn register(
        &self,
        id: RequestId,
        method: &str,
        expected: &'static str,
        waiter: Waiter,
    ) -> ConnectorResult<()> {
        let mut calls = self.calls.lock();
        if calls.contains_key(&id) {
            drop(calls);
            warn!(request_id = %id, method = %method, "Request id already pending");
            waiter.complete(&id, Err(JsonRpcConnectorError::DuplicateId(id.clone())));
            return Err(JsonRpcConnectorError::DuplicateId(id));
        }
        calls.insert(
            id,
            PendingCall {
                method: method.to_string(),
                expected,
                waiter,
                registered_at: Instant::now(),
            },
        );
        Ok(())
    }

    /// Deliver a response to its waiter. Returns `false` (after logging) when
    /// nothing was waiting for it.
    pub fn resolve(&self, response: JsonRpcResponse) -> bool {
        let Some(id) = response.id.clone() else {
            warn!(error = ?response.error_object(), "Response without id; discarding");
            return false;
        };

        let Some(call) = self.calls.lock().remove(&id) else {
            warn!(request_id = %id, "No pending request for response; discarding");
            return false;
        };

        debug!(
            request_id = %id,
            method = %call.method,
            expected = call.expected,
            elapsed_ms = call.registered_at.elapsed().as_millis() as u64,
            is_error = response.is_error(),
            "Resolving pending request"
        );
        let outcome = response
            .into_result()
            .map_err(JsonRpcConnectorError::RemoteError);
        call.waiter.complete(&id, outcome);
        true
    }

    /// Complete one waiter with a failure
    pub fn fail(&self, id: &RequestId, error: JsonRpcConnectorError) -> bool {
        let Some(call) = self.calls.lock().remove(id) else {
            return false;
        };
        debug!(request_id = %id, method = %call.method, error = %error, "Failing pending request");
        call.waiter.complete(id, Err(error));
        true
    }

    /// Drop an entry without completing its waiter
    pub fn remove(&self, id: &RequestId) -> bool {
        self.calls.lock().remove(id).is_some()
    }

    /// Fail every outstanding waiter with `ConnectionLost`. Returns how many
    /// were cancelled.
    pub fn cancel_all(&self, reason: &str) -> usize {
        let drained: Vec<(RequestId, PendingCall)> = self.calls.lock().drain().collect();
        let count = drained.len();
        if count > 0 {
            warn!(pending = count, reason = %reason, "Cancelling pending requests");
        }

        for (id, call) in drained {
            call.waiter.complete(
                &id,
                Err(JsonRpcConnectorError::ConnectionLost(reason.to_string())),
            );
        }
        count
    }

    pub fn contains(&self, id: &RequestId) -> bool {
        self.calls.lock().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.lock().is_empty()
    }
}

impl std::fmt::Debug for PendingCallRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingCallRegistry")
            .field("pending", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use turul_jsonrpc_connector::JsonRpcErrorObject;

    fn blocking() -> (Waiter, oneshot::Receiver<ConnectorResult<Value>>) {
        let (tx, rx) = oneshot::channel();
        (Waiter::Blocking(tx), rx)
    }

    #[tokio::test]
    async fn test_register_then_resolve_delivers_the_response() {
        let registry = PendingCallRegistry::new();
        let (waiter, rx) = blocking();
        registry
            .register(RequestId::Number(1), "echo", "Value", waiter)
            .unwrap();

        assert!(registry.resolve(JsonRpcResponse::success(RequestId::Number(1), json!({"v": 1}))));
        assert_eq!(rx.await.unwrap().unwrap(), json!({"v": 1}));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_error_response_becomes_remote_error() {
        let registry = PendingCallRegistry::new();
        let (waiter, rx) = blocking();
        registry
            .register(RequestId::String("a".into()), "fail", "Value", waiter)
            .unwrap();

        let error = JsonRpcErrorObject::internal_error(Some("boom".into()));
        registry.resolve(JsonRpcResponse::error(
            Some(RequestId::String("a".into())),
            error.clone(),
        ));

        match rx.await.unwrap() {
            Err(JsonRpcConnectorError::RemoteError(remote)) => assert_eq!(remote, error),
            other => panic!("expected remote error, got {:?}", other),
        }
    }

    #[test]
    fn test_duplicate_id_is_rejected() {
        let registry = PendingCallRegistry::new();
        let (first, _rx1) = blocking();
        let (second, mut rx2) = blocking();

        registry.register(RequestId::Number(5), "a", "Value", first).unwrap();
        assert!(matches!(
            registry.register(RequestId::Number(5), "b", "Value", second),
            Err(JsonRpcConnectorError::DuplicateId(RequestId::Number(5)))
        ));
        assert!(matches!(
            rx2.try_recv(),
            Ok(Err(JsonRpcConnectorError::DuplicateId(_)))
        ));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_resolving_unknown_id_is_a_no_op() {
        let registry = PendingCallRegistry::new();
        let called = Arc::new(Mutex::new(false));
        let flag = called.clone();
        registry
            .register(
                RequestId::Number(1),
                "a",
                "Value",
                Waiter::Continuation(Box::new(move |_| *flag.lock() = true)),
            )
            .unwrap();

        assert!(!registry.resolve(JsonRpcResponse::empty(RequestId::Number(2))));
        assert!(!*called.lock());
        assert!(registry.contains(&RequestId::Number(1)));
    }

    #[tokio::test]
    async fn test_cancel_all_fails_every_waiter() {
        let registry = PendingCallRegistry::new();
        let (w1, rx1) = blocking();
        let (w2, rx2) = blocking();
        registry.register(RequestId::Number(1), "a", "Value", w1).unwrap();
        registry.register(RequestId::Number(2), "b", "Value", w2).unwrap();

        assert_eq!(registry.cancel_all("socket reset"), 2);
        assert!(registry.is_empty());
        assert!(rx1.await.unwrap().unwrap_err().is_connection_lost());
        assert!(rx2.await.unwrap().unwrap_err().is_connection_lost());
    }

    #[test]
    fn test_continuation_may_reenter_the_registry() {
        let registry = Arc::new(PendingCallRegistry::new());
        let inner = registry.clone();
        registry
            .register(
                RequestId::Number(1),
                "a",
                "Value",
                Waiter::Continuation(Box::new(move |_| {
                    let (tx, _rx) = oneshot::channel();
                    inner
                        .register(RequestId::Number(2), "b", "Value", Waiter::Blocking(tx))
                        .unwrap();
                })),
            )
            .unwrap();

        registry.resolve(JsonRpcResponse::empty(RequestId::Number(1)));
        assert!(registry.contains(&RequestId::Number(2)));
    }

    #[test]
    fn test_panicking_continuation_is_contained() {
        let registry = PendingCallRegistry::new();
        registry
            .register(
                RequestId::Number(1),
                "a",
                "Value",
                Waiter::Continuation(Box::new(|_| panic!("callback bug"))),
            )
            .unwrap();

        assert!(registry.resolve(JsonRpcResponse::empty(RequestId::Number(1))));
        assert!(registry.is_empty());
    }
}
