//! Lifecycle notifications. A failing callback is reported to the handler's
//! `handle_uncaught_exception` and never reaches the caller.

use std::any::Any;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use tracing::{debug, error, info};

use crate::error::{JsonRpcConnectorError, JsonRpcErrorObject};
use crate::handler::ErasedHandler;
use crate::session::Session;

/// Human readable text of a panic payload
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

pub(crate) fn panic_failure(payload: &(dyn Any + Send)) -> JsonRpcConnectorError {
    JsonRpcConnectorError::HandlerFailure(JsonRpcErrorObject::internal_error(Some(format!(
        "Handler panicked: {}",
        panic_message(payload)
    ))))
}

pub(crate) async fn connection_established(handler: &dyn ErasedHandler, session: &Session) {
    let _guard = session.lifecycle_lock().lock().await;
    if !session.mark_established() {
        debug!(session_id = ?session.id(), "Connection already established; not notifying");
        return;
    }

    info!(session_id = ?session.id(), "Connection established");
    let outcome = AssertUnwindSafe(handler.after_connection_established(session))
        .catch_unwind()
        .await;
    settle(handler, session, outcome).await;
}

pub(crate) async fn connection_closed(
    handler: &dyn ErasedHandler,
    session: &Session,
    reason: &str,
) {
    let _guard = session.lifecycle_lock().lock().await;
    if !session.mark_disconnected() {
        debug!(session_id = ?session.id(), "Connection not established; not notifying close");
        return;
    }

    info!(session_id = ?session.id(), reason = %reason, "Connection closed");
    let outcome = AssertUnwindSafe(handler.after_connection_closed(session, reason))
        .catch_unwind()
        .await;
    settle(handler, session, outcome).await;
}

async fn settle(
    handler: &dyn ErasedHandler,
    session: &Session,
    outcome: Result<Result<(), JsonRpcConnectorError>, Box<dyn Any + Send>>,
) {
    let failure = match outcome {
        Ok(Ok(())) => return,
        Ok(Err(e)) => e,
        Err(payload) => panic_failure(payload.as_ref()),
    };
    report_uncaught(handler, session, failure).await;
}

/// Hand a failure to `handle_uncaught_exception`; a failure in there is
/// only logged
pub(crate) async fn report_uncaught(
    handler: &dyn ErasedHandler,
    session: &Session,
    failure: JsonRpcConnectorError,
) {
    let outcome = AssertUnwindSafe(handler.handle_uncaught_exception(session, &failure))
        .catch_unwind()
        .await;

    if let Err(payload) = outcome {
        error!(
            session_id = ?session.id(),
            original = %failure,
            panic = %panic_message(payload.as_ref()),
            "Exception while executing handle_uncaught_exception"
        );
    }
}
