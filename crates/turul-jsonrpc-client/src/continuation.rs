use turul_jsonrpc_connector::{ConnectorResult, JsonRpcConnectorError};

/// Completion callback of an asynchronous request. Exactly one of the two
/// methods is called, once, on the task that delivers the response (or the
/// failure that ended the call).
pub trait Continuation<T>: Send + 'static {
    fn on_success(self: Box<Self>, result: T);

    fn on_error(self: Box<Self>, error: JsonRpcConnectorError);
}

impl<T, F> Continuation<T> for F
where
    F: FnOnce(ConnectorResult<T>) + Send + 'static,
{
    fn on_success(self: Box<Self>, result: T) {
        (*self)(Ok(result))
    }

    fn on_error(self: Box<Self>, error: JsonRpcConnectorError) {
        (*self)(Err(error))
    }
}

pub(crate) fn complete<T: 'static>(
    continuation: Box<dyn Continuation<T>>,
    outcome: ConnectorResult<T>,
) {
    match outcome {
        Ok(result) => continuation.on_success(result),
        Err(error) => continuation.on_error(error),
    }
}
