//! Sessions: the logical identity of a conversation, independent of the
//! transport instance currently carrying it.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::{ConnectorResult, JsonRpcConnectorError, TransportError};
use crate::request::JsonRpcRequest;
use crate::transport::{SharedTransport, same_transport};

static NEXT_SESSION_KEY: AtomicU64 = AtomicU64::new(1);

/// Process-local key of a session object, stable across rebinds and id
/// assignment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionKey(u64);

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session#{}", self.0)
    }
}

struct SessionInner {
    key: SessionKey,
    /// Assigned once, then immutable
    id: RwLock<Option<String>>,
    transport: RwLock<Option<SharedTransport>>,
    closed: AtomicBool,
    /// Set between a connection-established and the matching
    /// connection-closed notification
    established: AtomicBool,
    attributes: RwLock<HashMap<String, Value>>,
    /// Serializes lifecycle callbacks for this session
    lifecycle: tokio::sync::Mutex<()>,
    /// Unix millis
    created_at: u64,
}

/// Cheaply cloneable handle to a session
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    /// Create a session with no id and no transport
    pub fn new() -> Self {
        Self {
            inner: Arc::new(SessionInner {
                key: SessionKey(NEXT_SESSION_KEY.fetch_add(1, Ordering::Relaxed)),
                id: RwLock::new(None),
                transport: RwLock::new(None),
                closed: AtomicBool::new(false),
                established: AtomicBool::new(false),
                attributes: RwLock::new(HashMap::new()),
                lifecycle: tokio::sync::Mutex::new(()),
                created_at: chrono::Utc::now().timestamp_millis() as u64,
            }),
        }
    }

    /// Create a session already bound to a transport
    pub fn with_transport(transport: SharedTransport) -> Self {
        let session = Self::new();
        session.rebind(transport);
        session
    }

    pub fn key(&self) -> SessionKey {
        self.inner.key
    }

    pub fn id(&self) -> Option<String> {
        self.inner.id.read().clone()
    }

    pub fn created_at(&self) -> u64 {
        self.inner.created_at
    }

    /// Assign the session id. Assigning the current id again is a no-op;
    /// assigning a different one once set is refused.
    pub fn assign_id(&self, id: impl Into<String>) -> ConnectorResult<()> {
        let id = id.into();
        let mut slot = self.inner.id.write();
        match slot.as_deref() {
            Some(current) if current == id => Ok(()),
            Some(current) => Err(JsonRpcConnectorError::SessionIdAlreadyAssigned {
                current: current.to_string(),
                requested: id,
            }),
            None => {
                debug!(session = %self.inner.key, session_id = %id, "Session id assigned");
                *slot = Some(id);
                Ok(())
            }
        }
    }

    /// Bind the session to a (new) transport instance, keeping its identity.
    /// Returns `false` if it was already bound to this very transport or the
    /// session is closed.
    pub fn rebind(&self, transport: SharedTransport) -> bool {
        if self.is_closed() {
            warn!(session = %self.inner.key, "Refusing to rebind a closed session");
            return false;
        }

        let mut slot = self.inner.transport.write();
        if let Some(current) = slot.as_ref() {
            if same_transport(current, &transport) {
                return false;
            }
        }

        debug!(
            session = %self.inner.key,
            transport = transport.transport_type(),
            "Session bound to transport"
        );
        *slot = Some(transport);
        true
    }

    pub fn transport(&self) -> Option<SharedTransport> {
        self.inner.transport.read().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Close the session and the transport backing it. Idempotent.
    pub async fn close(&self) -> ConnectorResult<()> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let transport = self.inner.transport.write().take();
        info!(session = %self.inner.key, session_id = ?self.id(), "Session closed");

        if let Some(transport) = transport {
            transport.close().await?;
        }
        Ok(())
    }

    /// Push a server-initiated event to the peer over the bound transport
    pub async fn send_notification<P: Serialize>(
        &self,
        method: &str,
        params: Option<P>,
    ) -> ConnectorResult<()> {
        if self.is_closed() {
            return Err(JsonRpcConnectorError::SessionClosed);
        }
        let transport = self
            .transport()
            .ok_or(JsonRpcConnectorError::TransportFailure(
                TransportError::NotConnected,
            ))?;

        let params = params.map(serde_json::to_value).transpose()?;
        let notification: JsonRpcRequest = JsonRpcRequest::notification(method, params);
        transport.send(serde_json::to_string(&notification)?).await?;
        Ok(())
    }

    pub fn set_attribute(&self, key: impl Into<String>, value: Value) {
        self.inner.attributes.write().insert(key.into(), value);
    }

    pub fn attribute(&self, key: &str) -> Option<Value> {
        self.inner.attributes.read().get(key).cloned()
    }

    pub fn remove_attribute(&self, key: &str) -> Option<Value> {
        self.inner.attributes.write().remove(key)
    }

    pub fn same_session(&self, other: &Session) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn lifecycle_lock(&self) -> &tokio::sync::Mutex<()> {
        &self.inner.lifecycle
    }

    /// Mark the connection as established; `false` if it already was
    pub(crate) fn mark_established(&self) -> bool {
        !self.inner.established.swap(true, Ordering::AcqRel)
    }

    /// Mark the connection as gone; `false` if it was not established
    pub(crate) fn mark_disconnected(&self) -> bool {
        self.inner.established.swap(false, Ordering::AcqRel)
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("key", &self.inner.key)
            .field("id", &self.id())
            .field("bound", &self.inner.transport.read().is_some())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Live sessions by assigned id
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Session>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session under its assigned id. Another live session with
    /// the same id is a conflict; a closed one is replaced.
    pub fn insert(&self, session: Session) -> ConnectorResult<()> {
        let id = session
            .id()
            .ok_or(JsonRpcConnectorError::SessionIdUnassigned)?;

        let mut sessions = self.sessions.write();
        if let Some(existing) = sessions.get(&id) {
            if existing.same_session(&session) {
                return Ok(());
            }
            if !existing.is_closed() {
                return Err(JsonRpcConnectorError::SessionIdConflict(id));
            }
            warn!(session_id = %id, "Replacing closed session with the same id");
        }
        sessions.insert(id, session);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<Session> {
        self.sessions.read().get(id).cloned()
    }

    pub fn remove(&self, id: &str) -> Option<Session> {
        self.sessions.write().remove(id)
    }

    pub fn ids(&self) -> Vec<String> {
        self.sessions.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    /// Remove and close every session
    pub async fn close_all(&self) {
        let drained: Vec<Session> = self.sessions.write().drain().map(|(_, s)| s).collect();
        for session in drained {
            if let Err(e) = session.close().await {
                warn!(session_id = ?session.id(), error = %e, "Failed to close session");
            }
        }
    }
}
