//! Explicitly passed connection pool with scoped checkout.
//!
//! A checked-out connection is a [`PooledConnection`] guard; dropping it
//! returns the connection (or, after [`PooledConnection::discard`], frees the
//! slot) on every exit path.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

use crate::config::PoolConfig;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("No connection available within {0:?}")]
    Timeout(Duration),

    #[error("Pool is closed")]
    Closed,

    #[error("Failed to open connection: {0}")]
    Connect(String),
}

/// Opens connections for a [`ConnectionPool`]
#[async_trait]
pub trait ConnectionFactory: Send + Sync + 'static {
    type Connection: Send + 'static;

    async fn connect(&self) -> Result<Self::Connection, PoolError>;

    /// Whether an idle connection may be handed out again
    fn is_reusable(&self, connection: &Self::Connection) -> bool {
        let _ = connection;
        true
    }
}

struct PoolInner<F: ConnectionFactory> {
    factory: F,
    idle: Mutex<Vec<F::Connection>>,
    permits: Arc<Semaphore>,
    config: PoolConfig,
    closed: AtomicBool,
}

impl<F: ConnectionFactory> PoolInner<F> {
    fn release(&self, connection: F::Connection) {
        if self.closed.load(Ordering::Acquire) || !self.factory.is_reusable(&connection) {
            debug!("Dropping connection instead of returning it to the pool");
            return;
        }
        self.idle.lock().push(connection);
    }
}

pub struct ConnectionPool<F: ConnectionFactory> {
    inner: Arc<PoolInner<F>>,
}

impl<F: ConnectionFactory> Clone for ConnectionPool<F> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<F: ConnectionFactory> ConnectionPool<F> {
    /// Build a pool. A `max_size` of zero is raised to one.
    pub fn new(factory: F, mut config: PoolConfig) -> Self {
        if config.max_size == 0 {
            warn!("Pool max_size of 0 would refuse every checkout; using 1");
            config.max_size = 1;
        }
        Self {
            inner: Arc::new(PoolInner {
                factory,
                idle: Mutex::new(Vec::new()),
                permits: Arc::new(Semaphore::new(config.max_size)),
                config,
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Check out a connection, reusing an idle one when possible. Waits up
    /// to `acquire_timeout` for a free slot.
    pub async fn acquire(&self) -> Result<PooledConnection<F>, PoolError> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(PoolError::Closed);
        }

        let timeout = self.inner.config.acquire_timeout;
        let permit = tokio::time::timeout(timeout, self.inner.permits.clone().acquire_owned())
            .await
            .map_err(|_| {
                warn!(timeout_ms = timeout.as_millis() as u64, "Connection pool exhausted");
                PoolError::Timeout(timeout)
            })?
            .map_err(|_| PoolError::Closed)?;

        let reused = loop {
            let Some(candidate) = self.inner.idle.lock().pop() else {
                break None;
            };
            if self.inner.factory.is_reusable(&candidate) {
                break Some(candidate);
            }
            debug!("Discarding stale idle connection");
        };

        let connection = match reused {
            Some(connection) => connection,
            None => {
                debug!("Opening new pooled connection");
                self.inner.factory.connect().await?
            }
        };

        Ok(PooledConnection {
            connection: Some(connection),
            pool: self.inner.clone(),
            _permit: permit,
        })
    }

    /// Connections waiting to be reused
    pub fn idle_count(&self) -> usize {
        self.inner.idle.lock().len()
    }

    /// Slots that can be checked out right now
    pub fn available(&self) -> usize {
        self.inner.permits.available_permits()
    }

    /// Refuse further checkouts and drop idle connections. Connections still
    /// checked out are dropped when their guard is.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        self.inner.permits.close();
        self.inner.idle.lock().clear();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }
}

/// A checked-out connection
pub struct PooledConnection<F: ConnectionFactory> {
    connection: Option<F::Connection>,
    pool: Arc<PoolInner<F>>,
    _permit: OwnedSemaphorePermit,
}

impl<F: ConnectionFactory> PooledConnection<F> {
    /// Drop a broken connection instead of returning it to the pool
    pub fn discard(mut self) {
        self.connection.take();
    }
}

impl<F: ConnectionFactory> Deref for PooledConnection<F> {
    type Target = F::Connection;

    fn deref(&self) -> &Self::Target {
        match &self.connection {
            Some(connection) => connection,
            None => unreachable!("connection is only taken on discard or drop"),
        }
    }
}

impl<F: ConnectionFactory> DerefMut for PooledConnection<F> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        match &mut self.connection {
            Some(connection) => connection,
            None => unreachable!("connection is only taken on discard or drop"),
        }
    }
}

impl<F: ConnectionFactory> Drop for PooledConnection<F> {
    fn drop(&mut self) {
        if let Some(connection) = self.connection.take() {
            self.pool.release(connection);
        }
    }
}
