//! Container of all active connections
//!
//! The sole owner of connection lifetime: each registration pairs a
//! connection's handle with its main-loop task. Shutdown enqueues a
//! `Shutdown` event to every live connection and waits for each main loop to
//! finish; timed shutdown first broadcasts a warning notice.

use std::collections::HashMap;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::client::{ClientHandle, ConnectedClient};
use crate::error::AppError;
use crate::messages;
use crate::types::ClientId;

struct Registration {
    handle: ClientHandle,
    task: JoinHandle<()>,
}

struct Inner {
    clients: HashMap<ClientId, Registration>,
    is_shutting_down: bool,
}

/// Registry of live connections and shutdown orchestrator.
pub struct ClientContainer {
    inner: Mutex<Inner>,
}

impl ClientContainer {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                clients: HashMap::new(),
                is_shutting_down: false,
            }),
        }
    }

    /// Register a freshly accepted connection.
    ///
    /// Once a shutdown has begun the connection is told to end and the call
    /// fails with [`AppError::AlreadyShuttingDown`]; the caller just drops it.
    pub async fn add(&self, client: ConnectedClient) -> Result<(), AppError> {
        let (handle, task) = client.into_parts();
        {
            let mut inner = self.inner.lock().await;
            if !inner.is_shutting_down {
                inner.clients.insert(handle.id(), Registration { handle, task });
                return Ok(());
            }
        }
        warn!(client = %handle.name(), "rejecting connection, shutdown in progress");
        handle.shutdown().await;
        Err(AppError::AlreadyShuttingDown)
    }

    /// Deregister a connection. Idempotent; called by each main loop as it
    /// ends.
    pub async fn remove(&self, id: ClientId) {
        self.inner.lock().await.clients.remove(&id);
    }

    /// Number of currently registered connections.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.clients.len()
    }

    /// Broadcast the timed-shutdown warning to all live connections.
    pub async fn warn_shutdown(&self, seconds: u64) {
        let handles: Vec<ClientHandle> = {
            let inner = self.inner.lock().await;
            inner.clients.values().map(|r| r.handle.clone()).collect()
        };
        info!(connections = handles.len(), seconds, "warning clients of shutdown");
        let notice = messages::ending_soon(seconds);
        for handle in handles {
            handle.notify_system(&notice).await;
        }
    }

    /// End every live connection and wait for each main loop to finish.
    ///
    /// Safe to call more than once and concurrently with `add`/`remove`:
    /// each call drains whatever is registered at that instant, and new
    /// registrations are rejected from the first call onward.
    pub async fn shutdown(&self) {
        let registrations: Vec<Registration> = {
            let mut inner = self.inner.lock().await;
            inner.is_shutting_down = true;
            inner.clients.drain().map(|(_, r)| r).collect()
        };
        info!(connections = registrations.len(), "shutting down connections");
        for registration in &registrations {
            registration.handle.shutdown().await;
        }
        for registration in registrations {
            if let Err(error) = registration.task.await {
                warn!(%error, "connection main loop panicked");
            }
        }
    }
}

impl Default for ClientContainer {
    fn default() -> Self {
        Self::new()
    }
}
