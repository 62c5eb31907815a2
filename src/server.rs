//! Server lifecycle
//!
//! Binds the listener, runs the accept loop, and exposes the shutdown
//! surface: immediate shutdown, and timed shutdown that warns every client,
//! waits, then forces the end.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::client::ConnectedClient;
use crate::container::ClientContainer;
use crate::error::AppError;
use crate::room::RoomRegistry;
use crate::types::ClientId;

struct ServerTasks {
    accept: Option<JoinHandle<()>>,
    timed_shutdown: Option<JoinHandle<()>>,
}

/// A running chat relay server.
pub struct Server {
    local_addr: SocketAddr,
    container: Arc<ClientContainer>,
    cancel: CancellationToken,
    tasks: tokio::sync::Mutex<ServerTasks>,
}

impl Server {
    /// Bind the listening socket and start accepting connections.
    pub async fn bind(addr: &str) -> Result<Self, AppError> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        info!(%local_addr, "server socket bound");

        let container = Arc::new(ClientContainer::new());
        let rooms = Arc::new(RoomRegistry::new());
        let cancel = CancellationToken::new();
        let accept = tokio::spawn(accept_loop(
            listener,
            Arc::clone(&container),
            rooms,
            cancel.clone(),
        ));
        Ok(Self {
            local_addr,
            container,
            cancel,
            tasks: tokio::sync::Mutex::new(ServerTasks {
                accept: Some(accept),
                timed_shutdown: None,
            }),
        })
    }

    /// The address the server is listening on (useful when bound to port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting, end every connection, and wait for them to finish.
    pub async fn shutdown(&self) {
        info!("immediate shutdown requested");
        self.cancel.cancel();
        self.container.shutdown().await;
    }

    /// Stop accepting, warn every client, wait `timeout`, then force the
    /// shutdown. Returns once the timed task is scheduled; `join` waits for
    /// it.
    pub async fn shutdown_with_timeout(&self, timeout: Duration) {
        info!(seconds = timeout.as_secs(), "timed shutdown requested");
        self.cancel.cancel();
        let container = Arc::clone(&self.container);
        let task = tokio::spawn(async move {
            container.warn_shutdown(timeout.as_secs()).await;
            tokio::time::sleep(timeout).await;
            container.shutdown().await;
        });
        self.tasks.lock().await.timed_shutdown = Some(task);
    }

    /// Wait until the accept loop and any pending timed shutdown have ended.
    pub async fn join(&self) {
        let (accept, timed) = {
            let mut tasks = self.tasks.lock().await;
            (tasks.accept.take(), tasks.timed_shutdown.take())
        };
        if let Some(task) = accept {
            let _ = task.await;
        }
        if let Some(task) = timed {
            let _ = task.await;
        }
    }
}

/// Accept loop: one [`ConnectedClient`] per accepted socket, registered with
/// the container. Ends on cancellation (the canceller owns the subsequent
/// shutdown) or on a listener error, which triggers the shutdown here.
async fn accept_loop(
    listener: TcpListener,
    container: Arc<ClientContainer>,
    rooms: Arc<RoomRegistry>,
    cancel: CancellationToken,
) {
    let mut next_id: u64 = 0;
    loop {
        let accepted = tokio::select! {
            _ = cancel.cancelled() => {
                info!("accept loop cancelled");
                return;
            }
            accepted = listener.accept() => accepted,
        };
        match accepted {
            Ok((socket, peer_addr)) => {
                next_id += 1;
                let id = ClientId(next_id);
                info!(%peer_addr, client = %id.name(), "client socket accepted");
                let client = connect(socket, id, &rooms, &container);
                if let Err(error) = container.add(client).await {
                    info!(%error, "dropped new connection");
                }
            }
            Err(error) => {
                // A listener failure is treated as the signal to terminate.
                error!(%error, "accept failed, ending");
                break;
            }
        }
    }
    container.shutdown().await;
}

fn connect(
    socket: TcpStream,
    id: ClientId,
    rooms: &Arc<RoomRegistry>,
    container: &Arc<ClientContainer>,
) -> ConnectedClient {
    ConnectedClient::spawn(socket, id, Arc::clone(rooms), Arc::clone(container))
}
