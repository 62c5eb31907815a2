//! Per-connection actor
//!
//! Each accepted socket is driven by exactly two tasks:
//! - a *read loop* that owns the read half, decodes lines and pushes control
//!   events into the connection's mailbox; it is the only reader of the
//!   socket.
//! - a *main loop* (the processor) that owns the write half and all
//!   connection state, and reacts to control events dequeued from the
//!   mailbox; it is the only writer of the socket and the only task that
//!   touches `current_room`.
//!
//! Everything else in the server influences a connection solely by enqueuing
//! a [`ControlEvent`] through its [`ClientHandle`].

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use crate::container::ClientContainer;
use crate::messages::{self, ClientRequest};
use crate::queue::{EnqueueError, HandoffQueue};
use crate::room::{Room, RoomRegistry};
use crate::types::ClientId;

/// The control-event queue feeding one connection's processor.
pub type Mailbox = HandoffQueue<ControlEvent>;

/// The control events a connection's main loop handles.
#[derive(Debug)]
pub enum ControlEvent {
    /// A message relayed by a room
    RoomMessage { sender: String, text: String },
    /// A line received from the remote client, already parsed
    RemoteRequest(ClientRequest),
    /// The remote client closed its side or the read failed
    RemoteClosed,
    /// The server asked this connection to end
    Shutdown,
}

/// Cheaply cloneable, non-owning view of a connection.
///
/// Rooms and the container hold these; the connection itself is owned by the
/// container alone. All methods communicate by enqueuing into the mailbox,
/// which is unbounded so senders never stall on a slow connection.
#[derive(Clone)]
pub struct ClientHandle {
    id: ClientId,
    name: Arc<str>,
    mailbox: Arc<Mailbox>,
}

impl ClientHandle {
    pub fn new(id: ClientId) -> Self {
        Self {
            id,
            name: id.name().into(),
            mailbox: Arc::new(Mailbox::unbounded()),
        }
    }

    pub fn id(&self) -> ClientId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    #[cfg(test)]
    pub(crate) fn mailbox(&self) -> &Arc<Mailbox> {
        &self.mailbox
    }

    /// Relay a room message to this connection.
    pub async fn send(&self, sender: &str, text: &str) {
        let _ = self
            .push(ControlEvent::RoomMessage {
                sender: sender.to_string(),
                text: text.to_string(),
            })
            .await;
    }

    /// Deliver a server-originated notice to this connection.
    pub async fn notify_system(&self, text: &str) {
        self.send(messages::SYSTEM_SENDER, text).await;
    }

    /// Ask this connection to end its session.
    pub async fn shutdown(&self) {
        let _ = self.push(ControlEvent::Shutdown).await;
    }

    pub(crate) async fn push(&self, event: ControlEvent) -> Result<(), EnqueueError> {
        // A closed mailbox means the connection already ended; late events
        // are harmless no-ops.
        self.mailbox.enqueue(event).await
    }
}

/// A live connection: its handle plus the main-loop task that owns it.
pub struct ConnectedClient {
    handle: ClientHandle,
    task: JoinHandle<()>,
}

impl ConnectedClient {
    /// Split the socket and start the read loop and main loop tasks.
    pub fn spawn(
        socket: TcpStream,
        id: ClientId,
        rooms: Arc<RoomRegistry>,
        container: Arc<ClientContainer>,
    ) -> Self {
        let handle = ClientHandle::new(id);
        let (read_half, write_half) = socket.into_split();
        let reader_cancel = CancellationToken::new();
        let reader_task = tokio::spawn(read_loop(read_half, handle.clone(), reader_cancel.clone()));
        let processor = Processor {
            handle: handle.clone(),
            writer: BufWriter::new(write_half),
            rooms,
            container,
            reader_cancel,
            reader_task,
            current_room: None,
        };
        let task = tokio::spawn(processor.run());
        Self { handle, task }
    }

    pub fn handle(&self) -> &ClientHandle {
        &self.handle
    }

    pub(crate) fn into_parts(self) -> (ClientHandle, JoinHandle<()>) {
        (self.handle, self.task)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Active,
    Closing,
    Closed,
}

/// The per-connection state machine.
///
/// Sole owner of the write half and of `current_room`; cross-connection
/// visibility of that state exists only through mailbox events.
struct Processor {
    handle: ClientHandle,
    writer: BufWriter<OwnedWriteHalf>,
    rooms: Arc<RoomRegistry>,
    container: Arc<ClientContainer>,
    reader_cancel: CancellationToken,
    reader_task: JoinHandle<()>,
    current_room: Option<Arc<Room>>,
}

impl Processor {
    async fn run(mut self) {
        info!(client = %self.handle.name(), "main loop started");
        let mut state = if self.write_line(messages::WELCOME).await.is_ok() {
            Lifecycle::Active
        } else {
            Lifecycle::Closing
        };
        while state == Lifecycle::Active {
            state = match self.handle.mailbox.dequeue().await {
                Ok(event) => self.handle_event(event).await,
                Err(_) => Lifecycle::Closing,
            };
        }
        self.close().await;
        state = Lifecycle::Closed;
        trace!(?state, "connection terminal");
    }

    async fn handle_event(&mut self, event: ControlEvent) -> Lifecycle {
        match event {
            ControlEvent::Shutdown => {
                info!(client = %self.handle.name(), "received shutdown");
                let _ = self.write_line(messages::SERVER_ENDING).await;
                self.reader_cancel.cancel();
                Lifecycle::Closing
            }
            ControlEvent::RoomMessage { sender, text } => {
                trace!(client = %self.handle.name(), %sender, "relaying room message");
                match self.write_line(&messages::from_client(&sender, &text)).await {
                    Ok(()) => Lifecycle::Active,
                    Err(_) => Lifecycle::Closing,
                }
            }
            ControlEvent::RemoteRequest(request) => self.handle_request(request).await,
            ControlEvent::RemoteClosed => {
                info!(client = %self.handle.name(), "remote input closed");
                Lifecycle::Closing
            }
        }
    }

    async fn handle_request(&mut self, request: ClientRequest) -> Lifecycle {
        match request {
            ClientRequest::EnterRoom(name) => {
                info!(client = %self.handle.name(), room = %name, "entering room");
                self.leave_current_room().await;
                let room = self.rooms.get_or_create(&name).await;
                room.add(self.handle.clone()).await;
                self.current_room = Some(room);
                self.write_or_close(&messages::entered_room(&name)).await
            }
            ClientRequest::LeaveRoom => {
                info!(client = %self.handle.name(), "leaving room");
                self.leave_current_room().await;
                Lifecycle::Active
            }
            ClientRequest::Exit => {
                info!(client = %self.handle.name(), "exiting");
                self.leave_current_room().await;
                let _ = self.write_line(messages::BYE).await;
                self.reader_cancel.cancel();
                Lifecycle::Closing
            }
            ClientRequest::Message(text) => match &self.current_room {
                Some(room) => {
                    trace!(client = %self.handle.name(), room = %room.name(), "posting message");
                    room.post(&self.handle, &text).await;
                    Lifecycle::Active
                }
                None => self.write_or_close(messages::ERR_NOT_IN_A_ROOM).await,
            },
            ClientRequest::Invalid => {
                debug!(client = %self.handle.name(), "invalid request line");
                self.write_or_close(messages::ERR_INVALID_LINE).await
            }
        }
    }

    /// Ordered teardown: stop the reader, close the socket, leave any room,
    /// wait for the reader, deregister.
    async fn close(mut self) {
        self.reader_cancel.cancel();
        let _ = self.writer.shutdown().await;
        self.leave_current_room().await;
        let _ = self.reader_task.await;
        self.container.remove(self.handle.id()).await;
        // Events still queued at this point are never drained.
        self.handle.mailbox.close();
        info!(client = %self.handle.name(), "main loop ending");
    }

    async fn leave_current_room(&mut self) {
        if let Some(room) = self.current_room.take() {
            room.remove(self.handle.id()).await;
        }
    }

    async fn write_or_close(&mut self, line: &str) -> Lifecycle {
        match self.write_line(line).await {
            Ok(()) => Lifecycle::Active,
            Err(_) => Lifecycle::Closing,
        }
    }

    async fn write_line(&mut self, line: &str) -> std::io::Result<()> {
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await
    }
}

/// Read loop: decodes lines into control events until EOF, an I/O error, or
/// cancellation by the processor.
///
/// Cancellation unblocks a pending read promptly and is idempotent; after it
/// fires, no further mailbox writes are made.
async fn read_loop(read_half: OwnedReadHalf, handle: ClientHandle, cancel: CancellationToken) {
    let mut lines = BufReader::new(read_half).lines();
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => break,
            next = lines.next_line() => next,
        };
        match next {
            Ok(Some(line)) => {
                let request = ClientRequest::parse(&line);
                if handle
                    .push(ControlEvent::RemoteRequest(request))
                    .await
                    .is_err()
                {
                    break;
                }
            }
            Ok(None) => {
                debug!(client = %handle.name(), "end of input stream reached");
                let _ = handle.push(ControlEvent::RemoteClosed).await;
                break;
            }
            Err(error) => {
                debug!(client = %handle.name(), %error, "read loop error");
                let _ = handle.push(ControlEvent::RemoteClosed).await;
                break;
            }
        }
    }
    debug!(client = %handle.name(), "read loop ending");
}
