//! Multi-room TCP chat relay
//!
//! Clients connect over plain TCP, enter and leave named rooms, and
//! broadcast text lines to the other members. The protocol is line-delimited
//! UTF-8: `/enter <room>`, `/leave`, `/exit`, and plain lines as messages.
//!
//! # Architecture
//! The concurrency backbone is [`queue::HandoffQueue`], a bounded suspending
//! queue with timeout-aware dequeue and exactly-once waiter resolution. On
//! top of it, each connection is an actor:
//! - a read loop owns the socket's read side and pushes parsed control
//!   events into the connection's mailbox (an unbounded `HandoffQueue`);
//! - a main loop owns the write side and all connection state, and is driven
//!   solely by events it dequeues itself.
//!
//! Rooms fan broadcasts into member mailboxes, the
//! [`container::ClientContainer`] owns connection lifetime and orchestrates
//! ordered and timed shutdown, and [`server::Server`] ties it together with
//! the accept loop.
//!
//! # Example
//! ```ignore
//! use chat_relay::Server;
//!
//! #[tokio::main]
//! async fn main() {
//!     let server = Server::bind("127.0.0.1:8080").await.unwrap();
//!     // ... on SIGINT: server.shutdown().await;
//!     server.join().await;
//! }
//! ```

pub mod client;
pub mod container;
pub mod error;
pub mod messages;
pub mod queue;
pub mod room;
pub mod server;
pub mod types;

// Re-export main types for convenience
pub use client::{ClientHandle, ConnectedClient, ControlEvent, Mailbox};
pub use container::ClientContainer;
pub use error::AppError;
pub use messages::ClientRequest;
pub use queue::{DequeueError, EnqueueError, HandoffQueue};
pub use room::{Room, RoomRegistry};
pub use server::Server;
pub use types::ClientId;
