//! End-to-end tests over real loopback sockets.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

use chat_relay::{messages, ClientContainer, ClientId, ConnectedClient, RoomRegistry, Server};

const READ_TIMEOUT: Duration = Duration::from_secs(5);

struct TestClient {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

impl TestClient {
    async fn connect(server: &Server) -> Self {
        let stream = TcpStream::connect(server.local_addr()).await.unwrap();
        Self::from_stream(stream)
    }

    fn from_stream(stream: TcpStream) -> Self {
        let (read_half, writer) = stream.into_split();
        Self {
            lines: BufReader::new(read_half).lines(),
            writer,
        }
    }

    async fn send_line(&mut self, line: &str) {
        self.writer.write_all(line.as_bytes()).await.unwrap();
        self.writer.write_all(b"\n").await.unwrap();
    }

    /// Next line from the server; `None` on clean EOF.
    async fn read_line(&mut self) -> Option<String> {
        timeout(READ_TIMEOUT, self.lines.next_line())
            .await
            .expect("timed out waiting for a server line")
            .unwrap()
    }

    async fn expect_line(&mut self, expected: &str) {
        assert_eq!(self.read_line().await.as_deref(), Some(expected));
    }
}

#[tokio::test]
async fn test_room_broadcast_reaches_the_other_member_only() {
    let server = Server::bind("127.0.0.1:0").await.unwrap();

    let mut alice = TestClient::connect(&server).await;
    alice.expect_line(messages::WELCOME).await;
    let mut bob = TestClient::connect(&server).await;
    bob.expect_line(messages::WELCOME).await;

    alice.send_line("/enter R").await;
    alice.expect_line(&messages::entered_room("R")).await;
    bob.send_line("/enter R").await;
    bob.expect_line(&messages::entered_room("R")).await;

    alice.send_line("hi").await;
    let line = bob.read_line().await.unwrap();
    assert!(line.ends_with("says: hi"), "unexpected line: {line}");

    // Alice never receives her own broadcast: her next line is Bob's reply.
    bob.send_line("yo").await;
    let line = alice.read_line().await.unwrap();
    assert!(line.ends_with("says: yo"), "unexpected line: {line}");

    server.shutdown().await;
}

#[tokio::test]
async fn test_exit_writes_goodbye_then_closes() {
    let server = Server::bind("127.0.0.1:0").await.unwrap();
    let mut client = TestClient::connect(&server).await;
    client.expect_line(messages::WELCOME).await;

    client.send_line("/enter R").await;
    client.expect_line(&messages::entered_room("R")).await;
    client.send_line("/exit").await;
    client.expect_line(messages::BYE).await;
    assert_eq!(client.read_line().await, None);

    server.shutdown().await;
}

#[tokio::test]
async fn test_message_outside_a_room_is_rejected() {
    let server = Server::bind("127.0.0.1:0").await.unwrap();
    let mut client = TestClient::connect(&server).await;
    client.expect_line(messages::WELCOME).await;

    client.send_line("hello?").await;
    client.expect_line(messages::ERR_NOT_IN_A_ROOM).await;

    // Leaving the room turns messages back into errors.
    client.send_line("/enter R").await;
    client.expect_line(&messages::entered_room("R")).await;
    client.send_line("/leave").await;
    client.send_line("anyone?").await;
    client.expect_line(messages::ERR_NOT_IN_A_ROOM).await;

    server.shutdown().await;
}

#[tokio::test]
async fn test_unknown_command_is_invalid() {
    let server = Server::bind("127.0.0.1:0").await.unwrap();
    let mut client = TestClient::connect(&server).await;
    client.expect_line(messages::WELCOME).await;

    client.send_line("/bogus").await;
    client.expect_line(messages::ERR_INVALID_LINE).await;

    server.shutdown().await;
}

#[tokio::test]
async fn test_abrupt_disconnect_leaves_other_connections_unaffected() {
    let server = Server::bind("127.0.0.1:0").await.unwrap();

    let mut alice = TestClient::connect(&server).await;
    alice.expect_line(messages::WELCOME).await;
    let mut bob = TestClient::connect(&server).await;
    bob.expect_line(messages::WELCOME).await;
    alice.send_line("/enter R").await;
    alice.expect_line(&messages::entered_room("R")).await;
    bob.send_line("/enter R").await;
    bob.expect_line(&messages::entered_room("R")).await;

    // Bob's socket drops without an /exit.
    drop(bob);

    // Alice can still use the room.
    alice.send_line("still here").await;
    alice.send_line("/leave").await;
    alice.send_line("gone?").await;
    alice.expect_line(messages::ERR_NOT_IN_A_ROOM).await;

    server.shutdown().await;
}

#[tokio::test]
async fn test_immediate_shutdown_notifies_and_closes() {
    let server = Server::bind("127.0.0.1:0").await.unwrap();
    let mut client = TestClient::connect(&server).await;
    client.expect_line(messages::WELCOME).await;

    server.shutdown().await;
    client.expect_line(messages::SERVER_ENDING).await;
    assert_eq!(client.read_line().await, None);

    server.join().await;
}

#[tokio::test]
async fn test_timed_shutdown_warns_waits_then_ends() {
    let server = Server::bind("127.0.0.1:0").await.unwrap();
    let mut client = TestClient::connect(&server).await;
    client.expect_line(messages::WELCOME).await;

    let started = Instant::now();
    server.shutdown_with_timeout(Duration::from_secs(1)).await;

    let warning = client.read_line().await.unwrap();
    assert!(
        warning.contains(&messages::ending_soon(1)),
        "unexpected warning: {warning}"
    );
    client.expect_line(messages::SERVER_ENDING).await;
    assert_eq!(client.read_line().await, None);
    assert!(started.elapsed() >= Duration::from_millis(900));

    server.join().await;
}

#[tokio::test]
async fn test_registration_is_rejected_once_shutdown_began() {
    // Drive the container directly with a hand-rolled accept so the
    // rejection path is observable.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let container = Arc::new(ClientContainer::new());
    let rooms = Arc::new(RoomRegistry::new());

    container.shutdown().await;

    let connect = tokio::spawn(async move { TcpStream::connect(addr).await.unwrap() });
    let (socket, _) = listener.accept().await.unwrap();
    let client = ConnectedClient::spawn(
        socket,
        ClientId(1),
        Arc::clone(&rooms),
        Arc::clone(&container),
    );
    assert!(container.add(client).await.is_err());
    assert_eq!(container.len().await, 0);

    // The rejected connection is told the server is ending and dropped.
    let mut rejected = TestClient::from_stream(connect.await.unwrap());
    rejected.expect_line(messages::WELCOME).await;
    rejected.expect_line(messages::SERVER_ENDING).await;
    assert_eq!(rejected.read_line().await, None);
}
