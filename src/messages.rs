//! Line protocol definitions
//!
//! The client command grammar and the text of every line the server writes.
//! The protocol is line-delimited UTF-8: lines starting with `/` are
//! commands, everything else is a message for the current room.

/// A parsed client input line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientRequest {
    /// `/enter <name>` - join the named room, leaving any previous one
    EnterRoom(String),
    /// `/leave` - leave the current room
    LeaveRoom,
    /// `/exit` - end the session
    Exit,
    /// A plain line, relayed to the current room
    Message(String),
    /// A `/` line that matches no command
    Invalid,
}

impl ClientRequest {
    /// Parse one input line into a request.
    pub fn parse(line: &str) -> Self {
        let line = line.trim_end_matches(['\r', '\n']);
        if !line.starts_with('/') {
            return ClientRequest::Message(line.to_string());
        }
        let mut parts = line.split_whitespace();
        match (parts.next(), parts.next(), parts.next()) {
            (Some("/enter"), Some(name), None) => ClientRequest::EnterRoom(name.to_string()),
            (Some("/leave"), None, None) => ClientRequest::LeaveRoom,
            (Some("/exit"), None, None) => ClientRequest::Exit,
            _ => ClientRequest::Invalid,
        }
    }
}

/// Greeting written when a connection is accepted.
pub const WELCOME: &str = "Welcome to the chat relay. Use /enter <room> to join a room.";

/// Written to every client when the server shuts down.
pub const SERVER_ENDING: &str = "Server is ending.";

/// Written in response to `/exit`.
pub const BYE: &str = "Bye.";

/// Written when a line cannot be parsed into a command.
pub const ERR_INVALID_LINE: &str = "Error: invalid request line";

/// Written when a message is sent outside any room.
pub const ERR_NOT_IN_A_ROOM: &str = "Error: not in a room";

/// Confirmation for a successful `/enter`.
pub fn entered_room(name: &str) -> String {
    format!("OK: entered room '{name}'")
}

/// Sender name used for server-originated notices.
pub const SYSTEM_SENDER: &str = "System";

/// A message relayed from another room member (or from the server, with
/// [`SYSTEM_SENDER`]).
pub fn from_client(sender: &str, text: &str) -> String {
    format!("'{sender}' says: {text}")
}

/// Text of the warning notice broadcast ahead of a timed shutdown.
pub fn ending_soon(seconds: u64) -> String {
    format!("server is ending in {seconds} seconds")
}
