//! Basic type definitions for the chat relay
//!
//! Provides the `ClientId` newtype used to key rooms and the connection
//! container.

/// Unique client identifier (newtype pattern)
///
/// Wraps the sequential id handed out by the acceptor. Implements Hash and Eq
/// for use as HashMap keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(pub u64);

impl ClientId {
    /// The user-visible name for this client, as it appears in relayed lines.
    pub fn name(&self) -> String {
        format!("client-{}", self.0)
    }
}

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
