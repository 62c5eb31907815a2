//! Rooms and the room registry
//!
//! A room is a named set of member connections; broadcasting fans a message
//! into every member's mailbox except the sender's. Rooms hold non-owning
//! [`ClientHandle`]s - membership is a relation, not ownership - and are
//! created lazily by name, never destroyed.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::debug;

use crate::client::ClientHandle;
use crate::types::ClientId;

/// A named chat room.
pub struct Room {
    name: String,
    members: Mutex<HashMap<ClientId, ClientHandle>>,
}

impl Room {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            members: Mutex::new(HashMap::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Register a member. Re-adding an existing member is a no-op.
    pub async fn add(&self, member: ClientHandle) {
        self.members.lock().await.insert(member.id(), member);
    }

    /// Deregister a member. Idempotent.
    pub async fn remove(&self, id: ClientId) {
        self.members.lock().await.remove(&id);
    }

    /// Broadcast a message to every member except the sender.
    ///
    /// The member set is snapshotted under the lock and the enqueues happen
    /// outside it; mailboxes are unbounded, so a slow member never stalls
    /// the broadcasting connection.
    pub async fn post(&self, sender: &ClientHandle, text: &str) {
        let recipients: Vec<ClientHandle> = {
            let members = self.members.lock().await;
            members
                .values()
                .filter(|member| member.id() != sender.id())
                .cloned()
                .collect()
        };
        for recipient in recipients {
            recipient.send(sender.name(), text).await;
        }
    }

    #[cfg(test)]
    async fn member_count(&self) -> usize {
        self.members.lock().await.len()
    }
}

/// Registry of rooms organized by name.
pub struct RoomRegistry {
    rooms: Mutex<HashMap<String, Arc<Room>>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self {
            rooms: Mutex::new(HashMap::new()),
        }
    }

    /// Atomic get-or-insert, safe under concurrent first touch of a name.
    pub async fn get_or_create(&self, name: &str) -> Arc<Room> {
        let mut rooms = self.rooms.lock().await;
        if let Some(room) = rooms.get(name) {
            return Arc::clone(room);
        }
        debug!(room = %name, "creating room");
        let room = Arc::new(Room::new(name));
        rooms.insert(name.to_string(), Arc::clone(&room));
        room
    }
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new()
    }
}
