//! Who is online, and where to push their events.
//!
//! Each user has at most one live connection. A newer connection replaces
//! the older one; the older connection's disconnect only removes the entry
//! if it is still the registered one.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

use tradepost_shared::protocol::ServerEvent;
use tradepost_shared::UserRef;

/// The sending half of one connection's outbound queue.
///
/// Two handles are equal iff they belong to the same connection.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: Uuid,
    tx: mpsc::Sender<ServerEvent>,
}

impl ConnectionHandle {
    /// Create a handle and the receiver its connection task drains.
    pub fn new(buffer: usize) -> (Self, mpsc::Receiver<ServerEvent>) {
        let (tx, rx) = mpsc::channel(buffer);
        let handle = Self {
            id: Uuid::new_v4(),
            tx,
        };
        (handle, rx)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Queue an event without waiting. Returns `false` if the queue is full
    /// or the connection is gone, in which case the event is dropped.
    pub fn deliver(&self, event: ServerEvent) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(_) => {
                debug!(connection = %self.id, "Dropping event for slow or closed connection");
                false
            }
        }
    }
}

impl PartialEq for ConnectionHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ConnectionHandle {}

#[derive(Clone, Default)]
pub struct PresenceRegistry {
    online: Arc<RwLock<HashMap<UserRef, ConnectionHandle>>>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map `user` to `handle`, returning the handle it displaced.
    pub async fn register(&self, user: UserRef, handle: ConnectionHandle) -> Option<ConnectionHandle> {
        let connection = handle.id;
        let previous = self.online.write().await.insert(user, handle);
        info!(user = %user, connection = %connection, replaced = previous.is_some(), "User online");
        previous
    }

    /// Remove whichever user is mapped to exactly this handle.
    ///
    /// Returns the user that went offline, or `None` if the handle had
    /// already been replaced.
    pub async fn unregister(&self, handle: &ConnectionHandle) -> Option<UserRef> {
        let mut online = self.online.write().await;
        let user = online
            .iter()
            .find(|(_, registered)| *registered == handle)
            .map(|(user, _)| *user)?;
        online.remove(&user);
        info!(user = %user, connection = %handle.id, "User offline");
        Some(user)
    }

    pub async fn lookup(&self, user: &UserRef) -> Option<ConnectionHandle> {
        self.online.read().await.get(user).cloned()
    }

    pub async fn online_count(&self) -> usize {
        self.online.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user() -> UserRef {
        UserRef::reseller(Uuid::new_v4())
    }

    #[tokio::test]
    async fn test_register_and_lookup() {
        let presence = PresenceRegistry::new();
        let alice = user();
        let (handle, _rx) = ConnectionHandle::new(4);

        assert!(presence.register(alice, handle.clone()).await.is_none());
        assert_eq!(presence.lookup(&alice).await, Some(handle));
        assert_eq!(presence.lookup(&user()).await, None);
        assert_eq!(presence.online_count().await, 1);
    }

    #[tokio::test]
    async fn test_stale_unregister_keeps_newer_connection() {
        let presence = PresenceRegistry::new();
        let alice = user();
        let (first, _rx1) = ConnectionHandle::new(4);
        let (second, _rx2) = ConnectionHandle::new(4);

        presence.register(alice, first.clone()).await;
        let displaced = presence.register(alice, second.clone()).await;
        assert_eq!(displaced, Some(first.clone()));
        assert_eq!(presence.lookup(&alice).await, Some(second.clone()));

        // The first socket closing must not evict the second.
        assert_eq!(presence.unregister(&first).await, None);
        assert_eq!(presence.lookup(&alice).await, Some(second.clone()));

        assert_eq!(presence.unregister(&second).await, Some(alice));
        assert_eq!(presence.lookup(&alice).await, None);
        assert_eq!(presence.online_count().await, 0);
    }

    #[tokio::test]
    async fn test_deliver_drops_when_full_or_closed() {
        let (handle, mut rx) = ConnectionHandle::new(1);

        assert!(handle.deliver(ServerEvent::error("one")));
        assert!(!handle.deliver(ServerEvent::error("two")));
        assert_eq!(rx.recv().await, Some(ServerEvent::error("one")));

        drop(rx);
        assert!(!handle.deliver(ServerEvent::error("three")));
    }
}
