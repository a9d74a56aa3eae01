use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{
    mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender},
    Mutex,
};
use uuid::Uuid;

pub mod events;
pub mod session;

pub use events::{ClientEvent, ServerEvent};

use crate::metrics;

/// Unique identifier for one real-time connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Push side of one connection. Two handles are equal only if they refer to
/// the same connection.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    id: SessionId,
    user_id: Uuid,
    sender: UnboundedSender<ServerEvent>,
}

impl SessionHandle {
    /// Creates a handle for `user_id` and the receiver its events arrive on.
    pub fn new(user_id: Uuid) -> (Self, UnboundedReceiver<ServerEvent>) {
        let (sender, rx) = unbounded_channel();
        (
            Self {
                id: SessionId::new(),
                user_id,
                sender,
            },
            rx,
        )
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn user_id(&self) -> Uuid {
        self.user_id
    }

    /// Queues an event for the connection. Returns false once the
    /// connection is gone.
    pub fn push(&self, event: ServerEvent) -> bool {
        self.sender.send(event).is_ok()
    }
}

impl PartialEq for SessionHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for SessionHandle {}

/// Presence map: identity -> current session.
///
/// One lock guards the map. Presence broadcasts are pushed after the
/// mutation, before the lock is released, so every session observes
/// online/offline transitions in the order they were committed.
///
/// A handle whose connection died without a disconnect stays mapped until
/// the same identity reconnects or that exact handle is unregistered.
#[derive(Default, Clone)]
pub struct ConnectionRegistry {
    inner: Arc<Mutex<HashMap<Uuid, SessionHandle>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `handle` the current session for its identity, replacing any
    /// earlier one without notifying it.
    ///
    /// Returns the other online identities. The new session is sent a
    /// `userOnline` event for each of them and every other session is told
    /// that this identity is online.
    pub async fn register(&self, handle: SessionHandle) -> Vec<Uuid> {
        let user_id = handle.user_id();
        let mut guard = self.inner.lock().await;

        if let Some(previous) = guard.insert(user_id, handle.clone()) {
            tracing::debug!(
                user_id = %user_id,
                previous_session = %previous.id(),
                session_id = %handle.id(),
                "session superseded"
            );
        }

        let mut others = Vec::with_capacity(guard.len().saturating_sub(1));
        for (other_id, other) in guard.iter() {
            if *other_id == user_id {
                continue;
            }
            others.push(*other_id);
            handle.push(ServerEvent::UserOnline(*other_id));
            other.push(ServerEvent::UserOnline(user_id));
        }

        metrics::ONLINE_SESSIONS.set(guard.len() as i64);
        tracing::info!(
            user_id = %user_id,
            session_id = %handle.id(),
            online = guard.len(),
            "session registered"
        );

        others
    }

    /// Removes the mapping only if `handle` is still the current session for
    /// its identity. Returns whether it was removed.
    pub async fn unregister(&self, handle: &SessionHandle) -> bool {
        let user_id = handle.user_id();
        let mut guard = self.inner.lock().await;

        match guard.get(&user_id) {
            Some(current) if current == handle => {}
            _ => {
                tracing::debug!(
                    user_id = %user_id,
                    session_id = %handle.id(),
                    "stale session ignored on unregister"
                );
                return false;
            }
        }

        guard.remove(&user_id);
        for other in guard.values() {
            other.push(ServerEvent::UserOffline(user_id));
        }

        metrics::ONLINE_SESSIONS.set(guard.len() as i64);
        tracing::info!(
            user_id = %user_id,
            session_id = %handle.id(),
            online = guard.len(),
            "session unregistered"
        );

        true
    }

    pub async fn lookup(&self, user_id: Uuid) -> Option<SessionHandle> {
        self.inner.lock().await.get(&user_id).cloned()
    }

    pub async fn online_count(&self) -> usize {
        self.inner.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(rx: &mut UnboundedReceiver<ServerEvent>) -> Vec<ServerEvent> {
        let mut out = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            out.push(ev);
        }
        out
    }

    #[tokio::test]
    async fn test_register_announces_both_ways() {
        let registry = ConnectionRegistry::new();
        let (alice, mut alice_rx) = SessionHandle::new(Uuid::new_v4());
        let (bob, mut bob_rx) = SessionHandle::new(Uuid::new_v4());

        assert!(registry.register(alice.clone()).await.is_empty());
        let others = registry.register(bob.clone()).await;

        assert_eq!(others, vec![alice.user_id()]);
        assert_eq!(drain(&mut alice_rx), vec![ServerEvent::UserOnline(bob.user_id())]);
        assert_eq!(drain(&mut bob_rx), vec![ServerEvent::UserOnline(alice.user_id())]);
    }

    #[tokio::test]
    async fn test_reconnect_supersedes_and_stale_unregister_is_ignored() {
        let registry = ConnectionRegistry::new();
        let user = Uuid::new_v4();
        let (first, _rx1) = SessionHandle::new(user);
        let (second, _rx2) = SessionHandle::new(user);
        let (watcher, mut watcher_rx) = SessionHandle::new(Uuid::new_v4());
        registry.register(watcher).await;

        registry.register(first.clone()).await;
        registry.register(second.clone()).await;
        assert_eq!(registry.online_count().await, 2);
        assert_eq!(registry.lookup(user).await, Some(second.clone()));

        drain(&mut watcher_rx);
        assert!(!registry.unregister(&first).await);
        assert_eq!(registry.lookup(user).await, Some(second.clone()));
        assert!(drain(&mut watcher_rx).is_empty());

        assert!(registry.unregister(&second).await);
        assert_eq!(registry.lookup(user).await, None);
        assert_eq!(drain(&mut watcher_rx), vec![ServerEvent::UserOffline(user)]);
    }

    #[tokio::test]
    async fn test_push_after_receiver_dropped() {
        let (handle, rx) = SessionHandle::new(Uuid::new_v4());
        assert!(handle.push(ServerEvent::UserOnline(Uuid::new_v4())));
        drop(rx);
        assert!(!handle.push(ServerEvent::UserOnline(Uuid::new_v4())));
    }
}
