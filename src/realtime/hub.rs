use std::{
    collections::HashMap,
    sync::atomic::{AtomicU64, Ordering},
};

use tokio::sync::{mpsc, RwLock};
use tracing::{debug, warn};

use super::event::ServerEvent;

/// Per-connection outbound buffer.
const CONNECTION_BUFFER: usize = 64;

struct Connection {
    id: u64,
    sender: mpsc::Sender<ServerEvent>,
}

pub struct Registration {
    pub connection_id: u64,
    pub receiver: mpsc::Receiver<ServerEvent>,
}

/// Live socket connections grouped by user. A user may hold several (one per
/// tab).
#[derive(Default)]
pub struct Hub {
    next_id: AtomicU64,
    connections: RwLock<HashMap<i64, Vec<Connection>>>,
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, user_id: i64) -> Registration {
        let connection_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::channel(CONNECTION_BUFFER);

        self.connections
            .write()
            .await
            .entry(user_id)
            .or_default()
            .push(Connection {
                id: connection_id,
                sender,
            });
        debug!(user_id, connection_id, "socket registered");

        Registration {
            connection_id,
            receiver,
        }
    }

    pub async fn unregister(&self, user_id: i64, connection_id: u64) {
        let mut connections = self.connections.write().await;
        if let Some(list) = connections.get_mut(&user_id) {
            list.retain(|c| c.id != connection_id);
            if list.is_empty() {
                connections.remove(&user_id);
            }
        }
        debug!(user_id, connection_id, "socket unregistered");
    }

    pub async fn is_online(&self, user_id: i64) -> bool {
        self.connections
            .read()
            .await
            .get(&user_id)
            .is_some_and(|list| list.iter().any(|c| !c.sender.is_closed()))
    }

    /// Sends to every connection of `user_id` and returns how many accepted
    /// the event. Closed connections are dropped.
    pub async fn send_to(&self, user_id: i64, event: &ServerEvent) -> usize {
        self.dispatch(user_id, None, event).await
    }

    /// Sends to a single connection, e.g. a reply to the socket that asked.
    pub async fn send_to_connection(&self, user_id: i64, connection_id: u64, event: &ServerEvent) -> bool {
        self.dispatch(user_id, Some(connection_id), event).await > 0
    }

    async fn dispatch(&self, user_id: i64, only: Option<u64>, event: &ServerEvent) -> usize {
        let mut connections = self.connections.write().await;
        let Some(list) = connections.get_mut(&user_id) else {
            return 0;
        };

        let mut delivered = 0;
        list.retain(|connection| {
            if only.is_some_and(|id| id != connection.id) {
                return true;
            }
            match connection.sender.try_send(event.clone()) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(user_id, connection_id = connection.id, "socket buffer full, dropping event");
                    true
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            }
        });

        if list.is_empty() {
            connections.remove(&user_id);
        }

        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn delivers_to_every_tab_of_a_user() {
        let hub = Hub::new();
        let mut first = hub.register(1).await;
        let mut second = hub.register(1).await;
        let mut other = hub.register(2).await;

        assert_eq!(hub.send_to(1, &ServerEvent::Pong).await, 2);
        assert!(matches!(first.receiver.recv().await, Some(ServerEvent::Pong)));
        assert!(matches!(second.receiver.recv().await, Some(ServerEvent::Pong)));
        assert!(other.receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn targets_a_single_connection() {
        let hub = Hub::new();
        let mut first = hub.register(1).await;
        let mut second = hub.register(1).await;

        assert!(hub.send_to_connection(1, second.connection_id, &ServerEvent::Pong).await);
        assert!(second.receiver.recv().await.is_some());
        assert!(first.receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn prunes_closed_connections() {
        let hub = Hub::new();
        let registration = hub.register(5).await;
        assert!(hub.is_online(5).await);

        drop(registration);
        assert!(!hub.is_online(5).await);
        assert_eq!(hub.send_to(5, &ServerEvent::Pong).await, 0);
        assert_eq!(hub.send_to(99, &ServerEvent::Pong).await, 0);
    }

    #[tokio::test]
    async fn unregister_removes_only_that_connection() {
        let hub = Hub::new();
        let first = hub.register(3).await;
        let _second = hub.register(3).await;

        hub.unregister(3, first.connection_id).await;
        assert!(hub.is_online(3).await);
        assert_eq!(hub.send_to(3, &ServerEvent::Pong).await, 1);
    }
}
