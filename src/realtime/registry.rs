/// Connection registry
///
/// Binds live connections to users and rooms. All mutations, and the
/// presence broadcasts they trigger, run under one write lock so every
/// connection observes presence changes in the same order.
use super::{
    presence::{PresenceSet, PresenceTransition},
    ConnectionId, RoomId, ServerEvent,
};
use crate::metrics;
use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};
use tokio::sync::{mpsc, RwLock};

struct Connection {
    user_id: String,
    outbox: mpsc::Sender<ServerEvent>,
    rooms: HashSet<RoomId>,
}

#[derive(Default)]
struct RegistryState {
    next_id: u64,
    connections: HashMap<ConnectionId, Connection>,
    rooms: HashMap<RoomId, HashSet<ConnectionId>>,
    presence: PresenceSet,
}

impl RegistryState {
    fn add_to_room(&mut self, id: ConnectionId, room: RoomId) -> bool {
        let Some(conn) = self.connections.get_mut(&id) else {
            return false;
        };
        if !conn.rooms.insert(room.clone()) {
            return false;
        }
        self.rooms.entry(room).or_default().insert(id);
        true
    }

    fn remove_from_room(&mut self, id: ConnectionId, room: &RoomId) {
        if let Some(members) = self.rooms.get_mut(room) {
            members.remove(&id);
            if members.is_empty() {
                self.rooms.remove(room);
            }
        }
    }

    fn broadcast_all(&self, event: &ServerEvent) -> usize {
        self.connections
            .iter()
            .filter(|(id, conn)| deliver(**id, conn, event))
            .count()
    }

    fn update_gauges(&self) {
        metrics::REALTIME_CONNECTIONS_ACTIVE.set(self.connections.len() as i64);
        metrics::REALTIME_USERS_ONLINE.set(self.presence.len() as i64);
    }
}

/// Queue an event on a connection outbox without waiting
fn deliver(id: ConnectionId, conn: &Connection, event: &ServerEvent) -> bool {
    match conn.outbox.try_send(event.clone()) {
        Ok(()) => {
            metrics::record_event_published(event.name());
            true
        }
        Err(mpsc::error::TrySendError::Full(_)) => {
            tracing::warn!(connection = %id, user_id = %conn.user_id, event = event.name(), "outbox full, dropping event");
            metrics::record_event_dropped();
            false
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            tracing::debug!(connection = %id, event = event.name(), "outbox closed, dropping event");
            metrics::record_event_dropped();
            false
        }
    }
}

/// Registry of live connections shared by the realtime handlers
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    state: Arc<RwLock<RegistryState>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection and join it to the user's private room
    ///
    /// Announces the online set to every connection when the user was
    /// previously offline.
    pub async fn connect(&self, user_id: &str, outbox: mpsc::Sender<ServerEvent>) -> ConnectionId {
        let mut state = self.state.write().await;

        state.next_id += 1;
        let id = ConnectionId(state.next_id);
        state.connections.insert(
            id,
            Connection {
                user_id: user_id.to_string(),
                outbox,
                rooms: HashSet::new(),
            },
        );
        state.add_to_room(id, RoomId::user(user_id));

        if state.presence.connection_opened(user_id) == PresenceTransition::CameOnline {
            let event = ServerEvent::OnlineSetChanged(state.presence.snapshot());
            state.broadcast_all(&event);
            tracing::info!(user_id, "user online");
        }
        state.update_gauges();

        tracing::debug!(connection = %id, user_id, "connection registered");
        id
    }

    /// Remove a connection from every room
    ///
    /// Returns true when this was the user's last connection.
    pub async fn disconnect(&self, id: ConnectionId) -> bool {
        let mut state = self.state.write().await;

        let Some(conn) = state.connections.remove(&id) else {
            return false;
        };
        for room in &conn.rooms {
            state.remove_from_room(id, room);
        }

        let went_offline =
            state.presence.connection_closed(&conn.user_id) == PresenceTransition::WentOffline;
        if went_offline {
            let event = ServerEvent::UserOffline {
                user_id: conn.user_id.clone(),
            };
            state.broadcast_all(&event);
            tracing::info!(user_id = %conn.user_id, "user offline");
        }
        state.update_gauges();

        tracing::debug!(connection = %id, user_id = %conn.user_id, "connection removed");
        went_offline
    }

    /// Join a room; returns false when already joined or the connection is gone
    pub async fn join_room(&self, id: ConnectionId, room: RoomId) -> bool {
        self.state.write().await.add_to_room(id, room)
    }

    /// Leave a room; returns false when the connection was not in it
    pub async fn leave_room(&self, id: ConnectionId, room: &RoomId) -> bool {
        let mut state = self.state.write().await;

        let removed = state
            .connections
            .get_mut(&id)
            .map(|conn| conn.rooms.remove(room))
            .unwrap_or(false);
        if removed {
            state.remove_from_room(id, room);
        }
        removed
    }

    pub async fn is_in_room(&self, id: ConnectionId, room: &RoomId) -> bool {
        self.state
            .read()
            .await
            .connections
            .get(&id)
            .map(|conn| conn.rooms.contains(room))
            .unwrap_or(false)
    }

    /// Remove every connection of `user_id` from `room`
    ///
    /// Returns the number of connections removed.
    pub async fn evict_user(&self, user_id: &str, room: &RoomId) -> usize {
        let mut state = self.state.write().await;

        let evicted: Vec<ConnectionId> = state
            .connections
            .iter_mut()
            .filter(|(_, conn)| conn.user_id == user_id)
            .filter_map(|(id, conn)| conn.rooms.remove(room).then_some(*id))
            .collect();
        for id in &evicted {
            state.remove_from_room(*id, room);
        }

        if !evicted.is_empty() {
            tracing::debug!(user_id, room = %room, count = evicted.len(), "connections evicted from room");
        }
        evicted.len()
    }

    pub async fn is_online(&self, user_id: &str) -> bool {
        self.state.read().await.presence.is_online(user_id)
    }

    /// Sorted ids of users with at least one connection
    pub async fn online_snapshot(&self) -> Vec<String> {
        self.state.read().await.presence.snapshot()
    }

    pub async fn connection_count(&self) -> usize {
        self.state.read().await.connections.len()
    }

    /// Queue `event` on every connection in `room`, optionally skipping one
    ///
    /// Returns the number of connections the event was queued for.
    pub async fn publish(
        &self,
        room: &RoomId,
        event: &ServerEvent,
        exclude: Option<ConnectionId>,
    ) -> usize {
        let state = self.state.read().await;

        let Some(members) = state.rooms.get(room) else {
            return 0;
        };

        members
            .iter()
            .filter(|id| Some(**id) != exclude)
            .filter_map(|id| state.connections.get(id).map(|conn| (*id, conn)))
            .filter(|(id, conn)| deliver(*id, conn, event))
            .count()
    }
}
