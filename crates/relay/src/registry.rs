//! Live connection and room membership tracking.
//!
//! All relay state lives behind one synchronous lock. Every operation is
//! non-blocking (queueing uses `try_send`), so the lock is never held across
//! an await point, and snapshotting a room plus enqueueing to its members is
//! a single atomic step: every member observes broadcasts in the same order.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::events::ServerEvent;

/// Opaque id assigned when a socket connects. Connections, not users, are the
/// unit of membership: one user on two devices holds two independent ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

struct ConnectionEntry {
    sender: mpsc::Sender<ServerEvent>,
    user_id: Option<String>,
    rooms: HashSet<String>,
}

#[derive(Default)]
struct RegistryInner {
    connections: HashMap<ConnectionId, ConnectionEntry>,
    rooms: HashMap<String, HashSet<ConnectionId>>,
}

/// Tracks which connections exist, which rooms each has joined, and the
/// outbound queue for each.
#[derive(Default)]
pub struct ConnectionRegistry {
    inner: Mutex<RegistryInner>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RegistryInner> {
        // No critical section can panic, so a poisoned lock still holds
        // consistent state.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a fresh connection with its outbound event queue.
    pub fn register(&self, id: ConnectionId, sender: mpsc::Sender<ServerEvent>) {
        self.lock().connections.insert(
            id,
            ConnectionEntry {
                sender,
                user_id: None,
                rooms: HashSet::new(),
            },
        );
        debug!(connection = %id, "connection registered");
    }

    /// Record the identity a connection has proven. Later proofs for the same
    /// connection overwrite earlier ones.
    pub fn set_user(&self, id: ConnectionId, user_id: &str) {
        if let Some(entry) = self.lock().connections.get_mut(&id) {
            entry.user_id = Some(user_id.to_string());
        }
    }

    pub fn user_of(&self, id: ConnectionId) -> Option<String> {
        self.lock()
            .connections
            .get(&id)
            .and_then(|entry| entry.user_id.clone())
    }

    /// Add the connection to a room. Re-joining a room it is already in is a
    /// no-op; the connection never receives duplicate copies of a broadcast.
    pub fn join_room(&self, id: ConnectionId, room_id: &str) {
        let mut guard = self.lock();
        let inner = &mut *guard;
        if let Some(entry) = inner.connections.get_mut(&id) {
            if entry.rooms.insert(room_id.to_string()) {
                inner
                    .rooms
                    .entry(room_id.to_string())
                    .or_default()
                    .insert(id);
                debug!(connection = %id, room = room_id, "joined room");
            } else {
                trace!(connection = %id, room = room_id, "already in room");
            }
        }
    }

    /// Remove the connection from a room. Leaving a room it never joined is a
    /// no-op.
    pub fn leave_room(&self, id: ConnectionId, room_id: &str) {
        let mut guard = self.lock();
        let inner = &mut *guard;
        let was_member = match inner.connections.get_mut(&id) {
            Some(entry) => entry.rooms.remove(room_id),
            None => false,
        };
        if was_member {
            remove_from_room(inner, id, room_id);
            debug!(connection = %id, room = room_id, "left room");
        }
    }

    /// Drop the connection and every room membership it held.
    pub fn remove(&self, id: ConnectionId) {
        let mut guard = self.lock();
        let inner = &mut *guard;
        if let Some(entry) = inner.connections.remove(&id) {
            for room_id in entry.rooms {
                remove_from_room(inner, id, &room_id);
            }
            debug!(connection = %id, "connection removed");
        }
    }

    pub fn is_member(&self, id: ConnectionId, room_id: &str) -> bool {
        self.lock()
            .rooms
            .get(room_id)
            .is_some_and(|members| members.contains(&id))
    }

    pub fn room_size(&self, room_id: &str) -> usize {
        self.lock().rooms.get(room_id).map_or(0, HashSet::len)
    }

    /// Enqueue an event for every connection in a room, optionally excluding
    /// one. The room snapshot and the enqueueing happen under the same lock
    /// hold, so concurrent broadcasts to a room reach all members in one
    /// global order. A full or closed queue drops the event; a slow consumer
    /// must not stall the relay.
    pub fn broadcast(&self, room_id: &str, exclude: Option<ConnectionId>, event: &ServerEvent) {
        let inner = self.lock();
        let Some(members) = inner.rooms.get(room_id) else {
            return;
        };
        for id in members {
            if Some(*id) == exclude {
                continue;
            }
            let Some(entry) = inner.connections.get(id) else {
                continue;
            };
            if entry.sender.try_send(event.clone()).is_err() {
                trace!(connection = %id, room = room_id, "dropping event for saturated connection");
            }
        }
    }

    /// Queue an event for one connection, with the same drop-don't-block
    /// policy as [`broadcast`](Self::broadcast).
    pub fn send_to(&self, id: ConnectionId, event: ServerEvent) {
        let inner = self.lock();
        if let Some(entry) = inner.connections.get(&id) {
            if let Err(err) = entry.sender.try_send(event) {
                trace!(connection = %id, %err, "dropping event for connection");
            }
        }
    }
}

fn remove_from_room(inner: &mut RegistryInner, id: ConnectionId, room_id: &str) {
    if let Some(members) = inner.rooms.get_mut(room_id) {
        members.remove(&id);
        if members.is_empty() {
            inner.rooms.remove(room_id);
        }
    }
}
