//! Per-event relay logic.
//!
//! Events from one connection are handled sequentially by its socket loop;
//! the dispatcher only has to be safe across connections. Failures while
//! handling one connection's event are reported back to that connection and
//! never disturb the others.

use std::sync::Arc;
use std::time::Duration;

use materna_backend::{Backend, BackendError};
use tracing::{debug, warn};

use crate::events::{ClientEvent, ServerEvent};
use crate::registry::{ConnectionId, ConnectionRegistry};

pub struct RelayDispatcher<B> {
    backend: B,
    registry: Arc<ConnectionRegistry>,
    persist_timeout: Duration,
}

impl<B: Backend> RelayDispatcher<B> {
    pub fn new(backend: B, registry: Arc<ConnectionRegistry>, persist_timeout: Duration) -> Self {
        Self {
            backend,
            registry,
            persist_timeout,
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub async fn handle_event(&self, id: ConnectionId, event: ClientEvent) {
        match event {
            ClientEvent::Ping => {
                self.registry.send_to(id, ServerEvent::Pong);
            }
            ClientEvent::JoinRoom { room_id } => {
                self.registry.join_room(id, &room_id);
            }
            ClientEvent::LeaveRoom { room_id } => {
                self.registry.leave_room(id, &room_id);
            }
            ClientEvent::SendMessage {
                room_id,
                message,
                sender_id,
                token,
            } => {
                self.send_message(id, &room_id, &message, &sender_id, &token)
                    .await;
            }
            // Presence traffic: best effort, no persistence, sender excluded.
            ClientEvent::Typing { room_id, user_id } => {
                self.registry.broadcast(
                    &room_id,
                    Some(id),
                    &ServerEvent::UserTyping {
                        room_id: room_id.clone(),
                        user_id,
                    },
                );
            }
            ClientEvent::StopTyping { room_id, user_id } => {
                self.registry.broadcast(
                    &room_id,
                    Some(id),
                    &ServerEvent::UserStopTyping {
                        room_id: room_id.clone(),
                        user_id,
                    },
                );
            }
        }
    }

    /// Tear down a closed connection. Room memberships vanish with it; no
    /// further events are delivered to or attributed to this connection.
    pub fn disconnect(&self, id: ConnectionId) {
        match self.registry.user_of(id) {
            Some(user) => debug!(connection = %id, user = %user, "connection closed"),
            None => debug!(connection = %id, "connection closed before authenticating"),
        }
        self.registry.remove(id);
    }

    /// Verify, persist, then broadcast. The token is checked on every message
    /// and must resolve to the claimed sender; messages are only fanned out
    /// after the write has durably completed.
    async fn send_message(
        &self,
        id: ConnectionId,
        room_id: &str,
        content: &str,
        sender_id: &str,
        token: &str,
    ) {
        let identity = match self.backend.verify_token(token).await {
            Ok(identity) => identity,
            Err(err) => {
                debug!(connection = %id, %err, "message rejected: token verification failed");
                self.reject(id, &err);
                return;
            }
        };

        if identity.id != sender_id {
            warn!(
                connection = %id,
                claimed = sender_id,
                actual = %identity.id,
                "message rejected: sender does not match token identity"
            );
            self.registry.send_to(
                id,
                ServerEvent::Error {
                    message: "sender does not match authenticated user".to_string(),
                },
            );
            return;
        }

        self.registry.set_user(id, &identity.id);

        let persisted = tokio::time::timeout(
            self.persist_timeout,
            self.backend.persist_message(room_id, sender_id, content),
        )
        .await;

        let message = match persisted {
            Ok(Ok(message)) => message,
            Ok(Err(err)) => {
                warn!(connection = %id, room = room_id, %err, "message persistence failed");
                self.reject(id, &err);
                return;
            }
            Err(_) => {
                warn!(connection = %id, room = room_id, "message persistence timed out");
                self.registry.send_to(
                    id,
                    ServerEvent::Error {
                        message: "message could not be saved in time".to_string(),
                    },
                );
                return;
            }
        };

        // No await between observing the completed write and the fan-out, and
        // the fan-out itself is atomic with the room snapshot: every member,
        // the sender included, sees messages in the order their writes were
        // observed to complete. The echoed copy carries the backend-assigned
        // id and timestamp.
        self.registry
            .broadcast(room_id, None, &ServerEvent::ReceiveMessage { message });
    }

    fn reject(&self, id: ConnectionId, err: &BackendError) {
        let message = match err {
            BackendError::Unauthorized => "invalid or expired token".to_string(),
            BackendError::Network(_) => "backend unreachable".to_string(),
            other => other.to_string(),
        };
        self.registry.send_to(id, ServerEvent::Error { message });
    }
}
