//! Process-wide room registry.
//!
//! Owns every [`Room`] plus the connection → room index. Lock order is
//! `rooms` → room → `memberships`. Membership notifications are queued while
//! the room lock is held, so every player sees seat changes in the order they
//! happened; queueing never blocks. Cleanup of failed recipients runs only
//! after the lock is released.

use super::room::Room;
use super::{ConnId, ConnectionHandle};
use duo_core::{room_id_of, DuoError, ServerMessage};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// What a single inbound message did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Malformed or not allowed (the sender got an `error` reply), or the
    /// sender was removed from its room while the message was in flight.
    Rejected,
    /// A new room was opened with the sender as its first player.
    Created { player: u8 },
    /// The sender took a free seat in an existing room.
    Joined { player: u8 },
    /// The room already had two players.
    Full,
    /// The message was forwarded to `recipients` other players.
    Relayed { recipients: usize },
}

/// Registry of active rooms.
pub struct SessionRegistry {
    rooms: RwLock<HashMap<String, Arc<Mutex<Room>>>>,
    memberships: RwLock<HashMap<ConnId, String>>,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            memberships: RwLock::new(HashMap::new()),
        }
    }

    /// Act on one decoded inbound message from `conn`.
    ///
    /// Unknown room: create it. Known room the sender is not in: join it.
    /// Room the sender is already in: relay the message to the other player.
    pub async fn dispatch(&self, conn: &ConnectionHandle, msg: Value) -> Dispatch {
        let room_id = match room_id_of(&msg) {
            Ok(id) => id,
            Err(e) => {
                warn!(conn_id = %conn.id(), error = %e, "rejecting message");
                self.reply(conn, ServerMessage::from_error(&e)).await;
                return Dispatch::Rejected;
            }
        };

        let current = self.room_of(conn.id()).await;
        match current {
            Some(joined) if joined == room_id => self.relay(conn, &room_id, msg).await,
            Some(joined) => {
                warn!(conn_id = %conn.id(), joined = %joined, requested = %room_id, "already in another room");
                self.reply(conn, ServerMessage::from_error(&DuoError::AlreadyInRoom(joined)))
                    .await;
                Dispatch::Rejected
            }
            None => self.join(conn, &room_id).await,
        }
    }

    /// Remove a connection from its room and notify whoever remains.
    ///
    /// Idempotent: a connection that is in no room is ignored.
    pub async fn cleanup(&self, conn: ConnId) {
        self.cleanup_all(vec![conn]).await;
    }

    /// Number of live rooms.
    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    /// Occupied player numbers of a room, ascending.
    pub async fn players(&self, room_id: &str) -> Option<Vec<u8>> {
        let room = self.room(room_id).await?;
        let guard = room.lock().await;
        Some(guard.players())
    }

    /// The room a connection is seated in.
    pub async fn room_of(&self, conn: ConnId) -> Option<String> {
        self.memberships.read().await.get(&conn).cloned()
    }

    async fn room(&self, room_id: &str) -> Option<Arc<Mutex<Room>>> {
        self.rooms.read().await.get(room_id).cloned()
    }

    async fn join(&self, conn: &ConnectionHandle, room_id: &str) -> Dispatch {
        loop {
            let room = {
                let mut rooms = self.rooms.write().await;
                match rooms.get(room_id) {
                    Some(room) => room.clone(),
                    None => {
                        let room = Room::open(room_id, conn.clone());
                        rooms.insert(room_id.to_string(), Arc::new(Mutex::new(room)));
                        self.memberships
                            .write()
                            .await
                            .insert(conn.id(), room_id.to_string());
                        info!(room_id = %room_id, conn_id = %conn.id(), player = 1, "room created");
                        // Sent before any joiner can reach the room.
                        let created = conn.send(ServerMessage::room_created(room_id, 1));
                        drop(rooms);

                        if let Err(e) = created {
                            debug!(conn_id = %conn.id(), error = %e, "reply not delivered");
                            self.cleanup(conn.id()).await;
                        }
                        return Dispatch::Created { player: 1 };
                    }
                }
            };

            let mut guard = room.lock().await;
            if guard.is_closed() {
                // Emptied by a concurrent cleanup that has not unlinked it yet.
                drop(guard);
                self.unlink(room_id, &room).await;
                continue;
            }

            let seated = guard.seat(conn.clone());
            return match seated {
                Ok(player) => {
                    let players = guard.players();
                    let others = guard.others(conn.id());
                    self.memberships
                        .write()
                        .await
                        .insert(conn.id(), room_id.to_string());
                    info!(room_id = %room_id, conn_id = %conn.id(), player, "player joined room");

                    let joined = conn.send(ServerMessage::room_joined(room_id, player, players.clone()));
                    let mut failed =
                        broadcast(&others, &ServerMessage::player_joined(room_id, player, players));
                    drop(guard);

                    if let Err(e) = joined {
                        warn!(conn_id = %conn.id(), error = %e, "join reply not delivered");
                        failed.push(conn.id());
                    }
                    self.cleanup_all(failed).await;
                    Dispatch::Joined { player }
                }
                Err(DuoError::RoomFull { current, .. }) => {
                    drop(guard);
                    info!(room_id = %room_id, conn_id = %conn.id(), "room is full");
                    self.reply(conn, ServerMessage::room_full(room_id, current)).await;
                    Dispatch::Full
                }
                Err(e) => {
                    drop(guard);
                    self.reply(conn, ServerMessage::from_error(&e)).await;
                    Dispatch::Rejected
                }
            };
        }
    }

    async fn relay(&self, conn: &ConnectionHandle, room_id: &str, msg: Value) -> Dispatch {
        let Some(room) = self.room(room_id).await else {
            return Dispatch::Rejected;
        };

        let mut recipients = 0;
        let mut failed = Vec::new();
        {
            let guard = room.lock().await;
            let Some(player) = guard.player_of(conn.id()) else {
                // Removed by a concurrent cleanup after the membership lookup.
                return Dispatch::Rejected;
            };
            for (peer_player, peer) in guard.others(conn.id()) {
                match peer.send(ServerMessage::data_transfer(player, msg.clone())) {
                    Ok(()) => {
                        recipients += 1;
                        debug!(room_id = %room_id, from = player, to = peer_player, "relayed data");
                    }
                    Err(e) => {
                        warn!(room_id = %room_id, player = peer_player, error = %e, "relay failed, dropping player");
                        failed.push(peer.id());
                    }
                }
            }
        }
        if recipients == 0 {
            debug!(room_id = %room_id, "no other players in room, data not forwarded");
        }
        self.cleanup_all(failed).await;

        let acked = {
            let guard = room.lock().await;
            conn.send(ServerMessage::data_received(room_id, recipients, guard.len()))
        };
        if let Err(e) = acked {
            debug!(conn_id = %conn.id(), error = %e, "reply not delivered");
            self.cleanup(conn.id()).await;
        }
        Dispatch::Relayed { recipients }
    }

    /// Drain a worklist of departed connections. Notifying the remaining
    /// player can fail too, which queues that player for removal as well.
    async fn cleanup_all(&self, mut pending: Vec<ConnId>) {
        while let Some(conn) = pending.pop() {
            let Some(room_id) = self.memberships.write().await.remove(&conn) else {
                debug!(conn_id = %conn, "connection not in any room");
                continue;
            };
            let Some(room) = self.room(&room_id).await else {
                debug!(room_id = %room_id, "room no longer exists");
                continue;
            };

            let emptied = {
                let mut guard = room.lock().await;
                let Some(player) = guard.unseat(conn) else {
                    continue;
                };
                info!(room_id = %room_id, conn_id = %conn, player, "player left room");
                if !guard.is_empty() {
                    let msg = ServerMessage::player_left(&room_id, player, guard.players());
                    pending.extend(broadcast(&guard.others(conn), &msg));
                }
                guard.is_empty()
            };

            if emptied {
                self.unlink(&room_id, &room).await;
                info!(room_id = %room_id, "room removed");
            }
        }
    }

    /// Drop `room` from the table if it is still the entry for `room_id`.
    async fn unlink(&self, room_id: &str, room: &Arc<Mutex<Room>>) {
        let mut rooms = self.rooms.write().await;
        if rooms.get(room_id).is_some_and(|current| Arc::ptr_eq(current, room)) {
            rooms.remove(room_id);
        }
    }

    /// Reply to the acting connection; an undeliverable reply means it is gone.
    async fn reply(&self, conn: &ConnectionHandle, msg: ServerMessage) {
        if let Err(e) = conn.send(msg) {
            debug!(conn_id = %conn.id(), error = %e, "reply not delivered");
            self.cleanup(conn.id()).await;
        }
    }
}

/// Send `msg` to every target; returns the ids whose delivery failed.
fn broadcast(targets: &[(u8, ConnectionHandle)], msg: &ServerMessage) -> Vec<ConnId> {
    targets
        .iter()
        .filter_map(|(player, handle)| match handle.send(msg.clone()) {
            Ok(()) => None,
            Err(e) => {
                warn!(player, error = %e, "notification failed, dropping player");
                Some(handle.id())
            }
        })
        .collect()
}
