//! A single room: up to [`MAX_PLAYERS`] seats numbered from 1.

use super::{ConnId, ConnectionHandle};
use duo_core::{DuoError, DuoResult, MAX_PLAYERS};
use std::collections::{BTreeSet, HashMap};

#[derive(Debug)]
struct Seat {
    player: u8,
    handle: ConnectionHandle,
}

/// Seat assignment for one room.
///
/// `slots` and `occupied` always have the same size; a new seat always takes
/// the smallest free number.
#[derive(Debug)]
pub struct Room {
    id: String,
    slots: HashMap<ConnId, Seat>,
    occupied: BTreeSet<u8>,
    /// Set once the last player leaves; a closed room is never reused.
    closed: bool,
}

impl Room {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            slots: HashMap::new(),
            occupied: BTreeSet::new(),
            closed: false,
        }
    }

    /// A new room with `creator` seated as player 1.
    pub fn open(id: impl Into<String>, creator: ConnectionHandle) -> Self {
        let mut room = Self::new(id);
        room.occupied.insert(1);
        room.slots.insert(
            creator.id(),
            Seat {
                player: 1,
                handle: creator,
            },
        );
        room
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.slots.len() >= MAX_PLAYERS
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn player_of(&self, conn: ConnId) -> Option<u8> {
        self.slots.get(&conn).map(|seat| seat.player)
    }

    /// Occupied player numbers in ascending order.
    pub fn players(&self) -> Vec<u8> {
        self.occupied.iter().copied().collect()
    }

    /// Smallest player number not currently taken.
    pub fn next_free_player(&self) -> Option<u8> {
        (1..=MAX_PLAYERS as u8).find(|n| !self.occupied.contains(n))
    }

    /// Seat a connection and return its player number.
    pub fn seat(&mut self, handle: ConnectionHandle) -> DuoResult<u8> {
        if let Some(player) = self.player_of(handle.id()) {
            return Ok(player);
        }
        let player = match self.next_free_player() {
            Some(player) if !self.is_full() => player,
            _ => {
                return Err(DuoError::RoomFull {
                    room_id: self.id.clone(),
                    current: self.len(),
                    max: MAX_PLAYERS,
                })
            }
        };
        self.occupied.insert(player);
        self.slots.insert(handle.id(), Seat { player, handle });
        Ok(player)
    }

    /// Release a connection's seat. Closes the room when it empties.
    pub fn unseat(&mut self, conn: ConnId) -> Option<u8> {
        let seat = self.slots.remove(&conn)?;
        self.occupied.remove(&seat.player);
        if self.slots.is_empty() {
            self.closed = true;
        }
        Some(seat.player)
    }

    /// Handles of every seated connection except `conn`, with their player numbers.
    pub fn others(&self, conn: ConnId) -> Vec<(u8, ConnectionHandle)> {
        let mut others: Vec<_> = self
            .slots
            .iter()
            .filter(|(id, _)| **id != conn)
            .map(|(_, seat)| (seat.player, seat.handle.clone()))
            .collect();
        others.sort_by_key(|(player, _)| *player);
        others
    }
}
