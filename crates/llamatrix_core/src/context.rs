//! Per-room conversation history.
//!
//! The store is shared by every room's relay loop, but each room only ever
//! touches its own entry. The outer map lock is held just long enough to look
//! up or insert an entry; reads and writes of a room's turns go through that
//! room's own mutex, so a busy room never blocks the others.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use crate::types::{ConversationTurn, RoomId};

/// How much history is sent to the backend with each request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrimPolicy {
    /// Send the whole history
    Unbounded,
    /// Send only the most recent `n` turns
    KeepLast(usize),
}

impl Default for TrimPolicy {
    fn default() -> Self {
        Self::Unbounded
    }
}

impl TrimPolicy {
    /// Build a policy from an optional turn limit.
    pub fn from_limit(limit: Option<usize>) -> Self {
        limit.map_or(Self::Unbounded, Self::KeepLast)
    }

    fn apply<'a>(&self, turns: &'a [ConversationTurn]) -> &'a [ConversationTurn] {
        match *self {
            Self::Unbounded => turns,
            Self::KeepLast(n) => &turns[turns.len().saturating_sub(n)..],
        }
    }
}

type RoomHistory = Arc<Mutex<Vec<ConversationTurn>>>;

/// In-memory conversation history keyed by room.
#[derive(Debug, Default)]
pub struct ContextStore {
    rooms: RwLock<HashMap<RoomId, RoomHistory>>,
    trim: TrimPolicy,
}

impl ContextStore {
    pub fn new(trim: TrimPolicy) -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            trim,
        }
    }

    pub fn trim_policy(&self) -> TrimPolicy {
        self.trim
    }

    fn entry(&self, room: &RoomId) -> RoomHistory {
        if let Some(history) = self.rooms.read().get(room) {
            return Arc::clone(history);
        }
        Arc::clone(self.rooms.write().entry(room.clone()).or_default())
    }

    /// Append a turn to the room's history, creating the entry if needed.
    pub fn append(&self, room: &RoomId, turn: ConversationTurn) {
        self.entry(room).lock().push(turn);
    }

    /// Copy of the room's history with the trim policy applied.
    pub fn snapshot(&self, room: &RoomId) -> Vec<ConversationTurn> {
        let Some(history) = self.rooms.read().get(room).cloned() else {
            return Vec::new();
        };
        let turns = history.lock();
        self.trim.apply(&turns).to_vec()
    }

    /// Number of stored turns (untrimmed).
    pub fn len(&self, room: &RoomId) -> usize {
        self.rooms
            .read()
            .get(room)
            .map(|history| history.lock().len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self, room: &RoomId) -> bool {
        self.len(room) == 0
    }

    /// Forget the room's turns but keep its entry.
    pub fn clear(&self, room: &RoomId) {
        if let Some(history) = self.rooms.read().get(room) {
            history.lock().clear();
        }
    }

    /// Drop the room's entry entirely.
    pub fn remove(&self, room: &RoomId) {
        self.rooms.write().remove(room);
    }

    /// Rooms that currently hold an entry.
    pub fn rooms(&self) -> Vec<RoomId> {
        self.rooms.read().keys().cloned().collect()
    }
}
