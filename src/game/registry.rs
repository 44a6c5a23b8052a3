//! Registry of live rooms.

use std::sync::Arc;

use dashmap::DashMap;

use crate::config::Config;
use crate::results::MatchResultReporter;

use super::room::{Room, RoomHandle};

/// Maps room id to its running task. Rooms are created lazily on first join
/// and remove themselves on teardown.
pub struct RoomRegistry {
    rooms: DashMap<String, RoomHandle>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self {
            rooms: DashMap::new(),
        }
    }

    pub fn get(&self, room_id: &str) -> Option<RoomHandle> {
        self.rooms.get(room_id).map(|r| r.value().clone())
    }

    /// Look up a room, spawning its task on first use.
    pub fn get_or_create(
        registry: &Arc<Self>,
        room_id: &str,
        config: &Arc<Config>,
        reporter: Option<Arc<MatchResultReporter>>,
    ) -> RoomHandle {
        registry
            .rooms
            .entry(room_id.to_string())
            .or_insert_with(|| {
                let (room, handle, cmd_rx) = Room::new(
                    room_id.to_string(),
                    config.clone(),
                    registry.clone(),
                    reporter,
                );
                tokio::spawn(room.run(cmd_rx));
                handle
            })
            .value()
            .clone()
    }

    pub fn remove(&self, room_id: &str) -> Option<RoomHandle> {
        self.rooms.remove(room_id).map(|(_, h)| h)
    }

    pub fn active_rooms(&self) -> usize {
        self.rooms.len()
    }

    pub fn total_sessions(&self) -> usize {
        self.rooms.iter().map(|r| r.value().session_count()).sum()
    }
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new()
    }
}
