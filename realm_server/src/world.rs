//! World state shared by all sessions.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex};

use crate::map::{Map, MapId};

/// Starting map for fresh logins.
pub const DEFAULT_MAP: MapId = MapId(100_000_000);

/// Map table plus the character-id authority. Character ids come from here
/// (in production, the account store), never from a map's allocator.
pub struct World {
    maps: Mutex<HashMap<MapId, Arc<Map>>>,
    next_character_id: AtomicI32,
}

impl World {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            maps: Mutex::new(HashMap::new()),
            next_character_id: AtomicI32::new(1),
        })
    }

    /// The map with `id`, created on first use.
    pub fn map(&self, id: MapId) -> Arc<Map> {
        self.maps
            .lock()
            .expect("maps lock")
            .entry(id)
            .or_insert_with(|| Map::new(id))
            .clone()
    }

    pub fn allocate_character_id(&self) -> i32 {
        self.next_character_id.fetch_add(1, Ordering::SeqCst)
    }
}
