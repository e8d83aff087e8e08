//! World-object identity and map membership.
//!
//! Objects addressable within a map carry an object id scoped to that map.
//! Non-exempt kinds get their ids from the map's allocator on insert; the
//! exempt kinds (persistent characters, fixed portals) keep ids assigned by
//! an outside authority that the registry must never overwrite.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex, Weak};

use realm_shared::math::Point;

use crate::map::{Map, MapId};

/// Object id meaning "not addressable in any map".
pub const UNASSIGNED_OBJECT_ID: i32 = -1;

/// Identifier-allocation category of a world object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Player,
    Npc,
    Mob,
    Portal,
}

impl ObjectKind {
    /// Exempt kinds keep externally-assigned, map-independent ids.
    pub fn exempt(self) -> bool {
        matches!(self, ObjectKind::Player | ObjectKind::Portal)
    }

    pub(crate) fn index(self) -> usize {
        match self {
            ObjectKind::Player => 0,
            ObjectKind::Npc => 1,
            ObjectKind::Mob => 2,
            ObjectKind::Portal => 3,
        }
    }

    pub(crate) const COUNT: usize = 4;
}

/// Map-membership state every world object embeds: its object id and a weak
/// back-reference to the owning map. The back-reference is set iff the
/// object is currently registered on that map; the map's lifetime always
/// dominates.
pub struct MapAnchor {
    object_id: AtomicI32,
    map: Mutex<Weak<Map>>,
}

impl MapAnchor {
    pub fn new(object_id: i32) -> Self {
        Self {
            object_id: AtomicI32::new(object_id),
            map: Mutex::new(Weak::new()),
        }
    }

    pub fn unassigned() -> Self {
        Self::new(UNASSIGNED_OBJECT_ID)
    }

    pub fn object_id(&self) -> i32 {
        self.object_id.load(Ordering::SeqCst)
    }

    pub fn set_object_id(&self, id: i32) {
        self.object_id.store(id, Ordering::SeqCst);
    }

    pub fn map(&self) -> Option<Arc<Map>> {
        self.map.lock().expect("map anchor lock").upgrade()
    }

    pub fn set_map(&self, map: Weak<Map>) {
        *self.map.lock().expect("map anchor lock") = map;
    }
}

/// Behavior the per-map registries need from their members.
pub trait MapObject: Send + Sync {
    fn anchor(&self) -> &MapAnchor;
    fn kind(&self) -> ObjectKind;
    fn position(&self) -> Point;

    fn object_id(&self) -> i32 {
        self.anchor().object_id()
    }

    fn map(&self) -> Option<Arc<Map>> {
        self.anchor().map()
    }
}

/// Scripted vendor or quest giver. Static once spawned.
pub struct Npc {
    pub template_id: u32,
    anchor: MapAnchor,
    position: Point,
}

impl Npc {
    pub fn new(template_id: u32, position: Point) -> Arc<Self> {
        Arc::new(Self {
            template_id,
            anchor: MapAnchor::unassigned(),
            position,
        })
    }
}

impl MapObject for Npc {
    fn anchor(&self) -> &MapAnchor {
        &self.anchor
    }

    fn kind(&self) -> ObjectKind {
        ObjectKind::Npc
    }

    fn position(&self) -> Point {
        self.position
    }
}

/// Fixed map exit. Portal ids come from map data, never from the registry.
pub struct Portal {
    pub destination_map: MapId,
    anchor: MapAnchor,
    position: Point,
}

impl Portal {
    pub fn new(portal_id: i32, destination_map: MapId, position: Point) -> Arc<Self> {
        Arc::new(Self {
            destination_map,
            anchor: MapAnchor::new(portal_id),
            position,
        })
    }
}

impl MapObject for Portal {
    fn anchor(&self) -> &MapAnchor {
        &self.anchor
    }

    fn kind(&self) -> ObjectKind {
        ObjectKind::Portal
    }

    fn position(&self) -> Point {
        self.position
    }
}
