//! Connected player characters.

use std::sync::{Arc, Mutex, Weak};

use realm_shared::math::Point;

use crate::control::ControlledMobs;
use crate::object::{MapAnchor, MapObject, ObjectKind};
use crate::session::ClientSession;

/// A character present in the world. The character id comes from the world
/// authority, never from a map registry, and survives map transfers.
pub struct Player {
    pub name: String,
    anchor: MapAnchor,
    position: Mutex<Point>,
    session: Weak<ClientSession>,
    controlled: ControlledMobs,
}

impl Player {
    pub fn new(
        character_id: i32,
        name: impl Into<String>,
        position: Point,
        session: Weak<ClientSession>,
    ) -> Arc<Self> {
        let name = name.into();
        Arc::new_cyclic(|weak: &Weak<Player>| Self {
            name,
            anchor: MapAnchor::new(character_id),
            position: Mutex::new(position),
            session,
            controlled: ControlledMobs::new(weak.clone()),
        })
    }

    /// Character id (exempt from registry allocation).
    pub fn id(&self) -> i32 {
        self.anchor.object_id()
    }

    pub fn session(&self) -> Option<Arc<ClientSession>> {
        self.session.upgrade()
    }

    /// The mobs whose simulation is delegated to this player's client.
    pub fn controlled(&self) -> &ControlledMobs {
        &self.controlled
    }

    pub fn set_position(&self, position: Point) {
        *self.position.lock().expect("position lock") = position;
    }
}

impl MapObject for Player {
    fn anchor(&self) -> &MapAnchor {
        &self.anchor
    }

    fn kind(&self) -> ObjectKind {
        ObjectKind::Player
    }

    fn position(&self) -> Point {
        *self.position.lock().expect("position lock")
    }
}
