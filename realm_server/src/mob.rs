//! Simulated monsters and their delegated-control plumbing.
//!
//! Per-tick mob simulation runs on a chosen connected client, not on the
//! server; the server keeps authority over which client that is. A mob
//! without a controller is a valid state meaning "needs reassignment".

use std::sync::{Arc, Mutex, Weak};

use realm_shared::math::Point;
use realm_shared::packet::{Opcode, PacketWriter};
use tracing::debug;

use crate::object::{MapAnchor, MapObject, ObjectKind};
use crate::player::Player;

pub struct Mob {
    /// Species template, from map data.
    pub template_id: u32,
    anchor: MapAnchor,
    position: Mutex<Point>,
    controller: Mutex<Weak<Player>>,
}

impl Mob {
    pub fn new(template_id: u32, position: Point) -> Arc<Self> {
        Arc::new(Self {
            template_id,
            anchor: MapAnchor::unassigned(),
            position: Mutex::new(position),
            controller: Mutex::new(Weak::new()),
        })
    }

    pub fn set_position(&self, position: Point) {
        *self.position.lock().expect("position lock") = position;
    }

    /// The player currently simulating this mob, if any.
    pub fn controller(&self) -> Option<Arc<Player>> {
        self.controller.lock().expect("controller lock").upgrade()
    }

    pub(crate) fn set_controller(&self, controller: Weak<Player>) {
        *self.controller.lock().expect("controller lock") = controller;
    }

    pub(crate) fn clear_controller(&self) {
        self.set_controller(Weak::new());
    }

    /// Directive telling a client to take over this mob's simulation.
    pub fn control_request_frame(&self) -> Vec<u8> {
        let position = self.position();
        let mut w = PacketWriter::new(Opcode::MobControlRequest);
        w.write_i32(self.object_id())
            .write_u32(self.template_id)
            .write_f32(position.x)
            .write_f32(position.y);
        w.into_vec()
    }

    /// Directive telling a client to stop simulating this mob.
    pub fn control_release_frame(&self) -> Vec<u8> {
        let mut w = PacketWriter::new(Opcode::MobControlRelease);
        w.write_i32(self.object_id());
        w.into_vec()
    }

    /// Self-reassignment: offer this mob to live players on its map,
    /// nearest first. Leaves the controller empty when no candidate exists.
    pub async fn assign_controller(self: Arc<Self>) {
        let Some(map) = self.map() else {
            self.clear_controller();
            return;
        };
        let position = self.position();
        let mut candidates: Vec<Arc<Player>> = {
            let players = map.players.lock().expect("players lock");
            players
                .iter()
                .filter(|player| player.session().is_some_and(|s| s.is_alive()))
                .cloned()
                .collect()
        };
        candidates.sort_by(|a, b| {
            a.position()
                .distance_sq(position)
                .total_cmp(&b.position().distance_sq(position))
        });
        for candidate in candidates {
            if candidate.controlled().try_assign(&self).await {
                return;
            }
        }
        self.clear_controller();
        debug!(mob = self.object_id(), "no controller available");
    }
}

impl MapObject for Mob {
    fn anchor(&self) -> &MapAnchor {
        &self.anchor
    }

    fn kind(&self) -> ObjectKind {
        ObjectKind::Mob
    }

    fn position(&self) -> Point {
        *self.position.lock().expect("position lock")
    }
}
