//! Per-map world-object registries.
//!
//! A map owns one keyed registry per object category plus the identifier
//! authority those registries allocate from. Mutation goes through the
//! map's per-category lock; iteration borrows the registry, so the borrow
//! checker rules out structural mutation mid-iteration.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex, Weak};

use realm_shared::math::Point;
use tracing::debug;

use crate::mob::Mob;
use crate::object::{MapObject, Npc, ObjectKind, Portal, UNASSIGNED_OBJECT_ID};
use crate::player::Player;

/// Identifies one map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MapId(pub u32);

/// Category bases keep live non-exempt ids on one map pairwise distinct
/// even across categories.
const ID_CATEGORY_SPAN: i32 = 0x1000_0000;

struct ObjectIdAllocator {
    counters: [AtomicI32; ObjectKind::COUNT],
}

impl ObjectIdAllocator {
    fn new() -> Self {
        Self {
            counters: std::array::from_fn(|i| AtomicI32::new(i as i32 * ID_CATEGORY_SPAN + 1)),
        }
    }

    /// Monotonic per category; released ids are not recycled.
    fn allocate(&self, kind: ObjectKind) -> i32 {
        self.counters[kind.index()].fetch_add(1, Ordering::SeqCst)
    }
}

/// Keyed registry of one object category on one map.
pub struct MapObjects<T> {
    map: Weak<Map>,
    items: HashMap<i32, Arc<T>>,
}

impl<T: MapObject> MapObjects<T> {
    fn new(map: Weak<Map>) -> Self {
        Self {
            map,
            items: HashMap::new(),
        }
    }

    /// Registers `item`: sets its map back-reference and, for non-exempt
    /// kinds, overwrites its object id with a freshly allocated one. Exempt
    /// ids are left untouched.
    pub fn insert(&mut self, item: Arc<T>) {
        item.anchor().set_map(self.map.clone());
        if !item.kind().exempt() {
            if let Some(map) = self.map.upgrade() {
                item.anchor().set_object_id(map.allocate_object_id(item.kind()));
            }
        }
        self.items.insert(item.object_id(), item);
    }

    /// Deregisters the member with `object_id`: clears its map
    /// back-reference and resets non-exempt ids to the unassigned sentinel.
    /// Removing an absent id is a no-op.
    pub fn remove(&mut self, object_id: i32) -> Option<Arc<T>> {
        let item = self.items.remove(&object_id)?;
        item.anchor().set_map(Weak::new());
        if !item.kind().exempt() {
            item.anchor().set_object_id(UNASSIGNED_OBJECT_ID);
        }
        Some(item)
    }

    pub fn get(&self, object_id: i32) -> Option<&Arc<T>> {
        self.items.get(&object_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<T>> + '_ {
        self.items.values()
    }

    /// Members within `range` of `reference`, boundary inclusive. Lazy and
    /// one-shot; reflects the registry as iterated.
    pub fn get_in_range(&self, reference: Point, range: f32) -> impl Iterator<Item = &Arc<T>> + '_ {
        self.items
            .values()
            .filter(move |item| item.position().distance_sq(reference) <= range * range)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// One game map.
pub struct Map {
    pub id: MapId,
    /// Where entering players appear.
    pub spawn_point: Point,
    object_ids: ObjectIdAllocator,
    pub players: Mutex<MapObjects<Player>>,
    pub mobs: Mutex<MapObjects<Mob>>,
    pub npcs: Mutex<MapObjects<Npc>>,
    pub portals: Mutex<MapObjects<Portal>>,
}

impl Map {
    pub fn new(id: MapId) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<Map>| Self {
            id,
            spawn_point: Point::ZERO,
            object_ids: ObjectIdAllocator::new(),
            players: Mutex::new(MapObjects::new(weak.clone())),
            mobs: Mutex::new(MapObjects::new(weak.clone())),
            npcs: Mutex::new(MapObjects::new(weak.clone())),
            portals: Mutex::new(MapObjects::new(weak.clone())),
        })
    }

    /// Next identifier for `kind` on this map.
    pub fn allocate_object_id(&self, kind: ObjectKind) -> i32 {
        self.object_ids.allocate(kind)
    }

    /// Registers a player, then offers any controllerless mobs a controller
    /// again now that a new candidate is present.
    pub async fn enter(&self, player: &Arc<Player>) {
        self.players.lock().expect("players lock").insert(player.clone());
        debug!(map = self.id.0, player = player.object_id(), "player entered");
        let orphaned: Vec<Arc<Mob>> = {
            let mobs = self.mobs.lock().expect("mobs lock");
            mobs.iter()
                .filter(|mob| mob.controller().is_none())
                .cloned()
                .collect()
        };
        for mob in orphaned {
            mob.assign_controller().await;
        }
    }

    /// Deregisters a player, releases their delegated mobs, and hands those
    /// mobs to the remaining players.
    pub async fn leave(&self, player: &Arc<Player>) {
        self.players.lock().expect("players lock").remove(player.object_id());
        debug!(map = self.id.0, player = player.object_id(), "player left");
        let released = player.controlled().clear().await;
        for mob in released {
            mob.assign_controller().await;
        }
    }

    /// Registers a mob and assigns it a controller.
    pub async fn spawn_mob(&self, mob: Arc<Mob>) {
        self.mobs.lock().expect("mobs lock").insert(mob.clone());
        mob.assign_controller().await;
    }

    /// Removes a mob from play. Control release happens before registry
    /// removal so the release directive still carries the live object id.
    pub async fn despawn_mob(&self, mob: &Arc<Mob>) {
        if let Some(controller) = mob.controller() {
            controller.controlled().unassign(mob).await;
        }
        self.mobs.lock().expect("mobs lock").remove(mob.object_id());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_exempt_ids_are_allocated_and_reset() {
        let map = Map::new(MapId(9));
        let mob = Mob::new(100_100, Point::ZERO);
        assert_eq!(mob.object_id(), UNASSIGNED_OBJECT_ID);
        assert!(mob.map().is_none());

        map.mobs.lock().unwrap().insert(mob.clone());
        let first = mob.object_id();
        assert_ne!(first, UNASSIGNED_OBJECT_ID);
        assert_eq!(mob.map().unwrap().id, MapId(9));

        map.mobs.lock().unwrap().remove(first);
        assert_eq!(mob.object_id(), UNASSIGNED_OBJECT_ID);
        assert!(mob.map().is_none());

        // A reinsert gets a fresh id; nothing is recycled.
        map.mobs.lock().unwrap().insert(mob.clone());
        assert!(mob.object_id() > first);
    }

    #[test]
    fn exempt_ids_survive_insert_and_remove() {
        let map = Map::new(MapId(3));
        let player = Player::new(777, "Aria", Point::ZERO, Weak::new());
        map.players.lock().unwrap().insert(player.clone());
        assert_eq!(player.object_id(), 777);

        map.players.lock().unwrap().remove(777);
        assert_eq!(player.object_id(), 777);
        assert!(player.map().is_none());

        let portal = Portal::new(4, MapId(5), Point::new(10.0, 0.0));
        map.portals.lock().unwrap().insert(portal.clone());
        assert_eq!(portal.object_id(), 4);
        map.portals.lock().unwrap().remove(4);
        assert_eq!(portal.object_id(), 4);
    }

    #[test]
    fn ids_are_distinct_across_categories() {
        let map = Map::new(MapId(1));
        let mob = Mob::new(1, Point::ZERO);
        let npc = Npc::new(2, Point::ZERO);
        map.mobs.lock().unwrap().insert(mob.clone());
        map.npcs.lock().unwrap().insert(npc.clone());
        assert_ne!(mob.object_id(), npc.object_id());
    }

    #[test]
    fn range_query_is_boundary_inclusive() {
        let map = Map::new(MapId(2));
        let near = Mob::new(1, Point::new(3.0, 4.0)); // distance 5 exactly
        let far = Mob::new(2, Point::new(3.0, 4.001)); // just beyond
        {
            let mut mobs = map.mobs.lock().unwrap();
            mobs.insert(near.clone());
            mobs.insert(far.clone());
        }

        let mobs = map.mobs.lock().unwrap();
        let hits: Vec<i32> = mobs
            .get_in_range(Point::ZERO, 5.0)
            .map(|mob| mob.object_id())
            .collect();
        assert_eq!(hits, vec![near.object_id()]);
    }

    #[test]
    fn range_query_is_lazy_over_the_borrowed_registry() {
        let map = Map::new(MapId(4));
        for i in 0..10 {
            map.mobs
                .lock()
                .unwrap()
                .insert(Mob::new(i, Point::new(i as f32, 0.0)));
        }
        let mobs = map.mobs.lock().unwrap();
        let mut iter = mobs.get_in_range(Point::ZERO, 100.0);
        // One-shot: pulling a few does not require materializing the rest.
        assert!(iter.next().is_some());
        assert!(iter.next().is_some());
    }

    #[test]
    fn remove_of_absent_id_is_a_noop() {
        let map = Map::new(MapId(6));
        assert!(map.mobs.lock().unwrap().remove(12345).is_none());
    }
}
