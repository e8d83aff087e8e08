//! Delegated-control collections.
//!
//! Each player owns the set of mobs whose per-tick simulation has been
//! delegated to their client. Assign, unassign, and clear on one collection
//! are serialized by its lock, so a disconnect-triggered clear cannot lose
//! a concurrently arriving assign. Duplicate assigns and unassigns of
//! absent mobs are routine under reassignment races and stay silent.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use tokio::sync::Mutex;
use tracing::debug;

use crate::mob::Mob;
use crate::object::MapObject;
use crate::player::Player;

pub struct ControlledMobs {
    parent: Weak<Player>,
    inner: Mutex<HashMap<i32, Arc<Mob>>>,
}

impl ControlledMobs {
    pub(crate) fn new(parent: Weak<Player>) -> Self {
        Self {
            parent,
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Delegates `mob` to the parent. A live parent takes the mob and is
    /// sent a take-control directive; a dead parent forwards the mob to its
    /// self-reassignment routine instead, so the mob is never stranded
    /// while a live alternative exists.
    pub async fn assign(&self, mob: &Arc<Mob>) {
        if !self.try_assign(mob).await {
            mob.clone().assign_controller().await;
        }
    }

    /// Core of [`ControlledMobs::assign`]: returns false when the parent or
    /// its session is gone, without touching the mob.
    pub(crate) async fn try_assign(&self, mob: &Arc<Mob>) -> bool {
        let Some(parent) = self.parent.upgrade() else {
            return false;
        };
        let Some(session) = parent.session() else {
            return false;
        };
        let mut inner = self.inner.lock().await;
        if !session.is_alive() {
            return false;
        }
        if inner.contains_key(&mob.object_id()) {
            return true;
        }
        mob.set_controller(Arc::downgrade(&parent));
        inner.insert(mob.object_id(), mob.clone());
        session.send_frame(&mob.control_request_frame()).await;
        true
    }

    /// Releases `mob`. The directive goes out only while the parent session
    /// is alive, but the controller back-reference and membership are
    /// cleaned up unconditionally. Unassigning a non-member is a no-op.
    pub async fn unassign(&self, mob: &Arc<Mob>) {
        let mut inner = self.inner.lock().await;
        self.release_locked(&mut inner, mob).await;
    }

    async fn release_locked(&self, inner: &mut HashMap<i32, Arc<Mob>>, mob: &Arc<Mob>) {
        if !inner.contains_key(&mob.object_id()) {
            return;
        }
        if let Some(session) = self.parent.upgrade().and_then(|p| p.session()) {
            if session.is_alive() {
                session.send_frame(&mob.control_release_frame()).await;
            }
        }
        mob.clear_controller();
        inner.remove(&mob.object_id());
    }

    /// Releases every member individually, over a snapshot taken before the
    /// first removal, so each prior member gets its own release directive.
    /// Returns the released mobs for reassignment.
    pub async fn clear(&self) -> Vec<Arc<Mob>> {
        let mut inner = self.inner.lock().await;
        let snapshot: Vec<Arc<Mob>> = inner.values().cloned().collect();
        for mob in &snapshot {
            self.release_locked(&mut inner, mob).await;
        }
        debug!(released = snapshot.len(), "control collection cleared");
        snapshot
    }

    pub async fn contains(&self, object_id: i32) -> bool {
        self.inner.lock().await.contains_key(&object_id)
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use realm_shared::math::Point;

    #[tokio::test]
    async fn assign_with_dead_parent_does_not_strand_membership() {
        // A player whose session is gone entirely.
        let player = Player::new(1, "Ghost", Point::ZERO, Weak::new());
        let mob = Mob::new(100, Point::ZERO);

        player.controlled().assign(&mob).await;

        // Not adopted here, and with no map there is no candidate either:
        // the mob ends up controllerless, which is the "needs reassignment"
        // state, not an error.
        assert!(!player.controlled().contains(mob.object_id()).await);
        assert!(mob.controller().is_none());
    }

    #[tokio::test]
    async fn unassign_of_absent_mob_is_a_noop() {
        let player = Player::new(2, "Idle", Point::ZERO, Weak::new());
        let mob = Mob::new(101, Point::ZERO);
        player.controlled().unassign(&mob).await;
        assert!(player.controlled().is_empty().await);
        assert!(mob.controller().is_none());
    }

    #[tokio::test]
    async fn clear_on_empty_collection_is_a_noop() {
        let player = Player::new(3, "Empty", Point::ZERO, Weak::new());
        assert!(player.controlled().clear().await.is_empty());
    }
}
