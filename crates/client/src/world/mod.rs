//! Per-simulator world state: concurrent maps of primitives and avatars
//! with uuid indices. Writers serialize on the map locks; readers take
//! cheap `Arc` snapshots and never block behind decoding.

pub mod entity;
pub mod nvpair;

pub use entity::{
    Avatar, ExtraParam, ExtraParams, FloatingText, JointType, ObjectFlags, Primitive, PrimShape,
    SoundInfo,
};
pub use nvpair::NameValue;

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use uuid::Uuid;

#[derive(Debug, Default)]
pub struct SimWorld {
    prims: RwLock<HashMap<u32, Arc<Primitive>>>,
    avatars: RwLock<HashMap<u32, Arc<Avatar>>>,
    prim_ids: RwLock<HashMap<Uuid, u32>>,
    avatar_ids: RwLock<HashMap<Uuid, u32>>,
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

impl SimWorld {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn prim(&self, local_id: u32) -> Option<Arc<Primitive>> {
        read(&self.prims).get(&local_id).cloned()
    }

    pub fn prim_by_uuid(&self, id: Uuid) -> Option<Arc<Primitive>> {
        let local = *read(&self.prim_ids).get(&id)?;
        self.prim(local)
    }

    pub fn avatar(&self, local_id: u32) -> Option<Arc<Avatar>> {
        read(&self.avatars).get(&local_id).cloned()
    }

    pub fn avatar_by_uuid(&self, id: Uuid) -> Option<Arc<Avatar>> {
        let local = *read(&self.avatar_ids).get(&id)?;
        self.avatar(local)
    }

    /// Snapshot of every tracked primitive; safe to iterate without holding
    /// any world lock.
    pub fn prims(&self) -> Vec<Arc<Primitive>> {
        read(&self.prims).values().cloned().collect()
    }

    pub fn avatars(&self) -> Vec<Arc<Avatar>> {
        read(&self.avatars).values().cloned().collect()
    }

    pub fn prim_count(&self) -> usize {
        read(&self.prims).len()
    }

    pub fn avatar_count(&self) -> usize {
        read(&self.avatars).len()
    }

    /// Apply a mutation to a primitive, creating it when unknown. Returns
    /// the committed entity and whether it is new to the store.
    pub(crate) fn update_prim(
        &self,
        local_id: u32,
        apply: impl FnOnce(&mut Primitive),
    ) -> (Arc<Primitive>, bool) {
        let mut prims = write(&self.prims);
        let (arc, is_new) = match prims.entry(local_id) {
            std::collections::hash_map::Entry::Occupied(mut entry) => {
                apply(Arc::make_mut(entry.get_mut()));
                (entry.get().clone(), false)
            }
            std::collections::hash_map::Entry::Vacant(entry) => {
                let mut prim = Primitive::new(local_id);
                apply(&mut prim);
                let arc = Arc::new(prim);
                entry.insert(arc.clone());
                (arc, true)
            }
        };
        drop(prims);
        if !arc.id.is_nil() {
            write(&self.prim_ids).insert(arc.id, local_id);
        }
        (arc, is_new)
    }

    pub(crate) fn update_avatar(
        &self,
        local_id: u32,
        apply: impl FnOnce(&mut Avatar),
    ) -> (Arc<Avatar>, bool) {
        let mut avatars = write(&self.avatars);
        let (arc, is_new) = match avatars.entry(local_id) {
            std::collections::hash_map::Entry::Occupied(mut entry) => {
                apply(Arc::make_mut(entry.get_mut()));
                (entry.get().clone(), false)
            }
            std::collections::hash_map::Entry::Vacant(entry) => {
                let mut avatar = Avatar::new(local_id);
                apply(&mut avatar);
                let arc = Arc::new(avatar);
                entry.insert(arc.clone());
                (arc, true)
            }
        };
        drop(avatars);
        if !arc.id.is_nil() {
            write(&self.avatar_ids).insert(arc.id, local_id);
        }
        (arc, is_new)
    }

    pub(crate) fn remove_prim(&self, local_id: u32) -> Option<Arc<Primitive>> {
        let prim = write(&self.prims).remove(&local_id)?;
        write(&self.prim_ids).remove(&prim.id);
        Some(prim)
    }

    pub(crate) fn remove_avatar(&self, local_id: u32) -> Option<Arc<Avatar>> {
        let avatar = write(&self.avatars).remove(&local_id)?;
        write(&self.avatar_ids).remove(&avatar.id);
        Some(avatar)
    }

    /// Local ids of primitives whose parent is `parent_id`.
    pub(crate) fn prim_children_of(&self, parent_id: u32) -> Vec<u32> {
        read(&self.prims)
            .values()
            .filter(|p| p.parent_id == parent_id)
            .map(|p| p.local_id)
            .collect()
    }

    pub(crate) fn clear(&self) {
        write(&self.prims).clear();
        write(&self.avatars).clear();
        write(&self.prim_ids).clear();
        write(&self.avatar_ids).clear();
    }

    /// Walk primitives with a mutating step; used by the interpolator.
    pub(crate) fn for_each_prim_mut(&self, mut step: impl FnMut(&mut Primitive)) {
        for arc in write(&self.prims).values_mut() {
            step(Arc::make_mut(arc));
        }
    }

    pub(crate) fn for_each_avatar_mut(&self, mut step: impl FnMut(&mut Avatar)) {
        for arc in write(&self.avatars).values_mut() {
            step(Arc::make_mut(arc));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    #[test]
    fn create_then_mutate() {
        let world = SimWorld::new();
        let id = Uuid::new_v4();

        let (prim, is_new) = world.update_prim(100, |p| {
            p.id = id;
            p.position = Vec3::new(1.0, 2.0, 3.0);
        });
        assert!(is_new);
        assert_eq!(prim.position, Vec3::new(1.0, 2.0, 3.0));

        let (prim, is_new) = world.update_prim(100, |p| {
            p.position.z = 9.0;
        });
        assert!(!is_new);
        assert_eq!(prim.position.z, 9.0);
        assert_eq!(world.prim_count(), 1);
        assert_eq!(world.prim_by_uuid(id).unwrap().local_id, 100);
    }

    #[test]
    fn snapshots_outlive_removal() {
        let world = SimWorld::new();
        world.update_prim(1, |p| p.position.x = 5.0);
        let snapshot = world.prims();
        world.remove_prim(1);
        assert_eq!(world.prim_count(), 0);
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].position.x, 5.0);
    }

    #[test]
    fn children_lookup() {
        let world = SimWorld::new();
        world.update_prim(100, |_| {});
        world.update_prim(200, |p| p.parent_id = 100);
        world.update_prim(300, |p| p.parent_id = 100);
        let mut children = world.prim_children_of(100);
        children.sort_unstable();
        assert_eq!(children, vec![200, 300]);
    }
}
