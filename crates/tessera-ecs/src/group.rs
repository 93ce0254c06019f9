//! Owning groups.
//!
//! A group *owns* one or more component types and keeps every entity that
//! matches it (all owned and `get` types present, no `exclude` type present)
//! packed at the front of each owned storage, in the same order. Iterating a
//! group is therefore a linear walk over positions `[0, len)` with no
//! per-entity membership test.
//!
//! The registry maintains the partition on every mutation of a type a group
//! references:
//!
//! | mutation                     | owned / get type | exclude type |
//! |------------------------------|------------------|--------------|
//! | component stored             | try to enter     | leave        |
//! | component about to be erased | leave            | -            |
//! | component erased             | -                | try to enter |
//!
//! Entering swaps the entity to position `len` of every owned storage and
//! grows the prefix; leaving shrinks the prefix and swaps the entity to the
//! new `len`. A type can be owned by at most one group.

use std::marker::PhantomData;

use crate::component::ComponentTypeId;
use crate::entity::Entity;
use crate::query::ComponentSet;
use crate::registry::Registry;
use crate::sparse_set::SparseSet;
use crate::EcsError;

// ---------------------------------------------------------------------------
// GroupData -- registry-side bookkeeping
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub(crate) struct GroupData {
    pub owned: Vec<ComponentTypeId>,
    pub get: Vec<ComponentTypeId>,
    pub exclude: Vec<ComponentTypeId>,
    /// Length of the matching prefix in every owned storage.
    pub len: usize,
}

fn sorted(ids: &[ComponentTypeId]) -> Vec<ComponentTypeId> {
    let mut ids = ids.to_vec();
    ids.sort_unstable();
    ids
}

impl GroupData {
    fn new(
        owned: Vec<ComponentTypeId>,
        get: Vec<ComponentTypeId>,
        exclude: Vec<ComponentTypeId>,
    ) -> Self {
        Self {
            owned,
            get,
            exclude,
            len: 0,
        }
    }

    fn same_signature(
        &self,
        owned: &[ComponentTypeId],
        get: &[ComponentTypeId],
        exclude: &[ComponentTypeId],
    ) -> bool {
        sorted(&self.owned) == sorted(owned)
            && sorted(&self.get) == sorted(get)
            && sorted(&self.exclude) == sorted(exclude)
    }

    /// Whether `id` is an owned or get type.
    fn includes(&self, id: ComponentTypeId) -> bool {
        self.owned.contains(&id) || self.get.contains(&id)
    }

    fn excludes(&self, id: ComponentTypeId) -> bool {
        self.exclude.contains(&id)
    }
}

// ---------------------------------------------------------------------------
// Group maintenance (impl Registry)
// ---------------------------------------------------------------------------

impl Registry {
    fn lead_set(&self, group: usize) -> &SparseSet {
        self.storages[self.groups[group].owned[0].index()].set()
    }

    fn in_group(&self, group: usize, entity: Entity) -> bool {
        self.lead_set(group)
            .index(entity)
            .is_some_and(|pos| pos < self.groups[group].len)
    }

    fn matches_group(&self, group: usize, entity: Entity) -> bool {
        let data = &self.groups[group];
        data.owned
            .iter()
            .chain(&data.get)
            .all(|id| self.storages[id.index()].contains(entity))
            && !data
                .exclude
                .iter()
                .any(|id| self.storages[id.index()].contains(entity))
    }

    /// Move `entity` into the prefix if it matches and is not there yet.
    fn enter_group(&mut self, group: usize, entity: Entity) -> Result<(), EcsError> {
        if self.in_group(group, entity) || !self.matches_group(group, entity) {
            return Ok(());
        }
        let len = self.groups[group].len;
        for k in 0..self.groups[group].owned.len() {
            let storage = &mut self.storages[self.groups[group].owned[k].index()];
            let Some(other) = storage.set().at(len) else {
                return Err(EcsError::NotInSet { entity });
            };
            storage.swap_entities(entity, other)?;
        }
        self.groups[group].len += 1;
        Ok(())
    }

    /// Move `entity` out of the prefix if it is in it.
    fn leave_group(&mut self, group: usize, entity: Entity) -> Result<(), EcsError> {
        if !self.in_group(group, entity) {
            return Ok(());
        }
        self.groups[group].len -= 1;
        let len = self.groups[group].len;
        for k in 0..self.groups[group].owned.len() {
            let storage = &mut self.storages[self.groups[group].owned[k].index()];
            let Some(other) = storage.set().at(len) else {
                return Err(EcsError::NotInSet { entity });
            };
            storage.swap_entities(entity, other)?;
        }
        Ok(())
    }

    /// Component `id` was just stored for `entity`.
    pub(crate) fn groups_on_construct(
        &mut self,
        id: ComponentTypeId,
        entity: Entity,
    ) -> Result<(), EcsError> {
        for group in 0..self.groups.len() {
            if self.groups[group].includes(id) {
                self.enter_group(group, entity)?;
            } else if self.groups[group].excludes(id) {
                self.leave_group(group, entity)?;
            }
        }
        Ok(())
    }

    /// Component `id` of `entity` is about to be erased.
    pub(crate) fn groups_before_erase(
        &mut self,
        id: ComponentTypeId,
        entity: Entity,
    ) -> Result<(), EcsError> {
        for group in 0..self.groups.len() {
            if self.groups[group].includes(id) {
                self.leave_group(group, entity)?;
            }
        }
        Ok(())
    }

    /// Component `id` of `entity` was just erased.
    pub(crate) fn groups_after_erase(
        &mut self,
        id: ComponentTypeId,
        entity: Entity,
    ) -> Result<(), EcsError> {
        for group in 0..self.groups.len() {
            if self.groups[group].excludes(id) {
                self.enter_group(group, entity)?;
            }
        }
        Ok(())
    }

    /// Index of the group with this signature, creating and populating it if
    /// it does not exist.
    pub(crate) fn find_or_create_group(
        &mut self,
        owned: Vec<ComponentTypeId>,
        get: Vec<ComponentTypeId>,
        exclude: Vec<ComponentTypeId>,
    ) -> Result<usize, EcsError> {
        if owned.is_empty() {
            return Err(EcsError::InvalidGroup {
                reason: "a group must own at least one component type".into(),
            });
        }
        let mut all: Vec<ComponentTypeId> = owned.iter().chain(&get).chain(&exclude).copied().collect();
        all.sort_unstable();
        if let Some(pair) = all.windows(2).find(|pair| pair[0] == pair[1]) {
            return Err(EcsError::InvalidGroup {
                reason: format!(
                    "component type {} is listed more than once",
                    self.components.name(pair[0])
                ),
            });
        }

        if let Some(existing) = self
            .groups
            .iter()
            .position(|group| group.same_signature(&owned, &get, &exclude))
        {
            return Ok(existing);
        }
        if let Some(&taken) = owned
            .iter()
            .find(|id| self.groups.iter().any(|group| group.owned.contains(id)))
        {
            return Err(EcsError::ConflictingGroupOwnership {
                component: self.components.name(taken),
            });
        }

        self.groups.push(GroupData::new(owned, get, exclude));
        let group = self.groups.len() - 1;

        // Positions before `pos` are settled, so entering only ever swaps
        // with an entity that was already examined.
        let lead = self.groups[group].owned[0];
        let mut pos = 0;
        while let Some(entity) = self.storages[lead.index()].set().at(pos) {
            self.enter_group(group, entity)?;
            pos += 1;
        }

        tracing::debug!(
            owned = ?self.groups[group].owned,
            get = ?self.groups[group].get,
            exclude = ?self.groups[group].exclude,
            len = self.groups[group].len,
            "created group"
        );
        Ok(group)
    }

    pub(crate) fn remove_group(
        &mut self,
        owned: &[ComponentTypeId],
        get: &[ComponentTypeId],
        exclude: &[ComponentTypeId],
    ) -> bool {
        let Some(group) = self
            .groups
            .iter()
            .position(|group| group.same_signature(owned, get, exclude))
        else {
            return false;
        };
        let data = self.groups.remove(group);
        tracing::debug!(owned = ?data.owned, len = data.len, "released group");
        true
    }
}

// ---------------------------------------------------------------------------
// Group -- user-facing handle
// ---------------------------------------------------------------------------

/// Handle to a group owning `O`, observing `G` and excluding `E`.
///
/// Obtained from [`Registry::group`]. Holds the registry mutably, so the
/// partition cannot change while the handle is alive.
///
/// ```
/// use tessera_ecs::prelude::*;
///
/// struct Position(f32);
/// struct Velocity(f32);
///
/// let mut registry = Registry::new();
/// for i in 0..4 {
///     let e = registry.create();
///     registry.emplace(e, Position(0.0)).unwrap();
///     if i % 2 == 0 {
///         registry.emplace(e, Velocity(1.0)).unwrap();
///     }
/// }
///
/// let mut group = registry.group::<(Position, Velocity), (), ()>().unwrap();
/// assert_eq!(group.len(), 2);
/// group.each_mut(|_, (p, v): (&mut Position, &mut Velocity), _: ()| p.0 += v.0);
/// ```
pub struct Group<'r, O, G = (), E = ()>
where
    O: ComponentSet,
    G: ComponentSet,
    E: ComponentSet,
{
    registry: &'r mut Registry,
    index: usize,
    _marker: PhantomData<fn() -> (O, G, E)>,
}

impl<'r, O, G, E> Group<'r, O, G, E>
where
    O: ComponentSet,
    G: ComponentSet,
    E: ComponentSet,
{
    pub(crate) fn new(registry: &'r mut Registry, index: usize) -> Self {
        Self {
            registry,
            index,
            _marker: PhantomData,
        }
    }

    /// Number of matching entities.
    pub fn len(&self) -> usize {
        self.registry.groups[self.index].len
    }

    /// Whether no entity matches.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The matching entities, in the shared order of the owned storages.
    pub fn entities(&self) -> &[Entity] {
        &self.registry.lead_set(self.index).packed()[..self.len()]
    }

    /// Whether `entity` is in the group.
    pub fn contains(&self, entity: Entity) -> bool {
        self.registry.in_group(self.index, entity)
    }

    fn storages(&self) -> Option<(O::Storages<'_>, G::Storages<'_>)> {
        let registry: &Registry = self.registry;
        let owned = O::type_ids(&registry.components)?;
        let get = G::type_ids(&registry.components)?;
        let mut erased = owned
            .into_iter()
            .chain(get)
            .map(|id| registry.storage_dyn(id));
        let owned = O::downcast(&mut erased)?;
        let get = G::downcast(&mut erased)?;
        Some((owned, get))
    }

    /// The owned and get components of `entity`, if it is in the group.
    pub fn get(&self, entity: Entity) -> Option<(O::Refs<'_>, G::Refs<'_>)> {
        if !self.contains(entity) {
            return None;
        }
        let (owned, get) = self.storages()?;
        Some((O::get(&owned, entity)?, G::get(&get, entity)?))
    }

    /// Call `f` with every member and its owned and get components.
    pub fn each<'s, F>(&'s self, mut f: F)
    where
        F: FnMut(Entity, O::Refs<'s>, G::Refs<'s>),
    {
        let Some((owned, get)) = self.storages() else {
            return;
        };
        for (pos, &entity) in self.entities().iter().enumerate() {
            if let (Some(o), Some(g)) = (O::at(&owned, pos), G::get(&get, entity)) {
                f(entity, o, g);
            }
        }
    }

    /// Call `f` with every member and mutable references to its owned and
    /// get components.
    pub fn each_mut<F>(&mut self, mut f: F)
    where
        F: for<'x> FnMut(Entity, O::Muts<'x>, G::Muts<'x>),
    {
        let len = self.len();
        let registry = &mut *self.registry;
        let (Some(owned), Some(get)) = (
            O::type_ids(&registry.components),
            G::type_ids(&registry.components),
        ) else {
            return;
        };
        let borrowed: Vec<ComponentTypeId> = owned.iter().chain(&get).copied().collect();
        let (exclusive, _) = registry.split_storages(&borrowed, &[]);
        let mut exclusive = exclusive.into_iter();
        let (Some(mut owned), Some(mut get)) =
            (O::downcast_mut(&mut exclusive), G::downcast_mut(&mut exclusive))
        else {
            return;
        };

        for pos in 0..len {
            let Some(entity) = O::set_at_mut(&owned, 0).and_then(|set| set.at(pos)) else {
                break;
            };
            if let (Some(o), Some(g)) = (O::at_mut(&mut owned, pos), G::get_mut(&mut get, entity)) {
                f(entity, o, g);
            }
        }
    }
}

impl<O, G, E> std::fmt::Debug for Group<'_, O, G, E>
where
    O: ComponentSet,
    G: ComponentSet,
    E: ComponentSet,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Group")
            .field("owned", &O::type_names())
            .field("get", &G::type_names())
            .field("exclude", &E::type_names())
            .field("len", &self.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use crate::prelude::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Pos(i32);
    #[derive(Debug, Clone, PartialEq)]
    struct Vel(i32);
    #[derive(Debug, Clone, PartialEq)]
    struct Mass(i32);
    #[derive(Debug, Clone, PartialEq)]
    struct Frozen;

    fn assert_partitioned(registry: &Registry, members: &[Entity]) {
        let pos = registry.storage::<Pos>().unwrap();
        let vel = registry.storage::<Vel>().unwrap();
        let n = members.len();
        assert_eq!(&pos.packed()[..n], &vel.packed()[..n]);
        let mut prefix = pos.packed()[..n].to_vec();
        let mut expected = members.to_vec();
        prefix.sort();
        expected.sort();
        assert_eq!(prefix, expected);
    }

    #[test]
    fn creation_partitions_existing_data() {
        let mut registry = Registry::new();
        let e: Vec<Entity> = (0..6).map(|_| registry.create()).collect();
        for &x in &e {
            registry.emplace(x, Pos(x.index() as i32)).unwrap();
        }
        for &x in &[e[1], e[4], e[5]] {
            registry.emplace(x, Vel(1)).unwrap();
        }
        let group = registry.group::<(Pos, Vel), (), ()>().unwrap();
        assert_eq!(group.len(), 3);
        assert!(group.contains(e[4]));
        assert!(!group.contains(e[0]));
        assert_partitioned(&registry, &[e[1], e[4], e[5]]);
    }

    #[test]
    fn membership_follows_mutations() {
        let mut registry = Registry::new();
        let e: Vec<Entity> = (0..10).map(|_| registry.create()).collect();
        for i in [3, 7, 8, 6] {
            registry.emplace(e[i], Pos(i as i32)).unwrap();
        }
        for i in [4, 5] {
            registry.emplace(e[i], Vel(i as i32)).unwrap();
        }
        assert!(registry.group::<(Pos, Vel), (), ()>().unwrap().is_empty());

        registry.emplace(e[7], Vel(7)).unwrap();
        assert_eq!(
            registry.group::<(Pos, Vel), (), ()>().unwrap().entities(),
            &[e[7]]
        );

        registry.emplace(e[4], Pos(4)).unwrap();
        assert_eq!(
            registry.group::<(Pos, Vel), (), ()>().unwrap().entities(),
            &[e[7], e[4]]
        );

        registry.remove::<Vel>(e[7]).unwrap();
        assert_eq!(
            registry.group::<(Pos, Vel), (), ()>().unwrap().entities(),
            &[e[4]]
        );
        assert_partitioned(&registry, &[e[4]]);
        assert_eq!(registry.get::<Pos>(e[4]).unwrap(), &Pos(4));
        assert_eq!(registry.get::<Vel>(e[4]).unwrap(), &Vel(4));
    }

    #[test]
    fn exclude_types_push_entities_out_and_back() {
        let mut registry = Registry::new();
        let a = registry.create();
        let b = registry.create();
        for &x in &[a, b] {
            registry.emplace(x, Pos(0)).unwrap();
        }
        registry.group::<(Pos,), (), (Frozen,)>().unwrap();

        registry.emplace(a, Frozen).unwrap();
        {
            let group = registry.group::<(Pos,), (), (Frozen,)>().unwrap();
            assert_eq!(group.entities(), &[b]);
        }
        registry.remove::<Frozen>(a).unwrap();
        assert_eq!(registry.group::<(Pos,), (), (Frozen,)>().unwrap().len(), 2);
    }

    #[test]
    fn get_types_are_required_but_not_reordered() {
        let mut registry = Registry::new();
        let a = registry.create();
        let b = registry.create();
        registry.emplace(a, Mass(5)).unwrap();
        registry.emplace(b, Mass(6)).unwrap();
        registry.emplace(b, Pos(1)).unwrap();
        registry.emplace(a, Pos(2)).unwrap();

        let mut group = registry.group::<(Pos,), (Mass,), ()>().unwrap();
        assert_eq!(group.len(), 2);
        let (pos, mass) = group.get(a).unwrap();
        assert_eq!((pos.0, mass.0), (&Pos(2), &Mass(5)));

        group.each_mut(|_, (p,): (&mut Pos,), (m,): (&mut Mass,)| p.0 += m.0);
        let mut seen = Vec::new();
        group.each(|entity, (p,), (m,)| seen.push((entity, p.0, m.0)));
        seen.sort_by_key(|(entity, _, _)| entity.index());
        assert_eq!(seen, vec![(a, 7, 5), (b, 7, 6)]);

        // Mass is observed, not owned; its order is untouched.
        assert_eq!(registry.storage::<Mass>().unwrap().packed(), &[a, b]);
    }

    #[test]
    fn identical_request_returns_same_group() {
        let mut registry = Registry::new();
        registry.group::<(Pos, Vel), (), ()>().unwrap();
        registry.group::<(Vel, Pos), (), ()>().unwrap();
        assert_eq!(registry.groups.len(), 1);
    }

    #[test]
    fn overlapping_ownership_is_rejected() {
        let mut registry = Registry::new();
        registry.group::<(Pos, Vel), (), ()>().unwrap();
        let err = registry.group::<(Pos,), (), ()>().unwrap_err();
        assert!(matches!(err, EcsError::ConflictingGroupOwnership { .. }));
        // Observing an owned type is fine.
        registry.group::<(Mass,), (Pos,), ()>().unwrap();
    }

    #[test]
    fn malformed_signatures_are_rejected() {
        let mut registry = Registry::new();
        assert!(matches!(
            registry.group::<(), (Pos,), ()>(),
            Err(EcsError::InvalidGroup { .. })
        ));
        assert!(matches!(
            registry.group::<(Pos,), (), (Pos,)>(),
            Err(EcsError::InvalidGroup { .. })
        ));
    }

    #[test]
    fn release_frees_ownership() {
        let mut registry = Registry::new();
        registry.group::<(Pos, Vel), (), ()>().unwrap();
        assert!(registry.release_group::<(Pos, Vel), (), ()>());
        assert!(!registry.release_group::<(Pos, Vel), (), ()>());
        registry.group::<(Pos,), (), ()>().unwrap();
    }

    #[test]
    fn destroy_keeps_partition() {
        let mut registry = Registry::new();
        let e: Vec<Entity> = (0..4).map(|_| registry.create()).collect();
        for &x in &e {
            registry.emplace(x, Pos(0)).unwrap();
            registry.emplace(x, Vel(0)).unwrap();
        }
        registry.group::<(Pos, Vel), (), ()>().unwrap();
        registry.destroy(e[1]).unwrap();
        let group = registry.group::<(Pos, Vel), (), ()>().unwrap();
        assert_eq!(group.len(), 3);
        assert!(!group.contains(e[1]));
        assert_partitioned(&registry, &[e[0], e[2], e[3]]);
    }
}
