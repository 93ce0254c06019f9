//! The [`Registry`] is the top-level container. It owns the entity allocator,
//! one sparse-set storage per component type, the owning groups and the
//! signal hub.
//!
//! Storages are created lazily the first time a type is mutated (or named in
//! a group or signal). Every component mutation goes through the registry so
//! it can keep groups partitioned and fire construct/update/destroy
//! listeners at the right moment.

use serde::{Deserialize, Serialize};

use crate::component::{Component, ComponentRegistry, ComponentTypeId};
use crate::entity::{Entity, EntityAllocator, INDEX_MASK};
use crate::group::{Group, GroupData};
use crate::query::{ComponentSet, StorageMut, StorageRef, View, ViewMut};
use crate::signal::{Connection, SignalHub, SignalKind, Sink};
use crate::storage::{AnyStorage, Storage};
use crate::EcsError;

// ---------------------------------------------------------------------------
// RegistryConfig
// ---------------------------------------------------------------------------

/// Construction-time settings for a [`Registry`].
///
/// Every field has a default, so partial JSON documents deserialize:
///
/// ```
/// use tessera_ecs::registry::RegistryConfig;
///
/// let config: RegistryConfig = serde_json::from_str(r#"{ "max_entities": 64 }"#).unwrap();
/// assert_eq!(config.max_entities, 64);
/// assert_eq!(config.entity_capacity, 0);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Reserve hint for the allocator's slot array.
    pub entity_capacity: usize,
    /// Reserve hint for each newly created component storage.
    pub storage_capacity: usize,
    /// Upper bound on distinct entity indices. Clamped to the index space.
    pub max_entities: u32,
}

impl Default for RegistryConfig {
    /// No reservations; the whole 20-bit index space.
    fn default() -> Self {
        Self {
            entity_capacity: 0,
            storage_capacity: 0,
            max_entities: INDEX_MASK,
        }
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Entity and component container.
///
/// ```
/// use tessera_ecs::prelude::*;
///
/// #[derive(Debug, PartialEq)]
/// struct Health(u32);
///
/// let mut registry = Registry::new();
/// let e = registry.create();
/// registry.emplace(e, Health(10)).unwrap();
/// registry.patch::<Health, _>(e, |h| h.0 -= 3).unwrap();
/// assert_eq!(registry.get::<Health>(e).unwrap(), &Health(7));
///
/// registry.destroy(e).unwrap();
/// assert!(!registry.valid(e));
/// ```
pub struct Registry {
    config: RegistryConfig,
    pub(crate) entities: EntityAllocator,
    pub(crate) components: ComponentRegistry,
    /// Indexed by `ComponentTypeId`.
    pub(crate) storages: Vec<Box<dyn AnyStorage>>,
    pub(crate) groups: Vec<GroupData>,
    pub(crate) signals: SignalHub,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("alive", &self.entities.alive())
            .field("storages", &self.storages.len())
            .field("groups", &self.groups.len())
            .field("signals", &self.signals)
            .finish()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    /// Create an empty registry with default settings.
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    /// Create an empty registry.
    pub fn with_config(config: RegistryConfig) -> Self {
        Self {
            entities: EntityAllocator::with_limits(config.entity_capacity, config.max_entities),
            components: ComponentRegistry::new(),
            storages: Vec::new(),
            groups: Vec::new(),
            signals: SignalHub::new(),
            config,
        }
    }

    /// The settings this registry was built with.
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Component types seen so far.
    pub fn components(&self) -> &ComponentRegistry {
        &self.components
    }

    /// The entity allocator, for diagnostics.
    pub fn entities(&self) -> &EntityAllocator {
        &self.entities
    }

    // -- storage management -------------------------------------------------

    /// Register `T` and create its storage if this is its first use.
    pub(crate) fn assure<T: Component>(&mut self) -> ComponentTypeId {
        let id = self.components.register::<T>();
        if id.index() == self.storages.len() {
            self.storages
                .push(Box::new(Storage::<T>::with_capacity(self.config.storage_capacity)));
            tracing::debug!(
                component = std::any::type_name::<T>(),
                id = id.index(),
                "created component storage"
            );
        }
        id
    }

    #[inline]
    pub(crate) fn storage_dyn(&self, id: ComponentTypeId) -> StorageRef<'_> {
        &*self.storages[id.index()]
    }

    fn typed_mut<T: Component>(&mut self, id: ComponentTypeId) -> &mut Storage<T> {
        self.storages[id.index()]
            .as_any_mut()
            .downcast_mut::<Storage<T>>()
            .expect("storage type does not match its component id")
    }

    /// Hand out exclusive references to the storages in `mutable` (in that
    /// order) and shared references to those in `shared`, in one pass over
    /// the table. Ids listed in both or twice only appear once.
    pub(crate) fn split_storages(
        &mut self,
        mutable: &[ComponentTypeId],
        shared: &[ComponentTypeId],
    ) -> (Vec<StorageMut<'_>>, Vec<StorageRef<'_>>) {
        let mut exclusive: Vec<Option<StorageMut<'_>>> = mutable.iter().map(|_| None).collect();
        let mut readonly = Vec::with_capacity(shared.len());
        for (index, storage) in self.storages.iter_mut().enumerate() {
            let id = ComponentTypeId(index as u32);
            if let Some(slot) = mutable.iter().position(|m| *m == id) {
                exclusive[slot] = Some(&mut **storage);
            } else if shared.contains(&id) {
                readonly.push(&**storage);
            }
        }
        (exclusive.into_iter().flatten().collect(), readonly)
    }

    /// Typed read access to the storage of `T`, if it exists.
    pub fn storage<T: Component>(&self) -> Option<&Storage<T>> {
        let id = self.components.lookup::<T>()?;
        self.storages[id.index()].as_any().downcast_ref::<Storage<T>>()
    }

    fn storage_mut<T: Component>(&mut self) -> Option<&mut Storage<T>> {
        let id = self.components.lookup::<T>()?;
        self.storages[id.index()]
            .as_any_mut()
            .downcast_mut::<Storage<T>>()
    }

    fn ensure_valid(&self, entity: Entity) -> Result<(), EcsError> {
        if self.entities.valid(entity) {
            Ok(())
        } else {
            Err(EcsError::InvalidEntity { entity })
        }
    }

    fn missing<T>(entity: Entity) -> EcsError {
        EcsError::MissingComponent {
            entity,
            component: std::any::type_name::<T>(),
        }
    }

    // -- entity lifecycle ---------------------------------------------------

    /// Create a new entity.
    ///
    /// # Panics
    ///
    /// Panics when the identifier space (or the configured `max_entities`)
    /// is exhausted. Use [`try_create`](Self::try_create) to handle that case.
    pub fn create(&mut self) -> Entity {
        match self.try_create() {
            Ok(entity) => entity,
            Err(err) => panic!("{err}"),
        }
    }

    /// Create a new entity, reporting exhaustion as an error.
    pub fn try_create(&mut self) -> Result<Entity, EcsError> {
        let entity = self.entities.create()?;
        tracing::trace!(%entity, "entity created");
        Ok(entity)
    }

    /// Remove every component of `entity` (firing destroy for each) and
    /// recycle its identifier.
    ///
    /// The cascade always runs to the end. If group bookkeeping fails along
    /// the way the entity is still stripped and released, and the first
    /// error is returned.
    pub fn destroy(&mut self, entity: Entity) -> Result<(), EcsError> {
        self.ensure_valid(entity)?;
        let mut failure = None;

        // Listeners may register new types, so the bound is re-read.
        let mut index = 0;
        while index < self.storages.len() {
            if let Err(err) = self.remove_by_id(ComponentTypeId(index as u32), entity) {
                failure.get_or_insert(err);
            }
            index += 1;
        }

        // A destroy listener may already have destroyed the entity.
        if self.entities.valid(entity) {
            for index in 0..self.storages.len() {
                let id = ComponentTypeId(index as u32);
                if self.storages[index].contains(entity) {
                    tracing::warn!(
                        %entity,
                        component = self.components.name(id),
                        "component re-added during destroy, dropping it silently"
                    );
                    if let Err(err) = self.erase_silently(id, entity) {
                        failure.get_or_insert(err);
                    }
                }
            }
            self.entities.destroy(entity)?;
            tracing::trace!(%entity, "entity destroyed");
        }

        match failure {
            None => Ok(()),
            Some(err) => {
                tracing::error!(%entity, error = %err, "group bookkeeping failed while destroying entity");
                Err(err)
            }
        }
    }

    /// Whether `entity` is live with its current version.
    #[inline]
    pub fn valid(&self, entity: Entity) -> bool {
        self.entities.valid(entity)
    }

    /// Number of live entities.
    pub fn alive(&self) -> usize {
        self.entities.alive()
    }

    /// Head of the free list, or [`Entity::NULL`].
    pub fn released(&self) -> Entity {
        self.entities.released()
    }

    /// Current version of `index`, if it was ever issued.
    pub fn version_of(&self, index: u32) -> Option<u32> {
        self.entities.version_of(index)
    }

    /// Call `f` with every live entity, in allocator slot order (ascending
    /// index).
    pub fn each(&self, mut f: impl FnMut(Entity)) {
        for entity in self.entities.iter() {
            f(entity);
        }
    }

    /// Call `f` with every entity that was live when the call started and is
    /// still live when its turn comes. `f` may mutate the registry; entities
    /// it creates are not visited.
    pub fn each_mut(&mut self, mut f: impl FnMut(&mut Registry, Entity)) {
        let snapshot: Vec<Entity> = self.entities.iter().collect();
        for entity in snapshot {
            if self.entities.valid(entity) {
                f(self, entity);
            }
        }
    }

    /// Whether `entity` has no components at all.
    pub fn orphan(&self, entity: Entity) -> bool {
        self.storages.iter().all(|storage| !storage.contains(entity))
    }

    // -- component mutation -------------------------------------------------

    /// Attach `value` to `entity` and fire construct.
    ///
    /// Fails with [`EcsError::DuplicateComponent`] if `entity` already has a
    /// `T`. If a construct listener removes the value again, the call
    /// reports [`EcsError::MissingComponent`].
    pub fn emplace<T: Component>(&mut self, entity: Entity, value: T) -> Result<&mut T, EcsError> {
        self.ensure_valid(entity)?;
        let id = self.assure::<T>();
        self.typed_mut::<T>(id).emplace(entity, value)?;
        self.groups_on_construct(id, entity)?;
        self.fire(SignalKind::Construct, id, entity);
        self.get_mut::<T>(entity)
    }

    /// Overwrite the `T` of `entity` and fire update.
    pub fn replace<T: Component>(&mut self, entity: Entity, value: T) -> Result<&mut T, EcsError> {
        self.ensure_valid(entity)?;
        let id = self
            .components
            .lookup::<T>()
            .ok_or_else(|| Self::missing::<T>(entity))?;
        self.typed_mut::<T>(id).replace(entity, value)?;
        self.fire(SignalKind::Update, id, entity);
        self.get_mut::<T>(entity)
    }

    /// Modify the `T` of `entity` in place and fire update.
    pub fn patch<T, F>(&mut self, entity: Entity, f: F) -> Result<&mut T, EcsError>
    where
        T: Component,
        F: FnOnce(&mut T),
    {
        f(self.get_mut::<T>(entity)?);
        let id = self
            .components
            .lookup::<T>()
            .ok_or_else(|| Self::missing::<T>(entity))?;
        self.fire(SignalKind::Update, id, entity);
        self.get_mut::<T>(entity)
    }

    /// [`replace`](Self::replace) if present, otherwise
    /// [`emplace`](Self::emplace).
    pub fn emplace_or_replace<T: Component>(
        &mut self,
        entity: Entity,
        value: T,
    ) -> Result<&mut T, EcsError> {
        self.ensure_valid(entity)?;
        if self.all_of::<(T,)>(entity) {
            self.replace(entity, value)
        } else {
            self.emplace(entity, value)
        }
    }

    /// The existing `T` of `entity`, or `value` freshly emplaced. An existing
    /// value is neither overwritten nor reported as updated.
    pub fn get_or_emplace<T: Component>(
        &mut self,
        entity: Entity,
        value: T,
    ) -> Result<&mut T, EcsError> {
        self.ensure_valid(entity)?;
        if self.all_of::<(T,)>(entity) {
            self.get_mut::<T>(entity)
        } else {
            self.emplace(entity, value)
        }
    }

    /// Remove the `T` of `entity` if present, firing destroy first. Returns
    /// how many components were removed (0 or 1).
    pub fn remove<T: Component>(&mut self, entity: Entity) -> Result<usize, EcsError> {
        self.ensure_valid(entity)?;
        let Some(id) = self.components.lookup::<T>() else {
            return Ok(0);
        };
        Ok(usize::from(self.remove_by_id(id, entity)?))
    }

    /// Remove the `T` of `entity`, which must be present.
    pub fn erase<T: Component>(&mut self, entity: Entity) -> Result<(), EcsError> {
        self.ensure_valid(entity)?;
        match self.components.lookup::<T>() {
            Some(id) if self.storages[id.index()].contains(entity) => {
                self.remove_by_id(id, entity)?;
                Ok(())
            }
            _ => Err(Self::missing::<T>(entity)),
        }
    }

    /// Remove `T` from every entity, firing destroy for each. Returns the
    /// number removed.
    pub fn clear<T: Component>(&mut self) -> Result<usize, EcsError> {
        let Some(id) = self.components.lookup::<T>() else {
            return Ok(0);
        };
        let mut removed = 0;
        while let Some(entity) = self.storages[id.index()].set().packed().last().copied() {
            self.remove_by_id(id, entity)?;
            removed += 1;
        }
        Ok(removed)
    }

    /// Fire destroy, then drop the component unless a listener already did.
    /// Returns whether the entity had the component.
    fn remove_by_id(&mut self, id: ComponentTypeId, entity: Entity) -> Result<bool, EcsError> {
        if !self.storages[id.index()].contains(entity) {
            return Ok(false);
        }
        self.fire(SignalKind::Destroy, id, entity);
        if self.storages[id.index()].contains(entity) {
            self.erase_silently(id, entity)?;
        }
        Ok(true)
    }

    /// Drop a component while keeping groups partitioned. No signals.
    /// The component is gone even when group bookkeeping reports an error.
    fn erase_silently(&mut self, id: ComponentTypeId, entity: Entity) -> Result<(), EcsError> {
        let before = self.groups_before_erase(id, entity);
        self.storages[id.index()].remove_entity(entity);
        let after = self.groups_after_erase(id, entity);
        before.and(after)
    }

    // -- component access ---------------------------------------------------

    /// The `T` of `entity`.
    pub fn get<T: Component>(&self, entity: Entity) -> Result<&T, EcsError> {
        self.ensure_valid(entity)?;
        self.try_get::<T>(entity)
            .ok_or_else(|| Self::missing::<T>(entity))
    }

    /// The `T` of `entity`, mutably. Does not fire update; use
    /// [`patch`](Self::patch) for that.
    pub fn get_mut<T: Component>(&mut self, entity: Entity) -> Result<&mut T, EcsError> {
        self.ensure_valid(entity)?;
        self.try_get_mut::<T>(entity)
            .ok_or_else(|| Self::missing::<T>(entity))
    }

    /// The `T` of `entity`, or `None` if it has none or is not valid.
    pub fn try_get<T: Component>(&self, entity: Entity) -> Option<&T> {
        self.storage::<T>()?.get(entity)
    }

    /// Mutable variant of [`try_get`](Self::try_get).
    pub fn try_get_mut<T: Component>(&mut self, entity: Entity) -> Option<&mut T> {
        self.storage_mut::<T>()?.get_mut(entity)
    }

    /// Whether `entity` has every type in `S`.
    pub fn all_of<S: ComponentSet>(&self, entity: Entity) -> bool {
        match S::type_ids(&self.components) {
            Some(ids) => ids.iter().all(|id| self.storages[id.index()].contains(entity)),
            None => false,
        }
    }

    /// Whether `entity` has at least one type in `S`.
    pub fn any_of<S: ComponentSet>(&self, entity: Entity) -> bool {
        S::registered_ids(&self.components)
            .iter()
            .any(|id| self.storages[id.index()].contains(entity))
    }

    /// Number of entities with a `T`.
    pub fn count<T: Component>(&self) -> usize {
        self.storage::<T>().map_or(0, Storage::len)
    }

    // -- views and groups ---------------------------------------------------

    /// Read-only view over entities having every type in `I`.
    pub fn view<I: ComponentSet>(&self) -> View<'_, I> {
        View::new(self)
    }

    /// Mutable view over entities having every type in `I`.
    pub fn view_mut<I: ComponentSet>(&mut self) -> ViewMut<'_, I> {
        ViewMut::new(self)
    }

    /// Get or create the group owning `O`, observing `G` and excluding `E`.
    ///
    /// Creating a group partitions the existing data of the owned storages.
    pub fn group<O, G, E>(&mut self) -> Result<Group<'_, O, G, E>, EcsError>
    where
        O: ComponentSet,
        G: ComponentSet,
        E: ComponentSet,
    {
        let owned = O::assure(self);
        let get = G::assure(self);
        let exclude = E::assure(self);
        let index = self.find_or_create_group(owned, get, exclude)?;
        Ok(Group::new(self, index))
    }

    /// Drop the group with this exact signature. Storages keep their current
    /// order. Returns `false` if no such group exists.
    pub fn release_group<O, G, E>(&mut self) -> bool
    where
        O: ComponentSet,
        G: ComponentSet,
        E: ComponentSet,
    {
        let (Some(owned), Some(get), Some(exclude)) = (
            O::type_ids(&self.components),
            G::type_ids(&self.components),
            E::type_ids(&self.components),
        ) else {
            return false;
        };
        self.remove_group(&owned, &get, &exclude)
    }

    // -- signals ------------------------------------------------------------

    /// Listeners fired after a `T` is attached.
    pub fn on_construct<T: Component>(&mut self) -> Sink<'_> {
        let id = self.assure::<T>();
        Sink::new(&mut self.signals, id, SignalKind::Construct)
    }

    /// Listeners fired after a `T` is replaced or patched.
    pub fn on_update<T: Component>(&mut self) -> Sink<'_> {
        let id = self.assure::<T>();
        Sink::new(&mut self.signals, id, SignalKind::Update)
    }

    /// Listeners fired before a `T` is removed.
    pub fn on_destroy<T: Component>(&mut self) -> Sink<'_> {
        let id = self.assure::<T>();
        Sink::new(&mut self.signals, id, SignalKind::Destroy)
    }

    /// Remove a listener by its connection handle.
    pub fn disconnect(&mut self, connection: Connection) -> bool {
        self.signals.disconnect(connection)
    }

    /// Run the listeners of one signal against `entity`.
    fn fire(&mut self, kind: SignalKind, id: ComponentTypeId, entity: Entity) {
        for (connection, listener) in self.signals.listeners(id, kind) {
            if self.signals.is_connected(connection) {
                listener(self, entity);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
