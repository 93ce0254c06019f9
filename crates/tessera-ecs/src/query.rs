//! Views: lazy iteration over entities that have a set of components.
//!
//! A [`View`] names a tuple of included component types and, optionally, a
//! tuple of excluded ones. Each traversal picks the smallest included storage
//! as the *driver*, walks its packed identifiers front to back and keeps the
//! entities that are present in every other included storage and absent from
//! every excluded one. Nothing is cached between traversals.
//!
//! ## Borrowing
//!
//! [`Registry::view`] takes `&self` and hands out shared component
//! references. [`Registry::view_mut`] takes `&mut self`; its closure receives
//! `&mut` references but never the registry, so no storage can be
//! restructured (and no packed slot relocated) while a traversal is running.
//!
//! The tuple machinery lives in [`ComponentSet`], implemented for `()` and
//! for tuples of up to eight component types.

use std::marker::PhantomData;

use crate::component::{Component, ComponentRegistry, ComponentTypeId};
use crate::entity::Entity;
use crate::registry::Registry;
use crate::sparse_set::SparseSet;
use crate::storage::{AnyStorage, Storage};

/// Shared reference to a type-erased storage.
pub type StorageRef<'a> = &'a (dyn AnyStorage + 'static);
/// Exclusive reference to a type-erased storage.
pub type StorageMut<'a> = &'a mut (dyn AnyStorage + 'static);

// ---------------------------------------------------------------------------
// ComponentSet -- a tuple of component types
// ---------------------------------------------------------------------------

/// A tuple of component types: `()`, `(A,)`, `(A, B)`, ...
///
/// Used for view includes and excludes, group signatures and
/// [`Registry::all_of`] / [`Registry::any_of`].
pub trait ComponentSet: 'static {
    /// `(&A, &B, ...)`
    type Refs<'a>;
    /// `(&mut A, &mut B, ...)`
    type Muts<'a>;
    /// `(&Storage<A>, &Storage<B>, ...)`
    type Storages<'a>;
    /// `(&mut Storage<A>, &mut Storage<B>, ...)`
    type StoragesMut<'a>;

    /// Number of component types in the tuple.
    const COUNT: usize;

    /// Ids of every type, or `None` if any of them was never stored.
    fn type_ids(components: &ComponentRegistry) -> Option<Vec<ComponentTypeId>>;

    /// Ids of the types that have been stored at least once.
    fn registered_ids(components: &ComponentRegistry) -> Vec<ComponentTypeId>;

    /// `std::any::type_name` of every type.
    fn type_names() -> Vec<&'static str>;

    /// Register every type and create its storage if needed.
    fn assure(registry: &mut Registry) -> Vec<ComponentTypeId>;

    /// Take one storage per type from `storages` and downcast it.
    fn downcast<'a, I>(storages: &mut I) -> Option<Self::Storages<'a>>
    where
        I: Iterator<Item = StorageRef<'a>>;

    /// Take one storage per type from `storages` and downcast it mutably.
    fn downcast_mut<'a, I>(storages: &mut I) -> Option<Self::StoragesMut<'a>>
    where
        I: Iterator<Item = StorageMut<'a>>;

    /// The `k`-th storage's identifier set.
    fn set_at<'s>(storages: &'s Self::Storages<'_>, k: usize) -> Option<&'s SparseSet>;

    /// The `k`-th storage's identifier set, from exclusive storages.
    fn set_at_mut<'s>(storages: &'s Self::StoragesMut<'_>, k: usize) -> Option<&'s SparseSet>;

    /// Whether every storage contains `entity`.
    fn contains(storages: &Self::Storages<'_>, entity: Entity) -> bool;

    /// Shared references to `entity`'s components, if it has all of them.
    fn get<'a>(storages: &Self::Storages<'a>, entity: Entity) -> Option<Self::Refs<'a>>;

    /// Exclusive references to `entity`'s components, if it has all of them.
    fn get_mut<'s>(storages: &'s mut Self::StoragesMut<'_>, entity: Entity)
        -> Option<Self::Muts<'s>>;

    /// Shared references to the values at packed position `pos` of every
    /// storage.
    fn at<'a>(storages: &Self::Storages<'a>, pos: usize) -> Option<Self::Refs<'a>>;

    /// Exclusive references to the values at packed position `pos` of every
    /// storage.
    fn at_mut<'s>(storages: &'s mut Self::StoragesMut<'_>, pos: usize) -> Option<Self::Muts<'s>>;
}

impl ComponentSet for () {
    type Refs<'a> = ();
    type Muts<'a> = ();
    type Storages<'a> = ();
    type StoragesMut<'a> = ();

    const COUNT: usize = 0;

    fn type_ids(_: &ComponentRegistry) -> Option<Vec<ComponentTypeId>> {
        Some(Vec::new())
    }

    fn registered_ids(_: &ComponentRegistry) -> Vec<ComponentTypeId> {
        Vec::new()
    }

    fn type_names() -> Vec<&'static str> {
        Vec::new()
    }

    fn assure(_: &mut Registry) -> Vec<ComponentTypeId> {
        Vec::new()
    }

    fn downcast<'a, I>(_: &mut I) -> Option<Self::Storages<'a>>
    where
        I: Iterator<Item = StorageRef<'a>>,
    {
        Some(())
    }

    fn downcast_mut<'a, I>(_: &mut I) -> Option<Self::StoragesMut<'a>>
    where
        I: Iterator<Item = StorageMut<'a>>,
    {
        Some(())
    }

    fn set_at<'s>(_: &'s Self::Storages<'_>, _: usize) -> Option<&'s SparseSet> {
        None
    }

    fn set_at_mut<'s>(_: &'s Self::StoragesMut<'_>, _: usize) -> Option<&'s SparseSet> {
        None
    }

    fn contains(_: &Self::Storages<'_>, _: Entity) -> bool {
        true
    }

    fn get<'a>(_: &Self::Storages<'a>, _: Entity) -> Option<Self::Refs<'a>> {
        Some(())
    }

    fn get_mut<'s>(_: &'s mut Self::StoragesMut<'_>, _: Entity) -> Option<Self::Muts<'s>> {
        Some(())
    }

    fn at<'a>(_: &Self::Storages<'a>, _: usize) -> Option<Self::Refs<'a>> {
        Some(())
    }

    fn at_mut<'s>(_: &'s mut Self::StoragesMut<'_>, _: usize) -> Option<Self::Muts<'s>> {
        Some(())
    }
}

macro_rules! impl_component_set {
    ($($name:ident $idx:tt),+) => {
        impl<$($name: Component),+> ComponentSet for ($($name,)+) {
            type Refs<'a> = ($(&'a $name,)+);
            type Muts<'a> = ($(&'a mut $name,)+);
            type Storages<'a> = ($(&'a Storage<$name>,)+);
            type StoragesMut<'a> = ($(&'a mut Storage<$name>,)+);

            const COUNT: usize = [$($idx),+].len();

            fn type_ids(components: &ComponentRegistry) -> Option<Vec<ComponentTypeId>> {
                Some(vec![$(components.lookup::<$name>()?),+])
            }

            fn registered_ids(components: &ComponentRegistry) -> Vec<ComponentTypeId> {
                [$(components.lookup::<$name>()),+].into_iter().flatten().collect()
            }

            fn type_names() -> Vec<&'static str> {
                vec![$(std::any::type_name::<$name>()),+]
            }

            fn assure(registry: &mut Registry) -> Vec<ComponentTypeId> {
                vec![$(registry.assure::<$name>()),+]
            }

            fn downcast<'a, I>(storages: &mut I) -> Option<Self::Storages<'a>>
            where
                I: Iterator<Item = StorageRef<'a>>,
            {
                Some(($(storages.next()?.as_any().downcast_ref::<Storage<$name>>()?,)+))
            }

            fn downcast_mut<'a, I>(storages: &mut I) -> Option<Self::StoragesMut<'a>>
            where
                I: Iterator<Item = StorageMut<'a>>,
            {
                Some(($(storages.next()?.as_any_mut().downcast_mut::<Storage<$name>>()?,)+))
            }

            fn set_at<'s>(storages: &'s Self::Storages<'_>, k: usize) -> Option<&'s SparseSet> {
                match k {
                    $($idx => Some(storages.$idx.set()),)+
                    _ => None,
                }
            }

            fn set_at_mut<'s>(storages: &'s Self::StoragesMut<'_>, k: usize) -> Option<&'s SparseSet> {
                match k {
                    $($idx => Some(storages.$idx.set()),)+
                    _ => None,
                }
            }

            #[inline]
            fn contains(storages: &Self::Storages<'_>, entity: Entity) -> bool {
                $(storages.$idx.contains(entity))&&+
            }

            #[inline]
            fn get<'a>(storages: &Self::Storages<'a>, entity: Entity) -> Option<Self::Refs<'a>> {
                Some(($(storages.$idx.get(entity)?,)+))
            }

            #[inline]
            fn get_mut<'s>(
                storages: &'s mut Self::StoragesMut<'_>,
                entity: Entity,
            ) -> Option<Self::Muts<'s>> {
                Some(($(storages.$idx.get_mut(entity)?,)+))
            }

            #[inline]
            fn at<'a>(storages: &Self::Storages<'a>, pos: usize) -> Option<Self::Refs<'a>> {
                Some(($(storages.$idx.values().get(pos)?,)+))
            }

            #[inline]
            fn at_mut<'s>(
                storages: &'s mut Self::StoragesMut<'_>,
                pos: usize,
            ) -> Option<Self::Muts<'s>> {
                Some(($(storages.$idx.values_mut().get_mut(pos)?,)+))
            }
        }
    };
}

impl_component_set!(A 0);
impl_component_set!(A 0, B 1);
impl_component_set!(A 0, B 1, C 2);
impl_component_set!(A 0, B 1, C 2, D 3);
impl_component_set!(A 0, B 1, C 2, D 3, E 4);
impl_component_set!(A 0, B 1, C 2, D 3, E 4, F 5);
impl_component_set!(A 0, B 1, C 2, D 3, E 4, F 5, G 6);
impl_component_set!(A 0, B 1, C 2, D 3, E 4, F 5, G 6, H 7);

/// Panic if a component type appears twice among the mutably borrowed types
/// or both as borrowed and excluded.
pub(crate) fn validate_no_access_conflicts(
    borrowed: &[ComponentTypeId],
    excluded: &[ComponentTypeId],
    components: &ComponentRegistry,
) {
    for (i, id) in borrowed.iter().enumerate() {
        if borrowed[..i].contains(id) {
            panic!(
                "component type {} is borrowed mutably more than once",
                components.name(*id)
            );
        }
        if excluded.contains(id) {
            panic!(
                "component type {} is both included and excluded",
                components.name(*id)
            );
        }
    }
}

/// Index of the shortest storage among `count` candidates.
fn smallest<'s>(count: usize, set_at: impl Fn(usize) -> Option<&'s SparseSet>) -> Option<usize> {
    (0..count)
        .filter_map(|k| set_at(k).map(|set| (k, set.len())))
        .min_by_key(|&(_, len)| len)
        .map(|(k, _)| k)
}

// ---------------------------------------------------------------------------
// View (shared)
// ---------------------------------------------------------------------------

/// Read-only view over entities having every component in `I` and none in
/// `E`.
///
/// ```
/// use tessera_ecs::prelude::*;
///
/// let mut registry = Registry::new();
/// let a = registry.create();
/// let b = registry.create();
/// registry.emplace(a, 1u32).unwrap();
/// registry.emplace(b, 2u32).unwrap();
/// registry.emplace(b, 'x').unwrap();
///
/// let only_numbers: Vec<Entity> = registry.view::<(u32,)>().exclude::<(char,)>().iter().collect();
/// assert_eq!(only_numbers, vec![a]);
/// ```
pub struct View<'r, I: ComponentSet, E: ComponentSet = ()> {
    registry: &'r Registry,
    storages: Option<I::Storages<'r>>,
    excluded: Vec<StorageRef<'r>>,
    _exclude: PhantomData<fn() -> E>,
}

impl<'r, I: ComponentSet> View<'r, I, ()> {
    pub(crate) fn new(registry: &'r Registry) -> Self {
        let storages = I::type_ids(&registry.components).and_then(|ids| {
            let mut erased = ids.into_iter().map(|id| registry.storage_dyn(id));
            I::downcast(&mut erased)
        });
        Self {
            registry,
            storages,
            excluded: Vec::new(),
            _exclude: PhantomData,
        }
    }
}

impl<'r, I: ComponentSet, E: ComponentSet> View<'r, I, E> {
    /// Replace the exclusion list with the types in `X`.
    pub fn exclude<X: ComponentSet>(self) -> View<'r, I, X> {
        let registry = self.registry;
        let excluded = X::registered_ids(&registry.components)
            .into_iter()
            .map(|id| registry.storage_dyn(id))
            .collect();
        View {
            registry,
            storages: self.storages,
            excluded,
            _exclude: PhantomData,
        }
    }

    fn driver(&self) -> Option<&SparseSet> {
        let storages = self.storages.as_ref()?;
        let k = smallest(I::COUNT, |k| I::set_at(storages, k))?;
        I::set_at(storages, k)
    }

    #[inline]
    fn is_excluded(&self, entity: Entity) -> bool {
        self.excluded.iter().any(|storage| storage.contains(entity))
    }

    /// Upper bound on the number of matches: the driver's length.
    pub fn size_hint(&self) -> usize {
        self.driver().map_or(0, SparseSet::len)
    }

    /// Whether `entity` satisfies the view's predicate.
    pub fn contains(&self, entity: Entity) -> bool {
        I::COUNT > 0
            && self
                .storages
                .as_ref()
                .is_some_and(|storages| I::contains(storages, entity))
            && !self.is_excluded(entity)
    }

    /// The included components of `entity`, if it satisfies the predicate.
    pub fn get(&self, entity: Entity) -> Option<I::Refs<'r>> {
        if I::COUNT == 0 || self.is_excluded(entity) {
            return None;
        }
        I::get(self.storages.as_ref()?, entity)
    }

    /// Matching entities in the driver's packed order.
    pub fn iter(&self) -> ViewIter<'_, 'r, I, E> {
        let packed: &[Entity] = self.driver().map_or(&[], SparseSet::packed);
        ViewIter {
            view: self,
            packed: packed.iter(),
        }
    }

    /// Number of matching entities. Walks the driver.
    pub fn count(&self) -> usize {
        self.iter().count()
    }

    /// Call `f` with every matching entity and its included components.
    pub fn each<F>(&self, mut f: F)
    where
        F: FnMut(Entity, I::Refs<'r>),
    {
        let (Some(storages), Some(driver)) = (self.storages.as_ref(), self.driver()) else {
            return;
        };
        for &entity in driver.packed() {
            if self.is_excluded(entity) {
                continue;
            }
            if let Some(refs) = I::get(storages, entity) {
                f(entity, refs);
            }
        }
    }
}

/// Iterator over the entities of a [`View`].
pub struct ViewIter<'v, 'r, I: ComponentSet, E: ComponentSet> {
    view: &'v View<'r, I, E>,
    packed: std::slice::Iter<'v, Entity>,
}

impl<I: ComponentSet, E: ComponentSet> Iterator for ViewIter<'_, '_, I, E> {
    type Item = Entity;

    fn next(&mut self) -> Option<Entity> {
        let view = self.view;
        self.packed.by_ref().copied().find(|&entity| view.contains(entity))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, self.packed.size_hint().1)
    }
}

// ---------------------------------------------------------------------------
// ViewMut (exclusive)
// ---------------------------------------------------------------------------

/// Mutable view over entities having every component in `I` and none in
/// `E`.
///
/// # Panics
///
/// [`each`](Self::each) panics if a type is listed twice in `I`, or in both
/// `I` and `E`.
pub struct ViewMut<'r, I: ComponentSet, E: ComponentSet = ()> {
    registry: &'r mut Registry,
    _marker: PhantomData<fn() -> (I, E)>,
}

impl<'r, I: ComponentSet> ViewMut<'r, I, ()> {
    pub(crate) fn new(registry: &'r mut Registry) -> Self {
        Self {
            registry,
            _marker: PhantomData,
        }
    }
}

impl<'r, I: ComponentSet, E: ComponentSet> ViewMut<'r, I, E> {
    /// Replace the exclusion list with the types in `X`.
    pub fn exclude<X: ComponentSet>(self) -> ViewMut<'r, I, X> {
        ViewMut {
            registry: self.registry,
            _marker: PhantomData,
        }
    }

    /// Call `f` with every matching entity and mutable references to its
    /// included components, in the driver's packed order.
    pub fn each<F>(&mut self, mut f: F)
    where
        F: for<'x> FnMut(Entity, I::Muts<'x>),
    {
        let registry = &mut *self.registry;
        let Some(include) = I::type_ids(&registry.components) else {
            return;
        };
        let exclude = E::registered_ids(&registry.components);
        validate_no_access_conflicts(&include, &exclude, &registry.components);

        let (included, excluded) = registry.split_storages(&include, &exclude);
        let mut included = included.into_iter();
        let Some(mut storages) = I::downcast_mut(&mut included) else {
            return;
        };
        let Some(k) = smallest(I::COUNT, |k| I::set_at_mut(&storages, k)) else {
            return;
        };
        let len = I::set_at_mut(&storages, k).map_or(0, SparseSet::len);

        for pos in 0..len {
            let Some(entity) = I::set_at_mut(&storages, k).and_then(|set| set.at(pos)) else {
                break;
            };
            if excluded.iter().any(|storage| storage.contains(entity)) {
                continue;
            }
            if let Some(items) = I::get_mut(&mut storages, entity) {
                f(entity, items);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
