//! Typed component storage on top of [`SparseSet`].
//!
//! A [`Storage<T>`] pairs a sparse set of identifiers with a `Vec<T>` that is
//! kept positionally aligned with the packed identifiers: `values[i]` belongs
//! to `packed()[i]`. Every structural operation on the set is mirrored on the
//! values so the two arrays always have the same length and order.
//!
//! [`AnyStorage`] is the type-erased face of a storage. The registry keeps
//! one boxed `AnyStorage` per component type and downcasts when it needs the
//! typed API.

use std::any::Any;

use crate::component::Component;
use crate::entity::Entity;
use crate::sparse_set::SparseSet;
use crate::EcsError;

// ---------------------------------------------------------------------------
// Storage
// ---------------------------------------------------------------------------

/// Packed storage for all values of one component type.
#[derive(Debug, Clone)]
pub struct Storage<T> {
    set: SparseSet,
    values: Vec<T>,
}

impl<T: Component> Storage<T> {
    /// Create an empty storage.
    pub fn new() -> Self {
        Self {
            set: SparseSet::new(),
            values: Vec::new(),
        }
    }

    /// Create an empty storage with room for `capacity` components.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            set: SparseSet::with_capacity(capacity),
            values: Vec::with_capacity(capacity),
        }
    }

    /// Store `value` for `entity`.
    pub fn emplace(&mut self, entity: Entity, value: T) -> Result<&mut T, EcsError> {
        let pos = self.set.insert(entity).map_err(|err| match err {
            EcsError::AlreadyInSet { entity } => EcsError::DuplicateComponent {
                entity,
                component: std::any::type_name::<T>(),
            },
            other => other,
        })?;
        self.values.push(value);
        Ok(&mut self.values[pos])
    }

    /// Overwrite the value of a present entity, returning the old one.
    pub fn replace(&mut self, entity: Entity, value: T) -> Result<T, EcsError> {
        let slot = self.get_mut(entity).ok_or(EcsError::MissingComponent {
            entity,
            component: std::any::type_name::<T>(),
        })?;
        Ok(std::mem::replace(slot, value))
    }

    /// Remove and return the value for `entity`.
    ///
    /// The last value moves into the vacated slot.
    pub fn remove(&mut self, entity: Entity) -> Option<T> {
        let pos = self.set.remove(entity).ok()?;
        Some(self.values.swap_remove(pos))
    }

    /// Shared access to the value for `entity`.
    #[inline]
    pub fn get(&self, entity: Entity) -> Option<&T> {
        self.set.index(entity).map(|pos| &self.values[pos])
    }

    /// Exclusive access to the value for `entity`.
    #[inline]
    pub fn get_mut(&mut self, entity: Entity) -> Option<&mut T> {
        self.set.index(entity).map(|pos| &mut self.values[pos])
    }

    /// Exchange the positions of two present entities, values included.
    pub fn swap_elements(&mut self, a: Entity, b: Entity) -> Result<(), EcsError> {
        let (a_pos, b_pos) = self.set.swap_elements(a, b)?;
        self.values.swap(a_pos, b_pos);
        Ok(())
    }

    /// Whether `entity` has a value here.
    #[inline]
    pub fn contains(&self, entity: Entity) -> bool {
        self.set.contains(entity)
    }

    /// Number of stored values.
    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the storage is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// The underlying identifier set.
    #[inline]
    pub fn set(&self) -> &SparseSet {
        &self.set
    }

    /// Identifiers in packed order.
    #[inline]
    pub fn packed(&self) -> &[Entity] {
        self.set.packed()
    }

    /// Values in packed order.
    #[inline]
    pub fn values(&self) -> &[T] {
        &self.values
    }

    /// Values in packed order, mutably. The layout itself cannot change
    /// through this slice.
    #[inline]
    pub fn values_mut(&mut self) -> &mut [T] {
        &mut self.values
    }

    /// `(entity, &value)` pairs in packed order.
    pub fn iter(&self) -> impl Iterator<Item = (Entity, &T)> + '_ {
        self.set.iter().zip(self.values.iter())
    }

    /// `(entity, &mut value)` pairs in packed order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (Entity, &mut T)> + '_ {
        self.set.iter().zip(self.values.iter_mut())
    }
}

impl<T: Component> Default for Storage<T> {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// AnyStorage -- type-erased capability interface
// ---------------------------------------------------------------------------

/// Operations the registry needs on a storage without knowing its type.
pub trait AnyStorage: Any {
    /// Upcast for downcasting to `Storage<T>`.
    fn as_any(&self) -> &dyn Any;
    /// Mutable upcast for downcasting to `Storage<T>`.
    fn as_any_mut(&mut self) -> &mut dyn Any;
    /// The identifier set.
    fn set(&self) -> &SparseSet;
    /// Whether `entity` has a value here.
    fn contains(&self, entity: Entity) -> bool;
    /// Number of stored values.
    fn len(&self) -> usize;
    /// Whether the storage is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
    /// Drop the value for `entity`. Returns `false` if it was absent.
    fn remove_entity(&mut self, entity: Entity) -> bool;
    /// Exchange two present entities' positions.
    fn swap_entities(&mut self, a: Entity, b: Entity) -> Result<(), EcsError>;
    /// `std::any::type_name` of the component type.
    fn component_name(&self) -> &'static str;
}

impl<T: Component> AnyStorage for Storage<T> {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn set(&self) -> &SparseSet {
        &self.set
    }

    fn contains(&self, entity: Entity) -> bool {
        self.set.contains(entity)
    }

    fn len(&self) -> usize {
        self.values.len()
    }

    fn remove_entity(&mut self, entity: Entity) -> bool {
        self.remove(entity).is_some()
    }

    fn swap_entities(&mut self, a: Entity, b: Entity) -> Result<(), EcsError> {
        self.swap_elements(a, b)
    }

    fn component_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
