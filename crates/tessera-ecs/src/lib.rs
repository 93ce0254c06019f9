//! Tessera ECS -- sparse-set Entity Component System.
//!
//! Entities are 32-bit generational identifiers (20-bit index, 12-bit
//! version). Each component type lives in its own sparse set: a sparse array
//! indexed by entity index pointing into a packed array of identifiers, kept
//! in lockstep with a packed array of values. Adding and removing a component
//! is O(1) and never touches other types' storage.
//!
//! On top of the storages the [`Registry`](registry::Registry) provides:
//!
//! - **Views**: lazy multi-component iteration driven by the smallest
//!   storage, with optional exclusions.
//! - **Groups**: owning partitions that keep matching entities packed at the
//!   front of every owned storage for predicate-free iteration.
//! - **Signals**: construct/update/destroy listeners per component type.
//!
//! # Quick Start
//!
//! ```
//! use tessera_ecs::prelude::*;
//!
//! #[derive(Debug, Clone, PartialEq)]
//! struct Position { x: f32, y: f32 }
//!
//! #[derive(Debug, Clone, PartialEq)]
//! struct Velocity { dx: f32, dy: f32 }
//!
//! let mut registry = Registry::new();
//! let a = registry.create();
//! let b = registry.create();
//! registry.emplace(a, Position { x: 0.0, y: 0.0 }).unwrap();
//! registry.emplace(a, Velocity { dx: 1.0, dy: 0.0 }).unwrap();
//! registry.emplace(b, Position { x: 5.0, y: 5.0 }).unwrap();
//!
//! registry
//!     .view_mut::<(Position, Velocity)>()
//!     .each(|_, (p, v): (&mut Position, &mut Velocity)| p.x += v.dx);
//!
//! assert_eq!(registry.get::<Position>(a).unwrap(), &Position { x: 1.0, y: 0.0 });
//! assert_eq!(registry.view::<(Position,)>().count(), 2);
//! ```

#![deny(unsafe_code)]

pub mod component;
pub mod entity;
pub mod group;
pub mod query;
pub mod registry;
pub mod signal;
pub mod sparse_set;
pub mod storage;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors produced by ECS operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EcsError {
    /// The identifier is not live (stale version, destroyed or never issued).
    #[error("entity {entity:?} is not valid (destroyed, stale or never created)")]
    InvalidEntity { entity: entity::Entity },

    /// `emplace` on an entity that already has the component.
    #[error("entity {entity:?} already has a component of type {component}")]
    DuplicateComponent {
        entity: entity::Entity,
        component: &'static str,
    },

    /// The entity lacks a component the operation requires.
    #[error("entity {entity:?} has no component of type {component}")]
    MissingComponent {
        entity: entity::Entity,
        component: &'static str,
    },

    /// No more identifiers can be issued.
    #[error("entity identifiers exhausted (limit {limit})")]
    ExhaustedIdentifiers { limit: u32 },

    /// An owned group type is already owned by another group.
    #[error("component type {component} is already owned by another group")]
    ConflictingGroupOwnership { component: &'static str },

    /// A group signature that can never be satisfied or is ambiguous.
    #[error("invalid group: {reason}")]
    InvalidGroup { reason: String },

    /// Raw sparse-set insertion of an index that is already present.
    #[error("entity {entity:?} is already in the set")]
    AlreadyInSet { entity: entity::Entity },

    /// Raw sparse-set access to an identifier that is not present.
    #[error("entity {entity:?} is not in the set")]
    NotInSet { entity: entity::Entity },
}

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::component::{Component, ComponentInfo, ComponentRegistry, ComponentTypeId};
    pub use crate::entity::{Entity, EntityAllocator};
    pub use crate::group::Group;
    pub use crate::query::{ComponentSet, View, ViewIter, ViewMut};
    pub use crate::registry::{Registry, RegistryConfig};
    pub use crate::signal::{Connection, SignalKind, Sink};
    pub use crate::sparse_set::SparseSet;
    pub use crate::storage::{AnyStorage, Storage};
    pub use crate::EcsError;
}

// ---------------------------------------------------------------------------
// Integration Tests
// ---------------------------------------------------------------------------
