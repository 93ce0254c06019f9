//! Entity identifiers and allocation.
//!
//! An [`Entity`] is a 32-bit handle that packs a *version* counter in the
//! high 12 bits and an *index* in the low 20 bits. The version is bumped every
//! time an index is recycled, which allows immediate stale-handle detection.
//!
//! Freed slots are chained into an intrusive free list that lives inside the
//! slot array itself: a free slot stores the index of the next free slot in
//! its index field and keeps its old version until it is reused.

use std::fmt;

use crate::EcsError;

// ---------------------------------------------------------------------------
// Entity
// ---------------------------------------------------------------------------

/// Number of bits used for the index portion of an [`Entity`].
pub const INDEX_BITS: u32 = 20;
/// Number of bits used for the version portion of an [`Entity`].
pub const VERSION_BITS: u32 = 12;
/// Mask for the index portion. An index equal to this value is the null index.
pub const INDEX_MASK: u32 = (1 << INDEX_BITS) - 1;
/// Mask for the version portion. A version equal to this value is the tombstone.
pub const VERSION_MASK: u32 = (1 << VERSION_BITS) - 1;

/// A generational entity identifier.
///
/// Layout: `[version: 12 | index: 20]`
///
/// Equality compares the full 32-bit value. Use [`Entity::is_null`] and
/// [`Entity::is_tombstone`] to test for the reserved values, which match on a
/// single field only.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Entity(u32);

impl Entity {
    /// The reserved "no entity" value. Any identifier whose index is
    /// [`INDEX_MASK`] is null regardless of its version.
    pub const NULL: Entity = Entity(u32::MAX);

    /// The reserved "freed slot" value. Any identifier whose version is
    /// [`VERSION_MASK`] is a tombstone regardless of its index.
    pub const TOMBSTONE: Entity = Entity(u32::MAX);

    /// Construct an `Entity` from an index and version.
    ///
    /// Both parts are truncated to their bit widths.
    #[inline]
    pub const fn new(index: u32, version: u32) -> Self {
        Self((version & VERSION_MASK) << INDEX_BITS | (index & INDEX_MASK))
    }

    /// The index portion (low 20 bits).
    #[inline]
    pub const fn index(self) -> u32 {
        self.0 & INDEX_MASK
    }

    /// The version portion (high 12 bits).
    #[inline]
    pub const fn version(self) -> u32 {
        self.0 >> INDEX_BITS
    }

    /// Raw `u32` representation.
    #[inline]
    pub const fn to_bits(self) -> u32 {
        self.0
    }

    /// Reconstruct from a raw `u32`.
    #[inline]
    pub const fn from_bits(raw: u32) -> Self {
        Self(raw)
    }

    /// Whether the index field holds the null index.
    #[inline]
    pub const fn is_null(self) -> bool {
        self.index() == INDEX_MASK
    }

    /// Whether the version field holds the tombstone version.
    #[inline]
    pub const fn is_tombstone(self) -> bool {
        self.version() == VERSION_MASK
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            write!(f, "Entity(null)")
        } else {
            write!(f, "Entity({}v{})", self.index(), self.version())
        }
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index(), self.version())
    }
}

// ---------------------------------------------------------------------------
// EntityAllocator
// ---------------------------------------------------------------------------

/// Allocates and recycles [`Entity`] identifiers with generational tracking.
///
/// Free indices form a LIFO list threaded through `slots`: the most recently
/// destroyed index is handed out first. A live slot stores exactly the
/// identifier it was issued as, so validity is a single comparison.
#[derive(Debug)]
pub struct EntityAllocator {
    /// One entry per index ever issued.
    slots: Vec<Entity>,
    /// Head of the free list, or [`INDEX_MASK`] when empty.
    free_head: u32,
    /// Number of live identifiers.
    alive: usize,
    /// Exclusive upper bound on issued indices.
    max_entities: u32,
}

impl EntityAllocator {
    /// Create a new, empty allocator that may use the whole index space.
    pub fn new() -> Self {
        Self::with_limits(0, INDEX_MASK)
    }

    /// Create an allocator with a reserve hint and an upper bound on the
    /// number of distinct indices. The bound is clamped to the index space.
    pub fn with_limits(capacity: usize, max_entities: u32) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            free_head: INDEX_MASK,
            alive: 0,
            max_entities: max_entities.min(INDEX_MASK),
        }
    }

    /// Allocate a fresh [`Entity`].
    ///
    /// Reuses the free-list head with its version bumped, or appends a new
    /// index at version 0.
    pub fn create(&mut self) -> Result<Entity, EcsError> {
        let entity = if self.free_head != INDEX_MASK {
            let index = self.free_head;
            let slot = self.slots[index as usize];
            self.free_head = slot.index();
            let entity = Entity::new(index, slot.version() + 1);
            self.slots[index as usize] = entity;
            entity
        } else {
            let index = self.slots.len() as u32;
            if index >= self.max_entities {
                return Err(EcsError::ExhaustedIdentifiers {
                    limit: self.max_entities,
                });
            }
            let entity = Entity::new(index, 0);
            self.slots.push(entity);
            entity
        };
        self.alive += 1;
        Ok(entity)
    }

    /// Release `entity` so its index can be recycled.
    ///
    /// The stored version is left as-is and incremented on the next reuse. A
    /// slot whose next version would collide with the tombstone is retired
    /// for good instead of being put on the free list.
    pub fn destroy(&mut self, entity: Entity) -> Result<(), EcsError> {
        if !self.valid(entity) {
            return Err(EcsError::InvalidEntity { entity });
        }
        let index = entity.index();
        if entity.version() + 1 >= VERSION_MASK {
            tracing::debug!(index, "retiring entity slot after version exhaustion");
            self.slots[index as usize] = Entity::TOMBSTONE;
        } else {
            self.slots[index as usize] = Entity::new(self.free_head, entity.version());
            self.free_head = index;
        }
        self.alive -= 1;
        Ok(())
    }

    /// Returns `true` if `entity` is live and its version is current.
    #[inline]
    pub fn valid(&self, entity: Entity) -> bool {
        self.slots
            .get(entity.index() as usize)
            .is_some_and(|slot| *slot == entity)
    }

    /// The current version stored for `index`, if the index was ever issued
    /// and is not retired.
    pub fn version_of(&self, index: u32) -> Option<u32> {
        self.slots
            .get(index as usize)
            .filter(|slot| !slot.is_tombstone())
            .map(|slot| slot.version())
    }

    /// Number of live identifiers.
    pub fn alive(&self) -> usize {
        self.alive
    }

    /// Number of indices ever issued (live, free or retired).
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// The free-list head as an identifier carrying the version it will be
    /// reissued from, or [`Entity::NULL`] when nothing is free.
    pub fn released(&self) -> Entity {
        if self.free_head == INDEX_MASK {
            Entity::NULL
        } else {
            Entity::new(
                self.free_head,
                self.slots[self.free_head as usize].version(),
            )
        }
    }

    /// Raw slot array, for diagnostics only.
    pub fn slots(&self) -> &[Entity] {
        &self.slots
    }

    /// Live identifiers in ascending index order.
    pub fn iter(&self) -> impl Iterator<Item = Entity> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter(|(index, slot)| slot.index() as usize == *index)
            .map(|(_, slot)| *slot)
    }
}

impl Default for EntityAllocator {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
