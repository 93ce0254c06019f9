//! Sparse set of entity identifiers.
//!
//! A [`SparseSet`] keeps two arrays:
//!
//! - `sparse`, indexed by [`Entity::index`], holding either
//!   [`Entity::TOMBSTONE`] (absent) or `Entity::new(position, version)`;
//! - `packed`, a gap-free array of the present identifiers.
//!
//! Insertion appends to `packed`; removal moves the last identifier into the
//! hole (swap-remove), so both are O(1) but removal reorders iteration.
//!
//! Invariant: for every present `id`,
//! `packed[sparse[id.index()].index()] == id`.

use crate::entity::Entity;
use crate::EcsError;

/// Presence/index structure mapping identifiers to dense positions.
#[derive(Debug, Clone, Default)]
pub struct SparseSet {
    sparse: Vec<Entity>,
    packed: Vec<Entity>,
}

impl SparseSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty set with room for `capacity` identifiers in both
    /// arrays.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            sparse: Vec::with_capacity(capacity),
            packed: Vec::with_capacity(capacity),
        }
    }

    /// Reserve room for `additional` more packed identifiers.
    pub fn reserve(&mut self, additional: usize) {
        self.packed.reserve(additional);
    }

    /// Number of identifiers in the set.
    #[inline]
    pub fn len(&self) -> usize {
        self.packed.len()
    }

    /// Whether the set is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.packed.is_empty()
    }

    /// Packed position of `entity`, if present with a matching version.
    #[inline]
    pub fn index(&self, entity: Entity) -> Option<usize> {
        let slot = *self.sparse.get(entity.index() as usize)?;
        if slot.is_tombstone() || slot.version() != entity.version() {
            return None;
        }
        Some(slot.index() as usize)
    }

    /// Whether `entity` (index and version) is in the set.
    #[inline]
    pub fn contains(&self, entity: Entity) -> bool {
        self.index(entity).is_some()
    }

    /// The identifier stored at packed position `pos`.
    #[inline]
    pub fn at(&self, pos: usize) -> Option<Entity> {
        self.packed.get(pos).copied()
    }

    /// Append `entity` and return its packed position.
    ///
    /// Fails if any version of the same index is already present, since a
    /// sparse slot can only point at one packed position.
    pub fn insert(&mut self, entity: Entity) -> Result<usize, EcsError> {
        if entity.is_null() || entity.is_tombstone() {
            return Err(EcsError::InvalidEntity { entity });
        }
        let idx = entity.index() as usize;
        if idx >= self.sparse.len() {
            self.sparse.resize(idx + 1, Entity::TOMBSTONE);
        } else if !self.sparse[idx].is_tombstone() {
            return Err(EcsError::AlreadyInSet { entity });
        }
        let pos = self.packed.len();
        self.sparse[idx] = Entity::new(pos as u32, entity.version());
        self.packed.push(entity);
        Ok(pos)
    }

    /// Swap-remove `entity` and return the position it vacated.
    ///
    /// The identifier that was last in `packed` now lives at that position
    /// (unless `entity` was itself the last one).
    pub fn remove(&mut self, entity: Entity) -> Result<usize, EcsError> {
        let pos = self
            .index(entity)
            .ok_or(EcsError::NotInSet { entity })?;
        self.packed.swap_remove(pos);
        if let Some(&moved) = self.packed.get(pos) {
            self.sparse[moved.index() as usize] = Entity::new(pos as u32, moved.version());
        }
        self.sparse[entity.index() as usize] = Entity::TOMBSTONE;
        Ok(pos)
    }

    /// Exchange the packed positions of two present identifiers.
    ///
    /// Returns the pair of positions `(a_pos, b_pos)` as they were before the
    /// swap.
    pub fn swap_elements(&mut self, a: Entity, b: Entity) -> Result<(usize, usize), EcsError> {
        let a_pos = self.index(a).ok_or(EcsError::NotInSet { entity: a })?;
        let b_pos = self.index(b).ok_or(EcsError::NotInSet { entity: b })?;
        self.packed.swap(a_pos, b_pos);
        self.sparse[a.index() as usize] = Entity::new(b_pos as u32, a.version());
        self.sparse[b.index() as usize] = Entity::new(a_pos as u32, b.version());
        Ok((a_pos, b_pos))
    }

    /// Remove every identifier.
    pub fn clear(&mut self) {
        for entity in self.packed.drain(..) {
            self.sparse[entity.index() as usize] = Entity::TOMBSTONE;
        }
    }

    /// Identifiers in packed order (front to back).
    pub fn iter(&self) -> std::iter::Copied<std::slice::Iter<'_, Entity>> {
        self.packed.iter().copied()
    }

    /// The packed array.
    #[inline]
    pub fn packed(&self) -> &[Entity] {
        &self.packed
    }

    /// The raw sparse array, for diagnostics only.
    pub fn sparse(&self) -> &[Entity] {
        &self.sparse
    }
}

impl<'a> IntoIterator for &'a SparseSet {
    type Item = Entity;
    type IntoIter = std::iter::Copied<std::slice::Iter<'a, Entity>>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
