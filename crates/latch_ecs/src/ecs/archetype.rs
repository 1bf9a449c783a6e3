// archetype.rs - Archetype identification and chunked row storage
//
// An archetype is a unique set of component and tag ids. Every entity with
// exactly that set lives in one of the archetype's chunks. Rows are numbered
// across the whole archetype: row = chunk_index * capacity + slot.

use crate::ecs::storage::{Chunk, ChunkError, ChunkLayout};
use crate::ecs::{ArchetypeCreationContext, ComponentId, Entity, TagId};
use crate::EcsSettings;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Sorted, de-duplicated component ids and tag ids.
///
/// The derived `Hash` mixes the length-prefixed component list and then the
/// tag list in sequence, so component and tag ids never cancel each other.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Signature {
    components: Vec<ComponentId>,
    tags: Vec<TagId>,
}

impl Signature {
    /// Build a signature. The input will be sorted and deduplicated.
    pub fn new(mut components: Vec<ComponentId>, mut tags: Vec<TagId>) -> Self {
        components.sort_unstable();
        components.dedup();
        tags.sort_unstable();
        tags.dedup();
        Self { components, tags }
    }

    #[inline]
    pub fn components(&self) -> &[ComponentId] {
        &self.components
    }

    #[inline]
    pub fn tags(&self) -> &[TagId] {
        &self.tags
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.components.is_empty() && self.tags.is_empty()
    }

    #[inline]
    pub fn contains_component(&self, id: ComponentId) -> bool {
        self.components.binary_search(&id).is_ok()
    }

    #[inline]
    pub fn contains_tag(&self, id: TagId) -> bool {
        self.tags.binary_search(&id).is_ok()
    }

    /// Sorted-set union with extra components and tags.
    pub fn merged(&self, components: &[ComponentId], tags: &[TagId]) -> Self {
        Self::new(
            self.components.iter().chain(components).copied().collect(),
            self.tags.iter().chain(tags).copied().collect(),
        )
    }

    /// Sorted-set difference.
    pub fn reduced(&self, components: &[ComponentId], tags: &[TagId]) -> Self {
        Self {
            components: self
                .components
                .iter()
                .copied()
                .filter(|id| !components.contains(id))
                .collect(),
            tags: self
                .tags
                .iter()
                .copied()
                .filter(|id| !tags.contains(id))
                .collect(),
        }
    }

    /// True when every required id is present.
    pub fn includes(&self, required_components: &[ComponentId], required_tags: &[TagId]) -> bool {
        includes_sorted(&self.components, required_components)
            && includes_sorted(&self.tags, required_tags)
    }

    /// Stable 64-bit digest, used to identify archetypes in logs.
    pub fn hash_key(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.hash(&mut hasher);
        hasher.finish()
    }
}

/// `haystack` is sorted; `needles` may be in any order.
fn includes_sorted(haystack: &[u32], needles: &[u32]) -> bool {
    if needles.windows(2).all(|pair| pair[0] <= pair[1]) {
        let mut rest = haystack;
        for needle in needles {
            match rest.binary_search(needle) {
                Ok(index) => rest = &rest[index..],
                Err(_) => return false,
            }
        }
        true
    } else {
        needles.iter().all(|needle| haystack.binary_search(needle).is_ok())
    }
}

/// Index of an archetype inside its `EntityManager`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ArchetypeHandle(u32);

impl ArchetypeHandle {
    pub(crate) fn new(index: u32) -> Self {
        Self(index)
    }

    /// Return the raw index backing this handle.
    #[inline]
    pub fn index(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ArchetypeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Chunked storage for every entity sharing one signature.
pub struct Archetype {
    handle: ArchetypeHandle,
    signature: Signature,
    layout: Arc<ChunkLayout>,
    chunks: Vec<Chunk>,
    free_rows: Vec<u32>,
    entity_rows: HashMap<Entity, u32>,
}

impl Archetype {
    pub fn new(
        handle: ArchetypeHandle,
        context: &ArchetypeCreationContext,
        settings: &EcsSettings,
    ) -> Self {
        let layout = ChunkLayout::new(context.components(), settings);
        if layout.arena_bytes() > settings.chunk_size_bytes {
            tracing::warn!(
                archetype = %handle,
                row_size = layout.row_size(),
                chunk_size = settings.chunk_size_bytes,
                "row does not fit the chunk budget; chunks hold a single row"
            );
        }
        Self {
            handle,
            signature: context.signature(),
            layout: Arc::new(layout),
            chunks: Vec::new(),
            free_rows: Vec::new(),
            entity_rows: HashMap::new(),
        }
    }

    #[inline]
    pub fn handle(&self) -> ArchetypeHandle {
        self.handle
    }

    #[inline]
    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    #[inline]
    pub fn layout(&self) -> &ChunkLayout {
        &self.layout
    }

    #[inline]
    pub fn component_ids(&self) -> &[ComponentId] {
        self.signature.components()
    }

    #[inline]
    pub fn tag_ids(&self) -> &[TagId] {
        self.signature.tags()
    }

    #[inline]
    pub fn has_component(&self, id: ComponentId) -> bool {
        self.signature.contains_component(id)
    }

    #[inline]
    pub fn has_tag(&self, id: TagId) -> bool {
        self.signature.contains_tag(id)
    }

    /// Rows per chunk, uniform across the archetype.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.layout.capacity()
    }

    #[inline]
    pub fn row_size(&self) -> usize {
        self.layout.row_size()
    }

    /// Number of live entities.
    #[inline]
    pub fn len(&self) -> usize {
        self.entity_rows.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entity_rows.is_empty()
    }

    #[inline]
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    #[inline]
    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    #[inline]
    pub fn chunk(&self, index: usize) -> Option<&Chunk> {
        self.chunks.get(index)
    }

    /// Live rows in chunk `chunk_index`, 0 when out of range.
    pub fn entities_count_per_chunk(&self, chunk_index: usize) -> usize {
        self.chunks.get(chunk_index).map_or(0, Chunk::len)
    }

    #[inline]
    pub fn free_row_count(&self) -> usize {
        self.free_rows.len()
    }

    pub fn entities(&self) -> impl Iterator<Item = Entity> + '_ {
        self.entity_rows.keys().copied()
    }

    #[inline]
    pub fn row_of(&self, entity: Entity) -> Option<u32> {
        self.entity_rows.get(&entity).copied()
    }

    #[inline]
    pub fn chunk_index_of(&self, entity: Entity) -> Option<usize> {
        self.row_of(entity).map(|row| self.split_row(row).0)
    }

    /// True when this archetype carries every required component and tag.
    pub fn check_requirements_match(
        &self,
        required_components: &[ComponentId],
        required_tags: &[TagId],
    ) -> bool {
        self.signature.includes(required_components, required_tags)
    }

    #[inline]
    fn split_row(&self, row: u32) -> (usize, usize) {
        let capacity = self.capacity();
        (row as usize / capacity, row as usize % capacity)
    }

    /// Place `entity` in a row and return the row index.
    ///
    /// Freed rows are reused last-in first-out before any chunk grows. A
    /// reused row still holds its previous bytes until components are written.
    pub fn add_entity(&mut self, entity: Entity) -> Result<u32, ChunkError> {
        let capacity = self.capacity();
        let row = match self.free_rows.pop() {
            Some(row) => {
                let (chunk_index, _) = self.split_row(row);
                if self.chunks[chunk_index].is_retired() {
                    self.chunks[chunk_index] = Chunk::new(Arc::clone(&self.layout));
                    tracing::trace!(archetype = %self.handle, chunk = chunk_index, "chunk rebuilt");
                }
                row
            }
            None => {
                let open = self
                    .chunks
                    .iter()
                    .position(|chunk| !chunk.is_retired() && !chunk.is_full());
                let chunk_index = match open {
                    Some(index) => index,
                    None => {
                        self.chunks.push(Chunk::new(Arc::clone(&self.layout)));
                        tracing::trace!(
                            archetype = %self.handle,
                            chunk = self.chunks.len() - 1,
                            "chunk allocated"
                        );
                        self.chunks.len() - 1
                    }
                };
                (chunk_index * capacity + self.chunks[chunk_index].span()) as u32
            }
        };

        let (chunk_index, slot) = self.split_row(row);
        let chunk = &mut self.chunks[chunk_index];
        chunk.add_instance(1)?;
        chunk.bind_row(slot, entity)?;
        self.entity_rows.insert(entity, row);
        Ok(row)
    }

    /// Release `entity`'s row. The row's bytes are not cleared.
    pub fn destroy_entity(&mut self, entity: Entity, row: u32) -> bool {
        match self.entity_rows.get(&entity) {
            Some(&stored) if stored == row => {}
            Some(&stored) => {
                tracing::error!(entity = %entity, row, stored, "row does not belong to entity");
                return false;
            }
            None => {
                tracing::error!(entity = %entity, archetype = %self.handle, "entity is not in archetype");
                return false;
            }
        }

        self.entity_rows.remove(&entity);
        let (chunk_index, slot) = self.split_row(row);
        let chunk = &mut self.chunks[chunk_index];
        chunk.unbind_row(slot);
        chunk.remove_instance(1);
        self.free_rows.push(row);
        true
    }

    /// Bytes of component `id` for `entity`, or `None` (logged).
    pub fn get_component(&self, entity: Entity, id: ComponentId) -> Option<&[u8]> {
        match self.row_of(entity) {
            Some(row) => self.read_component(row, id),
            None => {
                tracing::error!(entity = %entity, archetype = %self.handle, "entity is not in archetype");
                None
            }
        }
    }

    pub fn get_component_mut(&mut self, entity: Entity, id: ComponentId) -> Option<&mut [u8]> {
        match self.row_of(entity) {
            Some(row) => self.read_component_mut(row, id),
            None => {
                tracing::error!(entity = %entity, archetype = %self.handle, "entity is not in archetype");
                None
            }
        }
    }

    pub fn read_component(&self, row: u32, id: ComponentId) -> Option<&[u8]> {
        let (chunk_index, slot) = self.split_row(row);
        self.chunks.get(chunk_index)?.read_component(slot, id)
    }

    pub fn read_component_mut(&mut self, row: u32, id: ComponentId) -> Option<&mut [u8]> {
        let (chunk_index, slot) = self.split_row(row);
        self.chunks.get_mut(chunk_index)?.read_component_mut(slot, id)
    }

    pub fn write_component(&mut self, row: u32, id: ComponentId, bytes: &[u8]) -> Result<(), ChunkError> {
        let (slot, chunk) = self.chunk_for_row(row)?;
        chunk.write_component(slot, id, bytes)
    }

    pub fn zero_row(&mut self, row: u32) -> Result<(), ChunkError> {
        let (slot, chunk) = self.chunk_for_row(row)?;
        chunk.zero_row(slot)
    }

    fn chunk_for_row(&mut self, row: u32) -> Result<(usize, &mut Chunk), ChunkError> {
        let (chunk_index, slot) = self.split_row(row);
        let total = self.capacity() * self.chunks.len();
        self.chunks
            .get_mut(chunk_index)
            .map(|chunk| (slot, chunk))
            .ok_or(ChunkError::RowOutOfBounds {
                row: row as usize,
                capacity: total,
            })
    }

    /// Shared layout plus exclusive access to every chunk.
    pub(crate) fn split_for_iteration(&mut self) -> (&ChunkLayout, &mut [Chunk]) {
        (&self.layout, &mut self.chunks)
    }
}
