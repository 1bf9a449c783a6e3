// chunk.rs - Fixed-capacity block of rows for one archetype
//
// A chunk owns one 16-byte aligned arena split into per-component columns
// ("subchunks"). Its live counter only moves through add_instance and
// remove_instance; dropping to zero retires the chunk and releases the arena.

use super::layout::{ChunkLayout, CHUNK_ALIGN};
use crate::ecs::{ComponentId, Entity};
use bytemuck::{Pod, Zeroable};
use std::sync::Arc;
use thiserror::Error;

#[repr(C, align(16))]
#[derive(Clone, Copy, Pod, Zeroable)]
struct Block([u8; CHUNK_ALIGN]);

const _: () = assert!(std::mem::align_of::<Block>() == CHUNK_ALIGN);
const _: () = assert!(std::mem::size_of::<Block>() == CHUNK_ALIGN);

/// Lifecycle of a chunk.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ChunkState {
    Active,
    /// Emptied once; the arena is gone and the chunk must be rebuilt before reuse.
    Retired,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChunkError {
    #[error("chunk is retired")]
    Retired,
    #[error("component {id} has no column in this chunk")]
    UnknownComponent { id: ComponentId },
    #[error("row {row} is outside chunk capacity {capacity}")]
    RowOutOfBounds { row: usize, capacity: usize },
    #[error("component {id} expects {expected} bytes but received {actual}")]
    SizeMismatch {
        id: ComponentId,
        expected: usize,
        actual: usize,
    },
    #[error("chunk is full ({capacity} rows)")]
    Full { capacity: usize },
}

pub struct Chunk {
    layout: Arc<ChunkLayout>,
    arena: Vec<Block>,
    entities: Vec<Option<Entity>>,
    live: usize,
    span: usize,
    state: ChunkState,
}

impl Chunk {
    /// Allocate a zeroed chunk for `layout`.
    pub fn new(layout: Arc<ChunkLayout>) -> Self {
        let blocks = layout.arena_bytes() / CHUNK_ALIGN;
        let capacity = layout.capacity();
        Self {
            arena: vec![Block::zeroed(); blocks],
            entities: vec![None; capacity],
            layout,
            live: 0,
            span: 0,
            state: ChunkState::Active,
        }
    }

    #[inline]
    pub fn layout(&self) -> &ChunkLayout {
        &self.layout
    }

    #[inline]
    pub fn state(&self) -> ChunkState {
        self.state
    }

    #[inline]
    pub fn is_retired(&self) -> bool {
        self.state == ChunkState::Retired
    }

    /// Number of live rows.
    #[inline]
    pub fn len(&self) -> usize {
        self.live
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.layout.capacity()
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.live >= self.capacity()
    }

    /// One past the highest row ever bound. Column views cover `0..span`.
    #[inline]
    pub fn span(&self) -> usize {
        self.span
    }

    /// Count `count` more rows as live.
    pub fn add_instance(&mut self, count: usize) -> Result<(), ChunkError> {
        if self.is_retired() {
            return Err(ChunkError::Retired);
        }
        if self.live + count > self.capacity() {
            return Err(ChunkError::Full {
                capacity: self.capacity(),
            });
        }
        self.live += count;
        Ok(())
    }

    /// Count `count` rows as dead. Reaching zero retires the chunk.
    pub fn remove_instance(&mut self, count: usize) {
        if self.is_retired() {
            return;
        }
        if count >= self.live {
            self.retire();
        } else {
            self.live -= count;
        }
    }

    fn retire(&mut self) {
        self.live = 0;
        self.span = 0;
        self.arena = Vec::new();
        self.entities = Vec::new();
        self.state = ChunkState::Retired;
        tracing::trace!("chunk retired");
    }

    fn check_row(&self, row: usize) -> Result<(), ChunkError> {
        if self.is_retired() {
            return Err(ChunkError::Retired);
        }
        if row >= self.capacity() {
            return Err(ChunkError::RowOutOfBounds {
                row,
                capacity: self.capacity(),
            });
        }
        Ok(())
    }

    /// Record that `entity` occupies `row`.
    pub fn bind_row(&mut self, row: usize, entity: Entity) -> Result<(), ChunkError> {
        self.check_row(row)?;
        self.entities[row] = Some(entity);
        self.span = self.span.max(row + 1);
        Ok(())
    }

    /// Clear the occupant of `row`. The row's bytes are left untouched.
    pub fn unbind_row(&mut self, row: usize) -> Option<Entity> {
        self.entities.get_mut(row).and_then(Option::take)
    }

    #[inline]
    pub fn entity_at(&self, row: usize) -> Option<Entity> {
        self.entities.get(row).copied().flatten()
    }

    /// Occupants of rows `0..span`; vacant rows are `None`.
    #[inline]
    pub fn entities(&self) -> &[Option<Entity>] {
        &self.entities[..self.span]
    }

    #[inline]
    fn bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.arena)
    }

    #[inline]
    fn bytes_mut(&mut self) -> &mut [u8] {
        bytemuck::cast_slice_mut(&mut self.arena)
    }

    /// Copy one component value into `row`.
    pub fn write_component(
        &mut self,
        row: usize,
        id: ComponentId,
        src: &[u8],
    ) -> Result<(), ChunkError> {
        self.check_row(row)?;
        let column = self
            .layout
            .column(id)
            .ok_or(ChunkError::UnknownComponent { id })?;
        if src.len() != column.size {
            return Err(ChunkError::SizeMismatch {
                id,
                expected: column.size,
                actual: src.len(),
            });
        }
        let range = column.row_range(row);
        self.bytes_mut()[range].copy_from_slice(src);
        Ok(())
    }

    /// Zero every column of `row`.
    pub fn zero_row(&mut self, row: usize) -> Result<(), ChunkError> {
        self.check_row(row)?;
        let layout = Arc::clone(&self.layout);
        let bytes = self.bytes_mut();
        for column in layout.columns() {
            bytes[column.row_range(row)].fill(0);
        }
        Ok(())
    }

    /// Bytes of one component at `row`.
    ///
    /// Failures are logged and reported as `None`.
    pub fn read_component(&self, row: usize, id: ComponentId) -> Option<&[u8]> {
        match self.locate(row, id) {
            Ok(range) => Some(&self.bytes()[range]),
            Err(err) => {
                tracing::error!(component = id, row, error = %err, "chunk read failed");
                None
            }
        }
    }

    /// Mutable bytes of one component at `row`.
    ///
    /// Failures are logged and reported as `None`.
    pub fn read_component_mut(&mut self, row: usize, id: ComponentId) -> Option<&mut [u8]> {
        match self.locate(row, id) {
            Ok(range) => Some(&mut self.bytes_mut()[range]),
            Err(err) => {
                tracing::error!(component = id, row, error = %err, "chunk read failed");
                None
            }
        }
    }

    fn locate(&self, row: usize, id: ComponentId) -> Result<std::ops::Range<usize>, ChunkError> {
        self.check_row(row)?;
        self.layout
            .column(id)
            .map(|column| column.row_range(row))
            .ok_or(ChunkError::UnknownComponent { id })
    }

    /// Raw bytes of a whole column over rows `0..span`.
    pub fn column_bytes(&self, id: ComponentId) -> Option<&[u8]> {
        if self.is_retired() {
            return None;
        }
        let column = self.layout.column(id)?;
        Some(&self.bytes()[column.rows_range(self.span)])
    }

    /// Split into the writable arena and the read-only occupant list.
    /// Returns `None` for a retired chunk.
    pub(crate) fn split_for_iteration(&mut self) -> Option<(&mut [u8], &[Option<Entity>])> {
        if self.is_retired() {
            return None;
        }
        let span = self.span;
        let arena: &mut [u8] = bytemuck::cast_slice_mut(&mut self.arena);
        Some((arena, &self.entities[..span]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecs::ComponentMeta;
    use crate::EcsSettings;

    fn layout(capacity: usize) -> Arc<ChunkLayout> {
        let metas = [
            ComponentMeta {
                id: 1,
                name: "Position".into(),
                size: 12,
                align: 4,
            },
            ComponentMeta {
                id: 2,
                name: "Id".into(),
                size: 8,
                align: 8,
            },
        ];
        let settings = EcsSettings {
            chunk_size_bytes: 20 * capacity,
            max_entities_per_chunk: capacity,
        };
        Arc::new(ChunkLayout::new(&metas, &settings))
    }

    #[test]
    fn write_then_read_is_bit_identical() {
        let mut chunk = Chunk::new(layout(8));
        chunk.add_instance(1).unwrap();
        chunk.bind_row(3, Entity::from_bits(42)).unwrap();

        let value: [f32; 3] = [1.5, -2.0, f32::MIN_POSITIVE];
        chunk
            .write_component(3, 1, bytemuck::bytes_of(&value))
            .unwrap();
        chunk
            .write_component(3, 2, &0xABCD_u64.to_ne_bytes())
            .unwrap();

        assert_eq!(chunk.read_component(3, 1), Some(bytemuck::bytes_of(&value)));
        assert_eq!(chunk.read_component(3, 2), Some(&0xABCD_u64.to_ne_bytes()[..]));
        assert_eq!(chunk.span(), 4);
        assert_eq!(chunk.entity_at(3), Some(Entity::from_bits(42)));
        assert_eq!(chunk.entities().iter().flatten().count(), 1);
    }

    #[test]
    fn columns_are_aligned_in_memory() {
        let mut chunk = Chunk::new(layout(8));
        let (arena, _) = chunk.split_for_iteration().unwrap();
        let base = arena.as_ptr() as usize;
        assert_eq!(base % CHUNK_ALIGN, 0);
        let id_column = chunk.layout().column(2).unwrap();
        assert_eq!((base + id_column.offset) % 8, 0);
    }

    #[test]
    fn unknown_component_is_a_soft_failure() {
        let mut chunk = Chunk::new(layout(4));
        assert!(chunk.read_component(0, 99).is_none());
        assert!(chunk.read_component_mut(0, 99).is_none());
        assert_eq!(
            chunk.write_component(0, 99, &[0; 4]),
            Err(ChunkError::UnknownComponent { id: 99 })
        );
        assert_eq!(
            chunk.write_component(0, 1, &[0; 4]),
            Err(ChunkError::SizeMismatch {
                id: 1,
                expected: 12,
                actual: 4
            })
        );
    }

    #[test]
    fn emptying_a_chunk_retires_it() {
        let mut chunk = Chunk::new(layout(4));
        chunk.add_instance(2).unwrap();
        chunk.remove_instance(1);
        assert_eq!(chunk.state(), ChunkState::Active);
        chunk.remove_instance(1);
        assert_eq!(chunk.state(), ChunkState::Retired);

        assert_eq!(chunk.add_instance(1), Err(ChunkError::Retired));
        assert_eq!(chunk.write_component(0, 1, &[0; 12]), Err(ChunkError::Retired));
        assert!(chunk.read_component(0, 1).is_none());
        assert!(chunk.column_bytes(1).is_none());
    }

    #[test]
    fn capacity_is_enforced() {
        let mut chunk = Chunk::new(layout(2));
        chunk.add_instance(2).unwrap();
        assert!(chunk.is_full());
        assert_eq!(chunk.add_instance(1), Err(ChunkError::Full { capacity: 2 }));
        assert_eq!(
            chunk.bind_row(2, Entity::from_bits(1)),
            Err(ChunkError::RowOutOfBounds { row: 2, capacity: 2 })
        );
    }
}
