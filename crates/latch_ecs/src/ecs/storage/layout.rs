// layout.rs - Column placement inside a chunk
//
// Every chunk of an archetype shares one layout: the same row capacity and
// the same byte offset for each component column.

use crate::ecs::type_registry::MAX_COMPONENT_ALIGN;
use crate::ecs::{ComponentId, ComponentMeta};
use crate::EcsSettings;
use std::ops::Range;

/// Alignment of every chunk arena.
pub const CHUNK_ALIGN: usize = MAX_COMPONENT_ALIGN;

/// Placement of a single component column.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ColumnLayout {
    pub id: ComponentId,
    pub size: usize,
    pub align: usize,
    /// Byte offset of row 0 within the chunk arena.
    pub offset: usize,
}

impl ColumnLayout {
    /// Byte range of `row` within the arena.
    #[inline]
    pub fn row_range(&self, row: usize) -> Range<usize> {
        let start = self.offset + row * self.size;
        start..start + self.size
    }

    /// Byte range covering rows `0..rows`.
    #[inline]
    pub fn rows_range(&self, rows: usize) -> Range<usize> {
        self.offset..self.offset + rows * self.size
    }
}

/// Shared column layout for all chunks of one archetype.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChunkLayout {
    columns: Vec<ColumnLayout>,
    row_size: usize,
    capacity: usize,
    arena_bytes: usize,
}

impl ChunkLayout {
    /// Carve columns for `components`, each sized `capacity * size` and
    /// aligned to the component's alignment.
    pub fn new(components: &[ComponentMeta], settings: &EcsSettings) -> Self {
        let mut metas: Vec<&ComponentMeta> = components.iter().collect();
        metas.sort_unstable_by_key(|meta| meta.id);
        metas.dedup_by_key(|meta| meta.id);

        let row_size: usize = metas.iter().map(|meta| meta.size).sum();
        let capacity = settings.rows_per_chunk(row_size);

        let mut offset = 0;
        let mut columns = Vec::with_capacity(metas.len());
        for meta in metas {
            offset = align_up(offset, meta.align.max(1));
            columns.push(ColumnLayout {
                id: meta.id,
                size: meta.size,
                align: meta.align.max(1),
                offset,
            });
            offset += meta.size * capacity;
        }

        Self {
            columns,
            row_size,
            capacity,
            arena_bytes: align_up(offset, CHUNK_ALIGN),
        }
    }

    #[inline]
    pub fn column(&self, id: ComponentId) -> Option<&ColumnLayout> {
        self.columns
            .binary_search_by_key(&id, |column| column.id)
            .ok()
            .map(|index| &self.columns[index])
    }

    #[inline]
    pub fn columns(&self) -> &[ColumnLayout] {
        &self.columns
    }

    /// Sum of all component sizes for one row.
    #[inline]
    pub fn row_size(&self) -> usize {
        self.row_size
    }

    /// Rows per chunk.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes backing one chunk, padding included.
    #[inline]
    pub fn arena_bytes(&self) -> usize {
        self.arena_bytes
    }
}

#[inline]
fn align_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(id: ComponentId, size: usize, align: usize) -> ComponentMeta {
        ComponentMeta {
            id,
            name: format!("c{id}"),
            size,
            align,
        }
    }

    #[test]
    fn columns_are_sorted_and_aligned() {
        let settings = EcsSettings {
            chunk_size_bytes: 1024,
            max_entities_per_chunk: 1024,
        };
        // 3 + 8 + 12 = 23 bytes per row -> 44 rows
        let layout = ChunkLayout::new(&[meta(2, 8, 8), meta(1, 3, 1), meta(3, 12, 4)], &settings);

        assert_eq!(layout.row_size(), 23);
        assert_eq!(layout.capacity(), 44);

        let ids: Vec<_> = layout.columns().iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);

        let first = layout.column(1).unwrap();
        assert_eq!(first.offset, 0);
        let second = layout.column(2).unwrap();
        assert_eq!(second.offset, 136); // 132 rounded up to 8
        let third = layout.column(3).unwrap();
        assert_eq!(third.offset, 136 + 8 * 44);

        assert_eq!(layout.arena_bytes() % CHUNK_ALIGN, 0);
        assert!(layout.arena_bytes() >= third.offset + 12 * 44);
    }

    #[test]
    fn missing_column_is_none() {
        let layout = ChunkLayout::new(&[meta(4, 4, 4)], &EcsSettings::default());
        assert!(layout.column(5).is_none());
        assert_eq!(layout.column(4).unwrap().row_range(3), 12..16);
    }
}
