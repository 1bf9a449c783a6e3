// execution_context.rs - Typed column views over one archetype's chunks
//
// A context exclusively borrows the chunks it walks. Column views are
// resolved lazily per component and cached for every chunk at once; the
// cache survives chunk moves and is dropped by clear_loaded_subchunks.
//
// Views are handed out from &self so a system can hold a read view of one
// component next to a write view of another. A per-chunk borrow table keeps
// those views from aliasing.

use crate::ecs::storage::{Chunk, ChunkLayout};
use crate::ecs::{
    Archetype, ArchetypeHandle, Component, ComponentAccess, ComponentId, EcsError, EcsResult,
    Entity, QueryRequirements, TypeRegistry,
};
use std::cell::RefCell;
use std::collections::HashMap;
use std::marker::PhantomData;

struct ChunkCursor<'a> {
    base: *mut u8,
    arena_len: usize,
    span: usize,
    live: usize,
    entities: &'a [Option<Entity>],
}

impl<'a> ChunkCursor<'a> {
    /// `None` for a retired chunk.
    fn new(chunk: &'a mut Chunk) -> Option<Self> {
        let live = chunk.len();
        let span = chunk.span();
        let (arena, entities) = chunk.split_for_iteration()?;
        Some(Self {
            base: arena.as_mut_ptr(),
            arena_len: arena.len(),
            span,
            live,
            entities,
        })
    }
}

#[derive(Copy, Clone)]
struct RawColumn {
    ptr: *mut u8,
    len: usize,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Borrow {
    Shared,
    Exclusive,
}

/// Per-archetype cursor handed to query callbacks.
pub struct ExecutionContext<'a> {
    registry: &'a TypeRegistry,
    requirements: &'a QueryRequirements,
    archetype: ArchetypeHandle,
    layout: &'a ChunkLayout,
    chunks: Vec<Option<ChunkCursor<'a>>>,
    first_chunk: usize,
    current: usize,
    columns: RefCell<HashMap<ComponentId, Vec<Option<RawColumn>>>>,
    borrows: RefCell<HashMap<ComponentId, Borrow>>,
    _arena: PhantomData<&'a mut [u8]>,
}

impl<'a> ExecutionContext<'a> {
    /// Context over every chunk of `archetype`, positioned at chunk 0.
    pub(crate) fn new(
        registry: &'a TypeRegistry,
        requirements: &'a QueryRequirements,
        archetype: &'a mut Archetype,
    ) -> Self {
        let handle = archetype.handle();
        let (layout, chunks) = archetype.split_for_iteration();
        let cursors = chunks.iter_mut().map(ChunkCursor::new).collect();
        Self::from_cursors(registry, requirements, handle, layout, cursors, 0)
    }

    /// Context over a single chunk, reported as chunk `index`.
    pub(crate) fn for_chunk(
        registry: &'a TypeRegistry,
        requirements: &'a QueryRequirements,
        archetype: ArchetypeHandle,
        layout: &'a ChunkLayout,
        index: usize,
        chunk: &'a mut Chunk,
    ) -> Self {
        let cursors = vec![ChunkCursor::new(chunk)];
        Self::from_cursors(registry, requirements, archetype, layout, cursors, index)
    }

    fn from_cursors(
        registry: &'a TypeRegistry,
        requirements: &'a QueryRequirements,
        archetype: ArchetypeHandle,
        layout: &'a ChunkLayout,
        chunks: Vec<Option<ChunkCursor<'a>>>,
        first_chunk: usize,
    ) -> Self {
        Self {
            registry,
            requirements,
            archetype,
            layout,
            chunks,
            first_chunk,
            current: 0,
            columns: RefCell::new(HashMap::new()),
            borrows: RefCell::new(HashMap::new()),
            _arena: PhantomData,
        }
    }

    #[inline]
    pub fn archetype(&self) -> ArchetypeHandle {
        self.archetype
    }

    #[inline]
    pub fn requirements(&self) -> &QueryRequirements {
        self.requirements
    }

    /// Number of chunks this context can be positioned at.
    #[inline]
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Index of the current chunk within its archetype.
    #[inline]
    pub fn chunk_index(&self) -> usize {
        self.first_chunk + self.current
    }

    /// Move to chunk `index`. Returns whether that chunk holds any entity.
    ///
    /// Moving releases every column view taken at the previous position.
    pub fn set_chunk_index(&mut self, index: usize) -> bool {
        let local = index
            .checked_sub(self.first_chunk)
            .filter(|local| *local < self.chunks.len());
        let Some(local) = local else {
            tracing::error!(
                archetype = %self.archetype,
                chunk = index,
                "chunk index out of range"
            );
            return false;
        };
        self.current = local;
        self.borrows.get_mut().clear();
        self.live_count() > 0
    }

    #[inline]
    fn cursor(&self) -> Option<&ChunkCursor<'a>> {
        self.chunks.get(self.current).and_then(Option::as_ref)
    }

    /// Occupants of rows `0..entities_count()`; vacant rows are `None`.
    pub fn entities(&self) -> &[Option<Entity>] {
        self.cursor().map(|cursor| cursor.entities).unwrap_or_default()
    }

    /// Rows covered by column views in the current chunk, vacant ones included.
    pub fn entities_count(&self) -> usize {
        self.cursor().map_or(0, |cursor| cursor.span)
    }

    /// Live entities in the current chunk.
    pub fn live_count(&self) -> usize {
        self.cursor().map_or(0, |cursor| cursor.live)
    }

    /// Drop cached column views.
    pub fn clear_loaded_subchunks(&mut self) {
        self.columns.get_mut().clear();
    }

    /// Read view of `T` for the current chunk.
    ///
    /// # Panics
    /// If the query does not name `T`, the column is mutably borrowed, or the
    /// registered size disagrees with `T`.
    pub fn components<T: Component>(&self) -> &[T] {
        match self.try_components::<T>() {
            Ok(view) => view,
            Err(err) => panic!("{err}"),
        }
    }

    /// Write view of `T` for the current chunk.
    ///
    /// # Panics
    /// If `T` was not declared `ReadWrite`, or the column is already borrowed.
    #[allow(clippy::mut_from_ref)]
    pub fn components_mut<T: Component>(&self) -> &mut [T] {
        match self.try_components_mut::<T>() {
            Ok(view) => view,
            Err(err) => panic!("{err}"),
        }
    }

    pub fn try_components<T: Component>(&self) -> EcsResult<&[T]> {
        let (id, column) = self.prepare::<T>(ComponentAccess::ReadOnly)?;
        {
            let mut borrows = self.borrows.borrow_mut();
            if borrows.get(&id) == Some(&Borrow::Exclusive) {
                return Err(EcsError::ColumnAlreadyBorrowed { id });
            }
            borrows.insert(id, Borrow::Shared);
        }
        let Some(column) = column else {
            return Ok(&[]);
        };
        // SAFETY: the pointer comes from the arena this context borrows
        // mutably for 'a, the column range lies inside it, and the borrow
        // table rules out a live exclusive view of this column.
        let bytes = unsafe { std::slice::from_raw_parts(column.ptr as *const u8, column.len) };
        bytemuck::try_cast_slice(bytes).map_err(|_| self.size_mismatch::<T>(id))
    }

    #[allow(clippy::mut_from_ref)]
    pub fn try_components_mut<T: Component>(&self) -> EcsResult<&mut [T]> {
        let (id, column) = self.prepare::<T>(ComponentAccess::ReadWrite)?;
        {
            let mut borrows = self.borrows.borrow_mut();
            if borrows.contains_key(&id) {
                tracing::error!(component = id, "column is already borrowed for this chunk");
                return Err(EcsError::ColumnAlreadyBorrowed { id });
            }
            borrows.insert(id, Borrow::Exclusive);
        }
        let Some(column) = column else {
            return Ok(&mut []);
        };
        // SAFETY: as in try_components; in addition the borrow table grants
        // at most one view of this column per chunk position, and columns of
        // different components never overlap.
        let bytes = unsafe { std::slice::from_raw_parts_mut(column.ptr, column.len) };
        bytemuck::try_cast_slice_mut(bytes).map_err(|_| self.size_mismatch::<T>(id))
    }

    /// Validate access and size, then look up the cached column.
    fn prepare<T: Component>(
        &self,
        requested: ComponentAccess,
    ) -> EcsResult<(ComponentId, Option<RawColumn>)> {
        let id = self.registry.component_id::<T>();
        match self.requirements.access(id) {
            None => {
                tracing::error!(component = T::NAME, "component is not part of the query");
                return Err(EcsError::ComponentNotInQuery { id });
            }
            Some(declared) if declared < requested => {
                tracing::error!(
                    component = T::NAME,
                    ?declared,
                    ?requested,
                    "access mode violates the query declaration"
                );
                return Err(EcsError::AccessModeMismatch {
                    id,
                    declared,
                    requested,
                });
            }
            Some(_) => {}
        }

        let Some(layout) = self.layout.column(id) else {
            return Err(EcsError::ComponentNotInQuery { id });
        };
        if layout.size != std::mem::size_of::<T>() {
            return Err(self.size_mismatch::<T>(id));
        }
        Ok((id, self.column(id)))
    }

    fn size_mismatch<T>(&self, id: ComponentId) -> EcsError {
        EcsError::SizeMismatch {
            id,
            expected: self.layout.column(id).map_or(0, |column| column.size),
            actual: std::mem::size_of::<T>(),
        }
    }

    fn column(&self, id: ComponentId) -> Option<RawColumn> {
        let mut cache = self.columns.borrow_mut();
        let views = cache.entry(id).or_insert_with(|| {
            let column = self.layout.column(id);
            self.chunks
                .iter()
                .map(|cursor| {
                    let (cursor, column) = (cursor.as_ref()?, column?);
                    let range = column.rows_range(cursor.span);
                    debug_assert!(range.end <= cursor.arena_len);
                    Some(RawColumn {
                        ptr: cursor.base.wrapping_add(range.start),
                        len: range.len(),
                    })
                })
                .collect()
        });
        views.get(self.current).copied().flatten()
    }
}
