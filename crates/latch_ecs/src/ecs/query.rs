// query.rs - Archetype matching and chunk iteration
//
// A query names the components it touches, each with an access mode, plus
// the tags an archetype must carry. Matching archetypes are collected
// incrementally: only archetypes created since the last resolve are checked.

use crate::ecs::{
    ArchetypeHandle, Component, ComponentId, EcsResult, EntityManager, ExecutionContext, Tag,
    TagId, TypeRegistry,
};
use rayon::prelude::*;
use std::sync::Arc;

/// How a query may touch a component column.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum ComponentAccess {
    ReadOnly = 1,
    ReadWrite = 2,
}

/// Components (with access modes) and tags a query requires.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct QueryRequirements {
    components: Vec<(ComponentId, ComponentAccess)>,
    tags: Vec<TagId>,
}

impl QueryRequirements {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read<T: Component>(self, registry: &TypeRegistry) -> EcsResult<Self> {
        let id = registry.try_component_id::<T>()?;
        Ok(self.with_component(id, ComponentAccess::ReadOnly))
    }

    pub fn write<T: Component>(self, registry: &TypeRegistry) -> EcsResult<Self> {
        let id = registry.try_component_id::<T>()?;
        Ok(self.with_component(id, ComponentAccess::ReadWrite))
    }

    /// Require component `id`. Declaring it twice keeps the wider access.
    pub fn with_component(mut self, id: ComponentId, access: ComponentAccess) -> Self {
        match self.components.binary_search_by_key(&id, |(existing, _)| *existing) {
            Ok(index) => {
                let declared = &mut self.components[index].1;
                *declared = (*declared).max(access);
            }
            Err(index) => self.components.insert(index, (id, access)),
        }
        self
    }

    pub fn with_tag<T: Tag>(self, registry: &TypeRegistry) -> EcsResult<Self> {
        let id = registry.try_tag_id::<T>()?;
        Ok(self.with_tag_id(id))
    }

    pub fn with_tag_id(mut self, id: TagId) -> Self {
        if let Err(index) = self.tags.binary_search(&id) {
            self.tags.insert(index, id);
        }
        self
    }

    /// Declared access for `id`, if the query names it.
    pub fn access(&self, id: ComponentId) -> Option<ComponentAccess> {
        self.components
            .binary_search_by_key(&id, |(existing, _)| *existing)
            .ok()
            .map(|index| self.components[index].1)
    }

    #[inline]
    pub fn components(&self) -> &[(ComponentId, ComponentAccess)] {
        &self.components
    }

    pub fn component_ids(&self) -> Vec<ComponentId> {
        self.components.iter().map(|(id, _)| *id).collect()
    }

    #[inline]
    pub fn tags(&self) -> &[TagId] {
        &self.tags
    }
}

/// A resolved set of archetypes matching one `QueryRequirements`.
pub struct EntityQuery {
    requirements: QueryRequirements,
    component_ids: Vec<ComponentId>,
    matched: Vec<ArchetypeHandle>,
    inspected: usize,
}

impl EntityQuery {
    pub fn new(requirements: QueryRequirements) -> Self {
        Self {
            component_ids: requirements.component_ids(),
            requirements,
            matched: Vec::new(),
            inspected: 0,
        }
    }

    #[inline]
    pub fn requirements(&self) -> &QueryRequirements {
        &self.requirements
    }

    /// Archetypes matched so far, in creation order.
    #[inline]
    pub fn matched_archetypes(&self) -> &[ArchetypeHandle] {
        &self.matched
    }

    /// Check archetypes created since the last call. Returns how many new
    /// archetypes matched.
    pub fn resolve(&mut self, manager: &EntityManager) -> usize {
        let archetypes = manager.archetypes();
        let before = self.matched.len();
        for archetype in archetypes.iter().skip(self.inspected) {
            if archetype.check_requirements_match(&self.component_ids, self.requirements.tags()) {
                self.matched.push(archetype.handle());
            }
        }
        self.inspected = archetypes.len();
        let added = self.matched.len() - before;
        if added > 0 {
            tracing::trace!(added, total = self.matched.len(), "query matched new archetypes");
        }
        added
    }

    /// Live entities across every matched archetype.
    pub fn matched_entity_count(&mut self, manager: &EntityManager) -> usize {
        self.resolve(manager);
        self.matched
            .iter()
            .filter_map(|&handle| manager.archetype(handle))
            .map(|archetype| archetype.len())
            .sum()
    }

    /// Run `f` once per populated chunk of every matched archetype.
    pub fn for_each_chunk<F>(&mut self, manager: &mut EntityManager, mut f: F)
    where
        F: FnMut(&mut ExecutionContext<'_>),
    {
        self.resolve(manager);
        let registry = Arc::clone(manager.registry());
        let archetypes = manager.archetypes_mut();
        for handle in &self.matched {
            let Some(archetype) = archetypes.get_mut(handle.index() as usize) else {
                continue;
            };
            if archetype.is_empty() {
                continue;
            }
            let mut context = ExecutionContext::new(&registry, &self.requirements, archetype);
            for index in 0..context.chunk_count() {
                if context.set_chunk_index(index) {
                    f(&mut context);
                }
            }
        }
    }

    /// Like [`for_each_chunk`](Self::for_each_chunk), with the chunks of each
    /// archetype spread across the rayon pool. Each call to `f` sees a
    /// context holding exactly one chunk.
    pub fn par_for_each_chunk<F>(&mut self, manager: &mut EntityManager, f: F)
    where
        F: Fn(&mut ExecutionContext<'_>) + Send + Sync,
    {
        self.resolve(manager);
        let registry = Arc::clone(manager.registry());
        let requirements = &self.requirements;
        let archetypes = manager.archetypes_mut();
        for handle in &self.matched {
            let Some(archetype) = archetypes.get_mut(handle.index() as usize) else {
                continue;
            };
            let handle = archetype.handle();
            let (layout, chunks) = archetype.split_for_iteration();
            chunks
                .par_iter_mut()
                .enumerate()
                .filter(|(_, chunk)| !chunk.is_empty())
                .for_each(|(index, chunk)| {
                    let mut context = ExecutionContext::for_chunk(
                        &registry,
                        requirements,
                        handle,
                        layout,
                        index,
                        chunk,
                    );
                    f(&mut context);
                });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecs::{Entity, EntityCreationContext};
    use crate::{define_component, define_tag, EcsSettings};
    use bytemuck::{Pod, Zeroable};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[repr(C)]
    #[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
    struct Position {
        x: f32,
        y: f32,
        z: f32,
    }
    define_component!(Position);

    #[repr(C)]
    #[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
    struct Velocity {
        x: f32,
        y: f32,
        z: f32,
    }
    define_component!(Velocity);

    #[repr(C)]
    #[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
    struct Health {
        value: i32,
    }
    define_component!(Health);

    struct Frozen;
    define_tag!(Frozen);

    fn setup(chunk_rows: usize) -> (Arc<TypeRegistry>, EntityManager) {
        let registry = Arc::new(TypeRegistry::new());
        registry.register_component::<Position>();
        registry.register_component::<Velocity>();
        registry.register_component::<Health>();
        registry.register_tag::<Frozen>();
        let settings = EcsSettings {
            chunk_size_bytes: 1 << 20,
            max_entities_per_chunk: chunk_rows,
        };
        let manager = EntityManager::new(Arc::clone(&registry), settings);
        (registry, manager)
    }

    fn spawn_moving(registry: &TypeRegistry, manager: &mut EntityManager, x: f32) -> Entity {
        let context = EntityCreationContext::new(registry)
            .with(Position { x, y: 0.0, z: 0.0 })
            .unwrap()
            .with(Velocity { x: 1.0, y: 2.0, z: 0.0 })
            .unwrap();
        manager.create_entity(context, None).unwrap()
    }

    fn movement(registry: &TypeRegistry) -> EntityQuery {
        EntityQuery::new(
            QueryRequirements::new()
                .write::<Position>(registry)
                .unwrap()
                .read::<Velocity>(registry)
                .unwrap(),
        )
    }

    #[test]
    fn duplicate_declaration_keeps_write_access() {
        let requirements = QueryRequirements::new()
            .with_component(4, ComponentAccess::ReadWrite)
            .with_component(2, ComponentAccess::ReadOnly)
            .with_component(4, ComponentAccess::ReadOnly);
        assert_eq!(requirements.component_ids(), vec![2, 4]);
        assert_eq!(requirements.access(4), Some(ComponentAccess::ReadWrite));
        assert_eq!(requirements.access(3), None);
    }

    #[test]
    fn resolve_only_checks_new_archetypes() {
        let (registry, mut manager) = setup(64);
        let mut query = movement(&registry);
        assert_eq!(query.resolve(&manager), 0);

        let e = spawn_moving(&registry, &mut manager, 0.0);
        let health_only = EntityCreationContext::new(&registry)
            .with(Health { value: 1 })
            .unwrap();
        manager.create_entity(health_only, None).unwrap();
        assert_eq!(query.resolve(&manager), 1);
        assert_eq!(query.resolve(&manager), 0);

        manager.add_component(e, Health { value: 3 }).unwrap();
        assert_eq!(query.resolve(&manager), 1);
        assert_eq!(query.matched_archetypes().len(), 2);
        assert_eq!(query.matched_entity_count(&manager), 1);
    }

    #[test]
    fn tag_requirement_filters_archetypes() {
        let (registry, mut manager) = setup(64);
        let plain = spawn_moving(&registry, &mut manager, 0.0);
        let frozen = spawn_moving(&registry, &mut manager, 1.0);
        manager.add_tag::<Frozen>(frozen).unwrap();

        let mut query = EntityQuery::new(
            QueryRequirements::new()
                .read::<Position>(&registry)
                .unwrap()
                .with_tag::<Frozen>(&registry)
                .unwrap(),
        );
        let mut seen = Vec::new();
        query.for_each_chunk(&mut manager, |context| {
            seen.extend(context.entities().iter().flatten().copied());
        });
        assert_eq!(seen, vec![frozen]);
        assert!(!seen.contains(&plain));
    }

    #[test]
    fn for_each_chunk_visits_every_populated_chunk() {
        let (registry, mut manager) = setup(4);
        let entities: Vec<Entity> = (0..10)
            .map(|i| spawn_moving(&registry, &mut manager, i as f32))
            .collect();
        // Empty the middle chunk so it retires.
        for &entity in &entities[4..8] {
            manager.destroy_entity(entity);
        }

        let mut query = movement(&registry);
        let mut visited = Vec::new();
        query.for_each_chunk(&mut manager, |context| {
            visited.push((context.chunk_index(), context.live_count()));
            let velocity: Vec<Velocity> = context.components::<Velocity>().to_vec();
            let positions = context.components_mut::<Position>();
            for (position, velocity) in positions.iter_mut().zip(&velocity) {
                position.x += velocity.x;
                position.y += velocity.y;
            }
        });
        assert_eq!(visited, vec![(0, 4), (2, 2)]);

        for (i, &entity) in entities.iter().enumerate() {
            if (4..8).contains(&i) {
                continue;
            }
            let position = manager.get_component::<Position>(entity).unwrap();
            assert_eq!(*position, Position { x: i as f32 + 1.0, y: 2.0, z: 0.0 });
        }
    }

    #[test]
    fn parallel_iteration_touches_each_entity_once() {
        let (registry, mut manager) = setup(8);
        let entities: Vec<Entity> = (0..100)
            .map(|i| spawn_moving(&registry, &mut manager, i as f32))
            .collect();

        let mut query = movement(&registry);
        let rows = AtomicUsize::new(0);
        query.par_for_each_chunk(&mut manager, |context| {
            assert_eq!(context.chunk_count(), 1);
            rows.fetch_add(context.live_count(), Ordering::Relaxed);
            let velocity: Vec<Velocity> = context.components::<Velocity>().to_vec();
            for (position, velocity) in context
                .components_mut::<Position>()
                .iter_mut()
                .zip(&velocity)
            {
                position.x += velocity.x;
            }
        });
        assert_eq!(rows.load(Ordering::Relaxed), 100);

        for (i, &entity) in entities.iter().enumerate() {
            assert_eq!(manager.get_component::<Position>(entity).unwrap().x, i as f32 + 1.0);
        }
    }
}
