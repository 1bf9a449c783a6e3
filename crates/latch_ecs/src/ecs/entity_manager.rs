// entity_manager.rs - Archetype table and entity locations
//
// The manager owns every archetype, deduplicated by normalized signature, and
// knows where each live entity is stored. Structural changes take &mut self,
// so a single writer is enforced by the borrow checker rather than by locks.

use crate::ecs::{
    Archetype, ArchetypeCreationContext, ArchetypeExtensionContext, ArchetypeHandle,
    ArchetypeReductionContext, Component, ComponentBytes, ComponentId, ComponentMeta, EcsError,
    EcsResult, Entity, EntityCreationContext, SequentialUuidSource, Signature, Tag, TagId,
    TypeRegistry, UuidSource,
};
use crate::EcsSettings;
use std::collections::HashMap;
use std::sync::Arc;

/// Where a bound entity's row lives.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct EntityLocation {
    pub archetype: ArchetypeHandle,
    pub row: u32,
}

/// Storage state of a live entity.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum EntityState {
    /// The id exists but has no archetype and no component data.
    Unbound,
    Bound(EntityLocation),
}

pub struct EntityManager {
    registry: Arc<TypeRegistry>,
    settings: EcsSettings,
    uuid_source: Box<dyn UuidSource>,
    archetypes: Vec<Archetype>,
    archetype_lookup: HashMap<Signature, ArchetypeHandle>,
    entities: HashMap<Entity, EntityState>,
}

impl EntityManager {
    pub fn new(registry: Arc<TypeRegistry>, settings: EcsSettings) -> Self {
        Self {
            registry,
            settings,
            uuid_source: Box::new(SequentialUuidSource::new()),
            archetypes: Vec::new(),
            archetype_lookup: HashMap::new(),
            entities: HashMap::new(),
        }
    }

    /// Replace the source of generated entity ids.
    pub fn with_uuid_source(mut self, source: impl UuidSource + 'static) -> Self {
        self.uuid_source = Box::new(source);
        self
    }

    #[inline]
    pub fn registry(&self) -> &Arc<TypeRegistry> {
        &self.registry
    }

    #[inline]
    pub fn settings(&self) -> &EcsSettings {
        &self.settings
    }

    // ------------------------------------------------------------------
    // Archetypes
    // ------------------------------------------------------------------

    /// Find or create the archetype described by `context`.
    pub fn create_archetype(
        &mut self,
        context: &ArchetypeCreationContext,
    ) -> EcsResult<ArchetypeHandle> {
        if context.is_empty() {
            tracing::error!("refusing to create an archetype with an empty signature");
            return Err(EcsError::EmptySignature);
        }
        Ok(self.find_or_insert(context))
    }

    /// Find or create the archetype of `source` plus the additions.
    pub fn extend_archetype(
        &mut self,
        source: ArchetypeHandle,
        additions: &ArchetypeExtensionContext,
    ) -> EcsResult<ArchetypeHandle> {
        let ids: Vec<ComponentId> = additions.components().iter().map(|meta| meta.id).collect();
        let signature = self
            .archetype_or_err(source)?
            .signature()
            .merged(&ids, additions.tags());
        self.archetype_for_signature(&signature, additions.components())
    }

    /// Find or create the archetype of `source` minus the removals.
    ///
    /// Removing everything yields `EmptySignature`; entities in that position
    /// become unbound instead of moving.
    pub fn reduce_archetype(
        &mut self,
        source: ArchetypeHandle,
        removals: &ArchetypeReductionContext,
    ) -> EcsResult<ArchetypeHandle> {
        let signature = self
            .archetype_or_err(source)?
            .signature()
            .reduced(removals.components(), removals.tags());
        if signature.is_empty() {
            return Err(EcsError::EmptySignature);
        }
        self.archetype_for_signature(&signature, &[])
    }

    fn archetype_for_signature(
        &mut self,
        signature: &Signature,
        known: &[ComponentMeta],
    ) -> EcsResult<ArchetypeHandle> {
        if let Some(&handle) = self.archetype_lookup.get(signature) {
            return Ok(handle);
        }
        let mut context = ArchetypeCreationContext::new();
        for &id in signature.components() {
            match known.iter().find(|meta| meta.id == id) {
                Some(meta) => context.add_component_meta(meta.clone()),
                None => context.add_component_id(&self.registry, id)?,
            }
        }
        for &tag in signature.tags() {
            context.add_tag_id(tag);
        }
        Ok(self.find_or_insert(&context))
    }

    fn find_or_insert(&mut self, context: &ArchetypeCreationContext) -> ArchetypeHandle {
        let signature = context.signature();
        if let Some(&handle) = self.archetype_lookup.get(&signature) {
            return handle;
        }
        let handle = ArchetypeHandle::new(self.archetypes.len() as u32);
        let archetype = Archetype::new(handle, context, &self.settings);
        tracing::debug!(
            archetype = %handle,
            components = ?signature.components(),
            tags = ?signature.tags(),
            capacity = archetype.capacity(),
            "archetype created"
        );
        self.archetypes.push(archetype);
        self.archetype_lookup.insert(signature, handle);
        handle
    }

    fn archetype_or_err(&self, handle: ArchetypeHandle) -> EcsResult<&Archetype> {
        self.archetype(handle).ok_or_else(|| {
            tracing::error!(archetype = %handle, "archetype does not exist");
            EcsError::ArchetypeNotFound { handle }
        })
    }

    #[inline]
    pub fn archetype(&self, handle: ArchetypeHandle) -> Option<&Archetype> {
        self.archetypes.get(handle.index() as usize)
    }

    #[inline]
    pub fn archetype_mut(&mut self, handle: ArchetypeHandle) -> Option<&mut Archetype> {
        self.archetypes.get_mut(handle.index() as usize)
    }

    /// Archetype with exactly `signature`, if one was created.
    pub fn find_archetype(&self, signature: &Signature) -> Option<ArchetypeHandle> {
        self.archetype_lookup.get(signature).copied()
    }

    #[inline]
    pub fn archetypes(&self) -> &[Archetype] {
        &self.archetypes
    }

    #[inline]
    pub(crate) fn archetypes_mut(&mut self) -> &mut [Archetype] {
        &mut self.archetypes
    }

    #[inline]
    pub fn archetype_count(&self) -> usize {
        self.archetypes.len()
    }

    // ------------------------------------------------------------------
    // Entity lifecycle
    // ------------------------------------------------------------------

    /// Create an entity from a creation request.
    ///
    /// `uuid` of `None` (or `Some(0)`) draws a fresh id. An empty request
    /// produces an unbound entity.
    pub fn create_entity(
        &mut self,
        context: EntityCreationContext<'_>,
        uuid: Option<u64>,
    ) -> EcsResult<Entity> {
        debug_assert!(
            std::ptr::eq(context.registry(), &*self.registry),
            "creation context was built against a different registry"
        );
        let entity = self.allocate_entity(uuid)?;
        if context.is_empty() {
            self.entities.insert(entity, EntityState::Unbound);
            return Ok(entity);
        }

        let handle = self.find_or_insert(&context.archetype_context()?);
        let (components, _) = context.into_parts();
        let archetype = &mut self.archetypes[handle.index() as usize];
        let row = archetype.add_entity(entity)?;
        for component in &components {
            if let Err(err) = archetype.write_component(row, component.component_id(), component.bytes()) {
                archetype.destroy_entity(entity, row);
                return Err(err.into());
            }
        }

        self.entities.insert(
            entity,
            EntityState::Bound(EntityLocation {
                archetype: handle,
                row,
            }),
        );
        tracing::trace!(entity = %entity, archetype = %handle, row, "entity created");
        Ok(entity)
    }

    /// Create an entity in an existing archetype with every component zeroed.
    pub fn create_entity_in(&mut self, handle: ArchetypeHandle) -> EcsResult<Entity> {
        self.archetype_or_err(handle)?;
        let entity = self.allocate_entity(None)?;
        let archetype = &mut self.archetypes[handle.index() as usize];
        let row = archetype.add_entity(entity)?;
        archetype.zero_row(row)?;
        self.entities.insert(
            entity,
            EntityState::Bound(EntityLocation {
                archetype: handle,
                row,
            }),
        );
        Ok(entity)
    }

    /// Create an id with no archetype. Components can be added later.
    pub fn create_unbound_entity(&mut self) -> Entity {
        let entity = self.fresh_entity();
        self.entities.insert(entity, EntityState::Unbound);
        entity
    }

    fn allocate_entity(&mut self, uuid: Option<u64>) -> EcsResult<Entity> {
        match uuid.filter(|bits| *bits != 0) {
            Some(bits) => {
                let entity = Entity::from_bits(bits);
                if self.entities.contains_key(&entity) {
                    tracing::error!(entity = %entity, "entity id is already in use");
                    return Err(EcsError::DuplicateEntity { entity });
                }
                Ok(entity)
            }
            None => Ok(self.fresh_entity()),
        }
    }

    fn fresh_entity(&self) -> Entity {
        loop {
            let entity = Entity::from_bits(self.uuid_source.next_uuid());
            if !entity.is_invalid() && !self.entities.contains_key(&entity) {
                return entity;
            }
        }
    }

    /// Destroy `entity` and release its row. Returns false if it was not alive.
    pub fn destroy_entity(&mut self, entity: Entity) -> bool {
        match self.entities.remove(&entity) {
            Some(EntityState::Bound(location)) => {
                if let Some(archetype) = self.archetype_mut(location.archetype) {
                    archetype.destroy_entity(entity, location.row);
                }
                tracing::trace!(entity = %entity, "entity destroyed");
                true
            }
            Some(EntityState::Unbound) => true,
            None => {
                tracing::warn!(entity = %entity, "destroy requested for unknown entity");
                false
            }
        }
    }

    #[inline]
    pub fn is_entity_valid(&self, entity: Entity) -> bool {
        self.entities.contains_key(&entity)
    }

    #[inline]
    pub fn entity_state(&self, entity: Entity) -> Option<EntityState> {
        self.entities.get(&entity).copied()
    }

    pub fn entity_location(&self, entity: Entity) -> Option<EntityLocation> {
        match self.entities.get(&entity)? {
            EntityState::Bound(location) => Some(*location),
            EntityState::Unbound => None,
        }
    }

    pub fn entity_archetype(&self, entity: Entity) -> Option<ArchetypeHandle> {
        self.entity_location(entity).map(|location| location.archetype)
    }

    /// Number of live entities, bound or not.
    #[inline]
    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    pub fn entities(&self) -> impl Iterator<Item = Entity> + '_ {
        self.entities.keys().copied()
    }

    fn location_or_err(&self, entity: Entity) -> EcsResult<EntityState> {
        self.entity_state(entity).ok_or_else(|| {
            tracing::error!(entity = %entity, "entity is not alive");
            EcsError::EntityNotFound { entity }
        })
    }

    // ------------------------------------------------------------------
    // Migration
    // ------------------------------------------------------------------

    /// Add the components and tags in `context` to an existing entity.
    ///
    /// Components the entity already had keep their values unless `context`
    /// supplies a new one. Returns the entity's archetype afterwards. On error
    /// the entity is left exactly where it was.
    pub fn add_components_to_entity(
        &mut self,
        entity: Entity,
        context: EntityCreationContext<'_>,
    ) -> EcsResult<ArchetypeHandle> {
        let state = self.location_or_err(entity)?;
        let additions = ArchetypeExtensionContext::from(context.archetype_context()?);
        let (components, _) = context.into_parts();
        self.check_sizes(&components)?;

        let location = match state {
            EntityState::Unbound => {
                let handle = self.create_archetype(&additions.into_creation_context())?;
                self.place(entity, handle, &[], &components)?
            }
            EntityState::Bound(location) => {
                let target = self.extend_archetype(location.archetype, &additions)?;
                if target == location.archetype {
                    let archetype = &mut self.archetypes[target.index() as usize];
                    for component in &components {
                        archetype.write_component(
                            location.row,
                            component.component_id(),
                            component.bytes(),
                        )?;
                    }
                    location
                } else {
                    self.migrate(entity, location, target, &components)?
                }
            }
        };

        self.entities.insert(entity, EntityState::Bound(location));
        Ok(location.archetype)
    }

    /// Every value must match its registered size before storage is touched.
    fn check_sizes(&self, components: &[ComponentBytes]) -> EcsResult<()> {
        for component in components {
            let id = component.component_id();
            let expected = self
                .registry
                .component_size(id)
                .ok_or(EcsError::UnknownComponentId { id })?;
            if component.size() != expected {
                return Err(EcsError::SizeMismatch {
                    id,
                    expected,
                    actual: component.size(),
                });
            }
        }
        Ok(())
    }

    /// Remove components and tags from an entity.
    ///
    /// Returns the new archetype, or `None` when nothing is left and the
    /// entity became unbound.
    pub fn remove_components_from_entity(
        &mut self,
        entity: Entity,
        removals: &ArchetypeReductionContext,
    ) -> EcsResult<Option<ArchetypeHandle>> {
        let location = match self.location_or_err(entity)? {
            EntityState::Bound(location) => location,
            EntityState::Unbound => {
                tracing::warn!(entity = %entity, "entity has no components to remove");
                return Ok(None);
            }
        };

        match self.reduce_archetype(location.archetype, removals) {
            Ok(target) if target == location.archetype => Ok(Some(target)),
            Ok(target) => {
                let moved = self.migrate(entity, location, target, &[])?;
                self.entities.insert(entity, EntityState::Bound(moved));
                Ok(Some(target))
            }
            Err(EcsError::EmptySignature) => {
                if let Some(archetype) = self.archetype_mut(location.archetype) {
                    archetype.destroy_entity(entity, location.row);
                }
                self.entities.insert(entity, EntityState::Unbound);
                tracing::trace!(entity = %entity, "entity is now unbound");
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    pub fn add_tags_to_entity(&mut self, entity: Entity, tags: &[TagId]) -> EcsResult<ArchetypeHandle> {
        let registry = Arc::clone(&self.registry);
        let mut context = EntityCreationContext::new(&registry);
        for &tag in tags {
            context.add_tag_id(tag)?;
        }
        self.add_components_to_entity(entity, context)
    }

    pub fn remove_tags_from_entity(
        &mut self,
        entity: Entity,
        tags: &[TagId],
    ) -> EcsResult<Option<ArchetypeHandle>> {
        let mut removals = ArchetypeReductionContext::new();
        for &tag in tags {
            removals.remove_tag_id(tag);
        }
        self.remove_components_from_entity(entity, &removals)
    }

    /// Add a single component by value.
    pub fn add_component<T: Component>(&mut self, entity: Entity, value: T) -> EcsResult<ArchetypeHandle> {
        let registry = Arc::clone(&self.registry);
        let mut context = EntityCreationContext::new(&registry);
        context.add_component(value)?;
        self.add_components_to_entity(entity, context)
    }

    pub fn remove_component<T: Component>(
        &mut self,
        entity: Entity,
    ) -> EcsResult<Option<ArchetypeHandle>> {
        let removals = ArchetypeReductionContext::new().without_component::<T>(&self.registry)?;
        self.remove_components_from_entity(entity, &removals)
    }

    pub fn add_tag<T: Tag>(&mut self, entity: Entity) -> EcsResult<ArchetypeHandle> {
        let id = self.registry.try_tag_id::<T>()?;
        self.add_tags_to_entity(entity, &[id])
    }

    pub fn remove_tag<T: Tag>(&mut self, entity: Entity) -> EcsResult<Option<ArchetypeHandle>> {
        let id = self.registry.try_tag_id::<T>()?;
        self.remove_tags_from_entity(entity, &[id])
    }

    /// Move `entity` from `from` into `target`, carrying the bytes of every
    /// component both archetypes share, then writing `values` on top.
    ///
    /// The source row is only released once the destination row is fully
    /// written.
    fn migrate(
        &mut self,
        entity: Entity,
        from: EntityLocation,
        target: ArchetypeHandle,
        values: &[ComponentBytes],
    ) -> EcsResult<EntityLocation> {
        let source = &self.archetypes[from.archetype.index() as usize];
        let destination = &self.archetypes[target.index() as usize];
        let carried: Vec<ComponentBytes> = source
            .component_ids()
            .iter()
            .copied()
            .filter(|&id| destination.has_component(id))
            .filter_map(|id| {
                source
                    .read_component(from.row, id)
                    .map(|bytes| ComponentBytes::new(id, bytes))
            })
            .collect();

        let moved = self.place(entity, target, &carried, values)?;
        self.archetypes[from.archetype.index() as usize].destroy_entity(entity, from.row);

        tracing::trace!(
            entity = %entity,
            from = %from.archetype,
            to = %target,
            carried = carried.len(),
            "entity migrated"
        );
        Ok(moved)
    }

    /// Take a zeroed row in `target` and fill it from `carried` then
    /// `values`. A failed write releases the row again.
    fn place(
        &mut self,
        entity: Entity,
        target: ArchetypeHandle,
        carried: &[ComponentBytes],
        values: &[ComponentBytes],
    ) -> EcsResult<EntityLocation> {
        let archetype = &mut self.archetypes[target.index() as usize];
        let row = archetype.add_entity(entity)?;
        let filled = archetype.zero_row(row).and_then(|()| {
            carried.iter().chain(values).try_for_each(|component| {
                archetype.write_component(row, component.component_id(), component.bytes())
            })
        });
        if let Err(err) = filled {
            archetype.destroy_entity(entity, row);
            tracing::error!(entity = %entity, archetype = %target, error = %err, "row fill failed");
            return Err(err.into());
        }
        Ok(EntityLocation {
            archetype: target,
            row,
        })
    }

    // ------------------------------------------------------------------
    // Component access
    // ------------------------------------------------------------------

    /// Raw bytes of component `id` on `entity`. Misses are logged.
    pub fn get_component_bytes(&self, entity: Entity, id: ComponentId) -> Option<&[u8]> {
        let location = self.bound_location(entity)?;
        self.archetype(location.archetype)?.read_component(location.row, id)
    }

    pub fn get_component_bytes_mut(&mut self, entity: Entity, id: ComponentId) -> Option<&mut [u8]> {
        let location = self.bound_location(entity)?;
        self.archetype_mut(location.archetype)?
            .read_component_mut(location.row, id)
    }

    fn bound_location(&self, entity: Entity) -> Option<EntityLocation> {
        match self.entities.get(&entity) {
            Some(EntityState::Bound(location)) => Some(*location),
            Some(EntityState::Unbound) => {
                tracing::error!(entity = %entity, "entity has no components");
                None
            }
            None => {
                tracing::error!(entity = %entity, "entity is not alive");
                None
            }
        }
    }

    pub fn get_component<T: Component>(&self, entity: Entity) -> Option<&T> {
        let id = self.registry.component_id::<T>();
        let bytes = self.get_component_bytes(entity, id)?;
        bytemuck::try_from_bytes(bytes).ok()
    }

    pub fn get_component_mut<T: Component>(&mut self, entity: Entity) -> Option<&mut T> {
        let id = self.registry.component_id::<T>();
        let bytes = self.get_component_bytes_mut(entity, id)?;
        bytemuck::try_from_bytes_mut(bytes).ok()
    }

    /// Overwrite component `id` on `entity` with raw bytes.
    pub fn set_component_bytes(&mut self, entity: Entity, id: ComponentId, bytes: &[u8]) -> EcsResult<()> {
        let location = match self.location_or_err(entity)? {
            EntityState::Bound(location) => location,
            EntityState::Unbound => {
                return Err(EcsError::ComponentNotOnEntity {
                    entity,
                    component: id,
                })
            }
        };
        let archetype = &mut self.archetypes[location.archetype.index() as usize];
        if !archetype.has_component(id) {
            tracing::error!(entity = %entity, component = id, "entity has no such component");
            return Err(EcsError::ComponentNotOnEntity {
                entity,
                component: id,
            });
        }
        archetype.write_component(location.row, id, bytes)?;
        Ok(())
    }

    pub fn set_component<T: Component>(&mut self, entity: Entity, value: T) -> EcsResult<()> {
        let id = self.registry.try_component_id::<T>()?;
        self.set_component_bytes(entity, id, bytemuck::bytes_of(&value))
    }

    pub fn has_component<T: Component>(&self, entity: Entity) -> bool {
        match self.entity_archetype(entity).and_then(|handle| self.archetype(handle)) {
            Some(archetype) => archetype.has_component(self.registry.component_id::<T>()),
            None => false,
        }
    }

    pub fn has_tag<T: Tag>(&self, entity: Entity) -> bool {
        match self.entity_archetype(entity).and_then(|handle| self.archetype(handle)) {
            Some(archetype) => archetype.has_tag(self.registry.tag_id::<T>()),
            None => false,
        }
    }

    /// Sorted component ids of `entity`; empty when unbound or unknown.
    pub fn entity_component_ids(&self, entity: Entity) -> Vec<ComponentId> {
        self.entity_archetype(entity)
            .and_then(|handle| self.archetype(handle))
            .map(|archetype| archetype.component_ids().to_vec())
            .unwrap_or_default()
    }

    pub fn entity_tag_ids(&self, entity: Entity) -> Vec<TagId> {
        self.entity_archetype(entity)
            .and_then(|handle| self.archetype(handle))
            .map(|archetype| archetype.tag_ids().to_vec())
            .unwrap_or_default()
    }
}
