// builder.rs - Creation requests for entities and archetypes
//
// An EntityCreationContext gathers component values as raw bytes plus tag ids
// before anything touches storage. The archetype contexts carry layout
// metadata only and describe signatures for the create_archetype forms.

use crate::ecs::{
    Component, ComponentId, ComponentMeta, EcsError, EcsResult, Signature, Tag, TagId,
    TypeRegistry,
};

/// Owned byte payload for a single component instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentBytes {
    component_id: ComponentId,
    bytes: Box<[u8]>,
}

impl ComponentBytes {
    pub fn new(component_id: ComponentId, bytes: impl Into<Box<[u8]>>) -> Self {
        Self {
            component_id,
            bytes: bytes.into(),
        }
    }

    #[inline]
    pub fn component_id(&self) -> ComponentId {
        self.component_id
    }

    #[inline]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.bytes.len()
    }
}

/// Component values and tags for an entity that does not exist yet.
pub struct EntityCreationContext<'r> {
    registry: &'r TypeRegistry,
    components: Vec<ComponentBytes>,
    tags: Vec<TagId>,
}

impl<'r> EntityCreationContext<'r> {
    pub fn new(registry: &'r TypeRegistry) -> Self {
        Self {
            registry,
            components: Vec::new(),
            tags: Vec::new(),
        }
    }

    #[inline]
    pub fn registry(&self) -> &'r TypeRegistry {
        self.registry
    }

    /// Add a Rust-typed component by value.
    ///
    /// Adding a component type twice is a contract violation.
    pub fn add_component<T: Component>(&mut self, value: T) -> EcsResult<()> {
        let id = self.typed_id::<T>()?;
        self.insert(ComponentBytes::new(id, bytemuck::bytes_of(&value)))
    }

    /// Id of `T`, checked against the size the registry recorded for it.
    fn typed_id<T: Component>(&self) -> EcsResult<ComponentId> {
        let id = self.registry.try_component_id::<T>()?;
        let expected = self
            .registry
            .component_size(id)
            .ok_or(EcsError::UnknownComponentId { id })?;
        let actual = std::mem::size_of::<T>();
        if expected != actual {
            tracing::error!(component = T::NAME, expected, actual, "component size disagrees with registry");
            return Err(EcsError::SizeMismatch {
                id,
                expected,
                actual,
            });
        }
        Ok(id)
    }

    /// Builder form of [`add_component`](Self::add_component).
    pub fn with<T: Component>(mut self, value: T) -> EcsResult<Self> {
        self.add_component(value)?;
        Ok(self)
    }

    /// Add a component by raw bytes (deserializers, scripts).
    pub fn add_raw_component(&mut self, component_id: ComponentId, bytes: Vec<u8>) -> EcsResult<()> {
        let meta = self
            .registry
            .component_meta(component_id)
            .ok_or(EcsError::UnknownComponentId { id: component_id })?;
        if bytes.len() != meta.size {
            return Err(EcsError::SizeMismatch {
                id: component_id,
                expected: meta.size,
                actual: bytes.len(),
            });
        }
        self.insert(ComponentBytes::new(component_id, bytes))
    }

    fn insert(&mut self, component: ComponentBytes) -> EcsResult<()> {
        let id = component.component_id;
        match self.position(id) {
            Ok(_) => {
                tracing::error!(component = id, "component was already added to this creation request");
                Err(EcsError::DuplicateComponent { id })
            }
            Err(index) => {
                self.components.insert(index, component);
                Ok(())
            }
        }
    }

    /// Replace the value of `T`, adding it if absent.
    pub fn set_component<T: Component>(&mut self, value: T) -> EcsResult<()> {
        let id = self.typed_id::<T>()?;
        let component = ComponentBytes::new(id, bytemuck::bytes_of(&value));
        match self.position(id) {
            Ok(index) => self.components[index] = component,
            Err(index) => self.components.insert(index, component),
        }
        Ok(())
    }

    /// Drop `T` from the request. Returns whether it was present.
    pub fn remove_component<T: Component>(&mut self) -> bool {
        let id = self.registry.component_id::<T>();
        match self.position(id) {
            Ok(index) => {
                self.components.remove(index);
                true
            }
            Err(_) => {
                tracing::warn!(component = T::NAME, "creation request has no such component");
                false
            }
        }
    }

    /// Current value of `T` in the request.
    pub fn component<T: Component>(&self) -> Option<T> {
        let id = self.registry.component_id::<T>();
        let index = self.position(id).ok()?;
        bytemuck::try_pod_read_unaligned(self.components[index].bytes()).ok()
    }

    #[inline]
    pub fn has_component_id(&self, id: ComponentId) -> bool {
        self.position(id).is_ok()
    }

    fn position(&self, id: ComponentId) -> Result<usize, usize> {
        self.components
            .binary_search_by_key(&id, ComponentBytes::component_id)
    }

    pub fn add_tag<T: Tag>(&mut self) -> EcsResult<()> {
        let id = self.registry.try_tag_id::<T>()?;
        self.add_tag_id(id)
    }

    pub fn with_tag<T: Tag>(mut self) -> EcsResult<Self> {
        self.add_tag::<T>()?;
        Ok(self)
    }

    /// Add a tag by id. Repeating a tag is ignored with a warning.
    pub fn add_tag_id(&mut self, id: TagId) -> EcsResult<()> {
        if !self.registry.is_tag_id_registered(id) {
            return Err(EcsError::UnknownTagId { id });
        }
        match self.tags.binary_search(&id) {
            Ok(_) => tracing::warn!(tag = id, "tag was already added to this creation request"),
            Err(index) => self.tags.insert(index, id),
        }
        Ok(())
    }

    /// Components sorted by id.
    #[inline]
    pub fn components(&self) -> &[ComponentBytes] {
        &self.components
    }

    pub fn component_ids(&self) -> Vec<ComponentId> {
        self.components.iter().map(ComponentBytes::component_id).collect()
    }

    /// Tags sorted by id.
    #[inline]
    pub fn tag_ids(&self) -> &[TagId] {
        &self.tags
    }

    /// Bytes one row of this entity occupies.
    pub fn all_components_size(&self) -> usize {
        self.components.iter().map(ComponentBytes::size).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty() && self.tags.is_empty()
    }

    /// Layout-only description of the archetype this request needs.
    pub fn archetype_context(&self) -> EcsResult<ArchetypeCreationContext> {
        let mut context = ArchetypeCreationContext::new();
        for component in &self.components {
            context.add_component_id(self.registry, component.component_id)?;
        }
        for &tag in &self.tags {
            context.add_tag_id(tag);
        }
        Ok(context)
    }

    pub(crate) fn into_parts(self) -> (Vec<ComponentBytes>, Vec<TagId>) {
        (self.components, self.tags)
    }
}

/// Signature plus layout metadata for a new archetype.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ArchetypeCreationContext {
    components: Vec<ComponentMeta>,
    tags: Vec<TagId>,
}

impl ArchetypeCreationContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_component<T: Component>(&mut self, registry: &TypeRegistry) -> EcsResult<()> {
        let id = registry.try_component_id::<T>()?;
        self.add_component_id(registry, id)
    }

    pub fn with_component<T: Component>(mut self, registry: &TypeRegistry) -> EcsResult<Self> {
        self.add_component::<T>(registry)?;
        Ok(self)
    }

    pub fn add_component_id(&mut self, registry: &TypeRegistry, id: ComponentId) -> EcsResult<()> {
        let meta = registry
            .component_meta(id)
            .ok_or(EcsError::UnknownComponentId { id })?;
        self.add_component_meta(meta);
        Ok(())
    }

    pub fn add_component_meta(&mut self, meta: ComponentMeta) {
        if let Err(index) = self
            .components
            .binary_search_by_key(&meta.id, |existing| existing.id)
        {
            self.components.insert(index, meta);
        }
    }

    pub fn add_tag<T: Tag>(&mut self, registry: &TypeRegistry) -> EcsResult<()> {
        let id = registry.try_tag_id::<T>()?;
        self.add_tag_id(id);
        Ok(())
    }

    pub fn with_tag<T: Tag>(mut self, registry: &TypeRegistry) -> EcsResult<Self> {
        self.add_tag::<T>(registry)?;
        Ok(self)
    }

    pub fn add_tag_id(&mut self, id: TagId) {
        if let Err(index) = self.tags.binary_search(&id) {
            self.tags.insert(index, id);
        }
    }

    #[inline]
    pub fn components(&self) -> &[ComponentMeta] {
        &self.components
    }

    #[inline]
    pub fn tags(&self) -> &[TagId] {
        &self.tags
    }

    pub fn all_components_size(&self) -> usize {
        self.components.iter().map(|meta| meta.size).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty() && self.tags.is_empty()
    }

    pub fn signature(&self) -> Signature {
        Signature::new(
            self.components.iter().map(|meta| meta.id).collect(),
            self.tags.clone(),
        )
    }
}

/// Components and tags to merge into an existing archetype's signature.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ArchetypeExtensionContext {
    additions: ArchetypeCreationContext,
}

impl ArchetypeExtensionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_component<T: Component>(&mut self, registry: &TypeRegistry) -> EcsResult<()> {
        self.additions.add_component::<T>(registry)
    }

    pub fn with_component<T: Component>(mut self, registry: &TypeRegistry) -> EcsResult<Self> {
        self.add_component::<T>(registry)?;
        Ok(self)
    }

    pub fn add_component_meta(&mut self, meta: ComponentMeta) {
        self.additions.add_component_meta(meta);
    }

    pub fn add_tag<T: Tag>(&mut self, registry: &TypeRegistry) -> EcsResult<()> {
        self.additions.add_tag::<T>(registry)
    }

    pub fn add_tag_id(&mut self, id: TagId) {
        self.additions.add_tag_id(id);
    }

    #[inline]
    pub fn components(&self) -> &[ComponentMeta] {
        self.additions.components()
    }

    #[inline]
    pub fn tags(&self) -> &[TagId] {
        self.additions.tags()
    }

    pub(crate) fn into_creation_context(self) -> ArchetypeCreationContext {
        self.additions
    }
}

impl From<ArchetypeCreationContext> for ArchetypeExtensionContext {
    fn from(additions: ArchetypeCreationContext) -> Self {
        Self { additions }
    }
}

/// Components and tags to strip from an existing archetype's signature.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ArchetypeReductionContext {
    components: Vec<ComponentId>,
    tags: Vec<TagId>,
}

impl ArchetypeReductionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn remove_component<T: Component>(&mut self, registry: &TypeRegistry) -> EcsResult<()> {
        let id = registry.try_component_id::<T>()?;
        self.remove_component_id(id);
        Ok(())
    }

    pub fn without_component<T: Component>(mut self, registry: &TypeRegistry) -> EcsResult<Self> {
        self.remove_component::<T>(registry)?;
        Ok(self)
    }

    pub fn remove_component_id(&mut self, id: ComponentId) {
        if let Err(index) = self.components.binary_search(&id) {
            self.components.insert(index, id);
        }
    }

    pub fn remove_tag<T: Tag>(&mut self, registry: &TypeRegistry) -> EcsResult<()> {
        let id = registry.try_tag_id::<T>()?;
        self.remove_tag_id(id);
        Ok(())
    }

    pub fn remove_tag_id(&mut self, id: TagId) {
        if let Err(index) = self.tags.binary_search(&id) {
            self.tags.insert(index, id);
        }
    }

    #[inline]
    pub fn components(&self) -> &[ComponentId] {
        &self.components
    }

    #[inline]
    pub fn tags(&self) -> &[TagId] {
        &self.tags
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{define_component, define_tag};
    use bytemuck::{Pod, Zeroable};

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
    struct Health {
        value: i32,
    }
    define_component!(Health);

    struct Enemy;
    define_tag!(Enemy);

    fn registry() -> TypeRegistry {
        let registry = TypeRegistry::new();
        registry.register_component::<Health>();
        registry.register_component::<Position>();
        registry.register_tag::<Enemy>();
        registry
    }

    #[test]
    fn components_are_kept_sorted_by_id() {
        let registry = registry();
        let context = EntityCreationContext::new(&registry)
            .with(Position { x: 1.0, y: 2.0, z: 3.0 })
            .unwrap()
            .with(Health { value: 10 })
            .unwrap();

        assert_eq!(context.component_ids(), vec![1, 2]);
        assert_eq!(context.all_components_size(), 16);
        assert_eq!(
            context.component::<Position>(),
            Some(Position { x: 1.0, y: 2.0, z: 3.0 })
        );
    }

    #[test]
    fn duplicate_component_is_rejected() {
        let registry = registry();
        let mut context = EntityCreationContext::new(&registry);
        context.add_component(Health { value: 1 }).unwrap();
        let err = context.add_component(Health { value: 2 }).unwrap_err();
        assert_eq!(err, EcsError::DuplicateComponent { id: 1 });
        assert!(err.is_contract_violation());
        assert_eq!(context.component::<Health>(), Some(Health { value: 1 }));
    }

    #[test]
    fn set_and_remove_component() {
        let registry = registry();
        let mut context = EntityCreationContext::new(&registry);
        context.set_component(Health { value: 1 }).unwrap();
        context.set_component(Health { value: 5 }).unwrap();
        assert_eq!(context.component::<Health>(), Some(Health { value: 5 }));
        assert!(context.remove_component::<Health>());
        assert!(!context.remove_component::<Health>());
        assert!(context.is_empty());
    }

    #[test]
    fn raw_component_size_is_checked() {
        let registry = registry();
        let mut context = EntityCreationContext::new(&registry);
        let err = context.add_raw_component(2, vec![0; 4]).unwrap_err();
        assert_eq!(
            err,
            EcsError::SizeMismatch {
                id: 2,
                expected: 12,
                actual: 4
            }
        );
        assert!(matches!(
            context.add_raw_component(9, vec![]),
            Err(EcsError::UnknownComponentId { id: 9 })
        ));
    }

    #[test]
    fn typed_value_size_is_checked() {
        #[repr(C)]
        #[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
        struct WideHealth {
            value: i64,
        }
        define_component!(WideHealth, "Health");

        let registry = registry();
        let mut context = EntityCreationContext::new(&registry);
        let expected = EcsError::SizeMismatch {
            id: 1,
            expected: 4,
            actual: 8,
        };
        assert_eq!(context.add_component(WideHealth { value: 5 }), Err(expected.clone()));
        assert_eq!(context.set_component(WideHealth { value: 5 }), Err(expected));
        assert!(context.is_empty());
    }

    #[test]
    fn repeated_tag_is_ignored() {
        let registry = registry();
        let mut context = EntityCreationContext::new(&registry);
        context.add_tag::<Enemy>().unwrap();
        context.add_tag::<Enemy>().unwrap();
        assert_eq!(context.tag_ids(), &[1]);
        assert!(context.add_tag_id(7).is_err());
    }

    #[test]
    fn archetype_context_mirrors_request() {
        let registry = registry();
        let context = EntityCreationContext::new(&registry)
            .with(Position { x: 0.0, y: 0.0, z: 0.0 })
            .unwrap()
            .with_tag::<Enemy>()
            .unwrap();
        let archetype = context.archetype_context().unwrap();
        assert_eq!(archetype.signature(), Signature::new(vec![2], vec![1]));
        assert_eq!(archetype.all_components_size(), 12);
    }
}
