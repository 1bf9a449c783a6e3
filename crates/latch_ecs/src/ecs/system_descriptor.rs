use crate::ecs::{
    Component, ComponentAccess, ComponentId, EcsResult, QueryRequirements, Tag, TagId,
    TypeRegistry,
};

/// Metadata describing how a system interacts with the entity manager and
/// where it sits in the execution order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SystemDescriptor {
    name: String,
    reads: Vec<ComponentId>,
    writes: Vec<ComponentId>,
    tags: Vec<TagId>,
    execute_before: Vec<String>,
    execute_after: Vec<String>,
}

impl SystemDescriptor {
    /// Create a new descriptor with the provided name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Declare read-only access to `T`.
    pub fn read<T: Component>(mut self, registry: &TypeRegistry) -> EcsResult<Self> {
        self.add_read(registry.try_component_id::<T>()?);
        Ok(self)
    }

    /// Declare read-write access to `T`.
    pub fn write<T: Component>(mut self, registry: &TypeRegistry) -> EcsResult<Self> {
        self.add_write(registry.try_component_id::<T>()?);
        Ok(self)
    }

    /// Require tag `T` on every archetype the system visits.
    pub fn with_tag<T: Tag>(mut self, registry: &TypeRegistry) -> EcsResult<Self> {
        self.add_tag(registry.try_tag_id::<T>()?);
        Ok(self)
    }

    /// Run this system before the named one.
    pub fn before(mut self, system: impl Into<String>) -> Self {
        self.execute_before.push(system.into());
        self
    }

    /// Run this system after the named one.
    pub fn after(mut self, system: impl Into<String>) -> Self {
        self.execute_after.push(system.into());
        self
    }

    /// Append a single read component. A component both read and written
    /// counts as written.
    pub fn add_read(&mut self, component: ComponentId) {
        if self.writes.binary_search(&component).is_err() {
            insert_sorted(&mut self.reads, component);
        }
    }

    /// Append a single write component.
    pub fn add_write(&mut self, component: ComponentId) {
        if let Ok(index) = self.reads.binary_search(&component) {
            self.reads.remove(index);
        }
        insert_sorted(&mut self.writes, component);
    }

    pub fn add_tag(&mut self, tag: TagId) {
        insert_sorted(&mut self.tags, tag);
    }

    /// Unique system name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Read-only component set.
    pub fn read_components(&self) -> &[ComponentId] {
        &self.reads
    }

    /// Writable component set.
    pub fn write_components(&self) -> &[ComponentId] {
        &self.writes
    }

    pub fn tags(&self) -> &[TagId] {
        &self.tags
    }

    /// Systems this one must run before.
    pub fn execute_before(&self) -> &[String] {
        &self.execute_before
    }

    /// Systems this one must run after.
    pub fn execute_after(&self) -> &[String] {
        &self.execute_after
    }

    /// Query requirements matching the declared access.
    pub fn requirements(&self) -> QueryRequirements {
        let reads = self.reads.iter().map(|&id| (id, ComponentAccess::ReadOnly));
        let writes = self.writes.iter().map(|&id| (id, ComponentAccess::ReadWrite));
        let requirements = reads
            .chain(writes)
            .fold(QueryRequirements::new(), |requirements, (id, access)| {
                requirements.with_component(id, access)
            });
        self.tags
            .iter()
            .fold(requirements, |requirements, &tag| requirements.with_tag_id(tag))
    }
}

fn insert_sorted(list: &mut Vec<u32>, value: u32) {
    if let Err(index) = list.binary_search(&value) {
        list.insert(index, value);
    }
}
