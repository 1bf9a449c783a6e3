// type_registry.rs - Name-keyed id tables for components, tags and systems
//
// The registry is an explicit object shared as Arc<TypeRegistry>. Each table
// hands out ids from its own counter starting at 1; 0 stays invalid.

use crate::ecs::{
    Component, ComponentId, ComponentMeta, EcsError, EcsResult, SystemId, Tag, TagId, INVALID_ID,
};
use std::collections::HashMap;
use std::mem::{align_of, size_of};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Largest component alignment a chunk column can honor.
pub const MAX_COMPONENT_ALIGN: usize = 16;

#[derive(Default)]
struct NameTable {
    ids: HashMap<String, u32>,
    names: Vec<String>,
}

impl NameTable {
    fn id(&self, name: &str) -> Option<u32> {
        self.ids.get(name).copied()
    }

    fn name(&self, id: u32) -> Option<&str> {
        let index = (id as usize).checked_sub(1)?;
        self.names.get(index).map(String::as_str)
    }

    fn insert(&mut self, name: &str) -> u32 {
        if let Some(id) = self.id(name) {
            return id;
        }
        self.names.push(name.to_string());
        let id = self.names.len() as u32;
        self.ids.insert(name.to_string(), id);
        id
    }

    fn len(&self) -> usize {
        self.names.len()
    }
}

#[derive(Default)]
struct Tables {
    components: NameTable,
    component_meta: Vec<ComponentMeta>,
    tags: NameTable,
    systems: NameTable,
}

/// Registry of every type the storage engine knows about.
#[derive(Default)]
pub struct TypeRegistry {
    tables: RwLock<Tables>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Tables> {
        self.tables.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Tables> {
        self.tables.write().unwrap_or_else(PoisonError::into_inner)
    }

    // ------------------------------------------------------------------
    // Components
    // ------------------------------------------------------------------

    /// Register a Rust component type. Registering a known name is a no-op.
    pub fn register_component<T: Component>(&self) -> ComponentId {
        self.register_component_raw(T::NAME, size_of::<T>(), align_of::<T>())
    }

    /// Register a component described only by its layout.
    ///
    /// # Panics
    /// Re-registering `name` with a different layout, or an alignment that
    /// is not a power of two up to [`MAX_COMPONENT_ALIGN`].
    pub fn register_component_raw(&self, name: &str, size: usize, align: usize) -> ComponentId {
        assert!(
            align.is_power_of_two() && align <= MAX_COMPONENT_ALIGN,
            "Component '{}' has unsupported alignment {} (max {})",
            name,
            align,
            MAX_COMPONENT_ALIGN
        );

        let previous = {
            let mut tables = self.write();
            match tables.components.id(name) {
                Some(id) => tables.component_meta[(id - 1) as usize].clone(),
                None => {
                    let id = tables.components.insert(name);
                    tables.component_meta.push(ComponentMeta {
                        id,
                        name: name.to_string(),
                        size,
                        align,
                    });
                    tracing::debug!(component = id, name, size, align, "registered component");
                    return id;
                }
            }
        };

        // Sanity check: re-registration must match previous layout
        assert_eq!(
            previous.size, size,
            "Component size mismatch for '{}': was {}, now {}",
            name, previous.size, size
        );
        assert_eq!(
            previous.align, align,
            "Component align mismatch for '{}': was {}, now {}",
            name, previous.align, align
        );
        previous.id
    }

    /// Id of `T`, or [`INVALID_ID`] (logged) if `T` was never registered.
    pub fn component_id<T: Component>(&self) -> ComponentId {
        self.component_id_by_name(T::NAME)
    }

    pub fn component_id_by_name(&self, name: &str) -> ComponentId {
        match self.read().components.id(name) {
            Some(id) => id,
            None => {
                tracing::error!(component = name, "component is not registered");
                INVALID_ID
            }
        }
    }

    /// Like [`component_id`](Self::component_id) but as a `Result`.
    pub fn try_component_id<T: Component>(&self) -> EcsResult<ComponentId> {
        match self.component_id::<T>() {
            INVALID_ID => Err(EcsError::ComponentNotRegistered {
                name: T::NAME.to_string(),
            }),
            id => Ok(id),
        }
    }

    pub fn is_component_registered<T: Component>(&self) -> bool {
        self.read().components.id(T::NAME).is_some()
    }

    pub fn component_meta(&self, id: ComponentId) -> Option<ComponentMeta> {
        let index = (id as usize).checked_sub(1)?;
        self.read().component_meta.get(index).cloned()
    }

    pub fn component_size(&self, id: ComponentId) -> Option<usize> {
        self.component_meta(id).map(|meta| meta.size)
    }

    pub fn component_name(&self, id: ComponentId) -> Option<String> {
        self.read().components.name(id).map(str::to_string)
    }

    pub fn component_count(&self) -> usize {
        self.read().components.len()
    }

    // ------------------------------------------------------------------
    // Tags
    // ------------------------------------------------------------------

    pub fn register_tag<T: Tag>(&self) -> TagId {
        self.register_tag_named(T::NAME)
    }

    pub fn register_tag_named(&self, name: &str) -> TagId {
        let mut tables = self.write();
        if let Some(id) = tables.tags.id(name) {
            return id;
        }
        let id = tables.tags.insert(name);
        tracing::debug!(tag = id, name, "registered tag");
        id
    }

    /// Id of `T`, or [`INVALID_ID`] (logged) if `T` was never registered.
    pub fn tag_id<T: Tag>(&self) -> TagId {
        self.tag_id_by_name(T::NAME)
    }

    pub fn tag_id_by_name(&self, name: &str) -> TagId {
        match self.read().tags.id(name) {
            Some(id) => id,
            None => {
                tracing::error!(tag = name, "tag is not registered");
                INVALID_ID
            }
        }
    }

    pub fn try_tag_id<T: Tag>(&self) -> EcsResult<TagId> {
        match self.tag_id::<T>() {
            INVALID_ID => Err(EcsError::TagNotRegistered {
                name: T::NAME.to_string(),
            }),
            id => Ok(id),
        }
    }

    pub fn tag_name(&self, id: TagId) -> Option<String> {
        self.read().tags.name(id).map(str::to_string)
    }

    pub fn is_tag_id_registered(&self, id: TagId) -> bool {
        self.read().tags.name(id).is_some()
    }

    pub fn tag_count(&self) -> usize {
        self.read().tags.len()
    }

    // ------------------------------------------------------------------
    // Systems
    // ------------------------------------------------------------------

    pub fn register_system_named(&self, name: &str) -> SystemId {
        self.write().systems.insert(name)
    }

    pub fn system_id_by_name(&self, name: &str) -> SystemId {
        match self.read().systems.id(name) {
            Some(id) => id,
            None => {
                tracing::error!(system = name, "system is not registered");
                INVALID_ID
            }
        }
    }

    pub fn system_name(&self, id: SystemId) -> Option<String> {
        self.read().systems.name(id).map(str::to_string)
    }

    pub fn system_count(&self) -> usize {
        self.read().systems.len()
    }
}
