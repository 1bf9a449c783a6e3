//! Entity Component System core types.
//!
//! Storage is archetype based: every distinct set of component and tag ids
//! gets one `Archetype`, whose entities live in fixed-capacity chunks with
//! one aligned column per component. The `EntityManager` owns the archetype
//! table and entity locations, `EntityQuery` walks matching chunks with
//! access-checked column views, and `SystemManager` runs ordered systems
//! over those queries.

mod archetype;
mod builder;
mod component;
mod entity;
mod entity_manager;
mod error;
mod execution_context;
mod query;
mod serializers;
pub mod storage;
mod system_descriptor;
mod system_handle;
mod system_manager;
mod system_registration_error;
pub(crate) mod type_registry;

pub use archetype::{Archetype, ArchetypeHandle, Signature};
pub use builder::{
    ArchetypeCreationContext, ArchetypeExtensionContext, ArchetypeReductionContext,
    ComponentBytes, EntityCreationContext,
};
pub use component::{Component, ComponentId, ComponentMeta, SystemId, Tag, TagId, INVALID_ID};
pub use entity::{Entity, SequentialUuidSource, UuidSource};
pub use entity_manager::{EntityLocation, EntityManager, EntityState};
pub use error::{EcsError, EcsResult, ErrorKind};
pub use execution_context::ExecutionContext;
pub use query::{ComponentAccess, EntityQuery, QueryRequirements};
pub use serializers::{ComponentSerializer, SerdeComponentSerializer, SerializerRegistry};
pub use storage::{Chunk, ChunkError, ChunkLayout, ChunkState, ColumnLayout};
pub use system_descriptor::SystemDescriptor;
pub use system_handle::SystemHandle;
pub use system_manager::{System, SystemManager};
pub use system_registration_error::SystemRegistrationError;
pub use type_registry::{TypeRegistry, MAX_COMPONENT_ALIGN};
