use crate::ecs::storage::ChunkError;
use crate::ecs::{ArchetypeHandle, ComponentAccess, ComponentId, Entity, TagId};
use thiserror::Error;

/// How a failure should be treated by the caller.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// A lookup missed or a record was malformed. The operation was skipped.
    Recoverable,
    /// The caller broke an API contract. Continuing would hide a logic bug.
    ContractViolation,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EcsError {
    #[error("component '{name}' is not registered")]
    ComponentNotRegistered { name: String },

    #[error("tag '{name}' is not registered")]
    TagNotRegistered { name: String },

    #[error("component id {id} is not registered")]
    UnknownComponentId { id: ComponentId },

    #[error("tag id {id} is not registered")]
    UnknownTagId { id: TagId },

    #[error("entity {entity} is not alive")]
    EntityNotFound { entity: Entity },

    #[error("entity {entity} has no component {component}")]
    ComponentNotOnEntity { entity: Entity, component: ComponentId },

    #[error("archetype {handle} does not exist")]
    ArchetypeNotFound { handle: ArchetypeHandle },

    #[error("an archetype needs at least one component or tag")]
    EmptySignature,

    #[error("no serializer registered for component {component}")]
    SerializerMissing { component: ComponentId },

    #[error("malformed entity record: {reason}")]
    MalformedRecord { reason: String },

    #[error("storage failure: {0}")]
    Storage(#[from] ChunkError),

    #[error("component {id} was already added to this creation request")]
    DuplicateComponent { id: ComponentId },

    #[error("entity {entity} already exists")]
    DuplicateEntity { entity: Entity },

    #[error("component {id} expects {expected} bytes but received {actual}")]
    SizeMismatch {
        id: ComponentId,
        expected: usize,
        actual: usize,
    },

    #[error("component {id} is declared {declared:?} but was requested as {requested:?}")]
    AccessModeMismatch {
        id: ComponentId,
        declared: ComponentAccess,
        requested: ComponentAccess,
    },

    #[error("component {id} is not part of the query")]
    ComponentNotInQuery { id: ComponentId },

    #[error("component {id} is already borrowed mutably for this chunk")]
    ColumnAlreadyBorrowed { id: ComponentId },
}

impl EcsError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EcsError::DuplicateComponent { .. }
            | EcsError::DuplicateEntity { .. }
            | EcsError::SizeMismatch { .. }
            | EcsError::AccessModeMismatch { .. }
            | EcsError::ComponentNotInQuery { .. }
            | EcsError::ColumnAlreadyBorrowed { .. } => ErrorKind::ContractViolation,
            _ => ErrorKind::Recoverable,
        }
    }

    #[inline]
    pub fn is_contract_violation(&self) -> bool {
        self.kind() == ErrorKind::ContractViolation
    }
}

pub type EcsResult<T> = Result<T, EcsError>;
