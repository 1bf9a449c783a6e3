use crate::ecs::{EcsError, SystemHandle};
use thiserror::Error;

/// Errors that can occur while registering or ordering systems.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SystemRegistrationError {
    #[error("system '{name}' is already registered")]
    DuplicateName { name: String },

    #[error("system handle {handle} does not exist")]
    UnknownHandle { handle: SystemHandle },

    #[error("system '{system}' is ordered against unknown system '{dependency}'")]
    UnknownDependency { system: String, dependency: String },

    #[error("system descriptor is invalid: {0}")]
    InvalidDescriptor(#[from] EcsError),

    #[error("execution order has a cycle through {systems:?}")]
    ExecutionOrderCycle { systems: Vec<String> },
}
