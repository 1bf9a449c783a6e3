//! Latch ECS
//!
//! Archetype-based entity/component storage:
//! - Type registry for components, tags and systems
//! - Chunked per-archetype column storage
//! - Entity creation, migration and JSON records
//! - Access-checked queries and ordered systems

pub mod ecs;
pub mod settings;

pub use settings::EcsSettings;

/// Engine version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
