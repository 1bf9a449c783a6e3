//! Latch Runtime
//!
//! Small driver for the ECS: boots logging and settings, spawns a handful of
//! moving entities, runs a few frames and prints one entity as JSON.
//!
//! Usage: `latch [settings.json]`

use anyhow::{Context, Result};
use bytemuck::{Pod, Zeroable};
use latch_ecs::ecs::{
    EcsResult, EntityCreationContext, EntityManager, EntityQuery, SerializerRegistry, System,
    SystemDescriptor, SystemManager, TypeRegistry,
};
use latch_ecs::{define_component, define_tag, EcsSettings};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

const FRAMES: usize = 5;
const FRAME_SECONDS: f32 = 1.0 / 60.0;

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable, Serialize, Deserialize)]
struct Position {
    x: f32,
    y: f32,
    z: f32,
}
define_component!(Position);

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable, Serialize, Deserialize)]
struct Velocity {
    x: f32,
    y: f32,
    z: f32,
}
define_component!(Velocity);

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable, Serialize, Deserialize)]
struct Health {
    value: i32,
}
define_component!(Health);

struct Player;
define_tag!(Player);

/// Integrates velocity into position.
struct Movement {
    dt: f32,
}

impl System for Movement {
    fn descriptor(&self, registry: &TypeRegistry) -> EcsResult<SystemDescriptor> {
        SystemDescriptor::new("movement")
            .write::<Position>(registry)?
            .read::<Velocity>(registry)
    }

    fn execute(&mut self, query: &mut EntityQuery, manager: &mut EntityManager) {
        let dt = self.dt;
        query.par_for_each_chunk(manager, |context| {
            let velocity = context.components::<Velocity>();
            for (position, velocity) in context
                .components_mut::<Position>()
                .iter_mut()
                .zip(velocity)
            {
                position.x += velocity.x * dt;
                position.y += velocity.y * dt;
                position.z += velocity.z * dt;
            }
        });
    }
}

/// Slowly drains health from the player.
struct Bleed;

impl System for Bleed {
    fn descriptor(&self, registry: &TypeRegistry) -> EcsResult<SystemDescriptor> {
        Ok(SystemDescriptor::new("bleed")
            .write::<Health>(registry)?
            .with_tag::<Player>(registry)?
            .after("movement"))
    }

    fn execute(&mut self, query: &mut EntityQuery, manager: &mut EntityManager) {
        query.for_each_chunk(manager, |context| {
            for health in context.components_mut::<Health>() {
                health.value -= 1;
            }
        });
    }
}

fn load_settings() -> Result<EcsSettings> {
    match std::env::args().nth(1) {
        Some(path) => {
            let json = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read settings from {path}"))?;
            let settings = EcsSettings::from_json_str(&json)
                .with_context(|| format!("invalid settings in {path}"))?;
            tracing::info!(%path, "settings loaded");
            Ok(settings)
        }
        None => Ok(EcsSettings::default()),
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("Latch ECS v{}", latch_ecs::VERSION);
    let settings = load_settings()?;

    let registry = Arc::new(TypeRegistry::new());
    registry.register_component::<Position>();
    registry.register_component::<Velocity>();
    registry.register_component::<Health>();
    registry.register_tag::<Player>();

    let mut serializers = SerializerRegistry::new();
    serializers.register::<Position>(&registry)?;
    serializers.register::<Velocity>(&registry)?;
    serializers.register::<Health>(&registry)?;

    let mut manager = EntityManager::new(Arc::clone(&registry), settings);
    for i in 0..256 {
        let context = EntityCreationContext::new(&registry)
            .with(Position { x: i as f32, y: 0.0, z: 0.0 })?
            .with(Velocity { x: 0.0, y: 1.0, z: 0.5 })?;
        manager.create_entity(context, None)?;
    }
    let player = manager.create_entity(
        EntityCreationContext::new(&registry)
            .with(Position { x: 0.0, y: 0.0, z: 0.0 })?
            .with(Velocity { x: 2.0, y: 0.0, z: 0.0 })?
            .with(Health { value: 100 })?
            .with_tag::<Player>()?,
        None,
    )?;

    let mut systems = SystemManager::new(Arc::clone(&registry));
    systems.register_system(Movement { dt: FRAME_SECONDS })?;
    systems.register_system(Bleed)?;
    systems.generate_execution_order()?;

    tracing::info!(
        entities = manager.entity_count(),
        archetypes = manager.archetype_count(),
        "world ready"
    );
    for frame in 0..FRAMES {
        let span = tracing::info_span!("frame", frame);
        let _guard = span.enter();
        systems.execute(&mut manager)?;
    }

    let snapshot = manager.build_components_json_from_entity(player, &serializers)?;
    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    Ok(())
}
