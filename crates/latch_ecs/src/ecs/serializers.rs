// serializers.rs - Per-component JSON codecs and entity records
//
// The storage core never interprets component bytes. Serializers registered
// per component id turn a row's bytes into a JSON value and back; the
// EntityManager only assembles the outer record:
//
//   { "components": { "<name>": <value> }, "tags": [id], "tag_names": [name] }

use crate::ecs::{
    Component, ComponentId, EcsError, EcsResult, Entity, EntityCreationContext, EntityManager,
    EntityState, TypeRegistry, INVALID_ID,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

/// Converts one component's raw bytes to and from a structured value.
pub trait ComponentSerializer: Send + Sync {
    fn serialize(&self, bytes: &[u8]) -> EcsResult<Value>;
    fn deserialize(&self, value: &Value) -> EcsResult<Vec<u8>>;
}

/// Serializer for any plain-data component that also implements serde.
pub struct SerdeComponentSerializer<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> SerdeComponentSerializer<T> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for SerdeComponentSerializer<T> {
    fn default() -> Self {
        Self::new()
    }
}

fn malformed(component: &str, reason: impl std::fmt::Display) -> EcsError {
    EcsError::MalformedRecord {
        reason: format!("{component}: {reason}"),
    }
}

impl<T> ComponentSerializer for SerdeComponentSerializer<T>
where
    T: Component + Serialize + DeserializeOwned,
{
    fn serialize(&self, bytes: &[u8]) -> EcsResult<Value> {
        let value: T = bytemuck::try_pod_read_unaligned(bytes)
            .map_err(|err| malformed(T::NAME, format!("{err:?}")))?;
        serde_json::to_value(value).map_err(|err| malformed(T::NAME, err))
    }

    fn deserialize(&self, value: &Value) -> EcsResult<Vec<u8>> {
        let value: T =
            serde_json::from_value(value.clone()).map_err(|err| malformed(T::NAME, err))?;
        Ok(bytemuck::bytes_of(&value).to_vec())
    }
}

/// Serializers keyed by component id.
#[derive(Default)]
pub struct SerializerRegistry {
    serializers: HashMap<ComponentId, Box<dyn ComponentSerializer>>,
}

impl SerializerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the serde-backed serializer for `T`.
    pub fn register<T>(&mut self, registry: &TypeRegistry) -> EcsResult<ComponentId>
    where
        T: Component + Serialize + DeserializeOwned,
    {
        let id = registry.try_component_id::<T>()?;
        self.register_boxed(id, Box::new(SerdeComponentSerializer::<T>::new()));
        Ok(id)
    }

    /// Register a custom serializer. Replaces any previous one for `id`.
    pub fn register_boxed(&mut self, id: ComponentId, serializer: Box<dyn ComponentSerializer>) {
        if self.serializers.insert(id, serializer).is_some() {
            tracing::debug!(component = id, "serializer replaced");
        }
    }

    pub fn get(&self, id: ComponentId) -> Option<&dyn ComponentSerializer> {
        self.serializers.get(&id).map(|serializer| serializer.as_ref())
    }

    #[inline]
    pub fn contains(&self, id: ComponentId) -> bool {
        self.serializers.contains_key(&id)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.serializers.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.serializers.is_empty()
    }
}

impl EntityManager {
    /// Describe `entity` as a structured record.
    ///
    /// Components without a serializer are logged and left out.
    pub fn build_components_json_from_entity(
        &self,
        entity: Entity,
        serializers: &SerializerRegistry,
    ) -> EcsResult<Value> {
        if self.entity_state(entity).is_none() {
            tracing::error!(entity = %entity, "entity is not alive");
            return Err(EcsError::EntityNotFound { entity });
        }
        let registry = self.registry();

        let mut components = Map::new();
        for id in self.entity_component_ids(entity) {
            let Some(serializer) = serializers.get(id) else {
                tracing::error!(entity = %entity, component = id, "no serializer for component");
                continue;
            };
            let Some(bytes) = self.get_component_bytes(entity, id) else {
                continue;
            };
            let name = registry
                .component_name(id)
                .ok_or(EcsError::UnknownComponentId { id })?;
            components.insert(name, serializer.serialize(bytes)?);
        }

        let tags = self.entity_tag_ids(entity);
        let tag_names: Vec<String> = tags.iter().filter_map(|&id| registry.tag_name(id)).collect();

        Ok(serde_json::json!({
            "components": components,
            "tags": tags,
            "tag_names": tag_names,
        }))
    }

    /// Create an entity from a structured record.
    ///
    /// Unknown component names and components without a serializer are
    /// logged and skipped. `tag_names` wins over `tags` when both are present.
    pub fn build_entity_from_json(
        &mut self,
        uuid: Option<u64>,
        record: &Value,
        serializers: &SerializerRegistry,
    ) -> EcsResult<Entity> {
        let record = record.as_object().ok_or_else(|| EcsError::MalformedRecord {
            reason: "entity record must be an object".into(),
        })?;
        let registry = Arc::clone(self.registry());
        let mut context = EntityCreationContext::new(&registry);

        match record.get("components") {
            None | Some(Value::Null) => {}
            Some(Value::Object(components)) => {
                for (name, value) in components {
                    let id = registry.component_id_by_name(name);
                    if id == INVALID_ID {
                        continue;
                    }
                    let Some(serializer) = serializers.get(id) else {
                        tracing::error!(component = %name, "no serializer for component");
                        continue;
                    };
                    context.add_raw_component(id, serializer.deserialize(value)?)?;
                }
            }
            Some(_) => {
                return Err(EcsError::MalformedRecord {
                    reason: "'components' must be an object".into(),
                })
            }
        }

        if let Some(names) = record.get("tag_names").and_then(Value::as_array) {
            for name in names {
                let Some(name) = name.as_str() else {
                    tracing::warn!(tag = %name, "tag name is not a string");
                    continue;
                };
                match registry.tag_id_by_name(name) {
                    INVALID_ID => {}
                    id => context.add_tag_id(id)?,
                }
            }
        } else if let Some(ids) = record.get("tags").and_then(Value::as_array) {
            for id in ids {
                let tag = id.as_u64().and_then(|id| u32::try_from(id).ok());
                match tag {
                    Some(tag) if registry.is_tag_id_registered(tag) => context.add_tag_id(tag)?,
                    _ => tracing::error!(tag = %id, "unknown tag id in record"),
                }
            }
        }

        self.create_entity(context, uuid)
    }

    pub fn build_entity_from_json_str(
        &mut self,
        uuid: Option<u64>,
        json: &str,
        serializers: &SerializerRegistry,
    ) -> EcsResult<Entity> {
        let record: Value = serde_json::from_str(json).map_err(|err| EcsError::MalformedRecord {
            reason: err.to_string(),
        })?;
        self.build_entity_from_json(uuid, &record, serializers)
    }

    /// Snapshot every live entity as `{ "<entity id>": record }`.
    pub fn build_level_json(&self, serializers: &SerializerRegistry) -> EcsResult<Value> {
        let mut entities: Vec<Entity> = self.entities().collect();
        entities.sort_unstable();

        let mut level = Map::new();
        for entity in entities {
            let record = match self.entity_state(entity) {
                Some(EntityState::Unbound) => {
                    serde_json::json!({ "components": {}, "tags": [], "tag_names": [] })
                }
                _ => self.build_components_json_from_entity(entity, serializers)?,
            };
            level.insert(entity.to_bits().to_string(), record);
        }
        Ok(Value::Object(level))
    }

    /// Recreate the entities of a level snapshot, keeping their ids.
    ///
    /// Loading is all or nothing: if any record fails, the entities created
    /// so far are destroyed before the error is returned.
    pub fn load_level_json(
        &mut self,
        level: &Value,
        serializers: &SerializerRegistry,
    ) -> EcsResult<Vec<Entity>> {
        let level = level.as_object().ok_or_else(|| EcsError::MalformedRecord {
            reason: "level must be an object keyed by entity id".into(),
        })?;
        let mut created = Vec::with_capacity(level.len());
        for (key, record) in level {
            let loaded = key
                .parse::<u64>()
                .map_err(|_| EcsError::MalformedRecord {
                    reason: format!("'{key}' is not an entity id"),
                })
                .and_then(|bits| self.build_entity_from_json(Some(bits), record, serializers));
            match loaded {
                Ok(entity) => created.push(entity),
                Err(err) => {
                    tracing::error!(entity = %key, error = %err, "level load failed; rolling back");
                    for entity in created {
                        self.destroy_entity(entity);
                    }
                    return Err(err);
                }
            }
        }
        tracing::debug!(entities = created.len(), "level loaded");
        Ok(created)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{define_component, define_tag, EcsSettings};
    use bytemuck::{Pod, Zeroable};
    use serde::Deserialize;

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
    struct Health {
        value: i32,
    }
    define_component!(Health);

    #[repr(C)]
    #[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
    struct Opaque {
        bits: u32,
    }
    define_component!(Opaque);

    struct Enemy;
    define_tag!(Enemy);

    fn setup() -> (Arc<TypeRegistry>, EntityManager, SerializerRegistry) {
        let registry = Arc::new(TypeRegistry::new());
        registry.register_component::<Position>();
        registry.register_component::<Health>();
        registry.register_component::<Opaque>();
        registry.register_tag::<Enemy>();

        let mut serializers = SerializerRegistry::new();
        serializers.register::<Position>(&registry).unwrap();
        serializers.register::<Health>(&registry).unwrap();

        let manager = EntityManager::new(Arc::clone(&registry), EcsSettings::default());
        (registry, manager, serializers)
    }

    #[test]
    fn record_shape() {
        let (registry, mut manager, serializers) = setup();
        let context = EntityCreationContext::new(&registry)
            .with(Position { x: 1.0, y: 2.0, z: 3.0 })
            .unwrap()
            .with(Opaque { bits: 9 })
            .unwrap()
            .with_tag::<Enemy>()
            .unwrap();
        let entity = manager.create_entity(context, None).unwrap();

        let record = manager
            .build_components_json_from_entity(entity, &serializers)
            .unwrap();
        assert_eq!(
            record,
            serde_json::json!({
                "components": { "Position": { "x": 1.0, "y": 2.0, "z": 3.0 } },
                "tags": [1],
                "tag_names": ["Enemy"],
            })
        );
    }

    #[test]
    fn record_round_trip() {
        let (registry, mut manager, serializers) = setup();
        let context = EntityCreationContext::new(&registry)
            .with(Position { x: -4.0, y: 0.5, z: 8.0 })
            .unwrap()
            .with(Health { value: 42 })
            .unwrap()
            .with_tag::<Enemy>()
            .unwrap();
        let original = manager.create_entity(context, None).unwrap();
        let record = manager
            .build_components_json_from_entity(original, &serializers)
            .unwrap();

        let copy = manager
            .build_entity_from_json(None, &record, &serializers)
            .unwrap();
        assert_ne!(copy, original);
        assert_eq!(manager.entity_archetype(copy), manager.entity_archetype(original));
        assert_eq!(
            manager.get_component::<Position>(copy),
            Some(&Position { x: -4.0, y: 0.5, z: 8.0 })
        );
        assert_eq!(manager.get_component::<Health>(copy), Some(&Health { value: 42 }));
        assert!(manager.has_tag::<Enemy>(copy));
    }

    #[test]
    fn unknown_entries_are_skipped() {
        let (_registry, mut manager, serializers) = setup();
        let json = r#"{
            "components": {
                "Health": { "value": 3 },
                "Missing": { "value": 1 },
                "Opaque": { "bits": 1 }
            },
            "tags": [1],
            "tag_names": ["Nope"]
        }"#;
        let entity = manager
            .build_entity_from_json_str(Some(77), json, &serializers)
            .unwrap();
        assert_eq!(entity.to_bits(), 77);
        assert_eq!(manager.entity_component_ids(entity), vec![2]);
        // tag_names took precedence, and named nothing known.
        assert!(manager.entity_tag_ids(entity).is_empty());
    }

    #[test]
    fn malformed_records_are_rejected() {
        let (_registry, mut manager, serializers) = setup();
        let err = manager
            .build_entity_from_json(None, &serde_json::json!([1, 2]), &serializers)
            .unwrap_err();
        assert!(matches!(err, EcsError::MalformedRecord { .. }));
        assert!(!err.is_contract_violation());

        let bad_value = serde_json::json!({ "components": { "Health": { "value": "x" } } });
        assert!(manager
            .build_entity_from_json(None, &bad_value, &serializers)
            .is_err());
        assert_eq!(manager.entity_count(), 0);
    }

    #[test]
    fn level_snapshot_round_trip() {
        let (registry, mut source, serializers) = setup();
        for value in 0..3 {
            let context = EntityCreationContext::new(&registry)
                .with(Health { value })
                .unwrap();
            source.create_entity(context, None).unwrap();
        }
        source.create_unbound_entity();
        let level = source.build_level_json(&serializers).unwrap();
        assert_eq!(level.as_object().unwrap().len(), 4);

        let mut target = EntityManager::new(Arc::clone(&registry), EcsSettings::default());
        let mut loaded = target.load_level_json(&level, &serializers).unwrap();
        loaded.sort_unstable();
        let mut expected: Vec<Entity> = source.entities().collect();
        expected.sort_unstable();
        assert_eq!(loaded, expected);
        assert_eq!(
            target.get_component::<Health>(Entity::from_bits(2)),
            Some(&Health { value: 1 })
        );
    }

    #[test]
    fn unbound_entities_keep_the_record_shape() {
        let (_registry, mut manager, serializers) = setup();
        let entity = manager.create_unbound_entity();
        let level = manager.build_level_json(&serializers).unwrap();
        assert_eq!(
            level[entity.to_bits().to_string()],
            serde_json::json!({ "components": {}, "tags": [], "tag_names": [] })
        );
    }

    #[test]
    fn failed_level_load_is_rolled_back() {
        let (_registry, mut manager, serializers) = setup();
        let level = serde_json::json!({
            "1": { "components": { "Health": { "value": 1 } } },
            "2": { "components": { "Health": { "value": "broken" } } },
            "3": { "components": { "Health": { "value": 3 } } },
        });
        let err = manager.load_level_json(&level, &serializers).unwrap_err();
        assert!(matches!(err, EcsError::MalformedRecord { .. }));
        assert_eq!(manager.entity_count(), 0);
        assert!(manager.archetypes().iter().all(|archetype| archetype.is_empty()));
    }
}
