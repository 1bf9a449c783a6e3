// system_manager.rs - Registered systems and their execution order
//
// Every system owns an EntityQuery built from its descriptor. The order is a
// topological sort of the before/after constraints; systems without
// constraints keep their registration order relative to each other.

use crate::ecs::{
    EcsResult, EntityManager, EntityQuery, SystemDescriptor, SystemHandle, SystemId,
    SystemRegistrationError, TypeRegistry,
};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;

/// A unit of per-frame work over the entities matching its descriptor.
pub trait System: Send {
    /// Declare the system's name, access and ordering. Naming an
    /// unregistered component or tag fails registration.
    fn descriptor(&self, registry: &TypeRegistry) -> EcsResult<SystemDescriptor>;

    /// Run once per `SystemManager::execute`. `query` is already built from
    /// the descriptor.
    fn execute(&mut self, query: &mut EntityQuery, manager: &mut EntityManager);
}

struct RegisteredSystem {
    id: SystemId,
    descriptor: SystemDescriptor,
    query: EntityQuery,
    system: Box<dyn System>,
}

pub struct SystemManager {
    registry: Arc<TypeRegistry>,
    systems: Vec<RegisteredSystem>,
    name_lookup: HashMap<String, SystemHandle>,
    execution_order: Vec<SystemHandle>,
    order_dirty: bool,
}

impl SystemManager {
    pub fn new(registry: Arc<TypeRegistry>) -> Self {
        Self {
            registry,
            systems: Vec::new(),
            name_lookup: HashMap::new(),
            execution_order: Vec::new(),
            order_dirty: false,
        }
    }

    pub fn register_system(
        &mut self,
        system: impl System + 'static,
    ) -> Result<SystemHandle, SystemRegistrationError> {
        let descriptor = system.descriptor(&self.registry)?;
        let name = descriptor.name().to_string();
        if self.name_lookup.contains_key(&name) {
            tracing::error!(system = %name, "system is already registered");
            return Err(SystemRegistrationError::DuplicateName { name });
        }

        let handle = SystemHandle::from_slot(self.systems.len());
        let id = self.registry.register_system_named(&name);
        self.systems.push(RegisteredSystem {
            id,
            query: EntityQuery::new(descriptor.requirements()),
            descriptor,
            system: Box::new(system),
        });
        tracing::debug!(system = %name, %handle, "system registered");
        self.name_lookup.insert(name, handle);
        self.order_dirty = true;
        Ok(handle)
    }

    /// Swap the implementation behind `handle`. The new system may change
    /// its descriptor, but not to a name another system already holds.
    pub fn replace_system(
        &mut self,
        handle: SystemHandle,
        system: impl System + 'static,
    ) -> Result<(), SystemRegistrationError> {
        let index = handle.slot();
        let Some(previous) = self.systems.get(index) else {
            return Err(SystemRegistrationError::UnknownHandle { handle });
        };
        let descriptor = system.descriptor(&self.registry)?;
        let name = descriptor.name().to_string();
        match self.name_lookup.get(&name) {
            Some(&owner) if owner != handle => {
                return Err(SystemRegistrationError::DuplicateName { name });
            }
            _ => {}
        }

        let previous_name = previous.descriptor.name().to_string();
        if previous_name != name {
            self.name_lookup.remove(&previous_name);
            self.name_lookup.insert(name.clone(), handle);
        }
        let id = self.registry.register_system_named(&name);
        self.systems[index] = RegisteredSystem {
            id,
            query: EntityQuery::new(descriptor.requirements()),
            descriptor,
            system: Box::new(system),
        };
        self.order_dirty = true;
        tracing::debug!(system = %name, %handle, "system replaced");
        Ok(())
    }

    pub fn system_handle(&self, name: &str) -> Option<SystemHandle> {
        self.name_lookup.get(name).copied()
    }

    pub fn descriptor(&self, handle: SystemHandle) -> Option<&SystemDescriptor> {
        self.systems
            .get(handle.slot())
            .map(|system| &system.descriptor)
    }

    /// Registry id assigned to the system's name.
    pub fn system_id(&self, handle: SystemHandle) -> Option<SystemId> {
        self.systems.get(handle.slot()).map(|system| system.id)
    }

    pub fn query(&self, handle: SystemHandle) -> Option<&EntityQuery> {
        self.systems
            .get(handle.slot())
            .map(|system| &system.query)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.systems.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.systems.is_empty()
    }

    /// Order computed by the last successful
    /// [`generate_execution_order`](Self::generate_execution_order).
    #[inline]
    pub fn execution_order(&self) -> &[SystemHandle] {
        &self.execution_order
    }

    /// Sort systems so every `execute_before` / `execute_after` constraint
    /// holds. Ready systems are taken in registration order.
    pub fn generate_execution_order(&mut self) -> Result<&[SystemHandle], SystemRegistrationError> {
        let count = self.systems.len();
        let mut successors: Vec<Vec<usize>> = vec![Vec::new(); count];
        let mut in_degree = vec![0usize; count];

        let resolve = |system: &SystemDescriptor, dependency: &str| {
            self.name_lookup
                .get(dependency)
                .map(|handle| handle.slot())
                .ok_or_else(|| SystemRegistrationError::UnknownDependency {
                    system: system.name().to_string(),
                    dependency: dependency.to_string(),
                })
        };

        for (index, entry) in self.systems.iter().enumerate() {
            for before in entry.descriptor.execute_before() {
                let target = resolve(&entry.descriptor, before.as_str())?;
                successors[index].push(target);
                in_degree[target] += 1;
            }
            for after in entry.descriptor.execute_after() {
                let source = resolve(&entry.descriptor, after.as_str())?;
                successors[source].push(index);
                in_degree[index] += 1;
            }
        }

        let mut ready: BinaryHeap<Reverse<usize>> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, degree)| **degree == 0)
            .map(|(index, _)| Reverse(index))
            .collect();
        let mut order = Vec::with_capacity(count);
        while let Some(Reverse(index)) = ready.pop() {
            order.push(SystemHandle::from_slot(index));
            for &next in &successors[index] {
                in_degree[next] -= 1;
                if in_degree[next] == 0 {
                    ready.push(Reverse(next));
                }
            }
        }

        if order.len() != count {
            let systems: Vec<String> = in_degree
                .iter()
                .enumerate()
                .filter(|(_, degree)| **degree > 0)
                .map(|(index, _)| self.systems[index].descriptor.name().to_string())
                .collect();
            tracing::error!(?systems, "system execution order has a cycle");
            return Err(SystemRegistrationError::ExecutionOrderCycle { systems });
        }

        self.execution_order = order;
        self.order_dirty = false;
        Ok(&self.execution_order)
    }

    /// Run every system once, in execution order.
    pub fn execute(&mut self, manager: &mut EntityManager) -> Result<(), SystemRegistrationError> {
        if self.order_dirty {
            self.generate_execution_order()?;
        }
        for position in 0..self.execution_order.len() {
            let index = self.execution_order[position].slot();
            let entry = &mut self.systems[index];
            let span = tracing::debug_span!("system", name = entry.descriptor.name());
            let _guard = span.enter();
            entry.system.execute(&mut entry.query, manager);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecs::{EcsError, EntityCreationContext};
    use crate::{define_component, EcsSettings};
    use bytemuck::{Pod, Zeroable};
    use std::sync::Mutex;

    #[repr(C)]
    #[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
    struct Position {
        x: f32,
    }
    define_component!(Position);

    #[repr(C)]
    #[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
    struct Velocity {
        x: f32,
    }
    define_component!(Velocity);

    struct Movement;

    impl System for Movement {
        fn descriptor(&self, registry: &TypeRegistry) -> EcsResult<SystemDescriptor> {
            SystemDescriptor::new("movement")
                .write::<Position>(registry)?
                .read::<Velocity>(registry)
        }

        fn execute(&mut self, query: &mut EntityQuery, manager: &mut EntityManager) {
            query.for_each_chunk(manager, |context| {
                let velocity = context.components::<Velocity>();
                for (position, velocity) in context
                    .components_mut::<Position>()
                    .iter_mut()
                    .zip(velocity)
                {
                    position.x += velocity.x;
                }
            });
        }
    }

    /// Records its name into a shared log when run.
    struct Recorder {
        name: &'static str,
        before: Vec<&'static str>,
        after: Vec<&'static str>,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    impl Recorder {
        fn new(name: &'static str, log: &Arc<Mutex<Vec<&'static str>>>) -> Self {
            Self {
                name,
                before: Vec::new(),
                after: Vec::new(),
                log: Arc::clone(log),
            }
        }

        fn before(mut self, name: &'static str) -> Self {
            self.before.push(name);
            self
        }

        fn after(mut self, name: &'static str) -> Self {
            self.after.push(name);
            self
        }
    }

    impl System for Recorder {
        fn descriptor(&self, _registry: &TypeRegistry) -> EcsResult<SystemDescriptor> {
            let mut descriptor = SystemDescriptor::new(self.name);
            for name in &self.before {
                descriptor = descriptor.before(*name);
            }
            for name in &self.after {
                descriptor = descriptor.after(*name);
            }
            Ok(descriptor)
        }

        fn execute(&mut self, _query: &mut EntityQuery, _manager: &mut EntityManager) {
            self.log.lock().unwrap().push(self.name);
        }
    }

    fn setup() -> (Arc<TypeRegistry>, EntityManager, SystemManager) {
        let registry = Arc::new(TypeRegistry::new());
        registry.register_component::<Position>();
        registry.register_component::<Velocity>();
        let manager = EntityManager::new(Arc::clone(&registry), EcsSettings::default());
        let systems = SystemManager::new(Arc::clone(&registry));
        (registry, manager, systems)
    }

    fn names(systems: &SystemManager) -> Vec<String> {
        systems
            .execution_order()
            .iter()
            .map(|&handle| systems.descriptor(handle).unwrap().name().to_string())
            .collect()
    }

    #[test]
    fn movement_system_updates_positions() {
        let (registry, mut manager, mut systems) = setup();
        let context = EntityCreationContext::new(&registry)
            .with(Position { x: 0.0 })
            .unwrap()
            .with(Velocity { x: 1.5 })
            .unwrap();
        let entity = manager.create_entity(context, None).unwrap();

        let handle = systems.register_system(Movement).unwrap();
        assert_eq!(systems.system_handle("movement"), Some(handle));
        assert_eq!(systems.system_id(handle), Some(registry.system_id_by_name("movement")));

        for _ in 0..4 {
            systems.execute(&mut manager).unwrap();
        }
        assert_eq!(manager.get_component::<Position>(entity), Some(&Position { x: 6.0 }));
        assert_eq!(
            systems
                .query(handle)
                .unwrap()
                .matched_archetypes()
                .len(),
            1
        );
    }

    #[test]
    fn unregistered_access_fails_registration() {
        #[repr(C)]
        #[derive(Clone, Copy, Pod, Zeroable)]
        struct Mass {
            kg: f32,
        }
        define_component!(Mass);

        struct Gravity;

        impl System for Gravity {
            fn descriptor(&self, registry: &TypeRegistry) -> EcsResult<SystemDescriptor> {
                SystemDescriptor::new("gravity").write::<Mass>(registry)
            }

            fn execute(&mut self, _query: &mut EntityQuery, _manager: &mut EntityManager) {}
        }

        let (_registry, _manager, mut systems) = setup();
        assert!(matches!(
            systems.register_system(Gravity),
            Err(SystemRegistrationError::InvalidDescriptor(
                EcsError::ComponentNotRegistered { .. }
            ))
        ));
        assert!(systems.is_empty());
        assert_eq!(systems.system_handle("gravity"), None);
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let (_registry, _manager, mut systems) = setup();
        systems.register_system(Movement).unwrap();
        assert_eq!(
            systems.register_system(Movement),
            Err(SystemRegistrationError::DuplicateName {
                name: "movement".into()
            })
        );
        assert_eq!(systems.len(), 1);
    }

    #[test]
    fn constraints_order_systems() {
        let (_registry, mut manager, mut systems) = setup();
        let log = Arc::new(Mutex::new(Vec::new()));
        systems.register_system(Recorder::new("render", &log).after("physics")).unwrap();
        systems.register_system(Recorder::new("input", &log)).unwrap();
        systems.register_system(Recorder::new("physics", &log).after("input")).unwrap();
        systems.register_system(Recorder::new("audio", &log)).unwrap();
        systems.register_system(Recorder::new("present", &log)).unwrap();
        systems.register_system(Recorder::new("ui", &log).before("present")).unwrap();

        systems.generate_execution_order().unwrap();
        assert_eq!(
            names(&systems),
            vec!["input", "physics", "render", "audio", "ui", "present"]
        );

        systems.execute(&mut manager).unwrap();
        assert_eq!(
            *log.lock().unwrap(),
            vec!["input", "physics", "render", "audio", "ui", "present"]
        );
    }

    #[test]
    fn unknown_dependency_and_cycles_fail() {
        let (_registry, _manager, mut systems) = setup();
        let log = Arc::new(Mutex::new(Vec::new()));
        systems.register_system(Recorder::new("a", &log).after("ghost")).unwrap();
        assert_eq!(
            systems.generate_execution_order(),
            Err(SystemRegistrationError::UnknownDependency {
                system: "a".into(),
                dependency: "ghost".into()
            })
        );

        let handle = systems.system_handle("a").unwrap();
        systems.replace_system(handle, Recorder::new("a", &log).after("b")).unwrap();
        systems.register_system(Recorder::new("b", &log).after("a")).unwrap();
        systems.register_system(Recorder::new("c", &log)).unwrap();
        match systems.generate_execution_order() {
            Err(SystemRegistrationError::ExecutionOrderCycle { systems: cycle }) => {
                assert_eq!(cycle, vec!["a".to_string(), "b".to_string()]);
            }
            other => panic!("expected a cycle, got {other:?}"),
        }
    }

    #[test]
    fn replace_system_can_rename() {
        let (_registry, _manager, mut systems) = setup();
        let log = Arc::new(Mutex::new(Vec::new()));
        let first = systems.register_system(Recorder::new("first", &log)).unwrap();
        let second = systems.register_system(Recorder::new("second", &log)).unwrap();

        assert_eq!(
            systems.replace_system(first, Recorder::new("second", &log)),
            Err(SystemRegistrationError::DuplicateName {
                name: "second".into()
            })
        );
        systems.replace_system(first, Recorder::new("renamed", &log)).unwrap();
        assert_eq!(systems.system_handle("renamed"), Some(first));
        assert_eq!(systems.system_handle("first"), None);
        assert_eq!(systems.system_handle("second"), Some(second));
        assert_eq!(
            systems.replace_system(SystemHandle::from_slot(9), Recorder::new("x", &log)),
            Err(SystemRegistrationError::UnknownHandle {
                handle: SystemHandle::from_slot(9)
            })
        );
    }
}
