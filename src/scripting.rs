use std::sync::Arc;

use uuid::Uuid;

use crate::config::RuntimeConfig;
use crate::diagnostics::Diagnostics;
use crate::error::ModuleError;
use crate::events::ScriptingEvents;
use crate::main_thread::MainThreadQueue;
use crate::objects::{ObjectRef, ObjectRegistry};
use crate::profiler::ScriptProfiler;
use crate::types::{SpawnParams, TypeHandle, TypeRegistry};

/// Engine-wide services the runtime plugs into: type registry, object registry, event
/// bus, main-thread queue, profiler and the diagnostics sink.
pub struct Scripting {
    config: RuntimeConfig,
    pub types: TypeRegistry,
    pub objects: ObjectRegistry,
    pub events: ScriptingEvents,
    pub main_thread: MainThreadQueue,
    pub profiler: ScriptProfiler,
    pub diagnostics: Diagnostics,
}

impl Scripting {
    pub fn new(config: RuntimeConfig) -> Arc<Self> {
        Arc::new(Self {
            diagnostics: Diagnostics::new(config.max_diagnostics),
            config,
            types: TypeRegistry::new(),
            objects: ObjectRegistry::new(),
            events: ScriptingEvents::new(),
            main_thread: MainThreadQueue::new(),
            profiler: ScriptProfiler::new(),
        })
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Spawns an object of `handle` and registers it for id lookups.
    pub fn spawn(&self, handle: &TypeHandle) -> Result<ObjectRef, ModuleError> {
        self.spawn_with_id(handle, None)
    }

    pub fn spawn_with_id(&self, handle: &TypeHandle, id: Option<Uuid>) -> Result<ObjectRef, ModuleError> {
        let object = self.types.spawn(handle, &SpawnParams { id, type_handle: None })?;
        self.objects.register(&object);
        Ok(object)
    }

    pub fn spawn_by_name(&self, type_name: &str) -> Result<ObjectRef, ModuleError> {
        let handle = self.types.find_type(type_name).ok_or_else(|| ModuleError::UnknownTypeName(type_name.to_string()))?;
        self.spawn(&handle)
    }

    pub fn delete_object(&self, object: &ObjectRef) {
        self.objects.delete(object);
    }

    pub fn change_object_id(&self, object: &ObjectRef, new_id: Uuid) {
        self.objects.change_id(object, new_id);
    }

    /// Advances the main-thread queue; the engine calls this once per frame.
    pub fn tick(&self, dt: f32) -> usize {
        self.main_thread.update(dt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::{NativeModule, NativeTypeBuilder};

    #[test]
    fn spawned_objects_are_registered_until_deleted() {
        let host = Scripting::new(RuntimeConfig::default());
        let module = NativeModule::new("Engine");
        module.register(NativeTypeBuilder::new("Actor"));
        host.types.register_module(module);
        let object = host.spawn_by_name("Actor").unwrap();
        assert!(host.objects.find(object.id()).is_some());
        let new_id = Uuid::new_v4();
        host.change_object_id(&object, new_id);
        assert_eq!(host.objects.find(new_id).map(|found| found.id()), Some(new_id));
        host.delete_object(&object);
        assert!(object.is_deleted());
        assert!(host.objects.find(new_id).is_none());
        assert!(matches!(host.spawn_by_name("Pawn"), Err(ModuleError::UnknownTypeName(_))));
    }
}
