use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Weak};

use anyhow::{Context as _, Result};
use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::asset::{AssetState, MethodFlags, ScriptProgram, ScriptSource, VisualScript};
use super::event_table::{self, BoundMethod, EventBinding};
use super::meta::ScriptMetadata;
use super::vtable::{build_dispatch_table, method_id, split_method_id};
use crate::config::StaticEventFanOut;
use crate::diagnostics::Diagnostic;
use crate::error::{AssetError, EvalError, ModuleError};
use crate::events::ListenerId;
use crate::graph::{Graph, GraphData};
use crate::interpreter;
use crate::objects::{ObjectFlags, ObjectRef};
use crate::scripting::Scripting;
use crate::signature::{FieldSignature, MethodSignature};
use crate::types::{BinaryModule, FieldId, MethodId, ScriptingTypeInfo, SpawnParams, TypeHandle, TypeKind};
use crate::variant::Variant;

const MAX_SCRIPT_DEPTH: usize = 64;

struct TypeSlot {
    script: Arc<VisualScript>,
    info: Arc<ScriptingTypeInfo>,
}

#[derive(Default)]
struct ModuleState {
    /// Indexed by type index. Slots are never removed, so handles stay valid across
    /// unload and reload.
    slots: Vec<TypeSlot>,
    by_id: HashMap<Uuid, u32>,
    /// Type names of slots that were unloaded at some point.
    detached_names: Vec<String>,
}

type ChainEntry = (Arc<VisualScript>, Arc<ScriptProgram>);

/// Binary module exposing every visual script as a scripting type.
pub struct VisualScriptingModule {
    host: Weak<Scripting>,
    self_ref: Weak<VisualScriptingModule>,
    state: RwLock<ModuleState>,
    reflection_epoch: AtomicU64,
    listener: Mutex<Option<ListenerId>>,
}

fn stub_info(name: &str) -> Arc<ScriptingTypeInfo> {
    Arc::new(ScriptingTypeInfo {
        name: name.to_string(),
        kind: TypeKind::Script,
        base: None,
        is_abstract: false,
        virtual_methods: Vec::new(),
    })
}

fn is_script_type_name(name: &str) -> bool {
    name.len() == 32 && name.bytes().all(|b| b.is_ascii_hexdigit())
}

fn field_id(type_index: u32, field: usize) -> FieldId {
    FieldId(method_id(type_index, field).0)
}

fn split_field_id(id: FieldId) -> (u32, usize) {
    split_method_id(MethodId(id.0))
}

impl VisualScriptingModule {
    /// Creates the module, registers it with the host type system and hooks it into the
    /// host event bus.
    pub fn install(host: &Arc<Scripting>) -> Arc<Self> {
        let module = Arc::new_cyclic(|self_ref| Self {
            host: Arc::downgrade(host),
            self_ref: self_ref.clone(),
            state: RwLock::new(ModuleState::default()),
            reflection_epoch: AtomicU64::new(0),
            listener: Mutex::new(None),
        });
        host.types.register_module(module.clone());
        let weak = Arc::downgrade(&module);
        let listener = host.events.add_listener(move |object, params, event_type, event_name| {
            if let Some(module) = weak.upgrade() {
                module.dispatch_event(object, params, event_type, event_name);
            }
        });
        *module.listener.lock() = Some(listener);
        info!("visual scripting module installed");
        module
    }

    fn host(&self) -> Option<Arc<Scripting>> {
        self.host.upgrade()
    }

    pub(crate) fn weak_self(&self) -> Weak<VisualScriptingModule> {
        self.self_ref.clone()
    }

    pub(crate) fn reflection_epoch(&self) -> u64 {
        self.reflection_epoch.load(Ordering::Acquire)
    }

    fn dyn_self(&self) -> Weak<dyn BinaryModule> {
        self.self_ref.clone()
    }

    /// Registers a script asset and reserves its type slot. Creating an id that already
    /// exists replaces the stored source and returns the existing asset.
    pub fn create_script(&self, id: Uuid, name: &str, source: ScriptSource) -> Arc<VisualScript> {
        let mut state = self.state.write();
        if let Some(&index) = state.by_id.get(&id) {
            let script = state.slots[index as usize].script.clone();
            script.set_source(source);
            return script;
        }
        let index = state.slots.len() as u32;
        let script = Arc::new(VisualScript::new(id, name, index, source));
        state.slots.push(TypeSlot { script: script.clone(), info: stub_info(script.type_name()) });
        state.by_id.insert(id, index);
        script
    }

    /// Creates (or updates) and loads a script from an in-memory graph document.
    pub fn load_script(
        &self,
        id: Uuid,
        name: &str,
        graph: &GraphData,
        meta: &ScriptMetadata,
    ) -> Result<Arc<VisualScript>, AssetError> {
        let source = ScriptSource::new(graph, meta)?;
        let script = self.create_script(id, name, source);
        if script.program().is_some() {
            self.reload(&script)?;
        } else {
            self.load(&script)?;
        }
        Ok(script)
    }

    pub fn find_script(&self, id: Uuid) -> Option<Arc<VisualScript>> {
        let state = self.state.read();
        state.by_id.get(&id).map(|&index| state.slots[index as usize].script.clone())
    }

    pub fn scripts(&self) -> Vec<Arc<VisualScript>> {
        self.state.read().slots.iter().map(|slot| slot.script.clone()).collect()
    }

    fn script_at(&self, index: u32) -> Option<Arc<VisualScript>> {
        self.state.read().slots.get(index as usize).map(|slot| slot.script.clone())
    }

    /// Script and parameter id a field id refers to.
    fn field_owner(&self, field: FieldId) -> Result<(Arc<VisualScript>, Uuid), EvalError> {
        let (type_index, key) = split_field_id(field);
        let script = self.script_at(type_index).ok_or_else(|| EvalError::MissingType(format!("#{type_index}")))?;
        let param = script.field_param(key).ok_or_else(|| EvalError::UnknownParameter(format!("#{key}")))?;
        Ok((script, param))
    }

    fn find_by_type_name(&self, name: &str) -> Option<Arc<VisualScript>> {
        if !is_script_type_name(name) {
            return None;
        }
        Uuid::parse_str(name).ok().and_then(|id| self.find_script(id))
    }

    pub fn detached_names(&self) -> Vec<String> {
        self.state.read().detached_names.clone()
    }

    /// Handle of the scripting type backing `script`.
    pub fn script_type(&self, script: &VisualScript) -> Option<TypeHandle> {
        let module: Arc<dyn BinaryModule> = self.self_ref.upgrade()?;
        Some(TypeHandle::new(module, script.type_index()))
    }

    /// Script asset behind an object spawned by this module.
    pub fn script_of(&self, object: &ObjectRef) -> Option<Arc<VisualScript>> {
        let handle = object.type_handle();
        if Arc::as_ptr(handle.module()) as *const () != self as *const Self as *const () {
            return None;
        }
        self.script_at(handle.index())
    }

    /// `script` followed by each loaded script it derives from.
    fn script_chain(&self, script: &Arc<VisualScript>) -> Vec<ChainEntry> {
        let mut chain: Vec<ChainEntry> = Vec::new();
        let mut current = Some(script.clone());
        while let Some(script) = current.take() {
            if chain.len() >= MAX_SCRIPT_DEPTH || chain.iter().any(|(seen, _)| seen.id() == script.id()) {
                break;
            }
            let Some(program) = script.program() else { break };
            current = self.find_by_type_name(&program.meta.base_type);
            chain.push((script, program));
        }
        chain
    }

    pub(crate) fn resolve_bound_method(&self, script: &Arc<VisualScript>, name: &str) -> Option<BoundMethod> {
        self.script_chain(script).into_iter().find_map(|(script, program)| {
            program.find_method_by_name(name).map(|index| BoundMethod {
                script: script.id(),
                method: name.to_string(),
                param_count: program.methods[index].signature.params.len(),
            })
        })
    }

    /// Clears every reflection cache and moves the epoch on, so node caches resolved
    /// before this point are never trusted again.
    fn invalidate_reflection(&self) {
        self.reflection_epoch.fetch_add(1, Ordering::AcqRel);
        for script in self.scripts() {
            if let Some(program) = script.program() {
                program.graph.clear_caches();
            }
        }
    }

    pub fn load(&self, script: &Arc<VisualScript>) -> Result<(), AssetError> {
        let host = self.host().ok_or_else(|| AssetError::InvalidData("scripting host was dropped".to_string()))?;
        script.set_state(AssetState::Loading);
        match self.load_program(&host, script) {
            Ok(program) => {
                self.finish_load(&host, script, program);
                Ok(())
            }
            Err(err) => {
                error!(script = %script.type_name(), name = script.name(), "failed to load visual script: {err}");
                script.set_state(AssetState::LoadFailed(err.clone()));
                Err(err)
            }
        }
    }

    fn load_program(&self, host: &Scripting, script: &Arc<VisualScript>) -> Result<Arc<ScriptProgram>, AssetError> {
        let source = script.source();
        let meta = ScriptMetadata::decode(source.metadata.as_deref().ok_or(AssetError::MissingDataChunk("metadata"))?)?;
        let graph = Graph::load(source.graph.as_deref().ok_or(AssetError::MissingDataChunk("graph"))?)?;

        let mut next = Some(meta.base_type.clone());
        for _ in 0..MAX_SCRIPT_DEPTH {
            let Some(name) = next.take() else { break };
            if name == script.type_name() {
                return Err(AssetError::CircularNesting(script.id()));
            }
            next = host.types.find_type(&name).and_then(|handle| handle.info()).and_then(|info| info.base.clone());
        }
        let base = host.types.find_type(&meta.base_type).ok_or_else(|| AssetError::BaseTypeMissing(meta.base_type.clone()))?;
        let native = host
            .types
            .native_ancestor(&base)
            .and_then(|handle| handle.info())
            .ok_or_else(|| AssetError::BaseTypeMissing(meta.base_type.clone()))?;

        let (program, issues) =
            ScriptProgram::build(script.name(), script.type_name(), graph, meta, &native.virtual_methods);
        for issue in issues {
            error!(script = %script.type_name(), node = issue.node_id, "{}", issue.error);
            host.diagnostics.push(Diagnostic {
                error: issue.error,
                script: Some(script.id()),
                node_id: issue.node_id,
                box_id: 0,
                stack_trace: String::new(),
            });
        }
        Ok(Arc::new(program))
    }

    fn finish_load(&self, host: &Scripting, script: &Arc<VisualScript>, program: Arc<ScriptProgram>) {
        let deprecated = program.graph.is_deprecated();
        {
            let mut store = script.instances.lock();
            store.relayout(&program.graph);
            script.set_program(Some(program.clone()));
        }
        if let Some(slot) = self.state.write().slots.get_mut(script.type_index() as usize) {
            slot.info = program.type_info.clone();
        }
        script.set_state(AssetState::Loaded);
        self.rebuild_dispatch_tables();
        self.rebuild_default_instance(script);

        #[cfg(feature = "editor")]
        if deprecated && host.config().resave_deprecated_assets {
            self.resave(script, &program);
        }
        #[cfg(not(feature = "editor"))]
        let _ = deprecated;

        host.types.notify_scripts_reloading();
        info!(
            script = %script.type_name(),
            name = script.name(),
            methods = program.methods.len(),
            fields = program.fields.len(),
            "loaded visual script"
        );
    }

    #[cfg(feature = "editor")]
    fn resave(&self, script: &VisualScript, program: &ScriptProgram) {
        match program.graph.to_data().encode() {
            Ok(bytes) => {
                let mut source = script.source();
                source.graph = Some(bytes);
                script.set_source(source);
                info!(script = %script.type_name(), "re-encoded deprecated graph");
            }
            Err(err) => warn!(script = %script.type_name(), "failed to re-encode deprecated graph: {err}"),
        }
    }

    /// Rebuilds the dispatch table of every loaded script and installs it on its live
    /// objects. Derived scripts depend on their ancestors, so all of them are refreshed.
    fn rebuild_dispatch_tables(&self) {
        let module = self.dyn_self();
        for script in self.scripts() {
            let chain = self.script_chain(&script);
            let Some((_, program)) = chain.first() else { continue };
            let entries: Vec<(u32, Arc<ScriptProgram>)> =
                chain.iter().map(|(script, program)| (script.type_index(), program.clone())).collect();
            let table = Arc::new(build_dispatch_table(&module, &program.type_info.virtual_methods, &entries));
            *script.dispatch.write() = table.clone();

            let objects: Vec<ObjectRef> =
                script.instances.lock().iter().filter_map(|(_, instance)| instance.object()).collect();
            for object in objects {
                if object.type_handle().index() == script.type_index()
                    && self.script_of(&object).is_some_and(|owner| Arc::ptr_eq(&owner, &script))
                {
                    object.set_dispatch_table(Some(table.clone()));
                }
            }
        }
    }

    fn rebuild_default_instance(&self, script: &Arc<VisualScript>) {
        if let Some(previous) = script.default_instance.write().take() {
            self.forget_instance(previous.id());
        }
        match self.spawn_script(script, &SpawnParams::default()) {
            Ok(object) => *script.default_instance.write() = Some(object),
            Err(err) => warn!(script = %script.type_name(), "failed to spawn default instance: {err}"),
        }
    }

    fn forget_instance(&self, id: Uuid) {
        for script in self.scripts() {
            script.instances.lock().remove(id);
        }
    }

    /// Unloads a script. With `reloading` the instances are kept, still in their old
    /// parameter layout, until the next load migrates them.
    pub fn unload(&self, script: &Arc<VisualScript>, reloading: bool) {
        script.set_state(AssetState::Unloaded);
        if let Some(default_instance) = script.default_instance.write().take() {
            self.forget_instance(default_instance.id());
        }

        if !reloading {
            let drained = script.instances.lock().drain();
            let host = self.host();
            for (_, instance) in drained {
                let object = instance.object();
                if let Some(host) = &host {
                    release_bindings(host, object.as_ref(), &instance.event_bindings);
                }
                if let Some(object) = object.filter(|object| object.type_handle().index() == script.type_index()) {
                    object.set_dispatch_table(None);
                }
            }
        }
        script.set_program(None);

        {
            let mut state = self.state.write();
            if let Some(slot) = state.slots.get_mut(script.type_index() as usize) {
                slot.info = stub_info(script.type_name());
            }
            if !state.detached_names.iter().any(|name| name == script.type_name()) {
                state.detached_names.push(script.type_name().to_string());
            }
        }
        match self.host() {
            Some(host) => host.types.notify_scripts_reloading(),
            None => self.invalidate_reflection(),
        }
        debug!(script = %script.type_name(), reloading, "unloaded visual script");
    }

    /// Unload followed by load, keeping live instances and their edited parameters.
    pub fn reload(&self, script: &Arc<VisualScript>) -> Result<(), AssetError> {
        self.unload(script, true);
        self.load(script)
    }

    /// Replaces the graph chunk with the contents of `path` and reloads when the content
    /// changed. Files may hold a JSON graph document or an encoded graph blob. Returns
    /// whether a reload happened.
    pub fn reload_from_file(&self, script: &Arc<VisualScript>, path: &Path) -> Result<bool> {
        let bytes = std::fs::read(path).with_context(|| format!("reading graph {}", path.display()))?;
        let graph = if bytes.first() == Some(&b'{') {
            let text = std::str::from_utf8(&bytes).with_context(|| format!("graph {} is not UTF-8", path.display()))?;
            let data: GraphData =
                serde_json::from_str(text).with_context(|| format!("parsing graph {}", path.display()))?;
            data.encode()?
        } else {
            bytes
        };
        let mut source = script.source();
        source.graph = Some(graph);
        if source.content_hash() == script.content_hash() && script.is_loaded() {
            debug!(script = %script.type_name(), "graph unchanged; skipping reload");
            return Ok(false);
        }
        script.set_source(source);
        self.reload(script).with_context(|| format!("reloading {}", script.name()))?;
        Ok(true)
    }

    fn spawn_script(&self, script: &Arc<VisualScript>, params: &SpawnParams) -> Result<ObjectRef, ModuleError> {
        let unknown = || ModuleError::UnknownTypeName(script.type_name().to_string());
        let host = self.host().ok_or_else(unknown)?;
        let program = script.program().ok_or_else(unknown)?;
        let own = self.script_type(script).ok_or_else(unknown)?;
        let base = host
            .types
            .find_type(&program.meta.base_type)
            .ok_or_else(|| ModuleError::UnknownTypeName(program.meta.base_type.clone()))?;
        let native = host.types.native_ancestor(&base).ok_or_else(unknown)?;
        let object = host.types.spawn(
            &native,
            &SpawnParams { id: params.id, type_handle: Some(params.type_handle.clone().unwrap_or(own)) },
        )?;
        object.set_dispatch_table(Some(script.dispatch.read().clone()));
        object.add_flags(ObjectFlags::CUSTOM_SCRIPTING_TYPE);
        for (script, _) in self.script_chain(script) {
            script.instances.lock().spawn(&object);
        }
        debug!(script = %script.type_name(), object = %object.id().simple(), "spawned script instance");
        Ok(object)
    }

    /// Spawns a registered instance of `script`.
    pub fn spawn(&self, script: &VisualScript) -> Result<ObjectRef, ModuleError> {
        self.spawn_with_id(script, None)
    }

    pub fn spawn_with_id(&self, script: &VisualScript, id: Option<Uuid>) -> Result<ObjectRef, ModuleError> {
        let host = self.host().ok_or_else(|| ModuleError::UnknownTypeName(script.type_name().to_string()))?;
        let handle = self.script_type(script).ok_or(ModuleError::TypeIndexOutOfRange(script.type_index()))?;
        host.spawn_with_id(&handle, id)
    }

    /// Runs a graph method of `script` on `instance` (`None` for static functions).
    pub fn invoke(
        &self,
        script: &Arc<VisualScript>,
        method: &str,
        instance: Option<&ObjectRef>,
        params: &[Variant],
    ) -> Result<Variant, EvalError> {
        let host = self.host().ok_or_else(|| EvalError::InvocationFailed("scripting host was dropped".to_string()))?;
        for (owner, program) in self.script_chain(script) {
            if let Some(index) = program.find_method(method, params.len()) {
                if instance.is_none() && !program.methods[index].flags.contains(MethodFlags::STATIC) {
                    return Err(EvalError::MissingInstance);
                }
                return Ok(interpreter::invoke(self, &host, &owner, &program, index, instance, params));
            }
        }
        Err(EvalError::MissingMethod {
            type_name: script.type_name().to_string(),
            method: method.to_string(),
            params: params.len(),
        })
    }

    /// Calls a graph method on an object spawned from a script.
    pub fn call_method(&self, object: &ObjectRef, method: &str, params: &[Variant]) -> Result<Variant, EvalError> {
        let script = self.script_of(object).ok_or_else(|| EvalError::MissingType(object.type_name()))?;
        self.invoke(&script, method, Some(object), params)
    }

    /// Queues a method call for the main thread; the receiver yields its result once the
    /// host has ticked the queue.
    pub fn invoke_on_main_thread(
        &self,
        object: ObjectRef,
        method: impl Into<String>,
        params: Vec<Variant>,
    ) -> Result<Receiver<Result<Variant, EvalError>>, EvalError> {
        let host = self.host().ok_or_else(|| EvalError::InvocationFailed("scripting host was dropped".to_string()))?;
        let module = self.self_ref.clone();
        let method = method.into();
        Ok(host.main_thread.post_invoke(move || {
            let module = module
                .upgrade()
                .ok_or_else(|| EvalError::InvocationFailed("visual scripting module was dropped".to_string()))?;
            module.call_method(&object, &method, &params)
        }))
    }

    /// Evaluates one box of a script graph. `None` when the script, node or instance no
    /// longer exists.
    pub fn evaluate(&self, script_id: Uuid, node_id: u32, box_id: u32, instance_id: Option<Uuid>) -> Option<Variant> {
        let host = self.host()?;
        let script = self.find_script(script_id)?;
        let program = script.program()?;
        let node = program.graph.find_node(node_id)?;
        let instance = match instance_id {
            Some(id) => Some(host.objects.find(id).filter(|_| script.instances.lock().contains(id))?),
            None => None,
        };
        Some(interpreter::evaluate(self, &host, &script, &program, node, box_id, instance.as_ref()))
    }

    pub fn default_instance(&self, script: &VisualScript) -> Option<ObjectRef> {
        script.default_instance()
    }

    /// Routes a host event to bound graph methods. Object events walk the object's script
    /// chain; static events scan every script's instances.
    pub fn dispatch_event(&self, object: Option<&ObjectRef>, params: &mut [Variant], event_type: &str, event_name: &str) {
        let Some(host) = self.host() else { return };
        match object {
            Some(object) => {
                let Some(script) = self.script_of(object) else { return };
                let mut calls = Vec::new();
                for (owner, _) in self.script_chain(&script) {
                    if let Some(instance) = owner.instances.lock().get(object.id()) {
                        calls.extend(event_table::bound_methods(&instance.event_bindings, event_type, event_name));
                    }
                }
                for bound in calls {
                    self.call_bound(&host, &bound, Some(object), params);
                }
            }
            None => {
                let fan_out = host.config().static_event_fan_out;
                for script in self.scripts() {
                    let calls: Vec<(ObjectRef, BoundMethod)> = script
                        .instances
                        .lock()
                        .iter()
                        .filter_map(|(_, instance)| instance.object().map(|object| (object, instance)))
                        .flat_map(|(object, instance)| {
                            event_table::bound_methods(&instance.event_bindings, event_type, event_name)
                                .into_iter()
                                .map(move |bound| (object.clone(), bound))
                        })
                        .collect();
                    if calls.is_empty() {
                        continue;
                    }
                    for (object, bound) in &calls {
                        self.call_bound(&host, bound, Some(object), params);
                    }
                    if fan_out == StaticEventFanOut::FirstScript {
                        break;
                    }
                }
            }
        }
    }

    fn call_bound(&self, host: &Scripting, bound: &BoundMethod, object: Option<&ObjectRef>, params: &mut [Variant]) {
        let Some(script) = self.find_script(bound.script) else { return };
        let Some(program) = script.program() else { return };
        let Some(index) = program
            .find_method(&bound.method, bound.param_count)
            .or_else(|| program.find_method_by_name(&bound.method))
        else {
            warn!(script = %script.type_name(), method = %bound.method, "bound method no longer exists");
            return;
        };
        interpreter::invoke(self, host, &script, &program, index, object, params);
    }
}

/// Unsubscribes every event an instance still had handlers for.
fn release_bindings(host: &Scripting, object: Option<&ObjectRef>, bindings: &[EventBinding]) {
    for binding in bindings.iter().filter(|binding| !binding.methods.is_empty()) {
        if let Some(event) = host.events.find(&binding.event_type, &binding.event_name) {
            (event.binder)(if event.is_static { None } else { object }, false);
        }
    }
}

impl BinaryModule for VisualScriptingModule {
    fn name(&self) -> &str {
        "VisualScripting"
    }

    fn type_info(&self, index: u32) -> Option<Arc<ScriptingTypeInfo>> {
        self.state.read().slots.get(index as usize).map(|slot| slot.info.clone())
    }

    fn find_scripting_type(&self, name: &str) -> Option<u32> {
        let script = self.find_by_type_name(name)?;
        script.program().map(|_| script.type_index())
    }

    fn spawn(&self, index: u32, params: &SpawnParams) -> Result<ObjectRef, ModuleError> {
        let script = self.script_at(index).ok_or(ModuleError::TypeIndexOutOfRange(index))?;
        self.spawn_script(&script, params)
    }

    fn find_method(&self, index: u32, name: &str, num_params: usize) -> Option<MethodId> {
        let script = self.script_at(index)?;
        self.script_chain(&script).into_iter().find_map(|(owner, program)| {
            program.find_method(name, num_params).map(|method| method_id(owner.type_index(), method))
        })
    }

    fn invoke_method(&self, method: MethodId, instance: Option<&ObjectRef>, params: &mut [Variant]) -> Result<Variant, EvalError> {
        let (type_index, index) = split_method_id(method);
        let host = self.host().ok_or_else(|| EvalError::InvocationFailed("scripting host was dropped".to_string()))?;
        let script = self.script_at(type_index).ok_or_else(|| EvalError::MissingType(format!("#{type_index}")))?;
        let program = script.program().ok_or_else(|| EvalError::MissingType(script.type_name().to_string()))?;
        let entry = program.methods.get(index).ok_or_else(|| EvalError::MissingMethod {
            type_name: script.type_name().to_string(),
            method: format!("#{index}"),
            params: params.len(),
        })?;
        if instance.is_none() && !entry.flags.contains(MethodFlags::STATIC) {
            return Err(EvalError::MissingInstance);
        }
        Ok(interpreter::invoke(self, &host, &script, &program, index, instance, params))
    }

    fn get_method_signature(&self, method: MethodId) -> Option<MethodSignature> {
        let (type_index, index) = split_method_id(method);
        let program = self.script_at(type_index)?.program()?;
        let entry = program.methods.get(index)?;
        let mut signature = entry.signature.clone();
        signature.name = entry.name.clone();
        signature.is_static = entry.flags.contains(MethodFlags::STATIC);
        Some(signature)
    }

    fn find_field(&self, index: u32, name: &str) -> Option<FieldId> {
        let script = self.script_at(index)?;
        self.script_chain(&script).into_iter().find_map(|(owner, program)| {
            program.find_field(name).map(|field| field_id(owner.type_index(), owner.field_key(field.id)))
        })
    }

    fn get_field_signature(&self, field: FieldId) -> Option<FieldSignature> {
        let (script, param) = self.field_owner(field).ok()?;
        let program = script.program()?;
        let param = program.graph.find_parameter(param)?;
        Some(FieldSignature { name: param.name.clone(), ty: param.ty.clone(), is_static: false })
    }

    fn get_field_value(&self, field: FieldId, instance: Option<&ObjectRef>) -> Result<Variant, EvalError> {
        let instance = instance.ok_or(EvalError::MissingInstance)?;
        let (script, param) = self.field_owner(field)?;
        let value = script.instances.lock().param(instance.id(), param);
        value
    }

    fn set_field_value(&self, field: FieldId, instance: Option<&ObjectRef>, value: Variant) -> Result<(), EvalError> {
        let instance = instance.ok_or(EvalError::MissingInstance)?;
        let (script, param) = self.field_owner(field)?;
        let result = script.instances.lock().set_param(instance.id(), param, value);
        result
    }

    fn serialize_object(&self, object: &ObjectRef, baseline: Option<&ObjectRef>) -> Map<String, Value> {
        let mut out = Map::new();
        let Some(script) = self.script_of(object) else { return out };
        for (owner, _) in self.script_chain(&script).into_iter().rev() {
            out.extend(owner.instances.lock().serialize(object.id(), baseline.map(|base| base.id())));
        }
        out
    }

    fn deserialize_object(&self, object: &ObjectRef, data: &Map<String, Value>) {
        let Some(script) = self.script_of(object) else { return };
        let host = self.host();
        let objects = host.as_ref().map(|host| &host.objects);
        for (owner, _) in self.script_chain(&script) {
            owner.instances.lock().deserialize(object.id(), data, objects);
        }
    }

    fn on_object_id_changed(&self, old_id: Uuid, new_id: Uuid) {
        for script in self.scripts() {
            script.instances.lock().rename(old_id, new_id);
        }
    }

    fn on_object_deleted(&self, id: Uuid) {
        let host = self.host();
        for script in self.scripts() {
            let removed = script.instances.lock().remove(id);
            if let (Some(instance), Some(host)) = (removed, &host) {
                release_bindings(host, instance.object().as_ref(), &instance.event_bindings);
            }
        }
    }

    fn on_scripts_reloading(&self) {
        self.invalidate_reflection();
    }
}

impl Drop for VisualScriptingModule {
    fn drop(&mut self) {
        if let (Some(host), Some(listener)) = (self.host.upgrade(), self.listener.lock().take()) {
            host.events.remove_listener(listener);
        }
    }
}
