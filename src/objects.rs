use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};

use bitflags::bitflags;
use parking_lot::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::error::EvalError;
use crate::types::{BinaryModule, MethodId, TypeHandle};
use crate::variant::Variant;

pub type ObjectRef = Arc<ScriptingObject>;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ObjectFlags: u32 {
        /// The object's dispatch table was installed by a scripting module.
        const CUSTOM_SCRIPTING_TYPE = 1 << 0;
        const DELETED = 1 << 1;
    }
}

/// One entry per virtual method of the native base type, in declaration order.
#[derive(Clone)]
pub enum DispatchSlot {
    /// No override: the native base implementation runs.
    Base,
    Override { module: Weak<dyn BinaryModule>, method: MethodId },
}

impl fmt::Debug for DispatchSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchSlot::Base => f.write_str("Base"),
            DispatchSlot::Override { method, .. } => write!(f, "Override({method:?})"),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DispatchTable {
    pub slots: Vec<DispatchSlot>,
}

impl DispatchTable {
    pub fn overridden(&self) -> usize {
        self.slots.iter().filter(|slot| matches!(slot, DispatchSlot::Override { .. })).count()
    }
}

/// Host-engine object. Its type handle never changes; scripting modules swap the
/// dispatch table in place so live objects observe reloaded overrides.
pub struct ScriptingObject {
    id: RwLock<Uuid>,
    type_handle: TypeHandle,
    flags: AtomicU32,
    dispatch: RwLock<Option<Arc<DispatchTable>>>,
    native_fields: RwLock<HashMap<String, Variant>>,
}

impl ScriptingObject {
    pub fn new(type_handle: TypeHandle, id: Option<Uuid>) -> ObjectRef {
        Arc::new(Self {
            id: RwLock::new(id.unwrap_or_else(Uuid::new_v4)),
            type_handle,
            flags: AtomicU32::new(0),
            dispatch: RwLock::new(None),
            native_fields: RwLock::new(HashMap::new()),
        })
    }

    pub fn id(&self) -> Uuid {
        *self.id.read()
    }

    pub fn type_handle(&self) -> &TypeHandle {
        &self.type_handle
    }

    pub fn type_name(&self) -> String {
        self.type_handle.type_name()
    }

    pub fn flags(&self) -> ObjectFlags {
        ObjectFlags::from_bits_truncate(self.flags.load(Ordering::Acquire))
    }

    pub fn add_flags(&self, flags: ObjectFlags) {
        self.flags.fetch_or(flags.bits(), Ordering::AcqRel);
    }

    pub fn is_deleted(&self) -> bool {
        self.flags().contains(ObjectFlags::DELETED)
    }

    pub fn dispatch_table(&self) -> Option<Arc<DispatchTable>> {
        self.dispatch.read().clone()
    }

    pub fn set_dispatch_table(&self, table: Option<Arc<DispatchTable>>) {
        *self.dispatch.write() = table;
    }

    pub fn native_field(&self, name: &str) -> Option<Variant> {
        self.native_fields.read().get(name).cloned()
    }

    pub fn set_native_field(&self, name: impl Into<String>, value: Variant) {
        self.native_fields.write().insert(name.into(), value);
    }

    /// Calls a virtual method of the native base type, honouring graph overrides.
    pub fn call_virtual(self: &Arc<Self>, name: &str, params: &mut [Variant]) -> Result<Variant, EvalError> {
        let info = self
            .type_handle
            .info()
            .ok_or_else(|| EvalError::MissingType(self.type_handle.type_name()))?;
        let slot = info.find_virtual(name, params.len()).ok_or_else(|| EvalError::MissingMethod {
            type_name: info.name.clone(),
            method: name.to_string(),
            params: params.len(),
        })?;
        if let Some(table) = self.dispatch_table() {
            if let Some(DispatchSlot::Override { module, method }) = table.slots.get(slot) {
                if let Some(module) = module.upgrade() {
                    return module.invoke_method(*method, Some(self), params);
                }
            }
        }
        (info.virtual_methods[slot].base)(Some(self), params)
    }

    fn set_id(&self, id: Uuid) {
        *self.id.write() = id;
    }
}

impl fmt::Debug for ScriptingObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptingObject")
            .field("id", &self.id().simple().to_string())
            .field("type", &self.type_name())
            .field("flags", &self.flags())
            .finish()
    }
}

/// Id → object lookup plus the lifecycle events scripting modules listen to.
#[derive(Default)]
pub struct ObjectRegistry {
    objects: RwLock<HashMap<Uuid, Weak<ScriptingObject>>>,
}

impl ObjectRegistry {
    pub fn new() -> Self {
        Self { objects: RwLock::new(HashMap::new()) }
    }

    pub fn register(&self, object: &ObjectRef) {
        self.objects.write().insert(object.id(), Arc::downgrade(object));
    }

    pub fn find(&self, id: Uuid) -> Option<ObjectRef> {
        self.objects.read().get(&id).and_then(Weak::upgrade).filter(|object| !object.is_deleted())
    }

    pub fn change_id(&self, object: &ObjectRef, new_id: Uuid) {
        let old_id = object.id();
        if old_id == new_id {
            return;
        }
        {
            let mut objects = self.objects.write();
            objects.remove(&old_id);
            object.set_id(new_id);
            objects.insert(new_id, Arc::downgrade(object));
        }
        debug!(old = %old_id.simple(), new = %new_id.simple(), "object id changed");
        object.type_handle().module().on_object_id_changed(old_id, new_id);
    }

    pub fn delete(&self, object: &ObjectRef) {
        if object.is_deleted() {
            return;
        }
        object.add_flags(ObjectFlags::DELETED);
        let id = object.id();
        self.objects.write().remove(&id);
        object.type_handle().module().on_object_deleted(id);
    }
}
