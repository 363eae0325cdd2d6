//! Scripting type system seam: binary modules expose types, methods and fields that the
//! interpreter reflects into.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Map;
use uuid::Uuid;

use crate::error::{EvalError, ModuleError};
use crate::objects::ObjectRef;
use crate::signature::{FieldSignature, MethodSignature};
use crate::variant::Variant;

/// Host-supplied implementation of a method. `None` instance means a static call.
pub type NativeFn = Arc<dyn Fn(Option<&ObjectRef>, &mut [Variant]) -> Result<Variant, EvalError> + Send + Sync>;

/// Opaque per-module method handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MethodId(pub u64);

/// Opaque per-module field handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FieldId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeKind {
    Native,
    Class,
    Script,
}

#[derive(Clone)]
pub struct VirtualMethodInfo {
    pub signature: MethodSignature,
    pub base: NativeFn,
}

impl fmt::Debug for VirtualMethodInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VirtualMethodInfo").field("signature", &self.signature).finish()
    }
}

#[derive(Debug, Clone)]
pub struct ScriptingTypeInfo {
    pub name: String,
    pub kind: TypeKind,
    pub base: Option<String>,
    pub is_abstract: bool,
    /// Virtual methods of the nearest native ancestor, inherited entries first.
    pub virtual_methods: Vec<VirtualMethodInfo>,
}

impl ScriptingTypeInfo {
    pub fn find_virtual(&self, name: &str, num_params: usize) -> Option<usize> {
        self.virtual_methods
            .iter()
            .position(|method| method.signature.name == name && method.signature.params.len() == num_params)
    }
}

/// Options forwarded to [`BinaryModule::spawn`].
#[derive(Debug, Clone, Default)]
pub struct SpawnParams {
    pub id: Option<Uuid>,
    /// Most-derived type when a script type spawns through its native ancestor.
    pub type_handle: Option<TypeHandle>,
}

pub trait BinaryModule: Send + Sync {
    fn name(&self) -> &str;

    fn type_info(&self, index: u32) -> Option<Arc<ScriptingTypeInfo>>;

    fn find_scripting_type(&self, name: &str) -> Option<u32>;

    /// Managed classes that are not registered scripting types.
    fn find_class(&self, _name: &str) -> Option<u32> {
        None
    }

    /// Creates an object of type `index`. The caller registers it with the object registry.
    fn spawn(&self, index: u32, params: &SpawnParams) -> Result<ObjectRef, ModuleError>;

    fn find_method(&self, index: u32, name: &str, num_params: usize) -> Option<MethodId>;

    fn invoke_method(
        &self,
        method: MethodId,
        instance: Option<&ObjectRef>,
        params: &mut [Variant],
    ) -> Result<Variant, EvalError>;

    fn get_method_signature(&self, method: MethodId) -> Option<MethodSignature>;

    fn find_field(&self, index: u32, name: &str) -> Option<FieldId>;

    fn get_field_signature(&self, field: FieldId) -> Option<FieldSignature>;

    fn get_field_value(&self, field: FieldId, instance: Option<&ObjectRef>) -> Result<Variant, EvalError>;

    fn set_field_value(&self, field: FieldId, instance: Option<&ObjectRef>, value: Variant)
        -> Result<(), EvalError>;

    fn serialize_object(&self, _object: &ObjectRef, _baseline: Option<&ObjectRef>) -> Map<String, serde_json::Value> {
        Map::new()
    }

    fn deserialize_object(&self, _object: &ObjectRef, _data: &Map<String, serde_json::Value>) {}

    fn on_object_id_changed(&self, _old_id: Uuid, _new_id: Uuid) {}

    fn on_object_deleted(&self, _id: Uuid) {}

    fn on_scripts_reloading(&self) {}
}

/// Stable `(module, index)` pair identifying a scripting type.
#[derive(Clone)]
pub struct TypeHandle {
    module: Arc<dyn BinaryModule>,
    index: u32,
}

impl TypeHandle {
    pub fn new(module: Arc<dyn BinaryModule>, index: u32) -> Self {
        Self { module, index }
    }

    pub fn module(&self) -> &Arc<dyn BinaryModule> {
        &self.module
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn info(&self) -> Option<Arc<ScriptingTypeInfo>> {
        self.module.type_info(self.index)
    }

    pub fn type_name(&self) -> String {
        self.info().map(|info| info.name.clone()).unwrap_or_default()
    }

    fn module_ptr(&self) -> *const () {
        Arc::as_ptr(&self.module) as *const ()
    }
}

impl PartialEq for TypeHandle {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index && self.module_ptr() == other.module_ptr()
    }
}

impl Eq for TypeHandle {}

impl fmt::Debug for TypeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeHandle({}#{} {})", self.module.name(), self.index, self.type_name())
    }
}

const MAX_BASE_DEPTH: usize = 64;

/// Every binary module known to the host, searched in registration order.
#[derive(Default)]
pub struct TypeRegistry {
    modules: RwLock<Vec<Arc<dyn BinaryModule>>>,
    managed: RwLock<Option<Arc<dyn BinaryModule>>>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_module(&self, module: Arc<dyn BinaryModule>) {
        self.modules.write().push(module);
    }

    /// Module answering managed-class lookups for the Invoke Method fallback.
    pub fn set_managed_module(&self, module: Arc<dyn BinaryModule>) {
        *self.managed.write() = Some(module);
    }

    pub fn modules(&self) -> Vec<Arc<dyn BinaryModule>> {
        self.modules.read().clone()
    }

    pub fn find_type(&self, name: &str) -> Option<TypeHandle> {
        if name.is_empty() {
            return None;
        }
        let modules = self.modules.read();
        modules
            .iter()
            .find_map(|module| module.find_scripting_type(name).map(|index| TypeHandle::new(module.clone(), index)))
    }

    pub fn find_managed_class(&self, name: &str) -> Option<TypeHandle> {
        let managed = self.managed.read().clone()?;
        managed.find_class(name).map(|index| TypeHandle::new(managed, index))
    }

    pub fn base_of(&self, handle: &TypeHandle) -> Option<TypeHandle> {
        let base = handle.info()?.base.clone()?;
        self.find_type(&base)
    }

    /// Whether `handle` is `ancestor` or derives from it.
    pub fn is_a(&self, handle: &TypeHandle, ancestor: &TypeHandle) -> bool {
        let mut current = Some(handle.clone());
        for _ in 0..MAX_BASE_DEPTH {
            match current {
                Some(ty) if ty == *ancestor => return true,
                Some(ty) => current = self.base_of(&ty),
                None => return false,
            }
        }
        false
    }

    pub fn is_a_name(&self, handle: &TypeHandle, ancestor: &str) -> bool {
        match self.find_type(ancestor) {
            Some(ancestor) => self.is_a(handle, &ancestor),
            None => false,
        }
    }

    /// Nearest ancestor (or self) whose type is provided natively.
    pub fn native_ancestor(&self, handle: &TypeHandle) -> Option<TypeHandle> {
        let mut current = Some(handle.clone());
        for _ in 0..MAX_BASE_DEPTH {
            let ty = current?;
            if ty.info().map(|info| info.kind != TypeKind::Script).unwrap_or(false) {
                return Some(ty);
            }
            current = self.base_of(&ty);
        }
        None
    }

    pub fn spawn(&self, handle: &TypeHandle, params: &SpawnParams) -> Result<ObjectRef, ModuleError> {
        handle.module().spawn(handle.index(), params)
    }

    pub fn notify_scripts_reloading(&self) {
        for module in self.modules() {
            module.on_scripts_reloading();
        }
    }
}
