//! Host-defined types: the native side of the scripting type system.

use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use crate::error::{EvalError, ModuleError};
use crate::objects::{ObjectRef, ScriptingObject};
use crate::signature::{FieldSignature, MethodSignature};
use crate::types::{
    BinaryModule, FieldId, MethodId, NativeFn, ScriptingTypeInfo, SpawnParams, TypeHandle, TypeKind,
    VirtualMethodInfo,
};
use crate::variant::{Variant, VariantType};

pub struct NativeTypeBuilder {
    name: String,
    base: Option<String>,
    is_abstract: bool,
    virtuals: Vec<(MethodSignature, NativeFn)>,
    methods: Vec<(MethodSignature, NativeFn)>,
    fields: Vec<(FieldSignature, Variant)>,
}

impl NativeTypeBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base: None,
            is_abstract: false,
            virtuals: Vec::new(),
            methods: Vec::new(),
            fields: Vec::new(),
        }
    }

    pub fn base(mut self, base: impl Into<String>) -> Self {
        self.base = Some(base.into());
        self
    }

    pub fn abstract_type(mut self) -> Self {
        self.is_abstract = true;
        self
    }

    /// Virtual method with its base implementation. Scripts deriving from the type may
    /// override it by name and parameter count.
    pub fn virtual_method<F>(mut self, signature: MethodSignature, body: F) -> Self
    where
        F: Fn(Option<&ObjectRef>, &mut [Variant]) -> Result<Variant, EvalError> + Send + Sync + 'static,
    {
        self.virtuals.push((signature, Arc::new(body)));
        self
    }

    pub fn method<F>(mut self, signature: MethodSignature, body: F) -> Self
    where
        F: Fn(Option<&ObjectRef>, &mut [Variant]) -> Result<Variant, EvalError> + Send + Sync + 'static,
    {
        self.methods.push((signature, Arc::new(body)));
        self
    }

    pub fn field(mut self, name: impl Into<String>, ty: VariantType) -> Self {
        let default = ty.default_value();
        self.fields.push((FieldSignature { name: name.into(), ty, is_static: false }, default));
        self
    }

    pub fn static_field(mut self, name: impl Into<String>, value: Variant) -> Self {
        let ty = value.variant_type();
        self.fields.push((FieldSignature { name: name.into(), ty, is_static: true }, value));
        self
    }
}

struct NativeType {
    info: Arc<ScriptingTypeInfo>,
    methods: Vec<usize>,
    fields: Vec<usize>,
}

struct NativeMethod {
    signature: MethodSignature,
    body: NativeFn,
    is_virtual: bool,
}

struct NativeField {
    signature: FieldSignature,
    /// Default for instance fields, the live value for static ones.
    value: Variant,
}

#[derive(Default)]
struct NativeState {
    types: Vec<NativeType>,
    methods: Vec<NativeMethod>,
    fields: Vec<NativeField>,
}

/// Binary module backed by Rust closures.
pub struct NativeModule {
    name: String,
    managed: bool,
    self_ref: Weak<NativeModule>,
    state: RwLock<NativeState>,
}

impl NativeModule {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Self::build(name.into(), false)
    }

    /// Module whose types are only reachable as managed classes (`find_class`).
    pub fn managed(name: impl Into<String>) -> Arc<Self> {
        Self::build(name.into(), true)
    }

    fn build(name: String, managed: bool) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self { name, managed, self_ref: self_ref.clone(), state: RwLock::default() })
    }

    pub fn register(self: &Arc<Self>, builder: NativeTypeBuilder) -> TypeHandle {
        let mut state = self.state.write();
        let mut virtual_methods = builder
            .base
            .as_deref()
            .and_then(|base| state.types.iter().find(|ty| ty.info.name == base))
            .map(|base| base.info.virtual_methods.clone())
            .unwrap_or_default();

        let mut methods = Vec::new();
        for (signature, body) in builder.virtuals {
            let entry = VirtualMethodInfo { signature: signature.clone(), base: body.clone() };
            match virtual_methods.iter_mut().find(|existing| {
                existing.signature.name == signature.name && existing.signature.params.len() == signature.params.len()
            }) {
                Some(existing) => *existing = entry,
                None => virtual_methods.push(entry),
            }
            methods.push(state.methods.len());
            state.methods.push(NativeMethod { signature, body, is_virtual: true });
        }
        for (signature, body) in builder.methods {
            methods.push(state.methods.len());
            state.methods.push(NativeMethod { signature, body, is_virtual: false });
        }
        let mut fields = Vec::new();
        for (signature, value) in builder.fields {
            fields.push(state.fields.len());
            state.fields.push(NativeField { signature, value });
        }

        let info = ScriptingTypeInfo {
            name: builder.name,
            kind: if self.managed { TypeKind::Class } else { TypeKind::Native },
            base: builder.base,
            is_abstract: builder.is_abstract,
            virtual_methods,
        };
        let index = state.types.len() as u32;
        state.types.push(NativeType { info: Arc::new(info), methods, fields });
        TypeHandle::new(self.clone(), index)
    }

    fn index_of(&self, name: &str) -> Option<u32> {
        self.state.read().types.iter().position(|ty| ty.info.name == name).map(|index| index as u32)
    }

    /// Type chain within this module, starting at `index`.
    fn chain(state: &NativeState, index: u32) -> Vec<usize> {
        let mut chain = Vec::new();
        let mut current = Some(index as usize);
        while let Some(idx) = current {
            if chain.contains(&idx) || idx >= state.types.len() {
                break;
            }
            chain.push(idx);
            current = state.types[idx]
                .info
                .base
                .as_deref()
                .and_then(|base| state.types.iter().position(|ty| ty.info.name == base));
        }
        chain
    }

    fn field_slot(&self, field: FieldId) -> Result<(FieldSignature, Variant), EvalError> {
        let state = self.state.read();
        state
            .fields
            .get(field.0 as usize)
            .map(|entry| (entry.signature.clone(), entry.value.clone()))
            .ok_or_else(|| EvalError::InvocationFailed(format!("unknown field handle {}", field.0)))
    }
}

impl BinaryModule for NativeModule {
    fn name(&self) -> &str {
        &self.name
    }

    fn type_info(&self, index: u32) -> Option<Arc<ScriptingTypeInfo>> {
        self.state.read().types.get(index as usize).map(|ty| ty.info.clone())
    }

    fn find_scripting_type(&self, name: &str) -> Option<u32> {
        if self.managed {
            return None;
        }
        self.index_of(name)
    }

    fn find_class(&self, name: &str) -> Option<u32> {
        if !self.managed {
            return None;
        }
        self.index_of(name)
    }

    fn spawn(&self, index: u32, params: &SpawnParams) -> Result<ObjectRef, ModuleError> {
        let module: Arc<dyn BinaryModule> =
            self.self_ref.upgrade().ok_or(ModuleError::TypeIndexOutOfRange(index))?;
        let state = self.state.read();
        let ty = state.types.get(index as usize).ok_or(ModuleError::TypeIndexOutOfRange(index))?;
        if ty.info.is_abstract && params.type_handle.is_none() {
            return Err(ModuleError::UnknownTypeName(format!("{} is abstract", ty.info.name)));
        }
        let handle = params.type_handle.clone().unwrap_or_else(|| TypeHandle::new(module, index));
        let object = ScriptingObject::new(handle, params.id);
        for type_index in Self::chain(&state, index) {
            for &field in &state.types[type_index].fields {
                let field = &state.fields[field];
                if !field.signature.is_static {
                    object.set_native_field(field.signature.name.clone(), field.value.clone());
                }
            }
        }
        Ok(object)
    }

    fn find_method(&self, index: u32, name: &str, num_params: usize) -> Option<MethodId> {
        let state = self.state.read();
        Self::chain(&state, index).into_iter().find_map(|type_index| {
            state.types[type_index]
                .methods
                .iter()
                .copied()
                .find(|&method| {
                    let signature = &state.methods[method].signature;
                    signature.name == name && signature.params.len() == num_params
                })
                .map(|method| MethodId(method as u64))
        })
    }

    fn invoke_method(
        &self,
        method: MethodId,
        instance: Option<&ObjectRef>,
        params: &mut [Variant],
    ) -> Result<Variant, EvalError> {
        let (signature, body, is_virtual) = {
            let state = self.state.read();
            let entry = state
                .methods
                .get(method.0 as usize)
                .ok_or_else(|| EvalError::InvocationFailed(format!("unknown method handle {}", method.0)))?;
            (entry.signature.clone(), entry.body.clone(), entry.is_virtual)
        };
        if signature.is_static {
            return body(None, params);
        }
        let instance = instance.ok_or(EvalError::MissingInstance)?;
        if is_virtual {
            return instance.call_virtual(&signature.name, params);
        }
        body(Some(instance), params)
    }

    fn get_method_signature(&self, method: MethodId) -> Option<MethodSignature> {
        self.state.read().methods.get(method.0 as usize).map(|entry| entry.signature.clone())
    }

    fn find_field(&self, index: u32, name: &str) -> Option<FieldId> {
        let state = self.state.read();
        Self::chain(&state, index).into_iter().find_map(|type_index| {
            state.types[type_index]
                .fields
                .iter()
                .copied()
                .find(|&field| state.fields[field].signature.name == name)
                .map(|field| FieldId(field as u64))
        })
    }

    fn get_field_signature(&self, field: FieldId) -> Option<FieldSignature> {
        self.state.read().fields.get(field.0 as usize).map(|entry| entry.signature.clone())
    }

    fn get_field_value(&self, field: FieldId, instance: Option<&ObjectRef>) -> Result<Variant, EvalError> {
        let (signature, value) = self.field_slot(field)?;
        if signature.is_static {
            return Ok(value);
        }
        let instance = instance.ok_or(EvalError::MissingInstance)?;
        Ok(instance.native_field(&signature.name).unwrap_or(value))
    }

    fn set_field_value(&self, field: FieldId, instance: Option<&ObjectRef>, value: Variant) -> Result<(), EvalError> {
        let (signature, _) = self.field_slot(field)?;
        let value = value.coerce_to(signature.ty.kind);
        if signature.is_static {
            if let Some(entry) = self.state.write().fields.get_mut(field.0 as usize) {
                entry.value = value;
            }
            return Ok(());
        }
        let instance = instance.ok_or(EvalError::MissingInstance)?;
        instance.set_native_field(signature.name, value);
        Ok(())
    }
}
