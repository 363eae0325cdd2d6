use std::sync::Arc;
use std::time::{Duration, Instant};

use bitflags::bitflags;
use parking_lot::{Condvar, Mutex, RwLock};
use tracing::warn;
use uuid::Uuid;

use super::instances::InstanceStore;
use super::meta::{MetaFlags, ScriptMetadata};
use crate::error::{AssetError, EvalError};
use crate::graph::{Graph, GraphData};
use crate::nodes::{function, group};
use crate::objects::{DispatchTable, ObjectRef};
use crate::signature::{MethodSignature, ParamSignature};
use crate::types::{ScriptingTypeInfo, TypeKind, VirtualMethodInfo};
use crate::variant::{Variant, VariantKind, VariantType};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MethodFlags: u32 {
        const STATIC = 1 << 0;
        const VIRTUAL = 1 << 1;
        const OVERRIDE = 1 << 2;
    }
}

#[derive(Debug, Clone)]
pub struct ScriptMethod {
    /// Index of the Method Override or Function node.
    pub node: usize,
    pub name: String,
    pub flags: MethodFlags,
    pub signature: MethodSignature,
    pub profiler_label: String,
}

#[derive(Debug, Clone)]
pub struct ScriptField {
    pub id: Uuid,
    /// Slot in the instance parameter vector.
    pub index: usize,
    pub name: String,
}

/// Problem found while deriving a program; reported as a diagnostic, not a load failure.
#[derive(Debug, Clone)]
pub struct LoadIssue {
    pub node_id: u32,
    pub error: EvalError,
}

/// Everything derived from one successful load. Evaluations hold an `Arc` to the
/// program they started with, so a concurrent reload never tears it down under them.
pub struct ScriptProgram {
    pub graph: Graph,
    pub meta: ScriptMetadata,
    pub methods: Vec<ScriptMethod>,
    pub fields: Vec<ScriptField>,
    pub type_info: Arc<ScriptingTypeInfo>,
}

impl ScriptProgram {
    pub fn build(
        asset_name: &str,
        type_name: &str,
        graph: Graph,
        meta: ScriptMetadata,
        virtuals: &[VirtualMethodInfo],
    ) -> (Self, Vec<LoadIssue>) {
        let mut methods = Vec::new();
        let mut issues = Vec::new();
        for (index, node) in graph.nodes.iter().enumerate() {
            if node.group != group::FUNCTION {
                continue;
            }
            match node.type_id {
                function::METHOD_OVERRIDE => {
                    let name = node.value(0).as_str().unwrap_or_default().to_string();
                    let count = node.value(1).as_i64().max(0) as usize;
                    let signature = virtuals
                        .iter()
                        .find(|v| v.signature.name == name && v.signature.params.len() == count)
                        .map(|v| v.signature.clone())
                        .unwrap_or_else(|| {
                            let mut signature = MethodSignature::new(name.clone());
                            for i in 0..count {
                                signature = signature.param(ParamSignature::new(format!("p{i}"), VariantType::default()));
                            }
                            signature
                        });
                    methods.push(ScriptMethod {
                        node: index,
                        profiler_label: format!("{asset_name}::{name}"),
                        name,
                        flags: MethodFlags::VIRTUAL | MethodFlags::OVERRIDE,
                        signature,
                    });
                }
                function::FUNCTION => {
                    let signature = function_signature(node.values.as_slice());
                    let flags = if signature.is_static { MethodFlags::STATIC } else { MethodFlags::empty() };
                    methods.push(ScriptMethod {
                        node: index,
                        profiler_label: format!("{asset_name}::{}", signature.name),
                        name: signature.name.clone(),
                        flags,
                        signature,
                    });
                }
                function::INVOKE_METHOD => {
                    if let Some(blob) = node.value(2).as_blob() {
                        let checked = MethodSignature::from_blob(blob).and_then(|signature| signature.out_mask());
                        if let Err(error) = checked {
                            issues.push(LoadIssue { node_id: node.id, error });
                        }
                    }
                }
                _ => {}
            }
        }

        let fields = graph
            .parameters
            .iter()
            .enumerate()
            .map(|(index, param)| ScriptField { id: param.id, index, name: param.name.clone() })
            .collect();

        let type_info = Arc::new(ScriptingTypeInfo {
            name: type_name.to_string(),
            kind: TypeKind::Script,
            base: Some(meta.base_type.clone()),
            is_abstract: meta.flags.contains(MetaFlags::ABSTRACT),
            virtual_methods: virtuals.to_vec(),
        });
        (Self { graph, meta, methods, fields, type_info }, issues)
    }

    pub fn find_method(&self, name: &str, num_params: usize) -> Option<usize> {
        self.methods.iter().position(|m| m.name == name && m.signature.params.len() == num_params)
    }

    pub fn find_method_by_name(&self, name: &str) -> Option<usize> {
        self.methods.iter().position(|m| m.name == name)
    }

    pub fn find_field(&self, name: &str) -> Option<&ScriptField> {
        self.fields.iter().find(|f| f.name == name)
    }
}

fn function_signature(values: &[Variant]) -> MethodSignature {
    let value = |index: usize| values.get(index).cloned().unwrap_or_default();
    let name = value(0).as_str().unwrap_or_default().to_string();
    let return_type = value(1).as_str().and_then(|s| s.parse::<VariantType>().ok()).unwrap_or_default();
    let mut signature = MethodSignature::new(name).returns(return_type);
    if let Some(params) = value(2).as_array() {
        for param in params {
            let parts = param.as_array().unwrap_or_default();
            let part = |index: usize| parts.get(index).cloned().unwrap_or_default();
            let ty = part(1).as_str().and_then(|s| s.parse::<VariantType>().ok()).unwrap_or_default();
            let name = part(0).as_str().unwrap_or_default().to_string();
            signature = signature.param(ParamSignature { name, ty, is_out: part(2).as_bool() });
        }
    }
    if value(3).as_bool() {
        signature = signature.as_static();
    }
    signature
}

#[derive(Debug, Clone, PartialEq)]
pub enum AssetState {
    Unloaded,
    Loading,
    Loaded,
    LoadFailed(AssetError),
}

/// Raw data chunks of a script asset.
#[derive(Debug, Clone, Default)]
pub struct ScriptSource {
    pub graph: Option<Vec<u8>>,
    pub metadata: Option<Vec<u8>>,
}

impl ScriptSource {
    pub fn new(graph: &GraphData, meta: &ScriptMetadata) -> Result<Self, AssetError> {
        Ok(Self { graph: Some(graph.encode()?), metadata: Some(meta.encode()?) })
    }

    pub fn content_hash(&self) -> blake3::Hash {
        let mut hasher = blake3::Hasher::new();
        for chunk in [&self.metadata, &self.graph] {
            match chunk {
                Some(bytes) => {
                    hasher.update(&(bytes.len() as u64).to_le_bytes());
                    hasher.update(bytes);
                }
                None => {
                    hasher.update(&u64::MAX.to_le_bytes());
                }
            }
        }
        hasher.finalize()
    }
}

/// Loaded graph asset. The type index is assigned once and survives reloads.
pub struct VisualScript {
    id: Uuid,
    name: String,
    type_name: String,
    type_index: u32,
    status: Mutex<AssetState>,
    status_changed: Condvar,
    source: RwLock<ScriptSource>,
    program: RwLock<Option<Arc<ScriptProgram>>>,
    pub(crate) instances: Mutex<InstanceStore>,
    pub(crate) dispatch: RwLock<Arc<DispatchTable>>,
    pub(crate) default_instance: RwLock<Option<ObjectRef>>,
    /// Parameter ids handed out as field ids; append-only so a field id stays bound to
    /// the same parameter across reloads.
    field_keys: Mutex<Vec<Uuid>>,
}

impl std::fmt::Debug for VisualScript {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VisualScript")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("type_name", &self.type_name)
            .field("type_index", &self.type_index)
            .finish_non_exhaustive()
    }
}

impl VisualScript {
    pub(crate) fn new(id: Uuid, name: impl Into<String>, type_index: u32, source: ScriptSource) -> Self {
        Self {
            id,
            name: name.into(),
            type_name: id.simple().to_string(),
            type_index,
            status: Mutex::new(AssetState::Unloaded),
            status_changed: Condvar::new(),
            source: RwLock::new(source),
            program: RwLock::new(None),
            instances: Mutex::new(InstanceStore::default()),
            dispatch: RwLock::new(Arc::new(DispatchTable::default())),
            default_instance: RwLock::new(None),
            field_keys: Mutex::new(Vec::new()),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// 32-character hex form of the id, registered as the scripting type name.
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn type_index(&self) -> u32 {
        self.type_index
    }

    pub fn state(&self) -> AssetState {
        self.status.lock().clone()
    }

    pub fn is_loaded(&self) -> bool {
        matches!(*self.status.lock(), AssetState::Loaded)
    }

    pub(crate) fn set_state(&self, state: AssetState) {
        *self.status.lock() = state;
        self.status_changed.notify_all();
    }

    /// Blocks while a load is in flight. A failed load reports its error again without
    /// being re-attempted.
    pub fn wait_for_loaded(&self, timeout: Duration) -> Result<(), AssetError> {
        let deadline = Instant::now() + timeout;
        let mut status = self.status.lock();
        while matches!(*status, AssetState::Loading) {
            if self.status_changed.wait_until(&mut status, deadline).timed_out() {
                break;
            }
        }
        match &*status {
            AssetState::Loaded => Ok(()),
            AssetState::LoadFailed(err) => Err(err.clone()),
            AssetState::Loading => Err(AssetError::InvalidData(format!("timed out waiting for {}", self.name))),
            AssetState::Unloaded => Err(AssetError::InvalidData(format!("{} is not loaded", self.name))),
        }
    }

    pub fn program(&self) -> Option<Arc<ScriptProgram>> {
        self.program.read().clone()
    }

    pub(crate) fn set_program(&self, program: Option<Arc<ScriptProgram>>) {
        *self.program.write() = program;
    }

    pub fn source(&self) -> ScriptSource {
        self.source.read().clone()
    }

    pub(crate) fn set_source(&self, source: ScriptSource) {
        *self.source.write() = source;
    }

    pub fn content_hash(&self) -> blake3::Hash {
        self.source.read().content_hash()
    }

    pub fn default_instance(&self) -> Option<ObjectRef> {
        self.default_instance.read().clone()
    }

    pub fn instance_count(&self) -> usize {
        self.instances.lock().len()
    }

    pub fn instance_params(&self, object_id: Uuid) -> Option<Vec<Variant>> {
        self.instances.lock().get(object_id).map(|instance| instance.params.clone())
    }

    /// Current value of the named parameter on one instance.
    pub fn parameter(&self, object_id: Uuid, name: &str) -> Option<Variant> {
        let param = self.program()?.find_field(name)?.id;
        self.instances.lock().param(object_id, param).ok()
    }

    pub fn set_parameter(&self, object_id: Uuid, name: &str, value: Variant) -> bool {
        let Some(param) = self.program().and_then(|program| program.find_field(name).map(|field| field.id)) else {
            return false;
        };
        match self.instances.lock().set_param(object_id, param, value) {
            Ok(()) => true,
            Err(err) => {
                warn!(script = %self.type_name, instance = %object_id.simple(), "cannot set '{name}': {err}");
                false
            }
        }
    }

    pub(crate) fn field_key(&self, param: Uuid) -> usize {
        let mut keys = self.field_keys.lock();
        match keys.iter().position(|id| *id == param) {
            Some(index) => index,
            None => {
                keys.push(param);
                keys.len() - 1
            }
        }
    }

    pub(crate) fn field_param(&self, key: usize) -> Option<Uuid> {
        self.field_keys.lock().get(key).copied()
    }
}

/// Numeric values written into a typed parameter keep the parameter's kind.
pub(crate) fn coerce_parameter(value: Variant, kind: VariantKind) -> Variant {
    match kind {
        VariantKind::Bool | VariantKind::Int | VariantKind::Int64 | VariantKind::Float | VariantKind::Double => {
            value.coerce_to(kind)
        }
        _ => value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes;

    #[test]
    fn program_derives_methods_and_fields() {
        let tick = VirtualMethodInfo {
            signature: MethodSignature::new("Tick").param(ParamSignature::new("dt", VariantType::new(VariantKind::Float))),
            base: Arc::new(|_, _| Ok(Variant::Null)),
        };
        let data = GraphData::new()
            .node(nodes::method_override(1, "Tick", 1))
            .node(nodes::function(
                2,
                "Heal",
                &VariantType::new(VariantKind::Int),
                &[("amount", VariantType::new(VariantKind::Int), false)],
                false,
            ))
            .parameter(Uuid::from_u128(1), "Health", Variant::Float(100.0));
        let graph = Graph::from_data(data).unwrap();
        let (program, issues) =
            ScriptProgram::build("Player", "abc", graph, ScriptMetadata::new("Actor"), std::slice::from_ref(&tick));
        assert!(issues.is_empty());
        assert_eq!(program.methods.len(), 2);
        assert_eq!(program.methods[0].signature.params[0].name, "dt");
        assert_eq!(program.methods[0].profiler_label, "Player::Tick");
        assert_eq!(program.find_method("Heal", 1), Some(1));
        assert_eq!(program.methods[1].signature.return_type, VariantType::new(VariantKind::Int));
        assert_eq!(program.find_field("Health").map(|f| f.index), Some(0));
        assert_eq!(program.type_info.virtual_methods.len(), 1);
    }

    #[test]
    fn oversized_out_masks_are_reported_at_load() {
        let mut signature = MethodSignature::new("Wide");
        for i in 0..33 {
            signature = signature.param(ParamSignature::out(format!("o{i}"), VariantType::new(VariantKind::Int)));
        }
        let data = GraphData::new().node(nodes::invoke_method(5, "Actor", "Wide", &signature, Vec::new()));
        let graph = Graph::from_data(data).unwrap();
        let (_, issues) = ScriptProgram::build("Wide", "abc", graph, ScriptMetadata::new("Actor"), &[]);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].node_id, 5);
        assert_eq!(issues[0].error, EvalError::TooManyOutParameters { index: 32 });
    }

    #[test]
    fn truncated_signature_blobs_are_reported_at_load() {
        let mut blob = vec![crate::signature::METHOD_SIGNATURE_VERSION, 0, 0];
        blob.extend_from_slice(&0i32.to_le_bytes());
        blob.extend_from_slice(&i32::MAX.to_le_bytes());
        let mut node = nodes::invoke_method(6, "Actor", "Broken", &MethodSignature::new("Broken"), Vec::new());
        node.values[2] = Variant::Blob(blob);
        let graph = Graph::from_data(GraphData::new().node(node)).unwrap();
        let (_, issues) = ScriptProgram::build("Broken", "abc", graph, ScriptMetadata::new("Actor"), &[]);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].node_id, 6);
        assert!(matches!(issues[0].error, EvalError::InvocationFailed(_)));
    }

    #[test]
    fn content_hash_tracks_chunks() {
        let meta = ScriptMetadata::new("Actor");
        let a = ScriptSource::new(&GraphData::new(), &meta).unwrap();
        let b = ScriptSource::new(&GraphData::new().parameter(Uuid::from_u128(2), "X", Variant::Int(1)), &meta).unwrap();
        assert_eq!(a.content_hash(), a.clone().content_hash());
        assert_ne!(a.content_hash(), b.content_hash());
    }
}
