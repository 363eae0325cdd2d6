use std::collections::HashMap;
use std::sync::{Arc, Weak};

use serde_json::{Map, Value};
use tracing::warn;
use uuid::Uuid;

use super::asset::coerce_parameter;
use super::event_table::EventBinding;
use crate::error::EvalError;
use crate::graph::Graph;
use crate::objects::{ObjectRef, ObjectRegistry, ScriptingObject};
use crate::variant::json;
use crate::variant::{Variant, VariantKind};

/// Per-object state of one script: parameter values in store layout order and the
/// event bindings made by Bind Event nodes.
pub struct ScriptInstance {
    pub object: Weak<ScriptingObject>,
    pub params: Vec<Variant>,
    pub event_bindings: Vec<EventBinding>,
}

impl ScriptInstance {
    pub fn object(&self) -> Option<ObjectRef> {
        self.object.upgrade()
    }
}

/// One parameter as laid out in an [`InstanceStore`].
#[derive(Debug, Clone, PartialEq)]
pub struct ParamSlot {
    pub id: Uuid,
    pub name: String,
    pub kind: VariantKind,
    pub default: Variant,
}

pub fn layout_of(graph: &Graph) -> Vec<ParamSlot> {
    graph
        .parameters
        .iter()
        .map(|param| ParamSlot {
            id: param.id,
            name: param.name.clone(),
            kind: param.ty.kind,
            default: param.value.clone(),
        })
        .collect()
}

/// Parameter defaults for a new instance. Managed objects are deep-copied so instances
/// never share mutable state with the graph defaults.
fn initial_params(layout: &[ParamSlot]) -> Vec<Variant> {
    layout.iter().map(|slot| json::deep_clone(&slot.default)).collect()
}

/// Instances of one script. Entries follow the store's own layout, which only changes
/// together with the entries in [`InstanceStore::relayout`], so lookups by parameter id
/// stay correct for evaluations still running on a program from before a reload.
#[derive(Default)]
pub struct InstanceStore {
    entries: HashMap<Uuid, ScriptInstance>,
    layout: Vec<ParamSlot>,
}

impl InstanceStore {
    pub fn layout(&self) -> &[ParamSlot] {
        &self.layout
    }

    pub fn slot(&self, param: Uuid) -> Option<usize> {
        self.layout.iter().position(|slot| slot.id == param)
    }

    /// Adds the entry of a newly spawned object, seeded with the current defaults.
    pub fn spawn(&mut self, object: &ObjectRef) {
        let instance = ScriptInstance {
            object: Arc::downgrade(object),
            params: initial_params(&self.layout),
            event_bindings: Vec::new(),
        };
        self.entries.insert(object.id(), instance);
    }

    pub fn insert(&mut self, id: Uuid, instance: ScriptInstance) {
        self.entries.insert(id, instance);
    }

    pub fn get(&self, id: Uuid) -> Option<&ScriptInstance> {
        self.entries.get(&id)
    }

    pub fn get_mut(&mut self, id: Uuid) -> Option<&mut ScriptInstance> {
        self.entries.get_mut(&id)
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn remove(&mut self, id: Uuid) -> Option<ScriptInstance> {
        self.entries.remove(&id)
    }

    /// Moves an entry to a new object id. Returns false when no entry existed.
    pub fn rename(&mut self, old_id: Uuid, new_id: Uuid) -> bool {
        match self.entries.remove(&old_id) {
            Some(instance) => {
                self.entries.insert(new_id, instance);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Uuid, &ScriptInstance)> {
        self.entries.iter()
    }

    pub fn drain(&mut self) -> Vec<(Uuid, ScriptInstance)> {
        self.entries.drain().collect()
    }

    pub fn param(&self, object_id: Uuid, param: Uuid) -> Result<Variant, EvalError> {
        let index = self.slot(param).ok_or_else(|| EvalError::UnknownParameter(param.simple().to_string()))?;
        self.entries
            .get(&object_id)
            .and_then(|entry| entry.params.get(index).cloned())
            .ok_or(EvalError::MissingInstance)
    }

    /// Writes a parameter, coerced to its declared kind.
    pub fn set_param(&mut self, object_id: Uuid, param: Uuid, value: Variant) -> Result<(), EvalError> {
        let index = self.slot(param).ok_or_else(|| EvalError::UnknownParameter(param.simple().to_string()))?;
        let kind = self.layout[index].kind;
        let slot = self
            .entries
            .get_mut(&object_id)
            .and_then(|entry| entry.params.get_mut(index))
            .ok_or(EvalError::MissingInstance)?;
        *slot = coerce_parameter(value, kind);
        Ok(())
    }

    /// Switches to the parameter layout of a (re)loaded graph. An existing value survives
    /// only when its parameter still exists and it differs from the default it was
    /// created with; everything else takes the new default.
    pub fn relayout(&mut self, graph: &Graph) {
        let layout = layout_of(graph);
        for instance in self.entries.values_mut() {
            let mut params = initial_params(&layout);
            for (old_index, old) in self.layout.iter().enumerate() {
                let Some(new_index) = layout.iter().position(|slot| slot.id == old.id) else { continue };
                let Some(old_value) = instance.params.get(old_index) else { continue };
                if *old_value != old.default {
                    params[new_index] = old_value.clone();
                }
            }
            instance.params = params;
        }
        self.layout = layout;
    }

    /// Every parameter of an instance, or only those differing from the `baseline`
    /// instance, keyed by the 32-hex parameter id.
    pub fn serialize(&self, object_id: Uuid, baseline: Option<Uuid>) -> Map<String, Value> {
        let Some(entry) = self.entries.get(&object_id) else { return Map::new() };
        let reference = baseline.and_then(|id| self.entries.get(&id)).map(|base| base.params.as_slice());
        serialize_params(&self.layout, &entry.params, reference)
    }

    pub fn deserialize(&mut self, object_id: Uuid, data: &Map<String, Value>, objects: Option<&ObjectRegistry>) {
        let Some(entry) = self.entries.get_mut(&object_id) else { return };
        deserialize_params(&self.layout, &mut entry.params, data, objects);
    }
}

/// Whether `value` differs from the baseline and has to be written out. Object
/// references compare by id.
pub fn should_serialize(value: &Variant, baseline: Option<&Variant>) -> bool {
    let Some(baseline) = baseline else { return true };
    match (value, baseline) {
        (Variant::Object(a), Variant::Object(b)) => {
            a.as_ref().map(|object| object.id()) != b.as_ref().map(|object| object.id())
        }
        _ => value != baseline,
    }
}

/// Writes every parameter, or only those differing from `baseline`, keyed by the 32-hex
/// parameter id.
fn serialize_params(layout: &[ParamSlot], params: &[Variant], baseline: Option<&[Variant]>) -> Map<String, Value> {
    let mut out = Map::new();
    for (index, param) in layout.iter().enumerate() {
        let Some(value) = params.get(index) else { continue };
        let reference = baseline.and_then(|values| values.get(index));
        if should_serialize(value, reference) {
            out.insert(param.id.simple().to_string(), json::to_json(value));
        }
    }
    out
}

/// Reads values written by [`serialize_params`]. Unknown keys are skipped with a
/// warning; values that do not fit their slot keep the current value.
fn deserialize_params(
    layout: &[ParamSlot],
    params: &mut [Variant],
    data: &Map<String, Value>,
    objects: Option<&ObjectRegistry>,
) {
    for (key, value) in data {
        let Ok(id) = Uuid::parse_str(key) else {
            warn!("skipping malformed parameter key '{key}'");
            continue;
        };
        let Some(index) = layout.iter().position(|slot| slot.id == id) else { continue };
        let Some(slot) = params.get_mut(index) else { continue };
        match json::from_json(value, slot, objects) {
            Ok(parsed) => *slot = parsed,
            Err(err) => warn!(parameter = %layout[index].name, "failed to read parameter: {err}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::GraphData;

    fn graph(params: &[(u128, &str, Variant)]) -> Graph {
        let mut data = GraphData::new();
        for (id, name, value) in params {
            data = data.parameter(Uuid::from_u128(*id), *name, value.clone());
        }
        Graph::from_data(data).unwrap()
    }

    fn store_with(graph: &Graph, id: Uuid, params: Vec<Variant>) -> InstanceStore {
        let mut store = InstanceStore::default();
        store.relayout(graph);
        store.insert(id, ScriptInstance { object: Weak::new(), params, event_bindings: Vec::new() });
        store
    }

    #[test]
    fn relayout_keeps_only_edited_values() {
        let old = graph(&[(1, "Health", Variant::Int(5)), (2, "Mana", Variant::Int(5)), (3, "Gone", Variant::Int(1))]);
        let new = graph(&[(2, "Mana", Variant::Int(7)), (1, "Health", Variant::Int(8)), (4, "Stamina", Variant::Int(3))]);
        let id = Uuid::from_u128(99);
        let mut store = store_with(&old, id, vec![Variant::Int(10), Variant::Int(5), Variant::Int(2)]);

        store.relayout(&new);
        assert_eq!(store.get(id).unwrap().params, vec![Variant::Int(7), Variant::Int(10), Variant::Int(3)]);
        assert_eq!(store.slot(Uuid::from_u128(1)), Some(1));
        assert_eq!(store.slot(Uuid::from_u128(3)), None);
    }

    #[test]
    fn parameters_resolve_by_id_against_the_current_layout() {
        let old = graph(&[(1, "Health", Variant::Int(100))]);
        let new = graph(&[(2, "Mana", Variant::Int(5)), (1, "Health", Variant::Int(100))]);
        let id = Uuid::from_u128(7);
        let mut store = store_with(&old, id, vec![Variant::Int(100)]);
        store.relayout(&new);

        store.set_param(id, Uuid::from_u128(1), Variant::Float(7.9)).unwrap();
        assert_eq!(store.param(id, Uuid::from_u128(1)), Ok(Variant::Int(7)));
        assert_eq!(store.param(id, Uuid::from_u128(2)), Ok(Variant::Int(5)));
        assert!(matches!(store.param(id, Uuid::from_u128(3)), Err(EvalError::UnknownParameter(_))));
        assert_eq!(store.set_param(Uuid::from_u128(8), Uuid::from_u128(1), Variant::Int(1)), Err(EvalError::MissingInstance));
    }

    #[test]
    fn serialization_writes_only_changed_parameters() {
        let graph = graph(&[(1, "Health", Variant::Float(100.0)), (2, "Name", Variant::from("Bob"))]);
        let edited = Uuid::from_u128(1);
        let fresh = Uuid::from_u128(2);
        let mut store = store_with(&graph, edited, vec![Variant::Float(100.0), Variant::from("Alice")]);
        let defaults = initial_params(store.layout());
        store.insert(fresh, ScriptInstance { object: Weak::new(), params: defaults, event_bindings: Vec::new() });

        assert_eq!(store.serialize(edited, None).len(), 2);
        let data = store.serialize(edited, Some(fresh));
        assert_eq!(data.len(), 1);
        assert_eq!(data[&Uuid::from_u128(2).simple().to_string()], Value::String("Alice".into()));

        store.deserialize(fresh, &data, None);
        assert_eq!(store.get(fresh).unwrap().params, store.get(edited).unwrap().params);
        assert!(store.serialize(fresh, Some(edited)).is_empty());
    }

    #[test]
    fn empty_object_references_match() {
        assert!(!should_serialize(&Variant::Object(None), Some(&Variant::Object(None))));
        assert!(should_serialize(&Variant::Int(1), None));
    }
}
