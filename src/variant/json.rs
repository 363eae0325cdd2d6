//! Variant serializer used for persisted instance state.
//!
//! Values are written as plain JSON. Reading is driven by the slot the value is loaded
//! into, so a `2` read into a `Float` slot becomes `Float(2.0)`.

use serde_json::{json, Map, Value};
use uuid::Uuid;

use super::{Dictionary, ManagedObject, Variant, VariantKind};
use crate::error::EvalError;
use crate::objects::ObjectRegistry;

const MANAGED_TYPE_KEY: &str = "$type";

pub fn to_json(value: &Variant) -> Value {
    match value {
        Variant::Null => Value::Null,
        Variant::Bool(v) => Value::Bool(*v),
        Variant::Int(v) => json!(v),
        Variant::Int64(v) => json!(v),
        Variant::Float(v) => json!(v),
        Variant::Double(v) => json!(v),
        Variant::String(v) => Value::String(v.clone()),
        Variant::Blob(bytes) => Value::Array(bytes.iter().map(|b| json!(b)).collect()),
        Variant::Enum { value, .. } => json!(value),
        Variant::Object(object) => match object {
            Some(object) => Value::String(object.id().simple().to_string()),
            None => Value::Null,
        },
        Variant::Asset(asset) => match asset {
            Some(id) => Value::String(id.simple().to_string()),
            None => Value::Null,
        },
        Variant::ManagedObject(managed) => match managed {
            Some(managed) => {
                let mut map = Map::new();
                map.insert(MANAGED_TYPE_KEY.to_string(), Value::String(managed.type_name().to_string()));
                for (name, field) in managed.fields() {
                    map.insert(name, to_json(&field));
                }
                Value::Object(map)
            }
            None => Value::Null,
        },
        Variant::Array(items) => Value::Array(items.iter().map(to_json).collect()),
        Variant::Dictionary(dict) => {
            Value::Array(dict.iter().map(|(k, v)| Value::Array(vec![to_json(k), to_json(v)])).collect())
        }
    }
}

/// Reads `value` into the shape of `slot` (the value currently held by the destination).
pub fn from_json(value: &Value, slot: &Variant, objects: Option<&ObjectRegistry>) -> Result<Variant, EvalError> {
    let mismatch = || EvalError::WrongVariantType { expected: slot.kind().label().to_string(), actual: describe(value) };
    if value.is_null() {
        return Ok(match slot.kind() {
            VariantKind::Object => Variant::Object(None),
            VariantKind::Asset => Variant::Asset(None),
            VariantKind::ManagedObject => Variant::ManagedObject(None),
            _ => Variant::Null,
        });
    }
    Ok(match slot {
        Variant::Null => infer(value),
        Variant::Bool(_) => Variant::Bool(value.as_bool().ok_or_else(mismatch)?),
        Variant::Int(_) => Variant::Int(value.as_i64().and_then(|n| i32::try_from(n).ok()).ok_or_else(mismatch)?),
        Variant::Int64(_) => Variant::Int64(value.as_i64().ok_or_else(mismatch)?),
        Variant::Float(_) => Variant::Float(value.as_f64().ok_or_else(mismatch)? as f32),
        Variant::Double(_) => Variant::Double(value.as_f64().ok_or_else(mismatch)?),
        Variant::String(_) => Variant::String(value.as_str().ok_or_else(mismatch)?.to_string()),
        Variant::Blob(_) => {
            let items = value.as_array().ok_or_else(mismatch)?;
            let mut bytes = Vec::with_capacity(items.len());
            for item in items {
                let byte = item.as_u64().filter(|b| *b <= u64::from(u8::MAX)).ok_or_else(mismatch)?;
                bytes.push(byte as u8);
            }
            Variant::Blob(bytes)
        }
        Variant::Enum { type_name, .. } => {
            Variant::Enum { type_name: type_name.clone(), value: value.as_i64().ok_or_else(mismatch)? }
        }
        Variant::Object(_) => {
            let id = parse_id(value).ok_or_else(mismatch)?;
            Variant::Object(objects.and_then(|registry| registry.find(id)))
        }
        Variant::Asset(_) => Variant::Asset(Some(parse_id(value).ok_or_else(mismatch)?)),
        Variant::ManagedObject(_) => read_managed(value).ok_or_else(mismatch)?,
        Variant::Array(current) => {
            let items = value.as_array().ok_or_else(mismatch)?;
            let element = current.first().cloned().unwrap_or(Variant::Null);
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(from_json(item, &element, objects)?);
            }
            Variant::Array(out)
        }
        Variant::Dictionary(_) => {
            let entries = value.as_array().ok_or_else(mismatch)?;
            let mut dict = Dictionary::new();
            for entry in entries {
                match entry.as_array().map(|pair| pair.as_slice()) {
                    Some([key, val]) => {
                        dict.insert(infer(key), infer(val));
                    }
                    _ => return Err(mismatch()),
                }
            }
            Variant::Dictionary(dict)
        }
    })
}

/// Copy that shares no references with the source, produced by a serializer round trip.
pub fn deep_clone(value: &Variant) -> Variant {
    match value {
        Variant::ManagedObject(Some(_)) | Variant::Array(_) | Variant::Dictionary(_) => {
            from_json(&to_json(value), value, None).unwrap_or_else(|_| value.clone())
        }
        other => other.clone(),
    }
}

fn infer(value: &Value) -> Variant {
    match value {
        Value::Null => Variant::Null,
        Value::Bool(v) => Variant::Bool(*v),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                match i32::try_from(i) {
                    Ok(small) => Variant::Int(small),
                    Err(_) => Variant::Int64(i),
                }
            } else {
                Variant::Double(n.as_f64().unwrap_or_default())
            }
        }
        Value::String(s) => Variant::String(s.clone()),
        Value::Array(items) => Variant::Array(items.iter().map(infer).collect()),
        Value::Object(map) => {
            if map.contains_key(MANAGED_TYPE_KEY) {
                if let Some(managed) = read_managed(value) {
                    return managed;
                }
            }
            Variant::Dictionary(map.iter().map(|(k, v)| (Variant::String(k.clone()), infer(v))).collect())
        }
    }
}

fn read_managed(value: &Value) -> Option<Variant> {
    let map = value.as_object()?;
    let type_name = map.get(MANAGED_TYPE_KEY)?.as_str()?;
    let managed = ManagedObject::new(type_name);
    for (name, field) in map.iter().filter(|(name, _)| name.as_str() != MANAGED_TYPE_KEY) {
        managed.set(name.clone(), infer(field));
    }
    Some(Variant::ManagedObject(Some(managed)))
}

fn parse_id(value: &Value) -> Option<Uuid> {
    value.as_str().and_then(|s| Uuid::try_parse(s).ok())
}

fn describe(value: &Value) -> String {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
    .to_string()
}
