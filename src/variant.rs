use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::objects::ObjectRef;

pub mod json;

/// Type tag of a [`Variant`]. The discriminants are the values stored in binary blobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum VariantKind {
    Null = 0,
    Bool = 1,
    Int = 2,
    Int64 = 3,
    Float = 4,
    Double = 5,
    String = 6,
    Blob = 7,
    Enum = 8,
    Object = 9,
    Asset = 10,
    ManagedObject = 11,
    Array = 12,
    Dictionary = 13,
}

impl VariantKind {
    pub const ALL: [VariantKind; 14] = [
        VariantKind::Null,
        VariantKind::Bool,
        VariantKind::Int,
        VariantKind::Int64,
        VariantKind::Float,
        VariantKind::Double,
        VariantKind::String,
        VariantKind::Blob,
        VariantKind::Enum,
        VariantKind::Object,
        VariantKind::Asset,
        VariantKind::ManagedObject,
        VariantKind::Array,
        VariantKind::Dictionary,
    ];

    pub fn from_u8(raw: u8) -> Option<Self> {
        Self::ALL.get(raw as usize).copied()
    }

    pub fn label(self) -> &'static str {
        match self {
            VariantKind::Null => "Null",
            VariantKind::Bool => "Bool",
            VariantKind::Int => "Int",
            VariantKind::Int64 => "Int64",
            VariantKind::Float => "Float",
            VariantKind::Double => "Double",
            VariantKind::String => "String",
            VariantKind::Blob => "Blob",
            VariantKind::Enum => "Enum",
            VariantKind::Object => "Object",
            VariantKind::Asset => "Asset",
            VariantKind::ManagedObject => "ManagedObject",
            VariantKind::Array => "Array",
            VariantKind::Dictionary => "Dictionary",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|kind| kind.label().eq_ignore_ascii_case(label))
    }
}

/// Declared type of a box, parameter or signature slot.
///
/// `type_name` narrows `Enum`, `Object` and `ManagedObject` kinds to a named type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VariantType {
    pub kind: VariantKind,
    #[serde(default)]
    pub type_name: Option<String>,
}

impl VariantType {
    pub const fn new(kind: VariantKind) -> Self {
        Self { kind, type_name: None }
    }

    pub fn named(kind: VariantKind, type_name: impl Into<String>) -> Self {
        Self { kind, type_name: Some(type_name.into()) }
    }

    pub fn object(type_name: impl Into<String>) -> Self {
        Self::named(VariantKind::Object, type_name)
    }

    pub fn is_void(&self) -> bool {
        self.kind == VariantKind::Null
    }

    pub fn default_value(&self) -> Variant {
        match self.kind {
            VariantKind::Null => Variant::Null,
            VariantKind::Bool => Variant::Bool(false),
            VariantKind::Int => Variant::Int(0),
            VariantKind::Int64 => Variant::Int64(0),
            VariantKind::Float => Variant::Float(0.0),
            VariantKind::Double => Variant::Double(0.0),
            VariantKind::String => Variant::String(String::new()),
            VariantKind::Blob => Variant::Blob(Vec::new()),
            VariantKind::Enum => {
                Variant::Enum { type_name: self.type_name.clone().unwrap_or_default(), value: 0 }
            }
            VariantKind::Object => Variant::Object(None),
            VariantKind::Asset => Variant::Asset(None),
            VariantKind::ManagedObject => Variant::ManagedObject(None),
            VariantKind::Array => Variant::Array(Vec::new()),
            VariantKind::Dictionary => Variant::Dictionary(Dictionary::new()),
        }
    }
}

impl Default for VariantType {
    fn default() -> Self {
        Self::new(VariantKind::Null)
    }
}

impl fmt::Display for VariantType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.type_name {
            Some(name) if !name.is_empty() => write!(f, "{}:{}", self.kind.label(), name),
            _ => f.write_str(self.kind.label()),
        }
    }
}

impl FromStr for VariantType {
    type Err = std::convert::Infallible;

    /// `"Float"`, `"Enum:Axis"`, `"Object:Actor"`; any other bare name is an object type.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() || s.eq_ignore_ascii_case("void") {
            return Ok(VariantType::new(VariantKind::Null));
        }
        if let Some((kind, name)) = s.split_once(':') {
            if let Some(kind) = VariantKind::from_label(kind) {
                return Ok(VariantType::named(kind, name));
            }
        }
        Ok(match VariantKind::from_label(s) {
            Some(kind) => VariantType::new(kind),
            None => VariantType::object(s),
        })
    }
}

/// Reference-typed managed value. Clones share storage; use [`json::deep_clone`] for a copy.
#[derive(Clone)]
pub struct ManagedObject {
    inner: Arc<ManagedData>,
}

struct ManagedData {
    type_name: String,
    fields: RwLock<BTreeMap<String, Variant>>,
}

impl ManagedObject {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self { inner: Arc::new(ManagedData { type_name: type_name.into(), fields: RwLock::new(BTreeMap::new()) }) }
    }

    pub fn with_fields(type_name: impl Into<String>, fields: BTreeMap<String, Variant>) -> Self {
        Self { inner: Arc::new(ManagedData { type_name: type_name.into(), fields: RwLock::new(fields) }) }
    }

    pub fn type_name(&self) -> &str {
        &self.inner.type_name
    }

    pub fn get(&self, field: &str) -> Option<Variant> {
        self.inner.fields.read().get(field).cloned()
    }

    pub fn set(&self, field: impl Into<String>, value: Variant) {
        self.inner.fields.write().insert(field.into(), value);
    }

    pub fn fields(&self) -> BTreeMap<String, Variant> {
        self.inner.fields.read().clone()
    }

    pub fn ptr_eq(&self, other: &ManagedObject) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl PartialEq for ManagedObject {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other) || (self.type_name() == other.type_name() && self.fields() == other.fields())
    }
}

impl fmt::Debug for ManagedObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedObject").field("type", &self.type_name()).field("fields", &self.fields()).finish()
    }
}

/// Ordered key/value container. Entries keep insertion order, which is also the order
/// index-based iteration visits them in.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dictionary {
    entries: Vec<(Variant, Variant)>,
}

impl Dictionary {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &Variant) -> Option<&Variant> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn insert(&mut self, key: Variant, value: Variant) -> Option<Variant> {
        if let Some(slot) = self.entries.iter_mut().find(|(k, _)| *k == key) {
            return Some(std::mem::replace(&mut slot.1, value));
        }
        self.entries.push((key, value));
        None
    }

    pub fn remove(&mut self, key: &Variant) -> Option<Variant> {
        let index = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(index).1)
    }

    pub fn entry_at(&self, index: usize) -> Option<(&Variant, &Variant)> {
        self.entries.get(index).map(|(k, v)| (k, v))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Variant, &Variant)> {
        self.entries.iter().map(|(k, v)| (k, v))
    }
}

impl FromIterator<(Variant, Variant)> for Dictionary {
    fn from_iter<T: IntoIterator<Item = (Variant, Variant)>>(iter: T) -> Self {
        let mut dict = Dictionary::new();
        for (key, value) in iter {
            dict.insert(key, value);
        }
        dict
    }
}

/// Universal value currency of the interpreter.
#[derive(Clone, Default)]
pub enum Variant {
    #[default]
    Null,
    Bool(bool),
    Int(i32),
    Int64(i64),
    Float(f32),
    Double(f64),
    String(String),
    Blob(Vec<u8>),
    Enum { type_name: String, value: i64 },
    Object(Option<ObjectRef>),
    Asset(Option<Uuid>),
    ManagedObject(Option<ManagedObject>),
    Array(Vec<Variant>),
    Dictionary(Dictionary),
}

impl Variant {
    pub fn kind(&self) -> VariantKind {
        match self {
            Variant::Null => VariantKind::Null,
            Variant::Bool(_) => VariantKind::Bool,
            Variant::Int(_) => VariantKind::Int,
            Variant::Int64(_) => VariantKind::Int64,
            Variant::Float(_) => VariantKind::Float,
            Variant::Double(_) => VariantKind::Double,
            Variant::String(_) => VariantKind::String,
            Variant::Blob(_) => VariantKind::Blob,
            Variant::Enum { .. } => VariantKind::Enum,
            Variant::Object(_) => VariantKind::Object,
            Variant::Asset(_) => VariantKind::Asset,
            Variant::ManagedObject(_) => VariantKind::ManagedObject,
            Variant::Array(_) => VariantKind::Array,
            Variant::Dictionary(_) => VariantKind::Dictionary,
        }
    }

    pub fn variant_type(&self) -> VariantType {
        match self {
            Variant::Enum { type_name, .. } => VariantType::named(VariantKind::Enum, type_name.clone()),
            Variant::Object(Some(object)) => VariantType::object(object.type_name()),
            Variant::ManagedObject(Some(managed)) => {
                VariantType::named(VariantKind::ManagedObject, managed.type_name())
            }
            other => VariantType::new(other.kind()),
        }
    }

    /// True for `Null` and for empty object/asset/managed references.
    pub fn is_null(&self) -> bool {
        matches!(
            self,
            Variant::Null | Variant::Object(None) | Variant::Asset(None) | Variant::ManagedObject(None)
        )
    }

    pub fn as_bool(&self) -> bool {
        match self {
            Variant::Null => false,
            Variant::Bool(value) => *value,
            Variant::Int(value) => *value != 0,
            Variant::Int64(value) => *value != 0,
            Variant::Float(value) => *value != 0.0,
            Variant::Double(value) => *value != 0.0,
            Variant::String(value) => !value.is_empty(),
            Variant::Blob(value) => !value.is_empty(),
            Variant::Enum { value, .. } => *value != 0,
            Variant::Object(value) => value.is_some(),
            Variant::Asset(value) => value.is_some(),
            Variant::ManagedObject(value) => value.is_some(),
            Variant::Array(value) => !value.is_empty(),
            Variant::Dictionary(value) => !value.is_empty(),
        }
    }

    pub fn as_f64(&self) -> f64 {
        match self {
            Variant::Bool(value) => f64::from(u8::from(*value)),
            Variant::Int(value) => f64::from(*value),
            Variant::Int64(value) => *value as f64,
            Variant::Float(value) => f64::from(*value),
            Variant::Double(value) => *value,
            Variant::Enum { value, .. } => *value as f64,
            Variant::String(value) => value.trim().parse().unwrap_or(0.0),
            _ => 0.0,
        }
    }

    pub fn as_f32(&self) -> f32 {
        self.as_f64() as f32
    }

    pub fn as_i64(&self) -> i64 {
        match self {
            Variant::Int(value) => i64::from(*value),
            Variant::Int64(value) => *value,
            Variant::Enum { value, .. } => *value,
            Variant::Bool(value) => i64::from(*value),
            Variant::String(value) => value.trim().parse().unwrap_or(0),
            other => other.as_f64() as i64,
        }
    }

    pub fn as_i32(&self) -> i32 {
        let value = self.as_i64();
        value.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Variant::String(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Variant::Object(Some(object)) => Some(object),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Variant]> {
        match self {
            Variant::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_blob(&self) -> Option<&[u8]> {
        match self {
            Variant::Blob(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// Whether this value satisfies a declared variant type, by kind and, when given, type name.
    pub fn matches_type(&self, ty: &VariantType) -> bool {
        if self.kind() != ty.kind {
            return false;
        }
        match (&ty.type_name, self) {
            (Some(expected), Variant::Enum { type_name, .. }) => expected.is_empty() || expected == type_name,
            (Some(expected), Variant::ManagedObject(Some(managed))) => {
                expected.is_empty() || expected == managed.type_name()
            }
            _ => true,
        }
    }

    /// Coerces a number-like value towards a target kind; used when writing into typed slots.
    pub fn coerce_to(&self, kind: VariantKind) -> Variant {
        if self.kind() == kind {
            return self.clone();
        }
        match kind {
            VariantKind::Bool => Variant::Bool(self.as_bool()),
            VariantKind::Int => Variant::Int(self.as_i32()),
            VariantKind::Int64 => Variant::Int64(self.as_i64()),
            VariantKind::Float => Variant::Float(self.as_f32()),
            VariantKind::Double => Variant::Double(self.as_f64()),
            _ => self.clone(),
        }
    }
}

impl PartialEq for Variant {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Variant::Null, Variant::Null) => true,
            (Variant::Bool(a), Variant::Bool(b)) => a == b,
            (Variant::Int(a), Variant::Int(b)) => a == b,
            (Variant::Int64(a), Variant::Int64(b)) => a == b,
            (Variant::Float(a), Variant::Float(b)) => a == b,
            (Variant::Double(a), Variant::Double(b)) => a == b,
            (Variant::String(a), Variant::String(b)) => a == b,
            (Variant::Blob(a), Variant::Blob(b)) => a == b,
            (Variant::Enum { type_name: ta, value: a }, Variant::Enum { type_name: tb, value: b }) => {
                ta == tb && a == b
            }
            (Variant::Object(a), Variant::Object(b)) => match (a, b) {
                (Some(a), Some(b)) => Arc::ptr_eq(a, b),
                (None, None) => true,
                _ => false,
            },
            (Variant::Asset(a), Variant::Asset(b)) => a == b,
            (Variant::ManagedObject(a), Variant::ManagedObject(b)) => a == b,
            (Variant::Array(a), Variant::Array(b)) => a == b,
            (Variant::Dictionary(a), Variant::Dictionary(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Debug for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Variant::Null => f.write_str("Null"),
            Variant::Bool(value) => write!(f, "Bool({value})"),
            Variant::Int(value) => write!(f, "Int({value})"),
            Variant::Int64(value) => write!(f, "Int64({value})"),
            Variant::Float(value) => write!(f, "Float({value})"),
            Variant::Double(value) => write!(f, "Double({value})"),
            Variant::String(value) => write!(f, "String({value:?})"),
            Variant::Blob(value) => write!(f, "Blob({} bytes)", value.len()),
            Variant::Enum { type_name, value } => write!(f, "Enum({type_name}={value})"),
            Variant::Object(Some(object)) => write!(f, "Object({}:{})", object.type_name(), object.id().simple()),
            Variant::Object(None) => f.write_str("Object(null)"),
            Variant::Asset(Some(id)) => write!(f, "Asset({})", id.simple()),
            Variant::Asset(None) => f.write_str("Asset(null)"),
            Variant::ManagedObject(Some(managed)) => write!(f, "{managed:?}"),
            Variant::ManagedObject(None) => f.write_str("ManagedObject(null)"),
            Variant::Array(items) => f.debug_list().entries(items).finish(),
            Variant::Dictionary(dict) => f.debug_map().entries(dict.iter()).finish(),
        }
    }
}

impl From<bool> for Variant {
    fn from(value: bool) -> Self {
        Variant::Bool(value)
    }
}

impl From<i32> for Variant {
    fn from(value: i32) -> Self {
        Variant::Int(value)
    }
}

impl From<i64> for Variant {
    fn from(value: i64) -> Self {
        Variant::Int64(value)
    }
}

impl From<f32> for Variant {
    fn from(value: f32) -> Self {
        Variant::Float(value)
    }
}

impl From<f64> for Variant {
    fn from(value: f64) -> Self {
        Variant::Double(value)
    }
}

impl From<&str> for Variant {
    fn from(value: &str) -> Self {
        Variant::String(value.to_string())
    }
}

impl From<String> for Variant {
    fn from(value: String) -> Self {
        Variant::String(value)
    }
}

impl From<ObjectRef> for Variant {
    fn from(value: ObjectRef) -> Self {
        Variant::Object(Some(value))
    }
}

impl From<Vec<Variant>> for Variant {
    fn from(value: Vec<Variant>) -> Self {
        Variant::Array(value)
    }
}

impl From<Dictionary> for Variant {
    fn from(value: Dictionary) -> Self {
        Variant::Dictionary(value)
    }
}

/// Literal form used inside graph documents. Object references cannot be stored as
/// literals and decode to a null reference; they are only carried as ids.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) enum VariantLiteral {
    Null,
    Bool(bool),
    Int(i32),
    Int64(i64),
    Float(f32),
    Double(f64),
    String(String),
    Blob(Vec<u8>),
    Enum { type_name: String, value: i64 },
    Object(Option<Uuid>),
    Asset(Option<Uuid>),
    ManagedObject(Option<(String, Vec<(String, VariantLiteral)>)>),
    Array(Vec<VariantLiteral>),
    Dictionary(Vec<(VariantLiteral, VariantLiteral)>),
}

impl From<Variant> for VariantLiteral {
    fn from(value: Variant) -> Self {
        match value {
            Variant::Null => VariantLiteral::Null,
            Variant::Bool(v) => VariantLiteral::Bool(v),
            Variant::Int(v) => VariantLiteral::Int(v),
            Variant::Int64(v) => VariantLiteral::Int64(v),
            Variant::Float(v) => VariantLiteral::Float(v),
            Variant::Double(v) => VariantLiteral::Double(v),
            Variant::String(v) => VariantLiteral::String(v),
            Variant::Blob(v) => VariantLiteral::Blob(v),
            Variant::Enum { type_name, value } => VariantLiteral::Enum { type_name, value },
            Variant::Object(v) => VariantLiteral::Object(v.map(|object| object.id())),
            Variant::Asset(v) => VariantLiteral::Asset(v),
            Variant::ManagedObject(v) => VariantLiteral::ManagedObject(v.map(|managed| {
                let fields = managed.fields().into_iter().map(|(k, v)| (k, VariantLiteral::from(v))).collect();
                (managed.type_name().to_string(), fields)
            })),
            Variant::Array(items) => VariantLiteral::Array(items.into_iter().map(VariantLiteral::from).collect()),
            Variant::Dictionary(dict) => VariantLiteral::Dictionary(
                dict.iter().map(|(k, v)| (VariantLiteral::from(k.clone()), VariantLiteral::from(v.clone()))).collect(),
            ),
        }
    }
}

impl From<VariantLiteral> for Variant {
    fn from(value: VariantLiteral) -> Self {
        match value {
            VariantLiteral::Null => Variant::Null,
            VariantLiteral::Bool(v) => Variant::Bool(v),
            VariantLiteral::Int(v) => Variant::Int(v),
            VariantLiteral::Int64(v) => Variant::Int64(v),
            VariantLiteral::Float(v) => Variant::Float(v),
            VariantLiteral::Double(v) => Variant::Double(v),
            VariantLiteral::String(v) => Variant::String(v),
            VariantLiteral::Blob(v) => Variant::Blob(v),
            VariantLiteral::Enum { type_name, value } => Variant::Enum { type_name, value },
            VariantLiteral::Object(_) => Variant::Object(None),
            VariantLiteral::Asset(v) => Variant::Asset(v),
            VariantLiteral::ManagedObject(v) => Variant::ManagedObject(v.map(|(type_name, fields)| {
                ManagedObject::with_fields(type_name, fields.into_iter().map(|(k, v)| (k, Variant::from(v))).collect())
            })),
            VariantLiteral::Array(items) => Variant::Array(items.into_iter().map(Variant::from).collect()),
            VariantLiteral::Dictionary(entries) => Variant::Dictionary(
                entries.into_iter().map(|(k, v)| (Variant::from(k), Variant::from(v))).collect(),
            ),
        }
    }
}

impl Serialize for Variant {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        VariantLiteral::from(self.clone()).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Variant {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        VariantLiteral::deserialize(deserializer).map(Variant::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variant_type_parses_kinds_and_object_names() {
        assert_eq!("Float".parse::<VariantType>().unwrap(), VariantType::new(VariantKind::Float));
        assert_eq!("int".parse::<VariantType>().unwrap(), VariantType::new(VariantKind::Int));
        assert_eq!("Actor".parse::<VariantType>().unwrap(), VariantType::object("Actor"));
        assert_eq!(
            "Enum:Axis".parse::<VariantType>().unwrap(),
            VariantType::named(VariantKind::Enum, "Axis")
        );
        assert!("void".parse::<VariantType>().unwrap().is_void());
    }

    #[test]
    fn managed_objects_compare_by_content() {
        let a = ManagedObject::new("Stats");
        a.set("hp", Variant::Int(3));
        let b = ManagedObject::new("Stats");
        b.set("hp", Variant::Int(3));
        assert_eq!(Variant::ManagedObject(Some(a.clone())), Variant::ManagedObject(Some(b.clone())));
        b.set("hp", Variant::Int(4));
        assert_ne!(Variant::ManagedObject(Some(a)), Variant::ManagedObject(Some(b)));
    }

    #[test]
    fn dictionary_replaces_existing_keys_in_place() {
        let mut dict = Dictionary::new();
        dict.insert("a".into(), Variant::Int(1));
        dict.insert("b".into(), Variant::Int(2));
        assert_eq!(dict.insert("a".into(), Variant::Int(3)), Some(Variant::Int(1)));
        assert_eq!(dict.len(), 2);
        let (key, value) = dict.entry_at(0).unwrap();
        assert_eq!(key, &Variant::from("a"));
        assert_eq!(value, &Variant::Int(3));
    }

    #[test]
    fn literal_encoding_survives_bincode() {
        let value = Variant::Array(vec![Variant::Float(1.5), Variant::from("x"), Variant::Null]);
        let bytes = bincode::serialize(&value).expect("encode");
        let decoded: Variant = bincode::deserialize(&bytes).expect("decode");
        assert_eq!(decoded, value);
    }

    #[test]
    fn coerce_keeps_numeric_meaning() {
        assert_eq!(Variant::Int(3).coerce_to(VariantKind::Float), Variant::Float(3.0));
        assert_eq!(Variant::Double(2.9).coerce_to(VariantKind::Int), Variant::Int(2));
        assert_eq!(Variant::Int(0).coerce_to(VariantKind::Bool), Variant::Bool(false));
    }
}
