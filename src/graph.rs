//! Node graph documents and their runtime form.
//!
//! A graph is stored as a [`GraphData`] document, encoded with bincode (fixint,
//! little-endian) or written as JSON. Loading resolves connections to node indices and
//! checks that every connection lands on an existing box.

use std::collections::HashMap;
use std::sync::Weak;

use bincode::Options;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AssetError;
use crate::signature::MethodSignature;
use crate::types::{BinaryModule, FieldId, MethodId};
use crate::variant::{Variant, VariantType};

pub const GRAPH_VERSION: u32 = 2;
/// Loads, but parameters carry no visibility flag and the asset is flagged for resave.
pub const DEPRECATED_GRAPH_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionData {
    pub node: u32,
    #[serde(rename = "box")]
    pub box_id: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoxData {
    pub id: u32,
    #[serde(default, with = "type_format")]
    pub ty: VariantType,
    #[serde(default)]
    pub connections: Vec<ConnectionData>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeData {
    pub id: u32,
    pub group: u16,
    #[serde(rename = "type")]
    pub type_id: u16,
    #[serde(default)]
    pub values: Vec<Variant>,
    #[serde(default)]
    pub boxes: Vec<BoxData>,
}

impl NodeData {
    pub fn new(id: u32, group: u16, type_id: u16) -> Self {
        Self { id, group, type_id, values: Vec::new(), boxes: Vec::new() }
    }

    pub fn value(mut self, value: impl Into<Variant>) -> Self {
        self.values.push(value.into());
        self
    }

    pub fn typed_box(mut self, id: u32, ty: VariantType) -> Self {
        match self.boxes.iter_mut().find(|existing| existing.id == id) {
            Some(existing) => existing.ty = ty,
            None => self.boxes.push(BoxData { id, ty, connections: Vec::new() }),
        }
        self
    }

    fn ensure_box(&mut self, id: u32) -> &mut BoxData {
        if let Some(index) = self.boxes.iter().position(|existing| existing.id == id) {
            return &mut self.boxes[index];
        }
        self.boxes.push(BoxData { id, ty: VariantType::default(), connections: Vec::new() });
        let last = self.boxes.len() - 1;
        &mut self.boxes[last]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterData {
    pub id: Uuid,
    pub name: String,
    #[serde(default, with = "type_format")]
    pub ty: VariantType,
    pub value: Variant,
    #[serde(default = "default_public")]
    pub is_public: bool,
}

fn default_public() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphData {
    pub version: u32,
    #[serde(default)]
    pub nodes: Vec<NodeData>,
    #[serde(default)]
    pub parameters: Vec<ParameterData>,
}

#[derive(Serialize, Deserialize)]
struct ParameterDataV1 {
    id: Uuid,
    name: String,
    #[serde(with = "type_format")]
    ty: VariantType,
    value: Variant,
}

#[derive(Serialize, Deserialize)]
struct GraphDataV1 {
    version: u32,
    nodes: Vec<NodeData>,
    parameters: Vec<ParameterDataV1>,
}

impl Default for GraphData {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphData {
    pub fn new() -> Self {
        Self { version: GRAPH_VERSION, nodes: Vec::new(), parameters: Vec::new() }
    }

    pub fn node(mut self, node: NodeData) -> Self {
        self.nodes.push(node);
        self
    }

    pub fn parameter(mut self, id: Uuid, name: impl Into<String>, value: Variant) -> Self {
        let ty = value.variant_type();
        self.parameters.push(ParameterData { id, name: name.into(), ty, value, is_public: true });
        self
    }

    /// Links `from_node.from_box` to `to_node.to_box`, creating either box when missing.
    /// Both nodes must already be part of the document.
    pub fn connect(mut self, from_node: u32, from_box: u32, to_node: u32, to_box: u32) -> Self {
        if let Some(node) = self.nodes.iter_mut().find(|node| node.id == from_node) {
            node.ensure_box(from_box).connections.push(ConnectionData { node: to_node, box_id: to_box });
        }
        if let Some(node) = self.nodes.iter_mut().find(|node| node.id == to_node) {
            node.ensure_box(to_box);
        }
        self
    }

    /// Decodes a bincode document of either supported version.
    pub fn decode(bytes: &[u8]) -> Result<Self, AssetError> {
        let Some(prefix) = bytes.get(..4) else {
            return Err(AssetError::GraphLoadFailed("graph blob is shorter than its header".to_string()));
        };
        let version = u32::from_le_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]);
        let options = bincode_options();
        match version {
            GRAPH_VERSION => options.deserialize(bytes).map_err(|err| AssetError::GraphLoadFailed(err.to_string())),
            DEPRECATED_GRAPH_VERSION => {
                let legacy: GraphDataV1 =
                    options.deserialize(bytes).map_err(|err| AssetError::GraphLoadFailed(err.to_string()))?;
                Ok(GraphData {
                    version: legacy.version,
                    nodes: legacy.nodes,
                    parameters: legacy
                        .parameters
                        .into_iter()
                        .map(|param| ParameterData {
                            id: param.id,
                            name: param.name,
                            ty: param.ty,
                            value: param.value,
                            is_public: true,
                        })
                        .collect(),
                })
            }
            other => Err(AssetError::GraphLoadFailed(format!("unsupported graph version {other}"))),
        }
    }

    /// Encodes at the current version.
    pub fn encode(&self) -> Result<Vec<u8>, AssetError> {
        let mut current = self.clone();
        current.version = GRAPH_VERSION;
        bincode_options().serialize(&current).map_err(|err| AssetError::InvalidData(err.to_string()))
    }

    /// Encodes in the deprecated layout, for exercising the upgrade path.
    pub fn encode_deprecated(&self) -> Result<Vec<u8>, AssetError> {
        let legacy = GraphDataV1 {
            version: DEPRECATED_GRAPH_VERSION,
            nodes: self.nodes.clone(),
            parameters: self
                .parameters
                .iter()
                .map(|param| ParameterDataV1 {
                    id: param.id,
                    name: param.name.clone(),
                    ty: param.ty.clone(),
                    value: param.value.clone(),
                })
                .collect(),
        };
        bincode_options().serialize(&legacy).map_err(|err| AssetError::InvalidData(err.to_string()))
    }
}

fn bincode_options() -> impl bincode::Options {
    bincode::DefaultOptions::new().with_fixint_encoding()
}

/// Box and parameter types are written as their display string (`"Float"`, `"Enum:Axis"`).
mod type_format {
    use serde::{Deserialize, Deserializer, Serializer};

    use crate::variant::VariantType;

    pub fn serialize<S: Serializer>(ty: &VariantType, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(ty)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<VariantType, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Connection endpoint resolved to a node index within the owning graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoxRef {
    pub node: usize,
    pub box_id: u32,
}

#[derive(Debug, Clone)]
pub struct GraphBox {
    pub id: u32,
    pub ty: VariantType,
    pub connections: Vec<BoxRef>,
}

#[derive(Clone)]
pub struct CachedMethod {
    pub module: Weak<dyn BinaryModule>,
    pub method: MethodId,
    pub param_count: usize,
    pub is_static: bool,
    pub out_mask: u32,
    pub signature: MethodSignature,
    pub epoch: u64,
}

#[derive(Clone)]
pub struct CachedField {
    pub module: Weak<dyn BinaryModule>,
    pub field: FieldId,
    pub is_static: bool,
    pub epoch: u64,
}

/// Reflection handles resolved lazily by Invoke Method and Get/Set Field nodes.
/// Entries carry the reflection epoch they were resolved under and are ignored once
/// the epoch moves on.
#[derive(Clone, Default)]
pub enum NodeCache {
    #[default]
    Empty,
    Method(CachedMethod),
    Field(CachedField),
}

pub struct GraphNode {
    pub id: u32,
    pub group: u16,
    pub type_id: u16,
    pub values: Vec<Variant>,
    pub boxes: Vec<GraphBox>,
    pub cache: RwLock<NodeCache>,
}

impl GraphNode {
    pub fn get_box(&self, box_id: u32) -> Option<&GraphBox> {
        self.boxes.iter().find(|b| b.id == box_id)
    }

    pub fn first_connection(&self, box_id: u32) -> Option<BoxRef> {
        self.get_box(box_id).and_then(|b| b.connections.first().copied())
    }

    pub fn is_connected(&self, box_id: u32) -> bool {
        self.first_connection(box_id).is_some()
    }

    pub fn value(&self, index: usize) -> Variant {
        self.values.get(index).cloned().unwrap_or_default()
    }

    pub fn clear_cache(&self) {
        *self.cache.write() = NodeCache::Empty;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GraphParameter {
    pub id: Uuid,
    pub name: String,
    pub ty: VariantType,
    pub value: Variant,
    pub is_public: bool,
}

pub struct Graph {
    pub version: u32,
    pub nodes: Vec<GraphNode>,
    pub parameters: Vec<GraphParameter>,
    node_index: HashMap<u32, usize>,
}

impl Graph {
    pub fn load(bytes: &[u8]) -> Result<Self, AssetError> {
        Self::from_data(GraphData::decode(bytes)?)
    }

    pub fn from_json(text: &str) -> Result<Self, AssetError> {
        let data: GraphData =
            serde_json::from_str(text).map_err(|err| AssetError::GraphLoadFailed(err.to_string()))?;
        Self::from_data(data)
    }

    pub fn from_data(mut data: GraphData) -> Result<Self, AssetError> {
        if data.version != GRAPH_VERSION && data.version != DEPRECATED_GRAPH_VERSION {
            return Err(AssetError::GraphLoadFailed(format!("unsupported graph version {}", data.version)));
        }
        let mut node_index = HashMap::with_capacity(data.nodes.len());
        for (index, node) in data.nodes.iter().enumerate() {
            if node_index.insert(node.id, index).is_some() {
                return Err(AssetError::InvalidData(format!("duplicate node id {}", node.id)));
            }
        }
        let mut parameter_ids = std::collections::HashSet::new();
        for param in &data.parameters {
            if !parameter_ids.insert(param.id) {
                return Err(AssetError::InvalidData(format!("duplicate parameter id {}", param.id.simple())));
            }
        }

        // Every link is stored on both ends.
        let mut reverse = Vec::new();
        for node in &data.nodes {
            for b in &node.boxes {
                for link in &b.connections {
                    let target = node_index.get(&link.node).map(|&idx| &data.nodes[idx]).ok_or_else(|| {
                        AssetError::InvalidData(format!("node {} box {} links to missing node {}", node.id, b.id, link.node))
                    })?;
                    let target_box = target.boxes.iter().find(|tb| tb.id == link.box_id).ok_or_else(|| {
                        AssetError::InvalidData(format!(
                            "node {} box {} links to missing box {} on node {}",
                            node.id, b.id, link.box_id, link.node
                        ))
                    })?;
                    let back = ConnectionData { node: node.id, box_id: b.id };
                    if !target_box.connections.contains(&back) {
                        reverse.push((link.node, link.box_id, back));
                    }
                }
            }
        }
        for (node_id, box_id, back) in reverse {
            let node = &mut data.nodes[node_index[&node_id]];
            let target = node.ensure_box(box_id);
            if !target.connections.contains(&back) {
                target.connections.push(back);
            }
        }

        let nodes = data
            .nodes
            .into_iter()
            .map(|node| {
                let boxes = node
                    .boxes
                    .into_iter()
                    .map(|b| GraphBox {
                        id: b.id,
                        ty: b.ty,
                        connections: b
                            .connections
                            .iter()
                            .map(|link| BoxRef { node: node_index[&link.node], box_id: link.box_id })
                            .collect(),
                    })
                    .collect();
                GraphNode {
                    id: node.id,
                    group: node.group,
                    type_id: node.type_id,
                    values: node.values,
                    boxes,
                    cache: RwLock::new(NodeCache::Empty),
                }
            })
            .collect();
        let parameters = data
            .parameters
            .into_iter()
            .map(|param| GraphParameter {
                id: param.id,
                name: param.name,
                ty: param.ty,
                value: param.value,
                is_public: param.is_public,
            })
            .collect();
        Ok(Self { version: data.version, nodes, parameters, node_index })
    }

    pub fn is_deprecated(&self) -> bool {
        self.version < GRAPH_VERSION
    }

    pub fn find_node(&self, id: u32) -> Option<usize> {
        self.node_index.get(&id).copied()
    }

    pub fn node(&self, index: usize) -> &GraphNode {
        &self.nodes[index]
    }

    pub fn find_parameter(&self, id: Uuid) -> Option<&GraphParameter> {
        self.parameters.iter().find(|param| param.id == id)
    }

    pub fn clear_caches(&self) {
        for node in &self.nodes {
            node.clear_cache();
        }
    }

    /// Rebuilds a document at the current version.
    pub fn to_data(&self) -> GraphData {
        let nodes = self
            .nodes
            .iter()
            .map(|node| NodeData {
                id: node.id,
                group: node.group,
                type_id: node.type_id,
                values: node.values.clone(),
                boxes: node
                    .boxes
                    .iter()
                    .map(|b| BoxData {
                        id: b.id,
                        ty: b.ty.clone(),
                        connections: b
                            .connections
                            .iter()
                            .map(|link| ConnectionData { node: self.nodes[link.node].id, box_id: link.box_id })
                            .collect(),
                    })
                    .collect(),
            })
            .collect();
        let parameters = self
            .parameters
            .iter()
            .map(|param| ParameterData {
                id: param.id,
                name: param.name.clone(),
                ty: param.ty.clone(),
                value: param.value.clone(),
                is_public: param.is_public,
            })
            .collect();
        GraphData { version: GRAPH_VERSION, nodes, parameters }
    }
}
