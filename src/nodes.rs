//! Node catalog: group/type ids, well-known box ids and document constructors.

use uuid::Uuid;

use crate::graph::NodeData;
use crate::signature::MethodSignature;
use crate::variant::{Variant, VariantType};

pub mod group {
    pub const CONSTANTS: u16 = 2;
    pub const MATH: u16 = 3;
    pub const PARAMETERS: u16 = 6;
    pub const TOOLS: u16 = 7;
    pub const FUNCTION: u16 = 16;
    pub const FLOW: u16 = 17;
}

pub mod constants {
    pub const BOOL: u16 = 1;
    pub const INT: u16 = 2;
    pub const FLOAT: u16 = 3;
    pub const STRING: u16 = 4;
    pub const NULL: u16 = 5;
    pub const INT64: u16 = 6;
    pub const DOUBLE: u16 = 7;
}

pub mod math {
    pub const ADD: u16 = 1;
    pub const SUBTRACT: u16 = 2;
    pub const MULTIPLY: u16 = 3;
    pub const DIVIDE: u16 = 4;
    pub const LESS: u16 = 10;
    pub const GREATER: u16 = 11;
    pub const EQUAL: u16 = 12;
    pub const NOT_EQUAL: u16 = 13;
    pub const LESS_EQUAL: u16 = 14;
    pub const GREATER_EQUAL: u16 = 15;
    pub const NOT: u16 = 20;
    pub const AND: u16 = 21;
    pub const OR: u16 = 22;
}

pub mod parameters {
    pub const GET: u16 = 1;
    pub const SET: u16 = 2;
}

pub mod tools {
    pub const THIS_INSTANCE: u16 = 1;
    pub const CAST: u16 = 2;
    pub const CAST_VALUE: u16 = 3;
    pub const REROUTE: u16 = 4;

    /// Output box holding the cast value.
    pub const CAST_OUT: u32 = 4;
}

pub mod function {
    pub const METHOD_OVERRIDE: u16 = 3;
    pub const INVOKE_METHOD: u16 = 4;
    pub const RETURN: u16 = 5;
    pub const FUNCTION: u16 = 6;
    pub const GET_FIELD: u16 = 7;
    pub const SET_FIELD: u16 = 8;
    pub const BIND_EVENT: u16 = 9;
    pub const UNBIND_EVENT: u16 = 10;

    /// Invoke Method data output holding the returned value.
    pub const RETURN_BOX: u32 = 3;
    /// First Invoke Method parameter box; parameter `i` lives at `PARAMS_BOX + i`.
    pub const PARAMS_BOX: u32 = 4;
    /// First literal slot of Invoke Method parameters in the node values.
    pub const PARAMS_VALUE: usize = 3;
}

pub mod flow {
    pub const IF: u16 = 1;
    pub const FOR: u16 = 2;
    pub const WHILE: u16 = 3;
    pub const SEQUENCE: u16 = 4;
    pub const BRANCH_ON_ENUM: u16 = 5;
    pub const DELAY: u16 = 6;
    pub const ARRAY_FOR_EACH: u16 = 7;
    pub const DICTIONARY_FOR_EACH: u16 = 8;
}

/// Human readable `group:type` name used by stack traces and the harness.
pub fn display_name(group_id: u16, type_id: u16) -> Option<&'static str> {
    Some(match (group_id, type_id) {
        (group::CONSTANTS, _) => "Constant",
        (group::MATH, math::ADD) => "Add",
        (group::MATH, math::SUBTRACT) => "Subtract",
        (group::MATH, math::MULTIPLY) => "Multiply",
        (group::MATH, math::DIVIDE) => "Divide",
        (group::MATH, math::NOT) => "Not",
        (group::MATH, _) => "Compare",
        (group::TOOLS, tools::THIS_INSTANCE) => "This Instance",
        (group::TOOLS, tools::CAST) => "Cast",
        (group::TOOLS, tools::CAST_VALUE) => "Cast Value",
        (group::TOOLS, tools::REROUTE) => "Reroute",
        (group::FUNCTION, function::RETURN) => "Return",
        (group::FUNCTION, function::GET_FIELD) => "Get Field",
        (group::FUNCTION, function::SET_FIELD) => "Set Field",
        (group::FUNCTION, function::BIND_EVENT) => "Bind Event",
        (group::FUNCTION, function::UNBIND_EVENT) => "Unbind Event",
        (group::FLOW, flow::IF) => "If",
        (group::FLOW, flow::FOR) => "For Loop",
        (group::FLOW, flow::WHILE) => "While Loop",
        (group::FLOW, flow::SEQUENCE) => "Sequence",
        (group::FLOW, flow::BRANCH_ON_ENUM) => "Branch On Enum",
        (group::FLOW, flow::DELAY) => "Delay",
        (group::FLOW, flow::ARRAY_FOR_EACH) => "Array For Each",
        (group::FLOW, flow::DICTIONARY_FOR_EACH) => "Dictionary For Each",
        _ => return None,
    })
}

pub fn constant(id: u32, value: Variant) -> NodeData {
    let type_id = match value {
        Variant::Bool(_) => constants::BOOL,
        Variant::Int(_) => constants::INT,
        Variant::Float(_) => constants::FLOAT,
        Variant::String(_) => constants::STRING,
        Variant::Int64(_) => constants::INT64,
        Variant::Double(_) => constants::DOUBLE,
        _ => constants::NULL,
    };
    NodeData::new(id, group::CONSTANTS, type_id).value(value)
}

pub fn math(id: u32, op: u16) -> NodeData {
    NodeData::new(id, group::MATH, op)
}

pub fn get_parameter(id: u32, parameter: Uuid) -> NodeData {
    NodeData::new(id, group::PARAMETERS, parameters::GET).value(parameter.simple().to_string())
}

pub fn set_parameter(id: u32, parameter: Uuid, literal: Variant) -> NodeData {
    NodeData::new(id, group::PARAMETERS, parameters::SET).value(parameter.simple().to_string()).value(literal)
}

pub fn this_instance(id: u32) -> NodeData {
    NodeData::new(id, group::TOOLS, tools::THIS_INSTANCE)
}

pub fn cast(id: u32, type_name: &str) -> NodeData {
    NodeData::new(id, group::TOOLS, tools::CAST).value(type_name)
}

pub fn cast_value(id: u32, ty: &VariantType) -> NodeData {
    NodeData::new(id, group::TOOLS, tools::CAST_VALUE).value(ty.to_string())
}

pub fn reroute(id: u32) -> NodeData {
    NodeData::new(id, group::TOOLS, tools::REROUTE)
}

pub fn method_override(id: u32, name: &str, param_count: i32) -> NodeData {
    NodeData::new(id, group::FUNCTION, function::METHOD_OVERRIDE).value(name).value(param_count)
}

/// Invoke Method node; `literals` are the fallbacks of unconnected parameter boxes.
pub fn invoke_method(id: u32, type_name: &str, method: &str, signature: &MethodSignature, literals: Vec<Variant>) -> NodeData {
    let mut node = NodeData::new(id, group::FUNCTION, function::INVOKE_METHOD)
        .value(type_name)
        .value(method)
        .value(Variant::Blob(signature.to_blob()));
    node.values.extend(literals);
    node
}

pub fn return_value(id: u32, literal: Variant) -> NodeData {
    NodeData::new(id, group::FUNCTION, function::RETURN).value(literal)
}

/// Function node; `params` are `(name, type, is_out)`.
pub fn function(id: u32, name: &str, return_type: &VariantType, params: &[(&str, VariantType, bool)], is_static: bool) -> NodeData {
    let params = params
        .iter()
        .map(|(name, ty, is_out)| {
            Variant::Array(vec![Variant::from(*name), Variant::from(ty.to_string()), Variant::Bool(*is_out)])
        })
        .collect();
    NodeData::new(id, group::FUNCTION, function::FUNCTION)
        .value(name)
        .value(return_type.to_string())
        .value(Variant::Array(params))
        .value(is_static)
}

pub fn get_field(id: u32, type_name: &str, field: &str, ty: &VariantType, is_static: bool) -> NodeData {
    NodeData::new(id, group::FUNCTION, function::GET_FIELD)
        .value(type_name)
        .value(field)
        .value(ty.to_string())
        .value(is_static)
}

pub fn set_field(id: u32, type_name: &str, field: &str, ty: &VariantType, is_static: bool, literal: Variant) -> NodeData {
    NodeData::new(id, group::FUNCTION, function::SET_FIELD)
        .value(type_name)
        .value(field)
        .value(ty.to_string())
        .value(is_static)
        .value(literal)
}

pub fn bind_event(id: u32, event_type: &str, event_name: &str, method: &str) -> NodeData {
    NodeData::new(id, group::FUNCTION, function::BIND_EVENT).value(event_type).value(event_name).value(method)
}

pub fn unbind_event(id: u32, event_type: &str, event_name: &str, method: &str) -> NodeData {
    NodeData::new(id, group::FUNCTION, function::UNBIND_EVENT).value(event_type).value(event_name).value(method)
}

pub fn if_node(id: u32) -> NodeData {
    NodeData::new(id, group::FLOW, flow::IF).value(false)
}

pub fn for_loop(id: u32, start: i32, count: i32) -> NodeData {
    NodeData::new(id, group::FLOW, flow::FOR).value(start).value(count)
}

pub fn while_loop(id: u32) -> NodeData {
    NodeData::new(id, group::FLOW, flow::WHILE).value(false)
}

pub fn sequence(id: u32) -> NodeData {
    NodeData::new(id, group::FLOW, flow::SEQUENCE)
}

pub fn branch_on_enum(id: u32, cases: &[i32]) -> NodeData {
    let blob = cases.iter().flat_map(|case| case.to_le_bytes()).collect();
    NodeData::new(id, group::FLOW, flow::BRANCH_ON_ENUM).value(Variant::Blob(blob))
}

pub fn delay(id: u32, seconds: f32) -> NodeData {
    NodeData::new(id, group::FLOW, flow::DELAY).value(seconds)
}

pub fn array_for_each(id: u32) -> NodeData {
    NodeData::new(id, group::FLOW, flow::ARRAY_FOR_EACH)
}

pub fn dictionary_for_each(id: u32) -> NodeData {
    NodeData::new(id, group::FLOW, flow::DICTIONARY_FOR_EACH)
}
