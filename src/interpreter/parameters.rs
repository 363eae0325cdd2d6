use uuid::Uuid;

use super::Context;
use crate::error::EvalError;
use crate::nodes::parameters;
use crate::variant::Variant;

/// Get and Set Parameter, backed by the host instance's entry in this script's store.
/// Parameters resolve by id against the store, which may already hold a newer layout
/// than the program being evaluated.
pub(super) fn evaluate(ctx: &mut Context<'_>, node: usize, box_id: u32) -> Variant {
    let graph_node = ctx.node(node);
    let is_set = match graph_node.type_id {
        parameters::GET => false,
        parameters::SET if box_id == 0 => true,
        _ => return Variant::Null,
    };
    let Some(instance) = ctx.instance else {
        ctx.report(node, box_id, EvalError::MissingInstance);
        return Variant::Null;
    };
    let key = graph_node.value(0);
    let key = key.as_str().unwrap_or_default();
    let Ok(param) = Uuid::parse_str(key) else {
        ctx.report(node, box_id, EvalError::UnknownParameter(key.to_string()));
        return Variant::Null;
    };

    if !is_set {
        let value = ctx.script.instances.lock().param(instance.id(), param);
        return match value {
            Ok(value) => value,
            Err(err) => {
                ctx.report(node, box_id, err);
                Variant::Null
            }
        };
    }

    let value = ctx.read(node, 1, 1);
    let stored = ctx.script.instances.lock().set_param(instance.id(), param, value);
    if let Err(err) = stored {
        ctx.report(node, box_id, err);
        return Variant::Null;
    }
    ctx.follow(node, 2);
    Variant::Null
}
