use super::Context;
use crate::nodes::tools;
use crate::variant::{Variant, VariantType};

pub(super) fn evaluate(ctx: &mut Context<'_>, node: usize, box_id: u32) -> Variant {
    match ctx.node(node).type_id {
        tools::THIS_INSTANCE => Variant::Object(ctx.instance.cloned()),
        tools::CAST | tools::CAST_VALUE => cast(ctx, node, box_id),
        tools::REROUTE => {
            if box_id == 0 {
                ctx.follow(node, 1);
                Variant::Null
            } else {
                ctx.read_input(node, 0)
            }
        }
        _ => Variant::Null,
    }
}

/// Impulse on box 0 tests the input once and caches the outcome for the casted box;
/// reading the casted box without an impulse performs the test on the spot.
fn cast(ctx: &mut Context<'_>, node: usize, box_id: u32) -> Variant {
    let node_id = ctx.node(node).id;
    match box_id {
        0 => {
            let value = ctx.read_input(node, 1);
            let (value, next) = match try_cast(ctx, node, value) {
                Ok(value) => (value, 2),
                Err(fallback) => (fallback, 3),
            };
            ctx.scope.cache(node_id, tools::CAST_OUT, value);
            ctx.follow(node, next);
            Variant::Null
        }
        tools::CAST_OUT => {
            if let Some(value) = ctx.scope.cached(node_id, tools::CAST_OUT) {
                return value.clone();
            }
            let value = ctx.read_input(node, 1);
            try_cast(ctx, node, value).unwrap_or_else(|fallback| fallback)
        }
        _ => Variant::Null,
    }
}

/// `Ok(value)` when it is non-null and of the requested type, else the default value to
/// expose on the casted box.
fn try_cast(ctx: &Context<'_>, node: usize, value: Variant) -> Result<Variant, Variant> {
    let graph_node = ctx.node(node);
    let target = graph_node.value(0);
    let target = target.as_str().unwrap_or_default();
    if graph_node.type_id == tools::CAST {
        let matches = match &value {
            Variant::Object(Some(object)) => {
                object.type_name() == target || ctx.host.types.is_a_name(object.type_handle(), target)
            }
            Variant::ManagedObject(Some(managed)) => managed.type_name() == target,
            _ => false,
        };
        return if matches { Ok(value) } else { Err(Variant::Object(None)) };
    }
    let ty: VariantType = target.parse().unwrap_or_default();
    if !value.is_null() && value.matches_type(&ty) {
        Ok(value)
    } else {
        Err(ty.default_value())
    }
}
