use std::sync::Arc;

use smallvec::SmallVec;

use super::Context;
use crate::error::EvalError;
use crate::graph::{CachedField, CachedMethod, NodeCache};
use crate::nodes::function;
use crate::objects::ObjectRef;
use crate::signature::MethodSignature;
use crate::types::TypeHandle;
use crate::variant::Variant;
use crate::visual::event_table;

pub(super) fn evaluate(ctx: &mut Context<'_>, node: usize, box_id: u32) -> Variant {
    match ctx.node(node).type_id {
        function::METHOD_OVERRIDE | function::FUNCTION => entry(ctx, node, box_id),
        function::INVOKE_METHOD => invoke_method(ctx, node, box_id),
        function::RETURN => {
            if box_id == 0 {
                ctx.scope.function_return = ctx.read(node, 1, 0);
            }
            Variant::Null
        }
        function::GET_FIELD => get_field(ctx, node, box_id),
        function::SET_FIELD => set_field(ctx, node, box_id),
        function::BIND_EVENT => bind_event(ctx, node, box_id, true),
        function::UNBIND_EVENT => bind_event(ctx, node, box_id, false),
        _ => Variant::Null,
    }
}

/// Method entry: box 0 starts the body, box `k` exposes parameter `k - 1`.
fn entry(ctx: &mut Context<'_>, node: usize, box_id: u32) -> Variant {
    if box_id == 0 {
        ctx.follow(node, 0);
        return Variant::Null;
    }
    ctx.scope.parameters.get(box_id as usize - 1).cloned().unwrap_or_default()
}

fn text(ctx: &Context<'_>, node: usize, index: usize) -> String {
    ctx.node(node).value(index).as_str().unwrap_or_default().to_string()
}

fn is_out(mask: u32, index: usize) -> bool {
    index < 32 && mask & (1 << index) != 0
}

/// Declared type of a reflection node, falling back to a managed class of that name.
fn find_type(ctx: &Context<'_>, type_name: &str) -> Result<TypeHandle, EvalError> {
    ctx.host
        .types
        .find_type(type_name)
        .or_else(|| ctx.host.types.find_managed_class(type_name))
        .ok_or_else(|| EvalError::MissingType(type_name.to_string()))
}

fn resolve_method(ctx: &Context<'_>, node: usize) -> Result<CachedMethod, EvalError> {
    let graph_node = ctx.node(node);
    let epoch = ctx.module.reflection_epoch();
    if let NodeCache::Method(cached) = &*graph_node.cache.read() {
        if cached.epoch == epoch && cached.module.strong_count() > 0 {
            return Ok(cached.clone());
        }
    }

    let blob = graph_node.value(2);
    let signature = MethodSignature::from_blob(blob.as_blob().unwrap_or_default())?;
    let out_mask = signature.out_mask()?;
    let type_name = text(ctx, node, 0);
    let method_name = text(ctx, node, 1);
    let handle = find_type(ctx, &type_name)?;
    let module = handle.module();
    let param_count = signature.params.len();
    let method = module.find_method(handle.index(), &method_name, param_count).ok_or_else(|| {
        EvalError::MissingMethod { type_name: type_name.clone(), method: method_name.clone(), params: param_count }
    })?;
    let is_static = module.get_method_signature(method).map(|s| s.is_static).unwrap_or(signature.is_static);
    let cached = CachedMethod {
        module: Arc::downgrade(module),
        method,
        param_count,
        is_static,
        out_mask,
        signature,
        epoch,
    };
    *graph_node.cache.write() = NodeCache::Method(cached.clone());
    Ok(cached)
}

/// Performs the call and caches the return value and connected out parameters in the
/// scope. `None` when resolution or the call failed (already reported).
fn call(ctx: &mut Context<'_>, node: usize, box_id: u32) -> Option<Variant> {
    let cached = match resolve_method(ctx, node) {
        Ok(cached) => cached,
        Err(err) => {
            ctx.report(node, box_id, err);
            return None;
        }
    };
    let graph_node = ctx.node(node);

    let instance: Option<ObjectRef> = if cached.is_static {
        None
    } else if graph_node.is_connected(1) {
        ctx.eat_box(node, 1).as_object().cloned()
    } else {
        ctx.instance.cloned()
    };
    if !cached.is_static && instance.is_none() {
        ctx.report(node, box_id, EvalError::MissingInstance);
        return None;
    }

    let mut params: SmallVec<[Variant; 8]> = SmallVec::with_capacity(cached.param_count);
    for index in 0..cached.param_count {
        if is_out(cached.out_mask, index) {
            params.push(cached.signature.params[index].ty.default_value());
        } else {
            params.push(ctx.read(node, function::PARAMS_BOX + index as u32, function::PARAMS_VALUE + index));
        }
    }

    let Some(module) = cached.module.upgrade() else {
        ctx.report(node, box_id, EvalError::MissingType(text(ctx, node, 0)));
        return None;
    };
    match module.invoke_method(cached.method, instance.as_ref(), &mut params) {
        Ok(returned) => {
            ctx.scope.cache(graph_node.id, function::RETURN_BOX, returned.clone());
            for (index, value) in params.into_iter().enumerate() {
                let out_box = function::PARAMS_BOX + index as u32;
                if is_out(cached.out_mask, index) && graph_node.is_connected(out_box) {
                    ctx.scope.cache(graph_node.id, out_box, value);
                }
            }
            Some(returned)
        }
        Err(err) => {
            ctx.report(node, box_id, err);
            None
        }
    }
}

fn invoke_method(ctx: &mut Context<'_>, node: usize, box_id: u32) -> Variant {
    let node_id = ctx.node(node).id;
    match box_id {
        0 => {
            if call(ctx, node, box_id).is_some() {
                ctx.follow(node, 2);
            }
            Variant::Null
        }
        function::RETURN_BOX => match ctx.scope.cached(node_id, box_id) {
            Some(value) => value.clone(),
            None => call(ctx, node, box_id).unwrap_or_default(),
        },
        out_box if out_box >= function::PARAMS_BOX => {
            if ctx.scope.cached(node_id, out_box).is_none() {
                call(ctx, node, box_id);
            }
            ctx.scope.cached(node_id, out_box).cloned().unwrap_or_default()
        }
        _ => Variant::Null,
    }
}

fn resolve_field(ctx: &Context<'_>, node: usize) -> Result<CachedField, EvalError> {
    let graph_node = ctx.node(node);
    let epoch = ctx.module.reflection_epoch();
    if let NodeCache::Field(cached) = &*graph_node.cache.read() {
        if cached.epoch == epoch && cached.module.strong_count() > 0 {
            return Ok(cached.clone());
        }
    }

    let type_name = text(ctx, node, 0);
    let field_name = text(ctx, node, 1);
    let handle = find_type(ctx, &type_name)?;
    let module = handle.module();
    let field = module
        .find_field(handle.index(), &field_name)
        .ok_or_else(|| EvalError::MissingField { type_name: type_name.clone(), field: field_name.clone() })?;
    let is_static =
        module.get_field_signature(field).map(|s| s.is_static).unwrap_or_else(|| graph_node.value(3).as_bool());
    let cached = CachedField { module: Arc::downgrade(module), field, is_static, epoch };
    *graph_node.cache.write() = NodeCache::Field(cached.clone());
    Ok(cached)
}

/// Resolves the field and the object it is read from or written to.
fn field_target(
    ctx: &mut Context<'_>,
    node: usize,
    instance_box: u32,
) -> Result<(CachedField, Option<ObjectRef>), EvalError> {
    let cached = resolve_field(ctx, node)?;
    if cached.is_static {
        return Ok((cached, None));
    }
    let instance = if ctx.node(node).is_connected(instance_box) {
        ctx.eat_box(node, instance_box).as_object().cloned()
    } else {
        ctx.instance.cloned()
    };
    match instance {
        Some(instance) => Ok((cached, Some(instance))),
        None => Err(EvalError::MissingInstance),
    }
}

fn get_field(ctx: &mut Context<'_>, node: usize, box_id: u32) -> Variant {
    if box_id != 1 {
        return Variant::Null;
    }
    let result = field_target(ctx, node, 0).and_then(|(cached, instance)| {
        let module = cached.module.upgrade().ok_or_else(|| EvalError::MissingType(text(ctx, node, 0)))?;
        module.get_field_value(cached.field, instance.as_ref())
    });
    result.unwrap_or_else(|err| {
        ctx.report(node, box_id, err);
        Variant::Null
    })
}

fn set_field(ctx: &mut Context<'_>, node: usize, box_id: u32) -> Variant {
    if box_id != 0 {
        return Variant::Null;
    }
    let target = field_target(ctx, node, 1);
    let result = target.and_then(|(cached, instance)| {
        let value = ctx.read(node, 2, 4);
        let module = cached.module.upgrade().ok_or_else(|| EvalError::MissingType(text(ctx, node, 0)))?;
        module.set_field_value(cached.field, instance.as_ref(), value)
    });
    match result {
        Ok(()) => ctx.follow(node, 3),
        Err(err) => ctx.report(node, box_id, err),
    }
    Variant::Null
}

/// Bind/Unbind Event. Only the first bind and the last unbind of an event on an instance
/// reach the host subscription trampoline.
fn bind_event(ctx: &mut Context<'_>, node: usize, box_id: u32, bind: bool) -> Variant {
    if box_id != 0 {
        return Variant::Null;
    }
    let event_type = text(ctx, node, 0);
    let event_name = text(ctx, node, 1);
    let method_name = text(ctx, node, 2);

    let Some(event) = ctx.host.events.find(&event_type, &event_name) else {
        ctx.report(node, box_id, EvalError::MissingEvent { type_name: event_type, event: event_name });
        return Variant::Null;
    };
    let Some(instance) = ctx.instance else {
        ctx.report(node, box_id, EvalError::MissingInstance);
        return Variant::Null;
    };
    let Some(target) = ctx.module.resolve_bound_method(ctx.script, &method_name) else {
        let type_name = ctx.script.type_name().to_string();
        ctx.report(node, box_id, EvalError::MissingMethod { type_name, method: method_name, params: 0 });
        return Variant::Null;
    };

    let changed = ctx.script.instances.lock().get_mut(instance.id()).map(|entry| {
        if bind {
            event_table::bind(&mut entry.event_bindings, &event_type, &event_name, target)
        } else {
            event_table::unbind(&mut entry.event_bindings, &event_type, &event_name, &target)
        }
    });
    match changed {
        Some(true) => (event.binder)(if event.is_static { None } else { Some(instance) }, bind),
        Some(false) => {}
        None => {
            ctx.report(node, box_id, EvalError::MissingInstance);
            return Variant::Null;
        }
    }
    ctx.follow(node, 1);
    Variant::Null
}
