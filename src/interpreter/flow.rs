use super::Context;
use crate::error::EvalError;
use crate::nodes::flow;
use crate::variant::Variant;

/// Iterator value written by a loop's break box; the next increment ends the loop.
const BREAK_ITERATOR: i32 = i32::MAX - 1;
const WHILE_STOPPED: i32 = -1;

pub(super) fn evaluate(ctx: &mut Context<'_>, node: usize, box_id: u32) -> Variant {
    match ctx.node(node).type_id {
        flow::IF => {
            if box_id == 0 {
                let condition = ctx.read(node, 1, 0).as_bool();
                ctx.follow(node, if condition { 2 } else { 3 });
            }
            Variant::Null
        }
        flow::FOR => for_loop(ctx, node, box_id),
        flow::WHILE => while_loop(ctx, node, box_id),
        flow::SEQUENCE => {
            if box_id == 0 {
                let mut outputs: Vec<u32> = ctx.node(node).boxes.iter().map(|b| b.id).filter(|id| *id >= 1).collect();
                outputs.sort_unstable();
                for output in outputs {
                    ctx.follow(node, output);
                }
            }
            Variant::Null
        }
        flow::BRANCH_ON_ENUM => {
            if box_id == 0 {
                branch_on_enum(ctx, node);
            }
            Variant::Null
        }
        flow::DELAY => {
            if box_id == 0 {
                delay(ctx, node);
            }
            Variant::Null
        }
        flow::ARRAY_FOR_EACH => array_for_each(ctx, node, box_id),
        flow::DICTIONARY_FOR_EACH => dictionary_for_each(ctx, node, box_id),
        _ => Variant::Null,
    }
}

fn for_loop(ctx: &mut Context<'_>, node: usize, box_id: u32) -> Variant {
    let id = ctx.node(node).id;
    match box_id {
        0 => {
            let start = ctx.read(node, 1, 0).as_i32();
            let count = ctx.read(node, 2, 1).as_i32();
            ctx.scope.cache(id, 0, Variant::Int(start));
            while ctx.scope.cached_i32(id, 0).unwrap_or(count) < count {
                ctx.follow(node, 4);
                let current = ctx.scope.cached_i32(id, 0).unwrap_or(count);
                ctx.scope.cache(id, 0, Variant::Int(current.wrapping_add(1)));
            }
            ctx.follow(node, 6);
            Variant::Null
        }
        3 => {
            ctx.scope.cache(id, 0, Variant::Int(BREAK_ITERATOR));
            Variant::Null
        }
        5 => ctx.scope.cached(id, 0).cloned().unwrap_or_default(),
        _ => Variant::Null,
    }
}

fn while_loop(ctx: &mut Context<'_>, node: usize, box_id: u32) -> Variant {
    let id = ctx.node(node).id;
    match box_id {
        0 => {
            ctx.scope.cache(id, 0, Variant::Int(0));
            loop {
                if ctx.scope.cached_i32(id, 0) == Some(WHILE_STOPPED) || !ctx.read(node, 1, 0).as_bool() {
                    break;
                }
                ctx.follow(node, 3);
                match ctx.scope.cached_i32(id, 0) {
                    Some(WHILE_STOPPED) | None => break,
                    Some(current) => ctx.scope.cache(id, 0, Variant::Int(current.wrapping_add(1))),
                }
            }
            ctx.follow(node, 5);
            Variant::Null
        }
        2 => {
            ctx.scope.cache(id, 0, Variant::Int(WHILE_STOPPED));
            Variant::Null
        }
        4 => ctx.scope.cached(id, 0).cloned().unwrap_or_default(),
        _ => Variant::Null,
    }
}

/// Follows case box `2 + i` where `i` is the position of the enum value in the node's
/// little-endian `i32` case table.
fn branch_on_enum(ctx: &mut Context<'_>, node: usize) {
    let Variant::Enum { value, .. } = ctx.read_input(node, 1) else {
        return;
    };
    let cases = ctx.node(node).value(0);
    let Some(table) = cases.as_blob().filter(|blob| blob.len() % 4 == 0) else {
        return;
    };
    let position = table
        .chunks_exact(4)
        .position(|chunk| i64::from(i32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]])) == value);
    if let Some(position) = position {
        ctx.follow(node, 2 + position as u32);
    }
}

/// Short delays continue inline; longer ones re-enter the graph at the downstream box
/// from the main-thread queue, as long as the instance still exists by then.
fn delay(ctx: &mut Context<'_>, node: usize) {
    let duration = ctx.read(node, 1, 0).as_f32();
    if duration <= ctx.host.config().zero_tolerance {
        ctx.follow(node, 2);
        return;
    }
    let program = ctx.program;
    let Some(target) = ctx.node(node).first_connection(2) else {
        return;
    };
    let target_node = program.graph.nodes[target.node].id;
    let target_box = target.box_id;
    let script_id = ctx.script.id();
    let instance_id = ctx.instance.map(|instance| instance.id());
    let module = ctx.module.weak_self();
    ctx.host.main_thread.post(duration, move || {
        if let Some(module) = module.upgrade() {
            module.evaluate(script_id, target_node, target_box, instance_id);
        }
    });
}

fn array_for_each(ctx: &mut Context<'_>, node: usize, box_id: u32) -> Variant {
    let id = ctx.node(node).id;
    match box_id {
        0 => {
            let items = match ctx.read_input(node, 1) {
                Variant::Null => Vec::new(),
                Variant::Array(items) => items,
                other => {
                    let actual = other.kind().label().to_string();
                    ctx.report(node, 1, EvalError::WrongVariantType { expected: "Array".to_string(), actual });
                    return Variant::Null;
                }
            };
            let len = items.len();
            ctx.scope.cache(id, 1, Variant::Array(items));
            run_indexed(ctx, node, id, len);
            Variant::Null
        }
        2 => {
            ctx.scope.cache(id, 0, Variant::Int(BREAK_ITERATOR));
            Variant::Null
        }
        4 => {
            let index = ctx.scope.cached_i32(id, 0).unwrap_or(-1);
            match ctx.scope.cached(id, 1) {
                Some(Variant::Array(items)) if index >= 0 => items.get(index as usize).cloned().unwrap_or_default(),
                _ => Variant::Null,
            }
        }
        5 => ctx.scope.cached(id, 0).cloned().unwrap_or_default(),
        _ => Variant::Null,
    }
}

/// Entries are visited in the dictionary's storage order, which is not a stable contract.
fn dictionary_for_each(ctx: &mut Context<'_>, node: usize, box_id: u32) -> Variant {
    let id = ctx.node(node).id;
    match box_id {
        0 => {
            let dictionary = match ctx.read_input(node, 1) {
                Variant::Null => Variant::Dictionary(Default::default()),
                dictionary @ Variant::Dictionary(_) => dictionary,
                other => {
                    let actual = other.kind().label().to_string();
                    ctx.report(node, 1, EvalError::WrongVariantType { expected: "Dictionary".to_string(), actual });
                    return Variant::Null;
                }
            };
            let len = match &dictionary {
                Variant::Dictionary(entries) => entries.len(),
                _ => 0,
            };
            ctx.scope.cache(id, 1, dictionary);
            run_indexed(ctx, node, id, len);
            Variant::Null
        }
        2 => {
            ctx.scope.cache(id, 0, Variant::Int(BREAK_ITERATOR));
            Variant::Null
        }
        4 | 5 => {
            let index = ctx.scope.cached_i32(id, 0).unwrap_or(-1);
            let entry = match ctx.scope.cached(id, 1) {
                Some(Variant::Dictionary(entries)) if index >= 0 => entries.entry_at(index as usize),
                _ => None,
            };
            match entry {
                Some((key, _)) if box_id == 4 => key.clone(),
                Some((_, value)) => value.clone(),
                None => Variant::Null,
            }
        }
        _ => Variant::Null,
    }
}

/// Shared body of the for-each nodes: body on box 3, completed on box 6.
fn run_indexed(ctx: &mut Context<'_>, node: usize, id: u32, len: usize) {
    ctx.scope.cache(id, 0, Variant::Int(0));
    loop {
        let index = ctx.scope.cached_i32(id, 0).unwrap_or(i32::MAX);
        if index < 0 || index as usize >= len {
            break;
        }
        ctx.follow(node, 3);
        let current = ctx.scope.cached_i32(id, 0).unwrap_or(i32::MAX);
        ctx.scope.cache(id, 0, Variant::Int(current.saturating_add(1)));
    }
    ctx.follow(node, 6);
}
