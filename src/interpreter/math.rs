use std::cmp::Ordering;

use super::Context;
use crate::nodes::math;
use crate::variant::{Variant, VariantKind};

pub(super) fn constant(ctx: &mut Context<'_>, node: usize, _box_id: u32) -> Variant {
    ctx.node(node).value(0)
}

pub(super) fn evaluate(ctx: &mut Context<'_>, node: usize, box_id: u32) -> Variant {
    let op = ctx.node(node).type_id;
    if op == math::NOT {
        return match box_id {
            1 => Variant::Bool(!ctx.read(node, 0, 0).as_bool()),
            _ => Variant::Null,
        };
    }
    if box_id != 2 {
        return Variant::Null;
    }
    let a = ctx.read(node, 0, 0);
    match op {
        math::AND => Variant::Bool(a.as_bool() && ctx.read(node, 1, 1).as_bool()),
        math::OR => Variant::Bool(a.as_bool() || ctx.read(node, 1, 1).as_bool()),
        math::ADD | math::SUBTRACT | math::MULTIPLY | math::DIVIDE => {
            let b = ctx.read(node, 1, 1);
            arithmetic(op, &a, &b)
        }
        math::LESS..=math::GREATER_EQUAL => {
            let b = ctx.read(node, 1, 1);
            Variant::Bool(compare(op, &a, &b))
        }
        _ => Variant::Null,
    }
}

fn is_numeric(kind: VariantKind) -> bool {
    matches!(
        kind,
        VariantKind::Bool
            | VariantKind::Int
            | VariantKind::Int64
            | VariantKind::Float
            | VariantKind::Double
            | VariantKind::Enum
    )
}

fn text(value: &Variant) -> String {
    match value {
        Variant::String(s) => s.clone(),
        Variant::Bool(v) => v.to_string(),
        Variant::Int(v) => v.to_string(),
        Variant::Int64(v) => v.to_string(),
        Variant::Float(v) => v.to_string(),
        Variant::Double(v) => v.to_string(),
        Variant::Enum { value, .. } => value.to_string(),
        _ => String::new(),
    }
}

/// Float wins over integers, 64-bit over 32-bit; integer math wraps and integer
/// division by zero yields zero.
fn arithmetic(op: u16, a: &Variant, b: &Variant) -> Variant {
    if op == math::ADD && (a.kind() == VariantKind::String || b.kind() == VariantKind::String) {
        return Variant::String(text(a) + &text(b));
    }
    let kinds = [a.kind(), b.kind()];
    if kinds.contains(&VariantKind::Double) {
        let (x, y) = (a.as_f64(), b.as_f64());
        return Variant::Double(match op {
            math::ADD => x + y,
            math::SUBTRACT => x - y,
            math::MULTIPLY => x * y,
            _ => x / y,
        });
    }
    if kinds.contains(&VariantKind::Float) {
        let (x, y) = (a.as_f32(), b.as_f32());
        return Variant::Float(match op {
            math::ADD => x + y,
            math::SUBTRACT => x - y,
            math::MULTIPLY => x * y,
            _ => x / y,
        });
    }
    let (x, y) = (a.as_i64(), b.as_i64());
    let result = match op {
        math::ADD => x.wrapping_add(y),
        math::SUBTRACT => x.wrapping_sub(y),
        math::MULTIPLY => x.wrapping_mul(y),
        _ if y == 0 => 0,
        _ => x.wrapping_div(y),
    };
    if kinds.contains(&VariantKind::Int64) {
        Variant::Int64(result)
    } else {
        let (x, y) = (x as i32, y as i32);
        Variant::Int(match op {
            math::ADD => x.wrapping_add(y),
            math::SUBTRACT => x.wrapping_sub(y),
            math::MULTIPLY => x.wrapping_mul(y),
            _ if y == 0 => 0,
            _ => x.wrapping_div(y),
        })
    }
}

fn compare(op: u16, a: &Variant, b: &Variant) -> bool {
    let ordering = if is_numeric(a.kind()) && is_numeric(b.kind()) {
        a.as_f64().partial_cmp(&b.as_f64())
    } else {
        match (a, b) {
            (Variant::String(x), Variant::String(y)) => Some(x.cmp(y)),
            _ if a == b => Some(Ordering::Equal),
            _ => None,
        }
    };
    match op {
        math::EQUAL => ordering == Some(Ordering::Equal),
        math::NOT_EQUAL => ordering != Some(Ordering::Equal),
        math::LESS => ordering == Some(Ordering::Less),
        math::GREATER => ordering == Some(Ordering::Greater),
        math::LESS_EQUAL => matches!(ordering, Some(Ordering::Less | Ordering::Equal)),
        math::GREATER_EQUAL => matches!(ordering, Some(Ordering::Greater | Ordering::Equal)),
        _ => false,
    }
}
