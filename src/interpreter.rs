//! Graph interpreter.
//!
//! Boxes are evaluated on demand: reading a data input evaluates the upstream node, and
//! following an impulse output runs the downstream node. Every hop pushes a frame on the
//! per-thread [`stack`], so deep or cyclic graphs stop at [`stack::MAX_CALL_STACK`]
//! instead of overflowing the native stack. Failures never unwind; they are reported
//! through [`Context::report`] and the box yields `Variant::Null`.

mod flow;
mod function;
mod math;
mod parameters;
mod scope;
pub mod stack;
mod tools;

use std::sync::Arc;

use tracing::error;

use crate::diagnostics::Diagnostic;
use crate::error::EvalError;
use crate::graph::GraphNode;
use crate::nodes::group;
use crate::objects::ObjectRef;
use crate::scripting::Scripting;
use crate::variant::Variant;
use crate::visual::{ScriptProgram, VisualScript, VisualScriptingModule};

pub use stack::MAX_CALL_STACK;

use scope::Scope;
use stack::{Frame, Overflow};

/// Group handler: `(context, node index, box id) -> value of that box`.
type Handler = fn(&mut Context<'_>, usize, u32) -> Variant;

const GROUP_COUNT: usize = 18;

const HANDLERS: [Option<Handler>; GROUP_COUNT] = {
    let mut table: [Option<Handler>; GROUP_COUNT] = [None; GROUP_COUNT];
    table[group::CONSTANTS as usize] = Some(math::constant as Handler);
    table[group::MATH as usize] = Some(math::evaluate as Handler);
    table[group::PARAMETERS as usize] = Some(parameters::evaluate as Handler);
    table[group::TOOLS as usize] = Some(tools::evaluate as Handler);
    table[group::FUNCTION as usize] = Some(function::evaluate as Handler);
    table[group::FLOW as usize] = Some(flow::evaluate as Handler);
    table
};

pub(crate) struct Context<'a> {
    pub module: &'a VisualScriptingModule,
    pub host: &'a Scripting,
    pub script: &'a Arc<VisualScript>,
    pub program: &'a Arc<ScriptProgram>,
    pub instance: Option<&'a ObjectRef>,
    pub scope: Scope<'a>,
}

impl<'a> Context<'a> {
    pub fn node(&self, index: usize) -> &'a GraphNode {
        let program: &'a ScriptProgram = self.program;
        &program.graph.nodes[index]
    }

    fn frame(&self, node: usize, impulse: bool) -> Frame {
        Frame { script: self.script.clone(), program: self.program.clone(), node, impulse }
    }

    pub fn dispatch(&mut self, node: usize, box_id: u32) -> Variant {
        let group_id = self.node(node).group as usize;
        match HANDLERS.get(group_id).copied().flatten() {
            Some(handler) => handler(self, node, box_id),
            None => Variant::Null,
        }
    }

    /// Evaluates the first connection of `box_id`.
    pub fn eat_box(&mut self, node: usize, box_id: u32) -> Variant {
        self.eat(node, box_id, false)
    }

    fn eat(&mut self, node: usize, box_id: u32, impulse: bool) -> Variant {
        let graph_node = self.node(node);
        let Some(target) = graph_node.first_connection(box_id) else {
            self.report(node, box_id, EvalError::NullBox { node_id: graph_node.id, box_id });
            return Variant::Null;
        };
        let _frame = match stack::push(self.frame(target.node, impulse)) {
            Ok(frame) => frame,
            Err(Overflow::Hit) => {
                self.report(node, box_id, EvalError::CallStackOverflow { limit: MAX_CALL_STACK });
                return Variant::Null;
            }
            Err(Overflow::Silenced) => return Variant::Null,
        };
        self.dispatch(target.node, target.box_id)
    }

    /// Fires an impulse output; unconnected outputs are a no-op.
    pub fn follow(&mut self, node: usize, box_id: u32) {
        if self.node(node).is_connected(box_id) {
            self.eat(node, box_id, true);
        }
    }

    /// Data input with a literal fallback stored in the node values.
    pub fn read(&mut self, node: usize, box_id: u32, literal: usize) -> Variant {
        if self.node(node).is_connected(box_id) {
            self.eat_box(node, box_id)
        } else {
            self.node(node).value(literal)
        }
    }

    /// Data input without a literal; unconnected reads as `Null`.
    pub fn read_input(&mut self, node: usize, box_id: u32) -> Variant {
        if self.node(node).is_connected(box_id) {
            self.eat_box(node, box_id)
        } else {
            Variant::Null
        }
    }

    /// Error sink shared by every handler: logs with the current stack trace and records
    /// a diagnostic on the host.
    pub fn report(&self, node: usize, box_id: u32, error: EvalError) {
        let node_id = self.node(node).id;
        let trace = stack::stack_trace();
        let script = self.script.type_name();
        if self.host.config().log_stack_traces {
            error!(script, node = node_id, box_id, "{error}\n{trace}");
        } else {
            error!(script, node = node_id, box_id, "{error}");
        }
        self.host.diagnostics.push(Diagnostic {
            error,
            script: Some(self.script.id()),
            node_id,
            box_id,
            stack_trace: trace,
        });
    }
}

/// Runs a graph method and returns the value its Return node stored.
pub(crate) fn invoke(
    module: &VisualScriptingModule,
    host: &Scripting,
    script: &Arc<VisualScript>,
    program: &Arc<ScriptProgram>,
    method: usize,
    instance: Option<&ObjectRef>,
    params: &[Variant],
) -> Variant {
    let Some(entry) = program.methods.get(method) else {
        return Variant::Null;
    };
    let _timing = host.profiler.scope(&entry.profiler_label);
    let mut ctx = Context { module, host, script, program, instance, scope: Scope::new(params) };
    if enter(&mut ctx, entry.node, 0).is_some() {
        std::mem::take(&mut ctx.scope.function_return)
    } else {
        Variant::Null
    }
}

/// Evaluates a single box from outside any method, e.g. a delayed continuation.
pub(crate) fn evaluate(
    module: &VisualScriptingModule,
    host: &Scripting,
    script: &Arc<VisualScript>,
    program: &Arc<ScriptProgram>,
    node: usize,
    box_id: u32,
    instance: Option<&ObjectRef>,
) -> Variant {
    if node >= program.graph.nodes.len() {
        return Variant::Null;
    }
    let mut ctx = Context { module, host, script, program, instance, scope: Scope::new(&[]) };
    enter(&mut ctx, node, box_id).unwrap_or_default()
}

fn enter(ctx: &mut Context<'_>, node: usize, box_id: u32) -> Option<Variant> {
    let _frame = match stack::push(ctx.frame(node, true)) {
        Ok(frame) => frame,
        Err(Overflow::Hit) => {
            ctx.report(node, box_id, EvalError::CallStackOverflow { limit: MAX_CALL_STACK });
            return None;
        }
        Err(Overflow::Silenced) => return None,
    };
    Some(ctx.dispatch(node, box_id))
}
