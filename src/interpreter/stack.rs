//! Per-thread call stack of node evaluations.

use std::cell::RefCell;
use std::fmt::Write as _;
use std::marker::PhantomData;
use std::sync::Arc;

use uuid::Uuid;

use crate::nodes::{function, group, parameters};
use crate::visual::{ScriptProgram, VisualScript};

/// Deepest chain of nested box evaluations before evaluation bails out.
pub const MAX_CALL_STACK: usize = 100;

pub(crate) struct Frame {
    pub script: Arc<VisualScript>,
    pub program: Arc<ScriptProgram>,
    pub node: usize,
    /// Pushed by a method entry or a followed impulse output rather than a data read.
    pub impulse: bool,
}

impl Frame {
    fn same_node(&self, other: &Frame) -> bool {
        self.node == other.node && Arc::ptr_eq(&self.program, &other.program)
    }
}

struct CallStack {
    frames: Vec<Frame>,
    /// After an overflow, pushes fail until the stack unwinds below this depth.
    silenced_until: Option<usize>,
    /// Overflows since the stack was last empty.
    overflows: u32,
}

thread_local! {
    static STACK: RefCell<CallStack> = RefCell::new(CallStack {
        frames: Vec::with_capacity(MAX_CALL_STACK),
        silenced_until: None,
        overflows: 0,
    });
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Overflow {
    /// Push past the limit; the caller reports it.
    Hit,
    /// The runaway chain that hit the limit is still unwinding.
    Silenced,
}

/// Pops its frame when dropped. Not `Send`: frames belong to the thread that pushed them.
pub(crate) struct FrameGuard {
    _thread_bound: PhantomData<*const ()>,
}

impl Drop for FrameGuard {
    fn drop(&mut self) {
        STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            stack.frames.pop();
            let depth = stack.frames.len();
            if stack.silenced_until.is_some_and(|until| depth < until) {
                stack.silenced_until = None;
            }
            if depth == 0 {
                stack.overflows = 0;
            }
        });
    }
}

/// Index of the impulse frame that started the runaway chain on top of the stack: the
/// innermost impulse frame for a node other than the one that hit the limit. Once it
/// returns, its caller carries on with its remaining impulses. A second overflow within
/// the same top-level call silences everything down to the entry.
fn runaway_root(stack: &CallStack) -> usize {
    if stack.overflows > 1 {
        return 0;
    }
    let Some(top) = stack.frames.last() else { return 0 };
    stack.frames.iter().rposition(|frame| frame.impulse && !frame.same_node(top)).unwrap_or(0)
}

pub(crate) fn push(frame: Frame) -> Result<FrameGuard, Overflow> {
    STACK.with(|stack| {
        let mut stack = stack.borrow_mut();
        if stack.silenced_until.is_some() {
            return Err(Overflow::Silenced);
        }
        if stack.frames.len() >= MAX_CALL_STACK {
            stack.overflows += 1;
            let root = runaway_root(&stack);
            stack.silenced_until = Some(root + 1);
            return Err(Overflow::Hit);
        }
        stack.frames.push(frame);
        Ok(FrameGuard { _thread_bound: PhantomData })
    })
}

/// Number of frames on the calling thread.
pub fn depth() -> usize {
    STACK.with(|stack| stack.borrow().frames.len())
}

/// Innermost frame first, one `    at <asset>:<script id> in node <name>` line each.
pub fn stack_trace() -> String {
    STACK.with(|stack| {
        let stack = stack.borrow();
        let mut out = String::new();
        for frame in stack.frames.iter().rev() {
            let _ = writeln!(
                out,
                "    at {}:{} in node {}",
                frame.script.name(),
                frame.script.type_name(),
                node_name(&frame.script, &frame.program, frame.node)
            );
        }
        out
    })
}

fn node_name(script: &VisualScript, program: &ScriptProgram, index: usize) -> String {
    let Some(node) = program.graph.nodes.get(index) else {
        return format!("#{index}");
    };
    let text = |i: usize| node.values.get(i).and_then(|v| v.as_str()).unwrap_or_default().to_string();
    match (node.group, node.type_id) {
        (group::PARAMETERS, parameters::GET | parameters::SET) => Uuid::parse_str(&text(0))
            .ok()
            .and_then(|id| program.graph.find_parameter(id))
            .map(|param| param.name.clone())
            .unwrap_or_else(|| text(0)),
        (group::FUNCTION, function::METHOD_OVERRIDE) => text(0),
        (group::FUNCTION, function::INVOKE_METHOD) => format!("{}.{}()", text(0), text(1)),
        (group::FUNCTION, function::FUNCTION) => format!("{}::{}", script.name(), text(0)),
        (group_id, type_id) => match crate::nodes::display_name(group_id, type_id) {
            Some(name) => format!("{name} ({})", node.id),
            None => format!("{group_id}:{type_id}"),
        },
    }
}
