//! The one catchable error kind: values materialised by a `throw` statement or by the
//! evaluator converting a `RuntimeError` at the point it's first observed.

use std::fmt;

use crate::{pos::TextPos, value::Value};

/// One entry in a captured stack trace: the call site that was active when the exception
/// was built, not the throw site itself (the throw site is the first frame only when the
/// exception was constructed directly inside the throwing frame, which is the common case).
#[derive(Debug, Clone)]
pub struct StackFrame {
    pos: TextPos,
}

impl StackFrame {
    #[must_use]
    pub fn new(pos: TextPos) -> Self {
        Self { pos }
    }

    #[must_use]
    pub fn pos(&self) -> &TextPos {
        &self.pos
    }
}

impl fmt::Display for StackFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.pos)
    }
}

/// A thrown value plus the call-stack frames active at the moment it was captured, deepest
/// (throw site) first.
#[derive(Debug)]
pub struct ExceptionValue {
    payload: Value,
    stack_trace: Vec<StackFrame>,
}

impl ExceptionValue {
    #[must_use]
    pub fn new(payload: Value, stack_trace: Vec<StackFrame>) -> Self {
        Self { payload, stack_trace }
    }

    #[must_use]
    pub fn payload(&self) -> &Value {
        &self.payload
    }

    #[must_use]
    pub fn stack_trace(&self) -> &[StackFrame] {
        &self.stack_trace
    }

    /// Formats the way the top-level runner and `sys.execute`'s failure path print an
    /// unhandled exception: the payload's display string, then one line per frame.
    #[must_use]
    pub fn format_with_trace(&self) -> String {
        let mut out = self.payload.to_display_string().unwrap_or_else(|e| e.message().to_owned());
        for frame in &self.stack_trace {
            out.push('\n');
            out.push_str("  at ");
            out.push_str(&frame.to_string());
        }
        out
    }
}
