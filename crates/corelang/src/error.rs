//! The two catchable-by-nothing error kinds (see [`crate::exception`] for the third,
//! catchable kind: runtime errors, which are represented directly as `Value::Exception`).

use std::fmt;

use crate::pos::TextPos;

/// A binding-time failure: "Name not found", "Name conflict", "Not an lvalue", and the
/// other structural checks the binder performs. Aborts the current `bind` call; when
/// binding a sub-script via `sys.execute` this is re-raised as a runtime "script execution
/// failed" error with the message preserved.
#[derive(Debug, Clone)]
pub struct CompileError {
    pos: Option<TextPos>,
    message: String,
}

impl CompileError {
    #[must_use]
    pub fn new(pos: Option<TextPos>, message: impl Into<String>) -> Self {
        Self { pos, message: message.into() }
    }

    #[must_use]
    pub fn pos(&self) -> Option<&TextPos> {
        self.pos.as_ref()
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.pos {
            Some(pos) => write!(f, "{pos} compilation error: {}", self.message),
            None => write!(f, "compilation error: {}", self.message),
        }
    }
}

impl std::error::Error for CompileError {}
