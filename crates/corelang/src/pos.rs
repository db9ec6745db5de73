//! Source positions attached to AST nodes and stack-trace frames.

use std::{fmt, rc::Rc};

/// A `(file, line, column)` triple. `line` and `column` are 1-based.
///
/// Cheap to clone: the file name is shared via `Rc`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TextPos {
    file: Rc<str>,
    line: u32,
    column: u32,
}

impl TextPos {
    #[must_use]
    pub fn new(file: impl Into<Rc<str>>, line: u32, column: u32) -> Self {
        Self { file: file.into(), line, column }
    }

    #[must_use]
    pub fn file(&self) -> &str {
        &self.file
    }

    #[must_use]
    pub fn line(&self) -> u32 {
        self.line
    }

    #[must_use]
    pub fn column(&self) -> u32 {
        self.column
    }
}

impl fmt::Display for TextPos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.file, self.line)
    }
}
