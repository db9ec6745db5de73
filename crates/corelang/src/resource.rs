//! Optional allocation/recursion-depth budget threaded through the evaluator and host
//! bridge, so an embedding (the CLI's `-m` flag) can sandbox a script without the evaluator
//! special-casing limits at every call site — it just asks the tracker.

use std::fmt;

use crate::value::RuntimeError;

/// Raised when a [`ResourceTracker`] rejects an allocation or a call. Converted to a
/// catchable runtime "out of memory"/"stack overflow" error at the call site that observed
/// it; an embedding that never installs a limit (see [`NoLimitTracker`]) never produces one.
#[derive(Debug, Clone)]
pub enum ResourceLimitError {
    OutOfMemory { requested: usize, budget: usize },
    RecursionTooDeep { depth: usize, limit: usize },
}

impl fmt::Display for ResourceLimitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfMemory { requested, budget } => {
                write!(f, "Out of memory: requested {requested} bytes, budget is {budget}")
            }
            Self::RecursionTooDeep { depth, limit } => {
                write!(f, "Stack overflow: recursion depth {depth} exceeds limit {limit}")
            }
        }
    }
}

impl From<ResourceLimitError> for RuntimeError {
    fn from(err: ResourceLimitError) -> Self {
        RuntimeError::new(err.to_string())
    }
}

/// Threaded through the evaluator wherever new storage is allocated (exec scope, array,
/// object, string-buffer backing store) and wherever a call frame would be pushed.
pub trait ResourceTracker {
    /// Checked before allocating a new exec scope, array, object, or buffer backing store.
    /// `size_hint` is an approximate byte cost; trackers that don't care about memory can
    /// ignore it and always return `Ok`.
    fn on_allocate(&self, size_hint: usize) -> Result<(), ResourceLimitError>;

    /// Checked by the call-stack guard before pushing a new frame.
    fn check_recursion_depth(&self, current_depth: usize) -> Result<(), ResourceLimitError>;
}

/// Used by embeddings that don't need sandboxing. Both checks are unconditional passes, so
/// the evaluator pays only a static dispatch (monomorphised away in practice) for carrying a
/// tracker at all.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLimitTracker;

impl ResourceTracker for NoLimitTracker {
    fn on_allocate(&self, _size_hint: usize) -> Result<(), ResourceLimitError> {
        Ok(())
    }

    fn check_recursion_depth(&self, _current_depth: usize) -> Result<(), ResourceLimitError> {
        Ok(())
    }
}

/// Enforces a byte budget and a recursion-depth ceiling derived from it, backing the CLI's
/// `-m MEMORY_LIMIT_MB` flag.
///
/// The recursion ceiling is a coarse heuristic (bytes-per-frame estimate), not a precise
/// accounting of actual frame size; its purpose is to turn unbounded script recursion into a
/// catchable exception before it overflows the host stack, not to model memory exactly.
#[derive(Debug)]
pub struct MemoryLimitTracker {
    budget_bytes: usize,
    used_bytes: std::cell::Cell<usize>,
    max_recursion_depth: usize,
}

/// Rough per-frame cost used to derive a recursion ceiling from a byte budget.
const ESTIMATED_BYTES_PER_FRAME: usize = 256;
/// Recursion is also capped independently of the budget, so a generous `-m` value still
/// fails fast instead of relying on the host stack to survive an extremely deep script call.
const MAX_RECURSION_DEPTH_CEILING: usize = 100_000;

impl MemoryLimitTracker {
    #[must_use]
    pub fn new(budget_bytes: usize) -> Self {
        let max_recursion_depth =
            (budget_bytes / ESTIMATED_BYTES_PER_FRAME).min(MAX_RECURSION_DEPTH_CEILING).max(1);
        Self { budget_bytes, used_bytes: std::cell::Cell::new(0), max_recursion_depth }
    }
}

impl ResourceTracker for MemoryLimitTracker {
    fn on_allocate(&self, size_hint: usize) -> Result<(), ResourceLimitError> {
        let used = self.used_bytes.get();
        let next = used.saturating_add(size_hint);
        if next > self.budget_bytes {
            return Err(ResourceLimitError::OutOfMemory { requested: size_hint, budget: self.budget_bytes });
        }
        self.used_bytes.set(next);
        Ok(())
    }

    fn check_recursion_depth(&self, current_depth: usize) -> Result<(), ResourceLimitError> {
        if current_depth >= self.max_recursion_depth {
            return Err(ResourceLimitError::RecursionTooDeep {
                depth: current_depth,
                limit: self.max_recursion_depth,
            });
        }
        Ok(())
    }
}
