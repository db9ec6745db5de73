//! Thread-local call-stack tracking.
//!
//! Every `invoke`/`instantiate` pushes the call-site position for the duration of the call
//! via a scoped guard; dropping the guard pops, so an early return, a propagated exception,
//! or even a host panic unwinding through the frame all restore the stack correctly without
//! special-casing any particular exit path.

use std::cell::RefCell;

use crate::{exception::StackFrame, pos::TextPos};

thread_local! {
    static CALL_STACK: RefCell<Vec<TextPos>> = const { RefCell::new(Vec::new()) };
}

/// RAII guard returned by [`push_call`]. Pops its frame on drop, in LIFO order regardless of
/// how the scope that created it is left.
pub struct CallGuard {
    _private: (),
}

impl Drop for CallGuard {
    fn drop(&mut self) {
        CALL_STACK.with_borrow_mut(|stack| {
            stack.pop();
        });
    }
}

/// Pushes `pos` as the current call site; the frame is popped when the returned guard drops.
#[must_use]
pub fn push_call(pos: TextPos) -> CallGuard {
    CALL_STACK.with_borrow_mut(|stack| stack.push(pos));
    CallGuard { _private: () }
}

/// Current call-stack depth, used by [`crate::resource::ResourceTracker::check_recursion_depth`].
#[must_use]
pub fn current_depth() -> usize {
    CALL_STACK.with_borrow(Vec::len)
}

/// Snapshots the stack, deepest (most recent call) first, for attaching to a newly
/// constructed [`crate::exception::ExceptionValue`].
#[must_use]
pub fn capture_stack_trace() -> Vec<StackFrame> {
    CALL_STACK.with_borrow(|stack| stack.iter().rev().cloned().map(StackFrame::new).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_pops_on_drop() {
        assert_eq!(current_depth(), 0);
        {
            let _g = push_call(TextPos::new("t", 1, 1));
            assert_eq!(current_depth(), 1);
        }
        assert_eq!(current_depth(), 0);
    }

    #[test]
    fn nested_guards_pop_in_lifo_order() {
        let outer = push_call(TextPos::new("t", 1, 1));
        let trace = {
            let _inner = push_call(TextPos::new("t", 2, 1));
            capture_stack_trace()
        };
        assert_eq!(trace.len(), 2);
        assert_eq!(trace[0].pos().line(), 2);
        assert_eq!(trace[1].pos().line(), 1);
        drop(outer);
        assert_eq!(current_depth(), 0);
    }
}
