//! Top-level facade: owns the pieces an embedder needs to bind and execute one script —
//! the name registry, the injected `sys` root, and the bind→execute pipeline itself — so
//! neither the CLI nor a test has to reassemble that sequence by hand.

use std::rc::Rc;

use crate::{
    ast::Program,
    binder,
    error::CompileError,
    eval::{self, EvalContext},
    exception::ExceptionValue,
    intern::NameRegistry,
    resource::ResourceTracker,
    scope::{BindContext, ExecScope},
    sys_namespace,
    value::{Value, ValueFactory},
};

/// Everything that can go wrong running a script, distinguished the way [`crate::error`]
/// and [`crate::exception`] distinguish them: a `CompileError` aborts before a single
/// statement executes, an `ExceptionValue` is whatever propagated out of the program
/// unhandled.
#[derive(Debug)]
pub enum RunError {
    Compile(CompileError),
    Unhandled(Rc<ExceptionValue>),
}

impl std::fmt::Display for RunError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Compile(e) => write!(f, "{e}"),
            Self::Unhandled(exc) => {
                let pos = exc.stack_trace().first().map(|frame| frame.pos().to_string());
                match pos {
                    Some(pos) => write!(f, "{pos} runtime error: {}", exc.format_with_trace()),
                    None => write!(f, "runtime error: {}", exc.format_with_trace()),
                }
            }
        }
    }
}

impl std::error::Error for RunError {}

/// One interpreter instance: a name registry shared across the top-level script and any
/// sub-scripts, and the host `sys` root built once against that registry. Both must come
/// from the same registry — a `sys` namespace built against a different registry's
/// `NameId` numbering would resolve member lookups against the wrong names.
pub struct Runner {
    registry: NameRegistry,
    sys_name: crate::intern::NameInfo,
    sys_root: sys_namespace::SysRoot,
}

impl Runner {
    /// Builds a fresh interpreter instance. `script_args` becomes the injected
    /// `sys.args` string array.
    #[must_use]
    pub fn new(script_args: Vec<String>) -> Self {
        let registry = NameRegistry::new();
        let sys_name = registry.register("sys");
        let sys_root = sys_namespace::build(&registry, script_args);
        Self { registry, sys_name, sys_root }
    }

    #[must_use]
    pub fn registry(&self) -> &NameRegistry {
        &self.registry
    }

    /// Binds and runs `program` against a fresh root scope, with `sys` already declared
    /// and initialized. Returns the program's `return` value, or `Value::Void` for a
    /// script that falls off the end.
    pub fn run(&self, program: &Program, tracker: &dyn ResourceTracker) -> Result<Value, RunError> {
        let context = BindContext::new();
        let root_bind_scope = context.create_root_scope();
        let sys_descriptor = root_bind_scope.declare_sys_constant(&self.sys_name);

        binder::bind_program(&root_bind_scope, program).map_err(RunError::Compile)?;

        let descriptor = program
            .block
            .descriptor
            .get()
            .expect("system error: bind_program succeeded without freezing the root block's descriptor")
            .clone();
        let root_exec_scope = ExecScope::new_root(descriptor);
        sys_descriptor.set_initialize(&root_exec_scope, Value::SysNamespace(Rc::clone(&self.sys_root.namespace)));

        let ctx = EvalContext { tracker, factory: ValueFactory::new(), string_class: Rc::clone(&self.sys_root.string_class) };

        eval::run_program(&ctx, &root_exec_scope, program).map_err(|thrown| match thrown {
            Value::Exception(exc) => RunError::Unhandled(exc),
            other => unreachable!("system error: run_program's Err is always Value::Exception, got {other:?}"),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::cell::OnceCell;

    use super::*;
    use crate::{
        ast::{
            expr::Literal,
            stmt::{Block, Stmt},
            Expr,
        },
        pos::TextPos,
        resource::NoLimitTracker,
    };

    fn pos() -> TextPos {
        TextPos::new("t", 1, 1)
    }

    #[test]
    fn empty_program_returns_void() {
        let runner = Runner::new(Vec::new());
        let program = Program::new(Block::new(Vec::new()));
        let result = runner.run(&program, &NoLimitTracker).unwrap();
        assert!(matches!(result, Value::Void));
    }

    #[test]
    fn return_statement_yields_value() {
        let runner = Runner::new(Vec::new());
        let stmts = vec![Stmt::Return {
            pos: pos(),
            value: Some(Expr::Literal { pos: pos(), value: Literal::Integer(7) }),
        }];
        let program = Program::new(Block::new(stmts));
        let result = runner.run(&program, &NoLimitTracker).unwrap();
        assert!(matches!(result, Value::Integer(7)));
    }

    #[test]
    fn sys_is_bound_in_root_scope() {
        let runner = Runner::new(Vec::new());
        let sys_name = runner.registry().register("sys");
        let stmts = vec![Stmt::Expression(Expr::Name {
            pos: pos(),
            name: sys_name,
            descriptor: OnceCell::new(),
        })];
        let program = Program::new(Block::new(stmts));
        let result = runner.run(&program, &NoLimitTracker);
        assert!(result.is_ok());
    }

    #[test]
    fn unhandled_exception_reports_runtime_error() {
        let runner = Runner::new(Vec::new());
        let stmts = vec![Stmt::Throw { pos: pos(), value: Expr::Literal { pos: pos(), value: Literal::Str("boom".into()) } }];
        let program = Program::new(Block::new(stmts));
        let err = runner.run(&program, &NoLimitTracker).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("runtime error"));
        assert!(message.contains("boom"));
    }
}
