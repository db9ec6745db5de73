//! End-to-end tests through the public [`Runner`] facade: binding and executing a
//! hand-built [`Program`] with the real `sys` root (not the eval-module's local stub),
//! covering the host bridge, compile-time rejection, and resource limits.

use std::cell::OnceCell;

use corelang::{
    ast::{
        decl::{Param, VarDecl},
        expr::Literal,
        stmt::{Block, Stmt},
        BinaryOp, Expr, Program,
    },
    pos::TextPos,
    resource::{MemoryLimitTracker, NoLimitTracker},
    runner::RunError,
    value::Value,
    Runner,
};

fn pos() -> TextPos {
    TextPos::new("t", 1, 1)
}

fn name_expr(runner: &Runner, text: &str) -> Expr {
    Expr::Name { pos: pos(), name: runner.registry().register(text), descriptor: OnceCell::new() }
}

fn member(object: Expr, runner: &Runner, text: &str) -> Expr {
    Expr::Member { pos: pos(), object: Box::new(object), name: runner.registry().register(text) }
}

fn invoke(callee: Expr, args: Vec<Expr>) -> Expr {
    Expr::Invoke { pos: pos(), callee: Box::new(callee), args }
}

fn str_lit(text: &str) -> Expr {
    Expr::Literal { pos: pos(), value: Literal::Str(text.into()) }
}

fn int_lit(value: i64) -> Expr {
    Expr::Literal { pos: pos(), value: Literal::Integer(value) }
}

/// `sys.str_to_int("42")` round-trips through the host bridge's arity-based overload
/// resolution and back into a script-visible `Value`.
#[test]
fn sys_str_to_int_parses_decimal_digits() {
    let runner = Runner::new(Vec::new());
    let call = invoke(member(name_expr(&runner, "sys"), &runner, "str_to_int"), vec![str_lit("42")]);
    let program = Program::new(Block::new(vec![Stmt::Return { pos: pos(), value: Some(call) }]));
    let result = runner.run(&program, &NoLimitTracker).unwrap();
    assert_eq!(result.get_integer().unwrap(), 42);
}

/// A non-digit argument is a catchable runtime error, not a panic, and it propagates
/// through the `Runner` as an unhandled exception when nothing catches it.
#[test]
fn sys_str_to_int_rejects_non_digits() {
    let runner = Runner::new(Vec::new());
    let call = invoke(member(name_expr(&runner, "sys"), &runner, "str_to_int"), vec![str_lit("abc")]);
    let program = Program::new(Block::new(vec![Stmt::Return { pos: pos(), value: Some(call) }]));
    let err = runner.run(&program, &NoLimitTracker).unwrap_err();
    assert!(matches!(err, RunError::Unhandled(_)));
}

/// `sys.current_time_millis()` is bound and callable with zero arguments, and returns an
/// integer timestamp rather than `Undefined`/`Void`.
#[test]
fn sys_current_time_millis_returns_an_integer() {
    let runner = Runner::new(Vec::new());
    let call = invoke(member(name_expr(&runner, "sys"), &runner, "current_time_millis"), vec![]);
    let program = Program::new(Block::new(vec![Stmt::Return { pos: pos(), value: Some(call) }]));
    let result = runner.run(&program, &NoLimitTracker).unwrap();
    assert!(result.get_integer().unwrap() > 0);
}

/// `sys.args` carries the script arguments the `Runner` was constructed with, in order.
#[test]
fn sys_args_reflects_constructor_arguments() {
    let runner = Runner::new(vec!["first".to_owned(), "second".to_owned()]);
    let subscript = Expr::Subscript {
        pos: pos(),
        array: Box::new(member(name_expr(&runner, "sys"), &runner, "args")),
        index: Box::new(int_lit(1)),
    };
    let program = Program::new(Block::new(vec![Stmt::Return { pos: pos(), value: Some(subscript) }]));
    let result = runner.run(&program, &NoLimitTracker).unwrap();
    assert_eq!(result.to_display_string().unwrap(), "second");
}

/// A name that was never declared is rejected before a single statement executes: the
/// bind pass, not the evaluator, raises this.
#[test]
fn unknown_name_is_a_compile_error_not_a_runtime_one() {
    let runner = Runner::new(Vec::new());
    let program = Program::new(Block::new(vec![Stmt::Return {
        pos: pos(),
        value: Some(name_expr(&runner, "never_declared")),
    }]));
    let err = runner.run(&program, &NoLimitTracker).unwrap_err();
    assert!(matches!(err, RunError::Compile(_)));
}

/// A deep, unbounded recursion trips a `MemoryLimitTracker`'s recursion ceiling as a
/// catchable runtime error rather than overflowing the host stack.
#[test]
fn memory_limit_tracker_rejects_runaway_recursion() {
    let runner = Runner::new(Vec::new());
    let n = runner.registry().register("n");
    let spin = runner.registry().register("spin");

    let recurse = invoke(
        Expr::Name { pos: pos(), name: spin.clone(), descriptor: OnceCell::new() },
        vec![Expr::Binary {
            pos: pos(),
            op: BinaryOp::Add,
            left: Box::new(Expr::Name { pos: pos(), name: n.clone(), descriptor: OnceCell::new() }),
            right: Box::new(int_lit(1)),
        }],
    );
    let body = Block::new(vec![Stmt::Return { pos: pos(), value: Some(recurse) }]);
    let spin_fn = std::rc::Rc::new(corelang::ast::decl::FunctionDecl::new(Some(spin.clone()), pos(), vec![Param::new(n, pos())], body));

    let call_spin = invoke(Expr::Name { pos: pos(), name: spin, descriptor: OnceCell::new() }, vec![int_lit(0)]);
    let program = Program::new(Block::new(vec![
        Stmt::Declaration(corelang::ast::Decl::Function(spin_fn)),
        Stmt::Return { pos: pos(), value: Some(call_spin) },
    ]));

    let tracker = MemoryLimitTracker::new(4096);
    let err = runner.run(&program, &tracker).unwrap_err();
    assert!(matches!(err, RunError::Unhandled(_)));
}

/// `new [n]` allocates through `ResourceTracker::on_allocate`; a `NoLimitTracker` never
/// rejects this regardless of size, matching its no-op contract.
#[test]
fn no_limit_tracker_allows_large_allocations() {
    let runner = Runner::new(Vec::new());
    let new_array = Expr::NewArray { pos: pos(), length: Box::new(int_lit(10_000)) };
    let program = Program::new(Block::new(vec![Stmt::Return { pos: pos(), value: Some(new_array) }]));
    let result = runner.run(&program, &NoLimitTracker).unwrap();
    assert!(matches!(result, Value::Array(_)));
}
