//! The execute half of bind→execute: walks an already-bound [`Program`] (or any bound
//! statement/expression reachable from one) against a live [`ExecScope`] chain.
//!
//! Every expression's [`evaluate`] returns [`EvalResult<Value>`] — `Err` always carries a
//! `Value::Exception` already stamped with the call-stack trace active at the point it
//! started propagating, never a bare [`RuntimeError`]; [`rt`] is the one place that
//! conversion happens. Statements use [`StatementResult`] instead, since a statement must
//! also distinguish `break`/`continue`/`return` from a thrown exception — see
//! [`execute_stmt`].

use std::rc::Rc;

use crate::{
    ast::{
        decl::{ClassMember, VarDecl},
        stmt::{Block, ForInit, RegularForStmt, Stmt, TryStmt, WhileStmt},
        ClassDecl, Expr, Fixity, FunctionDecl, IncDecOp, Literal, Program,
    },
    exception::ExceptionValue,
    host::SysClassDescriptor,
    intern::NameId,
    operators,
    resource::ResourceTracker,
    scope::{ExecScope, NameDescriptor, ScopeDescriptor, StatementResult},
    tracer,
    value::{ClassValue, ObjectValue, RuntimeError, Value, ValueFactory, ValueResult},
};

/// Rough per-slot cost used to size `ResourceTracker::on_allocate` calls for new scopes —
/// the same kind of heuristic `MemoryLimitTracker` itself uses for its recursion ceiling,
/// not a precise accounting.
const SCOPE_SLOT_BYTES: usize = 32;

/// Per-run evaluation state: the resource tracker an embedding installed, the value
/// factory's small-value caches, and the host `String` class descriptor that primitive
/// string values delegate member access to (see [`get_member`]) — a deliberate extension
/// of the `get_member` override table to cover `Value::String` the same way `Value::SysObject`
/// already delegates to its own class.
pub struct EvalContext<'a> {
    pub tracker: &'a dyn ResourceTracker,
    pub factory: ValueFactory,
    pub string_class: Rc<SysClassDescriptor>,
}

/// `Ok` is the produced value; `Err` is a `Value::Exception` already propagating.
pub type EvalResult<T> = Result<T, Value>;

/// Lifts a bare `RuntimeError` (raised by value/operator methods, which know nothing of the
/// call stack) into the propagating exception shape, stamping it with the stack trace
/// active right now.
fn rt<T>(result: ValueResult<T>) -> EvalResult<T> {
    result.map_err(to_exception_error)
}

fn to_exception_error(err: RuntimeError) -> Value {
    Value::Exception(Rc::new(ExceptionValue::new(Value::new_string(err.message().to_owned()), tracer::capture_stack_trace())))
}

/// Lifts a `ResourceLimitError` the same way.
fn resource<T>(result: Result<T, crate::resource::ResourceLimitError>) -> EvalResult<T> {
    rt(result.map_err(RuntimeError::from))
}

/// Wraps a thrown value in an `Exception` unless it already is one — the `throw` statement's
/// "keep if already Exception, else wrap" rule.
fn to_exception(value: Value) -> Value {
    match value {
        Value::Exception(_) => value,
        payload => Value::Exception(Rc::new(ExceptionValue::new(payload, tracer::capture_stack_trace()))),
    }
}

fn literal_value(ctx: &EvalContext<'_>, lit: &Literal) -> Value {
    match lit {
        Literal::Integer(i) => ctx.factory.integer(*i),
        Literal::Float(f) => ctx.factory.float(*f),
        Literal::Str(s) => Value::new_string(Rc::clone(s)),
        Literal::Boolean(b) => Value::Boolean(*b),
        Literal::Null => Value::Null,
    }
}

/// Allocates a fresh child scope, charging its slot count against the resource tracker
/// first — every loop body, block, function call, and object construction goes through
/// this one path so a `-m` budget sees every scope the script causes to exist.
fn enter_scope(ctx: &EvalContext<'_>, scope: &Rc<ExecScope>, descriptor: &Rc<ScopeDescriptor>) -> EvalResult<Rc<ExecScope>> {
    resource(ctx.tracker.on_allocate(descriptor.size() * SCOPE_SLOT_BYTES))?;
    Ok(scope.create_nested_scope(Rc::clone(descriptor), None))
}

pub fn evaluate(ctx: &EvalContext<'_>, scope: &Rc<ExecScope>, expr: &Expr) -> EvalResult<Value> {
    match expr {
        Expr::Literal { value, .. } => Ok(literal_value(ctx, value)),
        Expr::Name { descriptor, .. } => {
            Ok(descriptor.get().expect("system error: name expression evaluated before bind").get(scope))
        }
        Expr::This { scope_ofs, .. } => {
            let ofs = *scope_ofs.get().expect("system error: this expression evaluated before bind");
            Ok(scope.get_this(ofs))
        }
        Expr::Unary { op, operand, .. } => {
            let v = evaluate(ctx, scope, operand)?;
            rt(operators::apply_unary(*op, &v))
        }
        Expr::Typeof { operand, .. } => {
            let v = evaluate(ctx, scope, operand)?;
            Ok(Value::new_string(v.typeof_tag()))
        }
        Expr::Binary { op: crate::ast::BinaryOp::And, left, right, .. } => {
            let l = evaluate(ctx, scope, left)?;
            if !rt(l.get_boolean())? {
                return Ok(Value::Boolean(false));
            }
            let r = evaluate(ctx, scope, right)?;
            Ok(Value::Boolean(rt(r.get_boolean())?))
        }
        Expr::Binary { op: crate::ast::BinaryOp::Or, left, right, .. } => {
            let l = evaluate(ctx, scope, left)?;
            if rt(l.get_boolean())? {
                return Ok(Value::Boolean(true));
            }
            let r = evaluate(ctx, scope, right)?;
            Ok(Value::Boolean(rt(r.get_boolean())?))
        }
        Expr::Binary { op, left, right, .. } => {
            let l = evaluate(ctx, scope, left)?;
            let r = evaluate(ctx, scope, right)?;
            rt(operators::apply_binary((*op).into(), &l, &r))
        }
        Expr::Assign { target, value, .. } => {
            let site = resolve_lvalue(ctx, scope, target)?;
            let v = evaluate(ctx, scope, value)?;
            write_lvalue(ctx, scope, &site, v.clone())?;
            Ok(v)
        }
        Expr::CompoundAssign { op, target, value, .. } => {
            let site = resolve_lvalue(ctx, scope, target)?;
            let old = read_lvalue(ctx, scope, &site)?;
            let rhs = evaluate(ctx, scope, value)?;
            let new_value = rt(operators::apply_binary((*op).into(), &old, &rhs))?;
            write_lvalue(ctx, scope, &site, new_value.clone())?;
            Ok(new_value)
        }
        Expr::IncDec { op, fixity, target, .. } => {
            let site = resolve_lvalue(ctx, scope, target)?;
            let old = read_lvalue(ctx, scope, &site)?;
            let delta_op = match op {
                IncDecOp::Increment => operators::BinaryOp::Add,
                IncDecOp::Decrement => operators::BinaryOp::Sub,
            };
            let new_value = rt(operators::apply_binary(delta_op, &old, &Value::Integer(1)))?;
            write_lvalue(ctx, scope, &site, new_value.clone())?;
            Ok(match fixity {
                Fixity::Prefix => new_value,
                Fixity::Postfix => old,
            })
        }
        Expr::Member { object, name, .. } => {
            let obj = evaluate(ctx, scope, object)?;
            get_member(ctx, scope, &obj, name.text(), name.id())
        }
        Expr::Invoke { pos, callee, args } => {
            let callee_val = evaluate(ctx, scope, callee)?;
            let arg_vals = evaluate_args(ctx, scope, args)?;
            resource(ctx.tracker.check_recursion_depth(tracer::current_depth()))?;
            let _guard = tracer::push_call(pos.clone());
            invoke(ctx, &callee_val, &arg_vals)
        }
        Expr::New { pos, class_expr, args } => {
            let class_val = evaluate(ctx, scope, class_expr)?;
            let arg_vals = evaluate_args(ctx, scope, args)?;
            resource(ctx.tracker.check_recursion_depth(tracer::current_depth()))?;
            let _guard = tracer::push_call(pos.clone());
            instantiate(ctx, &class_val, &arg_vals)
        }
        Expr::NewArray { length, .. } => {
            let len_val = evaluate(ctx, scope, length)?;
            let len = rt(len_val.get_integer())?;
            if len < 0 {
                return Err(to_exception_error(RuntimeError::new(format!("Negative array length: {len}"))));
            }
            let len = usize::try_from(len).expect("non-negative i64 always fits usize on supported targets");
            resource(ctx.tracker.on_allocate(len * std::mem::size_of::<Value>()))?;
            Ok(Value::new_array(vec![Value::Null; len]))
        }
        Expr::ArrayLiteral { elements, .. } => Ok(Value::new_array(evaluate_args(ctx, scope, elements)?)),
        Expr::Subscript { array, index, .. } => {
            let arr = evaluate(ctx, scope, array)?;
            let idx_val = evaluate(ctx, scope, index)?;
            let idx = rt(idx_val.get_integer())?;
            rt(arr.get_array_element(idx))
        }
        Expr::FunctionLiteral { decl, .. } => Ok(Value::new_function(Rc::clone(decl), Rc::clone(scope))),
        Expr::ClassLiteral { decl, .. } => Ok(Value::new_class(Rc::clone(decl), Rc::clone(scope))),
        Expr::Conditional { cond, then_expr, else_expr, .. } => {
            let c = evaluate(ctx, scope, cond)?;
            if rt(c.get_boolean())? {
                evaluate(ctx, scope, then_expr)
            } else {
                evaluate(ctx, scope, else_expr)
            }
        }
    }
}

fn evaluate_args(ctx: &EvalContext<'_>, scope: &Rc<ExecScope>, exprs: &[Expr]) -> EvalResult<Vec<Value>> {
    let mut values = Vec::with_capacity(exprs.len());
    for e in exprs {
        values.push(evaluate(ctx, scope, e)?);
    }
    Ok(values)
}

/// An lvalue resolved down to the storage it reads/writes, evaluating its non-name
/// sub-expressions (the object of a member access, the array and index of a subscript)
/// exactly once regardless of whether the caller reads, writes, or both.
enum LvalueSite {
    Slot(Rc<NameDescriptor>),
    Member { obj: Value, name_id: NameId, name_text: String },
    Index { arr: Value, idx: i64 },
}

fn resolve_lvalue(ctx: &EvalContext<'_>, scope: &Rc<ExecScope>, target: &Expr) -> EvalResult<LvalueSite> {
    match target {
        Expr::Name { descriptor, .. } => {
            Ok(LvalueSite::Slot(Rc::clone(descriptor.get().expect("system error: lvalue name evaluated before bind"))))
        }
        Expr::Member { object, name, .. } => {
            let obj = evaluate(ctx, scope, object)?;
            Ok(LvalueSite::Member { obj, name_id: name.id(), name_text: name.text().to_owned() })
        }
        Expr::Subscript { array, index, .. } => {
            let arr = evaluate(ctx, scope, array)?;
            let idx_val = evaluate(ctx, scope, index)?;
            let idx = rt(idx_val.get_integer())?;
            Ok(LvalueSite::Index { arr, idx })
        }
        _ => unreachable!("system error: the binder only accepts Name/Member/Subscript as lvalue targets"),
    }
}

fn read_lvalue(ctx: &EvalContext<'_>, scope: &Rc<ExecScope>, site: &LvalueSite) -> EvalResult<Value> {
    match site {
        LvalueSite::Slot(desc) => Ok(desc.get(scope)),
        LvalueSite::Member { obj, name_id, name_text } => get_member(ctx, scope, obj, name_text, *name_id),
        LvalueSite::Index { arr, idx } => rt(arr.get_array_element(*idx)),
    }
}

fn write_lvalue(ctx: &EvalContext<'_>, scope: &Rc<ExecScope>, site: &LvalueSite, value: Value) -> EvalResult<()> {
    if !value.is_storable() {
        return Err(to_exception_error(RuntimeError::new("Cannot assign void")));
    }
    match site {
        LvalueSite::Slot(desc) => {
            desc.set_modify(scope, value);
            Ok(())
        }
        LvalueSite::Member { obj, name_id, name_text } => set_member(ctx, scope, obj, name_text, *name_id, value),
        LvalueSite::Index { arr, idx } => rt(arr.set_array_element(*idx, value)),
    }
}

/// Member-read dispatch per the value model's `get_member` override table, extended with
/// `Value::String` delegating to the host `String` class's instance members the same way a
/// `SysObject` delegates to its own class — primitive strings have no `ObjectValue` of their
/// own to carry a member table, so the host bridge supplies one.
fn get_member(ctx: &EvalContext<'_>, scope: &Rc<ExecScope>, obj: &Value, name_text: &str, name_id: NameId) -> EvalResult<Value> {
    match obj {
        Value::Object(o) => {
            let layout = o.class.decl.layout.get().expect("system error: unbound class layout");
            let member = layout
                .lookup(name_id)
                .ok_or_else(|| to_exception_error(RuntimeError::new(format!("No such member: '{name_text}'"))))?;
            if member.is_private && !scope.descriptor().is_scope_accessible(member.descriptor.scope_id()) {
                return Err(to_exception_error(RuntimeError::new(format!("'{name_text}' is private"))));
            }
            Ok(member.descriptor.get(&o.scope))
        }
        Value::SysObject(o) => rt(o.get_member(name_text, name_id)),
        Value::SysClass(c) => rt(c.get_static_member(name_text, name_id)),
        Value::SysNamespace(n) => rt(n.get_member(name_text, name_id)),
        Value::String(_) => rt(ctx.string_class.get_instance_member(obj.clone(), name_text, name_id)),
        Value::Null => Err(to_exception_error(RuntimeError::new("Null pointer access"))),
        _ => Err(to_exception_error(RuntimeError::new(format!("Not an object: {}", obj.typeof_tag())))),
    }
}

fn set_member(_ctx: &EvalContext<'_>, scope: &Rc<ExecScope>, obj: &Value, name_text: &str, name_id: NameId, value: Value) -> EvalResult<()> {
    match obj {
        Value::Object(o) => {
            let layout = o.class.decl.layout.get().expect("system error: unbound class layout");
            let member = layout
                .lookup(name_id)
                .ok_or_else(|| to_exception_error(RuntimeError::new(format!("No such member: '{name_text}'"))))?;
            if member.is_private && !scope.descriptor().is_scope_accessible(member.descriptor.scope_id()) {
                return Err(to_exception_error(RuntimeError::new(format!("'{name_text}' is private"))));
            }
            if !member.descriptor.is_assignable_slot() {
                return Err(to_exception_error(RuntimeError::new(format!("Cannot modify '{name_text}'"))));
            }
            member.descriptor.set_modify(&o.scope, value);
            Ok(())
        }
        Value::Null => Err(to_exception_error(RuntimeError::new("Null pointer access"))),
        _ => Err(to_exception_error(RuntimeError::new(format!("Cannot modify a member of {}", obj.typeof_tag())))),
    }
}

fn invoke(ctx: &EvalContext<'_>, callee: &Value, args: &[Value]) -> EvalResult<Value> {
    match callee {
        Value::Function(f) => call_function_body(ctx, &f.decl, &f.closure, args),
        Value::SysMethod(m) => rt(m.invoke(ctx.tracker, args)),
        Value::Null => Err(to_exception_error(RuntimeError::new("Null pointer access"))),
        _ => Err(to_exception_error(RuntimeError::new(format!("Not a function: {}", callee.typeof_tag())))),
    }
}

fn instantiate(ctx: &EvalContext<'_>, callee: &Value, args: &[Value]) -> EvalResult<Value> {
    match callee {
        Value::Class(c) => instantiate_class(ctx, c, args),
        Value::SysClass(desc) => rt(desc.instantiate(ctx.tracker, args)),
        Value::Null => Err(to_exception_error(RuntimeError::new("Null pointer access"))),
        _ => Err(to_exception_error(RuntimeError::new(format!("Not a type: {}", callee.typeof_tag())))),
    }
}

/// Shared by plain function invocation and (via [`instantiate_class`]) constructors:
/// checks arity, allocates and populates the parameter frame, and maps the body's
/// `StatementResult` back to a value — a bare fall-off-the-end body is `Value::Void`, same
/// as an explicit `return;`.
fn call_function_body(ctx: &EvalContext<'_>, decl: &Rc<FunctionDecl>, closure: &Rc<ExecScope>, args: &[Value]) -> EvalResult<Value> {
    if args.len() != decl.params.len() {
        return Err(to_exception_error(RuntimeError::new("Wrong number of arguments")));
    }
    let descriptor = decl.body.descriptor.get().expect("system error: unbound function body");
    let frame = enter_scope(ctx, closure, descriptor)?;
    for (param, arg) in decl.params.iter().zip(args) {
        param.descriptor.get().expect("system error: unbound parameter").set_initialize(&frame, arg.clone());
    }
    match run_block_in_scope(ctx, &frame, &decl.body) {
        StatementResult::None => Ok(Value::Void),
        StatementResult::Return(v) => Ok(v),
        StatementResult::Throw(exc) => Err(exc),
        StatementResult::Break | StatementResult::Continue => {
            unreachable!("system error: break/continue cannot escape a function body — the binder rejects them outside a loop")
        }
    }
}

/// Builds a new `Object`: the self-referential `this` problem (the object's own scope must
/// see `this` as the `Rc<ObjectValue>` being built, but that `Rc` can't exist before the
/// scope does) is resolved by creating the scope with `this` unset, wrapping it in the
/// object, then backfilling via `ExecScope::set_this`.
fn instantiate_class(ctx: &EvalContext<'_>, class: &Rc<ClassValue>, args: &[Value]) -> EvalResult<Value> {
    let layout = class.decl.layout.get().expect("system error: unbound class layout");
    let object_scope = enter_scope(ctx, &class.closure, &layout.scope)?;

    let object = Rc::new(ObjectValue { class: Rc::clone(class), scope: Rc::clone(&object_scope) });
    object_scope.set_this(Value::Object(Rc::clone(&object)));

    for member in &class.decl.members {
        if let StatementResult::Throw(exc) = execute_decl_member(ctx, &object_scope, member) {
            return Err(exc);
        }
    }

    match &class.decl.constructor {
        Some(ctor) => {
            let result = call_function_body(ctx, ctor, &object_scope, args)?;
            if !matches!(result, Value::Void) {
                return Err(to_exception_error(RuntimeError::new("Constructor must return nothing")));
            }
        }
        None if !args.is_empty() => {
            return Err(to_exception_error(RuntimeError::new("Wrong number of arguments")));
        }
        None => {}
    }

    Ok(Value::Object(object))
}

fn execute_var_decl(ctx: &EvalContext<'_>, scope: &Rc<ExecScope>, v: &VarDecl) -> StatementResult {
    let value = match &v.init {
        Some(init) => match evaluate(ctx, scope, init) {
            Ok(value) => value,
            Err(exc) => return StatementResult::Throw(exc),
        },
        None => Value::Undefined,
    };
    v.descriptor.get().expect("system error: unbound variable declaration").set_initialize(scope, value);
    StatementResult::None
}

fn execute_decl_member(ctx: &EvalContext<'_>, scope: &Rc<ExecScope>, member: &ClassMember) -> StatementResult {
    match member {
        ClassMember::Variable { decl, .. } => execute_var_decl(ctx, scope, decl),
        ClassMember::Function { .. } => StatementResult::None,
    }
}

fn execute_decl_define(ctx: &EvalContext<'_>, scope: &Rc<ExecScope>, decl: &crate::ast::Decl) -> StatementResult {
    match decl {
        crate::ast::Decl::Variable(v) => execute_var_decl(ctx, scope, v),
        crate::ast::Decl::Function(_) | crate::ast::Decl::Class(_) => StatementResult::None,
    }
}

/// Runs a block's declarations (in declaration order) then its trailing statements,
/// stopping at the first non-`NONE` result — a `break`/`continue`/`return`/`throw`
/// anywhere in the block short-circuits the rest of it.
fn run_block_in_scope(ctx: &EvalContext<'_>, scope: &Rc<ExecScope>, block: &Block) -> StatementResult {
    for decl in block.declarations() {
        let result = execute_decl_define(ctx, scope, decl);
        if !result.is_none() {
            return result;
        }
    }
    for stmt in block.trailing_statements() {
        let result = execute_stmt(ctx, scope, stmt);
        if !result.is_none() {
            return result;
        }
    }
    StatementResult::None
}

pub fn execute_stmt(ctx: &EvalContext<'_>, scope: &Rc<ExecScope>, stmt: &Stmt) -> StatementResult {
    match stmt {
        Stmt::Empty => StatementResult::None,
        Stmt::Expression(e) => match evaluate(ctx, scope, e) {
            Ok(_) => StatementResult::None,
            Err(exc) => StatementResult::Throw(exc),
        },
        Stmt::Declaration(d) => execute_decl_define(ctx, scope, d),
        Stmt::If(s) => match evaluate(ctx, scope, &s.cond).and_then(|v| rt(v.get_boolean())) {
            Ok(true) => execute_stmt(ctx, scope, &s.then_branch),
            Ok(false) => s.else_branch.as_ref().map_or(StatementResult::None, |b| execute_stmt(ctx, scope, b)),
            Err(exc) => StatementResult::Throw(exc),
        },
        Stmt::While(s) => execute_while(ctx, scope, s),
        Stmt::RegularFor(s) => execute_regular_for(ctx, scope, s),
        Stmt::ForEach(s) => execute_for_each(ctx, scope, s),
        Stmt::Block(b) => {
            let descriptor = b.descriptor.get().expect("system error: unbound block");
            match enter_scope(ctx, scope, descriptor) {
                Ok(inner) => run_block_in_scope(ctx, &inner, b),
                Err(exc) => StatementResult::Throw(exc),
            }
        }
        Stmt::Try(t) => execute_try(ctx, scope, t),
        Stmt::Continue(_) => StatementResult::Continue,
        Stmt::Break(_) => StatementResult::Break,
        Stmt::Return { value, .. } => match value {
            Some(e) => match evaluate(ctx, scope, e) {
                Ok(v) => StatementResult::Return(v),
                Err(exc) => StatementResult::Throw(exc),
            },
            None => StatementResult::Return(Value::Void),
        },
        Stmt::Throw { value, .. } => match evaluate(ctx, scope, value) {
            Ok(v) => StatementResult::Throw(to_exception(v)),
            Err(exc) => StatementResult::Throw(exc),
        },
    }
}

/// `While`'s nested scope is created once, before the loop starts, and reused across every
/// iteration — only a human-written `{}` body (handled generically by `Stmt::Block` above)
/// gets a fresh scope per execution.
fn execute_while(ctx: &EvalContext<'_>, scope: &Rc<ExecScope>, s: &WhileStmt) -> StatementResult {
    let descriptor = s.scope.get().expect("system error: unbound while scope");
    let inner = match enter_scope(ctx, scope, descriptor) {
        Ok(inner) => inner,
        Err(exc) => return StatementResult::Throw(exc),
    };
    loop {
        match evaluate(ctx, &inner, &s.cond).and_then(|v| rt(v.get_boolean())) {
            Ok(true) => {}
            Ok(false) => return StatementResult::None,
            Err(exc) => return StatementResult::Throw(exc),
        }
        match execute_stmt(ctx, &inner, &s.body) {
            StatementResult::None | StatementResult::Continue => {}
            StatementResult::Break => return StatementResult::None,
            result => return result,
        }
    }
}

fn execute_regular_for(ctx: &EvalContext<'_>, scope: &Rc<ExecScope>, s: &RegularForStmt) -> StatementResult {
    let descriptor = s.scope.get().expect("system error: unbound for scope");
    let inner = match enter_scope(ctx, scope, descriptor) {
        Ok(inner) => inner,
        Err(exc) => return StatementResult::Throw(exc),
    };
    if let Some(init) = &s.init {
        let result = match init {
            ForInit::Declaration(d) => execute_decl_define(ctx, &inner, d),
            ForInit::Expression(e) => match evaluate(ctx, &inner, e) {
                Ok(_) => StatementResult::None,
                Err(exc) => StatementResult::Throw(exc),
            },
        };
        if !result.is_none() {
            return result;
        }
    }
    loop {
        if let Some(cond) = &s.cond {
            match evaluate(ctx, &inner, cond).and_then(|v| rt(v.get_boolean())) {
                Ok(true) => {}
                Ok(false) => return StatementResult::None,
                Err(exc) => return StatementResult::Throw(exc),
            }
        }
        match execute_stmt(ctx, &inner, &s.body) {
            StatementResult::None | StatementResult::Continue => {}
            StatementResult::Break => return StatementResult::None,
            result => return result,
        }
        if let Some(update) = &s.update {
            if let Err(exc) = evaluate(ctx, &inner, update) {
                return StatementResult::Throw(exc);
            }
        }
    }
}

/// Each element gets its own fresh loop-variable scope (unlike `While`/`RegularFor`'s
/// single persistent scope): a for-each binding is conceptually a new variable per
/// iteration, which also lets the loop variable be declared `const` without re-initializing
/// an already-initialized slot on the second element.
fn execute_for_each(ctx: &EvalContext<'_>, scope: &Rc<ExecScope>, s: &crate::ast::stmt::ForEachStmt) -> StatementResult {
    let collection = match evaluate(ctx, scope, &s.collection) {
        Ok(v) => v,
        Err(exc) => return StatementResult::Throw(exc),
    };
    let descriptor = s.scope.get().expect("system error: unbound for-each scope");
    let var_descriptor = s.var_descriptor.get().expect("system error: unbound for-each variable");

    let mut outcome = None;
    let iterated = collection.iterate(|element| {
        let inner = match enter_scope(ctx, scope, descriptor) {
            Ok(inner) => inner,
            Err(exc) => {
                outcome = Some(StatementResult::Throw(exc));
                return Ok(false);
            }
        };
        var_descriptor.set_initialize(&inner, element);
        match execute_stmt(ctx, &inner, &s.body) {
            StatementResult::None | StatementResult::Continue => Ok(true),
            StatementResult::Break => Ok(false),
            result => {
                outcome = Some(result);
                Ok(false)
            }
        }
    });
    if let Err(e) = iterated {
        return StatementResult::Throw(to_exception_error(e));
    }
    outcome.unwrap_or(StatementResult::None)
}

/// `finally`, if present, always runs exactly once and its result (if not `NONE`) overrides
/// whatever `try`/`catch` produced — including overriding a propagating `throw` or `return`.
fn execute_try(ctx: &EvalContext<'_>, scope: &Rc<ExecScope>, t: &TryStmt) -> StatementResult {
    let try_descriptor = t.try_block.descriptor.get().expect("system error: unbound try block");
    let mut result = match enter_scope(ctx, scope, try_descriptor) {
        Ok(inner) => run_block_in_scope(ctx, &inner, &t.try_block),
        Err(exc) => StatementResult::Throw(exc),
    };

    if let StatementResult::Throw(exc) = &result {
        if let Some(catch) = &t.catch {
            let exc = exc.clone();
            let catch_descriptor = catch.body.descriptor.get().expect("system error: unbound catch block");
            result = match enter_scope(ctx, scope, catch_descriptor) {
                Ok(inner) => {
                    let var_descriptor = catch.var_descriptor.get().expect("system error: unbound catch variable");
                    var_descriptor.set_initialize(&inner, exc);
                    run_block_in_scope(ctx, &inner, &catch.body)
                }
                Err(exc2) => StatementResult::Throw(exc2),
            };
        }
    }

    if let Some(finally_block) = &t.finally_block {
        let finally_descriptor = finally_block.descriptor.get().expect("system error: unbound finally block");
        let finally_result = match enter_scope(ctx, scope, finally_descriptor) {
            Ok(inner) => run_block_in_scope(ctx, &inner, finally_block),
            Err(exc) => StatementResult::Throw(exc),
        };
        if !finally_result.is_none() {
            return finally_result;
        }
    }

    result
}

/// Runs a whole program's root block; a bare fall-off-the-end script is `Value::Void`.
pub fn run_program(ctx: &EvalContext<'_>, scope: &Rc<ExecScope>, program: &Program) -> EvalResult<Value> {
    match run_block_in_scope(ctx, scope, &program.block) {
        StatementResult::None => Ok(Value::Void),
        StatementResult::Return(v) => Ok(v),
        StatementResult::Throw(exc) => Err(exc),
        StatementResult::Break | StatementResult::Continue => {
            unreachable!("system error: break/continue cannot escape the program root — rejected by the binder")
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::OnceCell;

    use super::*;
    use crate::{
        ast::{
            decl::{ClassDecl as AstClassDecl, MemberAccess, Param},
            expr::Literal as Lit,
            stmt::{CatchClause, ForEachStmt, IfStmt},
            BinaryOp, Decl,
        },
        binder::bind_program,
        host::SysClassBuilder,
        intern::NameRegistry,
        pos::TextPos,
        resource::NoLimitTracker,
        scope::BindContext,
    };

    fn pos() -> TextPos {
        TextPos::new("t", 1, 1)
    }

    fn ctx() -> EvalContext<'static> {
        let registry = NameRegistry::new();
        EvalContext {
            tracker: Box::leak(Box::new(NoLimitTracker)),
            factory: ValueFactory::new(),
            string_class: SysClassBuilder::new(&registry, "String").build(),
        }
    }

    fn run(program: &Program) -> EvalResult<Value> {
        let bind_ctx = BindContext::new();
        let root = bind_ctx.create_root_scope();
        bind_program(&root, program).unwrap();
        let descriptor = program.block.descriptor.get().unwrap();
        let root_exec = ExecScope::new_root(Rc::clone(descriptor));
        run_program(&ctx(), &root_exec, program)
    }

    #[test]
    fn literal_and_arithmetic_evaluate() {
        let expr = Expr::Binary {
            pos: pos(),
            op: BinaryOp::Add,
            left: Box::new(Expr::Literal { pos: pos(), value: Lit::Integer(1) }),
            right: Box::new(Expr::Literal { pos: pos(), value: Lit::Integer(2) }),
        };
        let program = Program::new(Block::new(vec![Stmt::Return { pos: pos(), value: Some(expr) }]));
        let result = run(&program).unwrap();
        assert_eq!(result.get_integer().unwrap(), 3);
    }

    #[test]
    fn string_promotion_in_addition() {
        let registry = NameRegistry::new();
        let n = registry.register("n");
        let decl = Decl::Variable(VarDecl::new(n.clone(), pos(), false, Some(Expr::Literal { pos: pos(), value: Lit::Integer(42) })));
        let concat = Expr::Binary {
            pos: pos(),
            op: BinaryOp::Add,
            left: Box::new(Expr::Literal { pos: pos(), value: Lit::Str("n=".into()) }),
            right: Box::new(Expr::Name { pos: pos(), name: n, descriptor: OnceCell::new() }),
        };
        let program = Program::new(Block::new(vec![Stmt::Declaration(decl), Stmt::Return { pos: pos(), value: Some(concat) }]));
        let result = run(&program).unwrap();
        assert_eq!(result.to_display_string().unwrap(), "n=42");
    }

    #[test]
    fn short_circuit_or_skips_right_operand() {
        let registry = NameRegistry::new();
        let hit = registry.register("hit");
        let decl = Decl::Variable(VarDecl::new(hit.clone(), pos(), false, Some(Expr::Literal { pos: pos(), value: Lit::Boolean(false) })));
        let side_effect = Expr::Assign {
            pos: pos(),
            target: Box::new(Expr::Name { pos: pos(), name: hit.clone(), descriptor: OnceCell::new() }),
            value: Box::new(Expr::Literal { pos: pos(), value: Lit::Boolean(true) }),
        };
        let or_expr = Expr::Binary {
            pos: pos(),
            op: BinaryOp::Or,
            left: Box::new(Expr::Literal { pos: pos(), value: Lit::Boolean(true) }),
            right: Box::new(side_effect),
        };
        let program = Program::new(Block::new(vec![
            Stmt::Declaration(decl),
            Stmt::Expression(or_expr),
            Stmt::Return { pos: pos(), value: Some(Expr::Name { pos: pos(), name: hit, descriptor: OnceCell::new() }) },
        ]));
        let result = run(&program).unwrap();
        assert!(!result.get_boolean().unwrap());
    }

    #[test]
    fn for_each_loop_with_break_sums_until_four() {
        let registry = NameRegistry::new();
        let xs = registry.register("xs");
        let s = registry.register("s");
        let elements: Vec<Expr> = [1, 2, 3, 4, 5]
            .iter()
            .map(|i| Expr::Literal { pos: pos(), value: Lit::Integer(*i) })
            .collect();
        let xs_decl = Decl::Variable(VarDecl::new(xs.clone(), pos(), false, Some(Expr::ArrayLiteral { pos: pos(), elements })));
        let s_decl = Decl::Variable(VarDecl::new(s.clone(), pos(), false, Some(Expr::Literal { pos: pos(), value: Lit::Integer(0) })));

        let for_each = ForEachStmt {
            pos: pos(),
            var_name: registry.register("v"),
            is_constant: false,
            collection: Expr::Name { pos: pos(), name: xs, descriptor: OnceCell::new() },
            body: Box::new(Stmt::Block(Block::new(vec![Stmt::If(IfStmt {
                pos: pos(),
                cond: Expr::Binary {
                    pos: pos(),
                    op: BinaryOp::Eq,
                    left: Box::new(Expr::Name { pos: pos(), name: registry.register("v"), descriptor: OnceCell::new() }),
                    right: Box::new(Expr::Literal { pos: pos(), value: Lit::Integer(4) }),
                },
                then_branch: Box::new(Stmt::Break(pos())),
                else_branch: Some(Box::new(Stmt::Expression(Expr::CompoundAssign {
                    pos: pos(),
                    op: BinaryOp::Add,
                    target: Box::new(Expr::Name { pos: pos(), name: s.clone(), descriptor: OnceCell::new() }),
                    value: Box::new(Expr::Name { pos: pos(), name: registry.register("v"), descriptor: OnceCell::new() }),
                }))),
            })]))),
            scope: OnceCell::new(),
            var_descriptor: OnceCell::new(),
        };

        let program = Program::new(Block::new(vec![
            Stmt::Declaration(xs_decl),
            Stmt::Declaration(s_decl),
            Stmt::ForEach(for_each),
            Stmt::Return { pos: pos(), value: Some(Expr::Name { pos: pos(), name: s, descriptor: OnceCell::new() }) },
        ]));
        let result = run(&program).unwrap();
        assert_eq!(result.get_integer().unwrap(), 10);
    }

    #[test]
    fn mutual_recursion_resolves_regardless_of_order() {
        let registry = NameRegistry::new();
        let even = registry.register("even");
        let odd = registry.register("odd");
        let n = registry.register("n");

            // even(n) { if (n == 0) return true; return odd(n - 1); }
        let even_body = Block::new(vec![
            Stmt::If(IfStmt {
                pos: pos(),
                cond: Expr::Binary {
                    pos: pos(),
                    op: BinaryOp::Eq,
                    left: Box::new(Expr::Name { pos: pos(), name: n.clone(), descriptor: OnceCell::new() }),
                    right: Box::new(Expr::Literal { pos: pos(), value: Lit::Integer(0) }),
                },
                then_branch: Box::new(Stmt::Return { pos: pos(), value: Some(Expr::Literal { pos: pos(), value: Lit::Boolean(true) }) }),
                else_branch: None,
            }),
            Stmt::Return {
                pos: pos(),
                value: Some(Expr::Invoke {
                    pos: pos(),
                    callee: Box::new(Expr::Name { pos: pos(), name: odd.clone(), descriptor: OnceCell::new() }),
                    args: vec![Expr::Binary {
                        pos: pos(),
                        op: BinaryOp::Sub,
                        left: Box::new(Expr::Name { pos: pos(), name: n.clone(), descriptor: OnceCell::new() }),
                        right: Box::new(Expr::Literal { pos: pos(), value: Lit::Integer(1) }),
                    }],
                }),
            },
        ]);
        let odd_body = Block::new(vec![
            Stmt::If(IfStmt {
                pos: pos(),
                cond: Expr::Binary {
                    pos: pos(),
                    op: BinaryOp::Eq,
                    left: Box::new(Expr::Name { pos: pos(), name: n.clone(), descriptor: OnceCell::new() }),
                    right: Box::new(Expr::Literal { pos: pos(), value: Lit::Integer(0) }),
                },
                then_branch: Box::new(Stmt::Return { pos: pos(), value: Some(Expr::Literal { pos: pos(), value: Lit::Boolean(false) }) }),
                else_branch: None,
            }),
            Stmt::Return {
                pos: pos(),
                value: Some(Expr::Invoke {
                    pos: pos(),
                    callee: Box::new(Expr::Name { pos: pos(), name: even.clone(), descriptor: OnceCell::new() }),
                    args: vec![Expr::Binary {
                        pos: pos(),
                        op: BinaryOp::Sub,
                        left: Box::new(Expr::Name { pos: pos(), name: n.clone(), descriptor: OnceCell::new() }),
                        right: Box::new(Expr::Literal { pos: pos(), value: Lit::Integer(1) }),
                    }],
                }),
            },
        ]);

        let even_fn = Rc::new(FunctionDecl::new(Some(even.clone()), pos(), vec![Param::new(n.clone(), pos())], even_body));
        let odd_fn = Rc::new(FunctionDecl::new(Some(odd.clone()), pos(), vec![Param::new(n.clone(), pos())], odd_body));

        let call_even_10 = Expr::Invoke {
            pos: pos(),
            callee: Box::new(Expr::Name { pos: pos(), name: even, descriptor: OnceCell::new() }),
            args: vec![Expr::Literal { pos: pos(), value: Lit::Integer(10) }],
        };

        let program = Program::new(Block::new(vec![
            Stmt::Declaration(Decl::Function(even_fn)),
            Stmt::Declaration(Decl::Function(odd_fn)),
            Stmt::Return { pos: pos(), value: Some(call_even_10) },
        ]));
        let result = run(&program).unwrap();
        assert!(result.get_boolean().unwrap());
    }

    #[test]
    fn try_catch_finally_runs_finally_exactly_once_after_catch() {
        let registry = NameRegistry::new();
        let e = registry.register("e");
        let log = registry.register("log");

        let log_decl = Decl::Variable(VarDecl::new(log.clone(), pos(), false, Some(Expr::Literal { pos: pos(), value: Lit::Str("".into()) })));

        let append = |text: &str| Expr::CompoundAssign {
            pos: pos(),
            op: BinaryOp::Add,
            target: Box::new(Expr::Name { pos: pos(), name: log.clone(), descriptor: OnceCell::new() }),
            value: Box::new(Expr::Literal { pos: pos(), value: Lit::Str(text.into()) }),
        };

        let try_stmt = TryStmt {
            try_block: Block::new(vec![Stmt::Throw { pos: pos(), value: Expr::Literal { pos: pos(), value: Lit::Str("boom".into()) } }]),
            catch: Some(CatchClause {
                pos: pos(),
                var_name: e,
                body: Block::new(vec![Stmt::Expression(append("caught"))]),
                var_descriptor: OnceCell::new(),
            }),
            finally_block: Some(Block::new(vec![Stmt::Expression(append("finally"))])),
        };

        let program = Program::new(Block::new(vec![
            Stmt::Declaration(log_decl),
            Stmt::Try(try_stmt),
            Stmt::Return { pos: pos(), value: Some(Expr::Name { pos: pos(), name: log, descriptor: OnceCell::new() }) },
        ]));
        let result = run(&program).unwrap();
        assert_eq!(result.to_display_string().unwrap(), "caughtfinally");
    }

    #[test]
    fn class_instantiation_runs_constructor_and_exposes_public_method() {
        let registry = NameRegistry::new();
        let x = registry.register("x");
        let y = registry.register("y");
        let ax = registry.register("ax");
        let ay = registry.register("ay");
        let sum = registry.register("sum");

        let ctor = Rc::new(FunctionDecl::new(
            None,
            pos(),
            vec![Param::new(ax.clone(), pos()), Param::new(ay.clone(), pos())],
            Block::new(vec![
                Stmt::Expression(Expr::Assign {
                    pos: pos(),
                    target: Box::new(Expr::Name { pos: pos(), name: x.clone(), descriptor: OnceCell::new() }),
                    value: Box::new(Expr::Name { pos: pos(), name: ax, descriptor: OnceCell::new() }),
                }),
                Stmt::Expression(Expr::Assign {
                    pos: pos(),
                    target: Box::new(Expr::Name { pos: pos(), name: y.clone(), descriptor: OnceCell::new() }),
                    value: Box::new(Expr::Name { pos: pos(), name: ay, descriptor: OnceCell::new() }),
                }),
            ]),
        ));
        let sum_method = Rc::new(FunctionDecl::new(
            Some(sum.clone()),
            pos(),
            vec![],
            Block::new(vec![Stmt::Return {
                pos: pos(),
                value: Some(Expr::Binary {
                    pos: pos(),
                    op: BinaryOp::Add,
                    left: Box::new(Expr::Name { pos: pos(), name: x.clone(), descriptor: OnceCell::new() }),
                    right: Box::new(Expr::Name { pos: pos(), name: y.clone(), descriptor: OnceCell::new() }),
                }),
            }]),
        ));

        let mut class = AstClassDecl::new(
            Some(registry.register("Point")),
            pos(),
            vec![
                ClassMember::Variable { decl: VarDecl::new(x, pos(), false, None), access: MemberAccess::Private },
                ClassMember::Variable { decl: VarDecl::new(y, pos(), false, None), access: MemberAccess::Private },
                ClassMember::Function { decl: sum_method, access: MemberAccess::Public },
            ],
        );
        class.constructor = Some(ctor);
        let class_decl = Rc::new(class);

        let new_point = Expr::New {
            pos: pos(),
            class_expr: Box::new(Expr::Name { pos: pos(), name: registry.register("Point"), descriptor: OnceCell::new() }),
            args: vec![Expr::Literal { pos: pos(), value: Lit::Integer(3) }, Expr::Literal { pos: pos(), value: Lit::Integer(4) }],
        };
        let call_sum = Expr::Invoke {
            pos: pos(),
            callee: Box::new(Expr::Member { pos: pos(), object: Box::new(new_point), name: sum }),
            args: vec![],
        };

        let program = Program::new(Block::new(vec![
            Stmt::Declaration(Decl::Class(class_decl)),
            Stmt::Return { pos: pos(), value: Some(call_sum) },
        ]));
        let result = run(&program).unwrap();
        assert_eq!(result.get_integer().unwrap(), 7);
    }

    #[test]
    fn private_member_access_from_outside_the_class_is_rejected() {
        let registry = NameRegistry::new();
        let secret = registry.register("secret");
        let class_decl = Rc::new(AstClassDecl::new(
            Some(registry.register("Vault")),
            pos(),
            vec![ClassMember::Variable {
                decl: VarDecl::new(secret.clone(), pos(), false, Some(Expr::Literal { pos: pos(), value: Lit::Integer(1) })),
                access: MemberAccess::Default,
            }],
        ));
        let new_vault = Expr::New {
            pos: pos(),
            class_expr: Box::new(Expr::Name { pos: pos(), name: registry.register("Vault"), descriptor: OnceCell::new() }),
            args: vec![],
        };
        let access = Expr::Member { pos: pos(), object: Box::new(new_vault), name: secret };

        let program = Program::new(Block::new(vec![
            Stmt::Declaration(Decl::Class(class_decl)),
            Stmt::Return { pos: pos(), value: Some(access) },
        ]));
        let result = run(&program);
        let err = result.unwrap_err();
        assert!(err.to_display_string().unwrap().contains("private"));
    }

    #[test]
    fn reading_an_undefined_variable_fails_at_use_site() {
        let registry = NameRegistry::new();
        let a = registry.register("a");
        let decl = Decl::Variable(VarDecl::new(a.clone(), pos(), false, None));
        let program = Program::new(Block::new(vec![
            Stmt::Declaration(decl),
            Stmt::Return { pos: pos(), value: Some(Expr::Name { pos: pos(), name: a, descriptor: OnceCell::new() }) },
        ]));
        let value = run(&program).unwrap();
        assert!(value.to_display_string().is_err());
    }
}
