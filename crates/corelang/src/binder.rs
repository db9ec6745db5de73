//! The bind pass: a single recursive walk over a [`Program`] that resolves every name to a
//! [`NameDescriptor`], assigns every lexical scope a frozen [`ScopeDescriptor`], and rejects
//! anything that can be ruled out without running the script — unknown names, name
//! conflicts, assigning to a non-slot, calling something that can't be a function,
//! `new`-ing something that can't be a type, and `break`/`continue` outside a loop.
//!
//! Declarations in a block are bound in two passes (`bind_declare` then `bind_define`) so
//! that mutually recursive functions and forward-referencing classes resolve regardless of
//! declaration order; anything that isn't part of the block's declaration prefix is bound
//! once, in place, by `bind_stmt`.

use std::{cell::OnceCell, fmt::Debug, rc::Rc};

use ahash::AHashMap;

use crate::{
    ast::{
        decl::{ClassLayout, ClassMemberDescriptor},
        ClassDecl, ClassMember, Decl, Expr, FunctionDecl, Program,
    },
    ast::stmt::{Block, ForInit, Stmt},
    error::CompileError,
    scope::BindScope,
};

fn set_once<T: Debug>(cell: &OnceCell<T>, value: T) {
    cell.set(value).expect("system error: bind phase visited this node twice");
}

/// Entry point: binds a whole program against a freshly seeded root scope (`sys` and any
/// other host constants are expected to already be declared on `root` via
/// `BindScope::declare_sys_constant` before this is called).
pub fn bind_program(root: &BindScope<'_>, program: &Program) -> Result<(), CompileError> {
    bind_block_body(root, &program.block)?;
    set_once(&program.block.descriptor, root.create_scope_descriptor());
    Ok(())
}

/// Binds a block's declarations (two-phase) and trailing statements, without allocating a
/// scope of its own — the caller decides whether the block gets a fresh nested scope (an
/// `if`/`while`/`for` body, a bare `{}`) or reuses one it already created for another reason
/// (a function body, a class body, the program root).
fn bind_block_body(scope: &BindScope<'_>, block: &Block) -> Result<(), CompileError> {
    for decl in block.declarations() {
        bind_declare(scope, decl)?;
    }
    for decl in block.declarations() {
        bind_define(scope, decl)?;
    }
    for stmt in block.trailing_statements() {
        bind_stmt(scope, stmt)?;
    }
    Ok(())
}

/// A block that owns its own nested scope level (`if`/`while`/`for`/bare-`{}` bodies, a
/// `try`/`catch`/`finally` arm). `nested_loop` is forwarded to `create_nested_block`.
fn bind_nested_block(scope: &BindScope<'_>, block: &Block, nested_loop: bool) -> Result<(), CompileError> {
    let inner = scope.create_nested_block(nested_loop);
    bind_block_body(&inner, block)?;
    set_once(&block.descriptor, inner.create_scope_descriptor());
    Ok(())
}

fn bind_declare(scope: &BindScope<'_>, decl: &Decl) -> Result<(), CompileError> {
    match decl {
        Decl::Variable(v) => {
            let desc = scope.declare_variable(&v.name, &v.pos, v.is_constant)?;
            set_once(&v.descriptor, desc);
        }
        Decl::Function(f) => {
            let name = f.name.as_ref().expect("system error: a declared function is always named");
            let desc = scope.declare_function(name, &f.pos, Rc::clone(f))?;
            set_once(&f.descriptor, desc);
        }
        Decl::Class(c) => {
            let name = c.name.as_ref().expect("system error: a declared class is always named");
            let desc = scope.declare_class(name, &c.pos, Rc::clone(c))?;
            set_once(&c.descriptor, desc);
        }
    }
    Ok(())
}

fn bind_define(scope: &BindScope<'_>, decl: &Decl) -> Result<(), CompileError> {
    match decl {
        Decl::Variable(v) => {
            if let Some(init) = &v.init {
                bind_expr(scope, init)?;
            }
        }
        Decl::Function(f) => bind_function_body(scope, f, false)?,
        Decl::Class(c) => bind_class(scope, c)?,
    }
    Ok(())
}

/// Binds a function's parameters and body in a fresh scope. `this_allowed` is `false` for a
/// plain function declaration or literal and `true` for a class method or constructor — a
/// plain function never sees an enclosing object's `this`, even one declared inside a method.
fn bind_function_body(scope: &BindScope<'_>, decl: &FunctionDecl, this_allowed: bool) -> Result<(), CompileError> {
    let inner = scope.create_nested_scope(this_allowed);
    for param in &decl.params {
        let desc = inner.declare_variable(&param.name, &param.pos, false)?;
        set_once(&param.descriptor, desc);
    }
    bind_block_body(&inner, &decl.body)?;
    set_once(&decl.body.descriptor, inner.create_scope_descriptor());
    Ok(())
}

/// Binds a class body: members (and the constructor, tracked separately since it carries no
/// name) all share one scope, `this`-allowed throughout so a field initializer or a method
/// can both refer to `this`. Members are declared before any are defined, the same
/// two-phase discipline as an ordinary block, so methods may reference each other and
/// fields regardless of declaration order.
fn bind_class(scope: &BindScope<'_>, decl: &Rc<ClassDecl>) -> Result<(), CompileError> {
    let inner = scope.create_nested_scope(true);

    for member in &decl.members {
        match member {
            ClassMember::Variable { decl: v, .. } => {
                let desc = inner.declare_variable(&v.name, &v.pos, v.is_constant)?;
                set_once(&v.descriptor, desc);
            }
            ClassMember::Function { decl: f, .. } => {
                let name = f.name.as_ref().expect("system error: a class method is always named");
                let desc = inner.declare_function(name, &f.pos, Rc::clone(f))?;
                set_once(&f.descriptor, desc);
            }
        }
    }

    for member in &decl.members {
        match member {
            ClassMember::Variable { decl: v, .. } => {
                if let Some(init) = &v.init {
                    bind_expr(&inner, init)?;
                }
            }
            ClassMember::Function { decl: f, .. } => bind_function_body(&inner, f, true)?,
        }
    }

    if let Some(ctor) = &decl.constructor {
        bind_function_body(&inner, ctor, true)?;
    }

    let scope_descriptor = inner.create_scope_descriptor();
    let mut members = AHashMap::new();
    for member in &decl.members {
        match member {
            ClassMember::Variable { decl: v, access } => {
                let descriptor = Rc::clone(v.descriptor.get().expect("just bound above"));
                members.insert(v.name.id(), ClassMemberDescriptor { descriptor, is_private: access.resolve_for_variable() });
            }
            ClassMember::Function { decl: f, access } => {
                let name = f.name.as_ref().expect("system error: a class method is always named");
                let descriptor = Rc::clone(f.descriptor.get().expect("just bound above"));
                members.insert(name.id(), ClassMemberDescriptor { descriptor, is_private: access.resolve_for_function() });
            }
        }
    }
    set_once(&decl.layout, Rc::new(ClassLayout { scope: scope_descriptor, members }));
    Ok(())
}

fn bind_stmt(scope: &BindScope<'_>, stmt: &Stmt) -> Result<(), CompileError> {
    match stmt {
        Stmt::Empty => Ok(()),
        Stmt::Expression(e) => bind_expr(scope, e),
        Stmt::Declaration(d) => {
            // A declaration past the block's leading prefix is not hoisted — it's bound
            // (declared and defined) right here, in place, like any other statement.
            bind_declare(scope, d)?;
            bind_define(scope, d)
        }
        Stmt::If(s) => {
            bind_expr(scope, &s.cond)?;
            bind_stmt(scope, &s.then_branch)?;
            if let Some(else_branch) = &s.else_branch {
                bind_stmt(scope, else_branch)?;
            }
            Ok(())
        }
        Stmt::While(s) => {
            let inner = scope.create_nested_block(true);
            bind_expr(&inner, &s.cond)?;
            bind_stmt(&inner, &s.body)?;
            set_once(&s.scope, inner.create_scope_descriptor());
            Ok(())
        }
        Stmt::RegularFor(s) => {
            let inner = scope.create_nested_block(true);
            match &s.init {
                Some(ForInit::Declaration(d)) => {
                    bind_declare(&inner, d)?;
                    bind_define(&inner, d)?;
                }
                Some(ForInit::Expression(e)) => bind_expr(&inner, e)?,
                None => {}
            }
            if let Some(cond) = &s.cond {
                bind_expr(&inner, cond)?;
            }
            if let Some(update) = &s.update {
                bind_expr(&inner, update)?;
            }
            bind_stmt(&inner, &s.body)?;
            set_once(&s.scope, inner.create_scope_descriptor());
            Ok(())
        }
        Stmt::ForEach(s) => {
            // The collection expression is evaluated once, before the loop variable exists,
            // so it's bound against the enclosing scope rather than the loop's own.
            bind_expr(scope, &s.collection)?;
            let inner = scope.create_nested_block(true);
            let desc = inner.declare_variable(&s.var_name, &s.pos, s.is_constant)?;
            set_once(&s.var_descriptor, desc);
            bind_stmt(&inner, &s.body)?;
            set_once(&s.scope, inner.create_scope_descriptor());
            Ok(())
        }
        Stmt::Block(block) => bind_nested_block(scope, block, false),
        Stmt::Try(t) => {
            bind_nested_block(scope, &t.try_block, false)?;
            if let Some(catch) = &t.catch {
                let inner = scope.create_nested_block(false);
                let desc = inner.declare_variable(&catch.var_name, &catch.pos, false)?;
                set_once(&catch.var_descriptor, desc);
                bind_block_body(&inner, &catch.body)?;
                set_once(&catch.body.descriptor, inner.create_scope_descriptor());
            }
            if let Some(finally_block) = &t.finally_block {
                bind_nested_block(scope, finally_block, false)?;
            }
            Ok(())
        }
        Stmt::Continue(pos) | Stmt::Break(pos) => {
            if scope.is_loop_control_statement_allowed() {
                Ok(())
            } else {
                Err(CompileError::new(Some(pos.clone()), "Not in a loop"))
            }
        }
        Stmt::Return { value, .. } => {
            if let Some(value) = value {
                bind_expr(scope, value)?;
            }
            Ok(())
        }
        Stmt::Throw { value, .. } => bind_expr(scope, value),
    }
}

fn bind_expr(scope: &BindScope<'_>, expr: &Expr) -> Result<(), CompileError> {
    match expr {
        Expr::Literal { .. } => Ok(()),
        Expr::Name { pos, name, descriptor } => {
            let desc = scope.lookup(name, pos)?;
            set_once(descriptor, desc);
            Ok(())
        }
        Expr::This { pos, scope_ofs } => match scope.this_scope_ofs() {
            Some(ofs) => {
                set_once(scope_ofs, ofs);
                Ok(())
            }
            None => Err(CompileError::new(Some(pos.clone()), "No 'this' in current scope")),
        },
        Expr::Unary { operand, .. } | Expr::Typeof { operand, .. } => bind_expr(scope, operand),
        Expr::Binary { left, right, .. } => {
            bind_expr(scope, left)?;
            bind_expr(scope, right)
        }
        Expr::Assign { pos, target, value } => {
            bind_expr(scope, target)?;
            bind_expr(scope, value)?;
            require_lvalue(target, pos)
        }
        Expr::CompoundAssign { pos, target, value, .. } => {
            bind_expr(scope, target)?;
            bind_expr(scope, value)?;
            require_lvalue(target, pos)
        }
        Expr::IncDec { pos, target, .. } => {
            bind_expr(scope, target)?;
            require_lvalue(target, pos)
        }
        Expr::Member { object, .. } => bind_expr(scope, object),
        Expr::Invoke { pos, callee, args } => {
            bind_expr(scope, callee)?;
            for arg in args {
                bind_expr(scope, arg)?;
            }
            if callee.is_invocation_allowed() {
                Ok(())
            } else {
                Err(CompileError::new(Some(pos.clone()), "Not a function"))
            }
        }
        Expr::New { pos, class_expr, args } => {
            bind_expr(scope, class_expr)?;
            for arg in args {
                bind_expr(scope, arg)?;
            }
            if class_expr.is_instantiation_allowed() {
                Ok(())
            } else {
                Err(CompileError::new(Some(pos.clone()), "Not a type"))
            }
        }
        Expr::NewArray { length, .. } => bind_expr(scope, length),
        Expr::ArrayLiteral { elements, .. } => {
            for element in elements {
                bind_expr(scope, element)?;
            }
            Ok(())
        }
        Expr::Subscript { array, index, .. } => {
            bind_expr(scope, array)?;
            bind_expr(scope, index)
        }
        Expr::FunctionLiteral { decl, .. } => bind_function_body(scope, decl, false),
        Expr::ClassLiteral { decl, .. } => bind_class(scope, decl),
        Expr::Conditional { cond, then_expr, else_expr, .. } => {
            bind_expr(scope, cond)?;
            bind_expr(scope, then_expr)?;
            bind_expr(scope, else_expr)
        }
    }
}

/// A `Name` target is only checked once it's bound, since `is_lvalue` consults its resolved
/// descriptor; member/subscript targets are always accepted and fail, if at all, dynamically.
fn require_lvalue(target: &Expr, pos: &crate::pos::TextPos) -> Result<(), CompileError> {
    if target.is_lvalue() {
        Ok(())
    } else {
        Err(CompileError::new(Some(pos.clone()), "Not an lvalue"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ast::{decl::VarDecl, expr::Literal, Param},
        intern::NameRegistry,
        pos::TextPos,
        scope::BindContext,
    };

    fn pos() -> TextPos {
        TextPos::new("t", 1, 1)
    }

    #[test]
    fn a_plain_variable_use_resolves() {
        let ctx = BindContext::new();
        let root = ctx.create_root_scope();
        let registry = NameRegistry::new();
        let x = registry.register("x");
        let decl = Decl::Variable(VarDecl::new(x.clone(), pos(), false, None));
        let block = Block::new(vec![
            Stmt::Declaration(decl),
            Stmt::Expression(Expr::Name { pos: pos(), name: x, descriptor: OnceCell::new() }),
        ]);
        let program = Program::new(block);
        bind_program(&root, &program).unwrap();
    }

    #[test]
    fn using_an_undeclared_name_fails() {
        let ctx = BindContext::new();
        let root = ctx.create_root_scope();
        let registry = NameRegistry::new();
        let missing = registry.register("missing");
        let block = Block::new(vec![Stmt::Expression(Expr::Name { pos: pos(), name: missing, descriptor: OnceCell::new() })]);
        let program = Program::new(block);
        let err = bind_program(&root, &program).unwrap_err();
        assert!(err.message().contains("Name not found"));
    }

    #[test]
    fn assigning_to_a_constant_is_not_an_lvalue() {
        let ctx = BindContext::new();
        let root = ctx.create_root_scope();
        let registry = NameRegistry::new();
        let c = registry.register("c");
        let decl = Decl::Variable(VarDecl::new(c.clone(), pos(), true, Some(Expr::Literal { pos: pos(), value: Literal::Integer(1) })));
        let assign = Expr::Assign {
            pos: pos(),
            target: Box::new(Expr::Name { pos: pos(), name: c, descriptor: OnceCell::new() }),
            value: Box::new(Expr::Literal { pos: pos(), value: Literal::Integer(2) }),
        };
        let block = Block::new(vec![Stmt::Declaration(decl), Stmt::Expression(assign)]);
        let program = Program::new(block);
        let err = bind_program(&root, &program).unwrap_err();
        assert!(err.message().contains("Not an lvalue"));
    }

    #[test]
    fn calling_a_class_directly_is_not_a_function() {
        let ctx = BindContext::new();
        let root = ctx.create_root_scope();
        let registry = NameRegistry::new();
        let name = registry.register("Greeter");
        let class_decl = Rc::new(ClassDecl::new(Some(name.clone()), pos(), vec![]));
        let invoke = Expr::Invoke {
            pos: pos(),
            callee: Box::new(Expr::Name { pos: pos(), name, descriptor: OnceCell::new() }),
            args: vec![],
        };
        let block = Block::new(vec![Stmt::Declaration(Decl::Class(class_decl)), Stmt::Expression(invoke)]);
        let program = Program::new(block);
        let err = bind_program(&root, &program).unwrap_err();
        assert!(err.message().contains("Not a function"));
    }

    #[test]
    fn new_on_a_function_is_not_a_type() {
        let ctx = BindContext::new();
        let root = ctx.create_root_scope();
        let registry = NameRegistry::new();
        let name = registry.register("makeThing");
        let func = Rc::new(FunctionDecl::new(Some(name.clone()), pos(), vec![], Block::new(vec![])));
        let new_expr = Expr::New {
            pos: pos(),
            class_expr: Box::new(Expr::Name { pos: pos(), name, descriptor: OnceCell::new() }),
            args: vec![],
        };
        let block = Block::new(vec![Stmt::Declaration(Decl::Function(func)), Stmt::Expression(new_expr)]);
        let program = Program::new(block);
        let err = bind_program(&root, &program).unwrap_err();
        assert!(err.message().contains("Not a type"));
    }

    #[test]
    fn break_outside_a_loop_is_rejected() {
        let ctx = BindContext::new();
        let root = ctx.create_root_scope();
        let block = Block::new(vec![Stmt::Break(pos())]);
        let program = Program::new(block);
        let err = bind_program(&root, &program).unwrap_err();
        assert!(err.message().contains("Not in a loop"));
    }

    #[test]
    fn break_inside_a_while_loop_is_accepted() {
        let ctx = BindContext::new();
        let root = ctx.create_root_scope();
        let while_stmt = crate::ast::stmt::WhileStmt {
            pos: pos(),
            cond: Expr::Literal { pos: pos(), value: Literal::Boolean(true) },
            body: Box::new(Stmt::Break(pos())),
            scope: OnceCell::new(),
        };
        let block = Block::new(vec![Stmt::While(while_stmt)]);
        let program = Program::new(block);
        bind_program(&root, &program).unwrap();
    }

    #[test]
    fn this_outside_any_method_is_rejected() {
        let ctx = BindContext::new();
        let root = ctx.create_root_scope();
        let block = Block::new(vec![Stmt::Expression(Expr::This { pos: pos(), scope_ofs: OnceCell::new() })]);
        let program = Program::new(block);
        let err = bind_program(&root, &program).unwrap_err();
        assert!(err.message().contains("No 'this' in current scope"));
    }

    #[test]
    fn this_inside_a_method_is_accepted() {
        let ctx = BindContext::new();
        let root = ctx.create_root_scope();
        let registry = NameRegistry::new();
        let method_name = registry.register("greet");
        let method = Rc::new(FunctionDecl::new(
            Some(method_name),
            pos(),
            vec![],
            Block::new(vec![Stmt::Expression(Expr::This { pos: pos(), scope_ofs: OnceCell::new() })]),
        ));
        let class_decl = Rc::new(ClassDecl::new(
            Some(registry.register("Greeter")),
            pos(),
            vec![ClassMember::Function { decl: method, access: crate::ast::MemberAccess::Default }],
        ));
        let block = Block::new(vec![Stmt::Declaration(Decl::Class(class_decl))]);
        let program = Program::new(block);
        bind_program(&root, &program).unwrap();
    }

    #[test]
    fn for_loop_variable_is_visible_in_condition_and_body() {
        let ctx = BindContext::new();
        let root = ctx.create_root_scope();
        let registry = NameRegistry::new();
        let i = registry.register("i");
        let init = Decl::Variable(VarDecl::new(i.clone(), pos(), false, Some(Expr::Literal { pos: pos(), value: Literal::Integer(0) })));
        let cond = Expr::Binary {
            pos: pos(),
            op: crate::ast::BinaryOp::Lt,
            left: Box::new(Expr::Name { pos: pos(), name: i.clone(), descriptor: OnceCell::new() }),
            right: Box::new(Expr::Literal { pos: pos(), value: Literal::Integer(10) }),
        };
        let for_stmt = crate::ast::stmt::RegularForStmt {
            pos: pos(),
            init: Some(ForInit::Declaration(init)),
            cond: Some(cond),
            update: None,
            body: Box::new(Stmt::Expression(Expr::Name { pos: pos(), name: i, descriptor: OnceCell::new() })),
            scope: OnceCell::new(),
        };
        let block = Block::new(vec![Stmt::RegularFor(for_stmt)]);
        let program = Program::new(block);
        bind_program(&root, &program).unwrap();
    }

    #[test]
    fn unnamed_function_param_declares_in_body_scope() {
        let ctx = BindContext::new();
        let root = ctx.create_root_scope();
        let registry = NameRegistry::new();
        let param_name = registry.register("n");
        let param = Param::new(param_name.clone(), pos());
        let body = Block::new(vec![Stmt::Return { pos: pos(), value: Some(Expr::Name { pos: pos(), name: param_name, descriptor: OnceCell::new() }) }]);
        let func = Rc::new(FunctionDecl::new(Some(registry.register("identity")), pos(), vec![param], body));
        let block = Block::new(vec![Stmt::Declaration(Decl::Function(func))]);
        let program = Program::new(block);
        bind_program(&root, &program).unwrap();
    }
}
