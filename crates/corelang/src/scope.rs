//! Bind-time scope tree and execute-time scope chain.
//!
//! Two parallel trees share only the [`ScopeId`]/slot coordinates baked into
//! [`NameDescriptor`]s by the binder. [`BindScope`] is structural-only and is discarded
//! (save for its frozen [`ScopeDescriptor`]) once binding finishes; [`ExecScope`] is the
//! runtime frame that actually holds storage and is created fresh on every entry to a
//! block, function call, or object construction.

use std::{
    cell::{Cell, OnceCell, RefCell},
    rc::Rc,
};

use ahash::{AHashMap, AHashSet};

use crate::{
    ast::{ClassDecl, FunctionDecl},
    error::CompileError,
    intern::{NameId, NameInfo},
    pos::TextPos,
    value::Value,
};

/// Globally unique identity assigned to a bind scope at construction.
///
/// Every [`NameDescriptor`] records the id of the scope that declared it; every
/// [`ExecScope`] is stamped with the id of the bind scope it was created from. A mismatch
/// between the two at lookup time means bind and execute drifted apart — a system error,
/// not a script error (see [`ExecScope::get`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId(u64);

/// Allocates fresh [`ScopeId`]s and owns the bind-time-only pieces of binding state.
#[derive(Debug, Default)]
pub struct BindContext {
    next_scope_id: Cell<u64>,
}

impl BindContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate_scope_id(&self) -> ScopeId {
        let id = self.next_scope_id.get();
        self.next_scope_id.set(id + 1);
        ScopeId(id)
    }

    /// Creates the top-level bind scope for a script. `this` is never accessible at the
    /// root and `break`/`continue` are never legal there.
    #[must_use]
    pub fn create_root_scope(&self) -> BindScope<'_> {
        BindScope {
            context: self,
            outer: None,
            id: self.allocate_scope_id(),
            scope_ofs: 0,
            this_scope_ofs: None,
            loop_allowed: false,
            names: RefCell::new(AHashMap::new()),
            next_slot: Cell::new(0),
            closed: Cell::new(false),
        }
    }
}

/// The frozen, shareable summary of a closed [`BindScope`].
///
/// Used to construct every [`ExecScope`] built from that bind scope (one per block/call
/// entry, many instances over a program's lifetime sharing one descriptor).
#[derive(Debug)]
pub struct ScopeDescriptor {
    id: ScopeId,
    outer_id: Option<ScopeId>,
    scope_idx: usize,
    size: usize,
    accessible_scopes: AHashSet<ScopeId>,
}

impl ScopeDescriptor {
    #[must_use]
    pub fn id(&self) -> ScopeId {
        self.id
    }

    #[must_use]
    pub fn scope_idx(&self) -> usize {
        self.scope_idx
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Whether a member declared in the scope identified by `id` is visible from a
    /// location whose enclosing (frozen) scope is `self`. Used for `private` checks: the
    /// set already includes every ancestor scope id, so this is a single lookup, not a
    /// runtime walk.
    #[must_use]
    pub fn is_scope_accessible(&self, id: ScopeId) -> bool {
        self.accessible_scopes.contains(&id)
    }
}

/// Control-flow signal returned by every statement's `execute`.
///
/// Implemented as a sum type rather than via host exceptions/unwinding, per the
/// evaluator's convention of keeping script control flow fully auditable in ordinary
/// return values (see the evaluator module for why panics are reserved for bugs).
#[derive(Debug, Clone)]
pub enum StatementResult {
    None,
    Break,
    Continue,
    Return(Value),
    Throw(Value),
}

impl StatementResult {
    #[must_use]
    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }
}

/// A name declared in a [`BindScope`], parameterised by where and how it's stored.
#[derive(Debug)]
pub enum NameDescriptor {
    /// A `var` or a `for`-loop/catch binding. Initialised to `Undefined`; reassignable.
    Variable { scope_id: ScopeId, scope_ofs: usize, slot: usize },
    /// A `const`. `set_initialize` may run exactly once; `set_modify` always fails.
    Constant { scope_id: ScopeId, scope_ofs: usize, slot: usize },
    /// A function declaration. Carries no slot; `get` materialises a fresh `Value::Function`
    /// closing over the scope at `(scope_id, scope_ofs)` on every access.
    Function { scope_id: ScopeId, scope_ofs: usize, decl: Rc<FunctionDecl> },
    /// A class declaration, same shape as `Function`.
    Class { scope_id: ScopeId, scope_ofs: usize, decl: Rc<ClassDecl> },
    /// A host-injected constant bound before a (sub-)script's top-level scope is bound,
    /// e.g. `sys` itself, or an entry from the `scope` map passed to `sys.execute`.
    SysConstant { scope_id: ScopeId, scope_ofs: usize, slot: usize },
}

impl NameDescriptor {
    #[must_use]
    pub fn scope_id(&self) -> ScopeId {
        match self {
            Self::Variable { scope_id, .. }
            | Self::Constant { scope_id, .. }
            | Self::Function { scope_id, .. }
            | Self::Class { scope_id, .. }
            | Self::SysConstant { scope_id, .. } => *scope_id,
        }
    }

    #[must_use]
    pub fn scope_ofs(&self) -> usize {
        match self {
            Self::Variable { scope_ofs, .. }
            | Self::Constant { scope_ofs, .. }
            | Self::Function { scope_ofs, .. }
            | Self::Class { scope_ofs, .. }
            | Self::SysConstant { scope_ofs, .. } => *scope_ofs,
        }
    }

    /// True for descriptors that name a storage slot and can therefore appear as an
    /// lvalue (a plain name expression is only an lvalue when its descriptor is one of
    /// these).
    #[must_use]
    pub fn is_assignable_slot(&self) -> bool {
        matches!(self, Self::Variable { .. })
    }

    pub fn get(&self, scope: &Rc<ExecScope>) -> Value {
        match self {
            Self::Variable { scope_id, scope_ofs, slot } | Self::Constant { scope_id, scope_ofs, slot } => {
                scope.get(*scope_id, *scope_ofs, *slot)
            }
            Self::SysConstant { scope_id, scope_ofs, slot } => scope.get(*scope_id, *scope_ofs, *slot),
            Self::Function { scope_id, scope_ofs, decl } => {
                let closure = scope.get_target_scope(*scope_id, *scope_ofs);
                Value::new_function(Rc::clone(decl), closure)
            }
            Self::Class { scope_id, scope_ofs, decl } => {
                let closure = scope.get_target_scope(*scope_id, *scope_ofs);
                Value::new_class(Rc::clone(decl), closure)
            }
        }
    }

    /// Stores into a slot for the first time (declaration execution). Constants may only
    /// be initialized once; the binder guarantees this is never called twice for the same
    /// constant, so a violation here is a system error.
    pub fn set_initialize(&self, scope: &Rc<ExecScope>, value: Value) {
        match self {
            Self::Variable { scope_id, scope_ofs, slot } | Self::Constant { scope_id, scope_ofs, slot } => {
                let target = scope.get_target_scope(*scope_id, *scope_ofs);
                let mut slots = target.slots.borrow_mut();
                assert!(
                    matches!(slots[*slot], Value::Undefined),
                    "system error: re-initializing an already-initialized slot"
                );
                slots[*slot] = value;
            }
            Self::SysConstant { scope_id, scope_ofs, slot } => {
                let target = scope.get_target_scope(*scope_id, *scope_ofs);
                target.slots.borrow_mut()[*slot] = value;
            }
            Self::Function { .. } | Self::Class { .. } => {
                panic!("system error: function/class descriptors have no storage slot")
            }
        }
    }

    /// Overwrites an already-initialized slot. The binder rejects this statically for
    /// `Constant` descriptors (`Not an lvalue`), so reaching this on a constant is a
    /// system error, not a script error.
    pub fn set_modify(&self, scope: &Rc<ExecScope>, value: Value) {
        match self {
            Self::Variable { scope_id, scope_ofs, slot } => {
                let target = scope.get_target_scope(*scope_id, *scope_ofs);
                target.slots.borrow_mut()[*slot] = value;
            }
            Self::Constant { .. } => panic!("system error: attempted to modify a constant"),
            Self::SysConstant { .. } | Self::Function { .. } | Self::Class { .. } => {
                panic!("system error: descriptor is not a modifiable variable")
            }
        }
    }
}

/// Bind-time scope node. Structural only — no storage. Borrowed from its parent for the
/// duration of one recursive binder walk; only the [`ScopeDescriptor`] produced by
/// [`Self::create_scope_descriptor`] survives past binding.
pub struct BindScope<'a> {
    context: &'a BindContext,
    outer: Option<&'a BindScope<'a>>,
    id: ScopeId,
    scope_ofs: usize,
    /// Depth of the nearest enclosing scope at which `this` is bound, if any.
    this_scope_ofs: Option<usize>,
    /// Whether `break`/`continue` are legal directly inside this scope.
    loop_allowed: bool,
    names: RefCell<AHashMap<NameId, Rc<NameDescriptor>>>,
    next_slot: Cell<usize>,
    closed: Cell<bool>,
}

impl<'a> BindScope<'a> {
    #[must_use]
    pub fn id(&self) -> ScopeId {
        self.id
    }

    #[must_use]
    pub fn scope_ofs(&self) -> usize {
        self.scope_ofs
    }

    #[must_use]
    pub fn is_loop_control_statement_allowed(&self) -> bool {
        self.loop_allowed
    }

    #[must_use]
    pub fn is_this_allowed(&self) -> bool {
        self.this_scope_ofs.is_some()
    }

    fn check_not_closed(&self) {
        assert!(!self.closed.get(), "system error: builder method called on a closed BindScope");
    }

    fn check_name_conflict(&self, name: &NameInfo, pos: &TextPos) -> Result<(), CompileError> {
        let mut scope = Some(self);
        while let Some(s) = scope {
            if s.names.borrow().contains_key(&name.id()) {
                return Err(CompileError::new(
                    Some(pos.clone()),
                    format!("Name conflict: '{}' is already declared in an enclosing scope", name.text()),
                ));
            }
            scope = s.outer;
        }
        Ok(())
    }

    pub fn lookup(&self, name: &NameInfo, pos: &TextPos) -> Result<Rc<NameDescriptor>, CompileError> {
        let mut scope = Some(self);
        while let Some(s) = scope {
            if let Some(desc) = s.names.borrow().get(&name.id()) {
                return Ok(Rc::clone(desc));
            }
            scope = s.outer;
        }
        Err(CompileError::new(Some(pos.clone()), format!("Name not found: '{}'", name.text())))
    }

    #[must_use]
    pub fn contains_name(&self, name: &NameInfo) -> bool {
        let mut scope = Some(self);
        while let Some(s) = scope {
            if s.names.borrow().contains_key(&name.id()) {
                return true;
            }
            scope = s.outer;
        }
        false
    }

    fn declare_slot(&self, name: &NameInfo, pos: &TextPos, constant: bool) -> Result<Rc<NameDescriptor>, CompileError> {
        self.check_not_closed();
        self.check_name_conflict(name, pos)?;
        let slot = self.next_slot.get();
        self.next_slot.set(slot + 1);
        let desc = Rc::new(if constant {
            NameDescriptor::Constant { scope_id: self.id, scope_ofs: self.scope_ofs, slot }
        } else {
            NameDescriptor::Variable { scope_id: self.id, scope_ofs: self.scope_ofs, slot }
        });
        self.names.borrow_mut().insert(name.id(), Rc::clone(&desc));
        Ok(desc)
    }

    pub fn declare_variable(&self, name: &NameInfo, pos: &TextPos, constant: bool) -> Result<Rc<NameDescriptor>, CompileError> {
        self.declare_slot(name, pos, constant)
    }

    pub fn declare_function(
        &self,
        name: &NameInfo,
        pos: &TextPos,
        decl: Rc<FunctionDecl>,
    ) -> Result<Rc<NameDescriptor>, CompileError> {
        self.check_not_closed();
        self.check_name_conflict(name, pos)?;
        let desc = Rc::new(NameDescriptor::Function { scope_id: self.id, scope_ofs: self.scope_ofs, decl });
        self.names.borrow_mut().insert(name.id(), Rc::clone(&desc));
        Ok(desc)
    }

    pub fn declare_class(
        &self,
        name: &NameInfo,
        pos: &TextPos,
        decl: Rc<ClassDecl>,
    ) -> Result<Rc<NameDescriptor>, CompileError> {
        self.check_not_closed();
        self.check_name_conflict(name, pos)?;
        let desc = Rc::new(NameDescriptor::Class { scope_id: self.id, scope_ofs: self.scope_ofs, decl });
        self.names.borrow_mut().insert(name.id(), Rc::clone(&desc));
        Ok(desc)
    }

    /// Declares a host-injected constant without checking for a conflict with
    /// user-declared names below it (used only when seeding a fresh top-level scope
    /// before the script body is bound, so there is nothing to conflict with yet).
    pub fn declare_sys_constant(&self, name: &NameInfo) -> Rc<NameDescriptor> {
        self.check_not_closed();
        let slot = self.next_slot.get();
        self.next_slot.set(slot + 1);
        let desc = Rc::new(NameDescriptor::SysConstant { scope_id: self.id, scope_ofs: self.scope_ofs, slot });
        self.names.borrow_mut().insert(name.id(), Rc::clone(&desc));
        desc
    }

    /// A function or class body: a fresh `this`-anchor if `this_allowed`, otherwise `this`
    /// is inaccessible from inside (a plain function does not see an enclosing object's
    /// `this`). Always starts a fresh (non-loop) control-flow region: `break`/`continue`
    /// cannot cross a function boundary.
    #[must_use]
    pub fn create_nested_scope<'s>(&'s self, this_allowed: bool) -> BindScope<'s>
    where
        'a: 's,
    {
        let scope_ofs = self.scope_ofs + 1;
        BindScope {
            context: self.context,
            outer: Some(self),
            id: self.context.allocate_scope_id(),
            scope_ofs,
            this_scope_ofs: if this_allowed { Some(scope_ofs) } else { None },
            loop_allowed: false,
            names: RefCell::new(AHashMap::new()),
            next_slot: Cell::new(0),
            closed: Cell::new(false),
        }
    }

    /// A lexical block (`if`/`while`/`for`/bare `{}`body). Inherits the enclosing `this`
    /// anchor unchanged. `nested_loop` starts a fresh loop region; otherwise the block
    /// inherits whether `break`/`continue` are legal from its own enclosing scope (so an
    /// `if` nested inside a `while` body still allows `break`).
    #[must_use]
    pub fn create_nested_block<'s>(&'s self, nested_loop: bool) -> BindScope<'s>
    where
        'a: 's,
    {
        BindScope {
            context: self.context,
            outer: Some(self),
            id: self.context.allocate_scope_id(),
            scope_ofs: self.scope_ofs + 1,
            this_scope_ofs: self.this_scope_ofs,
            loop_allowed: nested_loop || self.loop_allowed,
            names: RefCell::new(AHashMap::new()),
            next_slot: Cell::new(0),
            closed: Cell::new(false),
        }
    }

    /// Depth at which `this` is bound, for use by the `this`-expression binder. Returns
    /// `None` (a compile error "No 'this' in current scope" at the call site) when no
    /// enclosing scope establishes an anchor.
    #[must_use]
    pub fn this_scope_ofs(&self) -> Option<usize> {
        self.this_scope_ofs
    }

    /// Freezes this scope: after this call no more names may be declared in it. Only the
    /// returned descriptor is needed to construct `ExecScope`s from here on.
    pub fn create_scope_descriptor(&self) -> Rc<ScopeDescriptor> {
        self.check_not_closed();
        self.closed.set(true);
        let mut accessible = AHashSet::new();
        let mut scope = Some(self);
        while let Some(s) = scope {
            accessible.insert(s.id);
            scope = s.outer;
        }
        Rc::new(ScopeDescriptor {
            id: self.id,
            outer_id: self.outer.map(BindScope::id),
            scope_idx: self.scope_ofs,
            size: self.next_slot.get(),
            accessible_scopes: accessible,
        })
    }
}

/// Runtime scope frame: storage slots, the captured `this` (if any), and a link to the
/// enclosing frame. Forms a tree via `Rc` parent pointers; a closure keeps its defining
/// chain alive simply by holding an `Rc` clone, it never mutates it (see module docs).
#[derive(Debug)]
pub struct ExecScope {
    descriptor: Rc<ScopeDescriptor>,
    outer: Option<Rc<ExecScope>>,
    slots: RefCell<Vec<Value>>,
    /// A cell rather than a plain field: constructing a new object needs a scope whose
    /// `this` is the object itself, but the `Rc<ObjectValue>` can't exist until its scope
    /// does. `instantiate_class` creates the scope with this cell empty, builds the object
    /// around it, then calls `set_this` to close the cycle.
    this_value: OnceCell<Value>,
}

impl ExecScope {
    #[must_use]
    pub fn new_root(descriptor: Rc<ScopeDescriptor>) -> Rc<Self> {
        let size = descriptor.size();
        Rc::new(Self {
            descriptor,
            outer: None,
            slots: RefCell::new(vec![Value::Undefined; size]),
            this_value: OnceCell::new(),
        })
    }

    #[must_use]
    pub fn descriptor(&self) -> &Rc<ScopeDescriptor> {
        &self.descriptor
    }

    /// Creates a child frame. `this_override` replaces the captured `this` for this frame
    /// and everything nested in it (used when entering a method body); `None` inherits the
    /// parent's `this` unchanged. Pass `Some` only when the value is already available —
    /// for a newly constructed object, create the scope with no override and backfill it
    /// with [`Self::set_this`] once the object's `Rc` exists.
    #[must_use]
    pub fn create_nested_scope(self: &Rc<Self>, descriptor: Rc<ScopeDescriptor>, this_override: Option<Value>) -> Rc<Self> {
        let size = descriptor.size();
        let this_value = OnceCell::new();
        if let Some(value) = this_override.or_else(|| self.this_value.get().cloned()) {
            this_value.set(value).expect("system error: freshly created cell is never already set");
        }
        Rc::new(Self {
            descriptor,
            outer: Some(Rc::clone(self)),
            slots: RefCell::new(vec![Value::Undefined; size]),
            this_value,
        })
    }

    /// Backfills `this` on a scope created with no override — the self-referential case
    /// for object construction, where the scope must exist before the object `Rc` it
    /// points back to can be built. Panics if called twice on the same scope.
    pub fn set_this(&self, value: Value) {
        self.this_value.set(value).expect("system error: 'this' already bound on this scope");
    }

    /// Walks outward from `self` to the frame at depth `scope_ofs`, asserting that frame's
    /// id matches `scope_id`. A mismatch is a system error: it means a `NameDescriptor`
    /// computed during binding no longer corresponds to the live scope chain.
    #[must_use]
    pub fn get_target_scope(self: &Rc<Self>, scope_id: ScopeId, scope_ofs: usize) -> Rc<Self> {
        let mut current = Rc::clone(self);
        while current.descriptor.scope_idx() > scope_ofs {
            current = Rc::clone(current.outer.as_ref().expect("system error: scope chain shorter than scope_ofs"));
        }
        assert!(
            current.descriptor.id() == scope_id,
            "system error: scope id mismatch at depth {scope_ofs} (bind/execute drift)"
        );
        current
    }

    #[must_use]
    pub fn get(self: &Rc<Self>, scope_id: ScopeId, scope_ofs: usize, slot: usize) -> Value {
        let target = self.get_target_scope(scope_id, scope_ofs);
        let value = target.slots.borrow()[slot].clone();
        value
    }

    pub fn set_slot(self: &Rc<Self>, scope_id: ScopeId, scope_ofs: usize, slot: usize, value: Value) {
        let target = self.get_target_scope(scope_id, scope_ofs);
        target.slots.borrow_mut()[slot] = value;
    }

    /// Returns the captured `this`, or panics: the binder guarantees a `this` expression
    /// only appears where `BindScope::this_scope_ofs` was `Some`, so a missing `this_value`
    /// here means bind and execute disagree about scope shape — a system error.
    #[must_use]
    pub fn get_this(self: &Rc<Self>, scope_ofs: usize) -> Value {
        let mut current = Rc::clone(self);
        while current.descriptor.scope_idx() > scope_ofs {
            current = Rc::clone(current.outer.as_ref().expect("system error: scope chain shorter than this_scope_ofs"));
        }
        current.this_value.get().cloned().expect("system error: no 'this' bound in target scope")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn declaring_same_name_twice_in_same_scope_conflicts() {
        let ctx = BindContext::new();
        let root = ctx.create_root_scope();
        let registry = crate::intern::NameRegistry::new();
        let name = registry.register("x");
        let pos = TextPos::new("t", 1, 1);
        root.declare_variable(&name, &pos, false).unwrap();
        let err = root.declare_variable(&name, &pos, false).unwrap_err();
        assert!(err.message().contains("Name conflict"));
    }

    #[test]
    fn shadowing_an_ancestor_name_is_also_a_conflict() {
        let ctx = BindContext::new();
        let root = ctx.create_root_scope();
        let registry = crate::intern::NameRegistry::new();
        let name = registry.register("x");
        let pos = TextPos::new("t", 1, 1);
        root.declare_variable(&name, &pos, false).unwrap();
        let child = root.create_nested_block(false);
        let err = child.declare_variable(&name, &pos, false).unwrap_err();
        assert!(err.message().contains("Name conflict"));
    }

    #[test]
    fn lookup_walks_outward() {
        let ctx = BindContext::new();
        let root = ctx.create_root_scope();
        let registry = crate::intern::NameRegistry::new();
        let name = registry.register("x");
        let pos = TextPos::new("t", 1, 1);
        root.declare_variable(&name, &pos, false).unwrap();
        let child = root.create_nested_block(false);
        let found = child.lookup(&name, &pos).unwrap();
        assert_eq!(found.scope_id(), root.id());
    }

    #[test]
    fn missing_name_is_compile_error() {
        let ctx = BindContext::new();
        let root = ctx.create_root_scope();
        let registry = crate::intern::NameRegistry::new();
        let name = registry.register("missing");
        let pos = TextPos::new("t", 1, 1);
        assert!(root.lookup(&name, &pos).is_err());
    }

    #[test]
    fn loop_flag_propagates_through_non_loop_nested_blocks() {
        let ctx = BindContext::new();
        let root = ctx.create_root_scope();
        let loop_scope = root.create_nested_block(true);
        assert!(loop_scope.is_loop_control_statement_allowed());
        let if_inside_loop = loop_scope.create_nested_block(false);
        assert!(if_inside_loop.is_loop_control_statement_allowed());
    }

    #[test]
    fn loop_flag_does_not_cross_function_boundary() {
        let ctx = BindContext::new();
        let root = ctx.create_root_scope();
        let loop_scope = root.create_nested_block(true);
        let function_scope = loop_scope.create_nested_scope(false);
        assert!(!function_scope.is_loop_control_statement_allowed());
    }

    #[test]
    fn exec_scope_get_roundtrips_through_nesting() {
        let ctx = BindContext::new();
        let root = ctx.create_root_scope();
        let registry = crate::intern::NameRegistry::new();
        let name = registry.register("x");
        let pos = TextPos::new("t", 1, 1);
        let desc = root.declare_variable(&name, &pos, false).unwrap();
        let root_descriptor = root.create_scope_descriptor();
        let root_exec = ExecScope::new_root(Rc::clone(&root_descriptor));
        desc.set_initialize(&root_exec, Value::Integer(42));

        let child = root.create_nested_block(false);
        let child_descriptor = child.create_scope_descriptor();
        let child_exec = root_exec.create_nested_scope(child_descriptor, None);

        assert_eq!(desc.get(&child_exec).get_integer().unwrap(), 42);
    }
}
