//! Declaration nodes: variables/constants, functions, classes.
//!
//! Each carries a `OnceCell` the binder fills in once and the evaluator reads from then on;
//! there is no second, parallel "bound tree" — bind and execute walk the same nodes.

use std::{cell::OnceCell, rc::Rc};

use ahash::AHashMap;

use crate::{
    intern::{NameId, NameInfo},
    pos::TextPos,
    scope::{NameDescriptor, ScopeDescriptor},
};

use super::{expr::Expr, stmt::Block};

/// A `var` or `const` binding. A `for`-loop or `catch` binding reuses the slot machinery
/// but is represented directly on its owning statement, not as a `VarDecl`.
#[derive(Debug)]
pub struct VarDecl {
    pub name: NameInfo,
    pub pos: TextPos,
    pub is_constant: bool,
    pub init: Option<Expr>,
    pub descriptor: OnceCell<Rc<NameDescriptor>>,
}

impl VarDecl {
    #[must_use]
    pub fn new(name: NameInfo, pos: TextPos, is_constant: bool, init: Option<Expr>) -> Self {
        Self { name, pos, is_constant, init, descriptor: OnceCell::new() }
    }
}

/// A function parameter. Its descriptor is a `Variable` slot in the function body's scope,
/// declared before the body is bound.
#[derive(Debug)]
pub struct Param {
    pub name: NameInfo,
    pub pos: TextPos,
    pub descriptor: OnceCell<Rc<NameDescriptor>>,
}

impl Param {
    #[must_use]
    pub fn new(name: NameInfo, pos: TextPos) -> Self {
        Self { name, pos, descriptor: OnceCell::new() }
    }
}

/// A function declaration or literal. `name` is `None` for a function literal expression
/// and for the one member of a class body that the class-parsing pass has singled out as
/// the constructor.
#[derive(Debug)]
pub struct FunctionDecl {
    pub name: Option<NameInfo>,
    pub pos: TextPos,
    pub params: Vec<Param>,
    pub body: Block,
    /// Set only when this declaration is bound under a name in an enclosing scope
    /// (statement form); left empty for literals and for the class constructor.
    pub descriptor: OnceCell<Rc<NameDescriptor>>,
}

impl FunctionDecl {
    #[must_use]
    pub fn new(name: Option<NameInfo>, pos: TextPos, params: Vec<Param>, body: Block) -> Self {
        Self { name, pos, params, body, descriptor: OnceCell::new() }
    }

    #[must_use]
    pub fn is_constructor(&self) -> bool {
        self.name.is_none()
    }
}

/// Explicit `private`/`public` on a class member, or none (falls back to the member kind's
/// default: functions public, variables/constants private).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberAccess {
    Private,
    Public,
    Default,
}

impl MemberAccess {
    #[must_use]
    pub fn resolve_for_variable(self) -> bool {
        !matches!(self, Self::Public)
    }

    #[must_use]
    pub fn resolve_for_function(self) -> bool {
        matches!(self, Self::Private)
    }
}

#[derive(Debug)]
pub enum ClassMember {
    Variable { decl: VarDecl, access: MemberAccess },
    Function { decl: Rc<FunctionDecl>, access: MemberAccess },
}

/// A member's resolved descriptor plus its resolved visibility, keyed by name for runtime
/// dispatch. Built once by the binder and retained on the class — unlike an ordinary
/// [`crate::scope::BindScope`], whose name table is discarded after freezing, a class's
/// members must stay look-up-able at runtime because `obj.name` only knows which member to
/// fetch once `obj`'s class is known, at evaluation time.
#[derive(Debug, Clone)]
pub struct ClassMemberDescriptor {
    pub descriptor: Rc<NameDescriptor>,
    pub is_private: bool,
}

#[derive(Debug)]
pub struct ClassLayout {
    pub scope: Rc<ScopeDescriptor>,
    pub members: AHashMap<NameId, ClassMemberDescriptor>,
}

impl ClassLayout {
    #[must_use]
    pub fn lookup(&self, name_id: NameId) -> Option<&ClassMemberDescriptor> {
        self.members.get(&name_id)
    }
}

/// A class declaration or literal, already past the one-time constructor-extraction pass:
/// `members` never contains the nameless function that became `constructor`.
#[derive(Debug)]
pub struct ClassDecl {
    pub name: Option<NameInfo>,
    pub pos: TextPos,
    pub members: Vec<ClassMember>,
    pub constructor: Option<Rc<FunctionDecl>>,
    pub descriptor: OnceCell<Rc<NameDescriptor>>,
    /// Filled by the binder once the class body has been bound; read by `instantiate` and
    /// by member access on every `Object` of this class.
    pub layout: OnceCell<Rc<ClassLayout>>,
}

impl ClassDecl {
    /// Splits `raw_members` into the member list and an optional constructor: the first
    /// member whose function declaration has no name.
    #[must_use]
    pub fn new(name: Option<NameInfo>, pos: TextPos, mut raw_members: Vec<ClassMember>) -> Self {
        let ctor_idx = raw_members.iter().position(|m| match m {
            ClassMember::Function { decl, .. } => decl.is_constructor(),
            ClassMember::Variable { .. } => false,
        });
        let constructor = ctor_idx.map(|idx| {
            let removed = raw_members.remove(idx);
            match removed {
                ClassMember::Function { decl, .. } => decl,
                ClassMember::Variable { .. } => unreachable!("index located a Function member"),
            }
        });
        Self { name, pos, members: raw_members, constructor, descriptor: OnceCell::new(), layout: OnceCell::new() }
    }
}

#[derive(Debug)]
pub enum Decl {
    Variable(VarDecl),
    Function(Rc<FunctionDecl>),
    Class(Rc<ClassDecl>),
}

impl Decl {
    #[must_use]
    pub fn pos(&self) -> &TextPos {
        match self {
            Self::Variable(v) => &v.pos,
            Self::Function(f) => &f.pos,
            Self::Class(c) => &c.pos,
        }
    }

    #[must_use]
    pub fn name(&self) -> Option<&NameInfo> {
        match self {
            Self::Variable(v) => Some(&v.name),
            Self::Function(f) => f.name.as_ref(),
            Self::Class(c) => c.name.as_ref(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(text: &str) -> NameInfo {
        crate::intern::NameRegistry::new().register(text)
    }

    #[test]
    fn nameless_function_member_becomes_constructor() {
        let pos = TextPos::new("t", 1, 1);
        let ctor = Rc::new(FunctionDecl::new(None, pos.clone(), vec![], Block::new(vec![])));
        let method = Rc::new(FunctionDecl::new(Some(name("greet")), pos.clone(), vec![], Block::new(vec![])));
        let members = vec![
            ClassMember::Function { decl: method, access: MemberAccess::Default },
            ClassMember::Function { decl: ctor, access: MemberAccess::Default },
        ];
        let class = ClassDecl::new(Some(name("Greeter")), pos, members);
        assert!(class.constructor.is_some());
        assert_eq!(class.members.len(), 1);
    }
}
