//! The native/host bridge: describes host classes (constructors, fields, methods, static
//! members) and dispatches calls into them by argument arity.
//!
//! Unlike the evaluator's own `Function`/`Class`, a host class has no AST: its behaviour is
//! plain Rust closures, registered once per [`crate::runner::Runner`] (so member names are
//! interned against that runner's own [`crate::intern::NameRegistry`]) and looked up by
//! [`crate::intern::NameId`] at call time, exactly like a user-declared name.

use std::{any::Any, cell::RefCell, fmt, rc::Rc};

use ahash::AHashMap;

use crate::{
    intern::{NameId, NameInfo, NameRegistry},
    resource::ResourceTracker,
    value::{RuntimeError, Value, ValueResult},
};

/// A native method body: resolved `this` (absent for a static method) plus the already
/// arity-matched argument list. Argument/return conversion between `Value` and native Rust
/// types happens inline in the closure body, the same way each of the reference
/// interpreter's builtins converts its own arguments rather than going through a generic
/// adapter layer.
pub type NativeFn = Rc<dyn Fn(&dyn ResourceTracker, Option<&Value>, &[Value]) -> ValueResult<Value>>;

/// A native constructor body: produces the opaque per-instance state a [`SysObjectValue`]
/// will carry, wrapped by [`SysClassDescriptor::instantiate`].
pub type NativeStateFn = Rc<dyn Fn(&dyn ResourceTracker, &[Value]) -> ValueResult<Box<dyn Any>>>;

/// Overloads of one name, keyed by exact argument count. Resolution per §4.10 is
/// arity-only: the first (and only, duplicates are rejected at build time) overload whose
/// parameter count equals `arguments.len()` is chosen.
#[derive(Clone, Default)]
pub struct OverloadSet(Vec<(usize, NativeFn)>);

impl OverloadSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn add(&mut self, arity: usize, func: NativeFn) {
        assert!(
            !self.0.iter().any(|(a, _)| *a == arity),
            "host bridge: duplicate overload registered for arity {arity}"
        );
        self.0.push((arity, func));
    }

    pub fn resolve(&self, arity: usize) -> ValueResult<&NativeFn> {
        self.0
            .iter()
            .find(|(a, _)| *a == arity)
            .map(|(_, f)| f)
            .ok_or_else(|| RuntimeError::new("Wrong method arguments"))
    }
}

impl fmt::Debug for OverloadSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("OverloadSet").field(&self.0.iter().map(|(a, _)| a).collect::<Vec<_>>()).finish()
    }
}

#[derive(Clone, Default)]
pub struct ConstructorOverloadSet(Vec<(usize, NativeStateFn)>);

impl ConstructorOverloadSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn add(&mut self, arity: usize, func: NativeStateFn) {
        assert!(
            !self.0.iter().any(|(a, _)| *a == arity),
            "host bridge: duplicate constructor overload registered for arity {arity}"
        );
        self.0.push((arity, func));
    }

    pub fn resolve(&self, arity: usize) -> ValueResult<&NativeStateFn> {
        self.0
            .iter()
            .find(|(a, _)| *a == arity)
            .map(|(_, f)| f)
            .ok_or_else(|| RuntimeError::new("Wrong method arguments"))
    }
}

impl fmt::Debug for ConstructorOverloadSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ConstructorOverloadSet").field(&self.0.iter().map(|(a, _)| a).collect::<Vec<_>>()).finish()
    }
}

/// A host class member: a plain value (static fields only — instance fields would need
/// per-object storage, which no in-scope host class requires) or an overload set.
#[derive(Clone, Debug)]
pub enum SysMember {
    Field(Value),
    Method(Rc<OverloadSet>),
}

/// A resolved host method, possibly bound to an instance. Produced by member access on a
/// `SysClass`, `SysNamespace`, `SysObject`, or (via `String`'s instance-member table) a
/// primitive `Value::String`. Calling it dispatches by the call's own argument count.
pub struct SysMethodValue {
    pub overloads: Rc<OverloadSet>,
    pub this: Option<Value>,
}

impl fmt::Debug for SysMethodValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SysMethodValue").field("bound", &self.this.is_some()).finish()
    }
}

impl SysMethodValue {
    pub fn invoke(&self, tracker: &dyn ResourceTracker, args: &[Value]) -> ValueResult<Value> {
        let func = self.overloads.resolve(args.len())?;
        func(tracker, self.this.as_ref(), args)
    }
}

/// Describes one native class: an optional constructor, and member tables split by
/// static/instance (a host class may have both, e.g. `String`'s static `char(code)` next to
/// instance methods like `length()`).
pub struct SysClassDescriptor {
    name: &'static str,
    constructor: Option<ConstructorOverloadSet>,
    static_members: AHashMap<NameId, SysMember>,
    instance_members: AHashMap<NameId, SysMember>,
}

impl fmt::Debug for SysClassDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SysClassDescriptor").field("name", &self.name).finish()
    }
}

impl SysClassDescriptor {
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn get_static_member(&self, name: &str, name_id: NameId) -> ValueResult<Value> {
        match self.static_members.get(&name_id) {
            Some(SysMember::Field(v)) => Ok(v.clone()),
            Some(SysMember::Method(overloads)) => {
                Ok(Value::SysMethod(Rc::new(SysMethodValue { overloads: Rc::clone(overloads), this: None })))
            }
            None => Err(RuntimeError::new(format!("{} has no static member '{name}'", self.name))),
        }
    }

    pub fn get_instance_member(&self, this: Value, name: &str, name_id: NameId) -> ValueResult<Value> {
        match self.instance_members.get(&name_id) {
            Some(SysMember::Field(v)) => Ok(v.clone()),
            Some(SysMember::Method(overloads)) => {
                Ok(Value::SysMethod(Rc::new(SysMethodValue { overloads: Rc::clone(overloads), this: Some(this) })))
            }
            None => Err(RuntimeError::new(format!("{} has no member '{name}'", self.name))),
        }
    }

    pub fn instantiate(self: &Rc<Self>, tracker: &dyn ResourceTracker, args: &[Value]) -> ValueResult<Value> {
        let ctor = self
            .constructor
            .as_ref()
            .ok_or_else(|| RuntimeError::new(format!("{} has no constructor", self.name)))?;
        let func = ctor.resolve(args.len())?;
        let state = func(tracker, args)?;
        Ok(self.wrap_state(state))
    }

    /// Builds an instance directly from already-available state, bypassing constructor
    /// overload resolution. For host code that produces a new instance as the result of an
    /// operation rather than a script-visible `new` call (e.g. `ServerSocket.accept()`
    /// handing back a connected `Socket`).
    #[must_use]
    pub fn wrap_state(self: &Rc<Self>, state: Box<dyn Any>) -> Value {
        Value::SysObject(Rc::new(SysObjectValue { class: Rc::clone(self), state: RefCell::new(state) }))
    }
}

/// An instance of a host class. `state` is downcast by that class's own method closures,
/// which are the only code that knows its concrete type.
pub struct SysObjectValue {
    class: Rc<SysClassDescriptor>,
    state: RefCell<Box<dyn Any>>,
}

impl fmt::Debug for SysObjectValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SysObjectValue").field("class", &self.class.name).finish()
    }
}

impl SysObjectValue {
    #[must_use]
    pub fn class(&self) -> &Rc<SysClassDescriptor> {
        &self.class
    }

    #[must_use]
    pub fn state(&self) -> &RefCell<Box<dyn Any>> {
        &self.state
    }

    pub fn get_member(self: &Rc<Self>, name: &str, name_id: NameId) -> ValueResult<Value> {
        self.class.get_instance_member(Value::SysObject(Rc::clone(self)), name, name_id)
    }
}

/// Like a class but exposes only static members; backs the single injected `sys` root.
pub struct SysNamespaceDescriptor {
    name: &'static str,
    members: AHashMap<NameId, SysMember>,
}

impl fmt::Debug for SysNamespaceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SysNamespaceDescriptor").field("name", &self.name).finish()
    }
}

impl SysNamespaceDescriptor {
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn get_member(&self, name: &str, name_id: NameId) -> ValueResult<Value> {
        match self.members.get(&name_id) {
            Some(SysMember::Field(v)) => Ok(v.clone()),
            Some(SysMember::Method(overloads)) => {
                Ok(Value::SysMethod(Rc::new(SysMethodValue { overloads: Rc::clone(overloads), this: None })))
            }
            None => Err(RuntimeError::new(format!("{} has no member '{name}'", self.name))),
        }
    }
}

/// Builds a [`SysClassDescriptor`], registering member names against the runner's
/// [`NameRegistry`] as they're added. Builder methods panic on a name/arity clash: every
/// in-scope call site registers a fixed, literal set of members, so a clash can only mean a
/// bug in the registration code itself, never script input.
pub struct SysClassBuilder<'r> {
    registry: &'r NameRegistry,
    name: &'static str,
    constructor: Option<ConstructorOverloadSet>,
    static_members: AHashMap<NameId, SysMember>,
    instance_members: AHashMap<NameId, SysMember>,
}

impl<'r> SysClassBuilder<'r> {
    #[must_use]
    pub fn new(registry: &'r NameRegistry, name: &'static str) -> Self {
        Self { registry, name, constructor: None, static_members: AHashMap::new(), instance_members: AHashMap::new() }
    }

    #[must_use]
    pub fn constructor(mut self, arity: usize, func: NativeStateFn) -> Self {
        self.constructor.get_or_insert_with(ConstructorOverloadSet::new).add(arity, func);
        self
    }

    fn intern(&self, name: &str) -> NameInfo {
        self.registry.register(name)
    }

    #[must_use]
    pub fn static_field(mut self, name: &str, value: Value) -> Self {
        let id = self.intern(name).id();
        let clash = self.static_members.insert(id, SysMember::Field(value));
        assert!(clash.is_none(), "host bridge: duplicate static member '{name}' on {}", self.name);
        self
    }

    #[must_use]
    pub fn static_method(mut self, name: &str, arity: usize, func: NativeFn) -> Self {
        let id = self.intern(name).id();
        match self.static_members.entry(id).or_insert_with(|| SysMember::Method(Rc::new(OverloadSet::new()))) {
            SysMember::Method(overloads) => Rc::get_mut(overloads)
                .expect("host bridge: overload set shared before build() completed")
                .add(arity, func),
            SysMember::Field(_) => panic!("host bridge: '{name}' on {} is both a field and a method", self.name),
        }
        self
    }

    #[must_use]
    pub fn instance_method(mut self, name: &str, arity: usize, func: NativeFn) -> Self {
        let id = self.intern(name).id();
        match self.instance_members.entry(id).or_insert_with(|| SysMember::Method(Rc::new(OverloadSet::new()))) {
            SysMember::Method(overloads) => Rc::get_mut(overloads)
                .expect("host bridge: overload set shared before build() completed")
                .add(arity, func),
            SysMember::Field(_) => panic!("host bridge: '{name}' on {} is both a field and a method", self.name),
        }
        self
    }

    #[must_use]
    pub fn build(self) -> Rc<SysClassDescriptor> {
        Rc::new(SysClassDescriptor {
            name: self.name,
            constructor: self.constructor,
            static_members: self.static_members,
            instance_members: self.instance_members,
        })
    }
}

/// Builds the single [`SysNamespaceDescriptor`] bound as `sys`.
pub struct SysNamespaceBuilder<'r> {
    registry: &'r NameRegistry,
    name: &'static str,
    members: AHashMap<NameId, SysMember>,
}

impl<'r> SysNamespaceBuilder<'r> {
    #[must_use]
    pub fn new(registry: &'r NameRegistry, name: &'static str) -> Self {
        Self { registry, name, members: AHashMap::new() }
    }

    #[must_use]
    pub fn field(mut self, name: &str, value: Value) -> Self {
        let id = self.registry.register(name).id();
        let clash = self.members.insert(id, SysMember::Field(value));
        assert!(clash.is_none(), "host bridge: duplicate sys member '{name}'");
        self
    }

    #[must_use]
    pub fn method(mut self, name: &str, arity: usize, func: NativeFn) -> Self {
        let id = self.registry.register(name).id();
        match self.members.entry(id).or_insert_with(|| SysMember::Method(Rc::new(OverloadSet::new()))) {
            SysMember::Method(overloads) => {
                Rc::get_mut(overloads).expect("host bridge: overload set shared before build() completed").add(arity, func);
            }
            SysMember::Field(_) => panic!("host bridge: 'sys.{name}' is both a field and a method"),
        }
        self
    }

    #[must_use]
    pub fn class(self, name: &'static str, descriptor: Rc<SysClassDescriptor>) -> Self {
        debug_assert_eq!(name, descriptor.name());
        self.field(name, Value::SysClass(descriptor))
    }

    #[must_use]
    pub fn build(self) -> Rc<SysNamespaceDescriptor> {
        Rc::new(SysNamespaceDescriptor { name: self.name, members: self.members })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::NoLimitTracker;

    #[test]
    fn static_overload_resolves_by_arity() {
        let registry = NameRegistry::new();
        let descriptor = SysClassBuilder::new(&registry, "Demo")
            .static_method("f", 0, Rc::new(|_t, _this, _args| Ok(Value::Integer(0))))
            .static_method("f", 1, Rc::new(|_t, _this, args| Ok(args[0].clone())))
            .build();
        let name = registry.register("f");
        let method = descriptor.get_static_member("f", name.id()).unwrap();
        let Value::SysMethod(method) = method else { panic!("expected a method value") };
        let tracker = NoLimitTracker;
        assert_eq!(method.invoke(&tracker, &[]).unwrap().get_integer().unwrap(), 0);
        assert_eq!(method.invoke(&tracker, &[Value::Integer(7)]).unwrap().get_integer().unwrap(), 7);
    }

    #[test]
    fn missing_arity_is_a_runtime_error() {
        let registry = NameRegistry::new();
        let descriptor = SysClassBuilder::new(&registry, "Demo")
            .static_method("f", 1, Rc::new(|_t, _this, args| Ok(args[0].clone())))
            .build();
        let name = registry.register("f");
        let method = descriptor.get_static_member("f", name.id()).unwrap();
        let Value::SysMethod(method) = method else { panic!("expected a method value") };
        let tracker = NoLimitTracker;
        assert!(method.invoke(&tracker, &[]).is_err());
    }

    #[test]
    fn constructor_produces_a_sys_object() {
        let registry = NameRegistry::new();
        let descriptor = SysClassBuilder::new(&registry, "Counter")
            .constructor(0, Rc::new(|_t, _args| Ok(Box::new(0i64) as Box<dyn Any>)))
            .instance_method(
                "get",
                0,
                Rc::new(|_t, this, _args| {
                    let Some(Value::SysObject(obj)) = this else { panic!("expected bound this") };
                    let state = obj.state().borrow();
                    Ok(Value::Integer(*state.downcast_ref::<i64>().unwrap()))
                }),
            )
            .build();
        let tracker = NoLimitTracker;
        let instance = descriptor.instantiate(&tracker, &[]).unwrap();
        let Value::SysObject(obj) = &instance else { panic!("expected a SysObject") };
        let name = registry.register("get");
        let getter = obj.get_member("get", name.id()).unwrap();
        let Value::SysMethod(getter) = getter else { panic!("expected a method value") };
        assert_eq!(getter.invoke(&tracker, &[]).unwrap().get_integer().unwrap(), 0);
    }
}
