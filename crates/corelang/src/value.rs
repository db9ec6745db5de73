//! The runtime value model.
//!
//! `Value` is a tagged enum, not a trait object: the variant set is small and closed, and a
//! `match` reads better than a vtable here. Reference-shaped variants (`String`, `Array`,
//! `Function`, `Class`, `Object`, `Exception`, the `Sys*` family) are `Rc`-wrapped so cloning
//! a `Value` is always a refcount bump, never a deep copy — unlike a hand-rolled GC'd
//! interpreter, nothing here needs a `Local`/`Ref` handle distinction, ownership is exactly
//! what `Rc` already gives us.

use std::{
    cell::{Cell, RefCell},
    cmp::Ordering,
    fmt,
    hash::{Hash, Hasher},
    rc::Rc,
};

use ahash::AHasher;

use crate::{
    ast::{ClassDecl, FunctionDecl},
    exception::ExceptionValue,
    host::{SysClassDescriptor, SysMethodValue, SysNamespaceDescriptor, SysObjectValue},
    scope::ExecScope,
};

/// Small-integer and small-float cache bounds, matching the reference value factory.
pub const SMALL_NUMBER_CACHE_MIN: i64 = -1024;
pub const SMALL_NUMBER_CACHE_MAX: i64 = 1024;
/// Single-character string cache: one entry per byte value.
pub const CHAR_CACHE_SIZE: usize = 256;

/// Orthogonal classifier used by arithmetic/comparison promotion. Deliberately coarser than
/// `Value`'s own variant set: every reference-shaped value (function, class, object,
/// exception, array, sys value) reports `Reference`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandType {
    Integer,
    Float,
    Boolean,
    String,
    Reference,
}

/// A runtime failure not yet wrapped into a catchable [`Value::Exception`]. Operators and
/// value methods return this; the evaluator is the single place that turns one into an
/// exception value, stamping it with the current call-stack trace (see [`crate::exception`]).
#[derive(Debug, Clone)]
pub struct RuntimeError(String);

impl RuntimeError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub type ValueResult<T> = Result<T, RuntimeError>;

/// An immutable byte-content string with a lazily computed, cached hash.
#[derive(Debug)]
pub struct StringValue {
    text: Rc<str>,
    hash: Cell<Option<u64>>,
}

impl StringValue {
    #[must_use]
    pub fn new(text: impl Into<Rc<str>>) -> Rc<Self> {
        Rc::new(Self { text: text.into(), hash: Cell::new(None) })
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.text
    }

    #[must_use]
    pub fn hash_code(&self) -> u64 {
        if let Some(h) = self.hash.get() {
            return h;
        }
        let mut hasher = AHasher::default();
        self.text.hash(&mut hasher);
        let h = hasher.finish();
        self.hash.set(Some(h));
        h
    }

    /// Unsigned-byte lexicographic ordering, the standardised choice documented against the
    /// source's inconsistent signed/unsigned comparisons (see design notes).
    #[must_use]
    pub fn compare_to(&self, other: &Self) -> Ordering {
        self.text.as_bytes().cmp(other.text.as_bytes())
    }
}

impl PartialEq for StringValue {
    fn eq(&self, other: &Self) -> bool {
        self.text == other.text
    }
}
impl Eq for StringValue {}

/// A function value: an AST declaration plus the scope it closed over. Two `Value::Function`s
/// are reference-equal only when both the declaration and the captured scope are identical.
#[derive(Debug)]
pub struct FunctionValue {
    pub decl: Rc<FunctionDecl>,
    pub closure: Rc<ExecScope>,
}

#[derive(Debug)]
pub struct ClassValue {
    pub decl: Rc<ClassDecl>,
    pub closure: Rc<ExecScope>,
}

/// A user-object instance: its class plus a per-instance exec scope built from the class's
/// frozen [`crate::ast::ClassLayout`] scope descriptor. Field storage lives entirely in that
/// scope's slots; `ObjectValue` itself owns no other state.
#[derive(Debug)]
pub struct ObjectValue {
    pub class: Rc<ClassValue>,
    pub scope: Rc<ExecScope>,
}

#[derive(Debug, Clone)]
pub enum Value {
    /// Sentinel for an uninitialised storage slot. Reading it as a value is a runtime error.
    Undefined,
    /// Distinguished empty result: statements, constructors, and bare `return;`.
    Void,
    /// Assignable reference sentinel. Any traversal through it fails "null pointer access".
    Null,
    Boolean(bool),
    /// Two's-complement, unsigned-wraparound arithmetic (see `crate::operators`).
    Integer(i64),
    Float(f64),
    String(Rc<StringValue>),
    /// Fixed-length mutable sequence. Shared by reference: two `Value::Array` clones that
    /// started from the same `new [n]` alias the same backing storage.
    Array(Rc<RefCell<Vec<Value>>>),
    Function(Rc<FunctionValue>),
    Class(Rc<ClassValue>),
    Object(Rc<ObjectValue>),
    Exception(Rc<ExceptionValue>),
    SysClass(Rc<SysClassDescriptor>),
    SysNamespace(Rc<SysNamespaceDescriptor>),
    SysObject(Rc<SysObjectValue>),
    /// A resolved, possibly `this`-bound static or instance host method, produced by
    /// `get_member` on a `SysClass`/`SysNamespace`/`SysObject`/primitive value; calling it
    /// dispatches by argument arity (see `crate::host`).
    SysMethod(Rc<SysMethodValue>),
}

impl Value {
    #[must_use]
    pub fn new_function(decl: Rc<FunctionDecl>, closure: Rc<ExecScope>) -> Self {
        Self::Function(Rc::new(FunctionValue { decl, closure }))
    }

    #[must_use]
    pub fn new_class(decl: Rc<ClassDecl>, closure: Rc<ExecScope>) -> Self {
        Self::Class(Rc::new(ClassValue { decl, closure }))
    }

    #[must_use]
    pub fn new_string(text: impl Into<Rc<str>>) -> Self {
        Self::String(StringValue::new(text))
    }

    #[must_use]
    pub fn new_array(elements: Vec<Value>) -> Self {
        Self::Array(Rc::new(RefCell::new(elements)))
    }

    #[must_use]
    pub fn is_undefined(&self) -> bool {
        matches!(self, Self::Undefined)
    }

    #[must_use]
    pub fn is_void(&self) -> bool {
        matches!(self, Self::Void)
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn get_boolean(&self) -> ValueResult<bool> {
        match self {
            Self::Boolean(b) => Ok(*b),
            _ => Err(wrong_type("boolean", self)),
        }
    }

    pub fn get_integer(&self) -> ValueResult<i64> {
        match self {
            Self::Integer(i) => Ok(*i),
            _ => Err(wrong_type("integer", self)),
        }
    }

    pub fn get_float(&self) -> ValueResult<f64> {
        match self {
            Self::Float(f) => Ok(*f),
            _ => Err(wrong_type("float", self)),
        }
    }

    pub fn get_string(&self) -> ValueResult<Rc<StringValue>> {
        match self {
            Self::String(s) => Ok(Rc::clone(s)),
            _ => Err(wrong_type("string", self)),
        }
    }

    /// Stringifies for concatenation, `to_string()` calls, and `sys.out` writes. Every
    /// variant but `Undefined` answers; `Undefined` has no textual form because observing
    /// it at all is already a runtime error at the read site, never reaching `to_string`.
    pub fn to_display_string(&self) -> ValueResult<String> {
        match self {
            Self::Undefined => Err(RuntimeError::new("Undefined value")),
            Self::Void => Ok("void".to_owned()),
            Self::Null => Ok("null".to_owned()),
            Self::Boolean(b) => Ok(b.to_string()),
            Self::Integer(i) => Ok(i.to_string()),
            Self::Float(f) => Ok(format_float(*f)),
            Self::String(s) => Ok(s.as_str().to_owned()),
            Self::Array(elements) => {
                let parts = elements
                    .borrow()
                    .iter()
                    .map(Value::to_display_string)
                    .collect::<ValueResult<Vec<_>>>()?;
                Ok(format!("[{}]", parts.join(", ")))
            }
            Self::Function(_) => Ok("function".to_owned()),
            Self::Class(c) => Ok(format!("class {}", class_label(c.decl.name.as_ref()))),
            Self::Object(o) => Ok(format!("object {}", class_label(o.class.decl.name.as_ref()))),
            Self::Exception(e) => e.payload().to_display_string(),
            Self::SysClass(c) => Ok(format!("class {}", c.name())),
            Self::SysNamespace(n) => Ok(format!("namespace {}", n.name())),
            Self::SysObject(o) => Ok(format!("object {}", o.class().name())),
            Self::SysMethod(_) => Ok("function".to_owned()),
        }
    }

    #[must_use]
    pub fn get_operand_type(&self) -> Option<OperandType> {
        match self {
            Self::Integer(_) => Some(OperandType::Integer),
            Self::Float(_) => Some(OperandType::Float),
            Self::Boolean(_) => Some(OperandType::Boolean),
            Self::String(_) => Some(OperandType::String),
            Self::Array(_)
            | Self::Function(_)
            | Self::Class(_)
            | Self::Object(_)
            | Self::Exception(_)
            | Self::SysClass(_)
            | Self::SysNamespace(_)
            | Self::SysObject(_)
            | Self::SysMethod(_)
            | Self::Null => Some(OperandType::Reference),
            Self::Undefined | Self::Void => None,
        }
    }

    #[must_use]
    pub fn typeof_tag(&self) -> &'static str {
        match self {
            Self::Undefined | Self::Void => "unknown",
            Self::Null => "null",
            Self::Boolean(_) => "boolean",
            Self::Integer(_) | Self::Float(_) => numeric_typeof(self),
            Self::String(_) => "string",
            Self::Array(_) => "array",
            Self::Function(_) | Self::SysMethod(_) => "function",
            Self::Class(_) | Self::SysClass(_) | Self::SysNamespace(_) => "class",
            Self::Object(_) | Self::SysObject(_) => "object",
            Self::Exception(_) => "exception",
        }
    }

    /// `true` when storing this value anywhere (array element, map entry, attribute,
    /// argument) is legal. Only `Void` is rejected: the distinguished "ran but produced
    /// nothing" marker must never leak into data.
    #[must_use]
    pub fn is_storable(&self) -> bool {
        !self.is_void()
    }

    pub fn get_array_element(&self, index: i64) -> ValueResult<Value> {
        match self {
            Self::Array(elements) => {
                let elements = elements.borrow();
                let idx = non_negative_index(index, elements.len())?;
                Ok(elements[idx].clone())
            }
            Self::String(s) => {
                let bytes = s.as_str().as_bytes();
                let idx = non_negative_index(index, bytes.len())?;
                Ok(Value::Integer(i64::from(bytes[idx])))
            }
            Self::Null => Err(RuntimeError::new("Null pointer access")),
            _ => Err(RuntimeError::new(format!("Not an array: {}", self.typeof_tag()))),
        }
    }

    pub fn set_array_element(&self, index: i64, value: Value) -> ValueResult<()> {
        if !value.is_storable() {
            return Err(RuntimeError::new("Cannot store void in an array"));
        }
        match self {
            Self::Array(elements) => {
                let mut elements = elements.borrow_mut();
                let idx = non_negative_index(index, elements.len())?;
                elements[idx] = value;
                Ok(())
            }
            Self::Null => Err(RuntimeError::new("Null pointer access")),
            _ => Err(RuntimeError::new(format!("Not an array: {}", self.typeof_tag()))),
        }
    }

    #[must_use]
    pub fn array_len(&self) -> Option<usize> {
        match self {
            Self::Array(elements) => Some(elements.borrow().len()),
            Self::String(s) => Some(s.as_str().len()),
            _ => None,
        }
    }

    /// Calls `visitor` once per element in native order, stopping early when it returns
    /// `false` (used by `break`/`return`/`throw` inside a `for-each` body). Returns whether
    /// iteration ran to completion.
    pub fn iterate(&self, mut visitor: impl FnMut(Value) -> ValueResult<bool>) -> ValueResult<bool> {
        match self {
            Self::Array(elements) => {
                let snapshot = elements.borrow().clone();
                for element in snapshot {
                    if !visitor(element)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Self::String(s) => {
                for byte in s.as_str().as_bytes().iter().copied() {
                    if !visitor(Value::Integer(i64::from(byte)))? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Self::Null => Err(RuntimeError::new("Null pointer access")),
            _ => Err(RuntimeError::new(format!("Not a collection: {}", self.typeof_tag()))),
        }
    }

    #[must_use]
    pub fn value_equals(&self, other: &Value) -> ValueResult<bool> {
        match (self, other) {
            (Self::Null, Self::Null) => Ok(true),
            (Self::Null, _) | (_, Self::Null) => Ok(false),
            (Self::Boolean(a), Self::Boolean(b)) => Ok(a == b),
            (Self::Integer(a), Self::Integer(b)) => Ok(a == b),
            (Self::Float(a), Self::Float(b)) => Ok(a == b),
            (Self::Integer(a), Self::Float(b)) | (Self::Float(b), Self::Integer(a)) => {
                Ok((*a as f64) == *b)
            }
            (Self::String(a), Self::String(b)) => Ok(a == b),
            (Self::Array(a), Self::Array(b)) => Ok(Rc::ptr_eq(a, b)),
            (Self::Function(a), Self::Function(b)) => Ok(Rc::ptr_eq(a, b)),
            (Self::Class(a), Self::Class(b)) => Ok(Rc::ptr_eq(a, b)),
            (Self::Object(a), Self::Object(b)) => Ok(Rc::ptr_eq(a, b)),
            (Self::Exception(a), Self::Exception(b)) => Ok(Rc::ptr_eq(a, b)),
            (Self::SysClass(a), Self::SysClass(b)) => Ok(Rc::ptr_eq(a, b)),
            (Self::SysNamespace(a), Self::SysNamespace(b)) => Ok(Rc::ptr_eq(a, b)),
            (Self::SysObject(a), Self::SysObject(b)) => Ok(Rc::ptr_eq(a, b)),
            _ => Err(RuntimeError::new(format!(
                "Cannot compare {} with {}",
                self.typeof_tag(),
                other.typeof_tag()
            ))),
        }
    }

    pub fn value_compare_to(&self, other: &Value) -> ValueResult<Ordering> {
        match (self, other) {
            (Self::Integer(a), Self::Integer(b)) => Ok(a.cmp(b)),
            (Self::Float(a), Self::Float(b)) => {
                a.partial_cmp(b).ok_or_else(|| RuntimeError::new("Cannot order NaN"))
            }
            (Self::Integer(a), Self::Float(b)) => (*a as f64)
                .partial_cmp(b)
                .ok_or_else(|| RuntimeError::new("Cannot order NaN")),
            (Self::Float(a), Self::Integer(b)) => a
                .partial_cmp(&(*b as f64))
                .ok_or_else(|| RuntimeError::new("Cannot order NaN")),
            (Self::String(a), Self::String(b)) => Ok(a.compare_to(b)),
            _ => Err(RuntimeError::new(format!(
                "Cannot order {} and {}",
                self.typeof_tag(),
                other.typeof_tag()
            ))),
        }
    }
}

fn numeric_typeof(v: &Value) -> &'static str {
    match v {
        Value::Integer(_) => "integer",
        Value::Float(_) => "float",
        _ => unreachable!("numeric_typeof called on a non-numeric value"),
    }
}

fn class_label(name: Option<&crate::intern::NameInfo>) -> &str {
    name.map_or("<anonymous>", crate::intern::NameInfo::text)
}

fn wrong_type(expected: &str, actual: &Value) -> RuntimeError {
    RuntimeError::new(format!("Wrong type: expected {expected}, got {}", actual.typeof_tag()))
}

fn non_negative_index(index: i64, len: usize) -> ValueResult<usize> {
    if index < 0 {
        return Err(RuntimeError::new(format!("Index out of bounds: {index}")));
    }
    let idx = index as usize;
    if idx >= len {
        return Err(RuntimeError::new(format!("Index out of bounds: {index}")));
    }
    Ok(idx)
}

/// Renders a float the way the source's value factory does: always with a decimal point, so
/// `1.0` prints as `1.0` rather than `1`.
fn format_float(f: f64) -> String {
    if f.is_finite() && f.fract() == 0.0 && f.abs() < 1e17 {
        format!("{f:.1}")
    } else {
        f.to_string()
    }
}

/// Caches singletons and small numeric/character values the way the reference value factory
/// does, so repeatedly evaluating e.g. a loop counter literal or `arr[i]` on a byte string
/// doesn't allocate a fresh heap value every time.
#[derive(Debug)]
pub struct ValueFactory {
    small_integers: Vec<Value>,
    small_floats: Vec<Value>,
    char_strings: Vec<Value>,
}

impl Default for ValueFactory {
    fn default() -> Self {
        let span = (SMALL_NUMBER_CACHE_MAX - SMALL_NUMBER_CACHE_MIN + 1) as usize;
        let small_integers = (0..span)
            .map(|i| Value::Integer(SMALL_NUMBER_CACHE_MIN + i as i64))
            .collect();
        let small_floats = (0..span)
            .map(|i| Value::Float((SMALL_NUMBER_CACHE_MIN + i as i64) as f64))
            .collect();
        let char_strings = (0..CHAR_CACHE_SIZE)
            .map(|byte| Value::new_string(char::from(byte as u8).to_string()))
            .collect();
        Self { small_integers, small_floats, char_strings }
    }
}

impl ValueFactory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn integer(&self, value: i64) -> Value {
        if (SMALL_NUMBER_CACHE_MIN..=SMALL_NUMBER_CACHE_MAX).contains(&value) {
            self.small_integers[(value - SMALL_NUMBER_CACHE_MIN) as usize].clone()
        } else {
            Value::Integer(value)
        }
    }

    /// Caches a float only when it's integer-valued and falls in the small-integer range,
    /// matching the reference value factory's "small-integer-valued floats" cache.
    #[must_use]
    pub fn float(&self, value: f64) -> Value {
        if value.fract() == 0.0 && value >= SMALL_NUMBER_CACHE_MIN as f64 && value <= SMALL_NUMBER_CACHE_MAX as f64 {
            self.small_floats[(value - SMALL_NUMBER_CACHE_MIN as f64) as usize].clone()
        } else {
            Value::Float(value)
        }
    }

    #[must_use]
    pub fn single_byte_string(&self, byte: u8) -> Value {
        self.char_strings[byte as usize].clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn float_display_always_has_a_decimal_point() {
        assert_eq!(Value::Float(1.0).to_display_string().unwrap(), "1.0");
        assert_eq!(Value::Float(1.5).to_display_string().unwrap(), "1.5");
    }

    #[test]
    fn string_concatenation_display_matches_content() {
        assert_eq!(Value::new_string("hi").to_display_string().unwrap(), "hi");
    }

    #[test]
    fn null_equals_only_null() {
        assert!(Value::Null.value_equals(&Value::Null).unwrap());
        assert!(!Value::Null.value_equals(&Value::Integer(0)).unwrap());
    }

    #[test]
    fn arrays_compare_by_identity() {
        let a = Value::new_array(vec![Value::Integer(1)]);
        let b = Value::new_array(vec![Value::Integer(1)]);
        assert!(!a.value_equals(&b).unwrap());
        assert!(a.value_equals(&a.clone()).unwrap());
    }

    #[test]
    fn string_ordering_is_unsigned_byte_order() {
        let a = Value::new_string("a");
        let high = Value::new_string("\u{00FF}");
        assert_eq!(a.value_compare_to(&high).unwrap(), Ordering::Less);
    }

    #[test]
    fn iterate_over_string_yields_byte_codes() {
        let s = Value::new_string("AB");
        let mut seen = Vec::new();
        s.iterate(|v| {
            seen.push(v.get_integer().unwrap());
            Ok(true)
        })
        .unwrap();
        assert_eq!(seen, vec![65, 66]);
    }

    #[test]
    fn value_factory_caches_small_integers() {
        let factory = ValueFactory::new();
        let a = factory.integer(10);
        let b = factory.integer(10);
        if let (Value::Integer(x), Value::Integer(y)) = (&a, &b) {
            assert_eq!(x, y);
        } else {
            panic!("expected integers");
        }
    }

    #[test]
    fn value_factory_caches_small_integer_valued_floats() {
        let factory = ValueFactory::new();
        assert!(matches!(factory.float(10.0), Value::Float(f) if f == 10.0));
        assert!(matches!(factory.float(2000.0), Value::Float(f) if f == 2000.0));
        assert!(matches!(factory.float(10.5), Value::Float(f) if f == 10.5));
    }
}
