//! Identifier interning.
//!
//! Every name that appears in a script (variable, function, class, member) is registered
//! once and handed back a dense [`NameId`]. The bind phase resolves name *uses* against
//! name *declarations* purely by comparing [`NameId`]s, which is cheaper than string
//! comparison and lets the evaluator avoid touching the registry at all once binding is
//! done: a [`NameInfo`] carries its own text, so no lock is needed after registration.

use std::{
    rc::Rc,
    sync::{Mutex, atomic::{AtomicU32, Ordering}},
};

use ahash::AHashMap;

/// Dense integer handle for an interned identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NameId(u32);

impl NameId {
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A registered name: its dense id plus its interned text.
///
/// Cloning a `NameInfo` is a refcount bump on the text, not a registry lookup.
#[derive(Debug, Clone)]
pub struct NameInfo {
    id: NameId,
    text: Rc<str>,
}

impl NameInfo {
    #[must_use]
    pub fn id(&self) -> NameId {
        self.id
    }

    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }
}

impl PartialEq for NameInfo {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}
impl Eq for NameInfo {}

impl std::hash::Hash for NameInfo {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

/// Interns identifier text into dense ids.
///
/// Registration takes an internal lock so a [`NameRegistry`] can be shared between a
/// top-level script and any sub-scripts it spawns via `sys.execute`. Reads after
/// registration go through the [`NameInfo`] handle directly and never touch the lock.
#[derive(Debug, Default)]
pub struct NameRegistry {
    next_id: AtomicU32,
    table: Mutex<AHashMap<Rc<str>, NameId>>,
}

impl NameRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Interns `text`, returning the same [`NameInfo`] (by id) for equal text every time.
    pub fn register(&self, text: &str) -> NameInfo {
        let mut table = self.table.lock().expect("name registry lock poisoned");
        if let Some((text, id)) = table.get_key_value(text) {
            return NameInfo { id: *id, text: Rc::clone(text) };
        }
        let id = NameId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let text: Rc<str> = Rc::from(text);
        table.insert(Rc::clone(&text), id);
        NameInfo { id, text }
    }

    /// Interns a name built from an iterator of `char`s, e.g. a scanner's token span.
    pub fn register_chars(&self, chars: impl Iterator<Item = char>) -> NameInfo {
        let text: String = chars.collect();
        self.register(&text)
    }
}
