//! String interner (component C1).
//!
//! Identifiers are interned to a small integer [`Symbol`] so that later
//! comparisons and hash-map lookups are integer operations rather than byte
//! comparisons. `Symbol(0)` is reserved for the empty identifier ("absent").
//!
//! The interner is process-wide and append-only, matching `spec.md` §4.1.
//! It is not synchronized: callers are assumed single-threaded (`spec.md`
//! §5); a multi-threaded embedder is expected to either confine interning to
//! one thread or swap this module for a thread-local/`Mutex`-guarded variant.

use hashbrown::HashMap;
use std::cell::RefCell;

/// An interned identifier. Equality is integer equality.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Symbol(u32);

impl Symbol {
  /// The empty identifier, used as an "absent name" sentinel.
  pub const EMPTY: Symbol = Symbol(0);

  #[must_use]
  pub fn is_empty(self) -> bool { self == Symbol::EMPTY }

  #[must_use]
  pub fn as_str(self) -> String { with_interner(|i| i.resolve(self).to_owned()) }
}

impl std::fmt::Debug for Symbol {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "Symbol({:?})", self.as_str())
  }
}

impl std::fmt::Display for Symbol {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.as_str())
  }
}

/// The backing table for [`Symbol`]. Normally accessed through the free
/// functions [`intern`] and [`resolve`], which operate on a thread-local
/// instance; exposed directly for embedders that want an isolated table
/// (e.g. one per compilation thread, per `spec.md` §5).
#[derive(Default)]
pub struct Interner {
  strings: Vec<Box<str>>,
  map: HashMap<Box<str>, Symbol>,
}

impl Interner {
  #[must_use]
  pub fn new() -> Self {
    let mut this = Self::default();
    this.intern("");
    this
  }

  pub fn intern(&mut self, s: &str) -> Symbol {
    if let Some(&sym) = self.map.get(s) { return sym }
    let id = Symbol(u32::try_from(self.strings.len()).expect("too many interned identifiers"));
    let boxed: Box<str> = s.into();
    self.strings.push(boxed.clone());
    self.map.insert(boxed, id);
    id
  }

  #[must_use]
  pub fn resolve(&self, sym: Symbol) -> &str { &self.strings[sym.0 as usize] }
}

thread_local! {
  static INTERNER: RefCell<Interner> = RefCell::new(Interner::new());
}

fn with_interner<R>(f: impl FnOnce(&Interner) -> R) -> R {
  INTERNER.with(|i| f(&i.borrow()))
}

/// Intern `s` in the thread-local table, returning its [`Symbol`].
pub fn intern(s: &str) -> Symbol {
  INTERNER.with(|i| i.borrow_mut().intern(s))
}

/// Resolve a [`Symbol`] back to its original bytes.
#[must_use]
pub fn resolve(sym: Symbol) -> String { with_interner(|i| i.resolve(sym).to_owned()) }

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn empty_is_zero() {
    assert_eq!(Symbol::EMPTY, intern(""));
    assert!(Symbol::EMPTY.is_empty());
  }

  #[test]
  fn same_bytes_same_symbol() {
    let a = intern("foo");
    let b = intern("foo");
    assert_eq!(a, b);
    let c = intern("bar");
    assert_ne!(a, c);
  }

  #[test]
  fn resolve_roundtrips() {
    let s = intern("hello_world");
    assert_eq!(resolve(s), "hello_world");
  }
}
