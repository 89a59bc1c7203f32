//! Scoped symbol environment (component C3).
//!
//! Ported from `include/scope.h`: a generation-stamped stack of name maps,
//! not a stack of maps. Each key maps to a vector of `(level, generation,
//! value)` entries pushed in declaration order; re-entering a scope level
//! (e.g. a second `for` loop body at the same nesting depth) bumps that
//! level's generation counter, which makes every previously-visible entry
//! at that level invisible without having to walk and remove them.

use hashbrown::HashMap;
use std::hash::Hash;

struct Entry<V> {
  level: u32,
  generation: u32,
  value: V,
}

/// A generation-stamped stack of name -> value maps, parameterized over the
/// key type `K` and the value type `V`. Two scopes are maintained by the
/// parser: one for ordinary identifiers, one for tag names (`spec.md` §4.3).
pub struct Scope<K, V> {
  level: u32,
  generations: Vec<u32>,
  symbols: HashMap<K, Vec<Entry<V>>>,
}

impl<K, V> Default for Scope<K, V> {
  fn default() -> Self { Self { level: 0, generations: vec![0], symbols: HashMap::new() } }
}

impl<K: Eq + Hash + Clone, V> Scope<K, V> {
  #[must_use]
  pub fn new() -> Self { Self::default() }

  #[must_use]
  pub fn level(&self) -> u32 { self.level }

  /// Enter a new nesting level, giving it a fresh generation number (the
  /// first time a level is reached) or bumping its generation (on
  /// re-entry, e.g. a `for` body visited a second time).
  pub fn enter(&mut self) {
    self.level += 1;
    let level = self.level as usize;
    if self.generations.len() <= level {
      self.generations.push(0);
    } else {
      self.generations[level] += 1;
    }
  }

  /// Leave the current nesting level. Panics if called at the root scope,
  /// matching the original's `assert(level_ > 0)`.
  pub fn leave(&mut self) {
    assert!(self.level > 0, "cannot leave root scope");
    self.level -= 1;
  }

  /// Enter a scope and return a guard that leaves it on drop — the RAII
  /// discipline `spec.md` §5 requires around function bodies, compound
  /// statements, `for`-init clauses, and parameter lists.
  pub fn enter_guard(&mut self) -> ScopeGuard<'_, K, V> {
    self.enter();
    ScopeGuard { scope: self }
  }

  /// The entry for `name` visible from the current level, walking back
  /// through its declaration history for the first one whose own level is
  /// at or above us on the current path (`entry.level <= self.level`) and
  /// whose generation is still the one active for *that* level — not
  /// `self.level`'s, which is what made a declared-then-left block-local
  /// leak into (or hide a binding in) an unrelated sibling or parent scope.
  fn visible_entry(&self, name: &K) -> Option<&Entry<V>> {
    let entries = self.symbols.get(name)?;
    entries.iter().rev().find(|e| e.level <= self.level && e.generation == self.generations[e.level as usize])
  }

  /// The deepest currently-visible entry for `name`, or `None` if it is
  /// absent or shadowed by a stale entry from a sibling scope.
  #[must_use]
  pub fn find(&self, name: &K) -> Option<&V> {
    self.visible_entry(name).map(|e| &e.value)
  }

  /// Whether `name` can be freshly inserted at the current level/generation
  /// (i.e. no entry for it already exists there). An entry inherited from
  /// an enclosing level is fine to shadow; only a live entry at exactly
  /// `self.level` blocks the insert.
  #[must_use]
  pub fn can_insert(&self, name: &K) -> bool {
    !matches!(self.visible_entry(name), Some(e) if e.level == self.level)
  }

  /// Insert `value` for `name` at the current level/generation. Returns
  /// `false` (without modifying anything) if an entry already exists there
  /// — the caller should report a redefinition.
  pub fn insert(&mut self, name: K, value: V) -> bool {
    if !self.can_insert(&name) { return false }
    self.symbols.entry(name).or_default().push(Entry { level: self.level, generation: self.generations[self.level as usize], value });
    true
  }
}

/// RAII guard returned by [`Scope::enter_guard`]; leaves the scope when
/// dropped, including on an early return or `?`-propagated error out of the
/// guarded block.
pub struct ScopeGuard<'a, K, V> {
  scope: &'a mut Scope<K, V>,
}

impl<K: Eq + Hash + Clone, V> Drop for ScopeGuard<'_, K, V> {
  fn drop(&mut self) { self.scope.leave() }
}

impl<K: Eq + Hash + Clone, V> std::ops::Deref for ScopeGuard<'_, K, V> {
  type Target = Scope<K, V>;
  fn deref(&self) -> &Scope<K, V> { self.scope }
}

impl<K: Eq + Hash + Clone, V> std::ops::DerefMut for ScopeGuard<'_, K, V> {
  fn deref_mut(&mut self) -> &mut Scope<K, V> { self.scope }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn reentry_hides_previous_generation() {
    let mut s: Scope<&str, i32> = Scope::new();
    s.enter();
    assert!(s.insert("i", 1));
    assert_eq!(s.find(&"i"), Some(&1));
    s.leave();

    s.enter(); // re-enter same level: fresh generation
    assert_eq!(s.find(&"i"), None, "stale sibling entry must not be visible");
    assert!(s.insert("i", 2));
    assert_eq!(s.find(&"i"), Some(&2));
    s.leave();
  }

  #[test]
  fn duplicate_insert_fails() {
    let mut s: Scope<&str, i32> = Scope::new();
    s.enter();
    assert!(s.insert("x", 1));
    assert!(!s.insert("x", 2));
    assert_eq!(s.find(&"x"), Some(&1));
    s.leave();
  }

  #[test]
  fn guard_leaves_on_drop() {
    let mut s: Scope<&str, i32> = Scope::new();
    assert_eq!(s.level(), 0);
    {
      let mut g = s.enter_guard();
      assert_eq!(g.level(), 1);
      g.insert("x", 1);
    }
    assert_eq!(s.level(), 0);
  }

  #[test]
  #[should_panic]
  fn leave_root_panics() {
    let mut s: Scope<&str, i32> = Scope::new();
    s.leave();
  }

  #[test]
  fn a_nested_blocks_declaration_does_not_leak_into_the_parent() {
    // { if (1) { int z; } z = 1; }
    let mut s: Scope<&str, i32> = Scope::new();
    s.enter(); // function body
    s.enter(); // then-block
    assert!(s.insert("z", 1));
    s.leave();
    assert_eq!(s.find(&"z"), None, "z is local to the then-block");
    s.leave();
  }

  #[test]
  fn sibling_blocks_at_the_same_depth_do_not_see_each_other() {
    // { if (1) { int x; } if (1) { x; } }
    let mut s: Scope<&str, i32> = Scope::new();
    s.enter(); // function body
    s.enter(); // first if-block
    assert!(s.insert("x", 1));
    s.leave();
    s.enter(); // second if-block, same depth: fresh generation
    assert_eq!(s.find(&"x"), None, "the first if-block's x must not be visible in the second");
    s.leave();
    s.leave();
  }

  #[test]
  fn sibling_block_does_not_hide_an_outer_variable() {
    // { int x; if (1) { int y; } x; }
    let mut s: Scope<&str, i32> = Scope::new();
    s.enter(); // function body
    assert!(s.insert("x", 1));
    s.enter(); // if-block
    assert!(s.insert("y", 2));
    s.leave();
    assert_eq!(s.find(&"x"), Some(&1), "an outer variable must stay visible after a sibling block bumps its own generation");
    s.leave();
  }

  #[test]
  fn a_nested_block_can_shadow_an_outer_declaration() {
    // { int x; { int x; } }
    let mut s: Scope<&str, i32> = Scope::new();
    s.enter(); // function body
    assert!(s.insert("x", 1));
    s.enter(); // nested block
    assert!(s.insert("x", 2), "shadowing in a nested scope is not a redefinition");
    assert_eq!(s.find(&"x"), Some(&2));
    s.leave();
    assert_eq!(s.find(&"x"), Some(&1), "leaving the nested block restores the outer x");
    s.leave();
  }
}
