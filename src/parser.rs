//! Ties the components together: the `Parser<E>` struct carries every
//! piece of state the other modules' `impl` blocks operate on, the way
//! the original's `Parser<EmitterT>` class (and its nested `State`)
//! gathers declarator/expression/statement parsing into one object with
//! the work split across translation units.
//!
//! `declarator.rs`, `expr.rs` and `stmt.rs` each add an `impl<E: Emitter>
//! Parser<E>` block here rather than defining their own type.

use crate::diag::{DiagnosticTracker, SrcLoc};
use crate::emit::Emitter;
use crate::intern::Symbol;
use crate::scope::Scope;
use crate::token::{Token, TokenKind, TokenStream};
use crate::types::{Ty, TypeFactory};

/// What an identifier in scope is bound to (`spec.md` §4.3).
#[derive(Clone)]
pub enum Binding<E: Emitter> {
  Variable { ty: Ty, storage: StorageClass, place: VarPlace<E> },
  Function { ty: Ty, handle: E::Fn },
  Typedef { ty: Ty },
  EnumConstant { ty: Ty, value: i64 },
}

impl<E: Emitter> Clone for VarPlace<E> {
  fn clone(&self) -> Self {
    match self {
      VarPlace::Local(v) => VarPlace::Local(*v),
      VarPlace::Global(g) => VarPlace::Global(*g),
    }
  }
}

/// Where a variable's storage lives, so `expr.rs` knows whether a load
/// needs `emit_load` against a local alloca or is really a global handle.
pub enum VarPlace<E: Emitter> {
  Local(E::Value),
  Global(E::Global),
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum StorageClass {
  Auto,
  Static,
  Extern,
  Register,
  ThreadLocal,
  Typedef,
  Constexpr,
}

impl StorageClass {
  #[must_use]
  pub fn from_token(kind: TokenKind) -> Option<Self> {
    match kind {
      TokenKind::Auto => Some(Self::Auto),
      TokenKind::Static => Some(Self::Static),
      TokenKind::Extern => Some(Self::Extern),
      TokenKind::Register => Some(Self::Register),
      TokenKind::ThreadLocal => Some(Self::ThreadLocal),
      TokenKind::Typedef => Some(Self::Typedef),
      TokenKind::Constexpr => Some(Self::Constexpr),
      _ => None,
    }
  }
}

/// Per-function CFG-building state: unsealed blocks, pending control-flow
/// targets, and outstanding `return`s, unified when the function body
/// finishes (`spec.md` §4.8). Pushed/popped as nested function
/// definitions are entered (C does not nest functions, but the state is
/// still scoped this way so `stmt.rs` doesn't need a separate stack type).
pub struct FunctionState<E: Emitter> {
  pub current_fn: E::Fn,
  pub return_ty: Ty,
  /// The function's entry block, where every local's alloca is placed
  /// regardless of where in the CFG its declaration is lexically reached
  /// (standard alloca-in-entry backend convention; `spec.md` S1's "entry
  /// block with two allocas").
  pub entry_block: E::Block,
  pub current_block: E::Block,
  pub break_targets: Vec<E::Block>,
  pub continue_targets: Vec<E::Block>,
  pub labels: hashbrown::HashMap<Symbol, E::Block>,
  pub pending_gotos: Vec<(Symbol, E::Block, SrcLoc)>,
  pub switch_stack: Vec<SwitchState<E>>,
  /// Blocks created but not yet terminated, with the location that caused
  /// their creation (`spec.md` §4.8 unsealed-block tracking). At function
  /// end, each remaining entry either gets an implicit `return` (`void`
  /// functions) or diagnoses a missing return statement.
  pub unsealed_blocks: Vec<(E::Block, SrcLoc)>,
  /// `return` sites collected as the body is parsed, unified into a single
  /// `ret` (or a return-variable + join block, if there is more than one)
  /// once the function body is fully parsed (`spec.md` §4.8).
  pub outstanding_returns: Vec<(E::Block, Option<E::Value>)>,
}

pub struct SwitchState<E: Emitter> {
  pub value_ty: Ty,
  pub handle: E::Switch,
  pub has_default: bool,
  pub default_loc: Option<SrcLoc>,
  /// Case values seen so far, for the duplicate-case diagnostic (`spec.md`
  /// §8 S3): first occurrence's location, so the duplicate's note can point
  /// back at it.
  pub case_locs: hashbrown::HashMap<i64, SrcLoc>,
}

/// All parser state: the diagnostic tracker, the type table, the two
/// scoped symbol environments (ordinary identifiers and tag names), the
/// token look-ahead buffer, and (while inside a function body) the
/// current `FunctionState`.
pub struct Parser<E: Emitter> {
  pub diags: DiagnosticTracker,
  pub types: TypeFactory<E>,
  pub emitter: E,
  pub idents: Scope<Symbol, Binding<E>>,
  pub tags: Scope<Symbol, Ty>,
  tokens: Box<dyn TokenStream>,
  lookahead: [Token; 2],
  pub func: Option<FunctionState<E>>,
}

impl<E: Emitter> Parser<E> {
  pub fn new(source: impl Into<String>, target: crate::emit::TargetInfo, mut tokens: Box<dyn TokenStream>, mut emitter: E) -> Self {
    let types = TypeFactory::new(target, &mut emitter);
    let la0 = tokens.next_token();
    let la1 = tokens.next_token();
    Self {
      diags: DiagnosticTracker::new(source),
      types,
      emitter,
      idents: Scope::new(),
      tags: Scope::new(),
      tokens,
      lookahead: [la0, la1],
      func: None,
    }
  }

  #[must_use]
  pub fn peek(&self) -> &Token { &self.lookahead[0] }

  #[must_use]
  pub fn peek2(&self) -> &Token { &self.lookahead[1] }

  #[must_use]
  pub fn at(&self, kind: TokenKind) -> bool { self.peek().kind == kind }

  /// Consume and return the current lookahead token, pulling a fresh one
  /// in behind it.
  pub fn bump(&mut self) -> Token {
    let next = self.tokens.next_token();
    let consumed = std::mem::replace(&mut self.lookahead[0], std::mem::replace(&mut self.lookahead[1], next));
    consumed
  }

  /// Consume `kind` if present, reporting an error (and not advancing) if
  /// it is not there. Parsing always continues afterward (`spec.md` §7):
  /// the caller treats the current token as if it had matched.
  pub fn expect(&mut self, kind: TokenKind, what: &str) {
    if self.at(kind) {
      self.bump();
    } else {
      let loc = self.peek().loc;
      self.diags.error(loc, format!("expected {what}"));
    }
  }

  pub fn eat(&mut self, kind: TokenKind) -> bool {
    if self.at(kind) { self.bump(); true } else { false }
  }

  #[must_use]
  pub fn func_mut(&mut self) -> &mut FunctionState<E> {
    self.func.as_mut().expect("statement parsing outside of a function body")
  }
}
