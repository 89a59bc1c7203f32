//! The token input contract (external interface, `spec.md` §6).
//!
//! The lexical tokenizer is a separate module/crate; its only obligation to
//! this core is to produce a stream of [`Token`]s carrying a [`TokenKind`], a
//! [`SrcLoc`], and (where applicable) a payload. This module defines that
//! contract type, ported from `include/token.h`, so the parser has something
//! concrete to consume; it does not implement a lexer.

use crate::diag::SrcLoc;
use crate::intern::Symbol;

/// Tags a [`Token`]. Ordered the way the original `TokenType` enum is
/// ordered, because the expression/declarator parsers rely on contiguous
/// ranges (e.g. "is this an assignment operator") the way `op::getBinOpKind`
/// does in `include/operator.h`.
#[derive(Clone, Copy, PartialEq, Eq, Debug, PartialOrd, Ord)]
pub enum TokenKind {
  Unknown,

  Ident,

  IConst,
  UIConst,
  LIConst,
  ULIConst,
  LLIConst,
  ULLIConst,

  FConst,
  DConst,
  LdConst,
  Literal,

  // punctuators, grouped so the binary-operator range below is contiguous
  LSquare,
  RSquare,
  LParen,
  RParen,
  LBrace,
  RBrace,
  Period,
  Arrow,
  Inc,
  Dec,

  // binary-operator-capable punctuators: this range must stay contiguous
  // and ordered the same as `op::Kind`'s MUL..COMMA range (see `expr.rs`).
  Asterisk,
  Slash,
  Percent,
  Plus,
  Minus,
  Shl,
  Shr,
  Lt,
  Gt,
  Le,
  Ge,
  Eq,
  Ne,
  Amp,
  Caret,
  Pipe,
  AmpAmp,
  PipePipe,
  Question,
  Assign,
  MulAssign,
  DivAssign,
  ModAssign,
  AddAssign,
  SubAssign,
  ShlAssign,
  ShrAssign,
  AndAssign,
  XorAssign,
  OrAssign,
  Comma,

  BwNot,
  LNot,
  Colon,
  Semicolon,
  Ellipsis,

  // keywords
  Alignas,
  Alignof,
  Auto,
  Bool,
  Break,
  Case,
  Char,
  Const,
  Constexpr,
  Continue,
  Default,
  Do,
  Double,
  Else,
  Enum,
  Extern,
  Float,
  For,
  Goto,
  If,
  Inline,
  Int,
  Long,
  Nullptr,
  Register,
  Restrict,
  Return,
  Short,
  Signed,
  Sizeof,
  Static,
  StaticAssert,
  Struct,
  Switch,
  ThreadLocal,
  Typedef,
  Typeof,
  TypeofUnqual,
  Union,
  Unsigned,
  Void,
  Volatile,
  While,
  Decimal32,
  Decimal64,
  Decimal128,

  /// `# N "file"` line-marker sub-sequence start; absorbed by the driver.
  PpStart,
  PpEnd,

  End,
}

impl TokenKind {
  /// Whether this token kind can introduce a binary operator, i.e. lies in
  /// the contiguous `Asterisk..=Comma` range (mirrors
  /// `tk >= token::Kind::ASTERISK && tk <= token::Kind::COMMA`).
  #[must_use]
  pub fn is_binop_start(self) -> bool { (TokenKind::Asterisk..=TokenKind::Comma).contains(&self) }

  #[must_use]
  pub fn is_type_qualifier(self) -> bool {
    matches!(self, TokenKind::Const | TokenKind::Restrict | TokenKind::Volatile)
  }

  #[must_use]
  pub fn is_storage_class(self) -> bool {
    matches!(
      self,
      TokenKind::Auto
        | TokenKind::Constexpr
        | TokenKind::Extern
        | TokenKind::Register
        | TokenKind::Static
        | TokenKind::ThreadLocal
        | TokenKind::Typedef
    )
  }
}

/// The payload carried by a token, if any.
#[derive(Clone, Debug)]
pub enum TokenValue {
  None,
  Ident(Symbol),
  Int(u64),
  Float(f64),
  Str(Vec<u8>),
}

/// One lexeme: a kind, a source span, and an optional payload. Tokens are
/// consumed by the parser as it goes; it never retains more than the
/// look-ahead of 2 described in `spec.md` §6.
#[derive(Clone, Debug)]
pub struct Token {
  pub kind: TokenKind,
  pub loc: SrcLoc,
  pub value: TokenValue,
}

impl Token {
  #[must_use]
  pub fn new(kind: TokenKind, loc: SrcLoc) -> Self { Self { kind, loc, value: TokenValue::None } }

  #[must_use]
  pub fn with_ident(loc: SrcLoc, sym: Symbol) -> Self { Self { kind: TokenKind::Ident, loc, value: TokenValue::Ident(sym) } }

  #[must_use]
  pub fn with_int(kind: TokenKind, loc: SrcLoc, v: u64) -> Self { Self { kind, loc, value: TokenValue::Int(v) } }

  #[must_use]
  pub fn with_float(kind: TokenKind, loc: SrcLoc, v: f64) -> Self { Self { kind, loc, value: TokenValue::Float(v) } }

  #[must_use]
  pub fn ident(&self) -> Option<Symbol> {
    match self.value { TokenValue::Ident(s) => Some(s), _ => None }
  }

  #[must_use]
  pub fn int_value(&self) -> Option<u64> {
    match self.value { TokenValue::Int(v) => Some(v), _ => None }
  }

  #[must_use]
  pub fn float_value(&self) -> Option<f64> {
    match self.value { TokenValue::Float(v) => Some(v), _ => None }
  }

  /// Whether this token is a constant-literal token (`ICONST..=LDCONST` in
  /// the original, used by `Type::fromConstToken`).
  #[must_use]
  pub fn is_const_literal(&self) -> bool {
    matches!(
      self.kind,
      TokenKind::IConst
        | TokenKind::UIConst
        | TokenKind::LIConst
        | TokenKind::ULIConst
        | TokenKind::LLIConst
        | TokenKind::ULLIConst
        | TokenKind::FConst
        | TokenKind::DConst
        | TokenKind::LdConst
    )
  }
}

/// The contract the (out-of-scope) tokenizer fulfills towards this core:
/// a pull source of tokens, with `PpStart`/`PpEnd`-bracketed line-marker
/// sub-sequences interleaved for the driver to absorb (`spec.md` §6).
/// Preprocessing itself is not this crate's concern; only this interface
/// to its output is.
pub trait TokenStream {
  /// Produce the next token. Must return an infinite trailer of
  /// `TokenKind::End` once the underlying source is exhausted, so callers
  /// never need to special-case "ran out of tokens".
  fn next_token(&mut self) -> Token;
}
