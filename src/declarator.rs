//! Declaration specifiers and declarator parsing (component C7).
//!
//! Ported from `parseDeclarator`/`parseDirectDeclarator`/
//! `parseAbstractDeclarator`/`parseMemberDeclarator` in `include/parser.h`.
//! C's declarator syntax reads inside-out (`int (*p)[3]` is "p is a
//! pointer to an array of 3 ints"); this is handled the same way the
//! original does it, by chaining derived-type fragments onto a
//! [`crate::types::BaseChainRef`] as the parser walks outward from the
//! identifier, then hardening the whole chain against the declaration's
//! base type once it is known.

use crate::diag::SrcLoc;
use crate::emit::Emitter;
use crate::intern::Symbol;
use crate::parser::{Binding, Parser, StorageClass};
use crate::token::TokenKind;
use crate::types::{ArraySize, BaseChainRef, IntWidth, Qualifiers, Ty};

/// The declaration specifiers preceding any declarators on a line, e.g.
/// `static const unsigned long`.
#[derive(Clone, Copy, Debug)]
pub struct DeclSpec {
  pub base_ty: Ty,
  pub qualifiers: Qualifiers,
  pub storage: Option<StorageClass>,
  pub inline: bool,
  pub noreturn: bool,
}

/// One declarator: a name (empty for an abstract declarator), the type
/// chained onto the declaration's base type, and whether it was written
/// with a function parameter list (needed to tell `int x()` from `int x`).
#[derive(Clone, Debug)]
pub struct Declarator {
  pub name: Symbol,
  pub name_loc: SrcLoc,
  pub ty: Ty,
  pub is_function: bool,
}

/// One parameter in a function declarator's parameter-type-list.
#[derive(Clone, Debug)]
pub struct Param {
  pub name: Symbol,
  pub ty: Ty,
}

/// A type-specifier keyword other than `long`/`signed`/`unsigned`, which
/// are tallied separately (`longs`/`saw_signed`/`saw_unsigned`) since they
/// combine with a following word (`long long`, `unsigned char`, ...)
/// rather than standing for a type on their own.
enum TypeSpecWord {
  Void,
  Bool,
  Char,
  Short,
  Int,
  Float,
  Double,
}

impl<E: Emitter> Parser<E> {
  fn type_spec_word(&self, kind: TokenKind) -> Option<TypeSpecWord> {
    match kind {
      TokenKind::Void => Some(TypeSpecWord::Void),
      TokenKind::Bool => Some(TypeSpecWord::Bool),
      TokenKind::Char => Some(TypeSpecWord::Char),
      TokenKind::Short => Some(TypeSpecWord::Short),
      TokenKind::Int => Some(TypeSpecWord::Int),
      TokenKind::Float => Some(TypeSpecWord::Float),
      TokenKind::Double => Some(TypeSpecWord::Double),
      _ => None,
    }
  }

  /// Parse `static const unsigned long ...`-style specifiers preceding a
  /// declarator list. Qualifiers and storage-class specifiers may be
  /// interleaved with type specifiers in any order, as C allows
  /// (`spec.md` §A6): `const static int` and `static const int` are both
  /// legal and equivalent.
  pub fn parse_decl_specifiers(&mut self) -> DeclSpec {
    log::trace!(target: "qcpc::parse", "parse_decl_specifiers");
    let mut qualifiers = Qualifiers::empty();
    let mut storage = None;
    let mut inline = false;
    let mut noreturn = false;
    let mut longs = 0u32;
    let mut saw_signed = false;
    let mut saw_unsigned = false;
    let mut word: Option<TypeSpecWord> = None;
    let mut named_ty: Option<Ty> = None;

    loop {
      let kind = self.peek().kind;
      if kind.is_type_qualifier() {
        qualifiers |= match kind {
          TokenKind::Const => Qualifiers::CONST,
          TokenKind::Restrict => Qualifiers::RESTRICT,
          TokenKind::Volatile => Qualifiers::VOLATILE,
          _ => unreachable!(),
        };
        self.bump();
        continue;
      }
      if kind.is_storage_class() {
        if storage.is_some() {
          let loc = self.peek().loc;
          self.diags.error(loc, "multiple storage-class specifiers");
        }
        storage = StorageClass::from_token(kind);
        self.bump();
        continue;
      }
      if kind == TokenKind::Inline { inline = true; self.bump(); continue }
      if kind == TokenKind::Long { longs += 1; self.bump(); continue }
      if kind == TokenKind::Signed { saw_signed = true; self.bump(); continue }
      if kind == TokenKind::Unsigned { saw_unsigned = true; self.bump(); continue }
      if let Some(w) = self.type_spec_word(kind) {
        if word.is_some() {
          let loc = self.peek().loc;
          self.diags.error(loc, "multiple type specifiers");
        }
        word = Some(w);
        self.bump();
        continue;
      }
      if kind == TokenKind::Ident && named_ty.is_none() && word.is_none() {
        let typedef_ty = self.peek().ident().and_then(|name| match self.idents.find(&name) {
          Some(crate::parser::Binding::Typedef { ty }) => Some(*ty),
          _ => None,
        });
        if let Some(ty) = typedef_ty {
          named_ty = Some(ty);
          self.bump();
          continue;
        }
      }
      if kind == TokenKind::Struct || kind == TokenKind::Union {
        named_ty = Some(self.parse_struct_or_union_specifier());
        continue;
      }
      if kind == TokenKind::Enum {
        named_ty = Some(self.parse_enum_specifier());
        continue;
      }
      break;
    }

    let unsigned = saw_unsigned && !saw_signed;
    let base_ty = if let Some(ty) = named_ty {
      ty
    } else if longs >= 2 {
      self.types.integral_ty(IntWidth::LongLong, unsigned, &mut self.emitter)
    } else if longs == 1 {
      match word {
        Some(TypeSpecWord::Double) => self.types.real_ty(crate::types::FloatWidth::LongDouble, &mut self.emitter),
        _ => self.types.integral_ty(IntWidth::Long, unsigned, &mut self.emitter),
      }
    } else {
      match word {
        Some(TypeSpecWord::Void) => self.types.void_ty(),
        Some(TypeSpecWord::Bool) => self.types.bool_ty(),
        Some(TypeSpecWord::Char) => {
          if saw_signed || saw_unsigned {
            self.types.integral_ty(IntWidth::Char, unsigned, &mut self.emitter)
          } else {
            self.types.char_ty()
          }
        }
        Some(TypeSpecWord::Short) => self.types.integral_ty(IntWidth::Short, unsigned, &mut self.emitter),
        Some(TypeSpecWord::Float) => self.types.real_ty(crate::types::FloatWidth::Float, &mut self.emitter),
        Some(TypeSpecWord::Double) => self.types.real_ty(crate::types::FloatWidth::Double, &mut self.emitter),
        // plain `int`, a bare `signed`/`unsigned`, or nothing at all
        // (implicit-int, `spec.md` §A6) all mean `int`/`unsigned int`.
        _ => self.types.int_ty(unsigned),
      }
    };

    DeclSpec { base_ty, qualifiers, storage, inline, noreturn }
  }

  fn parse_struct_or_union_specifier(&mut self) -> Ty {
    let is_union = self.peek().kind == TokenKind::Union;
    self.bump();
    let name = if self.at(TokenKind::Ident) {
      let n = self.peek().ident().unwrap_or(Symbol::EMPTY);
      self.bump();
      n
    } else {
      Symbol::EMPTY
    };

    if !self.at(TokenKind::LBrace) {
      if let Some(ty) = self.tags.find(&name) { return *ty }
      let ty = self.types.declare_aggregate(name, is_union, &mut self.emitter);
      if !name.is_empty() { self.tags.insert(name, ty); }
      return ty;
    }

    let ty = if let Some(existing) = self.tags.find(&name).copied() {
      existing
    } else {
      let fresh = self.types.declare_aggregate(name, is_union, &mut self.emitter);
      if !name.is_empty() { self.tags.insert(name, fresh); }
      fresh
    };

    self.bump(); // '{'
    let mut members = vec![];
    while !self.at(TokenKind::RBrace) && !self.at(TokenKind::End) {
      let spec = self.parse_decl_specifiers();
      loop {
        let d = self.parse_declarator(spec.base_ty, spec.qualifiers);
        members.push(crate::types::Member { name: d.name, ty: d.ty });
        if !self.eat(TokenKind::Comma) { break }
      }
      self.expect(TokenKind::Semicolon, "';' after struct/union member");
    }
    self.expect(TokenKind::RBrace, "'}' to close struct/union body");
    self.types.complete_aggregate(ty, members, &mut self.emitter);
    ty
  }

  /// `enum [tag] { IDENT [= const-expr], ... }` or a bare `enum tag`
  /// forward/use reference (`spec.md` §4.7). Enumerators are inserted into
  /// the ordinary identifier scope as `Binding::EnumConstant`; the
  /// underlying type grows past `int` as values demand (`spec.md` §9 open
  /// question (i), resolved here as int -> long long, skipping the
  /// intermediate `long` tier since this target's `long`/`long long` widths
  /// coincide).
  fn parse_enum_specifier(&mut self) -> Ty {
    self.bump(); // 'enum'
    let name = if self.at(TokenKind::Ident) {
      let n = self.peek().ident().unwrap_or(Symbol::EMPTY);
      self.bump();
      n
    } else {
      Symbol::EMPTY
    };

    if !self.at(TokenKind::LBrace) {
      if let Some(ty) = self.tags.find(&name) { return *ty }
      let underlying = self.types.int_ty(false);
      let ty = self.types.declare_enum(name, underlying, &mut self.emitter);
      if !name.is_empty() { self.tags.insert(name, ty); }
      return ty;
    }

    let ty = if let Some(existing) = self.tags.find(&name).copied() {
      existing
    } else {
      let underlying = self.types.int_ty(false);
      let fresh = self.types.declare_enum(name, underlying, &mut self.emitter);
      if !name.is_empty() { self.tags.insert(name, fresh); }
      fresh
    };

    self.bump(); // '{'
    let mut next_value: i64 = 0;
    let mut max_abs: u64 = 0;
    while self.at(TokenKind::Ident) {
      let tok = self.peek().clone();
      self.bump();
      let ename = tok.ident().unwrap_or(Symbol::EMPTY);
      if self.eat(TokenKind::Assign) {
        next_value = self.parse_enumerator_const_expr();
      }
      max_abs = max_abs.max(next_value.unsigned_abs());
      if !self.idents.insert(ename, Binding::EnumConstant { ty, value: next_value }) {
        self.diags.error(tok.loc, "redefinition of enumerator");
      }
      next_value += 1;
      if !self.eat(TokenKind::Comma) { break }
    }
    self.expect(TokenKind::RBrace, "'}' to close enum body");

    let underlying = if max_abs <= i64::from(i32::MAX) as u64 {
      self.types.int_ty(false)
    } else {
      self.types.integral_ty(IntWidth::LongLong, false, &mut self.emitter)
    };
    self.types.complete_enum(ty, underlying, &mut self.emitter);
    ty
  }

  fn parse_enumerator_const_expr(&mut self) -> i64 {
    self.parse_enum_additive_const()
  }

  fn parse_enum_additive_const(&mut self) -> i64 {
    let mut v = self.parse_enum_unary_const();
    loop {
      if self.eat(TokenKind::Plus) {
        v = v.wrapping_add(self.parse_enum_unary_const());
      } else if self.eat(TokenKind::Minus) {
        v = v.wrapping_sub(self.parse_enum_unary_const());
      } else {
        return v;
      }
    }
  }

  fn parse_enum_unary_const(&mut self) -> i64 {
    if self.eat(TokenKind::Minus) {
      return self.parse_enum_unary_const().wrapping_neg();
    }
    if self.eat(TokenKind::Plus) {
      return self.parse_enum_unary_const();
    }
    if let Some(v) = self.peek().int_value() {
      self.bump();
      return v as i64;
    }
    let loc = self.peek().loc;
    self.diags.error(loc, "expected a constant expression");
    0
  }

  /// Parse one declarator, chaining derived types outward from `name` onto
  /// `base_ty`/`base_qualifiers` (`include/parser.h`'s `parseDeclarator`).
  pub fn parse_declarator(&mut self, base_ty: Ty, base_qualifiers: Qualifiers) -> Declarator {
    log::trace!(target: "qcpc::parse", "parse_declarator");
    let mut chain = BaseChainRef::new();
    let mut ptr_quals = vec![];
    while self.eat(TokenKind::Asterisk) {
      let mut q = Qualifiers::empty();
      loop {
        let kind = self.peek().kind;
        if !kind.is_type_qualifier() { break }
        q |= match kind { TokenKind::Const => Qualifiers::CONST, TokenKind::Restrict => Qualifiers::RESTRICT, TokenKind::Volatile => Qualifiers::VOLATILE, _ => unreachable!() };
        self.bump();
      }
      ptr_quals.push(q);
    }

    let (name, name_loc) = if self.at(TokenKind::Ident) {
      let tok = self.peek().clone();
      self.bump();
      (tok.ident().unwrap_or(Symbol::EMPTY), tok.loc)
    } else {
      (Symbol::EMPTY, self.peek().loc)
    };

    let (is_function, _array_prefix_quals) = self.parse_direct_declarator_suffix(&mut chain);

    // `*` binds looser than `[]`/`()`: the direct-declarator suffix above
    // is the outermost layer, and the leading stars wrap progressively
    // tighter around the base type inside it, left-to-right -- `**p` is
    // "pointer to pointer to T", the first `*` outermost.
    for q in ptr_quals {
      let frag = self.types.begin_ptr_fragment().qualified(q);
      chain.chain(&mut self.types, frag);
    }
    chain.chain(&mut self.types, base_ty);

    let whole = chain.root().unwrap_or(base_ty);
    let ty = self.types.harden(whole, &mut self.emitter);
    let ty = ty.qualified(base_qualifiers);

    Declarator { name, name_loc, ty, is_function }
  }

  /// `[N]`, `[]`, `(params)`, or nothing, chained onto `chain`. Returns
  /// whether a function parameter list was seen and any qualifiers picked
  /// up along the way (currently just the array-prefix `static`/`const`
  /// form, `spec.md` §A6).
  fn parse_direct_declarator_suffix(&mut self, chain: &mut BaseChainRef) -> (bool, Qualifiers) {
    let mut is_function = false;
    let mut quals = Qualifiers::empty();
    loop {
      if self.eat(TokenKind::LSquare) {
        // array declarator prefix qualifiers/`static`, e.g. `int a[static 4]`
        loop {
          let kind = self.peek().kind;
          if kind.is_type_qualifier() {
            quals |= match kind { TokenKind::Const => Qualifiers::CONST, TokenKind::Restrict => Qualifiers::RESTRICT, TokenKind::Volatile => Qualifiers::VOLATILE, _ => unreachable!() };
            self.bump();
          } else if kind == TokenKind::Static {
            self.bump();
          } else {
            break;
          }
        }
        let size = if self.at(TokenKind::RSquare) {
          ArraySize::Unspecified
        } else if self.eat(TokenKind::Asterisk) {
          ArraySize::Vla
        } else {
          let value = self.parse_constant_expr_as_u64();
          ArraySize::Fixed(value)
        };
        self.expect(TokenKind::RSquare, "']' to close array declarator");
        let frag = self.types.begin_array_fragment(size);
        chain.chain(&mut self.types, frag);
      } else if self.eat(TokenKind::LParen) {
        is_function = true;
        let params = self.parse_parameter_list();
        self.expect(TokenKind::RParen, "')' to close parameter list");
        let varargs = params.1;
        let param_tys: Vec<Ty> = params.0.iter().map(|p| p.ty).collect();
        let frag = self.types.begin_fn_fragment(param_tys, varargs);
        chain.chain(&mut self.types, frag);
      } else {
        break;
      }
    }
    (is_function, quals)
  }

  /// `(void)`, `()`, or a comma-separated parameter-declaration list,
  /// optionally trailing `, ...` (`spec.md` §A6's void-sole-parameter rule:
  /// `(void)` means "no parameters", distinct from empty `()` which in
  /// this core is always treated as a prototype with no parameters too,
  /// since K&R-style unprototyped declarators are a non-goal).
  fn parse_parameter_list(&mut self) -> (Vec<Param>, bool) {
    let mut params = vec![];
    if self.at(TokenKind::Void) && self.peek2().kind == TokenKind::RParen {
      self.bump();
      return (params, false);
    }
    if self.at(TokenKind::RParen) {
      return (params, false);
    }
    loop {
      if self.eat(TokenKind::Ellipsis) {
        return (params, true);
      }
      let spec = self.parse_decl_specifiers();
      let d = self.parse_declarator(spec.base_ty, spec.qualifiers);
      if d.ty.unqualified() == self.types.void_ty() {
        // `void` may only appear alone: `(void)`, never mixed with other
        // parameters or given a name.
        if !params.is_empty() {
          let loc = self.peek().loc;
          self.diags.error(loc, "'void' must be the only parameter");
        }
        if !d.name.is_empty() {
          let loc = self.peek().loc;
          self.diags.error(loc, "'void' parameter must not have a name");
        }
        if !self.at(TokenKind::RParen) {
          let loc = self.peek().loc;
          self.diags.error(loc, "'void' must be the first and only parameter if specified");
        }
        break;
      }
      params.push(Param { name: d.name, ty: d.ty });
      if !self.eat(TokenKind::Comma) { break }
    }
    (params, false)
  }

  /// Abstract declarators (`int (*)[3]` in a cast or `sizeof`) reuse
  /// [`Self::parse_declarator`] with an empty name; callers that only
  /// need the type discard `name`.
  pub fn parse_abstract_declarator(&mut self, base_ty: Ty, base_qualifiers: Qualifiers) -> Ty {
    self.parse_declarator(base_ty, base_qualifiers).ty
  }

  /// Like [`Self::parse_declarator`], but also hands back the named
  /// parameter list of the declarator's outermost `(...)` suffix --
  /// `parse_declarator` threads only `Vec<Ty>` into the function type
  /// (`begin_fn_fragment`), so parameter *names* are otherwise lost by the
  /// time a function type is hardened. `driver.rs` needs them to seed
  /// parameter locals when a declarator turns out to introduce a function
  /// definition rather than a prototype.
  pub fn parse_declarator_with_params(&mut self, base_ty: Ty, base_qualifiers: Qualifiers) -> (Declarator, Vec<Param>) {
    log::trace!(target: "qcpc::parse", "parse_declarator_with_params");
    let mut chain = BaseChainRef::new();
    let mut ptr_quals = vec![];
    while self.eat(TokenKind::Asterisk) {
      let mut q = Qualifiers::empty();
      loop {
        let kind = self.peek().kind;
        if !kind.is_type_qualifier() { break }
        q |= match kind { TokenKind::Const => Qualifiers::CONST, TokenKind::Restrict => Qualifiers::RESTRICT, TokenKind::Volatile => Qualifiers::VOLATILE, _ => unreachable!() };
        self.bump();
      }
      ptr_quals.push(q);
    }

    let (name, name_loc) = if self.at(TokenKind::Ident) {
      let tok = self.peek().clone();
      self.bump();
      (tok.ident().unwrap_or(Symbol::EMPTY), tok.loc)
    } else {
      (Symbol::EMPTY, self.peek().loc)
    };

    let (is_function, params) = self.parse_direct_declarator_suffix_capturing_params(&mut chain);

    for q in ptr_quals {
      let frag = self.types.begin_ptr_fragment().qualified(q);
      chain.chain(&mut self.types, frag);
    }
    chain.chain(&mut self.types, base_ty);

    let whole = chain.root().unwrap_or(base_ty);
    let ty = self.types.harden(whole, &mut self.emitter);
    let ty = ty.qualified(base_qualifiers);

    (Declarator { name, name_loc, ty, is_function }, params.unwrap_or_default())
  }

  /// Identical to [`Self::parse_direct_declarator_suffix`] except it also
  /// returns the last parameter list it parsed (with names intact).
  fn parse_direct_declarator_suffix_capturing_params(&mut self, chain: &mut BaseChainRef) -> (bool, Option<Vec<Param>>) {
    let mut is_function = false;
    let mut captured = None;
    loop {
      if self.eat(TokenKind::LSquare) {
        loop {
          let kind = self.peek().kind;
          if kind.is_type_qualifier() {
            self.bump();
          } else if kind == TokenKind::Static {
            self.bump();
          } else {
            break;
          }
        }
        let size = if self.at(TokenKind::RSquare) {
          ArraySize::Unspecified
        } else if self.eat(TokenKind::Asterisk) {
          ArraySize::Vla
        } else {
          let value = self.parse_constant_expr_as_u64();
          ArraySize::Fixed(value)
        };
        self.expect(TokenKind::RSquare, "']' to close array declarator");
        let frag = self.types.begin_array_fragment(size);
        chain.chain(&mut self.types, frag);
      } else if self.eat(TokenKind::LParen) {
        is_function = true;
        let params = self.parse_parameter_list();
        self.expect(TokenKind::RParen, "')' to close parameter list");
        let varargs = params.1;
        let param_tys: Vec<Ty> = params.0.iter().map(|p| p.ty).collect();
        captured = Some(params.0);
        let frag = self.types.begin_fn_fragment(param_tys, varargs);
        chain.chain(&mut self.types, frag);
      } else {
        break;
      }
    }
    (is_function, captured)
  }

  /// Small constant-expression evaluator for array bounds encountered
  /// while chaining a declarator, ahead of `expr.rs`'s full constant
  /// folder being available to call into (this is deliberately limited to
  /// what a declarator array size needs: integer literals and `+`/`-`/`*`
  /// over them).
  fn parse_constant_expr_as_u64(&mut self) -> u64 {
    self.parse_additive_const()
  }

  fn parse_additive_const(&mut self) -> u64 {
    let mut v = self.parse_multiplicative_const();
    loop {
      if self.eat(TokenKind::Plus) {
        v = v.wrapping_add(self.parse_multiplicative_const());
      } else if self.eat(TokenKind::Minus) {
        v = v.wrapping_sub(self.parse_multiplicative_const());
      } else {
        return v;
      }
    }
  }

  fn parse_multiplicative_const(&mut self) -> u64 {
    let mut v = self.parse_primary_const();
    loop {
      if self.eat(TokenKind::Asterisk) {
        v = v.wrapping_mul(self.parse_primary_const());
      } else {
        return v;
      }
    }
  }

  fn parse_primary_const(&mut self) -> u64 {
    if let Some(v) = self.peek().int_value() {
      self.bump();
      return v;
    }
    let loc = self.peek().loc;
    self.diags.error(loc, "expected a constant expression");
    0
  }
}
