//! Top-level driver (component C9).
//!
//! Ported from the top-level parse loop in `include/parser.h`
//! (`parseTranslationUnit`/`parseExternalDeclaration`). Unlike
//! `stmt.rs`/`expr.rs`, this is not an `impl Parser<E>` block of
//! recursive-descent methods reused elsewhere; it is the one entry point a
//! caller holding a freshly-constructed [`Parser`] invokes once per
//! translation unit.

use crate::declarator::{Declarator, Param};
use crate::diag::SrcLoc;
use crate::emit::{BinOp, Emitter};
use crate::intern::Symbol;
use crate::parser::{Binding, FunctionState, Parser, StorageClass, VarPlace};
use crate::token::TokenKind;
use crate::types::{ArraySize, Ty, TypeKind};

/// Bookkeeping for one file-scope variable across the whole translation
/// unit, replacing `spec.md` §4.9's separate "extern" and "missing default
/// init" lists with a single map filtered at finalization time: an `extern`
/// declaration is just an entry with `extern_only` set, and a defining
/// declaration is just an entry with `defined` set, so supersession is one
/// map update rather than moving an entry between two collections.
struct GlobalEntry<E: Emitter> {
  ty: Ty,
  global: E::Global,
  loc: SrcLoc,
  defined: bool,
  extern_only: bool,
}

/// Parses one translation unit to completion: every top-level declaration
/// or function definition, then the end-of-TU finalization pass
/// (`spec.md` §4.9).
pub fn parse_translation_unit<E: Emitter>(p: &mut Parser<E>) {
  let mut globals: hashbrown::HashMap<Symbol, GlobalEntry<E>> = hashbrown::HashMap::new();
  loop {
    absorb_line_markers(p);
    if p.at(TokenKind::End) {
      break;
    }
    if p.eat(TokenKind::Semicolon) {
      // a stray top-level `;`, harmless
      continue;
    }
    log::trace!(target: "qcpc::parse", "parse_top_level_decl");
    parse_top_level_decl(p, &mut globals);
    log::trace!(target: "qcpc::parse", "parse_top_level_decl done");
  }
  finalize_translation_unit(p, globals);
}

/// `# N "file"` line markers are a bracketed `PpStart ... PpEnd`
/// subsequence (`spec.md` §6); this core does no diagnostic line
/// remapping, so they are pure no-ops to absorb.
fn absorb_line_markers<E: Emitter>(p: &mut Parser<E>) {
  while p.eat(TokenKind::PpStart) {
    while !p.at(TokenKind::PpEnd) && !p.at(TokenKind::End) {
      p.bump();
    }
    p.eat(TokenKind::PpEnd);
  }
}

fn parse_top_level_decl<E: Emitter>(p: &mut Parser<E>, globals: &mut hashbrown::HashMap<Symbol, GlobalEntry<E>>) {
  let spec = p.parse_decl_specifiers();
  if p.eat(TokenKind::Semicolon) {
    // a bare `struct foo { ... };`/`enum bar { ... };`/`union baz;` with no
    // declarator at all
    p.types.clear_fragments();
    return;
  }

  loop {
    let (d, params) = p.parse_declarator_with_params(spec.base_ty, spec.qualifiers);

    if spec.storage == Some(StorageClass::Typedef) {
      if !p.idents.insert(d.name, Binding::Typedef { ty: d.ty }) {
        p.diags.error(d.name_loc, "redefinition of typedef");
      }
      if !p.eat(TokenKind::Comma) {
        break;
      }
      continue;
    }

    if d.is_function && p.at(TokenKind::LBrace) {
      parse_function_definition(p, &d, &params, spec.inline, spec.noreturn);
      p.types.clear_fragments();
      return;
    }

    declare_top_level_name(p, &d, spec.storage, globals);
    if !p.eat(TokenKind::Comma) {
      break;
    }
  }
  p.expect(TokenKind::Semicolon, "';' after declaration");
  p.types.clear_fragments();
}

fn declare_top_level_name<E: Emitter>(
  p: &mut Parser<E>,
  d: &Declarator,
  storage: Option<StorageClass>,
  globals: &mut hashbrown::HashMap<Symbol, GlobalEntry<E>>,
) {
  if matches!(p.types.kind(d.ty), TypeKind::Fn { .. }) {
    declare_top_level_function_proto(p, d);
    return;
  }

  let is_extern = storage == Some(StorageClass::Extern);
  let ty_ir = p.types.emitted(d.ty);
  let name_str = d.name.as_str();

  let global = match p.idents.find(&d.name).cloned() {
    Some(Binding::Variable { place: VarPlace::Global(g), .. }) => g,
    Some(_) => {
      p.diags.error(d.name_loc, "redefinition of a different kind of symbol");
      return;
    }
    None => {
      let g = p.emitter.emit_global_var(ty_ir, &name_str);
      p.idents.insert(d.name, Binding::Variable { ty: d.ty, storage: storage.unwrap_or(StorageClass::Extern), place: VarPlace::Global(g) });
      g
    }
  };

  if p.eat(TokenKind::Assign) {
    let init_loc = d.name_loc;
    let init = parse_global_initializer(p, d.ty, init_loc);
    p.emitter.set_init_value_global_var(global, init);
    if let Some(prev) = globals.get(&d.name) {
      if prev.defined {
        p.diags.error(d.name_loc, "redefinition of global variable");
        p.diags.note(prev.loc, "previous definition here");
      }
    }
    globals.insert(d.name, GlobalEntry { ty: d.ty, global, loc: d.name_loc, defined: true, extern_only: false });
    return;
  }

  // Tentative (or extern) declaration without an initializer: supersedes
  // nothing, is superseded by nothing, just records that this name exists
  // and (if not `extern`) still needs a zero initializer unless a later
  // declaration defines it (`spec.md` §8 boundary behavior). A later
  // non-`extern` redeclaration of an `extern`-only name widens it to a
  // tentative definition, matching how C treats repeated file-scope
  // declarations of the same object.
  match globals.get_mut(&d.name) {
    Some(existing) => {
      if !is_extern {
        existing.extern_only = false;
      }
    }
    None => {
      globals.insert(d.name, GlobalEntry { ty: d.ty, global, loc: d.name_loc, defined: false, extern_only: is_extern });
    }
  }
}

fn declare_top_level_function_proto<E: Emitter>(p: &mut Parser<E>, d: &Declarator) {
  let ty_ir = p.types.emitted(d.ty);
  let name_str = d.name.as_str();
  match p.idents.find(&d.name).cloned() {
    Some(Binding::Function { .. }) => {
      // repeated prototype: legal, nothing further to do
    }
    Some(_) => p.diags.error(d.name_loc, "redefinition of a different kind of symbol"),
    None => {
      let handle = p.emitter.emit_fn_proto(ty_ir, false, false, &name_str);
      p.idents.insert(d.name, Binding::Function { ty: d.ty, handle });
    }
  }
}

fn parse_function_definition<E: Emitter>(p: &mut Parser<E>, d: &Declarator, params: &[Param], inline: bool, noreturn: bool) {
  log::trace!(target: "qcpc::parse", "parse_function_definition {}", d.name.as_str());
  let ty_ir = p.types.emitted(d.ty);
  let name_str = d.name.as_str();

  let handle = match p.idents.find(&d.name).cloned() {
    Some(Binding::Function { handle, .. }) => handle,
    Some(_) => {
      p.diags.error(d.name_loc, "redefinition of a different kind of symbol");
      p.emitter.emit_fn_proto(ty_ir, inline, noreturn, &name_str)
    }
    None => {
      let h = p.emitter.emit_fn_proto(ty_ir, inline, noreturn, &name_str);
      p.idents.insert(d.name, Binding::Function { ty: d.ty, handle: h });
      h
    }
  };

  let return_ty = match p.types.kind(d.ty) {
    TypeKind::Fn { ret, .. } => *ret,
    _ => unreachable!("function definition declarator must carry a function type"),
  };

  let entry = p.emitter.emit_fn(handle);
  p.func = Some(FunctionState {
    current_fn: handle,
    return_ty,
    entry_block: entry,
    current_block: entry,
    break_targets: vec![],
    continue_targets: vec![],
    labels: hashbrown::HashMap::new(),
    pending_gotos: vec![],
    switch_stack: vec![],
    unsealed_blocks: vec![(entry, d.name_loc)],
    outstanding_returns: vec![],
  });

  p.idents.enter();
  p.tags.enter();
  for (index, param) in params.iter().enumerate() {
    let param_ir = p.types.emitted(param.ty);
    let incoming = p.emitter.get_param(handle, index);
    let name_str = param.name.as_str();
    let local = p.emitter.emit_local_var(handle, entry, param_ir, &name_str);
    p.emitter.emit_store(entry, param_ir, incoming, local);
    if !param.name.is_empty() {
      p.idents.insert(param.name, Binding::Variable { ty: param.ty, storage: StorageClass::Auto, place: VarPlace::Local(local) });
    }
  }

  p.parse_compound_stmt();
  p.finish_function_body();

  // A stray `}` right after the body's closing brace is common enough
  // after a miscounted nested block to warrant its own diagnostic instead
  // of falling through to "expected declaration" at the top level.
  while p.at(TokenKind::RBrace) {
    let loc = p.peek().loc;
    p.diags.error(loc, "extraneous closing brace ('}')");
    p.bump();
  }

  p.tags.leave();
  p.idents.leave();
  p.func = None;
}

/// Narrow constant-expression evaluator for scalar global initializers: the
/// same literals-plus-`+`/`-`/unary grammar `stmt.rs`'s `case`-label
/// evaluator uses, widened to fold directly into `E::Const` at the
/// declared type rather than an `i64` -- a `case` label is always `int`,
/// but a global's initializer type is whatever was declared. Full
/// initializer lists (`{1,2,3}`) are a non-goal (`spec.md` §1); a `{` here
/// diagnoses instead of being parsed.
fn parse_global_initializer<E: Emitter>(p: &mut Parser<E>, ty: Ty, loc: SrcLoc) -> E::Const {
  let ir = p.types.emitted(ty);
  if p.at(TokenKind::LBrace) {
    p.diags.error(loc, "initializer lists are not implemented");
    skip_braced_group(p);
    return p.emitter.emit_zero_const(ir);
  }
  parse_const_additive(p, ty)
}

fn parse_const_additive<E: Emitter>(p: &mut Parser<E>, ty: Ty) -> E::Const {
  let ir = p.types.emitted(ty);
  let mut v = parse_const_unary(p, ty);
  loop {
    if p.eat(TokenKind::Plus) {
      let rhs = parse_const_unary(p, ty);
      v = p.emitter.emit_const_bin_op(ir, BinOp::Add, v, rhs);
    } else if p.eat(TokenKind::Minus) {
      let rhs = parse_const_unary(p, ty);
      v = p.emitter.emit_const_bin_op(ir, BinOp::Sub, v, rhs);
    } else {
      return v;
    }
  }
}

fn parse_const_unary<E: Emitter>(p: &mut Parser<E>, ty: Ty) -> E::Const {
  let ir = p.types.emitted(ty);
  if p.eat(TokenKind::Minus) {
    let v = parse_const_unary(p, ty);
    return p.emitter.emit_const_neg(ir, v);
  }
  if p.eat(TokenKind::Plus) {
    return parse_const_unary(p, ty);
  }
  if p.eat(TokenKind::BwNot) {
    let v = parse_const_unary(p, ty);
    return p.emitter.emit_const_bw_neg(ir, v);
  }
  if let Some(v) = p.peek().int_value() {
    p.bump();
    return p.emitter.emit_iconst(ir, v);
  }
  if let Some(v) = p.peek().float_value() {
    p.bump();
    return p.emitter.emit_fp_const(ir, v);
  }
  let loc = p.peek().loc;
  p.diags.error(loc, "initializer is not a constant expression");
  if !p.at(TokenKind::Comma) && !p.at(TokenKind::Semicolon) && !p.at(TokenKind::End) {
    p.bump();
  }
  p.emitter.emit_zero_const(ir)
}

fn skip_braced_group<E: Emitter>(p: &mut Parser<E>) {
  p.expect(TokenKind::LBrace, "'{'");
  let mut depth = 1u32;
  while depth > 0 && !p.at(TokenKind::End) {
    if p.eat(TokenKind::LBrace) {
      depth += 1;
    } else if p.eat(TokenKind::RBrace) {
      depth -= 1;
    } else {
      p.bump();
    }
  }
}

/// Zero-initializes every tentative global whose type turned out complete,
/// and diagnoses the ones that didn't (`spec.md` §4.9).
fn finalize_translation_unit<E: Emitter>(p: &mut Parser<E>, globals: hashbrown::HashMap<Symbol, GlobalEntry<E>>) {
  for (_name, entry) in globals {
    if entry.defined || entry.extern_only {
      continue;
    }
    if is_complete_type(p, entry.ty) {
      log::debug!(target: "qcpc::parse", "zero-initializing tentative global at {:?}", entry.loc);
      let ir = p.types.emitted(entry.ty);
      p.emitter.zero_init_global_var(ir, entry.global);
    } else {
      p.diags.error(entry.loc, "tentative definition has incomplete type");
    }
  }
}

fn is_complete_type<E: Emitter>(p: &Parser<E>, ty: Ty) -> bool {
  match p.types.kind(ty) {
    TypeKind::Void => false,
    TypeKind::Struct(agg) | TypeKind::Union(agg) => !agg.incomplete,
    TypeKind::Enum { incomplete, .. } => !incomplete,
    TypeKind::Array { size, .. } => !matches!(size, ArraySize::Unspecified | ArraySize::Vla),
    TypeKind::Undef => false,
    _ => true,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::emit::TargetInfo;
  use crate::parser::Binding;
  use crate::testutil::{Inst, ReferenceEmitter};
  use crate::token::{Token, TokenStream, TokenValue};

  struct FixedTokens {
    toks: std::vec::IntoIter<Token>,
  }

  impl FixedTokens {
    fn new(toks: Vec<Token>) -> Self { Self { toks: toks.into_iter() } }
  }

  impl TokenStream for FixedTokens {
    fn next_token(&mut self) -> Token {
      self.toks.next().unwrap_or_else(|| Token::new(TokenKind::End, SrcLoc::default()))
    }
  }

  fn tok(kind: TokenKind) -> Token { Token::new(kind, SrcLoc::default()) }
  fn iconst(v: u64) -> Token { Token::with_int(TokenKind::IConst, SrcLoc::default(), v) }
  fn ident(name: &str) -> Token { Token::with_ident(SrcLoc::default(), crate::intern::intern(name)) }

  fn parser_with(toks: Vec<Token>) -> Parser<ReferenceEmitter> {
    let emitter = ReferenceEmitter::new();
    Parser::new("", TargetInfo::lp64(), Box::new(FixedTokens::new(toks)), emitter)
  }

  #[test]
  fn function_definition_seeds_param_locals_and_returns() {
    // int f(int a, int b){ return a+b; }
    let toks = vec![
      tok(TokenKind::Int), ident("f"), tok(TokenKind::LParen),
      tok(TokenKind::Int), ident("a"), tok(TokenKind::Comma),
      tok(TokenKind::Int), ident("b"), tok(TokenKind::RParen),
      tok(TokenKind::LBrace),
      tok(TokenKind::Return), ident("a"), tok(TokenKind::Plus), ident("b"), tok(TokenKind::Semicolon),
      tok(TokenKind::RBrace),
    ];
    let mut p = parser_with(toks);
    parse_translation_unit(&mut p);
    assert!(p.diags.diagnostics().is_empty(), "{:?}", p.diags.diagnostics());
    assert!(matches!(p.idents.find(&crate::intern::intern("f")), Some(Binding::Function { .. })));
    let stores = p.emitter.insts().iter().filter(|i| matches!(i, Inst::Store { .. })).count();
    assert_eq!(stores, 2, "each parameter should be stored into its local alloca");
    let rets = p.emitter.insts().iter().filter(|i| matches!(i, Inst::Ret { .. })).count();
    assert_eq!(rets, 1);
  }

  #[test]
  fn tentative_global_is_zero_initialized_at_tu_end() {
    // int x;
    let toks = vec![tok(TokenKind::Int), ident("x"), tok(TokenKind::Semicolon)];
    let mut p = parser_with(toks);
    parse_translation_unit(&mut p);
    assert!(p.diags.diagnostics().is_empty());
    let Some(Binding::Variable { place: VarPlace::Global(g), .. }) = p.idents.find(&crate::intern::intern("x")).cloned() else {
      panic!("x should be a global variable binding");
    };
    let init = p.emitter.global_init(g).expect("tentative global should get an initializer at TU end");
    assert!(p.emitter.is_zero_const(init));
  }

  #[test]
  fn global_with_scalar_initializer_is_recorded() {
    // int x = 1;
    let toks = vec![tok(TokenKind::Int), ident("x"), tok(TokenKind::Assign), iconst(1), tok(TokenKind::Semicolon)];
    let mut p = parser_with(toks);
    parse_translation_unit(&mut p);
    assert!(p.diags.diagnostics().is_empty());
    let Some(Binding::Variable { place: VarPlace::Global(g), .. }) = p.idents.find(&crate::intern::intern("x")).cloned() else {
      panic!("x should be a global variable binding");
    };
    let init = p.emitter.global_init(g).expect("x should already carry its initializer");
    assert_eq!(p.emitter.const_int_value(init), Some(1));
  }

  #[test]
  fn two_scalar_initializers_for_the_same_global_is_diagnosed() {
    // int x = 1; int x = 2;
    let toks = vec![
      tok(TokenKind::Int), ident("x"), tok(TokenKind::Assign), iconst(1), tok(TokenKind::Semicolon),
      tok(TokenKind::Int), ident("x"), tok(TokenKind::Assign), iconst(2), tok(TokenKind::Semicolon),
    ];
    let mut p = parser_with(toks);
    parse_translation_unit(&mut p);
    let diags = p.diags.diagnostics();
    assert_eq!(diags.len(), 2, "one error plus its note");
  }

  #[test]
  fn tentative_declaration_is_superseded_by_a_later_definition() {
    // int x; int x = 1;
    let toks = vec![
      tok(TokenKind::Int), ident("x"), tok(TokenKind::Semicolon),
      tok(TokenKind::Int), ident("x"), tok(TokenKind::Assign), iconst(1), tok(TokenKind::Semicolon),
    ];
    let mut p = parser_with(toks);
    parse_translation_unit(&mut p);
    assert!(p.diags.diagnostics().is_empty(), "{:?}", p.diags.diagnostics());
    let Some(Binding::Variable { place: VarPlace::Global(g), .. }) = p.idents.find(&crate::intern::intern("x")).cloned() else {
      panic!("x should be a global variable binding");
    };
    let init = p.emitter.global_init(g).expect("the defining declaration's initializer should win");
    assert_eq!(p.emitter.const_int_value(init), Some(1));
  }

  #[test]
  fn extern_declaration_alone_is_not_zero_initialized() {
    // extern int x;
    let toks = vec![tok(TokenKind::Extern), tok(TokenKind::Int), ident("x"), tok(TokenKind::Semicolon)];
    let mut p = parser_with(toks);
    parse_translation_unit(&mut p);
    assert!(p.diags.diagnostics().is_empty());
    let Some(Binding::Variable { place: VarPlace::Global(g), .. }) = p.idents.find(&crate::intern::intern("x")).cloned() else {
      panic!("x should be a global variable binding");
    };
    assert!(p.emitter.global_init(g).is_none(), "an extern-only declaration must not get a default zero init");
  }

  #[test]
  fn void_mixed_with_another_parameter_is_diagnosed() {
    // int f(void, int x) {}
    let toks = vec![
      tok(TokenKind::Int), ident("f"), tok(TokenKind::LParen),
      tok(TokenKind::Void), tok(TokenKind::Comma),
      tok(TokenKind::Int), ident("x"), tok(TokenKind::RParen),
      tok(TokenKind::LBrace), tok(TokenKind::RBrace),
    ];
    let mut p = parser_with(toks);
    parse_translation_unit(&mut p);
    assert!(!p.diags.diagnostics().is_empty(), "`(void, int x)` must be diagnosed, not silently accepted");
  }

  #[test]
  fn extraneous_closing_brace_after_function_body_is_diagnosed() {
    // int f(void){} }
    let toks = vec![
      tok(TokenKind::Int), ident("f"), tok(TokenKind::LParen), tok(TokenKind::Void), tok(TokenKind::RParen),
      tok(TokenKind::LBrace), tok(TokenKind::RBrace),
      tok(TokenKind::RBrace),
    ];
    let mut p = parser_with(toks);
    parse_translation_unit(&mut p);
    assert_eq!(p.diags.diagnostics().len(), 1, "{:?}", p.diags.diagnostics());
  }

  #[test]
  fn sole_void_parameter_is_accepted_with_no_params() {
    // int f(void) {}
    let toks = vec![
      tok(TokenKind::Int), ident("f"), tok(TokenKind::LParen), tok(TokenKind::Void), tok(TokenKind::RParen),
      tok(TokenKind::LBrace), tok(TokenKind::RBrace),
    ];
    let mut p = parser_with(toks);
    parse_translation_unit(&mut p);
    assert!(p.diags.diagnostics().is_empty(), "{:?}", p.diags.diagnostics());
  }
}
