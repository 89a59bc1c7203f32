//! Statement parsing and CFG lowering (component C8).
//!
//! Ported from the `parse*Stmt` family in `include/parser.h`. Like
//! `expr.rs`, this is single-pass: there is no statement AST, every
//! production lowers straight into the current basic block as it is
//! recognized. The parser keeps exactly one "current block"
//! (`FunctionState::current_block`); a terminator (`jump`/`branch`/`ret`/
//! `switch`) seals it, and nothing may be appended to a sealed block
//! afterward. Blocks that are created but not yet terminated are tracked
//! in `FunctionState::unsealed_blocks` so the function-end pass can close
//! them off (`spec.md` §4.8).

use crate::diag::SrcLoc;
use crate::emit::{BinOp, CastKind, Emitter};
use crate::expr::{ExprResult, Val};
use crate::intern::Symbol;
use crate::parser::{Binding, Parser, StorageClass, SwitchState, VarPlace};
use crate::token::TokenKind;
use crate::types::TypeKind;

impl<E: Emitter> Parser<E> {
  // -- block bookkeeping --------------------------------------------------

  fn new_block(&mut self, name: &str, loc: SrcLoc) -> E::Block {
    let f = self.current_fn();
    let bb = self.emitter.emit_bb(f, name);
    self.func_mut().unsealed_blocks.push((bb, loc));
    bb
  }

  fn seal(&mut self, bb: E::Block) {
    log::debug!(target: "qcpc::parse", "sealing block {:?}", bb);
    self.func_mut().unsealed_blocks.retain(|(b, _)| *b != bb);
  }

  fn is_unsealed(&self, bb: E::Block) -> bool {
    self.func.as_ref().map_or(false, |f| f.unsealed_blocks.iter().any(|(b, _)| *b == bb))
  }

  /// Gives statements that follow an unconditional jump (after `return`,
  /// `break`, `continue`, `goto`) somewhere to land: their IR is dead code,
  /// but C allows it and the parser still needs a current block to emit
  /// into.
  fn start_unreachable_block(&mut self, loc: SrcLoc) {
    let after = self.new_block("unreachable", loc);
    self.func_mut().current_block = after;
  }

  /// Lowers a controlling expression (`if`/`while`/`do`/`for` condition)
  /// to a boolean branch value, the same `!= 0` comparison `expr.rs` uses
  /// for `?:` and `&&`/`||`.
  fn to_branch_cond(&mut self, cond: ExprResult<E>) -> E::Value {
    let cond = self.decay(cond);
    let v = self.rvalue(cond);
    let bool_ir = self.types.emitted(self.types.bool_ty());
    let zero_c = self.emitter.emit_iconst(bool_ir, 0);
    let zero_v = self.const_as_value_in_current_bb(bool_ir, zero_c);
    let bb = self.func_mut().current_block;
    self.emitter.emit_bin_op(bb, bool_ir, BinOp::Ne, v, zero_v, None)
  }

  // -- compound statements / declarations ---------------------------------

  pub fn parse_compound_stmt(&mut self) {
    log::trace!(target: "qcpc::parse", "parse_compound_stmt");
    self.expect(TokenKind::LBrace, "'{' to start compound statement");
    self.idents.enter();
    self.tags.enter();
    while !self.at(TokenKind::RBrace) && !self.at(TokenKind::End) {
      self.parse_block_item();
    }
    self.expect(TokenKind::RBrace, "'}' to close compound statement");
    self.tags.leave();
    self.idents.leave();
  }

  fn parse_block_item(&mut self) {
    if self.starts_declaration() {
      self.parse_local_declaration();
    } else {
      self.parse_stmt();
    }
  }

  fn starts_declaration(&self) -> bool {
    let kind = self.peek().kind;
    if kind.is_type_qualifier() || kind.is_storage_class() || kind == TokenKind::Inline {
      return true;
    }
    if matches!(
      kind,
      TokenKind::Void
        | TokenKind::Bool
        | TokenKind::Char
        | TokenKind::Short
        | TokenKind::Int
        | TokenKind::Long
        | TokenKind::Float
        | TokenKind::Double
        | TokenKind::Signed
        | TokenKind::Unsigned
        | TokenKind::Struct
        | TokenKind::Union
        | TokenKind::Enum
    ) {
      return true;
    }
    if kind == TokenKind::Ident {
      if let Some(name) = self.peek().ident() {
        return matches!(self.idents.find(&name), Some(Binding::Typedef { .. }));
      }
    }
    false
  }

  fn parse_local_declaration(&mut self) {
    let spec = self.parse_decl_specifiers();
    if self.eat(TokenKind::Semicolon) {
      // a bare `struct foo { ... };`/`enum bar { ... };` with no declarator
      self.types.clear_fragments();
      return;
    }
    loop {
      let d = self.parse_declarator(spec.base_ty, spec.qualifiers);
      if spec.storage == Some(StorageClass::Typedef) {
        if !self.idents.insert(d.name, Binding::Typedef { ty: d.ty }) {
          self.diags.error(d.name_loc, "redefinition of typedef");
        }
      } else {
        self.declare_local_name(&d, spec.storage);
      }
      if !self.eat(TokenKind::Comma) { break }
    }
    self.expect(TokenKind::Semicolon, "';' after declaration");
    self.types.clear_fragments();
  }

  fn declare_local_name(&mut self, d: &crate::declarator::Declarator, storage: Option<StorageClass>) {
    if matches!(self.types.kind(d.ty), TypeKind::Fn { .. }) {
      let ty_ir = self.types.emitted(d.ty);
      let name_str = d.name.as_str();
      let handle = self.emitter.emit_fn_proto(ty_ir, false, false, &name_str);
      if !self.idents.insert(d.name, Binding::Function { ty: d.ty, handle }) {
        self.diags.error(d.name_loc, "redefinition of function");
      }
      return;
    }

    let ty_ir = self.types.emitted(d.ty);
    let cur_fn = self.current_fn();
    let entry = self.func.as_ref().unwrap().entry_block;
    let name_str = d.name.as_str();
    let local = self.emitter.emit_local_var(cur_fn, entry, ty_ir, &name_str);
    if !self.idents.insert(d.name, Binding::Variable { ty: d.ty, storage: storage.unwrap_or(StorageClass::Auto), place: VarPlace::Local(local) }) {
      self.diags.error(d.name_loc, "redefinition of variable");
      return;
    }

    if self.eat(TokenKind::Assign) {
      let init = self.parse_assignment_expr();
      let casted = self.apply_cast(d.ty, init);
      let v = self.rvalue(casted);
      let bb = self.func_mut().current_block;
      self.emitter.emit_store(bb, ty_ir, v, local);
    }
  }

  // -- statement dispatch ---------------------------------------------------

  pub fn parse_stmt(&mut self) {
    log::trace!(target: "qcpc::parse", "parse_stmt {:?}", self.peek().kind);
    match self.peek().kind {
      TokenKind::LBrace => self.parse_compound_stmt(),
      TokenKind::If => self.parse_if_stmt(),
      TokenKind::While => self.parse_while_stmt(),
      TokenKind::Do => self.parse_do_stmt(),
      TokenKind::For => self.parse_for_stmt(),
      TokenKind::Switch => self.parse_switch_stmt(),
      TokenKind::Case => self.parse_case_stmt(),
      TokenKind::Default => self.parse_default_stmt(),
      TokenKind::Break => self.parse_break_stmt(),
      TokenKind::Continue => self.parse_continue_stmt(),
      TokenKind::Return => self.parse_return_stmt(),
      TokenKind::Goto => self.parse_goto_stmt(),
      TokenKind::Semicolon => { self.bump(); }
      TokenKind::Ident if self.peek2().kind == TokenKind::Colon => self.parse_label_stmt(),
      _ => self.parse_expr_stmt(),
    }
  }

  fn parse_expr_stmt(&mut self) {
    self.parse_expr();
    self.expect(TokenKind::Semicolon, "';' after expression statement");
  }

  fn parse_label_stmt(&mut self) {
    let tok = self.peek().clone();
    self.bump(); // identifier
    self.bump(); // ':'
    let name = tok.ident().unwrap_or(Symbol::EMPTY);
    let loc = tok.loc;

    let label_bb = self.new_block("label", loc);
    let prev = self.func_mut().current_block;
    if self.is_unsealed(prev) {
      self.emitter.emit_jump(prev, label_bb);
      self.seal(prev);
    }
    if self.func.as_ref().unwrap().labels.contains_key(&name) {
      self.diags.error(loc, "redefinition of label");
    } else {
      self.func_mut().labels.insert(name, label_bb);
    }
    self.func_mut().current_block = label_bb;
    self.parse_stmt();
  }

  fn parse_goto_stmt(&mut self) {
    let loc = self.peek().loc;
    self.bump(); // 'goto'
    let name = if self.at(TokenKind::Ident) { self.peek().ident().unwrap_or(Symbol::EMPTY) } else { Symbol::EMPTY };
    self.bump();
    self.expect(TokenKind::Semicolon, "';' after goto");

    let cur = self.func_mut().current_block;
    let target = self.func.as_ref().unwrap().labels.get(&name).copied();
    match target {
      Some(t) => {
        self.emitter.emit_jump(cur, t);
        self.seal(cur);
      }
      None => {
        log::debug!(target: "qcpc::parse", "recording pending goto to undeclared label");
        self.func_mut().pending_gotos.push((name, cur, loc));
      }
    }
    self.start_unreachable_block(loc);
  }

  fn parse_if_stmt(&mut self) {
    let loc = self.peek().loc;
    self.bump(); // 'if'
    self.expect(TokenKind::LParen, "'(' after 'if'");
    let cond = self.parse_expr();
    self.expect(TokenKind::RParen, "')' after if condition");
    let cond_bool = self.to_branch_cond(cond);
    let pre_bb = self.func_mut().current_block;

    let then_bb = self.new_block("if.then", loc);
    let else_bb = self.new_block("if.else", loc);
    let join_bb = self.new_block("if.join", loc);
    self.emitter.emit_branch(pre_bb, then_bb, else_bb, cond_bool);
    self.seal(pre_bb);

    self.func_mut().current_block = then_bb;
    self.parse_stmt();
    let then_end = self.func_mut().current_block;
    if self.is_unsealed(then_end) {
      self.emitter.emit_jump(then_end, join_bb);
      self.seal(then_end);
    }

    self.func_mut().current_block = else_bb;
    if self.eat(TokenKind::Else) {
      self.parse_stmt();
    }
    let else_end = self.func_mut().current_block;
    if self.is_unsealed(else_end) {
      self.emitter.emit_jump(else_end, join_bb);
      self.seal(else_end);
    }

    self.func_mut().current_block = join_bb;
  }

  fn parse_while_stmt(&mut self) {
    let loc = self.peek().loc;
    self.bump(); // 'while'
    self.expect(TokenKind::LParen, "'(' after 'while'");

    let pre_bb = self.func_mut().current_block;
    let header_bb = self.new_block("while.header", loc);
    if self.is_unsealed(pre_bb) {
      self.emitter.emit_jump(pre_bb, header_bb);
      self.seal(pre_bb);
    }
    self.func_mut().current_block = header_bb;
    let cond = self.parse_expr();
    self.expect(TokenKind::RParen, "')' after while condition");
    let cond_bool = self.to_branch_cond(cond);
    let header_end = self.func_mut().current_block;

    let body_bb = self.new_block("while.body", loc);
    let cont_bb = self.new_block("while.cont", loc);
    self.emitter.emit_branch(header_end, body_bb, cont_bb, cond_bool);
    self.seal(header_end);

    self.func_mut().break_targets.push(cont_bb);
    self.func_mut().continue_targets.push(header_bb);
    self.func_mut().current_block = body_bb;
    self.parse_stmt();
    let body_end = self.func_mut().current_block;
    if self.is_unsealed(body_end) {
      self.emitter.emit_jump(body_end, header_bb);
      self.seal(body_end);
    }
    self.func_mut().break_targets.pop();
    self.func_mut().continue_targets.pop();

    self.func_mut().current_block = cont_bb;
  }

  fn parse_do_stmt(&mut self) {
    let loc = self.peek().loc;
    self.bump(); // 'do'

    let pre_bb = self.func_mut().current_block;
    let body_bb = self.new_block("do.body", loc);
    let cond_bb = self.new_block("do.cond", loc);
    let cont_bb = self.new_block("do.cont", loc);
    if self.is_unsealed(pre_bb) {
      self.emitter.emit_jump(pre_bb, body_bb);
      self.seal(pre_bb);
    }

    self.func_mut().break_targets.push(cont_bb);
    self.func_mut().continue_targets.push(cond_bb);
    self.func_mut().current_block = body_bb;
    self.parse_stmt();
    let body_end = self.func_mut().current_block;
    if self.is_unsealed(body_end) {
      self.emitter.emit_jump(body_end, cond_bb);
      self.seal(body_end);
    }
    self.func_mut().break_targets.pop();
    self.func_mut().continue_targets.pop();

    self.expect(TokenKind::While, "'while' after do-body");
    self.expect(TokenKind::LParen, "'(' after 'while'");
    self.func_mut().current_block = cond_bb;
    let cond = self.parse_expr();
    self.expect(TokenKind::RParen, "')' after do-while condition");
    self.expect(TokenKind::Semicolon, "';' after do-while statement");
    let cond_bool = self.to_branch_cond(cond);
    let cond_end = self.func_mut().current_block;
    self.emitter.emit_branch(cond_end, body_bb, cont_bb, cond_bool);
    self.seal(cond_end);

    self.func_mut().current_block = cont_bb;
  }

  fn parse_for_stmt(&mut self) {
    let loc = self.peek().loc;
    self.bump(); // 'for'
    self.expect(TokenKind::LParen, "'(' after 'for'");
    self.idents.enter();

    if self.starts_declaration() {
      self.parse_local_declaration();
    } else if self.eat(TokenKind::Semicolon) {
      // empty init clause
    } else {
      self.parse_expr();
      self.expect(TokenKind::Semicolon, "';' after for-init");
    }

    let pre_bb = self.func_mut().current_block;
    let header_bb = self.new_block("for.header", loc);
    let body_bb = self.new_block("for.body", loc);
    let update_bb = self.new_block("for.update", loc);
    let cont_bb = self.new_block("for.cont", loc);
    if self.is_unsealed(pre_bb) {
      self.emitter.emit_jump(pre_bb, header_bb);
      self.seal(pre_bb);
    }

    self.func_mut().current_block = header_bb;
    if !self.at(TokenKind::Semicolon) {
      let cond = self.parse_expr();
      let cond_bool = self.to_branch_cond(cond);
      let header_end = self.func_mut().current_block;
      self.emitter.emit_branch(header_end, body_bb, cont_bb, cond_bool);
      self.seal(header_end);
    } else {
      self.emitter.emit_jump(header_bb, body_bb);
      self.seal(header_bb);
    }
    self.expect(TokenKind::Semicolon, "';' after for-condition");

    // The update clause is written between the two semicolons but runs
    // after the body each iteration; lower it into `update_bb` now while
    // its tokens are at hand, the body comes later.
    self.func_mut().current_block = update_bb;
    if !self.at(TokenKind::RParen) {
      self.parse_expr();
    }
    let update_end = self.func_mut().current_block;
    self.expect(TokenKind::RParen, "')' after for clauses");

    self.func_mut().break_targets.push(cont_bb);
    self.func_mut().continue_targets.push(update_bb);
    self.func_mut().current_block = body_bb;
    self.parse_stmt();
    let body_end = self.func_mut().current_block;
    if self.is_unsealed(body_end) {
      self.emitter.emit_jump(body_end, update_bb);
      self.seal(body_end);
    }
    self.func_mut().break_targets.pop();
    self.func_mut().continue_targets.pop();

    self.emitter.emit_jump(update_end, header_bb);
    self.seal(update_end);

    self.idents.leave();
    self.func_mut().current_block = cont_bb;
  }

  fn parse_break_stmt(&mut self) {
    let loc = self.peek().loc;
    self.bump();
    self.expect(TokenKind::Semicolon, "';' after break");
    let target = self.func.as_ref().unwrap().break_targets.last().copied();
    let cur = self.func_mut().current_block;
    match target {
      Some(t) => {
        self.emitter.emit_jump(cur, t);
        self.seal(cur);
        self.start_unreachable_block(loc);
      }
      None => self.diags.error(loc, "'break' statement not in loop or switch"),
    }
  }

  fn parse_continue_stmt(&mut self) {
    let loc = self.peek().loc;
    self.bump();
    self.expect(TokenKind::Semicolon, "';' after continue");
    let target = self.func.as_ref().unwrap().continue_targets.last().copied();
    let cur = self.func_mut().current_block;
    match target {
      Some(t) => {
        self.emitter.emit_jump(cur, t);
        self.seal(cur);
        self.start_unreachable_block(loc);
      }
      None => self.diags.error(loc, "'continue' statement not in a loop"),
    }
  }

  fn parse_return_stmt(&mut self) {
    let loc = self.peek().loc;
    self.bump(); // 'return'
    let return_ty = self.func.as_ref().unwrap().return_ty;
    let is_void = matches!(self.types.kind(return_ty), TypeKind::Void);

    if self.at(TokenKind::Semicolon) {
      self.bump();
      if !is_void {
        self.diags.error(loc, "non-void function should return a value");
      }
      let bb = self.func_mut().current_block;
      self.func_mut().outstanding_returns.push((bb, None));
      self.seal(bb);
      self.start_unreachable_block(loc);
      return;
    }

    let e = self.parse_expr();
    self.expect(TokenKind::Semicolon, "';' after return value");
    if is_void {
      self.diags.error(loc, "void function should not return a value");
      let bb = self.func_mut().current_block;
      self.func_mut().outstanding_returns.push((bb, None));
      self.seal(bb);
      self.start_unreachable_block(loc);
      return;
    }

    let casted = self.apply_cast(return_ty, e);
    let v = self.rvalue(casted);
    let bb = self.func_mut().current_block;
    self.func_mut().outstanding_returns.push((bb, Some(v)));
    self.seal(bb);
    self.start_unreachable_block(loc);
  }

  // -- switch / case / default ---------------------------------------------

  fn parse_switch_stmt(&mut self) {
    let loc = self.peek().loc;
    self.bump(); // 'switch'
    self.expect(TokenKind::LParen, "'(' after 'switch'");
    let ctrl = self.parse_expr();
    self.expect(TokenKind::RParen, "')' after switch expression");
    let ctrl = self.decay(ctrl);
    let ctrl_ty = ctrl.ty;
    if !ctrl_ty.is_undef() && !self.types.is_integer(ctrl_ty) {
      self.diags.error(loc, "controlling expression of switch is not an integer");
    }
    let promoted_ty = self.types.promote(ctrl_ty);
    let promoted_ir = self.types.emitted(promoted_ty);
    let ctrl_ir = self.types.emitted(ctrl_ty);
    let ctrl_v = self.rvalue(ctrl);
    let bb = self.func_mut().current_block;
    let ctrl_v = self.emitter.emit_cast(bb, ctrl_ir, ctrl_v, promoted_ir, CastKind::Bitcast);

    let sw = self.emitter.emit_switch(bb, ctrl_v);
    self.seal(bb);
    self.func_mut().switch_stack.push(SwitchState {
      value_ty: promoted_ty,
      handle: sw,
      has_default: false,
      default_loc: None,
      case_locs: hashbrown::HashMap::new(),
    });

    let cont_bb = self.new_block("switch.cont", loc);
    self.func_mut().break_targets.push(cont_bb);

    let body_bb = self.new_block("switch.body", loc);
    self.func_mut().current_block = body_bb;
    self.parse_stmt();
    let body_end = self.func_mut().current_block;
    if self.is_unsealed(body_end) {
      self.emitter.emit_jump(body_end, cont_bb);
      self.seal(body_end);
    }

    self.func_mut().break_targets.pop();
    let mut sw_state = self.func_mut().switch_stack.pop().unwrap();
    if !sw_state.has_default {
      self.emitter.add_switch_default(&mut sw_state.handle, cont_bb);
    }
    self.func_mut().current_block = cont_bb;
  }

  fn parse_case_stmt(&mut self) {
    let loc = self.peek().loc;
    self.bump(); // 'case'
    let value = self.parse_case_const_expr();
    self.expect(TokenKind::Colon, "':' after case value");
    self.case_label(value, loc);
    self.parse_stmt();
  }

  fn parse_default_stmt(&mut self) {
    let loc = self.peek().loc;
    self.bump(); // 'default'
    self.expect(TokenKind::Colon, "':' after 'default'");
    self.default_label(loc);
    self.parse_stmt();
  }

  fn case_label(&mut self, value: i64, loc: SrcLoc) {
    if self.func.as_ref().map_or(true, |f| f.switch_stack.is_empty()) {
      self.diags.error(loc, "'case' statement not in a switch");
      return;
    }

    let dup_loc = self.func.as_ref().unwrap().switch_stack.last().unwrap().case_locs.get(&value).copied();
    if let Some(prev_loc) = dup_loc {
      self.diags.error(loc, "duplicate case value");
      self.diags.note(prev_loc, "previous case defined here");
    } else {
      log::debug!(target: "qcpc::parse", "recording case value {value}");
      self.func.as_mut().unwrap().switch_stack.last_mut().unwrap().case_locs.insert(value, loc);
    }

    let value_ty = self.func.as_ref().unwrap().switch_stack.last().unwrap().value_ty;
    let value_ir = self.types.emitted(value_ty);
    let case_const = self.emitter.emit_iconst(value_ir, value as u64);

    let case_bb = self.new_block("switch.case", loc);
    let prev_bb = self.func.as_ref().unwrap().current_block;
    if self.is_unsealed(prev_bb) {
      self.emitter.emit_jump(prev_bb, case_bb);
      self.seal(prev_bb);
    }

    let handle_ref: &mut E::Switch = &mut self.func.as_mut().unwrap().switch_stack.last_mut().unwrap().handle;
    self.emitter.add_switch_case(handle_ref, case_const, case_bb);
    self.func.as_mut().unwrap().current_block = case_bb;
  }

  fn default_label(&mut self, loc: SrcLoc) {
    if self.func.as_ref().map_or(true, |f| f.switch_stack.is_empty()) {
      self.diags.error(loc, "'default' statement not in a switch");
      return;
    }

    let prev_default = self.func.as_ref().unwrap().switch_stack.last().unwrap().default_loc;
    if let Some(prev_loc) = prev_default {
      self.diags.error(loc, "multiple default labels in one switch");
      self.diags.note(prev_loc, "previous default defined here");
      return;
    }
    {
      let sw = self.func.as_mut().unwrap().switch_stack.last_mut().unwrap();
      sw.default_loc = Some(loc);
      sw.has_default = true;
    }

    let default_bb = self.new_block("switch.default", loc);
    let prev_bb = self.func.as_ref().unwrap().current_block;
    if self.is_unsealed(prev_bb) {
      self.emitter.emit_jump(prev_bb, default_bb);
      self.seal(prev_bb);
    }

    let handle_ref: &mut E::Switch = &mut self.func.as_mut().unwrap().switch_stack.last_mut().unwrap().handle;
    self.emitter.add_switch_default(handle_ref, default_bb);
    self.func.as_mut().unwrap().current_block = default_bb;
  }

  /// Narrow constant-expression evaluator for `case` labels, the same
  /// literals-plus-`+`/`-`/`*` grammar `declarator.rs` uses for array
  /// bounds and enumerator values -- a `case` label never needs the
  /// full runtime-emitting expression parser.
  fn parse_case_const_expr(&mut self) -> i64 {
    self.parse_case_additive_const()
  }

  fn parse_case_additive_const(&mut self) -> i64 {
    let mut v = self.parse_case_multiplicative_const();
    loop {
      if self.eat(TokenKind::Plus) {
        v = v.wrapping_add(self.parse_case_multiplicative_const());
      } else if self.eat(TokenKind::Minus) {
        v = v.wrapping_sub(self.parse_case_multiplicative_const());
      } else {
        return v;
      }
    }
  }

  fn parse_case_multiplicative_const(&mut self) -> i64 {
    let mut v = self.parse_case_unary_const();
    loop {
      if self.eat(TokenKind::Asterisk) {
        v = v.wrapping_mul(self.parse_case_unary_const());
      } else {
        return v;
      }
    }
  }

  fn parse_case_unary_const(&mut self) -> i64 {
    if self.eat(TokenKind::Minus) {
      return self.parse_case_unary_const().wrapping_neg();
    }
    if self.eat(TokenKind::Plus) {
      return self.parse_case_unary_const();
    }
    if let Some(v) = self.peek().int_value() {
      self.bump();
      return v as i64;
    }
    let loc = self.peek().loc;
    self.diags.error(loc, "case label does not reduce to an integer constant");
    0
  }

  // -- function-end finalization --------------------------------------------

  /// Patches forward `goto`s, closes off every block still dangling at the
  /// end of the function body, and unifies every `return` site into the
  /// function's single terminator shape (`spec.md` §4.8). Called by
  /// `driver.rs` once a function body's closing `}` has been parsed.
  pub(crate) fn finish_function_body(&mut self) {
    let pending = std::mem::take(&mut self.func_mut().pending_gotos);
    for (name, block, loc) in pending {
      let target = self.func.as_ref().unwrap().labels.get(&name).copied();
      match target {
        Some(t) => {
          self.emitter.emit_jump(block, t);
          self.seal(block);
        }
        None => {
          self.diags.error(loc, "use of undeclared label");
          self.func_mut().outstanding_returns.push((block, None));
          self.seal(block);
        }
      }
    }

    let return_ty = self.func.as_ref().unwrap().return_ty;
    let is_void = matches!(self.types.kind(return_ty), TypeKind::Void);
    let dangling = self.func.as_ref().unwrap().unsealed_blocks.clone();
    for (bb, loc) in dangling {
      if !is_void {
        self.diags.error(loc, "missing return statement");
      }
      self.func_mut().outstanding_returns.push((bb, None));
      self.seal(bb);
    }

    self.unify_returns();
  }

  fn unify_returns(&mut self) {
    let return_ty = self.func.as_ref().unwrap().return_ty;
    let is_void = matches!(self.types.kind(return_ty), TypeKind::Void);
    let ret_ir = self.types.emitted(return_ty);
    let returns = std::mem::take(&mut self.func_mut().outstanding_returns);

    if returns.is_empty() {
      return;
    }

    if returns.len() == 1 {
      let (bb, val) = returns[0];
      let final_val = match (val, is_void) {
        (Some(v), _) => Some(v),
        (None, true) => None,
        (None, false) => Some(self.emitter.emit_undef(ret_ir)),
      };
      self.emitter.emit_ret(bb, final_val);
      return;
    }

    let cur_fn = self.current_fn();
    let entry = self.func.as_ref().unwrap().entry_block;
    let ret_var = if is_void { None } else { Some(self.emitter.emit_local_var(cur_fn, entry, ret_ir, "retval")) };
    let ret_block = self.emitter.emit_bb(cur_fn, "return");

    for (bb, val) in returns {
      if let Some(var) = ret_var {
        let v = val.unwrap_or_else(|| self.emitter.emit_undef(ret_ir));
        self.emitter.emit_store(bb, ret_ir, v, var);
      }
      self.emitter.emit_jump(bb, ret_block);
    }

    let final_val = ret_var.map(|var| self.emitter.emit_load(ret_block, ret_ir, var));
    self.emitter.emit_ret(ret_block, final_val);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::diag::SrcLoc;
  use crate::emit::TargetInfo;
  use crate::parser::FunctionState;
  use crate::testutil::{Inst, ReferenceEmitter};
  use crate::token::{Token, TokenStream, TokenValue};

  /// A fixed, hand-written token sequence: tests build the exact stream
  /// they need rather than going through a real lexer (out of scope here).
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
    let mut emitter = ReferenceEmitter::new();
    let void_ty = emitter.emit_void_ty();
    let proto = emitter.emit_fn_proto(void_ty, false, false, "f");
    let entry = emitter.emit_fn(proto);
    let mut p = Parser::new("", TargetInfo::lp64(), Box::new(FixedTokens::new(toks)), emitter);
    let return_ty = p.types.int_ty(false);
    p.func = Some(FunctionState {
      current_fn: proto,
      return_ty,
      entry_block: entry,
      current_block: entry,
      break_targets: vec![],
      continue_targets: vec![],
      labels: hashbrown::HashMap::new(),
      pending_gotos: vec![],
      switch_stack: vec![],
      unsealed_blocks: vec![],
      outstanding_returns: vec![],
    });
    p
  }

  #[test]
  fn if_without_else_emits_branch_and_join() {
    // if (1) ;
    let toks = vec![tok(TokenKind::If), tok(TokenKind::LParen), iconst(1), tok(TokenKind::RParen), tok(TokenKind::Semicolon)];
    let mut p = parser_with(toks);
    p.parse_stmt();
    let branches = p.emitter.insts().iter().filter(|i| matches!(i, Inst::Branch { .. })).count();
    assert_eq!(branches, 1);
  }

  #[test]
  fn single_return_is_not_unified_into_a_join_block() {
    // return 1;
    let toks = vec![tok(TokenKind::Return), iconst(1), tok(TokenKind::Semicolon)];
    let mut p = parser_with(toks);
    p.parse_stmt();
    p.finish_function_body();
    let rets = p.emitter.insts().iter().filter(|i| matches!(i, Inst::Ret { .. })).count();
    assert_eq!(rets, 1);
  }

  #[test]
  fn two_returns_unify_through_a_shared_return_block() {
    // if (1) return 1; return 2;
    let toks = vec![
      tok(TokenKind::If), tok(TokenKind::LParen), iconst(1), tok(TokenKind::RParen),
      tok(TokenKind::Return), iconst(1), tok(TokenKind::Semicolon),
      tok(TokenKind::Return), iconst(2), tok(TokenKind::Semicolon),
    ];
    let mut p = parser_with(toks);
    p.parse_stmt();
    p.parse_stmt();
    p.finish_function_body();
    let rets = p.emitter.insts().iter().filter(|i| matches!(i, Inst::Ret { .. })).count();
    assert_eq!(rets, 1, "exactly one ret should remain after unification");
    let stores = p.emitter.insts().iter().filter(|i| matches!(i, Inst::Store { .. })).count();
    assert_eq!(stores, 2, "each return site should store into the shared return variable");
  }

  #[test]
  fn break_outside_loop_or_switch_is_diagnosed() {
    let toks = vec![tok(TokenKind::Break), tok(TokenKind::Semicolon)];
    let mut p = parser_with(toks);
    p.parse_stmt();
    assert_eq!(p.diags.diagnostics().len(), 1);
  }

  #[test]
  fn while_loop_pushes_and_pops_continue_target() {
    // while (1) ;
    let toks = vec![tok(TokenKind::While), tok(TokenKind::LParen), iconst(1), tok(TokenKind::RParen), tok(TokenKind::Semicolon)];
    let mut p = parser_with(toks);
    p.parse_stmt();
    assert!(p.func.as_ref().unwrap().continue_targets.is_empty());
    assert!(p.func.as_ref().unwrap().break_targets.is_empty());
  }

  #[test]
  fn goto_before_label_is_patched_at_function_end() {
    // goto done; done: ;
    let toks = vec![tok(TokenKind::Goto), ident("done"), tok(TokenKind::Semicolon), ident("done"), tok(TokenKind::Colon), tok(TokenKind::Semicolon)];
    let mut p = parser_with(toks);
    let void_ty = p.types.void_ty();
    p.func.as_mut().unwrap().return_ty = void_ty;
    p.parse_stmt();
    p.parse_stmt();
    p.finish_function_body();
    assert!(p.diags.diagnostics().is_empty());
    assert!(p.emitter.insts().iter().any(|i| matches!(i, Inst::Jump { .. })));
  }

  #[test]
  fn goto_to_an_undeclared_label_is_diagnosed() {
    let toks = vec![tok(TokenKind::Goto), ident("nowhere"), tok(TokenKind::Semicolon)];
    let mut p = parser_with(toks);
    let void_ty = p.types.void_ty();
    p.func.as_mut().unwrap().return_ty = void_ty;
    p.parse_stmt();
    p.finish_function_body();
    assert_eq!(p.diags.diagnostics().len(), 1);
  }

  #[test]
  fn duplicate_case_value_is_diagnosed_with_a_note() {
    // switch (1) { case 1: ; case 1: ; }
    let toks = vec![
      tok(TokenKind::Switch), tok(TokenKind::LParen), iconst(1), tok(TokenKind::RParen), tok(TokenKind::LBrace),
      tok(TokenKind::Case), iconst(1), tok(TokenKind::Colon), tok(TokenKind::Semicolon),
      tok(TokenKind::Case), iconst(1), tok(TokenKind::Colon), tok(TokenKind::Semicolon),
      tok(TokenKind::RBrace),
    ];
    let mut p = parser_with(toks);
    p.parse_stmt();
    let diags = p.diags.diagnostics();
    assert_eq!(diags.len(), 2, "one error plus its note");
  }

  #[test]
  fn local_declaration_with_initializer_emits_a_store() {
    // int x = 1;
    let toks = vec![tok(TokenKind::Int), ident("x"), tok(TokenKind::Assign), iconst(1), tok(TokenKind::Semicolon)];
    let mut p = parser_with(toks);
    p.idents.enter();
    p.parse_local_declaration();
    p.idents.leave();
    assert!(p.emitter.insts().iter().any(|i| matches!(i, Inst::Store { .. })));
  }
}
