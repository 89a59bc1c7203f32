//! Reference [`Emitter`] used by this crate's own test suite.
//!
//! There is no real backend in this core (`spec.md` §1 keeps the LLVM
//! adapter out of scope); tests need *something* behind the `Emitter` seam
//! to drive, though, so this is a small in-memory interpreter: types,
//! constants and values are arena-indexed handles (the same index-into-a-
//! backing-`Vec` idiom `InstSink` uses over `PCode`/`LinkedCode` in
//! `codegen.rs`) and instructions are recorded rather than assembled.
//!
//! Not a fuzzer, not a correctness oracle for real C semantics -- just
//! enough of an implementation that `expr.rs`/`stmt.rs`/`declarator.rs`
//! tests can assert on what got emitted.

use crate::emit::{BinOp, CastKind, Emitter, GepIndex, IncDecOp};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct TypeRef(usize);
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Value(usize);
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Const(usize);
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Global(usize);
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Fn(usize);
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Block(usize);

#[derive(Clone, Debug)]
enum TypeData {
  Int { bits: u32, unsigned: bool },
  Float,
  Double,
  LongDouble,
  Void,
  Ptr(TypeRef),
  Array { elem: TypeRef, size: Option<u64> },
  Struct { fields: Vec<TypeRef>, incomplete: bool, name: String },
  Fn { ret: TypeRef, params: Vec<TypeRef>, varargs: bool },
}

#[derive(Clone, Copy, Debug)]
enum ConstData {
  Int(TypeRef, u64),
  Float(TypeRef, f64),
  NullPtr(TypeRef),
  Zero(TypeRef),
  StringLit(usize),
}

/// One recorded instruction, kept for tests to assert against.
#[derive(Clone, Debug)]
pub enum Inst {
  Load { bb: Block, dest: Value, ty: TypeRef, ptr: Value },
  Store { bb: Block, ty: TypeRef, value: Value, ptr: Value },
  BinOp { bb: Block, dest: Value, ty: TypeRef, op: BinOp, lhs: Value, rhs: Value },
  IncDec { bb: Block, dest: Value, ty: TypeRef, op: IncDecOp, ptr: Value },
  Neg { bb: Block, dest: Value, ty: TypeRef, v: Value },
  BwNeg { bb: Block, dest: Value, ty: TypeRef, v: Value },
  Not { bb: Block, dest: Value, ty: TypeRef, v: Value },
  Cast { bb: Block, dest: Value, kind: CastKind, from: TypeRef, to: TypeRef, v: Value },
  Gep { bb: Block, dest: Value, ty: TypeRef, ptr: Value, indices: Vec<GepIndex<Value>> },
  Call { bb: Block, dest: Value, f: Fn, args: Vec<Value> },
  IndirectCall { bb: Block, dest: Value, fn_ty: TypeRef, f: Value, args: Vec<Value> },
  Jump { bb: Block, target: Block },
  Branch { bb: Block, true_bb: Block, false_bb: Block, cond: Value },
  Ret { bb: Block, value: Option<Value> },
  GlobalAddr { dest: Value, g: Global },
}

#[derive(Default)]
struct FnData {
  is_proto: bool,
  blocks: Vec<()>,
}

/// The interpreting reference backend. Records every emitted
/// type/constant/instruction into flat arenas so tests can inspect them
/// after the fact via [`Self::insts`].
#[derive(Default)]
pub struct ReferenceEmitter {
  types: Vec<TypeData>,
  consts: Vec<ConstData>,
  string_lits: Vec<Vec<u8>>,
  globals: Vec<(TypeRef, String, Option<Const>)>,
  fns: Vec<FnData>,
  next_value: usize,
  locals: Vec<(TypeRef, String)>,
  insts: Vec<Inst>,
}

impl ReferenceEmitter {
  #[must_use]
  pub fn new() -> Self { Self::default() }

  #[must_use]
  pub fn insts(&self) -> &[Inst] { &self.insts }

  #[must_use]
  pub fn global_init(&self, g: Global) -> Option<Const> { self.globals[g.0].2 }

  #[must_use]
  pub fn global_name(&self, g: Global) -> &str { &self.globals[g.0].1 }

  #[must_use]
  pub fn const_int_value(&self, c: Const) -> Option<u64> {
    match self.consts[c.0] {
      ConstData::Int(_, v) => Some(v),
      _ => None,
    }
  }

  #[must_use]
  pub fn is_zero_const(&self, c: Const) -> bool { matches!(self.consts[c.0], ConstData::Zero(_)) }

  fn fresh_value(&mut self) -> Value {
    let v = Value(self.next_value);
    self.next_value += 1;
    v
  }

  fn intern_ty(&mut self, data: TypeData) -> TypeRef {
    self.types.push(data);
    TypeRef(self.types.len() - 1)
  }
}

impl Emitter for ReferenceEmitter {
  type TypeRef = TypeRef;
  type Value = Value;
  type Const = Const;
  type Global = Global;
  type Fn = Fn;
  type Block = Block;
  type Switch = Vec<(Const, Block)>;

  fn emit_int_ty(&mut self, bits: u32, unsigned: bool) -> TypeRef { self.intern_ty(TypeData::Int { bits, unsigned }) }
  fn emit_float_ty(&mut self) -> TypeRef { self.intern_ty(TypeData::Float) }
  fn emit_double_ty(&mut self) -> TypeRef { self.intern_ty(TypeData::Double) }
  fn emit_long_double_ty(&mut self) -> TypeRef { self.intern_ty(TypeData::LongDouble) }
  fn emit_void_ty(&mut self) -> TypeRef { self.intern_ty(TypeData::Void) }
  fn emit_ptr_to(&mut self, pointee: TypeRef) -> TypeRef { self.intern_ty(TypeData::Ptr(pointee)) }
  fn emit_array_ty(&mut self, elem: TypeRef, size: Option<u64>) -> TypeRef { self.intern_ty(TypeData::Array { elem, size }) }
  fn emit_struct_ty(&mut self, fields: &[TypeRef], incomplete: bool, name: &str) -> TypeRef {
    self.intern_ty(TypeData::Struct { fields: fields.to_vec(), incomplete, name: name.to_owned() })
  }
  fn emit_fn_ty(&mut self, ret: TypeRef, params: &[TypeRef], varargs: bool) -> TypeRef {
    self.intern_ty(TypeData::Fn { ret, params: params.to_vec(), varargs })
  }

  fn emit_iconst(&mut self, ty: TypeRef, value: u64) -> Const {
    self.consts.push(ConstData::Int(ty, value));
    Const(self.consts.len() - 1)
  }
  fn emit_fp_const(&mut self, ty: TypeRef, value: f64) -> Const {
    self.consts.push(ConstData::Float(ty, value));
    Const(self.consts.len() - 1)
  }
  fn emit_null_ptr(&mut self, ty: TypeRef) -> Const {
    self.consts.push(ConstData::NullPtr(ty));
    Const(self.consts.len() - 1)
  }
  fn emit_zero_const(&mut self, ty: TypeRef) -> Const {
    self.consts.push(ConstData::Zero(ty));
    Const(self.consts.len() - 1)
  }
  fn emit_string_literal(&mut self, bytes: &[u8]) -> Const {
    self.string_lits.push(bytes.to_vec());
    self.consts.push(ConstData::StringLit(self.string_lits.len() - 1));
    Const(self.consts.len() - 1)
  }
  fn u_integer_value(&self, c: Const) -> u64 {
    match self.consts[c.0] { ConstData::Int(_, v) => v, _ => 0 }
  }
  fn integer_value(&self, c: Const) -> i64 {
    match self.consts[c.0] { ConstData::Int(_, v) => v as i64, _ => 0 }
  }

  fn emit_global_var(&mut self, ty: TypeRef, name: &str) -> Global {
    self.globals.push((ty, name.to_owned(), None));
    Global(self.globals.len() - 1)
  }
  fn set_init_value_global_var(&mut self, var: Global, init: Const) { self.globals[var.0].2 = Some(init) }
  fn zero_init_global_var(&mut self, ty: TypeRef, var: Global) {
    let zero = self.emit_zero_const(ty);
    self.globals[var.0].2 = Some(zero);
  }
  fn emit_fn_proto(&mut self, _fn_ty: TypeRef, _inline: bool, _noreturn: bool, _name: &str) -> Fn {
    self.fns.push(FnData { is_proto: true, blocks: vec![] });
    Fn(self.fns.len() - 1)
  }
  fn emit_fn(&mut self, proto: Fn) -> Block {
    self.fns[proto.0].is_proto = false;
    self.emit_bb(proto, "entry")
  }
  fn is_fn_proto(&self, f: Fn) -> bool { self.fns[f.0].is_proto }
  fn get_param(&mut self, _f: Fn, _index: usize) -> Value { self.fresh_value() }

  fn emit_bb(&mut self, f: Fn, _name: &str) -> Block {
    self.fns[f.0].blocks.push(());
    Block(self.fns[f.0].blocks.len() - 1)
  }

  fn emit_local_var(&mut self, _f: Fn, _entry: Block, ty: TypeRef, name: &str) -> Value {
    self.locals.push((ty, name.to_owned()));
    self.fresh_value()
  }
  fn zero_init_local_var(&mut self, entry: Block, ty: TypeRef, var: Value) {
    let zero = self.emit_zero_const(ty);
    let zero_val = self.const_as_value(entry, ty, zero);
    self.emit_store(entry, ty, zero_val, var);
  }
  fn emit_load(&mut self, bb: Block, ty: TypeRef, ptr: Value) -> Value {
    let dest = self.fresh_value();
    self.insts.push(Inst::Load { bb, dest, ty, ptr });
    dest
  }
  fn emit_store(&mut self, bb: Block, ty: TypeRef, value: Value, ptr: Value) {
    self.insts.push(Inst::Store { bb, ty, value, ptr });
  }
  fn global_addr(&mut self, _bb: Block, _ty: TypeRef, g: Global) -> Value {
    let dest = self.fresh_value();
    self.insts.push(Inst::GlobalAddr { dest, g });
    dest
  }

  fn emit_jump(&mut self, bb: Block, target: Block) { self.insts.push(Inst::Jump { bb, target }) }
  fn emit_branch(&mut self, bb: Block, true_bb: Block, false_bb: Block, cond: Value) {
    self.insts.push(Inst::Branch { bb, true_bb, false_bb, cond });
  }
  fn emit_ret(&mut self, bb: Block, value: Option<Value>) { self.insts.push(Inst::Ret { bb, value }) }
  fn emit_switch(&mut self, _bb: Block, _value: Value) -> Vec<(Const, Block)> { vec![] }
  fn add_switch_case(&mut self, sw: &mut Vec<(Const, Block)>, c: Const, target: Block) { sw.push((c, target)) }
  fn add_switch_default(&mut self, sw: &mut Vec<(Const, Block)>, target: Block) {
    let dummy = Const(usize::MAX);
    sw.push((dummy, target));
  }

  fn emit_bin_op(&mut self, bb: Block, ty: TypeRef, op: BinOp, lhs: Value, rhs: Value, dest: Option<Value>) -> Value {
    let dest = dest.unwrap_or_else(|| self.fresh_value());
    self.insts.push(Inst::BinOp { bb, dest, ty, op, lhs, rhs });
    dest
  }
  fn emit_const_bin_op(&mut self, ty: TypeRef, op: BinOp, lhs: Const, rhs: Const) -> Const {
    let (a, b) = (self.integer_value(lhs), self.integer_value(rhs));
    let v = match op {
      BinOp::Add => a.wrapping_add(b),
      BinOp::Sub => a.wrapping_sub(b),
      BinOp::Mul => a.wrapping_mul(b),
      BinOp::Div if b != 0 => a.wrapping_div(b),
      BinOp::Rem if b != 0 => a.wrapping_rem(b),
      BinOp::BwAnd => a & b,
      BinOp::BwOr => a | b,
      BinOp::BwXor => a ^ b,
      BinOp::Shl => a.wrapping_shl(b as u32),
      BinOp::Shr => a.wrapping_shr(b as u32),
      BinOp::Lt => i64::from(a < b),
      BinOp::Le => i64::from(a <= b),
      BinOp::Gt => i64::from(a > b),
      BinOp::Ge => i64::from(a >= b),
      BinOp::Eq => i64::from(a == b),
      BinOp::Ne => i64::from(a != b),
      BinOp::Div | BinOp::Rem => 0,
    };
    self.emit_iconst(ty, v as u64)
  }
  fn emit_inc_dec_op(&mut self, bb: Block, ty: TypeRef, op: IncDecOp, ptr: Value) -> Value {
    let dest = self.fresh_value();
    self.insts.push(Inst::IncDec { bb, dest, ty, op, ptr });
    dest
  }
  fn emit_neg(&mut self, bb: Block, ty: TypeRef, v: Value) -> Value {
    let dest = self.fresh_value();
    self.insts.push(Inst::Neg { bb, dest, ty, v });
    dest
  }
  fn emit_const_neg(&mut self, ty: TypeRef, v: Const) -> Const {
    let n = self.integer_value(v);
    self.emit_iconst(ty, (-n) as u64)
  }
  fn emit_bw_neg(&mut self, bb: Block, ty: TypeRef, v: Value) -> Value {
    let dest = self.fresh_value();
    self.insts.push(Inst::BwNeg { bb, dest, ty, v });
    dest
  }
  fn emit_const_bw_neg(&mut self, ty: TypeRef, v: Const) -> Const {
    let n = self.integer_value(v);
    self.emit_iconst(ty, (!n) as u64)
  }
  fn emit_not(&mut self, bb: Block, ty: TypeRef, v: Value) -> Value {
    let dest = self.fresh_value();
    self.insts.push(Inst::Not { bb, dest, ty, v });
    dest
  }
  fn emit_const_not(&mut self, ty: TypeRef, v: Const) -> Const {
    let n = self.integer_value(v);
    self.emit_iconst(ty, u64::from(n == 0))
  }
  fn emit_cast(&mut self, bb: Block, from_ty: TypeRef, v: Value, to_ty: TypeRef, kind: CastKind) -> Value {
    let dest = self.fresh_value();
    self.insts.push(Inst::Cast { bb, dest, kind, from: from_ty, to: to_ty, v });
    dest
  }
  fn emit_const_cast(&mut self, _from_ty: TypeRef, v: Const, to_ty: TypeRef, _kind: CastKind) -> Const {
    let n = self.integer_value(v);
    self.emit_iconst(to_ty, n as u64)
  }
  fn emit_gep(&mut self, bb: Block, ty: TypeRef, ptr: Value, indices: &[GepIndex<Value>]) -> Value {
    let dest = self.fresh_value();
    self.insts.push(Inst::Gep { bb, dest, ty, ptr, indices: indices.to_vec() });
    dest
  }
  fn emit_call(&mut self, bb: Block, f: Fn, args: &[Value]) -> Value {
    let dest = self.fresh_value();
    self.insts.push(Inst::Call { bb, dest, f, args: args.to_vec() });
    dest
  }
  fn emit_indirect_call(&mut self, bb: Block, fn_ty: TypeRef, f: Value, args: &[Value]) -> Value {
    let dest = self.fresh_value();
    self.insts.push(Inst::IndirectCall { bb, dest, fn_ty, f, args: args.to_vec() });
    dest
  }
  fn emit_phi(&mut self, _bb: Block, _ty: TypeRef, _incoming: &[(Value, Block)]) -> Value { self.fresh_value() }

  fn emit_undef(&mut self, _ty: TypeRef) -> Value { self.fresh_value() }
  fn emit_poison(&mut self, _ty: TypeRef) -> Value { self.fresh_value() }

  fn const_as_value(&mut self, _bb: Block, _ty: TypeRef, _c: Const) -> Value { self.fresh_value() }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn records_a_store_after_a_local() {
    let mut e = ReferenceEmitter::new();
    let proto = e.emit_fn_proto(e.emit_void_ty(), false, false, "main");
    let entry = e.emit_fn(proto);
    let int_ty = e.emit_int_ty(32, false);
    let local = e.emit_local_var(proto, entry, int_ty, "x");
    let c = e.emit_iconst(int_ty, 42);
    let v = e.const_as_value(entry, int_ty, c);
    e.emit_store(entry, int_ty, v, local);
    assert!(matches!(e.insts()[0], Inst::Store { .. }));
  }
}
