//! The emitter interface (component C5).
//!
//! This is the abstract contract the parser is generic over, ported from
//! `include/emittertraits.h` + `include/llvmemitter.h`. A concrete backend
//! (the reference implementation is an LLVM adapter) implements
//! [`Emitter`]; this crate ships only a small interpreting
//! [`crate::testutil::ReferenceEmitter`] used by its own test suite.
//!
//! Operations are grouped the way `spec.md` §4.5 groups them: type
//! emission, constants, globals & functions, blocks, locals & memory,
//! terminators, computation, and sentinels.

/// Target parameters the emitter exposes (`spec.md` §6): these drive the
/// type-table constructor and enumerator-width growth (§4.7).
#[derive(Clone, Copy, Debug)]
pub struct TargetInfo {
  pub char_bits: u32,
  pub short_bits: u32,
  pub int_bits: u32,
  pub long_bits: u32,
  pub long_long_bits: u32,
  pub char_is_signed: bool,
}

impl TargetInfo {
  /// The LP64 x86-64 parameters used by the reference LLVM backend.
  #[must_use]
  pub const fn lp64() -> Self {
    Self { char_bits: 8, short_bits: 16, int_bits: 32, long_bits: 64, long_long_bits: 64, char_is_signed: true }
  }
}

/// Binary operators the emitter must know how to apply, both at runtime
/// (`emit_bin_op`) and over constants (`emit_const_bin_op`). Ordered to
/// match `op::Kind`'s `MUL..COMMA` run in `include/operator.h`, though the
/// emitter itself does not rely on the ordering.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum BinOp {
  Mul,
  Div,
  Rem,
  Add,
  Sub,
  Shl,
  Shr,
  Lt,
  Le,
  Gt,
  Ge,
  Eq,
  Ne,
  BwAnd,
  BwXor,
  BwOr,
}

impl BinOp {
  #[must_use]
  pub fn is_comparison(self) -> bool {
    matches!(self, BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge | BinOp::Eq | BinOp::Ne)
  }

  #[must_use]
  pub fn is_bitwise(self) -> bool { matches!(self, BinOp::BwAnd | BinOp::BwXor | BinOp::BwOr | BinOp::Shl | BinOp::Shr) }
}

/// `++`/`--`, pre or post; the parser has already decided which by the time
/// it calls into the emitter, but keeps it tagged for back-ends that
/// generate different code for the two.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum IncDecOp {
  PreInc,
  PreDec,
  PostInc,
  PostDec,
}

/// Which conversion the emitter should perform. The *parser*, not the
/// emitter, decides which kind applies to a given `(from, to)` type pair
/// (`spec.md` §4.6 `cast`); the emitter just executes the chosen kind.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum CastKind {
  Bitcast,
  Trunc,
  Zext,
  Sext,
  SiToFp,
  UiToFp,
  FpToSi,
  FpToUi,
  FpTrunc,
  FpExt,
  IntToPtr,
  PtrToInt,
}

/// One index step of a GEP (`getelementptr`-style address computation):
/// either a compile-time-constant index (struct-member / fixed-array
/// access) or a runtime value (variable array subscript).
#[derive(Clone, Copy, Debug)]
pub enum GepIndex<V> {
  Const(u64),
  Value(V),
}

/// The abstract operations the parser needs from a backend. Associated
/// types keep each backend's concrete IR handles (LLVM `Value*`,
/// `BasicBlock*`, ...) opaque to the core; the core only ever stores and
/// threads them through.
pub trait Emitter {
  /// A type, as understood by this backend.
  type TypeRef: Copy + Eq + std::fmt::Debug;
  /// A run-time (SSA) value.
  type Value: Copy + Eq + std::fmt::Debug;
  /// A compile-time constant value.
  type Const: Copy + Eq + std::fmt::Debug;
  /// A global variable handle.
  type Global: Copy + Eq + std::fmt::Debug;
  /// A function handle (both prototypes and definitions).
  type Fn: Copy + Eq + std::fmt::Debug;
  /// A basic block handle.
  type Block: Copy + Eq + std::fmt::Debug;
  /// An in-progress `switch` terminator, mutated by `add_switch_case`/
  /// `add_switch_default` after creation.
  type Switch;

  // -- type emission --------------------------------------------------
  fn emit_int_ty(&mut self, bits: u32, unsigned: bool) -> Self::TypeRef;
  fn emit_float_ty(&mut self) -> Self::TypeRef;
  fn emit_double_ty(&mut self) -> Self::TypeRef;
  fn emit_long_double_ty(&mut self) -> Self::TypeRef;
  fn emit_void_ty(&mut self) -> Self::TypeRef;
  fn emit_ptr_to(&mut self, pointee: Self::TypeRef) -> Self::TypeRef;
  fn emit_array_ty(&mut self, elem: Self::TypeRef, size: Option<u64>) -> Self::TypeRef;
  fn emit_struct_ty(&mut self, fields: &[Self::TypeRef], incomplete: bool, name: &str) -> Self::TypeRef;
  fn emit_fn_ty(&mut self, ret: Self::TypeRef, params: &[Self::TypeRef], varargs: bool) -> Self::TypeRef;

  // -- constants --------------------------------------------------------
  fn emit_iconst(&mut self, ty: Self::TypeRef, value: u64) -> Self::Const;
  fn emit_fp_const(&mut self, ty: Self::TypeRef, value: f64) -> Self::Const;
  fn emit_null_ptr(&mut self, ty: Self::TypeRef) -> Self::Const;
  fn emit_zero_const(&mut self, ty: Self::TypeRef) -> Self::Const;
  fn emit_string_literal(&mut self, bytes: &[u8]) -> Self::Const;
  fn u_integer_value(&self, c: Self::Const) -> u64;
  fn integer_value(&self, c: Self::Const) -> i64;

  // -- globals & functions ----------------------------------------------
  fn emit_global_var(&mut self, ty: Self::TypeRef, name: &str) -> Self::Global;
  fn set_init_value_global_var(&mut self, var: Self::Global, init: Self::Const);
  fn zero_init_global_var(&mut self, ty: Self::TypeRef, var: Self::Global);
  fn emit_fn_proto(&mut self, fn_ty: Self::TypeRef, inline: bool, noreturn: bool, name: &str) -> Self::Fn;
  fn emit_fn(&mut self, proto: Self::Fn) -> Self::Block;
  fn is_fn_proto(&self, f: Self::Fn) -> bool;
  fn get_param(&mut self, f: Self::Fn, index: usize) -> Self::Value;

  // -- blocks -------------------------------------------------------------
  fn emit_bb(&mut self, f: Self::Fn, name: &str) -> Self::Block;

  // -- locals & memory ------------------------------------------------------
  fn emit_local_var(&mut self, f: Self::Fn, entry: Self::Block, ty: Self::TypeRef, name: &str) -> Self::Value;
  fn zero_init_local_var(&mut self, entry: Self::Block, ty: Self::TypeRef, var: Self::Value);
  fn emit_load(&mut self, bb: Self::Block, ty: Self::TypeRef, ptr: Self::Value) -> Self::Value;
  fn emit_store(&mut self, bb: Self::Block, ty: Self::TypeRef, value: Self::Value, ptr: Self::Value);
  /// The address of a global, as a value usable by `emit_load`/`emit_store`/
  /// `emit_gep` -- the expression lowerer's only way to touch a global's
  /// storage, since `Self::Global` and `Self::Value` are otherwise distinct.
  fn global_addr(&mut self, bb: Self::Block, ty: Self::TypeRef, g: Self::Global) -> Self::Value;

  // -- terminators -----------------------------------------------------
  fn emit_jump(&mut self, bb: Self::Block, target: Self::Block);
  fn emit_branch(&mut self, bb: Self::Block, true_bb: Self::Block, false_bb: Self::Block, cond: Self::Value);
  fn emit_ret(&mut self, bb: Self::Block, value: Option<Self::Value>);
  fn emit_switch(&mut self, bb: Self::Block, value: Self::Value) -> Self::Switch;
  fn add_switch_case(&mut self, sw: &mut Self::Switch, c: Self::Const, target: Self::Block);
  fn add_switch_default(&mut self, sw: &mut Self::Switch, target: Self::Block);

  // -- computation ------------------------------------------------------
  fn emit_bin_op(&mut self, bb: Self::Block, ty: Self::TypeRef, op: BinOp, lhs: Self::Value, rhs: Self::Value, dest: Option<Self::Value>) -> Self::Value;
  fn emit_const_bin_op(&mut self, ty: Self::TypeRef, op: BinOp, lhs: Self::Const, rhs: Self::Const) -> Self::Const;
  fn emit_inc_dec_op(&mut self, bb: Self::Block, ty: Self::TypeRef, op: IncDecOp, ptr: Self::Value) -> Self::Value;
  fn emit_neg(&mut self, bb: Self::Block, ty: Self::TypeRef, v: Self::Value) -> Self::Value;
  fn emit_const_neg(&mut self, ty: Self::TypeRef, v: Self::Const) -> Self::Const;
  fn emit_bw_neg(&mut self, bb: Self::Block, ty: Self::TypeRef, v: Self::Value) -> Self::Value;
  fn emit_const_bw_neg(&mut self, ty: Self::TypeRef, v: Self::Const) -> Self::Const;
  fn emit_not(&mut self, bb: Self::Block, ty: Self::TypeRef, v: Self::Value) -> Self::Value;
  fn emit_const_not(&mut self, ty: Self::TypeRef, v: Self::Const) -> Self::Const;
  fn emit_cast(&mut self, bb: Self::Block, from_ty: Self::TypeRef, v: Self::Value, to_ty: Self::TypeRef, kind: CastKind) -> Self::Value;
  fn emit_const_cast(&mut self, from_ty: Self::TypeRef, v: Self::Const, to_ty: Self::TypeRef, kind: CastKind) -> Self::Const;
  fn emit_gep(&mut self, bb: Self::Block, ty: Self::TypeRef, ptr: Self::Value, indices: &[GepIndex<Self::Value>]) -> Self::Value;
  fn emit_call(&mut self, bb: Self::Block, f: Self::Fn, args: &[Self::Value]) -> Self::Value;
  fn emit_indirect_call(&mut self, bb: Self::Block, fn_ty: Self::TypeRef, f: Self::Value, args: &[Self::Value]) -> Self::Value;
  fn emit_phi(&mut self, bb: Self::Block, ty: Self::TypeRef, incoming: &[(Self::Value, Self::Block)]) -> Self::Value;

  // -- sentinels --------------------------------------------------------
  fn emit_undef(&mut self, ty: Self::TypeRef) -> Self::Value;
  fn emit_poison(&mut self, ty: Self::TypeRef) -> Self::Value;

  /// Materialize a constant as a runtime value, for contexts that need a
  /// `Self::Value` uniformly (e.g. a `phi` incoming edge whose value was
  /// folded at compile time).
  fn const_as_value(&mut self, bb: Self::Block, ty: Self::TypeRef, c: Self::Const) -> Self::Value;
}
