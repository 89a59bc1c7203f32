//! Hash-consed type table (component C4).
//!
//! Ported from `include/type.h` + `include/typefactory.h`. Every distinct
//! *unqualified* type is assigned a table slot the first time it is built;
//! later requests for the same structural type return the same slot, so
//! [`Ty`] equality is a field comparison rather than a deep walk.
//!
//! Construction is two-phase for derived types built while chaining a
//! declarator (`spec.md` §4.4, §4.8): a pointer/array/function type is first
//! staged as a *fragment* with a placeholder target, then [`TypeFactory::harden`]
//! interns it (and, recursively, everything it was built on top of) into the
//! permanent table once the full chain is known. [`BaseChainRef`] is the
//! write-through handle [`crate::declarator`] uses while that chain is still
//! open.

use crate::emit::Emitter;
use crate::intern::Symbol;
use bitflags::bitflags;
use std::hash::{Hash, Hasher};

bitflags! {
  #[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
  pub struct Qualifiers: u8 {
    const CONST    = 1 << 0;
    const RESTRICT = 1 << 1;
    const VOLATILE = 1 << 2;
  }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum TypeIndex {
  Hardened(u32),
  Fragment(u32),
}

/// A (possibly qualified) type handle. Copy, and `==` comparable without
/// consulting the factory: two `Ty`s from the same factory are equal iff
/// they name the same qualified type.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Ty {
  index: TypeIndex,
  pub qualifiers: Qualifiers,
}

impl Ty {
  /// The reserved "no type known yet" placeholder, slot 0 of every table.
  pub const UNDEF: Ty = Ty { index: TypeIndex::Hardened(0), qualifiers: Qualifiers::empty() };

  #[must_use]
  pub fn is_undef(self) -> bool { self == Ty::UNDEF }

  #[must_use]
  pub fn unqualified(self) -> Ty { Ty { index: self.index, qualifiers: Qualifiers::empty() } }

  #[must_use]
  pub fn qualified(self, q: Qualifiers) -> Ty { Ty { index: self.index, qualifiers: self.qualifiers | q } }

  #[must_use]
  pub fn is_qualified(self) -> bool { !self.qualifiers.is_empty() }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, PartialOrd, Ord)]
pub enum IntWidth {
  Bool,
  Char,
  Short,
  Int,
  Long,
  LongLong,
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, PartialOrd, Ord)]
pub enum FloatWidth {
  Float,
  Double,
  LongDouble,
  Decimal32,
  Decimal64,
  Decimal128,
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum ArraySize {
  Fixed(u64),
  /// `int a[]` in a parameter list or the tentative form of a global.
  Unspecified,
  /// A variable-length array bound (`spec.md` §4.6 non-goal: sizes are
  /// tracked but not evaluated as runtime values by this core).
  Vla,
}

/// A struct/union/enum member or enumerator.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct Member {
  pub name: Symbol,
  pub ty: Ty,
}

/// Struct/union payload. Nominal: two aggregates are the same type iff
/// `id` matches, mirroring `StructOrUnionTy::tag` in `include/type.h` (the
/// serial id, not the member list, is what `Base::operator==` compares).
#[derive(Clone, Debug)]
pub struct Aggregate {
  pub id: u32,
  pub name: Symbol,
  pub members: Vec<Member>,
  pub incomplete: bool,
}

/// The structural payload of a type. `Ty` equality/hashing defer to
/// [`TypeKind`]'s manual `PartialEq`/`Hash` impls below, which encode the
/// same "what actually distinguishes two types" rules as the original
/// `Base::operator==`.
#[derive(Clone, Debug)]
pub enum TypeKind {
  Undef,
  Void,
  Int(IntWidth, bool),
  Float(FloatWidth),
  NullptrT,
  Ptr(Ty),
  Array { elem: Ty, size: ArraySize },
  Struct(Aggregate),
  Union(Aggregate),
  Enum { id: u32, name: Symbol, underlying: Ty, incomplete: bool },
  Fn { params: Vec<Ty>, ret: Ty, vararg: bool },
}

impl PartialEq for TypeKind {
  fn eq(&self, other: &Self) -> bool {
    use TypeKind::{Array, Enum, Float, Fn, Int, NullptrT, Ptr, Struct, Undef, Union, Void};
    match (self, other) {
      (Undef, Undef) | (Void, Void) | (NullptrT, NullptrT) => true,
      (Int(w1, u1), Int(w2, u2)) => w1 == w2 && u1 == u2,
      (Float(w1), Float(w2)) => w1 == w2,
      (Ptr(a), Ptr(b)) => a == b,
      (Array { elem: e1, size: s1 }, Array { elem: e2, size: s2 }) => e1 == e2 && s1 == s2,
      (Struct(a), Struct(b)) | (Union(a), Union(b)) => a.id == b.id,
      (Enum { id: i1, .. }, Enum { id: i2, .. }) => i1 == i2,
      (Fn { params: p1, ret: r1, vararg: v1 }, Fn { params: p2, ret: r2, vararg: v2 }) => {
        r1 == r2 && v1 == v2 && p1 == p2
      }
      _ => false,
    }
  }
}
impl Eq for TypeKind {}

impl Hash for TypeKind {
  fn hash<H: Hasher>(&self, state: &mut H) {
    std::mem::discriminant(self).hash(state);
    match self {
      TypeKind::Undef | TypeKind::Void | TypeKind::NullptrT => {}
      TypeKind::Int(w, u) => { w.hash(state); u.hash(state); }
      TypeKind::Float(w) => w.hash(state),
      TypeKind::Ptr(t) => t.hash(state),
      TypeKind::Array { elem, size } => { elem.hash(state); size.hash(state); }
      TypeKind::Struct(a) | TypeKind::Union(a) => a.id.hash(state),
      TypeKind::Enum { id, .. } => id.hash(state),
      TypeKind::Fn { params, ret, vararg } => { ret.hash(state); vararg.hash(state); params.hash(state); }
    }
  }
}

impl Hash for Ty {
  fn hash<H: Hasher>(&self, state: &mut H) {
    self.index.hash(state);
    self.qualifiers.bits().hash(state);
  }
}
impl Hash for TypeIndex {
  fn hash<H: Hasher>(&self, state: &mut H) {
    match self {
      TypeIndex::Hardened(i) => { 0u8.hash(state); i.hash(state) }
      TypeIndex::Fragment(i) => { 1u8.hash(state); i.hash(state) }
    }
  }
}

struct HardenedEntry<E: Emitter> {
  kind: TypeKind,
  emitted: E::TypeRef,
}

/// Owns the hardened (permanent) type table plus a scratch fragment arena
/// for types mid-construction. One instance per translation unit.
pub struct TypeFactory<E: Emitter> {
  target: TargetInfoSnapshot,
  hardened: Vec<HardenedEntry<E>>,
  index_of: hashbrown::HashMap<TypeKind, u32>,
  fragments: Vec<TypeKind>,
  next_tag_id: u32,
}

/// Just the integer-width fields of `crate::emit::TargetInfo`, copied in at
/// construction so the factory does not need a type parameter for it.
#[derive(Clone, Copy, Debug)]
struct TargetInfoSnapshot {
  char_bits: u32,
  short_bits: u32,
  int_bits: u32,
  long_bits: u32,
  long_long_bits: u32,
  char_is_signed: bool,
}

impl<E: Emitter> TypeFactory<E> {
  /// Build the table, pre-populating the handful of primitive types every
  /// translation unit needs (slots 0..=7, matching the original
  /// constructor's fixed layout).
  #[must_use]
  pub fn new(target: crate::emit::TargetInfo, emitter: &mut E) -> Self {
    let target = TargetInfoSnapshot {
      char_bits: target.char_bits,
      short_bits: target.short_bits,
      int_bits: target.int_bits,
      long_bits: target.long_bits,
      long_long_bits: target.long_long_bits,
      char_is_signed: target.char_is_signed,
    };
    let mut this = Self { target, hardened: vec![], index_of: hashbrown::HashMap::new(), fragments: vec![TypeKind::Undef], next_tag_id: 0 };
    let undef = this.push_hardened(TypeKind::Undef, emitter);
    debug_assert_eq!(undef, 0);
    this.push_hardened(TypeKind::Void, emitter);
    this.push_hardened(TypeKind::Int(IntWidth::Bool, true), emitter);
    this.push_hardened(TypeKind::Int(IntWidth::Char, target.char_is_signed), emitter);
    this.push_hardened(TypeKind::Int(IntWidth::Int, false), emitter);
    this.push_hardened(TypeKind::Int(IntWidth::Int, true), emitter);
    this.push_hardened(TypeKind::Int(IntWidth::LongLong, true), emitter);
    let void = Ty { index: TypeIndex::Hardened(1), qualifiers: Qualifiers::empty() };
    this.push_hardened(TypeKind::Ptr(void), emitter);
    this
  }

  fn emit_ty(&mut self, kind: &TypeKind, emitter: &mut E) -> E::TypeRef {
    match kind {
      TypeKind::Undef | TypeKind::Void => emitter.emit_void_ty(),
      TypeKind::Int(IntWidth::Bool, unsigned) => emitter.emit_int_ty(1, *unsigned),
      TypeKind::Int(IntWidth::Char, unsigned) => emitter.emit_int_ty(self.target.char_bits, *unsigned),
      TypeKind::Int(IntWidth::Short, unsigned) => emitter.emit_int_ty(self.target.short_bits, *unsigned),
      TypeKind::Int(IntWidth::Int, unsigned) => emitter.emit_int_ty(self.target.int_bits, *unsigned),
      TypeKind::Int(IntWidth::Long, unsigned) => emitter.emit_int_ty(self.target.long_bits, *unsigned),
      TypeKind::Int(IntWidth::LongLong, unsigned) => emitter.emit_int_ty(self.target.long_long_bits, *unsigned),
      TypeKind::Float(FloatWidth::Float) => emitter.emit_float_ty(),
      TypeKind::Float(FloatWidth::Double) => emitter.emit_double_ty(),
      TypeKind::Float(FloatWidth::LongDouble) => emitter.emit_long_double_ty(),
      // decimal floating types have no LLVM-native representation in the
      // reference backend; treat them as opaque double-width storage.
      TypeKind::Float(FloatWidth::Decimal32) => emitter.emit_float_ty(),
      TypeKind::Float(FloatWidth::Decimal64 | FloatWidth::Decimal128) => emitter.emit_double_ty(),
      TypeKind::NullptrT => { let void = emitter.emit_void_ty(); emitter.emit_ptr_to(void) }
      TypeKind::Ptr(pointee) => { let t = self.emitted_ref(*pointee); emitter.emit_ptr_to(t) }
      TypeKind::Array { elem, size } => {
        let t = self.emitted_ref(*elem);
        let n = match size { ArraySize::Fixed(n) => Some(*n), ArraySize::Unspecified | ArraySize::Vla => None };
        emitter.emit_array_ty(t, n)
      }
      TypeKind::Struct(agg) | TypeKind::Union(agg) => {
        let field_tys: Vec<E::TypeRef> = agg.members.iter().map(|m| self.emitted_ref(m.ty)).collect();
        emitter.emit_struct_ty(&field_tys, agg.incomplete, &agg.name.as_str())
      }
      TypeKind::Enum { underlying, .. } => self.emitted_ref(*underlying),
      TypeKind::Fn { params, ret, vararg } => {
        let ret_ty = self.emitted_ref(*ret);
        let param_tys: Vec<E::TypeRef> = params.iter().map(|p| self.emitted_ref(*p)).collect();
        emitter.emit_fn_ty(ret_ty, &param_tys, *vararg)
      }
    }
  }

  fn push_hardened(&mut self, kind: TypeKind, emitter: &mut E) -> u32 {
    let emitted = self.emit_ty(&kind, emitter);
    let idx = u32::try_from(self.hardened.len()).expect("type table overflow");
    self.index_of.insert(kind.clone(), idx);
    self.hardened.push(HardenedEntry { kind, emitted });
    idx
  }

  #[must_use]
  fn emitted_ref(&self, ty: Ty) -> E::TypeRef {
    match ty.index {
      TypeIndex::Hardened(i) => self.hardened[i as usize].emitted,
      TypeIndex::Fragment(_) => panic!("cannot emit an un-hardened type fragment"),
    }
  }

  /// The structural payload behind `ty`.
  #[must_use]
  pub fn kind(&self, ty: Ty) -> &TypeKind {
    match ty.index {
      TypeIndex::Hardened(i) => &self.hardened[i as usize].kind,
      TypeIndex::Fragment(i) => &self.fragments[i as usize],
    }
  }

  /// The emitter's handle for `ty`'s unqualified base (qualifiers have no
  /// representation at the IR level, matching `spec.md` §4.4).
  #[must_use]
  pub fn emitted(&self, ty: Ty) -> E::TypeRef { self.emitted_ref(ty) }

  fn intern_or_push(&mut self, kind: TypeKind, emitter: &mut E) -> Ty {
    if let Some(&idx) = self.index_of.get(&kind) {
      return Ty { index: TypeIndex::Hardened(idx), qualifiers: Qualifiers::empty() };
    }
    let idx = self.push_hardened(kind, emitter);
    Ty { index: TypeIndex::Hardened(idx), qualifiers: Qualifiers::empty() }
  }

  // -- well-known primitives --------------------------------------------
  #[must_use] pub fn undef_ty(&self) -> Ty { Ty::UNDEF }
  #[must_use] pub fn void_ty(&self) -> Ty { Ty { index: TypeIndex::Hardened(1), qualifiers: Qualifiers::empty() } }
  #[must_use] pub fn bool_ty(&self) -> Ty { Ty { index: TypeIndex::Hardened(2), qualifiers: Qualifiers::empty() } }
  #[must_use] pub fn char_ty(&self) -> Ty { Ty { index: TypeIndex::Hardened(3), qualifiers: Qualifiers::empty() } }
  #[must_use] pub fn int_ty(&self, unsigned: bool) -> Ty { Ty { index: TypeIndex::Hardened(if unsigned { 5 } else { 4 }), qualifiers: Qualifiers::empty() } }
  /// `size_t`: modeled as `unsigned long long`, slot 6.
  #[must_use] pub fn size_ty(&self) -> Ty { Ty { index: TypeIndex::Hardened(6), qualifiers: Qualifiers::empty() } }
  #[must_use] pub fn uintptr_ty(&self) -> Ty { self.size_ty() }
  #[must_use] pub fn void_ptr_ty(&self) -> Ty { Ty { index: TypeIndex::Hardened(7), qualifiers: Qualifiers::empty() } }

  /// Build (or reuse) an integer type of the given width/signedness.
  pub fn integral_ty(&mut self, width: IntWidth, unsigned: bool, emitter: &mut E) -> Ty {
    self.intern_or_push(TypeKind::Int(width, unsigned), emitter)
  }

  pub fn real_ty(&mut self, width: FloatWidth, emitter: &mut E) -> Ty {
    self.intern_or_push(TypeKind::Float(width), emitter)
  }

  /// Build `ptr to other`. `other` must already be hardened; see
  /// [`Self::begin_ptr_fragment`] for the declarator-chaining case where it
  /// is not known yet.
  pub fn ptr_to(&mut self, other: Ty, emitter: &mut E) -> Ty {
    self.intern_or_push(TypeKind::Ptr(other), emitter)
  }

  pub fn array_of(&mut self, elem: Ty, size: ArraySize, emitter: &mut E) -> Ty {
    self.intern_or_push(TypeKind::Array { elem, size }, emitter)
  }

  pub fn function_ty(&mut self, ret: Ty, params: Vec<Ty>, vararg: bool, emitter: &mut E) -> Ty {
    self.intern_or_push(TypeKind::Fn { params, ret, vararg }, emitter)
  }

  /// Declare a (possibly anonymous) struct or union tag, initially
  /// incomplete. The returned `Ty` is already hardened; completing it later
  /// with [`Self::complete_aggregate`] mutates this same slot in place so
  /// every earlier reference (e.g. a self-referential pointer member) sees
  /// the completed member list without re-resolving anything.
  pub fn declare_aggregate(&mut self, name: Symbol, is_union: bool, emitter: &mut E) -> Ty {
    let id = self.next_tag_id;
    self.next_tag_id += 1;
    let agg = Aggregate { id, name, members: vec![], incomplete: true };
    let kind = if is_union { TypeKind::Union(agg) } else { TypeKind::Struct(agg) };
    let idx = self.push_hardened(kind, emitter);
    Ty { index: TypeIndex::Hardened(idx), qualifiers: Qualifiers::empty() }
  }

  /// Fill in `ty`'s member list and mark it complete. Panics if `ty` is not
  /// an incomplete struct/union slot from this factory.
  pub fn complete_aggregate(&mut self, ty: Ty, members: Vec<Member>, emitter: &mut E) {
    let TypeIndex::Hardened(idx) = ty.index else { panic!("aggregate must already be a declared tag") };
    let i = idx as usize;
    self.index_of.remove(&self.hardened[i].kind.clone());
    match &mut self.hardened[i].kind {
      TypeKind::Struct(agg) | TypeKind::Union(agg) => { agg.members = members; agg.incomplete = false; }
      _ => panic!("not an aggregate type"),
    }
    let kind = self.hardened[i].kind.clone();
    self.index_of.insert(kind.clone(), idx);
    self.hardened[i].emitted = self.emit_ty(&kind, emitter);
  }

  pub fn declare_enum(&mut self, name: Symbol, underlying: Ty, emitter: &mut E) -> Ty {
    let id = self.next_tag_id;
    self.next_tag_id += 1;
    self.intern_or_push(TypeKind::Enum { id, name, underlying, incomplete: true }, emitter)
  }

  pub fn complete_enum(&mut self, ty: Ty, underlying: Ty, emitter: &mut E) {
    let TypeIndex::Hardened(idx) = ty.index else { panic!("enum must already be a declared tag") };
    let i = idx as usize;
    self.index_of.remove(&self.hardened[i].kind.clone());
    let (id, name) = match &self.hardened[i].kind {
      TypeKind::Enum { id, name, .. } => (*id, *name),
      _ => panic!("not an enum type"),
    };
    let kind = TypeKind::Enum { id, name, underlying, incomplete: false };
    self.hardened[i].kind = kind.clone();
    self.index_of.insert(kind.clone(), idx);
    self.hardened[i].emitted = self.emit_ty(&kind, emitter);
  }

  // -- declarator-chain fragments ----------------------------------------

  /// Stage a pointer fragment whose pointee is not known yet (the
  /// declarator parser has only seen the `*` so far). Returns an un-
  /// hardened `Ty`; writes into it go through [`BaseChainRef`], and the
  /// whole chain is interned at once by [`Self::harden`].
  pub fn begin_ptr_fragment(&mut self) -> Ty {
    let idx = u32::try_from(self.fragments.len()).expect("fragment arena overflow");
    self.fragments.push(TypeKind::Ptr(Ty::UNDEF));
    Ty { index: TypeIndex::Fragment(idx), qualifiers: Qualifiers::empty() }
  }

  pub fn begin_array_fragment(&mut self, size: ArraySize) -> Ty {
    let idx = u32::try_from(self.fragments.len()).expect("fragment arena overflow");
    self.fragments.push(TypeKind::Array { elem: Ty::UNDEF, size });
    Ty { index: TypeIndex::Fragment(idx), qualifiers: Qualifiers::empty() }
  }

  pub fn begin_fn_fragment(&mut self, params: Vec<Ty>, vararg: bool) -> Ty {
    let idx = u32::try_from(self.fragments.len()).expect("fragment arena overflow");
    self.fragments.push(TypeKind::Fn { params, ret: Ty::UNDEF, vararg });
    Ty { index: TypeIndex::Fragment(idx), qualifiers: Qualifiers::empty() }
  }

  /// The fragment's current hole, if it has one (`DeclTypeBaseRef::operator*`
  /// / `operator bool` in the original).
  #[must_use]
  fn hole(&self, ty: Ty) -> Option<Ty> {
    match ty.index {
      TypeIndex::Fragment(i) => match &self.fragments[i as usize] {
        TypeKind::Ptr(t) | TypeKind::Array { elem: t, .. } | TypeKind::Fn { ret: t, .. } => Some(*t),
        _ => None,
      },
      TypeIndex::Hardened(_) => None,
    }
  }

  fn set_hole(&mut self, ty: Ty, value: Ty) {
    let TypeIndex::Fragment(i) = ty.index else { panic!("not a fragment") };
    match &mut self.fragments[i as usize] {
      TypeKind::Ptr(t) | TypeKind::Array { elem: t, .. } | TypeKind::Fn { ret: t, .. } => *t = value,
      _ => panic!("fragment has no hole to fill"),
    }
  }

  /// Recursively intern a fragment chain into the hardened table, folding
  /// in qualifiers accumulated on each link (`spec.md` §A6). Already-
  /// hardened types pass through unchanged.
  pub fn harden(&mut self, ty: Ty, emitter: &mut E) -> Ty {
    let TypeIndex::Fragment(i) = ty.index else { return ty };
    let kind = self.fragments[i as usize].clone();
    let hardened_kind = match kind {
      TypeKind::Ptr(inner) => TypeKind::Ptr(self.harden(inner, emitter)),
      TypeKind::Array { elem, size } => TypeKind::Array { elem: self.harden(elem, emitter), size },
      TypeKind::Fn { params, ret, vararg } => {
        let params = params.into_iter().map(|p| self.harden(p, emitter)).collect();
        TypeKind::Fn { params, ret: self.harden(ret, emitter), vararg }
      }
      other => other,
    };
    let idx = self.index_of.get(&hardened_kind).copied().unwrap_or_else(|| self.push_hardened(hardened_kind, emitter));
    Ty { index: TypeIndex::Hardened(idx), qualifiers: ty.qualifiers }
  }

  /// Drop all staged-but-never-hardened fragments (called between
  /// declarations, matching `TypeFactory::clearFragments`).
  pub fn clear_fragments(&mut self) {
    self.fragments.clear();
    self.fragments.push(TypeKind::Undef);
  }

  // -- arithmetic conversions --------------------------------------------

  #[must_use]
  pub fn is_arithmetic(&self, ty: Ty) -> bool { matches!(self.kind(ty), TypeKind::Int(..) | TypeKind::Float(_) | TypeKind::Enum { .. }) }

  #[must_use]
  pub fn is_integer(&self, ty: Ty) -> bool {
    match self.kind(ty) {
      TypeKind::Int(..) => true,
      TypeKind::Enum { underlying, .. } => self.is_integer(*underlying),
      _ => false,
    }
  }

  #[must_use]
  pub fn is_signed(&self, ty: Ty) -> bool {
    match self.kind(ty) {
      TypeKind::Int(IntWidth::Bool, _) => false,
      TypeKind::Int(_, unsigned) => !unsigned,
      TypeKind::Enum { underlying, .. } => self.is_signed(*underlying),
      _ => false,
    }
  }

  /// Rank used to order arithmetic types for the usual arithmetic
  /// conversions; mirrors `Base::rank()`'s reliance on `Kind`'s declaration
  /// order (integers, then floating types, each widening).
  #[must_use]
  pub fn rank(&self, ty: Ty) -> i32 {
    match self.kind(ty) {
      TypeKind::Int(w, _) => *w as i32,
      TypeKind::Float(w) => 6 + *w as i32,
      TypeKind::Enum { underlying, .. } => self.rank(*underlying),
      TypeKind::Undef => -1,
      _ => panic!("rank() of a non-arithmetic type"),
    }
  }

  /// Integer promotion (`spec.md` §4.6): anything ranked below `int`
  /// promotes to `int`/`unsigned int` of matching signedness; everything
  /// else passes through unchanged.
  #[must_use]
  pub fn promote(&self, ty: Ty) -> Ty {
    if self.is_integer(ty) && self.rank(ty) < IntWidth::Int as i32 {
      return self.int_ty(!self.is_signed(ty));
    }
    ty
  }

  /// `Type::commonRealType`, decoupled from the parser's own operator-kind
  /// enum: `is_unary` stands in for `op::Kind <= ALIGNOF` in the original
  /// (a unary/sizeof-like operator just yields its unqualified operand
  /// type, never a joint conversion of two operands).
  pub fn common_real_type(&mut self, is_unary: bool, lhs: Ty, rhs: Ty, emitter: &mut E) -> Ty {
    if lhs.is_undef() || rhs.is_undef() { return Ty::UNDEF }
    if is_unary { return lhs.unqualified() }

    let higher = if self.rank(lhs) > self.rank(rhs) || (self.rank(lhs) == self.rank(rhs) && !self.is_signed(lhs)) { lhs } else { rhs };
    if matches!(self.kind(higher), TypeKind::Float(_)) {
      return higher.unqualified();
    }

    let lhs_p = self.promote(lhs);
    let rhs_p = self.promote(rhs);
    if lhs_p == rhs_p {
      return lhs_p.unqualified();
    }
    if self.is_signed(lhs_p) == self.is_signed(rhs_p) {
      return (if self.rank(lhs_p) >= self.rank(rhs_p) { lhs_p } else { rhs_p }).unqualified();
    }

    let (unsigned_ty, signed_ty) = if self.is_signed(lhs_p) { (rhs_p, lhs_p) } else { (lhs_p, rhs_p) };
    if self.rank(unsigned_ty) >= self.rank(signed_ty) {
      return unsigned_ty.unqualified();
    }
    if self.rank(signed_ty) > self.rank(unsigned_ty) {
      return signed_ty.unqualified();
    }
    let w = match self.kind(signed_ty) {
      TypeKind::Int(w, _) => *w,
      _ => unreachable!("signed_ty must be an integer type"),
    };
    self.integral_ty(w, true, emitter)
  }

  /// Size in bytes, for `sizeof` (`spec.md` §4.6). Struct/union layout here
  /// is the naive sum/max of member sizes with no alignment or padding --
  /// bit-fields and flexible array members are non-goals (`spec.md` §1),
  /// and nothing in this core needs a byte-exact struct layout otherwise.
  /// Pointer width follows the `long_bits`-per-byte convention the only
  /// target this crate ships (`TargetInfo::lp64`) is named for.
  #[must_use]
  pub fn size_of_bytes(&self, ty: Ty) -> u64 {
    match self.kind(ty) {
      TypeKind::Undef | TypeKind::Void => 0,
      TypeKind::Int(IntWidth::Bool, _) => 1,
      TypeKind::Int(IntWidth::Char, _) => u64::from(self.target.char_bits) / 8,
      TypeKind::Int(IntWidth::Short, _) => u64::from(self.target.short_bits) / 8,
      TypeKind::Int(IntWidth::Int, _) => u64::from(self.target.int_bits) / 8,
      TypeKind::Int(IntWidth::Long, _) => u64::from(self.target.long_bits) / 8,
      TypeKind::Int(IntWidth::LongLong, _) => u64::from(self.target.long_long_bits) / 8,
      TypeKind::Float(FloatWidth::Float | FloatWidth::Decimal32) => 4,
      TypeKind::Float(FloatWidth::Double | FloatWidth::Decimal64) => 8,
      TypeKind::Float(FloatWidth::LongDouble | FloatWidth::Decimal128) => 16,
      TypeKind::NullptrT | TypeKind::Ptr(_) => u64::from(self.target.long_bits) / 8,
      TypeKind::Array { elem, size: ArraySize::Fixed(n) } => self.size_of_bytes(*elem) * n,
      TypeKind::Array { size: ArraySize::Unspecified | ArraySize::Vla, .. } => 0,
      TypeKind::Struct(agg) => agg.members.iter().map(|m| self.size_of_bytes(m.ty)).sum(),
      TypeKind::Union(agg) => agg.members.iter().map(|m| self.size_of_bytes(m.ty)).max().unwrap_or(0),
      TypeKind::Enum { underlying, .. } => self.size_of_bytes(*underlying),
      TypeKind::Fn { .. } => 1, // `sizeof` a function type is a GNU extension; 1 matches GCC/Clang
    }
  }
}

/// A write-through handle to the currently-open "hole" at the tip of a
/// partially-constructed derived type (pointer target / array element /
/// function return). Declarator parsing chains C's inside-out syntax by
/// repeatedly calling [`Self::chain`] as it walks outward from the
/// identifier being declared; ported from `BaseFactory::DeclTypeBaseRef`.
#[derive(Default)]
pub struct BaseChainRef {
  /// The very first type `chain` was called with -- the outermost layer
  /// of the declarator being built. Fixed once set.
  root: Option<Ty>,
  /// The fragment whose hole the *next* `chain` call writes into.
  cursor: Option<Ty>,
}

impl BaseChainRef {
  #[must_use]
  pub fn new() -> Self { Self::default() }

  #[must_use]
  pub fn is_empty(&self) -> bool { self.root.is_none() }

  /// Write `ty` into the current hole (if the chain has started) and make
  /// `ty` the new cursor, so the next `chain` call descends into *its*
  /// hole. The first call just records `ty` as the chain's root.
  pub fn chain<E: Emitter>(&mut self, factory: &mut TypeFactory<E>, ty: Ty) {
    match self.cursor {
      Some(cur) => factory.set_hole(cur, ty),
      None => self.root = Some(ty),
    }
    self.cursor = Some(ty);
  }

  /// The outermost type of the chain built so far, or `None` if nothing
  /// has been chained yet.
  #[must_use]
  pub fn root(&self) -> Option<Ty> { self.root }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::testutil::ReferenceEmitter;

  fn factory() -> (TypeFactory<ReferenceEmitter>, ReferenceEmitter) {
    let mut emitter = ReferenceEmitter::new();
    let factory = TypeFactory::new(crate::emit::TargetInfo::lp64(), &mut emitter);
    (factory, emitter)
  }

  #[test]
  fn primitives_are_distinct() {
    let (f, _e) = factory();
    assert_ne!(f.void_ty(), f.bool_ty());
    assert_ne!(f.int_ty(false), f.int_ty(true));
  }

  #[test]
  fn structural_types_are_interned() {
    let (mut f, mut e) = factory();
    let int_ty = f.int_ty(false);
    let p1 = f.ptr_to(int_ty, &mut e);
    let p2 = f.ptr_to(int_ty, &mut e);
    assert_eq!(p1, p2);
  }

  #[test]
  fn qualifiers_do_not_affect_interning_of_the_base() {
    let (mut f, mut e) = factory();
    let int_ty = f.int_ty(false);
    let p1 = f.ptr_to(int_ty, &mut e);
    let p1_const = p1.qualified(Qualifiers::CONST);
    assert_ne!(p1, p1_const);
    assert_eq!(p1_const.unqualified(), p1);
  }

  #[test]
  fn pointer_chain_hardens_through_fragments() {
    let (mut f, mut e) = factory();
    let mut chain = BaseChainRef::new();
    let p = f.begin_ptr_fragment();
    chain.chain(&mut f, p);
    let int_ty = f.int_ty(false);
    chain.chain(&mut f, int_ty);
    let hardened = f.harden(p, &mut e);
    assert_eq!(*f.kind(hardened), TypeKind::Ptr(int_ty));

    let direct = f.ptr_to(int_ty, &mut e);
    assert_eq!(hardened, direct, "chained pointer-to-int must dedupe with the directly-built one");
  }

  #[test]
  fn promotion_widens_sub_int_ranks() {
    let (mut f, mut e) = factory();
    let short_ty = f.integral_ty(IntWidth::Short, false, &mut e);
    let promoted = f.promote(short_ty);
    assert_eq!(promoted, f.int_ty(false));
  }

  #[test]
  fn common_real_type_prefers_unsigned_of_equal_rank() {
    let (mut f, mut e) = factory();
    let si = f.int_ty(false);
    let ui = f.int_ty(true);
    let common = f.common_real_type(false, si, ui, &mut e);
    assert_eq!(common, ui);
  }

  #[test]
  fn aggregate_completion_is_visible_through_prior_handle() {
    let (mut f, mut e) = factory();
    let name = crate::intern::intern("node");
    let tag = f.declare_aggregate(name, false, &mut e);
    assert!(matches!(f.kind(tag), TypeKind::Struct(a) if a.incomplete));
    let self_ptr = f.ptr_to(tag, &mut e);
    f.complete_aggregate(tag, vec![Member { name: crate::intern::intern("next"), ty: self_ptr }], &mut e);
    assert!(matches!(f.kind(tag), TypeKind::Struct(a) if !a.incomplete && a.members.len() == 1));
  }

  #[test]
  fn size_of_bytes_covers_scalars_pointers_and_arrays_on_lp64() {
    let (mut f, mut e) = factory();
    assert_eq!(f.size_of_bytes(f.int_ty(false)), 4);
    assert_eq!(f.size_of_bytes(f.size_ty()), 8, "size_t is modeled as unsigned long long");
    let int_ty = f.int_ty(false);
    let ptr_ty = f.ptr_to(int_ty, &mut e);
    assert_eq!(f.size_of_bytes(ptr_ty), 8, "lp64 pointers are long-width");
    let arr_ty = f.array_of(int_ty, ArraySize::Fixed(10), &mut e);
    assert_eq!(f.size_of_bytes(arr_ty), 40);
  }

  #[test]
  fn size_of_bytes_sums_struct_members_and_maxes_union_members() {
    let (mut f, mut e) = factory();
    let char_ty = f.integral_ty(IntWidth::Char, false, &mut e);
    let int_ty = f.int_ty(false);
    let members = vec![
      Member { name: crate::intern::intern("c"), ty: char_ty },
      Member { name: crate::intern::intern("i"), ty: int_ty },
    ];
    let name = crate::intern::intern("pair");
    let st = f.declare_aggregate(name, false, &mut e);
    f.complete_aggregate(st, members.clone(), &mut e);
    assert_eq!(f.size_of_bytes(st), 5, "naive layout has no padding between members");

    let un = f.declare_aggregate(crate::intern::intern("either"), true, &mut e);
    f.complete_aggregate(un, members, &mut e);
    assert_eq!(f.size_of_bytes(un), 4, "a union's size is its largest member, not the sum");
  }
}
