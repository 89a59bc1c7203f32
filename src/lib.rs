//! `qcpc` is the single-pass parser/typechecker/IR-lowering core of a C
//! front-end: it turns a stream of preprocessed tokens into a typed, lowered
//! IR via a pluggable [`emit::Emitter`] backend.
//!
//! The lexical tokenizer, the backend behind [`emit::Emitter`], the
//! preprocessor, and the command-line driver are external collaborators and
//! are not part of this crate; only the contracts they exchange with the
//! core (tokens in, emitter calls out) are modeled here.

pub mod diag;
pub mod emit;
pub mod intern;
pub mod scope;
pub mod token;
pub mod types;

pub mod declarator;
pub mod expr;
pub mod stmt;

pub mod driver;
pub mod parser;

#[cfg(any(test, feature = "test-util"))]
pub mod testutil;

pub use diag::{DiagnosticTracker, Severity, SrcLoc};
pub use driver::parse_translation_unit;
pub use emit::{Emitter, TargetInfo};
pub use intern::{intern, Symbol};
pub use parser::Parser;
pub use types::{Ty, TypeFactory, TypeKind};
