//! Postfix formula engine
//!
//! Compiles textual postfix formulas into typed op-lists and evaluates
//! them against a reusable dual stack.
//!
//! # Design
//!
//! - `compile` type-checks with a symbolic stack before any evaluation;
//!   an accepted formula leaves exactly one value of the requested kind
//! - `Program::eval` never fails: arithmetic follows IEEE-754 and lets
//!   NaN/Inf propagate
//! - the evaluation stack is owned by the caller and passed by reference,
//!   so evaluation cannot re-enter itself

pub mod compile;
pub mod eval;
pub mod lexer;
pub mod ops;
pub mod source;

pub use compile::{CompileError, compile};
pub use eval::{EvalStack, Value};
pub use ops::{Builtin, Op, Program, SlotId, ValueKind};
pub use source::{NoSources, NumGetter, Source, SourceResolver, StrGetter};
