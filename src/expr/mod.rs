//! Small expression languages over record fields: arithmetic for derived
//! features, boolean predicates for cuts.

pub mod arith;
pub mod lexer;
pub mod predicate;

pub use arith::{ArithExpr, BoundArith};
pub use predicate::{BoundPredicate, CmpOp, Predicate};
