//! SQL module
//!
//! Statement trees consumed by the engine. Text parsing is left to the
//! embedding application.

pub mod ast;

pub use ast::{Expr, Ident, Statement};
