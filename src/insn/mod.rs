//! The symbolic instruction stream a method body is made of.

pub mod types;
pub mod visitor;

pub use types::*;
pub use visitor::InsnVisitor;
