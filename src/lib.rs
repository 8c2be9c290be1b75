//! A bidirectional compiler core for JVM method bodies.
//!
//! Method bodies are decompiled from a symbolic instruction stream into a
//! structured statement/expression tree ([`dom`]), can be inspected and
//! rewritten there, and are recompiled back into the instruction stream.
//!
//! ```rust
//! use classfile_codedom::dom::factory::*;
//! use classfile_codedom::dom::Stmt;
//!
//! let body = block(vec![ret_value(add(int(1), var("arg0")))]);
//! assert_eq!(body.to_string(), "{\n    return 1 + arg0;\n}");
//! # let _: Stmt = body;
//! ```

#[macro_use]
extern crate bitflags;

pub mod descriptor;
pub mod dom;
pub mod insn;
pub mod scope;

#[cfg(feature = "decompile")]
pub mod decompile;

#[cfg(feature = "recompile")]
pub mod recompile;

#[cfg(feature = "assemble")]
pub mod assemble;

pub use dom::{CodeDom, Expr, Label, MethodDom, Stmt};
pub use insn::{Insn, InsnList, MethodBody, MethodInfo};
