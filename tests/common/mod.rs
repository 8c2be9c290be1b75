#![allow(dead_code)]

pub mod machine;

use classfile_codedom::dom::factory::{invocation, invoke_expr, invoke_stmt};
use classfile_codedom::dom::{Expr, InvokeKind, Stmt};
use classfile_codedom::insn::{MethodAccessFlags, MethodInfo};

pub const OWNER: &str = "demo/Service";

pub fn static_info(name: &str, descriptor: &str) -> MethodInfo {
    MethodInfo::new(OWNER, name, descriptor).with_flags(MethodAccessFlags::STATIC)
}

/// `Service.name()` as a statement.
pub fn call(name: &str, descriptor: &str) -> Stmt {
    invoke_stmt(invocation(InvokeKind::Static, OWNER, name, descriptor, None, vec![]).unwrap())
}

/// `Service.name()` as a value.
pub fn call_value(name: &str, descriptor: &str) -> Expr {
    invoke_expr(invocation(InvokeKind::Static, OWNER, name, descriptor, None, vec![]).unwrap()).unwrap()
}
