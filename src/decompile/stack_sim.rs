//! Operand stack entries and the expression shapes built from them.
//!
//! An entry is resolved to a tree node only when it is consumed. Entries that
//! are `pure` may be inlined anywhere; the rest are reified into temporaries
//! whenever a statement is emitted below them.

use crate::descriptor::{self, BOOLEAN, BYTE, CHAR, INT, SHORT};
use crate::dom::factory::*;
use crate::dom::{ArithmeticOp, CompareOp, Expr, IdentityOp, Literal};
use crate::insn::CompareInsn;

#[derive(Clone, Debug)]
pub enum Value {
    Expr(Expr),
    /// The -1/0/1 result of `lcmp`, `fcmpl`, ...; only meaningful to a zero test.
    Cmp { insn: CompareInsn, lhs: Expr, rhs: Expr },
    /// An object allocated by `new` whose constructor has not run yet.
    Uninit { class_name: String },
}

#[derive(Clone, Debug)]
pub struct Entry {
    /// Identifies the producer; copies made by `dup` share it.
    pub id: u32,
    pub value: Value,
    pub ty: String,
    pub pure: bool,
    /// Local slots the value reads.
    pub reads: Vec<u16>,
}

impl Entry {
    pub fn expr(&self) -> Option<&Expr> {
        match &self.value {
            Value::Expr(e) => Some(e),
            _ => None,
        }
    }

    pub fn is_wide(&self) -> bool {
        descriptor::slot_width(&self.ty) == 2
    }

    pub fn reads_slot(&self, slot: u16) -> bool {
        self.reads.contains(&slot)
    }

    /// Needs a temporary before any statement is emitted below it.
    pub fn must_reify(&self) -> bool {
        !self.pure && matches!(self.value, Value::Expr(_) | Value::Cmp { .. })
    }
}

/// Merges the slot lists of combined operands.
pub fn union_reads(a: &[u16], b: &[u16]) -> Vec<u16> {
    let mut reads = a.to_vec();
    for slot in b {
        if !reads.contains(slot) {
            reads.push(*slot);
        }
    }
    reads
}

/// Whether an arithmetic node may be reordered freely. Division can throw.
pub fn is_pure_arithmetic(op: ArithmeticOp, kind_is_integral: bool) -> bool {
    !(kind_is_integral && matches!(op, ArithmeticOp::Div | ArithmeticOp::Rem))
}

/// Reinterprets an `int` literal as the sub-int type the machine stored it for.
pub fn narrow_literal(expr: Expr, target: &str) -> Expr {
    match expr {
        Expr::Literal(Literal::Int(v)) => match target {
            BOOLEAN => boolean(v != 0),
            BYTE => byte(v as i8),
            SHORT => short(v as i16),
            CHAR => char(v as u16),
            _ => int(v),
        },
        other => other,
    }
}

/// Makes an `int`-kind operand acceptable to the promotion rules: sub-int
/// literals are kept, `char` and `boolean` operands are cast to `int`.
pub fn int_operand(expr: Expr, ty: &str) -> (Expr, String) {
    match ty {
        BYTE | SHORT | INT => (expr, ty.to_string()),
        _ => (cast(expr, INT), INT.to_string()),
    }
}

/// Operands of an `if_icmp<cond>`: literals take the other side's type.
pub fn int_compare_operands(lhs: (Expr, String), rhs: (Expr, String)) -> (Expr, Expr) {
    let ((mut l, lt), (mut r, rt)) = (lhs, rhs);
    if descriptor::compare_result_type(&lt, &rt).is_some() {
        return (l, r);
    }
    if matches!(r, Expr::Literal(Literal::Int(_))) {
        r = narrow_literal(r, &lt);
        return (l, r);
    }
    if matches!(l, Expr::Literal(Literal::Int(_))) {
        l = narrow_literal(l, &rt);
        return (l, r);
    }
    (int_operand(l, &lt).0, int_operand(r, &rt).0)
}

/// Build a branch condition for `if<cond>` opcodes that compare against zero.
///
/// A pending `lcmp`/`fcmp`/`dcmp` result folds into a direct comparison; the
/// NaN behaviour of the float variants is kept by negating the opposite test.
pub fn make_if_zero_cond(value: Value, ty: &str, op: CompareOp) -> Option<Expr> {
    match value {
        Value::Cmp { insn, lhs, rhs } => {
            let nan_jumps = match insn.nan_result() {
                1 => matches!(op, CompareOp::Gt | CompareOp::Ge | CompareOp::Ne),
                -1 => matches!(op, CompareOp::Lt | CompareOp::Le | CompareOp::Ne),
                _ => false,
            };
            // Source comparisons are false on NaN except `!=`.
            Some(if nan_jumps && op != CompareOp::Ne {
                not(compare(op.negate(), lhs, rhs))
            } else {
                compare(op, lhs, rhs)
            })
        }
        Value::Expr(expr) => Some(match (ty, op) {
            (BOOLEAN, CompareOp::Ne) => expr,
            (BOOLEAN, CompareOp::Eq) => match expr {
                Expr::Not(inner) => *inner,
                other => not(other),
            },
            (BOOLEAN, _) => compare(op, cast(expr, INT), int(0)),
            (BYTE | SHORT | CHAR, _) => compare(op, expr, narrow_literal(int(0), ty)),
            _ => compare(op, expr, int(0)),
        }),
        Value::Uninit { .. } => None,
    }
}

pub fn identity_cond(op: IdentityOp, lhs: Expr, rhs: Expr) -> Expr {
    identity(op, lhs, rhs)
}

/// The tree node for a constant instruction, with its type.
pub fn constant_expr(constant: &crate::insn::Constant) -> (Expr, String) {
    use crate::insn::Constant;
    match constant {
        Constant::Null => (null(), descriptor::OBJECT.to_string()),
        Constant::Int(v) => (int(*v), INT.to_string()),
        Constant::Long(v) => (long(*v), descriptor::LONG.to_string()),
        Constant::Float(v) => (float(*v), descriptor::FLOAT.to_string()),
        Constant::Double(v) => (double(*v), descriptor::DOUBLE.to_string()),
        Constant::String(v) => (string(v.clone()), descriptor::STRING.to_string()),
        Constant::Class(desc) => (class_literal(desc.clone()), descriptor::CLASS.to_string()),
    }
}

/// Heuristic: does this expression have side effects a temporary must preserve?
pub fn has_side_effects(expr: &Expr) -> bool {
    matches!(expr, Expr::Invoke(_) | Expr::NewInstance(_))
}
