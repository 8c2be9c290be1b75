//! Structural equality of trees.
//!
//! Labels carry no meaning of their own, so two trees are equal when their
//! shapes match and their labels can be paired one-to-one consistently
//! across the whole comparison. Floating point literals compare by bit
//! pattern.

use std::collections::HashMap;

use super::types::*;

/// The label bijection built up while comparing two trees.
#[derive(Clone, Debug, Default)]
pub struct LabelContext {
    forward: HashMap<Label, Label>,
    backward: HashMap<Label, Label>,
}

impl LabelContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pairs `a` with `b`, or checks an existing pairing.
    pub fn is_same_label(&mut self, a: Label, b: Label) -> bool {
        match (self.forward.get(&a), self.backward.get(&b)) {
            (Some(&mapped), _) => mapped == b,
            (None, Some(_)) => false,
            (None, None) => {
                self.forward.insert(a, b);
                self.backward.insert(b, a);
                true
            }
        }
    }
}

fn literal_eq(a: &Literal, b: &Literal) -> bool {
    match (a, b) {
        (Literal::Bool(x), Literal::Bool(y)) => x == y,
        (Literal::Byte(x), Literal::Byte(y)) => x == y,
        (Literal::Short(x), Literal::Short(y)) => x == y,
        (Literal::Int(x), Literal::Int(y)) => x == y,
        (Literal::Long(x), Literal::Long(y)) => x == y,
        (Literal::Float(x), Literal::Float(y)) => x.to_bits() == y.to_bits(),
        (Literal::Double(x), Literal::Double(y)) => x.to_bits() == y.to_bits(),
        (Literal::Char(x), Literal::Char(y)) => x == y,
        (Literal::String(x), Literal::String(y)) => x == y,
        _ => false,
    }
}

fn all_eq<T>(a: &[T], b: &[T], ctx: &mut LabelContext, eq: fn(&T, &T, &mut LabelContext) -> bool) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| eq(x, y, ctx))
}

fn invocation_eq(a: &Invocation, b: &Invocation, ctx: &mut LabelContext) -> bool {
    a.kind == b.kind
        && a.owner == b.owner
        && a.name == b.name
        && a.descriptor == b.descriptor
        && match (&a.target, &b.target) {
            (Some(x), Some(y)) => expr_eq(x, y, ctx),
            (None, None) => true,
            _ => false,
        }
        && all_eq(&a.args, &b.args, ctx, expr_eq)
}

fn new_instance_eq(a: &NewInstance, b: &NewInstance, ctx: &mut LabelContext) -> bool {
    a.class_name == b.class_name && a.param_types == b.param_types && all_eq(&a.args, &b.args, ctx, expr_eq)
}

fn catch_eq(a: &Catch, b: &Catch, ctx: &mut LabelContext) -> bool {
    a.exception_type == b.exception_type && a.name == b.name && stmt_eq(&a.body, &b.body, ctx)
}

pub fn codedom_eq(a: &CodeDom, b: &CodeDom, ctx: &mut LabelContext) -> bool {
    match (a, b) {
        (CodeDom::Stmt(x), CodeDom::Stmt(y)) => stmt_eq(x, y, ctx),
        (CodeDom::Expr(x), CodeDom::Expr(y)) => expr_eq(x, y, ctx),
        _ => false,
    }
}

pub fn stmt_eq(a: &Stmt, b: &Stmt, ctx: &mut LabelContext) -> bool {
    use Stmt::*;
    match (a, b) {
        (Block(x), Block(y)) => all_eq(x, y, ctx, stmt_eq),
        (DeclareVar { ty: t1, name: n1 }, DeclareVar { ty: t2, name: n2 }) => t1 == t2 && n1 == n2,
        (AssignVar { name: n1, value: v1 }, AssignVar { name: n2, value: v2 }) => n1 == n2 && expr_eq(v1, v2, ctx),
        (
            AssignField { target: t1, name: n1, ty: y1, value: v1 },
            AssignField { target: t2, name: n2, ty: y2, value: v2 },
        ) => n1 == n2 && y1 == y2 && expr_eq(t1, t2, ctx) && expr_eq(v1, v2, ctx),
        (
            AssignStatic { owner: o1, name: n1, ty: y1, value: v1 },
            AssignStatic { owner: o2, name: n2, ty: y2, value: v2 },
        ) => o1 == o2 && n1 == n2 && y1 == y2 && expr_eq(v1, v2, ctx),
        (Increment { name: n1, amount: a1 }, Increment { name: n2, amount: a2 }) => n1 == n2 && a1 == a2,
        (Return, Return) | (BreakCase, BreakCase) | (SpliceOriginal, SpliceOriginal) => true,
        (ReturnValue(x), ReturnValue(y)) | (Throw(x), Throw(y)) => expr_eq(x, y, ctx),
        (
            IfElse { cond: c1, then: t1, otherwise: e1 },
            IfElse { cond: c2, then: t2, otherwise: e2 },
        ) => expr_eq(c1, c2, ctx) && stmt_eq(t1, t2, ctx) && stmt_eq(e1, e2, ctx),
        (IfJump { cond: c1, label: l1 }, IfJump { cond: c2, label: l2 }) => {
            expr_eq(c1, c2, ctx) && ctx.is_same_label(*l1, *l2)
        }
        (Mark(x), Mark(y)) | (Goto(x), Goto(y)) => ctx.is_same_label(*x, *y),
        (
            Switch { value: v1, cases: c1, default: d1 },
            Switch { value: v2, cases: c2, default: d2 },
        ) => {
            expr_eq(v1, v2, ctx)
                && c1.len() == c2.len()
                && c1
                    .iter()
                    .zip(c2)
                    .all(|((k1, s1), (k2, s2))| k1 == k2 && stmt_eq(s1, s2, ctx))
                && stmt_eq(d1, d2, ctx)
        }
        (
            RawSwitch { value: v1, default: d1, keys: k1, labels: l1 },
            RawSwitch { value: v2, default: d2, keys: k2, labels: l2 },
        ) => {
            expr_eq(v1, v2, ctx)
                && ctx.is_same_label(*d1, *d2)
                && k1 == k2
                && l1.len() == l2.len()
                && l1.iter().zip(l2).all(|(x, y)| ctx.is_same_label(*x, *y))
        }
        (Invoke(x), Invoke(y)) => invocation_eq(x, y, ctx),
        (NewInstance(x), NewInstance(y)) => new_instance_eq(x, y, ctx),
        (
            ArrayStore { array: a1, index: i1, value: v1 },
            ArrayStore { array: a2, index: i2, value: v2 },
        ) => expr_eq(a1, a2, ctx) && expr_eq(i1, i2, ctx) && expr_eq(v1, v2, ctx),
        (TryCatch { body: b1, catches: c1 }, TryCatch { body: b2, catches: c2 }) => {
            stmt_eq(b1, b2, ctx) && all_eq(c1, c2, ctx, catch_eq)
        }
        (NamedMark(x), NamedMark(y)) | (NamedGoto(x), NamedGoto(y)) => x == y,
        _ => false,
    }
}

pub fn expr_eq(a: &Expr, b: &Expr, ctx: &mut LabelContext) -> bool {
    use Expr::*;
    match (a, b) {
        (Literal(x), Literal(y)) => literal_eq(x, y),
        (Null, Null) | (This, This) | (SpliceOriginal, SpliceOriginal) => true,
        (Arithmetic { op: o1, lhs: l1, rhs: r1 }, Arithmetic { op: o2, lhs: l2, rhs: r2 }) => {
            o1 == o2 && expr_eq(l1, l2, ctx) && expr_eq(r1, r2, ctx)
        }
        (Shift { op: o1, lhs: l1, rhs: r1 }, Shift { op: o2, lhs: l2, rhs: r2 }) => {
            o1 == o2 && expr_eq(l1, l2, ctx) && expr_eq(r1, r2, ctx)
        }
        (Bitwise { op: o1, lhs: l1, rhs: r1 }, Bitwise { op: o2, lhs: l2, rhs: r2 }) => {
            o1 == o2 && expr_eq(l1, l2, ctx) && expr_eq(r1, r2, ctx)
        }
        (Logical { op: o1, lhs: l1, rhs: r1 }, Logical { op: o2, lhs: l2, rhs: r2 }) => {
            o1 == o2 && expr_eq(l1, l2, ctx) && expr_eq(r1, r2, ctx)
        }
        (Compare { op: o1, lhs: l1, rhs: r1 }, Compare { op: o2, lhs: l2, rhs: r2 }) => {
            o1 == o2 && expr_eq(l1, l2, ctx) && expr_eq(r1, r2, ctx)
        }
        (Identity { op: o1, lhs: l1, rhs: r1 }, Identity { op: o2, lhs: l2, rhs: r2 }) => {
            o1 == o2 && expr_eq(l1, l2, ctx) && expr_eq(r1, r2, ctx)
        }
        (Not(x), Not(y)) | (Negate(x), Negate(y)) | (ArrayLength(x), ArrayLength(y)) => expr_eq(x, y, ctx),
        (Var(x), Var(y)) | (ClassLiteral(x), ClassLiteral(y)) | (Dup(x), Dup(y)) | (LetBe(x), LetBe(y)) => x == y,
        (Field { target: t1, name: n1, ty: y1 }, Field { target: t2, name: n2, ty: y2 }) => {
            n1 == n2 && y1 == y2 && expr_eq(t1, t2, ctx)
        }
        (
            StaticField { owner: o1, name: n1, ty: y1 },
            StaticField { owner: o2, name: n2, ty: y2 },
        ) => o1 == o2 && n1 == n2 && y1 == y2,
        (InstanceOf { value: v1, ty: t1 }, InstanceOf { value: v2, ty: t2 })
        | (Cast { value: v1, ty: t1 }, Cast { value: v2, ty: t2 }) => t1 == t2 && expr_eq(v1, v2, ctx),
        (Invoke(x), Invoke(y)) => invocation_eq(x, y, ctx),
        (NewInstance(x), NewInstance(y)) => new_instance_eq(x, y, ctx),
        (
            IfElse { cond: c1, then: t1, otherwise: e1 },
            IfElse { cond: c2, then: t2, otherwise: e2 },
        ) => expr_eq(c1, c2, ctx) && expr_eq(t1, t2, ctx) && expr_eq(e1, e2, ctx),
        (Block(x), Block(y)) => all_eq(x, y, ctx, codedom_eq),
        (Top { value: v1, usage: u1 }, Top { value: v2, usage: u2 }) => {
            let used1 = u1.apply(placeholder_dup(), placeholder_let_be());
            let used2 = u2.apply(placeholder_dup(), placeholder_let_be());
            expr_eq(v1, v2, ctx) && expr_eq(&used1, &used2, ctx)
        }
        _ => false,
    }
}

// Usages are compared by what they build from typeless placeholders.
fn placeholder_dup() -> Expr {
    Expr::Dup(String::new())
}

fn placeholder_let_be() -> Expr {
    Expr::LetBe(String::new())
}

impl PartialEq for Stmt {
    fn eq(&self, other: &Self) -> bool {
        stmt_eq(self, other, &mut LabelContext::new())
    }
}

impl PartialEq for Expr {
    fn eq(&self, other: &Self) -> bool {
        expr_eq(self, other, &mut LabelContext::new())
    }
}

impl PartialEq for CodeDom {
    fn eq(&self, other: &Self) -> bool {
        codedom_eq(self, other, &mut LabelContext::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::factory::*;

    #[test]
    fn labels_compare_under_bijection() {
        let mut arena = LabelArena::new();
        let (a, b) = (arena.fresh(), arena.fresh());
        let mut other = LabelArena::new();
        other.fresh();
        other.fresh();
        let (x, y) = (other.fresh(), other.fresh());

        let left = block(vec![goto(a), mark(b), mark(a)]);
        let right = block(vec![goto(x), mark(y), mark(x)]);
        assert_eq!(left, right);

        let crossed = block(vec![goto(x), mark(y), mark(y)]);
        assert_ne!(left, crossed);
    }

    #[test]
    fn one_label_cannot_pair_with_two() {
        let mut ctx = LabelContext::new();
        let mut arena = LabelArena::new();
        let (a, b, c) = (arena.fresh(), arena.fresh(), arena.fresh());
        assert!(ctx.is_same_label(a, b));
        assert!(!ctx.is_same_label(a, c));
        assert!(!ctx.is_same_label(c, b));
        assert!(ctx.is_same_label(a, b));
    }

    #[test]
    fn floats_compare_by_bits() {
        assert_eq!(float(f32::NAN), float(f32::NAN));
        assert_ne!(double(0.0), double(-0.0));
        assert_ne!(int(1), long(1));
    }

    #[test]
    fn top_compares_usage_results() {
        let a = top(var("x"), |dup, value| add(dup, value));
        let b = top(var("x"), |dup, value| add(dup, value));
        let c = top(var("x"), |dup, value| add(value, dup));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
