//! Read-only traversal over trees.
//!
//! Override the `visit_*` methods of interest and call the matching `walk_*`
//! function to keep descending.

use super::types::*;

/// How a label occurs in a tree.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LabelRole {
    Mark,
    Jump,
}

pub trait Visitor {
    fn visit_stmt(&mut self, stmt: &Stmt) {
        walk_stmt(self, stmt)
    }

    fn visit_expr(&mut self, expr: &Expr) {
        walk_expr(self, expr)
    }

    fn visit_label(&mut self, _label: Label, _role: LabelRole) {}
}

pub fn walk_codedom<V: Visitor + ?Sized>(visitor: &mut V, node: &CodeDom) {
    match node {
        CodeDom::Stmt(stmt) => visitor.visit_stmt(stmt),
        CodeDom::Expr(expr) => visitor.visit_expr(expr),
    }
}

fn walk_invocation<V: Visitor + ?Sized>(visitor: &mut V, invocation: &Invocation) {
    if let Some(target) = &invocation.target {
        visitor.visit_expr(target);
    }
    for arg in &invocation.args {
        visitor.visit_expr(arg);
    }
}

pub fn walk_stmt<V: Visitor + ?Sized>(visitor: &mut V, stmt: &Stmt) {
    match stmt {
        Stmt::Block(stmts) => {
            for s in stmts {
                visitor.visit_stmt(s);
            }
        }
        Stmt::AssignVar { value, .. } | Stmt::AssignStatic { value, .. } => visitor.visit_expr(value),
        Stmt::AssignField { target, value, .. } => {
            visitor.visit_expr(target);
            visitor.visit_expr(value);
        }
        Stmt::ReturnValue(value) | Stmt::Throw(value) => visitor.visit_expr(value),
        Stmt::IfElse { cond, then, otherwise } => {
            visitor.visit_expr(cond);
            visitor.visit_stmt(then);
            visitor.visit_stmt(otherwise);
        }
        Stmt::IfJump { cond, label } => {
            visitor.visit_expr(cond);
            visitor.visit_label(*label, LabelRole::Jump);
        }
        Stmt::Mark(label) => visitor.visit_label(*label, LabelRole::Mark),
        Stmt::Goto(label) => visitor.visit_label(*label, LabelRole::Jump),
        Stmt::Switch { value, cases, default } => {
            visitor.visit_expr(value);
            for body in cases.values() {
                visitor.visit_stmt(body);
            }
            visitor.visit_stmt(default);
        }
        Stmt::RawSwitch { value, default, labels, .. } => {
            visitor.visit_expr(value);
            for label in labels {
                visitor.visit_label(*label, LabelRole::Jump);
            }
            visitor.visit_label(*default, LabelRole::Jump);
        }
        Stmt::Invoke(invocation) => walk_invocation(visitor, invocation),
        Stmt::NewInstance(new) => {
            for arg in &new.args {
                visitor.visit_expr(arg);
            }
        }
        Stmt::ArrayStore { array, index, value } => {
            visitor.visit_expr(array);
            visitor.visit_expr(index);
            visitor.visit_expr(value);
        }
        Stmt::TryCatch { body, catches } => {
            visitor.visit_stmt(body);
            for catch in catches {
                visitor.visit_stmt(&catch.body);
            }
        }
        Stmt::DeclareVar { .. }
        | Stmt::Increment { .. }
        | Stmt::Return
        | Stmt::BreakCase
        | Stmt::SpliceOriginal
        | Stmt::NamedMark(_)
        | Stmt::NamedGoto(_) => {}
    }
}

pub fn walk_expr<V: Visitor + ?Sized>(visitor: &mut V, expr: &Expr) {
    match expr {
        Expr::Arithmetic { lhs, rhs, .. }
        | Expr::Shift { lhs, rhs, .. }
        | Expr::Bitwise { lhs, rhs, .. }
        | Expr::Logical { lhs, rhs, .. }
        | Expr::Compare { lhs, rhs, .. }
        | Expr::Identity { lhs, rhs, .. } => {
            visitor.visit_expr(lhs);
            visitor.visit_expr(rhs);
        }
        Expr::Not(value)
        | Expr::Negate(value)
        | Expr::ArrayLength(value)
        | Expr::InstanceOf { value, .. }
        | Expr::Cast { value, .. }
        | Expr::Field { target: value, .. } => visitor.visit_expr(value),
        Expr::Invoke(invocation) => walk_invocation(visitor, invocation),
        Expr::NewInstance(new) => {
            for arg in &new.args {
                visitor.visit_expr(arg);
            }
        }
        Expr::IfElse { cond, then, otherwise } => {
            visitor.visit_expr(cond);
            visitor.visit_expr(then);
            visitor.visit_expr(otherwise);
        }
        Expr::Block(members) => {
            for member in members {
                walk_codedom(visitor, member);
            }
        }
        Expr::Top { value, usage } => {
            visitor.visit_expr(value);
            let used = usage.apply(Expr::Dup(String::new()), Expr::LetBe(String::new()));
            visitor.visit_expr(&used);
        }
        Expr::Literal(_)
        | Expr::Null
        | Expr::Var(_)
        | Expr::StaticField { .. }
        | Expr::This
        | Expr::ClassLiteral(_)
        | Expr::Dup(_)
        | Expr::LetBe(_)
        | Expr::SpliceOriginal => {}
    }
}

struct LabelCollector<'f> {
    f: &'f mut dyn FnMut(Label),
}

impl Visitor for LabelCollector<'_> {
    fn visit_label(&mut self, label: Label, _role: LabelRole) {
        (self.f)(label)
    }
}

/// Calls `f` for every label occurrence in `tree`.
pub fn for_each_label(tree: &Stmt, f: &mut dyn FnMut(Label)) {
    LabelCollector { f }.visit_stmt(tree);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::factory::*;

    #[derive(Default)]
    struct Counter {
        vars: Vec<String>,
        marks: usize,
        jumps: usize,
    }

    impl Visitor for Counter {
        fn visit_expr(&mut self, expr: &Expr) {
            if let Expr::Var(name) = expr {
                self.vars.push(name.clone());
            }
            walk_expr(self, expr)
        }

        fn visit_label(&mut self, _label: Label, role: LabelRole) {
            match role {
                LabelRole::Mark => self.marks += 1,
                LabelRole::Jump => self.jumps += 1,
            }
        }
    }

    #[test]
    fn visits_nested_nodes_in_order() {
        let mut arena = LabelArena::new();
        let l = arena.fresh();
        let tree = block(vec![
            if_jump(lt(var("a"), var("b")), l),
            assign_var("c", top(var("d"), |dup, it| add(dup, it))),
            mark(l),
            goto(l),
        ]);
        let mut counter = Counter::default();
        counter.visit_stmt(&tree);
        assert_eq!(counter.vars, vec!["a", "b", "d"]);
        assert_eq!((counter.marks, counter.jumps), (1, 2));
    }

    #[test]
    fn arena_above_skips_used_labels() {
        let mut arena = LabelArena::new();
        let (a, b) = (arena.fresh(), arena.fresh());
        let tree = block(vec![goto(b), mark(a), mark(b)]);
        let mut next = LabelArena::above(&tree);
        assert_eq!(next.fresh().index(), 2);
    }
}
