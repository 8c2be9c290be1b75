//! Statement and expression lowering.

use std::collections::BTreeMap;

use tracing::trace;

use crate::descriptor::{
    self, is_int_like, is_numeric, is_reference, ValueKind, BOOLEAN, CLASS, DOUBLE, FLOAT, INT, LONG, VOID,
};
use crate::dom::visit::{walk_expr, walk_stmt, Visitor};
use crate::dom::{
    CodeDom, CompareOp, DomError, Expr, IdentityOp, Invocation, Literal, LogicalOp, NewInstance, Stmt, TopUsage,
};
use crate::insn::{self, ArrayKind, CompareInsn, Constant, FieldOp, Insn, JumpCond, StackOp, TypeOp};

use super::infer::{assignment_conversion, cast_conversions, unify_arms, NULL_TYPE};
use super::{ExitRewrite, Flow, RecompileError, Recompiler};

type Result<T> = std::result::Result<T, RecompileError>;

fn kind_of(desc: &str) -> Result<ValueKind> {
    ValueKind::of(desc).ok_or_else(|| RecompileError::InvalidDescriptor {
        descriptor: desc.to_string(),
    })
}

fn operand_types(op: impl std::fmt::Debug, lhs: &str, rhs: &str) -> RecompileError {
    RecompileError::OperandTypes {
        op: format!("{:?}", op).to_lowercase(),
        lhs: lhs.to_string(),
        rhs: rhs.to_string(),
    }
}

fn is_reference_or_null(desc: &str) -> bool {
    desc == NULL_TYPE || is_reference(desc)
}

/// The type of a zero literal an `if<cond>` can test against directly.
fn zero_literal_type(expr: &Expr) -> Option<&'static str> {
    match expr {
        Expr::Literal(lit) if is_int_like(lit.descriptor()) && lit.as_int() == Some(0) => Some(lit.descriptor()),
        _ => None,
    }
}

/// `tableswitch` when at least half the key range is used, `lookupswitch` otherwise.
/// `pairs` must be sorted by key.
fn dispatch(default: insn::Label, pairs: &[(i32, insn::Label)]) -> Insn {
    if let (Some(&(low, _)), Some(&(high, _))) = (pairs.first(), pairs.last()) {
        let span = (high as i64 - low as i64 + 1) as usize;
        if pairs.len() * 2 >= span {
            let mut targets = vec![default; span];
            for (key, label) in pairs {
                targets[(*key as i64 - low as i64) as usize] = *label;
            }
            return Insn::TableSwitch {
                low,
                high,
                default,
                targets,
            };
        }
    }
    Insn::LookupSwitch {
        default,
        pairs: pairs.to_vec(),
    }
}

struct FindTry(bool);

impl Visitor for FindTry {
    fn visit_stmt(&mut self, stmt: &Stmt) {
        if matches!(stmt, Stmt::TryCatch { .. }) {
            self.0 = true;
        } else {
            walk_stmt(self, stmt)
        }
    }
}

fn contains_try(stmt: &Stmt) -> bool {
    let mut finder = FindTry(false);
    finder.visit_stmt(stmt);
    finder.0
}

struct CountLetBe(usize);

impl Visitor for CountLetBe {
    fn visit_expr(&mut self, expr: &Expr) {
        match expr {
            Expr::LetBe(_) => self.0 += 1,
            // A nested top binds its own value.
            Expr::Top { value, .. } => self.visit_expr(value),
            _ => walk_expr(self, expr),
        }
    }
}

impl Recompiler<'_> {
    pub(super) fn emit_stmt(&mut self, stmt: &Stmt, exit: Option<ExitRewrite>) -> Result<()> {
        match stmt {
            Stmt::Block(stmts) => {
                self.scope.enter();
                let emitted = stmts.iter().try_for_each(|s| self.emit_stmt(s, exit));
                self.scope.exit();
                emitted
            }
            Stmt::DeclareVar { ty, name } => {
                self.check_value_type(ty)?;
                self.scope.declare(name, ty)?;
                Ok(())
            }
            Stmt::AssignVar { name, value } => {
                let (slot, desc) = self.lookup(name)?;
                self.emit_sink(value, &desc, "assignment", exit)?;
                self.push(Insn::Store {
                    kind: kind_of(&desc)?,
                    slot,
                });
                Ok(())
            }
            Stmt::AssignField {
                target,
                name,
                ty,
                value,
            } => {
                let owner = self.emit_receiver(target, exit)?;
                self.emit_sink(value, ty, "field store", exit)?;
                self.push(Insn::Field {
                    op: FieldOp::PutField,
                    owner,
                    name: name.clone(),
                    descriptor: ty.clone(),
                });
                Ok(())
            }
            Stmt::AssignStatic { owner, name, ty, value } => {
                self.emit_sink(value, ty, "static field store", exit)?;
                self.push(Insn::Field {
                    op: FieldOp::PutStatic,
                    owner: owner.clone(),
                    name: name.clone(),
                    descriptor: ty.clone(),
                });
                Ok(())
            }
            Stmt::Increment { name, amount } => {
                let (slot, desc) = self.lookup(name)?;
                if !is_int_like(&desc) {
                    return Err(RecompileError::Incompatible {
                        context: "increment",
                        from: desc,
                        to: INT.into(),
                    });
                }
                self.push(Insn::Iinc { slot, amount: *amount });
                Ok(())
            }
            Stmt::Return => self.emit_return(None, exit),
            Stmt::ReturnValue(value) => self.emit_return(Some(value), exit),
            Stmt::IfElse { cond, then, otherwise } => {
                let else_label = self.new_label();
                self.emit_condition(cond, else_label, false, exit)?;
                self.emit_stmt(then, exit)?;
                if otherwise.is_empty_block() {
                    self.push(Insn::Mark(else_label));
                    return Ok(());
                }
                let end = if self.falls_through() {
                    let end = self.new_label();
                    self.jump(end);
                    Some(end)
                } else {
                    None
                };
                self.push(Insn::Mark(else_label));
                self.emit_stmt(otherwise, exit)?;
                if let Some(end) = end {
                    self.push(Insn::Mark(end));
                }
                Ok(())
            }
            Stmt::IfJump { cond, label } => {
                let target = self.jump_target(*label);
                self.emit_condition(cond, target, true, exit)
            }
            Stmt::BreakCase => {
                let (end, used) = self.breaks.last_mut().ok_or(RecompileError::BreakOutsideSwitch)?;
                *used = true;
                let end = *end;
                self.jump(end);
                Ok(())
            }
            Stmt::Mark(label) => {
                let target = self.mark_target(*label)?;
                self.push(Insn::Mark(target));
                Ok(())
            }
            Stmt::Goto(label) => {
                let target = self.jump_target(*label);
                self.jump(target);
                Ok(())
            }
            Stmt::Switch { value, cases, default } => self.emit_switch(value, cases, default, exit),
            Stmt::RawSwitch {
                value,
                default,
                keys,
                labels,
            } => {
                self.emit_int(value, "switch", exit)?;
                let default = self.jump_target(*default);
                let mut pairs: Vec<(i32, insn::Label)> = Vec::with_capacity(keys.len());
                for (key, label) in keys.iter().zip(labels) {
                    if !pairs.iter().any(|(k, _)| k == key) {
                        pairs.push((*key, self.jump_target(*label)));
                    }
                }
                pairs.sort_by_key(|(k, _)| *k);
                self.push(dispatch(default, &pairs));
                Ok(())
            }
            Stmt::Invoke(invocation) => {
                let ret = self.emit_invocation(invocation, exit)?;
                self.discard(&ret);
                Ok(())
            }
            Stmt::NewInstance(new) => {
                self.emit_new(new, exit)?;
                self.push(Insn::Stack(StackOp::Pop));
                Ok(())
            }
            Stmt::ArrayStore { array, index, value } => {
                let array_ty = self.emit_expr(array, Flow::Value, exit)?;
                let element = match array_ty.strip_prefix('[') {
                    Some(element) => element.to_string(),
                    None => {
                        return Err(RecompileError::Incompatible {
                            context: "array store",
                            from: array_ty,
                            to: "an array".into(),
                        })
                    }
                };
                self.emit_int(index, "array index", exit)?;
                self.emit_sink(value, &element, "array store", exit)?;
                let kind = ArrayKind::for_element(&element).ok_or(RecompileError::InvalidDescriptor {
                    descriptor: array_ty,
                })?;
                self.push(Insn::ArrayStore(kind));
                Ok(())
            }
            Stmt::Throw(value) => {
                let ty = self.emit_expr(value, Flow::Value, exit)?;
                if !is_reference_or_null(&ty) {
                    return Err(RecompileError::Incompatible {
                        context: "throw",
                        from: ty,
                        to: descriptor::THROWABLE.into(),
                    });
                }
                self.push(Insn::Throw);
                Ok(())
            }
            Stmt::TryCatch { body, catches } => self.emit_try_catch(body, catches, exit),
            Stmt::SpliceOriginal => self.emit_splice_stmt(),
            Stmt::NamedMark(name) => {
                let out = &mut self.out;
                let target = self.named.define(name, || out.new_label())?;
                self.push(Insn::Mark(target));
                Ok(())
            }
            Stmt::NamedGoto(name) => {
                let out = &mut self.out;
                let target = self.named.reference(name, || out.new_label());
                self.jump(target);
                Ok(())
            }
        }
    }

    /// Emits `expr` and returns its type. With [`Flow::Branch`] nothing is
    /// left on the stack and the type is `Z`.
    pub(super) fn emit_expr(&mut self, expr: &Expr, flow: Flow, exit: Option<ExitRewrite>) -> Result<String> {
        match flow {
            Flow::Branch { target, when } => {
                self.emit_condition(expr, target, when, exit)?;
                Ok(BOOLEAN.to_string())
            }
            Flow::Value => self.emit_value(expr, exit),
        }
    }

    /// Emits the bound value of a `top` and builds its usage. The usage must
    /// consume the value exactly once, or the operand stack is left unbalanced.
    fn bind_top(&mut self, value: &Expr, usage: &TopUsage, exit: Option<ExitRewrite>) -> Result<Expr> {
        let ty = self.emit_value(value, exit)?;
        let used = usage.apply(Expr::Dup(ty.clone()), Expr::LetBe(ty));
        let mut count = CountLetBe(0);
        count.visit_expr(&used);
        if count.0 != 1 {
            return Err(RecompileError::TopValueUnbalanced { uses: count.0 });
        }
        Ok(used)
    }

    fn emit_value(&mut self, expr: &Expr, exit: Option<ExitRewrite>) -> Result<String> {
        match expr {
            Expr::Literal(lit) => {
                self.push(Insn::Const(match lit {
                    Literal::Bool(v) => Constant::Int(*v as i32),
                    Literal::Byte(v) => Constant::Int(*v as i32),
                    Literal::Short(v) => Constant::Int(*v as i32),
                    Literal::Char(v) => Constant::Int(*v as i32),
                    Literal::Int(v) => Constant::Int(*v),
                    Literal::Long(v) => Constant::Long(*v),
                    Literal::Float(v) => Constant::Float(*v),
                    Literal::Double(v) => Constant::Double(*v),
                    Literal::String(v) => Constant::String(v.clone()),
                }));
                Ok(lit.descriptor().to_string())
            }
            Expr::Null => {
                self.push(Insn::Const(Constant::Null));
                Ok(NULL_TYPE.to_string())
            }
            Expr::Arithmetic { op, lhs, rhs } => {
                let (l, r) = self.emit_operands(lhs, rhs, exit)?;
                let ty = descriptor::arithmetic_result_type(&l, &r).ok_or_else(|| operand_types(op, &l, &r))?;
                self.push(Insn::Arith { op: *op, kind: kind_of(ty)? });
                Ok(ty.to_string())
            }
            Expr::Shift { op, lhs, rhs } => {
                let (l, r) = self.emit_operands(lhs, rhs, exit)?;
                let ty = descriptor::shift_result_type(&l, &r).ok_or_else(|| operand_types(op, &l, &r))?;
                self.push(Insn::Shift { op: *op, kind: kind_of(ty)? });
                Ok(ty.to_string())
            }
            Expr::Bitwise { op, lhs, rhs } => {
                let (l, r) = self.emit_operands(lhs, rhs, exit)?;
                let ty = descriptor::bitwise_result_type(&l, &r).ok_or_else(|| operand_types(op, &l, &r))?;
                self.push(Insn::Bitwise { op: *op, kind: kind_of(ty)? });
                Ok(ty.to_string())
            }
            Expr::Compare { .. } | Expr::Identity { .. } | Expr::Logical { .. } | Expr::Not(_) => {
                let otherwise = self.new_label();
                let end = self.new_label();
                self.emit_condition(expr, otherwise, false, exit)?;
                self.push(Insn::Const(Constant::Int(1)));
                self.jump(end);
                self.push(Insn::Mark(otherwise));
                self.push(Insn::Const(Constant::Int(0)));
                self.push(Insn::Mark(end));
                Ok(BOOLEAN.to_string())
            }
            Expr::Negate(value) => {
                let ty = self.emit_value(value, exit)?;
                if !is_numeric(&ty) {
                    return Err(RecompileError::Incompatible {
                        context: "negation",
                        from: ty,
                        to: "a number".into(),
                    });
                }
                let kind = kind_of(&ty)?;
                self.push(Insn::Neg(kind));
                Ok(kind.default_descriptor().to_string())
            }
            Expr::Var(name) => {
                let (slot, desc) = self.lookup(name)?;
                self.push(Insn::Load {
                    kind: kind_of(&desc)?,
                    slot,
                });
                Ok(desc)
            }
            Expr::Field { target, name, ty } => {
                let owner = self.emit_receiver(target, exit)?;
                self.push(Insn::Field {
                    op: FieldOp::GetField,
                    owner,
                    name: name.clone(),
                    descriptor: ty.clone(),
                });
                Ok(ty.clone())
            }
            Expr::StaticField { owner, name, ty } => {
                self.push(Insn::Field {
                    op: FieldOp::GetStatic,
                    owner: owner.clone(),
                    name: name.clone(),
                    descriptor: ty.clone(),
                });
                Ok(ty.clone())
            }
            Expr::This => {
                if self.info.is_static() {
                    return Err(RecompileError::ThisInStatic);
                }
                self.push(Insn::Load {
                    kind: ValueKind::Reference,
                    slot: 0,
                });
                Ok(self.this_desc.clone())
            }
            Expr::InstanceOf { value, ty } => {
                let from = self.emit_value(value, exit)?;
                if !is_reference_or_null(&from) {
                    return Err(RecompileError::Incompatible {
                        context: "instanceof",
                        from,
                        to: ty.clone(),
                    });
                }
                let class_name = self.class_name_of(ty)?;
                self.push(Insn::Type {
                    op: TypeOp::InstanceOf,
                    class_name,
                });
                Ok(BOOLEAN.to_string())
            }
            Expr::Cast { value, ty } => {
                let from = self.emit_value(value, exit)?;
                self.emit_cast(from, ty)?;
                Ok(ty.clone())
            }
            Expr::ClassLiteral(desc) => {
                self.push(Insn::Const(Constant::Class(desc.clone())));
                Ok(CLASS.to_string())
            }
            Expr::ArrayLength(array) => {
                let ty = self.emit_value(array, exit)?;
                if !ty.starts_with('[') {
                    return Err(RecompileError::Incompatible {
                        context: "array length",
                        from: ty,
                        to: "an array".into(),
                    });
                }
                self.push(Insn::ArrayLength);
                Ok(INT.to_string())
            }
            Expr::Invoke(invocation) => {
                if descriptor::return_descriptor(&invocation.descriptor).as_deref() == Some(VOID) {
                    return Err(DomError::VoidInvocation {
                        owner: invocation.owner.clone(),
                        name: invocation.name.clone(),
                        descriptor: invocation.descriptor.clone(),
                    }
                    .into());
                }
                self.emit_invocation(invocation, exit)
            }
            Expr::NewInstance(new) => self.emit_new(new, exit),
            Expr::IfElse { cond, then, otherwise } => {
                if let (Some(a), Some(b)) = (self.infer(then), self.infer(otherwise)) {
                    if unify_arms(&a, &b).is_none() {
                        return Err(DomError::ArmTypeMismatch { then: a, otherwise: b }.into());
                    }
                }
                let else_label = self.new_label();
                let end = self.new_label();
                self.emit_condition(cond, else_label, false, exit)?;
                let a = self.emit_value(then, exit)?;
                self.jump(end);
                self.push(Insn::Mark(else_label));
                let b = self.emit_value(otherwise, exit)?;
                self.push(Insn::Mark(end));
                unify_arms(&a, &b).ok_or_else(|| DomError::ArmTypeMismatch { then: a, otherwise: b }.into())
            }
            Expr::Block(members) => {
                let found = members.iter().filter(|m| matches!(m, CodeDom::Expr(_))).count();
                if found != 1 {
                    return Err(DomError::BlockExpressionArity { found }.into());
                }
                self.scope.enter();
                let emitted = self.emit_block_members(members, exit);
                self.scope.exit();
                emitted
            }
            Expr::Top { value, usage } => {
                let used = self.bind_top(value, usage, exit)?;
                self.emit_value(&used, exit)
            }
            Expr::Dup(ty) => {
                let op = if descriptor::slot_width(ty) == 2 { StackOp::Dup2 } else { StackOp::Dup };
                self.push(Insn::Stack(op));
                Ok(ty.clone())
            }
            Expr::LetBe(ty) => Ok(ty.clone()),
            Expr::SpliceOriginal => self.emit_splice_value(),
        }
    }

    /// Emits a jump to `target` taken when `cond` evaluates to `when`.
    pub(super) fn emit_condition(
        &mut self,
        cond: &Expr,
        target: insn::Label,
        when: bool,
        exit: Option<ExitRewrite>,
    ) -> Result<()> {
        match cond {
            Expr::Literal(Literal::Bool(value)) => {
                if *value == when {
                    self.jump(target);
                }
                Ok(())
            }
            Expr::Not(inner) => self.emit_condition(inner, target, !when, exit),
            Expr::Logical { op, lhs, rhs } => {
                for operand in [lhs, rhs] {
                    if let Some(ty) = self.infer(operand) {
                        if ty != BOOLEAN {
                            return Err(operand_types(op, &ty, BOOLEAN));
                        }
                    }
                }
                // `a && b` jumping on false, or `a || b` jumping on true, can
                // leave from either operand. Otherwise the first operand skips
                // over the second.
                if matches!((op, when), (LogicalOp::And, false) | (LogicalOp::Or, true)) {
                    self.emit_condition(lhs, target, when, exit)?;
                    self.emit_condition(rhs, target, when, exit)
                } else {
                    let skip = self.new_label();
                    self.emit_condition(lhs, skip, !when, exit)?;
                    self.emit_condition(rhs, target, when, exit)?;
                    self.push(Insn::Mark(skip));
                    Ok(())
                }
            }
            Expr::Compare { op, lhs, rhs } => self.emit_compare(*op, lhs, rhs, target, when, exit),
            Expr::Identity { op, lhs, rhs } => {
                let equal = (*op == IdentityOp::Eq) == when;
                let null_side = match (&**lhs, &**rhs) {
                    (_, Expr::Null) => Some(lhs),
                    (Expr::Null, _) => Some(rhs),
                    _ => None,
                };
                let cond = if let Some(other) = null_side {
                    let ty = self.emit_value(other, exit)?;
                    if !is_reference_or_null(&ty) {
                        return Err(operand_types(op, &ty, NULL_TYPE));
                    }
                    if equal {
                        JumpCond::Null
                    } else {
                        JumpCond::NonNull
                    }
                } else {
                    let (l, r) = self.emit_operands(lhs, rhs, exit)?;
                    if !is_reference_or_null(&l) || !is_reference_or_null(&r) {
                        return Err(operand_types(op, &l, &r));
                    }
                    if equal {
                        JumpCond::RefEq
                    } else {
                        JumpCond::RefNe
                    }
                };
                self.push(Insn::Jump { cond, target });
                Ok(())
            }
            Expr::Top { value, usage } => {
                let used = self.bind_top(value, usage, exit)?;
                self.emit_condition(&used, target, when, exit)
            }
            _ => {
                let ty = self.emit_value(cond, exit)?;
                if !is_int_like(&ty) {
                    return Err(RecompileError::Incompatible {
                        context: "condition",
                        from: ty,
                        to: BOOLEAN.into(),
                    });
                }
                let op = if when { CompareOp::Ne } else { CompareOp::Eq };
                self.push(Insn::Jump {
                    cond: JumpCond::Zero(op),
                    target,
                });
                Ok(())
            }
        }
    }

    fn emit_compare(
        &mut self,
        op: CompareOp,
        lhs: &Expr,
        rhs: &Expr,
        target: insn::Label,
        when: bool,
        exit: Option<ExitRewrite>,
    ) -> Result<()> {
        let taken = if when { op } else { op.negate() };
        let l = self.emit_value(lhs, exit)?;
        if let Some(zero) = zero_literal_type(rhs) {
            if is_int_like(&l) {
                if descriptor::compare_result_type(&l, zero).is_none() {
                    return Err(operand_types(op, &l, zero));
                }
                self.push(Insn::Jump {
                    cond: JumpCond::Zero(taken),
                    target,
                });
                return Ok(());
            }
        }
        let r = self.emit_value(rhs, exit)?;
        if descriptor::compare_result_type(&l, &r).is_none() {
            return Err(operand_types(op, &l, &r));
        }
        // The `g` variants push 1 on NaN, so `<` and `<=` stay false.
        let nan_high = matches!(op, CompareOp::Lt | CompareOp::Le);
        let cond = match l.as_str() {
            t if is_int_like(t) => JumpCond::IntCompare(taken),
            LONG => {
                self.push(Insn::Compare(CompareInsn::Lcmp));
                JumpCond::Zero(taken)
            }
            FLOAT => {
                let insn = if nan_high { CompareInsn::Fcmpg } else { CompareInsn::Fcmpl };
                self.push(Insn::Compare(insn));
                JumpCond::Zero(taken)
            }
            DOUBLE => {
                let insn = if nan_high { CompareInsn::Dcmpg } else { CompareInsn::Dcmpl };
                self.push(Insn::Compare(insn));
                JumpCond::Zero(taken)
            }
            t if is_reference(t) && taken == CompareOp::Eq => JumpCond::RefEq,
            t if is_reference(t) && taken == CompareOp::Ne => JumpCond::RefNe,
            _ => return Err(operand_types(op, &l, &r)),
        };
        self.push(Insn::Jump { cond, target });
        Ok(())
    }

    fn emit_switch(
        &mut self,
        value: &Expr,
        cases: &BTreeMap<i32, Stmt>,
        default: &Stmt,
        exit: Option<ExitRewrite>,
    ) -> Result<()> {
        self.emit_int(value, "switch", exit)?;
        let end = self.new_label();
        let default_label = self.new_label();
        let mut pairs = Vec::with_capacity(cases.len());
        for key in cases.keys() {
            pairs.push((*key, self.new_label()));
        }
        let insn = dispatch(default_label, &pairs);
        trace!(
            "switch over {} cases as {}",
            pairs.len(),
            if matches!(insn, Insn::TableSwitch { .. }) { "tableswitch" } else { "lookupswitch" }
        );
        self.push(insn);

        self.breaks.push((end, false));
        for ((_, label), body) in pairs.iter().zip(cases.values()) {
            self.push(Insn::Mark(*label));
            self.emit_stmt(body, exit)?;
        }
        self.push(Insn::Mark(default_label));
        self.emit_stmt(default, exit)?;
        let broken = self.breaks.pop().is_some_and(|(_, used)| used);
        if broken || self.falls_through() {
            self.push(Insn::Mark(end));
        }
        Ok(())
    }

    fn emit_block_members(&mut self, members: &[CodeDom], exit: Option<ExitRewrite>) -> Result<String> {
        let mut ty = None;
        for member in members {
            match member {
                CodeDom::Stmt(stmt) => {
                    if contains_try(stmt) {
                        return Err(RecompileError::Unsupported {
                            what: "try/catch inside an expression block".into(),
                        });
                    }
                    self.emit_stmt(stmt, exit)?;
                }
                CodeDom::Expr(expr) => ty = Some(self.emit_value(expr, exit)?),
            }
        }
        ty.ok_or(DomError::BlockExpressionArity { found: 0 }.into())
    }

    pub(super) fn emit_invocation(&mut self, invocation: &Invocation, exit: Option<ExitRewrite>) -> Result<String> {
        let invalid = || RecompileError::InvalidDescriptor {
            descriptor: invocation.descriptor.clone(),
        };
        let params = descriptor::parameter_descriptors(&invocation.descriptor).ok_or_else(invalid)?;
        let ret = descriptor::return_descriptor(&invocation.descriptor).ok_or_else(invalid)?;
        let problem = match (&invocation.target, invocation.kind.has_target()) {
            (Some(target), true) => {
                let ty = self.emit_value(target, exit)?;
                if !is_reference_or_null(&ty) {
                    return Err(RecompileError::Incompatible {
                        context: "invocation target",
                        from: ty,
                        to: descriptor::descriptor_of_internal_name(&invocation.owner),
                    });
                }
                None
            }
            (None, false) => None,
            (None, true) => Some("requires a target"),
            (Some(_), false) => Some("cannot have a target"),
        };
        if let Some(problem) = problem {
            return Err(DomError::InvocationTarget {
                kind: invocation.kind,
                name: invocation.name.clone(),
                problem,
            }
            .into());
        }
        self.emit_args(&invocation.name, &params, &invocation.args, exit)?;
        self.push(Insn::Invoke {
            kind: invocation.kind,
            owner: invocation.owner.clone(),
            name: invocation.name.clone(),
            descriptor: invocation.descriptor.clone(),
        });
        Ok(ret)
    }

    fn emit_new(&mut self, new: &NewInstance, exit: Option<ExitRewrite>) -> Result<String> {
        self.push(Insn::Type {
            op: TypeOp::New,
            class_name: new.class_name.clone(),
        });
        self.push(Insn::Stack(StackOp::Dup));
        self.emit_args("<init>", &new.param_types, &new.args, exit)?;
        self.push(Insn::Invoke {
            kind: crate::dom::InvokeKind::Special,
            owner: new.class_name.clone(),
            name: "<init>".into(),
            descriptor: descriptor::method_descriptor(&new.param_types, VOID),
        });
        Ok(descriptor::descriptor_of_internal_name(&new.class_name))
    }

    fn emit_args(&mut self, name: &str, params: &[String], args: &[Expr], exit: Option<ExitRewrite>) -> Result<()> {
        if params.len() != args.len() {
            return Err(RecompileError::ArgumentCount {
                name: name.to_string(),
                expected: params.len(),
                found: args.len(),
            });
        }
        for (arg, param) in args.iter().zip(params) {
            self.emit_sink(arg, param, "argument", exit)?;
        }
        Ok(())
    }

    fn emit_return(&mut self, value: Option<&Expr>, exit: Option<ExitRewrite>) -> Result<()> {
        let returns_void = self.return_desc == VOID;
        match (value, exit) {
            (None, _) if !returns_void => Err(RecompileError::ReturnMismatch {
                expected: self.return_desc.clone(),
            }),
            (None, Some(exit)) => {
                self.jump(exit.label);
                Ok(())
            }
            (None, None) => {
                self.push(Insn::Return(None));
                Ok(())
            }
            (Some(_), _) if returns_void => Err(RecompileError::ReturnMismatch {
                expected: self.return_desc.clone(),
            }),
            (Some(value), exit) => {
                let desc = self.return_desc.clone();
                self.emit_sink(value, &desc, "return", exit)?;
                let kind = kind_of(&desc)?;
                match exit {
                    Some(ExitRewrite {
                        label,
                        slot: Some((slot, kind)),
                    }) => {
                        self.push(Insn::Store { kind, slot });
                        self.jump(label);
                    }
                    _ => self.push(Insn::Return(Some(kind))),
                }
                Ok(())
            }
        }
    }

    /// Emits `expr` where a `to` value is expected.
    fn emit_sink(&mut self, expr: &Expr, to: &str, context: &'static str, exit: Option<ExitRewrite>) -> Result<()> {
        let from = self.emit_value(expr, exit)?;
        match assignment_conversion(&from, to, self.options.widen_primitives) {
            Some(Some(conversion)) => {
                self.push(Insn::Convert(conversion));
                Ok(())
            }
            Some(None) => Ok(()),
            None => Err(RecompileError::Incompatible {
                context,
                from,
                to: to.to_string(),
            }),
        }
    }

    fn emit_int(&mut self, expr: &Expr, context: &'static str, exit: Option<ExitRewrite>) -> Result<()> {
        let ty = self.emit_value(expr, exit)?;
        if is_int_like(&ty) {
            Ok(())
        } else {
            Err(RecompileError::Incompatible {
                context,
                from: ty,
                to: INT.into(),
            })
        }
    }

    fn emit_operands(&mut self, lhs: &Expr, rhs: &Expr, exit: Option<ExitRewrite>) -> Result<(String, String)> {
        let l = self.emit_value(lhs, exit)?;
        let r = self.emit_value(rhs, exit)?;
        Ok((l, r))
    }

    /// Emits an object reference and returns the internal name of its class.
    fn emit_receiver(&mut self, target: &Expr, exit: Option<ExitRewrite>) -> Result<String> {
        let ty = self.emit_value(target, exit)?;
        match descriptor::internal_name_of_descriptor(&ty) {
            Some(owner) => Ok(owner),
            None => Err(RecompileError::Incompatible {
                context: "field access",
                from: ty,
                to: descriptor::OBJECT.into(),
            }),
        }
    }

    fn emit_cast(&mut self, from: String, to: &str) -> Result<()> {
        if is_reference(to) {
            if !is_reference_or_null(&from) {
                return Err(RecompileError::Incompatible {
                    context: "cast",
                    from,
                    to: to.to_string(),
                });
            }
            if from != to {
                let class_name = self.class_name_of(to)?;
                self.push(Insn::Type {
                    op: TypeOp::CheckCast,
                    class_name,
                });
            }
            return Ok(());
        }
        let conversions = cast_conversions(&from, to).ok_or_else(|| RecompileError::Incompatible {
            context: "cast",
            from: from.clone(),
            to: to.to_string(),
        })?;
        for conversion in conversions {
            self.push(Insn::Convert(conversion));
        }
        Ok(())
    }

    /// Drops an invocation's result, if it has one.
    fn discard(&mut self, ty: &str) {
        match descriptor::slot_width(ty) {
            0 => {}
            2 => self.push(Insn::Stack(StackOp::Pop2)),
            _ => self.push(Insn::Stack(StackOp::Pop)),
        }
    }

    fn lookup(&self, name: &str) -> Result<(u16, String)> {
        self.scope
            .find(name)
            .map(|b| (b.slot, b.descriptor.clone()))
            .ok_or_else(|| RecompileError::UnknownVariable { name: name.to_string() })
    }

    fn class_name_of(&self, desc: &str) -> Result<String> {
        descriptor::internal_name_of_descriptor(desc).ok_or_else(|| RecompileError::InvalidDescriptor {
            descriptor: desc.to_string(),
        })
    }

    pub(super) fn check_value_type(&self, ty: &str) -> Result<()> {
        match descriptor::parse_field_descriptor(ty) {
            Some(parsed) if parsed != descriptor::JvmType::Void => Ok(()),
            _ => Err(RecompileError::InvalidDescriptor {
                descriptor: ty.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::factory::*;
    use crate::dom::{ArithmeticOp, InvokeKind, LabelArena};
    use crate::insn::{Conversion, MethodInfo};
    use crate::recompile::{generate, RecompileOptions};
    use pretty_assertions::assert_eq;

    fn lower(info: &MethodInfo, tree: &Stmt) -> Result<Vec<Insn>> {
        let body = generate(tree, info, None, &RecompileOptions::default())?;
        Ok(body.insns.as_slice().to_vec())
    }

    fn static_method(descriptor: &str) -> MethodInfo {
        MethodInfo::new("demo/Calc", "run", descriptor).with_flags(crate::insn::MethodAccessFlags::STATIC)
    }

    #[test]
    fn arithmetic_promotes_and_widens_on_return() {
        let info = static_method("(BI)J");
        let insns = lower(&info, &block(vec![ret_value(add(var("arg0"), var("arg1")))])).unwrap();
        assert_eq!(
            insns,
            vec![
                Insn::Load { kind: ValueKind::Int, slot: 0 },
                Insn::Load { kind: ValueKind::Int, slot: 1 },
                Insn::Arith {
                    op: ArithmeticOp::Add,
                    kind: ValueKind::Int
                },
                Insn::Convert(Conversion::I2L),
                Insn::Return(Some(ValueKind::Long)),
            ]
        );
    }

    #[test]
    fn mixed_operands_are_rejected() {
        let info = static_method("(IJ)J");
        let err = lower(&info, &block(vec![ret_value(add(var("arg0"), var("arg1")))])).unwrap_err();
        assert_eq!(
            err,
            RecompileError::OperandTypes {
                op: "add".into(),
                lhs: "I".into(),
                rhs: "J".into()
            }
        );
    }

    #[test]
    fn float_comparisons_keep_nan_false() {
        let info = static_method("(FF)V");
        let mut labels = LabelArena::new();
        let out = labels.fresh();
        let tree = block(vec![if_jump(lt(var("arg0"), var("arg1")), out), mark(out)]);
        let insns = lower(&info, &tree).unwrap();
        assert_eq!(insns[2], Insn::Compare(CompareInsn::Fcmpg));
        assert!(matches!(
            insns[3],
            Insn::Jump {
                cond: JumpCond::Zero(CompareOp::Lt),
                ..
            }
        ));

        let tree = block(vec![if_jump(not(ge(var("arg0"), var("arg1"))), out), mark(out)]);
        let insns = lower(&info, &tree).unwrap();
        assert_eq!(insns[2], Insn::Compare(CompareInsn::Fcmpl));
        assert!(matches!(
            insns[3],
            Insn::Jump {
                cond: JumpCond::Zero(CompareOp::Lt),
                ..
            }
        ));
    }

    #[test]
    fn zero_tests_use_single_operand_jumps() {
        let info = static_method("(I)V");
        let mut labels = LabelArena::new();
        let out = labels.fresh();
        let insns = lower(&info, &block(vec![if_jump(eq(var("arg0"), int(0)), out), mark(out)])).unwrap();
        assert_eq!(insns.len(), 4);
        assert!(matches!(
            insns[1],
            Insn::Jump {
                cond: JumpCond::Zero(CompareOp::Eq),
                ..
            }
        ));
    }

    #[test]
    fn short_circuit_and_jumps_from_both_operands_when_false() {
        let info = static_method("(ZZ)I");
        let tree = block(vec![if_else(
            and(var("arg0"), var("arg1")),
            ret_value(int(1)),
            ret_value(int(2)),
        )]);
        let insns = lower(&info, &tree).unwrap();
        let jumps = insns
            .iter()
            .filter(|i| matches!(i, Insn::Jump { cond: JumpCond::Zero(CompareOp::Eq), .. }))
            .count();
        assert_eq!(jumps, 2);
        // Both arms return, so no jump over the else arm.
        assert!(!insns.iter().any(|i| matches!(i, Insn::Jump { cond: JumpCond::Always, .. })));
    }

    #[test]
    fn dense_switches_use_tables() {
        let pairs: Vec<(i32, insn::Label)> = vec![(1, insn::Label(1)), (2, insn::Label(2)), (4, insn::Label(3))];
        match dispatch(insn::Label(0), &pairs) {
            Insn::TableSwitch {
                low, high, targets, ..
            } => {
                assert_eq!((low, high), (1, 4));
                assert_eq!(targets[2], insn::Label(0));
            }
            other => panic!("expected a table, got {:?}", other),
        }
        let sparse = vec![(1, insn::Label(1)), (1000, insn::Label(2))];
        assert!(matches!(dispatch(insn::Label(0), &sparse), Insn::LookupSwitch { .. }));
    }

    #[test]
    fn invocation_results_are_popped_in_statements() {
        let info = static_method("()V");
        let call = invocation(InvokeKind::Static, "demo/Calc", "next", "()J", None, vec![]).unwrap();
        let insns = lower(&info, &block(vec![invoke_stmt(call)])).unwrap();
        assert_eq!(insns[1], Insn::Stack(StackOp::Pop2));
        assert_eq!(insns[2], Insn::Return(None));
    }

    #[test]
    fn void_invocations_have_no_value() {
        let info = static_method("()I");
        let call = invocation(InvokeKind::Static, "demo/Calc", "tick", "()V", None, vec![]).unwrap();
        let err = lower(&info, &block(vec![ret_value(Expr::Invoke(call))])).unwrap_err();
        assert!(matches!(err, RecompileError::Dom(DomError::VoidInvocation { .. })));
    }

    #[test]
    fn casts_to_narrow_types_always_convert() {
        let info = static_method("(J)B");
        let insns = lower(&info, &block(vec![ret_value(cast(var("arg0"), "B"))])).unwrap();
        assert_eq!(insns[1], Insn::Convert(Conversion::L2I));
        assert_eq!(insns[2], Insn::Convert(Conversion::I2B));
    }

    #[test]
    fn this_is_rejected_in_static_methods() {
        let info = static_method("()Ljava/lang/Object;");
        let err = lower(&info, &block(vec![ret_value(this())])).unwrap_err();
        assert_eq!(err, RecompileError::ThisInStatic);
    }

    #[test]
    fn conditional_expression_arms_must_agree() {
        let info = static_method("(Z)I");
        let tree = block(vec![ret_value(Expr::IfElse {
            cond: Box::new(var("arg0")),
            then: Box::new(int(1)),
            otherwise: Box::new(long(2)),
        })]);
        let err = lower(&info, &tree).unwrap_err();
        assert_eq!(
            err,
            RecompileError::Dom(DomError::ArmTypeMismatch {
                then: "I".into(),
                otherwise: "J".into()
            })
        );
    }

    #[test]
    fn top_duplicates_the_bound_value() {
        let info = static_method("(I)I");
        let tree = block(vec![ret_value(top(var("arg0"), |dup, it| mul(it, dup)))]);
        let insns = lower(&info, &tree).unwrap();
        assert_eq!(
            insns,
            vec![
                Insn::Load { kind: ValueKind::Int, slot: 0 },
                Insn::Stack(StackOp::Dup),
                Insn::Arith {
                    op: ArithmeticOp::Mul,
                    kind: ValueKind::Int
                },
                Insn::Return(Some(ValueKind::Int)),
            ]
        );
    }

    #[test]
    fn top_must_consume_its_value_once() {
        let info = static_method("()I");
        let tree = block(vec![ret_value(top(int(5), |dup, _| dup))]);
        assert_eq!(
            lower(&info, &tree).unwrap_err(),
            RecompileError::TopValueUnbalanced { uses: 0 }
        );

        let tree = block(vec![ret_value(top(int(5), |_, it| add(it.clone(), it)))]);
        assert_eq!(
            lower(&info, &tree).unwrap_err(),
            RecompileError::TopValueUnbalanced { uses: 2 }
        );

        let info = static_method("(I)V");
        let tree = block(vec![if_then(
            top(var("arg0"), |_, it| gt(it, int(0))),
            block(vec![ret()]),
        )]);
        assert!(lower(&info, &tree).is_ok());
        let tree = block(vec![if_then(top(var("arg0"), |_, _| boolean(true)), block(vec![ret()]))]);
        assert_eq!(
            lower(&info, &tree).unwrap_err(),
            RecompileError::TopValueUnbalanced { uses: 0 }
        );

        let info = static_method("()I");
        let nested = top(int(2), |_, it| add(it, top(int(3), |dup, inner| mul(inner, dup))));
        assert!(lower(&info, &block(vec![ret_value(nested)])).is_ok());
    }
}
