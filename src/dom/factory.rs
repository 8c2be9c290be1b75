//! One constructor per node kind.
//!
//! Constructors for nodes with structural invariants return `Result` and
//! check what can be checked without a typing context.

use std::collections::BTreeMap;

use super::types::*;
use super::DomError;
use crate::descriptor;

// --- Literals ---

pub fn boolean(value: bool) -> Expr {
    Expr::Literal(Literal::Bool(value))
}

pub fn byte(value: i8) -> Expr {
    Expr::Literal(Literal::Byte(value))
}

pub fn short(value: i16) -> Expr {
    Expr::Literal(Literal::Short(value))
}

pub fn int(value: i32) -> Expr {
    Expr::Literal(Literal::Int(value))
}

pub fn long(value: i64) -> Expr {
    Expr::Literal(Literal::Long(value))
}

pub fn float(value: f32) -> Expr {
    Expr::Literal(Literal::Float(value))
}

pub fn double(value: f64) -> Expr {
    Expr::Literal(Literal::Double(value))
}

pub fn char(value: u16) -> Expr {
    Expr::Literal(Literal::Char(value))
}

pub fn string(value: impl Into<String>) -> Expr {
    Expr::Literal(Literal::String(value.into()))
}

pub fn null() -> Expr {
    Expr::Null
}

// --- Operators ---

pub fn arithmetic(op: ArithmeticOp, lhs: Expr, rhs: Expr) -> Expr {
    Expr::Arithmetic {
        op,
        lhs: Box::new(lhs),
        rhs: Box::new(rhs),
    }
}

pub fn add(lhs: Expr, rhs: Expr) -> Expr {
    arithmetic(ArithmeticOp::Add, lhs, rhs)
}

pub fn sub(lhs: Expr, rhs: Expr) -> Expr {
    arithmetic(ArithmeticOp::Sub, lhs, rhs)
}

pub fn mul(lhs: Expr, rhs: Expr) -> Expr {
    arithmetic(ArithmeticOp::Mul, lhs, rhs)
}

pub fn div(lhs: Expr, rhs: Expr) -> Expr {
    arithmetic(ArithmeticOp::Div, lhs, rhs)
}

pub fn rem(lhs: Expr, rhs: Expr) -> Expr {
    arithmetic(ArithmeticOp::Rem, lhs, rhs)
}

pub fn shift(op: ShiftOp, lhs: Expr, rhs: Expr) -> Expr {
    Expr::Shift {
        op,
        lhs: Box::new(lhs),
        rhs: Box::new(rhs),
    }
}

pub fn bitwise(op: BitwiseOp, lhs: Expr, rhs: Expr) -> Expr {
    Expr::Bitwise {
        op,
        lhs: Box::new(lhs),
        rhs: Box::new(rhs),
    }
}

pub fn logical(op: LogicalOp, lhs: Expr, rhs: Expr) -> Expr {
    Expr::Logical {
        op,
        lhs: Box::new(lhs),
        rhs: Box::new(rhs),
    }
}

pub fn and(lhs: Expr, rhs: Expr) -> Expr {
    logical(LogicalOp::And, lhs, rhs)
}

pub fn or(lhs: Expr, rhs: Expr) -> Expr {
    logical(LogicalOp::Or, lhs, rhs)
}

pub fn compare(op: CompareOp, lhs: Expr, rhs: Expr) -> Expr {
    Expr::Compare {
        op,
        lhs: Box::new(lhs),
        rhs: Box::new(rhs),
    }
}

pub fn eq(lhs: Expr, rhs: Expr) -> Expr {
    compare(CompareOp::Eq, lhs, rhs)
}

pub fn ne(lhs: Expr, rhs: Expr) -> Expr {
    compare(CompareOp::Ne, lhs, rhs)
}

pub fn lt(lhs: Expr, rhs: Expr) -> Expr {
    compare(CompareOp::Lt, lhs, rhs)
}

pub fn ge(lhs: Expr, rhs: Expr) -> Expr {
    compare(CompareOp::Ge, lhs, rhs)
}

pub fn gt(lhs: Expr, rhs: Expr) -> Expr {
    compare(CompareOp::Gt, lhs, rhs)
}

pub fn le(lhs: Expr, rhs: Expr) -> Expr {
    compare(CompareOp::Le, lhs, rhs)
}

pub fn identity(op: IdentityOp, lhs: Expr, rhs: Expr) -> Expr {
    Expr::Identity {
        op,
        lhs: Box::new(lhs),
        rhs: Box::new(rhs),
    }
}

pub fn not(value: Expr) -> Expr {
    Expr::Not(Box::new(value))
}

pub fn negate(value: Expr) -> Expr {
    Expr::Negate(Box::new(value))
}

// --- Access ---

pub fn var(name: impl Into<String>) -> Expr {
    Expr::Var(name.into())
}

pub fn field(target: Expr, name: impl Into<String>, ty: impl Into<String>) -> Expr {
    Expr::Field {
        target: Box::new(target),
        name: name.into(),
        ty: ty.into(),
    }
}

pub fn static_field(owner: impl Into<String>, name: impl Into<String>, ty: impl Into<String>) -> Expr {
    Expr::StaticField {
        owner: owner.into(),
        name: name.into(),
        ty: ty.into(),
    }
}

pub fn this() -> Expr {
    Expr::This
}

pub fn instance_of(value: Expr, ty: impl Into<String>) -> Expr {
    Expr::InstanceOf {
        value: Box::new(value),
        ty: ty.into(),
    }
}

pub fn cast(value: Expr, ty: impl Into<String>) -> Expr {
    Expr::Cast {
        value: Box::new(value),
        ty: ty.into(),
    }
}

pub fn class_literal(ty: impl Into<String>) -> Expr {
    Expr::ClassLiteral(ty.into())
}

pub fn array_length(array: Expr) -> Expr {
    Expr::ArrayLength(Box::new(array))
}

// --- Calls ---

pub fn invocation(
    kind: InvokeKind,
    owner: impl Into<String>,
    name: impl Into<String>,
    descriptor: impl Into<String>,
    target: Option<Expr>,
    args: Vec<Expr>,
) -> Result<Invocation, DomError> {
    let name = name.into();
    let descriptor = descriptor.into();
    if descriptor::parse_method_descriptor(&descriptor).is_none() {
        return Err(DomError::InvalidDescriptor { descriptor });
    }
    match (kind.has_target(), target.is_some()) {
        (true, false) => Err(DomError::InvocationTarget {
            kind,
            name,
            problem: "requires a target",
        }),
        (false, true) => Err(DomError::InvocationTarget {
            kind,
            name,
            problem: "cannot have a target",
        }),
        _ => Ok(Invocation {
            kind,
            owner: owner.into(),
            name,
            descriptor,
            target: target.map(Box::new),
            args,
        }),
    }
}

/// An invocation whose result is used; void methods are rejected.
pub fn invoke_expr(invocation: Invocation) -> Result<Expr, DomError> {
    if descriptor::return_descriptor(&invocation.descriptor).as_deref() == Some(descriptor::VOID) {
        return Err(DomError::VoidInvocation {
            owner: invocation.owner,
            name: invocation.name,
            descriptor: invocation.descriptor,
        });
    }
    Ok(Expr::Invoke(invocation))
}

pub fn invoke_stmt(invocation: Invocation) -> Stmt {
    Stmt::Invoke(invocation)
}

pub fn new_instance(class_name: impl Into<String>, param_types: Vec<String>, args: Vec<Expr>) -> NewInstance {
    NewInstance {
        class_name: class_name.into(),
        param_types,
        args,
    }
}

pub fn new_instance_expr(new: NewInstance) -> Expr {
    Expr::NewInstance(new)
}

pub fn new_instance_stmt(new: NewInstance) -> Stmt {
    Stmt::NewInstance(new)
}

// --- Compound expressions ---

pub fn if_else_expr(cond: Expr, then: Expr, otherwise: Expr) -> Result<Expr, DomError> {
    if let (Some(a), Some(b)) = (evident_type(&then), evident_type(&otherwise)) {
        if a != b {
            return Err(DomError::ArmTypeMismatch { then: a, otherwise: b });
        }
    }
    Ok(Expr::IfElse {
        cond: Box::new(cond),
        then: Box::new(then),
        otherwise: Box::new(otherwise),
    })
}

pub fn block_expr(members: Vec<CodeDom>) -> Result<Expr, DomError> {
    let found = members.iter().filter(|m| matches!(m, CodeDom::Expr(_))).count();
    if found != 1 {
        return Err(DomError::BlockExpressionArity { found });
    }
    Ok(Expr::Block(members))
}

pub fn top(value: Expr, usage: impl Fn(Expr, Expr) -> Expr + 'static) -> Expr {
    Expr::Top {
        value: Box::new(value),
        usage: TopUsage::new(usage),
    }
}

pub fn splice_expr() -> Expr {
    Expr::SpliceOriginal
}

/// The type of an expression when it is apparent without a typing context.
pub fn evident_type(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Literal(lit) => Some(lit.descriptor().to_string()),
        Expr::Compare { .. }
        | Expr::Identity { .. }
        | Expr::Logical { .. }
        | Expr::Not(_)
        | Expr::InstanceOf { .. } => Some(descriptor::BOOLEAN.to_string()),
        Expr::Field { ty, .. } | Expr::StaticField { ty, .. } | Expr::Cast { ty, .. } => Some(ty.clone()),
        Expr::ClassLiteral(_) => Some(descriptor::CLASS.to_string()),
        Expr::ArrayLength(_) => Some(descriptor::INT.to_string()),
        Expr::Invoke(inv) => descriptor::return_descriptor(&inv.descriptor),
        Expr::NewInstance(new) => Some(descriptor::descriptor_of_internal_name(&new.class_name)),
        Expr::Dup(ty) | Expr::LetBe(ty) => Some(ty.clone()),
        _ => None,
    }
}

// --- Statements ---

pub fn block(stmts: Vec<Stmt>) -> Stmt {
    Stmt::Block(stmts)
}

pub fn declare_var(ty: impl Into<String>, name: impl Into<String>) -> Stmt {
    Stmt::DeclareVar {
        ty: ty.into(),
        name: name.into(),
    }
}

pub fn assign_var(name: impl Into<String>, value: Expr) -> Stmt {
    Stmt::AssignVar {
        name: name.into(),
        value,
    }
}

pub fn assign_field(target: Expr, name: impl Into<String>, ty: impl Into<String>, value: Expr) -> Stmt {
    Stmt::AssignField {
        target,
        name: name.into(),
        ty: ty.into(),
        value,
    }
}

pub fn assign_static(owner: impl Into<String>, name: impl Into<String>, ty: impl Into<String>, value: Expr) -> Stmt {
    Stmt::AssignStatic {
        owner: owner.into(),
        name: name.into(),
        ty: ty.into(),
        value,
    }
}

pub fn increment(name: impl Into<String>, amount: i16) -> Stmt {
    Stmt::Increment {
        name: name.into(),
        amount,
    }
}

pub fn ret() -> Stmt {
    Stmt::Return
}

pub fn ret_value(value: Expr) -> Stmt {
    Stmt::ReturnValue(value)
}

pub fn if_else(cond: Expr, then: Stmt, otherwise: Stmt) -> Stmt {
    Stmt::IfElse {
        cond,
        then: Box::new(then),
        otherwise: Box::new(otherwise),
    }
}

pub fn if_then(cond: Expr, then: Stmt) -> Stmt {
    if_else(cond, then, block(Vec::new()))
}

pub fn if_jump(cond: Expr, label: Label) -> Stmt {
    Stmt::IfJump { cond, label }
}

pub fn break_case() -> Stmt {
    Stmt::BreakCase
}

pub fn mark(label: Label) -> Stmt {
    Stmt::Mark(label)
}

pub fn goto(label: Label) -> Stmt {
    Stmt::Goto(label)
}

pub fn switch(value: Expr, cases: BTreeMap<i32, Stmt>, default: Stmt) -> Stmt {
    Stmt::Switch {
        value,
        cases,
        default: Box::new(default),
    }
}

pub fn raw_switch(value: Expr, default: Label, keys: Vec<i32>, labels: Vec<Label>) -> Stmt {
    Stmt::RawSwitch {
        value,
        default,
        keys,
        labels,
    }
}

pub fn array_store(array: Expr, index: Expr, value: Expr) -> Stmt {
    Stmt::ArrayStore { array, index, value }
}

pub fn throw(value: Expr) -> Stmt {
    Stmt::Throw(value)
}

pub fn catch(exception_type: impl Into<String>, name: impl Into<String>, body: Stmt) -> Catch {
    Catch {
        exception_type: Some(exception_type.into()),
        name: name.into(),
        body,
    }
}

pub fn finally(body: Stmt) -> Catch {
    Catch {
        exception_type: None,
        name: String::new(),
        body,
    }
}

pub fn try_catch(body: Stmt, catches: Vec<Catch>) -> Stmt {
    Stmt::TryCatch {
        body: Box::new(body),
        catches,
    }
}

pub fn splice_stmt() -> Stmt {
    Stmt::SpliceOriginal
}

pub fn named_mark(name: impl Into<String>) -> Stmt {
    Stmt::NamedMark(name.into())
}

pub fn named_goto(name: impl Into<String>) -> Stmt {
    Stmt::NamedGoto(name.into())
}
