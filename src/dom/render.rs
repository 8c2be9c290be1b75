//! Java-like rendering of trees, for diagnostics only.

use std::fmt::{self, Display, Formatter, Write};

use super::types::*;
use crate::descriptor::{self, source_name};

const INDENT: &str = "    ";

impl Display for Label {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.0)
    }
}

impl Display for Stmt {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write_stmt(f, self, 0)
    }
}

impl Display for Expr {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write_expr(f, self)
    }
}

impl Display for CodeDom {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            CodeDom::Stmt(stmt) => stmt.fmt(f),
            CodeDom::Expr(expr) => expr.fmt(f),
        }
    }
}

impl Display for MethodDom {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for modifier in self.modifiers() {
            write!(f, "{} ", modifier)?;
        }
        let returns = self.info.return_descriptor().ok_or(fmt::Error)?;
        let returns = if returns == descriptor::VOID { "void".to_string() } else { source_name(&returns) };
        write!(f, "{} {}(", returns, self.info.name)?;
        for (i, (name, ty)) in self.info.parameters().ok_or(fmt::Error)?.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{} {}", source_name(ty), name)?;
        }
        f.write_str(") ")?;
        write_stmt(f, &self.body, 0)
    }
}

fn class_name(internal: &str) -> String {
    internal.replace('/', ".")
}

fn pad(f: &mut Formatter<'_>, depth: usize) -> fmt::Result {
    for _ in 0..depth {
        f.write_str(INDENT)?;
    }
    Ok(())
}

/// Writes a statement that is already positioned; nested lines indent from `depth`.
fn write_stmt(f: &mut Formatter<'_>, stmt: &Stmt, depth: usize) -> fmt::Result {
    match stmt {
        Stmt::Block(stmts) => write_block(f, stmts, depth),
        Stmt::DeclareVar { ty, name } => write!(f, "{} {};", source_name(ty), name),
        Stmt::AssignVar { name, value } => write!(f, "{} = {};", name, value),
        Stmt::AssignField { target, name, value, .. } => {
            write_operand(f, target, PRIMARY)?;
            write!(f, ".{} = {};", name, value)
        }
        Stmt::AssignStatic { owner, name, value, .. } => {
            write!(f, "{}.{} = {};", class_name(owner), name, value)
        }
        Stmt::Increment { name, amount } => write!(f, "{} += {};", name, amount),
        Stmt::Return => f.write_str("return;"),
        Stmt::ReturnValue(value) => write!(f, "return {};", value),
        Stmt::IfElse { cond, then, otherwise } => {
            write!(f, "if ({}) ", cond)?;
            write_stmt(f, then, depth)?;
            if !otherwise.is_empty_block() {
                f.write_str(" else ")?;
                write_stmt(f, otherwise, depth)?;
            }
            Ok(())
        }
        Stmt::IfJump { cond, label } => write!(f, "if ({}) goto {};", cond, label),
        Stmt::BreakCase => f.write_str("break;"),
        Stmt::Mark(label) => write!(f, "{}:", label),
        Stmt::Goto(label) => write!(f, "goto {};", label),
        Stmt::Switch { value, cases, default } => {
            writeln!(f, "switch ({}) {{", value)?;
            for (key, body) in cases {
                pad(f, depth + 1)?;
                write!(f, "case {}: ", key)?;
                write_stmt(f, body, depth + 1)?;
                f.write_char('\n')?;
            }
            pad(f, depth + 1)?;
            f.write_str("default: ")?;
            write_stmt(f, default, depth + 1)?;
            f.write_char('\n')?;
            pad(f, depth)?;
            f.write_char('}')
        }
        Stmt::RawSwitch { value, default, keys, labels } => {
            write!(f, "switch ({}) {{", value)?;
            for (key, label) in keys.iter().zip(labels) {
                write!(f, " case {}: goto {};", key, label)?;
            }
            write!(f, " default: goto {}; }}", default)
        }
        Stmt::Invoke(invocation) => {
            write_invocation(f, invocation)?;
            f.write_char(';')
        }
        Stmt::NewInstance(new) => {
            write_new(f, new)?;
            f.write_char(';')
        }
        Stmt::ArrayStore { array, index, value } => {
            write_operand(f, array, PRIMARY)?;
            write!(f, "[{}] = {};", index, value)
        }
        Stmt::Throw(value) => write!(f, "throw {};", value),
        Stmt::TryCatch { body, catches } => {
            f.write_str("try ")?;
            write_stmt(f, body, depth)?;
            for catch in catches {
                match &catch.exception_type {
                    Some(ty) => write!(f, " catch ({} {}) ", class_name(ty), catch.name)?,
                    None => f.write_str(" finally ")?,
                }
                write_stmt(f, &catch.body, depth)?;
            }
            Ok(())
        }
        Stmt::SpliceOriginal => f.write_str("<original>;"),
        Stmt::NamedMark(name) => write!(f, "{}:", name),
        Stmt::NamedGoto(name) => write!(f, "goto {};", name),
    }
}

fn write_block(f: &mut Formatter<'_>, stmts: &[Stmt], depth: usize) -> fmt::Result {
    if stmts.is_empty() {
        return f.write_str("{}");
    }
    f.write_str("{\n")?;
    for stmt in stmts {
        pad(f, depth + 1)?;
        write_stmt(f, stmt, depth + 1)?;
        f.write_char('\n')?;
    }
    pad(f, depth)?;
    f.write_char('}')
}

// Binding strength, loosest first.
const CONDITIONAL: u8 = 1;
const LOGICAL_OR: u8 = 2;
const LOGICAL_AND: u8 = 3;
const BIT_OR: u8 = 4;
const BIT_XOR: u8 = 5;
const BIT_AND: u8 = 6;
const EQUALITY: u8 = 7;
const RELATIONAL: u8 = 8;
const SHIFT: u8 = 9;
const ADDITIVE: u8 = 10;
const MULTIPLICATIVE: u8 = 11;
const UNARY: u8 = 12;
const PRIMARY: u8 = 13;

fn precedence(expr: &Expr) -> u8 {
    match expr {
        Expr::IfElse { .. } => CONDITIONAL,
        Expr::Logical { op: LogicalOp::Or, .. } => LOGICAL_OR,
        Expr::Logical { op: LogicalOp::And, .. } => LOGICAL_AND,
        Expr::Bitwise { op: BitwiseOp::Or, .. } => BIT_OR,
        Expr::Bitwise { op: BitwiseOp::Xor, .. } => BIT_XOR,
        Expr::Bitwise { op: BitwiseOp::And, .. } => BIT_AND,
        Expr::Compare { op: CompareOp::Eq | CompareOp::Ne, .. } | Expr::Identity { .. } => EQUALITY,
        Expr::Compare { .. } | Expr::InstanceOf { .. } => RELATIONAL,
        Expr::Shift { .. } => SHIFT,
        Expr::Arithmetic { op: ArithmeticOp::Add | ArithmeticOp::Sub, .. } => ADDITIVE,
        Expr::Arithmetic { .. } => MULTIPLICATIVE,
        Expr::Not(_) | Expr::Negate(_) | Expr::Cast { .. } => UNARY,
        Expr::Literal(Literal::Byte(_) | Literal::Short(_)) => UNARY,
        _ => PRIMARY,
    }
}

fn write_operand(f: &mut Formatter<'_>, expr: &Expr, min: u8) -> fmt::Result {
    if precedence(expr) < min {
        f.write_char('(')?;
        write_expr(f, expr)?;
        f.write_char(')')
    } else {
        write_expr(f, expr)
    }
}

fn write_binary(f: &mut Formatter<'_>, lhs: &Expr, symbol: &str, rhs: &Expr, prec: u8) -> fmt::Result {
    write_operand(f, lhs, prec)?;
    write!(f, " {} ", symbol)?;
    write_operand(f, rhs, prec + 1)
}

fn write_args(f: &mut Formatter<'_>, args: &[Expr]) -> fmt::Result {
    f.write_char('(')?;
    for (i, arg) in args.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write_expr(f, arg)?;
    }
    f.write_char(')')
}

fn write_invocation(f: &mut Formatter<'_>, invocation: &Invocation) -> fmt::Result {
    match &invocation.target {
        Some(target) => write_operand(f, target, PRIMARY)?,
        None => f.write_str(&class_name(&invocation.owner))?,
    }
    write!(f, ".{}", invocation.name)?;
    write_args(f, &invocation.args)
}

fn write_new(f: &mut Formatter<'_>, new: &NewInstance) -> fmt::Result {
    write!(f, "new {}", class_name(&new.class_name))?;
    write_args(f, &new.args)
}

fn write_literal(f: &mut Formatter<'_>, literal: &Literal) -> fmt::Result {
    match literal {
        Literal::Bool(v) => write!(f, "{}", v),
        Literal::Byte(v) => write!(f, "(byte) {}", v),
        Literal::Short(v) => write!(f, "(short) {}", v),
        Literal::Int(v) => write!(f, "{}", v),
        Literal::Long(v) => write!(f, "{}L", v),
        Literal::Float(v) => write!(f, "{:?}F", v),
        Literal::Double(v) => write!(f, "{:?}", v),
        Literal::Char(v) => match char::from_u32(*v as u32) {
            Some(c) if !c.is_control() && c != '\'' && c != '\\' => write!(f, "'{}'", c),
            _ => write!(f, "'\\u{:04x}'", v),
        },
        Literal::String(v) => write!(f, "{:?}", v),
    }
}

fn write_expr(f: &mut Formatter<'_>, expr: &Expr) -> fmt::Result {
    let prec = precedence(expr);
    match expr {
        Expr::Literal(literal) => write_literal(f, literal),
        Expr::Null => f.write_str("null"),
        Expr::Arithmetic { op, lhs, rhs } => {
            let symbol = match op {
                ArithmeticOp::Add => "+",
                ArithmeticOp::Sub => "-",
                ArithmeticOp::Mul => "*",
                ArithmeticOp::Div => "/",
                ArithmeticOp::Rem => "%",
            };
            write_binary(f, lhs, symbol, rhs, prec)
        }
        Expr::Shift { op, lhs, rhs } => {
            let symbol = match op {
                ShiftOp::Shl => "<<",
                ShiftOp::Shr => ">>",
                ShiftOp::Ushr => ">>>",
            };
            write_binary(f, lhs, symbol, rhs, prec)
        }
        Expr::Bitwise { op, lhs, rhs } => {
            let symbol = match op {
                BitwiseOp::And => "&",
                BitwiseOp::Or => "|",
                BitwiseOp::Xor => "^",
            };
            write_binary(f, lhs, symbol, rhs, prec)
        }
        Expr::Logical { op, lhs, rhs } => {
            let symbol = match op {
                LogicalOp::And => "&&",
                LogicalOp::Or => "||",
            };
            write_binary(f, lhs, symbol, rhs, prec)
        }
        Expr::Compare { op, lhs, rhs } => {
            let symbol = match op {
                CompareOp::Eq => "==",
                CompareOp::Ne => "!=",
                CompareOp::Lt => "<",
                CompareOp::Ge => ">=",
                CompareOp::Gt => ">",
                CompareOp::Le => "<=",
            };
            write_binary(f, lhs, symbol, rhs, prec)
        }
        Expr::Identity { op, lhs, rhs } => {
            let symbol = match op {
                IdentityOp::Eq => "==",
                IdentityOp::Ne => "!=",
            };
            write_binary(f, lhs, symbol, rhs, prec)
        }
        Expr::Not(value) => {
            f.write_char('!')?;
            write_operand(f, value, UNARY)
        }
        Expr::Negate(value) => {
            f.write_char('-')?;
            write_operand(f, value, UNARY)
        }
        Expr::Var(name) => f.write_str(name),
        Expr::Field { target, name, .. } => {
            write_operand(f, target, PRIMARY)?;
            write!(f, ".{}", name)
        }
        Expr::StaticField { owner, name, .. } => write!(f, "{}.{}", class_name(owner), name),
        Expr::This => f.write_str("this"),
        Expr::InstanceOf { value, ty } => {
            write_operand(f, value, RELATIONAL)?;
            write!(f, " instanceof {}", source_name(ty))
        }
        Expr::Cast { value, ty } => {
            write!(f, "({}) ", source_name(ty))?;
            write_operand(f, value, UNARY)
        }
        Expr::ClassLiteral(ty) => write!(f, "{}.class", source_name(ty)),
        Expr::ArrayLength(array) => {
            write_operand(f, array, PRIMARY)?;
            f.write_str(".length")
        }
        Expr::Invoke(invocation) => write_invocation(f, invocation),
        Expr::NewInstance(new) => write_new(f, new),
        Expr::IfElse { cond, then, otherwise } => {
            write_operand(f, cond, LOGICAL_OR)?;
            f.write_str(" ? ")?;
            write_operand(f, then, LOGICAL_OR)?;
            f.write_str(" : ")?;
            write_operand(f, otherwise, CONDITIONAL)
        }
        Expr::Block(members) => {
            f.write_str("({")?;
            for member in members {
                f.write_char(' ')?;
                match member {
                    CodeDom::Stmt(stmt) => write_stmt(f, stmt, 0)?,
                    CodeDom::Expr(expr) => write_expr(f, expr)?,
                }
            }
            f.write_str(" })")
        }
        Expr::Top { value, usage } => {
            write!(f, "top({} => ", value)?;
            write_expr(f, &usage.apply(Expr::Dup(String::new()), Expr::LetBe(String::new())))?;
            f.write_char(')')
        }
        Expr::Dup(_) => f.write_str("$dup"),
        Expr::LetBe(_) => f.write_str("$it"),
        Expr::SpliceOriginal => f.write_str("<original>"),
    }
}

#[cfg(test)]
mod tests {
    use crate::dom::factory::*;
    use crate::dom::LabelArena;

    #[test]
    fn renders_precedence() {
        assert_eq!(mul(add(int(1), var("a")), var("b")).to_string(), "(1 + a) * b");
        assert_eq!(sub(var("a"), sub(var("b"), var("c"))).to_string(), "a - (b - c)");
        assert_eq!(and(lt(var("a"), int(3)), not(var("f"))).to_string(), "a < 3 && !f");
        assert_eq!(cast(add(var("a"), int(1)), "J").to_string(), "(long) (a + 1)");
    }

    #[test]
    fn renders_literals() {
        assert_eq!(long(5).to_string(), "5L");
        assert_eq!(float(1.5).to_string(), "1.5F");
        assert_eq!(char(b'a' as u16).to_string(), "'a'");
        assert_eq!(char(10).to_string(), "'\\u000a'");
        assert_eq!(string("hi\n").to_string(), "\"hi\\n\"");
        assert_eq!(byte(-3).to_string(), "(byte) -3");
    }

    #[test]
    fn renders_statements() {
        let mut arena = LabelArena::new();
        let l = arena.fresh();
        let body = block(vec![
            declare_var("I", "v1"),
            if_jump(ge(var("v1"), int(0)), l),
            assign_static("java/lang/System", "x", "I", int(1)),
            mark(l),
            if_else(var("f"), block(vec![ret()]), block(vec![])),
        ]);
        assert_eq!(
            body.to_string(),
            "{\n    int v1;\n    if (v1 >= 0) goto L0;\n    java.lang.System.x = 1;\n    L0:\n    if (f) {\n        return;\n    }\n}"
        );
    }

    #[test]
    fn renders_method_signature() {
        use crate::dom::MethodDom;
        use crate::insn::{MethodAccessFlags, MethodInfo};

        let info = MethodInfo::new("demo/Math", "sum", "(IJ)J")
            .with_flags(MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC)
            .with_parameter_names(vec!["a".into()]);
        let method = MethodDom::new(info, block(vec![ret_value(add(var("a"), var("arg1")))]));
        assert_eq!(method.modifiers(), vec!["public", "static"]);
        assert_eq!(
            method.to_string(),
            "public static long sum(int a, long arg1) {\n    return a + arg1;\n}"
        );
    }

    #[test]
    fn renders_try_and_top() {
        let stmt = try_catch(
            block(vec![]),
            vec![catch("java/io/IOException", "e", block(vec![])), finally(block(vec![]))],
        );
        assert_eq!(stmt.to_string(), "try {} catch (java.io.IOException e) {} finally {}");
        let t = top(var("x"), |dup, it| add(dup, it));
        assert_eq!(t.to_string(), "top(x => $dup + $it)");
    }
}
