use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use crate::descriptor;
use crate::insn::{MethodAccessFlags, MethodInfo};

/// An opaque jump target inside a tree.
///
/// Labels are small integer handles handed out by a [`LabelArena`]; two trees
/// built from different arenas are compared through a
/// [`LabelContext`](super::compare::LabelContext).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Label(pub(crate) u32);

impl Label {
    pub fn index(self) -> u32 {
        self.0
    }
}

/// Allocates labels for one decompilation or rewriting pass.
#[derive(Clone, Debug, Default)]
pub struct LabelArena {
    next: u32,
}

impl LabelArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// An arena whose labels never collide with any label in `tree`.
    pub fn above(tree: &Stmt) -> Self {
        let mut max = None;
        super::visit::for_each_label(tree, &mut |label| {
            max = max.max(Some(label.0));
        });
        LabelArena {
            next: max.map_or(0, |m| m + 1),
        }
    }

    pub fn fresh(&mut self) -> Label {
        let label = Label(self.next);
        self.next += 1;
        label
    }

    pub fn allocated(&self) -> u32 {
        self.next
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ArithmeticOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ShiftOp {
    Shl,
    Shr,
    Ushr,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BitwiseOp {
    And,
    Or,
    Xor,
}

/// Short-circuit boolean operators.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LogicalOp {
    And,
    Or,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Ge,
    Gt,
    Le,
}

impl CompareOp {
    /// The operator that holds exactly when `self` does not (ignoring NaN).
    pub fn negate(self) -> CompareOp {
        match self {
            CompareOp::Eq => CompareOp::Ne,
            CompareOp::Ne => CompareOp::Eq,
            CompareOp::Lt => CompareOp::Ge,
            CompareOp::Ge => CompareOp::Lt,
            CompareOp::Gt => CompareOp::Le,
            CompareOp::Le => CompareOp::Gt,
        }
    }
}

/// Reference identity (`==` / `!=` on objects).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IdentityOp {
    Eq,
    Ne,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum InvokeKind {
    Static,
    Virtual,
    Special,
    Interface,
}

impl InvokeKind {
    pub fn has_target(self) -> bool {
        self != InvokeKind::Static
    }
}

#[derive(Clone, Debug)]
pub enum Literal {
    Bool(bool),
    Byte(i8),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    /// A UTF-16 code unit.
    Char(u16),
    String(String),
}

impl Literal {
    pub fn descriptor(&self) -> &'static str {
        match self {
            Literal::Bool(_) => descriptor::BOOLEAN,
            Literal::Byte(_) => descriptor::BYTE,
            Literal::Short(_) => descriptor::SHORT,
            Literal::Int(_) => descriptor::INT,
            Literal::Long(_) => descriptor::LONG,
            Literal::Float(_) => descriptor::FLOAT,
            Literal::Double(_) => descriptor::DOUBLE,
            Literal::Char(_) => descriptor::CHAR,
            Literal::String(_) => descriptor::STRING,
        }
    }

    /// The `int` the machine holds for sub-int literals.
    pub fn as_int(&self) -> Option<i32> {
        match *self {
            Literal::Bool(b) => Some(b as i32),
            Literal::Byte(v) => Some(v as i32),
            Literal::Short(v) => Some(v as i32),
            Literal::Int(v) => Some(v),
            Literal::Char(v) => Some(v as i32),
            _ => None,
        }
    }
}

/// A method call. `target` is absent exactly for static calls.
#[derive(Clone, Debug)]
pub struct Invocation {
    pub kind: InvokeKind,
    /// Internal name of the declaring class.
    pub owner: String,
    pub name: String,
    pub descriptor: String,
    pub target: Option<Box<Expr>>,
    pub args: Vec<Expr>,
}

/// Allocation plus constructor call.
#[derive(Clone, Debug)]
pub struct NewInstance {
    /// Internal name of the instantiated class.
    pub class_name: String,
    pub param_types: Vec<String>,
    pub args: Vec<Expr>,
}

/// One handler of a try/catch. A `None` exception type marks the finally body.
#[derive(Clone, Debug)]
pub struct Catch {
    /// Internal name of the caught class.
    pub exception_type: Option<String>,
    pub name: String,
    pub body: Stmt,
}

impl Catch {
    pub fn is_finally(&self) -> bool {
        self.exception_type.is_none()
    }
}

/// The rewrite callback of [`Expr::Top`]. It receives a handle that
/// duplicates the bound value and a handle that consumes it.
#[derive(Clone)]
pub struct TopUsage(pub Rc<dyn Fn(Expr, Expr) -> Expr>);

impl TopUsage {
    pub fn new(f: impl Fn(Expr, Expr) -> Expr + 'static) -> Self {
        TopUsage(Rc::new(f))
    }

    pub fn apply(&self, dup: Expr, let_be: Expr) -> Expr {
        (self.0)(dup, let_be)
    }
}

impl fmt::Debug for TopUsage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TopUsage(..)")
    }
}

#[derive(Clone, Debug)]
pub enum Stmt {
    Block(Vec<Stmt>),
    DeclareVar {
        ty: String,
        name: String,
    },
    AssignVar {
        name: String,
        value: Expr,
    },
    AssignField {
        target: Expr,
        name: String,
        ty: String,
        value: Expr,
    },
    AssignStatic {
        owner: String,
        name: String,
        ty: String,
        value: Expr,
    },
    Increment {
        name: String,
        amount: i16,
    },
    Return,
    ReturnValue(Expr),
    IfElse {
        cond: Expr,
        then: Box<Stmt>,
        otherwise: Box<Stmt>,
    },
    /// Jump to `label` when `cond` holds.
    IfJump {
        cond: Expr,
        label: Label,
    },
    /// Leave the innermost switch.
    BreakCase,
    Mark(Label),
    Goto(Label),
    Switch {
        value: Expr,
        cases: BTreeMap<i32, Stmt>,
        default: Box<Stmt>,
    },
    /// Label-based dispatch, as decompiled. `keys[i]` jumps to `labels[i]`.
    RawSwitch {
        value: Expr,
        default: Label,
        keys: Vec<i32>,
        labels: Vec<Label>,
    },
    Invoke(Invocation),
    NewInstance(NewInstance),
    ArrayStore {
        array: Expr,
        index: Expr,
        value: Expr,
    },
    Throw(Expr),
    TryCatch {
        body: Box<Stmt>,
        catches: Vec<Catch>,
    },
    /// Replays the method's original body; its returns fall through to the next statement.
    SpliceOriginal,
    /// String-named labels, checked by the named label registry.
    NamedMark(String),
    NamedGoto(String),
}

impl Stmt {
    /// A block with no statements.
    pub fn is_empty_block(&self) -> bool {
        matches!(self, Stmt::Block(stmts) if stmts.iter().all(Stmt::is_empty_block))
    }
}

#[derive(Clone, Debug)]
pub enum Expr {
    Literal(Literal),
    Null,
    Arithmetic {
        op: ArithmeticOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Shift {
        op: ShiftOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Bitwise {
        op: BitwiseOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Logical {
        op: LogicalOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Compare {
        op: CompareOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Identity {
        op: IdentityOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Not(Box<Expr>),
    Negate(Box<Expr>),
    Var(String),
    Field {
        target: Box<Expr>,
        name: String,
        ty: String,
    },
    StaticField {
        owner: String,
        name: String,
        ty: String,
    },
    This,
    InstanceOf {
        value: Box<Expr>,
        ty: String,
    },
    Cast {
        value: Box<Expr>,
        ty: String,
    },
    ClassLiteral(String),
    ArrayLength(Box<Expr>),
    Invoke(Invocation),
    NewInstance(NewInstance),
    IfElse {
        cond: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
    /// Statements and exactly one expression, which supplies the value.
    Block(Vec<CodeDom>),
    /// Evaluates `value` once and hands it to `usage`.
    Top {
        value: Box<Expr>,
        usage: TopUsage,
    },
    /// Copy of the value bound by the enclosing `Top`, of the given type.
    Dup(String),
    /// The value bound by the enclosing `Top` itself, of the given type.
    LetBe(String),
    /// Replays the method's original body; the returned value becomes the result.
    SpliceOriginal,
}

/// Either kind of tree node.
#[derive(Clone, Debug)]
pub enum CodeDom {
    Stmt(Stmt),
    Expr(Expr),
}

impl From<Stmt> for CodeDom {
    fn from(stmt: Stmt) -> Self {
        CodeDom::Stmt(stmt)
    }
}

impl From<Expr> for CodeDom {
    fn from(expr: Expr) -> Self {
        CodeDom::Expr(expr)
    }
}

/// A whole method: the signature a body was decompiled under, and the body.
#[derive(Clone, Debug)]
pub struct MethodDom {
    pub info: MethodInfo,
    pub body: Stmt,
}

impl MethodDom {
    pub fn new(info: MethodInfo, body: Stmt) -> Self {
        MethodDom { info, body }
    }

    /// Source keywords for the access flags, in declaration order.
    pub fn modifiers(&self) -> Vec<&'static str> {
        const KEYWORDS: [(MethodAccessFlags, &str); 9] = [
            (MethodAccessFlags::PUBLIC, "public"),
            (MethodAccessFlags::PROTECTED, "protected"),
            (MethodAccessFlags::PRIVATE, "private"),
            (MethodAccessFlags::ABSTRACT, "abstract"),
            (MethodAccessFlags::STATIC, "static"),
            (MethodAccessFlags::FINAL, "final"),
            (MethodAccessFlags::SYNCHRONIZED, "synchronized"),
            (MethodAccessFlags::NATIVE, "native"),
            (MethodAccessFlags::STRICT, "strictfp"),
        ];
        KEYWORDS
            .iter()
            .filter(|(flag, _)| self.info.access_flags.contains(*flag))
            .map(|&(_, keyword)| keyword)
            .collect()
    }
}
