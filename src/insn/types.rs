use crate::descriptor::{self, ValueKind};
use crate::dom::{ArithmeticOp, BitwiseOp, CompareOp, InvokeKind, ShiftOp};

/// A jump target in an instruction stream. Only meaningful within one [`MethodBody`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Label(pub u32);

impl std::fmt::Display for Label {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "L{}", self.0)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Constant {
    Null,
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    String(String),
    /// A class literal, by descriptor.
    Class(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FieldOp {
    GetField,
    PutField,
    GetStatic,
    PutStatic,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TypeOp {
    New,
    CheckCast,
    InstanceOf,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StackOp {
    Pop,
    Pop2,
    Dup,
    Dup2,
}

/// Element category of an array store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ArrayKind {
    Int,
    Long,
    Float,
    Double,
    Reference,
    /// `bastore`, shared by byte and boolean arrays.
    Byte,
    Char,
    Short,
}

impl ArrayKind {
    /// The store instruction for arrays of `element` (a descriptor).
    pub fn for_element(element: &str) -> Option<ArrayKind> {
        Some(match element {
            descriptor::BOOLEAN | descriptor::BYTE => ArrayKind::Byte,
            descriptor::CHAR => ArrayKind::Char,
            descriptor::SHORT => ArrayKind::Short,
            descriptor::INT => ArrayKind::Int,
            descriptor::LONG => ArrayKind::Long,
            descriptor::FLOAT => ArrayKind::Float,
            descriptor::DOUBLE => ArrayKind::Double,
            _ if descriptor::is_reference(element) => ArrayKind::Reference,
            _ => return None,
        })
    }

    pub fn value_kind(self) -> ValueKind {
        match self {
            ArrayKind::Long => ValueKind::Long,
            ArrayKind::Float => ValueKind::Float,
            ArrayKind::Double => ValueKind::Double,
            ArrayKind::Reference => ValueKind::Reference,
            ArrayKind::Int | ArrayKind::Byte | ArrayKind::Char | ArrayKind::Short => ValueKind::Int,
        }
    }
}

/// Primitive conversions (`i2l`, `d2f`, `i2b`, ...).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Conversion {
    I2L,
    I2F,
    I2D,
    L2I,
    L2F,
    L2D,
    F2I,
    F2L,
    F2D,
    D2I,
    D2L,
    D2F,
    I2B,
    I2C,
    I2S,
}

impl Conversion {
    /// Descriptor of the converted value.
    pub fn result(self) -> &'static str {
        match self {
            Conversion::L2I | Conversion::F2I | Conversion::D2I => descriptor::INT,
            Conversion::I2L | Conversion::F2L | Conversion::D2L => descriptor::LONG,
            Conversion::I2F | Conversion::L2F | Conversion::D2F => descriptor::FLOAT,
            Conversion::I2D | Conversion::L2D | Conversion::F2D => descriptor::DOUBLE,
            Conversion::I2B => descriptor::BYTE,
            Conversion::I2C => descriptor::CHAR,
            Conversion::I2S => descriptor::SHORT,
        }
    }

    pub fn source(self) -> ValueKind {
        match self {
            Conversion::I2L
            | Conversion::I2F
            | Conversion::I2D
            | Conversion::I2B
            | Conversion::I2C
            | Conversion::I2S => ValueKind::Int,
            Conversion::L2I | Conversion::L2F | Conversion::L2D => ValueKind::Long,
            Conversion::F2I | Conversion::F2L | Conversion::F2D => ValueKind::Float,
            Conversion::D2I | Conversion::D2L | Conversion::D2F => ValueKind::Double,
        }
    }
}

/// The compare instructions that reduce two values to -1, 0 or 1.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CompareInsn {
    Lcmp,
    /// NaN yields -1.
    Fcmpl,
    /// NaN yields 1.
    Fcmpg,
    Dcmpl,
    Dcmpg,
}

impl CompareInsn {
    pub fn operand_kind(self) -> ValueKind {
        match self {
            CompareInsn::Lcmp => ValueKind::Long,
            CompareInsn::Fcmpl | CompareInsn::Fcmpg => ValueKind::Float,
            CompareInsn::Dcmpl | CompareInsn::Dcmpg => ValueKind::Double,
        }
    }

    /// What the instruction produces when an operand is NaN.
    pub fn nan_result(self) -> i32 {
        match self {
            CompareInsn::Lcmp => 0,
            CompareInsn::Fcmpl | CompareInsn::Dcmpl => -1,
            CompareInsn::Fcmpg | CompareInsn::Dcmpg => 1,
        }
    }
}

/// Branch conditions. Every variant except `Always` pops its operands.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum JumpCond {
    Always,
    /// `ifeq`, `iflt`, ...: compares an int against zero.
    Zero(CompareOp),
    /// `if_icmpeq`, `if_icmplt`, ...
    IntCompare(CompareOp),
    RefEq,
    RefNe,
    Null,
    NonNull,
}

impl JumpCond {
    pub fn operands(self) -> usize {
        match self {
            JumpCond::Always => 0,
            JumpCond::Zero(_) | JumpCond::Null | JumpCond::NonNull => 1,
            JumpCond::IntCompare(_) | JumpCond::RefEq | JumpCond::RefNe => 2,
        }
    }
}

/// One symbolic instruction. Labels and references stay symbolic; constant
/// pool indices and branch offsets only exist after assembly.
#[derive(Clone, Debug, PartialEq)]
pub enum Insn {
    Const(Constant),
    Load { kind: ValueKind, slot: u16 },
    Store { kind: ValueKind, slot: u16 },
    Iinc { slot: u16, amount: i16 },
    Field {
        op: FieldOp,
        owner: String,
        name: String,
        descriptor: String,
    },
    Invoke {
        kind: InvokeKind,
        owner: String,
        name: String,
        descriptor: String,
    },
    /// `new`, `checkcast`, `instanceof` with an internal class name.
    Type { op: TypeOp, class_name: String },
    Stack(StackOp),
    ArrayLength,
    ArrayStore(ArrayKind),
    Arith { op: ArithmeticOp, kind: ValueKind },
    Neg(ValueKind),
    Shift { op: ShiftOp, kind: ValueKind },
    Bitwise { op: BitwiseOp, kind: ValueKind },
    Convert(Conversion),
    Compare(CompareInsn),
    Jump { cond: JumpCond, target: Label },
    Mark(Label),
    TableSwitch {
        low: i32,
        high: i32,
        default: Label,
        targets: Vec<Label>,
    },
    LookupSwitch { default: Label, pairs: Vec<(i32, Label)> },
    Return(Option<ValueKind>),
    Throw,
}

impl Insn {
    /// Control never falls through to the next instruction.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Insn::Jump { cond: JumpCond::Always, .. }
                | Insn::TableSwitch { .. }
                | Insn::LookupSwitch { .. }
                | Insn::Return(_)
                | Insn::Throw
        )
    }

    /// Every label this instruction can transfer control to.
    pub fn targets(&self) -> Vec<Label> {
        match self {
            Insn::Jump { target, .. } => vec![*target],
            Insn::TableSwitch { default, targets, .. } => {
                let mut all = targets.clone();
                all.push(*default);
                all
            }
            Insn::LookupSwitch { default, pairs } => {
                let mut all: Vec<Label> = pairs.iter().map(|(_, l)| *l).collect();
                all.push(*default);
                all
            }
            _ => Vec::new(),
        }
    }
}

/// An exception handler covering `[start, end)`. A `None` type catches everything.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TryCatchBlock {
    pub start: Label,
    pub end: Label,
    pub handler: Label,
    pub exception_type: Option<String>,
}

/// A growable instruction sequence.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct InsnList {
    insns: Vec<Insn>,
}

impl InsnList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, insn: Insn) {
        self.insns.push(insn);
    }

    pub fn len(&self) -> usize {
        self.insns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.insns.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Insn> {
        self.insns.iter()
    }

    pub fn last(&self) -> Option<&Insn> {
        self.insns.last()
    }

    pub fn as_slice(&self) -> &[Insn] {
        &self.insns
    }
}

impl From<Vec<Insn>> for InsnList {
    fn from(insns: Vec<Insn>) -> Self {
        InsnList { insns }
    }
}

impl<'a> IntoIterator for &'a InsnList {
    type Item = &'a Insn;
    type IntoIter = std::slice::Iter<'a, Insn>;

    fn into_iter(self) -> Self::IntoIter {
        self.insns.iter()
    }
}

/// A method's code: instructions, handlers and frame size.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MethodBody {
    pub insns: InsnList,
    pub try_catch_blocks: Vec<TryCatchBlock>,
    pub max_locals: u16,
    next_label: u32,
}

impl MethodBody {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a body from existing instructions; new labels start after the highest one used.
    pub fn from_parts(insns: Vec<Insn>, try_catch_blocks: Vec<TryCatchBlock>, max_locals: u16) -> Self {
        let mut highest = None;
        for insn in &insns {
            if let Insn::Mark(l) = insn {
                highest = highest.max(Some(l.0));
            }
            for l in insn.targets() {
                highest = highest.max(Some(l.0));
            }
        }
        for block in &try_catch_blocks {
            highest = highest.max(Some(block.start.0.max(block.end.0).max(block.handler.0)));
        }
        MethodBody {
            insns: insns.into(),
            try_catch_blocks,
            max_locals,
            next_label: highest.map_or(0, |h| h + 1),
        }
    }

    pub fn new_label(&mut self) -> Label {
        let label = Label(self.next_label);
        self.next_label += 1;
        label
    }

    /// Keeps `new_label` from handing out `label` or anything below it.
    pub(crate) fn reserve_label(&mut self, label: Label) {
        self.next_label = self.next_label.max(label.0 + 1);
    }

    pub fn labels_allocated(&self) -> u32 {
        self.next_label
    }
}

bitflags! {
    #[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
    pub struct MethodAccessFlags: u16 {
        const PUBLIC = 0x0001;       //	Declared public; may be accessed from outside its package.
        const PRIVATE = 0x0002;      //	Declared private; accessible only within the defining class.
        const PROTECTED = 0x0004;    //	Declared protected; may be accessed within subclasses.
        const STATIC = 0x0008;       //	Declared static.
        const FINAL = 0x0010;        //	Declared final; must not be overridden.
        const SYNCHRONIZED = 0x0020; //	Declared synchronized; invocation is wrapped by a monitor use.
        const BRIDGE = 0x0040;       //	A bridge method, generated by the compiler.
        const VARARGS = 0x0080;      //	Declared with variable number of arguments.
        const NATIVE = 0x0100;       //	Declared native; implemented in a language other than Java.
        const ABSTRACT = 0x0400;     //	Declared abstract; no implementation is provided.
        const STRICT = 0x0800;       //	Declared strictfp; floating-point mode is FP-strict.
        const SYNTHETIC = 0x1000;    //	Declared synthetic; not present in the source code.
    }
}

/// A debug-table entry naming a local slot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LocalVariable {
    pub slot: u16,
    pub name: String,
    pub descriptor: String,
}

/// What the decompiler and recompiler need to know about the method around a body.
#[derive(Clone, Debug)]
pub struct MethodInfo {
    pub name: String,
    pub descriptor: String,
    /// Internal name of the declaring class.
    pub class_name: String,
    pub access_flags: MethodAccessFlags,
    pub parameter_names: Option<Vec<String>>,
    pub local_variables: Vec<LocalVariable>,
}

impl MethodInfo {
    pub fn new(class_name: impl Into<String>, name: impl Into<String>, descriptor: impl Into<String>) -> Self {
        MethodInfo {
            name: name.into(),
            descriptor: descriptor.into(),
            class_name: class_name.into(),
            access_flags: MethodAccessFlags::PUBLIC,
            parameter_names: None,
            local_variables: Vec::new(),
        }
    }

    pub fn with_flags(mut self, flags: MethodAccessFlags) -> Self {
        self.access_flags = flags;
        self
    }

    pub fn with_parameter_names(mut self, names: Vec<String>) -> Self {
        self.parameter_names = Some(names);
        self
    }

    pub fn with_local(mut self, slot: u16, name: impl Into<String>, descriptor: impl Into<String>) -> Self {
        self.local_variables.push(LocalVariable {
            slot,
            name: name.into(),
            descriptor: descriptor.into(),
        });
        self
    }

    pub fn is_static(&self) -> bool {
        self.access_flags.contains(MethodAccessFlags::STATIC)
    }

    /// Parameter descriptors and their names, synthesizing `argN` where no name is known.
    pub fn parameters(&self) -> Option<Vec<(String, String)>> {
        let params = descriptor::parameter_descriptors(&self.descriptor)?;
        Some(
            params
                .into_iter()
                .enumerate()
                .map(|(i, desc)| {
                    let name = self
                        .parameter_names
                        .as_ref()
                        .and_then(|names| names.get(i).cloned())
                        .unwrap_or_else(|| format!("arg{}", i));
                    (name, desc)
                })
                .collect(),
        )
    }

    pub fn return_descriptor(&self) -> Option<String> {
        descriptor::return_descriptor(&self.descriptor)
    }
}
