//! A small interpreter for symbolic instruction streams.
//!
//! Methods called by the code under test are answered by the machine itself:
//! every call is logged, returns a configured value (or the zero value of its
//! return type), or throws a configured exception.

use std::collections::HashMap;

use classfile_codedom::descriptor;
use classfile_codedom::dom::{ArithmeticOp, BitwiseOp, CompareOp, InvokeKind, ShiftOp};
use classfile_codedom::insn::{
    ArrayKind, CompareInsn, Constant, Conversion, FieldOp, Insn, JumpCond, Label, MethodBody, StackOp, TypeOp,
};

const STEP_LIMIT: usize = 100_000;

#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Null,
    Str(String),
    Class(String),
    /// Index into the machine's heap.
    Object(usize),
    /// Index into the machine's arrays.
    Array(usize),
}

impl Value {
    fn is_wide(&self) -> bool {
        matches!(self, Value::Long(_) | Value::Double(_))
    }

    /// The default value of a field or return of type `desc`.
    pub fn zero(desc: &str) -> Option<Value> {
        match desc {
            descriptor::VOID => None,
            descriptor::LONG => Some(Value::Long(0)),
            descriptor::FLOAT => Some(Value::Float(0.0)),
            descriptor::DOUBLE => Some(Value::Double(0.0)),
            _ if descriptor::is_reference(desc) => Some(Value::Null),
            _ => Some(Value::Int(0)),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Outcome {
    Returned(Option<Value>),
    Threw(Value),
}

/// The result of running one method body.
#[derive(Clone, Debug)]
pub struct Run {
    pub outcome: Outcome,
    /// Operand stack entries still present when the method completed.
    pub leftover: usize,
}

#[derive(Clone, Debug)]
pub struct Object {
    pub class_name: String,
    pub fields: HashMap<String, Value>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Call {
    pub owner: String,
    pub name: String,
    pub receiver: Option<Value>,
    pub args: Vec<Value>,
}

#[derive(Default)]
pub struct Machine {
    pub heap: Vec<Object>,
    pub arrays: Vec<Vec<Value>>,
    pub statics: HashMap<(String, String), Value>,
    pub calls: Vec<Call>,
    returns: HashMap<String, Value>,
    throws: HashMap<String, String>,
    parents: HashMap<String, String>,
}

impl Machine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Calls to any method named `name` return `value`.
    pub fn returning(mut self, name: &str, value: Value) -> Self {
        self.returns.insert(name.to_string(), value);
        self
    }

    /// Calls to any method named `name` throw a new `class_name`.
    pub fn throwing(mut self, name: &str, class_name: &str) -> Self {
        self.throws.insert(name.to_string(), class_name.to_string());
        self
    }

    pub fn subclass(mut self, class_name: &str, parent: &str) -> Self {
        self.parents.insert(class_name.to_string(), parent.to_string());
        self
    }

    pub fn count(&self, name: &str) -> usize {
        self.calls.iter().filter(|c| c.name == name).count()
    }

    pub fn call_names(&self) -> Vec<&str> {
        self.calls.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn allocate(&mut self, class_name: &str) -> Value {
        self.heap.push(Object {
            class_name: class_name.to_string(),
            fields: HashMap::new(),
        });
        Value::Object(self.heap.len() - 1)
    }

    pub fn array(&mut self, values: Vec<Value>) -> Value {
        self.arrays.push(values);
        Value::Array(self.arrays.len() - 1)
    }

    pub fn class_of(&self, value: &Value) -> Option<String> {
        match value {
            Value::Object(id) => Some(self.heap[*id].class_name.clone()),
            Value::Str(_) => Some("java/lang/String".into()),
            Value::Class(_) => Some("java/lang/Class".into()),
            _ => None,
        }
    }

    fn is_instance(&self, value: &Value, class_name: &str) -> bool {
        let mut current = self.class_of(value);
        while let Some(name) = current {
            if name == class_name || class_name == "java/lang/Object" {
                return true;
            }
            current = self.parents.get(&name).cloned();
        }
        false
    }

    /// Runs `body` with `args` in the first local slots, receiver first.
    pub fn run(&mut self, body: &MethodBody, args: Vec<Value>) -> Run {
        let insns = body.insns.as_slice();
        let marks: HashMap<Label, usize> = insns
            .iter()
            .enumerate()
            .filter_map(|(i, insn)| match insn {
                Insn::Mark(label) => Some((*label, i)),
                _ => None,
            })
            .collect();
        let at = |label: &Label| marks[label];

        let mut locals: Vec<Option<Value>> = Vec::new();
        for arg in args {
            let wide = arg.is_wide();
            locals.push(Some(arg));
            if wide {
                locals.push(None);
            }
        }
        let size = usize::from(body.max_locals).max(locals.len());
        locals.resize(size, None);

        let mut stack: Vec<Value> = Vec::new();
        let mut pc = 0;
        for _ in 0..STEP_LIMIT {
            let Some(insn) = insns.get(pc) else {
                panic!("fell off the end of the method");
            };
            pc += 1;
            let thrown = match self.step(insn, &mut stack, &mut locals, &mut pc, &at) {
                Step::Next => continue,
                Step::Return(value) => {
                    return Run {
                        outcome: Outcome::Returned(value),
                        leftover: stack.len(),
                    }
                }
                Step::Throw(exception) => exception,
            };
            let index = pc - 1;
            let handler = body.try_catch_blocks.iter().find(|block| {
                at(&block.start) <= index
                    && index < at(&block.end)
                    && block
                        .exception_type
                        .as_ref()
                        .map_or(true, |ty| self.is_instance(&thrown, ty))
            });
            match handler {
                Some(block) => {
                    stack.clear();
                    stack.push(thrown);
                    pc = at(&block.handler);
                }
                None => {
                    return Run {
                        outcome: Outcome::Threw(thrown),
                        leftover: stack.len(),
                    }
                }
            }
        }
        panic!("step limit exceeded");
    }

    fn step(
        &mut self,
        insn: &Insn,
        stack: &mut Vec<Value>,
        locals: &mut [Option<Value>],
        pc: &mut usize,
        at: &dyn Fn(&Label) -> usize,
    ) -> Step {
        match insn {
            Insn::Const(constant) => stack.push(match constant {
                Constant::Null => Value::Null,
                Constant::Int(v) => Value::Int(*v),
                Constant::Long(v) => Value::Long(*v),
                Constant::Float(v) => Value::Float(*v),
                Constant::Double(v) => Value::Double(*v),
                Constant::String(s) => Value::Str(s.clone()),
                Constant::Class(desc) => Value::Class(desc.clone()),
            }),
            Insn::Load { slot, .. } => {
                let value = locals[usize::from(*slot)].clone().expect("load of an unset local");
                stack.push(value);
            }
            Insn::Store { slot, .. } => {
                let value = pop(stack);
                let slot = usize::from(*slot);
                if value.is_wide() {
                    locals[slot + 1] = None;
                }
                locals[slot] = Some(value);
            }
            Insn::Iinc { slot, amount } => match &mut locals[usize::from(*slot)] {
                Some(Value::Int(v)) => *v = v.wrapping_add(i32::from(*amount)),
                other => panic!("iinc on {:?}", other),
            },
            Insn::Field {
                op,
                owner,
                name,
                descriptor,
            } => match op {
                FieldOp::GetStatic => {
                    let key = (owner.clone(), name.clone());
                    let value = self.statics.get(&key).cloned().or_else(|| Value::zero(descriptor));
                    stack.push(value.expect("void field"));
                }
                FieldOp::PutStatic => {
                    let value = pop(stack);
                    self.statics.insert((owner.clone(), name.clone()), value);
                }
                FieldOp::GetField => {
                    let Value::Object(id) = pop(stack) else {
                        return self.throw_new("java/lang/NullPointerException");
                    };
                    let value = self.heap[id].fields.get(name).cloned().or_else(|| Value::zero(descriptor));
                    stack.push(value.expect("void field"));
                }
                FieldOp::PutField => {
                    let value = pop(stack);
                    let Value::Object(id) = pop(stack) else {
                        return self.throw_new("java/lang/NullPointerException");
                    };
                    self.heap[id].fields.insert(name.clone(), value);
                }
            },
            Insn::Invoke {
                kind,
                owner,
                name,
                descriptor,
            } => {
                let params = descriptor::parameter_descriptors(descriptor).expect("method descriptor");
                let mut args: Vec<Value> = (0..params.len()).map(|_| pop(stack)).collect();
                args.reverse();
                let receiver = (*kind != InvokeKind::Static).then(|| pop(stack));
                if receiver == Some(Value::Null) {
                    return self.throw_new("java/lang/NullPointerException");
                }
                self.calls.push(Call {
                    owner: owner.clone(),
                    name: name.clone(),
                    receiver,
                    args,
                });
                if let Some(class_name) = self.throws.get(name).cloned() {
                    return self.throw_new(&class_name);
                }
                let ret = descriptor::return_descriptor(descriptor).expect("method descriptor");
                if let Some(value) = self.returns.get(name).cloned().or_else(|| Value::zero(&ret)) {
                    stack.push(value);
                }
            }
            Insn::Type { op, class_name } => match op {
                TypeOp::New => {
                    let object = self.allocate(class_name);
                    stack.push(object);
                }
                TypeOp::CheckCast => {}
                TypeOp::InstanceOf => {
                    let value = pop(stack);
                    let result = self.is_instance(&value, class_name);
                    stack.push(Value::Int(i32::from(result)));
                }
            },
            Insn::Stack(op) => match op {
                StackOp::Pop => {
                    let value = pop(stack);
                    assert!(!value.is_wide(), "pop of a wide value");
                }
                StackOp::Pop2 => {
                    if !pop(stack).is_wide() {
                        pop(stack);
                    }
                }
                StackOp::Dup => {
                    let top = stack.last().cloned().expect("dup of an empty stack");
                    stack.push(top);
                }
                StackOp::Dup2 => {
                    let top = stack.last().cloned().expect("dup2 of an empty stack");
                    if top.is_wide() {
                        stack.push(top);
                    } else {
                        let below = stack[stack.len() - 2].clone();
                        stack.push(below);
                        stack.push(top);
                    }
                }
            },
            Insn::ArrayLength => {
                let Value::Array(id) = pop(stack) else {
                    return self.throw_new("java/lang/NullPointerException");
                };
                stack.push(Value::Int(self.arrays[id].len() as i32));
            }
            Insn::ArrayStore(kind) => {
                let value = pop(stack);
                let index = int(pop(stack));
                let Value::Array(id) = pop(stack) else {
                    return self.throw_new("java/lang/NullPointerException");
                };
                let value = match (kind, value) {
                    (ArrayKind::Byte, Value::Int(v)) => Value::Int(i32::from(v as i8)),
                    (ArrayKind::Char, Value::Int(v)) => Value::Int(i32::from(v as u16)),
                    (ArrayKind::Short, Value::Int(v)) => Value::Int(i32::from(v as i16)),
                    (_, v) => v,
                };
                match self.arrays[id].get_mut(index as usize) {
                    Some(slot) if index >= 0 => *slot = value,
                    _ => return self.throw_new("java/lang/ArrayIndexOutOfBoundsException"),
                }
            }
            Insn::Arith { op, .. } => {
                let rhs = pop(stack);
                let lhs = pop(stack);
                match arithmetic(*op, lhs, rhs) {
                    Some(value) => stack.push(value),
                    None => return self.throw_new("java/lang/ArithmeticException"),
                }
            }
            Insn::Neg(_) => {
                let value = match pop(stack) {
                    Value::Int(v) => Value::Int(v.wrapping_neg()),
                    Value::Long(v) => Value::Long(v.wrapping_neg()),
                    Value::Float(v) => Value::Float(-v),
                    Value::Double(v) => Value::Double(-v),
                    other => panic!("neg of {:?}", other),
                };
                stack.push(value);
            }
            Insn::Shift { op, .. } => {
                let distance = int(pop(stack)) as u32;
                let value = match (op, pop(stack)) {
                    (ShiftOp::Shl, Value::Int(v)) => Value::Int(v.wrapping_shl(distance)),
                    (ShiftOp::Shr, Value::Int(v)) => Value::Int(v.wrapping_shr(distance)),
                    (ShiftOp::Ushr, Value::Int(v)) => Value::Int((v as u32).wrapping_shr(distance) as i32),
                    (ShiftOp::Shl, Value::Long(v)) => Value::Long(v.wrapping_shl(distance)),
                    (ShiftOp::Shr, Value::Long(v)) => Value::Long(v.wrapping_shr(distance)),
                    (ShiftOp::Ushr, Value::Long(v)) => Value::Long((v as u64).wrapping_shr(distance) as i64),
                    (_, other) => panic!("shift of {:?}", other),
                };
                stack.push(value);
            }
            Insn::Bitwise { op, .. } => {
                let rhs = pop(stack);
                let lhs = pop(stack);
                let value = match (lhs, rhs) {
                    (Value::Int(a), Value::Int(b)) => Value::Int(match op {
                        BitwiseOp::And => a & b,
                        BitwiseOp::Or => a | b,
                        BitwiseOp::Xor => a ^ b,
                    }),
                    (Value::Long(a), Value::Long(b)) => Value::Long(match op {
                        BitwiseOp::And => a & b,
                        BitwiseOp::Or => a | b,
                        BitwiseOp::Xor => a ^ b,
                    }),
                    (a, b) => panic!("bitwise on {:?} and {:?}", a, b),
                };
                stack.push(value);
            }
            Insn::Convert(conversion) => {
                let value = pop(stack);
                stack.push(convert(*conversion, value));
            }
            Insn::Compare(compare) => {
                let rhs = pop(stack);
                let lhs = pop(stack);
                let ordering = match (lhs, rhs) {
                    (Value::Long(a), Value::Long(b)) => a.partial_cmp(&b),
                    (Value::Float(a), Value::Float(b)) => a.partial_cmp(&b),
                    (Value::Double(a), Value::Double(b)) => a.partial_cmp(&b),
                    (a, b) => panic!("{:?} on {:?} and {:?}", compare, a, b),
                };
                let result = match ordering {
                    Some(o) => o as i32,
                    None => match compare {
                        CompareInsn::Fcmpg | CompareInsn::Dcmpg => 1,
                        _ => -1,
                    },
                };
                stack.push(Value::Int(result));
            }
            Insn::Jump { cond, target } => {
                let taken = match cond {
                    JumpCond::Always => true,
                    JumpCond::Zero(op) => holds(*op, int(pop(stack)), 0),
                    JumpCond::IntCompare(op) => {
                        let rhs = int(pop(stack));
                        let lhs = int(pop(stack));
                        holds(*op, lhs, rhs)
                    }
                    JumpCond::RefEq | JumpCond::RefNe => {
                        let rhs = pop(stack);
                        let lhs = pop(stack);
                        (lhs == rhs) == (*cond == JumpCond::RefEq)
                    }
                    JumpCond::Null => pop(stack) == Value::Null,
                    JumpCond::NonNull => pop(stack) != Value::Null,
                };
                if taken {
                    *pc = at(target);
                }
            }
            Insn::Mark(_) => {}
            Insn::TableSwitch {
                low,
                high,
                default,
                targets,
            } => {
                let key = int(pop(stack));
                *pc = if (*low..=*high).contains(&key) {
                    at(&targets[(key - low) as usize])
                } else {
                    at(default)
                };
            }
            Insn::LookupSwitch { default, pairs } => {
                let key = int(pop(stack));
                let target = pairs.iter().find(|(k, _)| *k == key).map_or(default, |(_, t)| t);
                *pc = at(target);
            }
            Insn::Return(kind) => {
                let value = kind.map(|_| pop(stack));
                return Step::Return(value);
            }
            Insn::Throw => {
                let exception = pop(stack);
                if exception == Value::Null {
                    return self.throw_new("java/lang/NullPointerException");
                }
                return Step::Throw(exception);
            }
        }
        Step::Next
    }

    fn throw_new(&mut self, class_name: &str) -> Step {
        Step::Throw(self.allocate(class_name))
    }
}

enum Step {
    Next,
    Return(Option<Value>),
    Throw(Value),
}

fn pop(stack: &mut Vec<Value>) -> Value {
    stack.pop().expect("operand stack underflow")
}

fn int(value: Value) -> i32 {
    match value {
        Value::Int(v) => v,
        other => panic!("expected an int, got {:?}", other),
    }
}

fn holds(op: CompareOp, lhs: i32, rhs: i32) -> bool {
    match op {
        CompareOp::Eq => lhs == rhs,
        CompareOp::Ne => lhs != rhs,
        CompareOp::Lt => lhs < rhs,
        CompareOp::Ge => lhs >= rhs,
        CompareOp::Gt => lhs > rhs,
        CompareOp::Le => lhs <= rhs,
    }
}

/// `None` for integer division by zero.
fn arithmetic(op: ArithmeticOp, lhs: Value, rhs: Value) -> Option<Value> {
    Some(match (lhs, rhs) {
        (Value::Int(a), Value::Int(b)) => Value::Int(match op {
            ArithmeticOp::Add => a.wrapping_add(b),
            ArithmeticOp::Sub => a.wrapping_sub(b),
            ArithmeticOp::Mul => a.wrapping_mul(b),
            ArithmeticOp::Div => a.checked_div(b).or_else(|| (b == -1).then_some(a.wrapping_neg()))?,
            ArithmeticOp::Rem => a.checked_rem(b).or_else(|| (b == -1).then_some(0))?,
        }),
        (Value::Long(a), Value::Long(b)) => Value::Long(match op {
            ArithmeticOp::Add => a.wrapping_add(b),
            ArithmeticOp::Sub => a.wrapping_sub(b),
            ArithmeticOp::Mul => a.wrapping_mul(b),
            ArithmeticOp::Div => a.checked_div(b).or_else(|| (b == -1).then_some(a.wrapping_neg()))?,
            ArithmeticOp::Rem => a.checked_rem(b).or_else(|| (b == -1).then_some(0))?,
        }),
        (Value::Float(a), Value::Float(b)) => Value::Float(match op {
            ArithmeticOp::Add => a + b,
            ArithmeticOp::Sub => a - b,
            ArithmeticOp::Mul => a * b,
            ArithmeticOp::Div => a / b,
            ArithmeticOp::Rem => a % b,
        }),
        (Value::Double(a), Value::Double(b)) => Value::Double(match op {
            ArithmeticOp::Add => a + b,
            ArithmeticOp::Sub => a - b,
            ArithmeticOp::Mul => a * b,
            ArithmeticOp::Div => a / b,
            ArithmeticOp::Rem => a % b,
        }),
        (a, b) => panic!("{:?} on {:?} and {:?}", op, a, b),
    })
}

fn convert(conversion: Conversion, value: Value) -> Value {
    match (conversion, value) {
        (Conversion::I2L, Value::Int(v)) => Value::Long(i64::from(v)),
        (Conversion::I2F, Value::Int(v)) => Value::Float(v as f32),
        (Conversion::I2D, Value::Int(v)) => Value::Double(f64::from(v)),
        (Conversion::L2I, Value::Long(v)) => Value::Int(v as i32),
        (Conversion::L2F, Value::Long(v)) => Value::Float(v as f32),
        (Conversion::L2D, Value::Long(v)) => Value::Double(v as f64),
        (Conversion::F2I, Value::Float(v)) => Value::Int(v as i32),
        (Conversion::F2L, Value::Float(v)) => Value::Long(v as i64),
        (Conversion::F2D, Value::Float(v)) => Value::Double(f64::from(v)),
        (Conversion::D2I, Value::Double(v)) => Value::Int(v as i32),
        (Conversion::D2L, Value::Double(v)) => Value::Long(v as i64),
        (Conversion::D2F, Value::Double(v)) => Value::Float(v as f32),
        (Conversion::I2B, Value::Int(v)) => Value::Int(i32::from(v as i8)),
        (Conversion::I2C, Value::Int(v)) => Value::Int(i32::from(v as u16)),
        (Conversion::I2S, Value::Int(v)) => Value::Int(i32::from(v as i16)),
        (conversion, value) => panic!("{:?} of {:?}", conversion, value),
    }
}
