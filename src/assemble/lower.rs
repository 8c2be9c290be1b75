//! Opcode selection: each symbolic instruction becomes its most compact encoding.

use crate::descriptor::{self, ValueKind};
use crate::dom::{ArithmeticOp, BitwiseOp, CompareOp, InvokeKind, ShiftOp};
use crate::insn::{ArrayKind, CompareInsn, Constant, Conversion, FieldOp, Insn, JumpCond, Label, StackOp, TypeOp};

use super::constant_pool::ConstantPool;
use super::types::Instruction;
use super::AssembleError;

type Result<T> = std::result::Result<T, AssembleError>;

/// An instruction whose branch offsets still refer to labels.
#[derive(Clone, Debug)]
pub(crate) enum Lowered {
    Fixed(Instruction),
    Branch { opcode: u8, target: Label },
    Table {
        low: i32,
        high: i32,
        default: Label,
        targets: Vec<Label>,
    },
    Lookup { default: Label, pairs: Vec<(i32, Label)> },
    Mark(Label),
}

impl Lowered {
    pub(crate) fn byte_size(&self, address: u32) -> u32 {
        let padding = super::types::switch_padding(address);
        match self {
            Lowered::Fixed(instruction) => instruction.byte_size(address),
            Lowered::Branch { .. } => 3,
            Lowered::Table { targets, .. } => 1 + padding + 12 + 4 * targets.len() as u32,
            Lowered::Lookup { pairs, .. } => 1 + padding + 8 + 8 * pairs.len() as u32,
            Lowered::Mark(_) => 0,
        }
    }
}

/// Index of `kind` within the i/l/f/d/a opcode families.
fn kind_offset(kind: ValueKind) -> u8 {
    match kind {
        ValueKind::Int => 0,
        ValueKind::Long => 1,
        ValueKind::Float => 2,
        ValueKind::Double => 3,
        ValueKind::Reference => 4,
    }
}

fn compare_offset(op: CompareOp) -> u8 {
    match op {
        CompareOp::Eq => 0,
        CompareOp::Ne => 1,
        CompareOp::Lt => 2,
        CompareOp::Ge => 3,
        CompareOp::Gt => 4,
        CompareOp::Le => 5,
    }
}

fn numeric(op: &'static str, kind: ValueKind) -> Result<u8> {
    match kind {
        ValueKind::Reference => Err(AssembleError::InvalidKind { op, kind }),
        _ => Ok(kind_offset(kind)),
    }
}

fn integral(op: &'static str, kind: ValueKind) -> Result<u8> {
    match kind {
        ValueKind::Int | ValueKind::Long => Ok(kind_offset(kind)),
        _ => Err(AssembleError::InvalidKind { op, kind }),
    }
}

fn ldc(index: u16) -> Instruction {
    match u8::try_from(index) {
        Ok(narrow) => Instruction::OpU8(0x12, narrow),
        Err(_) => Instruction::OpU16(0x13, index),
    }
}

/// `xload`/`xstore`: `short_base` is the `_0` form, `long_base` the indexed one.
fn local(short_base: u8, long_base: u8, kind: ValueKind, slot: u16) -> Instruction {
    let offset = kind_offset(kind);
    match slot {
        0..=3 => Instruction::Op(short_base + offset * 4 + slot as u8),
        4..=255 => Instruction::OpU8(long_base + offset, slot as u8),
        _ => Instruction::Wide(long_base + offset, slot),
    }
}

fn wrapper_class(primitive: &str) -> Option<&'static str> {
    Some(match primitive {
        descriptor::BOOLEAN => "java/lang/Boolean",
        descriptor::BYTE => "java/lang/Byte",
        descriptor::CHAR => "java/lang/Character",
        descriptor::SHORT => "java/lang/Short",
        descriptor::INT => "java/lang/Integer",
        descriptor::LONG => "java/lang/Long",
        descriptor::FLOAT => "java/lang/Float",
        descriptor::DOUBLE => "java/lang/Double",
        descriptor::VOID => "java/lang/Void",
        _ => return None,
    })
}

fn constant(value: &Constant, pool: &mut ConstantPool) -> Result<Instruction> {
    Ok(match value {
        Constant::Null => Instruction::Op(0x01),
        Constant::Int(v @ -1..=5) => Instruction::Op((0x03 + v) as u8),
        Constant::Int(v) => match (i8::try_from(*v), i16::try_from(*v)) {
            (Ok(byte), _) => Instruction::OpI8(0x10, byte),
            (_, Ok(short)) => Instruction::OpI16(0x11, short),
            _ => ldc(pool.integer(*v)?),
        },
        Constant::Long(0) => Instruction::Op(0x09),
        Constant::Long(1) => Instruction::Op(0x0a),
        Constant::Long(v) => Instruction::OpU16(0x14, pool.long(*v)?),
        Constant::Float(v) => match v.to_bits() {
            bits if bits == 0f32.to_bits() => Instruction::Op(0x0b),
            bits if bits == 1f32.to_bits() => Instruction::Op(0x0c),
            bits if bits == 2f32.to_bits() => Instruction::Op(0x0d),
            _ => ldc(pool.float(*v)?),
        },
        Constant::Double(v) => match v.to_bits() {
            bits if bits == 0f64.to_bits() => Instruction::Op(0x0e),
            bits if bits == 1f64.to_bits() => Instruction::Op(0x0f),
            _ => Instruction::OpU16(0x14, pool.double(*v)?),
        },
        Constant::String(s) => ldc(pool.string(s)?),
        Constant::Class(desc) => match wrapper_class(desc) {
            // `int.class` and friends live in the wrapper's TYPE field.
            Some(wrapper) => Instruction::OpU16(0xb2, pool.field_ref(wrapper, "TYPE", descriptor::CLASS)?),
            None => {
                let name = descriptor::internal_name_of_descriptor(desc).ok_or_else(|| {
                    AssembleError::InvalidDescriptor {
                        descriptor: desc.clone(),
                    }
                })?;
                ldc(pool.class(&name)?)
            }
        },
    })
}

fn invoke(kind: InvokeKind, owner: &str, name: &str, desc: &str, pool: &mut ConstantPool) -> Result<Instruction> {
    let invalid = || AssembleError::InvalidDescriptor {
        descriptor: desc.to_string(),
    };
    Ok(match kind {
        InvokeKind::Interface => {
            let params = descriptor::parameter_descriptors(desc).ok_or_else(invalid)?;
            let slots: u16 = 1 + params.iter().map(|p| descriptor::slot_width(p)).sum::<u16>();
            Instruction::InvokeInterface {
                index: pool.interface_method_ref(owner, name, desc)?,
                count: u8::try_from(slots).map_err(|_| invalid())?,
            }
        }
        InvokeKind::Virtual => Instruction::OpU16(0xb6, pool.method_ref(owner, name, desc)?),
        InvokeKind::Special => Instruction::OpU16(0xb7, pool.method_ref(owner, name, desc)?),
        InvokeKind::Static => Instruction::OpU16(0xb8, pool.method_ref(owner, name, desc)?),
    })
}

pub(crate) fn lower(insn: &Insn, pool: &mut ConstantPool) -> Result<Lowered> {
    let op = |opcode: u8| Ok(Lowered::Fixed(Instruction::Op(opcode)));
    match insn {
        Insn::Const(value) => Ok(Lowered::Fixed(constant(value, pool)?)),
        Insn::Load { kind, slot } => Ok(Lowered::Fixed(local(0x1a, 0x15, *kind, *slot))),
        Insn::Store { kind, slot } => Ok(Lowered::Fixed(local(0x3b, 0x36, *kind, *slot))),
        Insn::Iinc { slot, amount } => Ok(Lowered::Fixed(match (u8::try_from(*slot), i8::try_from(*amount)) {
            (Ok(index), Ok(value)) => Instruction::Iinc { index, value },
            _ => Instruction::WideIinc {
                index: *slot,
                value: *amount,
            },
        })),
        Insn::Field {
            op: field_op,
            owner,
            name,
            descriptor,
        } => {
            let opcode = match field_op {
                FieldOp::GetStatic => 0xb2,
                FieldOp::PutStatic => 0xb3,
                FieldOp::GetField => 0xb4,
                FieldOp::PutField => 0xb5,
            };
            Ok(Lowered::Fixed(Instruction::OpU16(opcode, pool.field_ref(owner, name, descriptor)?)))
        }
        Insn::Invoke {
            kind,
            owner,
            name,
            descriptor,
        } => Ok(Lowered::Fixed(invoke(*kind, owner, name, descriptor, pool)?)),
        Insn::Type { op: type_op, class_name } => {
            let opcode = match type_op {
                TypeOp::New => 0xbb,
                TypeOp::CheckCast => 0xc0,
                TypeOp::InstanceOf => 0xc1,
            };
            Ok(Lowered::Fixed(Instruction::OpU16(opcode, pool.class(class_name)?)))
        }
        Insn::Stack(stack_op) => op(match stack_op {
            StackOp::Pop => 0x57,
            StackOp::Pop2 => 0x58,
            StackOp::Dup => 0x59,
            StackOp::Dup2 => 0x5c,
        }),
        Insn::ArrayLength => op(0xbe),
        Insn::ArrayStore(kind) => op(match kind {
            ArrayKind::Int => 0x4f,
            ArrayKind::Long => 0x50,
            ArrayKind::Float => 0x51,
            ArrayKind::Double => 0x52,
            ArrayKind::Reference => 0x53,
            ArrayKind::Byte => 0x54,
            ArrayKind::Char => 0x55,
            ArrayKind::Short => 0x56,
        }),
        Insn::Arith { op: arith, kind } => {
            let base = match arith {
                ArithmeticOp::Add => 0x60,
                ArithmeticOp::Sub => 0x64,
                ArithmeticOp::Mul => 0x68,
                ArithmeticOp::Div => 0x6c,
                ArithmeticOp::Rem => 0x70,
            };
            op(base + numeric("arithmetic", *kind)?)
        }
        Insn::Neg(kind) => op(0x74 + numeric("neg", *kind)?),
        Insn::Shift { op: shift, kind } => {
            let base = match shift {
                ShiftOp::Shl => 0x78,
                ShiftOp::Shr => 0x7a,
                ShiftOp::Ushr => 0x7c,
            };
            op(base + integral("shift", *kind)?)
        }
        Insn::Bitwise { op: bitwise, kind } => {
            let base = match bitwise {
                BitwiseOp::And => 0x7e,
                BitwiseOp::Or => 0x80,
                BitwiseOp::Xor => 0x82,
            };
            op(base + integral("bitwise", *kind)?)
        }
        Insn::Convert(conversion) => op(match conversion {
            Conversion::I2L => 0x85,
            Conversion::I2F => 0x86,
            Conversion::I2D => 0x87,
            Conversion::L2I => 0x88,
            Conversion::L2F => 0x89,
            Conversion::L2D => 0x8a,
            Conversion::F2I => 0x8b,
            Conversion::F2L => 0x8c,
            Conversion::F2D => 0x8d,
            Conversion::D2I => 0x8e,
            Conversion::D2L => 0x8f,
            Conversion::D2F => 0x90,
            Conversion::I2B => 0x91,
            Conversion::I2C => 0x92,
            Conversion::I2S => 0x93,
        }),
        Insn::Compare(compare) => op(match compare {
            CompareInsn::Lcmp => 0x94,
            CompareInsn::Fcmpl => 0x95,
            CompareInsn::Fcmpg => 0x96,
            CompareInsn::Dcmpl => 0x97,
            CompareInsn::Dcmpg => 0x98,
        }),
        Insn::Jump { cond, target } => {
            let opcode = match cond {
                JumpCond::Zero(cmp) => 0x99 + compare_offset(*cmp),
                JumpCond::IntCompare(cmp) => 0x9f + compare_offset(*cmp),
                JumpCond::RefEq => 0xa5,
                JumpCond::RefNe => 0xa6,
                JumpCond::Always => 0xa7,
                JumpCond::Null => 0xc6,
                JumpCond::NonNull => 0xc7,
            };
            Ok(Lowered::Branch { opcode, target: *target })
        }
        Insn::Mark(label) => Ok(Lowered::Mark(*label)),
        Insn::TableSwitch {
            low,
            high,
            default,
            targets,
        } => {
            let expected = i64::from(*high) - i64::from(*low) + 1;
            if expected != targets.len() as i64 {
                return Err(AssembleError::MalformedSwitch {
                    low: *low,
                    high: *high,
                    targets: targets.len(),
                });
            }
            Ok(Lowered::Table {
                low: *low,
                high: *high,
                default: *default,
                targets: targets.clone(),
            })
        }
        Insn::LookupSwitch { default, pairs } => {
            let mut pairs = pairs.clone();
            pairs.sort_by_key(|(key, _)| *key);
            Ok(Lowered::Lookup {
                default: *default,
                pairs,
            })
        }
        Insn::Return(None) => op(0xb1),
        Insn::Return(Some(kind)) => op(0xac + kind_offset(*kind)),
        Insn::Throw => op(0xbf),
    }
}
