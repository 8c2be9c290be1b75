//! Symbolic body → `Code` attribute.
//!
//! Assembly runs in three steps: opcode selection (which may add constant
//! pool entries), layout (byte address of every instruction and label), and
//! encoding with resolved offsets.

mod constant_pool;
mod lower;
mod stack_calc;
mod types;

use std::collections::HashMap;
use std::io::{Cursor, Seek};

use binrw::{BinRead, BinWrite};
use thiserror::Error;
use tracing::{debug, trace};

use crate::descriptor::ValueKind;
use crate::insn::{Label, MethodBody};

use self::lower::Lowered;

pub use self::constant_pool::{modified_utf8, ConstantPool, PoolEntry};
pub use self::stack_calc::compute_max_stack;
pub use self::types::{AttributeInfo, CodeAttribute, ExceptionEntry, Instruction};

/// Largest code array a method may have.
pub const MAX_CODE_LENGTH: u32 = 65535;

#[derive(Debug, Error)]
pub enum AssembleError {
    #[error("constant pool is full")]
    PoolOverflow,
    #[error("string constant of {length} bytes is too long")]
    Utf8TooLong { length: usize },
    #[error("label {label} is never marked")]
    UndefinedLabel { label: Label },
    #[error("label {label} is marked twice")]
    LabelMarkedTwice { label: Label },
    #[error("branch from {from} to {to} does not fit in 16 bits")]
    BranchOutOfRange { from: u32, to: u32 },
    #[error("method code is {length} bytes, over the limit")]
    CodeTooLarge { length: u32 },
    #[error("method has no code")]
    EmptyCode,
    #[error("{op} has no form for {kind:?} operands")]
    InvalidKind { op: &'static str, kind: ValueKind },
    #[error("tableswitch {low}..={high} has {targets} targets")]
    MalformedSwitch { low: i32, high: i32, targets: usize },
    #[error("invalid descriptor: {descriptor}")]
    InvalidDescriptor { descriptor: String },
    #[error("stack underflow at instruction {index}")]
    StackUnderflow { index: usize },
    #[error("stack depth {found} at instruction {index} disagrees with {expected} on another path")]
    InconsistentStack { index: usize, expected: i32, found: i32 },
    #[error(transparent)]
    Binrw(#[from] binrw::Error),
}

type Result<T> = std::result::Result<T, AssembleError>;

/// Byte addresses of every lowered instruction and every label.
struct Layout {
    addresses: Vec<u32>,
    labels: HashMap<Label, u32>,
    code_length: u32,
}

impl Layout {
    fn compute(lowered: &[Lowered]) -> Result<Layout> {
        let mut addresses = Vec::with_capacity(lowered.len());
        let mut labels = HashMap::new();
        let mut address = 0u32;
        for item in lowered {
            addresses.push(address);
            if let Lowered::Mark(label) = item {
                if labels.insert(*label, address).is_some() {
                    return Err(AssembleError::LabelMarkedTwice { label: *label });
                }
            }
            address += item.byte_size(address);
        }
        if address == 0 {
            return Err(AssembleError::EmptyCode);
        }
        if address > MAX_CODE_LENGTH {
            return Err(AssembleError::CodeTooLarge { length: address });
        }
        Ok(Layout {
            addresses,
            labels,
            code_length: address,
        })
    }

    fn address_of(&self, label: Label) -> Result<u32> {
        self.labels
            .get(&label)
            .copied()
            .ok_or(AssembleError::UndefinedLabel { label })
    }

    /// Offset from `from` to `label`, as branch operands encode it.
    fn offset(&self, from: u32, label: Label) -> Result<i32> {
        Ok(self.address_of(label)? as i32 - from as i32)
    }
}

/// Replaces labels with offsets relative to `address`.
fn resolve(item: &Lowered, address: u32, layout: &Layout) -> Result<Option<Instruction>> {
    Ok(Some(match item {
        Lowered::Mark(_) => return Ok(None),
        Lowered::Fixed(instruction) => instruction.clone(),
        Lowered::Branch { opcode, target } => {
            let offset = i16::try_from(layout.offset(address, *target)?).map_err(|_| {
                AssembleError::BranchOutOfRange {
                    from: address,
                    to: layout.labels.get(target).copied().unwrap_or_default(),
                }
            })?;
            Instruction::OpI16(*opcode, offset)
        }
        Lowered::Table {
            low,
            high,
            default,
            targets,
        } => Instruction::Tableswitch {
            default: layout.offset(address, *default)?,
            low: *low,
            high: *high,
            offsets: targets
                .iter()
                .map(|t| layout.offset(address, *t))
                .collect::<Result<_>>()?,
        },
        Lowered::Lookup { default, pairs } => Instruction::Lookupswitch {
            default: layout.offset(address, *default)?,
            npairs: pairs.len() as u32,
            pairs: pairs
                .iter()
                .map(|(key, t)| Ok((*key, layout.offset(address, *t)?)))
                .collect::<Result<_>>()?,
        },
    }))
}

fn exception_table(body: &MethodBody, layout: &Layout, pool: &mut ConstantPool) -> Result<Vec<ExceptionEntry>> {
    let mut entries = Vec::new();
    for block in &body.try_catch_blocks {
        let start_pc = layout.address_of(block.start)?;
        let end_pc = layout.address_of(block.end)?;
        let handler_pc = layout.address_of(block.handler)?;
        if start_pc >= end_pc {
            trace!("dropping empty handler range {}..{}", block.start, block.end);
            continue;
        }
        let catch_type = match &block.exception_type {
            Some(class_name) => pool.class(class_name)?,
            None => 0,
        };
        // Addresses fit: the code length was checked against the limit.
        entries.push(ExceptionEntry {
            start_pc: start_pc as u16,
            end_pc: end_pc as u16,
            handler_pc: handler_pc as u16,
            catch_type,
        });
    }
    Ok(entries)
}

/// Encodes `body`, adding the constants it references to `pool`.
pub fn assemble(body: &MethodBody, pool: &mut ConstantPool) -> Result<CodeAttribute> {
    let lowered = body
        .insns
        .iter()
        .map(|insn| lower::lower(insn, pool))
        .collect::<Result<Vec<_>>>()?;
    let layout = Layout::compute(&lowered)?;

    let mut code = Cursor::new(Vec::with_capacity(layout.code_length as usize));
    for (item, &address) in lowered.iter().zip(&layout.addresses) {
        if let Some(instruction) = resolve(item, address, &layout)? {
            debug_assert_eq!(code.stream_position().ok(), Some(u64::from(address)));
            instruction.write_args(&mut code, binrw::args! { address })?;
        }
    }
    let code = code.into_inner();

    let exception_table = exception_table(body, &layout, pool)?;
    let max_stack = compute_max_stack(body)?;
    debug!(
        "assembled {} bytes, max_stack {}, max_locals {}, {} handlers",
        code.len(),
        max_stack,
        body.max_locals,
        exception_table.len()
    );
    Ok(CodeAttribute {
        max_stack,
        max_locals: body.max_locals,
        code_length: layout.code_length,
        code,
        exception_table_length: exception_table.len() as u16,
        exception_table,
        attributes_count: 0,
        attributes: Vec::new(),
    })
}

impl CodeAttribute {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Cursor::new(Vec::new());
        self.write(&mut buf)?;
        Ok(buf.into_inner())
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(Self::read(&mut Cursor::new(bytes))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::{CompareOp, InvokeKind};
    use crate::insn::{Constant, Insn, JumpCond, StackOp, TryCatchBlock};
    use pretty_assertions::assert_eq;

    fn assemble_insns(insns: Vec<Insn>) -> Result<CodeAttribute> {
        assemble(&MethodBody::from_parts(insns, vec![], 1), &mut ConstantPool::new())
    }

    #[test]
    fn branches_are_relative_to_the_jump() {
        let code = assemble_insns(vec![
            Insn::Load { kind: ValueKind::Int, slot: 0 },
            Insn::Jump {
                cond: JumpCond::Zero(CompareOp::Eq),
                target: Label(0),
            },
            Insn::Const(Constant::Int(1)),
            Insn::Return(Some(ValueKind::Int)),
            Insn::Mark(Label(0)),
            Insn::Const(Constant::Int(0)),
            Insn::Return(Some(ValueKind::Int)),
        ])
        .unwrap();
        assert_eq!(code.code, vec![0x1a, 0x99, 0x00, 0x05, 0x04, 0xac, 0x03, 0xac]);
        assert_eq!(code.max_stack, 1);
        assert_eq!(code.code_length, 8);
    }

    #[test]
    fn tableswitch_operands_are_aligned() {
        let code = assemble_insns(vec![
            Insn::Load { kind: ValueKind::Int, slot: 0 },
            Insn::TableSwitch {
                low: 0,
                high: 1,
                default: Label(2),
                targets: vec![Label(0), Label(1)],
            },
            Insn::Mark(Label(0)),
            Insn::Const(Constant::Int(1)),
            Insn::Return(Some(ValueKind::Int)),
            Insn::Mark(Label(1)),
            Insn::Const(Constant::Int(2)),
            Insn::Return(Some(ValueKind::Int)),
            Insn::Mark(Label(2)),
            Insn::Const(Constant::Int(0)),
            Insn::Return(Some(ValueKind::Int)),
        ])
        .unwrap();
        #[rustfmt::skip]
        let expected = vec![
            0x1a, 0xaa, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x1b,
            0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x01,
            0x00, 0x00, 0x00, 0x17,
            0x00, 0x00, 0x00, 0x19,
            0x04, 0xac, 0x05, 0xac, 0x03, 0xac,
        ];
        assert_eq!(code.code, expected);
    }

    #[test]
    fn lookupswitch_keys_are_sorted() {
        let code = assemble_insns(vec![
            Insn::Const(Constant::Int(3)),
            Insn::LookupSwitch {
                default: Label(0),
                pairs: vec![(10, Label(0)), (-4, Label(0))],
            },
            Insn::Mark(Label(0)),
            Insn::Return(None),
        ])
        .unwrap();
        #[rustfmt::skip]
        let expected = vec![
            0x06, 0xab, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x1b,
            0x00, 0x00, 0x00, 0x02,
            0xff, 0xff, 0xff, 0xfc, 0x00, 0x00, 0x00, 0x1b,
            0x00, 0x00, 0x00, 0x0a, 0x00, 0x00, 0x00, 0x1b,
            0xb1,
        ];
        assert_eq!(code.code, expected);
    }

    #[test]
    fn empty_handler_ranges_are_dropped() {
        let insns = vec![
            Insn::Mark(Label(0)),
            Insn::Invoke {
                kind: InvokeKind::Static,
                owner: "demo/A".into(),
                name: "run".into(),
                descriptor: "()V".into(),
            },
            Insn::Mark(Label(1)),
            Insn::Return(None),
            Insn::Mark(Label(2)),
            Insn::Store {
                kind: ValueKind::Reference,
                slot: 0,
            },
            Insn::Return(None),
        ];
        let handlers = vec![
            TryCatchBlock {
                start: Label(0),
                end: Label(1),
                handler: Label(2),
                exception_type: Some("java/lang/Exception".into()),
            },
            TryCatchBlock {
                start: Label(1),
                end: Label(1),
                handler: Label(2),
                exception_type: None,
            },
        ];
        let mut pool = ConstantPool::new();
        let code = assemble(&MethodBody::from_parts(insns, handlers, 1), &mut pool).unwrap();
        let exception = pool.class("java/lang/Exception").unwrap();
        assert_eq!(
            code.exception_table,
            vec![ExceptionEntry {
                start_pc: 0,
                end_pc: 3,
                handler_pc: 4,
                catch_type: exception,
            }]
        );
        assert_eq!(code.code, vec![0xb8, 0x00, 0x06, 0xb1, 0x4b, 0xb1]);
        assert_eq!(code.max_stack, 1);
    }

    #[test]
    fn far_branches_are_rejected() {
        let mut insns = vec![Insn::Jump {
            cond: JumpCond::Always,
            target: Label(0),
        }];
        for _ in 0..9000 {
            insns.push(Insn::Const(Constant::Int(1000)));
            insns.push(Insn::Stack(StackOp::Pop));
        }
        insns.push(Insn::Mark(Label(0)));
        insns.push(Insn::Return(None));
        assert!(matches!(
            assemble_insns(insns),
            Err(AssembleError::BranchOutOfRange { from: 0, to: 36003 })
        ));
    }

    #[test]
    fn undefined_and_duplicate_labels_fail() {
        let jump = Insn::Jump {
            cond: JumpCond::Always,
            target: Label(4),
        };
        assert!(matches!(
            assemble_insns(vec![jump]),
            Err(AssembleError::UndefinedLabel { label: Label(4) })
        ));
        let twice = vec![Insn::Mark(Label(0)), Insn::Mark(Label(0)), Insn::Return(None)];
        assert!(matches!(
            assemble_insns(twice),
            Err(AssembleError::LabelMarkedTwice { .. })
        ));
        assert!(matches!(assemble_insns(vec![]), Err(AssembleError::EmptyCode)));
    }

    #[test]
    fn code_attribute_bytes_read_back() {
        let code = assemble_insns(vec![Insn::Const(Constant::Long(1)), Insn::Return(Some(ValueKind::Long))]).unwrap();
        let bytes = code.to_bytes().unwrap();
        assert_eq!(
            bytes,
            vec![0, 2, 0, 1, 0, 0, 0, 2, 0x0a, 0xad, 0, 0, 0, 0]
        );
        assert_eq!(CodeAttribute::from_bytes(&bytes).unwrap(), code);
    }
}
