use std::collections::HashMap;

use crate::descriptor::{self, ValueKind};
use crate::insn::{Constant, FieldOp, Insn, JumpCond, Label, MethodBody, StackOp, TypeOp};

use super::AssembleError;

/// Computes max_stack by following control flow from the entry point and
/// every handler, checking that paths meeting at an instruction agree on depth.
pub fn compute_max_stack(body: &MethodBody) -> Result<u16, AssembleError> {
    let insns = body.insns.as_slice();
    let mut marks = HashMap::new();
    for (i, insn) in insns.iter().enumerate() {
        if let Insn::Mark(label) = insn {
            marks.insert(*label, i);
        }
    }
    let index_of = |label: Label| marks.get(&label).copied().ok_or(AssembleError::UndefinedLabel { label });

    let mut depth_at: Vec<Option<i32>> = vec![None; insns.len() + 1];
    let mut pending = vec![(0usize, 0i32)];
    for block in &body.try_catch_blocks {
        pending.push((index_of(block.handler)?, 1));
    }
    let mut max_depth = 0;

    while let Some((index, depth)) = pending.pop() {
        match depth_at[index] {
            Some(seen) if seen == depth => continue,
            Some(seen) => {
                return Err(AssembleError::InconsistentStack {
                    index,
                    expected: seen,
                    found: depth,
                })
            }
            None => depth_at[index] = Some(depth),
        }
        let Some(insn) = insns.get(index) else {
            continue;
        };
        max_depth = max_depth.max(depth);
        let after = depth + stack_delta(insn)?;
        if after < 0 {
            return Err(AssembleError::StackUnderflow { index });
        }
        max_depth = max_depth.max(after);
        for target in insn.targets() {
            pending.push((index_of(target)?, after));
        }
        if !insn.is_terminal() {
            pending.push((index + 1, after));
        }
    }

    Ok(max_depth as u16)
}

fn width(kind: ValueKind) -> i32 {
    if kind.is_wide() {
        2
    } else {
        1
    }
}

fn descriptor_width(desc: &str) -> Result<i32, AssembleError> {
    descriptor::parse_field_descriptor(desc).ok_or_else(|| AssembleError::InvalidDescriptor {
        descriptor: desc.to_string(),
    })?;
    Ok(i32::from(descriptor::slot_width(desc)))
}

/// Returns the net stack depth change for an instruction.
fn stack_delta(insn: &Insn) -> Result<i32, AssembleError> {
    Ok(match insn {
        Insn::Const(Constant::Long(_) | Constant::Double(_)) => 2,
        Insn::Const(_) => 1,
        Insn::Load { kind, .. } => width(*kind),
        Insn::Store { kind, .. } => -width(*kind),
        Insn::Iinc { .. } | Insn::Mark(_) | Insn::ArrayLength | Insn::Neg(_) => 0,
        Insn::Field { op, descriptor, .. } => {
            let w = descriptor_width(descriptor)?;
            match op {
                FieldOp::GetStatic => w,
                FieldOp::PutStatic => -w,
                FieldOp::GetField => w - 1,
                FieldOp::PutField => -w - 1,
            }
        }
        Insn::Invoke { kind, descriptor, .. } => {
            let invalid = || AssembleError::InvalidDescriptor {
                descriptor: descriptor.clone(),
            };
            let params = descriptor::parameter_descriptors(descriptor).ok_or_else(invalid)?;
            let ret = descriptor::return_descriptor(descriptor).ok_or_else(invalid)?;
            let args: i32 = params.iter().map(|p| i32::from(descriptor::slot_width(p))).sum();
            let receiver = i32::from(kind.has_target());
            i32::from(descriptor::slot_width(&ret)) - args - receiver
        }
        Insn::Type { op: TypeOp::New, .. } => 1,
        Insn::Type { .. } => 0,
        Insn::Stack(op) => match op {
            StackOp::Pop => -1,
            StackOp::Pop2 => -2,
            StackOp::Dup => 1,
            StackOp::Dup2 => 2,
        },
        Insn::ArrayStore(kind) => -2 - width(kind.value_kind()),
        Insn::Arith { kind, .. } | Insn::Bitwise { kind, .. } => -width(*kind),
        // The shift distance is always an int.
        Insn::Shift { .. } => -1,
        Insn::Convert(conversion) => {
            i32::from(descriptor::slot_width(conversion.result())) - width(conversion.source())
        }
        Insn::Compare(compare) => 1 - 2 * width(compare.operand_kind()),
        Insn::Jump { cond, .. } => match cond {
            JumpCond::Always => 0,
            _ => -(cond.operands() as i32),
        },
        Insn::TableSwitch { .. } | Insn::LookupSwitch { .. } | Insn::Throw => -1,
        Insn::Return(kind) => -kind.map_or(0, width),
    })
}
