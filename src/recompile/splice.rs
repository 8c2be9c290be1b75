//! Replaying the method's original body in place of a splice node.
//!
//! The replayed code keeps its parameters, but its other locals move above
//! every slot the new code uses, its labels are renumbered, and its returns
//! become jumps to the end of the splice.

use std::collections::HashMap;
use std::convert::Infallible;

use tracing::debug;

use crate::descriptor::{ValueKind, VOID};
use crate::dom::{ArithmeticOp, BitwiseOp, InvokeKind, ShiftOp};
use crate::insn::{
    self, ArrayKind, CompareInsn, Constant, Conversion, FieldOp, Insn, InsnVisitor, JumpCond, MethodBody, StackOp,
    TryCatchBlock, TypeOp,
};

use super::{RecompileError, Recompiler};

struct Relocator<'b> {
    out: &'b mut MethodBody,
    labels: HashMap<insn::Label, insn::Label>,
    params_end: u16,
    shift: u16,
    end: insn::Label,
    /// Where a value splice parks the returned value.
    result: Option<(u16, ValueKind)>,
    /// One past the highest slot the replayed code touches.
    high: u16,
}

impl Relocator<'_> {
    fn label(&mut self, label: insn::Label) -> insn::Label {
        *self.labels.entry(label).or_insert_with(|| self.out.new_label())
    }

    fn slot(&mut self, slot: u16, wide: bool) -> u16 {
        let moved = if slot < self.params_end {
            slot
        } else {
            slot.saturating_add(self.shift)
        };
        self.high = self.high.max(moved.saturating_add(if wide { 2 } else { 1 }));
        moved
    }

    fn push(&mut self, insn: Insn) -> Result<(), Infallible> {
        self.out.insns.push(insn);
        Ok(())
    }
}

impl InsnVisitor for Relocator<'_> {
    type Error = Infallible;

    fn visit_try_catch(&mut self, block: &TryCatchBlock) -> Result<(), Infallible> {
        let block = TryCatchBlock {
            start: self.label(block.start),
            end: self.label(block.end),
            handler: self.label(block.handler),
            exception_type: block.exception_type.clone(),
        };
        self.out.try_catch_blocks.push(block);
        Ok(())
    }

    fn visit_const(&mut self, value: &Constant) -> Result<(), Infallible> {
        self.push(Insn::Const(value.clone()))
    }

    fn visit_load(&mut self, kind: ValueKind, slot: u16) -> Result<(), Infallible> {
        let slot = self.slot(slot, kind.is_wide());
        self.push(Insn::Load { kind, slot })
    }

    fn visit_store(&mut self, kind: ValueKind, slot: u16) -> Result<(), Infallible> {
        let slot = self.slot(slot, kind.is_wide());
        self.push(Insn::Store { kind, slot })
    }

    fn visit_iinc(&mut self, slot: u16, amount: i16) -> Result<(), Infallible> {
        let slot = self.slot(slot, false);
        self.push(Insn::Iinc { slot, amount })
    }

    fn visit_field(&mut self, op: FieldOp, owner: &str, name: &str, descriptor: &str) -> Result<(), Infallible> {
        self.push(Insn::Field {
            op,
            owner: owner.into(),
            name: name.into(),
            descriptor: descriptor.into(),
        })
    }

    fn visit_invoke(&mut self, kind: InvokeKind, owner: &str, name: &str, descriptor: &str) -> Result<(), Infallible> {
        self.push(Insn::Invoke {
            kind,
            owner: owner.into(),
            name: name.into(),
            descriptor: descriptor.into(),
        })
    }

    fn visit_type(&mut self, op: TypeOp, class_name: &str) -> Result<(), Infallible> {
        self.push(Insn::Type {
            op,
            class_name: class_name.into(),
        })
    }

    fn visit_stack(&mut self, op: StackOp) -> Result<(), Infallible> {
        self.push(Insn::Stack(op))
    }

    fn visit_array_length(&mut self) -> Result<(), Infallible> {
        self.push(Insn::ArrayLength)
    }

    fn visit_array_store(&mut self, kind: ArrayKind) -> Result<(), Infallible> {
        self.push(Insn::ArrayStore(kind))
    }

    fn visit_arith(&mut self, op: ArithmeticOp, kind: ValueKind) -> Result<(), Infallible> {
        self.push(Insn::Arith { op, kind })
    }

    fn visit_neg(&mut self, kind: ValueKind) -> Result<(), Infallible> {
        self.push(Insn::Neg(kind))
    }

    fn visit_shift(&mut self, op: ShiftOp, kind: ValueKind) -> Result<(), Infallible> {
        self.push(Insn::Shift { op, kind })
    }

    fn visit_bitwise(&mut self, op: BitwiseOp, kind: ValueKind) -> Result<(), Infallible> {
        self.push(Insn::Bitwise { op, kind })
    }

    fn visit_convert(&mut self, conversion: Conversion) -> Result<(), Infallible> {
        self.push(Insn::Convert(conversion))
    }

    fn visit_compare(&mut self, compare: CompareInsn) -> Result<(), Infallible> {
        self.push(Insn::Compare(compare))
    }

    fn visit_jump(&mut self, cond: JumpCond, target: insn::Label) -> Result<(), Infallible> {
        let target = self.label(target);
        self.push(Insn::Jump { cond, target })
    }

    fn visit_label(&mut self, label: insn::Label) -> Result<(), Infallible> {
        let label = self.label(label);
        self.push(Insn::Mark(label))
    }

    fn visit_table_switch(
        &mut self,
        low: i32,
        high: i32,
        default: insn::Label,
        targets: &[insn::Label],
    ) -> Result<(), Infallible> {
        let default = self.label(default);
        let targets = targets.iter().map(|t| self.label(*t)).collect();
        self.push(Insn::TableSwitch {
            low,
            high,
            default,
            targets,
        })
    }

    fn visit_lookup_switch(&mut self, default: insn::Label, pairs: &[(i32, insn::Label)]) -> Result<(), Infallible> {
        let default = self.label(default);
        let pairs = pairs.iter().map(|(k, t)| (*k, self.label(*t))).collect();
        self.push(Insn::LookupSwitch { default, pairs })
    }

    fn visit_return(&mut self, kind: Option<ValueKind>) -> Result<(), Infallible> {
        match (kind, self.result) {
            (Some(_), Some((slot, kind))) => self.push(Insn::Store { kind, slot })?,
            (Some(kind), None) => {
                let op = if kind.is_wide() { StackOp::Pop2 } else { StackOp::Pop };
                self.push(Insn::Stack(op))?
            }
            (None, _) => {}
        }
        let end = self.end;
        self.push(Insn::Jump {
            cond: JumpCond::Always,
            target: end,
        })
    }

    fn visit_throw(&mut self) -> Result<(), Infallible> {
        self.push(Insn::Throw)
    }
}

impl Recompiler<'_> {
    /// The original body as a statement: its result, if any, is dropped.
    pub(super) fn emit_splice_stmt(&mut self) -> Result<(), RecompileError> {
        let end = self.new_label();
        self.replay(end, None)?;
        self.push(Insn::Mark(end));
        Ok(())
    }

    /// The original body as an expression producing what it returned.
    pub(super) fn emit_splice_value(&mut self) -> Result<String, RecompileError> {
        if self.return_desc == VOID {
            return Err(RecompileError::SpliceInVoidMethod);
        }
        let desc = self.return_desc.clone();
        let kind = ValueKind::of(&desc).ok_or(RecompileError::InvalidDescriptor {
            descriptor: desc.clone(),
        })?;
        let slot = self.scope.reserve(&desc)?;
        let end = self.new_label();
        self.replay(end, Some((slot, kind)))?;
        self.push(Insn::Mark(end));
        self.push(Insn::Load { kind, slot });
        Ok(desc)
    }

    fn replay(&mut self, end: insn::Label, result: Option<(u16, ValueKind)>) -> Result<(), RecompileError> {
        let original = self.original.ok_or(RecompileError::NoOriginalBody)?;
        let shift = self.scope.next_slot().saturating_sub(self.params_end);
        debug!(
            "splicing {} original instructions, locals shifted by {}",
            original.insns.len(),
            shift
        );
        let mut relocator = Relocator {
            out: &mut self.out,
            labels: HashMap::new(),
            params_end: self.params_end,
            shift,
            end,
            result,
            high: 0,
        };
        original.accept(&mut relocator).unwrap_or_else(|never| match never {});
        let high = relocator.high;
        self.scope.ensure(high.max(original.max_locals.saturating_add(shift)));
        Ok(())
    }
}
