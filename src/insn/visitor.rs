//! Callback protocol for walking an instruction stream.
//!
//! A producer calls one method per instruction category, in program order;
//! handler declarations come first, as they do in a class file reader.

use std::convert::Infallible;

use super::types::*;
use crate::descriptor::ValueKind;
use crate::dom::{ArithmeticOp, BitwiseOp, InvokeKind, ShiftOp};

pub trait InsnVisitor {
    type Error;

    fn visit_try_catch(&mut self, block: &TryCatchBlock) -> Result<(), Self::Error>;
    fn visit_const(&mut self, value: &Constant) -> Result<(), Self::Error>;
    fn visit_load(&mut self, kind: ValueKind, slot: u16) -> Result<(), Self::Error>;
    fn visit_store(&mut self, kind: ValueKind, slot: u16) -> Result<(), Self::Error>;
    fn visit_iinc(&mut self, slot: u16, amount: i16) -> Result<(), Self::Error>;
    fn visit_field(&mut self, op: FieldOp, owner: &str, name: &str, descriptor: &str) -> Result<(), Self::Error>;
    fn visit_invoke(&mut self, kind: InvokeKind, owner: &str, name: &str, descriptor: &str)
        -> Result<(), Self::Error>;
    fn visit_type(&mut self, op: TypeOp, class_name: &str) -> Result<(), Self::Error>;
    fn visit_stack(&mut self, op: StackOp) -> Result<(), Self::Error>;
    fn visit_array_length(&mut self) -> Result<(), Self::Error>;
    fn visit_array_store(&mut self, kind: ArrayKind) -> Result<(), Self::Error>;
    fn visit_arith(&mut self, op: ArithmeticOp, kind: ValueKind) -> Result<(), Self::Error>;
    fn visit_neg(&mut self, kind: ValueKind) -> Result<(), Self::Error>;
    fn visit_shift(&mut self, op: ShiftOp, kind: ValueKind) -> Result<(), Self::Error>;
    fn visit_bitwise(&mut self, op: BitwiseOp, kind: ValueKind) -> Result<(), Self::Error>;
    fn visit_convert(&mut self, conversion: Conversion) -> Result<(), Self::Error>;
    fn visit_compare(&mut self, compare: CompareInsn) -> Result<(), Self::Error>;
    fn visit_jump(&mut self, cond: JumpCond, target: Label) -> Result<(), Self::Error>;
    fn visit_label(&mut self, label: Label) -> Result<(), Self::Error>;
    fn visit_table_switch(&mut self, low: i32, high: i32, default: Label, targets: &[Label])
        -> Result<(), Self::Error>;
    fn visit_lookup_switch(&mut self, default: Label, pairs: &[(i32, Label)]) -> Result<(), Self::Error>;
    fn visit_return(&mut self, kind: Option<ValueKind>) -> Result<(), Self::Error>;
    fn visit_throw(&mut self) -> Result<(), Self::Error>;
}

impl Insn {
    /// Dispatches this instruction to the matching visitor callback.
    pub fn accept<V: InsnVisitor + ?Sized>(&self, visitor: &mut V) -> Result<(), V::Error> {
        match self {
            Insn::Const(value) => visitor.visit_const(value),
            Insn::Load { kind, slot } => visitor.visit_load(*kind, *slot),
            Insn::Store { kind, slot } => visitor.visit_store(*kind, *slot),
            Insn::Iinc { slot, amount } => visitor.visit_iinc(*slot, *amount),
            Insn::Field { op, owner, name, descriptor } => visitor.visit_field(*op, owner, name, descriptor),
            Insn::Invoke { kind, owner, name, descriptor } => visitor.visit_invoke(*kind, owner, name, descriptor),
            Insn::Type { op, class_name } => visitor.visit_type(*op, class_name),
            Insn::Stack(op) => visitor.visit_stack(*op),
            Insn::ArrayLength => visitor.visit_array_length(),
            Insn::ArrayStore(kind) => visitor.visit_array_store(*kind),
            Insn::Arith { op, kind } => visitor.visit_arith(*op, *kind),
            Insn::Neg(kind) => visitor.visit_neg(*kind),
            Insn::Shift { op, kind } => visitor.visit_shift(*op, *kind),
            Insn::Bitwise { op, kind } => visitor.visit_bitwise(*op, *kind),
            Insn::Convert(conversion) => visitor.visit_convert(*conversion),
            Insn::Compare(compare) => visitor.visit_compare(*compare),
            Insn::Jump { cond, target } => visitor.visit_jump(*cond, *target),
            Insn::Mark(label) => visitor.visit_label(*label),
            Insn::TableSwitch { low, high, default, targets } => {
                visitor.visit_table_switch(*low, *high, *default, targets)
            }
            Insn::LookupSwitch { default, pairs } => visitor.visit_lookup_switch(*default, pairs),
            Insn::Return(kind) => visitor.visit_return(*kind),
            Insn::Throw => visitor.visit_throw(),
        }
    }
}

impl InsnList {
    pub fn accept<V: InsnVisitor + ?Sized>(&self, visitor: &mut V) -> Result<(), V::Error> {
        for insn in self {
            insn.accept(visitor)?;
        }
        Ok(())
    }
}

impl MethodBody {
    /// Replays handlers, then instructions.
    pub fn accept<V: InsnVisitor + ?Sized>(&self, visitor: &mut V) -> Result<(), V::Error> {
        for block in &self.try_catch_blocks {
            visitor.visit_try_catch(block)?;
        }
        self.insns.accept(visitor)
    }
}

/// Records a callback stream back into a body.
impl InsnVisitor for MethodBody {
    type Error = Infallible;

    fn visit_try_catch(&mut self, block: &TryCatchBlock) -> Result<(), Infallible> {
        for label in [block.start, block.end, block.handler] {
            self.reserve_label(label);
        }
        self.try_catch_blocks.push(block.clone());
        Ok(())
    }

    fn visit_const(&mut self, value: &Constant) -> Result<(), Infallible> {
        self.insns.push(Insn::Const(value.clone()));
        Ok(())
    }

    fn visit_load(&mut self, kind: ValueKind, slot: u16) -> Result<(), Infallible> {
        self.insns.push(Insn::Load { kind, slot });
        Ok(())
    }

    fn visit_store(&mut self, kind: ValueKind, slot: u16) -> Result<(), Infallible> {
        self.insns.push(Insn::Store { kind, slot });
        Ok(())
    }

    fn visit_iinc(&mut self, slot: u16, amount: i16) -> Result<(), Infallible> {
        self.insns.push(Insn::Iinc { slot, amount });
        Ok(())
    }

    fn visit_field(&mut self, op: FieldOp, owner: &str, name: &str, descriptor: &str) -> Result<(), Infallible> {
        self.insns.push(Insn::Field {
            op,
            owner: owner.into(),
            name: name.into(),
            descriptor: descriptor.into(),
        });
        Ok(())
    }

    fn visit_invoke(&mut self, kind: InvokeKind, owner: &str, name: &str, descriptor: &str) -> Result<(), Infallible> {
        self.insns.push(Insn::Invoke {
            kind,
            owner: owner.into(),
            name: name.into(),
            descriptor: descriptor.into(),
        });
        Ok(())
    }

    fn visit_type(&mut self, op: TypeOp, class_name: &str) -> Result<(), Infallible> {
        self.insns.push(Insn::Type {
            op,
            class_name: class_name.into(),
        });
        Ok(())
    }

    fn visit_stack(&mut self, op: StackOp) -> Result<(), Infallible> {
        self.insns.push(Insn::Stack(op));
        Ok(())
    }

    fn visit_array_length(&mut self) -> Result<(), Infallible> {
        self.insns.push(Insn::ArrayLength);
        Ok(())
    }

    fn visit_array_store(&mut self, kind: ArrayKind) -> Result<(), Infallible> {
        self.insns.push(Insn::ArrayStore(kind));
        Ok(())
    }

    fn visit_arith(&mut self, op: ArithmeticOp, kind: ValueKind) -> Result<(), Infallible> {
        self.insns.push(Insn::Arith { op, kind });
        Ok(())
    }

    fn visit_neg(&mut self, kind: ValueKind) -> Result<(), Infallible> {
        self.insns.push(Insn::Neg(kind));
        Ok(())
    }

    fn visit_shift(&mut self, op: ShiftOp, kind: ValueKind) -> Result<(), Infallible> {
        self.insns.push(Insn::Shift { op, kind });
        Ok(())
    }

    fn visit_bitwise(&mut self, op: BitwiseOp, kind: ValueKind) -> Result<(), Infallible> {
        self.insns.push(Insn::Bitwise { op, kind });
        Ok(())
    }

    fn visit_convert(&mut self, conversion: Conversion) -> Result<(), Infallible> {
        self.insns.push(Insn::Convert(conversion));
        Ok(())
    }

    fn visit_compare(&mut self, compare: CompareInsn) -> Result<(), Infallible> {
        self.insns.push(Insn::Compare(compare));
        Ok(())
    }

    fn visit_jump(&mut self, cond: JumpCond, target: Label) -> Result<(), Infallible> {
        self.reserve_label(target);
        self.insns.push(Insn::Jump { cond, target });
        Ok(())
    }

    fn visit_label(&mut self, label: Label) -> Result<(), Infallible> {
        self.reserve_label(label);
        self.insns.push(Insn::Mark(label));
        Ok(())
    }

    fn visit_table_switch(&mut self, low: i32, high: i32, default: Label, targets: &[Label]) -> Result<(), Infallible> {
        for &label in targets.iter().chain([&default]) {
            self.reserve_label(label);
        }
        self.insns.push(Insn::TableSwitch {
            low,
            high,
            default,
            targets: targets.to_vec(),
        });
        Ok(())
    }

    fn visit_lookup_switch(&mut self, default: Label, pairs: &[(i32, Label)]) -> Result<(), Infallible> {
        self.reserve_label(default);
        for &(_, label) in pairs {
            self.reserve_label(label);
        }
        self.insns.push(Insn::LookupSwitch {
            default,
            pairs: pairs.to_vec(),
        });
        Ok(())
    }

    fn visit_return(&mut self, kind: Option<ValueKind>) -> Result<(), Infallible> {
        self.insns.push(Insn::Return(kind));
        Ok(())
    }

    fn visit_throw(&mut self) -> Result<(), Infallible> {
        self.insns.push(Insn::Throw);
        Ok(())
    }
}
