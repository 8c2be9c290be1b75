//! Bytecode → tree.
//!
//! [`Decompiler`] consumes one method's instruction callbacks, simulates the
//! operand stack and produces a single flat block: straight-line statements,
//! `if (c) goto L` jumps, raw switches and the marks they target.

pub mod frames;
pub mod stack_sim;

use std::collections::{HashMap, HashSet};

use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::descriptor::{self, ValueKind};
use crate::dom::factory::*;
use crate::dom::{self, ArithmeticOp, BitwiseOp, DomError, Expr, IdentityOp, InvokeKind, LabelArena, ShiftOp, Stmt};
use crate::insn::{
    self, ArrayKind, CompareInsn, Constant, Conversion, FieldOp, InsnVisitor, JumpCond, MethodBody, MethodInfo,
    StackOp, TryCatchBlock, TypeOp,
};
use crate::scope::{LabelRegistry, ScopeError, VarScope};

use self::frames::{Exit, Frame, FrameStack};
use self::stack_sim::*;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DecompileError {
    #[error("operand stack underflow at instruction {at}")]
    StackUnderflow { at: usize },
    #[error("operand stacks disagree at {label}: {expected} entries vs {found}")]
    StackMismatch {
        label: String,
        expected: usize,
        found: usize,
    },
    #[error("instruction {at} discards `{value}`, which has no statement form")]
    PopOfValue { at: usize, value: String },
    #[error("unsupported at instruction {at}: {what}")]
    Unsupported { at: usize, what: String },
    #[error("control frame for {label} is still open at the end of the method")]
    UnclosedFrame { label: String },
    #[error("invalid descriptor: {descriptor}")]
    InvalidDescriptor { descriptor: String },
    #[error(transparent)]
    Scope(#[from] ScopeError),
    #[error(transparent)]
    Dom(#[from] DomError),
}

#[derive(Clone, Debug)]
pub struct DecompileOptions {
    /// Fail on bodies with exception handlers instead of dropping them.
    pub reject_exception_handlers: bool,
    /// Turn `iconst_1; ireturn` into `return true;` in boolean methods, and
    /// likewise for byte, short and char.
    pub narrow_return_literals: bool,
}

impl Default for DecompileOptions {
    fn default() -> Self {
        DecompileOptions {
            reject_exception_handlers: true,
            narrow_return_literals: true,
        }
    }
}

/// A decompiled method body and the arena its labels came from.
#[derive(Clone, Debug)]
pub struct Decompiled {
    pub body: Stmt,
    pub labels: LabelArena,
}

pub fn decompile(info: &MethodInfo, body: &MethodBody) -> Result<Decompiled, DecompileError> {
    decompile_with_options(info, body, &DecompileOptions::default())
}

pub fn decompile_with_options(
    info: &MethodInfo,
    body: &MethodBody,
    options: &DecompileOptions,
) -> Result<Decompiled, DecompileError> {
    let mut decompiler = Decompiler::new(info, options.clone())?;
    body.accept(&mut decompiler)?;
    decompiler.finish()
}

/// Decompiles `body` and keeps it together with the signature it belongs to.
pub fn decompile_method(info: &MethodInfo, body: &MethodBody) -> Result<dom::MethodDom, DecompileError> {
    let decompiled = decompile(info, body)?;
    Ok(dom::MethodDom::new(info.clone(), decompiled.body))
}

/// The declared type of a variable that several paths assign. `null` fits any
/// reference; differing reference types meet at `Object`, since no class
/// hierarchy is available.
fn join_type<'e>(entries: impl Iterator<Item = &'e Entry>) -> String {
    let mut types = entries.filter(|e| !matches!(e.expr(), Some(Expr::Null))).map(|e| e.ty.as_str());
    let Some(first) = types.next() else {
        return descriptor::OBJECT.to_string();
    };
    if types.all(|ty| ty == first) || !descriptor::is_reference(first) {
        first.to_string()
    } else {
        descriptor::OBJECT.to_string()
    }
}

/// A popped stack value that is an ordinary expression.
struct Operand {
    expr: Expr,
    ty: String,
    pure: bool,
    reads: Vec<u16>,
}

enum StepBody {
    Stmt(Stmt),
    /// Emitted only if something jumps to the label.
    Mark(insn::Label),
}

struct Step {
    /// Merge assignments that must run before `body`.
    prelude: Vec<Stmt>,
    body: StepBody,
}

impl Step {
    fn stmt(stmt: Stmt) -> Self {
        Step {
            prelude: Vec::new(),
            body: StepBody::Stmt(stmt),
        }
    }
}

/// The stack a forward jump carries to its target.
struct Incoming {
    stack: Vec<Entry>,
    /// The jump step, or `None` for the fall-through path.
    step: Option<usize>,
}

/// One decompilation session over one method.
pub struct Decompiler<'m> {
    info: &'m MethodInfo,
    options: DecompileOptions,
    return_desc: String,
    arena: LabelArena,
    labels: LabelRegistry<insn::Label, dom::Label>,
    scope: VarScope,
    declared: HashSet<String>,
    temps: HashSet<String>,
    decls: Vec<Stmt>,
    steps: Vec<Step>,
    stack: Vec<Entry>,
    incoming: HashMap<insn::Label, Vec<Incoming>>,
    handler_seeds: HashMap<insn::Label, Entry>,
    marked: HashMap<insn::Label, usize>,
    frames: FrameStack,
    reachable: bool,
    next_id: u32,
    next_temp: u32,
    next_shared: u32,
    at: usize,
    seen: usize,
}

impl<'m> Decompiler<'m> {
    pub fn new(info: &'m MethodInfo, options: DecompileOptions) -> Result<Self, DecompileError> {
        let invalid = || DecompileError::InvalidDescriptor {
            descriptor: info.descriptor.clone(),
        };
        let params = info.parameters().ok_or_else(invalid)?;
        let return_desc = info.return_descriptor().ok_or_else(invalid)?;
        let scope = VarScope::for_method(info.is_static(), &params)?;
        Ok(Decompiler {
            info,
            options,
            return_desc,
            arena: LabelArena::new(),
            labels: LabelRegistry::new(),
            scope,
            declared: params.into_iter().map(|(name, _)| name).collect(),
            temps: HashSet::new(),
            decls: Vec::new(),
            steps: Vec::new(),
            stack: Vec::new(),
            incoming: HashMap::new(),
            handler_seeds: HashMap::new(),
            marked: HashMap::new(),
            frames: FrameStack::new(),
            reachable: true,
            next_id: 0,
            next_temp: 0,
            next_shared: 0,
            at: 0,
            seen: 0,
        })
    }

    /// Closes the session and assembles the block.
    pub fn finish(self) -> Result<Decompiled, DecompileError> {
        self.labels.verify()?;
        if let Some(frame) = self.frames.unclosed() {
            let label = match frame {
                Frame::Branch { target, .. } => *target,
                Frame::Switch { default, .. } => *default,
            };
            return Err(DecompileError::UnclosedFrame {
                label: label.to_string(),
            });
        }

        let mut stmts = self.decls;
        for step in self.steps {
            stmts.extend(step.prelude);
            match step.body {
                StepBody::Stmt(stmt) => stmts.push(stmt),
                StepBody::Mark(label) => {
                    if let Some(entry) = self.labels.get(&label).filter(|e| e.referenced) {
                        stmts.push(mark(entry.label));
                    }
                }
            }
        }
        debug!(method = %self.info.name, statements = stmts.len(), "decompiled method body");
        Ok(Decompiled {
            body: block(stmts),
            labels: self.arena,
        })
    }

    fn begin(&mut self) {
        self.at = self.seen;
        self.seen += 1;
    }

    fn unsupported(&self, what: impl Into<String>) -> DecompileError {
        DecompileError::Unsupported {
            at: self.at,
            what: what.into(),
        }
    }

    fn fresh_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn push(&mut self, value: Value, ty: impl Into<String>, pure: bool, reads: Vec<u16>) {
        let id = self.fresh_id();
        self.stack.push(Entry {
            id,
            value,
            ty: ty.into(),
            pure,
            reads,
        });
    }

    fn push_expr(&mut self, expr: Expr, ty: impl Into<String>, pure: bool, reads: Vec<u16>) {
        self.push(Value::Expr(expr), ty, pure, reads)
    }

    fn pop(&mut self) -> Result<Entry, DecompileError> {
        self.stack.pop().ok_or(DecompileError::StackUnderflow { at: self.at })
    }

    fn pop_operand(&mut self) -> Result<Operand, DecompileError> {
        let entry = self.pop()?;
        match entry.value {
            Value::Expr(expr) => Ok(Operand {
                expr,
                ty: entry.ty,
                pure: entry.pure,
                reads: entry.reads,
            }),
            Value::Cmp { .. } => Err(self.unsupported("a compare result used as a value")),
            Value::Uninit { class_name } => {
                Err(self.unsupported(format!("{} used before its constructor ran", class_name)))
            }
        }
    }

    /// Pop `params.len()` arguments, narrowing literals to the parameter types.
    fn pop_args(&mut self, params: &[String]) -> Result<(Vec<Expr>, Vec<u16>), DecompileError> {
        let mut args = Vec::with_capacity(params.len());
        let mut reads = Vec::new();
        for param in params.iter().rev() {
            let arg = self.pop_operand()?;
            reads = union_reads(&reads, &arg.reads);
            args.push(narrow_literal(arg.expr, param));
        }
        args.reverse();
        Ok((args, reads))
    }

    fn declare_hoisted(&mut self, prefix: char, ty: &str) -> String {
        let counter = if prefix == 't' {
            &mut self.next_temp
        } else {
            &mut self.next_shared
        };
        let name = format!("{}{}", prefix, counter);
        *counter += 1;
        self.decls.push(declare_var(ty, &name));
        self.declared.insert(name.clone());
        name
    }

    /// Moves the entry at `index` (and its `dup` copies) into a temporary.
    fn reify_at(&mut self, index: usize) -> Result<(), DecompileError> {
        let entry = self.stack[index].clone();
        let expr = match entry.value {
            Value::Expr(expr) => expr,
            Value::Cmp { .. } => return Err(self.unsupported("a compare result kept across a statement")),
            Value::Uninit { .. } => return Ok(()),
        };
        let name = self.declare_hoisted('t', &entry.ty);
        trace!(name = %name, at = self.at, "reifying stack entry");
        self.temps.insert(name.clone());
        self.steps.push(Step::stmt(assign_var(&name, expr)));
        let replacement = Entry {
            id: self.fresh_id(),
            value: Value::Expr(var(&name)),
            ty: entry.ty,
            pure: true,
            reads: Vec::new(),
        };
        for e in self.stack.iter_mut().filter(|e| e.id == entry.id) {
            *e = replacement.clone();
        }
        Ok(())
    }

    /// Reifies every entry that must not be reordered past a statement, and
    /// every entry reading `slot` when the statement writes it.
    fn flush_for(&mut self, slot: Option<u16>) -> Result<(), DecompileError> {
        for index in 0..self.stack.len() {
            let entry = &self.stack[index];
            let clobbered = slot.is_some_and(|s| entry.reads_slot(s));
            if entry.must_reify() || (clobbered && !matches!(entry.value, Value::Uninit { .. })) {
                self.reify_at(index)?;
            }
        }
        Ok(())
    }

    fn emit(&mut self, stmt: Stmt) -> Result<(), DecompileError> {
        self.flush_for(None)?;
        self.steps.push(Step::stmt(stmt));
        Ok(())
    }

    fn dom_label(&mut self, target: insn::Label) -> dom::Label {
        self.labels.reference(&target, || self.arena.fresh())
    }

    /// Name and descriptor for a local slot; the flag is set when the name is new.
    fn local_for(&mut self, slot: u16, kind: ValueKind, hint: Option<&str>) -> (String, String, bool) {
        if let Some(binding) = self.scope.find_slot(slot) {
            if ValueKind::of(&binding.descriptor) == Some(kind) {
                return (binding.name.clone(), binding.descriptor.clone(), false);
            }
        }
        let debug_entry = self
            .info
            .local_variables
            .iter()
            .find(|l| l.slot == slot && ValueKind::of(&l.descriptor) == Some(kind));
        let mut name = debug_entry.map_or_else(|| format!("v{}", slot), |l| l.name.clone());
        if self.declared.contains(&name) {
            name = format!("v{}{}", slot, kind.prefix());
            while self.declared.contains(&name) {
                name.push('_');
            }
        }
        let desc = match (debug_entry, hint) {
            (Some(l), _) => l.descriptor.clone(),
            (None, Some(h)) if ValueKind::of(h) == Some(kind) => h.to_string(),
            _ => kind.default_descriptor().to_string(),
        };
        self.scope.bind_at(&name, slot, &desc);
        self.declared.insert(name.clone());
        (name, desc, true)
    }

    /// Records the stack a jump carries to `target`.
    fn arrive(&mut self, target: insn::Label, step: usize) -> Result<(), DecompileError> {
        if !self.reachable {
            return Ok(());
        }
        if let Some(&depth) = self.marked.get(&target) {
            if depth != 0 || !self.stack.is_empty() {
                return Err(self.unsupported(format!("operand values carried by a backward jump to {}", target)));
            }
            return Ok(());
        }
        self.incoming.entry(target).or_default().push(Incoming {
            stack: self.stack.clone(),
            step: Some(step),
        });
        Ok(())
    }

    /// The stack at a join. Positions whose producers differ between paths
    /// are unified under one shared variable assigned on every path.
    fn merge(&mut self, label: insn::Label, mut arrivals: Vec<Incoming>) -> Result<Vec<Entry>, DecompileError> {
        if arrivals.len() <= 1 {
            return Ok(arrivals.pop().map(|a| a.stack).unwrap_or_default());
        }
        let depth = arrivals[0].stack.len();
        if let Some(other) = arrivals.iter().find(|a| a.stack.len() != depth) {
            return Err(DecompileError::StackMismatch {
                label: label.to_string(),
                expected: depth,
                found: other.stack.len(),
            });
        }

        let mut merged = arrivals[0].stack.clone();
        for pos in 0..depth {
            let first = arrivals[0].stack[pos].id;
            if arrivals.iter().all(|a| a.stack[pos].id == first) {
                continue;
            }
            let ty = join_type(arrivals.iter().map(|a| &a.stack[pos]));
            let name = self.declare_hoisted('s', &ty);
            debug!(%label, name = %name, paths = arrivals.len(), "unifying divergent stack values");
            for arrival in &arrivals {
                let expr = arrival.stack[pos]
                    .expr()
                    .cloned()
                    .ok_or_else(|| self.unsupported("a non-expression value reaching a join"))?;
                let assign = assign_var(&name, expr);
                match arrival.step {
                    Some(step) => self.steps[step].prelude.push(assign),
                    None => self.steps.push(Step::stmt(assign)),
                }
            }
            merged[pos] = Entry {
                id: self.fresh_id(),
                value: Value::Expr(var(&name)),
                ty,
                pure: true,
                reads: Vec::new(),
            };
        }
        Ok(merged)
    }

    fn jump_away(&mut self, exit: Exit) {
        self.frames.exit(exit);
        self.stack.clear();
        self.reachable = false;
    }

    /// Replace the uninitialized copies left by `new; dup` with the constructed object.
    fn replace_uninit_new(&mut self, alloc: u32, new: dom::NewInstance, reads: Vec<u16>) -> Result<(), DecompileError> {
        let class_desc = descriptor::descriptor_of_internal_name(&new.class_name);
        let copies: Vec<usize> = (0..self.stack.len()).filter(|&i| self.stack[i].id == alloc).collect();
        if copies.is_empty() {
            return self.emit(new_instance_stmt(new));
        }
        let entry = Entry {
            id: self.fresh_id(),
            value: Value::Expr(new_instance_expr(new)),
            ty: class_desc,
            pure: false,
            reads,
        };
        for &i in &copies {
            self.stack[i] = entry.clone();
        }
        if copies.len() > 1 {
            self.reify_at(copies[0])?;
        }
        Ok(())
    }

    /// `pop`: only calls and allocations have a statement form.
    fn discard(&mut self) -> Result<(), DecompileError> {
        let entry = self.pop()?;
        match entry.value {
            Value::Expr(expr) if has_side_effects(&expr) => match expr {
                Expr::Invoke(call) => self.emit(invoke_stmt(call)),
                Expr::NewInstance(new) => self.emit(new_instance_stmt(new)),
                _ => Ok(()),
            },
            Value::Expr(Expr::Var(name)) if self.temps.contains(&name) => Ok(()),
            Value::Expr(expr) => Err(DecompileError::PopOfValue {
                at: self.at,
                value: expr.to_string(),
            }),
            Value::Cmp { .. } | Value::Uninit { .. } => Err(DecompileError::PopOfValue {
                at: self.at,
                value: entry.ty,
            }),
        }
    }

    /// `dup`/`dup2`: values that may not be evaluated twice go through a temporary.
    fn duplicate(&mut self, count: usize) -> Result<(), DecompileError> {
        let base = self
            .stack
            .len()
            .checked_sub(count)
            .ok_or(DecompileError::StackUnderflow { at: self.at })?;
        for index in base..self.stack.len() {
            if self.stack[index].must_reify() {
                self.reify_at(index)?;
            }
        }
        let copies = self.stack[base..].to_vec();
        self.stack.extend(copies);
        Ok(())
    }

    fn dispatch(&mut self, key: Operand, keys: Vec<i32>, targets: &[insn::Label], default: insn::Label) -> Result<(), DecompileError> {
        let mut labels = Vec::with_capacity(targets.len());
        for target in targets {
            labels.push(self.dom_label(*target));
        }
        let default_label = self.dom_label(default);
        let (key_expr, _) = int_operand(key.expr, &key.ty);
        self.flush_for(None)?;
        let step = self.steps.len();
        self.steps.push(Step::stmt(raw_switch(key_expr, default_label, keys, labels)));
        let mut seen = Vec::new();
        for target in targets.iter().chain(std::iter::once(&default)) {
            if !seen.contains(target) {
                seen.push(*target);
                self.arrive(*target, step)?;
            }
        }
        self.frames.push_switch(default, targets);
        self.stack.clear();
        self.reachable = false;
        Ok(())
    }

}

fn int_kind_operands(kind: ValueKind, lhs: Operand, rhs: Operand) -> ((Expr, String), (Expr, String)) {
    if kind == ValueKind::Int {
        (int_operand(lhs.expr, &lhs.ty), int_operand(rhs.expr, &rhs.ty))
    } else {
        ((lhs.expr, lhs.ty), (rhs.expr, rhs.ty))
    }
}

impl InsnVisitor for Decompiler<'_> {
    type Error = DecompileError;

    fn visit_try_catch(&mut self, block: &TryCatchBlock) -> Result<(), DecompileError> {
        if self.options.reject_exception_handlers {
            return Err(self.unsupported("exception handlers"));
        }
        warn!(handler = %block.handler, "dropping exception handler");
        let internal = block.exception_type.as_deref().unwrap_or("java/lang/Throwable");
        let ty = descriptor::descriptor_of_internal_name(internal);
        let name = self.declare_hoisted('e', &ty);
        let id = self.fresh_id();
        self.handler_seeds.insert(
            block.handler,
            Entry {
                id,
                value: Value::Expr(var(name)),
                ty,
                pure: true,
                reads: Vec::new(),
            },
        );
        Ok(())
    }

    fn visit_const(&mut self, value: &Constant) -> Result<(), DecompileError> {
        self.begin();
        let (expr, ty) = constant_expr(value);
        self.push_expr(expr, ty, true, Vec::new());
        Ok(())
    }

    fn visit_load(&mut self, kind: ValueKind, slot: u16) -> Result<(), DecompileError> {
        self.begin();
        if slot == 0 && !self.info.is_static() {
            let ty = descriptor::descriptor_of_internal_name(&self.info.class_name);
            self.push_expr(this(), ty, true, Vec::new());
            return Ok(());
        }
        let (name, desc, fresh) = self.local_for(slot, kind, None);
        if fresh {
            self.decls.push(declare_var(&desc, &name));
        }
        self.push_expr(var(name), desc, true, vec![slot]);
        Ok(())
    }

    fn visit_store(&mut self, kind: ValueKind, slot: u16) -> Result<(), DecompileError> {
        self.begin();
        if slot == 0 && !self.info.is_static() {
            return Err(self.unsupported("a store to the receiver slot"));
        }
        let value = self.pop_operand()?;
        let (name, desc, fresh) = self.local_for(slot, kind, Some(&value.ty));
        self.flush_for(Some(slot))?;
        if fresh {
            self.steps.push(Step::stmt(declare_var(&desc, &name)));
        }
        self.emit(assign_var(name, narrow_literal(value.expr, &desc)))
    }

    fn visit_iinc(&mut self, slot: u16, amount: i16) -> Result<(), DecompileError> {
        self.begin();
        let (name, desc, fresh) = self.local_for(slot, ValueKind::Int, None);
        if fresh {
            self.decls.push(declare_var(&desc, &name));
        }
        self.flush_for(Some(slot))?;
        self.emit(increment(name, amount))
    }

    fn visit_field(&mut self, op: FieldOp, owner: &str, name: &str, desc: &str) -> Result<(), DecompileError> {
        self.begin();
        match op {
            FieldOp::GetField => {
                let target = self.pop_operand()?;
                self.push_expr(field(target.expr, name, desc), desc, false, target.reads);
                Ok(())
            }
            FieldOp::GetStatic => {
                self.push_expr(static_field(owner, name, desc), desc, false, Vec::new());
                Ok(())
            }
            FieldOp::PutField => {
                let value = self.pop_operand()?;
                let target = self.pop_operand()?;
                self.emit(assign_field(target.expr, name, desc, narrow_literal(value.expr, desc)))
            }
            FieldOp::PutStatic => {
                let value = self.pop_operand()?;
                self.emit(assign_static(owner, name, desc, narrow_literal(value.expr, desc)))
            }
        }
    }

    fn visit_invoke(&mut self, kind: InvokeKind, owner: &str, name: &str, desc: &str) -> Result<(), DecompileError> {
        self.begin();
        let invalid = || DecompileError::InvalidDescriptor {
            descriptor: desc.to_string(),
        };
        let params = descriptor::parameter_descriptors(desc).ok_or_else(invalid)?;
        let ret = descriptor::return_descriptor(desc).ok_or_else(invalid)?;
        let (args, mut reads) = self.pop_args(&params)?;

        if kind == InvokeKind::Special && name == "<init>" {
            let receiver = self.pop()?;
            if let Value::Uninit { class_name } = &receiver.value {
                trace!(class = %class_name, "collapsing new/dup/<init>");
                let new = new_instance(class_name.clone(), params, args);
                return self.replace_uninit_new(receiver.id, new, reads);
            }
            self.stack.push(receiver);
        }

        let target = if kind.has_target() {
            let target = self.pop_operand()?;
            reads = union_reads(&target.reads, &reads);
            Some(target.expr)
        } else {
            None
        };
        let call = invocation(kind, owner, name, desc, target, args)?;
        if ret == descriptor::VOID {
            self.emit(invoke_stmt(call))
        } else {
            self.push_expr(Expr::Invoke(call), ret, false, reads);
            Ok(())
        }
    }

    fn visit_type(&mut self, op: TypeOp, class_name: &str) -> Result<(), DecompileError> {
        self.begin();
        let desc = descriptor::descriptor_of_internal_name(class_name);
        match op {
            TypeOp::New => self.push(
                Value::Uninit {
                    class_name: class_name.to_string(),
                },
                desc,
                true,
                Vec::new(),
            ),
            TypeOp::CheckCast => {
                let value = self.pop_operand()?;
                self.push_expr(cast(value.expr, &desc), desc, false, value.reads);
            }
            TypeOp::InstanceOf => {
                let value = self.pop_operand()?;
                self.push_expr(instance_of(value.expr, desc), descriptor::BOOLEAN, value.pure, value.reads);
            }
        }
        Ok(())
    }

    fn visit_stack(&mut self, op: StackOp) -> Result<(), DecompileError> {
        self.begin();
        let top_is_wide = self.stack.last().is_some_and(Entry::is_wide);
        match op {
            StackOp::Pop => self.discard(),
            StackOp::Pop2 if top_is_wide => self.discard(),
            StackOp::Pop2 => {
                self.discard()?;
                self.discard()
            }
            StackOp::Dup => self.duplicate(1),
            StackOp::Dup2 if top_is_wide => self.duplicate(1),
            StackOp::Dup2 => self.duplicate(2),
        }
    }

    fn visit_array_length(&mut self) -> Result<(), DecompileError> {
        self.begin();
        let array = self.pop_operand()?;
        self.push_expr(array_length(array.expr), descriptor::INT, false, array.reads);
        Ok(())
    }

    fn visit_array_store(&mut self, kind: ArrayKind) -> Result<(), DecompileError> {
        self.begin();
        let value = self.pop_operand()?;
        let index = self.pop_operand()?;
        let array = self.pop_operand()?;
        let element = match array.ty.strip_prefix('[') {
            Some(element) => element.to_string(),
            None if kind == ArrayKind::Char => descriptor::CHAR.to_string(),
            None if kind == ArrayKind::Short => descriptor::SHORT.to_string(),
            None if kind == ArrayKind::Byte => descriptor::BYTE.to_string(),
            None => kind.value_kind().default_descriptor().to_string(),
        };
        self.emit(array_store(array.expr, index.expr, narrow_literal(value.expr, &element)))
    }

    fn visit_arith(&mut self, op: ArithmeticOp, kind: ValueKind) -> Result<(), DecompileError> {
        self.begin();
        let rhs = self.pop_operand()?;
        let lhs = self.pop_operand()?;
        let pure = lhs.pure && rhs.pure && is_pure_arithmetic(op, matches!(kind, ValueKind::Int | ValueKind::Long));
        let reads = union_reads(&lhs.reads, &rhs.reads);
        let ((l, lt), (r, rt)) = int_kind_operands(kind, lhs, rhs);
        let ty = descriptor::arithmetic_result_type(&lt, &rt).unwrap_or(kind.default_descriptor());
        self.push_expr(arithmetic(op, l, r), ty, pure, reads);
        Ok(())
    }

    fn visit_neg(&mut self, kind: ValueKind) -> Result<(), DecompileError> {
        self.begin();
        let value = self.pop_operand()?;
        let expr = match kind {
            ValueKind::Int => int_operand(value.expr, &value.ty).0,
            _ => value.expr,
        };
        self.push_expr(negate(expr), kind.default_descriptor(), value.pure, value.reads);
        Ok(())
    }

    fn visit_shift(&mut self, op: ShiftOp, kind: ValueKind) -> Result<(), DecompileError> {
        self.begin();
        let rhs = self.pop_operand()?;
        let lhs = self.pop_operand()?;
        let pure = lhs.pure && rhs.pure;
        let reads = union_reads(&lhs.reads, &rhs.reads);
        let (r, rt) = int_operand(rhs.expr, &rhs.ty);
        let (l, lt) = match kind {
            ValueKind::Int => int_operand(lhs.expr, &lhs.ty),
            _ => (lhs.expr, lhs.ty),
        };
        let r = if rt == descriptor::INT { r } else { cast(r, descriptor::INT) };
        let ty = descriptor::shift_result_type(&lt, descriptor::INT).unwrap_or(kind.default_descriptor());
        self.push_expr(shift(op, l, r), ty, pure, reads);
        Ok(())
    }

    fn visit_bitwise(&mut self, op: BitwiseOp, kind: ValueKind) -> Result<(), DecompileError> {
        self.begin();
        let rhs = self.pop_operand()?;
        let lhs = self.pop_operand()?;
        let pure = lhs.pure && rhs.pure;
        let reads = union_reads(&lhs.reads, &rhs.reads);
        let ((l, lt), (r, rt)) = int_kind_operands(kind, lhs, rhs);
        let ty = descriptor::bitwise_result_type(&lt, &rt).unwrap_or(kind.default_descriptor());
        self.push_expr(bitwise(op, l, r), ty, pure, reads);
        Ok(())
    }

    fn visit_convert(&mut self, conversion: Conversion) -> Result<(), DecompileError> {
        self.begin();
        let value = self.pop_operand()?;
        let target = conversion.result();
        self.push_expr(cast(value.expr, target), target, value.pure, value.reads);
        Ok(())
    }

    fn visit_compare(&mut self, compare: CompareInsn) -> Result<(), DecompileError> {
        self.begin();
        let rhs = self.pop_operand()?;
        let lhs = self.pop_operand()?;
        let value = Value::Cmp {
            insn: compare,
            lhs: lhs.expr,
            rhs: rhs.expr,
        };
        let reads = union_reads(&lhs.reads, &rhs.reads);
        self.push(value, descriptor::INT, lhs.pure && rhs.pure, reads);
        Ok(())
    }

    fn visit_jump(&mut self, cond: JumpCond, target: insn::Label) -> Result<(), DecompileError> {
        self.begin();
        let condition = match cond {
            JumpCond::Always => None,
            JumpCond::Zero(op) => {
                let entry = self.pop()?;
                let ty = entry.ty.clone();
                Some(make_if_zero_cond(entry.value, &ty, op).ok_or_else(|| self.unsupported("a zero test of an uninitialized object"))?)
            }
            JumpCond::IntCompare(op) => {
                let rhs = self.pop_operand()?;
                let lhs = self.pop_operand()?;
                let (l, r) = int_compare_operands((lhs.expr, lhs.ty), (rhs.expr, rhs.ty));
                Some(compare(op, l, r))
            }
            JumpCond::RefEq | JumpCond::RefNe => {
                let rhs = self.pop_operand()?;
                let lhs = self.pop_operand()?;
                let op = if cond == JumpCond::RefEq { IdentityOp::Eq } else { IdentityOp::Ne };
                Some(identity_cond(op, lhs.expr, rhs.expr))
            }
            JumpCond::Null | JumpCond::NonNull => {
                let value = self.pop_operand()?;
                let op = if cond == JumpCond::Null { IdentityOp::Eq } else { IdentityOp::Ne };
                Some(identity_cond(op, value.expr, null()))
            }
        };

        let label = self.dom_label(target);
        self.flush_for(None)?;
        let step = self.steps.len();
        let forward = !self.marked.contains_key(&target);
        match condition {
            Some(cond_expr) => {
                self.steps.push(Step::stmt(if_jump(cond_expr, label)));
                self.arrive(target, step)?;
                if forward && self.reachable {
                    self.frames.push_branch(target, self.stack.len());
                }
            }
            None => {
                self.steps.push(Step::stmt(goto(label)));
                self.arrive(target, step)?;
                self.jump_away(Exit::Goto);
            }
        }
        Ok(())
    }

    fn visit_label(&mut self, label: insn::Label) -> Result<(), DecompileError> {
        self.begin();
        self.labels.define(&label, || self.arena.fresh())?;
        let mut arrivals = self.incoming.remove(&label).unwrap_or_default();
        if self.reachable {
            arrivals.push(Incoming {
                stack: std::mem::take(&mut self.stack),
                step: None,
            });
        }
        self.stack = match (arrivals.is_empty(), self.handler_seeds.remove(&label)) {
            (true, Some(seed)) => vec![seed],
            _ => self.merge(label, arrivals)?,
        };
        self.steps.push(Step {
            prelude: Vec::new(),
            body: StepBody::Mark(label),
        });
        self.marked.insert(label, self.stack.len());
        if let Some(depth) = self.frames.reach(label) {
            if depth != self.stack.len() {
                return Err(DecompileError::StackMismatch {
                    label: label.to_string(),
                    expected: depth,
                    found: self.stack.len(),
                });
            }
        }
        self.reachable = true;
        Ok(())
    }

    fn visit_table_switch(&mut self, low: i32, high: i32, default: insn::Label, targets: &[insn::Label]) -> Result<(), DecompileError> {
        self.begin();
        let keys: Vec<i32> = (low..=high).collect();
        if keys.len() != targets.len() {
            return Err(self.unsupported(format!(
                "tableswitch over {}..={} with {} targets",
                low,
                high,
                targets.len()
            )));
        }
        let key = self.pop_operand()?;
        self.dispatch(key, keys, targets, default)
    }

    fn visit_lookup_switch(&mut self, default: insn::Label, pairs: &[(i32, insn::Label)]) -> Result<(), DecompileError> {
        self.begin();
        let key = self.pop_operand()?;
        let keys = pairs.iter().map(|(k, _)| *k).collect();
        let targets: Vec<insn::Label> = pairs.iter().map(|(_, l)| *l).collect();
        self.dispatch(key, keys, &targets, default)
    }

    fn visit_return(&mut self, kind: Option<ValueKind>) -> Result<(), DecompileError> {
        self.begin();
        let stmt = match kind {
            None => ret(),
            Some(_) => {
                let value = self.pop_operand()?;
                if self.options.narrow_return_literals {
                    ret_value(narrow_literal(value.expr, &self.return_desc))
                } else {
                    ret_value(value.expr)
                }
            }
        };
        self.emit(stmt)?;
        self.jump_away(Exit::Return);
        Ok(())
    }

    fn visit_throw(&mut self) -> Result<(), DecompileError> {
        self.begin();
        let value = self.pop_operand()?;
        self.emit(throw(value.expr))?;
        self.jump_away(Exit::Return);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::CompareOp;
    use crate::insn::{Insn, Label as L};

    fn body(insns: Vec<Insn>) -> MethodBody {
        MethodBody::from_parts(insns, Vec::new(), 0)
    }

    fn run(info: &MethodInfo, insns: Vec<Insn>) -> Result<Stmt, DecompileError> {
        decompile(info, &body(insns)).map(|d| d.body)
    }

    fn load(kind: ValueKind, slot: u16) -> Insn {
        Insn::Load { kind, slot }
    }

    #[test]
    fn straight_line_arithmetic() {
        let info = MethodInfo::new("Calc", "inc", "(I)I").with_flags(insn::MethodAccessFlags::STATIC);
        let tree = run(
            &info,
            vec![
                load(ValueKind::Int, 0),
                Insn::Const(Constant::Int(1)),
                Insn::Arith {
                    op: ArithmeticOp::Add,
                    kind: ValueKind::Int,
                },
                Insn::Return(Some(ValueKind::Int)),
            ],
        )
        .unwrap();
        assert_eq!(tree, block(vec![ret_value(add(var("arg0"), int(1)))]));
    }

    #[test]
    fn boolean_return_literal_is_narrowed() {
        let info = MethodInfo::new("Flags", "yes", "()Z");
        let tree = run(&info, vec![Insn::Const(Constant::Int(1)), Insn::Return(Some(ValueKind::Int))]).unwrap();
        assert_eq!(tree, block(vec![ret_value(boolean(true))]));
    }

    #[test]
    fn conditional_value_is_unified_at_the_join() {
        let info = MethodInfo::new("T", "pick", "(Z)I").with_flags(insn::MethodAccessFlags::STATIC);
        let tree = run(
            &info,
            vec![
                load(ValueKind::Int, 0),
                Insn::Jump {
                    cond: JumpCond::Zero(CompareOp::Eq),
                    target: L(0),
                },
                Insn::Const(Constant::Int(7)),
                Insn::Jump {
                    cond: JumpCond::Always,
                    target: L(1),
                },
                Insn::Mark(L(0)),
                Insn::Const(Constant::Int(9)),
                Insn::Mark(L(1)),
                Insn::Return(Some(ValueKind::Int)),
            ],
        )
        .unwrap();
        let mut arena = LabelArena::new();
        let (else_label, end) = (arena.fresh(), arena.fresh());
        assert_eq!(
            tree,
            block(vec![
                declare_var("I", "s0"),
                if_jump(not(var("arg0")), else_label),
                assign_var("s0", int(7)),
                goto(end),
                mark(else_label),
                assign_var("s0", int(9)),
                mark(end),
                ret_value(var("s0")),
            ])
        );
    }

    #[test]
    fn new_dup_init_collapses() {
        let info = MethodInfo::new("Factory", "make", "()Ljava/lang/StringBuilder;");
        let tree = run(
            &info,
            vec![
                Insn::Type {
                    op: TypeOp::New,
                    class_name: "java/lang/StringBuilder".into(),
                },
                Insn::Stack(StackOp::Dup),
                Insn::Const(Constant::String("a".into())),
                Insn::Invoke {
                    kind: InvokeKind::Special,
                    owner: "java/lang/StringBuilder".into(),
                    name: "<init>".into(),
                    descriptor: "(Ljava/lang/String;)V".into(),
                },
                Insn::Return(Some(ValueKind::Reference)),
            ],
        )
        .unwrap();
        let new = new_instance("java/lang/StringBuilder", vec![descriptor::STRING.into()], vec![string("a")]);
        assert_eq!(tree, block(vec![ret_value(new_instance_expr(new))]));
    }

    #[test]
    fn impure_values_keep_their_order() {
        let info = MethodInfo::new("T", "f", "()I");
        let call = |name: &str, desc: &str| Insn::Invoke {
            kind: InvokeKind::Static,
            owner: "T".into(),
            name: name.into(),
            descriptor: desc.into(),
        };
        let tree = run(
            &info,
            vec![call("first", "()I"), call("second", "()V"), Insn::Return(Some(ValueKind::Int))],
        )
        .unwrap();
        let first = invocation(InvokeKind::Static, "T", "first", "()I", None, vec![]).unwrap();
        let second = invocation(InvokeKind::Static, "T", "second", "()V", None, vec![]).unwrap();
        assert_eq!(
            tree,
            block(vec![
                declare_var("I", "t0"),
                assign_var("t0", Expr::Invoke(first)),
                invoke_stmt(second),
                ret_value(var("t0")),
            ])
        );
    }

    #[test]
    fn popping_a_plain_value_fails() {
        let info = MethodInfo::new("T", "f", "()V");
        let err = run(&info, vec![Insn::Const(Constant::Int(3)), Insn::Stack(StackOp::Pop), Insn::Return(None)]).unwrap_err();
        assert_eq!(
            err,
            DecompileError::PopOfValue {
                at: 1,
                value: "3".into()
            }
        );
    }

    #[test]
    fn underflow_and_mismatch_are_reported() {
        let info = MethodInfo::new("T", "f", "()I");
        let err = run(&info, vec![Insn::Return(Some(ValueKind::Int))]).unwrap_err();
        assert_eq!(err, DecompileError::StackUnderflow { at: 0 });

        let info = MethodInfo::new("T", "g", "(I)I");
        let err = run(
            &info,
            vec![
                Insn::Const(Constant::Int(1)),
                load(ValueKind::Int, 1),
                Insn::Jump {
                    cond: JumpCond::Zero(CompareOp::Eq),
                    target: L(0),
                },
                Insn::Const(Constant::Int(2)),
                Insn::Mark(L(0)),
                Insn::Return(Some(ValueKind::Int)),
            ],
        )
        .unwrap_err();
        assert!(matches!(err, DecompileError::StackMismatch { expected: 1, found: 2, .. }));
    }

    #[test]
    fn exception_handlers_are_rejected_by_default() {
        let info = MethodInfo::new("T", "f", "()V");
        let mut method = body(vec![Insn::Mark(L(0)), Insn::Return(None), Insn::Mark(L(1))]);
        method.try_catch_blocks.push(TryCatchBlock {
            start: L(0),
            end: L(1),
            handler: L(1),
            exception_type: None,
        });
        assert!(matches!(decompile(&info, &method), Err(DecompileError::Unsupported { .. })));
    }

    #[test]
    fn unreferenced_labels_are_not_marked() {
        let info = MethodInfo::new("T", "f", "()V");
        let tree = run(&info, vec![Insn::Mark(L(5)), Insn::Return(None)]).unwrap();
        assert_eq!(tree, block(vec![ret()]));
    }
}
