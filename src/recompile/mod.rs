//! Tree → bytecode.
//!
//! [`Recompiler`] lowers a statement tree into a fresh [`MethodBody`]. The
//! target body is only replaced once the whole tree has been emitted, so a
//! failed recompilation leaves it untouched.

mod codegen;
mod infer;
mod splice;
mod try_catch;

use thiserror::Error;
use tracing::{debug, trace};

use crate::descriptor::{self, ValueKind};
use crate::dom::visit::{LabelRole, Visitor};
use crate::dom::{self, DomError, Stmt};
use crate::insn::{self, Insn, MethodBody, MethodInfo};
use crate::scope::{LabelRegistry, ScopeError, VarScope};

pub use self::infer::{assignment_conversion, cast_conversions, NULL_TYPE};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RecompileError {
    #[error("{op} cannot combine {lhs} and {rhs}")]
    OperandTypes { op: String, lhs: String, rhs: String },
    #[error("cannot use a {from} value as {to} in {context}")]
    Incompatible {
        context: &'static str,
        from: String,
        to: String,
    },
    #[error("unknown variable {name}")]
    UnknownVariable { name: String },
    #[error("{name} expects {expected} arguments, got {found}")]
    ArgumentCount {
        name: String,
        expected: usize,
        found: usize,
    },
    #[error("`this` used in a static method")]
    ThisInStatic,
    #[error("return does not match the method's return type {expected}")]
    ReturnMismatch { expected: String },
    #[error("a top usage must consume its value exactly once, found {uses}")]
    TopValueUnbalanced { uses: usize },
    #[error("break outside of a switch")]
    BreakOutsideSwitch,
    #[error("original body spliced but none was given")]
    NoOriginalBody,
    #[error("a void method's original body has no value to splice")]
    SpliceInVoidMethod,
    #[error("invalid descriptor: {descriptor}")]
    InvalidDescriptor { descriptor: String },
    #[error("unsupported: {what}")]
    Unsupported { what: String },
    #[error(transparent)]
    Scope(#[from] ScopeError),
    #[error(transparent)]
    Dom(#[from] DomError),
}

#[derive(Clone, Debug)]
pub struct RecompileOptions {
    /// Check every tree label before emitting anything.
    pub verify_labels: bool,
    /// Accept primitive widening (`int` → `long`, ...) where a value is stored.
    pub widen_primitives: bool,
    /// Append `return` to void methods whose code falls off the end.
    pub trailing_void_return: bool,
}

impl Default for RecompileOptions {
    fn default() -> Self {
        RecompileOptions {
            verify_labels: true,
            widen_primitives: true,
            trailing_void_return: true,
        }
    }
}

/// Replaces `target` with the code for `tree`. The previous contents of
/// `target` are what [`Stmt::SpliceOriginal`] replays.
pub fn recompile(tree: &Stmt, info: &MethodInfo, target: &mut MethodBody) -> Result<(), RecompileError> {
    recompile_with_options(tree, info, target, &RecompileOptions::default())
}

pub fn recompile_with_options(
    tree: &Stmt,
    info: &MethodInfo,
    target: &mut MethodBody,
    options: &RecompileOptions,
) -> Result<(), RecompileError> {
    let body = generate(tree, info, Some(&*target), options)?;
    *target = body;
    Ok(())
}

pub fn recompile_method(method: &dom::MethodDom, target: &mut MethodBody) -> Result<(), RecompileError> {
    recompile(&method.body, &method.info, target)
}

/// Emits `tree` into a new body without touching any existing one.
pub fn generate(
    tree: &Stmt,
    info: &MethodInfo,
    original: Option<&MethodBody>,
    options: &RecompileOptions,
) -> Result<MethodBody, RecompileError> {
    let mut recompiler = Recompiler::new(info, original, options.clone())?;
    recompiler.emit_method(tree)?;
    recompiler.finish()
}

/// Where returns inside a protected region go instead of returning.
///
/// Passed down explicitly: statements outside any `try` with a finally body
/// get `None` and return directly.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct ExitRewrite {
    pub label: insn::Label,
    /// Holds the pending return value; `None` for void methods.
    pub slot: Option<(u16, ValueKind)>,
}

/// How an expression's result is consumed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Flow {
    /// Leave the value on the stack.
    Value,
    /// Jump to `target` when the boolean value equals `when`, fall through otherwise.
    Branch { target: insn::Label, when: bool },
}

/// One lowering session for one method.
pub struct Recompiler<'a> {
    info: &'a MethodInfo,
    options: RecompileOptions,
    original: Option<&'a MethodBody>,
    out: MethodBody,
    scope: VarScope,
    return_desc: String,
    this_desc: String,
    /// First local slot after the receiver and parameters.
    params_end: u16,
    labels: LabelRegistry<dom::Label, insn::Label>,
    named: LabelRegistry<String, insn::Label>,
    /// Fresh targets for tree labels marked inside the finally copy being emitted.
    overlays: Vec<Vec<(dom::Label, insn::Label)>>,
    /// End labels of the enclosing switches and whether a break used them.
    breaks: Vec<(insn::Label, bool)>,
}

impl<'a> Recompiler<'a> {
    pub fn new(
        info: &'a MethodInfo,
        original: Option<&'a MethodBody>,
        options: RecompileOptions,
    ) -> Result<Self, RecompileError> {
        let invalid = || RecompileError::InvalidDescriptor {
            descriptor: info.descriptor.clone(),
        };
        let params = info.parameters().ok_or_else(invalid)?;
        let return_desc = info.return_descriptor().ok_or_else(invalid)?;
        let scope = VarScope::for_method(info.is_static(), &params)?;
        Ok(Recompiler {
            info,
            options,
            original,
            out: MethodBody::new(),
            params_end: scope.next_slot(),
            scope,
            return_desc,
            this_desc: descriptor::descriptor_of_internal_name(&info.class_name),
            labels: LabelRegistry::new(),
            named: LabelRegistry::new(),
            overlays: Vec::new(),
            breaks: Vec::new(),
        })
    }

    /// Emits the whole method body.
    pub fn emit_method(&mut self, tree: &Stmt) -> Result<(), RecompileError> {
        debug!(
            "recompiling {}.{}{}",
            self.info.class_name, self.info.name, self.info.descriptor
        );
        if self.options.verify_labels {
            verify_labels(tree)?;
        }
        self.emit_stmt(tree, None)?;
        if self.options.trailing_void_return && self.return_desc == descriptor::VOID && self.falls_through() {
            trace!("appending trailing return");
            self.push(Insn::Return(None));
        }
        Ok(())
    }

    /// Checks the label registries and hands over the finished body.
    pub fn finish(mut self) -> Result<MethodBody, RecompileError> {
        self.labels.verify()?;
        self.named.verify()?;
        self.out.max_locals = self.out.max_locals.max(self.scope.max_locals());
        debug!(
            "recompiled {} instructions, {} handlers",
            self.out.insns.len(),
            self.out.try_catch_blocks.len()
        );
        Ok(self.out)
    }

    fn push(&mut self, insn: Insn) {
        self.out.insns.push(insn);
    }

    fn new_label(&mut self) -> insn::Label {
        self.out.new_label()
    }

    fn falls_through(&self) -> bool {
        !self.out.insns.last().is_some_and(Insn::is_terminal)
    }

    fn jump(&mut self, target: insn::Label) {
        self.push(Insn::Jump {
            cond: insn::JumpCond::Always,
            target,
        });
    }

    /// The instruction label a jump to `label` should use.
    fn jump_target(&mut self, label: dom::Label) -> insn::Label {
        for overlay in self.overlays.iter().rev() {
            if let Some((_, target)) = overlay.iter().find(|(l, _)| *l == label) {
                return *target;
            }
        }
        let out = &mut self.out;
        self.labels.reference(&label, || out.new_label())
    }

    /// The instruction label a mark of `label` should place.
    fn mark_target(&mut self, label: dom::Label) -> Result<insn::Label, RecompileError> {
        for overlay in self.overlays.iter().rev() {
            if let Some((_, target)) = overlay.iter().find(|(l, _)| *l == label) {
                return Ok(*target);
            }
        }
        let out = &mut self.out;
        Ok(self.labels.define(&label, || out.new_label())?)
    }
}

/// Finds the first tree label that is marked twice or jumped to but never marked.
struct LabelCheck {
    registry: LabelRegistry<dom::Label, ()>,
    error: Option<ScopeError>,
}

impl Visitor for LabelCheck {
    fn visit_label(&mut self, label: dom::Label, role: LabelRole) {
        match role {
            LabelRole::Jump => {
                self.registry.reference(&label, || ());
            }
            LabelRole::Mark => {
                if let Err(e) = self.registry.define(&label, || ()) {
                    self.error.get_or_insert(e);
                }
            }
        }
    }
}

fn verify_labels(tree: &Stmt) -> Result<(), ScopeError> {
    let mut check = LabelCheck {
        registry: LabelRegistry::new(),
        error: None,
    };
    check.visit_stmt(tree);
    match check.error {
        Some(e) => Err(e),
        None => check.registry.verify(),
    }
}
