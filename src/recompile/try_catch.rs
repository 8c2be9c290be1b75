//! try/catch/finally lowering.
//!
//! The finally body is copied onto every way out of the protected region:
//! the end of the try block, the end of each catch block, the shared exit
//! that returns inside the region jump to, and a catch-all handler that
//! rethrows. Each copy gets its own instruction labels.

use tracing::{debug, trace};

use crate::descriptor::{self, ValueKind, VOID};
use crate::dom::visit::{LabelRole, Visitor};
use crate::dom::{self, Catch, Stmt};
use crate::insn::{self, Insn, TryCatchBlock};

use super::{ExitRewrite, RecompileError, Recompiler};

type Result<T> = std::result::Result<T, RecompileError>;

#[derive(Default)]
struct MarkCollector(Vec<dom::Label>);

impl Visitor for MarkCollector {
    fn visit_label(&mut self, label: dom::Label, role: LabelRole) {
        if role == LabelRole::Mark {
            self.0.push(label);
        }
    }
}

impl Recompiler<'_> {
    pub(super) fn emit_try_catch(&mut self, body: &Stmt, catches: &[Catch], exit: Option<ExitRewrite>) -> Result<()> {
        let mut finally = None;
        let mut handlers = Vec::new();
        for catch in catches {
            if !catch.is_finally() {
                handlers.push(catch);
            } else if finally.replace(&catch.body).is_some() {
                return Err(RecompileError::Unsupported {
                    what: "more than one finally body".into(),
                });
            }
        }
        debug!(
            "lowering try with {} handlers{}",
            handlers.len(),
            if finally.is_some() { " and a finally body" } else { "" }
        );
        match finally {
            None => self.emit_try(body, &handlers, exit),
            Some(finally) => self.emit_try_finally(body, &handlers, finally, exit),
        }
    }

    fn emit_try(&mut self, body: &Stmt, handlers: &[&Catch], exit: Option<ExitRewrite>) -> Result<()> {
        let start = self.new_label();
        let end = self.new_label();
        let done = self.new_label();
        let mut reaches_done = false;

        self.push(Insn::Mark(start));
        self.emit_stmt(body, exit)?;
        self.push(Insn::Mark(end));
        if self.falls_through() {
            self.jump(done);
            reaches_done = true;
        }
        for catch in handlers {
            let handler = self.new_label();
            self.out.try_catch_blocks.push(TryCatchBlock {
                start,
                end,
                handler,
                exception_type: catch.exception_type.clone(),
            });
            self.push(Insn::Mark(handler));
            self.emit_handler(catch, exit)?;
            if self.falls_through() {
                self.jump(done);
                reaches_done = true;
            }
        }
        if reaches_done {
            self.push(Insn::Mark(done));
        }
        Ok(())
    }

    fn emit_try_finally(
        &mut self,
        body: &Stmt,
        handlers: &[&Catch],
        finally: &Stmt,
        exit: Option<ExitRewrite>,
    ) -> Result<()> {
        let region_exit = ExitRewrite {
            label: self.new_label(),
            slot: if self.return_desc == VOID {
                None
            } else {
                let desc = self.return_desc.clone();
                let kind = ValueKind::of(&desc).ok_or(RecompileError::InvalidDescriptor { descriptor: desc.clone() })?;
                Some((self.scope.reserve(&desc)?, kind))
            },
        };
        let start = self.new_label();
        let end = self.new_label();
        let done = self.new_label();
        let mut reaches_done = false;
        let mut covered = vec![(start, end)];

        self.push(Insn::Mark(start));
        self.emit_stmt(body, Some(region_exit))?;
        self.push(Insn::Mark(end));
        if self.falls_through() {
            reaches_done |= self.emit_finally_then_leave(finally, done, exit)?;
        }

        for catch in handlers {
            let handler = self.new_label();
            let handler_end = self.new_label();
            self.out.try_catch_blocks.push(TryCatchBlock {
                start,
                end,
                handler,
                exception_type: catch.exception_type.clone(),
            });
            self.push(Insn::Mark(handler));
            self.emit_handler(catch, Some(region_exit))?;
            self.push(Insn::Mark(handler_end));
            covered.push((handler, handler_end));
            if self.falls_through() {
                reaches_done |= self.emit_finally_then_leave(finally, done, exit)?;
            }
        }

        // Anything thrown from the try block or a catch block.
        let rethrow = self.new_label();
        for (start, end) in covered {
            self.out.try_catch_blocks.push(TryCatchBlock {
                start,
                end,
                handler: rethrow,
                exception_type: None,
            });
        }
        self.push(Insn::Mark(rethrow));
        let pending = self.scope.reserve(descriptor::THROWABLE)?;
        self.push(Insn::Store {
            kind: ValueKind::Reference,
            slot: pending,
        });
        self.emit_finally(finally, exit)?;
        if self.falls_through() {
            self.push(Insn::Load {
                kind: ValueKind::Reference,
                slot: pending,
            });
            self.push(Insn::Throw);
        }

        if self.is_jump_target(region_exit.label) {
            trace!("emitting shared return exit {}", region_exit.label);
            self.push(Insn::Mark(region_exit.label));
            self.emit_finally(finally, exit)?;
            if self.falls_through() {
                let kind = match region_exit.slot {
                    Some((slot, kind)) => {
                        self.push(Insn::Load { kind, slot });
                        Some(kind)
                    }
                    None => None,
                };
                self.forward_return(kind, exit);
            }
        }

        if reaches_done {
            self.push(Insn::Mark(done));
        }
        Ok(())
    }

    /// A finally copy followed by a jump to `done`; tells whether the jump was needed.
    fn emit_finally_then_leave(
        &mut self,
        finally: &Stmt,
        done: insn::Label,
        exit: Option<ExitRewrite>,
    ) -> Result<bool> {
        self.emit_finally(finally, exit)?;
        if self.falls_through() {
            self.jump(done);
            return Ok(true);
        }
        Ok(false)
    }

    /// One copy of a finally body. Labels it marks are fresh for this copy.
    fn emit_finally(&mut self, finally: &Stmt, exit: Option<ExitRewrite>) -> Result<()> {
        let mut marks = MarkCollector::default();
        marks.visit_stmt(finally);
        let overlay: Vec<(dom::Label, insn::Label)> = marks.0.into_iter().map(|l| (l, self.new_label())).collect();
        trace!("finally copy with {} local labels", overlay.len());
        self.overlays.push(overlay);
        let emitted = self.emit_stmt(finally, exit);
        self.overlays.pop();
        emitted
    }

    /// Stores the caught exception, then runs the catch body in its own scope.
    fn emit_handler(&mut self, catch: &Catch, exit: Option<ExitRewrite>) -> Result<()> {
        self.scope.enter();
        let emitted = self.bind_exception(catch).and_then(|()| self.emit_stmt(&catch.body, exit));
        self.scope.exit();
        emitted
    }

    fn bind_exception(&mut self, catch: &Catch) -> Result<()> {
        let desc = match &catch.exception_type {
            Some(class_name) => descriptor::descriptor_of_internal_name(class_name),
            None => descriptor::THROWABLE.to_string(),
        };
        let slot = if catch.name.is_empty() {
            self.scope.reserve(&desc)?
        } else {
            self.scope.declare(&catch.name, &desc)?
        };
        self.push(Insn::Store {
            kind: ValueKind::Reference,
            slot,
        });
        Ok(())
    }

    /// Completes a return whose value, if any, is on the stack: directly, or
    /// through the exit of an enclosing protected region.
    fn forward_return(&mut self, kind: Option<ValueKind>, exit: Option<ExitRewrite>) {
        match exit {
            Some(outer) => {
                if let (Some(_), Some((slot, kind))) = (kind, outer.slot) {
                    self.push(Insn::Store { kind, slot });
                }
                self.jump(outer.label);
            }
            None => self.push(Insn::Return(kind)),
        }
    }

    fn is_jump_target(&self, label: insn::Label) -> bool {
        self.out.insns.iter().any(|insn| insn.targets().contains(&label))
    }
}

#[cfg(test)]
mod tests {
    use crate::dom::factory::*;
    use crate::insn::{Insn, MethodAccessFlags, MethodInfo};
    use crate::recompile::{generate, RecompileError, RecompileOptions};

    fn info(descriptor: &str) -> MethodInfo {
        MethodInfo::new("demo/Res", "run", descriptor).with_flags(MethodAccessFlags::STATIC)
    }

    fn tick(name: &str) -> crate::dom::Stmt {
        invoke_stmt(invocation(crate::dom::InvokeKind::Static, "demo/Log", name, "()V", None, vec![]).unwrap())
    }

    fn calls_to(insns: &[Insn], name: &str) -> usize {
        insns
            .iter()
            .filter(|i| matches!(i, Insn::Invoke { name: n, .. } if n == name))
            .count()
    }

    #[test]
    fn finally_is_copied_onto_every_exit() {
        let tree = block(vec![try_catch(
            block(vec![tick("work"), ret_value(int(1))]),
            vec![
                catch("java/lang/RuntimeException", "e", block(vec![tick("recover")])),
                finally(block(vec![tick("cleanup")])),
            ],
        ), ret_value(int(2))]);
        let body = generate(&tree, &info("()I"), None, &RecompileOptions::default()).unwrap();
        let insns = body.insns.as_slice();
        // catch end, rethrow handler, return exit; the try block itself always returns.
        assert_eq!(calls_to(insns, "cleanup"), 3);
        assert_eq!(body.try_catch_blocks.len(), 3);
        assert_eq!(
            body.try_catch_blocks[0].exception_type.as_deref(),
            Some("java/lang/RuntimeException")
        );
        assert!(body.try_catch_blocks[1..].iter().all(|b| b.exception_type.is_none()));
    }

    #[test]
    fn labels_inside_finally_are_fresh_per_copy() {
        let mut labels = crate::dom::LabelArena::new();
        let skip = labels.fresh();
        let cleanup = block(vec![if_jump(var("arg0"), skip), tick("cleanup"), mark(skip)]);
        let tree = block(vec![try_catch(block(vec![tick("work")]), vec![finally(cleanup)])]);
        let body = generate(&tree, &info("(Z)V"), None, &RecompileOptions::default()).unwrap();
        let marks: Vec<_> = body
            .insns
            .iter()
            .filter_map(|i| match i {
                Insn::Mark(l) => Some(*l),
                _ => None,
            })
            .collect();
        let mut unique = marks.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(marks.len(), unique.len());
        assert_eq!(calls_to(body.insns.as_slice(), "cleanup"), 2);
    }

    #[test]
    fn two_finally_bodies_are_rejected() {
        let tree = block(vec![try_catch(
            block(vec![]),
            vec![finally(block(vec![])), finally(block(vec![]))],
        )]);
        let err = generate(&tree, &info("()V"), None, &RecompileOptions::default()).unwrap_err();
        assert!(matches!(err, RecompileError::Unsupported { .. }));
    }
}
