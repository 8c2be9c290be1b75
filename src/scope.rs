//! Local variable slots and label bookkeeping shared by both directions.

use std::collections::HashMap;
use std::fmt::Display;
use std::hash::Hash;

use thiserror::Error;

use crate::descriptor;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ScopeError {
    #[error("variable {name} is already declared in this scope")]
    DuplicateVariable { name: String },
    #[error("label {label} is marked twice")]
    LabelMarkedTwice { label: String },
    #[error("label {label} is jumped to but never marked")]
    UndefinedLabel { label: String },
    #[error("local variable slots exhausted")]
    SlotOverflow,
}

/// A named local and the slot it lives in.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Binding {
    pub name: String,
    pub slot: u16,
    pub descriptor: String,
}

/// Nested name → slot scopes over one method's local variable array.
///
/// Bindings are dropped when their scope exits, but slots are never handed
/// out twice, so `max_locals` is the high-water mark of every scope.
#[derive(Clone, Debug)]
pub struct VarScope {
    frames: Vec<Vec<Binding>>,
    next_slot: u16,
}

impl Default for VarScope {
    fn default() -> Self {
        VarScope {
            frames: vec![Vec::new()],
            next_slot: 0,
        }
    }
}

impl VarScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserves slot 0 for the receiver of instance methods and binds the
    /// parameters after it.
    pub fn for_method(is_static: bool, params: &[(String, String)]) -> Result<Self, ScopeError> {
        let mut scope = VarScope::new();
        if !is_static {
            scope.next_slot = 1;
        }
        for (name, desc) in params {
            scope.declare(name, desc)?;
        }
        Ok(scope)
    }

    /// Binds `name` in the innermost scope to a fresh slot.
    pub fn declare(&mut self, name: &str, desc: &str) -> Result<u16, ScopeError> {
        if self.innermost().iter().any(|b| b.name == name) {
            return Err(ScopeError::DuplicateVariable { name: name.into() });
        }
        let slot = self.reserve(desc)?;
        self.push(Binding {
            name: name.into(),
            slot,
            descriptor: desc.into(),
        });
        Ok(slot)
    }

    /// Binds `name` to a slot chosen by someone else, as read from an existing body.
    pub fn bind_at(&mut self, name: &str, slot: u16, desc: &str) {
        let end = slot.saturating_add(descriptor::slot_width(desc).max(1));
        self.next_slot = self.next_slot.max(end);
        self.push(Binding {
            name: name.into(),
            slot,
            descriptor: desc.into(),
        });
    }

    /// Takes an unnamed slot, e.g. for a temporary the lowering needs.
    pub fn reserve(&mut self, desc: &str) -> Result<u16, ScopeError> {
        let slot = self.next_slot;
        self.next_slot = slot
            .checked_add(descriptor::slot_width(desc).max(1))
            .ok_or(ScopeError::SlotOverflow)?;
        Ok(slot)
    }

    /// Raises the high-water mark to at least `end`.
    pub fn ensure(&mut self, end: u16) {
        self.next_slot = self.next_slot.max(end);
    }

    pub fn find(&self, name: &str) -> Option<&Binding> {
        self.frames.iter().rev().flat_map(|f| f.iter().rev()).find(|b| b.name == name)
    }

    pub fn find_slot(&self, slot: u16) -> Option<&Binding> {
        self.frames.iter().rev().flat_map(|f| f.iter().rev()).find(|b| b.slot == slot)
    }

    pub fn enter(&mut self) {
        self.frames.push(Vec::new());
    }

    pub fn exit(&mut self) {
        if self.frames.len() > 1 {
            self.frames.pop();
        }
    }

    /// First slot no binding has ever used.
    pub fn next_slot(&self) -> u16 {
        self.next_slot
    }

    pub fn max_locals(&self) -> u16 {
        self.next_slot
    }

    fn innermost(&self) -> &[Binding] {
        self.frames.last().map(Vec::as_slice).unwrap_or(&[])
    }

    fn push(&mut self, binding: Binding) {
        match self.frames.last_mut() {
            Some(frame) => frame.push(binding),
            None => self.frames.push(vec![binding]),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LabelEntry<L> {
    pub label: L,
    pub defined: bool,
    pub referenced: bool,
}

/// Maps label keys of one addressing mode to labels of another.
///
/// A key may be jumped to before it is defined, but defined only once.
#[derive(Clone, Debug)]
pub struct LabelRegistry<K, L> {
    entries: HashMap<K, LabelEntry<L>>,
    order: Vec<K>,
}

impl<K, L> Default for LabelRegistry<K, L> {
    fn default() -> Self {
        LabelRegistry {
            entries: HashMap::new(),
            order: Vec::new(),
        }
    }
}

impl<K: Clone + Eq + Hash + Display, L: Copy> LabelRegistry<K, L> {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&mut self, key: &K, alloc: impl FnOnce() -> L) -> &mut LabelEntry<L> {
        if !self.entries.contains_key(key) {
            self.order.push(key.clone());
        }
        self.entries.entry(key.clone()).or_insert_with(|| LabelEntry {
            label: alloc(),
            defined: false,
            referenced: false,
        })
    }

    /// Records a jump to `key`.
    pub fn reference(&mut self, key: &K, alloc: impl FnOnce() -> L) -> L {
        let entry = self.entry(key, alloc);
        entry.referenced = true;
        entry.label
    }

    /// Records the position of `key`; a second definition is an error.
    pub fn define(&mut self, key: &K, alloc: impl FnOnce() -> L) -> Result<L, ScopeError> {
        let entry = self.entry(key, alloc);
        if entry.defined {
            return Err(ScopeError::LabelMarkedTwice { label: key.to_string() });
        }
        entry.defined = true;
        Ok(entry.label)
    }

    pub fn get(&self, key: &K) -> Option<&LabelEntry<L>> {
        self.entries.get(key)
    }

    pub fn is_referenced(&self, key: &K) -> bool {
        self.entries.get(key).is_some_and(|e| e.referenced)
    }

    /// Fails on the first key that was jumped to but never defined.
    pub fn verify(&self) -> Result<(), ScopeError> {
        for key in &self.order {
            if let Some(entry) = self.entries.get(key) {
                if entry.referenced && !entry.defined {
                    return Err(ScopeError::UndefinedLabel { label: key.to_string() });
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(list: &[(&str, &str)]) -> Vec<(String, String)> {
        list.iter().map(|(n, d)| (n.to_string(), d.to_string())).collect()
    }

    #[test]
    fn parameters_follow_the_receiver() {
        let scope = VarScope::for_method(false, &params(&[("a", "J"), ("b", "I")])).unwrap();
        assert_eq!(scope.find("a").map(|b| b.slot), Some(1));
        assert_eq!(scope.find("b").map(|b| b.slot), Some(3));
        assert_eq!(scope.max_locals(), 4);

        let scope = VarScope::for_method(true, &params(&[("a", "I")])).unwrap();
        assert_eq!(scope.find("a").map(|b| b.slot), Some(0));
    }

    #[test]
    fn child_scopes_shadow_and_keep_high_water() {
        let mut scope = VarScope::for_method(true, &[]).unwrap();
        scope.declare("x", "I").unwrap();
        scope.enter();
        let inner = scope.declare("x", "D").unwrap();
        assert_eq!(scope.find("x").map(|b| b.descriptor.as_str()), Some("D"));
        assert_eq!(scope.find_slot(inner).map(|b| b.name.as_str()), Some("x"));
        scope.exit();
        assert_eq!(scope.find("x").map(|b| b.slot), Some(0));
        assert_eq!(scope.max_locals(), 3);
        assert_eq!(scope.declare("y", "I").unwrap(), 3);
    }

    #[test]
    fn duplicate_in_same_scope_fails() {
        let mut scope = VarScope::new();
        scope.declare("x", "I").unwrap();
        assert_eq!(
            scope.declare("x", "I"),
            Err(ScopeError::DuplicateVariable { name: "x".into() })
        );
    }

    #[test]
    fn registry_allows_forward_jumps_and_rejects_double_marks() {
        let mut next = 0u32;
        let mut alloc = || {
            next += 1;
            next
        };
        let mut registry: LabelRegistry<String, u32> = LabelRegistry::new();
        let jump = registry.reference(&"exit".to_string(), &mut alloc);
        assert!(registry.verify().is_err());
        let mark = registry.define(&"exit".to_string(), &mut alloc).unwrap();
        assert_eq!(jump, mark);
        assert!(registry.verify().is_ok());
        assert_eq!(
            registry.define(&"exit".to_string(), &mut alloc),
            Err(ScopeError::LabelMarkedTwice { label: "exit".into() })
        );
        registry.define(&"unused".to_string(), &mut alloc).unwrap();
        assert!(!registry.is_referenced(&"unused".to_string()));
        assert!(registry.verify().is_ok());
    }
}
