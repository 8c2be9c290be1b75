//! The CodeDom tree: statements, expressions, and what can be done with them.

pub mod compare;
pub mod factory;
pub mod render;
pub mod types;
pub mod visit;

pub use compare::LabelContext;
pub use types::*;
pub use visit::Visitor;

use thiserror::Error;

/// Violations of the tree's structural invariants, caught while building nodes.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomError {
    #[error("an expression block must contain exactly one expression, found {found}")]
    BlockExpressionArity { found: usize },
    #[error("conditional arms have different types: {then} and {otherwise}")]
    ArmTypeMismatch { then: String, otherwise: String },
    #[error("{owner}.{name}{descriptor} returns void and cannot be used as a value")]
    VoidInvocation {
        owner: String,
        name: String,
        descriptor: String,
    },
    #[error("invalid method descriptor: {descriptor}")]
    InvalidDescriptor { descriptor: String },
    #[error("{kind:?} invocation of {name} {problem}")]
    InvocationTarget {
        kind: InvokeKind,
        name: String,
        problem: &'static str,
    },
}
