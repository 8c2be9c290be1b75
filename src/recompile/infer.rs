//! Static typing of expressions ahead of emission.

use crate::descriptor::{self, is_int_like, is_reference, BOOLEAN, BYTE, CHAR, DOUBLE, FLOAT, INT, LONG, SHORT};
use crate::dom::{CodeDom, Expr};
use crate::insn::Conversion;

use super::Recompiler;

/// Type of the `null` literal: assignable to every reference type.
pub const NULL_TYPE: &str = "null";

/// Whether a `from` value may be stored where `to` is expected, and the
/// conversion needed if so. `Some(None)` means the value is used as is.
pub fn assignment_conversion(from: &str, to: &str, widen: bool) -> Option<Option<Conversion>> {
    if from == to {
        return Some(None);
    }
    if from == NULL_TYPE {
        return is_reference(to).then_some(None);
    }
    if (is_int_like(from) && is_int_like(to)) || (is_reference(from) && is_reference(to)) {
        return Some(None);
    }
    if !widen {
        return None;
    }
    let conversion = match (from, to) {
        (f, LONG) if is_int_like(f) => Conversion::I2L,
        (f, FLOAT) if is_int_like(f) => Conversion::I2F,
        (f, DOUBLE) if is_int_like(f) => Conversion::I2D,
        (LONG, FLOAT) => Conversion::L2F,
        (LONG, DOUBLE) => Conversion::L2D,
        (FLOAT, DOUBLE) => Conversion::F2D,
        _ => return None,
    };
    Some(Some(conversion))
}

/// Conversions to `int` from any primitive.
fn to_int(from: &str) -> Option<Vec<Conversion>> {
    Some(match from {
        _ if is_int_like(from) => vec![],
        LONG => vec![Conversion::L2I],
        FLOAT => vec![Conversion::F2I],
        DOUBLE => vec![Conversion::D2I],
        _ => return None,
    })
}

/// The instructions for a primitive cast. Casts to `byte`, `char` and
/// `short` always truncate, whatever the source.
pub fn cast_conversions(from: &str, to: &str) -> Option<Vec<Conversion>> {
    let narrowing = |last: Conversion| {
        let mut conversions = to_int(from)?;
        conversions.push(last);
        Some(conversions)
    };
    match to {
        INT => to_int(from),
        BOOLEAN => is_int_like(from).then(Vec::new),
        BYTE => narrowing(Conversion::I2B),
        CHAR => narrowing(Conversion::I2C),
        SHORT => narrowing(Conversion::I2S),
        LONG => Some(match from {
            LONG => vec![],
            FLOAT => vec![Conversion::F2L],
            DOUBLE => vec![Conversion::D2L],
            _ if is_int_like(from) => vec![Conversion::I2L],
            _ => return None,
        }),
        FLOAT => Some(match from {
            FLOAT => vec![],
            LONG => vec![Conversion::L2F],
            DOUBLE => vec![Conversion::D2F],
            _ if is_int_like(from) => vec![Conversion::I2F],
            _ => return None,
        }),
        DOUBLE => Some(match from {
            DOUBLE => vec![],
            LONG => vec![Conversion::L2D],
            FLOAT => vec![Conversion::F2D],
            _ if is_int_like(from) => vec![Conversion::I2D],
            _ => return None,
        }),
        _ => None,
    }
}

/// The common type of two conditional arms, if they have one.
pub(crate) fn unify_arms(then: &str, otherwise: &str) -> Option<String> {
    match (then, otherwise) {
        _ if then == otherwise => Some(then.to_string()),
        (NULL_TYPE, other) | (other, NULL_TYPE) if is_reference(other) => Some(other.to_string()),
        _ => None,
    }
}

impl Recompiler<'_> {
    /// The type `expr` will have once emitted, when it can be told without
    /// emitting it. Variables declared inside expression blocks are not known yet.
    pub(super) fn infer(&self, expr: &Expr) -> Option<String> {
        let ty = match expr {
            Expr::Literal(lit) => lit.descriptor().to_string(),
            Expr::Null => NULL_TYPE.to_string(),
            Expr::Arithmetic { lhs, rhs, .. } => {
                descriptor::arithmetic_result_type(&self.infer(lhs)?, &self.infer(rhs)?)?.to_string()
            }
            Expr::Shift { lhs, rhs, .. } => {
                descriptor::shift_result_type(&self.infer(lhs)?, &self.infer(rhs)?)?.to_string()
            }
            Expr::Bitwise { lhs, rhs, .. } => {
                descriptor::bitwise_result_type(&self.infer(lhs)?, &self.infer(rhs)?)?.to_string()
            }
            Expr::Logical { .. }
            | Expr::Compare { .. }
            | Expr::Identity { .. }
            | Expr::Not(_)
            | Expr::InstanceOf { .. } => BOOLEAN.to_string(),
            Expr::Negate(value) => {
                let ty = self.infer(value)?;
                if is_int_like(&ty) {
                    INT.to_string()
                } else {
                    ty
                }
            }
            Expr::Var(name) => self.scope.find(name)?.descriptor.clone(),
            Expr::Field { ty, .. } | Expr::StaticField { ty, .. } | Expr::Cast { ty, .. } => ty.clone(),
            Expr::This => self.this_desc.clone(),
            Expr::ClassLiteral(_) => descriptor::CLASS.to_string(),
            Expr::ArrayLength(_) => INT.to_string(),
            Expr::Invoke(inv) => descriptor::return_descriptor(&inv.descriptor)?,
            Expr::NewInstance(new) => descriptor::descriptor_of_internal_name(&new.class_name),
            Expr::IfElse { then, otherwise, .. } => unify_arms(&self.infer(then)?, &self.infer(otherwise)?)?,
            Expr::Block(members) => {
                let mut value = members.iter().filter_map(|m| match m {
                    CodeDom::Expr(e) => Some(e),
                    CodeDom::Stmt(_) => None,
                });
                self.infer(value.next()?)?
            }
            Expr::Top { value, usage } => {
                let ty = self.infer(value)?;
                self.infer(&usage.apply(Expr::Dup(ty.clone()), Expr::LetBe(ty)))?
            }
            Expr::Dup(ty) | Expr::LetBe(ty) => ty.clone(),
            Expr::SpliceOriginal => self.return_desc.clone(),
        };
        Some(ty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{OBJECT, STRING};

    #[test]
    fn assignment_accepts_int_family_and_widening() {
        assert_eq!(assignment_conversion(CHAR, INT, true), Some(None));
        assert_eq!(assignment_conversion(INT, BYTE, true), Some(None));
        assert_eq!(assignment_conversion(SHORT, LONG, true), Some(Some(Conversion::I2L)));
        assert_eq!(assignment_conversion(FLOAT, DOUBLE, true), Some(Some(Conversion::F2D)));
        assert_eq!(assignment_conversion(FLOAT, DOUBLE, false), None);
        assert_eq!(assignment_conversion(DOUBLE, FLOAT, true), None);
        assert_eq!(assignment_conversion(NULL_TYPE, STRING, true), Some(None));
        assert_eq!(assignment_conversion(NULL_TYPE, INT, true), None);
        assert_eq!(assignment_conversion(STRING, OBJECT, false), Some(None));
        assert_eq!(assignment_conversion(INT, OBJECT, true), None);
    }

    #[test]
    fn narrowing_casts_always_truncate() {
        assert_eq!(cast_conversions(INT, BYTE), Some(vec![Conversion::I2B]));
        assert_eq!(cast_conversions(BYTE, BYTE), Some(vec![Conversion::I2B]));
        assert_eq!(cast_conversions(DOUBLE, CHAR), Some(vec![Conversion::D2I, Conversion::I2C]));
        assert_eq!(cast_conversions(CHAR, INT), Some(vec![]));
        assert_eq!(cast_conversions(LONG, FLOAT), Some(vec![Conversion::L2F]));
        assert_eq!(cast_conversions(DOUBLE, BOOLEAN), None);
        assert_eq!(cast_conversions(STRING, INT), None);
    }

    #[test]
    fn arms_unify_through_null() {
        assert_eq!(unify_arms(INT, INT).as_deref(), Some(INT));
        assert_eq!(unify_arms(NULL_TYPE, STRING).as_deref(), Some(STRING));
        assert_eq!(unify_arms(STRING, NULL_TYPE).as_deref(), Some(STRING));
        assert_eq!(unify_arms(INT, LONG), None);
        assert_eq!(unify_arms(NULL_TYPE, INT), None);
    }
}
