//! Numeric promotion and operand compatibility for the tree's operators.
//!
//! Every function answers `None` for an incompatible pair; callers turn that
//! into an error naming the operator and both descriptors.

use super::{BOOLEAN, BYTE, DOUBLE, FLOAT, INT, LONG, SHORT};

/// Position of a descriptor in the byte < short < int lattice.
fn int_rank(desc: &str) -> Option<u8> {
    match desc {
        BYTE => Some(0),
        SHORT => Some(1),
        INT => Some(2),
        _ => None,
    }
}

fn wider_int(lhs: &str, rhs: &str) -> Option<&'static str> {
    let rank = int_rank(lhs)?.max(int_rank(rhs)?);
    Some([BYTE, SHORT, INT][rank as usize])
}

pub fn arithmetic_result_type(lhs: &str, rhs: &str) -> Option<&'static str> {
    if let Some(ty) = wider_int(lhs, rhs) {
        return Some(ty);
    }
    match (lhs, rhs) {
        (LONG, LONG) => Some(LONG),
        (FLOAT, FLOAT) => Some(FLOAT),
        (DOUBLE, DOUBLE) => Some(DOUBLE),
        _ => None,
    }
}

pub fn shift_result_type(lhs: &str, rhs: &str) -> Option<&'static str> {
    if rhs != INT {
        return None;
    }
    if int_rank(lhs).is_some() {
        Some(INT)
    } else if lhs == LONG {
        Some(LONG)
    } else {
        None
    }
}

pub fn bitwise_result_type(lhs: &str, rhs: &str) -> Option<&'static str> {
    match (int_rank(lhs), int_rank(rhs)) {
        (Some(_), Some(_)) => Some(INT),
        _ if lhs == LONG && rhs == LONG => Some(LONG),
        _ => None,
    }
}

pub fn logical_result_type(lhs: &str, rhs: &str) -> Option<&'static str> {
    (lhs == BOOLEAN && rhs == BOOLEAN).then_some(BOOLEAN)
}

pub fn compare_result_type(lhs: &str, rhs: &str) -> Option<&'static str> {
    if int_rank(lhs).is_some() && int_rank(rhs).is_some() {
        return Some(BOOLEAN);
    }
    (lhs == rhs).then_some(BOOLEAN)
}
