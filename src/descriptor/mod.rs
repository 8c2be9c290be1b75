//! JVM type descriptors: parsing, classification and the operator rules.
//!
//! Types travel through the tree as canonical descriptor strings (`I`,
//! `Ljava/lang/String;`, `[J`, ...) and are compared by string equality.
//! [`JvmType`] is the parsed form, used where the structure matters.

pub mod rules;

pub use rules::{
    arithmetic_result_type, bitwise_result_type, compare_result_type, logical_result_type,
    shift_result_type,
};

pub const BOOLEAN: &str = "Z";
pub const BYTE: &str = "B";
pub const CHAR: &str = "C";
pub const SHORT: &str = "S";
pub const INT: &str = "I";
pub const LONG: &str = "J";
pub const FLOAT: &str = "F";
pub const DOUBLE: &str = "D";
pub const VOID: &str = "V";
pub const OBJECT: &str = "Ljava/lang/Object;";
pub const STRING: &str = "Ljava/lang/String;";
pub const CLASS: &str = "Ljava/lang/Class;";
pub const THROWABLE: &str = "Ljava/lang/Throwable;";

/// Represents a JVM type from a descriptor string.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum JvmType {
    Int,
    Long,
    Float,
    Double,
    Byte,
    Char,
    Short,
    Boolean,
    Void,
    Reference(String),
    Array(Box<JvmType>),
}

impl JvmType {
    /// Returns true if this type occupies two local/stack slots.
    pub fn is_wide(&self) -> bool {
        matches!(self, JvmType::Long | JvmType::Double)
    }

    pub fn is_reference(&self) -> bool {
        matches!(self, JvmType::Reference(_) | JvmType::Array(_))
    }

    /// Returns the descriptor string for this type.
    pub fn to_descriptor(&self) -> String {
        match self {
            JvmType::Int => INT.into(),
            JvmType::Long => LONG.into(),
            JvmType::Float => FLOAT.into(),
            JvmType::Double => DOUBLE.into(),
            JvmType::Byte => BYTE.into(),
            JvmType::Char => CHAR.into(),
            JvmType::Short => SHORT.into(),
            JvmType::Boolean => BOOLEAN.into(),
            JvmType::Void => VOID.into(),
            JvmType::Reference(name) => format!("L{};", name),
            JvmType::Array(inner) => format!("[{}", inner.to_descriptor()),
        }
    }

    /// Source-level spelling, used by the tree renderer.
    pub fn source_name(&self) -> String {
        match self {
            JvmType::Int => "int".into(),
            JvmType::Long => "long".into(),
            JvmType::Float => "float".into(),
            JvmType::Double => "double".into(),
            JvmType::Byte => "byte".into(),
            JvmType::Char => "char".into(),
            JvmType::Short => "short".into(),
            JvmType::Boolean => "boolean".into(),
            JvmType::Void => "void".into(),
            JvmType::Reference(name) => name.replace('/', "."),
            JvmType::Array(inner) => format!("{}[]", inner.source_name()),
        }
    }
}

/// Parse a single type descriptor starting at position `pos` in `desc`.
/// Returns (JvmType, next_position).
pub fn parse_type_at(desc: &str, pos: usize) -> Option<(JvmType, usize)> {
    let bytes = desc.as_bytes();
    match *bytes.get(pos)? {
        b'B' => Some((JvmType::Byte, pos + 1)),
        b'C' => Some((JvmType::Char, pos + 1)),
        b'D' => Some((JvmType::Double, pos + 1)),
        b'F' => Some((JvmType::Float, pos + 1)),
        b'I' => Some((JvmType::Int, pos + 1)),
        b'J' => Some((JvmType::Long, pos + 1)),
        b'S' => Some((JvmType::Short, pos + 1)),
        b'Z' => Some((JvmType::Boolean, pos + 1)),
        b'V' => Some((JvmType::Void, pos + 1)),
        b'L' => {
            let semi = desc[pos + 1..].find(';')?;
            let class_name = &desc[pos + 1..pos + 1 + semi];
            if class_name.is_empty() {
                return None;
            }
            Some((JvmType::Reference(class_name.to_string()), pos + semi + 2))
        }
        b'[' => {
            let (inner, next) = parse_type_at(desc, pos + 1)?;
            if inner == JvmType::Void {
                return None;
            }
            Some((JvmType::Array(Box::new(inner)), next))
        }
        _ => None,
    }
}

/// Parse a complete field descriptor; trailing characters are rejected.
pub fn parse_field_descriptor(desc: &str) -> Option<JvmType> {
    match parse_type_at(desc, 0)? {
        (ty, end) if end == desc.len() => Some(ty),
        _ => None,
    }
}

/// Parse a method descriptor, e.g. "(II)V" -> ([Int, Int], Void)
pub fn parse_method_descriptor(desc: &str) -> Option<(Vec<JvmType>, JvmType)> {
    if !desc.starts_with('(') {
        return None;
    }
    let close = desc.find(')')?;
    let mut params = Vec::new();
    let mut pos = 1;
    while pos < close {
        let (ty, next) = parse_type_at(desc, pos)?;
        if ty == JvmType::Void {
            return None;
        }
        params.push(ty);
        pos = next;
    }
    let (ret, end) = parse_type_at(desc, close + 1)?;
    (end == desc.len()).then_some((params, ret))
}

/// Parameter descriptors of a method descriptor, as strings.
pub fn parameter_descriptors(desc: &str) -> Option<Vec<String>> {
    let (params, _) = parse_method_descriptor(desc)?;
    Some(params.iter().map(JvmType::to_descriptor).collect())
}

/// Return descriptor of a method descriptor.
pub fn return_descriptor(desc: &str) -> Option<String> {
    let (_, ret) = parse_method_descriptor(desc)?;
    Some(ret.to_descriptor())
}

/// Build a method descriptor from parameter and return descriptors.
pub fn method_descriptor<S: AsRef<str>>(params: &[S], ret: &str) -> String {
    let mut desc = String::from("(");
    for p in params {
        desc.push_str(p.as_ref());
    }
    desc.push(')');
    desc.push_str(ret);
    desc
}

/// Number of local/stack slots a value of this descriptor occupies.
pub fn slot_width(desc: &str) -> u16 {
    match desc {
        LONG | DOUBLE => 2,
        VOID => 0,
        _ => 1,
    }
}

/// Z, B, C, S and I values are all held as `int` by the machine.
pub fn is_int_like(desc: &str) -> bool {
    matches!(desc, BOOLEAN | BYTE | CHAR | SHORT | INT)
}

pub fn is_reference(desc: &str) -> bool {
    desc.starts_with('L') || desc.starts_with('[')
}

pub fn is_numeric(desc: &str) -> bool {
    matches!(desc, BYTE | CHAR | SHORT | INT | LONG | FLOAT | DOUBLE)
}

/// `java/lang/String` -> `Ljava/lang/String;`. Array names are already descriptors.
pub fn descriptor_of_internal_name(name: &str) -> String {
    if name.starts_with('[') {
        name.to_string()
    } else {
        format!("L{};", name)
    }
}

/// `Ljava/lang/String;` -> `java/lang/String`; arrays keep their descriptor form,
/// which is how `checkcast`/`anewarray` name them.
pub fn internal_name_of_descriptor(desc: &str) -> Option<String> {
    if desc.starts_with('[') {
        return parse_field_descriptor(desc).map(|_| desc.to_string());
    }
    match parse_field_descriptor(desc)? {
        JvmType::Reference(name) => Some(name),
        _ => None,
    }
}

/// Source-level spelling of a descriptor, falling back to the raw text.
pub fn source_name(desc: &str) -> String {
    parse_field_descriptor(desc)
        .map(|ty| ty.source_name())
        .unwrap_or_else(|| desc.to_string())
}

/// The machine's value categories: what a load, store or return moves.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Int,
    Long,
    Float,
    Double,
    Reference,
}

impl ValueKind {
    /// `None` for `V` and malformed descriptors.
    pub fn of(desc: &str) -> Option<ValueKind> {
        match desc {
            _ if is_int_like(desc) => Some(ValueKind::Int),
            LONG => Some(ValueKind::Long),
            FLOAT => Some(ValueKind::Float),
            DOUBLE => Some(ValueKind::Double),
            _ if is_reference(desc) => Some(ValueKind::Reference),
            _ => None,
        }
    }

    /// The descriptor a value of this kind is assumed to have when nothing better is known.
    pub fn default_descriptor(self) -> &'static str {
        match self {
            ValueKind::Int => INT,
            ValueKind::Long => LONG,
            ValueKind::Float => FLOAT,
            ValueKind::Double => DOUBLE,
            ValueKind::Reference => OBJECT,
        }
    }

    pub fn is_wide(self) -> bool {
        matches!(self, ValueKind::Long | ValueKind::Double)
    }

    /// Instruction mnemonic prefix (`i`, `l`, `f`, `d`, `a`).
    pub fn prefix(self) -> char {
        match self {
            ValueKind::Int => 'i',
            ValueKind::Long => 'l',
            ValueKind::Float => 'f',
            ValueKind::Double => 'd',
            ValueKind::Reference => 'a',
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_primitives() {
        assert_eq!(parse_field_descriptor("I"), Some(JvmType::Int));
        assert_eq!(parse_field_descriptor("J"), Some(JvmType::Long));
        assert_eq!(parse_field_descriptor("Z"), Some(JvmType::Boolean));
        assert_eq!(parse_field_descriptor("II"), None);
        assert_eq!(parse_field_descriptor("[V"), None);
    }

    #[test]
    fn test_parse_reference_and_array() {
        assert_eq!(
            parse_field_descriptor("[[Ljava/lang/Object;"),
            Some(JvmType::Array(Box::new(JvmType::Array(Box::new(
                JvmType::Reference("java/lang/Object".into())
            )))))
        );
        assert_eq!(parse_field_descriptor("L;"), None);
    }

    #[test]
    fn test_parse_method_descriptor() {
        let (params, ret) = parse_method_descriptor("(Ljava/lang/String;JI)[B").unwrap();
        assert_eq!(
            params,
            vec![JvmType::Reference("java/lang/String".into()), JvmType::Long, JvmType::Int]
        );
        assert_eq!(ret, JvmType::Array(Box::new(JvmType::Byte)));
        assert!(parse_method_descriptor("(V)V").is_none());
        assert!(parse_method_descriptor("()VX").is_none());
        assert_eq!(method_descriptor(&["I", "J"], "V"), "(IJ)V");
    }

    #[test]
    fn test_internal_names() {
        assert_eq!(descriptor_of_internal_name("java/lang/String"), STRING);
        assert_eq!(descriptor_of_internal_name("[I"), "[I");
        assert_eq!(internal_name_of_descriptor(STRING).as_deref(), Some("java/lang/String"));
        assert_eq!(internal_name_of_descriptor("[[I").as_deref(), Some("[[I"));
        assert_eq!(internal_name_of_descriptor("I"), None);
    }

    #[test]
    fn test_value_kind() {
        assert_eq!(ValueKind::of("C"), Some(ValueKind::Int));
        assert_eq!(ValueKind::of("[I"), Some(ValueKind::Reference));
        assert_eq!(ValueKind::of("V"), None);
        assert_eq!(slot_width("D"), 2);
        assert_eq!(source_name("[Ljava/lang/String;"), "java.lang.String[]");
    }
}
