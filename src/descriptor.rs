use std::str::FromStr;

use anyhow::{Context, Result};
use jdescriptor::{MethodDescriptor, TypeDescriptor};

use crate::opcodes;

/// Parse a field type descriptor, rejecting trailing characters.
///
/// Object names are taken verbatim, so patch types such as `L~Player;` and
/// `L*;` parse into `TypeDescriptor::Object("~Player")` and
/// `TypeDescriptor::Object("*")`.
pub(crate) fn parse_type(descriptor: &str) -> Result<TypeDescriptor, String> {
    let parsed = TypeDescriptor::from_str(descriptor).map_err(|err| err.to_string())?;
    let printed = parsed.to_string();
    if printed.len() != descriptor.len() {
        return Err(format!(
            "Extra characters found '{}'",
            &descriptor[printed.len().min(descriptor.len())..]
        ));
    }
    Ok(parsed)
}

/// Parse a method descriptor, rejecting trailing characters.
pub(crate) fn parse_method(descriptor: &str) -> Result<MethodDescriptor, String> {
    let parsed = MethodDescriptor::from_str(descriptor).map_err(|err| err.to_string())?;
    if parsed.parameter_types().contains(&TypeDescriptor::Void) {
        return Err("void parameter type".to_string());
    }
    let printed = parsed.to_string();
    if printed.len() != descriptor.len() {
        return Err(format!(
            "Extra characters found '{}'",
            &descriptor[printed.len().min(descriptor.len())..]
        ));
    }
    Ok(parsed)
}

/// Parse a class operand: an internal name, or an array descriptor when it
/// starts with `[`.
pub(crate) fn parse_object_type(name: &str) -> Result<TypeDescriptor, String> {
    if name.starts_with('[') {
        parse_type(name)
    } else {
        parse_type(&format!("L{name};"))
    }
}

/// Parse a descriptor taken from a loaded class file.
pub(crate) fn method_descriptor(descriptor: &str) -> Result<MethodDescriptor> {
    parse_method(descriptor)
        .map_err(anyhow::Error::msg)
        .with_context(|| format!("parse method descriptor {descriptor}"))
}

/// Operand-stack and local-variable width of a type.
pub(crate) fn slot_size(ty: &TypeDescriptor) -> u16 {
    match ty {
        TypeDescriptor::Void => 0,
        TypeDescriptor::Long | TypeDescriptor::Double => 2,
        _ => 1,
    }
}

/// Local slots taken by the receiver and parameters.
pub(crate) fn parameter_slots(descriptor: &MethodDescriptor, is_static: bool) -> u16 {
    let receiver = if is_static { 0 } else { 1 };
    descriptor
        .parameter_types()
        .iter()
        .map(slot_size)
        .fold(receiver, u16::saturating_add)
}

/// Return opcode implied by a method's return type.
pub(crate) fn return_opcode(descriptor: &MethodDescriptor) -> u8 {
    match descriptor.return_type() {
        TypeDescriptor::Void => opcodes::RETURN,
        TypeDescriptor::Long => opcodes::LRETURN,
        TypeDescriptor::Float => opcodes::FRETURN,
        TypeDescriptor::Double => opcodes::DRETURN,
        TypeDescriptor::Object(_) | TypeDescriptor::Array(_, _) => opcodes::ARETURN,
        TypeDescriptor::Boolean
        | TypeDescriptor::Byte
        | TypeDescriptor::Char
        | TypeDescriptor::Short
        | TypeDescriptor::Integer => opcodes::IRETURN,
    }
}

/// The class operand form of a reference type: the internal name for
/// objects, the full descriptor for arrays.
pub(crate) fn class_operand(ty: &TypeDescriptor) -> String {
    match ty {
        TypeDescriptor::Object(name) => name.clone(),
        other => other.to_string(),
    }
}

/// Type code used by `newarray` for a primitive element type.
pub(crate) fn newarray_code(ty: &TypeDescriptor) -> Option<u8> {
    let code = match ty {
        TypeDescriptor::Boolean => 4,
        TypeDescriptor::Char => 5,
        TypeDescriptor::Float => 6,
        TypeDescriptor::Double => 7,
        TypeDescriptor::Byte => 8,
        TypeDescriptor::Short => 9,
        TypeDescriptor::Integer => 10,
        TypeDescriptor::Long => 11,
        _ => return None,
    };
    Some(code)
}

/// Inverse of [`newarray_code`].
pub(crate) fn newarray_type(code: u8) -> Option<TypeDescriptor> {
    let ty = match code {
        4 => TypeDescriptor::Boolean,
        5 => TypeDescriptor::Char,
        6 => TypeDescriptor::Float,
        7 => TypeDescriptor::Double,
        8 => TypeDescriptor::Byte,
        9 => TypeDescriptor::Short,
        10 => TypeDescriptor::Integer,
        11 => TypeDescriptor::Long,
        _ => return None,
    };
    Some(ty)
}

/// Class names mentioned by a descriptor, innermost array element included.
pub(crate) fn referenced_class_names(ty: &TypeDescriptor, out: &mut Vec<String>) {
    match ty {
        TypeDescriptor::Object(name) => out.push(name.clone()),
        TypeDescriptor::Array(element, _) => referenced_class_names(element, out),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weak_object_names_survive_parsing() {
        let ty = parse_type("[L~Player;").expect("parse");
        assert_eq!(
            ty,
            TypeDescriptor::Array(Box::new(TypeDescriptor::Object("~Player".to_string())), 1)
        );
    }

    #[test]
    fn trailing_characters_are_rejected() {
        let err = parse_type("II").expect_err("trailing");
        assert!(err.contains("Extra characters"), "{err}");
        assert!(parse_method("()VX").is_err());
        assert!(parse_method("(V)V").is_err());
    }

    #[test]
    fn object_operands_wrap_unless_array() {
        assert_eq!(
            parse_object_type("java/lang/String").expect("parse"),
            TypeDescriptor::Object("java/lang/String".to_string())
        );
        assert_eq!(
            parse_object_type("[I").expect("parse"),
            TypeDescriptor::Array(Box::new(TypeDescriptor::Integer), 1)
        );
    }

    #[test]
    fn return_opcode_follows_return_type() {
        let desc = method_descriptor("(IJ)Ljava/lang/String;").expect("desc");
        assert_eq!(return_opcode(&desc), opcodes::ARETURN);
        assert_eq!(parameter_slots(&desc, false), 4);
        assert_eq!(parameter_slots(&desc, true), 3);
        let desc = method_descriptor("()Z").expect("desc");
        assert_eq!(return_opcode(&desc), opcodes::IRETURN);
    }

    #[test]
    fn newarray_codes_round_trip() {
        for code in 4..=11 {
            let ty = newarray_type(code).expect("type");
            assert_eq!(newarray_code(&ty), Some(code));
        }
        assert_eq!(newarray_code(&TypeDescriptor::Object("A".to_string())), None);
    }
}
