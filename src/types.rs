use jdescriptor::{MethodDescriptor, TypeDescriptor};

use crate::classset::ClassSet;
use crate::scope::Scope;

/// Result of comparing a patch type with a real type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum TypeCheck {
    /// Compatible; the scope was not touched.
    Unchanged,
    /// Compatible after binding at least one weak class name.
    Bound,
    Rejected,
}

impl TypeCheck {
    pub(crate) fn accepted(self) -> bool {
        self != TypeCheck::Rejected
    }

    fn and(self, other: TypeCheck) -> TypeCheck {
        match (self, other) {
            (TypeCheck::Rejected, _) | (_, TypeCheck::Rejected) => TypeCheck::Rejected,
            (TypeCheck::Bound, _) | (_, TypeCheck::Bound) => TypeCheck::Bound,
            _ => TypeCheck::Unchanged,
        }
    }
}

/// Bind-or-check a patch type against a real type.
///
/// Bindings made before a rejection are left in the scope; callers discard
/// the whole scope when the surrounding check fails.
pub(crate) fn check_type(
    classes: &ClassSet,
    scope: &mut Scope,
    patch: &TypeDescriptor,
    real: &TypeDescriptor,
) -> TypeCheck {
    match (patch, real) {
        (TypeDescriptor::Object(pattern), TypeDescriptor::Object(name)) => {
            check_class_name(classes, scope, pattern, name)
        }
        (TypeDescriptor::Array(pattern, patch_dims), TypeDescriptor::Array(element, dims)) => {
            if patch_dims != dims {
                return TypeCheck::Rejected;
            }
            check_type(classes, scope, pattern, element)
        }
        (TypeDescriptor::Object(_) | TypeDescriptor::Array(_, _), _) => TypeCheck::Rejected,
        _ if patch == real => TypeCheck::Unchanged,
        _ => TypeCheck::Rejected,
    }
}

/// Bind-or-check a class name pattern (`*`, `~Weak` or a strong name).
pub(crate) fn check_class_name(
    classes: &ClassSet,
    scope: &mut Scope,
    pattern: &str,
    name: &str,
) -> TypeCheck {
    if pattern == "*" || pattern == "~*" {
        return TypeCheck::Unchanged;
    }
    if !pattern.starts_with('~') {
        return if pattern == name {
            TypeCheck::Unchanged
        } else {
            TypeCheck::Rejected
        };
    }
    if let Some(bound) = scope.class(pattern) {
        return if classes.class(bound).name == name {
            TypeCheck::Unchanged
        } else {
            TypeCheck::Rejected
        };
    }
    match classes.find(name) {
        Some(id) if scope.bind_class(pattern, id) => TypeCheck::Bound,
        _ => TypeCheck::Rejected,
    }
}

/// Argument count, then arguments left to right, then the return type.
pub(crate) fn check_method_types(
    classes: &ClassSet,
    scope: &mut Scope,
    patch: &MethodDescriptor,
    real: &MethodDescriptor,
) -> Result<TypeCheck, String> {
    let patch_params = patch.parameter_types();
    let real_params = real.parameter_types();
    if patch_params.len() != real_params.len() {
        return Err(format!(
            "argument count mismatch {} != {}",
            patch_params.len(),
            real_params.len()
        ));
    }
    let mut outcome = TypeCheck::Unchanged;
    for (pattern, actual) in patch_params.iter().zip(real_params) {
        outcome = outcome.and(check_type(classes, scope, pattern, actual));
        if !outcome.accepted() {
            return Err(format!("type mismatch {pattern} != {actual}"));
        }
    }
    let returned = check_type(classes, scope, patch.return_type(), real.return_type());
    if !returned.accepted() {
        return Err(format!(
            "type mismatch {} != {}",
            patch.return_type(),
            real.return_type()
        ));
    }
    Ok(outcome.and(returned))
}

/// Replace weak class names in a patch type with their bound real names.
pub(crate) fn mapped_type(
    classes: &ClassSet,
    scope: &Scope,
    patch: &TypeDescriptor,
) -> Result<TypeDescriptor, String> {
    match patch {
        TypeDescriptor::Object(name) => Ok(TypeDescriptor::Object(mapped_class_name(
            classes, scope, name,
        )?)),
        TypeDescriptor::Array(element, dims) => Ok(TypeDescriptor::Array(
            Box::new(mapped_type(classes, scope, element)?),
            *dims,
        )),
        other => Ok(other.clone()),
    }
}

pub(crate) fn mapped_class_name(
    classes: &ClassSet,
    scope: &Scope,
    name: &str,
) -> Result<String, String> {
    if !name.starts_with('~') {
        return Ok(name.to_string());
    }
    scope
        .class(name)
        .map(|id| classes.class(id).name.clone())
        .ok_or_else(|| format!("{name} is not bound"))
}

pub(crate) fn mapped_method_descriptor(
    classes: &ClassSet,
    scope: &Scope,
    patch: &MethodDescriptor,
) -> Result<String, String> {
    let mut text = String::from("(");
    for param in patch.parameter_types() {
        text.push_str(&mapped_type(classes, scope, param)?.to_string());
    }
    text.push(')');
    text.push_str(&mapped_type(classes, scope, patch.return_type())?.to_string());
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{parse_method, parse_type};
    use crate::test_harness::ModelBuilder;

    fn ty(text: &str) -> TypeDescriptor {
        parse_type(text).expect("type")
    }

    #[test]
    fn weak_names_bind_then_compare() {
        let mut model = ModelBuilder::new();
        model.class("a/Foo", None);
        model.class("a/Bar", None);
        let classes = model.finish();
        let mut scope = Scope::default();

        let first = check_type(&classes, &mut scope, &ty("L~X;"), &ty("La/Foo;"));
        assert_eq!(first, TypeCheck::Bound);
        let again = check_type(&classes, &mut scope, &ty("L~X;"), &ty("La/Foo;"));
        assert_eq!(again, TypeCheck::Unchanged);
        let other = check_type(&classes, &mut scope, &ty("L~X;"), &ty("La/Bar;"));
        assert_eq!(other, TypeCheck::Rejected);
        let claimed = check_type(&classes, &mut scope, &ty("L~Y;"), &ty("La/Foo;"));
        assert_eq!(claimed, TypeCheck::Rejected);
    }

    #[test]
    fn sorts_and_dimensions_must_agree() {
        let classes = ModelBuilder::new().finish();
        let mut scope = Scope::default();
        assert_eq!(
            check_type(&classes, &mut scope, &ty("I"), &ty("J")),
            TypeCheck::Rejected
        );
        assert_eq!(
            check_type(&classes, &mut scope, &ty("[L*;"), &ty("[[La/Foo;")),
            TypeCheck::Rejected
        );
        assert_eq!(
            check_type(&classes, &mut scope, &ty("L*;"), &ty("[I")),
            TypeCheck::Rejected
        );
        assert_eq!(
            check_type(&classes, &mut scope, &ty("[L*;"), &ty("[La/Foo;")),
            TypeCheck::Unchanged
        );
    }

    #[test]
    fn unknown_classes_cannot_be_bound() {
        let classes = ModelBuilder::new().finish();
        let mut scope = Scope::default();
        assert_eq!(
            check_type(&classes, &mut scope, &ty("L~X;"), &ty("La/Missing;")),
            TypeCheck::Rejected
        );
    }

    #[test]
    fn method_types_bind_left_to_right() {
        let mut model = ModelBuilder::new();
        model.class("a/Foo", None);
        let classes = model.finish();
        let mut scope = Scope::default();
        let patch = parse_method("(L~X;I)L~X;").expect("patch");
        let real = parse_method("(La/Foo;I)La/Foo;").expect("real");
        assert_eq!(
            check_method_types(&classes, &mut scope, &patch, &real),
            Ok(TypeCheck::Bound)
        );
        let short = parse_method("(La/Foo;)V").expect("real");
        assert!(check_method_types(&classes, &mut scope, &patch, &short).is_err());
        assert_eq!(
            mapped_method_descriptor(&classes, &scope, &patch),
            Ok("(La/Foo;I)La/Foo;".to_string())
        );
    }
}
