use jdescriptor::{MethodDescriptor, TypeDescriptor};

use crate::classset::ClassSet;
use crate::descriptor::{newarray_code, parse_method, parse_object_type, parse_type, return_opcode};
use crate::ident::Ident;
use crate::ir::{Code, Constant, Insn, LabelId, MethodId};
use crate::opcodes;
use crate::scope::{MemberKey, Scope};
use crate::types::{check_class_name, check_method_types, check_type};

use super::{LabelRef, Operand, PatchOp};

/// Read-only facts about the method body being matched.
pub(crate) struct MatchContext<'a> {
    pub(crate) classes: &'a ClassSet,
    /// Body whose labels the pattern names refer to.
    pub(crate) body: MethodId,
    /// Real descriptor of the method, used by `return`.
    pub(crate) descriptor: &'a MethodDescriptor,
}

/// Match one pattern against one real instruction, binding weak names into
/// `scope` on success. On failure the scope may hold partial bindings and
/// must be discarded by the caller.
pub(crate) fn matches(cx: &MatchContext<'_>, scope: &mut Scope, op: &PatchOp, insn: &Insn) -> bool {
    match (op, insn) {
        (PatchOp::Label(pattern), Insn::Label(label)) => {
            check_or_set_label(scope, cx.body, pattern, *label)
        }
        (PatchOp::Single(expected), Insn::Simple(opcode)) => expected == opcode,
        (PatchOp::Return, Insn::Simple(opcode)) => *opcode == return_opcode(cx.descriptor),
        (PatchOp::PushInt(value), Insn::Push(Constant::Int(actual))) => value.accepts(actual),
        (PatchOp::PushLong(value), Insn::Push(Constant::Long(actual))) => value.accepts(actual),
        (PatchOp::PushFloat(value), Insn::Push(Constant::Float(actual))) => match value {
            Operand::Any => true,
            Operand::Is(expected) => expected.to_bits() == actual.to_bits(),
        },
        (PatchOp::PushDouble(value), Insn::Push(Constant::Double(actual))) => match value {
            Operand::Any => true,
            Operand::Is(expected) => expected.to_bits() == actual.to_bits(),
        },
        (PatchOp::PushString(value), Insn::Push(Constant::String(actual))) => value.accepts(actual),
        (PatchOp::PushClass(value), Insn::Push(Constant::Class(class))) => {
            check_class_operand(cx, scope, value, class)
        }
        (
            PatchOp::Var { opcode, index },
            Insn::Var {
                opcode: actual,
                index: actual_index,
            },
        ) => opcode == actual && index.accepts(actual_index),
        (PatchOp::IncInt { index, delta }, Insn::Iinc {
            index: actual_index,
            delta: actual_delta,
        }) => index.accepts(actual_index) && delta.accepts(actual_delta),
        (PatchOp::Jump { opcode, target }, Insn::Jump {
            opcode: actual,
            target: label,
        }) => opcode == actual && check_or_set_label(scope, cx.body, target, *label),
        (
            PatchOp::TableSwitch {
                low,
                high,
                default,
                targets,
            },
            Insn::TableSwitch {
                low: actual_low,
                high: actual_high,
                default: actual_default,
                targets: actual_targets,
            },
        ) => {
            low.accepts(actual_low)
                && high.accepts(actual_high)
                && actual_targets.len() >= targets.len()
                && check_or_set_label(scope, cx.body, default, *actual_default)
                && targets
                    .iter()
                    .zip(actual_targets)
                    .all(|(pattern, label)| check_or_set_label(scope, cx.body, pattern, *label))
        }
        (
            PatchOp::LookupSwitch { default, cases },
            Insn::LookupSwitch {
                default: actual_default,
                pairs,
            },
        ) => {
            pairs.len() >= cases.len()
                && check_or_set_label(scope, cx.body, default, *actual_default)
                && cases.iter().zip(pairs).all(|((key, pattern), (actual, label))| {
                    key.accepts(actual) && check_or_set_label(scope, cx.body, pattern, *label)
                })
        }
        (
            PatchOp::Field {
                opcode,
                owner,
                name,
                descriptor,
                raw_descriptor,
            },
            Insn::Field {
                opcode: actual,
                owner: actual_owner,
                name: actual_name,
                descriptor: actual_descriptor,
            },
        ) => {
            opcode == actual
                && check_owner(cx, scope, owner, actual_owner)
                && check_field_name(
                    cx,
                    scope,
                    name,
                    raw_descriptor,
                    actual_owner,
                    actual_name,
                    actual_descriptor,
                )
                && parse_type(actual_descriptor)
                    .is_ok_and(|real| check_type(cx.classes, scope, descriptor, &real).accepted())
        }
        (
            PatchOp::Invoke {
                opcode,
                owner,
                name,
                descriptor,
                raw_descriptor,
            },
            Insn::Invoke {
                opcode: actual,
                owner: actual_owner,
                name: actual_name,
                descriptor: actual_descriptor,
                ..
            },
        ) => {
            opcode == actual
                && check_owner(cx, scope, owner, actual_owner)
                && check_method_name(
                    cx,
                    scope,
                    name,
                    raw_descriptor,
                    actual_owner,
                    actual_name,
                    actual_descriptor,
                )
                && parse_method(actual_descriptor).is_ok_and(|real| {
                    check_method_types(cx.classes, scope, descriptor, &real).is_ok()
                })
        }
        (PatchOp::Type { opcode, class }, Insn::Type {
            opcode: actual,
            class: actual_class,
        }) => opcode == actual && check_class_operand(cx, scope, class, actual_class),
        (PatchOp::NewArray(element), Insn::Type {
            opcode: opcodes::ANEWARRAY,
            class,
        }) => match element {
            Operand::Any => true,
            Operand::Is(ty @ (TypeDescriptor::Object(_) | TypeDescriptor::Array(_, _))) => {
                parse_object_type(class)
                    .is_ok_and(|real| check_type(cx.classes, scope, ty, &real).accepted())
            }
            Operand::Is(_) => false,
        },
        (PatchOp::NewArray(element), Insn::NewArray(code)) => match element {
            Operand::Any => true,
            Operand::Is(ty) => newarray_code(ty) == Some(*code),
        },
        (PatchOp::NewArrayMulti { descriptor, dims }, Insn::MultiNewArray {
            descriptor: actual,
            dims: actual_dims,
        }) => {
            dims.accepts(actual_dims)
                && match descriptor {
                    Operand::Any => true,
                    Operand::Is(ty) => parse_type(actual)
                        .is_ok_and(|real| check_type(cx.classes, scope, ty, &real).accepted()),
                }
        }
        _ => false,
    }
}

/// Bind a weak label on first sight, then require the same label.
pub(crate) fn check_or_set_label(
    scope: &mut Scope,
    body: MethodId,
    pattern: &LabelRef,
    label: LabelId,
) -> bool {
    match pattern {
        LabelRef::Any => true,
        LabelRef::Weak(name) => scope.bind_label(body, name, label),
    }
}

/// Find the first exception region of `code` that satisfies a `try-catch`
/// pattern, committing its bindings into `scope`.
pub(crate) fn match_try_catch(
    cx: &MatchContext<'_>,
    scope: &mut Scope,
    op: &PatchOp,
    code: &Code,
) -> Option<usize> {
    let PatchOp::TryCatch {
        start,
        end,
        handler,
        catch_type,
    } = op
    else {
        return None;
    };
    code.try_catches.iter().position(|region| {
        let mut trial = scope.clone();
        let types_match = match (catch_type, &region.catch_type) {
            (None, None) => true,
            (Some(pattern), Some(actual)) => {
                let real = TypeDescriptor::Object(actual.clone());
                check_type(cx.classes, &mut trial, pattern, &real).accepted()
            }
            _ => false,
        };
        let accepted = types_match
            && check_or_set_label(&mut trial, cx.body, start, region.start)
            && check_or_set_label(&mut trial, cx.body, end, region.end)
            && check_or_set_label(&mut trial, cx.body, handler, region.handler);
        if accepted {
            *scope = trial;
        }
        accepted
    })
}

fn check_class_operand(
    cx: &MatchContext<'_>,
    scope: &mut Scope,
    pattern: &Operand<TypeDescriptor>,
    class: &str,
) -> bool {
    match pattern {
        Operand::Any => true,
        Operand::Is(ty) => parse_object_type(class)
            .is_ok_and(|real| check_type(cx.classes, scope, ty, &real).accepted()),
    }
}

fn check_owner(cx: &MatchContext<'_>, scope: &mut Scope, owner: &Ident, actual: &str) -> bool {
    check_class_name(cx.classes, scope, &owner.to_string(), actual).accepted()
}

fn check_field_name(
    cx: &MatchContext<'_>,
    scope: &mut Scope,
    name: &Ident,
    raw_descriptor: &str,
    owner: &str,
    actual_name: &str,
    actual_descriptor: &str,
) -> bool {
    if name.is_wildcard() {
        return true;
    }
    if !name.weak {
        return name.name == actual_name;
    }
    let Some(owner) = cx.classes.find(owner) else {
        return false;
    };
    let Some(real) = cx.classes.find_field(owner, actual_name, actual_descriptor) else {
        return false;
    };
    let key = MemberKey::new(name, raw_descriptor);
    match scope.field(cx.classes, owner, &key) {
        Some(bound) => bound == real,
        None => scope.bind_field(cx.classes, owner, &key, real),
    }
}

fn check_method_name(
    cx: &MatchContext<'_>,
    scope: &mut Scope,
    name: &Ident,
    raw_descriptor: &str,
    owner: &str,
    actual_name: &str,
    actual_descriptor: &str,
) -> bool {
    if name.is_wildcard() {
        return true;
    }
    if !name.weak {
        return name.name == actual_name;
    }
    let Some(owner) = cx.classes.find(owner) else {
        return false;
    };
    let Some(real) = cx.classes.find_method(owner, actual_name, actual_descriptor) else {
        return false;
    };
    let key = MemberKey::new(name, raw_descriptor);
    match scope.method(cx.classes, owner, &key) {
        Some(bound) => bound == real,
        None => scope.bind_method(cx.classes, owner, &key, real),
    }
}
