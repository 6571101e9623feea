use jdescriptor::{MethodDescriptor, TypeDescriptor};

use crate::classset::ClassSet;
use crate::descriptor::{class_operand, newarray_code, return_opcode};
use crate::ident::Ident;
use crate::ir::{Code, Constant, Insn, LabelId, MethodId, TryCatch};
use crate::opcodes;
use crate::scope::{MemberKey, Scope};
use crate::types::{mapped_class_name, mapped_method_descriptor, mapped_type};

use super::{LabelRef, Operand, PatchOp};

/// Facts needed to turn a pattern into a concrete instruction.
pub(crate) struct SynthContext<'a> {
    pub(crate) classes: &'a ClassSet,
    pub(crate) body: MethodId,
    pub(crate) descriptor: &'a MethodDescriptor,
}

/// Build the concrete instruction for an added pattern line. Weak labels
/// that are not bound yet get a fresh label in `code`.
pub(crate) fn synthesize(
    cx: &SynthContext<'_>,
    scope: &mut Scope,
    code: &mut Code,
    op: &PatchOp,
) -> Result<Insn, String> {
    let insn = match op {
        PatchOp::Any | PatchOp::TryCatch { .. } => {
            return Err("not a concrete instruction".to_string());
        }
        PatchOp::Label(label) => Insn::Label(label_for(cx, scope, code, label)?),
        PatchOp::Single(opcode) => Insn::Simple(*opcode),
        PatchOp::Return => Insn::Simple(return_opcode(cx.descriptor)),
        PatchOp::PushInt(value) => Insn::Push(Constant::Int(*concrete(value)?)),
        PatchOp::PushLong(value) => Insn::Push(Constant::Long(*concrete(value)?)),
        PatchOp::PushFloat(value) => Insn::Push(Constant::Float(*concrete(value)?)),
        PatchOp::PushDouble(value) => Insn::Push(Constant::Double(*concrete(value)?)),
        PatchOp::PushString(value) => Insn::Push(Constant::String(concrete(value)?.clone())),
        PatchOp::PushClass(value) => {
            let ty = mapped_type(cx.classes, scope, concrete(value)?)?;
            Insn::Push(Constant::Class(class_operand(&ty)))
        }
        PatchOp::Var { opcode, index } => Insn::Var {
            opcode: *opcode,
            index: *concrete(index)?,
        },
        PatchOp::IncInt { index, delta } => Insn::Iinc {
            index: *concrete(index)?,
            delta: *concrete(delta)?,
        },
        PatchOp::Jump { opcode, target } => Insn::Jump {
            opcode: *opcode,
            target: label_for(cx, scope, code, target)?,
        },
        PatchOp::TableSwitch {
            low,
            high,
            default,
            targets,
        } => Insn::TableSwitch {
            low: *concrete(low)?,
            high: *concrete(high)?,
            default: label_for(cx, scope, code, default)?,
            targets: targets
                .iter()
                .map(|target| label_for(cx, scope, code, target))
                .collect::<Result<_, _>>()?,
        },
        PatchOp::LookupSwitch { default, cases } => Insn::LookupSwitch {
            default: label_for(cx, scope, code, default)?,
            pairs: cases
                .iter()
                .map(|(key, target)| Ok((*concrete(key)?, label_for(cx, scope, code, target)?)))
                .collect::<Result<_, String>>()?,
        },
        PatchOp::Field {
            opcode,
            owner,
            name,
            descriptor,
            raw_descriptor,
        } => {
            let owner_name = mapped_class_name(cx.classes, scope, &owner.to_string())?;
            let key = MemberKey::new(name, raw_descriptor);
            let real_name = cx
                .classes
                .find(&owner_name)
                .and_then(|owner| scope.field(cx.classes, owner, &key))
                .map(|field| cx.classes.field(field).name.clone());
            Insn::Field {
                opcode: *opcode,
                owner: owner_name,
                name: member_name(name, real_name),
                descriptor: mapped_type(cx.classes, scope, descriptor)?.to_string(),
            }
        }
        PatchOp::Invoke {
            opcode,
            owner,
            name,
            descriptor,
            raw_descriptor,
        } => {
            let owner_name = mapped_class_name(cx.classes, scope, &owner.to_string())?;
            let owner_id = cx.classes.find(&owner_name);
            let key = MemberKey::new(name, raw_descriptor);
            let real_name = owner_id
                .and_then(|owner| scope.method(cx.classes, owner, &key))
                .map(|method| cx.classes.method(method).name.clone());
            let interface = *opcode == opcodes::INVOKEINTERFACE
                || owner_id.is_some_and(|owner| cx.classes.class(owner).is_interface());
            Insn::Invoke {
                opcode: *opcode,
                owner: owner_name,
                name: member_name(name, real_name),
                descriptor: mapped_method_descriptor(cx.classes, scope, descriptor)?,
                interface,
            }
        }
        PatchOp::Type { opcode, class } => {
            let ty = mapped_type(cx.classes, scope, concrete(class)?)?;
            Insn::Type {
                opcode: *opcode,
                class: class_operand(&ty),
            }
        }
        PatchOp::NewArray(element) => {
            let ty = concrete(element)?;
            match newarray_code(ty) {
                Some(code) => Insn::NewArray(code),
                None => Insn::Type {
                    opcode: opcodes::ANEWARRAY,
                    class: class_operand(&mapped_type(cx.classes, scope, ty)?),
                },
            }
        }
        PatchOp::NewArrayMulti { descriptor, dims } => {
            let ty = mapped_type(cx.classes, scope, concrete(descriptor)?)?;
            if !matches!(ty, TypeDescriptor::Array(_, _)) {
                return Err(format!("new-array-multi needs an array type, found {ty}"));
            }
            Insn::MultiNewArray {
                descriptor: ty.to_string(),
                dims: *concrete(dims)?,
            }
        }
    };
    Ok(insn)
}

/// Build the exception region for an added `try-catch` line.
pub(crate) fn synthesize_try_catch(
    cx: &SynthContext<'_>,
    scope: &mut Scope,
    code: &mut Code,
    op: &PatchOp,
) -> Result<TryCatch, String> {
    let PatchOp::TryCatch {
        start,
        end,
        handler,
        catch_type,
    } = op
    else {
        return Err("not a try-catch".to_string());
    };
    let catch_type = match catch_type {
        Some(ty) => Some(class_operand(&mapped_type(cx.classes, scope, ty)?)),
        None => None,
    };
    Ok(TryCatch {
        start: label_for(cx, scope, code, start)?,
        end: label_for(cx, scope, code, end)?,
        handler: label_for(cx, scope, code, handler)?,
        catch_type,
    })
}

fn label_for(
    cx: &SynthContext<'_>,
    scope: &mut Scope,
    code: &mut Code,
    label: &LabelRef,
) -> Result<LabelId, String> {
    let LabelRef::Weak(name) = label else {
        return Err("wildcard label cannot be added".to_string());
    };
    if let Some(bound) = scope.label(cx.body, name) {
        return Ok(bound);
    }
    let fresh = code.new_label();
    if !scope.bind_label(cx.body, name, fresh) {
        return Err(format!("label ~{name} cannot be bound"));
    }
    Ok(fresh)
}

fn concrete<T>(operand: &Operand<T>) -> Result<&T, String> {
    operand
        .value()
        .ok_or_else(|| "wildcard operand cannot be added".to_string())
}

/// Weak member names that were never bound fall back to the text after `~`.
fn member_name(name: &Ident, bound: Option<String>) -> String {
    if name.weak {
        bound.unwrap_or_else(|| name.name.clone())
    } else {
        name.name.clone()
    }
}
