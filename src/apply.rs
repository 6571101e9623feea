//! Mutation of the model once a scope has been accepted.
//!
//! Added instructions go in at the cursor: right after the last original
//! instruction a pattern matched or removed, in script order, or at the
//! head of the body when nothing was anchored yet.

use std::collections::{BTreeMap, BTreeSet};

use anyhow::{Context, Result};
use jdescriptor::MethodDescriptor;
use tracing::debug;

use crate::classset::ClassSet;
use crate::descriptor::{method_descriptor, parse_method};
use crate::error::PatchError;
use crate::ident::Ident;
use crate::instruction::{MatchContext, PatchOp, SynthContext, matches, synthesize, synthesize_try_catch};
use crate::ir::{
    ACC_ABSTRACT, ACC_ENUM, ACC_INTERFACE, ACC_PRIVATE, ACC_PROTECTED, ACC_PUBLIC, ACC_STATIC,
    ACC_SUPER, Class, ClassId, Code, Field, Insn, Method, MethodId, OBJECT_CLASS,
};
use crate::patch::{ClassKind, Mode, PatchClass, PatchInstruction, PatchMethod, PatchScript};
use crate::resolver::Resolution;
use crate::scope::{MemberKey, Scope};
use crate::types::{mapped_class_name, mapped_method_descriptor, mapped_type};

/// Counts reported after a script has been applied.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct ApplySummary {
    pub(crate) added_classes: usize,
    pub(crate) removed_classes: usize,
    pub(crate) changed_bodies: usize,
}

/// Body still to be built or rewritten once every declaration exists.
enum PendingBody<'p> {
    Added {
        method: MethodId,
        patch: &'p PatchMethod,
    },
    Matched {
        class: ClassId,
        handle: MethodId,
        patch: &'p PatchMethod,
    },
}

/// Apply an accepted resolution to the model. The scope is extended with
/// the names of everything the script adds.
pub(crate) fn apply(
    classes: &mut ClassSet,
    script: &PatchScript,
    resolution: &mut Resolution,
) -> Result<ApplySummary> {
    let mut summary = ApplySummary::default();
    let Resolution { scope, assignment } = resolution;

    for (index, patch) in script.classes.iter().enumerate() {
        if patch.mode != Mode::Add {
            continue;
        }
        let id = add_class(classes, scope, patch)?;
        assignment.classes[index] = Some(id);
        summary.added_classes += 1;
    }

    let mut pending = Vec::new();
    for (index, patch) in script.classes.iter().enumerate() {
        let class = assignment.classes[index]
            .with_context(|| format!("{} was never assigned", patch.describe()))?;
        if patch.mode == Mode::Remove {
            let removed = classes.class_mut(class);
            removed.removed = true;
            removed.modified = true;
            summary.removed_classes += 1;
            continue;
        }
        apply_class_modifiers(classes, scope, patch, class)?;

        for (field_index, field) in patch.fields.iter().enumerate() {
            match field.mode {
                Mode::Match => {}
                Mode::Remove => {
                    let id = assignment.fields[index][field_index]
                        .with_context(|| format!("{} was never assigned", field.describe(patch)))?;
                    classes.remove_field(id);
                    classes.class_mut(class).modified = true;
                }
                Mode::Add => {
                    let key = MemberKey::new(&field.ident, &field.raw_descriptor);
                    let name = scope
                        .field(classes, class, &key)
                        .map(|bound| classes.field(bound).name.clone())
                        .unwrap_or_else(|| field.ident.name.clone());
                    let descriptor = mapped_type(classes, scope, &field.descriptor)
                        .map_err(|err| PatchError::validate(field.line, err))?;
                    let mut access = if field.is_private { ACC_PRIVATE } else { ACC_PUBLIC };
                    if field.is_static {
                        access |= ACC_STATIC;
                    }
                    let id = classes.add_field(class, Field {
                        class,
                        name,
                        descriptor: descriptor.to_string(),
                        access,
                        owners: BTreeSet::new(),
                        hidden: false,
                        value: field.value.clone(),
                    });
                    if field.ident.is_bindable() {
                        scope.bind_field(classes, class, &key, id);
                    }
                    assignment.fields[index][field_index] = Some(id);
                    classes.class_mut(class).modified = true;
                }
            }
        }

        for (method_index, method) in patch.methods.iter().enumerate() {
            match method.mode {
                Mode::Remove => {
                    let handle = assignment.methods[index][method_index]
                        .with_context(|| format!("{} was never assigned", method.describe(patch)))?;
                    let declared = classes.body_of(class, handle).unwrap_or(handle);
                    let owner = classes.method(declared).class;
                    classes.remove_method(declared);
                    classes.class_mut(owner).modified = true;
                }
                Mode::Add => {
                    let id = add_method(classes, scope, class, method)?;
                    assignment.methods[index][method_index] = Some(id);
                    pending.push(PendingBody::Added { method: id, patch: method });
                }
                Mode::Match => {
                    let handle = assignment.methods[index][method_index]
                        .with_context(|| format!("{} was never assigned", method.describe(patch)))?;
                    rewrite_access(classes, handle, method);
                    pending.push(PendingBody::Matched {
                        class,
                        handle,
                        patch: method,
                    });
                }
            }
        }
    }

    for body in pending {
        match body {
            PendingBody::Added { method, patch } => {
                build_added_body(classes, scope, method, patch)?;
            }
            PendingBody::Matched {
                class,
                handle,
                patch,
            } => {
                if rewrite_body(classes, scope, class, handle, patch)? {
                    summary.changed_bodies += 1;
                }
            }
        }
    }
    debug!(?summary, "applied patch script");
    Ok(summary)
}

fn add_class(classes: &mut ClassSet, scope: &mut Scope, patch: &PatchClass) -> Result<ClassId> {
    let name = patch.ident.name.clone();
    if classes.find(&name).is_some() {
        anyhow::bail!("line {}: class {name} already exists", patch.line);
    }
    let access = match patch.kind {
        ClassKind::Class => ACC_PUBLIC | ACC_SUPER,
        ClassKind::Interface => ACC_PUBLIC | ACC_INTERFACE | ACC_ABSTRACT,
        ClassKind::Enum => ACC_PUBLIC | ACC_SUPER | ACC_ENUM,
    };
    let id = classes.add_class(Class::new(name, Some(OBJECT_CLASS.to_string()), access));
    if patch.ident.is_bindable() && !scope.bind_class(&patch.ident.to_string(), id) {
        anyhow::bail!("line {}: {} is already bound", patch.line, patch.ident);
    }
    debug!(class = %classes.class(id).name, "added class");
    Ok(id)
}

fn apply_class_modifiers(
    classes: &mut ClassSet,
    scope: &Scope,
    patch: &PatchClass,
    class: ClassId,
) -> Result<()> {
    for modifier in &patch.supers {
        match modifier.mode {
            Mode::Match => {}
            Mode::Add => {
                let name = mapped_name(classes, scope, &modifier.ident, patch.line)?;
                let target = classes.class_mut(class);
                target.super_name = Some(name);
                target.modified = true;
            }
            Mode::Remove => {
                let current = classes.class(class).super_name.clone();
                let named = modifier.ident.is_wildcard()
                    || current.as_deref()
                        == Some(mapped_name(classes, scope, &modifier.ident, patch.line)?.as_str());
                if named {
                    let target = classes.class_mut(class);
                    target.super_name = Some(OBJECT_CLASS.to_string());
                    target.modified = true;
                }
            }
        }
    }
    for modifier in &patch.interfaces {
        match modifier.mode {
            Mode::Match => {}
            Mode::Add => {
                let name = mapped_name(classes, scope, &modifier.ident, patch.line)?;
                let target = classes.class_mut(class);
                if !target.interfaces.contains(&name) {
                    target.interfaces.push(name);
                }
                target.modified = true;
            }
            Mode::Remove => {
                let name = mapped_name(classes, scope, &modifier.ident, patch.line)?;
                let target = classes.class_mut(class);
                target.interfaces.retain(|interface| *interface != name);
                target.modified = true;
            }
        }
    }
    Ok(())
}

fn mapped_name(classes: &ClassSet, scope: &Scope, ident: &Ident, line: usize) -> Result<String> {
    mapped_class_name(classes, scope, &ident.to_string())
        .map_err(|err| PatchError::validate(line, err).into())
}

fn declared_access(patch: &PatchMethod) -> u16 {
    let visibility = if patch.is_private {
        ACC_PRIVATE
    } else if patch.is_protected {
        ACC_PROTECTED
    } else {
        ACC_PUBLIC
    };
    if patch.is_static {
        visibility | ACC_STATIC
    } else {
        visibility
    }
}

/// Matched methods take the declared modifiers. A method with package
/// visibility stays that way when the script declares no visibility.
fn rewrite_access(classes: &mut ClassSet, handle: MethodId, patch: &PatchMethod) {
    let method = classes.method(handle);
    let mut declared = declared_access(patch);
    let package_private = method.access & (ACC_PUBLIC | ACC_PRIVATE | ACC_PROTECTED) == 0;
    if package_private && declared & ACC_PUBLIC != 0 {
        declared &= !ACC_PUBLIC;
    }
    let mask = ACC_PUBLIC | ACC_PRIVATE | ACC_PROTECTED | ACC_STATIC;
    let access = (method.access & !mask) | declared;
    if access != method.access {
        let owner = method.class;
        classes.method_mut(handle).access = access;
        classes.class_mut(owner).modified = true;
    }
}

fn add_method(
    classes: &mut ClassSet,
    scope: &mut Scope,
    class: ClassId,
    patch: &PatchMethod,
) -> Result<MethodId> {
    let key = MemberKey::new(&patch.ident, &patch.raw_descriptor);
    let descriptor = mapped_method_descriptor(classes, scope, &patch.descriptor)
        .map_err(|err| PatchError::validate(patch.line, err))?;
    let access = declared_access(patch);
    let overridden = if patch.ident.is_bindable() {
        scope.method(classes, class, &key).or_else(|| {
            (access == ACC_PUBLIC)
                .then(|| overridden_binding(classes, scope, class, &key))
                .flatten()
        })
    } else {
        None
    };
    let name = overridden
        .map(|bound| classes.method(bound).name.clone())
        .unwrap_or_else(|| patch.ident.name.clone());

    let id = classes.add_method(class, Method {
        class,
        name,
        descriptor,
        access,
        owners: BTreeSet::new(),
        hidden: false,
        exceptions: Vec::new(),
        code: Some(Code::default()),
    });
    if patch.ident.is_bindable() && overridden.is_none() {
        scope.bind_method(classes, class, &key, id);
    }
    classes.class_mut(class).modified = true;
    debug!(class = %classes.class(class).name, method = %classes.method(id).name, "added method");
    Ok(id)
}

/// A method bound to `key` that is declared by a supertype of `class`.
fn overridden_binding(
    classes: &ClassSet,
    scope: &Scope,
    class: ClassId,
    key: &MemberKey,
) -> Option<MethodId> {
    let ancestors = classes.ancestors(class);
    scope
        .method_bindings()
        .filter(|(_, bound_key)| *bound_key == key)
        .map(|(id, _)| id)
        .find(|id| ancestors.contains(&classes.method(*id).class))
}

fn build_added_body(
    classes: &mut ClassSet,
    scope: &mut Scope,
    method: MethodId,
    patch: &PatchMethod,
) -> Result<()> {
    let descriptor = parse_method(&classes.method(method).descriptor)
        .map_err(|err| PatchError::validate(patch.line, err))?;
    let mut code = Code::default();
    {
        let cx = SynthContext {
            classes,
            body: method,
            descriptor: &descriptor,
        };
        for insn in &patch.instructions {
            if matches!(insn.op, PatchOp::TryCatch { .. }) {
                let region = synthesize_try_catch(&cx, scope, &mut code, &insn.op)
                    .map_err(|err| PatchError::validate(insn.line, err))?;
                code.try_catches.push(region);
            } else {
                let synthesized = synthesize(&cx, scope, &mut code, &insn.op)
                    .map_err(|err| PatchError::validate(insn.line, err))?;
                code.insns.push(synthesized);
            }
        }
    }
    check_labels(&code, patch.line)?;
    classes.method_mut(method).code = Some(code);
    Ok(())
}

/// Re-walk a matched method using the positions the verifier recorded and
/// apply its removals and insertions. Returns whether the body changed.
fn rewrite_body(
    classes: &mut ClassSet,
    scope: &mut Scope,
    class: ClassId,
    handle: MethodId,
    patch: &PatchMethod,
) -> Result<bool> {
    let mutates = patch.instructions.iter().any(|insn| insn.mode != Mode::Match);
    let checked = patch.instructions.iter().any(|insn| insn.mode != Mode::Add);
    if !mutates && !checked {
        return Ok(false);
    }
    let body = classes
        .body_of(class, handle)
        .with_context(|| format!("{} has no body", classes.method(handle).name))?;
    let method = classes.method(body);
    let descriptor: MethodDescriptor = method_descriptor(&method.descriptor)?;
    let Some(original) = method.code.clone() else {
        anyhow::bail!("{}{} has no code", method.name, method.descriptor);
    };
    let matched = scope.method_match(body).cloned().unwrap_or_default();
    let consistency = |detail: String| PatchError::InternalConsistency {
        class: classes.class(class).name.clone(),
        method: classes.method(handle).name.clone(),
        detail,
    };

    let mut code = Code {
        insns: Vec::new(),
        ..original.clone()
    };
    let insns = &original.insns;
    let mut removed = BTreeSet::new();
    let mut removed_regions = BTreeSet::new();
    let mut inserts: BTreeMap<usize, Vec<Insn>> = BTreeMap::new();
    let mut anchor = 0usize;
    let mut cursor = 0usize;
    let mut changed = false;
    {
        let match_cx = MatchContext {
            classes,
            body,
            descriptor: &descriptor,
        };
        let synth_cx = SynthContext {
            classes,
            body,
            descriptor: &descriptor,
        };
        for (index, insn) in patch.instructions.iter().enumerate() {
            match (insn.mode, &insn.op) {
                (Mode::Add, PatchOp::TryCatch { .. }) => {
                    let region = synthesize_try_catch(&synth_cx, scope, &mut code, &insn.op)
                        .map_err(|err| PatchError::validate(insn.line, err))?;
                    code.try_catches.push(region);
                    changed = true;
                }
                (Mode::Add, op) => {
                    let synthesized = synthesize(&synth_cx, scope, &mut code, op)
                        .map_err(|err| PatchError::validate(insn.line, err))?;
                    inserts.entry(anchor).or_default().push(synthesized);
                    changed = true;
                }
                (mode, PatchOp::TryCatch { .. }) => {
                    let region = matched.regions.get(&index).copied().ok_or_else(|| {
                        consistency(format!("line {}: region was not matched", insn.line))
                    })?;
                    if mode == Mode::Remove {
                        removed_regions.insert(region);
                        changed = true;
                    }
                }
                (_, PatchOp::Any) => {
                    if is_trailing_wildcard(&patch.instructions[index + 1..]) {
                        anchor = insns.len();
                    }
                }
                (mode, op) => {
                    let position = matched.positions.get(&index).copied().ok_or_else(|| {
                        consistency(format!("line {}: pattern was not matched", insn.line))
                    })?;
                    if position < cursor {
                        return Err(consistency(format!(
                            "line {}: match at {position} precedes cursor {cursor}",
                            insn.line
                        ))
                        .into());
                    }
                    let mut probe = scope.clone();
                    let still_matches = insns
                        .get(position)
                        .is_some_and(|real| matches(&match_cx, &mut probe, op, real));
                    if !still_matches {
                        return Err(consistency(format!(
                            "line {}: {} no longer matches",
                            insn.line,
                            insn.text.trim()
                        ))
                        .into());
                    }
                    cursor = position + 1;
                    anchor = position + 1;
                    if mode == Mode::Remove {
                        removed.insert(position);
                        changed = true;
                    }
                }
            }
        }
    }
    if !changed {
        return Ok(false);
    }

    for position in 0..=insns.len() {
        if let Some(added) = inserts.remove(&position) {
            code.insns.extend(added);
        }
        if position < insns.len() && !removed.contains(&position) {
            code.insns.push(insns[position].clone());
        }
    }
    let regions = std::mem::take(&mut code.try_catches);
    code.try_catches = regions
        .into_iter()
        .enumerate()
        .filter(|(index, _)| !removed_regions.contains(index))
        .map(|(_, region)| region)
        .collect();
    check_labels(&code, patch.line)?;

    let owner = classes.method(body).class;
    classes.method_mut(body).code = Some(code);
    classes.class_mut(owner).modified = true;
    Ok(true)
}

/// `any` followed by nothing but added lines leaves the cursor at the end.
fn is_trailing_wildcard(rest: &[PatchInstruction]) -> bool {
    rest.iter()
        .all(|insn| insn.mode == Mode::Add || matches!(insn.op, PatchOp::TryCatch { .. }))
}

/// Every label is placed once and every referenced label is placed.
fn check_labels(code: &Code, line: usize) -> Result<()> {
    let mut placed = BTreeSet::new();
    for insn in &code.insns {
        if let Insn::Label(label) = insn
            && !placed.insert(*label)
        {
            anyhow::bail!("line {line}: label {} is placed twice", label.0);
        }
    }
    let referenced = code
        .insns
        .iter()
        .flat_map(Insn::branch_targets)
        .chain(
            code.try_catches
                .iter()
                .flat_map(|region| [region.start, region.end, region.handler]),
        );
    for label in referenced {
        if !placed.contains(&label) {
            anyhow::bail!("line {line}: label {} is used but never placed", label.0);
        }
    }
    Ok(())
}
