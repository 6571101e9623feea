//! Structural check of one trial assignment: class, field and method
//! headers, then the instruction walk of every matched method body.

use tracing::trace;

use crate::classset::ClassSet;
use crate::descriptor::{parse_method, parse_type};
use crate::instruction::{MatchContext, matches, match_try_catch};
use crate::ir::{ACC_ENUM, ACC_PRIVATE, ACC_PROTECTED, ACC_STATIC, ClassId, Code, FieldId, Insn, MethodId};
use crate::patch::{ClassKind, Mode, PatchClass, PatchField, PatchInstruction, PatchMethod, PatchScript};
use crate::instruction::PatchOp;
use crate::resolver::Assignment;
use crate::scope::{MethodMatch, Scope};
use crate::types::{check_class_name, check_method_types, check_type};

/// Why a trial assignment was turned down. `progress` counts the checks
/// that passed first, so the most promising rejection can be reported.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Rejection {
    pub(crate) progress: usize,
    pub(crate) element: String,
    pub(crate) reason: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Verdict {
    Accepted,
    Rejected(Rejection),
}

/// Verifier over a read-only model.
pub(crate) struct Verifier<'a> {
    pub(crate) classes: &'a ClassSet,
    pub(crate) script: &'a PatchScript,
}

struct Progress {
    passed: usize,
}

impl Progress {
    fn pass(&mut self) {
        self.passed += 1;
    }

    fn reject(&self, element: String, reason: impl Into<String>) -> Verdict {
        Verdict::Rejected(Rejection {
            progress: self.passed,
            element,
            reason: reason.into(),
        })
    }
}

impl Verifier<'_> {
    /// Check every non-added class, field and method of the script against
    /// its assigned handle, binding weak names into `scope` as they appear.
    pub(crate) fn verify(&self, assignment: &Assignment, scope: &mut Scope) -> Verdict {
        let mut progress = Progress { passed: 0 };
        for (class_index, patch_class) in self.script.classes.iter().enumerate() {
            if patch_class.mode == Mode::Add {
                continue;
            }
            let Some(class) = assignment.classes[class_index] else {
                return progress.reject(patch_class.describe(), "no class assigned");
            };
            if let Err(reason) = self.check_class(scope, patch_class, class) {
                return progress.reject(patch_class.describe(), reason);
            }
            progress.pass();

            for (field_index, patch_field) in patch_class.fields.iter().enumerate() {
                if patch_field.mode == Mode::Add {
                    continue;
                }
                let Some(field) = assignment.fields[class_index][field_index] else {
                    return progress.reject(patch_field.describe(patch_class), "no field assigned");
                };
                if let Err(reason) = self.check_field(scope, patch_field, field) {
                    return progress.reject(patch_field.describe(patch_class), reason);
                }
                progress.pass();
            }

            for (method_index, patch_method) in patch_class.methods.iter().enumerate() {
                if patch_method.mode == Mode::Add {
                    continue;
                }
                let Some(method) = assignment.methods[class_index][method_index] else {
                    return progress.reject(patch_method.describe(patch_class), "no method assigned");
                };
                if let Err(reason) = self.check_method(scope, patch_method, class, method) {
                    return progress.reject(patch_method.describe(patch_class), reason);
                }
                progress.pass();
            }
        }
        Verdict::Accepted
    }

    fn check_class(&self, scope: &mut Scope, patch: &PatchClass, id: ClassId) -> Result<(), String> {
        let class = self.classes.class(id);
        if !patch.ident.weak && !patch.ident.is_wildcard() && patch.ident.name != class.name {
            return Err(format!("name mismatch {} != {}", patch.ident, class.name));
        }
        match patch.kind {
            ClassKind::Interface if !class.is_interface() => {
                return Err(format!("{} is not an interface", class.name));
            }
            ClassKind::Enum if class.access & ACC_ENUM == 0 => {
                return Err(format!("{} is not an enum", class.name));
            }
            _ => {}
        }

        for modifier in patch.supers.iter().filter(|modifier| modifier.mode != Mode::Add) {
            if modifier.ident.is_wildcard() {
                continue;
            }
            let Some(super_name) = &class.super_name else {
                return Err(format!("{} has no superclass", class.name));
            };
            if !check_class_name(self.classes, scope, &modifier.ident.to_string(), super_name)
                .accepted()
            {
                return Err(format!("super mismatch {} != {super_name}", modifier.ident));
            }
        }

        for modifier in patch
            .interfaces
            .iter()
            .filter(|modifier| modifier.mode != Mode::Add)
        {
            if modifier.ident.is_wildcard() {
                if class.interfaces.is_empty() {
                    return Err(format!("{} implements no interfaces", class.name));
                }
                continue;
            }
            let pattern = modifier.ident.to_string();
            let found = class.interfaces.iter().any(|interface| {
                let mut trial = scope.clone();
                let accepted = check_class_name(self.classes, &mut trial, &pattern, interface).accepted();
                if accepted {
                    *scope = trial;
                }
                accepted
            });
            if !found {
                return Err(format!("no interface matches {}", modifier.ident));
            }
        }
        Ok(())
    }

    fn check_field(&self, scope: &mut Scope, patch: &PatchField, id: FieldId) -> Result<(), String> {
        let field = self.classes.field(id);
        if !patch.ident.weak && !patch.ident.is_wildcard() && patch.ident.name != field.name {
            return Err(format!("name mismatch {} != {}", patch.ident, field.name));
        }
        let real = parse_type(&field.descriptor)?;
        if !check_type(self.classes, scope, &patch.descriptor, &real).accepted() {
            return Err(format!("type mismatch {} != {}", patch.raw_descriptor, field.descriptor));
        }
        if patch.is_static != (field.access & ACC_STATIC != 0) {
            return Err("static modifier mismatch".to_string());
        }
        if patch.is_private != (field.access & ACC_PRIVATE != 0) {
            return Err("private modifier mismatch".to_string());
        }
        if let Some(expected) = &patch.value {
            let same = field
                .value
                .as_ref()
                .is_some_and(|actual| expected.same_value(actual));
            if !same {
                return Err(format!("constant value mismatch, expected {expected:?}"));
            }
        }
        Ok(())
    }

    fn check_method(
        &self,
        scope: &mut Scope,
        patch: &PatchMethod,
        class: ClassId,
        handle: MethodId,
    ) -> Result<(), String> {
        let method = self.classes.method(handle);
        if !patch.ident.weak && !patch.ident.is_wildcard() && patch.ident.name != method.name {
            return Err(format!("name mismatch {} != {}", patch.ident, method.name));
        }
        let real = parse_method(&method.descriptor)?;
        check_method_types(self.classes, scope, &patch.descriptor, &real)?;
        if patch.is_static != method.is_static() {
            return Err("static modifier mismatch".to_string());
        }
        if patch.is_private != (method.access & ACC_PRIVATE != 0) {
            return Err("private modifier mismatch".to_string());
        }
        if patch.is_protected != (method.access & ACC_PROTECTED != 0) {
            return Err("protected modifier mismatch".to_string());
        }

        let checked = patch.instructions.iter().any(|insn| insn.mode != Mode::Add);
        if !checked {
            return Ok(());
        }
        let body = self
            .classes
            .body_of(class, handle)
            .ok_or_else(|| format!("{} has no body", method.name))?;
        let Some(code) = &self.classes.method(body).code else {
            return Err(format!("{} has no code", method.name));
        };
        let cx = MatchContext {
            classes: self.classes,
            body,
            descriptor: &real,
        };
        let mut trial = scope.clone();
        match walk(&cx, &mut trial, &patch.instructions, code) {
            Ok(matched) => {
                trial.record_match(body, matched);
                *scope = trial;
                Ok(())
            }
            Err(reason) => {
                scope.clear_body(body);
                Err(reason)
            }
        }
    }
}

/// Saved state for retrying after the first match that followed `any`.
struct Checkpoint {
    pattern: usize,
    position: usize,
    scope: Scope,
    matched: MethodMatch,
}

/// Walk a method body against the non-added patterns of a method block.
pub(crate) fn walk(
    cx: &MatchContext<'_>,
    scope: &mut Scope,
    instructions: &[PatchInstruction],
    code: &Code,
) -> Result<MethodMatch, String> {
    let mut matched = MethodMatch::default();
    for (index, insn) in instructions.iter().enumerate() {
        if insn.mode == Mode::Add || !matches!(insn.op, PatchOp::TryCatch { .. }) {
            continue;
        }
        let region = match_try_catch(cx, scope, &insn.op, code)
            .ok_or_else(|| format!("line {}: no exception region matches", insn.line))?;
        matched.regions.insert(index, region);
    }

    let patterns: Vec<(usize, &PatchInstruction)> = instructions
        .iter()
        .enumerate()
        .filter(|(_, insn)| insn.mode != Mode::Add && !matches!(insn.op, PatchOp::TryCatch { .. }))
        .collect();
    let insns = &code.insns;

    let mut next = 0usize;
    let mut position = 0usize;
    let mut wildcard = false;
    let mut checkpoint: Option<Checkpoint> = None;

    loop {
        let failure = if next == patterns.len() {
            let leftover = insns[position.min(insns.len())..]
                .iter()
                .any(|insn| !insn.is_pseudo());
            if wildcard || !leftover {
                return Ok(matched);
            }
            "instructions left after the last pattern".to_string()
        } else {
            let (index, pattern) = patterns[next];
            if matches!(pattern.op, PatchOp::Any) {
                wildcard = true;
                next += 1;
                continue;
            }
            let wants_label = matches!(pattern.op, PatchOp::Label(_));
            while let Some(insn) = insns.get(position) {
                let invisible = matches!(insn, Insn::Line(_)) || (!wants_label && matches!(insn, Insn::Label(_)));
                if !invisible {
                    break;
                }
                position += 1;
            }
            match insns.get(position) {
                None => format!("line {}: ran out of instructions", pattern.line),
                Some(insn) => {
                    let mut trial = scope.clone();
                    if matches(cx, &mut trial, &pattern.op, insn) {
                        trace!(line = pattern.line, position, "pattern matched");
                        if wildcard {
                            checkpoint = Some(Checkpoint {
                                pattern: next,
                                position,
                                scope: scope.clone(),
                                matched: matched.clone(),
                            });
                        }
                        *scope = trial;
                        matched.positions.insert(index, position);
                        wildcard = false;
                        position += 1;
                        next += 1;
                        continue;
                    }
                    if wildcard {
                        position += 1;
                        continue;
                    }
                    format!("line {}: {} does not match {insn:?}", pattern.line, pattern.text.trim())
                }
            }
        };

        match checkpoint.take() {
            Some(saved) => {
                trace!(reason = %failure, "rolling back to the last wildcard match");
                next = saved.pattern;
                position = saved.position + 1;
                *scope = saved.scope;
                matched = saved.matched;
                wildcard = true;
            }
            None => return Err(failure),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ident::Ident;
    use crate::ir::{ACC_PUBLIC, Constant, LabelId};
    use crate::opcodes;
    use crate::patch::parse_script;
    use crate::scope::MemberKey;
    use crate::test_harness::ModelBuilder;

    fn method_patterns(text: &str) -> Vec<PatchInstruction> {
        let script = parse_script(&format!(".class ~A\n.method ~m ()V\n{text}.end-method\n.end-class\n"))
            .expect("parse");
        script.classes[0].methods[0].instructions.clone()
    }

    fn run_walk(text: &str, insns: Vec<Insn>) -> Result<MethodMatch, String> {
        let mut model = ModelBuilder::new();
        let class = model.class("a/A", None);
        let method = model.method(class, "m", "()V", ACC_PUBLIC, insns);
        let classes = model.finish();
        let descriptor = parse_method("()V").expect("desc");
        let cx = MatchContext {
            classes: &classes,
            body: method,
            descriptor: &descriptor,
        };
        let code = classes.method(method).code.clone().expect("code");
        let mut scope = Scope::default();
        walk(&cx, &mut scope, &method_patterns(text), &code)
    }

    fn body() -> Vec<Insn> {
        vec![
            Insn::Line(3),
            Insn::Push(Constant::Int(1)),
            Insn::Simple(opcodes::POP),
            Insn::Label(LabelId(0)),
            Insn::Push(Constant::Int(2)),
            Insn::Simple(opcodes::POP),
            Insn::Simple(opcodes::RETURN),
        ]
    }

    #[test]
    fn exact_sequences_skip_markers() {
        let matched = run_walk(
            ".push-int 1\n.pop\n.push-int 2\n.pop\n.return\n",
            body(),
        )
        .expect("match");
        assert_eq!(matched.positions[&0], 1);
        assert_eq!(matched.positions[&2], 4);
        assert!(run_walk(".push-int 1\n.pop\n", body()).is_err());
    }

    #[test]
    fn trailing_any_accepts_the_rest() {
        assert!(run_walk(".push-int 1\n.any\n", body()).is_ok());
    }

    #[test]
    fn wildcard_rolls_back_to_later_candidates() {
        let matched = run_walk(".any\n.push-int *\n.pop\n.return\n", body()).expect("match");
        assert_eq!(matched.positions[&1], 4);
        assert_eq!(matched.positions[&3], 6);
    }

    #[test]
    fn labels_only_visible_to_label_patterns() {
        let matched = run_walk(
            ".push-int 1\n.pop\n.label ~here\n.push-int 2\n.any\n",
            body(),
        )
        .expect("match");
        assert_eq!(matched.positions[&2], 3);
    }

    #[test]
    fn added_patterns_are_ignored() {
        assert!(run_walk("+nop\n.any\n.return\n", body()).is_ok());
    }

    fn getter_model(returns_field: bool) -> (ClassSet, ClassId, FieldId, MethodId) {
        let mut model = ModelBuilder::new();
        let class = model.class("a/Box", None);
        let field = model.field(class, "x", "I", ACC_PUBLIC);
        let body = if returns_field {
            vec![
                Insn::Var {
                    opcode: opcodes::ALOAD,
                    index: 0,
                },
                Insn::Field {
                    opcode: opcodes::GETFIELD,
                    owner: "a/Box".to_string(),
                    name: "x".to_string(),
                    descriptor: "I".to_string(),
                },
                Insn::Simple(opcodes::IRETURN),
            ]
        } else {
            vec![Insn::Push(Constant::Int(4)), Insn::Simple(opcodes::IRETURN)]
        };
        let method = model.method(class, "get", "()I", ACC_PUBLIC, body);
        (model.finish(), class, field, method)
    }

    const GETTER: &str = ".class ~A\n.method ~get ()I\n.load-object 0\n.get-field ~A x I\n.return\n.end-method\n.end-class\n";

    fn assignment(class: ClassId, method: MethodId) -> Assignment {
        Assignment {
            classes: vec![Some(class)],
            fields: vec![Vec::new()],
            methods: vec![vec![Some(method)]],
        }
    }

    #[test]
    fn getter_scenario_binds_class_and_method() {
        let script = parse_script(GETTER).expect("parse");
        let (classes, class, _, method) = getter_model(true);
        let verifier = Verifier {
            classes: &classes,
            script: &script,
        };
        let mut scope = Scope::default();
        assert!(scope.bind_class("~A", class));
        let key = MemberKey::new(&Ident::parse("~get"), "()I");
        assert!(scope.bind_method(&classes, class, &key, method));
        assert_eq!(verifier.verify(&assignment(class, method), &mut scope), Verdict::Accepted);
        assert!(scope.method_match(method).is_some());
    }

    #[test]
    fn getter_scenario_rejects_constant_return() {
        let script = parse_script(GETTER).expect("parse");
        let (classes, class, _, method) = getter_model(false);
        let verifier = Verifier {
            classes: &classes,
            script: &script,
        };
        let mut scope = Scope::default();
        assert!(scope.bind_class("~A", class));
        match verifier.verify(&assignment(class, method), &mut scope) {
            Verdict::Rejected(rejection) => {
                assert_eq!(rejection.progress, 1);
                assert!(rejection.element.contains("~get"), "{}", rejection.element);
            }
            Verdict::Accepted => panic!("constant return must not match"),
        }
        assert!(scope.method_match(method).is_none());
    }

    #[test]
    fn field_checks_compare_modifiers_and_values() {
        let script = parse_script(".class ~A\n.field ~x I static\n.end-class\n").expect("parse");
        let (classes, class, field, _) = getter_model(true);
        let verifier = Verifier {
            classes: &classes,
            script: &script,
        };
        let trial = Assignment {
            classes: vec![Some(class)],
            fields: vec![vec![Some(field)]],
            methods: vec![Vec::new()],
        };
        let mut scope = Scope::default();
        assert!(matches!(
            verifier.verify(&trial, &mut scope),
            Verdict::Rejected(Rejection { reason, .. }) if reason.contains("static")
        ));
    }
}
