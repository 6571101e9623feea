//! Backtracking search for an assignment of patch placeholders to real
//! classes, fields and methods.
//!
//! Every non-added class, field and method of the script is one digit of a
//! mixed-radix odometer. A class digit ranges over the visible classes; a
//! member digit ranges over the members of the class its owner digit
//! currently selects. The rightmost digit turns fastest, so members are
//! tried exhaustively for each class choice.

use rayon::prelude::*;
use tracing::debug;

use crate::classset::ClassSet;
use crate::error::PatchError;
use crate::ident::Ident;
use crate::ir::{ClassId, FieldId, MethodId};
use crate::patch::{Mode, PatchScript};
use crate::scope::{MemberKey, Scope};
use crate::verify::{Rejection, Verdict};

/// Real handle chosen for each patch node; `None` for added nodes.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct Assignment {
    pub(crate) classes: Vec<Option<ClassId>>,
    pub(crate) fields: Vec<Vec<Option<FieldId>>>,
    pub(crate) methods: Vec<Vec<Option<MethodId>>>,
}

/// Accepted trial: the bindings plus the handles every node was assigned.
#[derive(Clone, Debug)]
pub(crate) struct Resolution {
    pub(crate) scope: Scope,
    pub(crate) assignment: Assignment,
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct ResolveOptions {
    pub(crate) parallel: bool,
    pub(crate) batch_size: usize,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self {
            parallel: true,
            batch_size: 64,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Tick {
    Class { class: usize },
    Field { class: usize, field: usize },
    Method { class: usize, method: usize },
}

/// Candidate lists, narrowed by strong names. Member lists depend on the
/// owning class and are computed per trial.
struct Odometer<'a> {
    classes: &'a ClassSet,
    script: &'a PatchScript,
    ticks: Vec<Tick>,
    class_candidates: Vec<Vec<ClassId>>,
}

impl<'a> Odometer<'a> {
    fn new(classes: &'a ClassSet, script: &'a PatchScript) -> Self {
        let mut ticks = Vec::new();
        let mut class_candidates = Vec::new();
        let visible = classes.candidates();
        for (class_index, patch_class) in script.classes.iter().enumerate() {
            class_candidates.push(narrow(&visible, &patch_class.ident, |id| {
                classes.class(*id).name.as_str()
            }));
            if patch_class.mode == Mode::Add {
                continue;
            }
            ticks.push(Tick::Class { class: class_index });
            for (field_index, field) in patch_class.fields.iter().enumerate() {
                if field.mode != Mode::Add {
                    ticks.push(Tick::Field {
                        class: class_index,
                        field: field_index,
                    });
                }
            }
            for (method_index, method) in patch_class.methods.iter().enumerate() {
                if method.mode != Mode::Add {
                    ticks.push(Tick::Method {
                        class: class_index,
                        method: method_index,
                    });
                }
            }
        }
        Self {
            classes,
            script,
            ticks,
            class_candidates,
        }
    }

    fn field_candidates(&self, class: usize, field: usize, owner: ClassId) -> Vec<FieldId> {
        let ident = &self.script.classes[class].fields[field].ident;
        narrow(&self.classes.field_candidates(owner), ident, |id| {
            self.classes.field(*id).name.as_str()
        })
    }

    fn method_candidates(&self, class: usize, method: usize, owner: ClassId) -> Vec<MethodId> {
        let ident = &self.script.classes[class].methods[method].ident;
        narrow(&self.classes.method_candidates(owner), ident, |id| {
            self.classes.method(*id).name.as_str()
        })
    }

    /// Live radix of digit `position` given the digits to its left.
    fn radix(&self, digits: &[usize], position: usize) -> usize {
        let owner = |class: usize| -> Option<ClassId> {
            let tick = self
                .ticks
                .iter()
                .position(|tick| *tick == Tick::Class { class })?;
            self.class_candidates[class].get(digits[tick]).copied()
        };
        match self.ticks[position] {
            Tick::Class { class } => self.class_candidates[class].len(),
            Tick::Field { class, field } => owner(class)
                .map(|id| self.field_candidates(class, field, id).len())
                .unwrap_or(0),
            Tick::Method { class, method } => owner(class)
                .map(|id| self.method_candidates(class, method, id).len())
                .unwrap_or(0),
        }
    }

    /// Turn the rightmost digit, carrying leftwards. Returns false once the
    /// leftmost digit overflows.
    fn advance(&self, digits: &mut [usize]) -> bool {
        for position in (0..digits.len()).rev() {
            digits[position] += 1;
            if digits[position] < self.radix(digits, position).max(1) {
                return true;
            }
            digits[position] = 0;
        }
        false
    }

    /// Bind every digit's candidate into a copy of `initial`. Claimed
    /// candidates and digits past the end reject the trial without
    /// running the verifier.
    fn trial(&self, digits: &[usize], initial: &Scope) -> Result<Resolution, Rejection> {
        let mut scope = initial.clone();
        let mut assignment = Assignment {
            classes: vec![None; self.script.classes.len()],
            fields: self
                .script
                .classes
                .iter()
                .map(|class| vec![None; class.fields.len()])
                .collect(),
            methods: self
                .script
                .classes
                .iter()
                .map(|class| vec![None; class.methods.len()])
                .collect(),
        };

        for (position, tick) in self.ticks.iter().enumerate() {
            let digit = digits[position];
            let reject = |element: String, reason: &str| Rejection {
                progress: position,
                element,
                reason: reason.to_string(),
            };
            match *tick {
                Tick::Class { class } => {
                    let patch = &self.script.classes[class];
                    let Some(id) = self.class_candidates[class].get(digit).copied() else {
                        return Err(reject(patch.describe(), "no candidate class left"));
                    };
                    if patch.ident.is_bindable() && !scope.bind_class(&patch.ident.to_string(), id) {
                        return Err(reject(patch.describe(), "candidate class already claimed"));
                    }
                    assignment.classes[class] = Some(id);
                }
                Tick::Field { class, field } => {
                    let owner = &self.script.classes[class];
                    let patch = &owner.fields[field];
                    let Some(owner_id) = assignment.classes[class] else {
                        return Err(reject(patch.describe(owner), "owner class not assigned"));
                    };
                    let Some(id) = self.field_candidates(class, field, owner_id).get(digit).copied()
                    else {
                        return Err(reject(patch.describe(owner), "no candidate field left"));
                    };
                    let key = MemberKey::new(&patch.ident, &patch.raw_descriptor);
                    if patch.ident.is_bindable() && !scope.bind_field(self.classes, owner_id, &key, id) {
                        return Err(reject(patch.describe(owner), "candidate field already claimed"));
                    }
                    assignment.fields[class][field] = Some(id);
                }
                Tick::Method { class, method } => {
                    let owner = &self.script.classes[class];
                    let patch = &owner.methods[method];
                    let Some(owner_id) = assignment.classes[class] else {
                        return Err(reject(patch.describe(owner), "owner class not assigned"));
                    };
                    let Some(id) = self
                        .method_candidates(class, method, owner_id)
                        .get(digit)
                        .copied()
                    else {
                        return Err(reject(patch.describe(owner), "no candidate method left"));
                    };
                    let key = MemberKey::new(&patch.ident, &patch.raw_descriptor);
                    if patch.ident.is_bindable()
                        && !scope.bind_method(self.classes, owner_id, &key, id)
                    {
                        return Err(reject(patch.describe(owner), "candidate method already claimed"));
                    }
                    assignment.methods[class][method] = Some(id);
                }
            }
        }
        Ok(Resolution { scope, assignment })
    }
}

/// Strong names narrow a candidate list to exact matches; weak names and
/// `*` keep it whole.
fn narrow<'n, T: Copy>(candidates: &[T], ident: &Ident, name: impl Fn(&T) -> &'n str) -> Vec<T> {
    if ident.weak || ident.is_wildcard() {
        return candidates.to_vec();
    }
    candidates
        .iter()
        .filter(|candidate| name(candidate) == ident.name)
        .copied()
        .collect()
}

/// Search for the first trial, in odometer order, that the verifier
/// accepts. Exhaustion reports the rejection that got furthest.
pub(crate) fn resolve<V>(
    classes: &ClassSet,
    script: &PatchScript,
    initial: &Scope,
    verifier: V,
    options: ResolveOptions,
) -> Result<Resolution, PatchError>
where
    V: Fn(&Assignment, &mut Scope) -> Verdict + Sync,
{
    let odometer = Odometer::new(classes, script);
    debug!(
        placeholders = odometer.ticks.len(),
        parallel = options.parallel,
        "starting resolver"
    );

    let run = |digits: &Vec<usize>| -> Result<Resolution, Rejection> {
        let mut resolution = odometer.trial(digits, initial)?;
        match verifier(&resolution.assignment, &mut resolution.scope) {
            Verdict::Accepted => Ok(resolution),
            Verdict::Rejected(mut rejection) => {
                rejection.progress += odometer.ticks.len();
                Err(rejection)
            }
        }
    };

    let batch_size = if options.parallel {
        options.batch_size.max(1)
    } else {
        1
    };
    let mut digits = vec![0usize; odometer.ticks.len()];
    let mut exhausted = false;
    let mut best: Option<Rejection> = None;
    let mut trials = 0usize;

    while !exhausted {
        let mut batch = Vec::with_capacity(batch_size);
        while batch.len() < batch_size && !exhausted {
            batch.push(digits.clone());
            exhausted = !odometer.advance(&mut digits);
        }
        trials += batch.len();

        let outcomes: Vec<Result<Resolution, Rejection>> = if batch.len() > 1 {
            batch.par_iter().map(&run).collect()
        } else {
            batch.iter().map(&run).collect()
        };
        for outcome in outcomes {
            match outcome {
                Ok(resolution) => {
                    debug!(trials, "resolver accepted a trial");
                    return Ok(resolution);
                }
                Err(rejection) => {
                    if best
                        .as_ref()
                        .is_none_or(|current| rejection.progress > current.progress)
                    {
                        debug!(
                            progress = rejection.progress,
                            element = %rejection.element,
                            reason = %rejection.reason,
                            "best partial trial so far"
                        );
                        best = Some(rejection);
                    }
                }
            }
        }
    }

    let best = best.unwrap_or_else(|| Rejection {
        progress: 0,
        element: "patch".to_string(),
        reason: "no candidates".to_string(),
    });
    debug!(trials, "resolver exhausted the search space");
    Err(PatchError::NoMatch {
        element: best.element,
        reason: best.reason,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{ACC_PUBLIC, Insn};
    use crate::opcodes;
    use crate::patch::parse_script;
    use crate::test_harness::ModelBuilder;
    use crate::verify::Verifier;

    fn twins() -> ClassSet {
        let mut model = ModelBuilder::new();
        let long_box = model.class("a/First", None);
        model.field(long_box, "value", "J", ACC_PUBLIC);
        model.method(long_box, "read", "()V", ACC_PUBLIC, vec![Insn::Simple(opcodes::RETURN)]);
        let int_box = model.class("a/Second", None);
        model.field(int_box, "value", "I", ACC_PUBLIC);
        model.method(int_box, "read", "()V", ACC_PUBLIC, vec![Insn::Simple(opcodes::RETURN)]);
        model.finish()
    }

    fn solve(classes: &ClassSet, text: &str, options: ResolveOptions) -> Result<Resolution, PatchError> {
        let script = parse_script(text).expect("parse");
        let verifier = Verifier {
            classes,
            script: &script,
        };
        resolve(
            classes,
            &script,
            &Scope::default(),
            |assignment, scope| verifier.verify(assignment, scope),
            options,
        )
    }

    const INT_BOX: &str = ".class ~Box\n.field ~value I\n.method ~read ()V\n.return\n.end-method\n.end-class\n";

    #[test]
    fn ambiguous_classes_are_tried_in_order() {
        let classes = twins();
        for options in [
            ResolveOptions {
                parallel: false,
                batch_size: 1,
            },
            ResolveOptions {
                parallel: true,
                batch_size: 3,
            },
        ] {
            let resolution = solve(&classes, INT_BOX, options).expect("resolve");
            let bound = resolution.scope.class("~Box").expect("bound");
            assert_eq!(classes.class(bound).name, "a/Second");
        }
    }

    #[test]
    fn bindings_never_alias() {
        let classes = twins();
        let resolution = solve(
            &classes,
            ".class ~X\n.end-class\n.class ~Y\n.end-class\n",
            ResolveOptions::default(),
        )
        .expect("resolve");
        let x = resolution.scope.class("~X").expect("x");
        let y = resolution.scope.class("~Y").expect("y");
        assert_ne!(x, y);
        assert_eq!(classes.class(x).name, "a/First");
    }

    #[test]
    fn strong_only_scripts_need_one_trial() {
        let classes = twins();
        let resolution = solve(
            &classes,
            ".class a/Second\n.method read ()V\n.any\n.end-method\n.end-class\n",
            ResolveOptions::default(),
        )
        .expect("resolve");
        assert_eq!(resolution.assignment.classes, vec![classes.find("a/Second")]);
        assert_eq!(resolution.scope.class_bindings().count(), 0);
    }

    #[test]
    fn strong_names_narrow_candidates_to_exact_matches() {
        let classes = twins();
        let visible = classes.candidates();
        let name_of = |id: &ClassId| classes.class(*id).name.as_str();
        let second = classes.find("a/Second").expect("second");
        assert_eq!(narrow(&visible, &Ident::parse("a/Second"), name_of), vec![second]);
        assert_eq!(narrow(&visible, &Ident::parse("~Box"), name_of), visible);
        assert_eq!(narrow(&visible, &Ident::parse("*"), name_of), visible);
        assert!(narrow(&visible, &Ident::parse("a/Third"), name_of).is_empty());
    }

    #[test]
    fn exhaustion_names_the_furthest_element() {
        let classes = twins();
        let err = solve(
            &classes,
            ".class ~Box\n.field ~value D\n.end-class\n",
            ResolveOptions::default(),
        )
        .expect_err("no double field");
        match err {
            PatchError::NoMatch { element, reason } => {
                assert!(element.contains("~value"), "{element}");
                assert!(reason.contains("type mismatch"), "{reason}");
            }
            other => panic!("unexpected {other}"),
        }
    }

    #[test]
    fn classes_without_members_overflow_cleanly() {
        let mut model = ModelBuilder::new();
        model.class("a/Empty", None);
        let classes = model.finish();
        assert!(matches!(
            solve(&classes, INT_BOX, ResolveOptions::default()),
            Err(PatchError::NoMatch { .. })
        ));
    }
}
