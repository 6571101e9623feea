use std::collections::BTreeMap;
use std::sync::Arc;

use crate::classset::ClassSet;
use crate::ident::Ident;
use crate::ir::{ClassId, FieldId, LabelId, MethodId};

/// Patch-side identity of a method or field: identifier text as written
/// (`~get` or `get`) plus the raw descriptor from the script.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct MemberKey {
    pub(crate) name: String,
    pub(crate) descriptor: String,
}

impl MemberKey {
    pub(crate) fn new(ident: &Ident, descriptor: &str) -> Self {
        Self {
            name: ident.to_string(),
            descriptor: descriptor.to_string(),
        }
    }
}

/// Outcome of the instruction walk for one method body.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct MethodMatch {
    /// Pattern instruction index to matched instruction index.
    pub(crate) positions: BTreeMap<usize, usize>,
    /// Pattern instruction index to matched try/catch region index.
    pub(crate) regions: BTreeMap<usize, usize>,
}

/// Weak identifier bindings for one trial assignment.
///
/// Every map sits behind an `Arc` and is copied on first write, so cloning a
/// scope to branch the search is cheap.
#[derive(Clone, Debug, Default)]
pub(crate) struct Scope {
    classes: Arc<BTreeMap<String, ClassId>>,
    methods: Arc<BTreeMap<MethodId, MemberKey>>,
    fields: Arc<BTreeMap<FieldId, MemberKey>>,
    labels: Arc<BTreeMap<(MethodId, String), LabelId>>,
    matches: Arc<BTreeMap<MethodId, MethodMatch>>,
}

impl Scope {
    /// Class bound to a weak name such as `~A`.
    pub(crate) fn class(&self, key: &str) -> Option<ClassId> {
        self.classes.get(key).copied()
    }

    /// Weak name that claims `id`, if any.
    pub(crate) fn class_key(&self, id: ClassId) -> Option<&str> {
        self.classes
            .iter()
            .find(|(_, bound)| **bound == id)
            .map(|(key, _)| key.as_str())
    }

    /// Bind a weak class name. Fails when the name is bound elsewhere or the
    /// class is already claimed by another name.
    pub(crate) fn bind_class(&mut self, key: &str, id: ClassId) -> bool {
        if let Some(bound) = self.classes.get(key) {
            return *bound == id;
        }
        if self.class_key(id).is_some() {
            return false;
        }
        Arc::make_mut(&mut self.classes).insert(key.to_string(), id);
        true
    }

    /// Method handle bound to `key` that is reachable through `owner`. A
    /// handle declared by `owner` wins over an inherited one.
    pub(crate) fn method(
        &self,
        classes: &ClassSet,
        owner: ClassId,
        key: &MemberKey,
    ) -> Option<MethodId> {
        let bound = self
            .methods
            .iter()
            .filter(|(_, bound_key)| *bound_key == key)
            .map(|(id, _)| *id);
        let mut inherited = None;
        for id in bound {
            let method = classes.method(id);
            if method.class == owner {
                return Some(id);
            }
            if inherited.is_none() && method.owners.contains(&owner) {
                inherited = Some(id);
            }
        }
        inherited
    }

    /// Claim `id` under `key`. Only a handle that `owner` declares itself
    /// blocks the claim; an inherited one is shadowed.
    pub(crate) fn bind_method(
        &mut self,
        classes: &ClassSet,
        owner: ClassId,
        key: &MemberKey,
        id: MethodId,
    ) -> bool {
        if let Some(bound_key) = self.methods.get(&id) {
            return bound_key == key;
        }
        if self
            .method(classes, owner, key)
            .is_some_and(|bound| bound != id && classes.method(bound).class == owner)
        {
            return false;
        }
        Arc::make_mut(&mut self.methods).insert(id, key.clone());
        true
    }

    pub(crate) fn field(
        &self,
        classes: &ClassSet,
        owner: ClassId,
        key: &MemberKey,
    ) -> Option<FieldId> {
        let mut inherited = None;
        for (id, bound_key) in self.fields.iter() {
            if bound_key != key {
                continue;
            }
            let field = classes.field(*id);
            if field.class == owner {
                return Some(*id);
            }
            if inherited.is_none() && field.owners.contains(&owner) {
                inherited = Some(*id);
            }
        }
        inherited
    }

    pub(crate) fn bind_field(
        &mut self,
        classes: &ClassSet,
        owner: ClassId,
        key: &MemberKey,
        id: FieldId,
    ) -> bool {
        if let Some(bound_key) = self.fields.get(&id) {
            return bound_key == key;
        }
        if self
            .field(classes, owner, key)
            .is_some_and(|bound| bound != id && classes.field(bound).class == owner)
        {
            return false;
        }
        Arc::make_mut(&mut self.fields).insert(id, key.clone());
        true
    }

    pub(crate) fn label(&self, body: MethodId, name: &str) -> Option<LabelId> {
        self.labels.get(&(body, name.to_string())).copied()
    }

    /// Associate a pattern label name with a real label of `body`.
    pub(crate) fn bind_label(&mut self, body: MethodId, name: &str, label: LabelId) -> bool {
        if let Some(bound) = self.label(body, name) {
            return bound == label;
        }
        let claimed = self
            .labels
            .range((body, String::new())..)
            .take_while(|((method, _), _)| *method == body)
            .any(|(_, bound)| *bound == label);
        if claimed {
            return false;
        }
        Arc::make_mut(&mut self.labels).insert((body, name.to_string()), label);
        true
    }

    pub(crate) fn method_match(&self, body: MethodId) -> Option<&MethodMatch> {
        self.matches.get(&body)
    }

    pub(crate) fn record_match(&mut self, body: MethodId, matched: MethodMatch) {
        Arc::make_mut(&mut self.matches).insert(body, matched);
    }

    /// Drop per-body state left behind by a failed method check.
    pub(crate) fn clear_body(&mut self, body: MethodId) {
        if self.labels.keys().any(|(method, _)| *method == body) {
            Arc::make_mut(&mut self.labels).retain(|(method, _), _| *method != body);
        }
        if self.matches.contains_key(&body) {
            Arc::make_mut(&mut self.matches).remove(&body);
        }
    }

    pub(crate) fn class_bindings(&self) -> impl Iterator<Item = (&str, ClassId)> {
        self.classes.iter().map(|(key, id)| (key.as_str(), *id))
    }

    pub(crate) fn method_bindings(&self) -> impl Iterator<Item = (MethodId, &MemberKey)> {
        self.methods.iter().map(|(id, key)| (*id, key))
    }

    pub(crate) fn field_bindings(&self) -> impl Iterator<Item = (FieldId, &MemberKey)> {
        self.fields.iter().map(|(id, key)| (*id, key))
    }
}
