use std::collections::{BTreeMap, BTreeSet, VecDeque};

use anyhow::{Context, Result};
use tracing::{debug, warn};

use crate::classpath::{ClasspathIndex, is_platform_class};
use crate::descriptor::{parse_method, parse_type, referenced_class_names};
use crate::error::PatchError;
use crate::ir::{Class, ClassId, Constant, Field, FieldId, Insn, Method, MethodId};
use crate::scan::{ParsedClass, parse_class_bytes};

/// Arena of every class known to a run: inputs, classpath classes pulled in
/// for inheritance, and stubs for classes nobody provides.
#[derive(Debug, Default)]
pub(crate) struct ClassSet {
    classes: Vec<Class>,
    methods: Vec<Method>,
    fields: Vec<Field>,
    by_name: BTreeMap<String, ClassId>,
    classpath: ClasspathIndex,
}

impl ClassSet {
    pub(crate) fn new(classpath: ClasspathIndex) -> Self {
        Self {
            classpath,
            ..Self::default()
        }
    }

    pub(crate) fn class(&self, id: ClassId) -> &Class {
        &self.classes[id.0]
    }

    pub(crate) fn class_mut(&mut self, id: ClassId) -> &mut Class {
        &mut self.classes[id.0]
    }

    pub(crate) fn method(&self, id: MethodId) -> &Method {
        &self.methods[id.0]
    }

    pub(crate) fn method_mut(&mut self, id: MethodId) -> &mut Method {
        &mut self.methods[id.0]
    }

    pub(crate) fn field(&self, id: FieldId) -> &Field {
        &self.fields[id.0]
    }

    pub(crate) fn field_mut(&mut self, id: FieldId) -> &mut Field {
        &mut self.fields[id.0]
    }

    pub(crate) fn find(&self, name: &str) -> Option<ClassId> {
        self.by_name.get(name).copied()
    }

    pub(crate) fn class_ids(&self) -> impl Iterator<Item = ClassId> + '_ {
        (0..self.classes.len()).map(ClassId)
    }

    /// Add a decoded class. Input classes keep their bytes so that an
    /// unmodified class is written back untouched.
    pub(crate) fn insert(
        &mut self,
        parsed: ParsedClass,
        original: Option<Vec<u8>>,
        hidden: bool,
    ) -> Result<ClassId> {
        let ParsedClass {
            mut class,
            fields,
            methods,
        } = parsed;
        if self.by_name.contains_key(&class.name) {
            anyhow::bail!("duplicate class {}", class.name);
        }
        class.hidden = hidden;
        class.modified = false;
        class.original = original;
        let id = self.add_class(class);
        for mut field in fields {
            field.hidden = hidden;
            self.add_field(id, field);
        }
        for mut method in methods {
            method.hidden = hidden;
            self.add_method(id, method);
        }
        Ok(id)
    }

    pub(crate) fn add_class(&mut self, class: Class) -> ClassId {
        let id = ClassId(self.classes.len());
        self.by_name.insert(class.name.clone(), id);
        self.classes.push(class);
        id
    }

    pub(crate) fn add_method(&mut self, class: ClassId, mut method: Method) -> MethodId {
        let id = MethodId(self.methods.len());
        method.class = class;
        method.owners = BTreeSet::from([class]);
        self.methods.push(method);
        let owner = &mut self.classes[class.0];
        owner.methods.push(id);
        owner.view.push(id);
        id
    }

    pub(crate) fn add_field(&mut self, class: ClassId, mut field: Field) -> FieldId {
        let id = FieldId(self.fields.len());
        field.class = class;
        field.owners = BTreeSet::from([class]);
        self.fields.push(field);
        self.classes[class.0].fields.push(id);
        id
    }

    /// Detach a method from its class and from every view that shows it.
    pub(crate) fn remove_method(&mut self, id: MethodId) {
        self.methods[id.0].hidden = true;
        for class in &mut self.classes {
            class.methods.retain(|method| *method != id);
            class.view.retain(|method| *method != id);
        }
    }

    pub(crate) fn remove_field(&mut self, id: FieldId) {
        self.fields[id.0].hidden = true;
        let owner = self.fields[id.0].class;
        self.classes[owner.0].fields.retain(|field| *field != id);
    }

    /// Visible, matchable classes in a stable order.
    pub(crate) fn candidates(&self) -> Vec<ClassId> {
        let mut ids: Vec<ClassId> = self
            .class_ids()
            .filter(|id| {
                let class = self.class(*id);
                !class.hidden && !class.removed
            })
            .collect();
        ids.sort_by(|a, b| self.class(*a).name.cmp(&self.class(*b).name));
        ids
    }

    pub(crate) fn method_candidates(&self, class: ClassId) -> Vec<MethodId> {
        self.class(class)
            .view
            .iter()
            .copied()
            .filter(|id| !self.method(*id).hidden)
            .collect()
    }

    pub(crate) fn field_candidates(&self, class: ClassId) -> Vec<FieldId> {
        self.class(class)
            .fields
            .iter()
            .copied()
            .filter(|id| !self.field(*id).hidden)
            .collect()
    }

    /// Resolve a method reference the way the JVM does: the class itself,
    /// then its superclass chain, then its interfaces.
    pub(crate) fn find_method(&self, class: ClassId, name: &str, descriptor: &str) -> Option<MethodId> {
        self.walk_hierarchy(class, |id| {
            self.class(id).view.iter().copied().find(|method| {
                let method = self.method(*method);
                method.name == name && method.descriptor == descriptor
            })
        })
    }

    pub(crate) fn find_field(&self, class: ClassId, name: &str, descriptor: &str) -> Option<FieldId> {
        self.walk_hierarchy(class, |id| {
            self.class(id).fields.iter().copied().find(|field| {
                let field = self.field(*field);
                field.name == name && field.descriptor == descriptor
            })
        })
    }

    /// Method whose body stands behind `handle` when matched through
    /// `class`: the declaration with the same signature in `class` or its
    /// nearest superclass.
    pub(crate) fn body_of(&self, class: ClassId, handle: MethodId) -> Option<MethodId> {
        let target = self.method(handle);
        let mut current = Some(class);
        let mut seen = BTreeSet::new();
        while let Some(id) = current {
            if !seen.insert(id) {
                return None;
            }
            let owner = self.class(id);
            let declared = owner.methods.iter().copied().find(|method| {
                let method = self.method(*method);
                method.name == target.name && method.descriptor == target.descriptor
            });
            if declared.is_some() {
                return declared;
            }
            current = owner.super_name.as_deref().and_then(|name| self.find(name));
        }
        None
    }

    /// Every resolvable superclass and superinterface of `class`.
    pub(crate) fn ancestors(&self, class: ClassId) -> BTreeSet<ClassId> {
        let mut found = BTreeSet::new();
        self.walk_hierarchy(class, |id| {
            if id != class {
                found.insert(id);
            }
            None::<()>
        });
        found
    }

    fn walk_hierarchy<T>(&self, start: ClassId, mut probe: impl FnMut(ClassId) -> Option<T>) -> Option<T> {
        let mut seen = BTreeSet::new();
        let mut interfaces = Vec::new();
        let mut current = Some(start);
        while let Some(id) = current {
            if !seen.insert(id) {
                break;
            }
            if let Some(found) = probe(id) {
                return Some(found);
            }
            let class = self.class(id);
            interfaces.extend(class.interfaces.iter().filter_map(|name| self.find(name)));
            current = class.super_name.as_deref().and_then(|name| self.find(name));
        }
        let mut queue: VecDeque<ClassId> = interfaces.into();
        while let Some(id) = queue.pop_front() {
            if !seen.insert(id) {
                continue;
            }
            if let Some(found) = probe(id) {
                return Some(found);
            }
            queue.extend(
                self.class(id)
                    .interfaces
                    .iter()
                    .filter_map(|name| self.find(name)),
            );
        }
        None
    }

    /// Look a class up, pulling it from the classpath as hidden when needed.
    pub(crate) fn load(&mut self, name: &str) -> Result<Option<ClassId>> {
        if let Some(id) = self.find(name) {
            return Ok(Some(id));
        }
        let Some(data) = self.classpath.read(name)? else {
            return Ok(None);
        };
        let parsed = match parse_class_bytes(&data) {
            Ok(parsed) => parsed,
            Err(err) => {
                warn!("skipping unreadable classpath class {name}: {err:#}");
                return Ok(None);
            }
        };
        if parsed.class.name != name {
            anyhow::bail!(
                "classpath entry for {name} declares class {}",
                parsed.class.name
            );
        }
        debug!("loaded {name} from classpath");
        self.insert(parsed, None, true)
            .with_context(|| format!("load {name} from classpath"))
            .map(Some)
    }

    /// Merge inherited method visibility across the hierarchy.
    ///
    /// Every public or protected instance method replaces the same-signature
    /// method in each ancestor's view and takes over its owners, so a
    /// pattern written against either class finds one shared handle. A
    /// second pass makes every visible class an owner of the inheritable
    /// members of its ancestors.
    pub(crate) fn simplify(&mut self) -> Result<()> {
        let roots: Vec<ClassId> = self
            .candidates()
            .into_iter()
            .filter(|id| !self.class(*id).external)
            .collect();
        let mut missing_platform = BTreeSet::new();

        for root in &roots {
            let methods: Vec<MethodId> = self
                .class(*root)
                .methods
                .iter()
                .copied()
                .filter(|id| {
                    let method = self.method(*id);
                    !method.hidden && method.is_inheritable()
                })
                .collect();
            for method in methods {
                let mut visited = BTreeSet::new();
                let supertypes = self.supertype_names(*root);
                for ancestor in supertypes {
                    self.replace_method(*root, method, &ancestor, &mut visited, &mut missing_platform)?;
                }
            }
        }

        for root in &roots {
            let mut visited = BTreeSet::new();
            self.grab(*root, *root, &mut visited, &mut missing_platform)?;
        }

        for name in missing_platform {
            warn!("platform class {name} is not on the classpath; inherited members stop there");
        }
        Ok(())
    }

    fn supertype_names(&self, id: ClassId) -> Vec<String> {
        self.class(id).supertypes().map(str::to_string).collect()
    }

    fn resolve_ancestor(
        &mut self,
        origin: ClassId,
        name: &str,
        missing_platform: &mut BTreeSet<String>,
    ) -> Result<Option<ClassId>> {
        if let Some(id) = self.load(name)? {
            return Ok(Some(id));
        }
        if is_platform_class(name) {
            missing_platform.insert(name.to_string());
            return Ok(None);
        }
        Err(PatchError::UnresolvedAncestor {
            class: self.class(origin).name.clone(),
            ancestor: name.to_string(),
        }
        .into())
    }

    fn replace_method(
        &mut self,
        origin: ClassId,
        method: MethodId,
        ancestor: &str,
        visited: &mut BTreeSet<String>,
        missing_platform: &mut BTreeSet<String>,
    ) -> Result<()> {
        if !visited.insert(ancestor.to_string()) {
            return Ok(());
        }
        let Some(id) = self.resolve_ancestor(origin, ancestor, missing_platform)? else {
            return Ok(());
        };

        let (name, descriptor) = {
            let method = self.method(method);
            (method.name.clone(), method.descriptor.clone())
        };
        let target = self.class(id).view.iter().position(|candidate| {
            let candidate = self.method(*candidate);
            candidate.name == name && candidate.descriptor == descriptor && candidate.is_inheritable()
        });
        if let Some(position) = target {
            let replaced = self.class(id).view[position];
            if replaced != method {
                let inherited_owners = self.method(replaced).owners.clone();
                self.method_mut(method).owners.extend(inherited_owners);
                self.class_mut(id).view[position] = method;
            }
        }

        for next in self.supertype_names(id) {
            self.replace_method(origin, method, &next, visited, missing_platform)?;
        }
        Ok(())
    }

    fn grab(
        &mut self,
        root: ClassId,
        current: ClassId,
        visited: &mut BTreeSet<ClassId>,
        missing_platform: &mut BTreeSet<String>,
    ) -> Result<()> {
        if !visited.insert(current) {
            return Ok(());
        }
        let fields: Vec<FieldId> = self
            .class(current)
            .fields
            .iter()
            .copied()
            .filter(|id| {
                let field = self.field(*id);
                !field.hidden && field.is_inheritable()
            })
            .collect();
        for field in fields {
            self.field_mut(field).owners.insert(root);
        }
        let methods: Vec<MethodId> = self
            .class(current)
            .view
            .iter()
            .copied()
            .filter(|id| {
                let method = self.method(*id);
                !method.hidden && method.is_inheritable()
            })
            .collect();
        for method in methods {
            self.method_mut(method).owners.insert(root);
        }

        for name in self.supertype_names(current) {
            if let Some(ancestor) = self.resolve_ancestor(root, &name, missing_platform)? {
                self.grab(root, ancestor, visited, missing_platform)?;
            }
        }
        Ok(())
    }

    /// Make every class that visible classes mention present in the arena,
    /// loading it from the classpath or stubbing it, so that matching never
    /// has to change the model.
    pub(crate) fn load_referenced(&mut self) -> Result<()> {
        let mut queue: VecDeque<String> = VecDeque::new();
        for id in self.candidates() {
            queue.extend(self.referenced_names(id));
        }
        let mut seen = BTreeSet::new();
        let mut stubbed = 0usize;
        while let Some(name) = queue.pop_front() {
            if !seen.insert(name.clone()) || self.find(&name).is_some() {
                continue;
            }
            match self.load(&name)? {
                Some(id) => queue.extend(self.supertype_names(id)),
                None => {
                    let mut stub = Class::new(name, None, 0);
                    stub.hidden = true;
                    stub.external = true;
                    stub.modified = false;
                    self.add_class(stub);
                    stubbed += 1;
                }
            }
        }
        debug!("stubbed {stubbed} classes missing from the classpath");
        Ok(())
    }

    fn referenced_names(&self, id: ClassId) -> Vec<String> {
        let class = self.class(id);
        let mut names: Vec<String> = class.supertypes().map(str::to_string).collect();
        for field in &class.fields {
            push_descriptor_names(&self.field(*field).descriptor, &mut names);
        }
        for method in &class.methods {
            let method = self.method(*method);
            push_descriptor_names(&method.descriptor, &mut names);
            let Some(code) = &method.code else {
                continue;
            };
            for insn in &code.insns {
                match insn {
                    Insn::Field {
                        owner, descriptor, ..
                    }
                    | Insn::Invoke {
                        owner, descriptor, ..
                    } => {
                        push_class_operand(owner, &mut names);
                        push_descriptor_names(descriptor, &mut names);
                    }
                    Insn::Type { class, .. }
                    | Insn::Push(Constant::Class(class)) => {
                        push_class_operand(class, &mut names);
                    }
                    Insn::MultiNewArray { descriptor, .. } => {
                        push_descriptor_names(descriptor, &mut names);
                    }
                    _ => {}
                }
            }
            for region in &code.try_catches {
                if let Some(catch_type) = &region.catch_type {
                    names.push(catch_type.clone());
                }
            }
        }
        names
    }
}

fn push_class_operand(operand: &str, names: &mut Vec<String>) {
    if operand.starts_with('[') {
        push_descriptor_names(operand, names);
    } else {
        names.push(operand.to_string());
    }
}

/// Class names inside a field or method descriptor. Malformed descriptors
/// contribute nothing.
fn push_descriptor_names(descriptor: &str, names: &mut Vec<String>) {
    if descriptor.starts_with('(') {
        if let Ok(parsed) = parse_method(descriptor) {
            for param in parsed.parameter_types() {
                referenced_class_names(param, names);
            }
            referenced_class_names(parsed.return_type(), names);
        }
    } else if let Ok(parsed) = parse_type(descriptor) {
        referenced_class_names(&parsed, names);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{ACC_PRIVATE, ACC_PUBLIC, ACC_STATIC};
    use crate::test_harness::ModelBuilder;

    #[test]
    fn overriding_method_takes_over_ancestor_slot() {
        let mut model = ModelBuilder::new();
        let base = model.class("p/Base", None);
        let child = model.class("p/Child", Some("p/Base"));
        let base_run = model.method(base, "run", "()V", ACC_PUBLIC, Vec::new());
        let child_run = model.method(child, "run", "()V", ACC_PUBLIC, Vec::new());
        let mut classes = model.finish();

        classes.simplify().expect("simplify");

        assert_eq!(classes.class(base).view, vec![child_run]);
        assert!(classes.method(child_run).owners.contains(&base));
        assert!(classes.method(child_run).owners.contains(&child));
        assert_eq!(classes.body_of(base, child_run), Some(base_run));
        assert_eq!(classes.body_of(child, child_run), Some(child_run));
    }

    #[test]
    fn private_and_static_methods_stay_put() {
        let mut model = ModelBuilder::new();
        let base = model.class("p/Base", None);
        let child = model.class("p/Child", Some("p/Base"));
        let base_helper = model.method(base, "helper", "()V", ACC_PRIVATE, Vec::new());
        model.method(child, "helper", "()V", ACC_PRIVATE, Vec::new());
        let base_util = model.method(base, "util", "()V", ACC_PUBLIC | ACC_STATIC, Vec::new());
        model.method(child, "util", "()V", ACC_PUBLIC | ACC_STATIC, Vec::new());
        let mut classes = model.finish();

        classes.simplify().expect("simplify");

        assert_eq!(classes.class(base).view, vec![base_helper, base_util]);
    }

    #[test]
    fn subclasses_own_inherited_members() {
        let mut model = ModelBuilder::new();
        let base = model.class("p/Base", None);
        let child = model.class("p/Child", Some("p/Base"));
        let run = model.method(base, "run", "()V", ACC_PUBLIC, Vec::new());
        let count = model.field(base, "count", "I", ACC_PUBLIC);
        let mut classes = model.finish();

        classes.simplify().expect("simplify");

        assert!(classes.method(run).owners.contains(&child));
        assert!(classes.field(count).owners.contains(&child));
        assert_eq!(classes.find_method(child, "run", "()V"), Some(run));
        assert_eq!(classes.find_field(child, "count", "I"), Some(count));
    }

    #[test]
    fn resimplifying_picks_up_classes_added_later() {
        let mut model = ModelBuilder::new();
        let base = model.class("p/Base", None);
        let base_run = model.method(base, "run", "()V", ACC_PUBLIC, Vec::new());
        let mut classes = model.finish();
        classes.simplify().expect("simplify");

        let added = classes.add_class(Class::new("p/Added", Some("p/Base".to_string()), ACC_PUBLIC));
        let mut run = classes.method(base_run).clone();
        run.owners.clear();
        let added_run = classes.add_method(added, run);
        classes.simplify().expect("simplify again");
        classes.simplify().expect("simplify is repeatable");

        assert_eq!(classes.class(base).view, vec![added_run]);
        assert_eq!(classes.class(added).view, vec![added_run]);
        assert!(classes.method(added_run).owners.contains(&base));
        assert_eq!(classes.body_of(base, added_run), Some(base_run));
    }

    #[test]
    fn missing_application_ancestor_is_fatal() {
        let mut model = ModelBuilder::new();
        let child = model.class("p/Child", Some("p/Gone"));
        model.method(child, "run", "()V", ACC_PUBLIC, Vec::new());
        let mut classes = model.finish();

        let error = classes.simplify().expect_err("missing ancestor");
        assert!(format!("{error:#}").contains("p/Gone"));
    }

    #[test]
    fn missing_platform_ancestor_is_tolerated() {
        let mut model = ModelBuilder::new();
        let child = model.class("p/Child", Some("java/lang/Thread"));
        model.method(child, "run", "()V", ACC_PUBLIC, Vec::new());
        let mut classes = model.finish();

        classes.simplify().expect("simplify");
    }

    #[test]
    fn referenced_classes_are_stubbed_as_hidden() {
        let mut model = ModelBuilder::new();
        let class = model.class("p/User", None);
        model.method(
            class,
            "make",
            "()Lp/Made;",
            ACC_PUBLIC,
            vec![Insn::Type {
                opcode: crate::opcodes::NEW,
                class: "p/Other".to_string(),
            }],
        );
        let mut classes = model.finish();

        classes.load_referenced().expect("load");

        for name in ["p/Made", "p/Other", "java/lang/Object"] {
            let id = classes.find(name).expect(name);
            assert!(classes.class(id).hidden);
            assert!(classes.class(id).external);
        }
        assert_eq!(classes.candidates(), vec![class]);
    }
}
