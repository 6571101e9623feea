use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::classset::ClassSet;
use crate::scope::{MemberKey, Scope};

/// Weak-name bindings accepted for each patch script, in application order.
#[derive(Debug, Default, Serialize)]
pub(crate) struct BindingReport {
    pub(crate) patches: Vec<PatchBindings>,
}

#[derive(Debug, Serialize)]
pub(crate) struct PatchBindings {
    pub(crate) patch: String,
    pub(crate) classes: Vec<ClassBinding>,
    pub(crate) methods: Vec<MemberBinding>,
    pub(crate) fields: Vec<MemberBinding>,
}

#[derive(Debug, PartialEq, Eq, Serialize)]
pub(crate) struct ClassBinding {
    pub(crate) weak: String,
    pub(crate) name: String,
}

#[derive(Debug, PartialEq, Eq, Serialize)]
pub(crate) struct MemberBinding {
    pub(crate) weak: String,
    /// Descriptor as written in the script, weak class names included.
    pub(crate) pattern: String,
    pub(crate) owner: String,
    pub(crate) name: String,
    pub(crate) descriptor: String,
}

impl PatchBindings {
    /// Collect the weak bindings of an applied scope.
    pub(crate) fn collect(patch: &str, classes: &ClassSet, scope: &Scope) -> Self {
        let mut class_bindings: Vec<ClassBinding> = scope
            .class_bindings()
            .map(|(weak, id)| ClassBinding {
                weak: weak.to_string(),
                name: classes.class(id).name.clone(),
            })
            .collect();
        class_bindings.sort_by(|a, b| a.weak.cmp(&b.weak));

        let mut methods: Vec<MemberBinding> = scope
            .method_bindings()
            .filter(|(_, key)| key.name.starts_with('~'))
            .map(|(id, key)| {
                let method = classes.method(id);
                member(key, &classes.class(method.class).name, &method.name, &method.descriptor)
            })
            .collect();
        sort_members(&mut methods);

        let mut fields: Vec<MemberBinding> = scope
            .field_bindings()
            .filter(|(_, key)| key.name.starts_with('~'))
            .map(|(id, key)| {
                let field = classes.field(id);
                member(key, &classes.class(field.class).name, &field.name, &field.descriptor)
            })
            .collect();
        sort_members(&mut fields);

        Self {
            patch: patch.to_string(),
            classes: class_bindings,
            methods,
            fields,
        }
    }
}

fn member(key: &MemberKey, owner: &str, name: &str, descriptor: &str) -> MemberBinding {
    MemberBinding {
        weak: key.name.clone(),
        pattern: key.descriptor.clone(),
        owner: owner.to_string(),
        name: name.to_string(),
        descriptor: descriptor.to_string(),
    }
}

fn sort_members(members: &mut [MemberBinding]) {
    members.sort_by(|a, b| {
        a.weak
            .cmp(&b.weak)
            .then_with(|| a.pattern.cmp(&b.pattern))
            .then_with(|| a.owner.cmp(&b.owner))
    });
}

/// Write the report as pretty JSON; `-` means stdout.
pub(crate) fn write_report(path: &Path, report: &BindingReport) -> Result<()> {
    let mut writer: Box<dyn Write> = if path == Path::new("-") {
        Box::new(io::stdout())
    } else {
        Box::new(File::create(path).with_context(|| format!("failed to open {}", path.display()))?)
    };
    serde_json::to_writer_pretty(&mut writer, report).context("failed to serialize binding report")?;
    writer
        .write_all(b"\n")
        .context("failed to write binding report")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ident::Ident;
    use crate::ir::ACC_PUBLIC;
    use crate::test_harness::ModelBuilder;

    #[test]
    fn bindings_are_sorted_by_weak_name() {
        let mut model = ModelBuilder::new();
        let first = model.class("p/First", None);
        let second = model.class("p/Second", None);
        let run = model.method(second, "run", "()V", ACC_PUBLIC, Vec::new());
        let size = model.field(first, "size", "I", ACC_PUBLIC);
        let classes = model.finish();

        let mut scope = Scope::default();
        assert!(scope.bind_class("~Z", first));
        assert!(scope.bind_class("~A", second));
        assert!(scope.bind_method(&classes, second, &MemberKey::new(&Ident::parse("~go"), "()V"), run));
        assert!(scope.bind_field(&classes, first, &MemberKey::new(&Ident::parse("~n"), "I"), size));

        let bindings = PatchBindings::collect("fix.patch", &classes, &scope);
        assert_eq!(bindings.classes, vec![
            ClassBinding {
                weak: "~A".to_string(),
                name: "p/Second".to_string()
            },
            ClassBinding {
                weak: "~Z".to_string(),
                name: "p/First".to_string()
            },
        ]);
        assert_eq!(bindings.methods[0].owner, "p/Second");
        assert_eq!(bindings.methods[0].name, "run");
        assert_eq!(bindings.fields[0].name, "size");
    }

    #[test]
    fn report_is_written_as_json() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("bindings.json");
        let classes = ModelBuilder::new().finish();
        let report = BindingReport {
            patches: vec![PatchBindings::collect("a.patch", &classes, &Scope::default())],
        };
        write_report(&path, &report).expect("write");
        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).expect("read")).expect("json");
        assert_eq!(value["patches"][0]["patch"], "a.patch");
        assert!(value["patches"][0]["classes"].as_array().expect("classes").is_empty());
    }
}
