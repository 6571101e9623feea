use std::collections::BTreeSet;
use std::fs;
use std::io::Write;
use std::path::Path;

use crate::classpath::ClasspathIndex;
use crate::classset::ClassSet;
use crate::ir::{
    ACC_PUBLIC, ACC_SUPER, Class, ClassId, Code, Field, FieldId, Insn, Method, MethodId,
    OBJECT_CLASS,
};

/// Builds an in-memory model without going through class files. Every
/// method gets a body, and the label counter starts past the highest label
/// the body places or references.
pub(crate) struct ModelBuilder {
    classes: ClassSet,
}

impl ModelBuilder {
    pub(crate) fn new() -> Self {
        Self {
            classes: ClassSet::new(ClasspathIndex::default()),
        }
    }

    pub(crate) fn class(&mut self, name: &str, super_name: Option<&str>) -> ClassId {
        let super_name = super_name.unwrap_or(OBJECT_CLASS).to_string();
        self.classes
            .add_class(Class::new(name, Some(super_name), ACC_PUBLIC | ACC_SUPER))
    }

    pub(crate) fn method(
        &mut self,
        class: ClassId,
        name: &str,
        descriptor: &str,
        access: u16,
        insns: Vec<Insn>,
    ) -> MethodId {
        let next_label = insns
            .iter()
            .flat_map(|insn| match insn {
                Insn::Label(label) => vec![*label],
                other => other.branch_targets(),
            })
            .map(|label| label.0 + 1)
            .max()
            .unwrap_or(0);
        self.classes.add_method(class, Method {
            class,
            name: name.to_string(),
            descriptor: descriptor.to_string(),
            access,
            owners: BTreeSet::new(),
            hidden: false,
            exceptions: Vec::new(),
            code: Some(Code {
                insns,
                next_label,
                ..Code::default()
            }),
        })
    }

    pub(crate) fn field(&mut self, class: ClassId, name: &str, descriptor: &str, access: u16) -> FieldId {
        self.classes.add_field(class, Field {
            class,
            name: name.to_string(),
            descriptor: descriptor.to_string(),
            access,
            owners: BTreeSet::new(),
            hidden: false,
            value: None,
        })
    }

    /// Built classes start out unmodified, like classes read from disk.
    pub(crate) fn finish(mut self) -> ClassSet {
        let ids: Vec<ClassId> = self.classes.class_ids().collect();
        for id in ids {
            self.classes.class_mut(id).modified = false;
        }
        self.classes
    }
}

/// Minimal class file writer for decoder tests.
pub(crate) struct ClassFileBuilder {
    cp: Vec<CpEntry>,
    this_class: u16,
    super_class: u16,
    fields: Vec<MemberSpec>,
    methods: Vec<MemberSpec>,
}

/// Field or method definition; `code` is `(max_stack, max_locals, bytes)`.
struct MemberSpec {
    access: u16,
    name_index: u16,
    descriptor_index: u16,
    constant: Option<u16>,
    code: Option<(u16, u16, Vec<u8>)>,
}

enum CpEntry {
    Utf8(String),
    Integer(i32),
    Class(u16),
    NameAndType(u16, u16),
    FieldRef(u16, u16),
    MethodRef(u16, u16),
}

impl ClassFileBuilder {
    pub(crate) fn new(class_name: &str, super_name: Option<&str>) -> Self {
        let mut builder = Self {
            cp: Vec::new(),
            this_class: 0,
            super_class: 0,
            fields: Vec::new(),
            methods: Vec::new(),
        };
        builder.this_class = builder.add_class(class_name);
        if let Some(super_name) = super_name {
            builder.super_class = builder.add_class(super_name);
        }
        builder
    }

    fn push(&mut self, entry: CpEntry) -> u16 {
        self.cp.push(entry);
        self.cp.len() as u16
    }

    fn add_utf8(&mut self, value: &str) -> u16 {
        self.push(CpEntry::Utf8(value.to_string()))
    }

    pub(crate) fn add_class(&mut self, name: &str) -> u16 {
        let name_index = self.add_utf8(name);
        self.push(CpEntry::Class(name_index))
    }

    fn add_name_and_type(&mut self, name: &str, descriptor: &str) -> u16 {
        let name_index = self.add_utf8(name);
        let descriptor_index = self.add_utf8(descriptor);
        self.push(CpEntry::NameAndType(name_index, descriptor_index))
    }

    pub(crate) fn field_ref(&mut self, class: &str, name: &str, descriptor: &str) -> u16 {
        let class_index = self.add_class(class);
        let name_and_type = self.add_name_and_type(name, descriptor);
        self.push(CpEntry::FieldRef(class_index, name_and_type))
    }

    pub(crate) fn method_ref(&mut self, class: &str, name: &str, descriptor: &str) -> u16 {
        let class_index = self.add_class(class);
        let name_and_type = self.add_name_and_type(name, descriptor);
        self.push(CpEntry::MethodRef(class_index, name_and_type))
    }

    pub(crate) fn add_field(&mut self, access: u16, name: &str, descriptor: &str, value: Option<i32>) {
        let name_index = self.add_utf8(name);
        let descriptor_index = self.add_utf8(descriptor);
        let constant = value.map(|value| self.push(CpEntry::Integer(value)));
        self.fields.push(MemberSpec {
            access,
            name_index,
            descriptor_index,
            constant,
            code: None,
        });
    }

    pub(crate) fn add_method(
        &mut self,
        access: u16,
        name: &str,
        descriptor: &str,
        code: Option<(u16, u16, Vec<u8>)>,
    ) {
        let name_index = self.add_utf8(name);
        let descriptor_index = self.add_utf8(descriptor);
        self.methods.push(MemberSpec {
            access,
            name_index,
            descriptor_index,
            constant: None,
            code,
        });
    }

    pub(crate) fn build(mut self) -> Vec<u8> {
        let code_index = self.add_utf8("Code");
        let constant_index = self.add_utf8("ConstantValue");

        let mut bytes = Vec::new();
        write_u32(&mut bytes, 0xCAFEBABE);
        write_u16(&mut bytes, 0);
        write_u16(&mut bytes, 50);
        write_u16(&mut bytes, (self.cp.len() + 1) as u16);
        for entry in &self.cp {
            entry.write(&mut bytes);
        }
        write_u16(&mut bytes, ACC_PUBLIC | ACC_SUPER);
        write_u16(&mut bytes, self.this_class);
        write_u16(&mut bytes, self.super_class);
        write_u16(&mut bytes, 0);

        write_u16(&mut bytes, self.fields.len() as u16);
        for field in &self.fields {
            field.write_header(&mut bytes);
            match field.constant {
                Some(index) => {
                    write_u16(&mut bytes, 1);
                    write_u16(&mut bytes, constant_index);
                    write_u32(&mut bytes, 2);
                    write_u16(&mut bytes, index);
                }
                None => write_u16(&mut bytes, 0),
            }
        }

        write_u16(&mut bytes, self.methods.len() as u16);
        for method in &self.methods {
            method.write_header(&mut bytes);
            let Some((max_stack, max_locals, code)) = &method.code else {
                write_u16(&mut bytes, 0);
                continue;
            };
            write_u16(&mut bytes, 1);
            write_u16(&mut bytes, code_index);
            write_u32(&mut bytes, 12 + code.len() as u32);
            write_u16(&mut bytes, *max_stack);
            write_u16(&mut bytes, *max_locals);
            write_u32(&mut bytes, code.len() as u32);
            bytes.extend_from_slice(code);
            write_u16(&mut bytes, 0);
            write_u16(&mut bytes, 0);
        }
        write_u16(&mut bytes, 0);
        bytes
    }
}

impl MemberSpec {
    fn write_header(&self, bytes: &mut Vec<u8>) {
        write_u16(bytes, self.access);
        write_u16(bytes, self.name_index);
        write_u16(bytes, self.descriptor_index);
    }
}

impl CpEntry {
    fn write(&self, bytes: &mut Vec<u8>) {
        match self {
            CpEntry::Utf8(value) => {
                bytes.push(1);
                write_u16(bytes, value.len() as u16);
                bytes.extend_from_slice(value.as_bytes());
            }
            CpEntry::Integer(value) => {
                bytes.push(3);
                bytes.extend_from_slice(&value.to_be_bytes());
            }
            CpEntry::Class(name_index) => {
                bytes.push(7);
                write_u16(bytes, *name_index);
            }
            CpEntry::NameAndType(name_index, descriptor_index) => {
                bytes.push(12);
                write_u16(bytes, *name_index);
                write_u16(bytes, *descriptor_index);
            }
            CpEntry::FieldRef(class_index, name_and_type) => {
                bytes.push(9);
                write_u16(bytes, *class_index);
                write_u16(bytes, *name_and_type);
            }
            CpEntry::MethodRef(class_index, name_and_type) => {
                bytes.push(10);
                write_u16(bytes, *class_index);
                write_u16(bytes, *name_and_type);
            }
        }
    }
}

fn write_u16(bytes: &mut Vec<u8>, value: u16) {
    bytes.extend_from_slice(&value.to_be_bytes());
}

fn write_u32(bytes: &mut Vec<u8>, value: u32) {
    bytes.extend_from_slice(&value.to_be_bytes());
}

/// Write a jar holding the given entries.
pub(crate) fn write_jar(path: &Path, entries: &[(&str, &[u8])]) {
    let file = fs::File::create(path).expect("create jar");
    let mut writer = zip::ZipWriter::new(file);
    for (name, bytes) in entries {
        writer
            .start_file(*name, zip::write::SimpleFileOptions::default())
            .expect("start jar entry");
        writer.write_all(bytes).expect("write jar entry");
    }
    writer.finish().expect("finish jar");
}

/// Store a class as `<dir>/<internal name>.class`.
pub(crate) fn write_class(dir: &Path, name: &str, bytes: &[u8]) -> std::path::PathBuf {
    let path = dir.join(format!("{name}.class"));
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("create package dir");
    }
    fs::write(&path, bytes).expect("write class");
    path
}
