//! Patch-syntax projection of a class. The output parses back as a
//! match-only script that accepts the class it came from.

use std::fmt::Write;

use crate::classset::ClassSet;
use crate::instruction::{LabelNames, quote_string, render, render_try_catch};
use crate::ir::{ACC_PRIVATE, ACC_PROTECTED, ACC_STATIC, ClassId, Constant, OBJECT_CLASS};

const MEMBER: &str = "    ";
const BODY: &str = "        ";
const META: &str = "            ";

pub(crate) fn disassemble(classes: &ClassSet, id: ClassId) -> String {
    let class = classes.class(id);
    let mut out = String::new();
    let _ = writeln!(out, ".class {}", class.name);
    if let Some(super_name) = class.super_name.as_deref().filter(|name| *name != OBJECT_CLASS) {
        let _ = writeln!(out, "{MEMBER}.super {super_name}");
    }
    for interface in &class.interfaces {
        let _ = writeln!(out, "{MEMBER}.interface {interface}");
    }

    for field in classes.field_candidates(id) {
        let field = classes.field(field);
        let _ = write!(out, "{MEMBER}.field {} {}", field.name, field.descriptor);
        if field.access & ACC_STATIC != 0 {
            out.push_str(" static");
        }
        if field.access & ACC_PRIVATE != 0 {
            out.push_str(" private");
        }
        if let Some(value) = &field.value {
            let _ = write!(out, " {}", constant_literal(value));
        }
        out.push('\n');
    }

    for &method in &class.methods {
        let method = classes.method(method);
        let Some(code) = &method.code else {
            continue;
        };
        if method.hidden {
            continue;
        }
        let _ = write!(out, "{MEMBER}.method {} {}", method.name, method.descriptor);
        for (flag, word) in [
            (ACC_STATIC, "static"),
            (ACC_PRIVATE, "private"),
            (ACC_PROTECTED, "protected"),
        ] {
            if method.access & flag != 0 {
                let _ = write!(out, " {word}");
            }
        }
        out.push('\n');

        let names = LabelNames::for_code(code);
        for region in &code.try_catches {
            let _ = writeln!(out, "{BODY}.{}", render_try_catch(region, &names));
        }
        for insn in &code.insns {
            let Some(rendered) = render(insn, &names) else {
                continue;
            };
            if rendered.comment {
                let _ = writeln!(out, "{BODY}// {}", rendered.line);
                continue;
            }
            let _ = writeln!(out, "{BODY}.{}", rendered.line);
            for meta in &rendered.meta {
                let _ = writeln!(out, "{META}{meta}");
            }
            if let Some(end) = rendered.end {
                let _ = writeln!(out, "{BODY}.end-{end}");
            }
        }
        let _ = writeln!(out, "{MEMBER}.end-method");
    }
    out.push_str(".end-class\n");
    out
}

fn constant_literal(value: &Constant) -> String {
    match value {
        Constant::Int(value) => value.to_string(),
        Constant::Long(value) => value.to_string(),
        Constant::Float(value) => format!("{value:?}"),
        Constant::Double(value) => format!("{value:?}"),
        Constant::String(value) => quote_string(value),
        Constant::Class(value) => value.clone(),
    }
}
