use std::collections::{BTreeMap, BTreeSet};

use crate::descriptor::newarray_type;
use crate::ir::{Code, Constant, Insn, LabelId};
use crate::opcodes;

use super::{InsnKind, quote_string};

/// Names for the labels a body references, assigned in first-use order as
/// `label-A`, `label-B`, ... `label-Z`, `label-BA`.
#[derive(Debug, Default)]
pub(crate) struct LabelNames {
    names: BTreeMap<LabelId, String>,
}

impl LabelNames {
    /// Name every label that an exception region or branch refers to. Region
    /// labels come first because regions are printed before the body.
    pub(crate) fn for_code(code: &Code) -> Self {
        let mut referenced = BTreeSet::new();
        for region in &code.try_catches {
            referenced.extend([region.start, region.end, region.handler]);
        }
        for insn in &code.insns {
            referenced.extend(insn.branch_targets());
        }

        let mut names = LabelNames::default();
        for region in &code.try_catches {
            for label in [region.start, region.end, region.handler] {
                names.assign(label);
            }
        }
        for insn in &code.insns {
            match insn {
                Insn::Label(label) if referenced.contains(label) => names.assign(*label),
                other => {
                    for label in other.branch_targets() {
                        names.assign(label);
                    }
                }
            }
        }
        names
    }

    fn assign(&mut self, label: LabelId) {
        let next = self.names.len();
        self.names.entry(label).or_insert_with(|| label_name(next));
    }

    pub(crate) fn get(&self, label: LabelId) -> Option<&str> {
        self.names.get(&label).map(String::as_str)
    }

    fn operand(&self, label: LabelId) -> String {
        match self.get(label) {
            Some(name) => format!("~{name}"),
            None => format!("~label-{}", label.0),
        }
    }
}

fn label_name(index: usize) -> String {
    let mut digits = Vec::new();
    let mut rest = index;
    loop {
        digits.push(char::from(b'A' + (rest % 26) as u8));
        rest /= 26;
        if rest == 0 {
            break;
        }
    }
    let suffix: String = digits.into_iter().rev().collect();
    format!("label-{suffix}")
}

/// One rendered instruction. `meta` lines and the closing `end-` line are
/// only used by switches.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct Rendered {
    pub(crate) line: String,
    pub(crate) meta: Vec<String>,
    pub(crate) end: Option<&'static str>,
    /// Printed as a comment because the language cannot express it.
    pub(crate) comment: bool,
}

impl Rendered {
    fn plain(line: String) -> Self {
        Self {
            line,
            meta: Vec::new(),
            end: None,
            comment: false,
        }
    }
}

/// Render an instruction in patch syntax without the leading mode prefix.
/// Line markers and unreferenced labels render as nothing.
pub(crate) fn render(insn: &Insn, names: &LabelNames) -> Option<Rendered> {
    let line = match insn {
        Insn::Line(_) => return None,
        Insn::Label(label) => format!("label ~{}", names.get(*label)?),
        Insn::Simple(opcode) if (opcodes::IRETURN..=opcodes::RETURN).contains(opcode) => {
            "return".to_string()
        }
        Insn::Simple(opcode) => match InsnKind::Single(*opcode).name() {
            Some(name) => name.to_string(),
            None => return Some(unsupported(&format!("opcode 0x{opcode:02x}"))),
        },
        Insn::Push(constant) => match constant {
            Constant::Int(value) => format!("push-int {value}"),
            Constant::Long(value) => format!("push-long {value}"),
            Constant::Float(value) => format!("push-float {value:?}"),
            Constant::Double(value) => format!("push-double {value:?}"),
            Constant::String(value) => format!("push-string {}", quote_string(value)),
            Constant::Class(class) => format!("push-class {class}"),
        },
        Insn::Var { opcode, index } => {
            let name = InsnKind::Var(*opcode).name()?;
            format!("{name} {index}")
        }
        Insn::Iinc { index, delta } => format!("inc-int {index} {delta}"),
        Insn::Field {
            opcode,
            owner,
            name,
            descriptor,
        } => {
            let mnemonic = InsnKind::Field(*opcode).name()?;
            format!("{mnemonic} {owner} {name} {descriptor}")
        }
        Insn::Invoke {
            opcode,
            owner,
            name,
            descriptor,
            ..
        } => {
            let mnemonic = InsnKind::Invoke(*opcode).name()?;
            format!("{mnemonic} {owner} {name} {descriptor}")
        }
        Insn::Type {
            opcode: opcodes::ANEWARRAY,
            class,
        } => {
            if class.starts_with('[') {
                format!("new-array {class}")
            } else {
                format!("new-array L{class};")
            }
        }
        Insn::Type { opcode, class } => {
            let mnemonic = InsnKind::Type(*opcode).name()?;
            format!("{mnemonic} {class}")
        }
        Insn::NewArray(code) => match newarray_type(*code) {
            Some(ty) => format!("new-array {ty}"),
            None => return Some(unsupported(&format!("newarray type {code}"))),
        },
        Insn::MultiNewArray { descriptor, dims } => format!("new-array-multi {descriptor} {dims}"),
        Insn::Jump { opcode, target } => {
            let mnemonic = InsnKind::Jump(*opcode).name()?;
            format!("{mnemonic} {}", names.operand(*target))
        }
        Insn::TableSwitch {
            low,
            high,
            default,
            targets,
        } => {
            return Some(Rendered {
                line: format!("switch-table {low} {high} {}", names.operand(*default)),
                meta: targets.iter().map(|label| names.operand(*label)).collect(),
                end: Some("switch-table"),
                comment: false,
            });
        }
        Insn::LookupSwitch { default, pairs } => {
            return Some(Rendered {
                line: format!("switch-lookup {}", names.operand(*default)),
                meta: pairs
                    .iter()
                    .map(|(key, label)| format!("{key}:{}", names.operand(*label)))
                    .collect(),
                end: Some("switch-lookup"),
                comment: false,
            });
        }
        Insn::Opaque { detail, .. } => return Some(unsupported(detail)),
    };
    Some(Rendered::plain(line))
}

fn unsupported(detail: &str) -> Rendered {
    Rendered {
        line: format!("unsupported {detail}"),
        meta: Vec::new(),
        end: None,
        comment: true,
    }
}

/// Render an exception region as a `try-catch` line.
pub(crate) fn render_try_catch(region: &crate::ir::TryCatch, names: &LabelNames) -> String {
    format!(
        "try-catch {} {} {} {}",
        names.operand(region.start),
        names.operand(region.end),
        names.operand(region.handler),
        region.catch_type.as_deref().unwrap_or("null")
    )
}
