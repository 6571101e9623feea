//! Patch script model and its line-oriented parser.

mod reader;

use jdescriptor::{MethodDescriptor, TypeDescriptor};

use crate::descriptor::{parse_method, parse_type};
use crate::error::PatchError;
use crate::ident::Ident;
use crate::instruction::{InsnKind, PatchOp, parse_string};
use crate::ir::Constant;

use self::reader::{Command, LineReader};

/// Line prefix mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Mode {
    Match,
    Add,
    Remove,
}

impl Mode {
    pub(crate) fn from_prefix(prefix: char) -> Option<Self> {
        match prefix {
            '.' => Some(Mode::Match),
            '+' => Some(Mode::Add),
            '-' => Some(Mode::Remove),
            _ => None,
        }
    }

    pub(crate) fn prefix(self) -> char {
        match self {
            Mode::Match => '.',
            Mode::Add => '+',
            Mode::Remove => '-',
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ClassKind {
    Class,
    Interface,
    Enum,
}

impl ClassKind {
    fn from_command(name: &str) -> Option<Self> {
        match name {
            "class" => Some(ClassKind::Class),
            "interface" => Some(ClassKind::Interface),
            "enum" => Some(ClassKind::Enum),
            _ => None,
        }
    }

    pub(crate) fn keyword(self) -> &'static str {
        match self {
            ClassKind::Class => "class",
            ClassKind::Interface => "interface",
            ClassKind::Enum => "enum",
        }
    }
}

/// A parsed patch script.
#[derive(Clone, Debug, Default)]
pub(crate) struct PatchScript {
    pub(crate) classes: Vec<PatchClass>,
}

#[derive(Clone, Debug)]
pub(crate) struct PatchClass {
    pub(crate) kind: ClassKind,
    pub(crate) ident: Ident,
    pub(crate) mode: Mode,
    pub(crate) line: usize,
    pub(crate) supers: Vec<ClassModifier>,
    pub(crate) interfaces: Vec<ClassModifier>,
    pub(crate) fields: Vec<PatchField>,
    pub(crate) methods: Vec<PatchMethod>,
}

impl PatchClass {
    pub(crate) fn describe(&self) -> String {
        format!("{} {}", self.kind.keyword(), self.ident)
    }
}

/// A `super` or `interface` line inside a class block.
#[derive(Clone, Debug)]
pub(crate) struct ClassModifier {
    pub(crate) ident: Ident,
    pub(crate) mode: Mode,
}

#[derive(Clone, Debug)]
pub(crate) struct PatchField {
    pub(crate) ident: Ident,
    pub(crate) raw_descriptor: String,
    pub(crate) descriptor: TypeDescriptor,
    pub(crate) mode: Mode,
    pub(crate) is_static: bool,
    pub(crate) is_private: bool,
    pub(crate) value: Option<Constant>,
    pub(crate) line: usize,
}

impl PatchField {
    pub(crate) fn describe(&self, owner: &PatchClass) -> String {
        format!("field {}.{} {}", owner.ident, self.ident, self.raw_descriptor)
    }
}

#[derive(Clone, Debug)]
pub(crate) struct PatchMethod {
    pub(crate) ident: Ident,
    pub(crate) raw_descriptor: String,
    pub(crate) descriptor: MethodDescriptor,
    pub(crate) mode: Mode,
    pub(crate) is_static: bool,
    pub(crate) is_private: bool,
    pub(crate) is_protected: bool,
    pub(crate) instructions: Vec<PatchInstruction>,
    pub(crate) line: usize,
}

impl PatchMethod {
    pub(crate) fn describe(&self, owner: &PatchClass) -> String {
        format!("method {}.{} {}", owner.ident, self.ident, self.raw_descriptor)
    }
}

#[derive(Clone, Debug)]
pub(crate) struct PatchInstruction {
    pub(crate) mode: Mode,
    pub(crate) kind: InsnKind,
    pub(crate) op: PatchOp,
    pub(crate) line: usize,
    /// Source text, kept for diagnostics.
    pub(crate) text: String,
}

/// Parse a complete patch script.
pub(crate) fn parse_script(text: &str) -> Result<PatchScript, PatchError> {
    let mut reader = LineReader::new(text);
    let mut script = PatchScript::default();
    while let Some((line, raw)) = reader.next_significant() {
        let command = Command::parse(raw).map_err(|err| PatchError::validate(line, err))?;
        let kind = ClassKind::from_command(&command.name).ok_or_else(|| {
            PatchError::validate(line, format!("Unexpected {}", command.name))
        })?;
        script
            .classes
            .push(parse_class(&mut reader, &command, kind, line)?);
    }
    Ok(script)
}

fn parse_class(
    reader: &mut LineReader<'_>,
    command: &Command<'_>,
    kind: ClassKind,
    line: usize,
) -> Result<PatchClass, PatchError> {
    if command.args.len() != 1 {
        return Err(PatchError::validate(
            line,
            format!("Incorrect number of arguments for {}", kind.keyword()),
        ));
    }
    let mut class = PatchClass {
        kind,
        ident: Ident::parse(command.args[0]),
        mode: command.mode,
        line,
        supers: Vec::new(),
        interfaces: Vec::new(),
        fields: Vec::new(),
        methods: Vec::new(),
    };
    let terminator = format!("end-{}", kind.keyword());

    loop {
        let Some((line, raw)) = reader.next_significant() else {
            return Err(PatchError::validate(
                reader.line_number(),
                format!("Missing {}{terminator}", class.mode.prefix()),
            ));
        };
        let inner = Command::parse(raw).map_err(|err| PatchError::validate(line, err))?;
        check_nested_mode(class.mode, inner.mode, "classes", line)?;
        match inner.name.as_str() {
            name if name == terminator => break,
            "super" | "interface" => {
                if inner.args.len() != 1 {
                    return Err(PatchError::validate(
                        line,
                        format!("Incorrect number of arguments for {}", inner.name),
                    ));
                }
                let modifier = ClassModifier {
                    ident: Ident::parse(inner.args[0]),
                    mode: inner.mode,
                };
                if inner.name == "super" {
                    class.supers.push(modifier);
                } else {
                    class.interfaces.push(modifier);
                }
            }
            "field" => class.fields.push(parse_field(&inner, line)?),
            "method" => class.methods.push(parse_method_block(reader, &inner, line)?),
            other => {
                return Err(PatchError::validate(line, format!("Unexpected {other}")));
            }
        }
    }
    Ok(class)
}

fn check_nested_mode(outer: Mode, inner: Mode, what: &str, line: usize) -> Result<(), PatchError> {
    match outer {
        Mode::Add if inner != Mode::Add => Err(PatchError::validate(
            line,
            format!("In added {what} everything must be +"),
        )),
        Mode::Remove if inner != Mode::Remove => Err(PatchError::validate(
            line,
            format!("In removed {what} everything must be -"),
        )),
        _ => Ok(()),
    }
}

fn parse_field(command: &Command<'_>, line: usize) -> Result<PatchField, PatchError> {
    if command.args.len() < 2 {
        return Err(PatchError::validate(
            line,
            "Incorrect number of arguments for field",
        ));
    }
    let raw_descriptor = command.args[1].to_string();
    let descriptor = parse_type(&raw_descriptor).map_err(|err| PatchError::validate(line, err))?;
    if descriptor == TypeDescriptor::Void {
        return Err(PatchError::validate(line, "Fields cannot be void"));
    }

    let mut is_static = false;
    let mut is_private = false;
    let mut value_start = None;
    for (index, arg) in command.args.iter().enumerate().skip(2) {
        if arg.eq_ignore_ascii_case("static") {
            is_static = true;
        } else if arg.eq_ignore_ascii_case("private") {
            is_private = true;
        } else if *arg == "=" {
            value_start = Some(index + 1);
            break;
        } else {
            value_start = Some(index);
            break;
        }
    }

    let value = match value_start {
        Some(index) => {
            let text = command.rest_from(index).trim();
            if text.is_empty() {
                return Err(PatchError::validate(line, "Missing constant value"));
            }
            Some(parse_constant(&descriptor, text).map_err(|err| PatchError::validate(line, err))?)
        }
        None => None,
    };

    Ok(PatchField {
        ident: Ident::parse(command.args[0]),
        raw_descriptor,
        descriptor,
        mode: command.mode,
        is_static,
        is_private,
        value,
        line,
    })
}

/// Interpret a field constant according to the field's type.
fn parse_constant(descriptor: &TypeDescriptor, text: &str) -> Result<Constant, String> {
    fn number<T: std::str::FromStr>(text: &str) -> Result<T, String> {
        text.parse()
            .map_err(|_| format!("Invalid constant '{text}' for field type"))
    }
    let value = match descriptor {
        TypeDescriptor::Boolean
        | TypeDescriptor::Byte
        | TypeDescriptor::Char
        | TypeDescriptor::Short
        | TypeDescriptor::Integer => Constant::Int(number(text)?),
        TypeDescriptor::Long => Constant::Long(number(text.trim_end_matches(['l', 'L']))?),
        TypeDescriptor::Float => Constant::Float(number(text.trim_end_matches(['f', 'F']))?),
        TypeDescriptor::Double => Constant::Double(number(text.trim_end_matches(['d', 'D']))?),
        TypeDescriptor::Object(name) if name == "java/lang/String" => {
            Constant::String(parse_string(text)?)
        }
        other => return Err(format!("Constant values are not supported for {other}")),
    };
    Ok(value)
}

fn parse_method_block(
    reader: &mut LineReader<'_>,
    command: &Command<'_>,
    line: usize,
) -> Result<PatchMethod, PatchError> {
    if command.args.len() < 2 {
        return Err(PatchError::validate(
            line,
            "Incorrect number of arguments for method",
        ));
    }
    let raw_descriptor = command.args[1].to_string();
    let descriptor =
        parse_method(&raw_descriptor).map_err(|err| PatchError::validate(line, err))?;

    let mut method = PatchMethod {
        ident: Ident::parse(command.args[0]),
        raw_descriptor,
        descriptor,
        mode: command.mode,
        is_static: false,
        is_private: false,
        is_protected: false,
        instructions: Vec::new(),
        line,
    };
    for arg in &command.args[2..] {
        match arg.to_ascii_lowercase().as_str() {
            "static" => method.is_static = true,
            "private" => method.is_private = true,
            "protected" => method.is_protected = true,
            _ => return Err(PatchError::validate(line, format!("Unexpected {arg}"))),
        }
    }

    loop {
        let Some((line, raw)) = reader.next_significant() else {
            return Err(PatchError::validate(
                reader.line_number(),
                format!("Missing {}end-method", method.mode.prefix()),
            ));
        };
        let inner = Command::parse(raw).map_err(|err| PatchError::validate(line, err))?;
        check_nested_mode(method.mode, inner.mode, "methods", line)?;
        if inner.name == "end-method" {
            break;
        }
        let instruction = parse_instruction(reader, &inner, raw, line)?;
        method.instructions.push(instruction);
    }
    Ok(method)
}

fn parse_instruction(
    reader: &mut LineReader<'_>,
    command: &Command<'_>,
    raw: &str,
    line: usize,
) -> Result<PatchInstruction, PatchError> {
    let kind = InsnKind::from_name(&command.name)
        .ok_or_else(|| PatchError::validate(line, format!("Unknown instruction {}", command.name)))?;

    let mut meta = Vec::new();
    if kind.takes_meta() {
        let terminator = format!("{}end-{}", command.mode.prefix(), command.name);
        loop {
            let Some((_, meta_line)) = reader.next_significant() else {
                return Err(PatchError::validate(
                    reader.line_number(),
                    format!("Missing {terminator}"),
                ));
            };
            if meta_line.eq_ignore_ascii_case(&terminator) {
                break;
            }
            meta.push(meta_line.to_string());
        }
    }

    let op = PatchOp::compile(kind, &command.args, command.rest_from(0), &meta)
        .map_err(|err| PatchError::validate(line, err))?;
    match command.mode {
        Mode::Add => op
            .check_synthesizable()
            .map_err(|err| PatchError::validate(line, err))?,
        Mode::Remove if matches!(op, PatchOp::Any | PatchOp::Label(_)) => {
            return Err(PatchError::validate(
                line,
                format!("{} cannot be removed", command.name),
            ));
        }
        _ => {}
    }

    Ok(PatchInstruction {
        mode: command.mode,
        kind,
        op,
        line,
        text: raw.to_string(),
    })
}
