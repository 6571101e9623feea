//! Instruction patterns: the mnemonic table, typed operands, and the
//! match / synthesize / render operations for every instruction family.

mod matching;
mod render;
mod synth;

pub(crate) use matching::{MatchContext, matches, match_try_catch};
pub(crate) use render::{LabelNames, render, render_try_catch};
pub(crate) use synth::{SynthContext, synthesize, synthesize_try_catch};

use jdescriptor::{MethodDescriptor, TypeDescriptor};

use crate::descriptor::{parse_method, parse_object_type, parse_type};
use crate::ident::Ident;
use crate::opcodes;

/// Instruction family selected by a mnemonic.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum InsnKind {
    Any,
    Label,
    PushInt,
    PushLong,
    PushFloat,
    PushDouble,
    PushString,
    PushClass,
    Single(u8),
    Var(u8),
    IncInt,
    Jump(u8),
    SwitchTable,
    SwitchLookup,
    TryCatch,
    Return,
    Field(u8),
    Invoke(u8),
    Type(u8),
    NewArray,
    NewArrayMulti,
}

const MNEMONICS: &[(&str, InsnKind)] = &[
    ("any", InsnKind::Any),
    ("label", InsnKind::Label),
    ("nop", InsnKind::Single(opcodes::NOP)),
    ("push-null", InsnKind::Single(opcodes::ACONST_NULL)),
    ("push-int", InsnKind::PushInt),
    ("push-long", InsnKind::PushLong),
    ("push-float", InsnKind::PushFloat),
    ("push-double", InsnKind::PushDouble),
    ("try-catch", InsnKind::TryCatch),
    ("push-string", InsnKind::PushString),
    ("push-class", InsnKind::PushClass),
    ("load-int", InsnKind::Var(opcodes::ILOAD)),
    ("load-long", InsnKind::Var(opcodes::LLOAD)),
    ("load-float", InsnKind::Var(opcodes::FLOAD)),
    ("load-double", InsnKind::Var(opcodes::DLOAD)),
    ("load-object", InsnKind::Var(opcodes::ALOAD)),
    ("array-load-int", InsnKind::Single(opcodes::IALOAD)),
    ("array-load-long", InsnKind::Single(opcodes::LALOAD)),
    ("array-load-float", InsnKind::Single(opcodes::FALOAD)),
    ("array-load-double", InsnKind::Single(opcodes::DALOAD)),
    ("array-load-object", InsnKind::Single(opcodes::AALOAD)),
    ("array-load-byte", InsnKind::Single(opcodes::BALOAD)),
    ("array-load-char", InsnKind::Single(opcodes::CALOAD)),
    ("array-load-short", InsnKind::Single(opcodes::SALOAD)),
    ("store-int", InsnKind::Var(opcodes::ISTORE)),
    ("store-long", InsnKind::Var(opcodes::LSTORE)),
    ("store-float", InsnKind::Var(opcodes::FSTORE)),
    ("store-double", InsnKind::Var(opcodes::DSTORE)),
    ("store-object", InsnKind::Var(opcodes::ASTORE)),
    ("array-store-int", InsnKind::Single(opcodes::IASTORE)),
    ("array-store-long", InsnKind::Single(opcodes::LASTORE)),
    ("array-store-float", InsnKind::Single(opcodes::FASTORE)),
    ("array-store-double", InsnKind::Single(opcodes::DASTORE)),
    ("array-store-object", InsnKind::Single(opcodes::AASTORE)),
    ("array-store-byte", InsnKind::Single(opcodes::BASTORE)),
    ("array-store-char", InsnKind::Single(opcodes::CASTORE)),
    ("array-store-short", InsnKind::Single(opcodes::SASTORE)),
    ("pop", InsnKind::Single(opcodes::POP)),
    ("pop2", InsnKind::Single(opcodes::POP2)),
    ("dup", InsnKind::Single(opcodes::DUP)),
    ("dup-x1", InsnKind::Single(opcodes::DUP_X1)),
    ("dup-x2", InsnKind::Single(opcodes::DUP_X2)),
    ("dup2", InsnKind::Single(opcodes::DUP2)),
    ("dup2-x1", InsnKind::Single(opcodes::DUP2_X1)),
    ("dup2-x2", InsnKind::Single(opcodes::DUP2_X2)),
    ("swap", InsnKind::Single(opcodes::SWAP)),
    ("add-int", InsnKind::Single(opcodes::IADD)),
    ("add-long", InsnKind::Single(opcodes::LADD)),
    ("add-float", InsnKind::Single(opcodes::FADD)),
    ("add-double", InsnKind::Single(opcodes::DADD)),
    ("sub-int", InsnKind::Single(opcodes::ISUB)),
    ("sub-long", InsnKind::Single(opcodes::LSUB)),
    ("sub-float", InsnKind::Single(opcodes::FSUB)),
    ("sub-double", InsnKind::Single(opcodes::DSUB)),
    ("mul-int", InsnKind::Single(opcodes::IMUL)),
    ("mul-long", InsnKind::Single(opcodes::LMUL)),
    ("mul-float", InsnKind::Single(opcodes::FMUL)),
    ("mul-double", InsnKind::Single(opcodes::DMUL)),
    ("div-int", InsnKind::Single(opcodes::IDIV)),
    ("div-long", InsnKind::Single(opcodes::LDIV)),
    ("div-float", InsnKind::Single(opcodes::FDIV)),
    ("div-double", InsnKind::Single(opcodes::DDIV)),
    ("rem-int", InsnKind::Single(opcodes::IREM)),
    ("rem-long", InsnKind::Single(opcodes::LREM)),
    ("rem-float", InsnKind::Single(opcodes::FREM)),
    ("rem-double", InsnKind::Single(opcodes::DREM)),
    ("neg-int", InsnKind::Single(opcodes::INEG)),
    ("neg-long", InsnKind::Single(opcodes::LNEG)),
    ("neg-float", InsnKind::Single(opcodes::FNEG)),
    ("neg-double", InsnKind::Single(opcodes::DNEG)),
    ("shift-left-int", InsnKind::Single(opcodes::ISHL)),
    ("shift-left-long", InsnKind::Single(opcodes::LSHL)),
    ("shift-right-int", InsnKind::Single(opcodes::ISHR)),
    ("shift-right-long", InsnKind::Single(opcodes::LSHR)),
    ("ushift-right-int", InsnKind::Single(opcodes::IUSHR)),
    ("ushift-right-long", InsnKind::Single(opcodes::LUSHR)),
    ("and-int", InsnKind::Single(opcodes::IAND)),
    ("and-long", InsnKind::Single(opcodes::LAND)),
    ("or-int", InsnKind::Single(opcodes::IOR)),
    ("or-long", InsnKind::Single(opcodes::LOR)),
    ("xor-int", InsnKind::Single(opcodes::IXOR)),
    ("xor-long", InsnKind::Single(opcodes::LXOR)),
    ("inc-int", InsnKind::IncInt),
    ("convert-int-long", InsnKind::Single(opcodes::I2L)),
    ("convert-int-float", InsnKind::Single(opcodes::I2F)),
    ("convert-int-double", InsnKind::Single(opcodes::I2D)),
    ("convert-long-int", InsnKind::Single(opcodes::L2I)),
    ("convert-long-float", InsnKind::Single(opcodes::L2F)),
    ("convert-long-double", InsnKind::Single(opcodes::L2D)),
    ("convert-float-int", InsnKind::Single(opcodes::F2I)),
    ("convert-float-long", InsnKind::Single(opcodes::F2L)),
    ("convert-float-double", InsnKind::Single(opcodes::F2D)),
    ("convert-double-int", InsnKind::Single(opcodes::D2I)),
    ("convert-double-long", InsnKind::Single(opcodes::D2L)),
    ("convert-double-float", InsnKind::Single(opcodes::D2F)),
    ("convert-int-byte", InsnKind::Single(opcodes::I2B)),
    ("convert-int-char", InsnKind::Single(opcodes::I2C)),
    ("convert-int-short", InsnKind::Single(opcodes::I2S)),
    ("compare-long", InsnKind::Single(opcodes::LCMP)),
    ("compare-float", InsnKind::Single(opcodes::FCMPL)),
    ("compare-float-inv", InsnKind::Single(opcodes::FCMPG)),
    ("compare-double", InsnKind::Single(opcodes::DCMPL)),
    ("compare-double-inv", InsnKind::Single(opcodes::DCMPG)),
    ("if-zero", InsnKind::Jump(opcodes::IFEQ)),
    ("if-not-zero", InsnKind::Jump(opcodes::IFNE)),
    ("if-less-zero", InsnKind::Jump(opcodes::IFLT)),
    ("if-greater-equal-zero", InsnKind::Jump(opcodes::IFGE)),
    ("if-greater-zero", InsnKind::Jump(opcodes::IFGT)),
    ("if-less-equal-zero", InsnKind::Jump(opcodes::IFLE)),
    ("if-equal-int", InsnKind::Jump(opcodes::IF_ICMPEQ)),
    ("if-not-equal-int", InsnKind::Jump(opcodes::IF_ICMPNE)),
    ("if-less-int", InsnKind::Jump(opcodes::IF_ICMPLT)),
    ("if-greater-equal-int", InsnKind::Jump(opcodes::IF_ICMPGE)),
    ("if-greater-int", InsnKind::Jump(opcodes::IF_ICMPGT)),
    ("if-less-equal-int", InsnKind::Jump(opcodes::IF_ICMPLE)),
    ("if-equal-object", InsnKind::Jump(opcodes::IF_ACMPEQ)),
    ("if-not-equal-object", InsnKind::Jump(opcodes::IF_ACMPNE)),
    ("goto", InsnKind::Jump(opcodes::GOTO)),
    ("jsr", InsnKind::Jump(opcodes::JSR)),
    ("ret", InsnKind::Var(opcodes::RET)),
    ("switch-table", InsnKind::SwitchTable),
    ("switch-lookup", InsnKind::SwitchLookup),
    ("return", InsnKind::Return),
    ("get-static", InsnKind::Field(opcodes::GETSTATIC)),
    ("put-static", InsnKind::Field(opcodes::PUTSTATIC)),
    ("get-field", InsnKind::Field(opcodes::GETFIELD)),
    ("put-field", InsnKind::Field(opcodes::PUTFIELD)),
    ("invoke-virtual", InsnKind::Invoke(opcodes::INVOKEVIRTUAL)),
    ("invoke-special", InsnKind::Invoke(opcodes::INVOKESPECIAL)),
    ("invoke-static", InsnKind::Invoke(opcodes::INVOKESTATIC)),
    ("invoke-interface", InsnKind::Invoke(opcodes::INVOKEINTERFACE)),
    ("new", InsnKind::Type(opcodes::NEW)),
    ("new-array", InsnKind::NewArray),
    ("length-array", InsnKind::Single(opcodes::ARRAYLENGTH)),
    ("throw", InsnKind::Single(opcodes::ATHROW)),
    ("check-cast", InsnKind::Type(opcodes::CHECKCAST)),
    ("instance-of", InsnKind::Type(opcodes::INSTANCEOF)),
    ("monitor-enter", InsnKind::Single(opcodes::MONITORENTER)),
    ("monitor-exit", InsnKind::Single(opcodes::MONITOREXIT)),
    ("new-array-multi", InsnKind::NewArrayMulti),
    ("if-null", InsnKind::Jump(opcodes::IFNULL)),
    ("if-not-null", InsnKind::Jump(opcodes::IFNONNULL)),
];

impl InsnKind {
    /// Look up a mnemonic; case and `_`/`-` spelling are not significant.
    pub(crate) fn from_name(name: &str) -> Option<Self> {
        let normalized = name.to_ascii_lowercase().replace('_', "-");
        MNEMONICS
            .iter()
            .find(|(mnemonic, _)| *mnemonic == normalized)
            .map(|(_, kind)| *kind)
    }

    pub(crate) fn name(self) -> Option<&'static str> {
        MNEMONICS
            .iter()
            .find(|(_, kind)| *kind == self)
            .map(|(mnemonic, _)| *mnemonic)
    }

    /// Switches carry extra metadata lines up to their `end-` line.
    pub(crate) fn takes_meta(self) -> bool {
        matches!(self, InsnKind::SwitchTable | InsnKind::SwitchLookup)
    }
}

/// Operand that is either `*` or a concrete value.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Operand<T> {
    Any,
    Is(T),
}

impl<T: PartialEq> Operand<T> {
    pub(crate) fn accepts(&self, value: &T) -> bool {
        match self {
            Operand::Any => true,
            Operand::Is(expected) => expected == value,
        }
    }
}

impl<T> Operand<T> {
    pub(crate) fn value(&self) -> Option<&T> {
        match self {
            Operand::Any => None,
            Operand::Is(value) => Some(value),
        }
    }
}

/// Label operand. Labels are always weak; `*` matches any label.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum LabelRef {
    Any,
    Weak(String),
}

/// Validated operands of one pattern instruction.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum PatchOp {
    Any,
    Label(LabelRef),
    Single(u8),
    PushInt(Operand<i32>),
    PushLong(Operand<i64>),
    PushFloat(Operand<f32>),
    PushDouble(Operand<f64>),
    PushString(Operand<String>),
    PushClass(Operand<TypeDescriptor>),
    Var {
        opcode: u8,
        index: Operand<u16>,
    },
    IncInt {
        index: Operand<u16>,
        delta: Operand<i16>,
    },
    Jump {
        opcode: u8,
        target: LabelRef,
    },
    TableSwitch {
        low: Operand<i32>,
        high: Operand<i32>,
        default: LabelRef,
        targets: Vec<LabelRef>,
    },
    LookupSwitch {
        default: LabelRef,
        cases: Vec<(Operand<i32>, LabelRef)>,
    },
    TryCatch {
        start: LabelRef,
        end: LabelRef,
        handler: LabelRef,
        /// `None` is the catch-all region written as `null`.
        catch_type: Option<TypeDescriptor>,
    },
    Return,
    Field {
        opcode: u8,
        owner: Ident,
        name: Ident,
        descriptor: TypeDescriptor,
        raw_descriptor: String,
    },
    Invoke {
        opcode: u8,
        owner: Ident,
        name: Ident,
        descriptor: MethodDescriptor,
        raw_descriptor: String,
    },
    Type {
        opcode: u8,
        class: Operand<TypeDescriptor>,
    },
    NewArray(Operand<TypeDescriptor>),
    NewArrayMulti {
        descriptor: Operand<TypeDescriptor>,
        dims: Operand<u8>,
    },
}

impl PatchOp {
    /// Validate parameters for `kind` and build the typed operands.
    ///
    /// `text` is the raw remainder of the line after the mnemonic; string
    /// constants are read from it so that inner spacing survives.
    pub(crate) fn compile(
        kind: InsnKind,
        params: &[&str],
        text: &str,
        meta: &[String],
    ) -> Result<Self, String> {
        let op = match kind {
            InsnKind::Any => {
                expect_args("any", params, 0)?;
                PatchOp::Any
            }
            InsnKind::Label => {
                expect_args("label", params, 1)?;
                PatchOp::Label(label_ref(params[0])?)
            }
            InsnKind::Single(opcode) => {
                expect_args(kind.name().unwrap_or("instruction"), params, 0)?;
                PatchOp::Single(opcode)
            }
            InsnKind::PushInt => {
                expect_args("push-int", params, 1)?;
                PatchOp::PushInt(number(params[0])?)
            }
            InsnKind::PushLong => {
                expect_args("push-long", params, 1)?;
                PatchOp::PushLong(number(params[0].trim_end_matches(['l', 'L']))?)
            }
            InsnKind::PushFloat => {
                expect_args("push-float", params, 1)?;
                PatchOp::PushFloat(number(params[0].trim_end_matches(['f', 'F']))?)
            }
            InsnKind::PushDouble => {
                expect_args("push-double", params, 1)?;
                PatchOp::PushDouble(number(params[0].trim_end_matches(['d', 'D']))?)
            }
            InsnKind::PushString => {
                let text = text.trim();
                if text == "*" {
                    PatchOp::PushString(Operand::Any)
                } else {
                    PatchOp::PushString(Operand::Is(parse_string(text)?))
                }
            }
            InsnKind::PushClass => {
                expect_args("push-class", params, 1)?;
                PatchOp::PushClass(object_operand(params[0])?)
            }
            InsnKind::Var(opcode) => {
                expect_args(kind.name().unwrap_or("var"), params, 1)?;
                PatchOp::Var {
                    opcode,
                    index: number(params[0])?,
                }
            }
            InsnKind::IncInt => {
                expect_args("inc-int", params, 2)?;
                PatchOp::IncInt {
                    index: number(params[0])?,
                    delta: number(params[1])?,
                }
            }
            InsnKind::Jump(opcode) => {
                expect_args(kind.name().unwrap_or("jump"), params, 1)?;
                PatchOp::Jump {
                    opcode,
                    target: label_ref(params[0])?,
                }
            }
            InsnKind::SwitchTable => {
                expect_args("switch-table", params, 3)?;
                PatchOp::TableSwitch {
                    low: number(params[0])?,
                    high: number(params[1])?,
                    default: label_ref(params[2])?,
                    targets: meta
                        .iter()
                        .map(|line| label_ref(line.trim()))
                        .collect::<Result<_, _>>()?,
                }
            }
            InsnKind::SwitchLookup => {
                expect_args("switch-lookup", params, 1)?;
                let cases = meta
                    .iter()
                    .map(|line| {
                        let (key, label) = line
                            .split_once(':')
                            .ok_or_else(|| format!("Expected key:label, found '{line}'"))?;
                        Ok((number(key.trim())?, label_ref(label.trim())?))
                    })
                    .collect::<Result<_, String>>()?;
                PatchOp::LookupSwitch {
                    default: label_ref(params[0])?,
                    cases,
                }
            }
            InsnKind::TryCatch => {
                expect_args("try-catch", params, 4)?;
                let catch_type = if params[3] == "null" {
                    None
                } else {
                    Some(parse_object_type(params[3])?)
                };
                PatchOp::TryCatch {
                    start: label_ref(params[0])?,
                    end: label_ref(params[1])?,
                    handler: label_ref(params[2])?,
                    catch_type,
                }
            }
            InsnKind::Return => {
                expect_args("return", params, 0)?;
                PatchOp::Return
            }
            InsnKind::Field(opcode) => {
                expect_args("field instruction", params, 3)?;
                PatchOp::Field {
                    opcode,
                    owner: Ident::parse(params[0]),
                    name: Ident::parse(params[1]),
                    descriptor: parse_type(params[2])?,
                    raw_descriptor: params[2].to_string(),
                }
            }
            InsnKind::Invoke(opcode) => {
                expect_args("invoke instruction", params, 3)?;
                PatchOp::Invoke {
                    opcode,
                    owner: Ident::parse(params[0]),
                    name: Ident::parse(params[1]),
                    descriptor: parse_method(params[2])?,
                    raw_descriptor: params[2].to_string(),
                }
            }
            InsnKind::Type(opcode) => {
                expect_args(kind.name().unwrap_or("type instruction"), params, 1)?;
                PatchOp::Type {
                    opcode,
                    class: object_operand(params[0])?,
                }
            }
            InsnKind::NewArray => {
                expect_args("new-array", params, 1)?;
                if params[0] == "*" {
                    PatchOp::NewArray(Operand::Any)
                } else {
                    let ty = parse_type(params[0])?;
                    if ty == TypeDescriptor::Void {
                        return Err(format!("Invalid type for new-array {}", params[0]));
                    }
                    PatchOp::NewArray(Operand::Is(ty))
                }
            }
            InsnKind::NewArrayMulti => {
                expect_args("new-array-multi", params, 2)?;
                let descriptor = if params[0] == "*" {
                    Operand::Any
                } else {
                    Operand::Is(parse_type(params[0])?)
                };
                PatchOp::NewArrayMulti {
                    descriptor,
                    dims: number(params[1])?,
                }
            }
        };
        Ok(op)
    }

    /// Reject operands that cannot be turned into a concrete instruction.
    pub(crate) fn check_synthesizable(&self) -> Result<(), String> {
        let wildcard = match self {
            PatchOp::Any => return Err("any cannot be added".to_string()),
            PatchOp::Label(label) | PatchOp::Jump { target: label, .. } => *label == LabelRef::Any,
            PatchOp::Single(_) | PatchOp::Return => false,
            PatchOp::PushInt(value) => value.value().is_none(),
            PatchOp::PushLong(value) => value.value().is_none(),
            PatchOp::PushFloat(value) => value.value().is_none(),
            PatchOp::PushDouble(value) => value.value().is_none(),
            PatchOp::PushString(value) => value.value().is_none(),
            PatchOp::PushClass(value) | PatchOp::Type { class: value, .. } => {
                value.value().is_none_or(has_wildcard_type)
            }
            PatchOp::NewArray(value) => value.value().is_none_or(has_wildcard_type),
            PatchOp::Var { index, .. } => index.value().is_none(),
            PatchOp::IncInt { index, delta } => index.value().is_none() || delta.value().is_none(),
            PatchOp::TableSwitch {
                low,
                high,
                default,
                targets,
            } => {
                low.value().is_none()
                    || high.value().is_none()
                    || *default == LabelRef::Any
                    || targets.contains(&LabelRef::Any)
            }
            PatchOp::LookupSwitch { default, cases } => {
                *default == LabelRef::Any
                    || cases
                        .iter()
                        .any(|(key, label)| key.value().is_none() || *label == LabelRef::Any)
            }
            PatchOp::TryCatch {
                start,
                end,
                handler,
                catch_type,
            } => {
                [start, end, handler].contains(&&LabelRef::Any)
                    || catch_type.as_ref().is_some_and(has_wildcard_type)
            }
            PatchOp::Field {
                owner,
                name,
                descriptor,
                ..
            } => owner.is_wildcard() || name.is_wildcard() || has_wildcard_type(descriptor),
            PatchOp::Invoke {
                owner,
                name,
                descriptor,
                ..
            } => {
                owner.is_wildcard()
                    || name.is_wildcard()
                    || descriptor.parameter_types().iter().any(has_wildcard_type)
                    || has_wildcard_type(descriptor.return_type())
            }
            PatchOp::NewArrayMulti { descriptor, dims } => {
                descriptor.value().is_none_or(has_wildcard_type) || dims.value().is_none()
            }
        };
        if wildcard {
            return Err("wildcard operands cannot be added".to_string());
        }
        Ok(())
    }
}

fn has_wildcard_type(ty: &TypeDescriptor) -> bool {
    match ty {
        TypeDescriptor::Object(name) => name == "*" || name == "~*",
        TypeDescriptor::Array(element, _) => has_wildcard_type(element),
        _ => false,
    }
}

fn expect_args(what: &str, params: &[&str], count: usize) -> Result<(), String> {
    if params.len() != count {
        return Err(format!(
            "Incorrect number of arguments for {what}: expected {count}, found {}",
            params.len()
        ));
    }
    Ok(())
}

fn number<T: std::str::FromStr>(token: &str) -> Result<Operand<T>, String>
where
    T::Err: std::fmt::Display,
{
    if token == "*" {
        return Ok(Operand::Any);
    }
    token
        .parse()
        .map(Operand::Is)
        .map_err(|err| format!("Invalid number '{token}': {err}"))
}

fn label_ref(token: &str) -> Result<LabelRef, String> {
    if token == "*" {
        return Ok(LabelRef::Any);
    }
    let ident = Ident::parse(token);
    if !ident.weak {
        return Err(format!("Non-weak label {token}"));
    }
    Ok(LabelRef::Weak(ident.name))
}

fn object_operand(token: &str) -> Result<Operand<TypeDescriptor>, String> {
    if token == "*" {
        return Ok(Operand::Any);
    }
    parse_object_type(token).map(Operand::Is)
}

/// Parse a double-quoted string constant with `\\`, `\"`, `\n`, `\r` and
/// `\t` escapes.
pub(crate) fn parse_string(text: &str) -> Result<String, String> {
    let inner = text
        .strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
        .filter(|_| text.len() >= 2)
        .ok_or_else(|| format!("Invalid string {text}"))?;
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some('\\') => out.push('\\'),
            Some('"') => out.push('"'),
            Some(other) => return Err(format!("Unknown escape \\{other}")),
            None => return Err("Dangling escape at end of string".to_string()),
        }
    }
    Ok(out)
}

/// Inverse of [`parse_string`].
pub(crate) fn quote_string(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for ch in value.chars() {
        match ch {
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            other => out.push(other),
        }
    }
    out.push('"');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mnemonics_are_case_and_separator_insensitive() {
        assert_eq!(
            InsnKind::from_name("INVOKE_VIRTUAL"),
            Some(InsnKind::Invoke(opcodes::INVOKEVIRTUAL))
        );
        assert_eq!(InsnKind::from_name("dup2-x1"), Some(InsnKind::Single(opcodes::DUP2_X1)));
        assert_eq!(InsnKind::from_name("invoke-dynamic"), None);
        assert_eq!(InsnKind::Var(opcodes::RET).name(), Some("ret"));
    }

    #[test]
    fn numeric_operands_accept_wildcards() {
        let op = PatchOp::compile(InsnKind::IncInt, &["1", "*"], "1 *", &[]).expect("compile");
        assert_eq!(
            op,
            PatchOp::IncInt {
                index: Operand::Is(1),
                delta: Operand::Any
            }
        );
        let err = PatchOp::compile(InsnKind::PushInt, &["x"], "x", &[]).expect_err("number");
        assert!(err.contains("Invalid number"), "{err}");
    }

    #[test]
    fn labels_must_be_weak() {
        let err = PatchOp::compile(InsnKind::Jump(opcodes::GOTO), &["end"], "end", &[])
            .expect_err("strong label");
        assert!(err.contains("Non-weak label"), "{err}");
        let op = PatchOp::compile(
            InsnKind::SwitchLookup,
            &["~default"],
            "~default",
            &["1:~one".to_string(), "*:*".to_string()],
        )
        .expect("lookup");
        assert_eq!(
            op,
            PatchOp::LookupSwitch {
                default: LabelRef::Weak("default".to_string()),
                cases: vec![
                    (Operand::Is(1), LabelRef::Weak("one".to_string())),
                    (Operand::Any, LabelRef::Any)
                ],
            }
        );
    }

    #[test]
    fn strings_keep_spacing_and_escapes() {
        let op = PatchOp::compile(InsnKind::PushString, &["\"a", "b\\n\""], "\"a  b\\n\"", &[])
            .expect("string");
        assert_eq!(op, PatchOp::PushString(Operand::Is("a  b\n".to_string())));
        assert_eq!(quote_string("a  b\n"), "\"a  b\\n\"");
        assert!(parse_string("unquoted").is_err());
        assert!(parse_string("\"").is_err());
    }

    #[test]
    fn wildcards_cannot_be_synthesized() {
        let op = PatchOp::compile(InsnKind::PushInt, &["*"], "*", &[]).expect("compile");
        assert!(op.check_synthesizable().is_err());
        let op = PatchOp::compile(
            InsnKind::Invoke(opcodes::INVOKESTATIC),
            &["~A", "~run", "(L*;)V"],
            "",
            &[],
        )
        .expect("compile");
        assert!(op.check_synthesizable().is_err());
        let op = PatchOp::compile(InsnKind::PushInt, &["300"], "300", &[]).expect("compile");
        assert!(op.check_synthesizable().is_ok());
    }
}
