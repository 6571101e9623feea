use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use jclassfile::attributes::{Attribute, ExceptionRecord};
use jclassfile::class_file;
use jclassfile::constant_pool::ConstantPool;
use opentelemetry::KeyValue;
use zip::ZipArchive;

use crate::classpath::{is_class_entry, is_jar_path, manifest_classpath, path_key};
use crate::ir::{Class, Code, Constant, Field, Insn, LabelId, Method, TryCatch};
use crate::opcodes;
use crate::telemetry::{Telemetry, with_span};

/// Class bytes read from an input, with a printable origin.
pub(crate) struct ScannedClass {
    pub(crate) origin: String,
    pub(crate) bytes: Vec<u8>,
    pub(crate) parsed: ParsedClass,
}

/// Non-class jar entry carried through to jar output.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Resource {
    pub(crate) name: String,
    pub(crate) bytes: Vec<u8>,
}

/// Everything read from the `--input` paths.
#[derive(Default)]
pub(crate) struct ScanOutput {
    pub(crate) classes: Vec<ScannedClass>,
    pub(crate) resources: Vec<Resource>,
    /// `Class-Path` entries named by input jar manifests.
    pub(crate) manifest_classpath: Vec<PathBuf>,
    pub(crate) class_count: usize,
}

pub(crate) fn scan_inputs(inputs: &[PathBuf], telemetry: Option<&Telemetry>) -> Result<ScanOutput> {
    let mut output = ScanOutput::default();
    let mut sorted = inputs.to_vec();
    sorted.sort_by_key(|path| path_key(path));
    for input in sorted {
        scan_path(&input, true, telemetry, &mut output)?;
    }
    Ok(output)
}

fn scan_path(
    path: &Path,
    strict: bool,
    telemetry: Option<&Telemetry>,
    output: &mut ScanOutput,
) -> Result<()> {
    if path.is_dir() {
        return scan_dir(path, telemetry, output);
    }
    let extension = path.extension().and_then(|ext| ext.to_str()).unwrap_or("");
    match extension {
        "class" => scan_class_file(path, telemetry, output),
        _ if is_jar_path(path) => scan_jar_file(path, telemetry, output),
        _ if strict => anyhow::bail!("unsupported input file: {}", path.display()),
        _ => Ok(()),
    }
}

fn scan_dir(path: &Path, telemetry: Option<&Telemetry>, output: &mut ScanOutput) -> Result<()> {
    let mut entries = Vec::new();
    for entry in fs::read_dir(path)
        .with_context(|| format!("failed to read directory {}", path.display()))?
    {
        let entry =
            entry.with_context(|| format!("failed to read entry under {}", path.display()))?;
        entries.push(entry.path());
    }
    entries.sort_by_key(|entry| path_key(entry));

    for entry in entries {
        if entry.is_dir() {
            scan_dir(&entry, telemetry, output)?;
        } else if entry.extension().and_then(|ext| ext.to_str()) == Some("class") {
            scan_path(&entry, false, telemetry, output)?;
        }
    }
    Ok(())
}

fn scan_class_file(path: &Path, telemetry: Option<&Telemetry>, output: &mut ScanOutput) -> Result<()> {
    let attributes = [KeyValue::new(
        "classpatch.class_path",
        path.display().to_string(),
    )];
    let (bytes, parsed) = with_span(telemetry, "class.scan", &attributes, || {
        let bytes = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
        let parsed = parse_class_bytes(&bytes)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        Ok::<_, anyhow::Error>((bytes, parsed))
    })?;
    output.class_count += 1;
    output.classes.push(ScannedClass {
        origin: path.display().to_string(),
        bytes,
        parsed,
    });
    Ok(())
}

fn scan_jar_file(path: &Path, telemetry: Option<&Telemetry>, output: &mut ScanOutput) -> Result<()> {
    let jar_attributes = [KeyValue::new(
        "classpatch.jar_path",
        path.display().to_string(),
    )];
    let mut archive = with_span(telemetry, "jar.scan", &jar_attributes, || {
        let file =
            fs::File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
        ZipArchive::new(file).with_context(|| format!("failed to read {}", path.display()))
    })?;

    let mut entry_names = Vec::new();
    for index in 0..archive.len() {
        let entry = archive
            .by_index(index)
            .with_context(|| format!("failed to read {}", path.display()))?;
        if entry.is_dir() {
            continue;
        }
        entry_names.push(entry.name().to_string());
    }
    entry_names.sort();

    for name in entry_names {
        let bytes = read_entry(&mut archive, path, &name)?;
        if !is_class_entry(&name) {
            output.resources.push(Resource { name, bytes });
            continue;
        }
        let class_attributes = [
            KeyValue::new("classpatch.jar_path", path.display().to_string()),
            KeyValue::new("classpatch.jar_entry", name.clone()),
        ];
        let parsed = with_span(telemetry, "class.scan", &class_attributes, || {
            parse_class_bytes(&bytes)
                .with_context(|| format!("failed to parse {}:{}", path.display(), name))
        })?;
        output.class_count += 1;
        output.classes.push(ScannedClass {
            origin: format!("{}:{name}", path.display()),
            bytes,
            parsed,
        });
    }

    output.manifest_classpath.extend(manifest_classpath(path)?);
    Ok(())
}

fn read_entry(archive: &mut ZipArchive<fs::File>, path: &Path, name: &str) -> Result<Vec<u8>> {
    let mut entry = archive
        .by_name(name)
        .with_context(|| format!("failed to read {}:{}", path.display(), name))?;
    let mut data = Vec::new();
    entry
        .read_to_end(&mut data)
        .with_context(|| format!("failed to read {}:{}", path.display(), name))?;
    Ok(data)
}

/// Decoded class with its members, ready for the class arena.
#[derive(Debug)]
pub(crate) struct ParsedClass {
    pub(crate) class: Class,
    pub(crate) fields: Vec<Field>,
    pub(crate) methods: Vec<Method>,
}

pub(crate) fn parse_class_bytes(data: &[u8]) -> Result<ParsedClass> {
    let class_file = class_file::parse(data)
        .map_err(|err| anyhow::anyhow!("{err}"))
        .context("failed to parse class file bytes")?;
    let constant_pool = class_file.constant_pool();
    let name =
        resolve_class_name(constant_pool, class_file.this_class()).context("resolve class name")?;
    let super_name = if class_file.super_class() == 0 {
        None
    } else {
        Some(
            resolve_class_name(constant_pool, class_file.super_class())
                .context("resolve super class name")?,
        )
    };

    let mut class = Class::new(name, super_name, class_file.access_flags().bits());
    class.major_version = class_file.major_version();
    class.minor_version = class_file.minor_version();
    for interface in class_file.interfaces() {
        class
            .interfaces
            .push(resolve_class_name(constant_pool, *interface).context("resolve interface name")?);
    }
    for attribute in class_file.attributes() {
        if let Attribute::SourceFile { sourcefile_index } = attribute {
            class.source_file =
                Some(resolve_utf8(constant_pool, *sourcefile_index).context("resolve source file")?);
        }
    }

    let mut fields = Vec::new();
    for field in class_file.fields() {
        let name = resolve_utf8(constant_pool, field.name_index()).context("resolve field name")?;
        let descriptor = resolve_utf8(constant_pool, field.descriptor_index())
            .context("resolve field descriptor")?;
        let mut value = None;
        for attribute in field.attributes() {
            if let Attribute::ConstantValue {
                constantvalue_index,
            } = attribute
            {
                value = Some(
                    resolve_constant(constant_pool, *constantvalue_index)
                        .with_context(|| format!("resolve constant value of {name}"))?,
                );
            }
        }
        fields.push(Field {
            class: Default::default(),
            name,
            descriptor,
            access: field.access_flags().bits(),
            owners: BTreeSet::new(),
            hidden: false,
            value,
        });
    }

    let mut methods = Vec::new();
    for method in class_file.methods() {
        let name =
            resolve_utf8(constant_pool, method.name_index()).context("resolve method name")?;
        let descriptor = resolve_utf8(constant_pool, method.descriptor_index())
            .context("resolve method descriptor")?;
        let mut exceptions = Vec::new();
        let mut code = None;
        for attribute in method.attributes() {
            match attribute {
                Attribute::Exceptions {
                    exception_index_table,
                } => {
                    for index in exception_index_table {
                        exceptions.push(
                            resolve_class_name(constant_pool, *index)
                                .context("resolve thrown exception")?,
                        );
                    }
                }
                Attribute::Code {
                    max_stack,
                    max_locals,
                    code: bytecode,
                    exception_table,
                    attributes,
                } => {
                    let mut decoded = decode_code(bytecode, exception_table, attributes, constant_pool)
                        .with_context(|| format!("decode bytecode of {name}{descriptor}"))?;
                    decoded.max_stack = *max_stack;
                    decoded.max_locals = *max_locals;
                    code = Some(decoded);
                }
                _ => {}
            }
        }
        methods.push(Method {
            class: Default::default(),
            name,
            descriptor,
            access: method.access_flags().bits(),
            owners: BTreeSet::new(),
            hidden: false,
            exceptions,
            code,
        });
    }

    Ok(ParsedClass {
        class,
        fields,
        methods,
    })
}

/// Turn a Code attribute into the instruction list. Labels are placed before
/// every branch target and every exception-range boundary, and line markers
/// before the first instruction of each line.
fn decode_code(
    code: &[u8],
    exception_table: &[ExceptionRecord],
    attributes: &[Attribute],
    constant_pool: &[ConstantPool],
) -> Result<Code> {
    let mut starts = Vec::new();
    let mut targets = BTreeSet::new();
    let mut offset = 0usize;
    while offset < code.len() {
        let length = opcode_length(code, offset)?;
        if length == 0 || offset + length > code.len() {
            anyhow::bail!("invalid bytecode length at offset {offset}");
        }
        starts.push(offset);
        targets.extend(branch_offsets(code, offset)?);
        offset += length;
    }
    for record in exception_table {
        targets.insert(record.start_pc() as usize);
        targets.insert(record.end_pc() as usize);
        targets.insert(record.handler_pc() as usize);
    }

    let known: BTreeSet<usize> = starts.iter().copied().chain([code.len()]).collect();
    let mut labels = BTreeMap::new();
    for target in targets {
        if !known.contains(&target) {
            anyhow::bail!("branch target {target} is not an instruction boundary");
        }
        let next = LabelId(labels.len() as u32);
        labels.insert(target, next);
    }

    let mut lines: BTreeMap<usize, Vec<u16>> = BTreeMap::new();
    for attribute in attributes {
        if let Attribute::LineNumberTable { line_number_table } = attribute {
            for record in line_number_table {
                lines
                    .entry(record.start_pc() as usize)
                    .or_default()
                    .push(record.line_number());
            }
        }
    }

    let label_at = |target: usize| -> Result<LabelId> {
        labels
            .get(&target)
            .copied()
            .with_context(|| format!("no label at offset {target}"))
    };

    let mut insns = Vec::new();
    for start in starts {
        if let Some(label) = labels.get(&start) {
            insns.push(Insn::Label(*label));
        }
        if let Some(numbers) = lines.get(&start) {
            insns.extend(numbers.iter().map(|line| Insn::Line(*line)));
        }
        insns.push(decode_insn(code, start, constant_pool, &label_at)?);
    }
    if let Some(label) = labels.get(&code.len()) {
        insns.push(Insn::Label(*label));
    }

    let mut try_catches = Vec::new();
    for record in exception_table {
        let catch_type = if record.catch_type() == 0 {
            None
        } else {
            Some(resolve_class_name(constant_pool, record.catch_type()).context("resolve catch type")?)
        };
        try_catches.push(TryCatch {
            start: label_at(record.start_pc() as usize)?,
            end: label_at(record.end_pc() as usize)?,
            handler: label_at(record.handler_pc() as usize)?,
            catch_type,
        });
    }

    Ok(Code {
        max_stack: 0,
        max_locals: 0,
        insns,
        try_catches,
        next_label: labels.len() as u32,
    })
}

/// Absolute offsets a branching instruction may jump to.
fn branch_offsets(code: &[u8], offset: usize) -> Result<Vec<usize>> {
    let opcode = code[offset];
    let targets = match opcode {
        opcodes::IFEQ..=opcodes::JSR | opcodes::IFNULL | opcodes::IFNONNULL => {
            vec![relative(offset, read_i16(code, offset + 1)? as i32)?]
        }
        opcodes::GOTO_W | opcodes::JSR_W => vec![relative(offset, read_i32(code, offset + 1)?)?],
        opcodes::TABLESWITCH => {
            let (default, _, _, jumps) = read_table_switch(code, offset)?;
            std::iter::once(default)
                .chain(jumps)
                .map(|jump| relative(offset, jump))
                .collect::<Result<_>>()?
        }
        opcodes::LOOKUPSWITCH => {
            let (default, pairs) = read_lookup_switch(code, offset)?;
            std::iter::once(default)
                .chain(pairs.into_iter().map(|(_, jump)| jump))
                .map(|jump| relative(offset, jump))
                .collect::<Result<_>>()?
        }
        _ => Vec::new(),
    };
    Ok(targets)
}

fn relative(offset: usize, delta: i32) -> Result<usize> {
    let target = offset as i64 + delta as i64;
    usize::try_from(target).with_context(|| format!("branch at {offset} leaves the method"))
}

fn read_table_switch(code: &[u8], offset: usize) -> Result<(i32, i32, i32, Vec<i32>)> {
    let base = offset + 1 + padding(offset);
    let default = read_i32(code, base)?;
    let low = read_i32(code, base + 4)?;
    let high = read_i32(code, base + 8)?;
    let count = (high as i64 - low as i64 + 1).max(0) as usize;
    let mut jumps = Vec::with_capacity(count);
    for index in 0..count {
        jumps.push(read_i32(code, base + 12 + index * 4)?);
    }
    Ok((default, low, high, jumps))
}

fn read_lookup_switch(code: &[u8], offset: usize) -> Result<(i32, Vec<(i32, i32)>)> {
    let base = offset + 1 + padding(offset);
    let default = read_i32(code, base)?;
    let npairs = read_i32(code, base + 4)?.max(0) as usize;
    let mut pairs = Vec::with_capacity(npairs);
    for index in 0..npairs {
        let at = base + 8 + index * 8;
        pairs.push((read_i32(code, at)?, read_i32(code, at + 4)?));
    }
    Ok((default, pairs))
}

fn decode_insn(
    code: &[u8],
    offset: usize,
    constant_pool: &[ConstantPool],
    label_at: &dyn Fn(usize) -> Result<LabelId>,
) -> Result<Insn> {
    let opcode = code[offset];
    let insn = match opcode {
        opcodes::ICONST_M1..=opcodes::ICONST_5 => {
            Insn::Push(Constant::Int(opcode as i32 - opcodes::ICONST_0 as i32))
        }
        opcodes::LCONST_0 | opcodes::LCONST_1 => {
            Insn::Push(Constant::Long((opcode - opcodes::LCONST_0) as i64))
        }
        opcodes::FCONST_0..=opcodes::FCONST_2 => {
            Insn::Push(Constant::Float((opcode - opcodes::FCONST_0) as f32))
        }
        opcodes::DCONST_0 | opcodes::DCONST_1 => {
            Insn::Push(Constant::Double((opcode - opcodes::DCONST_0) as f64))
        }
        opcodes::BIPUSH => Insn::Push(Constant::Int(read_u8(code, offset + 1)? as i8 as i32)),
        opcodes::SIPUSH => Insn::Push(Constant::Int(read_i16(code, offset + 1)? as i32)),
        opcodes::LDC => ldc(constant_pool, read_u8(code, offset + 1)? as u16)?,
        opcodes::LDC_W | opcodes::LDC2_W => ldc(constant_pool, read_u16(code, offset + 1)?)?,
        opcodes::ILOAD..=opcodes::ALOAD | opcodes::ISTORE..=opcodes::ASTORE | opcodes::RET => {
            Insn::Var {
                opcode,
                index: read_u8(code, offset + 1)? as u16,
            }
        }
        opcodes::ILOAD_0..=opcodes::ALOAD_3 => {
            let relative = opcode - opcodes::ILOAD_0;
            Insn::Var {
                opcode: opcodes::ILOAD + relative / 4,
                index: (relative % 4) as u16,
            }
        }
        opcodes::ISTORE_0..=opcodes::ASTORE_3 => {
            let relative = opcode - opcodes::ISTORE_0;
            Insn::Var {
                opcode: opcodes::ISTORE + relative / 4,
                index: (relative % 4) as u16,
            }
        }
        opcodes::IINC => Insn::Iinc {
            index: read_u8(code, offset + 1)? as u16,
            delta: read_u8(code, offset + 2)? as i8 as i16,
        },
        opcodes::WIDE => {
            let inner = read_u8(code, offset + 1)?;
            let index = read_u16(code, offset + 2)?;
            if inner == opcodes::IINC {
                Insn::Iinc {
                    index,
                    delta: read_i16(code, offset + 4)?,
                }
            } else {
                Insn::Var {
                    opcode: inner,
                    index,
                }
            }
        }
        opcodes::IFEQ..=opcodes::JSR | opcodes::IFNULL | opcodes::IFNONNULL => Insn::Jump {
            opcode,
            target: label_at(relative(offset, read_i16(code, offset + 1)? as i32)?)?,
        },
        opcodes::GOTO_W | opcodes::JSR_W => Insn::Jump {
            opcode: if opcode == opcodes::GOTO_W {
                opcodes::GOTO
            } else {
                opcodes::JSR
            },
            target: label_at(relative(offset, read_i32(code, offset + 1)?)?)?,
        },
        opcodes::TABLESWITCH => {
            let (default, low, high, jumps) = read_table_switch(code, offset)?;
            Insn::TableSwitch {
                low,
                high,
                default: label_at(relative(offset, default)?)?,
                targets: jumps
                    .into_iter()
                    .map(|jump| label_at(relative(offset, jump)?))
                    .collect::<Result<_>>()?,
            }
        }
        opcodes::LOOKUPSWITCH => {
            let (default, pairs) = read_lookup_switch(code, offset)?;
            Insn::LookupSwitch {
                default: label_at(relative(offset, default)?)?,
                pairs: pairs
                    .into_iter()
                    .map(|(key, jump)| Ok((key, label_at(relative(offset, jump)?)?)))
                    .collect::<Result<_>>()?,
            }
        }
        opcodes::GETSTATIC..=opcodes::PUTFIELD => {
            let member = resolve_member_ref(constant_pool, read_u16(code, offset + 1)?)
                .context("resolve field ref")?;
            Insn::Field {
                opcode,
                owner: member.owner,
                name: member.name,
                descriptor: member.descriptor,
            }
        }
        opcodes::INVOKEVIRTUAL..=opcodes::INVOKEINTERFACE => {
            let member = resolve_member_ref(constant_pool, read_u16(code, offset + 1)?)
                .context("resolve method ref")?;
            Insn::Invoke {
                opcode,
                owner: member.owner,
                name: member.name,
                descriptor: member.descriptor,
                interface: member.interface,
            }
        }
        opcodes::INVOKEDYNAMIC => {
            let detail = match constant_pool.get(read_u16(code, offset + 1)? as usize) {
                Some(ConstantPool::InvokeDynamic {
                    name_and_type_index,
                    ..
                }) => {
                    let (name, descriptor) = resolve_name_and_type(constant_pool, *name_and_type_index)?;
                    format!("invokedynamic {name} {descriptor}")
                }
                _ => anyhow::bail!("unexpected invokedynamic entry"),
            };
            Insn::Opaque { opcode, detail }
        }
        opcodes::NEW | opcodes::ANEWARRAY | opcodes::CHECKCAST | opcodes::INSTANCEOF => {
            Insn::Type {
                opcode,
                class: resolve_class_name(constant_pool, read_u16(code, offset + 1)?)
                    .context("resolve type operand")?,
            }
        }
        opcodes::NEWARRAY => Insn::NewArray(read_u8(code, offset + 1)?),
        opcodes::MULTIANEWARRAY => Insn::MultiNewArray {
            descriptor: resolve_class_name(constant_pool, read_u16(code, offset + 1)?)
                .context("resolve array type")?,
            dims: read_u8(code, offset + 3)?,
        },
        opcodes::NOP..=opcodes::ACONST_NULL
        | opcodes::IALOAD..=opcodes::SALOAD
        | opcodes::IASTORE..=opcodes::LXOR
        | opcodes::I2L..=opcodes::DCMPG
        | opcodes::IRETURN..=opcodes::RETURN
        | opcodes::ARRAYLENGTH
        | opcodes::ATHROW
        | opcodes::MONITORENTER
        | opcodes::MONITOREXIT => Insn::Simple(opcode),
        _ => anyhow::bail!("unsupported opcode 0x{opcode:02x} at {offset}"),
    };
    Ok(insn)
}

fn ldc(constant_pool: &[ConstantPool], index: u16) -> Result<Insn> {
    let entry = constant_pool
        .get(index as usize)
        .context("missing ldc constant")?;
    let insn = match entry {
        ConstantPool::Integer { .. }
        | ConstantPool::Float { .. }
        | ConstantPool::Long { .. }
        | ConstantPool::Double { .. }
        | ConstantPool::String { .. } => Insn::Push(resolve_constant(constant_pool, index)?),
        ConstantPool::Class { name_index } => {
            Insn::Push(Constant::Class(resolve_utf8(constant_pool, *name_index)?))
        }
        ConstantPool::MethodType { descriptor_index } => Insn::Opaque {
            opcode: opcodes::LDC,
            detail: format!("ldc method type {}", resolve_utf8(constant_pool, *descriptor_index)?),
        },
        ConstantPool::MethodHandle { reference_kind, .. } => Insn::Opaque {
            opcode: opcodes::LDC,
            detail: format!("ldc method handle kind {reference_kind}"),
        },
        ConstantPool::Dynamic {
            name_and_type_index,
            ..
        } => {
            let (name, descriptor) = resolve_name_and_type(constant_pool, *name_and_type_index)?;
            Insn::Opaque {
                opcode: opcodes::LDC,
                detail: format!("ldc dynamic {name} {descriptor}"),
            }
        }
        _ => anyhow::bail!("unexpected ldc constant"),
    };
    Ok(insn)
}

fn resolve_constant(constant_pool: &[ConstantPool], index: u16) -> Result<Constant> {
    let entry = constant_pool
        .get(index as usize)
        .context("missing constant entry")?;
    let constant = match entry {
        ConstantPool::Integer { value } => Constant::Int(*value),
        ConstantPool::Float { value } => Constant::Float(*value),
        ConstantPool::Long { value } => Constant::Long(*value),
        ConstantPool::Double { value } => Constant::Double(*value),
        ConstantPool::String { string_index } => {
            Constant::String(resolve_utf8(constant_pool, *string_index)?)
        }
        _ => anyhow::bail!("unexpected constant entry"),
    };
    Ok(constant)
}

fn resolve_class_name(constant_pool: &[ConstantPool], class_index: u16) -> Result<String> {
    let entry = constant_pool
        .get(class_index as usize)
        .context("missing class entry")?;
    match entry {
        ConstantPool::Class { name_index } => resolve_utf8(constant_pool, *name_index),
        _ => anyhow::bail!("unexpected class entry"),
    }
}

fn resolve_utf8(constant_pool: &[ConstantPool], index: u16) -> Result<String> {
    let entry = constant_pool
        .get(index as usize)
        .context("missing utf8 entry")?;
    match entry {
        ConstantPool::Utf8 { value } => Ok(value.clone()),
        _ => anyhow::bail!("unexpected utf8 entry"),
    }
}

/// Resolved constant pool field or method reference.
struct MemberRef {
    owner: String,
    name: String,
    descriptor: String,
    interface: bool,
}

fn resolve_member_ref(constant_pool: &[ConstantPool], index: u16) -> Result<MemberRef> {
    let entry = constant_pool
        .get(index as usize)
        .context("missing member ref entry")?;
    let (class_index, name_and_type_index, interface) = match entry {
        ConstantPool::Fieldref {
            class_index,
            name_and_type_index,
        }
        | ConstantPool::Methodref {
            class_index,
            name_and_type_index,
        } => (*class_index, *name_and_type_index, false),
        ConstantPool::InterfaceMethodref {
            class_index,
            name_and_type_index,
        } => (*class_index, *name_and_type_index, true),
        _ => anyhow::bail!("unexpected member ref entry"),
    };
    let owner = resolve_class_name(constant_pool, class_index).context("resolve owner")?;
    let (name, descriptor) = resolve_name_and_type(constant_pool, name_and_type_index)?;
    Ok(MemberRef {
        owner,
        name,
        descriptor,
        interface,
    })
}

fn resolve_name_and_type(constant_pool: &[ConstantPool], index: u16) -> Result<(String, String)> {
    let entry = constant_pool
        .get(index as usize)
        .context("missing name and type entry")?;
    match entry {
        ConstantPool::NameAndType {
            name_index,
            descriptor_index,
        } => Ok((
            resolve_utf8(constant_pool, *name_index).context("resolve member name")?,
            resolve_utf8(constant_pool, *descriptor_index).context("resolve member descriptor")?,
        )),
        _ => anyhow::bail!("unexpected name and type entry"),
    }
}

pub(crate) fn opcode_length(code: &[u8], offset: usize) -> Result<usize> {
    let opcode = code[offset];
    let length = match opcode {
        0x00..=0x0f => 1,
        0x10 => 2,
        0x11 => 3,
        opcodes::LDC => 2,
        opcodes::LDC_W | opcodes::LDC2_W => 3,
        0x15..=0x19 => 2,
        0x1a..=0x35 => 1,
        0x36..=0x3a => 2,
        0x3b..=0x83 => 1,
        0x84 => 3,
        0x85..=0x98 => 1,
        0x99..=0xa8 => 3,
        0xa9 => 2,
        0xaa => tableswitch_length(code, offset)?,
        0xab => lookupswitch_length(code, offset)?,
        0xac..=0xb1 => 1,
        0xb2..=0xb8 => 3,
        opcodes::INVOKEINTERFACE | opcodes::INVOKEDYNAMIC => 5,
        0xbb => 3,
        0xbc => 2,
        0xbd => 3,
        0xbe | 0xbf => 1,
        0xc0 | 0xc1 => 3,
        0xc2 | 0xc3 => 1,
        0xc4 => wide_length(code, offset)?,
        0xc5 => 4,
        0xc6 | 0xc7 => 3,
        opcodes::GOTO_W | opcodes::JSR_W => 5,
        _ => anyhow::bail!("unsupported opcode 0x{:02x}", opcode),
    };
    Ok(length)
}

fn tableswitch_length(code: &[u8], offset: usize) -> Result<usize> {
    let padding = padding(offset);
    let base = offset + 1 + padding;
    let low = read_i32(code, base + 4)?;
    let high = read_i32(code, base + 8)?;
    let count = high
        .checked_sub(low)
        .and_then(|v| v.checked_add(1))
        .context("invalid tableswitch range")?;
    if count < 0 {
        anyhow::bail!("invalid tableswitch range");
    }
    Ok(1 + padding + 12 + (count as usize) * 4)
}

fn lookupswitch_length(code: &[u8], offset: usize) -> Result<usize> {
    let padding = padding(offset);
    let base = offset + 1 + padding;
    let npairs = read_i32(code, base + 4)?;
    if npairs < 0 {
        anyhow::bail!("invalid lookupswitch pairs");
    }
    Ok(1 + padding + 8 + (npairs as usize) * 8)
}

fn wide_length(code: &[u8], offset: usize) -> Result<usize> {
    let opcode = code
        .get(offset + 1)
        .copied()
        .context("missing wide opcode")?;
    if opcode == opcodes::IINC { Ok(6) } else { Ok(4) }
}

/// Switch operands start on a four-byte boundary.
pub(crate) fn padding(offset: usize) -> usize {
    (4 - ((offset + 1) % 4)) % 4
}

fn read_u8(code: &[u8], offset: usize) -> Result<u8> {
    code.get(offset).copied().context("bytecode u8 out of bounds")
}

pub(crate) fn read_u16(code: &[u8], offset: usize) -> Result<u16> {
    let slice = code
        .get(offset..offset + 2)
        .context("bytecode u16 out of bounds")?;
    Ok(u16::from_be_bytes([slice[0], slice[1]]))
}

fn read_i16(code: &[u8], offset: usize) -> Result<i16> {
    Ok(read_u16(code, offset)? as i16)
}

pub(crate) fn read_u32(code: &[u8], offset: usize) -> Result<u32> {
    let slice = code
        .get(offset..offset + 4)
        .context("bytecode u32 out of bounds")?;
    Ok(u32::from_be_bytes([slice[0], slice[1], slice[2], slice[3]]))
}

fn read_i32(code: &[u8], offset: usize) -> Result<i32> {
    Ok(read_u32(code, offset)? as i32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::ACC_PUBLIC;
    use crate::test_harness::{ClassFileBuilder, write_jar};

    fn sample_class() -> Vec<u8> {
        let mut builder = ClassFileBuilder::new("p/Sample", Some("java/lang/Object"));
        let field = builder.field_ref("p/Sample", "count", "I");
        builder.add_field(ACC_PUBLIC, "count", "I", None);
        // aload_0; getfield count; ifeq +5; iconst_1; ireturn; bipush -2; ireturn
        let [high, low] = field.to_be_bytes();
        let code = vec![
            0x2a,
            opcodes::GETFIELD,
            high,
            low,
            opcodes::IFEQ,
            0x00,
            0x05,
            opcodes::ICONST_1,
            opcodes::IRETURN,
            opcodes::BIPUSH,
            0xfe,
            opcodes::IRETURN,
        ];
        builder.add_method(ACC_PUBLIC, "check", "()I", Some((2, 1, code)));
        builder.build()
    }

    #[test]
    fn bytecode_is_decoded_into_labelled_instructions() {
        let parsed = parse_class_bytes(&sample_class()).expect("parse");
        assert_eq!(parsed.class.name, "p/Sample");
        assert_eq!(parsed.class.super_name.as_deref(), Some("java/lang/Object"));
        assert_eq!(parsed.fields.len(), 1);
        let code = parsed.methods[0].code.as_ref().expect("code");
        assert_eq!(
            code.insns,
            vec![
                Insn::Var {
                    opcode: opcodes::ALOAD,
                    index: 0
                },
                Insn::Field {
                    opcode: opcodes::GETFIELD,
                    owner: "p/Sample".to_string(),
                    name: "count".to_string(),
                    descriptor: "I".to_string(),
                },
                Insn::Jump {
                    opcode: opcodes::IFEQ,
                    target: LabelId(0)
                },
                Insn::Push(Constant::Int(1)),
                Insn::Simple(opcodes::IRETURN),
                Insn::Label(LabelId(0)),
                Insn::Push(Constant::Int(-2)),
                Insn::Simple(opcodes::IRETURN),
            ]
        );
        assert_eq!(code.max_stack, 2);
        assert_eq!(code.next_label, 1);
    }

    #[test]
    fn wide_forms_fold_into_plain_forms() {
        let code = [opcodes::WIDE, opcodes::ILOAD, 0x01, 0x00, opcodes::WIDE, opcodes::IINC, 0x00, 0x02, 0x01, 0x00, opcodes::RETURN];
        let decoded = decode_code(&code, &[], &[], &[]).expect("decode");
        assert_eq!(
            decoded.insns,
            vec![
                Insn::Var {
                    opcode: opcodes::ILOAD,
                    index: 256
                },
                Insn::Iinc {
                    index: 2,
                    delta: 256
                },
                Insn::Simple(opcodes::RETURN),
            ]
        );
    }

    #[test]
    fn exception_ranges_and_lines_become_markers() {
        let code = [opcodes::NOP, opcodes::RETURN, opcodes::ATHROW];
        let table = [ExceptionRecord::new(0, 1, 2, 0)];
        let lines = [Attribute::LineNumberTable {
            line_number_table: vec![jclassfile::attributes::LineNumberRecord::new(1, 7)],
        }];
        let decoded = decode_code(&code, &table, &lines, &[]).expect("decode");
        assert_eq!(
            decoded.insns,
            vec![
                Insn::Label(LabelId(0)),
                Insn::Simple(opcodes::NOP),
                Insn::Label(LabelId(1)),
                Insn::Line(7),
                Insn::Simple(opcodes::RETURN),
                Insn::Label(LabelId(2)),
                Insn::Simple(opcodes::ATHROW),
            ]
        );
        assert_eq!(
            decoded.try_catches,
            vec![TryCatch {
                start: LabelId(0),
                end: LabelId(1),
                handler: LabelId(2),
                catch_type: None,
            }]
        );
    }

    #[test]
    fn scan_inputs_rejects_invalid_class_file() {
        let temp = tempfile::tempdir().expect("tempdir");
        let class_path = temp.path().join("bad.class");
        fs::write(&class_path, b"nope").expect("write test class");

        assert!(scan_inputs(&[class_path], None).is_err());
    }

    #[test]
    fn scan_inputs_reads_jar_classes_and_resources() {
        let temp = tempfile::tempdir().expect("tempdir");
        let jar = temp.path().join("app.jar");
        let class = sample_class();
        write_jar(
            &jar,
            &[
                ("META-INF/MANIFEST.MF", b"Manifest-Version: 1.0\nClass-Path: lib.jar\n"),
                ("p/Sample.class", &class),
                ("config.properties", b"a=b"),
            ],
        );

        let output = scan_inputs(&[jar], None).expect("scan jar");
        assert_eq!(output.class_count, 1);
        assert_eq!(output.classes[0].parsed.class.name, "p/Sample");
        assert_eq!(output.classes[0].bytes, class);
        let names: Vec<&str> = output.resources.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["META-INF/MANIFEST.MF", "config.properties"]);
        assert_eq!(output.manifest_classpath, vec![temp.path().join("lib.jar")]);
    }

    #[test]
    fn scan_inputs_walks_directories() {
        let temp = tempfile::tempdir().expect("tempdir");
        let package = temp.path().join("p");
        fs::create_dir_all(&package).expect("mkdir");
        fs::write(package.join("Sample.class"), sample_class()).expect("write");
        fs::write(package.join("README"), b"skip").expect("write");

        let output = scan_inputs(&[temp.path().to_path_buf()], None).expect("scan dir");
        assert_eq!(output.class_count, 1);
        assert!(output.resources.is_empty());
    }
}
