use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use zip::write::SimpleFileOptions;

use crate::classset::ClassSet;
use crate::dataflow::max_stack;
use crate::descriptor::{method_descriptor, parameter_slots};
use crate::ir::{Class, ClassId, Code, Constant, Insn, LabelId, Method};
use crate::opcodes;
use crate::scan::{Resource, padding};

/// Highest class version written for re-encoded classes (Java 6), the last
/// one the JVM verifies without a `StackMapTable`.
const MAX_MAJOR_VERSION: u16 = 50;

/// Bytes for one class: the original bytes when the class was never
/// touched, a fresh encoding otherwise.
pub(crate) fn store(classes: &ClassSet, id: ClassId) -> Result<Vec<u8>> {
    let class = classes.class(id);
    if !class.modified
        && let Some(original) = &class.original
    {
        return Ok(original.clone());
    }
    encode_class(classes, class).with_context(|| format!("encode {}", class.name))
}

/// Write every visible class under `output`, a directory or a `.jar` path.
/// Jar output also carries the non-class resources of the inputs.
pub(crate) fn write_output(classes: &ClassSet, output: &Path, resources: &[Resource]) -> Result<usize> {
    let mut written = Vec::new();
    for id in classes.candidates() {
        if classes.class(id).external {
            continue;
        }
        written.push((format!("{}.class", classes.class(id).name), store(classes, id)?));
    }
    let count = written.len();

    let is_jar = output
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("jar"));
    if is_jar {
        if let Some(parent) = output.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let file = fs::File::create(output)
            .with_context(|| format!("failed to create {}", output.display()))?;
        let mut writer = zip::ZipWriter::new(file);
        let mut entries: BTreeMap<&str, &[u8]> = BTreeMap::new();
        for resource in resources {
            entries.insert(&resource.name, &resource.bytes);
        }
        for (name, bytes) in &written {
            entries.insert(name, bytes);
        }
        for (name, bytes) in entries {
            writer
                .start_file(name, SimpleFileOptions::default())
                .with_context(|| format!("start jar entry {name}"))?;
            writer
                .write_all(bytes)
                .with_context(|| format!("write jar entry {name}"))?;
        }
        writer.finish().context("finish jar")?;
    } else {
        for (name, bytes) in &written {
            let path = output.join(name);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
            fs::write(&path, bytes).with_context(|| format!("failed to write {}", path.display()))?;
        }
    }
    Ok(count)
}

/// Constant pool entry, with floating point values kept as bits so that
/// entries can be deduplicated.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
enum PoolEntry {
    Utf8(String),
    Integer(i32),
    Float(u32),
    Long(i64),
    Double(u64),
    Class(u16),
    String(u16),
    Fieldref(u16, u16),
    Methodref(u16, u16),
    InterfaceMethodref(u16, u16),
    NameAndType(u16, u16),
}

#[derive(Default)]
struct ConstantPool {
    entries: Vec<PoolEntry>,
    indices: BTreeMap<PoolEntry, u16>,
    next: u16,
}

impl ConstantPool {
    fn new() -> Self {
        Self {
            next: 1,
            ..Self::default()
        }
    }

    fn add(&mut self, entry: PoolEntry) -> Result<u16> {
        if let Some(index) = self.indices.get(&entry) {
            return Ok(*index);
        }
        let index = self.next;
        let width = if matches!(entry, PoolEntry::Long(_) | PoolEntry::Double(_)) {
            2
        } else {
            1
        };
        self.next = self
            .next
            .checked_add(width)
            .filter(|next| *next < u16::MAX)
            .context("constant pool overflow")?;
        self.indices.insert(entry.clone(), index);
        self.entries.push(entry);
        Ok(index)
    }

    fn utf8(&mut self, value: &str) -> Result<u16> {
        self.add(PoolEntry::Utf8(value.to_string()))
    }

    fn class(&mut self, name: &str) -> Result<u16> {
        let name = self.utf8(name)?;
        self.add(PoolEntry::Class(name))
    }

    fn name_and_type(&mut self, name: &str, descriptor: &str) -> Result<u16> {
        let name = self.utf8(name)?;
        let descriptor = self.utf8(descriptor)?;
        self.add(PoolEntry::NameAndType(name, descriptor))
    }

    fn field(&mut self, owner: &str, name: &str, descriptor: &str) -> Result<u16> {
        let owner = self.class(owner)?;
        let nat = self.name_and_type(name, descriptor)?;
        self.add(PoolEntry::Fieldref(owner, nat))
    }

    fn method(&mut self, owner: &str, name: &str, descriptor: &str, interface: bool) -> Result<u16> {
        let owner = self.class(owner)?;
        let nat = self.name_and_type(name, descriptor)?;
        if interface {
            self.add(PoolEntry::InterfaceMethodref(owner, nat))
        } else {
            self.add(PoolEntry::Methodref(owner, nat))
        }
    }

    fn constant(&mut self, constant: &Constant) -> Result<u16> {
        match constant {
            Constant::Int(value) => self.add(PoolEntry::Integer(*value)),
            Constant::Float(value) => self.add(PoolEntry::Float(value.to_bits())),
            Constant::Long(value) => self.add(PoolEntry::Long(*value)),
            Constant::Double(value) => self.add(PoolEntry::Double(value.to_bits())),
            Constant::String(value) => {
                let utf8 = self.utf8(value)?;
                self.add(PoolEntry::String(utf8))
            }
            Constant::Class(name) => self.class(name),
        }
    }

    fn encode(&self, out: &mut Vec<u8>) -> Result<()> {
        put_u16(out, self.next);
        for entry in &self.entries {
            match entry {
                PoolEntry::Utf8(value) => {
                    out.push(1);
                    let bytes = modified_utf8(value);
                    put_u16(
                        out,
                        u16::try_from(bytes.len()).context("string constant too long")?,
                    );
                    out.extend(bytes);
                }
                PoolEntry::Integer(value) => {
                    out.push(3);
                    out.extend(value.to_be_bytes());
                }
                PoolEntry::Float(bits) => {
                    out.push(4);
                    out.extend(bits.to_be_bytes());
                }
                PoolEntry::Long(value) => {
                    out.push(5);
                    out.extend(value.to_be_bytes());
                }
                PoolEntry::Double(bits) => {
                    out.push(6);
                    out.extend(bits.to_be_bytes());
                }
                PoolEntry::Class(name) => {
                    out.push(7);
                    put_u16(out, *name);
                }
                PoolEntry::String(value) => {
                    out.push(8);
                    put_u16(out, *value);
                }
                PoolEntry::Fieldref(owner, nat) => {
                    out.push(9);
                    put_u16(out, *owner);
                    put_u16(out, *nat);
                }
                PoolEntry::Methodref(owner, nat) => {
                    out.push(10);
                    put_u16(out, *owner);
                    put_u16(out, *nat);
                }
                PoolEntry::InterfaceMethodref(owner, nat) => {
                    out.push(11);
                    put_u16(out, *owner);
                    put_u16(out, *nat);
                }
                PoolEntry::NameAndType(name, descriptor) => {
                    out.push(12);
                    put_u16(out, *name);
                    put_u16(out, *descriptor);
                }
            }
        }
        Ok(())
    }
}

/// Java's modified UTF-8: NUL and supplementary characters are encoded
/// differently from standard UTF-8.
fn modified_utf8(value: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(value.len());
    for unit in value.encode_utf16() {
        match unit {
            0x0001..=0x007f => out.push(unit as u8),
            0x0000 | 0x0080..=0x07ff => {
                out.push(0xc0 | ((unit >> 6) & 0x1f) as u8);
                out.push(0x80 | (unit & 0x3f) as u8);
            }
            _ => {
                out.push(0xe0 | ((unit >> 12) & 0x0f) as u8);
                out.push(0x80 | ((unit >> 6) & 0x3f) as u8);
                out.push(0x80 | (unit & 0x3f) as u8);
            }
        }
    }
    out
}

fn encode_class(classes: &ClassSet, class: &Class) -> Result<Vec<u8>> {
    let mut pool = ConstantPool::new();
    let mut body = Vec::new();

    put_u16(&mut body, class.access);
    put_u16(&mut body, pool.class(&class.name)?);
    match &class.super_name {
        Some(name) => put_u16(&mut body, pool.class(name)?),
        None => put_u16(&mut body, 0),
    }
    put_u16(&mut body, count(class.interfaces.len())?);
    for interface in &class.interfaces {
        put_u16(&mut body, pool.class(interface)?);
    }

    put_u16(&mut body, count(class.fields.len())?);
    for id in &class.fields {
        let field = classes.field(*id);
        put_u16(&mut body, field.access);
        put_u16(&mut body, pool.utf8(&field.name)?);
        put_u16(&mut body, pool.utf8(&field.descriptor)?);
        match &field.value {
            Some(value) => {
                put_u16(&mut body, 1);
                put_u16(&mut body, pool.utf8("ConstantValue")?);
                put_u32(&mut body, 2);
                put_u16(&mut body, pool.constant(value)?);
            }
            None => put_u16(&mut body, 0),
        }
    }

    put_u16(&mut body, count(class.methods.len())?);
    for id in &class.methods {
        let method = classes.method(*id);
        encode_method(&mut pool, method, &mut body)
            .with_context(|| format!("encode method {}{}", method.name, method.descriptor))?;
    }

    match &class.source_file {
        Some(source) => {
            put_u16(&mut body, 1);
            put_u16(&mut body, pool.utf8("SourceFile")?);
            put_u32(&mut body, 2);
            put_u16(&mut body, pool.utf8(source)?);
        }
        None => put_u16(&mut body, 0),
    }

    let (major, minor) = if class.major_version > MAX_MAJOR_VERSION {
        (MAX_MAJOR_VERSION, 0)
    } else {
        (class.major_version, class.minor_version)
    };
    let mut out = Vec::with_capacity(body.len() + 256);
    put_u32(&mut out, 0xCAFE_BABE);
    put_u16(&mut out, minor);
    put_u16(&mut out, major);
    pool.encode(&mut out)?;
    out.extend(body);
    Ok(out)
}

fn encode_method(pool: &mut ConstantPool, method: &Method, out: &mut Vec<u8>) -> Result<()> {
    put_u16(out, method.access);
    put_u16(out, pool.utf8(&method.name)?);
    put_u16(out, pool.utf8(&method.descriptor)?);

    let mut attributes = Vec::new();
    let mut attribute_count = 0u16;
    if let Some(code) = &method.code {
        let descriptor = method_descriptor(&method.descriptor)?;
        let max_locals = max_locals(code, parameter_slots(&descriptor, method.is_static()));
        let encoded = encode_code(pool, code, max_locals)?;
        put_u16(&mut attributes, pool.utf8("Code")?);
        put_u32(
            &mut attributes,
            u32::try_from(encoded.len()).context("code attribute too large")?,
        );
        attributes.extend(encoded);
        attribute_count += 1;
    }
    if !method.exceptions.is_empty() {
        put_u16(&mut attributes, pool.utf8("Exceptions")?);
        put_u32(&mut attributes, 2 + 2 * method.exceptions.len() as u32);
        put_u16(&mut attributes, count(method.exceptions.len())?);
        for exception in &method.exceptions {
            put_u16(&mut attributes, pool.class(exception)?);
        }
        attribute_count += 1;
    }
    put_u16(out, attribute_count);
    out.extend(attributes);
    Ok(())
}

/// Local slots used by the parameters and by every local variable access.
fn max_locals(code: &Code, parameters: u16) -> u16 {
    code.insns
        .iter()
        .filter_map(|insn| match insn {
            Insn::Var { opcode, index } => {
                let width = match *opcode {
                    opcodes::LLOAD | opcodes::DLOAD | opcodes::LSTORE | opcodes::DSTORE => 2,
                    _ => 1,
                };
                Some(index.saturating_add(width))
            }
            Insn::Iinc { index, .. } => Some(index.saturating_add(1)),
            _ => None,
        })
        .fold(parameters, u16::max)
}

/// Instruction with its constant pool operands resolved; only branches and
/// switches still refer to labels.
enum Lowered {
    Bytes(Vec<u8>),
    Branch { opcode: u8, target: LabelId },
    Table {
        low: i32,
        high: i32,
        default: LabelId,
        targets: Vec<LabelId>,
    },
    Lookup {
        default: LabelId,
        pairs: Vec<(i32, LabelId)>,
    },
    Label(LabelId),
    Line(u16),
}

impl Lowered {
    fn size(&self, offset: usize) -> usize {
        match self {
            Lowered::Bytes(bytes) => bytes.len(),
            Lowered::Branch { .. } => 3,
            Lowered::Table { targets, .. } => 1 + padding(offset) + 12 + 4 * targets.len(),
            Lowered::Lookup { pairs, .. } => 1 + padding(offset) + 8 + 8 * pairs.len(),
            Lowered::Label(_) | Lowered::Line(_) => 0,
        }
    }
}

fn encode_code(pool: &mut ConstantPool, code: &Code, max_locals: u16) -> Result<Vec<u8>> {
    let lowered = code
        .insns
        .iter()
        .enumerate()
        .map(|(index, insn)| lower(pool, insn).with_context(|| format!("instruction {index}")))
        .collect::<Result<Vec<_>>>()?;
    let max_stack = max_stack(code)?;

    let mut labels = BTreeMap::new();
    let mut offset = 0usize;
    for insn in &lowered {
        if let Lowered::Label(label) = insn {
            labels.insert(*label, offset);
        }
        offset += insn.size(offset);
    }
    let code_length = u32::try_from(offset)
        .ok()
        .filter(|length| *length < 65536)
        .context("method body exceeds 65535 bytes")?;
    let label_offset = |label: LabelId| -> Result<usize> {
        labels
            .get(&label)
            .copied()
            .with_context(|| format!("label {} is never placed", label.0))
    };

    let mut bytes = Vec::with_capacity(offset);
    let mut lines = Vec::new();
    for insn in &lowered {
        let start = bytes.len();
        match insn {
            Lowered::Bytes(encoded) => bytes.extend(encoded),
            Lowered::Branch { opcode, target } => {
                let delta = label_offset(*target)? as i64 - start as i64;
                let delta = i16::try_from(delta)
                    .with_context(|| format!("branch offset {delta} does not fit in 16 bits"))?;
                bytes.push(*opcode);
                bytes.extend(delta.to_be_bytes());
            }
            Lowered::Table {
                low,
                high,
                default,
                targets,
            } => {
                bytes.push(opcodes::TABLESWITCH);
                bytes.extend(std::iter::repeat_n(0, padding(start)));
                put_i32(&mut bytes, (label_offset(*default)? as i64 - start as i64) as i32);
                put_i32(&mut bytes, *low);
                put_i32(&mut bytes, *high);
                for target in targets {
                    put_i32(&mut bytes, (label_offset(*target)? as i64 - start as i64) as i32);
                }
            }
            Lowered::Lookup { default, pairs } => {
                bytes.push(opcodes::LOOKUPSWITCH);
                bytes.extend(std::iter::repeat_n(0, padding(start)));
                put_i32(&mut bytes, (label_offset(*default)? as i64 - start as i64) as i32);
                put_i32(&mut bytes, pairs.len() as i32);
                let mut sorted = pairs.clone();
                sorted.sort_by_key(|(key, _)| *key);
                for (key, target) in sorted {
                    put_i32(&mut bytes, key);
                    put_i32(&mut bytes, (label_offset(target)? as i64 - start as i64) as i32);
                }
            }
            Lowered::Label(_) => {}
            Lowered::Line(line) => lines.push((start as u16, *line)),
        }
    }

    let mut out = Vec::new();
    put_u16(&mut out, max_stack);
    put_u16(&mut out, max_locals);
    put_u32(&mut out, code_length);
    out.extend(bytes);

    put_u16(&mut out, count(code.try_catches.len())?);
    for region in &code.try_catches {
        put_u16(&mut out, label_offset(region.start)? as u16);
        put_u16(&mut out, label_offset(region.end)? as u16);
        put_u16(&mut out, label_offset(region.handler)? as u16);
        match &region.catch_type {
            Some(name) => put_u16(&mut out, pool.class(name)?),
            None => put_u16(&mut out, 0),
        }
    }

    if lines.is_empty() {
        put_u16(&mut out, 0);
    } else {
        put_u16(&mut out, 1);
        put_u16(&mut out, pool.utf8("LineNumberTable")?);
        put_u32(&mut out, 2 + 4 * lines.len() as u32);
        put_u16(&mut out, count(lines.len())?);
        for (pc, line) in lines {
            put_u16(&mut out, pc);
            put_u16(&mut out, line);
        }
    }
    Ok(out)
}

fn lower(pool: &mut ConstantPool, insn: &Insn) -> Result<Lowered> {
    let bytes = match insn {
        Insn::Label(label) => return Ok(Lowered::Label(*label)),
        Insn::Line(line) => return Ok(Lowered::Line(*line)),
        Insn::Jump { opcode, target } => {
            return Ok(Lowered::Branch {
                opcode: *opcode,
                target: *target,
            });
        }
        Insn::TableSwitch {
            low,
            high,
            default,
            targets,
        } => {
            return Ok(Lowered::Table {
                low: *low,
                high: *high,
                default: *default,
                targets: targets.clone(),
            });
        }
        Insn::LookupSwitch { default, pairs } => {
            return Ok(Lowered::Lookup {
                default: *default,
                pairs: pairs.clone(),
            });
        }
        Insn::Simple(opcode) => vec![*opcode],
        Insn::Push(constant) => lower_push(pool, constant)?,
        Insn::Var { opcode, index } => lower_var(*opcode, *index),
        Insn::Iinc { index, delta } => match (u8::try_from(*index), i8::try_from(*delta)) {
            (Ok(index), Ok(delta)) => vec![opcodes::IINC, index, delta as u8],
            _ => {
                let mut bytes = vec![opcodes::WIDE, opcodes::IINC];
                bytes.extend(index.to_be_bytes());
                bytes.extend(delta.to_be_bytes());
                bytes
            }
        },
        Insn::Field {
            opcode,
            owner,
            name,
            descriptor,
        } => with_index(*opcode, pool.field(owner, name, descriptor)?),
        Insn::Invoke {
            opcode,
            owner,
            name,
            descriptor,
            interface,
        } => {
            let index = pool.method(owner, name, descriptor, *interface)?;
            let mut bytes = with_index(*opcode, index);
            if *opcode == opcodes::INVOKEINTERFACE {
                let parsed = method_descriptor(descriptor)?;
                let slots = parameter_slots(&parsed, false);
                bytes.push(u8::try_from(slots).context("too many interface arguments")?);
                bytes.push(0);
            }
            bytes
        }
        Insn::Type { opcode, class } => with_index(*opcode, pool.class(class)?),
        Insn::NewArray(code) => vec![opcodes::NEWARRAY, *code],
        Insn::MultiNewArray { descriptor, dims } => {
            let mut bytes = with_index(opcodes::MULTIANEWARRAY, pool.class(descriptor)?);
            bytes.push(*dims);
            bytes
        }
        Insn::Opaque { detail, .. } => anyhow::bail!("cannot re-encode {detail}"),
    };
    Ok(Lowered::Bytes(bytes))
}

fn lower_push(pool: &mut ConstantPool, constant: &Constant) -> Result<Vec<u8>> {
    let bytes = match constant {
        Constant::Int(value @ -1..=5) => vec![(opcodes::ICONST_0 as i32 + value) as u8],
        Constant::Int(value) if i8::try_from(*value).is_ok() => {
            vec![opcodes::BIPUSH, *value as i8 as u8]
        }
        Constant::Int(value) if i16::try_from(*value).is_ok() => {
            let mut bytes = vec![opcodes::SIPUSH];
            bytes.extend((*value as i16).to_be_bytes());
            bytes
        }
        Constant::Long(value @ 0..=1) => vec![opcodes::LCONST_0 + *value as u8],
        Constant::Float(value) if [0.0f32, 1.0, 2.0].iter().any(|c| c.to_bits() == value.to_bits()) => {
            vec![opcodes::FCONST_0 + *value as u8]
        }
        Constant::Double(value) if [0.0f64, 1.0].iter().any(|c| c.to_bits() == value.to_bits()) => {
            vec![opcodes::DCONST_0 + *value as u8]
        }
        Constant::Long(_) | Constant::Double(_) => with_index(opcodes::LDC2_W, pool.constant(constant)?),
        _ => {
            let index = pool.constant(constant)?;
            match u8::try_from(index) {
                Ok(short) => vec![opcodes::LDC, short],
                Err(_) => with_index(opcodes::LDC_W, index),
            }
        }
    };
    Ok(bytes)
}

fn lower_var(opcode: u8, index: u16) -> Vec<u8> {
    match u8::try_from(index) {
        Ok(short @ 0..=3) if (opcodes::ILOAD..=opcodes::ALOAD).contains(&opcode) => {
            vec![opcodes::ILOAD_0 + (opcode - opcodes::ILOAD) * 4 + short]
        }
        Ok(short @ 0..=3) if (opcodes::ISTORE..=opcodes::ASTORE).contains(&opcode) => {
            vec![opcodes::ISTORE_0 + (opcode - opcodes::ISTORE) * 4 + short]
        }
        Ok(short) => vec![opcode, short],
        Err(_) => {
            let mut bytes = vec![opcodes::WIDE, opcode];
            bytes.extend(index.to_be_bytes());
            bytes
        }
    }
}

fn with_index(opcode: u8, index: u16) -> Vec<u8> {
    let [high, low] = index.to_be_bytes();
    vec![opcode, high, low]
}

fn count(len: usize) -> Result<u16> {
    u16::try_from(len).context("table has more than 65535 entries")
}

fn put_u16(out: &mut Vec<u8>, value: u16) {
    out.extend(value.to_be_bytes());
}

fn put_u32(out: &mut Vec<u8>, value: u32) {
    out.extend(value.to_be_bytes());
}

fn put_i32(out: &mut Vec<u8>, value: i32) {
    out.extend(value.to_be_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{ACC_PUBLIC, ACC_STATIC, TryCatch};
    use crate::scan::{parse_class_bytes, scan_inputs};
    use crate::test_harness::ModelBuilder;

    fn reparse(classes: &ClassSet, id: ClassId) -> crate::scan::ParsedClass {
        let bytes = store(classes, id).expect("store");
        parse_class_bytes(&bytes).expect("reparse")
    }

    #[test]
    fn modified_classes_round_trip_through_the_decoder() {
        let mut model = ModelBuilder::new();
        let class = model.class("p/Counter", None);
        model.field(class, "count", "J", ACC_PUBLIC);
        let insns = vec![
            Insn::Label(LabelId(0)),
            Insn::Line(12),
            Insn::Var {
                opcode: opcodes::ILOAD,
                index: 0,
            },
            Insn::Jump {
                opcode: opcodes::IFEQ,
                target: LabelId(1),
            },
            Insn::Push(Constant::String("caf\u{e9}".to_string())),
            Insn::Simple(opcodes::ARETURN),
            Insn::Label(LabelId(1)),
            Insn::Simple(opcodes::ACONST_NULL),
            Insn::Simple(opcodes::ARETURN),
            Insn::Label(LabelId(2)),
            Insn::Simple(opcodes::ATHROW),
        ];
        let method = model.method(class, "pick", "(I)Ljava/lang/String;", ACC_PUBLIC | ACC_STATIC, insns);
        let mut classes = model.finish();
        if let Some(code) = classes.method_mut(method).code.as_mut() {
            code.try_catches.push(TryCatch {
                start: LabelId(0),
                end: LabelId(1),
                handler: LabelId(2),
                catch_type: Some("java/lang/Exception".to_string()),
            });
            code.next_label = 3;
        }

        let parsed = reparse(&classes, class);
        assert_eq!(parsed.class.name, "p/Counter");
        assert_eq!(parsed.class.major_version, 50);
        assert_eq!(parsed.fields[0].descriptor, "J");
        let code = parsed.methods[0].code.as_ref().expect("code");
        assert_eq!(code.max_stack, 1);
        assert_eq!(code.max_locals, 1);
        assert!(code.insns.contains(&Insn::Line(12)));
        assert!(code.insns.contains(&Insn::Push(Constant::String("caf\u{e9}".to_string()))));
        assert_eq!(code.try_catches.len(), 1);
        assert_eq!(
            code.try_catches[0].catch_type.as_deref(),
            Some("java/lang/Exception")
        );
    }

    #[test]
    fn compact_and_wide_forms_are_chosen() {
        let mut pool = ConstantPool::new();
        let lowered = |pool: &mut ConstantPool, insn: Insn| match lower(pool, &insn).expect("lower") {
            Lowered::Bytes(bytes) => bytes,
            _ => panic!("expected bytes"),
        };
        assert_eq!(lowered(&mut pool, Insn::Push(Constant::Int(-1))), vec![opcodes::ICONST_M1]);
        assert_eq!(lowered(&mut pool, Insn::Push(Constant::Int(100))), vec![opcodes::BIPUSH, 100]);
        assert_eq!(
            lowered(&mut pool, Insn::Push(Constant::Int(1000))),
            vec![opcodes::SIPUSH, 0x03, 0xe8]
        );
        assert_eq!(lowered(&mut pool, Insn::Push(Constant::Int(100_000)))[0], opcodes::LDC);
        assert_eq!(lowered(&mut pool, Insn::Push(Constant::Float(2.0))), vec![opcodes::FCONST_2]);
        assert_eq!(lowered(&mut pool, Insn::Push(Constant::Long(9)))[0], opcodes::LDC2_W);
        assert_eq!(
            lowered(&mut pool, Insn::Var {
                opcode: opcodes::DSTORE,
                index: 3
            }),
            vec![opcodes::DSTORE_3]
        );
        assert_eq!(
            lowered(&mut pool, Insn::Var {
                opcode: opcodes::ALOAD,
                index: 300
            }),
            vec![opcodes::WIDE, opcodes::ALOAD, 0x01, 0x2c]
        );
        assert_eq!(
            lowered(&mut pool, Insn::Iinc {
                index: 1,
                delta: 200
            }),
            vec![opcodes::WIDE, opcodes::IINC, 0x00, 0x01, 0x00, 0xc8]
        );
    }

    #[test]
    fn opaque_instructions_cannot_be_encoded() {
        let mut model = ModelBuilder::new();
        let class = model.class("p/Lambda", None);
        model.method(class, "run", "()V", ACC_PUBLIC, vec![
            Insn::Opaque {
                opcode: opcodes::INVOKEDYNAMIC,
                detail: "invokedynamic run ()Ljava/lang/Runnable;".to_string(),
            },
            Insn::Simple(opcodes::RETURN),
        ]);
        let classes = model.finish();
        let err = store(&classes, class).expect_err("opaque");
        assert!(format!("{err:#}").contains("cannot re-encode"), "{err:#}");
    }

    #[test]
    fn switches_are_padded_and_sorted() {
        let mut model = ModelBuilder::new();
        let class = model.class("p/Switch", None);
        model.method(class, "pick", "(I)I", ACC_PUBLIC | ACC_STATIC, vec![
            Insn::Var {
                opcode: opcodes::ILOAD,
                index: 0,
            },
            Insn::LookupSwitch {
                default: LabelId(0),
                pairs: vec![(9, LabelId(1)), (2, LabelId(0))],
            },
            Insn::Label(LabelId(0)),
            Insn::Push(Constant::Int(0)),
            Insn::Simple(opcodes::IRETURN),
            Insn::Label(LabelId(1)),
            Insn::Push(Constant::Int(1)),
            Insn::Simple(opcodes::IRETURN),
        ]);
        let classes = model.finish();
        let parsed = reparse(&classes, class);
        let code = parsed.methods[0].code.as_ref().expect("code");
        let Insn::LookupSwitch { pairs, .. } = &code.insns[1] else {
            panic!("expected lookupswitch, got {:?}", code.insns[1]);
        };
        assert_eq!(pairs.iter().map(|(key, _)| *key).collect::<Vec<_>>(), vec![2, 9]);
    }

    #[test]
    fn unmodified_classes_keep_their_bytes_and_jar_output_keeps_resources() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut model = ModelBuilder::new();
        let class = model.class("p/Kept", None);
        let mut classes = model.finish();
        classes.class_mut(class).original = Some(vec![0xCA, 0xFE]);
        assert_eq!(store(&classes, class).expect("store"), vec![0xCA, 0xFE]);

        classes.class_mut(class).modified = true;
        let jar = temp.path().join("out").join("patched.jar");
        let resources = [Resource {
            name: "app.properties".to_string(),
            bytes: b"k=v".to_vec(),
        }];
        let written = write_output(&classes, &jar, &resources).expect("write jar");
        assert_eq!(written, 1);
        let output = scan_inputs(&[jar], None).expect("scan output");
        assert_eq!(output.classes[0].parsed.class.name, "p/Kept");
        assert_eq!(output.resources, resources.to_vec());
    }
}
