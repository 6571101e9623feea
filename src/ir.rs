use std::collections::BTreeSet;

pub(crate) const ACC_PUBLIC: u16 = 0x0001;
pub(crate) const ACC_PRIVATE: u16 = 0x0002;
pub(crate) const ACC_PROTECTED: u16 = 0x0004;
pub(crate) const ACC_STATIC: u16 = 0x0008;
pub(crate) const ACC_SUPER: u16 = 0x0020;
pub(crate) const ACC_INTERFACE: u16 = 0x0200;
pub(crate) const ACC_ABSTRACT: u16 = 0x0400;
pub(crate) const ACC_ENUM: u16 = 0x4000;

pub(crate) const OBJECT_CLASS: &str = "java/lang/Object";

/// Arena index of a class in the class set.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct ClassId(pub(crate) usize);

/// Arena index of a method. Identity, not signature, distinguishes methods.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct MethodId(pub(crate) usize);

/// Arena index of a field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct FieldId(pub(crate) usize);

/// Label identity, unique within one method body.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct LabelId(pub(crate) u32);

/// A loaded, synthesized or stubbed class.
#[derive(Clone, Debug)]
pub(crate) struct Class {
    pub(crate) name: String,
    pub(crate) super_name: Option<String>,
    pub(crate) interfaces: Vec<String>,
    pub(crate) access: u16,
    pub(crate) major_version: u16,
    pub(crate) minor_version: u16,
    pub(crate) source_file: Option<String>,
    /// Declared fields in emit order.
    pub(crate) fields: Vec<FieldId>,
    /// Declared methods in emit order.
    pub(crate) methods: Vec<MethodId>,
    /// Method handles visible through this class while matching; inherited
    /// handles replace the declared ones they override after simplify.
    pub(crate) view: Vec<MethodId>,
    /// Classpath classes and external stubs; never matched, never written.
    pub(crate) hidden: bool,
    /// Stub for a class that is referenced but could not be loaded.
    pub(crate) external: bool,
    pub(crate) original: Option<Vec<u8>>,
    pub(crate) modified: bool,
    pub(crate) removed: bool,
}

impl Class {
    pub(crate) fn new(name: impl Into<String>, super_name: Option<String>, access: u16) -> Self {
        Self {
            name: name.into(),
            super_name,
            interfaces: Vec::new(),
            access,
            major_version: 50,
            minor_version: 0,
            source_file: None,
            fields: Vec::new(),
            methods: Vec::new(),
            view: Vec::new(),
            hidden: false,
            external: false,
            original: None,
            modified: true,
            removed: false,
        }
    }

    pub(crate) fn is_interface(&self) -> bool {
        self.access & ACC_INTERFACE != 0
    }

    /// Supertypes in the order simplify visits them: interfaces, then super.
    pub(crate) fn supertypes(&self) -> impl Iterator<Item = &str> {
        self.interfaces
            .iter()
            .map(String::as_str)
            .chain(self.super_name.as_deref())
    }
}

/// A method declaration and its optional body.
#[derive(Clone, Debug)]
pub(crate) struct Method {
    /// Declaring class.
    pub(crate) class: ClassId,
    pub(crate) name: String,
    pub(crate) descriptor: String,
    pub(crate) access: u16,
    /// Classes this handle is reachable through for matching purposes.
    pub(crate) owners: BTreeSet<ClassId>,
    pub(crate) hidden: bool,
    pub(crate) exceptions: Vec<String>,
    pub(crate) code: Option<Code>,
}

impl Method {
    pub(crate) fn is_static(&self) -> bool {
        self.access & ACC_STATIC != 0
    }

    /// Public or protected instance methods take part in inheritance merging.
    pub(crate) fn is_inheritable(&self) -> bool {
        self.access & (ACC_PUBLIC | ACC_PROTECTED) != 0 && !self.is_static()
    }
}

/// A field declaration.
#[derive(Clone, Debug)]
pub(crate) struct Field {
    pub(crate) class: ClassId,
    pub(crate) name: String,
    pub(crate) descriptor: String,
    pub(crate) access: u16,
    pub(crate) owners: BTreeSet<ClassId>,
    pub(crate) hidden: bool,
    pub(crate) value: Option<Constant>,
}

impl Field {
    pub(crate) fn is_inheritable(&self) -> bool {
        self.access & (ACC_PUBLIC | ACC_PROTECTED) != 0 && self.access & ACC_STATIC == 0
    }
}

/// Method body: instruction list plus exception regions.
#[derive(Clone, Debug, Default)]
pub(crate) struct Code {
    pub(crate) max_stack: u16,
    pub(crate) max_locals: u16,
    pub(crate) insns: Vec<Insn>,
    pub(crate) try_catches: Vec<TryCatch>,
    pub(crate) next_label: u32,
}

impl Code {
    pub(crate) fn new_label(&mut self) -> LabelId {
        let label = LabelId(self.next_label);
        self.next_label += 1;
        label
    }
}

/// Exception handler region; `catch_type` of `None` catches everything.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct TryCatch {
    pub(crate) start: LabelId,
    pub(crate) end: LabelId,
    pub(crate) handler: LabelId,
    pub(crate) catch_type: Option<String>,
}

/// Loadable constant.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Constant {
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    String(String),
    /// Internal name, or an array descriptor.
    Class(String),
}

impl Constant {
    /// Bitwise comparison so that NaN constants match themselves.
    pub(crate) fn same_value(&self, other: &Constant) -> bool {
        match (self, other) {
            (Constant::Float(a), Constant::Float(b)) => a.to_bits() == b.to_bits(),
            (Constant::Double(a), Constant::Double(b)) => a.to_bits() == b.to_bits(),
            _ => self == other,
        }
    }

    pub(crate) fn is_wide(&self) -> bool {
        matches!(self, Constant::Long(_) | Constant::Double(_))
    }
}

/// Decoded instruction. Short and wide encodings are folded into one form.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Insn {
    /// Branch target marker; occupies no bytes.
    Label(LabelId),
    /// Source line marker for the next real instruction.
    Line(u16),
    /// Opcode with no operands.
    Simple(u8),
    /// Any constant push: `iconst`, `bipush`, `sipush`, `ldc` and friends.
    Push(Constant),
    Var {
        opcode: u8,
        index: u16,
    },
    Iinc {
        index: u16,
        delta: i16,
    },
    Field {
        opcode: u8,
        owner: String,
        name: String,
        descriptor: String,
    },
    Invoke {
        opcode: u8,
        owner: String,
        name: String,
        descriptor: String,
        interface: bool,
    },
    /// `new`, `anewarray`, `checkcast`, `instanceof`.
    Type {
        opcode: u8,
        class: String,
    },
    /// `newarray` with its primitive type code.
    NewArray(u8),
    MultiNewArray {
        descriptor: String,
        dims: u8,
    },
    Jump {
        opcode: u8,
        target: LabelId,
    },
    TableSwitch {
        low: i32,
        high: i32,
        default: LabelId,
        targets: Vec<LabelId>,
    },
    LookupSwitch {
        default: LabelId,
        pairs: Vec<(i32, LabelId)>,
    },
    /// Instruction kept only for display (`invokedynamic`, dynamic constants).
    Opaque {
        opcode: u8,
        detail: String,
    },
}

impl Insn {
    /// Pseudo instructions carry no bytecode.
    pub(crate) fn is_pseudo(&self) -> bool {
        matches!(self, Insn::Label(_) | Insn::Line(_))
    }

    /// Labels referenced as branch targets by this instruction.
    pub(crate) fn branch_targets(&self) -> Vec<LabelId> {
        match self {
            Insn::Jump { target, .. } => vec![*target],
            Insn::TableSwitch {
                default, targets, ..
            } => std::iter::once(*default)
                .chain(targets.iter().copied())
                .collect(),
            Insn::LookupSwitch { default, pairs } => std::iter::once(*default)
                .chain(pairs.iter().map(|(_, label)| *label))
                .collect(),
            _ => Vec::new(),
        }
    }
}
