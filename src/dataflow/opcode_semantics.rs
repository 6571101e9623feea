use anyhow::{Context, Result};

use crate::descriptor::{method_descriptor, parse_type, slot_size};
use crate::ir::Insn;
use crate::opcodes;

/// Operand-stack slots consumed and produced by one instruction.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub(crate) struct StackEffect {
    pub(crate) pop: u16,
    pub(crate) push: u16,
}

impl StackEffect {
    const fn new(pop: u16, push: u16) -> Self {
        Self { pop, push }
    }
}

/// How control leaves an instruction.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum Flow {
    /// Continues with the next instruction.
    Next,
    /// May jump or continue.
    Branch,
    /// Only jumps.
    Jump,
    /// Leaves the method or the subroutine.
    Exit,
}

/// Stack effect of a decoded instruction. Pseudo instructions have none.
pub(crate) fn stack_effect(insn: &Insn) -> Result<StackEffect> {
    let effect = match insn {
        Insn::Label(_) | Insn::Line(_) | Insn::Iinc { .. } => StackEffect::default(),
        Insn::Simple(opcode) => simple_effect(*opcode)
            .with_context(|| format!("no stack effect for opcode 0x{opcode:02x}"))?,
        Insn::Push(constant) => StackEffect::new(0, if constant.is_wide() { 2 } else { 1 }),
        Insn::Var { opcode, .. } => match *opcode {
            opcodes::LLOAD | opcodes::DLOAD => StackEffect::new(0, 2),
            opcodes::ILOAD | opcodes::FLOAD | opcodes::ALOAD => StackEffect::new(0, 1),
            opcodes::LSTORE | opcodes::DSTORE => StackEffect::new(2, 0),
            opcodes::ISTORE | opcodes::FSTORE | opcodes::ASTORE => StackEffect::new(1, 0),
            opcodes::RET => StackEffect::default(),
            other => anyhow::bail!("unexpected local variable opcode 0x{other:02x}"),
        },
        Insn::Field {
            opcode, descriptor, ..
        } => {
            let size = slot_size(&parse_type(descriptor).map_err(anyhow::Error::msg)?);
            match *opcode {
                opcodes::GETSTATIC => StackEffect::new(0, size),
                opcodes::PUTSTATIC => StackEffect::new(size, 0),
                opcodes::GETFIELD => StackEffect::new(1, size),
                _ => StackEffect::new(1 + size, 0),
            }
        }
        Insn::Invoke {
            opcode, descriptor, ..
        } => {
            let descriptor = method_descriptor(descriptor)?;
            let arguments: u16 = descriptor.parameter_types().iter().map(slot_size).sum();
            let receiver = u16::from(*opcode != opcodes::INVOKESTATIC);
            StackEffect::new(arguments + receiver, slot_size(descriptor.return_type()))
        }
        Insn::Type { opcode, .. } => match *opcode {
            opcodes::NEW => StackEffect::new(0, 1),
            _ => StackEffect::new(1, 1),
        },
        Insn::NewArray(_) => StackEffect::new(1, 1),
        Insn::MultiNewArray { dims, .. } => StackEffect::new(u16::from(*dims), 1),
        Insn::Jump { opcode, .. } => match *opcode {
            opcodes::GOTO => StackEffect::default(),
            opcodes::JSR => StackEffect::new(0, 1),
            opcodes::IF_ICMPEQ..=opcodes::IF_ACMPNE => StackEffect::new(2, 0),
            _ => StackEffect::new(1, 0),
        },
        Insn::TableSwitch { .. } | Insn::LookupSwitch { .. } => StackEffect::new(1, 0),
        Insn::Opaque { detail, .. } => anyhow::bail!("no stack effect for {detail}"),
    };
    Ok(effect)
}

/// Control flow out of an instruction.
pub(crate) fn flow(insn: &Insn) -> Flow {
    match insn {
        Insn::Jump {
            opcode: opcodes::GOTO,
            ..
        } => Flow::Jump,
        Insn::Jump { .. } => Flow::Branch,
        Insn::TableSwitch { .. } | Insn::LookupSwitch { .. } => Flow::Jump,
        Insn::Simple(opcode)
            if (opcodes::IRETURN..=opcodes::RETURN).contains(opcode) || *opcode == opcodes::ATHROW =>
        {
            Flow::Exit
        }
        Insn::Var {
            opcode: opcodes::RET,
            ..
        } => Flow::Exit,
        _ => Flow::Next,
    }
}

fn simple_effect(opcode: u8) -> Option<StackEffect> {
    let effect = match opcode {
        opcodes::NOP => StackEffect::new(0, 0),
        opcodes::ACONST_NULL => StackEffect::new(0, 1),
        opcodes::LALOAD | opcodes::DALOAD => StackEffect::new(2, 2),
        opcodes::IALOAD..=opcodes::SALOAD => StackEffect::new(2, 1),
        opcodes::LASTORE | opcodes::DASTORE => StackEffect::new(4, 0),
        opcodes::IASTORE..=opcodes::SASTORE => StackEffect::new(3, 0),
        opcodes::POP => StackEffect::new(1, 0),
        opcodes::POP2 => StackEffect::new(2, 0),
        opcodes::DUP => StackEffect::new(1, 2),
        opcodes::DUP_X1 => StackEffect::new(2, 3),
        opcodes::DUP_X2 => StackEffect::new(3, 4),
        opcodes::DUP2 => StackEffect::new(2, 4),
        opcodes::DUP2_X1 => StackEffect::new(3, 5),
        opcodes::DUP2_X2 => StackEffect::new(4, 6),
        opcodes::SWAP => StackEffect::new(2, 2),
        opcodes::IADD..=opcodes::DREM => {
            if (opcode - opcodes::IADD) % 2 == 1 {
                StackEffect::new(4, 2)
            } else {
                StackEffect::new(2, 1)
            }
        }
        opcodes::LNEG | opcodes::DNEG => StackEffect::new(2, 2),
        opcodes::INEG | opcodes::FNEG => StackEffect::new(1, 1),
        opcodes::LSHL | opcodes::LSHR | opcodes::LUSHR => StackEffect::new(3, 2),
        opcodes::ISHL | opcodes::ISHR | opcodes::IUSHR => StackEffect::new(2, 1),
        opcodes::LAND | opcodes::LOR | opcodes::LXOR => StackEffect::new(4, 2),
        opcodes::IAND | opcodes::IOR | opcodes::IXOR => StackEffect::new(2, 1),
        opcodes::I2L | opcodes::I2D | opcodes::F2L | opcodes::F2D => StackEffect::new(1, 2),
        opcodes::L2I | opcodes::L2F | opcodes::D2I | opcodes::D2F => StackEffect::new(2, 1),
        opcodes::L2D | opcodes::D2L => StackEffect::new(2, 2),
        opcodes::I2F | opcodes::F2I | opcodes::I2B | opcodes::I2C | opcodes::I2S => {
            StackEffect::new(1, 1)
        }
        opcodes::LCMP | opcodes::DCMPL | opcodes::DCMPG => StackEffect::new(4, 1),
        opcodes::FCMPL | opcodes::FCMPG => StackEffect::new(2, 1),
        opcodes::LRETURN | opcodes::DRETURN => StackEffect::new(2, 0),
        opcodes::IRETURN | opcodes::FRETURN | opcodes::ARETURN => StackEffect::new(1, 0),
        opcodes::RETURN => StackEffect::new(0, 0),
        opcodes::ARRAYLENGTH => StackEffect::new(1, 1),
        opcodes::ATHROW | opcodes::MONITORENTER | opcodes::MONITOREXIT => StackEffect::new(1, 0),
        _ => return None,
    };
    Some(effect)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Constant, LabelId};

    #[test]
    fn wide_values_take_two_slots() {
        assert_eq!(
            stack_effect(&Insn::Push(Constant::Double(1.5))).expect("effect"),
            StackEffect::new(0, 2)
        );
        assert_eq!(
            stack_effect(&Insn::Simple(opcodes::LADD)).expect("effect"),
            StackEffect::new(4, 2)
        );
        assert_eq!(
            stack_effect(&Insn::Simple(opcodes::FMUL)).expect("effect"),
            StackEffect::new(2, 1)
        );
        assert_eq!(
            stack_effect(&Insn::Simple(opcodes::LSHL)).expect("effect"),
            StackEffect::new(3, 2)
        );
    }

    #[test]
    fn member_effects_follow_descriptors() {
        let invoke = Insn::Invoke {
            opcode: opcodes::INVOKEVIRTUAL,
            owner: "a/B".to_string(),
            name: "m".to_string(),
            descriptor: "(JI)D".to_string(),
            interface: false,
        };
        assert_eq!(stack_effect(&invoke).expect("effect"), StackEffect::new(4, 2));
        let put = Insn::Field {
            opcode: opcodes::PUTFIELD,
            owner: "a/B".to_string(),
            name: "f".to_string(),
            descriptor: "J".to_string(),
        };
        assert_eq!(stack_effect(&put).expect("effect"), StackEffect::new(3, 0));
    }

    #[test]
    fn flow_classifies_terminators() {
        assert_eq!(flow(&Insn::Simple(opcodes::ARETURN)), Flow::Exit);
        assert_eq!(
            flow(&Insn::Jump {
                opcode: opcodes::IFEQ,
                target: LabelId(0)
            }),
            Flow::Branch
        );
        assert_eq!(
            flow(&Insn::Jump {
                opcode: opcodes::GOTO,
                target: LabelId(0)
            }),
            Flow::Jump
        );
        assert_eq!(flow(&Insn::Simple(opcodes::NOP)), Flow::Next);
    }
}
