use std::collections::{BTreeMap, VecDeque};

use anyhow::{Context, Result};

use crate::dataflow::opcode_semantics::{Flow, stack_effect, flow};
use crate::ir::{Code, Insn, LabelId};
use crate::opcodes;

/// Deterministic worklist pass over a method body computing the deepest
/// operand stack any path reaches. Exception handlers start with the thrown
/// reference on the stack.
pub(crate) fn max_stack(code: &Code) -> Result<u16> {
    let positions = label_positions(code);
    let position = |label: LabelId| -> Result<usize> {
        positions
            .get(&label)
            .copied()
            .with_context(|| format!("label {} is never placed", label.0))
    };

    let mut depths: Vec<Option<u16>> = vec![None; code.insns.len()];
    let mut queue = VecDeque::from([(0usize, 0u16)]);
    for region in &code.try_catches {
        queue.push_back((position(region.handler)?, 1));
    }

    let mut deepest = 0u16;
    while let Some((index, depth)) = queue.pop_front() {
        let Some(insn) = code.insns.get(index) else {
            continue;
        };
        match depths[index] {
            Some(seen) if seen == depth => continue,
            Some(seen) => anyhow::bail!(
                "inconsistent stack height at instruction {index}: {seen} and {depth}"
            ),
            None => depths[index] = Some(depth),
        }
        deepest = deepest.max(depth);

        let effect = stack_effect(insn)?;
        let after = depth
            .checked_sub(effect.pop)
            .with_context(|| format!("stack underflow at instruction {index}"))?
            .checked_add(effect.push)
            .context("stack overflow")?;
        deepest = deepest.max(after);

        match insn {
            Insn::Jump {
                opcode: opcodes::JSR,
                target,
            } => {
                queue.push_back((position(*target)?, after));
                queue.push_back((index + 1, depth));
                continue;
            }
            _ => {
                for target in insn.branch_targets() {
                    queue.push_back((position(target)?, after));
                }
            }
        }
        if matches!(flow(insn), Flow::Next | Flow::Branch) {
            queue.push_back((index + 1, after));
        }
    }
    Ok(deepest)
}

fn label_positions(code: &Code) -> BTreeMap<LabelId, usize> {
    code.insns
        .iter()
        .enumerate()
        .filter_map(|(index, insn)| match insn {
            Insn::Label(label) => Some((*label, index)),
            _ => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Constant, TryCatch};

    #[test]
    fn straight_line_code_tracks_peak() {
        let code = Code {
            insns: vec![
                Insn::Push(Constant::Long(7)),
                Insn::Push(Constant::Long(8)),
                Insn::Simple(opcodes::LADD),
                Insn::Simple(opcodes::LRETURN),
            ],
            ..Code::default()
        };
        assert_eq!(max_stack(&code).expect("max"), 4);
    }

    #[test]
    fn branches_and_handlers_are_followed() {
        let code = Code {
            insns: vec![
                Insn::Label(LabelId(0)),
                Insn::Push(Constant::Int(1)),
                Insn::Jump {
                    opcode: opcodes::IFEQ,
                    target: LabelId(1),
                },
                Insn::Label(LabelId(2)),
                Insn::Simple(opcodes::RETURN),
                Insn::Label(LabelId(1)),
                Insn::Simple(opcodes::ACONST_NULL),
                Insn::Simple(opcodes::DUP),
                Insn::Simple(opcodes::DUP),
                Insn::Simple(opcodes::ATHROW),
                Insn::Label(LabelId(3)),
                Insn::Simple(opcodes::ATHROW),
            ],
            try_catches: vec![TryCatch {
                start: LabelId(0),
                end: LabelId(2),
                handler: LabelId(3),
                catch_type: None,
            }],
            next_label: 4,
            ..Code::default()
        };
        assert_eq!(max_stack(&code).expect("max"), 3);
    }

    #[test]
    fn underflow_is_an_error() {
        let code = Code {
            insns: vec![Insn::Simple(opcodes::POP), Insn::Simple(opcodes::RETURN)],
            ..Code::default()
        };
        let err = max_stack(&code).expect_err("underflow");
        assert!(err.to_string().contains("underflow"), "{err}");
    }

    #[test]
    fn unplaced_labels_are_reported() {
        let code = Code {
            insns: vec![Insn::Jump {
                opcode: opcodes::GOTO,
                target: LabelId(9),
            }],
            ..Code::default()
        };
        assert!(max_stack(&code).is_err());
    }
}
