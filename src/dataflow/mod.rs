//! Stack-effect table and the worklist pass that sizes the operand stack of
//! re-encoded methods.

mod opcode_semantics;
mod worklist;

pub(crate) use worklist::max_stack;
