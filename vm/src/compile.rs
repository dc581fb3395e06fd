//! Compile an operator pipeline into auditable bytecode.
//!
//! The compiled program replays the exact operator sequence through the
//! embedded state and terminates with `HALT`, so an engine pipeline can be
//! re-executed later from verified instructions. `NORMALIZE`, `INFER`, and
//! `SUMMARIZE` use their shortcut opcodes; `ANSWER` and `EXPLAIN` go
//! through `ENQ_OP`/`DISPATCH` because their shortcut form consumes a
//! stack payload, and a replayed pipeline must fall back to the seed in
//! context exactly as the engine does.

use crate::opcode::{Instruction, Opcode};
use crate::program::{Const, Program};
use sema_engine::Operator;
use sema_ir::operation;

/// Shortcut opcode for an operator, when one exists and is
/// stack-neutral in replay.
#[must_use]
pub fn phi_opcode(op: Operator) -> Option<Opcode> {
    match op {
        Operator::Normalize => Some(Opcode::PhiNormalize),
        Operator::Infer => Some(Opcode::PhiInfer),
        Operator::Summarize => Some(Opcode::PhiSummarize),
        _ => None,
    }
}

/// Compile an operator sequence into a verified-ready program.
#[must_use]
pub fn compile_pipeline(ops: &[Operator]) -> Program {
    let mut instructions = Vec::new();
    let mut constants = Vec::new();
    for op in ops {
        if let Some(opcode) = phi_opcode(*op) {
            instructions.push(Instruction::bare(opcode));
            continue;
        }
        let index = constants.len() as u32;
        constants.push(Const::Node(operation(op.as_str(), [])));
        instructions.push(Instruction::new(Opcode::PushConst, index));
        instructions.push(Instruction::bare(Opcode::EnqOp));
        instructions.push(Instruction::bare(Opcode::Dispatch));
    }
    instructions.push(Instruction::bare(Opcode::Halt));
    Program::new(instructions, constants)
}
