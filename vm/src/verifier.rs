//! Static program verifier.
//!
//! Runs at load time, before any instruction executes. A program is
//! rejected when any operand is out of range for its class, any register
//! index falls outside 0–7, any jump/call target falls outside the
//! instruction bounds, or no `HALT` is reachable from entry. Verification
//! failure is a load-time error; the VM never begins executing an
//! unverified program.

use crate::opcode::{Opcode, OperandKind, REGISTER_COUNT};
use crate::program::Program;
use thiserror::Error;

/// Verification failure, naming the offending instruction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerifyError {
    /// Programs must contain at least one instruction.
    #[error("program must contain at least one instruction")]
    EmptyProgram,
    /// Constant-pool index out of range.
    #[error("instruction {index}: {opcode} constant index {operand} out of range (pool size {pool})")]
    ConstantOutOfRange {
        /// Instruction index.
        index: usize,
        /// Opcode.
        opcode: Opcode,
        /// Offending operand.
        operand: u32,
        /// Constant-pool size.
        pool: usize,
    },
    /// Register index outside 0–7.
    #[error("instruction {index}: {opcode} register index {operand} out of range (0-{})", REGISTER_COUNT - 1)]
    RegisterOutOfRange {
        /// Instruction index.
        index: usize,
        /// Opcode.
        opcode: Opcode,
        /// Offending operand.
        operand: u32,
    },
    /// Jump or call target outside the instruction bounds.
    #[error("instruction {index}: {opcode} target {operand} out of range (program length {len})")]
    TargetOutOfRange {
        /// Instruction index.
        index: usize,
        /// Opcode.
        opcode: Opcode,
        /// Offending target.
        operand: u32,
        /// Program length.
        len: usize,
    },
    /// No `HALT` instruction is reachable from entry.
    #[error("no reachable HALT instruction")]
    NoReachableHalt,
}

/// Verify a program.
///
/// # Errors
///
/// Returns the first [`VerifyError`] found; on success the program is safe
/// to execute with respect to static bounds.
pub fn verify(program: &Program) -> Result<(), VerifyError> {
    let instructions = &program.instructions;
    if instructions.is_empty() {
        return Err(VerifyError::EmptyProgram);
    }
    let len = instructions.len();
    let pool = program.constants.len();

    for (index, instruction) in instructions.iter().enumerate() {
        let opcode = instruction.opcode;
        let operand = instruction.operand;
        match opcode.operand_kind() {
            OperandKind::Const => {
                if (operand as usize) >= pool {
                    return Err(VerifyError::ConstantOutOfRange {
                        index,
                        opcode,
                        operand,
                        pool,
                    });
                }
            }
            OperandKind::Reg => {
                if operand >= REGISTER_COUNT {
                    return Err(VerifyError::RegisterOutOfRange {
                        index,
                        opcode,
                        operand,
                    });
                }
            }
            OperandKind::Target => {
                if (operand as usize) >= len {
                    return Err(VerifyError::TargetOutOfRange {
                        index,
                        opcode,
                        operand,
                        len,
                    });
                }
            }
            OperandKind::OptionalConst => {
                if operand > 0 && (operand as usize - 1) >= pool {
                    return Err(VerifyError::ConstantOutOfRange {
                        index,
                        opcode,
                        operand: operand - 1,
                        pool,
                    });
                }
            }
            OperandKind::Count | OperandKind::None => {}
        }
    }

    if !halt_reachable(program) {
        return Err(VerifyError::NoReachableHalt);
    }
    Ok(())
}

/// Worklist reachability over fallthrough, `JMP`, and `CALL` edges.
///
/// `RET` and `TRAP` end their paths: a `RET` continuation is always some
/// caller's fallthrough successor, which the `CALL` edge already covers.
fn halt_reachable(program: &Program) -> bool {
    let instructions = &program.instructions;
    let len = instructions.len();
    let mut visited = vec![false; len];
    let mut worklist = vec![0usize];

    while let Some(pc) = worklist.pop() {
        if pc >= len || visited[pc] {
            continue;
        }
        visited[pc] = true;
        let instruction = &instructions[pc];
        match instruction.opcode {
            Opcode::Halt => return true,
            Opcode::Jmp => worklist.push(instruction.operand as usize),
            Opcode::Call => {
                worklist.push(instruction.operand as usize);
                worklist.push(pc + 1);
            }
            Opcode::Ret | Opcode::Trap => {}
            _ => worklist.push(pc + 1),
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opcode::Instruction;
    use crate::program::Const;

    fn program(source: &str, constants: Vec<Const>) -> Program {
        Program::from_asm(source, constants).unwrap()
    }

    #[test]
    fn empty_program_is_rejected() {
        let empty = Program::new(Vec::new(), Vec::new());
        assert_eq!(verify(&empty), Err(VerifyError::EmptyProgram));
    }

    #[test]
    fn missing_halt_is_rejected() {
        let p = program("NOOP\nNOOP", vec![]);
        assert_eq!(verify(&p), Err(VerifyError::NoReachableHalt));
    }

    #[test]
    fn unreachable_halt_is_rejected() {
        // Entry jumps over the only HALT into a cycle.
        let p = program("JMP 2\nHALT\nJMP 0", vec![]);
        assert_eq!(verify(&p), Err(VerifyError::NoReachableHalt));
    }

    #[test]
    fn halt_behind_a_call_is_reachable() {
        let p = program("CALL 2\nHALT\nRET", vec![]);
        assert_eq!(verify(&p), Ok(()));
    }

    #[test]
    fn jump_target_out_of_bounds_is_rejected() {
        let p = program("JMP 9\nHALT", vec![]);
        assert_eq!(
            verify(&p),
            Err(VerifyError::TargetOutOfRange {
                index: 0,
                opcode: Opcode::Jmp,
                operand: 9,
                len: 2,
            })
        );
    }

    #[test]
    fn register_index_out_of_range_is_rejected() {
        // The assembler already refuses register 8, so build it directly.
        let p = Program::new(
            vec![
                Instruction::new(Opcode::LoadReg, 8),
                Instruction::bare(Opcode::Halt),
            ],
            vec![],
        );
        assert_eq!(
            verify(&p),
            Err(VerifyError::RegisterOutOfRange {
                index: 0,
                opcode: Opcode::LoadReg,
                operand: 8,
            })
        );
    }

    #[test]
    fn constant_index_out_of_range_is_rejected() {
        let p = program("PUSH_TEXT 1\nHALT", vec![Const::Text("only".to_string())]);
        assert!(matches!(
            verify(&p),
            Err(VerifyError::ConstantOutOfRange {
                index: 0,
                operand: 1,
                ..
            })
        ));
    }

    #[test]
    fn trap_constant_reference_is_checked() {
        let p = program("TRAP 5\nHALT", vec![]);
        assert!(matches!(
            verify(&p),
            Err(VerifyError::ConstantOutOfRange { operand: 5, .. })
        ));
        let ok = program("TRAP\nHALT", vec![]);
        assert_eq!(verify(&ok), Ok(()));
    }

    #[test]
    fn well_formed_program_verifies() {
        let p = program(
            "PUSH_CONST 0\nPUSH_TEXT 1\nNEW_STRUCT 1\nSTORE_ANSWER\nHALT",
            vec![
                Const::Text("answer".to_string()),
                Const::Text("hello".to_string()),
            ],
        );
        assert_eq!(verify(&p), Ok(()));
    }
}
