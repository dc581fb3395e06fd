//! Textual assembler and disassembler.
//!
//! One mnemonic plus optional operand per line; `;` starts a comment;
//! mnemonics are case-insensitive and `Φ_*` aliases `PHI_*`. Register
//! operands are restricted to 0–7 at assembly time.

use crate::opcode::{Instruction, Opcode, OperandKind, REGISTER_COUNT};
use thiserror::Error;

/// Assembly failure, with the 1-based source line.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AsmError {
    /// Mnemonic not in the instruction set.
    #[error("line {line}: unknown mnemonic {mnemonic:?}")]
    UnknownMnemonic {
        /// Source line.
        line: usize,
        /// Offending mnemonic.
        mnemonic: String,
    },
    /// Operand missing for an opcode that requires one.
    #[error("line {line}: {mnemonic} requires an operand")]
    MissingOperand {
        /// Source line.
        line: usize,
        /// Opcode mnemonic.
        mnemonic: &'static str,
    },
    /// Operand present for an opcode that takes none, or extra tokens.
    #[error("line {line}: unexpected operand for {mnemonic}")]
    UnexpectedOperand {
        /// Source line.
        line: usize,
        /// Opcode mnemonic.
        mnemonic: &'static str,
    },
    /// Operand is not an unsigned integer.
    #[error("line {line}: invalid operand {operand:?}")]
    InvalidOperand {
        /// Source line.
        line: usize,
        /// Offending token.
        operand: String,
    },
    /// Register operand outside 0–7.
    #[error("line {line}: register index {index} out of range (0-{})", REGISTER_COUNT - 1)]
    RegisterOutOfRange {
        /// Source line.
        line: usize,
        /// Offending register index.
        index: u32,
    },
}

/// Assemble source text into instructions.
///
/// # Errors
///
/// Returns an [`AsmError`] naming the offending line.
pub fn assemble(source: &str) -> Result<Vec<Instruction>, AsmError> {
    let mut instructions = Vec::new();
    for (idx, raw_line) in source.lines().enumerate() {
        let line = idx + 1;
        let code = raw_line.split(';').next().unwrap_or_default().trim();
        if code.is_empty() {
            continue;
        }
        let mut parts = code.split_whitespace();
        let mnemonic = parts.next().unwrap_or_default();
        let opcode =
            Opcode::from_mnemonic(mnemonic).ok_or_else(|| AsmError::UnknownMnemonic {
                line,
                mnemonic: mnemonic.to_string(),
            })?;
        let operand_token = parts.next();
        if parts.next().is_some() {
            return Err(AsmError::UnexpectedOperand {
                line,
                mnemonic: opcode.mnemonic(),
            });
        }
        let operand = parse_operand(opcode, operand_token, line)?;
        instructions.push(Instruction::new(opcode, operand));
    }
    Ok(instructions)
}

fn parse_operand(
    opcode: Opcode,
    token: Option<&str>,
    line: usize,
) -> Result<u32, AsmError> {
    let parse = |token: &str| -> Result<u32, AsmError> {
        token.parse::<u32>().map_err(|_| AsmError::InvalidOperand {
            line,
            operand: token.to_string(),
        })
    };
    match opcode.operand_kind() {
        OperandKind::Const | OperandKind::Count | OperandKind::Target => {
            let token = token.ok_or(AsmError::MissingOperand {
                line,
                mnemonic: opcode.mnemonic(),
            })?;
            parse(token)
        }
        OperandKind::Reg => {
            let token = token.ok_or(AsmError::MissingOperand {
                line,
                mnemonic: opcode.mnemonic(),
            })?;
            let index = parse(token)?;
            if index >= REGISTER_COUNT {
                return Err(AsmError::RegisterOutOfRange { line, index });
            }
            Ok(index)
        }
        OperandKind::OptionalConst => match token {
            // Biased encoding: 0 means "no constant".
            Some(token) => Ok(parse(token)?.saturating_add(1)),
            None => Ok(0),
        },
        OperandKind::None => {
            if token.is_some() {
                return Err(AsmError::UnexpectedOperand {
                    line,
                    mnemonic: opcode.mnemonic(),
                });
            }
            Ok(0)
        }
    }
}

/// Render instructions back to assembler text.
#[must_use]
pub fn disassemble(instructions: &[Instruction]) -> String {
    let mut lines = Vec::with_capacity(instructions.len());
    for instruction in instructions {
        let mnemonic = instruction.opcode.mnemonic();
        let line = match instruction.opcode.operand_kind() {
            OperandKind::Const | OperandKind::Reg | OperandKind::Count | OperandKind::Target => {
                format!("{mnemonic} {}", instruction.operand)
            }
            OperandKind::OptionalConst if instruction.operand > 0 => {
                format!("{mnemonic} {}", instruction.operand - 1)
            }
            _ => mnemonic.to_string(),
        };
        lines.push(line);
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assembles_the_scenario_program() {
        let source = "\
            PUSH_CONST 0   ; answer key\n\
            PUSH_TEXT 1    ; payload\n\
            NEW_STRUCT 1\n\
            STORE_ANSWER\n\
            HALT\n";
        let program = assemble(source).unwrap();
        assert_eq!(
            program,
            vec![
                Instruction::new(Opcode::PushConst, 0),
                Instruction::new(Opcode::PushText, 1),
                Instruction::new(Opcode::NewStruct, 1),
                Instruction::bare(Opcode::StoreAnswer),
                Instruction::bare(Opcode::Halt),
            ]
        );
    }

    #[test]
    fn mnemonics_are_case_insensitive() {
        let program = assemble("phi_normalize\nhalt").unwrap();
        assert_eq!(program[0].opcode, Opcode::PhiNormalize);
    }

    #[test]
    fn register_range_is_enforced() {
        assert!(matches!(
            assemble("LOAD_REG 8"),
            Err(AsmError::RegisterOutOfRange { index: 8, .. })
        ));
        assert!(assemble("LOAD_REG 7").is_ok());
    }

    #[test]
    fn trap_operand_is_optional() {
        let bare = assemble("TRAP\nHALT").unwrap();
        assert_eq!(bare[0].operand, 0);
        let with_const = assemble("TRAP 2\nHALT").unwrap();
        assert_eq!(with_const[0].operand, 3);
    }

    #[test]
    fn missing_and_extra_operands_are_rejected() {
        assert!(matches!(
            assemble("PUSH_TEXT"),
            Err(AsmError::MissingOperand { .. })
        ));
        assert!(matches!(
            assemble("HALT 1"),
            Err(AsmError::UnexpectedOperand { .. })
        ));
        assert!(matches!(
            assemble("JMP nowhere"),
            Err(AsmError::InvalidOperand { .. })
        ));
    }

    #[test]
    fn round_trip_through_disassembly() {
        let source = "PUSH_TEXT 0\nSTORE_REG 3\nLOAD_REG 3\nTRAP 1\nNOOP\nHALT";
        let program = assemble(source).unwrap();
        let rendered = disassemble(&program);
        assert_eq!(assemble(&rendered).unwrap(), program);
        assert_eq!(rendered, source);
    }

    #[test]
    fn unknown_mnemonic_names_the_line() {
        let err = assemble("NOOP\nFNORD 1").unwrap_err();
        assert_eq!(
            err,
            AsmError::UnknownMnemonic {
                line: 2,
                mnemonic: "FNORD".to_string(),
            }
        );
    }
}
