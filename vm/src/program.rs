//! Programs: instruction sequences plus a constant pool.

use crate::asm::{assemble, AsmError};
use crate::bytecode::{decode, encode, BytecodeError};
use crate::opcode::Instruction;
use sema_ir::Node;
use serde::{Deserialize, Serialize};

/// One constant-pool entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Const {
    /// Text literal (also used for struct keys and relation labels).
    Text(String),
    /// Finite numeric literal.
    Number(f64),
    /// Boolean literal.
    Bool(bool),
    /// A full IR node.
    Node(Node),
    /// The absent value.
    Nil,
}

/// A compiled program: ordered instructions and the literal pool they
/// index. Compiled once, loaded repeatedly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Program {
    /// Ordered instruction sequence.
    pub instructions: Vec<Instruction>,
    /// Ordered constant pool.
    pub constants: Vec<Const>,
}

impl Program {
    /// Build a program from instructions and constants.
    #[must_use]
    pub fn new(instructions: Vec<Instruction>, constants: Vec<Const>) -> Self {
        Program {
            instructions,
            constants,
        }
    }

    /// Assemble a program from source text plus a constant pool.
    ///
    /// # Errors
    ///
    /// Returns the underlying [`AsmError`] on malformed source.
    pub fn from_asm(source: &str, constants: Vec<Const>) -> Result<Self, AsmError> {
        Ok(Program {
            instructions: assemble(source)?,
            constants,
        })
    }

    /// Encode the instructions into the bytecode container.
    #[must_use]
    pub fn to_bytecode(&self) -> Vec<u8> {
        encode(&self.instructions)
    }

    /// Decode instructions from a bytecode container, attaching constants.
    ///
    /// # Errors
    ///
    /// Returns the underlying [`BytecodeError`] on a malformed container.
    pub fn from_bytecode(blob: &[u8], constants: Vec<Const>) -> Result<Self, BytecodeError> {
        Ok(Program {
            instructions: decode(blob)?,
            constants,
        })
    }
}
