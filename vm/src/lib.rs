//! Verifiable bytecode virtual machine for the symbolic core.
//!
//! This crate executes the same operator semantics as the reactive engine
//! from compiled instructions:
//!
//! - **Instructions** ([`opcode::Opcode`], [`opcode::Instruction`]): one
//!   byte plus one unsigned varint operand per instruction.
//! - **Container** ([`bytecode`]): versioned `SVMB` encoding.
//! - **Assembler** ([`asm`]): line-oriented text form with `;` comments.
//! - **Verifier** ([`verifier`]): load-time bounds and reachable-`HALT`
//!   checks; nothing executes unverified.
//! - **Execution** ([`vm::Vm`]): stack + eight registers + explicit call
//!   stack over an embedded reactive state, with a deterministic fault
//!   taxonomy.
//! - **Snapshots** ([`snapshot`], [`signing`]): digest-checked, optionally
//!   Ed25519-signed resumable bundles.
//! - **Pipeline compiler** ([`compile`]): engine operator sequences to
//!   auditable bytecode.

pub mod asm;
pub mod bytecode;
pub mod compile;
pub mod opcode;
pub mod program;
pub mod signing;
pub mod snapshot;
pub mod verifier;
pub mod vm;

pub use asm::{assemble, disassemble, AsmError};
pub use bytecode::{decode, encode, BytecodeError, MAGIC, VERSION};
pub use compile::{compile_pipeline, phi_opcode};
pub use opcode::{Instruction, Opcode, OperandKind, ALL_OPCODES, REGISTER_COUNT};
pub use program::{Const, Program};
pub use signing::{
    sign_snapshot, signing_key_from_seed, verify_snapshot_signature, SigningError,
    SnapshotSignature, SIGNATURE_ALGORITHM,
};
pub use snapshot::{Snapshot, SnapshotError, SNAPSHOT_VERSION};
pub use verifier::{verify, VerifyError};
pub use vm::{StepStatus, Vm, VmFault};
