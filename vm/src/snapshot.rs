//! Resumable snapshot bundles.
//!
//! A snapshot serializes `{program, pc, stack, registers, call stack, full
//! ISR, digest}` as a canonical JSON document (fixed field order, compact
//! separators, ASCII node forms). The digest is SHA-256 over the canonical
//! body and is re-checked on load; restoring yields a VM whose future
//! execution is indistinguishable from one that was never snapshotted.

use crate::bytecode::BytecodeError;
use crate::program::{Const, Program};
use crate::signing::SnapshotSignature;
use crate::verifier::VerifyError;
use crate::vm::Vm;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use sema_engine::{Isr, SessionConfig};
use sema_ir::Node;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Snapshot document version.
pub const SNAPSHOT_VERSION: &str = "sema-snap/1";

/// Snapshot failure.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SnapshotError {
    /// Capturing a VM with no loaded program.
    #[error("no program loaded; nothing to snapshot")]
    MissingProgram,
    /// Document (de)serialization failure.
    #[error("snapshot document error: {0}")]
    Document(String),
    /// Bytecode field is not valid base64.
    #[error("snapshot bytecode is not valid base64")]
    InvalidBase64,
    /// Bytecode container decode failure.
    #[error(transparent)]
    Bytecode(#[from] BytecodeError),
    /// Restored program failed static verification.
    #[error(transparent)]
    Verify(#[from] VerifyError),
    /// Stored digest does not match the canonical body.
    #[error("snapshot digest mismatch: expected {expected}, found {found}")]
    DigestMismatch {
        /// Digest recomputed from the body.
        expected: String,
        /// Digest stored in the document.
        found: String,
    },
    /// Internally inconsistent document.
    #[error("inconsistent snapshot document: {0}")]
    Inconsistent(&'static str),
}

/// Program section of the document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgramDoc {
    /// Base64 of the bytecode container.
    pub bytecode: String,
    /// Ordered constant pool.
    pub constants: Vec<Const>,
}

/// VM register/stack section of the document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VmStateDoc {
    /// Program counter.
    pub pc: usize,
    /// Operand stack depth (must equal `stack.len()`).
    pub stack_depth: usize,
    /// Operand stack, bottom first.
    pub stack: Vec<Node>,
    /// Register file.
    pub registers: Vec<Option<Node>>,
    /// Call stack of return addresses.
    pub call_stack: Vec<usize>,
    /// Content signature of the embedded state at capture time.
    pub isr_digest: String,
    /// Stored answer, if any.
    pub answer: Option<Node>,
}

/// State section of the document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateDoc {
    /// Fully serialized reactive state.
    pub isr: Isr,
    /// VM runtime registers and stacks.
    pub vm: VmStateDoc,
}

/// A complete snapshot bundle. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Document version.
    pub version: String,
    /// Compiled program.
    pub program: ProgramDoc,
    /// VM and reactive state.
    pub state: StateDoc,
    /// SHA-256 hex digest of the canonical body.
    pub digest: String,
    /// Detached signatures over the canonical body.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub signatures: Vec<SnapshotSignature>,
}

#[derive(Serialize)]
struct BodyRef<'a> {
    version: &'a str,
    program: &'a ProgramDoc,
    state: &'a StateDoc,
}

fn canonical_body_bytes(
    version: &str,
    program: &ProgramDoc,
    state: &StateDoc,
) -> Result<Vec<u8>, SnapshotError> {
    serde_json::to_vec(&BodyRef {
        version,
        program,
        state,
    })
    .map_err(|err| SnapshotError::Document(err.to_string()))
}

fn hex_sha256(data: &[u8]) -> String {
    Sha256::digest(data).iter().map(|b| format!("{b:02x}")).collect()
}

impl Snapshot {
    /// Capture the current VM state into a snapshot bundle.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError::MissingProgram`] when no program is loaded.
    pub fn capture(vm: &Vm) -> Result<Self, SnapshotError> {
        let program = vm.program().ok_or(SnapshotError::MissingProgram)?;
        let program_doc = ProgramDoc {
            bytecode: BASE64.encode(program.to_bytecode()),
            constants: program.constants.clone(),
        };
        let state_doc = StateDoc {
            isr: vm.isr().clone(),
            vm: VmStateDoc {
                pc: vm.pc(),
                stack_depth: vm.stack().len(),
                stack: vm.stack().to_vec(),
                registers: vm.registers().to_vec(),
                call_stack: vm.call_stack().to_vec(),
                isr_digest: vm.isr().state_signature().to_hex(),
                answer: vm.answer().cloned(),
            },
        };
        let digest = hex_sha256(&canonical_body_bytes(
            SNAPSHOT_VERSION,
            &program_doc,
            &state_doc,
        )?);
        Ok(Snapshot {
            version: SNAPSHOT_VERSION.to_string(),
            program: program_doc,
            state: state_doc,
            digest,
            signatures: Vec::new(),
        })
    }

    /// Canonical body bytes (the signed and digested payload).
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError::Document`] on serialization failure.
    pub fn canonical_bytes(&self) -> Result<Vec<u8>, SnapshotError> {
        canonical_body_bytes(&self.version, &self.program, &self.state)
    }

    /// Copy of this snapshot with one more signature attached.
    #[must_use]
    pub fn with_signature(&self, signature: SnapshotSignature) -> Self {
        let mut next = self.clone();
        next.signatures.push(signature);
        next
    }

    /// Serialize the full document.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError::Document`] on serialization failure.
    pub fn to_json_string(&self) -> Result<String, SnapshotError> {
        serde_json::to_string(self).map_err(|err| SnapshotError::Document(err.to_string()))
    }

    /// Parse a document and re-check its digest.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError::DigestMismatch`] when the stored digest does
    /// not match the canonical body, or [`SnapshotError::Document`] on a
    /// malformed document.
    pub fn from_json_string(source: &str) -> Result<Self, SnapshotError> {
        let snapshot: Snapshot =
            serde_json::from_str(source).map_err(|err| SnapshotError::Document(err.to_string()))?;
        let expected = hex_sha256(&snapshot.canonical_bytes()?);
        if expected != snapshot.digest {
            return Err(SnapshotError::DigestMismatch {
                expected,
                found: snapshot.digest,
            });
        }
        if snapshot.state.vm.stack_depth != snapshot.state.vm.stack.len() {
            return Err(SnapshotError::Inconsistent(
                "stack_depth does not match stack contents",
            ));
        }
        Ok(snapshot)
    }

    /// Rebuild a VM from this snapshot. The program is re-verified before
    /// anything executes.
    ///
    /// # Errors
    ///
    /// Returns a [`SnapshotError`] on malformed bytecode or verification
    /// failure.
    pub fn restore(&self, config: SessionConfig) -> Result<Vm, SnapshotError> {
        let blob = BASE64
            .decode(&self.program.bytecode)
            .map_err(|_| SnapshotError::InvalidBase64)?;
        let program = Program::from_bytecode(&blob, self.program.constants.clone())?;
        let vm = Vm::from_parts(
            config,
            program,
            self.state.vm.pc,
            self.state.vm.stack.clone(),
            self.state.vm.registers.clone(),
            self.state.vm.call_stack.clone(),
            self.state.isr.clone(),
            self.state.vm.answer.clone(),
        )?;
        Ok(vm)
    }
}
