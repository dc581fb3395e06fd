//! The execution loop: fetch–decode–execute over a verified program.
//!
//! Every instruction either mutates the operand stack/registers, replaces
//! the embedded state with a new value (the same non-mutation discipline as
//! the reactive engine), or transfers control. Faults are deterministic,
//! non-retryable, and carry the failing opcode and program counter.

use crate::opcode::{Instruction, Opcode, REGISTER_COUNT};
use crate::program::{Const, Program};
use crate::verifier::{verify, VerifyError};
use sema_engine::{apply_operator, initial_isr, unify, Bindings, Isr, SessionConfig};
use sema_ir::{
    boolean, empty_struct, list_node, nil, normalize, number, operation, relation, struct_node,
    text, Node, NodeKind,
};
use thiserror::Error;
use tracing::debug;

/// Runtime fault. Distinct, deterministic, and fatal to the run.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum VmFault {
    /// Pop from an empty operand stack.
    #[error("stack underflow at pc {pc} ({opcode})")]
    StackUnderflow {
        /// Failing program counter.
        pc: usize,
        /// Failing opcode.
        opcode: Opcode,
    },
    /// Read of a register that holds no value.
    #[error("empty register R{reg} read at pc {pc}")]
    EmptyRegister {
        /// Failing program counter.
        pc: usize,
        /// Register index.
        reg: u32,
    },
    /// Register index outside 0–7 (unreachable after verification).
    #[error("register index {reg} out of range at pc {pc}")]
    RegisterOutOfRange {
        /// Failing program counter.
        pc: usize,
        /// Register index.
        reg: u32,
    },
    /// Constant-pool index out of range (unreachable after verification).
    #[error("constant index {index} out of range at pc {pc} ({opcode})")]
    ConstantOutOfRange {
        /// Failing program counter.
        pc: usize,
        /// Failing opcode.
        opcode: Opcode,
        /// Constant index.
        index: u32,
    },
    /// Jump or call target outside the program.
    #[error("jump target {target} out of bounds at pc {pc} ({opcode})")]
    JumpOutOfBounds {
        /// Failing program counter.
        pc: usize,
        /// Failing opcode.
        opcode: Opcode,
        /// Target index.
        target: u32,
    },
    /// `RET` with an empty call stack.
    #[error("RET without matching CALL at pc {pc}")]
    ReturnWithoutCall {
        /// Failing program counter.
        pc: usize,
    },
    /// Execution ran past the end of the program without `HALT`.
    #[error("program counter {pc} out of bounds")]
    PcOutOfBounds {
        /// Out-of-range program counter.
        pc: usize,
    },
    /// `HALT` executed with neither a stored answer nor a state answer.
    #[error("HALT without an answer at pc {pc}")]
    HaltWithoutAnswer {
        /// Failing program counter.
        pc: usize,
    },
    /// An operand of the wrong node shape.
    #[error("{opcode} expected {expected} at pc {pc}")]
    TypeExpectation {
        /// Failing program counter.
        pc: usize,
        /// Failing opcode.
        opcode: Opcode,
        /// Required shape.
        expected: &'static str,
    },
    /// Deterministic abort via `TRAP`.
    #[error("trap at pc {pc}: {message}")]
    Trap {
        /// Failing program counter.
        pc: usize,
        /// Trap message.
        message: String,
    },
    /// `run`/`step` before `load`.
    #[error("no program loaded")]
    ProgramNotLoaded,
}

impl VmFault {
    /// Stable machine-readable code for this fault.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            VmFault::StackUnderflow { .. } => "vm.fault.stack",
            VmFault::EmptyRegister { .. } | VmFault::RegisterOutOfRange { .. } => {
                "vm.fault.register"
            }
            VmFault::ConstantOutOfRange { .. } => "vm.fault.constant",
            VmFault::JumpOutOfBounds { .. } | VmFault::PcOutOfBounds { .. } => "vm.fault.pc",
            VmFault::ReturnWithoutCall { .. } => "vm.fault.call",
            VmFault::HaltWithoutAnswer { .. } => "vm.fault.halt",
            VmFault::TypeExpectation { .. } => "vm.fault.type",
            VmFault::Trap { .. } => "vm.fault.trap",
            VmFault::ProgramNotLoaded => "vm.fault.load",
        }
    }
}

/// Outcome of one `step`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    /// An instruction executed; more remain.
    Running,
    /// `HALT` executed; the answer is available.
    Halted,
}

/// The virtual machine: operand stack, eight registers, explicit call
/// stack, and an embedded reactive state.
#[derive(Debug, Clone)]
pub struct Vm {
    config: SessionConfig,
    program: Option<Program>,
    stack: Vec<Node>,
    registers: [Option<Node>; REGISTER_COUNT as usize],
    call_stack: Vec<usize>,
    pc: usize,
    isr: Isr,
    answer: Option<Node>,
    halted: bool,
}

impl Vm {
    /// Create a VM with no program loaded.
    #[must_use]
    pub fn new(config: SessionConfig) -> Self {
        let isr = vm_isr(&empty_struct(), &config);
        Vm {
            config,
            program: None,
            stack: Vec::new(),
            registers: Default::default(),
            call_stack: Vec::new(),
            pc: 0,
            isr,
            answer: None,
            halted: false,
        }
    }

    /// Verify and load a program, resetting all runtime state.
    ///
    /// The embedded state is seeded from `seed` (or the empty struct) with
    /// empty queues: in the VM, the program alone drives dispatch.
    ///
    /// # Errors
    ///
    /// Returns a [`VerifyError`] and leaves the VM unchanged when the
    /// program fails static verification.
    pub fn load(&mut self, program: Program, seed: Option<&Node>) -> Result<(), VerifyError> {
        verify(&program)?;
        debug!(
            instructions = program.instructions.len(),
            constants = program.constants.len(),
            "program verified and loaded"
        );
        self.program = Some(program);
        self.stack.clear();
        self.registers = Default::default();
        self.call_stack.clear();
        self.pc = 0;
        self.isr = vm_isr(seed.unwrap_or(&empty_struct()), &self.config);
        self.answer = None;
        self.halted = false;
        Ok(())
    }

    /// Execute one instruction.
    ///
    /// # Errors
    ///
    /// Returns a [`VmFault`] on any runtime failure; the VM must not be
    /// resumed afterwards.
    pub fn step(&mut self) -> Result<StepStatus, VmFault> {
        if self.halted {
            return Ok(StepStatus::Halted);
        }
        let program = self.program.as_ref().ok_or(VmFault::ProgramNotLoaded)?;
        let Some(instruction) = program.instructions.get(self.pc).copied() else {
            return Err(VmFault::PcOutOfBounds { pc: self.pc });
        };
        let at = self.pc;
        self.pc += 1;
        self.execute(instruction, at)?;
        Ok(if self.halted {
            StepStatus::Halted
        } else {
            StepStatus::Running
        })
    }

    /// Run to `HALT` and return the final answer.
    ///
    /// # Errors
    ///
    /// Returns the first [`VmFault`] encountered.
    pub fn run(&mut self) -> Result<Node, VmFault> {
        while self.step()? == StepStatus::Running {}
        self.final_answer()
    }

    /// The answer after `HALT`.
    ///
    /// # Errors
    ///
    /// Returns [`VmFault::HaltWithoutAnswer`] when neither a stored answer
    /// nor a non-empty state answer exists.
    pub fn final_answer(&self) -> Result<Node, VmFault> {
        if let Some(answer) = &self.answer {
            return Ok(answer.clone());
        }
        if self.isr.has_answer() {
            return Ok(self.isr.answer.clone());
        }
        Err(VmFault::HaltWithoutAnswer { pc: self.pc })
    }

    // ---- Snapshot access --------------------------------------------------

    /// Loaded program, if any.
    #[must_use]
    pub fn program(&self) -> Option<&Program> {
        self.program.as_ref()
    }

    /// Session configuration.
    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Current program counter.
    #[must_use]
    pub fn pc(&self) -> usize {
        self.pc
    }

    /// Operand stack, bottom first.
    #[must_use]
    pub fn stack(&self) -> &[Node] {
        &self.stack
    }

    /// Register file.
    #[must_use]
    pub fn registers(&self) -> &[Option<Node>] {
        &self.registers
    }

    /// Call stack of return addresses.
    #[must_use]
    pub fn call_stack(&self) -> &[usize] {
        &self.call_stack
    }

    /// Embedded reactive state.
    #[must_use]
    pub fn isr(&self) -> &Isr {
        &self.isr
    }

    /// Stored answer, if any.
    #[must_use]
    pub fn answer(&self) -> Option<&Node> {
        self.answer.as_ref()
    }

    /// Rebuild a VM from snapshot parts. The program is re-verified.
    ///
    /// # Errors
    ///
    /// Returns a [`VerifyError`] when the restored program fails
    /// verification.
    pub(crate) fn from_parts(
        config: SessionConfig,
        program: Program,
        pc: usize,
        stack: Vec<Node>,
        registers: Vec<Option<Node>>,
        call_stack: Vec<usize>,
        isr: Isr,
        answer: Option<Node>,
    ) -> Result<Self, VerifyError> {
        verify(&program)?;
        let halted = pc >= program.instructions.len();
        let mut register_file: [Option<Node>; REGISTER_COUNT as usize] = Default::default();
        for (slot, value) in register_file.iter_mut().zip(registers) {
            *slot = value;
        }
        Ok(Vm {
            config,
            program: Some(program),
            stack,
            registers: register_file,
            call_stack,
            pc,
            isr,
            answer,
            halted,
        })
    }

    // ---- Execution --------------------------------------------------------

    #[allow(clippy::too_many_lines)]
    fn execute(&mut self, instruction: Instruction, at: usize) -> Result<(), VmFault> {
        let opcode = instruction.opcode;
        let operand = instruction.operand;
        match opcode {
            Opcode::PushText | Opcode::PushKey => {
                let content = match self.constant(operand, at, opcode)? {
                    Const::Text(value) => value,
                    _ => return Err(self.type_fault(at, opcode, "text constant")),
                };
                self.stack.push(text(&content));
            }
            Opcode::PushConst => {
                let node = match self.constant(operand, at, opcode)? {
                    Const::Text(value) => text(&value),
                    Const::Number(value) if value.is_finite() => number(value),
                    Const::Number(_) => {
                        return Err(self.type_fault(at, opcode, "finite number constant"));
                    }
                    Const::Bool(value) => boolean(value),
                    Const::Node(node) => node,
                    Const::Nil => nil(),
                };
                self.stack.push(node);
            }
            Opcode::PushNumber => match self.constant(operand, at, opcode)? {
                Const::Number(value) if value.is_finite() => self.stack.push(number(value)),
                _ => return Err(self.type_fault(at, opcode, "finite number constant")),
            },
            Opcode::PushBool => match self.constant(operand, at, opcode)? {
                Const::Bool(value) => self.stack.push(boolean(value)),
                _ => return Err(self.type_fault(at, opcode, "boolean constant")),
            },
            Opcode::LoadReg => {
                let slot = self
                    .registers
                    .get(operand as usize)
                    .ok_or(VmFault::RegisterOutOfRange { pc: at, reg: operand })?;
                let value = slot
                    .clone()
                    .ok_or(VmFault::EmptyRegister { pc: at, reg: operand })?;
                self.stack.push(value);
            }
            Opcode::StoreReg => {
                let value = self.pop(at, opcode)?;
                let slot = self
                    .registers
                    .get_mut(operand as usize)
                    .ok_or(VmFault::RegisterOutOfRange { pc: at, reg: operand })?;
                *slot = Some(value);
            }
            Opcode::NewStruct => {
                let mut fields = Vec::with_capacity(operand as usize);
                for _ in 0..operand {
                    let value = self.pop(at, opcode)?;
                    let key = self.pop_text(at, opcode)?;
                    fields.push((key, value));
                }
                fields.reverse();
                self.stack.push(struct_node(fields));
            }
            Opcode::NewList => {
                let mut items = Vec::with_capacity(operand as usize);
                for _ in 0..operand {
                    items.push(self.pop(at, opcode)?);
                }
                items.reverse();
                self.stack.push(list_node(items));
            }
            Opcode::NewRel | Opcode::NewOp => {
                let mut args = Vec::with_capacity(operand as usize);
                for _ in 0..operand {
                    args.push(self.pop(at, opcode)?);
                }
                args.reverse();
                let label = self.pop_text(at, opcode)?;
                if label.trim().is_empty() {
                    return Err(self.type_fault(at, opcode, "non-empty label"));
                }
                let node = if opcode == Opcode::NewRel {
                    relation(&label, args)
                } else {
                    operation(&label, args)
                };
                self.stack.push(node);
            }
            Opcode::GetField => {
                let key = self.pop_text(at, opcode)?;
                let target = self.pop(at, opcode)?;
                if target.kind() != NodeKind::Struct {
                    return Err(self.type_fault(at, opcode, "STRUCT"));
                }
                let value = target.field(&key).cloned().unwrap_or_else(nil);
                self.stack.push(value);
            }
            Opcode::SetField => {
                let value = self.pop(at, opcode)?;
                let key = self.pop_text(at, opcode)?;
                let target = self.pop(at, opcode)?;
                if target.kind() != NodeKind::Struct {
                    return Err(self.type_fault(at, opcode, "STRUCT"));
                }
                let mut fields: Vec<(String, Node)> = target.fields().to_vec();
                fields.push((key, value));
                self.stack.push(struct_node(fields));
            }
            Opcode::AddRel => {
                let rel = self.pop(at, opcode)?;
                if rel.kind() != NodeKind::Rel {
                    return Err(self.type_fault(at, opcode, "REL"));
                }
                let normalized = normalize(&rel);
                if !self.isr.relations.contains(&normalized) {
                    let mut next = self.isr.clone();
                    next.relations.push(normalized);
                    self.isr = next;
                }
                self.stack.push(rel);
            }
            Opcode::HasRel => {
                let rel = self.pop(at, opcode)?;
                let present = self.isr.relations.contains(&normalize(&rel));
                self.stack.push(boolean(present));
            }
            Opcode::UnifyEq => {
                let right = self.pop(at, opcode)?;
                let left = self.pop(at, opcode)?;
                self.stack.push(boolean(left == right));
            }
            Opcode::UnifyRel => {
                let fact = self.pop(at, opcode)?;
                let pattern = self.pop(at, opcode)?;
                self.stack.push(bindings_report(&pattern, &fact));
            }
            Opcode::EnqOp => {
                let op = self.pop(at, opcode)?;
                if op.kind() != NodeKind::Op {
                    return Err(self.type_fault(at, opcode, "OP"));
                }
                let mut next = self.isr.clone();
                next.ops_queue.push_back(op);
                self.isr = next;
            }
            Opcode::Dispatch => {
                let mut next = self.isr.clone();
                if next.ops_queue.is_empty() {
                    for label in ["ALIGN", "STABILIZE", "SUMMARIZE"] {
                        next.ops_queue.push_back(operation(label, []));
                    }
                }
                let op = next
                    .ops_queue
                    .pop_front()
                    .expect("closing sequence injected above");
                self.isr = apply_operator(&next, &op, &self.config);
                if self.isr.has_answer() {
                    self.answer = Some(self.isr.answer.clone());
                }
                self.stack.push(op);
            }
            Opcode::PhiNormalize => self.apply_phi("NORMALIZE", Vec::new()),
            Opcode::PhiInfer => self.apply_phi("INFER", Vec::new()),
            Opcode::PhiAnswer => {
                let args = self.optional_payload();
                self.apply_phi("ANSWER", args);
            }
            Opcode::PhiExplain => {
                let args = self.optional_payload();
                self.apply_phi("EXPLAIN", args);
            }
            Opcode::PhiSummarize => self.apply_phi("SUMMARIZE", Vec::new()),
            Opcode::Jmp => self.jump(operand, at, opcode)?,
            Opcode::Call => {
                self.call_stack.push(self.pc);
                self.jump(operand, at, opcode)?;
            }
            Opcode::Ret => {
                let target = self
                    .call_stack
                    .pop()
                    .ok_or(VmFault::ReturnWithoutCall { pc: at })?;
                self.pc = target;
            }
            Opcode::HashState => {
                self.stack.push(text(&self.isr.state_signature().to_hex()));
            }
            Opcode::StoreAnswer => {
                let answer = self.pop(at, opcode)?;
                self.answer = Some(answer);
            }
            Opcode::Noop => {}
            Opcode::Trap => {
                let message = self.trap_message(operand, at)?;
                return Err(VmFault::Trap { pc: at, message });
            }
            Opcode::Halt => {
                self.halted = true;
                if self.answer.is_none() && !self.isr.has_answer() {
                    return Err(VmFault::HaltWithoutAnswer { pc: at });
                }
                debug!(pc = at, "halted");
            }
        }
        Ok(())
    }

    fn apply_phi(&mut self, label: &str, args: Vec<Node>) {
        let op = operation(label, args);
        self.isr = apply_operator(&self.isr, &op, &self.config);
        if self.isr.has_answer() {
            self.answer = Some(self.isr.answer.clone());
            self.stack.push(self.isr.answer.clone());
        } else {
            self.stack.push(op);
        }
    }

    fn optional_payload(&mut self) -> Vec<Node> {
        match self.stack.pop() {
            Some(node) => vec![node],
            None => Vec::new(),
        }
    }

    fn jump(&mut self, target: u32, at: usize, opcode: Opcode) -> Result<(), VmFault> {
        let len = self
            .program
            .as_ref()
            .map(|program| program.instructions.len())
            .unwrap_or_default();
        if (target as usize) >= len {
            return Err(VmFault::JumpOutOfBounds {
                pc: at,
                opcode,
                target,
            });
        }
        self.pc = target as usize;
        Ok(())
    }

    fn trap_message(&mut self, operand: u32, at: usize) -> Result<String, VmFault> {
        if operand > 0 {
            return match self.constant(operand - 1, at, Opcode::Trap)? {
                Const::Text(message) => Ok(message),
                _ => Err(self.type_fault(at, Opcode::Trap, "text constant")),
            };
        }
        if let Some(top) = self.stack.last() {
            if top.kind() == NodeKind::Text {
                let message = top.label().unwrap_or_default().to_string();
                self.stack.pop();
                return Ok(message);
            }
        }
        Ok("vm trap".to_string())
    }

    fn constant(&self, index: u32, at: usize, opcode: Opcode) -> Result<Const, VmFault> {
        let program = self.program.as_ref().ok_or(VmFault::ProgramNotLoaded)?;
        program
            .constants
            .get(index as usize)
            .cloned()
            .ok_or(VmFault::ConstantOutOfRange {
                pc: at,
                opcode,
                index,
            })
    }

    fn pop(&mut self, at: usize, opcode: Opcode) -> Result<Node, VmFault> {
        self.stack
            .pop()
            .ok_or(VmFault::StackUnderflow { pc: at, opcode })
    }

    fn pop_text(&mut self, at: usize, opcode: Opcode) -> Result<String, VmFault> {
        let node = self.pop(at, opcode)?;
        if node.kind() != NodeKind::Text {
            return Err(self.type_fault(at, opcode, "TEXT"));
        }
        Ok(node.label().unwrap_or_default().to_string())
    }

    fn type_fault(&self, pc: usize, opcode: Opcode, expected: &'static str) -> VmFault {
        VmFault::TypeExpectation {
            pc,
            opcode,
            expected,
        }
    }
}

/// Fresh embedded state for the VM: seeded like an engine run, but with
/// empty queues so dispatch is driven entirely by the program.
fn vm_isr(seed: &Node, config: &SessionConfig) -> Isr {
    let mut isr = initial_isr(seed, config);
    isr.goals.clear();
    isr.ops_queue.clear();
    isr
}

/// Render a unification outcome as a bindings report struct:
/// `{success: BOOL, bindings: [{var, value}...]}` in variable order.
fn bindings_report(pattern: &Node, fact: &Node) -> Node {
    match unify(pattern, fact, &Bindings::new()) {
        None => struct_node(vec![
            ("success", boolean(false)),
            ("bindings", list_node([])),
        ]),
        Some(bindings) => {
            let items: Vec<Node> = bindings
                .iter()
                .map(|(name, value)| {
                    struct_node(vec![
                        ("var", text(name)),
                        ("value", value.clone()),
                    ])
                })
                .collect();
            struct_node(vec![
                ("success", boolean(true)),
                ("bindings", list_node(items)),
            ])
        }
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepStatus::Running => f.write_str("running"),
            StepStatus::Halted => f.write_str("halted"),
        }
    }
}
