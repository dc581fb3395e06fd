//! Snapshot round-trip: pause, serialize, restore, resume.

use sema_engine::SessionConfig;
use sema_ir::text;
use sema_vm::{
    sign_snapshot, signing_key_from_seed, verify_snapshot_signature, Const, Program, Snapshot,
    StepStatus, Vm,
};

fn fixture_program() -> Program {
    Program::from_asm(
        "\
        PUSH_TEXT 0\n\
        STORE_REG 1\n\
        PUSH_TEXT 1\n\
        STORE_REG 2\n\
        LOAD_REG 1\n\
        STORE_ANSWER\n\
        HASH_STATE\n\
        STORE_REG 3\n\
        HALT",
        vec![
            Const::Text("first".to_string()),
            Const::Text("second".to_string()),
        ],
    )
    .unwrap()
}

#[test]
fn resumed_execution_matches_an_uninterrupted_run() {
    let config = SessionConfig::default();

    // Uninterrupted baseline.
    let mut baseline = Vm::new(config.clone());
    baseline.load(fixture_program(), None).unwrap();
    let baseline_answer = baseline.run().unwrap();
    let baseline_digest = Snapshot::capture(&baseline).unwrap().digest;

    // Interrupted run: stop after four instructions, snapshot, serialize,
    // restore into a fresh VM, resume to HALT.
    let mut interrupted = Vm::new(config.clone());
    interrupted.load(fixture_program(), None).unwrap();
    for _ in 0..4 {
        assert_eq!(interrupted.step().unwrap(), StepStatus::Running);
    }
    let snapshot = Snapshot::capture(&interrupted).unwrap();
    let json = snapshot.to_json_string().unwrap();

    let restored_snapshot = Snapshot::from_json_string(&json).unwrap();
    let mut resumed = restored_snapshot.restore(config).unwrap();
    assert_eq!(resumed.pc(), 4);
    let resumed_answer = resumed.run().unwrap();

    assert_eq!(resumed_answer, baseline_answer);
    assert_eq!(resumed_answer, text("first"));
    assert_eq!(
        Snapshot::capture(&resumed).unwrap().digest,
        baseline_digest,
        "post-HALT snapshots of resumed and uninterrupted runs must agree"
    );
}

#[test]
fn restore_preserves_registers_stack_and_call_stack() {
    let config = SessionConfig::default();
    let program = Program::from_asm(
        "PUSH_TEXT 0\nCALL 4\nSTORE_ANSWER\nHALT\nRET",
        vec![Const::Text("deep".to_string())],
    )
    .unwrap();
    let mut vm = Vm::new(config.clone());
    vm.load(program, None).unwrap();
    // Execute PUSH_TEXT and CALL: now inside the subroutine with one frame.
    vm.step().unwrap();
    vm.step().unwrap();
    assert_eq!(vm.call_stack(), &[2]);
    assert_eq!(vm.stack().len(), 1);

    let snapshot = Snapshot::capture(&vm).unwrap();
    let mut restored = snapshot.restore(config).unwrap();
    assert_eq!(restored.call_stack(), &[2]);
    assert_eq!(restored.stack(), vm.stack());
    assert_eq!(restored.run().unwrap(), text("deep"));
}

#[test]
fn snapshot_digest_is_tamper_evident_and_signable() {
    let config = SessionConfig::default();
    let mut vm = Vm::new(config);
    vm.load(fixture_program(), None).unwrap();
    vm.step().unwrap();

    let snapshot = Snapshot::capture(&vm).unwrap();
    let key = signing_key_from_seed(&[42u8; 32]);
    let signed = snapshot.with_signature(sign_snapshot(&snapshot, &key).unwrap());

    let json = signed.to_json_string().unwrap();
    let back = Snapshot::from_json_string(&json).unwrap();
    assert!(verify_snapshot_signature(&back, &back.signatures[0]).unwrap());

    // Any body tampering breaks the digest check before signatures are
    // even consulted.
    let tampered = json.replace("\"pc\":1", "\"pc\":0");
    assert!(Snapshot::from_json_string(&tampered).is_err());
}

#[test]
fn snapshot_embeds_the_full_isr() {
    let config = SessionConfig::default();
    let seed = sema_ir::struct_node(vec![(
        "relations",
        sema_ir::list_node([sema_ir::relation(
            "PART_OF",
            [sema_ir::entity("wheel"), sema_ir::entity("car")],
        )]),
    )]);
    let mut vm = Vm::new(config.clone());
    vm.load(fixture_program(), Some(&seed)).unwrap();
    vm.step().unwrap();

    let snapshot = Snapshot::capture(&vm).unwrap();
    assert_eq!(snapshot.state.isr.relations.len(), 1);
    let restored = snapshot.restore(config).unwrap();
    assert_eq!(restored.isr().relations, vm.isr().relations);
    assert_eq!(
        snapshot.state.vm.isr_digest,
        vm.isr().state_signature().to_hex()
    );
}
