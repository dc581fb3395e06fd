//! Compiled pipelines replay engine operator semantics exactly.

use sema_engine::{apply_operator, initial_isr, Operator, Rule, SessionConfig};
use sema_ir::{entity, list_node, operation, relation, struct_node, text, to_json, var};
use sema_vm::{compile_pipeline, Vm};

fn seed() -> sema_ir::Node {
    struct_node(vec![
        ("subject", entity("car")),
        ("action", text("exists")),
        (
            "relations",
            list_node([relation("PART_OF", [entity("wheel"), entity("car")])]),
        ),
    ])
}

fn config() -> SessionConfig {
    SessionConfig {
        rules: vec![Rule::new(
            vec![relation("PART_OF", [var("?X"), var("?Y")])],
            relation("HAS", [var("?Y"), var("?X")]),
        )],
        ..SessionConfig::default()
    }
}

/// Fold the operator sequence directly, the way the VM's embedded state
/// sees it: seeded like an engine run but with queues cleared.
fn fold_operators(ops: &[Operator], config: &SessionConfig) -> sema_engine::Isr {
    let mut isr = initial_isr(&seed(), config);
    isr.goals.clear();
    isr.ops_queue.clear();
    for op in ops {
        isr = apply_operator(&isr, &operation(op.as_str(), []), config);
    }
    isr
}

#[test]
fn replayed_pipeline_matches_direct_operator_application() {
    let ops = [
        Operator::Normalize,
        Operator::Infer,
        Operator::Answer,
        Operator::Summarize,
    ];
    let config = config();

    let mut vm = Vm::new(config.clone());
    vm.load(compile_pipeline(&ops), Some(&seed())).unwrap();
    let vm_answer = vm.run().unwrap();

    let folded = fold_operators(&ops, &config);
    assert_eq!(to_json(&vm_answer), to_json(&folded.answer));
    assert_eq!(vm.isr().relations, folded.relations);
    assert_eq!(vm.isr().quality, folded.quality);
    assert_eq!(
        vm.isr().state_signature(),
        folded.state_signature(),
        "embedded state must be indistinguishable from direct application"
    );
}

#[test]
fn replay_is_deterministic_across_vm_instances() {
    let ops = [Operator::Normalize, Operator::Answer, Operator::Explain];
    let config = config();

    let mut first = Vm::new(config.clone());
    first.load(compile_pipeline(&ops), Some(&seed())).unwrap();
    let a = first.run().unwrap();

    let mut second = Vm::new(config);
    second.load(compile_pipeline(&ops), Some(&seed())).unwrap();
    let b = second.run().unwrap();

    assert_eq!(to_json(&a), to_json(&b));
    assert_eq!(
        first.isr().state_signature(),
        second.isr().state_signature()
    );
}

#[test]
fn inference_replays_inside_the_vm() {
    let ops = [Operator::Normalize, Operator::Infer, Operator::Summarize];
    let mut vm = Vm::new(config());
    vm.load(compile_pipeline(&ops), Some(&seed())).unwrap();
    vm.run().unwrap();

    assert!(vm
        .isr()
        .relations
        .contains(&relation("HAS", [entity("car"), entity("wheel")])));
}

#[test]
fn answer_falls_back_to_the_seed_in_context() {
    let ops = [Operator::Answer];
    let mut vm = Vm::new(SessionConfig::default());
    vm.load(compile_pipeline(&ops), Some(&seed())).unwrap();
    let answer = vm.run().unwrap();
    assert_eq!(answer.field("answer"), Some(&text("Car exists.")));
}
