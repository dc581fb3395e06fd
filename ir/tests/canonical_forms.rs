//! Property tests for canonicalization, fingerprints, and both
//! serialization forms.

use proptest::prelude::*;
use sema_ir::{
    boolean, entity, from_json, list_node, nil, normalize, number, parse_sexpr, relation,
    struct_node, text, to_json, to_sexpr, Node,
};

fn leaf_strategy() -> impl Strategy<Value = Node> {
    prop_oneof![
        "[a-z][a-z0-9_]{0,8}".prop_map(|name| entity(&name)),
        "[ -~]{0,16}".prop_map(|content| text(&content)),
        (-1.0e6f64..1.0e6f64).prop_map(number),
        any::<bool>().prop_map(boolean),
        Just(nil()),
    ]
}

fn node_strategy() -> impl Strategy<Value = Node> {
    leaf_strategy().prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(|items| list_node(items)),
            ("[A-Z][A-Z_]{0,6}", prop::collection::vec(inner.clone(), 0..3))
                .prop_map(|(label, args)| relation(&label, args)),
            prop::collection::btree_map("[a-z][a-z0-9_]{0,6}", inner, 0..4)
                .prop_map(|fields| struct_node(fields)),
        ]
    })
}

proptest! {
    #[test]
    fn normalize_is_idempotent(node in node_strategy()) {
        let once = normalize(&node);
        let twice = normalize(&once);
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn fingerprint_is_stable_across_calls(node in node_strategy()) {
        prop_assert_eq!(node.fingerprint(), node.fingerprint());
        prop_assert_eq!(normalize(&node).fingerprint(), node.fingerprint());
    }

    #[test]
    fn sexpr_round_trip(node in node_strategy()) {
        let normalized = normalize(&node);
        let rendered = to_sexpr(&normalized);
        prop_assert!(rendered.is_ascii());
        let parsed = parse_sexpr(&rendered).unwrap();
        prop_assert_eq!(parsed, normalized);
    }

    #[test]
    fn json_round_trip(node in node_strategy()) {
        let normalized = normalize(&node);
        let rendered = to_json(&normalized);
        prop_assert!(rendered.is_ascii());
        let parsed = from_json(&rendered).unwrap();
        prop_assert_eq!(parsed, normalized);
    }

    #[test]
    fn serialization_is_byte_stable(node in node_strategy()) {
        let normalized = normalize(&node);
        prop_assert_eq!(to_sexpr(&normalized), to_sexpr(&normalized));
        prop_assert_eq!(to_json(&normalized), to_json(&normalized));
    }
}

#[test]
fn equal_relations_built_via_different_paths_share_a_fingerprint() {
    let direct = relation("HAS", [entity("car"), entity("wheel")]);
    let parsed = parse_sexpr("(REL:HAS (ENTITY:car) (ENTITY:wheel))").unwrap();
    let decoded = from_json(&to_json(&direct)).unwrap();
    assert_eq!(direct.fingerprint(), parsed.fingerprint());
    assert_eq!(direct.fingerprint(), decoded.fingerprint());
}
