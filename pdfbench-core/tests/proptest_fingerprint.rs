//! Property-based tests for content fingerprints

use pdfbench::capability::{Capability, ToolOptions, ToolSession};
use pdfbench::fingerprint::{
    canonical_list, canonicalize, fingerprint, md5_hex, FingerprintComparator, PageSelection,
};
use pdfbench::tools::MockTool;
use pdfbench::DocumentHandle;
use proptest::prelude::*;
use serde_json::{json, Value};

fn leaf() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<i64>().prop_map(Value::from),
        "[a-z]{0,8}".prop_map(Value::from),
        any::<bool>().prop_map(Value::from),
        Just(Value::Null),
    ]
}

fn tree() -> impl Strategy<Value = Value> {
    leaf().prop_recursive(3, 24, 5, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..5).prop_map(Value::Array),
            prop::collection::btree_map("[A-Za-z]{1,6}", inner, 0..5)
                .prop_map(|m| Value::Object(m.into_iter().collect())),
        ]
    })
}

/// Rebuild a tree with every array reversed and every object's keys
/// inserted in reverse order
fn reordered(value: &Value) -> Value {
    match value {
        Value::Array(items) => Value::Array(items.iter().rev().map(reordered).collect()),
        Value::Object(map) => {
            let mut out = serde_json::Map::new();
            for (k, v) in map.iter().rev() {
                out.insert(k.clone(), reordered(v));
            }
            Value::Object(out)
        }
        other => other.clone(),
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn canonical_form_ignores_ordering(value in tree()) {
        prop_assert_eq!(canonicalize(&value), canonicalize(&reordered(&value)));
    }

    #[test]
    fn canonical_list_ignores_ordering(items in prop::collection::vec("[a-z ]{0,10}", 0..12).prop_shuffle()) {
        let mut sorted = items.clone();
        sorted.sort();
        prop_assert_eq!(md5_hex(&canonical_list(&items)), md5_hex(&canonical_list(&sorted)));
    }

    #[test]
    fn repeated_runs_of_a_deterministic_tool_match(content in "[a-zA-Z0-9 ]{0,40}", pages in 1usize..4) {
        let tool = MockTool::validator("steady").with_pages(pages).with_page_size(24, 32);
        let bytes = format!("%PDF-1.7 {content}").into_bytes();
        let doc = DocumentHandle::from_bytes("doc.pdf", bytes);

        let run = |n: usize| {
            let mut session = ToolSession::open(&tool, doc.clone(), ToolOptions::default()).unwrap();
            fingerprint(&mut session, &PageSelection::All, n)
        };
        let first = run(0);
        let second = run(1);

        let mut comparator = FingerprintComparator::new();
        prop_assert!(comparator.equal(&first, &second));
        prop_assert!(comparator.differing_roles(&second, &first).is_empty());
        prop_assert!(!first.digest(Capability::Render).is_empty());
    }
}

#[test]
fn test_distinct_values_canonicalize_differently() {
    let a = json!({"fonts": ["Helvetica", "Times"], "pages": 2});
    let b = json!({"fonts": ["Helvetica", "Courier"], "pages": 2});
    assert_ne!(canonicalize(&a), canonicalize(&b));
    assert_eq!(
        canonicalize(&json!({"pages": 2, "fonts": ["Times", "Helvetica"]})),
        canonicalize(&a)
    );
}
