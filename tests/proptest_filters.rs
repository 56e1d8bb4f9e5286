//! Property-based tests using proptest
//!
//! These tests verify the algebra of filter evaluation over randomized alarm
//! records and randomized filter trees, including trees whose leaves fault.

use cloudmend::filter::{evaluate, filter, FilterNode, ListItemFilter, Op, ValueFilter};
use proptest::prelude::*;
use serde_json::{json, Value};

/// Generate arbitrary alarm rule data for testing
fn arb_alarm() -> impl Strategy<Value = Value> {
    (
        "al[a-z0-9]{4,12}", // alarm_id
        prop_oneof!["SYS.VPC", "SYS.ECS", "SYS.EVS", "SYS.OBS"],
        prop_oneof!["EVENT.SYS", "EVENT.CUSTOM", "ALL"],
        0i64..5, // level
        any::<bool>(),
        prop::collection::vec((0i64..5, 0i64..5), 0..4),
    )
        .prop_map(|(id, namespace, kind, level, enabled, pairs)| {
            let policies: Vec<Value> = pairs.iter().map(|(a, b)| json!({"a": a, "b": b})).collect();
            json!({
                "alarm_id": id,
                "namespace": namespace,
                "type": kind,
                "level": level,
                "alarm_enabled": enabled,
                "policies": policies
            })
        })
}

/// Generate a list of alarms
fn arb_alarm_list() -> impl Strategy<Value = Vec<Value>> {
    prop::collection::vec(arb_alarm(), 0..50)
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop::sample::select(vec![
        Op::Eq,
        Op::Ne,
        Op::Gt,
        Op::Ge,
        Op::Lt,
        Op::Le,
        Op::In,
        Op::NotIn,
        Op::Contains,
        Op::Regex,
        Op::Absent,
        Op::Present,
        Op::Empty,
        Op::NotEmpty,
    ])
}

fn arb_operand() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(json!("SYS.VPC")),
        Just(json!("EVENT.SYS")),
        (0i64..5).prop_map(Value::from),
        any::<bool>().prop_map(Value::from),
        Just(json!([1, 2, "SYS.ECS"])),
        Just(json!("^SYS")),
        // Invalid pattern: faults under `regex`
        Just(json!("(")),
    ]
}

/// Leaves, including keys that are missing and paths that do not parse
fn arb_leaf() -> impl Strategy<Value = FilterNode> {
    let keys = vec![
        "namespace",
        "type",
        "level",
        "alarm_enabled",
        "policies[0].a",
        "policies[*].b",
        "policies[?a==`1`]",
        "nope",
        "policies[",
    ];
    prop_oneof![
        (prop::sample::select(keys), arb_op(), arb_operand())
            .prop_map(|(key, op, value)| FilterNode::Value(ValueFilter::new(key, op, Some(value)))),
        (0i64..5).prop_map(|a| FilterNode::ListItem(ListItemFilter {
            key: "policies".to_string(),
            attrs: vec![FilterNode::Value(ValueFilter::eq("a", a))],
            count: None,
        })),
    ]
}

fn arb_tree() -> impl Strategy<Value = FilterNode> {
    arb_leaf().prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(FilterNode::And),
            prop::collection::vec(inner.clone(), 0..4).prop_map(FilterNode::Or),
            inner.prop_map(FilterNode::not),
        ]
    })
}

proptest! {
    /// Not inverts every tree, faulting leaves included
    #[test]
    fn not_inverts(tree in arb_tree(), alarm in arb_alarm()) {
        let negated = FilterNode::not(tree.clone());
        prop_assert_eq!(evaluate(&negated, &alarm), !evaluate(&tree, &alarm));
    }

    /// Empty And matches everything
    #[test]
    fn empty_and_is_identity(alarms in arb_alarm_list()) {
        prop_assert_eq!(filter(&alarms, &FilterNode::And(vec![])), alarms);
    }

    /// Empty Or matches nothing
    #[test]
    fn empty_or_matches_nothing(alarms in arb_alarm_list()) {
        prop_assert!(filter(&alarms, &FilterNode::Or(vec![])).is_empty());
    }

    /// Filtering keeps input order and only drops records
    #[test]
    fn filter_is_stable(alarms in arb_alarm_list(), tree in arb_tree()) {
        let kept = filter(&alarms, &tree);
        let expected: Vec<Value> = alarms.iter().filter(|a| evaluate(&tree, a)).cloned().collect();
        prop_assert_eq!(kept, expected);
    }

    /// Filtering is idempotent - filtering twice with same filter gives same result
    #[test]
    fn filter_is_idempotent(alarms in arb_alarm_list(), tree in arb_tree()) {
        let once = filter(&alarms, &tree);
        let twice = filter(&once, &tree);
        prop_assert_eq!(once, twice);
    }

    /// A list-item filter holds when any element satisfies its attributes
    #[test]
    fn list_item_is_existential(alarm in arb_alarm(), a in 0i64..5) {
        let node = FilterNode::ListItem(ListItemFilter {
            key: "policies".to_string(),
            attrs: vec![FilterNode::Value(ValueFilter::eq("a", a))],
            count: None,
        });
        let expected = alarm["policies"]
            .as_array()
            .map(|items| items.iter().any(|item| item["a"] == json!(a)))
            .unwrap_or(false);
        prop_assert_eq!(evaluate(&node, &alarm), expected);
    }

    /// A missing key matches only `absent`
    #[test]
    fn missing_key_only_matches_absent(alarm in arb_alarm(), op in arb_op(), value in arb_operand()) {
        let node = FilterNode::Value(ValueFilter::new("not.a.field", op, Some(value)));
        prop_assert_eq!(evaluate(&node, &alarm), op == Op::Absent);
    }

    /// A path that does not parse never matches
    #[test]
    fn malformed_path_never_matches(alarm in arb_alarm(), op in arb_op(), value in arb_operand()) {
        let node = FilterNode::Value(ValueFilter::new("policies[?", op, Some(value)));
        prop_assert!(!evaluate(&node, &alarm));
    }
}

#[test]
fn list_item_example_from_two_elements() {
    let record = json!({"items": [{"a": 1, "b": 2}, {"a": 3, "b": 4}]});
    let with = |a: i64| {
        FilterNode::ListItem(ListItemFilter {
            key: "items".to_string(),
            attrs: vec![FilterNode::Value(ValueFilter::eq("a", a))],
            count: None,
        })
    };
    assert!(evaluate(&with(3), &record));
    assert!(!evaluate(&with(9), &record));
}
