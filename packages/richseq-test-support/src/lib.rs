//! Fixtures shared by the richseq conformance suites: document builders, an in-memory
//! session, sync assertions and proptest generators for normal-form documents.

use proptest::prelude::*;
use richseq_core::{
    Attrs, ChangeCoordinator, MemoryEditor, MemorySequence, Node, Result, Schema,
};
use serde_json::{json, Value};

pub type MemoryCoordinator = ChangeCoordinator<MemorySequence, MemoryEditor>;

pub fn doc(content: Vec<Node>) -> Node {
    Node::with_content(Schema::DEFAULT_ROOT, content)
}

pub fn p(content: Vec<Node>) -> Node {
    Node::with_content("paragraph", content)
}

pub fn node(tag: &str, content: Vec<Node>) -> Node {
    Node::with_content(tag, content)
}

pub fn text(value: &str) -> Node {
    Node::text(value)
}

pub fn strong(value: &str) -> Node {
    Node::text(value).with_mark("strong", Value::Bool(true))
}

pub fn leaf(tag: &str, attrs: Value) -> Node {
    let node = Node::new(tag);
    match attrs {
        Value::Object(map) if !map.is_empty() => node.with_attrs(map),
        _ => node,
    }
}

pub fn attrs(value: Value) -> Attrs {
    match value {
        Value::Object(map) => map,
        _ => Attrs::new(),
    }
}

/// A sequence holding `doc` and a coordinator loaded from it. The returned sequence is a
/// second handle that tests use to play the remote participant.
pub fn memory_session(schema: Schema, doc: &Node) -> Result<(MemorySequence, MemoryCoordinator)> {
    let sequence = MemorySequence::from_doc(&schema, doc)?;
    let coordinator = ChangeCoordinator::load(schema, sequence.clone(), |schema, doc| {
        MemoryEditor::new(schema.clone(), doc)
    })?;
    Ok((sequence, coordinator))
}

/// Assert the editor's tree equals the walk of the sequence.
pub fn assert_in_sync(coordinator: &MemoryCoordinator) {
    let walked = coordinator
        .sequence()
        .to_doc(coordinator.schema())
        .expect("sequence walks");
    assert_eq!(&walked, coordinator.editor().doc(), "editor diverged from sequence");
}

fn arb_marks() -> impl Strategy<Value = Vec<(&'static str, Value)>> {
    prop::collection::vec(
        prop_oneof![
            Just(("strong", Value::Bool(true))),
            Just(("em", Value::Bool(true))),
            "[a-z]{1,6}".prop_map(|href| ("link", json!({ "href": href }))),
        ],
        0..3,
    )
}

fn arb_inline() -> impl Strategy<Value = Node> {
    prop_oneof![
        4 => ("[a-zA-Z é]{1,8}", arb_marks()).prop_map(|(value, marks)| {
            marks
                .into_iter()
                .fold(Node::text(value), |node, (key, value)| node.with_mark(key, value))
        }),
        1 => Just(Node::new("hard_break")),
        1 => ("[a-z]{1,6}", arb_marks()).prop_map(|(src, marks)| {
            marks.into_iter().fold(
                leaf("image", json!({ "src": format!("{src}.png") })),
                |node, (key, value)| node.with_mark(key, value),
            )
        }),
    ]
}

fn arb_paragraph() -> impl Strategy<Value = Node> {
    prop::collection::vec(arb_inline(), 0..5).prop_map(p)
}

fn arb_block() -> impl Strategy<Value = Node> {
    let leaf_block = prop_oneof![
        4 => arb_paragraph(),
        1 => (1u8..=3, prop::collection::vec(arb_inline(), 0..4)).prop_map(|(level, content)| {
            node("heading", content).with_attrs(attrs(json!({ "level": level })))
        }),
        1 => Just(Node::new("horizontal_rule")),
    ];
    leaf_block.prop_recursive(3, 16, 3, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 1..3)
                .prop_map(|content| node("blockquote", content)),
            prop::collection::vec(inner, 1..3).prop_map(|items| {
                node(
                    "bullet_list",
                    items.into_iter().map(|item| node("list_item", vec![item])).collect(),
                )
            }),
        ]
    })
}

/// Documents over the default rich-text schema, already in normal form.
pub fn arb_doc() -> impl Strategy<Value = Node> {
    prop::collection::vec(arb_block(), 0..5).prop_map(|content| {
        let mut node = doc(content);
        node.normalize();
        node
    })
}
