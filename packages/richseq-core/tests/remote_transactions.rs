use proptest::prelude::*;
use richseq_core::{
    ChangeBatch, CoordinatorState, EditorSurface, Error, LocalEdit, LocalOutcome, Mark, Marker,
    Origin, PlacedSegment, Primitive, Schema, Segment, SequenceRuntime, Slice, Step, Translator,
    ValueChange,
};
use richseq_test_support::{
    arb_doc, assert_in_sync, attrs, doc, memory_session, node, p, strong, text,
};
use serde_json::json;

fn placed(pos: usize, segment: impl Into<Segment>) -> PlacedSegment {
    PlacedSegment {
        pos,
        segment: segment.into(),
    }
}

#[test]
fn three_remote_deltas_flush_as_one_tree_edit() {
    let tree = doc(vec![p(vec![text("ab")]), p(vec![text("cd")])]);
    let (sequence, mut coordinator) = memory_session(Schema::rich_text(), &tree).unwrap();

    // Another participant replaces the second paragraph with a bold heading.
    sequence
        .apply_remote(&ChangeBatch::new(vec![
            Primitive::RemoveRange { from: 4, to: 8 },
            Primitive::InsertGroup {
                at: 4,
                segments: vec![
                    placed(4, Marker::nest_begin("heading")),
                    placed(5, Segment::text("cd")),
                    placed(7, Marker::nest_end("heading")),
                ],
            },
            Primitive::AnnotateRange {
                from: 5,
                to: 7,
                key: "strong".into(),
                value: json!(true),
            },
        ]))
        .unwrap();

    assert_eq!(coordinator.pump().unwrap(), 5);
    let editor = coordinator.editor();
    assert_eq!(editor.applied_edits().len(), 1);
    let edit = &editor.applied_edits()[0];
    assert_eq!((edit.from, edit.to), (4, 8));
    assert_eq!(
        editor.doc(),
        &doc(vec![p(vec![text("ab")]), node("heading", vec![strong("cd")])])
    );
    assert_eq!(
        editor.value_changes(),
        &[ValueChange {
            origin: Origin::Remote,
            step: None
        }]
    );
    assert_in_sync(&coordinator);
}

#[test]
fn remote_transaction_that_cancels_out_applies_nothing() {
    let tree = doc(vec![p(vec![text("Hello")])]);
    let (sequence, mut coordinator) = memory_session(Schema::rich_text(), &tree).unwrap();
    sequence
        .apply_remote(&ChangeBatch::new(vec![
            Primitive::InsertGroup {
                at: 3,
                segments: vec![placed(3, Segment::text("zz"))],
            },
            Primitive::RemoveRange { from: 3, to: 5 },
        ]))
        .unwrap();
    coordinator.pump().unwrap();
    assert!(coordinator.editor().applied_edits().is_empty());
    assert_eq!(coordinator.editor().value_changes().len(), 1);
}

#[test]
fn own_submissions_never_come_back_as_tree_edits() {
    let tree = doc(vec![p(vec![text("Hello")])]);
    let (_, mut coordinator) = memory_session(Schema::rich_text(), &tree).unwrap();
    let steps = vec![
        Step::Replace {
            from: 6,
            to: 6,
            slice: Slice::closed(vec![text(" world")]),
        },
        Step::AddMark {
            from: 1,
            to: 6,
            mark: Mark::new("strong"),
        },
    ];
    let outcome = coordinator.apply_local(LocalEdit::user(steps.clone())).unwrap();
    assert_eq!(outcome, LocalOutcome::Submitted { batches: 2 });
    coordinator.pump().unwrap();

    let editor = coordinator.editor();
    assert!(editor.applied_edits().is_empty());
    let origins: Vec<_> = editor
        .value_changes()
        .iter()
        .map(|change| (change.origin, change.step.clone()))
        .collect();
    assert_eq!(
        origins,
        vec![
            (Origin::Local, Some(steps[0].clone())),
            (Origin::Local, Some(steps[1].clone())),
        ]
    );
    assert_eq!(
        editor.doc(),
        &doc(vec![p(vec![strong("Hello"), text(" world")])])
    );
    assert_in_sync(&coordinator);
}

#[test]
fn local_edits_during_a_remote_transaction_replay_after_the_flush() {
    let tree = doc(vec![p(vec![text("Hello")])]);
    let (sequence, mut coordinator) = memory_session(Schema::rich_text(), &tree).unwrap();
    sequence
        .apply_remote(&ChangeBatch::new(vec![Primitive::InsertGroup {
            at: 6,
            segments: vec![placed(6, Segment::text(" world"))],
        }]))
        .unwrap();

    assert!(coordinator.pump_next().unwrap());
    assert_eq!(coordinator.state(), CoordinatorState::AccumulatingRemote);

    let local = Step::Replace {
        from: 1,
        to: 1,
        slice: Slice::closed(vec![text("¡")]),
    };
    let outcome = coordinator.apply_local(LocalEdit::step(local.clone())).unwrap();
    assert_eq!(outcome, LocalOutcome::Queued);
    assert_eq!(coordinator.queued_len(), 1);
    assert_eq!(sequence.len(), 13);

    coordinator.pump().unwrap();
    assert_eq!(coordinator.state(), CoordinatorState::Idle);
    assert_eq!(coordinator.queued_len(), 0);
    assert_eq!(coordinator.editor().current_doc(), doc(vec![p(vec![text("¡Hello world")])]));
    let origins: Vec<_> = coordinator
        .editor()
        .value_changes()
        .iter()
        .map(|change| change.origin)
        .collect();
    assert_eq!(origins, vec![Origin::Remote, Origin::Local]);
    assert_in_sync(&coordinator);
}

#[test]
fn queued_edits_are_mapped_over_the_remote_edit() {
    let tree = doc(vec![p(vec![text("Hello")])]);
    let (sequence, mut coordinator) = memory_session(Schema::rich_text(), &tree).unwrap();
    sequence
        .apply_remote(&ChangeBatch::new(vec![Primitive::InsertGroup {
            at: 1,
            segments: vec![placed(1, Segment::text("XX"))],
        }]))
        .unwrap();
    assert!(coordinator.pump_next().unwrap());

    // delete "H", issued against the tree without "XX"
    let delete = Step::Replace {
        from: 1,
        to: 2,
        slice: Slice::default(),
    };
    let outcome = coordinator.apply_local(LocalEdit::step(delete)).unwrap();
    assert_eq!(outcome, LocalOutcome::Queued);

    coordinator.pump().unwrap();
    assert_eq!(coordinator.editor().doc(), &doc(vec![p(vec![text("XXello")])]));
    assert_in_sync(&coordinator);
}

#[test]
fn later_queued_steps_follow_earlier_ones() {
    let tree = doc(vec![p(vec![text("Hello")])]);
    let (sequence, mut coordinator) = memory_session(Schema::rich_text(), &tree).unwrap();
    sequence
        .apply_remote(&ChangeBatch::new(vec![Primitive::InsertGroup {
            at: 3,
            segments: vec![placed(3, Segment::text("XX"))],
        }]))
        .unwrap();
    assert!(coordinator.pump_next().unwrap());

    let insert = |at: usize, s: &str| Step::Replace {
        from: at,
        to: at,
        slice: Slice::closed(vec![text(s)]),
    };
    // "a" lands before the remote text; "b" goes before the "o" of "aHello"
    let steps = vec![insert(1, "a"), insert(6, "b")];
    coordinator.apply_local(LocalEdit::user(steps)).unwrap();

    coordinator.pump().unwrap();
    assert_eq!(
        coordinator.editor().doc(),
        &doc(vec![p(vec![text("aHeXXllbo")])])
    );
    assert_in_sync(&coordinator);
}

#[test]
fn queued_edit_overlapping_the_remote_edit_is_dropped() {
    let tree = doc(vec![p(vec![text("Hello")])]);
    let (sequence, mut coordinator) = memory_session(Schema::rich_text(), &tree).unwrap();
    sequence
        .apply_remote(&ChangeBatch::new(vec![Primitive::InsertGroup {
            at: 3,
            segments: vec![placed(3, Segment::text("XX"))],
        }]))
        .unwrap();
    assert!(coordinator.pump_next().unwrap());

    let delete = Step::Replace {
        from: 2,
        to: 4,
        slice: Slice::default(),
    };
    coordinator.apply_local(LocalEdit::step(delete)).unwrap();

    assert!(matches!(coordinator.pump(), Err(Error::InvalidState(_))));
    assert_eq!(coordinator.queued_len(), 0);
    assert_eq!(coordinator.state(), CoordinatorState::Idle);
    assert_eq!(coordinator.editor().doc(), &doc(vec![p(vec![text("HeXXllo")])]));
    assert_in_sync(&coordinator);
}

#[test]
fn structural_remote_edits_keep_the_editor_in_sync() {
    let tree = doc(vec![
        p(vec![text("first")]),
        node("blockquote", vec![p(vec![text("quoted")])]),
        p(vec![text("last")]),
    ]);
    let (sequence, mut coordinator) = memory_session(Schema::rich_text(), &tree).unwrap();
    let batches = vec![
        // split "first" into "fi" / "rst"
        ChangeBatch::new(vec![Primitive::InsertGroup {
            at: 3,
            segments: vec![
                placed(3, Marker::nest_end("paragraph")),
                placed(4, Marker::nest_begin("paragraph")),
            ],
        }]),
        // join them again
        ChangeBatch::new(vec![Primitive::RemoveRange { from: 3, to: 5 }]),
        // unwrap the blockquote
        ChangeBatch::new(vec![
            Primitive::RemoveRange { from: 16, to: 17 },
            Primitive::RemoveRange { from: 7, to: 8 },
        ]),
        // bold across a paragraph boundary
        ChangeBatch::new(vec![Primitive::AnnotateRange {
            from: 4,
            to: 11,
            key: "strong".into(),
            value: json!(true),
        }]),
        // drop an image into the last paragraph
        ChangeBatch::new(vec![Primitive::InsertGroup {
            at: 20,
            segments: vec![placed(
                20,
                Marker::simple("image").with_attrs(Some(&attrs(json!({ "src": "cat.png" })))),
            )],
        }]),
    ];
    for batch in &batches {
        sequence.apply_remote(batch).unwrap();
        coordinator.pump().unwrap();
        assert_in_sync(&coordinator);
    }
    assert_eq!(coordinator.editor().applied_edits().len(), batches.len());
    assert_eq!(
        coordinator.value().unwrap(),
        json!({
            "type": "doc",
            "content": [
                {"type": "paragraph", "content": [
                    {"type": "text", "text": "fir"},
                    {"type": "text", "text": "st", "marks": {"strong": true}}
                ]},
                {"type": "paragraph", "content": [
                    {"type": "text", "text": "quo", "marks": {"strong": true}},
                    {"type": "text", "text": "ted"}
                ]},
                {"type": "paragraph", "content": [
                    {"type": "text", "text": "last"},
                    {"type": "image", "attrs": {"src": "cat.png"}}
                ]}
            ]
        })
    );
}

#[test]
fn initialize_value_replaces_the_document() {
    let (sequence, mut coordinator) =
        memory_session(Schema::rich_text(), &doc(vec![p(vec![text("old")])])).unwrap();
    let next = doc(vec![
        node("heading", vec![text("new")]),
        p(vec![text("body")]),
    ]);
    coordinator.initialize_value(&next).unwrap();
    coordinator.pump().unwrap();
    assert_eq!(coordinator.editor().doc(), &next);
    assert_eq!(sequence.to_doc(&Schema::rich_text()).unwrap(), next);
    assert_eq!(coordinator.editor().value_changes().len(), 1);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn remote_rewrites_converge(before in arb_doc(), after in arb_doc()) {
        let schema = Schema::rich_text();
        let (sequence, mut coordinator) = memory_session(schema.clone(), &before).unwrap();
        let (_, batch) = Translator::new(&schema).initialize_value(&before, &after).unwrap();
        sequence.apply_remote(&batch).unwrap();
        coordinator.pump().unwrap();
        prop_assert_eq!(coordinator.editor().doc(), &after);
        prop_assert!(coordinator.editor().applied_edits().len() <= 1);
        prop_assert_eq!(sequence.segments().is_empty(), after.content.is_empty());
    }
}
