use richseq_core::{is_cleared, LocalEdit, Mark, Schema, Step, Translator, CLEARED};
use richseq_test_support::{assert_in_sync, attrs, doc, memory_session, p, strong, text};
use serde_json::json;

fn link(href: &str) -> Mark {
    Mark::new("link").with_attrs(attrs(json!({ "href": href })))
}

#[test]
fn removed_mark_reads_back_as_cleared() {
    let tree = doc(vec![p(vec![strong("Hello")])]);
    let (sequence, mut coordinator) = memory_session(Schema::rich_text(), &tree).unwrap();
    assert_eq!(sequence.annotation_at(2, "strong"), Some(json!(true)));

    coordinator
        .apply_local(LocalEdit::step(Step::RemoveMark {
            from: 1,
            to: 6,
            mark: Mark::new("strong"),
        }))
        .unwrap();
    coordinator.pump().unwrap();

    let stored = sequence.annotation_at(2, "strong");
    assert_eq!(stored, Some(CLEARED));
    assert!(stored.as_ref().is_some_and(is_cleared));
    assert_eq!(coordinator.editor().doc(), &doc(vec![p(vec![text("Hello")])]));
    assert_in_sync(&coordinator);
}

#[test]
fn mark_attributes_overwrite_in_place() {
    let tree = doc(vec![p(vec![text("click here")])]);
    let (sequence, mut coordinator) = memory_session(Schema::rich_text(), &tree).unwrap();
    for href in ["a.html", "b.html"] {
        coordinator
            .apply_local(LocalEdit::step(Step::AddMark {
                from: 1,
                to: 6,
                mark: link(href),
            }))
            .unwrap();
    }
    coordinator.pump().unwrap();

    assert_eq!(
        sequence.annotation_at(3, "link"),
        Some(json!({ "href": "b.html" }))
    );
    let content = &coordinator.editor().doc().content[0].content;
    assert_eq!(content.len(), 2);
    assert_eq!(content[0].marks.get("link"), Some(&json!({ "href": "b.html" })));
    assert_eq!(content[1].text.as_deref(), Some(" here"));
    assert_in_sync(&coordinator);
}

#[test]
fn re_adding_a_cleared_mark_restores_it() {
    let tree = doc(vec![p(vec![text("Hello")])]);
    let (sequence, mut coordinator) = memory_session(Schema::rich_text(), &tree).unwrap();
    let em = Mark::new("em");
    let steps = vec![
        Step::AddMark { from: 1, to: 6, mark: em.clone() },
        Step::RemoveMark { from: 1, to: 6, mark: em.clone() },
        Step::AddMark { from: 2, to: 4, mark: em },
    ];
    coordinator.apply_local(LocalEdit::user(steps)).unwrap();
    coordinator.pump().unwrap();

    assert_eq!(sequence.annotation_at(1, "em"), Some(CLEARED));
    assert_eq!(sequence.annotation_at(2, "em"), Some(json!(true)));
    assert_eq!(
        coordinator.editor().doc(),
        &doc(vec![p(vec![
            text("H"),
            text("el").with_mark("em", json!(true)),
            text("lo"),
        ])])
    );
    assert_in_sync(&coordinator);
}

#[test]
fn remote_mark_removal_is_absent_in_the_tree() {
    let tree = doc(vec![p(vec![strong("bold"), text(" plain")])]);
    let (sequence, mut coordinator) = memory_session(Schema::rich_text(), &tree).unwrap();
    let batch = Translator::new(&Schema::rich_text())
        .translate(&Step::RemoveMark {
            from: 1,
            to: 3,
            mark: Mark::new("strong"),
        })
        .unwrap();
    sequence.apply_remote(&batch).unwrap();
    coordinator.pump().unwrap();
    assert_eq!(
        coordinator.editor().doc(),
        &doc(vec![p(vec![text("bo"), strong("ld"), text(" plain")])])
    );
    assert!(coordinator.editor().doc().content[0].content[0].marks.is_empty());
}
