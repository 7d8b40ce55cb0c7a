use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::{Rc, Weak};

use serde_json::Value;

use crate::error::{Error, Result};
use crate::node::Node;
use crate::ops::{
    ChangeBatch, DeltaOp, Primitive, SequenceDelta, SequenceEvent, Step, TreeEdit, ValueChange,
};
use crate::schema::Schema;
use crate::segment::{is_reserved_key, Segment};
use crate::translator::Translator;
use crate::walker::SegmentWalker;

/// Shared-sequence runtime the bridge talks to.
pub trait SequenceRuntime {
    /// Current segments in sequence order.
    fn segments(&self) -> Vec<Segment>;
    /// Apply a batch as one atomic group. A rejected batch leaves the sequence untouched.
    fn submit(&mut self, batch: &ChangeBatch) -> Result<()>;
    /// Open an event subscription. Dropping the handle ends it.
    fn subscribe(&mut self) -> Subscription;
}

/// Editor surface owning the tree.
pub trait EditorSurface {
    fn current_doc(&self) -> Node;
    /// Apply a user edit to the tree. Called once the edit's batch has been accepted.
    fn apply_step(&mut self, step: &Step) -> Result<()>;
    /// Apply a sequence-originated replacement. Never reported back as a local edit.
    fn apply_tree_edit(&mut self, edit: &TreeEdit) -> Result<()>;
    fn value_changed(&mut self, change: &ValueChange);
    /// The coordinator switched schemas. Later steps and tree edits use `schema`.
    fn schema_changed(&mut self, schema: &Schema);
}

type EventQueue = RefCell<VecDeque<SequenceEvent>>;

/// Receiving end of a sequence event subscription.
pub struct Subscription {
    queue: Rc<EventQueue>,
}

impl Subscription {
    /// Create a subscription and the weak sender half a runtime keeps.
    pub fn channel() -> (Subscription, SubscriptionSender) {
        let queue = Rc::new(RefCell::new(VecDeque::new()));
        let sender = SubscriptionSender {
            queue: Rc::downgrade(&queue),
        };
        (Subscription { queue }, sender)
    }

    pub fn drain(&self) -> Vec<SequenceEvent> {
        self.queue.borrow_mut().drain(..).collect()
    }

    pub fn pending(&self) -> usize {
        self.queue.borrow().len()
    }
}

/// Publishing end held by the runtime; goes dead once its [`Subscription`] is dropped.
#[derive(Clone)]
pub struct SubscriptionSender {
    queue: Weak<EventQueue>,
}

impl SubscriptionSender {
    /// Deliver an event; returns `false` when the subscriber is gone.
    pub fn send(&self, event: SequenceEvent) -> bool {
        match self.queue.upgrade() {
            Some(queue) => {
                queue.borrow_mut().push_back(event);
                true
            }
            None => false,
        }
    }
}

#[derive(Default)]
struct SequenceState {
    segments: Vec<Segment>,
    subscribers: Vec<SubscriptionSender>,
    reject_next: Option<String>,
}

/// In-memory shared sequence for tests and prototyping.
///
/// Clones are handles to the same sequence, so a test can hold one handle to play a remote
/// participant while the coordinator owns another.
#[derive(Clone, Default)]
pub struct MemorySequence {
    state: Rc<RefCell<SequenceState>>,
}

impl MemorySequence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_segments(segments: Vec<Segment>) -> Self {
        let sequence = Self::default();
        sequence.state.borrow_mut().segments = segments;
        sequence
    }

    /// Sequence holding the serialization of `doc`.
    pub fn from_doc(schema: &Schema, doc: &Node) -> Result<Self> {
        Ok(Self::from_segments(
            Translator::new(schema).expand(&doc.content)?,
        ))
    }

    pub fn len(&self) -> usize {
        self.state.borrow().segments.iter().map(Segment::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn subscriber_count(&self) -> usize {
        let mut state = self.state.borrow_mut();
        state.subscribers.retain(|s| s.queue.strong_count() > 0);
        state.subscribers.len()
    }

    /// Raw annotation stored at `pos`, including the cleared sentinel.
    pub fn annotation_at(&self, pos: usize, key: &str) -> Option<Value> {
        let state = self.state.borrow();
        let mut start = 0;
        for segment in &state.segments {
            let end = start + segment.len();
            if pos < end {
                return segment.properties().get(key).cloned();
            }
            start = end;
        }
        None
    }

    /// Apply a batch as another participant would, publishing a remote transaction.
    pub fn apply_remote(&self, batch: &ChangeBatch) -> Result<()> {
        self.apply(batch, false)
    }

    /// Make the next submission fail with `reason`.
    pub fn reject_next_submit(&self, reason: impl Into<String>) {
        self.state.borrow_mut().reject_next = Some(reason.into());
    }

    /// Walk the current content into a tree.
    pub fn to_doc(&self, schema: &Schema) -> Result<Node> {
        let state = self.state.borrow();
        SegmentWalker::new(schema).walk(&state.segments)
    }

    fn apply(&self, batch: &ChangeBatch, local: bool) -> Result<()> {
        let mut state = self.state.borrow_mut();
        if local {
            if let Some(reason) = state.reject_next.take() {
                return Err(Error::Submit(reason));
            }
        }

        let mut working = state.segments.clone();
        let mut deltas = Vec::new();
        for primitive in batch.iter() {
            apply_primitive(&mut working, primitive, &mut deltas)?;
        }
        coalesce(&mut working);
        state.segments = working;

        let mut events = Vec::with_capacity(deltas.len() + 2);
        events.push(SequenceEvent::TransactionStart { local });
        events.extend(
            deltas
                .into_iter()
                .map(|op| SequenceEvent::Delta(SequenceDelta { local, op })),
        );
        events.push(SequenceEvent::TransactionEnd { local });

        state.subscribers.retain(|subscriber| {
            events
                .iter()
                .all(|event| subscriber.send(event.clone()))
        });
        Ok(())
    }
}

impl SequenceRuntime for MemorySequence {
    fn segments(&self) -> Vec<Segment> {
        self.state.borrow().segments.clone()
    }

    fn submit(&mut self, batch: &ChangeBatch) -> Result<()> {
        self.apply(batch, true)
    }

    fn subscribe(&mut self) -> Subscription {
        let (subscription, sender) = Subscription::channel();
        self.state.borrow_mut().subscribers.push(sender);
        subscription
    }
}

fn sequence_len(segments: &[Segment]) -> usize {
    segments.iter().map(Segment::len).sum()
}

/// Ensure a segment boundary at `pos`; returns the index of the segment starting there.
fn split_at(segments: &mut Vec<Segment>, pos: usize) -> Result<usize> {
    let mut start = 0;
    for idx in 0..segments.len() {
        if start == pos {
            return Ok(idx);
        }
        let end = start + segments[idx].len();
        if pos < end {
            let tail = segments[idx]
                .split_off(pos - start)
                .ok_or_else(|| Error::Submit(format!("cannot split segment at {pos}")))?;
            segments.insert(idx + 1, tail);
            return Ok(idx + 1);
        }
        start = end;
    }
    if start == pos {
        return Ok(segments.len());
    }
    Err(Error::InvalidRange {
        from: pos,
        to: pos,
        size: start,
    })
}

fn apply_primitive(
    segments: &mut Vec<Segment>,
    primitive: &Primitive,
    deltas: &mut Vec<DeltaOp>,
) -> Result<()> {
    match primitive {
        Primitive::RemoveRange { from, to } => {
            check_range(segments, *from, *to)?;
            if from == to {
                return Ok(());
            }
            let start = split_at(segments, *from)?;
            let end = split_at(segments, *to)?;
            segments.drain(start..end);
            deltas.push(DeltaOp::Remove {
                from: *from,
                to: *to,
            });
        }
        Primitive::InsertGroup { segments: placed, .. } => {
            let mut run: Option<(usize, Vec<Segment>, usize)> = None;
            for item in placed {
                check_range(segments, item.pos, item.pos)?;
                let idx = split_at(segments, item.pos)?;
                segments.insert(idx, item.segment.clone());
                match run.as_mut() {
                    Some((_, run_segments, next)) if *next == item.pos => {
                        run_segments.push(item.segment.clone());
                        *next += item.segment.len();
                    }
                    _ => {
                        if let Some((pos, run_segments, _)) = run.take() {
                            deltas.push(DeltaOp::Insert {
                                pos,
                                segments: run_segments,
                            });
                        }
                        run = Some((
                            item.pos,
                            vec![item.segment.clone()],
                            item.pos + item.segment.len(),
                        ));
                    }
                }
            }
            if let Some((pos, run_segments, _)) = run {
                deltas.push(DeltaOp::Insert {
                    pos,
                    segments: run_segments,
                });
            }
        }
        Primitive::AnnotateRange {
            from,
            to,
            key,
            value,
        } => {
            if is_reserved_key(key) {
                return Err(Error::ReservedKeyConflict(key.clone()));
            }
            check_range(segments, *from, *to)?;
            if from == to {
                return Ok(());
            }
            let start = split_at(segments, *from)?;
            let end = split_at(segments, *to)?;
            for segment in &mut segments[start..end] {
                segment.properties_mut().insert(key.clone(), value.clone());
            }
            deltas.push(DeltaOp::Annotate {
                from: *from,
                to: *to,
                key: key.clone(),
                value: value.clone(),
            });
        }
    }
    Ok(())
}

fn check_range(segments: &[Segment], from: usize, to: usize) -> Result<()> {
    let size = sequence_len(segments);
    if from > to || to > size {
        return Err(Error::InvalidRange { from, to, size });
    }
    Ok(())
}

/// Merge adjacent text segments with identical annotations.
fn coalesce(segments: &mut Vec<Segment>) {
    let mut out: Vec<Segment> = Vec::with_capacity(segments.len());
    for segment in segments.drain(..) {
        if segment.is_empty() {
            continue;
        }
        if let (
            Some(Segment::Text {
                text: prev_text,
                properties: prev_props,
            }),
            Segment::Text { text, properties },
        ) = (out.last_mut(), &segment)
        {
            if prev_props == properties {
                prev_text.push_str(text);
                continue;
            }
        }
        out.push(segment);
    }
    *segments = out;
}

/// In-memory editor surface: holds the tree and records what the bridge told it.
pub struct MemoryEditor {
    schema: Schema,
    doc: Node,
    applied: Vec<TreeEdit>,
    changes: Vec<ValueChange>,
}

impl MemoryEditor {
    pub fn new(schema: Schema, doc: Node) -> Self {
        Self {
            schema,
            doc,
            applied: Vec::new(),
            changes: Vec::new(),
        }
    }

    pub fn doc(&self) -> &Node {
        &self.doc
    }

    pub fn applied_edits(&self) -> &[TreeEdit] {
        &self.applied
    }

    pub fn value_changes(&self) -> &[ValueChange] {
        &self.changes
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }
}

impl EditorSurface for MemoryEditor {
    fn current_doc(&self) -> Node {
        self.doc.clone()
    }

    fn apply_step(&mut self, step: &Step) -> Result<()> {
        let translator = Translator::new(&self.schema);
        let mut scratch = MemorySequence::from_segments(translator.expand(&self.doc.content)?);
        scratch.submit(&translator.translate(step)?)?;
        self.doc = scratch.to_doc(&self.schema)?;
        Ok(())
    }

    fn apply_tree_edit(&mut self, edit: &TreeEdit) -> Result<()> {
        let mut doc = self.doc.clone();
        doc.replace_range(&self.schema, edit.from, edit.to, edit.content.clone())?;
        self.doc = doc;
        self.applied.push(edit.clone());
        Ok(())
    }

    fn value_changed(&mut self, change: &ValueChange) {
        self.changes.push(change.clone());
    }

    fn schema_changed(&mut self, schema: &Schema) {
        self.schema = schema.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::PlacedSegment;
    use crate::segment::{Marker, CLEARED};
    use serde_json::json;

    fn hello() -> MemorySequence {
        MemorySequence::from_segments(vec![
            Marker::nest_begin("paragraph").into(),
            Segment::text("Hello"),
            Marker::nest_end("paragraph").into(),
        ])
    }

    #[test]
    fn remove_splits_text_runs() {
        let mut seq = hello();
        seq.submit(&ChangeBatch::new(vec![Primitive::RemoveRange { from: 2, to: 4 }]))
            .unwrap();
        let segments = seq.segments();
        assert_eq!(segments[1], Segment::text("Hlo"));
        assert_eq!(seq.len(), 5);
    }

    #[test]
    fn annotate_overwrites_and_clear_leaves_sentinel() {
        let mut seq = hello();
        let strong = |value| {
            ChangeBatch::new(vec![Primitive::AnnotateRange {
                from: 1,
                to: 3,
                key: "strong".into(),
                value,
            }])
        };
        seq.submit(&strong(json!(true))).unwrap();
        assert_eq!(seq.annotation_at(1, "strong"), Some(json!(true)));
        assert_eq!(seq.annotation_at(3, "strong"), None);
        seq.submit(&strong(CLEARED)).unwrap();
        assert_eq!(seq.annotation_at(2, "strong"), Some(CLEARED));
    }

    #[test]
    fn rejected_batch_leaves_sequence_untouched() {
        let mut seq = hello();
        let sub = seq.subscribe();
        let batch = ChangeBatch::new(vec![
            Primitive::RemoveRange { from: 0, to: 1 },
            Primitive::RemoveRange { from: 10, to: 12 },
        ]);
        assert!(matches!(seq.submit(&batch), Err(Error::InvalidRange { .. })));
        assert_eq!(seq.len(), 7);
        assert_eq!(sub.pending(), 0);

        seq.reject_next_submit("offline");
        let ok = ChangeBatch::new(vec![Primitive::RemoveRange { from: 1, to: 2 }]);
        assert!(matches!(seq.submit(&ok), Err(Error::Submit(reason)) if reason == "offline"));
        seq.submit(&ok).unwrap();
        assert_eq!(seq.len(), 6);
    }

    #[test]
    fn submissions_publish_one_transaction() {
        let mut seq = hello();
        let sub = seq.subscribe();
        let batch = ChangeBatch::new(vec![Primitive::InsertGroup {
            at: 6,
            segments: vec![
                PlacedSegment {
                    pos: 6,
                    segment: Segment::text("!"),
                },
                PlacedSegment {
                    pos: 7,
                    segment: Segment::text("?"),
                },
            ],
        }]);
        seq.submit(&batch).unwrap();
        let events = sub.drain();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0], SequenceEvent::TransactionStart { local: true });
        assert!(matches!(
            &events[1],
            SequenceEvent::Delta(SequenceDelta {
                local: true,
                op: DeltaOp::Insert { pos: 6, segments },
            }) if segments.len() == 2
        ));
        assert_eq!(events[2], SequenceEvent::TransactionEnd { local: true });
    }

    #[test]
    fn dropped_subscription_is_pruned() {
        let mut seq = hello();
        let sub = seq.subscribe();
        assert_eq!(seq.subscriber_count(), 1);
        drop(sub);
        assert_eq!(seq.subscriber_count(), 0);
    }

    #[test]
    fn reserved_annotation_is_refused() {
        let mut seq = hello();
        let batch = ChangeBatch::new(vec![Primitive::AnnotateRange {
            from: 0,
            to: 1,
            key: "type".into(),
            value: json!("image"),
        }]);
        assert!(matches!(
            seq.submit(&batch),
            Err(Error::ReservedKeyConflict(_))
        ));
    }
}
