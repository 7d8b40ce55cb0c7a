use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::node::Node;
use crate::segment::{Attrs, Segment};

/// A segment placed at an absolute sequence position.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlacedSegment {
    pub pos: usize,
    pub segment: Segment,
}

/// Primitive sequence mutations.
///
/// Positions of each primitive are interpreted against the sequence as left by the
/// primitives before it in the same batch.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Primitive {
    RemoveRange {
        from: usize,
        to: usize,
    },
    /// Ordered inserts. Each segment's `pos` already accounts for the segments placed before
    /// it, and for any preserved content skipped over in a replace-around.
    InsertGroup {
        at: usize,
        segments: Vec<PlacedSegment>,
    },
    /// Set `key` to `value` on every segment in range. Removal writes
    /// [`CLEARED`](crate::segment::CLEARED).
    AnnotateRange {
        from: usize,
        to: usize,
        key: String,
        value: Value,
    },
}

/// Pending change batch: every primitive derived from one local edit, submitted as one
/// atomic group.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangeBatch {
    pub primitives: Vec<Primitive>,
}

impl ChangeBatch {
    pub fn new(primitives: Vec<Primitive>) -> Self {
        Self { primitives }
    }

    pub fn is_empty(&self) -> bool {
        self.primitives.is_empty()
    }

    pub fn len(&self) -> usize {
        self.primitives.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Primitive> {
        self.primitives.iter()
    }

    pub fn removes(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.primitives.iter().filter_map(|p| match p {
            Primitive::RemoveRange { from, to } => Some((*from, *to)),
            _ => None,
        })
    }

    pub fn insert_groups(&self) -> impl Iterator<Item = &[PlacedSegment]> {
        self.primitives.iter().filter_map(|p| match p {
            Primitive::InsertGroup { segments, .. } => Some(segments.as_slice()),
            _ => None,
        })
    }

    /// Net change in sequence length once the batch is applied.
    pub fn size_delta(&self) -> isize {
        self.primitives
            .iter()
            .map(|p| match p {
                Primitive::RemoveRange { from, to } => -(to.saturating_sub(*from) as isize),
                Primitive::InsertGroup { segments, .. } => {
                    segments.iter().map(|s| s.segment.len() as isize).sum()
                }
                Primitive::AnnotateRange { .. } => 0,
            })
            .sum()
    }

    /// The batch as sequence deltas, one insert per placed segment.
    pub fn deltas(&self) -> Vec<DeltaOp> {
        let mut ops = Vec::new();
        for primitive in &self.primitives {
            match primitive {
                Primitive::RemoveRange { from, to } => ops.push(DeltaOp::Remove {
                    from: *from,
                    to: *to,
                }),
                Primitive::InsertGroup { segments, .. } => {
                    ops.extend(segments.iter().map(|placed| DeltaOp::Insert {
                        pos: placed.pos,
                        segments: vec![placed.segment.clone()],
                    }))
                }
                Primitive::AnnotateRange {
                    from,
                    to,
                    key,
                    value,
                } => ops.push(DeltaOp::Annotate {
                    from: *from,
                    to: *to,
                    key: key.clone(),
                    value: value.clone(),
                }),
            }
        }
        ops
    }
}

/// A mark as the editor describes it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Mark {
    #[serde(rename = "type")]
    pub mark_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attrs: Option<Attrs>,
}

impl Mark {
    pub fn new(mark_type: impl Into<String>) -> Self {
        Self {
            mark_type: mark_type.into(),
            attrs: None,
        }
    }

    pub fn with_attrs(mut self, attrs: Attrs) -> Self {
        self.attrs = Some(attrs);
        self
    }

    /// Annotation value stored for this mark: its attributes, or `true` when it has none.
    pub fn value(&self) -> Value {
        self.attrs
            .clone()
            .map(Value::Object)
            .unwrap_or(Value::Bool(true))
    }
}

/// Replacement content. `open_start`/`open_end` count how many nodes at the respective edge
/// are cut open: their opening (or closing) boundary is not part of the slice.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Slice {
    #[serde(default)]
    pub content: Vec<Node>,
    #[serde(default)]
    pub open_start: usize,
    #[serde(default)]
    pub open_end: usize,
}

impl Slice {
    pub fn closed(content: Vec<Node>) -> Self {
        Self {
            content,
            open_start: 0,
            open_end: 0,
        }
    }

    pub fn open(content: Vec<Node>, open_start: usize, open_end: usize) -> Self {
        Self {
            content,
            open_start,
            open_end,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }
}

/// One discrete local edit reported by the editor surface.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "stepType", rename_all = "camelCase")]
pub enum Step {
    Replace {
        from: usize,
        to: usize,
        #[serde(default)]
        slice: Slice,
    },
    /// Replace `[from, to)` but keep `[gap_from, gap_to)`, moving it to offset `insert` of
    /// the slice.
    #[serde(rename_all = "camelCase")]
    ReplaceAround {
        from: usize,
        to: usize,
        gap_from: usize,
        gap_to: usize,
        insert: usize,
        #[serde(default)]
        slice: Slice,
        #[serde(default)]
        structure: bool,
    },
    AddMark {
        from: usize,
        to: usize,
        mark: Mark,
    },
    RemoveMark {
        from: usize,
        to: usize,
        mark: Mark,
    },
}

impl Step {
    /// The `[from, to)` range the step touches.
    pub fn range(&self) -> (usize, usize) {
        match self {
            Step::Replace { from, to, .. }
            | Step::ReplaceAround { from, to, .. }
            | Step::AddMark { from, to, .. }
            | Step::RemoveMark { from, to, .. } => (*from, *to),
        }
    }

    /// Move every position of the step by `offset`.
    pub fn shifted(&self, offset: isize) -> Option<Step> {
        let shift = |pos: usize| pos.checked_add_signed(offset);
        let mut step = self.clone();
        match &mut step {
            Step::Replace { from, to, .. }
            | Step::AddMark { from, to, .. }
            | Step::RemoveMark { from, to, .. } => {
                *from = shift(*from)?;
                *to = shift(*to)?;
            }
            Step::ReplaceAround {
                from,
                to,
                gap_from,
                gap_to,
                ..
            } => {
                *from = shift(*from)?;
                *to = shift(*to)?;
                *gap_from = shift(*gap_from)?;
                *gap_to = shift(*gap_to)?;
            }
        }
        Some(step)
    }
}

/// Tree-edit instruction handed to the editor surface: replace `[from, to)` of the
/// document content with `content`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TreeEdit {
    pub from: usize,
    pub to: usize,
    pub content: Vec<Node>,
}

/// Change observed on the sequence, positioned against the state left by the previous
/// delta.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum DeltaOp {
    Insert {
        pos: usize,
        segments: Vec<Segment>,
    },
    Remove {
        from: usize,
        to: usize,
    },
    Annotate {
        from: usize,
        to: usize,
        key: String,
        value: Value,
    },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SequenceDelta {
    /// Produced by this participant's own submission.
    pub local: bool,
    pub op: DeltaOp,
}

/// Event stream published by the sequence runtime.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum SequenceEvent {
    TransactionStart { local: bool },
    Delta(SequenceDelta),
    TransactionEnd { local: bool },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Origin {
    Local,
    Remote,
}

/// "Value changed" notification raised once per completed transaction.
#[derive(Clone, Debug, PartialEq)]
pub struct ValueChange {
    pub origin: Origin,
    /// The local edit that caused the change, if any.
    pub step: Option<Step>,
}
