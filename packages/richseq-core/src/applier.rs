//! Turn a remote transaction's sequence deltas into a single localized tree edit.

use serde_json::Value;

use crate::error::{Error, Result};
use crate::node::Node;
use crate::ops::{DeltaOp, SequenceDelta, TreeEdit};
use crate::schema::{NodeKind, Schema};
use crate::segment::{
    is_cleared, is_reserved_key, marks_from_properties, Attrs, Marker, Properties,
    ReferenceType, Segment,
};
use crate::translator::Translator;
use crate::walker::SegmentWalker;

/// One sequence position in a comparable form. Annotations that the tree cannot observe
/// (cleared values, extra keys on nest markers) are stripped.
#[derive(Clone, Debug, PartialEq)]
enum Cell {
    Char(char, Properties),
    Begin(String, Option<Attrs>),
    End(String),
    Leaf(String, Option<Attrs>, Properties),
}

impl Cell {
    fn from_segments(segments: &[Segment]) -> Result<Vec<Cell>> {
        let mut cells = Vec::new();
        for segment in segments {
            match segment {
                Segment::Text { text, properties } => {
                    let marks: Properties = marks_from_properties(properties);
                    cells.extend(text.chars().map(|ch| Cell::Char(ch, marks.clone())));
                }
                Segment::Marker(marker) => {
                    let tag = marker
                        .tag()
                        .ok_or_else(|| Error::UnknownMarkerTag(String::new()))?
                        .to_string();
                    cells.push(match marker.ref_type {
                        ReferenceType::NestBegin => Cell::Begin(tag, marker.attrs().cloned()),
                        ReferenceType::NestEnd => Cell::End(tag),
                        ReferenceType::Simple => Cell::Leaf(
                            tag,
                            marker.attrs().cloned(),
                            marks_from_properties(&marker.properties),
                        ),
                    });
                }
            }
        }
        Ok(cells)
    }

    fn to_segment(&self) -> Segment {
        match self {
            Cell::Char(ch, marks) => Segment::annotated(ch.to_string(), marks.clone()),
            Cell::Begin(tag, attrs) => Marker::nest_begin(tag.clone())
                .with_attrs(attrs.as_ref())
                .into(),
            Cell::End(tag) => Marker::nest_end(tag.clone()).into(),
            Cell::Leaf(tag, attrs, marks) => {
                let mut marker = Marker::simple(tag.clone()).with_attrs(attrs.as_ref());
                marker.properties.extend(marks.clone());
                marker.into()
            }
        }
    }

    fn annotate(&mut self, key: &str, value: &Value) {
        let marks = match self {
            Cell::Char(_, marks) | Cell::Leaf(_, _, marks) => marks,
            Cell::Begin(..) | Cell::End(_) => return,
        };
        if is_reserved_key(key) {
            return;
        }
        if is_cleared(value) {
            marks.remove(key);
        } else {
            marks.insert(key.to_string(), value.clone());
        }
    }
}

/// Nesting depth before each cell (and after the last one), validating the marker
/// protocol along the way.
fn depths(cells: &[Cell], schema: &Schema) -> Result<Vec<usize>> {
    let mut open: Vec<&str> = Vec::new();
    let mut depths = Vec::with_capacity(cells.len() + 1);
    for cell in cells {
        depths.push(open.len());
        match cell {
            Cell::Char(..) => {}
            Cell::Begin(tag, _) => {
                expect_kind(schema, tag, NodeKind::Container)?;
                open.push(tag);
            }
            Cell::End(tag) => match open.pop() {
                Some(open_tag) if open_tag == tag.as_str() => {}
                Some(open_tag) => {
                    return Err(Error::StructuralMismatch {
                        expected: open_tag.to_string(),
                        found: tag.clone(),
                    })
                }
                None => {
                    return Err(Error::StructuralMismatch {
                        expected: "no open nest".into(),
                        found: tag.clone(),
                    })
                }
            },
            Cell::Leaf(tag, ..) => expect_kind(schema, tag, NodeKind::Leaf)?,
        }
    }
    if !open.is_empty() {
        return Err(Error::UnbalancedMarkers { open: open.len() });
    }
    depths.push(0);
    Ok(depths)
}

fn expect_kind(schema: &Schema, tag: &str, kind: NodeKind) -> Result<()> {
    let actual = schema.kind(tag)?;
    if actual != kind {
        return Err(Error::StructuralMismatch {
            expected: format!("{kind} tag"),
            found: format!("{actual} `{tag}`"),
        });
    }
    Ok(())
}

fn check_range(from: usize, to: usize, size: usize) -> Result<()> {
    if from > to || to > size {
        return Err(Error::InvalidRange { from, to, size });
    }
    Ok(())
}

fn replay(cells: &mut Vec<Cell>, op: &DeltaOp) -> Result<()> {
    match op {
        DeltaOp::Insert { pos, segments } => {
            check_range(*pos, *pos, cells.len())?;
            let inserted = Cell::from_segments(segments)?;
            cells.splice(*pos..*pos, inserted);
        }
        DeltaOp::Remove { from, to } => {
            check_range(*from, *to, cells.len())?;
            cells.drain(*from..*to);
        }
        DeltaOp::Annotate {
            from,
            to,
            key,
            value,
        } => {
            check_range(*from, *to, cells.len())?;
            for cell in &mut cells[*from..*to] {
                cell.annotate(key, value);
            }
        }
    }
    Ok(())
}

/// State of one open remote transaction: the tree as it was before the transaction began
/// and every remote delta observed since.
#[derive(Clone, Debug)]
pub struct DeltaAccumulator {
    snapshot: Node,
    deltas: Vec<DeltaOp>,
}

impl DeltaAccumulator {
    pub fn new(snapshot: Node) -> Self {
        Self {
            snapshot,
            deltas: Vec::new(),
        }
    }

    /// Record a delta. Deltas produced by this participant are dropped.
    pub fn push(&mut self, delta: SequenceDelta) {
        if delta.local {
            return;
        }
        self.deltas.push(delta.op);
    }

    pub fn len(&self) -> usize {
        self.deltas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deltas.is_empty()
    }

    pub fn snapshot(&self) -> &Node {
        &self.snapshot
    }

    /// Consume the accumulator and derive the tree edit, or `None` when the transaction
    /// left the document unchanged.
    pub fn build(self, schema: &Schema) -> Result<Option<TreeEdit>> {
        if self.deltas.is_empty() {
            return Ok(None);
        }

        let before = Translator::new(schema).expand(&self.snapshot.content)?;
        let old = Cell::from_segments(&before)?;
        let mut new = old.clone();
        for op in &self.deltas {
            replay(&mut new, op)?;
        }
        let old_depths = depths(&old, schema)?;
        let new_depths = depths(&new, schema)?;

        let prefix = old.iter().zip(&new).take_while(|(a, b)| a == b).count();
        if prefix == old.len() && prefix == new.len() {
            return Ok(None);
        }
        let max_suffix = old.len().min(new.len()) - prefix;
        let suffix = old
            .iter()
            .rev()
            .zip(new.iter().rev())
            .take(max_suffix)
            .take_while(|(a, b)| a == b)
            .count();

        let mut from = prefix;
        let mut old_to = old.len() - suffix;
        let mut new_to = new.len() - suffix;

        // Widen to the shallowest depth either side reaches so both regions are runs of
        // whole siblings under the same parent.
        let floor = old_depths[from..=old_to]
            .iter()
            .chain(&new_depths[from..=new_to])
            .copied()
            .min()
            .unwrap_or(0);
        while old_depths[from] > floor {
            from -= 1;
        }
        while old_depths[old_to] > floor {
            old_to += 1;
            new_to += 1;
        }

        let segments: Vec<Segment> = new[from..new_to].iter().map(Cell::to_segment).collect();
        let content = SegmentWalker::new(schema).walk_fragment(&segments)?;
        tracing::trace!(from, to = old_to, nodes = content.len(), "derived tree edit");
        Ok(Some(TreeEdit {
            from,
            to: old_to,
            content,
        }))
    }
}
