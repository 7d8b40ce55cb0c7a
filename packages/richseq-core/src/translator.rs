//! Translate local tree edits into batches of sequence primitives.

use crate::error::{Error, Result};
use crate::node::Node;
use crate::ops::{ChangeBatch, Mark, PlacedSegment, Primitive, Slice, Step};
use crate::schema::{NodeKind, Schema};
use crate::segment::{Marker, Properties, Segment, CLEARED};

/// Places segments at increasing positions, jumping over preserved gap content once the
/// cursor reaches the splice point.
struct Placer {
    pos: usize,
    splice: Option<(usize, usize)>,
    placed: Vec<PlacedSegment>,
}

impl Placer {
    fn new(pos: usize, splice: Option<(usize, usize)>) -> Self {
        Self {
            pos,
            splice,
            placed: Vec::new(),
        }
    }

    fn place(&mut self, segment: Segment) -> Result<()> {
        self.skip_gap();
        let len = segment.len();
        if let Some((at, _)) = self.splice {
            if self.pos < at && at < self.pos + len {
                return Err(Error::InvalidStep(format!(
                    "insert offset falls inside a segment placed at {}",
                    self.pos
                )));
            }
        }
        self.placed.push(PlacedSegment {
            pos: self.pos,
            segment,
        });
        self.pos += len;
        Ok(())
    }

    fn skip_gap(&mut self) {
        if let Some((at, len)) = self.splice {
            if self.pos == at {
                self.pos += len;
                self.splice = None;
            }
        }
    }
}

/// Tree → sequence translator.
pub struct Translator<'a> {
    schema: &'a Schema,
}

impl<'a> Translator<'a> {
    pub fn new(schema: &'a Schema) -> Self {
        Self { schema }
    }

    /// Produce the pending change batch for one step.
    ///
    /// Nothing is emitted when the step is rejected: all validation happens before the
    /// batch is returned.
    pub fn translate(&self, step: &Step) -> Result<ChangeBatch> {
        match step {
            Step::Replace { from, to, slice } => self.replace(*from, *to, slice),
            Step::ReplaceAround {
                from,
                to,
                gap_from,
                gap_to,
                insert,
                slice,
                ..
            } => self.replace_around(*from, *to, *gap_from, *gap_to, *insert, slice),
            Step::AddMark { from, to, mark } => self.annotate(*from, *to, mark, mark.value()),
            Step::RemoveMark { from, to, mark } => self.annotate(*from, *to, mark, CLEARED),
        }
    }

    /// Replace the whole content of `current` with the content of `value`.
    pub fn initialize_value(&self, current: &Node, value: &Node) -> Result<(Step, ChangeBatch)> {
        let step = Step::Replace {
            from: 0,
            to: current.content_size(self.schema)?,
            slice: Slice::closed(value.content.clone()),
        };
        let batch = self.translate(&step)?;
        Ok((step, batch))
    }

    /// Serialize closed content into segments, depth first.
    pub fn expand(&self, content: &[Node]) -> Result<Vec<Segment>> {
        let mut placer = Placer::new(0, None);
        self.emit_fragment(content, 0, 0, &mut placer)?;
        Ok(placer.placed.into_iter().map(|p| p.segment).collect())
    }

    fn replace(&self, from: usize, to: usize, slice: &Slice) -> Result<ChangeBatch> {
        if from > to {
            return Err(Error::InvalidStep(format!("replace range {from}..{to}")));
        }
        let mut primitives = Vec::new();
        if from != to {
            primitives.push(Primitive::RemoveRange { from, to });
        }
        if let Some(group) = self.insert_group(from, slice, None)? {
            primitives.push(group);
        }
        Ok(ChangeBatch::new(primitives))
    }

    fn replace_around(
        &self,
        from: usize,
        to: usize,
        gap_from: usize,
        gap_to: usize,
        insert: usize,
        slice: &Slice,
    ) -> Result<ChangeBatch> {
        if !(from <= gap_from && gap_from <= gap_to && gap_to <= to) {
            return Err(Error::InvalidStep(format!(
                "gap {gap_from}..{gap_to} outside range {from}..{to}"
            )));
        }
        let mut primitives = Vec::new();
        // Tail first: removing the head would shift the tail's offsets.
        if gap_to != to {
            primitives.push(Primitive::RemoveRange { from: gap_to, to });
        }
        if gap_from != from {
            primitives.push(Primitive::RemoveRange { from, to: gap_from });
        }
        let splice = (from + insert, gap_to - gap_from);
        if let Some(group) = self.insert_group(from, slice, Some(splice))? {
            primitives.push(group);
        }
        Ok(ChangeBatch::new(primitives))
    }

    fn insert_group(
        &self,
        at: usize,
        slice: &Slice,
        splice: Option<(usize, usize)>,
    ) -> Result<Option<Primitive>> {
        let mut placer = Placer::new(at, splice);
        self.emit_fragment(&slice.content, slice.open_start, slice.open_end, &mut placer)?;
        if let Some((splice_at, len)) = placer.splice {
            if len > 0 && splice_at > placer.pos {
                return Err(Error::InvalidStep(format!(
                    "insert offset {} lies past the end of the slice",
                    splice_at - at
                )));
            }
        }
        if placer.placed.is_empty() {
            return Ok(None);
        }
        Ok(Some(Primitive::InsertGroup {
            at,
            segments: placer.placed,
        }))
    }

    fn annotate(
        &self,
        from: usize,
        to: usize,
        mark: &Mark,
        value: serde_json::Value,
    ) -> Result<ChangeBatch> {
        self.schema.check_mark_key(&mark.mark_type)?;
        if from > to {
            return Err(Error::InvalidStep(format!("mark range {from}..{to}")));
        }
        if from == to {
            return Ok(ChangeBatch::default());
        }
        Ok(ChangeBatch::new(vec![Primitive::AnnotateRange {
            from,
            to,
            key: mark.mark_type.clone(),
            value,
        }]))
    }

    fn emit_fragment(
        &self,
        nodes: &[Node],
        open_start: usize,
        open_end: usize,
        placer: &mut Placer,
    ) -> Result<()> {
        let last = nodes.len().saturating_sub(1);
        for (i, node) in nodes.iter().enumerate() {
            let node_open_start = if i == 0 { open_start } else { 0 };
            let node_open_end = if i == last { open_end } else { 0 };
            self.emit_node(node, node_open_start, node_open_end, placer)?;
        }
        Ok(())
    }

    fn emit_node(
        &self,
        node: &Node,
        open_start: usize,
        open_end: usize,
        placer: &mut Placer,
    ) -> Result<()> {
        if let Some(text) = &node.text {
            if !text.is_empty() {
                placer.place(Segment::annotated(text.clone(), self.mark_properties(node)?))?;
            }
            return Ok(());
        }

        match self.schema.kind(&node.node_type)? {
            NodeKind::Leaf => {
                if !node.content.is_empty() {
                    return Err(Error::InvalidStep(format!(
                        "leaf `{}` carries content",
                        node.node_type
                    )));
                }
                let mut marker =
                    Marker::simple(node.node_type.clone()).with_attrs(node.attrs.as_ref());
                marker.properties.extend(self.mark_properties(node)?);
                placer.place(marker.into())?;
            }
            NodeKind::Container => {
                if open_start == 0 {
                    let marker =
                        Marker::nest_begin(node.node_type.clone()).with_attrs(node.attrs.as_ref());
                    placer.place(marker.into())?;
                }
                self.emit_fragment(
                    &node.content,
                    open_start.saturating_sub(1),
                    open_end.saturating_sub(1),
                    placer,
                )?;
                if open_end == 0 {
                    placer.place(Marker::nest_end(node.node_type.clone()).into())?;
                }
            }
        }
        Ok(())
    }

    fn mark_properties(&self, node: &Node) -> Result<Properties> {
        let mut properties = Properties::new();
        for (key, value) in &node.marks {
            self.schema.check_mark_key(key)?;
            properties.insert(key.clone(), value.clone());
        }
        Ok(properties)
    }
}
