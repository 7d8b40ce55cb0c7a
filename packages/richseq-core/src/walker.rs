//! Rebuild a document tree from a linear run of segments.
//!
//! Nodes are collected in an index arena while a separate stack tracks the open
//! containers. The arena is only turned into an owned [`Node`] tree once the terminal
//! balance check has passed, so a failed walk never exposes partial structure.

use crate::error::{Error, Result};
use crate::node::{Marks, Node};
use crate::schema::{NodeKind, Schema};
use crate::segment::{marks_from_properties, Attrs, Marker, ReferenceType, Segment};

struct ArenaNode {
    node_type: String,
    text: Option<String>,
    marks: Marks,
    attrs: Option<Attrs>,
    children: Vec<usize>,
}

impl ArenaNode {
    fn element(node_type: &str, attrs: Option<Attrs>, marks: Marks) -> Self {
        Self {
            node_type: node_type.to_string(),
            text: None,
            marks,
            attrs,
            children: Vec::new(),
        }
    }
}

#[derive(Default)]
struct Arena {
    nodes: Vec<ArenaNode>,
}

impl Arena {
    fn push(&mut self, node: ArenaNode) -> usize {
        self.nodes.push(node);
        self.nodes.len() - 1
    }

    fn append(&mut self, parent: usize, node: ArenaNode) -> usize {
        let idx = self.push(node);
        self.nodes[parent].children.push(idx);
        idx
    }

    /// Append text to `parent`, extending its last child when the marks agree.
    fn append_text(&mut self, parent: usize, text: &str, marks: Marks) {
        if let Some(&last) = self.nodes[parent].children.last() {
            let prev = &mut self.nodes[last];
            if prev.marks == marks {
                if let Some(prev_text) = prev.text.as_mut() {
                    prev_text.push_str(text);
                    return;
                }
            }
        }
        self.append(
            parent,
            ArenaNode {
                node_type: Schema::TEXT.to_string(),
                text: Some(text.to_string()),
                marks,
                attrs: None,
                children: Vec::new(),
            },
        );
    }

    fn build(&mut self, idx: usize) -> Node {
        let children = std::mem::take(&mut self.nodes[idx].children);
        let content = children.into_iter().map(|child| self.build(child)).collect();
        let node = &mut self.nodes[idx];
        Node {
            node_type: std::mem::take(&mut node.node_type),
            content,
            text: node.text.take(),
            marks: std::mem::take(&mut node.marks),
            attrs: node.attrs.take(),
        }
    }
}

/// Segment walker bound to a schema.
pub struct SegmentWalker<'a> {
    schema: &'a Schema,
}

impl<'a> SegmentWalker<'a> {
    pub fn new(schema: &'a Schema) -> Self {
        Self { schema }
    }

    /// Walk a whole sequence into a document rooted at the schema's root tag.
    pub fn walk<'s, I>(&self, segments: I) -> Result<Node>
    where
        I: IntoIterator<Item = &'s Segment>,
    {
        let mut arena = Arena::default();
        let root = arena.push(ArenaNode::element(
            self.schema.root(),
            None,
            Marks::new(),
        ));
        self.walk_into(&mut arena, root, segments)?;
        Ok(arena.build(root))
    }

    /// Walk a balanced run of segments into a list of sibling nodes.
    pub fn walk_fragment<'s, I>(&self, segments: I) -> Result<Vec<Node>>
    where
        I: IntoIterator<Item = &'s Segment>,
    {
        Ok(self.walk(segments)?.content)
    }

    fn walk_into<'s, I>(&self, arena: &mut Arena, root: usize, segments: I) -> Result<()>
    where
        I: IntoIterator<Item = &'s Segment>,
    {
        let mut open = vec![root];
        for segment in segments {
            let top = *open.last().unwrap_or(&root);
            match segment {
                Segment::Text { text, properties } => {
                    if !text.is_empty() {
                        arena.append_text(top, text, marks_from_properties(properties));
                    }
                }
                Segment::Marker(marker) => {
                    let tag = marker_tag(marker)?;
                    match marker.ref_type {
                        ReferenceType::NestBegin => {
                            self.expect_kind(tag, NodeKind::Container)?;
                            let attrs = marker.attrs().cloned();
                            let idx =
                                arena.append(top, ArenaNode::element(tag, attrs, Marks::new()));
                            open.push(idx);
                        }
                        ReferenceType::NestEnd => {
                            if open.len() == 1 {
                                return Err(Error::StructuralMismatch {
                                    expected: "no open nest".into(),
                                    found: tag.to_string(),
                                });
                            }
                            if let Some(popped) = open.pop() {
                                let open_tag = &arena.nodes[popped].node_type;
                                if open_tag != tag {
                                    return Err(Error::StructuralMismatch {
                                        expected: open_tag.clone(),
                                        found: tag.to_string(),
                                    });
                                }
                            }
                        }
                        ReferenceType::Simple => {
                            self.expect_kind(tag, NodeKind::Leaf)?;
                            let attrs = marker.attrs().cloned();
                            let marks = marks_from_properties(&marker.properties);
                            arena.append(top, ArenaNode::element(tag, attrs, marks));
                        }
                    }
                }
            }
        }

        if open.len() != 1 {
            return Err(Error::UnbalancedMarkers {
                open: open.len() - 1,
            });
        }
        Ok(())
    }

    fn expect_kind(&self, tag: &str, kind: NodeKind) -> Result<()> {
        let actual = self.schema.kind(tag)?;
        if actual != kind {
            return Err(Error::StructuralMismatch {
                expected: format!("{kind} tag"),
                found: format!("{actual} `{tag}`"),
            });
        }
        Ok(())
    }
}

fn marker_tag(marker: &Marker) -> Result<&str> {
    marker
        .tag()
        .ok_or_else(|| Error::UnknownMarkerTag(String::new()))
}
