//! Tree side of the bridge: the rich document as the editor surface sees it.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::schema::{NodeKind, Schema};
use crate::segment::Attrs;

/// Mark name → value. A mark without attributes carries `true`.
pub type Marks = BTreeMap<String, Value>;

/// One node of the rich document.
///
/// Serializes to the editor's JSON document shape (`{"type": .., "content": [..]}`).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Node {
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub content: Vec<Node>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Marks::is_empty")]
    pub marks: Marks,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attrs: Option<Attrs>,
}

impl Node {
    pub fn new(node_type: impl Into<String>) -> Self {
        Self {
            node_type: node_type.into(),
            content: Vec::new(),
            text: None,
            marks: Marks::new(),
            attrs: None,
        }
    }

    pub fn with_content(node_type: impl Into<String>, content: Vec<Node>) -> Self {
        Self {
            content,
            ..Self::new(node_type)
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::new(Schema::TEXT)
        }
    }

    pub fn with_mark(mut self, key: impl Into<String>, value: Value) -> Self {
        self.marks.insert(key.into(), value);
        self
    }

    pub fn with_attrs(mut self, attrs: Attrs) -> Self {
        self.attrs = Some(attrs);
        self
    }

    pub fn is_text(&self) -> bool {
        self.text.is_some()
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let mut node: Node = serde_json::from_str(json)?;
        node.normalize();
        Ok(node)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Concatenated text of this node and its descendants.
    pub fn text_content(&self) -> String {
        match &self.text {
            Some(text) => text.clone(),
            None => self.content.iter().map(Node::text_content).collect(),
        }
    }

    /// Size of this node in sequence positions.
    pub fn node_size(&self, schema: &Schema) -> Result<usize> {
        if let Some(text) = &self.text {
            return Ok(text.chars().count());
        }
        match schema.kind(&self.node_type)? {
            NodeKind::Leaf => Ok(1),
            NodeKind::Container => Ok(self.content_size(schema)? + 2),
        }
    }

    /// Size of this node's content, i.e. the valid position range inside it.
    pub fn content_size(&self, schema: &Schema) -> Result<usize> {
        self.content
            .iter()
            .try_fold(0, |acc, child| Ok(acc + child.node_size(schema)?))
    }

    /// Bring the subtree into normal form: adjacent text nodes with identical marks are
    /// merged, empty text nodes are dropped and empty attribute maps become `None`.
    pub fn normalize(&mut self) {
        if self.attrs.as_ref().is_some_and(|a| a.is_empty()) {
            self.attrs = None;
        }
        let content = std::mem::take(&mut self.content);
        self.content = normalize_fragment(content);
    }

    /// Replace `[from, to)` of this node's content with `insert`.
    ///
    /// Positions are relative to the start of the content. Both ends must fall inside the
    /// same parent; text nodes may be cut at any character, other nodes only at their
    /// boundaries.
    pub fn replace_range(
        &mut self,
        schema: &Schema,
        from: usize,
        to: usize,
        insert: Vec<Node>,
    ) -> Result<()> {
        let size = self.content_size(schema)?;
        if from > to || to > size {
            return Err(Error::InvalidRange { from, to, size });
        }
        replace_in(&mut self.content, schema, from, to, insert)
    }
}

pub(crate) fn normalize_fragment(nodes: Vec<Node>) -> Vec<Node> {
    let mut out: Vec<Node> = Vec::with_capacity(nodes.len());
    for mut node in nodes {
        if !node.is_text() {
            node.normalize();
            out.push(node);
            continue;
        }
        let text = node.text.as_deref().unwrap_or_default();
        if text.is_empty() {
            continue;
        }
        if let Some(prev) = out.last_mut() {
            if prev.marks == node.marks {
                if let Some(prev_text) = prev.text.as_mut() {
                    prev_text.push_str(text);
                    continue;
                }
            }
        }
        out.push(node);
    }
    out
}

fn replace_in(
    content: &mut Vec<Node>,
    schema: &Schema,
    from: usize,
    to: usize,
    insert: Vec<Node>,
) -> Result<()> {
    let mut pos = 0;
    for child in content.iter_mut() {
        let size = child.node_size(schema)?;
        if !child.is_text()
            && schema.is_container(&child.node_type)
            && from > pos
            && to < pos + size
        {
            return replace_in(&mut child.content, schema, from - pos - 1, to - pos - 1, insert);
        }
        pos += size;
    }

    let old = std::mem::take(content);
    let mut before = Vec::new();
    let mut after = Vec::new();
    let mut pos = 0;
    for child in old {
        let size = child.node_size(schema)?;
        let end = pos + size;
        if end <= from {
            before.push(child);
        } else if pos >= to {
            after.push(child);
        } else if let Some(text) = &child.text {
            if pos < from {
                before.push(Node {
                    text: Some(char_slice(text, 0, from - pos)),
                    ..child.clone()
                });
            }
            if end > to {
                after.push(Node {
                    text: Some(char_slice(text, to - pos, size)),
                    ..child.clone()
                });
            }
        } else if pos < from || end > to {
            return Err(Error::InvalidRange {
                from,
                to,
                size: pos + size,
            });
        }
        pos = end;
    }

    before.extend(insert);
    before.extend(after);
    *content = normalize_fragment(before);
    Ok(())
}

fn char_slice(text: &str, start: usize, end: usize) -> String {
    text.chars().skip(start).take(end - start).collect()
}
