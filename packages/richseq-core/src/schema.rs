//! Structural marker protocol: which tags nest and which are void.
//!
//! Both translation directions consult the same [`Schema`]. A tag is either a
//! [`NodeKind::Container`], written as a nest-begin/nest-end pair around its content, or a
//! [`NodeKind::Leaf`], written as a single simple marker. The classification is fixed for
//! the lifetime of a document.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::segment::is_reserved_key;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Container,
    Leaf,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeKind::Container => f.write_str("container"),
            NodeKind::Leaf => f.write_str("leaf"),
        }
    }
}

/// One entry of a [`SchemaConfig`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSpec {
    pub name: String,
    pub kind: NodeKind,
}

/// Serializable schema description, loaded from the host's configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaConfig {
    #[serde(default = "default_root")]
    pub root: String,
    #[serde(default)]
    pub nodes: Vec<NodeSpec>,
}

fn default_root() -> String {
    Schema::DEFAULT_ROOT.to_string()
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            nodes: Vec::new(),
        }
    }
}

const RICH_TEXT_NODES: &[(&str, NodeKind)] = &[
    ("paragraph", NodeKind::Container),
    ("blockquote", NodeKind::Container),
    ("heading", NodeKind::Container),
    ("code_block", NodeKind::Container),
    ("ordered_list", NodeKind::Container),
    ("bullet_list", NodeKind::Container),
    ("list_item", NodeKind::Container),
    ("footnote", NodeKind::Container),
    ("horizontal_rule", NodeKind::Leaf),
    ("image", NodeKind::Leaf),
    ("hard_break", NodeKind::Leaf),
    ("fluid", NodeKind::Leaf),
];

/// Validated tag registry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Schema {
    root: String,
    kinds: BTreeMap<String, NodeKind>,
}

impl Schema {
    pub const TEXT: &'static str = "text";
    pub const DEFAULT_ROOT: &'static str = "doc";

    /// Empty schema knowing only its root container.
    pub fn new(root: impl Into<String>) -> Result<Self> {
        let root = root.into();
        let mut schema = Self {
            root: root.clone(),
            kinds: BTreeMap::new(),
        };
        schema.register(root, NodeKind::Container)?;
        Ok(schema)
    }

    /// Basic rich-text node set with lists, embeds and footnotes.
    pub fn rich_text() -> Self {
        let mut kinds: BTreeMap<String, NodeKind> = RICH_TEXT_NODES
            .iter()
            .map(|(name, kind)| (name.to_string(), *kind))
            .collect();
        kinds.insert(Self::DEFAULT_ROOT.to_string(), NodeKind::Container);
        Self {
            root: Self::DEFAULT_ROOT.to_string(),
            kinds,
        }
    }

    pub fn from_config(config: &SchemaConfig) -> Result<Self> {
        let mut schema = Self::new(config.root.clone())?;
        for spec in &config.nodes {
            schema.register(spec.name.clone(), spec.kind)?;
        }
        Ok(schema)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let config: SchemaConfig = serde_json::from_str(json)?;
        Self::from_config(&config)
    }

    pub fn to_config(&self) -> SchemaConfig {
        SchemaConfig {
            root: self.root.clone(),
            nodes: self
                .kinds
                .iter()
                .filter(|(name, _)| **name != self.root)
                .map(|(name, kind)| NodeSpec {
                    name: name.clone(),
                    kind: *kind,
                })
                .collect(),
        }
    }

    /// Register a tag. Re-registering with the same kind is a no-op; changing the kind is
    /// rejected.
    pub fn register(&mut self, tag: impl Into<String>, kind: NodeKind) -> Result<()> {
        let tag = tag.into();
        if tag.is_empty() || tag == Self::TEXT {
            return Err(Error::Config(format!("tag `{tag}` cannot be registered")));
        }
        match self.kinds.get(&tag) {
            Some(existing) if *existing != kind => Err(Error::TagReclassified {
                tag,
                from: existing.to_string(),
                to: kind.to_string(),
            }),
            Some(_) => Ok(()),
            None => {
                self.kinds.insert(tag, kind);
                Ok(())
            }
        }
    }

    pub fn with_node(mut self, tag: impl Into<String>, kind: NodeKind) -> Result<Self> {
        self.register(tag, kind)?;
        Ok(self)
    }

    /// Check that `next` can replace this schema for an existing document: no shared tag may
    /// change its kind and the root must stay the same.
    pub fn ensure_compatible(&self, next: &Schema) -> Result<()> {
        if self.root != next.root {
            return Err(Error::Config(format!(
                "root changed from `{}` to `{}`",
                self.root, next.root
            )));
        }
        for (tag, kind) in &self.kinds {
            if let Some(other) = next.kinds.get(tag) {
                if other != kind {
                    return Err(Error::TagReclassified {
                        tag: tag.clone(),
                        from: kind.to_string(),
                        to: other.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn kind(&self, tag: &str) -> Result<NodeKind> {
        self.kinds
            .get(tag)
            .copied()
            .ok_or_else(|| Error::UnknownMarkerTag(tag.to_string()))
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.kinds.contains_key(tag)
    }

    pub fn is_container(&self, tag: &str) -> bool {
        self.kinds.get(tag) == Some(&NodeKind::Container)
    }

    pub fn is_leaf(&self, tag: &str) -> bool {
        self.kinds.get(tag) == Some(&NodeKind::Leaf)
    }

    /// Reject mark names that collide with the keys encoding structure.
    pub fn check_mark_key(&self, key: &str) -> Result<()> {
        if is_reserved_key(key) {
            return Err(Error::ReservedKeyConflict(key.to_string()));
        }
        Ok(())
    }
}

impl Default for Schema {
    fn default() -> Self {
        Self::rich_text()
    }
}
