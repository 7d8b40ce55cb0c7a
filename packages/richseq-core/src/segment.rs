//! Segments of the shared sequence: annotated text runs and zero-width structural markers.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Annotation key carrying a marker's structural tag.
pub const TYPE_KEY: &str = "type";
/// Annotation key carrying a void node's attributes.
pub const ATTRS_KEY: &str = "attrs";
/// Keys that encode structure and can never be used as mark names.
pub const RESERVED_KEYS: [&str; 2] = [TYPE_KEY, ATTRS_KEY];

/// Value written over a mark when it is removed.
///
/// The sequence has no way to delete an annotation, so removal overwrites it with this
/// sentinel. Readers must treat a cleared value exactly like an absent one.
pub const CLEARED: Value = Value::Bool(false);

/// Annotation map attached to a segment.
pub type Properties = BTreeMap<String, Value>;

/// Structural attributes of a node (embed source, heading level, ...).
pub type Attrs = serde_json::Map<String, Value>;

pub fn is_reserved_key(key: &str) -> bool {
    RESERVED_KEYS.contains(&key)
}

pub fn is_cleared(value: &Value) -> bool {
    *value == CLEARED
}

/// How a marker participates in the structure.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceType {
    NestBegin,
    NestEnd,
    Simple,
}

/// Zero-width (length one) structural element of the sequence.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Marker {
    pub ref_type: ReferenceType,
    #[serde(default)]
    pub properties: Properties,
}

impl Marker {
    pub fn new(ref_type: ReferenceType, tag: impl Into<String>) -> Self {
        let mut properties = Properties::new();
        properties.insert(TYPE_KEY.to_string(), Value::String(tag.into()));
        Self {
            ref_type,
            properties,
        }
    }

    pub fn nest_begin(tag: impl Into<String>) -> Self {
        Self::new(ReferenceType::NestBegin, tag)
    }

    pub fn nest_end(tag: impl Into<String>) -> Self {
        Self::new(ReferenceType::NestEnd, tag)
    }

    pub fn simple(tag: impl Into<String>) -> Self {
        Self::new(ReferenceType::Simple, tag)
    }

    /// Attach structural attributes; empty attribute maps are not stored.
    pub fn with_attrs(mut self, attrs: Option<&Attrs>) -> Self {
        if let Some(attrs) = attrs.filter(|a| !a.is_empty()) {
            self.properties
                .insert(ATTRS_KEY.to_string(), Value::Object(attrs.clone()));
        }
        self
    }

    pub fn tag(&self) -> Option<&str> {
        self.properties.get(TYPE_KEY).and_then(Value::as_str)
    }

    pub fn attrs(&self) -> Option<&Attrs> {
        self.properties
            .get(ATTRS_KEY)
            .and_then(Value::as_object)
            .filter(|a| !a.is_empty())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Segment {
    Text {
        text: String,
        #[serde(default, skip_serializing_if = "Properties::is_empty")]
        properties: Properties,
    },
    Marker(Marker),
}

impl Segment {
    pub fn text(text: impl Into<String>) -> Self {
        Self::annotated(text, Properties::new())
    }

    pub fn annotated(text: impl Into<String>, properties: Properties) -> Self {
        Segment::Text {
            text: text.into(),
            properties,
        }
    }

    /// Length in sequence positions: one per character, one per marker.
    pub fn len(&self) -> usize {
        match self {
            Segment::Text { text, .. } => text.chars().count(),
            Segment::Marker(_) => 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn properties(&self) -> &Properties {
        match self {
            Segment::Text { properties, .. } => properties,
            Segment::Marker(marker) => &marker.properties,
        }
    }

    pub fn properties_mut(&mut self) -> &mut Properties {
        match self {
            Segment::Text { properties, .. } => properties,
            Segment::Marker(marker) => &mut marker.properties,
        }
    }

    pub fn as_marker(&self) -> Option<&Marker> {
        match self {
            Segment::Marker(marker) => Some(marker),
            Segment::Text { .. } => None,
        }
    }

    /// Split a text segment at a character offset, returning the tail.
    ///
    /// Markers cannot be split; `None` is returned for them and for out-of-range offsets.
    pub(crate) fn split_off(&mut self, offset: usize) -> Option<Segment> {
        match self {
            Segment::Text { text, properties } => {
                let byte = text.char_indices().nth(offset).map(|(i, _)| i)?;
                let tail = text.split_off(byte);
                Some(Segment::Text {
                    text: tail,
                    properties: properties.clone(),
                })
            }
            Segment::Marker(_) => None,
        }
    }
}

impl From<Marker> for Segment {
    fn from(marker: Marker) -> Self {
        Segment::Marker(marker)
    }
}

/// Translate an annotation map into marks: reserved keys and cleared values are dropped.
pub fn marks_from_properties(properties: &Properties) -> BTreeMap<String, Value> {
    properties
        .iter()
        .filter(|(key, value)| !is_reserved_key(key) && !is_cleared(value))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_length_counts_chars() {
        assert_eq!(Segment::text("héllo").len(), 5);
        assert_eq!(Segment::from(Marker::nest_end("paragraph")).len(), 1);
    }

    #[test]
    fn split_off_respects_char_boundaries() {
        let mut seg = Segment::text("añb");
        let tail = seg.split_off(2).unwrap();
        assert_eq!(seg, Segment::text("añ"));
        assert_eq!(tail, Segment::text("b"));
        assert!(Segment::text("ab").split_off(2).is_none());
    }

    #[test]
    fn cleared_values_are_not_marks() {
        let mut props = Properties::new();
        props.insert("strong".into(), Value::Bool(true));
        props.insert("em".into(), CLEARED);
        props.insert(TYPE_KEY.into(), Value::String("image".into()));
        let marks = marks_from_properties(&props);
        assert_eq!(marks.len(), 1);
        assert!(marks.contains_key("strong"));
    }

    #[test]
    fn empty_attrs_are_not_stored() {
        let marker = Marker::simple("hard_break").with_attrs(Some(&Attrs::new()));
        assert!(marker.attrs().is_none());
        assert!(!marker.properties.contains_key(ATTRS_KEY));
    }
}
