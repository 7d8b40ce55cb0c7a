use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("structural mismatch: expected `{expected}`, found `{found}`")]
    StructuralMismatch { expected: String, found: String },
    #[error("unbalanced markers: {open} nest(s) still open at end of sequence")]
    UnbalancedMarkers { open: usize },
    #[error("reserved key conflict: `{0}` cannot be used as a mark")]
    ReservedKeyConflict(String),
    #[error("unknown marker tag: `{0}`")]
    UnknownMarkerTag(String),
    #[error("tag `{tag}` reclassified from {from} to {to}")]
    TagReclassified {
        tag: String,
        from: String,
        to: String,
    },
    #[error("invalid step: {0}")]
    InvalidStep(String),
    #[error("invalid range {from}..{to} (size {size})")]
    InvalidRange { from: usize, to: usize, size: usize },
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("submit rejected: {0}")]
    Submit(String),
    #[error("config error: {0}")]
    Config(String),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}
