#![forbid(unsafe_code)]
//! Bridge between a tree-structured rich-text document and a flat collaborative sequence of
//! annotated text runs and structural markers.
//! The crate only computes translations; the editor surface and the sequence runtime are
//! reached through the traits in [`traits`], so any host that can satisfy them can embed it.

pub mod applier;
pub mod coordinator;
pub mod error;
pub mod node;
pub mod ops;
pub mod schema;
pub mod segment;
pub mod traits;
pub mod translator;
pub mod walker;

pub use applier::DeltaAccumulator;
pub use coordinator::{ChangeCoordinator, CoordinatorState, EditOrigin, LocalEdit, LocalOutcome};
pub use error::{Error, Result};
pub use node::{Marks, Node};
pub use ops::{
    ChangeBatch, DeltaOp, Mark, Origin, PlacedSegment, Primitive, SequenceDelta, SequenceEvent,
    Slice, Step, TreeEdit, ValueChange,
};
pub use schema::{NodeKind, NodeSpec, Schema, SchemaConfig};
pub use segment::{
    is_cleared, is_reserved_key, Attrs, Marker, Properties, ReferenceType, Segment, CLEARED,
};
pub use traits::{
    EditorSurface, MemoryEditor, MemorySequence, SequenceRuntime, Subscription,
    SubscriptionSender,
};
pub use translator::Translator;
pub use walker::SegmentWalker;
