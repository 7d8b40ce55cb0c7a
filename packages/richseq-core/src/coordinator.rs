//! Single-threaded change coordinator.
//!
//! Local edits are translated and submitted immediately while the coordinator is idle.
//! Remote transactions are accumulated from start to end and flushed as a single tree
//! edit. Local edits issued while a remote transaction is open are queued and replayed,
//! in order, once the flush completes, with their positions mapped over the flushed edit.

use std::collections::VecDeque;

use serde_json::Value;
use tracing::{debug, warn};

use crate::applier::DeltaAccumulator;
use crate::error::{Error, Result};
use crate::node::Node;
use crate::ops::{ChangeBatch, Origin, SequenceDelta, SequenceEvent, Step, ValueChange};
use crate::schema::Schema;
use crate::traits::{EditorSurface, SequenceRuntime, Subscription};
use crate::translator::Translator;
use crate::walker::SegmentWalker;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CoordinatorState {
    Idle,
    AccumulatingRemote,
}

/// Where a tree edit came from. Sequence-originated edits are never translated back.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EditOrigin {
    User,
    Sequence,
}

/// Span `[from, to)` of the pre-transaction tree replaced by a flushed remote edit, which now
/// holds `size` positions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct RemoteSpan {
    from: usize,
    to: usize,
    size: usize,
}

impl RemoteSpan {
    fn offset(&self) -> isize {
        self.size as isize - (self.to - self.from) as isize
    }

    /// Map a queued step onto the tree after the remote edit. Steps overlapping the span
    /// cannot be placed.
    fn map_step(&self, step: &Step) -> Result<Step> {
        let (from, to) = step.range();
        if from >= self.to {
            step.shifted(self.offset())
                .ok_or_else(|| Error::InvalidState("queued step maps before the start".into()))
        } else if to <= self.from {
            Ok(step.clone())
        } else {
            Err(Error::InvalidState(format!(
                "queued step {from}..{to} overlaps remote edit {}..{}",
                self.from, self.to
            )))
        }
    }

    /// Carry the span past a queued step that has been applied, in the step's unmapped
    /// coordinates.
    fn after_step(self, step: &Step, size_delta: isize) -> Result<Self> {
        let (from, to) = step.range();
        if from >= self.to || to > self.from {
            return Ok(self);
        }
        let shift = |pos: usize| {
            pos.checked_add_signed(size_delta)
                .ok_or_else(|| Error::InvalidState("remote edit maps before the start".into()))
        };
        Ok(Self {
            from: shift(self.from)?,
            to: shift(self.to)?,
            size: self.size,
        })
    }
}

/// A tree transaction reported by the editor surface.
#[derive(Clone, Debug, PartialEq)]
pub struct LocalEdit {
    pub steps: Vec<Step>,
    pub origin: EditOrigin,
}

impl LocalEdit {
    pub fn user(steps: Vec<Step>) -> Self {
        Self {
            steps,
            origin: EditOrigin::User,
        }
    }

    pub fn step(step: Step) -> Self {
        Self::user(vec![step])
    }

    pub fn from_sequence(steps: Vec<Step>) -> Self {
        Self {
            steps,
            origin: EditOrigin::Sequence,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LocalOutcome {
    /// Every step was applied; `batches` non-empty batches went to the sequence.
    Submitted { batches: usize },
    /// A remote transaction is open; the edit will be replayed after it flushes.
    Queued,
    /// Sequence-originated edit, dropped by the echo filter.
    Ignored,
}

pub struct ChangeCoordinator<S, E>
where
    S: SequenceRuntime,
    E: EditorSurface,
{
    schema: Schema,
    sequence: S,
    editor: E,
    subscription: Subscription,
    inbox: VecDeque<SequenceEvent>,
    accumulator: Option<DeltaAccumulator>,
    queued: VecDeque<LocalEdit>,
    // Steps whose local transaction has not been observed closing yet.
    in_flight: VecDeque<Step>,
}

impl<S, E> ChangeCoordinator<S, E>
where
    S: SequenceRuntime,
    E: EditorSurface,
{
    /// Subscribe to `sequence`, walk its content and open the editor on the result.
    pub fn load<F>(schema: Schema, mut sequence: S, open_editor: F) -> Result<Self>
    where
        F: FnOnce(&Schema, Node) -> E,
    {
        let subscription = sequence.subscribe();
        let segments = sequence.segments();
        let doc = SegmentWalker::new(&schema).walk(&segments)?;
        debug!(segments = segments.len(), "loaded document from sequence");
        let editor = open_editor(&schema, doc);
        Ok(Self {
            schema,
            sequence,
            editor,
            subscription,
            inbox: VecDeque::new(),
            accumulator: None,
            queued: VecDeque::new(),
            in_flight: VecDeque::new(),
        })
    }

    pub fn state(&self) -> CoordinatorState {
        if self.accumulator.is_some() {
            CoordinatorState::AccumulatingRemote
        } else {
            CoordinatorState::Idle
        }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn sequence(&self) -> &S {
        &self.sequence
    }

    pub fn editor(&self) -> &E {
        &self.editor
    }

    pub fn editor_mut(&mut self) -> &mut E {
        &mut self.editor
    }

    pub fn queued_len(&self) -> usize {
        self.queued.len()
    }

    /// Current document as editor JSON.
    pub fn value(&self) -> Result<Value> {
        Ok(serde_json::to_value(self.editor.current_doc())?)
    }

    /// Swap in a new schema. Existing tags must keep their classification. The editor
    /// switches to the same schema.
    pub fn replace_schema(&mut self, next: Schema) -> Result<()> {
        self.schema.ensure_compatible(&next)?;
        self.schema = next;
        self.editor.schema_changed(&self.schema);
        debug!(root = self.schema.root(), "replaced schema");
        Ok(())
    }

    /// Handle a transaction from the editor surface.
    pub fn apply_local(&mut self, edit: LocalEdit) -> Result<LocalOutcome> {
        if edit.origin == EditOrigin::Sequence {
            return Ok(LocalOutcome::Ignored);
        }
        if self.accumulator.is_some() {
            debug!(steps = edit.steps.len(), "queued local edit during remote transaction");
            self.queued.push_back(edit);
            return Ok(LocalOutcome::Queued);
        }

        let batches = self.submit_steps(edit.steps, None)?;
        Ok(LocalOutcome::Submitted { batches })
    }

    /// Replace the whole document with `value`, as one local edit.
    pub fn initialize_value(&mut self, value: &Node) -> Result<()> {
        if self.accumulator.is_some() {
            return Err(Error::InvalidState(
                "cannot initialize value during a remote transaction".into(),
            ));
        }
        let current = self.editor.current_doc();
        let (step, batch) = Translator::new(&self.schema).initialize_value(&current, value)?;
        self.submit_step(step, batch)?;
        Ok(())
    }

    /// Handle every pending event, including those raised while handling earlier ones.
    ///
    /// Returns the number of events handled. When an event fails, the events after it stay
    /// pending for the next call.
    pub fn pump(&mut self) -> Result<usize> {
        let mut handled = 0;
        while self.pump_next()? {
            handled += 1;
        }
        Ok(handled)
    }

    /// Handle the next pending event. Returns `false` when there was none.
    pub fn pump_next(&mut self) -> Result<bool> {
        self.inbox.extend(self.subscription.drain());
        match self.inbox.pop_front() {
            Some(event) => {
                self.handle_event(event)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn handle_event(&mut self, event: SequenceEvent) -> Result<()> {
        match event {
            SequenceEvent::TransactionStart { local: true } => Ok(()),
            SequenceEvent::TransactionEnd { local: true } => {
                let step = self.in_flight.pop_front();
                self.editor.value_changed(&ValueChange {
                    origin: Origin::Local,
                    step,
                });
                Ok(())
            }
            SequenceEvent::Delta(SequenceDelta { local: true, .. }) => Ok(()),
            SequenceEvent::TransactionStart { local: false } => {
                if self.accumulator.is_some() {
                    return Err(Error::InvalidState(
                        "remote transaction started while another is open".into(),
                    ));
                }
                self.accumulator = Some(DeltaAccumulator::new(self.editor.current_doc()));
                Ok(())
            }
            SequenceEvent::Delta(delta) => match self.accumulator.as_mut() {
                Some(accumulator) => {
                    accumulator.push(delta);
                    Ok(())
                }
                None => Err(Error::InvalidState(
                    "remote delta outside a transaction".into(),
                )),
            },
            SequenceEvent::TransactionEnd { local: false } => self.flush(),
        }
    }

    /// Close the open remote transaction: apply its tree edit, then replay queued local
    /// edits.
    ///
    /// On failure nothing is installed, the coordinator is idle again and queued edits stay
    /// queued.
    pub fn flush(&mut self) -> Result<()> {
        let accumulator = self
            .accumulator
            .take()
            .ok_or_else(|| Error::InvalidState("no remote transaction to flush".into()))?;
        let deltas = accumulator.len();
        let mut remote = None;
        match accumulator.build(&self.schema) {
            Ok(Some(edit)) => {
                debug!(
                    deltas,
                    from = edit.from,
                    to = edit.to,
                    nodes = edit.content.len(),
                    "flushing remote transaction"
                );
                if let Err(err) = self.editor.apply_tree_edit(&edit) {
                    warn!(error = %err, "editor rejected remote tree edit");
                    return Err(err);
                }
                let mut size = 0;
                for node in &edit.content {
                    size += node.node_size(&self.schema)?;
                }
                remote = Some(RemoteSpan {
                    from: edit.from,
                    to: edit.to,
                    size,
                });
            }
            Ok(None) => debug!(deltas, "remote transaction left the tree unchanged"),
            Err(err) => {
                warn!(error = %err, deltas, "dropping remote transaction");
                return Err(err);
            }
        }
        self.editor.value_changed(&ValueChange {
            origin: Origin::Remote,
            step: None,
        });
        self.replay(remote)
    }

    /// Replay local edits queued during a remote transaction at their original positions.
    /// An edit that fails is dropped.
    pub fn replay_queued(&mut self) -> Result<()> {
        self.replay(None)
    }

    fn replay(&mut self, mut remote: Option<RemoteSpan>) -> Result<()> {
        while self.accumulator.is_none() {
            let Some(edit) = self.queued.pop_front() else {
                break;
            };
            self.submit_steps(edit.steps, remote.as_mut())?;
        }
        Ok(())
    }

    /// Translate and submit steps in order. With a remote span, each step is first mapped
    /// over it. Returns the number of non-empty batches submitted.
    fn submit_steps(
        &mut self,
        steps: Vec<Step>,
        mut remote: Option<&mut RemoteSpan>,
    ) -> Result<usize> {
        let mut batches = 0;
        for original in steps {
            let step = match remote.as_deref() {
                Some(span) => span.map_step(&original)?,
                None => original.clone(),
            };
            let batch = Translator::new(&self.schema).translate(&step)?;
            let size_delta = batch.size_delta();
            if self.submit_step(step, batch)? {
                batches += 1;
            }
            if let Some(span) = remote.as_deref_mut() {
                *span = span.after_step(&original, size_delta)?;
            }
        }
        Ok(batches)
    }

    /// Replay `batch` over the editor's tree and check the result is a valid document.
    fn check_batch(&self, batch: &ChangeBatch) -> Result<()> {
        let current = self.editor.current_doc();
        let mut accumulator = DeltaAccumulator::new(current.clone());
        for op in batch.deltas() {
            accumulator.push(SequenceDelta { local: false, op });
        }
        if let Some(edit) = accumulator.build(&self.schema)? {
            let mut doc = current;
            doc.replace_range(&self.schema, edit.from, edit.to, edit.content)?;
        }
        Ok(())
    }

    /// Submit one step's batch and apply the step to the editor. Returns whether anything was
    /// submitted. A batch that would leave the sequence unreadable is never submitted.
    fn submit_step(&mut self, step: Step, batch: ChangeBatch) -> Result<bool> {
        if batch.is_empty() {
            self.editor.apply_step(&step)?;
            return Ok(false);
        }
        if let Err(err) = self.check_batch(&batch) {
            warn!(error = %err, "refusing change batch");
            return Err(err);
        }
        debug!(primitives = batch.len(), "submitting change batch");
        if let Err(err) = self.sequence.submit(&batch) {
            warn!(error = %err, "sequence rejected change batch");
            return Err(err);
        }
        self.editor.apply_step(&step)?;
        self.in_flight.push_back(step);
        Ok(true)
    }
}
