//! Undo/redo over structural snapshots.
//!
//! A snapshot is the same record the state persists as, so an undo step is a
//! load. Snapshots are owned copies: nothing in the history aliases live state.

use crate::error::LoadError;
use crate::pattern::Pattern;
use crate::persist::{PatternRecord, ProjectRecord, TrackRecord};
use crate::project::Project;
use crate::track::Track;
use crate::transport::Transport;

/// Fewest snapshots a capped history keeps.
pub const MIN_HISTORY: usize = 2;

/// State that can be dumped to and restored from a record.
pub trait Snapshot {
    type Record: Clone + PartialEq;

    fn snapshot(&self) -> Self::Record;

    /// Replace the state with `record`. On error the state is unchanged.
    fn restore(&mut self, record: &Self::Record, transport: &dyn Transport) -> Result<(), LoadError>;
}

impl Snapshot for Track {
    type Record = TrackRecord;

    fn snapshot(&self) -> TrackRecord {
        self.dump()
    }

    fn restore(&mut self, record: &TrackRecord, transport: &dyn Transport) -> Result<(), LoadError> {
        self.load(record, transport)
    }
}

impl Snapshot for Pattern {
    type Record = PatternRecord;

    fn snapshot(&self) -> PatternRecord {
        self.dump()
    }

    fn restore(&mut self, record: &PatternRecord, transport: &dyn Transport) -> Result<(), LoadError> {
        self.load(record, transport)
    }
}

impl Snapshot for Project {
    type Record = ProjectRecord;

    fn snapshot(&self) -> ProjectRecord {
        self.dump()
    }

    fn restore(&mut self, record: &ProjectRecord, transport: &dyn Transport) -> Result<(), LoadError> {
        self.load(record, transport)
    }
}

/// Undo stack whose top is the current state, plus a redo stack.
#[derive(Debug, Clone)]
pub struct UndoHistory<R> {
    undo: Vec<R>,
    redo: Vec<R>,
    limit: Option<usize>,
}

impl<R: Clone + PartialEq> Default for UndoHistory<R> {
    fn default() -> Self {
        Self::new(None)
    }
}

impl<R: Clone + PartialEq> UndoHistory<R> {
    /// `limit` caps the undo stack; values below [`MIN_HISTORY`] are raised.
    pub fn new(limit: Option<usize>) -> Self {
        Self {
            undo: Vec::new(),
            redo: Vec::new(),
            limit: limit.map(|limit| limit.max(MIN_HISTORY)),
        }
    }

    pub fn len(&self) -> usize {
        self.undo.len()
    }

    pub fn is_empty(&self) -> bool {
        self.undo.is_empty()
    }

    pub fn redo_len(&self) -> usize {
        self.redo.len()
    }

    pub fn can_undo(&self) -> bool {
        self.undo.len() > 1
    }

    pub fn clear(&mut self) {
        self.undo.clear();
        self.redo.clear();
    }

    /// Record the current state unless it equals the last snapshot.
    /// Returns whether a snapshot was added.
    pub fn push<T: Snapshot<Record = R>>(&mut self, target: &T) -> bool {
        let record = target.snapshot();
        if self.undo.last() == Some(&record) {
            return false;
        }
        self.undo.push(record);
        self.redo.clear();
        if let Some(limit) = self.limit {
            let excess = self.undo.len().saturating_sub(limit);
            self.undo.drain(..excess);
        }
        true
    }

    /// Drop the newest snapshot and restore the one before it.
    /// Returns `Ok(false)` when there is nothing to undo.
    pub fn pop_undo<T: Snapshot<Record = R>>(
        &mut self,
        target: &mut T,
        transport: &dyn Transport,
    ) -> Result<bool, LoadError> {
        if !self.can_undo() {
            return Ok(false);
        }
        let previous = &self.undo[self.undo.len() - 2];
        target.restore(previous, transport)?;
        if let Some(newest) = self.undo.pop() {
            self.redo.push(newest);
        }
        Ok(true)
    }

    /// Re-apply the most recently undone snapshot.
    pub fn redo<T: Snapshot<Record = R>>(
        &mut self,
        target: &mut T,
        transport: &dyn Transport,
    ) -> Result<bool, LoadError> {
        let Some(next) = self.redo.last() else {
            return Ok(false);
        };
        target.restore(next, transport)?;
        if let Some(next) = self.redo.pop() {
            self.undo.push(next);
        }
        Ok(true)
    }
}
