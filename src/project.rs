//! Projects: patterns arranged into a song by a play sequence.
//!
//! The play sequence is flattened into a timeline of `[start, end)` slots in
//! song beats. Playback maps a song window onto those slots and hands each
//! overlapping piece to its pattern in pattern-local time.

use std::collections::HashSet;

use parking_lot::Mutex;
use tracing::debug;

use crate::error::LoadError;
use crate::pattern::{Pattern, PatternId, DEFAULT_LENGTH};
use crate::persist::ProjectRecord;
use crate::playback::{wrap_time, Playable};
use crate::transport::Transport;

/// Lowest and highest accepted tempo in BPM.
pub const MIN_TEMPO: f64 = 20.0;
pub const MAX_TEMPO: f64 = 400.0;
/// Tempo used when a requested one is not a number.
pub const DEFAULT_TEMPO: f64 = 120.0;

/// One play-sequence entry placed on the song timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    pub start: usize,
    pub end: usize,
    /// Index into the project's pattern list
    pub pattern: usize,
}

#[derive(Debug)]
pub struct Project {
    name: String,
    tempo: f64,
    patterns: Vec<Pattern>,
    play_sequence: Vec<PatternId>,
    timeline: Vec<Slot>,
    /// Pattern that received the last delivered window
    active: Mutex<Option<PatternId>>,
}

impl Project {
    pub fn new(name: &str, tempo: f64) -> Self {
        let mut project = Self {
            name: name.to_string(),
            tempo: DEFAULT_TEMPO,
            patterns: Vec::new(),
            play_sequence: Vec::new(),
            timeline: Vec::new(),
            active: Mutex::new(None),
        };
        project.set_tempo(tempo);
        project
    }

    /// A project with one default pattern, already in the play sequence.
    pub fn empty(name: &str, tempo: f64, port_name: &str) -> Self {
        let pattern = Pattern::empty("Untitled", DEFAULT_LENGTH, port_name);
        let mut project = Self::new(name, tempo);
        project.play_sequence.push(pattern.id().clone());
        project.patterns.push(pattern);
        project.rebuild_sequence();
        project
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: String) {
        self.name = name;
    }

    pub fn tempo(&self) -> f64 {
        self.tempo
    }

    /// Set the tempo, clamped to the accepted range. Non-finite values are ignored.
    pub fn set_tempo(&mut self, bpm: f64) {
        if bpm.is_finite() {
            self.tempo = bpm.clamp(MIN_TEMPO, MAX_TEMPO);
        }
    }

    pub fn patterns(&self) -> &[Pattern] {
        &self.patterns
    }

    pub fn pattern(&self, id: &PatternId) -> Option<&Pattern> {
        self.patterns.iter().find(|p| p.id() == id)
    }

    pub fn pattern_index(&self, id: &PatternId) -> Option<usize> {
        self.patterns.iter().position(|p| p.id() == id)
    }

    pub fn play_sequence(&self) -> &[PatternId] {
        &self.play_sequence
    }

    pub fn timeline(&self) -> &[Slot] {
        &self.timeline
    }

    /// Song length in beats.
    pub fn total_length(&self) -> usize {
        self.timeline.last().map_or(0, |slot| slot.end)
    }

    /// Pattern playing at a song position, and the position inside it.
    pub fn locate(&self, time: f64) -> Option<(&Pattern, f64)> {
        let total = self.total_length();
        if total == 0 || !time.is_finite() {
            return None;
        }
        let time = wrap_time(time, total as f64);
        let slot = self
            .timeline
            .iter()
            .find(|slot| time < slot.end as f64)?;
        Some((&self.patterns[slot.pattern], time - slot.start as f64))
    }

    /// Recompute the timeline from the play sequence and pattern lengths.
    /// Sequence entries naming a missing pattern are dropped.
    pub fn rebuild_sequence(&mut self) {
        let patterns = &self.patterns;
        self.play_sequence
            .retain(|id| patterns.iter().any(|p| p.id() == id));

        let mut timeline = Vec::with_capacity(self.play_sequence.len());
        let mut start = 0;
        for id in &self.play_sequence {
            let Some(index) = patterns.iter().position(|p| p.id() == id) else {
                continue;
            };
            let end = start + patterns[index].length();
            timeline.push(Slot {
                start,
                end,
                pattern: index,
            });
            start = end;
        }
        self.timeline = timeline;
    }

    /// Add a pattern at the end of the pattern list, giving it a fresh id
    /// if its id is already taken. Returns its id.
    pub fn add_pattern(&mut self, transport: &dyn Transport, mut pattern: Pattern) -> PatternId {
        if self.pattern(pattern.id()).is_some() {
            pattern.regenerate_id();
        }
        pattern.bind(transport);
        let id = pattern.id().clone();
        self.patterns.push(pattern);
        id
    }

    /// Remove a pattern and every play-sequence slot that refers to it.
    pub fn remove_pattern(&mut self, transport: &dyn Transport, id: &PatternId) -> Option<Pattern> {
        let index = self.pattern_index(id)?;
        let pattern = self.patterns.remove(index);
        pattern.stop(transport);
        self.play_sequence.retain(|slot| slot != id);
        let mut active = self.active.lock();
        if active.as_ref() == Some(id) {
            *active = None;
        }
        drop(active);
        self.rebuild_sequence();
        Some(pattern)
    }

    /// Copy a pattern under a fresh id and an unused "<name> (n)" name,
    /// inserted right after the original.
    pub fn duplicate_pattern(&mut self, transport: &dyn Transport, id: &PatternId) -> Option<PatternId> {
        let index = self.pattern_index(id)?;
        let source = &self.patterns[index];
        let names: HashSet<&str> = self.patterns.iter().map(|p| p.name()).collect();
        let name = (1..)
            .map(|n| format!("{} ({})", source.name(), n))
            .find(|name| !names.contains(name.as_str()))
            .unwrap_or_default();

        match source.duplicate(transport, name) {
            Ok(copy) => {
                let copy_id = copy.id().clone();
                self.patterns.insert(index + 1, copy);
                self.rebuild_sequence();
                Some(copy_id)
            }
            Err(e) => {
                tracing::warn!("Could not duplicate pattern {}: {}", id, e);
                None
            }
        }
    }

    /// Swap a pattern with its neighbour `delta` places away, wrapping around.
    pub fn move_pattern(&mut self, index: usize, delta: i64) -> Option<usize> {
        let target = cyclic_target(index, delta, self.patterns.len())?;
        self.patterns.swap(index, target);
        self.rebuild_sequence();
        Some(target)
    }

    /// Replace the whole play sequence. Unknown ids are dropped.
    pub fn set_play_sequence(&mut self, ids: Vec<PatternId>) {
        self.play_sequence = ids;
        self.rebuild_sequence();
    }

    /// Append a slot. Returns false if the pattern does not exist.
    pub fn push_slot(&mut self, id: PatternId) -> bool {
        if self.pattern(&id).is_none() {
            debug!("Ignoring play sequence slot for unknown pattern {}", id);
            return false;
        }
        self.play_sequence.push(id);
        self.rebuild_sequence();
        true
    }

    pub fn remove_slot(&mut self, index: usize) -> Option<PatternId> {
        if index >= self.play_sequence.len() {
            return None;
        }
        let id = self.play_sequence.remove(index);
        self.rebuild_sequence();
        Some(id)
    }

    pub fn move_slot(&mut self, index: usize, delta: i64) -> Option<usize> {
        let target = cyclic_target(index, delta, self.play_sequence.len())?;
        self.play_sequence.swap(index, target);
        self.rebuild_sequence();
        Some(target)
    }

    /// Edit one pattern in place, then rebuild the timeline in case its
    /// length changed.
    pub fn edit_pattern<R>(&mut self, id: &PatternId, f: impl FnOnce(&mut Pattern) -> R) -> Option<R> {
        let pattern = self.patterns.iter_mut().find(|p| p.id() == id)?;
        let result = f(pattern);
        self.rebuild_sequence();
        Some(result)
    }

    pub fn dump(&self) -> ProjectRecord {
        ProjectRecord {
            name: self.name.clone(),
            tempo: self.tempo,
            patterns: self.patterns.iter().map(Pattern::dump).collect(),
            play_sequence: self.play_sequence.iter().map(|id| id.to_string()).collect(),
        }
    }

    /// Build and bind a project. Pattern ids must be unique and the play
    /// sequence must only name existing patterns.
    pub fn from_record(record: &ProjectRecord, transport: &dyn Transport) -> Result<Self, LoadError> {
        let patterns = record
            .patterns
            .iter()
            .map(|p| Pattern::from_record(p, transport))
            .collect::<Result<Vec<_>, _>>()?;

        let mut seen = HashSet::new();
        for pattern in &patterns {
            if !seen.insert(pattern.id()) {
                return Err(LoadError::DuplicatePattern(pattern.id().to_string()));
            }
        }

        let play_sequence = record
            .play_sequence
            .iter()
            .map(|id| {
                let id = PatternId::from(id.as_str());
                if seen.contains(&id) {
                    Ok(id)
                } else {
                    Err(LoadError::UnknownPattern(id.to_string()))
                }
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut project = Self::new(&record.name, record.tempo);
        project.patterns = patterns;
        project.play_sequence = play_sequence;
        project.rebuild_sequence();
        Ok(project)
    }

    /// Replace the whole project. On error nothing changes.
    pub fn load(&mut self, record: &ProjectRecord, transport: &dyn Transport) -> Result<(), LoadError> {
        let project = Project::from_record(record, transport)?;
        self.mute(transport);
        *self = project;
        Ok(())
    }

    /// Deliver `[start, end)` of song time, which must not wrap.
    fn deliver(&self, transport: &dyn Transport, start: f64, end: f64) {
        for slot in &self.timeline {
            let slot_start = slot.start as f64;
            let slot_end = slot.end as f64;
            if slot_start >= end {
                break;
            }
            if slot_end <= start {
                continue;
            }
            let play_start = start.max(slot_start);
            let play_end = end.min(slot_end);
            if play_start >= play_end {
                continue;
            }

            let pattern = &self.patterns[slot.pattern];
            let mut active = self.active.lock();
            if let Some(previous) = active.as_ref().filter(|id| *id != pattern.id()) {
                if let Some(previous) = self.pattern(previous) {
                    previous.stop(transport);
                }
            }
            *active = Some(pattern.id().clone());
            drop(active);

            pattern.play_range(transport, play_start - slot_start, play_end - slot_start);
        }
    }
}

impl Playable for Project {
    /// Play the song window `[prev, curr)`, looping over the whole timeline.
    fn play_range(&self, transport: &dyn Transport, prev: f64, curr: f64) {
        let total = self.total_length() as f64;
        if total == 0.0 || !prev.is_finite() || !curr.is_finite() || prev == curr {
            return;
        }
        let start = wrap_time(prev, total);
        if curr - prev >= total {
            // One full pass, starting where the window starts
            self.deliver(transport, start, total);
            self.deliver(transport, 0.0, start);
            return;
        }
        let end = wrap_time(curr, total);
        if start < end {
            self.deliver(transport, start, end);
        } else {
            self.deliver(transport, start, total);
            self.deliver(transport, 0.0, end);
        }
    }

    fn mute(&self, transport: &dyn Transport) {
        for pattern in &self.patterns {
            pattern.stop(transport);
        }
        *self.active.lock() = None;
    }

    fn bind(&mut self, transport: &dyn Transport) {
        for pattern in &mut self.patterns {
            pattern.bind(transport);
        }
    }
}

fn cyclic_target(index: usize, delta: i64, count: usize) -> Option<usize> {
    if index >= count {
        return None;
    }
    Some((index as i64 + delta).rem_euclid(count as i64) as usize)
}
