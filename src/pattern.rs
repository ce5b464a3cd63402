//! Patterns: a named set of tracks that loop together.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::LoadError;
use crate::persist::PatternRecord;
use crate::playback::Playable;
use crate::track::{EventTrack, OutputChannel, StepTrack, Track, TrackOps};
use crate::transport::Transport;

/// Default pattern length in beats.
pub const DEFAULT_LENGTH: usize = 16;

/// Stable identifier a play sequence refers to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PatternId(String);

impl PatternId {
    /// Short random id, unique enough for one project.
    pub fn generate() -> Self {
        let id = Uuid::new_v4().simple().to_string();
        PatternId(id[..8].to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for PatternId {
    fn from(id: &str) -> Self {
        PatternId(id.to_string())
    }
}

impl fmt::Display for PatternId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone)]
pub struct Pattern {
    id: PatternId,
    name: String,
    length: usize,
    tracks: Vec<Track>,
}

impl Pattern {
    pub fn new(name: &str, length: usize) -> Self {
        Self {
            id: PatternId::generate(),
            name: name.to_string(),
            length,
            tracks: Vec::new(),
        }
    }

    /// A fresh pattern with the default kit: three drum steps, bass and melody.
    pub fn empty(name: &str, length: usize, port_name: &str) -> Self {
        let drum = |name, note| Track::Step(StepTrack::new(name, length, port_name, OutputChannel::Fixed(15), note));
        let keys = |name, channel| Track::Event(EventTrack::new(name, length, port_name, OutputChannel::Fixed(channel)));
        Self {
            tracks: vec![
                drum("Hi Hat", 44),
                drum("Snare", 38),
                drum("Drum", 37),
                keys("Bass", 0),
                keys("Melody", 1),
            ],
            ..Self::new(name, length)
        }
    }

    pub fn id(&self) -> &PatternId {
        &self.id
    }

    pub(crate) fn regenerate_id(&mut self) {
        self.id = PatternId::generate();
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: String) {
        self.name = name;
    }

    pub fn length(&self) -> usize {
        self.length
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn track(&self, index: usize) -> Option<&Track> {
        self.tracks.get(index)
    }

    /// Direct access for track edits. Lengths change only through
    /// [`Pattern::resize`].
    pub fn track_mut(&mut self, index: usize) -> Option<&mut Track> {
        self.tracks.get_mut(index)
    }

    /// Stop every track, then resize them all in lock step.
    pub fn resize(&mut self, transport: &dyn Transport, length: usize) {
        if length == 0 {
            return;
        }
        for track in &mut self.tracks {
            track.stop(transport);
            track.resize(transport, length);
        }
        self.length = length;
    }

    /// Append a track, bringing it to the pattern length first.
    pub fn add_track(&mut self, transport: &dyn Transport, mut track: Track) {
        if track.length() != self.length {
            track.resize(transport, self.length);
        }
        track.bind(transport);
        self.tracks.push(track);
    }

    /// Remove and return a track, silencing it first.
    pub fn remove_track(&mut self, transport: &dyn Transport, index: usize) -> Option<Track> {
        if index >= self.tracks.len() {
            return None;
        }
        let track = self.tracks.remove(index);
        track.stop(transport);
        Some(track)
    }

    /// Swap a track with its neighbour `delta` places away, wrapping around.
    /// Returns the track's new index.
    pub fn move_track(&mut self, index: usize, delta: i64) -> Option<usize> {
        let count = self.tracks.len();
        if index >= count {
            return None;
        }
        let target = (index as i64 + delta).rem_euclid(count as i64) as usize;
        self.tracks.swap(index, target);
        Some(target)
    }

    /// Insert a copy of a track right after it. Returns the copy's index.
    pub fn duplicate_track(&mut self, transport: &dyn Transport, index: usize) -> Option<usize> {
        let track = self.tracks.get(index)?;
        match track.duplicate(transport) {
            Ok(copy) => {
                self.tracks.insert(index + 1, copy);
                Some(index + 1)
            }
            Err(e) => {
                tracing::warn!("Could not duplicate track {}: {}", track.name(), e);
                None
            }
        }
    }

    pub fn stop(&self, transport: &dyn Transport) {
        for track in &self.tracks {
            track.stop(transport);
        }
    }

    pub fn dump(&self) -> PatternRecord {
        PatternRecord {
            id: self.id.to_string(),
            name: self.name.clone(),
            length: self.length,
            tracks: self.tracks.iter().map(Track::dump).collect(),
        }
    }

    /// Build and bind a pattern. Every track must match the pattern length.
    pub fn from_record(record: &PatternRecord, transport: &dyn Transport) -> Result<Self, LoadError> {
        if record.length == 0 {
            return Err(LoadError::ZeroLength {
                what: format!("pattern '{}'", record.name),
            });
        }
        let tracks = record
            .tracks
            .iter()
            .map(|track| {
                let track = Track::from_record(track, transport)?;
                if track.length() != record.length {
                    return Err(LoadError::TrackLength {
                        track: track.name().to_string(),
                        found: track.length(),
                        length: record.length,
                    });
                }
                Ok(track)
            })
            .collect::<Result<Vec<_>, _>>()?;

        let id = if record.id.is_empty() {
            PatternId::generate()
        } else {
            PatternId(record.id.clone())
        };
        Ok(Self {
            id,
            name: record.name.clone(),
            length: record.length,
            tracks,
        })
    }

    /// Replace the whole pattern. On error nothing changes.
    pub fn load(&mut self, record: &PatternRecord, transport: &dyn Transport) -> Result<(), LoadError> {
        let pattern = Pattern::from_record(record, transport)?;
        self.stop(transport);
        *self = pattern;
        Ok(())
    }

    /// Deep copy with a fresh id.
    pub(crate) fn duplicate(&self, transport: &dyn Transport, name: String) -> Result<Self, LoadError> {
        let mut copy = Pattern::from_record(&self.dump(), transport)?;
        copy.regenerate_id();
        copy.name = name;
        Ok(copy)
    }
}

impl Playable for Pattern {
    fn play_range(&self, transport: &dyn Transport, prev: f64, curr: f64) {
        for track in &self.tracks {
            track.play_range(transport, prev, curr);
        }
    }

    fn mute(&self, transport: &dyn Transport) {
        self.stop(transport);
    }

    fn bind(&mut self, transport: &dyn Transport) {
        for track in &mut self.tracks {
            track.bind(transport);
        }
    }
}
