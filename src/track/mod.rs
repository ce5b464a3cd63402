//! Tracks: the unit the sequence builder operates on.
//!
//! Two kinds share one edit/playback contract ([`TrackOps`]):
//! - [`StepTrack`]: one cell per beat, each empty or a subdivision code
//! - [`EventTrack`]: freely timed note/control entries plus a quantize map
//!
//! Every mutator finishes by rebuilding the track's schedule from its raw
//! data, so the derived schedule is never observed out of date.

mod event;
mod import;
mod step;

pub use event::{Entry, EntryKind, EventTrack};
pub use step::StepTrack;

use serde::{Deserialize, Serialize};

use crate::error::LoadError;
use crate::midi::CHANNEL_PASSTHROUGH;
use crate::persist::TrackRecord;
use crate::playback::Schedule;
use crate::transport::{PortHandle, Transport};

/// Channel a track sends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "u16", into = "u16")]
pub enum OutputChannel {
    Fixed(u8),
    /// Replay each event on the channel it was recorded on
    PassThrough,
}

impl OutputChannel {
    /// Channel to use for an event recorded on `recorded`.
    pub fn apply(self, recorded: u8) -> u8 {
        match self {
            OutputChannel::Fixed(channel) => channel,
            OutputChannel::PassThrough => recorded,
        }
    }
}

impl Default for OutputChannel {
    fn default() -> Self {
        OutputChannel::Fixed(0)
    }
}

impl From<u16> for OutputChannel {
    fn from(value: u16) -> Self {
        if value >= CHANNEL_PASSTHROUGH {
            OutputChannel::PassThrough
        } else {
            OutputChannel::Fixed(value.min(15) as u8)
        }
    }
}

impl From<OutputChannel> for u16 {
    fn from(channel: OutputChannel) -> Self {
        match channel {
            OutputChannel::Fixed(channel) => u16::from(channel),
            OutputChannel::PassThrough => CHANNEL_PASSTHROUGH,
        }
    }
}

/// Edit and playback contract shared by both track kinds.
///
/// Edits that target positions outside the track are silent no-ops.
/// `time` arguments of live input are song positions in beats; `None`
/// sounds the note without recording anything.
pub trait TrackOps {
    fn name(&self) -> &str;

    fn set_name(&mut self, name: String);

    /// Length in beats.
    fn length(&self) -> usize;

    fn channel(&self) -> OutputChannel;

    /// Change the output channel. Stops sounding notes first.
    fn set_channel(&mut self, transport: &dyn Transport, channel: OutputChannel);

    /// Configured output port name.
    fn port_name(&self) -> &str;

    /// Port resolved by the last [`bind`](TrackOps::bind).
    fn port(&self) -> Option<PortHandle>;

    fn set_port_name(&mut self, transport: &dyn Transport, name: String);

    /// Resolve the configured port name against the transport's port table.
    fn bind(&mut self, transport: &dyn Transport);

    fn schedule(&self) -> &Schedule;

    /// One display glyph per beat.
    fn glyphs(&self) -> &[char];

    /// Change the length, repeating existing content to fill new space.
    fn resize(&mut self, transport: &dyn Transport, length: usize);

    fn quantize(&mut self, beat: usize, code: u8);

    /// Remove everything starting in `[beat, beat + 1)`.
    fn clear(&mut self, transport: &dyn Transport, beat: usize);

    /// Rotate content `delta` beats earlier, wrapping around the loop.
    fn shift(&mut self, delta: i64);

    fn transpose(&mut self, transport: &dyn Transport, semitones: i32);

    fn note_on(
        &mut self,
        transport: &dyn Transport,
        time: Option<f64>,
        channel: u8,
        note: u8,
        velocity: u8,
    );

    fn note_off(&mut self, transport: &dyn Transport, time: Option<f64>, channel: u8, note: u8);

    /// Send every scheduled event in `[prev, curr)`, modulo the track length.
    fn play_range(&self, transport: &dyn Transport, prev: f64, curr: f64) {
        let Some(port) = self.port() else {
            return;
        };
        let (tail, head) = self.schedule().due(prev, curr, self.length() as f64);
        for event in tail.iter().chain(head) {
            event.dispatch(transport, port);
        }
    }

    /// Send a note-off for every note this track can have sounding.
    fn stop(&self, transport: &dyn Transport) {
        let Some(port) = self.port() else {
            return;
        };
        for (note, channel) in self.schedule().sounding_notes() {
            transport.send_note_off(port, note, channel);
        }
    }
}

/// A track of either kind.
#[derive(Debug, Clone)]
pub enum Track {
    Step(StepTrack),
    Event(EventTrack),
}

impl Track {
    pub fn as_ops(&self) -> &dyn TrackOps {
        match self {
            Track::Step(track) => track,
            Track::Event(track) => track,
        }
    }

    pub fn as_ops_mut(&mut self) -> &mut dyn TrackOps {
        match self {
            Track::Step(track) => track,
            Track::Event(track) => track,
        }
    }

    /// Full structural dump. Never includes the derived schedule.
    pub fn dump(&self) -> TrackRecord {
        match self {
            Track::Step(track) => TrackRecord::Step(track.dump()),
            Track::Event(track) => TrackRecord::Event(track.dump()),
        }
    }

    /// Build a track from a record and bind it to the transport.
    pub fn from_record(record: &TrackRecord, transport: &dyn Transport) -> Result<Self, LoadError> {
        let mut track = match record {
            TrackRecord::Step(record) => Track::Step(StepTrack::from_record(record)?),
            TrackRecord::Event(record) => Track::Event(EventTrack::from_record(record)?),
        };
        track.bind(transport);
        Ok(track)
    }

    /// Replace this track's content with a record. On error nothing changes.
    pub fn load(&mut self, record: &TrackRecord, transport: &dyn Transport) -> Result<(), LoadError> {
        let track = Track::from_record(record, transport)?;
        self.stop(transport);
        *self = track;
        Ok(())
    }

    /// Copy through the dump representation, so the schedule is rebuilt.
    pub fn duplicate(&self, transport: &dyn Transport) -> Result<Self, LoadError> {
        Track::from_record(&self.dump(), transport)
    }
}

impl TrackOps for Track {
    fn name(&self) -> &str {
        self.as_ops().name()
    }

    fn set_name(&mut self, name: String) {
        self.as_ops_mut().set_name(name)
    }

    fn length(&self) -> usize {
        self.as_ops().length()
    }

    fn channel(&self) -> OutputChannel {
        self.as_ops().channel()
    }

    fn set_channel(&mut self, transport: &dyn Transport, channel: OutputChannel) {
        self.as_ops_mut().set_channel(transport, channel)
    }

    fn port_name(&self) -> &str {
        self.as_ops().port_name()
    }

    fn port(&self) -> Option<PortHandle> {
        self.as_ops().port()
    }

    fn set_port_name(&mut self, transport: &dyn Transport, name: String) {
        self.as_ops_mut().set_port_name(transport, name)
    }

    fn bind(&mut self, transport: &dyn Transport) {
        self.as_ops_mut().bind(transport)
    }

    fn schedule(&self) -> &Schedule {
        self.as_ops().schedule()
    }

    fn glyphs(&self) -> &[char] {
        self.as_ops().glyphs()
    }

    fn resize(&mut self, transport: &dyn Transport, length: usize) {
        self.as_ops_mut().resize(transport, length)
    }

    fn quantize(&mut self, beat: usize, code: u8) {
        self.as_ops_mut().quantize(beat, code)
    }

    fn clear(&mut self, transport: &dyn Transport, beat: usize) {
        self.as_ops_mut().clear(transport, beat)
    }

    fn shift(&mut self, delta: i64) {
        self.as_ops_mut().shift(delta)
    }

    fn transpose(&mut self, transport: &dyn Transport, semitones: i32) {
        self.as_ops_mut().transpose(transport, semitones)
    }

    fn note_on(
        &mut self,
        transport: &dyn Transport,
        time: Option<f64>,
        channel: u8,
        note: u8,
        velocity: u8,
    ) {
        self.as_ops_mut()
            .note_on(transport, time, channel, note, velocity)
    }

    fn note_off(&mut self, transport: &dyn Transport, time: Option<f64>, channel: u8, note: u8) {
        self.as_ops_mut().note_off(transport, time, channel, note)
    }
}

/// Resolve a port name, logging misses.
pub(crate) fn resolve_port(transport: &dyn Transport, track: &str, name: &str) -> Option<PortHandle> {
    let port = transport.resolve(name);
    if port.is_none() && !name.is_empty() {
        tracing::debug!(track, port = name, "Output port not available");
    }
    port
}
