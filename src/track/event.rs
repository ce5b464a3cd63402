use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::LoadError;
use crate::persist::EventTrackRecord;
use crate::playback::{wrap_time, Schedule};
use crate::quantize::{self, Built, MAX_SUBDIVISION};
use crate::transport::{PortHandle, Transport};

use super::{resolve_port, OutputChannel, TrackOps};

/// Kind of a recorded entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    /// Note with an optional paired release
    #[default]
    Note,
    PitchBend,
    /// Controller change; `note` holds the controller number
    Control,
}

/// One raw recorded event.
///
/// `time_off` is only set on notes and pairs with the same `note` and
/// `channel`. For notes `value` is the velocity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    #[serde(rename = "on")]
    pub time_on: f64,
    #[serde(rename = "off", default, skip_serializing_if = "Option::is_none")]
    pub time_off: Option<f64>,
    #[serde(default)]
    pub channel: u8,
    #[serde(default)]
    pub note: u8,
    pub value: i32,
    #[serde(default)]
    pub kind: EntryKind,
}

impl Entry {
    pub fn note(time_on: f64, time_off: Option<f64>, channel: u8, note: u8, velocity: u8) -> Self {
        Self {
            time_on,
            time_off,
            channel,
            note,
            value: i32::from(velocity),
            kind: EntryKind::Note,
        }
    }

    pub fn pitch_bend(time: f64, channel: u8, value: i32) -> Self {
        Self {
            time_on: time,
            time_off: None,
            channel,
            note: 0,
            value,
            kind: EntryKind::PitchBend,
        }
    }

    pub fn control(time: f64, channel: u8, param: u8, value: u8) -> Self {
        Self {
            time_on: time,
            time_off: None,
            channel,
            note: param,
            value: i32::from(value),
            kind: EntryKind::Control,
        }
    }
}

/// Truncate a recorded time to microsecond precision.
fn ntime(time: f64) -> f64 {
    (time * 1_000_000.0).trunc() / 1_000_000.0
}

/// Freely timed track recorded from live input.
#[derive(Debug, Clone)]
pub struct EventTrack {
    name: String,
    port_name: String,
    port: Option<PortHandle>,
    channel: OutputChannel,
    length: usize,
    entries: Vec<Entry>,
    /// Quantize code per beat, 0 = play as recorded
    quantize: Vec<u8>,
    /// Open entry of each held note, keyed by the live (channel, note)
    held: HashMap<(u8, u8), Held>,
    built: Built,
}

/// Where a held note's open entry sits; `note` follows transposition.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Held {
    time_on: f64,
    note: u8,
}

impl EventTrack {
    pub fn new(name: &str, length: usize, port_name: &str, channel: OutputChannel) -> Self {
        Self::with_entries(name, length, port_name, channel, Vec::new())
    }

    pub fn with_entries(
        name: &str,
        length: usize,
        port_name: &str,
        channel: OutputChannel,
        entries: Vec<Entry>,
    ) -> Self {
        let mut track = Self {
            name: name.to_string(),
            port_name: port_name.to_string(),
            port: None,
            channel,
            length,
            entries,
            quantize: vec![0; length],
            held: HashMap::new(),
            built: Built::default(),
        };
        track.rebuild();
        track
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn quantize_map(&self) -> &[u8] {
        &self.quantize
    }

    fn rebuild(&mut self) {
        self.built =
            quantize::build_event_schedule(&self.entries, &self.quantize, self.length, self.channel);
    }

    /// Position inside the track for a song time, or `None` for previews.
    fn record_time(&self, time: Option<f64>) -> Option<f64> {
        let time = time.filter(|t| t.is_finite())?;
        if self.length == 0 {
            return None;
        }
        Some(ntime(wrap_time(time, self.length as f64)))
    }

    /// True for the still-open entry of a note being held down.
    fn is_held(&self, entry: &Entry) -> bool {
        entry.kind == EntryKind::Note
            && entry.time_off.is_none()
            && self.held.iter().any(|(&(channel, _), held)| {
                channel == entry.channel
                    && held.time_on == entry.time_on
                    && held.note == entry.note
            })
    }

    pub fn pitch_bend(&mut self, transport: &dyn Transport, time: Option<f64>, value: i32, channel: u8) {
        if let Some(port) = self.port {
            transport.send_pitch_bend(port, value, self.channel.apply(channel));
        }
        if let Some(time) = self.record_time(time) {
            self.entries.push(Entry::pitch_bend(time, channel, value));
            self.rebuild();
        }
    }

    pub fn control(
        &mut self,
        transport: &dyn Transport,
        time: Option<f64>,
        value: u8,
        param: u8,
        channel: u8,
    ) {
        if let Some(port) = self.port {
            transport.send_control_change(port, value, param, self.channel.apply(channel));
        }
        if let Some(time) = self.record_time(time) {
            self.entries.push(Entry::control(time, channel, param, value));
            self.rebuild();
        }
    }

    pub(crate) fn dump(&self) -> EventTrackRecord {
        EventTrackRecord {
            name: self.name.clone(),
            port_name: self.port_name.clone(),
            channel: self.channel,
            length: self.length,
            entries: self.entries.clone(),
            quantize: self.quantize.clone(),
        }
    }

    pub(crate) fn from_record(record: &EventTrackRecord) -> Result<Self, LoadError> {
        let length = record.length;
        if length == 0 {
            return Err(LoadError::ZeroLength {
                what: format!("track '{}'", record.name),
            });
        }

        let quantize = if record.quantize.is_empty() {
            vec![0; length]
        } else if record.quantize.len() != length {
            return Err(LoadError::QuantizeMapLength {
                track: record.name.clone(),
                found: record.quantize.len(),
                length,
            });
        } else {
            record.quantize.clone()
        };
        if let Some(&code) = quantize.iter().find(|&&c| c > MAX_SUBDIVISION) {
            return Err(LoadError::InvalidQuantize {
                track: record.name.clone(),
                code,
            });
        }

        let in_range = |t: f64| t.is_finite() && (0.0..length as f64).contains(&t);
        for entry in &record.entries {
            for time in std::iter::once(entry.time_on).chain(entry.time_off) {
                if !in_range(time) {
                    return Err(LoadError::EntryOutOfRange {
                        track: record.name.clone(),
                        time,
                        length,
                    });
                }
            }
        }

        let mut track = Self::with_entries(
            &record.name,
            length,
            &record.port_name,
            record.channel,
            record.entries.clone(),
        );
        track.quantize = quantize;
        track.rebuild();
        Ok(track)
    }
}

impl TrackOps for EventTrack {
    fn name(&self) -> &str {
        &self.name
    }

    fn set_name(&mut self, name: String) {
        self.name = name;
    }

    fn length(&self) -> usize {
        self.length
    }

    fn channel(&self) -> OutputChannel {
        self.channel
    }

    fn set_channel(&mut self, transport: &dyn Transport, channel: OutputChannel) {
        if channel == self.channel {
            return;
        }
        self.stop(transport);
        self.channel = channel;
        self.rebuild();
    }

    fn port_name(&self) -> &str {
        &self.port_name
    }

    fn port(&self) -> Option<PortHandle> {
        self.port
    }

    fn set_port_name(&mut self, transport: &dyn Transport, name: String) {
        self.stop(transport);
        self.port_name = name;
        self.bind(transport);
    }

    fn bind(&mut self, transport: &dyn Transport) {
        self.port = resolve_port(transport, &self.name, &self.port_name);
    }

    fn schedule(&self) -> &Schedule {
        &self.built.schedule
    }

    fn glyphs(&self) -> &[char] {
        &self.built.glyphs
    }

    /// Entries are copied into each repetition of the old length that
    /// starts before the new length; releases wrap around the new loop.
    /// A held note stays open in its first repetition only.
    fn resize(&mut self, transport: &dyn Transport, length: usize) {
        if length == 0 || length == self.length {
            return;
        }
        self.stop(transport);

        let old_len = self.length;
        let new_len = length as f64;
        self.quantize = if old_len == 0 {
            vec![0; length]
        } else {
            (0..length).map(|i| self.quantize[i % old_len]).collect()
        };

        let mut resized = Vec::new();
        if old_len > 0 {
            for copy in 0.. {
                let base = (old_len * copy) as f64;
                let mut added = false;
                for entry in &self.entries {
                    let time_on = base + entry.time_on;
                    if copy > 0 && self.is_held(entry) {
                        continue;
                    }
                    if time_on < new_len {
                        resized.push(Entry {
                            time_on,
                            time_off: entry.time_off.map(|off| wrap_time(base + off, new_len)),
                            ..*entry
                        });
                        added = true;
                    }
                }
                if !added {
                    break;
                }
            }
        }

        self.entries = resized;
        self.length = length;
        self.held.retain(|_, held| held.time_on < new_len);
        self.rebuild();
    }

    fn quantize(&mut self, beat: usize, code: u8) {
        if code > MAX_SUBDIVISION {
            return;
        }
        if let Some(slot) = self.quantize.get_mut(beat) {
            *slot = code;
            self.rebuild();
        }
    }

    fn clear(&mut self, transport: &dyn Transport, beat: usize) {
        if beat >= self.length {
            return;
        }
        let start = beat as f64;
        let in_beat = |t: f64| start <= t && t < start + 1.0;

        let (removed, kept): (Vec<Entry>, Vec<Entry>) =
            self.entries.iter().partition(|e| in_beat(e.time_on));
        if let Some(port) = self.port {
            for entry in removed.iter().filter(|e| e.kind == EntryKind::Note) {
                transport.send_note_off(port, entry.note, self.channel.apply(entry.channel));
            }
        }

        self.entries = kept;
        self.held.retain(|_, held| !in_beat(held.time_on));
        self.rebuild();
    }

    fn shift(&mut self, delta: i64) {
        if self.length == 0 {
            return;
        }
        let d = delta.rem_euclid(self.length as i64) as usize;
        let len = self.length as f64;
        let offset = d as f64;

        for entry in &mut self.entries {
            entry.time_on = wrap_time(entry.time_on - offset, len);
            entry.time_off = entry.time_off.map(|off| wrap_time(off - offset, len));
        }
        for held in self.held.values_mut() {
            held.time_on = wrap_time(held.time_on - offset, len);
        }
        self.quantize.rotate_left(d);
        self.rebuild();
    }

    fn transpose(&mut self, transport: &dyn Transport, semitones: i32) {
        self.stop(transport);
        let shifted = |note: u8| (i32::from(note) + semitones).clamp(0, 127) as u8;
        for entry in self.entries.iter_mut().filter(|e| e.kind == EntryKind::Note) {
            entry.note = shifted(entry.note);
        }
        for held in self.held.values_mut() {
            held.note = shifted(held.note);
        }
        self.rebuild();
    }

    fn note_on(
        &mut self,
        transport: &dyn Transport,
        time: Option<f64>,
        channel: u8,
        note: u8,
        velocity: u8,
    ) {
        if let Some(port) = self.port {
            transport.send_note_on(port, note, self.channel.apply(channel), velocity);
        }
        let Some(time_on) = self.record_time(time) else {
            return;
        };
        self.entries
            .push(Entry::note(time_on, None, channel, note, velocity));
        self.held.insert((channel, note), Held { time_on, note });
        self.rebuild();
    }

    fn note_off(&mut self, transport: &dyn Transport, time: Option<f64>, channel: u8, note: u8) {
        if let Some(port) = self.port {
            transport.send_note_off(port, note, self.channel.apply(channel));
        }
        let Some(held) = self.held.remove(&(channel, note)) else {
            return;
        };
        let Some(time_off) = self.record_time(time) else {
            return;
        };

        let open = self.entries.iter_mut().rev().find(|e| {
            e.kind == EntryKind::Note
                && e.time_off.is_none()
                && e.time_on == held.time_on
                && e.note == held.note
                && e.channel == channel
        });
        if let Some(entry) = open {
            entry.time_off = Some(time_off);
            self.rebuild();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playback::EventKind;
    use crate::transport::testing::{RecordingTransport, Sent};

    fn make_track(entries: Vec<Entry>) -> EventTrack {
        EventTrack::with_entries("Bass", 4, "Synth", OutputChannel::PassThrough, entries)
    }

    fn bound(track: &mut EventTrack) -> RecordingTransport {
        let transport = RecordingTransport::with_ports(&["Synth"]);
        track.bind(&transport);
        transport
    }

    fn schedule_times(track: &EventTrack) -> Vec<(f64, EventKind, u8)> {
        track
            .schedule()
            .events()
            .iter()
            .map(|e| (e.time, e.kind, e.note))
            .collect()
    }

    #[test]
    fn test_live_recording_pairs_on_and_off() {
        let mut track = make_track(vec![]);
        let transport = bound(&mut track);

        track.note_on(&transport, Some(1.5), 2, 60, 90);
        track.note_off(&transport, Some(2.25), 2, 60);

        assert_eq!(track.entries(), &[Entry::note(1.5, Some(2.25), 2, 60, 90)]);
        assert_eq!(
            transport.take(),
            vec![
                Sent::NoteOn { port: 0, note: 60, channel: 2, velocity: 90 },
                Sent::NoteOff { port: 0, note: 60, channel: 2 },
            ]
        );
    }

    #[test]
    fn test_recording_wraps_song_time() {
        let mut track = make_track(vec![]);
        let transport = RecordingTransport::default();
        track.note_on(&transport, Some(9.5), 0, 60, 100);
        track.note_off(&transport, Some(10.0), 0, 60);
        assert_eq!(track.entries(), &[Entry::note(1.5, Some(2.0), 0, 60, 100)]);
    }

    #[test]
    fn test_recording_truncates_to_microseconds() {
        let mut track = make_track(vec![]);
        let transport = RecordingTransport::default();
        track.note_on(&transport, Some(1.000_000_7), 0, 60, 100);
        assert_eq!(track.entries()[0].time_on, 1.0);
    }

    #[test]
    fn test_preview_sounds_but_records_nothing() {
        let mut track = make_track(vec![]);
        let transport = bound(&mut track);
        track.note_on(&transport, None, 0, 60, 100);
        track.note_off(&transport, None, 0, 60);
        assert!(track.entries().is_empty());
        assert_eq!(transport.take().len(), 2);
    }

    #[test]
    fn test_note_off_without_note_on_records_nothing() {
        let mut track = make_track(vec![]);
        let transport = RecordingTransport::default();
        track.note_off(&transport, Some(1.0), 0, 60);
        assert!(track.entries().is_empty());
    }

    #[test]
    fn test_same_note_on_different_channels_pairs_separately() {
        let mut track = make_track(vec![]);
        let transport = RecordingTransport::default();
        track.note_on(&transport, Some(0.0), 0, 60, 100);
        track.note_on(&transport, Some(0.0), 1, 60, 100);
        track.note_off(&transport, Some(1.0), 1, 60);
        track.note_off(&transport, Some(2.0), 0, 60);
        assert_eq!(
            track.entries(),
            &[
                Entry::note(0.0, Some(2.0), 0, 60, 100),
                Entry::note(0.0, Some(1.0), 1, 60, 100),
            ]
        );
    }

    #[test]
    fn test_pitch_bend_and_control_record_points() {
        let mut track = make_track(vec![]);
        let transport = bound(&mut track);
        track.pitch_bend(&transport, Some(0.5), -1000, 3);
        track.control(&transport, Some(1.5), 64, 7, 3);
        assert_eq!(
            track.entries(),
            &[Entry::pitch_bend(0.5, 3, -1000), Entry::control(1.5, 3, 7, 64)]
        );
        assert_eq!(track.glyphs(), &['#', '#', ' ', ' ']);
        assert_eq!(
            transport.take(),
            vec![
                Sent::PitchBend { port: 0, value: -1000, channel: 3 },
                Sent::Control { port: 0, value: 64, param: 7, channel: 3 },
            ]
        );
    }

    #[test]
    fn test_quantize_rebuilds_and_is_idempotent() {
        let mut track = make_track(vec![Entry::note(1.25, Some(2.0), 0, 60, 100)]);
        track.quantize(1, 1);
        let once = track.schedule().clone();
        track.quantize(1, 1);
        assert_eq!(track.schedule(), &once);
        assert_eq!(
            schedule_times(&track),
            vec![(1.0, EventKind::NoteOn, 60), (1.75, EventKind::NoteOff, 60)]
        );

        // Removing the code restores the recorded timing
        track.quantize(1, 0);
        assert_eq!(
            schedule_times(&track),
            vec![(1.25, EventKind::NoteOn, 60), (2.0, EventKind::NoteOff, 60)]
        );
    }

    #[test]
    fn test_clear_removes_beat_and_silences() {
        let mut track = make_track(vec![
            Entry::note(1.0, Some(1.5), 4, 60, 100),
            Entry::note(1.75, Some(3.0), 4, 62, 100),
            Entry::note(2.0, Some(3.0), 4, 64, 100),
        ]);
        let transport = bound(&mut track);
        track.clear(&transport, 1);
        assert_eq!(track.entries(), &[Entry::note(2.0, Some(3.0), 4, 64, 100)]);
        assert_eq!(
            transport.take(),
            vec![
                Sent::NoteOff { port: 0, note: 60, channel: 4 },
                Sent::NoteOff { port: 0, note: 62, channel: 4 },
            ]
        );
    }

    #[test]
    fn test_clear_out_of_bounds_is_noop() {
        let mut track = make_track(vec![Entry::note(1.0, Some(1.5), 0, 60, 100)]);
        let transport = RecordingTransport::default();
        track.clear(&transport, 4);
        assert_eq!(track.entries().len(), 1);
    }

    #[test]
    fn test_shift_moves_notes_and_quantize_map() {
        let mut track = make_track(vec![
            Entry::note(3.5, Some(0.5), 0, 60, 100),
            Entry::pitch_bend(1.0, 0, 10),
        ]);
        track.quantize(3, 2);
        track.shift(1);
        assert_eq!(
            track.entries(),
            &[Entry::note(2.5, Some(3.5), 0, 60, 100), Entry::pitch_bend(0.0, 0, 10)]
        );
        assert_eq!(track.quantize_map(), &[0, 0, 2, 0]);

        track.shift(-2);
        assert_eq!(track.entries()[0].time_on, 0.5);
        assert_eq!(track.quantize_map(), &[2, 0, 0, 0]);
    }

    #[test]
    fn test_shift_moves_held_note() {
        let mut track = make_track(vec![]);
        let transport = RecordingTransport::default();
        track.note_on(&transport, Some(2.0), 0, 60, 100);
        track.shift(1);
        track.note_off(&transport, Some(3.0), 0, 60);
        assert_eq!(track.entries(), &[Entry::note(1.0, Some(3.0), 0, 60, 100)]);
    }

    #[test]
    fn test_resize_keeps_held_note_open_once() {
        let mut track = make_track(vec![]);
        let transport = RecordingTransport::default();
        track.note_on(&transport, Some(1.0), 0, 60, 100);
        track.resize(&transport, 8);
        track.note_off(&transport, Some(2.0), 0, 60);
        assert_eq!(track.entries(), &[Entry::note(1.0, Some(2.0), 0, 60, 100)]);
    }

    #[test]
    fn test_resize_drops_held_note_cut_off() {
        let mut track = make_track(vec![]);
        let transport = RecordingTransport::default();
        track.note_on(&transport, Some(3.0), 0, 60, 100);
        track.resize(&transport, 2);
        track.note_off(&transport, Some(1.0), 0, 60);
        assert!(track.entries().is_empty());
    }

    #[test]
    fn test_transpose_keeps_held_note_paired() {
        let mut track = make_track(vec![]);
        let transport = RecordingTransport::default();
        track.note_on(&transport, Some(1.0), 0, 60, 100);
        track.transpose(&transport, 2);
        track.note_off(&transport, Some(2.0), 0, 60);
        assert_eq!(track.entries(), &[Entry::note(1.0, Some(2.0), 0, 62, 100)]);
    }

    #[test]
    fn test_resize_replicates_entries() {
        let mut track = make_track(vec![Entry::note(1.0, Some(3.5), 0, 60, 100)]);
        track.quantize(1, 2);
        let transport = RecordingTransport::default();
        track.resize(&transport, 10);
        assert_eq!(
            track.entries(),
            &[
                Entry::note(1.0, Some(3.5), 0, 60, 100),
                Entry::note(5.0, Some(7.5), 0, 60, 100),
                Entry::note(9.0, Some(1.5), 0, 60, 100),
            ]
        );
        assert_eq!(track.quantize_map(), &[0, 2, 0, 0, 0, 2, 0, 0, 0, 2]);
        assert_eq!(track.glyphs().len(), 10);
    }

    #[test]
    fn test_resize_shrink_drops_late_entries() {
        let mut track = make_track(vec![
            Entry::note(0.5, Some(1.0), 0, 60, 100),
            Entry::note(2.5, Some(3.5), 0, 62, 100),
        ]);
        let transport = RecordingTransport::default();
        track.resize(&transport, 2);
        assert_eq!(track.entries(), &[Entry::note(0.5, Some(1.0), 0, 60, 100)]);
        assert_eq!(track.length(), 2);
    }

    #[test]
    fn test_channel_pass_through_and_fixed() {
        let mut track = make_track(vec![
            Entry::note(0.0, Some(1.0), 3, 60, 100),
            Entry::note(2.0, Some(3.0), 11, 64, 100),
        ]);
        let transport = bound(&mut track);

        track.play_range(&transport, 0.0, 4.0);
        let channels: Vec<u8> = transport
            .take()
            .into_iter()
            .filter_map(|s| match s {
                Sent::NoteOn { channel, .. } => Some(channel),
                _ => None,
            })
            .collect();
        assert_eq!(channels, vec![3, 11]);

        track.set_channel(&transport, OutputChannel::Fixed(5));
        transport.take();
        track.play_range(&transport, 0.0, 4.0);
        assert!(transport.take().into_iter().all(|s| match s {
            Sent::NoteOn { channel, .. } | Sent::NoteOff { channel, .. } => channel == 5,
            _ => false,
        }));
    }

    #[test]
    fn test_set_channel_stops_before_switching() {
        let mut track = make_track(vec![Entry::note(0.0, Some(1.0), 3, 60, 100)]);
        let transport = bound(&mut track);
        track.set_channel(&transport, OutputChannel::Fixed(5));
        assert_eq!(
            transport.take(),
            vec![Sent::NoteOff { port: 0, note: 60, channel: 3 }]
        );
    }

    #[test]
    fn test_stop_silences_unfinished_notes() {
        let mut track = make_track(vec![]);
        let transport = bound(&mut track);
        track.note_on(&transport, Some(1.0), 0, 60, 100);
        transport.take();
        track.stop(&transport);
        assert_eq!(
            transport.take(),
            vec![Sent::NoteOff { port: 0, note: 60, channel: 0 }]
        );
    }

    #[test]
    fn test_transpose_moves_notes_only() {
        let mut track = make_track(vec![
            Entry::note(0.0, Some(1.0), 0, 126, 100),
            Entry::pitch_bend(1.0, 0, 10),
        ]);
        let transport = RecordingTransport::default();
        track.transpose(&transport, 5);
        assert_eq!(track.entries()[0].note, 127);
        assert_eq!(track.entries()[1].note, 0);
    }

    #[test]
    fn test_record_validation() {
        let track = make_track(vec![Entry::note(1.0, Some(2.0), 0, 60, 100)]);
        let mut record = track.dump();
        assert!(EventTrack::from_record(&record).is_ok());

        record.entries[0].time_off = Some(4.0);
        assert!(matches!(
            EventTrack::from_record(&record),
            Err(LoadError::EntryOutOfRange { .. })
        ));

        let mut record = track.dump();
        record.quantize = vec![0, 1];
        assert!(matches!(
            EventTrack::from_record(&record),
            Err(LoadError::QuantizeMapLength { .. })
        ));

        record.quantize = vec![];
        let loaded = EventTrack::from_record(&record).unwrap();
        assert_eq!(loaded.quantize_map(), &[0, 0, 0, 0]);
    }
}
