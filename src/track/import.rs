//! Standard MIDI File import into event tracks.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use midly::{MidiMessage, Smf, Timing, TrackEventKind};

use crate::error::LoadError;
use crate::playback::wrap_time;

use super::{Entry, EventTrack, OutputChannel};

/// Sequencer beats per quarter note.
const BEATS_PER_QUARTER: u64 = 2;

impl EventTrack {
    /// Load a MIDI file as a new event track.
    ///
    /// All tracks of the file are merged. With no `length` the track is as
    /// many beats long as needed to hold the last note start.
    pub fn from_smf_file<P: AsRef<Path>>(
        path: P,
        length: Option<usize>,
        port_name: &str,
    ) -> Result<Self, LoadError> {
        let path = path.as_ref();
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("unknown")
            .to_string();
        let data = fs::read(path)?;
        Self::from_smf_bytes(&name, &data, length, port_name)
    }

    pub fn from_smf_bytes(
        name: &str,
        data: &[u8],
        length: Option<usize>,
        port_name: &str,
    ) -> Result<Self, LoadError> {
        let smf = Smf::parse(data).map_err(|e| LoadError::Midi(e.to_string()))?;

        let ppq = match smf.header.timing {
            Timing::Metrical(ppq) => u64::from(ppq.as_int()),
            Timing::Timecode(_, _) => {
                return Err(LoadError::Midi(
                    "Timecode-based MIDI files not supported".to_string(),
                ))
            }
        };
        if ppq == 0 {
            return Err(LoadError::Midi("zero ticks per quarter note".to_string()));
        }
        let to_beats = |tick: u64| (tick * BEATS_PER_QUARTER) as f64 / ppq as f64;

        let mut entries: Vec<Entry> = Vec::new();
        for track in &smf.tracks {
            let mut tick: u64 = 0;
            // Index into `entries` of each open note
            let mut open: HashMap<(u8, u8), usize> = HashMap::new();

            for event in track.iter() {
                tick += u64::from(event.delta.as_int());
                let TrackEventKind::Midi { channel, message } = event.kind else {
                    continue;
                };
                let channel = channel.as_int();
                let time = to_beats(tick);

                match message {
                    MidiMessage::NoteOn { key, vel } if vel.as_int() > 0 => {
                        open.insert((channel, key.as_int()), entries.len());
                        entries.push(Entry::note(time, None, channel, key.as_int(), vel.as_int()));
                    }
                    MidiMessage::NoteOn { key, .. } | MidiMessage::NoteOff { key, .. } => {
                        if let Some(index) = open.remove(&(channel, key.as_int())) {
                            entries[index].time_off = Some(time);
                        }
                    }
                    MidiMessage::Controller { controller, value } => {
                        entries.push(Entry::control(time, channel, controller.as_int(), value.as_int()));
                    }
                    MidiMessage::PitchBend { bend } => {
                        entries.push(Entry::pitch_bend(time, channel, i32::from(bend.as_int())));
                    }
                    _ => {}
                }
            }
        }

        let length = length.unwrap_or_else(|| {
            entries
                .iter()
                .map(|e| e.time_on.floor() as usize + 1)
                .max()
                .unwrap_or(1)
        });
        if length == 0 {
            return Err(LoadError::ZeroLength {
                what: format!("track '{}'", name),
            });
        }

        let len = length as f64;
        let entries = entries
            .into_iter()
            .filter(|e| e.time_on < len)
            .map(|e| Entry {
                time_off: e.time_off.map(|off| wrap_time(off, len)),
                ..e
            })
            .collect();

        Ok(EventTrack::with_entries(
            name,
            length,
            port_name,
            OutputChannel::PassThrough,
            entries,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::track::TrackOps;

    /// Format 0 file, 96 ppq, one track with two notes and a bend.
    fn make_test_file() -> Vec<u8> {
        let mut data = vec![
            b'M', b'T', b'h', b'd', 0, 0, 0, 6, // header chunk
            0, 0, // format 0
            0, 1, // one track
            0, 96, // 96 ticks per quarter
        ];
        let track: Vec<u8> = vec![
            0x00, 0x90, 60, 100, // note on C4 at 0
            0x30, 0x80, 60, 0, // note off at 48 ticks (one beat)
            0x30, 0xE1, 0x00, 0x50, // bend on channel 1 at 96 ticks
            0x00, 0x91, 64, 90, // note on E4 at 96 ticks
            0x60, 0x91, 64, 0, // velocity-0 note off at 192 ticks
            0x00, 0xFF, 0x2F, 0x00, // end of track
        ];
        data.extend_from_slice(b"MTrk");
        data.extend_from_slice(&(track.len() as u32).to_be_bytes());
        data.extend_from_slice(&track);
        data
    }

    #[test]
    fn test_import_converts_ticks_to_beats() {
        let track = EventTrack::from_smf_bytes("riff", &make_test_file(), Some(8), "").unwrap();
        assert_eq!(track.length(), 8);
        assert_eq!(
            track.entries(),
            &[
                Entry::note(0.0, Some(1.0), 0, 60, 100),
                Entry::pitch_bend(2.0, 1, 2048),
                Entry::note(2.0, Some(4.0), 1, 64, 90),
            ]
        );
        assert_eq!(track.channel(), OutputChannel::PassThrough);
    }

    #[test]
    fn test_import_infers_length() {
        let track = EventTrack::from_smf_bytes("riff", &make_test_file(), None, "").unwrap();
        assert_eq!(track.length(), 3);
        // The second note's release wraps onto the loop start
        assert_eq!(track.entries()[2].time_off, Some(1.0));
    }

    #[test]
    fn test_import_rejects_garbage() {
        assert!(matches!(
            EventTrack::from_smf_bytes("bad", b"not a midi file", None, ""),
            Err(LoadError::Midi(_))
        ));
    }
}
