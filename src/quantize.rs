//! Quantization and sequence building.
//!
//! Turns a track's raw data into its derived [`Schedule`] plus a one-glyph-
//! per-beat display string. The raw data is never altered by quantization,
//! so a quantize code can be changed or removed later.

use crate::playback::{wrap_time, EventKind, Schedule, ScheduledEvent};
use crate::track::{Entry, EntryKind, OutputChannel};

/// Largest subdivision a quantize code or step cell may hold.
pub const MAX_SUBDIVISION: u8 = 4;

/// Velocity used for step hits.
pub const STEP_VELOCITY: i32 = 127;

pub const GLYPH_EMPTY: char = ' ';
pub const GLYPH_UNQUANTIZED: char = '*';
pub const GLYPH_CONTROL: char = '#';

/// Derived data of a track: its schedule and display glyphs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Built {
    pub schedule: Schedule,
    pub glyphs: Vec<char>,
}

/// Nearest multiple of `1 / code` to `time`.
pub fn snap(time: f64, code: u8) -> f64 {
    let q = f64::from(code);
    (time * q).round() / q
}

/// Glyph for a subdivision code.
pub fn code_glyph(code: u8) -> char {
    char::from_digit(u32::from(code), 10).unwrap_or(GLYPH_UNQUANTIZED)
}

/// Glyph for a step cell, blank when empty.
pub fn code_glyph_or_empty(code: u8) -> char {
    if code == 0 {
        GLYPH_EMPTY
    } else {
        code_glyph(code)
    }
}

/// Offsets within a beat at which a step cell with this code plays.
pub fn subdivisions(code: u8) -> impl Iterator<Item = f64> {
    (0..code).map(move |i| f64::from(i) / f64::from(code))
}

/// Build the schedule of an event track.
///
/// Each note is snapped to the quantize code of the beat it starts in; the
/// same correction is applied to its note-off so the note keeps its length.
pub fn build_event_schedule(
    entries: &[Entry],
    quantize: &[u8],
    length: usize,
    channel: OutputChannel,
) -> Built {
    let mut glyphs = vec![GLYPH_EMPTY; length];
    if length == 0 {
        return Built::default();
    }
    let len = length as f64;
    let mut events = Vec::with_capacity(entries.len() * 2);

    for entry in entries {
        let beat = entry.time_on.floor() as usize;
        if entry.time_on < 0.0 || beat >= length {
            continue;
        }
        let out = channel.apply(entry.channel);

        match entry.kind {
            EntryKind::Note => {
                let code = quantize.get(beat).copied().unwrap_or(0);
                let delta = if code == 0 {
                    0.0
                } else {
                    entry.time_on - snap(entry.time_on, code)
                };

                events.push(ScheduledEvent {
                    time: wrap_time(entry.time_on - delta, len),
                    kind: EventKind::NoteOn,
                    channel: out,
                    note: entry.note,
                    value: entry.value,
                });
                if let Some(off) = entry.time_off {
                    events.push(ScheduledEvent {
                        time: wrap_time(off - delta, len),
                        kind: EventKind::NoteOff,
                        channel: out,
                        note: entry.note,
                        value: 0,
                    });
                }

                glyphs[beat] = if code == 0 {
                    GLYPH_UNQUANTIZED
                } else {
                    code_glyph(code)
                };
            }
            EntryKind::PitchBend | EntryKind::Control => {
                let kind = match entry.kind {
                    EntryKind::Control => EventKind::Control { param: entry.note },
                    _ => EventKind::PitchBend,
                };
                events.push(ScheduledEvent {
                    time: wrap_time(entry.time_on, len),
                    kind,
                    channel: out,
                    note: 0,
                    value: entry.value,
                });
                if glyphs[beat] == GLYPH_EMPTY {
                    glyphs[beat] = GLYPH_CONTROL;
                }
            }
        }
    }

    Built {
        schedule: Schedule::from_unsorted(events),
        glyphs,
    }
}

/// Build the schedule of a step track: `code` evenly spaced hits per cell.
pub fn build_step_schedule(cells: &[u8], note: u8, channel: OutputChannel) -> Built {
    let out = channel.apply(0);
    let mut events = Vec::new();
    let mut glyphs = Vec::with_capacity(cells.len());

    for (beat, &code) in cells.iter().enumerate() {
        glyphs.push(code_glyph_or_empty(code));
        for offset in subdivisions(code) {
            events.push(ScheduledEvent {
                time: beat as f64 + offset,
                kind: EventKind::NoteOn,
                channel: out,
                note,
                value: STEP_VELOCITY,
            });
        }
    }

    Built {
        schedule: Schedule::from_unsorted(events),
        glyphs,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn note(time_on: f64, time_off: Option<f64>, channel: u8, note: u8) -> Entry {
        Entry::note(time_on, time_off, channel, note, 100)
    }

    fn event_times(built: &Built) -> Vec<(f64, EventKind)> {
        built
            .schedule
            .events()
            .iter()
            .map(|e| (e.time, e.kind))
            .collect()
    }

    #[test]
    fn test_snap() {
        assert_eq!(snap(1.3, 1), 1.0);
        assert_eq!(snap(1.3, 2), 1.5);
        assert_eq!(snap(1.2, 4), 1.25);
        assert_eq!(snap(1.7, 1), 2.0);
    }

    #[test]
    fn test_unquantized_note_plays_as_recorded() {
        let entries = [note(1.3, Some(2.1), 0, 60)];
        let built = build_event_schedule(&entries, &[0; 4], 4, OutputChannel::PassThrough);
        assert_eq!(
            event_times(&built),
            vec![(1.3, EventKind::NoteOn), (2.1, EventKind::NoteOff)]
        );
        assert_eq!(built.glyphs, vec![' ', '*', ' ', ' ']);
    }

    #[test]
    fn test_quantize_shifts_on_and_off_together() {
        let entries = [note(1.25, Some(2.0), 0, 60)];
        let built = build_event_schedule(&entries, &[0, 1, 0, 0], 4, OutputChannel::PassThrough);
        // 1.25 snaps to 1.0, so the off moves by the same -0.25
        assert_eq!(
            event_times(&built),
            vec![(1.0, EventKind::NoteOn), (1.75, EventKind::NoteOff)]
        );
        assert_eq!(built.glyphs[1], '1');
    }

    #[test]
    fn test_quantize_wraps_past_loop_end() {
        let entries = [note(3.75, Some(0.5), 0, 60)];
        let built = build_event_schedule(&entries, &[0, 0, 0, 1], 4, OutputChannel::PassThrough);
        // 3.75 snaps up to 4.0 which is the loop start
        assert_eq!(
            event_times(&built),
            vec![(0.0, EventKind::NoteOn), (0.75, EventKind::NoteOff)]
        );
        assert_eq!(built.glyphs[3], '1');
    }

    #[test]
    fn test_quantize_uses_beat_of_note_start() {
        // The off at 1.375 follows its note, not the code of beat 1
        let entries = [note(0.625, Some(1.375), 0, 60)];
        let built = build_event_schedule(&entries, &[2, 1, 0, 0], 4, OutputChannel::PassThrough);
        assert_eq!(
            event_times(&built),
            vec![(0.5, EventKind::NoteOn), (1.25, EventKind::NoteOff)]
        );
    }

    #[test]
    fn test_control_glyph_does_not_hide_notes() {
        let entries = [
            Entry::pitch_bend(1.5, 0, 300),
            note(1.0, Some(1.5), 0, 60),
            Entry::pitch_bend(2.5, 0, -300),
        ];
        let built = build_event_schedule(&entries, &[0; 4], 4, OutputChannel::PassThrough);
        assert_eq!(built.glyphs, vec![' ', '*', '#', ' ']);
        assert_eq!(built.schedule.events().len(), 4);
    }

    #[test]
    fn test_pitch_bend_is_not_quantized() {
        let entries = [Entry::pitch_bend(1.3, 0, 100)];
        let built = build_event_schedule(&entries, &[0, 4, 0, 0], 4, OutputChannel::PassThrough);
        assert_eq!(event_times(&built), vec![(1.3, EventKind::PitchBend)]);
    }

    #[test]
    fn test_fixed_channel_overrides_recorded_channel() {
        let entries = [note(0.0, Some(1.0), 3, 60), note(1.0, Some(2.0), 9, 62)];
        let passthrough = build_event_schedule(&entries, &[0; 4], 4, OutputChannel::PassThrough);
        let channels: Vec<u8> = passthrough.schedule.events().iter().map(|e| e.channel).collect();
        assert_eq!(channels, vec![3, 3, 9, 9]);

        let fixed = build_event_schedule(&entries, &[0; 4], 4, OutputChannel::Fixed(5));
        assert!(fixed.schedule.events().iter().all(|e| e.channel == 5));
    }

    #[test]
    fn test_step_schedule_subdivides_beats() {
        let built = build_step_schedule(&[1, 0, 2, 4], 38, OutputChannel::Fixed(9));
        let times: Vec<f64> = built.schedule.events().iter().map(|e| e.time).collect();
        assert_eq!(times, vec![0.0, 2.0, 2.5, 3.0, 3.25, 3.5, 3.75]);
        assert!(built
            .schedule
            .events()
            .iter()
            .all(|e| e.note == 38 && e.channel == 9 && e.kind == EventKind::NoteOn));
        assert_eq!(built.glyphs, vec!['1', ' ', '2', '4']);
    }

    #[test]
    fn test_step_triplets() {
        let built = build_step_schedule(&[3], 44, OutputChannel::Fixed(0));
        let times: Vec<f64> = built.schedule.events().iter().map(|e| e.time).collect();
        assert_eq!(times, vec![0.0, 1.0 / 3.0, 2.0 / 3.0]);
    }
}
