//! Range playback engine.
//!
//! A [`Schedule`] is the sorted, quantize-corrected list of events a track
//! plays each loop. Playback is driven by half-open windows `[prev, curr)`
//! over the track's cyclic time axis; consecutive windows that tile the axis
//! deliver every event exactly once, including across the loop point.

use std::collections::BTreeSet;

use crate::transport::{PortHandle, Transport};

/// What a scheduled event does when it is due.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    NoteOn,
    NoteOff,
    PitchBend,
    Control { param: u8 },
}

/// A single playable event.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledEvent {
    /// Position in beats from the start of the track, in `[0, length)`
    pub time: f64,
    pub kind: EventKind,
    /// Output channel after pass-through substitution (0-15)
    pub channel: u8,
    pub note: u8,
    /// Velocity for notes, bend amount or controller value otherwise
    pub value: i32,
}

impl ScheduledEvent {
    /// Send this event to the transport.
    pub fn dispatch(&self, transport: &dyn Transport, port: PortHandle) {
        match self.kind {
            EventKind::NoteOn => {
                transport.send_note_on(port, self.note, self.channel, self.value.clamp(0, 127) as u8)
            }
            EventKind::NoteOff => transport.send_note_off(port, self.note, self.channel),
            EventKind::PitchBend => transport.send_pitch_bend(port, self.value, self.channel),
            EventKind::Control { param } => transport.send_control_change(
                port,
                self.value.clamp(0, 127) as u8,
                param,
                self.channel,
            ),
        }
    }
}

/// Events sorted ascending by time.
///
/// A schedule is never patched in place: owners build a fresh one and
/// replace the old value whole.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Schedule {
    events: Vec<ScheduledEvent>,
}

impl Schedule {
    /// Build from unordered events. Same-time events keep insertion order.
    pub fn from_unsorted(mut events: Vec<ScheduledEvent>) -> Self {
        events.sort_by(|a, b| a.time.total_cmp(&b.time));
        Self { events }
    }

    pub fn events(&self) -> &[ScheduledEvent] {
        &self.events
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Index of the first event at or after `time`.
    fn position(&self, time: f64) -> usize {
        self.events.partition_point(|e| e.time < time)
    }

    /// Events due in the window `[prev, curr)` on a loop of `length` beats.
    ///
    /// Returned as two slices because a wrapped window is the tail of the
    /// schedule followed by its head.
    pub fn due(&self, prev: f64, curr: f64, length: f64) -> (&[ScheduledEvent], &[ScheduledEvent]) {
        let none: &[ScheduledEvent] = &[];
        if length <= 0.0 || !prev.is_finite() || !curr.is_finite() || prev == curr {
            return (none, none);
        }
        if curr - prev >= length {
            return (&self.events, none);
        }

        let prev = prev.rem_euclid(length);
        let curr = curr.rem_euclid(length);
        let prev_i = self.position(prev);
        let curr_i = self.position(curr);

        if prev <= curr {
            (&self.events[prev_i..curr_i], none)
        } else {
            (&self.events[prev_i..], &self.events[..curr_i])
        }
    }

    /// Every `(note, channel)` this schedule can leave sounding.
    pub fn sounding_notes(&self) -> BTreeSet<(u8, u8)> {
        self.events
            .iter()
            .filter(|e| e.kind == EventKind::NoteOn)
            .map(|e| (e.note, e.channel))
            .collect()
    }
}

/// Something the transport thread can drive: a single pattern or a song.
pub trait Playable: Send + Sync {
    /// Play everything due in `[prev, curr)`.
    fn play_range(&self, transport: &dyn Transport, prev: f64, curr: f64);

    /// Silence every track.
    fn mute(&self, transport: &dyn Transport);

    /// Re-resolve every track's output port.
    fn bind(&mut self, transport: &dyn Transport);
}

/// Reduce `time` into `[0, length)`.
pub fn wrap_time(time: f64, length: f64) -> f64 {
    let wrapped = time.rem_euclid(length);
    // rem_euclid can round a tiny negative up to exactly `length`
    if wrapped >= length {
        0.0
    } else {
        wrapped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::testing::{RecordingTransport, Sent};

    fn note_on(time: f64, note: u8) -> ScheduledEvent {
        ScheduledEvent {
            time,
            kind: EventKind::NoteOn,
            channel: 0,
            note,
            value: 100,
        }
    }

    fn note_off(time: f64, note: u8) -> ScheduledEvent {
        ScheduledEvent {
            time,
            kind: EventKind::NoteOff,
            channel: 0,
            note,
            value: 0,
        }
    }

    /// A 1-bar schedule with two notes
    fn make_test_schedule() -> Schedule {
        Schedule::from_unsorted(vec![
            note_on(2.0, 64),
            note_off(3.0, 64),
            note_on(0.0, 60),
            note_off(1.5, 60),
        ])
    }

    fn times(slices: (&[ScheduledEvent], &[ScheduledEvent])) -> Vec<f64> {
        slices.0.iter().chain(slices.1).map(|e| e.time).collect()
    }

    #[test]
    fn test_from_unsorted_sorts_by_time() {
        let schedule = make_test_schedule();
        let sorted: Vec<f64> = schedule.events().iter().map(|e| e.time).collect();
        assert_eq!(sorted, vec![0.0, 1.5, 2.0, 3.0]);
    }

    #[test]
    fn test_same_time_keeps_insertion_order() {
        let schedule = Schedule::from_unsorted(vec![note_on(1.0, 60), note_off(1.0, 60)]);
        assert_eq!(schedule.events()[0].kind, EventKind::NoteOn);
        assert_eq!(schedule.events()[1].kind, EventKind::NoteOff);
    }

    #[test]
    fn test_window_is_half_open() {
        let schedule = make_test_schedule();
        assert_eq!(times(schedule.due(0.0, 2.0, 4.0)), vec![0.0, 1.5]);
        assert_eq!(times(schedule.due(2.0, 3.0, 4.0)), vec![2.0]);
    }

    #[test]
    fn test_zero_length_window_is_empty() {
        let schedule = make_test_schedule();
        assert!(times(schedule.due(2.0, 2.0, 4.0)).is_empty());
    }

    #[test]
    fn test_wrapped_window() {
        let schedule = make_test_schedule();
        // 3.5 -> 5.0 is 3.5 -> 1.0 modulo 4
        assert_eq!(times(schedule.due(3.5, 5.0, 4.0)), vec![0.0]);
        assert_eq!(times(schedule.due(2.5, 4.5, 4.0)), vec![3.0, 0.0]);
    }

    #[test]
    fn test_window_ending_on_loop_point() {
        let schedule = make_test_schedule();
        assert_eq!(times(schedule.due(3.0, 4.0, 4.0)), vec![3.0]);
    }

    #[test]
    fn test_full_loop_window_delivers_everything_once() {
        let schedule = make_test_schedule();
        assert_eq!(times(schedule.due(1.0, 5.0, 4.0)), vec![0.0, 1.5, 2.0, 3.0]);
    }

    #[test]
    fn test_tiling_windows_deliver_each_event_exactly_once() {
        let schedule = make_test_schedule();
        // Irregular ticks starting mid-loop and crossing the loop point once
        let ticks = [1.2, 1.21, 1.9, 2.0, 2.7, 3.3, 3.99, 4.0, 4.6, 5.2];
        let mut delivered = Vec::new();
        for pair in ticks.windows(2) {
            delivered.extend(times(schedule.due(pair[0], pair[1], 4.0)));
        }
        delivered.sort_by(f64::total_cmp);
        assert_eq!(delivered, vec![0.0, 1.5, 2.0, 3.0]);
    }

    #[test]
    fn test_empty_schedule_and_bad_input() {
        let schedule = Schedule::default();
        assert!(times(schedule.due(0.0, 3.0, 4.0)).is_empty());
        let schedule = make_test_schedule();
        assert!(times(schedule.due(0.0, 3.0, 0.0)).is_empty());
        assert!(times(schedule.due(f64::NAN, 3.0, 4.0)).is_empty());
    }

    #[test]
    fn test_sounding_notes() {
        let schedule = make_test_schedule();
        let notes: Vec<_> = schedule.sounding_notes().into_iter().collect();
        assert_eq!(notes, vec![(60, 0), (64, 0)]);
    }

    #[test]
    fn test_dispatch_maps_kinds_to_messages() {
        let transport = RecordingTransport::default();
        let port = PortHandle(3);
        note_on(0.0, 60).dispatch(&transport, port);
        note_off(1.0, 60).dispatch(&transport, port);
        ScheduledEvent {
            time: 2.0,
            kind: EventKind::PitchBend,
            channel: 1,
            note: 0,
            value: -200,
        }
        .dispatch(&transport, port);
        ScheduledEvent {
            time: 3.0,
            kind: EventKind::Control { param: 7 },
            channel: 2,
            note: 0,
            value: 90,
        }
        .dispatch(&transport, port);

        assert_eq!(
            transport.take(),
            vec![
                Sent::NoteOn { port: 3, note: 60, channel: 0, velocity: 100 },
                Sent::NoteOff { port: 3, note: 60, channel: 0 },
                Sent::PitchBend { port: 3, value: -200, channel: 1 },
                Sent::Control { port: 3, value: 90, param: 7, channel: 2 },
            ]
        );
    }

    #[test]
    fn test_wrap_time() {
        assert_eq!(wrap_time(5.5, 4.0), 1.5);
        assert_eq!(wrap_time(-0.5, 4.0), 3.5);
        assert_eq!(wrap_time(4.0, 4.0), 0.0);
        assert!(wrap_time(-1e-18, 4.0) < 4.0);
    }
}
