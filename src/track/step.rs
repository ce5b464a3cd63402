use crate::error::LoadError;
use crate::persist::StepTrackRecord;
use crate::playback::Schedule;
use crate::quantize::{self, Built, MAX_SUBDIVISION};
use crate::transport::{PortHandle, Transport};

use super::{resolve_port, OutputChannel, TrackOps};

/// White keys from C3 upward. Pressing one toggles the step at its index.
fn step_key_index(note: u8) -> Option<usize> {
    const WHITE_KEYS: [u8; 7] = [48, 50, 52, 53, 55, 57, 59];
    (0..6u8)
        .flat_map(|octave| WHITE_KEYS.iter().map(move |key| key + 12 * octave))
        .position(|key| key == note)
}

/// Next value when a step is tapped: empty, 1, 2, 3, 4, empty...
fn next_code(code: u8) -> u8 {
    if code >= MAX_SUBDIVISION {
        0
    } else {
        code + 1
    }
}

/// Drum-style track: one cell per beat playing a single fixed note.
#[derive(Debug, Clone)]
pub struct StepTrack {
    name: String,
    port_name: String,
    port: Option<PortHandle>,
    channel: OutputChannel,
    note: u8,
    /// 0 = empty, otherwise number of evenly spaced hits in the beat
    cells: Vec<u8>,
    built: Built,
}

impl StepTrack {
    pub fn new(name: &str, length: usize, port_name: &str, channel: OutputChannel, note: u8) -> Self {
        let mut track = Self {
            name: name.to_string(),
            port_name: port_name.to_string(),
            port: None,
            channel,
            note,
            cells: vec![0; length],
            built: Built::default(),
        };
        track.rebuild();
        track
    }

    pub fn cells(&self) -> &[u8] {
        &self.cells
    }

    pub fn note(&self) -> u8 {
        self.note
    }

    /// Set a cell directly. Codes above the maximum subdivision are ignored.
    pub fn set_cell(&mut self, beat: usize, code: u8) {
        if code > MAX_SUBDIVISION {
            return;
        }
        if let Some(cell) = self.cells.get_mut(beat) {
            *cell = code;
            self.rebuild();
        }
    }

    pub fn set_note(&mut self, transport: &dyn Transport, note: u8) {
        self.stop(transport);
        self.note = note.min(127);
        self.rebuild();
    }

    fn rebuild(&mut self) {
        self.built = quantize::build_step_schedule(&self.cells, self.note, self.channel);
    }

    pub(crate) fn dump(&self) -> StepTrackRecord {
        StepTrackRecord {
            name: self.name.clone(),
            port_name: self.port_name.clone(),
            channel: self.channel,
            note: self.note,
            cells: self.cells.iter().map(|&c| quantize::code_glyph_or_empty(c)).collect(),
        }
    }

    pub(crate) fn from_record(record: &StepTrackRecord) -> Result<Self, LoadError> {
        let cells = record
            .cells
            .chars()
            .map(|c| match c {
                ' ' => Ok(0),
                '1'..='4' => Ok(c as u8 - b'0'),
                _ => Err(LoadError::InvalidCell {
                    track: record.name.clone(),
                    cell: c,
                }),
            })
            .collect::<Result<Vec<u8>, _>>()?;
        if cells.is_empty() {
            return Err(LoadError::ZeroLength {
                what: format!("track '{}'", record.name),
            });
        }

        let mut track = Self::new(
            &record.name,
            0,
            &record.port_name,
            record.channel,
            record.note.min(127),
        );
        track.cells = cells;
        track.rebuild();
        Ok(track)
    }
}

impl TrackOps for StepTrack {
    fn name(&self) -> &str {
        &self.name
    }

    fn set_name(&mut self, name: String) {
        self.name = name;
    }

    fn length(&self) -> usize {
        self.cells.len()
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

    fn resize(&mut self, transport: &dyn Transport, length: usize) {
        if length == 0 || length == self.cells.len() {
            return;
        }
        self.stop(transport);
        let old = &self.cells;
        self.cells = if old.is_empty() {
            vec![0; length]
        } else {
            (0..length).map(|i| old[i % old.len()]).collect()
        };
        self.rebuild();
    }

    /// Only occupied cells take a new code, and code 0 is ignored.
    fn quantize(&mut self, beat: usize, code: u8) {
        if code == 0 || code > MAX_SUBDIVISION {
            return;
        }
        match self.cells.get_mut(beat) {
            Some(cell) if *cell != 0 => *cell = code,
            _ => return,
        }
        self.rebuild();
    }

    fn clear(&mut self, transport: &dyn Transport, beat: usize) {
        let Some(cell) = self.cells.get_mut(beat) else {
            return;
        };
        if *cell != 0 {
            *cell = 0;
            if let Some(port) = self.port {
                transport.send_note_off(port, self.note, self.channel.apply(0));
            }
        }
        self.rebuild();
    }

    fn shift(&mut self, delta: i64) {
        if self.cells.is_empty() {
            return;
        }
        let d = delta.rem_euclid(self.cells.len() as i64) as usize;
        self.cells.rotate_left(d);
        self.rebuild();
    }

    fn transpose(&mut self, transport: &dyn Transport, semitones: i32) {
        let note = (i32::from(self.note) + semitones).clamp(0, 127) as u8;
        self.set_note(transport, note);
    }

    /// Previews the track's own note; white keys also cycle their step.
    fn note_on(
        &mut self,
        transport: &dyn Transport,
        time: Option<f64>,
        _channel: u8,
        note: u8,
        _velocity: u8,
    ) {
        if let Some(port) = self.port {
            transport.send_note_on(port, self.note, self.channel.apply(0), 127);
        }
        if time.is_none() || self.cells.is_empty() {
            return;
        }
        if let Some(index) = step_key_index(note) {
            let beat = index % self.cells.len();
            self.cells[beat] = next_code(self.cells[beat]);
            self.rebuild();
        }
    }

    fn note_off(&mut self, transport: &dyn Transport, _time: Option<f64>, _channel: u8, _note: u8) {
        if let Some(port) = self.port {
            transport.send_note_off(port, self.note, self.channel.apply(0));
        }
    }
}
