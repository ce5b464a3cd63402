//! The editing session: the only writer of the shared project.
//!
//! Input events are applied to the selected track of the pattern under the
//! play head. The player thread reads the same project through the other side
//! of the lock, so every edit, schedule rebuild included, lands atomically.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::clock::ClockState;
use crate::error::LoadError;
use crate::history::UndoHistory;
use crate::input::{InputEvent, InputQueue};
use crate::pattern::PatternId;
use crate::persist::{self, ProjectRecord};
use crate::playback::wrap_time;
use crate::project::Project;
use crate::track::{Track, TrackOps};
use crate::transport::Transport;

/// Where a held live note went, so its release reaches the same track even
/// after the play head has moved on to another pattern.
#[derive(Debug, Clone)]
struct HeldNote {
    pattern: PatternId,
    track: usize,
    /// Song time at which that pass of the pattern began
    origin: f64,
    recorded: bool,
}

pub struct Session {
    project: Arc<RwLock<Project>>,
    transport: Arc<dyn Transport>,
    clock: ClockState,
    history: UndoHistory<ProjectRecord>,
    /// Live notes currently down, keyed by `(channel, note)`
    held: HashMap<(u8, u8), HeldNote>,
    selected_track: usize,
    recording: bool,
    project_file: PathBuf,
}

impl Session {
    pub fn new(
        project: Arc<RwLock<Project>>,
        transport: Arc<dyn Transport>,
        clock: ClockState,
        history_limit: Option<usize>,
        project_file: PathBuf,
    ) -> Self {
        let mut history = UndoHistory::new(history_limit);
        history.push(&*project.read());
        Self {
            project,
            transport,
            clock,
            history,
            held: HashMap::new(),
            selected_track: 0,
            recording: true,
            project_file,
        }
    }

    pub fn project(&self) -> &Arc<RwLock<Project>> {
        &self.project
    }

    pub fn history(&self) -> &UndoHistory<ProjectRecord> {
        &self.history
    }

    pub fn selected_track(&self) -> usize {
        self.selected_track
    }

    pub fn select_track(&mut self, index: usize) {
        self.release_all();
        self.selected_track = index;
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }

    /// With recording off, live notes only sound.
    pub fn set_recording(&mut self, recording: bool) {
        self.recording = recording;
    }

    pub fn held_notes(&self) -> usize {
        self.held.len()
    }

    /// Apply events until a quit arrives. Timeouts just loop.
    pub fn run(&mut self, queue: &InputQueue) {
        loop {
            let Some(event) = queue.poll() else {
                continue;
            };
            if !self.apply(event) {
                break;
            }
        }
    }

    /// Apply one event. Returns false when the session should end.
    pub fn apply(&mut self, event: InputEvent) -> bool {
        match event {
            InputEvent::NoteOn { channel, note, velocity } => self.note_on(channel, note, velocity),
            InputEvent::NoteOff { channel, note } => self.note_off(channel, note),
            InputEvent::PitchBend { channel, value } => self.pitch_bend(channel, value),
            InputEvent::Control { channel, param, value } => self.control(channel, param, value),
            InputEvent::TogglePlay => self.clock.toggle(),
            InputEvent::Stop => self.clock.stop(),
            InputEvent::Undo => {
                self.undo();
            }
            InputEvent::Redo => {
                self.redo();
            }
            InputEvent::Save => {
                if let Err(e) = self.save() {
                    warn!("Failed to save project: {}", e);
                }
            }
            InputEvent::SelectTrack(index) => self.select_track(index),
            InputEvent::ToggleRecord => {
                self.recording = !self.recording;
                info!(recording = self.recording, "Record mode changed");
            }
            InputEvent::Quit => return false,
        }
        true
    }

    /// Pattern under the play head and the time inside it. Falls back to the
    /// first pattern when nothing is sequenced.
    fn target(&self, project: &Project, position: f64) -> Option<(PatternId, f64)> {
        let (pattern, local) = match project.locate(position) {
            Some(found) => found,
            None => {
                let pattern = project.patterns().first()?;
                (pattern, wrap_time(position, pattern.length() as f64))
            }
        };
        Some((pattern.id().clone(), local))
    }

    /// Run `f` on one track of one pattern. Misses are silent.
    fn with_pattern_track(
        &self,
        id: &PatternId,
        index: usize,
        f: impl FnOnce(&mut Track, &dyn Transport),
    ) {
        let transport = &*self.transport;
        self.project.write().edit_pattern(id, |pattern| {
            if let Some(track) = pattern.track_mut(index) {
                f(track, transport);
            }
        });
    }

    /// Run `f` on the selected track under the play head.
    fn with_track(&self, f: impl FnOnce(&mut Track, &dyn Transport, Option<f64>)) {
        let Some((id, local)) = self.target(&self.project.read(), self.clock.position()) else {
            return;
        };
        let time = self.recording.then_some(local);
        self.with_pattern_track(&id, self.selected_track, |track, transport| {
            f(track, transport, time)
        });
    }

    pub fn note_on(&mut self, channel: u8, note: u8, velocity: u8) {
        if self.held.contains_key(&(channel, note)) {
            return;
        }
        let position = self.clock.position();
        let Some((pattern, local)) = self.target(&self.project.read(), position) else {
            return;
        };
        let held = HeldNote {
            pattern,
            track: self.selected_track,
            origin: position - local,
            recorded: self.recording,
        };
        let time = held.recorded.then_some(local);
        self.with_pattern_track(&held.pattern, held.track, |track, transport| {
            track.note_on(transport, time, channel, note, velocity)
        });
        self.held.insert((channel, note), held);
    }

    /// Releases on the track the note started on. Pushes an undo snapshot
    /// once the last held note is released.
    pub fn note_off(&mut self, channel: u8, note: u8) {
        let Some(held) = self.held.remove(&(channel, note)) else {
            return;
        };
        let time = held
            .recorded
            .then(|| self.clock.position() - held.origin);
        self.with_pattern_track(&held.pattern, held.track, |track, transport| {
            track.note_off(transport, time, channel, note)
        });
        if self.held.is_empty() {
            self.push_undo();
        }
    }

    pub fn pitch_bend(&mut self, channel: u8, value: i32) {
        self.with_track(|track, transport, time| {
            if let Track::Event(track) = track {
                track.pitch_bend(transport, time, value, channel);
            }
        });
    }

    pub fn control(&mut self, channel: u8, param: u8, value: u8) {
        self.with_track(|track, transport, time| {
            if let Track::Event(track) = track {
                track.control(transport, time, value, param, channel);
            }
        });
    }

    /// Release every held note.
    fn release_all(&mut self) {
        let held: Vec<(u8, u8)> = self.held.keys().copied().collect();
        for (channel, note) in held {
            self.note_off(channel, note);
        }
    }

    /// Apply an arbitrary edit to the project and record an undo step.
    pub fn edit<R>(&mut self, f: impl FnOnce(&mut Project, &dyn Transport) -> R) -> R {
        let result = {
            let mut project = self.project.write();
            f(&mut project, &*self.transport)
        };
        self.push_undo();
        result
    }

    pub fn set_tempo(&mut self, bpm: f64) {
        let tempo = self.edit(|project, _| {
            project.set_tempo(bpm);
            project.tempo()
        });
        self.clock.set_bpm(tempo);
    }

    fn push_undo(&mut self) {
        let project = self.project.read();
        if self.history.push(&*project) {
            debug!(snapshots = self.history.len(), "Undo snapshot");
        }
    }

    pub fn undo(&mut self) -> bool {
        let mut project = self.project.write();
        match self.history.pop_undo(&mut *project, &*self.transport) {
            Ok(done) => {
                self.clock.set_bpm(project.tempo());
                done
            }
            Err(e) => {
                warn!("Undo failed: {}", e);
                false
            }
        }
    }

    pub fn redo(&mut self) -> bool {
        let mut project = self.project.write();
        match self.history.redo(&mut *project, &*self.transport) {
            Ok(done) => {
                self.clock.set_bpm(project.tempo());
                done
            }
            Err(e) => {
                warn!("Redo failed: {}", e);
                false
            }
        }
    }

    pub fn save(&self) -> Result<(), LoadError> {
        let record = self.project.read().dump();
        persist::save_project(&self.project_file, &record)
    }

    /// Replace the project from a file. On error the current project stays.
    pub fn load(&mut self, path: &Path) -> Result<(), LoadError> {
        let record = persist::load_project(path)?;
        {
            let mut project = self.project.write();
            project.load(&record, &*self.transport)?;
            self.clock.set_bpm(project.tempo());
        }
        self.held.clear();
        self.history.clear();
        self.push_undo();
        self.project_file = path.to_path_buf();
        Ok(())
    }
}
