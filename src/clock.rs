//! Song clock and the transport thread.
//!
//! This module handles:
//! - Converting wall-clock time to song beats at the current tempo
//! - Accumulating the song position tick by tick ([`PlayHead`])
//! - Running the player thread that feeds `[prev, curr)` windows to a song
//!
//! # Thread Safety
//! [`ClockState`] is shared between the player thread and the editing thread.
//! All state is wrapped in atomic types; the song itself sits behind a
//! read-write lock and the player only ever takes the read side.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tracing::{info, warn};

use crate::playback::Playable;
use crate::transport::Transport;

/// Song beats per quarter note; a beat is an eighth note.
pub const BEATS_PER_QUARTER: f64 = 2.0;

/// Song beats covered by `elapsed` at `bpm` quarter notes per minute.
pub fn beats_for(elapsed: Duration, bpm: f64) -> f64 {
    elapsed.as_secs_f64() * bpm / 60.0 * BEATS_PER_QUARTER
}

/// Song position that advances from a monotonic clock.
///
/// Each tick adds the beats elapsed since the previous tick at the tempo
/// current at that moment, so tempo changes never jump the position.
#[derive(Debug, Default)]
pub struct PlayHead {
    position: f64,
    last: Option<Instant>,
}

impl PlayHead {
    pub fn position(&self) -> f64 {
        self.position
    }

    /// Advance to `now`, returning the window `(prev, curr)` just covered.
    /// The first tick after a pause covers nothing.
    pub fn advance_at(&mut self, now: Instant, bpm: f64) -> (f64, f64) {
        let prev = self.position;
        if let Some(last) = self.last {
            self.position += beats_for(now.saturating_duration_since(last), bpm);
        }
        self.last = Some(now);
        (prev, self.position)
    }

    /// Hold the position; the next tick restarts timing.
    pub fn pause(&mut self) {
        self.last = None;
    }

    /// Rewind to the start of the song.
    pub fn reset(&mut self) {
        self.position = 0.0;
        self.last = None;
    }
}

/// Transport state shared between the player thread and its controllers.
#[derive(Clone)]
pub struct ClockState {
    running: Arc<AtomicBool>,
    playing: Arc<AtomicBool>,
    rewind: Arc<AtomicBool>,
    bpm_x100: Arc<AtomicU64>,
    /// f64 bits of the song position
    position: Arc<AtomicU64>,
}

impl ClockState {
    pub fn new(bpm: f64) -> Self {
        let state = Self {
            running: Arc::new(AtomicBool::new(true)),
            playing: Arc::new(AtomicBool::new(false)),
            rewind: Arc::new(AtomicBool::new(false)),
            bpm_x100: Arc::new(AtomicU64::new(0)),
            position: Arc::new(AtomicU64::new(0.0f64.to_bits())),
        };
        state.set_bpm(bpm);
        state
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::SeqCst)
    }

    pub fn get_bpm(&self) -> f64 {
        self.bpm_x100.load(Ordering::SeqCst) as f64 / 100.0
    }

    pub fn set_bpm(&self, bpm: f64) {
        if bpm.is_finite() && bpm > 0.0 {
            self.bpm_x100
                .store((bpm * 100.0).round() as u64, Ordering::SeqCst);
        }
    }

    /// Song position as of the player's last tick.
    pub fn position(&self) -> f64 {
        f64::from_bits(self.position.load(Ordering::SeqCst))
    }

    pub(crate) fn set_position(&self, beats: f64) {
        self.position.store(beats.to_bits(), Ordering::SeqCst);
    }

    pub fn play(&self) {
        self.playing.store(true, Ordering::SeqCst);
    }

    pub fn pause(&self) {
        self.playing.store(false, Ordering::SeqCst);
    }

    /// Pause and rewind to the start of the song.
    pub fn stop(&self) {
        self.pause();
        self.rewind.store(true, Ordering::SeqCst);
    }

    pub fn toggle(&self) {
        self.playing.fetch_xor(true, Ordering::SeqCst);
    }

    fn quit(&self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

/// Timing of the player loop.
#[derive(Debug, Clone, Copy)]
pub struct PlayerTiming {
    /// Tick period while playing
    pub tick: Duration,
    /// Poll period while paused
    pub idle: Duration,
}

impl Default for PlayerTiming {
    fn default() -> Self {
        Self {
            tick: Duration::from_millis(10),
            idle: Duration::from_millis(50),
        }
    }
}

/// Handle to the transport thread.
///
/// The thread is the only caller of `play_range`. Pausing mutes the song, and
/// quitting mutes it before the thread exits so no note is left hanging.
pub struct Player {
    state: ClockState,
    handle: Option<JoinHandle<()>>,
}

impl Player {
    pub fn spawn<P>(
        song: Arc<RwLock<P>>,
        transport: Arc<dyn Transport>,
        state: ClockState,
        timing: PlayerTiming,
    ) -> Self
    where
        P: Playable + 'static,
    {
        let thread_state = state.clone();
        let handle = thread::Builder::new()
            .name("player".to_string())
            .spawn(move || run(&*song, &*transport, &thread_state, timing));
        let handle = match handle {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!("Failed to start player thread: {}", e);
                None
            }
        };
        Self { state, handle }
    }

    pub fn state(&self) -> &ClockState {
        &self.state
    }

    /// Stop the thread and wait for it to mute and exit.
    pub fn quit(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.state.quit();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Player thread panicked");
            }
        }
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run<P: Playable>(
    song: &RwLock<P>,
    transport: &dyn Transport,
    state: &ClockState,
    timing: PlayerTiming,
) {
    info!("Player started");
    let mut head = PlayHead::default();
    let mut sounding = false;

    while state.is_running() {
        if state.rewind.swap(false, Ordering::SeqCst) {
            if sounding {
                song.read().mute(transport);
            }
            head.reset();
            state.set_position(0.0);
        }

        if state.is_playing() {
            let (prev, curr) = head.advance_at(Instant::now(), state.get_bpm());
            if curr > prev {
                song.read().play_range(transport, prev, curr);
            }
            state.set_position(curr);
            sounding = true;
            thread::sleep(timing.tick);
        } else {
            if sounding {
                song.read().mute(transport);
                head.pause();
                sounding = false;
            }
            thread::sleep(timing.idle);
        }
    }

    song.read().mute(transport);
    info!("Player stopped");
}
