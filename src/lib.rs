//! patseq: a pattern-based MIDI step sequencer.
//!
//! Tracks hold raw note data and derive a sorted playback schedule from it.
//! Patterns group tracks of one length, and a project arranges patterns into
//! a song. A player thread feeds `[prev, curr)` windows of song time to the
//! project while a single editing session applies live input.

pub mod clock;
pub mod config;
pub mod error;
pub mod history;
pub mod input;
pub mod midi;
pub mod pattern;
pub mod persist;
pub mod playback;
pub mod project;
pub mod quantize;
pub mod session;
pub mod track;
pub mod transport;
