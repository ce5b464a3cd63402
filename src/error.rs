//! Structural load errors.
//!
//! Only malformed persisted state is reported as an error. Lookup misses and
//! out-of-range edits are silent no-ops, and transport failures are logged.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read project file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse project YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("{what} has zero length")]
    ZeroLength { what: String },

    #[error("track '{track}' has invalid cell {cell:?}")]
    InvalidCell { track: String, cell: char },

    #[error("track '{track}' has {found} quantize values but length {length}")]
    QuantizeMapLength {
        track: String,
        found: usize,
        length: usize,
    },

    #[error("track '{track}' has invalid quantize code {code}")]
    InvalidQuantize { track: String, code: u8 },

    #[error("track '{track}' has an event at {time} outside [0, {length})")]
    EntryOutOfRange {
        track: String,
        time: f64,
        length: usize,
    },

    #[error("track '{track}' has length {found} inside a pattern of length {length}")]
    TrackLength {
        track: String,
        found: usize,
        length: usize,
    },

    #[error("play sequence references unknown pattern '{0}'")]
    UnknownPattern(String),

    #[error("pattern id '{0}' is used more than once")]
    DuplicatePattern(String),

    #[error("invalid MIDI file: {0}")]
    Midi(String),
}
