//! Persisted project shape and YAML file IO.
//!
//! Records mirror the in-memory structure but never carry derived data
//! (schedules, timeline index, port handles). They double as undo snapshots,
//! so they compare structurally.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::LoadError;
use crate::track::{Entry, OutputChannel};

fn default_tempo() -> f64 {
    120.0
}

/// Step track: cells as a string, one char per beat (' ' or '1'-'4').
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepTrackRecord {
    pub name: String,
    #[serde(default)]
    pub port_name: String,
    /// Stored as 0-15, or 256 for pass-through
    #[serde(default)]
    pub channel: OutputChannel,
    pub note: u8,
    pub cells: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventTrackRecord {
    pub name: String,
    #[serde(default)]
    pub port_name: String,
    #[serde(default)]
    pub channel: OutputChannel,
    pub length: usize,
    #[serde(default)]
    pub entries: Vec<Entry>,
    /// Empty means no quantization on any beat
    #[serde(default)]
    pub quantize: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TrackRecord {
    Step(StepTrackRecord),
    Event(EventTrackRecord),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternRecord {
    /// Empty ids get a fresh one on load
    #[serde(default)]
    pub id: String,
    pub name: String,
    pub length: usize,
    #[serde(default)]
    pub tracks: Vec<TrackRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectRecord {
    pub name: String,
    #[serde(default = "default_tempo")]
    pub tempo: f64,
    #[serde(default)]
    pub patterns: Vec<PatternRecord>,
    /// Pattern ids in song order, repeats allowed
    #[serde(default)]
    pub play_sequence: Vec<String>,
}

/// Load a project record from a YAML file.
pub fn load_project<P: AsRef<Path>>(path: P) -> Result<ProjectRecord, LoadError> {
    let path = path.as_ref();
    let content = fs::read_to_string(path)?;
    let record = serde_yaml::from_str(&content)?;
    info!("Loaded project from {}", path.display());
    Ok(record)
}

/// Save a project record to a YAML file.
pub fn save_project<P: AsRef<Path>>(path: P, record: &ProjectRecord) -> Result<(), LoadError> {
    let path = path.as_ref();
    let content = serde_yaml::to_string(record)?;
    fs::write(path, content)?;
    info!("Saved project to {}", path.display());
    Ok(())
}
