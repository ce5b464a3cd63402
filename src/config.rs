//! Configuration persistence for the sequencer.
//!
//! Saves and loads settings to/from a YAML file. Every field has a default,
//! so a missing file or a partial file is never an error.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::clock::PlayerTiming;

/// Complete sequencer configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeqConfig {
    /// MIDI client name shown to other applications
    pub client_name: String,
    /// Player tick period while playing, in milliseconds
    pub tick_ms: u64,
    /// Player poll period while paused, in milliseconds
    pub idle_ms: u64,
    /// Longest wait for live input before the editing loop looks around
    pub input_timeout_ms: u64,
    pub input_queue_capacity: usize,
    /// Cap on undo snapshots (None = unbounded, never below two)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub history_limit: Option<usize>,
    /// Project file, relative to the working directory or absolute
    pub project_file: PathBuf,
    /// Tempo of a freshly created project
    pub default_tempo: f64,
    /// Output port new tracks are created on
    pub default_port: String,
    /// Input port name filter; empty connects every input
    pub input_port: String,
}

impl Default for SeqConfig {
    fn default() -> Self {
        Self {
            client_name: "patseq".to_string(),
            tick_ms: 10,
            idle_ms: 50,
            input_timeout_ms: 300,
            input_queue_capacity: 256,
            history_limit: None,
            project_file: PathBuf::from("project.yaml"),
            default_tempo: 120.0,
            default_port: String::new(),
            input_port: String::new(),
        }
    }
}

impl SeqConfig {
    /// Get the default config file path.
    pub fn default_path() -> PathBuf {
        PathBuf::from("patseq.yaml")
    }

    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config YAML {}", path.display()))
    }

    /// Save configuration to a YAML file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let content = serde_yaml::to_string(self).context("Failed to serialize config")?;

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file {}", path.display()))
    }

    pub fn player_timing(&self) -> PlayerTiming {
        PlayerTiming {
            tick: Duration::from_millis(self.tick_ms.max(1)),
            idle: Duration::from_millis(self.idle_ms.max(1)),
        }
    }

    pub fn input_timeout(&self) -> Duration {
        Duration::from_millis(self.input_timeout_ms)
    }
}
