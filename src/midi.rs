//! MIDI protocol constants and the midir-backed transport.
//!
//! Channel messages are encoded by hand into raw status/data bytes, following
//! the MIDI 1.0 wire format.

use std::collections::BTreeMap;

use anyhow::{anyhow, Context, Result};
use midir::{MidiOutput, MidiOutputConnection};
use parking_lot::Mutex;
use tracing::{info, warn};

use crate::transport::{PortHandle, Transport};

/// Note Off status (high nibble)
pub const NOTE_OFF: u8 = 0x80;

/// Note On status (high nibble)
pub const NOTE_ON: u8 = 0x90;

/// Control Change status (high nibble)
pub const CONTROL_CHANGE: u8 = 0xB0;

/// Pitch Bend status (high nibble)
pub const PITCH_BEND: u8 = 0xE0;

/// Centre of the 14-bit pitch bend range.
pub const PITCH_BEND_CENTER: i32 = 8192;

/// Sentinel channel number meaning "keep the recorded channel".
/// MIDI only has 16 channels, so anything above 255 is safe.
pub const CHANNEL_PASSTHROUGH: u16 = 256;

pub fn note_on_message(note: u8, channel: u8, velocity: u8) -> [u8; 3] {
    [NOTE_ON | (channel & 0x0F), note & 0x7F, velocity & 0x7F]
}

pub fn note_off_message(note: u8, channel: u8) -> [u8; 3] {
    [NOTE_OFF | (channel & 0x0F), note & 0x7F, 0]
}

pub fn control_change_message(value: u8, param: u8, channel: u8) -> [u8; 3] {
    [CONTROL_CHANGE | (channel & 0x0F), param & 0x7F, value & 0x7F]
}

/// Encode a signed bend (-8192..=8191) as LSB/MSB 7-bit pairs.
pub fn pitch_bend_message(value: i32, channel: u8) -> [u8; 3] {
    let raw = (value + PITCH_BEND_CENTER).clamp(0, 0x3FFF) as u16;
    [
        PITCH_BEND | (channel & 0x0F),
        (raw & 0x7F) as u8,
        ((raw >> 7) & 0x7F) as u8,
    ]
}

/// One opened midir output.
struct OpenPort {
    name: String,
    connection: MidiOutputConnection,
}

/// Transport that sends through midir output connections.
///
/// Handles are indices into the list of opened connections, in opening order.
pub struct MidirTransport {
    client_name: String,
    ports: Mutex<Vec<OpenPort>>,
}

impl MidirTransport {
    pub fn new(client_name: &str) -> Self {
        Self {
            client_name: client_name.to_string(),
            ports: Mutex::new(Vec::new()),
        }
    }

    /// Names of all output ports the system currently offers.
    pub fn system_port_names(&self) -> Result<Vec<String>> {
        let midi_out = MidiOutput::new(&self.client_name)
            .map_err(|e| anyhow!("Failed to create MIDI output: {}", e))?;
        Ok(midi_out
            .ports()
            .iter()
            .filter_map(|p| midi_out.port_name(p).ok())
            .collect())
    }

    /// Open a connection to every output port not opened yet.
    pub fn connect_all(&self) -> Result<usize> {
        let names = self.system_port_names()?;
        let mut opened = 0;
        for name in names {
            if self.open_output_port(&name).is_some() {
                opened += 1;
            }
        }
        Ok(opened)
    }

    fn connect(&self, name: &str) -> Result<MidiOutputConnection> {
        let midi_out = MidiOutput::new(&self.client_name)
            .map_err(|e| anyhow!("Failed to create MIDI output: {}", e))?;

        let port = midi_out
            .ports()
            .into_iter()
            .find(|p| midi_out.port_name(p).ok().as_deref() == Some(name))
            .with_context(|| format!("MIDI output port '{}' not found", name))?;

        midi_out
            .connect(&port, &format!("{}-out", self.client_name))
            .map_err(|e| anyhow!("Failed to connect MIDI output: {}", e))
    }

    fn send(&self, port: PortHandle, message: &[u8]) {
        let mut ports = self.ports.lock();
        let Some(open) = ports.get_mut(port.0) else {
            return;
        };
        if let Err(e) = open.connection.send(message) {
            warn!(port = %open.name, "Failed to send MIDI: {}", e);
        }
    }
}

impl Transport for MidirTransport {
    fn open_output_port(&self, name: &str) -> Option<PortHandle> {
        if let Some(handle) = self.resolve(name) {
            return Some(handle);
        }

        match self.connect(name) {
            Ok(connection) => {
                let mut ports = self.ports.lock();
                ports.push(OpenPort {
                    name: name.to_string(),
                    connection,
                });
                info!("MIDI output connected to: {}", name);
                Some(PortHandle(ports.len() - 1))
            }
            Err(e) => {
                warn!("{:#}", e);
                None
            }
        }
    }

    fn send_note_on(&self, port: PortHandle, note: u8, channel: u8, velocity: u8) {
        self.send(port, &note_on_message(note, channel, velocity));
    }

    fn send_note_off(&self, port: PortHandle, note: u8, channel: u8) {
        self.send(port, &note_off_message(note, channel));
    }

    fn send_control_change(&self, port: PortHandle, value: u8, param: u8, channel: u8) {
        self.send(port, &control_change_message(value, param, channel));
    }

    fn send_pitch_bend(&self, port: PortHandle, value: i32, channel: u8) {
        self.send(port, &pitch_bend_message(value, channel));
    }

    fn list_available_ports(&self) -> BTreeMap<String, PortHandle> {
        self.ports
            .lock()
            .iter()
            .enumerate()
            .map(|(i, p)| (p.name.clone(), PortHandle(i)))
            .collect()
    }
}
