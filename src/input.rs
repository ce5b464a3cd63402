//! Live input: controller messages and user commands, queued for the
//! editing thread.
//!
//! Producers (midir callbacks, the command reader) push [`InputEvent`]s into
//! a bounded channel. The editing thread polls it with a timeout and treats
//! an empty wait as "nothing to do this tick".

use std::time::Duration;

use anyhow::{anyhow, Result};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use midir::{MidiInput, MidiInputConnection};
use midly::live::LiveEvent;
use midly::MidiMessage;
use tracing::{debug, info, warn};

/// A semantic input event.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InputEvent {
    NoteOn { channel: u8, note: u8, velocity: u8 },
    NoteOff { channel: u8, note: u8 },
    /// Signed bend, -8192..=8191
    PitchBend { channel: u8, value: i32 },
    Control { channel: u8, param: u8, value: u8 },
    /// Start or pause the player
    TogglePlay,
    /// Pause and rewind
    Stop,
    Undo,
    Redo,
    Save,
    /// Select the track at this index in the current pattern
    SelectTrack(usize),
    /// Toggle recording of live notes (off = preview only)
    ToggleRecord,
    Quit,
}

/// Parse raw MIDI bytes into an input event. System messages are ignored.
pub fn parse_midi(bytes: &[u8]) -> Option<InputEvent> {
    let LiveEvent::Midi { channel, message } = LiveEvent::parse(bytes).ok()? else {
        return None;
    };
    let channel = channel.as_int();
    match message {
        MidiMessage::NoteOn { key, vel } if vel.as_int() > 0 => Some(InputEvent::NoteOn {
            channel,
            note: key.as_int(),
            velocity: vel.as_int(),
        }),
        MidiMessage::NoteOn { key, .. } | MidiMessage::NoteOff { key, .. } => {
            Some(InputEvent::NoteOff {
                channel,
                note: key.as_int(),
            })
        }
        MidiMessage::PitchBend { bend } => Some(InputEvent::PitchBend {
            channel,
            value: i32::from(bend.as_int()),
        }),
        MidiMessage::Controller { controller, value } => Some(InputEvent::Control {
            channel,
            param: controller.as_int(),
            value: value.as_int(),
        }),
        _ => None,
    }
}

/// Parse one line of typed command input.
pub fn parse_command(line: &str) -> Option<InputEvent> {
    let line = line.trim();
    match line {
        "" | "p" | "play" => Some(InputEvent::TogglePlay),
        "s" | "stop" => Some(InputEvent::Stop),
        "u" | "undo" => Some(InputEvent::Undo),
        "r" | "redo" => Some(InputEvent::Redo),
        "w" | "save" => Some(InputEvent::Save),
        "rec" => Some(InputEvent::ToggleRecord),
        "q" | "quit" => Some(InputEvent::Quit),
        _ => line
            .strip_prefix('t')
            .and_then(|index| index.trim().parse().ok())
            .map(InputEvent::SelectTrack),
    }
}

/// Producer side of the input queue. Never blocks.
#[derive(Clone)]
pub struct InputSender(Sender<InputEvent>);

impl InputSender {
    /// Enqueue an event. Returns false if it was dropped.
    pub fn send(&self, event: InputEvent) -> bool {
        match self.0.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(event)) => {
                warn!("Input queue full, dropping {:?}", event);
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }
}

/// Bounded queue of input events.
pub struct InputQueue {
    sender: Sender<InputEvent>,
    receiver: Receiver<InputEvent>,
    timeout: Duration,
}

impl InputQueue {
    pub fn new(capacity: usize, timeout: Duration) -> Self {
        let (sender, receiver) = bounded(capacity.max(1));
        Self {
            sender,
            receiver,
            timeout,
        }
    }

    pub fn sender(&self) -> InputSender {
        InputSender(self.sender.clone())
    }

    /// Wait up to the queue timeout for the next event.
    pub fn poll(&self) -> Option<InputEvent> {
        match self.receiver.recv_timeout(self.timeout) {
            Ok(event) => Some(event),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Take everything already queued without waiting.
    pub fn drain(&self) -> Vec<InputEvent> {
        self.receiver.try_iter().collect()
    }
}

/// Live MIDI input connections feeding an [`InputQueue`].
pub struct MidiInputListener {
    connections: Vec<MidiInputConnection<()>>,
}

impl MidiInputListener {
    /// Connect to every input port whose name contains `filter`
    /// (all ports when `filter` is empty).
    pub fn connect(client_name: &str, filter: &str, sender: InputSender) -> Result<Self> {
        let probe = MidiInput::new(client_name)
            .map_err(|e| anyhow!("Failed to create MIDI input: {}", e))?;
        let names: Vec<String> = probe
            .ports()
            .iter()
            .filter_map(|p| probe.port_name(p).ok())
            .filter(|name| name.contains(filter))
            .collect();

        let mut connections = Vec::new();
        for name in names {
            match Self::connect_port(client_name, &name, sender.clone()) {
                Ok(connection) => {
                    info!("MIDI input connected to: {}", name);
                    connections.push(connection);
                }
                Err(e) => warn!("{:#}", e),
            }
        }
        if connections.is_empty() {
            info!("No MIDI input connected");
        }
        Ok(Self { connections })
    }

    fn connect_port(client_name: &str, name: &str, sender: InputSender) -> Result<MidiInputConnection<()>> {
        let midi_in = MidiInput::new(client_name)
            .map_err(|e| anyhow!("Failed to create MIDI input: {}", e))?;
        let port = midi_in
            .ports()
            .into_iter()
            .find(|p| midi_in.port_name(p).ok().as_deref() == Some(name))
            .ok_or_else(|| anyhow!("MIDI input port '{}' not found", name))?;

        midi_in
            .connect(
                &port,
                &format!("{}-in", client_name),
                move |_timestamp, message, _| match parse_midi(message) {
                    Some(event) => {
                        sender.send(event);
                    }
                    None => debug!("Ignoring MIDI input {:02X?}", message),
                },
                (),
            )
            .map_err(|e| anyhow!("Failed to connect MIDI input '{}': {}", name, e))
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }
}
