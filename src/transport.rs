//! The output transport collaborator.
//!
//! The sequencing engine never talks to MIDI hardware directly. Every message
//! goes through a [`Transport`] handle passed in by the caller, which lets the
//! real midir backend be swapped for a recording fake in tests.

use std::collections::BTreeMap;

/// Opaque handle for an opened output port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PortHandle(pub usize);

/// Sink for outgoing MIDI messages.
///
/// Sends never block and never fail from the caller's point of view:
/// implementations log and drop anything they cannot deliver.
pub trait Transport: Send + Sync {
    /// Open (or return the already opened) output port with this name.
    fn open_output_port(&self, name: &str) -> Option<PortHandle>;

    fn send_note_on(&self, port: PortHandle, note: u8, channel: u8, velocity: u8);

    fn send_note_off(&self, port: PortHandle, note: u8, channel: u8);

    fn send_control_change(&self, port: PortHandle, value: u8, param: u8, channel: u8);

    /// `value` is signed, centred on zero (-8192..=8191).
    fn send_pitch_bend(&self, port: PortHandle, value: i32, channel: u8);

    /// All currently opened output ports by name.
    fn list_available_ports(&self) -> BTreeMap<String, PortHandle>;

    /// Resolve a configured port name to a handle.
    fn resolve(&self, name: &str) -> Option<PortHandle> {
        self.list_available_ports().get(name).copied()
    }
}

/// Transport with no ports. Everything sent to it is dropped.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullTransport;

impl Transport for NullTransport {
    fn open_output_port(&self, _name: &str) -> Option<PortHandle> {
        None
    }

    fn send_note_on(&self, _port: PortHandle, _note: u8, _channel: u8, _velocity: u8) {}

    fn send_note_off(&self, _port: PortHandle, _note: u8, _channel: u8) {}

    fn send_control_change(&self, _port: PortHandle, _value: u8, _param: u8, _channel: u8) {}

    fn send_pitch_bend(&self, _port: PortHandle, _value: i32, _channel: u8) {}

    fn list_available_ports(&self) -> BTreeMap<String, PortHandle> {
        BTreeMap::new()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use parking_lot::Mutex;

    /// A message captured by [`RecordingTransport`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
    pub enum Sent {
        NoteOn { port: usize, note: u8, channel: u8, velocity: u8 },
        NoteOff { port: usize, note: u8, channel: u8 },
        Control { port: usize, value: u8, param: u8, channel: u8 },
        PitchBend { port: usize, value: i32, channel: u8 },
    }

    /// Test double that records every message sent through it.
    #[derive(Default)]
    pub struct RecordingTransport {
        ports: Mutex<BTreeMap<String, PortHandle>>,
        sent: Mutex<Vec<Sent>>,
    }

    impl RecordingTransport {
        /// A transport with the given port names already opened.
        pub fn with_ports(names: &[&str]) -> Self {
            let transport = Self::default();
            for name in names {
                transport.open_output_port(name);
            }
            transport
        }

        /// Drain the captured messages.
        pub fn take(&self) -> Vec<Sent> {
            std::mem::take(&mut *self.sent.lock())
        }

        pub fn note_ons(&self) -> Vec<(u8, u8)> {
            self.take()
                .into_iter()
                .filter_map(|s| match s {
                    Sent::NoteOn { note, channel, .. } => Some((note, channel)),
                    _ => None,
                })
                .collect()
        }
    }

    impl Transport for RecordingTransport {
        fn open_output_port(&self, name: &str) -> Option<PortHandle> {
            let mut ports = self.ports.lock();
            let next = PortHandle(ports.len());
            Some(*ports.entry(name.to_string()).or_insert(next))
        }

        fn send_note_on(&self, port: PortHandle, note: u8, channel: u8, velocity: u8) {
            self.sent.lock().push(Sent::NoteOn { port: port.0, note, channel, velocity });
        }

        fn send_note_off(&self, port: PortHandle, note: u8, channel: u8) {
            self.sent.lock().push(Sent::NoteOff { port: port.0, note, channel });
        }

        fn send_control_change(&self, port: PortHandle, value: u8, param: u8, channel: u8) {
            self.sent.lock().push(Sent::Control { port: port.0, value, param, channel });
        }

        fn send_pitch_bend(&self, port: PortHandle, value: i32, channel: u8) {
            self.sent.lock().push(Sent::PitchBend { port: port.0, value, channel });
        }

        fn list_available_ports(&self) -> BTreeMap<String, PortHandle> {
            self.ports.lock().clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::RecordingTransport;
    use super::*;

    #[test]
    fn test_resolve_known_and_unknown_ports() {
        let transport = RecordingTransport::with_ports(&["Synth", "Drums"]);
        assert_eq!(transport.resolve("Synth"), Some(PortHandle(0)));
        assert_eq!(transport.resolve("Drums"), Some(PortHandle(1)));
        assert_eq!(transport.resolve("Missing"), None);
    }

    #[test]
    fn test_reopening_port_returns_same_handle() {
        let transport = RecordingTransport::default();
        let a = transport.open_output_port("Synth");
        let b = transport.open_output_port("Synth");
        assert_eq!(a, b);
    }

    #[test]
    fn test_null_transport_has_no_ports() {
        let transport = NullTransport;
        assert!(transport.list_available_ports().is_empty());
        assert_eq!(transport.resolve("anything"), None);
    }
}
