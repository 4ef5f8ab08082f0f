//! Hardware MIDI ports via midir.

use midir::{MidiInput, MidiInputConnection, MidiOutputConnection};

use super::MidiOutput;
use crate::error::{Error, Result};

/// A discovered MIDI port.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PortInfo {
    pub name: String,
    pub index: usize,
}

/// List available MIDI input ports.
pub fn list_input_ports() -> Result<Vec<PortInfo>> {
    let midi_in =
        MidiInput::new("groovelock-probe").map_err(|e| Error::Midi(format!("Failed to create MIDI input: {}", e)))?;

    Ok(midi_in
        .ports()
        .iter()
        .enumerate()
        .map(|(index, port)| PortInfo {
            name: midi_in
                .port_name(port)
                .unwrap_or_else(|_| format!("Unknown Device {}", index)),
            index,
        })
        .collect())
}

/// List available MIDI output ports.
pub fn list_output_ports() -> Result<Vec<PortInfo>> {
    let midi_out = midir::MidiOutput::new("groovelock-probe")
        .map_err(|e| Error::Midi(format!("Failed to create MIDI output: {}", e)))?;

    Ok(midi_out
        .ports()
        .iter()
        .enumerate()
        .map(|(index, port)| PortInfo {
            name: midi_out
                .port_name(port)
                .unwrap_or_else(|_| format!("Unknown Device {}", index)),
            index,
        })
        .collect())
}

fn find_port(ports: &[PortInfo], pattern: &str) -> Result<usize> {
    let pattern_lower = pattern.to_lowercase();
    ports
        .iter()
        .find(|p| p.name.to_lowercase().contains(&pattern_lower))
        .map(|p| p.index)
        .ok_or_else(|| Error::Midi(format!("No MIDI port found matching '{}'", pattern)))
}

/// Output port connection.
pub struct MidirOutput {
    name: String,
    connection: MidiOutputConnection,
}

impl MidirOutput {
    /// Connect to the first output port whose name contains `pattern`
    /// (case-insensitive).
    pub fn connect(client_name: &str, pattern: &str) -> Result<Self> {
        let index = find_port(&list_output_ports()?, pattern)?;
        let midi_out = midir::MidiOutput::new(client_name)
            .map_err(|e| Error::Midi(format!("Failed to create MIDI output: {}", e)))?;

        let ports = midi_out.ports();
        let port = ports
            .get(index)
            .ok_or_else(|| Error::Midi(format!("Invalid MIDI port index: {}", index)))?;
        let name = midi_out
            .port_name(port)
            .unwrap_or_else(|_| format!("Unknown Device {}", index));

        let connection = midi_out
            .connect(port, "groovelock-out")
            .map_err(|e| Error::Midi(format!("Failed to connect to MIDI device: {}", e)))?;

        log::info!("[MIDI] Connected output: {} (port {})", name, index);
        Ok(Self { name, connection })
    }
}

impl MidiOutput for MidirOutput {
    fn send_raw(&mut self, bytes: &[u8]) -> Result<()> {
        self.connection
            .send(bytes)
            .map_err(|e| Error::Transport(e.to_string()))
    }

    fn port_name(&self) -> &str {
        &self.name
    }
}

/// Keeps an input connection open; dropping it closes the port.
pub struct InputBinding {
    name: String,
    _connection: MidiInputConnection<()>,
}

impl InputBinding {
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Open the first input port matching `pattern` and feed every raw message
/// to `callback`.
///
/// The callback runs on the backend's thread; it should hand the bytes off
/// without blocking.
pub fn connect_input<F>(client_name: &str, pattern: &str, mut callback: F) -> Result<InputBinding>
where
    F: FnMut(&[u8]) + Send + 'static,
{
    let index = find_port(&list_input_ports()?, pattern)?;
    let midi_in =
        MidiInput::new(client_name).map_err(|e| Error::Midi(format!("Failed to create MIDI input: {}", e)))?;

    let ports = midi_in.ports();
    let port = ports
        .get(index)
        .ok_or_else(|| Error::Midi(format!("Invalid MIDI port index: {}", index)))?;
    let name = midi_in
        .port_name(port)
        .unwrap_or_else(|_| format!("Unknown Device {}", index));

    let connection = midi_in
        .connect(
            port,
            "groovelock-in",
            move |_timestamp, bytes, _| {
                log::trace!("[MIDI RAW] {:02X?}", bytes);
                callback(bytes);
            },
            (),
        )
        .map_err(|e| Error::Midi(format!("Failed to connect to MIDI device: {}", e)))?;

    log::info!("[MIDI] Connected input: {} (port {})", name, index);
    Ok(InputBinding {
        name,
        _connection: connection,
    })
}
