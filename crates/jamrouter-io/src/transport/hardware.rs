//! Hardware transport through `midir`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, TryRecvError};
use midir::{Ignore, MidiInput, MidiInputConnection, MidiOutput, MidiOutputConnection};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{ByteReader, ByteWriter, MidiTransport};
use crate::{Error, Result};

const INPUT_CAPACITY: usize = 1024;

/// Port selection. Names match by substring; `None` takes the first port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MidirTransportConfig {
    pub client_name: String,
    pub input_port: Option<String>,
    pub output_port: Option<String>,
}

impl Default for MidirTransportConfig {
    fn default() -> Self {
        Self {
            client_name: "jamrouter".to_string(),
            input_port: None,
            output_port: None,
        }
    }
}

#[derive(Debug)]
pub struct MidirTransport {
    config: MidirTransportConfig,
    present: Arc<AtomicBool>,
    last_ports: Mutex<Vec<String>>,
}

impl MidirTransport {
    pub fn new(config: MidirTransportConfig) -> Self {
        Self {
            config,
            present: Arc::new(AtomicBool::new(true)),
            last_ports: Mutex::new(Vec::new()),
        }
    }

    pub fn list_input_ports() -> Result<Vec<String>> {
        let midi_in = MidiInput::new("jamrouter-device-list")?;
        Ok(midi_in
            .ports()
            .iter()
            .enumerate()
            .map(|(i, p)| midi_in.port_name(p).unwrap_or_else(|_| format!("Device {i}")))
            .collect())
    }

    pub fn list_output_ports() -> Result<Vec<String>> {
        let midi_out = MidiOutput::new("jamrouter-device-list")?;
        Ok(midi_out
            .ports()
            .iter()
            .enumerate()
            .map(|(i, p)| midi_out.port_name(p).unwrap_or_else(|_| format!("Device {i}")))
            .collect())
    }

    fn wanted_present(&self, inputs: &[String], outputs: &[String]) -> bool {
        let found = |ports: &[String], want: &Option<String>| match want {
            Some(name) => ports.iter().any(|p| p.contains(name.as_str())),
            None => !ports.is_empty(),
        };
        found(inputs, &self.config.input_port) && found(outputs, &self.config.output_port)
    }
}

fn select<'a, P>(ports: &'a [P], names: &[String], want: &Option<String>) -> Option<(&'a P, String)> {
    let index = match want {
        Some(name) => names.iter().position(|n| n.contains(name.as_str()))?,
        None => 0,
    };
    Some((ports.get(index)?, names.get(index)?.clone()))
}

impl MidiTransport for MidirTransport {
    fn name(&self) -> &str {
        &self.config.client_name
    }

    fn open_input(&self) -> Result<Box<dyn ByteReader>> {
        let mut midi_in = MidiInput::new(&self.config.client_name)?;
        midi_in.ignore(Ignore::None);

        let ports = midi_in.ports();
        let names: Vec<String> = ports
            .iter()
            .enumerate()
            .map(|(i, p)| midi_in.port_name(p).unwrap_or_else(|_| format!("Device {i}")))
            .collect();
        let (port, name) = select(&ports, &names, &self.config.input_port).ok_or_else(|| {
            Error::MidiDevice(format!(
                "MIDI input {:?} not found",
                self.config.input_port.as_deref().unwrap_or("(any)")
            ))
        })?;

        let (tx, rx) = bounded::<Vec<u8>>(INPUT_CAPACITY);
        let connection = midi_in.connect(
            port,
            "jamrouter-rx",
            move |_timestamp, message, _| {
                if tx.try_send(message.to_vec()).is_err() {
                    debug!(target: "jamrouter::driver", "MIDI input channel full, dropping message");
                }
            },
            (),
        )?;
        info!(target: "jamrouter::driver", port = %name, "MIDI input connected");
        self.present.store(true, Ordering::Release);

        Ok(Box::new(MidirReader {
            _connection: connection,
            input: rx,
            pending: Vec::new(),
            offset: 0,
            present: Arc::clone(&self.present),
            name,
        }))
    }

    fn open_output(&self) -> Result<Box<dyn ByteWriter>> {
        let midi_out = MidiOutput::new(&self.config.client_name)?;
        let ports = midi_out.ports();
        let names: Vec<String> = ports
            .iter()
            .enumerate()
            .map(|(i, p)| midi_out.port_name(p).unwrap_or_else(|_| format!("Device {i}")))
            .collect();
        let (port, name) = select(&ports, &names, &self.config.output_port).ok_or_else(|| {
            Error::MidiDevice(format!(
                "MIDI output {:?} not found",
                self.config.output_port.as_deref().unwrap_or("(any)")
            ))
        })?;
        let connection = midi_out.connect(port, "jamrouter-tx")?;
        info!(target: "jamrouter::driver", port = %name, "MIDI output connected");

        Ok(Box::new(MidirWriter {
            connection,
            present: Arc::clone(&self.present),
            name,
        }))
    }

    fn watchdog(&self) -> bool {
        let (Ok(inputs), Ok(outputs)) = (Self::list_input_ports(), Self::list_output_ports()) else {
            return false;
        };
        let mut current = inputs.clone();
        current.extend(outputs.iter().cloned());

        let mut last = self.last_ports.lock();
        if *last == current {
            return false;
        }
        let first_poll = last.is_empty();
        *last = current;

        let present = self.wanted_present(&inputs, &outputs);
        let was_present = self.present.swap(present, Ordering::AcqRel);
        debug!(target: "jamrouter::driver", present, "MIDI port list changed");
        !first_poll && present && !was_present
    }
}

struct MidirReader {
    _connection: MidiInputConnection<()>,
    input: Receiver<Vec<u8>>,
    pending: Vec<u8>,
    offset: usize,
    present: Arc<AtomicBool>,
    name: String,
}

impl ByteReader for MidirReader {
    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        if !self.present.load(Ordering::Acquire) {
            return Err(Error::Disconnected(self.name.clone()));
        }
        if self.offset >= self.pending.len() {
            match self.input.recv_timeout(timeout) {
                Ok(bytes) => {
                    self.pending = bytes;
                    self.offset = 0;
                }
                Err(RecvTimeoutError::Timeout) => return Ok(0),
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(Error::Disconnected(self.name.clone()))
                }
            }
        }
        let n = (self.pending.len() - self.offset).min(buf.len());
        buf[..n].copy_from_slice(&self.pending[self.offset..self.offset + n]);
        self.offset += n;
        Ok(n)
    }

    fn flush(&mut self) -> Result<()> {
        self.pending.clear();
        self.offset = 0;
        loop {
            match self.input.try_recv() {
                Ok(_) => {}
                Err(TryRecvError::Empty) => return Ok(()),
                Err(TryRecvError::Disconnected) => {
                    return Err(Error::Disconnected(self.name.clone()))
                }
            }
        }
    }
}

struct MidirWriter {
    connection: MidiOutputConnection,
    present: Arc<AtomicBool>,
    name: String,
}

impl ByteWriter for MidirWriter {
    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        if !self.present.load(Ordering::Acquire) {
            return Err(Error::Disconnected(self.name.clone()));
        }
        self.connection.send(bytes)?;
        Ok(())
    }

    /// midir sends whole messages only.
    fn raw_bytes(&self) -> bool {
        false
    }
}
