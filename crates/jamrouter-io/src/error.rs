//! Error types for transports, audio drivers and router threads.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("MIDI device error: {0}")]
    MidiDevice(String),

    #[error("MIDI port error: {0}")]
    MidiPort(String),

    #[error("Audio device error: {0}")]
    AudioDevice(String),

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Device disconnected: {0}")]
    Disconnected(String),

    #[error("Timed out waiting for {0}")]
    Timeout(String),

    #[error("Failed to spawn thread: {0}")]
    ThreadSpawn(String),

    #[error(transparent)]
    Core(#[from] jamrouter_core::Error),

    #[error(transparent)]
    Midi(#[from] jamrouter_midi::Error),
}

#[cfg(feature = "midi-io")]
impl From<midir::InitError> for Error {
    fn from(e: midir::InitError) -> Self {
        Error::MidiDevice(e.to_string())
    }
}

#[cfg(feature = "midi-io")]
impl From<midir::ConnectError<midir::MidiOutput>> for Error {
    fn from(e: midir::ConnectError<midir::MidiOutput>) -> Self {
        Error::MidiPort(e.to_string())
    }
}

#[cfg(feature = "midi-io")]
impl From<midir::ConnectError<midir::MidiInput>> for Error {
    fn from(e: midir::ConnectError<midir::MidiInput>) -> Self {
        Error::MidiPort(e.to_string())
    }
}

#[cfg(feature = "midi-io")]
impl From<midir::SendError> for Error {
    fn from(e: midir::SendError) -> Self {
        Error::MidiPort(e.to_string())
    }
}

#[cfg(feature = "audio-io")]
impl From<cpal::DefaultStreamConfigError> for Error {
    fn from(e: cpal::DefaultStreamConfigError) -> Self {
        Error::AudioDevice(e.to_string())
    }
}

#[cfg(feature = "audio-io")]
impl From<cpal::BuildStreamError> for Error {
    fn from(e: cpal::BuildStreamError) -> Self {
        Error::AudioDevice(e.to_string())
    }
}

#[cfg(feature = "audio-io")]
impl From<cpal::PlayStreamError> for Error {
    fn from(e: cpal::PlayStreamError) -> Self {
        Error::AudioDevice(e.to_string())
    }
}

#[cfg(feature = "audio-io")]
impl From<cpal::DevicesError> for Error {
    fn from(e: cpal::DevicesError) -> Self {
        Error::AudioDevice(e.to_string())
    }
}

#[cfg(feature = "audio-io")]
impl From<cpal::DeviceNameError> for Error {
    fn from(e: cpal::DeviceNameError) -> Self {
        Error::AudioDevice(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
