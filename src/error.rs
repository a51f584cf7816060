//! Centralized error type for the jamrouter umbrella crate.
//!
//! Wraps all subsystem errors so `?` propagates naturally across crate boundaries.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Core(#[from] jamrouter_core::Error),

    #[error("MIDI: {0}")]
    Midi(#[from] jamrouter_midi::Error),

    #[error(transparent)]
    Router(#[from] jamrouter_io::Error),

    #[error("Config: {0}")]
    Config(String),

    #[error("Config file: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Logging: {0}")]
    Logging(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
