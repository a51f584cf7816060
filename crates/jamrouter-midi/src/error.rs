//! Error types for MIDI message decoding.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("Invalid status byte: {0:#04X}")]
    InvalidStatus(u8),

    #[error("Invalid data byte: {0:#04X}")]
    InvalidData(u8),

    #[error("Truncated message: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("Invalid translation map: {0}")]
    InvalidMap(String),
}

pub type Result<T> = std::result::Result<T, Error>;
