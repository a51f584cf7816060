//! Error types for jamrouter-core.

use thiserror::Error;

/// Error type for synchronization engine setup.
///
/// The realtime paths never return errors; these only come out of
/// configuration and (re)initialization.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Invalid sample rate: {0}")]
    InvalidSampleRate(u32),

    #[error("Unsupported period size: {0}. Must be a power of two between 16 and 2048")]
    UnsupportedPeriodSize(u32),

    #[error("Invalid latency: {rx} Rx / {tx} Tx periods with a {periods}-period ring")]
    InvalidLatency { rx: u32, tx: u32, periods: u32 },

    #[error("Clock recovery already has an active writer")]
    WriterTaken,
}

pub type Result<T> = std::result::Result<T, Error>;
