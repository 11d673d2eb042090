//! # Error Types
//!
//! This module defines error types used throughout the peripage library.
//!
//! Each layer has its own error enum so callers can match on the failure
//! they care about; [`PeripageError`] unifies them for the CLI.

use std::time::Duration;

use thiserror::Error;

use crate::transport::session::SessionState;

/// Malformed raster or text input. Never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodingError {
    #[error("raster width {width} is not a multiple of 8")]
    WidthNotByteAligned { width: u32 },

    #[error("raster height is zero")]
    EmptyRaster,

    #[error("raster width {width} exceeds printer width {max}")]
    TooWide { width: u32, max: u32 },

    #[error("raster buffer holds {actual} bytes, expected {expected}")]
    BufferLength { expected: usize, actual: usize },

    #[error("text has nothing printable")]
    EmptyText,
}

/// Invalid setup: MTU, encoder options, or a config file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("mtu {mtu} leaves no room for payload (link header is {overhead} bytes)")]
    MtuTooSmall { mtu: usize, overhead: usize },

    #[error("band height must be between 1 and 255, got {0}")]
    BandHeight(u16),

    #[error("flow control window must be at least 1")]
    ZeroWindow,

    #[error("unknown printer model '{0}'")]
    UnknownModel(String),

    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Failure while opening the channel or negotiating with the printer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    #[error("connection to {address} refused: {reason}")]
    Refused { address: String, reason: String },

    #[error("timed out connecting to {address}")]
    Timeout { address: String },

    #[error("handshake timed out after {0:?}")]
    HandshakeTimeout(Duration),

    #[error("malformed handshake reply: {0}")]
    MalformedHandshake(String),

    #[error("link dropped during handshake: {0}")]
    LinkDropped(String),

    #[error("cannot connect from state {0:?}")]
    InvalidState(SessionState),
}

/// Failure while streaming packets over an established session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("timed out waiting for acknowledgment")]
    Timeout,

    #[error("link dropped: {0}")]
    LinkDropped(String),

    #[error("printer rejected packet {index}")]
    Nack { index: usize },

    #[error("session is {0:?}, not streaming")]
    InvalidState(SessionState),
}

/// Returned by a fail-fast job queue while another job holds the session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("session is busy with job {active}")]
pub struct SessionBusyError {
    pub active: String,
}

/// Main error type for peripage operations
#[derive(Debug, Error)]
pub enum PeripageError {
    #[error("Encoding error: {0}")]
    Encoding(#[from] EncodingError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("{0}")]
    SessionBusy(#[from] SessionBusyError),

    /// Image decoding or QR rendering error
    #[error("Image error: {0}")]
    Image(String),

    /// Print job ended without success
    #[error("Print job {0}")]
    Job(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
