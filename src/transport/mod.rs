//! # Printer Transport Layer
//!
//! This module provides the radio channel abstraction and the session that
//! drives a printer over it.
//!
//! ## Layers
//!
//! - [`Channel`] / [`Connector`]: a byte stream to one printer (open, write,
//!   read with timeout, close). Nothing above this layer knows about
//!   Bluetooth.
//! - [`session`]: connect/handshake/stream/drain state machine with flow
//!   control and retries.
//!
//! ## Available Channels
//!
//! - [`bluetooth`]: Bluetooth RFCOMM tty (Linux)
//! - [`mock`]: scripted in-memory printer for tests

use std::time::Duration;

use thiserror::Error;

pub mod bluetooth;
pub mod mock;
pub mod session;

pub use bluetooth::RfcommConnector;
pub use session::{AckMode, Acked, Session, SessionConfig, SessionState};

/// Low-level channel failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    /// Nothing arrived (or the open did not complete) within the timeout
    #[error("timed out")]
    Timeout,

    /// The remote side or the local stack refused the connection
    #[error("refused: {0}")]
    Refused(String),

    /// The link went away; the channel is unusable
    #[error("link dropped: {0}")]
    LinkDropped(String),
}

/// A connected byte stream to one printer.
pub trait Channel: Send {
    /// Write some of `bytes`, returning how many were accepted.
    fn write(&mut self, bytes: &[u8]) -> Result<usize, ChannelError>;

    /// Wait up to `timeout` for incoming bytes.
    ///
    /// Returns at least one byte, or [`ChannelError::Timeout`].
    fn read(&mut self, timeout: Duration) -> Result<Vec<u8>, ChannelError>;

    /// Release the underlying handle. Idempotent.
    fn close(&mut self);
}

/// Opens channels to resolved printer addresses.
pub trait Connector {
    fn open(&mut self, address: &str) -> Result<Box<dyn Channel>, ChannelError>;
}
