//! Command frames: one serialized printer command plus how the printer is
//! expected to acknowledge it.

use std::time::Duration;

use crate::protocol::commands::{self, DeviceQuery, Density};
use crate::protocol::text;

/// How a frame is acknowledged once its last byte reaches the printer.
///
/// Ordered from weakest to strongest so a packet completing several frames
/// can take the maximum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum AckPolicy {
    /// Fire and forget
    #[default]
    None,
    /// One ACK/NAK byte (or write completion on links without acks)
    SingleByte,
    /// A reply payload that must be read back
    StatusReply,
}

/// Row encoding of a raster band.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BandEncoding {
    Raw,
    RunLength,
}

/// A serialized printer command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandFrame {
    /// Reset plus concentration; puts the printer in a known state
    Init { payload: Vec<u8> },
    /// One band of raster rows
    RasterBand {
        payload: Vec<u8>,
        rows: u16,
        encoding: BandEncoding,
    },
    /// Blank paper feed after the image
    Feed { payload: Vec<u8> },
    /// Request that the printer answers
    StatusQuery { payload: Vec<u8>, query: DeviceQuery },
    /// A line of built-in-font text, or the feed that replaces a blank line.
    /// The printer needs `settle` to finish it before taking more input.
    Text { payload: Vec<u8>, settle: Duration },
}

impl CommandFrame {
    pub fn init(density: Density) -> Self {
        let mut payload = commands::reset();
        payload.extend(commands::concentration(density));
        CommandFrame::Init { payload }
    }

    pub fn feed(rows: u8) -> Self {
        CommandFrame::Feed {
            payload: commands::feed(rows),
        }
    }

    pub fn status_query(query: DeviceQuery) -> Self {
        CommandFrame::StatusQuery {
            payload: query.request(),
            query,
        }
    }

    pub fn text_line(line: &str, settle: Duration) -> Self {
        CommandFrame::Text {
            payload: text::line(line),
            settle,
        }
    }

    pub fn paragraph_break(settle: Duration) -> Self {
        CommandFrame::Text {
            payload: text::paragraph_break(),
            settle,
        }
    }

    /// Serialized command bytes.
    pub fn payload(&self) -> &[u8] {
        match self {
            CommandFrame::Init { payload }
            | CommandFrame::RasterBand { payload, .. }
            | CommandFrame::Feed { payload }
            | CommandFrame::StatusQuery { payload, .. }
            | CommandFrame::Text { payload, .. } => payload,
        }
    }

    /// Pause the printer needs once this frame has been written.
    pub fn settle(&self) -> Duration {
        match self {
            CommandFrame::Text { settle, .. } => *settle,
            _ => Duration::ZERO,
        }
    }

    pub fn len(&self) -> usize {
        self.payload().len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload().is_empty()
    }

    pub fn ack_policy(&self) -> AckPolicy {
        match self {
            CommandFrame::Init { .. } => AckPolicy::None,
            CommandFrame::RasterBand { .. } | CommandFrame::Feed { .. } | CommandFrame::Text { .. } => {
                AckPolicy::SingleByte
            }
            CommandFrame::StatusQuery { .. } => AckPolicy::StatusReply,
        }
    }
}
