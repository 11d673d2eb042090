//! # Link Chunking
//!
//! Splits a job's command frames into packets that fit the Bluetooth link.
//!
//! ## Problem
//!
//! The radio link carries at most `mtu` bytes per packet, and `H` of those
//! belong to the link-layer header. Commands are far bigger than that (a
//! 24-row band on an A6+ is 1736 bytes), and the printer has no packet
//! reassembly buffer: bytes must arrive as one ordered stream.
//!
//! ## Solution
//!
//! Frames are treated as one concatenated byte stream and cut into packets
//! of exactly `mtu - H` bytes (the last one shorter). A packet may carry the
//! tail of one frame and the head of the next. Every packet records which
//! frame bytes it carries, so a single frame can still be reassembled from
//! its spans.
//!
//! ```text
//! frames:   [ Init(21) ][ Band(264) ][ Band(264) ] ...
//! packets:  [   178    ][   178    ][   178    ] ...
//! ```
//!
//! ## Acknowledgment
//!
//! A packet takes the strongest [`AckPolicy`] of the frames whose final byte
//! it carries. Packets that only carry frame interiors have `AckPolicy::None`.
//! The pacing delay after a packet is the longest of the inter-packet delay
//! and the settle time of the frames it completes.

use std::time::Duration;

use super::frame::{AckPolicy, CommandFrame};
use crate::error::ConfigError;

/// Bytes of every link packet reserved for the link-layer header.
pub const LINK_HEADER_OVERHEAD: usize = 4;

/// Packet sizing and pacing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkConfig {
    /// Link MTU including the header overhead
    pub mtu: usize,
    /// Pause the transport observes after writing each packet
    pub inter_packet_delay: Duration,
}

impl ChunkConfig {
    pub fn new(mtu: usize) -> Self {
        Self {
            mtu,
            inter_packet_delay: Duration::ZERO,
        }
    }

    /// Payload bytes per full packet.
    #[inline]
    pub fn payload_size(&self) -> usize {
        self.mtu.saturating_sub(LINK_HEADER_OVERHEAD)
    }
}

/// A slice of one frame carried in a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSpan {
    /// Index of the frame in the job
    pub frame: usize,
    /// Offset of the first carried byte within the frame payload
    pub offset: usize,
    /// Number of carried bytes
    pub len: usize,
}

/// One link-sized piece of the job's byte stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Position in the job, contiguous from 0
    pub index: usize,
    pub payload: Vec<u8>,
    pub spans: Vec<FrameSpan>,
    /// Strongest policy among the frames that end in this packet
    pub ack: AckPolicy,
    pub delay_after: Duration,
}

impl Packet {
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// Re-iterable packetizer over a job's frames.
///
/// ## Example
///
/// ```
/// use peripage::encode::{ChunkConfig, CommandFrame, FrameChunker};
///
/// let frames = vec![CommandFrame::feed(10), CommandFrame::feed(20)];
/// let chunker = FrameChunker::new(&frames, ChunkConfig::new(6))?;
///
/// // 6 bytes of payload, 2 per packet
/// let sizes: Vec<usize> = chunker.iter().map(|p| p.len()).collect();
/// assert_eq!(sizes, vec![2, 2, 2]);
///
/// // Iterating again starts over
/// assert_eq!(chunker.iter().count(), 3);
/// # Ok::<(), peripage::error::ConfigError>(())
/// ```
#[derive(Debug, Clone)]
pub struct FrameChunker<'a> {
    frames: &'a [CommandFrame],
    config: ChunkConfig,
}

impl<'a> FrameChunker<'a> {
    /// ## Errors
    ///
    /// [`ConfigError::MtuTooSmall`] when `mtu <= LINK_HEADER_OVERHEAD`, since
    /// packets could carry no payload.
    pub fn new(frames: &'a [CommandFrame], config: ChunkConfig) -> Result<Self, ConfigError> {
        if config.mtu <= LINK_HEADER_OVERHEAD {
            return Err(ConfigError::MtuTooSmall {
                mtu: config.mtu,
                overhead: LINK_HEADER_OVERHEAD,
            });
        }
        Ok(Self { frames, config })
    }

    /// Total payload bytes across all frames.
    pub fn total_bytes(&self) -> usize {
        self.frames.iter().map(CommandFrame::len).sum()
    }

    /// Number of packets the stream produces.
    pub fn packet_count(&self) -> usize {
        self.total_bytes().div_ceil(self.config.payload_size())
    }

    pub fn frames(&self) -> &'a [CommandFrame] {
        self.frames
    }

    /// A fresh lazy packet iterator from the start of the stream.
    pub fn iter(&self) -> Packets<'a> {
        Packets {
            frames: self.frames,
            payload_size: self.config.payload_size(),
            delay: self.config.inter_packet_delay,
            frame: 0,
            offset: 0,
            next_index: 0,
        }
    }
}

impl<'a> IntoIterator for &FrameChunker<'a> {
    type Item = Packet;
    type IntoIter = Packets<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Lazy packet iterator produced by [`FrameChunker::iter`].
#[derive(Debug, Clone)]
pub struct Packets<'a> {
    frames: &'a [CommandFrame],
    payload_size: usize,
    delay: Duration,
    /// Cursor: current frame and byte offset within it
    frame: usize,
    offset: usize,
    next_index: usize,
}

impl Iterator for Packets<'_> {
    type Item = Packet;

    fn next(&mut self) -> Option<Packet> {
        let mut payload = Vec::with_capacity(self.payload_size);
        let mut spans = Vec::new();
        let mut ack = AckPolicy::None;
        let mut delay = self.delay;

        while payload.len() < self.payload_size && self.frame < self.frames.len() {
            let frame = &self.frames[self.frame];
            let bytes = frame.payload();
            let take = (bytes.len() - self.offset).min(self.payload_size - payload.len());

            if take > 0 {
                payload.extend_from_slice(&bytes[self.offset..self.offset + take]);
                spans.push(FrameSpan {
                    frame: self.frame,
                    offset: self.offset,
                    len: take,
                });
                self.offset += take;
            }

            if self.offset == bytes.len() {
                if !bytes.is_empty() {
                    ack = ack.max(frame.ack_policy());
                    delay = delay.max(frame.settle());
                }
                self.frame += 1;
                self.offset = 0;
            }
        }

        if payload.is_empty() {
            return None;
        }

        let index = self.next_index;
        self.next_index += 1;
        Some(Packet {
            index,
            payload,
            spans,
            ack,
            delay_after: delay,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode::frame::BandEncoding;
    use crate::protocol::commands::{DeviceQuery, Density};
    use pretty_assertions::assert_eq;

    fn band(len: usize, fill: u8) -> CommandFrame {
        CommandFrame::RasterBand {
            payload: vec![fill; len],
            rows: 1,
            encoding: BandEncoding::Raw,
        }
    }

    #[test]
    fn test_mtu_must_exceed_overhead() {
        let frames = vec![band(10, 0)];
        for mtu in [0, 1, LINK_HEADER_OVERHEAD] {
            let err = FrameChunker::new(&frames, ChunkConfig::new(mtu)).unwrap_err();
            assert!(matches!(err, ConfigError::MtuTooSmall { .. }));
        }
        assert!(FrameChunker::new(&frames, ChunkConfig::new(LINK_HEADER_OVERHEAD + 1)).is_ok());
    }

    #[test]
    fn test_packet_sizes_and_count() {
        let frames = vec![band(100, 1), band(57, 2), band(3, 3)];
        let chunker = FrameChunker::new(&frames, ChunkConfig::new(24)).unwrap();
        let packets: Vec<Packet> = chunker.iter().collect();

        // 160 bytes at 20 per packet
        assert_eq!(chunker.total_bytes(), 160);
        assert_eq!(packets.len(), 8);
        assert_eq!(chunker.packet_count(), 8);
        assert!(packets.iter().all(|p| p.len() == 20));
    }

    #[test]
    fn test_indices_are_contiguous() {
        let frames = vec![band(50, 0), band(50, 1)];
        let chunker = FrameChunker::new(&frames, ChunkConfig::new(11)).unwrap();
        let indices: Vec<usize> = chunker.iter().map(|p| p.index).collect();
        assert_eq!(indices, (0..15).collect::<Vec<_>>());
    }

    #[test]
    fn test_packets_span_frame_boundaries() {
        let frames = vec![band(5, 0xAA), band(5, 0xBB)];
        let chunker = FrameChunker::new(&frames, ChunkConfig::new(4 + 7)).unwrap();
        let packets: Vec<Packet> = chunker.iter().collect();

        assert_eq!(packets.len(), 2);
        assert_eq!(packets[0].payload, vec![0xAA, 0xAA, 0xAA, 0xAA, 0xAA, 0xBB, 0xBB]);
        assert_eq!(
            packets[0].spans,
            vec![
                FrameSpan { frame: 0, offset: 0, len: 5 },
                FrameSpan { frame: 1, offset: 0, len: 2 },
            ]
        );
        assert_eq!(packets[1].spans, vec![FrameSpan { frame: 1, offset: 2, len: 3 }]);
    }

    #[test]
    fn test_single_frame_reassembles_from_spans() {
        let frames = vec![band(7, 1), band(40, 2), band(9, 3)];
        let chunker = FrameChunker::new(&frames, ChunkConfig::new(10)).unwrap();

        let mut rebuilt = Vec::new();
        for packet in &chunker {
            let mut cursor = 0;
            for span in &packet.spans {
                if span.frame == 1 {
                    rebuilt.extend_from_slice(&packet.payload[cursor..cursor + span.len]);
                }
                cursor += span.len;
            }
        }
        assert_eq!(rebuilt, frames[1].payload());
    }

    #[test]
    fn test_ack_policy_comes_from_completed_frames() {
        let frames = vec![
            CommandFrame::init(Density::Normal), // 21 bytes, None
            band(10, 0),                          // SingleByte
            CommandFrame::status_query(DeviceQuery::Battery), // 4 bytes, StatusReply
        ];
        let chunker = FrameChunker::new(&frames, ChunkConfig::new(4 + 20)).unwrap();
        let acks: Vec<AckPolicy> = chunker.iter().map(|p| p.ack).collect();

        // [0..20) inside init, [20..35) ends init and band, tail ends status query
        assert_eq!(
            acks,
            vec![AckPolicy::None, AckPolicy::StatusReply]
        );
    }

    #[test]
    fn test_empty_frames_yield_nothing() {
        let frames: Vec<CommandFrame> = Vec::new();
        let chunker = FrameChunker::new(&frames, ChunkConfig::new(20)).unwrap();
        assert_eq!(chunker.iter().next(), None);
        assert_eq!(chunker.packet_count(), 0);
    }

    #[test]
    fn test_delay_is_carried() {
        let frames = vec![band(3, 0)];
        let config = ChunkConfig {
            mtu: 20,
            inter_packet_delay: Duration::from_millis(10),
        };
        let chunker = FrameChunker::new(&frames, config).unwrap();
        let packet = chunker.iter().next().unwrap();
        assert_eq!(packet.delay_after, Duration::from_millis(10));
    }

    #[test]
    fn test_text_settle_extends_delay() {
        let settle = Duration::from_millis(250);
        let frames = vec![CommandFrame::text_line("abcdef", settle), band(3, 0)];
        let config = ChunkConfig {
            mtu: 4 + 4,
            inter_packet_delay: Duration::from_millis(10),
        };
        let chunker = FrameChunker::new(&frames, config).unwrap();
        let delays: Vec<Duration> = chunker.iter().map(|p| p.delay_after).collect();

        // "abcd", "ef\n" + 1 band byte, 2 band bytes
        assert_eq!(delays, vec![Duration::from_millis(10), settle, Duration::from_millis(10)]);
    }
}
