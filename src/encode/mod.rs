//! # Raster Encoding
//!
//! Turns a [`MonochromeRaster`] (or plain text, see [`encode_text`]) into
//! the ordered command frames for one print, and splits those frames into
//! link-sized packets.
//!
//! ```text
//! MonochromeRaster → encode()      → [Init, Band, Band, ..., Feed] → FrameChunker → Packets
//! &str             → encode_text() → [Init, Text, Text, ..., Feed]
//! ```
//!
//! ## Bands
//!
//! Rows are grouped into bands of `band_height` rows (the last band may be
//! shorter). Each band is a self-contained raster command, which bounds the
//! size of any single command the printer has to buffer.
//!
//! ## Compression
//!
//! With `compress` enabled each band is PackBits-encoded, but the compressed
//! form is only used when it is strictly smaller than the raw rows.

pub mod chunking;
pub mod frame;
pub mod text;

pub use chunking::{ChunkConfig, FrameChunker, FrameSpan, LINK_HEADER_OVERHEAD, Packet, Packets};
pub use frame::{AckPolicy, BandEncoding, CommandFrame};
pub use text::encode_text;

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::millis;
use crate::error::{ConfigError, EncodingError, PeripageError};
use crate::protocol::commands::Density;
use crate::protocol::{graphics, rle};
use crate::render::MonochromeRaster;

/// Default rows per band.
pub const DEFAULT_BAND_HEIGHT: u16 = 24;

/// Default blank rows fed after the image.
pub const DEFAULT_FEED_ROWS: u8 = 30;

/// Default pause after each line of text.
pub const DEFAULT_TEXT_SETTLE: Duration = Duration::from_millis(250);

/// Encoder settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncodeOptions {
    /// Heat level, sent in the init frame
    pub density: Density,
    /// Blank rows fed after the last band
    pub feed_rows: u8,
    /// PackBits-compress bands when it pays off
    pub compress: bool,
    /// Rows per band, 1..=255
    pub band_height: u16,
    /// Pause after each text line or paragraph break
    #[serde(rename = "text_settle_ms", with = "millis")]
    pub text_settle: Duration,
    /// Widest raster the printer accepts, in dots
    #[serde(skip)]
    pub max_width: Option<u32>,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        Self {
            density: Density::default(),
            feed_rows: DEFAULT_FEED_ROWS,
            compress: false,
            band_height: DEFAULT_BAND_HEIGHT,
            text_settle: DEFAULT_TEXT_SETTLE,
            max_width: None,
        }
    }
}

impl EncodeOptions {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.band_height == 0 || self.band_height > 255 {
            return Err(ConfigError::BandHeight(self.band_height));
        }
        Ok(())
    }
}

/// Encode a raster into the command frames for one print.
///
/// ## Errors
///
/// - [`ConfigError::BandHeight`] for a band height outside 1..=255
/// - [`EncodingError`] for a width that is not a multiple of 8, a zero
///   height, or a width beyond `max_width`
///
/// Nothing is produced on error.
///
/// ## Example
///
/// ```
/// use peripage::encode::{self, CommandFrame, EncodeOptions};
/// use peripage::render::MonochromeRaster;
///
/// let raster = MonochromeRaster::blank(384, 50);
/// let frames = encode::encode(&raster, &EncodeOptions::default())?;
///
/// // Init, three bands (24 + 24 + 2 rows), feed
/// assert_eq!(frames.len(), 5);
/// assert!(matches!(frames[0], CommandFrame::Init { .. }));
/// assert!(matches!(frames[4], CommandFrame::Feed { .. }));
/// # Ok::<(), peripage::PeripageError>(())
/// ```
pub fn encode(
    raster: &MonochromeRaster,
    options: &EncodeOptions,
) -> Result<Vec<CommandFrame>, PeripageError> {
    options.validate()?;
    check_raster(raster, options)?;

    let row_bytes = raster.row_bytes();
    let band_height = options.band_height as usize;
    let height = raster.height() as usize;

    let mut frames = Vec::with_capacity(height.div_ceil(band_height) + 2);
    frames.push(CommandFrame::init(options.density));

    for band in raster.data().chunks(row_bytes * band_height) {
        let rows = (band.len() / row_bytes) as u16;
        frames.push(encode_band(row_bytes as u16, rows, band, options.compress));
    }

    frames.push(CommandFrame::feed(options.feed_rows));

    tracing::debug!(
        width = raster.width(),
        height = raster.height(),
        frames = frames.len(),
        bytes = frames.iter().map(CommandFrame::len).sum::<usize>(),
        "encoded raster"
    );

    Ok(frames)
}

fn check_raster(raster: &MonochromeRaster, options: &EncodeOptions) -> Result<(), EncodingError> {
    let width = raster.width();
    if width == 0 || width % 8 != 0 {
        return Err(EncodingError::WidthNotByteAligned { width });
    }
    if raster.height() == 0 {
        return Err(EncodingError::EmptyRaster);
    }
    if let Some(max) = options.max_width
        && width > max
    {
        return Err(EncodingError::TooWide { width, max });
    }
    Ok(())
}

fn encode_band(row_bytes: u16, rows: u16, data: &[u8], compress: bool) -> CommandFrame {
    if compress {
        let packed = rle::encode(data);
        // Header grows by 2 bytes; only worth it when strictly smaller overall
        if packed.len() + graphics::RLE_HEADER_LEN < data.len() + graphics::RAW_HEADER_LEN
            && packed.len() <= u16::MAX as usize
        {
            return CommandFrame::RasterBand {
                payload: graphics::compressed_band_from_packed(row_bytes, rows, &packed),
                rows,
                encoding: BandEncoding::RunLength,
            };
        }
    }

    CommandFrame::RasterBand {
        payload: graphics::raster_band(row_bytes, rows, data),
        rows,
        encoding: BandEncoding::Raw,
    }
}

// ============================================================================
// TESTS
// ============================================================================
