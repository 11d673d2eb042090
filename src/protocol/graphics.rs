//! # Peripage Raster Graphics Commands
//!
//! This module implements the raster image commands for Peripage printers.
//!
//! ## Graphics Modes Overview
//!
//! | Mode | Command | Description |
//! |------|---------|-------------|
//! | Raw raster | GS v 0 | Uncompressed rows, standard ESC/POS |
//! | Compressed raster | GS v 1 | PackBits rows (extension, see below) |
//!
//! ## Bit Packing
//!
//! Graphics data is packed as bytes where each bit represents one dot:
//! - Bit 7 (MSB) = leftmost dot
//! - Bit 0 (LSB) = rightmost dot
//! - 1 = black (print), 0 = white (no print)
//!
//! ```text
//! Byte value 0xF0 = 11110000 = ████░░░░
//! Byte value 0x0F = 00001111 = ░░░░████
//! ```
//!
//! ## Band Height
//!
//! Pages may be up to 0xFFFF rows tall, but the printer has no reassembly
//! buffer worth speaking of, so images are sent as short bands (a few dozen
//! rows) that each carry their own header.

use super::commands::{GS, u16_le};
use super::rle;

/// Header length of a raw band: `GS v 0 m xL xH yL yH`
pub const RAW_HEADER_LEN: usize = 8;

/// Header length of a compressed band: `GS v 1 m xL xH yL yH nL nH`
pub const RLE_HEADER_LEN: usize = 10;

// ============================================================================
// RAW RASTER (GS v 0)
// ============================================================================

/// # Print Raster Band (GS v 0 m xL xH yL yH d1...dk)
///
/// ## Protocol Details
///
/// | Format | Bytes |
/// |--------|-------|
/// | Hex    | 1D 76 30 00 xL xH yL yH d1...dk |
///
/// ## Parameters
///
/// - `m`: Mode, always 0 (normal density)
/// - `xL, xH`: Width in bytes, little-endian
/// - `yL, yH`: Height in rows, little-endian
/// - `d1...dk`: Image data, k = width_bytes × rows
///
/// On the A6+ a single-row band starts `1D 76 30 00 48 00 01 00`:
/// 0x48 = 72 bytes per row, one row.
///
/// ## Example
///
/// ```
/// use peripage::protocol::graphics;
///
/// let data = vec![0xFF; 48 * 24];
/// let cmd = graphics::raster_band(48, 24, &data);
///
/// assert_eq!(&cmd[0..8], &[0x1D, 0x76, 0x30, 0x00, 48, 0, 24, 0]);
/// assert_eq!(cmd.len(), 8 + 48 * 24);
/// ```
pub fn raster_band(width_bytes: u16, rows: u16, data: &[u8]) -> Vec<u8> {
    debug_assert!(
        data.len() == width_bytes as usize * rows as usize,
        "Band data length mismatch. Expected {} ({} bytes × {} rows), got {}",
        width_bytes as usize * rows as usize,
        width_bytes,
        rows,
        data.len()
    );

    let [xl, xh] = u16_le(width_bytes);
    let [yl, yh] = u16_le(rows);

    let mut cmd = Vec::with_capacity(RAW_HEADER_LEN + data.len());
    cmd.extend_from_slice(&[GS, b'v', b'0', 0, xl, xh, yl, yh]);
    cmd.extend_from_slice(data);
    cmd
}

// ============================================================================
// COMPRESSED RASTER (GS v 1)
// ============================================================================

/// # Print Compressed Raster Band (GS v 1 m xL xH yL yH nL nH c1...cn)
///
/// Same geometry as [`raster_band`], followed by the PackBits-compressed row
/// data length `n` and the compressed bytes.
///
/// This is not part of the stock firmware command reference; confirm the
/// device accepts it before enabling compression.
///
/// ## Example
///
/// ```
/// use peripage::protocol::graphics;
///
/// let data = vec![0x00; 48 * 24];
/// let cmd = graphics::compressed_band(48, 24, &data);
///
/// assert_eq!(&cmd[0..4], &[0x1D, 0x76, 0x31, 0x00]);
/// assert!(cmd.len() < data.len());
/// ```
pub fn compressed_band(width_bytes: u16, rows: u16, data: &[u8]) -> Vec<u8> {
    let packed = rle::encode(data);
    compressed_band_from_packed(width_bytes, rows, &packed)
}

/// Build a compressed band from data that is already PackBits-encoded.
pub fn compressed_band_from_packed(width_bytes: u16, rows: u16, packed: &[u8]) -> Vec<u8> {
    let [xl, xh] = u16_le(width_bytes);
    let [yl, yh] = u16_le(rows);
    let [nl, nh] = u16_le(packed.len().min(u16::MAX as usize) as u16);

    let mut cmd = Vec::with_capacity(RLE_HEADER_LEN + packed.len());
    cmd.extend_from_slice(&[GS, b'v', b'1', 0, xl, xh, yl, yh, nl, nh]);
    cmd.extend_from_slice(packed);
    cmd
}

// ============================================================================
// TESTS
// ============================================================================
