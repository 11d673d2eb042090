//! # Peripage Protocol Commands
//!
//! This module implements the command bytes understood by Peripage thermal
//! printers (A6, A6+, A40, A40+).
//!
//! ## Protocol Overview
//!
//! The printer speaks a small ESC/POS-like dialect over the Bluetooth serial
//! port profile. Two command families exist:
//!
//! - **Vendor commands** prefixed with `10 FF`: reset, concentration, device
//!   queries. Queries are answered with a short byte reply.
//! - **ESC/POS commands**: `ESC J n` paper feed and `GS v 0` raster images
//!   (see [`graphics`](super::graphics)).
//!
//! ## Byte Order
//!
//! Multi-byte integers use **little-endian** encoding:
//! - `u16` value 0x1234 is sent as bytes `[0x34, 0x12]`
//!
//! ## Reset Requirement
//!
//! The printer neither prints nor answers queries until it has received the
//! reset sequence after each (re)connect.

use serde::{Deserialize, Serialize};

// ============================================================================
// ESCAPE SEQUENCE CONSTANTS
// ============================================================================

/// ESC (Escape) - ESC/POS command prefix byte
pub const ESC: u8 = 0x1B;

/// GS (Group Separator) - ESC/POS graphics prefix
pub const GS: u8 = 0x1D;

/// DLE (Data Link Escape) - first byte of Peripage vendor commands
pub const DLE: u8 = 0x10;

/// Second byte of every vendor command
pub const VENDOR: u8 = 0xFF;

/// Link acknowledgment byte (explicit ack mode)
pub const ACK: u8 = 0x06;

/// Link negative acknowledgment byte (explicit ack mode)
pub const NAK: u8 = 0x15;

// ============================================================================
// INITIALIZATION COMMANDS
// ============================================================================

/// # Reset Printer (10 FF FE 01 + 12 × 00)
///
/// Required after every connect. Without it the printer will not print nor
/// return any data.
///
/// ## Protocol Details
///
/// | Format | Bytes |
/// |--------|-------|
/// | Hex    | 10 FF FE 01 00 00 00 00 00 00 00 00 00 00 00 00 |
///
/// ## Example
///
/// ```
/// use peripage::protocol::commands;
///
/// let reset = commands::reset();
/// assert_eq!(&reset[..4], &[0x10, 0xFF, 0xFE, 0x01]);
/// assert_eq!(reset.len(), 16);
/// ```
#[inline]
pub fn reset() -> Vec<u8> {
    let mut cmd = vec![DLE, VENDOR, 0xFE, 0x01];
    cmd.extend_from_slice(&[0u8; 12]);
    cmd
}

/// Print concentration (heat level).
///
/// Darker settings produce longer lasting prints at the cost of heating the
/// head; there is no overheat protection in the printer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Density {
    Light,
    #[default]
    Normal,
    Dark,
}

impl Density {
    /// The concentration level byte (0, 1 or 2).
    #[inline]
    pub fn level(self) -> u8 {
        match self {
            Density::Light => 0,
            Density::Normal => 1,
            Density::Dark => 2,
        }
    }
}

/// # Set Concentration (10 FF 10 00 n)
///
/// ## Parameters
///
/// - `density`: heat level, encoded as `n` ∈ {0, 1, 2}
///
/// ## Example
///
/// ```
/// use peripage::protocol::commands::{self, Density};
///
/// assert_eq!(commands::concentration(Density::Dark), vec![0x10, 0xFF, 0x10, 0x00, 0x02]);
/// ```
#[inline]
pub fn concentration(density: Density) -> Vec<u8> {
    vec![DLE, VENDOR, 0x10, 0x00, density.level()]
}

// ============================================================================
// PAPER FEED
// ============================================================================

/// # Feed Paper (ESC J n)
///
/// Feeds `n` dot rows of blank paper. The printer rejects zero, so the value
/// is clamped to 1..=255.
///
/// ## Protocol Details
///
/// | Format  | Bytes    |
/// |---------|----------|
/// | ASCII   | ESC J n  |
/// | Hex     | 1B 4A n  |
///
/// ## Example
///
/// ```
/// use peripage::protocol::commands;
///
/// assert_eq!(commands::feed(30), vec![0x1B, 0x4A, 30]);
/// assert_eq!(commands::feed(0), vec![0x1B, 0x4A, 1]);
/// ```
#[inline]
pub fn feed(rows: u8) -> Vec<u8> {
    vec![ESC, b'J', rows.max(1)]
}

// ============================================================================
// DEVICE QUERIES
// ============================================================================

/// Read-only properties the printer reports on request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceQuery {
    /// Device name plus the last two MAC bytes, e.g. `PeriPage+DF7A`
    Name,
    /// Serial number, e.g. `A6491571121`
    SerialNumber,
    /// Firmware version, e.g. `V2.11_304dpi`
    Firmware,
    /// Hardware revision string
    Hardware,
    /// Battery percentage, `[0, percent]`
    Battery,
    /// Device MAC address (raw bytes, repeated)
    Mac,
    /// Undocumented property, e.g. `IP-300` on the A6+
    Ip,
}

impl DeviceQuery {
    /// The request bytes for this query.
    pub fn request(self) -> Vec<u8> {
        let [a, b] = match self {
            DeviceQuery::Name => [0x30, 0x11],
            DeviceQuery::SerialNumber => [0x20, 0xF2],
            DeviceQuery::Firmware => [0x20, 0xF1],
            DeviceQuery::Hardware => [0x30, 0x10],
            DeviceQuery::Battery => [0x50, 0xF1],
            DeviceQuery::Mac => [0x30, 0x12],
            DeviceQuery::Ip => [0x20, 0xF0],
        };
        vec![DLE, VENDOR, a, b]
    }

    /// Decode a reply as text, dropping NULs and trailing whitespace.
    pub fn decode_text(reply: &[u8]) -> String {
        reply
            .iter()
            .filter(|&&b| b != 0)
            .map(|&b| b as char)
            .collect::<String>()
            .trim_end()
            .to_string()
    }

    /// Decode a battery reply (`[0, percent]`).
    pub fn decode_battery(reply: &[u8]) -> Option<u8> {
        reply.get(1).copied()
    }
}

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

/// Encode a u16 value as little-endian bytes [low, high]
///
/// ## Example
///
/// ```
/// use peripage::protocol::commands::u16_le;
///
/// assert_eq!(u16_le(0x1234), [0x34, 0x12]);
/// assert_eq!(u16_le(231), [0xE7, 0x00]); // A40+ row bytes
/// ```
#[inline]
pub const fn u16_le(value: u16) -> [u8; 2] {
    [value as u8, (value >> 8) as u8]
}

// ============================================================================
// TESTS
// ============================================================================
