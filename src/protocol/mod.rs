//! # Peripage Protocol Implementation
//!
//! This module provides low-level command builders for Peripage thermal
//! printers.
//!
//! ## Module Structure
//!
//! - [`commands`]: Reset, concentration, feed, and device queries
//! - [`graphics`]: Raw and compressed raster bands
//! - [`rle`]: PackBits run-length coding for compressed bands
//! - [`text`]: ASCII filtering and lines for the built-in font
//!
//! ## Usage Example
//!
//! ```
//! use peripage::protocol::{commands, graphics};
//!
//! let mut data = Vec::new();
//!
//! // Reset is mandatory after connecting
//! data.extend(commands::reset());
//! data.extend(commands::concentration(commands::Density::Normal));
//!
//! // One 24-row band on an A6 (48 bytes per row)
//! let band = vec![0xAA; 48 * 24];
//! data.extend(graphics::raster_band(48, 24, &band));
//!
//! // Feed the printed area past the tear bar
//! data.extend(commands::feed(30));
//! ```

pub mod commands;
pub mod graphics;
pub mod rle;
pub mod text;
