//! # Printer Configuration
//!
//! This module defines hardware specifications for supported Peripage
//! printers.
//!
//! ## Supported Printers
//!
//! | Model | Width (dots) | Row bytes | Characters per row |
//! |-------|--------------|-----------|--------------------|
//! | A6    | 384          | 48        | 32                 |
//! | A6+   | 576          | 72        | 48                 |
//! | A40   | 1728         | 216       | 144                |
//! | A40+  | 1848         | 231       | 154                |
//!
//! ## Usage
//!
//! ```
//! use peripage::printer::PrinterModel;
//!
//! let model = PrinterModel::A6_PLUS;
//! println!("Print width: {} dots ({} bytes)",
//!          model.width_dots,
//!          model.row_bytes());
//! ```

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::ConfigError;
use crate::protocol::text;

/// # Printer Model
///
/// Defines the hardware characteristics of a Peripage thermal printer.
///
/// Images are sent as 1 bit per dot, so one byte covers 8 dots of a row.
/// Rows wider than [`row_bytes`](Self::row_bytes) are truncated by the
/// printer; the bitmap source pads narrower images to the full row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrinterModel {
    /// Short model name, as accepted on the command line
    pub name: &'static str,

    /// Maximum number of dots the printer can print on a line
    pub width_dots: u16,
}

impl PrinterModel {
    /// Peripage A6: 58mm paper.
    pub const A6: Self = Self {
        name: "a6",
        width_dots: 384,
    };

    /// Peripage A6+: 58mm paper, 304 DPI head.
    pub const A6_PLUS: Self = Self {
        name: "a6+",
        width_dots: 576,
    };

    /// Peripage A40: A4 paper.
    pub const A40: Self = Self {
        name: "a40",
        width_dots: 1728,
    };

    /// Peripage A40+: A4 paper, wider head.
    pub const A40_PLUS: Self = Self {
        name: "a40+",
        width_dots: 1848,
    };

    /// All known models.
    pub const ALL: [Self; 4] = [Self::A6, Self::A6_PLUS, Self::A40, Self::A40_PLUS];

    /// Bytes per printed row (8 dots per byte).
    #[inline]
    pub fn row_bytes(&self) -> usize {
        self.width_dots as usize / 8
    }

    /// Characters per row in the printer's built-in text mode.
    #[inline]
    pub fn row_characters(&self) -> usize {
        (self.width_dots / text::CHAR_DOTS) as usize
    }

    /// Look up a model by name (case-insensitive, `p` accepted for `+`).
    ///
    /// ```
    /// use peripage::printer::PrinterModel;
    ///
    /// assert_eq!(PrinterModel::by_name("A40p").unwrap(), PrinterModel::A40_PLUS);
    /// assert!(PrinterModel::by_name("a5").is_err());
    /// ```
    pub fn by_name(name: &str) -> Result<Self, ConfigError> {
        let normalized = name.trim().to_ascii_lowercase().replace('p', "+");
        Self::ALL
            .into_iter()
            .find(|m| m.name == normalized)
            .ok_or_else(|| ConfigError::UnknownModel(name.to_string()))
    }
}

impl Default for PrinterModel {
    fn default() -> Self {
        Self::A6_PLUS
    }
}

impl Serialize for PrinterModel {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name)
    }
}

impl<'de> Deserialize<'de> for PrinterModel {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Self::by_name(&name).map_err(serde::de::Error::custom)
    }
}
