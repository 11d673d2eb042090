//! Text printing in the printer's built-in font.
//!
//! ```text
//! "Hello\n\nA long line that wraps"  (row width 10)
//!
//! Init
//! Text "Hello\n"
//! Text ESC J 30          blank line
//! Text "A long lin\n"
//! Text "e that wra\n"
//! Text "ps\n"
//! Feed
//! ```
//!
//! Every text frame carries the settle time from [`EncodeOptions`], so the
//! chunker paces the link after each line.

use super::{CommandFrame, EncodeOptions};
use crate::error::{ConfigError, EncodingError, PeripageError};
use crate::printer::PrinterModel;
use crate::protocol::text::{self, CHAR_DOTS};

/// Encode `input` as built-in-font text frames.
///
/// The text is filtered to printable ASCII and wrapped to the row width
/// derived from `options.max_width` (the default model when unset). Blank
/// lines become paragraph breaks; trailing newlines are dropped.
///
/// ## Errors
///
/// - [`EncodingError::EmptyText`] when nothing printable is left
/// - [`ConfigError`] for invalid options or a row narrower than one character
///
/// ## Example
///
/// ```
/// use peripage::encode::{self, CommandFrame, EncodeOptions};
///
/// let frames = encode::encode_text("Hello\n\nWorld", &EncodeOptions::default())?;
///
/// // Init, "Hello", break, "World", feed
/// assert_eq!(frames.len(), 5);
/// assert_eq!(frames[1].payload(), b"Hello\n");
/// # Ok::<(), peripage::PeripageError>(())
/// ```
pub fn encode_text(input: &str, options: &EncodeOptions) -> Result<Vec<CommandFrame>, PeripageError> {
    options.validate()?;
    let width = row_characters(options)?;
    let filtered = text::filter_ascii(input);
    let settle = options.text_settle;

    let mut frames = vec![CommandFrame::init(options.density)];

    if filtered.trim().is_empty() {
        // Whitespace only: each newline still advances the paper
        let breaks = filtered.matches('\n').count();
        frames.extend((0..breaks).map(|_| CommandFrame::paragraph_break(settle)));
    } else {
        for line in filtered.trim_end_matches('\n').split('\n') {
            if line.trim().is_empty() {
                frames.push(CommandFrame::paragraph_break(settle));
                continue;
            }
            for part in line.as_bytes().chunks(width) {
                let part: String = part.iter().map(|&b| b as char).collect();
                frames.push(CommandFrame::text_line(&part, settle));
            }
        }
    }

    if frames.len() == 1 {
        return Err(EncodingError::EmptyText.into());
    }
    frames.push(CommandFrame::feed(options.feed_rows));

    tracing::debug!(
        lines = frames.len() - 2,
        width,
        bytes = frames.iter().map(CommandFrame::len).sum::<usize>(),
        "encoded text"
    );

    Ok(frames)
}

fn row_characters(options: &EncodeOptions) -> Result<usize, ConfigError> {
    let chars = match options.max_width {
        Some(dots) => (dots / u32::from(CHAR_DOTS)) as usize,
        None => PrinterModel::default().row_characters(),
    };
    if chars == 0 {
        return Err(ConfigError::Invalid {
            field: "max_width",
            reason: format!("narrower than one {}-dot character", CHAR_DOTS),
        });
    }
    Ok(chars)
}
