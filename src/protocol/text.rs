//! # Built-in Text Mode
//!
//! Peripage printers render plain ASCII with an internal 12-dot font: every
//! byte that is not part of a command is printed, and `\n` ends the line.
//!
//! The font only covers 7-bit ASCII, and two newlines in a row can lock up
//! the printer's line buffer. Text is therefore filtered with
//! [`filter_ascii`] before it is sent, and blank lines are printed as a
//! paper feed instead of an empty line.

use super::commands;

/// Dots per character cell of the built-in font.
pub const CHAR_DOTS: u16 = 12;

/// Rows fed in place of a blank line.
pub const PARAGRAPH_BREAK_ROWS: u8 = 30;

/// Reduce `text` to what the built-in font can print.
///
/// - Latin letters with diacritics lose the mark (`é` → `e`)
/// - Tabs become spaces; `\n` is kept
/// - Every other control character and non-ASCII character is dropped
///
/// ```
/// use peripage::protocol::text;
///
/// assert_eq!(text::filter_ascii("Crème brûlée\t3€"), "Creme brulee 3");
/// ```
pub fn filter_ascii(text: &str) -> String {
    text.chars()
        .filter_map(|ch| match ch {
            '\n' | ' '..='~' => Some(ch),
            '\t' => Some(' '),
            _ if ch.is_ascii() => None,
            _ => strip_diacritic(ch),
        })
        .collect()
}

/// One printed line: the text followed by `\n`.
pub fn line(text: &str) -> Vec<u8> {
    let mut cmd = Vec::with_capacity(text.len() + 1);
    cmd.extend_from_slice(text.as_bytes());
    cmd.push(b'\n');
    cmd
}

/// Feed used in place of an empty line.
pub fn paragraph_break() -> Vec<u8> {
    commands::feed(PARAGRAPH_BREAK_ROWS)
}

/// Base letter of a precomposed Latin character.
fn strip_diacritic(ch: char) -> Option<char> {
    let base = match ch {
        'À' | 'Á' | 'Â' | 'Ã' | 'Ä' | 'Å' | 'Ā' | 'Ă' | 'Ą' => 'A',
        'à' | 'á' | 'â' | 'ã' | 'ä' | 'å' | 'ā' | 'ă' | 'ą' => 'a',
        'Ç' | 'Ć' | 'Ĉ' | 'Ċ' | 'Č' => 'C',
        'ç' | 'ć' | 'ĉ' | 'ċ' | 'č' => 'c',
        'Ď' => 'D',
        'ď' => 'd',
        'È' | 'É' | 'Ê' | 'Ë' | 'Ē' | 'Ĕ' | 'Ė' | 'Ę' | 'Ě' => 'E',
        'è' | 'é' | 'ê' | 'ë' | 'ē' | 'ĕ' | 'ė' | 'ę' | 'ě' => 'e',
        'Ĝ' | 'Ğ' | 'Ġ' | 'Ģ' => 'G',
        'ĝ' | 'ğ' | 'ġ' | 'ģ' => 'g',
        'Ĥ' => 'H',
        'ĥ' => 'h',
        'Ì' | 'Í' | 'Î' | 'Ï' | 'Ĩ' | 'Ī' | 'Ĭ' | 'Į' | 'İ' => 'I',
        'ì' | 'í' | 'î' | 'ï' | 'ĩ' | 'ī' | 'ĭ' | 'į' => 'i',
        'Ĵ' => 'J',
        'ĵ' => 'j',
        'Ķ' => 'K',
        'ķ' => 'k',
        'Ĺ' | 'Ļ' | 'Ľ' => 'L',
        'ĺ' | 'ļ' | 'ľ' => 'l',
        'Ñ' | 'Ń' | 'Ņ' | 'Ň' => 'N',
        'ñ' | 'ń' | 'ņ' | 'ň' => 'n',
        'Ò' | 'Ó' | 'Ô' | 'Õ' | 'Ö' | 'Ō' | 'Ŏ' | 'Ő' => 'O',
        'ò' | 'ó' | 'ô' | 'õ' | 'ö' | 'ō' | 'ŏ' | 'ő' => 'o',
        'Ŕ' | 'Ŗ' | 'Ř' => 'R',
        'ŕ' | 'ŗ' | 'ř' => 'r',
        'Ś' | 'Ŝ' | 'Ş' | 'Š' => 'S',
        'ś' | 'ŝ' | 'ş' | 'š' => 's',
        'Ţ' | 'Ť' => 'T',
        'ţ' | 'ť' => 't',
        'Ù' | 'Ú' | 'Û' | 'Ü' | 'Ũ' | 'Ū' | 'Ŭ' | 'Ů' | 'Ű' | 'Ų' => 'U',
        'ù' | 'ú' | 'û' | 'ü' | 'ũ' | 'ū' | 'ŭ' | 'ů' | 'ű' | 'ų' => 'u',
        'Ŵ' => 'W',
        'ŵ' => 'w',
        'Ý' | 'Ÿ' | 'Ŷ' => 'Y',
        'ý' | 'ÿ' | 'ŷ' => 'y',
        'Ź' | 'Ż' | 'Ž' => 'Z',
        'ź' | 'ż' | 'ž' => 'z',
        _ => return None,
    };
    Some(base)
}

// ============================================================================
// TESTS
// ============================================================================
