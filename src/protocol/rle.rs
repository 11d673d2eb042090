//! # PackBits Run-Length Coding
//!
//! Byte-oriented run-length scheme used for compressed raster bands.
//!
//! ## Format
//!
//! The stream is a sequence of runs, each starting with a header byte `n`:
//!
//! | Header (as i8) | Meaning |
//! |----------------|---------|
//! | 0..=127        | copy the next `n + 1` bytes literally |
//! | -127..=-1      | repeat the next byte `1 - n` times (2..=128) |
//! | -128           | no-op (never emitted) |
//!
//! Thermal rasters are mostly white, so long runs of `0x00` collapse to two
//! bytes per 128. Noisy dithered photos can expand by up to 1/128; the
//! encoder falls back to raw bands in that case.

/// Longest run either kind of packet can describe.
const MAX_RUN: usize = 128;

/// Compress `data` with PackBits.
///
/// ## Example
///
/// ```
/// use peripage::protocol::rle;
///
/// let packed = rle::encode(&[0x00; 10]);
/// assert_eq!(packed, vec![(1i8 - 10) as u8, 0x00]);
/// assert_eq!(rle::decode(&packed).unwrap(), vec![0x00; 10]);
/// ```
pub fn encode(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() / 2 + 2);
    let mut literal_start = 0;
    let mut i = 0;

    while i < data.len() {
        let run = run_length(&data[i..]);

        // Runs of 2 inside a literal are cheaper left as literal bytes
        if run >= 3 || (run == 2 && i == literal_start) {
            flush_literal(&mut out, &data[literal_start..i]);
            out.push((1 - run as i16) as i8 as u8);
            out.push(data[i]);
            i += run;
            literal_start = i;
        } else {
            i += 1;
            if i - literal_start == MAX_RUN {
                flush_literal(&mut out, &data[literal_start..i]);
                literal_start = i;
            }
        }
    }
    flush_literal(&mut out, &data[literal_start..]);

    out
}

/// Decompress a PackBits stream. Returns `None` if the stream is truncated.
pub fn decode(data: &[u8]) -> Option<Vec<u8>> {
    let mut out = Vec::with_capacity(data.len() * 2);
    let mut i = 0;

    while i < data.len() {
        let header = data[i] as i8;
        i += 1;
        match header {
            0..=127 => {
                let len = header as usize + 1;
                out.extend_from_slice(data.get(i..i + len)?);
                i += len;
            }
            -127..=-1 => {
                let byte = *data.get(i)?;
                out.extend(std::iter::repeat_n(byte, (1 - header as i16) as usize));
                i += 1;
            }
            -128 => {}
        }
    }

    Some(out)
}

/// Length of the run of identical bytes at the start of `data`, capped at 128.
fn run_length(data: &[u8]) -> usize {
    let first = data[0];
    data.iter()
        .take(MAX_RUN)
        .take_while(|&&b| b == first)
        .count()
}

fn flush_literal(out: &mut Vec<u8>, literal: &[u8]) {
    if literal.is_empty() {
        return;
    }
    out.push((literal.len() - 1) as u8);
    out.extend_from_slice(literal);
}
