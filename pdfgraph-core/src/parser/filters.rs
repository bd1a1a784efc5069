//! PDF Stream Filters
//!
//! Handles decompression and decoding of PDF streams according to ISO 32000-1 Section 7.4

use super::{ParseError, ParseResult};
use crate::objects::{Dictionary, Object};

#[cfg(feature = "compression")]
use flate2::read::ZlibDecoder;
#[cfg(feature = "compression")]
use std::io::Read;

/// Supported PDF filters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Filter {
    ASCIIHexDecode,
    ASCII85Decode,
    LZWDecode,
    FlateDecode,
    RunLengthDecode,
    CCITTFaxDecode,
    JBIG2Decode,
    DCTDecode,
    JPXDecode,
    Crypt,
}

impl Filter {
    /// Parse filter from name, including the inline-image abbreviations
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "ASCIIHexDecode" | "AHx" => Some(Filter::ASCIIHexDecode),
            "ASCII85Decode" | "A85" => Some(Filter::ASCII85Decode),
            "LZWDecode" | "LZW" => Some(Filter::LZWDecode),
            "FlateDecode" | "Fl" => Some(Filter::FlateDecode),
            "RunLengthDecode" | "RL" => Some(Filter::RunLengthDecode),
            "CCITTFaxDecode" | "CCF" => Some(Filter::CCITTFaxDecode),
            "JBIG2Decode" => Some(Filter::JBIG2Decode),
            "DCTDecode" | "DCT" => Some(Filter::DCTDecode),
            "JPXDecode" => Some(Filter::JPXDecode),
            "Crypt" => Some(Filter::Crypt),
            _ => None,
        }
    }
}

/// Decode stream data according to the `/Filter` chain and its `/DecodeParms`
pub fn decode_stream(data: &[u8], dict: &Dictionary) -> ParseResult<Vec<u8>> {
    let filters: Vec<&str> = match dict.get("Filter") {
        None => return Ok(data.to_vec()),
        Some(Object::Name(name)) => vec![name.as_str()],
        Some(Object::Array(array)) => array
            .iter()
            .map(|obj| {
                obj.as_name().ok_or_else(|| {
                    ParseError::StreamDecodeError("Invalid filter in array".to_string())
                })
            })
            .collect::<ParseResult<_>>()?,
        Some(other) => {
            return Err(ParseError::StreamDecodeError(format!(
                "Invalid Filter type: {}",
                other.type_name()
            )))
        }
    };

    let mut result = data.to_vec();
    for (index, name) in filters.into_iter().enumerate() {
        let filter = Filter::from_name(name)
            .ok_or_else(|| ParseError::StreamDecodeError(format!("Unknown filter: {name}")))?;
        result = apply_filter(&result, filter)?;
        if let Some(params) = decode_params(dict, index) {
            result = apply_predictor(&result, params)?;
        }
    }

    Ok(result)
}

/// Parameters for the filter at `index`; `/DecodeParms` is a dictionary or an array of them
fn decode_params(dict: &Dictionary, index: usize) -> Option<&Dictionary> {
    match dict.get("DecodeParms").or_else(|| dict.get("DP"))? {
        Object::Dictionary(params) if index == 0 => Some(params),
        Object::Array(array) => array.get(index).and_then(|obj| match obj {
            Object::Dictionary(params) => Some(params),
            _ => None,
        }),
        _ => None,
    }
}

/// Apply a single filter to data
fn apply_filter(data: &[u8], filter: Filter) -> ParseResult<Vec<u8>> {
    match filter {
        Filter::FlateDecode => decode_flate(data),
        Filter::ASCIIHexDecode => decode_ascii_hex(data),
        Filter::ASCII85Decode => decode_ascii85(data),
        Filter::RunLengthDecode => decode_run_length(data),
        _ => Err(ParseError::StreamDecodeError(format!(
            "Filter {filter:?} is not supported"
        ))),
    }
}

/// Decode FlateDecode (zlib/deflate) compressed data
#[cfg(feature = "compression")]
fn decode_flate(data: &[u8]) -> ParseResult<Vec<u8>> {
    let mut decoder = ZlibDecoder::new(data);
    let mut result = Vec::new();
    decoder
        .read_to_end(&mut result)
        .map_err(|e| ParseError::StreamDecodeError(format!("Flate decode error: {e}")))?;
    Ok(result)
}

#[cfg(not(feature = "compression"))]
fn decode_flate(_data: &[u8]) -> ParseResult<Vec<u8>> {
    Err(ParseError::StreamDecodeError(
        "FlateDecode requires 'compression' feature".to_string(),
    ))
}

/// Decode ASCIIHexDecode data
fn decode_ascii_hex(data: &[u8]) -> ParseResult<Vec<u8>> {
    let mut result = Vec::with_capacity(data.len() / 2);
    let mut pending: Option<u8> = None;

    for &ch in data {
        if ch == b'>' {
            break;
        }
        if super::lexer::is_whitespace(ch) {
            continue;
        }
        let value = hex_digit_value(ch).ok_or_else(|| {
            ParseError::StreamDecodeError(format!("Invalid hex digit: {}", ch as char))
        })?;
        match pending.take() {
            Some(high) => result.push(high << 4 | value),
            None => pending = Some(value),
        }
    }
    if let Some(high) = pending {
        result.push(high << 4);
    }

    Ok(result)
}

fn hex_digit_value(ch: u8) -> Option<u8> {
    match ch {
        b'0'..=b'9' => Some(ch - b'0'),
        b'A'..=b'F' => Some(ch - b'A' + 10),
        b'a'..=b'f' => Some(ch - b'a' + 10),
        _ => None,
    }
}

/// Decode ASCII85Decode data
fn decode_ascii85(data: &[u8]) -> ParseResult<Vec<u8>> {
    let data = data.strip_prefix(b"<~").unwrap_or(data);
    let mut result = Vec::with_capacity(data.len() * 4 / 5);
    let mut group: Vec<u8> = Vec::with_capacity(5);

    let group_value = |group: &[u8]| -> ParseResult<u32> {
        let value = group
            .iter()
            .fold(0u64, |acc, &ch| acc * 85 + (ch - b'!') as u64);
        u32::try_from(value)
            .map_err(|_| ParseError::StreamDecodeError("ASCII85 group overflow".to_string()))
    };

    for &c in data {
        match c {
            b'~' => break,
            b'z' if group.is_empty() => result.extend_from_slice(&[0, 0, 0, 0]),
            b'!'..=b'u' => {
                group.push(c);
                if group.len() == 5 {
                    result.extend_from_slice(&group_value(&group)?.to_be_bytes());
                    group.clear();
                }
            }
            _ if super::lexer::is_whitespace(c) => {}
            _ => {
                return Err(ParseError::StreamDecodeError(format!(
                    "Invalid ASCII85 character: {}",
                    c as char
                )))
            }
        }
    }

    if group.len() == 1 {
        return Err(ParseError::StreamDecodeError(
            "Truncated ASCII85 group".to_string(),
        ));
    }
    if !group.is_empty() {
        let kept = group.len() - 1;
        group.resize(5, b'u');
        result.extend_from_slice(&group_value(&group)?.to_be_bytes()[..kept]);
    }

    Ok(result)
}

/// Decode RunLengthDecode data
fn decode_run_length(data: &[u8]) -> ParseResult<Vec<u8>> {
    let mut result = Vec::new();
    let mut i = 0;
    while i < data.len() {
        let length = data[i];
        i += 1;
        match length {
            128 => break,
            0..=127 => {
                let count = length as usize + 1;
                let chunk = data.get(i..i + count).ok_or_else(|| {
                    ParseError::StreamDecodeError("Truncated run length literal".to_string())
                })?;
                result.extend_from_slice(chunk);
                i += count;
            }
            _ => {
                let byte = *data.get(i).ok_or_else(|| {
                    ParseError::StreamDecodeError("Truncated run length repeat".to_string())
                })?;
                result.extend(std::iter::repeat(byte).take(257 - length as usize));
                i += 1;
            }
        }
    }
    Ok(result)
}

/// Undo a TIFF (2) or PNG (>= 10) predictor described by `params`
pub fn apply_predictor(data: &[u8], params: &Dictionary) -> ParseResult<Vec<u8>> {
    let param = |key: &str, default: i64| -> usize {
        params
            .get_integer(key)
            .filter(|value| *value > 0)
            .unwrap_or(default) as usize
    };
    let predictor = params.get_integer("Predictor").unwrap_or(1);
    let columns = param("Columns", 1);
    let colors = param("Colors", 1);
    let bits_per_component = param("BitsPerComponent", 8);

    match predictor {
        1 => Ok(data.to_vec()),
        2 => apply_tiff_predictor(data, columns, colors, bits_per_component),
        10..=15 => apply_png_predictor(data, columns, colors, bits_per_component),
        other => Err(ParseError::StreamDecodeError(format!(
            "Unsupported predictor: {other}"
        ))),
    }
}

fn apply_tiff_predictor(
    data: &[u8],
    columns: usize,
    colors: usize,
    bits_per_component: usize,
) -> ParseResult<Vec<u8>> {
    if bits_per_component != 8 {
        return Err(ParseError::StreamDecodeError(format!(
            "TIFF predictor with {bits_per_component} bits per component is not supported"
        )));
    }
    let row_bytes = columns * colors;
    let mut result = data.to_vec();
    for row in result.chunks_mut(row_bytes.max(1)) {
        for i in colors..row.len() {
            row[i] = row[i].wrapping_add(row[i - colors]);
        }
    }
    Ok(result)
}

/// Each row carries its own PNG filter type byte; incomplete trailing rows are dropped.
fn apply_png_predictor(
    data: &[u8],
    columns: usize,
    colors: usize,
    bits_per_component: usize,
) -> ParseResult<Vec<u8>> {
    let row_bytes = (colors * columns * bits_per_component).div_ceil(8);
    let bpp = (colors * bits_per_component / 8).max(1);
    let row_size = row_bytes + 1;

    let mut result = Vec::with_capacity(data.len());
    let mut prev_row = vec![0u8; row_bytes];
    let mut current_row = vec![0u8; row_bytes];

    for row in data.chunks_exact(row_size) {
        let filter_type = row[0];
        let row_data = &row[1..];

        for i in 0..row_bytes {
            let left = if i >= bpp { current_row[i - bpp] } else { 0 };
            let above = prev_row[i];
            let upper_left = if i >= bpp { prev_row[i - bpp] } else { 0 };
            let predicted = match filter_type {
                0 => 0,
                1 => left,
                2 => above,
                3 => ((left as u16 + above as u16) / 2) as u8,
                4 => paeth_predictor(left, above, upper_left),
                other => {
                    return Err(ParseError::StreamDecodeError(format!(
                        "Invalid PNG filter type: {other}"
                    )))
                }
            };
            current_row[i] = row_data[i].wrapping_add(predicted);
        }

        result.extend_from_slice(&current_row);
        std::mem::swap(&mut prev_row, &mut current_row);
    }

    Ok(result)
}

fn paeth_predictor(left: u8, above: u8, upper_left: u8) -> u8 {
    let a = left as i32;
    let b = above as i32;
    let c = upper_left as i32;
    let p = a + b - c;
    let pa = (p - a).abs();
    let pb = (p - b).abs();
    let pc = (p - c).abs();

    if pa <= pb && pa <= pc {
        left
    } else if pb <= pc {
        above
    } else {
        upper_left
    }
}
