//! PDF Object Stream Parser
//!
//! Handles compressed objects stored in object streams (PDF 1.5+,
//! ISO 32000-1 Section 7.5.7). The decoded data starts with `N` pairs of
//! object number and relative offset; object bodies begin at `/First`.

use super::lexer::{Lexer, Token};
use super::objects::parse_object;
use super::{ParseError, ParseOptions, ParseResult};
use crate::objects::{Object, Stream};
use std::io::Cursor;

/// A decoded object stream. Objects are parsed on demand by index.
#[derive(Debug, Clone)]
pub struct ObjectStream {
    data: Vec<u8>,
    first: usize,
    /// `(object number, offset relative to first)` in stream order
    offsets: Vec<(u32, usize)>,
}

impl ObjectStream {
    /// Decodes `stream` and reads its offset table.
    pub fn parse(stream: &Stream, options: &ParseOptions) -> ParseResult<Self> {
        let dict = stream.dict();
        if dict.get_type() != Some("ObjStm") {
            if options.lenient_syntax {
                tracing::debug!(found = ?dict.get_type(), "object stream without /Type /ObjStm");
            } else {
                return Err(ParseError::ObjectStreamError(
                    "stream is not of /Type /ObjStm".to_string(),
                ));
            }
        }

        let n = dict
            .get_integer("N")
            .filter(|n| *n >= 0)
            .ok_or_else(|| ParseError::MissingKey("N".to_string()))? as usize;
        let first = dict
            .get_integer("First")
            .filter(|first| *first >= 0)
            .ok_or_else(|| ParseError::MissingKey("First".to_string()))? as usize;

        let data = stream.decode()?;
        if first > data.len() {
            return Err(ParseError::ObjectStreamError(format!(
                "/First {first} is past the end of {} decoded bytes",
                data.len()
            )));
        }

        let mut lexer = Lexer::new(Cursor::new(&data[..first]));
        let mut offsets = Vec::with_capacity(n.min(first / 4 + 1));
        for _ in 0..n {
            let number = match lexer.next_significant_token()? {
                Token::Integer(num) if (0..=u32::MAX as i64).contains(&num) => num as u32,
                other => {
                    return Err(ParseError::ObjectStreamError(format!(
                        "expected object number in offset table, found {other:?}"
                    )))
                }
            };
            let offset = match lexer.next_significant_token()? {
                Token::Integer(off) if off >= 0 => off as usize,
                other => {
                    return Err(ParseError::ObjectStreamError(format!(
                        "expected offset in offset table, found {other:?}"
                    )))
                }
            };
            offsets.push((number, offset));
        }

        Ok(Self {
            data,
            first,
            offsets,
        })
    }

    /// Number of objects in the stream
    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// Object numbers in stream order
    pub fn object_numbers(&self) -> impl Iterator<Item = u32> + '_ {
        self.offsets.iter().map(|(number, _)| *number)
    }

    /// Parses the object stored at `index`.
    ///
    /// When `expected_number` is given, the offset table must list that
    /// number at `index`; lenient parsing only logs a mismatch.
    pub fn object_at(
        &self,
        index: usize,
        expected_number: Option<u32>,
        options: &ParseOptions,
    ) -> ParseResult<(u32, Object)> {
        let (number, offset) = *self.offsets.get(index).ok_or_else(|| {
            ParseError::ObjectStreamError(format!(
                "index {index} out of range for {} objects",
                self.offsets.len()
            ))
        })?;

        if let Some(expected) = expected_number.filter(|expected| *expected != number) {
            if !options.lenient_syntax {
                return Err(ParseError::ObjectStreamError(format!(
                    "index {index} holds object {number}, expected {expected}"
                )));
            }
            tracing::warn!(index, number, expected, "object stream index mismatch");
        }

        let start = self.first + offset;
        let body = self.data.get(start..).ok_or_else(|| {
            ParseError::ObjectStreamError(format!("offset {start} is past the end of the stream"))
        })?;
        let mut lexer = Lexer::new(Cursor::new(body));
        let object = parse_object(&mut lexer, options)?;
        if matches!(object, Object::Stream(_)) {
            return Err(ParseError::ObjectStreamError(format!(
                "object {number} is a stream, which object streams cannot hold"
            )));
        }
        Ok((number, object))
    }

    /// Index of `number` in the offset table
    pub fn index_of(&self, number: u32) -> Option<usize> {
        self.offsets.iter().position(|(n, _)| *n == number)
    }
}
