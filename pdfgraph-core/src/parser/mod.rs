//! PDF Parser Module
//!
//! Reads the file structure defined by ISO 32000-1 Section 7.5: header,
//! indirect objects, cross-reference tables and streams, object streams and
//! trailers. Everything here works over a [`ByteSource`] and never opens files
//! on its own.

pub mod filters;
pub mod header;
pub mod lexer;
pub mod object_stream;
pub mod objects;
pub mod trailer;
pub mod xref;
pub mod xref_stream;

use crate::objects::{Object, ObjectId};
use std::io::{Read, Seek, SeekFrom};

pub use self::header::{PdfHeader, PdfVersion};
pub use self::lexer::{Lexer, Token};
pub use self::object_stream::ObjectStream;
pub use self::objects::{parse_indirect_object, parse_object};
pub use self::trailer::PdfTrailer;
pub use self::xref::{XRefEntry, XRefReader, XRefTable};
pub use self::xref_stream::XRefStream;

/// Result type for parser operations
pub type ParseResult<T> = Result<T, ParseError>;

/// PDF Parser errors
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid PDF header")]
    InvalidHeader,

    #[error("Syntax error at position {position}: {message}")]
    SyntaxError { position: u64, message: String },

    #[error("Unexpected token: expected {expected}, found {found}")]
    UnexpectedToken { expected: String, found: String },

    #[error("Invalid object reference: {0} {1} R")]
    InvalidReference(u32, u16),

    #[error("Missing required key: {0}")]
    MissingKey(String),

    #[error("Invalid xref data: {0}")]
    InvalidXRef(String),

    #[error("No trailer found")]
    MissingTrailer,

    #[error("Circular reference detected at object {0}")]
    CircularReference(u32),

    #[error("Stream decode error: {0}")]
    StreamDecodeError(String),

    #[error("Nesting deeper than {0} levels")]
    RecursionLimit(usize),

    #[error("Object stream error: {0}")]
    ObjectStreamError(String),
}

/// What happens when a reference points at nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferencePolicy {
    /// Dangling and out-of-range references resolve to null.
    Lenient,
    /// Policy-aware resolution reports them as [`ParseError::InvalidReference`].
    Strict,
}

/// Parser configuration.
#[derive(Debug, Clone)]
pub struct ParseOptions {
    /// Tolerate missing `endobj`, malformed dictionary keys and a missing header.
    pub lenient_syntax: bool,
    pub reference_policy: ReferencePolicy,
    /// Rebuild the xref table by scanning the whole file when it is unusable.
    pub recover_xref: bool,
    pub max_recursion_depth: usize,
    pub max_xref_sections: usize,
    /// Entries with larger object numbers are ignored.
    pub max_object_number: u32,
}

impl ParseOptions {
    pub fn lenient() -> Self {
        Self {
            lenient_syntax: true,
            reference_policy: ReferencePolicy::Lenient,
            recover_xref: true,
            max_recursion_depth: 256,
            max_xref_sections: 1024,
            max_object_number: 8_388_607,
        }
    }

    pub fn strict() -> Self {
        Self {
            lenient_syntax: false,
            reference_policy: ReferencePolicy::Strict,
            recover_xref: false,
            ..Self::lenient()
        }
    }
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self::lenient()
    }
}

/// Seekable byte input backing a document.
pub trait ByteSource: Read + Seek {
    fn length(&mut self) -> std::io::Result<u64> {
        let current = self.stream_position()?;
        let end = self.seek(SeekFrom::End(0))?;
        self.seek(SeekFrom::Start(current))?;
        Ok(end)
    }
}

impl<T: Read + Seek> ByteSource for T {}

/// Parses the single indirect object starting at `offset`.
pub fn read_indirect_object(
    source: &mut dyn ByteSource,
    offset: u64,
    options: &ParseOptions,
) -> ParseResult<(ObjectId, Object)> {
    source.seek(SeekFrom::Start(offset))?;
    let mut lexer = Lexer::new_at(source, offset);
    parse_indirect_object(&mut lexer, options)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_options_presets() {
        let lenient = ParseOptions::default();
        assert!(lenient.lenient_syntax);
        assert!(lenient.recover_xref);
        assert_eq!(lenient.reference_policy, ReferencePolicy::Lenient);

        let strict = ParseOptions::strict();
        assert!(!strict.lenient_syntax);
        assert!(!strict.recover_xref);
        assert_eq!(strict.reference_policy, ReferencePolicy::Strict);
        assert_eq!(strict.max_object_number, lenient.max_object_number);
    }

    #[test]
    fn test_byte_source_length_keeps_position() {
        let mut source = Cursor::new(vec![0u8; 42]);
        source.seek(SeekFrom::Start(10)).unwrap();
        assert_eq!(source.length().unwrap(), 42);
        assert_eq!(source.stream_position().unwrap(), 10);
    }

    #[test]
    fn test_read_indirect_object_at_offset() {
        let data = b"garbage 7 0 obj\n<< /Type /Test >>\nendobj\n";
        let mut source = Cursor::new(data.to_vec());
        let (id, object) = read_indirect_object(&mut source, 8, &ParseOptions::default()).unwrap();
        assert_eq!(id, ObjectId::new(7, 0));
        assert_eq!(object.as_dict().and_then(|d| d.get_type()), Some("Test"));
    }

    #[test]
    fn test_error_messages() {
        assert_eq!(
            ParseError::InvalidReference(3, 1).to_string(),
            "Invalid object reference: 3 1 R"
        );
        assert_eq!(
            ParseError::SyntaxError {
                position: 12,
                message: "bad".to_string()
            }
            .to_string(),
            "Syntax error at position 12: bad"
        );
    }
}
