//! PDF Header Parser
//!
//! Parses PDF header and version according to ISO 32000-1 Section 7.5.2

use super::{ByteSource, ParseError, ParseOptions, ParseResult};
use std::io::{Read, SeekFrom};

/// Bytes searched for the `%PDF-` marker; some producers put junk before it.
const HEADER_SEARCH_WINDOW: usize = 1024;

/// PDF Version information
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct PdfVersion {
    pub major: u8,
    pub minor: u8,
}

impl PdfVersion {
    pub fn new(major: u8, minor: u8) -> Self {
        Self { major, minor }
    }
}

impl Default for PdfVersion {
    fn default() -> Self {
        Self::new(1, 4)
    }
}

impl std::fmt::Display for PdfVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// PDF Header information
#[derive(Debug, Clone, PartialEq)]
pub struct PdfHeader {
    pub version: PdfVersion,
    /// Offset of the `%PDF-` marker
    pub offset: u64,
    /// A comment line of bytes >= 128 follows the version line
    pub has_binary_marker: bool,
}

impl PdfHeader {
    /// Locates and parses the header near the start of `source`.
    ///
    /// In lenient mode a missing or unreadable header yields version 1.4 at offset 0.
    pub fn read(source: &mut dyn ByteSource, options: &ParseOptions) -> ParseResult<Self> {
        source.seek(SeekFrom::Start(0))?;
        let mut window = Vec::with_capacity(HEADER_SEARCH_WINDOW);
        (&mut *source)
            .take(HEADER_SEARCH_WINDOW as u64)
            .read_to_end(&mut window)?;

        match Self::parse(&window) {
            Ok(header) => Ok(header),
            Err(err) if options.lenient_syntax => {
                tracing::warn!("no usable PDF header ({err}), assuming version 1.4");
                Ok(Self {
                    version: PdfVersion::default(),
                    offset: 0,
                    has_binary_marker: false,
                })
            }
            Err(err) => Err(err),
        }
    }

    /// Parses a header from the first bytes of a file.
    pub fn parse(bytes: &[u8]) -> ParseResult<Self> {
        let offset = bytes
            .windows(5)
            .position(|w| w == b"%PDF-")
            .ok_or(ParseError::InvalidHeader)?;

        let rest = &bytes[offset + 5..];
        let line_end = rest
            .iter()
            .position(|&b| b == b'\r' || b == b'\n')
            .unwrap_or(rest.len());
        let line = std::str::from_utf8(&rest[..line_end]).map_err(|_| ParseError::InvalidHeader)?;

        let (major, minor) = line.trim().split_once('.').ok_or(ParseError::InvalidHeader)?;
        let minor: String = minor.chars().take_while(char::is_ascii_digit).collect();
        let version = PdfVersion::new(
            major.parse().map_err(|_| ParseError::InvalidHeader)?,
            minor.parse().map_err(|_| ParseError::InvalidHeader)?,
        );

        let after_line = &rest[line_end..];
        let next_line = after_line
            .iter()
            .position(|&b| b != b'\r' && b != b'\n')
            .map(|start| &after_line[start..])
            .unwrap_or(&[]);
        let has_binary_marker = next_line.first() == Some(&b'%')
            && next_line
                .iter()
                .skip(1)
                .take(4)
                .filter(|&&b| b >= 128)
                .count()
                >= 4;

        Ok(Self {
            version,
            offset: offset as u64,
            has_binary_marker,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_parse_simple_header() {
        let header = PdfHeader::parse(b"%PDF-1.7\n1 0 obj").unwrap();
        assert_eq!(header.version, PdfVersion::new(1, 7));
        assert_eq!(header.offset, 0);
        assert!(!header.has_binary_marker);
        assert_eq!(header.version.to_string(), "1.7");
    }

    #[test]
    fn test_parse_header_with_binary_marker_and_crlf() {
        let header = PdfHeader::parse(b"%PDF-2.0\r\n%\xE2\xE3\xCF\xD3\r\n").unwrap();
        assert_eq!(header.version, PdfVersion::new(2, 0));
        assert!(header.has_binary_marker);
    }

    #[test]
    fn test_header_after_junk() {
        let header = PdfHeader::parse(b"\xEF\xBB\xBFjunk%PDF-1.3 \n").unwrap();
        assert_eq!(header.offset, 7);
        assert_eq!(header.version, PdfVersion::new(1, 3));
    }

    #[test]
    fn test_invalid_headers() {
        assert!(PdfHeader::parse(b"%PS-Adobe-3.0").is_err());
        assert!(PdfHeader::parse(b"%PDF-x.y\n").is_err());
        assert!(PdfHeader::parse(b"%PDF-17\n").is_err());
    }

    #[test]
    fn test_read_lenient_fallback() {
        let mut source = Cursor::new(b"no header here".to_vec());
        let header = PdfHeader::read(&mut source, &ParseOptions::lenient()).unwrap();
        assert_eq!(header.version, PdfVersion::new(1, 4));

        let mut source = Cursor::new(b"no header here".to_vec());
        assert!(matches!(
            PdfHeader::read(&mut source, &ParseOptions::strict()),
            Err(ParseError::InvalidHeader)
        ));
    }
}
