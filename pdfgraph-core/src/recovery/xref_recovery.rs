//! XRef recovery for corrupted PDF files
//!
//! Rebuilds cross-reference entries and a trailer by scanning the raw bytes
//! of a file for indirect object headers.

use crate::objects::{Dictionary, Object, ObjectId};
use crate::parser::lexer::Lexer;
use crate::parser::objects::parse_object;
use crate::parser::{
    read_indirect_object, ByteSource, ObjectStream, ParseOptions, ParseResult, XRefEntry,
};
use lazy_static::lazy_static;
use regex::bytes::Regex;
use std::collections::BTreeMap;
use std::io::{Cursor, SeekFrom};

lazy_static! {
    static ref OBJECT_HEADER: Regex = Regex::new(r"(?-u)\b(\d{1,10})\s+(\d{1,5})\s+obj\b").unwrap();
    static ref TRAILER_KEYWORD: Regex = Regex::new(r"(?-u)\btrailer\b").unwrap();
}

/// An `n g obj` header found in the raw bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectHeader {
    pub id: ObjectId,
    pub offset: u64,
}

/// Recovery statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryStats {
    /// Distinct object numbers with a header in the file
    pub objects_found: usize,
    /// Objects only reachable through an object stream
    pub compressed_found: usize,
    pub object_streams: usize,
    /// Objects whose body could not be parsed
    pub errors: usize,
    pub trailer_found: bool,
}

/// Result of a full-file scan
#[derive(Debug, Clone, Default)]
pub struct RecoveredXRef {
    pub entries: BTreeMap<u32, XRefEntry>,
    /// Best trailer candidate, if any
    pub trailer: Option<Dictionary>,
    pub stats: RecoveryStats,
}

/// XRef recovery engine
#[derive(Debug, Clone)]
pub struct XRefRecovery<'a> {
    options: &'a ParseOptions,
}

impl<'a> XRefRecovery<'a> {
    pub fn new(options: &'a ParseOptions) -> Self {
        Self { options }
    }

    /// Scans the whole source in a single pass.
    ///
    /// Later headers for the same object number replace earlier ones, which
    /// matches the order incremental updates are appended in. Only I/O
    /// errors are reported; unparsable objects are counted and skipped.
    pub fn scan(&self, source: &mut dyn ByteSource) -> ParseResult<RecoveredXRef> {
        source.seek(SeekFrom::Start(0))?;
        let mut data = Vec::new();
        source.read_to_end(&mut data)?;
        Ok(self.scan_bytes(&data))
    }

    pub fn scan_bytes(&self, data: &[u8]) -> RecoveredXRef {
        let mut result = RecoveredXRef::default();

        let mut direct: BTreeMap<u32, ObjectHeader> = BTreeMap::new();
        for header in scan_object_headers(data) {
            if header.id.number() <= self.options.max_object_number {
                direct.insert(header.id.number(), header);
            }
        }
        result.stats.objects_found = direct.len();

        let mut compressed: BTreeMap<u32, XRefEntry> = BTreeMap::new();
        let mut xref_stream_trailer = None;
        let mut catalog = None;

        let mut in_file_order: Vec<&ObjectHeader> = direct.values().collect();
        in_file_order.sort_by_key(|header| header.offset);

        for header in in_file_order {
            let mut cursor = Cursor::new(data);
            let object = match read_indirect_object(&mut cursor, header.offset, self.options) {
                Ok((_, object)) => object,
                Err(err) => {
                    tracing::debug!(object = %header.id, offset = header.offset, error = %err, "unparsable object during recovery");
                    result.stats.errors += 1;
                    continue;
                }
            };

            match &object {
                Object::Stream(stream) if stream.dict().get_type() == Some("ObjStm") => {
                    let stream_number = header.id.number();
                    match ObjectStream::parse(stream, self.options) {
                        Ok(objects) => {
                            result.stats.object_streams += 1;
                            for (index, number) in objects.object_numbers().enumerate() {
                                // Direct definitions in the file take precedence
                                if direct.contains_key(&number)
                                    || number > self.options.max_object_number
                                {
                                    continue;
                                }
                                compressed.insert(
                                    number,
                                    XRefEntry::Compressed {
                                        stream_number,
                                        index: index as u32,
                                    },
                                );
                            }
                        }
                        Err(err) => {
                            tracing::debug!(object = %header.id, error = %err, "unreadable object stream during recovery");
                            result.stats.errors += 1;
                        }
                    }
                }
                Object::Stream(stream) if stream.dict().get_type() == Some("XRef") => {
                    if stream.dict().get_reference("Root").is_some() {
                        xref_stream_trailer = Some(stream.dict().clone());
                    }
                }
                Object::Dictionary(dict) if dict.get_type() == Some("Catalog") => {
                    catalog = Some(header.id);
                }
                _ => {}
            }
        }

        result.stats.compressed_found = compressed.len();
        result.entries.extend(direct.values().map(|header| {
            (
                header.id.number(),
                XRefEntry::InUse {
                    offset: header.offset,
                    generation: header.id.generation(),
                },
            )
        }));
        result.entries.extend(compressed);

        let size = result
            .entries
            .keys()
            .next_back()
            .map_or(1, |max| *max as i64 + 1);

        let trailer = self
            .last_trailer_dictionary(data)
            .or(xref_stream_trailer)
            .or_else(|| {
                catalog.map(|root| {
                    tracing::info!(root = %root, "synthesizing trailer from catalog");
                    let mut dict = Dictionary::new();
                    dict.set("Root", root);
                    dict
                })
            });

        result.trailer = trailer.map(|mut dict| {
            if dict.get_integer("Size").map_or(true, |existing| existing < size) {
                dict.set("Size", size);
            }
            dict
        });
        result.stats.trailer_found = result.trailer.is_some();
        result
    }

    /// Last `trailer` dictionary in the file that names a catalog
    fn last_trailer_dictionary(&self, data: &[u8]) -> Option<Dictionary> {
        let positions: Vec<usize> = TRAILER_KEYWORD.find_iter(data).map(|m| m.end()).collect();

        positions.into_iter().rev().find_map(|start| {
            let mut lexer = Lexer::new(Cursor::new(&data[start..]));
            match parse_object(&mut lexer, self.options) {
                Ok(Object::Dictionary(dict)) if dict.get_reference("Root").is_some() => Some(dict),
                _ => None,
            }
        })
    }
}

/// All `n g obj` headers in `data`, in file order.
pub fn scan_object_headers(data: &[u8]) -> Vec<ObjectHeader> {
    OBJECT_HEADER
        .captures_iter(data)
        .filter_map(|caps| {
            let number = parse_decimal(caps.get(1)?.as_bytes())?;
            let generation = parse_decimal(caps.get(2)?.as_bytes())?;
            Some(ObjectHeader {
                id: ObjectId::new(
                    u32::try_from(number).ok()?,
                    u16::try_from(generation).ok()?,
                ),
                offset: caps.get(0)?.start() as u64,
            })
        })
        .collect()
}

fn parse_decimal(digits: &[u8]) -> Option<u64> {
    std::str::from_utf8(digits).ok()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recover(data: &[u8]) -> RecoveredXRef {
        XRefRecovery::new(&ParseOptions::lenient()).scan_bytes(data)
    }

    #[test]
    fn test_scan_object_headers() {
        let data = b"%PDF-1.4\n1 0 obj\n<<>>\nendobj\n12  3\nobj 5 endobj 99999999999 0 obj";
        let headers = scan_object_headers(data);
        assert_eq!(
            headers,
            vec![
                ObjectHeader {
                    id: ObjectId::new(1, 0),
                    offset: 9
                },
                ObjectHeader {
                    id: ObjectId::new(12, 3),
                    offset: 29
                },
            ]
        );
    }

    #[test]
    fn test_later_definition_wins() {
        let data = b"%PDF-1.4\n1 0 obj\n(old)\nendobj\n1 0 obj\n(new)\nendobj\n";
        let recovered = recover(data);
        assert_eq!(
            recovered.entries.get(&1),
            Some(&XRefEntry::InUse {
                offset: 30,
                generation: 0
            })
        );
        assert_eq!(recovered.stats.objects_found, 1);
    }

    #[test]
    fn test_trailer_keyword_preferred() {
        let data = b"%PDF-1.4\n1 0 obj\n<< /Type /Catalog >>\nendobj\n\
trailer\n<< /Size 2 /Root 1 0 R /Info 5 0 R >>\n";
        let recovered = recover(data);
        let trailer = recovered.trailer.unwrap();
        assert_eq!(trailer.get_reference("Info"), Some(ObjectId::new(5, 0)));
        assert!(recovered.stats.trailer_found);
    }

    #[test]
    fn test_trailer_synthesized_from_catalog() {
        let data = b"%PDF-1.4\n3 0 obj\n<< /Type /Catalog /Pages 4 0 R >>\nendobj\n4 0 obj\n<< /Type /Pages /Kids [] /Count 0 >>\nendobj\n";
        let recovered = recover(data);
        let trailer = recovered.trailer.unwrap();
        assert_eq!(trailer.get_reference("Root"), Some(ObjectId::new(3, 0)));
        assert_eq!(trailer.get_integer("Size"), Some(5));
    }

    #[test]
    fn test_object_stream_members_are_compressed() {
        let header = "7 0 8 3 ";
        let body = "42 (direct wins)";
        let content = format!("{header}{body}");
        let data = format!(
            "%PDF-1.5\n5 0 obj\n<< /Type /ObjStm /N 2 /First {} /Length {} >>\nstream\n{content}\nendstream\nendobj\n8 0 obj\n(direct)\nendobj\n",
            header.len(),
            content.len()
        );
        let recovered = recover(data.as_bytes());

        assert_eq!(
            recovered.entries.get(&7),
            Some(&XRefEntry::Compressed {
                stream_number: 5,
                index: 0
            })
        );
        assert!(matches!(
            recovered.entries.get(&8),
            Some(XRefEntry::InUse { .. })
        ));
        assert_eq!(recovered.stats.compressed_found, 1);
        assert_eq!(recovered.stats.object_streams, 1);
        assert!(recovered.trailer.is_none());
    }

    #[test]
    fn test_unparsable_objects_are_counted() {
        let data = b"%PDF-1.4\n1 0 obj\n<< /Unterminated\n";
        let recovered = recover(data);
        assert_eq!(recovered.stats.errors, 1);
        assert!(recovered.entries.contains_key(&1));
    }
}
