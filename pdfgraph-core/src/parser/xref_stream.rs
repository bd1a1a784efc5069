//! Cross-reference stream support for PDF 1.5+
//!
//! This module implements cross-reference streams according to
//! ISO 32000-1:2008 Section 7.5.8 (Cross-Reference Streams).
//!
//! Each entry is a fixed-width binary record whose field sizes come from the
//! `/W` array; `/Index` lists the object number ranges the records cover.

use super::xref::XRefEntry;
use super::{ParseError, ParseOptions, ParseResult};
use crate::objects::{Dictionary, Stream};

/// Field widths larger than this cannot be represented in a `u64`.
const MAX_FIELD_WIDTH: usize = 8;

/// Decoded cross-reference stream
#[derive(Debug, Clone)]
pub struct XRefStream {
    /// Stream dictionary, which doubles as the trailer of this section
    pub dict: Dictionary,
    /// Decoded stream data
    pub data: Vec<u8>,
    /// Field widths from `/W`
    pub widths: [usize; 3],
    /// `(first object number, count)` pairs from `/Index`
    pub index: Vec<(u32, u32)>,
}

impl XRefStream {
    /// Decodes an xref stream object.
    pub fn parse(stream: &Stream, options: &ParseOptions) -> ParseResult<Self> {
        let dict = stream.dict();
        if options.lenient_syntax {
            if dict.get_type().is_some_and(|t| t != "XRef") {
                tracing::warn!(found = ?dict.get_type(), "xref stream with unexpected /Type");
            }
        } else if dict.get_type() != Some("XRef") {
            return Err(ParseError::InvalidXRef(
                "stream is not of /Type /XRef".to_string(),
            ));
        }

        let widths = parse_widths(dict)?;
        let index = parse_index(dict)?;
        let data = stream.decode()?;

        Ok(Self {
            dict: dict.clone(),
            data,
            widths,
            index,
        })
    }

    /// Size of one binary record
    pub fn entry_size(&self) -> usize {
        self.widths.iter().sum()
    }

    /// Decodes every record into `(object number, entry)` pairs.
    ///
    /// Records of unknown type are skipped; data that ends mid-record is an error.
    pub fn entries(&self) -> ParseResult<Vec<(u32, XRefEntry)>> {
        let entry_size = self.entry_size();
        if entry_size == 0 {
            return Err(ParseError::InvalidXRef(
                "xref stream record size is zero".to_string(),
            ));
        }

        let mut entries = Vec::new();
        let mut records = self.data.chunks(entry_size);

        for &(first, count) in &self.index {
            for i in 0..count {
                let record = match records.next() {
                    Some(record) if record.len() == entry_size => record,
                    _ => {
                        return Err(ParseError::InvalidXRef(format!(
                            "xref stream data truncated at object {}",
                            first as u64 + i as u64
                        )))
                    }
                };
                let Some(number) = first.checked_add(i) else {
                    return Err(ParseError::InvalidXRef(
                        "object number overflow in /Index".to_string(),
                    ));
                };

                let [w0, w1, w2] = self.widths;
                // A missing type field means every record is in use
                let entry_type = if w0 == 0 { 1 } else { read_field(&record[..w0]) };
                let field2 = read_field(&record[w0..w0 + w1]);
                let field3 = read_field(&record[w0 + w1..w0 + w1 + w2]);

                let entry = match entry_type {
                    0 => XRefEntry::Free {
                        next_free: field2 as u32,
                        generation: field3 as u16,
                    },
                    1 => XRefEntry::InUse {
                        offset: field2,
                        generation: field3 as u16,
                    },
                    2 => XRefEntry::Compressed {
                        stream_number: field2 as u32,
                        index: field3 as u32,
                    },
                    other => {
                        tracing::warn!(
                            object = number,
                            entry_type = other,
                            "skipping xref stream record of unknown type"
                        );
                        continue;
                    }
                };
                entries.push((number, entry));
            }
        }

        Ok(entries)
    }
}

fn parse_widths(dict: &Dictionary) -> ParseResult<[usize; 3]> {
    let array = dict
        .get_array("W")
        .ok_or_else(|| ParseError::MissingKey("W".to_string()))?;
    if array.len() != 3 {
        return Err(ParseError::InvalidXRef(format!(
            "/W must have 3 elements, found {}",
            array.len()
        )));
    }

    let mut widths = [0usize; 3];
    for (slot, value) in widths.iter_mut().zip(array.iter()) {
        *slot = value
            .as_integer()
            .filter(|w| (0..=MAX_FIELD_WIDTH as i64).contains(w))
            .ok_or_else(|| ParseError::InvalidXRef(format!("invalid /W element {value:?}")))?
            as usize;
    }
    Ok(widths)
}

fn parse_index(dict: &Dictionary) -> ParseResult<Vec<(u32, u32)>> {
    let Some(array) = dict.get_array("Index") else {
        let size = dict
            .get_integer("Size")
            .filter(|size| *size >= 0)
            .ok_or_else(|| ParseError::MissingKey("Size".to_string()))?;
        return Ok(vec![(0, size as u32)]);
    };

    if array.len() % 2 != 0 {
        return Err(ParseError::InvalidXRef(
            "/Index must contain pairs".to_string(),
        ));
    }

    array
        .as_slice()
        .chunks(2)
        .map(|pair| {
            let first = pair[0].as_integer().filter(|n| *n >= 0);
            let count = pair[1].as_integer().filter(|n| *n >= 0);
            match (first, count) {
                (Some(first), Some(count)) => Ok((first as u32, count as u32)),
                _ => Err(ParseError::InvalidXRef(format!(
                    "invalid /Index pair {pair:?}"
                ))),
            }
        })
        .collect()
}

/// Big-endian unsigned field
fn read_field(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0u64, |acc, &b| (acc << 8) | b as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objects::Object;

    fn xref_stream(widths: [i64; 3], index: Option<Vec<i64>>, size: i64, data: Vec<u8>) -> Stream {
        let mut dict = Dictionary::new();
        dict.set("Type", Object::name("XRef"));
        dict.set(
            "W",
            widths.iter().map(|w| Object::Integer(*w)).collect::<Vec<_>>(),
        );
        dict.set("Size", size);
        if let Some(index) = index {
            dict.set("Index", index.into_iter().map(Object::Integer).collect::<Vec<_>>());
        }
        Stream::new(dict, data)
    }

    #[test]
    fn test_decode_all_entry_types() {
        let data = vec![
            0, 0, 0, 0xFF, // 0: free, next 0, gen 255
            1, 0, 0x0F, 0, // 1: offset 15
            2, 0, 5, 3, // 2: in stream 5 at index 3
        ];
        let stream = xref_stream([1, 2, 1], None, 3, data);
        let xref = XRefStream::parse(&stream, &ParseOptions::default()).unwrap();
        assert_eq!(xref.entry_size(), 4);

        let entries = xref.entries().unwrap();
        assert_eq!(
            entries,
            vec![
                (
                    0,
                    XRefEntry::Free {
                        next_free: 0,
                        generation: 255
                    }
                ),
                (
                    1,
                    XRefEntry::InUse {
                        offset: 15,
                        generation: 0
                    }
                ),
                (
                    2,
                    XRefEntry::Compressed {
                        stream_number: 5,
                        index: 3
                    }
                ),
            ]
        );
    }

    #[test]
    fn test_index_subsections() {
        let data = vec![1, 0, 10, 1, 0, 20, 1, 0, 30];
        let stream = xref_stream([1, 2, 0], Some(vec![3, 1, 10, 2]), 12, data);
        let xref = XRefStream::parse(&stream, &ParseOptions::default()).unwrap();
        let numbers: Vec<u32> = xref.entries().unwrap().iter().map(|(n, _)| *n).collect();
        assert_eq!(numbers, vec![3, 10, 11]);
    }

    #[test]
    fn test_zero_width_type_defaults_to_in_use() {
        let stream = xref_stream([0, 1, 0], Some(vec![7, 1]), 8, vec![42]);
        let xref = XRefStream::parse(&stream, &ParseOptions::default()).unwrap();
        assert_eq!(
            xref.entries().unwrap(),
            vec![(
                7,
                XRefEntry::InUse {
                    offset: 42,
                    generation: 0
                }
            )]
        );
    }

    #[test]
    fn test_unknown_type_is_skipped() {
        let stream = xref_stream([1, 1, 0], None, 2, vec![9, 0, 1, 5]);
        let xref = XRefStream::parse(&stream, &ParseOptions::default()).unwrap();
        let entries = xref.entries().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].0, 1);
    }

    #[test]
    fn test_truncated_data_is_an_error() {
        let stream = xref_stream([1, 2, 1], None, 2, vec![1, 0, 10, 0, 1]);
        let xref = XRefStream::parse(&stream, &ParseOptions::default()).unwrap();
        assert!(matches!(xref.entries(), Err(ParseError::InvalidXRef(_))));
    }

    #[test]
    fn test_invalid_widths() {
        let stream = xref_stream([1, 9, 1], None, 1, vec![]);
        assert!(XRefStream::parse(&stream, &ParseOptions::default()).is_err());

        let mut dict = Dictionary::new();
        dict.set("Type", Object::name("XRef"));
        dict.set("Size", 1);
        let stream = Stream::new(dict, vec![]);
        assert!(matches!(
            XRefStream::parse(&stream, &ParseOptions::default()),
            Err(ParseError::MissingKey(key)) if key == "W"
        ));
    }

    #[test]
    fn test_strict_requires_xref_type() {
        let mut stream = xref_stream([1, 1, 0], None, 1, vec![1, 0]);
        stream.dict_mut().set("Type", Object::name("ObjStm"));
        assert!(XRefStream::parse(&stream, &ParseOptions::strict()).is_err());
        assert!(XRefStream::parse(&stream, &ParseOptions::lenient()).is_ok());
    }

    #[test]
    #[cfg(feature = "compression")]
    fn test_flate_with_png_predictor() {
        use flate2::write::ZlibEncoder;
        use flate2::Compression;
        use std::io::Write;

        // Rows with PNG Up filter: [1,0,15] then delta [0,0,5] -> [1,0,20]
        let raw = vec![2, 1, 0, 15, 2, 0, 0, 5];
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&raw).unwrap();
        let compressed = encoder.finish().unwrap();

        let mut stream = xref_stream([1, 2, 0], Some(vec![1, 2]), 3, compressed);
        let mut params = Dictionary::new();
        params.set("Predictor", 12);
        params.set("Columns", 3);
        stream.dict_mut().set("Filter", Object::name("FlateDecode"));
        stream.dict_mut().set("DecodeParms", params);

        let xref = XRefStream::parse(&stream, &ParseOptions::default()).unwrap();
        let offsets: Vec<_> = xref
            .entries()
            .unwrap()
            .into_iter()
            .map(|(_, entry)| entry)
            .collect();
        assert_eq!(
            offsets,
            vec![
                XRefEntry::InUse {
                    offset: 15,
                    generation: 0
                },
                XRefEntry::InUse {
                    offset: 20,
                    generation: 0
                },
            ]
        );
    }
}
