//! PDF Cross-Reference Table Parser
//!
//! Reads the chain of cross-reference sections (ISO 32000-1 Section 7.5.4
//! and 7.5.8) starting from the last `startxref`: classic tables, xref
//! streams, hybrid files with `/XRefStm` and the extra table of linearized
//! files. Sections are visited newest first and the first definition of an
//! object number wins. When the chain is unusable the whole file is scanned
//! instead (see [`crate::recovery`]).

use super::lexer::{Lexer, Token};
use super::objects::{parse_indirect_object, parse_object};
use super::trailer::PdfTrailer;
use super::xref_stream::XRefStream;
use super::{ByteSource, ParseError, ParseOptions, ParseResult};
use crate::objects::Object;
use crate::recovery::XRefRecovery;
use std::collections::{BTreeMap, HashSet};
use std::io::{Read, SeekFrom};

/// Bytes at the end of the file searched for `startxref`
const STARTXREF_WINDOW: u64 = 1024;
/// How far before a linearization `/T` offset the `xref` keyword may sit
const LINEARIZED_LOOKBACK: u64 = 64;

/// Cross-reference entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XRefEntry {
    /// Free object entry
    Free { next_free: u32, generation: u16 },
    /// Object stored directly at a byte offset
    InUse { offset: u64, generation: u16 },
    /// Object stored inside an object stream (PDF 1.5+)
    Compressed { stream_number: u32, index: u32 },
}

impl XRefEntry {
    /// Generation number; compressed objects always have generation 0
    pub fn generation(&self) -> u16 {
        match self {
            XRefEntry::Free { generation, .. } | XRefEntry::InUse { generation, .. } => *generation,
            XRefEntry::Compressed { .. } => 0,
        }
    }

    pub fn is_free(&self) -> bool {
        matches!(self, XRefEntry::Free { .. })
    }
}

/// Merged cross-reference table of a file
#[derive(Debug, Clone, Default)]
pub struct XRefTable {
    entries: BTreeMap<u32, XRefEntry>,
    trailer: Option<PdfTrailer>,
    /// Offset named by the final `startxref`, if one was found
    xref_offset: Option<u64>,
    recovered: bool,
}

impl XRefTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `entry` unless `number` is already defined. Returns whether it was added.
    pub fn merge_entry(&mut self, number: u32, entry: XRefEntry) -> bool {
        match self.entries.entry(number) {
            std::collections::btree_map::Entry::Vacant(slot) => {
                slot.insert(entry);
                true
            }
            std::collections::btree_map::Entry::Occupied(_) => false,
        }
    }

    /// Defines `number`, replacing any earlier definition.
    pub fn set_entry(&mut self, number: u32, entry: XRefEntry) {
        self.entries.insert(number, entry);
    }

    pub fn get(&self, number: u32) -> Option<&XRefEntry> {
        self.entries.get(&number)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in object number order
    pub fn iter(&self) -> impl Iterator<Item = (u32, &XRefEntry)> {
        self.entries.iter().map(|(number, entry)| (*number, entry))
    }

    pub fn max_object_number(&self) -> Option<u32> {
        self.entries.keys().next_back().copied()
    }

    pub fn trailer(&self) -> Option<&PdfTrailer> {
        self.trailer.as_ref()
    }

    pub fn set_trailer(&mut self, trailer: PdfTrailer) {
        self.trailer = Some(trailer);
    }

    pub fn xref_offset(&self) -> Option<u64> {
        self.xref_offset
    }

    /// Whether the table was rebuilt by scanning the file
    pub fn is_recovered(&self) -> bool {
        self.recovered
    }

    /// Older trailers only contribute keys the newer ones lack.
    fn merge_trailer(&mut self, older: &PdfTrailer) {
        match self.trailer.as_mut() {
            None => self.trailer = Some(older.clone()),
            Some(current) => {
                for (key, value) in older.document_entries().iter() {
                    if !current.dict().contains_key(key) {
                        current.dict_mut().insert_quiet(key.clone(), value.clone());
                    }
                }
            }
        }
    }

    fn has_usable_trailer(&self) -> bool {
        self.trailer
            .as_ref()
            .is_some_and(|trailer| trailer.root().is_ok())
    }
}

/// Locates the offset named by the last `startxref` keyword.
pub fn find_startxref(source: &mut dyn ByteSource) -> ParseResult<u64> {
    let length = source.length()?;
    let window = length.min(STARTXREF_WINDOW);
    source.seek(SeekFrom::Start(length - window))?;
    let mut tail = Vec::with_capacity(window as usize);
    (&mut *source).take(window).read_to_end(&mut tail)?;

    let keyword = b"startxref";
    let position = tail
        .windows(keyword.len())
        .rposition(|w| w == keyword)
        .ok_or_else(|| ParseError::InvalidXRef("startxref not found".to_string()))?;

    let digits: String = tail[position + keyword.len()..]
        .iter()
        .skip_while(|b| b.is_ascii_whitespace())
        .take_while(|b| b.is_ascii_digit())
        .map(|&b| b as char)
        .collect();
    digits
        .parse()
        .map_err(|_| ParseError::InvalidXRef("startxref without offset".to_string()))
}

/// Walks the xref chain of one file.
pub struct XRefReader<'a> {
    source: &'a mut dyn ByteSource,
    options: &'a ParseOptions,
    table: XRefTable,
    visited: HashSet<u64>,
    sections: usize,
}

impl<'a> XRefReader<'a> {
    pub fn new(source: &'a mut dyn ByteSource, options: &'a ParseOptions) -> Self {
        Self {
            source,
            options,
            table: XRefTable::new(),
            visited: HashSet::new(),
            sections: 0,
        }
    }

    /// Reads the whole chain, recovering by a full scan when allowed.
    ///
    /// Fails only if no trailer can be found at all, or if recovery is
    /// disabled and the chain is broken.
    pub fn read(mut self) -> ParseResult<XRefTable> {
        let chain = find_startxref(self.source).and_then(|offset| {
            self.table.xref_offset = Some(offset);
            self.follow_chain(offset)
        });

        if chain.is_ok() {
            self.read_linearized_table();
        }

        match chain {
            Ok(()) if self.table.has_usable_trailer() => {}
            Ok(()) if !self.options.recover_xref => {}
            Ok(()) => {
                tracing::warn!("xref chain has no usable trailer, scanning file");
                self.recover()?;
            }
            Err(err) if self.options.recover_xref => {
                tracing::warn!(error = %err, "xref chain unreadable, scanning file");
                self.recover()?;
            }
            Err(err) => return Err(err),
        }

        if self.table.trailer.is_none() {
            return Err(ParseError::MissingTrailer);
        }
        Ok(self.table)
    }

    /// Follows `/Prev` links from `start`, merging each section.
    fn follow_chain(&mut self, start: u64) -> ParseResult<()> {
        let mut next = Some(start);

        while let Some(offset) = next {
            if !self.visited.insert(offset) {
                tracing::warn!(offset, "xref chain loops back, stopping");
                break;
            }
            if self.sections >= self.options.max_xref_sections {
                tracing::warn!(
                    limit = self.options.max_xref_sections,
                    "too many xref sections, stopping"
                );
                break;
            }

            let trailer = self.read_section(offset)?;

            // A hybrid file's stream is merged before its /Prev chain
            if let Some(stream_offset) = trailer.xref_stm() {
                if self.visited.insert(stream_offset) {
                    tracing::debug!(offset = stream_offset, "reading hybrid /XRefStm section");
                    self.read_section(stream_offset)?;
                }
            }

            next = trailer.prev();
        }

        Ok(())
    }

    /// Reads one section at `offset`, merges its entries and returns its trailer.
    pub fn read_section(&mut self, offset: u64) -> ParseResult<PdfTrailer> {
        self.sections += 1;
        self.source.seek(SeekFrom::Start(offset))?;
        let mut lexer = Lexer::new_at(&mut *self.source, offset);

        let trailer = match lexer.next_significant_token()? {
            Token::XRef => {
                let (count, trailer) = read_table(&mut lexer, &mut self.table, self.options)?;
                tracing::debug!(offset, entries = count, "read xref table");
                trailer
            }
            token @ Token::Integer(_) => {
                lexer.push_token(token);
                let (count, trailer) =
                    read_stream_section(&mut lexer, &mut self.table, self.options)?;
                tracing::debug!(offset, entries = count, "read xref stream");
                trailer
            }
            other => {
                return Err(ParseError::InvalidXRef(format!(
                    "no xref section at offset {offset}, found {other:?}"
                )))
            }
        };

        self.table.merge_trailer(&trailer);
        Ok(trailer)
    }

    /// Reads the table a linearization dictionary points to with `/T`.
    ///
    /// Failures here never abort loading; the regular chain already succeeded.
    fn read_linearized_table(&mut self) {
        let Some(t) = self.linearized_offset() else {
            return;
        };
        let offset = self.xref_keyword_before(t).unwrap_or(t);
        if !self.visited.insert(offset) {
            return;
        }
        tracing::debug!(offset, "reading xref section named by linearization /T");
        if let Err(err) = self.read_section(offset) {
            tracing::warn!(offset, error = %err, "ignoring unreadable linearized xref section");
        }
    }

    /// `/T` of a linearization dictionary, if the first object is one.
    fn linearized_offset(&mut self) -> Option<u64> {
        let header = super::header::PdfHeader::read(self.source, self.options).ok()?;
        self.source.seek(SeekFrom::Start(header.offset)).ok()?;
        let mut lexer = Lexer::new_at(&mut *self.source, header.offset);
        let (_, object) = parse_indirect_object(&mut lexer, self.options).ok()?;
        let dict = object.as_dict()?;
        if !dict.contains_key("Linearized") {
            return None;
        }
        dict.get_integer("T")
            .filter(|t| *t > 0)
            .map(|t| t as u64)
    }

    /// Start of the `xref` keyword shortly before `offset`
    fn xref_keyword_before(&mut self, offset: u64) -> Option<u64> {
        let start = offset.saturating_sub(LINEARIZED_LOOKBACK);
        self.source.seek(SeekFrom::Start(start)).ok()?;
        let mut window = Vec::new();
        (&mut *self.source)
            .take(offset - start + 4)
            .read_to_end(&mut window)
            .ok()?;

        window
            .windows(4)
            .enumerate()
            .rev()
            .find(|(i, w)| *w == b"xref" && !window[..*i].ends_with(b"start"))
            .map(|(i, _)| start + i as u64)
    }

    /// Rebuilds entries and trailer from a scan of the whole file.
    fn recover(&mut self) -> ParseResult<()> {
        let recovered = XRefRecovery::new(self.options).scan(self.source)?;
        tracing::info!(
            objects = recovered.stats.objects_found,
            compressed = recovered.stats.compressed_found,
            has_trailer = recovered.trailer.is_some(),
            "xref recovery finished"
        );

        for (number, entry) in recovered.entries {
            self.table.set_entry(number, entry);
        }
        if !self.table.has_usable_trailer() {
            if let Some(trailer) = recovered.trailer {
                self.table.trailer = Some(PdfTrailer::new(trailer));
            }
        }
        self.table.recovered = true;
        Ok(())
    }
}

/// Parses subsections after the `xref` keyword, then the trailer dictionary.
fn read_table<R: Read>(
    lexer: &mut Lexer<R>,
    table: &mut XRefTable,
    options: &ParseOptions,
) -> ParseResult<(usize, PdfTrailer)> {
    let mut count_read = 0;

    loop {
        let mut first = match lexer.next_significant_token()? {
            Token::Trailer => break,
            Token::Integer(first) if first >= 0 => first as u64,
            other => {
                return Err(ParseError::InvalidXRef(format!(
                    "expected subsection header or trailer, found {other:?}"
                )))
            }
        };
        let count = match lexer.next_significant_token()? {
            Token::Integer(count) if count >= 0 => count as u64,
            other => {
                return Err(ParseError::InvalidXRef(format!(
                    "expected subsection count, found {other:?}"
                )))
            }
        };

        for i in 0..count {
            let entry = read_table_entry(lexer)?;

            if i == 0 && first == 1 && entry.is_free() {
                tracing::warn!("xref subsection starting at 1 opens with a free entry, renumbering from 0");
                first = 0;
            }

            let number = first + i;
            if number > options.max_object_number as u64 {
                tracing::debug!(number, "ignoring xref entry beyond object number limit");
                continue;
            }
            table.merge_entry(number as u32, entry);
            count_read += 1;
        }
    }

    match parse_object(lexer, options)? {
        Object::Dictionary(dict) => Ok((count_read, PdfTrailer::new(dict))),
        other => Err(ParseError::InvalidXRef(format!(
            "trailer is a {}, not a dictionary",
            other.type_name()
        ))),
    }
}

/// One `nnnnnnnnnn ggggg n|f` line. Only the token sequence matters, not the column widths.
fn read_table_entry<R: Read>(lexer: &mut Lexer<R>) -> ParseResult<XRefEntry> {
    let field = match lexer.next_significant_token()? {
        Token::Integer(value) if value >= 0 => value as u64,
        other => {
            return Err(ParseError::InvalidXRef(format!(
                "expected xref entry offset, found {other:?}"
            )))
        }
    };
    let generation = match lexer.next_significant_token()? {
        Token::Integer(value) if (0..=u16::MAX as i64).contains(&value) => value as u16,
        other => {
            return Err(ParseError::InvalidXRef(format!(
                "expected xref entry generation, found {other:?}"
            )))
        }
    };

    match lexer.next_significant_token()? {
        Token::Keyword(flag) if flag == "n" => Ok(XRefEntry::InUse {
            offset: field,
            generation,
        }),
        Token::Keyword(flag) if flag == "f" => Ok(XRefEntry::Free {
            next_free: field as u32,
            generation,
        }),
        other => Err(ParseError::InvalidXRef(format!(
            "expected xref entry type n or f, found {other:?}"
        ))),
    }
}

/// Parses `n g obj << /Type /XRef ... >> stream ...` and merges its records.
fn read_stream_section<R: Read>(
    lexer: &mut Lexer<R>,
    table: &mut XRefTable,
    options: &ParseOptions,
) -> ParseResult<(usize, PdfTrailer)> {
    let (id, object) = parse_indirect_object(lexer, options)?;
    let Object::Stream(stream) = object else {
        return Err(ParseError::InvalidXRef(format!(
            "object {id} at xref offset is not a stream"
        )));
    };

    let xref_stream = XRefStream::parse(&stream, options)?;
    let mut count = 0;
    for (number, entry) in xref_stream.entries()? {
        if number > options.max_object_number {
            continue;
        }
        table.merge_entry(number, entry);
        count += 1;
    }

    Ok((count, PdfTrailer::new(xref_stream.dict)))
}
