//! PDF serialization
//!
//! Writes indirect objects, classic cross-reference tables and trailers,
//! tracking byte offsets as it goes.

use crate::error::Result;
use crate::objects::{Dictionary, Object, ObjectId, PdfString, StringFormat};
use crate::parser::header::PdfVersion;
use std::collections::{BTreeMap, HashSet};
use std::io::{BufWriter, Write};
use std::path::Path;

/// Generation of the free-list head, entry 0
const FREE_HEAD_GENERATION: u16 = 65535;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum XRefLine {
    InUse { offset: u64, generation: u16 },
    Free { generation: u16 },
}

pub struct PdfWriter<W: Write> {
    writer: W,
    xref_lines: BTreeMap<u32, XRefLine>,
    /// Virtual objects; references to them are never written
    omitted: HashSet<ObjectId>,
    current_position: u64,
}

impl PdfWriter<BufWriter<std::fs::File>> {
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let file = std::fs::File::create(path)?;
        Ok(Self::new_with_writer(BufWriter::new(file)))
    }
}

impl<W: Write> PdfWriter<W> {
    pub fn new_with_writer(writer: W) -> Self {
        Self {
            writer,
            xref_lines: BTreeMap::new(),
            omitted: HashSet::new(),
            current_position: 0,
        }
    }

    /// References to `ids` are dropped from dictionaries and nulled in arrays.
    pub fn with_omitted(mut self, ids: impl IntoIterator<Item = ObjectId>) -> Self {
        self.omitted.extend(ids);
        self
    }

    /// Bytes written so far
    pub fn position(&self) -> u64 {
        self.current_position
    }

    pub fn write_header(&mut self, version: PdfVersion) -> Result<()> {
        self.write_bytes(format!("%PDF-{version}\n").as_bytes())?;
        // Binary comment so transfer tools treat the file as binary
        self.write_bytes(&[b'%', 0xE2, 0xE3, 0xCF, 0xD3, b'\n'])?;
        Ok(())
    }

    /// Copies bytes through unchanged, e.g. the original file of an incremental update.
    pub fn write_raw(&mut self, data: &[u8]) -> Result<()> {
        self.write_bytes(data)
    }

    /// Writes `n g obj ... endobj` and records its offset for the xref table.
    pub fn write_object(&mut self, id: ObjectId, object: &Object) -> Result<()> {
        self.xref_lines.insert(
            id.number(),
            XRefLine::InUse {
                offset: self.current_position,
                generation: id.generation(),
            },
        );

        let header = format!("{} {} obj\n", id.number(), id.generation());
        self.write_bytes(header.as_bytes())?;
        self.write_value(object)?;
        self.write_bytes(b"\nendobj\n")?;
        Ok(())
    }

    /// Records a free entry; `id.generation()` is the generation for reuse.
    pub fn write_free(&mut self, id: ObjectId) {
        self.xref_lines.insert(
            id.number(),
            XRefLine::Free {
                generation: id.generation(),
            },
        );
    }

    pub fn write_value(&mut self, object: &Object) -> Result<()> {
        match object {
            Object::Null => self.write_bytes(b"null")?,
            Object::Boolean(b) => self.write_bytes(if *b { b"true" } else { b"false" })?,
            Object::Integer(i) => self.write_bytes(i.to_string().as_bytes())?,
            Object::Real(f) => self.write_bytes(format_real(*f).as_bytes())?,
            Object::String(s) => self.write_bytes(&encode_string(s))?,
            Object::Name(n) => self.write_bytes(&encode_name(n))?,
            Object::Array(arr) => {
                self.write_bytes(b"[")?;
                for (i, obj) in arr.iter().enumerate() {
                    if i > 0 {
                        self.write_bytes(b" ")?;
                    }
                    if self.is_omitted(obj) {
                        self.write_bytes(b"null")?;
                    } else {
                        self.write_value(obj)?;
                    }
                }
                self.write_bytes(b"]")?;
            }
            Object::Dictionary(dict) => self.write_dictionary(dict, None)?,
            Object::Stream(stream) => {
                self.write_dictionary(stream.dict(), Some(stream.data().len()))?;
                self.write_bytes(b"\nstream\n")?;
                self.write_bytes(stream.data())?;
                self.write_bytes(b"\nendstream")?;
            }
            Object::Reference(id) => {
                let ref_str = format!("{} {} R", id.number(), id.generation());
                self.write_bytes(ref_str.as_bytes())?;
            }
        }
        Ok(())
    }

    /// Writes the recorded entries as an `xref` section and returns its offset.
    ///
    /// Free entries are linked into a list headed by object 0; the head is
    /// included whenever `with_free_head` is set or any free entry was recorded.
    pub fn write_xref(&mut self, with_free_head: bool) -> Result<u64> {
        let xref_position = self.current_position;
        let mut lines = self.xref_lines.clone();

        let free: Vec<u32> = lines
            .iter()
            .filter(|(number, line)| **number != 0 && matches!(line, XRefLine::Free { .. }))
            .map(|(number, _)| *number)
            .collect();
        if with_free_head || !free.is_empty() {
            lines.insert(
                0,
                XRefLine::Free {
                    generation: FREE_HEAD_GENERATION,
                },
            );
        }
        let next_free = |number: u32| -> u32 {
            free.iter()
                .copied()
                .find(|candidate| *candidate > number)
                .unwrap_or(0)
        };

        self.write_bytes(b"xref\n")?;
        for (start, run) in subsections(&lines) {
            self.write_bytes(format!("{} {}\n", start, run.len()).as_bytes())?;
            for (number, line) in run {
                let entry = match line {
                    XRefLine::InUse { offset, generation } => {
                        format!("{offset:010} {generation:05} n \n")
                    }
                    XRefLine::Free { generation } => {
                        format!("{:010} {generation:05} f \n", next_free(number))
                    }
                };
                self.write_bytes(entry.as_bytes())?;
            }
        }
        Ok(xref_position)
    }

    pub fn write_trailer(&mut self, trailer: &Dictionary, xref_position: u64) -> Result<()> {
        self.write_bytes(b"trailer\n")?;
        self.write_dictionary(trailer, None)?;
        self.write_bytes(b"\nstartxref\n")?;
        self.write_bytes(xref_position.to_string().as_bytes())?;
        self.write_bytes(b"\n%%EOF\n")?;
        self.writer.flush()?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    /// Dictionary syntax; `length` replaces `/Length` for stream dictionaries.
    fn write_dictionary(&mut self, dict: &Dictionary, length: Option<usize>) -> Result<()> {
        self.write_bytes(b"<<")?;
        for (key, value) in dict.iter() {
            if self.is_omitted(value) || (length.is_some() && key == "Length") {
                continue;
            }
            self.write_bytes(b"\n")?;
            self.write_bytes(&encode_name(key))?;
            self.write_bytes(b" ")?;
            self.write_value(value)?;
        }
        if let Some(length) = length {
            self.write_bytes(format!("\n/Length {length}").as_bytes())?;
        }
        self.write_bytes(b"\n>>")?;
        Ok(())
    }

    fn is_omitted(&self, object: &Object) -> bool {
        match object {
            Object::Reference(id) => self.omitted.contains(id),
            other => other.is_virtual(),
        }
    }

    fn write_bytes(&mut self, data: &[u8]) -> Result<()> {
        self.writer.write_all(data)?;
        self.current_position += data.len() as u64;
        Ok(())
    }
}

/// Serializes a single value, e.g. for diagnostics.
pub fn to_bytes(object: &Object) -> Result<Vec<u8>> {
    let mut writer = PdfWriter::new_with_writer(Vec::new());
    writer.write_value(object)?;
    Ok(writer.into_inner())
}

/// Contiguous runs of object numbers
fn subsections(lines: &BTreeMap<u32, XRefLine>) -> Vec<(u32, Vec<(u32, XRefLine)>)> {
    let mut runs: Vec<(u32, Vec<(u32, XRefLine)>)> = Vec::new();
    for (&number, &line) in lines {
        match runs.last_mut() {
            Some((start, run)) if *start + run.len() as u32 == number => run.push((number, line)),
            _ => runs.push((number, vec![(number, line)])),
        }
    }
    runs
}

/// Decimal notation without exponent; at most six fractional digits.
fn format_real(value: f64) -> String {
    if !value.is_finite() {
        return "0".to_string();
    }
    let formatted = format!("{value:.6}");
    let trimmed = formatted.trim_end_matches('0').trim_end_matches('.');
    match trimmed {
        "-0" | "" => "0".to_string(),
        other => other.to_string(),
    }
}

/// `/Name` with `#xx` escapes for delimiters, `#` and bytes outside `!`..`~`
fn encode_name(name: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(name.len() + 1);
    out.push(b'/');
    for &byte in name.as_bytes() {
        let regular = (0x21..=0x7E).contains(&byte) && !b"()<>[]{}/%#".contains(&byte);
        if regular {
            out.push(byte);
        } else {
            out.extend_from_slice(format!("#{byte:02X}").as_bytes());
        }
    }
    out
}

/// Literal or hex syntax, whichever the string was read with
fn encode_string(string: &PdfString) -> Vec<u8> {
    let bytes = string.as_bytes();
    match string.format() {
        StringFormat::Hex => {
            let mut out = Vec::with_capacity(bytes.len() * 2 + 2);
            out.push(b'<');
            for byte in bytes {
                out.extend_from_slice(format!("{byte:02X}").as_bytes());
            }
            out.push(b'>');
            out
        }
        StringFormat::Literal => {
            let mut out = Vec::with_capacity(bytes.len() + 2);
            out.push(b'(');
            for &byte in bytes {
                match byte {
                    b'(' | b')' | b'\\' => out.extend_from_slice(&[b'\\', byte]),
                    b'\r' => out.extend_from_slice(b"\\r"),
                    _ => out.push(byte),
                }
            }
            out.push(b')');
            out
        }
    }
}
