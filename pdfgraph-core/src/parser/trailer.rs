//! PDF Trailer
//!
//! Typed view over the trailer dictionary (ISO 32000-1 Section 7.5.5). For
//! files using xref streams the stream dictionary plays this role.

use super::{ParseError, ParseResult};
use crate::objects::{Dictionary, Object, ObjectId};

/// Keys that only describe an xref stream or a section link and never carry
/// over into a rewritten trailer.
const SECTION_KEYS: &[&str] = &[
    "Type", "W", "Index", "Filter", "DecodeParms", "Length", "Prev", "XRefStm",
];

#[derive(Debug, Clone, PartialEq, Default)]
pub struct PdfTrailer {
    dict: Dictionary,
}

impl PdfTrailer {
    pub fn new(dict: Dictionary) -> Self {
        Self { dict }
    }

    /// Number of entries in the xref table
    pub fn size(&self) -> ParseResult<u32> {
        self.dict
            .get_integer("Size")
            .filter(|size| *size >= 0)
            .map(|size| size as u32)
            .ok_or_else(|| ParseError::MissingKey("Size".to_string()))
    }

    /// Document catalog reference
    pub fn root(&self) -> ParseResult<ObjectId> {
        self.dict
            .get_reference("Root")
            .ok_or_else(|| ParseError::MissingKey("Root".to_string()))
    }

    pub fn info(&self) -> Option<ObjectId> {
        self.dict.get_reference("Info")
    }

    pub fn id(&self) -> Option<&Object> {
        self.dict.get("ID")
    }

    pub fn encrypt(&self) -> Option<&Object> {
        self.dict.get("Encrypt")
    }

    pub fn is_encrypted(&self) -> bool {
        self.dict.contains_key("Encrypt")
    }

    /// Offset of the previous xref section
    pub fn prev(&self) -> Option<u64> {
        offset_value(self.dict.get("Prev"))
    }

    /// Offset of the supplemental xref stream of a hybrid file
    pub fn xref_stm(&self) -> Option<u64> {
        offset_value(self.dict.get("XRefStm"))
    }

    /// Required entries are present
    pub fn validate(&self) -> ParseResult<()> {
        self.size()?;
        self.root()?;
        Ok(())
    }

    pub fn dict(&self) -> &Dictionary {
        &self.dict
    }

    pub fn dict_mut(&mut self) -> &mut Dictionary {
        &mut self.dict
    }

    /// Copy of the document-level entries, without section links or xref stream keys.
    pub fn document_entries(&self) -> Dictionary {
        self.dict
            .iter()
            .filter(|(key, _)| !SECTION_KEYS.contains(&key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }
}

/// Offsets are sometimes written as reals by sloppy producers.
fn offset_value(object: Option<&Object>) -> Option<u64> {
    match object? {
        Object::Integer(value) if *value >= 0 => Some(*value as u64),
        Object::Real(value) if *value >= 0.0 => Some(*value as u64),
        _ => None,
    }
}
