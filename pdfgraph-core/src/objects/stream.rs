#[cfg(feature = "compression")]
use crate::error::{PdfError, Result};
use crate::objects::{Dictionary, Object};
use crate::parser::filters::decode_stream;
use crate::parser::ParseResult;

/// A stream object: dictionary plus raw (still encoded) body.
#[derive(Debug, Clone, PartialEq)]
pub struct Stream {
    dictionary: Dictionary,
    data: Vec<u8>,
}

impl Stream {
    /// Builds a stream and sets `/Length` from the body.
    pub fn new(dictionary: Dictionary, data: Vec<u8>) -> Self {
        let mut dictionary = dictionary;
        dictionary.set("Length", data.len() as i64);
        Self { dictionary, data }
    }

    /// Builds a stream exactly as read from a file, keeping its dictionary untouched.
    pub(crate) fn from_parts(dictionary: Dictionary, data: Vec<u8>) -> Self {
        Self { dictionary, data }
    }

    pub fn dict(&self) -> &Dictionary {
        &self.dictionary
    }

    pub fn dict_mut(&mut self) -> &mut Dictionary {
        self.dictionary.set_updated(true);
        &mut self.dictionary
    }

    pub(crate) fn dict_mut_untracked(&mut self) -> &mut Dictionary {
        &mut self.dictionary
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Replaces the body and keeps `/Length` consistent.
    pub fn set_data(&mut self, data: Vec<u8>) {
        self.dictionary.set("Length", data.len() as i64);
        self.data = data;
    }

    /// Body after applying the `/Filter` chain.
    pub fn decode(&self) -> ParseResult<Vec<u8>> {
        decode_stream(&self.data, &self.dictionary)
    }

    pub fn is_updated(&self) -> bool {
        self.dictionary.is_updated()
    }

    pub fn set_updated(&mut self, updated: bool) {
        self.dictionary.set_updated(updated);
    }

    pub fn set_filter(&mut self, filter: &str) {
        self.dictionary.set("Filter", Object::name(filter));
    }

    #[cfg(feature = "compression")]
    pub fn compress_flate(&mut self) -> Result<()> {
        use flate2::write::ZlibEncoder;
        use flate2::Compression;
        use std::io::Write;

        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(&self.data)
            .map_err(|e| PdfError::InvalidStructure(format!("flate encoding failed: {e}")))?;
        let compressed = encoder
            .finish()
            .map_err(|e| PdfError::InvalidStructure(format!("flate encoding failed: {e}")))?;

        self.set_data(compressed);
        self.set_filter("FlateDecode");
        Ok(())
    }
}
