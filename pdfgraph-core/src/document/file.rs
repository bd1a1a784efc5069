//! Document session
//!
//! [`PdfFile`] ties the pieces together: it reads the header and the xref
//! chain of a source, owns the registry built from them, and writes the
//! document back either in full or as an incremental update.

use super::pages::{collect_pages, inherited_attribute};
use super::IndirectObjects;
use crate::error::{PdfError, Result};
use crate::objects::{Array, Dictionary, Object, ObjectId};
use crate::parser::{ByteSource, ParseError, ParseOptions, PdfHeader, PdfTrailer, PdfVersion, XRefReader};
use crate::structure::{catalog_name_tree, catalog_page_labels, NameTree, NameTreeKind, NumberTree};
use crate::writer::PdfWriter;
use std::fs::File;
use std::io::{BufReader, Read, Seek, Write};
use std::path::Path;

/// Containers the reader consumes; a full save expands them instead.
const STRUCTURAL_TYPES: &[&str] = &["ObjStm", "XRef"];

/// An open PDF document.
pub struct PdfFile {
    header: PdfHeader,
    trailer: PdfTrailer,
    objects: IndirectObjects,
    /// Offset of the newest xref section of the source
    startxref: Option<u64>,
    recovered: bool,
}

impl std::fmt::Debug for PdfFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PdfFile")
            .field("version", &self.header.version)
            .field("startxref", &self.startxref)
            .field("recovered", &self.recovered)
            .field("objects", &self.objects)
            .finish()
    }
}

impl Default for PdfFile {
    fn default() -> Self {
        Self::new()
    }
}

impl PdfFile {
    /// In-memory document with a catalog and an empty page tree.
    pub fn new() -> Self {
        let mut objects = IndirectObjects::new(ParseOptions::default());

        let mut pages = Dictionary::new();
        pages.set("Type", Object::name("Pages"));
        pages.set("Kids", Array::new());
        pages.set("Count", 0);
        let pages = objects.register(pages);

        let mut catalog = Dictionary::new();
        catalog.set("Type", Object::name("Catalog"));
        catalog.set("Pages", pages);
        let catalog = objects.register(catalog);

        let mut trailer = Dictionary::new();
        trailer.set("Root", catalog);

        Self {
            header: PdfHeader {
                version: PdfVersion::new(1, 7),
                offset: 0,
                has_binary_marker: true,
            },
            trailer: PdfTrailer::new(trailer),
            objects,
            startxref: None,
            recovered: false,
        }
    }

    /// Opens a file with lenient options.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with_options(path, ParseOptions::lenient())
    }

    pub fn open_with_options<P: AsRef<Path>>(path: P, options: ParseOptions) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        tracing::debug!(path = %path.as_ref().display(), "opening document");
        Self::with_options(BufReader::new(file), options)
    }

    /// Reads a document from any seekable source with lenient options.
    pub fn from_source<R: Read + Seek + 'static>(source: R) -> Result<Self> {
        Self::with_options(source, ParseOptions::lenient())
    }

    /// Reads the header and the whole xref chain; objects load on first access.
    pub fn with_options<R: Read + Seek + 'static>(source: R, options: ParseOptions) -> Result<Self> {
        let mut source: Box<dyn ByteSource> = Box::new(source);
        let header = PdfHeader::read(source.as_mut(), &options)?;
        let table = XRefReader::new(source.as_mut(), &options).read()?;

        let trailer = table.trailer().cloned().ok_or(ParseError::MissingTrailer)?;
        if !options.lenient_syntax {
            trailer.validate()?;
        }
        if table.is_recovered() {
            tracing::info!(entries = table.len(), "document opened from recovered xref");
        }

        let startxref = table.xref_offset();
        let recovered = table.is_recovered();
        let objects = IndirectObjects::from_xref(&table, source, options);
        Ok(Self {
            header,
            trailer,
            objects,
            startxref,
            recovered,
        })
    }

    pub fn version(&self) -> PdfVersion {
        self.header.version
    }

    pub fn header(&self) -> &PdfHeader {
        &self.header
    }

    /// Merged trailer of all xref sections
    pub fn trailer(&self) -> &PdfTrailer {
        &self.trailer
    }

    pub fn catalog(&self) -> Result<ObjectId> {
        Ok(self.trailer.root()?)
    }

    pub fn info(&self) -> Option<ObjectId> {
        self.trailer.info()
    }

    pub fn objects(&self) -> &IndirectObjects {
        &self.objects
    }

    pub fn objects_mut(&mut self) -> &mut IndirectObjects {
        &mut self.objects
    }

    /// Whether the xref data had to be rebuilt by scanning the file
    pub fn is_recovered(&self) -> bool {
        self.recovered
    }

    /// Offset of the newest xref section of the source
    pub fn startxref(&self) -> Option<u64> {
        self.startxref
    }

    /// Page objects in document order.
    pub fn pages(&mut self) -> Result<Vec<ObjectId>> {
        let catalog = self.catalog()?;
        let root = self
            .objects
            .resolve(catalog)
            .as_dict()
            .and_then(|dict| dict.get_reference("Pages"))
            .ok_or_else(|| PdfError::InvalidStructure("catalog has no /Pages reference".to_string()))?;
        Ok(collect_pages(&mut self.objects, root))
    }

    pub fn page_count(&mut self) -> Result<usize> {
        Ok(self.pages()?.len())
    }

    /// See [`inherited_attribute`].
    pub fn page_attribute(&mut self, page: ObjectId, key: &str) -> Option<Object> {
        inherited_attribute(&mut self.objects, page, key)
    }

    /// The catalog's `/Names/<kind>` tree, created on first write if missing.
    pub fn name_tree(&mut self, kind: NameTreeKind) -> Result<NameTree> {
        let catalog = self.catalog()?;
        catalog_name_tree(&mut self.objects, catalog, kind)
    }

    /// The catalog's `/PageLabels` tree, created on first write if missing.
    pub fn page_labels(&mut self) -> Result<NumberTree> {
        let catalog = self.catalog()?;
        catalog_page_labels(&mut self.objects, catalog)
    }

    /// Writes the whole document to `path`.
    pub fn save_to_path<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let writer = PdfWriter::new(path)?;
        self.write_full(writer)
    }

    /// Writes the whole document: every live object once, with a single
    /// classic xref table. Objects stored in object streams are written as
    /// plain objects and the containers themselves are dropped.
    pub fn save<W: Write>(&mut self, out: W) -> Result<()> {
        self.write_full(PdfWriter::new_with_writer(out))
    }

    /// Writes the source bytes unchanged, followed by every object changed or
    /// freed since the document was opened and an xref section chained to
    /// the original one through `/Prev`.
    ///
    /// A recovered source has no usable xref chain, so the appended section
    /// then lists every object instead.
    pub fn save_incremental<W: Write>(&mut self, out: W) -> Result<()> {
        let original = self.objects.read_source()?.ok_or_else(|| {
            PdfError::InvalidStructure("an incremental update needs the original source".to_string())
        })?;

        let mut writer = PdfWriter::new_with_writer(out).with_omitted(self.objects.virtual_ids());
        writer.write_raw(&original)?;
        if !original.ends_with(b"\n") && !original.ends_with(b"\r") {
            writer.write_raw(b"\n")?;
        }

        let prev = if self.recovered { None } else { self.startxref };
        let (changed, freed): (Vec<ObjectId>, Vec<ObjectId>) = match prev {
            Some(_) => self
                .objects
                .updated_ids()
                .into_iter()
                .partition(|id| !self.objects.is_free(*id)),
            None => {
                tracing::warn!("source xref was recovered, appending a complete section");
                self.objects.load_all();
                (self.objects.ids(), self.objects.free_ids())
            }
        };

        for id in &changed {
            writer.write_object(*id, self.objects.resolve(*id))?;
        }
        for id in &freed {
            writer.write_free(*id);
        }
        tracing::debug!(changed = changed.len(), freed = freed.len(), "writing incremental update");

        let xref = writer.write_xref(prev.is_none())?;
        let mut trailer = self.output_trailer();
        if let Some(prev) = prev {
            trailer.set("Prev", prev as i64);
        }
        writer.write_trailer(&trailer, xref)?;
        Ok(())
    }

    fn write_full<W: Write>(&mut self, writer: PdfWriter<W>) -> Result<()> {
        self.objects.load_all();
        let mut writer = writer.with_omitted(self.objects.virtual_ids());
        writer.write_header(self.header.version)?;

        for id in self.objects.ids() {
            let object = self.objects.resolve(id);
            let structural = object
                .as_stream()
                .and_then(|stream| stream.dict().get_type())
                .is_some_and(|kind| STRUCTURAL_TYPES.contains(&kind));
            if structural {
                writer.write_free(ObjectId::new(id.number(), id.generation().saturating_add(1)));
                continue;
            }
            writer.write_object(id, object)?;
        }
        for id in self.objects.free_ids() {
            writer.write_free(id);
        }

        let xref = writer.write_xref(true)?;
        writer.write_trailer(&self.output_trailer(), xref)?;
        Ok(())
    }

    /// Document-level trailer entries with an up-to-date `/Size`
    fn output_trailer(&self) -> Dictionary {
        let mut trailer = self.trailer.document_entries();
        let size = self.trailer.size().unwrap_or(0).max(self.objects.size());
        trailer.set("Size", size as i64);
        trailer
    }
}
