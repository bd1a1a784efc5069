//! # pdfgraph
//!
//! Object-graph layer for PDF files: reading cross-reference data (classic
//! tables, xref streams, hybrid and linearized files) with recovery for
//! damaged files, a lazily resolving registry of indirect objects, and
//! B-tree backed name and number trees.
//!
//! ## Features
//!
//! - **XRef reading**: `/Prev` chains, `/XRefStm` hybrids, linearized files,
//!   loop protection, and a full-file scan when the chain is unusable
//! - **Lazy objects**: objects are parsed on first access, including members
//!   of object streams; dangling references resolve to null
//! - **Editing**: register, update and free objects, placeholders that only
//!   materialize when written to
//! - **Name and number trees**: lookup, insertion and removal with node
//!   splitting, borrowing and merging
//! - **Saving**: full rewrites and incremental updates
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pdfgraph::objects::{Object, PdfString};
//! use pdfgraph::structure::NameTreeKind;
//! use pdfgraph::PdfFile;
//!
//! # fn main() -> pdfgraph::Result<()> {
//! let mut file = PdfFile::open("document.pdf")?;
//! println!("Version {}, {} pages", file.version(), file.page_count()?);
//!
//! let dests = file.name_tree(NameTreeKind::Dests)?;
//! dests.insert(
//!     file.objects_mut(),
//!     PdfString::from("chapter-1"),
//!     Object::Integer(0),
//!     true,
//! )?;
//!
//! file.save_incremental(std::fs::File::create("updated.pdf")?)?;
//! # Ok(())
//! # }
//! ```

pub mod document;
pub mod error;
pub mod objects;
pub mod parser;
pub mod recovery;
pub mod structure;
pub mod writer;

pub use document::{IndirectObjects, PdfFile};
pub use error::{PdfError, Result};
pub use objects::{Array, Dictionary, Object, ObjectId, PdfString, Stream};
pub use parser::{ParseError, ParseOptions, ReferencePolicy};
pub use structure::{NameTree, NumberTree, PdfTree};
pub use writer::PdfWriter;

/// Current version of pdfgraph
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_info() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_new_file_resolves_catalog() {
        let mut file = PdfFile::new();
        let catalog = file.catalog().unwrap();
        assert_eq!(
            file.objects_mut().resolve(catalog).as_dict().and_then(|d| d.get_type()),
            Some("Catalog")
        );
    }
}
