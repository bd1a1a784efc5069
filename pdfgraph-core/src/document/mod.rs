//! Document level: the indirect object registry, the file session built on
//! it and page tree traversal.

mod file;
mod indirect;
mod pages;

pub use file::PdfFile;
pub use indirect::IndirectObjects;
pub use pages::{collect_pages, inherited_attribute, INHERITABLE_KEYS};
