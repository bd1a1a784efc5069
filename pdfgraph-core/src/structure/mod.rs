//! Name and number trees according to ISO 32000-1 Section 7.9.6 and 7.9.7

mod name_tree;
mod tree;

pub use name_tree::{catalog_name_tree, catalog_page_labels, NameTree, NameTreeKind, NumberTree};
pub use tree::{PdfTree, TreeEntries, TreeKey, TreeValue, DEFAULT_MAX_ORDER, DEFAULT_MIN_ORDER};
