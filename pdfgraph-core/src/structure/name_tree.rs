//! Name and number trees reachable from the document catalog
//!
//! The catalog's `/Names` dictionary holds one name tree per kind
//! (ISO 32000-1 Table 31); `/PageLabels` is a number tree.

use super::tree::{PdfTree, TreeKey};
use crate::document::IndirectObjects;
use crate::error::Result;
use crate::objects::{Array, Dictionary, Object, ObjectId, PdfString};

/// Tree keyed by strings (`/Names`)
pub type NameTree<V = Object> = PdfTree<PdfString, V>;

/// Tree keyed by integers (`/Nums`)
pub type NumberTree<V = Object> = PdfTree<i64, V>;

/// Entries of the catalog `/Names` dictionary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NameTreeKind {
    Dests,
    AP,
    JavaScript,
    Pages,
    Templates,
    IDS,
    URLS,
    EmbeddedFiles,
    AlternatePresentations,
    Renditions,
}

impl NameTreeKind {
    pub fn key(&self) -> &'static str {
        match self {
            NameTreeKind::Dests => "Dests",
            NameTreeKind::AP => "AP",
            NameTreeKind::JavaScript => "JavaScript",
            NameTreeKind::Pages => "Pages",
            NameTreeKind::Templates => "Templates",
            NameTreeKind::IDS => "IDS",
            NameTreeKind::URLS => "URLS",
            NameTreeKind::EmbeddedFiles => "EmbeddedFiles",
            NameTreeKind::AlternatePresentations => "AlternatePresentations",
            NameTreeKind::Renditions => "Renditions",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Some(match key {
            "Dests" => NameTreeKind::Dests,
            "AP" => NameTreeKind::AP,
            "JavaScript" => NameTreeKind::JavaScript,
            "Pages" => NameTreeKind::Pages,
            "Templates" => NameTreeKind::Templates,
            "IDS" => NameTreeKind::IDS,
            "URLS" => NameTreeKind::URLS,
            "EmbeddedFiles" => NameTreeKind::EmbeddedFiles,
            "AlternatePresentations" => NameTreeKind::AlternatePresentations,
            "Renditions" => NameTreeKind::Renditions,
            _ => return None,
        })
    }
}

fn empty_root<K: TreeKey>() -> Object {
    let mut root = Dictionary::new();
    root.set(K::PAIRS_KEY, Array::new());
    Object::Dictionary(root)
}

/// Opens `/Names/<kind>` of `catalog`.
///
/// A missing tree is created as a placeholder that only becomes part of the
/// document once something is inserted.
pub fn catalog_name_tree(
    registry: &mut IndirectObjects,
    catalog: ObjectId,
    kind: NameTreeKind,
) -> Result<NameTree> {
    let root = registry.get_or_create(catalog, &["Names", kind.key()], false, empty_root::<PdfString>)?;
    Ok(NameTree::open(root))
}

/// Opens the `/PageLabels` number tree of `catalog`.
pub fn catalog_page_labels(registry: &mut IndirectObjects, catalog: ObjectId) -> Result<NumberTree> {
    let root = registry.get_or_create(catalog, &["PageLabels"], false, empty_root::<i64>)?;
    Ok(NumberTree::open(root))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry_with_catalog(catalog: Dictionary) -> (IndirectObjects, ObjectId) {
        let mut registry = IndirectObjects::default();
        let id = registry.register(catalog);
        registry.mark_saved();
        (registry, id)
    }

    #[test]
    fn test_kind_keys() {
        for kind in [NameTreeKind::Dests, NameTreeKind::EmbeddedFiles, NameTreeKind::URLS] {
            assert_eq!(NameTreeKind::from_key(kind.key()), Some(kind));
        }
        assert_eq!(NameTreeKind::from_key("Bogus"), None);
    }

    #[test]
    fn test_missing_tree_stays_virtual_until_written() {
        let (mut registry, catalog) = registry_with_catalog(Dictionary::new());
        let tree = catalog_name_tree(&mut registry, catalog, NameTreeKind::Dests).unwrap();

        assert!(registry.is_virtual(tree.root()));
        assert!(tree.is_empty(&mut registry));
        assert!(registry.updated_ids().is_empty());

        tree.insert(&mut registry, PdfString::from("intro"), Object::Integer(1), false)
            .unwrap();
        assert!(!registry.is_virtual(tree.root()));
        assert!(registry.is_updated(catalog));
        assert!(registry.is_updated(tree.root()));

        // Reopening finds the same tree
        let again = catalog_name_tree(&mut registry, catalog, NameTreeKind::Dests).unwrap();
        assert_eq!(again.root(), tree.root());
        assert_eq!(
            again.get(&mut registry, &PdfString::from("intro")),
            Some(Object::Integer(1))
        );
    }

    #[test]
    fn test_direct_page_labels_are_promoted() {
        let mut labels = Dictionary::new();
        let mut style = Dictionary::new();
        style.set("S", Object::name("r"));
        labels.set("Nums", vec![Object::Integer(0), Object::Dictionary(style)]);
        let mut catalog = Dictionary::new();
        catalog.set("PageLabels", labels);
        let (mut registry, catalog) = registry_with_catalog(catalog);

        let tree = catalog_page_labels(&mut registry, catalog).unwrap();
        assert_ne!(tree.root(), catalog);
        assert_eq!(
            registry
                .resolve(catalog)
                .as_dict()
                .and_then(|d| d.get_reference("PageLabels")),
            Some(tree.root())
        );
        assert_eq!(tree.keys(&mut registry), vec![0]);
    }
}
