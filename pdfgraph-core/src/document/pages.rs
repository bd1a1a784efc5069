//! Page tree traversal according to ISO 32000-1 Section 7.7.3

use super::IndirectObjects;
use crate::objects::{Object, ObjectId};
use std::collections::HashSet;

/// Attributes a page inherits from its ancestors when it lacks them
pub const INHERITABLE_KEYS: &[&str] = &["Resources", "MediaBox", "CropBox", "Rotate"];

/// Page objects below `root`, in document order.
///
/// Nodes reached twice (cycles or shared kids) are logged and skipped.
pub fn collect_pages(registry: &mut IndirectObjects, root: ObjectId) -> Vec<ObjectId> {
    let mut pages = Vec::new();
    let mut visited = HashSet::new();
    let mut stack = vec![root];

    while let Some(node) = stack.pop() {
        if !visited.insert(node) {
            tracing::warn!(node = %node, "page tree node reached twice, skipping");
            continue;
        }
        let Some(dict) = registry.resolve(node).as_dict() else {
            tracing::warn!(node = %node, "page tree node is not a dictionary");
            continue;
        };

        let is_page = match dict.get_type() {
            Some("Page") => true,
            Some("Pages") => false,
            _ => !dict.contains_key("Kids"),
        };
        if is_page {
            pages.push(node);
            continue;
        }

        let Some(kids) = dict.get_array("Kids") else {
            continue;
        };
        for kid in kids.iter().rev() {
            match kid {
                Object::Reference(id) => stack.push(*id),
                other => {
                    tracing::warn!(node = %node, kid = other.type_name(), "skipping direct page tree kid")
                }
            }
        }
    }
    pages
}

/// Value of `key` on `page`, or on the nearest ancestor that has it when
/// `key` is one of [`INHERITABLE_KEYS`].
pub fn inherited_attribute(
    registry: &mut IndirectObjects,
    page: ObjectId,
    key: &str,
) -> Option<Object> {
    let mut current = page;
    let mut visited = HashSet::new();
    while visited.insert(current) {
        let dict = registry.resolve(current).as_dict()?;
        if let Some(value) = dict.get(key) {
            return Some(value.clone());
        }
        if !INHERITABLE_KEYS.contains(&key) {
            return None;
        }
        current = dict.get_reference("Parent")?;
    }
    tracing::warn!(page = %page, "page parent chain loops");
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objects::Dictionary;

    fn node(kind: &str, kids: &[ObjectId]) -> Dictionary {
        let mut dict = Dictionary::new();
        dict.set("Type", Object::name(kind));
        if kind == "Pages" {
            dict.set(
                "Kids",
                kids.iter().map(|id| Object::Reference(*id)).collect::<Vec<_>>(),
            );
            dict.set("Count", kids.len() as i64);
        }
        dict
    }

    #[test]
    fn test_collect_pages_in_order() {
        let mut registry = IndirectObjects::default();
        let p1 = registry.register(node("Page", &[]));
        let p2 = registry.register(node("Page", &[]));
        let p3 = registry.register(node("Page", &[]));
        let inner = registry.register(node("Pages", &[p2, p3]));
        let root = registry.register(node("Pages", &[p1, inner]));

        assert_eq!(collect_pages(&mut registry, root), vec![p1, p2, p3]);
    }

    #[test]
    fn test_cycle_is_skipped() {
        let mut registry = IndirectObjects::default();
        let page = registry.register(node("Page", &[]));
        let root = registry.register(Dictionary::new());
        registry
            .update(root, node("Pages", &[page, root, page]))
            .unwrap();

        assert_eq!(collect_pages(&mut registry, root), vec![page]);
    }

    #[test]
    fn test_inherited_attribute() {
        let mut registry = IndirectObjects::default();
        let page = registry.register(node("Page", &[]));
        let mut root = node("Pages", &[page]);
        root.set("Rotate", 90);
        let root = registry.register(root);
        registry
            .get_mut(page)
            .and_then(Object::as_dict_mut)
            .unwrap()
            .set("Parent", root);

        assert_eq!(
            inherited_attribute(&mut registry, page, "Rotate"),
            Some(Object::Integer(90))
        );
        assert_eq!(inherited_attribute(&mut registry, page, "MediaBox"), None);
        assert_eq!(inherited_attribute(&mut registry, page, "Count"), None);
    }
}
