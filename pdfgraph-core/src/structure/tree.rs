//! Name and number trees according to ISO 32000-1 Section 7.9.6 and 7.9.7
//!
//! A tree is a B-tree whose nodes are indirect dictionaries. Leaves keep a
//! flat `[key value key value ...]` array under `/Names` or `/Nums`;
//! intermediate nodes keep `/Kids`, and every node except the root carries
//! `/Limits [first last]`. Node sizes are counted in groups: a key/value pair
//! in a leaf, a kid in an intermediate node.
//!
//! [`PdfTree`] is a lightweight handle (root id plus orders); every operation
//! works through the document's [`IndirectObjects`].

use crate::document::IndirectObjects;
use crate::error::{PdfError, Result};
use crate::objects::{Array, Object, ObjectId, PdfString};
use std::cmp::Ordering;
use std::collections::HashSet;
use std::fmt::Debug;
use std::marker::PhantomData;

/// Default minimum node size, in groups
pub const DEFAULT_MIN_ORDER: usize = 5;
/// Default maximum node size, in groups
pub const DEFAULT_MAX_ORDER: usize = 10;

const KIDS: &str = "Kids";
const LIMITS: &str = "Limits";
/// Deepest subtree walked when a node has no `/Limits`
const MAX_DEPTH: usize = 64;

/// Key type of a tree
pub trait TreeKey: Clone + Ord + Debug {
    /// Leaf array key, `Names` or `Nums`
    const PAIRS_KEY: &'static str;

    fn from_object(object: &Object) -> Option<Self>;

    fn to_object(&self) -> Object;

    /// Human-readable form for error messages
    fn describe(&self) -> String;
}

impl TreeKey for PdfString {
    const PAIRS_KEY: &'static str = "Names";

    fn from_object(object: &Object) -> Option<Self> {
        object.as_string().cloned()
    }

    fn to_object(&self) -> Object {
        Object::String(self.clone())
    }

    fn describe(&self) -> String {
        self.to_text()
    }
}

impl TreeKey for i64 {
    const PAIRS_KEY: &'static str = "Nums";

    fn from_object(object: &Object) -> Option<Self> {
        object.as_integer()
    }

    fn to_object(&self) -> Object {
        Object::Integer(*self)
    }

    fn describe(&self) -> String {
        self.to_string()
    }
}

/// Value type of a tree
pub trait TreeValue: Clone {
    fn from_object(object: &Object) -> Option<Self>;

    fn into_object(self) -> Object;
}

impl TreeValue for Object {
    fn from_object(object: &Object) -> Option<Self> {
        Some(object.clone())
    }

    fn into_object(self) -> Object {
        self
    }
}

/// Values stored as references to indirect objects
impl TreeValue for ObjectId {
    fn from_object(object: &Object) -> Option<Self> {
        object.as_reference()
    }

    fn into_object(self) -> Object {
        Object::Reference(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeKind {
    Leaf,
    Intermediate,
}

impl NodeKind {
    /// Items per group
    fn group_width(self) -> usize {
        match self {
            NodeKind::Leaf => 2,
            NodeKind::Intermediate => 1,
        }
    }
}

/// Snapshot of a node's items
#[derive(Debug, Clone)]
struct Node {
    kind: NodeKind,
    items: Vec<Object>,
}

impl Node {
    fn count(&self) -> usize {
        self.items.len() / self.kind.group_width()
    }

    fn kids(&self) -> impl Iterator<Item = Option<ObjectId>> + '_ {
        self.items.iter().map(Object::as_reference)
    }

    fn kid(&self, index: usize) -> Result<ObjectId> {
        self.items
            .get(index)
            .and_then(Object::as_reference)
            .ok_or_else(|| {
                PdfError::InvalidStructure(format!("tree kid {index} is not a reference"))
            })
    }
}

/// Result of a leaf binary search: item index of the key, or where it would go
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotSearch {
    Found(usize),
    Vacant(usize),
}

/// Outcome of fixing an undersized child during removal
enum Rebalanced {
    /// The key now lives under the kid at this index
    Child(usize),
    /// The parent (the root) absorbed its only kid
    Collapsed,
}

/// Handle to a name or number tree.
#[derive(Debug, Clone)]
pub struct PdfTree<K: TreeKey, V: TreeValue = Object> {
    root: ObjectId,
    min_order: usize,
    max_order: usize,
    _marker: PhantomData<(K, V)>,
}

impl<K: TreeKey, V: TreeValue> PdfTree<K, V> {
    /// Opens the tree rooted at `root`.
    pub fn open(root: ObjectId) -> Self {
        Self {
            root,
            min_order: DEFAULT_MIN_ORDER,
            max_order: DEFAULT_MAX_ORDER,
            _marker: PhantomData,
        }
    }

    /// Registers an empty root and returns a handle to it.
    pub fn create(registry: &mut IndirectObjects) -> Self {
        let mut root = crate::objects::Dictionary::new();
        root.set(K::PAIRS_KEY, Array::new());
        Self::open(registry.register(root))
    }

    /// Node sizes in groups; `min >= 1` and `2 * min <= max` are required.
    pub fn with_orders(mut self, min_order: usize, max_order: usize) -> Result<Self> {
        if min_order < 1 || min_order * 2 > max_order {
            return Err(PdfError::InvalidOrder {
                min: min_order,
                max: max_order,
            });
        }
        self.min_order = min_order;
        self.max_order = max_order;
        Ok(self)
    }

    /// Sets the maximum order and derives the minimum as half of it.
    pub fn with_max_order(self, max_order: usize) -> Result<Self> {
        self.with_orders((max_order / 2).max(1), max_order)
    }

    pub fn root(&self) -> ObjectId {
        self.root
    }

    pub fn min_order(&self) -> usize {
        self.min_order
    }

    pub fn max_order(&self) -> usize {
        self.max_order
    }

    /// Value stored under `key`, or `None` when absent.
    pub fn get(&self, registry: &mut IndirectObjects, key: &K) -> Option<V> {
        let (leaf, index) = self.locate(registry, key)?;
        let node = self.read_node(registry, leaf).ok()?;
        V::from_object(node.items.get(index + 1)?)
    }

    /// Whether `key` is present, whatever value it holds.
    pub fn contains_key(&self, registry: &mut IndirectObjects, key: &K) -> bool {
        self.locate(registry, key).is_some()
    }

    /// Leaf holding `key` and the item index of the key in it.
    fn locate(&self, registry: &mut IndirectObjects, key: &K) -> Option<(ObjectId, usize)> {
        let mut node_id = self.root;
        let mut visited = HashSet::new();

        loop {
            if !visited.insert(node_id) {
                tracing::warn!(node = %node_id, "tree node visited twice, giving up lookup");
                return None;
            }
            let node = self.read_node(registry, node_id).ok()?;
            match node.kind {
                NodeKind::Leaf => {
                    return match search_leaf(&node.items, key) {
                        SlotSearch::Found(index) => Some((node_id, index)),
                        SlotSearch::Vacant(_) => None,
                    };
                }
                NodeKind::Intermediate => {
                    let index = self.find_child(registry, &node, key).ok()?;
                    node_id = node.kid(index).ok()?;
                }
            }
        }
    }

    /// Inserts `value` under `key`.
    ///
    /// An existing key is replaced in place when `overwrite` is set and
    /// reported as [`PdfError::DuplicateKey`] otherwise. Full nodes are split
    /// on the way down, so the insertion never needs to split upward.
    pub fn insert(
        &self,
        registry: &mut IndirectObjects,
        key: K,
        value: V,
        overwrite: bool,
    ) -> Result<()> {
        if !overwrite && self.contains_key(registry, &key) {
            return Err(PdfError::DuplicateKey(key.describe()));
        }

        if self.read_node(registry, self.root)?.count() >= self.max_order {
            self.split_root(registry)?;
        }

        let mut path: Vec<(ObjectId, usize)> = Vec::new();
        let mut node_id = self.root;
        loop {
            let node = self.read_node(registry, node_id)?;
            match node.kind {
                NodeKind::Leaf => {
                    let mut items = node.items;
                    match search_leaf(&items, &key) {
                        SlotSearch::Found(index) => items[index + 1] = value.into_object(),
                        SlotSearch::Vacant(index) => {
                            items.insert(index, key.to_object());
                            items.insert(index + 1, value.into_object());
                        }
                    }
                    self.write_items(registry, node_id, NodeKind::Leaf, items)?;
                    break;
                }
                NodeKind::Intermediate => {
                    let mut index = self.find_child_for_insert(registry, &node, &key)?;
                    let child = node.kid(index)?;
                    if self.read_node(registry, child)?.count() >= self.max_order {
                        let sibling = self.split_child(registry, node_id, index)?;
                        let first = self.limits_of(registry, sibling).map(|(first, _)| first);
                        if first.is_some_and(|first| key >= first) {
                            index += 1;
                        }
                    }
                    let node = self.read_node(registry, node_id)?;
                    path.push((node_id, index));
                    node_id = node.kid(index)?;
                }
            }
        }

        self.refresh_path(registry, &path, node_id)
    }

    /// Removes `key`. Returns `false` when it was not present.
    ///
    /// Undersized children are fixed on the way down by borrowing a group
    /// from a richer sibling or merging with one; a root left with a single
    /// kid takes over that kid's content.
    pub fn remove(&self, registry: &mut IndirectObjects, key: &K) -> Result<bool> {
        if !self.contains_key(registry, key) {
            return Ok(false);
        }

        let mut path: Vec<(ObjectId, usize)> = Vec::new();
        let mut node_id = self.root;
        loop {
            let node = self.read_node(registry, node_id)?;
            match node.kind {
                NodeKind::Leaf => {
                    let mut items = node.items;
                    let SlotSearch::Found(index) = search_leaf(&items, key) else {
                        return Ok(false);
                    };
                    items.drain(index..index + 2);
                    self.write_items(registry, node_id, NodeKind::Leaf, items)?;
                    break;
                }
                NodeKind::Intermediate => {
                    let index = match self.find_child(registry, &node, key) {
                        Ok(index) => index,
                        Err(_) => return Ok(false),
                    };
                    let child = node.kid(index)?;
                    let index = if self.read_node(registry, child)?.count() <= self.min_order {
                        match self.rebalance(registry, node_id, index)? {
                            Rebalanced::Child(index) => index,
                            Rebalanced::Collapsed => continue,
                        }
                    } else {
                        index
                    };
                    let node = self.read_node(registry, node_id)?;
                    path.push((node_id, index));
                    node_id = node.kid(index)?;
                }
            }
        }

        self.refresh_path(registry, &path, node_id)?;
        Ok(true)
    }

    /// All entries in key order.
    pub fn entries<'r>(&self, registry: &'r mut IndirectObjects) -> TreeEntries<'r, K, V> {
        TreeEntries {
            registry,
            stack: vec![(self.root, 0)],
            visited: HashSet::from([self.root]),
            _marker: PhantomData,
        }
    }

    pub fn keys(&self, registry: &mut IndirectObjects) -> Vec<K> {
        self.entries(registry).map(|(key, _)| key).collect()
    }

    pub fn values(&self, registry: &mut IndirectObjects) -> Vec<V> {
        self.entries(registry).map(|(_, value)| value).collect()
    }

    pub fn len(&self, registry: &mut IndirectObjects) -> usize {
        self.entries(registry).count()
    }

    pub fn is_empty(&self, registry: &mut IndirectObjects) -> bool {
        self.entries(registry).next().is_none()
    }

    /// Drops every entry and frees all nodes below the root.
    pub fn clear(&self, registry: &mut IndirectObjects) -> Result<()> {
        let mut stack = vec![self.root];
        let mut visited = HashSet::from([self.root]);
        while let Some(node_id) = stack.pop() {
            let Ok(node) = self.read_node(registry, node_id) else {
                continue;
            };
            if node.kind == NodeKind::Intermediate {
                for kid in node.kids().flatten() {
                    if visited.insert(kid) {
                        stack.push(kid);
                    }
                }
            }
            if node_id != self.root {
                registry.unregister(node_id);
            }
        }
        self.write_items(registry, self.root, NodeKind::Leaf, Vec::new())
    }

    /// Checks key order, node sizes and `/Limits` of the whole tree.
    pub fn validate(&self, registry: &mut IndirectObjects) -> Result<()> {
        let invalid = |message: String| Err(PdfError::InvalidStructure(message));
        let mut stack = vec![(self.root, 0usize)];
        let mut visited = HashSet::from([self.root]);
        let mut leaf_depth = None;

        while let Some((node_id, depth)) = stack.pop() {
            let node = self.read_node(registry, node_id)?;
            let count = node.count();
            let is_root = node_id == self.root;

            if count > self.max_order || (!is_root && count < self.min_order) {
                return invalid(format!(
                    "node {node_id} holds {count} groups, outside [{}, {}]",
                    self.min_order, self.max_order
                ));
            }
            if !is_root {
                let expected = self.compute_limits(registry, node_id, &node, 0);
                if self.stored_limits(registry, node_id) != expected {
                    return invalid(format!("node {node_id} has stale /Limits"));
                }
            }

            match node.kind {
                NodeKind::Leaf => {
                    if *leaf_depth.get_or_insert(depth) != depth {
                        return invalid(format!("leaf {node_id} is at depth {depth}"));
                    }
                    let keys: Vec<Option<K>> =
                        node.items.iter().step_by(2).map(K::from_object).collect();
                    if keys.iter().any(Option::is_none) || node.items.len() % 2 != 0 {
                        return invalid(format!("leaf {node_id} has malformed pairs"));
                    }
                    if keys.windows(2).any(|pair| pair[0] >= pair[1]) {
                        return invalid(format!("leaf {node_id} keys are not ascending"));
                    }
                }
                NodeKind::Intermediate => {
                    for kid in node.kids() {
                        let Some(kid) = kid else {
                            return invalid(format!("node {node_id} has a direct kid"));
                        };
                        if !visited.insert(kid) {
                            return invalid(format!("node {kid} is reachable twice"));
                        }
                        stack.push((kid, depth + 1));
                    }
                }
            }
        }
        Ok(())
    }

    fn read_node(&self, registry: &mut IndirectObjects, id: ObjectId) -> Result<Node> {
        let dict = registry.resolve(id).as_dict().ok_or_else(|| {
            PdfError::InvalidStructure(format!("tree node {id} is not a dictionary"))
        })?;

        let node = match (dict.get_array(KIDS), dict.get_array(K::PAIRS_KEY)) {
            (Some(kids), _) if !kids.is_empty() => Node {
                kind: NodeKind::Intermediate,
                items: kids.as_slice().to_vec(),
            },
            (_, Some(pairs)) => Node {
                kind: NodeKind::Leaf,
                items: pairs.as_slice().to_vec(),
            },
            _ => Node {
                kind: NodeKind::Leaf,
                items: Vec::new(),
            },
        };
        Ok(node)
    }

    /// Stores `items` under the key of `kind`, dropping the other kind's key.
    fn write_items(
        &self,
        registry: &mut IndirectObjects,
        id: ObjectId,
        kind: NodeKind,
        items: Vec<Object>,
    ) -> Result<()> {
        let dict = registry
            .get_mut(id)
            .and_then(Object::as_dict_mut)
            .ok_or_else(|| PdfError::InvalidStructure(format!("tree node {id} is not a dictionary")))?;
        let (key, other) = match kind {
            NodeKind::Leaf => (K::PAIRS_KEY, KIDS),
            NodeKind::Intermediate => (KIDS, K::PAIRS_KEY),
        };
        dict.remove(other);
        let mut array = Object::Array(Array::from(items));
        array.bind_parent(id);
        dict.set(key, array);
        Ok(())
    }

    fn stored_limits(&self, registry: &mut IndirectObjects, id: ObjectId) -> Option<(K, K)> {
        let limits = registry.resolve(id).as_dict()?.get_array(LIMITS)?;
        match limits.as_slice() {
            [first, last] => Some((K::from_object(first)?, K::from_object(last)?)),
            _ => None,
        }
    }

    /// First and last key below `id`, from its items
    fn compute_limits(
        &self,
        registry: &mut IndirectObjects,
        id: ObjectId,
        node: &Node,
        depth: usize,
    ) -> Option<(K, K)> {
        match node.kind {
            NodeKind::Leaf => {
                let first = K::from_object(node.items.first()?)?;
                let last = K::from_object(node.items.get(node.items.len().checked_sub(2)?)?)?;
                Some((first, last))
            }
            NodeKind::Intermediate => {
                let first_kid = node.kids().next()??;
                let last_kid = node.kids().last()??;
                if first_kid == id || last_kid == id {
                    return None;
                }
                let (first, _) = self.limits_at_depth(registry, first_kid, depth + 1)?;
                let (_, last) = self.limits_at_depth(registry, last_kid, depth + 1)?;
                Some((first, last))
            }
        }
    }

    /// Key range of a subtree: its `/Limits`, or computed when missing.
    fn limits_of(&self, registry: &mut IndirectObjects, id: ObjectId) -> Option<(K, K)> {
        self.limits_at_depth(registry, id, 0)
    }

    fn limits_at_depth(
        &self,
        registry: &mut IndirectObjects,
        id: ObjectId,
        depth: usize,
    ) -> Option<(K, K)> {
        if let Some(limits) = self.stored_limits(registry, id) {
            return Some(limits);
        }
        if depth > MAX_DEPTH {
            tracing::warn!(node = %id, "tree too deep while computing key range");
            return None;
        }
        let node = self.read_node(registry, id).ok()?;
        self.compute_limits(registry, id, &node, depth)
    }

    /// Rewrites `/Limits` of `id`. Returns whether they changed.
    fn refresh_limits(&self, registry: &mut IndirectObjects, id: ObjectId) -> Result<bool> {
        let node = self.read_node(registry, id)?;
        let limits = self.compute_limits(registry, id, &node, 0);
        if self.stored_limits(registry, id) == limits
            && (limits.is_some() || !self.has_limits_entry(registry, id))
        {
            return Ok(false);
        }

        let dict = registry
            .get_mut(id)
            .and_then(Object::as_dict_mut)
            .ok_or_else(|| PdfError::InvalidStructure(format!("tree node {id} is not a dictionary")))?;
        match limits {
            Some((first, last)) => dict.set(LIMITS, vec![first.to_object(), last.to_object()]),
            None => {
                dict.remove(LIMITS);
            }
        }
        Ok(true)
    }

    fn has_limits_entry(&self, registry: &mut IndirectObjects, id: ObjectId) -> bool {
        registry
            .resolve(id)
            .as_dict()
            .is_some_and(|dict| dict.contains_key(LIMITS))
    }

    /// Updates `/Limits` from `leaf` upward while they keep changing.
    fn refresh_path(
        &self,
        registry: &mut IndirectObjects,
        path: &[(ObjectId, usize)],
        leaf: ObjectId,
    ) -> Result<()> {
        let mut child = leaf;
        for (parent, _) in path.iter().rev() {
            if !self.refresh_limits(registry, child)? {
                break;
            }
            child = *parent;
        }
        Ok(())
    }

    /// Index of the kid whose range contains `key`.
    fn find_child(&self, registry: &mut IndirectObjects, node: &Node, key: &K) -> Result<usize> {
        match self.search_kids(registry, node, key)? {
            SlotSearch::Found(index) => Ok(index),
            SlotSearch::Vacant(_) => Err(PdfError::InvalidStructure(format!(
                "no tree kid covers {}",
                key.describe()
            ))),
        }
    }

    /// Like [`find_child`](Self::find_child), but falls back to the kid just
    /// before the gap the key falls into.
    fn find_child_for_insert(
        &self,
        registry: &mut IndirectObjects,
        node: &Node,
        key: &K,
    ) -> Result<usize> {
        Ok(match self.search_kids(registry, node, key)? {
            SlotSearch::Found(index) => index,
            SlotSearch::Vacant(low) => low.saturating_sub(1).min(node.items.len().saturating_sub(1)),
        })
    }

    /// Binary search over kid ranges; a kid without a usable range switches to a linear scan.
    fn search_kids(&self, registry: &mut IndirectObjects, node: &Node, key: &K) -> Result<SlotSearch> {
        let mut low: isize = 0;
        let mut high: isize = node.items.len() as isize - 1;
        while low <= high {
            let mid = (low + high) / 2;
            let Some((first, last)) = self.limits_of(registry, node.kid(mid as usize)?) else {
                return self.search_kids_linear(registry, node, key);
            };
            if *key < first {
                high = mid - 1;
            } else if *key > last {
                low = mid + 1;
            } else {
                return Ok(SlotSearch::Found(mid as usize));
            }
        }
        Ok(SlotSearch::Vacant(low as usize))
    }

    fn search_kids_linear(
        &self,
        registry: &mut IndirectObjects,
        node: &Node,
        key: &K,
    ) -> Result<SlotSearch> {
        let mut vacant = 0;
        for index in 0..node.items.len() {
            let Some((first, last)) = self.limits_of(registry, node.kid(index)?) else {
                tracing::warn!(kid = index, "skipping tree kid without key range");
                continue;
            };
            if *key < first {
                break;
            }
            if *key <= last {
                return Ok(SlotSearch::Found(index));
            }
            vacant = index + 1;
        }
        Ok(SlotSearch::Vacant(vacant))
    }

    /// Moves the root's content into a new kid, then splits that kid.
    fn split_root(&self, registry: &mut IndirectObjects) -> Result<()> {
        let root = self.read_node(registry, self.root)?;
        let child = registry.register(crate::objects::Dictionary::new());
        self.write_items(registry, child, root.kind, root.items)?;
        self.write_items(
            registry,
            self.root,
            NodeKind::Intermediate,
            vec![Object::Reference(child)],
        )?;
        self.refresh_limits(registry, child)?;
        tracing::debug!(root = %self.root, child = %child, "split tree root");
        self.split_child(registry, self.root, 0)?;
        Ok(())
    }

    /// Splits kid `index` of `parent` in half; the upper half becomes a new
    /// kid right after it. Returns the new kid.
    fn split_child(
        &self,
        registry: &mut IndirectObjects,
        parent: ObjectId,
        index: usize,
    ) -> Result<ObjectId> {
        let parent_node = self.read_node(registry, parent)?;
        let child = parent_node.kid(index)?;
        let mut node = self.read_node(registry, child)?;

        let width = node.kind.group_width();
        let keep = (node.count() / 2) * width;
        let upper = node.items.split_off(keep);

        let sibling = registry.register(crate::objects::Dictionary::new());
        self.write_items(registry, sibling, node.kind, upper)?;
        self.write_items(registry, child, node.kind, node.items)?;
        self.refresh_limits(registry, child)?;
        self.refresh_limits(registry, sibling)?;

        let mut kids = parent_node.items;
        kids.insert(index + 1, Object::Reference(sibling));
        self.write_items(registry, parent, NodeKind::Intermediate, kids)?;
        tracing::trace!(node = %child, sibling = %sibling, "split tree node");
        Ok(sibling)
    }

    /// Brings kid `index` of `parent` above the minimum size before descending into it.
    fn rebalance(
        &self,
        registry: &mut IndirectObjects,
        parent: ObjectId,
        index: usize,
    ) -> Result<Rebalanced> {
        let parent_node = self.read_node(registry, parent)?;
        let child_id = parent_node.kid(index)?;
        let mut child = self.read_node(registry, child_id)?;
        let width = child.kind.group_width();

        let sibling = |offset: isize| -> Option<ObjectId> {
            let position = index as isize + offset;
            if position < 0 {
                return None;
            }
            parent_node.kid(position as usize).ok()
        };
        let left_id = sibling(-1);
        let right_id = sibling(1);
        let left = match left_id {
            Some(id) => Some(self.read_node(registry, id)?).filter(|n| n.kind == child.kind),
            None => None,
        };
        let right = match right_id {
            Some(id) => Some(self.read_node(registry, id)?).filter(|n| n.kind == child.kind),
            None => None,
        };

        // Borrow one group from a sibling that can spare it
        if let (Some(left_id), Some(mut left)) = (left_id, left.clone()) {
            if left.count() > self.min_order {
                let moved = left.items.split_off(left.items.len() - width);
                child.items.splice(0..0, moved);
                self.write_items(registry, left_id, left.kind, left.items)?;
                self.write_items(registry, child_id, child.kind, child.items)?;
                self.refresh_limits(registry, left_id)?;
                self.refresh_limits(registry, child_id)?;
                return Ok(Rebalanced::Child(index));
            }
        }
        if let (Some(right_id), Some(mut right)) = (right_id, right.clone()) {
            if right.count() > self.min_order {
                let moved: Vec<Object> = right.items.drain(..width).collect();
                child.items.extend(moved);
                self.write_items(registry, right_id, right.kind, right.items)?;
                self.write_items(registry, child_id, child.kind, child.items)?;
                self.refresh_limits(registry, right_id)?;
                self.refresh_limits(registry, child_id)?;
                return Ok(Rebalanced::Child(index));
            }
        }

        // Merge with a sibling and drop the emptied node
        let mut kids = parent_node.items.clone();
        let (survivor, index) = match (left_id.zip(left), right_id.zip(right)) {
            (Some((left_id, mut left)), _) => {
                left.items.extend(child.items);
                self.write_items(registry, left_id, left.kind, left.items)?;
                kids.remove(index);
                registry.unregister(child_id);
                (left_id, index - 1)
            }
            (None, Some((right_id, right))) => {
                child.items.extend(right.items);
                self.write_items(registry, child_id, child.kind, child.items)?;
                kids.remove(index + 1);
                registry.unregister(right_id);
                (child_id, index)
            }
            (None, None) => return Ok(Rebalanced::Child(index)),
        };
        tracing::trace!(node = %survivor, "merged tree nodes");

        if parent == self.root && kids.len() == 1 {
            // The root takes over its only kid, switching between /Kids and the pairs key
            let only = self.read_node(registry, survivor)?;
            self.write_items(registry, self.root, only.kind, only.items)?;
            registry.unregister(survivor);
            tracing::debug!(root = %self.root, "collapsed tree root");
            return Ok(Rebalanced::Collapsed);
        }

        self.write_items(registry, parent, NodeKind::Intermediate, kids)?;
        self.refresh_limits(registry, survivor)?;
        Ok(Rebalanced::Child(index))
    }
}

/// Iterator over the entries of a tree, in key order.
///
/// Walks with an explicit stack of `(node, next item)` frames; nodes seen
/// twice and malformed pairs are skipped with a warning.
pub struct TreeEntries<'r, K, V> {
    registry: &'r mut IndirectObjects,
    stack: Vec<(ObjectId, usize)>,
    visited: HashSet<ObjectId>,
    _marker: PhantomData<(K, V)>,
}

impl<K: TreeKey, V: TreeValue> Iterator for TreeEntries<'_, K, V> {
    type Item = (K, V);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let (node_id, position) = self.stack.last_mut()?;
            let node_id = *node_id;
            let dict = self.registry.resolve(node_id).as_dict();

            let kids = dict
                .and_then(|d| d.get_array(KIDS))
                .filter(|kids| !kids.is_empty());
            if let Some(kids) = kids {
                match kids.get(*position) {
                    Some(kid) => {
                        *position += 1;
                        match kid.as_reference() {
                            Some(kid) if self.visited.insert(kid) => self.stack.push((kid, 0)),
                            Some(kid) => {
                                tracing::warn!(node = %kid, "tree node reachable twice, skipping")
                            }
                            None => tracing::warn!(node = %node_id, "skipping direct tree kid"),
                        }
                    }
                    None => {
                        self.stack.pop();
                    }
                }
                continue;
            }

            let pairs = dict.and_then(|d| d.get_array(K::PAIRS_KEY));
            let pair = pairs.and_then(|pairs| Some((pairs.get(*position)?, pairs.get(*position + 1)?)));
            match pair {
                Some((key, value)) => {
                    *position += 2;
                    match (K::from_object(key), V::from_object(value)) {
                        (Some(key), Some(value)) => return Some((key, value)),
                        _ => tracing::warn!(node = %node_id, "skipping malformed tree entry"),
                    }
                }
                None => {
                    self.stack.pop();
                }
            }
        }
    }
}

/// Binary search over the flat pairs of a leaf.
///
/// The midpoint is rounded down to an even index so it always lands on a
/// key; a key that does not parse switches to a linear scan.
fn search_leaf<K: TreeKey>(items: &[Object], key: &K) -> SlotSearch {
    let mut low: isize = 0;
    let mut high: isize = items.len() as isize - 2;
    while low <= high {
        let mut mid = (low + high) / 2;
        mid -= mid % 2;
        let Some(current) = K::from_object(&items[mid as usize]) else {
            return search_leaf_linear(items, key);
        };
        match key.cmp(&current) {
            Ordering::Less => high = mid - 2,
            Ordering::Greater => low = mid + 2,
            Ordering::Equal => return SlotSearch::Found(mid as usize),
        }
    }
    SlotSearch::Vacant(low as usize)
}

fn search_leaf_linear<K: TreeKey>(items: &[Object], key: &K) -> SlotSearch {
    for index in (0..items.len().saturating_sub(1)).step_by(2) {
        match K::from_object(&items[index]).map(|current| key.cmp(&current)) {
            Some(Ordering::Equal) => return SlotSearch::Found(index),
            Some(Ordering::Less) => return SlotSearch::Vacant(index),
            _ => {}
        }
    }
    SlotSearch::Vacant(items.len() - items.len() % 2)
}
