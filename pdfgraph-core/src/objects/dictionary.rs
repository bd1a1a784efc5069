use crate::objects::{Array, Object, ObjectId};
use indexmap::IndexMap;

/// PDF dictionary. Keys keep their insertion order for serialization.
#[derive(Debug, Clone)]
pub struct Dictionary {
    entries: IndexMap<String, Object>,
    parent: Option<ObjectId>,
    updated: bool,
    is_virtual: bool,
}

impl Dictionary {
    pub fn new() -> Self {
        Self {
            entries: IndexMap::new(),
            parent: None,
            updated: false,
            is_virtual: false,
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: IndexMap::with_capacity(capacity),
            ..Self::new()
        }
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Object>) {
        self.touch();
        self.entries.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Object> {
        self.entries.get(key)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Object> {
        if self.entries.contains_key(key) {
            self.touch();
        }
        self.entries.get_mut(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<Object> {
        let removed = self.entries.shift_remove(key);
        if removed.is_some() {
            self.touch();
        }
        removed
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        if !self.entries.is_empty() {
            self.touch();
        }
        self.entries.clear();
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.entries.keys()
    }

    pub fn values(&self) -> impl Iterator<Item = &Object> {
        self.entries.values()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Object)> {
        self.entries.iter()
    }

    pub fn entries_mut(&mut self) -> impl Iterator<Item = (&String, &mut Object)> {
        self.touch();
        self.entries.iter_mut()
    }

    pub fn get_dict(&self, key: &str) -> Option<&Dictionary> {
        match self.get(key) {
            Some(Object::Dictionary(dict)) => Some(dict),
            _ => None,
        }
    }

    pub fn get_array(&self, key: &str) -> Option<&Array> {
        self.get(key).and_then(Object::as_array)
    }

    pub fn get_name(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Object::as_name)
    }

    pub fn get_integer(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(Object::as_integer)
    }

    pub fn get_reference(&self, key: &str) -> Option<ObjectId> {
        self.get(key).and_then(Object::as_reference)
    }

    /// Value of the `/Type` entry.
    pub fn get_type(&self) -> Option<&str> {
        self.get_name("Type")
    }

    pub fn parent(&self) -> Option<ObjectId> {
        self.parent
    }

    pub fn set_parent(&mut self, parent: Option<ObjectId>) {
        self.parent = parent;
    }

    pub fn is_updated(&self) -> bool {
        self.updated
    }

    pub fn set_updated(&mut self, updated: bool) {
        self.updated = updated;
    }

    pub fn is_virtual(&self) -> bool {
        self.is_virtual
    }

    pub fn set_virtual(&mut self, is_virtual: bool) {
        self.is_virtual = is_virtual;
    }

    /// Inserts without flagging the dictionary as updated.
    pub(crate) fn insert_quiet(&mut self, key: impl Into<String>, value: Object) {
        self.entries.insert(key.into(), value);
    }

    /// Mutable access that leaves the update and virtual flags alone.
    pub(crate) fn get_mut_quiet(&mut self, key: &str) -> Option<&mut Object> {
        self.entries.get_mut(key)
    }

    pub(crate) fn children_mut(&mut self) -> impl Iterator<Item = &mut Object> {
        self.entries.values_mut()
    }

    fn touch(&mut self) {
        self.updated = true;
        self.is_virtual = false;
    }
}

impl Default for Dictionary {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for Dictionary {
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries
    }
}

impl FromIterator<(String, Object)> for Dictionary {
    fn from_iter<T: IntoIterator<Item = (String, Object)>>(iter: T) -> Self {
        Self {
            entries: iter.into_iter().collect(),
            ..Self::new()
        }
    }
}
