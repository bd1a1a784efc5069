use crate::objects::{Object, ObjectId};

#[derive(Debug, Clone)]
pub struct Array {
    elements: Vec<Object>,
    parent: Option<ObjectId>,
    updated: bool,
    is_virtual: bool,
}

impl Array {
    pub fn new() -> Self {
        Self::from(Vec::new())
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self::from(Vec::with_capacity(capacity))
    }

    pub fn push(&mut self, object: impl Into<Object>) {
        self.touch();
        self.elements.push(object.into());
    }

    pub fn pop(&mut self) -> Option<Object> {
        let popped = self.elements.pop();
        if popped.is_some() {
            self.touch();
        }
        popped
    }

    pub fn insert(&mut self, index: usize, object: impl Into<Object>) {
        self.touch();
        self.elements.insert(index, object.into());
    }

    pub fn remove(&mut self, index: usize) -> Object {
        self.touch();
        self.elements.remove(index)
    }

    /// Replaces the element at `index`, returning the previous value.
    pub fn set(&mut self, index: usize, object: impl Into<Object>) -> Option<Object> {
        let slot = self.elements.get_mut(index)?;
        let previous = std::mem::replace(slot, object.into());
        self.touch();
        Some(previous)
    }

    pub fn get(&self, index: usize) -> Option<&Object> {
        self.elements.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Object> {
        if index < self.elements.len() {
            self.touch();
        }
        self.elements.get_mut(index)
    }

    pub fn first(&self) -> Option<&Object> {
        self.elements.first()
    }

    pub fn last(&self) -> Option<&Object> {
        self.elements.last()
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn clear(&mut self) {
        if !self.elements.is_empty() {
            self.touch();
        }
        self.elements.clear();
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &Object> + ExactSizeIterator {
        self.elements.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Object> {
        self.touch();
        self.elements.iter_mut()
    }

    pub fn as_slice(&self) -> &[Object] {
        &self.elements
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

    pub(crate) fn children_mut(&mut self) -> impl Iterator<Item = &mut Object> {
        self.elements.iter_mut()
    }

    fn touch(&mut self) {
        self.updated = true;
        self.is_virtual = false;
    }
}

impl Default for Array {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for Array {
    fn eq(&self, other: &Self) -> bool {
        self.elements == other.elements
    }
}

impl From<Vec<Object>> for Array {
    fn from(elements: Vec<Object>) -> Self {
        Self {
            elements,
            parent: None,
            updated: false,
            is_virtual: false,
        }
    }
}

impl From<Array> for Vec<Object> {
    fn from(array: Array) -> Self {
        array.elements
    }
}

impl FromIterator<Object> for Array {
    fn from_iter<T: IntoIterator<Item = Object>>(iter: T) -> Self {
        Self::from(iter.into_iter().collect::<Vec<_>>())
    }
}

impl IntoIterator for Array {
    type Item = Object;
    type IntoIter = std::vec::IntoIter<Object>;

    fn into_iter(self) -> Self::IntoIter {
        self.elements.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_pop_and_flags() {
        let mut array = Array::new();
        assert!(!array.is_updated());

        array.push(1);
        array.push(Object::name("Two"));
        assert_eq!(array.len(), 2);
        assert!(array.is_updated());

        assert_eq!(array.pop(), Some(Object::name("Two")));
        assert_eq!(array.last(), Some(&Object::Integer(1)));
    }

    #[test]
    fn test_iter_both_directions() {
        let array: Array = (1..=3).map(Object::Integer).collect();
        let backwards: Vec<_> = array.iter().rev().cloned().collect();
        assert_eq!(
            backwards,
            vec![Object::Integer(3), Object::Integer(2), Object::Integer(1)]
        );
        assert_eq!(array.iter().len(), 3);
    }

    #[test]
    fn test_insert_remove_set() {
        let mut array: Array = vec![Object::Integer(1), Object::Integer(3)].into();
        array.insert(1, 2);
        assert_eq!(
            array.as_slice(),
            &[Object::Integer(1), Object::Integer(2), Object::Integer(3)]
        );

        assert_eq!(array.set(0, 10), Some(Object::Integer(1)));
        assert_eq!(array.set(7, 10), None);
        assert_eq!(array.remove(2), Object::Integer(3));
        assert_eq!(array.as_slice(), &[Object::Integer(10), Object::Integer(2)]);
    }

    #[test]
    fn test_virtual_cleared_by_mutation() {
        let mut array = Array::new();
        array.set_virtual(true);
        assert!(array.is_virtual());
        array.push(true);
        assert!(!array.is_virtual());
    }

    #[test]
    fn test_equality_ignores_parent() {
        let mut a: Array = vec![Object::Integer(1)].into();
        let b = a.clone();
        a.set_parent(Some(ObjectId::new(5, 0)));
        assert_eq!(a, b);
    }

    #[test]
    fn test_collect_and_into_iter() {
        let array: Array = (0..3).map(Object::Integer).collect();
        let values: Vec<i64> = array.into_iter().filter_map(|o| o.as_integer()).collect();
        assert_eq!(values, vec![0, 1, 2]);
    }
}
