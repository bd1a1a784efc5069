use crate::objects::{Array, Dictionary, PdfString, Stream};
use std::fmt;

/// Identity of an indirect object: object number plus generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId {
    number: u32,
    generation: u16,
}

impl ObjectId {
    pub fn new(number: u32, generation: u16) -> Self {
        Self { number, generation }
    }

    pub fn number(&self) -> u32 {
        self.number
    }

    pub fn generation(&self) -> u16 {
        self.generation
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} R", self.number, self.generation)
    }
}

/// A direct PDF value.
///
/// Containers (arrays, dictionaries, streams) carry a non-owning parent id and
/// an update flag; equality only looks at their contents.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Object {
    #[default]
    Null,
    Boolean(bool),
    Integer(i64),
    Real(f64),
    Name(String),
    String(PdfString),
    Array(Array),
    Dictionary(Dictionary),
    Stream(Stream),
    Reference(ObjectId),
}

impl Object {
    pub fn name(name: impl Into<String>) -> Self {
        Object::Name(name.into())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Object::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Object::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Object::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_real(&self) -> Option<f64> {
        match self {
            Object::Real(f) => Some(*f),
            Object::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_name(&self) -> Option<&str> {
        match self {
            Object::Name(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_string(&self) -> Option<&PdfString> {
        match self {
            Object::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&Array> {
        match self {
            Object::Array(arr) => Some(arr),
            _ => None,
        }
    }

    pub fn as_array_mut(&mut self) -> Option<&mut Array> {
        match self {
            Object::Array(arr) => Some(arr),
            _ => None,
        }
    }

    /// Dictionary view of a dictionary or of a stream's dictionary.
    pub fn as_dict(&self) -> Option<&Dictionary> {
        match self {
            Object::Dictionary(dict) => Some(dict),
            Object::Stream(stream) => Some(stream.dict()),
            _ => None,
        }
    }

    pub fn as_dict_mut(&mut self) -> Option<&mut Dictionary> {
        match self {
            Object::Dictionary(dict) => Some(dict),
            Object::Stream(stream) => Some(stream.dict_mut()),
            _ => None,
        }
    }

    pub fn as_stream(&self) -> Option<&Stream> {
        match self {
            Object::Stream(stream) => Some(stream),
            _ => None,
        }
    }

    pub fn as_reference(&self) -> Option<ObjectId> {
        match self {
            Object::Reference(id) => Some(*id),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Object::Null => "Null",
            Object::Boolean(_) => "Boolean",
            Object::Integer(_) => "Integer",
            Object::Real(_) => "Real",
            Object::Name(_) => "Name",
            Object::String(_) => "String",
            Object::Array(_) => "Array",
            Object::Dictionary(_) => "Dictionary",
            Object::Stream(_) => "Stream",
            Object::Reference(_) => "Reference",
        }
    }

    /// Whether this value is a container still waiting for real content.
    pub fn is_virtual(&self) -> bool {
        match self {
            Object::Array(arr) => arr.is_virtual(),
            Object::Dictionary(dict) => dict.is_virtual(),
            _ => false,
        }
    }

    pub fn is_updated(&self) -> bool {
        match self {
            Object::Array(arr) => arr.is_updated(),
            Object::Dictionary(dict) => dict.is_updated(),
            Object::Stream(stream) => stream.is_updated(),
            _ => false,
        }
    }

    /// Whether this value or any container nested in it was modified.
    pub fn has_updates(&self) -> bool {
        let mut stack = vec![self];
        while let Some(object) = stack.pop() {
            match object {
                Object::Array(arr) => {
                    if arr.is_updated() {
                        return true;
                    }
                    stack.extend(arr.iter());
                }
                Object::Dictionary(dict) => {
                    if dict.is_updated() {
                        return true;
                    }
                    stack.extend(dict.values());
                }
                Object::Stream(stream) => {
                    if stream.is_updated() {
                        return true;
                    }
                    stack.extend(stream.dict().values());
                }
                _ => {}
            }
        }
        false
    }

    /// Points every nested container at `parent` without touching update flags.
    ///
    /// Walks with an explicit stack; references are not followed.
    pub(crate) fn bind_parent(&mut self, parent: ObjectId) {
        let mut stack: Vec<&mut Object> = vec![self];
        while let Some(object) = stack.pop() {
            match object {
                Object::Array(arr) => {
                    arr.set_parent(Some(parent));
                    stack.extend(arr.children_mut());
                }
                Object::Dictionary(dict) => {
                    dict.set_parent(Some(parent));
                    stack.extend(dict.children_mut());
                }
                Object::Stream(stream) => {
                    let dict = stream.dict_mut_untracked();
                    dict.set_parent(Some(parent));
                    stack.extend(dict.children_mut());
                }
                _ => {}
            }
        }
    }

    /// Clears update flags on this value and every nested container.
    pub(crate) fn clear_updated(&mut self) {
        let mut stack: Vec<&mut Object> = vec![self];
        while let Some(object) = stack.pop() {
            match object {
                Object::Array(arr) => {
                    arr.set_updated(false);
                    stack.extend(arr.children_mut());
                }
                Object::Dictionary(dict) => {
                    dict.set_updated(false);
                    stack.extend(dict.children_mut());
                }
                Object::Stream(stream) => {
                    stream.set_updated(false);
                    stack.extend(stream.dict_mut_untracked().children_mut());
                }
                _ => {}
            }
        }
    }
}

impl From<bool> for Object {
    fn from(b: bool) -> Self {
        Object::Boolean(b)
    }
}

impl From<i32> for Object {
    fn from(i: i32) -> Self {
        Object::Integer(i as i64)
    }
}

impl From<i64> for Object {
    fn from(i: i64) -> Self {
        Object::Integer(i)
    }
}

impl From<f32> for Object {
    fn from(f: f32) -> Self {
        Object::Real(f as f64)
    }
}

impl From<f64> for Object {
    fn from(f: f64) -> Self {
        Object::Real(f)
    }
}

impl From<&str> for Object {
    fn from(s: &str) -> Self {
        Object::String(PdfString::from_text(s))
    }
}

impl From<String> for Object {
    fn from(s: String) -> Self {
        Object::String(PdfString::from_text(&s))
    }
}

impl From<PdfString> for Object {
    fn from(s: PdfString) -> Self {
        Object::String(s)
    }
}

impl From<Vec<Object>> for Object {
    fn from(v: Vec<Object>) -> Self {
        Object::Array(Array::from(v))
    }
}

impl From<Array> for Object {
    fn from(a: Array) -> Self {
        Object::Array(a)
    }
}

impl From<Dictionary> for Object {
    fn from(d: Dictionary) -> Self {
        Object::Dictionary(d)
    }
}

impl From<Stream> for Object {
    fn from(s: Stream) -> Self {
        Object::Stream(s)
    }
}

impl From<ObjectId> for Object {
    fn from(id: ObjectId) -> Self {
        Object::Reference(id)
    }
}
