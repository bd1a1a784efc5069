//! Direct object value space: the closed set of PDF value kinds.

mod array;
mod dictionary;
mod primitive;
mod stream;
mod string;

pub use array::Array;
pub use dictionary::Dictionary;
pub use primitive::{Object, ObjectId};
pub use stream::Stream;
pub use string::{PdfString, StringFormat, StringKind};

/// Shared null returned for anything that cannot be resolved.
pub(crate) static NULL_OBJECT: Object = Object::Null;
