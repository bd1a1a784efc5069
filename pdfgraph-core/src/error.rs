use crate::parser::ParseError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PdfError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Invalid PDF structure: {0}")]
    InvalidStructure(String),

    #[error("Invalid object reference: {0} {1} R")]
    InvalidObjectReference(u32, u16),

    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    #[error("Invalid tree order: min {min}, max {max}")]
    InvalidOrder { min: usize, max: usize },

    #[error("Invalid object type: expected {expected}, found {found}")]
    InvalidObjectType { expected: String, found: String },
}

pub type Result<T> = std::result::Result<T, PdfError>;
