use std::collections::TryReserveError;

use quick_xml::events::attributes::AttrError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TpsError {
    #[error("There is a problem inverting the {size}x{size} interpolation matrix")]
    SingularMatrix { size: usize },

    #[error("Too many coefficients for {points} control points. Computation aborted.")]
    TooManyPoints { points: usize },

    #[error("Out of memory while allocating spline storage: {0}")]
    Allocation(#[from] TryReserveError),

    #[error("Matrix buffer holds {actual} values, expected {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Spline has no control points and cannot be solved")]
    NotSolvable,

    #[error("Invalid value for option {key}: {value:?}")]
    InvalidOption { key: String, value: String },

    #[error("Malformed document: {0}")]
    MalformedDocument(String),

    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("XML attribute error: {0}")]
    XmlAttribute(#[from] AttrError),

    #[error("Invalid number {text:?} in {field}")]
    InvalidNumber { field: String, text: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, TpsError>;
