//! Errors raised by the core building blocks.

use thiserror::Error;

/// Errors produced while building filters, projections or touching a
/// resource facade.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum CoreError {
    /// `$between` needs at least one bound.
    #[error("$between requires at least one non-null bound")]
    EmptyBetween,

    /// `$between` must be a two element array.
    #[error("$between expects an array with exactly two elements")]
    MalformedBetween,

    /// An operator key that the service does not understand.
    #[error("unknown filter operator \"{operator}\"")]
    UnknownOperator { operator: String },

    /// Filter JSON that does not map to any filter shape.
    #[error("invalid filter: {0}")]
    InvalidFilter(String),

    /// Field selection JSON that is neither a path list nor a boolean map.
    #[error("invalid field selection: {0}")]
    InvalidSelection(String),

    /// Assignment to a hypermedia field.
    #[error("The \"{0}\" property cannot be changed.")]
    ReadOnlyField(String),

    /// Deletion of a hypermedia field.
    #[error("The \"{0}\" property cannot be deleted.")]
    UndeletableField(String),

    /// A document that is not a JSON object.
    #[error("expected a JSON object, found {0}")]
    NotAnObject(&'static str),

    /// A resource document whose fields do not fit the requested type.
    #[error("invalid resource document: {0}")]
    InvalidDocument(String),
}

/// Type alias for core results.
pub type CoreResult<T> = std::result::Result<T, CoreError>;

/// Names the JSON type of a value for error messages.
pub(crate) fn json_type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}
