/// A stored or legacy-format usage record is malformed.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("missing key '{key}'")]
    MissingKey { key: &'static str },
    #[error("the DateHour must be a string")]
    DateHourNotString,
    #[error("invalid timestamp '{value}'")]
    InvalidTimestamp { value: String },
    #[error("invalid {field} byte count '{value}'")]
    InvalidBytes { field: &'static str, value: String },
    #[error("expected '<timestamp>,<uploaded>,<downloaded>', got '{line}'")]
    MalformedLine { line: String },
    #[error("malformed item: {reason}")]
    MalformedItem { reason: String },
}
