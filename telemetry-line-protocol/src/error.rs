use std::fmt;

use thiserror::Error;

use crate::MAX_KEY_LENGTH;

/// Why a line could not be parsed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Reason {
    /// The line does not start with a measurement name.
    MissingMeasurement,

    /// The line ends before its fields.
    MissingFields,

    /// A tag has no key.
    MissingTagKey,

    /// A tag has no value.
    MissingTagValue,

    /// A tag value contains an unescaped equals sign.
    InvalidTagFormat,

    /// A field has no key.
    MissingFieldKey,

    /// A field has no value.
    MissingFieldValue,

    /// A string field value is missing its closing quote.
    UnbalancedQuotes,

    /// The fields are not a comma-separated list of `key=value` pairs.
    InvalidFieldFormat,

    /// The timestamp is not an integer, or is out of range once scaled to nanoseconds.
    InvalidTimestamp,

    /// A numeric field value is malformed.
    InvalidNumber,

    /// An integer field value does not fit in an `i64`.
    InvalidInteger,

    /// A float field value does not fit in an `f64`.
    InvalidFloat,

    /// A boolean field value is not one of the accepted spellings.
    InvalidBoolean,

    /// A field value is neither a number, a string, nor a boolean.
    InvalidValue,

    /// The buffer is too short to hold even a single metric.
    BufferTooShort,

    /// The measurement name and tags together exceed [`MAX_KEY_LENGTH`] bytes.
    MaxKeyLengthExceeded(usize),
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            Reason::MissingMeasurement => "missing measurement",
            Reason::MissingFields => "missing fields",
            Reason::MissingTagKey => "missing tag key",
            Reason::MissingTagValue => "missing tag value",
            Reason::InvalidTagFormat => "invalid tag format",
            Reason::MissingFieldKey => "missing field key",
            Reason::MissingFieldValue => "missing field value",
            Reason::UnbalancedQuotes => "unbalanced quotes",
            Reason::InvalidFieldFormat => "invalid field format",
            Reason::InvalidTimestamp => "invalid timestamp",
            Reason::InvalidNumber => "invalid number",
            Reason::InvalidInteger => "invalid integer",
            Reason::InvalidFloat => "invalid float",
            Reason::InvalidBoolean => "invalid boolean",
            Reason::InvalidValue => "invalid value",
            Reason::BufferTooShort => "buffer too short",
            Reason::MaxKeyLengthExceeded(len) => {
                return write!(f, "max key length exceeded: {len} > {MAX_KEY_LENGTH}");
            }
        };
        f.write_str(reason)
    }
}

/// An error encountered while parsing line protocol.
///
/// Carries the reason, the offending input, and the byte index within that input where parsing stopped.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("metric parsing error, reason: [{reason}], buffer: [{buffer}], index: [{index}]")]
pub struct ParseError {
    reason: Reason,
    buffer: String,
    index: usize,
}

impl ParseError {
    pub(crate) fn new(reason: Reason, buffer: &[u8], index: usize) -> Self {
        Self { reason, buffer: String::from_utf8_lossy(buffer).into_owned(), index }
    }

    /// Gets the reason parsing failed.
    pub fn reason(&self) -> Reason {
        self.reason
    }

    /// Gets the input that failed to parse, lossily converted to UTF-8.
    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    /// Gets the byte index within the input where parsing stopped.
    pub fn index(&self) -> usize {
        self.index
    }
}

/// Errors for every line of a batch that failed to parse.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{}", join(.errors))]
pub struct BatchError {
    errors: Vec<ParseError>,
}

impl BatchError {
    pub(crate) fn new(errors: Vec<ParseError>) -> Self {
        Self { errors }
    }

    /// Gets the error for each line that failed to parse, in input order.
    pub fn errors(&self) -> &[ParseError] {
        &self.errors
    }

    /// Consumes this error, returning the error for each line that failed to parse.
    pub fn into_errors(self) -> Vec<ParseError> {
        self.errors
    }
}

fn join(errors: &[ParseError]) -> String {
    errors.iter().map(ToString::to_string).collect::<Vec<_>>().join(" ")
}
