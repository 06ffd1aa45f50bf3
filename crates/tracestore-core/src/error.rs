use thiserror::Error;

/// Boxed source error carried by [`StoreError::StoreUnavailable`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A persisted span document that cannot be turned back into a domain span.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    #[error("malformed identifier {value:?}: {reason}")]
    MalformedIdentifier { value: String, reason: String },
    #[error("not a valid span reference type {0:?}")]
    InvalidReference(String),
    #[error("invalid value for tag {key:?}: {reason}")]
    InvalidTagValue { key: String, reason: String },
    #[error("malformed span document: {0}")]
    MalformedDocument(String),
    #[error("non-string value found in field {0:?}")]
    NonStringValue(String),
}

impl DecodeError {
    pub fn malformed_identifier(value: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedIdentifier {
            value: value.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_tag(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidTagValue {
            key: key.into(),
            reason: reason.into(),
        }
    }
}

/// Core error type for span storage operations
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("trace not found")]
    TraceNotFound,
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("store unavailable: {context}: {source}")]
    StoreUnavailable {
        context: String,
        #[source]
        source: BoxError,
    },
    #[error("cannot encode span: {0}")]
    Encode(String),
    #[error("operation cancelled")]
    Cancelled,
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl StoreError {
    pub fn unavailable(context: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::StoreUnavailable {
            context: context.into(),
            source: source.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::TraceNotFound)
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
