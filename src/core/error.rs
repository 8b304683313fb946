use thiserror::Error;

#[derive(Error, Debug)]
pub enum RepoError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("{collection} '{id}' not found")]
    NotFound { collection: String, id: String },

    #[error("Unsupported path: {0}")]
    UnsupportedPath(String),

    #[error("Transient store error: {0}")]
    TransientStore(String),

    #[error("Concurrency conflict on {collection} '{id}' after {attempts} attempts")]
    ConcurrencyConflict {
        collection: String,
        id: String,
        attempts: usize,
    },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl RepoError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn not_found(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            collection: collection.into(),
            id: id.into(),
        }
    }

    pub fn unsupported_path(message: impl Into<String>) -> Self {
        Self::UnsupportedPath(message.into())
    }

    /// Only transient store failures are worth retrying from the caller side;
    /// concurrency conflicts need a fresh read first.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientStore(_))
    }

    /// Stable machine-readable code, shared with the wire protocol.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::NotFound { .. } => "not_found",
            Self::UnsupportedPath(_) => "unsupported_path",
            Self::TransientStore(_) => "transient",
            Self::ConcurrencyConflict { .. } => "conflict",
            Self::Cancelled => "cancelled",
            Self::Serialization(_) => "serialization",
            Self::Storage(_) => "storage",
        }
    }

    /// The message without its variant prefix, for carriers such as the
    /// wire protocol that transmit the kind separately.
    pub fn message(&self) -> String {
        match self {
            Self::Validation(message)
            | Self::UnsupportedPath(message)
            | Self::TransientStore(message)
            | Self::Serialization(message)
            | Self::Storage(message) => message.clone(),
            _ => self.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, RepoError>;

impl From<serde_json::Error> for RepoError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for RepoError {
    fn from(err: std::io::Error) -> Self {
        Self::Storage(err.to_string())
    }
}
