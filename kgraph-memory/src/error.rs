//! Error types for kgraph-memory

use thiserror::Error;

/// Errors that can occur in the knowledge graph
#[derive(Debug, Error)]
pub enum GraphError {
    /// A mandatory value was not supplied (absent, null or blank)
    #[error("{0}")]
    RequiredField(String),

    /// A value was supplied with the wrong shape
    #[error("{0}")]
    TypeMismatch(String),

    /// A value has the right shape but breaks a limit or enumeration
    #[error("{0}")]
    Validation(String),

    /// Tenant id hits a reserved name or prefix
    #[error("{0}")]
    ReservedIdentifier(String),

    /// Entity, relationship or memory is absent (or soft-deleted and not requested)
    #[error("{0}")]
    NotFound(String),

    /// Live entity with the same (group, entity_id) already exists
    #[error("{0}")]
    DuplicateEntity(String),

    /// Relationship-specific failure
    #[error("{0}")]
    Relationship(String),

    /// RocksDB error
    #[error("Storage error: {0}")]
    Storage(#[from] rocksdb::Error),

    /// Record encoding error (MessagePack)
    #[error("Encode error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// Record decoding error (MessagePack)
    #[error("Decode error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    /// Vector serialization error (bincode)
    #[error("Serialization error: {0}")]
    Bincode(#[from] bincode::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Embedding generation error
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// Extraction collaborator failure
    #[error("Failed to extract entities/relationships from text: {0}")]
    Extraction(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic store-level error
    #[error("{0}")]
    Store(String),
}

impl GraphError {
    pub fn required(msg: impl Into<String>) -> Self {
        Self::RequiredField(msg.into())
    }

    pub fn type_mismatch(msg: impl Into<String>) -> Self {
        Self::TypeMismatch(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn relationship(msg: impl Into<String>) -> Self {
        Self::Relationship(msg.into())
    }

    pub fn embedding(msg: impl Into<String>) -> Self {
        Self::Embedding(msg.into())
    }

    pub fn extraction(msg: impl Into<String>) -> Self {
        Self::Extraction(msg.into())
    }

    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    /// Name of the error as reported at the tool boundary
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::RequiredField(_) => "RequiredFieldError",
            Self::TypeMismatch(_) => "TypeMismatchError",
            Self::Validation(_) => "ValidationError",
            Self::ReservedIdentifier(_) => "ReservedIdentifierError",
            Self::NotFound(_) => "NotFoundError",
            Self::DuplicateEntity(_) => "DuplicateEntityError",
            Self::Relationship(_) => "RelationshipError",
            Self::Embedding(_) => "EmbeddingError",
            Self::Extraction(_) => "ExtractionError",
            Self::Storage(_)
            | Self::Encode(_)
            | Self::Decode(_)
            | Self::Bincode(_)
            | Self::Json(_)
            | Self::Io(_)
            | Self::Store(_) => "StoreError",
        }
    }

    /// True for errors raised before any I/O is attempted
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::RequiredField(_)
                | Self::TypeMismatch(_)
                | Self::Validation(_)
                | Self::ReservedIdentifier(_)
        )
    }
}

/// Result type for graph operations
pub type Result<T> = std::result::Result<T, GraphError>;
