//! Mapping engine error types
//!
//! Two layers: [`DirectoryError`] is what a directory client reports, and
//! [`EntityError`] is what the mapping engine reports. Client errors are
//! carried unchanged inside [`EntityError::Directory`].

use thiserror::Error;

/// Error reported by a directory client.
#[derive(Debug, Error)]
pub enum DirectoryError {
    // Connection errors (usually transient)
    /// Failed to establish a connection to the directory server.
    #[error("connection failed: {message}")]
    ConnectionFailed {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Connection or operation timed out.
    #[error("timeout after {timeout_secs} seconds")]
    Timeout { timeout_secs: u64 },

    // Authentication errors (permanent)
    /// Bind was rejected.
    #[error("authentication failed: invalid credentials")]
    AuthenticationFailed,

    /// Client configuration is invalid.
    #[error("invalid configuration: {message}")]
    InvalidConfiguration { message: String },

    // Operation errors
    /// The directory answered with a non-success result code.
    #[error("{operation} failed with code {code}: {message}")]
    OperationFailed {
        operation: String,
        code: u32,
        message: String,
    },

    /// The request could not be carried out at the protocol level.
    #[error("{operation} failed: {message}")]
    Protocol {
        operation: String,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Entry already exists (add conflict).
    #[error("entry already exists: {dn}")]
    AlreadyExists { dn: String },

    /// Entry does not exist (modify/rename/delete target missing).
    #[error("no such entry: {dn}")]
    NoSuchEntry { dn: String },
}

impl DirectoryError {
    /// Check if this error is transient and the operation may be retried as is.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DirectoryError::ConnectionFailed { .. }
                | DirectoryError::Timeout { .. }
                | DirectoryError::Protocol { .. }
        )
    }

    /// Get an error code for classification.
    pub fn error_code(&self) -> &'static str {
        match self {
            DirectoryError::ConnectionFailed { .. } => "CONNECTION_FAILED",
            DirectoryError::Timeout { .. } => "TIMEOUT",
            DirectoryError::AuthenticationFailed => "AUTH_FAILED",
            DirectoryError::InvalidConfiguration { .. } => "INVALID_CONFIG",
            DirectoryError::OperationFailed { .. } => "OPERATION_FAILED",
            DirectoryError::Protocol { .. } => "PROTOCOL_ERROR",
            DirectoryError::AlreadyExists { .. } => "ENTRY_EXISTS",
            DirectoryError::NoSuchEntry { .. } => "NO_SUCH_ENTRY",
        }
    }

    /// Create a connection failed error.
    pub fn connection_failed(message: impl Into<String>) -> Self {
        DirectoryError::ConnectionFailed {
            message: message.into(),
            source: None,
        }
    }

    /// Create a connection failed error with source.
    pub fn connection_failed_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        DirectoryError::ConnectionFailed {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create an error for a non-success result code.
    pub fn operation_failed(
        operation: impl Into<String>,
        code: u32,
        message: impl Into<String>,
    ) -> Self {
        DirectoryError::OperationFailed {
            operation: operation.into(),
            code,
            message: message.into(),
        }
    }

    /// Create a protocol error with source.
    pub fn protocol_with_source(
        operation: impl Into<String>,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        DirectoryError::Protocol {
            operation: operation.into(),
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

/// Result type for directory client operations.
pub type DirectoryResult<T> = Result<T, DirectoryError>;

/// Kind of directory write issued by a flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WriteKind {
    Create,
    Modify,
    Rename,
    Delete,
}

impl std::fmt::Display for WriteKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WriteKind::Create => write!(f, "create"),
            WriteKind::Modify => write!(f, "modify"),
            WriteKind::Rename => write!(f, "rename"),
            WriteKind::Delete => write!(f, "delete"),
        }
    }
}

/// Error raised by the mapping engine.
#[derive(Debug, Error)]
pub enum EntityError {
    // Metadata errors (fatal)
    /// Entity metadata is invalid.
    #[error("invalid schema for {entity}: {message}")]
    InvalidSchema { entity: String, message: String },

    /// A relation points at an entity type that was never registered.
    #[error("unknown entity type: {name}")]
    UnknownEntityType { name: String },

    // Hydration errors
    /// A strict attribute is missing from a directory entry.
    #[error("cannot hydrate {entity}: required attribute '{attribute}' is missing")]
    InvalidHydrate { entity: String, attribute: String },

    /// A DN-valued attribute references an entry that cannot be loaded.
    #[error("bad relation on {entity}.{attribute}: cannot resolve '{dn}'")]
    BadRelation {
        entity: String,
        attribute: String,
        dn: String,
    },

    /// A column value does not fit the field it is written to.
    #[error("invalid value for field '{field}': {message}")]
    InvalidValue { field: String, message: String },

    // Query errors
    /// No entry matched a lookup.
    #[error("{entity} not found where {attribute}={value}")]
    NotFound {
        entity: String,
        attribute: String,
        value: String,
    },

    /// A lookup expected one entry but several matched.
    #[error("{count} {entity} entries match {attribute}={value}, expected one")]
    MultipleResults {
        entity: String,
        attribute: String,
        value: String,
        count: usize,
    },

    // Unit of work errors
    /// A transient entity has no identifier to build its DN from.
    #[error("cannot build a DN for {entity}: index value is missing")]
    MissingIdentifier { entity: String },

    /// An entity would be written without any object class.
    #[error("cannot write {entity}: object class set is empty")]
    MissingObjectClass { entity: String },

    /// Two distinct instances with the same DN were scheduled.
    #[error("another instance with DN '{dn}' is already scheduled")]
    DuplicateEntity { dn: String },

    /// A scheduled write failed; later writes were not attempted.
    #[error("flush failed on {operation} of {entity} ({dn}): {source}")]
    Flush {
        entity: String,
        dn: String,
        operation: WriteKind,
        #[source]
        source: Box<EntityError>,
    },

    // Manager registry errors
    /// A manager with this name is already registered.
    #[error("entity manager '{name}' is already registered")]
    DuplicateManager { name: String },

    /// No manager is registered under this name.
    #[error("no entity manager registered as '{name}'")]
    NoManager { name: String },

    /// Failure reported by the directory client.
    #[error(transparent)]
    Directory(#[from] DirectoryError),
}

impl EntityError {
    /// Check if retrying the same call may succeed without changing metadata.
    pub fn is_retryable(&self) -> bool {
        match self {
            EntityError::Directory(e) => e.is_transient(),
            EntityError::Flush { source, .. } => source.is_retryable(),
            _ => false,
        }
    }

    /// Get an error code for classification.
    pub fn error_code(&self) -> &'static str {
        match self {
            EntityError::InvalidSchema { .. } => "INVALID_SCHEMA",
            EntityError::UnknownEntityType { .. } => "UNKNOWN_ENTITY_TYPE",
            EntityError::InvalidHydrate { .. } => "INVALID_HYDRATE",
            EntityError::BadRelation { .. } => "BAD_RELATION",
            EntityError::InvalidValue { .. } => "INVALID_VALUE",
            EntityError::NotFound { .. } => "NOT_FOUND",
            EntityError::MultipleResults { .. } => "MULTIPLE_RESULTS",
            EntityError::MissingIdentifier { .. } => "MISSING_IDENTIFIER",
            EntityError::MissingObjectClass { .. } => "MISSING_OBJECT_CLASS",
            EntityError::DuplicateEntity { .. } => "DUPLICATE_ENTITY",
            EntityError::Flush { .. } => "FLUSH_FAILED",
            EntityError::DuplicateManager { .. } => "DUPLICATE_MANAGER",
            EntityError::NoManager { .. } => "NO_MANAGER",
            EntityError::Directory(e) => e.error_code(),
        }
    }

    /// Create an invalid schema error.
    pub fn invalid_schema(entity: impl Into<String>, message: impl Into<String>) -> Self {
        EntityError::InvalidSchema {
            entity: entity.into(),
            message: message.into(),
        }
    }

    /// Create an invalid value error.
    pub fn invalid_value(field: impl Into<String>, message: impl Into<String>) -> Self {
        EntityError::InvalidValue {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Result type for mapping engine operations.
pub type EntityResult<T> = Result<T, EntityError>;
