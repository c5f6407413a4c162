//! Error types for SessionORM operations.

use crate::key::PrimaryKey;
use std::fmt;

/// The primary error type for all session, mapping and storage operations.
#[derive(Debug)]
pub enum Error {
    /// Operation attempted on a closed session factory
    ClosedFactory,
    /// Operation attempted on a closed (or dropped) session
    ClosedSession,
    /// A row with the same primary key already exists
    DuplicateKey(KeyError),
    /// No row matches the requested primary key
    EntityNotFound(KeyError),
    /// Flushing pending writes at commit failed; storage is unchanged
    Commit(CommitError),
    /// Missing or malformed configuration
    Configuration(ConfigError),
    /// Transaction state machine violations
    Transaction(TransactionError),
    /// Invalid descriptors or unregistered entity types
    Mapping(MappingError),
    /// Type conversion errors
    Type(TypeError),
    /// Errors reported by the storage driver
    Storage(StorageError),
    /// I/O errors
    Io(std::io::Error),
    /// Serialization/deserialization errors
    Serde(String),
    /// Custom error with message
    Custom(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyError {
    /// Name of the mapped entity type
    pub entity: String,
    pub key: PrimaryKey,
}

#[derive(Debug)]
pub struct CommitError {
    pub message: String,
    pub source: Box<Error>,
}

#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug)]
pub struct TransactionError {
    pub kind: TransactionErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionErrorKind {
    /// `begin` called on a transaction that is already active
    AlreadyActive,
    /// `commit`/`rollback` called before `begin`
    NotActive,
    /// Already committed
    AlreadyCommitted,
    /// Already rolled back
    AlreadyRolledBack,
    /// The session already holds another active transaction
    Nested,
}

#[derive(Debug)]
pub struct MappingError {
    pub kind: MappingErrorKind,
    pub entity: String,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappingErrorKind {
    /// Descriptor failed validation
    InvalidDescriptor,
    /// Entity type was not registered with the configuration
    Unregistered,
    /// A managed entity's primary key was modified
    IdentifierChanged,
    /// Record shape does not match the descriptor
    FieldMismatch,
}

#[derive(Debug)]
pub struct TypeError {
    pub expected: &'static str,
    pub actual: String,
    pub column: Option<String>,
}

#[derive(Debug)]
pub struct StorageError {
    pub kind: StorageErrorKind,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageErrorKind {
    /// Table was never prepared
    UnknownTable,
    /// Update or delete of a row that no longer exists
    StaleRow,
    /// Stored table layout does not match the mapping
    SchemaMismatch,
    /// Persistent data could not be decoded
    Corrupt,
    /// Storage has been closed
    Closed,
}

impl Error {
    pub fn duplicate_key(entity: impl Into<String>, key: PrimaryKey) -> Self {
        Error::DuplicateKey(KeyError {
            entity: entity.into(),
            key,
        })
    }

    pub fn not_found(entity: impl Into<String>, key: PrimaryKey) -> Self {
        Error::EntityNotFound(KeyError {
            entity: entity.into(),
            key,
        })
    }

    pub fn config(message: impl Into<String>) -> Self {
        Error::Configuration(ConfigError {
            message: message.into(),
            source: None,
        })
    }

    pub fn storage(kind: StorageErrorKind, message: impl Into<String>) -> Self {
        Error::Storage(StorageError {
            kind,
            message: message.into(),
            source: None,
        })
    }

    pub fn mapping(
        kind: MappingErrorKind,
        entity: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Error::Mapping(MappingError {
            kind,
            entity: entity.into(),
            message: message.into(),
        })
    }

    pub fn transaction(kind: TransactionErrorKind, message: impl Into<String>) -> Self {
        Error::Transaction(TransactionError {
            kind,
            message: message.into(),
        })
    }

    /// Wrap a flush failure as a commit error.
    pub fn commit(message: impl Into<String>, source: Error) -> Self {
        Error::Commit(CommitError {
            message: message.into(),
            source: Box::new(source),
        })
    }

    /// The innermost error, looking through commit wrappers.
    pub fn root_cause(&self) -> &Error {
        match self {
            Error::Commit(e) => e.source.root_cause(),
            other => other,
        }
    }

    /// Is this a duplicate key violation (directly or as the cause of a failed commit)?
    pub fn is_duplicate_key(&self) -> bool {
        matches!(self.root_cause(), Error::DuplicateKey(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self.root_cause(), Error::EntityNotFound(_))
    }

    /// Is this caused by a closed session, factory or storage?
    pub fn is_closed(&self) -> bool {
        matches!(
            self.root_cause(),
            Error::ClosedFactory
                | Error::ClosedSession
                | Error::Storage(StorageError {
                    kind: StorageErrorKind::Closed,
                    ..
                })
        )
    }

    /// Is this a failed commit that could succeed if the caller reloads and retries?
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Commit(e) => matches!(
                e.source.root_cause(),
                Error::DuplicateKey(_)
                    | Error::Storage(StorageError {
                        kind: StorageErrorKind::StaleRow,
                        ..
                    })
            ),
            _ => false,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::ClosedFactory => write!(f, "Session factory is closed"),
            Error::ClosedSession => write!(f, "Session is closed"),
            Error::DuplicateKey(e) => write!(f, "Duplicate key: {}", e),
            Error::EntityNotFound(e) => write!(f, "Entity not found: {}", e),
            Error::Commit(e) => write!(f, "Commit failed: {}", e),
            Error::Configuration(e) => write!(f, "Configuration error: {}", e),
            Error::Transaction(e) => write!(f, "Transaction error: {}", e),
            Error::Mapping(e) => write!(f, "Mapping error: {}", e),
            Error::Type(e) => write!(f, "Type error: {}", e),
            Error::Storage(e) => write!(f, "Storage error: {}", e),
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Serde(msg) => write!(f, "Serialization error: {}", msg),
            Error::Custom(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Commit(e) => Some(e.source.as_ref()),
            Error::Configuration(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Storage(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for KeyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.entity, self.key)
    }
}

impl fmt::Display for CommitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.message, self.source)
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for TransactionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for MappingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.entity, self.message)
    }
}

impl fmt::Display for TypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(col) = &self.column {
            write!(
                f,
                "expected {} for column '{}', found {}",
                self.expected, col, self.actual
            )
        } else {
            write!(f, "expected {}, found {}", self.expected, self.actual)
        }
    }
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serde(err.to_string())
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::Configuration(err)
    }
}

impl From<TransactionError> for Error {
    fn from(err: TransactionError) -> Self {
        Error::Transaction(err)
    }
}

impl From<MappingError> for Error {
    fn from(err: MappingError) -> Self {
        Error::Mapping(err)
    }
}

impl From<TypeError> for Error {
    fn from(err: TypeError) -> Self {
        Error::Type(err)
    }
}

impl From<StorageError> for Error {
    fn from(err: StorageError) -> Self {
        Error::Storage(err)
    }
}

/// Result type alias for SessionORM operations.
pub type Result<T> = std::result::Result<T, Error>;
