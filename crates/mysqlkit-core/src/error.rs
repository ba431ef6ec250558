//! Error types for mysqlkit operations.

use std::fmt;
use std::path::{Path, PathBuf};

/// The primary error type for all mysqlkit operations.
#[derive(Debug)]
pub enum Error {
    /// Connection-related errors (connect, authenticate, disconnect)
    Connection(ConnectionError),
    /// Query execution errors reported by the server
    Query(QueryError),
    /// Type conversion errors
    Type(TypeError),
    /// Protocol errors (wire-level)
    Protocol(ProtocolError),
    /// Configuration errors
    Config(ConfigError),
    /// An identifier that cannot be quoted safely
    Identifier(IdentifierError),
    /// BLOB file transfer errors
    Blob(BlobError),
    /// I/O errors
    Io(std::io::Error),
    /// Custom error with message
    Custom(String),
}

#[derive(Debug)]
pub struct ConnectionError {
    pub kind: ConnectionErrorKind,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionErrorKind {
    /// Failed to establish connection
    Connect,
    /// Authentication failed
    Authentication,
    /// Connection lost during operation
    Disconnected,
    /// Connection refused
    Refused,
    /// Operation attempted on a connection that is not open
    NotOpen,
}

#[derive(Debug)]
pub struct QueryError {
    pub kind: QueryErrorKind,
    pub sql: Option<String>,
    pub sqlstate: Option<String>,
    /// Server error number (e.g. 1146 for an unknown table)
    pub code: Option<u16>,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryErrorKind {
    /// Syntax error in SQL
    Syntax,
    /// Constraint violation (unique, foreign key, etc.)
    Constraint,
    /// Table or column not found
    NotFound,
    /// Permission denied
    Permission,
    /// Data too large for column
    DataTruncation,
    /// Deadlock detected
    Deadlock,
    /// Statement timeout
    Timeout,
    /// Parameter count does not match the statement placeholders
    ParameterMismatch,
    /// Other database error
    Database,
}

#[derive(Debug)]
pub struct TypeError {
    pub expected: &'static str,
    pub actual: String,
    pub column: Option<String>,
}

#[derive(Debug)]
pub struct ProtocolError {
    pub message: String,
    pub raw_data: Option<Vec<u8>>,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone)]
pub struct IdentifierError {
    /// The rejected identifier
    pub name: String,
    /// Why it was rejected
    pub reason: &'static str,
}

#[derive(Debug)]
pub struct BlobError {
    pub kind: BlobErrorKind,
    /// Local file involved in the transfer, if any
    pub path: Option<PathBuf>,
    pub message: String,
    pub source: Option<std::io::Error>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobErrorKind {
    /// A required request field is empty or missing
    InvalidRequest,
    /// The local file could not be opened, read, or written
    FileAccess,
    /// No row matched the reference column and value
    RowNotFound,
    /// The matching row holds NULL in the BLOB column
    NullValue,
}

impl BlobError {
    /// Build a file-access error for `path` from an I/O failure.
    pub fn file_access(path: &Path, action: &str, err: std::io::Error) -> Self {
        Self {
            kind: BlobErrorKind::FileAccess,
            path: Some(path.to_path_buf()),
            message: format!("failed to {} '{}': {}", action, path.display(), err),
            source: Some(err),
        }
    }

    /// Build an error without an I/O source.
    pub fn new(kind: BlobErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            path: None,
            message: message.into(),
            source: None,
        }
    }
}

impl Error {
    /// Is this a connection error that likely requires reconnection?
    pub fn is_connection_error(&self) -> bool {
        match self {
            Error::Connection(c) => matches!(
                c.kind,
                ConnectionErrorKind::Connect
                    | ConnectionErrorKind::Authentication
                    | ConnectionErrorKind::Disconnected
                    | ConnectionErrorKind::Refused
            ),
            Error::Protocol(_) => true,
            _ => false,
        }
    }

    /// Get SQLSTATE if available (e.g., "42S02" for an unknown table)
    pub fn sqlstate(&self) -> Option<&str> {
        match self {
            Error::Query(q) => q.sqlstate.as_deref(),
            _ => None,
        }
    }

    /// Get the SQL that caused this error, if available
    pub fn sql(&self) -> Option<&str> {
        match self {
            Error::Query(q) => q.sql.as_deref(),
            _ => None,
        }
    }

    /// The blob error kind, when this is a transfer error.
    pub fn blob_kind(&self) -> Option<BlobErrorKind> {
        match self {
            Error::Blob(b) => Some(b.kind),
            _ => None,
        }
    }

    /// Attach the statement text to a query error that lacks it.
    #[must_use]
    pub fn with_sql(self, sql: &str) -> Self {
        match self {
            Error::Query(mut q) if q.sql.is_none() => {
                q.sql = Some(sql.to_string());
                Error::Query(q)
            }
            other => other,
        }
    }
}

impl QueryError {
    /// Is this a unique constraint violation?
    pub fn is_unique_violation(&self) -> bool {
        self.code == Some(1062)
    }

    /// Does the error report an unknown table or column?
    pub fn is_unknown_object(&self) -> bool {
        matches!(self.code, Some(1146 | 1054))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Connection(e) => write!(f, "Connection error: {}", e.message),
            Error::Query(e) => {
                if let Some(sqlstate) = &e.sqlstate {
                    write!(f, "Query error (SQLSTATE {}): {}", sqlstate, e.message)
                } else {
                    write!(f, "Query error: {}", e.message)
                }
            }
            Error::Type(e) => write!(f, "Type error: {}", e),
            Error::Protocol(e) => write!(f, "Protocol error: {}", e.message),
            Error::Config(e) => write!(f, "Configuration error: {}", e.message),
            Error::Identifier(e) => write!(f, "Invalid identifier: {}", e),
            Error::Blob(e) => write!(f, "Blob transfer error: {}", e.message),
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Custom(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Connection(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Query(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Protocol(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Config(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Blob(e) => e
                .source
                .as_ref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(sqlstate) = &self.sqlstate {
            write!(f, "{} (SQLSTATE {})", self.message, sqlstate)
        } else {
            write!(f, "{}", self.message)
        }
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

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for IdentifierError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} {}", self.name, self.reason)
    }
}

impl fmt::Display for BlobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<ConnectionError> for Error {
    fn from(err: ConnectionError) -> Self {
        Error::Connection(err)
    }
}

impl From<QueryError> for Error {
    fn from(err: QueryError) -> Self {
        Error::Query(err)
    }
}

impl From<TypeError> for Error {
    fn from(err: TypeError) -> Self {
        Error::Type(err)
    }
}

impl From<ProtocolError> for Error {
    fn from(err: ProtocolError) -> Self {
        Error::Protocol(err)
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::Config(err)
    }
}

impl From<IdentifierError> for Error {
    fn from(err: IdentifierError) -> Self {
        Error::Identifier(err)
    }
}

impl From<BlobError> for Error {
    fn from(err: BlobError) -> Self {
        Error::Blob(err)
    }
}

/// Result type alias for mysqlkit operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn sqlstate_and_sql_helpers() {
        let query = QueryError {
            kind: QueryErrorKind::Constraint,
            sql: None,
            sqlstate: Some("23000".to_string()),
            code: Some(1062),
            message: "Duplicate entry '1' for key 'PRIMARY'".to_string(),
            source: None,
        };
        assert!(query.is_unique_violation());
        assert!(!query.is_unknown_object());

        let err = Error::Query(query).with_sql("INSERT INTO t VALUES (1)");
        assert_eq!(err.sqlstate(), Some("23000"));
        assert_eq!(err.sql(), Some("INSERT INTO t VALUES (1)"));
    }

    #[test]
    fn with_sql_keeps_existing_statement() {
        let err = Error::Query(QueryError {
            kind: QueryErrorKind::Syntax,
            sql: Some("SELEC 1".to_string()),
            sqlstate: None,
            code: None,
            message: "syntax".to_string(),
            source: None,
        })
        .with_sql("SELECT 2");
        assert_eq!(err.sql(), Some("SELEC 1"));
    }

    #[test]
    fn blob_file_access_keeps_io_source() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "no such file");
        let err = Error::from(BlobError::file_access(Path::new("/tmp/x.bin"), "open", io));

        assert_eq!(err.blob_kind(), Some(BlobErrorKind::FileAccess));
        assert!(err.source().is_some());
        assert!(err.to_string().contains("/tmp/x.bin"));
        assert!(!err.is_connection_error());
    }

    #[test]
    fn connection_flags() {
        let lost = Error::Connection(ConnectionError {
            kind: ConnectionErrorKind::Disconnected,
            message: "lost connection".to_string(),
            source: None,
        });
        assert!(lost.is_connection_error());

        let not_open = Error::Connection(ConnectionError {
            kind: ConnectionErrorKind::NotOpen,
            message: "not open".to_string(),
            source: None,
        });
        assert!(!not_open.is_connection_error());
    }

    #[test]
    fn identifier_error_display() {
        let err = Error::from(IdentifierError {
            name: String::new(),
            reason: "is empty",
        });
        assert_eq!(err.to_string(), "Invalid identifier: \"\" is empty");
    }
}
