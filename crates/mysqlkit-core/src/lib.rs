//! Core types and traits for mysqlkit.
//!
//! - `Connection` trait: the synchronous database capability
//! - `Value` and `Row` for parameters and results
//! - `Error` taxonomy shared by the driver and the blob helper
//! - MySQL identifier quoting

pub mod connection;
pub mod error;
pub mod identifiers;
pub mod row;
pub mod value;

pub use connection::{Connection, ExecOutcome, LongData, StatementResult};
pub use error::{
    BlobError, BlobErrorKind, ConfigError, ConnectionError, ConnectionErrorKind, Error,
    IdentifierError, ProtocolError, QueryError, QueryErrorKind, Result, TypeError,
};
pub use identifiers::{MAX_IDENTIFIER_LEN, quote_ident_mysql, try_quote_ident, try_quote_qualified};
pub use row::{ColumnInfo, FromValue, Row};
pub use value::Value;
